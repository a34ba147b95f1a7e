//! Phase timing for the ablation pipeline.

use std::time::Instant;

/// Logs how long a pipeline phase took when it goes out of scope.
///
/// Wrap the phases of a step to see where the time goes — the stochastic
/// decrement and corner sync are cheap, so a slow step almost always means
/// the surface rebuild:
///
/// ```ignore
/// let _t = Timed::info("initial surface build");
/// ablate.store_corners(/* ... */)?;
/// // logs "initial surface build took 84.1ms" when _t drops
/// ```
pub struct Timed {
    what: &'static str,
    level: log::Level,
    start: Instant,
}

impl Timed {
    /// Time a step-level phase, reported at INFO.
    pub fn info(what: &'static str) -> Self {
        Self::at(log::Level::Info, what)
    }

    /// Time an inner phase (per-step rebuild, cut pass), reported at DEBUG.
    pub fn debug(what: &'static str) -> Self {
        Self::at(log::Level::Debug, what)
    }

    fn at(level: log::Level, what: &'static str) -> Self {
        log::trace!("{what} started");
        Timed {
            what,
            level,
            start: Instant::now(),
        }
    }
}

impl Drop for Timed {
    fn drop(&mut self) {
        log::log!(
            self.level,
            "{} took {:.3?}",
            self.what,
            self.start.elapsed()
        );
    }
}
