//! Small timing helpers for the correlation drivers.

use std::time::Instant;

/// RAII timer that logs elapsed time on drop.
///
/// # Example
/// ```ignore
/// let _t = Timed::debug("auto pass");
/// // ... traverse ...
/// // logs "auto pass: 412.3ms" when _t is dropped
/// ```
pub struct Timed {
    name: &'static str,
    start: Instant,
    level: log::Level,
}

impl Timed {
    /// Timer that reports at INFO level.
    #[allow(dead_code)]
    pub fn info(name: &'static str) -> Self {
        Self::at(name, log::Level::Info)
    }

    /// Timer that reports at DEBUG level.
    pub fn debug(name: &'static str) -> Self {
        Self::at(name, log::Level::Debug)
    }

    fn at(name: &'static str, level: log::Level) -> Self {
        log::trace!("{}...", name);
        Self {
            name,
            start: Instant::now(),
            level,
        }
    }
}

impl Drop for Timed {
    fn drop(&mut self) {
        log::log!(self.level, "{}: {:.3?}", self.name, self.start.elapsed());
    }
}
