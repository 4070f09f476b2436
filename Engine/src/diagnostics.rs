/// Diagnostic channel setup.
use libafl_bolts::SimpleStderrLogger;
use log::LevelFilter;

/// Route `log` output to stderr. Debug mode lowers the level so the per-branch
/// trace shows up. Calling this again only adjusts the level.
pub fn init_logging(debug: bool) {
    if SimpleStderrLogger::set_logger().is_err() {
        log::trace!("logger already registered");
    }
    log::set_max_level(level_for(debug));
}

fn level_for(debug: bool) -> LevelFilter {
    if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    }
}
