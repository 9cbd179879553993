pub mod config;
pub mod link;
pub mod logging;
pub mod observe;
pub mod rotating_log;
pub mod session;
pub mod signal_stop;
pub mod watcher;
