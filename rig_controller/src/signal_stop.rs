//! Last-resort stop: on SIGINT, write the stop record straight to the port's
//! file descriptor from the signal handler and exit.

use std::{io, os::fd::RawFd};

use rig_protocol::STOP_RECORD;
use signal_hook::{SigId, consts::SIGINT, low_level};

/// 128 + SIGINT, what a shell reports for an interrupted process.
pub const STOP_EXIT_CODE: i32 = 130;

/// Installs the handler. `fd` must stay open for the rest of the process.
pub fn install_raw_stop_handler(fd: RawFd) -> io::Result<SigId> {
    let action = move || {
        // A short write cannot be retried safely here; the device also
        // accepts any byte as a stop while it is moving.
        // SAFETY: write(2) is async-signal-safe and STOP_RECORD is static.
        let _ = unsafe { libc::write(fd, STOP_RECORD.as_ptr().cast(), STOP_RECORD.len()) };
        low_level::exit(STOP_EXIT_CODE);
    };

    // SAFETY: the action only calls write(2) and _exit(2), both
    // async-signal-safe, and touches no locks or allocations.
    unsafe { low_level::register(SIGINT, action) }
}
