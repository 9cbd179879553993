//! Turns an operator action into a cancellation: sets the shared flag and
//! writes the stop line on the serial link while the session is blocked
//! reading.

use std::{
    io::{self, Read},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc,
    },
    thread,
    time::Duration,
};

use rig_protocol::STOP_LINE;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use utilities::{cancel::CancelFlag, line_io::SharedLineWriter};

/// Something the operator can use to ask for a stop.
pub trait CancelSource: Send {
    fn name(&self) -> &'static str;

    /// Non-blocking. True once the operator has asked for a stop.
    fn poll_trigger(&mut self) -> bool;
}

/// Any byte typed on the console, Enter included, requests a stop.
pub struct ConsoleSource {
    input: mpsc::Receiver<()>,
}

impl ConsoleSource {
    pub fn stdin() -> io::Result<Self> {
        Self::spawn(io::stdin())
    }

    /// Reads `input` on a background thread. End of input never triggers.
    pub fn spawn<R: Read + Send + 'static>(mut input: R) -> io::Result<Self> {
        let (tx, rx) = mpsc::channel();

        thread::Builder::new()
            .name("console-watch".to_string())
            .spawn(move || {
                let mut buf = [0u8; 64];
                loop {
                    match input.read(&mut buf) {
                        Ok(0) => break,
                        Ok(_) => {
                            if tx.send(()).is_err() {
                                break;
                            }
                        }
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => {
                            debug!("Console watch stopped: {}", e);
                            break;
                        }
                    }
                }
            })?;

        Ok(Self { input: rx })
    }
}

impl CancelSource for ConsoleSource {
    fn name(&self) -> &'static str {
        "console"
    }

    fn poll_trigger(&mut self) -> bool {
        self.input.try_recv().is_ok()
    }
}

/// Ctrl+C, caught so the session can wind down in order.
pub struct CtrlCSource {
    hit: Arc<AtomicBool>,
}

impl CtrlCSource {
    /// Must be called from inside the runtime.
    pub fn install() -> Self {
        let hit = Arc::new(AtomicBool::new(false));

        tokio::spawn({
            let hit = hit.clone();
            async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => hit.store(true, Ordering::SeqCst),
                    Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
                }
            }
        });

        Self { hit }
    }
}

impl CancelSource for CtrlCSource {
    fn name(&self) -> &'static str {
        "ctrl-c"
    }

    fn poll_trigger(&mut self) -> bool {
        self.hit.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    /// This watcher requested the stop.
    Triggered,
    /// The flag was set elsewhere first.
    AlreadyCancelled,
    Shutdown,
}

pub struct CancellationWatcher<S> {
    source: S,
    flag: CancelFlag,
    writer: SharedLineWriter,
    period: Duration,
}

impl<S: CancelSource> CancellationWatcher<S> {
    pub fn new(source: S, flag: CancelFlag, writer: SharedLineWriter, period: Duration) -> Self {
        Self {
            source,
            flag,
            writer,
            period,
        }
    }

    /// Sets the flag and sends the stop line. Only the first request for the
    /// process sends anything; later ones return `false`.
    pub fn request_stop(&self) -> bool {
        // Flag before writer: a command not yet written stays unsent.
        if !self.flag.trigger() {
            return false;
        }

        warn!("Stop requested from {}", self.source.name());
        if let Err(e) = self.writer.write_line(STOP_LINE) {
            error!("Failed to send stop line: {}", e);
        }

        true
    }

    /// Polls the source every period until it fires, the flag is set
    /// elsewhere, or `shutdown` is cancelled.
    pub async fn run(mut self, shutdown: CancellationToken) -> WatchOutcome {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return WatchOutcome::Shutdown,
                _ = self.flag.signaled() => return WatchOutcome::AlreadyCancelled,
                _ = interval.tick() => {
                    if self.source.poll_trigger() {
                        return if self.request_stop() {
                            WatchOutcome::Triggered
                        } else {
                            WatchOutcome::AlreadyCancelled
                        };
                    }
                }
            }
        }
    }
}
