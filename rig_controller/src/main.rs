use std::{path::PathBuf, time::Duration};

use anyhow::Context as _;
use clap::Parser;
use rig_controller::{
    config::{
        ConfigOptions, RigConfig, WatcherSource, create_default_config, init_config_with_options,
    },
    link::{SerialLink, send_stop},
    logging,
    observe::{ObservePlan, run_moves, run_observe},
    rotating_log::{FsLogStore, LogNaming, RotatingLogger},
    session::{GearRatio, SerialSession, SessionError},
    signal_stop::install_raw_stop_handler,
    watcher::{CancellationWatcher, ConsoleSource, CtrlCSource},
};
use rig_protocol::MotorAxis;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use utilities::cancel::CancelFlag;

#[derive(Parser, Debug)]
#[command(version, about = "Drives the two-axis stepper rig over its serial link")]
struct Args {
    /// Pulse delay in microseconds
    #[arg(short = 't', long = "time")]
    step_delay_us: Option<u32>,

    /// Elevation change in degrees
    #[arg(short = 'e', long = "degree-e", allow_negative_numbers = true, default_value_t = 0.0)]
    degree_e: f64,

    /// Azimuth change in degrees
    #[arg(short = 'a', long = "degree-a", allow_negative_numbers = true, default_value_t = 0.0)]
    degree_a: f64,

    /// Report every N pulses
    #[arg(short = 'r', long = "report")]
    report: Option<u32>,

    /// Rotate the position log at this size in bytes
    #[arg(short = 'm', long = "max-size")]
    max_size: Option<u64>,

    /// Serial device
    #[arg(short = 's', long = "serial")]
    serial: Option<String>,

    /// Send the stop line and exit
    #[arg(short = 'c', long = "stop")]
    stop: bool,

    /// Run the observation sweep until stopped
    #[arg(short = 'o', long = "observe")]
    observe: bool,

    /// How the operator stops a running command
    #[arg(long, value_enum)]
    watcher: Option<WatcherSource>,

    /// Configuration file
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Args {
    fn apply(&self, config: &mut RigConfig) {
        if let Some(step_delay_us) = self.step_delay_us {
            config.motion.step_delay_us = step_delay_us;
        }
        if let Some(report) = self.report {
            config.motion.report_interval = report;
        }
        if let Some(max_size) = self.max_size {
            config.log.max_size_bytes = max_size;
        }
        if let Some(serial) = &self.serial {
            config.serial.device = serial.clone();
        }
        if let Some(watcher) = self.watcher {
            config.watcher.source = watcher;
        }
    }
}

fn should_create_config() -> bool {
    std::env::var("CREATE_CONFIG")
        .map(|val| val == "1" || val.to_lowercase() == "true")
        .unwrap_or(false)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if should_create_config() {
        create_default_config(args.config.as_ref())?;
    }

    let options = args
        .config
        .as_ref()
        .map(ConfigOptions::with_path)
        .unwrap_or_default();
    let (_config_manager, mut config) = init_config_with_options(options).map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        eprintln!("Run with CREATE_CONFIG=1 to create a default configuration file.");
        e
    })?;
    args.apply(&mut config);
    config.validate()?;

    let _log_guard = logging::init(&config.logging)?;

    if args.stop {
        send_stop(&config.serial)?;
        return Ok(());
    }

    let link = SerialLink::open(&config.serial)?;
    // Held until exit so the raw handler's descriptor stays open.
    let writer = link.writer.clone();
    let cancel = CancelFlag::new();
    let shutdown = CancellationToken::new();
    let period = config.watcher.poll_period();

    let mut raw_handler = None;
    let watcher = match config.watcher.source {
        WatcherSource::RawSignal => {
            raw_handler = Some(
                install_raw_stop_handler(link.raw_fd).context("Failed to install SIGINT handler")?,
            );
            info!("Ctrl+C sends the stop line and exits");
            None
        }
        WatcherSource::Console => {
            let source = ConsoleSource::stdin().context("Failed to watch the console")?;
            info!("Press Enter to stop");
            let watcher = CancellationWatcher::new(source, cancel.clone(), writer.clone(), period);
            Some(tokio::spawn(watcher.run(shutdown.clone())))
        }
        WatcherSource::CtrlC => {
            info!("Press Ctrl+C to stop");
            let watcher =
                CancellationWatcher::new(CtrlCSource::install(), cancel.clone(), writer.clone(), period);
            Some(tokio::spawn(watcher.run(shutdown.clone())))
        }
    };

    let store = FsLogStore::new(&config.log.directory).with_context(|| {
        format!(
            "Failed to open log directory {}",
            config.log.directory.display()
        )
    })?;
    let mut logger = RotatingLogger::new(
        store,
        LogNaming::new(config.log.base_name.clone()),
        config.log.rotation_threshold(),
    );
    let (index, offset) = logger.open_session()?;
    info!(
        "Logging to {} (index {}), resuming at az={} el={}",
        logger.active_file(),
        index,
        offset.azimuth,
        offset.elevation
    );

    let mut session = SerialSession::new(
        link.reader,
        link.writer,
        cancel.clone(),
        logger,
        GearRatio::from(&config.gear),
    )
    .with_drain_timeout(Duration::from_millis(config.session.drain_timeout_ms));

    let motion = config.motion.clone();
    let observe = args.observe;
    let moves = [
        (MotorAxis::Azimuth, args.degree_a),
        (MotorAxis::Elevation, args.degree_e),
    ];

    let result = tokio::task::spawn_blocking(move || -> Result<(), SessionError> {
        if observe {
            run_observe(&mut session, ObservePlan::default(), &motion, None)?;
        } else {
            run_moves(&mut session, moves, &motion)?;
        }
        Ok(())
    })
    .await
    .context("Session task failed")?;

    shutdown.cancel();
    if let Some(watcher) = watcher {
        match watcher.await {
            Ok(outcome) => debug!("Watcher finished: {:?}", outcome),
            Err(e) => warn!("Watcher task failed: {}", e),
        }
    }
    if let Some(id) = raw_handler {
        signal_hook::low_level::unregister(id);
    }
    drop(writer);

    result?;
    Ok(())
}
