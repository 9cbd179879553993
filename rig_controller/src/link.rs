use std::{
    io::BufReader,
    os::fd::{AsRawFd, RawFd},
    time::Duration,
};

use rig_protocol::STOP_LINE;
use serialport::{DataBits, FlowControl, Parity, StopBits, TTYPort};
use tracing::info;
use utilities::line_io::SharedLineWriter;

use crate::config::SerialConfig;

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Failed to open serial port {device}: {source}")]
    Open {
        device: String,
        source: serialport::Error,
    },

    #[error("Failed to duplicate serial port handle: {source}")]
    Clone { source: serialport::Error },

    #[error("Serial I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type PortReader = BufReader<TTYPort>;

/// Serial connection to the device, split into a reading half for the
/// session and a shared writing half for the session and the watcher.
pub struct SerialLink {
    pub reader: PortReader,
    pub writer: SharedLineWriter,
    /// Descriptor of the writing half, for the raw signal handler.
    pub raw_fd: RawFd,
}

impl SerialLink {
    /// Opens the port 8N1 without flow control. Reads block for at most
    /// `read_timeout_ms`.
    pub fn open(config: &SerialConfig) -> Result<Self, LinkError> {
        let port = serialport::new(&config.device, config.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(Duration::from_millis(config.read_timeout_ms))
            .open_native()
            .map_err(|source| LinkError::Open {
                device: config.device.clone(),
                source,
            })?;

        let read_half = port
            .try_clone_native()
            .map_err(|source| LinkError::Clone { source })?;
        let raw_fd = port.as_raw_fd();

        info!("Connected to {} at {} baud", config.device, config.baud_rate);

        Ok(Self {
            reader: BufReader::new(read_half),
            writer: SharedLineWriter::new(port),
            raw_fd,
        })
    }
}

/// Opens the port, sends one stop line and closes it again.
pub fn send_stop(config: &SerialConfig) -> Result<(), LinkError> {
    let link = SerialLink::open(config)?;
    link.writer.write_line(STOP_LINE)?;

    info!("Sent stop to {}", config.device);
    Ok(())
}
