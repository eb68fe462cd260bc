//! # EX Bus RX
//!
//! Decode a Jeti EX Bus receiver stream on a host serial port.
//!
//! The receiver is bus master: it sends channel frames and polls for
//! telemetry. This application answers those polls, keeps the channel
//! store current and holds channels at the failsafe value when the link
//! goes quiet.

use anyhow::Result;
use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

use exbus_rx::config::Config;
use exbus_rx::exbus::device::ExBusDevice;
use exbus_rx::exbus::protocol::EXBUS_RX_BUFFER_LEN;
use exbus_rx::serial::{run_telemetry_writer, ChannelSink, ExBusSerial};
use exbus_rx::status::LinkStatus;

/// Configuration file used when no path is given
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Telemetry replies queued ahead of the serial writer
const TELEMETRY_QUEUE_DEPTH: usize = 8;

/// Supervisor tick period for a given rate
fn tick_period(tick_rate_hz: u32) -> Duration {
    Duration::from_micros(1_000_000 / tick_rate_hz.max(1) as u64)
}

/// Main entry point for EX Bus RX
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Set up non-blocking logging
///    - Load configuration (first argument, or `config/default.toml`)
///    - Open the receiver serial port and start the telemetry writer
///
/// 2. **Main Loop**
///    - Feed received bytes to the decoder
///    - Tick the failsafe supervisor at the configured rate
///    - Log a JSON link status line every status interval
///    - Handle Ctrl+C for graceful shutdown
///
/// # Errors
///
/// Returns error if the serial port cannot be opened or the configuration
/// is invalid
///
/// # Examples
///
/// ```bash
/// RUST_LOG=exbus_rx=debug cargo run --release -- config/default.toml
/// ```
#[tokio::main]
async fn main() -> Result<()> {
    let (log_writer, _log_guard) = tracing_appender::non_blocking(std::io::stdout());
    tracing_subscriber::fmt()
        .with_writer(log_writer)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into())
        )
        .init();

    info!("EX Bus RX v{} starting...", env!("CARGO_PKG_VERSION"));

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    let config = match Config::load(&config_path) {
        Ok(config) => {
            info!("Loaded configuration from {}", config_path);
            config
        }
        Err(e) if std::path::Path::new(&config_path).exists() => return Err(e.into()),
        Err(e) => {
            warn!("No configuration at {} ({}), using defaults", config_path, e);
            Config::default()
        }
    };

    let serial = ExBusSerial::open_with_paths(&[config.serial.port.as_str()], config.serial.baud_rate)?;
    info!("EX Bus serial port opened at: {}", serial.device_path());
    let (mut reader, writer) = serial.into_split();

    let (tx, rx) = mpsc::channel::<Bytes>(TELEMETRY_QUEUE_DEPTH);
    let writer_task = tokio::spawn(run_telemetry_writer(writer, rx));
    let mut sink = ChannelSink::new(tx);

    let settings = config.device_settings();
    info!(
        "Supervisor at {}Hz: stall after {} ticks, failsafe after {} ticks",
        config.supervisor.tick_rate_hz,
        settings.thresholds.stall_ticks,
        settings.thresholds.failsafe_ticks
    );
    if settings.telemetry.is_none() {
        info!("Telemetry replies disabled");
    }

    let mut device = ExBusDevice::new(settings);
    let handle = device.handle();

    let mut tick_interval = interval(tick_period(config.supervisor.tick_rate_hz));
    tick_interval.set_missed_tick_behavior(MissedTickBehavior::Burst);

    let mut status_interval = interval(Duration::from_millis(config.status.interval_ms.max(1)));
    status_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_status = LinkStatus::capture(&handle);

    let mut buf = [0u8; EXBUS_RX_BUFFER_LEN];
    let mut headroom = EXBUS_RX_BUFFER_LEN;

    info!("Press Ctrl+C to exit");

    loop {
        tokio::select! {
            read = reader.read(&mut buf[..headroom.max(1)]) => {
                match read {
                    Ok(0) => {
                        warn!("EX Bus serial port closed");
                        break;
                    }
                    Ok(n) => {
                        let status = device.receive(&buf[..n], &mut sink);
                        headroom = status.headroom;
                        if status.wake {
                            debug!("Channels updated: ch1={:?}", handle.read(0));
                        }
                    }
                    Err(e) => {
                        warn!("Serial read failed: {}", e);
                        break;
                    }
                }
            }

            _ = tick_interval.tick() => {
                device.tick();
            }

            _ = status_interval.tick(), if config.status.enabled => {
                let status = LinkStatus::capture(&handle);
                match status.to_json_line() {
                    Ok(line) => info!(
                        frames = status.frames_since(&last_status),
                        "link status {}", line
                    ),
                    Err(e) => debug!("Failed to serialize link status: {}", e),
                }
                last_status = status;
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    info!(
        "Frames received: {} good, {} bad",
        handle.success_count(),
        handle.error_count()
    );

    drop(sink);
    match writer_task.await {
        Ok(written) => info!("Telemetry replies sent: {}", written),
        Err(e) => warn!("Telemetry writer task failed: {}", e),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use exbus_rx::exbus::supervisor::DEFAULT_TICK_RATE_HZ;

    #[test]
    fn test_default_tick_period() {
        // 625Hz is a 1.6ms period
        assert_eq!(tick_period(DEFAULT_TICK_RATE_HZ), Duration::from_micros(1600));
    }

    #[test]
    fn test_tick_period_zero_rate() {
        assert_eq!(tick_period(0), Duration::from_secs(1));
    }

    #[test]
    fn test_queue_depth_constant() {
        assert!(TELEMETRY_QUEUE_DEPTH > 0);
    }

    #[test]
    fn test_default_config_path() {
        assert!(DEFAULT_CONFIG_PATH.ends_with(".toml"));
    }
}
