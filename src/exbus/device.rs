//! # EX Bus Device
//!
//! Owns all mutable receiver state and exposes the three entry points:
//!
//! - [`ExBusDevice::receive`]: byte source callback
//! - [`ExBusDevice::tick`]: fixed-rate supervisor callback
//! - [`ExBusHandle::read`]: flight-control channel accessor
//!
//! `receive` and `tick` take `&mut self`, so the host serialises them by
//! owning the device in a single task. State that the flight-control side
//! reads lives behind an `Arc` allocated once in [`ExBusDevice::new`]:
//! per-channel atomics, the diagnostic counters and the failsafe flag.
//!
//! A handle can only be obtained from a constructed device, so there is no
//! uninitialised-device case to check at runtime.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;

use tracing::{debug, trace};

use super::channels::{ChannelStore, EXBUS_FAILSAFE_VALUE};
use super::decoder::{DecodeOutcome, DecoderState, FrameDecoder};
use super::protocol::{BlockId, FrameView, EXBUS_MAX_CHANNELS};
use super::supervisor::{Supervisor, SupervisorThresholds};
use super::telemetry::{TelemetryParams, TelemetryResponder};
use crate::serial::TelemetrySink;

/// Construction parameters for a device
#[derive(Debug, Clone, Default)]
pub struct DeviceSettings {
    pub thresholds: SupervisorThresholds,
    /// `None` disables telemetry replies
    pub telemetry: Option<TelemetryParams>,
}

/// Result of one receive callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxStatus {
    /// Bytes consumed; always the whole input
    pub consumed: usize,
    /// Free receive buffer space, for backpressure
    pub headroom: usize,
    /// A channel update arrived; wake the consumer
    ///
    /// Only channel frames raise this. Telemetry requests and unknown
    /// blocks never wake the consumer, even with the failsafe timer at 0.
    pub wake: bool,
}

#[derive(Debug, Default)]
struct SharedState {
    channels: ChannelStore,
    error_count: AtomicU32,
    success_count: AtomicU32,
    failsafe: AtomicBool,
    telemetry_value: AtomicI32,
}

/// Read side of a device, shared with the flight-control task
#[derive(Debug, Clone)]
pub struct ExBusHandle {
    shared: Arc<SharedState>,
}

impl ExBusHandle {
    /// Read one channel
    ///
    /// # Arguments
    ///
    /// * `channel` - Channel index, 0-based
    ///
    /// # Returns
    ///
    /// * `Option<u16>` - Current value, or `None` for an invalid index
    ///
    /// # Examples
    ///
    /// ```
    /// use exbus_rx::exbus::device::{DeviceSettings, ExBusDevice};
    ///
    /// let device = ExBusDevice::new(DeviceSettings::default());
    /// let handle = device.handle();
    ///
    /// assert_eq!(handle.read(0), Some(0));
    /// assert_eq!(handle.read(24), None);
    /// ```
    pub fn read(&self, channel: usize) -> Option<u16> {
        self.shared.channels.get(channel)
    }

    /// Copy all channel slots
    pub fn channels(&self) -> [u16; EXBUS_MAX_CHANNELS] {
        self.shared.channels.snapshot()
    }

    /// Frames rejected by CRC
    pub fn error_count(&self) -> u32 {
        self.shared.error_count.load(Ordering::Relaxed)
    }

    /// Frames accepted by CRC
    pub fn success_count(&self) -> u32 {
        self.shared.success_count.load(Ordering::Relaxed)
    }

    /// Whether channels are currently held at the failsafe value
    pub fn is_failsafe(&self) -> bool {
        self.shared.failsafe.load(Ordering::Acquire)
    }

    /// Publish the reading reported in telemetry value records
    pub fn publish_telemetry_value(&self, value: i32) {
        self.shared.telemetry_value.store(value, Ordering::Relaxed);
    }
}

/// EX Bus receiver device context
#[derive(Debug)]
pub struct ExBusDevice {
    decoder: FrameDecoder,
    supervisor: Supervisor,
    responder: Option<TelemetryResponder>,
    shared: Arc<SharedState>,
}

impl ExBusDevice {
    /// Create a device with all channels at the failsafe value
    pub fn new(settings: DeviceSettings) -> Self {
        Self {
            decoder: FrameDecoder::new(),
            supervisor: Supervisor::new(settings.thresholds),
            responder: settings.telemetry.map(TelemetryResponder::new),
            shared: Arc::new(SharedState::default()),
        }
    }

    /// Accessor for the flight-control task
    pub fn handle(&self) -> ExBusHandle {
        ExBusHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn state(&self) -> DecoderState {
        self.decoder.state()
    }

    pub fn rx_buffer_pos(&self) -> usize {
        self.decoder.rx_buffer_pos()
    }

    pub fn rx_timer(&self) -> u32 {
        self.supervisor.rx_timer()
    }

    pub fn failsafe_timer(&self) -> u32 {
        self.supervisor.failsafe_timer()
    }

    /// Telemetry requests answered so far
    pub fn telemetry_count(&self) -> u32 {
        self.responder.as_ref().map_or(0, |r| r.request_count())
    }

    /// Byte source callback
    ///
    /// Consumes every byte. CRC-valid frames are dispatched as they
    /// complete: channel frames update the store, telemetry requests are
    /// answered through `sink`.
    ///
    /// # Arguments
    ///
    /// * `bytes` - Bytes received since the last call (may be empty)
    /// * `sink` - Non-blocking output for telemetry replies
    pub fn receive<S>(&mut self, bytes: &[u8], sink: &mut S) -> RxStatus
    where
        S: TelemetrySink + ?Sized,
    {
        self.supervisor.bytes_received();
        let mut wake = false;

        for &byte in bytes {
            match self.decoder.push(byte) {
                DecodeOutcome::Pending => {}
                DecodeOutcome::CrcMismatch => {
                    self.shared.error_count.fetch_add(1, Ordering::Relaxed);
                    debug!("EX Bus frame rejected: CRC mismatch");
                }
                DecodeOutcome::Frame(frame) => {
                    self.shared.success_count.fetch_add(1, Ordering::Relaxed);
                    wake |= dispatch_frame(
                        frame,
                        &self.shared,
                        &mut self.supervisor,
                        self.responder.as_mut(),
                        sink,
                    );
                }
            }
        }

        RxStatus {
            consumed: bytes.len(),
            headroom: self.decoder.headroom(),
            wake,
        }
    }

    /// Supervisor tick callback
    pub fn tick(&mut self) {
        let actions = self.supervisor.tick();

        if actions.abandon_frame && self.decoder.abandon_frame() {
            trace!("EX Bus receive stalled, dropping partial frame");
        }

        if actions.force_failsafe {
            self.shared.channels.fill(EXBUS_FAILSAFE_VALUE);
        }
        self.shared
            .failsafe
            .store(self.supervisor.is_failsafe(), Ordering::Release);
    }
}

/// Interpret a CRC-valid frame, returning whether channels were updated
fn dispatch_frame<S>(
    frame: &[u8],
    shared: &SharedState,
    supervisor: &mut Supervisor,
    responder: Option<&mut TelemetryResponder>,
    sink: &mut S,
) -> bool
where
    S: TelemetrySink + ?Sized,
{
    let view = match FrameView::new(frame) {
        Ok(view) => view,
        Err(e) => {
            debug!("Ignoring EX Bus frame: {}", e);
            return false;
        }
    };

    match view.block_id() {
        BlockId::Channels => {
            let count = shared.channels.update_from_payload(view.block_payload());
            supervisor.channels_received();
            shared
                .failsafe
                .store(supervisor.is_failsafe(), Ordering::Release);
            trace!("Decoded {} EX Bus channels", count);
            true
        }
        BlockId::Telemetry => {
            if let Some(responder) = responder {
                let value = shared.telemetry_value.load(Ordering::Relaxed);
                responder.respond(view.packet_id(), value, sink);
            }
            false
        }
        BlockId::Unknown(id) => {
            trace!("Ignoring EX Bus data block 0x{:02X}", id);
            false
        }
    }
}
