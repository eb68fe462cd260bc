//! Trait abstraction for the outbound telemetry path to enable testing

use bytes::Bytes;
use std::io;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Non-blocking "send buffer" primitive used by the telemetry responder
///
/// Implementations must never block or await. No delivery confirmation is
/// expected; an error means the frame was dropped.
#[cfg_attr(test, mockall::automock)]
pub trait TelemetrySink {
    /// Queue a complete frame for transmission
    ///
    /// # Returns
    ///
    /// * `io::Result<usize>` - Bytes accepted, or `WouldBlock` when the
    ///   output is full
    fn send_nonblocking(&mut self, frame: &[u8]) -> io::Result<usize>;
}

/// Sink that hands frames to a writer task over a bounded channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Bytes>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self { tx }
    }
}

impl TelemetrySink for ChannelSink {
    fn send_nonblocking(&mut self, frame: &[u8]) -> io::Result<usize> {
        match self.tx.try_send(Bytes::copy_from_slice(frame)) {
            Ok(()) => Ok(frame.len()),
            Err(TrySendError::Full(_)) => Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                "telemetry output queue full",
            )),
            Err(TrySendError::Closed(_)) => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "telemetry writer stopped",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_sink_forwards_frame() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut sink = ChannelSink::new(tx);

        assert_eq!(sink.send_nonblocking(&[0x3B, 0x01, 0x02]).unwrap(), 3);
        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(&[0x3B, 0x01, 0x02]));
    }

    #[test]
    fn test_channel_sink_full_would_block() {
        let (tx, _rx) = mpsc::channel(1);
        let mut sink = ChannelSink::new(tx);

        assert!(sink.send_nonblocking(&[0x01]).is_ok());
        let err = sink.send_nonblocking(&[0x02]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn test_channel_sink_closed() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let mut sink = ChannelSink::new(tx);

        let err = sink.send_nonblocking(&[0x01]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}
