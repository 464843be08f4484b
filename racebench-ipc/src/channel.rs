//! Message channels between host and sandbox.
//!
//! An [`Endpoint`] is one side of a bidirectional, ordered message channel:
//! an outbound sink plus an inbound queue. The same endpoint type backs both
//! the in-memory pair used by thread sandboxes and tests, and framed byte
//! streams used across a process boundary.

use crate::framing::{FrameError, FrameReader, FrameWriter};
use crate::messages::Envelope;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, unbounded};
use std::io::{Read, Write};
use std::time::Duration;
use thiserror::Error;

/// Channel failures
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("peer disconnected")]
    Disconnected,

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
}

/// Sink for outbound envelopes.
pub trait Outbound: Send {
    /// Hand one envelope to the peer. Order of delivery is order of calls.
    fn deliver(&mut self, envelope: Envelope) -> Result<(), ChannelError>;
}

/// In-memory sink feeding the peer's inbound queue
pub struct MemoryOutbound {
    tx: Sender<Envelope>,
}

impl Outbound for MemoryOutbound {
    fn deliver(&mut self, envelope: Envelope) -> Result<(), ChannelError> {
        self.tx
            .send(envelope)
            .map_err(|_| ChannelError::Disconnected)
    }
}

impl<W: Write + Send> Outbound for FrameWriter<W> {
    fn deliver(&mut self, envelope: Envelope) -> Result<(), ChannelError> {
        match self.send(&envelope) {
            Ok(()) => Ok(()),
            Err(FrameError::Io(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                Err(ChannelError::Disconnected)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// One side of a message channel
pub struct Endpoint {
    outbound: Box<dyn Outbound>,
    inbound: Receiver<Envelope>,
}

impl Endpoint {
    /// Assemble an endpoint from its halves
    pub fn new(outbound: Box<dyn Outbound>, inbound: Receiver<Envelope>) -> Self {
        Self { outbound, inbound }
    }

    /// Send one envelope to the peer
    pub fn send(&mut self, envelope: Envelope) -> Result<(), ChannelError> {
        self.outbound.deliver(envelope)
    }

    /// Take the next inbound envelope without blocking
    pub fn try_recv(&self) -> Result<Option<Envelope>, ChannelError> {
        match self.inbound.try_recv() {
            Ok(envelope) => Ok(Some(envelope)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(ChannelError::Disconnected),
        }
    }

    /// Wait up to `timeout` for the next inbound envelope
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<Envelope>, ChannelError> {
        match self.inbound.recv_timeout(timeout) {
            Ok(envelope) => Ok(Some(envelope)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(ChannelError::Disconnected),
        }
    }

    /// Split into sink and inbound queue
    pub fn split(self) -> (Box<dyn Outbound>, Receiver<Envelope>) {
        (self.outbound, self.inbound)
    }
}

/// Two connected in-memory endpoints.
pub fn memory_pair() -> (Endpoint, Endpoint) {
    let (a_tx, a_rx) = unbounded();
    let (b_tx, b_rx) = unbounded();
    (
        Endpoint::new(Box::new(MemoryOutbound { tx: b_tx }), a_rx),
        Endpoint::new(Box::new(MemoryOutbound { tx: a_tx }), b_rx),
    )
}

/// Endpoint over a pair of byte streams.
///
/// A background thread decodes frames from `reader` into the inbound queue.
/// Malformed frames are skipped; the queue disconnects at end of stream or on
/// an unrecoverable read error.
pub fn frame_endpoint<R, W>(reader: R, writer: W) -> std::io::Result<Endpoint>
where
    R: Read + Send + 'static,
    W: Write + Send + 'static,
{
    let (tx, rx) = unbounded();
    std::thread::Builder::new()
        .name("racebench-ipc-reader".to_string())
        .spawn(move || {
            let mut frames = FrameReader::new(reader);
            loop {
                match frames.next_envelope() {
                    Ok(Some(envelope)) => {
                        if tx.send(envelope).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::debug!("inbound stream closed: {}", e);
                        break;
                    }
                }
            }
        })?;
    Ok(Endpoint::new(Box::new(FrameWriter::new(writer)), rx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_memory_pair_is_bidirectional() {
        let (mut host, mut sandbox) = memory_pair();
        host.send(Envelope::run(None)).unwrap();
        sandbox.send(Envelope::ready(3)).unwrap();

        let got = sandbox.recv_timeout(Duration::from_secs(1)).unwrap().unwrap();
        assert_eq!(got.kind, "run");
        let got = host.try_recv().unwrap().unwrap();
        assert_eq!(got.kind, "ready");
        assert!(host.try_recv().unwrap().is_none());
    }

    #[test]
    fn test_dropped_peer_disconnects() {
        let (mut host, sandbox) = memory_pair();
        drop(sandbox);
        assert!(matches!(
            host.send(Envelope::stop()),
            Err(ChannelError::Disconnected)
        ));
        assert!(matches!(host.try_recv(), Err(ChannelError::Disconnected)));
    }

    #[test]
    fn test_frame_endpoint_reads_stream() {
        let mut bytes = Vec::new();
        {
            let mut writer = FrameWriter::new(&mut bytes);
            writer.send(&Envelope::ready(1)).unwrap();
            writer.send(&Envelope::shutdown()).unwrap();
        }

        let endpoint = frame_endpoint(Cursor::new(bytes), std::io::sink()).unwrap();
        let first = endpoint.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
        let second = endpoint.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
        assert_eq!(first.kind, "ready");
        assert_eq!(second.kind, "shutdown");
        assert!(matches!(
            endpoint.recv_timeout(Duration::from_secs(5)),
            Err(ChannelError::Disconnected)
        ));
    }
}
