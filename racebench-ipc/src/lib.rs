#![warn(missing_docs)]
//! RaceBench IPC Protocol
//!
//! Typed message protocol between the host and the sandbox that runs candidate
//! code. Messages are rkyv-archived envelopes carried either as length-prefixed
//! frames over a byte stream or by value over an in-memory channel, and routed
//! to handlers by a [`Broker`] on each side.

mod broker;
mod channel;
mod framing;
mod messages;

pub use broker::{Broker, BrokerError, Emitter, HandlerId};
pub use channel::{ChannelError, Endpoint, MemoryOutbound, Outbound, frame_endpoint, memory_pair};
pub use framing::{FrameError, FrameReader, FrameWriter, MAX_FRAME_SIZE, read_frame, write_frame};
pub use messages::{
    CandidateId, CandidateStatus, CompleteEvent, CycleEvent, Direction, Envelope, MessageKind,
    Payload, ProtocolError, RankedResult, RunOptions, RunRequest, SandboxInfo, SuiteReport,
};

/// Protocol version for compatibility checking
pub const PROTOCOL_VERSION: u32 = 1;

/// Interval at which an idle dispatch loop wakes up to check for shutdown
pub const HEARTBEAT_INTERVAL_NS: u64 = 100_000_000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_carries_protocol_version() {
        let envelope = Envelope::ready(4);
        match envelope.payload {
            Payload::Ready(info) => {
                assert_eq!(info.protocol_version, PROTOCOL_VERSION);
                assert_eq!(info.candidate_count, 4);
                assert_eq!(info.pid, std::process::id());
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }
}
