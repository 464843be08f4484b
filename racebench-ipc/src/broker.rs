//! Typed publish/subscribe over an [`Endpoint`].
//!
//! A [`Broker`] is used the same way on both sides of the boundary. Outbound
//! messages go through its [`Emitter`], which can be cloned into whatever needs
//! to send (the orchestrator in the sandbox, the controller on the host).
//! Inbound messages are routed to handlers only from the owner's dispatch loop,
//! so a handler never runs inside the peer's `emit` call.

use crate::channel::{ChannelError, Endpoint, Outbound};
use crate::messages::{Direction, Envelope, MessageKind};
use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use fxhash::FxHashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Handle returned by [`Broker::register`]
pub type HandlerId = u64;

type Handler<C> = Box<dyn FnMut(&mut C, &Envelope) + Send>;

/// Broker failures
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("no channel attached; message dropped")]
    ChannelUnavailable,

    #[error("peer disconnected")]
    Disconnected,

    #[error("channel error: {0}")]
    Channel(ChannelError),
}

impl From<ChannelError> for BrokerError {
    fn from(e: ChannelError) -> Self {
        match e {
            ChannelError::Disconnected => BrokerError::Disconnected,
            other => BrokerError::Channel(other),
        }
    }
}

/// Cloneable outbound half of a broker.
#[derive(Clone, Default)]
pub struct Emitter {
    sink: Arc<Mutex<Option<Box<dyn Outbound>>>>,
}

impl Emitter {
    /// An emitter with no channel; every emit is dropped
    pub fn detached() -> Self {
        Self::default()
    }

    /// Whether a channel is attached
    pub fn is_attached(&self) -> bool {
        self.sink.lock().is_some()
    }

    /// Fire-and-forget send.
    ///
    /// Dropped silently when no channel is attached. A peer that went away
    /// detaches the channel so later emits are dropped too.
    pub fn emit(&self, envelope: Envelope) {
        match self.try_emit(envelope) {
            Ok(()) => {}
            Err(BrokerError::ChannelUnavailable) => {
                tracing::debug!("no channel attached, dropping message");
            }
            Err(e) => tracing::debug!("emit failed: {}", e),
        }
    }

    /// Send, reporting whether the message could be handed to the channel.
    pub fn try_emit(&self, envelope: Envelope) -> Result<(), BrokerError> {
        let mut sink = self.sink.lock();
        let Some(outbound) = sink.as_mut() else {
            return Err(BrokerError::ChannelUnavailable);
        };
        match outbound.deliver(envelope) {
            Ok(()) => Ok(()),
            Err(ChannelError::Disconnected) => {
                *sink = None;
                Err(BrokerError::Disconnected)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn attach(&self, outbound: Box<dyn Outbound>) {
        *self.sink.lock() = Some(outbound);
    }
}

/// Message broker bound to a dispatch context `C`.
pub struct Broker<C> {
    emitter: Emitter,
    inbound: Option<Receiver<Envelope>>,
    accepts: Option<Direction>,
    handlers: FxHashMap<MessageKind, Vec<(HandlerId, Handler<C>)>>,
    next_handler: HandlerId,
}

impl<C> Default for Broker<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Broker<C> {
    /// A broker with no channel yet
    pub fn new() -> Self {
        Self {
            emitter: Emitter::detached(),
            inbound: None,
            accepts: None,
            handlers: FxHashMap::default(),
            next_handler: 0,
        }
    }

    /// A broker bound to `endpoint`
    pub fn connected(endpoint: Endpoint) -> Self {
        let mut broker = Self::new();
        broker.attach(endpoint);
        broker
    }

    /// Only dispatch inbound kinds that travel in `direction`; the rest are
    /// dropped as protocol violations.
    pub fn accepting(mut self, direction: Direction) -> Self {
        self.accepts = Some(direction);
        self
    }

    /// Bind (or rebind) to a channel endpoint
    pub fn attach(&mut self, endpoint: Endpoint) {
        let (outbound, inbound) = endpoint.split();
        self.emitter.attach(outbound);
        self.inbound = Some(inbound);
    }

    /// Whether a channel is attached
    pub fn is_attached(&self) -> bool {
        self.inbound.is_some()
    }

    /// A clone of the outbound half
    pub fn emitter(&self) -> Emitter {
        self.emitter.clone()
    }

    /// Fire-and-forget send
    pub fn emit(&self, envelope: Envelope) {
        self.emitter.emit(envelope);
    }

    /// Send, reporting failure
    pub fn try_emit(&self, envelope: Envelope) -> Result<(), BrokerError> {
        self.emitter.try_emit(envelope)
    }

    /// Subscribe `handler` to inbound messages of `kind`.
    pub fn register<F>(&mut self, kind: MessageKind, handler: F) -> HandlerId
    where
        F: FnMut(&mut C, &Envelope) + Send + 'static,
    {
        let id = self.next_handler;
        self.next_handler += 1;
        self.handlers
            .entry(kind)
            .or_default()
            .push((id, Box::new(handler)));
        id
    }

    /// Remove a handler. Returns false if it was not registered.
    pub fn unregister(&mut self, id: HandlerId) -> bool {
        for handlers in self.handlers.values_mut() {
            if let Some(pos) = handlers.iter().position(|(h, _)| *h == id) {
                handlers.remove(pos);
                return true;
            }
        }
        false
    }

    /// Route one envelope to its handlers. Returns how many were invoked.
    ///
    /// Malformed envelopes are logged and dropped.
    pub fn dispatch(&mut self, ctx: &mut C, envelope: &Envelope) -> usize {
        let kind = match envelope.validate() {
            Ok(kind) => kind,
            Err(e) => {
                tracing::warn!("dropping inbound message: {}", e);
                return 0;
            }
        };
        if let Some(accepts) = self.accepts {
            if kind.direction() != accepts {
                tracing::warn!("dropping inbound {}: wrong direction for this side", kind);
                return 0;
            }
        }
        let Some(handlers) = self.handlers.get_mut(&kind) else {
            tracing::debug!("no handler for {}", kind);
            return 0;
        };
        for (_, handler) in handlers.iter_mut() {
            handler(ctx, envelope);
        }
        handlers.len()
    }

    /// Dispatch everything already queued. Returns the number of messages
    /// taken from the channel.
    pub fn dispatch_pending(&mut self, ctx: &mut C) -> Result<usize, BrokerError> {
        let mut taken = 0;
        loop {
            let next = match self.inbound.as_ref() {
                Some(inbound) => inbound.try_recv(),
                None => return Err(BrokerError::ChannelUnavailable),
            };
            match next {
                Ok(envelope) => {
                    self.dispatch(ctx, &envelope);
                    taken += 1;
                }
                Err(TryRecvError::Empty) => return Ok(taken),
                Err(TryRecvError::Disconnected) => {
                    if taken > 0 {
                        return Ok(taken);
                    }
                    return Err(BrokerError::Disconnected);
                }
            }
        }
    }

    /// Wait for one message and dispatch it.
    ///
    /// `None` waits indefinitely. Returns `Ok(None)` on timeout, otherwise the
    /// number of handlers invoked.
    pub fn dispatch_next(
        &mut self,
        ctx: &mut C,
        timeout: Option<Duration>,
    ) -> Result<Option<usize>, BrokerError> {
        let inbound = self.inbound.as_ref().ok_or(BrokerError::ChannelUnavailable)?;
        let envelope = match timeout {
            Some(timeout) => match inbound.recv_timeout(timeout) {
                Ok(envelope) => envelope,
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => return Err(BrokerError::Disconnected),
            },
            None => inbound.recv().map_err(|_| BrokerError::Disconnected)?,
        };
        Ok(Some(self.dispatch(ctx, &envelope)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::memory_pair;
    use crate::messages::Payload;

    #[derive(Default)]
    struct Log {
        seen: Vec<String>,
    }

    #[test]
    fn test_emit_without_channel_is_dropped() {
        let broker: Broker<Log> = Broker::new();
        broker.emit(Envelope::run(None));
        assert!(matches!(
            broker.try_emit(Envelope::run(None)),
            Err(BrokerError::ChannelUnavailable)
        ));
    }

    #[test]
    fn test_handlers_run_in_registration_order() {
        let (host, sandbox) = memory_pair();
        let host: Broker<Log> = Broker::connected(host);
        let mut sandbox: Broker<Log> = Broker::connected(sandbox);

        sandbox.register(MessageKind::Run, |log, _| log.seen.push("first".into()));
        sandbox.register(MessageKind::Run, |log, _| log.seen.push("second".into()));
        sandbox.register(MessageKind::Stop, |log, _| log.seen.push("stop".into()));

        host.emit(Envelope::run(None));
        host.emit(Envelope::stop());

        let mut log = Log::default();
        // Nothing runs until the receiver dispatches
        assert!(log.seen.is_empty());
        assert_eq!(sandbox.dispatch_pending(&mut log).unwrap(), 2);
        assert_eq!(log.seen, vec!["first", "second", "stop"]);
    }

    #[test]
    fn test_wrong_direction_is_dropped() {
        let (host, sandbox) = memory_pair();
        let host: Broker<Log> = Broker::connected(host);
        let mut sandbox: Broker<Log> =
            Broker::connected(sandbox).accepting(Direction::ToSandbox);
        sandbox.register(MessageKind::Ready, |log, _| log.seen.push("ready".into()));
        sandbox.register(MessageKind::Run, |log, _| log.seen.push("run".into()));

        // Well-formed, but only the sandbox sends ready
        host.emit(Envelope::ready(2));
        host.emit(Envelope::run(None));

        let mut log = Log::default();
        assert_eq!(sandbox.dispatch_pending(&mut log).unwrap(), 2);
        assert_eq!(log.seen, vec!["run"]);
    }

    #[test]
    fn test_unregister() {
        let (host, sandbox) = memory_pair();
        let host: Broker<Log> = Broker::connected(host);
        let mut sandbox: Broker<Log> = Broker::connected(sandbox);

        let id = sandbox.register(MessageKind::Run, |log, _| log.seen.push("run".into()));
        assert!(sandbox.unregister(id));
        assert!(!sandbox.unregister(id));

        host.emit(Envelope::run(None));
        let mut log = Log::default();
        assert_eq!(
            sandbox.dispatch_next(&mut log, Some(Duration::from_secs(1))).unwrap(),
            Some(0)
        );
        assert!(log.seen.is_empty());
    }

    #[test]
    fn test_unknown_kind_is_dropped() {
        let (host, sandbox) = memory_pair();
        let host: Broker<Log> = Broker::connected(host);
        let mut sandbox: Broker<Log> = Broker::connected(sandbox);
        sandbox.register(MessageKind::Run, |log, _| log.seen.push("run".into()));

        host.emit(Envelope {
            kind: "launch".to_string(),
            correlation_id: None,
            payload: Payload::Empty,
        });
        host.emit(Envelope {
            kind: "run".to_string(),
            correlation_id: None,
            payload: Payload::Empty,
        });

        let mut log = Log::default();
        assert_eq!(sandbox.dispatch_pending(&mut log).unwrap(), 2);
        assert!(log.seen.is_empty());
    }

    #[test]
    fn test_dispatch_next_times_out() {
        let (_host, sandbox) = memory_pair();
        let mut sandbox: Broker<Log> = Broker::connected(sandbox);
        let mut log = Log::default();
        let got = sandbox
            .dispatch_next(&mut log, Some(Duration::from_millis(10)))
            .unwrap();
        assert!(got.is_none());
    }

    #[test]
    fn test_disconnected_peer() {
        let (host, sandbox) = memory_pair();
        let mut sandbox: Broker<Log> = Broker::connected(sandbox);
        drop(host);
        let mut log = Log::default();
        assert!(matches!(
            sandbox.dispatch_pending(&mut log),
            Err(BrokerError::Disconnected)
        ));
        assert!(matches!(
            sandbox.try_emit(Envelope::ready(0)),
            Err(BrokerError::Disconnected)
        ));
        assert!(!sandbox.emitter().is_attached());
    }
}
