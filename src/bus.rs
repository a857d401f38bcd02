//! Control-message bus.
//!
//! The host posts out-of-band messages (levels, errors, element notifications)
//! on a [`MessageBus`]; a [`BusDispatcher`] owned by a dedicated thread offers
//! each one to a [`FilterChain`]. Messages no stage claims are forwarded back
//! to the bus owner.
//!
//! ```text
//! host ──post──► [cmd channel] ──► BusDispatcher ──► chain.handle_message
//!                                        │ unclaimed
//! bus owner ◄──drain_unhandled── [fwd channel]
//! ```

use crate::chain::FilterChain;
use crate::message::ControlMessage;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::time::Duration;

/// Commands sent to the dispatcher.
#[derive(Debug, Clone)]
pub enum BusCommand {
    /// A message to dispatch.
    Message(ControlMessage),
    /// Stop the dispatcher loop.
    Shutdown,
}

/// Channel capacity for inbound messages.
const BUS_CHANNEL_CAPACITY: usize = 1024;
/// Channel capacity for forwarded (unclaimed) messages.
const FORWARD_CHANNEL_CAPACITY: usize = 1024;

/// Counters returned by the dispatcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub claimed: u64,
    pub forwarded: u64,
    pub dropped: u64,
}

/// Posting side of the bus.
pub struct MessageBus {
    cmd_tx: Sender<BusCommand>,
    forward_rx: Receiver<ControlMessage>,
}

impl MessageBus {
    /// Create a bus and its dispatcher end.
    pub fn new() -> (Self, BusDispatcher) {
        let (cmd_tx, cmd_rx) = bounded(BUS_CHANNEL_CAPACITY);
        let (forward_tx, forward_rx) = bounded(FORWARD_CHANNEL_CAPACITY);
        (
            Self { cmd_tx, forward_rx },
            BusDispatcher { cmd_rx, forward_tx },
        )
    }

    /// Post a message. Returns false once the dispatcher is gone.
    pub fn post(&self, message: ControlMessage) -> bool {
        self.cmd_tx.send(BusCommand::Message(message)).is_ok()
    }

    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(BusCommand::Shutdown);
    }

    /// Drain all forwarded messages.
    pub fn drain_unhandled(&self) -> Vec<ControlMessage> {
        let mut msgs = Vec::new();
        while let Ok(msg) = self.forward_rx.try_recv() {
            msgs.push(msg);
        }
        msgs
    }

    /// Wait up to `timeout` for one forwarded message.
    pub fn recv_unhandled_timeout(&self, timeout: Duration) -> Option<ControlMessage> {
        self.forward_rx.recv_timeout(timeout).ok()
    }
}

/// Dispatching side of the bus.
pub struct BusDispatcher {
    cmd_rx: Receiver<BusCommand>,
    forward_tx: Sender<ControlMessage>,
}

impl BusDispatcher {
    /// Dispatch until `Shutdown` arrives or every bus handle is dropped.
    pub fn run(&self, target: &dyn FilterChain) -> DispatchStats {
        let mut stats = DispatchStats::default();
        tracing::debug!("Bus dispatcher started");
        loop {
            match self.cmd_rx.recv_timeout(Duration::from_millis(100)) {
                Ok(BusCommand::Message(msg)) => self.dispatch(target, msg, &mut stats),
                Ok(BusCommand::Shutdown) => break,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        tracing::debug!(
            "Bus dispatcher stopped ({} claimed, {} forwarded)",
            stats.claimed,
            stats.forwarded
        );
        stats
    }

    /// Dispatch whatever is queued right now, without blocking.
    ///
    /// A `Shutdown` command stops the drain early.
    pub fn dispatch_pending(&self, target: &dyn FilterChain) -> DispatchStats {
        let mut stats = DispatchStats::default();
        while let Ok(cmd) = self.cmd_rx.try_recv() {
            match cmd {
                BusCommand::Message(msg) => self.dispatch(target, msg, &mut stats),
                BusCommand::Shutdown => break,
            }
        }
        stats
    }

    fn dispatch(&self, target: &dyn FilterChain, msg: ControlMessage, stats: &mut DispatchStats) {
        if target.handle_message(&msg) {
            stats.claimed += 1;
            return;
        }
        match self.forward_tx.try_send(msg) {
            Ok(()) => stats.forwarded += 1,
            Err(TrySendError::Full(msg)) => {
                tracing::warn!("Forward queue full, dropping '{}' message", msg.kind);
                stats.dropped += 1;
            }
            Err(TrySendError::Disconnected(_)) => stats.dropped += 1,
        }
    }
}
