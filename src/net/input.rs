//! Lock-free inbound command buffer
//!
//! Connection handlers run on the async side; the tick loop must never wait
//! on them. Commands cross over through a bounded crossbeam channel and are
//! drained in one batch before each tick, so a command submitted mid-tick
//! applies on the next one. The command payload is
//! generic: the core routes by viewer, gameplay defines the contents.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::game::entity::EntityId;

/// One buffered command from a connection handler
#[derive(Debug, Clone)]
pub struct CommandMessage<T> {
    /// Camera entity of the viewer that sent it
    pub viewer: EntityId,
    pub command: T,
}

/// Bounded MPSC buffer between connection handlers and the tick loop
pub struct InputBuffer<T> {
    sender: Sender<CommandMessage<T>>,
    receiver: Receiver<CommandMessage<T>>,
    capacity: usize,
}

impl<T: Send> InputBuffer<T> {
    /// Capacity should cover the worst-case burst between two ticks
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);
        Self {
            sender,
            receiver,
            capacity,
        }
    }

    /// New sender handle; each connection holds its own clone
    pub fn sender(&self) -> InputSender<T> {
        InputSender {
            sender: self.sender.clone(),
        }
    }

    /// Non-blocking submit. Returns false when the buffer is full.
    #[inline]
    pub fn try_submit(&self, viewer: EntityId, command: T) -> bool {
        self.sender
            .try_send(CommandMessage { viewer, command })
            .is_ok()
    }

    /// Drains every pending command, in arrival order
    pub fn drain(&self) -> Vec<CommandMessage<T>> {
        self.receiver.try_iter().collect()
    }

    #[inline]
    pub fn pending_count(&self) -> usize {
        self.receiver.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T: Send> Default for InputBuffer<T> {
    fn default() -> Self {
        // Covers a hundred clients submitting every client frame between
        // two 25 Hz ticks
        Self::new(1024)
    }
}

/// Clonable sender handle for connection handlers
#[derive(Clone)]
pub struct InputSender<T> {
    sender: Sender<CommandMessage<T>>,
}

impl<T: Send> InputSender<T> {
    /// Non-blocking submit with a distinguishable failure cause
    #[inline]
    pub fn try_send(&self, viewer: EntityId, command: T) -> Result<(), InputBufferError> {
        self.sender
            .try_send(CommandMessage { viewer, command })
            .map_err(|e| match e {
                TrySendError::Full(_) => InputBufferError::Full,
                TrySendError::Disconnected(_) => InputBufferError::Disconnected,
            })
    }
}

/// Submission failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InputBufferError {
    #[error("input buffer full")]
    Full,
    #[error("tick loop stopped")]
    Disconnected,
}
