//! Non-blocking per-client packet handoff
//!
//! Compiled packets leave the tick loop through a bounded channel per
//! client; the transport side drains it at its own pace. A full channel
//! means the client is not keeping up, and the packet is dropped rather
//! than stalling the simulation. Dropped deltas are recovered by a view
//! reset, never by blocking.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::warn;

use crate::game::entity::EntityId;

/// Tick-loop side of one client's outbound queue
pub struct PacketOutbox {
    viewer: EntityId,
    sender: Sender<Vec<u8>>,
    dropped: u64,
}

/// Transport side: drained by the connection writer task
pub struct PacketDrain {
    receiver: Receiver<Vec<u8>>,
}

/// Creates a bounded outbox pair for one viewer
pub fn channel(viewer: EntityId, capacity: usize) -> (PacketOutbox, PacketDrain) {
    let (sender, receiver) = bounded(capacity);
    (
        PacketOutbox {
            viewer,
            sender,
            dropped: 0,
        },
        PacketDrain { receiver },
    )
}

impl PacketOutbox {
    /// Hands a packet to the transport without blocking. Packets to a
    /// backed-up client are dropped; a send never stalls the tick.
    pub fn push(&mut self, packet: Vec<u8>) -> bool {
        match self.sender.try_send(packet) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                if self.dropped.is_power_of_two() {
                    warn!(
                        viewer = self.viewer,
                        dropped = self.dropped,
                        "client not draining packets, dropping"
                    );
                }
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl PacketDrain {
    /// Next packet, if one is waiting
    pub fn try_recv(&self) -> Option<Vec<u8>> {
        self.receiver.try_recv().ok()
    }

    /// Blocking receive for dedicated writer tasks
    pub fn recv(&self) -> Option<Vec<u8>> {
        self.receiver.recv().ok()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_drain() {
        let (mut outbox, drain) = channel(0, 4);
        assert!(outbox.push(vec![1, 2, 3]));
        assert!(outbox.push(vec![4]));

        assert_eq!(drain.try_recv(), Some(vec![1, 2, 3]));
        assert_eq!(drain.try_recv(), Some(vec![4]));
        assert_eq!(drain.try_recv(), None);
    }

    #[test]
    fn test_full_outbox_drops_instead_of_blocking() {
        let (mut outbox, drain) = channel(0, 1);
        assert!(outbox.push(vec![1]));
        assert!(!outbox.push(vec![2]));
        assert_eq!(outbox.dropped(), 1);

        // Oldest packet is kept, the new one was dropped
        assert_eq!(drain.try_recv(), Some(vec![1]));
        assert!(drain.is_empty());
    }
}
