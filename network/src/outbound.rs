//! Outbound message staging.
//!
//! The core enqueues serialized messages per destination; the socket layer
//! (outside the core) drains and transmits. Bounded so a stalled socket
//! cannot pin unbounded memory.

use lattice_messages::Message;
use lattice_types::params::NetworkConstants;
use std::collections::VecDeque;
use std::net::SocketAddrV6;
use std::sync::Mutex;

pub struct OutboundQueue {
    constants: NetworkConstants,
    max_entries: usize,
    queue: Mutex<VecDeque<(SocketAddrV6, Vec<u8>)>>,
}

impl OutboundQueue {
    pub fn new(constants: NetworkConstants, max_entries: usize) -> Self {
        Self {
            constants,
            max_entries,
            queue: Mutex::new(VecDeque::new()),
        }
    }

    /// Serialize and stage a message. The oldest entry is dropped when the
    /// queue is full.
    pub fn send(&self, endpoint: SocketAddrV6, message: &Message) {
        let bytes = message.serialize(&self.constants);
        let mut queue = self.queue.lock().unwrap();
        if queue.len() >= self.max_entries {
            queue.pop_front();
        }
        queue.push_back((endpoint, bytes));
    }

    pub fn send_to_many(&self, endpoints: &[SocketAddrV6], message: &Message) {
        let bytes = message.serialize(&self.constants);
        let mut queue = self.queue.lock().unwrap();
        for endpoint in endpoints {
            if queue.len() >= self.max_entries {
                queue.pop_front();
            }
            queue.push_back((*endpoint, bytes.clone()));
        }
    }

    /// Take up to `count` staged datagrams for transmission.
    pub fn drain(&self, count: usize) -> Vec<(SocketAddrV6, Vec<u8>)> {
        let mut queue = self.queue.lock().unwrap();
        let take = queue.len().min(count);
        queue.drain(..take).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_messages::{Keepalive, Message};
    use lattice_types::{Network, NetworkParams};
    use std::net::Ipv6Addr;

    fn queue(max: usize) -> OutboundQueue {
        OutboundQueue::new(NetworkParams::new(Network::Test).network, max)
    }

    fn endpoint(port: u16) -> SocketAddrV6 {
        SocketAddrV6::new(Ipv6Addr::LOCALHOST, port, 0, 0)
    }

    #[test]
    fn staged_messages_drain_in_order() {
        let queue = queue(8);
        queue.send(endpoint(1), &Message::Keepalive(Keepalive::default()));
        queue.send(endpoint(2), &Message::Keepalive(Keepalive::default()));
        let drained = queue.drain(10);
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].0, endpoint(1));
        assert_eq!(drained[1].0, endpoint(2));
        assert!(queue.is_empty());
    }

    #[test]
    fn overflow_drops_oldest() {
        let queue = queue(2);
        for port in 1..=3 {
            queue.send(endpoint(port), &Message::Keepalive(Keepalive::default()));
        }
        let drained = queue.drain(10);
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].0, endpoint(2));
    }
}
