use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::protocol::{MessageType, PayloadBuf, BROADCAST_ADDRESS};

/// One received radio message. The tag arrives as a raw byte; receivers
/// validate it against the expected `MessageType` and the payload length
/// against the structurally expected size.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub from: u8,
    pub tag: u8,
    pub payload: PayloadBuf,
}

/// The radio mesh driver seam. `send` reports the link-level ack; `recv`
/// is a non-blocking poll and `recv_timeout` a bounded blocking wait.
/// Each device has at most one outstanding exchange at a time, so the
/// blocking wait never starves other protocol work.
///
/// `set_local_address` exists for collision recovery: after regenerating
/// its address a node must rebind the radio's source address before the
/// follow-up HELLO.
pub trait MeshTransport {
    fn send(&mut self, to: u8, payload: &[u8], tag: MessageType) -> bool;
    fn recv(&mut self) -> Option<Inbound>;
    fn recv_timeout(&mut self, timeout_ms: u64) -> Option<Inbound>;
    fn local_address(&self) -> u8;
    fn set_local_address(&mut self, address: u8);
}

const HUB_POLL_INTERVAL_MS: u64 = 2;

#[derive(Debug, Default)]
struct HubInner {
    /// Which devices currently listen on each address. Duplicate
    /// addresses are representable on purpose: that is the collision the
    /// protocol has to resolve.
    routes: HashMap<u8, Vec<usize>>,
    /// Per-device receive FIFOs; a rebind keeps the FIFO, like a radio
    /// whose address filter changed.
    queues: Vec<VecDeque<Inbound>>,
}

/// In-memory radio mesh used by the simulator and the integration tests.
/// Unicast "acks" exactly when at least one device listens on the
/// destination address.
#[derive(Debug, Clone, Default)]
pub struct MeshHub {
    inner: Arc<Mutex<HubInner>>,
}

impl MeshHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Joins the mesh at `address` and returns the endpoint handle.
    pub fn endpoint(&self, address: u8) -> HubEndpoint {
        let mut inner = self.inner.lock().unwrap();
        inner.queues.push(VecDeque::new());
        let device = inner.queues.len() - 1;
        inner.routes.entry(address).or_default().push(device);
        HubEndpoint {
            inner: Arc::clone(&self.inner),
            device,
            address,
        }
    }
}

#[derive(Debug)]
pub struct HubEndpoint {
    inner: Arc<Mutex<HubInner>>,
    device: usize,
    address: u8,
}

impl MeshTransport for HubEndpoint {
    fn send(&mut self, to: u8, payload: &[u8], tag: MessageType) -> bool {
        let mut buf = PayloadBuf::new();
        if buf.extend_from_slice(payload).is_err() {
            return false;
        }
        let message = Inbound {
            from: self.address,
            tag: tag.wire(),
            payload: buf,
        };

        let mut inner = self.inner.lock().unwrap();
        if to == BROADCAST_ADDRESS {
            let sender = self.device;
            for (device, queue) in inner.queues.iter_mut().enumerate() {
                if device != sender {
                    queue.push_back(message.clone());
                }
            }
            return true;
        }

        let listeners = match inner.routes.get(&to) {
            Some(listeners) if !listeners.is_empty() => listeners.clone(),
            _ => return false,
        };
        for device in listeners {
            inner.queues[device].push_back(message.clone());
        }
        true
    }

    fn recv(&mut self) -> Option<Inbound> {
        let mut inner = self.inner.lock().unwrap();
        inner.queues[self.device].pop_front()
    }

    fn recv_timeout(&mut self, timeout_ms: u64) -> Option<Inbound> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            if let Some(message) = self.recv() {
                return Some(message);
            }
            if Instant::now() >= deadline {
                return None;
            }
            std::thread::sleep(Duration::from_millis(HUB_POLL_INTERVAL_MS));
        }
    }

    fn local_address(&self) -> u8 {
        self.address
    }

    fn set_local_address(&mut self, address: u8) {
        if address == self.address {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        if let Some(listeners) = inner.routes.get_mut(&self.address) {
            listeners.retain(|&device| device != self.device);
        }
        inner.routes.entry(address).or_default().push(self.device);
        drop(inner);
        self.address = address;
    }
}
