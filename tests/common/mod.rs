#![allow(dead_code)]

use std::collections::VecDeque;

use agrimesh::protocol::{MessageType, PayloadBuf};
use agrimesh::transport::{Inbound, MeshTransport};

/// One scripted reply-window entry: a delivered reply, or silence that
/// makes the bounded wait expire.
#[derive(Debug, Clone)]
pub enum ReplyEvent {
    Timeout,
    Message(Inbound),
}

#[derive(Debug, Clone)]
pub struct SentMessage {
    pub to: u8,
    pub tag: u8,
    pub payload: Vec<u8>,
}

/// Deterministic transport double. Inbound traffic is split the way the
/// device sees it: `inbox` feeds the non-blocking `recv` poll (messages
/// already waiting when the loop drains), `replies` feeds `recv_timeout`
/// (what arrives inside a response window). Outbound traffic is recorded.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    address: u8,
    inbox: VecDeque<Inbound>,
    replies: VecDeque<ReplyEvent>,
    pub sent: Vec<SentMessage>,
}

fn inbound(from: u8, tag: u8, payload: &[u8]) -> Inbound {
    let mut buf = PayloadBuf::new();
    buf.extend_from_slice(payload).unwrap();
    Inbound {
        from,
        tag,
        payload: buf,
    }
}

impl ScriptedTransport {
    pub fn new(address: u8) -> Self {
        Self {
            address,
            inbox: VecDeque::new(),
            replies: VecDeque::new(),
            sent: Vec::new(),
        }
    }

    /// Queues a message for the drain-phase `recv` poll.
    pub fn push_inbox(&mut self, from: u8, tag: MessageType, payload: &[u8]) {
        self.inbox.push_back(inbound(from, tag.wire(), payload));
    }

    /// Queues a message with a raw tag byte, for unknown-tag handling.
    pub fn push_inbox_raw(&mut self, from: u8, tag: u8, payload: &[u8]) {
        self.inbox.push_back(inbound(from, tag, payload));
    }

    /// Queues a reply delivered inside a response window.
    pub fn push_reply(&mut self, from: u8, tag: MessageType, payload: &[u8]) {
        self.replies
            .push_back(ReplyEvent::Message(inbound(from, tag.wire(), payload)));
    }

    /// Queues one silent response window (a timeout).
    pub fn push_timeout(&mut self) {
        self.replies.push_back(ReplyEvent::Timeout);
    }

    pub fn sent_with_tag(&self, tag: MessageType) -> Vec<&SentMessage> {
        self.sent.iter().filter(|m| m.tag == tag.wire()).collect()
    }
}

impl MeshTransport for ScriptedTransport {
    fn send(&mut self, to: u8, payload: &[u8], tag: MessageType) -> bool {
        self.sent.push(SentMessage {
            to,
            tag: tag.wire(),
            payload: payload.to_vec(),
        });
        true
    }

    fn recv(&mut self) -> Option<Inbound> {
        self.inbox.pop_front()
    }

    fn recv_timeout(&mut self, _timeout_ms: u64) -> Option<Inbound> {
        match self.replies.pop_front() {
            Some(ReplyEvent::Message(message)) => Some(message),
            Some(ReplyEvent::Timeout) | None => None,
        }
    }

    fn local_address(&self) -> u8 {
        self.address
    }

    fn set_local_address(&mut self, address: u8) {
        self.address = address;
    }
}
