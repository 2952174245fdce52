use core::fmt::Write as _;

use tracing::warn;

use crate::protocol::MacString;
use crate::storage::KeyValueStore;

/// Persisted record keys. Each holds a single byte with 255 = unset.
pub const NODE_ID_KEY: &str = "node_id";
pub const GATEWAY_ADDR_KEY: &str = "gateway_address";

/// Sentinel shared by both persisted records.
pub const ADDRESS_UNSET: u8 = 0xFF;

/// Addresses no node may ever claim: 0 is reserved, 255 is broadcast.
pub const DEFAULT_BLACKLIST: [u8; 2] = [0x00, 0xFF];

const MAX_HASH_ATTEMPTS: u8 = 255;

/// CRC-8, polynomial 0x07, no reflection, init 0x00. Deterministic over
/// the 6 raw MAC bytes; the low byte is the node's first address candidate.
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc: u8 = 0x00;
    for &byte in data {
        crc ^= byte;
        for _ in 0..8 {
            if crc & 0x80 != 0 {
                crc = (crc << 1) ^ 0x07;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// Outcome of address generation. `exhausted` is set when 255 increments
/// failed to escape the blacklist; the address is then best-effort and may
/// still collide. Non-fatal by design.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneratedAddress {
    pub address: u8,
    pub exhausted: bool,
}

/// Stable node identity derived from the 6-byte hardware MAC, with the
/// address and learned gateway optionally persisted through a
/// `KeyValueStore`.
#[derive(Debug)]
pub struct NodeIdentity<K: KeyValueStore> {
    mac: [u8; 6],
    store: K,
}

impl<K: KeyValueStore> NodeIdentity<K> {
    pub fn new(mac: [u8; 6], store: K) -> Self {
        Self { mac, store }
    }

    pub fn mac_bytes(&self) -> [u8; 6] {
        self.mac
    }

    /// MAC formatted `XX:XX:XX:XX:XX:XX`, the exact string carried by
    /// HELLO payloads.
    pub fn mac_string(&self) -> MacString {
        let mut out = MacString::new();
        for (i, byte) in self.mac.iter().enumerate() {
            if i > 0 {
                let _ = out.try_push(':');
            }
            let _ = write!(out, "{:02X}", byte);
        }
        out
    }

    /// Pure address generation: CRC-8 of the MAC, then increment modulo
    /// 256 while the candidate is blacklisted or equals 255, bounded by
    /// 255 attempts.
    pub fn generate_address(&self, blacklist: &[u8]) -> GeneratedAddress {
        let mut address = crc8(&self.mac);
        let mut attempts: u8 = 0;
        let mut conflict = true;

        while conflict && attempts < MAX_HASH_ATTEMPTS {
            conflict = false;
            if blacklist.contains(&address) || address == ADDRESS_UNSET {
                address = address.wrapping_add(1);
                conflict = true;
                attempts += 1;
            }
        }

        let exhausted = attempts >= MAX_HASH_ATTEMPTS;
        if exhausted {
            warn!(
                address,
                "no free address after {} attempts, keeping best-effort value", MAX_HASH_ATTEMPTS
            );
        }
        GeneratedAddress { address, exhausted }
    }

    /// Returns the node's address, preferring the persisted value and only
    /// deriving (and saving) a fresh one on first boot. Storage failures
    /// degrade to an ephemeral regenerated address.
    pub fn node_address(&mut self, blacklist: &[u8]) -> GeneratedAddress {
        match self.store.load_byte(NODE_ID_KEY) {
            Ok(Some(stored)) if stored != ADDRESS_UNSET && stored != 0 => {
                return GeneratedAddress {
                    address: stored,
                    exhausted: false,
                }
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "node id load failed, regenerating from MAC"),
        }

        let generated = self.generate_address(blacklist);
        if let Err(e) = self.store.save_byte(NODE_ID_KEY, generated.address) {
            warn!(error = %e, "node id save failed, address is ephemeral");
        }
        generated
    }

    /// Regenerates the address after an ERROR_ADDRESS handshake. The
    /// result is a pure function of MAC + blacklist: callers must include
    /// every previously rejected value or regeneration can be a no-op.
    pub fn change_address(&mut self, blacklist: &[u8]) -> GeneratedAddress {
        let generated = self.generate_address(blacklist);
        if let Err(e) = self.store.save_byte(NODE_ID_KEY, generated.address) {
            warn!(error = %e, "address save failed, new address is ephemeral");
        }
        generated
    }

    /// Reads the persisted gateway address. `None` means no gateway known
    /// yet, whether because nothing was stored or the store is unreadable.
    pub fn load_gateway(&self) -> Option<u8> {
        match self.store.load_byte(GATEWAY_ADDR_KEY) {
            Ok(Some(value)) if value != ADDRESS_UNSET => Some(value),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "gateway address load failed, treating as unset");
                None
            }
        }
    }

    pub fn save_gateway(&mut self, address: u8) {
        if let Err(e) = self.store.save_byte(GATEWAY_ADDR_KEY, address) {
            warn!(error = %e, "gateway address save failed, continuing unpersisted");
        }
    }
}
