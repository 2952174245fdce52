mod common;

use agrimesh::clock::ManualClock;
use agrimesh::config::NodeConfig;
use agrimesh::identity::{NodeIdentity, GATEWAY_ADDR_KEY};
use agrimesh::node::{NodeAgent, SyntheticSensors};
use agrimesh::protocol::{
    decode_hello, GroundGpsPacket, MessageType, ATMOSPHERIC_BLOCK_LEN, GROUND_GPS_PACKET_LEN, KEY,
};
use agrimesh::storage::{KeyValueStore, MemoryStore};
use agrimesh::transport::MeshTransport;

use common::ScriptedTransport;

const NODE_MAC: [u8; 6] = [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF];
const GATEWAY: u8 = 0x01;

type TestAgent = NodeAgent<ScriptedTransport, ManualClock, SyntheticSensors, MemoryStore>;

fn agent_with_store(store: MemoryStore) -> (TestAgent, ManualClock) {
    let clock = ManualClock::new();
    let agent = NodeAgent::new(
        NodeIdentity::new(NODE_MAC, store),
        ScriptedTransport::new(0),
        clock.clone(),
        SyntheticSensors::new(1),
        NodeConfig::default(),
    );
    (agent, clock)
}

fn agent() -> (TestAgent, ManualClock) {
    agent_with_store(MemoryStore::new())
}

fn registered_agent() -> (TestAgent, ManualClock) {
    let (mut agent, clock) = agent();
    agent
        .transport_mut()
        .push_inbox(GATEWAY, MessageType::Announce, &[KEY]);
    agent.tick();
    assert_eq!(agent.gateway(), Some(GATEWAY));
    (agent, clock)
}

#[test]
fn derives_address_from_mac_and_binds_transport() {
    let (agent, _) = agent();
    // CRC-8 of AA:BB:CC:DD:EE:FF.
    assert_eq!(agent.address(), 0x2E);
    assert!(!agent.is_registered());
    assert_eq!(agent.mac().as_str(), "AA:BB:CC:DD:EE:FF");
}

#[test]
fn adopts_gateway_from_valid_announce() {
    let (mut agent, _) = agent();
    agent
        .transport_mut()
        .push_inbox(GATEWAY, MessageType::Announce, &[KEY]);
    agent.tick();

    assert!(agent.is_registered());
    assert_eq!(agent.gateway(), Some(GATEWAY));
    assert_eq!(agent.stats().announces_seen, 1);
}

#[test]
fn announce_with_wrong_key_is_silently_dropped() {
    let (mut agent, _) = agent();
    agent
        .transport_mut()
        .push_inbox(GATEWAY, MessageType::Announce, &[0x42]);
    agent.tick();

    assert!(!agent.is_registered());
    assert_eq!(agent.stats().announces_rejected, 1);
    assert!(agent.transport_mut().sent.is_empty());
}

#[test]
fn announce_from_new_sender_switches_gateway() {
    let (mut agent, _) = registered_agent();
    agent
        .transport_mut()
        .push_inbox(0x02, MessageType::Announce, &[KEY]);
    agent.tick();
    assert_eq!(agent.gateway(), Some(0x02));
}

#[test]
fn persisted_gateway_survives_restart() {
    let mut store = MemoryStore::new();
    store.save_byte(GATEWAY_ADDR_KEY, 0x05).unwrap();
    let (agent, _) = agent_with_store(store);
    assert!(agent.is_registered());
    assert_eq!(agent.gateway(), Some(0x05));
}

#[test]
fn requests_are_ignored_until_registered() {
    let (mut agent, _) = agent();
    agent
        .transport_mut()
        .push_inbox(GATEWAY, MessageType::RequestAtmospheric, &[KEY]);
    agent.tick();
    assert!(agent.transport_mut().sent.is_empty());
}

#[test]
fn requests_from_non_gateway_sender_are_ignored() {
    let (mut agent, _) = registered_agent();
    agent
        .transport_mut()
        .push_inbox(0x77, MessageType::RequestAtmospheric, &[KEY]);
    agent.tick();
    assert!(agent
        .transport_mut()
        .sent_with_tag(MessageType::DataAtmospheric)
        .is_empty());
}

#[test]
fn serves_atmospheric_request_with_full_block() {
    let (mut agent, _) = registered_agent();
    agent
        .transport_mut()
        .push_inbox(GATEWAY, MessageType::RequestAtmospheric, &[KEY]);
    agent.tick();

    let replies = agent
        .transport_mut()
        .sent_with_tag(MessageType::DataAtmospheric)
        .into_iter()
        .cloned()
        .collect::<Vec<_>>();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].to, GATEWAY);
    assert_eq!(replies[0].payload.len(), ATMOSPHERIC_BLOCK_LEN);
    assert_eq!(agent.stats().atmospheric_requests_served, 1);
}

#[test]
fn serves_ground_request_with_fresh_packet() {
    let (mut agent, _) = registered_agent();
    agent
        .transport_mut()
        .push_inbox(GATEWAY, MessageType::RequestGroundGps, &[KEY]);
    agent.tick();

    let replies = agent
        .transport_mut()
        .sent_with_tag(MessageType::DataGroundGps)
        .into_iter()
        .cloned()
        .collect::<Vec<_>>();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].payload.len(), GROUND_GPS_PACKET_LEN);

    let packet = GroundGpsPacket::decode(&replies[0].payload).unwrap();
    assert!(packet.gps.location_valid());
    assert!(packet.ground.moisture >= 520);
    assert_eq!(agent.stats().ground_requests_served, 1);
}

#[test]
fn scenario_e_error_address_regenerates_and_resends_hello() {
    let (mut agent, _) = registered_agent();
    let old = agent.address();

    agent
        .transport_mut()
        .push_inbox(GATEWAY, MessageType::AddressError, &[old, 0x20]);
    agent.tick();

    let new = agent.address();
    assert_ne!(new, old);
    assert_ne!(new, 0x20);
    assert_ne!(new, 0xFF);
    assert_eq!(agent.transport_mut().local_address(), new);
    assert_eq!(agent.stats().address_changes, 1);

    // The follow-up HELLO carries the unchanged MAC.
    let hellos = agent
        .transport_mut()
        .sent_with_tag(MessageType::Hello)
        .into_iter()
        .cloned()
        .collect::<Vec<_>>();
    assert_eq!(hellos.len(), 1);
    assert_eq!(hellos[0].to, GATEWAY);
    assert_eq!(
        decode_hello(&hellos[0].payload).unwrap().as_str(),
        "AA:BB:CC:DD:EE:FF"
    );
}

#[test]
fn empty_error_payload_assumes_self_collision() {
    let (mut agent, _) = registered_agent();
    let old = agent.address();

    agent
        .transport_mut()
        .push_inbox(GATEWAY, MessageType::AddressError, &[]);
    agent.tick();

    assert_ne!(agent.address(), old);
    assert_ne!(agent.address(), 0x00);
    assert_ne!(agent.address(), 0xFF);
    assert_eq!(
        agent
            .transport_mut()
            .sent_with_tag(MessageType::Hello)
            .len(),
        1
    );
}

#[test]
fn error_address_from_non_gateway_is_ignored() {
    let (mut agent, _) = registered_agent();
    let old = agent.address();
    agent
        .transport_mut()
        .push_inbox(0x66, MessageType::AddressError, &[old]);
    agent.tick();
    assert_eq!(agent.address(), old);
    assert_eq!(agent.stats().address_changes, 0);
}

#[test]
fn hello_keepalive_fires_on_interval_when_registered() {
    let (mut agent, clock) = registered_agent();
    assert!(agent
        .transport_mut()
        .sent_with_tag(MessageType::Hello)
        .is_empty());

    clock.set(60_000);
    agent.tick();
    assert_eq!(
        agent
            .transport_mut()
            .sent_with_tag(MessageType::Hello)
            .len(),
        1
    );
    assert_eq!(agent.stats().hellos_sent, 1);

    // Next interval, next keepalive.
    clock.set(120_000);
    agent.tick();
    assert_eq!(
        agent
            .transport_mut()
            .sent_with_tag(MessageType::Hello)
            .len(),
        2
    );
}

#[test]
fn no_keepalive_while_unregistered() {
    let (mut agent, clock) = agent();
    clock.set(600_000);
    agent.tick();
    assert!(agent.transport_mut().sent.is_empty());
}

#[test]
fn unknown_tag_from_gateway_is_ignored() {
    let (mut agent, _) = registered_agent();
    agent.transport_mut().push_inbox_raw(GATEWAY, 0x5A, &[1, 2, 3]);
    agent.tick();
    assert!(agent
        .transport_mut()
        .sent_with_tag(MessageType::DataAtmospheric)
        .is_empty());
    assert_eq!(agent.stats().address_changes, 0);
}
