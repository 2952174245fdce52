use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::NodeConfig;
use crate::identity::{NodeIdentity, DEFAULT_BLACKLIST};
use crate::protocol::{
    encode_atmospheric_block, encode_hello, AtmosphericSample, EnergyData, GpsSensor,
    GroundGpsPacket, GroundSensor, MacString, MessageType, ATMOSPHERIC_SAMPLES_PER_NODE,
    GPS_FLAG_LOCATION_VALID, GPS_FLAG_TIME_VALID, KEY,
};
use crate::scheduler::IntervalTimer;
use crate::storage::KeyValueStore;
use crate::transport::{Inbound, MeshTransport};

/// Sensor acquisition seam. Atmospheric samples are buffered continuously
/// by the sampling loop and handed over as the full block; ground/GPS/
/// energy is acquired fresh at request time (the soil probe is powered on
/// demand).
pub trait SensorSource {
    fn latest_atmospheric_samples(&mut self) -> [AtmosphericSample; ATMOSPHERIC_SAMPLES_PER_NODE];
    fn acquire_ground_gps_energy(&mut self) -> GroundGpsPacket;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeStats {
    pub announces_seen: u32,
    pub announces_rejected: u32,
    pub hellos_sent: u32,
    pub atmospheric_requests_served: u32,
    pub ground_requests_served: u32,
    pub address_changes: u32,
}

/// The sensor-node application state machine: gateway discovery over
/// ANNOUNCE, HELLO keepalive, request servicing, and address-collision
/// recovery. One cooperative loop, one message per tick.
pub struct NodeAgent<T, C, G, K>
where
    T: MeshTransport,
    C: Clock,
    G: SensorSource,
    K: KeyValueStore,
{
    identity: NodeIdentity<K>,
    transport: T,
    clock: C,
    sensors: G,
    config: NodeConfig,
    address: u8,
    mac: MacString,
    gateway: Option<u8>,
    hello_timer: IntervalTimer,
    stats: NodeStats,
}

impl<T, C, G, K> NodeAgent<T, C, G, K>
where
    T: MeshTransport,
    C: Clock,
    G: SensorSource,
    K: KeyValueStore,
{
    pub fn new(
        mut identity: NodeIdentity<K>,
        mut transport: T,
        clock: C,
        sensors: G,
        config: NodeConfig,
    ) -> Self {
        let generated = identity.node_address(&DEFAULT_BLACKLIST);
        if generated.exhausted {
            warn!(
                address = generated.address,
                "address space exhausted, running with best-effort address"
            );
        }
        transport.set_local_address(generated.address);

        let mac = identity.mac_string();
        let gateway = identity.load_gateway();
        let hello_timer = IntervalTimer::new(config.hello_interval_ms, clock.now_ms());
        info!(
            address = generated.address,
            mac = %mac,
            gateway = ?gateway,
            "node agent up"
        );

        Self {
            identity,
            transport,
            clock,
            sensors,
            config,
            address: generated.address,
            mac,
            gateway,
            hello_timer,
            stats: NodeStats::default(),
        }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn gateway(&self) -> Option<u8> {
        self.gateway
    }

    pub fn is_registered(&self) -> bool {
        self.gateway.is_some()
    }

    pub fn mac(&self) -> &MacString {
        &self.mac
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn stats(&self) -> &NodeStats {
        &self.stats
    }

    /// Mutable transport access for scripted-transport tests.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// One pass of the node loop: receive at most one message, then the
    /// independent HELLO keepalive timer.
    pub fn tick(&mut self) {
        if let Some(message) = self.transport.recv() {
            self.dispatch(message);
        }

        let now = self.clock.now_ms();
        if self.is_registered() && self.hello_timer.should_fire(now) {
            self.send_hello();
        }
    }

    fn dispatch(&mut self, message: Inbound) {
        if message.tag == MessageType::Announce.wire() {
            self.handle_announce(&message);
            return;
        }

        // Everything else is only honored from the registered gateway.
        let Some(gateway) = self.gateway else {
            debug!(from = message.from, tag = message.tag, "unregistered, ignoring");
            return;
        };
        if message.from != gateway {
            debug!(
                from = message.from,
                tag = message.tag,
                "sender is not our gateway, ignoring"
            );
            return;
        }

        match MessageType::from_wire(message.tag) {
            Ok(MessageType::RequestAtmospheric) => self.serve_atmospheric(),
            Ok(MessageType::RequestGroundGps) => self.serve_ground_gps(),
            Ok(MessageType::AddressError) => self.recover_address(&message.payload),
            Ok(other) => debug!(tag = other.wire(), "tag not relevant for a node"),
            Err(e) => debug!(error = %e, "undecodable tag"),
        }
    }

    fn handle_announce(&mut self, message: &Inbound) {
        self.stats.announces_seen += 1;
        if message.payload.first() != Some(&KEY) {
            // Key mismatch: silently dropped apart from the trace.
            self.stats.announces_rejected += 1;
            debug!(from = message.from, "announce with wrong key dropped");
            return;
        }
        if self.gateway == Some(message.from) {
            debug!(gateway = message.from, "announce from known gateway");
            return;
        }

        self.gateway = Some(message.from);
        self.identity.save_gateway(message.from);
        info!(gateway = message.from, "gateway adopted");
    }

    fn serve_atmospheric(&mut self) {
        let samples = self.sensors.latest_atmospheric_samples();
        let block = encode_atmospheric_block(&samples);
        let Some(gateway) = self.gateway else { return };
        if self
            .transport
            .send(gateway, &block, MessageType::DataAtmospheric)
        {
            self.stats.atmospheric_requests_served += 1;
            debug!(gateway, samples = samples.len(), "atmospheric block sent");
        } else {
            warn!(gateway, "atmospheric reply not acked");
        }
    }

    fn serve_ground_gps(&mut self) {
        let packet = self.sensors.acquire_ground_gps_energy();
        let raw = packet.encode();
        let Some(gateway) = self.gateway else { return };
        if self.transport.send(gateway, &raw, MessageType::DataGroundGps) {
            self.stats.ground_requests_served += 1;
            debug!(gateway, "ground/gps packet sent");
        } else {
            warn!(gateway, "ground/gps reply not acked");
        }
    }

    /// ERROR_ADDRESS handshake: the gateway saw our address claimed by a
    /// different MAC. A non-empty payload is the assigned-address
    /// exclusion set; an empty one means a self-collision, so exclude our
    /// current address plus the reserved values.
    fn recover_address(&mut self, payload: &[u8]) {
        let old = self.address;
        let generated = if payload.is_empty() {
            let blacklist = [self.address, 0x00, 0xFF];
            self.identity.change_address(&blacklist)
        } else {
            self.identity.change_address(payload)
        };
        if generated.exhausted {
            warn!(
                address = generated.address,
                "regeneration exhausted the address space, value may still collide"
            );
        }

        self.address = generated.address;
        self.transport.set_local_address(generated.address);
        self.stats.address_changes += 1;
        info!(old, new = generated.address, "address regenerated after collision");

        self.send_hello();
    }

    fn send_hello(&mut self) {
        let Some(gateway) = self.gateway else { return };
        let payload = encode_hello(&self.mac);
        if self.transport.send(gateway, &payload, MessageType::Hello) {
            self.stats.hellos_sent += 1;
            debug!(gateway, "hello sent");
        } else {
            warn!(gateway, "hello not acked");
        }
    }
}

/// Deterministic sensor feed for the simulator and tests: slow daily
/// temperature/moisture drift, a fixed GPS position per seed, and a
/// battery that sags as the counter grows.
#[derive(Debug)]
pub struct SyntheticSensors {
    seed: u8,
    counter: u32,
}

impl SyntheticSensors {
    pub fn new(seed: u8) -> Self {
        Self { seed, counter: 0 }
    }

    fn hhmm(&self) -> (u8, u8) {
        let minutes = self.counter % (24 * 60);
        ((minutes / 60) as u8, (minutes % 60) as u8)
    }
}

impl SensorSource for SyntheticSensors {
    fn latest_atmospheric_samples(&mut self) -> [AtmosphericSample; ATMOSPHERIC_SAMPLES_PER_NODE] {
        self.counter = self.counter.wrapping_add(1);
        let (hour, minute) = self.hhmm();
        let mut samples = [AtmosphericSample::default(); ATMOSPHERIC_SAMPLES_PER_NODE];
        for (i, sample) in samples.iter_mut().enumerate() {
            let phase = (self.counter.wrapping_add(i as u32) % 80) as u16;
            *sample = AtmosphericSample {
                temp: 180 + i16::from(self.seed % 16) + phase as i16,
                moisture: 400 + phase * 5,
                hour,
                minute,
            };
        }
        samples
    }

    fn acquire_ground_gps_energy(&mut self) -> GroundGpsPacket {
        self.counter = self.counter.wrapping_add(1);
        let (hour, minute) = self.hhmm();
        let drift = (self.counter % 100) as u16;
        GroundGpsPacket {
            ground: GroundSensor {
                temp: 150 + i16::from(self.seed % 8),
                moisture: 520 + drift,
                n: 110 + u16::from(self.seed),
                p: 40 + drift % 20,
                k: 300 + drift,
                ec: 1400 + drift * 3,
                ph: 60 + self.seed % 10,
            },
            gps: GpsSensor {
                latitude: -345_000_000 - i32::from(self.seed) * 1_000,
                longitude: -585_000_000 + i32::from(self.seed) * 1_000,
                altitude: 25,
                hour,
                minute,
                flags: GPS_FLAG_LOCATION_VALID | GPS_FLAG_TIME_VALID,
            },
            energy: EnergyData {
                volt: 1260u16.saturating_sub(drift / 4),
                amp: 45,
            },
        }
    }
}
