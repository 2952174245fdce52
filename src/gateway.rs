use heapless::Vec;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::GatewayConfig;
use crate::protocol::{
    decode_atmospheric_block, decode_hello, encode_address_list, AtmosphericSample,
    GroundGpsPacket, MacString, MessageType, PayloadBuf, ATMOSPHERIC_BLOCK_LEN,
    ATMOSPHERIC_SAMPLES_PER_NODE, BROADCAST_ADDRESS, GROUND_GPS_PACKET_LEN,
    GROUND_SAMPLES_PER_NODE, KEY,
};
use crate::scheduler::{IntervalTimer, TriggerStrategy};
use crate::sink::{AtmosphericReading, GroundReading, TelemetrySink};
use crate::transport::MeshTransport;

const ADDRESS_SPACE: usize = 256;

/// One registered node: the 1-byte mesh address and the MAC that claimed
/// it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeRecord {
    pub address: u8,
    pub mac: MacString,
}

/// What `register` decided about an incoming HELLO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationOutcome {
    /// Registry was empty; inserted unconditionally.
    FirstNode,
    /// Address unseen; inserted.
    NewNode,
    /// Same address, same MAC; nothing to do.
    AlreadyRegistered,
    /// Same address, different MAC. The existing entry stays; the
    /// newcomer must regenerate its own address.
    Collision,
}

/// Flat arena over the whole 1-byte address space. Indexing by address
/// makes the uniqueness invariant structural: one slot, one MAC.
/// Nodes are never evicted; a silent node is simply polled and missed.
#[derive(Debug)]
pub struct NodeRegistry {
    slots: [Option<MacString>; ADDRESS_SPACE],
    count: usize,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            slots: [None; ADDRESS_SPACE],
            count: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn mac_for(&self, address: u8) -> Option<&MacString> {
        self.slots[address as usize].as_ref()
    }

    /// Registered addresses in ascending order, the poll cycle order.
    pub fn addresses(&self) -> impl Iterator<Item = u8> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|_| i as u8))
    }

    pub fn records(&self) -> impl Iterator<Item = NodeRecord> + '_ {
        self.slots.iter().enumerate().filter_map(|(i, slot)| {
            slot.map(|mac| NodeRecord {
                address: i as u8,
                mac,
            })
        })
    }

    pub fn register(&mut self, address: u8, mac: &MacString) -> RegistrationOutcome {
        if self.count == 0 {
            self.slots[address as usize] = Some(*mac);
            self.count = 1;
            return RegistrationOutcome::FirstNode;
        }
        match &self.slots[address as usize] {
            None => {
                self.slots[address as usize] = Some(*mac);
                self.count += 1;
                RegistrationOutcome::NewNode
            }
            Some(existing) if existing == mac => RegistrationOutcome::AlreadyRegistered,
            Some(_) => RegistrationOutcome::Collision,
        }
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Last accepted atmospheric block per node. Whole-array replacement on
/// every accepted reply: a snapshot, not an append log.
#[derive(Debug)]
pub struct AtmosphericCache {
    slots: [Option<[AtmosphericSample; ATMOSPHERIC_SAMPLES_PER_NODE]>; ADDRESS_SPACE],
}

impl AtmosphericCache {
    pub fn new() -> Self {
        Self {
            slots: [None; ADDRESS_SPACE],
        }
    }

    pub fn replace(
        &mut self,
        address: u8,
        samples: [AtmosphericSample; ATMOSPHERIC_SAMPLES_PER_NODE],
    ) {
        self.slots[address as usize] = Some(samples);
    }

    pub fn get(&self, address: u8) -> Option<&[AtmosphericSample; ATMOSPHERIC_SAMPLES_PER_NODE]> {
        self.slots[address as usize].as_ref()
    }
}

impl Default for AtmosphericCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Ground/GPS packet history per node, written at a single cursor shared
/// across every address. When the cursor would pass the end it resets to
/// zero and the incoming sample is dropped rather than wrapped.
#[derive(Debug)]
pub struct GroundCache {
    slots: [[Option<GroundGpsPacket>; GROUND_SAMPLES_PER_NODE]; ADDRESS_SPACE],
    cursor: usize,
}

impl GroundCache {
    pub fn new() -> Self {
        Self {
            slots: [[None; GROUND_SAMPLES_PER_NODE]; ADDRESS_SPACE],
            cursor: 0,
        }
    }

    /// Returns false when the sample was dropped by the cursor reset.
    pub fn store(&mut self, address: u8, packet: GroundGpsPacket) -> bool {
        if self.cursor < GROUND_SAMPLES_PER_NODE {
            self.slots[address as usize][self.cursor] = Some(packet);
            self.cursor += 1;
            true
        } else {
            self.cursor = 0;
            false
        }
    }

    pub fn get(&self, address: u8) -> &[Option<GroundGpsPacket>; GROUND_SAMPLES_PER_NODE] {
        &self.slots[address as usize]
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }
}

impl Default for GroundCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Which data category a poll cycle requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollKind {
    Atmospheric,
    GroundGps,
}

impl PollKind {
    fn request_tag(self) -> MessageType {
        match self {
            PollKind::Atmospheric => MessageType::RequestAtmospheric,
            PollKind::GroundGps => MessageType::RequestGroundGps,
        }
    }

    fn response_tag(self) -> MessageType {
        match self {
            PollKind::Atmospheric => MessageType::DataAtmospheric,
            PollKind::GroundGps => MessageType::DataGroundGps,
        }
    }

    fn expected_len(self) -> usize {
        match self {
            PollKind::Atmospheric => ATMOSPHERIC_BLOCK_LEN,
            PollKind::GroundGps => GROUND_GPS_PACKET_LEN,
        }
    }

    fn retry_delay_ms(self, config: &GatewayConfig) -> u64 {
        match self {
            PollKind::Atmospheric => config.atmospheric_retry_delay_ms,
            PollKind::GroundGps => config.ground_retry_delay_ms,
        }
    }

    fn label(self) -> &'static str {
        match self {
            PollKind::Atmospheric => "atmospheric",
            PollKind::GroundGps => "ground/gps",
        }
    }
}

/// Explicit request/response/retry machine for a single node and data
/// category, driven by the injected clock rather than wall time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Sent,
    AwaitingResponse,
    Retry,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Reply accepted: right tag, right sender, exact payload length.
    Accepted(PayloadBuf),
    /// Every attempt timed out or was rejected; the node is skipped until
    /// the next cycle with no registry mutation.
    Exhausted,
}

#[derive(Debug)]
pub struct PollCycle {
    target: u8,
    kind: PollKind,
    attempts: u8,
    max_attempts: u8,
    state: PollState,
    outcome: Option<PollOutcome>,
}

impl PollCycle {
    pub fn new(target: u8, kind: PollKind, config: &GatewayConfig) -> Self {
        Self {
            target,
            kind,
            attempts: 0,
            max_attempts: config.total_attempts(),
            state: PollState::Idle,
            outcome: None,
        }
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    pub fn attempts(&self) -> u8 {
        self.attempts
    }

    fn send_request<T: MeshTransport>(&self, transport: &mut T) {
        if !transport.send(self.target, &[KEY], self.kind.request_tag()) {
            debug!(
                node = self.target,
                kind = self.kind.label(),
                "request not acked by mesh driver"
            );
        }
    }

    /// Advances the machine one transition. Returns true once `Done`.
    pub fn step<T: MeshTransport, C: Clock>(
        &mut self,
        transport: &mut T,
        clock: &C,
        config: &GatewayConfig,
    ) -> bool {
        match self.state {
            PollState::Idle => {
                self.send_request(transport);
                self.state = PollState::Sent;
            }
            PollState::Sent => {
                clock.sleep_ms(self.kind.retry_delay_ms(config));
                self.attempts += 1;
                self.state = PollState::AwaitingResponse;
            }
            PollState::AwaitingResponse => {
                match transport.recv_timeout(config.response_timeout_ms) {
                    Some(reply)
                        if reply.tag == self.kind.response_tag().wire()
                            && reply.from == self.target =>
                    {
                        if reply.payload.len() == self.kind.expected_len() {
                            self.outcome = Some(PollOutcome::Accepted(reply.payload));
                            self.state = PollState::Done;
                        } else {
                            warn!(
                                node = self.target,
                                kind = self.kind.label(),
                                expected = self.kind.expected_len(),
                                actual = reply.payload.len(),
                                "reply payload size mismatch"
                            );
                            self.state = PollState::Retry;
                        }
                    }
                    Some(reply) => {
                        debug!(
                            node = self.target,
                            from = reply.from,
                            tag = reply.tag,
                            "unexpected reply, not the awaited response"
                        );
                        self.state = PollState::Retry;
                    }
                    None => {
                        debug!(
                            node = self.target,
                            kind = self.kind.label(),
                            attempt = self.attempts,
                            "response timeout"
                        );
                        self.state = PollState::Retry;
                    }
                }
            }
            PollState::Retry => {
                if self.attempts >= self.max_attempts {
                    self.outcome = Some(PollOutcome::Exhausted);
                    self.state = PollState::Done;
                } else {
                    self.send_request(transport);
                    self.state = PollState::Sent;
                }
            }
            PollState::Done => {}
        }
        self.state == PollState::Done
    }

    /// Runs the machine to completion; one poll cycle is never cancelled
    /// part-way.
    pub fn run<T: MeshTransport, C: Clock>(
        &mut self,
        transport: &mut T,
        clock: &C,
        config: &GatewayConfig,
    ) -> PollOutcome {
        while !self.step(transport, clock, config) {}
        self.outcome.clone().unwrap_or(PollOutcome::Exhausted)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayStats {
    pub hellos_received: u32,
    pub nodes_registered: u32,
    pub collisions_detected: u32,
    pub announces_sent: u32,
    pub atmospheric_cycles: u32,
    pub ground_cycles: u32,
    pub polls_succeeded: u32,
    pub polls_failed: u32,
    pub samples_published: u32,
    pub publish_failures: u32,
    pub ground_samples_dropped: u32,
}

/// The gateway application state machine: node registry, periodic
/// announce, scheduled polling with bounded retry, and telemetry
/// forwarding. Runs as a single cooperative loop; one `tick` is one pass
/// and is never re-entered.
pub struct GatewayCoordinator<T: MeshTransport, C: Clock, S: TelemetrySink> {
    address: u8,
    config: GatewayConfig,
    transport: T,
    clock: C,
    sink: S,
    registry: NodeRegistry,
    atmospheric_cache: AtmosphericCache,
    ground_cache: GroundCache,
    announce_timer: IntervalTimer,
    atmospheric_timer: IntervalTimer,
    ground_trigger: Box<dyn TriggerStrategy>,
    stats: GatewayStats,
}

impl<T: MeshTransport, C: Clock, S: TelemetrySink> GatewayCoordinator<T, C, S> {
    pub fn new(
        address: u8,
        config: GatewayConfig,
        transport: T,
        clock: C,
        sink: S,
        ground_trigger: Box<dyn TriggerStrategy>,
    ) -> Self {
        let now = clock.now_ms();
        let announce_timer = IntervalTimer::new(config.announce_interval_ms, now);
        let atmospheric_timer = IntervalTimer::new(config.atmospheric_interval_ms, now);
        info!(address, "gateway coordinator up");
        Self {
            address,
            config,
            transport,
            clock,
            sink,
            registry: NodeRegistry::new(),
            atmospheric_cache: AtmosphericCache::new(),
            ground_cache: GroundCache::new(),
            announce_timer,
            atmospheric_timer,
            ground_trigger,
            stats: GatewayStats::default(),
        }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn atmospheric_cache(&self) -> &AtmosphericCache {
        &self.atmospheric_cache
    }

    pub fn ground_cache(&self) -> &GroundCache {
        &self.ground_cache
    }

    pub fn stats(&self) -> &GatewayStats {
        &self.stats
    }

    /// Mutable transport access for scripted-transport tests.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// One pass of the gateway loop: drain one HELLO, then the mutually
    /// exclusive announce/atmospheric timer pair (announce wins), then the
    /// independent ground trigger.
    pub fn tick(&mut self) {
        self.drain_hello();

        let now = self.clock.now_ms();
        if self.announce_timer.should_fire(now) {
            self.send_announce();
        } else if !self.registry.is_empty() && self.atmospheric_timer.should_fire(now) {
            self.run_atmospheric_cycle();
        }

        let now = self.clock.now_ms();
        if !self.registry.is_empty() && self.ground_trigger.should_fire(now) {
            self.run_ground_cycle();
        }
    }

    fn drain_hello(&mut self) {
        let Some(message) = self.transport.recv() else {
            return;
        };
        if message.tag != MessageType::Hello.wire() {
            debug!(
                from = message.from,
                tag = message.tag,
                "ignoring non-HELLO message in gateway inbox"
            );
            return;
        }
        self.stats.hellos_received += 1;
        match decode_hello(&message.payload) {
            Ok(mac) => self.register_or_reconcile(&mac, message.from),
            Err(e) => warn!(from = message.from, error = %e, "discarding malformed HELLO"),
        }
    }

    fn register_or_reconcile(&mut self, mac: &MacString, from: u8) {
        match self.registry.register(from, mac) {
            RegistrationOutcome::FirstNode | RegistrationOutcome::NewNode => {
                self.stats.nodes_registered += 1;
                info!(address = from, mac = %mac, nodes = self.registry.len(), "node registered");
            }
            RegistrationOutcome::AlreadyRegistered => {
                debug!(address = from, "node already registered, keepalive");
            }
            RegistrationOutcome::Collision => {
                self.stats.collisions_detected += 1;
                warn!(
                    address = from,
                    claimed_mac = %mac,
                    "address collision, instructing newcomer to regenerate"
                );
                self.send_address_error(from);
            }
        }
    }

    fn send_address_error(&mut self, to: u8) {
        let payload = encode_address_list(self.registry.addresses());
        if !self.transport.send(to, &payload, MessageType::AddressError) {
            warn!(address = to, "ERROR_ADDRESS not acked");
        }
    }

    fn send_announce(&mut self) {
        let acked = self
            .transport
            .send(BROADCAST_ADDRESS, &[KEY], MessageType::Announce);
        self.stats.announces_sent += 1;
        debug!(acked, "announce broadcast");
    }

    fn poll_targets(&self) -> Vec<u8, ADDRESS_SPACE> {
        let mut targets = Vec::new();
        for address in self.registry.addresses() {
            let _ = targets.push(address);
        }
        targets
    }

    fn run_atmospheric_cycle(&mut self) {
        self.stats.atmospheric_cycles += 1;
        let targets = self.poll_targets();
        info!(nodes = targets.len(), "atmospheric poll cycle start");

        for &address in targets.iter() {
            let started = self.clock.now_ms();
            let mut cycle = PollCycle::new(address, PollKind::Atmospheric, &self.config);
            match cycle.run(&mut self.transport, &self.clock, &self.config) {
                PollOutcome::Accepted(payload) => match decode_atmospheric_block(&payload) {
                    Ok(samples) => {
                        self.atmospheric_cache.replace(address, samples);
                        self.stats.polls_succeeded += 1;
                        for sample in &samples {
                            self.publish_atmospheric(address, sample);
                        }
                        info!(
                            node = address,
                            attempts = cycle.attempts(),
                            elapsed_ms = self.clock.now_ms().saturating_sub(started),
                            "atmospheric block accepted"
                        );
                    }
                    Err(e) => {
                        self.stats.polls_failed += 1;
                        warn!(node = address, error = %e, "accepted block failed to decode");
                    }
                },
                PollOutcome::Exhausted => {
                    self.stats.polls_failed += 1;
                    warn!(
                        node = address,
                        attempts = cycle.attempts(),
                        "no atmospheric data after all attempts"
                    );
                }
            }
            self.clock.sleep_ms(self.config.inter_node_delay_ms);
        }
    }

    fn run_ground_cycle(&mut self) {
        self.stats.ground_cycles += 1;
        let targets = self.poll_targets();
        info!(nodes = targets.len(), "ground/gps poll cycle start");

        for &address in targets.iter() {
            let started = self.clock.now_ms();
            let mut cycle = PollCycle::new(address, PollKind::GroundGps, &self.config);
            match cycle.run(&mut self.transport, &self.clock, &self.config) {
                PollOutcome::Accepted(payload) => match GroundGpsPacket::decode(&payload) {
                    Ok(packet) => {
                        if self.ground_cache.store(address, packet) {
                            self.stats.polls_succeeded += 1;
                            self.publish_ground(address, &packet);
                            info!(
                                node = address,
                                attempts = cycle.attempts(),
                                elapsed_ms = self.clock.now_ms().saturating_sub(started),
                                cursor = self.ground_cache.cursor(),
                                "ground packet stored"
                            );
                        } else {
                            self.stats.ground_samples_dropped += 1;
                            warn!(
                                node = address,
                                "ground cache full, cursor reset and sample dropped"
                            );
                        }
                    }
                    Err(e) => {
                        self.stats.polls_failed += 1;
                        warn!(node = address, error = %e, "accepted packet failed to decode");
                    }
                },
                PollOutcome::Exhausted => {
                    self.stats.polls_failed += 1;
                    warn!(
                        node = address,
                        attempts = cycle.attempts(),
                        "no ground data after all attempts"
                    );
                }
            }
            self.clock.sleep_ms(self.config.inter_node_delay_ms);
        }
    }

    fn publish_atmospheric(&mut self, address: u8, sample: &AtmosphericSample) {
        let reading = AtmosphericReading::from_sample(address, sample);
        match reading.to_json() {
            Ok(json) => {
                if self.sink.publish(&self.config.atmospheric_topic, &json) {
                    self.stats.samples_published += 1;
                } else {
                    self.stats.publish_failures += 1;
                    warn!(node = address, "atmospheric publish rejected by sink");
                }
            }
            Err(e) => {
                self.stats.publish_failures += 1;
                warn!(node = address, error = %e, "atmospheric payload serialization failed");
            }
        }
    }

    fn publish_ground(&mut self, address: u8, packet: &GroundGpsPacket) {
        let reading = GroundReading::from_packet(address, packet);
        match reading.to_json() {
            Ok(json) => {
                if self.sink.publish(&self.config.ground_topic, &json) {
                    self.stats.samples_published += 1;
                } else {
                    self.stats.publish_failures += 1;
                    warn!(node = address, "ground publish rejected by sink");
                }
            }
            Err(e) => {
                self.stats.publish_failures += 1;
                warn!(node = address, error = %e, "ground payload serialization failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac(text: &str) -> MacString {
        MacString::from(text).unwrap()
    }

    #[test]
    fn registry_first_hello_inserts_unconditionally() {
        let mut registry = NodeRegistry::new();
        assert_eq!(
            registry.register(0x10, &mac("AA:BB:CC:DD:EE:FF")),
            RegistrationOutcome::FirstNode
        );
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.mac_for(0x10).unwrap().as_str(), "AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn registry_repeat_hello_is_noop() {
        let mut registry = NodeRegistry::new();
        registry.register(0x10, &mac("AA:BB:CC:DD:EE:FF"));
        assert_eq!(
            registry.register(0x10, &mac("AA:BB:CC:DD:EE:FF")),
            RegistrationOutcome::AlreadyRegistered
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn registry_collision_keeps_existing_entry() {
        let mut registry = NodeRegistry::new();
        registry.register(0x10, &mac("AA:BB:CC:DD:EE:FF"));
        registry.register(0x20, &mac("11:22:33:44:55:66"));
        assert_eq!(
            registry.register(0x10, &mac("DE:AD:BE:EF:00:01")),
            RegistrationOutcome::Collision
        );
        assert_eq!(registry.mac_for(0x10).unwrap().as_str(), "AA:BB:CC:DD:EE:FF");
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn registry_never_holds_two_macs_for_one_address() {
        let mut registry = NodeRegistry::new();
        let deliveries = [
            (0x10, "AA:BB:CC:DD:EE:FF"),
            (0x10, "DE:AD:BE:EF:00:01"),
            (0x20, "11:22:33:44:55:66"),
            (0x10, "AA:BB:CC:DD:EE:FF"),
            (0x20, "DE:AD:BE:EF:00:02"),
        ];
        for (address, text) in deliveries {
            let _ = registry.register(address, &mac(text));
        }
        // Each address resolves to exactly one MAC.
        assert_eq!(registry.mac_for(0x10).unwrap().as_str(), "AA:BB:CC:DD:EE:FF");
        assert_eq!(registry.mac_for(0x20).unwrap().as_str(), "11:22:33:44:55:66");
        assert_eq!(registry.addresses().collect::<std::vec::Vec<_>>(), vec![0x10, 0x20]);
    }

    #[test]
    fn atmospheric_cache_replaces_whole_array() {
        let mut cache = AtmosphericCache::new();
        let mut first = [AtmosphericSample::default(); ATMOSPHERIC_SAMPLES_PER_NODE];
        first[0].temp = 111;
        cache.replace(0x10, first);
        assert_eq!(cache.get(0x10).unwrap()[0].temp, 111);

        let mut second = [AtmosphericSample::default(); ATMOSPHERIC_SAMPLES_PER_NODE];
        second[0].temp = 222;
        cache.replace(0x10, second);
        assert_eq!(cache.get(0x10).unwrap()[0].temp, 222);
        assert!(cache.get(0x20).is_none());
    }

    #[test]
    fn ground_cache_cursor_is_shared_across_addresses() {
        let mut cache = GroundCache::new();
        let packet = GroundGpsPacket::default();

        assert!(cache.store(0x10, packet));
        assert_eq!(cache.cursor(), 1);
        // Second write lands at slot 1 even though it is another node.
        assert!(cache.store(0x20, packet));
        assert_eq!(cache.cursor(), 2);
        assert!(cache.get(0x10)[0].is_some());
        assert!(cache.get(0x10)[1].is_none());
        assert!(cache.get(0x20)[1].is_some());
    }

    #[test]
    fn ground_cache_halts_and_resets_instead_of_wrapping() {
        let mut cache = GroundCache::new();
        let packet = GroundGpsPacket::default();
        for _ in 0..GROUND_SAMPLES_PER_NODE {
            assert!(cache.store(0x10, packet));
        }
        // Cursor is full: this sample is dropped and the cursor rewinds.
        assert!(!cache.store(0x10, packet));
        assert_eq!(cache.cursor(), 0);
        // The next sample lands at slot 0 again.
        assert!(cache.store(0x10, packet));
        assert_eq!(cache.cursor(), 1);
    }
}
