//! Simulation state aggregate and the wavefront engine.
//!
//! `SimulationState` owns nodes, obstacles, in-flight waves, the spatial
//! index, statistics and configuration. Collaborators drive it with
//! [`SimulationState::tick`] once per frame and read it back through the
//! accessors.
//!
//! High-level flow of one tick:
//! 1) Drop waves that expired, faded out or ran out of TTL.
//! 2) Advance radius and fade of every remaining wave.
//! 3) Apply attenuation of obstacles the wavefront newly touched (once per wave-obstacle pair).
//! 4) Evaluate reception at nodes the wavefront newly reached and run the flood protocol.
//! 5) Emit the relays collected in step 4; they are advanced from the next tick on.

use chrono::Utc;
use rand::Rng;
use std::collections::{BTreeMap, HashMap};

use crate::common::config::SimulationConfig;

use super::geometry;
use super::protocol::{self, ProtocolContext, Relay};
use super::signal_calculations::{
    absorption_factor, free_space_path_loss_db, link_closes, max_range_meters, obstacle_loss_db, realistic_max_radius_px, received_power_dbm, sensitivity_dbm,
    simplified_range_px, simplified_rx_threshold,
};
use super::spatial_index::SpatialIndex;
use super::statistics::Statistics;
use super::types::{Bounds, DEFAULT_SERVER_ID, Material, Node, Obstacle, ObstacleId, Payload, Point, ProtocolKey, SimulationEvent, WaveKind};
use super::wave::{Wave, WaveId};

pub const DEFAULT_SERVER_POSITION: Point = Point::new(450.0, 280.0);

/// Shortest link distance used in the path loss, in meters.
const MIN_LINK_DISTANCE_M: f64 = 0.001;

/// Entry kinds stored in the spatial index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IndexedEntity {
    Obstacle(ObstacleId),
    Hive(String),
}

/// Radio parameters of one wave, resolved once per tick.
struct LinkParameters {
    realistic: bool,
    tx_power_dbm: f64,
    meters_per_pixel: f64,
    frequency_mhz: f64,
    sensitivity_dbm: f64,
    rx_threshold: f64,
}

impl LinkParameters {
    fn receives(&self, wave: &Wave, target: &Point, distance_px: f64) -> bool {
        let sector = wave.sector_of(target);
        if self.realistic {
            let distance_m = (distance_px * self.meters_per_pixel).max(MIN_LINK_DISTANCE_M);
            let path_loss = free_space_path_loss_db(distance_m, self.frequency_mhz);
            let rx = received_power_dbm(self.tx_power_dbm, path_loss, obstacle_loss_db(wave.sector_weight(sector)));
            link_closes(rx, self.sensitivity_dbm)
        } else {
            wave.combined_weight(sector) >= self.rx_threshold
        }
    }
}

/// Evaluate one node against one wave, at most once per pair.
fn evaluate_node(node: &mut Node, wave: &mut Wave, link: &LinkParameters, ctx: &mut ProtocolContext<'_>) -> Option<Relay> {
    let distance = geometry::distance(&wave.origin, &node.position);
    if distance > wave.radius || wave.is_evaluated(&node.id) {
        return None;
    }
    wave.mark_evaluated(&node.id);

    if node.id == wave.emitter_id {
        return None;
    }

    if !link.receives(wave, &node.position, distance) {
        ctx.statistics.shadow_drops += 1;
        ctx.events.push(SimulationEvent::ShadowDrop {
            node: node.id.clone(),
            emitter: wave.emitter_id.clone(),
            kind: wave.kind,
        });
        return None;
    }

    protocol::handle_reception(node, wave, ctx)
}

#[derive(Debug, Clone)]
pub struct SimulationState {
    pub(crate) config: SimulationConfig,
    pub(crate) server: Node,
    pub(crate) hives: Vec<Node>,
    pub(crate) obstacles: BTreeMap<ObstacleId, Obstacle>,
    pub(crate) waves: Vec<Wave>,
    pub(crate) index: SpatialIndex<IndexedEntity>,
    pub(crate) statistics: Statistics,
    pub(crate) first_emission: HashMap<ProtocolKey, f64>,
    pub(crate) events: Vec<SimulationEvent>,
    pub(crate) now_ms: f64,
    /// Set by the first tick; until then `now_ms` is not on the host's clock.
    pub(crate) clock_started: bool,
    pub(crate) next_sequence: u64,
    pub(crate) next_obstacle_id: ObstacleId,
    pub(crate) next_hive_number: u64,
    pub(crate) next_wave_id: WaveId,
}

impl Default for SimulationState {
    fn default() -> Self {
        Self::new(SimulationConfig::default())
    }
}

impl SimulationState {
    pub fn new(config: SimulationConfig) -> Self {
        let server = Node::server(DEFAULT_SERVER_ID, DEFAULT_SERVER_POSITION, config.server_tx_dbm());
        Self {
            config,
            server,
            hives: Vec::new(),
            obstacles: BTreeMap::new(),
            waves: Vec::new(),
            index: SpatialIndex::new(),
            statistics: Statistics::default(),
            first_emission: HashMap::new(),
            events: Vec::new(),
            now_ms: 0.0,
            clock_started: false,
            next_sequence: 1,
            next_obstacle_id: 1,
            next_hive_number: 1,
            next_wave_id: 1,
        }
    }

    // ---------- Configuration ----------

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Mutable access to the clamped parameters.
    ///
    /// Transmit power changes that must reach the server go through
    /// [`SimulationState::set_default_tx_dbm`] instead.
    pub fn config_mut(&mut self) -> &mut SimulationConfig {
        &mut self.config
    }

    /// Replace the whole configuration; the server takes the configured power.
    pub fn set_config(&mut self, config: SimulationConfig) {
        self.config = config;
        self.server.set_tx_power_dbm(self.config.server_tx_dbm());
    }

    /// Default transmit power for new hives. The server follows it.
    pub fn set_default_tx_dbm(&mut self, value: f64) {
        self.config.set_default_tx_dbm(value);
        self.config.set_server_tx_dbm(self.config.default_tx_dbm());
        self.server.set_tx_power_dbm(self.config.default_tx_dbm());
    }

    // ---------- Read accessors ----------

    /// Simulation clock of the last tick, in milliseconds.
    pub fn now_ms(&self) -> f64 {
        self.now_ms
    }

    pub fn waves(&self) -> &[Wave] {
        &self.waves
    }

    pub fn server(&self) -> &Node {
        &self.server
    }

    pub fn hives(&self) -> &[Node] {
        &self.hives
    }

    pub fn hive(&self, id: &str) -> Option<&Node> {
        self.hives.iter().find(|h| h.id == id)
    }

    /// Resolve any node id, server included.
    pub fn node(&self, id: &str) -> Option<&Node> {
        if self.server.id == id { Some(&self.server) } else { self.hive(id) }
    }

    /// Server first, then hives in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        std::iter::once(&self.server).chain(self.hives.iter())
    }

    pub fn obstacles(&self) -> impl Iterator<Item = &Obstacle> {
        self.obstacles.values()
    }

    pub fn obstacle(&self, id: ObstacleId) -> Option<&Obstacle> {
        self.obstacles.get(&id)
    }

    pub fn statistics(&self) -> &Statistics {
        &self.statistics
    }

    /// Zero every counter and forget pending latency start times.
    pub fn reset_statistics(&mut self) {
        self.statistics.reset();
        self.first_emission.clear();
    }

    /// Take all events published since the previous call.
    pub fn drain_events(&mut self) -> Vec<SimulationEvent> {
        std::mem::take(&mut self.events)
    }

    /// Hives and obstacles whose indexed box intersects `area`.
    pub fn query_area(&self, area: &Bounds) -> Vec<IndexedEntity> {
        self.index.query(area).cloned().collect()
    }

    /// Sequence number the next originated message will get.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Maximum wave radius for an emitter transmitting at `tx_power_dbm`, in world units.
    pub fn max_radius_px(&self, tx_power_dbm: f64) -> f64 {
        let c = &self.config;
        if c.realistic() {
            let range_m = max_range_meters(c.spreading_factor(), c.bandwidth_khz(), tx_power_dbm, c.frequency_mhz());
            realistic_max_radius_px(range_m, c.meters_per_pixel())
        } else {
            simplified_range_px(c.base_range_px(), c.spreading_factor(), c.bandwidth_khz(), c.coding_rate())
        }
    }

    // ---------- Node mutators ----------

    /// Every hive is registered in the spatial index, so its key set doubles as the id set.
    pub(crate) fn is_node_id_taken(&self, id: &str) -> bool {
        self.server.id == id || self.index.contains(&IndexedEntity::Hive(id.to_string()))
    }

    /// Next free "Hive N" identifier.
    pub(crate) fn generate_hive_id(&mut self) -> String {
        loop {
            let id = format!("Hive {}", self.next_hive_number);
            self.next_hive_number += 1;
            if !self.is_node_id_taken(&id) {
                return id;
            }
        }
    }

    /// Add a hive at `position` with the default transmit power and return its id.
    pub fn add_hive(&mut self, position: Point) -> String {
        let id = self.generate_hive_id();
        let hive = Node::hive(id.clone(), position, self.config.default_tx_dbm());
        self.insert_hive(hive);
        id
    }

    /// Register a fully built hive. The caller guarantees the id is free.
    pub(crate) fn insert_hive(&mut self, hive: Node) {
        self.index.insert(IndexedEntity::Hive(hive.id.clone()), hive.index_bounds());
        self.hives.push(hive);
    }

    /// Waves already emitted by the hive keep propagating with the default power.
    pub fn remove_hive(&mut self, id: &str) -> bool {
        let Some(pos) = self.hives.iter().position(|h| h.id == id) else {
            return false;
        };
        self.hives.remove(pos);
        self.index.remove(&IndexedEntity::Hive(id.to_string()));
        true
    }

    /// Move the server or a hive. Waves in flight keep their origin.
    pub fn move_node(&mut self, id: &str, position: Point) -> bool {
        if !position.is_finite() {
            log::warn!("Ignoring non-finite position for node {}", id);
            return false;
        }
        if self.server.id == id {
            self.server.position = position;
            return true;
        }
        let Some(hive) = self.hives.iter_mut().find(|h| h.id == id) else {
            return false;
        };
        hive.position = position;
        let bounds = hive.index_bounds();
        self.index.insert(IndexedEntity::Hive(id.to_string()), bounds);
        true
    }

    pub fn set_hive_tx_power(&mut self, id: &str, dbm: f64) -> bool {
        match self.hives.iter_mut().find(|h| h.id == id) {
            Some(hive) => {
                hive.set_tx_power_dbm(dbm);
                true
            }
            None => false,
        }
    }

    pub fn set_hive_amplitude(&mut self, id: &str, amplitude: f64) -> bool {
        match self.hives.iter_mut().find(|h| h.id == id) {
            Some(hive) => {
                hive.set_amplitude(amplitude);
                true
            }
            None => false,
        }
    }

    // ---------- Obstacle mutators ----------

    fn allocate_obstacle_id(&mut self) -> ObstacleId {
        while self.obstacles.contains_key(&self.next_obstacle_id) {
            self.next_obstacle_id += 1;
        }
        let id = self.next_obstacle_id;
        self.next_obstacle_id += 1;
        id
    }

    /// Add an obstacle and register it in the spatial index.
    ///
    /// A positive, unused id is kept; anything else gets a fresh id.
    pub fn add_obstacle(&mut self, mut obstacle: Obstacle) -> ObstacleId {
        if obstacle.id == 0 || self.obstacles.contains_key(&obstacle.id) {
            obstacle.id = self.allocate_obstacle_id();
        } else if obstacle.id >= self.next_obstacle_id {
            self.next_obstacle_id = obstacle.id.saturating_add(1);
        }
        let id = obstacle.id;
        self.index.insert(IndexedEntity::Obstacle(id), obstacle.bounds());
        self.obstacles.insert(id, obstacle);
        id
    }

    pub fn add_circle_obstacle(&mut self, center: Point, radius: f64, material: Material) -> ObstacleId {
        self.add_obstacle(Obstacle::circle(0, center, radius, material))
    }

    /// Returns `None` when fewer than three finite vertices are given.
    pub fn add_polygon_obstacle(&mut self, vertices: Vec<Point>, material: Material) -> Option<ObstacleId> {
        let obstacle = Obstacle::polygon(0, vertices, material)?;
        Some(self.add_obstacle(obstacle))
    }

    pub fn remove_obstacle(&mut self, id: ObstacleId) -> bool {
        self.index.remove(&IndexedEntity::Obstacle(id));
        self.obstacles.remove(&id).is_some()
    }

    /// Translate an obstacle and re-register its bounds.
    pub fn move_obstacle(&mut self, id: ObstacleId, dx: f64, dy: f64) -> bool {
        if !dx.is_finite() || !dy.is_finite() {
            return false;
        }
        self.update_obstacle(id, |ob| ob.translate(dx, dy))
    }

    /// Switch material; absorption resets to the material's coefficient.
    pub fn set_obstacle_material(&mut self, id: ObstacleId, material: Material) -> bool {
        self.update_obstacle(id, |ob| ob.set_material(material))
    }

    pub fn set_obstacle_absorption(&mut self, id: ObstacleId, absorption: f64) -> bool {
        self.update_obstacle(id, |ob| ob.set_absorption(absorption))
    }

    /// Resize a circle obstacle. Polygons are rejected.
    pub fn set_obstacle_radius(&mut self, id: ObstacleId, radius: f64) -> bool {
        let mut resized = false;
        let found = self.update_obstacle(id, |ob| resized = ob.set_radius(radius));
        found && resized
    }

    fn update_obstacle(&mut self, id: ObstacleId, f: impl FnOnce(&mut Obstacle)) -> bool {
        let Some(obstacle) = self.obstacles.get_mut(&id) else {
            return false;
        };
        f(obstacle);
        self.index.insert(IndexedEntity::Obstacle(id), obstacle.bounds());
        true
    }

    /// Clear waves, hives, obstacles, counters and dedup state.
    ///
    /// The server stays in place with its dedup sets emptied; configuration is kept.
    pub fn reset(&mut self) {
        self.waves.clear();
        self.hives.clear();
        self.obstacles.clear();
        self.index.clear();
        self.statistics.reset();
        self.first_emission.clear();
        self.events.clear();
        self.server.seen_data.clear();
        self.server.seen_ack.clear();
        self.next_sequence = 1;
        self.next_obstacle_id = 1;
        self.next_hive_number = 1;
    }

    // ---------- Emission ----------

    fn create_payload(&mut self, origin: &str) -> Payload {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let temperature: f64 = rand::thread_rng().gen_range(20.0..25.0);
        let payload = Payload {
            origin: origin.to_string(),
            sequence,
            created_at: Utc::now(),
            temperature_c: (temperature * 10.0).round() / 10.0,
            hops: 0,
        };
        self.first_emission.insert(payload.key(), self.now_ms);
        self.statistics.data_sent += 1;
        payload
    }

    /// Create one wave from `node_id` at the current simulation time.
    ///
    /// Without a payload a fresh DATA message is originated (sequence number,
    /// `data_sent` counter, latency start). Without a TTL the configured
    /// maximum retransmission count is used. Unknown emitters are ignored.
    ///
    /// # Returns
    ///
    /// The new wave's id, or `None` if the node does not exist.
    pub fn emit(&mut self, node_id: &str, kind: WaveKind, payload: Option<Payload>, ttl: Option<i32>) -> Option<WaveId> {
        let Some(node) = self.node(node_id) else {
            log::warn!("Cannot emit {} from unknown node {}", kind, node_id);
            return None;
        };
        let origin = node.position;
        let amplitude = node.amplitude();
        let tx_power_dbm = node.tx_power_dbm;

        let payload = match payload {
            Some(p) => p,
            None => self.create_payload(node_id),
        };
        let ttl = ttl.unwrap_or(self.config.max_retransmissions());
        let max_radius = self.max_radius_px(tx_power_dbm);

        let id = self.next_wave_id;
        self.next_wave_id += 1;
        let key = payload.key();
        log::debug!(
            "{} emits {} {} TTL={} range≈{:.0} m",
            node_id,
            kind,
            key,
            ttl,
            max_radius * self.config.meters_per_pixel()
        );
        self.events.push(SimulationEvent::WaveEmitted {
            emitter: node_id.to_string(),
            kind,
            key,
            ttl,
            max_radius,
        });
        self.waves.push(Wave::new(id, origin, node_id.to_string(), kind, payload, ttl, max_radius, amplitude, self.now_ms));
        Some(id)
    }

    // ---------- Tick ----------

    /// Advance all waves and protocol state to `now_ms`.
    ///
    /// The first call fixes the time base; waves emitted earlier start at its `now_ms`.
    pub fn tick(&mut self, now_ms: f64) {
        if !self.clock_started {
            // Anything emitted before the first tick starts on it
            for wave in self.waves.iter_mut() {
                wave.restart_at(now_ms);
            }
            for t0 in self.first_emission.values_mut() {
                *t0 = now_ms;
            }
            self.clock_started = true;
        }
        self.now_ms = now_ms;
        let realistic = self.config.realistic();
        let fade_rate = self.config.fade_rate();

        self.waves.retain(|w| w.is_alive(now_ms, realistic));

        let mut waves = std::mem::take(&mut self.waves);
        let mut relays = Vec::new();
        for wave in waves.iter_mut() {
            wave.advance(now_ms, realistic, fade_rate);
            self.apply_obstacles(wave);
            self.evaluate_receptions(wave, &mut relays);
        }
        self.waves = waves;

        for relay in relays {
            self.emit(&relay.emitter_id, relay.kind, Some(relay.payload), Some(relay.ttl));
        }
    }

    /// Attenuate every sector by each obstacle the wavefront touches for the first time.
    fn apply_obstacles(&self, wave: &mut Wave) {
        let area = wave.bounding_box();
        let meters_per_pixel = self.config.meters_per_pixel();
        for entity in self.index.query(&area) {
            let IndexedEntity::Obstacle(id) = entity else {
                continue;
            };
            if wave.is_obstacle_applied(*id) {
                continue;
            }
            let Some(obstacle) = self.obstacles.get(id) else {
                continue;
            };
            if !geometry::disc_intersects_obstacle(&wave.origin, wave.radius, obstacle) {
                continue;
            }
            wave.attenuate_all(absorption_factor(obstacle.absorption(), obstacle.thickness() * meters_per_pixel));
            wave.mark_obstacle_applied(*id);
        }
    }

    fn link_parameters(&self, emitter_id: &str) -> LinkParameters {
        let c = &self.config;
        LinkParameters {
            realistic: c.realistic(),
            tx_power_dbm: self.node(emitter_id).map(|n| n.tx_power_dbm).unwrap_or(c.default_tx_dbm()),
            meters_per_pixel: c.meters_per_pixel(),
            frequency_mhz: c.frequency_mhz(),
            sensitivity_dbm: sensitivity_dbm(c.spreading_factor(), c.bandwidth_khz()),
            rx_threshold: simplified_rx_threshold(c.base_rx_threshold(), c.spreading_factor(), c.bandwidth_khz(), c.coding_rate()),
        }
    }

    /// Only DATA is evaluated at the server; ACKs are addressed to hives.
    fn evaluate_receptions(&mut self, wave: &mut Wave, relays: &mut Vec<Relay>) {
        let link = self.link_parameters(&wave.emitter_id);
        let mut ctx = ProtocolContext {
            statistics: &mut self.statistics,
            first_emission: &mut self.first_emission,
            events: &mut self.events,
            now_ms: self.now_ms,
        };
        if wave.kind == WaveKind::Data {
            relays.extend(evaluate_node(&mut self.server, wave, &link, &mut ctx));
        }
        for hive in self.hives.iter_mut() {
            relays.extend(evaluate_node(hive, wave, &link, &mut ctx));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::wave::WAVE_DURATION_MS;
    use std::collections::HashSet;

    const TICK_MS: f64 = 16.0;

    fn run_until(state: &mut SimulationState, until_ms: f64) {
        let mut t = state.now_ms();
        while t < until_ms {
            t += TICK_MS;
            state.tick(t);
        }
    }

    fn server_pos() -> Point {
        DEFAULT_SERVER_POSITION
    }

    fn offset(dx: f64, dy: f64) -> Point {
        Point::new(server_pos().x + dx, server_pos().y + dy)
    }

    #[test]
    fn flood_with_relay_delivers_once_and_acks_origin() {
        let mut state = SimulationState::default();
        let origin = state.add_hive(offset(100.0, 0.0));
        let relay = state.add_hive(offset(0.0, 100.0));

        assert!(state.emit(&origin, WaveKind::Data, None, Some(2)).is_some());
        run_until(&mut state, WAVE_DURATION_MS * 3.0);

        let stats = state.statistics();
        assert_eq!(stats.data_sent, 1);
        assert_eq!(stats.data_delivered, 1);
        assert_eq!(stats.origin_acked, 1);
        assert_eq!(stats.relays_data, 1);
        assert_eq!(stats.relays_ack, 1);
        assert_eq!(stats.dup_ignored, 1);
        assert_eq!(stats.shadow_drops, 0);
        assert_eq!(stats.ttl_drops, 0);

        let key = ProtocolKey::new(origin.clone(), 1);
        assert!(!state.hive(&origin).unwrap().seen_data.contains(&key));
        assert!(state.hive(&origin).unwrap().seen_ack.contains(&key));
        assert!(state.hive(&relay).unwrap().seen_data.contains(&key));
        assert!(state.server().seen_data.contains(&key));

        let events = state.drain_events();
        let ack_ttl = events.iter().find_map(|e| match e {
            SimulationEvent::WaveEmitted { emitter, kind: WaveKind::Ack, ttl, .. } if emitter == DEFAULT_SERVER_ID => Some(*ttl),
            _ => None,
        });
        assert!(ack_ttl.unwrap() >= 1);
        assert!(events.iter().any(|e| matches!(e, SimulationEvent::OriginAcknowledged { latency_ms: Some(l), .. } if *l > 0.0)));
        assert!(state.waves().is_empty());
    }

    #[test]
    fn each_node_relays_a_message_at_most_once() {
        let mut state = SimulationState::default();
        let origin = state.add_hive(offset(120.0, 0.0));
        for (dx, dy) in [(60.0, 60.0), (0.0, 120.0), (-80.0, 40.0), (40.0, -90.0)] {
            state.add_hive(offset(dx, dy));
        }

        state.emit(&origin, WaveKind::Data, None, Some(3));
        run_until(&mut state, WAVE_DURATION_MS * 4.0);

        let mut relayed = HashSet::new();
        for event in state.drain_events() {
            if let SimulationEvent::Relayed { node, kind, key, ttl } = event {
                assert!(ttl >= 0);
                assert!(ttl < 3);
                assert!(relayed.insert((node, kind, key)), "node relayed the same message twice");
            }
        }
        assert!(!relayed.is_empty());
        assert_eq!(state.statistics().data_delivered, 1);
    }

    #[test]
    fn obstacle_between_hive_and_server_blocks_delivery() {
        let mut state = SimulationState::default();
        let hive = state.add_hive(offset(300.0, 0.0));
        let wall = Obstacle::circle(0, offset(150.0, 0.0), 40.0, Material::Metal).with_absorption(5.0);
        state.add_obstacle(wall);

        state.emit(&hive, WaveKind::Data, None, None);
        run_until(&mut state, WAVE_DURATION_MS * 1.2);

        let stats = state.statistics();
        assert_eq!(stats.data_delivered, 0);
        assert_eq!(stats.shadow_drops, 1);
        assert!(state.drain_events().iter().any(|e| matches!(e, SimulationEvent::ShadowDrop { node, .. } if node == DEFAULT_SERVER_ID)));
    }

    #[test]
    fn ttl_zero_data_is_not_relayed() {
        let mut state = SimulationState::default();
        // Far beyond the server's reach
        let origin = state.add_hive(Point::new(100_000.0, 0.0));
        let neighbour = state.add_hive(Point::new(100_100.0, 0.0));

        state.emit(&origin, WaveKind::Data, None, Some(0));
        run_until(&mut state, WAVE_DURATION_MS * 1.2);

        let stats = state.statistics();
        assert_eq!(stats.ttl_drops, 1);
        assert_eq!(stats.relays_data, 0);
        assert!(state.hive(&neighbour).unwrap().seen_data.contains(&ProtocolKey::new(origin, 1)));
    }

    #[test]
    fn emitter_never_receives_its_own_wave() {
        let mut state = SimulationState::default();
        let lonely = state.add_hive(Point::new(300_000.0, 0.0));
        state.emit(&lonely, WaveKind::Data, None, None);

        run_until(&mut state, 500.0);
        assert!(state.waves()[0].is_evaluated(&lonely));

        run_until(&mut state, WAVE_DURATION_MS * 1.2);
        assert_eq!(state.statistics().shadow_drops, 0);
        let events = state.drain_events();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], SimulationEvent::WaveEmitted { .. }));
    }

    #[test]
    fn server_outcomes_account_for_every_direct_data_wave() {
        let mut state = SimulationState::default();
        let hive = state.add_hive(offset(200.0, 0.0));

        state.emit(&hive, WaveKind::Data, None, None);
        run_until(&mut state, WAVE_DURATION_MS * 1.2);

        state.add_circle_obstacle(offset(100.0, 0.0), 60.0, Material::Water);
        state.emit(&hive, WaveKind::Data, None, None);
        run_until(&mut state, WAVE_DURATION_MS * 2.4);

        // Re-send an already delivered message
        let payload = Payload {
            origin: hive.clone(),
            sequence: 1,
            created_at: Utc::now(),
            temperature_c: 21.0,
            hops: 0,
        };
        state.remove_obstacle(1);
        state.emit(&hive, WaveKind::Data, Some(payload), None);
        run_until(&mut state, WAVE_DURATION_MS * 3.6);

        let data_waves = state
            .drain_events()
            .iter()
            .filter(|e| matches!(e, SimulationEvent::WaveEmitted { kind: WaveKind::Data, .. }))
            .count() as u64;
        let stats = state.statistics();
        assert_eq!(data_waves, stats.data_delivered + stats.shadow_drops + stats.dup_ignored);
        assert_eq!(stats.data_sent, 2);
        assert_eq!(stats.data_delivered, 1);
        assert_eq!(stats.shadow_drops, 1);
        assert_eq!(stats.dup_ignored, 1);
    }

    #[test]
    fn stronger_absorption_never_raises_sector_weight() {
        let weight_with = |absorption: f64| {
            let mut state = SimulationState::default();
            state.add_obstacle(Obstacle::circle(0, Point::new(30.0, 0.0), 10.0, Material::Default).with_absorption(absorption));
            let payload = Payload {
                origin: "x".into(),
                sequence: 1,
                created_at: Utc::now(),
                temperature_c: 20.0,
                hops: 0,
            };
            let mut wave = Wave::new(1, Point::new(0.0, 0.0), "x".into(), WaveKind::Data, payload, 1, 100.0, 1.0, 0.0);
            wave.radius = 50.0;
            state.apply_obstacles(&mut wave);
            wave.sector_weight(0)
        };
        let light = weight_with(0.001);
        let heavy = weight_with(0.002);
        assert!(light < 1.0);
        assert!(heavy <= light);
        assert!((light - (-0.001f64 * 40.0).exp()).abs() < 1e-12);
    }

    #[test]
    fn obstacle_is_applied_once_per_wave() {
        let mut state = SimulationState::default();
        state.add_polygon_obstacle(vec![Point::new(20.0, -10.0), Point::new(40.0, -10.0), Point::new(40.0, 10.0), Point::new(20.0, 10.0)], Material::Brick);
        let payload = Payload {
            origin: "x".into(),
            sequence: 1,
            created_at: Utc::now(),
            temperature_c: 20.0,
            hops: 0,
        };
        let mut wave = Wave::new(1, Point::new(0.0, 0.0), "x".into(), WaveKind::Data, payload, 1, 100.0, 1.0, 0.0);
        wave.radius = 25.0;

        state.apply_obstacles(&mut wave);
        let first = *wave.sectors();
        assert!(first[0] < 1.0);
        state.apply_obstacles(&mut wave);
        assert_eq!(*wave.sectors(), first);
    }

    #[test]
    fn simplified_mode_uses_threshold_on_combined_weight() {
        let mut config = SimulationConfig::default();
        config.set_realistic(false);
        config.set_fade_rate(0.0005);
        let mut state = SimulationState::new(config);
        let hive = state.add_hive(offset(100.0, 0.0));

        state.emit(&hive, WaveKind::Data, None, None);
        assert!((state.waves()[0].max_radius - 408.0).abs() < 1e-6);
        run_until(&mut state, WAVE_DURATION_MS * 1.2);
        assert_eq!(state.statistics().data_delivered, 1);
    }

    #[test]
    fn node_exactly_on_the_wavefront_is_a_candidate() {
        let mut config = SimulationConfig::default();
        config.set_realistic(false);
        config.set_fade_rate(0.0005);
        let mut state = SimulationState::new(config);
        // The server sits outside this wave's reach
        let emitter = state.add_hive(Point::new(0.0, 0.0));
        state.emit(&emitter, WaveKind::Data, None, None);
        let reach = state.waves()[0].max_radius;
        let on_edge = state.add_hive(Point::new(reach, 0.0));
        let beyond = state.add_hive(Point::new(reach + 0.5, 0.0));

        state.tick(0.0);
        state.tick(WAVE_DURATION_MS);

        let wave = &state.waves()[0];
        assert_eq!(wave.radius, reach);
        assert!(wave.is_evaluated(&on_edge));
        assert!(!wave.is_evaluated(&beyond));
        let key = ProtocolKey::new(emitter, 1);
        assert!(state.hive(&on_edge).unwrap().seen_data.contains(&key));
        assert!(state.hive(&beyond).unwrap().seen_data.is_empty());
        assert_eq!(state.statistics().relays_data, 1);
    }

    #[test]
    fn waves_emitted_before_the_first_tick_start_on_it() {
        let mut state = SimulationState::default();
        let hive = state.add_hive(offset(100.0, 0.0));
        state.emit(&hive, WaveKind::Data, None, None);

        // Host clock in epoch milliseconds
        let start = 1.7e12;
        let mut t = start;
        while t < start + WAVE_DURATION_MS * 2.4 {
            state.tick(t);
            t += TICK_MS;
        }

        let stats = state.statistics();
        assert_eq!(stats.data_sent, 1);
        assert_eq!(stats.data_delivered, 1);
        assert_eq!(stats.origin_acked, 1);
        let latency = stats.average_latency_ms().unwrap();
        assert!(latency > 0.0 && latency < WAVE_DURATION_MS * 2.4);
    }

    #[test]
    fn unknown_emitter_is_ignored() {
        let mut state = SimulationState::default();
        assert!(state.emit("Ghost", WaveKind::Data, None, None).is_none());
        assert_eq!(state.statistics().data_sent, 0);
        assert!(state.waves().is_empty());
    }

    #[test]
    fn hive_ids_skip_taken_names() {
        let mut state = SimulationState::default();
        let mut taken = Node::hive("Hive 2", Point::new(0.0, 0.0), 10.0);
        taken.set_amplitude(1.5);
        state.insert_hive(taken);
        assert_eq!(state.add_hive(Point::new(1.0, 1.0)), "Hive 1");
        assert_eq!(state.add_hive(Point::new(2.0, 2.0)), "Hive 3");
    }

    #[test]
    fn moving_entities_updates_spatial_index() {
        let mut state = SimulationState::default();
        let hive = state.add_hive(Point::new(0.0, 0.0));
        let ob = state.add_circle_obstacle(Point::new(500.0, 500.0), 10.0, Material::Rock);

        let near_origin = Bounds::around(&Point::new(0.0, 0.0), 50.0);
        assert_eq!(state.query_area(&near_origin), vec![IndexedEntity::Hive(hive.clone())]);

        assert!(state.move_node(&hive, Point::new(1000.0, 1000.0)));
        assert!(state.move_obstacle(ob, -500.0, -500.0));
        assert_eq!(state.query_area(&near_origin), vec![IndexedEntity::Obstacle(ob)]);

        assert!(state.remove_obstacle(ob));
        assert!(state.query_area(&near_origin).is_empty());
    }

    #[test]
    fn obstacle_edits_follow_material_rules() {
        let mut state = SimulationState::default();
        let id = state.add_circle_obstacle(Point::new(0.0, 0.0), 40.0, Material::Brick);
        assert!(state.set_obstacle_absorption(id, 2.0));
        assert_eq!(state.obstacle(id).unwrap().absorption(), 2.0);
        assert!(state.set_obstacle_material(id, Material::Forest));
        assert_eq!(state.obstacle(id).unwrap().absorption(), Material::Forest.absorption());
        assert!(state.set_obstacle_radius(id, 100.0));
        assert_eq!(state.query_area(&Bounds::around(&Point::new(95.0, 0.0), 1.0)), vec![IndexedEntity::Obstacle(id)]);

        let poly = state.add_polygon_obstacle(vec![Point::new(0.0, 0.0), Point::new(5.0, 0.0), Point::new(5.0, 5.0)], Material::Sand).unwrap();
        assert!(!state.set_obstacle_radius(poly, 10.0));
        assert!(poly > id);
    }

    #[test]
    fn default_tx_power_also_drives_server() {
        let mut state = SimulationState::default();
        assert_eq!(state.server().tx_power_dbm, 14.0);
        state.set_default_tx_dbm(17.0);
        assert_eq!(state.server().tx_power_dbm, 17.0);
        let hive = state.add_hive(Point::new(0.0, 0.0));
        assert_eq!(state.hive(&hive).unwrap().tx_power_dbm, 17.0);
    }

    #[test]
    fn reset_clears_everything_but_the_server() {
        let mut state = SimulationState::default();
        let hive = state.add_hive(offset(50.0, 0.0));
        state.add_circle_obstacle(offset(500.0, 500.0), 10.0, Material::Rock);
        state.emit(&hive, WaveKind::Data, None, None);
        run_until(&mut state, 3000.0);

        state.reset();
        assert!(state.hives().is_empty());
        assert_eq!(state.obstacles().count(), 0);
        assert!(state.waves().is_empty());
        assert_eq!(*state.statistics(), Statistics::default());
        assert!(state.server().seen_data.is_empty());
        assert_eq!(state.next_sequence(), 1);
        assert_eq!(state.add_hive(offset(10.0, 0.0)), "Hive 1");
    }

    #[test]
    fn reset_statistics_forgets_latency_starts() {
        let mut state = SimulationState::default();
        let hive = state.add_hive(offset(50.0, 0.0));
        state.emit(&hive, WaveKind::Data, None, None);
        state.reset_statistics();
        assert_eq!(state.statistics().data_sent, 0);
        assert!(state.first_emission.is_empty());
    }
}
