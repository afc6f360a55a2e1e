//! Scene persistence: snapshot, lenient bulk-load and JSON file I/O.
//!
//! Contains the serializable scene structures and the functions moving a
//! [`SimulationState`] to and from them. Loading never aborts on a single bad
//! entry: malformed values fall back to defaults and malformed entries are
//! skipped with a warning. Waves are never persisted.

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fs;

use crate::simulation::network::SimulationState;
use crate::simulation::statistics::Statistics;
use crate::simulation::types::{DEFAULT_CIRCLE_RADIUS, Material, Node, Obstacle, ObstacleShape, Point, ProtocolKey};

/// Newest scene format this build writes and accepts.
pub const SCENE_FORMAT_VERSION: u32 = 1;

/// How a bulk-load combines with the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// Reset first, then take settings, server, counters and entities from the scene.
    Replace,
    /// Keep everything and add the scene's hives and obstacles.
    Extend,
}

/// Error type for scene loading failures.
#[derive(Debug)]
pub enum SceneLoadError {
    FileReadError(String),
    ParseError(String),
    ValidationError(String),
}

impl std::fmt::Display for SceneLoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SceneLoadError::FileReadError(msg) => write!(f, "Failed to read file: {}", msg),
            SceneLoadError::ParseError(msg) => write!(f, "Failed to parse JSON: {}", msg),
            SceneLoadError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for SceneLoadError {}

/// Deserialize a value, turning any shape mismatch into `None`.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

/// Deserialize a list, dropping the elements that do not fit `T`.
fn lenient_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let Value::Array(items) = Value::deserialize(deserializer)? else {
        return Ok(Vec::new());
    };
    Ok(items
        .into_iter()
        .filter_map(|item| match serde_json::from_value(item) {
            Ok(v) => Some(v),
            Err(e) => {
                log::warn!("Skipping malformed scene entry: {}", e);
                None
            }
        })
        .collect())
}

fn finite(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

/// Collection server entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerEntry {
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub tx_power_dbm: Option<f64>,
}

/// Radio and engine parameters. Every value is clamped on load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsEntry {
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub spreading_factor: Option<f64>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub bandwidth_khz: Option<f64>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub coding_rate: Option<f64>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub max_retransmissions: Option<f64>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub meters_per_pixel: Option<f64>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub frequency_mhz: Option<f64>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub default_tx_dbm: Option<f64>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub realistic: Option<bool>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub base_range_px: Option<f64>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub base_rx_threshold: Option<f64>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub fade_rate: Option<f64>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub seq_counter: Option<f64>,
}

/// Hive entry with its dedup sets as "origin#sequence" strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HiveEntry {
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub amplitude: Option<f64>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub tx_power_dbm: Option<f64>,
    #[serde(default, deserialize_with = "lenient_list", skip_serializing_if = "Vec::is_empty")]
    pub seen_data: Vec<String>,
    #[serde(default, deserialize_with = "lenient_list", skip_serializing_if = "Vec::is_empty")]
    pub seen_ack: Vec<String>,
}

/// Obstacle geometry as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ShapeEntry {
    Circle {
        #[serde(default, deserialize_with = "lenient")]
        x: Option<f64>,
        #[serde(default, deserialize_with = "lenient")]
        y: Option<f64>,
        #[serde(default, deserialize_with = "lenient")]
        radius: Option<f64>,
    },
    Polygon {
        #[serde(default, deserialize_with = "lenient_list")]
        points: Vec<Point>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObstacleEntry {
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub shape: Option<ShapeEntry>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub material: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub absorption: Option<f64>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub loss: Option<f64>,
}

/// Root structure representing a saved scene.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneFile {
    #[serde(default)]
    pub version: u32,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerEntry>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub settings: Option<SettingsEntry>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub hives: Vec<HiveEntry>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub obstacles: Vec<ObstacleEntry>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub server_seen: Vec<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub statistics: Option<Statistics>,
}

/// Outcome of a bulk-load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub hives: usize,
    pub obstacles: usize,
    pub skipped: usize,
}

fn parse_keys(keys: &[String]) -> HashSet<ProtocolKey> {
    keys.iter()
        .filter_map(|k| match k.parse::<ProtocolKey>() {
            Ok(key) => Some(key),
            Err(e) => {
                log::warn!("Skipping malformed protocol key: {}", e);
                None
            }
        })
        .collect()
}

fn sorted_keys(keys: &HashSet<ProtocolKey>) -> Vec<String> {
    let mut sorted: Vec<&ProtocolKey> = keys.iter().collect();
    sorted.sort();
    sorted.into_iter().map(ProtocolKey::to_string).collect()
}

impl From<&Obstacle> for ObstacleEntry {
    fn from(obstacle: &Obstacle) -> Self {
        let shape = match obstacle.shape() {
            ObstacleShape::Circle { center, radius } => ShapeEntry::Circle {
                x: Some(center.x),
                y: Some(center.y),
                radius: Some(*radius),
            },
            ObstacleShape::Polygon { vertices, .. } => ShapeEntry::Polygon { points: vertices.clone() },
        };
        Self {
            id: Some(obstacle.id),
            shape: Some(shape),
            material: Some(obstacle.material.as_str().to_string()),
            absorption: Some(obstacle.absorption()),
            loss: Some(obstacle.loss),
        }
    }
}

impl ObstacleEntry {
    /// Build the obstacle; id 0 asks the state for a fresh id. `None` if the geometry is unusable.
    fn to_obstacle(&self) -> Option<Obstacle> {
        let material = self.material.as_deref().map(Material::from_tag).unwrap_or_default();
        let id = self.id.unwrap_or(0);
        let mut obstacle = match &self.shape {
            Some(ShapeEntry::Polygon { points }) => Obstacle::polygon(id, points.clone(), material)?,
            Some(ShapeEntry::Circle { x, y, radius }) => {
                let center = Point::new(finite(*x).unwrap_or(0.0), finite(*y).unwrap_or(0.0));
                Obstacle::circle(id, center, finite(*radius).unwrap_or(DEFAULT_CIRCLE_RADIUS), material)
            }
            None => return None,
        };
        if let Some(absorption) = finite(self.absorption) {
            obstacle = obstacle.with_absorption(absorption);
        }
        if let Some(loss) = finite(self.loss) {
            obstacle = obstacle.with_loss(loss);
        }
        Some(obstacle)
    }
}

impl SimulationState {
    /// Capture everything but in-flight waves.
    pub fn snapshot(&self) -> SceneFile {
        let c = &self.config;
        let settings = SettingsEntry {
            spreading_factor: Some(c.spreading_factor() as f64),
            bandwidth_khz: Some(c.bandwidth_khz() as f64),
            coding_rate: Some(c.coding_rate() as f64),
            max_retransmissions: Some(c.max_retransmissions() as f64),
            meters_per_pixel: Some(c.meters_per_pixel()),
            frequency_mhz: Some(c.frequency_mhz()),
            default_tx_dbm: Some(c.default_tx_dbm()),
            realistic: Some(c.realistic()),
            base_range_px: Some(c.base_range_px()),
            base_rx_threshold: Some(c.base_rx_threshold()),
            fade_rate: Some(c.fade_rate()),
            seq_counter: Some(self.next_sequence as f64),
        };
        SceneFile {
            version: SCENE_FORMAT_VERSION,
            server: Some(ServerEntry {
                id: Some(self.server.id.clone()),
                x: Some(self.server.position.x),
                y: Some(self.server.position.y),
                tx_power_dbm: Some(self.server.tx_power_dbm),
            }),
            settings: Some(settings),
            hives: self
                .hives
                .iter()
                .map(|h| HiveEntry {
                    id: Some(h.id.clone()),
                    x: Some(h.position.x),
                    y: Some(h.position.y),
                    amplitude: Some(h.amplitude()),
                    tx_power_dbm: Some(h.tx_power_dbm),
                    seen_data: sorted_keys(&h.seen_data),
                    seen_ack: sorted_keys(&h.seen_ack),
                })
                .collect(),
            obstacles: self.obstacles.values().map(ObstacleEntry::from).collect(),
            server_seen: sorted_keys(&self.server.seen_data),
            statistics: Some(self.statistics.clone()),
        }
    }

    /// Bulk-load a scene, leniently.
    pub fn load_scene(&mut self, scene: &SceneFile, mode: LoadMode) -> LoadSummary {
        if mode == LoadMode::Replace {
            self.reset();
            if let Some(settings) = &scene.settings {
                self.apply_settings(settings);
            }
            if let Some(server) = &scene.server {
                self.apply_server(server);
            }
            if let Some(statistics) = &scene.statistics {
                self.statistics = statistics.clone();
            }
            self.server.seen_data = parse_keys(&scene.server_seen);
        } else {
            self.server.seen_data.extend(parse_keys(&scene.server_seen));
        }

        let mut summary = LoadSummary::default();
        for entry in &scene.hives {
            self.load_hive(entry);
            summary.hives += 1;
        }
        for entry in &scene.obstacles {
            match entry.to_obstacle() {
                Some(obstacle) => {
                    self.add_obstacle(obstacle);
                    summary.obstacles += 1;
                }
                None => {
                    log::warn!("Skipping obstacle {:?}: unusable geometry", entry.id);
                    summary.skipped += 1;
                }
            }
        }
        log::info!(
            "Loaded scene: {} hive(s), {} obstacle(s), {} skipped",
            summary.hives,
            summary.obstacles,
            summary.skipped
        );
        summary
    }

    fn apply_settings(&mut self, s: &SettingsEntry) {
        let c = &mut self.config;
        if let Some(v) = s.spreading_factor {
            c.set_spreading_factor(v);
        }
        if let Some(v) = s.bandwidth_khz {
            c.set_bandwidth_khz(v);
        }
        if let Some(v) = s.coding_rate {
            c.set_coding_rate(v);
        }
        if let Some(v) = s.max_retransmissions {
            c.set_max_retransmissions(v);
        }
        if let Some(v) = s.meters_per_pixel {
            c.set_meters_per_pixel(v);
        }
        if let Some(v) = s.frequency_mhz {
            c.set_frequency_mhz(v);
        }
        if let Some(v) = s.default_tx_dbm {
            c.set_default_tx_dbm(v);
        }
        if let Some(v) = s.realistic {
            c.set_realistic(v);
        }
        if let Some(v) = s.base_range_px {
            c.set_base_range_px(v);
        }
        if let Some(v) = s.base_rx_threshold {
            c.set_base_rx_threshold(v);
        }
        if let Some(v) = s.fade_rate {
            c.set_fade_rate(v);
        }
        if let Some(v) = finite(s.seq_counter) {
            self.next_sequence = v.floor().max(1.0) as u64;
        }
    }

    fn apply_server(&mut self, s: &ServerEntry) {
        if let Some(id) = s.id.as_deref().map(str::trim).filter(|id| !id.is_empty()) {
            self.server.id = id.to_string();
        }
        if let Some(x) = finite(s.x) {
            self.server.position.x = x;
        }
        if let Some(y) = finite(s.y) {
            self.server.position.y = y;
        }
        if let Some(tx) = finite(s.tx_power_dbm) {
            self.config.set_server_tx_dbm(tx);
            self.server.set_tx_power_dbm(tx);
        }
    }

    fn load_hive(&mut self, entry: &HiveEntry) {
        let requested = entry.id.as_deref().map(str::trim).filter(|id| !id.is_empty());
        let id = match requested {
            Some(id) if !self.is_node_id_taken(id) => id.to_string(),
            Some(id) => {
                let fresh = self.generate_hive_id();
                log::warn!("Hive id {} already in use, loading it as {}", id, fresh);
                fresh
            }
            None => self.generate_hive_id(),
        };
        let position = Point::new(finite(entry.x).unwrap_or(0.0), finite(entry.y).unwrap_or(0.0));
        let mut hive = Node::hive(id, position, finite(entry.tx_power_dbm).unwrap_or(self.config.default_tx_dbm()));
        if let Some(amplitude) = finite(entry.amplitude) {
            hive.set_amplitude(amplitude);
        }
        hive.seen_data = parse_keys(&entry.seen_data);
        hive.seen_ack = parse_keys(&entry.seen_ack);
        self.insert_hive(hive);
    }
}

/// Parse and validate scene JSON.
pub fn parse_scene(data: &str) -> Result<SceneFile, SceneLoadError> {
    let scene: SceneFile = serde_json::from_str(data)
        .context("Invalid JSON format")
        .map_err(|e| SceneLoadError::ParseError(format!("{:#}", e)))?;
    validate_scene(&scene).map_err(SceneLoadError::ValidationError)?;
    Ok(scene)
}

/// Reject scenes this build cannot interpret. Entry-level problems are handled leniently on load.
pub fn validate_scene(scene: &SceneFile) -> Result<(), String> {
    if scene.version > SCENE_FORMAT_VERSION {
        return Err(format!(
            "Scene format version {} is newer than supported version {}",
            scene.version, SCENE_FORMAT_VERSION
        ));
    }
    Ok(())
}

/// Load and parse a scene from a file.
///
/// # Parameters
///
/// * `path` - Path to the scene JSON file
///
/// # Returns
///
/// Parsed and validated scene or an error.
pub fn load_scene_file(path: &str) -> Result<SceneFile, SceneLoadError> {
    let data = fs::read_to_string(path)
        .with_context(|| path.to_string())
        .map_err(|e| SceneLoadError::FileReadError(format!("{:#}", e)))?;
    parse_scene(&data)
}

/// Write a scene as pretty-printed JSON.
pub fn save_scene_file(path: &str, scene: &SceneFile) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(scene).context("Failed to serialize scene")?;
    fs::write(path, json).with_context(|| format!("Failed to write file: {}", path))?;
    Ok(())
}
