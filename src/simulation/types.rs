//! Type definitions for the simulation.
//!
//! Contains the data model shared by every engine component:
//! - Planar geometry primitives (points, axis-aligned bounds)
//! - Obstacles and the materials they are made of
//! - Nodes (the collection server and the battery hives) with their dedup state
//! - Protocol keys, payloads and the events published to collaborators

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Identifier the collection server carries unless a scene renames it.
pub const DEFAULT_SERVER_ID: &str = "Central Server";

/// Absorption coefficient bounds (attenuation per meter).
pub const MIN_ABSORPTION: f64 = 0.00001;
pub const MAX_ABSORPTION: f64 = 5.0;

/// Upper bound of the display-only loss fraction.
pub const MAX_LOSS_FRACTION: f64 = 0.95;

/// Circle obstacle radius bounds and default, in world units (px).
pub const MIN_CIRCLE_RADIUS: f64 = 5.0;
pub const MAX_CIRCLE_RADIUS: f64 = 240.0;
pub const DEFAULT_CIRCLE_RADIUS: f64 = 40.0;

/// Relative amplitude knob bounds for hives (simplified propagation only).
pub const MIN_AMPLITUDE: f64 = 0.2;
pub const MAX_AMPLITUDE: f64 = 2.0;

/// Transmit power bounds in dBm.
pub const MIN_TX_DBM: f64 = 0.0;
pub const MAX_TX_DBM: f64 = 30.0;

/// Half-size of the box a hive occupies in the spatial index.
pub const NODE_INDEX_PADDING: f64 = 20.0;

/// Simple 2D point in world coordinates (px).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Axis-aligned bounding box. Intersection tests are inclusive on every edge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Bounds {
    /// Square of half-size `half` centered on `center`.
    pub fn around(center: &Point, half: f64) -> Self {
        Self {
            min_x: center.x - half,
            min_y: center.y - half,
            max_x: center.x + half,
            max_y: center.y + half,
        }
    }

    /// Tight bounds of a point set, `None` when the set is empty.
    pub fn from_points(points: &[Point]) -> Option<Self> {
        let first = points.first()?;
        let mut bounds = Self {
            min_x: first.x,
            min_y: first.y,
            max_x: first.x,
            max_y: first.y,
        };
        for p in &points[1..] {
            bounds.min_x = bounds.min_x.min(p.x);
            bounds.min_y = bounds.min_y.min(p.y);
            bounds.max_x = bounds.max_x.max(p.x);
            bounds.max_y = bounds.max_y.max(p.y);
        }
        Some(bounds)
    }

    pub fn intersects(&self, other: &Bounds) -> bool {
        !(self.max_x < other.min_x || other.max_x < self.min_x || self.max_y < other.min_y || other.max_y < self.min_y)
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }
}

/// Physical material an obstacle is made of.
///
/// Each material maps to an absorption coefficient α (per meter) used by the
/// exponential attenuation model, and to a nominal loss in dB shown to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Material {
    Brick,
    Concrete,
    Forest,
    Field,
    Water,
    Rock,
    UrbanMix,
    Metal,
    Wood,
    Sand,
    #[default]
    Default,
}

impl Material {
    pub const ALL: [Material; 11] = [
        Material::Brick,
        Material::Concrete,
        Material::Forest,
        Material::Field,
        Material::Water,
        Material::Rock,
        Material::UrbanMix,
        Material::Metal,
        Material::Wood,
        Material::Sand,
        Material::Default,
    ];

    /// Absorption coefficient α in 1/m.
    pub fn absorption(self) -> f64 {
        match self {
            Material::Brick => 0.35,
            Material::Concrete => 1.15,
            Material::Forest => 0.15,
            Material::Field => 0.03,
            Material::Water => 3.0,
            Material::Rock => 1.8,
            Material::UrbanMix => 0.25,
            Material::Metal => 2.5,
            Material::Wood => 0.05,
            Material::Sand => 0.08,
            Material::Default => 0.1,
        }
    }

    /// Nominal loss in dB, display only.
    pub fn loss_db(self) -> f64 {
        match self {
            Material::Brick => 1.5,
            Material::Concrete => 5.0,
            Material::Forest => 0.65,
            Material::Field => 0.13,
            Material::Water => 13.0,
            Material::Rock => 7.8,
            Material::UrbanMix => 1.1,
            Material::Metal => 10.8,
            Material::Wood => 0.2,
            Material::Sand => 0.35,
            Material::Default => 0.43,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Material::Brick => "brick",
            Material::Concrete => "concrete",
            Material::Forest => "forest",
            Material::Field => "field",
            Material::Water => "water",
            Material::Rock => "rock",
            Material::UrbanMix => "urban_mix",
            Material::Metal => "metal",
            Material::Wood => "wood",
            Material::Sand => "sand",
            Material::Default => "default",
        }
    }

    /// Parse a material tag. Unknown tags map to `Material::Default`.
    pub fn from_tag(tag: &str) -> Material {
        let tag = tag.trim();
        Material::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(tag))
            .unwrap_or_default()
    }
}

impl fmt::Display for Material {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Clamp an absorption coefficient to (0.00001, 5]. Non-finite input falls back to the floor.
pub fn clamp_absorption(value: f64) -> f64 {
    if value.is_finite() { value.clamp(MIN_ABSORPTION, MAX_ABSORPTION) } else { MIN_ABSORPTION }
}

/// Clamp a display loss fraction to [0, 0.95].
pub fn clamp_loss(value: f64) -> f64 {
    if value.is_finite() { value.clamp(0.0, MAX_LOSS_FRACTION) } else { 0.0 }
}

pub type ObstacleId = u32;

/// Obstacle geometry.
///
/// Polygon bounds are cached and recomputed by every mutation that moves a
/// vertex, which is why the shape is only reachable read-only from outside.
#[derive(Debug, Clone, PartialEq)]
pub enum ObstacleShape {
    Circle { center: Point, radius: f64 },
    Polygon { vertices: Vec<Point>, bounds: Bounds },
}

/// Static obstacle attenuating waves that sweep over it.
#[derive(Debug, Clone, PartialEq)]
pub struct Obstacle {
    pub id: ObstacleId,
    pub material: Material,
    /// Display-only loss fraction in [0, 0.95].
    pub loss: f64,
    shape: ObstacleShape,
    absorption: f64,
}

impl Obstacle {
    /// Circular obstacle; the radius is clamped to the editable range.
    pub fn circle(id: ObstacleId, center: Point, radius: f64, material: Material) -> Self {
        let absorption = clamp_absorption(material.absorption());
        Self {
            id,
            material,
            loss: clamp_loss(absorption * 0.1),
            shape: ObstacleShape::Circle {
                center,
                radius: clamp_radius(radius),
            },
            absorption,
        }
    }

    /// Polygon obstacle. Returns `None` unless at least three finite vertices remain.
    pub fn polygon(id: ObstacleId, vertices: Vec<Point>, material: Material) -> Option<Self> {
        let vertices: Vec<Point> = vertices.into_iter().filter(Point::is_finite).collect();
        if vertices.len() < 3 {
            return None;
        }
        let bounds = Bounds::from_points(&vertices)?;
        let absorption = clamp_absorption(material.absorption());
        Some(Self {
            id,
            material,
            loss: clamp_loss(absorption * 0.1),
            shape: ObstacleShape::Polygon { vertices, bounds },
            absorption,
        })
    }

    /// Override the material's absorption coefficient. The display loss follows it.
    pub fn with_absorption(mut self, absorption: f64) -> Self {
        self.absorption = clamp_absorption(absorption);
        self.loss = clamp_loss(self.absorption * 0.1);
        self
    }

    pub fn with_loss(mut self, loss: f64) -> Self {
        self.loss = clamp_loss(loss);
        self
    }

    pub fn shape(&self) -> &ObstacleShape {
        &self.shape
    }

    pub fn absorption(&self) -> f64 {
        self.absorption
    }

    pub fn set_absorption(&mut self, absorption: f64) {
        self.absorption = clamp_absorption(absorption);
    }

    /// Switch material; absorption resets to the material's coefficient.
    pub fn set_material(&mut self, material: Material) {
        self.material = material;
        self.absorption = clamp_absorption(material.absorption());
    }

    /// Resize a circle. Polygons are left untouched and `false` is returned.
    pub fn set_radius(&mut self, new_radius: f64) -> bool {
        match &mut self.shape {
            ObstacleShape::Circle { radius, .. } => {
                *radius = clamp_radius(new_radius);
                true
            }
            ObstacleShape::Polygon { .. } => false,
        }
    }

    pub fn bounds(&self) -> Bounds {
        match &self.shape {
            ObstacleShape::Circle { center, radius } => Bounds::around(center, *radius),
            ObstacleShape::Polygon { bounds, .. } => *bounds,
        }
    }

    /// Move the obstacle by (dx, dy), keeping polygon bounds in sync.
    pub fn translate(&mut self, dx: f64, dy: f64) {
        match &mut self.shape {
            ObstacleShape::Circle { center, .. } => {
                center.x += dx;
                center.y += dy;
            }
            ObstacleShape::Polygon { vertices, bounds } => {
                for v in vertices.iter_mut() {
                    v.x += dx;
                    v.y += dy;
                }
                if let Some(b) = Bounds::from_points(vertices) {
                    *bounds = b;
                }
            }
        }
    }

    /// Approximate path length through the obstacle, in world units.
    ///
    /// Polygons use half of their smaller bounding dimension, circles their diameter.
    pub fn thickness(&self) -> f64 {
        match &self.shape {
            ObstacleShape::Circle { radius, .. } => radius * 2.0,
            ObstacleShape::Polygon { bounds, .. } => bounds.width().min(bounds.height()) * 0.5,
        }
    }
}

fn clamp_radius(radius: f64) -> f64 {
    if radius.is_finite() { radius.clamp(MIN_CIRCLE_RADIUS, MAX_CIRCLE_RADIUS) } else { DEFAULT_CIRCLE_RADIUS }
}

/// Identifies one logical message across all of its flooded copies.
///
/// Rendered as `origin#sequence`, which is also the persisted form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProtocolKey {
    pub origin: String,
    pub sequence: u64,
}

impl ProtocolKey {
    pub fn new(origin: impl Into<String>, sequence: u64) -> Self {
        Self {
            origin: origin.into(),
            sequence,
        }
    }
}

impl fmt::Display for ProtocolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.origin, self.sequence)
    }
}

impl FromStr for ProtocolKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Node ids may contain '#', the sequence never does
        let (origin, sequence) = s.rsplit_once('#').ok_or_else(|| format!("missing '#' in protocol key '{}'", s))?;
        let sequence = sequence.parse::<u64>().map_err(|e| format!("invalid sequence in protocol key '{}': {}", s, e))?;
        Ok(Self::new(origin, sequence))
    }
}

/// Node role. Only hives carry the amplitude knob.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NodeKind {
    Server,
    Hive { amplitude: f64 },
}

/// Mesh node with position, radio power and dedup state.
///
/// `seen_data` / `seen_ack` only grow during a run; they are cleared by a
/// full reset only.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: String,
    pub kind: NodeKind,
    pub position: Point,
    pub tx_power_dbm: f64,
    pub seen_data: HashSet<ProtocolKey>,
    pub seen_ack: HashSet<ProtocolKey>,
}

impl Node {
    pub fn server(id: impl Into<String>, position: Point, tx_power_dbm: f64) -> Self {
        Self {
            id: id.into(),
            kind: NodeKind::Server,
            position,
            tx_power_dbm: clamp_tx_dbm(tx_power_dbm),
            seen_data: HashSet::new(),
            seen_ack: HashSet::new(),
        }
    }

    pub fn hive(id: impl Into<String>, position: Point, tx_power_dbm: f64) -> Self {
        Self {
            id: id.into(),
            kind: NodeKind::Hive { amplitude: 1.0 },
            position,
            tx_power_dbm: clamp_tx_dbm(tx_power_dbm),
            seen_data: HashSet::new(),
            seen_ack: HashSet::new(),
        }
    }

    /// Amplitude seeding a new wave's fade. The server always transmits at 1.0.
    pub fn amplitude(&self) -> f64 {
        match self.kind {
            NodeKind::Server => 1.0,
            NodeKind::Hive { amplitude } => amplitude,
        }
    }

    pub fn set_amplitude(&mut self, value: f64) {
        if let NodeKind::Hive { amplitude } = &mut self.kind {
            *amplitude = if value.is_finite() { value.clamp(MIN_AMPLITUDE, MAX_AMPLITUDE) } else { 1.0 };
        }
    }

    pub fn set_tx_power_dbm(&mut self, value: f64) {
        self.tx_power_dbm = clamp_tx_dbm(value);
    }

    pub fn index_bounds(&self) -> Bounds {
        Bounds::around(&self.position, NODE_INDEX_PADDING)
    }
}

/// Clamp a transmit power to [0, 30] dBm.
pub fn clamp_tx_dbm(value: f64) -> f64 {
    if value.is_finite() { value.clamp(MIN_TX_DBM, MAX_TX_DBM) } else { MIN_TX_DBM }
}

/// Wave type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaveKind {
    Data,
    Ack,
}

impl fmt::Display for WaveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaveKind::Data => write!(f, "DATA"),
            WaveKind::Ack => write!(f, "ACK"),
        }
    }
}

/// Logical message carried by a wave. ACKs carry the payload of the DATA they confirm.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    pub origin: String,
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
    /// Simulated sensor reading in °C.
    pub temperature_c: f64,
    pub hops: u32,
}

impl Payload {
    pub fn key(&self) -> ProtocolKey {
        ProtocolKey::new(self.origin.clone(), self.sequence)
    }
}

/// Observable outcome of an emission or reception, drained by collaborators.
#[derive(Debug, Clone, PartialEq)]
pub enum SimulationEvent {
    WaveEmitted {
        emitter: String,
        kind: WaveKind,
        key: ProtocolKey,
        ttl: i32,
        max_radius: f64,
    },
    DeliveredToServer {
        key: ProtocolKey,
        hops: u32,
    },
    DuplicateIgnored {
        node: String,
        key: ProtocolKey,
    },
    OriginAcknowledged {
        node: String,
        key: ProtocolKey,
        hops: u32,
        latency_ms: Option<f64>,
    },
    Relayed {
        node: String,
        kind: WaveKind,
        key: ProtocolKey,
        ttl: i32,
    },
    TtlDrop {
        node: String,
        key: ProtocolKey,
    },
    ShadowDrop {
        node: String,
        emitter: String,
        kind: WaveKind,
    },
}
