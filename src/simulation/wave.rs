//! In-flight transmissions.
//!
//! A wave is one transmission attempt expanding from its emitter. It carries:
//! - the logical payload and remaining TTL
//! - a frozen maximum radius computed at emission
//! - 72 angular sectors of 5° with independent attenuation multipliers
//! - the sets of obstacles already applied and nodes already evaluated
//!
//! Radius follows a fixed 10 s eased timeline; see [`ease`].

use super::types::{Bounds, ObstacleId, Payload, Point, ProtocolKey, WaveKind};
use std::collections::HashSet;
use std::f64::consts::TAU;

pub const SECTOR_COUNT: usize = 72;
pub const SECTOR_ANGLE: f64 = TAU / SECTOR_COUNT as f64;

/// Time for a wave to reach its maximum radius.
pub const WAVE_DURATION_MS: f64 = 10_000.0;

/// Realistic-mode waves stay alive until this fraction of the duration.
pub const LIVENESS_PROGRESS_LIMIT: f64 = 1.1;

/// Floor of the realistic-mode fade.
pub const MIN_REALISTIC_FADE: f64 = 0.05;

/// Frame length the simplified fade rate is expressed in.
pub const REFERENCE_FRAME_MS: f64 = 16.67;

pub type WaveId = u64;

/// Three-phase easing of the radius over normalized time.
///
/// ```text
/// p < 0.2        0.05 × p
/// 0.2 ≤ p < 0.6  0.01 + 0.39 × ((p - 0.2) / 0.4)⁴
/// p ≥ 0.6        0.4 + 0.6 × (1 - (1 - (p - 0.6) / 0.4)^1.2)
/// ```
///
/// Input is clamped to [0, 1]; `ease(1.0) == 1.0`.
pub fn ease(progress: f64) -> f64 {
    let p = progress.clamp(0.0, 1.0);
    if p < 0.2 {
        p * 0.05
    } else if p < 0.6 {
        let t = (p - 0.2) / 0.4;
        0.01 + 0.39 * t.powi(4)
    } else {
        let t = (p - 0.6) / 0.4;
        0.4 + 0.6 * (1.0 - (1.0 - t).powf(1.2))
    }
}

/// Sector index of an angle in radians (any range).
pub fn angle_to_sector(theta: f64) -> usize {
    let t = theta.rem_euclid(TAU);
    ((t / SECTOR_ANGLE).floor() as usize) % SECTOR_COUNT
}

#[derive(Debug, Clone)]
pub struct Wave {
    pub id: WaveId,
    pub origin: Point,
    pub emitter_id: String,
    pub kind: WaveKind,
    pub payload: Payload,
    pub ttl: i32,
    pub radius: f64,
    pub fade: f64,
    pub max_radius: f64,
    pub created_at_ms: f64,
    last_update_ms: f64,
    sectors: [f64; SECTOR_COUNT],
    applied_obstacles: HashSet<ObstacleId>,
    evaluated_nodes: HashSet<String>,
}

impl Wave {
    #[allow(clippy::too_many_arguments)]
    pub fn new(id: WaveId, origin: Point, emitter_id: String, kind: WaveKind, payload: Payload, ttl: i32, max_radius: f64, initial_fade: f64, now_ms: f64) -> Self {
        Self {
            id,
            origin,
            emitter_id,
            kind,
            payload,
            ttl,
            radius: 0.0,
            fade: initial_fade,
            max_radius,
            created_at_ms: now_ms,
            last_update_ms: now_ms,
            sectors: [1.0; SECTOR_COUNT],
            applied_obstacles: HashSet::new(),
            evaluated_nodes: HashSet::new(),
        }
    }

    /// Elapsed fraction of the wave duration, not clamped above.
    pub fn progress(&self, now_ms: f64) -> f64 {
        ((now_ms - self.created_at_ms) / WAVE_DURATION_MS).max(0.0)
    }

    /// Move the wave's start to `now_ms` without touching its geometry or sectors.
    pub fn restart_at(&mut self, now_ms: f64) {
        self.created_at_ms = now_ms;
        self.last_update_ms = now_ms;
    }

    pub fn is_alive(&self, now_ms: f64, realistic: bool) -> bool {
        let within_lifetime = if realistic { self.progress(now_ms) < LIVENESS_PROGRESS_LIMIT } else { self.fade > 0.0 };
        within_lifetime && self.ttl >= 0
    }

    /// Grow the radius along the eased timeline and update the global fade.
    ///
    /// Realistic mode derives fade from the covered fraction of the maximum
    /// radius. Simplified mode subtracts `fade_rate` per reference frame of
    /// elapsed time.
    pub fn advance(&mut self, now_ms: f64, realistic: bool, fade_rate: f64) {
        let cap = self.max_radius;
        self.radius = (cap * ease(self.progress(now_ms))).min(cap);
        if realistic {
            self.fade = if cap > 0.0 { (1.0 - self.radius / cap).max(MIN_REALISTIC_FADE) } else { MIN_REALISTIC_FADE };
        } else {
            let dt = (now_ms - self.last_update_ms).max(0.0);
            self.fade = (self.fade - fade_rate * (dt / REFERENCE_FRAME_MS)).max(0.0);
        }
        self.last_update_ms = now_ms;
    }

    /// Square enclosing the current disc.
    pub fn bounding_box(&self) -> Bounds {
        Bounds::around(&self.origin, self.radius)
    }

    pub fn sector_of(&self, target: &Point) -> usize {
        angle_to_sector((target.y - self.origin.y).atan2(target.x - self.origin.x))
    }

    pub fn sectors(&self) -> &[f64; SECTOR_COUNT] {
        &self.sectors
    }

    pub fn sector_weight(&self, sector: usize) -> f64 {
        self.sectors[sector % SECTOR_COUNT]
    }

    /// Global fade times the sector multiplier.
    pub fn combined_weight(&self, sector: usize) -> f64 {
        self.fade * self.sector_weight(sector)
    }

    /// Multiply every sector by `factor` (clamped to [0, 1], so weights only decrease).
    pub fn attenuate_all(&mut self, factor: f64) {
        let factor = if factor.is_finite() { factor.clamp(0.0, 1.0) } else { 0.0 };
        for s in self.sectors.iter_mut() {
            *s *= factor;
        }
    }

    /// Returns `true` the first time an obstacle is recorded for this wave.
    pub fn mark_obstacle_applied(&mut self, id: ObstacleId) -> bool {
        self.applied_obstacles.insert(id)
    }

    pub fn is_obstacle_applied(&self, id: ObstacleId) -> bool {
        self.applied_obstacles.contains(&id)
    }

    /// Returns `true` the first time a node is evaluated against this wave.
    pub fn mark_evaluated(&mut self, node_id: &str) -> bool {
        self.evaluated_nodes.insert(node_id.to_string())
    }

    pub fn is_evaluated(&self, node_id: &str) -> bool {
        self.evaluated_nodes.contains(node_id)
    }

    pub fn key(&self) -> ProtocolKey {
        self.payload.key()
    }
}
