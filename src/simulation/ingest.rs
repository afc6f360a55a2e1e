//! Incremental bulk ingestion.
//!
//! A producer (usually the GeoJSON importer on its own thread) pushes
//! [`IngestMessage`]s into a bounded [`IngestQueue`]. The simulation loop
//! drains the queue between ticks; every batch is integrated completely
//! (collections and spatial index) before the next tick observes the state.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

use super::network::SimulationState;
use super::types::{Material, Node, Obstacle, Point};

/// Depth of the ingestion channel. Small so a fast producer is throttled by the tick loop.
pub const INGEST_QUEUE_SIZE: usize = 8;
/// Bounded channel carrying parsed entities from a producer to the simulation loop.
pub type IngestQueue = embassy_sync::channel::Channel<CriticalSectionRawMutex, IngestMessage, INGEST_QUEUE_SIZE>;

/// One parsed entity ready to be added to the scene.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestItem {
    /// A hive, or the server when `name` is "server" (case-insensitive).
    Point { position: Point, name: Option<String> },
    Polygon {
        vertices: Vec<Point>,
        material: Material,
        absorption: f64,
        loss: Option<f64>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum IngestMessage {
    Batch(Vec<IngestItem>),
    Progress { processed: usize, total: usize },
    Done { processed: usize, features: usize },
    /// Input was rejected; nothing from this import reached the scene.
    Failed(String),
}

/// Counts for one integrated batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub hives: usize,
    pub obstacles: usize,
    pub server_moved: bool,
    pub skipped: usize,
}

impl IngestSummary {
    fn merge(&mut self, other: IngestSummary) {
        self.hives += other.hives;
        self.obstacles += other.obstacles;
        self.server_moved |= other.server_moved;
        self.skipped += other.skipped;
    }
}

/// State of an import as seen by the consumer after a drain.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestStatus {
    InProgress { processed: usize, total: usize },
    Finished { processed: usize, features: usize },
    Failed(String),
}

impl SimulationState {
    /// Add one batch of entities. Items with unusable geometry are skipped.
    pub fn ingest_batch(&mut self, items: Vec<IngestItem>) -> IngestSummary {
        let mut summary = IngestSummary::default();
        for item in items {
            match item {
                IngestItem::Point { position, name } => {
                    if !position.is_finite() {
                        summary.skipped += 1;
                        continue;
                    }
                    if name.as_deref().is_some_and(|n| n.eq_ignore_ascii_case("server")) {
                        let server_id = self.server.id.clone();
                        self.move_node(&server_id, position);
                        summary.server_moved = true;
                    } else {
                        let id = self.generate_hive_id();
                        let hive = Node::hive(id, position, self.config.default_tx_dbm());
                        self.insert_hive(hive);
                        summary.hives += 1;
                    }
                }
                IngestItem::Polygon {
                    vertices,
                    material,
                    absorption,
                    loss,
                } => {
                    let Some(obstacle) = Obstacle::polygon(0, vertices, material) else {
                        summary.skipped += 1;
                        continue;
                    };
                    let mut obstacle = obstacle.with_absorption(absorption);
                    if let Some(loss) = loss {
                        obstacle = obstacle.with_loss(loss);
                    }
                    self.add_obstacle(obstacle);
                    summary.obstacles += 1;
                }
            }
        }
        summary
    }
}

/// Integrate everything currently queued.
///
/// Returns the latest status message seen, or `None` when the queue was empty.
pub fn drain_ingest_queue(state: &mut SimulationState, queue: &IngestQueue) -> Option<IngestStatus> {
    let mut status = None;
    let mut ingested = IngestSummary::default();
    while let Ok(message) = queue.try_receive() {
        match message {
            IngestMessage::Batch(items) => ingested.merge(state.ingest_batch(items)),
            IngestMessage::Progress { processed, total } => {
                log::debug!("Geo import progress: {}/{}", processed, total);
                status = Some(IngestStatus::InProgress { processed, total });
            }
            IngestMessage::Done { processed, features } => {
                log::info!("Geo import finished: {} of {} features processed", processed, features);
                status = Some(IngestStatus::Finished { processed, features });
            }
            IngestMessage::Failed(reason) => {
                log::warn!("Geo import failed: {}", reason);
                status = Some(IngestStatus::Failed(reason));
            }
        }
    }
    if ingested != IngestSummary::default() {
        log::debug!(
            "Ingested {} hive(s), {} obstacle(s), skipped {}",
            ingested.hives,
            ingested.obstacles,
            ingested.skipped
        );
    }
    status
}
