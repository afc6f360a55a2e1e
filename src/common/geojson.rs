//! GeoJSON import.
//!
//! Converts a FeatureCollection into [`IngestItem`] batches:
//! - `Point` features become hives, or relocate the server when named "server"
//! - `Polygon` / `MultiPolygon` exterior rings become polygon obstacles after
//!   area filtering, Douglas-Peucker simplification and projection to pixels
//!
//! Parsing validates the whole document up front, so a rejected file never
//! produces a batch.

use serde_json::{Map, Value};

use crate::simulation::ingest::{IngestItem, IngestMessage};
use crate::simulation::types::{Material, Point};

/// WGS84 equatorial radius in meters.
const EARTH_RADIUS_M: f64 = 6_378_137.0;
/// Features between two progress messages.
const PROGRESS_INTERVAL: usize = 5000;
/// Absorption used when a feature names its material but gives no `k`.
const DEFAULT_TAGGED_ABSORPTION: f64 = 0.35;

/// Tag rules checked in order; the first property containing one of the words wins.
const MATERIAL_RULES: &[(&str, &[&str], Material)] = &[
    ("building", &["industrial", "warehouse", "bunker"], Material::Concrete),
    ("building", &["yes", "house", "residential", "commercial"], Material::Brick),
    ("landuse", &["forest", "wood", "scrub"], Material::Forest),
    ("landuse", &["grass", "meadow", "pasture", "farmland"], Material::Field),
    ("natural", &["water", "wetland", "river", "lake"], Material::Water),
    ("natural", &["rock", "mountain"], Material::Rock),
    ("landuse", &["urban", "residential"], Material::UrbanMix),
    ("landuse", &["military"], Material::Metal),
    ("landuse", &["cemetery", "park"], Material::Wood),
    ("natural", &["sand", "beach"], Material::Sand),
];

#[derive(Debug, Clone, PartialEq)]
pub struct GeoImportOptions {
    /// Geographic position mapped to pixel (0, 0).
    pub origin_lat: f64,
    pub origin_lon: f64,
    pub meters_per_pixel: f64,
    /// Douglas-Peucker tolerance in degrees (about 1 m at the equator by default).
    pub simplify_tolerance: f64,
    /// Rings smaller than this, in square degrees, are dropped.
    pub min_area_deg2: f64,
    pub batch_size: usize,
}

impl Default for GeoImportOptions {
    fn default() -> Self {
        Self {
            origin_lat: 0.0,
            origin_lon: 0.0,
            meters_per_pixel: 2.0,
            simplify_tolerance: 0.00001,
            min_area_deg2: 5e-8,
            batch_size: 1000,
        }
    }
}

impl GeoImportOptions {
    pub fn new(origin_lat: f64, origin_lon: f64, meters_per_pixel: f64) -> Self {
        Self {
            origin_lat,
            origin_lon,
            meters_per_pixel,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GeoImportError {
    InvalidJson(String),
    NotFeatureCollection,
}

impl std::fmt::Display for GeoImportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GeoImportError::InvalidJson(msg) => write!(f, "Invalid GeoJSON: {}", msg),
            GeoImportError::NotFeatureCollection => write!(f, "Must be a FeatureCollection"),
        }
    }
}

impl std::error::Error for GeoImportError {}

/// A validated FeatureCollection waiting to be converted.
#[derive(Debug)]
pub struct GeoImport {
    features: Vec<Value>,
    options: GeoImportOptions,
}

impl GeoImport {
    pub fn parse(text: &str, options: GeoImportOptions) -> Result<Self, GeoImportError> {
        let document: Value = serde_json::from_str(text).map_err(|e| GeoImportError::InvalidJson(e.to_string()))?;
        if document.get("type").and_then(Value::as_str) != Some("FeatureCollection") {
            return Err(GeoImportError::NotFeatureCollection);
        }
        let features = match document.get("features") {
            Some(Value::Array(features)) => features.clone(),
            _ => Vec::new(),
        };
        Ok(Self { features, options })
    }

    pub fn feature_count(&self) -> usize {
        self.features.len()
    }

    /// Convert every feature, handing batches, progress and completion to `sink`.
    pub fn run(self, mut sink: impl FnMut(IngestMessage)) {
        let total = self.features.len();
        let batch_size = self.options.batch_size.max(1);
        let mut batch = Vec::with_capacity(batch_size.min(total));
        let mut processed = 0;

        for feature in &self.features {
            convert_feature(feature, &self.options, &mut batch);
            processed += 1;

            if batch.len() >= batch_size {
                sink(IngestMessage::Batch(std::mem::take(&mut batch)));
            }
            if processed % PROGRESS_INTERVAL == 0 {
                sink(IngestMessage::Progress { processed, total });
            }
        }

        if !batch.is_empty() {
            sink(IngestMessage::Batch(batch));
        }
        sink(IngestMessage::Done {
            processed,
            features: total,
        });
    }

    /// Convert everything at once, without batching.
    pub fn into_items(self) -> Vec<IngestItem> {
        let mut items = Vec::new();
        self.run(|message| {
            if let IngestMessage::Batch(batch) = message {
                items.extend(batch);
            }
        });
        items
    }
}

fn convert_feature(feature: &Value, options: &GeoImportOptions, out: &mut Vec<IngestItem>) {
    let empty = Map::new();
    let properties = feature.get("properties").and_then(Value::as_object).unwrap_or(&empty);
    let Some(geometry) = feature.get("geometry") else {
        return;
    };
    let coordinates = geometry.get("coordinates");

    match geometry.get("type").and_then(Value::as_str) {
        Some("Point") => {
            let Some((lon, lat)) = coordinates.and_then(coordinate) else {
                return;
            };
            out.push(IngestItem::Point {
                position: project(lat, lon, options),
                name: properties.get("name").and_then(Value::as_str).map(str::to_string),
            });
        }
        Some("Polygon") => {
            if let Some(polygon) = coordinates {
                convert_polygon(polygon, properties, options, out);
            }
        }
        Some("MultiPolygon") => {
            for polygon in coordinates.and_then(Value::as_array).into_iter().flatten() {
                convert_polygon(polygon, properties, options, out);
            }
        }
        _ => {}
    }
}

/// Convert the exterior ring of one polygon's coordinate array.
fn convert_polygon(polygon: &Value, properties: &Map<String, Value>, options: &GeoImportOptions, out: &mut Vec<IngestItem>) {
    let Some(exterior) = polygon.as_array().and_then(|rings| rings.first()).and_then(Value::as_array) else {
        return;
    };
    let ring: Vec<(f64, f64)> = exterior.iter().filter_map(coordinate).collect();

    if ring_area(&ring) < options.min_area_deg2 {
        return;
    }
    let simplified = simplify_ring(&ring, options.simplify_tolerance);
    if simplified.len() < 3 {
        return;
    }

    let mut vertices: Vec<Point> = simplified.iter().map(|&(lon, lat)| project(lat, lon, options)).collect();
    // Closed rings repeat the first vertex
    if vertices.len() > 3 && vertices.first() == vertices.last() {
        vertices.pop();
    }

    let (material, absorption) = material_for_properties(properties);
    let absorption = properties.get("absorption").and_then(Value::as_f64).unwrap_or(absorption);
    let loss = properties.get("loss").and_then(Value::as_f64);
    out.push(IngestItem::Polygon {
        vertices,
        material,
        absorption,
        loss,
    });
}

/// Read a `[lon, lat, ...]` position.
fn coordinate(value: &Value) -> Option<(f64, f64)> {
    let position = value.as_array()?;
    let lon = position.first()?.as_f64()?;
    let lat = position.get(1)?.as_f64()?;
    (lon.is_finite() && lat.is_finite()).then_some((lon, lat))
}

/// Equirectangular projection around the import origin. North is up (negative y).
pub fn project(lat: f64, lon: f64, options: &GeoImportOptions) -> Point {
    let x = (lon - options.origin_lon).to_radians() * EARTH_RADIUS_M * options.origin_lat.to_radians().cos();
    let y = (lat - options.origin_lat).to_radians() * EARTH_RADIUS_M;
    Point::new(x / options.meters_per_pixel, -y / options.meters_per_pixel)
}

/// Shoelace area of a ring given as `(lon, lat)` pairs, in square degrees.
pub fn ring_area(ring: &[(f64, f64)]) -> f64 {
    let twice: f64 = ring.windows(2).map(|w| w[0].0 * w[1].1 - w[1].0 * w[0].1).sum();
    twice.abs() / 2.0
}

fn segment_distance2(p: (f64, f64), a: (f64, f64), b: (f64, f64)) -> f64 {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let len2 = dx * dx + dy * dy;
    let t = if len2 == 0.0 {
        0.0
    } else {
        (((p.0 - a.0) * dx + (p.1 - a.1) * dy) / len2).clamp(0.0, 1.0)
    };
    let (px, py) = (a.0 + t * dx, a.1 + t * dy);
    (p.0 - px).powi(2) + (p.1 - py).powi(2)
}

/// Douglas-Peucker simplification. Both endpoints are always kept.
pub fn simplify_ring(points: &[(f64, f64)], tolerance: f64) -> Vec<(f64, f64)> {
    if points.len() < 3 {
        return points.to_vec();
    }
    let tolerance2 = tolerance * tolerance;
    let mut keep = vec![false; points.len()];
    keep[0] = true;
    keep[points.len() - 1] = true;

    let mut spans = vec![(0, points.len() - 1)];
    while let Some((first, last)) = spans.pop() {
        let mut farthest = None;
        let mut max_distance2 = 0.0;
        for i in first + 1..last {
            let d2 = segment_distance2(points[i], points[first], points[last]);
            if d2 > max_distance2 {
                farthest = Some(i);
                max_distance2 = d2;
            }
        }
        if let Some(i) = farthest {
            if max_distance2 > tolerance2 {
                keep[i] = true;
                spans.push((first, i));
                spans.push((i, last));
            }
        }
    }

    points.iter().zip(keep).filter_map(|(p, k)| k.then_some(*p)).collect()
}

/// Pick a material and absorption from feature properties.
///
/// An explicit `material` tag wins (absorption from `k`, else 0.35);
/// otherwise building/landuse/natural tags are matched, falling back to the default material.
pub fn material_for_properties(properties: &Map<String, Value>) -> (Material, f64) {
    if let Some(tag) = properties.get("material").and_then(Value::as_str) {
        let k = properties.get("k").and_then(Value::as_f64).unwrap_or(DEFAULT_TAGGED_ABSORPTION);
        return (Material::from_tag(tag), k);
    }
    for (key, words, material) in MATERIAL_RULES {
        let Some(value) = properties.get(*key).and_then(Value::as_str) else {
            continue;
        };
        if words.iter().any(|w| value.contains(w)) {
            return (*material, material.absorption());
        }
    }
    (Material::Default, Material::Default.absorption())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn square_feature(lon: f64, lat: f64, side: f64, properties: Value) -> Value {
        json!({
            "type": "Feature",
            "properties": properties,
            "geometry": {
                "type": "Polygon",
                "coordinates": [[
                    [lon, lat], [lon + side, lat], [lon + side, lat + side], [lon, lat + side], [lon, lat]
                ]]
            }
        })
    }

    fn collection(features: Vec<Value>) -> String {
        json!({ "type": "FeatureCollection", "features": features }).to_string()
    }

    #[test]
    fn rejects_non_collections_and_bad_json() {
        let options = GeoImportOptions::default();
        assert_eq!(
            GeoImport::parse(r#"{"type":"Feature"}"#, options.clone()).unwrap_err(),
            GeoImportError::NotFeatureCollection
        );
        assert!(matches!(
            GeoImport::parse("{not json", options).unwrap_err(),
            GeoImportError::InvalidJson(_)
        ));
    }

    #[test]
    fn projection_scales_by_latitude_and_flips_y() {
        let options = GeoImportOptions::new(60.0, 10.0, 1.0);
        let origin = project(60.0, 10.0, &options);
        assert!(origin.x.abs() < 1e-9 && origin.y.abs() < 1e-9);

        let east = project(60.0, 10.001, &options);
        let expected_x = 0.001_f64.to_radians() * EARTH_RADIUS_M * 0.5;
        assert!((east.x - expected_x).abs() < 1e-6);

        let north = project(60.001, 10.0, &options);
        assert!(north.y < 0.0);
    }

    #[test]
    fn ring_area_matches_shoelace() {
        let ring = [(0.0, 0.0), (2.0, 0.0), (2.0, 1.0), (0.0, 1.0), (0.0, 0.0)];
        assert_eq!(ring_area(&ring), 2.0);
    }

    #[test]
    fn simplification_drops_collinear_points_and_keeps_corners() {
        let ring = [(0.0, 0.0), (0.5, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0), (0.0, 0.0)];
        let simplified = simplify_ring(&ring, 0.01);
        assert_eq!(simplified, vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0), (0.0, 0.0)]);

        let short = [(0.0, 0.0), (1.0, 1.0)];
        assert_eq!(simplify_ring(&short, 0.01), short.to_vec());
    }

    #[test]
    fn materials_follow_tags_in_rule_order() {
        assert_eq!(material_for_properties(&props(json!({"building": "warehouse"}))).0, Material::Concrete);
        assert_eq!(material_for_properties(&props(json!({"building": "yes"}))).0, Material::Brick);
        // "residential" landuse matches urban_mix, not the building rule
        assert_eq!(material_for_properties(&props(json!({"landuse": "residential"}))).0, Material::UrbanMix);
        assert_eq!(material_for_properties(&props(json!({"natural": "beach"}))), (Material::Sand, 0.08));
        assert_eq!(material_for_properties(&props(json!({"amenity": "pub"}))), (Material::Default, 0.1));
        assert_eq!(material_for_properties(&props(json!({"material": "metal"}))), (Material::Metal, 0.35));
        assert_eq!(
            material_for_properties(&props(json!({"material": "water", "k": 2.0}))),
            (Material::Water, 2.0)
        );
    }

    #[test]
    fn converts_points_and_polygons() {
        let text = collection(vec![
            json!({"type": "Feature", "properties": {"name": "Server"}, "geometry": {"type": "Point", "coordinates": [10.0, 50.0]}}),
            json!({"type": "Feature", "properties": {}, "geometry": {"type": "Point", "coordinates": [10.001, 50.0]}}),
            square_feature(10.0, 50.0, 0.001, json!({"building": "house", "loss": 0.5})),
            // Too small to keep
            square_feature(10.0, 50.0, 0.00001, json!({})),
            json!({"type": "Feature", "properties": {}, "geometry": null}),
        ]);
        let import = GeoImport::parse(&text, GeoImportOptions::new(50.0, 10.0, 1.0)).unwrap();
        assert_eq!(import.feature_count(), 5);
        let items = import.into_items();
        assert_eq!(items.len(), 3);

        assert!(matches!(&items[0], IngestItem::Point { name: Some(n), .. } if n == "Server"));
        match &items[2] {
            IngestItem::Polygon {
                vertices,
                material,
                absorption,
                loss,
            } => {
                assert_eq!(vertices.len(), 4);
                assert_eq!(*material, Material::Brick);
                assert_eq!(*absorption, 0.35);
                assert_eq!(*loss, Some(0.5));
            }
            other => panic!("expected polygon, got {:?}", other),
        }
    }

    #[test]
    fn multipolygon_yields_one_obstacle_per_exterior_ring() {
        let text = collection(vec![json!({
            "type": "Feature",
            "properties": {"natural": "water", "absorption": 4.0},
            "geometry": {
                "type": "MultiPolygon",
                "coordinates": [
                    [[[0.0, 0.0], [0.001, 0.0], [0.001, 0.001], [0.0, 0.001], [0.0, 0.0]]],
                    [[[0.01, 0.01], [0.011, 0.01], [0.011, 0.011], [0.01, 0.011], [0.01, 0.01]]]
                ]
            }
        })]);
        let items = GeoImport::parse(&text, GeoImportOptions::default()).unwrap().into_items();
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|item| matches!(
            item,
            IngestItem::Polygon { material: Material::Water, absorption, .. } if *absorption == 4.0
        )));
    }

    #[test]
    fn run_batches_and_reports_progress() {
        let features: Vec<Value> = (0..5001)
            .map(|i| json!({"type": "Feature", "properties": {}, "geometry": {"type": "Point", "coordinates": [i as f64 * 1e-6, 0.0]}}))
            .collect();
        let options = GeoImportOptions {
            batch_size: 2000,
            ..Default::default()
        };
        let mut messages = Vec::new();
        GeoImport::parse(&collection(features), options).unwrap().run(|m| messages.push(m));

        let batch_sizes: Vec<usize> = messages
            .iter()
            .filter_map(|m| match m {
                IngestMessage::Batch(items) => Some(items.len()),
                _ => None,
            })
            .collect();
        assert_eq!(batch_sizes, vec![2000, 2000, 1001]);
        assert!(messages.contains(&IngestMessage::Progress {
            processed: 5000,
            total: 5001
        }));
        assert_eq!(
            messages.last(),
            Some(&IngestMessage::Done {
                processed: 5001,
                features: 5001
            })
        );
    }
}
