//! Geometry calculations for wavefront and obstacle intersection.
//!
//! Contains helper functions for:
//! - Distance calculations (squared distance to avoid sqrt in hot paths)
//! - Point-in-shape tests (circles, polygons)
//! - Disc-shape intersection tests used to decide when a growing wave meets an obstacle

use super::types::{Bounds, Obstacle, ObstacleShape, Point};

/// Squared Euclidean distance in world units (avoids a sqrt in hot paths).
///
/// # Parameters
///
/// * `a` - First point
/// * `b` - Second point
///
/// # Returns
///
/// The squared distance (dx² + dy²).
pub fn distance2(a: &Point, b: &Point) -> f64 {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    dx * dx + dy * dy
}

/// Euclidean distance in world units.
pub fn distance(a: &Point, b: &Point) -> f64 {
    distance2(a, b).sqrt()
}

/// Inclusive point-inside-circle test.
pub fn point_in_circle(p: &Point, center: &Point, radius: f64) -> bool {
    distance2(p, center) <= radius * radius
}

/// Even-odd ray casting point-in-polygon test.
///
/// Points exactly on an edge may land on either side; callers that need an
/// inclusive boundary combine this with a segment distance check.
pub fn point_in_polygon(p: &Point, vertices: &[Point]) -> bool {
    let mut inside = false;
    let mut j = vertices.len().wrapping_sub(1);
    for i in 0..vertices.len() {
        let (vi, vj) = (&vertices[i], &vertices[j]);
        if (vi.y > p.y) != (vj.y > p.y) && p.x < (vj.x - vi.x) * (p.y - vi.y) / (vj.y - vi.y) + vi.x {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Squared distance from `p` to segment a–b using projection and clamped parameter t.
pub fn distance2_to_segment(p: &Point, a: &Point, b: &Point) -> f64 {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    if dx == 0.0 && dy == 0.0 {
        return distance2(p, a);
    }
    let t = ((p.x - a.x) * dx + (p.y - a.y) * dy) / (dx * dx + dy * dy);
    let t_clamped = t.clamp(0.0, 1.0);
    let closest = Point::new(a.x + t_clamped * dx, a.y + t_clamped * dy);
    distance2(p, &closest)
}

/// Disc vs. circle intersection: the wavefront touches the circle once `r >= d - radius`.
pub fn disc_intersects_circle(center: &Point, r: f64, circle_center: &Point, circle_radius: f64) -> bool {
    r >= distance(center, circle_center) - circle_radius
}

/// Disc vs. polygon intersection.
///
/// The disc reaches the polygon when any of these holds:
/// - a vertex lies inside the disc
/// - the disc center lies inside the polygon
/// - an edge passes within `r` of the disc center
///
/// The cached polygon bounds give a cheap reject before the per-edge work.
///
/// # Parameters
///
/// * `center` - Disc center (the wave origin)
/// * `r` - Disc radius (the current wave radius)
/// * `vertices` - Polygon vertices, implicitly closed
/// * `bounds` - Bounding box of `vertices`
///
/// # Returns
///
/// `true` if disc and polygon share at least one point.
pub fn disc_intersects_polygon(center: &Point, r: f64, vertices: &[Point], bounds: &Bounds) -> bool {
    if !Bounds::around(center, r).intersects(bounds) {
        return false;
    }
    if vertices.iter().any(|v| point_in_circle(v, center, r)) {
        return true;
    }
    if point_in_polygon(center, vertices) {
        return true;
    }
    let r2 = r * r;
    let n = vertices.len();
    (0..n).any(|i| distance2_to_segment(center, &vertices[i], &vertices[(i + 1) % n]) <= r2)
}

/// Disc vs. obstacle dispatch.
pub fn disc_intersects_obstacle(center: &Point, r: f64, obstacle: &Obstacle) -> bool {
    match obstacle.shape() {
        ObstacleShape::Circle { center: c, radius } => disc_intersects_circle(center, r, c, *radius),
        ObstacleShape::Polygon { vertices, bounds } => disc_intersects_polygon(center, r, vertices, bounds),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(x: f64, y: f64) -> Point {
        Point { x, y }
    }

    fn square() -> Vec<Point> {
        vec![p(10.0, 10.0), p(20.0, 10.0), p(20.0, 20.0), p(10.0, 20.0)]
    }

    #[test]
    fn geometry_point_in_circle_and_polygon() {
        assert!(point_in_circle(&p(60.0, 50.0), &p(50.0, 50.0), 10.0));
        assert!(!point_in_circle(&p(61.0, 50.0), &p(50.0, 50.0), 10.0));

        assert!(point_in_polygon(&p(15.0, 15.0), &square()));
        assert!(!point_in_polygon(&p(25.0, 15.0), &square()));
    }

    #[test]
    fn disc_reaches_polygon_via_edge_vertex_or_containment() {
        let sq = square();
        let b = Bounds::from_points(&sq).unwrap();
        // Edge within reach, no vertex inside
        assert!(disc_intersects_polygon(&p(15.0, 0.0), 10.0, &sq, &b));
        assert!(!disc_intersects_polygon(&p(15.0, 0.0), 9.9, &sq, &b));
        // Vertex inside the disc
        assert!(disc_intersects_polygon(&p(5.0, 5.0), 8.0, &sq, &b));
        // Disc center inside the polygon with a tiny radius
        assert!(disc_intersects_polygon(&p(15.0, 15.0), 0.0, &sq, &b));
    }

    #[test]
    fn disc_reaches_circle_when_radius_covers_gap() {
        assert!(disc_intersects_circle(&p(0.0, 0.0), 60.0, &p(100.0, 0.0), 40.0));
        assert!(!disc_intersects_circle(&p(0.0, 0.0), 59.0, &p(100.0, 0.0), 40.0));
    }

    #[test]
    fn segment_distance_clamps_to_endpoints() {
        let d2 = distance2_to_segment(&p(-3.0, 4.0), &p(0.0, 0.0), &p(10.0, 0.0));
        assert!((d2 - 25.0).abs() < 1e-9);
        let d2 = distance2_to_segment(&p(5.0, 2.0), &p(0.0, 0.0), &p(10.0, 0.0));
        assert!((d2 - 4.0).abs() < 1e-9);
    }
}
