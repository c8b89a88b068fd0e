//! Lattice path smoothing and Visvalingam decimation.

use crate::types::Position;

/// Points whose neighbours lie further apart than this are never dropped.
pub const MAX_SPAN: f64 = 3.0;

/// Smooths interior points with a 1-2-1 kernel, then repeatedly drops the
/// interior point spanning the smallest triangle while that area stays at or
/// below `max_area`. Endpoints are kept unchanged; ties go to the earlier point.
pub fn simplify(points: &[Position], max_area: f64) -> Vec<Position> {
    if points.len() <= 2 {
        return points.to_vec();
    }
    let mut pts: Vec<Position> = Vec::with_capacity(points.len());
    pts.push(points[0]);
    for w in points.windows(3) {
        pts.push((w[0] + w[1] * 2.0 + w[2]) / 4.0);
    }
    pts.push(points[points.len() - 1]);

    let mut area: Vec<f64> = (0..pts.len()).map(|i| triangle_area(&pts, i)).collect();
    while pts.len() > 2 {
        let mut best: Option<(usize, f64)> = None;
        for (i, &a) in area.iter().enumerate().take(pts.len() - 1).skip(1) {
            if best.map_or(true, |(_, b)| a < b) {
                best = Some((i, a));
            }
        }
        let Some((at, smallest)) = best else {
            break;
        };
        if smallest > max_area {
            break;
        }
        pts.remove(at);
        area.remove(at);
        for i in [at.saturating_sub(1), at] {
            if i > 0 && i + 1 < pts.len() {
                area[i] = triangle_area(&pts, i);
            }
        }
    }
    pts
}

fn triangle_area(pts: &[Position], i: usize) -> f64 {
    if i == 0 || i + 1 >= pts.len() {
        return f64::INFINITY;
    }
    let (a, b, c) = (pts[i - 1], pts[i], pts[i + 1]);
    if a.distance_to(c) > MAX_SPAN {
        return f64::INFINITY;
    }
    let u = a - b;
    let v = c - b;
    let cross = Position::new(
        u.y * v.z - u.z * v.y,
        u.z * v.x - u.x * v.z,
        u.x * v.y - u.y * v.x,
    );
    cross.norm() / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(x: f64, y: f64) -> Position {
        Position::new(x, y, 0.0)
    }

    #[test]
    fn collinear_points_collapse_within_span() {
        let line: Vec<Position> = (0..=4).map(|i| p(i as f64 * 0.5, 0.0)).collect();
        let out = simplify(&line, 0.5);
        assert_eq!(out.first(), Some(&p(0.0, 0.0)));
        assert_eq!(out.last(), Some(&p(2.0, 0.0)));
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn long_gaps_keep_their_points() {
        let line: Vec<Position> = (0..=4).map(|i| p(i as f64 * 2.0, 0.0)).collect();
        let out = simplify(&line, 0.5);
        assert_eq!(out.len(), 5);
    }

    #[test]
    fn sharp_corners_survive() {
        let line = vec![p(0.0, 0.0), p(1.0, 0.0), p(2.0, 0.0), p(2.0, 1.0), p(2.0, 2.0)];
        let out = simplify(&line, 0.1);
        assert!(out.len() > 2);
        assert_eq!(out[0], p(0.0, 0.0));
        assert_eq!(out[out.len() - 1], p(2.0, 2.0));
    }
}
