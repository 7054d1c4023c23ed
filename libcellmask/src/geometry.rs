//! Pixel geometry shared by the edit engine, the feature extractor and the
//! ROI codec.
//!
//! Two coordinate conventions are used:
//! - edit shapes (strokes, polygons) use integer [`Point`]s whose value is a
//!   pixel centre, so the polygon `(2,2) (4,2) (4,4) (2,4)` covers a 3x3 block;
//! - boundary rings use the corner lattice, where pixel `(x, y)` spans
//!   `[x, x+1] x [y, y+1]`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::label::{Pixel, Region};

/// Integer point in image coordinates, possibly outside the image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Self) -> f64 {
        let dx = f64::from(other.x - self.x);
        let dy = f64::from(other.y - self.y);
        dx.hypot(dy)
    }
}

impl From<(i32, i32)> for Point {
    fn from((x, y): (i32, i32)) -> Self {
        Self { x, y }
    }
}

/// Polygon vertices after implicit closure
#[derive(Debug, Clone, PartialEq)]
pub struct ClosedPolygon {
    /// Distinct vertices; the edge from the last back to the first is implied
    pub vertices: Vec<Point>,
    /// Distance between the original first and last points when it exceeded the tolerance
    pub gap: Option<f64>,
}

/// Normalize a freehand outline into a closed polygon.
///
/// Consecutive duplicates are dropped and an explicit closing vertex is removed.
pub fn close_polygon(points: &[Point], tolerance: f64) -> ClosedPolygon {
    let mut vertices: Vec<Point> = Vec::with_capacity(points.len());
    for &point in points {
        if vertices.last() != Some(&point) {
            vertices.push(point);
        }
    }

    let mut gap = None;
    if vertices.len() >= 2 {
        let first = vertices[0];
        let last = vertices[vertices.len() - 1];
        if first == last {
            vertices.pop();
        } else {
            let distance = first.distance(&last);
            if distance > tolerance {
                gap = Some(distance);
            }
        }
    }

    ClosedPolygon { vertices, gap }
}

/// Pixels whose centres lie inside or on the boundary of a closed polygon,
/// clipped to a `width` x `height` grid, in row-major order.
///
/// Interior membership uses the even-odd rule.
pub fn rasterize_polygon(vertices: &[Point], width: usize, height: usize) -> Vec<Pixel> {
    if vertices.len() < 3 || width == 0 || height == 0 {
        return Vec::new();
    }

    let min_x = i64::from(vertices.iter().map(|p| p.x).min().unwrap_or(0));
    let max_x = i64::from(vertices.iter().map(|p| p.x).max().unwrap_or(0));
    let min_y = i64::from(vertices.iter().map(|p| p.y).min().unwrap_or(0));
    let max_y = i64::from(vertices.iter().map(|p| p.y).max().unwrap_or(0));

    let x0 = min_x.max(0);
    let y0 = min_y.max(0);
    let x1 = max_x.min(width as i64 - 1);
    let y1 = max_y.min(height as i64 - 1);
    if x0 > x1 || y0 > y1 {
        return Vec::new();
    }

    let box_width = (x1 - x0 + 1) as usize;
    let box_height = (y1 - y0 + 1) as usize;
    let mut inside = vec![false; box_width * box_height];
    let mut mark = |x: i64, y: i64| {
        if (x0..=x1).contains(&x) && (y0..=y1).contains(&y) {
            inside[(y - y0) as usize * box_width + (x - x0) as usize] = true;
        }
    };

    let edges: Vec<(Point, Point)> = (0..vertices.len())
        .map(|i| (vertices[i], vertices[(i + 1) % vertices.len()]))
        .collect();

    let mut crossings = Vec::new();
    for y in y0..=y1 {
        let scan = y as f64;
        crossings.clear();
        for (a, b) in &edges {
            let (ay, by) = (f64::from(a.y), f64::from(b.y));
            if (ay > scan) != (by > scan) {
                let t = (scan - ay) / (by - ay);
                crossings.push(f64::from(a.x) + t * f64::from(b.x - a.x));
            }
        }
        crossings.sort_by(f64::total_cmp);
        for pair in crossings.chunks_exact(2) {
            let start = (pair[0].ceil() as i64).max(x0);
            let end = (pair[1].floor() as i64).min(x1);
            for x in start..=end {
                mark(x, y);
            }
        }
    }

    // Lattice points on the outline are inside regardless of crossing parity
    for (a, b) in &edges {
        let dx = i64::from(b.x - a.x);
        let dy = i64::from(b.y - a.y);
        let steps = gcd(dx.abs(), dy.abs());
        if steps == 0 {
            mark(i64::from(a.x), i64::from(a.y));
            continue;
        }
        let (sx, sy) = (dx / steps, dy / steps);
        for k in 0..=steps {
            mark(i64::from(a.x) + k * sx, i64::from(a.y) + k * sy);
        }
    }

    let mut pixels = Vec::new();
    for row in 0..box_height {
        for col in 0..box_width {
            if inside[row * box_width + col] {
                pixels.push(Pixel::new((x0 as usize + col) as u32, (y0 as usize + row) as u32));
            }
        }
    }
    pixels
}

fn gcd(mut a: i64, mut b: i64) -> i64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

/// Points visited by a freehand stroke, joining consecutive samples with
/// Bresenham segments. Order follows the stroke; repeated points are dropped.
pub fn stroke_path(points: &[Point]) -> Vec<Point> {
    let mut path: Vec<Point> = Vec::new();
    match points {
        [] => {}
        [single] => path.push(*single),
        _ => {
            for segment in points.windows(2) {
                for point in line(segment[0], segment[1]) {
                    if path.last() != Some(&point) {
                        path.push(point);
                    }
                }
            }
        }
    }
    path
}

/// Bresenham line between two points, both endpoints included
fn line(from: Point, to: Point) -> Vec<Point> {
    let (mut x, mut y) = (i64::from(from.x), i64::from(from.y));
    let (tx, ty) = (i64::from(to.x), i64::from(to.y));
    let dx = (tx - x).abs();
    let dy = -(ty - y).abs();
    let sx = if x < tx { 1 } else { -1 };
    let sy = if y < ty { 1 } else { -1 };
    let mut err = dx + dy;

    let mut points = Vec::with_capacity((dx - dy) as usize + 1);
    loop {
        points.push(Point::new(x as i32, y as i32));
        if x == tx && y == ty {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
    points
}

/// Convex hull of a point set (Andrew's monotone chain), counter-clockwise
/// in a y-up frame, without collinear vertices
pub fn convex_hull(mut points: Vec<(f64, f64)>) -> Vec<(f64, f64)> {
    points.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));
    points.dedup();
    if points.len() < 3 {
        return points;
    }

    let cross = |o: (f64, f64), a: (f64, f64), b: (f64, f64)| {
        (a.0 - o.0) * (b.1 - o.1) - (a.1 - o.1) * (b.0 - o.0)
    };

    let mut hull: Vec<(f64, f64)> = Vec::with_capacity(points.len() * 2);
    for &point in &points {
        while hull.len() >= 2 && cross(hull[hull.len() - 2], hull[hull.len() - 1], point) <= 0.0 {
            hull.pop();
        }
        hull.push(point);
    }
    let lower_len = hull.len() + 1;
    for &point in points.iter().rev().skip(1) {
        while hull.len() >= lower_len
            && cross(hull[hull.len() - 2], hull[hull.len() - 1], point) <= 0.0
        {
            hull.pop();
        }
        hull.push(point);
    }
    hull.pop();
    hull
}

/// Check whether a point lies inside or on a counter-clockwise convex polygon
pub fn in_convex_polygon(hull: &[(f64, f64)], point: (f64, f64)) -> bool {
    const EPSILON: f64 = 1e-9;
    if hull.len() < 3 {
        return false;
    }
    (0..hull.len()).all(|i| {
        let a = hull[i];
        let b = hull[(i + 1) % hull.len()];
        (b.0 - a.0) * (point.1 - a.1) - (b.1 - a.1) * (point.0 - a.0) >= -EPSILON
    })
}

/// Directed boundary edge on the corner lattice
#[derive(Debug, Clone, Copy)]
struct CrackEdge {
    from: (i64, i64),
    to: (i64, i64),
}

impl CrackEdge {
    fn direction(&self) -> (i64, i64) {
        (self.to.0 - self.from.0, self.to.1 - self.from.1)
    }
}

/// Trace the pixel-edge boundary of a region into closed rings on the corner
/// lattice.
///
/// Rings run with the region on their right-hand side (clockwise on screen
/// for outer boundaries). Holes and disconnected parts yield extra rings.
/// Filling all rings with the even-odd rule at pixel centres reproduces the
/// region exactly.
pub fn trace_boundary(region: &Region) -> Vec<Vec<(i64, i64)>> {
    let Some((bounds, mask)) = region.local_mask() else {
        return Vec::new();
    };
    let (rows, cols) = mask.dim();
    let filled = |row: i64, col: i64| {
        row >= 0
            && col >= 0
            && (row as usize) < rows
            && (col as usize) < cols
            && mask[[row as usize, col as usize]]
    };

    let mut edges: Vec<CrackEdge> = Vec::new();
    for row in 0..rows as i64 {
        for col in 0..cols as i64 {
            if !filled(row, col) {
                continue;
            }
            let x = col + i64::from(bounds.min_x);
            let y = row + i64::from(bounds.min_y);
            if !filled(row - 1, col) {
                edges.push(CrackEdge { from: (x, y), to: (x + 1, y) });
            }
            if !filled(row, col + 1) {
                edges.push(CrackEdge { from: (x + 1, y), to: (x + 1, y + 1) });
            }
            if !filled(row + 1, col) {
                edges.push(CrackEdge { from: (x + 1, y + 1), to: (x, y + 1) });
            }
            if !filled(row, col - 1) {
                edges.push(CrackEdge { from: (x, y + 1), to: (x, y) });
            }
        }
    }

    let mut outgoing: HashMap<(i64, i64), Vec<usize>> = HashMap::new();
    for (index, edge) in edges.iter().enumerate() {
        outgoing.entry(edge.from).or_default().push(index);
    }

    let mut used = vec![false; edges.len()];
    let mut rings = Vec::new();
    for start in 0..edges.len() {
        if used[start] {
            continue;
        }
        let mut ring = Vec::new();
        let mut current = start;
        loop {
            used[current] = true;
            let edge = edges[current];
            ring.push(edge.from);

            let (dx, dy) = edge.direction();
            // right turn, straight on, left turn (y axis points down)
            let preference = [(-dy, dx), (dx, dy), (dy, -dx)];
            let next = outgoing.get(&edge.to).and_then(|candidates| {
                preference.iter().find_map(|&wanted| {
                    candidates
                        .iter()
                        .copied()
                        .find(|&c| !used[c] && edges[c].direction() == wanted)
                })
            });

            match next {
                Some(index) => current = index,
                None => break,
            }
        }
        rings.push(drop_collinear(ring));
    }
    rings
}

/// Remove vertices that sit in the middle of a straight run
fn drop_collinear(ring: Vec<(i64, i64)>) -> Vec<(i64, i64)> {
    let n = ring.len();
    if n < 3 {
        return ring;
    }
    (0..n)
        .filter(|&i| {
            let prev = ring[(i + n - 1) % n];
            let here = ring[i];
            let next = ring[(i + 1) % n];
            let cross = (here.0 - prev.0) * (next.1 - here.1) - (here.1 - prev.1) * (next.0 - here.0);
            cross != 0
        })
        .map(|i| ring[i])
        .collect()
}

/// Pixels whose centres `(x + 0.5, y + 0.5)` fall inside a set of corner
/// lattice rings under the even-odd rule, in row-major order
pub fn fill_rings(rings: &[Vec<(f64, f64)>]) -> Vec<Pixel> {
    let all = rings.iter().flatten();
    let min_y = all.clone().map(|p| p.1).fold(f64::INFINITY, f64::min);
    let max_y = all.map(|p| p.1).fold(f64::NEG_INFINITY, f64::max);
    if !min_y.is_finite() || !max_y.is_finite() {
        return Vec::new();
    }

    let mut pixels = Vec::new();
    let first_row = min_y.floor().max(0.0) as i64;
    let last_row = max_y.ceil() as i64;
    let mut crossings = Vec::new();
    for y in first_row..last_row {
        let scan = y as f64 + 0.5;
        crossings.clear();
        for ring in rings {
            for i in 0..ring.len() {
                let a = ring[i];
                let b = ring[(i + 1) % ring.len()];
                if (a.1 > scan) != (b.1 > scan) {
                    let t = (scan - a.1) / (b.1 - a.1);
                    crossings.push(a.0 + t * (b.0 - a.0));
                }
            }
        }
        crossings.sort_by(f64::total_cmp);
        for pair in crossings.chunks_exact(2) {
            let start = (pair[0] - 0.5).ceil().max(0.0) as i64;
            let end = (pair[1] - 0.5).floor() as i64;
            for x in start..=end {
                pixels.push(Pixel::new(x as u32, y as u32));
            }
        }
    }
    pixels.sort_by_key(|p| (p.y, p.x));
    pixels.dedup();
    pixels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bresenham_covers_both_endpoints() {
        let points = line(Point::new(0, 0), Point::new(4, 2));
        assert_eq!(points.first(), Some(&Point::new(0, 0)));
        assert_eq!(points.last(), Some(&Point::new(4, 2)));
        assert_eq!(points.len(), 5);
    }

    #[test]
    fn collinear_vertices_are_dropped() {
        let ring = vec![(0, 0), (1, 0), (2, 0), (2, 1), (2, 2), (1, 2), (0, 2), (0, 1)];
        assert_eq!(drop_collinear(ring), vec![(0, 0), (2, 0), (2, 2), (0, 2)]);
    }

    #[test]
    fn gcd_of_zero_run() {
        assert_eq!(gcd(0, 0), 0);
        assert_eq!(gcd(6, 4), 2);
    }
}
