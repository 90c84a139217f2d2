//! Polygon measurement, validity checks, self-intersection repair and IoU.
//!
//! Raw [`Polygon`]s may self-intersect. Everything that measures overlap works
//! on a [`Region`], the repaired form: a set of simple parts whose union is
//! the area the annotation covers.

use std::collections::HashMap;

use geo::algorithm::line_intersection::{line_intersection, LineIntersection};
use geo::{
    Area, BooleanOps, BoundingRect, Contains, Coord, InteriorPoint, Line, LineString,
    MultiPolygon,
};
use log::trace;

use crate::types::{Point, Polygon};

/// Loops smaller than this (in px²) carry no area.
const MIN_LOOP_AREA: f64 = 1e-9;

/// Intersections closer than this to an edge endpoint are snapped onto it.
const SNAP_DISTANCE: f64 = 1e-9;

/// Shoelace area of the point sequence, independent of winding direction.
///
/// For a self-intersecting polygon this is not the covered area; use
/// [`repair`] and [`Region::area`] for that.
pub fn area(polygon: &Polygon) -> f64 {
    signed_area(&to_coords(polygon.points())).abs()
}

/// True iff no two non-adjacent edges touch and adjacent edges share only
/// their common vertex.
pub fn is_valid(polygon: &Polygon) -> bool {
    is_simple_ring(&to_coords(polygon.points()))
}

/// Resolve self-intersections into the union of the polygon's simple loops.
///
/// A valid polygon comes back unchanged. A polygon without recoverable area
/// yields an empty region.
pub fn repair(polygon: &Polygon) -> Region {
    repair_ring(&to_coords(polygon.points()))
}

/// How [`prepare`] turned a polygon into a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairOutcome {
    Valid,
    Repaired { parts: usize },
    Degenerate,
}

/// Repair `polygon` when needed and report what happened.
pub fn prepare(polygon: &Polygon) -> (Region, RepairOutcome) {
    let valid = is_valid(polygon);
    let region = repair(polygon);
    let outcome = if region.is_empty() {
        RepairOutcome::Degenerate
    } else if valid {
        RepairOutcome::Valid
    } else {
        RepairOutcome::Repaired {
            parts: region.num_parts(),
        }
    };
    (region, outcome)
}

/// Area covered by a repaired polygon, stored as simple parts.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    shape: MultiPolygon<f64>,
}

impl Region {
    pub fn empty() -> Self {
        Region {
            shape: MultiPolygon::new(Vec::new()),
        }
    }

    pub fn area(&self) -> f64 {
        self.shape.unsigned_area()
    }

    /// True when nothing of the polygon survived repair.
    pub fn is_empty(&self) -> bool {
        self.shape.0.is_empty()
    }

    pub fn num_parts(&self) -> usize {
        self.shape.0.len()
    }

    /// Outer boundary of each part.
    pub fn parts(&self) -> Vec<Polygon> {
        self.shape
            .0
            .iter()
            .filter_map(|part| {
                let points = to_points(&ring_of(part.exterior()));
                Polygon::new(points)
            })
            .collect()
    }

    /// Repair every ring of the region again. The covered area never
    /// changes, and regions produced by [`repair`] come back unchanged.
    pub fn repair(&self) -> Region {
        let all_simple = self.shape.0.iter().all(|part| {
            is_simple_ring(&ring_of(part.exterior()))
                && part
                    .interiors()
                    .iter()
                    .all(|hole| is_simple_ring(&ring_of(hole)))
        });
        if all_simple {
            return self.clone();
        }
        canonical(&self.shape)
    }

    /// Deterministic order key so that binary operations do not depend on
    /// argument order.
    fn order_key(&self) -> Vec<u64> {
        let mut key = vec![canonical_bits(self.area())];
        for part in &self.shape.0 {
            for c in part.exterior().coords() {
                key.push(canonical_bits(c.x));
                key.push(canonical_bits(c.y));
            }
        }
        key
    }
}

/// Exact overlap area of two regions.
pub fn intersection_area(a: &Region, b: &Region) -> f64 {
    if a.is_empty() || b.is_empty() || !bounds_overlap(a, b) {
        return 0.0;
    }
    let (first, second) = if a.order_key() <= b.order_key() {
        (a, b)
    } else {
        (b, a)
    };
    first.shape.intersection(&second.shape).unsigned_area()
}

/// Combined area of two regions.
pub fn union_area(a: &Region, b: &Region) -> f64 {
    (a.area() + b.area() - intersection_area(a, b)).max(0.0)
}

/// Intersection over union; 0 when both regions are empty.
pub fn iou(a: &Region, b: &Region) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return if a.area() > 0.0 { 1.0 } else { 0.0 };
    }
    let union = union_area(a, b);
    if union <= 0.0 {
        return 0.0;
    }
    (intersection_area(a, b) / union).clamp(0.0, 1.0)
}

fn bounds_overlap(a: &Region, b: &Region) -> bool {
    match (a.shape.bounding_rect(), b.shape.bounding_rect()) {
        (Some(ra), Some(rb)) => {
            ra.min().x <= rb.max().x
                && rb.min().x <= ra.max().x
                && ra.min().y <= rb.max().y
                && rb.min().y <= ra.max().y
        }
        _ => false,
    }
}

fn union_regions(a: Region, b: Region) -> Region {
    if a.is_empty() {
        return b;
    }
    if b.is_empty() {
        return a;
    }
    Region {
        shape: a.shape.union(&b.shape),
    }
}

pub(crate) fn canonical_bits(v: f64) -> u64 {
    // -0.0 and 0.0 are the same coordinate
    if v == 0.0 {
        0.0f64.to_bits()
    } else {
        v.to_bits()
    }
}

fn coord_key(c: Coord<f64>) -> (u64, u64) {
    (canonical_bits(c.x), canonical_bits(c.y))
}

/// Coordinates with consecutive duplicates and the closing point removed.
fn to_coords(points: &[Point]) -> Vec<Coord<f64>> {
    dedup_ring(points.iter().map(|p| Coord { x: p.x, y: p.y }))
}

fn ring_of(ring: &LineString<f64>) -> Vec<Coord<f64>> {
    dedup_ring(ring.coords().copied())
}

fn dedup_ring(coords: impl Iterator<Item = Coord<f64>>) -> Vec<Coord<f64>> {
    let mut out: Vec<Coord<f64>> = Vec::new();
    for c in coords {
        if out.last() != Some(&c) {
            out.push(c);
        }
    }
    while out.len() > 1 && out.first() == out.last() {
        out.pop();
    }
    out
}

fn to_points(coords: &[Coord<f64>]) -> Vec<Point> {
    coords.iter().map(|c| Point::new(c.x, c.y)).collect()
}

fn signed_area(coords: &[Coord<f64>]) -> f64 {
    let n = coords.len();
    if n < 3 {
        return 0.0;
    }
    let mut sum = 0.0;
    for i in 0..n {
        let p = coords[i];
        let q = coords[(i + 1) % n];
        sum += p.x * q.y - q.x * p.y;
    }
    sum / 2.0
}

fn edges(coords: &[Coord<f64>]) -> Vec<Line<f64>> {
    let n = coords.len();
    (0..n)
        .map(|i| Line::new(coords[i], coords[(i + 1) % n]))
        .collect()
}

fn is_adjacent(i: usize, j: usize, n: usize) -> bool {
    j == i + 1 || (i == 0 && j == n - 1)
}

fn is_simple_ring(coords: &[Coord<f64>]) -> bool {
    let n = coords.len();
    if n < 3 {
        return false;
    }
    let edges = edges(coords);
    for i in 0..n {
        for j in (i + 1)..n {
            match line_intersection(edges[i], edges[j]) {
                None => {}
                Some(LineIntersection::SinglePoint { .. }) if is_adjacent(i, j, n) => {}
                Some(_) => return false,
            }
        }
    }
    true
}

fn snap(p: Coord<f64>, candidates: [Coord<f64>; 4]) -> Coord<f64> {
    candidates
        .into_iter()
        .find(|c| (c.x - p.x).abs() <= SNAP_DISTANCE && (c.y - p.y).abs() <= SNAP_DISTANCE)
        .unwrap_or(p)
}

/// Insert every crossing and touching point into the boundary, so that each
/// place where the boundary meets itself becomes a repeated vertex.
fn split_at_crossings(coords: &[Coord<f64>]) -> Vec<Coord<f64>> {
    let n = coords.len();
    let edges = edges(coords);
    let mut splits: Vec<Vec<Coord<f64>>> = vec![Vec::new(); n];

    for i in 0..n {
        for j in (i + 1)..n {
            let ends = [edges[i].start, edges[i].end, edges[j].start, edges[j].end];
            match line_intersection(edges[i], edges[j]) {
                None => {}
                Some(LineIntersection::SinglePoint { intersection, .. }) => {
                    if is_adjacent(i, j, n) {
                        continue;
                    }
                    let p = snap(intersection, ends);
                    splits[i].push(p);
                    splits[j].push(p);
                }
                Some(LineIntersection::Collinear { intersection }) => {
                    for p in [intersection.start, intersection.end] {
                        let p = snap(p, ends);
                        splits[i].push(p);
                        splits[j].push(p);
                    }
                }
            }
        }
    }

    let mut out = Vec::with_capacity(n);
    for (edge, mut cuts) in edges.iter().zip(splits) {
        let start = edge.start;
        out.push(start);
        cuts.retain(|&c| c != edge.start && c != edge.end);
        cuts.sort_by(|a, b| {
            let da = (a.x - start.x).powi(2) + (a.y - start.y).powi(2);
            let db = (b.x - start.x).powi(2) + (b.y - start.y).powi(2);
            da.total_cmp(&db)
        });
        cuts.dedup();
        out.extend(cuts);
    }
    out
}

/// Cut the boundary into loops that never revisit a vertex.
fn simple_loops(boundary: &[Coord<f64>]) -> Vec<Vec<Coord<f64>>> {
    let mut loops = Vec::new();
    let mut path: Vec<Coord<f64>> = Vec::with_capacity(boundary.len());
    let mut seen: HashMap<(u64, u64), usize> = HashMap::new();

    for &c in boundary {
        let key = coord_key(c);
        if let Some(&k) = seen.get(&key) {
            for dropped in &path[k + 1..] {
                seen.remove(&coord_key(*dropped));
            }
            loops.push(path[k..].to_vec());
            path.truncate(k + 1);
        } else {
            seen.insert(key, path.len());
            path.push(c);
        }
    }
    loops.push(path);
    loops
}

fn repair_ring(coords: &[Coord<f64>]) -> Region {
    if coords.len() < 3 {
        return Region::empty();
    }
    if is_simple_ring(coords) {
        if signed_area(coords).abs() <= MIN_LOOP_AREA {
            return Region::empty();
        }
        return Region {
            shape: MultiPolygon::new(vec![geo::Polygon::new(
                LineString::from(oriented(coords.to_vec())),
                Vec::new(),
            )]),
        };
    }

    let boundary = split_at_crossings(coords);
    let mut region = Region::empty();
    for lp in simple_loops(&boundary) {
        if lp.len() < 3 || signed_area(&lp).abs() <= MIN_LOOP_AREA {
            continue;
        }
        let part = Region {
            shape: MultiPolygon::new(vec![geo::Polygon::new(
                LineString::from(oriented(lp)),
                Vec::new(),
            )]),
        };
        region = union_regions(region, part);
    }
    // the union may hand back rings that touch themselves
    canonical(&region.shape)
}

/// Rebuild `shape` so that every ring is simple.
///
/// Rings that touch themselves are cut where they do. A loop winding the
/// same way as its ring keeps the ring's role; a loop winding against it
/// swaps role, so a pocket pinched off an exterior becomes a hole and keeps
/// its area out of the region.
fn canonical(shape: &MultiPolygon<f64>) -> Region {
    let mut shells = Vec::new();
    let mut holes = Vec::new();
    for part in &shape.0 {
        sort_loops(&ring_of(part.exterior()), &mut shells, &mut holes);
        for interior in part.interiors() {
            sort_loops(&ring_of(interior), &mut holes, &mut shells);
        }
    }
    assemble(shells, holes)
}

fn sort_loops(
    ring: &[Coord<f64>],
    same: &mut Vec<Vec<Coord<f64>>>,
    opposite: &mut Vec<Vec<Coord<f64>>>,
) {
    let ring_area = signed_area(ring);
    if ring_area.abs() <= MIN_LOOP_AREA {
        return;
    }
    let loops = if is_simple_ring(ring) {
        vec![ring.to_vec()]
    } else {
        simple_loops(&split_at_crossings(ring))
    };
    for lp in loops {
        let loop_area = signed_area(&lp);
        if lp.len() < 3 || loop_area.abs() <= MIN_LOOP_AREA {
            continue;
        }
        if (loop_area > 0.0) == (ring_area > 0.0) {
            same.push(lp);
        } else {
            opposite.push(lp);
        }
    }
}

/// Put each hole into the smallest shell that encloses it.
fn assemble(shells: Vec<Vec<Coord<f64>>>, holes: Vec<Vec<Coord<f64>>>) -> Region {
    let mut parts: Vec<(f64, geo::Polygon<f64>)> = shells
        .into_iter()
        .map(|shell| {
            let shell = oriented(shell);
            (
                signed_area(&shell),
                geo::Polygon::new(LineString::from(shell), Vec::new()),
            )
        })
        .collect();

    for hole in holes {
        let hole_area = signed_area(&hole).abs();
        let inside = geo::Polygon::new(LineString::from(hole.clone()), Vec::new()).interior_point();
        let Some(inside) = inside else {
            continue;
        };
        let owner = parts
            .iter()
            .enumerate()
            .filter(|(_, (area, shell))| *area > hole_area && shell.contains(&inside))
            .min_by(|(_, (a, _)), (_, (b, _))| a.total_cmp(b))
            .map(|(k, _)| k);
        match owner {
            Some(k) => {
                let mut ring = hole;
                if signed_area(&ring) > 0.0 {
                    ring.reverse();
                }
                parts[k].1.interiors_push(LineString::from(ring));
            }
            None => trace!("dropping hole of area {} outside every shell", hole_area),
        }
    }

    Region {
        shape: MultiPolygon::new(parts.into_iter().map(|(_, part)| part).collect()),
    }
}

/// Counter-clockwise winding for exterior rings.
fn oriented(mut coords: Vec<Coord<f64>>) -> Vec<Coord<f64>> {
    if signed_area(&coords) < 0.0 {
        coords.reverse();
    }
    coords
}
