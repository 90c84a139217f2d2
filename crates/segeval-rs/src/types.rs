use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::EvalError;

/// Class label attached to every instance.
pub type ClassId = u64;

/// A point in absolute pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Point { x, y }
    }
}

/// Closed boundary of at least three points; the edge from the last point back
/// to the first is implicit.
///
/// A polygon may be self-intersecting. Geometry operations go through
/// [`crate::geometry::repair`] before measuring it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Polygon {
    points: Vec<Point>,
}

impl Polygon {
    /// Returns `None` when fewer than three points are given.
    pub fn new(points: Vec<Point>) -> Option<Self> {
        if points.len() < 3 {
            return None;
        }
        Some(Polygon { points })
    }

    /// Axis-aligned rectangle wound top-left, top-right, bottom-right, bottom-left.
    pub fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Polygon {
            points: vec![
                Point::new(x0, y0),
                Point::new(x1, y0),
                Point::new(x1, y1),
                Point::new(x0, y1),
            ],
        }
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn num_points(&self) -> usize {
        self.points.len()
    }
}

/// Which side of a comparison an annotation set comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    GroundTruth,
    Predicted,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::GroundTruth => f.write_str("ground_truth"),
            Source::Predicted => f.write_str("predicted"),
        }
    }
}

/// One labeled polygon of an annotation set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Instance {
    pub class_id: ClassId,
    pub source: Source,
    pub polygon: Polygon,
    /// Position of the input record this instance was built from.
    pub record: usize,
}

/// All instances of one side for one image, with the image size in pixels.
#[derive(Debug, Clone, Serialize)]
pub struct AnnotationSet {
    source: Source,
    width: u32,
    height: u32,
    instances: Vec<Instance>,
}

impl AnnotationSet {
    pub fn new(source: Source, width: u32, height: u32) -> Result<Self, EvalError> {
        if width == 0 || height == 0 {
            return Err(EvalError::InvalidDimensions { width, height });
        }
        Ok(AnnotationSet {
            source,
            width,
            height,
            instances: Vec::new(),
        })
    }

    /// Append an instance that is its own record.
    pub fn push(&mut self, class_id: ClassId, polygon: Polygon) {
        let record = self.instances.len();
        self.push_record(record, class_id, polygon);
    }

    /// Append an instance built from input record `record`.
    pub fn push_record(&mut self, record: usize, class_id: ClassId, polygon: Polygon) {
        self.instances.push(Instance {
            class_id,
            source: self.source,
            polygon,
            record,
        });
    }

    pub fn source(&self) -> Source {
        self.source
    }

    /// `(width, height)` in pixels.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    pub fn classes(&self) -> BTreeSet<ClassId> {
        self.instances.iter().map(|inst| inst.class_id).collect()
    }

    /// Set-wide indices of the instances labeled `class_id`, in set order.
    pub fn indices_of_class(&self, class_id: ClassId) -> Vec<usize> {
        self.instances
            .iter()
            .enumerate()
            .filter(|(_, inst)| inst.class_id == class_id)
            .map(|(i, _)| i)
            .collect()
    }
}

/// A tokenized annotation line as handed over by the I/O layer.
///
/// Four values are a normalized `(center_x, center_y, width, height)` box; an
/// even number above four are normalized `x1, y1, x2, y2, ...` polygon points.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Record {
    pub class_id: ClassId,
    #[serde(default)]
    pub values: Vec<f64>,
}

impl Record {
    pub fn new(class_id: ClassId, values: Vec<f64>) -> Self {
        Record { class_id, values }
    }
}

/// One row of a solved assignment.
///
/// `ground_truth` and `predicted` are positions in the ground-truth and
/// predicted [`AnnotationSet`]s. Records dropped during normalization leave
/// no instance behind, so the `*_record` fields give the matching position
/// in the input record lists.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Match {
    pub ground_truth: Option<usize>,
    pub predicted: Option<usize>,
    pub iou: f64,
    pub ground_truth_record: Option<usize>,
    pub predicted_record: Option<usize>,
}

impl Match {
    /// A match whose instance positions are also the record positions.
    pub fn new(ground_truth: Option<usize>, predicted: Option<usize>, iou: f64) -> Self {
        Match {
            ground_truth,
            predicted,
            iou,
            ground_truth_record: ground_truth,
            predicted_record: predicted,
        }
    }

    pub fn is_matched(&self) -> bool {
        self.ground_truth.is_some() && self.predicted.is_some()
    }

    /// Ground truth left without a partner.
    pub fn is_missed(&self) -> bool {
        self.ground_truth.is_some() && self.predicted.is_none()
    }

    pub fn is_false_positive(&self) -> bool {
        self.ground_truth.is_none() && self.predicted.is_some()
    }
}

/// Flattened match row carrying its class, for per-image reports.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MatchRecord {
    pub class_id: ClassId,
    pub ground_truth: Option<usize>,
    pub predicted: Option<usize>,
    pub iou: f64,
    pub ground_truth_record: Option<usize>,
    pub predicted_record: Option<usize>,
}

/// All matches for one image, partitioned by class.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MatchResult {
    classes: BTreeMap<ClassId, Vec<Match>>,
}

impl MatchResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, class_id: ClassId, matches: Vec<Match>) {
        self.classes.insert(class_id, matches);
    }

    pub fn class(&self, class_id: ClassId) -> &[Match] {
        self.classes
            .get(&class_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn classes(&self) -> impl Iterator<Item = (ClassId, &[Match])> {
        self.classes.iter().map(|(&c, m)| (c, m.as_slice()))
    }

    /// Ordered by class, then by row order within the class.
    pub fn records(&self) -> Vec<MatchRecord> {
        self.classes
            .iter()
            .flat_map(|(&class_id, matches)| {
                matches.iter().map(move |m| MatchRecord {
                    class_id,
                    ground_truth: m.ground_truth,
                    predicted: m.predicted,
                    iou: m.iou,
                    ground_truth_record: m.ground_truth_record,
                    predicted_record: m.predicted_record,
                })
            })
            .collect()
    }
}
