use std::fmt;

use serde::Serialize;

use crate::types::{ClassId, Source};

/// Why a record could not be turned into a polygon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MalformedReason {
    /// Odd number of coordinates that is not a 4-value box.
    OddCoordinateCount(usize),
    /// Even count but fewer than three points.
    TooFewPoints(usize),
    /// NaN or infinite coordinate.
    NonFinite,
}

impl fmt::Display for MalformedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MalformedReason::OddCoordinateCount(n) => write!(f, "odd coordinate count {}", n),
            MalformedReason::TooFewPoints(n) => {
                write!(f, "{} coordinates do not describe a polygon", n)
            }
            MalformedReason::NonFinite => f.write_str("non-finite coordinate"),
        }
    }
}

/// Structured warning produced while evaluating one image.
///
/// The engine never prints these itself; callers decide whether to log,
/// fail, or ignore them.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// Record dropped before becoming an instance.
    MalformedRecord {
        image: String,
        source: Source,
        record: usize,
        reason: MalformedReason,
    },
    /// Polygon record dropped as a 4-point axis-aligned rectangle.
    DegenerateQuad {
        image: String,
        source: Source,
        record: usize,
        class_id: ClassId,
    },
    /// Self-intersecting polygon replaced by the union of its simple parts.
    Repaired {
        image: String,
        source: Source,
        instance: usize,
        record: usize,
        class_id: ClassId,
        parts: usize,
    },
    /// Polygon with no recoverable area; it scores 0 against everything.
    DegenerateGeometry {
        image: String,
        source: Source,
        instance: usize,
        record: usize,
        class_id: ClassId,
    },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::MalformedRecord {
                image,
                source,
                record,
                reason,
            } => write!(
                f,
                "{}: {} record {} dropped: {}",
                image, source, record, reason
            ),
            Diagnostic::DegenerateQuad {
                image,
                source,
                record,
                class_id,
            } => write!(
                f,
                "{}: {} record {} (class {}) dropped: axis-aligned 4-point polygon",
                image, source, record, class_id
            ),
            Diagnostic::Repaired {
                image,
                source,
                instance,
                record,
                class_id,
                parts,
            } => write!(
                f,
                "{}: {} instance {} (record {}, class {}) self-intersects, repaired into {} part(s)",
                image, source, instance, record, class_id, parts
            ),
            Diagnostic::DegenerateGeometry {
                image,
                source,
                instance,
                record,
                class_id,
            } => write!(
                f,
                "{}: {} instance {} (record {}, class {}) has zero area",
                image, source, instance, record, class_id
            ),
        }
    }
}
