//! Conversion of tokenized records into canonical absolute-pixel polygons.

use std::collections::HashSet;

use crate::diagnostic::{Diagnostic, MalformedReason};
use crate::error::EvalError;
use crate::geometry::canonical_bits;
use crate::params::EvalParams;
use crate::types::{AnnotationSet, Point, Polygon, Record, Source};

/// A record's values resolved into their shape, still in normalized [0, 1] units.
#[derive(Debug, Clone, PartialEq)]
pub enum RawRecord {
    BBox { cx: f64, cy: f64, w: f64, h: f64 },
    FreePolygon { points: Vec<Point> },
}

impl RawRecord {
    pub fn from_values(values: &[f64]) -> Result<Self, MalformedReason> {
        if values.iter().any(|v| !v.is_finite()) {
            return Err(MalformedReason::NonFinite);
        }
        match values.len() {
            4 => Ok(RawRecord::BBox {
                cx: values[0],
                cy: values[1],
                w: values[2],
                h: values[3],
            }),
            n if n % 2 == 1 => Err(MalformedReason::OddCoordinateCount(n)),
            n if n < 6 => Err(MalformedReason::TooFewPoints(n)),
            _ => Ok(RawRecord::FreePolygon {
                points: values
                    .chunks_exact(2)
                    .map(|xy| Point::new(xy[0], xy[1]))
                    .collect(),
            }),
        }
    }

    /// Scale into pixel space for an image of `width` x `height`.
    pub fn to_polygon(&self, width: u32, height: u32) -> Polygon {
        let (w_img, h_img) = (width as f64, height as f64);
        match self {
            RawRecord::BBox { cx, cy, w, h } => {
                let (abs_w, abs_h) = (w * w_img, h * h_img);
                let x0 = cx * w_img - abs_w / 2.0;
                let y0 = cy * h_img - abs_h / 2.0;
                Polygon::rect(x0, y0, x0 + abs_w, y0 + abs_h)
            }
            RawRecord::FreePolygon { points } => {
                let scaled = points
                    .iter()
                    .map(|p| Point::new(p.x * w_img, p.y * h_img))
                    .collect();
                // from_values guarantees at least three points
                Polygon::new(scaled).unwrap_or_else(|| Polygon::rect(0.0, 0.0, 0.0, 0.0))
            }
        }
    }
}

/// Result of normalizing a single record.
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizeOutcome {
    Accepted(Polygon),
    RejectedDegenerateQuad,
    Malformed(MalformedReason),
}

/// True for exactly four points spanning at most two distinct x values and at
/// most two distinct y values.
///
/// This also catches some legitimate kite-shaped annotations that happen to
/// share coordinates; the filter is therefore configurable.
pub fn is_axis_aligned_quad(polygon: &Polygon) -> bool {
    let points = polygon.points();
    if points.len() != 4 {
        return false;
    }
    let xs: HashSet<u64> = points.iter().map(|p| canonical_bits(p.x)).collect();
    let ys: HashSet<u64> = points.iter().map(|p| canonical_bits(p.y)).collect();
    xs.len() <= 2 && ys.len() <= 2
}

pub fn normalize_record(
    record: &Record,
    width: u32,
    height: u32,
    params: &EvalParams,
) -> NormalizeOutcome {
    let raw = match RawRecord::from_values(&record.values) {
        Ok(raw) => raw,
        Err(reason) => return NormalizeOutcome::Malformed(reason),
    };
    let polygon = raw.to_polygon(width, height);
    let is_free_form = matches!(raw, RawRecord::FreePolygon { .. });
    if is_free_form && params.reject_degenerate_quads && is_axis_aligned_quad(&polygon) {
        return NormalizeOutcome::RejectedDegenerateQuad;
    }
    NormalizeOutcome::Accepted(polygon)
}

/// Normalize every record of one side of an image into an [`AnnotationSet`].
///
/// Dropped records are reported as diagnostics; the returned set only holds
/// accepted instances, in record order.
pub fn build_annotation_set(
    records: &[Record],
    width: u32,
    height: u32,
    source: Source,
    params: &EvalParams,
    image: &str,
) -> Result<(AnnotationSet, Vec<Diagnostic>), EvalError> {
    let mut set = AnnotationSet::new(source, width, height)?;
    let mut diagnostics = Vec::new();

    for (i, record) in records.iter().enumerate() {
        match normalize_record(record, width, height, params) {
            NormalizeOutcome::Accepted(polygon) => set.push_record(i, record.class_id, polygon),
            NormalizeOutcome::RejectedDegenerateQuad => {
                diagnostics.push(Diagnostic::DegenerateQuad {
                    image: image.to_string(),
                    source,
                    record: i,
                    class_id: record.class_id,
                });
            }
            NormalizeOutcome::Malformed(reason) => {
                diagnostics.push(Diagnostic::MalformedRecord {
                    image: image.to_string(),
                    source,
                    record: i,
                    reason,
                });
            }
        }
    }

    Ok((set, diagnostics))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corners(polygon: &Polygon) -> Vec<(f64, f64)> {
        polygon.points().iter().map(|p| (p.x, p.y)).collect()
    }

    #[test]
    fn test_bbox_expands_to_clockwise_corners() {
        let rec = Record::new(0, vec![0.5, 0.5, 0.2, 0.4]);
        let outcome = normalize_record(&rec, 100, 200, &EvalParams::default());
        let NormalizeOutcome::Accepted(poly) = outcome else {
            panic!("bbox should be accepted, got {:?}", outcome);
        };
        assert_eq!(
            corners(&poly),
            vec![(40.0, 60.0), (60.0, 60.0), (60.0, 140.0), (40.0, 140.0)]
        );
    }

    #[test]
    fn test_bbox_never_rejected_as_degenerate() {
        let rec = Record::new(0, vec![0.5, 0.5, 0.5, 0.5]);
        let params = EvalParams {
            reject_degenerate_quads: true,
            ..EvalParams::default()
        };
        assert!(matches!(
            normalize_record(&rec, 10, 10, &params),
            NormalizeOutcome::Accepted(_)
        ));
    }

    #[test]
    fn test_polygon_scaled_to_pixels() {
        let rec = Record::new(1, vec![0.0, 0.0, 1.0, 0.0, 0.5, 0.5]);
        let NormalizeOutcome::Accepted(poly) = normalize_record(&rec, 200, 100, &EvalParams::default())
        else {
            panic!("triangle should be accepted");
        };
        assert_eq!(corners(&poly), vec![(0.0, 0.0), (200.0, 0.0), (100.0, 50.0)]);
    }

    #[test]
    fn test_degenerate_quad_filter_is_configurable() {
        let rec = Record::new(0, vec![0.1, 0.1, 0.3, 0.1, 0.3, 0.1, 0.1, 0.3]);
        let on = EvalParams::default();
        let off = EvalParams {
            reject_degenerate_quads: false,
            ..EvalParams::default()
        };
        assert_eq!(
            normalize_record(&rec, 100, 100, &on),
            NormalizeOutcome::RejectedDegenerateQuad
        );
        assert!(matches!(
            normalize_record(&rec, 100, 100, &off),
            NormalizeOutcome::Accepted(_)
        ));
    }

    #[test]
    fn test_diamond_is_not_axis_aligned() {
        let diamond = Polygon::new(vec![
            Point::new(5.0, 0.0),
            Point::new(10.0, 5.0),
            Point::new(5.0, 10.0),
            Point::new(0.0, 5.0),
        ])
        .unwrap();
        assert!(!is_axis_aligned_quad(&diamond));
        assert!(is_axis_aligned_quad(&Polygon::rect(0.0, 0.0, 3.0, 4.0)));
    }

    #[test]
    fn test_malformed_records() {
        assert_eq!(
            RawRecord::from_values(&[0.1, 0.2, 0.3, 0.4, 0.5]),
            Err(MalformedReason::OddCoordinateCount(5))
        );
        assert_eq!(
            RawRecord::from_values(&[0.1, 0.2]),
            Err(MalformedReason::TooFewPoints(2))
        );
        assert_eq!(
            RawRecord::from_values(&[0.1, f64::NAN, 0.3, 0.4]),
            Err(MalformedReason::NonFinite)
        );
    }

    #[test]
    fn test_build_annotation_set_reports_dropped_records() {
        let records = vec![
            Record::new(0, vec![0.5, 0.5, 0.2, 0.2]),
            Record::new(0, vec![0.1, 0.2, 0.3]),
            Record::new(1, vec![0.1, 0.1, 0.3, 0.1, 0.3, 0.3, 0.1, 0.3]),
            Record::new(1, vec![0.1, 0.1, 0.9, 0.1, 0.5, 0.8]),
        ];
        let (set, diags) = build_annotation_set(
            &records,
            100,
            100,
            Source::GroundTruth,
            &EvalParams::default(),
            "img_001",
        )
        .unwrap();
        assert_eq!(set.instances().len(), 2);
        assert_eq!(set.instances()[1].class_id, 1);
        assert_eq!(set.instances()[0].record, 0);
        assert_eq!(set.instances()[1].record, 3);
        assert_eq!(diags.len(), 2);
        assert!(matches!(
            diags[0],
            Diagnostic::MalformedRecord { record: 1, .. }
        ));
        assert!(matches!(
            diags[1],
            Diagnostic::DegenerateQuad {
                record: 2,
                class_id: 1,
                ..
            }
        ));
    }
}
