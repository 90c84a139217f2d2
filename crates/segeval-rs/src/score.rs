//! Per-class IoU matrices between ground truth and predictions.

use std::collections::BTreeMap;

use crate::geometry::{self, Region};
use crate::types::{AnnotationSet, ClassId};

/// An annotation set together with the repaired region of each instance.
///
/// `regions[i]` belongs to `set.instances()[i]`.
#[derive(Debug, Clone)]
pub struct PreparedSet<'a> {
    pub set: &'a AnnotationSet,
    pub regions: Vec<Region>,
}

/// IoU matrix for one class.
///
/// `ground_truth[i]` and `predicted[j]` map matrix rows and columns back to
/// indices in the full annotation sets.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassMatrix {
    pub ground_truth: Vec<usize>,
    pub predicted: Vec<usize>,
    pub ious: Vec<Vec<f64>>,
}

impl ClassMatrix {
    pub fn rows(&self) -> usize {
        self.ground_truth.len()
    }

    pub fn cols(&self) -> usize {
        self.predicted.len()
    }
}

/// `M[i][j] = iou(gt[i], pred[j])`, one row per ground-truth region.
pub fn iou_matrix(gt: &[&Region], pred: &[&Region]) -> Vec<Vec<f64>> {
    gt.iter()
        .map(|g| pred.iter().map(|p| geometry::iou(g, p)).collect())
        .collect()
}

/// Build one matrix per class present on either side.
///
/// Instances are only ever scored against instances of their own class. A
/// class present on one side only yields an `n x 0` or `0 x m` matrix.
pub fn class_matrices(gt: &PreparedSet<'_>, pred: &PreparedSet<'_>) -> BTreeMap<ClassId, ClassMatrix> {
    let mut classes = gt.set.classes();
    classes.extend(pred.set.classes());

    classes
        .into_iter()
        .map(|class_id| {
            let gt_idx = gt.set.indices_of_class(class_id);
            let pred_idx = pred.set.indices_of_class(class_id);
            let gt_regions: Vec<&Region> = gt_idx.iter().map(|&i| &gt.regions[i]).collect();
            let pred_regions: Vec<&Region> = pred_idx.iter().map(|&j| &pred.regions[j]).collect();
            let ious = iou_matrix(&gt_regions, &pred_regions);
            (
                class_id,
                ClassMatrix {
                    ground_truth: gt_idx,
                    predicted: pred_idx,
                    ious,
                },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::repair;
    use crate::types::{Polygon, Source};

    fn square(x0: f64, y0: f64, side: f64) -> Polygon {
        Polygon::rect(x0, y0, x0 + side, y0 + side)
    }

    fn annotation_set(source: Source, shapes: &[(ClassId, Polygon)]) -> AnnotationSet {
        let mut set = AnnotationSet::new(source, 100, 100).unwrap();
        for (class_id, polygon) in shapes {
            set.push(*class_id, polygon.clone());
        }
        set
    }

    fn prepared(set: &AnnotationSet) -> PreparedSet<'_> {
        PreparedSet {
            set,
            regions: set.instances().iter().map(|i| repair(&i.polygon)).collect(),
        }
    }

    #[test]
    fn test_iou_matrix_shape() {
        let a = repair(&square(0.0, 0.0, 10.0));
        let b = repair(&square(5.0, 0.0, 10.0));
        let m = iou_matrix(&[&a], &[&a, &b]);
        assert_eq!(m.len(), 1);
        assert_eq!(m[0].len(), 2);
        assert_eq!(m[0][0], 1.0);
    }

    #[test]
    fn test_no_cross_class_scores() {
        // identical shapes, different classes
        let gt = annotation_set(
            Source::GroundTruth,
            &[(0, square(0.0, 0.0, 10.0)), (1, square(50.0, 50.0, 10.0))],
        );
        let pred = annotation_set(
            Source::Predicted,
            &[(1, square(0.0, 0.0, 10.0)), (0, square(50.0, 50.0, 10.0))],
        );
        let mats = class_matrices(&prepared(&gt), &prepared(&pred));
        assert_eq!(mats.len(), 2);
        let c0 = &mats[&0];
        assert_eq!(c0.ground_truth, vec![0]);
        assert_eq!(c0.predicted, vec![1]);
        assert_eq!(c0.ious, vec![vec![0.0]]);
        let c1 = &mats[&1];
        assert_eq!(c1.ground_truth, vec![1]);
        assert_eq!(c1.predicted, vec![0]);
        assert_eq!(c1.ious, vec![vec![0.0]]);
    }

    #[test]
    fn test_one_sided_class() {
        let gt = annotation_set(
            Source::GroundTruth,
            &[(3, square(0.0, 0.0, 1.0)), (3, square(2.0, 2.0, 1.0))],
        );
        let pred = annotation_set(Source::Predicted, &[]);
        let mats = class_matrices(&prepared(&gt), &prepared(&pred));
        let m = &mats[&3];
        assert_eq!((m.rows(), m.cols()), (2, 0));
        assert_eq!(m.ious, vec![Vec::<f64>::new(), Vec::new()]);
    }
}
