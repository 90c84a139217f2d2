//! Dataset-level statistics folded from per-image match results.
//!
//! IoU sums are kept in fixed point so that folding and merging are exactly
//! associative and commutative: the totals do not depend on image order or
//! on how images were split across worker threads.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::params::EvalParams;
use crate::types::{ClassId, MatchResult};

/// Fixed-point resolution of accumulated IoU values (2^-40).
const IOU_SCALE: f64 = (1u64 << 40) as f64;

/// Order-independent sum of IoU values in [0, 1].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IouSum(u128);

impl IouSum {
    pub fn add(&mut self, iou: f64) {
        self.0 += (iou.clamp(0.0, 1.0) * IOU_SCALE).round() as u128;
    }

    pub fn value(&self) -> f64 {
        self.0 as f64 / IOU_SCALE
    }

    fn merge(self, other: IouSum) -> IouSum {
        IouSum(self.0 + other.0)
    }
}

/// Running statistics for one class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassStats {
    pub matched_count: u64,
    pub iou_sum: IouSum,
    /// Ground truth with no eligible prediction.
    pub missed_count: u64,
    /// Predictions with no ground-truth partner.
    pub false_positive_count: u64,
    /// Images containing at least one ground-truth instance of the class.
    pub images_with_ground_truth: u64,
    /// Sum over those images of the best matched IoU (0 if none matched).
    pub best_iou_sum: IouSum,
}

impl ClassStats {
    pub fn mean_iou(&self) -> Option<f64> {
        (self.matched_count > 0).then(|| self.iou_sum.value() / self.matched_count as f64)
    }

    pub fn mean_best_iou(&self) -> Option<f64> {
        (self.images_with_ground_truth > 0)
            .then(|| self.best_iou_sum.value() / self.images_with_ground_truth as f64)
    }

    fn merge(self, other: ClassStats) -> ClassStats {
        ClassStats {
            matched_count: self.matched_count + other.matched_count,
            iou_sum: self.iou_sum.merge(other.iou_sum),
            missed_count: self.missed_count + other.missed_count,
            false_positive_count: self.false_positive_count + other.false_positive_count,
            images_with_ground_truth: self.images_with_ground_truth
                + other.images_with_ground_truth,
            best_iou_sum: self.best_iou_sum.merge(other.best_iou_sum),
        }
    }
}

/// Per-class statistics for one class, as reported to consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassSummary {
    pub class_id: ClassId,
    pub matched_count: u64,
    pub mean_iou_of_matches: Option<f64>,
    pub missed_count: u64,
    pub false_positive_count: u64,
    pub images_with_ground_truth: u64,
    pub mean_best_iou: Option<f64>,
}

/// Statistics accumulated over an evaluation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregateReport {
    classes: BTreeMap<ClassId, ClassStats>,
    images: u64,
}

impl AggregateReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one image's matches.
    pub fn fold(mut self, result: &MatchResult) -> Self {
        self.images += 1;
        for (class_id, matches) in result.classes() {
            let stats = self.classes.entry(class_id).or_default();
            let mut has_ground_truth = false;
            let mut best = 0.0f64;
            for m in matches {
                if m.ground_truth.is_some() {
                    has_ground_truth = true;
                }
                if m.is_matched() {
                    stats.matched_count += 1;
                    stats.iou_sum.add(m.iou);
                    best = best.max(m.iou);
                } else if m.is_missed() {
                    stats.missed_count += 1;
                } else if m.is_false_positive() {
                    stats.false_positive_count += 1;
                }
            }
            if has_ground_truth {
                stats.images_with_ground_truth += 1;
                stats.best_iou_sum.add(best);
            }
        }
        self
    }

    /// Combine two partial reports built from disjoint sets of images.
    pub fn merge(mut self, other: AggregateReport) -> Self {
        self.images += other.images;
        for (class_id, stats) in other.classes {
            let entry = self.classes.entry(class_id).or_default();
            *entry = entry.merge(stats);
        }
        self
    }

    /// Number of images folded in.
    pub fn images(&self) -> u64 {
        self.images
    }

    pub fn class(&self, class_id: ClassId) -> Option<&ClassStats> {
        self.classes.get(&class_id)
    }

    pub fn summary(&self) -> Vec<ClassSummary> {
        self.classes
            .iter()
            .map(|(&class_id, stats)| ClassSummary {
                class_id,
                matched_count: stats.matched_count,
                mean_iou_of_matches: stats.mean_iou(),
                missed_count: stats.missed_count,
                false_positive_count: stats.false_positive_count,
                images_with_ground_truth: stats.images_with_ground_truth,
                mean_best_iou: stats.mean_best_iou(),
            })
            .collect()
    }

    /// Print one line per class.
    pub fn print_summary(&self, params: &EvalParams) {
        let fmt_mean = |v: Option<f64>| match v {
            Some(v) => format!("{:0.4}", v),
            None => "-".to_string(),
        };
        println!(
            " {:<16} | {:>7} | {:>8} | {:>6} | {:>6} | {:>9}",
            "class", "matched", "mean IoU", "missed", "FP", "best IoU"
        );
        for s in self.summary() {
            println!(
                " {:<16} | {:>7} | {:>8} | {:>6} | {:>6} | {:>9}",
                params.class_name(s.class_id),
                s.matched_count,
                fmt_mean(s.mean_iou_of_matches),
                s.missed_count,
                s.false_positive_count,
                fmt_mean(s.mean_best_iou)
            );
        }
        println!(
            "Images evaluated: {} (IoU threshold {:.2})",
            self.images, params.min_iou_threshold
        );
    }
}
