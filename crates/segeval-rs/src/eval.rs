//! Evaluation engine: per-image pipeline and parallel dataset evaluation.
//!
//! Each image runs normalize -> repair -> score -> assign independently. The
//! dataset driver fans images out over the rayon pool and folds the results
//! into an [`AggregateReport`] with a fold/reduce, so no report is ever
//! shared between threads.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::aggregate::AggregateReport;
use crate::assign;
use crate::diagnostic::Diagnostic;
use crate::error::EvalError;
use crate::geometry::{self, RepairOutcome};
use crate::normalize;
use crate::params::EvalParams;
use crate::score::{self, PreparedSet};
use crate::types::{AnnotationSet, Match, MatchResult, Record, Source};

/// One side of an image: its size and its tokenized records.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ImageAnnotations {
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub records: Vec<Record>,
}

/// Ground truth and predictions for the same image.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ImagePair {
    pub name: String,
    pub ground_truth: ImageAnnotations,
    pub predicted: ImageAnnotations,
}

/// A set of image pairs to evaluate, as stored on disk.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Manifest {
    #[serde(default)]
    pub images: Vec<ImagePair>,
}

impl Manifest {
    pub fn from_json_file(path: &Path) -> Result<Self, EvalError> {
        let file = std::fs::File::open(path).map_err(|source| EvalError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let reader = std::io::BufReader::new(file);
        serde_json::from_reader(reader).map_err(|source| EvalError::Json {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Matches and warnings for one successfully evaluated image.
#[derive(Debug, Clone, Serialize)]
pub struct ImageEvaluation {
    pub name: String,
    pub matches: MatchResult,
    pub diagnostics: Vec<Diagnostic>,
}

/// An image whose comparison was abandoned.
#[derive(Debug)]
pub struct ImageFailure {
    pub name: String,
    pub error: EvalError,
}

/// Outcome of a dataset run. Failed and skipped images do not contribute to
/// `report`.
#[derive(Debug, Default)]
pub struct DatasetEvaluation {
    pub report: AggregateReport,
    pub images: Vec<ImageEvaluation>,
    pub failures: Vec<ImageFailure>,
    /// Images never started because the run was stopped.
    pub skipped: Vec<String>,
}

enum ImageOutcome {
    Evaluated(ImageEvaluation),
    Failed(ImageFailure),
    Skipped(String),
}

/// Evaluation configured once and shared by reference across images.
#[derive(Debug, Clone)]
pub struct EvaluationEngine {
    params: EvalParams,
}

impl EvaluationEngine {
    pub fn new(params: EvalParams) -> Result<Self, EvalError> {
        params.validate()?;
        Ok(EvaluationEngine { params })
    }

    pub fn params(&self) -> &EvalParams {
        &self.params
    }

    /// Normalize one side of an image.
    pub fn prepare_set(
        &self,
        image: &str,
        source: Source,
        annotations: &ImageAnnotations,
    ) -> Result<(AnnotationSet, Vec<Diagnostic>), EvalError> {
        normalize::build_annotation_set(
            &annotations.records,
            annotations.width,
            annotations.height,
            source,
            &self.params,
            image,
        )
    }

    /// Match two annotation sets of the same image, class by class.
    ///
    /// Fails with [`EvalError::DimensionMismatch`] when the sets disagree on
    /// the image size; nothing is scored in that case.
    pub fn match_sets(
        &self,
        image: &str,
        ground_truth: &AnnotationSet,
        predicted: &AnnotationSet,
    ) -> Result<(MatchResult, Vec<Diagnostic>), EvalError> {
        check_dimensions(ground_truth.dimensions(), predicted.dimensions())?;

        let mut diagnostics = Vec::new();
        let gt = prepare_regions(image, ground_truth, &mut diagnostics);
        let pred = prepare_regions(image, predicted, &mut diagnostics);

        let gt_instances = ground_truth.instances();
        let pred_instances = predicted.instances();
        let mut result = MatchResult::new();
        for (class_id, matrix) in score::class_matrices(&gt, &pred) {
            let assignment = assign::solve(
                &matrix.ious,
                matrix.rows(),
                matrix.cols(),
                self.params.min_iou_threshold,
                self.params.strategy,
            );

            let mut partner: Vec<Option<(usize, f64)>> = vec![None; matrix.rows()];
            for &(i, j, iou) in &assignment.pairs {
                partner[i] = Some((j, iou));
            }

            let mut matches = Vec::with_capacity(matrix.rows() + assignment.unmatched_cols.len());
            for (i, &gt_idx) in matrix.ground_truth.iter().enumerate() {
                let gt_record = Some(gt_instances[gt_idx].record);
                matches.push(match partner[i] {
                    Some((j, iou)) => {
                        let pred_idx = matrix.predicted[j];
                        Match {
                            ground_truth: Some(gt_idx),
                            predicted: Some(pred_idx),
                            iou,
                            ground_truth_record: gt_record,
                            predicted_record: Some(pred_instances[pred_idx].record),
                        }
                    }
                    None => Match {
                        ground_truth: Some(gt_idx),
                        predicted: None,
                        iou: 0.0,
                        ground_truth_record: gt_record,
                        predicted_record: None,
                    },
                });
            }
            for &j in &assignment.unmatched_cols {
                let pred_idx = matrix.predicted[j];
                matches.push(Match {
                    ground_truth: None,
                    predicted: Some(pred_idx),
                    iou: 0.0,
                    ground_truth_record: None,
                    predicted_record: Some(pred_instances[pred_idx].record),
                });
            }
            result.insert(class_id, matches);
        }

        Ok((result, diagnostics))
    }

    /// Full pipeline for one image pair.
    pub fn evaluate_image(&self, pair: &ImagePair) -> Result<ImageEvaluation, EvalError> {
        let gt = &pair.ground_truth;
        let pred = &pair.predicted;
        check_dimensions((gt.width, gt.height), (pred.width, pred.height))?;

        let (gt_set, mut diagnostics) = self.prepare_set(&pair.name, Source::GroundTruth, gt)?;
        let (pred_set, pred_diags) = self.prepare_set(&pair.name, Source::Predicted, pred)?;
        diagnostics.extend(pred_diags);

        let (matches, match_diags) = self.match_sets(&pair.name, &gt_set, &pred_set)?;
        diagnostics.extend(match_diags);

        debug!(
            "{}: {} ground truth, {} predicted, {} diagnostic(s)",
            pair.name,
            gt_set.instances().len(),
            pred_set.instances().len(),
            diagnostics.len()
        );

        Ok(ImageEvaluation {
            name: pair.name.clone(),
            matches,
            diagnostics,
        })
    }

    /// Evaluate every image pair in parallel.
    pub fn evaluate_dataset(&self, pairs: &[ImagePair]) -> DatasetEvaluation {
        self.evaluate_dataset_until(pairs, &AtomicBool::new(false))
    }

    /// Like [`Self::evaluate_dataset`], but images not yet started once `stop`
    /// is set are skipped. Images already running finish normally.
    pub fn evaluate_dataset_until(
        &self,
        pairs: &[ImagePair],
        stop: &AtomicBool,
    ) -> DatasetEvaluation {
        let outcomes: Vec<ImageOutcome> = pairs
            .par_iter()
            .map(|pair| {
                if stop.load(Ordering::Relaxed) {
                    return ImageOutcome::Skipped(pair.name.clone());
                }
                match self.evaluate_image(pair) {
                    Ok(evaluation) => ImageOutcome::Evaluated(evaluation),
                    Err(error) => {
                        warn!("{}: not evaluated: {}", pair.name, error);
                        ImageOutcome::Failed(ImageFailure {
                            name: pair.name.clone(),
                            error,
                        })
                    }
                }
            })
            .collect();

        let mut evaluation = DatasetEvaluation::default();
        for outcome in outcomes {
            match outcome {
                ImageOutcome::Evaluated(image) => evaluation.images.push(image),
                ImageOutcome::Failed(failure) => evaluation.failures.push(failure),
                ImageOutcome::Skipped(name) => evaluation.skipped.push(name),
            }
        }

        evaluation.report = evaluation
            .images
            .par_iter()
            .fold(AggregateReport::new, |acc, image| acc.fold(&image.matches))
            .reduce(AggregateReport::new, AggregateReport::merge);

        evaluation
    }
}

fn check_dimensions(ground_truth: (u32, u32), predicted: (u32, u32)) -> Result<(), EvalError> {
    if ground_truth != predicted {
        return Err(EvalError::DimensionMismatch {
            ground_truth,
            predicted,
        });
    }
    Ok(())
}

fn prepare_regions<'a>(
    image: &str,
    set: &'a AnnotationSet,
    diagnostics: &mut Vec<Diagnostic>,
) -> PreparedSet<'a> {
    let source = set.source();
    let regions = set
        .instances()
        .iter()
        .enumerate()
        .map(|(i, inst)| {
            let (region, outcome) = geometry::prepare(&inst.polygon);
            match outcome {
                RepairOutcome::Valid => {}
                RepairOutcome::Repaired { parts } => {
                    debug!(
                        "{}: repaired {} instance {} into {} part(s)",
                        image, source, i, parts
                    );
                    diagnostics.push(Diagnostic::Repaired {
                        image: image.to_string(),
                        source,
                        instance: i,
                        record: inst.record,
                        class_id: inst.class_id,
                        parts,
                    });
                }
                RepairOutcome::Degenerate => {
                    debug!("{}: {} instance {} has zero area", image, source, i);
                    diagnostics.push(Diagnostic::DegenerateGeometry {
                        image: image.to_string(),
                        source,
                        instance: i,
                        record: inst.record,
                        class_id: inst.class_id,
                    });
                }
            }
            region
        })
        .collect();
    PreparedSet { set, regions }
}
