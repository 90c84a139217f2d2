use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::EvalError;
use crate::types::ClassId;

/// Algorithm used to solve the per-class assignment problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStrategy {
    /// Kuhn–Munkres, O(n³) per solve.
    #[default]
    Hungarian,
    /// Enumerates every matching. Only practical for a handful of instances;
    /// larger problems fall back to Hungarian.
    Exhaustive,
}

/// Evaluation parameters controlling normalization and matching.
///
/// Every field has a default, so a partial JSON config is accepted.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EvalParams {
    /// Minimum IoU for a ground-truth/prediction pair to be matched (default: 0.5).
    pub min_iou_threshold: f64,
    /// Drop polygon-format records that are 4-point axis-aligned rectangles
    /// (default: true). Box-format records are never dropped.
    pub reject_degenerate_quads: bool,
    /// Assignment solver (default: Hungarian).
    pub strategy: AssignmentStrategy,
    /// Optional display names for the printed summary.
    pub class_names: BTreeMap<ClassId, String>,
}

impl Default for EvalParams {
    fn default() -> Self {
        EvalParams {
            min_iou_threshold: 0.5,
            reject_degenerate_quads: true,
            strategy: AssignmentStrategy::Hungarian,
            class_names: BTreeMap::new(),
        }
    }
}

impl EvalParams {
    /// Load parameters from a JSON file; missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, EvalError> {
        let file = std::fs::File::open(path).map_err(|source| EvalError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let reader = std::io::BufReader::new(file);
        let params: EvalParams =
            serde_json::from_reader(reader).map_err(|source| EvalError::Json {
                path: path.to_path_buf(),
                source,
            })?;
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), EvalError> {
        if !(0.0..=1.0).contains(&self.min_iou_threshold) {
            return Err(EvalError::InvalidParams {
                message: format!(
                    "min_iou_threshold must lie in [0, 1], got {}",
                    self.min_iou_threshold
                ),
            });
        }
        Ok(())
    }

    /// Display name for a class, falling back to its numeric id.
    pub fn class_name(&self, class_id: ClassId) -> String {
        self.class_names
            .get(&class_id)
            .cloned()
            .unwrap_or_else(|| class_id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let params = EvalParams::default();
        assert_eq!(params.min_iou_threshold, 0.5);
        assert!(params.reject_degenerate_quads);
        assert_eq!(params.strategy, AssignmentStrategy::Hungarian);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let params: EvalParams =
            serde_json::from_str(r#"{"min_iou_threshold": 0.25, "strategy": "exhaustive"}"#)
                .unwrap();
        assert_eq!(params.min_iou_threshold, 0.25);
        assert!(params.reject_degenerate_quads);
        assert_eq!(params.strategy, AssignmentStrategy::Exhaustive);
    }

    #[test]
    fn test_validate_rejects_out_of_range_threshold() {
        let params = EvalParams {
            min_iou_threshold: 1.5,
            ..EvalParams::default()
        };
        assert!(matches!(
            params.validate(),
            Err(EvalError::InvalidParams { .. })
        ));
        let nan = EvalParams {
            min_iou_threshold: f64::NAN,
            ..EvalParams::default()
        };
        assert!(nan.validate().is_err());
    }

    #[test]
    fn test_class_name_fallback() {
        let mut params = EvalParams::default();
        params.class_names.insert(0, "mandible".into());
        assert_eq!(params.class_name(0), "mandible");
        assert_eq!(params.class_name(1), "1");
    }
}
