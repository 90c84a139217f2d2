pub mod aggregate;
pub mod assign;
pub mod diagnostic;
pub mod error;
pub mod eval;
pub mod geometry;
pub mod normalize;
pub mod params;
pub mod score;
pub mod types;

pub use aggregate::{AggregateReport, ClassStats, ClassSummary};
pub use diagnostic::{Diagnostic, MalformedReason};
pub use error::EvalError;
pub use eval::{
    DatasetEvaluation, EvaluationEngine, ImageAnnotations, ImageEvaluation, ImageFailure,
    ImagePair, Manifest,
};
pub use geometry::Region;
pub use params::{AssignmentStrategy, EvalParams};
pub use types::{
    AnnotationSet, ClassId, Instance, Match, MatchRecord, MatchResult, Point, Polygon, Record,
    Source,
};
