pub mod pattern;
pub mod prompt;
pub mod parser;
pub mod model; // One model call per extraction, failures classified
pub mod coordinator; // Model first, pattern fallback, never blended
pub mod gaps;
pub mod clarify; // Bounded two-call clarification rounds
pub mod validate;

pub use clarify::{
    ClarificationEngine, ClarificationError, ClarificationRound, EngineState, FieldUpdate,
    Question, RoundSummary, UpdateAction,
};
pub use coordinator::{ExtractionCoordinator, ExtractionOutcome, ExtractionSource, FallbackWarning};
pub use gaps::find_gaps;
pub use model::{ModelExtraction, ModelExtractor, ModelFailure, ModelFailureKind};
pub use pattern::PatternExtractor;
pub use validate::{validate, CompletedForm, ValidationResult, Violation, ViolationReason};
