pub mod condition;
pub mod error;
pub mod phase;
pub mod stimulus;
pub mod trial;

pub use condition::Condition;
pub use error::{StudyError, StudyResult};
pub use phase::{StudyPhase, PAUSE_MESSAGE};
pub use stimulus::{StimulusColor, DEFAULT_PALETTE};
pub use trial::{
    truncate_to_millis, MemorySink, QuestionnaireAnswers, QuestionnaireRecord, RecordSink,
    TrialRecord,
};
