pub mod config;
pub mod order;
pub mod randomness;
pub mod state;
pub mod stimulus;
pub mod trial;

pub use config::StudyConfig;
pub use order::{TrialOrder, TrialOrderGenerator};
pub use randomness::{RandomDraws, Randomizer};
pub use state::{Key, StudyEvent, StudyView, TrialStateMachine};
pub use stimulus::{Scheduled, StimulusChange, StimulusScheduler, TimerEvent};
pub use trial::{TrialState, TrialTimestamps};
