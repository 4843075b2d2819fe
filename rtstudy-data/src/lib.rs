pub mod logger;
pub mod store;

pub use logger::{DataLogger, QUESTIONNAIRE_FILE, TRIAL_FILE};
pub use store::CsvStore;
