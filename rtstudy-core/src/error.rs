use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StudyError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Trial index {index} is outside the trial order (length {len})")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("Timer callback from epoch {fired} ignored (current epoch {current})")]
    StaleCallback { fired: u64, current: u64 },

    #[error("Storage unavailable at {}: {source}", .path.display())]
    StorageUnavailable {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl StudyError {
    pub fn storage(
        path: impl Into<PathBuf>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        StudyError::StorageUnavailable {
            path: path.into(),
            source: source.into(),
        }
    }
}

pub type StudyResult<T> = Result<T, StudyError>;
