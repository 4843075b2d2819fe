use crate::randomness::Randomizer;
use rtstudy_core::{Condition, StudyError, StudyResult};
use tracing::debug;

/// Balanced sequence of trial conditions, fixed for the whole session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialOrder {
    conditions: Vec<Condition>,
}

impl TrialOrder {
    /// Accepts a prepared order as long as it is non-empty and balanced.
    pub fn from_conditions(conditions: Vec<Condition>) -> StudyResult<Self> {
        let a = conditions.iter().filter(|c| **c == Condition::A).count();
        let b = conditions.len() - a;
        if conditions.is_empty() || a != b {
            return Err(StudyError::InvalidConfiguration(format!(
                "trial order must hold as many A as B trials, got {a} A and {b} B"
            )));
        }
        Ok(Self { conditions })
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Condition of trial `index`. Asking past the end is a caller bug.
    pub fn get(&self, index: usize) -> StudyResult<Condition> {
        self.conditions
            .get(index)
            .copied()
            .ok_or(StudyError::IndexOutOfBounds {
                index,
                len: self.conditions.len(),
            })
    }

    pub fn count(&self, condition: Condition) -> usize {
        self.conditions.iter().filter(|c| **c == condition).count()
    }

    pub fn as_slice(&self) -> &[Condition] {
        &self.conditions
    }
}

pub struct TrialOrderGenerator;

impl TrialOrderGenerator {
    /// Shuffles `trial_count / 2` copies of each condition. Runs are not
    /// constrained; this is a plain random permutation.
    pub fn generate<D: Randomizer + ?Sized>(
        trial_count: usize,
        rng: &mut D,
    ) -> StudyResult<TrialOrder> {
        if trial_count == 0 || trial_count % 2 != 0 {
            return Err(StudyError::InvalidConfiguration(format!(
                "trial count must be a positive even number, got {trial_count}"
            )));
        }
        let mut conditions: Vec<Condition> = Condition::ALL
            .iter()
            .flat_map(|c| std::iter::repeat_n(*c, trial_count / 2))
            .collect();
        rng.shuffle_conditions(&mut conditions);
        debug!(?conditions, "trial order generated");
        Ok(TrialOrder { conditions })
    }
}
