use rtstudy_core::{truncate_to_millis, Condition, TrialRecord};
use time::OffsetDateTime;

const NS_PER_MS: u64 = 1_000_000;

/// Monotonic timestamps (ns) of one trial.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrialTimestamps {
    /// End of the countdown.
    pub task_start: Option<u64>,
    pub condition_reached: Option<u64>,
}

/// Mutable bookkeeping for the trial in flight. Dropped once its record is logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialState {
    pub index: usize,
    pub condition: Condition,
    /// Timer epoch this trial's callbacks were scheduled under.
    pub epoch: u64,
    pub wrong_keys: u32,
    pub premature_presses: u32,
    pub condition_reached: bool,
    /// Whether the reached stimulus has been confirmed on screen.
    pub presented: bool,
    pub timestamps: TrialTimestamps,
}

impl TrialState {
    pub fn new(index: usize, condition: Condition, epoch: u64) -> Self {
        Self {
            index,
            condition,
            epoch,
            wrong_keys: 0,
            premature_presses: 0,
            condition_reached: false,
            presented: false,
            timestamps: TrialTimestamps::default(),
        }
    }

    /// Flips `condition_reached` once. Returns false if it was already set.
    pub fn mark_reached(&mut self, now: u64) -> bool {
        if self.condition_reached {
            return false;
        }
        self.condition_reached = true;
        self.timestamps.condition_reached = Some(now);
        true
    }

    /// Moves the reached timestamp to the first presented frame showing the
    /// change. Only the first call after `mark_reached` counts.
    pub fn mark_presented(&mut self, at: u64) -> bool {
        if !self.condition_reached || self.presented {
            return false;
        }
        self.presented = true;
        if let Some(reached) = self.timestamps.condition_reached.as_mut() {
            *reached = (*reached).max(at);
        }
        true
    }

    pub fn time_till_condition_ms(&self) -> Option<u64> {
        let start = self.timestamps.task_start?;
        let reached = self.timestamps.condition_reached?;
        Some(reached.saturating_sub(start) / NS_PER_MS)
    }

    pub fn reaction_time_ms(&self, response: u64) -> Option<u64> {
        let reached = self.timestamps.condition_reached?;
        Some(response.saturating_sub(reached) / NS_PER_MS)
    }

    /// `None` until the condition has been reached.
    pub fn to_record(
        &self,
        response: u64,
        logged_at: OffsetDateTime,
        participant_id: u32,
    ) -> Option<TrialRecord> {
        Some(TrialRecord {
            timestamp: truncate_to_millis(logged_at),
            participant_id,
            time_till_condition_ms: self.time_till_condition_ms()?,
            condition: self.condition,
            wrong_keys_pressed: self.wrong_keys,
            premature_presses: self.premature_presses,
            reaction_time_ms: self.reaction_time_ms(response)?,
        })
    }
}
