use rtstudy_core::{StimulusColor, StudyError, StudyResult, DEFAULT_PALETTE};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Countdown display resolution.
pub const COUNTDOWN_TICK: Duration = Duration::from_secs(1);

/// Fixed study parameters. Missing JSON fields fall back to the defaults below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StudyConfig {
    pub participant_id: u32,
    pub trial_count: usize,
    pub countdown_secs: u32,
    pub pause_secs: u32,
    /// Inclusive range of whole seconds before the condition A change.
    pub delay_range_secs: (u32, u32),
    pub cycle_interval_ms: u64,
    pub palette: Vec<StimulusColor>,
    pub target_color: StimulusColor,
    /// Background shown when the condition A change happens.
    pub onset_color: StimulusColor,
    pub neutral_color: StimulusColor,
}

impl Default for StudyConfig {
    fn default() -> Self {
        Self {
            participant_id: 0,
            trial_count: 20,
            countdown_secs: 5,
            pause_secs: 30,
            delay_range_secs: (1, 6),
            cycle_interval_ms: 1000,
            palette: DEFAULT_PALETTE.to_vec(),
            target_color: StimulusColor::Blue,
            onset_color: StimulusColor::Orange,
            neutral_color: StimulusColor::White,
        }
    }
}

impl StudyConfig {
    pub fn for_participant(participant_id: u32) -> Self {
        Self {
            participant_id,
            ..Self::default()
        }
    }

    /// Reads a JSON config file. The result is not validated; the participant
    /// id usually arrives separately.
    pub fn load<P: AsRef<Path>>(path: P) -> StudyResult<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|e| {
            StudyError::InvalidConfiguration(format!("cannot read {}: {e}", path.display()))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            StudyError::InvalidConfiguration(format!("cannot parse {}: {e}", path.display()))
        })
    }

    pub fn validate(&self) -> StudyResult<()> {
        let invalid = |msg: String| Err(StudyError::InvalidConfiguration(msg));

        if self.participant_id == 0 {
            return invalid("participant id must be a positive integer".into());
        }
        if self.trial_count == 0 || self.trial_count % 2 != 0 {
            return invalid(format!(
                "trial count must be a positive even number, got {}",
                self.trial_count
            ));
        }
        if self.countdown_secs == 0 {
            return invalid("countdown must last at least one second".into());
        }
        let (lo, hi) = self.delay_range_secs;
        if lo == 0 || lo > hi {
            return invalid(format!("stimulus delay range {lo}..={hi} s is not valid"));
        }
        if self.cycle_interval_ms == 0 {
            return invalid("color cycle interval must be positive".into());
        }
        if self.palette.is_empty() {
            return invalid("color palette is empty".into());
        }
        if !self.palette.contains(&self.target_color) {
            // cycling would never terminate
            return invalid(format!(
                "target color {} is not part of the palette",
                self.target_color
            ));
        }
        if self.onset_color == self.neutral_color {
            return invalid(format!(
                "onset color {} is indistinguishable from the neutral background",
                self.onset_color
            ));
        }
        Ok(())
    }

    pub fn midpoint(&self) -> usize {
        self.trial_count / 2
    }

    pub fn pause(&self) -> Duration {
        Duration::from_secs(self.pause_secs as u64)
    }

    pub fn cycle_interval(&self) -> Duration {
        Duration::from_millis(self.cycle_interval_ms)
    }
}
