use serde::{Deserialize, Serialize};
use std::fmt;

/// Stimulus protocol of a single trial
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Condition {
    /// Background changes once after a random delay.
    A,
    /// Background cycles through random colors until the target color shows.
    B,
}

impl Condition {
    pub const ALL: [Condition; 2] = [Condition::A, Condition::B];

    pub fn label(&self) -> &'static str {
        match self {
            Condition::A => "A",
            Condition::B => "B",
        }
    }

    /// Task description shown to the participant before and during the trial.
    pub fn instruction(&self) -> &'static str {
        match self {
            Condition::A => {
                "Klicke die Leertaste so schnell wie möglich, sobald sich der weiße Hintergrund des Bildschirms ändert."
            }
            Condition::B => {
                "Klicke die Leertaste so schnell wie möglich, wenn sich der Bildschirm-Hintergrund blau verfärbt."
            }
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
