/// Shown on the pause screen at the midpoint of the study.
pub const PAUSE_MESSAGE: &str =
    "Du hast die Hälfte geschafft! Ruhe dich kurz aus, gleich geht es weiter!";

/// Study lifecycle. Only `Trial` accepts participant key input.
#[derive(Copy, Debug, Clone, PartialEq, Eq, Default)]
pub enum StudyPhase {
    #[default]
    StartScreen,
    Countdown,
    Trial,
    Pause,
    Questionnaire,
    Done,
}

impl StudyPhase {
    pub fn allows_input(&self) -> bool {
        matches!(self, Self::Trial)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// Phases in which a trial (countdown included) is in flight.
    pub fn in_trial(&self) -> bool {
        matches!(self, Self::Countdown | Self::Trial)
    }
}
