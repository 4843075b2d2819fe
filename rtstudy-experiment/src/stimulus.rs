use crate::config::StudyConfig;
use crate::randomness::Randomizer;
use crate::trial::TrialState;
use rtstudy_core::{Condition, StimulusColor};
use rtstudy_timing::{TimerHandle, TimerQueue};
use std::time::Duration;
use tracing::debug;

/// Timer payload kinds the state machine schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    CountdownTick,
    /// Condition A: the delayed background change is due.
    StimulusOnset,
    /// Condition B: draw the next color.
    ColorCycle,
    PauseElapsed,
}

/// A timer payload tagged with the epoch it was scheduled under. Entries
/// whose epoch is not the current one are stale and must not be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scheduled {
    pub epoch: u64,
    pub event: TimerEvent,
}

/// A visible stimulus update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StimulusChange {
    pub color: StimulusColor,
    /// Whether this change is the one the participant must react to.
    pub reached: bool,
}

/// Drives the condition specific stimulus timing for one trial at a time.
pub struct StimulusScheduler {
    delay_range_secs: (u32, u32),
    cycle_interval: Duration,
    palette: Vec<StimulusColor>,
    target: StimulusColor,
    onset_color: StimulusColor,
    neutral: StimulusColor,
    pending: Option<TimerHandle>,
}

impl StimulusScheduler {
    pub fn new(config: &StudyConfig) -> Self {
        Self {
            delay_range_secs: config.delay_range_secs,
            cycle_interval: config.cycle_interval(),
            palette: config.palette.clone(),
            target: config.target_color,
            onset_color: config.onset_color,
            neutral: config.neutral_color,
            pending: None,
        }
    }

    /// Schedules the stimulus for `condition`. Returns the drawn delay for
    /// condition A, `None` for condition B.
    pub fn arm<D: Randomizer + ?Sized>(
        &mut self,
        condition: Condition,
        epoch: u64,
        now: u64,
        queue: &mut TimerQueue<Scheduled>,
        rng: &mut D,
    ) -> Option<Duration> {
        self.cancel(queue);
        match condition {
            Condition::A => {
                let (lo, hi) = self.delay_range_secs;
                let delay = Duration::from_secs(rng.draw_delay_secs(lo, hi) as u64);
                let event = Scheduled {
                    epoch,
                    event: TimerEvent::StimulusOnset,
                };
                self.pending = Some(queue.schedule(now, delay, event));
                debug!(epoch, delay_ms = delay.as_millis() as u64, "onset scheduled");
                Some(delay)
            }
            Condition::B => {
                self.start_cycle(epoch, now, queue);
                None
            }
        }
    }

    /// Condition A onset. The reached timestamp is `now`, the moment the
    /// returned change is applied.
    pub fn on_onset(&mut self, trial: &mut TrialState, now: u64) -> Option<StimulusChange> {
        self.pending = None;
        if trial.condition != Condition::A || !trial.mark_reached(now) {
            return None;
        }
        Some(StimulusChange {
            color: self.onset_color,
            reached: true,
        })
    }

    /// Condition B tick: shows a random palette color and stops cycling once
    /// the target color comes up.
    pub fn on_cycle_tick<D: Randomizer + ?Sized>(
        &mut self,
        trial: &mut TrialState,
        now: u64,
        queue: &mut TimerQueue<Scheduled>,
        rng: &mut D,
    ) -> Option<StimulusChange> {
        if trial.condition != Condition::B || trial.condition_reached {
            self.cancel(queue);
            return None;
        }
        let color = rng.draw_color(&self.palette);
        let reached = color == self.target && trial.mark_reached(now);
        if reached {
            self.cancel(queue);
        }
        debug!(%color, reached, "color cycle tick");
        Some(StimulusChange { color, reached })
    }

    /// A response before the condition B target showed up: drop the running
    /// cycle, go back to neutral and start over one interval from now.
    /// Condition A is unaffected.
    pub fn interrupt(
        &mut self,
        trial: &TrialState,
        now: u64,
        queue: &mut TimerQueue<Scheduled>,
    ) -> Option<StimulusChange> {
        if trial.condition != Condition::B || trial.condition_reached || self.pending.is_none() {
            return None;
        }
        self.cancel(queue);
        self.start_cycle(trial.epoch, now, queue);
        debug!(epoch = trial.epoch, "color cycle interrupted and restarted");
        Some(StimulusChange {
            color: self.neutral,
            reached: false,
        })
    }

    pub fn cancel(&mut self, queue: &mut TimerQueue<Scheduled>) {
        if let Some(handle) = self.pending.take() {
            queue.cancel(handle);
        }
    }

    fn start_cycle(&mut self, epoch: u64, now: u64, queue: &mut TimerQueue<Scheduled>) {
        let event = Scheduled {
            epoch,
            event: TimerEvent::ColorCycle,
        };
        self.pending = Some(queue.schedule_repeating(now, self.cycle_interval, event));
    }
}
