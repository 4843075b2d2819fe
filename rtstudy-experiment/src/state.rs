use crate::config::{StudyConfig, COUNTDOWN_TICK};
use crate::order::{TrialOrder, TrialOrderGenerator};
use crate::randomness::Randomizer;
use crate::stimulus::{Scheduled, StimulusChange, StimulusScheduler, TimerEvent};
use crate::trial::TrialState;
use rtstudy_core::{
    Condition, QuestionnaireAnswers, QuestionnaireRecord, RecordSink, StimulusColor, StudyError,
    StudyPhase, StudyResult, TrialRecord, PAUSE_MESSAGE,
};
use rtstudy_timing::{Fired, Timer, TimerHandle, TimerQueue};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Participant key input. Anything but the response key is `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Response,
    Other,
}

/// Notifications for the front end, in the order things happened.
#[derive(Debug, Clone, PartialEq)]
pub enum StudyEvent {
    TrialStarted { index: usize, condition: Condition },
    CountdownChanged(u32),
    /// Countdown over, stimulus armed.
    TaskStarted { index: usize, condition: Condition },
    BackgroundChanged(StimulusColor),
    ConditionReached { index: usize, after_ms: u64 },
    PrematurePress { count: u32 },
    WrongKey { count: u32 },
    TrialLogged(TrialRecord),
    PauseStarted { resume_in: Duration },
    QuestionnaireOpened,
    StudyComplete,
}

/// Everything a front end needs to draw the current frame.
#[derive(Debug, Clone, PartialEq)]
pub struct StudyView {
    pub phase: StudyPhase,
    pub countdown_remaining: u32,
    pub countdown_total: u32,
    /// 1-based, clamped to `trial_total`.
    pub trial_number: usize,
    pub trial_total: usize,
    pub instruction: Option<&'static str>,
    pub background: StimulusColor,
    pub complete: bool,
}

impl StudyView {
    pub fn countdown_fraction(&self) -> f32 {
        if self.phase != StudyPhase::Countdown || self.countdown_total == 0 {
            return 0.0;
        }
        self.countdown_remaining as f32 / self.countdown_total as f32
    }

    /// Share of trials already completed.
    pub fn progress_fraction(&self) -> f32 {
        if self.trial_total == 0 {
            return 0.0;
        }
        let done = match self.phase {
            StudyPhase::Questionnaire | StudyPhase::Done => self.trial_total,
            StudyPhase::Pause => self.trial_number,
            _ => self.trial_number.saturating_sub(1),
        };
        done as f32 / self.trial_total as f32
    }
}

/// Owns the study lifecycle: trial order, per-trial bookkeeping, timers and
/// the record sink. Single-threaded; the owner calls [`update`] whenever the
/// next deadline passes and forwards key presses to [`handle_key`].
///
/// [`update`]: TrialStateMachine::update
/// [`handle_key`]: TrialStateMachine::handle_key
pub struct TrialStateMachine<T, D, S>
where
    T: Timer,
    D: Randomizer,
    S: RecordSink,
{
    config: StudyConfig,
    timer: T,
    rng: D,
    sink: S,
    order: TrialOrder,
    phase: StudyPhase,
    trial_index: usize,
    current: Option<TrialState>,
    queue: TimerQueue<Scheduled>,
    stimulus: StimulusScheduler,
    countdown_remaining: u32,
    countdown_handle: Option<TimerHandle>,
    pause_handle: Option<TimerHandle>,
    pause_taken: bool,
    background: StimulusColor,
    /// Bumped whenever a trial starts or ends and on teardown.
    epoch: u64,
    halted: bool,
}

impl<T, D, S> TrialStateMachine<T, D, S>
where
    T: Timer,
    D: Randomizer,
    S: RecordSink,
{
    /// Validates `config` and draws a fresh trial order.
    pub fn new(config: StudyConfig, timer: T, mut rng: D, sink: S) -> StudyResult<Self> {
        config.validate()?;
        let order = TrialOrderGenerator::generate(config.trial_count, &mut rng)?;
        Self::with_order(config, order, timer, rng, sink)
    }

    /// Uses a prepared trial order instead of drawing one.
    pub fn with_order(
        config: StudyConfig,
        order: TrialOrder,
        timer: T,
        rng: D,
        sink: S,
    ) -> StudyResult<Self> {
        config.validate()?;
        if order.len() != config.trial_count {
            return Err(StudyError::InvalidConfiguration(format!(
                "trial order has {} entries, config expects {}",
                order.len(),
                config.trial_count
            )));
        }
        info!(
            participant = config.participant_id,
            trials = config.trial_count,
            "study prepared"
        );
        Ok(Self {
            stimulus: StimulusScheduler::new(&config),
            countdown_remaining: config.countdown_secs,
            background: config.neutral_color,
            config,
            timer,
            rng,
            sink,
            order,
            phase: StudyPhase::StartScreen,
            trial_index: 0,
            current: None,
            queue: TimerQueue::new(),
            countdown_handle: None,
            pause_handle: None,
            pause_taken: false,
            epoch: 0,
            halted: false,
        })
    }

    /// `StartScreen -> Countdown`. Ignored in any other phase.
    pub fn start(&mut self) -> StudyResult<Vec<StudyEvent>> {
        let mut events = Vec::new();
        if self.halted || self.phase != StudyPhase::StartScreen {
            debug!(phase = ?self.phase, "start ignored");
            return Ok(events);
        }
        info!(participant = self.config.participant_id, "study started");
        self.begin_countdown(&mut events)?;
        Ok(events)
    }

    /// Fires every timer due at `timer.now()`, in deadline order.
    pub fn update(&mut self) -> StudyResult<Vec<StudyEvent>> {
        let mut events = Vec::new();
        if self.halted {
            return Ok(events);
        }
        let now = self.timer.now();
        while let Some(fired) = self.queue.pop_due(now) {
            match self.dispatch(fired, &mut events) {
                Ok(()) => {}
                Err(e @ StudyError::StaleCallback { .. }) => debug!("{e}"),
                Err(e) => return Err(e),
            }
            if self.halted {
                break;
            }
        }
        Ok(events)
    }

    /// Key input; only acted on during `Trial`.
    pub fn handle_key(&mut self, key: Key) -> StudyResult<Vec<StudyEvent>> {
        let mut events = Vec::new();
        if self.halted || !self.phase.allows_input() {
            trace!(?key, phase = ?self.phase, "key ignored");
            return Ok(events);
        }
        let now = self.timer.now();
        let Some(trial) = self.current.as_mut() else {
            warn!(?key, "no trial in flight during trial phase");
            return Ok(events);
        };

        match key {
            Key::Other => {
                trial.wrong_keys += 1;
                events.push(StudyEvent::WrongKey {
                    count: trial.wrong_keys,
                });
            }
            Key::Response if trial.condition_reached => {
                self.complete_trial(now, &mut events)?;
            }
            Key::Response => {
                trial.premature_presses += 1;
                events.push(StudyEvent::PrematurePress {
                    count: trial.premature_presses,
                });
                debug!(
                    trial = trial.index,
                    count = trial.premature_presses,
                    "response before condition reached"
                );
                if let Some(change) = self.stimulus.interrupt(trial, now, &mut self.queue) {
                    self.apply_change(change, &mut events);
                }
            }
        }
        Ok(events)
    }

    /// Front end reports that a frame went on screen at `at` (timer ns). The
    /// first frame after the condition is reached becomes its reached time,
    /// so time-till-condition and reaction time are measured from what the
    /// participant could actually see.
    pub fn mark_presented(&mut self, at: u64) {
        if self.halted || self.phase != StudyPhase::Trial {
            return;
        }
        let Some(trial) = self.current.as_mut() else {
            return;
        };
        if let (Some(before), true) = (trial.timestamps.condition_reached, trial.mark_presented(at)) {
            trace!(
                trial = trial.index,
                latency_us = at.saturating_sub(before) / 1_000,
                "reached stimulus presented"
            );
        }
    }

    /// `Questionnaire -> Done`. Ignored in any other phase.
    pub fn submit_questionnaire(
        &mut self,
        answers: QuestionnaireAnswers,
    ) -> StudyResult<Vec<StudyEvent>> {
        let mut events = Vec::new();
        if self.halted || self.phase != StudyPhase::Questionnaire {
            debug!(phase = ?self.phase, "questionnaire submission ignored");
            return Ok(events);
        }
        let record = QuestionnaireRecord::new(
            self.timer.wall_clock(),
            self.config.participant_id,
            answers,
        );
        self.sink
            .append_questionnaire(&record)
            .inspect_err(|e| error!("questionnaire not stored: {e}"))?;
        self.phase = StudyPhase::Done;
        info!(participant = self.config.participant_id, "study complete");
        events.push(StudyEvent::StudyComplete);
        Ok(events)
    }

    /// Cancels every pending timer. Afterwards nothing mutates trial state.
    pub fn teardown(&mut self) {
        self.epoch += 1;
        self.stimulus.cancel(&mut self.queue);
        self.queue.clear();
        self.countdown_handle = None;
        self.pause_handle = None;
        self.halted = true;
        info!(phase = ?self.phase, trial = self.trial_index, "study torn down");
    }

    /// Condition of the trial at the current index.
    pub fn current_condition(&self) -> StudyResult<Condition> {
        self.order.get(self.trial_index)
    }

    pub fn next_deadline(&mut self) -> Option<u64> {
        if self.halted {
            return None;
        }
        self.queue.next_deadline()
    }

    pub fn view(&self) -> StudyView {
        let total = self.order.len();
        let instruction = match self.phase {
            phase if phase.in_trial() => {
                self.current.as_ref().map(|t| t.condition.instruction())
            }
            StudyPhase::Pause => Some(PAUSE_MESSAGE),
            _ => None,
        };
        StudyView {
            phase: self.phase,
            countdown_remaining: self.countdown_remaining,
            countdown_total: self.config.countdown_secs,
            trial_number: (self.trial_index + 1).min(total),
            trial_total: total,
            instruction,
            background: self.background,
            complete: self.phase.is_terminal(),
        }
    }

    pub fn phase(&self) -> StudyPhase {
        self.phase
    }

    pub fn trial_index(&self) -> usize {
        self.trial_index
    }

    pub fn current_trial(&self) -> Option<&TrialState> {
        self.current.as_ref()
    }

    pub fn order(&self) -> &TrialOrder {
        &self.order
    }

    pub fn config(&self) -> &StudyConfig {
        &self.config
    }

    pub fn timer(&self) -> &T {
        &self.timer
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    fn dispatch(&mut self, fired: Fired<Scheduled>, events: &mut Vec<StudyEvent>) -> StudyResult<()> {
        let Scheduled { epoch, event } = fired.payload;
        if epoch != self.epoch {
            // Superseded trial; cancel so a repeating entry stops coming back.
            self.queue.cancel(fired.handle);
            return Err(StudyError::StaleCallback {
                fired: epoch,
                current: self.epoch,
            });
        }
        match (self.phase, event) {
            (StudyPhase::Countdown, TimerEvent::CountdownTick) => self.on_countdown_tick(events),
            (StudyPhase::Trial, TimerEvent::StimulusOnset) => {
                let now = self.timer.now();
                let change = self
                    .current
                    .as_mut()
                    .and_then(|trial| self.stimulus.on_onset(trial, now));
                if let Some(change) = change {
                    self.apply_change(change, events);
                }
                Ok(())
            }
            (StudyPhase::Trial, TimerEvent::ColorCycle) => {
                let now = self.timer.now();
                let change = match self.current.as_mut() {
                    Some(trial) => {
                        self.stimulus
                            .on_cycle_tick(trial, now, &mut self.queue, &mut self.rng)
                    }
                    None => None,
                };
                if let Some(change) = change {
                    self.apply_change(change, events);
                }
                Ok(())
            }
            (StudyPhase::Pause, TimerEvent::PauseElapsed) => {
                self.pause_handle = None;
                info!("pause over");
                self.begin_countdown(events)
            }
            (phase, event) => {
                debug!(?phase, ?event, "timer event does not apply, dropped");
                self.queue.cancel(fired.handle);
                Ok(())
            }
        }
    }

    fn begin_countdown(&mut self, events: &mut Vec<StudyEvent>) -> StudyResult<()> {
        let condition = match self.order.get(self.trial_index) {
            Ok(c) => c,
            Err(e) => {
                error!("cannot start trial: {e}");
                self.halted = true;
                return Err(e);
            }
        };
        self.epoch += 1;
        let now = self.timer.now();
        let index = self.trial_index;
        self.current = Some(TrialState::new(index, condition, self.epoch));
        self.countdown_remaining = self.config.countdown_secs;
        self.countdown_handle = Some(self.queue.schedule_repeating(
            now,
            COUNTDOWN_TICK,
            Scheduled {
                epoch: self.epoch,
                event: TimerEvent::CountdownTick,
            },
        ));
        self.phase = StudyPhase::Countdown;
        self.set_background(self.config.neutral_color, events);
        events.push(StudyEvent::TrialStarted { index, condition });
        events.push(StudyEvent::CountdownChanged(self.countdown_remaining));
        info!(
            trial = index + 1,
            total = self.order.len(),
            %condition,
            "countdown started"
        );
        Ok(())
    }

    fn on_countdown_tick(&mut self, events: &mut Vec<StudyEvent>) -> StudyResult<()> {
        self.countdown_remaining = self.countdown_remaining.saturating_sub(1);
        events.push(StudyEvent::CountdownChanged(self.countdown_remaining));
        if self.countdown_remaining > 0 {
            return Ok(());
        }
        if let Some(handle) = self.countdown_handle.take() {
            self.queue.cancel(handle);
        }

        let now = self.timer.now();
        let Some(trial) = self.current.as_mut() else {
            error!("countdown finished without a trial in flight");
            return Ok(());
        };
        trial.timestamps.task_start = Some(now);
        let (index, condition) = (trial.index, trial.condition);

        self.phase = StudyPhase::Trial;
        self.stimulus
            .arm(condition, self.epoch, now, &mut self.queue, &mut self.rng);
        events.push(StudyEvent::TaskStarted { index, condition });
        debug!(trial = index + 1, %condition, "task started");
        Ok(())
    }

    fn complete_trial(&mut self, now: u64, events: &mut Vec<StudyEvent>) -> StudyResult<()> {
        let Some(trial) = self.current.as_ref() else {
            return Ok(());
        };
        let Some(record) =
            trial.to_record(now, self.timer.wall_clock(), self.config.participant_id)
        else {
            warn!(trial = trial.index, "trial completed without timestamps, not logged");
            return Ok(());
        };

        // On failure the trial stays in flight so the next response retries.
        self.sink
            .append_trial(&record)
            .inspect_err(|e| error!(trial = trial.index, "trial record not stored: {e}"))?;
        info!(
            trial = trial.index + 1,
            condition = %record.condition,
            reaction_ms = record.reaction_time_ms,
            till_condition_ms = record.time_till_condition_ms,
            wrong = record.wrong_keys_pressed,
            premature = record.premature_presses,
            "trial logged"
        );

        self.stimulus.cancel(&mut self.queue);
        self.current = None;
        self.trial_index += 1;
        self.epoch += 1;
        self.set_background(self.config.neutral_color, events);
        events.push(StudyEvent::TrialLogged(record));

        if self.trial_index == self.order.len() {
            self.phase = StudyPhase::Questionnaire;
            events.push(StudyEvent::QuestionnaireOpened);
            info!("all trials done, questionnaire opened");
        } else if self.trial_index == self.config.midpoint() && !self.pause_taken {
            self.pause_taken = true;
            self.phase = StudyPhase::Pause;
            let resume_in = self.config.pause();
            self.pause_handle = Some(self.queue.schedule(
                now,
                resume_in,
                Scheduled {
                    epoch: self.epoch,
                    event: TimerEvent::PauseElapsed,
                },
            ));
            events.push(StudyEvent::PauseStarted { resume_in });
            info!(secs = resume_in.as_secs(), "midpoint pause");
        } else {
            self.begin_countdown(events)?;
        }
        Ok(())
    }

    fn apply_change(&mut self, change: StimulusChange, events: &mut Vec<StudyEvent>) {
        self.set_background(change.color, events);
        if !change.reached {
            return;
        }
        if let Some(trial) = self.current.as_ref() {
            let after_ms = trial.time_till_condition_ms().unwrap_or_default();
            events.push(StudyEvent::ConditionReached {
                index: trial.index,
                after_ms,
            });
            debug!(trial = trial.index + 1, after_ms, "condition reached");
        }
    }

    fn set_background(&mut self, color: StimulusColor, events: &mut Vec<StudyEvent>) {
        if self.background != color {
            self.background = color;
            events.push(StudyEvent::BackgroundChanged(color));
        }
    }
}
