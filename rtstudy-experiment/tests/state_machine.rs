use rstest::rstest;
use rtstudy_core::{
    Condition, MemorySink, QuestionnaireAnswers, QuestionnaireRecord, RecordSink, StimulusColor,
    StudyError, StudyPhase, StudyResult, TrialRecord,
};
use rtstudy_experiment::{
    Key, RandomDraws, Randomizer, StudyConfig, StudyEvent, TrialOrder, TrialStateMachine,
};
use rtstudy_timing::{ManualTimer, Timer};
use std::collections::VecDeque;
use std::time::Duration;

const MS: u64 = 1_000_000;
const S: u64 = 1_000 * MS;

/// Replays fixed delays and colors; once exhausted, delays fall back to the
/// range minimum and colors to blue, the default target.
#[derive(Default)]
struct Script {
    delays: VecDeque<u32>,
    colors: VecDeque<StimulusColor>,
}

impl Script {
    fn new(delays: &[u32], colors: &[StimulusColor]) -> Self {
        Self {
            delays: delays.iter().copied().collect(),
            colors: colors.iter().copied().collect(),
        }
    }
}

impl Randomizer for Script {
    fn shuffle_conditions(&mut self, _: &mut [Condition]) {}

    fn draw_delay_secs(&mut self, lo: u32, _hi: u32) -> u32 {
        self.delays.pop_front().unwrap_or(lo)
    }

    fn draw_color(&mut self, _palette: &[StimulusColor]) -> StimulusColor {
        self.colors.pop_front().unwrap_or(StimulusColor::Blue)
    }
}

type Machine<D = Script, S = MemorySink> = TrialStateMachine<ManualTimer, D, S>;

fn config(trials: usize, countdown: u32, pause: u32) -> StudyConfig {
    StudyConfig {
        trial_count: trials,
        countdown_secs: countdown,
        pause_secs: pause,
        ..StudyConfig::for_participant(42)
    }
}

fn alternating(n: usize) -> TrialOrder {
    let conditions = (0..n)
        .map(|i| if i % 2 == 0 { Condition::A } else { Condition::B })
        .collect();
    TrialOrder::from_conditions(conditions).unwrap()
}

fn machine_with<S: RecordSink>(
    config: StudyConfig,
    order: TrialOrder,
    script: Script,
    sink: S,
) -> (Machine<Script, S>, ManualTimer) {
    let timer = ManualTimer::default();
    let sm = TrialStateMachine::with_order(config, order, timer.clone(), script, sink).unwrap();
    (sm, timer)
}

fn machine(config: StudyConfig, order: TrialOrder, script: Script) -> (Machine, ManualTimer) {
    machine_with(config, order, script, MemorySink::default())
}

/// Steps the virtual clock deadline by deadline up to `until` (ns).
fn run_until<D: Randomizer, S: RecordSink>(
    sm: &mut TrialStateMachine<ManualTimer, D, S>,
    timer: &ManualTimer,
    until: u64,
) -> Vec<StudyEvent> {
    let mut events = Vec::new();
    while let Some(deadline) = sm.next_deadline() {
        if deadline > until {
            break;
        }
        timer.set(deadline);
        events.extend(sm.update().unwrap());
    }
    timer.set(until);
    events.extend(sm.update().unwrap());
    events
}

fn logged(events: &[StudyEvent]) -> Vec<&TrialRecord> {
    events
        .iter()
        .filter_map(|e| match e {
            StudyEvent::TrialLogged(r) => Some(r),
            _ => None,
        })
        .collect()
}

#[test]
fn four_trial_scenario_with_pause() {
    let (mut sm, timer) = machine(
        config(4, 2, 2),
        alternating(4),
        Script::new(
            &[3, 2],
            &[
                StimulusColor::Red,
                StimulusColor::Green,
                StimulusColor::Blue,
                StimulusColor::Yellow,
                StimulusColor::Blue,
            ],
        ),
    );
    assert_eq!(sm.phase(), StudyPhase::StartScreen);
    let events = sm.start().unwrap();
    assert!(events.contains(&StudyEvent::CountdownChanged(2)));
    assert_eq!(sm.phase(), StudyPhase::Countdown);

    // Trial 0, condition A: countdown ends at 2 s, change at 5 s.
    run_until(&mut sm, &timer, 2 * S);
    assert_eq!(sm.phase(), StudyPhase::Trial);
    run_until(&mut sm, &timer, 5 * S - 1);
    assert!(!sm.current_trial().unwrap().condition_reached);
    let events = run_until(&mut sm, &timer, 5 * S);
    assert!(events.contains(&StudyEvent::BackgroundChanged(StimulusColor::Orange)));
    assert!(sm.current_trial().unwrap().condition_reached);

    let events = sm.handle_key(Key::Response).unwrap();
    let rec = logged(&events)[0].clone();
    assert_eq!(rec.condition, Condition::A);
    assert_eq!(rec.participant_id, 42);
    assert_eq!(rec.wrong_keys_pressed, 0);
    assert_eq!(rec.premature_presses, 0);
    assert_eq!(rec.reaction_time_ms, 0);
    assert_eq!(rec.time_till_condition_ms, 3000);
    assert_eq!(sm.trial_index(), 1);
    assert_eq!(sm.phase(), StudyPhase::Countdown);

    // Trial 1, condition B: task starts at 7 s, red/green/blue at 8/9/10 s.
    run_until(&mut sm, &timer, 9 * S + 500 * MS);
    assert_eq!(sm.view().background, StimulusColor::Green);
    assert!(!sm.current_trial().unwrap().condition_reached);
    let events = run_until(&mut sm, &timer, 10 * S);
    assert!(events.contains(&StudyEvent::ConditionReached {
        index: 1,
        after_ms: 3000
    }));
    timer.advance(Duration::from_millis(250));
    let events = sm.handle_key(Key::Response).unwrap();
    let rec = logged(&events)[0].clone();
    assert_eq!(rec.condition, Condition::B);
    assert_eq!(rec.reaction_time_ms, 250);
    assert_eq!(rec.time_till_condition_ms, 3000);

    // Midpoint: pause for 2 s, then a fresh countdown.
    assert_eq!(sm.phase(), StudyPhase::Pause);
    assert!(events.contains(&StudyEvent::PauseStarted {
        resume_in: Duration::from_secs(2)
    }));
    run_until(&mut sm, &timer, 12 * S + 249 * MS);
    assert_eq!(sm.phase(), StudyPhase::Pause);
    let events = run_until(&mut sm, &timer, 12 * S + 250 * MS);
    assert_eq!(sm.phase(), StudyPhase::Countdown);
    assert!(events.contains(&StudyEvent::CountdownChanged(2)));

    // Trial 2 (A, 2 s delay) and trial 3 (B, yellow then blue).
    run_until(&mut sm, &timer, 16 * S + 250 * MS);
    assert!(sm.current_trial().unwrap().condition_reached);
    sm.handle_key(Key::Response).unwrap();
    run_until(&mut sm, &timer, 21 * S);
    assert!(sm.current_trial().unwrap().condition_reached);
    let events = sm.handle_key(Key::Response).unwrap();
    assert!(events.contains(&StudyEvent::QuestionnaireOpened));
    assert_eq!(sm.phase(), StudyPhase::Questionnaire);

    // Keys and timers no longer matter.
    assert!(sm.handle_key(Key::Response).unwrap().is_empty());
    assert!(run_until(&mut sm, &timer, 60 * S).is_empty());

    let events = sm
        .submit_questionnaire(QuestionnaireAnswers {
            age: Some(27),
            gender: "f".into(),
            keyboard_usage: Some(4),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(events, vec![StudyEvent::StudyComplete]);
    assert_eq!(sm.phase(), StudyPhase::Done);
    assert!(sm.view().complete);

    let sink = sm.sink();
    let conditions: Vec<_> = sink.trials.iter().map(|r| r.condition).collect();
    assert_eq!(
        conditions,
        vec![Condition::A, Condition::B, Condition::A, Condition::B]
    );
    assert_eq!(sink.questionnaires.len(), 1);
    assert_eq!(sink.questionnaires[0].age, Some(27));
    assert_eq!(sink.questionnaires[0].participant_id, 42);
}

#[test]
fn premature_and_wrong_keys_are_counted_not_acted_on() {
    let (mut sm, timer) = machine(config(2, 1, 0), alternating(2), Script::new(&[4], &[]));
    sm.start().unwrap();
    run_until(&mut sm, &timer, S);
    assert_eq!(sm.phase(), StudyPhase::Trial);

    for _ in 0..3 {
        let events = sm.handle_key(Key::Response).unwrap();
        assert!(logged(&events).is_empty());
    }
    sm.handle_key(Key::Other).unwrap();
    let events = sm.handle_key(Key::Other).unwrap();
    assert_eq!(events, vec![StudyEvent::WrongKey { count: 2 }]);

    let trial = sm.current_trial().unwrap();
    assert_eq!(trial.index, 0);
    assert!(!trial.condition_reached);
    assert_eq!(sm.trial_index(), 0);
    assert_eq!(sm.phase(), StudyPhase::Trial);

    // The condition A change still happens on schedule.
    run_until(&mut sm, &timer, 5 * S);
    assert!(sm.current_trial().unwrap().condition_reached);
    let events = sm.handle_key(Key::Response).unwrap();
    let rec = logged(&events)[0];
    assert_eq!(rec.premature_presses, 3);
    assert_eq!(rec.wrong_keys_pressed, 2);
    assert_eq!(rec.time_till_condition_ms, 4000);
}

#[test]
fn early_press_in_condition_b_restarts_the_cycle() {
    let order = TrialOrder::from_conditions(vec![Condition::B, Condition::A]).unwrap();
    let (mut sm, timer) = machine(
        config(2, 1, 0),
        order,
        Script::new(&[], &[StimulusColor::Red, StimulusColor::Blue]),
    );
    sm.start().unwrap();
    run_until(&mut sm, &timer, 2 * S);
    assert_eq!(sm.view().background, StimulusColor::Red);

    timer.set(2 * S + 500 * MS);
    let events = sm.handle_key(Key::Response).unwrap();
    assert!(events.contains(&StudyEvent::BackgroundChanged(StimulusColor::White)));
    assert!(events.contains(&StudyEvent::PrematurePress { count: 1 }));
    assert!(!sm.current_trial().unwrap().condition_reached);

    // Old cycle would have ticked at 3 s; the restarted one ticks at 3.5 s.
    run_until(&mut sm, &timer, 3 * S + 499 * MS);
    assert_eq!(sm.view().background, StimulusColor::White);
    run_until(&mut sm, &timer, 3 * S + 500 * MS);
    assert_eq!(sm.view().background, StimulusColor::Blue);

    let events = sm.handle_key(Key::Response).unwrap();
    let rec = logged(&events)[0];
    assert_eq!(rec.premature_presses, 1);
    assert_eq!(rec.time_till_condition_ms, 2500);
    assert_eq!(rec.reaction_time_ms, 0);
}

#[test]
fn reaction_is_measured_from_the_presented_frame() {
    let (mut sm, timer) = machine(config(2, 1, 0), alternating(2), Script::default());
    sm.start().unwrap();
    run_until(&mut sm, &timer, 2 * S);
    assert!(sm.current_trial().unwrap().condition_reached);

    // First frame showing orange goes out 16 ms after the timer fired;
    // later frames do not move the reached time again.
    sm.mark_presented(2 * S + 16 * MS);
    sm.mark_presented(2 * S + 33 * MS);

    timer.set(2 * S + 266 * MS);
    let events = sm.handle_key(Key::Response).unwrap();
    let rec = logged(&events)[0];
    assert_eq!(rec.time_till_condition_ms, 1016);
    assert_eq!(rec.reaction_time_ms, 250);
}

#[test]
fn presentation_outside_a_reached_trial_changes_nothing() {
    let (mut sm, timer) = machine(config(2, 1, 0), alternating(2), Script::default());
    sm.start().unwrap();
    sm.mark_presented(500 * MS);
    run_until(&mut sm, &timer, S + 500 * MS);
    sm.mark_presented(S + 500 * MS);
    run_until(&mut sm, &timer, 2 * S);

    let events = sm.handle_key(Key::Response).unwrap();
    assert_eq!(logged(&events)[0].time_till_condition_ms, 1000);
}

#[test]
fn stalled_frame_shows_one_color_not_a_burst() {
    let order = TrialOrder::from_conditions(vec![Condition::B, Condition::A]).unwrap();
    let (mut sm, timer) = machine(
        config(2, 1, 0),
        order,
        Script::new(
            &[],
            &[StimulusColor::Red, StimulusColor::Green, StimulusColor::Blue],
        ),
    );
    sm.start().unwrap();
    run_until(&mut sm, &timer, S);
    assert_eq!(sm.phase(), StudyPhase::Trial);

    // Ticks were due at 2, 3 and 4 s; the loop only wakes at 4.5 s.
    timer.set(4 * S + 500 * MS);
    let events = sm.update().unwrap();
    assert_eq!(
        events,
        vec![StudyEvent::BackgroundChanged(StimulusColor::Red)]
    );
    assert_eq!(sm.next_deadline(), Some(5 * S));

    let events = run_until(&mut sm, &timer, 6 * S);
    assert!(events.contains(&StudyEvent::ConditionReached {
        index: 0,
        after_ms: 5000
    }));
}

#[test]
fn input_outside_trial_phase_is_ignored() {
    let (mut sm, timer) = machine(config(2, 3, 0), alternating(2), Script::default());
    assert!(sm.handle_key(Key::Response).unwrap().is_empty());
    sm.start().unwrap();
    run_until(&mut sm, &timer, S);
    assert_eq!(sm.phase(), StudyPhase::Countdown);
    assert!(sm.handle_key(Key::Other).unwrap().is_empty());
    assert!(sm.handle_key(Key::Response).unwrap().is_empty());
    let trial = sm.current_trial().unwrap();
    assert_eq!(trial.wrong_keys, 0);
    assert_eq!(trial.premature_presses, 0);

    // A second start is a no-op.
    assert!(sm.start().unwrap().is_empty());
    assert!(sm.submit_questionnaire(QuestionnaireAnswers::default()).unwrap().is_empty());
}

#[test]
fn countdown_is_rearmed_for_every_trial() {
    let (mut sm, timer) = machine(config(4, 3, 1), alternating(4), Script::new(&[1, 1], &[]));
    let mut events = sm.start().unwrap();
    for _ in 0..4 {
        let until = timer.now() + 30 * S;
        events.extend(run_until(&mut sm, &timer, until));
        events.extend(sm.handle_key(Key::Response).unwrap());
    }
    assert_eq!(sm.phase(), StudyPhase::Questionnaire);

    let countdowns: Vec<u32> = events
        .iter()
        .filter_map(|e| match e {
            StudyEvent::CountdownChanged(n) => Some(*n),
            _ => None,
        })
        .collect();
    assert_eq!(countdowns, [3, 2, 1, 0].repeat(4));
}

#[rstest]
#[case(2)]
#[case(4)]
#[case(6)]
#[case(20)]
fn every_trial_is_visited_once_and_logged_in_order(#[case] trials: usize) {
    let (mut sm, timer) = machine(
        config(trials, 1, 1),
        alternating(trials),
        Script::new(&[], &[]),
    );
    let mut events = sm.start().unwrap();
    while sm.phase() != StudyPhase::Questionnaire {
        let until = timer.now() + 10 * S;
        events.extend(run_until(&mut sm, &timer, until));
        events.extend(sm.handle_key(Key::Response).unwrap());
    }

    let started = events
        .iter()
        .filter(|e| matches!(e, StudyEvent::TaskStarted { .. }))
        .count();
    let pauses = events
        .iter()
        .filter(|e| matches!(e, StudyEvent::PauseStarted { .. }))
        .count();
    assert_eq!(started, trials);
    assert_eq!(pauses, 1);

    let records = logged(&events);
    assert_eq!(records.len(), trials);
    assert_eq!(sm.sink().trials.len(), trials);
    for (i, rec) in records.iter().enumerate() {
        assert_eq!(rec.condition, sm.order().as_slice()[i]);
    }

    // Past the end of the order there is no condition to ask for.
    assert!(matches!(
        sm.current_condition(),
        Err(StudyError::IndexOutOfBounds { index, len }) if index == trials && len == trials
    ));
}

#[test]
fn teardown_silences_pending_callbacks() {
    let (mut sm, timer) = machine(config(2, 1, 0), alternating(2), Script::new(&[3], &[]));
    sm.start().unwrap();
    run_until(&mut sm, &timer, S);
    assert_eq!(sm.phase(), StudyPhase::Trial);

    sm.teardown();
    assert!(sm.is_halted());
    assert_eq!(sm.next_deadline(), None);
    timer.set(10 * S);
    assert!(sm.update().unwrap().is_empty());
    assert!(!sm.current_trial().unwrap().condition_reached);
    assert!(sm.handle_key(Key::Response).unwrap().is_empty());
    assert!(sm.sink().trials.is_empty());
}

/// Fails the first `failures` trial appends.
struct FlakySink {
    failures: usize,
    inner: MemorySink,
}

impl RecordSink for FlakySink {
    fn append_trial(&mut self, record: &TrialRecord) -> StudyResult<()> {
        if self.failures > 0 {
            self.failures -= 1;
            return Err(StudyError::storage(
                "/unavailable/reaction_times.csv",
                "disk gone",
            ));
        }
        self.inner.append_trial(record)
    }

    fn append_questionnaire(&mut self, record: &QuestionnaireRecord) -> StudyResult<()> {
        self.inner.append_questionnaire(record)
    }
}

#[test]
fn failed_append_keeps_the_trial_for_retry() {
    let sink = FlakySink {
        failures: 1,
        inner: MemorySink::default(),
    };
    let (mut sm, timer) = machine_with(config(2, 1, 0), alternating(2), Script::new(&[1], &[]), sink);
    sm.start().unwrap();
    run_until(&mut sm, &timer, 2 * S);
    sm.handle_key(Key::Other).unwrap();

    let err = sm.handle_key(Key::Response).unwrap_err();
    assert!(matches!(err, StudyError::StorageUnavailable { .. }));
    assert_eq!(sm.phase(), StudyPhase::Trial);
    assert_eq!(sm.trial_index(), 0);
    assert_eq!(sm.current_trial().unwrap().wrong_keys, 1);

    timer.advance(Duration::from_millis(100));
    let events = sm.handle_key(Key::Response).unwrap();
    let rec = logged(&events)[0];
    assert_eq!(rec.wrong_keys_pressed, 1);
    assert_eq!(rec.reaction_time_ms, 100);
    assert_eq!(sm.sink().inner.trials.len(), 1);
    assert_eq!(sm.trial_index(), 1);
}

#[test]
fn view_tracks_progress_and_instructions() {
    let (mut sm, timer) = machine(config(2, 2, 0), alternating(2), Script::new(&[1], &[]));
    let view = sm.view();
    assert_eq!(view.phase, StudyPhase::StartScreen);
    assert_eq!(view.instruction, None);
    assert_eq!(view.background, StimulusColor::White);

    sm.start().unwrap();
    let view = sm.view();
    assert_eq!(view.trial_number, 1);
    assert_eq!(view.trial_total, 2);
    assert_eq!(view.instruction, Some(Condition::A.instruction()));
    assert_eq!(view.countdown_fraction(), 1.0);
    assert_eq!(view.progress_fraction(), 0.0);

    run_until(&mut sm, &timer, S);
    assert_eq!(sm.view().countdown_fraction(), 0.5);
}

#[test]
fn random_session_runs_to_completion() {
    let timer = ManualTimer::default();
    let mut sm = TrialStateMachine::new(
        config(6, 1, 1),
        timer.clone(),
        RandomDraws::seeded(99),
        MemorySink::default(),
    )
    .unwrap();
    assert_eq!(sm.order().count(Condition::A), 3);
    sm.start().unwrap();

    // Condition B may take a while to hit blue; keep pressing only after reached.
    let mut guard = 0;
    while sm.phase() != StudyPhase::Questionnaire && guard < 10_000 {
        let until = timer.now() + S;
        run_until(&mut sm, &timer, until);
        if sm.current_trial().is_some_and(|t| t.condition_reached) {
            sm.handle_key(Key::Response).unwrap();
        }
        guard += 1;
    }
    assert_eq!(sm.phase(), StudyPhase::Questionnaire);
    assert_eq!(sm.sink().trials.len(), 6);
    assert!(sm.sink().trials.iter().all(|r| r.premature_presses == 0));
}

#[test]
fn rejects_mismatched_order() {
    let timer = ManualTimer::default();
    let result = TrialStateMachine::with_order(
        config(4, 1, 0),
        alternating(2),
        timer,
        Script::default(),
        MemorySink::default(),
    );
    assert!(matches!(result, Err(StudyError::InvalidConfiguration(_))));
}
