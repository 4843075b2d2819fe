use crate::condition::Condition;
use crate::error::StudyResult;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Drops sub-millisecond precision so stored timestamps survive a reload unchanged.
pub fn truncate_to_millis(ts: OffsetDateTime) -> OffsetDateTime {
    ts.replace_nanosecond(ts.millisecond() as u32 * 1_000_000)
        .unwrap_or(ts)
}

/// One row per completed trial, in completion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialRecord {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(rename = "participantID")]
    pub participant_id: u32,
    #[serde(rename = "timeTillConditionInMs")]
    pub time_till_condition_ms: u64,
    pub condition: Condition,
    #[serde(rename = "wrongKeysPressedCount")]
    pub wrong_keys_pressed: u32,
    #[serde(rename = "conditionNotReachedPressesCount")]
    pub premature_presses: u32,
    #[serde(rename = "reactionTimeInMs")]
    pub reaction_time_ms: u64,
}

impl TrialRecord {
    /// Column order of the trial store; matches the field order above.
    pub const HEADERS: [&'static str; 7] = [
        "timestamp",
        "participantID",
        "timeTillConditionInMs",
        "condition",
        "wrongKeysPressedCount",
        "conditionNotReachedPressesCount",
        "reactionTimeInMs",
    ];
}

/// Form values supplied by the questionnaire collaborator. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionnaireAnswers {
    pub age: Option<u32>,
    pub gender: String,
    pub occupation: String,
    pub used_hand: String,
    pub keyboard_type: String,
    /// Self-rated keyboard usage, 1 (rarely) to 5 (daily, heavily).
    pub keyboard_usage: Option<u8>,
    pub has_eye_impairment: bool,
    pub eye_impairment: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionnaireRecord {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(rename = "participantID")]
    pub participant_id: u32,
    pub age: Option<u32>,
    pub gender: String,
    pub occupation: String,
    #[serde(rename = "usedHand")]
    pub used_hand: String,
    #[serde(rename = "keyboardType")]
    pub keyboard_type: String,
    #[serde(rename = "keyboardUsage")]
    pub keyboard_usage: Option<u8>,
    #[serde(rename = "hasEyeImpairment")]
    pub has_eye_impairment: bool,
    #[serde(rename = "eyeImpairment")]
    pub eye_impairment: String,
}

impl QuestionnaireRecord {
    pub const HEADERS: [&'static str; 10] = [
        "timestamp",
        "participantID",
        "age",
        "gender",
        "occupation",
        "usedHand",
        "keyboardType",
        "keyboardUsage",
        "hasEyeImpairment",
        "eyeImpairment",
    ];

    pub fn new(timestamp: OffsetDateTime, participant_id: u32, answers: QuestionnaireAnswers) -> Self {
        // The flag wins: no flag, no description.
        let eye_impairment = if answers.has_eye_impairment {
            answers.eye_impairment
        } else {
            String::new()
        };
        Self {
            timestamp: truncate_to_millis(timestamp),
            participant_id,
            age: answers.age,
            gender: answers.gender,
            occupation: answers.occupation,
            used_hand: answers.used_hand,
            keyboard_type: answers.keyboard_type,
            keyboard_usage: answers.keyboard_usage,
            has_eye_impairment: answers.has_eye_impairment,
            eye_impairment,
        }
    }
}

/// Durable destination for study records.
pub trait RecordSink {
    fn append_trial(&mut self, record: &TrialRecord) -> StudyResult<()>;
    fn append_questionnaire(&mut self, record: &QuestionnaireRecord) -> StudyResult<()>;
}

impl<S: RecordSink + ?Sized> RecordSink for Box<S> {
    fn append_trial(&mut self, record: &TrialRecord) -> StudyResult<()> {
        (**self).append_trial(record)
    }

    fn append_questionnaire(&mut self, record: &QuestionnaireRecord) -> StudyResult<()> {
        (**self).append_questionnaire(record)
    }
}

/// Keeps records in memory; used for dry runs and tests.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    pub trials: Vec<TrialRecord>,
    pub questionnaires: Vec<QuestionnaireRecord>,
}

impl RecordSink for MemorySink {
    fn append_trial(&mut self, record: &TrialRecord) -> StudyResult<()> {
        self.trials.push(record.clone());
        Ok(())
    }

    fn append_questionnaire(&mut self, record: &QuestionnaireRecord) -> StudyResult<()> {
        self.questionnaires.push(record.clone());
        Ok(())
    }
}
