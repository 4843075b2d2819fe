use crate::store::CsvStore;
use rtstudy_core::{QuestionnaireRecord, RecordSink, StudyError, StudyResult, TrialRecord};
use std::path::Path;
use tracing::info;

pub const TRIAL_FILE: &str = "reaction_times.csv";
pub const QUESTIONNAIRE_FILE: &str = "questionnaire.csv";

/// CSV-backed record sink: one trial table and one questionnaire table per
/// study, shared by every participant who runs against the same directory.
pub struct DataLogger {
    trials: CsvStore<TrialRecord>,
    questionnaires: CsvStore<QuestionnaireRecord>,
}

impl DataLogger {
    /// Opens (or creates) both tables under `dir`, loading any earlier sessions.
    pub fn open<P: AsRef<Path>>(dir: P) -> StudyResult<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(&dir).map_err(|e| StudyError::storage(dir, e))?;

        let trials = CsvStore::open(dir.join(TRIAL_FILE), &TrialRecord::HEADERS)?;
        let questionnaires =
            CsvStore::open(dir.join(QUESTIONNAIRE_FILE), &QuestionnaireRecord::HEADERS)?;
        info!(
            "Data logger ready in {} ({} trials, {} questionnaires on record)",
            dir.display(),
            trials.len(),
            questionnaires.len()
        );

        Ok(Self {
            trials,
            questionnaires,
        })
    }

    pub fn trials(&self) -> &[TrialRecord] {
        self.trials.records()
    }

    pub fn questionnaires(&self) -> &[QuestionnaireRecord] {
        self.questionnaires.records()
    }

    pub fn trials_for(&self, participant_id: u32) -> impl Iterator<Item = &TrialRecord> {
        self.trials()
            .iter()
            .filter(move |r| r.participant_id == participant_id)
    }
}

impl RecordSink for DataLogger {
    fn append_trial(&mut self, record: &TrialRecord) -> StudyResult<()> {
        self.trials.append(record.clone())
    }

    fn append_questionnaire(&mut self, record: &QuestionnaireRecord) -> StudyResult<()> {
        self.questionnaires.append(record.clone())?;
        info!(
            "Questionnaire stored for participant {}",
            record.participant_id
        );
        Ok(())
    }
}
