mod app;
mod questionnaire;

use anyhow::{Context, Result};
use app::App;
use clap::Parser;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rtstudy_core::{MemorySink, RecordSink, StudyPhase};
use rtstudy_data::DataLogger;
use rtstudy_experiment::{RandomDraws, StudyConfig, TrialStateMachine};
use rtstudy_render::load_font;
use rtstudy_timing::HighPrecisionTimer;
use std::io;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Reaction-time study: fixed-delay (A) versus color-cycling (B) stimuli.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Participant identifier (positive integer)
    participant: u32,

    /// JSON file with study settings; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory holding reaction_times.csv and questionnaire.csv
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Number of trials (even)
    #[arg(long)]
    trials: Option<usize>,

    /// Countdown before each trial, in seconds
    #[arg(long)]
    countdown: Option<u32>,

    /// Midpoint pause, in seconds
    #[arg(long)]
    pause: Option<u32>,

    /// Seed for a reproducible trial order and stimulus draws
    #[arg(long)]
    seed: Option<u64>,

    /// TrueType/OpenType font for on-screen text
    #[arg(long)]
    font: Option<PathBuf>,

    /// Keep records in memory instead of writing CSV files
    #[arg(long)]
    dry_run: bool,
}

impl Cli {
    fn study_config(&self) -> Result<StudyConfig> {
        let mut config = match &self.config {
            Some(path) => StudyConfig::load(path)?,
            None => StudyConfig::default(),
        };
        config.participant_id = self.participant;
        if let Some(trials) = self.trials {
            config.trial_count = trials;
        }
        if let Some(countdown) = self.countdown {
            config.countdown_secs = countdown;
        }
        if let Some(pause) = self.pause {
            config.pause_secs = pause;
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = cli.study_config()?;

    let sink: Box<dyn RecordSink> = if cli.dry_run {
        warn!("Dry run: records are kept in memory only");
        Box::new(MemorySink::default())
    } else {
        Box::new(DataLogger::open(&cli.data_dir)?)
    };
    let rng = match cli.seed {
        Some(seed) => RandomDraws::seeded(seed),
        None => RandomDraws(StdRng::from_os_rng()),
    };
    let font = cli
        .font
        .as_deref()
        .map(load_font)
        .transpose()
        .context("loading font")?;

    let study = TrialStateMachine::new(config, HighPrecisionTimer::new(), rng, sink)?;
    let mut study = App::new(study, font).run()?;

    if study.phase() != StudyPhase::Questionnaire {
        info!(
            trials = study.trial_index(),
            "Study ended before the questionnaire"
        );
        return Ok(());
    }
    let answers = questionnaire::collect_answers(&mut io::stdin().lock(), &mut io::stdout())?;
    study.submit_questionnaire(answers)?;
    println!("Vielen Dank für deine Teilnahme!");
    Ok(())
}
