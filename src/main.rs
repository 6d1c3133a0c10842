use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod analysis;
mod classifier;
mod config;
mod dataset;
mod db;
mod error;
mod features;
mod forecaster;
mod metrics;
mod models;
mod pipeline;
mod recommend;
mod report;
mod risk;
mod sampling;
mod store;
mod tree;
mod trends;

#[cfg(test)]
mod testutil;

use crate::config::EngineConfig;
use crate::models::Observation;
use crate::pipeline::TrainedModels;
use crate::store::DirectoryStore;

#[derive(Parser)]
#[command(name = "wellbeing-risk")]
#[command(about = "Patient well-being risk scoring and mood forecasting", long_about = None)]
struct Cli {
    /// JSON engine configuration; defaults apply when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Import observations from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Export stored observations to a CSV file
    Export {
        #[arg(long)]
        out: PathBuf,
    },
    /// Train the risk classifier and mood forecaster
    Train {
        /// Read observations from CSV instead of the database
        #[arg(long)]
        csv: Option<PathBuf>,
        #[arg(long, default_value = "models")]
        models_dir: PathBuf,
        #[arg(long, default_value = "ml_results.json")]
        out: PathBuf,
    },
    /// Predict risk and mood for one patient's latest day
    Predict {
        #[arg(long)]
        patient: String,
        #[arg(long)]
        csv: Option<PathBuf>,
        #[arg(long, default_value = "models")]
        models_dir: PathBuf,
        /// Record the prediction in the ml_predictions table
        #[arg(long)]
        log: bool,
    },
    /// Rank patients by aggregate risk score
    Score {
        #[arg(long)]
        csv: Option<PathBuf>,
        #[arg(long, default_value_t = 30)]
        since_days: i64,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Generate a markdown report
    Report {
        #[arg(long)]
        csv: Option<PathBuf>,
        #[arg(long, default_value_t = 30)]
        since_days: i64,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config::DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    match cli.command {
        Commands::InitDb => {
            let pool = connect().await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Import { csv } => {
            let pool = connect().await?;
            let written = db::import_csv(&pool, &csv).await?;
            println!("Stored {written} observations from {}.", csv.display());
        }
        Commands::Export { out } => {
            let observations = load_observations(None, None).await?;
            dataset::write_csv(&out, &observations)?;
            println!("Exported {} observations to {}.", observations.len(), out.display());
        }
        Commands::Train { csv, models_dir, out } => {
            let observations = load_observations(csv.as_deref(), None).await?;
            let train_config = config.clone();
            let (models, report) =
                tokio::task::spawn_blocking(move || pipeline::train(observations, &train_config))
                    .await
                    .context("training task panicked")??;

            models.persist(&DirectoryStore::new(&models_dir))?;
            std::fs::write(&out, serde_json::to_string_pretty(&report)?)?;

            let performance = &report.model_performance;
            println!("Run {}", report.run_id);
            println!(
                "Risk classifier accuracy: {:.3}",
                performance.risk_classifier_accuracy
            );
            if let Some(cv) = &report.classifier_evaluation.cross_validation {
                println!("Cross-validated accuracy: {:.3} (+/- {:.3})", cv.mean, cv.spread);
            }
            println!(
                "Mood forecaster MSE {:.3}, R2 {:.3}, RMSE {:.3}",
                performance.mood_predictor_mse, performance.mood_predictor_r2, performance.mood_predictor_rmse
            );
            println!("Top features:");
            for entry in report.feature_importance.iter().take(5) {
                println!("- {}: {:.3}", entry.feature, entry.importance);
            }
            println!("Models saved to {}.", models_dir.display());
            println!("Report written to {}.", out.display());
        }
        Commands::Predict {
            patient,
            csv,
            models_dir,
            log,
        } => {
            let models = TrainedModels::load(&DirectoryStore::new(&models_dir), &config)
                .with_context(|| format!("no trained models in {}; run `train` first", models_dir.display()))?;
            let observations = load_observations(csv.as_deref(), Some(patient.as_str())).await?;
            let series = dataset::group_by_patient(observations)
                .into_iter()
                .find(|s| s.patient_id == patient)
                .with_context(|| format!("no observations for patient {patient}"))?;

            let prediction = models.predict_series(&series)?;
            println!("Patient {} on {}", prediction.patient_id, prediction.date);
            println!(
                "  Mood {:.1}, anxiety {:.1}, sleep {:.1}h",
                prediction.observation.mood_score,
                prediction.observation.anxiety_level,
                prediction.observation.sleep_hours
            );
            println!("  Risk level: {} ({:.0}% confidence)", prediction.risk_level, prediction.confidence * 100.0);
            for (level, probability) in &prediction.risk_probabilities {
                println!("    {level}: {probability:.3}");
            }
            println!(
                "  Mood in {} days: {:.1} ({:?})",
                config.forecast_horizon_days, prediction.future_mood, prediction.trajectory
            );
            println!("Recommendations:");
            for (i, rec) in prediction.recommendations.iter().enumerate() {
                println!("  {}. [{}] {}", i + 1, rec.kind.as_str().to_uppercase(), rec.message);
            }

            if log {
                let pool = connect().await?;
                let id = db::save_prediction(&pool, &prediction).await?;
                info!(%id, patient_id = %prediction.patient_id, "prediction logged");
            }
        }
        Commands::Score {
            csv,
            since_days,
            limit,
        } => {
            let series = dataset::group_by_patient(load_observations(csv.as_deref(), None).await?);
            let Some(latest) = dataset::latest_date(&series) else {
                println!("No observations found.");
                return Ok(());
            };
            let recent = dataset::since(series, dataset::cutoff_date(latest, since_days));
            let scores = risk::score_patients(&recent);

            if scores.is_empty() {
                println!("No observations found for this window.");
                return Ok(());
            }

            println!("Top patients by risk score:");
            for score in scores.iter().take(limit) {
                println!(
                    "- {} ({}) score {} across {} days, mood {:.1}, anxiety {:.1}",
                    score.patient_id,
                    score.risk_level,
                    score.score,
                    score.days,
                    score.mood_mean,
                    score.anxiety_mean
                );
                for rec in &score.recommendations {
                    println!("    [{}] {}", rec.kind.as_str().to_uppercase(), rec.message);
                }
            }
        }
        Commands::Report {
            csv,
            since_days,
            out,
        } => {
            let series = dataset::group_by_patient(load_observations(csv.as_deref(), None).await?);
            let latest = dataset::latest_date(&series).unwrap_or_else(|| chrono::Utc::now().date_naive());
            let cutoff = dataset::cutoff_date(latest, since_days);
            let report = report::build_report(&series, since_days, cutoff, config.trend_window);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}

async fn connect() -> anyhow::Result<PgPool> {
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set, or pass --csv to read observations from a file")?;

    PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")
}

/// Reads from `csv` when given, otherwise from the database.
async fn load_observations(csv: Option<&Path>, patient_id: Option<&str>) -> anyhow::Result<Vec<Observation>> {
    let observations = match csv {
        Some(path) => dataset::read_csv(path)
            .with_context(|| format!("failed to read observations from {}", path.display()))?,
        None => {
            let pool = connect().await?;
            db::fetch_observations(&pool, None, patient_id).await?
        }
    };
    info!(count = observations.len(), "observations loaded");
    Ok(observations)
}
