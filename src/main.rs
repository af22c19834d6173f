// Command line entry point: runs the HTTP service or trains and scores from local CSV files.
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fraud_scoring::api::{self, AppState};
use fraud_scoring::config::Config;
use fraud_scoring::csv_reader::read_csv;
use fraud_scoring::schema::{Algorithm, FeatureParams, TrainSpec};
use fraud_scoring::scoring::score_table;
use fraud_scoring::store::ModelStore;
use fraud_scoring::trainer::train;

#[derive(Parser)]
#[command(name = "fraud_scoring", version, about = "Unsupervised fraud scoring")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP service
    Serve,
    /// Train an anomaly detector on a CSV file and store it
    Train {
        /// CSV file with the training transactions
        file: PathBuf,
        /// Name to store the model under
        #[arg(long)]
        name: String,
        #[arg(long, value_delimiter = ',')]
        numerical: Vec<String>,
        #[arg(long, value_delimiter = ',')]
        categorical: Vec<String>,
        #[arg(long, value_delimiter = ',')]
        dates: Vec<String>,
        /// Entity column for the rolling features (needs --timestamp and --amount)
        #[arg(long, requires_all = ["timestamp", "amount"])]
        entity: Option<String>,
        #[arg(long)]
        timestamp: Option<String>,
        #[arg(long)]
        amount: Option<String>,
        /// isolation_forest, local_outlier_factor or one_class_svm
        #[arg(long, default_value = "isolation_forest")]
        algorithm: Algorithm,
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Score every row of a CSV file with a stored model
    Score {
        file: PathBuf,
        #[arg(long)]
        model: String,
    },
    /// List stored models
    Models,
}

// Trains and stores a model
// Inputs: parsed train arguments, resolved configuration
// Outputs: prints the stored model name and its feature columns
fn run_train(store: &ModelStore, file: &Path, name: &str, spec: TrainSpec) -> anyhow::Result<()> {
    let table = read_csv(file).with_context(|| format!("reading {}", file.display()))?;
    let (artifact, schema) = train(&table, &spec)?;
    store.save(name, &artifact, &schema)?;

    println!("Stored model '{}' ({})", name, schema.algorithm);
    println!("Training rows: {}", schema.n_training_rows);
    println!("Feature columns: {}", schema.feature_columns.join(", "));
    Ok(())
}

// Scores a file and prints one line per row plus a summary
fn run_score(store: &ModelStore, file: &Path, model: &str) -> anyhow::Result<()> {
    let (artifact, schema) = store.load(model)?;
    let table = read_csv(file).with_context(|| format!("reading {}", file.display()))?;
    let scores = score_table(&table, &artifact, &schema)?;

    println!("row,anomaly_score,is_anomaly_predicted");
    for (i, score) in scores.iter().enumerate() {
        println!("{},{:.6},{}", i, score.anomaly_score, score.is_anomaly);
    }
    let flagged = scores.iter().filter(|s| s.is_anomaly).count();
    println!(
        "Flagged {} of {} rows ({:.2}%)",
        flagged,
        scores.len(),
        100.0 * flagged as f64 / scores.len().max(1) as f64
    );
    Ok(())
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let state = AppState::new(config.clone()).context("opening model directory")?;
    let app = api::router(state);

    let addr = config.bind_address();
    tracing::info!("Listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fraud_scoring=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve => serve(config).await,
        Command::Train {
            file,
            name,
            numerical,
            categorical,
            dates,
            entity,
            timestamp,
            amount,
            algorithm,
            seed,
        } => {
            let feature_engineering = match (entity, timestamp, amount) {
                (Some(entity_column), Some(timestamp_column), Some(amount_column)) => {
                    Some(FeatureParams {
                        entity_column,
                        timestamp_column,
                        amount_column,
                    })
                }
                _ => None,
            };
            let spec = TrainSpec {
                numerical_features: numerical,
                categorical_features: categorical,
                date_features: dates,
                feature_engineering,
                algorithm,
                seed: Some(seed.unwrap_or(config.random_seed)),
            };
            let store = ModelStore::new(&config.model_dir)?;
            run_train(&store, &file, &name, spec)
        }
        Command::Score { file, model } => {
            let store = ModelStore::new(&config.model_dir)?;
            run_score(&store, &file, &model)
        }
        Command::Models => {
            let store = ModelStore::new(&config.model_dir)?;
            for name in store.list()? {
                println!("{}", name);
            }
            Ok(())
        }
    }
}
