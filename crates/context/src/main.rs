//! PaperScout
//!
//! Answers a research question from two evidence sources:
//! - the personal library (embedding search over a local FAISS index)
//! - PubMed, via a translated and iteratively refined Boolean query
//!
//! Then synthesizes an answer with citations and lists PubMed papers
//! missing from the library.

mod pipeline;
mod report;

use anyhow::Context;
use clap::Parser;
use paperscout_common::{config::AppConfig, errors::AppError, VERSION};
use pipeline::ResearchPipeline;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "paperscout", version, about = "Answer a research question from your library and PubMed")]
struct Cli {
    /// Research question in natural language
    #[arg(required = true)]
    question: Vec<String>,

    /// Configuration file (defaults to config/default + APP__ environment)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Library records retrieved for the question
    #[arg(long)]
    local_k: Option<usize>,

    /// PubMed identifiers requested per query
    #[arg(long)]
    max_results: Option<usize>,

    /// Refinement rounds after the seed search
    #[arg(long, conflicts_with = "no_refine")]
    rounds: Option<usize>,

    /// Only run the seed PubMed search
    #[arg(long)]
    no_refine: bool,

    /// Only consider PubMed papers published in the last N days
    #[arg(long)]
    recent_days: Option<u32>,

    /// Print the full answer as JSON
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn question(&self) -> String {
        self.question.join(" ").trim().to_string()
    }

    /// Command-line flags win over file and environment settings
    fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(k) = self.local_k {
            config.library.top_k = k;
        }
        if let Some(n) = self.max_results {
            config.pubmed.max_results = n;
        }
        if let Some(rounds) = self.rounds {
            config.refinement.rounds = rounds;
        }
        if self.no_refine {
            config.refinement.rounds = 0;
        }
        if self.recent_days.is_some() {
            config.pubmed.recent_days = self.recent_days;
        }
    }
}

fn load_config(cli: &Cli) -> Result<AppConfig, AppError> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::from_file(&path.to_string_lossy())?,
        None => AppConfig::load()?,
    };
    cli.apply_overrides(&mut config);
    config.validate()?;
    Ok(config)
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    if config.observability.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let question = cli.question();
    if question.is_empty() {
        return Err(AppError::Validation {
            message: "question must not be empty".to_string(),
        }
        .into());
    }

    let config = load_config(&cli)?;
    init_tracing(&config);
    info!("Starting PaperScout v{}", VERSION);

    let pipeline = ResearchPipeline::from_config(&config)?;
    let answer = pipeline.answer(&question).await?;

    if cli.json {
        let json = serde_json::to_string_pretty(&answer).context("Failed to encode answer")?;
        println!("{}", json);
    } else {
        print!("{}", report::render(&answer));
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load environment variables
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => match err.downcast_ref::<AppError>() {
            Some(app) => {
                eprintln!("error[{}]: {}", app.code().as_str(), app);
                ExitCode::from(u8::try_from(app.exit_code()).unwrap_or(1))
            }
            None => {
                eprintln!("error: {:#}", err);
                ExitCode::FAILURE
            }
        },
    }
}
