use abc_poster::coordinator::{generate_single, generation_status};
use abc_poster::prompt::MAX_ESCALATION_ATTEMPTS;
use abc_poster::{
    Alphabet, AlphabetEntry, CardGenerator, CardStore, CheckpointStore, Coordinator, CoordinatorOptions,
    LegibilityValidator, MetadataLog, OpenAiImageBackend, PosterAssembler, PosterConfig, TesseractOcr,
};
use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "abc-poster", version, about = "Generate an illustrated ABC poster")]
struct Cli {
    /// Alphabet override file (JSON object or array of {letter, word})
    #[arg(long, global = true, conflicts_with = "builtin")]
    alphabet: Option<PathBuf>,

    /// Built-in alphabet to use when no override file is given
    #[arg(long, global = true, value_enum)]
    builtin: Option<Builtin>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum Builtin {
    Russian,
    English,
}

#[derive(Subcommand)]
enum Command {
    /// Generate cards for every pending letter
    Generate {
        /// Continue from the last checkpoint
        #[arg(long)]
        resume: bool,
        /// Process at most N letters in this run
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        max_attempts: Option<u32>,
    },
    /// Generate a single card
    Card { letter: String, word: String },
    /// Compose the poster from whatever cards exist
    Assemble,
    /// Show which letters have cards
    Status,
    /// Delete cards, the metadata log and the checkpoint
    Clean {
        #[arg(long)]
        yes: bool,
    },
}

fn select_alphabet(cli: &Cli, config: &PosterConfig) -> anyhow::Result<Alphabet> {
    let alphabet = match (&cli.alphabet, cli.builtin) {
        (Some(path), _) => Alphabet::load(path)?,
        (None, Some(Builtin::English)) => Alphabet::english(),
        (None, Some(Builtin::Russian)) => Alphabet::russian(),
        (None, None) => config.alphabet()?,
    };
    Ok(alphabet)
}

fn build_generator(config: &PosterConfig, max_attempts: Option<u32>) -> anyhow::Result<CardGenerator> {
    let openai = config.openai().context("the image backend needs an API key")?;
    let backend = OpenAiImageBackend::new(openai).context("failed to set up the image backend")?;
    let ocr = TesseractOcr::new(config.tesseract_cmd.clone(), config.tesseract_psm);
    let validator = LegibilityValidator::new(Arc::new(ocr), config.generation.ocr_language.clone());

    let mut generation = config.generation.clone();
    if let Some(max_attempts) = max_attempts {
        if max_attempts == 0 || max_attempts > MAX_ESCALATION_ATTEMPTS {
            bail!("--max-attempts must be between 1 and {}", MAX_ESCALATION_ATTEMPTS);
        }
        generation.max_attempts = max_attempts;
    }

    Ok(CardGenerator::new(
        Arc::new(backend),
        validator,
        CardStore::new(&config.storage_path),
        generation,
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = PosterConfig::from_env().context("invalid configuration")?;
    let alphabet = select_alphabet(&cli, &config).context("invalid alphabet")?;
    config
        .layout
        .validate_for(alphabet.len())
        .context("invalid poster layout")?;

    let store = CardStore::new(&config.storage_path);
    let log = MetadataLog::in_dir(&config.storage_path);

    match cli.command {
        Command::Generate {
            resume,
            limit,
            max_attempts,
        } => {
            let generator = build_generator(&config, max_attempts)?;
            let options = CoordinatorOptions {
                max_attempts: generator.config().max_attempts,
                resume,
                limit,
            };
            let mut coordinator = Coordinator::new(
                alphabet,
                generator,
                log,
                CheckpointStore::in_dir(&config.storage_path),
                options,
            );

            let interrupt = coordinator.interrupt_handle();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Ctrl-C: finishing the current letter, then stopping");
                    interrupt.store(true, Ordering::SeqCst);
                }
            });

            let summary = coordinator.run().await?;
            info!(
                "Run {}: {:?}, {} processed, {} validated, {} degraded, {} failed, {} remaining",
                summary.run_id,
                summary.final_state,
                summary.processed_this_run,
                summary.validated,
                summary.degraded,
                summary.failed,
                summary.remaining
            );
        }
        Command::Card { letter, word } => {
            let entry = Alphabet::from_entries(vec![AlphabetEntry::new(letter, word)])
                .context("invalid card entry")?
                .entries()
                .first()
                .cloned()
                .context("invalid card entry")?;
            let mut generator = build_generator(&config, None)?;
            let max_attempts = generator.config().max_attempts;
            let record = generate_single(&mut generator, &log, &entry, max_attempts).await?;
            match &record.file_path {
                Some(path) => info!(
                    "{} - {}: {} after {} attempts, saved to {}",
                    record.letter,
                    record.word,
                    record.final_status,
                    record.attempts_used,
                    path.display()
                ),
                None => error!(
                    "{} - {}: {} ({})",
                    record.letter,
                    record.word,
                    record.final_status,
                    record.error.as_deref().unwrap_or("no image")
                ),
            }
        }
        Command::Assemble => {
            let records = store.scan(&alphabet, &log)?;
            let assembler = PosterAssembler::new(config.layout.clone())?;
            let poster = assembler.assemble(&alphabet, &records);
            let path = assembler.write(&poster, &config.output_path)?;
            info!(
                "Poster written to {}: {} validated, {} degraded, {} placeholders",
                path.display(),
                poster.info.counts.validated,
                poster.info.counts.degraded,
                poster.info.counts.placeholder
            );
        }
        Command::Status => {
            let status = generation_status(&alphabet, &store, &log)?;
            info!(
                "{} of {} letters have cards ({:.1}%)",
                status.validated.len() + status.degraded.len(),
                status.total,
                status.completion_percent()
            );
            info!("Validated: {}", status.validated.join(" "));
            info!("Degraded: {}", status.degraded.join(" "));
            info!("Failed: {}", status.failed.join(" "));
            info!("Missing: {}", status.missing.join(" "));
        }
        Command::Clean { yes } => {
            if !yes {
                bail!(
                    "refusing to delete cards in {} without --yes",
                    config.storage_path.display()
                );
            }
            let deleted = store.clean()?;
            info!("Removed {} files from {}", deleted, config.storage_path.display());
        }
    }

    Ok(())
}
