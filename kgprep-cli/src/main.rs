use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use kgprep_core::{
    DocumentProcessor, EngineKind, ExtractionConfig, ExtractionCoordinator, ExtractionOutcome,
    FallbackPolicy, NormalizationPipeline, PipelineConfig, SourceDocument,
};

#[derive(Parser)]
#[command(name = "kgprep")]
#[command(about = "Extract and normalize document text for knowledge-graph building")]
struct Cli {
    /// Path to custom config file (YAML format)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG overrides.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extract raw text from a PDF or TXT file
    Extract {
        /// Document to extract
        input: PathBuf,

        #[command(flatten)]
        extraction: ExtractionArgs,

        /// Output file for the text (stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write the full outcome (per-page results, skipped pages) as JSON
        #[arg(long)]
        json: bool,
    },

    /// Normalize an already extracted UTF-8 text file
    Normalize {
        /// Text file to normalize
        input: PathBuf,

        /// Output file (stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Extract and normalize a document, storing both text artifacts
    Process {
        /// Document to process
        input: PathBuf,

        #[command(flatten)]
        extraction: ExtractionArgs,

        /// Artifact directory (default: platform data dir + /kgprep)
        #[arg(long)]
        storage_dir: Option<PathBuf>,
    },

    /// Print the effective configuration and available engines
    ShowConfig,
}

/// Overrides applied on top of the `extraction` section of the config file.
#[derive(Args)]
struct ExtractionArgs {
    /// OCR engine: native, fast_ocr, balanced_ocr or accurate_ocr
    #[arg(short, long, value_parser = parse_engine)]
    engine: Option<EngineKind>,

    /// First page to extract (1-based)
    #[arg(long)]
    first_page: Option<u32>,

    /// Last page to extract (inclusive; clamped to the page count)
    #[arg(long)]
    last_page: Option<u32>,

    /// Skip the embedded text layer and OCR every page
    #[arg(long)]
    force_ocr: bool,

    /// OCR only the pages without embedded text
    #[arg(long)]
    per_page_fallback: bool,

    /// Maximum number of pages processed at once
    #[arg(short, long)]
    workers: Option<usize>,
}

impl ExtractionArgs {
    fn apply(&self, mut config: ExtractionConfig) -> ExtractionConfig {
        if let Some(engine) = self.engine {
            config.engine = engine;
        }
        if let Some(first_page) = self.first_page {
            config.first_page = first_page;
        }
        if self.last_page.is_some() {
            config.last_page = self.last_page;
        }
        if self.force_ocr {
            config.force_ocr = true;
        }
        if self.per_page_fallback {
            config.fallback = FallbackPolicy::PerPage;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        config
    }
}

fn parse_engine(value: &str) -> std::result::Result<EngineKind, String> {
    value.parse().map_err(|e: kgprep_core::ExtractError| e.to_string())
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("❌ {e:#}");
        std::process::exit(1);
    }
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => {
            let config = PipelineConfig::load_from_file(path)?;
            eprintln!("📋 Loaded config from: {}", path.display());
            config
        }
        None => PipelineConfig::load_with_fallback(None),
    };

    match cli.command {
        Command::Extract {
            input,
            extraction,
            output,
            json,
        } => cmd_extract(&config, &input, &extraction, output.as_deref(), json),
        Command::Normalize { input, output } => cmd_normalize(&config, &input, output.as_deref()),
        Command::Process {
            input,
            extraction,
            storage_dir,
        } => cmd_process(config, &input, &extraction, storage_dir),
        Command::ShowConfig => show_config(&config),
    }
}

fn cmd_extract(
    config: &PipelineConfig,
    input: &Path,
    args: &ExtractionArgs,
    output: Option<&Path>,
    json: bool,
) -> Result<()> {
    let document = SourceDocument::from_path(input)?;
    let extraction = args.apply(config.extraction.clone());
    let coordinator = ExtractionCoordinator::new(config);
    debug!(?coordinator, "created extraction coordinator");

    eprintln!("📄 Extracting: {} (engine: {})", input.display(), extraction.engine);
    let outcome = coordinator.extract(&document, &extraction)?;
    print_outcome_summary(&outcome);

    let rendered = if json {
        serde_json::to_string_pretty(&outcome)?
    } else {
        outcome.text
    };
    write_output(&rendered, output)
}

fn cmd_normalize(config: &PipelineConfig, input: &Path, output: Option<&Path>) -> Result<()> {
    config
        .normalize
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid normalize config: {e}"))?;
    let raw = fs::read_to_string(input)
        .with_context(|| format!("Failed to read text file: {}", input.display()))?;

    let normalized = NormalizationPipeline::new(config.normalize.clone()).normalize_counted(&raw);
    eprintln!(
        "✅ Normalized {} chars down to {}",
        raw.chars().count(),
        normalized.word_count
    );
    write_output(&normalized.text, output)
}

fn cmd_process(
    mut config: PipelineConfig,
    input: &Path,
    args: &ExtractionArgs,
    storage_dir: Option<PathBuf>,
) -> Result<()> {
    config.extraction = args.apply(config.extraction);
    let storage_dir = storage_dir.unwrap_or_else(default_storage_dir);
    let processor = DocumentProcessor::with_storage_dir(&config, &storage_dir)?;
    let document = SourceDocument::from_path(input)?;

    eprintln!("📄 Processing: {} (id: {})", input.display(), document.id);
    let normalized = processor.process_document(&document, &config)?;

    let summary = serde_json::json!({
        "document_id": document.id,
        "input": input.display().to_string(),
        "engine": config.extraction.engine,
        "state": processor.lifecycle().state(document.id),
        "word_count": normalized.word_count,
        "storage_dir": storage_dir.display().to_string(),
        "processed_at": chrono::Utc::now().to_rfc3339(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    eprintln!("✅ Artifacts stored under: {}", storage_dir.display());
    Ok(())
}

fn show_config(config: &PipelineConfig) -> Result<()> {
    println!("{}", serde_yaml::to_string(config)?);

    println!("# Engines:");
    for engine in EngineKind::ALL {
        let available = match engine {
            EngineKind::Native => true,
            EngineKind::FastOcr => cfg!(feature = "tesseract"),
            EngineKind::BalancedOcr => cfg!(feature = "paddle") && config.ocr.balanced.is_some(),
            EngineKind::AccurateOcr => cfg!(feature = "paddle") && config.ocr.accurate.is_some(),
        };
        let marker = if available { "available" } else { "not available" };
        println!("#   {:<13} {}", engine.name(), marker);
    }
    if !cfg!(feature = "pdfium") {
        println!("# OCR engines need the pdfium feature to rasterize pages");
    }
    Ok(())
}

fn print_outcome_summary(outcome: &ExtractionOutcome) {
    eprintln!("✅ Extracted with {}", outcome.engine_used);
    eprintln!("   - Pages: {}", outcome.pages.len());
    eprintln!("   - Characters: {}", outcome.text.chars().count());
    if !outcome.skipped_pages.is_empty() {
        eprintln!("⚠️  Skipped pages: {:?}", outcome.skipped_pages);
    }
}

fn write_output(text: &str, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            fs::write(path, text)
                .with_context(|| format!("Failed to write output: {}", path.display()))?;
            eprintln!("💾 Saved to: {}", path.display());
        }
        None => println!("{text}"),
    }
    Ok(())
}

fn default_storage_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("kgprep"))
        .unwrap_or_else(|| PathBuf::from(".kgprep"))
}
