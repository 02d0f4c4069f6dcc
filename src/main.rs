//! CLI entry point for knowmap.
//!
//! Builds snapshots from a corpus file and answers map, cluster, search and
//! classify queries against the persisted snapshot.

use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use knowmap::corpus::sample_documents;
use knowmap::display::{THEME, create_help_text, create_info_table, with_spinner};
use knowmap::index::{SnapshotMetadata, SnapshotPersistence};
use knowmap::io::{ExitCode, OutputFormat, OutputManager};
use knowmap::labels::{LabelRewriter, OpenAiRewriter};
use knowmap::vector::{
    HashedTextEmbedder, KMeansAssigner, LazyEmbedder, TsneProjector, VectorDimension,
    create_embedder,
};
use knowmap::{IndexBuilder, IndexError, LabelSynthesizer, Settings, SimilarityService};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Topical maps over short-text corpora
#[derive(Parser)]
#[command(
    name = "knowmap",
    version = env!("CARGO_PKG_VERSION"),
    about = "Two-level topical maps with similarity search and classification",
    long_about = "Embed a document collection, cluster it into topics and subtopics, \
                  lay it out in 2-D and query the resulting map.",
    next_line_help = true,
    styles = clap_cargo_style(),
    after_help = create_help_text()
)]
struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log build stages and other details to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
enum Commands {
    /// Initialize project
    #[command(about = "Set up .knowmap directory with default configuration")]
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Show current configuration settings
    #[command(about = "Display active settings")]
    Config,

    /// Build and persist a snapshot from a corpus file
    #[command(
        about = "Embed, cluster, project and label a corpus",
        after_help = "Input: a JSON array, a {\"articles\": [...]} object, or JSON Lines.\n\nExamples:\n  knowmap build articles.json\n  knowmap build articles.jsonl --coarse 6 --fine 30 --offline"
    )]
    Build {
        /// Corpus file
        input: PathBuf,

        /// Number of coarse clusters (overrides config)
        #[arg(long)]
        coarse: Option<usize>,

        /// Number of fine clusters (overrides config)
        #[arg(long)]
        fine: Option<usize>,

        /// Use the model-free hashed embedder
        #[arg(long)]
        offline: bool,

        /// Rewrite labels with the configured model
        #[arg(long)]
        refine: bool,

        /// Build from a seeded random subset of N documents
        #[arg(long, value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
        sample: Option<u64>,

        /// Snapshot directory (overrides config)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show the coarse/fine hierarchy
    #[command(about = "List topics, their subtopics and the map bounds")]
    Map,

    /// List the members of one fine cluster
    #[command(about = "Show a fine cluster's label, parent and documents")]
    Cluster {
        /// Fine cluster id
        #[arg(allow_negative_numbers = true)]
        fine_id: i64,
    },

    /// Rank documents by similarity to a query
    #[command(about = "Find the documents most similar to a query")]
    Search {
        query: String,

        /// Number of results (defaults to search.default_k)
        #[arg(short)]
        k: Option<usize>,
    },

    /// Assign text to a fine cluster by neighbor vote
    #[command(about = "Classify free text into the map")]
    Classify { text: String },

    /// Describe the persisted snapshot
    #[command(about = "Show snapshot metadata")]
    Info,
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    let mut output = OutputManager::new(OutputFormat::from_json_flag(cli.json));

    let settings = match load_settings(&cli) {
        Ok(settings) => settings,
        Err(e) => {
            let code = output
                .error(&e)
                .unwrap_or_else(|_| ExitCode::from_error(&e));
            return code.into();
        }
    };
    init_tracing(cli.verbose, settings.debug);

    match run(cli, settings, &mut output) {
        Ok(code) => code.into(),
        Err(e) => report(&mut output, &e).into(),
    }
}

fn load_settings(cli: &Cli) -> Result<Settings, IndexError> {
    let config_error = |e: Box<figment::Error>| IndexError::ConfigError {
        reason: e.to_string(),
    };
    match &cli.config {
        Some(path) => Settings::load_from(path).map_err(|e| IndexError::ConfigError {
            reason: format!("{}: {e}", path.display()),
        }),
        None => {
            if !matches!(cli.command, Commands::Init { .. }) {
                if let Err(warning) = Settings::check_init() {
                    if !cli.json {
                        eprintln!("{}", THEME.warning_with_icon(&warning));
                    }
                }
            }
            Settings::load().map_err(config_error)
        }
    }
}

fn init_tracing(verbose: bool, debug: bool) {
    let default = if debug {
        "knowmap=debug"
    } else if verbose {
        "knowmap=info"
    } else {
        "knowmap=warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Print `error` and pick the exit code; library errors keep their semantics.
fn report(output: &mut OutputManager, error: &anyhow::Error) -> ExitCode {
    match error.downcast_ref::<IndexError>() {
        Some(index_error) => output
            .error(index_error)
            .unwrap_or_else(|_| ExitCode::from_error(index_error)),
        None => output
            .error_message(ExitCode::GeneralError, &format!("{error:#}"))
            .unwrap_or(ExitCode::GeneralError),
    }
}

fn run(cli: Cli, mut settings: Settings, output: &mut OutputManager) -> anyhow::Result<ExitCode> {
    let spinners = !cli.json;
    match cli.command {
        Commands::Init { force } => {
            let path =
                Settings::init_config_file(force).map_err(|e| IndexError::ConfigError {
                    reason: e.to_string(),
                })?;
            output.info(&THEME.success_with_icon(&format!(
                "Created configuration file at: {}",
                path.display()
            )))?;
            Ok(ExitCode::Success)
        }

        Commands::Config => Ok(output.success(SettingsView(settings))?),

        Commands::Build {
            input,
            coarse,
            fine,
            offline,
            refine,
            sample,
            output: snapshot_dir,
        } => {
            if let Some(coarse) = coarse {
                settings.build.coarse_count = coarse;
            }
            if let Some(fine) = fine {
                settings.build.fine_count = fine;
            }
            settings.embedding.offline |= offline;
            settings.refine.enabled |= refine;
            if let Some(sample) = sample {
                settings.build.sample_size = Some(usize::try_from(sample).unwrap_or(usize::MAX));
            }
            if let Some(dir) = snapshot_dir {
                settings.index_path = dir;
            }
            build(&settings, &input, spinners, output)
        }

        Commands::Map => {
            let service = load_service(&settings, spinners)?;
            Ok(output.success(service.map())?)
        }

        Commands::Cluster { fine_id } => {
            let service = load_service(&settings, spinners)?;
            Ok(output.success(service.cluster_members(fine_id)?)?)
        }

        Commands::Search { query, k } => {
            let service = load_service(&settings, spinners)?;
            let started = Instant::now();
            let results = with_spinner("Searching", spinners, || {
                service.search(&query, k.unwrap_or(settings.search.default_k))
            })?;
            Ok(output.success_timed(results, Some(elapsed_ms(started)))?)
        }

        Commands::Classify { text } => {
            let service = load_service(&settings, spinners)?;
            let started = Instant::now();
            let classification =
                with_spinner("Classifying", spinners, || service.classify(&text))?;
            Ok(output.success_timed(classification, Some(elapsed_ms(started)))?)
        }

        Commands::Info => {
            let persistence = SnapshotPersistence::new(settings.resolved_index_path());
            let metadata = persistence.load_metadata()?;
            Ok(output.success(InfoView {
                index_path: persistence.path().to_path_buf(),
                metadata,
            })?)
        }
    }
}

fn build(
    settings: &Settings,
    input: &std::path::Path,
    spinners: bool,
    output: &mut OutputManager,
) -> anyhow::Result<ExitCode> {
    let started = Instant::now();
    let mut documents = knowmap::load_documents(input)?;
    output.progress(&format!(
        "Loaded {} documents from {}",
        documents.len(),
        input.display()
    ))?;
    if let Some(size) = settings.build.sample_size {
        documents = sample_documents(documents, size, settings.build.sample_seed);
        output.progress(&format!("Sampled {} documents", documents.len()))?;
    }

    let embedder: Arc<dyn knowmap::vector::EmbeddingGenerator> = if settings.embedding.offline {
        Arc::new(HashedTextEmbedder::new())
    } else {
        with_spinner("Loading embedding model", spinners, || {
            create_embedder(
                &settings.embedding.model,
                settings.model_cache_dir(),
                spinners,
            )
        })
        .map_err(IndexError::from)?
    };

    let synthesizer = LabelSynthesizer::new()
        .with_extra_denylist(settings.labels.extra_denylist.iter().cloned())
        .with_max_terms(settings.labels.max_terms)
        .with_separator(settings.labels.separator.clone());
    let mut builder = IndexBuilder::new(
        embedder,
        Arc::new(KMeansAssigner::new()),
        Arc::new(TsneProjector::new(
            settings.layout.perplexity,
            settings.layout.iterations,
        )),
    )
    .with_synthesizer(synthesizer)
    .with_tfidf(settings.tfidf_options())
    .with_prefixes(
        settings.labels.coarse_prefix.clone(),
        settings.labels.fine_prefix.clone(),
    );
    if settings.refine.enabled {
        if let Some(rewriter) = make_rewriter(settings) {
            builder = builder.with_rewriter(rewriter, settings.refine.max_label_len);
        }
    }

    let persistence = SnapshotPersistence::new(settings.resolved_index_path());
    let snapshot = with_spinner("Building index", spinners, || {
        builder.build_and_save(documents, &settings.build_params(), &persistence)
    })?;

    let summary = BuildSummary {
        index_path: persistence.path().to_path_buf(),
        model_name: snapshot.metadata.model_name.clone(),
        documents: snapshot.document_count(),
        coarse_clusters: snapshot.coarse_nodes.len(),
        fine_clusters: snapshot.fine_nodes.len(),
        empty_fine_clusters: snapshot.fine_count() - snapshot.fine_nodes.len(),
    };
    Ok(output.success_timed(summary, Some(elapsed_ms(started)))?)
}

/// Load the snapshot and wrap it in a service, refining labels when configured.
fn load_service(settings: &Settings, spinners: bool) -> anyhow::Result<SimilarityService> {
    let persistence = SnapshotPersistence::new(settings.resolved_index_path());
    let snapshot = with_spinner("Loading index", spinners, || persistence.load())?;

    let dimension = VectorDimension::new(snapshot.metadata.dimension)
        .map_err(|e| IndexError::corrupt(e.to_string()))?;
    let embedder = Arc::new(LazyEmbedder::new(
        snapshot.metadata.model_name.clone(),
        dimension,
        settings.model_cache_dir(),
        spinners,
    ));
    let service = SimilarityService::new(snapshot, embedder, settings.service_options())?;

    if settings.refine.on_load {
        if let Some(rewriter) = make_rewriter(settings) {
            let changed = with_spinner("Refining labels", spinners, || {
                service.refine_labels(
                    rewriter.as_ref(),
                    settings.refine.sample_size,
                    settings.refine.seed,
                    settings.refine.max_label_len,
                )
            });
            info!("Refined {changed} labels");
        }
    }
    Ok(service)
}

/// The configured rewriter, or `None` (with a warning) when it cannot be set up.
fn make_rewriter(settings: &Settings) -> Option<Arc<dyn LabelRewriter>> {
    match OpenAiRewriter::from_env(
        &settings.refine.api_key_env,
        settings.refine.model.clone(),
        settings.refine.base_url.clone(),
        Duration::from_secs(settings.refine.timeout_secs),
    ) {
        Ok(rewriter) => Some(Arc::new(rewriter)),
        Err(e) => {
            warn!("Label refinement disabled: {e}");
            None
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[derive(Serialize)]
#[serde(transparent)]
struct SettingsView(Settings);

impl fmt::Display for SettingsView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = toml::to_string_pretty(&self.0).map_err(|_| fmt::Error)?;
        writeln!(f, "Current Configuration:")?;
        writeln!(f, "{}", "=".repeat(50))?;
        write!(f, "{rendered}")
    }
}

#[derive(Serialize)]
struct BuildSummary {
    index_path: PathBuf,
    model_name: String,
    documents: usize,
    coarse_clusters: usize,
    fine_clusters: usize,
    empty_fine_clusters: usize,
}

impl fmt::Display for BuildSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{}",
            THEME.success_with_icon(&format!(
                "Indexed {} documents into {} topics and {} clusters",
                self.documents, self.coarse_clusters, self.fine_clusters
            ))
        )?;
        if self.empty_fine_clusters > 0 {
            writeln!(
                f,
                "{}",
                THEME.warning_with_icon(&format!(
                    "{} fine clusters received no documents",
                    self.empty_fine_clusters
                ))
            )?;
        }
        write!(
            f,
            "Snapshot: {} (model {})",
            THEME.apply(&THEME.path, self.index_path.display()),
            self.model_name
        )
    }
}

#[derive(Serialize)]
struct InfoView {
    index_path: PathBuf,
    #[serde(flatten)]
    metadata: SnapshotMetadata,
}

impl fmt::Display for InfoView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = &self.metadata;
        let table = create_info_table(&[
            ("Path", self.index_path.display().to_string()),
            ("Format version", m.format_version.to_string()),
            ("Model", m.model_name.clone()),
            ("Dimension", m.dimension.to_string()),
            ("Documents", m.document_count.to_string()),
            ("Coarse clusters", m.coarse_count.to_string()),
            ("Fine clusters", m.fine_count.to_string()),
            ("Created", m.created_at.clone()),
        ]);
        write!(f, "{table}")
    }
}
