use anyhow::{Context, Result};
use arxiv_ingest::config::{default_config_path, load_config, Config};
use arxiv_ingest::models::{DateRange, SearchQuery, SortBy, SortOrder};
use arxiv_ingest::parser::{build_extractor, ExtractorBackend, ParsingAdapter};
use arxiv_ingest::pipeline::{Pipeline, PipelineError, RunReport};
use arxiv_ingest::sources::{ArtifactDownloader, ArxivClient, MetadataSource};
use arxiv_ingest::store::{store_report, JsonlSink};
use arxiv_ingest::ui::{self, RunProgress, Status};
use arxiv_ingest::utils::{HttpClient, RateLimiter};
use clap::{Parser, Subcommand, ValueEnum};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// arXiv Ingest - fetch papers, download their PDFs and extract structured content
#[derive(Parser, Debug)]
#[command(name = "arxiv-ingest")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Fetch arXiv papers, download their PDFs and extract structured content", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(long, short, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Output format
    #[arg(long, short, value_enum, global = true, default_value_t = OutputFormat::Auto)]
    output: OutputFormat,

    /// Configuration file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Output format for results
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum OutputFormat {
    /// Plain text on a terminal, JSON otherwise
    Auto,
    /// Human-readable text
    Plain,
    /// JSON (machine-readable)
    Json,
}

impl OutputFormat {
    fn is_json(self) -> bool {
        match self {
            OutputFormat::Auto => !std::io::stdout().is_terminal(),
            OutputFormat::Plain => false,
            OutputFormat::Json => true,
        }
    }
}

/// Sort field for results
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum SortField {
    Relevance,
    Updated,
    Submitted,
}

impl From<SortField> for SortBy {
    fn from(field: SortField) -> Self {
        match field {
            SortField::Relevance => SortBy::Relevance,
            SortField::Updated => SortBy::LastUpdatedDate,
            SortField::Submitted => SortBy::SubmittedDate,
        }
    }
}

/// Sort order
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Order {
    Asc,
    Desc,
}

impl From<Order> for SortOrder {
    fn from(order: Order) -> Self {
        match order {
            Order::Asc => SortOrder::Ascending,
            Order::Desc => SortOrder::Descending,
        }
    }
}

/// Search arguments shared by `run` and `fetch`
#[derive(clap::Args, Debug)]
struct QueryArgs {
    /// arXiv category (default from config)
    #[arg(long, short)]
    category: Option<String>,

    /// Maximum number of records (capped at 2000)
    #[arg(long, short)]
    max_results: Option<usize>,

    /// Offset of the first record
    #[arg(long, default_value_t = 0)]
    start: usize,

    /// First submission date (YYYYMMDD or YYYY-MM-DD)
    #[arg(long, requires = "to")]
    from: Option<String>,

    /// Last submission date (YYYYMMDD or YYYY-MM-DD)
    #[arg(long, requires = "from")]
    to: Option<String>,

    /// Sort field
    #[arg(long, value_enum, default_value_t = SortField::Submitted)]
    sort_by: SortField,

    /// Sort order
    #[arg(long, value_enum, default_value_t = Order::Desc)]
    order: Order,
}

impl QueryArgs {
    fn to_query(&self, config: &Config) -> Result<SearchQuery> {
        let mut query = SearchQuery::new()
            .category(
                self.category
                    .clone()
                    .unwrap_or_else(|| config.arxiv.category.clone()),
            )
            .max_results(self.max_results.unwrap_or(config.arxiv.max_results))
            .start(self.start)
            .sort_by(self.sort_by.into())
            .sort_order(self.order.into());

        if let (Some(from), Some(to)) = (&self.from, &self.to) {
            let range = DateRange::parse(from, to)
                .with_context(|| format!("invalid date range {}..{}", from, to))?;
            query = query.date_range(range);
        }
        Ok(query)
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch records, download their PDFs and parse them
    Run {
        #[command(flatten)]
        query: QueryArgs,

        /// Re-download PDFs already in the cache
        #[arg(long)]
        force: bool,

        /// Append parsed papers to this JSON Lines file
        #[arg(long)]
        jsonl: Option<PathBuf>,

        /// Cancel the run after this many seconds
        #[arg(long)]
        deadline: Option<u64>,

        /// PDF cache directory (default from config)
        #[arg(long)]
        cache_dir: Option<PathBuf>,

        /// Maximum simultaneous downloads
        #[arg(long)]
        download_concurrency: Option<usize>,

        /// Maximum simultaneous parses
        #[arg(long)]
        parse_concurrency: Option<usize>,

        /// Content extraction backend
        #[arg(long, value_enum)]
        backend: Option<ExtractorBackend>,
    },

    /// Fetch and list records without downloading anything
    Fetch {
        #[command(flatten)]
        query: QueryArgs,
    },

    /// Parse a local PDF
    Parse {
        /// PDF file to parse
        file: PathBuf,

        /// Content extraction backend
        #[arg(long, value_enum)]
        backend: Option<ExtractorBackend>,
    },

    /// Show or initialize the configuration
    Config {
        /// Write the default configuration to the default location
        #[arg(long)]
        init: bool,

        /// Overwrite an existing file with --init
        #[arg(long, requires = "init")]
        force: bool,
    },
}

fn init_tracing(cli: &Cli) {
    let level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("arxiv_ingest={}", level)));

    let text_layer = (!cli.log_json)
        .then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));
    let json_layer = cli
        .log_json
        .then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(text_layer)
        .with(json_layer)
        .init();
}

/// Token cancelled on Ctrl-C
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling outstanding work");
            token.cancel();
        }
    });
    cancel
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(&cli);

    let mut config = load_config(cli.config.as_deref()).context("failed to load configuration")?;
    let json = cli.output.is_json();

    match &cli.command {
        Commands::Run {
            query,
            force,
            jsonl,
            deadline,
            cache_dir,
            download_concurrency,
            parse_concurrency,
            backend,
        } => {
            if let Some(dir) = cache_dir {
                config.downloads.cache_dir = dir.clone();
            }
            if let Some(n) = download_concurrency {
                config.pipeline.download_concurrency = *n;
            }
            if let Some(n) = parse_concurrency {
                config.pipeline.parse_concurrency = *n;
            }
            if let Some(backend) = backend {
                config.parser.backend = *backend;
            }
            if deadline.is_some() {
                config.pipeline.deadline_secs = *deadline;
            }
            config.validate()?;

            let search = query.to_query(&config)?;
            let report = run_pipeline(&cli, &config, &search, *force, jsonl.as_ref()).await?;

            if json {
                print_json(&report)?;
            } else if !cli.quiet {
                ui::print_run_summary(&report);
            }

            Ok(if report.cancelled {
                ExitCode::from(130)
            } else if report.stats.failed() > 0 || report.store_error.is_some() {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            })
        }

        Commands::Fetch { query } => {
            let search = query.to_query(&config)?;
            let client = arxiv_client(&config)?;
            let cancel = cancel_on_ctrl_c();
            let records = client.fetch(&search, &cancel).await?;

            if json {
                print_json(&records)?;
            } else {
                ui::print_records(&records);
                if !cli.quiet {
                    ui::print_status(Status::Info, &format!("{} records", records.len()));
                }
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Parse { file, backend } => {
            let backend = backend.unwrap_or(config.parser.backend);
            let adapter = ParsingAdapter::new(build_extractor(backend), config.parse_limits());

            match adapter.parse(file).await {
                Ok(content) => {
                    if json {
                        print_json(&content)?;
                    } else {
                        ui::print_content_summary(&content);
                    }
                    Ok(ExitCode::SUCCESS)
                }
                Err(failure) => {
                    if json {
                        print_json(&serde_json::json!({
                            "kind": failure.kind(),
                            "message": failure.to_string(),
                        }))?;
                    } else {
                        ui::print_status(
                            Status::Error,
                            &format!("{}: {}", file.display(), failure),
                        );
                    }
                    Ok(ExitCode::from(1))
                }
            }
        }

        Commands::Config { init, force } => {
            if *init {
                let path = default_config_path().context("no user config directory")?;
                if path.exists() && !force {
                    anyhow::bail!(
                        "{} already exists (use --force to overwrite)",
                        path.display()
                    );
                }
                Config::default().save(&path)?;
                ui::print_status(
                    Status::Success,
                    &format!("Wrote {}", path.display()),
                );
            } else if json {
                print_json(&config)?;
            } else {
                print!("{}", config.to_toml()?);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn arxiv_client(config: &Config) -> Result<ArxivClient> {
    let http = HttpClient::new(config.request_timeout())?;
    let limiter = Arc::new(RateLimiter::new(config.rate_limit_delay()));
    Ok(ArxivClient::new(http, limiter)
        .with_base_url(config.arxiv.base_url.clone())
        .with_category(config.arxiv.category.clone()))
}

async fn run_pipeline(
    cli: &Cli,
    config: &Config,
    search: &SearchQuery,
    force: bool,
    jsonl: Option<&PathBuf>,
) -> Result<RunReport> {
    let http = HttpClient::new(config.request_timeout())?;
    // One limiter for every request to the host, metadata and PDFs alike
    let limiter = Arc::new(RateLimiter::new(config.rate_limit_delay()));

    let source = ArxivClient::new(http.clone(), Arc::clone(&limiter))
        .with_base_url(config.arxiv.base_url.clone())
        .with_category(config.arxiv.category.clone());
    let downloader = ArtifactDownloader::new(http, limiter, config.downloads.cache_dir.clone())
        .with_retry(config.retry_config());
    let parser = ParsingAdapter::new(
        build_extractor(config.parser.backend),
        config.parse_limits(),
    );

    let show_progress = !cli.quiet && !cli.log_json && cli.verbose == 0 && ui::is_terminal();
    let progress = Arc::new(if show_progress {
        RunProgress::new()
    } else {
        RunProgress::hidden()
    });

    let pipeline = Pipeline::new(
        Arc::new(source),
        Arc::new(downloader),
        Arc::new(parser),
        config.pipeline_options(force),
    )?
    .with_observer(progress.clone())?;

    let cancel = cancel_on_ctrl_c();
    let result = pipeline.run(search, &cancel).await;
    progress.finish();

    let mut report = match result {
        Ok(report) => report,
        Err(PipelineError::Cancelled) => anyhow::bail!("cancelled before any record was fetched"),
        Err(e) => return Err(e.into()),
    };

    if let Some(path) = jsonl {
        let sink = JsonlSink::new(path.clone());
        // A failure is logged and kept in the report; the exit code reflects it
        store_report(&sink, &mut report).await.ok();
    }

    Ok(report)
}
