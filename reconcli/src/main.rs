use clap::Parser;
use librecon::{Coordinator, LogConfig, Prober, ReconConfig, ReconError, RunSummary, SqliteConnector};
use std::{
    error::Error,
    fs::OpenOptions,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{dispatcher, error, info, Dispatch};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Layer, Registry};

fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("recon").join("config.toml"))
}

/// An explicitly named config file must exist; the default one is optional.
fn load_config(explicit: Option<&Path>) -> Result<ReconConfig, Box<dyn Error>> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match config_path() {
            Some(path) if path.exists() => path,
            _ => return Ok(ReconConfig::default()),
        },
    };
    let content = std::fs::read_to_string(&path)
        .map_err(|e| format!("Failed to read config {}: {}", path.display(), e))?;
    let config = toml::from_str(&content)
        .map_err(|e| format!("Failed to parse config {}: {}", path.display(), e))?;
    Ok(config)
}

fn get_default_config_toml() -> String {
    r#"# recon configuration

# Ranked domain list: one "rank,...,domain" line per site, no header row
input_list = "res/top-1m.csv"

# Scheme/subdomain prefixes probed for every domain, in order
variants = ["http://", "http://www.", "https://", "https://www."]

# Worker threads (also the maximum number of shards)
workers = 20

# Maximum number of domains per shard
shard_capacity = 32767

[probe]
connect_timeout_secs = 10
timeout_secs = 10
follow_redirects = true
max_redirects = 5
dns_timeout_secs = 5
# user_agent = "recon/0.1"

[store]
url = "sqlite://recon.db"

[log]
file = "recon.log"
# error, warn, info, debug, or any RUST_LOG style filter
level = "info"
# Console output filter; "off" keeps the console quiet
console_level = "info"
"#
    .to_string()
}

#[derive(Parser, Debug)]
#[command(name = "recon")]
#[command(about = "Probe a ranked domain list for HTTP headers, A and MX records", long_about = None)]
struct Args {
    /// Ranked domain list to probe (overrides input_list from the config)
    input: Option<PathBuf>,

    /// Config file to load instead of the default location
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Number of worker threads
    #[arg(long, short = 'w')]
    workers: Option<usize>,

    /// Maximum number of domains per shard
    #[arg(long)]
    shard_capacity: Option<usize>,

    /// Store URL (e.g. sqlite://recon.db)
    #[arg(long)]
    store: Option<String>,

    /// File the run log is appended to
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Log filter (error, warn, info, debug, ...)
    #[arg(long)]
    log_level: Option<String>,

    /// Console log filter (same syntax as --log-level)
    #[arg(long, conflicts_with = "quiet")]
    console_level: Option<String>,

    /// Log to the file only, nothing on the console but the summary
    #[arg(long, short = 'q')]
    quiet: bool,

    /// Print the run summary as JSON
    #[arg(long, short = 'j')]
    json: bool,

    /// Print the default config to stdout and exit
    #[arg(long)]
    print_default_config: bool,

    /// Write the default config to the config path and exit
    #[arg(long)]
    write_default_config: bool,
}

fn apply_overrides(mut config: ReconConfig, args: &Args) -> ReconConfig {
    if let Some(input) = &args.input {
        config.input_list = input.clone();
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if let Some(capacity) = args.shard_capacity {
        config.shard_capacity = capacity;
    }
    if let Some(store) = &args.store {
        config.store.url = store.clone();
    }
    if let Some(file) = &args.log_file {
        config.log.file = file.clone();
    }
    if let Some(level) = &args.log_level {
        config.log.level = level.clone();
    }
    if let Some(level) = &args.console_level {
        config.log.console_level = level.clone();
    }
    if args.quiet {
        config.log.console_level = "off".to_string();
    }
    config
}

/// Console plus log-file output, each with its own filter. `RUST_LOG` wins
/// over the configured file level.
fn build_dispatch(log: &LogConfig) -> Result<Dispatch, Box<dyn Error>> {
    let file_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&log.level))?;
    let console_filter = EnvFilter::try_new(&log.console_level)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log.file)
        .map_err(|e| format!("Failed to open log file {}: {}", log.file.display(), e))?;

    let subscriber = Registry::default()
        .with(fmt::layer().with_target(false).with_filter(console_filter))
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(Arc::new(file))
                .with_filter(file_filter),
        );

    Ok(Dispatch::new(subscriber))
}

fn run(config: &ReconConfig, dispatch: Dispatch) -> Result<RunSummary, ReconError> {
    let connector = SqliteConnector::new(&config.store.url)?;
    info!(
        input = %config.input_list.display(),
        store = %config.store.url,
        workers = config.workers,
        "Starting run"
    );
    Coordinator::new(config, connector, || Prober::new(&config.probe))
        .with_dispatch(dispatch)
        .run()
}

fn print_summary(summary: &RunSummary) {
    let t = &summary.totals;
    println!("Units read:          {}", summary.units_read);
    println!("Excluded on resume:  {}", summary.units_excluded);
    println!("Queued:              {} in {} shards", summary.units_queued, summary.shards);
    println!("Skipped (complete):  {}", t.units_skipped);
    println!("Probed:              {} units, {} variants", t.units_probed, t.variants_probed);
    println!("Unreachable:         {}", t.probe_failures);
    println!("Store failures:      {}", t.persist_failures);
    println!("Duplicates:          {}", t.duplicates);
    if t.abandoned > 0 || summary.worker_failures > 0 {
        println!("Abandoned:           {} units, {} failed workers", t.abandoned, summary.worker_failures);
    }
    println!("Elapsed:             {:.1}s", summary.elapsed_secs);
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    if args.print_default_config {
        println!("{}", get_default_config_toml());
        return Ok(());
    }

    if args.write_default_config {
        if let Some(path) = config_path() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, get_default_config_toml())?;
            println!("Default config written to: {}", path.display());
        } else {
            eprintln!("Error: Could not determine config path");
            std::process::exit(1);
        }
        return Ok(());
    }

    let config = apply_overrides(load_config(args.config.as_deref())?, &args);
    let dispatch = build_dispatch(&config.log)?;

    let summary = dispatcher::with_default(&dispatch, || {
        run(&config, dispatch.clone()).inspect_err(|e| error!(error = %e, "Run aborted"))
    })?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }

    Ok(())
}
