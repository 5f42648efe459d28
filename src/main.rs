use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use footprint_matcher::analysis::RecoveryBenchmark;
use footprint_matcher::config::load_config_or_default;
use footprint_matcher::data::{load_points, source_name, synthetic_sole};
use footprint_matcher::fingerprint::{load_document, save_document};
use footprint_matcher::logging::{global_metrics, init_logging, LoggingConfig};
use footprint_matcher::visualization::{
    alignment_report, comparison_report, merge_report, recovery_report, search_report, timing_report, write_report,
};
use footprint_matcher::{Config, Fingerprint, FingerprintStore, PointCloudAligner};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "footprint")]
#[command(about = "Forensic footprint matching on detected sole features")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file (JSON or TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Write JSON logs to this directory as well
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a fingerprint document from a detection file
    Encode {
        /// Detection list `[{x, y, confidence, class}]`
        input: PathBuf,

        /// Fingerprint id (defaults to the file stem)
        #[arg(long)]
        id: Option<String>,

        #[arg(short, long)]
        output: PathBuf,
    },

    /// Compare two fingerprints (documents or detection files)
    Compare {
        first: PathBuf,
        second: PathBuf,

        /// Write the full result as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Merge a second observation into a fingerprint
    Merge {
        target: PathBuf,
        other: PathBuf,

        /// Where to write the merged document
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Align two point sets and print the recovered transform
    Align {
        source: PathBuf,
        target: PathBuf,

        #[arg(long)]
        seed: Option<u64>,

        /// Skip the mirrored hypothesis
        #[arg(long)]
        no_mirror: bool,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Known-transform recovery self-test
    Validate {
        /// Points to use; a synthetic sole when omitted
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Size of the synthetic sole
        #[arg(short = 'n', long, default_value = "40")]
        points: usize,

        #[arg(long, default_value = "42")]
        seed: u64,

        /// Write the text report here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Find fingerprints similar to a query among a directory of documents
    Search {
        query: PathBuf,

        /// Directory of fingerprint documents
        #[arg(short, long)]
        dir: PathBuf,

        /// Also list `different` results
        #[arg(long)]
        all: bool,

        #[arg(short, long)]
        limit: Option<usize>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let logging = LoggingConfig {
        log_directory: cli.log_dir.clone(),
        ..LoggingConfig::from_verbosity(cli.verbose)
    };
    let _logging = init_logging(&logging)?;

    let config = load_config_or_default(cli.config.as_deref());
    if let Err(errors) = config.validate() {
        bail!("invalid configuration: {}", errors.join("; "));
    }

    let outcome = match cli.command {
        Commands::Encode { input, id, output } => handle_encode(&config, &input, id, &output),
        Commands::Compare { first, second, output } => handle_compare(&config, &first, &second, output),
        Commands::Merge { target, other, output } => handle_merge(&config, &target, &other, &output),
        Commands::Align {
            source,
            target,
            seed,
            no_mirror,
            output,
        } => handle_align(config, &source, &target, seed, no_mirror, output),
        Commands::Validate {
            input,
            points,
            seed,
            output,
        } => handle_validate(&config, input, points, seed, output),
        Commands::Search { query, dir, all, limit } => handle_search(config, &query, &dir, all, limit),
    };

    if cli.verbose > 0 {
        eprint!("{}", timing_report(&global_metrics().summary()));
    }
    outcome
}

/// Fingerprint documents carry a `points` field; anything else is read as a
/// detection list.
fn load_fingerprint(path: &Path, config: &Config) -> anyhow::Result<Fingerprint> {
    let content = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let value: serde_json::Value =
        serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
    if value.get("points").is_some() {
        return load_document(path, config);
    }
    let points = load_points(path, &config.input)?;
    Ok(Fingerprint::create_from_points(source_name(path), points, config))
}

fn handle_encode(config: &Config, input: &Path, id: Option<String>, output: &Path) -> anyhow::Result<()> {
    let points = load_points(input, &config.input)?;
    let id = id.unwrap_or_else(|| source_name(input));
    let fingerprint = Fingerprint::create_from_points(id, points, config);
    save_document(&fingerprint, output)?;

    let stats = fingerprint.stats();
    println!(
        "Encoded {} ({} points, confidence {:.3}{}) -> {}",
        fingerprint.id,
        fingerprint.point_count(),
        stats.confidence,
        if stats.low_confidence { ", low confidence" } else { "" },
        output.display()
    );
    Ok(())
}

fn handle_compare(config: &Config, first: &Path, second: &Path, output: Option<PathBuf>) -> anyhow::Result<()> {
    let a = load_fingerprint(first, config)?;
    let b = load_fingerprint(second, config)?;
    let result = a.compare(&b, config);
    print!("{}", comparison_report(&a.id, &b.id, &result));

    if let Some(path) = output {
        write_report(&path, &serde_json::to_string_pretty(&result)?)?;
        println!("Result saved to {}", path.display());
    }
    Ok(())
}

fn handle_merge(config: &Config, target: &Path, other: &Path, output: &Path) -> anyhow::Result<()> {
    let mut base = load_fingerprint(target, config)?;
    let observation = load_fingerprint(other, config)?;
    let result = base.merge_with_transformation(&observation, config);
    print!("{}", merge_report(&base.id, &observation.id, &result));

    if !result.success {
        bail!(
            "merge refused: {}",
            result.reason.unwrap_or_else(|| "unknown reason".to_string())
        );
    }
    save_document(&base, output)?;
    println!("Merged fingerprint saved to {}", output.display());
    Ok(())
}

fn handle_align(
    config: Config,
    source: &Path,
    target: &Path,
    seed: Option<u64>,
    no_mirror: bool,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let source_points = load_fingerprint(source, &config)?.points().to_vec();
    let target_points = load_fingerprint(target, &config)?.points().to_vec();

    let mut aligner_config = config.aligner.clone().with_mirror_check(!no_mirror);
    if let Some(seed) = seed {
        aligner_config = aligner_config.with_seed(seed);
    }
    let aligner = PointCloudAligner::new(aligner_config).with_encoder_config(config.encoders);
    let result = aligner.align(&source_points, &target_points, None);
    print!("{}", alignment_report(&result));

    if let Some(path) = output {
        write_report(&path, &serde_json::to_string_pretty(&result)?)?;
    }
    Ok(())
}

fn handle_validate(
    config: &Config,
    input: Option<PathBuf>,
    points: usize,
    seed: u64,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let cloud = match input {
        Some(path) => load_fingerprint(&path, config)?.points().to_vec(),
        None => synthetic_sole(points, seed),
    };
    let benchmark = RecoveryBenchmark::new(config).with_seed(seed);
    let reports = benchmark.run(&cloud);
    let report = recovery_report(&reports);
    print!("{}", report);

    if let Some(path) = output {
        write_report(&path, &report)?;
    }

    let summary = RecoveryBenchmark::summarize(&reports);
    if summary.passed < summary.total {
        bail!("{} of {} recovery scenarios failed", summary.total - summary.passed, summary.total);
    }
    Ok(())
}

fn handle_search(
    mut config: Config,
    query: &Path,
    dir: &Path,
    all: bool,
    limit: Option<usize>,
) -> anyhow::Result<()> {
    config.search.include_different |= all;
    if let Some(limit) = limit {
        config.search.max_results = limit;
    }

    let query = load_fingerprint(query, &config)?;
    let store = FingerprintStore::new(config)?;
    let loaded = store.load_dir(dir)?;
    println!("Loaded {} fingerprint(s) from {}", loaded, dir.display());

    let hits = store.find_similar(&query);
    print!("{}", search_report(&query.id, &hits));
    Ok(())
}
