use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use refmatch::config::{DeviceMode, MatchConfig};
use refmatch::core::{
    CorpusEntry, FileLoader, HashIndex, MatchEngine, MatchQuality, PerceptualHasher,
};
use refmatch::error::ConfigError;
use refmatch::services::records::{self, RunSummary};
use refmatch::services::{HashedCorpus, hash_corpus, sample_entries, scan_directory};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "refmatch",
    version,
    about = "Match raw captures to processed reference images by pixel content"
)]
struct Cli {
    /// Verbose diagnostics (overridden by RUST_LOG)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fingerprint a directory and write the hash table as JSON lines
    Hash {
        /// Directory to scan
        #[arg(short, long, value_name = "DIR")]
        path: PathBuf,
        /// Output table
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
        /// Fingerprint length in bits (square of the hash side)
        #[arg(long, default_value_t = MatchConfig::default().bit_width)]
        bit_width: usize,
    },

    /// Match every query image to its most likely reference image
    Match(MatchArgs),
}

#[derive(Args, Debug)]
struct MatchArgs {
    /// Reference corpus directory
    #[arg(
        long,
        value_name = "DIR",
        required_unless_present = "reference_table",
        conflicts_with = "reference_table"
    )]
    reference: Option<PathBuf>,
    /// Precomputed reference hash table
    #[arg(long, value_name = "FILE")]
    reference_table: Option<PathBuf>,
    /// Query corpus directory
    #[arg(
        long,
        value_name = "DIR",
        required_unless_present = "query_table",
        conflicts_with = "query_table"
    )]
    query: Option<PathBuf>,
    /// Precomputed query hash table
    #[arg(long, value_name = "FILE")]
    query_table: Option<PathBuf>,
    /// Where match records are written
    #[arg(short, long, value_name = "FILE")]
    output: PathBuf,

    #[arg(long, default_value_t = MatchConfig::default().bit_width)]
    bit_width: usize,
    /// Candidates considered per query
    #[arg(long, default_value_t = MatchConfig::default().top_k)]
    top_k: usize,
    /// Candidates strictly below this distance are SSIM-scored
    #[arg(long, default_value_t = MatchConfig::default().hamming_threshold)]
    hamming_threshold: u32,
    #[arg(long, value_enum, default_value_t = DeviceMode::default())]
    device: DeviceMode,
    /// Queries per batched distance computation
    #[arg(long, default_value_t = MatchConfig::default().batch_size)]
    batch_size: usize,
    /// Minimum similarity for a confirmed match
    #[arg(long, default_value_t = MatchConfig::default().ssim_threshold)]
    ssim_threshold: f64,
    /// Only match a random sample of N queries
    #[arg(long, value_name = "N")]
    limit: Option<usize>,
    /// Seed for the `--limit` sample
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

impl MatchArgs {
    fn config(&self) -> MatchConfig {
        MatchConfig {
            bit_width: self.bit_width,
            top_k: self.top_k,
            hamming_threshold: self.hamming_threshold,
            device_mode: self.device,
            batch_size: self.batch_size,
            ssim_threshold: self.ssim_threshold,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Hash {
            path,
            output,
            bit_width,
        } => {
            let hasher = PerceptualHasher::new(bit_width)?;
            println!("▶ Fingerprinting images in: {}", path.display());
            let corpus = fingerprint_directory(&path, &hasher)?;
            records::write_entries(&output, &corpus.entries)
                .with_context(|| format!("Failed to write hash table {:?}", output))?;
            println!(
                "✅ Saved {} fingerprints to {} ({} skipped)",
                corpus.entries.len(),
                output.display(),
                corpus.failures.len()
            );
        }

        Commands::Match(args) => run_match(args)?,
    }

    Ok(())
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn,refmatch=info",
        1 => "refmatch=debug",
        _ => "refmatch=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run_match(args: MatchArgs) -> Result<()> {
    let config = args.config();
    config.validate()?;
    let start = Instant::now();
    let hasher = PerceptualHasher::new(config.bit_width)?;

    let (references, ref_skipped) = load_side(
        "reference",
        args.reference.as_deref(),
        args.reference_table.as_deref(),
        &hasher,
    )?;
    if references.is_empty() {
        return Err(ConfigError::EmptyReference.into());
    }
    let (mut queries, query_skipped) =
        load_side("query", args.query.as_deref(), args.query_table.as_deref(), &hasher)?;
    if let Some(limit) = args.limit {
        queries = sample_entries(queries, limit, args.seed);
        println!("▶ Sampled {} queries (seed {})", queries.len(), args.seed);
    }

    let reference_count = references.len();
    let index = benchmark("building hash index", || {
        HashIndex::build(references, config.bit_width)
    })?;
    let engine = MatchEngine::new(config.clone(), index)?;

    println!(
        "▶ Matching {} queries against {} references…",
        queries.len(),
        reference_count
    );
    let bar = ProgressBar::new(queries.len() as u64);
    bar.set_style(
        ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} queries ({eta})")?
            .progress_chars("##-"),
    );
    let matches = benchmark("matching all queries", || {
        engine.run_with_progress(&queries, |n| bar.inc(n as u64))
    })?;
    bar.finish_and_clear();

    records::write_records(&args.output, &matches)
        .with_context(|| format!("Failed to write match records {:?}", args.output))?;

    let summary = RunSummary::from_records(
        &config,
        reference_count,
        &matches,
        ref_skipped + query_skipped,
        start.elapsed().as_secs_f64(),
    );
    let summary_path = summary_path(&args.output);
    summary
        .append_to(&summary_path)
        .with_context(|| format!("Failed to append run summary {:?}", summary_path))?;

    println!("\n✅ Saved {} match records to {}", matches.len(), args.output.display());
    println!(
        "   confirmed: {}  weak: {}  unconfirmed: {}  no match: {}",
        summary.confirmed, summary.weak, summary.unconfirmed, summary.unmatched
    );
    for record in matches.iter().filter(|r| r.quality == MatchQuality::None).take(5) {
        println!("   ⚠️  No match for {}", record.query_id);
    }
    println!("   Summary appended to {}", summary_path.display());
    Ok(())
}

/// Entries for one side of the match, from a directory or a saved table.
fn load_side(
    label: &str,
    dir: Option<&Path>,
    table: Option<&Path>,
    hasher: &PerceptualHasher,
) -> Result<(Vec<CorpusEntry>, usize)> {
    if let Some(table) = table {
        let entries = records::read_entries(table, hasher.bit_width())
            .with_context(|| format!("Failed to load {label} table {:?}", table))?;
        println!("▶ Loaded {} {label} fingerprints from {}", entries.len(), table.display());
        return Ok((entries, 0));
    }

    let dir = dir.context(format!("No {label} directory or table given"))?;
    println!("▶ Fingerprinting {label} images in: {}", dir.display());
    let corpus = fingerprint_directory(dir, hasher)?;
    Ok((corpus.entries, corpus.failures.len()))
}

fn fingerprint_directory(dir: &Path, hasher: &PerceptualHasher) -> Result<HashedCorpus> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner:.green} {msg}")?);
    spinner.set_message("Scanning for images…");
    spinner.enable_steady_tick(Duration::from_millis(100));
    let paths = scan_directory(dir).with_context(|| format!("Failed to scan {:?}", dir))?;
    spinner.finish_with_message(format!("Found {} images", paths.len()));

    let bar = ProgressBar::new(paths.len() as u64);
    bar.set_style(ProgressStyle::with_template("{bar:40.green} {pos}/{len} hashed")?);
    let corpus = benchmark("hashing all images", || {
        hash_corpus(dir, &paths, &FileLoader, hasher, || bar.inc(1))
    });
    bar.finish_and_clear();

    for (path, reason) in corpus.failures.iter().take(5) {
        eprintln!("⚠️  Skipped {}: {}", path.display(), reason);
    }
    Ok(corpus)
}

fn summary_path(output: &Path) -> PathBuf {
    let mut name = output
        .file_stem()
        .map(|s| s.to_os_string())
        .unwrap_or_default();
    name.push(".summary.jsonl");
    output.with_file_name(name)
}

/// Run `f()`, print how long it took (with `label`), and return its result.
fn benchmark<T, F: FnOnce() -> T>(label: &str, f: F) -> T {
    let start = Instant::now();
    let result = f();
    println!("⏱ {} took {:.2?}", label, start.elapsed());
    result
}
