use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use pileup_store::genomics::{AlignmentSource, BamSource, FaiReference};
use pileup_store::pipeline::{self, AccumulationSummary, ElementGroup, Region, ViewSelection};
use pileup_store::scan::{self, read_candidates};
use pileup_store::{Element, PileupStore, PipelineConfig, ScanConfig, StoreParameters};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "pileup-store", about = "Per-position, per-strand pileup counter store")]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create an empty store for every chromosome of a reference.
    Bootstrap {
        /// Store file to create.
        #[arg(long)]
        store: PathBuf,
        /// Reference FASTA or its `.fai` index.
        #[arg(long)]
        reference: PathBuf,
        /// Coverage below which a position counts as low-read.
        #[arg(long, default_value_t = pileup_store::config::DEFAULT_LOW_READ_COUNT)]
        low_read_count: u32,
        /// Non-reference percentage at which a position counts as high non-reference.
        #[arg(long, default_value_t = pileup_store::config::DEFAULT_NONREF_PERCENT)]
        nonref_percent: u32,
        /// Replace an existing store.
        #[arg(long)]
        overwrite: bool,
    },
    /// Accumulate indexed BAM files into a store.
    Add {
        #[command(flatten)]
        args: AccumulateArgs,
    },
    /// Take previously added BAM files back out of a store.
    Remove {
        #[command(flatten)]
        args: AccumulateArgs,
    },
    /// Fold the counters and provenance of other stores into a store.
    Merge {
        /// Target store.
        #[arg(long)]
        store: PathBuf,
        /// Source stores.
        #[arg(long = "input", required = true, num_args = 1..)]
        inputs: Vec<PathBuf>,
        /// Worker threads.
        #[arg(long, default_value_t = 1)]
        threads: usize,
        /// Positions per work unit.
        #[arg(long, default_value_t = pileup_store::config::DEFAULT_BLOCK_SIZE)]
        block_size: u64,
        /// Merge even when a source is unreversed in more than one store.
        #[arg(long = "override")]
        allow_override: bool,
    },
    /// Print counters of a region as CSV.
    View {
        /// Store to read.
        #[arg(long)]
        store: PathBuf,
        /// `chr` or `chr:start-end`.
        #[arg(long)]
        region: Region,
        /// Elements to print (comma-separated); all by default.
        #[arg(long, value_delimiter = ',', conflicts_with = "group")]
        elements: Vec<Element>,
        /// Preset columns: forward, reverse, bases, quals, cigars, readStats or metrics.
        #[arg(long)]
        group: Option<ElementGroup>,
        /// Output file; stdout by default.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Summarize candidate positions in fixed-width windows.
    Scan {
        /// Stores to sum (repeatable).
        #[arg(long = "store", required = true, num_args = 1..)]
        stores: Vec<PathBuf>,
        /// `chr` or `chr:start-end`.
        #[arg(long)]
        region: Region,
        /// Candidate positions (`chr<TAB>pos` or BED).
        #[arg(long)]
        candidates: PathBuf,
        /// Window width.
        #[arg(long, default_value_t = 100)]
        window: u64,
        /// Minimum candidate positions per window.
        #[arg(long, default_value_t = 3)]
        min_positions: usize,
        /// Minimum summed depth per window.
        #[arg(long, default_value_t = 0)]
        min_count: u64,
        /// Output file; stdout by default.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print the store header and provenance log.
    Info {
        /// Store to read.
        #[arg(long)]
        store: PathBuf,
    },
}

#[derive(clap::Args, Debug)]
struct AccumulateArgs {
    /// Store to update.
    #[arg(long)]
    store: PathBuf,
    /// Indexed BAM files.
    #[arg(long = "input", required = true, num_args = 1..)]
    inputs: Vec<PathBuf>,
    /// Declared identity per input, in input order, instead of a content digest.
    #[arg(long = "uuid")]
    uuids: Vec<String>,
    /// Worker threads.
    #[arg(long, default_value_t = 1)]
    threads: usize,
    /// Positions per work unit.
    #[arg(long, default_value_t = pileup_store::config::DEFAULT_BLOCK_SIZE)]
    block_size: u64,
    /// Bases below this quality are counted as N.
    #[arg(long, default_value_t = 0)]
    min_base_quality: u8,
    /// Add sources that are already recorded.
    #[arg(long = "override")]
    allow_override: bool,
    /// Low-read threshold for this add instead of the store's.
    #[arg(long, requires = "nonref_percent")]
    low_read_count: Option<u32>,
    /// Non-reference threshold for this add instead of the store's.
    #[arg(long, requires = "low_read_count")]
    nonref_percent: Option<u32>,
}

impl AccumulateArgs {
    fn config(&self) -> Result<PipelineConfig> {
        let mut config = PipelineConfig::default()
            .with_threads(self.threads)?
            .with_block_size(self.block_size)?
            .with_min_base_quality(self.min_base_quality)
            .with_override(self.allow_override);
        if let (Some(low_read_count), Some(nonref_percent)) = (self.low_read_count, self.nonref_percent) {
            config = config.with_thresholds(
                StoreParameters::default()
                    .with_low_read_count(low_read_count)?
                    .with_nonref_percent(nonref_percent)?,
            );
        }
        Ok(config)
    }

    fn sources(&self) -> Result<Vec<Box<dyn AlignmentSource>>> {
        if !self.uuids.is_empty() && self.uuids.len() != self.inputs.len() {
            bail!(
                "{} --uuid values given for {} inputs",
                self.uuids.len(),
                self.inputs.len()
            );
        }
        self.inputs
            .iter()
            .enumerate()
            .map(|(i, path)| {
                let uuid = self.uuids.get(i).map(String::as_str);
                let source = BamSource::open(path, uuid)
                    .with_context(|| format!("failed to open alignment file {}", path.display()))?;
                Ok(Box::new(source) as Box<dyn AlignmentSource>)
            })
            .collect()
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Bootstrap {
            store,
            reference,
            low_read_count,
            nonref_percent,
            overwrite,
        } => run_bootstrap(&store, &reference, low_read_count, nonref_percent, overwrite),
        Commands::Add { args } => {
            let summary = pipeline::add(&args.store, &args.sources()?, &args.config()?)
                .with_context(|| format!("add into {} failed", args.store.display()))?;
            print_summary("added", &summary);
            Ok(())
        }
        Commands::Remove { args } => {
            let summary = pipeline::remove(&args.store, &args.sources()?, &args.config()?)
                .with_context(|| format!("remove from {} failed", args.store.display()))?;
            print_summary("removed", &summary);
            Ok(())
        }
        Commands::Merge {
            store,
            inputs,
            threads,
            block_size,
            allow_override,
        } => {
            let config = PipelineConfig::default()
                .with_threads(threads)?
                .with_block_size(block_size)?
                .with_override(allow_override);
            let summary = pipeline::merge(&store, &inputs, &config)
                .with_context(|| format!("merge into {} failed", store.display()))?;
            println!(
                "merged {} stores into {}: {} entries carried, {} blocks written",
                summary.sources.len(),
                store.display(),
                summary.entries_carried,
                summary.blocks_written
            );
            Ok(())
        }
        Commands::View {
            store,
            region,
            elements,
            group,
            output,
        } => {
            let selection = match group {
                Some(group) => ViewSelection::group(group),
                None => ViewSelection::elements(&elements),
            };
            let mut handle = open_store(&store)?;
            let mut out = output_writer(output.as_deref())?;
            pipeline::render_view(&mut out, &mut handle, &region, &selection)
                .with_context(|| format!("view of {} failed", region))?;
            handle.close()?;
            Ok(())
        }
        Commands::Scan {
            stores,
            region,
            candidates,
            window,
            min_positions,
            min_count,
            output,
        } => {
            let config = ScanConfig::default()
                .with_window(window)?
                .with_min_positions(min_positions)
                .with_min_count(min_count);
            let positions = read_candidates(&candidates, &region.chromosome)
                .with_context(|| format!("failed to read candidates from {}", candidates.display()))?;
            let mut handles = stores
                .iter()
                .map(|path| open_store(path))
                .collect::<Result<Vec<_>>>()?;
            let windows = scan::scan(&mut handles, &region, &positions, &config)
                .with_context(|| format!("scan of {} failed", region))?;
            let mut out = output_writer(output.as_deref())?;
            scan::write_windows(&mut out, &windows).context("failed to write windows")?;
            for mut handle in handles {
                handle.close()?;
            }
            Ok(())
        }
        Commands::Info { store } => run_info(&store),
    }
}

fn run_bootstrap(
    store: &Path,
    reference_path: &Path,
    low_read_count: u32,
    nonref_percent: u32,
    overwrite: bool,
) -> Result<()> {
    let reference = FaiReference::open(reference_path)
        .with_context(|| format!("failed to read reference {}", reference_path.display()))?;
    let parameters = StoreParameters::default()
        .with_low_read_count(low_read_count)?
        .with_nonref_percent(nonref_percent)?;
    pipeline::bootstrap(store, &reference, parameters, overwrite)
        .with_context(|| format!("failed to bootstrap {}", store.display()))?;
    println!("bootstrapped {}", store.display());
    Ok(())
}

fn run_info(path: &Path) -> Result<()> {
    let mut store = open_store(path)?;
    println!("## STORE={}", path.display());
    println!("## INFO=STORE_ID:{}", store.store_id()?);
    println!("## INFO=REFERENCE:{}", store.reference()?);
    let parameters = store.parameters()?;
    println!("## INFO=LOW_READ_COUNT:{}", parameters.low_read_count);
    println!("## INFO=NONREF_PERCENT:{}", parameters.nonref_percent);
    for (name, length) in store.chromosomes()? {
        println!("## CHROMOSOME={}:{}", name, length);
    }
    for line in store.provenance().header_lines() {
        println!("{}", line);
    }
    for record in store.provenance().records() {
        println!("## {}", record);
    }
    store.close()?;
    Ok(())
}

fn open_store(path: &Path) -> Result<PileupStore> {
    PileupStore::open(path, false).with_context(|| format!("failed to open store {}", path.display()))
}

fn output_writer(path: Option<&Path>) -> Result<Box<dyn Write>> {
    Ok(match path {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    })
}

fn print_summary(verb: &str, summary: &AccumulationSummary) {
    for source in &summary.sources {
        println!(
            "{} {}\trecords={}\tskipped={}\tmissing_md={}\tmalformed={}",
            verb, source.path, source.records, source.skipped, source.missing_md, source.malformed
        );
    }
    println!(
        "{} blocks written in {}",
        summary.blocks_written,
        pileup_store::ledger::format_runtime(summary.runtime.as_secs())
    );
}
