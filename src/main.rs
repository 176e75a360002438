use anyhow::{bail, Context, Result};
use bytegram::index::build::{build_index_with_options, BuildOptions};
use bytegram::index::catalog::Catalog;
use bytegram::index::stats::collect_stats;
use bytegram::index::types::{IndexPaths, NgramLength};
use bytegram::query::QueryEngine;
use bytegram::utils::AppConfig;
use clap::{Parser, Subcommand};
use std::io::{self, BufRead, BufWriter, IsTerminal, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

const GIB: u64 = 1024 * 1024 * 1024;

#[derive(Parser)]
#[command(name = "bytegram")]
#[command(about = "Byte n-gram index for fast \"which files contain these bytes\" search")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log at debug level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (defaults to config.json in the app data directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Add files to an index, creating it if needed
    Index {
        /// Index base name
        #[arg(short = 'f', long = "file")]
        base: PathBuf,

        /// N-gram length in bytes (3 or 4)
        #[arg(short = 'n', long, value_parser = clap::value_parser!(u8).range(3..=4))]
        ngram: Option<u8>,

        /// Buffered postings, in GiB, before a shard is flushed
        #[arg(short = 'b', long, value_parser = clap::value_parser!(u64).range(1..))]
        buffer: Option<u64>,

        /// Files per shard before it is flushed (0 = unlimited)
        #[arg(short = 'm', long)]
        max_files: Option<u32>,

        /// Worker threads (0 = one per CPU)
        #[arg(short = 't', long)]
        threads: Option<usize>,

        /// Record paths as given instead of file names
        #[arg(long)]
        full_paths: bool,

        /// Hide the progress bar
        #[arg(short, long)]
        quiet: bool,

        /// Files or directories to index; read from stdin, one per line, if omitted
        paths: Vec<PathBuf>,
    },
    /// List files containing every n-gram of a query
    Search {
        /// Index base name
        #[arg(short = 'f', long = "file")]
        base: PathBuf,

        /// N-gram length in bytes (defaults to the index's own)
        #[arg(short = 'n', long, value_parser = clap::value_parser!(u8).range(3..=4))]
        ngram: Option<u8>,

        /// Worker threads (0 = one per CPU)
        #[arg(short = 't', long)]
        threads: Option<usize>,

        /// Print results as a JSON array
        #[arg(long)]
        json: bool,

        /// Byte string to search for; read from stdin if omitted
        query: Option<String>,
    },
    /// Show index statistics
    Stats {
        /// Index base name
        #[arg(short = 'f', long = "file")]
        base: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .init();
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };

    match cli.command {
        Commands::Index {
            base,
            ngram,
            buffer,
            max_files,
            threads,
            full_paths,
            quiet,
            paths,
        } => {
            let paths = if paths.is_empty() {
                read_stdin_paths()?
            } else {
                paths
            };
            if paths.is_empty() {
                bail!("no input files given");
            }

            let mut index_config = config.index_config();
            index_config.ngram_length = match ngram {
                Some(n) => NgramLength::new(n as u64)?,
                None => existing_ngram_length(&base)?.unwrap_or(config.ngram_length),
            };
            if let Some(gib) = buffer {
                index_config.max_buffer_bytes = gib.saturating_mul(GIB);
            }
            if let Some(max) = max_files {
                index_config.max_files_per_shard = max;
            }

            let options = BuildOptions {
                config: index_config,
                threads: threads.unwrap_or(config.threads),
                store_basename: config.store_basename && !full_paths,
                show_progress: !quiet && io::stderr().is_terminal(),
            };

            let summary = build_index_with_options(&base, &paths, &options)
                .with_context(|| format!("Failed to index into {}", base.display()))?;

            eprintln!(
                "Indexed {} files into {} new shard(s); index now holds {} files",
                summary.files_indexed, summary.shards_written, summary.total_files
            );
            if !summary.files_failed.is_empty() {
                eprintln!("({} files could not be read)", summary.files_failed.len());
            }
        }
        Commands::Search {
            base,
            ngram,
            threads,
            json,
            query,
        } => {
            let query = match query {
                Some(q) => q,
                None => read_stdin_query()?,
            };

            let ngram_length = match ngram {
                Some(n) => NgramLength::new(n as u64)?,
                None => existing_ngram_length(&base)?
                    .with_context(|| format!("No index found at {}", base.display()))?,
            };

            let engine = QueryEngine::open(&base, ngram_length)
                .with_context(|| format!("Failed to open index {}", base.display()))?;
            let ngrams = engine.ngrams_of(query.as_bytes())?;
            let matches = engine.search(&ngrams, threads.unwrap_or(config.threads))?;

            if json {
                let names: Vec<_> = matches.iter().map(|p| p.to_string_lossy()).collect();
                println!("{}", serde_json::to_string_pretty(&names)?);
            } else {
                // Raw bytes, so names that are not UTF-8 survive the round trip
                let mut out = BufWriter::new(io::stdout().lock());
                for name in &matches {
                    out.write_all(name.as_os_str().as_encoded_bytes())?;
                    out.write_all(b"\n")?;
                }
                out.flush()?;
            }

            if matches.is_empty() {
                return Ok(ExitCode::from(1));
            }
        }
        Commands::Stats { base } => {
            let stats = collect_stats(&base)
                .with_context(|| format!("Failed to read index {}", base.display()))?;
            println!("{}", stats);
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// N-gram length recorded by an existing index, if there is one
fn existing_ngram_length(base: &Path) -> Result<Option<NgramLength>> {
    let catalog = IndexPaths::new(base).catalog();
    if !catalog.exists() {
        return Ok(None);
    }
    let header = Catalog::read_header(&catalog)?;
    Ok(Some(NgramLength::try_from(header.ngram_length)?))
}

fn read_stdin_paths() -> Result<Vec<PathBuf>> {
    let stdin = io::stdin();
    let mut paths = Vec::new();
    for line in stdin.lock().lines() {
        let line = line.context("Failed to read file list from stdin")?;
        let line = line.trim_end_matches('\r');
        if !line.is_empty() {
            paths.push(PathBuf::from(line));
        }
    }
    Ok(paths)
}

fn read_stdin_query() -> Result<String> {
    let mut query = String::new();
    io::stdin()
        .read_to_string(&mut query)
        .context("Failed to read query from stdin")?;
    Ok(query.trim_end_matches(['\n', '\r']).to_string())
}
