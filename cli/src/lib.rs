//! gfcat CLI (made by FontLab https://www.fontlab.com/)

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueHint};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use gfcat_core::catalog::{CatalogDocument, License};
use gfcat_core::config::{Endpoints, PipelineConfig};
use gfcat_core::output::{write_catalog, write_items_ndjson, Profile};
use gfcat_core::pipeline::Pipeline;
use gfcat_core::validate::{ValidationConfig, ValidationReport, Validator};

pub mod server;

/// CLI entrypoint for gfcat.
#[derive(Debug, Parser)]
#[command(
    name = "gfcat",
    version,
    about = "Google Fonts catalog builder (made by FontLab https://www.fontlab.com/)"
)]
pub struct Cli {
    /// Raise log verbosity (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Build a catalog from the upstream sources, validate it, and write it
    Build(BuildArgs),
    /// Validate an existing catalog file
    Validate(ValidateArgs),
    /// Serve catalog validation over HTTP
    Serve(ServeArgs),
}

#[derive(Debug, Args)]
struct BuildArgs {
    /// Destination file; stdout when omitted
    #[arg(short = 'o', long = "output", value_hint = ValueHint::FilePath)]
    output: Option<PathBuf>,

    /// JSON configuration file
    #[arg(short = 'c', long = "config", value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Stop after this many families (bounded test runs)
    #[arg(long = "max-families")]
    max_families: Option<usize>,

    /// Concurrent family workers
    #[arg(short = 'j', long = "workers")]
    workers: Option<usize>,

    /// Abort unfinished work after this many seconds
    #[arg(long = "deadline-secs")]
    deadline_secs: Option<u64>,

    /// License buckets to list, in order (ofl, apache, ufl)
    #[arg(short = 'l', long = "licenses", value_delimiter = ',')]
    licenses: Vec<String>,

    /// Point every upstream at one base URL (mirrors, local mocks)
    #[arg(long = "endpoint-base", value_hint = ValueHint::Url)]
    endpoint_base: Option<String>,

    /// GitHub API token
    #[arg(long = "github-token", env = "GITHUB_TOKEN", hide_env_values = true)]
    github_token: Option<String>,

    /// Omit files, axes and subsets from each item
    #[arg(long = "minimal", action = ArgAction::SetTrue)]
    minimal: bool,

    /// Write items as newline-delimited JSON instead of one document
    #[arg(long = "ndjson", action = ArgAction::SetTrue)]
    ndjson: bool,

    /// Treat quality warnings as errors
    #[arg(long = "strict", action = ArgAction::SetTrue)]
    strict: bool,
}

#[derive(Debug, Args)]
struct ValidateArgs {
    /// Catalog document to check
    #[arg(value_hint = ValueHint::FilePath)]
    catalog: PathBuf,

    /// Treat quality warnings as errors
    #[arg(long = "strict", action = ArgAction::SetTrue)]
    strict: bool,

    /// JSON configuration file (its `validation` section is used)
    #[arg(short = 'c', long = "config", value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    #[arg(long = "min-families")]
    min_families: Option<usize>,

    #[arg(long = "min-variants")]
    min_variants: Option<usize>,

    /// Print the report as JSON on stdout
    #[arg(long = "json", action = ArgAction::SetTrue)]
    json: bool,
}

#[derive(Debug, Args)]
struct ServeArgs {
    /// Address to bind
    #[arg(long = "bind", default_value = "127.0.0.1:8787")]
    bind: String,

    /// JSON configuration file (its `validation` section is used)
    #[arg(short = 'c', long = "config", value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,
}

/// Parse CLI args, execute the selected command, and return the process exit code.
pub fn run() -> Result<i32> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting async runtime")?;

    match cli.command {
        Command::Build(args) => runtime.block_on(run_build(args)),
        Command::Validate(args) => run_validate(args),
        Command::Serve(args) => {
            let config = load_config(args.config.as_deref())?;
            runtime.block_on(server::serve(&args.bind, config.validation))?;
            Ok(0)
        }
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    // A subscriber may already be installed when embedded in tests.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::load(path),
        None => Ok(PipelineConfig::default()),
    }
}

/// File config first, then flags on top.
fn build_config(args: &BuildArgs) -> Result<PipelineConfig> {
    let mut config = load_config(args.config.as_deref())?;

    if let Some(max) = args.max_families {
        config.max_families = Some(max);
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if let Some(secs) = args.deadline_secs {
        config.deadline_ms = Some(secs.saturating_mul(1_000));
    }
    if !args.licenses.is_empty() {
        config.licenses = args
            .licenses
            .iter()
            .map(|raw| raw.parse::<License>())
            .collect::<Result<_>>()?;
    }
    if let Some(base) = &args.endpoint_base {
        config.endpoints = Endpoints {
            repository: config.endpoints.repository.clone(),
            branch: config.endpoints.branch.clone(),
            ..Endpoints::all_at(base)
        };
    }
    if args.github_token.is_some() {
        config.github_token = args.github_token.clone();
    }

    config.check()?;
    Ok(config)
}

async fn run_build(args: BuildArgs) -> Result<i32> {
    let config = build_config(&args)?;
    let pipeline = Pipeline::from_config(config.clone())?;
    let doc = pipeline.run().await;

    let report = Validator::new(config.validation.clone()).validate(&doc, args.strict);
    eprint!("{}", report.render());

    if doc.meta.run_status.is_fatal() {
        error!(status = ?doc.meta.run_status, "run ended fatally; catalog not written");
        return Ok(1);
    }
    if !report.is_publishable() {
        error!("validation failed; catalog not written");
        return Ok(report.verdict.exit_code());
    }

    let profile = if args.minimal {
        Profile::Minimal
    } else {
        Profile::Full
    };
    publish(&doc, args.output.as_deref(), profile, args.ndjson)?;
    info!(families = doc.meta.total_families, "catalog written");
    Ok(0)
}

/// Write the document; a file target is replaced only once fully written.
fn publish(doc: &CatalogDocument, output: Option<&Path>, profile: Profile, ndjson: bool) -> Result<()> {
    let write = |w: &mut dyn Write| -> Result<()> {
        if ndjson {
            write_items_ndjson(doc, profile, &mut *w)
        } else {
            write_catalog(doc, profile, &mut *w)
        }
    };

    match output {
        None => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            write(&mut handle)?;
            handle.flush()?;
        }
        Some(path) => {
            let staging = staging_path(path);
            let staged = File::create(&staging)
                .with_context(|| format!("creating {}", staging.display()))
                .and_then(|file| {
                    let mut writer = BufWriter::new(file);
                    write(&mut writer)?;
                    writer.flush()?;
                    Ok(())
                })
                .and_then(|()| {
                    fs::rename(&staging, path).with_context(|| {
                        format!("moving catalog into place at {}", path.display())
                    })
                });
            if let Err(err) = staged {
                let _ = fs::remove_file(&staging);
                return Err(err);
            }
        }
    }
    Ok(())
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "catalog.json".into());
    name.push(".partial");
    path.with_file_name(name)
}

fn validation_config(args: &ValidateArgs) -> Result<ValidationConfig> {
    let mut validation = load_config(args.config.as_deref())?.validation;
    if let Some(min) = args.min_families {
        validation.min_families = min;
    }
    if let Some(min) = args.min_variants {
        validation.min_variants = min;
    }
    Ok(validation)
}

fn validate_file(path: &Path, validator: &Validator, strict: bool) -> Result<ValidationReport> {
    let text =
        fs::read_to_string(path).with_context(|| format!("reading catalog {}", path.display()))?;
    let doc: CatalogDocument = serde_json::from_str(&text)
        .with_context(|| format!("parsing catalog {}", path.display()))?;
    Ok(validator.validate(&doc, strict))
}

fn run_validate(args: ValidateArgs) -> Result<i32> {
    let validator = Validator::new(validation_config(&args)?);
    let report = validate_file(&args.catalog, &validator, args.strict)?;

    if args.json {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        serde_json::to_writer_pretty(&mut handle, &report)?;
        writeln!(handle)?;
    } else {
        eprint!("{}", report.render());
    }
    Ok(report.verdict.exit_code())
}

#[cfg(test)]
mod tests;
