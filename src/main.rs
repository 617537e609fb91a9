//! html-snapshots main entry point
//!
//! Command-line interface for capturing static HTML snapshots of
//! JavaScript-rendered pages.

use anyhow::Context;
use clap::Parser;
use html_snapshots::config::{load_config_with_hash, validate, Config, Source};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// html-snapshots: static HTML captures of JavaScript-rendered pages
///
/// Reads the pages to capture from an array, a text file, a robots.txt or a
/// sitemap, runs a renderer process per page with bounded concurrency, and
/// reports which output files were produced.
#[derive(Parser, Debug)]
#[command(name = "html-snapshots")]
#[command(version)]
#[command(about = "Capture static HTML snapshots of rendered pages", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show the resolved settings without capturing
    #[arg(long)]
    dry_run: bool,

    /// Remove the output directory before capturing
    #[arg(long)]
    clean: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (mut config, hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", hash);

    if cli.clean {
        config.output.clean = true;
    }

    if cli.dry_run {
        return handle_dry_run(&config);
    }

    match html_snapshots::run(config).await {
        Ok(result) => {
            print_partition(&result.completed, &[]);
            Ok(())
        }
        Err(e) => {
            print_partition(&e.completed, &e.not_completed);
            Err(e.into())
        }
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("html_snapshots=info,warn"),
            1 => EnvFilter::new("html_snapshots=debug,info"),
            2 => EnvFilter::new("html_snapshots=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: validates config and prints what would run
fn handle_dry_run(config: &Config) -> anyhow::Result<()> {
    validate(config).context("configuration is invalid")?;

    println!("=== html-snapshots Dry Run ===\n");

    println!("Input:");
    println!("  Kind: {}", config.input.kind);
    match &config.input.source {
        Source::One(location) => println!("  Source: {}", location),
        Source::Many(urls) => {
            println!("  Source ({} URLs):", urls.len());
            for url in urls {
                println!("    * {}", url);
            }
        }
    }
    let port = config
        .input
        .port
        .map(|p| format!(":{}", p))
        .unwrap_or_default();
    println!(
        "  Base URL: {}://{}{}/",
        config.input.protocol, config.input.hostname, port
    );
    println!("  Sitemap policy: {}", config.input.sitemap_policy);

    println!("\nOutput:");
    println!("  Directory: {}", config.output.dir);
    println!("  Clean first: {}", config.output.clean);
    println!("  Explicit paths: {}", config.output.paths.len());

    println!("\nCapture:");
    match config.capture.process_limit() {
        Some(n) => println!("  Process limit: {}", n),
        None => println!("  Process limit: unbounded"),
    }
    println!("  Poll interval: {}ms", config.capture.poll_interval);

    println!("\nRenderer:");
    println!("  Program: {}", config.renderer.program);
    if let Some(script) = &config.renderer.snapshot_script {
        println!("  Script: {}", script.display());
    }
    if !config.renderer.args.is_empty() {
        println!("  Extra args: {}", config.renderer.args.join(" "));
    }

    println!("\n✓ Configuration is valid");
    Ok(())
}

fn print_partition(completed: &[PathBuf], not_completed: &[PathBuf]) {
    println!("Completed ({}):", completed.len());
    for path in completed {
        println!("  {}", path.display());
    }
    if !not_completed.is_empty() {
        println!("Not completed ({}):", not_completed.len());
        for path in not_completed {
            println!("  {}", path.display());
        }
    }
}
