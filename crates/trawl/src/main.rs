//! Trawl command line
//!
//! - `trawl scan`: run one crawl cycle
//! - `trawl watch`: crawl every poll interval until SIGINT/SIGTERM
//! - `trawl match`: try a template against paths
//! - `trawl history`: show the stored records of one path
//! - `trawl config init`: write a default config file

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;
use trawl::config::default_config_path;
use trawl::{CompiledRule, Crawler, CycleReport, JsonFileStore, RecordStore, TrawlConfig};
use trawl_logging::{init_logging, LogConfig};

#[derive(Parser, Debug)]
#[command(name = "trawl", about = "Periodic filesystem crawler with path-template rules")]
struct Cli {
    /// Enable verbose logging (info/debug to stderr)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Config file (default: $TRAWL_HOME/config.toml)
    #[arg(short, long, global = true, env = "TRAWL_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one crawl cycle and print the changes
    Scan {
        /// Print the full changelist as JSON
        #[arg(long)]
        json: bool,
    },
    /// Crawl every poll interval until interrupted
    Watch,
    /// Match paths against a template and print the captures
    Match {
        template: String,
        #[arg(required = true)]
        paths: Vec<String>,
        /// Let a trailing placeholder absorb nested directories
        #[arg(long)]
        allow_nested: bool,
    },
    /// Show every stored record of a path
    History {
        path: String,
        #[arg(long)]
        json: bool,
    },
    /// Manage the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the effective config
    Show,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let _log_guard = match init_logging(LogConfig {
        app_name: "trawl",
        verbose: cli.verbose,
    }) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("warning: logging unavailable: {:#}", e);
            None
        }
    };

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.unwrap_or_else(default_config_path);
    match cli.command {
        Commands::Scan { json } => cmd_scan(&config_path, json),
        Commands::Watch => cmd_watch(&config_path),
        Commands::Match {
            template,
            paths,
            allow_nested,
        } => cmd_match(&template, &paths, allow_nested),
        Commands::History { path, json } => cmd_history(&config_path, &path, json),
        Commands::Config { action } => match action {
            ConfigAction::Init { force } => cmd_config_init(&config_path, force),
            ConfigAction::Show => cmd_config_show(&config_path),
        },
    }
}

fn load_config(path: &Path) -> Result<TrawlConfig> {
    TrawlConfig::load(path).with_context(|| format!("Failed to load config {}", path.display()))
}

fn build_crawler(config_path: &Path) -> Result<Crawler> {
    let config = load_config(config_path)?;
    let store = JsonFileStore::open(&config.store_path)
        .with_context(|| format!("Failed to open record store {}", config.store_path.display()))?;
    Ok(Crawler::new(config, Arc::new(store))?)
}

fn cmd_scan(config_path: &Path, json: bool) -> Result<()> {
    let crawler = build_crawler(config_path)?;
    let report = crawler.run_cycle().context("Crawl cycle failed")?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report);
    }
    Ok(())
}

fn print_summary(report: &CycleReport) {
    println!("Scan {}", report.scan.scan_id);
    println!(
        "  {} created, {} modified, {} deleted, {} unchanged, {} skipped",
        report.changes.created(),
        report.changes.modified(),
        report.changes.deleted(),
        report.changes.unchanged,
        report.changes.skipped.len()
    );
    println!(
        "  {} items, {} results, {} probe errors in {} ms",
        report.stats.items_dispatched,
        report.stats.results_collected,
        report.stats.probe_errors,
        report.stats.duration_ms
    );
    for failure in &report.failed_roots {
        println!("  root {} failed: {}", failure.root, failure.message);
    }
    if !report.rules_dropped.is_empty() {
        println!("  malformed rules dropped: {:?}", report.rules_dropped);
    }
    for entry in &report.changes.entries {
        println!("  {:<8} {}", entry.action, entry.path);
    }
}

fn cmd_watch(config_path: &Path) -> Result<()> {
    let crawler = build_crawler(config_path)?;

    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let shutdown_flag_handler = shutdown_flag.clone();

    #[cfg(unix)]
    {
        use signal_hook::consts::{SIGINT, SIGTERM};
        use signal_hook::iterator::Signals;

        let mut signals = Signals::new([SIGINT, SIGTERM])?;
        std::thread::spawn(move || {
            if let Some(sig) = signals.forever().next() {
                info!("Received signal {}, finishing current cycle...", sig);
                shutdown_flag_handler.store(true, Ordering::SeqCst);
            }
        });
    }

    #[cfg(windows)]
    {
        ctrlc::set_handler(move || {
            info!("Received Ctrl+C, finishing current cycle...");
            shutdown_flag_handler.store(true, Ordering::SeqCst);
        })?;
    }

    crawler.run(&shutdown_flag);
    Ok(())
}

fn cmd_match(template: &str, paths: &[String], allow_nested: bool) -> Result<()> {
    let trailing = if allow_nested {
        trawl::TrailingPolicy::ToEnd
    } else {
        trawl::TrailingPolicy::StopAtSeparator
    };
    let rule = CompiledRule::compile(template, trailing)?;
    for path in paths {
        let result = rule.match_path(path);
        if result.full {
            let captures = result.captures(&rule);
            let rendered = captures
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join(" ");
            println!("{}: match {}", path, rendered);
        } else {
            let reason = result
                .failure
                .map(|f| f.to_string())
                .unwrap_or_else(|| "unconsumed trailing text".to_string());
            println!("{}: no match (stopped at {}: {})", path, result.cursor, reason);
        }
    }
    Ok(())
}

fn cmd_history(config_path: &Path, path: &str, json: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let store = JsonFileStore::open(&config.store_path)?;
    let records = store.history(path)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }
    if records.is_empty() {
        println!("No records for {}", path);
    }
    for record in records {
        let prev = record
            .prev_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "#{} {} {} (prev {}, scan {})",
            record.record_id,
            record.action_at.to_rfc3339(),
            record.action,
            prev,
            record.scan_id
        );
        for result in &record.results {
            println!("    [{}] {} = {}", result.rule_id, result.tag, result.value);
        }
    }
    Ok(())
}

fn cmd_config_init(config_path: &Path, force: bool) -> Result<()> {
    if config_path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }
    TrawlConfig::default()
        .save(config_path)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;
    println!("Wrote {}", config_path.display());
    Ok(())
}

fn cmd_config_show(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    print!(
        "{}",
        toml::to_string_pretty(&config).context("Failed to render config")?
    );
    Ok(())
}
