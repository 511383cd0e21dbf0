//! websift - static scanner for web application attack surface.
//!
//! CLI entry point.

use clap::Parser;
use std::fs;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use websift::config::PatternsConfig;
use websift::scanner::total_sensitive;
use websift::{Commands, Config, ScanConfig, Scanner, Settings};

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();

    // Set up logging
    let filter = if config.verbose {
        EnvFilter::new("websift=debug,info")
    } else {
        EnvFilter::new("websift=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match config.command.clone() {
        Commands::Scan(scan_config) => {
            if let Err(code) = run_scan(scan_config).await {
                return code;
            }
        }
        Commands::Patterns(patterns_config) => {
            if let Err(code) = run_patterns(patterns_config) {
                return code;
            }
        }
    }

    ExitCode::SUCCESS
}

async fn run_scan(scan_config: ScanConfig) -> Result<(), ExitCode> {
    let targets = match scan_config.load_targets() {
        Ok(t) => t,
        Err(e) => {
            error!("Failed to load targets: {}", e);
            return Err(ExitCode::FAILURE);
        }
    };

    if targets.is_empty() {
        error!("No targets specified. Use positional arguments or -f <file>.");
        return Err(ExitCode::FAILURE);
    }

    let json_mode = scan_config.json;
    let output_path = scan_config.output.clone();

    let scanner = match Scanner::new(scan_config) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to create scanner: {}", e);
            return Err(ExitCode::FAILURE);
        }
    };

    // Stop the crawl gracefully on ctrl-c: queues drain, in-flight workers
    // finish, and the final flush still runs.
    let running = scanner.running_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nSignal received, stopping after in-flight requests...");
            running.store(false, std::sync::atomic::Ordering::SeqCst);
        }
    });

    if !json_mode {
        print_banner();
    }

    let reports = scanner.scan_multiple(targets).await;

    if json_mode || output_path.is_some() {
        let json = serde_json::to_string_pretty(&reports).unwrap_or_default();
        if let Some(ref path) = output_path {
            if let Err(e) = fs::write(path, &json) {
                error!("Failed to write output file: {}", e);
                return Err(ExitCode::FAILURE);
            }
            info!("Results written to: {:?}", path);
        } else if json_mode {
            println!("{}", json);
        }
    }

    let sensitive = total_sensitive(&reports);
    if sensitive > 0 && !json_mode {
        eprintln!("\n{} sensitive artifacts found!", sensitive);
    }

    Ok(())
}

fn run_patterns(patterns_config: PatternsConfig) -> Result<(), ExitCode> {
    let settings = match Settings::load_or_default(patterns_config.settings.as_deref()) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to load settings: {}", e);
            return Err(ExitCode::FAILURE);
        }
    };

    let patterns = match websift::patterns::PatternSet::load(&settings) {
        Ok(p) => p,
        Err(e) => {
            error!("Failed to load patterns: {}", e);
            return Err(ExitCode::FAILURE);
        }
    };

    println!("{} patterns loaded:", patterns.len());
    for pattern in patterns.iter() {
        let marker = if pattern.is_custom { "custom" } else { "builtin" };
        println!(
            "  {:<24} [{}] -> {}  {}",
            pattern.key,
            marker,
            pattern.category,
            pattern.regex.as_str()
        );
    }

    Ok(())
}

fn print_banner() {
    println!();
    println!("\x1b[36m╔══════════════════════════════════════════════════════════════╗\x1b[0m");
    println!("\x1b[36m║                     WEBSIFT v0.1.0                           ║\x1b[0m");
    println!("\x1b[36m║        Web Application Source Scanner                        ║\x1b[0m");
    println!("\x1b[36m╚══════════════════════════════════════════════════════════════╝\x1b[0m");
    println!();
}
