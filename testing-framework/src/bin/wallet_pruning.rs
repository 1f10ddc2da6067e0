// File: testing-framework/src/bin/wallet_pruning.rs
//
// Command-line entry point: run the wallet pruning scenario once, against a
// real node binary or the in-process mock network.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use fern::colors::{Color, ColoredLevelConfig};
use log::{error, info, LevelFilter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use wallet_pruning_harness::node::{MockNetwork, NodeLauncher, ProcessLauncher};
use wallet_pruning_harness::{HarnessConfig, HarnessContext, ScenarioRunner, VirtualClock};

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::Off,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

/// Wallet import against a pruned node
#[derive(Parser, Clone, Debug)]
#[command(name = "wallet-pruning")]
#[command(about = "Checks wallet import behavior on a node that pruned its block history")]
#[command(version = wallet_pruning_harness::VERSION)]
struct Cli {
    /// YAML configuration file; defaults apply when absent
    #[clap(short, long)]
    config: Option<PathBuf>,
    /// Write the default configuration to --config and exit
    #[clap(long)]
    generate_config_template: bool,
    /// Node executable, overrides the configuration
    #[clap(long)]
    node_binary: Option<PathBuf>,
    /// Use the in-process mock network instead of node processes
    #[clap(long)]
    mock: bool,
    /// Keep node data directories after the run
    #[clap(long)]
    keep_datadirs: bool,
    /// Parent directory for node data
    #[clap(long)]
    datadir_root: Option<PathBuf>,
    /// Where the JSON report is written, overrides the configuration
    #[clap(long)]
    report_dir: Option<PathBuf>,
    /// Set log level
    #[clap(long, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,
    /// Disable the usage of colors in log
    #[clap(long)]
    disable_log_color: bool,
}

impl Cli {
    fn load_config(&self) -> Result<HarnessConfig> {
        let mut config = match &self.config {
            Some(path) => HarnessConfig::from_file(path)
                .with_context(|| format!("loading configuration from {}", path.display()))?,
            None => HarnessConfig::default(),
        };

        if let Some(binary) = &self.node_binary {
            config.process.node_binary = binary.clone();
        }
        if self.keep_datadirs {
            config.keep_datadirs = true;
        }
        if let Some(root) = &self.datadir_root {
            config.datadir_root = Some(root.clone());
        }
        if let Some(dir) = &self.report_dir {
            config.report_dir = dir.clone();
        }
        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

fn setup_logging(level: LevelFilter, disable_colors: bool) -> Result<()> {
    let colors = ColoredLevelConfig::new()
        .error(Color::Red)
        .warn(Color::Yellow)
        .info(Color::Green)
        .debug(Color::Cyan)
        .trace(Color::BrightBlack);

    fern::Dispatch::new()
        .format(move |out, message, record| {
            let timestamp = chrono::Local::now().format("%H:%M:%S%.3f");
            if disable_colors {
                out.finish(format_args!(
                    "[{}] [{}] [{}] {}",
                    timestamp,
                    record.level(),
                    record.target(),
                    message
                ))
            } else {
                out.finish(format_args!(
                    "[{}] [{}] [{}] {}",
                    timestamp,
                    colors.color(record.level()),
                    record.target(),
                    message
                ))
            }
        })
        .level(level)
        .level_for("reqwest", LevelFilter::Warn)
        .level_for("hyper", LevelFilter::Warn)
        .chain(std::io::stderr())
        .apply()
        .context("failed to initialize logging")
}

fn generate_template(path: &Path) -> Result<()> {
    if path.exists() {
        eprintln!("Config file already exists at {}", path.display());
        eprintln!("Use a different path or remove the existing file");
        return Ok(());
    }
    let yaml = HarnessConfig::default().to_yaml()?;
    std::fs::write(path, yaml)
        .with_context(|| format!("writing template to {}", path.display()))?;
    println!("Configuration template generated at {}", path.display());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.generate_config_template {
        let path = cli
            .config
            .as_deref()
            .context("--generate-config-template needs --config <PATH>")?;
        return generate_template(path);
    }

    setup_logging(cli.log_level.into(), cli.disable_log_color)?;
    let config = cli.load_config()?;

    if log::log_enabled!(log::Level::Info) {
        info!(
            "Wallet pruning harness v{} starting ({})",
            wallet_pruning_harness::VERSION,
            if cli.mock {
                "mock network".to_string()
            } else {
                format!("node binary {}", config.process.node_binary.display())
            }
        );
    }

    let launcher: Arc<dyn NodeLauncher> = if cli.mock {
        MockNetwork::new(config.mock.clone())
    } else {
        Arc::new(ProcessLauncher::new(config.process_launcher()))
    };

    let clock = Arc::new(VirtualClock::new(config.chain.start_time));
    let topology = config
        .topology_builder(launcher, clock.clone())
        .build()
        .context("failed to set up node topology")?;
    info!("Node data under {}", topology.data_root().display());

    let ctx = HarnessContext::new(config.scenario(), topology, config.chain_builder(clock));
    let mut runner = ScenarioRunner::new(ctx);
    let result = runner.run().await;

    let report_path = runner
        .report()
        .save(&config.report_dir)
        .await
        .with_context(|| format!("saving report to {}", config.report_dir.display()))?;
    info!("Report written to {}", report_path.display());

    match result {
        Ok(()) => {
            info!("Scenario finished in state {}", runner.context().state());
            Ok(())
        }
        Err(e) => {
            let report = runner.report();
            let attempted = report
                .failure
                .as_ref()
                .and_then(|f| f.attempted)
                .map(|s| s.to_string())
                .unwrap_or_else(|| "shutdown".to_string());
            error!(
                "Scenario failed after {} while working toward {}",
                report.final_state, attempted
            );
            Err(anyhow::Error::new(e).context(format!("scenario failed in state {attempted}")))
        }
    }
}
