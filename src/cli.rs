//! Command-line interface for the rebalancing simulator.

use rebalancer::analytics::ResultFormatter;
use rebalancer::config::FileConfig;
use rebalancer::engine::Simulator;
use rebalancer::error::Result;
use rebalancer::export::export_all;
use rebalancer::schedule::RebalanceSchedule;

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Rebalancer - compare periodic rebalancing against buy-and-hold.
#[derive(Parser)]
#[command(name = "rebalancer")]
#[command(version)]
#[command(about = "Simulate periodically rebalanced portfolios against buy-and-hold")]
#[command(long_about = None)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text", global = true)]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Simulate every portfolio of a configuration file
    Run {
        /// Path to the TOML configuration
        #[arg(short, long)]
        config: PathBuf,

        /// Write per-portfolio CSVs and a JSON report into this directory
        #[arg(long)]
        export_dir: Option<PathBuf>,
    },

    /// Write an example configuration file
    Init {
        /// Output path
        #[arg(short = 'f', long = "file", default_value = "rebalancer.toml")]
        file: PathBuf,
    },

    /// Print the rebalance dates a configuration produces
    Schedule {
        /// Path to the TOML configuration
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

impl Cli {
    /// Initialize logging based on verbosity level.
    pub fn init_logging(&self) {
        let level = match self.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        };

        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(false)
            .finish();

        if tracing::subscriber::set_global_default(subscriber).is_err() {
            eprintln!("tracing subscriber already set");
        }
    }
}

/// Run the CLI application.
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    cli.init_logging();

    match &cli.command {
        Commands::Run { config, export_dir } => {
            run_simulation(config, export_dir.as_deref(), cli.output)
        }
        Commands::Init { file } => init_config(file),
        Commands::Schedule { config } => print_schedule(config, cli.output),
    }
}

fn init_config(output: &Path) -> Result<()> {
    fs::write(output, FileConfig::example())?;
    println!("Created example configuration file: {}", output.display());
    println!("\nPoint [data] dir at your price CSVs, then run:");
    println!("  rebalancer run -c {}", output.display());
    Ok(())
}

fn run_simulation(
    config_path: &Path,
    export_dir: Option<&Path>,
    output: OutputFormat,
) -> Result<()> {
    let file_config = FileConfig::load(config_path)?;
    let store = file_config.load_prices()?;
    let specs = file_config.portfolio_specs();

    let simulator = Simulator::new(file_config.simulation_config());
    let report = simulator.run(&store, &specs)?;
    info!(
        "{} portfolios simulated, {} failed",
        report.successes().count(),
        report.failures().count()
    );

    match output {
        OutputFormat::Text => {
            for result in report.successes() {
                ResultFormatter::print_report(result);
            }
            println!();
            ResultFormatter::print_table(&report);
        }
        OutputFormat::Json => println!("{}", ResultFormatter::to_json(&report)),
    }

    if let Some(dir) = export_dir {
        let written = export_all(&report, dir)?;
        if output == OutputFormat::Text {
            println!("\nExported {} files to {}", written.len(), dir.display());
        }
    }

    Ok(())
}

fn print_schedule(config_path: &Path, output: OutputFormat) -> Result<()> {
    let file_config = FileConfig::load(config_path)?;
    let store = file_config.load_prices()?;
    let specs = file_config.portfolio_specs();

    let sim_config = file_config.simulation_config();
    sim_config.validate()?;
    let simulator = Simulator::new(sim_config);
    let (reference, dates) = simulator.date_axis(&store, &specs)?;
    let schedule = RebalanceSchedule::build(&dates, simulator.config().rebalance_months);

    match output {
        OutputFormat::Text => {
            println!(
                "Reference {}: {} trading days, {} to {}",
                reference,
                dates.len(),
                dates[0],
                dates[dates.len() - 1]
            );
            println!(
                "Rebalancing every {} months: {} events",
                simulator.config().rebalance_months,
                schedule.len()
            );
            for date in schedule.dates() {
                println!("  {}", date);
            }
        }
        OutputFormat::Json => println!(
            "{}",
            serde_json::json!({
                "reference": reference,
                "start_date": dates.first(),
                "end_date": dates.last(),
                "rebalance_months": simulator.config().rebalance_months,
                "rebalance_dates": schedule.dates(),
            })
        ),
    }
    Ok(())
}
