pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use lapsel_core::domain::processing_unit::PuType;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "lapsel",
    about = "Lapsel catalog operator CLI",
    long_about = "Load category rules and laptop catalogs, rebuild cached scores, apply migrations, and inspect configuration.",
    after_help = "Examples:\n  lapsel migrate\n  lapsel load-rules categories.json\n  lapsel load-laptops laptops.json\n  lapsel recompute --pu-type gpu"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Replace the category rule sets and rebuild every cached score")]
    LoadRules {
        #[arg(help = "Path to the categories JSON file")]
        path: PathBuf,
    },
    #[command(about = "Ingest a scraped laptop file and refresh the affected cached scores")]
    LoadLaptops {
        #[arg(help = "Path to the laptops JSON file")]
        path: PathBuf,
    },
    #[command(about = "Re-derive category weights and rebuild cached scores from scratch")]
    Recompute {
        #[arg(long, value_parser = parse_pu_type, help = "Limit the rebuild to `cpu` or `gpu`")]
        pu_type: Option<PuType>,
    },
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
}

fn parse_pu_type(raw: &str) -> Result<PuType, String> {
    raw.parse::<PuType>().map_err(|error| error.to_string())
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::LoadRules { path } => commands::load_rules::run(&path),
        Command::LoadLaptops { path } => commands::load_laptops::run(&path),
        Command::Recompute { pu_type } => commands::recompute::run(pu_type),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
