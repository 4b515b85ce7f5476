//! cubeview CLI
//!
//! Runs the tile server and manages its configuration.

mod commands;
mod error;
mod runner;

use clap::{Parser, Subcommand};

use commands::config::ConfigCommands;
use commands::serve::ServeArgs;

#[derive(Parser)]
#[command(name = "cubeview")]
#[command(version = cubeview::VERSION)]
#[command(about = "Tile server for image cube viewers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register images and serve tiles to viewer clients
    Serve(ServeArgs),

    /// Write the default configuration file (~/.cubeview/config.ini)
    Init {
        /// Overwrite an existing configuration file
        #[arg(long)]
        force: bool,
    },

    /// Configuration helpers
    #[command(subcommand)]
    Config(ConfigCommands),
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve(args) => commands::serve::run(args),
        Commands::Init { force } => commands::init::run(force),
        Commands::Config(command) => commands::config::run(command),
    };

    if let Err(e) = result {
        e.exit();
    }
}
