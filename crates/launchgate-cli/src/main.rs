use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;

#[derive(Parser)]
#[command(name = "launchgate", version, about = "Launchgate launch decision CLI")]
struct Cli {
    /// Log engine decisions to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one launch and print the routing decision
    Run(commands::run::RunArgs),
    /// Inspect persisted launch state
    Store {
        #[command(subcommand)]
        action: commands::store::StoreAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
    /// Print the stable device identifier
    DeviceId,
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("launchgate_core=debug")
        } else {
            EnvFilter::new("launchgate_core=info")
        }
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Run(args) => commands::run::run(args),
        Commands::Store { action } => commands::store::run(action),
        Commands::Config { action } => commands::config::run(action),
        Commands::DeviceId => commands::device_id::run(),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
