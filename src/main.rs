//! Pricewatch CLI entry point.

use clap::Parser;
use pricewatch::cli::commands;
use pricewatch::cli::{Cli, Commands};
use pricewatch::error::Error;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up tracing based on verbosity
    init_tracing(cli.verbose, cli.quiet);

    // Resolve effective JSON mode: --json OR non-TTY stdout
    let json = cli.json || !std::io::IsTerminal::is_terminal(&std::io::stdout());

    match run(&cli, json) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if json {
                eprintln!("{}", e.to_structured_json());
            } else if !cli.quiet {
                if let Some(hint) = e.hint() {
                    eprintln!("Error: {e}\n  Hint: {hint}");
                } else {
                    eprintln!("Error: {e}");
                }
            }
            ExitCode::from(e.exit_code())
        }
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    use tracing_subscriber::EnvFilter;

    if quiet {
        return;
    }

    // Honor RUST_LOG if set, otherwise use verbosity flag
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match verbose {
            0 => EnvFilter::new("warn"),
            1 => EnvFilter::new("info"),
            2 => EnvFilter::new("debug,rusqlite=info"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: &Cli, json: bool) -> Result<(), Error> {
    let db = cli.db.as_ref();

    match &cli.command {
        Commands::Init { force } => commands::init::execute(db, *force, json),
        Commands::Version => commands::version::execute(json),

        Commands::User { command } => commands::user::execute(command, db, json),
        Commands::Track { command } => commands::track::execute(command, db, json),
        Commands::Zip { command } => commands::zip::execute(command, db, json),
        Commands::Store { command } => commands::store::execute(command, db, json),
        Commands::Alerts { discord_id, limit } => {
            commands::stats::execute_alerts(discord_id, *limit, db, json)
        }

        // Checking
        Commands::Check => commands::check::execute_check(db, cli.config.as_ref(), json),
        Commands::Run => commands::check::execute_run(db, cli.config.as_ref(), json),
        Commands::Stats => commands::stats::execute(db, json),

        Commands::Completions { shell } => commands::completions::execute(shell),
    }
}
