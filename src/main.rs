//! Atlas Search CLI entry point.

use atlas::cli::commands;
use atlas::cli::commands::build::BuildArgs;
use atlas::cli::commands::serve::ServeArgs;
use atlas::cli::{Cli, Commands, OutputFormat};
use atlas::config::resolve_collection;
use atlas::error::Error;
use clap::Parser;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    // Set up tracing based on verbosity
    init_tracing(cli.verbose, cli.quiet);

    // Resolve effective JSON mode: --json OR --format json OR non-TTY stdout
    let json = cli.json
        || cli.format == OutputFormat::Json
        || !std::io::IsTerminal::is_terminal(&std::io::stdout());

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
            2 => EnvFilter::new("debug,rusqlite=info,reqwest=info,hyper_util=info"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn run(cli: &Cli, json: bool) -> Result<(), Error> {
    let db = cli.db.as_ref();
    let collection = || resolve_collection(cli.collection.as_deref());

    match &cli.command {
        Commands::Version => commands::version::execute(json),

        Commands::Build {
            atlas_dir,
            replace,
            extend,
            batch_size,
            source,
            skip_unchanged,
        } => {
            let args = BuildArgs {
                atlas_dir,
                replace: *replace,
                extend: *extend,
                batch_size: *batch_size,
                source: source.as_deref(),
                skip_unchanged: *skip_unchanged,
            };
            commands::build::execute(&args, db, &collection(), json)
        }

        Commands::Search { probe, top_k } => {
            commands::search::execute(probe, *top_k, db, &collection(), json)
        }
        Commands::SearchFile { path, top_k } => {
            commands::search::execute_file(path, *top_k, db, &collection(), json)
        }

        Commands::Status => commands::status::execute(db, &collection(), json),
        Commands::Drop { yes } => commands::drop::execute(db, &collection(), *yes, json),

        Commands::Serve { addr, workers, no_warmup } => {
            let args = ServeArgs {
                addr,
                workers: *workers,
                warmup: !*no_warmup,
            };
            commands::serve::execute(&args, db, &collection(), json)
        }

        Commands::Embeddings { command } => commands::embeddings::execute(command.clone(), json),

        // Shell completions
        Commands::Completions { shell } => commands::completions::execute(shell),
    }
}
