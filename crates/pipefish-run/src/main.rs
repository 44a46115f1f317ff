//! The `pipefish` binary: run a script's `main`, or start a REPL on it.
//!
//! Exit codes: 0 on success, 3 when the script fails to compile, 4 when a
//! script is run non-interactively but defines no `main` command.

use clap::Parser;
use colored::Colorize;
use pipefish_lang::Service;
use pipefish_vm::values;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, error};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "pipefish")]
#[command(about = "The Pipefish language")]
struct Cli {
    /// Path to a .pf script. Without --run, starts a REPL on it.
    script: Option<PathBuf>,

    /// Run the script's `main` command and exit.
    #[arg(long)]
    run: bool,

    /// Compile with tracking instrumentation.
    #[arg(long)]
    track: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pipefish=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let mut service = Service::new();
    service.tracking = cli.track;

    if let Some(script) = &cli.script {
        if let Err(e) = service.initialize_from_filepath(script) {
            error!("{}", e);
            return ExitCode::from(3);
        }
        if service.is_broken() {
            eprintln!("{}", service.format_errors());
            return ExitCode::from(3);
        }
        if cli.run {
            let result = service.call_main();
            if result.ty == values::UNDEFINED {
                eprintln!("{}", "the script has no 'main' command".red());
                return ExitCode::from(4);
            }
            if let Some(e) = result.as_error() {
                eprintln!("{}", format!("[{}] {}", e.error.id, e.error.message).red());
            }
            return ExitCode::SUCCESS;
        }
    }
    repl(service)
}

fn repl(mut service: Service) -> ExitCode {
    let mut editor = match DefaultEditor::new() {
        Ok(e) => e,
        Err(e) => {
            error!("can't start line editor: {}", e);
            return ExitCode::from(1);
        }
    };
    println!("Pipefish: type an expression, or ctrl-D to quit.");
    loop {
        if service.needs_update() {
            debug!("source changed, rebuilding");
            if service.rebuild().is_err() || service.is_broken() {
                eprintln!("{}", service.format_errors());
            }
        }
        match editor.readline("→ ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                editor.add_history_entry(line).ok();
                let value = service.do_line(line);
                if let Some(e) = value.as_error() {
                    eprintln!("{}", format!("[{}] {}", e.error.id, e.error.message).red());
                    eprintln!("{}", service.format_errors());
                    continue;
                }
                // A `post` already wrote through the output handler.
                if !service.vm.post_happened {
                    println!("{}", service.describe(&value));
                }
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                error!("readline: {}", e);
                break;
            }
        }
    }
    println!("Thank you for using Pipefish. Have a nice day!");
    ExitCode::SUCCESS
}
