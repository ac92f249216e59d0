//! Vesta kernel process.
//!
//! Speaks the length-prefixed rkyv protocol on stdin/stdout; logs go to
//! stderr so they never corrupt the message stream.

mod runner;

use std::io::{BufReader, BufWriter};
use std::path::Path;

use clap::Parser;
use vesta_jupyter::kernel::{KernelCommand, KernelResponse, read_message, write_message};

#[derive(Parser)]
#[command(name = "vesta-kernel")]
#[command(about = "Notebook kernel process for Vesta")]
#[command(version)]
struct Args {
    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

fn handle(command: KernelCommand) -> KernelResponse {
    match command {
        KernelCommand::Ping => KernelResponse::Pong,
        KernelCommand::Execute {
            notebook_path,
            cwd,
            allow_errors,
        } => match runner::execute_notebook(Path::new(&notebook_path), Path::new(&cwd), allow_errors) {
            Ok(cells) => {
                tracing::info!("Executed {} ({} cells)", notebook_path, cells);
                KernelResponse::Executed { cells }
            }
            Err(e) => KernelResponse::Error {
                message: format!("{:#}", e),
            },
        },
        KernelCommand::Shutdown => KernelResponse::ShuttingDown,
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let mut reader = BufReader::new(stdin.lock());
    let mut writer = BufWriter::new(stdout.lock());

    loop {
        let command: KernelCommand = match read_message(&mut reader) {
            Ok(command) => command,
            Err(e) => {
                // The renderer went away.
                tracing::debug!("Input closed: {}", e);
                break;
            }
        };

        let shutdown = command == KernelCommand::Shutdown;
        write_message(&mut writer, &handle(command))?;
        if shutdown {
            break;
        }
    }

    Ok(())
}
