//! Vesta CLI - render documents with executable code.

mod colors;
mod config;
mod convert;
mod render;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "vesta")]
#[command(about = "Render documents that interleave prose and executable code")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute and render documents
    Render(render::RenderArgs),

    /// Convert between .qmd and .ipynb
    Convert {
        /// Path to the document (.qmd or .ipynb)
        input: String,

        /// Output path
        #[arg(short, long)]
        output: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    // Helper to format vesta-core errors with recovery hints
    let format_error = |err: anyhow::Error| -> anyhow::Error {
        if let Some(vesta_err) = err.downcast_ref::<vesta_core::Error>() {
            anyhow::anyhow!("{}", vesta_err.with_hint())
        } else {
            err
        }
    };

    match cli.command {
        Commands::Render(args) => {
            render::execute(&args).await.map_err(format_error)?;
        }

        Commands::Convert { input, output } => {
            convert::execute(&input, output.as_deref()).map_err(format_error)?;
        }
    }

    Ok(())
}
