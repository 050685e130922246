//! Scriptbox command-line tool
//!
//! Compiles `.sbs` sources into module images, runs them through the
//! security gate, prints their reflected shape and calls into them.

mod commands;
mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "scriptbox")]
#[command(about = "Compile, verify, inspect and run Scriptbox modules", long_about = None)]
#[command(version)]
struct Cli {
    /// Engine settings file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Color output: auto, always, never
    #[arg(long, global = true)]
    color: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile and verify sources without writing output
    Check {
        /// Files or directories to check
        #[arg(default_value = ".")]
        paths: Vec<PathBuf>,
        /// Skip the security gate
        #[arg(long)]
        no_verify: bool,
    },

    /// Compile sources to a module image (.sbx)
    Build {
        /// Files or directories to build
        #[arg(default_value = ".")]
        paths: Vec<PathBuf>,
        /// Output directory
        #[arg(short, long, default_value = "dist")]
        out_dir: PathBuf,
        /// Output file name (without extension)
        #[arg(short, long)]
        name: Option<String>,
        /// Emit a debug-symbol sidecar (.sbsym)
        #[arg(long)]
        symbols: bool,
        /// Skip the security gate
        #[arg(long)]
        no_verify: bool,
    },

    /// Print the types and members of sources or a compiled image
    Inspect {
        /// Source file, source directory or .sbx image
        path: PathBuf,
        /// Also list each method's instructions
        #[arg(long)]
        code: bool,
    },

    /// Load a module and call a static method
    Run {
        /// Source file, source directory or .sbx image
        path: PathBuf,
        /// Entry point as `Type.method`; defaults to `main` on the main type
        #[arg(short, long)]
        entry: Option<String>,
        /// Host ticks allowed for sequences started by the entry point
        #[arg(long, default_value_t = 1000)]
        max_ticks: usize,
        /// Skip the security gate
        #[arg(long)]
        no_verify: bool,
        /// Arguments passed to the entry point
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,
    },

    /// Print the effective engine settings as TOML
    Config,
}

fn init_logging(level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| level.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .without_time()
                .with_writer(std::io::stderr),
        )
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let settings = commands::load_settings(cli.config.as_deref())?;
    let color = output::resolve_color_choice(cli.color.as_deref());

    match cli.command {
        Commands::Check { paths, no_verify } => {
            commands::check::execute(settings, &paths, no_verify, color)
        }
        Commands::Build {
            paths,
            out_dir,
            name,
            symbols,
            no_verify,
        } => commands::build::execute(
            settings,
            commands::build::BuildArgs {
                paths,
                out_dir,
                name,
                symbols,
                no_verify,
            },
            color,
        ),
        Commands::Inspect { path, code } => commands::inspect::execute(settings, &path, code, color),
        Commands::Run {
            path,
            entry,
            max_ticks,
            no_verify,
            args,
        } => commands::run::execute(
            settings,
            commands::run::RunArgs {
                path,
                entry,
                args,
                max_ticks,
                no_verify,
            },
            color,
        ),
        Commands::Config => {
            print!("{}", settings.to_toml_string()?);
            Ok(())
        }
    }
}
