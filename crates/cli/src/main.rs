mod cmd;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use bob_lib::platform::{Arch, Platform};

use crate::cmd::{BuildArgs, cmd_build, cmd_clean, cmd_info};
use crate::output::{OutputFormat, print_error};

/// bob - build C/C++ modules from declarative descriptors
#[derive(Parser)]
#[command(name = "bob", author, version, about, long_about = None)]
struct Cli {
  /// Enable debug logging
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Emit log records as JSON
  #[arg(long, global = true)]
  json: bool,

  /// Include source file and line in log records
  #[arg(long, global = true)]
  traces: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Build a target of the current module
  Build {
    /// Target to build
    target: String,

    /// Drop cached artifact content and fetch everything again
    #[arg(long)]
    clean: bool,

    /// Path to bob.toml or its directory (default: search upward from the working directory)
    #[arg(long = "mod", value_name = "PATH")]
    module: Option<PathBuf>,

    /// Build for this platform instead of the host's
    #[arg(long)]
    platform: Option<Platform>,

    /// Build for this architecture instead of the host's
    #[arg(long)]
    arch: Option<Arch>,

    /// Output directory (default: <module dir>/build)
    #[arg(long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Cache root (default: $BOB_CACHE, then the user cache directory)
    #[arg(long, value_name = "DIR")]
    cache: Option<PathBuf>,

    /// Replace mismatching bob.sum entries instead of failing
    #[arg(long)]
    repin: bool,

    /// Maximum concurrent fetches and compilations
    #[arg(short = 'j', long)]
    jobs: Option<usize>,
  },

  /// Remove the artifact and object cache
  Clean {
    /// Cache root (default: $BOB_CACHE, then the user cache directory)
    #[arg(long, value_name = "DIR")]
    cache: Option<PathBuf>,
  },

  /// Show host platform, architecture and cache location
  Info {
    #[arg(short = 'o', long, value_enum, default_value_t)]
    format: OutputFormat,
  },
}

fn init_tracing(verbose: bool, json: bool, traces: bool) {
  let default = if verbose { "debug" } else { "warn" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

  let builder = tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .with_file(traces)
    .with_line_number(traces);

  if json {
    builder.json().init();
  } else {
    builder.without_time().init();
  }
}

fn main() -> ExitCode {
  let cli = Cli::parse();
  init_tracing(cli.verbose, cli.json, cli.traces);

  let result = match cli.command {
    Commands::Build {
      target,
      clean,
      module,
      platform,
      arch,
      output,
      cache,
      repin,
      jobs,
    } => cmd_build(BuildArgs {
      target,
      clean,
      module,
      platform,
      arch,
      output,
      cache,
      repin,
      jobs,
    }),
    Commands::Clean { cache } => cmd_clean(cache),
    Commands::Info { format } => cmd_info(format),
  };

  match result {
    Ok(()) => ExitCode::SUCCESS,
    Err(err) => {
      print_error(&format!("{:#}", err));
      ExitCode::FAILURE
    }
  }
}
