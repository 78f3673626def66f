use std::path::PathBuf;

use clap::{ArgGroup, Args, Parser, Subcommand};
use env_logger::Env;

use crate::commands::detect::command_detect;
use crate::commands::profile::command_profile;

mod commands;

#[derive(Parser)]
#[command(version, about, arg_required_else_help(true))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Profile app/library binaries to JSON files
    Profile(ProfileArgs),

    /// Detect whether the libraries are used in the apps
    Detect(DetectArgs),
}

#[derive(Args)]
#[command(group(ArgGroup::new("input").required(true).args(["files", "folder"])))]
pub(crate) struct ProfileArgs {
    /// The app/library binaries
    #[arg(short, value_name = "FILE", num_args = 1..)]
    pub files: Vec<PathBuf>,

    /// The folder that contains app/library binaries
    #[arg(short = 'd', value_name = "FOLDER")]
    pub folder: Option<PathBuf>,

    /// Specify output folder
    #[arg(short, value_name = "FOLDER", default_value = "profiles")]
    pub output: PathBuf,

    /// Overwrite the output file if it exists
    #[arg(short = 'w')]
    pub overwrite: bool,

    /// The external bytecode parser command
    #[arg(long, value_name = "CMD", default_value = "dex2sig")]
    pub parser: String,

    /// The number of processes to use [default: all CPUs]
    #[arg(short, value_name = "N")]
    pub processes: Option<usize>,

    /// Show debug information
    #[arg(short)]
    pub verbose: bool,
}

#[derive(Args)]
#[command(group(ArgGroup::new("apps").required(true).args(["app_files", "app_folder"])))]
#[command(group(ArgGroup::new("libs").required(true).args(["lib_files", "lib_folder"])))]
pub(crate) struct DetectArgs {
    /// The app profiles
    #[arg(long = "af", value_name = "FILE", num_args = 1..)]
    pub app_files: Vec<PathBuf>,

    /// The folder that contains app profiles
    #[arg(long = "ad", value_name = "FOLDER")]
    pub app_folder: Option<PathBuf>,

    /// The library profiles
    #[arg(long = "lf", value_name = "FILE", num_args = 1..)]
    pub lib_files: Vec<PathBuf>,

    /// The folder that contains library profiles
    #[arg(long = "ld", value_name = "FOLDER")]
    pub lib_folder: Option<PathBuf>,

    /// Specify output folder
    #[arg(short, value_name = "FOLDER", default_value = "outputs")]
    pub output: PathBuf,

    /// Overwrite the output file if it exists
    #[arg(short = 'w')]
    pub overwrite: bool,

    /// Consider built-in Android libraries
    #[arg(short = 'b')]
    pub builtin: bool,

    /// Run in scalable mode [default: accurate mode]
    #[arg(short = 's')]
    pub scalable: bool,

    /// Consider classes repackaging
    #[arg(short = 'r')]
    pub repackage: bool,

    /// The number of processes to use [default: all CPUs]
    #[arg(short, value_name = "N")]
    pub processes: Option<usize>,

    /// Show debug information
    #[arg(short)]
    pub verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    let (verbose, processes) = match &cli.command {
        Commands::Profile(args) => (args.verbose, args.processes),
        Commands::Detect(args) => (args.verbose, args.processes),
    };

    env_logger::Builder::from_env(
        Env::default().default_filter_or(if verbose { "debug" } else { "info" }),
    )
    .init();

    if let Some(processes) = processes {
        if let Err(err) = rayon::ThreadPoolBuilder::new()
            .num_threads(processes)
            .build_global()
        {
            log::warn!("can't configure the worker pool: {}", err);
        }
    }

    let result = match &cli.command {
        Commands::Profile(args) => command_profile(args),
        Commands::Detect(args) => command_detect(args),
    };

    if let Err(err) = result {
        eprintln!("{:#}", err);
        std::process::exit(1);
    }
}
