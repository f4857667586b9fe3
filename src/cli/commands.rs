use crate::config::StagerConfig;
use crate::util::logging::parse_level;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;

/// Stage Cloud Foundry applications locally with buildpacks
#[derive(Parser, Debug)]
#[command(
    name = "localstage",
    about = "Stage applications locally with buildpacks",
    version,
    author,
    long_about = "localstage runs buildpack detect, compile and release inside a local \
                  container and writes the resulting droplet to disk. Buildpacks and \
                  environment come from the command line and from local.yml."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, value_name = "LEVEL", help = "Set logging level")]
    pub log_level: Option<String>,

    #[arg(short = 'v', long, global = true, help = "Enable debug logging")]
    pub verbose: bool,

    #[arg(
        short = 'q',
        long,
        global = true,
        conflicts_with = "verbose",
        help = "Quiet mode - suppress non-error output"
    )]
    pub quiet: bool,
}

impl CliArgs {
    /// Effective log level: `--log-level`, then `-v`/`-q`, then the configured level.
    pub fn log_level_for(&self, config: &StagerConfig) -> Level {
        if let Some(level) = &self.log_level {
            parse_level(level)
        } else if self.verbose {
            Level::DEBUG
        } else if self.quiet {
            Level::ERROR
        } else {
            parse_level(&config.log_level)
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(
        about = "Stage an application into a droplet",
        long_about = "Archives the application directory, stages it with the given \
                      buildpacks and writes <NAME>.droplet.\n\n\
                      Examples:\n  \
                      localstage stage my-app -b ruby_buildpack\n  \
                      localstage stage my-app -p ./src -b go_buildpack -b binary_buildpack"
    )]
    Stage(StageArgs),

    #[command(
        about = "Copy a file out of the stack image",
        long_about = "Extracts one file, such as the lifecycle launcher, from the stack \
                      image.\n\n\
                      Examples:\n  \
                      localstage download /tmp/lifecycle/launcher"
    )]
    Download(DownloadArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct StageArgs {
    #[arg(value_name = "NAME", help = "Application name")]
    pub name: String,

    #[arg(
        short = 'b',
        long = "buildpack",
        value_name = "BUILDPACK",
        help = "Buildpack to try, in order (overrides local.yml)"
    )]
    pub buildpacks: Vec<String>,

    #[arg(
        short = 'p',
        long,
        value_name = "PATH",
        default_value = ".",
        help = "Application directory"
    )]
    pub path: PathBuf,

    #[arg(
        short = 'c',
        long,
        value_name = "FILE",
        default_value = "local.yml",
        help = "Application manifest"
    )]
    pub config: PathBuf,

    #[arg(
        short = 'o',
        long,
        value_name = "FILE",
        help = "Droplet destination (defaults to <NAME>.droplet)"
    )]
    pub output: Option<PathBuf>,
}

impl StageArgs {
    pub fn droplet_path(&self) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("{}.droplet", self.name)))
    }
}

#[derive(Parser, Debug, Clone)]
pub struct DownloadArgs {
    #[arg(value_name = "PATH", help = "Absolute path inside the stack image")]
    pub path: String,

    #[arg(
        short = 'o',
        long,
        value_name = "FILE",
        help = "Destination (defaults to the file's name)"
    )]
    pub output: Option<PathBuf>,
}

impl DownloadArgs {
    pub fn destination(&self) -> PathBuf {
        self.output.clone().unwrap_or_else(|| {
            PathBuf::from(self.path.rsplit('/').next().unwrap_or(&self.path))
        })
    }
}
