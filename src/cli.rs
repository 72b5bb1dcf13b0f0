use std::path::{Path, PathBuf};

mod check;
mod init;
mod process;
mod release;
mod terminal;

use check::Check;
use clap::ArgAction;
use init::Init;
use process::Process;
use release::Release;
use reqtrace::{Processor, ReleaseStore};

#[derive(Debug, clap::Parser)]
#[command(version, about)]
pub struct Cli {
    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// The project directory holding the configuration and releases
    #[arg(short, long, default_value = ".reqtrace", global = true)]
    project: PathBuf,

    /// The directory of documents to scan
    ///
    /// Defaults to the configured `directory`, or the parent of the project
    /// directory.
    #[arg(short, long, global = true)]
    input: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    pub fn run(self) -> anyhow::Result<()> {
        Self::setup_logging(self.verbose);

        let context = Context {
            project: self.project,
            input: self.input,
        };
        self.command.run(&context)
    }

    fn setup_logging(verbosity: u8) {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

        let level = match verbosity {
            0 => tracing::Level::WARN,
            1 => tracing::Level::INFO,
            2 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        };

        let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_names(false)
            .with_line_number(false);

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .init();
    }
}

/// Locations shared by every command.
#[derive(Debug)]
pub struct Context {
    project: PathBuf,
    input: Option<PathBuf>,
}

impl Context {
    pub fn project(&self) -> &Path {
        &self.project
    }

    /// Opens the release store and resolves the document root.
    pub fn processor(&self) -> anyhow::Result<Processor> {
        let store = ReleaseStore::open(&self.project).map_err(|e| {
            anyhow::anyhow!(
                "Failed to open project at {}: {e}\nRun 'reqtrace init' first.",
                self.project.display()
            )
        })?;
        let input = self.input_directory(&store);
        tracing::debug!(input = %input.display(), "resolved document root");
        Ok(Processor::new(store, input))
    }

    fn input_directory(&self, store: &ReleaseStore) -> PathBuf {
        if let Some(input) = &self.input {
            return input.clone();
        }
        let base = self
            .project
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        match &store.config().directory {
            Some(directory) if directory.is_absolute() => directory.clone(),
            Some(directory) => base.join(directory),
            None => base,
        }
    }
}

#[derive(Debug, clap::Subcommand)]
pub enum Command {
    /// Initialize a new project directory
    Init(Init),

    /// Validate the documents against the store without changing anything
    Check(Check),

    /// Scan the documents into the current release
    ///
    /// Missing keys are minted and written back into the documents. If the
    /// current release is frozen, nothing is written and the documents are
    /// verified against the frozen fingerprint instead.
    Process(Process),

    /// Manage releases
    #[command(subcommand)]
    Release(Release),
}

impl Command {
    fn run(self, context: &Context) -> anyhow::Result<()> {
        match self {
            Self::Init(command) => command.run(context),
            Self::Check(command) => command.run(context),
            Self::Process(command) => command.run(context),
            Self::Release(command) => command.run(context),
        }
    }
}
