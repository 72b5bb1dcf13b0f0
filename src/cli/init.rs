use std::path::PathBuf;

use clap::Parser;
use reqtrace::{Config, ReleaseStore, domain::KeyMode};
use tracing::instrument;

use super::{Context, terminal::Colorize};

#[derive(Debug, Parser)]
pub struct Init {
    /// Project name
    #[arg(long, default_value = "")]
    name: String,

    /// Key prefix
    #[arg(long, default_value = "REQ")]
    prefix: String,

    /// Separator between the prefix and the rest of the key
    #[arg(long, default_value = "-")]
    separator: String,

    /// Optional scope inserted after the separator
    #[arg(long)]
    scope: Option<String>,

    /// Key generation strategy
    #[arg(long, value_enum, default_value_t = Mode::Random)]
    key_mode: Mode,

    /// Documents directory, relative to the parent of the project directory
    #[arg(long)]
    directory: Option<PathBuf>,

    /// Create this first release straight away
    #[arg(long, value_name = "VERSION")]
    release: Option<String>,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum Mode {
    Random,
    Sequential,
}

impl From<Mode> for KeyMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Random => Self::Random,
            Mode::Sequential => Self::Sequential,
        }
    }
}

impl Init {
    #[instrument(skip(context))]
    pub fn run(self, context: &Context) -> anyhow::Result<()> {
        let project = context.project();
        if project.join("config.toml").exists() {
            anyhow::bail!(
                "Project already initialized (found existing {})",
                project.join("config.toml").display()
            );
        }

        let mut config = Config::default();
        config.name = self.name;
        config.directory = self.directory;
        config.prefix = self.prefix;
        config.separator = self.separator;
        config.scope = self.scope.filter(|scope| !scope.is_empty());
        config.key_mode = self.key_mode.into();

        let mut store = ReleaseStore::init(project, config)
            .map_err(|e| anyhow::anyhow!("Failed to initialize project: {e}"))?;

        println!("Initialized project in {}", project.display());
        println!("  Created: {}", project.join("config.toml").display());

        if let Some(version) = self.release {
            store.create(&version, false)?;
            println!("  Created: release {}", version.success());
        } else {
            println!();
            println!("Next steps:");
            println!("  {}", "reqtrace release create 1.0".dim());
        }

        Ok(())
    }
}
