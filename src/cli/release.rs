use clap::Parser;
use dialoguer::Confirm;
use tracing::instrument;

use super::{Context, terminal::Colorize};

#[derive(Debug, clap::Subcommand)]
pub enum Release {
    /// Show the current release, its freeze state, and all known releases
    Status,

    /// Create a new release from the current one
    ///
    /// The current release is processed first, lock directives are removed
    /// from the documents, and every live requirement is carried into the new
    /// release as stable. Deleted requirements are archived.
    Create(Create),

    /// Freeze the current release
    Freeze,

    /// Unfreeze the current release
    Unfreeze(Unfreeze),

    /// Remove every lock directive from the documents
    ResetLocks,
}

impl Release {
    pub fn run(self, context: &Context) -> anyhow::Result<()> {
        match self {
            Self::Status => Self::status(context),
            Self::Create(command) => command.run(context),
            Self::Freeze => Self::freeze(context),
            Self::Unfreeze(command) => command.run(context),
            Self::ResetLocks => Self::reset_locks(context),
        }
    }

    #[instrument(skip_all)]
    fn status(context: &Context) -> anyhow::Result<()> {
        let processor = context.processor()?;
        let store = processor.store();
        let config = store.config();

        match config.current() {
            Some(current) if store.is_frozen() => {
                println!("Current release: {} {}", current.success(), "(frozen)".warning());
            }
            Some(current) => println!("Current release: {}", current.success()),
            None => println!("Current release: {}", "none".dim()),
        }
        if !config.releases().is_empty() {
            println!("Releases: {}", config.releases().join(", "));
        }
        if let Some(hash) = config.frozen_hash().filter(|_| store.is_frozen()) {
            println!("Fingerprint: {}", hash.dim());
        }
        Ok(())
    }

    #[instrument(skip_all)]
    fn freeze(context: &Context) -> anyhow::Result<()> {
        let mut processor = context.processor()?;
        let hash = processor.freeze_release()?;
        let version = processor.store().config().current().unwrap_or_default();
        println!("{} froze release {version}", "✓".success());
        println!("  {}", hash.dim());
        Ok(())
    }

    #[instrument(skip_all)]
    fn reset_locks(context: &Context) -> anyhow::Result<()> {
        let processor = context.processor()?;
        let changed = processor.reset_lock_directives()?;
        if changed.is_empty() {
            println!("No lock directives found");
        }
        for path in changed {
            println!("  {}", format!("updated {}", path.display()).warning());
        }
        Ok(())
    }
}

#[derive(Debug, Parser)]
pub struct Create {
    /// The version label of the new release, e.g. 1.1
    version: String,

    /// Overwrite the release if it already exists
    #[arg(long)]
    force: bool,

    /// Skip the confirmation prompt when overwriting
    #[arg(short, long)]
    yes: bool,
}

impl Create {
    #[instrument(skip(context))]
    fn run(self, context: &Context) -> anyhow::Result<()> {
        let mut processor = context.processor()?;
        let exists = processor
            .store()
            .release_directory(&self.version)
            .exists();

        if exists && self.force && !self.yes {
            let proceed = Confirm::new()
                .with_prompt(format!("Release {} already exists. Overwrite it?", self.version))
                .default(false)
                .interact()?;
            if !proceed {
                println!("Aborted");
                return Ok(());
            }
        }

        let release = processor.create_release(&self.version, self.force)?;
        println!(
            "{} created release {}",
            "✓".success(),
            release.version.success()
        );
        println!(
            "  {} requirements, {} archived",
            release.requirements.len(),
            release.archive.len()
        );
        Ok(())
    }
}

#[derive(Debug, Parser)]
pub struct Unfreeze {
    /// Skip the confirmation prompt
    #[arg(short, long)]
    yes: bool,
}

impl Unfreeze {
    #[instrument(skip(context))]
    fn run(self, context: &Context) -> anyhow::Result<()> {
        let mut processor = context.processor()?;
        if !processor.store().is_frozen() {
            println!("Current release is not frozen");
            return Ok(());
        }

        if !self.yes {
            let proceed = Confirm::new()
                .with_prompt("Unfreezing allows the release to change again. Continue?")
                .default(false)
                .interact()?;
            if !proceed {
                println!("Aborted");
                return Ok(());
            }
        }

        processor.unfreeze_release()?;
        println!("{} unfroze release", "✓".success());
        Ok(())
    }
}
