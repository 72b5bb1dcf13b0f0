use clap::Parser;
use tracing::instrument;

use super::{Context, terminal::Colorize};

#[derive(Debug, Parser)]
pub struct Check {}

impl Check {
    #[instrument(skip_all)]
    pub fn run(self, context: &Context) -> anyhow::Result<()> {
        let processor = context.processor()?;
        match processor.check() {
            Ok(declared) => {
                println!(
                    "{} {} declared requirements in {}",
                    "✓".success(),
                    declared.len(),
                    processor.input().display()
                );
                Ok(())
            }
            Err(e) => {
                println!("{} {e}", "✗".error());
                anyhow::bail!("check failed")
            }
        }
    }
}
