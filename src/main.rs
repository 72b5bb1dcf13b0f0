//! Command line front end for requirements tracing.
//!
//! Extracts `<requirement>` declarations from documents and maintains the
//! versioned release store next to them.

use clap::Parser;

mod cli;

fn main() -> anyhow::Result<()> {
    cli::Cli::parse().run()
}
