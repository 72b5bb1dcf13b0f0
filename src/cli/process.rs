use clap::Parser;
use reqtrace::ProcessReport;
use tracing::instrument;

use super::{
    Context,
    terminal::{self, Colorize},
};

#[derive(Debug, Parser)]
pub struct Process {
    /// Suppress the summary
    #[arg(long)]
    quiet: bool,
}

impl Process {
    #[instrument(skip_all)]
    pub fn run(self, context: &Context) -> anyhow::Result<()> {
        let mut processor = context.processor()?;
        let report = processor.process()?;
        if !self.quiet {
            print_report(&report);
        }
        Ok(())
    }
}

fn print_report(report: &ProcessReport) {
    if report.dry_run {
        println!(
            "{} release {} is frozen and matches its documents",
            "✓".success(),
            report.version
        );
    } else {
        println!(
            "{} processed release {}",
            "✓".success(),
            report.version
        );
    }

    println!(
        "  {} requirements: {} new, {} modified, {} moved, {} removed",
        report.total(),
        report.created,
        report.modified,
        report.moved,
        report.removed.len()
    );
    for (status, count) in &report.statuses {
        println!("  {}", terminal::lifecycle(*status, &format!("{status:<20} {count}")));
    }
    for path in &report.rewritten {
        let line = if report.dry_run {
            format!("  would rewrite {}", path.display())
        } else {
            format!("  rewrote {}", path.display())
        };
        println!("{}", line.warning());
    }
}
