//! Terminal summaries printed after a run.

use console::style;

use stackfleet_core::run::aggregate::RegionError;
use stackfleet_core::run::{DiffDocument, RunReport};
use stackfleet_core::stack::{DiffStatus, StackOutcome};

pub fn print_stack(region: &str, name: &str, outcome: &StackOutcome) {
    println!(
        "{} {} ({}): {}",
        style("✓").green(),
        style(name).bold(),
        region,
        outcome
    );
}

pub fn print_report(report: &RunReport<StackOutcome>) {
    println!();
    for region in &report.regions {
        println!("{}", style(&region.region).bold());
        if let Some(RegionError::Setup { reason, .. }) = &region.error {
            println!("  {} {}", style("✗").red(), reason);
        }
        for stack in &region.stacks {
            match &stack.outcome {
                Ok(outcome) => println!("  {} {:<40} {}", style("✓").green(), stack.name, outcome),
                Err(reason) => println!(
                    "  {} {:<40} {}",
                    style("✗").red(),
                    stack.name,
                    style(reason).red()
                ),
            }
        }
    }
}

pub fn print_diff(document: &DiffDocument) {
    if document.is_empty() {
        println!("No changes.");
        return;
    }

    println!();
    for region in &document.regions {
        println!("{}", style(&region.name).bold());
        for stack in &region.stacks {
            let changes = &stack.changes;
            let summary = match changes.status {
                DiffStatus::Failed => style(format!("failed: {}", changes.reason)).red(),
                DiffStatus::Unknown => style(format!("unknown: {}", changes.reason)).yellow(),
                DiffStatus::Success if changes.force_update => {
                    style("update required, no resource changes".to_string()).cyan()
                }
                DiffStatus::Success => {
                    let mut summary = format!("{} resource change(s)", changes.changes.len());
                    if changes.policy_changed {
                        summary.push_str(", stack policy changed");
                    }
                    style(summary).cyan()
                }
            };
            println!("  {:<40} {}", stack.name, summary);
            for change in &changes.changes {
                println!(
                    "    {} {} ({})",
                    style(&change.action).dim(),
                    change.logical_id,
                    change.resource_type
                );
            }
        }
    }
}
