use std::env;
use std::fs::OpenOptions;
use std::io::Write;

use crate::error::Result;
use crate::pipeline::{RunOutcome, TargetReport, TargetStatus};

/// One human-readable line per target.
pub fn report_line(report: &TargetReport) -> String {
    let target = format!("'{}' in {}", report.dep_name, report.location());
    match &report.status {
        TargetStatus::Skipped { reason } => format!("⏭️  skipped {} ({})", target, reason),
        TargetStatus::NotProcessed => format!("⏸️  not processed {}", target),
        TargetStatus::Unchanged { value } => {
            format!("✔️  no change for {} (already {})", target, value)
        }
        TargetStatus::WouldChange {
            old_value,
            new_value,
        } => format!("🔍 would update {}: {} -> {}", target, old_value, new_value),
        TargetStatus::Committed {
            old_value,
            new_value,
            commit_sha,
            ..
        } => format!(
            "✅ committed {}: {} -> {} ({})",
            target, old_value, new_value, commit_sha
        ),
        TargetStatus::Failed { phase, reason } => {
            format!("❌ failed {} while {}: {}", target, phase, reason)
        }
    }
}

pub fn output_results(outcome: &RunOutcome) -> Result<()> {
    if outcome.targets.is_empty() {
        println!("ℹ️ No targets processed");
    }
    for report in &outcome.targets {
        println!("{}", report_line(report));
    }

    if !outcome.applied && outcome.changed() > 0 {
        println!("🔍 Dry run mode - re-run with --apply to commit the changes");
    }

    // Output for GitHub Actions
    if env::var("GITHUB_ACTIONS").is_ok() {
        if let Ok(output_file) = env::var("GITHUB_OUTPUT") {
            append_to(&output_file, &action_outputs(outcome))?;
        }
        if let Ok(summary_file) = env::var("GITHUB_STEP_SUMMARY") {
            append_to(&summary_file, &step_summary(outcome))?;
        }
    }

    println!("📊 Result: {}", serde_json::to_string_pretty(outcome)?);

    Ok(())
}

fn append_to(path: &str, content: &str) -> Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(content.as_bytes())?;
    Ok(())
}

fn action_outputs(outcome: &RunOutcome) -> String {
    format!(
        "changed={}\ncommitted={}\nfailed={}\n",
        outcome.changed(),
        outcome.committed(),
        outcome.failed()
    )
}

fn step_summary(outcome: &RunOutcome) -> String {
    let mut summary = if outcome.applied {
        format!("## gitops-replacer: `{}`\n\n", outcome.value)
    } else {
        format!("## gitops-replacer: `{}` (dry run)\n\n", outcome.value)
    };

    if outcome.targets.is_empty() {
        summary.push_str("ℹ️ No targets configured\n");
        return summary;
    }

    summary.push_str("| Repository | Branch | File | depName | Result |\n");
    summary.push_str("|---|---|---|---|---|\n");
    for report in &outcome.targets {
        let result = match &report.status {
            TargetStatus::Skipped { reason } => format!("skipped ({})", reason),
            TargetStatus::NotProcessed => "not processed".to_string(),
            TargetStatus::Unchanged { .. } => "no change".to_string(),
            TargetStatus::WouldChange {
                old_value,
                new_value,
            } => format!("would update `{}` → `{}`", old_value, new_value),
            TargetStatus::Committed {
                commit_sha,
                html_url,
                ..
            } => match html_url {
                Some(url) => format!("committed [{}]({})", short_sha(commit_sha), url),
                None => format!("committed {}", short_sha(commit_sha)),
            },
            TargetStatus::Failed { phase, reason } => {
                format!("❌ {}: {}", phase, reason.replace('|', "\\|"))
            }
        };
        summary.push_str(&format!(
            "| {} | {} | {} | {} | {} |\n",
            report.repository, report.branch, report.file, report.dep_name, result
        ));
    }

    summary
}

fn short_sha(sha: &str) -> &str {
    sha.get(..7).unwrap_or(sha)
}
