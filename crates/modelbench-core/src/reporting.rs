use std::path::Path;

use anyhow::{Context, Result};

use crate::aggregator::BenchmarkReport;

/// Write the full report as pretty JSON.
pub fn write_report_json(path: &Path, report: &BenchmarkReport) -> Result<()> {
    let content = serde_json::to_string_pretty(report).context("serialize benchmark report")?;
    std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

/// Render the comparison table and recommendation as Markdown.
pub fn render_summary_md(report: &BenchmarkReport) -> String {
    let mut out = String::new();
    out.push_str("# Model Consistency Benchmark\n\n");
    out.push_str(&format!(
        "- run: `{}`\n- generated: {}\n- iterations per model: {}\n",
        report.run_id,
        report.generated_at.to_rfc3339(),
        report.iterations_per_model
    ));
    if let Some(sha) = &report.target_git_sha {
        out.push_str(&format!("- target commit: `{sha}`\n"));
    }
    out.push('\n');

    out.push_str("| Model | Consistency | Avg Tokens | Security Issues | Timeouts | Autonomous-ready |\n");
    out.push_str("|---|---|---|---|---|---|\n");
    for r in report.ranked() {
        out.push_str(&format!(
            "| {} | {:.0}% ({}/{}) | {:.0} | {} | {} | {} |\n",
            r.model.display_name,
            r.consistency_score * 100.0,
            r.passing_iterations(),
            r.iterations.len(),
            r.token_cost.mean_total_tokens,
            r.security_findings,
            r.verification_timeouts,
            if r.autonomous_ready { "yes" } else { "no" }
        ));
    }
    out.push('\n');

    match report
        .right_sized
        .as_ref()
        .and_then(|id| report.reports.get(id))
    {
        Some(pick) => out.push_str(&format!(
            "**Recommendation:** {} is the cheapest model that passed every iteration.\n",
            pick.model
        )),
        None => out.push_str(
            "**Recommendation:** no model passed every iteration; keep a human in the loop.\n",
        ),
    }

    if !report.cancelled.is_empty() {
        out.push_str("\n## Cancelled\n");
        for id in &report.cancelled {
            out.push_str(&format!("- `{id}`\n"));
        }
    }
    if !report.failed.is_empty() {
        out.push_str("\n## Failed sessions\n");
        for (id, reason) in &report.failed {
            out.push_str(&format!("- `{id}`: {reason}\n"));
        }
    }
    out
}

pub fn write_summary_md(path: &Path, report: &BenchmarkReport) -> Result<()> {
    let md = render_summary_md(report);
    std::fs::write(path, md).with_context(|| format!("write {:?}", path))?;
    Ok(())
}
