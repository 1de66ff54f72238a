use super::prune::PruneSummary;

/// Renders a human-readable summary of a pruning run.
pub fn format_summary(summary: &PruneSummary) -> String {
    let mut report = String::new();

    report.push_str(&format!(
        "OTU Pruning Report (rank: {})\n",
        summary.rank.as_str()
    ));
    report.push_str("=================================================\n\n");

    report.push_str("Input:\n");
    report.push_str(&format!("  Samples: {}\n", summary.total_samples));
    report.push_str(&format!("  Sequences: {}\n", summary.total_seqs));
    report.push_str(&format!("  OTUs: {}\n", summary.input_otus));
    report.push_str(&format!(
        "  Unique {}: {}\n\n",
        summary.rank.plural(),
        summary.total_groups()
    ));

    report.push_str("Kept:\n");
    report.push_str(&format!(
        "  OTUs: {} ({:.1}%)\n",
        summary.kept_otus,
        PruneSummary::percent(summary.kept_otus, summary.input_otus)
    ));
    report.push_str(&format!(
        "  Sequences: {} ({:.2}%)\n",
        summary.kept_seqs,
        PruneSummary::percent(summary.kept_seqs, summary.total_seqs)
    ));
    report.push_str(&format!(
        "  Unique {}: {}\n\n",
        summary.rank.plural(),
        summary.kept_groups()
    ));

    report.push_str("Removed:\n");
    report.push_str(&format!(
        "  OTUs: {} ({:.1}%)\n",
        summary.removed_otus,
        PruneSummary::percent(summary.removed_otus, summary.input_otus)
    ));
    report.push_str(&format!(
        "  Sequences: {} ({:.2}%)\n",
        summary.removed_seqs,
        PruneSummary::percent(summary.removed_seqs, summary.total_seqs)
    ));
    report.push_str(&format!(
        "  Unique {}: {}\n",
        summary.rank.plural(),
        summary.removed_groups()
    ));

    let removed: Vec<_> = summary.groups.iter().filter(|g| !g.kept).collect();
    if !removed.is_empty() {
        report.push('\n');
        report.push_str("Removed groups:\n");
        for group in removed {
            report.push_str(&format!(
                "  {} ({} OTUs, {} seqs, {:.4}% of total, {} samples)\n",
                group.taxon,
                group.otus,
                group.seqs,
                PruneSummary::percent(group.seqs, summary.total_seqs),
                group.samples
            ));
        }
    }

    report
}
