use std::fmt::Write;

use chrono::NaiveDate;

use crate::models::{FeedbackRecord, FilterCriteria};
use crate::stats::Aggregator;

/// Which records a report covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportScope {
    /// Everything the active filter matches.
    Matching,
    /// The filter's date range, narrowed to one professional regardless of
    /// the filter's own professional.
    Professional(String),
}

impl ReportScope {
    pub fn criteria(&self, active: &FilterCriteria) -> FilterCriteria {
        match self {
            ReportScope::Matching => active.clone(),
            ReportScope::Professional(name) => FilterCriteria {
                professional: Some(name.clone()),
                ..active.clone()
            },
        }
    }
}

pub fn default_file_name(issued_on: NaiveDate) -> String {
    format!("report_{}.md", issued_on.format("%d-%m-%Y"))
}

fn describe_filters(criteria: &FilterCriteria, issued_on: NaiveDate) -> String {
    let mut parts = Vec::new();
    if criteria.start_date.is_some() || criteria.end_date.is_some() {
        let label = |day: Option<NaiveDate>, open: &str| {
            day.map(|d| d.format("%d/%m/%Y").to_string())
                .unwrap_or_else(|| open.to_string())
        };
        parts.push(format!(
            "{} to {}",
            label(criteria.start_date, "start"),
            label(criteria.end_date, "end")
        ));
    }
    if let Some(professional) = &criteria.professional {
        parts.push(format!("Professional: {professional}"));
    }

    if parts.is_empty() {
        format!("Issued on {}", issued_on.format("%d/%m/%Y"))
    } else {
        format!("Filters: {}", parts.join(" | "))
    }
}

pub fn build_report(
    clinic: &str,
    aggregator: &Aggregator,
    records: &[FeedbackRecord],
    active: &FilterCriteria,
    scope: &ReportScope,
    issued_on: NaiveDate,
) -> String {
    let criteria = scope.criteria(active);
    let (matching, stats) = aggregator.summarize(records, &criteria);

    let mut output = String::new();

    let _ = writeln!(output, "# {clinic}");
    let _ = writeln!(output, "## Service Quality Report");
    let _ = writeln!(output, "{}", describe_filters(&criteria, issued_on));
    let _ = writeln!(output);

    if stats.total == 0 {
        let _ = writeln!(output, "No responses match these filters.");
        return output;
    }

    let _ = writeln!(output, "## Executive Summary");
    let _ = writeln!(output, "| Metric | Value |");
    let _ = writeln!(output, "| --- | --- |");
    let _ = writeln!(output, "| Total responses | {} |", stats.total);
    let _ = writeln!(output, "| Average score | {:.1} / 10 |", stats.average_score);
    let _ = writeln!(output, "| NPS (Net Promoter Score) | {} |", stats.nps_index);
    let _ = writeln!(output, "| Promoters (9-10) | {} |", stats.promoter_count);
    let _ = writeln!(output, "| Passives (7-8) | {} |", stats.passive_count);
    let _ = writeln!(output, "| Detractors (0-6) | {} |", stats.detractor_count);

    let _ = writeln!(output);
    let _ = writeln!(output, "## Responses by Professional");
    let _ = writeln!(output, "| Professional | Responses |");
    let _ = writeln!(output, "| --- | --- |");
    for (professional, count) in &stats.counts_by_professional {
        let _ = writeln!(output, "| {professional} | {count} |");
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Daily NPS Trend");
    for point in &stats.daily_trend {
        let _ = writeln!(output, "- {}: NPS {}", point.label(), point.nps_index);
    }

    let commented: Vec<&&FeedbackRecord> = matching
        .iter()
        .filter(|record| !record.comment.trim().is_empty())
        .collect();

    let _ = writeln!(output);
    let _ = writeln!(output, "## Patient Comments");
    if commented.is_empty() {
        let _ = writeln!(output, "No comments for this selection.");
    } else {
        let _ = writeln!(output, "| Time | Professional | Score | Comment |");
        let _ = writeln!(output, "| --- | --- | --- | --- |");
        for record in commented {
            let local = record.submitted_at.with_timezone(&aggregator.offset());
            let _ = writeln!(
                output,
                "| {} | {} | {} | {} |",
                local.format("%d/%m/%Y %H:%M:%S"),
                record.professional,
                record.score,
                record.comment.replace('|', "\\|").replace('\n', " ")
            );
        }
    }

    output
}
