use std::io::{BufRead, Write};
use std::path::Path;

use anyhow::Context;
use chrono::{NaiveDate, Utc};

use crate::ack::Acknowledger;
use crate::models::{FeedbackRecord, FilterCriteria};
use crate::report::{self, ReportScope};
use crate::stats::{self, Aggregator};
use crate::store::FeedbackStore;
use crate::survey::{Step, SurveyController};

const BACK: &str = "<";

/// Prints the dashboard view of `records` under `criteria`.
pub fn render_summary(
    out: &mut impl Write,
    aggregator: &Aggregator,
    records: &[FeedbackRecord],
    criteria: &FilterCriteria,
    roster: &[String],
) -> std::io::Result<()> {
    let (matching, summary) = aggregator.summarize(records, criteria);

    if summary.total == 0 {
        writeln!(out, "No responses match these filters.")?;
        return Ok(());
    }

    writeln!(out, "Responses: {}", summary.total)?;
    writeln!(out, "Average score: {:.1}", summary.average_score)?;
    writeln!(out, "NPS: {}", summary.nps_index)?;
    writeln!(
        out,
        "Promoters: {}  Passives: {}  Detractors: {}",
        summary.promoter_count, summary.passive_count, summary.detractor_count
    )?;

    if !summary.daily_trend.is_empty() {
        writeln!(out, "Daily NPS:")?;
        for point in &summary.daily_trend {
            writeln!(out, "  {}  {:>4}", point.label(), point.nps_index)?;
        }
    }

    if criteria.professional.is_none() {
        writeln!(out, "By professional:")?;
        for share in stats::share_by_professional(&summary, roster) {
            writeln!(
                out,
                "  {}: {} ({}%)",
                share.professional, share.count, share.percent
            )?;
        }
    }

    writeln!(out, "Latest:")?;
    for record in stats::recent(&matching, 5) {
        let local = record.submitted_at.with_timezone(&aggregator.offset());
        let comment = if record.comment.is_empty() {
            "-"
        } else {
            record.comment.as_str()
        };
        writeln!(
            out,
            "  {} {} [{}] {}",
            local.format("%d/%m/%Y %H:%M"),
            record.professional,
            record.score,
            comment
        )?;
    }
    Ok(())
}

fn prompt<S: FeedbackStore, A: Acknowledger>(
    survey: &SurveyController<S, A>,
    out: &mut impl Write,
) -> std::io::Result<()> {
    if let Some(position) = survey.step().progress() {
        write!(out, "[{position}/3] ")?;
    }
    match survey.step() {
        Step::Welcome if survey.dashboard_enabled() => {
            writeln!(out, "Welcome! Press Enter to rate your visit, or type 'admin'.")
        }
        Step::Welcome => writeln!(out, "Welcome! Press Enter to rate your visit."),
        Step::ProfessionalSelection => {
            writeln!(out, "Who attended you today?")?;
            for (index, name) in survey.roster().iter().enumerate() {
                let marker = if survey.draft().professional.as_deref() == Some(name.as_str()) {
                    "*"
                } else {
                    " "
                };
                writeln!(out, "  {marker}{}. {name}", index + 1)?;
            }
            writeln!(out, "Type a number ('{BACK}' to go back).")
        }
        Step::ScoreSelection => writeln!(
            out,
            "From 0 to 10, how likely are you to recommend us? ('{BACK}' to go back)"
        ),
        Step::CommentEntry => writeln!(
            out,
            "Anything else you'd like to tell us? Enter to skip, '{BACK}' to go back."
        ),
        Step::Submitting => writeln!(out, "Sending..."),
        Step::Success => {
            if let Some(receipt) = survey.receipt() {
                writeln!(out, "\n{}\n", receipt.message)?;
                if !receipt.saved {
                    writeln!(
                        out,
                        "(Your answers could not be saved. Please let the front desk know.)"
                    )?;
                }
            }
            writeln!(out, "Press Enter to start a new survey.")
        }
        Step::DashboardAccessPrompt => {
            if survey.credential_error() {
                writeln!(out, "Incorrect password.")?;
            }
            writeln!(out, "Restricted access. Password ('{BACK}' to cancel):")
        }
        Step::Dashboard => writeln!(
            out,
            "Commands: from <yyyy-mm-dd>, to <yyyy-mm-dd>, prof <n>, reset, report [n], clear <password>, '{BACK}'"
        ),
    }
}

struct DashboardView {
    criteria: FilterCriteria,
}

impl DashboardView {
    async fn show<S: FeedbackStore, A: Acknowledger>(
        &self,
        survey: &SurveyController<S, A>,
        aggregator: &Aggregator,
        out: &mut impl Write,
    ) -> anyhow::Result<()> {
        match survey.history().await {
            Ok(records) => {
                render_summary(out, aggregator, &records, &self.criteria, survey.roster())?
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to load feedback history");
                writeln!(out, "Could not load the feedback history.")?;
            }
        }
        Ok(())
    }

    async fn handle<S: FeedbackStore, A: Acknowledger>(
        &mut self,
        line: &str,
        survey: &SurveyController<S, A>,
        aggregator: &Aggregator,
        out: &mut impl Write,
    ) -> anyhow::Result<()> {
        let (command, argument) = match line.split_once(' ') {
            Some((command, argument)) => (command, argument.trim()),
            None => (line, ""),
        };
        let professional = |raw: &str| -> Option<String> {
            let index: usize = raw.parse().ok()?;
            survey.roster().get(index.checked_sub(1)?).cloned()
        };

        match command {
            "from" | "to" => match NaiveDate::parse_from_str(argument, "%Y-%m-%d") {
                Ok(day) if command == "from" => self.criteria.start_date = Some(day),
                Ok(day) => self.criteria.end_date = Some(day),
                Err(_) if argument.is_empty() => {
                    if command == "from" {
                        self.criteria.start_date = None;
                    } else {
                        self.criteria.end_date = None;
                    }
                }
                Err(_) => {
                    writeln!(out, "Dates look like 2024-01-20.")?;
                    return Ok(());
                }
            },
            "prof" => match professional(argument) {
                Some(name) => self.criteria.professional = Some(name),
                None if argument.is_empty() => self.criteria.professional = None,
                None => {
                    writeln!(out, "Unknown professional number.")?;
                    return Ok(());
                }
            },
            "reset" => self.criteria = FilterCriteria::default(),
            "report" => {
                let scope = match professional(argument) {
                    Some(name) => ReportScope::Professional(name),
                    None => ReportScope::Matching,
                };
                let records = match survey.history().await {
                    Ok(records) => records,
                    Err(err) => {
                        tracing::error!(error = %err, "failed to load feedback history");
                        writeln!(out, "Could not write the report.")?;
                        return Ok(());
                    }
                };
                let issued_on = aggregator.day_of(Utc::now());
                let body = report::build_report(
                    survey.clinic(),
                    aggregator,
                    &records,
                    &self.criteria,
                    &scope,
                    issued_on,
                );
                let file_name = report::default_file_name(issued_on);
                match std::fs::write(Path::new(&file_name), body) {
                    Ok(()) => writeln!(out, "Report written to {file_name}.")?,
                    Err(err) => {
                        tracing::error!(error = %err, file = %file_name, "failed to write report");
                        writeln!(out, "Could not write the report.")?;
                    }
                }
                return Ok(());
            }
            "clear" => {
                match survey.clear_history(argument).await {
                    Ok(true) => writeln!(out, "All feedback removed.")?,
                    Ok(false) => writeln!(out, "Incorrect password.")?,
                    Err(err) => {
                        tracing::error!(error = %err, "failed to clear feedback history");
                        writeln!(out, "Could not clear the feedback history.")?;
                    }
                }
                return Ok(());
            }
            _ => {}
        }

        self.show(survey, aggregator, out).await
    }
}

/// Drives one kiosk session from `input` until it ends or `quit` is typed.
pub async fn run<S, A>(
    survey: &mut SurveyController<S, A>,
    aggregator: &Aggregator,
    input: impl BufRead,
    out: &mut impl Write,
) -> anyhow::Result<()>
where
    S: FeedbackStore,
    A: Acknowledger,
{
    let mut lines = input.lines();
    let mut dashboard = DashboardView {
        criteria: FilterCriteria::default(),
    };

    loop {
        prompt(survey, out)?;
        out.flush()?;

        let Some(line) = lines.next() else {
            return Ok(());
        };
        let line = line.context("failed to read input")?;
        let trimmed = line.trim();

        if trimmed == "quit" && matches!(survey.step(), Step::Welcome | Step::Dashboard) {
            return Ok(());
        }
        if trimmed == BACK && survey.step() != Step::Success {
            survey.back();
            continue;
        }

        match survey.step() {
            Step::Welcome => {
                if trimmed == "admin" {
                    if !survey.open_dashboard() {
                        writeln!(out, "The dashboard is not available on this kiosk.")?;
                    }
                } else {
                    survey.advance();
                }
            }
            Step::ProfessionalSelection => {
                let chosen = trimmed
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|index| survey.roster().get(index).cloned());
                match chosen {
                    Some(name) => {
                        survey.select_professional(&name)?;
                        survey.advance();
                    }
                    None => {
                        if !survey.advance() {
                            writeln!(out, "Please choose a professional.")?;
                        }
                    }
                }
            }
            Step::ScoreSelection => match trimmed.parse::<u8>() {
                Ok(value) if value <= 10 => {
                    survey.select_score(value)?;
                    survey.advance();
                }
                _ if trimmed.is_empty() => {
                    if !survey.advance() {
                        writeln!(out, "Please choose a score.")?;
                    }
                }
                _ => writeln!(out, "Please type a number from 0 to 10.")?,
            },
            Step::CommentEntry => {
                survey.set_comment(trimmed)?;
                survey.submit().await?;
            }
            Step::Submitting => {}
            Step::Success => {
                survey.new_survey();
            }
            Step::DashboardAccessPrompt => {
                survey.enter_credential(trimmed);
                if survey.submit_credential() {
                    dashboard.criteria = FilterCriteria::default();
                    dashboard.show(survey, aggregator, out).await?;
                }
            }
            Step::Dashboard => {
                dashboard.handle(trimmed, survey, aggregator, out).await?;
            }
        }
    }
}
