use std::time::Duration;

use anyhow::{bail, Context};
use chrono::FixedOffset;

use crate::access::AccessGate;
use crate::ack::Signature;

const DEFAULT_DATABASE_URL: &str = "sqlite://nps-survey.db";
const DEFAULT_PROFESSIONALS: &str = "Dr. Elvy Soares,Dr. Julio Cesar";
const DEFAULT_CLINIC: &str = "Hospital Santa Filomena";
const DEFAULT_MODEL: &str = "gemini-3-flash-preview";
const DEFAULT_ACK_TIMEOUT_SECS: u64 = 8;
const DEFAULT_UTC_OFFSET: &str = "-03:00";

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub dashboard_secret: Option<String>,
    pub clear_secret: Option<String>,
    pub professionals: Vec<String>,
    pub clinic_name: String,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub ack_timeout: Duration,
    pub utc_offset: FixedOffset,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let professionals = parse_roster(
            &var("SURVEY_PROFESSIONALS").unwrap_or_else(|| DEFAULT_PROFESSIONALS.to_string()),
        )?;

        let ack_timeout = match var("SURVEY_ACK_TIMEOUT_SECS") {
            Some(raw) => Duration::from_secs(
                raw.trim()
                    .parse()
                    .with_context(|| format!("SURVEY_ACK_TIMEOUT_SECS is not a number: {raw}"))?,
            ),
            None => Duration::from_secs(DEFAULT_ACK_TIMEOUT_SECS),
        };

        let raw_offset = var("SURVEY_UTC_OFFSET").unwrap_or_else(|| DEFAULT_UTC_OFFSET.to_string());
        let utc_offset = parse_offset(&raw_offset)?;

        Ok(Self {
            database_url: var("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            dashboard_secret: var("SURVEY_DASHBOARD_SECRET"),
            clear_secret: var("SURVEY_CLEAR_SECRET"),
            professionals,
            clinic_name: var("SURVEY_CLINIC_NAME").unwrap_or_else(|| DEFAULT_CLINIC.to_string()),
            gemini_api_key: var("GEMINI_API_KEY"),
            gemini_model: var("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            ack_timeout,
            utc_offset,
        })
    }

    /// The gate for admin commands. Fails when no dashboard secret is set.
    pub fn access_gate(&self) -> anyhow::Result<AccessGate> {
        self.kiosk_gate()
            .context("SURVEY_DASHBOARD_SECRET must be set to use the dashboard")
    }

    /// The kiosk runs without a gate; its admin entry is then disabled.
    pub fn kiosk_gate(&self) -> Option<AccessGate> {
        let dashboard = self.dashboard_secret.clone()?;
        Some(AccessGate::new(dashboard, self.clear_secret.clone()))
    }

    pub fn signature(&self) -> Signature {
        Signature::new(self.clinic_name.clone())
    }
}

fn parse_roster(raw: &str) -> anyhow::Result<Vec<String>> {
    let roster: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect();
    if roster.is_empty() {
        bail!("SURVEY_PROFESSIONALS must name at least one professional");
    }
    Ok(roster)
}

/// Accepts `+HH:MM`, `-HH:MM` or `Z`.
fn parse_offset(raw: &str) -> anyhow::Result<FixedOffset> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("z") {
        return FixedOffset::east_opt(0).context("zero offset");
    }
    raw.parse::<FixedOffset>()
        .with_context(|| format!("SURVEY_UTC_OFFSET must look like -03:00, got {raw}"))
}
