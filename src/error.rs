use thiserror::Error;

use crate::survey::Step;

#[derive(Debug, Error)]
pub enum SurveyError {
    #[error("score {0} is outside 0-10")]
    ScoreOutOfRange(i64),

    #[error("unknown professional: {0}")]
    UnknownProfessional(String),

    #[error("action not available while in {0:?}")]
    WrongStep(Step),

    #[error("survey is missing a {0}")]
    Incomplete(&'static str),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("invalid stored row: {0}")]
    InvalidRow(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum AckError {
    #[error("no API key configured")]
    MissingApiKey,

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("generation API returned status {0}")]
    Status(reqwest::StatusCode),

    #[error("generation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("response parsing failed: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum DashboardError {
    #[error(transparent)]
    Survey(#[from] SurveyError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
