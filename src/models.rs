use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SurveyError;

/// A 0-10 satisfaction rating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Score(u8);

impl Score {
    pub const MIN: Score = Score(0);
    pub const MAX: Score = Score(10);

    pub fn value(self) -> u8 {
        self.0
    }

    pub fn category(self) -> NpsCategory {
        match self.0 {
            9..=10 => NpsCategory::Promoter,
            7..=8 => NpsCategory::Passive,
            _ => NpsCategory::Detractor,
        }
    }
}

impl TryFrom<u8> for Score {
    type Error = SurveyError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if value <= Self::MAX.0 {
            Ok(Score(value))
        } else {
            Err(SurveyError::ScoreOutOfRange(i64::from(value)))
        }
    }
}

impl TryFrom<i64> for Score {
    type Error = SurveyError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        u8::try_from(value)
            .map_err(|_| SurveyError::ScoreOutOfRange(value))
            .and_then(Score::try_from)
    }
}

impl From<Score> for u8 {
    fn from(score: Score) -> Self {
        score.0
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NpsCategory {
    Promoter,
    Passive,
    Detractor,
}

/// The in-progress answers of one patient. Nothing here is persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Draft {
    pub professional: Option<String>,
    pub score: Option<Score>,
    pub comment: String,
}

impl Draft {
    pub fn complete(&self) -> Option<Submission> {
        Some(Submission {
            professional: self.professional.clone()?,
            score: self.score?,
            comment: self.comment.clone(),
        })
    }
}

/// A finished draft waiting for its timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub professional: String,
    pub score: Score,
    pub comment: String,
}

impl Submission {
    pub fn into_record(self, submitted_at: DateTime<Utc>) -> FeedbackRecord {
        FeedbackRecord {
            id: Uuid::new_v4(),
            professional: self.professional,
            score: self.score,
            comment: self.comment,
            submitted_at,
        }
    }
}

/// One stored survey answer. Field names on the wire match the browser-era
/// export (`nps`, `timestamp`), so old dumps load as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub professional: String,
    #[serde(rename = "nps")]
    pub score: Score,
    #[serde(default)]
    pub comment: String,
    #[serde(rename = "timestamp")]
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterCriteria {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub professional: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrendPoint {
    pub day: NaiveDate,
    pub nps_index: i32,
}

impl TrendPoint {
    pub fn label(&self) -> String {
        self.day.format("%d/%m/%Y").to_string()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DerivedStatistics {
    pub total: usize,
    pub average_score: f64,
    pub nps_index: i32,
    pub promoter_count: usize,
    pub passive_count: usize,
    pub detractor_count: usize,
    pub counts_by_professional: BTreeMap<String, usize>,
    pub daily_trend: Vec<TrendPoint>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfessionalShare {
    pub professional: String,
    pub count: usize,
    pub percent: u32,
}
