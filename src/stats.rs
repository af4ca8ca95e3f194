use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Utc};

use crate::models::{
    DerivedStatistics, FeedbackRecord, FilterCriteria, NpsCategory, ProfessionalShare, TrendPoint,
};

/// Computes dashboard statistics. Calendar days and filter bounds are taken
/// in a single fixed display offset.
#[derive(Debug, Clone, Copy)]
pub struct Aggregator {
    offset: FixedOffset,
}

#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    total: usize,
    promoters: usize,
    passives: usize,
    detractors: usize,
    score_sum: u64,
}

impl Tally {
    fn add(&mut self, record: &FeedbackRecord) {
        self.total += 1;
        self.score_sum += u64::from(record.score.value());
        match record.score.category() {
            NpsCategory::Promoter => self.promoters += 1,
            NpsCategory::Passive => self.passives += 1,
            NpsCategory::Detractor => self.detractors += 1,
        }
    }

    fn nps_index(&self) -> i32 {
        nps_index(self.promoters, self.detractors, self.total)
    }
}

impl Aggregator {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    #[cfg(test)]
    pub fn utc() -> Self {
        use chrono::Offset;
        Self::new(Utc.fix())
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn day_of(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.offset).date_naive()
    }

    fn bound(&self, day: NaiveDate, time: NaiveTime) -> Option<DateTime<Utc>> {
        day.and_time(time)
            .and_local_timezone(self.offset)
            .single()
            .map(|at| at.with_timezone(&Utc))
    }

    pub fn matches(&self, record: &FeedbackRecord, criteria: &FilterCriteria) -> bool {
        if let Some(start) = criteria
            .start_date
            .and_then(|day| self.bound(day, NaiveTime::MIN))
        {
            if record.submitted_at < start {
                return false;
            }
        }

        if let Some(end) = criteria
            .end_date
            .and_then(|day| self.bound(day, end_of_day()))
        {
            if record.submitted_at > end {
                return false;
            }
        }

        match criteria.professional.as_deref() {
            Some(professional) => record.professional == professional,
            None => true,
        }
    }

    pub fn filter<'a>(
        &self,
        records: &'a [FeedbackRecord],
        criteria: &FilterCriteria,
    ) -> Vec<&'a FeedbackRecord> {
        records
            .iter()
            .filter(|record| self.matches(record, criteria))
            .collect()
    }

    pub fn statistics(&self, records: &[&FeedbackRecord]) -> DerivedStatistics {
        let mut tally = Tally::default();
        let mut counts_by_professional: BTreeMap<String, usize> = BTreeMap::new();

        for record in records {
            tally.add(record);
            *counts_by_professional
                .entry(record.professional.clone())
                .or_insert(0) += 1;
        }

        if tally.total == 0 {
            return DerivedStatistics::default();
        }

        DerivedStatistics {
            total: tally.total,
            average_score: round_one_decimal(tally.score_sum as f64 / tally.total as f64),
            nps_index: tally.nps_index(),
            promoter_count: tally.promoters,
            passive_count: tally.passives,
            detractor_count: tally.detractors,
            counts_by_professional,
            daily_trend: self.daily_trend(records),
        }
    }

    /// One point per calendar day that has records, oldest day first.
    pub fn daily_trend(&self, records: &[&FeedbackRecord]) -> Vec<TrendPoint> {
        let mut days: BTreeMap<NaiveDate, Tally> = BTreeMap::new();

        for record in records {
            days.entry(self.day_of(record.submitted_at))
                .or_default()
                .add(record);
        }

        days.into_iter()
            .map(|(day, tally)| TrendPoint {
                day,
                nps_index: tally.nps_index(),
            })
            .collect()
    }

    pub fn summarize<'a>(
        &self,
        records: &'a [FeedbackRecord],
        criteria: &FilterCriteria,
    ) -> (Vec<&'a FeedbackRecord>, DerivedStatistics) {
        let matching = self.filter(records, criteria);
        let stats = self.statistics(&matching);
        (matching, stats)
    }
}

/// `round(100 * (promoters/total - detractors/total))`, halves rounded up.
pub fn nps_index(promoters: usize, detractors: usize, total: usize) -> i32 {
    if total == 0 {
        return 0;
    }
    let spread = promoters as f64 - detractors as f64;
    (100.0 * spread / total as f64 + 0.5).floor() as i32
}

/// Roster members in roster order with their share of the matching set.
pub fn share_by_professional(
    stats: &DerivedStatistics,
    roster: &[String],
) -> Vec<ProfessionalShare> {
    roster
        .iter()
        .map(|professional| {
            let count = stats
                .counts_by_professional
                .get(professional)
                .copied()
                .unwrap_or(0);
            let percent = if stats.total == 0 {
                0
            } else {
                (100.0 * count as f64 / stats.total as f64 + 0.5).floor() as u32
            };
            ProfessionalShare {
                professional: professional.clone(),
                count,
                percent,
            }
        })
        .collect()
}

/// The `limit` newest records by timestamp. Ties keep the later insertion first.
pub fn recent<'a>(records: &[&'a FeedbackRecord], limit: usize) -> Vec<&'a FeedbackRecord> {
    let mut newest: Vec<&FeedbackRecord> = records.iter().rev().copied().collect();
    newest.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
    newest.truncate(limit);
    newest
}

fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn end_of_day() -> NaiveTime {
    NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN)
}
