use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::access::AccessGate;
use crate::ack::{Acknowledger, Signature};
use crate::error::{AckError, DashboardError, SurveyError};
use crate::models::{Draft, FeedbackRecord, Score};
use crate::store::FeedbackStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Welcome,
    ProfessionalSelection,
    ScoreSelection,
    CommentEntry,
    Submitting,
    Success,
    DashboardAccessPrompt,
    Dashboard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Advance,
    Back,
    Submitted,
    NewSurvey,
    OpenDashboard,
    Unlock,
    Cancel,
}

impl Step {
    /// The transition table. Guards on the draft and the credential are
    /// checked by the controller before a transition is taken.
    pub fn after(self, transition: Transition) -> Option<Step> {
        use Step::*;
        use Transition::*;

        match (self, transition) {
            (Welcome, Advance) => Some(ProfessionalSelection),
            (ProfessionalSelection, Advance) => Some(ScoreSelection),
            (ScoreSelection, Advance) => Some(CommentEntry),
            (CommentEntry, Advance) => Some(Submitting),
            (Submitting, Submitted) => Some(Success),
            (Success, NewSurvey) => Some(Welcome),

            (ProfessionalSelection, Back) => Some(Welcome),
            (ScoreSelection, Back) => Some(ProfessionalSelection),
            (CommentEntry, Back) => Some(ScoreSelection),

            (Welcome, OpenDashboard) => Some(DashboardAccessPrompt),
            (DashboardAccessPrompt, Unlock) => Some(Dashboard),
            (DashboardAccessPrompt, Cancel | Back) => Some(Welcome),
            (Dashboard, Back) => Some(Welcome),

            _ => None,
        }
    }

    /// Position in the three question steps, for a progress indicator.
    pub fn progress(self) -> Option<u8> {
        match self {
            Step::ProfessionalSelection => Some(1),
            Step::ScoreSelection => Some(2),
            Step::CommentEntry => Some(3),
            _ => None,
        }
    }
}

/// Outcome of one submission, shown on the success screen.
#[derive(Debug, Clone, PartialEq)]
pub struct Receipt {
    pub record: FeedbackRecord,
    pub message: String,
    pub saved: bool,
}

#[derive(Debug, Clone)]
pub struct SurveySettings {
    pub roster: Vec<String>,
    /// `None` keeps the dashboard locked for the whole session.
    pub gate: Option<AccessGate>,
    pub signature: Signature,
    pub ack_timeout: Duration,
}

type Clock = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub struct SurveyController<S, A> {
    settings: SurveySettings,
    store: S,
    acknowledger: A,
    clock: Clock,
    step: Step,
    draft: Draft,
    credential: String,
    credential_error: bool,
    receipt: Option<Receipt>,
    last_submitted_at: Option<DateTime<Utc>>,
    floor_loaded: bool,
}

impl<S: FeedbackStore, A: Acknowledger> SurveyController<S, A> {
    pub fn new(settings: SurveySettings, store: S, acknowledger: A) -> Self {
        Self {
            settings,
            store,
            acknowledger,
            clock: Box::new(Utc::now),
            step: Step::Welcome,
            draft: Draft::default(),
            credential: String::new(),
            credential_error: false,
            receipt: None,
            last_submitted_at: None,
            floor_loaded: false,
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn step(&self) -> Step {
        self.step
    }

    pub fn draft(&self) -> &Draft {
        &self.draft
    }

    pub fn clinic(&self) -> &str {
        self.settings.signature.clinic()
    }

    pub fn roster(&self) -> &[String] {
        &self.settings.roster
    }

    pub fn receipt(&self) -> Option<&Receipt> {
        self.receipt.as_ref()
    }

    pub fn credential_error(&self) -> bool {
        self.credential_error
    }

    #[cfg(test)]
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn dashboard_enabled(&self) -> bool {
        self.settings.gate.is_some()
    }

    fn take(&mut self, transition: Transition) -> bool {
        match self.step.after(transition) {
            Some(next) => {
                tracing::debug!(from = ?self.step, to = ?next, ?transition, "survey transition");
                self.step = next;
                true
            }
            None => false,
        }
    }

    fn expect_step(&self, expected: Step) -> Result<(), SurveyError> {
        if self.step == expected {
            Ok(())
        } else {
            Err(SurveyError::WrongStep(self.step))
        }
    }

    /// Moves to the next question when the current one is answered.
    /// Leaving the comment step goes through [`Self::submit`] instead.
    pub fn advance(&mut self) -> bool {
        let ready = match self.step {
            Step::Welcome => true,
            Step::ProfessionalSelection => self.draft.professional.is_some(),
            Step::ScoreSelection => self.draft.score.is_some(),
            _ => false,
        };
        ready && self.take(Transition::Advance)
    }

    /// Goes one step back. Answers given so far are kept.
    pub fn back(&mut self) -> bool {
        if self.step == Step::DashboardAccessPrompt {
            return self.cancel();
        }
        self.take(Transition::Back)
    }

    pub fn select_professional(&mut self, name: &str) -> Result<(), SurveyError> {
        self.expect_step(Step::ProfessionalSelection)?;
        let professional = self
            .settings
            .roster
            .iter()
            .find(|candidate| candidate.as_str() == name)
            .ok_or_else(|| SurveyError::UnknownProfessional(name.to_string()))?;
        self.draft.professional = Some(professional.clone());
        Ok(())
    }

    pub fn select_score(&mut self, value: u8) -> Result<(), SurveyError> {
        self.expect_step(Step::ScoreSelection)?;
        self.draft.score = Some(Score::try_from(value)?);
        Ok(())
    }

    pub fn set_comment(&mut self, comment: impl Into<String>) -> Result<(), SurveyError> {
        self.expect_step(Step::CommentEntry)?;
        self.draft.comment = comment.into();
        Ok(())
    }

    /// Finishes the survey: asks for an acknowledgment, stamps the record and
    /// appends it to the store. Always ends in `Success`, even when the
    /// acknowledgment or the write fails.
    pub async fn submit(&mut self) -> Result<&Receipt, SurveyError> {
        self.expect_step(Step::CommentEntry)?;
        let submission = match self.draft.complete() {
            Some(submission) => submission,
            None if self.draft.professional.is_none() => {
                return Err(SurveyError::Incomplete("professional"))
            }
            None => return Err(SurveyError::Incomplete("score")),
        };
        self.take(Transition::Advance);

        let signature = &self.settings.signature;
        let generated = tokio::time::timeout(
            self.settings.ack_timeout,
            self.acknowledger.generate(&submission),
        )
        .await
        .unwrap_or(Err(AckError::Timeout(self.settings.ack_timeout)));
        let message = match generated {
            Ok(text) => signature.ensure(&text),
            Err(err) => {
                tracing::warn!(error = %err, "acknowledgment unavailable, using fallback");
                signature.fallback(&submission)
            }
        };

        let now = (self.clock)();
        let submitted_at = match self.timestamp_floor().await {
            Some(last) if last > now => last,
            _ => now,
        };
        self.last_submitted_at = Some(submitted_at);
        let record = submission.into_record(submitted_at);

        let saved = match self.store.append_one(&record).await {
            Ok(()) => {
                tracing::info!(
                    id = %record.id,
                    professional = %record.professional,
                    score = record.score.value(),
                    "feedback saved"
                );
                true
            }
            Err(err) => {
                tracing::error!(error = %err, id = %record.id, "failed to save feedback");
                false
            }
        };

        self.take(Transition::Submitted);
        Ok(self.receipt.insert(Receipt {
            record,
            message,
            saved,
        }))
    }

    /// Newest timestamp seen so far. The stored history is read once, on the
    /// first submission, so a restarted kiosk never stamps below it.
    async fn timestamp_floor(&mut self) -> Option<DateTime<Utc>> {
        if !self.floor_loaded {
            match self.store.load_all().await {
                Ok(records) => {
                    let stored = records.iter().map(|record| record.submitted_at).max();
                    self.last_submitted_at = self.last_submitted_at.max(stored);
                    self.floor_loaded = true;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "could not read stored history for the timestamp floor");
                }
            }
        }
        self.last_submitted_at
    }

    /// Starts over with an empty draft.
    pub fn new_survey(&mut self) -> bool {
        if !self.take(Transition::NewSurvey) {
            return false;
        }
        self.draft = Draft::default();
        self.receipt = None;
        true
    }

    pub fn open_dashboard(&mut self) -> bool {
        if !self.dashboard_enabled() || !self.take(Transition::OpenDashboard) {
            return false;
        }
        self.credential.clear();
        self.credential_error = false;
        true
    }

    pub fn enter_credential(&mut self, credential: &str) {
        if self.step == Step::DashboardAccessPrompt {
            self.credential = credential.to_string();
            self.credential_error = false;
        }
    }

    /// Checks the typed credential. The buffer is emptied on every attempt.
    pub fn submit_credential(&mut self) -> bool {
        if self.step != Step::DashboardAccessPrompt {
            return false;
        }
        let credential = std::mem::take(&mut self.credential);
        let unlocked = self
            .settings
            .gate
            .as_ref()
            .is_some_and(|gate| gate.check_dashboard(&credential));
        if unlocked {
            self.credential_error = false;
            self.take(Transition::Unlock)
        } else {
            tracing::info!("dashboard credential rejected");
            self.credential_error = true;
            false
        }
    }

    pub fn cancel(&mut self) -> bool {
        if !self.take(Transition::Cancel) {
            return false;
        }
        self.credential.clear();
        self.credential_error = false;
        true
    }

    /// Loads the whole history for the dashboard.
    pub async fn history(&self) -> Result<Vec<FeedbackRecord>, DashboardError> {
        self.expect_step(Step::Dashboard)?;
        Ok(self.store.load_all().await?)
    }

    /// Removes every stored record. Only from the dashboard, and only with
    /// the clear-all secret.
    pub async fn clear_history(&self, credential: &str) -> Result<bool, DashboardError> {
        self.expect_step(Step::Dashboard)?;
        let allowed = self
            .settings
            .gate
            .as_ref()
            .is_some_and(|gate| gate.check_clear(credential));
        if !allowed {
            tracing::info!("clear-all credential rejected");
            return Ok(false);
        }
        self.store.clear_all().await?;
        tracing::warn!("feedback history cleared");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::models::Submission;

    struct StaticAck(&'static str);

    #[async_trait]
    impl Acknowledger for StaticAck {
        async fn generate(&self, _submission: &Submission) -> Result<String, AckError> {
            Ok(self.0.to_string())
        }
    }

    struct FailingAck;

    #[async_trait]
    impl Acknowledger for FailingAck {
        async fn generate(&self, _submission: &Submission) -> Result<String, AckError> {
            Err(AckError::MissingApiKey)
        }
    }

    struct SlowAck;

    #[async_trait]
    impl Acknowledger for SlowAck {
        async fn generate(&self, _submission: &Submission) -> Result<String, AckError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("too late".to_string())
        }
    }

    fn settings() -> SurveySettings {
        SurveySettings {
            roster: vec!["Dr. Elvy Soares".to_string(), "Dr. Julio Cesar".to_string()],
            gate: Some(AccessGate::new("4821", Some("9999".to_string()))),
            signature: Signature::new("Hospital Santa Filomena"),
            ack_timeout: Duration::from_secs(8),
        }
    }

    fn controller<A: Acknowledger>(ack: A) -> SurveyController<MemoryStore, A> {
        SurveyController::new(settings(), MemoryStore::new(), ack)
    }

    fn fill<A: Acknowledger>(survey: &mut SurveyController<MemoryStore, A>, score: u8) {
        assert!(survey.advance());
        survey.select_professional("Dr. Julio Cesar").unwrap();
        assert!(survey.advance());
        survey.select_score(score).unwrap();
        assert!(survey.advance());
    }

    #[test]
    fn table_rejects_illegal_transitions() {
        assert_eq!(Step::Welcome.after(Transition::Back), None);
        assert_eq!(Step::Success.after(Transition::Back), None);
        assert_eq!(Step::Submitting.after(Transition::Back), None);
        assert_eq!(Step::Welcome.after(Transition::Unlock), None);
        assert_eq!(Step::Dashboard.after(Transition::Advance), None);
        assert_eq!(
            Step::CommentEntry.after(Transition::Advance),
            Some(Step::Submitting)
        );
    }

    #[test]
    fn cannot_advance_without_professional() {
        let mut survey = controller(FailingAck);
        assert!(survey.advance());
        assert!(!survey.advance());
        assert_eq!(survey.step(), Step::ProfessionalSelection);
    }

    #[test]
    fn zero_is_a_valid_score() {
        let mut survey = controller(FailingAck);
        survey.advance();
        survey.select_professional("Dr. Elvy Soares").unwrap();
        survey.advance();
        assert!(!survey.advance());
        survey.select_score(0).unwrap();
        assert!(survey.advance());
        assert_eq!(survey.step(), Step::CommentEntry);
        assert_eq!(survey.draft().score, Some(Score::MIN));
    }

    #[test]
    fn selections_are_validated() {
        let mut survey = controller(FailingAck);
        assert!(matches!(
            survey.select_professional("Dr. Elvy Soares"),
            Err(SurveyError::WrongStep(Step::Welcome))
        ));
        survey.advance();
        assert!(matches!(
            survey.select_professional("Dr. Nobody"),
            Err(SurveyError::UnknownProfessional(_))
        ));
        survey.select_professional("Dr. Elvy Soares").unwrap();
        survey.advance();
        assert!(matches!(
            survey.select_score(11),
            Err(SurveyError::ScoreOutOfRange(11))
        ));
    }

    #[test]
    fn back_keeps_answers() {
        let mut survey = controller(FailingAck);
        fill(&mut survey, 7);
        assert!(survey.back());
        assert!(survey.back());
        assert!(survey.back());
        assert_eq!(survey.step(), Step::Welcome);
        assert!(survey.advance());
        assert!(survey.advance());
        assert_eq!(survey.draft().score.map(Score::value), Some(7));
    }

    #[tokio::test]
    async fn submission_persists_and_acknowledges() {
        let stamp = Utc.with_ymd_and_hms(2024, 3, 5, 14, 0, 0).unwrap();
        let mut survey = controller(StaticAck("Thank you so much!")).with_clock(move || stamp);
        fill(&mut survey, 9);
        survey.set_comment("Very kind").unwrap();

        let receipt = survey.submit().await.unwrap().clone();
        assert_eq!(survey.step(), Step::Success);
        assert!(receipt.saved);
        assert_eq!(
            receipt.message,
            "Thank you so much!\n\nSincerely, Hospital Santa Filomena"
        );
        assert_eq!(receipt.record.submitted_at, stamp);
        assert_eq!(receipt.record.comment, "Very kind");

        let stored = survey.store().load_all().await.unwrap();
        assert_eq!(stored, vec![receipt.record]);
    }

    #[tokio::test]
    async fn failed_acknowledgment_falls_back() {
        let mut survey = controller(FailingAck);
        fill(&mut survey, 4);

        let receipt = survey.submit().await.unwrap();
        assert!(receipt.message.contains("Dr. Julio Cesar"));
        assert!(receipt
            .message
            .ends_with("Sincerely, Hospital Santa Filomena"));
        assert!(receipt.saved);
        assert_eq!(survey.step(), Step::Success);
        assert_eq!(survey.store().load_all().await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_acknowledgment_times_out() {
        let mut survey = controller(SlowAck);
        fill(&mut survey, 10);

        let receipt = survey.submit().await.unwrap();
        assert!(receipt.message.starts_with("Thank you for rating your visit"));
        assert_eq!(survey.step(), Step::Success);
    }

    #[tokio::test]
    async fn storage_failure_still_reaches_success() {
        let mut survey = controller(StaticAck("Thanks"));
        survey.store().set_failing(true).await;
        fill(&mut survey, 8);

        let receipt = survey.submit().await.unwrap();
        assert!(!receipt.saved);
        assert_eq!(survey.step(), Step::Success);
    }

    #[tokio::test]
    async fn new_survey_resets_draft() {
        let mut survey = controller(FailingAck);
        fill(&mut survey, 5);
        survey.submit().await.unwrap();

        assert!(!survey.back());
        assert!(survey.new_survey());
        assert_eq!(survey.step(), Step::Welcome);
        assert_eq!(survey.draft(), &Draft::default());
        assert!(survey.receipt().is_none());
    }

    #[tokio::test]
    async fn timestamps_never_go_backwards() {
        let times = [
            Utc.with_ymd_and_hms(2024, 3, 5, 14, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 5, 13, 0, 0).unwrap(),
        ];
        let calls = AtomicUsize::new(0);
        let mut survey = controller(FailingAck)
            .with_clock(move || times[calls.fetch_add(1, Ordering::SeqCst).min(1)]);

        for _ in 0..2 {
            fill(&mut survey, 9);
            survey.submit().await.unwrap();
            survey.new_survey();
        }

        let stored = survey.store().load_all().await.unwrap();
        assert_eq!(stored[0].submitted_at, times[0]);
        assert_eq!(stored[1].submitted_at, times[0]);
    }

    #[test]
    fn wrong_credential_stays_on_prompt() {
        let mut survey = controller(FailingAck);
        assert!(survey.open_dashboard());
        survey.enter_credential("1234");
        assert!(!survey.submit_credential());
        assert_eq!(survey.step(), Step::DashboardAccessPrompt);
        assert!(survey.credential_error());

        survey.enter_credential("4");
        assert!(!survey.credential_error());
        survey.enter_credential("4821");
        assert!(survey.submit_credential());
        assert_eq!(survey.step(), Step::Dashboard);
        assert!(!survey.credential_error());

        assert!(survey.back());
        assert_eq!(survey.step(), Step::Welcome);
    }

    #[test]
    fn buffer_is_cleared_after_each_attempt() {
        let mut survey = controller(FailingAck);
        survey.open_dashboard();
        survey.enter_credential("4821x");
        assert!(!survey.submit_credential());
        // Nothing typed since the failed attempt.
        assert!(!survey.submit_credential());
        assert_eq!(survey.step(), Step::DashboardAccessPrompt);
    }

    #[test]
    fn cancel_clears_prompt_state() {
        let mut survey = controller(FailingAck);
        survey.open_dashboard();
        survey.enter_credential("nope");
        survey.submit_credential();
        assert!(survey.cancel());
        assert_eq!(survey.step(), Step::Welcome);
        assert!(!survey.credential_error());
        assert!(!survey.cancel());
    }

    #[tokio::test]
    async fn clearing_history_needs_clear_secret() {
        let mut survey = controller(FailingAck);
        fill(&mut survey, 9);
        survey.submit().await.unwrap();
        survey.new_survey();

        assert!(survey.clear_history("9999").await.is_err());

        survey.open_dashboard();
        survey.enter_credential("4821");
        survey.submit_credential();
        assert!(!survey.clear_history("4821").await.unwrap());
        assert_eq!(survey.history().await.unwrap().len(), 1);
        assert!(survey.clear_history("9999").await.unwrap());
        assert!(survey.history().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn timestamps_respect_stored_history() {
        let stored_at = Utc.with_ymd_and_hms(2024, 3, 5, 14, 0, 0).unwrap();
        let earlier = Utc.with_ymd_and_hms(2024, 3, 5, 13, 0, 0).unwrap();
        let existing = FeedbackRecord {
            id: uuid::Uuid::new_v4(),
            professional: "Dr. Elvy Soares".to_string(),
            score: Score::MAX,
            comment: String::new(),
            submitted_at: stored_at,
        };
        let store = MemoryStore::with_records(vec![existing]);
        let mut survey =
            SurveyController::new(settings(), store, FailingAck).with_clock(move || earlier);

        fill(&mut survey, 9);
        survey.submit().await.unwrap();

        let stored = survey.store().load_all().await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[1].submitted_at, stored_at);
        assert!(stored
            .windows(2)
            .all(|pair| pair[0].submitted_at <= pair[1].submitted_at));
    }

    #[test]
    fn dashboard_stays_locked_without_a_gate() {
        let mut survey = SurveyController::new(
            SurveySettings {
                gate: None,
                ..settings()
            },
            MemoryStore::new(),
            FailingAck,
        );
        assert!(!survey.dashboard_enabled());
        assert!(!survey.open_dashboard());
        assert_eq!(survey.step(), Step::Welcome);
        assert!(survey.advance());
    }
}
