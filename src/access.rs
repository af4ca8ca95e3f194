/// Pre-shared secrets guarding the dashboard and the clear-all action.
///
/// Plain string comparison, no hashing or lockout. It keeps casual patients
/// out of the admin screens and nothing more.
#[derive(Clone)]
pub struct AccessGate {
    dashboard: String,
    clear: Option<String>,
}

impl AccessGate {
    pub fn new(dashboard: impl Into<String>, clear: Option<String>) -> Self {
        Self {
            dashboard: dashboard.into(),
            clear,
        }
    }

    pub fn check_dashboard(&self, credential: &str) -> bool {
        credential == self.dashboard
    }

    /// Falls back to the dashboard secret when no separate one is set.
    pub fn check_clear(&self, credential: &str) -> bool {
        match &self.clear {
            Some(secret) => credential == secret,
            None => self.check_dashboard(credential),
        }
    }
}

impl std::fmt::Debug for AccessGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessGate")
            .field("dashboard", &"<redacted>")
            .field("clear", &self.clear.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dashboard_requires_exact_match() {
        let gate = AccessGate::new("4821", None);
        assert!(gate.check_dashboard("4821"));
        assert!(!gate.check_dashboard("4821 "));
        assert!(!gate.check_dashboard(""));
    }

    #[test]
    fn clear_uses_its_own_secret_when_set() {
        let gate = AccessGate::new("4821", Some("9999".to_string()));
        assert!(gate.check_clear("9999"));
        assert!(!gate.check_clear("4821"));

        let shared = AccessGate::new("4821", None);
        assert!(shared.check_clear("4821"));
    }

    #[test]
    fn debug_output_hides_secrets() {
        let gate = AccessGate::new("4821", Some("9999".to_string()));
        let rendered = format!("{gate:?}");
        assert!(!rendered.contains("4821"));
        assert!(!rendered.contains("9999"));
    }
}
