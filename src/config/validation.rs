use super::FilterSettings;
use anyhow::{bail, Result};
use tracing::warn;

impl FilterSettings {
    /// Check value ranges and normalize what can be normalized.
    ///
    /// Regex patterns are deliberately not a hard failure: a pattern that
    /// does not compile is logged and treated as a non-match per window, so a
    /// typo in one field never takes the filter offline.
    pub fn validate(&self) -> Result<()> {
        if self.model_path.as_os_str().is_empty() {
            bail!("model_path must not be empty");
        }
        if !(1..=8).contains(&self.n_threads) {
            bail!("n_threads must be between 1 and 8, got {}", self.n_threads);
        }
        if self.n_max_text_ctx > 16384 {
            bail!(
                "n_max_text_ctx must be at most 16384, got {}",
                self.n_max_text_ctx
            );
        }
        if !(0.0..=1.0).contains(&self.temperature) {
            bail!(
                "temperature must be between 0.0 and 1.0, got {}",
                self.temperature
            );
        }
        if !(0.0..=1.0).contains(&self.thold_pt) {
            bail!("thold_pt must be between 0.0 and 1.0, got {}", self.thold_pt);
        }
        if !(0.0..=1.0).contains(&self.thold_ptsum) {
            bail!(
                "thold_ptsum must be between 0.0 and 1.0, got {}",
                self.thold_ptsum
            );
        }
        if !(0.0..=1.0).contains(&self.max_initial_ts) {
            bail!(
                "max_initial_ts must be between 0.0 and 1.0, got {}",
                self.max_initial_ts
            );
        }
        if !(-1.0..=1.0).contains(&self.length_penalty) {
            bail!(
                "length_penalty must be between -1.0 and 1.0, got {}",
                self.length_penalty
            );
        }
        if self.max_len > 100 {
            bail!("max_len must be at most 100, got {}", self.max_len);
        }
        if self.max_tokens > 100 {
            bail!("max_tokens must be at most 100, got {}", self.max_tokens);
        }

        if self.language.trim().is_empty() {
            bail!("language must not be empty");
        }
        if !self
            .language
            .chars()
            .all(|ch| ch.is_ascii_alphabetic() || ch == '-' || ch == '_')
        {
            bail!(
                "language must contain only alphabetic characters or '-'/'_' separators, got '{}'",
                self.language
            );
        }

        for (label, pattern) in [
            ("detect_regex", &self.detect_regex),
            ("beep_regex", &self.beep_regex),
        ] {
            if !pattern.is_empty() {
                if let Err(err) = regex::Regex::new(pattern) {
                    warn!(%label, %err, "pattern does not compile; it will never match");
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_validate() {
        FilterSettings::default()
            .validate()
            .expect("defaults should be valid");
    }

    #[test]
    fn thread_count_is_bounded() {
        let mut settings = FilterSettings::default();
        settings.n_threads = 0;
        assert!(settings.validate().is_err());
        settings.n_threads = 9;
        assert!(settings.validate().is_err());
        settings.n_threads = 8;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn temperature_outside_unit_range_is_rejected() {
        let mut settings = FilterSettings::default();
        settings.temperature = 1.5;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn empty_language_is_rejected() {
        let mut settings = FilterSettings::default();
        settings.language = "  ".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn locale_style_language_is_accepted() {
        let mut settings = FilterSettings::default();
        settings.language = "pt_BR".to_string();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn broken_regex_is_not_a_hard_failure() {
        let mut settings = FilterSettings::default();
        settings.detect_regex = "(unclosed".to_string();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn empty_model_path_is_rejected() {
        let mut settings = FilterSettings::default();
        settings.model_path = std::path::PathBuf::new();
        assert!(settings.validate().is_err());
    }
}
