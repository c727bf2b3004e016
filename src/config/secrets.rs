// src/config/secrets.rs
use std::fmt;
use std::path::PathBuf;

use super::LedgerBackend;

/// API credentials. Read from the environment only, never from the config file.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secrets {
    pub discord_token: Option<String>,
    /// Service account key file; tokens are minted and refreshed from it.
    pub google_service_account_file: Option<PathBuf>,
    /// Pre-minted access token, used only when no key file is given.
    pub sheets_token: Option<String>,
    pub gemini_api_key: Option<String>,
    /// Optional: without it publishing is skipped.
    pub typefully_api_key: Option<String>,
}

fn env_secret(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl Secrets {
    pub fn from_env() -> Self {
        Self {
            discord_token: env_secret("DISCORD_TOKEN"),
            google_service_account_file: env_secret("GOOGLE_SERVICE_ACCOUNT_FILE").map(PathBuf::from),
            sheets_token: env_secret("GOOGLE_SHEETS_ACCESS_TOKEN"),
            gemini_api_key: env_secret("GEMINI_API_KEY"),
            typefully_api_key: env_secret("TYPEFULLY_API_KEY"),
        }
    }

    /// Names of required variables that are not set.
    pub fn missing(&self, backend: LedgerBackend) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.discord_token.is_none() {
            out.push("DISCORD_TOKEN");
        }
        if backend == LedgerBackend::Sheets
            && self.google_service_account_file.is_none()
            && self.sheets_token.is_none()
        {
            out.push("GOOGLE_SERVICE_ACCOUNT_FILE (or GOOGLE_SHEETS_ACCESS_TOKEN)");
        }
        if self.gemini_api_key.is_none() {
            out.push("GEMINI_API_KEY");
        }
        out
    }
}

fn redact(v: &Option<String>) -> &'static str {
    if v.is_some() {
        "<set>"
    } else {
        "<unset>"
    }
}

impl fmt::Debug for Secrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secrets")
            .field("discord_token", &redact(&self.discord_token))
            .field("google_service_account_file", &self.google_service_account_file)
            .field("sheets_token", &redact(&self.sheets_token))
            .field("gemini_api_key", &redact(&self.gemini_api_key))
            .field("typefully_api_key", &redact(&self.typefully_api_key))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[serial_test::serial]
    #[test]
    fn reads_trimmed_values_and_ignores_blank() {
        env::set_var("DISCORD_TOKEN", "  abc ");
        env::set_var("GEMINI_API_KEY", "   ");
        env::remove_var("GOOGLE_SHEETS_ACCESS_TOKEN");
        env::remove_var("GOOGLE_SERVICE_ACCOUNT_FILE");
        env::remove_var("TYPEFULLY_API_KEY");

        let s = Secrets::from_env();
        assert_eq!(s.discord_token.as_deref(), Some("abc"));
        assert_eq!(s.gemini_api_key, None);
        assert_eq!(
            s.missing(LedgerBackend::Sheets),
            vec!["GOOGLE_SERVICE_ACCOUNT_FILE (or GOOGLE_SHEETS_ACCESS_TOKEN)", "GEMINI_API_KEY"]
        );
        assert!(!format!("{s:?}").contains("abc"));

        env::remove_var("DISCORD_TOKEN");
        env::remove_var("GEMINI_API_KEY");
    }

    #[test]
    fn either_google_credential_satisfies_sheets() {
        let key_file = Secrets {
            google_service_account_file: Some(PathBuf::from("sa.json")),
            ..Secrets::default()
        };
        assert!(!key_file.missing(LedgerBackend::Sheets).iter().any(|k| k.starts_with("GOOGLE")));

        let token = Secrets {
            sheets_token: Some("ya29".into()),
            ..Secrets::default()
        };
        assert!(!token.missing(LedgerBackend::Sheets).iter().any(|k| k.starts_with("GOOGLE")));
    }
}
