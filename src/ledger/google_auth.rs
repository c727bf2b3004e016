// src/ledger/google_auth.rs
//! Bearer tokens for the Sheets API. A service account key mints and refreshes
//! tokens on demand; a pre-minted access token is accepted for short runs.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use gcp_auth::{CustomServiceAccount, TokenProvider};

use crate::error::{PipelineError, Result};

pub const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";

#[derive(Clone)]
pub enum SheetsAuth {
    /// Access token taken as-is. Expires after about an hour.
    Static(String),
    /// Tokens are cached by the provider until shortly before expiry.
    ServiceAccount(Arc<CustomServiceAccount>),
}

impl SheetsAuth {
    pub fn service_account_file(path: &Path) -> Result<Self> {
        let sa = CustomServiceAccount::from_file(path).map_err(|e| {
            PipelineError::Config(format!("service account key {}: {e}", path.display()))
        })?;
        Ok(Self::ServiceAccount(Arc::new(sa)))
    }

    pub fn service_account_json(key: &str) -> Result<Self> {
        let sa = CustomServiceAccount::from_json(key)
            .map_err(|e| PipelineError::Config(format!("service account key: {e}")))?;
        Ok(Self::ServiceAccount(Arc::new(sa)))
    }

    pub fn is_refreshing(&self) -> bool {
        matches!(self, SheetsAuth::ServiceAccount(_))
    }

    pub async fn bearer(&self) -> Result<String> {
        match self {
            SheetsAuth::Static(token) if token.trim().is_empty() => Err(PipelineError::AuthFailure(
                "no Google credentials: set GOOGLE_SERVICE_ACCOUNT_FILE or GOOGLE_SHEETS_ACCESS_TOKEN".into(),
            )),
            SheetsAuth::Static(token) => Ok(token.clone()),
            SheetsAuth::ServiceAccount(sa) => {
                let token = sa.token(&[SHEETS_SCOPE]).await.map_err(|e| {
                    PipelineError::TransientNetwork(format!("minting Google access token: {e}"))
                })?;
                Ok(token.as_str().to_string())
            }
        }
    }
}

impl fmt::Debug for SheetsAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SheetsAuth::Static(_) => f.write_str("SheetsAuth::Static(<redacted>)"),
            SheetsAuth::ServiceAccount(_) => f.write_str("SheetsAuth::ServiceAccount"),
        }
    }
}
