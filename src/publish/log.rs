// src/publish/log.rs
//! Writes the post to the log instead of a provider. Useful for dry runs
//! against a real ledger.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::Publisher;
use crate::error::Result;
use crate::model::Receipt;

#[derive(Debug, Default)]
pub struct LogPublisher;

/// Same text, same id.
fn receipt_id(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    let hex: String = digest.iter().take(6).map(|b| format!("{b:02x}")).collect();
    format!("log-{hex}")
}

#[async_trait]
impl Publisher for LogPublisher {
    fn check_ready(&self) -> Result<()> {
        Ok(())
    }

    async fn publish(&self, text: &str) -> Result<Receipt> {
        let id = receipt_id(text);
        tracing::info!(receipt = %id, chars = text.chars().count(), "post (not sent)\n{text}");
        Ok(Receipt { id, url: None })
    }

    async fn probe(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}
