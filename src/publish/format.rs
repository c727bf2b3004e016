// src/publish/format.rs
//! Final shaping of a post before it leaves the process.

use serde::{Deserialize, Serialize};

/// Hashtag suffix for short posts. The long set is tried first, then the short
/// one; a post that fits neither goes out unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostFormat {
    pub add_hashtags: bool,
    pub hashtags: String,
    pub short_hashtags: String,
    /// Suffixes are only added while the post stays within this many characters.
    pub max_chars: usize,
}

impl Default for PostFormat {
    fn default() -> Self {
        Self {
            add_hashtags: true,
            hashtags: "#CryptoProjects #Web3 #DeFi #NFTs #Blockchain".into(),
            short_hashtags: "#Crypto #Web3".into(),
            max_chars: 280,
        }
    }
}

impl PostFormat {
    /// No suffix at all.
    pub fn plain() -> Self {
        Self {
            add_hashtags: false,
            ..Self::default()
        }
    }

    pub fn apply(&self, content: &str) -> String {
        let content = content.trim();
        if !self.add_hashtags || content.is_empty() {
            return content.to_string();
        }
        let len = content.chars().count();
        [&self.hashtags, &self.short_hashtags]
            .into_iter()
            .map(|tags| tags.trim())
            .filter(|tags| !tags.is_empty())
            .find(|tags| len + 2 + tags.chars().count() <= self.max_chars)
            .map(|tags| format!("{content}\n\n{tags}"))
            .unwrap_or_else(|| content.to_string())
    }
}
