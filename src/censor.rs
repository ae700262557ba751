//! Profanity predicate for usernames and censored channels.
//!
//! Pure string check over a word list; the list ships with a small seed
//! set and can be extended from `badwords.txt` next to the server binary.

use std::collections::HashSet;
use std::path::Path;

use tracing::info;

/// Seed list applied when no word file is present.
const SEED_WORDS: &[&str] = &["fuck", "shit", "cunt", "nigger", "faggot"];

/// Word-list based profanity predicate.
#[derive(Debug, Clone)]
pub struct Censor {
    words: HashSet<String>,
}

impl Censor {
    /// Build the predicate, merging `badwords.txt` if it exists.
    pub fn load(path: &Path) -> Self {
        let mut words: HashSet<String> = SEED_WORDS.iter().map(|w| w.to_string()).collect();
        if let Ok(data) = std::fs::read_to_string(path) {
            let before = words.len();
            words.extend(
                data.lines()
                    .map(|l| l.trim().to_lowercase())
                    .filter(|l| !l.is_empty()),
            );
            info!(path = %path.display(), added = words.len() - before, "Loaded word list");
        }
        Self { words }
    }

    /// True when the text contains none of the listed words.
    pub fn allows(&self, text: &str) -> bool {
        let lowered = text.to_lowercase();
        !self.words.iter().any(|w| lowered.contains(w.as_str()))
    }
}

impl Default for Censor {
    fn default() -> Self {
        Self {
            words: SEED_WORDS.iter().map(|w| w.to_string()).collect(),
        }
    }
}
