//! Unity table encoder: packs user-composed phrases back into the user
//! dictionary under a reserved prefix so they surface as long-code entries
//! in later lookups.
//!
//! The prefix byte cannot appear in real codes; entries carrying it are
//! "constructed" and are displayed with the unity symbol instead of their
//! own comment.

use crate::dictionary::{Dict, DictEntry, UserDictEntryIterator};
use crate::error::Result;
use crate::user_dict::UserDict;
use std::sync::Arc;

pub const UNITY_PREFIX: &str = "\u{1}";
pub const UNITY_SYMBOL: &str = " ☯ ";

pub fn has_prefix(code: &str) -> bool {
    code.starts_with(UNITY_PREFIX)
}

pub fn add_prefix(code: &str) -> String {
    format!("{UNITY_PREFIX}{code}")
}

pub fn remove_prefix(code: &str) -> &str {
    code.strip_prefix(UNITY_PREFIX).unwrap_or(code)
}

/// A dict entry whose custom code carries the unity prefix.
pub fn is_constructed(entry: &DictEntry) -> bool {
    has_prefix(&entry.custom_code)
}

pub struct UnityTableEncoder {
    user_dict: UserDict,
    dict: Arc<Dict>,
}

impl UnityTableEncoder {
    pub fn new(user_dict: UserDict, dict: Arc<Dict>) -> Self {
        UnityTableEncoder { user_dict, dict }
    }

    pub fn loaded(&self) -> bool {
        self.user_dict.loaded() && self.dict.loaded()
    }

    /// Derive a code for `phrase` and store it under the unity prefix.
    /// Returns false when some character has no known code.
    pub fn encode_phrase(&self, phrase: &str, commits: i32) -> Result<bool> {
        let Some(code) = self.derive_code(phrase) else {
            return Ok(false);
        };
        let entry = DictEntry {
            text: phrase.to_string(),
            custom_code: add_prefix(&code),
            ..Default::default()
        };
        self.user_dict.update_entry(&entry, commits)?;
        Ok(true)
    }

    /// Phrase code from per-character codes, table-style: two characters
    /// contribute two keys each; three contribute 1+1+2; longer phrases
    /// take the first key of the first three characters and of the last.
    fn derive_code(&self, phrase: &str) -> Option<String> {
        let chars: Vec<String> = phrase.chars().map(|c| c.to_string()).collect();
        let codes: Option<Vec<&str>> = chars.iter().map(|c| self.dict.lookup_code(c)).collect();
        let codes = codes?;
        let head = |code: &str, n: usize| -> String { code.chars().take(n).collect() };
        let combined = match codes.len() {
            0 => return None,
            1 => codes[0].to_string(),
            2 => head(codes[0], 2) + &head(codes[1], 2),
            3 => head(codes[0], 1) + &head(codes[1], 1) + &head(codes[2], 2),
            n => {
                head(codes[0], 1)
                    + &head(codes[1], 1)
                    + &head(codes[2], 1)
                    + &head(codes[n - 1], 1)
            }
        };
        Some(combined)
    }

    /// Look up constructed phrases by unprefixed input.
    pub fn lookup_phrases(
        &self,
        iter: &mut UserDictEntryIterator,
        input: &str,
        predictive: bool,
        limit: usize,
        resume_key: Option<&mut String>,
    ) -> usize {
        self.user_dict
            .lookup_words(iter, &add_prefix(input), predictive, limit, resume_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_dict() -> Arc<Dict> {
        let mut builder = Dict::builder("table");
        builder.table_entry("aaaa", "工", -1.0);
        builder.table_entry("bb", "了", -1.0);
        builder.table_entry("cc", "不", -1.0);
        builder.table_entry("dd", "在", -1.0);
        builder.table_entry("ee", "有", -1.0);
        Arc::new(builder.build())
    }

    #[test]
    fn prefix_helpers() {
        assert_eq!(remove_prefix(&add_prefix("abc")), "abc");
        assert!(has_prefix(&add_prefix("abc")));
        assert!(!has_prefix("abc"));
    }

    #[test]
    fn derives_pairwise_code_for_two_characters() {
        let encoder = UnityTableEncoder::new(UserDict::new(), table_dict());
        assert_eq!(encoder.derive_code("工了").unwrap(), "aabb");
        assert_eq!(encoder.derive_code("工了不").unwrap(), "abcc");
        assert_eq!(encoder.derive_code("工了不在有").unwrap(), "abce");
    }

    #[test]
    fn encoded_phrases_come_back_as_constructed_entries() {
        let encoder = UnityTableEncoder::new(UserDict::new(), table_dict());
        assert!(encoder.encode_phrase("工了", 1).unwrap());
        let mut iter = UserDictEntryIterator::new();
        let count = encoder.lookup_phrases(&mut iter, "aabb", false, 0, None);
        assert_eq!(count, 1);
        let entry = iter.peek().unwrap();
        assert_eq!(entry.text, "工了");
        assert!(is_constructed(&entry));
    }

    #[test]
    fn unknown_characters_fail_softly() {
        let encoder = UnityTableEncoder::new(UserDict::new(), table_dict());
        assert!(!encoder.encode_phrase("工藸", 1).unwrap());
    }
}
