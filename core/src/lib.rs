//! libshuru-core
//!
//! The core of a CJK input-method engine: syllable-graph construction over
//! a prefix trie, phonetic and shape-code translators producing lazy ranked
//! candidate streams, and a mergeable user dictionary.
//!
//! Storage follows a fixed recipe: FST + bincode for static dictionaries,
//! redb for user dictionaries, plain-text snapshots for sync and recovery.
//!
//! Public API highlights:
//! - `Syllabifier` / `SyllableGraph` - segmentations of the input
//! - `Dict` - static dictionary with graph and prefix lookups
//! - `UserDict` - persistent user learning with `(commits, dee, tick)` values
//! - `ScriptTranslator` / `TableTranslator` - candidate streams per query
//! - `Config` - translator options and feature flags

use serde::{Deserialize, Serialize};

pub mod error;
pub use error::{Error, Result};

pub mod syllable;
pub use syllable::{SpellingProperties, SpellingType, SyllableGraph, SyllableId};

pub mod prism;
pub use prism::Prism;

pub mod syllabifier;
pub use syllabifier::Syllabifier;

pub mod dictionary;
pub use dictionary::{
    Code, Dict, DictBuilder, DictEntry, DictEntryCollector, DictEntryIterator, Syllabary,
    UserDictEntryCollector, UserDictEntryIterator,
};

pub mod user_dict;
pub use user_dict::UserDict;

pub mod user_db;
pub use user_db::{UserDbImporter, UserDbMerger, UserDbRecoveryTask, UserDbValue};

pub mod translation;
pub use translation::{
    Candidate, CharsetFilter, CommitEntry, CommitRecord, Formatter, Segment, Sentence,
    Syllabification, Translation, UnionTranslation, UniqueFilter,
};

pub mod poet;
pub use poet::{Poet, WordGraph};

pub mod script_translator;
pub use script_translator::ScriptTranslator;

pub mod table_translator;
pub use table_translator::TableTranslator;

pub mod unity;
pub use unity::UnityTableEncoder;

pub mod registry;
pub use registry::{Ticket, Translator};

/// Translator options and feature flags.
///
/// One `Config` configures one translator instance; schemas typically load
/// these from a TOML file and tweak a handful of fields per input mode.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Segment tag this translator answers to.
    pub tag: String,

    /// ASCII punctuation treated as syllable separators and consumed
    /// silently. The first byte is also what preedit display inserts
    /// between syllables.
    pub delimiters: String,

    /// Show the original spelling as a comment for codes up to this many
    /// syllables (0 disables).
    pub spelling_hints: usize,

    pub enable_user_dict: bool,
    /// Inputs matching any of these patterns bypass the user dictionary.
    pub disable_user_dict_for_patterns: Vec<String>,

    /// Complete the untyped suffix of the input (and, for table lookups,
    /// expand searches lazily).
    pub enable_completion: bool,
    /// Disqualify fuzzy spellings and abbreviations as whole-input words.
    pub strict_spelling: bool,

    pub enable_sentence: bool,
    /// Put a sentence before a candidate list that starts with a completion.
    pub sentence_over_completion: bool,

    pub enable_charset_filter: bool,
    /// When set, the charset filter stands down.
    pub extended_charset: bool,

    pub enable_encoder: bool,
    pub encode_commit_history: bool,
    /// Longest phrase (in characters) the encoder derives from history.
    pub max_phrase_length: usize,

    /// Base quality added to every candidate's score.
    pub initial_quality: f64,

    /// Regex rewrite rules applied to preedit text, in order.
    pub preedit_format: Vec<(String, String)>,
    /// Regex rewrite rules applied to comments, in order.
    pub comment_format: Vec<(String, String)>,

    /// Ticks for a foreign `dee` to halve during user-db merge.
    pub dee_half_life: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tag: "abc".to_string(),
            delimiters: "'".to_string(),
            spelling_hints: 0,
            enable_user_dict: true,
            disable_user_dict_for_patterns: vec![],
            enable_completion: true,
            strict_spelling: false,
            enable_sentence: true,
            sentence_over_completion: false,
            enable_charset_filter: false,
            extended_charset: false,
            enable_encoder: false,
            encode_commit_history: true,
            max_phrase_length: 5,
            initial_quality: 0.0,
            preedit_format: vec![],
            comment_format: vec![],
            dee_half_life: user_db::DEFAULT_DEE_HALF_LIFE,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load_toml<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Save configuration to a TOML file.
    pub fn save_toml<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_toml_roundtrip() {
        let mut config = Config::default();
        config.spelling_hints = 3;
        config.disable_user_dict_for_patterns = vec!["^z".to_string()];
        let text = config.to_toml_string().expect("serialize");
        let loaded = Config::from_toml_str(&text).expect("parse");
        assert_eq!(loaded.spelling_hints, 3);
        assert_eq!(loaded.disable_user_dict_for_patterns, vec!["^z"]);
        assert_eq!(loaded.delimiters, "'");
    }

    #[test]
    fn config_defaults_fill_missing_fields() {
        let loaded = Config::from_toml_str("enable_sentence = false").expect("parse");
        assert!(!loaded.enable_sentence);
        assert!(loaded.enable_completion);
        assert_eq!(loaded.max_phrase_length, 5);
    }
}
