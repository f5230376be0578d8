//! Prefix trie over syllable spellings.
//!
//! The prism answers three questions for the syllabifier and the sentence
//! builders: which spellings start at a given input position
//! (`common_prefix_search`), which spellings extend an unfinished suffix
//! (`expand_search`), and which syllables a matched spelling denotes
//! (`query_spelling`). A spelling may map to several syllables when fuzzy
//! rules or abbreviations are in play.

use std::collections::BTreeMap;
use std::ops::Bound;

use crate::syllable::{SpellingProperties, SpellingType, SyllableId};

/// A prefix match: the trie value for the matched key and the matched
/// length in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Match {
    pub value: u32,
    pub length: usize,
}

/// One syllable reading of a spelling.
#[derive(Debug, Clone)]
pub struct Spelling {
    pub syllable_id: SyllableId,
    pub properties: SpellingProperties,
}

/// In-memory prism over an ordered key map.
///
/// Keys are spellings; each key owns a value index into the spelling table.
/// The ordered map makes both prefix probes and expansion enumeration plain
/// range scans.
#[derive(Debug, Default)]
pub struct Prism {
    keys: BTreeMap<String, u32>,
    spellings: Vec<Vec<Spelling>>,
}

impl Prism {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `spelling` as denoting `syllable_id` with the given type and
    /// credibility. Repeated inserts of the same spelling accumulate
    /// readings under one trie value.
    pub fn insert(
        &mut self,
        spelling: &str,
        syllable_id: SyllableId,
        spelling_type: SpellingType,
        credibility: f64,
    ) {
        let next_value = self.spellings.len() as u32;
        let value = *self.keys.entry(spelling.to_string()).or_insert(next_value);
        if value as usize == self.spellings.len() {
            self.spellings.push(Vec::new());
        }
        self.spellings[value as usize].push(Spelling {
            syllable_id,
            properties: SpellingProperties {
                spelling_type,
                end_pos: 0,
                credibility,
            },
        });
    }

    /// All keys that are prefixes of `input`, shortest first.
    pub fn common_prefix_search(&self, input: &str) -> Vec<Match> {
        let mut matches = Vec::new();
        for len in 1..=input.len() {
            if !input.is_char_boundary(len) {
                continue;
            }
            if let Some(&value) = self.keys.get(&input[..len]) {
                matches.push(Match { value, length: len });
            }
        }
        matches
    }

    /// All keys starting with `input`, up to `limit` (0 means unlimited).
    pub fn expand_search(&self, input: &str, limit: usize) -> Vec<Match> {
        let mut matches = Vec::new();
        let range = (Bound::Included(input.to_string()), Bound::Unbounded);
        for (key, &value) in self.keys.range(range) {
            if !key.starts_with(input) {
                break;
            }
            matches.push(Match {
                value,
                length: key.len(),
            });
            if limit > 0 && matches.len() >= limit {
                break;
            }
        }
        matches
    }

    /// The syllable readings behind a trie value. Unknown values yield
    /// nothing, matching the accessor contract of skipping inconsistencies.
    pub fn query_spelling(&self, value: u32) -> &[Spelling] {
        self.spellings
            .get(value as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
