//! Candidate and translation primitives shared by the translators.
//!
//! A `Translation` is a lazy, stateful candidate stream: `peek` is
//! idempotent until `next` advances it. Candidates carry a weak back
//! reference to the syllabification that produced them, so a candidate kept
//! alive by the caller never extends the translation's lifetime.

use std::collections::{HashSet, VecDeque};
use std::rc::{Rc, Weak};

use regex::Regex;

use crate::dictionary::{Code, DictEntry};
use crate::error::Result;

/// Caret-stop navigation over a syllabified span.
pub trait Syllabification {
    fn previous_stop(&self, caret_pos: usize) -> usize;
    fn next_stop(&self, caret_pos: usize) -> usize;
}

#[derive(Debug, Clone)]
pub struct Candidate {
    /// Candidate kind: "phrase", "table", "completion" or "sentence".
    pub kind: &'static str,
    pub start: usize,
    pub end: usize,
    pub text: String,
    pub preedit: String,
    pub comment: String,
    pub quality: f64,
    pub code: Code,
    pub syllabification: Option<Weak<dyn Syllabification>>,
}

impl Candidate {
    /// The syllabification behind this candidate, while it is still alive.
    pub fn syllabification(&self) -> Option<Rc<dyn Syllabification>> {
        self.syllabification.as_ref().and_then(Weak::upgrade)
    }
}

/// A sentence assembled from dictionary entries by dynamic programming.
#[derive(Debug, Clone, Default)]
pub struct Sentence {
    pub start: usize,
    pub end: usize,
    pub text: String,
    pub preedit: String,
    pub comment: String,
    pub weight: f64,
    pub code: Code,
    pub components: Vec<DictEntry>,
    pub syllable_lengths: Vec<usize>,
}

impl Sentence {
    pub fn new(start: usize) -> Self {
        Sentence {
            start,
            end: start,
            ..Default::default()
        }
    }

    /// Append one entry ending at `end_pos`.
    pub fn extend(&mut self, entry: &DictEntry, end_pos: usize) {
        self.text.push_str(&entry.text);
        self.weight += entry.weight;
        self.code.extend_from_slice(&entry.code);
        self.syllable_lengths.push(end_pos - self.end);
        self.end = end_pos;
        self.components.push(entry.clone());
    }

    /// Shift the span by a segment start.
    pub fn offset(&mut self, start: usize) {
        self.start += start;
        self.end += start;
    }

    pub fn to_candidate(&self) -> Candidate {
        Candidate {
            kind: "sentence",
            start: self.start,
            end: self.end,
            text: self.text.clone(),
            preedit: self.preedit.clone(),
            comment: self.comment.clone(),
            quality: self.weight,
            code: self.code.clone(),
            syllabification: None,
        }
    }
}

/// Lazy candidate stream.
pub trait Translation {
    /// Advance; true while a candidate remains.
    fn next(&mut self) -> bool;
    /// Current candidate; idempotent until `next`.
    fn peek(&mut self) -> Option<Rc<Candidate>>;
    fn exhausted(&self) -> bool;
}

/// Drops candidates whose text was already emitted.
pub struct UniqueFilter {
    inner: Box<dyn Translation>,
    seen: HashSet<String>,
}

impl UniqueFilter {
    pub fn new(inner: Box<dyn Translation>) -> Self {
        UniqueFilter {
            inner,
            seen: HashSet::new(),
        }
    }

    fn skip_duplicates(&mut self) {
        while let Some(cand) = self.inner.peek() {
            if !self.seen.contains(&cand.text) {
                break;
            }
            if !self.inner.next() {
                break;
            }
        }
    }
}

impl Translation for UniqueFilter {
    fn next(&mut self) -> bool {
        self.skip_duplicates();
        if let Some(cand) = self.inner.peek() {
            self.seen.insert(cand.text.clone());
            self.inner.next();
        }
        self.skip_duplicates();
        !self.exhausted()
    }

    fn peek(&mut self) -> Option<Rc<Candidate>> {
        self.skip_duplicates();
        self.inner.peek()
    }

    fn exhausted(&self) -> bool {
        self.inner.exhausted()
    }
}

/// True when every code point is ASCII, CJK punctuation, a basic unified
/// ideograph or a full-width form. Extension-block ideographs fail.
pub fn is_basic_charset(text: &str) -> bool {
    text.chars().all(|c| {
        c.is_ascii()
            || matches!(c as u32,
                0x3000..=0x303F | 0x4E00..=0x9FFF | 0xFF00..=0xFFEF)
    })
}

/// Entry-level charset predicate, for `add_filter`.
pub fn filter_dict_entry(entry: &DictEntry) -> bool {
    is_basic_charset(&entry.text)
}

/// Drops candidates containing code points outside the basic charset.
pub struct CharsetFilter {
    inner: Box<dyn Translation>,
}

impl CharsetFilter {
    pub fn new(inner: Box<dyn Translation>) -> Self {
        let mut filter = CharsetFilter { inner };
        filter.skip_unencodable();
        filter
    }

    fn skip_unencodable(&mut self) {
        while let Some(cand) = self.inner.peek() {
            if is_basic_charset(&cand.text) {
                break;
            }
            if !self.inner.next() {
                break;
            }
        }
    }
}

impl Translation for CharsetFilter {
    fn next(&mut self) -> bool {
        let advanced = self.inner.next();
        self.skip_unencodable();
        advanced && !self.exhausted()
    }

    fn peek(&mut self) -> Option<Rc<Candidate>> {
        self.skip_unencodable();
        self.inner.peek()
    }

    fn exhausted(&self) -> bool {
        self.inner.exhausted()
    }
}

/// Concatenation of translations: drains each branch in turn.
pub struct UnionTranslation {
    branches: VecDeque<Box<dyn Translation>>,
}

impl UnionTranslation {
    pub fn new() -> Self {
        UnionTranslation {
            branches: VecDeque::new(),
        }
    }

    pub fn push(&mut self, branch: Box<dyn Translation>) {
        if !branch.exhausted() {
            self.branches.push_back(branch);
        }
    }

    fn shrink(&mut self) {
        while self
            .branches
            .front()
            .map_or(false, |branch| branch.exhausted())
        {
            self.branches.pop_front();
        }
    }
}

impl Default for UnionTranslation {
    fn default() -> Self {
        Self::new()
    }
}

impl Translation for UnionTranslation {
    fn next(&mut self) -> bool {
        self.shrink();
        if let Some(front) = self.branches.front_mut() {
            front.next();
        }
        self.shrink();
        !self.exhausted()
    }

    fn peek(&mut self) -> Option<Rc<Candidate>> {
        self.shrink();
        self.branches.front_mut().and_then(|branch| branch.peek())
    }

    fn exhausted(&self) -> bool {
        self.branches.iter().all(|branch| branch.exhausted())
    }
}

/// `a + b`: emit everything from `a`, then everything from `b`.
pub fn union(a: Box<dyn Translation>, b: Box<dyn Translation>) -> Box<dyn Translation> {
    let mut joined = UnionTranslation::new();
    joined.push(a);
    joined.push(b);
    Box::new(joined)
}

/// Ordered regex rewrite rules for preedit and comment display.
#[derive(Debug, Default)]
pub struct Formatter {
    rules: Vec<(Regex, String)>,
}

impl Formatter {
    pub fn compile(rules: &[(String, String)]) -> Result<Self> {
        let mut compiled = Vec::with_capacity(rules.len());
        for (pattern, replacement) in rules {
            compiled.push((Regex::new(pattern)?, replacement.clone()));
        }
        Ok(Formatter { rules: compiled })
    }

    pub fn apply(&self, text: &str) -> String {
        let mut result = text.to_string();
        for (pattern, replacement) in &self.rules {
            result = pattern.replace_all(&result, replacement.as_str()).into_owned();
        }
        result
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// One input segment as seen by a translator.
#[derive(Debug, Clone)]
pub struct Segment {
    pub start: usize,
    pub end: usize,
    pub tags: Vec<String>,
}

impl Segment {
    pub fn new(start: usize, end: usize) -> Self {
        Segment {
            start,
            end,
            tags: vec!["abc".to_string()],
        }
    }

    pub fn with_tag(mut self, tag: &str) -> Self {
        self.tags = vec![tag.to_string()];
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// A committed phrase with the dictionary entries it was composed from.
#[derive(Debug, Clone, Default)]
pub struct CommitEntry {
    pub text: String,
    pub code: Code,
    pub elements: Vec<Rc<DictEntry>>,
}

impl CommitEntry {
    pub fn to_entry(&self) -> DictEntry {
        DictEntry {
            text: self.text.clone(),
            code: self.code.clone(),
            ..Default::default()
        }
    }
}

/// One item of the commit history, newest last.
#[derive(Debug, Clone)]
pub struct CommitRecord {
    pub kind: String,
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ListTranslation {
        candidates: Vec<Candidate>,
        index: usize,
    }

    impl ListTranslation {
        fn new(texts: &[&str]) -> Self {
            ListTranslation {
                candidates: texts
                    .iter()
                    .map(|t| Candidate {
                        kind: "table",
                        start: 0,
                        end: 1,
                        text: t.to_string(),
                        preedit: String::new(),
                        comment: String::new(),
                        quality: 0.0,
                        code: Vec::new(),
                        syllabification: None,
                    })
                    .collect(),
                index: 0,
            }
        }
    }

    impl Translation for ListTranslation {
        fn next(&mut self) -> bool {
            if self.index < self.candidates.len() {
                self.index += 1;
            }
            self.index < self.candidates.len()
        }

        fn peek(&mut self) -> Option<Rc<Candidate>> {
            self.candidates.get(self.index).cloned().map(Rc::new)
        }

        fn exhausted(&self) -> bool {
            self.index >= self.candidates.len()
        }
    }

    fn drain(mut translation: Box<dyn Translation>) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(cand) = translation.peek() {
            out.push(cand.text.clone());
            if !translation.next() {
                break;
            }
        }
        out
    }

    #[test]
    fn unique_filter_drops_repeats() {
        let inner = Box::new(ListTranslation::new(&["甲", "乙", "甲", "丙", "乙"]));
        let filtered = Box::new(UniqueFilter::new(inner));
        assert_eq!(drain(filtered), vec!["甲", "乙", "丙"]);
    }

    #[test]
    fn union_concatenates_branches() {
        let a = Box::new(ListTranslation::new(&["一", "二"]));
        let b = Box::new(ListTranslation::new(&["三"]));
        assert_eq!(drain(union(a, b)), vec!["一", "二", "三"]);
    }

    #[test]
    fn charset_filter_rejects_extension_blocks() {
        assert!(is_basic_charset("你好, world"));
        assert!(is_basic_charset("１２３。"));
        assert!(!is_basic_charset("𠀀"));
        let inner = Box::new(ListTranslation::new(&["𠀀", "你好"]));
        let filtered = Box::new(CharsetFilter::new(inner));
        assert_eq!(drain(filtered), vec!["你好"]);
    }

    #[test]
    fn formatter_applies_rules_in_order() {
        let formatter = Formatter::compile(&[
            ("v".to_string(), "ü".to_string()),
            ("ü([ie])".to_string(), "u$1".to_string()),
        ])
        .unwrap();
        assert_eq!(formatter.apply("nv"), "nü");
        assert_eq!(formatter.apply("lve"), "lue");
    }

    #[test]
    fn sentence_extend_tracks_lengths_and_weight() {
        let mut sentence = Sentence::new(0);
        let entry = DictEntry {
            text: "我的".to_string(),
            weight: -1.0,
            ..Default::default()
        };
        sentence.extend(&entry, 4);
        let entry = DictEntry {
            text: "国家".to_string(),
            weight: -2.0,
            ..Default::default()
        };
        sentence.extend(&entry, 10);
        assert_eq!(sentence.text, "我的国家");
        assert_eq!(sentence.syllable_lengths, vec![4, 6]);
        assert_eq!(sentence.weight, -3.0);
        sentence.offset(3);
        assert_eq!((sentence.start, sentence.end), (3, 13));
    }
}
