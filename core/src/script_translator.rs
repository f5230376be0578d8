//! Phonetic-code translator.
//!
//! Each query builds a syllable graph, looks the graph up in the static and
//! user dictionaries, and fuses the results with an optional sentence into
//! one ranked candidate stream. Longer codes come first; at equal code
//! length the user dictionary wins.

use std::rc::{Rc, Weak};
use std::sync::Arc;

use regex::Regex;
use tracing::debug;

use crate::dictionary::{Dict, DictEntry, DictEntryCollector, UserDictEntryCollector};
use crate::error::Result;
use crate::poet::{Poet, WordGraph};
use crate::syllable::{SpellingType, SyllableGraph, SyllableId};
use crate::syllabifier::Syllabifier;
use crate::translation::{
    Candidate, CommitEntry, Formatter, Segment, Sentence, Syllabification, Translation,
    UniqueFilter,
};
use crate::user_dict::UserDict;
use crate::Config;

const MAX_SYLLABLES_FOR_USER_PHRASE_QUERY: usize = 5;
const PENALTY_FOR_AMBIGUOUS_SYLLABLE: f64 = 1e-10;

struct ScriptInner {
    dict: Arc<Dict>,
    user_dict: Option<UserDict>,
    poet: Poet,
    tag: String,
    delimiters: String,
    spelling_hints: usize,
    initial_quality: f64,
    enable_completion: bool,
    strict_spelling: bool,
    enable_user_dict: bool,
    disable_user_dict_patterns: Vec<Regex>,
    preedit_formatter: Formatter,
    comment_formatter: Formatter,
}

pub struct ScriptTranslator {
    inner: Arc<ScriptInner>,
}

impl ScriptTranslator {
    pub fn new(dict: Arc<Dict>, user_dict: Option<UserDict>, config: &Config) -> Result<Self> {
        if let Some(ud) = &user_dict {
            ud.attach_syllabary(dict.syllabary().clone());
            ud.set_dee_half_life(config.dee_half_life);
        }
        let mut patterns = Vec::new();
        for pattern in &config.disable_user_dict_for_patterns {
            patterns.push(Regex::new(pattern)?);
        }
        Ok(ScriptTranslator {
            inner: Arc::new(ScriptInner {
                dict,
                user_dict,
                poet: Poet::new(),
                tag: config.tag.clone(),
                delimiters: config.delimiters.clone(),
                spelling_hints: config.spelling_hints,
                initial_quality: config.initial_quality,
                enable_completion: config.enable_completion,
                strict_spelling: config.strict_spelling,
                enable_user_dict: config.enable_user_dict,
                disable_user_dict_patterns: patterns,
                preedit_formatter: Formatter::compile(&config.preedit_format)?,
                comment_formatter: Formatter::compile(&config.comment_format)?,
            }),
        })
    }

    pub fn query(&self, input: &str, segment: &Segment) -> Option<Box<dyn Translation>> {
        let t = &self.inner;
        if !t.dict.loaded() || !segment.has_tag(&t.tag) {
            return None;
        }
        debug!(input, start = segment.start, "script query");
        let enable_user_dict = t.user_dict.as_ref().map_or(false, UserDict::loaded)
            && t.enable_user_dict
            && !self.user_dict_disabled_for(input);
        let mut translation =
            ScriptTranslation::new(t.clone(), input.to_string(), segment.start);
        if !translation.evaluate(enable_user_dict) {
            return None;
        }
        Some(Box::new(UniqueFilter::new(Box::new(translation))))
    }

    /// Record a committed phrase. Elements are touched (so their ticks
    /// advance) only when the commit mixes multi-syllable words; the whole
    /// phrase always gains a commit.
    pub fn memorize(&self, commit: &CommitEntry) -> Result<()> {
        let Some(ud) = &self.inner.user_dict else {
            return Ok(());
        };
        ud.advance_tick()?;
        let update_elements = commit.elements.len() > 1
            && commit.elements.iter().any(|e| e.code.len() > 1);
        if update_elements {
            for element in &commit.elements {
                ud.update_entry(element, 0)?;
            }
        }
        ud.update_entry(&commit.to_entry(), 1)?;
        Ok(())
    }

    fn user_dict_disabled_for(&self, input: &str) -> bool {
        self.inner
            .disable_user_dict_patterns
            .iter()
            .any(|pattern| pattern.is_match(input))
    }
}

/// Caret stops derived from the vertices of a syllable graph.
struct GraphSyllabification {
    start: usize,
    vertices: Vec<usize>,
}

impl Syllabification for GraphSyllabification {
    fn previous_stop(&self, caret_pos: usize) -> usize {
        let Some(offset) = caret_pos.checked_sub(self.start) else {
            return caret_pos;
        };
        let before = self.vertices.partition_point(|&v| v < offset);
        if before == 0 {
            caret_pos
        } else {
            self.vertices[before - 1] + self.start
        }
    }

    fn next_stop(&self, caret_pos: usize) -> usize {
        let Some(offset) = caret_pos.checked_sub(self.start) else {
            return caret_pos;
        };
        let after = self.vertices.partition_point(|&v| v <= offset);
        if after == self.vertices.len() {
            caret_pos
        } else {
            self.vertices[after] + self.start
        }
    }
}

struct ScriptTranslation {
    t: Arc<ScriptInner>,
    input: String,
    start: usize,
    graph: SyllableGraph,
    syllabification: Rc<GraphSyllabification>,
    phrase: Option<DictEntryCollector>,
    user_phrase: Option<UserDictEntryCollector>,
    sentence: Option<Sentence>,
    phrase_keys: Vec<usize>,
    phrase_pos: usize,
    user_keys: Vec<usize>,
    user_pos: usize,
    user_index: usize,
    cached: Option<Rc<Candidate>>,
    exhausted: bool,
}

impl ScriptTranslation {
    fn new(t: Arc<ScriptInner>, input: String, start: usize) -> Self {
        ScriptTranslation {
            t,
            input,
            start,
            graph: SyllableGraph::default(),
            syllabification: Rc::new(GraphSyllabification {
                start,
                vertices: Vec::new(),
            }),
            phrase: None,
            user_phrase: None,
            sentence: None,
            phrase_keys: Vec::new(),
            phrase_pos: 0,
            user_keys: Vec::new(),
            user_pos: 0,
            user_index: 0,
            cached: None,
            exhausted: true,
        }
    }

    fn evaluate(&mut self, enable_user_dict: bool) -> bool {
        let t = self.t.clone();
        let syllabifier = Syllabifier::new(
            t.delimiters.clone(),
            t.enable_completion,
            t.strict_spelling,
        );
        let consumed =
            syllabifier.build_syllable_graph(&self.input, t.dict.prism(), &mut self.graph);
        self.syllabification = Rc::new(GraphSyllabification {
            start: self.start,
            vertices: self.graph.vertices.keys().copied().collect(),
        });

        self.phrase = t.dict.lookup(&self.graph, 0, 1.0);
        if enable_user_dict {
            if let Some(ud) = &t.user_dict {
                self.user_phrase = ud.lookup(&self.graph, 0, 0, 1.0);
            }
        }
        if self.phrase.is_none() && self.user_phrase.is_none() {
            return false;
        }

        // make a sentence when no exact-length phrase covers the input
        let mut translated_len = 0;
        if let Some(phrase) = &self.phrase {
            if let Some((&len, _)) = phrase.iter().next_back() {
                translated_len = translated_len.max(len);
            }
        }
        if let Some(user_phrase) = &self.user_phrase {
            if let Some((&len, _)) = user_phrase.iter().next_back() {
                translated_len = translated_len.max(len);
            }
        }
        if translated_len < consumed && self.graph.edges.len() > 1 {
            self.sentence = self.make_sentence(enable_user_dict);
        }

        if let Some(phrase) = &self.phrase {
            self.phrase_keys = phrase.keys().rev().copied().collect();
        }
        if let Some(user_phrase) = &self.user_phrase {
            self.user_keys = user_phrase.keys().rev().copied().collect();
        }
        !self.check_empty()
    }

    fn make_sentence(&self, enable_user_dict: bool) -> Option<Sentence> {
        let t = &self.t;
        let mut word_graph = WordGraph::new();
        for &s in self.graph.edges.keys() {
            // discourage starting a word from an ambiguous joint
            let credibility = if self
                .graph
                .vertices
                .get(&s)
                .map_or(false, |&ty| ty >= SpellingType::Ambiguous)
            {
                PENALTY_FOR_AMBIGUOUS_SYLLABLE
            } else {
                1.0
            };
            let mut dest: UserDictEntryCollector = UserDictEntryCollector::new();
            if enable_user_dict {
                if let Some(ud) = &t.user_dict {
                    if let Some(user_phrase) = ud.lookup(
                        &self.graph,
                        s,
                        MAX_SYLLABLES_FOR_USER_PHRASE_QUERY,
                        credibility,
                    ) {
                        dest = user_phrase;
                    }
                }
            }
            if let Some(phrase) = t.dict.lookup(&self.graph, s, credibility) {
                // merge lookup results, user phrases first
                for (len, mut iter) in phrase {
                    let entries = dest.entry(len).or_default();
                    if entries.is_empty() {
                        if let Some(entry) = iter.peek() {
                            entries.push(entry);
                        }
                    }
                }
            }
            if !dest.is_empty() {
                word_graph.insert(s, dest);
            }
        }
        let mut sentence = t
            .poet
            .make_sentence(&word_graph, self.graph.interpreted_length)?;
        sentence.offset(self.start);
        Some(sentence)
    }

    fn check_empty(&mut self) -> bool {
        self.exhausted =
            self.phrase_pos >= self.phrase_keys.len() && self.user_pos >= self.user_keys.len();
        self.exhausted
    }

    fn is_normal_spelling(&self) -> bool {
        self.graph
            .vertices
            .values()
            .next_back()
            .map_or(false, |&ty| ty == SpellingType::Normal)
    }

    fn user_phrase_code_length(&self) -> usize {
        self.user_keys.get(self.user_pos).copied().unwrap_or(0)
    }

    fn phrase_code_length(&self) -> usize {
        self.phrase_keys.get(self.phrase_pos).copied().unwrap_or(0)
    }

    fn weak_syllabification(&self) -> Weak<dyn Syllabification> {
        let strong: Rc<dyn Syllabification> = self.syllabification.clone();
        Rc::downgrade(&strong)
    }

    fn preedit_for(&self, code: &[SyllableId], start: usize, end: usize) -> String {
        let mut output = String::new();
        let found = delimit_syllables_dfs(
            &self.input,
            &self.t.delimiters,
            &self.graph,
            code,
            start,
            end,
            0,
            &mut output,
        );
        if found {
            self.t.preedit_formatter.apply(&output)
        } else {
            String::new()
        }
    }

    /// The original spelling shown as a comment for short codes.
    fn original_spelling(&self, code: &[SyllableId]) -> String {
        if code.is_empty() || code.len() > self.t.spelling_hints {
            return String::new();
        }
        let syllables = self.t.dict.decode(code);
        if syllables.is_empty() {
            return String::new();
        }
        let delimiter = self.t.delimiters.chars().next().unwrap_or('\'');
        let spelt = syllables.join(&delimiter.to_string());
        self.t.comment_formatter.apply(&spelt)
    }

    fn finish_candidate(&self, mut candidate: Candidate) -> Rc<Candidate> {
        if candidate.preedit.is_empty() {
            candidate.preedit = self.preedit_for(
                &candidate.code,
                candidate.start - self.start,
                candidate.end - self.start,
            );
        }
        if candidate.comment.is_empty() {
            let spelling = self.original_spelling(&candidate.code);
            if !spelling.is_empty() && spelling != candidate.preedit {
                candidate.comment = spelling;
            }
        }
        candidate.syllabification = Some(self.weak_syllabification());
        Rc::new(candidate)
    }
}

impl Translation for ScriptTranslation {
    fn next(&mut self) -> bool {
        if self.exhausted {
            return false;
        }
        self.cached = None;
        if self.sentence.take().is_some() {
            return !self.check_empty();
        }
        let user_len = self.user_phrase_code_length();
        let phrase_len = self.phrase_code_length();
        if user_len > 0 && user_len >= phrase_len {
            let bucket_len = self
                .user_phrase
                .as_ref()
                .and_then(|up| up.get(&user_len))
                .map_or(0, Vec::len);
            self.user_index += 1;
            if self.user_index >= bucket_len {
                self.user_pos += 1;
                self.user_index = 0;
            }
        } else if phrase_len > 0 {
            let iter = self
                .phrase
                .as_mut()
                .and_then(|p| p.get_mut(&phrase_len))
                .expect("current phrase bucket");
            if !iter.next() {
                self.phrase_pos += 1;
            }
        }
        !self.check_empty()
    }

    fn peek(&mut self) -> Option<Rc<Candidate>> {
        if self.exhausted {
            return None;
        }
        if let Some(cached) = &self.cached {
            return Some(cached.clone());
        }
        if let Some(sentence) = self.sentence.clone() {
            let candidate = self.finish_candidate(sentence.to_candidate());
            self.cached = Some(candidate.clone());
            return Some(candidate);
        }
        let user_len = self.user_phrase_code_length();
        let phrase_len = self.phrase_code_length();
        let (entry, code_length, is_user): (Rc<DictEntry>, usize, bool) =
            if user_len > 0 && user_len >= phrase_len {
                let entry = self
                    .user_phrase
                    .as_ref()
                    .and_then(|up| up.get(&user_len))
                    .and_then(|bucket| bucket.get(self.user_index))
                    .cloned()?;
                (entry, user_len, true)
            } else if phrase_len > 0 {
                let entry = self
                    .phrase
                    .as_mut()
                    .and_then(|p| p.get_mut(&phrase_len))
                    .and_then(|iter| iter.peek())?;
                (entry, phrase_len, false)
            } else {
                return None;
            };
        let bonus = if is_user {
            if self.is_normal_spelling() {
                0.5
            } else {
                -0.5
            }
        } else if self.is_normal_spelling() {
            0.0
        } else {
            -1.0
        };
        let candidate = Candidate {
            kind: "phrase",
            start: self.start,
            end: self.start + code_length,
            text: entry.text.clone(),
            preedit: String::new(),
            comment: entry.comment.clone(),
            quality: entry.weight + self.t.initial_quality + bonus,
            code: entry.code.clone(),
            syllabification: None,
        };
        let candidate = self.finish_candidate(candidate);
        self.cached = Some(candidate.clone());
        Some(candidate)
    }

    fn exhausted(&self) -> bool {
        self.exhausted
    }
}

/// Spell a candidate's code along some graph path, inserting the first
/// delimiter between segments. Longer edges are preferred. Either the whole
/// code is spelt or the result is discarded, never a partial preedit.
#[allow(clippy::too_many_arguments)]
fn delimit_syllables_dfs(
    input: &str,
    delimiters: &str,
    graph: &SyllableGraph,
    code: &[SyllableId],
    current_pos: usize,
    end_pos: usize,
    depth: usize,
    output: &mut String,
) -> bool {
    if depth == code.len() {
        return current_pos == end_pos;
    }
    let syllable_id = code[depth];
    let Some(edges) = graph.edges.get(&current_pos) else {
        return false;
    };
    for (&end_vertex_pos, spellings) in edges.iter().rev() {
        if end_vertex_pos > end_pos {
            continue;
        }
        if !spellings.contains_key(&syllable_id) {
            continue;
        }
        let len = output.len();
        if depth > 0
            && !output.is_empty()
            && !output.ends_with(|c: char| delimiters.contains(c))
        {
            output.push(delimiters.chars().next().unwrap_or('\''));
        }
        output.push_str(&input[current_pos..end_vertex_pos]);
        if delimit_syllables_dfs(
            input,
            delimiters,
            graph,
            code,
            end_vertex_pos,
            end_pos,
            depth + 1,
            output,
        ) {
            return true;
        }
        output.truncate(len);
    }
    false
}
