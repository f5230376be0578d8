//! Shape-code translator.
//!
//! Looks raw codes up directly in the table and the user dictionary. When
//! completion is enabled the lookups are lazy, with search limits that grow
//! tenfold on each refill. A forward dynamic program assembles sentences
//! from prefix matches when direct lookups come up short.

use std::rc::Rc;
use std::sync::Arc;

use regex::Regex;
use tracing::debug;

use crate::dictionary::{
    Dict, DictEntryCollector, DictEntryIterator, UserDictEntryCollector, UserDictEntryIterator,
};
use crate::error::Result;
use crate::translation::{
    filter_dict_entry, union, Candidate, CharsetFilter, CommitEntry, CommitRecord, Formatter,
    Segment, Sentence, Syllabification, Translation, UniqueFilter,
};
use crate::unity::{self, UnityTableEncoder, UNITY_SYMBOL};
use crate::user_dict::UserDict;
use crate::Config;

const INITIAL_SEARCH_LIMIT: usize = 10;
const EXPANDING_FACTOR: usize = 10;

struct TableInner {
    dict: Arc<Dict>,
    user_dict: Option<UserDict>,
    encoder: Option<UnityTableEncoder>,
    tag: String,
    delimiters: String,
    initial_quality: f64,
    enable_completion: bool,
    enable_charset_filter: bool,
    extended_charset: bool,
    enable_sentence: bool,
    sentence_over_completion: bool,
    encode_commit_history: bool,
    max_phrase_length: usize,
    enable_user_dict: bool,
    disable_user_dict_patterns: Vec<Regex>,
    preedit_formatter: Formatter,
    comment_formatter: Formatter,
}

impl TableInner {
    fn filter_by_charset(&self) -> bool {
        self.enable_charset_filter && !self.extended_charset
    }
}

pub struct TableTranslator {
    inner: Arc<TableInner>,
}

impl TableTranslator {
    pub fn new(dict: Arc<Dict>, user_dict: Option<UserDict>, config: &Config) -> Result<Self> {
        if let Some(ud) = &user_dict {
            ud.attach_syllabary(dict.syllabary().clone());
            ud.set_dee_half_life(config.dee_half_life);
        }
        let encoder = if config.enable_encoder {
            user_dict
                .clone()
                .map(|ud| UnityTableEncoder::new(ud, dict.clone()))
        } else {
            None
        };
        let mut patterns = Vec::new();
        for pattern in &config.disable_user_dict_for_patterns {
            patterns.push(Regex::new(pattern)?);
        }
        Ok(TableTranslator {
            inner: Arc::new(TableInner {
                dict,
                user_dict,
                encoder,
                tag: config.tag.clone(),
                delimiters: config.delimiters.clone(),
                initial_quality: config.initial_quality,
                enable_completion: config.enable_completion,
                enable_charset_filter: config.enable_charset_filter,
                extended_charset: config.extended_charset,
                enable_sentence: config.enable_sentence,
                sentence_over_completion: config.sentence_over_completion,
                encode_commit_history: config.encode_commit_history,
                max_phrase_length: config.max_phrase_length,
                enable_user_dict: config.enable_user_dict,
                disable_user_dict_patterns: patterns,
                preedit_formatter: Formatter::compile(&config.preedit_format)?,
                comment_formatter: Formatter::compile(&config.comment_format)?,
            }),
        })
    }

    pub fn query(&self, input: &str, segment: &Segment) -> Option<Box<dyn Translation>> {
        let t = &self.inner;
        if !segment.has_tag(&t.tag) {
            return None;
        }
        debug!(input, start = segment.start, "table query");
        let enable_user_dict = t.user_dict.as_ref().map_or(false, UserDict::loaded)
            && t.enable_user_dict
            && !self.user_dict_disabled_for(input);

        let preedit = input.to_string();
        let code = input
            .trim_end_matches(|c: char| t.delimiters.contains(c))
            .to_string();

        let mut translation: Option<Box<dyn Translation>> = if t.enable_completion {
            Some(Box::new(TableTranslation::new_lazy(
                t.clone(),
                code,
                segment.start,
                segment.start + input.len(),
                preedit,
                enable_user_dict,
            )))
        } else {
            let mut iter = DictEntryIterator::new();
            if t.dict.loaded() {
                t.dict.lookup_words(&mut iter, &code, false, 0);
            }
            let mut uter = UserDictEntryIterator::new();
            if enable_user_dict {
                if let Some(ud) = &t.user_dict {
                    ud.lookup_words(&mut uter, &code, false, 0, None);
                }
                if let Some(encoder) = &t.encoder {
                    if encoder.loaded() {
                        encoder.lookup_phrases(&mut uter, &code, false, 0, None);
                    }
                }
            }
            if !iter.exhausted() || !uter.exhausted() {
                Some(Box::new(TableTranslation::new(
                    t.clone(),
                    code,
                    segment.start,
                    segment.start + input.len(),
                    preedit,
                    iter,
                    uter,
                )))
            } else {
                None
            }
        };

        if let Some(inner) = translation {
            translation = Some(if t.filter_by_charset() {
                Box::new(CharsetFilter::new(inner))
            } else {
                inner
            });
        }
        if translation.as_ref().map_or(false, |tr| tr.exhausted()) {
            translation = None;
        }
        if t.enable_sentence && translation.is_none() {
            translation = self.make_sentence_translation(input, segment.start, true);
        } else if t.sentence_over_completion {
            let begins_with_completion = translation
                .as_mut()
                .and_then(|tr| tr.peek())
                .map_or(false, |cand| cand.kind == "completion");
            if begins_with_completion {
                if let Some(sentence) = self.make_sentence_translation(input, segment.start, false)
                {
                    translation = Some(union(sentence, translation.take().expect("primary")));
                }
            }
        }
        let translation = translation?;
        let unique = UniqueFilter::new(translation);
        if unique.exhausted() {
            return None;
        }
        Some(Box::new(unique))
    }

    /// Record a committed phrase: bump each element (stripping the unity
    /// prefix from constructed ones), let the encoder pack multi-element
    /// commits, and optionally re-encode recent commit history.
    pub fn memorize(&self, commit: &CommitEntry, history: &[CommitRecord]) -> Result<()> {
        let t = &self.inner;
        let Some(ud) = &t.user_dict else {
            return Ok(());
        };
        ud.advance_tick()?;
        for element in &commit.elements {
            if unity::is_constructed(element) {
                let mut blessed = (**element).clone();
                blessed.custom_code = unity::remove_prefix(&element.custom_code).to_string();
                ud.update_entry(&blessed, 1)?;
            } else {
                ud.update_entry(element, 1)?;
            }
        }
        if let Some(encoder) = &t.encoder {
            if encoder.loaded() {
                if commit.elements.len() > 1 {
                    encoder.encode_phrase(&commit.text, 1)?;
                }
                if t.encode_commit_history {
                    let mut records = history.iter().rev().peekable();
                    if records.peek().map_or(false, |r| r.kind == "punct") {
                        records.next();
                    }
                    let mut phrase = String::new();
                    for record in records {
                        if record.kind != "table" && record.kind != "sentence" {
                            break;
                        }
                        if phrase.is_empty() {
                            phrase = record.text.clone();
                            continue;
                        }
                        phrase = format!("{}{}", record.text, phrase);
                        if phrase.chars().count() > t.max_phrase_length {
                            break;
                        }
                        encoder.encode_phrase(&phrase, 0)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn user_dict_disabled_for(&self, input: &str) -> bool {
        self.inner
            .disable_user_dict_patterns
            .iter()
            .any(|pattern| pattern.is_match(input))
    }

    /// Forward DP over prefix matches (§ sentence path). When
    /// `include_prefix_phrases` is set, the word candidates found at
    /// position 0 ride along after the sentence.
    fn make_sentence_translation(
        &self,
        input: &str,
        start: usize,
        include_prefix_phrases: bool,
    ) -> Option<Box<dyn Translation>> {
        let t = &self.inner;
        let filter_by_charset = t.filter_by_charset();
        let mut collector = DictEntryCollector::new();
        let mut user_phrase_collector = UserDictEntryCollector::new();
        let mut sentences: std::collections::BTreeMap<usize, Sentence> =
            std::collections::BTreeMap::new();
        sentences.insert(0, Sentence::new(0));
        for start_pos in 0..input.len() {
            if !sentences.contains_key(&start_pos) {
                continue;
            }
            let active_input = &input[start_pos..];
            let active_key = format!("{} ", active_input);
            let mut entries: Vec<Option<Rc<crate::dictionary::DictEntry>>> =
                vec![None; active_input.len() + 1];
            if let Some(ud) = &t.user_dict {
                if ud.loaded() {
                    for len in 1..=active_input.len() {
                        let consumed_length =
                            consume_trailing_delimiters(len, active_input, &t.delimiters);
                        if entries[consumed_length].is_some() {
                            continue;
                        }
                        let key = &active_input[..len];
                        let mut uter = UserDictEntryIterator::new();
                        let mut resume_key = String::new();
                        ud.lookup_words(&mut uter, key, false, 0, Some(&mut resume_key));
                        if filter_by_charset {
                            uter.add_filter(Rc::new(filter_dict_entry));
                        }
                        entries[consumed_length] = uter.peek();
                        if start_pos == 0 && !uter.exhausted() {
                            // also provide words for manual composition
                            uter.release(
                                user_phrase_collector.entry(consumed_length).or_default(),
                            );
                        }
                        if resume_key > active_key && !resume_key.starts_with(&active_key) {
                            break;
                        }
                    }
                }
            }
            if let Some(encoder) = &t.encoder {
                if encoder.loaded() {
                    let prefixed_key = unity::add_prefix(&active_key);
                    for len in 1..=active_input.len() {
                        let consumed_length =
                            consume_trailing_delimiters(len, active_input, &t.delimiters);
                        if entries[consumed_length].is_some() {
                            continue;
                        }
                        let key = &active_input[..len];
                        let mut uter = UserDictEntryIterator::new();
                        let mut resume_key = String::new();
                        encoder.lookup_phrases(&mut uter, key, false, 0, Some(&mut resume_key));
                        if filter_by_charset {
                            uter.add_filter(Rc::new(filter_dict_entry));
                        }
                        entries[consumed_length] = uter.peek();
                        if start_pos == 0 && !uter.exhausted() {
                            uter.release(
                                user_phrase_collector.entry(consumed_length).or_default(),
                            );
                        }
                        if resume_key > prefixed_key && !resume_key.starts_with(&prefixed_key) {
                            break;
                        }
                    }
                }
            }
            if t.dict.loaded() {
                let matches = t.dict.prism().common_prefix_search(active_input);
                if matches.is_empty() {
                    continue;
                }
                for m in matches.iter().rev() {
                    if m.length == 0 {
                        continue;
                    }
                    let consumed_length =
                        consume_trailing_delimiters(m.length, active_input, &t.delimiters);
                    if entries[consumed_length].is_some() {
                        continue;
                    }
                    let mut iter = DictEntryIterator::new();
                    t.dict
                        .lookup_words(&mut iter, &active_input[..m.length], false, 0);
                    if filter_by_charset {
                        iter.add_filter(Rc::new(filter_dict_entry));
                    }
                    entries[consumed_length] = iter.peek();
                    if start_pos == 0 && !iter.exhausted() {
                        collector.insert(consumed_length, iter);
                    }
                }
            }
            for len in 1..=active_input.len() {
                let Some(entry) = &entries[len] else {
                    continue;
                };
                let end_pos = start_pos + len;
                let mut new_sentence = sentences[&start_pos].clone();
                new_sentence.extend(entry, end_pos);
                match sentences.get(&end_pos) {
                    Some(best) if best.weight > new_sentence.weight => {}
                    _ => {
                        sentences.insert(end_pos, new_sentence);
                    }
                }
            }
        }
        let sentence = sentences.remove(&input.len())?;
        let translation = SentenceTranslation::new(
            t.clone(),
            sentence,
            if include_prefix_phrases {
                collector
            } else {
                DictEntryCollector::new()
            },
            if include_prefix_phrases {
                user_phrase_collector
            } else {
                UserDictEntryCollector::new()
            },
            input.to_string(),
            start,
        );
        let boxed: Box<dyn Translation> = Box::new(translation);
        Some(if filter_by_charset {
            Box::new(CharsetFilter::new(boxed))
        } else {
            boxed
        })
    }
}

fn consume_trailing_delimiters(mut pos: usize, input: &str, delimiters: &str) -> usize {
    while pos < input.len() && delimiters.as_bytes().contains(&input.as_bytes()[pos]) {
        pos += 1;
    }
    pos
}

struct LazyState {
    limit: usize,
    user_dict_limit: usize,
    user_dict_key: String,
    enable_user_dict: bool,
}

/// Candidate stream over one table lookup; the lazy variant refills its
/// iterators with growing limits as they drain.
struct TableTranslation {
    t: Arc<TableInner>,
    input: String,
    start: usize,
    end: usize,
    preedit: String,
    iter: DictEntryIterator,
    uter: UserDictEntryIterator,
    lazy: Option<LazyState>,
    cached: Option<Rc<Candidate>>,
    exhausted: bool,
}

impl TableTranslation {
    #[allow(clippy::too_many_arguments)]
    fn new(
        t: Arc<TableInner>,
        input: String,
        start: usize,
        end: usize,
        preedit: String,
        iter: DictEntryIterator,
        uter: UserDictEntryIterator,
    ) -> Self {
        let preedit = t.preedit_formatter.apply(&preedit);
        let mut translation = TableTranslation {
            t,
            input,
            start,
            end,
            preedit,
            iter,
            uter,
            lazy: None,
            cached: None,
            exhausted: true,
        };
        translation.check_empty();
        translation
    }

    fn new_lazy(
        t: Arc<TableInner>,
        input: String,
        start: usize,
        end: usize,
        preedit: String,
        enable_user_dict: bool,
    ) -> Self {
        let preedit = t.preedit_formatter.apply(&preedit);
        let mut translation = TableTranslation {
            t,
            input,
            start,
            end,
            preedit,
            iter: DictEntryIterator::new(),
            uter: UserDictEntryIterator::new(),
            lazy: Some(LazyState {
                limit: INITIAL_SEARCH_LIMIT,
                user_dict_limit: INITIAL_SEARCH_LIMIT,
                user_dict_key: String::new(),
                enable_user_dict,
            }),
            cached: None,
            exhausted: true,
        };
        if !translation.fetch_user_phrases() {
            translation.fetch_more_user_phrases();
        }
        translation.fetch_more_table_entries();
        translation.check_empty();
        translation
    }

    /// All exact-match user phrases, then constructed phrases.
    fn fetch_user_phrases(&mut self) -> bool {
        let Some(lazy) = self.lazy.as_mut() else {
            return false;
        };
        if !lazy.enable_user_dict {
            return false;
        }
        let Some(ud) = &self.t.user_dict else {
            return false;
        };
        ud.lookup_words(
            &mut self.uter,
            &self.input,
            false,
            0,
            Some(&mut lazy.user_dict_key),
        );
        if let Some(encoder) = &self.t.encoder {
            if encoder.loaded() {
                encoder.lookup_phrases(&mut self.uter, &self.input, false, 0, None);
            }
        }
        !self.uter.exhausted()
    }

    fn fetch_more_user_phrases(&mut self) -> bool {
        let Some(lazy) = self.lazy.as_mut() else {
            return false;
        };
        if !lazy.enable_user_dict || lazy.user_dict_limit == 0 {
            return false;
        }
        let Some(ud) = &self.t.user_dict else {
            return false;
        };
        let count = ud.lookup_words(
            &mut self.uter,
            &self.input,
            true,
            lazy.user_dict_limit,
            Some(&mut lazy.user_dict_key),
        );
        if count < lazy.user_dict_limit {
            debug!("all user dict entries obtained");
            lazy.user_dict_limit = 0;
        } else {
            lazy.user_dict_limit *= EXPANDING_FACTOR;
        }
        !self.uter.exhausted()
    }

    fn fetch_more_table_entries(&mut self) -> bool {
        let Some(lazy) = self.lazy.as_mut() else {
            return false;
        };
        if lazy.limit == 0 {
            return false;
        }
        let previous_entry_count = self.iter.entry_count();
        debug!(
            limit = lazy.limit,
            count = previous_entry_count,
            "fetching more table entries"
        );
        let mut more = DictEntryIterator::new();
        if self.t.dict.lookup_words(&mut more, &self.input, true, lazy.limit) < lazy.limit {
            debug!("all table entries obtained");
            lazy.limit = 0;
        } else {
            lazy.limit *= EXPANDING_FACTOR;
        }
        if more.entry_count() > previous_entry_count {
            more.skip(previous_entry_count);
            self.iter = more;
        }
        true
    }

    fn prefer_user_phrase(&mut self) -> bool {
        if self.uter.exhausted() {
            return false;
        }
        if self.iter.exhausted() {
            return true;
        }
        let dict_entry = self.iter.peek();
        let user_entry = self.uter.peek();
        match (dict_entry, user_entry) {
            (Some(d), Some(u)) => {
                // a real complete hit outranks incomplete or constructed
                // user phrases
                !(d.remaining_code_length == 0
                    && (u.remaining_code_length != 0 || unity::is_constructed(&u)))
            }
            (None, Some(_)) => true,
            _ => false,
        }
    }

    fn check_empty(&mut self) -> bool {
        self.exhausted = self.iter.exhausted() && self.uter.exhausted();
        self.exhausted
    }
}

impl Translation for TableTranslation {
    fn next(&mut self) -> bool {
        if self.exhausted {
            return false;
        }
        self.cached = None;
        if self.prefer_user_phrase() {
            self.uter.next();
            if self.uter.exhausted() {
                self.fetch_more_user_phrases();
            }
        } else {
            self.iter.next();
            if self.iter.exhausted() {
                self.fetch_more_table_entries();
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
        let is_user_phrase = self.prefer_user_phrase();
        let entry = if is_user_phrase {
            self.uter.peek()
        } else {
            self.iter.peek()
        }?;
        let comment = if unity::is_constructed(&entry) {
            UNITY_SYMBOL.to_string()
        } else {
            entry.comment.clone()
        };
        let comment = self.t.comment_formatter.apply(&comment);
        let incomplete = entry.remaining_code_length != 0;
        let candidate = Rc::new(Candidate {
            kind: if incomplete { "completion" } else { "table" },
            start: self.start,
            end: self.end,
            text: entry.text.clone(),
            preedit: self.preedit.clone(),
            comment,
            quality: entry.weight
                + self.t.initial_quality
                + if incomplete { -1.0 } else { 0.0 }
                + if is_user_phrase { 0.5 } else { 0.0 },
            code: entry.code.clone(),
            syllabification: None,
        });
        self.cached = Some(candidate.clone());
        Some(candidate)
    }

    fn exhausted(&self) -> bool {
        self.exhausted
    }
}

/// Caret stops from a sentence's own syllable lengths.
struct SentenceSyllabification {
    start: usize,
    syllable_lengths: Vec<usize>,
}

impl Syllabification for SentenceSyllabification {
    fn previous_stop(&self, caret_pos: usize) -> usize {
        let mut stop = self.start;
        for &len in &self.syllable_lengths {
            if stop + len >= caret_pos {
                return stop;
            }
            stop += len;
        }
        caret_pos
    }

    fn next_stop(&self, caret_pos: usize) -> usize {
        let mut stop = self.start;
        for &len in &self.syllable_lengths {
            stop += len;
            if stop > caret_pos {
                return stop;
            }
        }
        caret_pos
    }
}

/// Emits the assembled sentence first, then the word candidates kept from
/// the DP's position-0 lookups, longest code first.
struct SentenceTranslation {
    t: Arc<TableInner>,
    sentence: Option<Sentence>,
    syllabification: Rc<SentenceSyllabification>,
    collector: DictEntryCollector,
    user_phrase_collector: UserDictEntryCollector,
    user_phrase_index: usize,
    input: String,
    start: usize,
    cached: Option<Rc<Candidate>>,
    exhausted: bool,
}

impl SentenceTranslation {
    fn new(
        t: Arc<TableInner>,
        mut sentence: Sentence,
        collector: DictEntryCollector,
        user_phrase_collector: UserDictEntryCollector,
        input: String,
        start: usize,
    ) -> Self {
        sentence.offset(start);
        sentence.comment = UNITY_SYMBOL.to_string();
        // splice spaces between syllables unless the input already has a
        // delimiter there
        let mut preedit = input.clone();
        let mut pos = 0usize;
        let mut inserted = 0usize;
        for &len in &sentence.syllable_lengths {
            if pos > 0
                && pos <= input.len()
                && !t
                    .delimiters
                    .as_bytes()
                    .contains(&input.as_bytes()[pos - 1])
            {
                preedit.insert(pos + inserted, ' ');
                inserted += 1;
            }
            pos += len;
        }
        sentence.preedit = t.preedit_formatter.apply(&preedit);
        let syllabification = Rc::new(SentenceSyllabification {
            start: sentence.start,
            syllable_lengths: sentence.syllable_lengths.clone(),
        });
        let mut translation = SentenceTranslation {
            t,
            sentence: Some(sentence),
            syllabification,
            collector,
            user_phrase_collector,
            user_phrase_index: 0,
            input,
            start,
            cached: None,
            exhausted: false,
        };
        translation.check_empty();
        translation
    }

    fn prefer_user_phrase(&self) -> bool {
        let user_len = self
            .user_phrase_collector
            .keys()
            .next_back()
            .copied()
            .unwrap_or(0);
        let table_len = self.collector.keys().next_back().copied().unwrap_or(0);
        user_len > 0 && user_len >= table_len
    }

    fn check_empty(&mut self) -> bool {
        self.exhausted = self.sentence.is_none()
            && self.collector.is_empty()
            && self.user_phrase_collector.is_empty();
        self.exhausted
    }
}

impl Translation for SentenceTranslation {
    fn next(&mut self) -> bool {
        self.cached = None;
        if self.sentence.take().is_some() {
            return !self.check_empty();
        }
        if self.exhausted {
            return false;
        }
        if self.prefer_user_phrase() {
            let key = *self
                .user_phrase_collector
                .keys()
                .next_back()
                .expect("user bucket");
            let drained = {
                let bucket = &self.user_phrase_collector[&key];
                self.user_phrase_index + 1 >= bucket.len()
            };
            if drained {
                self.user_phrase_collector.remove(&key);
                self.user_phrase_index = 0;
            } else {
                self.user_phrase_index += 1;
            }
        } else if let Some(key) = self.collector.keys().next_back().copied() {
            let drained = !self.collector.get_mut(&key).expect("table bucket").next();
            if drained {
                self.collector.remove(&key);
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
        if let Some(sentence) = &self.sentence {
            let mut candidate = sentence.to_candidate();
            let strong: Rc<dyn Syllabification> = self.syllabification.clone();
            candidate.syllabification = Some(Rc::downgrade(&strong));
            let candidate = Rc::new(candidate);
            self.cached = Some(candidate.clone());
            return Some(candidate);
        }
        let (entry, code_length) = if self.prefer_user_phrase() {
            let (&key, bucket) = self.user_phrase_collector.iter().next_back()?;
            (bucket.get(self.user_phrase_index)?.clone(), key)
        } else {
            let key = self.collector.keys().next_back().copied()?;
            let entry = self.collector.get_mut(&key)?.peek()?;
            (entry, key)
        };
        let preedit = self
            .t
            .preedit_formatter
            .apply(&self.input[..code_length.min(self.input.len())]);
        let candidate = Rc::new(Candidate {
            kind: "table",
            start: self.start,
            end: self.start + code_length,
            text: entry.text.clone(),
            preedit,
            comment: entry.comment.clone(),
            quality: entry.weight + self.t.initial_quality,
            code: entry.code.clone(),
            syllabification: None,
        });
        self.cached = Some(candidate.clone());
        Some(candidate)
    }

    fn exhausted(&self) -> bool {
        self.exhausted
    }
}
