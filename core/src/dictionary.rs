//! Static dictionary: code strings to weighted entries.
//!
//! Storage is an `fst` map from code string to a payload index, with the
//! payloads kept in a bincode-serialized vector, plus an in-memory overlay
//! for entries inserted at runtime (schema extras, test fixtures). Phonetic
//! dictionaries key entries by canonical syllable spellings joined with a
//! space; table dictionaries key entries by the raw code itself.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;

use fst::{IntoStreamer, Map, MapBuilder, Streamer};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::prism::Prism;
use crate::syllable::{SpellingType, SyllableGraph, SyllableId};

/// A dictionary code: the syllable ids spelling out an entry.
pub type Code = Vec<SyllableId>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DictEntry {
    pub text: String,
    pub comment: String,
    pub code: Code,
    /// Non-canonical code string, set for user-dictionary entries and for
    /// constructed (encoder-produced) entries.
    pub custom_code: String,
    /// Log-probability-like score; larger is better.
    pub weight: f64,
    /// For predictive matches, how many code bytes remain untyped.
    pub remaining_code_length: usize,
}

pub type DictEntryList = Vec<Rc<DictEntry>>;
pub type DictEntryFilter = Rc<dyn Fn(&DictEntry) -> bool>;

fn by_weight_desc(a: &Rc<DictEntry>, b: &Rc<DictEntry>) -> std::cmp::Ordering {
    b.weight
        .partial_cmp(&a.weight)
        .unwrap_or(std::cmp::Ordering::Equal)
}

/// Ordered, exhaustible stream of dictionary entries.
///
/// Filters added via `add_filter` hide entries from `peek`/`next` without
/// disturbing `entry_count`, which always reports the raw number collected.
#[derive(Clone, Default)]
pub struct DictEntryIterator {
    entries: DictEntryList,
    index: usize,
    filters: Vec<DictEntryFilter>,
}

impl DictEntryIterator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: Rc<DictEntry>) {
        self.entries.push(entry);
    }

    pub fn sort_by_weight(&mut self) {
        self.entries.sort_by(by_weight_desc);
    }

    pub fn add_filter(&mut self, filter: DictEntryFilter) {
        self.filters.push(filter);
    }

    fn passes(&self, entry: &DictEntry) -> bool {
        self.filters.iter().all(|f| f(entry))
    }

    fn skip_filtered(&mut self) {
        while self.index < self.entries.len() && !self.passes(&self.entries[self.index]) {
            self.index += 1;
        }
    }

    pub fn peek(&mut self) -> Option<Rc<DictEntry>> {
        self.skip_filtered();
        self.entries.get(self.index).cloned()
    }

    /// Advance; true while an entry remains.
    pub fn next(&mut self) -> bool {
        self.skip_filtered();
        if self.index < self.entries.len() {
            self.index += 1;
        }
        self.skip_filtered();
        self.index < self.entries.len()
    }

    /// Skip `n` raw entries, filters notwithstanding.
    pub fn skip(&mut self, n: usize) {
        self.index = (self.index + n).min(self.entries.len());
    }

    pub fn exhausted(&self) -> bool {
        !self.entries[self.index.min(self.entries.len())..]
            .iter()
            .any(|e| self.passes(e))
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }
}

/// Entry stream over user-dictionary and encoder results; same contract as
/// `DictEntryIterator` plus batch append and bulk release.
#[derive(Clone, Default)]
pub struct UserDictEntryIterator {
    entries: DictEntryList,
    index: usize,
    filters: Vec<DictEntryFilter>,
}

impl UserDictEntryIterator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a batch, keeping it weight-ordered within itself.
    pub fn append(&mut self, mut batch: DictEntryList) {
        batch.sort_by(by_weight_desc);
        self.entries.extend(batch);
    }

    pub fn add_filter(&mut self, filter: DictEntryFilter) {
        self.filters.push(filter);
    }

    fn passes(&self, entry: &DictEntry) -> bool {
        self.filters.iter().all(|f| f(entry))
    }

    fn skip_filtered(&mut self) {
        while self.index < self.entries.len() && !self.passes(&self.entries[self.index]) {
            self.index += 1;
        }
    }

    pub fn peek(&mut self) -> Option<Rc<DictEntry>> {
        self.skip_filtered();
        self.entries.get(self.index).cloned()
    }

    pub fn next(&mut self) -> bool {
        self.skip_filtered();
        if self.index < self.entries.len() {
            self.index += 1;
        }
        self.skip_filtered();
        self.index < self.entries.len()
    }

    pub fn exhausted(&self) -> bool {
        !self.entries[self.index.min(self.entries.len())..]
            .iter()
            .any(|e| self.passes(e))
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Move the remaining entries out, leaving this iterator exhausted.
    pub fn release(&mut self, receiver: &mut DictEntryList) {
        receiver.extend(self.entries.drain(self.index.min(self.entries.len())..));
        self.index = self.entries.len();
    }
}

/// Code length to entry stream; reverse iteration gives longest-first.
pub type DictEntryCollector = BTreeMap<usize, DictEntryIterator>;
/// Code length to entry list, for user-dictionary results.
pub type UserDictEntryCollector = BTreeMap<usize, DictEntryList>;

/// Dense id ↔ canonical spelling table shared by the dictionary, the user
/// dictionary and the unity encoder.
#[derive(Debug, Default)]
pub struct Syllabary {
    spellings: Vec<String>,
    ids: HashMap<String, SyllableId>,
}

impl Syllabary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, spelling: &str) -> SyllableId {
        if let Some(&id) = self.ids.get(spelling) {
            return id;
        }
        let id = self.spellings.len() as SyllableId;
        self.spellings.push(spelling.to_string());
        self.ids.insert(spelling.to_string(), id);
        id
    }

    pub fn id_of(&self, spelling: &str) -> Option<SyllableId> {
        self.ids.get(spelling).copied()
    }

    pub fn spelling(&self, id: SyllableId) -> Option<&str> {
        self.spellings.get(id as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.spellings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spellings.is_empty()
    }

    /// Join a code back into its canonical code string.
    pub fn code_to_string(&self, code: &[SyllableId]) -> String {
        code.iter()
            .filter_map(|&id| self.spelling(id))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Parse a canonical code string back into syllable ids. A single
    /// interned key (table codes) maps to its own id.
    pub fn string_to_code(&self, code_str: &str) -> Code {
        if let Some(id) = self.id_of(code_str) {
            return vec![id];
        }
        code_str
            .split(' ')
            .filter_map(|s| self.id_of(s))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry {
    text: String,
    weight: f64,
    comment: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SpellingDef {
    spelling: String,
    syllable: String,
    kind: u8,
    credibility: f64,
}

#[derive(Serialize, Deserialize)]
struct DictPayload {
    name: String,
    syllabary: Vec<String>,
    spellings: Vec<SpellingDef>,
    entries: Vec<Vec<StoredEntry>>,
}

fn kind_to_u8(kind: SpellingType) -> u8 {
    match kind {
        SpellingType::Normal => 0,
        SpellingType::Fuzzy => 1,
        SpellingType::Abbreviation => 2,
        SpellingType::Completion => 3,
        SpellingType::Ambiguous => 4,
        SpellingType::Invalid => 5,
    }
}

fn kind_from_u8(kind: u8) -> SpellingType {
    match kind {
        0 => SpellingType::Normal,
        1 => SpellingType::Fuzzy,
        2 => SpellingType::Abbreviation,
        3 => SpellingType::Completion,
        4 => SpellingType::Ambiguous,
        _ => SpellingType::Invalid,
    }
}

/// Builder for an in-memory dictionary; the result can be saved to the
/// fst + bincode artifacts and reloaded later.
pub struct DictBuilder {
    name: String,
    syllabary: Syllabary,
    prism: Prism,
    extra_spellings: Vec<SpellingDef>,
    entries: BTreeMap<String, Vec<StoredEntry>>,
}

impl DictBuilder {
    pub fn new(name: &str) -> Self {
        DictBuilder {
            name: name.to_string(),
            syllabary: Syllabary::new(),
            prism: Prism::new(),
            extra_spellings: Vec::new(),
            entries: BTreeMap::new(),
        }
    }

    /// Register a canonical syllable; its own spelling goes into the prism
    /// as a normal spelling.
    pub fn syllable(&mut self, spelling: &str) -> SyllableId {
        if let Some(id) = self.syllabary.id_of(spelling) {
            return id;
        }
        let id = self.syllabary.intern(spelling);
        self.prism.insert(spelling, id, SpellingType::Normal, 1.0);
        id
    }

    /// Register an alternative spelling (fuzzy, abbreviated) of a syllable.
    pub fn spelling(
        &mut self,
        spelling: &str,
        syllable: &str,
        kind: SpellingType,
        credibility: f64,
    ) {
        let id = self.syllable(syllable);
        self.prism.insert(spelling, id, kind, credibility);
        self.extra_spellings.push(SpellingDef {
            spelling: spelling.to_string(),
            syllable: syllable.to_string(),
            kind: kind_to_u8(kind),
            credibility,
        });
    }

    /// Add a phonetic entry keyed by its syllable sequence.
    pub fn entry(&mut self, syllables: &[&str], text: &str, weight: f64) {
        for s in syllables {
            self.syllable(s);
        }
        let key = syllables.join(" ");
        self.entries.entry(key).or_default().push(StoredEntry {
            text: text.to_string(),
            weight,
            comment: String::new(),
        });
    }

    /// Add a table entry keyed by its raw code.
    pub fn table_entry(&mut self, code: &str, text: &str, weight: f64) {
        self.syllable(code);
        self.entries.entry(code.to_string()).or_default().push(StoredEntry {
            text: text.to_string(),
            weight,
            comment: String::new(),
        });
    }

    pub fn build(self) -> Dict {
        let mut overlay = self.entries;
        for bucket in overlay.values_mut() {
            bucket.sort_by(|a, b| {
                b.weight
                    .partial_cmp(&a.weight)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }
        let mut reverse: HashMap<String, String> = HashMap::new();
        for (key, bucket) in &overlay {
            for e in bucket {
                match reverse.get(&e.text) {
                    Some(existing) if existing.len() <= key.len() => {}
                    _ => {
                        reverse.insert(e.text.clone(), key.clone());
                    }
                }
            }
        }
        Dict {
            name: self.name,
            syllabary: Arc::new(self.syllabary),
            prism: self.prism,
            extra_spellings: self.extra_spellings,
            overlay,
            fst_map: None,
            payloads: Vec::new(),
            reverse,
            loaded: true,
        }
    }
}

/// The static dictionary.
pub struct Dict {
    name: String,
    syllabary: Arc<Syllabary>,
    prism: Prism,
    extra_spellings: Vec<SpellingDef>,
    overlay: BTreeMap<String, Vec<StoredEntry>>,
    fst_map: Option<Map<Vec<u8>>>,
    payloads: Vec<Vec<StoredEntry>>,
    reverse: HashMap<String, String>,
    loaded: bool,
}

impl Dict {
    pub fn builder(name: &str) -> DictBuilder {
        DictBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn loaded(&self) -> bool {
        self.loaded
    }

    pub fn prism(&self) -> &Prism {
        &self.prism
    }

    pub fn syllabary(&self) -> &Arc<Syllabary> {
        &self.syllabary
    }

    /// Map a code back to its syllable spellings.
    pub fn decode(&self, code: &[SyllableId]) -> Vec<String> {
        code.iter()
            .filter_map(|&id| self.syllabary.spelling(id).map(str::to_string))
            .collect()
    }

    /// The shortest known code for `text`, if the dictionary has it.
    pub fn lookup_code(&self, text: &str) -> Option<&str> {
        self.reverse.get(text).map(String::as_str)
    }

    fn entries_for(&self, key: &str) -> Vec<StoredEntry> {
        let mut out: Vec<StoredEntry> = Vec::new();
        if let Some(bucket) = self.overlay.get(key) {
            out.extend(bucket.iter().cloned());
        }
        if let Some(map) = &self.fst_map {
            if let Some(index) = map.get(key) {
                if let Some(bucket) = self.payloads.get(index as usize) {
                    out.extend(bucket.iter().cloned());
                }
            }
        }
        out
    }

    fn matching_keys(&self, prefix: &str) -> BTreeMap<String, Vec<StoredEntry>> {
        let mut per_key: BTreeMap<String, Vec<StoredEntry>> = BTreeMap::new();
        for (key, bucket) in self
            .overlay
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
        {
            per_key
                .entry(key.clone())
                .or_default()
                .extend(bucket.iter().cloned());
        }
        if let Some(map) = &self.fst_map {
            let mut stream = map.range().ge(prefix).into_stream();
            while let Some((key, index)) = stream.next() {
                let key = String::from_utf8_lossy(key).into_owned();
                if !key.starts_with(prefix) {
                    break;
                }
                if let Some(bucket) = self.payloads.get(index as usize) {
                    per_key.entry(key).or_default().extend(bucket.iter().cloned());
                }
            }
        }
        per_key
    }

    fn make_entry(&self, key: &str, stored: &StoredEntry, remaining: usize) -> Rc<DictEntry> {
        Rc::new(DictEntry {
            text: stored.text.clone(),
            comment: stored.comment.clone(),
            code: self.syllabary.string_to_code(key),
            custom_code: String::new(),
            weight: stored.weight,
            remaining_code_length: remaining,
        })
    }

    /// Traverse the syllable graph from `start`, collecting entries whose
    /// codes are spelt by some path. Collector keys are graph end positions.
    pub fn lookup(
        &self,
        graph: &SyllableGraph,
        start: usize,
        initial_credibility: f64,
    ) -> Option<DictEntryCollector> {
        if !self.loaded {
            return None;
        }
        let mut collector = DictEntryCollector::new();
        let mut path: Code = Vec::new();
        self.walk(graph, start, initial_credibility, &mut path, &mut collector);
        for iter in collector.values_mut() {
            iter.sort_by_weight();
        }
        if collector.is_empty() {
            None
        } else {
            Some(collector)
        }
    }

    fn walk(
        &self,
        graph: &SyllableGraph,
        pos: usize,
        credibility: f64,
        path: &mut Code,
        collector: &mut DictEntryCollector,
    ) {
        let Some(index) = graph.indices.get(&pos) else {
            return;
        };
        for (syllable_id, props_list) in index {
            if self.syllabary.spelling(*syllable_id).is_none() {
                // spelling references an unknown syllable id
                continue;
            }
            let mut seen_ends: Vec<usize> = Vec::new();
            for props in props_list {
                if seen_ends.contains(&props.end_pos) {
                    continue;
                }
                seen_ends.push(props.end_pos);
                path.push(*syllable_id);
                let credibility = credibility * props.credibility;
                let key = self.syllabary.code_to_string(path);
                for stored in self.entries_for(&key) {
                    let entry = DictEntry {
                        text: stored.text.clone(),
                        comment: stored.comment.clone(),
                        code: path.clone(),
                        custom_code: String::new(),
                        weight: stored.weight + credibility.ln(),
                        remaining_code_length: 0,
                    };
                    collector
                        .entry(props.end_pos)
                        .or_default()
                        .push(Rc::new(entry));
                }
                if props.end_pos < graph.interpreted_length {
                    self.walk(graph, props.end_pos, credibility, path, collector);
                }
                path.pop();
            }
        }
    }

    /// Exact or predictive lookup by raw code string. Returns the number of
    /// entries appended to `iter`; stops once `limit` is reached (0 means
    /// unlimited).
    pub fn lookup_words(
        &self,
        iter: &mut DictEntryIterator,
        key: &str,
        predictive: bool,
        limit: usize,
    ) -> usize {
        if !self.loaded {
            return 0;
        }
        let mut count = 0;
        if !predictive {
            for stored in self.entries_for(key) {
                iter.push(self.make_entry(key, &stored, 0));
                count += 1;
                if limit > 0 && count >= limit {
                    return count;
                }
            }
            return count;
        }
        for (full_key, bucket) in self.matching_keys(key) {
            let remaining = full_key.len() - key.len();
            for stored in &bucket {
                iter.push(self.make_entry(&full_key, stored, remaining));
                count += 1;
                if limit > 0 && count >= limit {
                    return count;
                }
            }
        }
        count
    }

    /// Persist to the fst + payload artifacts.
    pub fn save<P: AsRef<Path>>(&self, fst_path: P, payload_path: P) -> Result<()> {
        let mut combined: BTreeMap<String, Vec<StoredEntry>> = self.overlay.clone();
        if let Some(map) = &self.fst_map {
            let mut stream = map.stream();
            while let Some((key, index)) = stream.next() {
                let key = String::from_utf8_lossy(key).into_owned();
                if let Some(bucket) = self.payloads.get(index as usize) {
                    combined.entry(key).or_default().extend(bucket.iter().cloned());
                }
            }
        }
        let mut builder = MapBuilder::memory();
        let mut entries: Vec<Vec<StoredEntry>> = Vec::with_capacity(combined.len());
        for (key, bucket) in &combined {
            builder.insert(key, entries.len() as u64)?;
            entries.push(bucket.clone());
        }
        let fst_bytes = builder.into_inner()?;
        File::create(fst_path.as_ref())?.write_all(&fst_bytes)?;

        let payload = DictPayload {
            name: self.name.clone(),
            syllabary: (0..self.syllabary.len() as SyllableId)
                .filter_map(|id| self.syllabary.spelling(id).map(str::to_string))
                .collect(),
            spellings: self.extra_spellings.clone(),
            entries,
        };
        let bytes = bincode::serialize(&payload)?;
        File::create(payload_path.as_ref())?.write_all(&bytes)?;
        Ok(())
    }

    /// Load a dictionary previously written by [`Dict::save`].
    pub fn load_from_fst_bincode<P: AsRef<Path>>(fst_path: P, payload_path: P) -> Result<Dict> {
        let mut buf = Vec::new();
        File::open(fst_path.as_ref())?.read_to_end(&mut buf)?;
        let map = Map::new(buf)?;

        let mut buf = Vec::new();
        File::open(payload_path.as_ref())?.read_to_end(&mut buf)?;
        let payload: DictPayload = bincode::deserialize(&buf)?;

        let mut builder = DictBuilder::new(&payload.name);
        for spelling in &payload.syllabary {
            builder.syllable(spelling);
        }
        for def in &payload.spellings {
            builder.spelling(
                &def.spelling,
                &def.syllable,
                kind_from_u8(def.kind),
                def.credibility,
            );
        }
        let mut dict = builder.build();
        let mut reverse: HashMap<String, String> = HashMap::new();
        {
            let mut stream = map.stream();
            while let Some((key, index)) = stream.next() {
                let key = String::from_utf8_lossy(key).into_owned();
                if let Some(bucket) = payload.entries.get(index as usize) {
                    for e in bucket {
                        match reverse.get(&e.text) {
                            Some(existing) if existing.len() <= key.len() => {}
                            _ => {
                                reverse.insert(e.text.clone(), key.clone());
                            }
                        }
                    }
                }
            }
        }
        dict.fst_map = Some(map);
        dict.payloads = payload.entries;
        dict.reverse = reverse;
        dict.overlay.clear();
        Ok(dict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syllabifier::Syllabifier;

    fn demo_dict() -> Dict {
        let mut builder = Dict::builder("demo");
        builder.entry(&["ni", "hao"], "你好", -1.0);
        builder.entry(&["ni"], "你", -2.0);
        builder.entry(&["hao"], "好", -2.5);
        builder.build()
    }

    #[test]
    fn graph_lookup_collects_by_end_position() {
        let dict = demo_dict();
        let syllabifier = Syllabifier::new("'", false, false);
        let mut graph = SyllableGraph::default();
        syllabifier.build_syllable_graph("nihao", dict.prism(), &mut graph);
        let collector = dict.lookup(&graph, 0, 1.0).expect("entries");
        // "ni" at 2, "ni hao" at 5
        assert!(collector.contains_key(&2));
        assert!(collector.contains_key(&5));
        let mut longest = collector.into_iter().next_back().unwrap().1;
        assert_eq!(longest.peek().unwrap().text, "你好");
    }

    #[test]
    fn predictive_lookup_reports_remaining_code() {
        let mut builder = Dict::builder("table");
        builder.table_entry("abc", "甲", -1.0);
        builder.table_entry("abcd", "乙", -1.5);
        let dict = builder.build();
        let mut iter = DictEntryIterator::new();
        let count = dict.lookup_words(&mut iter, "abc", true, 0);
        assert_eq!(count, 2);
        let first = iter.peek().unwrap();
        assert_eq!(first.remaining_code_length, 0);
        assert!(iter.next());
        let second = iter.peek().unwrap();
        assert_eq!(second.text, "乙");
        assert_eq!(second.remaining_code_length, 1);
    }

    #[test]
    fn iterator_filters_hide_entries() {
        let dict = demo_dict();
        let mut iter = DictEntryIterator::new();
        dict.lookup_words(&mut iter, "ni", false, 0);
        assert!(!iter.exhausted());
        iter.add_filter(Rc::new(|e: &DictEntry| e.text != "你"));
        assert!(iter.exhausted());
        assert!(iter.peek().is_none());
    }

    #[test]
    fn save_and_load_roundtrip() {
        let tmp = std::env::temp_dir();
        let fst_path = tmp.join(format!("shuru_dict_{}.fst", std::process::id()));
        let payload_path = tmp.join(format!("shuru_dict_{}.bin", std::process::id()));
        let dict = demo_dict();
        dict.save(&fst_path, &payload_path).expect("save");
        let loaded = Dict::load_from_fst_bincode(&fst_path, &payload_path).expect("load");
        let mut iter = DictEntryIterator::new();
        assert_eq!(loaded.lookup_words(&mut iter, "ni hao", false, 0), 1);
        assert_eq!(iter.peek().unwrap().text, "你好");
        assert_eq!(loaded.lookup_code("你好"), Some("ni hao"));
        let _ = std::fs::remove_file(fst_path);
        let _ = std::fs::remove_file(payload_path);
    }

    #[test]
    fn decode_maps_ids_back_to_spellings() {
        let dict = demo_dict();
        let code = dict.syllabary().string_to_code("ni hao");
        assert_eq!(dict.decode(&code), vec!["ni", "hao"]);
    }
}
