//! Redb-backed user dictionary.
//!
//! Entries live in one table keyed by `"{code} \t{text}"` — note the
//! trailing space after the code, which keeps the exact-match region of a
//! code contiguous and strictly before its extensions in key order.
//! Metadata (`/tick`, `/user_id`, `/db_name`, `/rime_version`) lives in a
//! second table. Values are packed [`UserDbValue`] strings.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use redb::{Database, ReadableTable, TableDefinition};
use tracing::debug;

use crate::dictionary::{
    DictEntry, DictEntryList, Syllabary, UserDictEntryCollector, UserDictEntryIterator,
};
use crate::error::{Error, Result};
use crate::syllable::{SyllableGraph, SyllableId};
use crate::user_db::{self, decay_factor, UserDbValue, DEFAULT_DEE_HALF_LIFE};

/// Total-commit scale presumed when turning counters into a log score.
const PRESUMED_TOTAL: f64 = 10000.0;

fn entry_weight(value: &UserDbValue, credibility: f64) -> f64 {
    credibility.ln() + ((value.commits.max(0) as f64 + value.dee + 1.0) / PRESUMED_TOTAL).ln()
}

/// User dictionary handle; clones share one database.
#[derive(Clone, Debug)]
pub struct UserDict {
    inner: Arc<RedbUserDict>,
}

impl UserDict {
    /// Create a user dict in a temporary redb file.
    pub fn new() -> Self {
        let mut path = std::env::temp_dir();
        let now_nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        path.push(format!("shuru_userdict_{}_{}.redb", std::process::id(), now_nanos));
        Self::open(path).expect("create temp redb for user dict")
    }

    /// Create or open a user dict at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(dir) = path.as_ref().parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        let db = Database::create(path.as_ref()).map_err(redb::Error::from)?;
        let name = path
            .as_ref()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .map(|n| n.trim_end_matches(".userdb.redb").trim_end_matches(".redb").to_string())
            .unwrap_or_else(|| "userdict".to_string());
        let dict = UserDict {
            inner: Arc::new(RedbUserDict {
                db,
                path: path.as_ref().to_path_buf(),
                name,
                syllabary: OnceCell::new(),
                dee_half_life: AtomicU64::new(DEFAULT_DEE_HALF_LIFE),
            }),
        };
        dict.create_metadata()?;
        Ok(dict)
    }

    pub fn loaded(&self) -> bool {
        true
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Share the syllabary used to turn entry codes into db keys. Set once
    /// per schema, when a translator adopts this dictionary.
    pub fn attach_syllabary(&self, syllabary: Arc<Syllabary>) {
        let _ = self.inner.syllabary.set(syllabary);
    }

    pub fn set_dee_half_life(&self, ticks: u64) {
        self.inner.dee_half_life.store(ticks.max(1), Ordering::Relaxed);
    }

    /// The logical clock, advanced once per commit.
    pub fn tick(&self) -> u64 {
        self.meta_fetch(user_db::META_TICK)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    pub fn advance_tick(&self) -> Result<u64> {
        let tick = self.tick() + 1;
        self.meta_put(user_db::META_TICK, &tick.to_string())?;
        Ok(tick)
    }

    fn create_metadata(&self) -> Result<()> {
        if self.meta_fetch(user_db::META_DB_NAME).is_none() {
            self.meta_put(user_db::META_DB_NAME, self.name())?;
            self.meta_put(user_db::META_USER_ID, &user_db::user_id())?;
            self.meta_put(user_db::META_VERSION, env!("CARGO_PKG_VERSION"))?;
        }
        Ok(())
    }

    fn entry_key(&self, entry: &DictEntry) -> Result<String> {
        let code_str = if !entry.custom_code.is_empty() {
            entry.custom_code.clone()
        } else if let Some(syllabary) = self.inner.syllabary.get() {
            syllabary.code_to_string(&entry.code)
        } else {
            return Err(Error::Other("user dict has no syllabary attached".into()));
        };
        Ok(format!("{} \t{}", code_str, entry.text))
    }

    /// Record a commit (or a touch when `commit_delta` is 0).
    pub fn update_entry(&self, entry: &DictEntry, commit_delta: i32) -> Result<()> {
        let key = self.entry_key(entry)?;
        let tick = self.tick();
        let half_life = self.inner.dee_half_life.load(Ordering::Relaxed);
        let mut value = self
            .fetch_raw(&key)
            .map(|v| UserDbValue::parse(&v))
            .unwrap_or_default();
        value.commits += commit_delta;
        let elapsed = tick.saturating_sub(value.tick);
        value.dee = value.dee * decay_factor(elapsed, half_life) + commit_delta.max(0) as f64;
        value.tick = tick;
        self.put_raw(&key, &value.pack())
    }

    /// Exact or predictive lookup by code string, appending to `iter`.
    ///
    /// `resume_key` pages the scan: on entry, a non-empty value restarts
    /// there; on return it holds the next key to restart from. Returns the
    /// number of entries appended; stops at `limit` (0 means unlimited).
    pub fn lookup_words(
        &self,
        iter: &mut UserDictEntryIterator,
        key: &str,
        predictive: bool,
        limit: usize,
        resume_key: Option<&mut String>,
    ) -> usize {
        let start = match &resume_key {
            Some(r) if !r.is_empty() => (*r).clone(),
            _ => key.to_string(),
        };
        let syllabary = self.inner.syllabary.get();
        let mut batch = DictEntryList::new();
        let mut count = 0usize;
        let mut last_visited: Option<String> = None;
        let scan = self.inner.for_each_from(&start, &mut |k, v| {
            let exact = k.len() > key.len() && k.as_bytes()[key.len()] == b' ';
            if !predictive {
                if !exact {
                    last_visited = Some(k.to_string());
                    return false;
                }
            } else if !k.starts_with(key) {
                last_visited = Some(k.to_string());
                return false;
            }
            last_visited = Some(k.to_string());
            let Some((code_part, text)) = k.split_once('\t') else {
                return true;
            };
            let code_str = code_part.trim_end_matches(' ');
            let value = UserDbValue::parse(v);
            if value.commits < 0 {
                // tombstone
                return true;
            }
            batch.push(Rc::new(DictEntry {
                text: text.to_string(),
                comment: String::new(),
                code: syllabary
                    .map(|s| s.string_to_code(code_str))
                    .unwrap_or_default(),
                custom_code: code_str.to_string(),
                weight: entry_weight(&value, 1.0),
                remaining_code_length: if exact {
                    0
                } else {
                    code_str.len().saturating_sub(key.len())
                },
            }));
            count += 1;
            if limit > 0 && count >= limit {
                // restart after this key on the next page
                last_visited = Some(format!("{}\u{0}", k));
                return false;
            }
            true
        });
        if scan.is_err() {
            return 0;
        }
        if let Some(resume) = resume_key {
            if let Some(last) = last_visited {
                *resume = last;
            }
        }
        iter.append(batch);
        count
    }

    /// Traverse the syllable graph from `start`, collecting user phrases
    /// whose codes are spelt by some path. `max_syllables` of 0 means
    /// unlimited depth.
    pub fn lookup(
        &self,
        graph: &SyllableGraph,
        start: usize,
        max_syllables: usize,
        credibility: f64,
    ) -> Option<UserDictEntryCollector> {
        let syllabary = self.inner.syllabary.get()?.clone();
        let mut collector = UserDictEntryCollector::new();
        let mut path: Vec<SyllableId> = Vec::new();
        self.walk(
            graph,
            start,
            max_syllables,
            credibility,
            &syllabary,
            &mut path,
            &mut collector,
        );
        for list in collector.values_mut() {
            list.sort_by(|a, b| {
                b.weight
                    .partial_cmp(&a.weight)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }
        if collector.is_empty() {
            None
        } else {
            Some(collector)
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn walk(
        &self,
        graph: &SyllableGraph,
        pos: usize,
        depth_left: usize,
        credibility: f64,
        syllabary: &Arc<Syllabary>,
        path: &mut Vec<SyllableId>,
        collector: &mut UserDictEntryCollector,
    ) {
        let Some(index) = graph.indices.get(&pos) else {
            return;
        };
        for (syllable_id, props_list) in index {
            if syllabary.spelling(*syllable_id).is_none() {
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
                let code_str = syllabary.code_to_string(path);
                let prefix = format!("{} \t", code_str);
                let code = path.clone();
                let _ = self.inner.for_each_from(&prefix, &mut |k, v| {
                    if !k.starts_with(&prefix) {
                        return false;
                    }
                    let Some((_, text)) = k.split_once('\t') else {
                        return true;
                    };
                    let value = UserDbValue::parse(v);
                    if value.commits < 0 {
                        return true;
                    }
                    collector
                        .entry(props.end_pos)
                        .or_default()
                        .push(Rc::new(DictEntry {
                            text: text.to_string(),
                            comment: String::new(),
                            code: code.clone(),
                            custom_code: code_str.clone(),
                            weight: entry_weight(&value, credibility),
                            remaining_code_length: 0,
                        }));
                    true
                });
                if props.end_pos < graph.interpreted_length
                    && (depth_left == 0 || depth_left > 1)
                {
                    self.walk(
                        graph,
                        props.end_pos,
                        depth_left.saturating_sub(1),
                        credibility,
                        syllabary,
                        path,
                        collector,
                    );
                }
                path.pop();
            }
        }
    }

    // Raw record access, used by the merge/import/snapshot machinery.

    pub fn fetch_raw(&self, key: &str) -> Option<String> {
        self.inner.fetch(key).ok().flatten()
    }

    pub fn put_raw(&self, key: &str, value: &str) -> Result<()> {
        self.inner.put(key, value).map_err(Error::from)
    }

    pub fn remove_raw(&self, key: &str) -> Result<()> {
        self.inner.remove(key).map_err(Error::from)
    }

    pub fn meta_fetch(&self, key: &str) -> Option<String> {
        self.inner.meta_fetch(key).ok().flatten()
    }

    pub fn meta_put(&self, key: &str, value: &str) -> Result<()> {
        self.inner.meta_put(key, value).map_err(Error::from)
    }

    /// All entries in key order.
    pub fn dump(&self) -> Vec<(String, String)> {
        self.inner.dump().unwrap_or_default()
    }

    /// All metadata in key order.
    pub fn meta_dump(&self) -> Vec<(String, String)> {
        self.inner.meta_dump().unwrap_or_default()
    }

    pub fn entry_count(&self) -> usize {
        self.inner.dump().map(|rows| rows.len()).unwrap_or(0)
    }

    /// Entry snapshot keyed by `"code\ttext"`, for inspection and tests.
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.dump().into_iter().collect()
    }
}

impl Default for UserDict {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct RedbUserDict {
    db: Database,
    path: PathBuf,
    name: String,
    syllabary: OnceCell<Arc<Syllabary>>,
    dee_half_life: AtomicU64,
}

impl RedbUserDict {
    fn entries_def() -> TableDefinition<'static, &'static str, &'static str> {
        TableDefinition::new("entries")
    }

    fn meta_def() -> TableDefinition<'static, &'static str, &'static str> {
        TableDefinition::new("meta")
    }

    fn fetch(&self, key: &str) -> std::result::Result<Option<String>, redb::Error> {
        let r = self.db.begin_read()?;
        match r.open_table(Self::entries_def()) {
            Ok(table) => Ok(table.get(key)?.map(|v| v.value().to_string())),
            Err(e) => {
                if matches!(e, redb::TableError::TableDoesNotExist(_)) {
                    Ok(None)
                } else {
                    Err(e.into())
                }
            }
        }
    }

    fn put(&self, key: &str, value: &str) -> std::result::Result<(), redb::Error> {
        let w = self.db.begin_write()?;
        {
            let mut table = w.open_table(Self::entries_def())?;
            table.insert(key, value)?;
        }
        w.commit()?;
        Ok(())
    }

    fn remove(&self, key: &str) -> std::result::Result<(), redb::Error> {
        let w = self.db.begin_write()?;
        {
            let mut table = w.open_table(Self::entries_def())?;
            table.remove(key)?;
        }
        w.commit()?;
        Ok(())
    }

    fn meta_fetch(&self, key: &str) -> std::result::Result<Option<String>, redb::Error> {
        let r = self.db.begin_read()?;
        match r.open_table(Self::meta_def()) {
            Ok(table) => Ok(table.get(key)?.map(|v| v.value().to_string())),
            Err(e) => {
                if matches!(e, redb::TableError::TableDoesNotExist(_)) {
                    Ok(None)
                } else {
                    Err(e.into())
                }
            }
        }
    }

    fn meta_put(&self, key: &str, value: &str) -> std::result::Result<(), redb::Error> {
        let w = self.db.begin_write()?;
        {
            let mut table = w.open_table(Self::meta_def())?;
            table.insert(key, value)?;
        }
        w.commit()?;
        Ok(())
    }

    /// Visit entries with keys >= `start` in order; the callback returns
    /// false to stop the scan.
    fn for_each_from(
        &self,
        start: &str,
        f: &mut dyn FnMut(&str, &str) -> bool,
    ) -> std::result::Result<(), redb::Error> {
        let r = self.db.begin_read()?;
        match r.open_table(Self::entries_def()) {
            Ok(table) => {
                for item in table.range(start..)? {
                    let (k, v) = item?;
                    if !f(k.value(), v.value()) {
                        break;
                    }
                }
                Ok(())
            }
            Err(e) => {
                if matches!(e, redb::TableError::TableDoesNotExist(_)) {
                    Ok(())
                } else {
                    Err(e.into())
                }
            }
        }
    }

    fn dump(&self) -> std::result::Result<Vec<(String, String)>, redb::Error> {
        let mut out = Vec::new();
        let r = self.db.begin_read()?;
        match r.open_table(Self::entries_def()) {
            Ok(table) => {
                for item in table.iter()? {
                    let (k, v) = item?;
                    out.push((k.value().to_string(), v.value().to_string()));
                }
            }
            Err(e) => {
                if !matches!(e, redb::TableError::TableDoesNotExist(_)) {
                    return Err(e.into());
                }
            }
        }
        Ok(out)
    }

    fn meta_dump(&self) -> std::result::Result<Vec<(String, String)>, redb::Error> {
        let mut out = Vec::new();
        let r = self.db.begin_read()?;
        match r.open_table(Self::meta_def()) {
            Ok(table) => {
                for item in table.iter()? {
                    let (k, v) = item?;
                    out.push((k.value().to_string(), v.value().to_string()));
                }
            }
            Err(e) => {
                if !matches!(e, redb::TableError::TableDoesNotExist(_)) {
                    return Err(e.into());
                }
            }
        }
        Ok(out)
    }
}

impl Drop for RedbUserDict {
    fn drop(&mut self) {
        debug!(path = %self.path.display(), "closing user dict");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::Dict;
    use crate::syllabifier::Syllabifier;

    fn commit(dict: &UserDict, code_str: &str, text: &str, times: i32) {
        let entry = DictEntry {
            text: text.to_string(),
            custom_code: code_str.to_string(),
            ..Default::default()
        };
        dict.update_entry(&entry, times).expect("update");
    }

    #[test]
    fn update_entry_roundtrip() {
        let dict = UserDict::new();
        commit(&dict, "ni hao", "你好", 1);
        commit(&dict, "ni hao", "你好", 2);
        let value = UserDbValue::parse(&dict.fetch_raw("ni hao \t你好").unwrap());
        assert_eq!(value.commits, 3);
        assert!(value.dee > 0.0);
    }

    #[test]
    fn exact_lookup_excludes_longer_codes() {
        let dict = UserDict::new();
        commit(&dict, "abc", "甲", 1);
        commit(&dict, "abcd", "乙", 1);
        let mut iter = UserDictEntryIterator::new();
        let count = dict.lookup_words(&mut iter, "abc", false, 0, None);
        assert_eq!(count, 1);
        assert_eq!(iter.peek().unwrap().text, "甲");
    }

    #[test]
    fn predictive_lookup_pages_with_resume_key() {
        let dict = UserDict::new();
        commit(&dict, "abc", "甲", 1);
        commit(&dict, "abcd", "乙", 1);
        commit(&dict, "abcde", "丙", 1);
        let mut iter = UserDictEntryIterator::new();
        let mut resume = String::new();
        let count = dict.lookup_words(&mut iter, "abc", true, 2, Some(&mut resume));
        assert_eq!(count, 2);
        let count = dict.lookup_words(&mut iter, "abc", true, 2, Some(&mut resume));
        assert_eq!(count, 1);
        assert_eq!(iter.entry_count(), 3);
    }

    #[test]
    fn tombstones_are_invisible() {
        let dict = UserDict::new();
        dict.put_raw("abc \t甲", "c=-1 d=0 t=5").unwrap();
        let mut iter = UserDictEntryIterator::new();
        assert_eq!(dict.lookup_words(&mut iter, "abc", false, 0, None), 0);
    }

    #[test]
    fn graph_lookup_finds_committed_phrases() {
        let mut builder = Dict::builder("demo");
        builder.entry(&["ni", "hao"], "你好", -1.0);
        let sys_dict = builder.build();
        let user = UserDict::new();
        user.attach_syllabary(sys_dict.syllabary().clone());
        commit(&user, "ni hao", "你浩", 3);

        let syllabifier = Syllabifier::new("'", false, false);
        let mut graph = SyllableGraph::default();
        syllabifier.build_syllable_graph("nihao", sys_dict.prism(), &mut graph);
        let collector = user.lookup(&graph, 0, 0, 1.0).expect("user phrases");
        let list = collector.get(&5).expect("full-length bucket");
        assert_eq!(list[0].text, "你浩");
    }
}
