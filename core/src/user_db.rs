//! User-db value semantics, sync merge, import, and snapshots.
//!
//! Every user-dict value is a `(commits, dee, tick)` triple packed as
//! `c=<int> d=<float> t=<uint64>`. The field-wise merge rules here are what
//! make user dictionaries mergeable across machines and restorable from
//! text snapshots; keeping the exact token format makes snapshots
//! interchangeable across implementations.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::user_dict::UserDict;

pub type TickCount = u64;

pub const META_DB_NAME: &str = "/db_name";
pub const META_USER_ID: &str = "/user_id";
pub const META_TICK: &str = "/tick";
pub const META_VERSION: &str = "/rime_version";

/// Snapshot file extension shared by all user-db snapshots.
pub const SNAPSHOT_EXTENSION: &str = ".userdb.txt";

/// Ticks for `dee` to halve during merge, unless configured otherwise.
pub const DEFAULT_DEE_HALF_LIFE: u64 = 1000;

/// Decay applied to a foreign `dee` across a tick delta.
pub fn decay_factor(delta: TickCount, half_life: u64) -> f64 {
    0.5f64.powf(delta as f64 / half_life.max(1) as f64)
}

/// Identity stamped into snapshots and merged dbs.
pub fn user_id() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UserDbValue {
    pub commits: i32,
    pub dee: f64,
    pub tick: TickCount,
}

impl UserDbValue {
    /// Lenient parse: unknown fields are ignored, missing or malformed
    /// fields default to zero.
    pub fn parse(packed: &str) -> Self {
        let mut value = UserDbValue::default();
        for token in packed.split_whitespace() {
            if let Some(rest) = token.strip_prefix("c=") {
                value.commits = rest.parse().unwrap_or(0);
            } else if let Some(rest) = token.strip_prefix("d=") {
                value.dee = rest.parse().unwrap_or(0.0);
            } else if let Some(rest) = token.strip_prefix("t=") {
                value.tick = rest.parse().unwrap_or(0);
            }
        }
        value
    }

    pub fn pack(&self) -> String {
        format!("c={} d={} t={}", self.commits, self.dee, self.tick)
    }
}

/// Receives a stream of records from a snapshot or a foreign db.
pub trait Sink {
    fn meta_put(&mut self, key: &str, value: &str) -> bool;
    fn put(&mut self, key: &str, value: &str) -> bool;
}

/// Field-wise combination used during sync merge.
///
/// Commits keep whichever side has the larger magnitude, preserving its
/// sign, so tombstones (negative commits) survive a merge against a smaller
/// positive count; an equal-magnitude tie keeps the tombstone.
fn combine(ours: UserDbValue, theirs: UserDbValue, half_life: u64) -> UserDbValue {
    let commits = if theirs.commits.abs() > ours.commits.abs() {
        theirs.commits
    } else if ours.commits.abs() > theirs.commits.abs() {
        ours.commits
    } else {
        ours.commits.min(theirs.commits)
    };
    let delta = ours.tick.abs_diff(theirs.tick);
    UserDbValue {
        commits,
        dee: ours.dee.max(theirs.dee * decay_factor(delta, half_life)),
        tick: ours.tick.max(theirs.tick),
    }
}

/// Merges a snapshot of another machine's user db into the current one.
pub struct UserDbMerger<'a> {
    db: &'a UserDict,
    our_tick: TickCount,
    their_tick: TickCount,
    max_tick: TickCount,
    merged_entries: usize,
    half_life: u64,
    closed: bool,
}

impl<'a> UserDbMerger<'a> {
    pub fn new(db: &'a UserDict, half_life: u64) -> Self {
        let our_tick = db.tick();
        UserDbMerger {
            db,
            our_tick,
            their_tick: 0,
            max_tick: our_tick,
            merged_entries: 0,
            half_life,
            closed: false,
        }
    }

    pub fn merged_entries(&self) -> usize {
        self.merged_entries
    }

    pub fn close_merge(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        debug!(entries = self.merged_entries, tick = self.max_tick, "closing merge");
        self.db.meta_put(META_TICK, &self.max_tick.to_string())?;
        self.db.meta_put(META_USER_ID, &user_id())?;
        Ok(())
    }
}

impl Sink for UserDbMerger<'_> {
    fn meta_put(&mut self, key: &str, value: &str) -> bool {
        if key == META_TICK {
            self.their_tick = value.parse().unwrap_or(0);
            self.max_tick = self.max_tick.max(self.their_tick);
            return true;
        }
        self.db.meta_put(key, value).is_ok()
    }

    fn put(&mut self, key: &str, value: &str) -> bool {
        let theirs = UserDbValue::parse(value);
        let merged = match self.db.fetch_raw(key) {
            Some(existing) => combine(UserDbValue::parse(&existing), theirs, self.half_life),
            None => theirs,
        };
        self.max_tick = self
            .max_tick
            .max(self.our_tick)
            .max(self.their_tick)
            .max(merged.tick);
        if self.db.put_raw(key, &merged.pack()).is_ok() {
            self.merged_entries += 1;
            true
        } else {
            false
        }
    }
}

impl Drop for UserDbMerger<'_> {
    fn drop(&mut self) {
        let _ = self.close_merge();
    }
}

/// Imports entries, adding commit counts; negative incoming commits delete.
pub struct UserDbImporter<'a> {
    db: &'a UserDict,
}

impl<'a> UserDbImporter<'a> {
    pub fn new(db: &'a UserDict) -> Self {
        UserDbImporter { db }
    }
}

impl Sink for UserDbImporter<'_> {
    fn meta_put(&mut self, _key: &str, _value: &str) -> bool {
        true
    }

    fn put(&mut self, key: &str, value: &str) -> bool {
        let incoming = UserDbValue::parse(value);
        if incoming.commits < 0 {
            return self.db.remove_raw(key).is_ok();
        }
        let merged = match self.db.fetch_raw(key) {
            Some(existing) => {
                let existing = UserDbValue::parse(&existing);
                UserDbValue {
                    commits: existing.commits + incoming.commits,
                    dee: existing.dee.max(incoming.dee),
                    tick: existing.tick.max(incoming.tick),
                }
            }
            None => incoming,
        };
        self.db.put_raw(key, &merged.pack()).is_ok()
    }
}

/// Write a snapshot: meta rows first, then `code \ttext\tvalue` rows.
pub fn uniform_backup(db: &UserDict, snapshot: &Path) -> Result<usize> {
    let mut out = String::new();
    let mut metas = db.meta_dump();
    if !metas.iter().any(|(k, _)| k == META_TICK) {
        metas.push((META_TICK.to_string(), db.tick().to_string()));
    }
    for (key, value) in metas {
        out.push_str(&key);
        out.push('\t');
        out.push_str(&value);
        out.push('\n');
    }
    let rows = db.dump();
    for (key, value) in &rows {
        out.push_str(key);
        out.push('\t');
        out.push_str(value);
        out.push('\n');
    }
    std::fs::write(snapshot, out)?;
    Ok(rows.len())
}

enum SnapshotRow {
    Meta(String, String),
    Entry(String, String),
}

fn parse_snapshot(path: &Path) -> Result<Vec<SnapshotRow>> {
    let content = std::fs::read_to_string(path)?;
    let mut rows = Vec::new();
    let mut saw_db_name = false;
    for line in content.lines() {
        if line.is_empty() {
            continue;
        }
        if line.starts_with('/') {
            let (key, value) = line
                .split_once('\t')
                .ok_or_else(|| Error::SnapshotFormat(format!("bad meta row: {line:?}")))?;
            if key == META_DB_NAME {
                saw_db_name = true;
            }
            rows.push(SnapshotRow::Meta(key.to_string(), value.to_string()));
        } else {
            let fields: Vec<&str> = line.splitn(3, '\t').collect();
            if fields.len() != 3 {
                return Err(Error::SnapshotFormat(format!("bad entry row: {line:?}")));
            }
            rows.push(SnapshotRow::Entry(
                format!("{}\t{}", fields[0], fields[1]),
                fields[2].to_string(),
            ));
        }
    }
    if !saw_db_name {
        return Err(Error::SnapshotFormat("missing /db_name meta row".into()));
    }
    Ok(rows)
}

/// Feed a validated snapshot into a sink. The whole file is validated
/// before the first record is delivered.
pub fn read_snapshot(path: &Path, sink: &mut dyn Sink) -> Result<usize> {
    let rows = parse_snapshot(path)?;
    let mut entries = 0;
    for row in rows {
        match row {
            SnapshotRow::Meta(key, value) => {
                sink.meta_put(&key, &value);
            }
            SnapshotRow::Entry(key, value) => {
                sink.put(&key, &value);
                entries += 1;
            }
        }
    }
    Ok(entries)
}

/// Restore a db from a snapshot, falling back to the caller's native
/// restore when the snapshot format does not match.
pub fn uniform_restore<F>(db: &UserDict, snapshot: &Path, fallback: F) -> Result<usize>
where
    F: FnOnce() -> Result<usize>,
{
    let rows = match parse_snapshot(snapshot) {
        Ok(rows) => rows,
        Err(Error::SnapshotFormat(reason)) => {
            warn!(%reason, "snapshot format mismatch, trying native restore");
            return fallback();
        }
        Err(e) => return Err(e),
    };
    let mut entries = 0;
    let mut snapshot_tick: TickCount = 0;
    {
        let mut importer = UserDbImporter::new(db);
        for row in rows {
            match row {
                SnapshotRow::Meta(key, value) => {
                    if key == META_TICK {
                        snapshot_tick = value.parse().unwrap_or(0);
                    }
                }
                SnapshotRow::Entry(key, value) => {
                    importer.put(&key, &value);
                    entries += 1;
                }
            }
        }
    }
    let tick = db.tick().max(snapshot_tick);
    db.meta_put(META_TICK, &tick.to_string())?;
    db.meta_put(META_DB_NAME, db.name())?;
    db.meta_put(META_USER_ID, &user_id())?;
    db.meta_put(META_VERSION, env!("CARGO_PKG_VERSION"))?;
    Ok(entries)
}

/// On startup, replace a user db that fails to open with a fresh one
/// restored from the latest snapshot, if any.
pub struct UserDbRecoveryTask {
    db_path: PathBuf,
}

impl UserDbRecoveryTask {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Self {
        UserDbRecoveryTask {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    pub fn run(&self) -> Result<UserDict> {
        match UserDict::open(&self.db_path) {
            Ok(db) => Ok(db),
            Err(e) => {
                warn!(path = %self.db_path.display(), error = %e, "user db failed to open, recovering");
                let corrupt = self.db_path.with_extension("corrupt");
                std::fs::rename(&self.db_path, &corrupt)?;
                let db = UserDict::open(&self.db_path)?;
                if let Some(snapshot) = self.latest_snapshot() {
                    debug!(snapshot = %snapshot.display(), "restoring from snapshot");
                    if let Err(e) = uniform_restore(&db, &snapshot, || {
                        Err(Error::SnapshotFormat("no native restore for redb".into()))
                    }) {
                        warn!(error = %e, "snapshot restore failed, keeping empty db");
                    }
                }
                Ok(db)
            }
        }
    }

    fn latest_snapshot(&self) -> Option<PathBuf> {
        let dir = self.db_path.parent()?;
        let stem = self
            .db_path
            .file_name()?
            .to_string_lossy()
            .trim_end_matches(".userdb.redb")
            .trim_end_matches(".redb")
            .to_string();
        let mut best: Option<(std::time::SystemTime, PathBuf)> = None;
        for entry in std::fs::read_dir(dir).ok()?.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(&stem) || !name.ends_with(SNAPSHOT_EXTENSION) {
                continue;
            }
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(std::time::UNIX_EPOCH);
            if best.as_ref().map_or(true, |(t, _)| modified >= *t) {
                best = Some((modified, entry.path()));
            }
        }
        best.map(|(_, path)| path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_roundtrip() {
        let value = UserDbValue {
            commits: 42,
            dee: 1.25,
            tick: 99,
        };
        assert_eq!(UserDbValue::parse(&value.pack()), value);
    }

    #[test]
    fn parse_ignores_unknown_fields_and_defaults_missing() {
        let value = UserDbValue::parse("x=9 c=3 junk t=7");
        assert_eq!(value.commits, 3);
        assert_eq!(value.dee, 0.0);
        assert_eq!(value.tick, 7);
        assert_eq!(UserDbValue::parse("garbage"), UserDbValue::default());
    }

    #[test]
    fn combine_keeps_magnitude_and_sign() {
        let ours = UserDbValue {
            commits: 3,
            dee: 1.0,
            tick: 10,
        };
        let theirs = UserDbValue {
            commits: -5,
            dee: 0.0,
            tick: 12,
        };
        let merged = combine(ours, theirs, 10);
        assert_eq!(merged.commits, -5);
        assert_eq!(merged.tick, 12);
    }

    #[test]
    fn combine_tie_prefers_tombstone() {
        let a = UserDbValue {
            commits: 4,
            ..Default::default()
        };
        let b = UserDbValue {
            commits: -4,
            ..Default::default()
        };
        assert_eq!(combine(a, b, 10).commits, -4);
        assert_eq!(combine(b, a, 10).commits, -4);
    }

    #[test]
    fn decay_halves_at_half_life() {
        assert!((decay_factor(10, 10) - 0.5).abs() < 1e-12);
        assert_eq!(decay_factor(0, 10), 1.0);
    }
}
