//! User-db sync: value round trips, merge laws, import, snapshots and
//! recovery.

use std::path::PathBuf;

use libshuru_core::user_db::{
    read_snapshot, uniform_backup, uniform_restore, UserDbImporter, UserDbMerger,
    UserDbRecoveryTask, UserDbValue, META_TICK,
};
use libshuru_core::UserDict;

fn temp_path(name: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    path.push(format!("shuru_{}_{}_{}", name, std::process::id(), nanos));
    path
}

#[test]
fn pack_unpack_roundtrip_over_a_value_sweep() {
    let samples = [
        UserDbValue::default(),
        UserDbValue {
            commits: 1,
            dee: 0.5,
            tick: 1,
        },
        UserDbValue {
            commits: -7,
            dee: 123.456,
            tick: u64::MAX,
        },
        UserDbValue {
            commits: i32::MAX,
            dee: 1e-9,
            tick: 42,
        },
    ];
    for value in samples {
        assert_eq!(UserDbValue::parse(&value.pack()), value);
    }
}

#[test]
fn merge_combines_fields_with_decay() {
    let ours = UserDict::new();
    ours.put_raw("k \t词", "c=3 d=1.0 t=10").unwrap();
    ours.meta_put(META_TICK, "10").unwrap();

    let theirs = UserDict::new();
    theirs.put_raw("k \t词", "c=5 d=2.0 t=20").unwrap();
    theirs.meta_put(META_TICK, "20").unwrap();
    let snapshot = temp_path("their.userdb.txt");
    uniform_backup(&theirs, &snapshot).unwrap();

    // half-life 10 makes decay(|10-20|) = 0.5
    let mut merger = UserDbMerger::new(&ours, 10);
    read_snapshot(&snapshot, &mut merger).unwrap();
    assert_eq!(merger.merged_entries(), 1);
    merger.close_merge().unwrap();
    drop(merger);

    let merged = UserDbValue::parse(&ours.fetch_raw("k \t词").unwrap());
    assert_eq!(merged.commits, 5);
    assert_eq!(merged.dee, 1.0);
    assert_eq!(merged.tick, 20);
    assert_eq!(ours.meta_fetch(META_TICK).unwrap(), "20");
    let _ = std::fs::remove_file(snapshot);
}

#[test]
fn merge_is_idempotent() {
    let ours = UserDict::new();
    ours.put_raw("k \t词", "c=3 d=1.0 t=10").unwrap();

    let theirs = UserDict::new();
    theirs.put_raw("k \t词", "c=5 d=2.0 t=20").unwrap();
    theirs.meta_put(META_TICK, "20").unwrap();
    let snapshot = temp_path("idem.userdb.txt");
    uniform_backup(&theirs, &snapshot).unwrap();

    for _ in 0..2 {
        let mut merger = UserDbMerger::new(&ours, 10);
        read_snapshot(&snapshot, &mut merger).unwrap();
        merger.close_merge().unwrap();
    }
    // idempotence is promised on (commits, tick); dee keeps decaying
    let merged = UserDbValue::parse(&ours.fetch_raw("k \t词").unwrap());
    assert_eq!((merged.commits, merged.tick), (5, 20));
    let _ = std::fs::remove_file(snapshot);
}

#[test]
fn merge_is_commutative_on_commits_and_tick() {
    let value_a = "c=4 d=0.25 t=30";
    let value_b = "c=-4 d=0.75 t=18";

    let run = |first: &str, second: &str| -> (i32, u64) {
        let db = UserDict::new();
        db.put_raw("k \t词", first).unwrap();
        let other = UserDict::new();
        other.put_raw("k \t词", second).unwrap();
        other.meta_put(META_TICK, "0").unwrap();
        let snapshot = temp_path("comm.userdb.txt");
        uniform_backup(&other, &snapshot).unwrap();
        let mut merger = UserDbMerger::new(&db, 12);
        read_snapshot(&snapshot, &mut merger).unwrap();
        merger.close_merge().unwrap();
        drop(merger);
        let _ = std::fs::remove_file(snapshot);
        let merged = UserDbValue::parse(&db.fetch_raw("k \t词").unwrap());
        (merged.commits, merged.tick)
    };

    assert_eq!(run(value_a, value_b), run(value_b, value_a));
}

#[test]
fn importer_adds_commits_and_honors_tombstones() {
    let db = UserDict::new();
    db.put_raw("abc \t甲", "c=2 d=0.5 t=3").unwrap();
    db.put_raw("dead \t乙", "c=9 d=0 t=1").unwrap();

    let mut importer = UserDbImporter::new(&db);
    use libshuru_core::user_db::Sink;
    importer.put("abc \t甲", "c=3 d=0.25 t=7");
    importer.put("dead \t乙", "c=-1 d=0 t=9");
    importer.put("new \t丙", "c=1 d=0 t=2");

    let merged = UserDbValue::parse(&db.fetch_raw("abc \t甲").unwrap());
    assert_eq!(merged.commits, 5);
    assert_eq!(merged.tick, 7);
    assert_eq!(merged.dee, 0.5);
    assert!(db.fetch_raw("dead \t乙").is_none());
    assert!(db.fetch_raw("new \t丙").is_some());
}

#[test]
fn snapshot_backup_then_restore_preserves_entries() {
    let source = UserDict::new();
    source.put_raw("ni hao \t你好", "c=4 d=1.5 t=11").unwrap();
    source.put_raw("ma \t吗", "c=1 d=0.5 t=9").unwrap();
    source.meta_put(META_TICK, "11").unwrap();
    let snapshot = temp_path("backup.userdb.txt");
    uniform_backup(&source, &snapshot).unwrap();

    let target = UserDict::new();
    let restored = uniform_restore(&target, &snapshot, || Ok(0)).unwrap();
    assert_eq!(restored, 2);
    assert_eq!(
        target.fetch_raw("ni hao \t你好"),
        source.fetch_raw("ni hao \t你好")
    );
    assert_eq!(target.fetch_raw("ma \t吗"), source.fetch_raw("ma \t吗"));
    assert_eq!(target.meta_fetch(META_TICK).unwrap(), "11");
    let _ = std::fs::remove_file(snapshot);
}

#[test]
fn malformed_snapshot_falls_back() {
    let db = UserDict::new();
    let snapshot = temp_path("bad.userdb.txt");
    std::fs::write(&snapshot, "this is not a snapshot\n").unwrap();
    let mut fallback_ran = false;
    let restored = uniform_restore(&db, &snapshot, || {
        fallback_ran = true;
        Ok(0)
    })
    .unwrap();
    assert_eq!(restored, 0);
    assert!(fallback_ran);
    let _ = std::fs::remove_file(snapshot);
}

#[test]
fn recovery_task_rebuilds_from_the_latest_snapshot() {
    let dir = temp_path("recovery_dir");
    std::fs::create_dir_all(&dir).unwrap();
    let db_path = dir.join("user.userdb.redb");

    // a healthy db, snapshotted, then corrupted on disk
    {
        let db = UserDict::open(&db_path).unwrap();
        db.put_raw("abc \t甲", "c=6 d=2 t=4").unwrap();
        uniform_backup(&db, &dir.join("user.userdb.txt")).unwrap();
    }
    std::fs::write(&db_path, "garbage, not a database").unwrap();

    let recovered = UserDbRecoveryTask::new(&db_path).run().unwrap();
    let value = UserDbValue::parse(&recovered.fetch_raw("abc \t甲").unwrap());
    assert_eq!(value.commits, 6);

    let _ = std::fs::remove_dir_all(dir);
}
