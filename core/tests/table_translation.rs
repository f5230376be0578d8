//! Shape-code translator: lookup preference, lazy expansion, sentence DP
//! and charset filtering.

use std::rc::Rc;
use std::sync::Arc;

use libshuru_core::dictionary::{Dict, DictEntry};
use libshuru_core::translation::{Candidate, Segment, Translation};
use libshuru_core::unity::UNITY_SYMBOL;
use libshuru_core::user_dict::UserDict;
use libshuru_core::{CommitEntry, CommitRecord, Config, TableTranslator};

fn drain(translation: &mut dyn Translation) -> Vec<Rc<Candidate>> {
    let mut out = Vec::new();
    while let Some(cand) = translation.peek() {
        out.push(cand);
        if !translation.next() {
            break;
        }
    }
    out
}

fn eager_config() -> Config {
    Config {
        enable_completion: false,
        enable_sentence: false,
        ..Config::default()
    }
}

fn user_commit(user: &UserDict, code: &str, text: &str, times: i32) {
    let entry = DictEntry {
        text: text.to_string(),
        custom_code: code.to_string(),
        ..Default::default()
    };
    user.update_entry(&entry, times).expect("commit");
}

#[test]
fn complete_user_phrase_outranks_the_table() {
    let mut builder = Dict::builder("table");
    builder.table_entry("abc", "甲", -1.0);
    let dict: Arc<Dict> = builder.build().into();
    let user = UserDict::new();
    user.attach_syllabary(dict.syllabary().clone());
    user_commit(&user, "abc", "乙", 3);

    let translator = TableTranslator::new(dict, Some(user), &eager_config()).unwrap();
    let mut translation = translator.query("abc", &Segment::new(0, 3)).unwrap();
    let candidates = drain(translation.as_mut());
    let texts: Vec<&str> = candidates.iter().map(|c| c.text.as_str()).collect();
    assert_eq!(texts, vec!["乙", "甲"]);
    assert!(candidates.iter().all(|c| c.kind == "table"));
    // dict hit: weight + initial_quality, no bonuses
    assert!((candidates[1].quality + 1.0).abs() < 1e-9);
    assert!((candidates[0].start, candidates[0].end) == (0, 3));
}

#[test]
fn constructed_entries_yield_to_real_complete_hits() {
    let mut builder = Dict::builder("table");
    builder.table_entry("abc", "甲", -1.0);
    let dict: Arc<Dict> = builder.build().into();
    let user = UserDict::new();
    user.attach_syllabary(dict.syllabary().clone());
    // a phrase the unity encoder packed earlier
    user.put_raw("\u{1}abc \t丙丁", "c=2 d=1 t=1").unwrap();

    let config = Config {
        enable_encoder: true,
        ..eager_config()
    };
    let translator = TableTranslator::new(dict, Some(user), &config).unwrap();
    let mut translation = translator.query("abc", &Segment::new(0, 3)).unwrap();
    let candidates = drain(translation.as_mut());
    let texts: Vec<&str> = candidates.iter().map(|c| c.text.as_str()).collect();
    assert_eq!(texts, vec!["甲", "丙丁"]);
    // constructed entries display the unity symbol, not their own comment
    assert_eq!(candidates[1].comment, UNITY_SYMBOL);
}

#[test]
fn lazy_expansion_grows_limits_and_reaches_every_entry() {
    let mut builder = Dict::builder("table");
    builder.table_entry("a", "阿", -0.5);
    for i in 0..24 {
        builder.table_entry(&format!("a{:02}", i), &format!("字{i:02}"), -1.0 - i as f64);
    }
    let dict: Arc<Dict> = builder.build().into();
    let config = Config {
        enable_completion: true,
        enable_sentence: false,
        ..Config::default()
    };
    let translator = TableTranslator::new(dict, None, &config).unwrap();
    let mut translation = translator.query("a", &Segment::new(0, 1)).unwrap();
    let candidates = drain(translation.as_mut());
    // the exact hit plus all 24 prefix expansions, across refills
    assert_eq!(candidates.len(), 25);
    assert_eq!(candidates[0].text, "阿");
    assert_eq!(candidates[0].kind, "table");
    assert!(candidates[1..].iter().all(|c| c.kind == "completion"));
    // incomplete hits are penalized by one
    assert!((candidates[1].quality - (-1.0 - 1.0)).abs() < 1e-9);
}

#[test]
fn sentence_dp_covers_what_lookups_cannot() {
    let mut builder = Dict::builder("table");
    builder.table_entry("wo", "我", -2.0);
    builder.table_entry("de", "的", -2.0);
    builder.table_entry("wode", "我的", -1.0);
    builder.table_entry("guo", "国", -2.0);
    builder.table_entry("jia", "家", -2.0);
    let dict: Arc<Dict> = builder.build().into();
    let config = Config {
        enable_completion: false,
        enable_sentence: true,
        ..Config::default()
    };
    let translator = TableTranslator::new(dict, None, &config).unwrap();
    let mut translation = translator.query("wodeguojia", &Segment::new(0, 10)).unwrap();
    let candidates = drain(translation.as_mut());
    assert_eq!(candidates[0].kind, "sentence");
    assert_eq!(candidates[0].text, "我的国家");
    assert_eq!(candidates[0].preedit, "wode guo jia");
    assert_eq!(candidates[0].comment, UNITY_SYMBOL);
    // words found at position 0 follow, longest code first
    assert_eq!(candidates[1].text, "我的");
    assert_eq!((candidates[1].start, candidates[1].end), (0, 4));
    assert_eq!(candidates[2].text, "我");

    // sentence stops walk its own syllable lengths
    let stops = candidates[0].syllabification().expect("alive");
    assert_eq!(stops.next_stop(0), 4);
    assert_eq!(stops.next_stop(4), 7);
    assert_eq!(stops.previous_stop(10), 7);
}

#[test]
fn sentence_rides_over_a_completion_first_translation() {
    let mut builder = Dict::builder("table");
    builder.table_entry("wo", "我", -2.0);
    builder.table_entry("d", "的", -2.5);
    builder.table_entry("wode", "我得", -1.0);
    let dict: Arc<Dict> = builder.build().into();
    let config = Config {
        enable_completion: true,
        enable_sentence: false,
        sentence_over_completion: true,
        ..Config::default()
    };
    let translator = TableTranslator::new(dict, None, &config).unwrap();
    let mut translation = translator.query("wod", &Segment::new(0, 3)).unwrap();
    let candidates = drain(translation.as_mut());
    assert_eq!(candidates[0].kind, "sentence");
    assert_eq!(candidates[0].text, "我的");
    assert_eq!(candidates[1].kind, "completion");
    assert_eq!(candidates[1].text, "我得");
}

#[test]
fn charset_filter_hides_rare_ideographs() {
    let mut builder = Dict::builder("table");
    builder.table_entry("abc", "\u{20000}", -0.5);
    builder.table_entry("abc", "好", -1.0);
    let dict: Arc<Dict> = builder.build().into();

    let filtered = Config {
        enable_charset_filter: true,
        ..eager_config()
    };
    let translator = TableTranslator::new(dict.clone(), None, &filtered).unwrap();
    let mut translation = translator.query("abc", &Segment::new(0, 3)).unwrap();
    let texts: Vec<String> = drain(translation.as_mut())
        .iter()
        .map(|c| c.text.clone())
        .collect();
    assert_eq!(texts, vec!["好"]);

    let extended = Config {
        enable_charset_filter: true,
        extended_charset: true,
        ..eager_config()
    };
    let translator = TableTranslator::new(dict, None, &extended).unwrap();
    let mut translation = translator.query("abc", &Segment::new(0, 3)).unwrap();
    let texts: Vec<String> = drain(translation.as_mut())
        .iter()
        .map(|c| c.text.clone())
        .collect();
    assert_eq!(texts, vec!["\u{20000}", "好"]);
}

#[test]
fn memorize_encodes_phrases_and_history() {
    let mut builder = Dict::builder("table");
    builder.table_entry("aa", "明", -1.0);
    builder.table_entry("bb", "天", -1.0);
    let dict: Arc<Dict> = builder.build().into();
    let user = UserDict::new();
    user.attach_syllabary(dict.syllabary().clone());
    let config = Config {
        enable_encoder: true,
        encode_commit_history: true,
        ..eager_config()
    };
    let translator = TableTranslator::new(dict.clone(), Some(user.clone()), &config).unwrap();

    let ming = Rc::new(DictEntry {
        text: "明".to_string(),
        code: dict.syllabary().string_to_code("aa"),
        ..Default::default()
    });
    let tian = Rc::new(DictEntry {
        text: "天".to_string(),
        code: dict.syllabary().string_to_code("bb"),
        ..Default::default()
    });
    let commit = CommitEntry {
        text: "明天".to_string(),
        code: Vec::new(),
        elements: vec![ming, tian],
    };
    let history = vec![
        CommitRecord {
            kind: "table".to_string(),
            text: "明".to_string(),
        },
        CommitRecord {
            kind: "table".to_string(),
            text: "天".to_string(),
        },
        CommitRecord {
            kind: "punct".to_string(),
            text: "。".to_string(),
        },
    ];
    translator.memorize(&commit, &history).unwrap();

    let snapshot = user.snapshot();
    assert!(snapshot.get("aa \t明").expect("element").contains("c=1"));
    assert!(snapshot.get("bb \t天").expect("element").contains("c=1"));
    // the multi-element commit was packed under the unity prefix
    let constructed = snapshot.get("\u{1}aabb \t明天").expect("encoded phrase");
    assert!(constructed.contains("c=1"));
}

#[test]
fn committing_a_constructed_phrase_blesses_it() {
    let mut builder = Dict::builder("table");
    builder.table_entry("aa", "明", -1.0);
    let dict: Arc<Dict> = builder.build().into();
    let user = UserDict::new();
    user.attach_syllabary(dict.syllabary().clone());
    let translator =
        TableTranslator::new(dict, Some(user.clone()), &eager_config()).unwrap();

    let constructed = Rc::new(DictEntry {
        text: "明天".to_string(),
        custom_code: "\u{1}aabb".to_string(),
        ..Default::default()
    });
    let commit = CommitEntry {
        text: "明天".to_string(),
        code: Vec::new(),
        elements: vec![constructed],
    };
    translator.memorize(&commit, &[]).unwrap();
    // the unity prefix is stripped on commit
    assert!(user.snapshot().contains_key("aabb \t明天"));
}
