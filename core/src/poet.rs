//! Sentence construction over a word graph.
//!
//! The word graph maps a start position to the entries beginning there,
//! keyed by their end position. Forward dynamic programming keeps the best
//! partial sentence per position; on equal weight the newer extension wins,
//! which lets later, more specific sources override earlier ones.

use std::collections::BTreeMap;

use crate::dictionary::UserDictEntryCollector;
use crate::translation::Sentence;

/// Start position to candidate extensions, keyed by end position.
pub type WordGraph = BTreeMap<usize, UserDictEntryCollector>;

#[derive(Debug, Default)]
pub struct Poet;

impl Poet {
    pub fn new() -> Self {
        Poet
    }

    /// Best sentence covering `[0, total_length)`, if the graph admits one.
    pub fn make_sentence(&self, graph: &WordGraph, total_length: usize) -> Option<Sentence> {
        let mut sentences: BTreeMap<usize, Sentence> = BTreeMap::new();
        sentences.insert(0, Sentence::new(0));
        for (&start_pos, collector) in graph {
            let Some(base) = sentences.get(&start_pos).cloned() else {
                continue;
            };
            for (&end_pos, entries) in collector {
                for entry in entries {
                    let mut extended = base.clone();
                    extended.extend(entry, end_pos);
                    match sentences.get(&end_pos) {
                        Some(best) if best.weight > extended.weight => {}
                        _ => {
                            sentences.insert(end_pos, extended);
                        }
                    }
                }
            }
        }
        sentences.remove(&total_length)
    }
}
