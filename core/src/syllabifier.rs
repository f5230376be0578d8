//! Builds the syllable graph for an input string.
//!
//! The construction is a best-first exploration over `(position, type)`
//! vertices: a vertex is finalized with the best spelling type that reaches
//! it, and later (worse) arrivals at the same position are discarded. A
//! pruning pass then removes everything not on a path to the farthest
//! position, and a final transpose produces the per-start syllable index
//! the dictionaries traverse.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap};

use tracing::debug;

use crate::prism::Prism;
use crate::syllable::{SpellingMap, SpellingType, SyllableGraph};

const EXPAND_SEARCH_LIMIT: usize = 512;
const COMPLETION_PENALTY: f64 = 0.5;

#[derive(Debug, Clone)]
pub struct Syllabifier {
    delimiters: String,
    enable_completion: bool,
    strict_spelling: bool,
}

impl Syllabifier {
    pub fn new(
        delimiters: impl Into<String>,
        enable_completion: bool,
        strict_spelling: bool,
    ) -> Self {
        Syllabifier {
            delimiters: delimiters.into(),
            enable_completion,
            strict_spelling,
        }
    }

    pub fn delimiters(&self) -> &str {
        &self.delimiters
    }

    /// Populate `graph` from `input` and return the farthest position
    /// covered. Empty input yields 0; nothing here fails.
    pub fn build_syllable_graph(
        &self,
        input: &str,
        prism: &Prism,
        graph: &mut SyllableGraph,
    ) -> usize {
        if input.is_empty() {
            return 0;
        }

        let mut farthest = 0usize;
        let mut queue: BinaryHeap<Reverse<(usize, SpellingType)>> = BinaryHeap::new();
        queue.push(Reverse((0, SpellingType::Normal)));

        while let Some(Reverse((current_pos, vertex_type))) = queue.pop() {
            // the preferred spelling type reaches a vertex first
            if graph.vertices.contains_key(&current_pos) {
                continue;
            }
            graph.vertices.insert(current_pos, vertex_type);
            if current_pos > farthest {
                farthest = current_pos;
            }

            for m in prism.common_prefix_search(&input[current_pos..]) {
                if m.length == 0 {
                    continue;
                }
                let mut end_pos = current_pos + m.length;
                // consume trailing delimiters
                while end_pos < input.len() && self.is_delimiter(input.as_bytes()[end_pos]) {
                    end_pos += 1;
                }
                let matches_input = current_pos == 0 && end_pos == input.len();
                let mut spellings = SpellingMap::new();
                let mut end_vertex_type = SpellingType::Invalid;
                for s in prism.query_spelling(m.value) {
                    if self.strict_spelling
                        && matches_input
                        && s.properties.spelling_type != SpellingType::Normal
                    {
                        // disqualify fuzzy spellings and abbreviations as a
                        // whole-input word
                        continue;
                    }
                    let mut props = s.properties.clone();
                    props.end_pos = end_pos;
                    if props.spelling_type < end_vertex_type {
                        end_vertex_type = props.spelling_type;
                    }
                    spellings.entry(s.syllable_id).or_insert(props);
                }
                if spellings.is_empty() {
                    continue;
                }
                graph
                    .edges
                    .entry(current_pos)
                    .or_default()
                    .insert(end_pos, spellings);
                // a downstream vertex inherits the worst type on the best
                // path to it
                if end_vertex_type < vertex_type {
                    end_vertex_type = vertex_type;
                }
                queue.push(Reverse((end_pos, end_vertex_type)));
            }
        }

        self.prune(graph, farthest);

        if self.enable_completion && farthest < input.len() {
            debug!(farthest, "completing unfinished input");
            let code_length = input.len() - farthest;
            let mut spellings = SpellingMap::new();
            for m in prism.expand_search(&input[farthest..], EXPAND_SEARCH_LIMIT) {
                if m.length < code_length {
                    continue;
                }
                for s in prism.query_spelling(m.value) {
                    if s.properties.spelling_type < SpellingType::Abbreviation {
                        let mut props = s.properties.clone();
                        props.spelling_type = SpellingType::Completion;
                        props.credibility *= COMPLETION_PENALTY;
                        props.end_pos = input.len();
                        spellings.entry(s.syllable_id).or_insert(props);
                    }
                }
            }
            if !spellings.is_empty() {
                graph
                    .edges
                    .entry(farthest)
                    .or_default()
                    .insert(input.len(), spellings);
                farthest = input.len();
            }
        }

        graph.input_length = input.len();
        graph.interpreted_length = farthest;
        transpose(graph);
        farthest
    }

    /// Remove vertices and edges that do not lie on a path from 0 to
    /// `farthest`, and spellings of a worse type than the best full path
    /// admits. Also flags ambiguous syllable joints.
    fn prune(&self, graph: &mut SyllableGraph, farthest: usize) {
        let mut good: BTreeSet<usize> = BTreeSet::new();
        good.insert(farthest);
        // fuzzy spellings are immune to invalidation by normal spellings
        let last_type = graph
            .vertices
            .get(&farthest)
            .copied()
            .unwrap_or(SpellingType::Invalid)
            .max(SpellingType::Fuzzy);
        for i in (0..farthest).rev() {
            if !graph.vertices.contains_key(&i) {
                continue;
            }
            let mut overlap_checks: Vec<usize> = Vec::new();
            if let Some(ends) = graph.edges.get_mut(&i) {
                ends.retain(|end_pos, spellings| {
                    if !good.contains(end_pos) {
                        // not connected
                        return false;
                    }
                    // drop disqualified spellings when a path of a more
                    // favored type exists
                    spellings.retain(|_, props| props.spelling_type <= last_type);
                    if spellings.is_empty() {
                        return false;
                    }
                    let edge_type = spellings
                        .values()
                        .map(|props| props.spelling_type)
                        .min()
                        .unwrap_or(SpellingType::Invalid);
                    if edge_type < SpellingType::Abbreviation {
                        overlap_checks.push(*end_pos);
                    }
                    true
                });
            }
            for end_pos in overlap_checks {
                self.check_overlapped_spellings(graph, i, end_pos);
            }
            let no_edges = graph.edges.get(&i).map_or(true, |ends| ends.is_empty());
            if graph.vertices[&i] > last_type || no_edges {
                debug!(position = i, "dropping stale vertex");
                graph.vertices.remove(&i);
                graph.edges.remove(&i);
                continue;
            }
            good.insert(i);
        }
    }

    /// If a span admits both one long syllable and two shorter ones, the
    /// split point is an ambiguous syllable joint.
    fn check_overlapped_spellings(&self, graph: &mut SyllableGraph, start: usize, end: usize) {
        let Some(ends) = graph.edges.get(&start) else {
            return;
        };
        let joints: Vec<usize> = ends.keys().copied().take_while(|&j| j < end).collect();
        for joint in joints {
            let reconverges = graph
                .edges
                .get(&joint)
                .is_some_and(|ends| ends.contains_key(&end));
            if reconverges {
                graph.vertices.insert(joint, SpellingType::Ambiguous);
            }
        }
    }

    fn is_delimiter(&self, byte: u8) -> bool {
        self.delimiters.as_bytes().contains(&byte)
    }
}

/// Build `graph.indices` as the transpose of `graph.edges`, with longer
/// spellings first inside each start position.
fn transpose(graph: &mut SyllableGraph) {
    let SyllableGraph { edges, indices, .. } = graph;
    for (start, ends) in edges.iter() {
        let index = indices.entry(*start).or_default();
        for (_end, spellings) in ends.iter().rev() {
            for (syllable_id, props) in spellings {
                index.entry(*syllable_id).or_default().push(props.clone());
            }
        }
    }
}
