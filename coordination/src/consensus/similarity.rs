//! Lexical agreement between agent outputs
//!
//! Outputs are reduced to lowercase word sets and compared with Jaccard
//! overlap (shared words / union of words).

use std::collections::HashSet;

use crate::state::AgentOutput;

/// Lowercase word set of a text. Words are runs of alphanumerics or `_`.
pub fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

/// Jaccard overlap of two word sets. Two empty sets are identical.
pub fn jaccard_similarity(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    intersection as f64 / union as f64
}

/// Mean pairwise overlap across all outputs (0.0-1.0).
///
/// Fewer than two outputs have nothing to agree with and score 0.0.
pub fn pairwise_agreement(outputs: &[AgentOutput]) -> f64 {
    if outputs.len() < 2 {
        return 0.0;
    }
    let sets: Vec<HashSet<String>> = outputs.iter().map(|o| tokenize(&o.output)).collect();

    let mut total = 0.0;
    let mut pairs = 0usize;
    for i in 0..sets.len() {
        for j in (i + 1)..sets.len() {
            total += jaccard_similarity(&sets[i], &sets[j]);
            pairs += 1;
        }
    }
    total / pairs as f64
}

/// Per-output sum of overlap against every other output.
pub fn overlap_scores(outputs: &[AgentOutput]) -> Vec<f64> {
    let sets: Vec<HashSet<String>> = outputs.iter().map(|o| tokenize(&o.output)).collect();
    let mut scores = vec![0.0; sets.len()];
    for i in 0..sets.len() {
        for j in (i + 1)..sets.len() {
            let sim = jaccard_similarity(&sets[i], &sets[j]);
            scores[i] += sim;
            scores[j] += sim;
        }
    }
    scores
}

/// Index of the most representative output; ties go to the earliest index.
pub fn best_output_index(outputs: &[AgentOutput]) -> Option<usize> {
    if outputs.is_empty() {
        return None;
    }
    let scores = overlap_scores(outputs);
    let mut best = 0;
    for (idx, score) in scores.iter().enumerate().skip(1) {
        if *score > scores[best] {
            best = idx;
        }
    }
    Some(best)
}

/// The output with the highest total overlap against all others.
pub fn select_best_output(outputs: &[AgentOutput]) -> String {
    best_output_index(outputs)
        .map(|idx| outputs[idx].output.clone())
        .unwrap_or_default()
}
