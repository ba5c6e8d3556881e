//! Human-readable comparison of stage outputs against the consensus output

use std::collections::HashSet;
use std::fmt::Write;

use super::similarity::{best_output_index, jaccard_similarity, tokenize};
use crate::state::AgentOutput;

/// Sample lines shown per divergent output
const MAX_SAMPLE_LINES: usize = 3;
/// Sample lines are cut to this many characters
const MAX_LINE_CHARS: usize = 120;

/// Summarize where each output diverges from the consensus output.
pub fn summarize_agreements(outputs: &[AgentOutput]) -> String {
    let Some(best_idx) = best_output_index(outputs) else {
        return "No outputs to compare".to_string();
    };
    let best = &outputs[best_idx];
    if outputs.len() == 1 {
        return format!("Single output from {}; no comparison available", best.agent_id);
    }

    if outputs.iter().all(|o| o.output == best.output) {
        return format!("All {} outputs are identical", outputs.len());
    }

    let best_words = tokenize(&best.output);
    let best_lines = line_set(&best.output);

    let mut summary = format!(
        "Consensus output: {} ({} outputs compared)\n",
        best.agent_id,
        outputs.len()
    );

    for (idx, other) in outputs.iter().enumerate() {
        if idx == best_idx {
            continue;
        }
        let overlap = jaccard_similarity(&best_words, &tokenize(&other.output));
        let other_lines = line_set(&other.output);

        let added: Vec<&str> = ordered_difference(&other.output, &best_lines);
        let missing: Vec<&str> = ordered_difference(&best.output, &other_lines);

        let _ = writeln!(
            summary,
            "{}: {:.0}% word overlap, {} lines added, {} lines missing{}",
            other.agent_id,
            overlap * 100.0,
            added.len(),
            missing.len(),
            if other.succeeded() {
                String::new()
            } else {
                format!(" (exit code {})", other.exit_code)
            }
        );
        for line in added.iter().take(MAX_SAMPLE_LINES) {
            let _ = writeln!(summary, "  + {}", truncate(line));
        }
        for line in missing.iter().take(MAX_SAMPLE_LINES) {
            let _ = writeln!(summary, "  - {}", truncate(line));
        }
    }

    summary.trim_end().to_string()
}

fn line_set(text: &str) -> HashSet<&str> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect()
}

/// Trimmed non-empty lines of `text` not present in `other`, first occurrence only
fn ordered_difference<'a>(text: &'a str, other: &HashSet<&str>) -> Vec<&'a str> {
    let mut seen = HashSet::new();
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !other.contains(l) && seen.insert(*l))
        .collect()
}

fn truncate(line: &str) -> String {
    if line.chars().count() <= MAX_LINE_CHARS {
        line.to_string()
    } else {
        let cut: String = line.chars().take(MAX_LINE_CHARS).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_and_single() {
        assert_eq!(summarize_agreements(&[]), "No outputs to compare");
        let single = summarize_agreements(&[AgentOutput::new("claude", "x", 0)]);
        assert!(single.contains("Single output from claude"));
    }

    #[test]
    fn test_identical() {
        let outputs = vec![
            AgentOutput::new("a", "same", 0),
            AgentOutput::new("b", "same", 0),
        ];
        assert_eq!(summarize_agreements(&outputs), "All 2 outputs are identical");
    }

    #[test]
    fn test_divergent_lines_listed() {
        let outputs = vec![
            AgentOutput::new("a", "use a mutex\nguard the table", 0),
            AgentOutput::new("b", "use a mutex\nguard the table", 0),
            AgentOutput::new("c", "use a mutex\nspawn a thread per job", 1),
        ];
        let summary = summarize_agreements(&outputs);
        assert!(summary.starts_with("Consensus output: a"));
        assert!(summary.contains("c: "));
        assert!(summary.contains("(exit code 1)"));
        assert!(summary.contains("  + spawn a thread per job"));
        assert!(summary.contains("  - guard the table"));
        assert!(summary.contains("b: 100% word overlap, 0 lines added, 0 lines missing"));
    }
}
