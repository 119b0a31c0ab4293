//! Majority vote over consistency paths.

use serde::{Deserialize, Serialize};

use crate::types::ConsistencyPath;

/// Result of [`vote`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteOutcome {
    /// Index of the first path carrying the winning conclusion
    pub selected_index: usize,
    /// Winner count divided by total paths
    pub consensus_score: f64,
    pub disagreements: Vec<String>,
}

/// Comparison key for conclusions: trimmed, lowercased.
pub fn normalize_conclusion(conclusion: &str) -> String {
    conclusion.trim().to_lowercase()
}

/// Pick the most frequent conclusion. Ties go to the lowest path index.
///
/// Returns `None` for an empty slice.
pub fn vote(paths: &[ConsistencyPath]) -> Option<VoteOutcome> {
    if paths.is_empty() {
        return None;
    }

    let keys: Vec<String> = paths
        .iter()
        .map(|p| normalize_conclusion(&p.conclusion))
        .collect();

    // (key, first index, count) in first-seen order
    let mut tally: Vec<(&str, usize, usize)> = Vec::new();
    for (index, key) in keys.iter().enumerate() {
        match tally.iter_mut().find(|(k, _, _)| *k == key.as_str()) {
            Some(entry) => entry.2 += 1,
            None => tally.push((key.as_str(), index, 1)),
        }
    }

    let mut winner = tally[0];
    for entry in &tally[1..] {
        if entry.2 > winner.2 {
            winner = *entry;
        }
    }
    let (winning_key, selected_index, count) = winner;

    let disagreements = if tally.len() > 1 {
        keys.iter()
            .enumerate()
            .filter(|(_, key)| key.as_str() != winning_key)
            .map(|(index, _)| {
                format!(
                    "Path {} concluded \"{}\" instead of \"{}\"",
                    index + 1,
                    paths[index].conclusion.trim(),
                    paths[selected_index].conclusion.trim()
                )
            })
            .collect()
    } else {
        Vec::new()
    };

    Some(VoteOutcome {
        selected_index,
        consensus_score: count as f64 / paths.len() as f64,
        disagreements,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(conclusion: &str) -> ConsistencyPath {
        ConsistencyPath {
            steps: Vec::new(),
            conclusion: conclusion.to_string(),
            confidence: 0.7,
        }
    }

    #[test]
    fn test_empty_has_no_winner() {
        assert!(vote(&[]).is_none());
    }

    #[test]
    fn test_unanimous() {
        let outcome = vote(&[path("Use Redis"), path("use redis "), path("USE REDIS")]).unwrap();
        assert_eq!(outcome.selected_index, 0);
        assert_eq!(outcome.consensus_score, 1.0);
        assert!(outcome.disagreements.is_empty());
    }

    #[test]
    fn test_two_of_three() {
        let outcome = vote(&[path("Use Redis"), path("Use Postgres"), path("use redis")]).unwrap();
        assert_eq!(outcome.selected_index, 0);
        assert!((outcome.consensus_score - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(outcome.disagreements.len(), 1);
        assert!(outcome.disagreements[0].contains("Path 2"));
    }

    #[test]
    fn test_later_majority_wins() {
        let outcome = vote(&[path("A"), path("B"), path("B")]).unwrap();
        assert_eq!(outcome.selected_index, 1);
        assert_eq!(outcome.disagreements.len(), 1);
    }

    #[test]
    fn test_tie_goes_to_first_path() {
        let outcome = vote(&[path("A"), path("B")]).unwrap();
        assert_eq!(outcome.selected_index, 0);
        assert_eq!(outcome.consensus_score, 0.5);
        assert_eq!(outcome.disagreements.len(), 1);
    }

    #[test]
    fn test_single_path() {
        let outcome = vote(&[path("only")]).unwrap();
        assert_eq!(outcome.selected_index, 0);
        assert_eq!(outcome.consensus_score, 1.0);
    }
}
