//! Skip detection for handoff writes.
//!
//! A link that has nothing to do sometimes replaces the whole shared handoff
//! with a one-line "skipped" note. [`SkipHeuristic`] recognizes that pattern so
//! the previous handoff can be restored.

/// Thresholds for classifying a handoff write as a skip.
///
/// All three conditions must hold:
/// - the trimmed new text is shorter than `max_len` characters,
/// - the new text contains `marker` (case-insensitive),
/// - the new text is shorter than `min_ratio` times the previous text.
#[derive(Debug, Clone, PartialEq)]
pub struct SkipHeuristic {
    pub max_len: usize,
    pub marker: String,
    pub min_ratio: f64,
}

impl Default for SkipHeuristic {
    fn default() -> Self {
        Self {
            max_len: 500,
            marker: "SKIP".to_string(),
            min_ratio: 0.5,
        }
    }
}

impl SkipHeuristic {
    /// True if `after` looks like a skip note that replaced `before`.
    ///
    /// Lengths are counted in characters.
    pub fn is_skip(&self, after: &str, before: &str) -> bool {
        let short = after.trim().chars().count() < self.max_len;
        let marked = after
            .to_uppercase()
            .contains(&self.marker.to_uppercase());
        let shrunk = (after.chars().count() as f64) < before.chars().count() as f64 * self.min_ratio;
        short && marked && shrunk
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(len: usize) -> String {
        let line = "Parser refactor landed, 55 tests green, migration applied.\n";
        line.repeat(len / line.len() + 1)[..len].to_string()
    }

    #[test]
    fn short_marked_shrunk_text_is_skip() {
        let before = report(300);
        assert!(SkipHeuristic::default().is_skip("SKIPPED - not assigned.", &before));
    }

    #[test]
    fn marker_is_case_insensitive() {
        let before = report(300);
        assert!(SkipHeuristic::default().is_skip("nothing to do, skipping", &before));
    }

    #[test]
    fn text_without_marker_is_not_skip() {
        let before = report(300);
        assert!(!SkipHeuristic::default().is_skip("Done.", &before));
    }

    #[test]
    fn long_text_is_not_skip_even_with_marker() {
        let before = report(5_000);
        let after = format!("SKIP\n{}", report(600));
        assert!(!SkipHeuristic::default().is_skip(&after, &before));
    }

    /// The ratio test is strict: exactly half the previous length keeps the text.
    #[test]
    fn text_at_half_of_previous_is_not_skip() {
        let before = "x".repeat(20);
        let after = "SKIP it...";
        assert_eq!(after.chars().count(), 10);
        assert!(!SkipHeuristic::default().is_skip(after, &before));
    }

    /// Nothing is shorter than half of an empty previous handoff.
    #[test]
    fn empty_before_never_matches_ratio() {
        assert!(!SkipHeuristic::default().is_skip("SKIPPED", ""));
    }

    #[test]
    fn thresholds_are_tunable() {
        let heuristic = SkipHeuristic {
            max_len: 10,
            marker: "PASS".to_string(),
            min_ratio: 0.9,
        };
        assert!(heuristic.is_skip("pass", "0123456789"));
        assert!(!heuristic.is_skip("SKIP", "0123456789"));
    }
}
