use regex::Regex;

/// Canonical form of a free-text mention, used as the grounding cache key.
pub struct MentionNormalizer {
    whitespace: Regex,
}

impl MentionNormalizer {
    pub fn new() -> Self {
        Self {
            whitespace: Regex::new(r"\s+").expect("valid whitespace pattern"),
        }
    }

    /// Lower-case and collapse runs of whitespace into single spaces.
    pub fn normalize(&self, text: &str) -> String {
        let lowered = text.trim().to_lowercase();
        self.whitespace.replace_all(&lowered, " ").into_owned()
    }

    /// Word overlap between two normalized strings, in `[0, 1]`.
    pub fn overlap(&self, a: &str, b: &str) -> f64 {
        if a == b {
            return 1.0;
        }

        let words_a: Vec<&str> = a.split_whitespace().collect();
        let words_b: Vec<&str> = b.split_whitespace().collect();
        if words_a.is_empty() || words_b.is_empty() {
            return 0.0;
        }

        let common = words_a.iter().filter(|w| words_b.contains(w)).count();
        let total = words_a.len().max(words_b.len());
        common as f64 / total as f64
    }
}

impl Default for MentionNormalizer {
    fn default() -> Self {
        Self::new()
    }
}
