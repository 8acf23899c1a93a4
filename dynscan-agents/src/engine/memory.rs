//! Insight memory carried between exploration prompts.

/// Append-only, deduplicated list of insights for one run.
#[derive(Debug, Clone, Default)]
pub struct Memory {
    enabled: bool,
    insights: Vec<String>,
}

impl Memory {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            insights: Vec::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Append an insight. Blank and already-known insights are ignored.
    ///
    /// Returns whether the insight was added.
    pub fn remember(&mut self, insight: &str) -> bool {
        if !self.enabled {
            return false;
        }
        let insight = insight.trim();
        if insight.is_empty() || self.insights.iter().any(|known| known.eq_ignore_ascii_case(insight)) {
            return false;
        }
        self.insights.push(insight.to_string());
        true
    }

    pub fn insights(&self) -> &[String] {
        &self.insights
    }

    pub fn len(&self) -> usize {
        self.insights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insights.is_empty()
    }

    /// Prompt rendering, one insight per line.
    pub fn render(&self) -> String {
        self.insights
            .iter()
            .map(|i| format!("- {}", i))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deduplicates() {
        let mut memory = Memory::new(true);
        assert!(memory.remember("Login form asks for card number"));
        assert!(!memory.remember("  login form asks for card number "));
        assert!(!memory.remember(""));
        assert!(memory.remember("Settings menu is hidden"));

        assert_eq!(memory.len(), 2);
        assert_eq!(
            memory.render(),
            "- Login form asks for card number\n- Settings menu is hidden"
        );
    }

    #[test]
    fn test_disabled_memory_stays_empty() {
        let mut memory = Memory::new(false);
        assert!(!memory.remember("anything"));
        assert!(memory.is_empty());
        assert_eq!(memory.render(), "");
    }
}
