// RLM-Agent: Code block extraction
// Pulls executable fenced blocks out of free-form model text.

use regex::Regex;

/// Finds ```<tag> ... ``` blocks in model responses
#[derive(Debug, Clone)]
pub struct CodeBlockExtractor {
    fence_tag: String,
    pattern: Regex,
}

impl CodeBlockExtractor {
    /// Build an extractor for one fence tag (for example `repl`)
    pub fn new(fence_tag: &str) -> Result<Self, regex::Error> {
        // The tag must be followed by whitespace so `replay` is not taken for `repl`.
        let pattern = Regex::new(&format!(r"(?s)```{}\s+(.*?)```", regex::escape(fence_tag)))?;
        Ok(Self {
            fence_tag: fence_tag.to_string(),
            pattern,
        })
    }

    pub fn fence_tag(&self) -> &str {
        &self.fence_tag
    }

    /// Trimmed bodies of every block, in document order. Empty bodies are skipped.
    pub fn extract(&self, text: &str) -> Vec<String> {
        self.pattern
            .captures_iter(text)
            .filter_map(|caps| {
                let body = caps.get(1)?.as_str().trim();
                (!body.is_empty()).then(|| body.to_string())
            })
            .collect()
    }
}
