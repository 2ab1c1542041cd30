// RLM-Agent: Termination detection
// Final-answer markers in model text and execution output:
//   FINAL_VAR(name)  - answer is the sandbox variable `name`
//   FINAL(text)      - answer is `text`
//   Final Answer: .. - answer is everything after the last sentinel

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static FINAL_VAR_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bFINAL_VAR\(").expect("FINAL_VAR pattern is valid"));
static FINAL_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bFINAL\(").expect("FINAL pattern is valid"));

const SENTINEL: &str = "Final Answer:";

/// One final-answer convention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarkerRule {
    /// `FINAL_VAR(identifier)`
    ByVariable,
    /// `FINAL(literal)`
    ByValue,
    /// `Final Answer: ...`
    BySentinel,
}

/// A detected final answer, before variable resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalAnswer {
    Literal(String),
    Variable(String),
}

/// Read access to the sandbox namespace for `FINAL_VAR` resolution
pub trait VariableSource {
    fn lookup(&self, name: &str) -> Option<String>;
}

impl VariableSource for std::collections::HashMap<String, String> {
    fn lookup(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

/// Scans text for the enabled markers in fixed priority order
#[derive(Debug, Clone)]
pub struct TerminationDetector {
    rules: Vec<MarkerRule>,
}

impl TerminationDetector {
    pub fn new(enabled: &[MarkerRule]) -> Self {
        let rules = [MarkerRule::ByVariable, MarkerRule::ByValue, MarkerRule::BySentinel]
            .into_iter()
            .filter(|rule| enabled.contains(rule))
            .collect();
        Self { rules }
    }

    pub fn rules(&self) -> &[MarkerRule] {
        &self.rules
    }

    /// Find the first marker of the highest-priority rule that matches
    pub fn find(&self, text: &str) -> Option<FinalAnswer> {
        self.rules.iter().find_map(|rule| match rule {
            MarkerRule::ByVariable => parenthesized(&FINAL_VAR_MARKER, text).map(|raw| {
                let name = raw.trim().trim_matches(|c| c == '"' || c == '\'').trim();
                FinalAnswer::Variable(name.to_string())
            }),
            MarkerRule::ByValue => {
                parenthesized(&FINAL_MARKER, text).map(|raw| FinalAnswer::Literal(raw.trim().to_string()))
            }
            MarkerRule::BySentinel => text
                .rfind(SENTINEL)
                .map(|at| FinalAnswer::Literal(text[at + SENTINEL.len()..].trim().to_string())),
        })
    }

    /// Detect and resolve a final answer. A missing variable resolves to a diagnostic.
    pub fn detect(&self, text: &str, variables: &dyn VariableSource) -> Option<String> {
        match self.find(text)? {
            FinalAnswer::Literal(answer) => Some(answer),
            FinalAnswer::Variable(name) => Some(
                variables
                    .lookup(&name)
                    .unwrap_or_else(|| format!("Error: variable '{}' not found in the sandbox", name)),
            ),
        }
    }

    /// How to finish, worded for the system preamble. Only enabled forms are listed.
    pub fn instructions(&self) -> String {
        let lines: Vec<&str> = self
            .rules
            .iter()
            .map(|rule| match rule {
                MarkerRule::ByVariable => {
                    "- FINAL_VAR(name): answer with the value of sandbox variable `name`. \
                     Markers are read before the code in the same reply runs, so send \
                     FINAL_VAR in a later reply than the code that sets `name`"
                }
                MarkerRule::ByValue => "- FINAL(your answer): answer with the text inside the parentheses",
                MarkerRule::BySentinel => "- Final Answer: your answer (on the last line of your reply)",
            })
            .collect();
        format!("When you are done, reply with one of:\n{}", lines.join("\n"))
    }
}

/// Body of the first complete `MARKER(...)` occurrence, with balanced parentheses
fn parenthesized(marker: &Regex, text: &str) -> Option<String> {
    marker.find_iter(text).find_map(|m| {
        let body = &text[m.end()..];
        let mut depth = 1usize;
        for (i, c) in body.char_indices() {
            match c {
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(body[..i].to_string());
                    }
                }
                _ => {}
            }
        }
        None
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn default_detector() -> TerminationDetector {
        TerminationDetector::new(&[MarkerRule::ByVariable, MarkerRule::ByValue])
    }

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_final_literal() {
        let found = default_detector().detect("The answer is FINAL( 25 ).", &vars(&[]));
        assert_eq!(found.as_deref(), Some("25"));
    }

    #[test]
    fn test_final_balanced_parentheses() {
        let found = default_detector().detect("FINAL(f(x) = (a + b))", &vars(&[]));
        assert_eq!(found.as_deref(), Some("f(x) = (a + b)"));
    }

    #[test]
    fn test_final_var_resolves_and_strips_quotes() {
        let env = vars(&[("result", "Paris")]);
        assert_eq!(default_detector().detect("FINAL_VAR(result)", &env).as_deref(), Some("Paris"));
        assert_eq!(default_detector().detect("FINAL_VAR(\"result\")", &env).as_deref(), Some("Paris"));
    }

    #[test]
    fn test_final_var_missing_variable_is_diagnostic() {
        let found = default_detector().detect("FINAL_VAR(nope)", &vars(&[])).unwrap();
        assert!(found.contains("nope"));
        assert!(found.contains("not found"));
    }

    #[test]
    fn test_variable_rule_outranks_value_rule() {
        let env = vars(&[("x", "from var")]);
        let found = default_detector().detect("FINAL(literal) then FINAL_VAR(x)", &env);
        assert_eq!(found.as_deref(), Some("from var"));
    }

    #[test]
    fn test_marker_needs_word_boundary() {
        assert_eq!(default_detector().find("MY_FINAL(x) and XFINAL(y)"), None);
    }

    #[test]
    fn test_unterminated_marker_is_no_marker() {
        assert_eq!(default_detector().find("FINAL(never closed"), None);
    }

    #[test]
    fn test_sentinel_uses_last_occurrence() {
        let detector = TerminationDetector::new(&[MarkerRule::BySentinel]);
        let text = "Final Answer: draft\nthinking more\nFinal Answer:  Paris \n";
        assert_eq!(detector.detect(text, &vars(&[])).as_deref(), Some("Paris"));
        assert_eq!(detector.find("FINAL(x)"), None);
    }

    #[test]
    fn test_bare_sentinel_is_an_empty_answer() {
        let detector = TerminationDetector::new(&[MarkerRule::BySentinel]);
        assert_eq!(detector.find("done.\nFinal Answer:"), Some(FinalAnswer::Literal(String::new())));
        assert_eq!(default_detector().find("FINAL()"), Some(FinalAnswer::Literal(String::new())));
    }

    #[test]
    fn test_disabled_rules_do_not_fire() {
        let detector = TerminationDetector::new(&[MarkerRule::ByValue]);
        assert_eq!(detector.find("FINAL_VAR(x)"), None);
        assert_eq!(detector.rules(), &[MarkerRule::ByValue]);
    }

    #[test]
    fn test_instructions_list_only_enabled_forms() {
        let text = default_detector().instructions();
        assert!(text.contains("FINAL_VAR(name)"));
        assert!(text.contains("FINAL(your answer)"));
        assert!(!text.contains("Final Answer:"));
    }

    #[test]
    fn test_instructions_ask_for_final_var_in_a_later_reply() {
        let text = default_detector().instructions();
        assert!(text.contains("later reply than the code that sets `name`"));
    }
}
