// RLM-Agent: Scripted completion backend
// Deterministic replies keyed on the last message of the conversation.
// Used by the test suite and by the offline `demo` command.

use std::sync::Mutex;

use super::{CompletionBackend, Message};

#[derive(Debug, Clone)]
enum Trigger {
    Contains(String),
    Equals(String),
}

impl Trigger {
    fn matches(&self, text: &str) -> bool {
        match self {
            Trigger::Contains(needle) => text.contains(needle.as_str()),
            Trigger::Equals(expected) => text.trim() == expected.as_str(),
        }
    }
}

#[derive(Debug, Clone)]
struct Rule {
    trigger: Trigger,
    reply: Result<String, String>,
}

/// A backend that answers from a fixed rule list.
///
/// Rules are tried in insertion order against the content of the last message;
/// the first match wins. Every conversation it is asked to complete is recorded.
#[derive(Debug)]
pub struct ScriptedBackend {
    rules: Vec<Rule>,
    default_reply: String,
    calls: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedBackend {
    pub fn new(default_reply: &str) -> Self {
        Self {
            rules: Vec::new(),
            default_reply: default_reply.to_string(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Reply with `reply` when the last message contains `needle`
    pub fn when_contains(mut self, needle: &str, reply: &str) -> Self {
        self.rules.push(Rule {
            trigger: Trigger::Contains(needle.to_string()),
            reply: Ok(reply.to_string()),
        });
        self
    }

    /// Reply with `reply` when the last message is exactly `prompt` (ignoring surrounding whitespace)
    pub fn when_equals(mut self, prompt: &str, reply: &str) -> Self {
        self.rules.push(Rule {
            trigger: Trigger::Equals(prompt.to_string()),
            reply: Ok(reply.to_string()),
        });
        self
    }

    /// Fail with `error` when the last message contains `needle`
    pub fn fail_when_contains(mut self, needle: &str, error: &str) -> Self {
        self.rules.push(Rule {
            trigger: Trigger::Contains(needle.to_string()),
            reply: Err(error.to_string()),
        });
        self
    }

    /// All conversations seen so far, in call order
    pub fn calls(&self) -> Vec<Vec<Message>> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }
}

impl CompletionBackend for ScriptedBackend {
    fn complete(&self, messages: &[Message]) -> Result<String, anyhow::Error> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(messages.to_vec());
        }

        let last = messages.last().map(|m| m.content.as_str()).unwrap_or("");
        match self.rules.iter().find(|rule| rule.trigger.matches(last)) {
            Some(Rule { reply: Ok(reply), .. }) => Ok(reply.clone()),
            Some(Rule { reply: Err(error), .. }) => Err(anyhow::anyhow!("{}", error)),
            None => Ok(self.default_reply.clone()),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// The backend behind `rlm-agent demo`: one recursive sub-query, then an answer.
pub fn demo_backend() -> ScriptedBackend {
    ScriptedBackend::new("I am a scripted model. Ask me to 'Compute complex value'.")
        .when_equals("What is the magic number?", "FINAL(42)")
        .when_contains("Received: 42", "The sub-agent answered. FINAL(42)")
        .when_contains(
            "Compute complex value",
            "I need a sub-value first.\n\
             ```repl\n\
             print(\"Querying sub-agent...\");\n\
             let val = query(\"What is the magic number?\");\n\
             print(`Received: ${val}`);\n\
             ```",
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_matching_rule_wins() {
        let backend = ScriptedBackend::new("default")
            .when_contains("apple", "fruit")
            .when_contains("apple pie", "dessert");

        let reply = backend.complete(&[Message::user("apple pie please")]).unwrap();
        assert_eq!(reply, "fruit");
    }

    #[test]
    fn test_equals_ignores_surrounding_whitespace() {
        let backend = ScriptedBackend::new("default").when_equals("exact", "hit");
        assert_eq!(backend.complete(&[Message::user("  exact\n")]).unwrap(), "hit");
        assert_eq!(backend.complete(&[Message::user("not exact")]).unwrap(), "default");
    }

    #[test]
    fn test_failure_rule_returns_error() {
        let backend = ScriptedBackend::new("default").fail_when_contains("boom", "backend down");
        let err = backend.complete(&[Message::user("boom")]).unwrap_err();
        assert_eq!(err.to_string(), "backend down");
    }

    #[test]
    fn test_calls_are_recorded() {
        let backend = ScriptedBackend::new("default");
        backend.complete(&[Message::system("s"), Message::user("a")]).unwrap();
        backend.complete(&[Message::user("b")]).unwrap();

        let calls = backend.calls();
        assert_eq!(backend.call_count(), 2);
        assert_eq!(calls[0].len(), 2);
        assert_eq!(calls[1][0].content, "b");
    }
}
