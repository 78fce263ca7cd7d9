//! Tool-marker grammar and execution (spec §4.7, §6, §9).
//!
//! The LLM emits inline directives of the form `[TOOL:name(k=v,...)]` or
//! `[CONFIRM_TOOL:name(k=v,...)]`. Per spec §9's open question, malformed
//! markers are rejected outright rather than best-effort-parsed: a
//! well-formed bracket that doesn't match the grammar is left untouched in
//! the sentence text and is not treated as a tool call.

use crate::pipeline::messages::{ParamValue, ToolCall};
use async_trait::async_trait;

/// Executes a named tool with a parsed parameter bag, returning a textual
/// result to be spoken back to the caller.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Execute `call` and return the result text.
    ///
    /// # Errors
    ///
    /// Returns an error if the tool is unknown or execution fails; per spec
    /// §4.8 the caller converts this into a spoken apology rather than
    /// retrying.
    async fn execute(&self, call: &ToolCall) -> crate::error::Result<String>;
}

/// Scan `sentence` for a single leading tool marker. Returns the sentence
/// text with the marker stripped and, if present, the parsed [`ToolCall`].
///
/// Only the first marker is honoured; a sentence is expected to carry at
/// most one marker (spec §4.4 step 5 operates per-sentence). Malformed
/// bracket content (unbalanced parens, a key without `=`, an unterminated
/// quote) is left in the text verbatim and treated as plain prose.
#[must_use]
pub fn extract_tool_marker(sentence: &str) -> (String, Option<ToolCall>) {
    for (prefix, requires_confirmation) in [("[TOOL:", false), ("[CONFIRM_TOOL:", true)] {
        if let Some(start) = sentence.find(prefix) {
            let after_prefix = start + prefix.len();
            if let Some(close) = sentence[after_prefix..].find(']') {
                let marker_end = after_prefix + close;
                let inner = &sentence[after_prefix..marker_end];
                if let Some(call) = parse_marker_body(inner, requires_confirmation) {
                    let mut stripped = String::with_capacity(sentence.len());
                    stripped.push_str(&sentence[..start]);
                    stripped.push_str(&sentence[marker_end + 1..]);
                    return (collapse_whitespace(&stripped), Some(call));
                }
            }
        }
    }
    (sentence.to_string(), None)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse `name(k=v,...)` into a [`ToolCall`]. Returns `None` if the body
/// does not match the strict grammar.
fn parse_marker_body(body: &str, requires_confirmation: bool) -> Option<ToolCall> {
    let open = body.find('(')?;
    if !body.ends_with(')') {
        return None;
    }
    let name = body[..open].trim();
    if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return None;
    }
    let args = &body[open + 1..body.len() - 1];

    let mut params = Vec::new();
    if !args.trim().is_empty() {
        for pair in split_top_level_commas(args) {
            let (key, value) = parse_param(&pair)?;
            params.push((key, value));
        }
    }

    Some(ToolCall {
        name: name.to_string(),
        params,
        requires_confirmation,
    })
}

fn split_top_level_commas(args: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for ch in args.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            ',' if !in_quotes => {
                parts.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }
    parts.push(current);
    parts
}

fn parse_param(pair: &str) -> Option<(String, ParamValue)> {
    let (key, value) = pair.split_once('=')?;
    let key = key.trim();
    let value = value.trim();
    if key.is_empty() || !key.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return None;
    }

    let parsed = if let Some(inner) = value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
        ParamValue::Str(inner.to_string())
    } else if let Ok(n) = value.parse::<f64>() {
        ParamValue::Number(n)
    } else if value.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-') && !value.is_empty() {
        ParamValue::Str(value.to_string())
    } else {
        return None;
    };

    Some((key.to_string(), parsed))
}

/// Case-insensitive, punctuation-trimmed Confirm/Deny lexical detection
/// (spec §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Affirmation {
    /// A confirming utterance.
    Confirm,
    /// A denying utterance.
    Deny,
    /// Neither — treat as a new utterance.
    Neither,
}

const CONFIRM_FORMS: &[&str] = &["yes", "yeah", "yep", "sure", "confirm", "go ahead", "ok", "okay"];
const DENY_FORMS: &[&str] = &["no", "nope", "cancel", "don't", "stop", "never mind"];

/// Classify `text` as a Confirm, Deny, or neither.
#[must_use]
pub fn classify_affirmation(text: &str) -> Affirmation {
    let normalized: String = text
        .to_lowercase()
        .trim()
        .trim_matches(|c: char| c.is_ascii_punctuation())
        .to_string();
    if CONFIRM_FORMS.contains(&normalized.as_str()) {
        Affirmation::Confirm
    } else if DENY_FORMS.contains(&normalized.as_str()) {
        Affirmation::Deny
    } else {
        Affirmation::Neither
    }
}

/// The built-in tools the core recognises directly (spec §4.7): anything
/// else is delegated to the injected [`ToolExecutor`].
pub mod builtin {
    /// Transitions the session to `Ending`.
    pub const END_CALL: &str = "end_call";
    /// Delegates to the external carrier integration.
    pub const TRANSFER_CALL: &str = "transfer_call";
    /// Generic outbound HTTP POST via the Webhooks collaborator.
    pub const CALL_WEBHOOK: &str = "call_webhook";
}

/// A [`ToolExecutor`] with no tools of its own: every call beyond the
/// built-ins fails. Suitable as a default until an application wires in a
/// real tool integration (spec §9: tool execution backends are out of
/// scope for the core).
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopToolExecutor;

#[async_trait]
impl ToolExecutor for NoopToolExecutor {
    async fn execute(&self, call: &ToolCall) -> crate::error::Result<String> {
        Err(crate::error::CoreError::Tool(format!("no executor registered for tool {}", call.name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_immediate_tool_marker() {
        let (text, call) = extract_tool_marker("I'll check that. [TOOL:lookup(id=42)] One moment.");
        assert_eq!(text, "I'll check that. One moment.");
        let call = call.expect("tool call");
        assert_eq!(call.name, "lookup");
        assert!(!call.requires_confirmation);
        assert_eq!(call.params, vec![("id".to_string(), ParamValue::Number(42.0))]);
    }

    #[test]
    fn extracts_confirmed_tool_marker_with_quoted_string_param() {
        let (text, call) = extract_tool_marker(
            "I'll transfer you to sales. [CONFIRM_TOOL:transfer_call(department=\"sales\")]",
        );
        assert_eq!(text, "I'll transfer you to sales.");
        let call = call.expect("tool call");
        assert_eq!(call.name, "transfer_call");
        assert!(call.requires_confirmation);
        assert_eq!(
            call.params,
            vec![("department".to_string(), ParamValue::Str("sales".to_string()))]
        );
    }

    #[test]
    fn bare_word_param_values_are_strings() {
        let (_, call) = extract_tool_marker("[TOOL:end_call(reason=done)]");
        let call = call.expect("tool call");
        assert_eq!(call.params, vec![("reason".to_string(), ParamValue::Str("done".to_string()))]);
    }

    #[test]
    fn malformed_marker_is_left_as_plain_text() {
        let (text, call) = extract_tool_marker("Here is [TOOL:broken(] the end.");
        assert!(call.is_none());
        assert_eq!(text, "Here is [TOOL:broken(] the end.");
    }

    #[test]
    fn sentence_without_marker_is_unchanged() {
        let (text, call) = extract_tool_marker("Just a plain sentence.");
        assert_eq!(text, "Just a plain sentence.");
        assert!(call.is_none());
    }

    #[test]
    fn confirm_and_deny_forms_are_case_and_punctuation_insensitive() {
        assert_eq!(classify_affirmation("Yes!"), Affirmation::Confirm);
        assert_eq!(classify_affirmation("  NOPE."), Affirmation::Deny);
        assert_eq!(classify_affirmation("Go ahead"), Affirmation::Confirm);
        assert_eq!(classify_affirmation("maybe later"), Affirmation::Neither);
    }
}
