use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;

/// Either a structured value parsed out of a model response, or the response itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Extracted<T> {
    Parsed(T),
    Raw { raw: String },
}

impl<T> Extracted<T> {
    pub fn raw(text: impl Into<String>) -> Self {
        Extracted::Raw { raw: text.into() }
    }

    pub fn is_parsed(&self) -> bool {
        matches!(self, Extracted::Parsed(_))
    }

    pub fn parsed(&self) -> Option<&T> {
        match self {
            Extracted::Parsed(t) => Some(t),
            Extracted::Raw { .. } => None,
        }
    }
}

/// Remove every triple-backtick fence marker, plus a language tag and line break directly after
/// it. Text between fences is kept.
pub fn strip_code_fences(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find("```") {
        out.push_str(&rest[..pos]);
        rest = &rest[pos + 3..];
        let tag_len = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '+' | '.')))
            .unwrap_or(rest.len());
        let after_tag = &rest[tag_len..];
        // A tag only counts when the fence line ends right after it.
        if after_tag.starts_with('\n') || after_tag.starts_with("\r\n") || after_tag.is_empty() {
            rest = after_tag
                .strip_prefix("\r\n")
                .or_else(|| after_tag.strip_prefix('\n'))
                .unwrap_or(after_tag);
        }
    }
    out.push_str(rest);
    out
}

/// The span from the first `{` to the last `}`, inclusive.
pub fn widest_brace_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Pull the first JSON object out of a free-form response.
pub fn extract_json_object(text: &str) -> Option<Value> {
    let stripped = strip_code_fences(text);
    let span = widest_brace_span(&stripped)?;
    trace!("Candidate JSON span: {span}");
    match serde_json::from_str::<Value>(span) {
        Ok(value @ Value::Object(_)) => Some(value),
        Ok(_) => None,
        Err(e) => {
            trace!("Candidate span is not valid JSON: {e}");
            None
        }
    }
}
