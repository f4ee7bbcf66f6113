//! Reference expressions inside step inputs.
//!
//! Supported forms:
//! - `${step_id}`: the whole output of an earlier step
//! - `${step_id.field.0.name}`: a nested field; numeric segments index arrays
//! - `${input}` / `${input.field}`: the caller-supplied initial input
//!
//! A string that consists of exactly one token is replaced by the referenced
//! JSON value, keeping its type. Tokens embedded in longer strings are
//! interpolated as text. Malformed tokens (`${}`, `${a..b}`, an unterminated
//! `${`) are always an error, never passed through.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::error::StepError;

/// Step id under which the initial run input is addressable.
pub const INPUT_REF: &str = "input";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// The token as written, e.g. `${research.key_findings}`.
    pub raw: String,
    pub step: String,
    pub path: Vec<String>,
}

impl Reference {
    pub fn is_input(&self) -> bool {
        self.step == INPUT_REF
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    Ref(Reference),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed reference '{token}': {reason}")]
pub struct MalformedToken {
    pub token: String,
    pub reason: String,
}

fn malformed(token: &str, reason: &str) -> MalformedToken {
    MalformedToken {
        token: token.to_string(),
        reason: reason.to_string(),
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

fn parse_reference(raw: &str, inner: &str) -> Result<Reference, MalformedToken> {
    let inner = inner.trim();
    if inner.is_empty() {
        return Err(malformed(raw, "empty reference"));
    }
    let mut parts = Vec::new();
    for part in inner.split('.') {
        if part.is_empty() {
            return Err(malformed(raw, "empty path segment"));
        }
        if !part.chars().all(is_ident_char) {
            return Err(malformed(raw, "only letters, digits, '_' and '-' are allowed"));
        }
        parts.push(part.to_string());
    }
    let step = parts.remove(0);
    Ok(Reference {
        raw: raw.to_string(),
        step,
        path: parts,
    })
}

static TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]*)\}").expect("reference token pattern is valid"));

/// Split a string into literal text and reference tokens.
pub fn parse(template: &str) -> Result<Vec<Segment>, MalformedToken> {
    let mut segments = Vec::new();
    let mut last = 0;

    for caps in TOKEN.captures_iter(template) {
        let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        push_text(&mut segments, &template[last..whole.start()])?;
        segments.push(Segment::Ref(parse_reference(whole.as_str(), inner.as_str())?));
        last = whole.end();
    }
    push_text(&mut segments, &template[last..])?;
    Ok(segments)
}

/// Literal text between tokens; a `${` left here never found its `}`.
fn push_text(segments: &mut Vec<Segment>, text: &str) -> Result<(), MalformedToken> {
    if let Some(start) = text.find("${") {
        return Err(malformed(&text[start..], "missing closing '}'"));
    }
    if !text.is_empty() {
        segments.push(Segment::Text(text.to_string()));
    }
    Ok(())
}

/// Every reference found in a value, walking arrays and objects.
pub fn references(value: &Value) -> Result<Vec<Reference>, MalformedToken> {
    let mut out = Vec::new();
    collect(value, &mut out)?;
    Ok(out)
}

fn collect(value: &Value, out: &mut Vec<Reference>) -> Result<(), MalformedToken> {
    match value {
        Value::String(s) => {
            for segment in parse(s)? {
                if let Segment::Ref(r) = segment {
                    out.push(r);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect(item, out)?;
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                collect(item, out)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Walk `path` into `value`. Object keys match by name, array elements by index.
pub fn select<'a>(value: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(value, |current, key| match current {
        Value::Object(map) => map.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Substitute every token in `value` using `lookup`.
pub fn resolve<F>(value: &Value, lookup: &F) -> Result<Value, StepError>
where
    F: Fn(&Reference) -> Result<Value, StepError>,
{
    match value {
        Value::String(s) => resolve_str(s, lookup),
        Value::Array(items) => items
            .iter()
            .map(|item| resolve(item, lookup))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut resolved = serde_json::Map::with_capacity(map.len());
            for (key, item) in map {
                resolved.insert(key.clone(), resolve(item, lookup)?);
            }
            Ok(Value::Object(resolved))
        }
        other => Ok(other.clone()),
    }
}

fn resolve_str<F>(s: &str, lookup: &F) -> Result<Value, StepError>
where
    F: Fn(&Reference) -> Result<Value, StepError>,
{
    let mut segments =
        parse(s).map_err(|e| StepError::unresolved(e.token.clone(), e.reason.clone()))?;

    if segments.len() == 1 {
        if let Segment::Ref(r) = &segments[0] {
            return lookup(r);
        }
    }
    if !segments.iter().any(|seg| matches!(seg, Segment::Ref(_))) {
        return Ok(Value::String(s.to_string()));
    }

    let mut text = String::with_capacity(s.len());
    for segment in segments.drain(..) {
        match segment {
            Segment::Text(t) => text.push_str(&t),
            Segment::Ref(r) => match lookup(&r)? {
                Value::String(v) => text.push_str(&v),
                Value::Null => {}
                v => text.push_str(&v.to_string()),
            },
        }
    }
    Ok(Value::String(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn lookup(r: &Reference) -> Result<Value, StepError> {
        let outputs = json!({
            "A": {"result": 42, "items": [{"name": "first"}]},
            "input": {"topic": "rust"},
        });
        outputs
            .get(&r.step)
            .and_then(|v| select(v, &r.path))
            .cloned()
            .ok_or_else(|| StepError::unresolved(r.raw.clone(), "missing"))
    }

    #[test]
    fn test_parse_mixed_text() {
        let segs = parse("about ${input.topic}!").unwrap();
        assert_eq!(segs.len(), 3);
        match &segs[1] {
            Segment::Ref(r) => {
                assert!(r.is_input());
                assert_eq!(r.path, vec!["topic".to_string()]);
                assert_eq!(r.raw, "${input.topic}");
            }
            other => panic!("expected reference, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_tokens_are_errors() {
        assert!(parse("${}").is_err());
        assert!(parse("${a..b}").is_err());
        assert!(parse("${a b}").is_err());
        assert!(parse("prefix ${A.result").is_err());
        assert!(parse("no tokens, just $ and {braces}").is_ok());
    }

    #[test]
    fn test_unterminated_token_after_valid_one() {
        let err = parse("${A.result} and ${input").unwrap_err();
        assert_eq!(err.token, "${input");
        assert_eq!(err.reason, "missing closing '}'");

        let segs = parse("${A}${B.c}").unwrap();
        assert_eq!(segs.len(), 2);
        assert!(segs.iter().all(|s| matches!(s, Segment::Ref(_))));
    }

    #[test]
    fn test_whole_token_keeps_type() {
        let v = resolve(&json!("${A.result}"), &lookup).unwrap();
        assert_eq!(v, json!(42));
    }

    #[test]
    fn test_embedded_token_interpolates() {
        let v = resolve(&json!("topic=${input.topic}, n=${A.result}"), &lookup).unwrap();
        assert_eq!(v, json!("topic=rust, n=42"));
    }

    #[test]
    fn test_resolves_nested_structures_and_indexes() {
        let inputs = json!({"list": ["${A.items.0.name}", 1], "nested": {"t": "${input.topic}"}});
        let v = resolve(&inputs, &lookup).unwrap();
        assert_eq!(v, json!({"list": ["first", 1], "nested": {"t": "rust"}}));
    }

    #[test]
    fn test_missing_reference_is_unresolved() {
        let err = resolve(&json!("${C}"), &lookup).unwrap_err();
        assert_eq!(err.kind(), crate::error::StepErrorKind::UnresolvedReference);
    }

    #[test]
    fn test_references_walks_values() {
        let refs = references(&json!({"a": "${x}", "b": ["${y.z}", 3]})).unwrap();
        let steps: Vec<_> = refs.iter().map(|r| r.step.as_str()).collect();
        assert!(steps.contains(&"x"));
        assert!(steps.contains(&"y"));
    }
}
