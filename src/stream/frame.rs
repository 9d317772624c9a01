//! Per-frame decoding for the upstream SSE dialect.
//!
//! A frame is the text between two `\n\n` separators. Only `data: ` frames
//! carry anything; the payload is either the `[DONE]` sentinel or a JSON
//! chunk that intermediaries may have re-serialized as a JSON string
//! (double-wrapping) or mangled with stray escapes.

use serde_json::Value;
use tracing::{debug, warn};

pub const DATA_PREFIX: &str = "data: ";
pub const DONE_SENTINEL: &str = "[DONE]";

/// What a single complete frame decodes to.
#[derive(Debug, Clone, PartialEq)]
pub enum FramePayload {
    /// Not a `data: ` frame.
    Ignored,
    /// The `[DONE]` sentinel.
    Done,
    /// A parsed chunk with its first-choice text delta ("" when absent).
    Delta(String),
    /// All JSON recovery strategies failed.
    Malformed,
}

/// Decode one complete frame.
pub fn decode_frame(frame: &str) -> FramePayload {
    let data = match frame.strip_prefix(DATA_PREFIX) {
        Some(d) => d,
        None => {
            if !frame.trim().is_empty() {
                debug!(frame = %truncate(frame, 120), "skipping non-data frame");
            }
            return FramePayload::Ignored;
        }
    };

    let data = unwrap_double_wrapped(data);

    if data == DONE_SENTINEL {
        return FramePayload::Done;
    }

    match parse_with_recovery(data) {
        Some((json, strategy)) => {
            if strategy != RecoveryStrategy::Direct {
                debug!(?strategy, "frame recovered after escape repair");
            }
            FramePayload::Delta(extract_delta(&json).to_string())
        }
        None => {
            warn!(data = %truncate(data, 300), "dropping frame: payload is not parseable JSON");
            FramePayload::Malformed
        }
    }
}

/// Undo one level of `data: "data: {...}\n\n"` wrapping.
///
/// The inner frame arrives as a JSON string literal, so its separator shows
/// up as the escaped text `\n\n` rather than real newlines.
pub fn unwrap_double_wrapped(data: &str) -> &str {
    if data.len() < 2 || !data.starts_with("\"data: ") || !data.ends_with('"') {
        return data;
    }

    let inner = &data[1..data.len() - 1];
    let inner = inner.strip_prefix(DATA_PREFIX).unwrap_or(inner);
    inner.strip_suffix(r"\n\n").unwrap_or(inner)
}

// ── JSON Recovery ───────────────────────────────────────────────

/// Ordered JSON recovery strategies; the first one that parses wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStrategy {
    /// Parse the payload as-is.
    Direct,
    /// Collapse doubled `\\n`, unescape `\"` and `\\`, then parse.
    Normalized,
    /// Strip every escape character by character, then parse and repair
    /// `content` values.
    Swept,
}

impl RecoveryStrategy {
    pub const ORDER: [RecoveryStrategy; 3] = [
        RecoveryStrategy::Direct,
        RecoveryStrategy::Normalized,
        RecoveryStrategy::Swept,
    ];

    /// Try this strategy alone.
    pub fn attempt(self, data: &str) -> Option<Value> {
        match self {
            RecoveryStrategy::Direct => serde_json::from_str(data).ok(),
            RecoveryStrategy::Normalized => serde_json::from_str(&normalize_escapes(data)).ok(),
            RecoveryStrategy::Swept => {
                let mut value: Value = serde_json::from_str(&sweep_escapes(data)).ok()?;
                revive_content_fields(&mut value);
                Some(value)
            }
        }
    }
}

/// Run the recovery strategies in order and return the first parse.
pub fn parse_with_recovery(data: &str) -> Option<(Value, RecoveryStrategy)> {
    RecoveryStrategy::ORDER
        .iter()
        .find_map(|strategy| strategy.attempt(data).map(|v| (v, *strategy)))
}

/// Repair the usual escape artifacts of a re-serialized payload.
pub fn normalize_escapes(data: &str) -> String {
    data.replace(r"\\n", r"\n")
        .replace(r#"\""#, "\"")
        .replace(r"\\", r"\")
}

/// Last-resort de-escaping: `\"`, `\n`, `\t`, `\r` become their literal
/// characters and any other `\x` becomes `x`.
pub fn sweep_escapes(data: &str) -> String {
    let mut out = String::with_capacity(data.len());
    let mut chars = data.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            // trailing lone backslash
            None => out.push('\\'),
        }
    }

    out
}

/// Inside `content` string values, turn literal `\n` into newlines and
/// doubled backslashes into one.
fn revive_content_fields(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, v) in map.iter_mut() {
                match v {
                    Value::String(s) if key == "content" => {
                        *s = s.replace(r"\n", "\n").replace(r"\\", r"\");
                    }
                    other => revive_content_fields(other),
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(revive_content_fields),
        _ => {}
    }
}

/// `choices[0].delta.content`, or "" when any part of the path is missing.
pub fn extract_delta(json: &Value) -> &str {
    json.pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
        .unwrap_or("")
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
