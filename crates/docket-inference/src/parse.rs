//! Parsing of model output and splitting of model input.
//!
//! Models wrap JSON in markdown fences, return objects where arrays were
//! asked for, and omit optional fields. Everything here is tolerant of that,
//! but anything without a recoverable event list is `InvalidResponse`.

use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;

use docket_core::{Error, Result, TimelineEvent};

fn fence_regex() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    // Constant pattern, checked by the tests below.
    FENCE.get_or_init(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)\s*```").unwrap())
}

/// Remove a surrounding markdown code fence, if any.
pub fn strip_code_fences(raw: &str) -> &str {
    match fence_regex().captures(raw).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str(),
        None => raw.trim(),
    }
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(default)]
    date: Option<String>,
    #[serde(default, alias = "event", alias = "summary")]
    description: Option<String>,
    #[serde(default, alias = "sourceType")]
    source_type: Option<String>,
    #[serde(default, alias = "sourceId")]
    source_id: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawTimeline {
    Wrapped {
        #[serde(alias = "timeline")]
        events: Vec<RawEvent>,
    },
    Bare(Vec<RawEvent>),
}

/// Parse a timeline from model output.
///
/// Accepts `{"events": [...]}`, `{"timeline": [...]}` or a bare array.
/// Entries without a date or description are dropped. The result is sorted
/// by date; events sharing a date keep their original order.
pub fn parse_timeline(raw: &str, default_source_type: &str) -> Result<Vec<TimelineEvent>> {
    let body = strip_code_fences(raw);
    let parsed: RawTimeline = serde_json::from_str(body).map_err(|e| {
        Error::InvalidResponse(format!("timeline is not valid JSON: {}", e))
    })?;

    let raw_events = match parsed {
        RawTimeline::Wrapped { events } => events,
        RawTimeline::Bare(events) => events,
    };

    let mut events: Vec<TimelineEvent> = raw_events
        .into_iter()
        .filter_map(|e| {
            let date = e.date?.trim().to_string();
            let description = e.description?.trim().to_string();
            if date.is_empty() || description.is_empty() {
                return None;
            }
            Some(TimelineEvent {
                date,
                description,
                source_type: e
                    .source_type
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or_else(|| default_source_type.to_string()),
                source_id: match e.source_id {
                    Some(serde_json::Value::String(s)) => s,
                    Some(serde_json::Value::Null) | None => String::new(),
                    Some(other) => other.to_string(),
                },
            })
        })
        .collect();

    events.sort_by(|a, b| a.date.cmp(&b.date));
    Ok(events)
}

/// Split text into chunks of at most `max_chars` characters, preferring line
/// boundaries. Never splits inside a UTF-8 character.
pub fn split_into_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0usize;

    for line in text.lines() {
        let line_chars = line.chars().count();

        if line_chars > max_chars {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_chars = 0;
            }
            let chars: Vec<char> = line.chars().collect();
            for piece in chars.chunks(max_chars) {
                chunks.push(piece.iter().collect());
            }
            continue;
        }

        if current_chars + line_chars + 1 > max_chars && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_chars = 0;
        }
        if !current.is_empty() {
            current.push('\n');
            current_chars += 1;
        }
        current.push_str(line);
        current_chars += line_chars;
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    if chunks.is_empty() && !text.is_empty() {
        chunks.push(text.to_string());
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_json_fence() {
        let raw = "Here you go:\n```json\n{\"events\": []}\n```\n";
        assert_eq!(strip_code_fences(raw), "{\"events\": []}");
    }

    #[test]
    fn test_strip_no_fence() {
        assert_eq!(strip_code_fences("  [1, 2] \n"), "[1, 2]");
    }

    #[test]
    fn test_parse_wrapped_timeline_sorted() {
        let raw = r#"{"events": [
            {"date": "2023-05-01", "description": "Hearing", "source_type": "court", "source_id": 12},
            {"date": "2021-03", "description": "Contract signed"}
        ]}"#;
        let events = parse_timeline(raw, "document").unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].date, "2021-03");
        assert_eq!(events[0].source_type, "document");
        assert_eq!(events[0].source_id, "");
        assert_eq!(events[1].source_type, "court");
        assert_eq!(events[1].source_id, "12");
    }

    #[test]
    fn test_parse_bare_array_in_fence() {
        let raw = "```\n[{\"date\": \"2020-01-01\", \"event\": \"Filed\"}]\n```";
        let events = parse_timeline(raw, "document").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].description, "Filed");
    }

    #[test]
    fn test_parse_drops_incomplete_events() {
        let raw = r#"[{"date": "2020-01-01"}, {"description": "no date"}, {"date": " ", "description": "blank"}]"#;
        assert!(parse_timeline(raw, "document").unwrap().is_empty());
    }

    #[test]
    fn test_parse_rejects_prose() {
        let err = parse_timeline("I could not find any dates.", "document").unwrap_err();
        assert!(matches!(err, Error::InvalidResponse(_)));
    }

    #[test]
    fn test_split_short_text_single_chunk() {
        assert_eq!(split_into_chunks("hello\nworld", 100), vec!["hello\nworld"]);
    }

    #[test]
    fn test_split_respects_limit_and_utf8() {
        let text = "مرحبا بالعالم ".repeat(50);
        let chunks = split_into_chunks(&text, 40);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.chars().count() <= 40));
        assert_eq!(chunks.concat(), text.lines().collect::<String>());
    }

    #[test]
    fn test_split_empty() {
        assert!(split_into_chunks("", 10).is_empty());
    }
}
