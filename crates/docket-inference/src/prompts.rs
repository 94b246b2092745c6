//! Prompt templates for enrichment calls.

use docket_core::Language;
use serde_json::Value as JsonValue;

pub const SUMMARY_SYSTEM: &str = "You summarize legal case documents. Write a concise, factual \
summary in plain prose: the parties, the key facts, what is being claimed or decided, and any \
deadlines. Do not speculate and do not add information that is not in the text.";

pub const TIMELINE_SYSTEM: &str = "You extract a chronological timeline from legal case \
documents. Respond with JSON only, in the form \
{\"events\": [{\"date\": \"YYYY-MM-DD\", \"description\": \"...\", \"source_type\": \"document\", \
\"source_id\": \"\"}]}. Use partial dates (YYYY-MM or YYYY) when the day or month is unknown. \
Include only events with a date stated or clearly implied in the text. Return {\"events\": []} \
when there are none.";

pub fn summary_chunk(index: usize, total: usize, chunk: &str) -> String {
    format!(
        "This is part {} of {} of a longer document. Summarize this part.\n\n{}",
        index, total, chunk
    )
}

pub fn summary_combine(partials: &[String]) -> String {
    format!(
        "The following are summaries of consecutive parts of one document. Combine them into a \
         single coherent summary without repeating yourself.\n\n{}",
        partials.join("\n\n---\n\n")
    )
}

pub fn translate_system(target: Language) -> String {
    format!(
        "Translate the user's text into {}. Preserve names, numbers, dates and legal terms of \
         art. Output only the translation, with no commentary.",
        target.name()
    )
}

pub fn analysis_system(analysis_type: &str) -> String {
    let focus = match analysis_type {
        "legal_review" => "Review the content as a lawyer would: identify the legal issues, \
                           relevant obligations, risks and recommended next steps.",
        "question" => "Answer the user's question using only the provided content. Say so \
                       plainly if the content does not contain the answer.",
        "entities" => "List the people, organizations, places and dates mentioned, grouped by \
                       kind.",
        "sentiment" => "Describe the tone and stance of the content and who it favours.",
        _ => "Analyze the content and report the findings that matter most for the case.",
    };
    format!(
        "You assist with legal case analysis. Analysis type: {}. {}",
        analysis_type, focus
    )
}

pub fn analysis_prompt(content: &str, context: &JsonValue) -> String {
    match context {
        JsonValue::Null => content.to_string(),
        JsonValue::Object(map) if map.is_empty() => content.to_string(),
        other => format!("Context:\n{}\n\nContent:\n{}", other, content),
    }
}
