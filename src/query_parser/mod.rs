//! QueryParser - Free-text query to structured multi-step intent
//!
//! ## Syntax
//!
//! - `[video:ID1,ID2]` anywhere in the string: video-id filter (first match only)
//! - `;` separates temporal steps, left to right
//! - `[ocr:phrase]` inside a step: OCR text constraint, repeatable
//!
//! Parsing is total. Bracket tokens that do not match the grammar stay in the
//! text as literal words.

use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

const VIDEO_PATTERN: &str = r"(?i)\[video:([^\]]+)\]";
const OCR_PATTERN: &str = r"(?i)\[ocr:([^\]]+)\]";
const STEP_SEPARATOR: char = ';';

fn video_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(VIDEO_PATTERN).expect("video pattern is a valid regex"))
}

fn ocr_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(OCR_PATTERN).expect("ocr pattern is a valid regex"))
}

/// One `;`-delimited segment of a query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryStep {
    /// Natural-language phrase, whitespace-normalised
    pub text: Option<String>,
    /// Lower-cased OCR phrases, in order of appearance
    pub ocr_phrases: Vec<String>,
}

/// How the engine should treat a parsed query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    /// No steps: list frames of the filtered videos
    Simple,
    /// One step: weighted hybrid similarity search
    Similarity,
    /// Several steps: ordered temporal sequence search
    Temporal,
}

/// Structured form of a raw query string
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParsedQuery {
    pub video_id_filter: Vec<String>,
    pub steps: Vec<QueryStep>,
}

impl ParsedQuery {
    pub fn mode(&self) -> QueryMode {
        match self.steps.len() {
            0 => QueryMode::Simple,
            1 => QueryMode::Similarity,
            _ => QueryMode::Temporal,
        }
    }
}

/// Parse a raw query string. Never fails.
pub fn parse(raw: &str) -> ParsedQuery {
    let (remaining, video_id_filter) = extract_video_filter(raw);

    let steps = remaining
        .split(STEP_SEPARATOR)
        .filter_map(parse_step)
        .collect();

    ParsedQuery {
        video_id_filter,
        steps,
    }
}

fn extract_video_filter(raw: &str) -> (String, Vec<String>) {
    let Some(caps) = video_regex().captures(raw) else {
        return (raw.to_string(), Vec::new());
    };

    let whole = caps.get(0).map(|m| m.range()).unwrap_or(0..0);
    let ids = caps
        .get(1)
        .map(|m| m.as_str())
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect();

    let mut remaining = String::with_capacity(raw.len());
    remaining.push_str(&raw[..whole.start]);
    remaining.push(' ');
    remaining.push_str(&raw[whole.end..]);

    (remaining, ids)
}

fn parse_step(raw_step: &str) -> Option<QueryStep> {
    let mut text = raw_step.to_string();
    let mut ocr_phrases = Vec::new();

    // One token per pass so overlapping brackets resolve left to right
    while let Some((whole, phrase)) = next_ocr_token(&text) {
        if !phrase.is_empty() {
            ocr_phrases.push(phrase);
        }
        text.replace_range(whole, " ");
    }

    let text = normalize_whitespace(&text);
    let text = if text.is_empty() { None } else { Some(text) };

    if text.is_none() && ocr_phrases.is_empty() {
        return None;
    }

    Some(QueryStep { text, ocr_phrases })
}

/// Byte range of the first `[ocr:...]` token and its lower-cased phrase
fn next_ocr_token(text: &str) -> Option<(std::ops::Range<usize>, String)> {
    let caps = ocr_regex().captures(text)?;
    let whole = caps.get(0)?.range();
    let phrase = caps
        .get(1)
        .map(|m| m.as_str().trim().to_lowercase())
        .unwrap_or_default();
    Some((whole, phrase))
}

fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
