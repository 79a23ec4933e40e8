//! Prompt construction and parsing of model replies.

use sentiment_core::SentimentLabel;
use serde_json::Value;

pub const SYSTEM_PROMPT: &str = "You classify the sentiment of Reddit posts and comments.

Read the text and decide its overall sentiment toward its subject:
- positive: approval, enthusiasm, gratitude, satisfaction
- negative: complaints, frustration, anger, disappointment
- neutral: factual, informational or questions without clear feeling
- mixed: clear positive and negative sentiment together

Prefer negative or mixed when complaints dominate.

Reply with a single JSON object and nothing else:
{\"sentiment\": \"positive\" | \"negative\" | \"neutral\" | \"mixed\", \"confidence\": number between 0 and 1, \"rationale\": short phrase}";

/// Classifier input after applying the length cap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedText {
    pub text: String,
    pub truncated: bool,
    pub original_chars: usize,
}

/// Keep the first `max_chars` characters of `text`. Cuts on a char boundary,
/// never inside a UTF-8 sequence.
pub fn truncate_chars(text: &str, max_chars: usize) -> PreparedText {
    let original_chars = text.chars().count();
    if original_chars <= max_chars {
        return PreparedText {
            text: text.to_string(),
            truncated: false,
            original_chars,
        };
    }

    let cut = text
        .char_indices()
        .nth(max_chars)
        .map(|(index, _)| index)
        .unwrap_or(text.len());
    PreparedText {
        text: text[..cut].to_string(),
        truncated: true,
        original_chars,
    }
}

pub fn user_prompt(text: &str) -> String {
    format!(
        "Classify the sentiment of this Reddit content. Return only the JSON object.\n\n<content>\n{}\n</content>",
        text
    )
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSentiment {
    pub label: SentimentLabel,
    pub confidence: Option<f32>,
    pub rationale: Option<String>,
}

/// Read a label out of whatever the model said. JSON (fenced or embedded in
/// prose) is preferred; otherwise the first word is taken as the label.
pub fn parse_model_output(raw: &str) -> ParsedSentiment {
    let stripped = strip_code_fences(raw);

    if let Some(object) = json_object(stripped) {
        let label = ["sentiment", "label"]
            .iter()
            .find_map(|key| object.get(*key).and_then(Value::as_str))
            .map(SentimentLabel::from_model_output)
            .unwrap_or(SentimentLabel::Unknown);
        let confidence = object
            .get("confidence")
            .and_then(Value::as_f64)
            .filter(|c| (0.0..=1.0).contains(c))
            .map(|c| c as f32);
        let rationale = object
            .get("rationale")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string);

        return ParsedSentiment {
            label,
            confidence,
            rationale,
        };
    }

    let first_word = stripped.split_whitespace().next().unwrap_or_default();
    ParsedSentiment {
        label: SentimentLabel::from_model_output(first_word),
        confidence: None,
        rationale: None,
    }
}

fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (```json) up to the first newline.
    let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    body.trim_end().trim_end_matches("```").trim()
}

fn json_object(text: &str) -> Option<serde_json::Map<String, Value>> {
    if let Ok(Value::Object(object)) = serde_json::from_str(text) {
        return Some(object);
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str(&text[start..=end]) {
        Ok(Value::Object(object)) => Some(object),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncation_counts_chars_not_bytes() {
        let text = "héllo wörld";
        let prepared = truncate_chars(text, 4);
        assert_eq!(prepared.text, "héll");
        assert!(prepared.truncated);
        assert_eq!(prepared.original_chars, 11);

        let short = truncate_chars("ok", 4);
        assert_eq!(short.text, "ok");
        assert!(!short.truncated);
        assert_eq!(short.original_chars, 2);
    }

    #[test]
    fn test_truncation_is_deterministic() {
        let text = "🦀".repeat(10);
        assert_eq!(truncate_chars(&text, 3), truncate_chars(&text, 3));
        assert_eq!(truncate_chars(&text, 3).text, "🦀🦀🦀");
    }

    #[test]
    fn test_parse_json_reply() {
        let parsed = parse_model_output(
            r#"{"sentiment": "Negative", "confidence": 0.82, "rationale": "complains about build times"}"#,
        );
        assert_eq!(parsed.label, SentimentLabel::Negative);
        assert_eq!(parsed.confidence, Some(0.82));
        assert_eq!(parsed.rationale.as_deref(), Some("complains about build times"));
    }

    #[test]
    fn test_parse_fenced_json() {
        let parsed = parse_model_output("```json\n{\"label\": \"mixed\", \"confidence\": 0.5}\n```");
        assert_eq!(parsed.label, SentimentLabel::Mixed);
        assert_eq!(parsed.confidence, Some(0.5));
        assert_eq!(parsed.rationale, None);
    }

    #[test]
    fn test_parse_json_embedded_in_prose() {
        let parsed =
            parse_model_output("Sure! Here you go: {\"sentiment\": \"positive\"} Hope that helps.");
        assert_eq!(parsed.label, SentimentLabel::Positive);
    }

    #[test]
    fn test_out_of_range_confidence_dropped() {
        let parsed = parse_model_output(r#"{"sentiment": "neutral", "confidence": 87}"#);
        assert_eq!(parsed.label, SentimentLabel::Neutral);
        assert_eq!(parsed.confidence, None);
    }

    #[test]
    fn test_free_text_fallback() {
        assert_eq!(
            parse_model_output("Positive. The author is thrilled.").label,
            SentimentLabel::Positive
        );
        assert_eq!(
            parse_model_output("I think this is sarcastic").label,
            SentimentLabel::Unknown
        );
        assert_eq!(parse_model_output("").label, SentimentLabel::Unknown);
    }

    #[test]
    fn test_out_of_vocabulary_label_is_unknown() {
        let parsed = parse_model_output(r#"{"sentiment": "furious"}"#);
        assert_eq!(parsed.label, SentimentLabel::Unknown);
    }
}
