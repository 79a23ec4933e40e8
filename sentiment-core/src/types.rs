use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Post,
    Comment,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Post => "post",
            ItemKind::Comment => "comment",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A post or comment pulled from the feed. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    /// Reddit fullname (`t3_...` for posts, `t1_...` for comments).
    pub id: String,
    pub kind: ItemKind,
    /// Thread reference: the parent fullname for comments, the subreddit for posts.
    pub parent_id: Option<String>,
    pub author: Option<String>,
    pub subreddit: String,
    pub title: Option<String>,
    pub body: String,
    pub permalink: String,
    pub created_utc: i64,
}

impl ContentItem {
    /// Text handed to the classifier: title and body for posts, body for comments.
    pub fn classification_text(&self) -> String {
        match (&self.title, self.body.trim()) {
            (Some(title), "") => title.trim().to_string(),
            (Some(title), body) => format!("{}\n\n{}", title.trim(), body),
            (None, body) => body.to_string(),
        }
    }

    /// Position of this item in feed order.
    pub fn position(&self) -> Checkpoint {
        Checkpoint {
            created_utc: self.created_utc,
            item_id: Some(self.id.clone()),
        }
    }
}

/// Progress marker into a feed, ordered by `(created_utc, item_id)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub created_utc: i64,
    pub item_id: Option<String>,
}

impl Checkpoint {
    pub fn initial() -> Self {
        Self::default()
    }

    pub fn is_initial(&self) -> bool {
        self.created_utc == 0 && self.item_id.is_none()
    }

    /// Whether `item` sits at or after this checkpoint's timestamp. Items sharing
    /// the checkpoint second are kept and left to deduplication.
    pub fn admits(&self, item: &ContentItem) -> bool {
        item.created_utc >= self.created_utc
    }

    /// The later of this checkpoint and the newest item in `items`.
    pub fn advance<'a, I>(&self, items: I) -> Checkpoint
    where
        I: IntoIterator<Item = &'a ContentItem>,
    {
        items
            .into_iter()
            .map(ContentItem::position)
            .fold(self.clone(), |acc, pos| if pos > acc { pos } else { acc })
    }
}

impl Ord for Checkpoint {
    fn cmp(&self, other: &Self) -> Ordering {
        self.created_utc
            .cmp(&other.created_utc)
            .then_with(|| self.item_id.cmp(&other.item_id))
    }
}

impl PartialOrd for Checkpoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// One checkpoint per independently paged listing of a feed, keyed by stream
/// name. A stream with no entry starts from the initial checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamCheckpoints(BTreeMap<String, Checkpoint>);

impl StreamCheckpoints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, stream: &str) -> Checkpoint {
        self.0.get(stream).cloned().unwrap_or_default()
    }

    pub fn set(&mut self, stream: impl Into<String>, checkpoint: Checkpoint) {
        self.0.insert(stream.into(), checkpoint);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Checkpoint)> {
        self.0.iter().map(|(stream, checkpoint)| (stream.as_str(), checkpoint))
    }

    pub fn is_initial(&self) -> bool {
        self.0.values().all(Checkpoint::is_initial)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Positive,
    Negative,
    Neutral,
    Mixed,
    Unknown,
}

impl SentimentLabel {
    pub const ALL: [SentimentLabel; 5] = [
        SentimentLabel::Positive,
        SentimentLabel::Negative,
        SentimentLabel::Neutral,
        SentimentLabel::Mixed,
        SentimentLabel::Unknown,
    ];

    /// Constrain raw model output to the label set. Anything unrecognised is `Unknown`.
    pub fn from_model_output(raw: &str) -> Self {
        let token = raw
            .trim()
            .trim_matches(|c: char| !c.is_alphabetic())
            .to_ascii_lowercase();
        match token.as_str() {
            "positive" => SentimentLabel::Positive,
            "negative" => SentimentLabel::Negative,
            "neutral" => SentimentLabel::Neutral,
            "mixed" => SentimentLabel::Mixed,
            _ => SentimentLabel::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SentimentLabel::Positive => "positive",
            SentimentLabel::Negative => "negative",
            SentimentLabel::Neutral => "neutral",
            SentimentLabel::Mixed => "mixed",
            SentimentLabel::Unknown => "unknown",
        }
    }
}

impl fmt::Display for SentimentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SentimentLabel {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_model_output(s))
    }
}

/// What the classifier produces for one piece of text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub label: SentimentLabel,
    pub confidence: Option<f32>,
    pub rationale: Option<String>,
    pub truncated: bool,
    pub original_chars: usize,
    pub provider: String,
    pub model: String,
    pub attempts: u32,
    pub raw_response: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentResult {
    pub item_id: String,
    pub label: SentimentLabel,
    pub confidence: Option<f32>,
    pub rationale: Option<String>,
    pub truncated: bool,
    pub original_chars: usize,
    pub provider: String,
    pub model: String,
    pub attempts: u32,
    pub classified_at: DateTime<Utc>,
    pub raw_response: String,
}

impl SentimentResult {
    pub fn new(item: &ContentItem, classification: Classification) -> Self {
        Self {
            item_id: item.id.clone(),
            label: classification.label,
            confidence: classification.confidence,
            rationale: classification.rationale,
            truncated: classification.truncated,
            original_chars: classification.original_chars,
            provider: classification.provider,
            model: classification.model,
            attempts: classification.attempts,
            classified_at: Utc::now(),
            raw_response: classification.raw_response,
        }
    }
}

/// Stored result joined with the content it was computed from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredResult {
    pub item: ContentItem,
    pub result: SentimentResult,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, created_utc: i64) -> ContentItem {
        ContentItem {
            id: id.to_string(),
            kind: ItemKind::Post,
            parent_id: None,
            author: Some("someone".to_string()),
            subreddit: "rust".to_string(),
            title: Some("Title".to_string()),
            body: "Body".to_string(),
            permalink: format!("/r/rust/comments/{}", id),
            created_utc,
        }
    }

    #[test]
    fn test_label_constrained_to_fixed_set() {
        assert_eq!(SentimentLabel::from_model_output("Positive"), SentimentLabel::Positive);
        assert_eq!(SentimentLabel::from_model_output(" negative. "), SentimentLabel::Negative);
        assert_eq!(SentimentLabel::from_model_output("\"mixed\""), SentimentLabel::Mixed);
        assert_eq!(SentimentLabel::from_model_output("ecstatic"), SentimentLabel::Unknown);
        assert_eq!(SentimentLabel::from_model_output(""), SentimentLabel::Unknown);
    }

    #[test]
    fn test_checkpoint_ordering() {
        let a = Checkpoint { created_utc: 10, item_id: Some("t3_a".to_string()) };
        let b = Checkpoint { created_utc: 10, item_id: Some("t3_b".to_string()) };
        let c = Checkpoint { created_utc: 11, item_id: None };
        assert!(Checkpoint::initial() < a);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_checkpoint_advance_never_decreases() {
        let checkpoint = Checkpoint { created_utc: 100, item_id: Some("t3_z".to_string()) };
        let older = vec![item("t3_a", 50), item("t3_b", 99)];
        assert_eq!(checkpoint.advance(&older), checkpoint);

        let newer = vec![item("t3_c", 120), item("t3_d", 110)];
        let advanced = checkpoint.advance(&newer);
        assert_eq!(advanced.created_utc, 120);
        assert_eq!(advanced.item_id.as_deref(), Some("t3_c"));
    }

    #[test]
    fn test_stream_checkpoints_default_to_initial() {
        let mut checkpoints = StreamCheckpoints::new();
        assert!(checkpoints.get("posts").is_initial());
        assert!(checkpoints.is_initial());

        checkpoints.set("comments", item("t1_x", 200).position());
        assert!(checkpoints.get("posts").is_initial());
        assert_eq!(checkpoints.get("comments").created_utc, 200);
        assert!(!checkpoints.is_initial());
        assert_eq!(checkpoints.iter().count(), 1);
    }

    #[test]
    fn test_checkpoint_admits_same_second() {
        let checkpoint = Checkpoint { created_utc: 100, item_id: Some("t3_z".to_string()) };
        assert!(checkpoint.admits(&item("t3_a", 100)));
        assert!(!checkpoint.admits(&item("t3_a", 99)));
    }

    #[test]
    fn test_classification_text() {
        let mut post = item("t3_a", 1);
        assert_eq!(post.classification_text(), "Title\n\nBody");
        post.body = "  ".to_string();
        assert_eq!(post.classification_text(), "Title");
        post.title = None;
        post.body = "just a comment".to_string();
        assert_eq!(post.classification_text(), "just a comment");
    }
}
