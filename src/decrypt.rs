//! Recovering the answers carried by a submission event.

use std::collections::HashMap;

use crate::{
    error::DecryptError,
    event::{Event, Tag},
    nip44::{self, ConversationKey},
    schema::parse_tag_list,
};

/// One answer: `["response", field id, value, metadata?]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseTag {
    pub field_id: String,
    pub value: String,
    pub metadata: Option<String>,
}

impl ResponseTag {
    /// Parse a `response` tag; tags of other types or without a field id are skipped.
    pub fn from_tag(tag: &Tag) -> Option<Self> {
        if tag.kind() != Some("response") {
            return None;
        }
        let field_id = tag.get(1).filter(|s| !s.is_empty())?;
        Some(ResponseTag {
            field_id: field_id.to_string(),
            value: tag.get(2).unwrap_or_default().to_string(),
            metadata: tag.get(3).map(str::to_string),
        })
    }
}

/// Decode the answers of a submission.
///
/// - Empty content: the event's own `response` tags.
/// - Encrypted content without a credential: `Ok(None)`, the event cannot be read.
/// - Encrypted content: NIP-44 decrypt with the conversation key between the
///   credential and the event author, then keep the `response` entries.
pub fn decode(
    event: &Event,
    credential: Option<&str>,
) -> Result<Option<Vec<ResponseTag>>, DecryptError> {
    if event.content.is_empty() {
        return Ok(Some(
            event.tags.iter().filter_map(ResponseTag::from_tag).collect(),
        ));
    }
    let Some(credential) = credential else {
        return Ok(None);
    };
    let key = ConversationKey::derive(credential, &event.pubkey)?;
    let plaintext = nip44::decrypt(&event.content, &key)?;
    let parsed: serde_json::Value = serde_json::from_str(&plaintext)?;
    Ok(Some(
        parse_tag_list(&parsed)
            .iter()
            .filter_map(ResponseTag::from_tag)
            .collect(),
    ))
}

/// Answers of one submission keyed by field id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnswerSet(HashMap<String, String>);

impl AnswerSet {
    /// Fold response tags; a repeated field id keeps its last value.
    pub fn from_tags(tags: &[ResponseTag]) -> Self {
        let mut answers = HashMap::new();
        for tag in tags {
            answers.insert(tag.field_id.clone(), tag.value.clone());
        }
        AnswerSet(answers)
    }

    /// Answer for `field_id`; `None` for an empty id or an unanswered question.
    pub fn get(&self, field_id: &str) -> Option<&str> {
        if field_id.is_empty() {
            return None;
        }
        self.0.get(field_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
