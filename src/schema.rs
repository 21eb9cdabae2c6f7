//! Form templates published as kind-30168 events.

use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    event::{Event, Tag},
    nip44::{self, ConversationKey},
};

/// Well-known view key used to encrypt private form templates.
pub const DEFAULT_VIEW_KEY: &str =
    "bd1d39dbb0e447e4b6075c253df49561f22c8156a3bf320b9e7c6755a5acaea8";

/// One question of a form: `["field", id, type, label?, options?, meta?]`.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldTag {
    pub id: String,
    pub field_type: String,
    pub label: Option<String>,
    pub options: Option<String>,
    pub meta: Option<String>,
}

impl FieldTag {
    /// Parse a `field` tag; other tag types and tags without an id yield `None`.
    pub fn from_tag(tag: &Tag) -> Option<Self> {
        if tag.kind() != Some("field") {
            return None;
        }
        let id = tag.get(1).filter(|s| !s.is_empty())?;
        let non_empty = |idx| tag.get(idx).filter(|s| !s.is_empty()).map(str::to_string);
        Some(FieldTag {
            id: id.to_string(),
            field_type: tag.get(2).unwrap_or_default().to_string(),
            label: non_empty(3),
            options: non_empty(4),
            meta: non_empty(5),
        })
    }
}

/// A fetched form template.
#[derive(Debug, Clone)]
pub struct FormSchema {
    /// Form identifier (`d` tag).
    pub identifier: String,
    /// Author of the template event.
    pub owner: String,
    /// Display name (`name` tag).
    pub name: Option<String>,
    /// Parsed `settings` tag, `Null` when absent or not JSON.
    pub settings: Value,
    /// Relays the form asks submitters to publish to (`relay` tags).
    pub relays: Vec<String>,
    /// Field definitions in schema order; may contain other tag types.
    pub fields: Vec<Tag>,
}

impl FormSchema {
    /// Build a schema from its event.
    ///
    /// Public templates carry their fields as tags. Private templates keep them
    /// in a NIP-44 encrypted JSON tag list readable with `credential` and the
    /// view public key. Failures are logged and leave the schema without fields.
    pub fn from_event(ev: &Event, credential: Option<&str>, view_pubkey: &str) -> Self {
        let fields = if ev.content.is_empty() {
            ev.tags_named("field").cloned().collect()
        } else if let Some(credential) = credential {
            match decrypt_fields(&ev.content, credential, view_pubkey) {
                Ok(fields) => fields,
                Err(e) => {
                    warn!(event = %ev.id, "failed to decrypt form template: {e}");
                    Vec::new()
                }
            }
        } else {
            warn!(event = %ev.id, "form template is encrypted but no credential was provided");
            Vec::new()
        };
        let settings = ev
            .tag_value("settings")
            .and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or(Value::Null);
        let mut relays: Vec<String> = Vec::new();
        for relay in ev.tags_named("relay").filter_map(|t| t.get(1)) {
            if !relays.iter().any(|r| r == relay) {
                relays.push(relay.to_string());
            }
        }
        debug!(event = %ev.id, fields = fields.len(), "parsed form template");
        FormSchema {
            identifier: ev.tag_value("d").unwrap_or_default().to_string(),
            owner: ev.pubkey.clone(),
            name: ev.tag_value("name").map(str::to_string),
            settings,
            relays,
            fields,
        }
    }

    /// Parsed `field` entries in schema order.
    pub fn field_tags(&self) -> Vec<FieldTag> {
        self.fields.iter().filter_map(FieldTag::from_tag).collect()
    }
}

fn decrypt_fields(
    content: &str,
    credential: &str,
    view_pubkey: &str,
) -> Result<Vec<Tag>, crate::error::DecryptError> {
    let key = ConversationKey::derive(credential, view_pubkey)?;
    let plaintext = nip44::decrypt(content, &key)?;
    Ok(parse_tag_list(&serde_json::from_str(&plaintext)?))
}

/// Interpret a JSON document as a list of tags, skipping non-array entries.
pub fn parse_tag_list(val: &Value) -> Vec<Tag> {
    let Some(entries) = val.as_array() else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| entry.as_array())
        .map(|parts| {
            Tag(parts
                .iter()
                .map(|p| match p {
                    Value::String(s) => s.clone(),
                    Value::Null => String::new(),
                    other => other.to_string(),
                })
                .collect())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::FORM_KIND;

    fn template(tags: Vec<Tag>, content: &str) -> Event {
        Event {
            id: "f0".into(),
            pubkey: "owner".into(),
            kind: FORM_KIND,
            created_at: 1,
            tags,
            content: content.into(),
            sig: String::new(),
        }
    }

    #[test]
    fn public_template_uses_field_tags() {
        let ev = template(
            vec![
                Tag::new(["d", "invoice"]),
                Tag::new(["name", "Invoice Form"]),
                Tag::new(["settings", r#"{"description":"Standard"}"#]),
                Tag::new(["relay", "wss://a"]),
                Tag::new(["relay", "wss://a"]),
                Tag::new(["field", "q1", "text", "Client Name"]),
                Tag::new(["field", "q2", "text", ""]),
            ],
            "",
        );
        let schema = FormSchema::from_event(&ev, None, DEFAULT_VIEW_KEY);
        assert_eq!(schema.identifier, "invoice");
        assert_eq!(schema.owner, "owner");
        assert_eq!(schema.name.as_deref(), Some("Invoice Form"));
        assert_eq!(schema.settings["description"], "Standard");
        assert_eq!(schema.relays, vec!["wss://a".to_string()]);
        let fields = schema.field_tags();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].label.as_deref(), Some("Client Name"));
        assert_eq!(fields[1].label, None);
    }

    #[test]
    fn private_template_decrypts_with_credential() {
        let owner_secret = "0000000000000000000000000000000000000000000000000000000000000007";
        let view_secret = DEFAULT_VIEW_KEY;
        let view_pubkey = nip44::public_key_hex(view_secret).unwrap();
        let owner_pubkey = nip44::public_key_hex(owner_secret).unwrap();
        let key = ConversationKey::derive(view_secret, &owner_pubkey).unwrap();
        let body = r#"[["field","q1","text","Total Amount"],"junk"]"#;
        let ev = template(
            vec![Tag::new(["d", "private"])],
            &nip44::encrypt(body, &key).unwrap(),
        );

        let schema = FormSchema::from_event(&ev, Some(owner_secret), &view_pubkey);
        assert_eq!(schema.field_tags()[0].id, "q1");

        let locked = FormSchema::from_event(&ev, None, &view_pubkey);
        assert!(locked.fields.is_empty());

        let wrong = FormSchema::from_event(&ev, Some(view_secret), &view_pubkey);
        assert!(wrong.fields.is_empty());
    }

    #[test]
    fn field_tag_requires_id() {
        assert!(FieldTag::from_tag(&Tag::new(["field", ""])).is_none());
        assert!(FieldTag::from_tag(&Tag::new(["response", "q1", "x"])).is_none());
        let f = FieldTag::from_tag(&Tag::new(["field", "q1"])).unwrap();
        assert_eq!(f.field_type, "");
    }

    #[test]
    fn tag_list_stringifies_scalars() {
        let val = serde_json::json!([["response", "q1", 150, null], {"x": 1}]);
        let tags = parse_tag_list(&val);
        assert_eq!(tags, vec![Tag::new(["response", "q1", "150", ""])]);
        assert!(parse_tag_list(&serde_json::json!({"a": 1})).is_empty());
    }
}
