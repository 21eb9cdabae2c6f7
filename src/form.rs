//! Creating and publishing the default invoice form.

use anyhow::Result;
use rand::RngCore;
use secp256k1::{Keypair, Secp256k1};
use serde_json::json;
use tracing::{info, warn};

use crate::{
    event::{self, Event, Tag, FORM_KIND},
    locator::Locator,
    relay::Transport,
};

pub const DEFAULT_FORM_NAME: &str = "Invoice Form";

/// Questions of the default invoice form, in display order.
pub fn default_fields() -> Vec<Tag> {
    let text = |id: &str, label: &str| Tag::new(["field", id, "text", label, "", "{}"]);
    let currencies = json!([
        ["usd", "USD"],
        ["eur", "EUR"],
        ["jpy", "JPY"],
        ["inr", "INR"],
        ["gbp", "GBP"]
    ])
    .to_string();
    vec![
        text("clientName", "Client Name"),
        text("company", "Company"),
        text("clientEmail", "Client Email"),
        text("clientAddress", "Client Address"),
        text("invoiceNumber", "Invoice Number"),
        text("invoiceDate", "Invoice Date"),
        text("dueDate", "Due Date"),
        text("serviceDescription", "Service Description"),
        text("totalAmount", "Total Amount"),
        Tag::new([
            "field",
            "currency",
            "option",
            "Currency",
            currencies.as_str(),
            "{}",
        ]),
        text("paymentInfo", "Payment Info"),
        text("issuerName", "Name"),
        text("issuerEmail", "Email"),
        text("issuerAddress", "Address"),
    ]
}

/// Signed, public (unencrypted) form template.
pub fn build_form_event(
    keys: &Keypair,
    identifier: &str,
    name: &str,
    relays: &[String],
    created_at: u64,
) -> Result<Event> {
    let mut tags = vec![
        Tag::new(["d", identifier]),
        Tag::new(["name", name]),
        Tag::new([
            "settings".to_string(),
            json!({"description": "Standard invoice form"}).to_string(),
        ]),
    ];
    tags.extend(relays.iter().map(|r| Tag::new(["relay", r.as_str()])));
    tags.extend(default_fields());
    event::sign(keys, FORM_KIND, created_at, tags, String::new())
}

/// A freshly created form.
#[derive(Debug, Clone)]
pub struct NewForm {
    pub event: Event,
    /// Owner secret key (hex); also the credential for its submissions.
    pub secret_hex: String,
    pub locator: Locator,
}

/// Random form identifier.
pub fn new_identifier() -> String {
    let mut bytes = [0u8; 6];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("invoice-{}", hex::encode(bytes))
}

/// Generate an owner key, sign the default template and publish it.
///
/// Publishing is best effort; the number of accepting relays is returned
/// alongside the form.
pub async fn create_default_form(
    transport: &dyn Transport,
    name: &str,
    relays: &[String],
) -> Result<(NewForm, usize)> {
    let secp = Secp256k1::new();
    let keys = Keypair::new(&secp, &mut rand::thread_rng());
    let identifier = new_identifier();
    let event = build_form_event(&keys, &identifier, name, relays, event::unix_now())?;
    let secret_hex = hex::encode(keys.secret_bytes());

    let accepted = match transport.publish(&event).await {
        Ok(n) => n,
        Err(e) => {
            warn!("form publish failed: {e}");
            0
        }
    };
    info!(event = %event.id, %identifier, accepted, "created form");

    let locator = Locator::new(event.pubkey.clone(), identifier)
        .with_relays(relays.to_vec())
        .with_credential(secret_hex.clone());
    Ok((
        NewForm {
            event,
            secret_hex,
            locator,
        },
        accepted,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        field_map::{map_schema, Role},
        relay::memory::MemoryRelay,
        schema::{FieldTag, FormSchema, DEFAULT_VIEW_KEY},
    };

    #[test]
    fn default_fields_shape() {
        let fields = default_fields();
        assert_eq!(fields.len(), 14);
        assert!(fields.iter().all(|t| t.0.len() == 6 && t.get(5) == Some("{}")));
        let currency = FieldTag::from_tag(&fields[9]).unwrap();
        assert_eq!(currency.field_type, "option");
        let options: Vec<Vec<String>> =
            serde_json::from_str(currency.options.as_deref().unwrap()).unwrap();
        assert_eq!(options[1], vec!["eur".to_string(), "EUR".to_string()]);
    }

    #[test]
    fn form_event_round_trips_through_schema() {
        let secp = Secp256k1::new();
        let keys = Keypair::from_seckey_slice(&secp, &[7u8; 32]).unwrap();
        let ev = build_form_event(&keys, "inv-1", "Invoices", &["wss://r".into()], 5).unwrap();
        event::verify(&ev).unwrap();

        let schema = FormSchema::from_event(&ev, None, DEFAULT_VIEW_KEY);
        assert_eq!(schema.identifier, "inv-1");
        assert_eq!(schema.name.as_deref(), Some("Invoices"));
        assert_eq!(schema.settings["description"], "Standard invoice form");
        assert_eq!(schema.relays, vec!["wss://r".to_string()]);
        let map = map_schema(&schema.fields);
        assert_eq!(map.get(Role::FreelancerName), "issuerName");
    }

    #[tokio::test]
    async fn create_publishes_and_returns_locator() {
        let relay = MemoryRelay::new();
        let (form, accepted) = create_default_form(relay.as_ref(), DEFAULT_FORM_NAME, &[])
            .await
            .unwrap();
        assert_eq!(accepted, 1);
        assert_eq!(relay.stored(), vec![form.event.clone()]);
        assert_eq!(form.locator.owner, form.event.pubkey);
        assert_eq!(form.locator.credential.as_deref(), Some(form.secret_hex.as_str()));
        assert!(form.locator.identifier.starts_with("invoice-"));
        assert_eq!(
            crate::nip44::public_key_hex(&form.secret_hex).unwrap(),
            form.event.pubkey
        );
    }
}
