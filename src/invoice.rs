//! Canonical invoice records assembled from decoded answers.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    decrypt::AnswerSet,
    field_map::{Role, SemanticFieldMap},
};

/// A decoded invoice ready for display and rendering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceRecord {
    // issuer
    pub freelancer_name: String,
    pub freelancer_email: String,
    pub freelancer_address: String,

    // recipient
    pub client_name: String,
    pub company: String,
    pub client_email: String,
    pub client_address: String,

    pub invoice_number: String,
    pub invoice_date: String,
    pub due_date: String,

    pub service_description: String,
    pub total_amount: String,
    pub currency: String,
    pub payment_info: String,

    /// Submitter public key.
    pub author_pubkey: String,
    /// Submission time, RFC 3339 UTC with milliseconds.
    #[serde(rename = "submittedAtISO")]
    pub submitted_at_iso: String,
}

impl InvoiceRecord {
    /// Display and dedup key: `(author, invoice number, submission time)`.
    pub fn key(&self) -> (&str, &str, &str) {
        (
            &self.author_pubkey,
            &self.invoice_number,
            &self.submitted_at_iso,
        )
    }
}

/// Build an invoice from one submission's answers.
///
/// Unmapped or unanswered roles stay empty, except `invoice_number` (first 8
/// characters of the submission id), `invoice_date` (submission date) and
/// `total_amount` (`"0"`).
pub fn assemble(
    answers: &AnswerSet,
    roles: &SemanticFieldMap,
    submitted_at: u64,
    author_id: &str,
    submission_id: &str,
) -> InvoiceRecord {
    let value = |role: Role| answers.get(roles.get(role)).unwrap_or("").to_string();
    let or_else = |role: Role, fallback: &dyn Fn() -> String| {
        let v = value(role);
        if v.is_empty() {
            fallback()
        } else {
            v
        }
    };

    InvoiceRecord {
        freelancer_name: value(Role::FreelancerName),
        freelancer_email: value(Role::FreelancerEmail),
        freelancer_address: value(Role::FreelancerAddress),
        client_name: value(Role::ClientName),
        company: value(Role::Company),
        client_email: value(Role::ClientEmail),
        client_address: value(Role::ClientAddress),
        invoice_number: or_else(Role::InvoiceNumber, &|| {
            submission_id.chars().take(8).collect()
        }),
        invoice_date: or_else(Role::InvoiceDate, &|| display_date(submitted_at)),
        due_date: value(Role::DueDate),
        service_description: value(Role::ServiceDescription),
        total_amount: or_else(Role::TotalAmount, &|| "0".to_string()),
        currency: value(Role::Currency),
        payment_info: value(Role::PaymentInfo),
        author_pubkey: author_id.to_string(),
        submitted_at_iso: iso_timestamp(submitted_at),
    }
}

/// Out-of-range timestamps fall back to the Unix epoch.
fn datetime(ts: u64) -> DateTime<Utc> {
    i64::try_from(ts)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or_else(|| {
            debug!(created_at = ts, "timestamp out of range, using epoch");
            DateTime::default()
        })
}

/// `2023-11-14T22:13:20.000Z`
pub fn iso_timestamp(ts: u64) -> String {
    datetime(ts).to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// US-style short date, e.g. `11/14/2023`.
pub fn display_date(ts: u64) -> String {
    datetime(ts).format("%-m/%-d/%Y").to_string()
}

/// US-style date and time for an ISO timestamp, e.g. `11/14/2023, 10:13:20 PM`.
/// Unparseable input is returned unchanged.
pub fn display_datetime(iso: &str) -> String {
    match DateTime::parse_from_rfc3339(iso) {
        Ok(dt) => dt
            .with_timezone(&Utc)
            .format("%-m/%-d/%Y, %-I:%M:%S %p")
            .to_string(),
        Err(_) => iso.to_string(),
    }
}
