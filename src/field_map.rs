//! Semantic mapping from form questions to invoice roles.
//!
//! Forms are authored by hand, so questions are recognised by the words in
//! their labels. [`ROLE_RULES`] lists every role with its keyword predicate in
//! priority order; a question is claimed by the first rule whose role is still
//! free and whose keywords match its lowercased label.

use std::collections::{BTreeMap, HashSet};

use serde::{ser::SerializeMap, Serialize, Serializer};
use tracing::info;

use crate::{event::Tag, schema::FieldTag};

/// Closed set of invoice roles a question can fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Role {
    ClientName,
    Company,
    ClientEmail,
    ClientAddress,
    InvoiceNumber,
    InvoiceDate,
    DueDate,
    ServiceDescription,
    TotalAmount,
    Currency,
    PaymentInfo,
    FreelancerName,
    FreelancerEmail,
    FreelancerAddress,
}

impl Role {
    pub const ALL: [Role; 14] = [
        Role::ClientName,
        Role::Company,
        Role::ClientEmail,
        Role::ClientAddress,
        Role::InvoiceNumber,
        Role::InvoiceDate,
        Role::DueDate,
        Role::ServiceDescription,
        Role::TotalAmount,
        Role::Currency,
        Role::PaymentInfo,
        Role::FreelancerName,
        Role::FreelancerEmail,
        Role::FreelancerAddress,
    ];

    /// Name used in JSON output.
    pub fn as_str(self) -> &'static str {
        match self {
            Role::ClientName => "clientName",
            Role::Company => "company",
            Role::ClientEmail => "clientEmail",
            Role::ClientAddress => "clientAddress",
            Role::InvoiceNumber => "invoiceNumber",
            Role::InvoiceDate => "invoiceDate",
            Role::DueDate => "dueDate",
            Role::ServiceDescription => "serviceDescription",
            Role::TotalAmount => "totalAmount",
            Role::Currency => "currency",
            Role::PaymentInfo => "paymentInfo",
            Role::FreelancerName => "freelancerName",
            Role::FreelancerEmail => "freelancerEmail",
            Role::FreelancerAddress => "freelancerAddress",
        }
    }
}

/// Keyword predicate over a lowercased label.
#[derive(Debug, Clone, Copy)]
pub enum Keywords {
    /// Every keyword must appear.
    All(&'static [&'static str]),
    /// At least one keyword must appear.
    Any(&'static [&'static str]),
}

impl Keywords {
    pub fn matches(&self, label: &str) -> bool {
        match self {
            Keywords::All(words) => words.iter().all(|w| label.contains(w)),
            Keywords::Any(words) => words.iter().any(|w| label.contains(w)),
        }
    }
}

/// One row of the priority table.
#[derive(Debug, Clone, Copy)]
pub struct RoleRule {
    pub role: Role,
    pub keywords: Keywords,
}

const fn rule(role: Role, keywords: Keywords) -> RoleRule {
    RoleRule { role, keywords }
}

/// Role predicates in priority order.
///
/// Client fields must say "client" explicitly and come before the generic
/// issuer rules, so "Client Name" never lands on `freelancerName`. A client
/// question labelled only "Email" is still taken by `freelancerEmail`.
/// `Role::Currency` has no rule.
pub static ROLE_RULES: [RoleRule; 13] = [
    rule(Role::ClientName, Keywords::All(&["client", "name"])),
    rule(Role::ClientEmail, Keywords::All(&["client", "email"])),
    rule(Role::ClientAddress, Keywords::All(&["client", "address"])),
    rule(Role::Company, Keywords::Any(&["company"])),
    rule(Role::InvoiceNumber, Keywords::All(&["invoice", "number"])),
    rule(Role::InvoiceDate, Keywords::All(&["invoice", "date"])),
    // "due date" implies both words
    rule(Role::DueDate, Keywords::All(&["due", "date"])),
    rule(
        Role::ServiceDescription,
        Keywords::Any(&["service", "description"]),
    ),
    rule(Role::TotalAmount, Keywords::Any(&["amount", "total", "final"])),
    rule(
        Role::PaymentInfo,
        Keywords::Any(&["payment", "bank", "account", "upi", "paypal"]),
    ),
    rule(Role::FreelancerName, Keywords::Any(&["name"])),
    rule(Role::FreelancerEmail, Keywords::Any(&["email"])),
    rule(Role::FreelancerAddress, Keywords::Any(&["address"])),
];

/// Role → field id assignment derived from a schema.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SemanticFieldMap(BTreeMap<Role, String>);

impl SemanticFieldMap {
    /// Field id for `role`, empty when unmapped.
    pub fn get(&self, role: Role) -> &str {
        self.0.get(&role).map(String::as_str).unwrap_or("")
    }

    /// Assign a role explicitly.
    pub fn set(&mut self, role: Role, field_id: impl Into<String>) {
        self.0.insert(role, field_id.into());
    }

    pub fn is_mapped(&self, role: Role) -> bool {
        !self.get(role).is_empty()
    }

    /// Mapped `(role, field id)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (Role, &str)> {
        self.0
            .iter()
            .filter(|(_, id)| !id.is_empty())
            .map(|(role, id)| (*role, id.as_str()))
    }
}

impl Serialize for SemanticFieldMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(Role::ALL.len()))?;
        for role in Role::ALL {
            map.serialize_entry(role.as_str(), self.get(role))?;
        }
        map.end()
    }
}

/// A labelled question no rule claimed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnmappedField {
    pub id: String,
    pub label: String,
}

/// Map a schema and also return the labelled questions left unmapped.
pub fn map_schema_with_report(tags: &[Tag]) -> (SemanticFieldMap, Vec<UnmappedField>) {
    let mut map = SemanticFieldMap::default();
    let mut assigned: HashSet<Role> = HashSet::new();
    let mut unmapped = Vec::new();

    for field in tags.iter().filter_map(FieldTag::from_tag) {
        let Some(label) = field.label.as_deref() else {
            continue;
        };
        let norm = label.to_lowercase();
        let claimed = ROLE_RULES
            .iter()
            .filter(|rule| !assigned.contains(&rule.role))
            .find(|rule| rule.keywords.matches(&norm));
        match claimed {
            Some(rule) => {
                assigned.insert(rule.role);
                map.set(rule.role, field.id);
            }
            None => unmapped.push(UnmappedField {
                id: field.id,
                label: label.to_string(),
            }),
        }
    }
    (map, unmapped)
}

/// Map a schema's questions onto invoice roles.
///
/// Pure and deterministic for a given tag order; malformed tags are skipped.
pub fn map_schema(tags: &[Tag]) -> SemanticFieldMap {
    let (map, unmapped) = map_schema_with_report(tags);
    if !unmapped.is_empty() {
        let labels: Vec<&str> = unmapped.iter().map(|f| f.label.as_str()).collect();
        info!(?labels, "unmapped form fields");
    }
    map
}
