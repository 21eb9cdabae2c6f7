//! Fetching a form template and subscribing to its submissions.

use std::time::Duration;

use tracing::{debug, info};

use crate::{
    error::FetchError,
    event::{FORM_KIND, RESPONSE_KIND},
    relay::{Filter, Subscription, Transport},
    schema::FormSchema,
};

/// `a` tag value submissions use to reference their form.
pub fn form_coordinate(owner: &str, identifier: &str) -> String {
    format!("{FORM_KIND}:{owner}:{identifier}")
}

/// Fetch a form template once.
///
/// The first matching event wins and the subscription is closed right away,
/// so later template updates are never observed.
pub async fn fetch_schema(
    transport: &dyn Transport,
    owner: &str,
    identifier: &str,
    credential: Option<&str>,
    view_pubkey: &str,
    relay_hints: &[String],
    timeout: Duration,
) -> Result<FormSchema, FetchError> {
    let filter = Filter::new()
        .kind(FORM_KIND)
        .author(owner)
        .tag("d", identifier);
    let mut sub = transport
        .subscribe(filter, relay_hints)
        .await
        .map_err(|e| FetchError::Transport(e.to_string()))?;
    let first = tokio::time::timeout(timeout, sub.next()).await;
    sub.close();
    match first {
        Ok(Some(ev)) => {
            info!(event = %ev.id, %owner, %identifier, "fetched form template");
            Ok(FormSchema::from_event(&ev, credential, view_pubkey))
        }
        Ok(None) | Err(_) => {
            debug!(%owner, %identifier, "no form template before timeout");
            Err(FetchError::SchemaUnavailable {
                owner: owner.to_string(),
                identifier: identifier.to_string(),
            })
        }
    }
}

/// Long-lived subscription to a form's submissions, optionally restricted to
/// `allowed_authors`.
pub async fn subscribe_submissions(
    transport: &dyn Transport,
    owner: &str,
    identifier: &str,
    allowed_authors: &[String],
    relay_hints: &[String],
) -> Result<Subscription, FetchError> {
    let filter = Filter::new()
        .kind(RESPONSE_KIND)
        .tag("a", form_coordinate(owner, identifier))
        .authors(allowed_authors.iter().cloned());
    transport
        .subscribe(filter, relay_hints)
        .await
        .map_err(|e| FetchError::Transport(e.to_string()))
}
