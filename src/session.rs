//! Wires transport, schema fetch, field mapping and the reducer together.

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, info};

use crate::{
    fetch::{fetch_schema, subscribe_submissions},
    field_map::{map_schema, SemanticFieldMap},
    reducer::{self, Invoices, Phase, ReducerHandle},
    relay::{self, Transport},
    schema::FormSchema,
};

/// Which form to follow and how to read it.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub owner: String,
    pub identifier: String,
    /// Secret key (hex) able to decrypt submissions.
    pub credential: Option<String>,
    pub view_pubkey: String,
    pub allowed_authors: Vec<String>,
    pub relay_hints: Vec<String>,
    pub schema_timeout: Duration,
}

/// A running form session: template fetched, submissions streaming into the
/// reducer.
pub struct Session {
    schema: FormSchema,
    field_map: SemanticFieldMap,
    reducer: ReducerHandle,
    reducer_task: JoinHandle<()>,
    pump: JoinHandle<()>,
    stop: watch::Sender<bool>,
}

impl Session {
    /// Fetch the template, map its fields and start following submissions.
    ///
    /// Fails with [`crate::error::FetchError`] when the template cannot be
    /// found.
    pub async fn start(transport: Arc<dyn Transport>, cfg: SessionConfig) -> Result<Self> {
        let (reducer, reducer_task) = reducer::spawn(cfg.credential.clone());

        let schema = match fetch_schema(
            transport.as_ref(),
            &cfg.owner,
            &cfg.identifier,
            cfg.credential.as_deref(),
            &cfg.view_pubkey,
            &cfg.relay_hints,
            cfg.schema_timeout,
        )
        .await
        {
            Ok(schema) => schema,
            Err(e) => {
                reducer.close().await;
                let _ = reducer_task.await;
                return Err(e.into());
            }
        };
        let field_map = map_schema(&schema.fields);
        reducer.set_field_map(field_map.clone()).await?;

        let mut hints = cfg.relay_hints.clone();
        for relay in &schema.relays {
            if !hints.contains(relay) {
                hints.push(relay.clone());
            }
        }
        let mut sub = subscribe_submissions(
            transport.as_ref(),
            &cfg.owner,
            &cfg.identifier,
            &cfg.allowed_authors,
            &hints,
        )
        .await?;
        reducer.subscribed().await?;
        info!(owner = %cfg.owner, identifier = %cfg.identifier, "listening for submissions");

        let (stop, mut stopped) = watch::channel(false);
        let feed = reducer.clone();
        let pump = tokio::spawn(async move {
            loop {
                let ev = tokio::select! {
                    _ = relay::closed(&mut stopped) => break,
                    ev = sub.next() => ev,
                };
                let Some(ev) = ev else { break };
                if feed.push(ev).await.is_err() {
                    break;
                }
            }
            debug!("submission stream ended");
        });

        Ok(Session {
            schema,
            field_map,
            reducer,
            reducer_task,
            pump,
            stop,
        })
    }

    pub fn schema(&self) -> &FormSchema {
        &self.schema
    }

    pub fn field_map(&self) -> &SemanticFieldMap {
        &self.field_map
    }

    pub fn invoices(&self) -> Invoices {
        self.reducer.invoices()
    }

    pub fn watch_invoices(&self) -> watch::Receiver<Invoices> {
        self.reducer.watch_invoices()
    }

    pub fn phase(&self) -> Phase {
        self.reducer.phase()
    }

    pub fn watch_phase(&self) -> watch::Receiver<Phase> {
        self.reducer.watch_phase()
    }

    /// Forget every collected submission; new deliveries repopulate the list.
    pub async fn reset(&self) -> Result<()> {
        self.reducer.reset().await
    }

    /// Close the submission stream, then tear the reducer down.
    pub async fn shutdown(self) {
        self.stop.send_replace(true);
        let _ = self.pump.await;
        self.reducer.close().await;
        let _ = self.reducer_task.await;
        info!("session closed");
    }
}
