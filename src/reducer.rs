//! Live aggregation of submission events into the visible invoice list.
//!
//! A single task owns the event set and the field map. Every change starts a
//! recomputation pass that decodes and assembles all events concurrently; a
//! newer pass cancels the previous one and only the latest pass may commit.

use std::{collections::HashSet, sync::Arc};

use anyhow::{anyhow, Result};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, warn};

use crate::{
    decrypt::{self, AnswerSet},
    event::Event,
    field_map::SemanticFieldMap,
    invoice::{assemble, InvoiceRecord},
    relay,
};

/// Lifecycle of a reducer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    /// Waiting for the form schema.
    Idle,
    /// Field map known, submissions not yet subscribed.
    MapReady,
    /// Subscribed and up to date.
    Listening,
    /// A recomputation pass is in flight.
    Recomputing,
    /// Torn down; nothing is committed any more.
    Closed,
}

/// Messages accepted by the reducer task.
#[derive(Debug)]
pub enum Input {
    FieldMap(SemanticFieldMap),
    Subscribed,
    Event(Box<Event>),
    Reset,
    Close,
}

/// Shared snapshot of the visible collection.
pub type Invoices = Arc<Vec<InvoiceRecord>>;

/// Work captured for one recomputation pass.
struct Pass {
    generation: u64,
    /// Flips to `true` when a newer pass, a reset or close supersedes this one.
    cancel: watch::Receiver<bool>,
    events: Vec<Event>,
    map: Arc<SemanticFieldMap>,
    credential: Option<String>,
}

struct PassResult {
    generation: u64,
    cancel: watch::Receiver<bool>,
    invoices: Vec<InvoiceRecord>,
}

struct Reducer {
    credential: Option<String>,
    /// Newest arrival first.
    events: Vec<Event>,
    seen: HashSet<String>,
    map: Option<Arc<SemanticFieldMap>>,
    generation: u64,
    in_flight: Option<watch::Sender<bool>>,
    phase: Phase,
    invoices_tx: watch::Sender<Invoices>,
    phase_tx: watch::Sender<Phase>,
}

impl Reducer {
    fn new(credential: Option<String>) -> Self {
        let (invoices_tx, _) = watch::channel(Arc::new(Vec::new()));
        let (phase_tx, _) = watch::channel(Phase::Idle);
        Reducer {
            credential,
            events: Vec::new(),
            seen: HashSet::new(),
            map: None,
            generation: 0,
            in_flight: None,
            phase: Phase::Idle,
            invoices_tx,
            phase_tx,
        }
    }

    fn set_phase(&mut self, phase: Phase) {
        if self.phase != phase {
            debug!(from = ?self.phase, to = ?phase, "reducer phase");
            self.phase = phase;
            self.phase_tx.send_replace(phase);
        }
    }

    fn set_map(&mut self, map: SemanticFieldMap) {
        self.map = Some(Arc::new(map));
        if self.phase == Phase::Idle {
            self.set_phase(Phase::MapReady);
        }
    }

    fn subscribed(&mut self) {
        if self.phase == Phase::MapReady {
            self.set_phase(Phase::Listening);
        } else {
            debug!(phase = ?self.phase, "ignoring subscription notice");
        }
    }

    /// Record an event; returns `false` for an id already seen.
    fn ingest(&mut self, ev: Event) -> bool {
        if !self.seen.insert(ev.id.clone()) {
            debug!(event = %ev.id, "duplicate submission");
            return false;
        }
        self.events.insert(0, ev);
        true
    }

    fn cancel_in_flight(&mut self) {
        if let Some(prev) = self.in_flight.take() {
            prev.send_replace(true);
        }
    }

    /// Cancel the in-flight pass and capture a new one, if a map is known.
    fn begin_pass(&mut self) -> Option<Pass> {
        let map = self.map.clone()?;
        self.cancel_in_flight();
        self.generation += 1;
        let (cancel_tx, cancel) = watch::channel(false);
        self.in_flight = Some(cancel_tx);
        if self.phase == Phase::Listening {
            self.set_phase(Phase::Recomputing);
        }
        Some(Pass {
            generation: self.generation,
            cancel,
            events: self.events.clone(),
            map,
            credential: self.credential.clone(),
        })
    }

    /// Publish a pass result; stale or cancelled passes are discarded.
    fn commit(
        &mut self,
        generation: u64,
        cancel: &watch::Receiver<bool>,
        invoices: Vec<InvoiceRecord>,
    ) -> bool {
        let stale = generation != self.generation || *cancel.borrow();
        if self.phase == Phase::Closed || stale {
            debug!(generation, latest = self.generation, "discarding stale pass");
            return false;
        }
        self.in_flight = None;
        debug!(generation, invoices = invoices.len(), "committing pass");
        self.invoices_tx.send_replace(Arc::new(invoices));
        if self.phase == Phase::Recomputing {
            self.set_phase(Phase::Listening);
        }
        true
    }

    fn reset(&mut self) {
        self.cancel_in_flight();
        self.generation += 1;
        self.events.clear();
        self.seen.clear();
        self.invoices_tx.send_replace(Arc::new(Vec::new()));
        if self.phase == Phase::Recomputing {
            self.set_phase(Phase::Listening);
        }
    }

    fn close(&mut self) {
        self.cancel_in_flight();
        self.set_phase(Phase::Closed);
    }

    fn spawn_pass(&mut self, done: &mpsc::UnboundedSender<PassResult>) {
        let Some(pass) = self.begin_pass() else {
            return;
        };
        let done = done.clone();
        tokio::spawn(async move {
            let generation = pass.generation;
            let mut cancel = pass.cancel.clone();
            tokio::select! {
                _ = relay::closed(&mut cancel) => debug!(generation, "pass cancelled"),
                invoices = build_invoices(&pass.events, &pass.map, pass.credential.as_deref()) => {
                    let _ = done.send(PassResult { generation, cancel: pass.cancel.clone(), invoices });
                }
            }
        });
    }

    async fn run(mut self, mut inputs: mpsc::Receiver<Input>) {
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        loop {
            tokio::select! {
                input = inputs.recv() => match input {
                    None | Some(Input::Close) => {
                        self.close();
                        break;
                    }
                    Some(Input::FieldMap(map)) => {
                        self.set_map(map);
                        self.spawn_pass(&done_tx);
                    }
                    Some(Input::Subscribed) => self.subscribed(),
                    Some(Input::Event(ev)) => {
                        if self.ingest(*ev) {
                            self.spawn_pass(&done_tx);
                        }
                    }
                    Some(Input::Reset) => self.reset(),
                },
                Some(done) = done_rx.recv() => {
                    self.commit(done.generation, &done.cancel, done.invoices);
                }
            }
        }
    }
}

/// Handle for feeding and observing a reducer task.
#[derive(Clone)]
pub struct ReducerHandle {
    tx: mpsc::Sender<Input>,
    invoices: watch::Receiver<Invoices>,
    phase: watch::Receiver<Phase>,
}

impl ReducerHandle {
    async fn send(&self, input: Input) -> Result<()> {
        self.tx
            .send(input)
            .await
            .map_err(|_| anyhow!("reducer closed"))
    }

    pub async fn set_field_map(&self, map: SemanticFieldMap) -> Result<()> {
        self.send(Input::FieldMap(map)).await
    }

    pub async fn subscribed(&self) -> Result<()> {
        self.send(Input::Subscribed).await
    }

    pub async fn push(&self, ev: Event) -> Result<()> {
        self.send(Input::Event(Box::new(ev))).await
    }

    /// Drop every collected event and invoice.
    pub async fn reset(&self) -> Result<()> {
        self.send(Input::Reset).await
    }

    /// Tear the reducer down; a closed reducer is not an error.
    pub async fn close(&self) {
        let _ = self.tx.send(Input::Close).await;
    }

    /// Current visible collection.
    pub fn invoices(&self) -> Invoices {
        self.invoices.borrow().clone()
    }

    pub fn watch_invoices(&self) -> watch::Receiver<Invoices> {
        self.invoices.clone()
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    pub fn watch_phase(&self) -> watch::Receiver<Phase> {
        self.phase.clone()
    }
}

/// Start a reducer decoding submissions with `credential`.
pub fn spawn(credential: Option<String>) -> (ReducerHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(256);
    let reducer = Reducer::new(credential);
    let handle = ReducerHandle {
        tx,
        invoices: reducer.invoices_tx.subscribe(),
        phase: reducer.phase_tx.subscribe(),
    };
    let task = tokio::spawn(reducer.run(rx));
    (handle, task)
}

/// Decode and assemble every event, dropping failures, newest submission first.
pub async fn build_invoices(
    events: &[Event],
    map: &SemanticFieldMap,
    credential: Option<&str>,
) -> Vec<InvoiceRecord> {
    let jobs = events.iter().map(|ev| async move {
        tokio::task::yield_now().await;
        invoice_for(ev, map, credential)
    });
    let mut invoices: Vec<InvoiceRecord> =
        join_all(jobs).await.into_iter().flatten().collect();
    invoices.sort_by(|a, b| b.submitted_at_iso.cmp(&a.submitted_at_iso));
    invoices
}

fn invoice_for(
    ev: &Event,
    map: &SemanticFieldMap,
    credential: Option<&str>,
) -> Option<InvoiceRecord> {
    match decrypt::decode(ev, credential) {
        Ok(Some(tags)) => Some(assemble(
            &AnswerSet::from_tags(&tags),
            map,
            ev.created_at,
            &ev.pubkey,
            &ev.id,
        )),
        Ok(None) => {
            warn!(event = %ev.id, "encrypted submission skipped, no credential");
            None
        }
        Err(e) => {
            warn!(event = %ev.id, "dropping submission: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        decrypt::tests::{encrypted_submission, FORM_SECRET},
        event::{Tag, RESPONSE_KIND},
        field_map::Role,
    };

    fn submission(id: &str, created_at: u64, client: &str) -> Event {
        Event {
            id: id.into(),
            pubkey: "author".into(),
            kind: RESPONSE_KIND,
            created_at,
            tags: vec![
                Tag::new(["a", "30168:owner:invoice"]),
                Tag::new(["response", "q1", client]),
            ],
            content: String::new(),
            sig: String::new(),
        }
    }

    fn field_map() -> SemanticFieldMap {
        let mut map = SemanticFieldMap::default();
        map.set(Role::ClientName, "q1");
        map
    }

    #[test]
    fn ingestion_is_idempotent() {
        let mut reducer = Reducer::new(None);
        assert!(reducer.ingest(submission("e1", 1, "Acme")));
        assert!(!reducer.ingest(submission("e1", 1, "Acme")));
        assert!(reducer.ingest(submission("e2", 2, "Beta")));
        assert_eq!(reducer.events.len(), 2);
        assert_eq!(reducer.events[0].id, "e2");
    }

    #[tokio::test]
    async fn one_bad_event_is_dropped() {
        let mut bad = encrypted_submission("e2", 2, r#"[["response","q1","x"]]"#);
        bad.content = "!".repeat(200);
        let events = vec![
            submission("e1", 1, "Acme"),
            bad,
            encrypted_submission("e3", 3, r#"[["response","q1","Gamma"]]"#),
        ];
        let invoices = build_invoices(&events, &field_map(), Some(FORM_SECRET)).await;
        assert_eq!(invoices.len(), 2);
        assert_eq!(invoices[0].client_name, "Gamma");
        assert_eq!(invoices[1].client_name, "Acme");
    }

    #[tokio::test]
    async fn invoices_sorted_newest_first() {
        let events = vec![
            submission("e1", 1, "a"),
            submission("e3", 3, "c"),
            submission("e2", 2, "b"),
        ];
        let invoices = build_invoices(&events, &field_map(), None).await;
        let names: Vec<&str> = invoices.iter().map(|i| i.client_name.as_str()).collect();
        assert_eq!(names, vec!["c", "b", "a"]);
    }

    #[test]
    fn stale_pass_is_discarded() {
        let mut reducer = Reducer::new(None);
        reducer.set_map(field_map());
        reducer.subscribed();
        let first = reducer.begin_pass().unwrap();
        let second = reducer.begin_pass().unwrap();
        assert!(*first.cancel.borrow());
        assert_eq!(reducer.phase, Phase::Recomputing);

        let stale = vec![InvoiceRecord::default()];
        assert!(!reducer.commit(first.generation, &first.cancel, stale));
        assert!(reducer.invoices_tx.borrow().is_empty());
        assert_eq!(reducer.phase, Phase::Recomputing);

        assert!(reducer.commit(second.generation, &second.cancel, vec![]));
        assert_eq!(reducer.phase, Phase::Listening);
    }

    #[test]
    fn no_pass_without_field_map() {
        let mut reducer = Reducer::new(None);
        reducer.ingest(submission("e1", 1, "a"));
        assert!(reducer.begin_pass().is_none());
        assert_eq!(reducer.phase, Phase::Idle);
    }

    #[test]
    fn closed_reducer_commits_nothing() {
        let mut reducer = Reducer::new(None);
        reducer.set_map(field_map());
        reducer.subscribed();
        let pass = reducer.begin_pass().unwrap();
        reducer.close();
        assert!(*pass.cancel.borrow());
        assert!(!reducer.commit(pass.generation, &pass.cancel, vec![]));
        assert_eq!(*reducer.phase_tx.borrow(), Phase::Closed);
    }

    #[test]
    fn reset_discards_in_flight_pass() {
        let mut reducer = Reducer::new(None);
        reducer.set_map(field_map());
        reducer.subscribed();
        reducer.ingest(submission("e1", 1, "a"));
        let pass = reducer.begin_pass().unwrap();
        reducer.reset();
        let stale = vec![InvoiceRecord::default()];
        assert!(!reducer.commit(pass.generation, &pass.cancel, stale));
        assert!(reducer.events.is_empty());
        assert_eq!(reducer.phase, Phase::Listening);
        assert!(reducer.ingest(submission("e1", 1, "a")));
    }

    #[tokio::test]
    async fn task_publishes_deduplicated_invoices() {
        let (handle, task) = spawn(None);
        assert_eq!(handle.phase(), Phase::Idle);
        handle.set_field_map(field_map()).await.unwrap();
        handle.subscribed().await.unwrap();
        handle.push(submission("e1", 1, "Acme")).await.unwrap();
        handle.push(submission("e1", 1, "Acme")).await.unwrap();
        handle.push(submission("e2", 2, "Beta")).await.unwrap();

        let mut rx = handle.watch_invoices();
        let invoices = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|v| v.len() == 2))
            .await
            .unwrap()
            .unwrap()
            .clone();
        assert_eq!(invoices[0].client_name, "Beta");
        assert_eq!(invoices[1].invoice_number, "e1");

        handle.reset().await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|v| v.is_empty()))
            .await
            .unwrap()
            .unwrap();

        handle.close().await;
        task.await.unwrap();
        assert_eq!(handle.phase(), Phase::Closed);
        assert!(handle.push(submission("e3", 3, "c")).await.is_err());
    }
}
