//! Relay transport: subscription filters, the `Transport` seam and a
//! WebSocket relay pool speaking NIP-01.

use std::{
    collections::{BTreeMap, HashSet},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use futures_util::{future::join_all, SinkExt, StreamExt};
use serde_json::{json, Map, Value};
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_socks::tcp::Socks5Stream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{client_async_tls, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use crate::event::{self, Event};

/// How long `publish` waits for a relay's `OK`.
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(10);

/// NIP-01 subscription filter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub authors: Vec<String>,
    pub kinds: Vec<u32>,
    /// Single-letter tag filters keyed without the `#` prefix.
    pub tags: BTreeMap<String, Vec<String>>,
    pub since: Option<u64>,
    pub limit: Option<u32>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(mut self, kind: u32) -> Self {
        self.kinds.push(kind);
        self
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.authors.push(author.into());
        self
    }

    pub fn authors<I, S>(mut self, authors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authors.extend(authors.into_iter().map(Into::into));
        self
    }

    pub fn tag(mut self, name: &str, value: impl Into<String>) -> Self {
        let name = name.trim_start_matches('#').to_string();
        self.tags.entry(name).or_default().push(value.into());
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// JSON object sent in `REQ` messages.
    pub fn to_json(&self) -> Map<String, Value> {
        let mut map = Map::new();
        if !self.authors.is_empty() {
            map.insert("authors".into(), json!(self.authors));
        }
        if !self.kinds.is_empty() {
            map.insert("kinds".into(), json!(self.kinds));
        }
        for (tag, values) in &self.tags {
            if values.is_empty() {
                continue;
            }
            map.insert(format!("#{tag}"), json!(values));
        }
        if let Some(since) = self.since {
            map.insert("since".into(), json!(since));
        }
        if let Some(limit) = self.limit {
            map.insert("limit".into(), json!(limit));
        }
        map
    }

    /// Whether `ev` satisfies every constraint of the filter.
    pub fn matches(&self, ev: &Event) -> bool {
        if !self.kinds.is_empty() && !self.kinds.contains(&ev.kind) {
            return false;
        }
        if !self.authors.is_empty() && !self.authors.iter().any(|a| a == &ev.pubkey) {
            return false;
        }
        if let Some(since) = self.since {
            if ev.created_at < since {
                return false;
            }
        }
        self.tags.iter().all(|(name, values)| {
            values.is_empty()
                || ev
                    .tags_named(name)
                    .filter_map(|t| t.get(1))
                    .any(|v| values.iter().any(|want| want == v))
        })
    }
}

/// Unique subscription id derived from the filter.
pub fn subscription_id(filter: &Filter) -> String {
    static SEQ: AtomicU64 = AtomicU64::new(0);
    let mut hasher = Sha1::new();
    hasher.update(Value::Object(filter.to_json()).to_string().as_bytes());
    let hash = hex::encode(hasher.finalize());
    let seq = SEQ.fetch_add(1, Ordering::Relaxed);
    format!("invoicr-{}-{seq}", &hash[..8])
}

/// Resolves once `shutdown` carries `true` or its sender is gone.
pub async fn closed(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Live stream of events for one filter.
///
/// Sources hold receivers of the shutdown channel; closing or dropping the
/// subscription stops them.
pub struct Subscription {
    rx: mpsc::Receiver<Event>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Subscription {
    pub fn new(rx: mpsc::Receiver<Event>, shutdown_tx: watch::Sender<bool>) -> Self {
        let shutdown_rx = shutdown_tx.subscribe();
        Subscription {
            rx,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Next event, or `None` once closed or every source has ended.
    pub async fn next(&mut self) -> Option<Event> {
        if *self.shutdown_rx.borrow() {
            return None;
        }
        tokio::select! {
            biased;
            _ = closed(&mut self.shutdown_rx) => None,
            ev = self.rx.recv() => ev,
        }
    }

    pub fn close(&self) {
        self.shutdown_tx.send_replace(true);
    }
}

/// Access to the relay network.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a subscription; `relay_hints` are queried in addition to the
    /// configured relays.
    async fn subscribe(&self, filter: Filter, relay_hints: &[String]) -> Result<Subscription>;

    /// Broadcast an event; returns the number of relays that accepted it.
    async fn publish(&self, ev: &Event) -> Result<usize>;
}

/// Messages received from a relay.
#[derive(Debug, PartialEq)]
enum RelayMessage {
    Event { sub: String, event: Box<Event> },
    Eose(String),
    Closed { sub: String, reason: String },
    Notice(String),
    Ok { id: String, accepted: bool, reason: String },
}

impl RelayMessage {
    fn parse(txt: &str) -> Option<Self> {
        let val: Value = serde_json::from_str(txt).ok()?;
        let arr = val.as_array()?;
        let text = |idx: usize| arr.get(idx).and_then(Value::as_str).map(str::to_string);
        match arr.first()?.as_str()? {
            "EVENT" => Some(RelayMessage::Event {
                sub: text(1)?,
                event: Box::new(serde_json::from_value(arr.get(2)?.clone()).ok()?),
            }),
            "EOSE" => Some(RelayMessage::Eose(text(1)?)),
            "CLOSED" => Some(RelayMessage::Closed {
                sub: text(1)?,
                reason: text(2).unwrap_or_default(),
            }),
            "NOTICE" => Some(RelayMessage::Notice(text(1).unwrap_or_default())),
            "OK" => Some(RelayMessage::Ok {
                id: text(1)?,
                accepted: arr.get(2)?.as_bool()?,
                reason: text(3).unwrap_or_default(),
            }),
            _ => None,
        }
    }
}

/// WebSocket connections to a set of relays.
#[derive(Debug, Clone)]
pub struct RelayPool {
    relays: Vec<String>,
    tor_socks: Option<String>,
    verify_sig: bool,
}

impl RelayPool {
    pub fn new(relays: Vec<String>, tor_socks: Option<String>) -> Self {
        RelayPool {
            relays,
            tor_socks,
            verify_sig: false,
        }
    }

    /// Drop events whose id or Schnorr signature does not check out.
    pub fn verify_signatures(mut self, on: bool) -> Self {
        self.verify_sig = on;
        self
    }

    fn targets(&self, hints: &[String]) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for url in self.relays.iter().chain(hints) {
            if !out.contains(url) {
                out.push(url.clone());
            }
        }
        out
    }
}

#[async_trait]
impl Transport for RelayPool {
    async fn subscribe(&self, filter: Filter, relay_hints: &[String]) -> Result<Subscription> {
        let targets = self.targets(relay_hints);
        if targets.is_empty() {
            bail!("no relays configured");
        }
        let (tx, rx) = mpsc::channel(1024);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let seen = Arc::new(Mutex::new(HashSet::new()));
        let sub_id = subscription_id(&filter);
        for url in targets {
            let stream = RelayStream {
                url,
                tor_socks: self.tor_socks.clone(),
                sub_id: sub_id.clone(),
                filter: filter.clone(),
                verify_sig: self.verify_sig,
                seen: seen.clone(),
            };
            let tx = tx.clone();
            let shutdown = shutdown_rx.clone();
            tokio::spawn(async move {
                if let Err(e) = stream.run(&tx, shutdown).await {
                    warn!(relay = %stream.url, "subscription error: {e}");
                }
            });
        }
        Ok(Subscription::new(rx, shutdown_tx))
    }

    async fn publish(&self, ev: &Event) -> Result<usize> {
        if self.relays.is_empty() {
            bail!("no relays configured");
        }
        let sends = self
            .relays
            .iter()
            .map(|url| publish_to(url, self.tor_socks.as_deref(), ev));
        let results = join_all(sends).await;
        let mut accepted = 0;
        for (url, res) in self.relays.iter().zip(results) {
            match res {
                Ok(true) => accepted += 1,
                Ok(false) => {}
                Err(e) => warn!(relay = %url, "publish failed: {e}"),
            }
        }
        info!(event = %ev.id, accepted, relays = self.relays.len(), "published");
        Ok(accepted)
    }
}

/// One relay's share of a pool subscription.
struct RelayStream {
    url: String,
    tor_socks: Option<String>,
    sub_id: String,
    filter: Filter,
    verify_sig: bool,
    seen: Arc<Mutex<HashSet<String>>>,
}

impl RelayStream {
    /// Issue the `REQ` and forward matching events until shutdown or the
    /// relay hangs up. Shutdown sends `CLOSE`.
    async fn run(
        &self,
        tx: &mpsc::Sender<Event>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let mut ws = tokio::select! {
            _ = closed(&mut shutdown) => return Ok(()),
            ws = connect_ws(&self.url, self.tor_socks.as_deref()) => ws?,
        };
        let req = json!(["REQ", self.sub_id, self.filter.to_json()]);
        ws.send(Message::Text(req.to_string())).await?;
        debug!(relay = %self.url, sub = %self.sub_id, "subscribed");

        loop {
            let msg = tokio::select! {
                _ = closed(&mut shutdown) => {
                    let close = json!(["CLOSE", self.sub_id]);
                    let _ = ws.send(Message::Text(close.to_string())).await;
                    let _ = ws.close(None).await;
                    return Ok(());
                }
                msg = ws.next() => msg,
            };
            let Some(msg) = msg else {
                return Ok(());
            };
            match msg? {
                Message::Text(txt) => match RelayMessage::parse(&txt) {
                    Some(RelayMessage::Event { sub, event }) if sub == self.sub_id => {
                        if !self.accept(&event) {
                            continue;
                        }
                        if tx.send(*event).await.is_err() {
                            return Ok(());
                        }
                    }
                    Some(RelayMessage::Eose(sub)) if sub == self.sub_id => {
                        debug!(relay = %self.url, "end of stored events");
                    }
                    Some(RelayMessage::Closed { sub, reason }) if sub == self.sub_id => {
                        warn!(relay = %self.url, "subscription closed by relay: {reason}");
                        return Ok(());
                    }
                    Some(RelayMessage::Notice(notice)) => {
                        info!(relay = %self.url, "notice: {notice}");
                    }
                    _ => {}
                },
                Message::Close(_) => return Ok(()),
                _ => {}
            }
        }
    }

    fn accept(&self, ev: &Event) -> bool {
        if !self.filter.matches(ev) {
            debug!(relay = %self.url, event = %ev.id, "event outside filter");
            return false;
        }
        if self.verify_sig {
            if let Err(e) = event::verify(ev) {
                warn!(relay = %self.url, event = %ev.id, "bad signature: {e}");
                return false;
            }
        }
        match self.seen.lock() {
            Ok(mut seen) => seen.insert(ev.id.clone()),
            Err(_) => true,
        }
    }
}

/// Send one event and wait for the relay's verdict.
async fn publish_to(url: &str, tor_socks: Option<&str>, ev: &Event) -> Result<bool> {
    let mut ws = connect_ws(url, tor_socks).await?;
    ws.send(Message::Text(json!(["EVENT", ev]).to_string()))
        .await?;
    let (accepted, reason) =
        tokio::time::timeout(PUBLISH_TIMEOUT, await_ok(&mut ws, &ev.id)).await??;
    let _ = ws.close(None).await;
    if !accepted {
        warn!(relay = %url, event = %ev.id, "event rejected: {reason}");
    }
    Ok(accepted)
}

async fn await_ok<S>(ws: &mut WebSocketStream<S>, id: &str) -> Result<(bool, String)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(msg) = ws.next().await {
        if let Message::Text(txt) = msg? {
            if let Some(RelayMessage::Ok {
                id: acked,
                accepted,
                reason,
            }) = RelayMessage::parse(&txt)
            {
                if acked == id {
                    return Ok((accepted, reason));
                }
            }
        }
    }
    Err(anyhow!("connection closed before OK"))
}

type RelaySocket = WebSocketStream<MaybeTlsStream<Box<dyn AsyncReadWrite + Unpin + Send>>>;

/// Establish a WebSocket connection, optionally via a SOCKS5 proxy.
/// `wss://` relays get a TLS session on top of the TCP or SOCKS stream.
async fn connect_ws(relay: &str, tor_socks: Option<&str>) -> Result<RelaySocket> {
    let url = Url::parse(relay)?;
    let host = url.host_str().ok_or_else(|| anyhow!("missing host"))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| anyhow!("missing port"))?;
    let req = relay.into_client_request()?;
    let stream: Box<dyn AsyncReadWrite + Unpin + Send> = if let Some(proxy) = tor_socks {
        Box::new(Socks5Stream::connect(proxy, (host, port)).await?)
    } else {
        Box::new(TcpStream::connect((host, port)).await?)
    };
    let (ws, _) = client_async_tls(req, stream).await?;
    Ok(ws)
}

/// Blanket trait for boxed async read/write streams.
trait AsyncReadWrite: AsyncRead + AsyncWrite {}
impl<T: AsyncRead + AsyncWrite> AsyncReadWrite for T {}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Tag, FORM_KIND, RESPONSE_KIND};
    use secp256k1::{Keypair, Secp256k1};
    use tokio::net::TcpListener;
    use tokio_tungstenite::{accept_async, tungstenite::Message as TMsg};

    fn submission(id: &str, kind: u32) -> Event {
        Event {
            id: id.into(),
            pubkey: "p".into(),
            kind,
            created_at: 10,
            tags: vec![Tag::new(["a", "30168:owner:invoice"])],
            content: String::new(),
            sig: String::new(),
        }
    }

    fn submissions_filter() -> Filter {
        Filter::new()
            .kind(RESPONSE_KIND)
            .tag("#a", "30168:owner:invoice")
    }

    #[test]
    fn filter_json_shape() {
        let filter = Filter::new()
            .kind(FORM_KIND)
            .author("owner")
            .tag("d", "invoice")
            .limit(1);
        let json = Value::Object(filter.to_json());
        assert_eq!(
            json,
            json!({"kinds": [30168], "authors": ["owner"], "#d": ["invoice"], "limit": 1})
        );
        assert!(Filter::new().to_json().is_empty());
    }

    #[test]
    fn filter_matching() {
        let filter = submissions_filter();
        assert!(filter.matches(&submission("e1", RESPONSE_KIND)));
        assert!(!filter.matches(&submission("e1", 1)));
        let mut other_form = submission("e2", RESPONSE_KIND);
        other_form.tags = vec![Tag::new(["a", "30168:owner:other"])];
        assert!(!filter.matches(&other_form));
        assert!(!filter.clone().author("someone").matches(&submission("e3", RESPONSE_KIND)));
        let mut late = filter;
        late.since = Some(11);
        assert!(!late.matches(&submission("e4", RESPONSE_KIND)));
    }

    #[test]
    fn subscription_ids_are_unique() {
        let filter = submissions_filter();
        let a = subscription_id(&filter);
        let b = subscription_id(&filter);
        assert!(a.starts_with("invoicr-"));
        assert_ne!(a, b);
    }

    #[test]
    fn parses_relay_messages() {
        let ev = submission("e1", RESPONSE_KIND);
        let txt = json!(["EVENT", "s", ev]).to_string();
        assert_eq!(
            RelayMessage::parse(&txt),
            Some(RelayMessage::Event {
                sub: "s".into(),
                event: Box::new(ev)
            })
        );
        assert_eq!(
            RelayMessage::parse(r#"["OK","e1",false,"blocked"]"#),
            Some(RelayMessage::Ok {
                id: "e1".into(),
                accepted: false,
                reason: "blocked".into()
            })
        );
        assert_eq!(
            RelayMessage::parse(r#"["EOSE","s"]"#),
            Some(RelayMessage::Eose("s".into()))
        );
        assert_eq!(RelayMessage::parse(r#"["AUTH","x"]"#), None);
        assert_eq!(RelayMessage::parse("not json"), None);
    }

    /// Relay that answers one `REQ` with `events`, then waits for `CLOSE`.
    async fn spawn_relay(events: Vec<Event>) -> (String, tokio::task::JoinHandle<bool>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let Some(Ok(TMsg::Text(req))) = ws.next().await else {
                return false;
            };
            let req: Value = serde_json::from_str(&req).unwrap();
            assert_eq!(req[0], "REQ");
            let sub = req[1].as_str().unwrap().to_string();
            for ev in events {
                ws.send(TMsg::Text(json!(["EVENT", sub, ev]).to_string()))
                    .await
                    .unwrap();
            }
            ws.send(TMsg::Text(json!(["EOSE", sub]).to_string()))
                .await
                .unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                if let TMsg::Text(txt) = msg {
                    if txt == json!(["CLOSE", sub]).to_string() {
                        return true;
                    }
                }
            }
            false
        });
        (format!("ws://{addr}"), server)
    }

    #[tokio::test]
    async fn pool_streams_matching_events_and_closes() {
        let (url, server) = spawn_relay(vec![
            submission("e1", 1),
            submission("e2", RESPONSE_KIND),
            submission("e2", RESPONSE_KIND),
        ])
        .await;
        let pool = RelayPool::new(vec![url], None);
        let mut sub = pool.subscribe(submissions_filter(), &[]).await.unwrap();
        let ev = sub.next().await.unwrap();
        assert_eq!(ev.id, "e2");
        sub.close();
        assert!(sub.next().await.is_none());
        assert!(server.await.unwrap());
    }

    #[tokio::test]
    async fn pool_queries_relay_hints() {
        let (url, server) = spawn_relay(vec![submission("e1", RESPONSE_KIND)]).await;
        let pool = RelayPool::new(vec![], None);
        let mut sub = pool
            .subscribe(submissions_filter(), &[url.clone(), url])
            .await
            .unwrap();
        assert_eq!(sub.next().await.unwrap().id, "e1");
        drop(sub);
        assert!(server.await.unwrap());
    }

    #[tokio::test]
    async fn pool_rejects_unsigned_events_when_verifying() {
        let secp = Secp256k1::new();
        let keys = Keypair::from_seckey_slice(&secp, &[3u8; 32]).unwrap();
        let signed = event::sign(
            &keys,
            RESPONSE_KIND,
            10,
            vec![Tag::new(["a", "30168:owner:invoice"])],
            String::new(),
        )
        .unwrap();
        let (url, server) =
            spawn_relay(vec![submission("forged", RESPONSE_KIND), signed.clone()]).await;
        let pool = RelayPool::new(vec![url], None).verify_signatures(true);
        let mut sub = pool.subscribe(submissions_filter(), &[]).await.unwrap();
        assert_eq!(sub.next().await.unwrap(), signed);
        sub.close();
        assert!(server.await.unwrap());
    }

    #[tokio::test]
    async fn publish_counts_accepting_relays() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            if let Some(Ok(TMsg::Text(txt))) = ws.next().await {
                let msg: Value = serde_json::from_str(&txt).unwrap();
                assert_eq!(msg[0], "EVENT");
                let id = msg[1]["id"].clone();
                ws.send(TMsg::Text(json!(["OK", id, true, ""]).to_string()))
                    .await
                    .unwrap();
            }
        });
        let pool = RelayPool::new(vec![format!("ws://{addr}"), "ws://127.0.0.1:9".into()], None);
        let accepted = pool.publish(&submission("e1", FORM_KIND)).await.unwrap();
        assert_eq!(accepted, 1);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn empty_pool_is_an_error() {
        let pool = RelayPool::new(vec![], None);
        assert!(pool.subscribe(Filter::new(), &[]).await.is_err());
        assert!(pool.publish(&submission("e1", 1)).await.is_err());
    }

    async fn spawn_socks_proxy(target: std::net::SocketAddr) -> std::net::SocketAddr {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut inbound, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 2];
            inbound.read_exact(&mut buf).await.unwrap();
            let mut methods = vec![0u8; buf[1] as usize];
            inbound.read_exact(&mut methods).await.unwrap();
            inbound.write_all(&[0x05, 0x00]).await.unwrap();

            let mut req = [0u8; 4];
            inbound.read_exact(&mut req).await.unwrap();
            match req[3] {
                0x01 => {
                    let mut _addr = [0u8; 4];
                    inbound.read_exact(&mut _addr).await.unwrap();
                }
                0x03 => {
                    let mut len = [0u8; 1];
                    inbound.read_exact(&mut len).await.unwrap();
                    let mut name = vec![0u8; len[0] as usize];
                    inbound.read_exact(&mut name).await.unwrap();
                }
                0x04 => {
                    let mut _addr = [0u8; 16];
                    inbound.read_exact(&mut _addr).await.unwrap();
                }
                _ => {}
            }
            let mut _port = [0u8; 2];
            inbound.read_exact(&mut _port).await.unwrap();
            let mut outbound = tokio::net::TcpStream::connect(target).await.unwrap();
            inbound
                .write_all(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
                .await
                .unwrap();
            tokio::io::copy_bidirectional(&mut inbound, &mut outbound)
                .await
                .ok();
        });
        addr
    }

    #[tokio::test]
    async fn pool_via_socks_proxy() {
        let (url, server) = spawn_relay(vec![submission("e1", RESPONSE_KIND)]).await;
        let target: std::net::SocketAddr = url.trim_start_matches("ws://").parse().unwrap();
        let proxy = spawn_socks_proxy(target).await;
        let pool = RelayPool::new(vec![url], Some(proxy.to_string()));
        let mut sub = pool.subscribe(submissions_filter(), &[]).await.unwrap();
        assert_eq!(sub.next().await.unwrap().id, "e1");
        sub.close();
        assert!(server.await.unwrap());
    }

    #[tokio::test]
    async fn secure_relay_url_starts_tls_handshake() {
        use tokio::io::AsyncReadExt;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut inbound, _) = listener.accept().await.unwrap();
            let mut first = [0u8; 1];
            inbound.read_exact(&mut first).await.unwrap();
            first[0]
        });
        let url = format!("wss://localhost:{port}");
        let connect = tokio::spawn(async move { connect_ws(&url, None).await.is_ok() });
        // 0x16 is the TLS handshake record type, a plain upgrade starts with "GET "
        assert_eq!(server.await.unwrap(), 0x16);
        assert!(!connect.await.unwrap());
    }

    #[tokio::test]
    async fn memory_relay_delivers_backlog_then_live() {
        let relay = memory::MemoryRelay::new();
        relay.insert(submission("e1", RESPONSE_KIND));
        relay.insert(submission("x", 1));
        let mut sub = relay.subscribe(submissions_filter(), &[]).await.unwrap();
        assert_eq!(sub.next().await.unwrap().id, "e1");
        relay.publish(&submission("e2", RESPONSE_KIND)).await.unwrap();
        assert_eq!(sub.next().await.unwrap().id, "e2");
        assert_eq!(relay.stored().len(), 3);
    }
}
