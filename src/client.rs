//! A single outbound/inbound peer connection (component C4).
//!
//! Grounded in `original_source/src/tno/mpc/communication/httphandlers.py`'s
//! `HTTPClient`: one handler per peer, holding both the means to send to it
//! (an HTTP client carrying the `server_port` identity cookie) and the
//! rendezvous buffer messages from it are delivered into.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{oneshot, Mutex};
use tracing::{info, warn};

use crate::codec::{self, Options};
use crate::error::{CommError, Result};
use crate::message::{Envelope, MessageId};
use crate::value::Value;

/// An inbound message slot: either already delivered and waiting to be
/// collected, or awaited by a `recv` call already in flight.
enum Slot {
    Ready(Value),
    Pending(oneshot::Sender<Value>),
}

/// A receive whose buffer slot has already been claimed (or found already
/// resolved), but whose value has not yet been awaited.
///
/// This is what `arecv` hands back: the eager half of `recv` split out so a
/// caller can register a receive and keep going, awaiting delivery later —
/// matching `HTTPClient.recv` returning a `Future` the Python caller need not
/// `await` immediately (spec.md §4.5's `arecv`/`arecv_all`).
pub enum PendingRecv {
    /// The value had already arrived when the slot was claimed.
    Ready(Value),
    /// No value had arrived yet; this resolves when the matching `deliver`
    /// call completes it.
    Waiting(oneshot::Receiver<Value>),
}

impl PendingRecv {
    /// Awaits delivery, returning the raw structural value.
    pub async fn await_value(self) -> Result<Value> {
        match self {
            PendingRecv::Ready(v) => Ok(v),
            PendingRecv::Waiting(rx) => rx.await.map_err(|_| CommError::ShutDown),
        }
    }
}

/// Handle to one peer: how to reach it, and where its replies land.
///
/// Equality is by `(addr, port)`, matching `HTTPClient.__eq__` in the Python
/// source — two handlers addressing the same socket are interchangeable
/// even if registered under different names.
pub struct ClientHandler {
    /// The name this peer is registered under in the owning pool.
    pub name: String,
    addr: IpAddr,
    port: u16,
    base_url: reqwest::Url,
    http: reqwest::Client,
    retry_delay: Duration,
    max_retries: i64,
    /// Prefix applied to every id this handler sends or receives under.
    prefix: Mutex<Option<String>>,
    inbound: Mutex<HashMap<MessageId, Slot>>,
    next_send_id: AtomicU64,
    next_recv_id: AtomicU64,
    sent_count: AtomicU64,
    received_count: AtomicU64,
    bytes_sent: AtomicU64,
    shut_down: std::sync::atomic::AtomicBool,
}

impl PartialEq for ClientHandler {
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr && self.port == other.port
    }
}

impl ClientHandler {
    /// Builds a handler addressing `addr:port`.
    ///
    /// `http` must already be configured by the caller (see
    /// `pool::build_http_client`) with a cookie jar seeding the
    /// `server_port` identity cookie every request carries, matching
    /// `HTTPClient.__init__`'s `_create_client_session`. Construction
    /// requires the owning pool to already have a server (enforced by the
    /// caller, `Pool::add_client`, per spec.md §4.3) so the handler can
    /// advertise its own listening port via that cookie.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: String,
        addr: IpAddr,
        port: u16,
        base_url: reqwest::Url,
        http: reqwest::Client,
        retry_delay: Duration,
        max_retries: i64,
    ) -> Self {
        Self {
            name,
            addr,
            port,
            base_url,
            http,
            retry_delay,
            max_retries,
            prefix: Mutex::new(None),
            inbound: Mutex::new(HashMap::new()),
            next_send_id: AtomicU64::new(0),
            next_recv_id: AtomicU64::new(0),
            sent_count: AtomicU64::new(0),
            received_count: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            shut_down: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// The remote address this handler is addressed by.
    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    /// The remote port this handler is addressed by.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Total bytes successfully posted to this peer.
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::SeqCst)
    }

    /// Number of messages sent to this peer.
    pub fn sent_count(&self) -> u64 {
        self.sent_count.load(Ordering::SeqCst)
    }

    /// Number of messages delivered from this peer.
    pub fn received_count(&self) -> u64 {
        self.received_count.load(Ordering::SeqCst)
    }

    /// Sets the id prefix used when this handler assigns an id itself and
    /// when it prefixes a caller-supplied id. Matches `Pool.update_msg_prefix`
    /// setting `handler.msg_prefix` directly.
    pub async fn set_prefix(&self, prefix: Option<String>) {
        *self.prefix.lock().await = prefix;
    }

    /// The prefix currently set on this handler.
    pub async fn prefix(&self) -> Option<String> {
        self.prefix.lock().await.clone()
    }

    /// Sends `value` under `id`, retrying transient failures.
    ///
    /// Mirrors `HTTPClient.send`/`_send`: packs once, then resends the same
    /// bytes on every retry rather than re-serializing.
    pub async fn send<T: serde::Serialize + std::any::Any>(
        &self,
        registry: &codec::CodecRegistry,
        id: Option<MessageId>,
        value: &T,
        options: &Options,
    ) -> Result<()> {
        let id = self.resolve_send_id(id).await;
        let object = registry.to_value(value, options)?;
        let envelope = Envelope { object, id: id.clone() };
        let bytes = codec::pack(envelope).await?;
        self.send_bytes(bytes).await
    }

    /// Assigns the next send id (the current counter value, prefixed) when
    /// `id` is absent, else applies the prefix to the caller's id.
    pub async fn resolve_send_id(&self, id: Option<MessageId>) -> MessageId {
        let prefix = self.prefix().await;
        let id = id.unwrap_or_else(|| MessageId::Int(self.next_send_id.fetch_add(1, Ordering::SeqCst)));
        id.apply_prefix(prefix.as_deref())
    }

    /// Bumps the send-side id counter without assigning or sending anything.
    ///
    /// Matches `Pool._preprocess_broadcast`'s unconditional
    /// `handler.msg_send_counter += 1` (pool.py:244-246): every handler
    /// selected for a broadcast advances its send counter once during
    /// preprocessing, regardless of whether packing or transmission later
    /// succeeds.
    pub fn note_broadcast_send(&self) {
        self.next_send_id.fetch_add(1, Ordering::SeqCst);
    }

    /// Sends already-packed bytes, applying the retry policy.
    ///
    /// Retries resend the same bytes rather than re-serializing, per
    /// spec.md §9.
    pub async fn send_bytes(&self, bytes: Vec<u8>) -> Result<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(CommError::ShutDown);
        }
        // Retries require both a positive delay and a non-zero budget, per
        // spec.md §4.3/§9; `max_retries < 0` means unbounded.
        let may_retry = !self.retry_delay.is_zero() && self.max_retries != 0;
        let mut attempts: i64 = 0;
        loop {
            let result = self.http.post(self.base_url.clone()).body(bytes.clone()).send().await;

            let give_up = !may_retry || (self.max_retries >= 0 && attempts >= self.max_retries);

            match result {
                Ok(resp) if resp.status().is_success() => {
                    self.bytes_sent.fetch_add(bytes.len() as u64, Ordering::SeqCst);
                    self.sent_count.fetch_add(1, Ordering::SeqCst);
                    return Ok(());
                }
                Ok(resp) => {
                    warn!(peer = %self.name, status = %resp.status(), "peer rejected message");
                    if give_up {
                        return Err(CommError::Rejected(format!(
                            "peer {} rejected message with status {}",
                            self.name,
                            resp.status()
                        )));
                    }
                }
                Err(e) => {
                    warn!(peer = %self.name, error = %e, "transient transport error");
                    if give_up {
                        return Err(CommError::TransientTransportError { peer: self.name.clone(), source: e });
                    }
                }
            }
            attempts += 1;
            tokio::time::sleep(self.retry_delay).await;
        }
    }

    /// Waits for the value registered under `id` to arrive, or returns it
    /// immediately if it already has.
    pub async fn recv<T: serde::de::DeserializeOwned + std::any::Any>(
        &self,
        registry: &codec::CodecRegistry,
        id: Option<MessageId>,
        options: &Options,
    ) -> Result<T> {
        let value = self.recv_value(id).await?;
        registry.from_value(value, options)
    }

    /// Like [`ClientHandler::recv`] but returns the raw structural [`Value`]
    /// without decoding it into a concrete type.
    ///
    /// Claims the buffer slot via [`ClientHandler::arecv_value`], then
    /// awaits it, matching `HTTPClient.recv` end to end.
    pub async fn recv_value(&self, id: Option<MessageId>) -> Result<Value> {
        self.arecv_value(id).await?.await_value().await
    }

    /// Assigns the next receive-counter id (prefixed) when `id` is absent,
    /// and synchronously claims the buffer slot for `id`: resolves
    /// immediately if a value already arrived, else installs a pending slot
    /// and hands back a [`PendingRecv`] the caller can await whenever it
    /// likes. This is the eager half `arecv`/`arecv_all` need — spec.md
    /// §4.5 requires the slot to be registered at call time, not merely
    /// when the returned future is eventually awaited.
    pub async fn arecv_value(&self, id: Option<MessageId>) -> Result<PendingRecv> {
        let prefix = self.prefix().await;
        let id = id.unwrap_or_else(|| MessageId::Int(self.next_recv_id.fetch_add(1, Ordering::SeqCst)));
        let id = id.apply_prefix(prefix.as_deref());

        let mut buf = self.inbound.lock().await;
        match buf.remove(&id) {
            Some(Slot::Ready(v)) => Ok(PendingRecv::Ready(v)),
            Some(pending @ Slot::Pending(_)) => {
                buf.insert(id.clone(), pending);
                Err(CommError::Rejected(format!("id {id} already has a pending receiver")))
            }
            None => {
                let (tx, rx) = oneshot::channel();
                buf.insert(id.clone(), Slot::Pending(tx));
                Ok(PendingRecv::Waiting(rx))
            }
        }
    }

    /// Delivers a value received from this peer by the server endpoint.
    ///
    /// Matches the Python buffer semantics: if a `recv` is already waiting,
    /// wake it; otherwise stash the value for a future `recv` to collect. A
    /// second delivery landing on an id whose prior value was never
    /// consumed is dropped and logged as [`CommError::IdReuse`] — the first
    /// value is retained, the second is discarded — mirroring the
    /// `AttributeError` the Python source raises (and never recovers the
    /// incoming value from) when `.pop` on the buffer returns a plain value
    /// instead of a `Future`.
    pub async fn deliver(&self, id: MessageId, value: Value) {
        self.received_count.fetch_add(1, Ordering::SeqCst);
        let mut buf = self.inbound.lock().await;
        match buf.remove(&id) {
            Some(Slot::Pending(tx)) => {
                let _ = tx.send(value);
            }
            Some(ready @ Slot::Ready(_)) => {
                warn!(peer = %self.name, %id, "{}", CommError::IdReuse(id.clone()));
                buf.insert(id, ready);
            }
            None => {
                buf.insert(id, Slot::Ready(value));
            }
        }
    }

    /// Marks this handler as shut down; further sends fail immediately.
    /// Logs aggregate counters, matching `HTTPClient.shutdown`.
    pub async fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        self.inbound.lock().await.clear();
        info!(
            peer = %self.name,
            bytes_sent = self.bytes_sent(),
            sent_count = self.sent_count(),
            "client handler shut down",
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn handler(name: &str) -> ClientHandler {
        ClientHandler::new(
            name.into(),
            IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            1,
            reqwest::Url::parse("http://127.0.0.1:1").unwrap(),
            reqwest::Client::new(),
            Duration::from_millis(1),
            0,
        )
    }

    #[tokio::test]
    async fn deliver_then_recv_returns_immediately() {
        let client = handler("alice");
        client.deliver(MessageId::Int(1), Value::Int(42)).await;
        let v = client.recv_value(Some(MessageId::Int(1))).await.unwrap();
        assert_eq!(v, Value::Int(42));
    }

    #[tokio::test]
    async fn recv_then_deliver_wakes_the_waiter() {
        let client = std::sync::Arc::new(handler("alice"));
        let waiter = {
            let client = client.clone();
            tokio::spawn(async move { client.recv_value(Some(MessageId::Str("r".into()))).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        client.deliver(MessageId::Str("r".into()), Value::Bool(true)).await;
        let v = waiter.await.unwrap().unwrap();
        assert_eq!(v, Value::Bool(true));
    }

    #[tokio::test]
    async fn second_delivery_before_consumption_is_dropped_as_id_reuse() {
        let client = handler("alice");
        client.deliver(MessageId::Int(5), Value::Int(1)).await;
        client.deliver(MessageId::Int(5), Value::Int(2)).await;
        let v = client.recv_value(Some(MessageId::Int(5))).await.unwrap();
        assert_eq!(v, Value::Int(1));
    }

    #[tokio::test]
    async fn arecv_value_installs_the_slot_before_its_future_is_awaited() {
        let client = handler("alice");
        // Claim the slot first...
        let pending = client.arecv_value(Some(MessageId::Int(9))).await.unwrap();
        // ...then a delivery lands before anyone awaits the returned future.
        client.deliver(MessageId::Int(9), Value::Int(99)).await;
        let v = pending.await_value().await.unwrap();
        assert_eq!(v, Value::Int(99));
    }

    #[tokio::test]
    async fn recv_without_id_uses_auto_incrementing_counter_with_prefix() {
        let client = handler("alice");
        client.set_prefix(Some("round-".into())).await;
        client.deliver(MessageId::Str("round-0".into()), Value::Int(7)).await;
        let v = client.recv_value(None).await.unwrap();
        assert_eq!(v, Value::Int(7));
    }

    #[test]
    fn equality_is_by_address_and_port() {
        let a = handler("alice");
        let mut b = handler("bob-alias");
        assert_eq!(a, b);
        b.port = 2;
        assert_ne!(a, b);
    }
}
