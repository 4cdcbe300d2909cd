//! The top-level communication pool: one server, N-1 client handlers, and
//! the send/receive/broadcast API applications call (component C5).
//!
//! Grounded in `original_source/src/tno/mpc/communication/pool.py`'s `Pool`
//! class: `add_http_server`/`add_http_client` build the server and client
//! handlers lazily with the same TLS-context and default-port rules,
//! `_preprocess_broadcast` resolves handlers/prefix/fallback once before a
//! single `Serialization.pack` call, and `shutdown` sums counters before
//! clearing both handler tables.

use std::any::Any;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::RwLock as AsyncRwLock;
use tracing::{info, warn};

use crate::client::{ClientHandler, PendingRecv};
use crate::codec::{CodecRegistry, Options};
use crate::error::{CommError, Result};
use crate::identity::PeerIdentity;
use crate::message::{Envelope, MessageId};
use crate::server::Server;
use crate::tls;
use crate::value::Value;

/// A typed receive whose buffer slot has already been claimed, returned by
/// [`Pool::arecv`]. Decoding via the registry is deferred to
/// [`PendingTypedRecv::await_value`], matching `Pool.arecv`'s "register now,
/// decode on await" split from spec.md §4.5.
pub struct PendingTypedRecv<'a, T> {
    pending: PendingRecv,
    registry: &'a AsyncRwLock<CodecRegistry>,
    options: Options,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<'a, T: serde::de::DeserializeOwned + Any> PendingTypedRecv<'a, T> {
    /// Awaits delivery and decodes the result as `T`.
    pub async fn await_value(self) -> Result<T> {
        let value = self.pending.await_value().await?;
        let registry = self.registry.read().await;
        registry.from_value(value, &self.options)
    }
}

/// Shared lookup tables for a pool's registered client handlers.
///
/// Split out of [`Pool`] so the server endpoint can hold the same `Arc`
/// and resolve an incoming poster to a handler without needing a back
/// reference to the whole pool.
pub struct HandlerTable {
    by_name: RwLock<Vec<(String, Arc<ClientHandler>)>>,
    by_identity: RwLock<HashMap<String, Arc<ClientHandler>>>,
}

impl HandlerTable {
    pub(crate) fn new() -> Self {
        Self { by_name: RwLock::new(Vec::new()), by_identity: RwLock::new(HashMap::new()) }
    }

    /// Looks up a handler by the name it was registered under.
    pub(crate) fn by_name(&self, name: &str) -> Option<Arc<ClientHandler>> {
        self.by_name.read().unwrap().iter().find(|(n, _)| n == name).map(|(_, h)| h.clone())
    }

    /// Looks up a handler by its address- or certificate-derived identity
    /// string, matching `Pool.handlers_lookup`.
    pub(crate) fn by_identity(&self, key: &str) -> Option<Arc<ClientHandler>> {
        self.by_identity.read().unwrap().get(key).cloned()
    }

    /// All registered handlers in insertion order, matching
    /// `Pool.pool_handlers.values()`'s iteration order.
    fn all(&self) -> Vec<(String, Arc<ClientHandler>)> {
        self.by_name.read().unwrap().clone()
    }

    pub(crate) fn insert(&self, name: String, handler: Arc<ClientHandler>, identity_keys: Vec<String>) {
        self.by_name.write().unwrap().push((name, handler.clone()));
        let mut by_identity = self.by_identity.write().unwrap();
        for key in identity_keys {
            // Registering two handlers under the same identity overwrites
            // silently, per spec.md §4.5.
            by_identity.insert(key, handler.clone());
        }
    }

    fn clear(&self) {
        self.by_name.write().unwrap().clear();
        self.by_identity.write().unwrap().clear();
    }

    fn is_empty(&self) -> bool {
        self.by_name.read().unwrap().is_empty() && self.by_identity.read().unwrap().is_empty()
    }
}

/// TLS credential paths a pool was constructed with.
#[derive(Clone, Default)]
struct TlsCredentials {
    key: Option<String>,
    cert: Option<String>,
    ca_cert: Option<String>,
}

/// One participant's endpoint: an optional server and a table of client
/// handlers addressing every other participant.
pub struct Pool {
    tls: TlsCredentials,
    default_retry_delay: Duration,
    default_max_retries: i64,
    server: AsyncRwLock<Option<Arc<Server>>>,
    handlers: Arc<HandlerTable>,
    registry: AsyncRwLock<CodecRegistry>,
}

impl Pool {
    /// Builds an empty pool. `ca_cert` absent disables TLS for every server
    /// and client this pool later constructs.
    pub fn new(key: Option<String>, cert: Option<String>, ca_cert: Option<String>, retry_delay: Duration, max_retries: i64) -> Self {
        Self {
            tls: TlsCredentials { key, cert, ca_cert },
            default_retry_delay: retry_delay,
            default_max_retries: max_retries,
            server: AsyncRwLock::new(None),
            handlers: Arc::new(HandlerTable::new()),
            registry: AsyncRwLock::new(CodecRegistry::new()),
        }
    }

    /// Grants access to the codec registry for custom type registration.
    pub async fn registry(&self) -> tokio::sync::RwLockWriteGuard<'_, CodecRegistry> {
        self.registry.write().await
    }

    /// Adds this pool's server. At most one server per pool; calling this
    /// twice replaces the previous server without shutting it down first
    /// (callers should shut down explicitly, matching the Python source's
    /// lack of a guard here too).
    ///
    /// `external_port`, if given, is recorded only as the `server_port`
    /// cookie value advertised to peers (never used for binding) and emits
    /// a deprecation warning, per spec.md §9.
    pub async fn add_server(&self, addr: IpAddr, port: Option<u16>, external_port: Option<u16>) -> Result<()> {
        let tls_ctx = self.build_server_tls()?;
        let port = port.unwrap_or_else(|| if tls_ctx.is_some() { 443 } else { 80 });
        if external_port.is_some() {
            warn!(
                "`external_port` is deprecated; identify clients by TLS certificate instead of a \
                 port-forwarded address when possible",
            );
        }
        let server = Server::bind(addr, port, external_port, tls_ctx, self.handlers.clone()).await?;
        *self.server.write().await = Some(Arc::new(server));
        Ok(())
    }

    /// Registers a client handler under `name`, addressing `addr:port`.
    /// Requires a server to already be present, so the handler can
    /// advertise its own listening port via the identity cookie.
    pub async fn add_client(&self, name: &str, addr: &str, port: Option<u16>, cert_path: Option<&str>) -> Result<()> {
        let server = self.server.read().await.clone().ok_or_else(|| {
            CommError::Rejected("no server configured on this pool; call add_server first".into())
        })?;

        let tls_ctx = self.build_client_tls()?;
        let port = port.unwrap_or_else(|| if tls_ctx.is_some() { 443 } else { 80 });
        let resolved_ip = resolve_ip(addr, port).await?;

        let scheme = if tls_ctx.is_some() { "https" } else { "http" };
        let base_url = reqwest::Url::parse(&format!("{scheme}://{addr}:{port}/"))
            .map_err(|e| CommError::Rejected(format!("invalid peer address {addr}:{port}: {e}")))?;

        let http = build_http_client(&base_url, server.external_port(), tls_ctx)?;

        let handler = Arc::new(ClientHandler::new(
            name.to_string(),
            resolved_ip,
            port,
            base_url,
            http,
            self.default_retry_delay,
            self.default_max_retries,
        ));

        let mut identity_keys = vec![PeerIdentity::Address { ip: resolved_ip, advertised_port: port }.lookup_key()];
        if let Some(cert_path) = cert_path {
            let cert = tls::load_cert_chain(cert_path)?
                .into_iter()
                .next()
                .ok_or_else(|| CommError::InvalidCertificate("certificate file contained no certificate".into()))?;
            let identity = tls::peer_identity_from_cert(&cert)?;
            identity_keys.push(identity.lookup_key());
        }

        self.handlers.insert(name.to_string(), handler, identity_keys);
        Ok(())
    }

    fn build_server_tls(&self) -> Result<Option<Arc<rustls::ServerConfig>>> {
        let Some(ca_cert) = &self.tls.ca_cert else { return Ok(None) };
        let cert_chain = tls::load_cert_chain(self.tls.cert.as_deref().unwrap_or_default())?;
        let key = tls::load_private_key(self.tls.key.as_deref().unwrap_or_default())?;
        let ca_bundle = tls::load_root_store(ca_cert)?;
        Ok(Some(Arc::new(tls::server_config(cert_chain, key, &ca_bundle)?)))
    }

    fn build_client_tls(&self) -> Result<Option<Arc<rustls::ClientConfig>>> {
        let Some(ca_cert) = &self.tls.ca_cert else { return Ok(None) };
        let cert_chain = tls::load_cert_chain(self.tls.cert.as_deref().unwrap_or_default())?;
        let key = tls::load_private_key(self.tls.key.as_deref().unwrap_or_default())?;
        let ca_bundle = tls::load_root_store(ca_cert)?;
        Ok(Some(Arc::new(tls::client_config(cert_chain, key, ca_bundle)?)))
    }

    fn get_handler(&self, name: &str) -> Result<Arc<ClientHandler>> {
        self.handlers.by_name(name).ok_or_else(|| CommError::UnknownPeer(name.to_string()))
    }

    /// Sends `value` to `name`'s handler, awaiting completion (including
    /// any retries) before returning.
    pub async fn send<T: serde::Serialize + Any>(&self, name: &str, value: &T, msg_id: Option<MessageId>) -> Result<()> {
        let handler = self.get_handler(name)?;
        let registry = self.registry.read().await;
        let options = Options::default();
        handler.send(&registry, msg_id, value, &options).await
    }

    /// Dispatches the send and returns immediately; delivery failures are
    /// only logged, matching `Pool.asend`.
    pub fn asend<T: serde::Serialize + Any + Send + Sync + 'static>(self: &Arc<Self>, name: &str, value: T, msg_id: Option<MessageId>) {
        let pool = self.clone();
        let name = name.to_string();
        tokio::spawn(async move {
            if let Err(e) = pool.send(&name, &value, msg_id).await {
                warn!(peer = %name, error = %e, "async send failed");
            }
        });
    }

    /// Receives the value registered under `msg_id` from `name`'s handler,
    /// decoding it as `T` via the codec registry.
    ///
    /// Built on [`Pool::arecv`]: claims the buffer slot, then immediately
    /// awaits it, matching `Pool.recv` awaiting `Pool.arecv`'s future.
    pub async fn recv<T: serde::de::DeserializeOwned + Any>(&self, name: &str, msg_id: Option<MessageId>) -> Result<T> {
        self.arecv::<T>(name, msg_id).await?.await_value().await
    }

    /// Receives the raw structural value registered under `msg_id` from
    /// `name`'s handler, without decoding it into a concrete type.
    pub async fn recv_value(&self, name: &str, msg_id: Option<MessageId>) -> Result<Value> {
        self.arecv_value(name, msg_id).await?.await_value().await
    }

    /// Claims `name`'s buffer slot for `msg_id` without awaiting delivery,
    /// returning a handle the caller can await whenever it likes.
    ///
    /// Matches `Pool.arecv`: the slot is installed synchronously, before
    /// this call returns, so a value delivered between this call and the
    /// eventual `.await_value()` is still observed — an `async fn` that is
    /// never awaited runs none of its body, so `recv` alone cannot provide
    /// this "register now, await later" guarantee (spec.md §4.5).
    pub async fn arecv<T: serde::de::DeserializeOwned + Any>(
        &self,
        name: &str,
        msg_id: Option<MessageId>,
    ) -> Result<PendingTypedRecv<'_, T>> {
        let handler = self.get_handler(name)?;
        let options = Options { origin: Some(Arc::new(handler.clone()) as Arc<dyn Any + Send + Sync>) };
        let pending = handler.arecv_value(msg_id).await?;
        Ok(PendingTypedRecv { pending, registry: &self.registry, options, _marker: std::marker::PhantomData })
    }

    /// Like [`Pool::arecv`] but returns the raw structural [`PendingRecv`]
    /// without decoding it into a concrete type.
    pub async fn arecv_value(&self, name: &str, msg_id: Option<MessageId>) -> Result<PendingRecv> {
        let handler = self.get_handler(name)?;
        handler.arecv_value(msg_id).await
    }

    /// Receives one message from every handler in `names` (or all
    /// registered handlers, in insertion order, if absent), concurrently.
    ///
    /// Built on [`Pool::arecv_all`]: every handler's slot is claimed before
    /// any of them is awaited, matching `Pool.recv_all` awaiting
    /// `Pool.arecv_all`'s futures concurrently.
    pub async fn recv_all(&self, names: Option<&[&str]>, msg_id: Option<MessageId>) -> Result<Vec<(String, Value)>> {
        let pending = self.arecv_all(names, msg_id).await?;
        let futures = pending.into_iter().map(|(name, p)| async move {
            let value = p.await_value().await?;
            Ok::<_, CommError>((name, value))
        });
        futures::future::try_join_all(futures).await
    }

    /// Claims a buffer slot on every handler in `names` (or all registered
    /// handlers, in insertion order, if absent) without awaiting any of
    /// them, matching `Pool.arecv_all`.
    pub async fn arecv_all(
        &self,
        names: Option<&[&str]>,
        msg_id: Option<MessageId>,
    ) -> Result<Vec<(String, PendingRecv)>> {
        let targets = self.resolve_targets(names)?;
        let mut out = Vec::with_capacity(targets.len());
        for (name, handler) in targets {
            let pending = handler.arecv_value(msg_id.clone()).await?;
            out.push((name, pending));
        }
        Ok(out)
    }

    fn resolve_targets(&self, names: Option<&[&str]>) -> Result<Vec<(String, Arc<ClientHandler>)>> {
        match names {
            Some(names) => names.iter().map(|n| Ok((n.to_string(), self.get_handler(n)?))).collect(),
            None => Ok(self.handlers.all()),
        }
    }

    /// Sends `value` to every selected handler (or all handlers, if
    /// `names` is absent), packing the envelope exactly once and
    /// dispatching it to every recipient concurrently. Awaits completion.
    pub async fn broadcast<T: serde::Serialize + Any>(&self, value: &T, msg_id: MessageId, names: Option<&[&str]>) -> Result<()> {
        let (bytes, handlers) = self.prepare_broadcast(value, msg_id, names).await?;
        let sends = handlers.iter().map(|h| h.send_bytes(bytes.clone()));
        futures::future::try_join_all(sends).await?;
        Ok(())
    }

    /// Like [`Pool::broadcast`] but returns immediately; individual
    /// delivery failures are only logged.
    pub fn async_broadcast<T: serde::Serialize + Any + Send + Sync + 'static>(self: &Arc<Self>, value: T, msg_id: MessageId) {
        let pool = self.clone();
        tokio::spawn(async move {
            match pool.prepare_broadcast(&value, msg_id, None).await {
                Ok((bytes, handlers)) => {
                    for h in handlers {
                        let bytes = bytes.clone();
                        tokio::spawn(async move {
                            if let Err(e) = h.send_bytes(bytes).await {
                                warn!(peer = %h.name, error = %e, "async broadcast send failed");
                            }
                        });
                    }
                }
                Err(e) => warn!(error = %e, "async broadcast preprocessing failed"),
            }
        });
    }

    /// Resolves handlers, prefix, and fallback flag, then packs `value`
    /// exactly once, mirroring `Pool._preprocess_broadcast` followed by a
    /// single `Serialization.pack` call.
    async fn prepare_broadcast<T: serde::Serialize + Any>(
        &self,
        value: &T,
        msg_id: MessageId,
        names: Option<&[&str]>,
    ) -> Result<(Vec<u8>, Vec<Arc<ClientHandler>>)> {
        let handlers = self.resolve_targets(names)?;
        let mut prefixes = Vec::with_capacity(handlers.len());
        for (_, h) in &handlers {
            prefixes.push(h.prefix().await);
        }
        let distinct: std::collections::HashSet<_> = prefixes.iter().cloned().collect();
        if distinct.len() > 1 {
            return Err(CommError::InconsistentPrefixes);
        }
        let prefix = prefixes.into_iter().next().flatten();
        let msg_id = msg_id.apply_prefix(prefix.as_deref());

        // Matches `Pool._preprocess_broadcast`'s unconditional
        // `handler.msg_send_counter += 1` (pool.py:244-246): every selected
        // handler's send counter advances once here, regardless of whether
        // packing or transmission later succeeds.
        for (_, h) in &handlers {
            h.note_broadcast_send();
        }

        let object = {
            let registry = self.registry.read().await;
            registry.to_value(value, &Options::default())?
        };
        let envelope = Envelope { object, id: msg_id };
        let bytes = crate::codec::pack(envelope).await?;

        Ok((bytes, handlers.into_iter().map(|(_, h)| h).collect()))
    }

    /// Sets the id prefix on every currently registered handler, matching
    /// `Pool.update_msg_prefix`.
    pub async fn update_prefix(&self, prefix: Option<String>) {
        for (_, handler) in self.handlers.all() {
            handler.set_prefix(prefix.clone()).await;
        }
    }

    /// Stops the server, shuts down every handler, logs aggregate
    /// counters, and clears both handler tables. Idempotent.
    pub async fn shutdown(&self) {
        let mut total_bytes_sent = 0u64;
        let mut sent_count = 0u64;

        if let Some(server) = self.server.write().await.take() {
            server.shutdown().await;
        }
        for (_, handler) in self.handlers.all() {
            handler.shutdown().await;
            total_bytes_sent += handler.bytes_sent();
            sent_count += handler.sent_count();
        }
        self.handlers.clear();
        info!(total_bytes_sent, sent_count, "pool shut down");
    }

    /// Whether both handler tables are empty (true before any handler is
    /// added, and after shutdown).
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

fn build_http_client(base_url: &reqwest::Url, server_port: u16, tls: Option<Arc<rustls::ClientConfig>>) -> Result<reqwest::Client> {
    let jar = reqwest::cookie::Jar::default();
    jar.add_cookie_str(&format!("server_port={server_port}"), base_url);

    let mut builder = reqwest::Client::builder().cookie_provider(Arc::new(jar));
    if let Some(tls) = tls {
        builder = builder
            .use_preconfigured_tls((*tls).clone())
            .danger_accept_invalid_hostnames(true);
    }
    builder.build().map_err(|e| CommError::Rejected(format!("failed to build http client: {e}")))
}

async fn resolve_ip(addr: &str, port: u16) -> Result<IpAddr> {
    if let Ok(ip) = addr.parse::<IpAddr>() {
        return Ok(ip);
    }
    tokio::net::lookup_host((addr, port))
        .await?
        .next()
        .map(|s| s.ip())
        .ok_or_else(|| CommError::Rejected(format!("could not resolve address {addr}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn dummy_handler(name: &str) -> Arc<ClientHandler> {
        Arc::new(ClientHandler::new(
            name.into(),
            IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            1,
            reqwest::Url::parse("http://127.0.0.1:1").unwrap(),
            reqwest::Client::new(),
            Duration::from_millis(1),
            0,
        ))
    }

    #[test]
    fn handler_table_looks_up_by_name_and_identity() {
        let table = HandlerTable::new();
        table.insert("alice".into(), dummy_handler("alice"), vec!["127.0.0.1:1".into()]);
        assert!(table.by_name("alice").is_some());
        assert!(table.by_identity("127.0.0.1:1").is_some());
        assert!(table.by_name("bob").is_none());
    }

    #[test]
    fn handler_table_clear_empties_both_maps() {
        let table = HandlerTable::new();
        table.insert("alice".into(), dummy_handler("alice"), vec!["127.0.0.1:1".into()]);
        assert!(!table.is_empty());
        table.clear();
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn pool_send_to_unknown_handler_fails() {
        let pool = Pool::new(None, None, None, Duration::from_secs(1), -1);
        let result = pool.send("nobody", &42i32, None).await;
        assert!(matches!(result, Err(CommError::UnknownPeer(_))));
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_and_empties_handlers() {
        let pool = Pool::new(None, None, None, Duration::from_millis(1), 0);
        pool.handlers.insert("alice".into(), dummy_handler("alice"), vec!["127.0.0.1:1".into()]);
        assert!(!pool.is_empty());
        pool.shutdown().await;
        assert!(pool.is_empty());
        pool.shutdown().await;
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn broadcast_fails_fast_when_handlers_disagree_on_prefix() {
        let pool = Pool::new(None, None, None, Duration::from_millis(1), 0);
        let bob = dummy_handler("bob");
        let carol = dummy_handler("carol");
        bob.set_prefix(Some("p".into())).await;
        carol.set_prefix(Some("q".into())).await;
        pool.handlers.insert("bob".into(), bob, vec!["127.0.0.1:2".into()]);
        pool.handlers.insert("carol".into(), carol, vec!["127.0.0.1:3".into()]);

        let result = pool
            .broadcast(&"X".to_string(), MessageId::Str("id".into()), Some(&["bob", "carol"]))
            .await;
        assert!(matches!(result, Err(CommError::InconsistentPrefixes)));
    }

    #[tokio::test]
    async fn recv_all_collects_every_handler_in_insertion_order() {
        let pool = Pool::new(None, None, None, Duration::from_millis(1), 0);
        let bob = dummy_handler("bob");
        let carol = dummy_handler("carol");
        bob.deliver(MessageId::Int(0), Value::Int(1)).await;
        carol.deliver(MessageId::Int(0), Value::Int(2)).await;
        pool.handlers.insert("bob".into(), bob, vec![]);
        pool.handlers.insert("carol".into(), carol, vec![]);

        let values = pool.recv_all(None, Some(MessageId::Int(0))).await.unwrap();
        assert_eq!(values, vec![("bob".to_string(), Value::Int(1)), ("carol".to_string(), Value::Int(2))]);
    }
}
