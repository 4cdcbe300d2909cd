//! The listening side of a pool: authenticates posters and delivers
//! envelopes to the matching client handler (component C3).
//!
//! Grounded in `original_source/src/tno/mpc/communication/httphandlers.py`'s
//! `HTTPServer`: one route each for `GET`/`POST` on any path, a
//! `server_port` identity cookie, and certificate identity taking priority
//! over address identity. The accept loop is a manual `tokio::spawn`-per-
//! connection loop (grounded in the teacher's connection-handling style)
//! rather than `axum::serve`, because mutual TLS needs the per-connection
//! peer certificate available before routing — `axum::serve` has no seam
//! for that.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::Extension;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::codec;
use crate::error::Result;
use crate::identity::PeerIdentity;
use crate::pool::HandlerTable;

/// The listening half of a pool.
pub struct Server {
    addr: IpAddr,
    port: u16,
    /// Deprecated identity-only value recorded at construction (never used
    /// for binding); see spec.md §9.
    external_port: u16,
    tls: Option<Arc<rustls::ServerConfig>>,
    received_count: Arc<AtomicU64>,
    bytes_received: Arc<AtomicU64>,
    shutdown: Arc<Notify>,
    task: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

#[derive(Clone)]
struct ConnContext {
    remote_ip: IpAddr,
    cert_identity: Option<PeerIdentity>,
    handlers: Arc<HandlerTable>,
    received_count: Arc<AtomicU64>,
    bytes_received: Arc<AtomicU64>,
}

impl Server {
    /// Binds and starts serving. `external_port`, when given at
    /// `Pool::add_server`, is recorded only as the outbound-cookie value a
    /// client handler advertises; it is never used to bind.
    pub async fn bind(
        addr: IpAddr,
        port: u16,
        external_port: Option<u16>,
        tls: Option<Arc<rustls::ServerConfig>>,
        handlers: Arc<HandlerTable>,
    ) -> Result<Self> {
        let listener = TcpListener::bind((addr, port)).await?;
        let received_count = Arc::new(AtomicU64::new(0));
        let bytes_received = Arc::new(AtomicU64::new(0));
        let shutdown = Arc::new(Notify::new());

        // A pool's HTTP handler responds the same way on every path, so a
        // single fallback service (not a wildcard path pattern, whose syntax
        // has shifted across axum versions) covers "/" and everything else.
        let router = Router::new().fallback_service(get(get_handler).post(post_handler));

        let scheme = if tls.is_some() { "https" } else { "http" };
        info!(%addr, port, scheme, "serving");

        let task = {
            let tls = tls.clone();
            let handlers = handlers.clone();
            let received_count = received_count.clone();
            let bytes_received = bytes_received.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(accept_loop(listener, router, tls, handlers, received_count, bytes_received, shutdown))
        };

        Ok(Self {
            addr,
            port,
            external_port: external_port.unwrap_or(port),
            tls,
            received_count,
            bytes_received,
            shutdown,
            task: tokio::sync::Mutex::new(Some(task)),
        })
    }

    /// The address bound to.
    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    /// The port bound to.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The value advertised to peers via the `server_port` cookie.
    pub fn external_port(&self) -> u16 {
        self.external_port
    }

    /// Whether this server requires mutual TLS.
    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    /// Total bytes received across all posted envelopes.
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::SeqCst)
    }

    /// Total number of envelopes received.
    pub fn received_count(&self) -> u64 {
        self.received_count.load(Ordering::SeqCst)
    }

    /// Stops accepting connections and cancels the background accept task.
    /// Idempotent, matching `HTTPServer.shutdown`.
    pub async fn shutdown(&self) {
        self.shutdown.notify_one();
        if let Some(task) = self.task.lock().await.take() {
            task.abort();
            let _ = task.await;
        }
        info!(
            bytes_received = self.bytes_received(),
            received_count = self.received_count(),
            "server shut down",
        );
    }
}

async fn accept_loop(
    listener: TcpListener,
    router: Router,
    tls: Option<Arc<rustls::ServerConfig>>,
    handlers: Arc<HandlerTable>,
    received_count: Arc<AtomicU64>,
    bytes_received: Arc<AtomicU64>,
    shutdown: Arc<Notify>,
) {
    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                debug!("accept loop stopping");
                return;
            }
            accepted = listener.accept() => {
                let (stream, remote) = match accepted {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                tokio::spawn(handle_connection(
                    stream,
                    remote,
                    router.clone(),
                    tls.clone(),
                    handlers.clone(),
                    received_count.clone(),
                    bytes_received.clone(),
                ));
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    remote: SocketAddr,
    router: Router,
    tls: Option<Arc<rustls::ServerConfig>>,
    handlers: Arc<HandlerTable>,
    received_count: Arc<AtomicU64>,
    bytes_received: Arc<AtomicU64>,
) {
    match tls {
        Some(cfg) => {
            let acceptor = tokio_rustls::TlsAcceptor::from(cfg);
            let tls_stream = match acceptor.accept(stream).await {
                Ok(s) => s,
                Err(e) => {
                    warn!(error = %e, %remote, "tls handshake failed");
                    return;
                }
            };
            let cert_identity = tls_stream
                .get_ref()
                .1
                .peer_certificates()
                .and_then(|certs| certs.first())
                .and_then(|der| crate::tls::peer_identity_from_cert(der).ok());
            let ctx = ConnContext {
                remote_ip: remote.ip(),
                cert_identity,
                handlers,
                received_count,
                bytes_received,
            };
            serve(TokioIo::new(tls_stream), router, ctx).await;
        }
        None => {
            let ctx =
                ConnContext { remote_ip: remote.ip(), cert_identity: None, handlers, received_count, bytes_received };
            serve(TokioIo::new(stream), router, ctx).await;
        }
    }
}

async fn serve<I>(io: TokioIo<I>, router: Router, ctx: ConnContext)
where
    I: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let router = router.layer(Extension(Arc::new(ctx)));
    let service = TowerToHyperService::new(router);
    if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
        debug!(error = %e, "connection closed with error");
    }
}

async fn get_handler() -> &'static str {
    "Connection working (GET)"
}

async fn post_handler(Extension(ctx): Extension<Arc<ConnContext>>, headers: HeaderMap, body: Bytes) -> Response {
    let Some(server_port) = cookie_value(&headers, "server_port").and_then(|v| v.parse::<u16>().ok()) else {
        warn!(remote = %ctx.remote_ip, "HTTP POST does not contain the server_port cookie");
        return (StatusCode::BAD_REQUEST, "").into_response();
    };

    let addr_identity = PeerIdentity::Address { ip: ctx.remote_ip, advertised_port: server_port };
    let handler = ctx
        .cert_identity
        .as_ref()
        .and_then(|cert| ctx.handlers.by_identity(&cert.lookup_key()))
        .or_else(|| ctx.handlers.by_identity(&addr_identity.lookup_key()));

    let Some(handler) = handler else {
        warn!(
            cert = ?ctx.cert_identity.as_ref().map(PeerIdentity::lookup_key),
            addr = %addr_identity.lookup_key(),
            "no handler found for incoming POST",
        );
        return (StatusCode::UNAUTHORIZED, "").into_response();
    };

    let body_len = body.len();
    let envelope = match codec::unpack(body.to_vec()).await {
        Ok(e) => e,
        Err(e) => {
            error!(peer = %handler.name, error = %e, "failed to unpack envelope");
            return (StatusCode::INTERNAL_SERVER_ERROR, "").into_response();
        }
    };

    handler.deliver(envelope.id, envelope.object).await;
    ctx.received_count.fetch_add(1, Ordering::SeqCst);
    ctx.bytes_received.fetch_add(body_len as u64, Ordering::SeqCst);

    (StatusCode::OK, "Message received").into_response()
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(axum::http::header::COOKIE)?.to_str().ok()?;
    raw.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name).then(|| value.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use std::net::Ipv4Addr;

    #[test]
    fn cookie_value_extracts_named_cookie_among_several() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::COOKIE, HeaderValue::from_static("a=1; server_port=8081; b=2"));
        assert_eq!(cookie_value(&headers, "server_port").as_deref(), Some("8081"));
    }

    #[test]
    fn cookie_value_is_none_when_absent() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::COOKIE, HeaderValue::from_static("a=1"));
        assert_eq!(cookie_value(&headers, "server_port"), None);
    }

    /// Exercises the same cert-then-address lookup order `post_handler`
    /// applies, without needing a live TLS handshake: a poster whose
    /// certificate identity and address identity resolve to *different*
    /// handlers must be routed to the certificate's handler.
    #[tokio::test]
    async fn certificate_identity_is_looked_up_before_address_identity() {
        let handlers = Arc::new(HandlerTable::new());
        let by_cert = Arc::new(crate::client::ClientHandler::new(
            "by-cert".into(),
            IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            1,
            reqwest::Url::parse("http://127.0.0.1:1").unwrap(),
            reqwest::Client::new(),
            std::time::Duration::from_millis(1),
            0,
        ));
        let by_addr = Arc::new(crate::client::ClientHandler::new(
            "by-addr".into(),
            IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            1,
            reqwest::Url::parse("http://127.0.0.1:1").unwrap(),
            reqwest::Client::new(),
            std::time::Duration::from_millis(1),
            0,
        ));

        let cert_identity = PeerIdentity::Certificate { issuer_cn: "alice-ca".into(), serial: "7".into() };
        let addr_identity = PeerIdentity::Address { ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9)), advertised_port: 9000 };

        handlers.insert("by-cert".into(), by_cert.clone(), vec![cert_identity.lookup_key()]);
        handlers.insert("by-addr".into(), by_addr.clone(), vec![addr_identity.lookup_key()]);

        // A poster presenting both a client certificate and the address
        // cookie must resolve to the certificate's handler, matching
        // `post_handler`'s `cert_identity.and_then(...).or_else(...)` chain.
        let resolved = Some(&cert_identity)
            .and_then(|cert| handlers.by_identity(&cert.lookup_key()))
            .or_else(|| handlers.by_identity(&addr_identity.lookup_key()));

        assert!(Arc::ptr_eq(&resolved.unwrap(), &by_cert));
    }
}
