//! # HTTPS Server
//!
//! Terminates TLS, captures the verified client certificate chain of each
//! connection and routes requests to the [`EnrollmentService`]:
//!
//! * `POST /enroll/{hostname}` answers with a host certificate line.
//! * `GET /known_hosts` answers with the registry in `known_hosts` format.
//!
//! Failures of either operation are answered with status 400 and the error
//! text as body.
use std::convert::Infallible;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Body;
use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use log::{debug, error, info, warn};
use percent_encoding::percent_decode_str;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;

use crate::enrollment::{EnrollError, EnrollmentService};
use crate::identity::{self, PeerIdentity};

pub mod config;
pub mod tls;
use config::HttpServerConfig;

/// Maximum accepted request body size in bytes. An authorized-keys line is
/// far below this even for large RSA keys.
pub const MAX_BODY_SIZE: usize = 65_536;

/// The HTTPS listener.
pub struct HttpsServer {
    listener: TcpListener,
    acceptor: TlsAcceptor,
    service: EnrollmentService,
}

impl HttpsServer {
    /// Builds the TLS configuration and binds the listening socket.
    pub async fn bind(config: &HttpServerConfig, service: EnrollmentService) -> Result<Self> {
        let tls_config = tls::create_server_config(config)?;
        let listener = TcpListener::bind((config.bind.as_str(), config.port))
            .await
            .with_context(|| format!("could not bind to {}:{}", config.bind, config.port))?;
        info!("listening on https://{}", listener.local_addr()?);
        Ok(HttpsServer {
            listener,
            acceptor: TlsAcceptor::from(Arc::new(tls_config)),
            service,
        })
    }

    /// The address the server is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until `shutdown` completes.
    ///
    /// Every connection is served on its own task; connections that are open
    /// when `shutdown` completes are not interrupted.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            let (stream, remote_addr) = tokio::select! {
                _ = &mut shutdown => {
                    info!("stopped accepting connections");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("failed to accept connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        continue;
                    }
                },
            };
            let acceptor = self.acceptor.clone();
            let service = self.service.clone();
            tokio::spawn(serve_connection(acceptor, service, stream, remote_addr));
        }
    }
}

async fn serve_connection(
    acceptor: TlsAcceptor,
    service: EnrollmentService,
    stream: TcpStream,
    remote_addr: SocketAddr,
) {
    let stream = match acceptor.accept(stream).await {
        Ok(stream) => stream,
        Err(e) => {
            debug!("TLS handshake with {} failed: {}", remote_addr, e);
            return;
        }
    };
    // rustls only exposes chains its client verifier accepted
    let peer = stream
        .get_ref()
        .1
        .peer_certificates()
        .and_then(PeerIdentity::from_verified_chain);
    debug!(
        "new connection from {} ({})",
        remote_addr,
        match peer {
            Some(_) => "client certificate verified",
            None => "no client certificate",
        }
    );

    let peer = Arc::new(peer);
    let handler = service_fn(move |req| {
        let service = service.clone();
        let peer = peer.clone();
        async move { Ok::<_, Infallible>(handle_request(&service, peer.as_ref().as_ref(), req).await) }
    });
    if let Err(e) = http1::Builder::new()
        .serve_connection(TokioIo::new(stream), handler)
        .await
    {
        debug!("connection with {} ended with error: {}", remote_addr, e);
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Route {
    Enroll(String),
    KnownHosts,
    MethodNotAllowed,
    NotFound,
}

fn route(method: &Method, path: &str) -> Route {
    if let Some(hostname) = path.strip_prefix("/enroll/") {
        if hostname.is_empty() || hostname.contains('/') {
            return Route::NotFound;
        }
        let Ok(hostname) = percent_decode_str(hostname).decode_utf8() else {
            return Route::NotFound;
        };
        return match *method {
            Method::POST => Route::Enroll(hostname.into_owned()),
            _ => Route::MethodNotAllowed,
        };
    }
    if path == "/known_hosts" {
        return match *method {
            Method::GET => Route::KnownHosts,
            _ => Route::MethodNotAllowed,
        };
    }
    Route::NotFound
}

fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

/// Routes a single request.
///
/// # Arguments
///
/// * `service` - The enrollment service answering the request.
/// * `peer` - The verified client certificate chain of the connection.
/// * `req` - The request.
pub async fn handle_request<B>(
    service: &EnrollmentService,
    peer: Option<&PeerIdentity>,
    req: Request<B>,
) -> Response<Full<Bytes>>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match route(req.method(), req.uri().path()) {
        Route::Enroll(hostname) => {
            // bodies of unauthorized peers are never read
            if !identity::authorize(&hostname, peer) {
                return text_response(
                    StatusCode::BAD_REQUEST,
                    EnrollError::InvalidClientAuth.to_string(),
                );
            }
            let body = match Limited::new(req.into_body(), MAX_BODY_SIZE).collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(e) => {
                    warn!("failed to read enrollment request for {}: {}", hostname, e);
                    return text_response(
                        StatusCode::BAD_REQUEST,
                        format!("failed to read request body: {}", e),
                    );
                }
            };
            match service.enroll(&hostname, peer, &body).await {
                Ok(certificate) => text_response(StatusCode::OK, certificate),
                Err(e) => {
                    warn!("enrollment for {} rejected: {}", hostname, e);
                    text_response(StatusCode::BAD_REQUEST, e.to_string())
                }
            }
        }
        Route::KnownHosts => match service.known_hosts().await {
            Ok(known_hosts) => text_response(StatusCode::OK, known_hosts),
            Err(e) => {
                error!("failed to render known_hosts: {}", e);
                text_response(StatusCode::BAD_REQUEST, e.to_string())
            }
        },
        Route::MethodNotAllowed => text_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed"),
        Route::NotFound => text_response(StatusCode::NOT_FOUND, "not found"),
    }
}
