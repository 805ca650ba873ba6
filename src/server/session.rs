use std::fmt;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use crate::core::config::AppConfig;
use crate::core::error::HttpError;
use crate::core::types::PublisherId;
use crate::delivery::handlers;
use crate::ingest::{metadata, pipeline};
use crate::storage::StorageLayout;

use super::http::{self, Method, Request, Response};

/// Request target for metadata document uploads.
pub const TOML_UPLOAD_TARGET: &str = "/toml/upload";

// ---------------------------------------------------------------------------
// Session lifecycle
// ---------------------------------------------------------------------------

/// Lifecycle of one connection. Exactly one request is served per session;
/// there is no keep-alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    New,
    Handshaking,
    Reading,
    Dispatching,
    Writing,
    ShuttingDown,
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::New => "new",
            SessionState::Handshaking => "handshaking",
            SessionState::Reading => "reading",
            SessionState::Dispatching => "dispatching",
            SessionState::Writing => "writing",
            SessionState::ShuttingDown => "shutting_down",
            SessionState::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One accepted connection, owned exclusively by its task for the whole
/// state machine. The listener keeps no handle to it; the value is dropped
/// on `Closed`.
pub struct Session {
    state: SessionState,
    publisher: PublisherId,
    layout: Arc<StorageLayout>,
    config: Arc<AppConfig>,
}

impl Session {
    pub fn new(publisher: PublisherId, layout: Arc<StorageLayout>, config: Arc<AppConfig>) -> Self {
        Self {
            state: SessionState::New,
            publisher,
            layout,
            config,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        debug!(publisher = %self.publisher, from = %self.state, to = %next, "session transition");
        self.state = next;
    }

    /// Drive the session: handshake → read → dispatch → respond → shutdown.
    pub async fn run(mut self, socket: TcpStream, acceptor: TlsAcceptor) {
        self.transition(SessionState::Handshaking);
        let mut stream = match acceptor.accept(socket).await {
            Ok(stream) => stream,
            Err(e) => {
                // Without an established TLS stream there is nothing to
                // answer on; drop the session silently.
                warn!(publisher = %self.publisher, error = %e, "TLS handshake failed");
                self.transition(SessionState::Closed);
                return;
            }
        };

        self.transition(SessionState::Reading);
        let max_body = self.config.ingest.max_body_bytes();
        let response = match http::read_request(&mut stream, max_body).await {
            Ok(request) => {
                info!(
                    publisher = %self.publisher,
                    method = %request.method,
                    target = %request.target,
                    body_bytes = request.body.len(),
                    "request received"
                );
                self.transition(SessionState::Dispatching);
                Some(self.dispatch(request).await)
            }
            Err(HttpError::BodyTooLarge { length, limit }) => {
                warn!(publisher = %self.publisher, length, limit, "request body over cap");
                Some(Response::new(413))
            }
            Err(HttpError::Malformed { reason }) => {
                warn!(publisher = %self.publisher, reason = %reason, "malformed request");
                Some(Response::new(400))
            }
            Err(HttpError::UnexpectedEof) | Err(HttpError::Io(_)) => {
                debug!(publisher = %self.publisher, "peer went away before a complete request");
                None
            }
        };

        if let Some(response) = response {
            self.transition(SessionState::Writing);
            if let Err(e) = http::write_response(&mut stream, &response).await {
                warn!(publisher = %self.publisher, error = %e, "response write failed");
            }
        }

        self.transition(SessionState::ShuttingDown);
        if let Err(e) = stream.shutdown().await {
            debug!(publisher = %self.publisher, error = %e, "TLS shutdown incomplete");
        }
        self.transition(SessionState::Closed);
    }

    /// Route one request. POST targets other than the metadata endpoint are
    /// all archive uploads.
    async fn dispatch(&self, request: Request) -> Response {
        match request.method.clone() {
            Method::Post if request.target == TOML_UPLOAD_TARGET => {
                self.handle_metadata_upload(&request)
            }
            Method::Post => self.handle_archive_upload(request).await,
            Method::Get if request.target == handlers::LISTING_TARGET => {
                handlers::handle_listing(&self.layout).await
            }
            Method::Get => handlers::handle_download(&self.layout, &request.target).await,
            Method::Other(method) => {
                warn!(publisher = %self.publisher, %method, "unsupported method");
                Response::new(405)
            }
        }
    }

    fn handle_metadata_upload(&self, request: &Request) -> Response {
        let body = String::from_utf8_lossy(&request.body);
        match metadata::parse_upload(&body) {
            Ok(meta) => {
                info!(publisher = %self.publisher, path = %meta.path, "metadata accepted");
                Response::text(200, "TOML parsed\r\n")
            }
            Err(e) => {
                warn!(publisher = %self.publisher, error = %e, "metadata rejected");
                Response::new(400)
            }
        }
    }

    /// The pipeline is synchronous filesystem work; it runs on the blocking
    /// pool and the response is issued only after promotion (or abort) has
    /// completed.
    async fn handle_archive_upload(&self, request: Request) -> Response {
        let layout = (*self.layout).clone();
        let publisher = self.publisher.clone();
        let body = request.body;

        let result =
            tokio::task::spawn_blocking(move || pipeline::run_upload(&layout, &publisher, &body))
                .await;

        match result {
            Ok(Ok(audio_id)) => Response::new(200).with_header("Client-ID", audio_id.to_string()),
            Ok(Err(e)) => Response::new(e.status()),
            Err(e) => {
                error!(publisher = %self.publisher, error = %e, "upload task failed");
                Response::new(500)
            }
        }
    }
}
