//! HTTP protocol support.
//!
//! The protocol lives entirely in hook space: [`http_handler`] is a hook
//! that incrementally parses requests out of the connection's inbound
//! buffer, and the functions in [`writer`] frame responses into the
//! outbound buffer. Application hooks registered behind the handler use
//! the accessors here to inspect the parsed request.
//!
//! - **`parser`**: incremental request parsing state machine
//! - **`request`**: parsed request state
//! - **`response`**: response state and the reason-phrase table
//! - **`writer`**: response framing (headers, fixed-length body, chunks)

pub mod parser;
pub mod request;
pub mod response;
pub mod writer;

use std::sync::{Arc, Mutex};

use bytes::Bytes;

use crate::server::conn::Connection;

pub use parser::http_handler;

use request::{RequestState, RequestStatus};
use response::ResponseState;

/// Request and response state for one HTTP exchange.
///
/// Stored in the connection's protocol userdata slot by [`http_handler`] on
/// INIT and replaced wholesale on a pipelined reset.
#[derive(Debug, Default)]
pub struct HttpState {
    pub request: RequestState,
    pub response: ResponseState,
}

pub type SharedState = Arc<Mutex<HttpState>>;

impl HttpState {
    pub fn new() -> Self {
        Self {
            request: RequestState::new(),
            response: ResponseState::new(),
        }
    }

    pub(crate) fn shared() -> SharedState {
        Arc::new(Mutex::new(Self::new()))
    }
}

/// The HTTP state attached to a connection, if [`http_handler`] is
/// installed.
pub fn state(conn: &Connection) -> Option<SharedState> {
    conn.extra::<SharedState>().cloned()
}

/// Parse progress of the current request. `Init` when the HTTP handler is
/// not installed.
pub fn request_status(conn: &Connection) -> RequestStatus {
    state(conn)
        .map(|s| s.lock().unwrap().request.status())
        .unwrap_or(RequestStatus::Init)
}

pub fn request_method(conn: &Connection) -> Option<String> {
    let shared = state(conn)?;
    let http = shared.lock().unwrap();
    if http.request.method().is_empty() {
        None
    } else {
        Some(http.request.method().to_string())
    }
}

pub fn request_path(conn: &Connection) -> Option<String> {
    let shared = state(conn)?;
    let http = shared.lock().unwrap();
    if http.request.path().is_empty() {
        None
    } else {
        Some(http.request.path().to_string())
    }
}

pub fn request_header(conn: &Connection, name: &str) -> Option<String> {
    let shared = state(conn)?;
    let http = shared.lock().unwrap();
    http.request.header(name).map(str::to_string)
}

/// Declared request content length; -1 while unknown.
pub fn content_length(conn: &Connection) -> i64 {
    state(conn)
        .map(|s| s.lock().unwrap().request.content_length())
        .unwrap_or(-1)
}

/// Drains up to `max` received body bytes.
pub fn take_content(conn: &Connection, max: usize) -> Bytes {
    match state(conn) {
        Some(shared) => shared.lock().unwrap().request.take_body(max),
        None => Bytes::new(),
    }
}

/// Whether the client asked to keep the connection open after the response.
pub fn is_keepalive_request(conn: &Connection) -> bool {
    state(conn)
        .map(|s| s.lock().unwrap().request.is_keepalive())
        .unwrap_or(false)
}
