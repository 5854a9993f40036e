use bytes::Bytes;

use crate::buffer::ByteBuffer;
use crate::table::ListTable;

/// Progress of the incremental request parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    /// Nothing parsed yet; waiting for a complete request line.
    Init,
    /// Request line accepted; reading headers.
    RequestLineDone,
    /// Header block complete; reading the body, if any.
    HeaderDone,
    /// Request fully received. No more data expected for this request.
    Done,
    /// Unrecoverable parse error. Terminal.
    Error,
}

/// One in-flight HTTP request.
///
/// Owned by the connection for the lifetime of a single request and replaced
/// wholesale on a pipelined reset. Request-line fields are populated at
/// `RequestLineDone`, headers and content length at `HeaderDone`.
#[derive(Debug)]
pub struct RequestState {
    pub(crate) status: RequestStatus,
    pub(crate) method: String,
    pub(crate) uri: String,
    pub(crate) version: String,
    /// URL-decoded, normalized path.
    pub(crate) path: String,
    /// Raw query string, possibly empty.
    pub(crate) query: String,
    pub(crate) headers: ListTable,
    /// Value of the Content-Length header; -1 while unknown. Once set from
    /// the header block it never changes for this request.
    pub(crate) content_length: i64,
    pub(crate) body_received: u64,
    pub(crate) body: ByteBuffer,
}

impl RequestState {
    pub fn new() -> Self {
        Self {
            status: RequestStatus::Init,
            method: String::new(),
            uri: String::new(),
            version: String::new(),
            path: String::new(),
            query: String::new(),
            headers: ListTable::headers(),
            content_length: -1,
            body_received: 0,
            body: ByteBuffer::new(),
        }
    }

    pub fn status(&self) -> RequestStatus {
        self.status
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn headers(&self) -> &ListTable {
        &self.headers
    }

    pub fn content_length(&self) -> i64 {
        self.content_length
    }

    /// Drains up to `max` received body bytes.
    pub fn take_body(&mut self, max: usize) -> Bytes {
        self.body.drain(max)
    }

    pub fn body_len(&self) -> usize {
        self.body.len()
    }

    /// Whether the client expects the connection to stay open after the
    /// response. HTTP/1.1 defaults to keep-alive unless `Connection: close`;
    /// older versions must opt in with `Connection: keep-alive`.
    pub fn is_keepalive(&self) -> bool {
        match self.header("Connection") {
            Some(v) if self.version == "HTTP/1.1" => !v.eq_ignore_ascii_case("close"),
            Some(v) => v.eq_ignore_ascii_case("keep-alive"),
            None => self.version == "HTTP/1.1",
        }
    }
}

impl Default for RequestState {
    fn default() -> Self {
        Self::new()
    }
}
