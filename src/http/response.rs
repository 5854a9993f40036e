use crate::table::ListTable;

/// One in-flight HTTP response.
///
/// `frozen` flips false to true exactly once, the instant the status line
/// and headers are serialized; every header/status/content-length mutator
/// fails without side effects afterwards.
#[derive(Debug)]
pub struct ResponseState {
    pub(crate) code: u16,
    /// Explicit reason phrase; when unset the standard table applies.
    pub(crate) reason: Option<String>,
    pub(crate) headers: ListTable,
    /// Declared body length; -1 means chunked / undeclared.
    pub(crate) content_length: i64,
    pub(crate) frozen: bool,
    pub(crate) body_sent: u64,
}

impl ResponseState {
    pub fn new() -> Self {
        Self {
            code: 200,
            reason: None,
            headers: ListTable::headers(),
            content_length: -1,
            frozen: false,
            body_sent: 0,
        }
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn content_length(&self) -> i64 {
        self.content_length
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn body_sent(&self) -> u64 {
        self.body_sent
    }
}

impl Default for ResponseState {
    fn default() -> Self {
        Self::new()
    }
}

/// Standard reason phrase for a closed set of status codes, "-" otherwise.
pub fn reason_phrase(code: u16) -> &'static str {
    match code {
        100 => "Continue",
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        206 => "Partial Content",
        207 => "Multi-Status",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        410 => "Gone",
        414 => "Request-URI Too Long",
        423 => "Locked",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        503 => "Service Unavailable",
        _ => "-",
    }
}
