//! Incremental HTTP request parser, packaged as a hook.
//!
//! The parser advances a four-state machine (request line, headers, body,
//! done) as far as the currently buffered bytes allow and suspends the
//! moment a required delimiter is missing, without consuming partial
//! frames. Needing more data is signaled to the dispatch engine with
//! `Takeover` so downstream hooks stay quiet until the request is complete;
//! a malformed request is terminal and closes the connection.

use percent_encoding::percent_decode_str;
use thiserror::Error;
use tracing::debug;

use crate::buffer::ByteBuffer;
use crate::http::request::{RequestState, RequestStatus};
use crate::http::{state, HttpState};
use crate::server::conn::{Connection, EventMask, HookStatus};

/// Upper bound on a decoded path.
pub const MAX_PATH_LEN: usize = 4096;
/// Upper bound on one slash-delimited path segment.
pub const MAX_SEGMENT_LEN: usize = 255;

const FORBIDDEN_PATH_CHARS: &[char] = &['\\', ':', '*', '?', '"', '<', '>', '|'];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("malformed request line")]
    InvalidRequestLine,
    #[error("unsupported http version")]
    InvalidVersion,
    #[error("invalid request uri")]
    InvalidUri,
    #[error("invalid request path")]
    InvalidPath,
    #[error("invalid content-length header")]
    InvalidContentLength,
    #[error("malformed chunk size line")]
    InvalidChunk,
    #[error("request is not valid utf-8")]
    InvalidEncoding,
}

enum Progress {
    NeedMore,
    Complete,
}

/// HTTP protocol handler hook.
///
/// Register this at the top of the hook chain; hooks behind it see a parsed
/// request through the accessors in [`crate::http`] once the request status
/// reaches [`RequestStatus::Done`].
pub fn http_handler(event: EventMask, conn: &mut Connection) -> HookStatus {
    if event.contains(EventMask::INIT) {
        debug!("http init");
        conn.set_extra(HttpState::shared());
        return HookStatus::Ok;
    }

    if event.contains(EventMask::READ) {
        let Some(shared) = state(conn) else {
            return HookStatus::Close;
        };
        let mut http = shared.lock().unwrap();
        if http.request.status == RequestStatus::Error {
            return HookStatus::Close;
        }

        let status = match advance(&mut http.request, conn.inbuf()) {
            Ok(Progress::Complete) => HookStatus::Ok,
            Ok(Progress::NeedMore) => HookStatus::Takeover,
            Err(e) => {
                debug!("http parse error: {e}");
                http.request.status = RequestStatus::Error;
                HookStatus::Close
            }
        };

        if conn.method().is_none() && !http.request.method.is_empty() {
            let method = http.request.method.clone();
            conn.set_method(&method);
        }
        return status;
    }

    // WRITE and CLOSE need no parser action.
    HookStatus::Ok
}

/// Advances the state machine as far as buffered bytes allow.
fn advance(req: &mut RequestState, inbuf: &mut ByteBuffer) -> Result<Progress, ParseError> {
    loop {
        match req.status {
            RequestStatus::Init => {
                let Some(line) = inbuf.drain_line() else {
                    return Ok(Progress::NeedMore);
                };
                parse_request_line(req, &line)?;
                req.status = RequestStatus::RequestLineDone;
            }
            RequestStatus::RequestLineDone => loop {
                let Some(line) = inbuf.drain_line() else {
                    return Ok(Progress::NeedMore);
                };
                if line.is_empty() {
                    finish_headers(req)?;
                    req.status = RequestStatus::HeaderDone;
                    break;
                }
                parse_header_line(req, &line)?;
            },
            RequestStatus::HeaderDone => {
                if !parse_body(req, inbuf)? {
                    return Ok(Progress::NeedMore);
                }
                req.status = RequestStatus::Done;
            }
            RequestStatus::Done => return Ok(Progress::Complete),
            RequestStatus::Error => return Ok(Progress::NeedMore),
        }
    }
}

fn parse_request_line(req: &mut RequestState, line: &[u8]) -> Result<(), ParseError> {
    let line = std::str::from_utf8(line).map_err(|_| ParseError::InvalidEncoding)?;

    let tokens: Vec<&str> = line.split(' ').collect();
    let &[method, uri, version] = tokens.as_slice() else {
        return Err(ParseError::InvalidRequestLine);
    };
    if method.is_empty() || uri.is_empty() {
        return Err(ParseError::InvalidRequestLine);
    }

    let method = method.to_ascii_uppercase();
    let version = version.to_ascii_uppercase();
    match version.as_str() {
        "HTTP/0.9" | "HTTP/1.0" | "HTTP/1.1" => {}
        _ => return Err(ParseError::InvalidVersion),
    }

    let target = if uri.starts_with('/') {
        uri.to_string()
    } else if let Some(scheme_end) = uri.find("://") {
        // Absolute URI: peel off the host, keep the path. The host becomes a
        // synthetic Host header; an explicit Host header later replaces it.
        let rest = &uri[scheme_end + 3..];
        let (host, path) = match rest.find('/') {
            Some(i) => (&rest[..i], &rest[i..]),
            None => (rest, "/"),
        };
        if host.is_empty() {
            return Err(ParseError::InvalidUri);
        }
        req.headers.put("Host", host);
        path.to_string()
    } else {
        return Err(ParseError::InvalidUri);
    };

    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path.to_string(), query.to_string()),
        None => (target, String::new()),
    };

    let decoded = percent_decode_str(&path)
        .decode_utf8()
        .map_err(|_| ParseError::InvalidPath)?
        .into_owned();
    validate_path(&decoded)?;

    req.method = method;
    req.uri = uri.to_string();
    req.version = version;
    req.path = normalize_path(&decoded);
    req.query = query;
    Ok(())
}

fn parse_header_line(req: &mut RequestState, line: &[u8]) -> Result<(), ParseError> {
    let line = std::str::from_utf8(line).map_err(|_| ParseError::InvalidEncoding)?;
    match line.split_once(':') {
        Some((name, value)) => req.headers.put(name.trim(), value.trim()),
        // No colon: the whole trimmed line becomes a name with empty value.
        None => req.headers.put(line.trim(), ""),
    }
    Ok(())
}

fn finish_headers(req: &mut RequestState) -> Result<(), ParseError> {
    req.content_length = match req.headers.get("Content-Length") {
        Some(value) => value
            .parse::<i64>()
            .ok()
            .filter(|n| *n >= 0)
            .ok_or(ParseError::InvalidContentLength)?,
        None => -1,
    };
    Ok(())
}

/// Returns true once the body is complete.
fn parse_body(req: &mut RequestState, inbuf: &mut ByteBuffer) -> Result<bool, ParseError> {
    match req.content_length {
        0 => Ok(true),
        n if n > 0 => {
            let remaining = (n as u64 - req.body_received) as usize;
            let moved = inbuf.move_to(&mut req.body, remaining);
            req.body_received += moved as u64;
            Ok(req.body_received == n as u64)
        }
        _ => {
            if req.headers.get("Transfer-Encoding") == Some("chunked") {
                parse_chunked(req, inbuf)
            } else {
                // No declared length and no chunking: nothing to read.
                Ok(true)
            }
        }
    }
}

/// Decodes complete chunks only: if the size line, payload and trailing CRLF
/// are not all buffered, nothing is consumed.
fn parse_chunked(req: &mut RequestState, inbuf: &mut ByteBuffer) -> Result<bool, ParseError> {
    loop {
        let Some(line) = inbuf.peek_line() else {
            return Ok(false);
        };
        let size = parse_chunk_size(line)?;
        // Size line + CRLF + payload + CRLF. A 16-digit size line is valid
        // hex but cannot be a frame we could ever buffer; reject instead of
        // overflowing.
        let frame = line
            .len()
            .checked_add(size)
            .and_then(|n| n.checked_add(4))
            .ok_or(ParseError::InvalidChunk)?;
        if inbuf.len() < frame {
            return Ok(false);
        }

        inbuf.drain_line();
        inbuf.move_to(&mut req.body, size);
        if &inbuf.drain(2)[..] != b"\r\n" {
            return Err(ParseError::InvalidChunk);
        }
        req.body_received += size as u64;

        if size == 0 {
            return Ok(true);
        }
    }
}

fn parse_chunk_size(line: &[u8]) -> Result<usize, ParseError> {
    let text = std::str::from_utf8(line).map_err(|_| ParseError::InvalidChunk)?;
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ParseError::InvalidChunk);
    }
    usize::from_str_radix(text, 16).map_err(|_| ParseError::InvalidChunk)
}

fn validate_path(path: &str) -> Result<(), ParseError> {
    if path.is_empty() || path.len() > MAX_PATH_LEN || !path.starts_with('/') {
        return Err(ParseError::InvalidPath);
    }
    if path.chars().any(|c| FORBIDDEN_PATH_CHARS.contains(&c)) {
        return Err(ParseError::InvalidPath);
    }
    if path.split('/').any(|seg| seg.len() > MAX_SEGMENT_LEN) {
        return Err(ParseError::InvalidPath);
    }
    Ok(())
}

/// Normalizes a decoded path: trims surrounding whitespace, collapses
/// repeated slashes and strips one trailing slash unless the path is exactly
/// "/". Idempotent.
pub fn normalize_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for c in path.trim().chars() {
        if c == '/' && out.ends_with('/') {
            continue;
        }
        out.push(c);
    }
    if out.len() > 1 && out.ends_with('/') {
        out.pop();
    }
    out
}
