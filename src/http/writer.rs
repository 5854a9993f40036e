//! Response framing.
//!
//! All operations work on the response state plus the connection's outbound
//! buffer; nothing here performs I/O. The `*_response_*` / `send_*`
//! functions are the hook-facing surface and fetch the HTTP state from the
//! connection, the lower-level functions are shared with the parser tests.

use thiserror::Error;

use crate::buffer::ByteBuffer;
use crate::http::{state, HttpState};
use crate::http::response::reason_phrase;
use crate::server::conn::Connection;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WriterError {
    /// The status line and headers were already serialized.
    #[error("response header already sent")]
    HeaderFrozen,
    /// Fixed-length operation in chunked mode or vice versa.
    #[error("operation does not match the response framing mode")]
    WrongMode,
    /// The write would exceed the declared Content-Length.
    #[error("write would exceed the declared content length")]
    LengthExceeded,
    /// The HTTP protocol hook is not installed on this connection.
    #[error("no http state on this connection")]
    NoState,
}

/// Sets a response header; `None` removes it. Fails once frozen.
pub fn set_response_header(
    conn: &mut Connection,
    name: &str,
    value: Option<&str>,
) -> Result<(), WriterError> {
    with_state(conn, |http, _| set_header(http, name, value))
}

/// Sets the status code and optional reason phrase. Fails once frozen.
pub fn set_response_code(
    conn: &mut Connection,
    code: u16,
    reason: Option<&str>,
) -> Result<(), WriterError> {
    with_state(conn, |http, _| set_status(http, code, reason))
}

/// Declares the content type and length. A negative `size` switches the
/// response to chunked transfer encoding. Fails once frozen.
pub fn set_response_content(
    conn: &mut Connection,
    content_type: &str,
    size: i64,
) -> Result<(), WriterError> {
    with_state(conn, |http, _| set_content(http, content_type, size))
}

/// Serializes the status line, headers and blank line into the outbound
/// buffer and freezes the header. Subsequent calls fail without writing.
pub fn send_header(conn: &mut Connection) -> Result<usize, WriterError> {
    with_state(conn, serialize_header)
}

/// Appends fixed-length body bytes. Requires a declared Content-Length and
/// refuses writes that would exceed it. Sends the header first if needed.
pub fn send_data(conn: &mut Connection, data: &[u8]) -> Result<usize, WriterError> {
    with_state(conn, |http, out| write_data(http, out, data))
}

/// Appends one chunk in chunked mode. An empty `data` emits the terminal
/// chunk. Sends the header first if needed.
pub fn send_chunk(conn: &mut Connection, data: &[u8]) -> Result<usize, WriterError> {
    with_state(conn, |http, out| write_chunk(http, out, data))
}

/// One-shot convenience: status code, fixed-length content, body.
pub fn respond(
    conn: &mut Connection,
    code: u16,
    content_type: &str,
    body: &[u8],
) -> Result<usize, WriterError> {
    with_state(conn, |http, out| {
        set_status(http, code, None)?;
        set_content(http, content_type, body.len() as i64)?;
        if body.is_empty() {
            serialize_header(http, out)
        } else {
            write_data(http, out, body)
        }
    })
}

fn with_state<T>(
    conn: &mut Connection,
    f: impl FnOnce(&mut HttpState, &mut ByteBuffer) -> Result<T, WriterError>,
) -> Result<T, WriterError> {
    let shared = state(conn).ok_or(WriterError::NoState)?;
    let mut http = shared.lock().unwrap();
    f(&mut http, conn.outbuf())
}

pub(crate) fn set_header(
    http: &mut HttpState,
    name: &str,
    value: Option<&str>,
) -> Result<(), WriterError> {
    if http.response.frozen {
        return Err(WriterError::HeaderFrozen);
    }
    match value {
        Some(value) => http.response.headers.put(name, value),
        None => {
            http.response.headers.remove(name);
        }
    }
    Ok(())
}

pub(crate) fn set_status(
    http: &mut HttpState,
    code: u16,
    reason: Option<&str>,
) -> Result<(), WriterError> {
    if http.response.frozen {
        return Err(WriterError::HeaderFrozen);
    }
    http.response.code = code;
    http.response.reason = reason.map(str::to_string);
    Ok(())
}

pub(crate) fn set_content(
    http: &mut HttpState,
    content_type: &str,
    size: i64,
) -> Result<(), WriterError> {
    if http.response.frozen {
        return Err(WriterError::HeaderFrozen);
    }
    http.response.headers.put("Content-Type", content_type);
    if size >= 0 {
        http.response.headers.put("Content-Length", &size.to_string());
        http.response.headers.remove("Transfer-Encoding");
    } else {
        http.response.headers.put("Transfer-Encoding", "chunked");
        http.response.headers.remove("Content-Length");
    }
    http.response.content_length = size.max(-1);
    Ok(())
}

pub(crate) fn serialize_header(
    http: &mut HttpState,
    out: &mut ByteBuffer,
) -> Result<usize, WriterError> {
    if http.response.frozen {
        return Err(WriterError::HeaderFrozen);
    }

    let version = if http.request.version.is_empty() {
        "HTTP/1.1"
    } else {
        &http.request.version
    };
    let reason = match &http.response.reason {
        Some(reason) => reason.as_str(),
        None => reason_phrase(http.response.code),
    };

    let before = out.len();
    out.write(format!("{} {} {}\r\n", version, http.response.code, reason).as_bytes());
    for (name, value) in http.response.headers.iter() {
        out.write(name.as_bytes());
        out.write(b": ");
        out.write(value.as_bytes());
        out.write(b"\r\n");
    }
    out.write(b"\r\n");

    http.response.frozen = true;
    Ok(out.len() - before)
}

pub(crate) fn write_data(
    http: &mut HttpState,
    out: &mut ByteBuffer,
    data: &[u8],
) -> Result<usize, WriterError> {
    if http.response.content_length < 0 {
        return Err(WriterError::WrongMode);
    }
    if http.response.body_sent + data.len() as u64 > http.response.content_length as u64 {
        return Err(WriterError::LengthExceeded);
    }
    if !http.response.frozen {
        serialize_header(http, out)?;
    }
    out.write(data);
    http.response.body_sent += data.len() as u64;
    Ok(data.len())
}

pub(crate) fn write_chunk(
    http: &mut HttpState,
    out: &mut ByteBuffer,
    data: &[u8],
) -> Result<usize, WriterError> {
    if http.response.content_length >= 0 {
        return Err(WriterError::WrongMode);
    }
    if !http.response.frozen {
        serialize_header(http, out)?;
    }
    out.write(format!("{:x}\r\n", data.len()).as_bytes());
    out.write(data);
    out.write(b"\r\n");
    http.response.body_sent += data.len() as u64;
    Ok(data.len())
}
