use bytes::{Buf, Bytes, BytesMut};

/// Per-direction FIFO byte buffer.
///
/// Each connection owns two of these, one per direction. All framing code
/// works against this buffer instead of the socket, which keeps the parsing
/// and dispatch layers free of I/O.
#[derive(Debug, Default)]
pub struct ByteBuffer {
    data: BytesMut,
}

impl ByteBuffer {
    pub fn new() -> Self {
        Self {
            data: BytesMut::with_capacity(4096),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Appends bytes at the tail.
    pub fn write(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// All currently buffered bytes, without consuming them.
    pub fn peek(&self) -> &[u8] {
        &self.data
    }

    /// Removes and returns up to `n` bytes from the head.
    pub fn drain(&mut self, n: usize) -> Bytes {
        let n = n.min(self.data.len());
        self.data.split_to(n).freeze()
    }

    /// Removes and returns everything.
    pub fn drain_all(&mut self) -> Bytes {
        self.data.split().freeze()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// The first CRLF-terminated line, excluding the CRLF, without consuming
    /// anything. `None` when no complete line is buffered yet.
    pub fn peek_line(&self) -> Option<&[u8]> {
        let end = self.find_crlf()?;
        Some(&self.data[..end])
    }

    /// Consumes and returns the first CRLF-terminated line, excluding the
    /// CRLF itself.
    pub fn drain_line(&mut self) -> Option<Bytes> {
        let end = self.find_crlf()?;
        let line = self.data.split_to(end).freeze();
        self.data.advance(2);
        Some(line)
    }

    /// Moves up to `max` bytes from the head of this buffer to the tail of
    /// `other`. Returns the number of bytes moved.
    pub fn move_to(&mut self, other: &mut ByteBuffer, max: usize) -> usize {
        let n = max.min(self.data.len());
        if n > 0 {
            other.data.extend_from_slice(&self.data[..n]);
            self.data.advance(n);
        }
        n
    }

    fn find_crlf(&self) -> Option<usize> {
        self.data.windows(2).position(|w| w == b"\r\n")
    }
}
