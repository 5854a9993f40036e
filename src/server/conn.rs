use std::any::Any;
use std::ops::BitOr;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::buffer::ByteBuffer;

/// Bitmask of transport events delivered to hooks.
///
/// `CLOSE` may co-occur with `TIMEOUT` or `SHUTDOWN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventMask(u8);

impl EventMask {
    pub const NONE: EventMask = EventMask(0);
    pub const INIT: EventMask = EventMask(1);
    pub const READ: EventMask = EventMask(1 << 1);
    pub const WRITE: EventMask = EventMask(1 << 2);
    pub const CLOSE: EventMask = EventMask(1 << 3);
    pub const TIMEOUT: EventMask = EventMask(1 << 4);
    pub const SHUTDOWN: EventMask = EventMask(1 << 5);

    pub fn contains(self, other: EventMask) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }
}

impl BitOr for EventMask {
    type Output = EventMask;

    fn bitor(self, rhs: EventMask) -> EventMask {
        EventMask(self.0 | rhs.0)
    }
}

/// Hook return values, ordered by severity.
///
/// - `Ok`: done with this event, escalate to the next hook.
/// - `Takeover`: this hook owns the buffer this round, skip remaining hooks.
/// - `Done`: request complete, keep the connection for the next request.
/// - `Close`: request complete, tear the connection down once output drains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HookStatus {
    Ok,
    Takeover,
    Done,
    Close,
}

pub type HookFn = Arc<dyn Fn(EventMask, &mut Connection) -> HookStatus + Send + Sync>;

/// A registered callback, optionally filtered by HTTP method.
///
/// Immutable once registered; shared read-only by every connection of one
/// server instance.
#[derive(Clone)]
pub struct Hook {
    pub(crate) method: Option<String>,
    pub(crate) cb: HookFn,
}

impl Hook {
    pub fn new(
        method: Option<String>,
        cb: impl Fn(EventMask, &mut Connection) -> HookStatus + Send + Sync + 'static,
    ) -> Self {
        Self {
            method,
            cb: Arc::new(cb),
        }
    }
}

const NUM_USERDATA: usize = 2;

/// Per-socket state plus the dispatch engine that drives it.
///
/// The engine performs no I/O of its own: the transport driver appends
/// inbound bytes, calls [`dispatch`](Connection::dispatch), and flushes
/// whatever hooks wrote to the outbound buffer. That keeps the whole
/// request pipeline testable byte-in/byte-out.
pub struct Connection {
    hooks: Arc<Vec<Hook>>,
    status: HookStatus,
    method: Option<String>,
    /// Slot 0 belongs to the application, slot 1 to protocol handlers.
    userdata: [Option<Box<dyn Any + Send>>; NUM_USERDATA],
    inbuf: ByteBuffer,
    outbuf: ByteBuffer,
    pipelining: bool,
    finished: bool,
    requests: u64,
}

impl Connection {
    /// Creates a connection and delivers the initial `INIT | WRITE` event.
    pub fn new(hooks: Arc<Vec<Hook>>, pipelining: bool) -> Self {
        let mut conn = Self {
            hooks,
            status: HookStatus::Ok,
            method: None,
            userdata: [None, None],
            inbuf: ByteBuffer::new(),
            outbuf: ByteBuffer::new(),
            pipelining,
            finished: false,
            requests: 0,
        };
        conn.status = conn.call_hooks(EventMask::INIT | EventMask::WRITE);
        conn
    }

    pub fn status(&self) -> HookStatus {
        self.status
    }

    /// True once teardown has completed and the transport may be released.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    /// Requests completed on this connection, counting every hook round that
    /// ended in Done or Close.
    pub fn requests_served(&self) -> u64 {
        self.requests
    }

    /// Binds the request method. Hooks registered on a method start matching
    /// from the next hook of the same dispatch round onwards.
    pub fn set_method(&mut self, method: &str) {
        self.method = Some(method.to_string());
    }

    pub fn inbuf(&mut self) -> &mut ByteBuffer {
        &mut self.inbuf
    }

    pub fn outbuf(&mut self) -> &mut ByteBuffer {
        &mut self.outbuf
    }

    pub fn in_len(&self) -> usize {
        self.inbuf.len()
    }

    pub fn out_len(&self) -> usize {
        self.outbuf.len()
    }

    /// Attaches application userdata, returning what was there before.
    pub fn set_userdata<T: Any + Send>(&mut self, data: T) -> Option<Box<dyn Any + Send>> {
        self.userdata[0].replace(Box::new(data))
    }

    pub fn userdata<T: Any + Send>(&self) -> Option<&T> {
        self.userdata[0].as_deref().and_then(|d| d.downcast_ref())
    }

    pub fn take_userdata<T: Any + Send>(&mut self) -> Option<Box<T>> {
        take_slot(&mut self.userdata[0])
    }

    /// Attaches protocol-handler userdata ("extra"). Applications should use
    /// [`set_userdata`](Connection::set_userdata) to avoid clashing with
    /// default handlers.
    pub fn set_extra<T: Any + Send>(&mut self, data: T) -> Option<Box<dyn Any + Send>> {
        self.userdata[1].replace(Box::new(data))
    }

    pub fn extra<T: Any + Send>(&self) -> Option<&T> {
        self.userdata[1].as_deref().and_then(|d| d.downcast_ref())
    }

    pub fn take_extra<T: Any + Send>(&mut self) -> Option<Box<T>> {
        take_slot(&mut self.userdata[1])
    }

    /// Delivers one transport event to the hook chain and applies the
    /// resulting connection-level transition.
    pub fn dispatch(&mut self, event: EventMask) {
        debug!(status = ?self.status, ?event, "dispatch");

        if self.status == HookStatus::Ok || self.status == HookStatus::Takeover {
            let status = self.call_hooks(event);
            self.merge_status(status);
            // Rounds only run while the status is Ok or Takeover, so this
            // edge fires once per request.
            if self.status >= HookStatus::Done {
                self.requests += 1;
            }
        }

        match self.status {
            HookStatus::Done => {
                if self.pipelining {
                    // Synthesize a close/init cycle without touching the
                    // transport so the next pipelined request starts clean.
                    self.call_hooks(EventMask::CLOSE);
                    self.reset();
                    self.call_hooks(EventMask::INIT);
                } else if event.contains(EventMask::READ) && !self.inbuf.is_empty() {
                    warn!(bytes = self.inbuf.len(), "discarding trailing input");
                    self.inbuf.clear();
                }
            }
            HookStatus::Close => {
                if self.outbuf.is_empty() {
                    let close_event = if event.contains(EventMask::CLOSE) {
                        event
                    } else {
                        EventMask::CLOSE
                    };
                    self.finish(close_event);
                }
            }
            _ => {}
        }
    }

    /// Forces teardown after a transport-level condition (EOF, reset,
    /// timeout, shutdown). The final CLOSE event is delivered exactly once
    /// even if output was still pending.
    pub fn close(&mut self, extra: EventMask) {
        self.status = HookStatus::Close;
        self.finish(EventMask::CLOSE | extra);
    }

    fn finish(&mut self, close_event: EventMask) {
        if self.finished {
            return;
        }
        self.call_hooks(close_event);
        self.reset();
        self.finished = true;
        debug!("connection closed");
    }

    /// Merge a hook-round result into the connection status. Close is
    /// sticky, Done only upgrades to Close; anything else takes the new
    /// value, which lets Takeover relax back to Ok on a later round.
    fn merge_status(&mut self, status: HookStatus) {
        if self.status == HookStatus::Close
            || (self.status == HookStatus::Done && self.status >= status)
        {
            return;
        }
        self.status = status;
    }

    fn reset(&mut self) {
        self.status = HookStatus::Ok;
        self.method = None;
        if self.userdata[0].take().is_some() {
            warn!("dropping application userdata left on the connection");
        }
        if self.userdata[1].take().is_some() {
            debug!("released protocol handler state");
        }
    }

    fn call_hooks(&mut self, event: EventMask) -> HookStatus {
        debug!(?event, "call hooks");
        let hooks = Arc::clone(&self.hooks);
        for hook in hooks.iter() {
            if let Some(filter) = &hook.method {
                if self.method.as_deref() != Some(filter.as_str()) {
                    continue;
                }
            }
            let status = (hook.cb)(event, self);
            if status != HookStatus::Ok {
                return status;
            }
        }
        HookStatus::Ok
    }
}

fn take_slot<T: Any + Send>(slot: &mut Option<Box<dyn Any + Send>>) -> Option<Box<T>> {
    match slot.take() {
        Some(data) => match data.downcast() {
            Ok(data) => Some(data),
            Err(data) => {
                // Wrong type requested, leave it in place.
                *slot = Some(data);
                None
            }
        },
        None => None,
    }
}
