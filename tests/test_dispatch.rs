use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tracing_subscriber::fmt::MakeWriter;

use ember::server::conn::{Connection, EventMask, Hook, HookStatus};

fn counting_hook(
    counter: Arc<AtomicUsize>,
    on: EventMask,
    status: HookStatus,
) -> Hook {
    Hook::new(None, move |event, _conn: &mut Connection| {
        if event.contains(on) {
            counter.fetch_add(1, Ordering::SeqCst);
            return status;
        }
        HookStatus::Ok
    })
}

#[test]
fn test_round_stops_at_first_non_ok() {
    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));
    let third = Arc::new(AtomicUsize::new(0));

    let hooks = Arc::new(vec![
        counting_hook(first.clone(), EventMask::READ, HookStatus::Ok),
        counting_hook(second.clone(), EventMask::READ, HookStatus::Takeover),
        counting_hook(third.clone(), EventMask::READ, HookStatus::Ok),
    ]);
    let mut conn = Connection::new(hooks, true);
    conn.dispatch(EventMask::READ);

    assert_eq!(first.load(Ordering::SeqCst), 1);
    assert_eq!(second.load(Ordering::SeqCst), 1);
    assert_eq!(third.load(Ordering::SeqCst), 0);
    assert_eq!(conn.status(), HookStatus::Takeover);
}

#[test]
fn test_takeover_relaxes_back_to_ok() {
    let round = Arc::new(AtomicUsize::new(0));
    let round2 = round.clone();
    let hooks = Arc::new(vec![Hook::new(None, move |event, _conn: &mut Connection| {
        if event.contains(EventMask::READ) && round2.fetch_add(1, Ordering::SeqCst) == 0 {
            return HookStatus::Takeover;
        }
        HookStatus::Ok
    })]);
    let mut conn = Connection::new(hooks, true);

    conn.dispatch(EventMask::READ);
    assert_eq!(conn.status(), HookStatus::Takeover);
    conn.dispatch(EventMask::READ);
    assert_eq!(conn.status(), HookStatus::Ok);
}

#[test]
fn test_method_filter_matches_within_same_round() {
    let filtered = Arc::new(AtomicUsize::new(0));
    let filtered2 = filtered.clone();

    let binder = Hook::new(None, |event, conn: &mut Connection| {
        if event.contains(EventMask::READ) && conn.method().is_none() {
            conn.set_method("GET");
        }
        HookStatus::Ok
    });
    let handler = Hook::new(Some("GET".to_string()), move |_event, _conn: &mut Connection| {
        filtered2.fetch_add(1, Ordering::SeqCst);
        HookStatus::Ok
    });
    let mut conn = Connection::new(Arc::new(vec![binder, handler]), true);

    // INIT: the method is unbound, the filtered hook must be skipped.
    assert_eq!(filtered.load(Ordering::SeqCst), 0);

    // The binder sets the method; the filtered hook behind it runs in the
    // same round.
    conn.dispatch(EventMask::READ);
    assert_eq!(filtered.load(Ordering::SeqCst), 1);
}

#[test]
fn test_method_filter_skips_other_methods() {
    let filtered = Arc::new(AtomicUsize::new(0));
    let filtered2 = filtered.clone();
    let handler = Hook::new(Some("POST".to_string()), move |_event, _conn: &mut Connection| {
        filtered2.fetch_add(1, Ordering::SeqCst);
        HookStatus::Ok
    });
    let mut conn = Connection::new(Arc::new(vec![handler]), true);
    conn.set_method("GET");
    conn.dispatch(EventMask::READ);
    assert_eq!(filtered.load(Ordering::SeqCst), 0);
}

#[test]
fn test_done_suspends_further_rounds_without_pipelining() {
    let reads = Arc::new(AtomicUsize::new(0));
    let hooks = Arc::new(vec![counting_hook(
        reads.clone(),
        EventMask::READ,
        HookStatus::Done,
    )]);
    let mut conn = Connection::new(hooks, false);

    conn.dispatch(EventMask::READ);
    assert_eq!(conn.status(), HookStatus::Done);
    assert!(!conn.is_finished());

    conn.dispatch(EventMask::READ);
    assert_eq!(reads.load(Ordering::SeqCst), 1);
}

#[test]
fn test_done_without_pipelining_discards_trailing_input() {
    let hooks = Arc::new(vec![counting_hook(
        Arc::new(AtomicUsize::new(0)),
        EventMask::READ,
        HookStatus::Done,
    )]);
    let mut conn = Connection::new(hooks, false);

    conn.inbuf().write(b"request one\r\ntrailing");
    conn.dispatch(EventMask::READ);
    assert_eq!(conn.in_len(), 0);
}

#[test]
fn test_done_with_pipelining_resets_for_next_request() {
    let inits = Arc::new(AtomicUsize::new(0));
    let closes = Arc::new(AtomicUsize::new(0));
    let inits2 = inits.clone();
    let closes2 = closes.clone();

    let hooks = Arc::new(vec![Hook::new(None, move |event, conn: &mut Connection| {
        if event.contains(EventMask::INIT) {
            inits2.fetch_add(1, Ordering::SeqCst);
        }
        if event.contains(EventMask::CLOSE) {
            closes2.fetch_add(1, Ordering::SeqCst);
        }
        if event.contains(EventMask::READ) {
            conn.set_method("GET");
            conn.set_userdata(42u32);
            return HookStatus::Done;
        }
        HookStatus::Ok
    })]);
    let mut conn = Connection::new(hooks, true);
    assert_eq!(inits.load(Ordering::SeqCst), 1);

    conn.dispatch(EventMask::READ);

    // One synthetic close/init cycle, connection-level state cleared and the
    // transport stays up.
    assert_eq!(closes.load(Ordering::SeqCst), 1);
    assert_eq!(inits.load(Ordering::SeqCst), 2);
    assert_eq!(conn.status(), HookStatus::Ok);
    assert_eq!(conn.method(), None);
    assert_eq!(conn.userdata::<u32>(), None);
    assert!(!conn.is_finished());
}

#[test]
fn test_close_defers_teardown_until_output_drains() {
    let closes = Arc::new(AtomicUsize::new(0));
    let closes2 = closes.clone();

    let hooks = Arc::new(vec![Hook::new(None, move |event, conn: &mut Connection| {
        if event.contains(EventMask::CLOSE) {
            closes2.fetch_add(1, Ordering::SeqCst);
        }
        if event.contains(EventMask::READ) {
            conn.outbuf().write(b"bye");
            return HookStatus::Close;
        }
        HookStatus::Ok
    })]);
    let mut conn = Connection::new(hooks, true);

    conn.dispatch(EventMask::READ);
    assert!(!conn.is_finished());
    assert_eq!(closes.load(Ordering::SeqCst), 0);

    // The driver flushes and reports writability; only then does teardown run.
    conn.outbuf().drain_all();
    conn.dispatch(EventMask::WRITE);
    assert!(conn.is_finished());
    assert_eq!(closes.load(Ordering::SeqCst), 1);

    // Idempotent.
    conn.dispatch(EventMask::WRITE);
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_forced_close_delivers_close_exactly_once() {
    let seen = Arc::new(AtomicUsize::new(0));
    let seen2 = seen.clone();

    let hooks = Arc::new(vec![Hook::new(None, move |event, conn: &mut Connection| {
        if event.contains(EventMask::CLOSE) {
            assert!(event.contains(EventMask::TIMEOUT));
            seen2.fetch_add(1, Ordering::SeqCst);
        }
        if event.contains(EventMask::READ) {
            conn.outbuf().write(b"pending");
            return HookStatus::Close;
        }
        HookStatus::Ok
    })]);
    let mut conn = Connection::new(hooks, true);
    conn.dispatch(EventMask::READ);

    // Output is still pending, but a dead transport cannot drain it; the
    // close event must fire anyway, and only once.
    conn.close(EventMask::TIMEOUT);
    assert!(conn.is_finished());
    assert_eq!(seen.load(Ordering::SeqCst), 1);

    conn.close(EventMask::TIMEOUT);
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[derive(Clone, Default)]
struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl std::io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = LogCapture;

    fn make_writer(&'a self) -> LogCapture {
        self.clone()
    }
}

#[test]
fn test_discarded_input_and_dropped_userdata_log_at_warn() {
    let capture = LogCapture::default();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .with_ansi(false)
        .with_writer(capture.clone())
        .finish();

    tracing::subscriber::with_default(subscriber, || {
        let hooks = Arc::new(vec![counting_hook(
            Arc::new(AtomicUsize::new(0)),
            EventMask::READ,
            HookStatus::Done,
        )]);
        let mut conn = Connection::new(hooks, false);
        conn.set_userdata("app state".to_string());
        conn.set_extra(1u8);

        conn.inbuf().write(b"request\r\ntrailing");
        conn.dispatch(EventMask::READ);
        conn.close(EventMask::NONE);
    });

    let logs = capture.contents();
    assert!(logs.contains("discarding trailing input"));
    assert!(logs.contains("dropping application userdata"));
    // Routine protocol-state release stays below warn.
    assert!(!logs.contains("protocol handler state"));
}

#[test]
fn test_requests_served_counts_completed_requests() {
    let hooks = Arc::new(vec![counting_hook(
        Arc::new(AtomicUsize::new(0)),
        EventMask::READ,
        HookStatus::Done,
    )]);
    let mut conn = Connection::new(hooks, true);
    assert_eq!(conn.requests_served(), 0);

    conn.dispatch(EventMask::READ);
    assert_eq!(conn.requests_served(), 1);

    // The pipelined reset re-arms the counter's edge for the next request.
    conn.dispatch(EventMask::READ);
    assert_eq!(conn.requests_served(), 2);

    // Transport death is not a completed request.
    conn.close(EventMask::TIMEOUT);
    assert_eq!(conn.requests_served(), 2);
}

#[test]
fn test_userdata_slots() {
    let mut conn = Connection::new(Arc::new(Vec::new()), true);

    assert!(conn.set_userdata(7u32).is_none());
    assert_eq!(conn.userdata::<u32>(), Some(&7));

    // Asking for the wrong type leaves the value in place.
    assert!(conn.take_userdata::<String>().is_none());
    assert_eq!(conn.userdata::<u32>(), Some(&7));

    assert_eq!(*conn.take_userdata::<u32>().unwrap(), 7);
    assert_eq!(conn.userdata::<u32>(), None);

    // The protocol slot is independent of the application slot.
    conn.set_userdata(1u32);
    conn.set_extra("proto".to_string());
    assert_eq!(conn.userdata::<u32>(), Some(&1));
    assert_eq!(conn.extra::<String>().map(String::as_str), Some("proto"));
}
