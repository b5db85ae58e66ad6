//! Minimal HTTP/1.1 server with HEAD and Range GET support for integration tests.
//!
//! Every path serves the same body. Behavior can be changed while the server
//! runs: range support, HEAD support, forced 503 failures and pacing of the
//! body so transfers stay in flight long enough to be paused or stopped.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Bytes written between pacing pauses.
const PIECE: usize = 4096;

struct State {
    body: Vec<u8>,
    head_allowed: AtomicBool,
    ranges: AtomicBool,
    failing: AtomicBool,
    piece_delay_ms: AtomicU64,
    requests: AtomicUsize,
    disposition: Mutex<Option<String>>,
}

#[derive(Clone)]
pub struct RangeServer {
    base: String,
    state: Arc<State>,
}

impl RangeServer {
    /// Start serving `body` on a background thread until the process exits.
    pub fn start(body: Vec<u8>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().unwrap().port();
        let state = Arc::new(State {
            body,
            head_allowed: AtomicBool::new(true),
            ranges: AtomicBool::new(true),
            failing: AtomicBool::new(false),
            piece_delay_ms: AtomicU64::new(0),
            requests: AtomicUsize::new(0),
            disposition: Mutex::new(None),
        });
        let shared = Arc::clone(&state);
        thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                let state = Arc::clone(&shared);
                thread::spawn(move || handle(stream, &state));
            }
        });
        RangeServer {
            base: format!("http://127.0.0.1:{port}"),
            state,
        }
    }

    pub fn url(&self, name: &str) -> String {
        format!("{}/{}", self.base, name)
    }

    pub fn body(&self) -> &[u8] {
        &self.state.body
    }

    /// When false, GET ignores Range and HEAD stops advertising ranges.
    pub fn set_ranges(&self, on: bool) {
        self.state.ranges.store(on, Ordering::SeqCst);
    }

    /// When false, HEAD answers 405.
    pub fn set_head_allowed(&self, on: bool) {
        self.state.head_allowed.store(on, Ordering::SeqCst);
    }

    /// When true, every request answers 503.
    pub fn set_failing(&self, on: bool) {
        self.state.failing.store(on, Ordering::SeqCst);
    }

    /// Sleep this long after every 4 KiB of body.
    pub fn set_piece_delay(&self, delay: Duration) {
        self.state
            .piece_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Send `Content-Disposition: <value>` with every response.
    pub fn set_disposition(&self, value: &str) {
        *self.state.disposition.lock().unwrap() = Some(value.to_string());
    }

    pub fn requests(&self) -> usize {
        self.state.requests.load(Ordering::SeqCst)
    }
}

fn handle(mut stream: TcpStream, state: &State) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(5)));
    let mut buf = [0u8; 8192];
    let n = match stream.read(&mut buf) {
        Ok(0) | Err(_) => return,
        Ok(n) => n,
    };
    let Ok(request) = std::str::from_utf8(&buf[..n]) else {
        return;
    };
    state.requests.fetch_add(1, Ordering::SeqCst);
    let (method, range) = parse_request(request);

    if state.failing.load(Ordering::SeqCst) {
        let _ = stream.write_all(
            b"HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        );
        return;
    }
    let body = &state.body;
    let total = body.len() as u64;
    let ranges = state.ranges.load(Ordering::SeqCst);
    let accept_ranges = if ranges { "Accept-Ranges: bytes\r\n" } else { "" };
    let disposition = match state.disposition.lock().unwrap().as_deref() {
        Some(value) => format!("Content-Disposition: {value}\r\n"),
        None => String::new(),
    };

    if method.eq_ignore_ascii_case("HEAD") {
        if !state.head_allowed.load(Ordering::SeqCst) {
            let _ = stream.write_all(
                b"HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            );
            return;
        }
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {total}\r\nETag: \"v1\"\r\n{accept_ranges}{disposition}Connection: close\r\n\r\n"
        );
        let _ = stream.write_all(response.as_bytes());
        return;
    }
    if !method.eq_ignore_ascii_case("GET") {
        let _ = stream.write_all(b"HTTP/1.1 405 Method Not Allowed\r\nConnection: close\r\n\r\n");
        return;
    }

    let (head, slice): (String, &[u8]) = match range.filter(|_| ranges) {
        Some((start, end_incl)) => {
            let end_incl = end_incl.min(total.saturating_sub(1));
            if start >= total || start > end_incl {
                (
                    format!("416 Range Not Satisfiable\r\nContent-Range: bytes */{total}\r\n"),
                    &body[0..0],
                )
            } else {
                (
                    format!("206 Partial Content\r\nContent-Range: bytes {start}-{end_incl}/{total}\r\n"),
                    &body[start as usize..=end_incl as usize],
                )
            }
        }
        None => ("200 OK\r\n".to_string(), &body[..]),
    };
    let response = format!(
        "HTTP/1.1 {head}Content-Length: {}\r\nETag: \"v1\"\r\n{accept_ranges}{disposition}Connection: close\r\n\r\n",
        slice.len()
    );
    if stream.write_all(response.as_bytes()).is_err() {
        return;
    }
    for piece in slice.chunks(PIECE) {
        if stream.write_all(piece).is_err() {
            return;
        }
        let delay = state.piece_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            thread::sleep(Duration::from_millis(delay));
        }
    }
}

/// Returns (method, optional (start, end_inclusive) for Range: bytes=X-Y).
fn parse_request(request: &str) -> (&str, Option<(u64, u64)>) {
    let mut lines = request.lines();
    let method = lines
        .next()
        .and_then(|l| l.split_whitespace().next())
        .unwrap_or("");
    let range = lines
        .take_while(|l| !l.trim().is_empty())
        .filter_map(|l| l.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("range"))
        .and_then(|(_, value)| {
            let spec = value.trim().strip_prefix("bytes=")?;
            let (a, b) = spec.split_once('-')?;
            let start = a.trim().parse::<u64>().ok()?;
            let end = match b.trim() {
                "" => u64::MAX,
                e => e.parse::<u64>().ok()?,
            };
            Some((start, end))
        });
    (method, range)
}
