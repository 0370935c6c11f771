//! Framed JSON-RPC transport.
//!
//! Two wire framings are accepted on input and auto-detected per frame:
//!
//! - Length-prefixed: `Content-Length: N\r\n\r\n<N bytes of UTF-8 JSON>`
//! - Line-delimited: one JSON object per newline-terminated line
//!
//! Output framing is Content-Length unless overridden through the
//! environment. A bad frame surfaces as an event and never breaks the
//! session; `Content-Length` always counts UTF-8 bytes, not characters.

use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, warn};

const READ_CHUNK: usize = 8 * 1024;
const EVENT_QUEUE: usize = 256;
const OUTBOUND_QUEUE: usize = 64;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport already started")]
    AlreadyStarted,

    #[error("transport not started")]
    NotStarted,
}

/// Frame-level decode failures. The session continues past every one.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("malformed Content-Length header: {0}")]
    BadContentLength(String),
}

/// What the reader surfaces to the dispatcher.
#[derive(Debug)]
pub enum TransportEvent {
    /// One decoded message, never a partial payload.
    Message(Value),
    /// A completed frame that was not valid JSON, or a bad header.
    ParseError(String),
    /// Upstream stream error; the dispatcher decides whether to close.
    IoError(String),
    /// The peer went away or `close()` was called. Delivered exactly once.
    Closed,
}

/// One decoded item from the framing state machine.
#[derive(Debug)]
pub enum Decoded {
    Frame(Value),
    Error(FrameError),
}

/// Push-based framing state machine.
///
/// Detection commits per frame: a buffer starting with `C` must grow a
/// complete `Content-Length` header block, a buffer starting with `{` reads
/// to the next newline. A single buffered byte never commits either way.
#[derive(Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Drain the next complete frame, if any. Call until `None`.
    pub fn next_frame(&mut self) -> Option<Decoded> {
        loop {
            self.skip_blank_lines();
            if self.buf.is_empty() {
                return None;
            }

            match self.buf[0] {
                b'C' => return self.next_length_prefixed(),
                b'{' => match self.next_line()? {
                    line if line.is_empty() => continue,
                    line => return Some(parse_frame(&line)),
                },
                _ => {
                    // Unrecognized lead byte: discard through the next
                    // newline so the session can resync.
                    let line = self.next_line()?;
                    return Some(Decoded::Error(FrameError::Parse(format!(
                        "unrecognized framing near {:?}",
                        String::from_utf8_lossy(&line[..line.len().min(24)])
                    ))));
                }
            }
        }
    }

    fn skip_blank_lines(&mut self) {
        loop {
            if self.buf.starts_with(b"\r\n") {
                self.buf.drain(..2);
            } else if self.buf.starts_with(b"\n") {
                self.buf.drain(..1);
            } else {
                return;
            }
        }
    }

    /// Take one `\n`-terminated line (trailing `\r` stripped), or `None`
    /// when the line is still incomplete.
    fn next_line(&mut self) -> Option<Vec<u8>> {
        let newline = self.buf.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.buf.drain(..=newline).collect();
        line.pop(); // the \n
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(line)
    }

    fn next_length_prefixed(&mut self) -> Option<Decoded> {
        let header_end = find_subsequence(&self.buf, b"\r\n\r\n")?;
        match parse_content_length(&self.buf[..header_end]) {
            Ok(length) => {
                let body_start = header_end + 4;
                if self.buf.len() < body_start + length {
                    return None;
                }
                let body: Vec<u8> = self
                    .buf
                    .drain(..body_start + length)
                    .skip(body_start)
                    .collect();
                Some(parse_frame(&body))
            }
            Err(detail) => {
                // Skip only the offending header line; the rest of the
                // buffer stays for framing detection to resume.
                match find_subsequence(&self.buf, b"\r\n") {
                    Some(line_end) => {
                        self.buf.drain(..line_end + 2);
                    }
                    None => self.buf.clear(),
                }
                Some(Decoded::Error(FrameError::BadContentLength(detail)))
            }
        }
    }
}

fn parse_frame(bytes: &[u8]) -> Decoded {
    match serde_json::from_slice(bytes) {
        Ok(value) => Decoded::Frame(value),
        Err(err) => Decoded::Error(FrameError::Parse(err.to_string())),
    }
}

fn parse_content_length(header: &[u8]) -> Result<usize, String> {
    let text = String::from_utf8_lossy(header);
    for line in text.split("\r\n") {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if name.eq_ignore_ascii_case("content-length") {
            return value
                .trim()
                .parse::<usize>()
                .map_err(|_| format!("non-integer length {:?}", value.trim()));
        }
    }
    Err("missing Content-Length header".to_string())
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Outbound wire framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFraming {
    ContentLength,
    Newline,
}

impl OutputFraming {
    /// Resolve the override knobs. Length wins when both are set.
    pub fn from_env() -> Self {
        let force_newline = env_flag("MCP_FORCE_NEWLINE");
        let force_length = env_flag("MCP_FORCE_CONTENT_LENGTH");
        if force_newline && force_length {
            warn!("MCP_FORCE_NEWLINE and MCP_FORCE_CONTENT_LENGTH both set; Content-Length wins");
            Self::ContentLength
        } else if force_newline {
            Self::Newline
        } else {
            Self::ContentLength
        }
    }

    pub fn encode(self, message: &Value) -> Vec<u8> {
        let body = message.to_string().into_bytes();
        match self {
            Self::ContentLength => {
                let mut frame =
                    format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
                frame.extend_from_slice(&body);
                frame
            }
            Self::Newline => {
                let mut frame = body;
                frame.push(b'\n');
                frame
            }
        }
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name).map(|v| v == "1").unwrap_or(false)
}

/// Duplex framed transport over any byte stream pair.
pub struct Transport<R, W> {
    io: Mutex<Option<(R, W)>>,
    framing: OutputFraming,
    started: AtomicBool,
    closed: Arc<AtomicBool>,
    closed_event_sent: Arc<AtomicBool>,
    outbound_tx: Mutex<Option<mpsc::Sender<Value>>>,
    events_tx: Mutex<Option<mpsc::Sender<TransportEvent>>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    writer_task: Mutex<Option<JoinHandle<()>>>,
}

impl Transport<tokio::io::Stdin, tokio::io::Stdout> {
    /// The usual deployment: the parent process owns our standard streams.
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout(), OutputFraming::from_env())
    }
}

impl<R, W> Transport<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(reader: R, writer: W, framing: OutputFraming) -> Self {
        Self {
            io: Mutex::new(Some((reader, writer))),
            framing,
            started: AtomicBool::new(false),
            closed: Arc::new(AtomicBool::new(false)),
            closed_event_sent: Arc::new(AtomicBool::new(false)),
            outbound_tx: Mutex::new(None),
            events_tx: Mutex::new(None),
            reader_task: Mutex::new(None),
            writer_task: Mutex::new(None),
        }
    }

    /// Begin reading. Returns the event stream; a second call fails.
    pub fn start(&self) -> Result<mpsc::Receiver<TransportEvent>, TransportError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(TransportError::AlreadyStarted);
        }
        let (mut reader, mut writer) = self
            .io
            .lock()
            .expect("transport io lock poisoned")
            .take()
            .ok_or(TransportError::AlreadyStarted)?;

        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Value>(OUTBOUND_QUEUE);
        *self.outbound_tx.lock().expect("transport lock poisoned") = Some(outbound_tx);
        *self.events_tx.lock().expect("transport lock poisoned") = Some(events_tx.clone());

        let framing = self.framing;
        let closed = Arc::clone(&self.closed);
        let closed_event_sent = Arc::clone(&self.closed_event_sent);

        let reader_handle = tokio::spawn(async move {
            let mut decoder = FrameDecoder::new();
            let mut chunk = vec![0u8; READ_CHUNK];
            loop {
                match reader.read(&mut chunk).await {
                    Ok(0) => {
                        closed.store(true, Ordering::SeqCst);
                        if !closed_event_sent.swap(true, Ordering::SeqCst) {
                            let _ = events_tx.send(TransportEvent::Closed).await;
                        }
                        return;
                    }
                    Ok(n) => {
                        decoder.push(&chunk[..n]);
                        while let Some(item) = decoder.next_frame() {
                            let event = match item {
                                Decoded::Frame(value) => TransportEvent::Message(value),
                                Decoded::Error(err) => TransportEvent::ParseError(err.to_string()),
                            };
                            if events_tx.send(event).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(err) => {
                        // Surface and keep reading; the dispatcher decides
                        // whether the session is over.
                        if events_tx
                            .send(TransportEvent::IoError(err.to_string()))
                            .await
                            .is_err()
                        {
                            return;
                        }
                        tokio::task::yield_now().await;
                    }
                }
            }
        });

        let writer_handle = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let frame = framing.encode(&message);
                if let Err(err) = writer.write_all(&frame).await {
                    error!("Transport write failed: {err}");
                    return;
                }
                if let Err(err) = writer.flush().await {
                    error!("Transport flush failed: {err}");
                    return;
                }
            }
            let _ = writer.flush().await;
        });

        *self.reader_task.lock().expect("transport lock poisoned") = Some(reader_handle);
        *self.writer_task.lock().expect("transport lock poisoned") = Some(writer_handle);
        Ok(events_rx)
    }

    /// Serialize and write one message. Ordered by submission; suspends when
    /// the outbound queue is full. Silently dropped after close.
    pub async fn send(&self, message: Value) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        let tx = self
            .outbound_tx
            .lock()
            .expect("transport lock poisoned")
            .clone()
            .ok_or(TransportError::NotStarted)?;
        // A send error means the writer is gone, which only happens on
        // close; match the writes-after-close contract.
        let _ = tx.send(message).await;
        Ok(())
    }

    /// Stop reading, flush pending writes, emit `Closed` exactly once.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(reader) = self.reader_task.lock().expect("transport lock poisoned").take() {
            reader.abort();
        }
        // Dropping the sender lets the writer drain its queue and finish.
        self.outbound_tx.lock().expect("transport lock poisoned").take();
        let writer = self.writer_task.lock().expect("transport lock poisoned").take();
        if let Some(writer) = writer {
            let _ = writer.await;
        }
        if !self.closed_event_sent.swap(true, Ordering::SeqCst) {
            let tx = self.events_tx.lock().expect("transport lock poisoned").clone();
            if let Some(tx) = tx {
                let _ = tx.send(TransportEvent::Closed).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn drain(decoder: &mut FrameDecoder) -> Vec<Decoded> {
        let mut out = Vec::new();
        while let Some(item) = decoder.next_frame() {
            out.push(item);
        }
        out
    }

    #[test]
    fn content_length_counts_utf8_bytes() {
        // Four CJK code points at three bytes each: 8 characters but 20 bytes.
        let body = r#"{"s":"你好世界"}"#;
        assert_eq!(body.chars().count(), 12);
        assert_eq!(body.len(), 20);
        let mut decoder = FrameDecoder::new();
        decoder.push(format!("Content-Length: {}\r\n\r\n{}", body.len(), body).as_bytes());

        let frames = drain(&mut decoder);
        assert_eq!(frames.len(), 1);
        match &frames[0] {
            Decoded::Frame(value) => assert_eq!(value["s"], "你好世界"),
            other => panic!("expected frame, got {other:?}"),
        }
    }

    #[test]
    fn frames_survive_arbitrary_splits() {
        let body = r#"{"method":"ping","id":1}"#;
        let wire = format!("Content-Length: {}\r\n\r\n{}", body.len(), body);
        // Feed one byte at a time; nothing must surface before completion.
        let mut decoder = FrameDecoder::new();
        let bytes = wire.as_bytes();
        for (i, byte) in bytes.iter().enumerate() {
            decoder.push(std::slice::from_ref(byte));
            if i < bytes.len() - 1 {
                assert!(decoder.next_frame().is_none(), "partial frame surfaced at {i}");
            }
        }
        match decoder.next_frame() {
            Some(Decoded::Frame(value)) => assert_eq!(value["method"], "ping"),
            other => panic!("expected frame, got {other:?}"),
        }
    }

    #[test]
    fn both_framings_interleave_in_one_session() {
        let mut decoder = FrameDecoder::new();
        decoder.push(b"{\"a\":1}\n");
        decoder.push(b"Content-Length: 7\r\n\r\n{\"b\":2}");
        decoder.push(b"\r\n{\"c\":3}\r\n");

        let frames = drain(&mut decoder);
        assert_eq!(frames.len(), 3);
        assert!(matches!(&frames[0], Decoded::Frame(v) if v["a"] == 1));
        assert!(matches!(&frames[1], Decoded::Frame(v) if v["b"] == 2));
        assert!(matches!(&frames[2], Decoded::Frame(v) if v["c"] == 3));
    }

    #[test]
    fn malformed_json_does_not_break_the_session() {
        let mut decoder = FrameDecoder::new();
        decoder.push(b"{not json}\n{\"ok\":true}\n");

        let frames = drain(&mut decoder);
        assert_eq!(frames.len(), 2);
        assert!(matches!(&frames[0], Decoded::Error(FrameError::Parse(_))));
        assert!(matches!(&frames[1], Decoded::Frame(v) if v["ok"] == true));
    }

    #[test]
    fn bad_content_length_skips_only_the_header_line() {
        let mut decoder = FrameDecoder::new();
        decoder.push(b"Content-Length: banana\r\n\r\n{\"next\":1}\n");

        let frames = drain(&mut decoder);
        assert!(matches!(&frames[0], Decoded::Error(FrameError::BadContentLength(_))));
        // The remainder of the buffer resumed framing detection.
        assert!(matches!(&frames[1], Decoded::Frame(v) if v["next"] == 1));
    }

    #[test]
    fn single_byte_never_commits_a_framing() {
        let mut decoder = FrameDecoder::new();
        decoder.push(b"C");
        assert!(decoder.next_frame().is_none());
        decoder.push(b"ontent-Length: 2\r\n\r\n{}");
        assert!(matches!(decoder.next_frame(), Some(Decoded::Frame(_))));
    }

    #[test]
    fn empty_lines_are_ignored() {
        let mut decoder = FrameDecoder::new();
        decoder.push(b"\n\r\n{\"x\":1}\n\n");
        let frames = drain(&mut decoder);
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn encode_round_trips_both_framings() {
        let message = json!({"result": {"text": "naïve 旗 🚀"}, "id": 9});
        for framing in [OutputFraming::ContentLength, OutputFraming::Newline] {
            let mut decoder = FrameDecoder::new();
            decoder.push(&framing.encode(&message));
            match decoder.next_frame() {
                Some(Decoded::Frame(value)) => assert_eq!(value, message),
                other => panic!("{framing:?}: expected frame, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn transport_reads_and_writes_over_a_duplex_stream() {
        let (client, server) = tokio::io::duplex(4096);
        let (client_read, mut client_write) = tokio::io::split(client);
        let (server_read, server_write) = tokio::io::split(server);
        let _ = client_read;

        let transport = Transport::new(server_read, server_write, OutputFraming::ContentLength);
        let mut events = transport.start().unwrap();

        client_write
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n")
            .await
            .unwrap();

        match events.recv().await {
            Some(TransportEvent::Message(value)) => assert_eq!(value["method"], "ping"),
            other => panic!("expected message, got {other:?}"),
        }

        drop(client_write);
        match events.recv().await {
            Some(TransportEvent::Closed) => {}
            other => panic!("expected closed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn second_start_fails() {
        let (_client, server) = tokio::io::duplex(64);
        let (read, write) = tokio::io::split(server);
        let transport = Transport::new(read, write, OutputFraming::Newline);
        let _events = transport.start().unwrap();
        assert!(matches!(
            transport.start(),
            Err(TransportError::AlreadyStarted)
        ));
    }

    #[tokio::test]
    async fn sends_after_close_are_dropped() {
        let (_client, server) = tokio::io::duplex(64);
        let (read, write) = tokio::io::split(server);
        let transport = Transport::new(read, write, OutputFraming::Newline);
        let mut events = transport.start().unwrap();

        transport.close().await;
        transport.send(json!({"late": true})).await.unwrap();

        match events.recv().await {
            Some(TransportEvent::Closed) => {}
            other => panic!("expected closed, got {other:?}"),
        }
    }
}
