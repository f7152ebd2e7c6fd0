//! Bridges one websocket connection to one shell running in a pty.
//!
//! A session runs three concurrent units while active: the outbound pump
//! (pty output to socket), the inbound pump (socket messages to pty input
//! and resize), and, where the platform exposes the shell process, an exit
//! watcher that ends the session as soon as the shell exits. All of them
//! share one cancellation token; whichever side finishes first cancels it.

use std::fmt::Display;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::{SessionId, SessionState, SessionTracker};
use crate::api::types::{TerminalInput, TerminalOutput};
use crate::pty::{
    AsyncPtyReader, AsyncPtyWriter, NativePty, ProcessHandle, PtySession, PtySize, Utf8Carry,
};

const CHANNEL_CAPACITY: usize = 64;

/// How long output still in flight is forwarded after the session ends.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// How long a hung-up shell gets to exit before it is killed outright.
const HANGUP_GRACE: Duration = Duration::from_millis(250);

/// How long teardown waits for the pty input side to be released.
const WRITER_RELEASE_TIMEOUT: Duration = Duration::from_secs(2);

/// Bookkeeping for one terminal session.
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub state: SessionState,
    pub pid: Option<u32>,
    pub created_at: Instant,
}

impl Session {
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            state: SessionState::Connecting,
            pid: None,
            created_at: Instant::now(),
        }
    }

    fn advance(&mut self, target: SessionState) {
        if let Err(e) = self.state.transition_to(target) {
            warn!("Session {}: {}", self.id, e);
        }
    }
}

/// Why the inbound pump stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The client sent a close frame or the stream ended.
    ClientClosed,
    /// A message could not be decoded.
    DecodeFailed,
    /// The transport reported an error.
    TransportError,
    /// The pty input side is gone.
    PtyInputClosed,
    /// The session token was cancelled (shell exit, output end, shutdown).
    Cancelled,
}

/// Starts and runs terminal sessions.
#[derive(Clone)]
pub struct SessionBridge {
    shell: String,
    cwd: PathBuf,
    tracker: Arc<SessionTracker>,
    shutdown: CancellationToken,
}

impl SessionBridge {
    pub fn new(
        shell: impl Into<String>,
        cwd: impl Into<PathBuf>,
        tracker: Arc<SessionTracker>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            shell: shell.into(),
            cwd: cwd.into(),
            tracker,
            shutdown,
        }
    }

    pub fn tracker(&self) -> &Arc<SessionTracker> {
        &self.tracker
    }

    /// Run one session over an upgraded websocket until either side ends.
    pub async fn run(&self, socket: WebSocket) {
        let mut session = Session::new(self.tracker.next_id());

        let pty = match NativePty::new().start(&self.shell, &self.cwd, PtySize::default()) {
            Ok(pty) => pty,
            Err(e) => {
                error!("Failed to start PTY for session {}: {}", session.id, e);
                session.advance(SessionState::Closed);
                let mut socket = socket;
                let _ = socket
                    .send(Message::Close(Some(CloseFrame {
                        code: close_code::ERROR,
                        reason: "failed to start shell".into(),
                    })))
                    .await;
                return;
            }
        };

        let (mut sink, stream) = socket.split();

        let info = TerminalOutput::TerminalInfo {
            hostname: host_name(),
            cwd: self.cwd.display().to_string(),
        };
        if let Ok(json) = serde_json::to_string(&info) {
            // best effort; a dead socket is noticed by the pumps
            let _ = sink.send(Message::Text(json.into())).await;
        }

        let active_guard = self.tracker.activate();
        session.pid = pty.process.pid();
        session.advance(SessionState::Active);
        info!(
            "Client {} (PID: {:?}) connected (active: {})",
            session.id,
            session.pid,
            self.tracker.active_count()
        );

        let token = self.shutdown.child_token();
        let PtySession {
            reader,
            writer,
            resizer,
            process,
        } = pty;

        let (output_tx, output_rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(AsyncPtyReader::new(reader, output_tx).run());

        let (input_tx, input_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let writer_task = tokio::spawn(AsyncPtyWriter::new(writer, input_rx).run());

        // cancelled once the shell has been reaped
        let exited = CancellationToken::new();
        let killer = match process {
            ProcessHandle::Available(child) => {
                let killer = child.killer();
                let exit_token = token.clone();
                let reaped = exited.clone();
                let id = session.id;
                tokio::task::spawn_blocking(move || {
                    match child.wait() {
                        Ok(status) => debug!("Session {} shell exited: {:?}", id, status),
                        Err(e) => debug!("Session {} wait failed: {}", id, e),
                    }
                    reaped.cancel();
                    exit_token.cancel();
                });
                Some(killer)
            }
            // the closed output stream is the only exit signal here
            ProcessHandle::Unavailable => None,
        };

        let outbound = tokio::spawn(outbound_pump(output_rx, sink, token.clone()));
        let reason = inbound_pump(
            stream,
            input_tx,
            |size| resizer.resize(size),
            token.clone(),
        )
        .await;

        session.advance(SessionState::Closing);
        debug!("Session {} closing: {:?}", session.id, reason);
        token.cancel();

        if let Some(mut killer) = killer {
            if let Err(e) = killer.kill() {
                trace!("Session {} kill: {}", session.id, e);
            }
            // a shell ignoring SIGHUP is still unreaped here, so its pid is still ours
            if tokio::time::timeout(HANGUP_GRACE, exited.cancelled())
                .await
                .is_err()
            {
                debug!("Session {} shell ignored hangup, killing", session.id);
                force_kill(session.pid);
            }
        }
        resizer.close();

        if let Err(e) = outbound.await {
            error!("Session {} outbound pump panicked: {}", session.id, e);
        }
        if tokio::time::timeout(WRITER_RELEASE_TIMEOUT, writer_task)
            .await
            .is_err()
        {
            warn!("Session {} pty writer did not finish in time", session.id);
        }

        session.advance(SessionState::Closed);
        drop(active_guard);
        info!(
            "Client {} (PID: {:?}) disconnected after {:.1}s (active: {})",
            session.id,
            session.pid,
            session.created_at.elapsed().as_secs_f64(),
            self.tracker.active_count()
        );
    }
}

/// Machine hostname for the session banner.
pub fn host_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Forward pty output to the socket until the output ends or the session is
/// cancelled, then close the socket.
///
/// After a cancellation, output already produced by the shell is still
/// forwarded for a short grace period.
pub(crate) async fn outbound_pump<S>(
    mut output: mpsc::Receiver<Vec<u8>>,
    mut sink: S,
    token: CancellationToken,
) where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let mut carry = Utf8Carry::new();
    let mut writable = true;

    loop {
        let chunk = tokio::select! {
            biased;
            chunk = output.recv() => chunk,
            _ = token.cancelled() => break,
        };
        match chunk {
            Some(bytes) => {
                if !forward(&mut sink, &mut carry, &bytes).await {
                    writable = false;
                    break;
                }
            }
            None => {
                debug!("PTY output closed");
                break;
            }
        }
    }

    token.cancel();
    if writable {
        let drained = tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, async {
            while let Some(bytes) = output.recv().await {
                if !forward(&mut sink, &mut carry, &bytes).await {
                    return false;
                }
            }
            true
        })
        .await;
        if drained != Ok(false) {
            if let Some(rest) = carry.finish() {
                let _ = sink.send(Message::Text(rest.into())).await;
            }
        }
    }

    let _ = sink
        .send(Message::Close(Some(CloseFrame {
            code: close_code::NORMAL,
            reason: "session ended".into(),
        })))
        .await;
    let _ = sink.close().await;
}

/// Kill a shell that survived its hangup.
#[cfg(unix)]
fn force_kill(pid: Option<u32>) {
    if let Some(pid) = pid.and_then(|pid| libc::pid_t::try_from(pid).ok()) {
        // SAFETY: kill(2) takes no pointers
        unsafe {
            libc::kill(pid, libc::SIGKILL);
        }
    }
}

// the platform killer already terminates the process outright
#[cfg(not(unix))]
fn force_kill(_pid: Option<u32>) {}

/// Send the complete UTF-8 prefix of `bytes`. Returns false once the socket
/// is unusable.
async fn forward<S>(sink: &mut S, carry: &mut Utf8Carry, bytes: &[u8]) -> bool
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let text = carry.push(bytes);
    if text.is_empty() {
        return true;
    }
    match sink.send(Message::Text(text.into())).await {
        Ok(()) => true,
        Err(e) => {
            debug!("Terminal socket write failed: {}", e);
            false
        }
    }
}

/// Decode client messages and apply them to the pty until the client goes
/// away, sends something undecodable, or the session is cancelled.
pub(crate) async fn inbound_pump<S, E, F>(
    mut stream: S,
    input: mpsc::Sender<Vec<u8>>,
    resize: F,
    token: CancellationToken,
) -> CloseReason
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
    F: Fn(PtySize),
{
    loop {
        let msg = tokio::select! {
            msg = stream.next() => msg,
            _ = token.cancelled() => return CloseReason::Cancelled,
        };

        let decoded = match msg {
            Some(Ok(Message::Text(text))) => serde_json::from_str::<TerminalInput>(text.as_str()),
            Some(Ok(Message::Binary(data))) => serde_json::from_slice::<TerminalInput>(&data),
            Some(Ok(Message::Close(_))) | None => return CloseReason::ClientClosed,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                debug!("Terminal socket read error: {}", e);
                return CloseReason::TransportError;
            }
        };

        match decoded {
            Ok(TerminalInput::Resize { cols, rows }) => {
                let size = PtySize::new(rows, cols);
                if size.is_empty() {
                    debug!("Ignoring resize to {}x{}", cols, rows);
                    continue;
                }
                resize(size);
            }
            Ok(TerminalInput::Data { content }) => {
                let sent = tokio::select! {
                    sent = input.send(content.into_bytes()) => sent.is_ok(),
                    _ = token.cancelled() => return CloseReason::Cancelled,
                };
                if !sent {
                    return CloseReason::PtyInputClosed;
                }
            }
            Ok(TerminalInput::Unknown) => trace!("Ignoring unknown terminal message"),
            Err(e) => {
                warn!("Malformed terminal message: {}", e);
                return CloseReason::DecodeFailed;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use std::convert::Infallible;
    use std::sync::Mutex;

    fn text(s: &str) -> Result<Message, Infallible> {
        Ok(Message::Text(s.to_string().into()))
    }

    #[tokio::test]
    async fn test_inbound_data_written_in_order() {
        let frames = stream::iter(vec![
            text(r#"{"type":"data","content":"ls"}"#),
            text(r#"{"type":"data","content":" -la\n"}"#),
        ]);
        let (tx, mut rx) = mpsc::channel(8);

        let reason = inbound_pump(frames, tx, |_| {}, CancellationToken::new()).await;
        assert_eq!(reason, CloseReason::ClientClosed);

        assert_eq!(rx.recv().await.unwrap(), b"ls");
        assert_eq!(rx.recv().await.unwrap(), b" -la\n");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_inbound_resize_before_output() {
        let frames = stream::iter(vec![
            text(r#"{"type":"resize","cols":132,"rows":50}"#),
            text(r#"{"type":"resize","cols":0,"rows":50}"#),
        ]);
        let (tx, _rx) = mpsc::channel(8);
        let sizes = Mutex::new(Vec::new());

        inbound_pump(
            frames,
            tx,
            |size| sizes.lock().unwrap().push(size),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(*sizes.lock().unwrap(), vec![PtySize::new(50, 132)]);
    }

    #[tokio::test]
    async fn test_inbound_binary_frame_decoded() {
        let frames = stream::iter(vec![Ok::<_, Infallible>(Message::Binary(
            br#"{"type":"data","content":"x"}"#.to_vec().into(),
        ))]);
        let (tx, mut rx) = mpsc::channel(8);

        inbound_pump(frames, tx, |_| {}, CancellationToken::new()).await;
        assert_eq!(rx.recv().await.unwrap(), b"x");
    }

    #[tokio::test]
    async fn test_inbound_malformed_message_closes() {
        let frames = stream::iter(vec![
            text("not json"),
            text(r#"{"type":"data","content":"never"}"#),
        ]);
        let (tx, mut rx) = mpsc::channel(8);

        let reason = inbound_pump(frames, tx, |_| {}, CancellationToken::new()).await;
        assert_eq!(reason, CloseReason::DecodeFailed);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_inbound_unknown_type_ignored() {
        let frames = stream::iter(vec![
            text(r#"{"type":"ping"}"#),
            text(r#"{"type":"data","content":"ok"}"#),
        ]);
        let (tx, mut rx) = mpsc::channel(8);

        let reason = inbound_pump(frames, tx, |_| {}, CancellationToken::new()).await;
        assert_eq!(reason, CloseReason::ClientClosed);
        assert_eq!(rx.recv().await.unwrap(), b"ok");
    }

    #[tokio::test]
    async fn test_inbound_stops_on_cancel() {
        let token = CancellationToken::new();
        token.cancel();
        let (tx, _rx) = mpsc::channel(8);

        let pending = stream::pending::<Result<Message, Infallible>>();
        let reason = inbound_pump(pending, tx, |_| {}, token).await;
        assert_eq!(reason, CloseReason::Cancelled);
    }

    #[tokio::test]
    async fn test_outbound_forwards_then_closes() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(b"hello ".to_vec()).await.unwrap();
        tx.send("wörld".as_bytes().to_vec()).await.unwrap();
        drop(tx);

        let token = CancellationToken::new();
        let mut sent: Vec<Message> = Vec::new();
        outbound_pump(rx, &mut sent, token.clone()).await;

        assert!(token.is_cancelled(), "end of output must end the session");
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0], Message::Text("hello ".into()));
        assert_eq!(sent[1], Message::Text("wörld".into()));
        assert!(matches!(sent[2], Message::Close(_)));
    }

    #[tokio::test]
    async fn test_outbound_stops_on_cancel() {
        let (_tx, rx) = mpsc::channel::<Vec<u8>>(8);
        let token = CancellationToken::new();
        token.cancel();

        let mut sent: Vec<Message> = Vec::new();
        outbound_pump(rx, &mut sent, token).await;
        assert_eq!(sent.len(), 1);
        assert!(matches!(sent[0], Message::Close(_)));
    }

    #[tokio::test]
    async fn test_outbound_forwards_output_arriving_after_cancel() {
        let (tx, rx) = mpsc::channel(8);
        let token = CancellationToken::new();
        token.cancel();

        let late = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            tx.send(b"logout\r\n".to_vec()).await.unwrap();
        });

        let mut sent: Vec<Message> = Vec::new();
        outbound_pump(rx, &mut sent, token).await;
        late.await.unwrap();

        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], Message::Text("logout\r\n".into()));
        assert!(matches!(sent[1], Message::Close(_)));
    }

    #[test]
    fn test_host_name_not_empty() {
        assert!(!host_name().is_empty());
    }
}
