//! Supervision of the external trading bot process.
//!
//! A single control task owns [`BotState`] and the child handle. Commands from
//! [`ProcessSupervisor`] handles and events from the child (output chunks,
//! exit, failure) arrive on one channel and are applied one at a time, so the
//! running check in `start` and the transition that follows cannot interleave
//! with any other mutation.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::launch::LaunchSpec;
use crate::state::BotState;
use crate::types::{BotMode, BotStatus, StatusSnapshot};

const EVENT_QUEUE_SIZE: usize = 256;
const READ_CHUNK_SIZE: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SupervisorError {
    /// The request does not fit the current lifecycle state. Nothing changed.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// The control loop is gone.
    #[error("supervisor is no longer running")]
    Stopped,
}

enum Request {
    Start {
        mode: BotMode,
        reply: oneshot::Sender<Result<(), SupervisorError>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    SendInput {
        text: String,
        reply: oneshot::Sender<Result<(), SupervisorError>>,
    },
    Status {
        reply: oneshot::Sender<StatusSnapshot>,
    },
    Logs {
        reply: oneshot::Sender<Vec<String>>,
    },
}

#[derive(Debug)]
enum ChildEvent {
    Stdout(String),
    Stderr(String),
    Exited(Option<i32>),
    Failed(String),
}

enum Event {
    Request(Request),
    Child { run: u64, event: ChildEvent },
}

#[derive(Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

/// Handle to the supervisor control loop. Cheap to clone; the loop ends once
/// every handle is dropped and the child has been released.
#[derive(Clone)]
pub struct ProcessSupervisor {
    tx: mpsc::Sender<Event>,
}

impl ProcessSupervisor {
    /// Start the control loop on the current tokio runtime.
    pub fn spawn(launch: LaunchSpec, log_capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_SIZE);
        let control = ControlLoop {
            state: BotState::new(log_capacity),
            launch,
            child: None,
            next_run: 0,
            events: tx.downgrade(),
            rx,
        };
        tokio::spawn(control.run());
        Self { tx }
    }

    /// Launch the bot in `mode`.
    ///
    /// Fails with `InvalidState` if a process is already running. A process
    /// that cannot be spawned is not an error here: it shows up afterwards as
    /// `BotStatus::Error` plus a log line.
    pub async fn start(&self, mode: BotMode) -> Result<(), SupervisorError> {
        self.request(|reply| Request::Start { mode, reply }).await?
    }

    /// Ask the running process to terminate. Status changes only when it exits.
    pub async fn stop(&self) -> Result<(), SupervisorError> {
        self.request(|reply| Request::Stop { reply }).await
    }

    /// Write `text` plus a newline to the process's stdin.
    pub async fn send_input(&self, text: &str) -> Result<(), SupervisorError> {
        let text = text.to_string();
        self.request(|reply| Request::SendInput { text, reply }).await?
    }

    pub async fn status(&self) -> Result<StatusSnapshot, SupervisorError> {
        self.request(|reply| Request::Status { reply }).await
    }

    /// Buffered log lines, oldest first.
    pub async fn logs(&self) -> Result<Vec<String>, SupervisorError> {
        self.request(|reply| Request::Logs { reply }).await
    }

    /// Poll until the status is no longer `Running`, or `limit` elapses.
    pub async fn wait_until_stopped(
        &self,
        limit: Duration,
    ) -> Result<StatusSnapshot, SupervisorError> {
        let poll = async {
            loop {
                let snap = self.status().await?;
                if snap.status != BotStatus::Running {
                    return Ok(snap);
                }
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
        };
        match tokio::time::timeout(limit, poll).await {
            Ok(result) => result,
            Err(_) => self.status().await,
        }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Request,
    ) -> Result<T, SupervisorError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Event::Request(build(reply)))
            .await
            .map_err(|_| SupervisorError::Stopped)?;
        rx.await.map_err(|_| SupervisorError::Stopped)
    }
}

/// The process currently owned by the control loop.
struct OwnedChild {
    run: u64,
    input: mpsc::UnboundedSender<String>,
    kill: mpsc::Sender<()>,
}

struct ControlLoop {
    state: BotState,
    launch: LaunchSpec,
    child: Option<OwnedChild>,
    next_run: u64,
    events: mpsc::WeakSender<Event>,
    rx: mpsc::Receiver<Event>,
}

impl ControlLoop {
    async fn run(mut self) {
        debug!("Supervisor loop running");
        while let Some(event) = self.rx.recv().await {
            match event {
                Event::Request(request) => self.handle_request(request),
                Event::Child { run, event } => self.handle_child_event(run, event),
            }
        }
        debug!("Supervisor loop finished");
    }

    fn log(&mut self, message: &str) {
        debug!(target: "bot", "{message}");
        self.state.logs.append(message);
    }

    fn handle_request(&mut self, request: Request) {
        match request {
            Request::Start { mode, reply } => {
                let spawn_error = match self.start(mode) {
                    Ok(spawn_error) => {
                        let _ = reply.send(Ok(()));
                        spawn_error
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e));
                        None
                    }
                };
                // Reported after the caller has been answered.
                if let Some(reason) = spawn_error {
                    self.fail(&reason);
                }
            }
            Request::Stop { reply } => {
                self.stop();
                let _ = reply.send(());
            }
            Request::SendInput { text, reply } => {
                let _ = reply.send(self.send_input(text));
            }
            Request::Status { reply } => {
                let _ = reply.send(self.state.snapshot());
            }
            Request::Logs { reply } => {
                let _ = reply.send(self.state.logs.lines());
            }
        }
    }

    /// Returns the failure reason when the spawn itself failed.
    fn start(&mut self, mode: BotMode) -> Result<Option<String>, SupervisorError> {
        if self.state.is_running() {
            return Err(SupervisorError::InvalidState(
                "Bot is already running".to_string(),
            ));
        }

        self.next_run += 1;
        let run = self.next_run;
        let args = self.launch.args(mode);
        let command_line = self.launch.display_command(mode);
        self.log(&format!("Starting bot with command: {command_line}"));

        let mut cmd = Command::new(&self.launch.interpreter);
        cmd.args(&args)
            .current_dir(&self.launch.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some((name, value)) = &self.launch.path_hint {
            cmd.env(name, value);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => return Ok(Some(format!("Failed to start bot: {e}"))),
        };

        let Some(events) = self.events.upgrade() else {
            // Every handle is gone; nobody can observe or stop this child.
            let _ = child.start_kill();
            return Ok(Some("Failed to start bot: supervisor is shutting down".to_string()));
        };

        let pid = child.id();
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(pump(stdout, run, Stream::Stdout, events.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(pump(stderr, run, Stream::Stderr, events.clone())));
        }

        let (input, input_rx) = mpsc::unbounded_channel();
        match child.stdin.take() {
            Some(stdin) => {
                tokio::spawn(forward_input(stdin, input_rx));
            }
            // Receiver dropped here, so `send_input` sees a closed stdin.
            None => drop(input_rx),
        }

        let (kill, kill_rx) = mpsc::channel(1);
        tokio::spawn(watch(child, run, kill_rx, readers, events));

        self.child = Some(OwnedChild { run, input, kill });
        self.state.mark_running(pid, mode);
        info!("Bot started in {mode} mode (pid {pid:?})");
        Ok(None)
    }

    fn stop(&mut self) {
        let Some(kill) = self.child.as_ref().map(|c| c.kill.clone()) else {
            self.log("No bot process running to stop.");
            return;
        };
        self.log("Stopping bot process...");
        info!("Stop signal requested");
        // A full queue means a signal is already pending.
        let _ = kill.try_send(());
    }

    fn send_input(&mut self, text: String) -> Result<(), SupervisorError> {
        let closed = || {
            SupervisorError::InvalidState("No bot process running or stdin is closed".to_string())
        };
        let input = match &self.child {
            Some(child) if !child.input.is_closed() => child.input.clone(),
            _ => return Err(closed()),
        };
        self.log(&format!("Sending input: {text}"));
        input.send(text).map_err(|_| closed())
    }

    fn handle_child_event(&mut self, run: u64, event: ChildEvent) {
        if self.child.as_ref().map(|c| c.run) != Some(run) {
            debug!("Dropping event from finished run {run}: {event:?}");
            return;
        }

        match event {
            ChildEvent::Stdout(text) => self.log(&text),
            ChildEvent::Stderr(text) => self.log(&format!("Error: {text}")),
            ChildEvent::Exited(code) => {
                match code {
                    Some(code) => self.log(&format!("Bot process exited with code {code}")),
                    None => self.log("Bot process exited with code null (terminated by signal)"),
                }
                info!("Bot process exited (code {code:?})");
                self.state.mark_exited();
                self.child = None;
            }
            ChildEvent::Failed(reason) => self.fail(&reason),
        }
    }

    /// Spawn or runtime failure: record it and release the child.
    fn fail(&mut self, reason: &str) {
        warn!("{reason}");
        self.log(reason);
        self.state.mark_failed();
        self.child = None;
    }
}

/// Forward each output chunk from one child stream as a log event.
async fn pump<R>(mut reader: R, run: u64, stream: Stream, events: mpsc::Sender<Event>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    let mut pending = Vec::new();
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                warn!("Failed reading bot output: {e}");
                break;
            }
        };
        let text = decode_chunk(&mut pending, &buf[..n]);
        if !send_chunk(&events, run, stream, &text).await {
            return;
        }
    }
    if !pending.is_empty() {
        let text = String::from_utf8_lossy(&pending);
        send_chunk(&events, run, stream, &text).await;
    }
}

/// Returns false once the control loop is gone.
async fn send_chunk(events: &mpsc::Sender<Event>, run: u64, stream: Stream, text: &str) -> bool {
    let text = text.trim_end();
    if text.is_empty() {
        return true;
    }
    let event = match stream {
        Stream::Stdout => ChildEvent::Stdout(text.to_string()),
        Stream::Stderr => ChildEvent::Stderr(text.to_string()),
    };
    events.send(Event::Child { run, event }).await.is_ok()
}

/// Decode `bytes` behind whatever partial character the previous read left
/// in `pending`. An incomplete UTF-8 sequence at the end is held back for the
/// next read; invalid bytes become U+FFFD.
fn decode_chunk(pending: &mut Vec<u8>, bytes: &[u8]) -> String {
    pending.extend_from_slice(bytes);
    let keep = incomplete_tail(pending);
    let tail = pending.split_off(pending.len() - keep);
    let text = String::from_utf8_lossy(pending).into_owned();
    *pending = tail;
    text
}

/// Length of a truncated multi-byte sequence at the end of `bytes`, or 0.
fn incomplete_tail(bytes: &[u8]) -> usize {
    let len = bytes.len();
    for i in (len.saturating_sub(3)..len).rev() {
        let b = bytes[i];
        if b & 0xC0 == 0x80 {
            continue;
        }
        let width = match b {
            0xC2..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF4 => 4,
            _ => 1,
        };
        return if len - i < width { len - i } else { 0 };
    }
    0
}

async fn forward_input(mut stdin: ChildStdin, mut input: mpsc::UnboundedReceiver<String>) {
    while let Some(text) = input.recv().await {
        let line = format!("{text}\n");
        if let Err(e) = stdin.write_all(line.as_bytes()).await {
            warn!("Failed writing to bot stdin: {e}");
            break;
        }
        if let Err(e) = stdin.flush().await {
            warn!("Failed flushing bot stdin: {e}");
            break;
        }
    }
}

/// Ask the child to exit with SIGTERM. The child may handle or ignore it.
#[cfg(unix)]
fn terminate(child: &mut Child) -> std::io::Result<()> {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    // No pid means the child has already been reaped.
    let Some(pid) = child.id() else {
        return Ok(());
    };
    kill(Pid::from_raw(pid as i32), Signal::SIGTERM)?;
    Ok(())
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) -> std::io::Result<()> {
    child.start_kill()
}

/// Wait for the child to exit, relaying stop requests, then report the exit
/// once both output streams are drained.
async fn watch(
    mut child: Child,
    run: u64,
    mut kill: mpsc::Receiver<()>,
    readers: Vec<JoinHandle<()>>,
    events: mpsc::Sender<Event>,
) {
    let status = loop {
        tokio::select! {
            status = child.wait() => break status,
            Some(()) = kill.recv() => {
                if let Err(e) = terminate(&mut child) {
                    warn!("Failed to signal bot process: {e}");
                }
            }
        }
    };

    let event = match status {
        Ok(status) => {
            for reader in readers {
                let _ = reader.await;
            }
            ChildEvent::Exited(status.code())
        }
        Err(e) => ChildEvent::Failed(format!("Bot process error: {e}")),
    };
    let _ = events.send(Event::Child { run, event }).await;
}
