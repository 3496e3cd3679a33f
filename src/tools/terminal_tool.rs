use crate::bridge::events::EventSender;
use crate::bridge::messages::{HostEvent, SessionId};
use crate::config::Config;
use crate::error::AppError;
use crate::tools::shell::terminal_shell;
use crate::utils::path_utils::{home_dir_from_env, terminal_working_dir};
use crate::utils::utf8_stream::Utf8Decoder;
use chrono::Utc;
use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use serde::Serialize;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, trace, warn};

pub const DEFAULT_COLS: u16 = 80;
pub const DEFAULT_ROWS: u16 = 24;
const READ_BUFFER_SIZE: usize = 4096;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalInfo {
    pub session_id: SessionId,
    pub pid: Option<u32>,
    pub cwd: String,
    pub shell: String,
    pub cols: u16,
    pub rows: u16,
    pub started_at: String,
}

type SharedMaster = Arc<Mutex<Box<dyn MasterPty + Send>>>;

struct TerminalSession {
    info: TerminalInfo,
    input_tx: mpsc::UnboundedSender<Vec<u8>>,
    master: SharedMaster,
    killer: Box<dyn ChildKiller + Send + Sync>,
}

type SessionMap = Arc<Mutex<HashMap<SessionId, TerminalSession>>>;

fn lock_sessions(sessions: &SessionMap) -> std::sync::MutexGuard<'_, HashMap<SessionId, TerminalSession>> {
    sessions.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Live pseudo-terminal sessions keyed by a Host-allocated id.
pub struct TerminalRegistry {
    config: Arc<Config>,
    events: EventSender,
    next_id: AtomicU32,
    sessions: SessionMap,
}

impl TerminalRegistry {
    pub fn new(config: Arc<Config>, events: EventSender) -> Self {
        Self {
            config,
            events,
            next_id: AtomicU32::new(1),
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    #[instrument(skip(self))]
    pub async fn create(&self, cwd: Option<&str>) -> Result<SessionId, AppError> {
        let shell = terminal_shell(self.config.default_shell.as_deref());
        let work_dir = terminal_working_dir(cwd, home_dir_from_env())?;

        let pair = native_pty_system()
            .openpty(PtySize {
                rows: DEFAULT_ROWS,
                cols: DEFAULT_COLS,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| {
                error!(error = %e, "Failed to open pty");
                AppError::SpawnFailed(format!("Failed to open pty: {}", e))
            })?;

        let mut cmd = CommandBuilder::new(&shell.program);
        cmd.args(&shell.args);
        cmd.cwd(&work_dir);
        cmd.env("TERM", "xterm-256color");

        debug!(shell = %shell.program, cwd = %work_dir.display(), "Spawning terminal shell");
        let mut child = pair.slave.spawn_command(cmd).map_err(|e| {
            error!(error = %e, shell = %shell.program, "Failed to spawn terminal shell");
            AppError::SpawnFailed(format!("Failed to spawn shell '{}': {}", shell.program, e))
        })?;
        // The child owns its copy of the slave; ours would keep the reader from seeing EOF.
        drop(pair.slave);

        let pid = child.process_id();
        let mut killer = child.clone_killer();

        let io = pair
            .master
            .try_clone_reader()
            .and_then(|reader| pair.master.take_writer().map(|writer| (reader, writer)));
        let (reader, writer) = match io {
            Ok(io) => io,
            Err(e) => {
                let _ = killer.kill();
                error!(error = %e, "Failed to attach to pty streams");
                return Err(AppError::SpawnFailed(format!("Failed to attach to pty: {}", e)));
            }
        };

        let session_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (output_tx, output_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let (input_tx, input_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let (exit_tx, exit_rx) = oneshot::channel::<i32>();

        let threads = spawn_reader(session_id, reader, output_tx)
            .and_then(|_| spawn_writer(session_id, writer, input_rx))
            .and_then(|_| {
                thread::Builder::new()
                    .name(format!("pty-wait-{}", session_id))
                    .spawn(move || {
                        let code = match child.wait() {
                            Ok(status) => status.exit_code() as i32,
                            Err(e) => {
                                warn!(session_id, error = %e, "Failed to wait for terminal shell");
                                -1
                            }
                        };
                        let _ = exit_tx.send(code);
                    })
                    .map(|_| ())
            });
        if let Err(e) = threads {
            let _ = killer.kill();
            error!(session_id, error = %e, "Failed to start pty I/O threads");
            return Err(AppError::SpawnFailed(format!("Failed to start pty I/O: {}", e)));
        }

        let info = TerminalInfo {
            session_id,
            pid,
            cwd: work_dir.to_string_lossy().into_owned(),
            shell: shell.program.clone(),
            cols: DEFAULT_COLS,
            rows: DEFAULT_ROWS,
            started_at: Utc::now().to_rfc3339(),
        };
        lock_sessions(&self.sessions).insert(
            session_id,
            TerminalSession {
                info,
                input_tx,
                master: Arc::new(Mutex::new(pair.master)),
                killer,
            },
        );

        tokio::spawn(pump_session(
            session_id,
            output_rx,
            exit_rx,
            self.sessions.clone(),
            self.events.clone(),
            self.config.output_drain_grace,
        ));

        info!(session_id, pid = ?pid, shell = %shell.program, cwd = %work_dir.display(), "Terminal session created");
        Ok(session_id)
    }

    /// Queues keystrokes for the session. Unknown ids are ignored.
    pub fn write(&self, session_id: SessionId, data: &str) {
        let sessions = lock_sessions(&self.sessions);
        match sessions.get(&session_id) {
            Some(session) => {
                if session.input_tx.send(data.as_bytes().to_vec()).is_err() {
                    debug!(session_id, "Terminal input queue closed; dropping write");
                }
            }
            None => debug!(session_id, "Write to unknown terminal session dropped"),
        }
    }

    /// Resizes the pty. Failures are logged only; geometry races are expected.
    #[instrument(skip(self))]
    pub fn resize(&self, session_id: SessionId, cols: u16, rows: u16) {
        let master = match lock_sessions(&self.sessions).get(&session_id) {
            Some(session) => session.master.clone(),
            None => {
                debug!(session_id, "Resize of unknown terminal session ignored");
                return;
            }
        };

        let size = PtySize { rows, cols, pixel_width: 0, pixel_height: 0 };
        let result = master.lock().unwrap_or_else(PoisonError::into_inner).resize(size);
        match result {
            Ok(()) => {
                if let Some(session) = lock_sessions(&self.sessions).get_mut(&session_id) {
                    session.info.cols = cols;
                    session.info.rows = rows;
                }
                trace!(session_id, cols, rows, "Terminal resized");
            }
            Err(e) => warn!(session_id, cols, rows, error = %e, "Terminal resize failed"),
        }
    }

    /// Removes the session immediately and kills its process. The exit event
    /// still follows once the OS reports the process gone.
    #[instrument(skip(self))]
    pub fn dispose(&self, session_id: SessionId) {
        let removed = lock_sessions(&self.sessions).remove(&session_id);
        match removed {
            Some(session) => kill_session(session_id, session),
            None => debug!(session_id, "Dispose of unknown terminal session ignored"),
        }
    }

    pub fn dispose_all(&self) {
        let drained: Vec<(SessionId, TerminalSession)> = lock_sessions(&self.sessions).drain().collect();
        if !drained.is_empty() {
            info!(count = drained.len(), "Disposing all terminal sessions");
        }
        for (session_id, session) in drained {
            kill_session(session_id, session);
        }
    }

    pub fn list(&self) -> Vec<TerminalInfo> {
        let mut infos: Vec<TerminalInfo> = lock_sessions(&self.sessions)
            .values()
            .map(|s| s.info.clone())
            .collect();
        infos.sort_by_key(|info| info.session_id);
        infos
    }

    pub fn contains(&self, session_id: SessionId) -> bool {
        lock_sessions(&self.sessions).contains_key(&session_id)
    }
}

fn kill_session(session_id: SessionId, mut session: TerminalSession) {
    // Dropping the session closes the input queue, which ends the writer thread.
    if let Err(e) = session.killer.kill() {
        warn!(session_id, error = %e, "Failed to kill terminal process");
    } else {
        info!(session_id, pid = ?session.info.pid, "Terminal session disposed");
    }
}

fn spawn_reader(
    session_id: SessionId,
    mut reader: Box<dyn Read + Send>,
    output_tx: mpsc::UnboundedSender<Vec<u8>>,
) -> std::io::Result<()> {
    thread::Builder::new()
        .name(format!("pty-read-{}", session_id))
        .spawn(move || {
            let mut buf = [0u8; READ_BUFFER_SIZE];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if output_tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        // EIO once the slave side is gone is the normal end of stream on Linux.
                        debug!(session_id, error = %e, "Terminal reader stopped");
                        break;
                    }
                }
            }
            trace!(session_id, "Terminal reader thread finished");
        })
        .map(|_| ())
}

fn spawn_writer(
    session_id: SessionId,
    mut writer: Box<dyn Write + Send>,
    mut input_rx: mpsc::UnboundedReceiver<Vec<u8>>,
) -> std::io::Result<()> {
    thread::Builder::new()
        .name(format!("pty-write-{}", session_id))
        .spawn(move || {
            while let Some(bytes) = input_rx.blocking_recv() {
                if let Err(e) = writer.write_all(&bytes).and_then(|_| writer.flush()) {
                    debug!(session_id, error = %e, "Terminal write failed; input closed");
                    break;
                }
            }
            trace!(session_id, "Terminal writer thread finished");
        })
        .map(|_| ())
}

enum PumpStep {
    Chunk(Vec<u8>),
    ReaderClosed,
    Exited(i32),
}

fn emit_chunk(events: &EventSender, session_id: SessionId, decoder: &mut Utf8Decoder, bytes: &[u8]) {
    let chunk = decoder.decode(bytes);
    if !chunk.is_empty() {
        let _ = events.send(HostEvent::TerminalData { session_id, chunk });
    }
}

/// Forwards pty output as events, then retires the session exactly once.
async fn pump_session(
    session_id: SessionId,
    mut output_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    mut exit_rx: oneshot::Receiver<i32>,
    sessions: SessionMap,
    events: EventSender,
    drain_grace: Duration,
) {
    let mut decoder = Utf8Decoder::new();
    let exit_code = loop {
        let step = tokio::select! {
            biased;
            chunk = output_rx.recv() => match chunk {
                Some(bytes) => PumpStep::Chunk(bytes),
                None => PumpStep::ReaderClosed,
            },
            code = &mut exit_rx => PumpStep::Exited(code.unwrap_or(-1)),
        };
        match step {
            PumpStep::Chunk(bytes) => emit_chunk(&events, session_id, &mut decoder, &bytes),
            PumpStep::ReaderClosed => break (&mut exit_rx).await.unwrap_or(-1),
            PumpStep::Exited(code) => {
                let drained = timeout(drain_grace, async {
                    while let Some(bytes) = output_rx.recv().await {
                        emit_chunk(&events, session_id, &mut decoder, &bytes);
                    }
                })
                .await;
                if drained.is_err() {
                    debug!(session_id, "Terminal output still open after exit; stopped draining");
                }
                break code;
            }
        }
    };

    let tail = decoder.finish();
    if !tail.is_empty() {
        let _ = events.send(HostEvent::TerminalData { session_id, chunk: tail });
    }

    let was_live = lock_sessions(&sessions).remove(&session_id).is_some();
    info!(session_id, exit_code, was_live, "Terminal session exited");
    let _ = events.send(HostEvent::TerminalExit { session_id, exit_code });
}
