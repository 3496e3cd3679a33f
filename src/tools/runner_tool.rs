use crate::bridge::events::EventSender;
use crate::bridge::messages::{HostEvent, Pid};
use crate::config::Config;
use crate::error::AppError;
use crate::tools::shell::runner_shell;
use crate::utils::path_utils::runner_working_dir;
use crate::utils::utf8_stream::Utf8Decoder;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::process::Stdio as StdProcessStdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use sysinfo::{Signal, System};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command as TokioCommand};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

const READ_BUFFER_SIZE: usize = 4096;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerInfo {
    pub pid: Pid,
    pub command: String,
    pub cwd: String,
    pub started_at: String,
}

struct RunnerEntry {
    info: RunnerInfo,
    run_id: u64,
    kill_tx: oneshot::Sender<()>,
}

type RunnerMap = Arc<Mutex<HashMap<Pid, RunnerEntry>>>;

fn lock_runners(runners: &RunnerMap) -> std::sync::MutexGuard<'_, HashMap<Pid, RunnerEntry>> {
    runners.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Live one-shot commands keyed by their OS process id.
pub struct RunnerRegistry {
    config: Arc<Config>,
    events: EventSender,
    next_run_id: AtomicU64,
    runners: RunnerMap,
}

impl RunnerRegistry {
    pub fn new(config: Arc<Config>, events: EventSender) -> Self {
        Self {
            config,
            events,
            next_run_id: AtomicU64::new(1),
            runners: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    #[instrument(skip(self))]
    pub async fn execute(&self, command: &str, cwd: Option<&str>) -> Result<Pid, AppError> {
        if command.trim().is_empty() {
            return Err(AppError::InvalidInputArgument("Command must not be empty".to_string()));
        }
        let work_dir = runner_working_dir(cwd)?;
        let shell = runner_shell(command);

        let mut process = TokioCommand::new(&shell.program);
        process
            .args(&shell.args)
            .current_dir(&work_dir)
            .stdin(StdProcessStdio::null())
            .stdout(StdProcessStdio::piped())
            .stderr(StdProcessStdio::piped())
            .kill_on_drop(true);

        debug!(shell = %shell.program, cwd = %work_dir.display(), "Spawning command");
        let mut child = process.spawn().map_err(|e| {
            error!(error = %e, command = %command, "Failed to spawn command");
            AppError::SpawnFailed(format!("Failed to spawn command '{}': {}", command, e))
        })?;

        let Some(pid) = child.id() else {
            // Already reaped; nothing can be tracked by pid.
            return Err(AppError::SpawnFailed(format!("Command '{}' exited before it could be tracked", command)));
        };

        let streams = [child.stdout.take().map(boxed), child.stderr.take().map(boxed)];
        let readers: Vec<JoinHandle<()>> = streams
            .into_iter()
            .flatten()
            .map(|stream| tokio::spawn(forward_output(pid, stream, self.events.clone())))
            .collect();

        let run_id = self.next_run_id.fetch_add(1, Ordering::Relaxed);
        let (kill_tx, kill_rx) = oneshot::channel();
        let info = RunnerInfo {
            pid,
            command: command.to_string(),
            cwd: work_dir.to_string_lossy().into_owned(),
            started_at: Utc::now().to_rfc3339(),
        };
        lock_runners(&self.runners).insert(pid, RunnerEntry { info, run_id, kill_tx });

        tokio::spawn(supervise(
            pid,
            run_id,
            child,
            kill_rx,
            readers,
            self.runners.clone(),
            self.events.clone(),
            self.config.output_drain_grace,
        ));

        info!(pid, cwd = %work_dir.display(), "Command started");
        Ok(pid)
    }

    /// Removes the entry immediately and asks the process to terminate.
    #[instrument(skip(self))]
    pub fn kill(&self, pid: Pid) {
        let removed = lock_runners(&self.runners).remove(&pid);
        match removed {
            Some(entry) => {
                if entry.kill_tx.send(()).is_err() {
                    debug!(pid, "Command already finished before kill");
                } else {
                    info!(pid, command = %entry.info.command, "Kill requested");
                }
            }
            None => debug!(pid, "Kill of unknown runner pid ignored"),
        }
    }

    pub fn kill_all(&self) {
        let drained: Vec<(Pid, RunnerEntry)> = lock_runners(&self.runners).drain().collect();
        if !drained.is_empty() {
            info!(count = drained.len(), "Killing all running commands");
        }
        for (_, entry) in drained {
            let _ = entry.kill_tx.send(());
        }
    }

    pub fn list(&self) -> Vec<RunnerInfo> {
        let mut infos: Vec<RunnerInfo> = lock_runners(&self.runners)
            .values()
            .map(|entry| entry.info.clone())
            .collect();
        infos.sort_by_key(|info| info.pid);
        infos
    }

    pub fn contains(&self, pid: Pid) -> bool {
        lock_runners(&self.runners).contains_key(&pid)
    }
}

fn boxed<R: AsyncRead + Send + Unpin + 'static>(stream: R) -> Box<dyn AsyncRead + Send + Unpin> {
    Box::new(stream)
}

/// Streams one pipe as `runner-data` events until it closes.
async fn forward_output(pid: Pid, mut stream: Box<dyn AsyncRead + Send + Unpin>, events: EventSender) {
    let mut decoder = Utf8Decoder::new();
    let mut buf = [0u8; READ_BUFFER_SIZE];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let chunk = decoder.decode(&buf[..n]);
                if !chunk.is_empty() {
                    let _ = events.send(HostEvent::RunnerData { pid, chunk });
                }
            }
            Err(e) => {
                debug!(pid, error = %e, "Command output stream closed with error");
                break;
            }
        }
    }
    let tail = decoder.finish();
    if !tail.is_empty() {
        let _ = events.send(HostEvent::RunnerData { pid, chunk: tail });
    }
}

/// Sends SIGTERM where the platform has it, otherwise a hard kill.
async fn terminate(pid: Pid, child: &mut Child) {
    let signalled = tokio::task::spawn_blocking(move || {
        let mut system = System::new();
        let target = sysinfo::Pid::from_u32(pid);
        if !system.refresh_process(target) {
            return false;
        }
        match system.process(target) {
            Some(process) => process.kill_with(Signal::Term).unwrap_or_else(|| process.kill()),
            None => false,
        }
    })
    .await
    .unwrap_or(false);

    if !signalled {
        if let Err(e) = child.start_kill() {
            warn!(pid, error = %e, "Failed to terminate command");
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn supervise(
    pid: Pid,
    run_id: u64,
    mut child: Child,
    mut kill_rx: oneshot::Receiver<()>,
    readers: Vec<JoinHandle<()>>,
    runners: RunnerMap,
    events: EventSender,
    drain_grace: Duration,
) {
    let killed = tokio::select! {
        _ = child.wait() => false,
        // Also fires when the entry is dropped without an explicit kill.
        _ = &mut kill_rx => true,
    };
    if killed {
        terminate(pid, &mut child).await;
    }

    let exit_code = match child.wait().await {
        Ok(status) => status.code().unwrap_or(0),
        Err(e) => {
            warn!(pid, error = %e, "Failed to wait for command");
            -1
        }
    };

    for mut reader in readers {
        if timeout(drain_grace, &mut reader).await.is_err() {
            debug!(pid, "Command output still open after exit; stopped draining");
            reader.abort();
        }
    }

    {
        let mut runners = lock_runners(&runners);
        if runners.get(&pid).is_some_and(|entry| entry.run_id == run_id) {
            runners.remove(&pid);
        }
    }
    info!(pid, exit_code, killed, "Command exited");
    let _ = events.send(HostEvent::RunnerExit { pid, exit_code });
}
