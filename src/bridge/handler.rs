use crate::bridge::channels::{channel_catalog, Channel};
use crate::bridge::events::{EventHub, EventSender};
use crate::bridge::messages::{Command, HostEvent, IpcResult, Request};
use crate::config::Config;
use crate::error::AppError;
use crate::tools::{
    dialog_tool::{open_folder_dialog, FolderPicker, SystemFolderPicker},
    filesystem_tool::FilesystemManager,
    git_tool::GitManager,
    runner_tool::RunnerRegistry,
    terminal_tool::TerminalRegistry,
};
use crate::utils::audit_logger::AuditLogger;
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info, instrument};

// Everything a bridge call can reach, built once at startup.
pub struct AppManagers {
    pub config: Arc<Config>,
    pub filesystem: Arc<FilesystemManager>,
    pub terminals: Arc<TerminalRegistry>,
    pub runners: Arc<RunnerRegistry>,
    pub git: Arc<GitManager>,
    pub folder_picker: Arc<dyn FolderPicker>,
    pub audit_logger: Arc<AuditLogger>,
}

impl AppManagers {
    pub fn new(config: Arc<Config>, events: EventSender, folder_picker: Arc<dyn FolderPicker>) -> Self {
        let filesystem = Arc::new(FilesystemManager::new());
        let terminals = Arc::new(TerminalRegistry::new(config.clone(), events.clone()));
        let runners = Arc::new(RunnerRegistry::new(config.clone(), events));
        let git = Arc::new(GitManager::new(config.clone()));
        let audit_logger = Arc::new(AuditLogger::new(&config));

        Self {
            config,
            filesystem,
            terminals,
            runners,
            git,
            folder_picker,
            audit_logger,
        }
    }
}

/// The Host side of the bridge: owns every manager plus the event hub.
pub struct Host {
    managers: Arc<AppManagers>,
    events: EventHub,
    // Published once a transport is listening; the hub drops events nobody hears.
    pending_events: Mutex<Vec<HostEvent>>,
}

impl Host {
    /// Must be called from within a tokio runtime.
    pub fn new(config: Config) -> Self {
        Self::with_folder_picker(config, Arc::new(SystemFolderPicker))
    }

    pub fn with_folder_picker(config: Config, folder_picker: Arc<dyn FolderPicker>) -> Self {
        let events = EventHub::new();
        let managers = Arc::new(AppManagers::new(Arc::new(config), events.sender(), folder_picker));
        Self {
            managers,
            events,
            pending_events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> &EventHub {
        &self.events
    }

    pub fn managers(&self) -> &AppManagers {
        &self.managers
    }

    /// Handles one request on its own task. Errors and panics become a failed result.
    #[instrument(skip(self, request), fields(channel = %request.channel()))]
    pub async fn invoke(&self, request: Request) -> IpcResult<Value> {
        let channel = request.channel();
        self.audit(channel, &request).await;

        let managers = self.managers.clone();
        match tokio::spawn(dispatch_request(managers, request)).await {
            Ok(Ok(Value::Null)) => IpcResult::ok_empty(),
            Ok(Ok(data)) => IpcResult::ok(data),
            Ok(Err(e)) => {
                debug!(channel = %channel, error = %e, "Request failed");
                IpcResult::fail(e.to_string())
            }
            Err(join_err) => {
                let e = AppError::from(join_err);
                error!(channel = %channel, error = %e, "Request handler aborted");
                IpcResult::fail(e.to_string())
            }
        }
    }

    /// Fire-and-forget; never fails.
    pub fn send(&self, command: Command) {
        let channel = command.channel();
        if !matches!(command, Command::TerminalWrite { .. } | Command::TerminalResize { .. }) {
            let logger = self.managers.audit_logger.clone();
            let args = args_of(&command);
            tokio::spawn(async move { logger.log_call(channel.as_str(), &args).await });
        }

        let managers = &self.managers;
        match command {
            Command::TerminalWrite { session_id, data } => managers.terminals.write(session_id, &data),
            Command::TerminalResize { session_id, cols, rows } => managers.terminals.resize(session_id, cols, rows),
            Command::TerminalDispose { session_id } => managers.terminals.dispose(session_id),
            Command::RunnerKill { pid } => managers.runners.kill(pid),
        }
    }

    /// Queues an `open-file` event for the next transport to connect.
    pub fn open_file_on_connect(&self, path: &Path) {
        info!(path = %path.display(), "Launch file queued for the UI");
        self.pending_events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(HostEvent::OpenFile { path: path.to_string_lossy().into_owned() });
    }

    /// Publishes queued events. Call after subscribing to the hub.
    pub fn flush_pending_events(&self) {
        let pending = std::mem::take(&mut *self.pending_events.lock().unwrap_or_else(PoisonError::into_inner));
        let sender = self.events.sender();
        for event in pending {
            debug!(event = %event.channel(), "Publishing queued event");
            let _ = sender.send(event);
        }
    }

    /// Disposes every terminal and kills every running command.
    pub fn shutdown(&self) {
        info!("Shutting down host managers");
        self.managers.terminals.dispose_all();
        self.managers.runners.kill_all();
    }

    async fn audit(&self, channel: Channel, request: &Request) {
        self.managers.audit_logger.log_call(channel.as_str(), &args_of(request)).await;
    }
}

fn args_of<T: serde::Serialize>(message: &T) -> Value {
    serde_json::to_value(message)
        .ok()
        .and_then(|mut v| v.get_mut("args").map(Value::take))
        .unwrap_or(Value::Null)
}

async fn dispatch_request(managers: Arc<AppManagers>, request: Request) -> Result<Value, AppError> {
    // Calls a manager method and serializes whatever it returns.
    macro_rules! handle_channel {
        (sync $manager_field:ident . $method:ident ()) => {{
            let result = managers.$manager_field.$method();
            Ok(serde_json::to_value(result)?)
        }};
        ($manager_field:ident . $method:ident ($($arg:expr),*)) => {{
            let result = managers.$manager_field.$method($($arg),*).await?;
            Ok(serde_json::to_value(result)?)
        }};
    }

    match request {
        Request::OpenFolderDialog {} => Ok(Value::String(open_folder_dialog(managers.folder_picker.as_ref()).await?)),
        // Filesystem
        Request::ReadDirectory { path } => handle_channel!(filesystem.read_directory(&path)),
        Request::ReadFile { path } => handle_channel!(filesystem.read_file(&path)),
        Request::WriteFile { path, content } => handle_channel!(filesystem.write_file(&path, &content)),
        Request::ListFilesFlat { path } => handle_channel!(filesystem.list_files_flat(&path)),
        Request::CreateFile { path } => handle_channel!(filesystem.create_file(&path)),
        Request::CreateFolder { path } => handle_channel!(filesystem.create_folder(&path)),
        Request::RenameEntry { old_path, new_path } => handle_channel!(filesystem.rename_entry(&old_path, &new_path)),
        Request::DeleteEntry { path } => handle_channel!(filesystem.delete_entry(&path)),
        Request::SearchInFiles { root, query, case_sensitive } => {
            handle_channel!(filesystem.search_in_files(&root, &query, case_sensitive))
        }
        Request::ReplaceInFile { path, search, replace, case_sensitive } => {
            handle_channel!(filesystem.replace_in_file(&path, &search, &replace, case_sensitive))
        }
        // Terminal
        Request::TerminalCreate { cwd } => handle_channel!(terminals.create(cwd.as_deref())),
        Request::TerminalList {} => handle_channel!(sync terminals.list()),
        // Runner
        Request::RunnerExecute { command, cwd } => handle_channel!(runners.execute(&command, cwd.as_deref())),
        Request::RunnerList {} => handle_channel!(sync runners.list()),
        // Git
        Request::GitStatus { cwd } => handle_channel!(git.status(&cwd)),
        Request::GitStage { cwd, path } => handle_channel!(git.stage(&cwd, &path)),
        Request::GitUnstage { cwd, path } => handle_channel!(git.unstage(&cwd, &path)),
        Request::GitCommit { cwd, message } => handle_channel!(git.commit(&cwd, &message)),
        Request::GitPush { cwd } => handle_channel!(git.push(&cwd)),
        Request::GitPull { cwd } => handle_channel!(git.pull(&cwd)),
        Request::ListChannels {} => Ok(serde_json::to_value(channel_catalog())?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::path::PathBuf;

    struct NoPicker;

    #[async_trait]
    impl FolderPicker for NoPicker {
        async fn pick_folder(&self) -> Result<Option<PathBuf>, AppError> {
            Ok(None)
        }
    }

    struct PanickingPicker;

    #[async_trait]
    impl FolderPicker for PanickingPicker {
        async fn pick_folder(&self) -> Result<Option<PathBuf>, AppError> {
            panic!("picker exploded")
        }
    }

    #[tokio::test]
    async fn errors_become_failure_results() {
        let host = Host::with_folder_picker(Config::default(), Arc::new(NoPicker));
        let result = host.invoke(Request::OpenFolderDialog {}).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("No folder selected"));
    }

    #[tokio::test]
    async fn panics_become_failure_results() {
        let host = Host::with_folder_picker(Config::default(), Arc::new(PanickingPicker));
        let result = host.invoke(Request::OpenFolderDialog {}).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("panicked"));
    }

    #[tokio::test]
    async fn unit_results_have_no_data() {
        let dir = tempfile::tempdir().unwrap();
        let host = Host::with_folder_picker(Config::default(), Arc::new(NoPicker));
        let path = dir.path().join("new.txt").to_string_lossy().into_owned();
        let result = host.invoke(Request::CreateFile { path: path.clone() }).await;
        assert!(result.success);
        assert!(result.data.is_none());

        let read = host.invoke(Request::ReadFile { path }).await;
        assert_eq!(read.data, Some(Value::String(String::new())));
    }

    #[tokio::test]
    async fn list_channels_reports_every_channel() {
        let host = Host::with_folder_picker(Config::default(), Arc::new(NoPicker));
        let result = host.invoke(Request::ListChannels {}).await;
        let data = result.data.unwrap();
        assert_eq!(data.as_array().unwrap().len(), Channel::ALL.len());
        assert_eq!(data[0]["name"], "open-folder-dialog");
        assert_eq!(data[0]["kind"], "invoke");
    }

    #[tokio::test]
    async fn sends_to_unknown_ids_are_absorbed() {
        let host = Host::with_folder_picker(Config::default(), Arc::new(NoPicker));
        host.send(Command::TerminalWrite { session_id: 41, data: "x".into() });
        host.send(Command::TerminalResize { session_id: 41, cols: 10, rows: 10 });
        host.send(Command::TerminalDispose { session_id: 41 });
        host.send(Command::RunnerKill { pid: 999_999 });
        host.shutdown();
    }

    #[tokio::test]
    async fn queued_open_file_waits_for_a_listener() {
        let host = Host::with_folder_picker(Config::default(), Arc::new(NoPicker));
        host.open_file_on_connect(Path::new("/work/readme.md"));

        let (_, mut rx) = host.events().on(Channel::OpenFile).unwrap();
        host.flush_pending_events();
        let event = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv()).await.unwrap();
        assert_eq!(event, Some(HostEvent::OpenFile { path: "/work/readme.md".into() }));

        // Flushed once only.
        host.flush_pending_events();
        assert!(tokio::time::timeout(std::time::Duration::from_millis(100), rx.recv()).await.is_err());
    }

    #[test]
    fn args_are_extracted_from_tagged_messages() {
        let args = args_of(&Request::ReadFile { path: "/a".into() });
        assert_eq!(args, serde_json::json!({"path": "/a"}));
        assert_eq!(args_of(&Command::RunnerKill { pid: 3 }), serde_json::json!({"pid": 3}));
    }
}
