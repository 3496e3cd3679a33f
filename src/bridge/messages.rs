use crate::bridge::channels::{Channel, ChannelKind};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Host-allocated key of a terminal session.
pub type SessionId = u32;
/// OS process identifier, used directly as the key of a runner entry.
pub type Pid = u32;

/// Uniform answer to every invoke channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpcResult<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> IpcResult<T> {
    pub fn ok(data: T) -> Self {
        Self { success: true, data: Some(data), error: None }
    }

    pub fn ok_empty() -> Self {
        Self { success: true, data: None, error: None }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self { success: false, data: None, error: Some(error.into()) }
    }
}

/// Invoke channels with their arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "channel",
    content = "args",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum Request {
    OpenFolderDialog {},
    ReadDirectory { path: String },
    ReadFile { path: String },
    WriteFile { path: String, content: String },
    ListFilesFlat { path: String },
    CreateFile { path: String },
    CreateFolder { path: String },
    RenameEntry { old_path: String, new_path: String },
    DeleteEntry { path: String },
    SearchInFiles {
        root: String,
        query: String,
        #[serde(default)]
        case_sensitive: bool,
    },
    ReplaceInFile {
        path: String,
        search: String,
        replace: String,
        #[serde(default)]
        case_sensitive: bool,
    },
    TerminalCreate {
        #[serde(default)]
        cwd: Option<String>,
    },
    TerminalList {},
    RunnerExecute {
        command: String,
        #[serde(default)]
        cwd: Option<String>,
    },
    RunnerList {},
    GitStatus { cwd: String },
    GitStage { cwd: String, path: String },
    GitUnstage { cwd: String, path: String },
    GitCommit { cwd: String, message: String },
    GitPush { cwd: String },
    GitPull { cwd: String },
    ListChannels {},
}

impl Request {
    pub fn channel(&self) -> Channel {
        match self {
            Request::OpenFolderDialog {} => Channel::OpenFolderDialog,
            Request::ReadDirectory { .. } => Channel::ReadDirectory,
            Request::ReadFile { .. } => Channel::ReadFile,
            Request::WriteFile { .. } => Channel::WriteFile,
            Request::ListFilesFlat { .. } => Channel::ListFilesFlat,
            Request::CreateFile { .. } => Channel::CreateFile,
            Request::CreateFolder { .. } => Channel::CreateFolder,
            Request::RenameEntry { .. } => Channel::RenameEntry,
            Request::DeleteEntry { .. } => Channel::DeleteEntry,
            Request::SearchInFiles { .. } => Channel::SearchInFiles,
            Request::ReplaceInFile { .. } => Channel::ReplaceInFile,
            Request::TerminalCreate { .. } => Channel::TerminalCreate,
            Request::TerminalList {} => Channel::TerminalList,
            Request::RunnerExecute { .. } => Channel::RunnerExecute,
            Request::RunnerList {} => Channel::RunnerList,
            Request::GitStatus { .. } => Channel::GitStatus,
            Request::GitStage { .. } => Channel::GitStage,
            Request::GitUnstage { .. } => Channel::GitUnstage,
            Request::GitCommit { .. } => Channel::GitCommit,
            Request::GitPush { .. } => Channel::GitPush,
            Request::GitPull { .. } => Channel::GitPull,
            Request::ListChannels {} => Channel::ListChannels,
        }
    }
}

/// Fire-and-forget channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "channel",
    content = "args",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum Command {
    TerminalWrite { session_id: SessionId, data: String },
    TerminalResize { session_id: SessionId, cols: u16, rows: u16 },
    TerminalDispose { session_id: SessionId },
    RunnerKill { pid: Pid },
}

impl Command {
    pub fn channel(&self) -> Channel {
        match self {
            Command::TerminalWrite { .. } => Channel::TerminalWrite,
            Command::TerminalResize { .. } => Channel::TerminalResize,
            Command::TerminalDispose { .. } => Channel::TerminalDispose,
            Command::RunnerKill { .. } => Channel::RunnerKill,
        }
    }
}

/// Unsolicited Host -> UI messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "args",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum HostEvent {
    TerminalData { session_id: SessionId, chunk: String },
    TerminalExit { session_id: SessionId, exit_code: i32 },
    RunnerData { pid: Pid, chunk: String },
    RunnerExit { pid: Pid, exit_code: i32 },
    /// A file the Host was launched with.
    OpenFile { path: String },
}

impl HostEvent {
    pub fn channel(&self) -> Channel {
        match self {
            HostEvent::TerminalData { .. } => Channel::TerminalData,
            HostEvent::TerminalExit { .. } => Channel::TerminalExit,
            HostEvent::RunnerData { .. } => Channel::RunnerData,
            HostEvent::RunnerExit { .. } => Channel::RunnerExit,
            HostEvent::OpenFile { .. } => Channel::OpenFile,
        }
    }
}

/// One parsed line from the UI.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Invoke { id: u64, request: Request },
    Send(Command),
}

/// A line that could not be turned into an `Inbound`. `id` is kept so the
/// caller can still answer an invoke.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameError {
    pub id: Option<u64>,
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(default)]
    id: Option<u64>,
    channel: String,
    #[serde(default)]
    args: Value,
}

pub fn parse_frame(line: &str) -> Result<Inbound, FrameError> {
    let raw: RawFrame = serde_json::from_str(line).map_err(|e| FrameError {
        id: salvage_id(line),
        message: format!("Malformed frame: {}", e),
    })?;
    let fail = |message: String| FrameError { id: raw.id, message };

    let channel: Channel = raw.channel.parse().map_err(|e: crate::bridge::channels::UnknownChannel| fail(e.to_string()))?;
    let args = match raw.args {
        Value::Null => Value::Object(Map::new()),
        other => other,
    };
    let tagged = json!({ "channel": channel.as_str(), "args": args });

    match (channel.kind(), raw.id) {
        (ChannelKind::Invoke, Some(id)) => serde_json::from_value::<Request>(tagged)
            .map(|request| Inbound::Invoke { id, request })
            .map_err(|e| fail(format!("Invalid arguments for {}: {}", channel, e))),
        (ChannelKind::Invoke, None) => Err(fail(format!("{} must be invoked with an id", channel))),
        (ChannelKind::Send, None) => serde_json::from_value::<Command>(tagged)
            .map(Inbound::Send)
            .map_err(|e| fail(format!("Invalid arguments for {}: {}", channel, e))),
        (ChannelKind::Send, Some(_)) => Err(fail(format!("{} is fire-and-forget and takes no id", channel))),
        (ChannelKind::Event, _) => Err(fail(format!("{} is a host event and cannot be sent by the UI", channel))),
    }
}

fn salvage_id(line: &str) -> Option<u64> {
    serde_json::from_str::<Value>(line)
        .ok()
        .and_then(|v| v.get("id").and_then(Value::as_u64))
}

/// Everything the Host writes to the UI.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum OutboundFrame {
    Response {
        id: u64,
        #[serde(flatten)]
        result: IpcResult<Value>,
    },
    Event(HostEvent),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_invoke_frame() {
        let frame = r#"{"id":3,"channel":"rename-entry","args":{"oldPath":"/a","newPath":"/b"}}"#;
        assert_eq!(
            parse_frame(frame),
            Ok(Inbound::Invoke {
                id: 3,
                request: Request::RenameEntry { old_path: "/a".into(), new_path: "/b".into() },
            })
        );
    }

    #[test]
    fn parses_invoke_without_args() {
        assert_eq!(
            parse_frame(r#"{"id":1,"channel":"open-folder-dialog"}"#),
            Ok(Inbound::Invoke { id: 1, request: Request::OpenFolderDialog {} })
        );
        assert_eq!(
            parse_frame(r#"{"id":2,"channel":"terminal-create","args":null}"#),
            Ok(Inbound::Invoke { id: 2, request: Request::TerminalCreate { cwd: None } })
        );
    }

    #[test]
    fn parses_send_frame() {
        let frame = r#"{"channel":"terminal-resize","args":{"sessionId":4,"cols":120,"rows":40}}"#;
        assert_eq!(
            parse_frame(frame),
            Ok(Inbound::Send(Command::TerminalResize { session_id: 4, cols: 120, rows: 40 }))
        );
    }

    #[test]
    fn rejects_unknown_channel_but_keeps_id() {
        let err = parse_frame(r#"{"id":9,"channel":"shell:exec","args":{}}"#).unwrap_err();
        assert_eq!(err.id, Some(9));
        assert!(err.message.contains("Unknown channel"));
    }

    #[test]
    fn rejects_kind_mismatches() {
        let err = parse_frame(r#"{"channel":"read-file","args":{"path":"/x"}}"#).unwrap_err();
        assert_eq!(err.id, None);

        let err = parse_frame(r#"{"id":5,"channel":"runner-kill","args":{"pid":10}}"#).unwrap_err();
        assert_eq!(err.id, Some(5));

        let err = parse_frame(r#"{"id":6,"channel":"terminal-data","args":{}}"#).unwrap_err();
        assert!(err.message.contains("host event"));
    }

    #[test]
    fn malformed_json_salvages_nothing() {
        let err = parse_frame("{not json").unwrap_err();
        assert_eq!(err.id, None);
        let err = parse_frame(r#"{"id":7}"#).unwrap_err();
        assert_eq!(err.id, Some(7));
    }

    #[test]
    fn request_tags_match_channel_names() {
        let samples = vec![
            Request::OpenFolderDialog {},
            Request::ListFilesFlat { path: "/p".into() },
            Request::SearchInFiles { root: "/p".into(), query: "q".into(), case_sensitive: true },
            Request::TerminalCreate { cwd: None },
            Request::RunnerExecute { command: "ls".into(), cwd: None },
            Request::GitCommit { cwd: "/p".into(), message: "m".into() },
            Request::ListChannels {},
        ];
        for request in samples {
            let value = serde_json::to_value(&request).unwrap();
            assert_eq!(value["channel"], request.channel().as_str());
        }
        let command = serde_json::to_value(Command::RunnerKill { pid: 1 }).unwrap();
        assert_eq!(command["channel"], Channel::RunnerKill.as_str());
    }

    #[test]
    fn outbound_frames_have_expected_shape() {
        let response = OutboundFrame::Response { id: 1, result: IpcResult::ok(json!(42)) };
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"id": 1, "success": true, "data": 42})
        );

        let failure = OutboundFrame::Response { id: 2, result: IpcResult::fail("nope") };
        assert_eq!(
            serde_json::to_value(&failure).unwrap(),
            json!({"id": 2, "success": false, "error": "nope"})
        );

        let event = OutboundFrame::Event(HostEvent::TerminalExit { session_id: 3, exit_code: 0 });
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"event": "terminal-exit", "args": {"sessionId": 3, "exitCode": 0}})
        );

        let open = OutboundFrame::Event(HostEvent::OpenFile { path: "/w/a.md".into() });
        assert_eq!(
            serde_json::to_value(&open).unwrap(),
            json!({"event": "open-file", "args": {"path": "/w/a.md"}})
        );
    }
}
