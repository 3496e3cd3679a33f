use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// How a channel crosses the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// UI invokes and awaits exactly one `IpcResult`.
    Invoke,
    /// UI sends and never gets an answer.
    Send,
    /// Host pushes at any time.
    Event,
}

/// The closed set of names allowed across the Host/UI boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    OpenFolderDialog,
    ReadDirectory,
    ReadFile,
    WriteFile,
    ListFilesFlat,
    CreateFile,
    CreateFolder,
    RenameEntry,
    DeleteEntry,
    SearchInFiles,
    ReplaceInFile,
    TerminalCreate,
    TerminalWrite,
    TerminalResize,
    TerminalDispose,
    TerminalList,
    TerminalData,
    TerminalExit,
    RunnerExecute,
    RunnerKill,
    RunnerList,
    RunnerData,
    RunnerExit,
    GitStatus,
    GitStage,
    GitUnstage,
    GitCommit,
    GitPush,
    GitPull,
    ListChannels,
    OpenFile,
}

impl Channel {
    pub const ALL: [Channel; 31] = [
        Channel::OpenFolderDialog,
        Channel::ReadDirectory,
        Channel::ReadFile,
        Channel::WriteFile,
        Channel::ListFilesFlat,
        Channel::CreateFile,
        Channel::CreateFolder,
        Channel::RenameEntry,
        Channel::DeleteEntry,
        Channel::SearchInFiles,
        Channel::ReplaceInFile,
        Channel::TerminalCreate,
        Channel::TerminalWrite,
        Channel::TerminalResize,
        Channel::TerminalDispose,
        Channel::TerminalList,
        Channel::TerminalData,
        Channel::TerminalExit,
        Channel::RunnerExecute,
        Channel::RunnerKill,
        Channel::RunnerList,
        Channel::RunnerData,
        Channel::RunnerExit,
        Channel::GitStatus,
        Channel::GitStage,
        Channel::GitUnstage,
        Channel::GitCommit,
        Channel::GitPush,
        Channel::GitPull,
        Channel::ListChannels,
        Channel::OpenFile,
    ];

    pub const EVENTS: [Channel; 5] = [
        Channel::TerminalData,
        Channel::TerminalExit,
        Channel::RunnerData,
        Channel::RunnerExit,
        Channel::OpenFile,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Channel::OpenFolderDialog => "open-folder-dialog",
            Channel::ReadDirectory => "read-directory",
            Channel::ReadFile => "read-file",
            Channel::WriteFile => "write-file",
            Channel::ListFilesFlat => "list-files-flat",
            Channel::CreateFile => "create-file",
            Channel::CreateFolder => "create-folder",
            Channel::RenameEntry => "rename-entry",
            Channel::DeleteEntry => "delete-entry",
            Channel::SearchInFiles => "search-in-files",
            Channel::ReplaceInFile => "replace-in-file",
            Channel::TerminalCreate => "terminal-create",
            Channel::TerminalWrite => "terminal-write",
            Channel::TerminalResize => "terminal-resize",
            Channel::TerminalDispose => "terminal-dispose",
            Channel::TerminalList => "terminal-list",
            Channel::TerminalData => "terminal-data",
            Channel::TerminalExit => "terminal-exit",
            Channel::RunnerExecute => "runner-execute",
            Channel::RunnerKill => "runner-kill",
            Channel::RunnerList => "runner-list",
            Channel::RunnerData => "runner-data",
            Channel::RunnerExit => "runner-exit",
            Channel::GitStatus => "git-status",
            Channel::GitStage => "git-stage",
            Channel::GitUnstage => "git-unstage",
            Channel::GitCommit => "git-commit",
            Channel::GitPush => "git-push",
            Channel::GitPull => "git-pull",
            Channel::ListChannels => "list-channels",
            Channel::OpenFile => "open-file",
        }
    }

    pub fn kind(self) -> ChannelKind {
        match self {
            Channel::TerminalWrite
            | Channel::TerminalResize
            | Channel::TerminalDispose
            | Channel::RunnerKill => ChannelKind::Send,
            Channel::TerminalData
            | Channel::TerminalExit
            | Channel::RunnerData
            | Channel::RunnerExit
            | Channel::OpenFile => ChannelKind::Event,
            _ => ChannelKind::Invoke,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownChannel(pub String);

impl fmt::Display for UnknownChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unknown channel: {}", self.0)
    }
}

impl std::error::Error for UnknownChannel {}

impl FromStr for Channel {
    type Err = UnknownChannel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Channel::ALL
            .iter()
            .copied()
            .find(|channel| channel.as_str() == s)
            .ok_or_else(|| UnknownChannel(s.to_string()))
    }
}

impl Serialize for Channel {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Entry returned by `list-channels`.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelInfo {
    pub name: Channel,
    pub kind: ChannelKind,
}

pub fn channel_catalog() -> Vec<ChannelInfo> {
    Channel::ALL
        .iter()
        .map(|&name| ChannelInfo { name, kind: name.kind() })
        .collect()
}
