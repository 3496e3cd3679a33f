pub mod dialog_tool;
pub mod filesystem_tool;
pub mod git_tool;
pub mod runner_tool;
pub mod shell;
pub mod terminal_tool;
pub mod walk;
