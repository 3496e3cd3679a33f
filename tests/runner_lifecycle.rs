#![cfg(unix)]

use ide_host::bridge::channels::Channel;
use ide_host::bridge::events::EventHub;
use ide_host::bridge::messages::{HostEvent, Pid};
use ide_host::tools::runner_tool::RunnerRegistry;
use ide_host::Config;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

const EVENT_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Default, Debug)]
struct RunRecord {
    output: String,
    exits: Vec<i32>,
}

/// Collects events until every pid in `pids` has exited.
async fn collect_until_exited(rx: &mut UnboundedReceiver<HostEvent>, pids: &[Pid]) -> HashMap<Pid, RunRecord> {
    let mut records: HashMap<Pid, RunRecord> = HashMap::new();
    while pids.iter().any(|pid| records.get(pid).map_or(true, |r| r.exits.is_empty())) {
        let event = timeout(EVENT_TIMEOUT, rx.recv())
            .await
            .expect("timed out waiting for runner events")
            .expect("event hub closed");
        match event {
            HostEvent::RunnerData { pid, chunk } => records.entry(pid).or_default().output.push_str(&chunk),
            HostEvent::RunnerExit { pid, exit_code } => records.entry(pid).or_default().exits.push(exit_code),
            _ => {}
        }
    }
    records
}

#[tokio::test]
async fn concurrent_commands_keep_their_output_apart() {
    let hub = EventHub::new();
    let (_, mut rx) = hub.subscribe(&[Channel::RunnerData, Channel::RunnerExit]).unwrap();
    let runners = RunnerRegistry::new(Arc::new(Config::default()), hub.sender());

    let a = runners.execute("echo A", None).await.unwrap();
    let b = runners.execute("echo B", None).await.unwrap();
    assert_ne!(a, b);

    let records = collect_until_exited(&mut rx, &[a, b]).await;
    assert_eq!(records[&a].output.trim(), "A");
    assert_eq!(records[&b].output.trim(), "B");
    assert_eq!(records[&a].exits, vec![0]);
    assert_eq!(records[&b].exits, vec![0]);
    assert!(!runners.contains(a));
    assert!(!runners.contains(b));
}

#[tokio::test]
async fn killed_command_still_reports_exit() {
    let hub = EventHub::new();
    let (_, mut rx) = hub.subscribe(&[Channel::RunnerExit]).unwrap();
    let runners = RunnerRegistry::new(Arc::new(Config::default()), hub.sender());

    let pid = runners.execute("sleep 30", None).await.unwrap();
    assert!(runners.contains(pid));
    runners.kill(pid);
    assert!(!runners.contains(pid));

    let records = collect_until_exited(&mut rx, &[pid]).await;
    assert_eq!(records[&pid].exits.len(), 1);

    // Killing again is a no-op.
    runners.kill(pid);
}

#[tokio::test]
async fn command_runs_in_requested_directory() {
    let hub = EventHub::new();
    let (_, mut rx) = hub.subscribe(&[Channel::RunnerData, Channel::RunnerExit]).unwrap();
    let runners = RunnerRegistry::new(Arc::new(Config::default()), hub.sender());
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("present.txt"), "").unwrap();

    let pid = runners.execute("ls", Some(&dir.path().to_string_lossy())).await.unwrap();
    let records = collect_until_exited(&mut rx, &[pid]).await;
    assert!(records[&pid].output.contains("present.txt"));
}
