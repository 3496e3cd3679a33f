use crate::bridge::channels::Channel;
use crate::bridge::handler::Host;
use crate::bridge::messages::{parse_frame, FrameError, Inbound, IpcResult, OutboundFrame};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Serves the bridge over stdin/stdout until stdin closes.
pub async fn serve_stdio(host: Arc<Host>) -> Result<()> {
    serve(host, tokio::io::stdin(), tokio::io::stdout()).await
}

/// Reads JSON-line frames from `reader` and writes responses and events to
/// `writer`. Returns once `reader` reaches EOF and every in-flight request has
/// been answered.
pub async fn serve<R, W>(host: Arc<Host>, reader: R, writer: W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (out_tx, out_rx) = mpsc::unbounded_channel::<OutboundFrame>();
    let writer_task = tokio::spawn(write_frames(writer, out_rx));

    // One receiver for all event names keeps data and exit events in order.
    let (listener_id, mut events_rx) = host
        .events()
        .subscribe(&Channel::EVENTS)
        .context("Failed to subscribe the transport to host events")?;
    host.flush_pending_events();
    let event_tx = out_tx.clone();
    let forwarder = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            if event_tx.send(OutboundFrame::Event(event)).is_err() {
                break;
            }
        }
    });

    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let read = reader
            .read_until(b'\n', &mut buf)
            .await
            .context("Failed to read from bridge input")?;
        if read == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match parse_frame(line) {
            Ok(Inbound::Invoke { id, request }) => {
                let host = host.clone();
                let tx = out_tx.clone();
                tokio::spawn(async move {
                    let result = host.invoke(request).await;
                    let _ = tx.send(OutboundFrame::Response { id, result });
                });
            }
            Ok(Inbound::Send(command)) => host.send(command),
            Err(FrameError { id: Some(id), message }) => {
                warn!(id, error = %message, "Rejected bridge frame");
                let _ = out_tx.send(OutboundFrame::Response { id, result: IpcResult::fail(message) });
            }
            Err(FrameError { id: None, message }) => {
                warn!(error = %message, "Dropped bridge frame");
            }
        }
    }

    info!("Bridge input closed");
    for channel in Channel::EVENTS {
        host.events().off(channel, listener_id);
    }
    drop(out_tx);
    if forwarder.await.is_err() {
        debug!("Event forwarder ended abnormally");
    }
    match writer_task.await {
        Ok(result) => result.context("Failed to write to bridge output"),
        Err(e) => {
            error!(error = %e, "Bridge writer task failed");
            Err(e).context("Bridge writer task failed")
        }
    }
}

async fn write_frames<W>(writer: W, mut rx: mpsc::UnboundedReceiver<OutboundFrame>) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut writer = BufWriter::new(writer);
    while let Some(frame) = rx.recv().await {
        let mut line = match serde_json::to_vec(&frame) {
            Ok(line) => line,
            Err(e) => {
                error!(error = %e, "Failed to serialize outbound frame");
                continue;
            }
        };
        line.push(b'\n');
        writer.write_all(&line).await?;
        writer.flush().await?;
    }
    writer.flush().await
}
