//! Frame transport: length-prefixed postcard messages over TCP.
//!
//! Every remote call is one request frame followed by one response frame.
//! A frame is a big-endian `u32` length followed by the postcard bytes of
//! the message; frames larger than [`MAX_MESSAGE_SIZE`] are rejected on
//! both sides. A connection may carry any number of sequential calls.
//!
//! [`serve`] runs a bounded accept loop: connections beyond the limit are
//! dropped with a warning, each accepted connection is handled on its own
//! task, and cancellation stops the accept loop, then waits for in-flight
//! connections to drain.

use std::future::Future;
use std::io::ErrorKind;
use std::sync::Arc;

use alder_core::DfsError;
use alder_wire::MAX_MESSAGE_SIZE;
use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

/// Write one message as a length-prefixed frame.
pub async fn write_frame<T, S>(stream: &mut S, message: &T) -> anyhow::Result<()>
where
    T: Serialize,
    S: AsyncWrite + Unpin,
{
    let bytes = postcard::to_stdvec(message).context("failed to serialize frame")?;
    anyhow::ensure!(
        bytes.len() <= MAX_MESSAGE_SIZE as usize,
        "frame of {} bytes exceeds the {} byte limit",
        bytes.len(),
        MAX_MESSAGE_SIZE
    );
    stream.write_u32(bytes.len() as u32).await.context("failed to write frame length")?;
    stream.write_all(&bytes).await.context("failed to write frame body")?;
    stream.flush().await.context("failed to flush frame")?;
    Ok(())
}

/// Read one length-prefixed frame.
///
/// Returns `Ok(None)` when the peer closed the connection cleanly at a
/// frame boundary.
pub async fn read_frame<T, S>(stream: &mut S) -> anyhow::Result<Option<T>>
where
    T: DeserializeOwned,
    S: AsyncRead + Unpin,
{
    let length = match stream.read_u32().await {
        Ok(length) => length,
        Err(err) if err.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err).context("failed to read frame length"),
    };
    anyhow::ensure!(
        length <= MAX_MESSAGE_SIZE,
        "frame of {length} bytes exceeds the {MAX_MESSAGE_SIZE} byte limit"
    );

    let mut buffer = vec![0u8; length as usize];
    stream.read_exact(&mut buffer).await.context("failed to read frame body")?;
    let message = postcard::from_bytes(&buffer).context("failed to decode frame")?;
    Ok(Some(message))
}

/// Perform one remote call: connect, send the request, read the response.
///
/// Every failure along the way is a transport failure from the caller's
/// point of view; domain errors arrive inside the decoded response.
pub async fn call<Req, Resp>(host: &str, port: u16, request: &Req) -> Result<Resp, DfsError>
where
    Req: Serialize,
    Resp: DeserializeOwned,
{
    let mut stream = TcpStream::connect((host, port)).await.map_err(|err| {
        DfsError::Transport { reason: format!("connecting to {host}:{port}: {err}") }
    })?;
    write_frame(&mut stream, request)
        .await
        .map_err(|err| DfsError::Transport { reason: format!("sending to {host}:{port}: {err}") })?;
    match read_frame(&mut stream).await {
        Ok(Some(response)) => Ok(response),
        Ok(None) => Err(DfsError::Transport {
            reason: format!("{host}:{port} closed the connection before responding"),
        }),
        Err(err) => Err(DfsError::Transport {
            reason: format!("receiving from {host}:{port}: {err}"),
        }),
    }
}

/// Serve request/response frames from a listener until cancelled.
///
/// Each accepted connection runs on its own task and handles frames
/// sequentially. On cancellation the accept loop exits and in-flight
/// connections are drained before this returns.
pub async fn serve<Req, Resp, H, Fut>(
    listener: TcpListener,
    cancel: CancellationToken,
    max_connections: u32,
    handler: H,
) -> anyhow::Result<()>
where
    Req: DeserializeOwned + Send + 'static,
    Resp: Serialize + Send + Sync + 'static,
    H: Fn(Req) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Resp> + Send + 'static,
{
    let permits = Arc::new(Semaphore::new(max_connections as usize));
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        warn!(error = %err, "failed to accept connection");
                        continue;
                    }
                };
                let permit = match Arc::clone(&permits).try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        warn!(%peer, max_connections, "connection limit reached, dropping connection");
                        continue;
                    }
                };
                debug!(%peer, "accepted connection");

                let handler = handler.clone();
                let cancel = cancel.clone();
                connections.spawn(async move {
                    let _permit = permit;
                    if let Err(err) = handle_connection(stream, cancel, handler).await {
                        debug!(error = %err, "connection handler failed");
                    }
                });
            }
        }
    }

    // Drain in-flight connections before reporting the listener stopped.
    while connections.join_next().await.is_some() {}
    Ok(())
}

async fn handle_connection<Req, Resp, H, Fut>(
    mut stream: TcpStream,
    cancel: CancellationToken,
    handler: H,
) -> anyhow::Result<()>
where
    Req: DeserializeOwned,
    Resp: Serialize,
    H: Fn(Req) -> Fut,
    Fut: Future<Output = Resp>,
{
    loop {
        let request = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = read_frame::<Req, _>(&mut stream) => match frame? {
                Some(request) => request,
                None => break,
            },
        };
        let response = handler(request).await;
        write_frame(&mut stream, &response).await?;
    }
    Ok(())
}
