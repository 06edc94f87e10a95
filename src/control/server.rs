//! Control socket server
//!
//! Accepts connections on a Unix socket; each line is one JSON request,
//! answered with one JSON line. Requests are forwarded to the reactor
//! loop over a channel so the engine stays single-threaded. A
//! `subscribe` request turns the connection into a notification stream.

use super::{notification_value, Request, Response};
use crate::engine::Notification;
use std::cell::RefCell;
use std::rc::Rc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Engine end of the control channel.
pub type ControlChannel = mpsc::Receiver<(Request, oneshot::Sender<Response>)>;

type EngineTx = mpsc::Sender<(Request, oneshot::Sender<Response>)>;
type Subscribers = Rc<RefCell<Vec<mpsc::UnboundedSender<String>>>>;

/// Run the accept loop. Must be polled inside a `LocalSet`; connection
/// handlers are spawned as local tasks.
pub async fn serve(
    listener: UnixListener,
    engine_tx: EngineTx,
    mut notify_rx: mpsc::UnboundedReceiver<Notification>,
) {
    let subscribers: Subscribers = Rc::new(RefCell::new(Vec::new()));

    // Fan notifications out to every subscribed connection, dropping
    // the ones that went away.
    let fanout = subscribers.clone();
    tokio::task::spawn_local(async move {
        while let Some(notification) = notify_rx.recv().await {
            let line = match serde_json::to_string(&notification_value(&notification)) {
                Ok(line) => line,
                Err(_) => continue,
            };
            fanout
                .borrow_mut()
                .retain(|tx| tx.send(line.clone()).is_ok());
        }
    });

    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let engine_tx = engine_tx.clone();
                let subscribers = subscribers.clone();
                tokio::task::spawn_local(async move {
                    if let Err(e) = handle_connection(stream, engine_tx, subscribers).await {
                        debug!(error = %e, "control connection closed");
                    }
                });
            }
            Err(e) => {
                warn!(error = %e, "control accept failed");
            }
        }
    }
}

async fn handle_connection(
    stream: UnixStream,
    engine_tx: EngineTx,
    subscribers: Subscribers,
) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let request: Request = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                let response = Response::Error {
                    message: format!("invalid request: {e}"),
                };
                send_json(&mut write_half, &response).await?;
                continue;
            }
        };

        if matches!(request, Request::Subscribe) {
            let (tx, mut rx) = mpsc::unbounded_channel::<String>();
            subscribers.borrow_mut().push(tx);
            send_json(&mut write_half, &Response::ok()).await?;

            while let Some(event) = rx.recv().await {
                write_half.write_all(event.as_bytes()).await?;
                write_half.write_all(b"\n").await?;
            }
            return Ok(());
        }

        let (tx, rx) = oneshot::channel();
        if engine_tx.send((request, tx)).await.is_err() {
            break;
        }
        let response = rx.await.unwrap_or(Response::Error {
            message: "engine unavailable".into(),
        });
        send_json(&mut write_half, &response).await?;
    }

    Ok(())
}

async fn send_json(
    write_half: &mut tokio::net::unix::OwnedWriteHalf,
    response: &Response,
) -> std::io::Result<()> {
    // Serializing our own response type cannot realistically fail;
    // degrade to a bare error line if it ever does.
    let line = serde_json::to_string(response)
        .unwrap_or_else(|_| r#"{"status":"error","message":"internal"}"#.to_string());
    write_half.write_all(line.as_bytes()).await?;
    write_half.write_all(b"\n").await
}
