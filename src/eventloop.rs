// DBGp message pump
//
// After the init handshake each connection runs a pump task plus a reader
// task feeding it parsed messages. Outbound commands are serialized through
// a channel; inbound messages are either correlated to a waiting command by
// transaction id or dispatched through the unsolicited path (status
// tracking, stream events).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::arguments::MessageArguments;
use crate::connection::EngineStatus;
use crate::error::{DbgpError, DbgpResult};
use crate::events::ConnectionEvent;
use crate::protocol::{encode_command, read_message};
use crate::xml::{decode_encoded_content, Element};

/// State shared between the pump and the connection handle.
#[derive(Debug)]
pub(crate) struct Shared {
    pub status: Mutex<EngineStatus>,
}

impl Shared {
    pub fn new() -> Self {
        Shared {
            status: Mutex::new(EngineStatus::Starting),
        }
    }

    pub fn status(&self) -> EngineStatus {
        *self.status.lock().expect("status lock poisoned")
    }

    pub fn set_status(&self, status: EngineStatus) {
        *self.status.lock().expect("status lock poisoned") = status;
    }
}

pub(crate) enum Outbound {
    /// Send and register a reply waiter for the transaction id.
    Wait {
        bytes: Vec<u8>,
        txid: u32,
        reply_tx: oneshot::Sender<DbgpResult<Element>>,
    },
    /// Send and forget; any response is handled by the unsolicited path.
    Fire { bytes: Vec<u8> },
}

/// Cloneable handle for sending commands to the engine. Breakpoints and the
/// connection itself all talk to the pump through one of these.
#[derive(Debug, Clone)]
pub(crate) struct Link {
    command_tx: mpsc::Sender<Outbound>,
    next_txid: Arc<AtomicU32>,
}

impl Link {
    pub fn new() -> (Link, mpsc::Receiver<Outbound>) {
        let (command_tx, command_rx) = mpsc::channel(32);
        let link = Link {
            command_tx,
            next_txid: Arc::new(AtomicU32::new(1)),
        };
        (link, command_rx)
    }

    /// Allocate the next transaction id. Ids are connection-scoped, strictly
    /// increasing, and allocation never blocks behind an in-flight command.
    pub fn next_txid(&self) -> u32 {
        self.next_txid.fetch_add(1, Ordering::SeqCst)
    }

    /// Send a command and wait for the response bearing its transaction id.
    ///
    /// There is no timeout: an engine that never answers blocks the caller.
    pub async fn send_wait(
        &self,
        command: &str,
        args: MessageArguments,
        data: Option<&[u8]>,
    ) -> DbgpResult<Element> {
        let txid = self.next_txid();
        let bytes = encode_command(command, args, txid, data);
        let (reply_tx, reply_rx) = oneshot::channel();

        debug!("sending {} txid={}", command, txid);
        self.command_tx
            .send(Outbound::Wait {
                bytes,
                txid,
                reply_tx,
            })
            .await
            .map_err(|_| DbgpError::SocketDestroyed)?;

        reply_rx.await.map_err(|_| DbgpError::SocketDestroyed)?
    }

    /// Send a command without waiting for its response.
    pub async fn fire(
        &self,
        command: &str,
        args: MessageArguments,
        data: Option<&[u8]>,
    ) -> DbgpResult<()> {
        let txid = self.next_txid();
        let bytes = encode_command(command, args, txid, data);

        debug!("sending {} txid={} (no wait)", command, txid);
        self.command_tx
            .send(Outbound::Fire { bytes })
            .await
            .map_err(|_| DbgpError::SocketDestroyed)
    }

    /// Non-blocking fire for teardown paths. Returns false if the command
    /// could not be queued.
    pub fn try_fire(&self, command: &str, args: MessageArguments) -> bool {
        let txid = self.next_txid();
        let bytes = encode_command(command, args, txid, None);
        self.command_tx.try_send(Outbound::Fire { bytes }).is_ok()
    }
}

/// Start the pump task for a connection whose handshake has completed.
pub(crate) fn spawn_pump(
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    command_rx: mpsc::Receiver<Outbound>,
    shared: Arc<Shared>,
    event_tx: mpsc::Sender<ConnectionEvent>,
) {
    tokio::spawn(pump_task(reader, writer, command_rx, shared, event_tx));
}

async fn pump_task(
    reader: OwnedReadHalf,
    mut writer: OwnedWriteHalf,
    mut command_rx: mpsc::Receiver<Outbound>,
    shared: Arc<Shared>,
    event_tx: mpsc::Sender<ConnectionEvent>,
) {
    info!("message pump started");

    let mut pending: HashMap<u32, oneshot::Sender<DbgpResult<Element>>> = HashMap::new();

    // The socket is read by its own task. read_message consumes frame bytes
    // incrementally and must never be dropped mid-frame, so the select below
    // only polls cancel-safe channel recvs.
    let (inbound_tx, mut inbound_rx) = mpsc::channel(32);
    let read_task = tokio::spawn(read_task(reader, inbound_tx));

    loop {
        tokio::select! {
            cmd = command_rx.recv() => {
                match cmd {
                    Some(Outbound::Wait { bytes, txid, reply_tx }) => {
                        if let Err(e) = write_all(&mut writer, &bytes).await {
                            reply_tx.send(Err(e)).ok();
                            continue;
                        }
                        pending.insert(txid, reply_tx);
                    }
                    Some(Outbound::Fire { bytes }) => {
                        if let Err(e) = write_all(&mut writer, &bytes).await {
                            error!("failed to send command: {}", e);
                        }
                    }
                    None => {
                        // All handles dropped; close the socket.
                        break;
                    }
                }
            }

            inbound = inbound_rx.recv() => {
                match inbound {
                    Some(Ok(mut root)) => {
                        decode_encoded_content(&mut root);
                        let outcome = dispatch_unsolicited(&root, &shared, &event_tx);

                        // Route responses to their waiter, carrying any
                        // engine error with them.
                        if root.name == "response" {
                            let txid = root
                                .attr("transaction_id")
                                .and_then(|s| s.parse::<u32>().ok());
                            if let Some(reply_tx) = txid.and_then(|id| pending.remove(&id)) {
                                match outcome {
                                    Ok(()) => reply_tx.send(Ok(root)).ok(),
                                    Err(e) => reply_tx.send(Err(e)).ok(),
                                };
                                continue;
                            }
                        }

                        // Unsolicited traffic never crashes the client.
                        if let Err(e) = outcome {
                            warn!("error handling unsolicited message: {}", e);
                        }
                    }
                    Some(Err(e)) => {
                        error!("failed to read message: {}", e);
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    read_task.abort();

    // The connection is terminal once the pump stops.
    let old = shared.status();
    if old != EngineStatus::Stopped {
        shared.set_status(EngineStatus::Stopped);
        emit(
            &event_tx,
            ConnectionEvent::StatusChange {
                old,
                new: EngineStatus::Stopped,
            },
        );
    }

    for (_, reply_tx) in pending.drain() {
        reply_tx.send(Err(DbgpError::SocketDestroyed)).ok();
    }

    info!("message pump shutting down");
}

/// Read framed messages off the socket until it fails or the pump goes
/// away. Owning the reader here keeps frame parsing free of cancellation.
async fn read_task(mut reader: OwnedReadHalf, inbound_tx: mpsc::Sender<DbgpResult<Element>>) {
    loop {
        let result = read_message(&mut reader).await;
        let failed = result.is_err();
        if inbound_tx.send(result).await.is_err() || failed {
            break;
        }
    }
}

async fn write_all(writer: &mut OwnedWriteHalf, bytes: &[u8]) -> DbgpResult<()> {
    writer.write_all(bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Process one inbound message through the unsolicited path: raise engine
/// errors, track status transitions, emit stream events. Used both by the
/// pump and by the handshake phase before the pump exists.
pub(crate) fn dispatch_unsolicited(
    root: &Element,
    shared: &Shared,
    event_tx: &mpsc::Sender<ConnectionEvent>,
) -> DbgpResult<()> {
    match root.name.as_str() {
        "response" => {
            if let Some(error) = root.find_child("error") {
                return Err(engine_error(error));
            }
            apply_response_status(root, shared, event_tx);
            Ok(())
        }
        "stream" => {
            let data = root.text.clone();
            let event = if root.attr_or("type", "stdout") == "stdout" {
                ConnectionEvent::Stdout(data)
            } else {
                ConnectionEvent::Stderr(data)
            };
            emit(event_tx, event);
            Ok(())
        }
        "init" => {
            // The handshake consumes init directly; seeing one here means
            // the engine re-sent it.
            warn!("unexpected init packet after handshake");
            Ok(())
        }
        other => {
            warn!("unknown root element '{}'", other);
            Ok(())
        }
    }
}

/// Update the cached status from a status-bearing response, unless the
/// originating command was `status` or `interact`, and emit a StatusChange
/// event when it actually changed.
fn apply_response_status(
    root: &Element,
    shared: &Shared,
    event_tx: &mpsc::Sender<ConnectionEvent>,
) {
    let command = root.attr_or("command", "");
    let Some(status) = root.attr("status") else {
        return;
    };
    if command == "status" || command == "interact" {
        return;
    }

    match EngineStatus::from_str(status) {
        Ok(new) => {
            let old = shared.status();
            if new != old {
                debug!("status change: {} -> {}", old, new);
                shared.set_status(new);
                emit(event_tx, ConnectionEvent::StatusChange { old, new });
            }
        }
        Err(_) => {
            warn!("got unknown status '{}'", status);
        }
    }
}

/// Build an EngineError from a response's <error> element.
pub(crate) fn engine_error(error: &Element) -> DbgpError {
    let code = error
        .attr("code")
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(0);
    let apperr = error.attr_or("apperr", "").to_string();
    let message = error
        .find_child("message")
        .map(|m| m.text.clone())
        .unwrap_or_default();

    debug!(
        "got response error: code {}; app error '{}'; message '{}'",
        code, apperr, message
    );
    DbgpError::Engine {
        code,
        apperr,
        message,
    }
}

pub(crate) fn emit(event_tx: &mpsc::Sender<ConnectionEvent>, event: ConnectionEvent) {
    match event_tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(event)) => {
            error!("event channel full, dropping {:?}", event);
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("event receiver dropped, discarding event");
        }
    }
}
