//! Per-client session handling.
//!
//! Each connected client gets one task that reads commands off its private
//! request pipe and answers every command with exactly one response line
//! on its response pipe. Published notifications ride a separate bounded
//! outbox so a publisher is never blocked by this client; when the client
//! announced a dedicated notification pipe they are written there,
//! otherwise they share the response pipe.
//!
//! A session ends on DISCONNECT, on request-pipe EOF or error (implicit
//! disconnect), or on server shutdown. Teardown closes the pipes, removes
//! their filesystem entries (tolerating prior removal), and drops every
//! subscription the session owned.

use std::path::PathBuf;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::pipe;
use tokio::sync::{broadcast, mpsc, OwnedSemaphorePermit};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{GalenaError, Result};
use crate::pipe as fifo;
use crate::runtime::{SessionId, SharedSubscriptionRegistry};
use crate::storage::MAX_KEY_SIZE;

/// Longest accepted published message line, in bytes.
pub const MAX_MESSAGE_SIZE: usize = 1024;

/// The private channel paths a client announced at registration.
///
/// Two wire forms reach the registration pipe: `req;resp` and
/// `CONNECT|req|resp|notif`. Only the second carries a dedicated
/// notification path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub request: PathBuf,
    pub response: PathBuf,
    pub notification: Option<PathBuf>,
}

impl Announcement {
    /// Parse one registration line.
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("CONNECT") {
            let rest = rest
                .strip_prefix('|')
                .ok_or_else(|| GalenaError::Handshake("CONNECT without separator".to_string()))?;
            let mut parts = rest.split('|');
            let (request, response, notification) =
                match (parts.next(), parts.next(), parts.next(), parts.next()) {
                    (Some(req), Some(resp), Some(notif), None)
                        if !req.is_empty() && !resp.is_empty() && !notif.is_empty() =>
                    {
                        (req, resp, notif)
                    }
                    _ => {
                        return Err(GalenaError::Handshake(
                            "CONNECT expects three pipe paths".to_string(),
                        ))
                    }
                };
            return Ok(Self {
                request: PathBuf::from(request),
                response: PathBuf::from(response),
                notification: Some(PathBuf::from(notification)),
            });
        }

        if let Some((request, response)) = line.split_once(';') {
            if request.is_empty() || response.is_empty() {
                return Err(GalenaError::Handshake(
                    "announcement with empty pipe path".to_string(),
                ));
            }
            return Ok(Self {
                request: PathBuf::from(request),
                response: PathBuf::from(response),
                notification: None,
            });
        }

        Err(GalenaError::Handshake(format!(
            "unrecognized announcement: {line:?}"
        )))
    }
}

/// One parsed session protocol line.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SessionCommand {
    Disconnect,
    Subscribe(String),
    Unsubscribe(String),
    Publish { key: String, message: String },
    /// Recognized verb, unusable arguments; carries the verb for the
    /// error line.
    Malformed(&'static str),
    Unknown,
}

/// Parse one line off the request pipe. The verb and its arguments are
/// separated by exactly one byte, either `|` or a space.
fn parse_session(line: &str) -> SessionCommand {
    let line = line.trim_end_matches(['\r', '\n']);
    if line == "DISCONNECT" {
        return SessionCommand::Disconnect;
    }
    if let Some(rest) = line.strip_prefix("SUBSCRIBE") {
        return match key_arg(rest) {
            Some(key) => SessionCommand::Subscribe(key),
            None => SessionCommand::Malformed("SUBSCRIBE"),
        };
    }
    if let Some(rest) = line.strip_prefix("UNSUBSCRIBE") {
        return match key_arg(rest) {
            Some(key) => SessionCommand::Unsubscribe(key),
            None => SessionCommand::Malformed("UNSUBSCRIBE"),
        };
    }
    if let Some(rest) = line.strip_prefix("PUBLISH") {
        return match publish_args(rest) {
            Some((key, message)) => SessionCommand::Publish { key, message },
            None => SessionCommand::Malformed("PUBLISH"),
        };
    }
    SessionCommand::Unknown
}

/// `<sep><key>`: first whitespace-delimited token after the separator.
fn key_arg(rest: &str) -> Option<String> {
    let arg = rest.strip_prefix(|c| c == '|' || c == ' ')?;
    let key = arg.split_whitespace().next()?;
    if key.len() > MAX_KEY_SIZE {
        return None;
    }
    Some(key.to_string())
}

/// `<sep><key> <message>`: key token, then the rest of the line.
fn publish_args(rest: &str) -> Option<(String, String)> {
    let arg = rest.strip_prefix(|c| c == '|' || c == ' ')?;
    let arg = arg.trim_start();
    let (key, message) = arg.split_once(char::is_whitespace)?;
    let message = message.trim_start();
    if key.is_empty() || key.len() > MAX_KEY_SIZE {
        return None;
    }
    if message.is_empty() || message.len() > MAX_MESSAGE_SIZE {
        return None;
    }
    Some((key.to_string(), message.to_string()))
}

/// Server-side state for one connected client.
struct Session {
    id: SessionId,
    announcement: Announcement,
    registry: SharedSubscriptionRegistry,
    /// Ordered, awaited responses to this session's own commands.
    responses: mpsc::Sender<String>,
    /// Best-effort notification deliveries; handed to the registry.
    notify: mpsc::Sender<String>,
    /// Admission slot, released when the session is dropped.
    _permit: OwnedSemaphorePermit,
}

/// Open the announced pipes and run the session to completion in its own
/// task. The listener moves on as soon as the task is spawned; a client
/// that is slow to open its end of the handshake delays only itself.
pub fn spawn(
    id: SessionId,
    announcement: Announcement,
    registry: SharedSubscriptionRegistry,
    outbox_depth: usize,
    permit: OwnedSemaphorePermit,
    shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        match Session::open(id, announcement, registry, outbox_depth, permit).await {
            Ok((session, request)) => session.run(request, shutdown).await,
            Err(e) => warn!(session = id, error = %e, "session handshake failed"),
        }
    })
}

impl Session {
    /// Open the client's pipes in handshake order: the request receiver
    /// first (the client blocks opening its write end until this
    /// happens), then the outbound senders, which wait for the client to
    /// open its reading ends.
    async fn open(
        id: SessionId,
        announcement: Announcement,
        registry: SharedSubscriptionRegistry,
        outbox_depth: usize,
        permit: OwnedSemaphorePermit,
    ) -> Result<(Self, pipe::Receiver)> {
        let request = fifo::open_receiver(&announcement.request)?;
        let response = fifo::open_sender(&announcement.response).await?;

        let (responses, response_rx) = mpsc::channel(outbox_depth);
        tokio::spawn(writer_loop(id, response_rx, response));

        let notify = match &announcement.notification {
            Some(path) => {
                let notification = fifo::open_sender(path).await?;
                let (tx, rx) = mpsc::channel(outbox_depth);
                tokio::spawn(writer_loop(id, rx, notification));
                tx
            }
            None => responses.clone(),
        };

        info!(session = id, request = %announcement.request.display(), "session established");
        Ok((
            Self {
                id,
                announcement,
                registry,
                responses,
                notify,
                _permit: permit,
            },
            request,
        ))
    }

    /// Blocking read loop over the request pipe until disconnect, EOF,
    /// read error, or server shutdown.
    async fn run(self, request: pipe::Receiver, mut shutdown: broadcast::Receiver<()>) {
        let mut lines = BufReader::new(request);
        let mut line = String::new();

        loop {
            line.clear();
            tokio::select! {
                read = lines.read_line(&mut line) => match read {
                    Ok(0) => {
                        debug!(session = self.id, "request pipe closed, implicit disconnect");
                        break;
                    }
                    Ok(_) => {
                        // A reply parks in the outbox while the client is
                        // not reading its pipe; shutdown must still end
                        // the session.
                        tokio::select! {
                            outcome = self.dispatch(&line) => {
                                if outcome.is_err() {
                                    break;
                                }
                            }
                            _ = shutdown.recv() => {
                                debug!(session = self.id, "server shutdown, closing session");
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        warn!(session = self.id, error = %e, "request read failed, implicit disconnect");
                        break;
                    }
                },
                _ = shutdown.recv() => {
                    debug!(session = self.id, "server shutdown, closing session");
                    break;
                }
            }
        }

        self.teardown();
    }

    /// Handle one command line. Err means the session must end.
    async fn dispatch(&self, line: &str) -> Result<()> {
        match parse_session(line) {
            SessionCommand::Disconnect => {
                debug!(session = self.id, "client requested disconnect");
                // The client may close its pipes right after the command,
                // so a failed acknowledgement is not an error.
                let _ = self.responses.send("DISCONNECTED".to_string()).await;
                Err(GalenaError::ChannelClosed)
            }
            SessionCommand::Subscribe(key) => {
                self.registry.subscribe(self.id, &key, self.notify.clone());
                self.respond("SUBSCRIBED".to_string()).await
            }
            SessionCommand::Unsubscribe(key) => {
                self.registry.unsubscribe(self.id, &key);
                self.respond("UNSUBSCRIBED".to_string()).await
            }
            SessionCommand::Publish { key, message } => {
                let delivered = self.registry.publish(&key, &message, self.id);
                debug!(session = self.id, key, delivered, "published");
                self.respond("MESSAGE PUBLISHED".to_string()).await
            }
            SessionCommand::Malformed(verb) => {
                self.respond(format!("ERROR: malformed {verb} command")).await
            }
            SessionCommand::Unknown => self.respond("UNKNOWN COMMAND".to_string()).await,
        }
    }

    async fn respond(&self, response: String) -> Result<()> {
        self.responses
            .send(response)
            .await
            .map_err(|_| GalenaError::ChannelClosed)
    }

    /// Remove the client's pipe entries and every subscription the
    /// session owned, in that order, then let the outbox writers drain
    /// and close.
    fn teardown(&self) {
        let mut paths = vec![&self.announcement.request, &self.announcement.response];
        if let Some(notification) = &self.announcement.notification {
            paths.push(notification);
        }
        for path in paths {
            if let Err(e) = fifo::remove(path) {
                warn!(session = self.id, path = %path.display(), error = %e, "failed to remove pipe");
            }
        }

        let removed = self.registry.remove_all(self.id);
        info!(session = self.id, subscriptions = removed, "session closed");
    }
}

/// Drain one outbox into its pipe, one line per message. Exits when every
/// sender is gone (session teardown) or the client stops reading.
async fn writer_loop(id: SessionId, mut rx: mpsc::Receiver<String>, mut pipe: pipe::Sender) {
    while let Some(line) = rx.recv().await {
        let frame = format!("{line}\n");
        if let Err(e) = pipe.write_all(frame.as_bytes()).await {
            warn!(session = id, error = %e, "outbound pipe write failed");
            break;
        }
    }
}
