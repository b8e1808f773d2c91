//! ConnectionIO (§4.2): owns the socket, runs the login handshake, and
//! drives the reader loop that hands parsed lines to the Dispatcher.
//!
//! TLS setup is grounded on `rust-srec`'s `danmu/providers/twitch.rs`
//! `connect_irc` (root store from `webpki_roots`, `rustls::ClientConfig`
//! with no client auth, SNI via `ServerName::try_from`) — the reference
//! repo's own `connect_and_listen` used a bare blocking `TcpStream` with no
//! TLS at all, so this is one of the places the teacher's own code had
//! nothing to generalize and the rest of the pack supplies the idiom.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio_rustls::{client::TlsStream, TlsConnector};
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig as Config;
use crate::error::{Error, Result};
use crate::message::{parse_line, IRCMessage};

/// Either half of a plaintext-or-TLS socket, unified behind one
/// read/write interface so the rest of `ConnectionIO` doesn't branch on
/// `secure`.
enum Stream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl Stream {
    fn into_split(
        self,
    ) -> (
        Box<dyn tokio::io::AsyncRead + Send + Unpin>,
        Box<dyn tokio::io::AsyncWrite + Send + Unpin>,
    ) {
        match self {
            Stream::Plain(stream) => {
                let (r, w) = tokio::io::split(stream);
                (Box::new(r), Box::new(w))
            }
            Stream::Tls(stream) => {
                let (r, w) = tokio::io::split(*stream);
                (Box::new(r), Box::new(w))
            }
        }
    }
}

async fn connect_stream(config: &Config) -> Result<Stream> {
    let addr = (config.connection.server.as_str(), config.connection.port);
    tracing::info!(server = %config.connection.server, port = config.connection.port, "connecting");
    let tcp = tokio::time::timeout(config.handshake_timeout(), TcpStream::connect(addr))
        .await
        .map_err(|_| Error::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out")))??;

    if !config.connection.secure {
        return Ok(Stream::Plain(tcp));
    }

    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(tls_config));
    let server_name = ServerName::try_from(config.connection.server.clone())?;

    let tls = connector.connect(server_name, tcp).await.map_err(Error::Io)?;
    Ok(Stream::Tls(Box::new(tls)))
}

/// Lines read off the socket, handed to whoever is driving dispatch.
pub enum ReaderEvent {
    Message(IRCMessage),
    Closed,
}

/// The write half of the connection, serialized behind one mutex so queue
/// workers and the PING/PONG responder never interleave partial lines
/// (§4.2's "single mutex serializes writes").
pub struct Writer {
    inner: Mutex<Box<dyn tokio::io::AsyncWrite + Send + Unpin>>,
}

impl Writer {
    pub async fn write_line(&self, line: &str) -> Result<()> {
        tracing::trace!(line, "send");
        let mut guard = self.inner.lock().await;
        guard.write_all(line.as_bytes()).await?;
        guard.write_all(b"\r\n").await?;
        guard.flush().await?;
        Ok(())
    }
}

/// A live connection: the writer half plus a handle to stop the reader task.
pub struct ConnectionIO {
    pub writer: Arc<Writer>,
    reader_task: tokio::task::JoinHandle<()>,
    cancel: CancellationToken,
}

impl ConnectionIO {
    /// Connect, perform the login handshake (§4.2 steps 1-3; JOINs are the
    /// caller's responsibility via the JOIN queue per step 4), and start
    /// the reader loop, forwarding every parsed line to `events`.
    pub async fn connect(
        config: &Config,
        events: mpsc::UnboundedSender<ReaderEvent>,
    ) -> Result<Self> {
        let stream = connect_stream(config).await?;
        let (read_half, write_half) = stream.into_split();
        let writer = Arc::new(Writer {
            inner: Mutex::new(write_half),
        });

        writer
            .write_line("CAP REQ :twitch.tv/tags twitch.tv/commands twitch.tv/membership")
            .await?;
        if let Some(password) = &config.identity.password {
            writer.write_line(&format!("PASS {password}")).await?;
        }
        writer.write_line(&format!("NICK {}", config.identity.nick())).await?;

        let cancel = CancellationToken::new();
        let reader_task = tokio::spawn(reader_loop(read_half, writer.clone(), events, cancel.clone()));

        Ok(ConnectionIO {
            writer,
            reader_task,
            cancel,
        })
    }

    /// Stop the reader task and wait for it to finish.
    pub async fn shutdown(&mut self) {
        self.cancel.cancel();
        let _ = (&mut self.reader_task).await;
    }
}

async fn reader_loop(
    read_half: Box<dyn tokio::io::AsyncRead + Send + Unpin>,
    writer: Arc<Writer>,
    events: mpsc::UnboundedSender<ReaderEvent>,
    cancel: CancellationToken,
) {
    let mut lines = BufReader::new(read_half).lines();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break;
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        let line = line.trim_end_matches('\r');
                        tracing::trace!(line, "recv");
                        if line.is_empty() {
                            continue;
                        }
                        if let Some(token) = line.strip_prefix("PING :") {
                            if let Err(err) = writer.write_line(&format!("PONG :{token}")).await {
                                tracing::warn!(error = %err, "failed to send PONG, closing connection");
                                let _ = events.send(ReaderEvent::Closed);
                                break;
                            }
                            continue;
                        }
                        match parse_line(line) {
                            Some(msg) => {
                                if events.send(ReaderEvent::Message(msg)).is_err() {
                                    break;
                                }
                            }
                            None => {
                                tracing::warn!(line, "failed to parse line, skipping");
                            }
                        }
                    }
                    Ok(None) => {
                        tracing::info!("connection closed by peer");
                        let _ = events.send(ReaderEvent::Closed);
                        break;
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "read error, closing connection");
                        let _ = events.send(ReaderEvent::Closed);
                        break;
                    }
                }
            }
        }
    }
}
