//! One WebSocket connection to one relay.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use futures_util::{
    stream::{SplitSink, StreamExt},
    SinkExt,
};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_socks::tcp::Socks5Stream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{client_async, tungstenite::Message, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::event::Event;

/// Blanket trait for boxed async read/write streams.
trait AsyncReadWrite: AsyncRead + AsyncWrite {}
impl<T: AsyncRead + AsyncWrite> AsyncReadWrite for T {}

type WsStream = WebSocketStream<Box<dyn AsyncReadWrite + Unpin + Send>>;

/// Frame received from a relay, already demultiplex-ready.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessage {
    /// `["EVENT", sub_id, event]`
    Event { sub_id: String, event: Event },
    /// `["EOSE", sub_id]`: end of stored events for one subscription.
    Eose { sub_id: String },
    /// `["OK", event_id, accepted, message]`: publish acknowledgement.
    Ok {
        event_id: String,
        accepted: bool,
        message: String,
    },
    /// `["NOTICE", message]`
    Notice { message: String },
}

/// Parse one inbound text frame. Returns `None` for frames that are not
/// valid JSON or not a recognized message shape; such frames are dropped by
/// the caller, never fatal.
pub fn parse_frame(txt: &str) -> Option<RelayMessage> {
    let val: Value = serde_json::from_str(txt).ok()?;
    let arr = val.as_array()?;
    match arr.first()?.as_str()? {
        "EVENT" if arr.len() >= 3 => {
            let sub_id = arr[1].as_str()?.to_string();
            let event = serde_json::from_value::<Event>(arr[2].clone()).ok()?;
            Some(RelayMessage::Event { sub_id, event })
        }
        "EOSE" if arr.len() >= 2 => Some(RelayMessage::Eose {
            sub_id: arr[1].as_str()?.to_string(),
        }),
        "OK" if arr.len() >= 3 => Some(RelayMessage::Ok {
            event_id: arr[1].as_str()?.to_string(),
            accepted: arr[2].as_bool()?,
            message: arr
                .get(3)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        }),
        "NOTICE" if arr.len() >= 2 => Some(RelayMessage::Notice {
            message: arr[1].as_str()?.to_string(),
        }),
        _ => None,
    }
}

/// A live connection to one relay URL.
///
/// A handle exists only once the handshake completed (`Open`); it moves to
/// `Closed` on network drop, relay-side close, or [`RelayConnection::close`],
/// and never reopens. Sends on a closed connection fail fast with
/// [`Error::NotReady`] and nothing is buffered.
pub struct RelayConnection {
    url: String,
    writer: tokio::sync::Mutex<SplitSink<WsStream, Message>>,
    open: Arc<AtomicBool>,
    reader: tokio::task::JoinHandle<()>,
}

impl RelayConnection {
    /// Connect to `url`, optionally via a SOCKS5 proxy, and start the reader
    /// task. Inbound frames are parsed and forwarded over the returned
    /// channel; the channel closes when the connection does.
    pub async fn open(
        url: &str,
        proxy: Option<&str>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<RelayMessage>)> {
        let parsed = Url::parse(url)?;
        let host = parsed.host_str().ok_or_else(|| Error::BadRelayUrl {
            url: url.into(),
            reason: "missing host".into(),
        })?;
        let port = parsed.port_or_known_default().ok_or_else(|| Error::BadRelayUrl {
            url: url.into(),
            reason: "missing port".into(),
        })?;
        let request = url.into_client_request()?;
        let stream: Box<dyn AsyncReadWrite + Unpin + Send> = if let Some(proxy) = proxy {
            Box::new(Socks5Stream::connect(proxy, (host, port)).await?)
        } else {
            Box::new(TcpStream::connect((host, port)).await?)
        };
        let (ws, _) = client_async(request, stream).await?;
        let (writer, mut read) = ws.split();

        let open = Arc::new(AtomicBool::new(true));
        let (tx, rx) = mpsc::unbounded_channel();
        let flag = open.clone();
        let relay = url.to_string();
        let reader = tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(txt)) => match parse_frame(&txt) {
                        Some(frame) => {
                            if tx.send(frame).is_err() {
                                break;
                            }
                        }
                        None => warn!(relay = %relay, "dropping undecodable frame"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        debug!(relay = %relay, "read error: {e}");
                        break;
                    }
                }
            }
            flag.store(false, Ordering::SeqCst);
            // tx drops here; the receiver observes end-of-stream.
        });

        Ok((
            Self {
                url: url.to_string(),
                writer: tokio::sync::Mutex::new(writer),
                open,
                reader,
            },
            rx,
        ))
    }

    /// Relay URL this connection is bound to.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Whether the connection is currently `Open`.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Send one text frame. Fails fast with [`Error::NotReady`] when the
    /// connection is not open; the frame is never queued.
    pub async fn send(&self, text: String) -> Result<()> {
        if !self.is_open() {
            return Err(Error::NotReady(self.url.clone()));
        }
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.send(Message::Text(text)).await {
            self.open.store(false, Ordering::SeqCst);
            return Err(e.into());
        }
        Ok(())
    }

    /// Close the connection. Idempotent: only the first call sends the
    /// closing frame, later calls are no-ops.
    pub async fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            let mut writer = self.writer.lock().await;
            let _ = writer.send(Message::Close(None)).await;
        }
    }
}

impl Drop for RelayConnection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
