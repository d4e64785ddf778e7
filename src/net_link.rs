use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Duration, timeout};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message};
use tracing::{debug, info, warn};
use url::Url;

use crate::audio::EncodedChunk;
use crate::config::Config;
use crate::error::{SessionError, SessionResult};
use crate::protocol::{self, ServerUpdate};
use crate::transport::{Transport, TransportEvent, TransportLink};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = SplitSink<WsStream, Message>;
type WsRead = SplitStream<WsStream>;

const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// WebSocket transport to the live conversational endpoint.
///
/// `open` connects, sends the setup message and waits for `setupComplete`;
/// after that a background task pumps outbound chunks and inbound events.
#[derive(Default)]
pub struct WsTransport {
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl WsTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn open(&mut self, config: &Config) -> SessionResult<TransportLink> {
        self.close().await;

        let fallback_rate = config.playback_sample_rate;
        let (write, read, pending) = timeout(config.connect_timeout(), connect_and_setup(config))
            .await
            .map_err(|_| {
                SessionError::Transport(format!(
                    "no setup acknowledgement within {}ms",
                    config.connect_timeout_ms
                ))
            })??;

        let (event_tx, event_rx) = mpsc::channel(config.event_channel_capacity.max(1));
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_queue_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        // setupComplete 之后同一批次里可能已经带有事件
        for event in pending {
            let _ = event_tx.send(event).await;
        }

        self.shutdown = Some(shutdown_tx);
        self.task = Some(tokio::spawn(pump(
            write,
            read,
            outbound_rx,
            event_tx,
            shutdown_rx,
            fallback_rate,
        )));

        Ok(TransportLink {
            outbound: outbound_tx,
            events: event_rx,
        })
    }

    async fn close(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(mut task) = self.task.take() {
            if timeout(CLOSE_GRACE, &mut task).await.is_err() {
                warn!("WebSocket task did not stop in time, aborting");
                task.abort();
            }
        }
    }
}

fn build_request(
    config: &Config,
) -> SessionResult<tokio_tungstenite::tungstenite::http::Request<()>> {
    // 根据配置构建WebSocket请求
    let url = Url::parse(&config.ws_url)?;
    let host = match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{}:{}", host, port),
        (Some(host), None) => host.to_string(),
        (None, _) => return Err(SessionError::Transport(format!("no host in {}", config.ws_url))),
    };

    let mut builder = tokio_tungstenite::tungstenite::http::Request::builder()
        .method("GET")
        .uri(config.ws_url.as_str())
        .header("Host", host)
        .header("Connection", "Upgrade")
        .header("Upgrade", "websocket")
        .header("Sec-WebSocket-Version", "13")
        .header(
            "Sec-WebSocket-Key",
            tokio_tungstenite::tungstenite::handshake::client::generate_key(),
        )
        .header("Client-Id", &config.client_id)
        .header("Protocol-Version", "1");
    if !config.ws_token.is_empty() {
        builder = builder.header("Authorization", format!("Bearer {}", config.ws_token));
    }
    Ok(builder.body(())?)
}

async fn connect_and_setup(config: &Config) -> SessionResult<(WsWrite, WsRead, Vec<TransportEvent>)> {
    let request = build_request(config)?;

    info!(url = %config.ws_url, "Connecting");
    let (ws_stream, _) = connect_async(request).await?;
    let (mut write, mut read) = ws_stream.split();

    let setup = protocol::setup_message(config)?;
    debug!(model = %config.model, "Sending setup");
    write.send(Message::Text(setup.into())).await?;

    // 等待服务端的 setupComplete 确认
    loop {
        let msg = match read.next().await {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => return Err(e.into()),
            None => return Err(SessionError::Transport("connection closed during setup".into())),
        };
        let update = match &msg {
            Message::Close(frame) => {
                return Err(SessionError::Transport(format!(
                    "server closed connection during setup: {}",
                    describe_close(frame.as_ref())
                )));
            }
            _ => server_update(&msg, config.playback_sample_rate),
        };
        if let Some(update) = update {
            if update.setup_complete {
                info!("Session setup complete");
                return Ok((write, read, update.events));
            }
        }
    }
}

/// Text and binary frames may both carry JSON server messages.
fn server_update(msg: &Message, fallback_rate: u32) -> Option<ServerUpdate> {
    match msg {
        Message::Text(text) => protocol::parse_server_message(text.as_str(), fallback_rate),
        Message::Binary(data) => match std::str::from_utf8(data) {
            Ok(text) => protocol::parse_server_message(text, fallback_rate),
            Err(_) => {
                warn!(len = data.len(), "Ignoring non-UTF8 binary frame");
                None
            }
        },
        _ => None,
    }
}

fn describe_close(frame: Option<&CloseFrame>) -> String {
    match frame {
        Some(frame) => format!("{} {}", u16::from(frame.code), frame.reason.as_str()),
        None => "no close frame".to_string(),
    }
}

async fn pump(
    mut write: WsWrite,
    mut read: WsRead,
    mut outbound: mpsc::Receiver<EncodedChunk>,
    events: mpsc::Sender<TransportEvent>,
    mut shutdown: oneshot::Receiver<()>,
    fallback_rate: u32,
) {
    let terminal = loop {
        tokio::select! {
            _ = &mut shutdown => {
                debug!("Closing WebSocket");
                let _ = write.send(Message::Close(None)).await;
                let _ = write.close().await;
                return;
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Close(frame))) => {
                        let normal = frame.as_ref().is_none_or(|f| f.code == CloseCode::Normal);
                        info!(reason = %describe_close(frame.as_ref()), "Server closed connection");
                        break if normal {
                            TransportEvent::Closed
                        } else {
                            TransportEvent::Error(format!("connection closed: {}", describe_close(frame.as_ref())))
                        };
                    }
                    Some(Ok(msg)) => {
                        if let Some(update) = server_update(&msg, fallback_rate) {
                            for event in update.events {
                                if events.send(event).await.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                    Some(Err(e)) => break TransportEvent::Error(e.to_string()),
                    None => break TransportEvent::Closed,
                }
            }
            Some(chunk) = outbound.recv() => {
                let text = match protocol::realtime_input(&chunk) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Failed to encode outbound chunk: {}", e);
                        continue;
                    }
                };
                if let Err(e) = write.send(Message::Text(text.into())).await {
                    break TransportEvent::Error(e.to_string());
                }
            }
        }
    };

    let _ = events.send(terminal).await;
}
