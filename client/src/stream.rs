use async_trait::async_trait;
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt,
    StreamExt,
};
use reqwest::Url;
use thiserror::Error;
use tokio::{net::TcpStream, sync::mpsc};
use tokio_tungstenite::{
    tungstenite::{
        self,
        client::IntoClientRequest,
        http::{header, HeaderValue},
        Message,
    },
    MaybeTlsStream,
    WebSocketStream,
};
use tracing::*;

use pool_shared::utils::retry;

use crate::restful::{ApiError, PoolApi};

const CHANNEL_SIZE: usize = 100;
const TIMESTAMP_RETRIES: u32 = 3;
const TIMESTAMP_RETRY_DELAY: u64 = 500;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("fail to fetch pool time: {0}")]
    Time(#[from] ApiError),
    #[error("fail to connect: {0}")]
    Connect(#[from] tungstenite::Error),
    #[error("invalid connection request: {0}")]
    Request(String),
    #[error("connection closed")]
    Closed,
}

/// inbound, from the pump to the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamMessage {
    Frame(Vec<u8>),
    Ping(Vec<u8>),
}

/// outbound, from the session to the pump
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamCommand {
    Frame(Vec<u8>),
    Pong(Vec<u8>),
}

/// One open connection to the pool.
///
/// The socket itself lives in a pump task. Dropping the connection closes it;
/// the pump ending (socket error or close) shows up as `recv() == None` and
/// `closed()` resolving.
#[derive(Debug)]
pub struct Connection {
    writer: mpsc::Sender<StreamCommand>,
    reader: mpsc::Receiver<StreamMessage>,
}

impl Connection {
    pub fn new(writer: mpsc::Sender<StreamCommand>, reader: mpsc::Receiver<StreamMessage>) -> Self {
        Self { writer, reader }
    }

    pub async fn send(&self, command: StreamCommand) -> Result<(), StreamError> {
        self.writer.send(command).await.map_err(|_| StreamError::Closed)
    }

    pub async fn send_frame(&self, frame: Vec<u8>) -> Result<(), StreamError> {
        self.send(StreamCommand::Frame(frame)).await
    }

    pub async fn recv(&mut self) -> Option<StreamMessage> {
        self.reader.recv().await
    }

    pub async fn closed(&self) {
        self.writer.closed().await
    }
}

/// How the session reaches the pool.
#[async_trait]
pub trait PoolTransport: Send + Sync {
    /// pool clock, used as the authentication nonce
    async fn timestamp(&self) -> Result<u64, StreamError>;

    async fn connect(&self, timestamp: u64, authorization: &str)
        -> Result<Connection, StreamError>;
}

/// Websocket transport: `wss://<host>/v2/ws?timestamp=<ts>`.
pub struct WsTransport {
    api: PoolApi,
    ws_url: Url,
}

impl WsTransport {
    pub fn new(api: PoolApi) -> Result<Self, StreamError> {
        let ws_url = websocket_url(api.url())?;
        Ok(Self { api, ws_url })
    }
}

/// `https` becomes `wss`, anything else `ws`.
pub fn websocket_url(base: &Url) -> Result<Url, StreamError> {
    let mut url = base.join("/v2/ws").map_err(|err| StreamError::Request(err.to_string()))?;
    let scheme = if base.scheme() == "https" { "wss" } else { "ws" };
    url.set_scheme(scheme)
        .map_err(|_| StreamError::Request(format!("cannot use {scheme} for {base}")))?;
    Ok(url)
}

#[async_trait]
impl PoolTransport for WsTransport {
    async fn timestamp(&self) -> Result<u64, StreamError> {
        let func = || self.api.timestamp();
        Ok(retry(func, TIMESTAMP_RETRIES, TIMESTAMP_RETRY_DELAY).await?)
    }

    async fn connect(
        &self,
        timestamp: u64,
        authorization: &str,
    ) -> Result<Connection, StreamError> {
        let mut url = self.ws_url.clone();
        url.query_pairs_mut().append_pair("timestamp", &timestamp.to_string());

        let host = &url[url::Position::BeforeHost..url::Position::AfterPort];
        let host = HeaderValue::from_str(host).map_err(|err| StreamError::Request(err.to_string()))?;
        let authorization =
            HeaderValue::from_str(authorization).map_err(|err| StreamError::Request(err.to_string()))?;

        let mut request = url.as_str().into_client_request()?;
        request.headers_mut().insert(header::HOST, host);
        request.headers_mut().insert(header::AUTHORIZATION, authorization);

        info!("connect: [{}]", self.ws_url);
        let (stream, _) = tokio_tungstenite::connect_async(request).await?;

        Ok(spawn_pump(stream))
    }
}

type StreamWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type StreamReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Move the socket into its own task and hand back the channel ends.
pub fn spawn_pump(stream: WebSocketStream<MaybeTlsStream<TcpStream>>) -> Connection {
    let (reader_tx, reader_rx) = mpsc::channel(CHANNEL_SIZE);
    let (writer_tx, mut writer_rx) = mpsc::channel(CHANNEL_SIZE);

    tokio::spawn(async move {
        let (mut write, mut read): (StreamWriter, StreamReader) = stream.split();

        loop {
            if let Err(err) = tokio::select! {
                res = writer_rx.recv() => {
                    match res {
                        Some(command) => stream_write(command, &mut write).await,
                        None => {
                            // session dropped the connection
                            let _ = write.send(Message::Close(None)).await;
                            break;
                        }
                    }
                },
                res = read.next() => stream_read(res, &reader_tx).await,
            } {
                warn!("{err:#}");
                break;
            }
        }
        debug!("[stream] pump shutdown");
    });

    Connection::new(writer_tx, reader_rx)
}

/// receive the command and sent to server
async fn stream_write(command: StreamCommand, ws_tx: &mut StreamWriter) -> anyhow::Result<()> {
    match command {
        StreamCommand::Frame(data) => ws_tx.send(Message::Binary(data)).await,
        StreamCommand::Pong(data) => ws_tx.send(Message::Pong(data)).await,
    }
    .map_err(|err| anyhow::anyhow!("ws disconnection: {err:?}"))
}

/// read data from stream and use the channel send to session
async fn stream_read(
    data: Option<Result<Message, tungstenite::Error>>,
    tx: &mpsc::Sender<StreamMessage>,
) -> anyhow::Result<()> {
    let message = match data {
        None => anyhow::bail!("ws disconnection"),
        Some(Err(err)) => anyhow::bail!("fail to read from server: {err}"),
        Some(Ok(message)) => message,
    };

    let forward = match message {
        Message::Binary(bin) => StreamMessage::Frame(bin),
        Message::Ping(ping) => {
            trace!("ping arrived");
            StreamMessage::Ping(ping)
        }
        Message::Close(frame) => anyhow::bail!("server closed the connection: {frame:?}"),
        Message::Text(text) => {
            debug!("ignore text message: {text}");
            return Ok(());
        }
        _ => return Ok(()),
    };

    if tx.send(forward).await.is_err() {
        anyhow::bail!("message channel closed")
    }
    Ok(())
}
