use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_tungstenite::MaybeTlsStream;

use crate::{
    BetSlip, ErrorCode, Game, GameSummary, Participant, PotentialCategory, PotentialGame,
};

#[derive(Deserialize, Serialize, Debug, PartialEq, Eq, Clone)]
pub enum Request {
    Authenticate { token: String },
    WhoAmI,
    CreateGame(PotentialGame),
    ListGames,
    ReadGame { game_id: String },
    AddCategory { game_id: String, category: PotentialCategory },
    GenerateJoinCode { game_id: String },
    VerifyJoinCode { code: String },
    JoinGame { game_id: String, code: String },
    PlaceBets { game_id: String, bets: Vec<BetSlip> },
    LockGame { game_id: String },
    ResolveCategory { game_id: String, category_id: String, winner_id: String },
    DeleteGame { game_id: String },
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub enum Response {
    None,
    Authenticated { principal: String },
    WhoAmI(String),
    Game(Game),
    Games(Vec<GameSummary>),
    JoinCode { code: String, expires_at: DateTime<Utc> },
    JoinCodeValid(GameSummary),
    Joined(Participant),
    BetsPlaced { balance: Decimal, bets: Vec<crate::Bet> },
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct ErrorReply {
    pub code: ErrorCode,
    pub message: String,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub enum Packet {
    RequestPacket(Request),
    ResponsePacket(Response),
    Error(ErrorReply),
}

impl Packet {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Packet::Error(ErrorReply {
            code,
            message: message.into(),
        })
    }
}

/// True when `error` means the peer went away rather than sent garbage.
pub fn is_disconnect(error: &anyhow::Error) -> bool {
    use tokio_tungstenite::tungstenite::error::{Error as WsError, ProtocolError};

    if let Some(io) = error.downcast_ref::<std::io::Error>() {
        return io.kind() == std::io::ErrorKind::ConnectionAborted;
    }
    matches!(
        error.downcast_ref::<WsError>(),
        Some(WsError::ConnectionClosed)
            | Some(WsError::AlreadyClosed)
            | Some(WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake))
    )
}

/// True when a frame arrived intact but did not decode as a [`Packet`].
pub fn is_malformed(error: &anyhow::Error) -> bool {
    error.downcast_ref::<rmp_serde::decode::Error>().is_some()
}

/// Connection accepted by the server.
pub type ServerConnection = Connection<TcpStream>;
/// Connection dialled by a client, possibly over TLS.
pub type ClientConnection = Connection<MaybeTlsStream<TcpStream>>;

pub struct Connection<S> {
    connection: socket::TungsteniteWebSocket<S>,
}

impl Connection<TcpStream> {
    pub async fn from_tcp_stream(connection: TcpStream) -> anyhow::Result<Self> {
        let ws = socket::TungsteniteWebSocket::accept(connection).await?;

        Ok(Self { connection: ws })
    }
}

impl Connection<MaybeTlsStream<TcpStream>> {
    pub async fn connect(address: &str) -> anyhow::Result<Self> {
        let ws = socket::TungsteniteWebSocket::connect(address).await?;

        Ok(Self { connection: ws })
    }
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub async fn read(&mut self) -> anyhow::Result<Packet> {
        Ok(rmp_serde::from_slice(&self.connection.read().await?)?)
    }

    pub async fn send(&mut self, data: Packet) -> anyhow::Result<()> {
        self.connection.write_all(&rmp_serde::to_vec(&data)?).await
    }

    /// Send a request and wait for the packet answering it.
    pub async fn request(&mut self, request: Request) -> anyhow::Result<Packet> {
        self.send(Packet::RequestPacket(request)).await?;
        self.read().await
    }
}

trait WebSocketConnection {
    async fn read<'a>(&'a mut self) -> anyhow::Result<Vec<u8>>;

    async fn write_all<'a>(&'a mut self, buf: &'a [u8]) -> anyhow::Result<()>;
}

mod socket {
    use std::io::ErrorKind;

    use anyhow::bail;
    use futures_util::{SinkExt, StreamExt};
    use tokio::io::{AsyncRead, AsyncWrite};
    use tokio::net::TcpStream;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

    use crate::network::WebSocketConnection;

    pub struct TungsteniteWebSocket<S> {
        socket: WebSocketStream<S>,
    }

    impl TungsteniteWebSocket<TcpStream> {
        pub async fn accept(stream: TcpStream) -> anyhow::Result<Self> {
            let socket = tokio_tungstenite::accept_async(stream).await?;
            Ok(Self { socket })
        }
    }

    impl TungsteniteWebSocket<MaybeTlsStream<TcpStream>> {
        pub async fn connect(address: &str) -> anyhow::Result<Self> {
            let (socket, _) = tokio_tungstenite::connect_async(address).await?;
            Ok(Self { socket })
        }
    }

    fn closed() -> anyhow::Error {
        std::io::Error::new(ErrorKind::ConnectionAborted, "connection closed").into()
    }

    impl<S> WebSocketConnection for TungsteniteWebSocket<S>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        async fn read<'a>(&'a mut self) -> anyhow::Result<Vec<u8>> {
            loop {
                let message = self.socket.next().await.ok_or_else(closed)??;
                match message {
                    Message::Binary(data) => return Ok(data),
                    Message::Close(_) => return Err(closed()),
                    // control frames are answered by tungstenite itself
                    Message::Ping(_) | Message::Pong(_) => continue,
                    _ => bail!("incorrect data type received"),
                }
            }
        }

        async fn write_all<'a>(&'a mut self, buf: &'a [u8]) -> anyhow::Result<()> {
            Ok(self.socket.send(Message::Binary(buf.to_vec())).await?)
        }
    }
}
