use std::sync::Arc;

use anyhow::bail;
use common::network::{is_disconnect, is_malformed, Packet, Request, Response, ServerConnection};
use common::ErrorCode;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::LedgerError;
use crate::identity::{IdentityProvider, Principal};
use crate::ledger_manager::{LedgerRequest, LedgerResponder};

pub async fn handle_listen_server(
    listener: TcpListener,
    identity: Arc<dyn IdentityProvider>,
    ledger_tx: mpsc::Sender<LedgerRequest>,
) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(error) => {
                warn!(%error, "failed to accept connection");
                continue;
            }
        };
        let identity = identity.clone();
        let ledger_tx = ledger_tx.clone();

        tokio::spawn(async move {
            match ServerConnection::from_tcp_stream(stream).await {
                Ok(connection) => {
                    debug!(%peer, "connection opened");
                    handle_connection(connection, identity.as_ref(), ledger_tx).await;
                    debug!(%peer, "connection closed");
                }
                Err(error) => warn!(%peer, error = %format!("{error:#}"), "websocket handshake failed"),
            }
        });
    }
}

async fn handle_connection(
    mut connection: ServerConnection,
    identity: &dyn IdentityProvider,
    ledger_tx: mpsc::Sender<LedgerRequest>,
) {
    let principal = match handle_login(&mut connection, identity).await {
        Ok(principal) => principal,
        Err(error) => {
            debug!(error = %format!("{error:#}"), "login refused");
            let refusal = LedgerError::Unauthorized;
            connection
                .send(Packet::error(refusal.code(), refusal.to_string()))
                .await
                .ok();
            return;
        }
    };
    info!(%principal, "client authenticated");

    if let Err(error) = handle_client(&principal, &mut connection, ledger_tx).await {
        warn!(%principal, error = %format!("{error:#}"), "dropping client");
        connection
            .send(Packet::error(ErrorCode::InvalidRequest, error.to_string()))
            .await
            .ok();
    }
}

async fn handle_login(
    connection: &mut ServerConnection,
    identity: &dyn IdentityProvider,
) -> anyhow::Result<Principal> {
    let packet = connection.read().await?;
    match packet {
        Packet::RequestPacket(Request::Authenticate { token }) => {
            let Some(principal) = identity.verify(&token) else {
                bail!("unknown credential");
            };
            connection
                .send(Packet::ResponsePacket(Response::Authenticated {
                    principal: principal.to_string(),
                }))
                .await?;
            Ok(principal)
        }
        other => bail!("Invalid request at login: {:?}", other),
    }
}

async fn handle_client(
    principal: &Principal,
    connection: &mut ServerConnection,
    ledger_tx: mpsc::Sender<LedgerRequest>,
) -> anyhow::Result<()> {
    loop {
        let packet = match connection.read().await {
            Ok(packet) => packet,
            // connection aborted is considered successful
            Err(error) if is_disconnect(&error) => return Ok(()),
            Err(error) if is_malformed(&error) => {
                debug!(%principal, error = %format!("{error:#}"), "undecodable frame");
                connection
                    .send(Packet::error(ErrorCode::InvalidRequest, "malformed packet"))
                    .await?;
                continue;
            }
            Err(error) => return Err(error),
        };
        let reply = match packet {
            Packet::RequestPacket(Request::Authenticate { .. }) => {
                connection
                    .send(Packet::error(ErrorCode::InvalidRequest, "already authenticated"))
                    .await?;
                bail!("Attempted re-login - denied");
            }
            Packet::RequestPacket(request) => dispatch(principal, request, &ledger_tx).await,
            other => Packet::error(
                ErrorCode::InvalidRequest,
                format!("incorrect packet type: {other:?}"),
            ),
        };
        connection.send(reply).await?;
    }
}

async fn call<T>(
    ledger_tx: &mpsc::Sender<LedgerRequest>,
    request: impl FnOnce(LedgerResponder<T>) -> LedgerRequest,
) -> Result<T, LedgerError> {
    let (resp_tx, resp_rx) = oneshot::channel();
    ledger_tx
        .send(request(resp_tx))
        .await
        .map_err(|_| LedgerError::Store("ledger is shutting down".into()))?;
    resp_rx
        .await
        .map_err(|_| LedgerError::Store("ledger dropped the request".into()))?
}

fn to_packet<T>(result: Result<T, LedgerError>, respond: impl FnOnce(T) -> Response) -> Packet {
    match result {
        Ok(value) => Packet::ResponsePacket(respond(value)),
        Err(error) => Packet::error(error.code(), error.to_string()),
    }
}

/// Translate one authenticated request into a ledger call and its reply.
pub async fn dispatch(
    principal: &Principal,
    request: Request,
    ledger_tx: &mpsc::Sender<LedgerRequest>,
) -> Packet {
    let principal = principal.clone();
    match request {
        Request::Authenticate { .. } => {
            Packet::error(ErrorCode::InvalidRequest, "already authenticated")
        }
        Request::WhoAmI => Packet::ResponsePacket(Response::WhoAmI(principal.to_string())),
        Request::CreateGame(game) => {
            let result = call(ledger_tx, |responder| LedgerRequest::CreateGame {
                principal,
                game,
                responder,
            })
            .await;
            to_packet(result, Response::Game)
        }
        Request::ListGames => {
            let result = call(ledger_tx, |responder| LedgerRequest::ListGames {
                principal,
                responder,
            })
            .await;
            to_packet(result, Response::Games)
        }
        Request::ReadGame { game_id } => {
            let result = call(ledger_tx, |responder| LedgerRequest::ReadGame {
                principal,
                game_id,
                responder,
            })
            .await;
            to_packet(result, Response::Game)
        }
        Request::AddCategory { game_id, category } => {
            let result = call(ledger_tx, |responder| LedgerRequest::AddCategory {
                principal,
                game_id,
                category,
                responder,
            })
            .await;
            to_packet(result, Response::Game)
        }
        Request::GenerateJoinCode { game_id } => {
            let result = call(ledger_tx, |responder| LedgerRequest::GenerateJoinCode {
                principal,
                game_id,
                responder,
            })
            .await;
            to_packet(result, |(code, expires_at)| Response::JoinCode { code, expires_at })
        }
        Request::VerifyJoinCode { code } => {
            let result = call(ledger_tx, |responder| LedgerRequest::VerifyJoinCode {
                code,
                responder,
            })
            .await;
            to_packet(result, Response::JoinCodeValid)
        }
        Request::JoinGame { game_id, code } => {
            let result = call(ledger_tx, |responder| LedgerRequest::JoinGame {
                principal,
                game_id,
                code,
                responder,
            })
            .await;
            to_packet(result, Response::Joined)
        }
        Request::PlaceBets { game_id, bets } => {
            let result = call(ledger_tx, |responder| LedgerRequest::PlaceBets {
                principal,
                game_id,
                bets,
                responder,
            })
            .await;
            to_packet(result, |(balance, bets)| Response::BetsPlaced { balance, bets })
        }
        Request::LockGame { game_id } => {
            let result = call(ledger_tx, |responder| LedgerRequest::LockGame {
                principal,
                game_id,
                responder,
            })
            .await;
            to_packet(result, Response::Game)
        }
        Request::ResolveCategory {
            game_id,
            category_id,
            winner_id,
        } => {
            let result = call(ledger_tx, |responder| LedgerRequest::ResolveCategory {
                principal,
                game_id,
                category_id,
                winner_id,
                responder,
            })
            .await;
            to_packet(result, Response::Game)
        }
        Request::DeleteGame { game_id } => {
            let result = call(ledger_tx, |responder| LedgerRequest::DeleteGame {
                principal,
                game_id,
                responder,
            })
            .await;
            to_packet(result, |()| Response::None)
        }
    }
}
