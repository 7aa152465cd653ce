//! Handing an authenticated player to the game.

use std::sync::Arc;

use async_trait::async_trait;
use mudgate_transport::{ClientConnection, Transport};

/// Takes over a connection once its player has logged in.
///
/// The gatekeeper calls [`enter_game`](Self::enter_game) exactly once per
/// successful login and then forgets the connection. From that point the
/// implementation owns the conversation and decides when to disconnect.
#[async_trait]
pub trait SessionHandoff<S: Transport>: Send + Sync + 'static {
    async fn enter_game(&self, username: &str, connection: Arc<ClientConnection<S>>);
}

/// Greets the player and leaves them connected.
///
/// Stands in for the game layer until one is plugged in.
#[derive(Debug, Clone, Copy, Default)]
pub struct LobbyHandoff;

#[async_trait]
impl<S: Transport> SessionHandoff<S> for LobbyHandoff {
    async fn enter_game(&self, username: &str, connection: Arc<ClientConnection<S>>) {
        connection.send_line("Welcome to the MUD.").await;
        tracing::info!(conn_id = %connection.id(), %username, "player entered the lobby");
    }
}
