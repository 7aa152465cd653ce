//! The gatekeeper: login and registration for new connections.
//!
//! Every accepted connection runs through the same conversation in its own
//! task:
//!
//!   1. Subscribe to the registry, greet, ask for a name
//!   2. New name → choose a password, create the account
//!   3. Known name → enter the password
//!   4. Hand the player to the game via [`SessionHandoff`]
//!
//! Each prompt has its own retry budget. A wrong or malformed answer costs
//! one attempt and is followed by the prompt again; running out of attempts
//! ends in a message and a disconnect. Storage faults end in a generic
//! "try again later" message, with the details only in the server log.
//!
//! While the gatekeeper is not Running, new connections are turned away.
//! Stopping it cancels every login still in progress.

use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use mudgate_core::{StateCell, Subsystem, SubsystemError, SubsystemState, SystemEvent};
use mudgate_session::{
    AccountStore, ConnectionRegistry, Credentials, SessionError, SessionHandoff,
};
use mudgate_transport::{ClientConnection, Transport};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::HandshakeSettings;
use crate::listener::ConnectionHandler;

/// Default subsystem name.
pub const GATEKEEPER_NAME: &str = "GateKeeper";

const USERNAME_PROMPT: &str = "By what name are you known? ";
const PASSWORD_PROMPT: &str = "Please provide the password: ";
const NEW_PASSWORD_PROMPT: &str = "Enter Password: ";
const INVALID_USERNAME: &str = "That name cannot be used.";
const INVALID_NEW_PASSWORD: &str = "That password does not meet the requirements.";
const WRONG_PASSWORD: &str = "Invalid password.";
const WRONG_PASSWORD_FINAL: &str = "Invalid password. Disconnecting.";
const TOO_MANY_ATTEMPTS: &str = "Too many attempts. Disconnecting.";
const TRY_AGAIN_LATER: &str = "Something went wrong. Please try again later.";
const GATE_CLOSED: &str = "The realm is closed. Please try again later.";

/// Gatekeeper settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatekeeperSettings {
    pub game_name: String,
    pub username_attempts: u32,
    pub new_password_attempts: u32,
    pub password_attempts: u32,
    /// Limit on each answer; `None` waits forever.
    pub prompt_timeout: Option<Duration>,
}

impl Default for GatekeeperSettings {
    fn default() -> Self {
        Self::from(&HandshakeSettings::default())
    }
}

impl From<&HandshakeSettings> for GatekeeperSettings {
    fn from(settings: &HandshakeSettings) -> Self {
        Self {
            game_name: settings.game_name.clone(),
            username_attempts: settings.username_attempts,
            new_password_attempts: settings.new_password_attempts,
            password_attempts: settings.password_attempts,
            prompt_timeout: settings.prompt_timeout(),
        }
    }
}

/// Why a login did not reach the game.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refusal {
    /// The gatekeeper was not running.
    GateClosed,
    UsernameAttemptsExhausted,
    PasswordAttemptsExhausted,
    /// The client went away mid-login.
    Disconnected,
    /// The gatekeeper stopped mid-login.
    Cancelled,
    /// Account storage failed.
    Internal,
}

/// How one connection's login ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// Logged in and handed to the game.
    Entered { username: String, new_account: bool },
    /// Turned away; the connection has been disconnected.
    Refused(Refusal),
}

/// Result of one bounded prompt.
enum Answer {
    Accepted(String),
    Exhausted,
    Disconnected,
}

/// Runs the login conversation for each admitted connection.
pub struct Gatekeeper<S: Transport> {
    settings: GatekeeperSettings,
    registry: Arc<ConnectionRegistry<S>>,
    credentials: Arc<dyn Credentials>,
    accounts: Arc<dyn AccountStore>,
    handoff: Arc<dyn SessionHandoff<S>>,
    state: StateCell,
    /// Cancelled on stop; replaced on start.
    cancel: Mutex<CancellationToken>,
    lifecycle: tokio::sync::Mutex<()>,
    this: Weak<Self>,
}

impl<S: Transport> Gatekeeper<S> {
    pub fn new(
        settings: GatekeeperSettings,
        registry: Arc<ConnectionRegistry<S>>,
        credentials: Arc<dyn Credentials>,
        accounts: Arc<dyn AccountStore>,
        handoff: Arc<dyn SessionHandoff<S>>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            settings,
            registry,
            credentials,
            accounts,
            handoff,
            state: StateCell::new(GATEKEEPER_NAME),
            cancel: Mutex::new(CancellationToken::new()),
            lifecycle: tokio::sync::Mutex::new(()),
            this: this.clone(),
        })
    }

    pub fn settings(&self) -> &GatekeeperSettings {
        &self.settings
    }

    fn cancel_token(&self) -> CancellationToken {
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Runs the full login for `connection` and waits for it to finish.
    ///
    /// Turns the connection away if the gatekeeper is not running.
    pub async fn handle(&self, connection: Arc<ClientConnection<S>>) -> HandshakeOutcome {
        if self.state.get() != SubsystemState::Running {
            debug!(conn_id = %connection.id(), "gate closed, turning connection away");
            connection.send_line(GATE_CLOSED).await;
            connection.disconnect().await;
            return HandshakeOutcome::Refused(Refusal::GateClosed);
        }

        let cancel = self.cancel_token();
        let login = tokio::select! {
            login = self.login(&connection) => login,
            _ = cancel.cancelled() => {
                info!(conn_id = %connection.id(), "login cancelled by shutdown");
                connection.disconnect().await;
                return HandshakeOutcome::Refused(Refusal::Cancelled);
            }
        };

        match login {
            Ok((username, new_account)) => {
                info!(conn_id = %connection.id(), %username, new_account, "player logged in");
                self.handoff.enter_game(&username, connection).await;
                HandshakeOutcome::Entered {
                    username,
                    new_account,
                }
            }
            Err(refusal) => {
                info!(conn_id = %connection.id(), ?refusal, "login refused");
                if refusal == Refusal::Internal {
                    connection.send_line(TRY_AGAIN_LATER).await;
                }
                connection.disconnect().await;
                HandshakeOutcome::Refused(refusal)
            }
        }
    }

    /// The conversation up to, but not including, the handoff.
    async fn login(&self, connection: &Arc<ClientConnection<S>>) -> Result<(String, bool), Refusal> {
        if !self.registry.subscribe(connection.clone()).await {
            // Either already a member (someone admitted it twice) or dead.
            if connection.is_disconnected() {
                return Err(Refusal::Disconnected);
            }
        }
        debug!(conn_id = %connection.id(), peer = ?connection.peer_addr(), "login started");

        connection
            .send_line(&format!("Welcome to {}!", self.settings.game_name))
            .await;

        let username = match self
            .ask(
                connection,
                &[],
                USERNAME_PROMPT,
                INVALID_USERNAME,
                self.settings.username_attempts,
                |input| {
                    let name = input.to_lowercase();
                    self.credentials.is_valid_username(&name).then_some(name)
                },
            )
            .await
        {
            Answer::Accepted(name) => name,
            Answer::Exhausted => {
                connection.send_line(TOO_MANY_ATTEMPTS).await;
                return Err(Refusal::UsernameAttemptsExhausted);
            }
            Answer::Disconnected => return Err(Refusal::Disconnected),
        };

        let account = self
            .accounts
            .load_account(&username)
            .await
            .map_err(|e| storage_fault(connection, &username, "account lookup", e))?;

        match account {
            Some(account) => {
                self.existing_account(connection, &account.password_hash)
                    .await?;
                Ok((username, false))
            }
            None => {
                self.new_account(connection, &username).await?;
                Ok((username, true))
            }
        }
    }

    async fn existing_account(
        &self,
        connection: &ClientConnection<S>,
        password_hash: &str,
    ) -> Result<(), Refusal> {
        let answer = self
            .ask(
                connection,
                &[],
                PASSWORD_PROMPT,
                WRONG_PASSWORD,
                self.settings.password_attempts,
                |input| {
                    self.credentials
                        .verify_password(input, password_hash)
                        .then_some(String::new())
                },
            )
            .await;

        match answer {
            Answer::Accepted(_) => Ok(()),
            Answer::Exhausted => {
                connection.send_line(WRONG_PASSWORD_FINAL).await;
                Err(Refusal::PasswordAttemptsExhausted)
            }
            Answer::Disconnected => Err(Refusal::Disconnected),
        }
    }

    async fn new_account(
        &self,
        connection: &ClientConnection<S>,
        username: &str,
    ) -> Result<(), Refusal> {
        let intro = [
            format!("Please provide a password for {username}."),
            self.credentials.password_rules(),
        ];
        let answer = self
            .ask(
                connection,
                &intro,
                NEW_PASSWORD_PROMPT,
                INVALID_NEW_PASSWORD,
                self.settings.new_password_attempts,
                |input| {
                    self.credentials
                        .is_valid_password(input)
                        .then(|| input.to_string())
                },
            )
            .await;

        let password = match answer {
            Answer::Accepted(password) => password,
            Answer::Exhausted => {
                connection.send_line(TOO_MANY_ATTEMPTS).await;
                return Err(Refusal::PasswordAttemptsExhausted);
            }
            Answer::Disconnected => return Err(Refusal::Disconnected),
        };

        let hash = self.credentials.hash_password(&password);
        self.accounts
            .create_account(username, &hash)
            .await
            .map_err(|e| storage_fault(connection, username, "account creation", e))?;
        Ok(())
    }

    /// Asks up to `attempts` times until `accept` returns a value.
    ///
    /// `intro` lines precede every prompt. A timed-out answer counts as a
    /// rejected one.
    async fn ask(
        &self,
        connection: &ClientConnection<S>,
        intro: &[String],
        prompt: &str,
        rejected: &str,
        attempts: u32,
        mut accept: impl FnMut(&str) -> Option<String>,
    ) -> Answer {
        for attempt in 1..=attempts {
            for line in intro {
                connection.send_line(line).await;
            }
            connection.send(prompt).await;

            let input = match self.settings.prompt_timeout {
                Some(limit) => connection.receive_timeout(limit).await,
                None => connection.receive().await,
            };
            if connection.is_disconnected() {
                return Answer::Disconnected;
            }
            if let Some(accepted) = accept(&input) {
                return Answer::Accepted(accepted);
            }

            debug!(conn_id = %connection.id(), attempt, attempts, "answer rejected");
            if attempt < attempts {
                connection.send_line(rejected).await;
            }
        }
        Answer::Exhausted
    }
}

fn storage_fault<S: Transport>(
    connection: &ClientConnection<S>,
    username: &str,
    operation: &str,
    e: SessionError,
) -> Refusal {
    error!(conn_id = %connection.id(), %username, error = %e, "{operation} failed");
    Refusal::Internal
}

#[async_trait]
impl<S: Transport> ConnectionHandler<S> for Gatekeeper<S> {
    /// Runs the login in its own task so the accept loop never waits on a
    /// player.
    async fn admit(&self, connection: Arc<ClientConnection<S>>) {
        let Some(this) = self.this.upgrade() else {
            connection.disconnect().await;
            return;
        };
        tokio::spawn(async move {
            let conn_id = connection.id();
            let outcome = this.handle(connection).await;
            debug!(%conn_id, ?outcome, "login task finished");
        });
    }
}

#[async_trait]
impl<S: Transport> Subsystem for Gatekeeper<S> {
    fn name(&self) -> &str {
        self.state.name()
    }

    fn state(&self) -> SubsystemState {
        self.state.get()
    }

    async fn start(&self) -> Result<(), SubsystemError> {
        let _lifecycle = self.lifecycle.lock().await;
        let current = self.state.get();
        if current != SubsystemState::Stopped {
            warn!(subsystem = %self.name(), state = %current, "start ignored: not stopped");
            return Ok(());
        }

        *self.cancel.lock().unwrap_or_else(PoisonError::into_inner) = CancellationToken::new();
        self.state
            .transition(SubsystemState::Running, "GateKeeper started successfully.");
        Ok(())
    }

    /// Closes the gate and cancels every login in progress.
    async fn stop(&self) -> Result<(), SubsystemError> {
        let _lifecycle = self.lifecycle.lock().await;
        let current = self.state.get();
        if current != SubsystemState::Running {
            warn!(subsystem = %self.name(), state = %current, "stop ignored: not running");
            return Ok(());
        }

        self.state
            .transition(SubsystemState::Stopping, "GateKeeper stopping");
        self.cancel_token().cancel();
        self.state
            .transition(SubsystemState::Stopped, "GateKeeper stopped successfully.");
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<SystemEvent> {
        self.state.subscribe()
    }
}

impl<S: Transport> std::fmt::Debug for Gatekeeper<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gatekeeper")
            .field("settings", &self.settings)
            .field("state", &self.state.get())
            .finish()
    }
}
