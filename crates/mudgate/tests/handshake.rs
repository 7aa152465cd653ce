//! Integration tests for the full login flow over real TCP connections.
//!
//! Each test runs a complete server on an ephemeral port and drives it with
//! a scripted telnet-style client.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mudgate::prelude::*;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const STEP_TIMEOUT: Duration = Duration::from_secs(5);

// =========================================================================
// Helpers
// =========================================================================

/// Records every player handed to the game.
#[derive(Default)]
struct RecordingHandoff {
    entered: Mutex<Vec<String>>,
}

impl RecordingHandoff {
    fn entered(&self) -> Vec<String> {
        self.entered.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionHandoff<TcpTransport> for RecordingHandoff {
    async fn enter_game(&self, username: &str, connection: Arc<ClientConnection<TcpTransport>>) {
        self.entered.lock().unwrap().push(username.to_string());
        connection.send_line(&format!("Entering the game as {username}.")).await;
    }
}

struct TestServer {
    server: MudServer,
    accounts: Arc<MemoryAccountStore>,
    handoff: Arc<RecordingHandoff>,
}

fn test_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.network.bind_address = "127.0.0.1".to_string();
    config.network.port = 0;
    config.heartbeat.interval_ms = 50;
    config
}

async fn start_server(config: ServerConfig) -> TestServer {
    let accounts = Arc::new(MemoryAccountStore::new());
    let handoff = Arc::new(RecordingHandoff::default());
    let server = MudServer::builder()
        .config(config)
        .accounts(accounts.clone())
        .handoff(handoff.clone())
        .markup(Arc::new(PlainMarkup))
        .build()
        .await
        .unwrap();
    let report = server.start().await;
    assert!(report.is_ok(), "start failed: {report:?}");
    TestServer {
        server,
        accounts,
        handoff,
    }
}

/// A scripted client that waits for server text before answering.
struct Player {
    stream: TcpStream,
    pending: String,
}

impl Player {
    async fn connect(server: &MudServer) -> Self {
        let addr = server.local_addr().expect("listener should be bound");
        Self {
            stream: TcpStream::connect(addr).await.unwrap(),
            pending: String::new(),
        }
    }

    /// Reads until `text` appears, consuming everything up to and
    /// including it.
    async fn expect(&mut self, text: &str) {
        let deadline = tokio::time::Instant::now() + STEP_TIMEOUT;
        loop {
            if let Some(at) = self.pending.find(text) {
                self.pending.drain(..at + text.len());
                return;
            }
            let mut buf = [0u8; 1024];
            let n = tokio::time::timeout_at(deadline, self.stream.read(&mut buf))
                .await
                .unwrap_or_else(|_| panic!("timed out waiting for {text:?}, got {:?}", self.pending))
                .unwrap();
            assert!(n > 0, "connection closed waiting for {text:?}, got {:?}", self.pending);
            self.pending.push_str(&String::from_utf8_lossy(&buf[..n]));
        }
    }

    async fn say(&mut self, line: &str) {
        self.stream
            .write_all(format!("{line}\r\n").as_bytes())
            .await
            .unwrap();
    }

    /// Waits for the server to close the connection and returns whatever
    /// arrived first.
    async fn expect_closed(&mut self) -> String {
        let deadline = tokio::time::Instant::now() + STEP_TIMEOUT;
        loop {
            let mut buf = [0u8; 1024];
            let read = tokio::time::timeout_at(deadline, self.stream.read(&mut buf))
                .await
                .expect("timed out waiting for the server to close");
            match read {
                Ok(0) | Err(_) => return std::mem::take(&mut self.pending),
                Ok(n) => self.pending.push_str(&String::from_utf8_lossy(&buf[..n])),
            }
        }
    }
}

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not met in time");
}

// =========================================================================
// New accounts
// =========================================================================

#[tokio::test]
async fn test_new_player_creates_account_and_enters_game() {
    let t = start_server(test_config()).await;
    let mut alice = Player::connect(&t.server).await;

    alice.expect("Welcome to ORC!").await;
    alice.expect("By what name are you known? ").await;
    alice.say("alice").await;
    alice.expect("Please provide a password for alice.").await;
    alice.expect("Passwords must be between 5 and 20").await;
    alice.expect("Enter Password: ").await;
    alice.say("orcorc1").await;
    alice.expect("Entering the game as alice.").await;

    let account = t.accounts.load_account("alice").await.unwrap().unwrap();
    assert_ne!(account.password_hash, "orcorc1");
    assert!(StandardCredentials::default().verify_password("orcorc1", &account.password_hash));
    assert_eq!(t.handoff.entered(), vec!["alice".to_string()]);
    assert_eq!(t.server.registry().len(), 1);

    t.server.shutdown().await;
}

#[tokio::test]
async fn test_username_is_lowercased() {
    let t = start_server(test_config()).await;
    let mut player = Player::connect(&t.server).await;

    player.expect("By what name are you known? ").await;
    player.say("Carol").await;
    player.expect("Please provide a password for carol.").await;
    player.expect("Enter Password: ").await;
    player.say("pa ss word").await;
    player.expect("Entering the game as carol.").await;

    assert!(t.accounts.username_exists("carol").await.unwrap());
    t.server.shutdown().await;
}

#[tokio::test]
async fn test_weak_new_password_is_asked_again() {
    let t = start_server(test_config()).await;
    let mut player = Player::connect(&t.server).await;

    player.expect("By what name are you known? ").await;
    player.say("dave").await;
    player.expect("Enter Password: ").await;
    player.say("abc").await;
    player.expect("That password does not meet the requirements.").await;
    player.expect("Please provide a password for dave.").await;
    player.expect("Enter Password: ").await;
    player.say("abcdef").await;
    player.expect("Entering the game as dave.").await;

    t.server.shutdown().await;
}

#[tokio::test]
async fn test_new_password_attempts_exhausted() {
    let t = start_server(test_config()).await;
    let mut player = Player::connect(&t.server).await;

    player.expect("By what name are you known? ").await;
    player.say("erin").await;
    for _ in 0..3 {
        player.expect("Enter Password: ").await;
        player.say("no").await;
    }
    let tail = player.expect_closed().await;

    assert!(tail.contains("Too many attempts. Disconnecting."), "got {tail:?}");
    assert!(!t.accounts.username_exists("erin").await.unwrap());
    assert!(t.handoff.entered().is_empty());
    t.server.shutdown().await;
}

// =========================================================================
// Existing accounts
// =========================================================================

#[tokio::test]
async fn test_existing_player_succeeds_on_third_attempt() {
    let t = start_server(test_config()).await;
    let credentials = StandardCredentials::new(CredentialLimits::default(), BannedNames::new());
    t.accounts
        .create_account("bob", &credentials.hash_password("hunter22"))
        .await
        .unwrap();

    let mut bob = Player::connect(&t.server).await;
    bob.expect("By what name are you known? ").await;
    bob.say("bob").await;
    bob.expect("Please provide the password: ").await;
    bob.say("wrong1").await;
    bob.expect("Invalid password.").await;
    bob.expect("Please provide the password: ").await;
    bob.say("wrong2").await;
    bob.expect("Invalid password.").await;
    bob.expect("Please provide the password: ").await;
    bob.say("hunter22").await;
    bob.expect("Entering the game as bob.").await;

    assert_eq!(t.handoff.entered(), vec!["bob".to_string()]);
    t.server.shutdown().await;
}

#[tokio::test]
async fn test_wrong_password_five_times_disconnects() {
    let t = start_server(test_config()).await;
    let credentials = StandardCredentials::new(CredentialLimits::default(), BannedNames::new());
    t.accounts
        .create_account("bob", &credentials.hash_password("hunter22"))
        .await
        .unwrap();

    let mut bob = Player::connect(&t.server).await;
    bob.expect("By what name are you known? ").await;
    bob.say("bob").await;
    for _ in 0..5 {
        bob.expect("Please provide the password: ").await;
        bob.say("nope!").await;
    }
    let tail = bob.expect_closed().await;

    assert!(tail.contains("Invalid password. Disconnecting."), "got {tail:?}");
    assert!(t.handoff.entered().is_empty());
    t.server.shutdown().await;
}

// =========================================================================
// Refusals
// =========================================================================

#[tokio::test]
async fn test_five_invalid_usernames_disconnect() {
    let t = start_server(test_config()).await;
    let mut player = Player::connect(&t.server).await;

    for attempt in 1..=5 {
        player.expect("By what name are you known? ").await;
        player.say("no way 42").await;
        if attempt < 5 {
            player.expect("That name cannot be used.").await;
        }
    }
    let tail = player.expect_closed().await;

    assert!(tail.contains("Too many attempts. Disconnecting."), "got {tail:?}");
    assert!(t.accounts.is_empty());
    assert!(t.handoff.entered().is_empty());
    let registry = t.server.registry().clone();
    eventually(|| registry.is_empty()).await;
    t.server.shutdown().await;
}

#[tokio::test]
async fn test_banned_name_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let banned = dir.path().join("banned.txt");
    std::fs::write(&banned, "root,admin\n").unwrap();
    let mut config = test_config();
    config.accounts.banned_names_file = Some(banned);

    let t = start_server(config).await;
    let mut player = Player::connect(&t.server).await;
    player.expect("By what name are you known? ").await;
    player.say("Admin").await;
    player.expect("That name cannot be used.").await;
    player.expect("By what name are you known? ").await;
    player.say("frank").await;
    player.expect("Please provide a password for frank.").await;

    t.server.shutdown().await;
}

#[tokio::test]
async fn test_closed_gate_turns_players_away() {
    let t = start_server(test_config()).await;
    t.server
        .supervisor()
        .subsystem("GateKeeper")
        .unwrap()
        .stop()
        .await
        .unwrap();

    let mut player = Player::connect(&t.server).await;
    let tail = player.expect_closed().await;

    assert!(
        tail.contains("The realm is closed. Please try again later."),
        "got {tail:?}"
    );
    assert!(t.server.registry().is_empty());
    t.server.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_cancels_login_in_progress() {
    let t = start_server(test_config()).await;
    let mut player = Player::connect(&t.server).await;
    player.expect("By what name are you known? ").await;

    t.server.shutdown().await;

    player.expect_closed().await;
    assert!(t.handoff.entered().is_empty());
    assert_eq!(
        t.server.supervisor().subsystem_state("GateKeeper").unwrap(),
        SubsystemState::Stopped
    );
}

#[tokio::test]
async fn test_silent_client_times_out() {
    let mut config = test_config();
    config.handshake.prompt_timeout_secs = 1;
    config.handshake.username_attempts = 2;

    let t = start_server(config).await;
    let mut player = Player::connect(&t.server).await;
    player.expect("By what name are you known? ").await;
    player.expect("That name cannot be used.").await;
    player.expect("By what name are you known? ").await;
    let tail = player.expect_closed().await;

    assert!(tail.contains("Too many attempts. Disconnecting."), "got {tail:?}");
    t.server.shutdown().await;
}

#[tokio::test]
async fn test_client_hangup_mid_login() {
    let t = start_server(test_config()).await;
    let mut player = Player::connect(&t.server).await;
    player.expect("By what name are you known? ").await;
    drop(player);

    let registry = t.server.registry().clone();
    eventually(|| registry.is_empty()).await;
    assert!(t.handoff.entered().is_empty());
    t.server.shutdown().await;
}

// =========================================================================
// Registry integration
// =========================================================================

#[tokio::test]
async fn test_players_see_each_other_arrive() {
    let t = start_server(test_config()).await;
    let mut first = Player::connect(&t.server).await;
    first.expect("By what name are you known? ").await;

    let mut second = Player::connect(&t.server).await;
    second.expect("By what name are you known? ").await;

    first.expect("New Client Subscribed: Client_").await;
    assert_eq!(t.server.registry().len(), 2);
    t.server.shutdown().await;
}

#[tokio::test]
async fn test_accounts_persist_in_storage_dir() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config();
    config.accounts.storage_dir = Some(dir.path().to_path_buf());

    let server = MudServer::builder()
        .config(config)
        .markup(Arc::new(PlainMarkup))
        .build()
        .await
        .unwrap();
    assert!(server.start().await.is_ok());

    let mut player = Player::connect(&server).await;
    player.expect("By what name are you known? ").await;
    player.say("grace").await;
    player.expect("Enter Password: ").await;
    player.say("opensesame").await;
    player.expect("Welcome to the MUD.").await;

    assert!(dir.path().join("grace.json").exists());
    assert!(server.accounts().username_exists("grace").await.unwrap());
    server.shutdown().await;
}
