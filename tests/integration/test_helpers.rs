// tests/integration/test_helpers.rs

//! Test helpers and utilities for integration tests.

use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::sync::{broadcast, mpsc};
use zircondb::config::Config;
use zircondb::connection::ConnectionGuard;
use zircondb::core::Request;
use zircondb::core::Response;
use zircondb::core::auth::{ServerUsers, UsersFile};
use zircondb::core::dispatch::{ExecutionOutcome, RequestExecutor};
use zircondb::core::protocol::{RequestEnvelope, ServerMessage};
use zircondb::core::push::PushJob;
use zircondb::core::state::ServerState;

/// TestContext provides a complete test environment with a real server state.
pub struct TestContext {
    pub state: Arc<ServerState>,
    pub push_job_rx: mpsc::Receiver<PushJob>,
    // Keeps the users file alive for the lifetime of the context.
    _users_file: NamedTempFile,
}

impl TestContext {
    /// Creates a new test context with default configuration and the two
    /// standard test users: `root` (admin) and `reader`.
    pub async fn new() -> Self {
        Self::with_config(Config::default()).await
    }

    /// Creates a new test context with custom configuration.
    pub async fn with_config(mut config: Config) -> Self {
        let users_file = write_users_file();
        config.users_file = Some(users_file.path().to_string_lossy().into_owned());

        let server_init =
            ServerState::initialize(config, None).expect("Failed to initialize server state");

        Self {
            state: server_init.state,
            push_job_rx: server_init.push_job_rx,
            _users_file: users_file,
        }
    }

    /// Opens a logical client channel: an executor plus the channel-side
    /// queues a connection handler would own.
    pub fn channel(&self) -> TestChannel {
        let (push_tx, push_rx) = mpsc::channel(64);
        let (interrupt_tx, interrupt_rx) = broadcast::channel(1);
        let addr = "127.0.0.1:9999".parse().unwrap();
        TestChannel {
            executor: RequestExecutor::new(self.state.clone(), addr, push_tx, interrupt_tx),
            guard: ConnectionGuard::new(self.state.clone(), addr),
            push_rx,
            interrupt_rx,
        }
    }

    /// Drains one scheduled push job and runs its fan-out synchronously.
    pub async fn deliver_next_push(&mut self) {
        let job = self
            .push_job_rx
            .recv()
            .await
            .expect("expected a scheduled push job");
        self.state.push.deliver(&self.state.registry, job).await;
    }

    /// Non-blocking variant; true when a job was delivered.
    pub async fn try_deliver_push(&mut self) -> bool {
        match self.push_job_rx.try_recv() {
            Ok(job) => {
                self.state.push.deliver(&self.state.registry, job).await;
                true
            }
            Err(_) => false,
        }
    }
}

/// One logical client channel talking straight to the dispatcher.
pub struct TestChannel {
    pub executor: RequestExecutor,
    pub guard: ConnectionGuard,
    pub push_rx: mpsc::Receiver<ServerMessage>,
    #[allow(dead_code)]
    pub interrupt_rx: broadcast::Receiver<()>,
}

impl TestChannel {
    /// Executes a request, expecting the channel to stay open.
    pub async fn request(
        &mut self,
        connection_id: Option<u64>,
        token: Option<Vec<u8>>,
        request: Request,
    ) -> Response {
        match self.execute(connection_id, token, request).await {
            ExecutionOutcome::Reply(response) => response,
            ExecutionOutcome::ReplyAndClose(response) => {
                panic!("request unexpectedly closed the channel: {response:?}")
            }
        }
    }

    /// Executes a request, expecting a security failure that closes the
    /// channel; returns the final error response.
    pub async fn request_expect_close(
        &mut self,
        connection_id: Option<u64>,
        token: Option<Vec<u8>>,
        request: Request,
    ) -> Response {
        match self.execute(connection_id, token, request).await {
            ExecutionOutcome::ReplyAndClose(response) => response,
            ExecutionOutcome::Reply(response) => {
                panic!("expected the channel to close, got open reply: {response:?}")
            }
        }
    }

    pub async fn execute(
        &mut self,
        connection_id: Option<u64>,
        token: Option<Vec<u8>>,
        request: Request,
    ) -> ExecutionOutcome {
        self.executor
            .execute(
                RequestEnvelope {
                    connection_id,
                    token,
                    request,
                },
                &mut self.guard,
            )
            .await
    }

    /// Opens the named database with the standard reader user, returning
    /// `(connection_id, token)`.
    pub async fn open_database(&mut self, database: &str) -> (u64, Vec<u8>) {
        let response = self
            .request(
                None,
                None,
                Request::OpenDatabase {
                    database: database.to_string(),
                    username: "reader".to_string(),
                    password: "reader_pwd".to_string(),
                },
            )
            .await;
        match response {
            Response::DatabaseOpened {
                connection_id,
                token,
            } => (connection_id, token),
            other => panic!("open_database failed: {other:?}"),
        }
    }
}

/// Writes the standard test users to a temp JSON file.
fn write_users_file() -> NamedTempFile {
    let users = UsersFile {
        users: vec![
            zircondb::core::auth::ServerUser {
                username: "root".to_string(),
                password_hash: ServerUsers::hash_password("root_pwd").unwrap(),
                is_admin: true,
            },
            zircondb::core::auth::ServerUser {
                username: "reader".to_string(),
                password_hash: ServerUsers::hash_password("reader_pwd").unwrap(),
                is_admin: false,
            },
        ],
    };
    let mut file = NamedTempFile::new().expect("temp users file");
    file.write_all(serde_json::to_string(&users).unwrap().as_bytes())
        .expect("write users file");
    file.flush().unwrap();
    file
}

/// Unwraps an error response into its (code, message) pair.
pub fn expect_error(response: Response) -> (zircondb::core::protocol::ErrorCode, String) {
    match response {
        Response::Error { code, message } => (code, message),
        other => panic!("expected an error response, got {other:?}"),
    }
}
