use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use codeclash_core::question::QuestionBank;
use codeclash_sandbox::CodeSandbox;

use crate::actor::{SessionHandle, spawn_session};
use crate::config::ServerConfig;
use crate::session::{SessionSettings, SessionStateMachine};

#[derive(Clone)]
pub struct AppState {
    pub session: SessionHandle,
    pub config: Arc<ServerConfig>,
    pub ws_connection_count: Arc<AtomicUsize>,
}

impl AppState {
    /// Spawns the session actor, so this must run inside a tokio runtime.
    pub fn new(config: ServerConfig, questions: QuestionBank) -> Self {
        let machine =
            SessionStateMachine::new(SessionSettings::from(&config.game), Arc::new(questions));
        let sandbox = CodeSandbox::new(config.sandbox.clone());
        let session = spawn_session(machine, sandbox, config.limits.command_buffer);
        Self {
            session,
            config: Arc::new(config),
            ws_connection_count: Arc::new(AtomicUsize::new(0)),
        }
    }
}

/// Counts an open connection for as long as it is alive.
pub struct ConnectionGuard {
    count: Arc<AtomicUsize>,
}

impl ConnectionGuard {
    pub fn new(count: Arc<AtomicUsize>) -> Self {
        count.fetch_add(1, Ordering::Relaxed);
        Self { count }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::Relaxed);
    }
}
