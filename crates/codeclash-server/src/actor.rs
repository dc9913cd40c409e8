use tokio::sync::{mpsc, oneshot};

use codeclash_core::player::ConnectionId;
use codeclash_sandbox::CodeSandbox;

use crate::broadcast::{broadcast_status, send_status};
use crate::registry::{ConnectionRegistry, OutboundSender};
use crate::scheduler::RoundScheduler;
use crate::session::{Effect, SessionEvent, SessionSnapshot, SessionStateMachine};

/// Commands accepted by the session actor, processed one at a time.
#[derive(Debug)]
pub enum SessionCommand {
    /// Register a new socket and reply with its id.
    Connect {
        sender: OutboundSender,
        reply: oneshot::Sender<ConnectionId>,
    },
    Event(SessionEvent),
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
}

/// Cheap, cloneable handle to the running session.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    /// Register a connection. Returns `None` once the session has stopped.
    pub async fn connect(&self, sender: OutboundSender) -> Option<ConnectionId> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(SessionCommand::Connect { sender, reply })
            .await
            .ok()?;
        rx.await.ok()
    }

    /// Queue an event for the session. Returns false if it has stopped.
    pub async fn dispatch(&self, event: SessionEvent) -> bool {
        self.commands.send(SessionCommand::Event(event)).await.is_ok()
    }

    pub async fn snapshot(&self) -> Option<SessionSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(SessionCommand::Snapshot { reply })
            .await
            .ok()?;
        rx.await.ok()
    }
}

/// Start the session actor. It runs until every [`SessionHandle`] is dropped.
pub fn spawn_session(
    machine: SessionStateMachine,
    sandbox: CodeSandbox,
    buffer: usize,
) -> SessionHandle {
    let (tx, rx) = mpsc::channel(buffer);
    let actor = SessionActor {
        machine,
        registry: ConnectionRegistry::new(),
        scheduler: RoundScheduler::new(tx.downgrade()),
        sandbox,
        commands: tx.downgrade(),
    };
    tokio::spawn(actor.run(rx));
    SessionHandle { commands: tx }
}

struct SessionActor {
    machine: SessionStateMachine,
    registry: ConnectionRegistry,
    scheduler: RoundScheduler,
    sandbox: CodeSandbox,
    commands: mpsc::WeakSender<SessionCommand>,
}

impl SessionActor {
    async fn run(mut self, mut rx: mpsc::Receiver<SessionCommand>) {
        tracing::info!("Session actor started");
        while let Some(command) = rx.recv().await {
            match command {
                SessionCommand::Connect { sender, reply } => {
                    let id = self.registry.register(sender);
                    if reply.send(id).is_err() {
                        self.registry.unregister(id);
                    }
                },
                SessionCommand::Event(event) => {
                    match (&event, event.connection()) {
                        (SessionEvent::Disconnect { conn }, _) => {
                            self.registry.unregister(*conn);
                        },
                        // Closed connections may still have frames in flight.
                        (_, Some(conn)) if !self.registry.contains(conn) => {
                            tracing::debug!(conn = %conn, "Dropped event from closed socket");
                            continue;
                        },
                        _ => {},
                    }
                    let effects = self.machine.handle(event);
                    self.apply(effects);
                },
                SessionCommand::Snapshot { reply } => {
                    let _ = reply.send(self.machine.snapshot(self.registry.len()));
                },
            }
        }
        tracing::info!("Session actor stopped");
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Send { to, status } => send_status(&self.registry, to, status),
                Effect::Broadcast { audience, status } => {
                    broadcast_status(&self.registry, &audience, status);
                },
                Effect::Evaluate {
                    conn,
                    round,
                    code,
                    validators,
                } => {
                    let sandbox = self.sandbox.clone();
                    let commands = self.commands.clone();
                    tokio::spawn(async move {
                        let deadline = sandbox.deadline();
                        let passed = sandbox
                            .evaluate_submission(code, validators, deadline)
                            .await;
                        let Some(tx) = commands.upgrade() else {
                            return;
                        };
                        let event = SessionEvent::SubmissionEvaluated {
                            conn,
                            round,
                            passed,
                        };
                        if tx.send(SessionCommand::Event(event)).await.is_err() {
                            tracing::debug!(conn = %conn, "Session stopped before verdict");
                        }
                    });
                },
                Effect::ArmTimer { round, after } => self.scheduler.arm(round, after),
                Effect::CancelTimer => self.scheduler.cancel(),
                Effect::CloseAll => self.registry.close_all(),
            }
        }
    }
}
