use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use codeclash_core::session::RoundKey;

use crate::actor::SessionCommand;
use crate::session::SessionEvent;

/// Owns the per-question timeout. At most one timer is armed at a time.
pub struct RoundScheduler {
    commands: mpsc::WeakSender<SessionCommand>,
    armed: Option<(RoundKey, CancellationToken)>,
}

impl RoundScheduler {
    /// Expiries are posted to the session through `commands`. The scheduler
    /// holds it weakly so it never keeps the session alive on its own.
    pub fn new(commands: mpsc::WeakSender<SessionCommand>) -> Self {
        Self {
            commands,
            armed: None,
        }
    }

    /// Arm a timer that delivers `RoundTimeout { round }` after `after`,
    /// replacing any timer already armed.
    pub fn arm(&mut self, round: RoundKey, after: Duration) {
        self.cancel();

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let commands = self.commands.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = cancelled.cancelled() => {},
                () = tokio::time::sleep(after) => {
                    let Some(tx) = commands.upgrade() else {
                        return;
                    };
                    let event = SessionEvent::RoundTimeout { round };
                    if tx.send(SessionCommand::Event(event)).await.is_err() {
                        tracing::debug!(?round, "Session stopped before round timeout");
                    }
                },
            }
        });

        tracing::debug!(?round, ?after, "Round timer armed");
        self.armed = Some((round, token));
    }

    pub fn cancel(&mut self) {
        if let Some((round, token)) = self.armed.take() {
            token.cancel();
            tracing::debug!(?round, "Round timer cancelled");
        }
    }

    pub fn armed_round(&self) -> Option<RoundKey> {
        self.armed.as_ref().map(|(round, _)| *round)
    }
}

impl Drop for RoundScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}
