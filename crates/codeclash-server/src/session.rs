use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use codeclash_core::net::messages::{GameOverMsg, QuestionMsg, Status, WaitingStartMsg};
use codeclash_core::player::{
    ConnectionId, Participant, ParticipantStatus, normalize_display_name,
};
use codeclash_core::question::{QuestionBank, Validator};
use codeclash_core::session::{Phase, RoundKey};

use crate::broadcast::Audience;
use crate::config::GameConfig;

/// Rules the state machine enforces.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub max_players: usize,
    pub question_timeout: Duration,
}

impl From<&GameConfig> for SessionSettings {
    fn from(game: &GameConfig) -> Self {
        Self {
            max_players: game.max_players,
            question_timeout: game.question_timeout(),
        }
    }
}

/// Inputs to the session, in the order the actor receives them.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Join {
        conn: ConnectionId,
        display_name: String,
    },
    Submit {
        conn: ConnectionId,
        question_index: usize,
        code: String,
    },
    /// A sandbox verdict for a submission made during `round`.
    SubmissionEvaluated {
        conn: ConnectionId,
        round: RoundKey,
        passed: bool,
    },
    RoundTimeout {
        round: RoundKey,
    },
    Disconnect {
        conn: ConnectionId,
    },
}

impl SessionEvent {
    /// The connection an event originates from, if any.
    pub fn connection(&self) -> Option<ConnectionId> {
        match self {
            Self::Join { conn, .. }
            | Self::Submit { conn, .. }
            | Self::SubmissionEvaluated { conn, .. }
            | Self::Disconnect { conn } => Some(*conn),
            Self::RoundTimeout { .. } => None,
        }
    }
}

/// Work the machine asks its host to perform.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Send {
        to: ConnectionId,
        status: Status,
    },
    Broadcast {
        audience: Audience,
        status: Status,
    },
    Evaluate {
        conn: ConnectionId,
        round: RoundKey,
        code: String,
        validators: Vec<Validator>,
    },
    ArmTimer {
        round: RoundKey,
        after: Duration,
    },
    CancelTimer,
    CloseAll,
}

/// The one game session.
#[derive(Debug, Clone)]
pub struct Session {
    pub phase: Phase,
    pub current_question: usize,
    /// Roster in join order.
    pub participants: Vec<Participant>,
    pub epoch: u64,
}

impl Session {
    fn new(epoch: u64) -> Self {
        Self {
            phase: Phase::Lobby,
            current_question: 0,
            participants: Vec::new(),
            epoch,
        }
    }

    pub fn round_key(&self) -> RoundKey {
        RoundKey {
            epoch: self.epoch,
            question: self.current_question,
        }
    }

    pub fn participant(&self, conn: ConnectionId) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == conn)
    }

    fn participant_mut(&mut self, conn: ConnectionId) -> Option<&mut Participant> {
        self.participants.iter_mut().find(|p| p.id == conn)
    }

    pub fn names(&self) -> Vec<String> {
        self.participants
            .iter()
            .map(|p| p.display_name.clone())
            .collect()
    }

    fn names_with(&self, status: ParticipantStatus) -> Vec<String> {
        self.participants
            .iter()
            .filter(|p| p.status == status)
            .map(|p| p.display_name.clone())
            .collect()
    }

    fn survivor_ids(&self) -> Vec<ConnectionId> {
        self.participants
            .iter()
            .filter(|p| p.is_survivor())
            .map(|p| p.id)
            .collect()
    }
}

/// Point-in-time view of the session for health reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub phase: Phase,
    /// Live question index while a round is running.
    pub question: Option<usize>,
    pub players: Vec<String>,
    pub connections: usize,
}

/// Authoritative game logic. Every transition is a synchronous call that
/// returns the effects to carry out.
#[derive(Debug)]
pub struct SessionStateMachine {
    settings: SessionSettings,
    questions: Arc<QuestionBank>,
    session: Session,
}

impl SessionStateMachine {
    pub fn new(settings: SessionSettings, questions: Arc<QuestionBank>) -> Self {
        Self {
            settings,
            questions,
            session: Session::new(0),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn snapshot(&self, connections: usize) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.session.phase,
            question: (self.session.phase == Phase::InRound)
                .then_some(self.session.current_question),
            players: self.session.names(),
            connections,
        }
    }

    pub fn handle(&mut self, event: SessionEvent) -> Vec<Effect> {
        match event {
            SessionEvent::Join { conn, display_name } => self.join(conn, &display_name),
            SessionEvent::Submit {
                conn,
                question_index,
                code,
            } => self.submit(conn, question_index, code),
            SessionEvent::SubmissionEvaluated {
                conn,
                round,
                passed,
            } => self.submission_evaluated(conn, round, passed),
            SessionEvent::RoundTimeout { round } => self.round_timeout(round),
            SessionEvent::Disconnect { conn } => self.disconnect(conn),
        }
    }

    fn join(&mut self, conn: ConnectionId, display_name: &str) -> Vec<Effect> {
        if self.session.phase != Phase::Lobby {
            return vec![Effect::Send {
                to: conn,
                status: Status::GameAlreadyStarted,
            }];
        }

        let Some(name) = normalize_display_name(display_name) else {
            tracing::warn!(conn = %conn, "Dropped join with invalid display name");
            return Vec::new();
        };

        let taken = self
            .session
            .participants
            .iter()
            .any(|p| p.id == conn || p.name_matches(&name));
        if taken {
            return vec![Effect::Send {
                to: conn,
                status: Status::PlayerAlreadyJoined,
            }];
        }

        tracing::info!(conn = %conn, name = %name, "Player joined");
        self.session.participants.push(Participant::new(conn, name));

        if self.session.participants.len() >= self.settings.max_players {
            self.session.phase = Phase::InRound;
            self.session.current_question = 0;
            tracing::info!(
                players = self.session.participants.len(),
                epoch = self.session.epoch,
                "Game started"
            );
            self.start_round()
        } else {
            vec![self.waiting_start()]
        }
    }

    fn submit(&mut self, conn: ConnectionId, question_index: usize, code: String) -> Vec<Effect> {
        if self.session.phase != Phase::InRound
            || question_index != self.session.current_question
        {
            tracing::debug!(conn = %conn, question_index, "Ignored out-of-round submission");
            return Vec::new();
        }
        let Ok(question) = self.questions.get(question_index) else {
            return Vec::new();
        };
        let validators = question.validators.clone();
        let round = self.session.round_key();

        let Some(participant) = self.session.participant_mut(conn) else {
            return Vec::new();
        };
        if participant.status != ParticipantStatus::Playing || participant.evaluating {
            tracing::debug!(conn = %conn, status = ?participant.status, "Ignored repeat submission");
            return Vec::new();
        }
        participant.evaluating = true;

        vec![Effect::Evaluate {
            conn,
            round,
            code,
            validators,
        }]
    }

    fn submission_evaluated(
        &mut self,
        conn: ConnectionId,
        round: RoundKey,
        passed: bool,
    ) -> Vec<Effect> {
        if self.session.phase != Phase::InRound || round != self.session.round_key() {
            tracing::debug!(conn = %conn, ?round, "Discarded stale sandbox result");
            return Vec::new();
        }
        let Some(participant) = self.session.participant_mut(conn) else {
            return Vec::new();
        };
        if participant.status != ParticipantStatus::Playing {
            return Vec::new();
        }

        participant.evaluating = false;
        let status = if passed {
            participant.status = ParticipantStatus::Passed;
            Status::Passed
        } else {
            participant.status = ParticipantStatus::Eliminated;
            Status::Eliminated
        };
        tracing::info!(
            conn = %conn,
            name = %participant.display_name,
            question = round.question,
            passed,
            "Submission evaluated"
        );
        vec![Effect::Send { to: conn, status }]
    }

    fn round_timeout(&mut self, round: RoundKey) -> Vec<Effect> {
        if self.session.phase != Phase::InRound || round != self.session.round_key() {
            tracing::debug!(?round, "Ignored stale round timeout");
            return Vec::new();
        }

        let mut effects = Vec::new();
        for participant in &mut self.session.participants {
            if participant.status == ParticipantStatus::Playing {
                participant.status = ParticipantStatus::Eliminated;
                participant.evaluating = false;
                effects.push(Effect::Send {
                    to: participant.id,
                    status: Status::Eliminated,
                });
            }
        }
        tracing::info!(
            question = round.question,
            timed_out = effects.len(),
            "Round timed out"
        );

        self.session.current_question += 1;
        if self.session.current_question >= self.questions.count() {
            effects.extend(self.finish());
        } else {
            // Rounds keep their timers even with nobody left standing, so a
            // session always lasts exactly one timeout per question.
            effects.extend(self.start_round());
        }
        effects
    }

    fn disconnect(&mut self, conn: ConnectionId) -> Vec<Effect> {
        let before = self.session.participants.len();
        self.session.participants.retain(|p| p.id != conn);
        if self.session.participants.len() == before {
            return Vec::new();
        }
        tracing::info!(conn = %conn, phase = ?self.session.phase, "Player left");

        if self.session.participants.is_empty() {
            self.reset();
            return vec![Effect::CancelTimer];
        }
        if self.session.phase == Phase::Lobby {
            return vec![self.waiting_start()];
        }
        Vec::new()
    }

    /// Broadcast the live question to survivors and arm its timeout.
    fn start_round(&mut self) -> Vec<Effect> {
        let index = self.session.current_question;
        let question = match self.questions.get(index) {
            Ok(q) => q,
            Err(e) => {
                tracing::error!(error = %e, "Round start outside the question bank");
                return self.finish();
            },
        };

        for participant in &mut self.session.participants {
            if participant.is_survivor() {
                participant.status = ParticipantStatus::Playing;
                participant.evaluating = false;
            }
        }

        let round = self.session.round_key();
        let timeout = self.settings.question_timeout;
        let status = Status::Question(QuestionMsg {
            q_num: index,
            total_q: self.questions.count(),
            description: question.prompt.clone(),
            time_left: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            code_template: question.code_template.clone(),
        });
        tracing::info!(
            question = index,
            survivors = self.session.survivor_ids().len(),
            "Round started"
        );

        vec![
            Effect::Broadcast {
                audience: Audience::Survivors(self.session.survivor_ids()),
                status,
            },
            Effect::ArmTimer {
                round,
                after: timeout,
            },
        ]
    }

    /// Announce results, drop every connection and reset to a fresh lobby.
    fn finish(&mut self) -> Vec<Effect> {
        self.session.phase = Phase::Finished;
        let results = GameOverMsg {
            winners: self.session.names_with(ParticipantStatus::Passed),
            losers: self.session.names_with(ParticipantStatus::Eliminated),
        };
        tracing::info!(
            winners = ?results.winners,
            losers = results.losers.len(),
            "Game over"
        );
        self.reset();
        vec![
            Effect::CancelTimer,
            Effect::Broadcast {
                audience: Audience::All,
                status: Status::GameOver(results),
            },
            Effect::CloseAll,
        ]
    }

    fn reset(&mut self) {
        self.session = Session::new(self.session.epoch + 1);
        tracing::info!(epoch = self.session.epoch, "Session reset");
    }

    fn waiting_start(&self) -> Effect {
        Effect::Broadcast {
            audience: Audience::All,
            status: Status::WaitingStart(WaitingStartMsg {
                players: self.session.names(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codeclash_core::test_helpers::accepting_bank;
    use proptest::prelude::*;

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn machine(max_players: usize, bank: QuestionBank) -> SessionStateMachine {
        SessionStateMachine::new(
            SessionSettings {
                max_players,
                question_timeout: TIMEOUT,
            },
            Arc::new(bank),
        )
    }

    fn join(m: &mut SessionStateMachine, name: &str) -> (ConnectionId, Vec<Effect>) {
        let conn = ConnectionId::random();
        let effects = m.handle(SessionEvent::Join {
            conn,
            display_name: name.to_string(),
        });
        (conn, effects)
    }

    fn submit(m: &mut SessionStateMachine, conn: ConnectionId, q: usize) -> Vec<Effect> {
        m.handle(SessionEvent::Submit {
            conn,
            question_index: q,
            code: "|x| { x }".to_string(),
        })
    }

    fn armed_round(effects: &[Effect]) -> RoundKey {
        effects
            .iter()
            .find_map(|e| match e {
                Effect::ArmTimer { round, .. } => Some(*round),
                _ => None,
            })
            .expect("round timer armed")
    }

    fn status_of(m: &SessionStateMachine, conn: ConnectionId) -> ParticipantStatus {
        m.session().participant(conn).unwrap().status
    }

    #[test]
    fn join_below_capacity_broadcasts_roster() {
        let mut m = machine(2, accepting_bank(1));
        let (_, effects) = join(&mut m, "Ann");
        assert_eq!(
            effects,
            vec![Effect::Broadcast {
                audience: Audience::All,
                status: Status::WaitingStart(WaitingStartMsg {
                    players: vec!["Ann".to_string()],
                }),
            }]
        );
        assert_eq!(m.session().phase, Phase::Lobby);
    }

    #[test]
    fn join_trims_name() {
        let mut m = machine(2, accepting_bank(1));
        join(&mut m, "  Ann  ");
        assert_eq!(m.session().names(), vec!["Ann".to_string()]);
    }

    #[test]
    fn reaching_capacity_starts_first_round() {
        let mut m = machine(2, accepting_bank(3));
        let (ann, _) = join(&mut m, "Ann");
        let (bob, effects) = join(&mut m, "Bob");

        assert_eq!(m.session().phase, Phase::InRound);
        assert_eq!(m.session().current_question, 0);
        match &effects[0] {
            Effect::Broadcast {
                audience: Audience::Survivors(ids),
                status: Status::Question(q),
            } => {
                assert_eq!(ids, &vec![ann, bob]);
                assert_eq!(q.q_num, 0);
                assert_eq!(q.total_q, 3);
                assert_eq!(q.time_left, 10_000);
                assert_eq!(q.description, "Question 1");
            },
            other => panic!("Expected Question broadcast, got: {other:?}"),
        }
        assert_eq!(
            effects[1],
            Effect::ArmTimer {
                round: RoundKey {
                    epoch: 0,
                    question: 0
                },
                after: TIMEOUT,
            }
        );
    }

    #[test]
    fn duplicate_name_is_case_insensitive() {
        let mut m = machine(3, accepting_bank(1));
        join(&mut m, "Ann");
        let (ann2, effects) = join(&mut m, "ann");
        assert_eq!(
            effects,
            vec![Effect::Send {
                to: ann2,
                status: Status::PlayerAlreadyJoined,
            }]
        );
        assert_eq!(m.session().participants.len(), 1);
    }

    #[test]
    fn same_connection_cannot_join_twice() {
        let mut m = machine(3, accepting_bank(1));
        let (conn, _) = join(&mut m, "Ann");
        let effects = m.handle(SessionEvent::Join {
            conn,
            display_name: "Bob".to_string(),
        });
        assert_eq!(
            effects,
            vec![Effect::Send {
                to: conn,
                status: Status::PlayerAlreadyJoined,
            }]
        );
        assert_eq!(m.session().names(), vec!["Ann".to_string()]);
    }

    #[test]
    fn join_after_start_is_rejected() {
        let mut m = machine(1, accepting_bank(2));
        join(&mut m, "Ann");
        let (late, effects) = join(&mut m, "Bob");
        assert_eq!(
            effects,
            vec![Effect::Send {
                to: late,
                status: Status::GameAlreadyStarted,
            }]
        );
        assert_eq!(m.session().participants.len(), 1);
    }

    #[test]
    fn invalid_name_is_dropped_without_reply() {
        let mut m = machine(2, accepting_bank(1));
        let (_, effects) = join(&mut m, "   ");
        assert!(effects.is_empty());
        let (_, effects) = join(&mut m, &"x".repeat(40));
        assert!(effects.is_empty());
        assert!(m.session().participants.is_empty());
    }

    #[test]
    fn submit_requests_evaluation_once() {
        let mut m = machine(1, accepting_bank(2));
        let (ann, start) = join(&mut m, "Ann");
        let round = armed_round(&start);

        let effects = submit(&mut m, ann, 0);
        assert_eq!(
            effects,
            vec![Effect::Evaluate {
                conn: ann,
                round,
                code: "|x| { x }".to_string(),
                validators: vec![Validator::Accept],
            }]
        );
        assert!(m.session().participant(ann).unwrap().evaluating);

        // A second submit while the first is evaluating is ignored.
        assert!(submit(&mut m, ann, 0).is_empty());
    }

    #[test]
    fn submit_with_wrong_question_is_noop() {
        let mut m = machine(1, accepting_bank(2));
        let (ann, _) = join(&mut m, "Ann");
        assert!(submit(&mut m, ann, 1).is_empty());
        assert_eq!(status_of(&m, ann), ParticipantStatus::Playing);
        assert!(!m.session().participant(ann).unwrap().evaluating);
    }

    #[test]
    fn submit_in_lobby_or_from_stranger_is_noop() {
        let mut m = machine(2, accepting_bank(1));
        let (ann, _) = join(&mut m, "Ann");
        assert!(submit(&mut m, ann, 0).is_empty());

        join(&mut m, "Bob");
        assert!(submit(&mut m, ConnectionId::random(), 0).is_empty());
    }

    #[test]
    fn evaluation_result_sets_status_and_replies() {
        let mut m = machine(2, accepting_bank(2));
        let (ann, _) = join(&mut m, "Ann");
        let (bob, start) = join(&mut m, "Bob");
        let round = armed_round(&start);
        submit(&mut m, ann, 0);
        submit(&mut m, bob, 0);

        let effects = m.handle(SessionEvent::SubmissionEvaluated {
            conn: ann,
            round,
            passed: true,
        });
        assert_eq!(
            effects,
            vec![Effect::Send {
                to: ann,
                status: Status::Passed,
            }]
        );
        let effects = m.handle(SessionEvent::SubmissionEvaluated {
            conn: bob,
            round,
            passed: false,
        });
        assert_eq!(
            effects,
            vec![Effect::Send {
                to: bob,
                status: Status::Eliminated,
            }]
        );
        assert_eq!(status_of(&m, ann), ParticipantStatus::Passed);
        assert_eq!(status_of(&m, bob), ParticipantStatus::Eliminated);

        // Passed participants cannot resubmit in the same round.
        assert!(submit(&mut m, ann, 0).is_empty());
    }

    #[test]
    fn stale_evaluation_is_discarded() {
        let mut m = machine(1, accepting_bank(3));
        let (ann, start) = join(&mut m, "Ann");
        let first = armed_round(&start);
        submit(&mut m, ann, 0);
        let effects = m.handle(SessionEvent::SubmissionEvaluated {
            conn: ann,
            round: first,
            passed: true,
        });
        assert_eq!(effects.len(), 1);

        let next = m.handle(SessionEvent::RoundTimeout { round: first });
        let second = armed_round(&next);
        assert_ne!(first, second);

        let effects = m.handle(SessionEvent::SubmissionEvaluated {
            conn: ann,
            round: first,
            passed: false,
        });
        assert!(effects.is_empty());
        assert_eq!(status_of(&m, ann), ParticipantStatus::Playing);
    }

    #[test]
    fn timeout_eliminates_exactly_playing_participants() {
        let mut m = machine(3, accepting_bank(2));
        let (ann, _) = join(&mut m, "Ann");
        let (bob, _) = join(&mut m, "Bob");
        let (cat, start) = join(&mut m, "Cat");
        let round = armed_round(&start);
        submit(&mut m, ann, 0);
        m.handle(SessionEvent::SubmissionEvaluated {
            conn: ann,
            round,
            passed: true,
        });

        let effects = m.handle(SessionEvent::RoundTimeout { round });
        let eliminated: Vec<ConnectionId> = effects
            .iter()
            .filter_map(|e| match e {
                Effect::Send {
                    to,
                    status: Status::Eliminated,
                } => Some(*to),
                _ => None,
            })
            .collect();
        assert_eq!(eliminated, vec![bob, cat]);
        assert_eq!(status_of(&m, bob), ParticipantStatus::Eliminated);
        assert_eq!(status_of(&m, cat), ParticipantStatus::Eliminated);

        // Ann survives into round two and is Playing again.
        assert_eq!(status_of(&m, ann), ParticipantStatus::Playing);
        assert_eq!(m.session().current_question, 1);
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::Broadcast {
                audience: Audience::Survivors(ids),
                status: Status::Question(q),
            } if ids == &vec![ann] && q.q_num == 1
        )));
    }

    #[test]
    fn in_flight_evaluation_is_eliminated_by_timeout() {
        let mut m = machine(1, accepting_bank(2));
        let (ann, start) = join(&mut m, "Ann");
        let round = armed_round(&start);
        submit(&mut m, ann, 0);

        let effects = m.handle(SessionEvent::RoundTimeout { round });
        assert!(effects.contains(&Effect::Send {
            to: ann,
            status: Status::Eliminated,
        }));
        // The late verdict belongs to a finished round.
        let late = m.handle(SessionEvent::SubmissionEvaluated {
            conn: ann,
            round,
            passed: true,
        });
        assert!(late.is_empty());
    }

    #[test]
    fn stale_timeout_is_ignored() {
        let mut m = machine(1, accepting_bank(3));
        let (ann, start) = join(&mut m, "Ann");
        let first = armed_round(&start);
        submit(&mut m, ann, 0);
        m.handle(SessionEvent::SubmissionEvaluated {
            conn: ann,
            round: first,
            passed: true,
        });
        m.handle(SessionEvent::RoundTimeout { round: first });

        assert!(m.handle(SessionEvent::RoundTimeout { round: first }).is_empty());
        assert_eq!(m.session().current_question, 1);
    }

    #[test]
    fn rounds_without_submissions_end_in_fresh_lobby() {
        let count = 3;
        let mut m = machine(2, accepting_bank(count));
        join(&mut m, "Ann");
        let (_, start) = join(&mut m, "Bob");
        let mut round = armed_round(&start);

        for q in 0..count {
            assert_eq!(m.session().phase, Phase::InRound);
            assert_eq!(m.session().current_question, q);
            let effects = m.handle(SessionEvent::RoundTimeout { round });
            if q + 1 < count {
                round = armed_round(&effects);
            } else {
                assert!(effects.contains(&Effect::Broadcast {
                    audience: Audience::All,
                    status: Status::GameOver(GameOverMsg {
                        winners: Vec::new(),
                        losers: vec!["Ann".to_string(), "Bob".to_string()],
                    }),
                }));
                assert!(effects.contains(&Effect::CloseAll));
            }
        }

        assert_eq!(m.session().phase, Phase::Lobby);
        assert!(m.session().participants.is_empty());
        assert_eq!(m.session().current_question, 0);
        assert_eq!(m.session().epoch, 1);
    }

    #[test]
    fn round_with_no_survivors_still_arms_timer() {
        let mut m = machine(1, accepting_bank(3));
        let (ann, start) = join(&mut m, "Ann");
        let round = armed_round(&start);

        let effects = m.handle(SessionEvent::RoundTimeout { round });
        assert_eq!(status_of(&m, ann), ParticipantStatus::Eliminated);
        assert!(effects.contains(&Effect::Broadcast {
            audience: Audience::Survivors(Vec::new()),
            status: Status::Question(QuestionMsg {
                q_num: 1,
                total_q: 3,
                description: "Question 2".to_string(),
                time_left: 10_000,
                code_template: None,
            }),
        }));
        assert_eq!(
            armed_round(&effects),
            RoundKey {
                epoch: 0,
                question: 1
            }
        );
        // Eliminated participants cannot submit in later rounds.
        assert!(submit(&mut m, ann, 1).is_empty());
    }

    #[test]
    fn single_player_wins() {
        let mut m = machine(1, accepting_bank(1));
        let (ann, start) = join(&mut m, "Ann");
        assert!(matches!(
            &start[0],
            Effect::Broadcast {
                status: Status::Question(_),
                ..
            }
        ));
        let round = armed_round(&start);

        submit(&mut m, ann, 0);
        let effects = m.handle(SessionEvent::SubmissionEvaluated {
            conn: ann,
            round,
            passed: true,
        });
        assert_eq!(
            effects,
            vec![Effect::Send {
                to: ann,
                status: Status::Passed,
            }]
        );

        let effects = m.handle(SessionEvent::RoundTimeout { round });
        assert_eq!(
            effects,
            vec![
                Effect::CancelTimer,
                Effect::Broadcast {
                    audience: Audience::All,
                    status: Status::GameOver(GameOverMsg {
                        winners: vec!["Ann".to_string()],
                        losers: Vec::new(),
                    }),
                },
                Effect::CloseAll,
            ]
        );
    }

    #[test]
    fn disconnect_in_lobby_rebroadcasts_roster() {
        let mut m = machine(3, accepting_bank(1));
        let (ann, _) = join(&mut m, "Ann");
        join(&mut m, "Bob");

        let effects = m.handle(SessionEvent::Disconnect { conn: ann });
        assert_eq!(
            effects,
            vec![Effect::Broadcast {
                audience: Audience::All,
                status: Status::WaitingStart(WaitingStartMsg {
                    players: vec!["Bob".to_string()],
                }),
            }]
        );
    }

    #[test]
    fn last_disconnect_mid_round_resets() {
        let mut m = machine(2, accepting_bank(2));
        let (ann, _) = join(&mut m, "Ann");
        let (bob, start) = join(&mut m, "Bob");
        let round = armed_round(&start);

        assert!(m.handle(SessionEvent::Disconnect { conn: ann }).is_empty());
        assert_eq!(m.session().phase, Phase::InRound);

        let effects = m.handle(SessionEvent::Disconnect { conn: bob });
        assert_eq!(effects, vec![Effect::CancelTimer]);
        assert_eq!(m.session().phase, Phase::Lobby);
        assert!(m.session().participants.is_empty());

        // The old round's timer can no longer touch the new session.
        assert!(m.handle(SessionEvent::RoundTimeout { round }).is_empty());
        let (_, effects) = join(&mut m, "Cat");
        assert!(matches!(
            &effects[0],
            Effect::Broadcast {
                status: Status::WaitingStart(_),
                ..
            }
        ));
    }

    #[test]
    fn disconnect_of_stranger_is_noop() {
        let mut m = machine(2, accepting_bank(1));
        join(&mut m, "Ann");
        let effects = m.handle(SessionEvent::Disconnect {
            conn: ConnectionId::random(),
        });
        assert!(effects.is_empty());
        assert_eq!(m.session().participants.len(), 1);
    }

    #[test]
    fn events_report_their_connection() {
        let conn = ConnectionId::random();
        let join = SessionEvent::Join {
            conn,
            display_name: "Ann".to_string(),
        };
        assert_eq!(join.connection(), Some(conn));
        assert_eq!(SessionEvent::Disconnect { conn }.connection(), Some(conn));
        let timeout = SessionEvent::RoundTimeout {
            round: RoundKey {
                epoch: 0,
                question: 0,
            },
        };
        assert_eq!(timeout.connection(), None);
    }

    #[test]
    fn snapshot_reports_live_question() {
        let mut m = machine(1, accepting_bank(2));
        let lobby = m.snapshot(3);
        assert_eq!(lobby.phase, Phase::Lobby);
        assert_eq!(lobby.question, None);
        assert_eq!(lobby.connections, 3);

        join(&mut m, "Ann");
        let live = m.snapshot(1);
        assert_eq!(live.phase, Phase::InRound);
        assert_eq!(live.question, Some(0));
        assert_eq!(live.players, vec!["Ann".to_string()]);
    }

    proptest! {
        #[test]
        fn roster_names_stay_unique(names in prop::collection::vec("[aAbBcC]{1,2}", 1..24)) {
            let mut m = machine(usize::MAX, accepting_bank(1));
            let mut seen = std::collections::HashSet::new();
            for name in &names {
                let (conn, effects) = join(&mut m, name);
                let fresh = seen.insert(name.to_lowercase());
                let rejected = effects.contains(&Effect::Send {
                    to: conn,
                    status: Status::PlayerAlreadyJoined,
                });
                prop_assert_eq!(fresh, !rejected);
            }

            let lowered: std::collections::HashSet<String> = m
                .session()
                .participants
                .iter()
                .map(|p| p.display_name.to_lowercase())
                .collect();
            prop_assert_eq!(lowered.len(), m.session().participants.len());
            prop_assert_eq!(lowered, seen);
        }
    }
}
