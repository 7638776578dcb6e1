//! Quiz session state machine.
//!
//! LOADING → INSTRUCTIONS → (NARRATING → ARMED → RESOLVED)* → ADVANCING → FINISHED
//!
//! The run loop is the single writer of session state. Narration, the
//! timer, and the keyboard only report events into one channel, and every
//! asynchronous completion is checked against the current question and
//! narration epoch before it may touch state, so nothing stale ever lands.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::announce;
use crate::config::Config;
use crate::input::{self, RouterContext, SessionCommand};
use crate::narration::{NarrationEvent, NarrationSequencer, NarrationStage};
use crate::notifier::Notifier;
use crate::provider::{OutcomeReport, QuizLoadError, QuizProvider, ResultSink};
use crate::quiz::{Answer, Question, QuestionOutcome, Quiz};
use crate::speech::SpeechChannel;
use crate::timer::{TimerEvent, TimerGate};

/// Everything that can wake the session's run loop.
#[derive(Debug)]
pub enum EngineEvent {
    Key(evdev::Key),
    Command(SessionCommand),
    Narration(NarrationEvent),
    Timer(TimerEvent),
    AdvanceDue { question: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Loading,
    Instructions,
    Narrating,
    Armed,
    Resolved,
    Advancing,
    Finished,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Loading => write!(f, "LOADING"),
            Self::Instructions => write!(f, "INSTRUCTIONS"),
            Self::Narrating => write!(f, "NARRATING"),
            Self::Armed => write!(f, "ARMED"),
            Self::Resolved => write!(f, "RESOLVED"),
            Self::Advancing => write!(f, "ADVANCING"),
            Self::Finished => write!(f, "FINISHED"),
        }
    }
}

/// Read-only view for the host UI, published on every state change.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub current_index: usize,
    pub narration_stage: NarrationStage,
    pub time_remaining: u32,
    pub score: usize,
    pub outcomes: Vec<QuestionOutcome>,
}

#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub quiz_id: String,
    pub score: usize,
    pub total: usize,
    pub outcomes: Vec<QuestionOutcome>,
}

/// Handed to the host: inject events, observe snapshots, flag text entry.
pub struct SessionHandle {
    pub events: mpsc::Sender<EngineEvent>,
    pub snapshot: watch::Receiver<SessionSnapshot>,
    pub text_entry: Arc<AtomicBool>,
}

pub struct QuizSession {
    config: Config,
    speech: Arc<SpeechChannel>,
    narration: NarrationSequencer,
    timer: TimerGate,
    notifier: Notifier,

    events_tx: mpsc::Sender<EngineEvent>,
    events_rx: mpsc::Receiver<EngineEvent>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    text_entry: Arc<AtomicBool>,

    quiz: Quiz,
    phase: SessionPhase,
    index: usize,
    outcomes: Vec<QuestionOutcome>,
    narration_epoch: u64,
    narration_stage: NarrationStage,
    time_remaining: u32,
    /// True while narration is replaying (repeat/help) after the timer
    /// already armed for this question.
    replaying: bool,
    speech_paused: bool,
    started_at: DateTime<Utc>,
}

impl QuizSession {
    pub fn new(
        config: Config,
        speech: Arc<SpeechChannel>,
        notifier: Notifier,
    ) -> (Self, SessionHandle) {
        let (events_tx, events_rx) = mpsc::channel(64);
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot {
            phase: SessionPhase::Loading,
            current_index: 0,
            narration_stage: NarrationStage::Idle,
            time_remaining: config.timer.duration_secs,
            score: 0,
            outcomes: Vec::new(),
        });
        let text_entry = Arc::new(AtomicBool::new(false));

        let narration = NarrationSequencer::new(
            speech.clone(),
            events_tx.clone(),
            Duration::from_millis(config.narration.gap_ms),
        );
        let timer = TimerGate::new(events_tx.clone());

        let handle = SessionHandle {
            events: events_tx.clone(),
            snapshot: snapshot_rx,
            text_entry: text_entry.clone(),
        };

        let session = Self {
            time_remaining: config.timer.duration_secs,
            config,
            speech,
            narration,
            timer,
            notifier,
            events_tx,
            events_rx,
            snapshot_tx,
            text_entry,
            quiz: Quiz::default(),
            phase: SessionPhase::Loading,
            index: 0,
            outcomes: Vec::new(),
            narration_epoch: 0,
            narration_stage: NarrationStage::Idle,
            replaying: false,
            speech_paused: false,
            started_at: Utc::now(),
        };

        (session, handle)
    }

    /// Drive one full quiz pass: fetch, narrate, collect outcomes, submit.
    pub async fn run(
        mut self,
        provider: Arc<dyn QuizProvider>,
        sink: Arc<dyn ResultSink>,
        quiz_id: &str,
    ) -> Result<SessionSummary, QuizLoadError> {
        info!("Loading quiz '{quiz_id}'");
        let quiz = match provider.fetch_quiz(quiz_id).await {
            Ok(quiz) => quiz,
            Err(e) => {
                warn!("Quiz load failed: {e}");
                self.notifier.load_failed(&e.to_string());
                return Err(e);
            }
        };

        self.started_at = Utc::now();
        self.quiz = quiz;

        if let Err(e) = self.quiz.validate() {
            warn!("Quiz '{quiz_id}' is malformed, finishing with no outcomes: {e}");
            return Ok(self.finish(sink).await);
        }
        if self.quiz.questions.is_empty() {
            info!("Quiz '{quiz_id}' has no questions");
            return Ok(self.finish(sink).await);
        }

        self.set_phase(SessionPhase::Instructions);
        let _ = self.speech.speak(announce::INSTRUCTIONS);
        self.publish();

        while self.phase != SessionPhase::Finished {
            let Some(event) = self.events_rx.recv().await else {
                warn!("Engine event channel closed");
                break;
            };
            self.handle_event(event);
            self.publish();
        }

        Ok(self.finish(sink).await)
    }

    fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Key(key) => {
                let ctx = RouterContext {
                    text_entry_focused: self.text_entry.load(Ordering::Relaxed),
                    option_count: self.current_question().map_or(0, |q| q.options.len()),
                    in_instructions: self.phase == SessionPhase::Instructions,
                };
                if let Some(cmd) = input::route(key, &ctx) {
                    self.apply_command(cmd);
                }
            }
            EngineEvent::Command(cmd) => self.apply_command(cmd),
            EngineEvent::Narration(ev) => self.on_narration(ev),
            EngineEvent::Timer(ev) => self.on_timer(ev),
            EngineEvent::AdvanceDue { question } => self.on_advance_due(question),
        }
    }

    fn apply_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Begin => {
                if self.phase == SessionPhase::Instructions {
                    self.speech.cancel();
                    self.start_question(0);
                } else {
                    debug!("Begin ignored in phase {}", self.phase);
                }
            }
            SessionCommand::SkipInstructions => {
                if self.phase == SessionPhase::Instructions {
                    self.speech.cancel();
                } else {
                    debug!("Skip-instructions ignored in phase {}", self.phase);
                }
            }
            SessionCommand::SelectOption(index) => self.select_option(index),
            SessionCommand::RepeatQuestion => self.repeat(false),
            SessionCommand::RepeatOptions => self.repeat(true),
            SessionCommand::SkipNarration => {
                let narrating = self.phase == SessionPhase::Narrating
                    || (self.phase == SessionPhase::Armed && self.replaying);
                if narrating {
                    self.narration.skip();
                } else {
                    debug!("Skip ignored in phase {}", self.phase);
                }
            }
            SessionCommand::TogglePause => self.toggle_pause(),
            SessionCommand::Help => self.read_help(),
            SessionCommand::Quit => self.quit(),
        }
    }

    fn select_option(&mut self, index: usize) {
        if self.phase != SessionPhase::Armed {
            // Also guards double submission: once RESOLVED, further answers
            // are dropped here.
            debug!("Answer ignored in phase {}", self.phase);
            return;
        }

        let Some(question) = self.current_question().cloned() else {
            return;
        };
        let Some(option) = question.options.get(index).cloned() else {
            debug!("Option {} does not exist, ignoring", index + 1);
            return;
        };

        let is_correct = question.correct_option == option;
        let spent = self
            .config
            .timer
            .duration_secs
            .saturating_sub(self.timer.remaining());
        self.resolve(question, Answer::Choice(option), is_correct, spent);
    }

    /// Record the single outcome for the current question and schedule the
    /// advance to the next one.
    fn resolve(&mut self, question: Question, answer: Answer, is_correct: bool, spent: u32) {
        self.narration.cancel();
        self.timer.cancel();
        self.replaying = false;
        self.clear_pause();

        info!(
            "Question {} resolved: {} ({}, {spent}s)",
            self.index + 1,
            answer,
            if is_correct { "correct" } else { "incorrect" },
        );

        let feedback = match (&answer, is_correct) {
            (Answer::Timeout, _) => announce::timeout_feedback(&question.correct_option),
            (_, true) => announce::correct_feedback().to_string(),
            (_, false) => announce::incorrect_feedback(&question.correct_option),
        };

        self.outcomes.push(QuestionOutcome {
            question_id: question.id,
            selected_option: answer,
            is_correct,
            time_spent_seconds: spent,
        });
        self.set_phase(SessionPhase::Resolved);

        let _ = self.speech.speak(&feedback);
        self.schedule_advance();
    }

    fn schedule_advance(&self) {
        let tx = self.events_tx.clone();
        let question = self.index;
        let delay = Duration::from_millis(self.config.narration.feedback_delay_ms);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(EngineEvent::AdvanceDue { question }).await;
        });
    }

    fn repeat(&mut self, options_only: bool) {
        if !matches!(self.phase, SessionPhase::Narrating | SessionPhase::Armed) {
            debug!("Repeat ignored in phase {}", self.phase);
            return;
        }
        let Some(question) = self.current_question().cloned() else {
            return;
        };

        if self.phase == SessionPhase::Armed {
            // Hold the countdown while content is replayed.
            self.timer.pause();
            self.replaying = true;
        }

        self.narration_epoch = if options_only {
            self.narration.repeat_options(self.index, &question)
        } else {
            self.narration.repeat_question(self.index, &question)
        };
    }

    fn read_help(&mut self) {
        match self.phase {
            SessionPhase::Instructions => {
                let _ = self.speech.speak(announce::HELP);
            }
            SessionPhase::Armed => {
                self.timer.pause();
                self.replaying = true;
                self.narration_epoch = self
                    .narration
                    .announce(self.index, announce::HELP.to_string());
            }
            _ => debug!("Help ignored in phase {}", self.phase),
        }
    }

    fn toggle_pause(&mut self) {
        if !matches!(self.phase, SessionPhase::Narrating | SessionPhase::Armed) {
            debug!("Pause toggle ignored in phase {}", self.phase);
            return;
        }

        if self.speech_paused {
            self.narration.resume();
            self.speech_paused = false;
            info!("Narration resumed");
        } else {
            self.narration.pause();
            self.speech_paused = true;
            info!("Narration paused");
        }
    }

    fn clear_pause(&mut self) {
        if self.speech_paused {
            self.speech.resume();
            self.speech_paused = false;
        }
    }

    fn on_narration(&mut self, ev: NarrationEvent) {
        if ev.question != self.index || ev.epoch != self.narration_epoch {
            debug!(
                "Discarding stale narration event (question {}, epoch {})",
                ev.question, ev.epoch
            );
            return;
        }

        self.narration_stage = ev.stage;
        if ev.stage != NarrationStage::Ready {
            return;
        }

        match self.phase {
            SessionPhase::Narrating => {
                self.time_remaining = self.config.timer.duration_secs;
                if self.timer.arm(self.index, self.config.timer.duration_secs).is_ok() {
                    self.set_phase(SessionPhase::Armed);
                }
            }
            SessionPhase::Armed if self.replaying => {
                self.replaying = false;
                if self.config.timer.preserve_on_repeat {
                    self.timer.resume();
                } else {
                    self.timer.cancel();
                    self.time_remaining = self.config.timer.duration_secs;
                    let _ = self.timer.arm(self.index, self.config.timer.duration_secs);
                }
            }
            _ => debug!("Ready ignored in phase {}", self.phase),
        }
    }

    fn on_timer(&mut self, ev: TimerEvent) {
        match ev {
            TimerEvent::Tick { question, remaining } => {
                if question != self.index || self.phase != SessionPhase::Armed {
                    debug!("Discarding stale timer tick (question {question})");
                    return;
                }
                self.time_remaining = remaining;
            }
            TimerEvent::Timeout { question } => {
                if question != self.index || self.phase != SessionPhase::Armed {
                    debug!("Discarding stale timeout (question {question})");
                    return;
                }
                let Some(q) = self.current_question().cloned() else {
                    return;
                };
                info!("Question {} timed out", self.index + 1);
                self.time_remaining = 0;
                self.resolve(q, Answer::Timeout, false, self.config.timer.duration_secs);
            }
        }
    }

    fn on_advance_due(&mut self, question: usize) {
        if question != self.index || self.phase != SessionPhase::Resolved {
            debug!("Discarding stale advance (question {question})");
            return;
        }

        self.set_phase(SessionPhase::Advancing);
        self.index += 1;

        if self.index < self.quiz.questions.len() {
            self.start_question(self.index);
        } else {
            self.set_phase(SessionPhase::Finished);
        }
    }

    fn start_question(&mut self, index: usize) {
        self.index = index;
        self.timer.cancel();
        self.replaying = false;
        self.clear_pause();
        self.time_remaining = self.config.timer.duration_secs;

        let question = self.quiz.questions[index].clone();
        info!(
            "Question {}/{}: {}",
            index + 1,
            self.quiz.questions.len(),
            question.id
        );

        self.narration_epoch = self.narration.start(index, &question);
        self.set_phase(SessionPhase::Narrating);
    }

    fn quit(&mut self) {
        info!("Quit requested");

        if matches!(self.phase, SessionPhase::Narrating | SessionPhase::Armed) {
            if let Some(question) = self.current_question().cloned() {
                let spent = if self.timer.is_armed() {
                    self.config
                        .timer
                        .duration_secs
                        .saturating_sub(self.timer.remaining())
                } else {
                    0
                };
                self.outcomes.push(QuestionOutcome {
                    question_id: question.id,
                    selected_option: Answer::Unanswered,
                    is_correct: false,
                    time_spent_seconds: spent,
                });
            }
        }

        self.narration.cancel();
        self.timer.cancel();
        self.speech.cancel();
        self.set_phase(SessionPhase::Finished);
    }

    async fn finish(mut self, sink: Arc<dyn ResultSink>) -> SessionSummary {
        self.narration.cancel();
        self.timer.cancel();
        self.set_phase(SessionPhase::Finished);

        let score = self.score();
        let total = self.quiz.questions.len();
        info!("Quiz '{}' finished: score {score}/{total}", self.quiz.id);
        self.publish();

        // Let the spoken summary play out before the process moves on.
        let signal = self.speech.speak(&announce::summary(score, total));
        let _ = signal.await;

        self.notifier
            .session_finished(&self.quiz.title, score, total);

        let report = OutcomeReport {
            quiz_id: self.quiz.id.clone(),
            score,
            total_questions: total,
            outcomes: self.outcomes.clone(),
            started_at: self.started_at,
            finished_at: Utc::now(),
        };
        if self.config.api.submit_results {
            if let Err(e) = sink.submit_outcomes(&report).await {
                warn!("Failed to submit outcomes: {e}");
            }
        }

        SessionSummary {
            quiz_id: self.quiz.id,
            score,
            total,
            outcomes: self.outcomes,
        }
    }

    fn current_question(&self) -> Option<&Question> {
        self.quiz.questions.get(self.index)
    }

    fn score(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_correct).count()
    }

    fn set_phase(&mut self, phase: SessionPhase) {
        if self.phase != phase {
            info!("State: {} → {}", self.phase, phase);
            self.phase = phase;
        }
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(SessionSnapshot {
            phase: self.phase,
            current_index: self.index,
            narration_stage: self.narration_stage,
            time_remaining: self.time_remaining,
            score: self.score(),
            outcomes: self.outcomes.clone(),
        });
    }
}
