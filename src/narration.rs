//! Narration Sequencer: ordered read-out of a question and its options.
//!
//! A stage machine driven by Speech Channel completion signals. A later
//! read never begins before the earlier one resolves; skip force-cancels
//! the channel and jumps straight to ready. Each (re)start bumps an epoch
//! so the session can discard events from sequences it has moved past.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::announce;
use crate::quiz::Question;
use crate::session::EngineEvent;
use crate::speech::{SpeakOutcome, SpeechChannel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NarrationStage {
    Idle,
    ReadingQuestion,
    ReadingOption(usize),
    Ready,
    Interrupted,
}

impl std::fmt::Display for NarrationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::ReadingQuestion => write!(f, "reading-question"),
            Self::ReadingOption(i) => write!(f, "reading-option-{}", i + 1),
            Self::Ready => write!(f, "ready"),
            Self::Interrupted => write!(f, "interrupted"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NarrationEvent {
    pub question: usize,
    pub epoch: u64,
    pub stage: NarrationStage,
}

struct ReadStep {
    /// Stage to report before speaking. None for interjections (help text)
    /// that are not part of the question read-out.
    stage: Option<NarrationStage>,
    text: String,
}

pub struct NarrationSequencer {
    speech: Arc<SpeechChannel>,
    events: mpsc::Sender<EngineEvent>,
    gap: Duration,
    epoch: u64,
    question: usize,
    stage: Arc<Mutex<NarrationStage>>,
    task: Option<JoinHandle<()>>,
}

impl NarrationSequencer {
    pub fn new(speech: Arc<SpeechChannel>, events: mpsc::Sender<EngineEvent>, gap: Duration) -> Self {
        Self {
            speech,
            events,
            gap,
            epoch: 0,
            question: 0,
            stage: Arc::new(Mutex::new(NarrationStage::Idle)),
            task: None,
        }
    }

    pub fn stage(&self) -> NarrationStage {
        *self.stage.lock().unwrap()
    }

    /// Begin the full read-out for a question. Returns the epoch that guards
    /// this sequence's events.
    pub fn start(&mut self, question: usize, q: &Question) -> u64 {
        self.begin(question, read_steps(q, false))
    }

    /// Replay the whole sequence, question first.
    pub fn repeat_question(&mut self, question: usize, q: &Question) -> u64 {
        self.begin(question, read_steps(q, false))
    }

    /// Replay only the options.
    pub fn repeat_options(&mut self, question: usize, q: &Question) -> u64 {
        self.begin(question, read_steps(q, true))
    }

    /// Speak a one-off announcement, then report ready again. Used for the
    /// help read-out while a question is open.
    pub fn announce(&mut self, question: usize, text: String) -> u64 {
        self.begin(question, vec![ReadStep { stage: None, text }])
    }

    /// Force-cancel whatever is being read and jump straight to ready,
    /// announcing nothing further.
    pub fn skip(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.speech.cancel();
        *self.stage.lock().unwrap() = NarrationStage::Ready;

        let event = EngineEvent::Narration(NarrationEvent {
            question: self.question,
            epoch: self.epoch,
            stage: NarrationStage::Ready,
        });
        if self.events.try_send(event).is_err() {
            debug!("Engine event channel full, dropping skip notification");
        }
    }

    pub fn pause(&self) {
        self.speech.pause();
    }

    pub fn resume(&self) {
        self.speech.resume();
    }

    /// Clean up when the owning question changes or the session ends.
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.speech.cancel();
        *self.stage.lock().unwrap() = NarrationStage::Idle;
    }

    fn begin(&mut self, question: usize, steps: Vec<ReadStep>) -> u64 {
        self.cancel();
        self.epoch += 1;
        self.question = question;

        self.task = Some(tokio::spawn(run_sequence(
            self.speech.clone(),
            self.events.clone(),
            self.stage.clone(),
            self.gap,
            question,
            self.epoch,
            steps,
        )));

        self.epoch
    }
}

fn read_steps(q: &Question, options_only: bool) -> Vec<ReadStep> {
    let mut steps = Vec::new();
    if !options_only {
        steps.push(ReadStep {
            stage: Some(NarrationStage::ReadingQuestion),
            text: q.text.clone(),
        });
    }
    for (i, option) in q.options.iter().enumerate() {
        steps.push(ReadStep {
            stage: Some(NarrationStage::ReadingOption(i)),
            text: announce::option_read(i, option),
        });
    }
    steps
}

async fn run_sequence(
    speech: Arc<SpeechChannel>,
    events: mpsc::Sender<EngineEvent>,
    stage_cell: Arc<Mutex<NarrationStage>>,
    gap: Duration,
    question: usize,
    epoch: u64,
    steps: Vec<ReadStep>,
) {
    for step in &steps {
        if let Some(stage) = step.stage {
            *stage_cell.lock().unwrap() = stage;
            let event = EngineEvent::Narration(NarrationEvent { question, epoch, stage });
            if events.send(event).await.is_err() {
                return;
            }
        }

        let signal = speech.speak(&step.text);
        match signal.await {
            Ok(SpeakOutcome::Completed) => {}
            Ok(SpeakOutcome::Failed(reason)) => {
                // Fail open: a broken backend must not stall the quiz.
                warn!("Speech failed, continuing read-out: {reason}");
            }
            Ok(SpeakOutcome::Cancelled) | Err(_) => {
                *stage_cell.lock().unwrap() = NarrationStage::Interrupted;
                return;
            }
        }

        if !gap.is_zero() {
            tokio::time::sleep(gap).await;
        }
    }

    *stage_cell.lock().unwrap() = NarrationStage::Ready;
    let event = EngineEvent::Narration(NarrationEvent {
        question,
        epoch,
        stage: NarrationStage::Ready,
    });
    let _ = events.send(event).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(options: &[&str]) -> Question {
        Question {
            id: "q1".into(),
            text: "Capital of France?".into(),
            options: options.iter().map(|s| s.to_string()).collect(),
            correct_option: options[0].into(),
        }
    }

    fn sequencer() -> (NarrationSequencer, mpsc::Receiver<EngineEvent>) {
        let (tx, rx) = mpsc::channel(64);
        let speech = Arc::new(SpeechChannel::muted(None, 50));
        let seq = NarrationSequencer::new(speech, tx, Duration::from_millis(500));
        (seq, rx)
    }

    async fn next_stage(rx: &mut mpsc::Receiver<EngineEvent>) -> NarrationEvent {
        loop {
            match rx.recv().await.expect("event channel open") {
                EngineEvent::Narration(ev) => return ev,
                _ => continue,
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reads_question_then_options_in_order() {
        let (mut seq, mut rx) = sequencer();
        let q = question(&["Paris", "Lyon", "Nice"]);
        let epoch = seq.start(0, &q);

        let expected = [
            NarrationStage::ReadingQuestion,
            NarrationStage::ReadingOption(0),
            NarrationStage::ReadingOption(1),
            NarrationStage::ReadingOption(2),
            NarrationStage::Ready,
        ];
        for stage in expected {
            let ev = next_stage(&mut rx).await;
            assert_eq!(ev.stage, stage);
            assert_eq!(ev.question, 0);
            assert_eq!(ev.epoch, epoch);
        }
        assert_eq!(seq.stage(), NarrationStage::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn skip_mid_sequence_forces_ready() {
        let (mut seq, mut rx) = sequencer();
        let q = question(&["Paris", "Lyon"]);
        let epoch = seq.start(0, &q);

        assert_eq!(next_stage(&mut rx).await.stage, NarrationStage::ReadingQuestion);

        seq.skip();
        assert_eq!(seq.stage(), NarrationStage::Ready);

        let ev = next_stage(&mut rx).await;
        assert_eq!(ev.stage, NarrationStage::Ready);
        assert_eq!(ev.epoch, epoch);

        // The aborted reader task produces nothing further.
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn repeat_options_starts_at_first_option() {
        let (mut seq, mut rx) = sequencer();
        let q = question(&["Paris", "Lyon"]);

        let first = seq.start(0, &q);
        let second = seq.repeat_options(0, &q);
        assert_ne!(first, second);

        // Skip anything still queued from the cancelled first sequence.
        let ev = loop {
            let ev = next_stage(&mut rx).await;
            if ev.epoch == second {
                break ev;
            }
        };
        assert_eq!(ev.stage, NarrationStage::ReadingOption(0));
    }

    #[tokio::test(start_paused = true)]
    async fn single_option_question_still_reaches_ready() {
        let (mut seq, mut rx) = sequencer();
        let q = question(&["Paris"]);
        seq.start(0, &q);

        let mut last = next_stage(&mut rx).await;
        while last.stage != NarrationStage::Ready {
            last = next_stage(&mut rx).await;
        }
        assert_eq!(seq.stage(), NarrationStage::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn announce_reports_ready_when_done() {
        let (mut seq, mut rx) = sequencer();
        let epoch = seq.announce(0, "helpful words".into());

        let ev = next_stage(&mut rx).await;
        assert_eq!(ev.stage, NarrationStage::Ready);
        assert_eq!(ev.epoch, epoch);
    }
}
