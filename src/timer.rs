//! Timer Gate: the one-second countdown that bounds answering.
//!
//! Armed once narration reports ready, never before. Pausing preserves
//! remaining time; cancelling discards it. Timeout fires exactly once per
//! arming.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::session::EngineEvent;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TimerError {
    #[error("countdown already armed")]
    AlreadyArmed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    Tick { question: usize, remaining: u32 },
    Timeout { question: usize },
}

pub struct TimerGate {
    events: mpsc::Sender<EngineEvent>,
    task: Option<JoinHandle<()>>,
    paused: Arc<AtomicBool>,
    remaining: Arc<AtomicU32>,
    armed: bool,
}

impl TimerGate {
    pub fn new(events: mpsc::Sender<EngineEvent>) -> Self {
        Self {
            events,
            task: None,
            paused: Arc::new(AtomicBool::new(false)),
            remaining: Arc::new(AtomicU32::new(0)),
            armed: false,
        }
    }

    /// Start a countdown for the given question. Exactly one countdown may
    /// exist per question; re-arming while armed is rejected.
    pub fn arm(&mut self, question: usize, duration_secs: u32) -> Result<(), TimerError> {
        if self.armed {
            warn!("Timer already armed, ignoring re-arm for question {question}");
            return Err(TimerError::AlreadyArmed);
        }

        self.armed = true;
        self.paused.store(false, Ordering::Relaxed);
        self.remaining.store(duration_secs, Ordering::Relaxed);
        info!("Timer armed: {duration_secs}s for question {}", question + 1);

        self.task = Some(tokio::spawn(run_countdown(
            question,
            self.remaining.clone(),
            self.paused.clone(),
            self.events.clone(),
        )));

        Ok(())
    }

    /// Freeze the countdown, keeping the remaining time.
    pub fn pause(&self) {
        if self.armed {
            self.paused.store(true, Ordering::Relaxed);
        }
    }

    pub fn resume(&self) {
        if self.armed {
            self.paused.store(false, Ordering::Relaxed);
        }
    }

    /// Stop counting and discard remaining time.
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.armed = false;
        self.paused.store(false, Ordering::Relaxed);
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn remaining(&self) -> u32 {
        self.remaining.load(Ordering::Relaxed)
    }
}

async fn run_countdown(
    question: usize,
    remaining: Arc<AtomicU32>,
    paused: Arc<AtomicBool>,
    events: mpsc::Sender<EngineEvent>,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    // The first tick of a tokio interval fires immediately; consume it so
    // the countdown starts one full second after arming.
    ticker.tick().await;

    loop {
        ticker.tick().await;

        if paused.load(Ordering::Relaxed) {
            continue;
        }

        let left = remaining.load(Ordering::Relaxed).saturating_sub(1);
        remaining.store(left, Ordering::Relaxed);

        if events
            .send(EngineEvent::Timer(TimerEvent::Tick {
                question,
                remaining: left,
            }))
            .await
            .is_err()
        {
            return;
        }

        if left == 0 {
            let _ = events
                .send(EngineEvent::Timer(TimerEvent::Timeout { question }))
                .await;
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn next_timer_event(rx: &mut mpsc::Receiver<EngineEvent>) -> TimerEvent {
        loop {
            match rx.recv().await.expect("event channel open") {
                EngineEvent::Timer(ev) => return ev,
                _ => continue,
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn counts_down_and_times_out_once() {
        let (tx, mut rx) = mpsc::channel(64);
        let mut gate = TimerGate::new(tx);
        gate.arm(0, 3).unwrap();

        assert_eq!(
            next_timer_event(&mut rx).await,
            TimerEvent::Tick { question: 0, remaining: 2 }
        );
        assert_eq!(
            next_timer_event(&mut rx).await,
            TimerEvent::Tick { question: 0, remaining: 1 }
        );
        assert_eq!(
            next_timer_event(&mut rx).await,
            TimerEvent::Tick { question: 0, remaining: 0 }
        );
        assert_eq!(
            next_timer_event(&mut rx).await,
            TimerEvent::Timeout { question: 0 }
        );

        // The ticker task has stopped; nothing further arrives.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn pause_preserves_remaining_time() {
        let (tx, mut rx) = mpsc::channel(64);
        let mut gate = TimerGate::new(tx);
        gate.arm(0, 30).unwrap();

        assert_eq!(
            next_timer_event(&mut rx).await,
            TimerEvent::Tick { question: 0, remaining: 29 }
        );

        gate.pause();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err(), "paused countdown must not tick");
        assert_eq!(gate.remaining(), 29);

        gate.resume();
        assert_eq!(
            next_timer_event(&mut rx).await,
            TimerEvent::Tick { question: 0, remaining: 28 }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_while_armed_is_rejected() {
        let (tx, _rx) = mpsc::channel(64);
        let mut gate = TimerGate::new(tx);

        gate.arm(0, 30).unwrap();
        assert_eq!(gate.arm(0, 10), Err(TimerError::AlreadyArmed));
        assert_eq!(gate.remaining(), 30);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_events() {
        let (tx, mut rx) = mpsc::channel(64);
        let mut gate = TimerGate::new(tx);
        gate.arm(0, 5).unwrap();

        next_timer_event(&mut rx).await;
        gate.cancel();
        assert!(!gate.is_armed());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn can_rearm_after_cancel() {
        let (tx, mut rx) = mpsc::channel(64);
        let mut gate = TimerGate::new(tx);

        gate.arm(0, 5).unwrap();
        gate.cancel();
        gate.arm(1, 7).unwrap();

        assert_eq!(
            next_timer_event(&mut rx).await,
            TimerEvent::Tick { question: 1, remaining: 6 }
        );
    }
}
