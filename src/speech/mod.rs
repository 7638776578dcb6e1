//! Speech Channel: single-utterance TTS playback with completion signals.
//!
//! Wraps a `Synthesizer` (Kokoro ONNX in production) and rodio playback.
//! At most one utterance is active at a time: starting a new one cancels
//! the previous, whose completion signal resolves as `Cancelled`. Every
//! `speak` resolves exactly once, even when the synthesizer fails.

pub mod kokoro;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, OutputStreamBuilder, Sink};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub const SAMPLE_RATE: u32 = 24_000;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How an utterance ended. `Failed` must be treated like `Completed` by
/// sequencing callers: a broken audio backend never blocks the quiz.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeakOutcome {
    Completed,
    Cancelled,
    Failed(String),
}

/// Resolves exactly once per utterance.
pub type CompletionSignal = oneshot::Receiver<SpeakOutcome>;

/// Text to 24 kHz mono f32 samples.
pub trait Synthesizer: Send + Sync {
    fn synthesize(&self, text: &str) -> Result<Vec<f32>, String>;
}

enum AudioOutput {
    Device(OutputStream),
    /// No audio hardware: playback is simulated by a cancellable, pausable
    /// timed wait so sequencing behaves identically.
    Mute,
}

struct ActiveUtterance {
    cancel: Arc<AtomicBool>,
    sink: Arc<Mutex<Option<Sink>>>,
    task: JoinHandle<()>,
}

pub struct SpeechChannel {
    synth: Option<Arc<dyn Synthesizer>>,
    output: AudioOutput,
    // Sticky: an utterance started while paused begins paused.
    paused: Arc<AtomicBool>,
    active: Mutex<Option<ActiveUtterance>>,
    mute_pace: Duration,
}

impl SpeechChannel {
    /// Open the default audio device for playback.
    pub fn with_device(synth: Arc<dyn Synthesizer>, mute_ms_per_char: u64) -> Result<Self, String> {
        let stream = OutputStreamBuilder::open_default_stream()
            .map_err(|e| format!("Failed to open audio output: {e}"))?;

        Ok(Self {
            synth: Some(synth),
            output: AudioOutput::Device(stream),
            paused: Arc::new(AtomicBool::new(false)),
            active: Mutex::new(None),
            mute_pace: Duration::from_millis(mute_ms_per_char),
        })
    }

    /// Silent channel. With a synthesizer, playback time follows the
    /// rendered sample count; without one, it is estimated from text length.
    pub fn muted(synth: Option<Arc<dyn Synthesizer>>, mute_ms_per_char: u64) -> Self {
        Self {
            synth,
            output: AudioOutput::Mute,
            paused: Arc::new(AtomicBool::new(false)),
            active: Mutex::new(None),
            mute_pace: Duration::from_millis(mute_ms_per_char),
        }
    }

    /// Cancel any in-flight utterance and begin a new one.
    pub fn speak(&self, text: &str) -> CompletionSignal {
        self.cancel();

        let (done_tx, done_rx) = oneshot::channel();

        let samples = match &self.synth {
            Some(synth) => match synth.synthesize(text) {
                Ok(samples) => Some(samples),
                Err(e) => {
                    warn!("Synthesis failed: {e}");
                    let _ = done_tx.send(SpeakOutcome::Failed(e));
                    return done_rx;
                }
            },
            None => None,
        };

        let cancel = Arc::new(AtomicBool::new(false));
        let sink_slot: Arc<Mutex<Option<Sink>>> = Arc::new(Mutex::new(None));
        let paused = self.paused.clone();

        let task = match &self.output {
            AudioOutput::Device(stream) => {
                let sink = Sink::connect_new(stream.mixer());
                if paused.load(Ordering::Relaxed) {
                    sink.pause();
                }
                sink.append(SamplesBuffer::new(1, SAMPLE_RATE, samples.unwrap_or_default()));
                *sink_slot.lock().unwrap() = Some(sink);

                tokio::spawn(watch_sink(sink_slot.clone(), cancel.clone(), done_tx))
            }
            AudioOutput::Mute => {
                let duration = match &samples {
                    Some(samples) => {
                        Duration::from_secs_f64(samples.len() as f64 / f64::from(SAMPLE_RATE))
                    }
                    None => self.mute_pace * text.chars().count() as u32,
                };
                debug!("Mute playback: {:.1}s for {} chars", duration.as_secs_f64(), text.chars().count());

                tokio::spawn(mute_playback(duration, cancel.clone(), paused, done_tx))
            }
        };

        *self.active.lock().unwrap() = Some(ActiveUtterance {
            cancel,
            sink: sink_slot,
            task,
        });

        done_rx
    }

    /// Stop the current utterance immediately; its signal resolves as
    /// `Cancelled`. No-op when idle.
    pub fn cancel(&self) {
        if let Some(active) = self.active.lock().unwrap().take() {
            active.cancel.store(true, Ordering::Relaxed);
            if let Some(sink) = active.sink.lock().unwrap().take() {
                sink.stop();
            }
            // The detached playback task sees the flag and resolves the
            // signal as Cancelled.
            drop(active.task);
        }
    }

    /// Suspend audio output without resolving the completion signal.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Relaxed);
        if let Some(active) = self.active.lock().unwrap().as_ref() {
            if let Some(sink) = active.sink.lock().unwrap().as_ref() {
                sink.pause();
            }
        }
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Relaxed);
        if let Some(active) = self.active.lock().unwrap().as_ref() {
            if let Some(sink) = active.sink.lock().unwrap().as_ref() {
                sink.play();
            }
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }
}

/// Poll the sink until playback drains or the utterance is cancelled.
async fn watch_sink(
    sink: Arc<Mutex<Option<Sink>>>,
    cancel: Arc<AtomicBool>,
    done: oneshot::Sender<SpeakOutcome>,
) {
    loop {
        if cancel.load(Ordering::Relaxed) {
            if let Some(sink) = sink.lock().unwrap().take() {
                sink.stop();
            }
            let _ = done.send(SpeakOutcome::Cancelled);
            return;
        }

        // A missing sink means cancel() already stopped and took it.
        let drained = match sink.lock().unwrap().as_ref() {
            Some(sink) => sink.empty(),
            None => {
                let _ = done.send(SpeakOutcome::Cancelled);
                return;
            }
        };

        if drained {
            let _ = done.send(SpeakOutcome::Completed);
            return;
        }

        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Simulated playback for the muted channel: waits out the utterance
/// duration in small slices, honouring cancel and pause.
async fn mute_playback(
    duration: Duration,
    cancel: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    done: oneshot::Sender<SpeakOutcome>,
) {
    let mut remaining = duration;
    while !remaining.is_zero() {
        if cancel.load(Ordering::Relaxed) {
            let _ = done.send(SpeakOutcome::Cancelled);
            return;
        }
        if !paused.load(Ordering::Relaxed) {
            remaining = remaining.saturating_sub(POLL_INTERVAL);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    let outcome = if cancel.load(Ordering::Relaxed) {
        SpeakOutcome::Cancelled
    } else {
        SpeakOutcome::Completed
    };
    let _ = done.send(outcome);
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSamples(usize);

    impl Synthesizer for FixedSamples {
        fn synthesize(&self, _text: &str) -> Result<Vec<f32>, String> {
            Ok(vec![0.0; self.0])
        }
    }

    struct BrokenSynth;

    impl Synthesizer for BrokenSynth {
        fn synthesize(&self, _text: &str) -> Result<Vec<f32>, String> {
            Err("model not loaded".into())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn utterance_completes_naturally() {
        let channel = SpeechChannel::muted(None, 100);
        let signal = channel.speak("hello");
        assert_eq!(signal.await.unwrap(), SpeakOutcome::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_resolves_pending_signal() {
        let channel = SpeechChannel::muted(None, 100);
        let signal = channel.speak("a much longer sentence to cancel");
        channel.cancel();
        assert_eq!(signal.await.unwrap(), SpeakOutcome::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn new_speak_cancels_previous_utterance() {
        let channel = SpeechChannel::muted(None, 100);
        let first = channel.speak("first utterance");
        let second = channel.speak("second");
        assert_eq!(first.await.unwrap(), SpeakOutcome::Cancelled);
        assert_eq!(second.await.unwrap(), SpeakOutcome::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn synthesis_error_fails_open() {
        let channel = SpeechChannel::muted(Some(Arc::new(BrokenSynth)), 100);
        let signal = channel.speak("anything");
        assert_eq!(
            signal.await.unwrap(),
            SpeakOutcome::Failed("model not loaded".into())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn synthesized_samples_set_playback_length() {
        // One second of samples at 24 kHz.
        let channel = SpeechChannel::muted(Some(Arc::new(FixedSamples(SAMPLE_RATE as usize))), 100);
        let signal = channel.speak("x");
        assert_eq!(signal.await.unwrap(), SpeakOutcome::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_holds_completion_until_resume() {
        let channel = SpeechChannel::muted(None, 100);
        let mut signal = channel.speak("short");
        channel.pause();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(signal.try_recv().is_err(), "paused utterance must not resolve");

        channel.resume();
        assert_eq!(signal.await.unwrap(), SpeakOutcome::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_is_sticky_across_utterances() {
        let channel = SpeechChannel::muted(None, 100);
        channel.pause();

        let mut signal = channel.speak("starts held");
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(signal.try_recv().is_err());

        channel.resume();
        assert_eq!(signal.await.unwrap(), SpeakOutcome::Completed);
    }
}
