//! quiz-narrator-rs: spoken quiz playback for visually impaired quiz takers.

mod announce;
mod config;
mod input;
mod keys;
mod narration;
mod notifier;
mod provider;
mod quiz;
mod session;
mod speech;
mod timer;

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "quiz-narrator-rs", about = "Spoken quiz playback engine")]
struct Args {
    /// Path to config.yaml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Quiz id to fetch from the platform API
    #[arg(short, long, default_value = "demo")]
    quiz: String,

    /// Load the quiz from a local JSON file instead of the API
    #[arg(long)]
    quiz_file: Option<PathBuf>,

    /// Override the per-question countdown duration in seconds
    #[arg(short, long)]
    duration: Option<u32>,

    /// Run without audio output (narration is timed but silent)
    #[arg(long)]
    no_audio: bool,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging (suppress noisy ort internals)
    let filter = if args.verbose {
        EnvFilter::new("debug,ort=info")
    } else {
        EnvFilter::new("info,ort=warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("quiz-narrator-rs starting");

    // Load config
    let mut config = config::Config::load(args.config.as_deref());
    if let Some(secs) = args.duration {
        config.timer.duration_secs = secs;
    }
    info!(
        "Countdown: {}s per question, narration gap {}ms",
        config.timer.duration_secs, config.narration.gap_ms
    );

    // Build the speech channel: Kokoro over the default audio device when
    // available, a silent timed channel otherwise.
    let speech = if config.speech.enabled && !args.no_audio {
        info!("Loading Kokoro TTS model...");
        let loaded = tokio::task::spawn_blocking({
            let speech_config = config.speech.clone();
            move || speech::kokoro::KokoroSynthesizer::load(&speech_config)
        })
        .await?;

        match loaded {
            Ok(synth) => {
                match speech::SpeechChannel::with_device(
                    Arc::new(synth),
                    config.speech.mute_ms_per_char,
                ) {
                    Ok(channel) => channel,
                    Err(e) => {
                        warn!("{e}");
                        info!("Continuing without audio output");
                        speech::SpeechChannel::muted(None, config.speech.mute_ms_per_char)
                    }
                }
            }
            Err(e) => {
                warn!("Failed to load TTS model: {e}");
                info!("Continuing without voice output");
                speech::SpeechChannel::muted(None, config.speech.mute_ms_per_char)
            }
        }
    } else {
        speech::SpeechChannel::muted(None, config.speech.mute_ms_per_char)
    };
    let speech = Arc::new(speech);

    let notifier = notifier::Notifier::new(config.feedback.notifications);

    let api = Arc::new(provider::QuizApiClient::new(&config.api));
    let quiz_source: Arc<dyn provider::QuizProvider> = match &args.quiz_file {
        Some(path) => Arc::new(provider::FileQuizSource::new(path.clone())),
        None => api.clone(),
    };
    let sink: Arc<dyn provider::ResultSink> = if config.api.submit_results {
        api
    } else {
        Arc::new(provider::DiscardSink)
    };

    let (quiz_session, handle) = session::QuizSession::new(config, speech, notifier);

    // Keyboard listener feeds the session's event channel for the whole run
    let listener = keys::KeyboardListener::new(handle.events.clone());
    let listener_task = tokio::spawn(listener.run());

    // Ctrl-C ends the session cleanly, recording the open question as
    // unanswered before submitting what we have
    let quit_tx = handle.events.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = quit_tx
                .send(session::EngineEvent::Command(input::SessionCommand::Quit))
                .await;
        }
    });

    let summary = quiz_session.run(quiz_source, sink, &args.quiz).await?;
    info!(
        "Session complete: {}/{} on quiz '{}'",
        summary.score, summary.total, summary.quiz_id
    );

    listener_task.abort();
    Ok(())
}
