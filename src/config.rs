//! Configuration management for quiz-narrator-rs.
//!
//! Loads config from YAML files in standard locations. Every section has
//! defaults so the engine runs with no config file at all.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    pub enabled: bool,
    pub voice: String,
    pub speed: f32,
    pub model_path: String,
    /// Pacing for silent playback: how long one character of text "takes"
    /// when no audio device or model is available.
    pub mute_ms_per_char: u64,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            voice: "af_heart".into(),
            speed: 1.0,
            model_path: String::new(),
            mute_ms_per_char: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NarrationConfig {
    /// Quiet interval between consecutive read-outs, for comprehension pacing.
    pub gap_ms: u64,
    /// How long the correct/incorrect announcement plays before the next
    /// question starts.
    pub feedback_delay_ms: u64,
}

impl Default for NarrationConfig {
    fn default() -> Self {
        Self {
            gap_ms: 500,
            feedback_delay_ms: 2500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    pub duration_secs: u32,
    /// Whether repeating narration after the countdown started resumes the
    /// held countdown (true) or re-arms it at the full duration (false).
    pub preserve_on_repeat: bool,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            duration_secs: 30,
            preserve_on_repeat: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub submit_results: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8780".into(),
            submit_results: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    pub notifications: bool,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            notifications: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub speech: SpeechConfig,
    pub narration: NarrationConfig,
    pub timer: TimerConfig,
    pub api: ApiConfig,
    pub feedback: FeedbackConfig,
}

impl Config {
    /// Load configuration from YAML file.
    ///
    /// Searches standard locations if no path is provided:
    /// 1. ./config.yaml
    /// 2. ~/.config/quiz-narrator/config.yaml
    /// 3. /etc/quiz-narrator/config.yaml
    pub fn load(path: Option<&Path>) -> Self {
        let resolved = path.map(PathBuf::from).or_else(|| {
            let candidates = [
                std::env::current_dir().ok().map(|d| d.join("config.yaml")),
                dirs::home_dir().map(|h| h.join(".config/quiz-narrator/config.yaml")),
                Some(PathBuf::from("/etc/quiz-narrator/config.yaml")),
            ];
            candidates.into_iter().flatten().find(|p| p.exists())
        });

        let Some(config_path) = resolved else {
            info!("No config file found, using defaults");
            return Self::default();
        };

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match serde_yml::from_str(&contents) {
                Ok(config) => {
                    info!("Loaded config from {}", config_path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {e}, using defaults", config_path.display());
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {e}, using defaults", config_path.display());
                Self::default()
            }
        }
    }
}
