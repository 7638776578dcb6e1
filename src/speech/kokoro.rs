//! Kokoro TTS synthesis: text → phonemes → ONNX inference → f32 samples.
//!
//! Pipeline:
//! 1. Text → phonemes (misaki-rs G2P)
//! 2. Phonemes → token IDs (tokenizer.json vocabulary)
//! 3. Token IDs + voice style + speed → ONNX inference → f32 audio (24kHz)
//!
//! Playback and cancellation live in the Speech Channel; this module only
//! renders samples.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

use ndarray::{Array2, Array3};
use ndarray_npy::NpzReader;
use ort::value::Tensor;
use tracing::{debug, info};

use crate::config::SpeechConfig;
use crate::speech::{Synthesizer, SAMPLE_RATE};

const MAX_TOKENS: usize = 510; // Voice style array first dimension

pub struct KokoroSynthesizer {
    // ONNX model (Mutex because ort 2.0 Session::run needs &mut)
    session: Mutex<ort::session::Session>,

    // Phonemizer (misaki-rs G2P)
    phonemizer: misaki_rs::G2P,

    // Tokenizer vocabulary: char → token ID
    vocab: HashMap<char, i64>,

    // Style vectors for the configured voice, indexed by token count.
    // shape: (510, 256)
    styles: Array2<f32>,

    speed: f32,
}

impl KokoroSynthesizer {
    /// Load the ONNX model, tokenizer, configured voice, and phonemizer.
    /// This is blocking and should be called in spawn_blocking.
    pub fn load(config: &SpeechConfig) -> Result<Self, String> {
        let t0 = Instant::now();
        let base_dir = std::env::current_dir().unwrap_or_default();

        let model_path = if config.model_path.is_empty() {
            base_dir.join("kokoro-v1.0.onnx")
        } else {
            PathBuf::from(&config.model_path)
        };
        let voices_path = base_dir.join("voices-v1.0.bin");
        let tokenizer_path = base_dir.join("tokenizer.json");

        info!("Loading tokenizer from {}", tokenizer_path.display());
        let vocab = load_tokenizer(&tokenizer_path)?;
        info!("Tokenizer loaded: {} tokens", vocab.len());

        info!("Loading voice '{}' from {}", config.voice, voices_path.display());
        let styles = load_voice(&voices_path, &config.voice)?;

        info!("Loading ONNX model from {}", model_path.display());
        let session = ort::session::Session::builder()
            .map_err(|e| format!("Failed to create ONNX session builder: {e}"))?
            .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)
            .map_err(|e| format!("Failed to set optimization level: {e}"))?
            .with_intra_threads(4)
            .map_err(|e| format!("Failed to set thread count: {e}"))?
            .commit_from_file(&model_path)
            .map_err(|e| format!("Failed to load ONNX model: {e}"))?;

        let phonemizer = misaki_rs::G2P::new(misaki_rs::Language::EnglishUS);

        let load_ms = t0.elapsed().as_millis();
        info!("Kokoro TTS loaded in {load_ms}ms");

        Ok(Self {
            session: Mutex::new(session),
            phonemizer,
            vocab,
            styles,
            speed: config.speed,
        })
    }
}

impl Synthesizer for KokoroSynthesizer {
    fn synthesize(&self, text: &str) -> Result<Vec<f32>, String> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Vec::new());
        }

        // 1. Text → phonemes via misaki-rs G2P
        let (phonemes, _tokens) = self
            .phonemizer
            .g2p(text)
            .map_err(|e| format!("Phonemization failed: {e}"))?;

        if phonemes.is_empty() {
            return Ok(Vec::new());
        }

        // 2. Phonemes → token IDs
        let mut token_ids: Vec<i64> = Vec::with_capacity(phonemes.len() + 2);
        token_ids.push(0); // Start padding
        for ch in phonemes.chars() {
            if let Some(&id) = self.vocab.get(&ch) {
                token_ids.push(id);
            }
            // Skip unknown characters silently
        }
        token_ids.push(0); // End padding

        let n_tokens = token_ids.len().min(MAX_TOKENS);
        token_ids.truncate(n_tokens);

        // 3. Style vector for this token count (clamped to max)
        let style_idx = (n_tokens.saturating_sub(2)).min(self.styles.nrows() - 1);
        let style_vec: Vec<f32> = self.styles.row(style_idx).to_vec();

        // 4. Build ONNX input tensors
        let tokens_array = ndarray::Array2::from_shape_vec((1, n_tokens), token_ids)
            .map_err(|e| format!("Failed to create tokens tensor: {e}"))?;
        let tokens_tensor = Tensor::from_array(tokens_array)
            .map_err(|e| format!("Failed to create tokens ort tensor: {e}"))?;

        let style_array = ndarray::Array2::from_shape_vec((1, 256), style_vec)
            .map_err(|e| format!("Failed to create style tensor: {e}"))?;
        let style_tensor = Tensor::from_array(style_array)
            .map_err(|e| format!("Failed to create style ort tensor: {e}"))?;

        let speed_array = ndarray::Array1::from_vec(vec![self.speed]);
        let speed_tensor = Tensor::from_array(speed_array)
            .map_err(|e| format!("Failed to create speed ort tensor: {e}"))?;

        // 5. Run ONNX inference
        let mut session = self.session.lock().unwrap();
        let outputs = session
            .run(ort::inputs![
                "tokens" => tokens_tensor,
                "style" => style_tensor,
                "speed" => speed_tensor
            ])
            .map_err(|e| format!("ONNX inference failed: {e}"))?;

        // 6. Extract audio samples from output
        let first_output = outputs
            .iter()
            .next()
            .ok_or("No output tensor from model")?;

        let (_shape, audio_slice) = first_output
            .1
            .try_extract_tensor::<f32>()
            .map_err(|e| format!("Failed to extract audio tensor: {e}"))?;

        let samples: Vec<f32> = audio_slice.iter().copied().collect();
        debug!(
            "Synthesized {} samples ({:.1}s)",
            samples.len(),
            samples.len() as f32 / SAMPLE_RATE as f32
        );

        Ok(samples)
    }
}

// --- Helper functions ---

/// Load tokenizer vocabulary from tokenizer.json.
fn load_tokenizer(path: &Path) -> Result<HashMap<char, i64>, String> {
    let contents =
        fs::read_to_string(path).map_err(|e| format!("Failed to read tokenizer: {e}"))?;

    let data: serde_json::Value = serde_json::from_str(&contents)
        .map_err(|e| format!("Failed to parse tokenizer JSON: {e}"))?;

    let vocab = data["model"]["vocab"]
        .as_object()
        .ok_or("Missing model.vocab in tokenizer.json")?;

    let mut map = HashMap::new();
    for (token, id) in vocab {
        let id = id.as_i64().ok_or("Token ID is not an integer")?;
        // Each token should be a single character
        if let Some(ch) = token.chars().next() {
            map.insert(ch, id);
        }
    }

    Ok(map)
}

/// Load one voice's style array from the NPZ voices file.
fn load_voice(path: &Path, voice: &str) -> Result<Array2<f32>, String> {
    let file = fs::File::open(path).map_err(|e| format!("Failed to open voices file: {e}"))?;

    let mut npz =
        NpzReader::new(file).map_err(|e| format!("Failed to read NPZ voices file: {e}"))?;

    let arr: Array3<f32> = npz
        .by_name(&format!("{voice}.npy"))
        .map_err(|e| format!("Failed to read voice '{voice}': {e}"))?;

    // Shape is (510, 1, 256). Squeeze the middle dimension to (510, 256).
    let dim0 = arr.shape()[0];
    let dim2 = arr.shape()[2];
    arr.into_shape_with_order((dim0, dim2))
        .map_err(|e| format!("Failed to reshape voice '{voice}': {e}"))
}
