//! Silero VAD inference via ONNX Runtime
//!
//! Wraps the silero_vad.onnx recurrent model. The LSTM state is local to
//! one `score_windows` call: each invocation scores an independent chunk,
//! so calls from different sessions can share one loaded model.

use std::path::Path;

use ndarray::{arr0, Array2, Array3, Ix3};
use ort::{GraphOptimizationLevel, Session};
use parking_lot::Mutex;

use crate::scorer::SpeechScorer;
use crate::{Result, VadError, VAD_SAMPLE_RATE};

/// ONNX-backed Silero VAD model
pub struct SileroVad {
    session: Mutex<Session>,
}

impl SileroVad {
    /// Load the model from an .onnx file
    pub fn new(model_path: impl AsRef<Path>) -> Result<Self> {
        let path = model_path.as_ref();
        let session = Session::builder()
            .map_err(|e| VadError::Model(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| VadError::Model(e.to_string()))?
            .with_intra_threads(1)
            .map_err(|e| VadError::Model(e.to_string()))?
            .commit_from_file(path)
            .map_err(|e| VadError::Model(format!("failed to load {}: {}", path.display(), e)))?;

        tracing::info!("Silero VAD loaded from {}", path.display());
        Ok(Self {
            session: Mutex::new(session),
        })
    }

    /// Run one window through the model, threading the recurrent state
    fn run_window(
        &self,
        window: &[f32],
        h: &mut Array3<f32>,
        c: &mut Array3<f32>,
    ) -> Result<f32> {
        let input = Array2::from_shape_vec((1, window.len()), window.to_vec())
            .map_err(|e| VadError::Model(e.to_string()))?;
        let sr = arr0(VAD_SAMPLE_RATE as i64);

        let session = self.session.lock();
        let outputs = session
            .run(
                ort::inputs![
                    "input" => input.view(),
                    "sr" => sr.view(),
                    "h" => h.view(),
                    "c" => c.view(),
                ]
                .map_err(|e| VadError::Model(e.to_string()))?,
            )
            .map_err(|e| VadError::Model(format!("inference failed: {}", e)))?;

        let prob = outputs
            .get("output")
            .ok_or_else(|| VadError::Model("missing output tensor".into()))?
            .try_extract_tensor::<f32>()
            .map_err(|e| VadError::Model(e.to_string()))?
            .iter()
            .next()
            .copied()
            .unwrap_or(0.0);

        *h = extract_state(outputs.get("hn"), "hn")?;
        *c = extract_state(outputs.get("cn"), "cn")?;

        Ok(prob)
    }
}

fn extract_state(value: Option<&ort::DynValue>, name: &str) -> Result<Array3<f32>> {
    value
        .ok_or_else(|| VadError::Model(format!("missing {} tensor", name)))?
        .try_extract_tensor::<f32>()
        .map_err(|e| VadError::Model(e.to_string()))?
        .to_owned()
        .into_dimensionality::<Ix3>()
        .map_err(|e| VadError::Model(e.to_string()))
}

impl SpeechScorer for SileroVad {
    fn score_windows(&self, audio: &[f32], window_size: usize) -> Result<Vec<f32>> {
        let window_size = window_size.max(1);
        let mut h = Array3::<f32>::zeros((2, 1, 64));
        let mut c = Array3::<f32>::zeros((2, 1, 64));

        let mut probs = Vec::with_capacity(audio.len() / window_size + 1);
        for chunk in audio.chunks(window_size) {
            let prob = if chunk.len() == window_size {
                self.run_window(chunk, &mut h, &mut c)?
            } else {
                let mut padded = chunk.to_vec();
                padded.resize(window_size, 0.0);
                self.run_window(&padded, &mut h, &mut c)?
            };
            probs.push(prob);
        }
        Ok(probs)
    }
}
