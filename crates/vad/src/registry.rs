//! Process-wide model registry
//!
//! Model instances are expensive to build, so handlers receive shared
//! references out of a lazily-initialized registry instead of owning
//! their own copies. Teardown is explicit; sessions never drop the last
//! reference mid-inference.

use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::scorer::SpeechScorer;
use crate::stopword::SpeechToText;
use crate::Result;

/// Shared model instances, lazily constructed
#[derive(Default)]
pub struct ModelRegistry {
    vad: Mutex<Option<Arc<dyn SpeechScorer>>>,
    stt: Mutex<Option<Arc<dyn SpeechToText>>>,
}

static REGISTRY: OnceLock<ModelRegistry> = OnceLock::new();

impl ModelRegistry {
    /// The process-wide registry
    pub fn global() -> &'static ModelRegistry {
        REGISTRY.get_or_init(ModelRegistry::default)
    }

    /// Get the shared VAD scorer, building it on first use
    pub fn vad_or_init<F>(&self, init: F) -> Result<Arc<dyn SpeechScorer>>
    where
        F: FnOnce() -> Result<Arc<dyn SpeechScorer>>,
    {
        let mut slot = self.vad.lock();
        if let Some(model) = slot.as_ref() {
            return Ok(model.clone());
        }
        let model = init()?;
        warm_up(model.as_ref());
        *slot = Some(model.clone());
        Ok(model)
    }

    /// Get the shared stopword STT, building it on first use
    pub fn stt_or_init<F>(&self, init: F) -> Result<Arc<dyn SpeechToText>>
    where
        F: FnOnce() -> Result<Arc<dyn SpeechToText>>,
    {
        let mut slot = self.stt.lock();
        if let Some(model) = slot.as_ref() {
            return Ok(model.clone());
        }
        let model = init()?;
        *slot = Some(model.clone());
        Ok(model)
    }

    /// Drop the shared instances; the next access re-initializes
    pub fn teardown(&self) {
        self.vad.lock().take();
        self.stt.lock().take();
        tracing::debug!("model registry torn down");
    }
}

/// Run a few silent windows through a fresh scorer so the first real
/// utterance does not pay first-inference latency.
fn warm_up(scorer: &dyn SpeechScorer) {
    tracing::info!("warming up VAD model");
    let dummy = vec![0.0f32; 16000];
    for _ in 0..5 {
        if let Err(e) = scorer.score_windows(&dummy, 1024) {
            tracing::warn!("VAD warm-up failed: {}", e);
            return;
        }
    }
    tracing::info!("VAD model warmed up");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scorer::EnergyScorer;

    #[test]
    fn test_init_once_then_shared() {
        let registry = ModelRegistry::default();
        let first = registry
            .vad_or_init(|| Ok(Arc::new(EnergyScorer::default())))
            .unwrap();
        let second = registry
            .vad_or_init(|| panic!("should not re-initialize"))
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_teardown_allows_reinit() {
        let registry = ModelRegistry::default();
        registry
            .vad_or_init(|| Ok(Arc::new(EnergyScorer::default())))
            .unwrap();
        registry.teardown();
        let mut called = false;
        registry
            .vad_or_init(|| {
                called = true;
                Ok(Arc::new(EnergyScorer::default()))
            })
            .unwrap();
        assert!(called);
    }
}
