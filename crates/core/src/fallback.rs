//! Fallback accounting.
//!
//! A [`FallbackCounter`] belongs to one capability client. It only ever goes
//! up. Consumers take a [`FallbackProbe`] before an operation and ask it
//! afterwards whether a substitute was used.

use serde::Serialize;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use tracing::warn;

/// The external functions that have an offline substitute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Transcription,
    Generation,
    Speech,
    Motion,
    Embedding,
}

impl Capability {
    pub fn as_str(self) -> &'static str {
        match self {
            Capability::Transcription => "transcription",
            Capability::Generation => "generation",
            Capability::Speech => "speech",
            Capability::Motion => "motion",
            Capability::Embedding => "embedding",
        }
    }
}

/// Process-wide fallback totals, shared by every session's clients.
#[derive(Debug, Default)]
pub struct FallbackTotals {
    transcription: AtomicU64,
    generation: AtomicU64,
    speech: AtomicU64,
    motion: AtomicU64,
    embedding: AtomicU64,
}

/// Serializable view of [`FallbackTotals`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FallbackSummary {
    pub transcription: u64,
    pub generation: u64,
    pub speech: u64,
    pub motion: u64,
    pub embedding: u64,
}

impl FallbackTotals {
    fn slot(&self, capability: Capability) -> &AtomicU64 {
        match capability {
            Capability::Transcription => &self.transcription,
            Capability::Generation => &self.generation,
            Capability::Speech => &self.speech,
            Capability::Motion => &self.motion,
            Capability::Embedding => &self.embedding,
        }
    }

    pub fn get(&self, capability: Capability) -> u64 {
        self.slot(capability).load(Ordering::Relaxed)
    }

    pub fn summary(&self) -> FallbackSummary {
        FallbackSummary {
            transcription: self.get(Capability::Transcription),
            generation: self.get(Capability::Generation),
            speech: self.get(Capability::Speech),
            motion: self.get(Capability::Motion),
            embedding: self.get(Capability::Embedding),
        }
    }
}

/// Monotonic count of substitutions made by one capability client.
///
/// Clones share the same count, so a client handed to a background task still
/// reports into the counter its owner is probing.
#[derive(Debug, Clone)]
pub struct FallbackCounter {
    capability: Capability,
    local: Arc<AtomicU64>,
    totals: Option<Arc<FallbackTotals>>,
}

impl FallbackCounter {
    /// A counter that is not aggregated anywhere else.
    pub fn new(capability: Capability) -> Self {
        Self {
            capability,
            local: Arc::new(AtomicU64::new(0)),
            totals: None,
        }
    }

    /// A counter whose increments are mirrored into process-wide totals.
    pub fn with_totals(capability: Capability, totals: Arc<FallbackTotals>) -> Self {
        Self {
            capability,
            local: Arc::new(AtomicU64::new(0)),
            totals: Some(totals),
        }
    }

    pub fn capability(&self) -> Capability {
        self.capability
    }

    pub fn get(&self) -> u64 {
        self.local.load(Ordering::Relaxed)
    }

    /// Records one substitution and logs why the primary path was abandoned.
    pub fn record(&self, reason: &dyn std::fmt::Display) {
        self.local.fetch_add(1, Ordering::Relaxed);
        if let Some(totals) = &self.totals {
            totals.slot(self.capability).fetch_add(1, Ordering::Relaxed);
        }
        warn!(
            capability = self.capability.as_str(),
            fallback = true,
            reason = %reason,
            "Primary provider unavailable, using offline fallback"
        );
    }

    /// Captures the current count so a later call can detect degradation.
    pub fn probe(&self) -> FallbackProbe {
        FallbackProbe {
            local: self.local.clone(),
            start: self.get(),
        }
    }
}

/// A snapshot of a [`FallbackCounter`] taken before an operation.
#[derive(Debug, Clone)]
pub struct FallbackProbe {
    local: Arc<AtomicU64>,
    start: u64,
}

impl FallbackProbe {
    /// Whether any substitution happened since the probe was taken.
    pub fn used(&self) -> bool {
        self.local.load(Ordering::Relaxed) > self.start
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_detects_new_fallbacks_only() {
        let counter = FallbackCounter::new(Capability::Speech);
        counter.record(&"earlier failure");

        let probe = counter.probe();
        assert!(!probe.used());

        counter.record(&"provider down");
        assert!(probe.used());
        assert_eq!(counter.get(), 2);
    }

    #[test]
    fn test_clones_share_the_count() {
        let counter = FallbackCounter::new(Capability::Generation);
        let probe = counter.probe();
        let clone = counter.clone();
        clone.record(&"timeout");
        assert!(probe.used());
        assert_eq!(counter.get(), 1);
    }

    #[test]
    fn test_totals_aggregate_across_counters() {
        let totals = Arc::new(FallbackTotals::default());
        let first = FallbackCounter::with_totals(Capability::Embedding, totals.clone());
        let second = FallbackCounter::with_totals(Capability::Embedding, totals.clone());

        first.record(&"a");
        second.record(&"b");
        second.record(&"c");

        assert_eq!(first.get(), 1);
        assert_eq!(second.get(), 2);
        assert_eq!(totals.summary().embedding, 3);
        assert_eq!(totals.summary().motion, 0);
    }
}
