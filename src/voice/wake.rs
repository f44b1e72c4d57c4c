//! Wake trigger detection
//!
//! Evaluates a rolling, exponentially smoothed audio-frame score against a
//! threshold and emits a boolean edge when it crosses. The smoothing state is
//! reset after every edge so one utterance produces exactly one trigger.

/// Smoothing factor for the rolling score (higher = slower to react)
const SMOOTHING: f32 = 0.5;

/// RMS level mapped to a full score of 1.0
const REFERENCE_LEVEL: f32 = 0.08;

/// Detects the wake trigger in audio frames
pub struct WakeWordDetector {
    threshold: f32,
    score: f32,
    triggered: bool,
}

impl WakeWordDetector {
    /// Create a detector with the given threshold (0.0-1.0)
    #[must_use]
    pub fn new(threshold: f32) -> Self {
        tracing::debug!(threshold, "wake trigger initialized");
        Self {
            threshold,
            score: 0.0,
            triggered: false,
        }
    }

    /// Process one audio frame and check for the wake edge
    ///
    /// Returns true exactly once per crossing; call [`reset`](Self::reset)
    /// before listening for the next trigger.
    pub fn process(&mut self, frame: &[i16]) -> bool {
        let level = (rms(frame) / REFERENCE_LEVEL).min(1.0);
        self.score = SMOOTHING.mul_add(self.score, (1.0 - SMOOTHING) * level);

        if self.triggered {
            return false;
        }

        if self.score >= self.threshold {
            tracing::debug!(score = self.score, "wake trigger fired");
            self.triggered = true;
            return true;
        }

        false
    }

    /// Clear the smoothing state for the next detection cycle
    pub fn reset(&mut self) {
        self.score = 0.0;
        self.triggered = false;
    }

    /// Current rolling score (diagnostics)
    #[must_use]
    pub const fn score(&self) -> f32 {
        self.score
    }
}

/// Normalized RMS energy of int16 samples (0.0-1.0)
#[allow(clippy::cast_precision_loss)]
fn rms(frame: &[i16]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = frame
        .iter()
        .map(|&s| {
            let f = f32::from(s) / 32768.0;
            f * f
        })
        .sum();
    (sum_squares / frame.len() as f32).sqrt()
}
