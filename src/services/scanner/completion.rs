//! Debounced end-of-scan detection.

/// Declares a scan finished after a run of consecutive idle observations.
///
/// A single idle poll is not enough: a worker may have taken the last
/// candidate off the queue and not yet published its verdict. Any busy
/// observation resets the run.
#[derive(Debug, Clone)]
pub struct CompletionDetector {
    required: u32,
    streak: u32,
}

impl CompletionDetector {
    pub fn new(required: u32) -> Self {
        Self {
            required: required.max(1),
            streak: 0,
        }
    }

    /// Record one poll. Returns `true` once the run reaches the required length.
    pub fn observe(&mut self, idle: bool) -> bool {
        if idle {
            self.streak = self.streak.saturating_add(1);
        } else {
            self.streak = 0;
        }
        self.is_complete()
    }

    pub fn is_complete(&self) -> bool {
        self.streak >= self.required
    }

    pub fn streak(&self) -> u32 {
        self.streak
    }
}
