use crate::models::settings::ExtractionSettings;

/// Tuning values for the in-page stabilization loop. The defaults (3 unchanged
/// steps, 15 attempts, 500ms between steps) are empirical; they bound the
/// worst-case preparation latency while giving slow pages several chances to
/// settle.
#[derive(Debug, Clone, Copy)]
pub struct StabilizePolicy {
    pub stable_steps_required: u32,
    pub max_scroll_attempts: u32,
    pub step_delay_ms: u64,
}

impl Default for StabilizePolicy {
    fn default() -> Self {
        Self {
            stable_steps_required: 3,
            max_scroll_attempts: 15,
            step_delay_ms: 500,
        }
    }
}

impl From<&ExtractionSettings> for StabilizePolicy {
    fn from(settings: &ExtractionSettings) -> Self {
        Self {
            stable_steps_required: settings.stable_steps_required,
            max_scroll_attempts: settings.max_scroll_attempts,
            step_delay_ms: settings.step_delay_ms,
        }
    }
}

/// Number of evenly spaced scroll offsets spanning the document: one per
/// third of a viewport, never fewer than ten.
pub fn scroll_step_count(page_height: f64, viewport_height: f64) -> u32 {
    if viewport_height <= 0.0 {
        return 10;
    }
    let steps = (page_height / (viewport_height / 3.0)).ceil() as u32;
    steps.max(10)
}

/// Host-side model of the readiness decision the prepare payload makes after
/// every scroll step. The payload embeds the same policy numbers, so this is
/// the single place the heuristic's semantics live in Rust.
#[derive(Debug)]
pub struct StabilityTracker {
    policy: StabilizePolicy,
    attempts: u32,
    stable_streak: u32,
    last_count: Option<u32>,
}

impl StabilityTracker {
    pub fn new(policy: StabilizePolicy) -> Self {
        Self {
            policy,
            attempts: 0,
            stable_streak: 0,
            last_count: None,
        }
    }

    /// Feed the resolved-image count observed after one scroll step. Returns
    /// true once the page should be declared ready: either the count held
    /// steady for the required streak, or the attempt budget ran out.
    pub fn observe(&mut self, resolved_images: u32) -> bool {
        self.attempts += 1;
        match self.last_count {
            Some(previous) if previous == resolved_images => self.stable_streak += 1,
            _ => {
                self.stable_streak = 0;
                self.last_count = Some(resolved_images);
            }
        }
        self.stable_streak >= self.policy.stable_steps_required
            || self.attempts >= self.policy.max_scroll_attempts
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}
