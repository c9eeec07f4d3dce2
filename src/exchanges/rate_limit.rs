use super::WeightBudget;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

const WINDOW_SECS: u64 = 60;

#[derive(Debug, Default)]
struct WeightWindow {
    /// Minute index the counters below belong to.
    window: u64,
    /// Last used weight reported by the venue for this minute.
    reported: u32,
    /// Weight of calls confirmed locally during this minute.
    computed: u32,
    /// Weight of calls registered but not finished yet.
    pending: u32,
}

impl WeightWindow {
    fn roll(&mut self, window: u64) {
        if window > self.window {
            self.window = window;
            self.reported = 0;
            self.computed = 0;
        }
    }

    fn used(&self) -> u32 {
        self.reported.max(self.computed).saturating_add(self.pending)
    }
}

/// Per-minute request weight tracker.
///
/// The venue reports the weight it has counted so far in each response; on
/// top of that every in-flight call holds a [`WeightRegistration`] so its
/// weight is accounted for before the response arrives.
#[derive(Debug)]
pub struct UsedWeightLimiter {
    max_usable_weight: u32,
    available_ratio: f64,
    state: Mutex<WeightWindow>,
}

impl UsedWeightLimiter {
    pub fn new(max_usable_weight: u32, available_ratio: f64) -> Arc<Self> {
        Arc::new(Self {
            max_usable_weight,
            available_ratio: available_ratio.clamp(0.0, 1.0),
            state: Mutex::new(WeightWindow {
                window: current_window(),
                ..WeightWindow::default()
            }),
        })
    }

    pub fn max_usable_weight(&self) -> u32 {
        self.max_usable_weight
    }

    /// Records the used weight the venue reported for the current minute.
    pub fn update_used_weight(&self, used: u32) {
        self.update_used_weight_at(used, current_window());
    }

    fn update_used_weight_at(&self, used: u32, window: u64) {
        let mut state = self.state.lock();
        state.roll(window);
        if window == state.window {
            state.reported = used;
        }
    }

    /// Accounts `weight` as pending until the returned guard is dropped.
    pub fn register(self: &Arc<Self>, weight: u32) -> WeightRegistration {
        let window = current_window();
        let mut state = self.state.lock();
        state.roll(window);
        state.pending = state.pending.saturating_add(weight);
        WeightRegistration {
            limiter: Arc::clone(self),
            weight,
            window,
            confirmed: false,
        }
    }

    pub fn used_weight(&self) -> u32 {
        self.used_weight_at(current_window())
    }

    fn used_weight_at(&self, window: u64) -> u32 {
        let mut state = self.state.lock();
        state.roll(window);
        state.used()
    }

    fn available_at(&self, window: u64) -> u32 {
        let budget = (self.max_usable_weight as f64 * self.available_ratio) as u32;
        budget.saturating_sub(self.used_weight_at(window))
    }

    fn release(&self, registration: &WeightRegistration) {
        let mut state = self.state.lock();
        state.roll(current_window());
        state.pending = state.pending.saturating_sub(registration.weight);
        if registration.confirmed && registration.window == state.window {
            state.computed = state.computed.saturating_add(registration.weight);
        }
    }
}

impl WeightBudget for UsedWeightLimiter {
    fn available_weight(&self) -> u32 {
        self.available_at(current_window())
    }
}

/// Pending weight of one in-flight call.
///
/// Dropping it unconfirmed (the request failed before reaching the venue)
/// gives the weight back; [`confirm`](Self::confirm) moves it into the
/// minute's used weight instead.
#[derive(Debug)]
pub struct WeightRegistration {
    limiter: Arc<UsedWeightLimiter>,
    weight: u32,
    window: u64,
    confirmed: bool,
}

impl WeightRegistration {
    pub fn weight(&self) -> u32 {
        self.weight
    }

    pub fn confirm(mut self) {
        self.confirmed = true;
    }
}

impl Drop for WeightRegistration {
    fn drop(&mut self) {
        self.limiter.release(self);
    }
}

fn current_window() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() / WINDOW_SECS)
        .unwrap_or_default()
}
