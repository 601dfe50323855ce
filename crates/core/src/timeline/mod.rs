use std::{
    collections::{BTreeMap, BTreeSet},
    thread,
    time::{Duration, Instant},
};

/// Identifies one render loop registered with a [`Scheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LoopId(u64);

/// A single requested "next refresh" invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameToken {
    loop_id: LoopId,
    serial: u64,
}

impl FrameToken {
    pub fn loop_id(&self) -> LoopId {
        self.loop_id
    }
}

/// Cooperative refresh scheduler. Every loop has at most one pending frame
/// request; [`Scheduler::take_due`] hands out all pending requests once per
/// display refresh.
#[derive(Debug, Default)]
pub struct Scheduler {
    next_loop: u64,
    next_serial: u64,
    pending: BTreeMap<LoopId, u64>,
    resize_listeners: BTreeSet<LoopId>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_loop(&mut self) -> LoopId {
        self.next_loop += 1;
        LoopId(self.next_loop)
    }

    /// Requests one invocation on the next refresh, replacing any request the
    /// loop already had pending.
    pub fn request_frame(&mut self, loop_id: LoopId) -> FrameToken {
        self.next_serial += 1;
        self.pending.insert(loop_id, self.next_serial);
        FrameToken {
            loop_id,
            serial: self.next_serial,
        }
    }

    /// Returns `true` if the token was still pending.
    pub fn cancel_frame(&mut self, token: FrameToken) -> bool {
        if self.is_pending(token) {
            self.pending.remove(&token.loop_id);
            true
        } else {
            false
        }
    }

    pub fn is_pending(&self, token: FrameToken) -> bool {
        self.pending.get(&token.loop_id) == Some(&token.serial)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Drains every pending request, in loop registration order.
    pub fn take_due(&mut self) -> Vec<FrameToken> {
        std::mem::take(&mut self.pending)
            .into_iter()
            .map(|(loop_id, serial)| FrameToken { loop_id, serial })
            .collect()
    }

    pub fn observe_resize(&mut self, loop_id: LoopId) {
        self.resize_listeners.insert(loop_id);
    }

    pub fn unobserve_resize(&mut self, loop_id: LoopId) {
        self.resize_listeners.remove(&loop_id);
    }

    pub fn is_observing_resize(&self, loop_id: LoopId) -> bool {
        self.resize_listeners.contains(&loop_id)
    }
}

/// Fixed-rate refresh source for native hosts without a vsync callback.
#[derive(Debug, Clone)]
pub struct FrameClock {
    interval: Duration,
    started: Instant,
    next_deadline: Instant,
    frames: u64,
}

impl FrameClock {
    pub fn new(refresh_rate: u32) -> Self {
        let interval = Duration::from_nanos(1_000_000_000 / u64::from(refresh_rate.max(1)));
        let now = Instant::now();
        Self {
            interval,
            started: now,
            next_deadline: now + interval,
            frames: 0,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Blocks until the next refresh. Missed refreshes are skipped rather
    /// than replayed in a burst.
    pub fn wait_next(&mut self) {
        let now = Instant::now();
        if self.next_deadline > now {
            thread::sleep(self.next_deadline - now);
            self.next_deadline += self.interval;
        } else {
            self.next_deadline = now + self.interval;
        }
        self.frames += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_pending_request_per_loop() {
        let mut scheduler = Scheduler::new();
        let id = scheduler.register_loop();
        let first = scheduler.request_frame(id);
        let second = scheduler.request_frame(id);

        assert_eq!(scheduler.pending_count(), 1);
        assert!(!scheduler.is_pending(first));
        assert!(scheduler.is_pending(second));
    }

    #[test]
    fn cancelled_frames_are_not_dispatched() {
        let mut scheduler = Scheduler::new();
        let a = scheduler.register_loop();
        let b = scheduler.register_loop();
        let token_a = scheduler.request_frame(a);
        let token_b = scheduler.request_frame(b);

        assert!(scheduler.cancel_frame(token_a));
        assert!(!scheduler.cancel_frame(token_a));

        let due = scheduler.take_due();
        assert_eq!(due, vec![token_b]);
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[test]
    fn stale_token_cannot_cancel_newer_request() {
        let mut scheduler = Scheduler::new();
        let id = scheduler.register_loop();
        let old = scheduler.request_frame(id);
        let new = scheduler.request_frame(id);
        assert!(!scheduler.cancel_frame(old));
        assert!(scheduler.is_pending(new));
    }

    #[test]
    fn tracks_resize_listeners() {
        let mut scheduler = Scheduler::new();
        let id = scheduler.register_loop();
        scheduler.observe_resize(id);
        assert!(scheduler.is_observing_resize(id));
        scheduler.unobserve_resize(id);
        scheduler.unobserve_resize(id);
        assert!(!scheduler.is_observing_resize(id));
    }

    #[test]
    fn clock_counts_frames() {
        let mut clock = FrameClock::new(1_000);
        assert_eq!(clock.interval(), Duration::from_millis(1));
        clock.wait_next();
        clock.wait_next();
        assert_eq!(clock.frames(), 2);
        assert!(clock.elapsed() >= Duration::from_millis(1));
    }
}
