//! Monotonic per-agent timestamps
//!
//! Timestamps are strings of the form `YYYY-MM-DD-HH-MM-SS-NN`, where `NN`
//! is a per-second counter. Two timestamps issued by the same agent compare
//! correctly under plain lexicographic ordering, which is what anchors the
//! delta protocol. Timestamps double as element IDs wherever the domain
//! model needs a fresh ID.

use chrono::Local;
use std::sync::Mutex;

struct ClockState {
    last_time: String,
    counter: u32,
}

/// Thread-safe source of monotonic timestamps. One clock per process; all
/// connectors share it through the bus connector.
pub struct Clock {
    state: Mutex<ClockState>,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ClockState {
                last_time: String::new(),
                counter: 0,
            }),
        }
    }

    /// Issue the next timestamp. Strictly increasing under lexicographic
    /// comparison, even when issued repeatedly within one wall-clock second
    /// or when the wall clock steps backwards.
    pub fn now(&self) -> String {
        let time_part = Local::now().format("%Y-%m-%d-%H-%M-%S").to_string();

        let mut state = self.state.lock().unwrap();
        if time_part == state.last_time {
            state.counter += 1;
        } else if time_part > state.last_time {
            state.last_time = time_part;
            state.counter = 0;
        } else {
            // Wall clock stepped back; stay on the last second and keep counting.
            state.counter += 1;
        }

        format!("{}-{:02}", state.last_time, state.counter)
    }

    /// Issue a fresh agent-scoped element ID.
    pub fn new_id(&self, agent_id: &str) -> String {
        format!("{}-{}", agent_id, self.now())
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamps_strictly_increase() {
        let clock = Clock::new();
        let mut previous = clock.now();
        // Well more than one per second, so the counter path is exercised.
        for _ in 0..50 {
            let next = clock.now();
            assert!(next > previous, "{next} should sort after {previous}");
            previous = next;
        }
    }

    #[test]
    fn test_timestamp_shape() {
        let clock = Clock::new();
        let ts = clock.now();
        // YYYY-MM-DD-HH-MM-SS-NN
        let segments: Vec<&str> = ts.split('-').collect();
        assert_eq!(segments.len(), 7);
        assert_eq!(segments[0].len(), 4);
        for segment in &segments[1..] {
            assert_eq!(segment.len(), 2);
        }
    }

    #[test]
    fn test_new_id_carries_agent() {
        let clock = Clock::new();
        let id = clock.new_id("agent-a");
        assert!(id.starts_with("agent-a-"));
    }
}
