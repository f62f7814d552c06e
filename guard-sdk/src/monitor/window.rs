//! Bounded window of recent outcomes

use std::collections::VecDeque;

/// Most-recent-N outcomes (true = success, false = failure)
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    capacity: usize,
    results: VecDeque<bool>,
    failure_count: usize,
}

impl SlidingWindow {
    /// Creates a new window holding at most `capacity` outcomes
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            results: VecDeque::with_capacity(capacity),
            failure_count: 0,
        }
    }

    /// Adds an outcome, evicting the oldest one when full
    pub fn push(&mut self, success: bool) {
        if self.capacity == 0 {
            return;
        }

        if self.results.len() >= self.capacity {
            if let Some(false) = self.results.pop_front() {
                self.failure_count -= 1;
            }
        }

        self.results.push_back(success);
        if !success {
            self.failure_count += 1;
        }
    }

    /// Failures over window length; 0.0 when empty
    pub fn failure_rate(&self) -> f64 {
        if self.results.is_empty() {
            0.0
        } else {
            self.failure_count as f64 / self.results.len() as f64
        }
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn failure_count(&self) -> usize {
        self.failure_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_window_rate_is_zero() {
        let window = SlidingWindow::new(10);
        assert!(window.is_empty());
        assert_eq!(window.failure_rate(), 0.0);
    }

    #[test]
    fn test_window_never_exceeds_capacity() {
        let mut window = SlidingWindow::new(10);
        for i in 0..25 {
            window.push(i % 3 != 0);
            assert!(window.len() <= 10);
        }
        assert_eq!(window.len(), 10);
    }

    #[test]
    fn test_rate_reflects_only_recent_outcomes() {
        let mut window = SlidingWindow::new(4);
        for _ in 0..4 {
            window.push(false);
        }
        assert_eq!(window.failure_rate(), 1.0);

        // push out the failures one by one
        window.push(true);
        window.push(true);
        assert_eq!(window.failure_rate(), 0.5);
        window.push(true);
        window.push(true);
        assert_eq!(window.failure_rate(), 0.0);
        assert_eq!(window.failure_count(), 0);
    }
}
