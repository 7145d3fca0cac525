use std::collections::HashMap;

/// Named run-scoped counters with read-then-increment semantics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Counter {
    values: HashMap<String, u64>,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of `name` (starting at 0), then advance it.
    pub fn get_then_increment(&mut self, name: &str) -> u64 {
        let value = self.values.entry(name.to_string()).or_insert(0);
        let current = *value;
        *value += 1;
        current
    }

    pub fn peek(&self, name: &str) -> u64 {
        self.values.get(name).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_then_increment() {
        let mut counter = Counter::new();
        assert_eq!(counter.get_then_increment("counter"), 0);
        assert_eq!(counter.get_then_increment("counter"), 1);
        assert_eq!(counter.get_then_increment("other"), 0);
        assert_eq!(counter.peek("counter"), 2);
    }

    #[test]
    fn test_snapshot_restores() {
        let mut counter = Counter::new();
        counter.get_then_increment("counter");
        let snapshot = counter.clone();
        counter.get_then_increment("counter");
        counter = snapshot;
        assert_eq!(counter.get_then_increment("counter"), 1);
    }
}
