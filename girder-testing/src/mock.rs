// Call-recording doubles for providers

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Records calls and hands out queued return values.
///
/// Clones share state, so a clone registered as a provider value can be
/// inspected from the test afterwards.
///
/// ```
/// use girder_testing::MockService;
///
/// let mock = MockService::<u32>::new().returning(7);
/// mock.record_call("find");
/// assert_eq!(mock.next_return(), Some(7));
/// assert!(mock.was_called("find"));
/// ```
#[derive(Debug)]
pub struct MockService<T> {
    calls: Arc<Mutex<Vec<String>>>,
    returns: Arc<Mutex<VecDeque<T>>>,
    fallback: Arc<Mutex<Option<T>>>,
}

impl<T> MockService<T> {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            returns: Arc::new(Mutex::new(VecDeque::new())),
            fallback: Arc::new(Mutex::new(None)),
        }
    }

    /// Value returned whenever the queue is empty
    pub fn returning(self, value: T) -> Self {
        *lock(&self.fallback) = Some(value);
        self
    }

    /// Queue a value for the next call only
    pub fn return_once(&self, value: T) {
        lock(&self.returns).push_back(value);
    }

    pub fn record_call(&self, method: &str) {
        lock(&self.calls).push(method.to_string());
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    pub fn was_called(&self, method: &str) -> bool {
        lock(&self.calls).iter().any(|call| call == method)
    }

    pub fn times_called(&self, method: &str) -> usize {
        lock(&self.calls).iter().filter(|call| *call == method).count()
    }

    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    pub fn next_return(&self) -> Option<T>
    where
        T: Clone,
    {
        lock(&self.returns)
            .pop_front()
            .or_else(|| lock(&self.fallback).clone())
    }
}

impl<T> Clone for MockService<T> {
    fn clone(&self) -> Self {
        Self {
            calls: self.calls.clone(),
            returns: self.returns.clone(),
            fallback: self.fallback.clone(),
        }
    }
}

impl<T> Default for MockService<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_calls() {
        let mock = MockService::<String>::new();
        let registered = mock.clone();
        registered.record_call("send");
        registered.record_call("send");

        assert_eq!(mock.call_count(), 2);
        assert_eq!(mock.times_called("send"), 2);
        assert!(!mock.was_called("receive"));
    }

    #[test]
    fn test_queued_returns_before_fallback() {
        let mock = MockService::new().returning(0);
        mock.return_once(1);
        mock.return_once(2);

        assert_eq!(mock.next_return(), Some(1));
        assert_eq!(mock.next_return(), Some(2));
        assert_eq!(mock.next_return(), Some(0));
    }
}
