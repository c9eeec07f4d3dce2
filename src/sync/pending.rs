use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Queue {
    order: VecDeque<String>,
    members: HashSet<String>,
}

/// Symbols waiting for a REST resync.
///
/// Has its own lock, never taken together with a book lock. Each symbol is
/// queued at most once; insertion order is the service order.
#[derive(Debug, Default)]
pub struct PendingSet {
    queue: Mutex<Queue>,
    notify: Notify,
}

impl PendingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `symbol`. Returns false when it was already pending.
    pub fn schedule(&self, symbol: &str) -> bool {
        let len = {
            let mut queue = self.queue.lock();
            if !queue.members.insert(symbol.to_string()) {
                return false;
            }
            queue.order.push_back(symbol.to_string());
            queue.order.len()
        };
        metrics::gauge!("depthkeeper_pending_symbols").set(len as f64);
        self.notify.notify_one();
        true
    }

    /// Takes the oldest pending symbol. When that is `previous` and others
    /// are waiting, the next one is served instead so one failing symbol
    /// cannot starve the rest.
    pub fn pop_next(&self, previous: Option<&str>) -> Option<String> {
        let (symbol, len) = {
            let mut queue = self.queue.lock();
            let skip_front = queue.order.len() > 1
                && previous.is_some_and(|p| queue.order.front().is_some_and(|f| f == p));
            let symbol = queue.order.remove(usize::from(skip_front))?;
            queue.members.remove(&symbol);
            (symbol, queue.order.len())
        };
        metrics::gauge!("depthkeeper_pending_symbols").set(len as f64);
        Some(symbol)
    }

    pub fn remove(&self, symbol: &str) -> bool {
        let mut queue = self.queue.lock();
        if !queue.members.remove(symbol) {
            return false;
        }
        queue.order.retain(|s| s != symbol);
        metrics::gauge!("depthkeeper_pending_symbols").set(queue.order.len() as f64);
        true
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.queue.lock().members.contains(symbol)
    }

    pub fn len(&self) -> usize {
        self.queue.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pending symbols in service order.
    pub fn snapshot(&self) -> Vec<String> {
        self.queue.lock().order.iter().cloned().collect()
    }

    /// Resolves on the next [`schedule`](Self::schedule) of a new symbol, or
    /// immediately if one happened since the last wait.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn schedules_each_symbol_once() {
        let pending = PendingSet::new();
        assert!(pending.schedule("BTCUSDT"));
        assert!(!pending.schedule("BTCUSDT"));
        assert!(pending.schedule("ETHUSDT"));
        assert_eq!(pending.snapshot(), vec!["BTCUSDT", "ETHUSDT"]);
    }

    #[test]
    fn pops_in_insertion_order() {
        let pending = PendingSet::new();
        pending.schedule("A");
        pending.schedule("B");
        assert_eq!(pending.pop_next(None).as_deref(), Some("A"));
        assert_eq!(pending.pop_next(None).as_deref(), Some("B"));
        assert_eq!(pending.pop_next(None), None);
        assert!(pending.is_empty());
    }

    #[test]
    fn previous_symbol_yields_to_others() {
        let pending = PendingSet::new();
        pending.schedule("A");
        pending.schedule("B");
        assert_eq!(pending.pop_next(Some("A")).as_deref(), Some("B"));
        assert!(pending.contains("A"));
        // alone, it is served again
        assert_eq!(pending.pop_next(Some("A")).as_deref(), Some("A"));
    }

    #[test]
    fn remove_drops_queued_symbol() {
        let pending = PendingSet::new();
        pending.schedule("A");
        pending.schedule("B");
        assert!(pending.remove("A"));
        assert!(!pending.remove("A"));
        assert_eq!(pending.snapshot(), vec!["B"]);
    }

    #[tokio::test]
    async fn schedule_wakes_a_waiter() {
        let pending = Arc::new(PendingSet::new());
        let waiter = {
            let pending = Arc::clone(&pending);
            tokio::spawn(async move { pending.notified().await })
        };
        tokio::task::yield_now().await;
        pending.schedule("A");
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
