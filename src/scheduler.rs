use std::collections::HashMap;
use std::sync::Mutex;

use tokio::task::JoinHandle;

/// Named, individually cancellable timer slots.
///
/// Each concern (status polling, QR polling, reconnect) owns exactly one
/// slot; replacing a slot aborts whatever occupied it before, so a loop
/// restarted with a new interval can never leak or double-fire. Cancelling
/// one slot never touches another.
pub struct Scheduler {
    slots: Mutex<HashMap<&'static str, JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Install `handle` under `name`, aborting any previous occupant.
    pub fn set(&self, name: &'static str, handle: JoinHandle<()>) {
        let previous = self
            .slots
            .lock()
            .expect("scheduler lock poisoned")
            .insert(name, handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Abort the named slot. Returns whether a task was actually cancelled.
    pub fn cancel(&self, name: &str) -> bool {
        let handle = self
            .slots
            .lock()
            .expect("scheduler lock poisoned")
            .remove(name);
        match handle {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Abort every slot synchronously.
    pub fn cancel_all(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut slots = self.slots.lock().expect("scheduler lock poisoned");
            slots.drain().map(|(_, handle)| handle).collect()
        };
        for handle in handles {
            handle.abort();
        }
    }

    pub fn is_scheduled(&self, name: &str) -> bool {
        self.slots
            .lock()
            .expect("scheduler lock poisoned")
            .get(name)
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn fire_after(flag: Arc<AtomicBool>, delay: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            flag.store(true, Ordering::SeqCst);
        })
    }

    #[tokio::test]
    async fn cancel_stops_the_named_task() {
        let scheduler = Scheduler::new();
        let fired = Arc::new(AtomicBool::new(false));
        scheduler.set("status", fire_after(fired.clone(), Duration::from_millis(20)));

        assert!(scheduler.cancel("status"));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!fired.load(Ordering::SeqCst));
        assert!(!scheduler.is_scheduled("status"));
    }

    #[tokio::test]
    async fn cancelling_one_slot_leaves_others_running() {
        let scheduler = Scheduler::new();
        let status_fired = Arc::new(AtomicBool::new(false));
        let qr_fired = Arc::new(AtomicBool::new(false));
        scheduler.set("status", fire_after(status_fired.clone(), Duration::from_millis(20)));
        scheduler.set("qr", fire_after(qr_fired.clone(), Duration::from_millis(20)));

        scheduler.cancel("status");
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!status_fired.load(Ordering::SeqCst));
        assert!(qr_fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn replacing_a_slot_aborts_the_previous_task() {
        let scheduler = Scheduler::new();
        let old_fired = Arc::new(AtomicBool::new(false));
        let new_fired = Arc::new(AtomicBool::new(false));
        scheduler.set("status", fire_after(old_fired.clone(), Duration::from_millis(20)));
        scheduler.set("status", fire_after(new_fired.clone(), Duration::from_millis(20)));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!old_fired.load(Ordering::SeqCst));
        assert!(new_fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn cancel_all_empties_every_slot() {
        let scheduler = Scheduler::new();
        let first = Arc::new(AtomicBool::new(false));
        let second = Arc::new(AtomicBool::new(false));
        scheduler.set("status", fire_after(first.clone(), Duration::from_millis(20)));
        scheduler.set("qr", fire_after(second.clone(), Duration::from_millis(20)));

        scheduler.cancel_all();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!first.load(Ordering::SeqCst));
        assert!(!second.load(Ordering::SeqCst));
        assert!(!scheduler.is_scheduled("status"));
        assert!(!scheduler.is_scheduled("qr"));
    }

    #[tokio::test]
    async fn cancel_unknown_slot_is_a_no_op() {
        let scheduler = Scheduler::new();
        assert!(!scheduler.cancel("reconnect"));
    }
}
