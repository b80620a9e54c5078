//! Key-based serializer.
//!
//! Work that shares at least one key runs one-at-a-time, in enqueue order;
//! work with disjoint keys runs concurrently. Each key owns a FIFO of ticket
//! ids. A ticket is pushed onto all of its keys atomically, so every queue
//! agrees on the relative order of any two tickets and no cycle can form.
//! A ticket runs once it heads every one of its queues.

use std::{
    collections::{HashMap, VecDeque},
    future::Future,
    sync::{Arc, Mutex, MutexGuard},
};

use tokio::sync::oneshot;

#[derive(Default)]
struct Queues {
    next_ticket: u64,
    by_key: HashMap<String, VecDeque<u64>>,
    tickets: HashMap<u64, Ticket>,
}

struct Ticket {
    keys: Vec<String>,
    wake: Option<oneshot::Sender<()>>,
}

impl Queues {
    fn heads_all(&self, id: u64) -> bool {
        let Some(ticket) = self.tickets.get(&id) else {
            return false;
        };
        ticket
            .keys
            .iter()
            .all(|k| self.by_key.get(k).and_then(|q| q.front()) == Some(&id))
    }

    fn grant_if_ready(&mut self, id: u64) {
        if !self.heads_all(id) {
            return;
        }
        if let Some(wake) = self.tickets.get_mut(&id).and_then(|t| t.wake.take()) {
            // Receiver gone means the reservation is being dropped; its own
            // release will hand the keys on.
            let _ = wake.send(());
        }
    }

    fn release(&mut self, id: u64) {
        let Some(ticket) = self.tickets.remove(&id) else {
            return;
        };
        let mut next_heads = Vec::new();
        for key in &ticket.keys {
            let Some(queue) = self.by_key.get_mut(key) else {
                continue;
            };
            if let Some(pos) = queue.iter().position(|t| *t == id) {
                queue.remove(pos);
            }
            match queue.front() {
                Some(head) => next_heads.push(*head),
                None => {
                    self.by_key.remove(key);
                }
            }
        }
        for head in next_heads {
            self.grant_if_ready(head);
        }
    }
}

/// Mutual exclusion over arbitrary sets of string keys.
#[derive(Clone, Default)]
pub struct KeySerializer {
    queues: Arc<Mutex<Queues>>,
}

impl KeySerializer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Queues> {
        self.queues.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Take a place in line on every key without waiting.
    ///
    /// Keys are sorted and de-duplicated. The returned reservation keeps its
    /// place until it is acquired and released, or dropped.
    pub fn enqueue<I, K>(&self, keys: I) -> Reservation
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let mut keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        keys.sort();
        keys.dedup();

        let (tx, rx) = oneshot::channel();
        let mut q = self.lock();
        let id = q.next_ticket;
        q.next_ticket += 1;
        for key in &keys {
            q.by_key.entry(key.clone()).or_default().push_back(id);
        }
        q.tickets.insert(
            id,
            Ticket {
                keys,
                wake: Some(tx),
            },
        );
        q.grant_if_ready(id);
        drop(q);

        Reservation {
            wait: rx,
            release: Release {
                id,
                queues: Arc::clone(&self.queues),
            },
        }
    }

    pub async fn acquire<I, K>(&self, keys: I) -> KeyGuard
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.enqueue(keys).acquire().await
    }

    /// Run `body` while holding every key.
    pub async fn with_lock<I, K, F, Fut, T>(&self, keys: I, body: F) -> T
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _guard = self.acquire(keys).await;
        body().await
    }

    /// Number of keys with at least one queued or running ticket.
    pub fn active_keys(&self) -> usize {
        self.lock().by_key.len()
    }
}

struct Release {
    id: u64,
    queues: Arc<Mutex<Queues>>,
}

impl Drop for Release {
    fn drop(&mut self) {
        let mut q = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        q.release(self.id);
    }
}

/// A place in line that has not been granted yet.
pub struct Reservation {
    wait: oneshot::Receiver<()>,
    release: Release,
}

impl Reservation {
    /// Wait until this reservation heads every one of its key queues.
    pub async fn acquire(self) -> KeyGuard {
        let Reservation { wait, release } = self;
        // The sender lives in the ticket, which only our own `Release` removes,
        // so an error here cannot happen while `release` is alive.
        let _ = wait.await;
        KeyGuard { _release: release }
    }
}

/// Held keys; dropping it hands each key to the next waiter.
pub struct KeyGuard {
    _release: Release,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn shared_key_bodies_never_overlap() {
        let s = KeySerializer::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for i in 0..20 {
            let s = s.clone();
            let inside = inside.clone();
            let max_inside = max_inside.clone();
            // Every task shares "chat:-1"; half also share a user key.
            let user = format!("user:{}", i % 2);
            tasks.push(tokio::spawn(async move {
                let _g = s.acquire(["chat:-1".to_string(), user]).await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                tokio::task::yield_now().await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert_eq!(s.active_keys(), 0);
    }

    #[tokio::test]
    async fn disjoint_keys_do_not_wait() {
        let s = KeySerializer::new();
        let _held = s.acquire(["chat:-1", "user:1"]).await;

        let other = tokio::time::timeout(
            Duration::from_millis(50),
            s.acquire(["chat:-2", "user:2"]),
        )
        .await;
        assert!(other.is_ok(), "disjoint keys must proceed immediately");

        let blocked =
            tokio::time::timeout(Duration::from_millis(50), s.acquire(["user:1"])).await;
        assert!(blocked.is_err(), "overlapping key must wait");
    }

    #[tokio::test]
    async fn duplicate_keys_do_not_self_deadlock() {
        // Private chats: chat id == user id.
        let s = KeySerializer::new();
        let g = tokio::time::timeout(Duration::from_millis(50), s.acquire(["k", "k"])).await;
        assert!(g.is_ok());
    }

    #[tokio::test]
    async fn waiters_run_in_enqueue_order() {
        let s = KeySerializer::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = s.acquire(["chat:-1"]).await;
        let mut tasks = Vec::new();
        for i in 0..5 {
            let r = s.enqueue(["chat:-1", "user:1"]);
            let order = order.clone();
            tasks.push(tokio::spawn(async move {
                let _g = r.acquire().await;
                order.lock().unwrap().push(i);
            }));
        }
        drop(first);
        for t in tasks {
            t.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn dropped_reservation_hands_keys_on() {
        let s = KeySerializer::new();
        let held = s.acquire(["a"]).await;
        let abandoned = s.enqueue(["a", "b"]);
        let next = s.enqueue(["b"]);
        drop(abandoned);

        // "b" is free again once the abandoned ticket leaves the queue.
        let g = tokio::time::timeout(Duration::from_millis(50), next.acquire()).await;
        assert!(g.is_ok());
        drop(held);
    }

    #[tokio::test]
    async fn crossing_key_orders_do_not_deadlock() {
        let s = KeySerializer::new();
        let mut tasks = Vec::new();
        for i in 0..50 {
            let s = s.clone();
            let keys = if i % 2 == 0 { ["a", "b"] } else { ["b", "a"] };
            tasks.push(tokio::spawn(async move {
                s.with_lock(keys, tokio::task::yield_now).await
            }));
        }
        let all = async {
            for t in tasks {
                t.await.unwrap();
            }
        };
        assert!(tokio::time::timeout(Duration::from_secs(5), all)
            .await
            .is_ok());
    }
}
