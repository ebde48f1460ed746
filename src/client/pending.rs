use std::collections::HashMap;

use tokio::sync::oneshot;
use tokio::task::AbortHandle;

use crate::{
    // ---
    Reply,
    Result,
    RpcError,
};

/// Completion callback for the callback form of a request.
pub(super) type ReplyCallback = Box<dyn FnOnce(Result<Reply>) + Send + 'static>;

/// How a pending request is completed.
pub(super) enum Waiter {
    // ---
    Future(oneshot::Sender<Result<Reply>>),
    Callback(ReplyCallback),
}

impl Waiter {
    // ---

    /// Deliver `outcome`. Consumes the waiter, so it fires at most once.
    pub fn fire(self, outcome: Result<Reply>) {
        // ---
        match self {
            // receiver gone means the caller stopped waiting
            Waiter::Future(tx) => {
                let _ = tx.send(outcome);
            }
            Waiter::Callback(callback) => callback(outcome),
        }
    }
}

/// One registered call.
///
/// `token` tells this registration apart from a later one under the same id
/// once ids wrap around.
struct Entry {
    // ---
    token: u64,
    waiter: Waiter,
    timer: Option<AbortHandle>,
}

impl Entry {
    // ---
    fn into_waiter(self) -> Waiter {
        // ---
        if let Some(timer) = self.timer {
            timer.abort();
        }
        self.waiter
    }
}

/// Tracks pending requests waiting for responses
///
/// Maps request ids to the waiter that completes the call. When a response
/// arrives, the entry is removed and the waiter fired with the outcome.
pub(super) struct PendingRequests {
    // ---
    requests: HashMap<u32, Entry>,
    next_token: u64,
}

impl PendingRequests {
    // ---

    /// Create a new empty pending requests tracker
    pub fn new() -> Self {
        // ---
        Self {
            requests: HashMap::new(),
            next_token: 0,
        }
    }

    /// Register a request awaited through a future
    ///
    /// Returns the entry token and a receiver that will be notified when the
    /// response arrives.
    pub fn register(&mut self, id: u32) -> (u64, oneshot::Receiver<Result<Reply>>) {
        // ---
        let (tx, rx) = oneshot::channel();
        (self.insert(id, Waiter::Future(tx)), rx)
    }

    /// Register a request completed through a callback
    pub fn register_callback(&mut self, id: u32, callback: ReplyCallback) -> u64 {
        // ---
        self.insert(id, Waiter::Callback(callback))
    }

    fn insert(&mut self, id: u32, waiter: Waiter) -> u64 {
        // ---
        let token = self.next_token;
        self.next_token += 1;

        let entry = Entry {
            token,
            waiter,
            timer: None,
        };

        // only reachable after 2^32 ids with the oldest call still unanswered
        if let Some(stale) = self.requests.insert(id, entry) {
            crate::log_warn!("request id {id} reused while still pending; failing the old call");
            stale.into_waiter().fire(Err(RpcError::ConnectionClosed));
        }
        token
    }

    /// Tie a timeout task to the entry registered as (`id`, `token`)
    ///
    /// The task is aborted when the entry is completed or removed. Hands the
    /// handle back if that entry no longer exists.
    pub fn attach_timer(&mut self, id: u32, token: u64, timer: AbortHandle) -> Option<AbortHandle> {
        // ---
        match self.requests.get_mut(&id) {
            Some(entry) if entry.token == token => {
                entry.timer = Some(timer);
                None
            }
            _ => Some(timer),
        }
    }

    /// Take the waiter for `id`, if any
    ///
    /// The caller fires it outside the table lock.
    pub fn take(&mut self, id: u32) -> Option<Waiter> {
        // ---
        self.requests.remove(&id).map(Entry::into_waiter)
    }

    /// Take the waiter for `id` only if it is still the registration `token`
    ///
    /// Used by the timeout task of that registration.
    pub fn take_expired(&mut self, id: u32, token: u64) -> Option<Waiter> {
        // ---
        match self.requests.get(&id) {
            Some(entry) if entry.token == token => {
                self.requests.remove(&id).map(|entry| entry.waiter)
            }
            _ => None,
        }
    }

    /// Remove a pending request without delivering a response
    ///
    /// Only removes the registration `token`; a newer call that reused the
    /// id is left alone. Used for cancellation and write-failure cleanup.
    pub fn remove(&mut self, id: u32, token: u64) -> bool {
        // ---
        match self.requests.get(&id) {
            Some(entry) if entry.token == token => {
                self.take(id);
                true
            }
            _ => false,
        }
    }

    /// Take every waiter, leaving the table empty
    pub fn drain(&mut self) -> Vec<Waiter> {
        // ---
        self.requests
            .drain()
            .map(|(_, entry)| entry.into_waiter())
            .collect()
    }

    /// Get the number of pending requests
    pub fn len(&self) -> usize {
        // ---
        self.requests.len()
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::Value;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn reply(id: u32) -> Result<Reply> {
        Ok(Reply {
            id,
            result: Value::from("ok"),
        })
    }

    #[test]
    fn test_register_and_complete() {
        // ---
        let mut pending = PendingRequests::new();

        let (_, rx) = pending.register(7);
        assert_eq!(pending.len(), 1);

        let waiter = pending.take(7).expect("entry registered");
        waiter.fire(reply(7));

        // Should be removed after completion
        assert_eq!(pending.len(), 0);

        // Receiver should get the response
        let received = rx.blocking_recv().unwrap().unwrap();
        assert_eq!(received.id, 7);
        assert_eq!(received.result, Value::from("ok"));
    }

    #[test]
    fn test_callback_fires_once() {
        // ---
        let mut pending = PendingRequests::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        let _token = pending.register_callback(
            3,
            Box::new(move |outcome| sink.lock().unwrap().push(outcome.unwrap().id)),
        );

        pending.take(3).unwrap().fire(reply(3));
        assert!(pending.take(3).is_none());
        assert_eq!(*seen.lock().unwrap(), vec![3]);
    }

    #[test]
    fn test_remove() {
        // ---
        let mut pending = PendingRequests::new();

        let (token, _rx) = pending.register(1);
        assert_eq!(pending.len(), 1);

        assert!(pending.remove(1, token));
        assert_eq!(pending.len(), 0);

        // Second remove should return false
        assert!(!pending.remove(1, token));
    }

    #[test]
    fn test_take_unknown_id() {
        // ---
        let mut pending = PendingRequests::new();
        let (_, _rx) = pending.register(1);

        assert!(pending.take(2).is_none());
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn test_drain_empties_table() {
        // ---
        let mut pending = PendingRequests::new();
        let (_, first) = pending.register(1);
        let (_, second) = pending.register(2);

        for waiter in pending.drain() {
            waiter.fire(Err(RpcError::ConnectionClosed));
        }

        assert_eq!(pending.len(), 0);
        assert!(matches!(
            first.blocking_recv().unwrap(),
            Err(RpcError::ConnectionClosed)
        ));
        assert!(matches!(
            second.blocking_recv().unwrap(),
            Err(RpcError::ConnectionClosed)
        ));
    }

    #[test]
    fn test_reused_id_fails_stale_call() {
        // ---
        let mut pending = PendingRequests::new();
        let (_, stale) = pending.register(9);
        let (_, _fresh) = pending.register(9);

        assert_eq!(pending.len(), 1);
        assert!(matches!(
            stale.blocking_recv().unwrap(),
            Err(RpcError::ConnectionClosed)
        ));
    }

    #[test]
    fn test_stale_token_leaves_newer_entry() {
        // ---
        let mut pending = PendingRequests::new();
        let (stale_token, _stale) = pending.register(9);
        let (fresh_token, fresh) = pending.register(9);

        // cleanup for the old call must not evict the new one
        assert!(!pending.remove(9, stale_token));
        assert!(pending.take_expired(9, stale_token).is_none());
        assert_eq!(pending.len(), 1);

        pending.take(9).unwrap().fire(reply(9));
        assert_eq!(fresh.blocking_recv().unwrap().unwrap().id, 9);
        assert!(!pending.remove(9, fresh_token));
    }

    #[tokio::test]
    async fn test_completion_cancels_timer() {
        // ---
        let mut pending = PendingRequests::new();
        let token = pending.register_callback(5, Box::new(|_| {}));

        let timer = tokio::spawn(tokio::time::sleep(Duration::from_secs(60)));
        assert!(pending.attach_timer(5, token, timer.abort_handle()).is_none());

        pending.take(5).unwrap().fire(reply(5));
        assert!(timer.await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_timer_for_finished_call_is_handed_back() {
        // ---
        let mut pending = PendingRequests::new();
        let token = pending.register_callback(5, Box::new(|_| {}));
        pending.take(5).unwrap().fire(reply(5));

        let timer = tokio::spawn(tokio::time::sleep(Duration::from_secs(60)));
        let handle = pending
            .attach_timer(5, token, timer.abort_handle())
            .expect("no entry to attach to");
        handle.abort();
        assert!(timer.await.unwrap_err().is_cancelled());
    }
}
