//! Scripted [`DeliveryApi`] for coordinator tests.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Semaphore;

use super::{ApiError, DeliveryApi, FilterMode, NewDelivery};

type Reply = Result<Vec<Value>, ApiError>;

struct ScriptedState {
    replies: Mutex<Vec<Reply>>,
    calls: AtomicUsize,
    filters: Mutex<Vec<FilterMode>>,
    submitted: Mutex<Vec<NewDelivery>>,
    gate: Option<Semaphore>,
}

/// Returns queued replies in order, repeating the last one once exhausted.
///
/// When gated, each fetch blocks until [`ScriptedApi::release`] hands out a
/// permit, which lets tests hold a cycle in flight.
#[derive(Clone)]
pub(crate) struct ScriptedApi {
    state: Arc<ScriptedState>,
}

impl ScriptedApi {
    pub(crate) fn new(replies: Vec<Reply>) -> Self {
        Self::build(replies, None)
    }

    pub(crate) fn gated(replies: Vec<Reply>) -> Self {
        Self::build(replies, Some(Semaphore::new(0)))
    }

    fn build(replies: Vec<Reply>, gate: Option<Semaphore>) -> Self {
        assert!(!replies.is_empty(), "ScriptedApi needs at least one reply");
        Self {
            state: Arc::new(ScriptedState {
                replies: Mutex::new(replies),
                calls: AtomicUsize::new(0),
                filters: Mutex::new(Vec::new()),
                submitted: Mutex::new(Vec::new()),
                gate,
            }),
        }
    }

    /// Append a reply to the script.
    pub(crate) fn push(&self, reply: Reply) {
        self.state.replies.lock().push(reply);
    }

    pub(crate) fn release(&self, permits: usize) {
        if let Some(gate) = &self.state.gate {
            gate.add_permits(permits);
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.state.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn filters(&self) -> Vec<FilterMode> {
        self.state.filters.lock().clone()
    }

    pub(crate) fn submitted(&self) -> Vec<NewDelivery> {
        self.state.submitted.lock().clone()
    }

    /// Wait until at least `n` fetches have started.
    pub(crate) async fn wait_for_calls(&self, n: usize) {
        while self.calls() < n {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl DeliveryApi for ScriptedApi {
    async fn fetch_deliveries(&self, filter_mode: FilterMode) -> Result<Vec<Value>, ApiError> {
        let index = self.state.calls.fetch_add(1, Ordering::SeqCst);
        self.state.filters.lock().push(filter_mode);

        if let Some(gate) = &self.state.gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|e| ApiError::Transport(e.to_string()))?;
            permit.forget();
        }

        let replies = self.state.replies.lock();
        let idx = index.min(replies.len() - 1);
        replies[idx].clone()
    }

    async fn submit_delivery(&self, delivery: &NewDelivery) -> Result<(), ApiError> {
        self.state.submitted.lock().push(delivery.clone());
        Ok(())
    }
}
