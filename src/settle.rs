//! Asynchronous side effects and their settlement.
//!
//! Side effects started by a sync pass (fetching select items, ...) are
//! registered in the [`AsyncRegistry`] shared by the whole tree. A change is
//! only reported once the registry has been drained:
//!
//! 1. snapshot every registered operation,
//! 2. await them all,
//! 3. yield once so follow-up work can register,
//! 4. repeat until the registry is empty.
//!
//! Operations remove themselves when they complete. Results come back to the
//! tree through the [`Mailbox`].
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::{BoxFuture, FutureExt, Shared};
use indexmap::IndexMap;
use serde_json::Value;

pub type Operation = Shared<BoxFuture<'static, ()>>;

#[derive(Default)]
struct Ops {
    pending: IndexMap<String, Operation>,
    seq: u64,
}

#[derive(Clone, Default)]
pub struct AsyncRegistry {
    ops: Arc<Mutex<Ops>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl AsyncRegistry {
    pub fn new() -> Self { Self::default() }

    /// Register an operation under `<full_key>#<seq>` and return that key.
    ///
    /// Inside a tokio runtime the operation starts right away; otherwise it
    /// runs when the registry is drained.
    pub fn register<F>(&self, full_key: &str, fut: F) -> String
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let key = {
            let mut ops = lock(&self.ops);
            ops.seq += 1;
            format!("{full_key}#{}", ops.seq)
        };
        let registry = self.clone();
        let own_key = key.clone();
        let op = async move {
            fut.await;
            lock(&registry.ops).pending.shift_remove(&own_key);
        }
        .boxed()
        .shared();

        lock(&self.ops).pending.insert(key.clone(), op.clone());
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(op);
        }
        tracing::debug!(target: "schemaform::settle", key = %key, "registered");
        key
    }

    pub fn len(&self) -> usize { lock(&self.ops).pending.len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    pub fn keys(&self) -> Vec<String> { lock(&self.ops).pending.keys().cloned().collect() }

    fn snapshot(&self) -> Vec<Operation> { lock(&self.ops).pending.values().cloned().collect() }

    /// Await registered operations until none is left.
    pub async fn drain(&self) {
        loop {
            let ops = self.snapshot();
            if ops.is_empty() { break; }
            tracing::debug!(target: "schemaform::settle", pending = ops.len(), "draining");
            futures::future::join_all(ops).await;
            tokio::task::yield_now().await;
        }
    }
}

impl std::fmt::Debug for AsyncRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncRegistry").field("pending", &self.keys()).finish()
    }
}

// ——— MAILBOX ———

#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// an input queued while the tree was busy
    Input { full_key: String, value: Option<Value> },
    /// response body for a node's `x-fromUrl`
    Fetched { full_key: String, url: String, body: Value },
}

#[derive(Debug, Clone, Default)]
pub struct Mailbox(Arc<Mutex<VecDeque<Delivery>>>);

impl Mailbox {
    pub fn new() -> Self { Self::default() }

    pub fn push(&self, d: Delivery) { lock(&self.0).push_back(d); }

    pub fn queue_input(&self, full_key: impl Into<String>, value: Option<Value>) {
        self.push(Delivery::Input { full_key: full_key.into(), value });
    }

    pub fn take_inputs(&self) -> Vec<(String, Option<Value>)> {
        let mut q = lock(&self.0);
        let mut inputs = Vec::new();
        q.retain(|d| match d {
            Delivery::Input { full_key, value } => {
                inputs.push((full_key.clone(), value.clone()));
                false
            }
            _ => true,
        });
        inputs
    }

    pub fn take_fetched(&self) -> Vec<(String, String, Value)> {
        let mut q = lock(&self.0);
        let mut fetched = Vec::new();
        q.retain(|d| match d {
            Delivery::Fetched { full_key, url, body } => {
                fetched.push((full_key.clone(), url.clone(), body.clone()));
                false
            }
            _ => true,
        });
        fetched
    }

    pub fn is_empty(&self) -> bool { lock(&self.0).is_empty() }
}
