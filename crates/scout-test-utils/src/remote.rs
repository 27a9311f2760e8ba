//! A remote authority with scripted failures.
//!
//! [`ScriptedRemote`] forwards to a [`MemoryRemote`] unless told otherwise:
//! per-key transport failures (persistent or one-shot), credential
//! rejection, pull failures and a pause switch that holds pushes until
//! resumed. Every push attempt is recorded, along with the highest number of
//! pushes seen in flight at once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use scout_core::key::NaturalKey;
use scout_sync::remote::{
    Credential, MemoryRemote, Mutation, PullCursor, PushAck, RemoteAuthority, RemoteDelta,
    RemoteError,
};
use tokio::sync::{Notify, watch};

#[derive(Debug, Default)]
struct Script {
    failing_keys: HashMap<NaturalKey, RemoteError>,
    failing_once: HashMap<NaturalKey, RemoteError>,
    reject_credentials: Option<String>,
    pull_error: Option<RemoteError>,
}

/// Remote authority wrapper with failure injection.
#[derive(Debug)]
pub struct ScriptedRemote {
    inner: Arc<MemoryRemote>,
    script: Mutex<Script>,
    attempts: Mutex<Vec<Mutation>>,
    attempted: Notify,
    paused: watch::Sender<bool>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Default for ScriptedRemote {
    fn default() -> Self {
        Self::new(Arc::new(MemoryRemote::new()))
    }
}

impl ScriptedRemote {
    /// Wraps `inner`.
    pub fn new(inner: Arc<MemoryRemote>) -> Self {
        Self {
            inner,
            script: Mutex::new(Script::default()),
            attempts: Mutex::new(Vec::new()),
            attempted: Notify::new(),
            paused: watch::channel(false).0,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Makes pushes of `key` fail with a transport error until healed.
    pub fn fail_key(&self, key: &NaturalKey) {
        self.fail_key_with(key, RemoteError::transport("connection reset by peer"));
    }

    /// Makes pushes of `key` fail with `error` until healed.
    pub fn fail_key_with(&self, key: &NaturalKey, error: RemoteError) {
        self.script
            .lock()
            .unwrap()
            .failing_keys
            .insert(key.clone(), error);
    }

    /// Makes the next push of `key` fail with a transport error.
    pub fn fail_key_once(&self, key: &NaturalKey) {
        self.script
            .lock()
            .unwrap()
            .failing_once
            .insert(key.clone(), RemoteError::transport("connection reset by peer"));
    }

    /// Rejects every credential with `message` until healed.
    pub fn reject_credentials(&self, message: impl Into<String>) {
        self.script.lock().unwrap().reject_credentials = Some(message.into());
    }

    /// Makes pulls fail with `error` until healed.
    pub fn fail_pulls(&self, error: RemoteError) {
        self.script.lock().unwrap().pull_error = Some(error);
    }

    /// Removes every injected failure.
    pub fn heal(&self) {
        *self.script.lock().unwrap() = Script::default();
    }

    /// Holds pushes after they are recorded, until [`ScriptedRemote::resume`].
    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    /// Releases held pushes.
    pub fn resume(&self) {
        self.paused.send_replace(false);
    }

    /// Returns every push attempt in arrival order.
    pub fn attempts(&self) -> Vec<Mutation> {
        self.attempts.lock().unwrap().clone()
    }

    /// Returns the keys of every push attempt in arrival order.
    pub fn attempted_keys(&self) -> Vec<NaturalKey> {
        self.attempts().into_iter().map(|m| m.key).collect()
    }

    /// Returns the highest number of pushes in flight at once.
    pub fn max_concurrent_pushes(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Waits until at least `count` push attempts have arrived.
    pub async fn wait_for_attempts(&self, count: usize) {
        loop {
            let notified = self.attempted.notified();
            if self.attempts.lock().unwrap().len() >= count {
                return;
            }
            notified.await;
        }
    }

    fn check_credentials(&self) -> Result<(), RemoteError> {
        match &self.script.lock().unwrap().reject_credentials {
            Some(message) => Err(RemoteError::unauthorized(message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteAuthority for ScriptedRemote {
    async fn push(
        &self,
        credential: &Credential,
        mutation: &Mutation,
    ) -> Result<PushAck, RemoteError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlightGuard(&self.in_flight);
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        self.attempts.lock().unwrap().push(mutation.clone());
        self.attempted.notify_waiters();

        let mut paused = self.paused.subscribe();
        let _ = paused.wait_for(|p| !*p).await;

        self.check_credentials()?;
        let failure = {
            let mut script = self.script.lock().unwrap();
            script
                .failing_once
                .remove(&mutation.key)
                .or_else(|| script.failing_keys.get(&mutation.key).cloned())
        };
        if let Some(err) = failure {
            return Err(err);
        }
        self.inner.push(credential, mutation).await
    }

    async fn pull(
        &self,
        credential: &Credential,
        since: PullCursor,
    ) -> Result<RemoteDelta, RemoteError> {
        self.check_credentials()?;
        let failure = self.script.lock().unwrap().pull_error.clone();
        if let Some(err) = failure {
            return Err(err);
        }
        self.inner.pull(credential, since).await
    }
}
