//! Checkpoint store. Creates, restores, and finishes checkpoints.
//!
//! Wraps a [`CheckpointBackend`] with the lifecycle rules:
//!
//! - creation supersedes the thread's previous `active` checkpoint in the
//!   same backend operation, and creations for one thread are serialized so
//!   iteration numbers never collide;
//! - restore puts collaborator state back before marking the checkpoint
//!   `restored`, and refuses terminal checkpoints;
//! - completion is idempotent.

use agentloom_core::checkpoint::{
    Checkpoint, CheckpointBackend, CheckpointReason, CheckpointStatus, StateProvider,
    StateSnapshot,
};
use agentloom_core::error::{CheckpointError, Result};
use agentloom_core::event::{DomainEvent, EventBus};
use agentloom_core::thread::ThreadId;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

/// Terminal result recorded by [`CheckpointStore::complete`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointOutcome {
    Completed,
    Failed,
}

impl CheckpointOutcome {
    fn status(self) -> CheckpointStatus {
        match self {
            Self::Completed => CheckpointStatus::Completed,
            Self::Failed => CheckpointStatus::Failed,
        }
    }
}

pub struct CheckpointStore {
    backend: Arc<dyn CheckpointBackend>,
    providers: Vec<Arc<dyn StateProvider>>,
    event_bus: Option<Arc<EventBus>>,
    /// Per-thread write locks, held only while some caller is using them.
    locks: ThreadLocks,
}

type ThreadLocks = StdMutex<HashMap<ThreadId, Arc<Mutex<()>>>>;

/// Exclusive hold on one thread's checkpoint writes.
///
/// Dropping it releases the lock and removes the map entry once no other
/// caller holds or waits on it.
struct ThreadGuard<'a> {
    locks: &'a ThreadLocks,
    thread_id: ThreadId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ThreadGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(&self.thread_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.thread_id);
        }
    }
}

impl CheckpointStore {
    pub fn new(backend: Arc<dyn CheckpointBackend>) -> Self {
        Self {
            backend,
            providers: Vec::new(),
            event_bus: None,
            locks: StdMutex::new(HashMap::new()),
        }
    }

    /// Add a collaborator whose state is captured and restored with each checkpoint.
    pub fn with_provider(mut self, provider: Arc<dyn StateProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    async fn lock_thread(&self, thread_id: &ThreadId) -> ThreadGuard<'_> {
        // Built before waiting so a caller dropped mid-wait still cleans up
        let mut held = ThreadGuard {
            locks: &self.locks,
            thread_id: thread_id.clone(),
            guard: None,
        };
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(thread_id.clone()).or_default().clone()
        };
        held.guard = Some(lock.lock_owned().await);
        held
    }

    /// Fill the collaborator parts of `snapshot` from the registered providers.
    async fn capture_collaborators(&self, snapshot: &mut StateSnapshot) -> Result<()> {
        for provider in &self.providers {
            let refs = provider.snapshot().await?;
            snapshot.set_refs(provider.kind(), refs);
        }
        Ok(())
    }

    /// Iteration the thread's next checkpoint must carry. Call with the
    /// thread lock held.
    async fn next_iteration(&self, thread_id: &ThreadId) -> Result<u32> {
        Ok(self
            .backend
            .latest_for_thread(thread_id)
            .await?
            .map_or(1, |latest| latest.iteration + 1))
    }

    async fn insert(&self, checkpoint: Checkpoint) -> Result<Checkpoint> {
        let superseded = self.backend.insert_superseding(checkpoint.clone()).await?;
        if !superseded.is_empty() {
            debug!(
                thread_id = %checkpoint.thread_id,
                superseded = ?superseded,
                "Superseded previous checkpoint"
            );
        }
        info!(
            thread_id = %checkpoint.thread_id,
            checkpoint_id = %checkpoint.id,
            iteration = checkpoint.iteration,
            reason = checkpoint.reason.as_str(),
            backend = self.backend.name(),
            "Checkpoint created"
        );

        if let Some(bus) = &self.event_bus {
            bus.publish(DomainEvent::CheckpointCreated {
                thread_id: checkpoint.thread_id.to_string(),
                checkpoint_id: checkpoint.id.clone(),
                iteration: checkpoint.iteration,
                reason: checkpoint.reason.as_str().into(),
                superseded: superseded.len(),
                timestamp: Utc::now(),
            });
        }
        Ok(checkpoint)
    }

    /// Persist a new `active` checkpoint with an explicit iteration.
    ///
    /// `iteration` must be one past the thread's latest checkpoint (1 for a
    /// thread with none); anything else fails with
    /// [`CheckpointError::IterationOutOfOrder`].
    pub async fn create(
        &self,
        thread_id: &ThreadId,
        iteration: u32,
        next_task: &str,
        reason: CheckpointReason,
        mut snapshot: StateSnapshot,
    ) -> Result<String> {
        let _guard = self.lock_thread(thread_id).await;

        let expected = self.next_iteration(thread_id).await?;
        if iteration != expected {
            return Err(CheckpointError::IterationOutOfOrder {
                thread_id: thread_id.to_string(),
                iteration,
                expected,
            }
            .into());
        }
        self.capture_collaborators(&mut snapshot).await?;
        let checkpoint = Checkpoint::new(thread_id.clone(), iteration, next_task, reason, snapshot);
        Ok(self.insert(checkpoint).await?.id)
    }

    /// Persist a new `active` checkpoint numbered one past the thread's
    /// latest, or 1 for a thread with none.
    pub async fn create_next(
        &self,
        thread_id: &ThreadId,
        next_task: &str,
        reason: CheckpointReason,
        mut snapshot: StateSnapshot,
    ) -> Result<Checkpoint> {
        let _guard = self.lock_thread(thread_id).await;

        let iteration = self.next_iteration(thread_id).await?;
        self.capture_collaborators(&mut snapshot).await?;
        let checkpoint = Checkpoint::new(thread_id.clone(), iteration, next_task, reason, snapshot);
        self.insert(checkpoint).await
    }

    pub async fn get(&self, checkpoint_id: &str) -> Result<Option<Checkpoint>> {
        self.backend.get(checkpoint_id).await
    }

    async fn require(&self, checkpoint_id: &str) -> Result<Checkpoint> {
        self.backend
            .get(checkpoint_id)
            .await?
            .ok_or_else(|| CheckpointError::NotFound(checkpoint_id.to_string()).into())
    }

    /// Every checkpoint of a thread, oldest iteration first.
    pub async fn list(&self, thread_id: &ThreadId) -> Result<Vec<Checkpoint>> {
        self.backend.list_for_thread(thread_id).await
    }

    /// Restore collaborator state from a checkpoint, then mark it `restored`.
    pub async fn restore(&self, checkpoint_id: &str) -> Result<Checkpoint> {
        let thread_id = self.require(checkpoint_id).await?.thread_id;
        let _guard = self.lock_thread(&thread_id).await;

        let mut checkpoint = self.require(checkpoint_id).await?;
        if checkpoint.status.is_terminal() {
            return Err(CheckpointError::AlreadyTerminal {
                id: checkpoint.id,
                status: checkpoint.status.to_string(),
            }
            .into());
        }
        if checkpoint.status == CheckpointStatus::Superseded {
            warn!(
                checkpoint_id,
                thread_id = %checkpoint.thread_id,
                "Restoring a superseded checkpoint"
            );
        }

        for provider in &self.providers {
            provider
                .restore(checkpoint.snapshot.refs(provider.kind()))
                .await?;
        }

        checkpoint.status = CheckpointStatus::Restored;
        checkpoint.restored_at = Some(Utc::now());
        self.backend.update(&checkpoint).await?;
        info!(
            checkpoint_id,
            thread_id = %checkpoint.thread_id,
            iteration = checkpoint.iteration,
            "Checkpoint restored"
        );
        Ok(checkpoint)
    }

    /// Record the terminal result of the run resumed from a checkpoint.
    ///
    /// A checkpoint that is already `completed` or `failed` is returned
    /// unchanged.
    pub async fn complete(
        &self,
        checkpoint_id: &str,
        outcome: CheckpointOutcome,
        error: Option<String>,
    ) -> Result<Checkpoint> {
        let thread_id = self.require(checkpoint_id).await?.thread_id;
        let _guard = self.lock_thread(&thread_id).await;

        let mut checkpoint = self.require(checkpoint_id).await?;
        if checkpoint.status.is_terminal() {
            debug!(checkpoint_id, status = %checkpoint.status, "Checkpoint already finished");
            return Ok(checkpoint);
        }

        checkpoint.status = outcome.status();
        checkpoint.completed_at = Some(Utc::now());
        checkpoint.error = error;
        self.backend.update(&checkpoint).await?;
        info!(checkpoint_id, status = %checkpoint.status, "Checkpoint finished");
        Ok(checkpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentloom_core::checkpoint::{StateKind, StateRef};
    use agentloom_core::error::Error;
    use agentloom_core::message::Message;
    use agentloom_store::InMemoryStore;
    use async_trait::async_trait;

    fn store() -> CheckpointStore {
        CheckpointStore::new(Arc::new(InMemoryStore::new()))
    }

    fn snapshot(text: &str) -> StateSnapshot {
        StateSnapshot {
            message_history: vec![Message::user(text)],
            ..StateSnapshot::default()
        }
    }

    /// Records restore calls and hands out a fixed snapshot.
    struct FakeBeads {
        restored: StdMutex<Vec<Vec<StateRef>>>,
    }

    #[async_trait]
    impl StateProvider for FakeBeads {
        fn kind(&self) -> StateKind {
            StateKind::Beads
        }

        async fn snapshot(&self) -> std::result::Result<Vec<StateRef>, Error> {
            Ok(vec![StateRef {
                key: "bead-1".into(),
                content_hash: "h1".into(),
                size: 1,
                content: Some("open".into()),
            }])
        }

        async fn restore(&self, refs: &[StateRef]) -> std::result::Result<(), Error> {
            self.restored.lock().unwrap().push(refs.to_vec());
            Ok(())
        }
    }

    #[tokio::test]
    async fn second_checkpoint_supersedes_first() {
        let store = store();
        let thread = ThreadId::from("th_sup");
        let c1 = store
            .create(&thread, 1, "task", CheckpointReason::Timeout, snapshot("a"))
            .await
            .unwrap();
        let c2 = store
            .create(&thread, 2, "task", CheckpointReason::Timeout, snapshot("b"))
            .await
            .unwrap();

        let all = store.list(&thread).await.unwrap();
        let active: Vec<&str> = all
            .iter()
            .filter(|c| c.status == CheckpointStatus::Active)
            .map(|c| c.id.as_str())
            .collect();
        assert_eq!(active, vec![c2.as_str()]);
        let first = store.get(&c1).await.unwrap().unwrap();
        assert_eq!(first.status, CheckpointStatus::Superseded);
    }

    #[tokio::test]
    async fn create_next_numbers_iterations() {
        let store = store();
        let thread = ThreadId::from("th_iter");
        let first = store
            .create_next(&thread, "t", CheckpointReason::Timeout, snapshot("a"))
            .await
            .unwrap();
        let second = store
            .create_next(&thread, "t", CheckpointReason::Timeout, snapshot("b"))
            .await
            .unwrap();
        assert_eq!(first.iteration, 1);
        assert_eq!(second.iteration, 2);
    }

    #[tokio::test]
    async fn create_rejects_out_of_order_iterations() {
        let store = store();
        let thread = ThreadId::from("th_order");
        let err = store
            .create(&thread, 5, "t", CheckpointReason::Timeout, snapshot("a"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Checkpoint(CheckpointError::IterationOutOfOrder {
                iteration: 5,
                expected: 1,
                ..
            })
        ));

        let first = store
            .create(&thread, 1, "t", CheckpointReason::Timeout, snapshot("a"))
            .await
            .unwrap();
        for stale in [1, 3] {
            let err = store
                .create(&thread, stale, "t", CheckpointReason::Timeout, snapshot("b"))
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                Error::Checkpoint(CheckpointError::IterationOutOfOrder { expected: 2, .. })
            ));
        }

        let all = store.list(&thread).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, first);
        assert_eq!(all[0].status, CheckpointStatus::Active);
    }

    #[tokio::test]
    async fn thread_locks_are_released_after_use() {
        let store = Arc::new(store());
        let mut handles = Vec::new();
        for i in 0..50 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let thread = ThreadId::from(format!("th_lock_{}", i % 10).as_str());
                let checkpoint = store
                    .create_next(&thread, "t", CheckpointReason::Timeout, snapshot("a"))
                    .await
                    .unwrap();
                store
                    .complete(&checkpoint.id, CheckpointOutcome::Completed, None)
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(store.locks.lock().unwrap().is_empty());
    }

    /// Hands out a snapshot tagged with how many snapshots came before it.
    struct CountingFiles {
        taken: StdMutex<u64>,
    }

    #[async_trait]
    impl StateProvider for CountingFiles {
        fn kind(&self) -> StateKind {
            StateKind::Files
        }

        async fn snapshot(&self) -> std::result::Result<Vec<StateRef>, Error> {
            let n = {
                let mut taken = self.taken.lock().unwrap();
                *taken += 1;
                *taken
            };
            tokio::task::yield_now().await;
            Ok(vec![StateRef {
                key: "file".into(),
                content_hash: n.to_string(),
                size: n,
                content: None,
            }])
        }

        async fn restore(&self, _refs: &[StateRef]) -> std::result::Result<(), Error> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn newest_checkpoint_carries_newest_collaborator_state() {
        let files = Arc::new(CountingFiles {
            taken: StdMutex::new(0),
        });
        let store = Arc::new(store().with_provider(files));
        let thread = ThreadId::from("th_fresh");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            let thread = thread.clone();
            handles.push(tokio::spawn(async move {
                store
                    .create_next(&thread, "t", CheckpointReason::Timeout, snapshot("a"))
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        for checkpoint in store.list(&thread).await.unwrap() {
            let refs = checkpoint.snapshot.refs(StateKind::Files);
            assert_eq!(refs[0].size, u64::from(checkpoint.iteration));
        }
    }

    #[tokio::test]
    async fn concurrent_creations_leave_one_active() {
        let store = Arc::new(store());
        let thread = ThreadId::from("th_race");

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            let thread = thread.clone();
            handles.push(tokio::spawn(async move {
                store
                    .create_next(&thread, "t", CheckpointReason::Timeout, snapshot(&i.to_string()))
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let all = store.list(&thread).await.unwrap();
        assert_eq!(all.len(), 8);
        let active = all
            .iter()
            .filter(|c| c.status == CheckpointStatus::Active)
            .count();
        assert_eq!(active, 1);
        let mut iterations: Vec<u32> = all.iter().map(|c| c.iteration).collect();
        iterations.sort();
        assert_eq!(iterations, (1..=8).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn complete_is_idempotent() {
        let store = store();
        let thread = ThreadId::from("th_done");
        let id = store
            .create(&thread, 1, "t", CheckpointReason::Manual, snapshot("a"))
            .await
            .unwrap();

        let first = store
            .complete(&id, CheckpointOutcome::Completed, None)
            .await
            .unwrap();
        assert_eq!(first.status, CheckpointStatus::Completed);

        let second = store
            .complete(&id, CheckpointOutcome::Failed, Some("late".into()))
            .await
            .unwrap();
        assert_eq!(second.status, CheckpointStatus::Completed);
        assert_eq!(second.completed_at, first.completed_at);
        assert!(second.error.is_none());
    }

    #[tokio::test]
    async fn restore_rejects_unknown_and_terminal() {
        let store = store();
        let err = store.restore("ckpt_missing").await.unwrap_err();
        assert!(matches!(err, Error::Checkpoint(CheckpointError::NotFound(_))));

        let thread = ThreadId::from("th_term");
        let id = store
            .create(&thread, 1, "t", CheckpointReason::Timeout, snapshot("a"))
            .await
            .unwrap();
        store
            .complete(&id, CheckpointOutcome::Failed, Some("boom".into()))
            .await
            .unwrap();
        let err = store.restore(&id).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Checkpoint(CheckpointError::AlreadyTerminal { .. })
        ));
    }

    #[tokio::test]
    async fn restore_puts_collaborator_state_back_first() {
        let beads = Arc::new(FakeBeads {
            restored: StdMutex::new(Vec::new()),
        });
        let store = store().with_provider(beads.clone());
        let thread = ThreadId::from("th_beads");

        let id = store
            .create(&thread, 1, "t", CheckpointReason::Timeout, snapshot("a"))
            .await
            .unwrap();
        let created = store.get(&id).await.unwrap().unwrap();
        assert_eq!(created.snapshot.beads_state.len(), 1);

        let restored = store.restore(&id).await.unwrap();
        assert_eq!(restored.status, CheckpointStatus::Restored);
        assert!(restored.restored_at.is_some());
        let calls = beads.restored.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0][0].key, "bead-1");
    }

    #[tokio::test]
    async fn superseded_checkpoint_can_still_be_restored() {
        let store = store();
        let thread = ThreadId::from("th_old");
        let old = store
            .create(&thread, 1, "t", CheckpointReason::Timeout, snapshot("a"))
            .await
            .unwrap();
        store
            .create(&thread, 2, "t", CheckpointReason::Timeout, snapshot("b"))
            .await
            .unwrap();

        let restored = store.restore(&old).await.unwrap();
        assert_eq!(restored.status, CheckpointStatus::Restored);
    }

    #[tokio::test]
    async fn creation_publishes_event() {
        let bus = Arc::new(EventBus::new(8));
        let mut rx = bus.subscribe();
        let store = store().with_event_bus(bus);
        let thread = ThreadId::from("th_evt");
        store
            .create(&thread, 1, "t", CheckpointReason::Timeout, snapshot("a"))
            .await
            .unwrap();

        match rx.recv().await.unwrap().as_ref() {
            DomainEvent::CheckpointCreated {
                iteration, reason, ..
            } => {
                assert_eq!(*iteration, 1);
                assert_eq!(reason, "timeout");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
