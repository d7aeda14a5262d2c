//! In-memory backend — useful for testing and ephemeral runs.
//!
//! Every operation takes the write lock for its whole read-modify-write, so
//! supersession and status transitions are linearizable.

use async_trait::async_trait;
use agentloom_core::checkpoint::{Checkpoint, CheckpointBackend, CheckpointStatus};
use agentloom_core::error::{CheckpointError, Error, StepError, SubagentError};
use agentloom_core::step::{ChainOfThoughtStep, StepLog, StepStatus};
use agentloom_core::subagent::{Subagent, SubagentBackend, Transition, TransitionOutcome};
use agentloom_core::thread::ThreadId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// An in-memory store for checkpoints, steps, and subagents.
pub struct InMemoryStore {
    checkpoints: Arc<RwLock<Vec<Checkpoint>>>,
    steps: Arc<RwLock<HashMap<ThreadId, Vec<ChainOfThoughtStep>>>>,
    subagents: Arc<RwLock<HashMap<String, Subagent>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            checkpoints: Arc::new(RwLock::new(Vec::new())),
            steps: Arc::new(RwLock::new(HashMap::new())),
            subagents: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CheckpointBackend for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn insert_superseding(&self, checkpoint: Checkpoint) -> Result<Vec<String>, Error> {
        let mut checkpoints = self.checkpoints.write().await;

        let mut superseded = Vec::new();
        for existing in checkpoints.iter_mut() {
            if existing.thread_id == checkpoint.thread_id
                && existing.status == CheckpointStatus::Active
            {
                existing.status = CheckpointStatus::Superseded;
                superseded.push(existing.id.clone());
            }
        }

        checkpoints.push(checkpoint);
        Ok(superseded)
    }

    async fn get(&self, id: &str) -> Result<Option<Checkpoint>, Error> {
        let checkpoints = self.checkpoints.read().await;
        Ok(checkpoints.iter().find(|c| c.id == id).cloned())
    }

    async fn latest_for_thread(&self, thread_id: &ThreadId) -> Result<Option<Checkpoint>, Error> {
        let checkpoints = self.checkpoints.read().await;
        // max_by_key keeps the last maximum, so later insertions win ties
        Ok(checkpoints
            .iter()
            .filter(|c| &c.thread_id == thread_id)
            .max_by_key(|c| c.iteration)
            .cloned())
    }

    async fn list_for_thread(&self, thread_id: &ThreadId) -> Result<Vec<Checkpoint>, Error> {
        let checkpoints = self.checkpoints.read().await;
        let mut list: Vec<Checkpoint> = checkpoints
            .iter()
            .filter(|c| &c.thread_id == thread_id)
            .cloned()
            .collect();
        list.sort_by_key(|c| c.iteration);
        Ok(list)
    }

    async fn update(&self, checkpoint: &Checkpoint) -> Result<(), Error> {
        let mut checkpoints = self.checkpoints.write().await;
        let existing = checkpoints
            .iter_mut()
            .find(|c| c.id == checkpoint.id)
            .ok_or_else(|| CheckpointError::NotFound(checkpoint.id.clone()))?;

        existing.status = checkpoint.status;
        existing.restored_at = checkpoint.restored_at;
        existing.completed_at = checkpoint.completed_at;
        existing.error = checkpoint.error.clone();
        Ok(())
    }
}

#[async_trait]
impl StepLog for InMemoryStore {
    async fn emit_step(&self, thread_id: &ThreadId, step: ChainOfThoughtStep) -> Result<(), Error> {
        let mut steps = self.steps.write().await;
        let log = steps.entry(thread_id.clone()).or_default();
        if log.iter().any(|s| s.id == step.id) {
            return Err(StepError::Duplicate {
                thread_id: thread_id.to_string(),
                step_id: step.id,
            }
            .into());
        }
        log.push(step);
        Ok(())
    }

    async fn update_step_status(
        &self,
        thread_id: &ThreadId,
        step_id: &str,
        status: StepStatus,
    ) -> Result<(), Error> {
        let mut steps = self.steps.write().await;
        let step = steps
            .get_mut(thread_id)
            .and_then(|log| log.iter_mut().find(|s| s.id == step_id))
            .ok_or_else(|| StepError::NotFound {
                thread_id: thread_id.to_string(),
                step_id: step_id.to_string(),
            })?;

        step.status.check_transition(status)?;
        step.status = status;
        Ok(())
    }

    async fn get_steps(&self, thread_id: &ThreadId) -> Result<Vec<ChainOfThoughtStep>, Error> {
        let steps = self.steps.read().await;
        Ok(steps.get(thread_id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl SubagentBackend for InMemoryStore {
    async fn insert(&self, subagent: Subagent) -> Result<(), Error> {
        self.subagents
            .write()
            .await
            .insert(subagent.id().to_string(), subagent);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Subagent>, Error> {
        Ok(self.subagents.read().await.get(id).cloned())
    }

    async fn list_for_parent(&self, parent: &ThreadId) -> Result<Vec<Subagent>, Error> {
        let subagents = self.subagents.read().await;
        let mut list: Vec<Subagent> = subagents
            .values()
            .filter(|s| s.parent_thread_id.as_ref() == Some(parent))
            .cloned()
            .collect();
        list.sort_by(|a, b| a.thread_id.cmp(&b.thread_id));
        Ok(list)
    }

    async fn transition(&self, id: &str, transition: Transition) -> Result<TransitionOutcome, Error> {
        let mut subagents = self.subagents.write().await;
        let record = subagents
            .get_mut(id)
            .ok_or_else(|| SubagentError::NotFound(id.to_string()))?;

        if record.apply(transition) {
            Ok(TransitionOutcome::Applied(record.clone()))
        } else {
            Ok(TransitionOutcome::Rejected(record.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentloom_core::checkpoint::{CheckpointReason, StateSnapshot};
    use agentloom_core::step::StepKind;
    use agentloom_core::subagent::{SubagentResult, SubagentStatus};

    fn checkpoint(thread: &str, iteration: u32) -> Checkpoint {
        Checkpoint::new(
            ThreadId::from(thread),
            iteration,
            "continue",
            CheckpointReason::Timeout,
            StateSnapshot::default(),
        )
    }

    #[tokio::test]
    async fn insert_supersedes_prior_active() {
        let store = InMemoryStore::new();
        let c1 = checkpoint("th_a", 1);
        let c1_id = c1.id.clone();
        assert!(store.insert_superseding(c1).await.unwrap().is_empty());

        let c2 = checkpoint("th_a", 2);
        let c2_id = c2.id.clone();
        let superseded = store.insert_superseding(c2).await.unwrap();
        assert_eq!(superseded, vec![c1_id.clone()]);

        let list = store.list_for_thread(&ThreadId::from("th_a")).await.unwrap();
        let active: Vec<_> = list
            .iter()
            .filter(|c| c.status == CheckpointStatus::Active)
            .collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, c2_id);
        assert_eq!(
            CheckpointBackend::get(&store, &c1_id).await.unwrap().unwrap().status,
            CheckpointStatus::Superseded
        );
    }

    #[tokio::test]
    async fn other_threads_are_untouched() {
        let store = InMemoryStore::new();
        store.insert_superseding(checkpoint("th_a", 1)).await.unwrap();
        store.insert_superseding(checkpoint("th_b", 1)).await.unwrap();

        let latest = store
            .latest_for_thread(&ThreadId::from("th_a"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.status, CheckpointStatus::Active);
    }

    #[tokio::test]
    async fn latest_is_highest_iteration() {
        let store = InMemoryStore::new();
        store.insert_superseding(checkpoint("th_a", 1)).await.unwrap();
        store.insert_superseding(checkpoint("th_a", 2)).await.unwrap();
        let latest = store
            .latest_for_thread(&ThreadId::from("th_a"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.iteration, 2);
        assert!(
            store
                .latest_for_thread(&ThreadId::from("th_none"))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn update_unknown_checkpoint_fails() {
        let store = InMemoryStore::new();
        let err = store.update(&checkpoint("th_a", 1)).await.unwrap_err();
        assert!(matches!(err, Error::Checkpoint(CheckpointError::NotFound(_))));
    }

    #[tokio::test]
    async fn steps_keep_order_and_enforce_monotonic_status() {
        let store = InMemoryStore::new();
        let thread = ThreadId::from("th_a");
        let first = ChainOfThoughtStep::new(StepKind::Thinking, StepStatus::Active, "Thinking");
        let second = ChainOfThoughtStep::new(StepKind::Tool, StepStatus::Active, "Running code");
        let first_id = first.id.clone();

        store.emit_step(&thread, first).await.unwrap();
        store.emit_step(&thread, second).await.unwrap();
        store
            .update_step_status(&thread, &first_id, StepStatus::Complete)
            .await
            .unwrap();

        let err = store
            .update_step_status(&thread, &first_id, StepStatus::Active)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Step(StepError::InvalidTransition { .. })
        ));

        let steps = store.get_steps(&thread).await.unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].status, StepStatus::Complete);
        assert_eq!(steps[1].kind, StepKind::Tool);
    }

    #[tokio::test]
    async fn duplicate_step_id_is_rejected() {
        let store = InMemoryStore::new();
        let thread = ThreadId::from("th_a");
        let step = ChainOfThoughtStep::new(StepKind::Text, StepStatus::Complete, "Answer");
        store.emit_step(&thread, step.clone()).await.unwrap();
        assert!(store.emit_step(&thread, step).await.is_err());
    }

    #[tokio::test]
    async fn unknown_step_is_not_found() {
        let store = InMemoryStore::new();
        let err = store
            .update_step_status(&ThreadId::from("th_a"), "step_x", StepStatus::Complete)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Step(StepError::NotFound { .. })));
    }

    #[tokio::test]
    async fn subagent_transitions_are_atomic_and_final() {
        let store = InMemoryStore::new();
        let parent = ThreadId::from("th_parent");
        let sa = Subagent::new(Some(parent.clone()), "r", "task", vec![], "fast");
        let id = sa.id().to_string();
        store.insert(sa).await.unwrap();

        let started = store.transition(&id, Transition::Start).await.unwrap();
        assert!(matches!(started, TransitionOutcome::Applied(ref s) if s.status == SubagentStatus::Running));

        store
            .transition(&id, Transition::Complete(SubagentResult::default()))
            .await
            .unwrap();
        let rejected = store
            .transition(
                &id,
                Transition::Fail {
                    error: "Cancelled by parent".into(),
                    result: None,
                },
            )
            .await
            .unwrap();
        assert!(matches!(rejected, TransitionOutcome::Rejected(ref s) if s.status == SubagentStatus::Completed));

        assert_eq!(store.list_for_parent(&parent).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_subagent_transition_fails() {
        let store = InMemoryStore::new();
        let err = store.transition("th_missing", Transition::Start).await.unwrap_err();
        assert!(matches!(err, Error::Subagent(SubagentError::NotFound(_))));
    }
}
