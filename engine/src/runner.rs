//! Top-level event processing: feature gate, matching, isolated workflow
//! runs, and the terminal processed flip.

use std::sync::Arc;
use tracing::{info, warn};

use crate::error::EngineResult;
use crate::executor::{ActionContext, ActionExecutor};
use crate::matcher::WorkflowMatcher;
use crate::store::{FeatureGate, LifecycleStore};
use signet_shared::{LifecycleEvent, RunStatus, Workflow, WorkflowRun};

/// Feature key the whole engine is gated behind.
pub const LIFECYCLE_FEATURE: &str = "lifecycle_automation";

pub struct WorkflowRunner {
    store: Arc<dyn LifecycleStore>,
    matcher: WorkflowMatcher,
    executor: ActionExecutor,
    gate: Arc<dyn FeatureGate>,
}

impl WorkflowRunner {
    pub fn new(
        store: Arc<dyn LifecycleStore>,
        matcher: WorkflowMatcher,
        executor: ActionExecutor,
        gate: Arc<dyn FeatureGate>,
    ) -> Self {
        Self {
            store,
            matcher,
            executor,
            gate,
        }
    }

    /// Process one freshly-emitted event. Callers check `processed` before
    /// invoking; the processed flip itself is one-shot either way.
    ///
    /// Matcher and event-row failures surface to the caller; individual
    /// action failures are captured in run results and never propagate.
    pub async fn process(&self, event: &LifecycleEvent) -> EngineResult<()> {
        if !self
            .gate
            .is_entitled(event.organization_id, LIFECYCLE_FEATURE)
            .await?
        {
            info!(
                event_id = %event.id,
                organization_id = %event.organization_id,
                "Lifecycle automation not entitled; marking event processed"
            );
            return self.store.mark_event_processed(event.id, None).await;
        }

        let user = match event.user_id {
            Some(user_id) => self.store.get_user(user_id).await?,
            None => None,
        };
        let department = user.as_ref().and_then(|u| u.department.as_deref());

        let matched = self.matcher.matching_workflows(event, department).await?;
        let first_matched = matched.first().map(|w| w.id);

        info!(
            event_id = %event.id,
            event_type = event.event_type.as_str(),
            matched = matched.len(),
            "Processing lifecycle event"
        );

        let context = ActionContext::from_event(event, user);
        for workflow in &matched {
            self.run_workflow(workflow, event, &context).await?;
        }

        self.store
            .mark_event_processed(event.id, first_matched)
            .await
    }

    /// One isolated run. Only persistence errors escape; action failures end
    /// up in the run's results.
    async fn run_workflow(
        &self,
        workflow: &Workflow,
        event: &LifecycleEvent,
        context: &ActionContext,
    ) -> EngineResult<()> {
        let run = WorkflowRun::started(workflow, event);
        self.store.insert_run(&run).await?;

        let mut results = Vec::with_capacity(workflow.actions.len());
        for action in &workflow.actions {
            results.push(self.executor.execute(action, context).await);
        }

        let status = run_status(&results);
        if status != RunStatus::Completed {
            warn!(
                workflow_id = %workflow.id,
                event_id = %event.id,
                status = ?status,
                "Workflow run did not fully complete"
            );
        }

        self.store.finalize_run(run.id, status, &results).await
    }
}

/// Zero failures (including zero actions) is `completed`; all failed is
/// `failed`; a mix is `partial`.
fn run_status(results: &[signet_shared::ActionOutcome]) -> RunStatus {
    let failed = results.iter().filter(|r| r.is_failed()).count();
    if failed == 0 {
        RunStatus::Completed
    } else if failed == results.len() {
        RunStatus::Failed
    } else {
        RunStatus::Partial
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use signet_shared::{ActionOutcome, ActionType};

    #[test]
    fn zero_actions_complete_trivially() {
        assert_eq!(run_status(&[]), RunStatus::Completed);
    }

    #[test]
    fn mixed_results_are_partial() {
        let results = [
            ActionOutcome::failed(ActionType::Webhook, "blocked"),
            ActionOutcome::completed(ActionType::AssignTemplate),
        ];
        assert_eq!(run_status(&results), RunStatus::Partial);
    }

    #[test]
    fn uniform_results_map_to_terminal_statuses() {
        let all_ok = [
            ActionOutcome::completed(ActionType::AssignTemplate),
            ActionOutcome::completed(ActionType::DeploySignature),
        ];
        assert_eq!(run_status(&all_ok), RunStatus::Completed);

        let all_failed = [
            ActionOutcome::failed(ActionType::Webhook, "a"),
            ActionOutcome::failed(ActionType::DeploySignature, "b"),
        ];
        assert_eq!(run_status(&all_failed), RunStatus::Failed);
    }
}
