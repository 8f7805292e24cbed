//! Workflow matching: which workflows apply to an event, and in what order.

use std::sync::Arc;
use uuid::Uuid;

use crate::error::EngineResult;
use crate::store::{LifecycleStore, WorkflowRepository};
use signet_shared::{LifecycleEvent, Workflow};

/// Pure read over the workflow repository. Produces a deterministic,
/// priority-ordered candidate list for one event.
pub struct WorkflowMatcher {
    workflows: Arc<dyn WorkflowRepository>,
    store: Arc<dyn LifecycleStore>,
}

impl WorkflowMatcher {
    pub fn new(workflows: Arc<dyn WorkflowRepository>, store: Arc<dyn LifecycleStore>) -> Self {
        Self { workflows, store }
    }

    /// Matching order: the organization's own workflows (priority ascending)
    /// first, then the parent organization's cascaded workflows. Cascaded
    /// workflows never pre-empt the organization's own, whatever their
    /// priority values.
    pub async fn matching_workflows(
        &self,
        event: &LifecycleEvent,
        user_department: Option<&str>,
    ) -> EngineResult<Vec<Workflow>> {
        let mut candidates = self
            .workflows
            .active_workflows(event.organization_id, event.event_type)
            .await?;

        if let Some(parent_id) = self.parent_organization(event.organization_id).await? {
            let cascaded = self
                .workflows
                .cascaded_workflows(parent_id, event.event_type)
                .await?;
            candidates.extend(cascaded);
        }

        candidates.retain(|workflow| Self::passes_filters(workflow, event, user_department));

        Ok(candidates)
    }

    async fn parent_organization(&self, organization_id: Uuid) -> EngineResult<Option<Uuid>> {
        let org = self.store.get_organization(organization_id).await?;
        Ok(org.and_then(|o| o.parent_organization_id))
    }

    fn passes_filters(
        workflow: &Workflow,
        event: &LifecycleEvent,
        user_department: Option<&str>,
    ) -> bool {
        if let Some(departments) = &workflow.department_filter {
            if !departments.is_empty() {
                match user_department {
                    Some(dept) if departments.iter().any(|d| d == dept) => {}
                    _ => return false,
                }
            }
        }

        if let Some(sources) = &workflow.source_filter {
            if !sources.is_empty() && !sources.iter().any(|s| s == event.source.as_str()) {
                return false;
            }
        }

        true
    }
}
