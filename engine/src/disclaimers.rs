//! Disclaimer resolution: rule-matching over a user's attributes, with
//! multi-tenant cascade. Every matching active rule contributes its template
//! HTML, concatenated in priority order.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::warn;

use crate::error::EngineResult;
use crate::store::DisclaimerRepository;
use signet_shared::{ConditionMode, DisclaimerRule, Organization, OrgUser};

pub struct DisclaimerResolver {
    rules: Arc<dyn DisclaimerRepository>,
}

impl DisclaimerResolver {
    pub fn new(rules: Arc<dyn DisclaimerRepository>) -> Self {
        Self { rules }
    }

    /// Resolve the combined disclaimer HTML for one deployment. An empty
    /// string is a normal outcome, not an error.
    pub async fn resolve(&self, user: &OrgUser, organization: &Organization) -> EngineResult<String> {
        let mut rules = self.rules.active_rules(organization.id).await?;

        if let Some(parent_id) = organization.parent_organization_id {
            rules.extend(self.rules.cascaded_rules(parent_id).await?);
        }

        let now = Utc::now();
        rules.retain(|rule| rule.is_active && Self::matches(rule, user, organization, now));
        rules.sort_by_key(|rule| rule.priority);

        let mut html = String::new();
        for rule in &rules {
            match self.rules.template_html(rule.template_id).await? {
                Some(fragment) => html.push_str(&fragment),
                None => warn!(
                    rule_id = %rule.id,
                    template_id = %rule.template_id,
                    "Disclaimer rule references a missing template"
                ),
            }
        }

        Ok(html)
    }

    fn matches(
        rule: &DisclaimerRule,
        user: &OrgUser,
        organization: &Organization,
        now: DateTime<Utc>,
    ) -> bool {
        if let Some(start) = rule.start_date {
            if now < start {
                return false;
            }
        }
        if let Some(end) = rule.end_date {
            if now > end {
                return false;
            }
        }

        Self::condition_matches(
            rule.department_condition,
            &rule.departments,
            user.department.as_deref(),
        ) && Self::condition_matches(rule.region_condition, &rule.regions, user.region.as_deref())
            && Self::condition_matches(
                rule.recipient_condition,
                &rule.recipient_domains,
                organization.domain.as_deref(),
            )
    }

    /// `include`: the attribute must be present and in the list. `exclude`:
    /// it must not be in the list. Absent condition: always matches.
    fn condition_matches(
        mode: Option<ConditionMode>,
        values: &[String],
        attribute: Option<&str>,
    ) -> bool {
        match mode {
            None => true,
            Some(ConditionMode::Include) => {
                attribute.is_some_and(|attr| values.iter().any(|v| v == attr))
            }
            Some(ConditionMode::Exclude) => {
                !attribute.is_some_and(|attr| values.iter().any(|v| v == attr))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::fixtures::{MemoryStore, OrgFixture, disclaimer_rule, user_in};
    use chrono::Duration;
    use uuid::Uuid;

    #[tokio::test]
    async fn stacking_concatenates_in_priority_order() {
        let store = Arc::new(MemoryStore::new());
        let org = OrgFixture::new(&store);
        let user = user_in(&store, org.id, Some("Sales"));

        let legal = store.add_disclaimer_template(org.id, "<p>legal</p>");
        let privacy = store.add_disclaimer_template(org.id, "<p>privacy</p>");
        store.add_disclaimer_rule(disclaimer_rule(org.id, privacy, 20, |_| {}));
        store.add_disclaimer_rule(disclaimer_rule(org.id, legal, 10, |_| {}));

        let resolver = DisclaimerResolver::new(store.clone());
        let html = resolver.resolve(&user, &org.organization()).await.unwrap();
        assert_eq!(html, "<p>legal</p><p>privacy</p>");
    }

    #[tokio::test]
    async fn include_condition_requires_the_attribute() {
        let store = Arc::new(MemoryStore::new());
        let org = OrgFixture::new(&store);
        let template = store.add_disclaimer_template(org.id, "<p>sales only</p>");
        store.add_disclaimer_rule(disclaimer_rule(org.id, template, 1, |r| {
            r.department_condition = Some(ConditionMode::Include);
            r.departments = vec!["Sales".to_string()];
        }));

        let resolver = DisclaimerResolver::new(store.clone());

        let sales = user_in(&store, org.id, Some("Sales"));
        assert_eq!(
            resolver.resolve(&sales, &org.organization()).await.unwrap(),
            "<p>sales only</p>"
        );

        let engineering = user_in(&store, org.id, Some("Engineering"));
        assert_eq!(
            resolver
                .resolve(&engineering, &org.organization())
                .await
                .unwrap(),
            ""
        );

        // A user with no department never satisfies an include condition.
        let nobody = user_in(&store, org.id, None);
        assert_eq!(
            resolver.resolve(&nobody, &org.organization()).await.unwrap(),
            ""
        );
    }

    #[tokio::test]
    async fn exclude_condition_drops_listed_departments() {
        let store = Arc::new(MemoryStore::new());
        let org = OrgFixture::new(&store);
        let template = store.add_disclaimer_template(org.id, "<p>general</p>");
        store.add_disclaimer_rule(disclaimer_rule(org.id, template, 1, |r| {
            r.department_condition = Some(ConditionMode::Exclude);
            r.departments = vec!["Legal".to_string()];
        }));

        let resolver = DisclaimerResolver::new(store.clone());

        let legal = user_in(&store, org.id, Some("Legal"));
        assert_eq!(resolver.resolve(&legal, &org.organization()).await.unwrap(), "");

        let sales = user_in(&store, org.id, Some("Sales"));
        assert_eq!(
            resolver.resolve(&sales, &org.organization()).await.unwrap(),
            "<p>general</p>"
        );
    }

    #[tokio::test]
    async fn date_window_excludes_expired_rules() {
        let store = Arc::new(MemoryStore::new());
        let org = OrgFixture::new(&store);
        let user = user_in(&store, org.id, None);

        let expired = store.add_disclaimer_template(org.id, "<p>expired</p>");
        store.add_disclaimer_rule(disclaimer_rule(org.id, expired, 1, |r| {
            r.end_date = Some(Utc::now() - Duration::days(1));
        }));

        let current = store.add_disclaimer_template(org.id, "<p>current</p>");
        store.add_disclaimer_rule(disclaimer_rule(org.id, current, 2, |r| {
            r.start_date = Some(Utc::now() - Duration::days(1));
            r.end_date = Some(Utc::now() + Duration::days(1));
        }));

        let resolver = DisclaimerResolver::new(store.clone());
        assert_eq!(
            resolver.resolve(&user, &org.organization()).await.unwrap(),
            "<p>current</p>"
        );
    }

    #[tokio::test]
    async fn parent_rules_cascade_when_flagged() {
        let store = Arc::new(MemoryStore::new());
        let parent = OrgFixture::new(&store);
        let child = OrgFixture::child_of(&store, &parent);
        let user = user_in(&store, child.id, None);

        let shared = store.add_disclaimer_template(parent.id, "<p>group-wide</p>");
        store.add_disclaimer_rule(disclaimer_rule(parent.id, shared, 1, |r| {
            r.cascade_to_clients = true;
        }));

        let private = store.add_disclaimer_template(parent.id, "<p>parent only</p>");
        store.add_disclaimer_rule(disclaimer_rule(parent.id, private, 2, |_| {}));

        let resolver = DisclaimerResolver::new(store.clone());
        assert_eq!(
            resolver.resolve(&user, &child.organization()).await.unwrap(),
            "<p>group-wide</p>"
        );
    }

    #[tokio::test]
    async fn missing_template_is_skipped() {
        let store = Arc::new(MemoryStore::new());
        let org = OrgFixture::new(&store);
        let user = user_in(&store, org.id, None);
        store.add_disclaimer_rule(disclaimer_rule(org.id, Uuid::new_v4(), 1, |_| {}));

        let resolver = DisclaimerResolver::new(store.clone());
        assert_eq!(resolver.resolve(&user, &org.organization()).await.unwrap(), "");
    }
}
