//! Approval routing
//!
//! Decides which approver chain applies to an amount. A missing rule is a hard stop:
//! nothing is ever approved by default.

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult, EntityRef};
use crate::models::{ApprovalChain, ApprovalRuleDraft, ApprovalWorkflow, CompanyId};
use crate::workflow::persistence::{JsonStore, WorkflowPersistence};
use crate::workflow::validator::WorkflowValidator;

/// Approval router
pub struct ApprovalRouter {
    persistence: Arc<WorkflowPersistence>,
}

impl ApprovalRouter {
    pub fn new(persistence: Arc<WorkflowPersistence>) -> Self {
        Self { persistence }
    }

    /// Validate and store a routing rule
    pub fn configure(&self, draft: ApprovalRuleDraft) -> EngineResult<ApprovalWorkflow> {
        let id = Uuid::new_v4();
        let result = WorkflowValidator::validate_approval_rule(&draft);
        if !result.is_valid() {
            return Err(EngineError::validation(
                EntityRef::ApprovalRule(id),
                result.summary(),
            ));
        }

        let rule = ApprovalWorkflow {
            id,
            company_id: draft.company_id,
            name: draft.name,
            description: draft.description,
            approval_type: draft.approval_type,
            categories: draft.categories,
            approval_levels: draft.approval_levels,
            min_amount: draft.min_amount,
            max_amount: draft.max_amount,
            requires_documentation: draft.requires_documentation,
            workflow_template_id: draft.workflow_template_id,
            is_active: true,
            auto_approve_threshold: draft.auto_approve_threshold,
            escalation_timeout: draft.escalation_timeout,
            created_by: draft.created_by,
            created_at: Utc::now(),
        };

        self.persistence.transaction(|store| {
            store.approval_rules.push(rule.clone());
            Ok(())
        })?;

        tracing::info!(
            rule_id = %rule.id,
            approval_type = %rule.approval_type,
            levels = rule.approval_levels.len(),
            "Approval rule configured"
        );
        Ok(rule)
    }

    pub fn set_active(&self, rule_id: Uuid, active: bool) -> EngineResult<ApprovalWorkflow> {
        self.persistence.transaction(|store| {
            let rule = store
                .approval_rules
                .iter_mut()
                .find(|r| r.id == rule_id)
                .ok_or_else(|| EngineError::not_found(EntityRef::ApprovalRule(rule_id)))?;
            rule.is_active = active;
            Ok(rule.clone())
        })
    }

    pub fn get(&self, rule_id: Uuid) -> EngineResult<ApprovalWorkflow> {
        self.persistence
            .read(|store| store.approval_rule(rule_id).cloned())
            .ok_or_else(|| EngineError::not_found(EntityRef::ApprovalRule(rule_id)))
    }

    /// Rules of a company, optionally for one approval type
    pub fn list(&self, company_id: CompanyId, approval_type: Option<&str>) -> Vec<ApprovalWorkflow> {
        self.persistence.read(|store| {
            store
                .approval_rules
                .iter()
                .filter(|r| {
                    r.company_id == company_id
                        && approval_type.is_none_or(|t| r.approval_type == t)
                })
                .cloned()
                .collect()
        })
    }

    /// Resolve the approver chain for an amount
    pub fn resolve_chain(
        &self,
        company_id: CompanyId,
        approval_type: &str,
        amount: Decimal,
        category: Option<&str>,
    ) -> EngineResult<ApprovalChain> {
        self.persistence
            .read(|store| Self::resolve_in(store, company_id, approval_type, amount, category))
    }

    /// Resolve against a store snapshot, e.g. inside a transaction
    pub fn resolve_in(
        store: &JsonStore,
        company_id: CompanyId,
        approval_type: &str,
        amount: Decimal,
        category: Option<&str>,
    ) -> EngineResult<ApprovalChain> {
        let rule = Self::select_rule(store, company_id, approval_type, amount, category).ok_or_else(
            || EngineError::NoApprovalRule {
                entity: EntityRef::Company(company_id),
                approval_type: approval_type.to_string(),
                amount,
            },
        )?;

        let auto_approved = rule
            .auto_approve_threshold
            .is_some_and(|threshold| amount <= threshold);

        let levels = if auto_approved {
            Vec::new()
        } else {
            rule.approval_levels
                .iter()
                .filter(|level| level.min_amount.is_none_or(|min| amount >= min))
                .cloned()
                .collect()
        };

        tracing::debug!(
            rule_id = %rule.id,
            amount = %amount,
            levels = levels.len(),
            auto_approved,
            "Approval chain resolved"
        );

        Ok(ApprovalChain {
            approval_workflow_id: rule.id,
            levels,
            auto_approve_threshold: rule.auto_approve_threshold,
            escalation_timeout: rule.escalation_timeout,
        })
    }

    /// Category-specific rules win over generic ones, then the narrowest range
    fn select_rule<'a>(
        store: &'a JsonStore,
        company_id: CompanyId,
        approval_type: &str,
        amount: Decimal,
        category: Option<&str>,
    ) -> Option<&'a ApprovalWorkflow> {
        store
            .approval_rules
            .iter()
            .filter(|r| {
                r.is_active
                    && r.company_id == company_id
                    && r.approval_type == approval_type
                    && r.covers_amount(amount)
                    && r.admits_category(category)
            })
            .min_by(|a, b| {
                a.categories
                    .is_empty()
                    .cmp(&b.categories.is_empty())
                    .then_with(|| range_width(a).cmp(&range_width(b)))
                    .then_with(|| a.created_at.cmp(&b.created_at))
            })
    }
}

/// Width of a rule's amount range; open-ended ranges sort last
fn range_width(rule: &ApprovalWorkflow) -> (bool, Decimal) {
    match rule.max_amount {
        Some(max) => (false, max - rule.min_amount),
        None => (true, Decimal::ZERO),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::models::ApprovalLevel;

    fn level(level: u32, role: &str, min: Option<i64>) -> ApprovalLevel {
        ApprovalLevel {
            level,
            role: role.to_string(),
            min_amount: min.map(Decimal::from),
        }
    }

    fn draft(categories: &[&str], max: Option<i64>) -> ApprovalRuleDraft {
        ApprovalRuleDraft {
            company_id: 1,
            name: "Expenses".to_string(),
            description: None,
            approval_type: "expense".to_string(),
            categories: categories.iter().map(|c| c.to_string()).collect(),
            approval_levels: vec![
                level(1, "manager", None),
                level(2, "finance_director", Some(5000)),
            ],
            min_amount: Decimal::ZERO,
            max_amount: max.map(Decimal::from),
            requires_documentation: false,
            workflow_template_id: None,
            auto_approve_threshold: Some(Decimal::from(100)),
            escalation_timeout: 48,
            created_by: 1,
        }
    }

    fn router() -> ApprovalRouter {
        ApprovalRouter::new(Arc::new(WorkflowPersistence::in_memory()))
    }

    #[test]
    fn test_auto_approval_at_threshold() {
        let router = router();
        router.configure(draft(&[], None)).unwrap();

        let chain = router
            .resolve_chain(1, "expense", Decimal::from(100), None)
            .unwrap();
        assert!(chain.is_auto_approved());
        assert_eq!(chain.escalation_timeout, 48);
    }

    #[test]
    fn test_levels_filtered_by_amount() {
        let router = router();
        router.configure(draft(&[], None)).unwrap();

        let small = router
            .resolve_chain(1, "expense", Decimal::from(800), None)
            .unwrap();
        assert_eq!(small.roles(), vec!["manager"]);

        let large = router
            .resolve_chain(1, "expense", Decimal::from(5000), None)
            .unwrap();
        assert_eq!(large.roles(), vec!["manager", "finance_director"]);
    }

    #[test]
    fn test_no_rule_is_a_hard_stop() {
        let router = router();
        router.configure(draft(&[], Some(1000))).unwrap();

        let err = router
            .resolve_chain(1, "expense", Decimal::from(2000), None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoApprovalRule);
        assert_eq!(err.entity(), Some(&EntityRef::Company(1)));

        let other_type = router
            .resolve_chain(1, "leave_request", Decimal::ZERO, None)
            .unwrap_err();
        assert_eq!(other_type.kind(), ErrorKind::NoApprovalRule);
    }

    #[test]
    fn test_category_specific_rule_wins() {
        let router = router();
        let generic = router.configure(draft(&[], None)).unwrap();
        let travel = router.configure(draft(&["travel"], None)).unwrap();

        let chain = router
            .resolve_chain(1, "expense", Decimal::from(800), Some("travel"))
            .unwrap();
        assert_eq!(chain.approval_workflow_id, travel.id);

        let chain = router
            .resolve_chain(1, "expense", Decimal::from(800), Some("meals"))
            .unwrap();
        assert_eq!(chain.approval_workflow_id, generic.id);
    }

    #[test]
    fn test_narrowest_range_wins() {
        let router = router();
        router.configure(draft(&[], None)).unwrap();
        let narrow = router.configure(draft(&[], Some(1000))).unwrap();

        let chain = router
            .resolve_chain(1, "expense", Decimal::from(500), None)
            .unwrap();
        assert_eq!(chain.approval_workflow_id, narrow.id);
    }

    #[test]
    fn test_inactive_rule_ignored() {
        let router = router();
        let rule = router.configure(draft(&[], None)).unwrap();
        router.set_active(rule.id, false).unwrap();

        assert!(router
            .resolve_chain(1, "expense", Decimal::from(500), None)
            .is_err());
    }

    #[test]
    fn test_invalid_rule_rejected() {
        let router = router();
        let mut bad = draft(&[], None);
        bad.approval_levels.clear();
        let err = router.configure(bad).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(router.list(1, None).is_empty());
    }
}
