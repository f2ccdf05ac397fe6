//! Definition validation logic

use std::collections::{HashMap, HashSet};

use crate::models::{
    ActionConfig, ApprovalRuleDraft, AutomationDraft, RetryPolicy, ScheduleConfig, TaskDefinition,
    TaskKind, TemplateDraft, TriggerConfig,
};
use rust_decimal::Decimal;

/// Validation error type
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

/// Validation result
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    fn merge(&mut self, prefix: &str, other: ValidationResult) {
        for error in other.errors {
            self.add_error(format!("{}.{}", prefix, error.field), error.message);
        }
        self.warnings.extend(other.warnings);
    }

    /// All errors on one line
    pub fn summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Definition validator
pub struct WorkflowValidator;

impl WorkflowValidator {
    /// Validate retry policy
    /// - max_attempts: 1-10
    /// - initial_delay: 1-300s
    /// - backoff_multiplier >= 1.0
    /// - max delay cap: 600s (enforced in calculation, not validated here)
    pub fn validate_retry_policy(policy: &RetryPolicy) -> ValidationResult {
        let mut result = ValidationResult::new();

        if policy.max_attempts < 1 {
            result.add_error("max_attempts", "max_attempts must be at least 1");
        }
        if policy.max_attempts > 10 {
            result.add_error("max_attempts", "max_attempts cannot exceed 10");
        }

        if policy.initial_delay_seconds < 1 {
            result.add_error(
                "initial_delay_seconds",
                "initial_delay_seconds must be at least 1",
            );
        }
        if policy.initial_delay_seconds > 300 {
            result.add_error(
                "initial_delay_seconds",
                "initial_delay_seconds cannot exceed 300",
            );
        }

        if policy.backoff_multiplier < 1.0 {
            result.add_error("backoff_multiplier", "backoff_multiplier must be at least 1.0");
        }

        if policy.exponential_backoff && policy.backoff_multiplier > 3.0 {
            result.add_warning(format!(
                "High backoff_multiplier ({}) with exponential backoff may reach max delay (600s) quickly",
                policy.backoff_multiplier
            ));
        }

        result
    }

    /// Validate a template draft
    pub fn validate_template(draft: &TemplateDraft) -> ValidationResult {
        let mut result = ValidationResult::new();

        if draft.name.trim().is_empty() {
            result.add_error("name", "Template name cannot be empty");
        }
        if draft.template_config.tasks.is_empty() {
            result.add_error("template_config.tasks", "Template must define at least one task");
        }

        result.merge(
            "template_config",
            Self::validate_task_graph(&draft.template_config.tasks),
        );

        if let Some(schema) = &draft.data_schema {
            if let Err(e) = jsonschema::JSONSchema::compile(schema) {
                result.add_error("data_schema", format!("Invalid JSON schema: {}", e));
            }
        }

        result
    }

    /// Validate a task graph: unique keys, known dependencies, no forward or cyclic edges
    pub fn validate_task_graph(tasks: &[TaskDefinition]) -> ValidationResult {
        let mut result = ValidationResult::new();
        let mut by_key: HashMap<&str, &TaskDefinition> = HashMap::new();

        for (index, task) in tasks.iter().enumerate() {
            let field = format!("tasks[{}]", index);
            if task.key.trim().is_empty() {
                result.add_error(format!("{}.key", field), "Task key cannot be empty");
            }
            if task.name.trim().is_empty() {
                result.add_error(format!("{}.name", field), "Task name cannot be empty");
            }
            if by_key.insert(task.key.as_str(), task).is_some() {
                result.add_error(
                    format!("{}.key", field),
                    format!("Duplicate task key '{}'", task.key),
                );
            }
            Self::validate_task_kind(&field, task, &mut result);
        }

        for task in tasks {
            for dep in &task.depends_on {
                match by_key.get(dep.as_str()) {
                    None => result.add_error(
                        format!("{}.depends_on", task.key),
                        format!("Unknown dependency '{}'", dep),
                    ),
                    Some(upstream) if upstream.step > task.step => result.add_error(
                        format!("{}.depends_on", task.key),
                        format!(
                            "Forward dependency on '{}' (step {} > step {})",
                            dep, upstream.step, task.step
                        ),
                    ),
                    Some(_) => {}
                }
            }
        }

        if let Some(cycle) = Self::detect_circular_dependencies(tasks) {
            result.add_error(
                "depends_on",
                format!(
                    "Circular dependency detected: {} → {}",
                    cycle.join(" → "),
                    cycle[0]
                ),
            );
        }

        result
    }

    fn validate_task_kind(field: &str, task: &TaskDefinition, result: &mut ValidationResult) {
        match &task.kind {
            TaskKind::Approval {
                approval_type,
                amount,
                amount_field,
                ..
            } => {
                if let Some(name) = amount_field {
                    if name.trim().is_empty() {
                        result.add_error(
                            format!("{}.amount_field", field),
                            "amount_field cannot be empty",
                        );
                    }
                }
                if approval_type.is_some() && amount.is_none() && amount_field.is_none() {
                    result.add_warning(format!(
                        "Approval task '{}' has no amount; it will be routed as amount 0",
                        task.key
                    ));
                }
                if amount.is_some_and(|a| a < Decimal::ZERO) {
                    result.add_error(format!("{}.amount", field), "amount cannot be negative");
                }
            }
            TaskKind::Automated { handler, .. } => {
                if handler.trim().is_empty() {
                    result.add_error(
                        format!("{}.handler", field),
                        "Automated task must name a handler",
                    );
                }
            }
            TaskKind::Notification { subject, .. } => {
                if subject.trim().is_empty() {
                    result.add_error(
                        format!("{}.subject", field),
                        "Notification subject cannot be empty",
                    );
                }
            }
            TaskKind::Conditional { conditions } => {
                if conditions.is_empty() {
                    result.add_warning(format!(
                        "Conditional task '{}' has no conditions and always passes",
                        task.key
                    ));
                }
            }
            TaskKind::Review { .. } | TaskKind::DataEntry { .. } => {}
        }

        if task.auto_assign && task.assigned_role.is_none() {
            result.add_error(
                format!("{}.assigned_role", field),
                "auto_assign requires assigned_role",
            );
        }
    }

    /// Detect circular dependencies using DFS cycle detection
    fn detect_circular_dependencies(tasks: &[TaskDefinition]) -> Option<Vec<String>> {
        let edges: HashMap<&str, Vec<&str>> = tasks
            .iter()
            .map(|t| {
                (
                    t.key.as_str(),
                    t.depends_on.iter().map(String::as_str).collect(),
                )
            })
            .collect();

        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut parent = HashMap::new();

        fn dfs<'a>(
            node: &'a str,
            edges: &HashMap<&'a str, Vec<&'a str>>,
            visited: &mut HashSet<&'a str>,
            rec_stack: &mut HashSet<&'a str>,
            parent: &mut HashMap<&'a str, &'a str>,
        ) -> Option<Vec<String>> {
            visited.insert(node);
            rec_stack.insert(node);

            for &target in edges.get(node).into_iter().flatten() {
                if !edges.contains_key(target) {
                    // Unknown keys are reported separately
                    continue;
                }
                if !visited.contains(target) {
                    parent.insert(target, node);
                    if let Some(cycle) = dfs(target, edges, visited, rec_stack, parent) {
                        return Some(cycle);
                    }
                } else if rec_stack.contains(target) {
                    // Reconstruct path
                    let mut cycle = vec![target.to_string()];
                    let mut current = node;
                    while current != target {
                        cycle.push(current.to_string());
                        current = parent.get(current)?;
                    }
                    cycle.reverse();
                    return Some(cycle);
                }
            }

            rec_stack.remove(node);
            None
        }

        for task in tasks {
            let key = task.key.as_str();
            if !visited.contains(key) {
                if let Some(cycle) = dfs(key, &edges, &mut visited, &mut rec_stack, &mut parent) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    /// Validate an approval rule draft
    pub fn validate_approval_rule(draft: &ApprovalRuleDraft) -> ValidationResult {
        let mut result = ValidationResult::new();

        if draft.name.trim().is_empty() {
            result.add_error("name", "Rule name cannot be empty");
        }
        if draft.approval_type.trim().is_empty() {
            result.add_error("approval_type", "approval_type cannot be empty");
        }
        if draft.approval_levels.is_empty() {
            result.add_error("approval_levels", "At least one approval level is required");
        }
        if draft.min_amount < Decimal::ZERO {
            result.add_error("min_amount", "min_amount cannot be negative");
        }
        if let Some(max) = draft.max_amount {
            if max < draft.min_amount {
                result.add_error("max_amount", "max_amount must not be below min_amount");
            }
        }
        if draft
            .auto_approve_threshold
            .is_some_and(|t| t < Decimal::ZERO)
        {
            result.add_error(
                "auto_approve_threshold",
                "auto_approve_threshold cannot be negative",
            );
        }
        if draft.escalation_timeout == 0 {
            result.add_error("escalation_timeout", "escalation_timeout must be at least 1 hour");
        }

        for pair in draft.approval_levels.windows(2) {
            if pair[1].level <= pair[0].level {
                result.add_error(
                    "approval_levels",
                    format!(
                        "Levels must be strictly increasing ({} after {})",
                        pair[1].level, pair[0].level
                    ),
                );
            }
        }
        for (index, level) in draft.approval_levels.iter().enumerate() {
            if level.role.trim().is_empty() {
                result.add_error(format!("approval_levels[{}].role", index), "Role cannot be empty");
            }
        }
        if let Some(first) = draft.approval_levels.first() {
            if first.min_amount.is_some_and(|m| m > draft.min_amount) {
                result.add_error(
                    "approval_levels[0].min_amount",
                    "The first level must apply to every amount the rule covers",
                );
            }
        }

        result
    }

    /// Validate an automation draft
    pub fn validate_automation(draft: &AutomationDraft) -> ValidationResult {
        let mut result = ValidationResult::new();

        if draft.name.trim().is_empty() {
            result.add_error("name", "Automation name cannot be empty");
        }

        match &draft.trigger {
            TriggerConfig::Scheduled { schedule } => {
                result.merge("trigger.schedule", Self::validate_schedule(schedule));
            }
            TriggerConfig::Triggered { events, .. } => {
                if events.is_empty() {
                    result.add_error("trigger.events", "At least one event is required");
                }
            }
            TriggerConfig::Conditional { cooldown_minutes } => {
                if draft.trigger_conditions.is_empty() {
                    result.add_error(
                        "trigger_conditions",
                        "Conditional automations need at least one condition",
                    );
                }
                if cooldown_minutes == &Some(0) {
                    result.add_error("trigger.cooldown_minutes", "cooldown_minutes must be at least 1");
                }
            }
        }

        match &draft.action {
            ActionConfig::CreateWorkflow { name, .. } => {
                if name.trim().is_empty() {
                    result.add_error("action.name", "Workflow name cannot be empty");
                }
            }
            ActionConfig::SendNotification {
                recipients,
                subject,
                ..
            } => {
                if recipients.is_empty() {
                    result.add_error("action.recipients", "At least one recipient is required");
                }
                if subject.trim().is_empty() {
                    result.add_error("action.subject", "Subject cannot be empty");
                }
            }
            ActionConfig::Webhook { url, method, .. } => {
                match url::Url::parse(url) {
                    Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
                    Ok(parsed) => result.add_error(
                        "action.url",
                        format!("Unsupported URL scheme '{}'", parsed.scheme()),
                    ),
                    Err(e) => result.add_error("action.url", format!("Invalid URL: {}", e)),
                }
                if reqwest::Method::from_bytes(method.to_ascii_uppercase().as_bytes()).is_err() {
                    result.add_error("action.method", format!("Invalid HTTP method '{}'", method));
                }
            }
            ActionConfig::Custom { handler } => {
                if handler.trim().is_empty() {
                    result.add_error("action.handler", "Handler name cannot be empty");
                }
            }
        }

        if let Some(policy) = &draft.retry_config {
            result.merge("retry_config", Self::validate_retry_policy(policy));
        }

        result
    }

    /// Validate calendar fields of a schedule
    pub fn validate_schedule(schedule: &ScheduleConfig) -> ValidationResult {
        let mut result = ValidationResult::new();
        let (hour, minute) = match schedule {
            ScheduleConfig::Interval { minutes } => {
                if *minutes == 0 {
                    result.add_error("minutes", "Interval must be at least 1 minute");
                }
                (0, 0)
            }
            ScheduleConfig::Hourly { minute } => (0, *minute),
            ScheduleConfig::Daily { hour, minute } | ScheduleConfig::Weekly { hour, minute, .. } => {
                (*hour, *minute)
            }
            ScheduleConfig::Monthly { day, hour, minute } => {
                if !(1..=31).contains(day) {
                    result.add_error("day", "day must be between 1 and 31");
                }
                (*hour, *minute)
            }
        };
        if hour > 23 {
            result.add_error("hour", "hour must be between 0 and 23");
        }
        if minute > 59 {
            result.add_error("minute", "minute must be between 0 and 59");
        }
        result
    }
}
