//! Automation actions

use std::sync::Arc;
use std::time::Duration;

use crate::error::{EngineError, EngineResult, EntityRef};
use crate::models::{ActionConfig, Actor, NewWorkflow, ProcessAutomation, WorkflowStatus};
use crate::services::collaborators::{with_timeout, ActionOutcome, ActionRequest, Notification};
use crate::workflow::engine::WorkflowEngine;

/// Runs the configured action of an automation
pub struct ActionExecutor {
    engine: Arc<WorkflowEngine>,
    client: reqwest::Client,
}

impl ActionExecutor {
    pub fn new(engine: Arc<WorkflowEngine>) -> Self {
        Self {
            engine,
            client: reqwest::Client::new(),
        }
    }

    fn timeout(&self) -> Duration {
        self.engine.settings().collaborator_timeout
    }

    /// Execute once; a partial result is reported through [`ActionOutcome::partial`]
    pub async fn execute(
        &self,
        automation: &ProcessAutomation,
        input: &serde_json::Value,
    ) -> EngineResult<ActionOutcome> {
        let entity = EntityRef::Automation(automation.id);

        match &automation.action {
            ActionConfig::CreateWorkflow {
                template_id,
                name,
                workflow_data,
                start,
                initiated_by,
            } => {
                let mut data = workflow_data.clone();
                merge_object(&mut data, &automation.action_parameters);
                let new = NewWorkflow::from_template(
                    automation.company_id,
                    *template_id,
                    name,
                    *initiated_by,
                )
                .with_data(data);

                let mut workflow = self.engine.create_workflow(new).await?;
                if *start && workflow.status == WorkflowStatus::Draft {
                    workflow = self.engine.start(workflow.id, Actor::System).await?;
                }
                Ok(ActionOutcome {
                    output: serde_json::json!({
                        "workflow_id": workflow.id,
                        "status": workflow.status,
                    }),
                    partial: false,
                })
            }

            ActionConfig::SendNotification {
                recipients,
                subject,
                body,
            } => {
                let notification = Notification {
                    company_id: automation.company_id,
                    recipients: recipients.clone(),
                    subject: subject.clone(),
                    body: body.clone(),
                    workflow_id: automation.workflow_id,
                    task_id: None,
                };
                let notifier = self.engine.notifier();
                let report = with_timeout(
                    entity.clone(),
                    "notifier",
                    self.timeout(),
                    notifier.notify(&notification),
                )
                .await?;
                if report.is_total_failure() {
                    return Err(EngineError::AutomationExecution {
                        entity,
                        message: format!("notification failed for {:?}", report.failed),
                    });
                }
                Ok(ActionOutcome {
                    partial: report.is_partial(),
                    output: serde_json::json!({
                        "delivered": report.delivered,
                        "failed": report.failed,
                    }),
                })
            }

            ActionConfig::Webhook {
                url,
                method,
                headers,
                body,
            } => self.call_webhook(entity, url, method, headers, body.as_ref(), input).await,

            ActionConfig::Custom { handler } => {
                let runner = self.engine.handlers().get(handler).ok_or_else(|| {
                    EngineError::AutomationExecution {
                        entity: entity.clone(),
                        message: format!("no action handler registered as '{}'", handler),
                    }
                })?;
                let request = ActionRequest {
                    company_id: automation.company_id,
                    handler: handler.clone(),
                    parameters: automation.action_parameters.clone(),
                    payload: input.clone(),
                    workflow_id: automation.workflow_id,
                };
                with_timeout(entity, handler, self.timeout(), runner.run(&request)).await
            }
        }
    }

    async fn call_webhook(
        &self,
        entity: EntityRef,
        url: &str,
        method: &str,
        headers: &std::collections::HashMap<String, String>,
        body: Option<&serde_json::Value>,
        input: &serde_json::Value,
    ) -> EngineResult<ActionOutcome> {
        let method = reqwest::Method::from_bytes(method.to_uppercase().as_bytes()).map_err(|_| {
            EngineError::AutomationExecution {
                entity: entity.clone(),
                message: format!("unsupported HTTP method '{}'", method),
            }
        })?;

        let mut request = self
            .client
            .request(method.clone(), url)
            .timeout(self.timeout());
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        match body {
            Some(body) => request = request.json(body),
            None if method != reqwest::Method::GET => request = request.json(input),
            None => {}
        }

        let call = async {
            let response = request.send().await?;
            let status = response.status();
            let text = response.text().await?;
            Ok::<_, anyhow::Error>((status, text))
        };
        let (status, text) = with_timeout(entity.clone(), "webhook", self.timeout(), call).await?;

        let response_body = serde_json::from_str::<serde_json::Value>(&text)
            .unwrap_or(serde_json::Value::String(text));
        if !status.is_success() {
            return Err(EngineError::AutomationExecution {
                entity,
                message: format!("webhook {} answered {}", url, status),
            });
        }

        tracing::debug!(url = url, status = status.as_u16(), "Webhook delivered");
        Ok(ActionOutcome {
            output: serde_json::json!({
                "status_code": status.as_u16(),
                "response_body": response_body,
            }),
            partial: false,
        })
    }
}

/// Shallow-merge the keys of `extra` into `target` when both are objects
pub fn merge_object(target: &mut serde_json::Value, extra: &serde_json::Value) {
    let Some(extra) = extra.as_object() else {
        return;
    };
    if target.is_null() {
        *target = serde_json::Value::Object(Default::default());
    }
    if let Some(target) = target.as_object_mut() {
        for (key, value) in extra {
            target.insert(key.clone(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_object() {
        let mut target = serde_json::json!({"a": 1, "b": 2});
        merge_object(&mut target, &serde_json::json!({"b": 3, "c": 4}));
        assert_eq!(target, serde_json::json!({"a": 1, "b": 3, "c": 4}));

        let mut empty = serde_json::Value::Null;
        merge_object(&mut empty, &serde_json::json!({"x": true}));
        assert_eq!(empty["x"], true);

        let mut unchanged = serde_json::json!({"a": 1});
        merge_object(&mut unchanged, &serde_json::json!([1, 2]));
        assert_eq!(unchanged, serde_json::json!({"a": 1}));
    }
}
