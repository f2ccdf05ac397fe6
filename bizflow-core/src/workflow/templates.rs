//! Versioned workflow template store

use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult, EntityRef};
use crate::models::{CompanyId, TemplateDraft, WorkflowTemplate};
use crate::workflow::persistence::WorkflowPersistence;
use crate::workflow::validator::WorkflowValidator;

/// Template store
pub struct TemplateStore {
    persistence: Arc<WorkflowPersistence>,
}

impl TemplateStore {
    pub fn new(persistence: Arc<WorkflowPersistence>) -> Self {
        Self { persistence }
    }

    /// Store version 1 of a new template
    pub fn create(&self, draft: TemplateDraft) -> EngineResult<WorkflowTemplate> {
        let id = Uuid::new_v4();
        Self::check(EntityRef::Template(id), &draft)?;

        let template = Self::build(id, id, 1, draft);
        self.persistence.transaction(|store| {
            store.templates.push(template.clone());
            Ok(())
        })?;

        tracing::info!(
            template_id = %template.id,
            name = %template.name,
            tasks = template.template_config.tasks.len(),
            "Template created"
        );
        Ok(template)
    }

    /// Store a new version; the previous version stops being listed
    ///
    /// Workflows already instantiated keep the tasks they copied.
    pub fn revise(&self, template_id: Uuid, draft: TemplateDraft) -> EngineResult<WorkflowTemplate> {
        let entity = EntityRef::Template(template_id);
        Self::check(entity.clone(), &draft)?;

        let revised = self.persistence.transaction(|store| {
            let current = store
                .template(template_id)
                .ok_or_else(|| EngineError::not_found(entity.clone()))?
                .clone();

            let latest = store
                .templates
                .iter()
                .filter(|t| t.lineage_id == current.lineage_id)
                .map(|t| t.version)
                .max()
                .unwrap_or(current.version);
            if latest != current.version {
                return Err(EngineError::invalid_state(
                    entity.clone(),
                    format!("superseded by version {}", latest),
                    "revise",
                ));
            }
            if draft.company_id != current.company_id {
                return Err(EngineError::validation(
                    entity.clone(),
                    "a revision cannot move a template to another company",
                ));
            }

            let revised = Self::build(
                Uuid::new_v4(),
                current.lineage_id,
                current.version + 1,
                draft,
            );
            for template in store
                .templates
                .iter_mut()
                .filter(|t| t.lineage_id == current.lineage_id)
            {
                template.is_active = false;
            }
            store.templates.push(revised.clone());
            Ok(revised)
        })?;

        tracing::info!(
            template_id = %revised.id,
            lineage_id = %revised.lineage_id,
            version = revised.version,
            "Template revised"
        );
        Ok(revised)
    }

    /// Immutable snapshot of one version
    pub fn get(&self, template_id: Uuid) -> EngineResult<WorkflowTemplate> {
        self.persistence
            .read(|store| store.template(template_id).cloned())
            .ok_or_else(|| EngineError::not_found(EntityRef::Template(template_id)))
    }

    /// Active templates of a company
    pub fn list(&self, company_id: CompanyId) -> Vec<WorkflowTemplate> {
        self.persistence.read(|store| {
            let mut templates: Vec<_> = store
                .templates
                .iter()
                .filter(|t| t.company_id == company_id && t.is_active)
                .cloned()
                .collect();
            templates.sort_by(|a, b| a.name.cmp(&b.name));
            templates
        })
    }

    /// Every version sharing a lineage, oldest first
    pub fn versions(&self, lineage_id: Uuid) -> Vec<WorkflowTemplate> {
        self.persistence.read(|store| {
            let mut versions: Vec<_> = store
                .templates
                .iter()
                .filter(|t| t.lineage_id == lineage_id)
                .cloned()
                .collect();
            versions.sort_by_key(|t| t.version);
            versions
        })
    }

    pub fn deactivate(&self, template_id: Uuid) -> EngineResult<()> {
        self.persistence.transaction(|store| {
            let template = store
                .templates
                .iter_mut()
                .find(|t| t.id == template_id)
                .ok_or_else(|| EngineError::not_found(EntityRef::Template(template_id)))?;
            template.is_active = false;
            Ok(())
        })?;
        tracing::info!(template_id = %template_id, "Template deactivated");
        Ok(())
    }

    /// Check a workflow payload against the template's data schema
    pub fn validate_data(
        template: &WorkflowTemplate,
        data: &serde_json::Value,
    ) -> EngineResult<()> {
        let Some(schema) = &template.data_schema else {
            return Ok(());
        };
        let entity = EntityRef::Template(template.id);
        let compiled = jsonschema::JSONSchema::compile(schema).map_err(|e| {
            EngineError::InvalidTemplate {
                entity: entity.clone(),
                reason: format!("invalid data schema: {}", e),
            }
        })?;

        if let Err(errors) = compiled.validate(data) {
            let reasons: Vec<String> = errors
                .map(|e| format!("{} (at '{}')", e, e.instance_path))
                .collect();
            return Err(EngineError::validation(
                entity,
                format!("workflow data rejected: {}", reasons.join("; ")),
            ));
        }
        Ok(())
    }

    fn check(entity: EntityRef, draft: &TemplateDraft) -> EngineResult<()> {
        let result = WorkflowValidator::validate_template(draft);
        for warning in &result.warnings {
            tracing::warn!(entity = %entity, "{}", warning);
        }
        if result.is_valid() {
            Ok(())
        } else {
            Err(EngineError::InvalidTemplate {
                entity,
                reason: result.summary(),
            })
        }
    }

    fn build(id: Uuid, lineage_id: Uuid, version: u32, draft: TemplateDraft) -> WorkflowTemplate {
        WorkflowTemplate {
            id,
            lineage_id,
            company_id: draft.company_id,
            name: draft.name,
            description: draft.description,
            category: draft.category,
            version,
            template_config: draft.template_config,
            default_settings: draft.default_settings,
            data_schema: draft.data_schema,
            is_active: true,
            requires_approval: draft.requires_approval,
            auto_start: draft.auto_start,
            created_by: draft.created_by,
            created_at: Utc::now(),
        }
    }
}
