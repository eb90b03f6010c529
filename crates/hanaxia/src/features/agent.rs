//! Agentic planner: shared goals with generated plans, plus local templates.

use hanaxia_protocol::{AgentDeletePayload, AgentTemplate, AgentUpdatePayload, Goal};
use log::{debug, info};
use thiserror::Error;

use super::{SharedState, generate_id, now_millis};
use crate::genai::{Assistant, GenAiError};
use crate::storage::{self, BlobStore, StorageResult};
use crate::sync::{EventBus, Subscription};

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("goal not found: {0}")]
    UnknownGoal(String),

    #[error("plan generation failed: {0}")]
    GenAi(#[from] GenAiError),
}

/// Goals, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GoalStore {
    goals: Vec<Goal>,
}

impl GoalStore {
    pub fn new(goals: Vec<Goal>) -> Self {
        Self { goals }
    }

    pub fn goals(&self) -> &[Goal] {
        &self.goals
    }

    pub fn get(&self, id: &str) -> Option<&Goal> {
        self.goals.iter().find(|g| g.id == id)
    }

    /// Replace the goal with the same id in place, or insert it at the front.
    pub fn upsert(&mut self, goal: Goal) {
        match self.goals.iter_mut().find(|g| g.id == goal.id) {
            Some(existing) => *existing = goal,
            None => self.goals.insert(0, goal),
        }
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.goals.len();
        self.goals.retain(|g| g.id != id);
        self.goals.len() != before
    }

    /// Attach a plan and return the updated goal.
    pub fn set_plan(&mut self, id: &str, plan: &str) -> Option<Goal> {
        let goal = self.goals.iter_mut().find(|g| g.id == id)?;
        goal.plan = Some(plan.to_string());
        Some(goal.clone())
    }
}

/// Saved goal templates, oldest first. Never synced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateStore {
    templates: Vec<AgentTemplate>,
}

impl TemplateStore {
    pub fn new(templates: Vec<AgentTemplate>) -> Self {
        Self { templates }
    }

    pub fn templates(&self) -> &[AgentTemplate] {
        &self.templates
    }

    pub fn get(&self, id: &str) -> Option<&AgentTemplate> {
        self.templates.iter().find(|t| t.id == id)
    }

    /// Save a new template. Needs a name and at least a title or text.
    pub fn add(&mut self, name: &str, title: &str, text: &str) -> Option<AgentTemplate> {
        let name = name.trim();
        if name.is_empty() || (title.is_empty() && text.is_empty()) {
            return None;
        }
        let template = AgentTemplate {
            id: generate_id(),
            name: name.to_string(),
            title: title.to_string(),
            text: text.to_string(),
        };
        self.templates.push(template.clone());
        Some(template)
    }

    /// Overwrite a template's title and text.
    pub fn update(&mut self, id: &str, title: &str, text: &str) -> bool {
        match self.templates.iter_mut().find(|t| t.id == id) {
            Some(template) => {
                template.title = title.to_string();
                template.text = text.to_string();
                true
            }
            None => false,
        }
    }

    pub fn rename(&mut self, id: &str, name: &str) -> bool {
        let name = name.trim();
        if name.is_empty() {
            return false;
        }
        match self.templates.iter_mut().find(|t| t.id == id) {
            Some(template) => {
                template.name = name.to_string();
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.templates.len();
        self.templates.retain(|t| t.id != id);
        self.templates.len() != before
    }
}

pub struct AgentFeature {
    goals: SharedState<GoalStore>,
    templates: SharedState<TemplateStore>,
    bus: EventBus,
    _subscriptions: [Subscription; 2],
}

impl AgentFeature {
    pub fn mount(bus: &EventBus, goals: GoalStore, templates: TemplateStore) -> Self {
        let goals = SharedState::new(goals);

        let updates = goals.clone();
        let on_update = bus.subscribe::<AgentUpdatePayload, _>(move |payload| {
            debug!("Remote goal update {}", payload.goal.id);
            updates.update(|store| store.upsert(payload.goal.clone()));
        });

        let deletes = goals.clone();
        let on_delete = bus.subscribe::<AgentDeletePayload, _>(move |payload| {
            let removed = deletes.update_with(|store| {
                let removed = store.remove(&payload.id);
                (removed, removed)
            });
            debug!("Remote goal delete {} (present: {})", payload.id, removed);
        });

        Self {
            goals,
            templates: SharedState::new(templates),
            bus: bus.clone(),
            _subscriptions: [on_update, on_delete],
        }
    }

    pub async fn load(storage: &dyn BlobStore) -> StorageResult<(GoalStore, TemplateStore)> {
        let goals: Option<Vec<Goal>> = storage::load_json(storage, storage::GOALS_KEY).await?;
        let templates: Option<Vec<AgentTemplate>> =
            storage::load_json(storage, storage::TEMPLATES_KEY).await?;
        Ok((
            GoalStore::new(goals.unwrap_or_default()),
            TemplateStore::new(templates.unwrap_or_default()),
        ))
    }

    pub async fn persist(&self, storage: &dyn BlobStore) -> StorageResult<()> {
        let goals = self.goals.read(|s| s.goals().to_vec());
        let templates = self.templates.read(|s| s.templates().to_vec());
        storage::save_json(storage, storage::GOALS_KEY, &goals).await?;
        storage::save_json(storage, storage::TEMPLATES_KEY, &templates).await
    }

    pub fn goals(&self) -> &SharedState<GoalStore> {
        &self.goals
    }

    pub fn templates(&self) -> &SharedState<TemplateStore> {
        &self.templates
    }

    /// Create a goal and share it. Both title and text are required.
    pub fn add_goal(&self, title: &str, text: &str) -> Option<Goal> {
        if title.trim().is_empty() || text.trim().is_empty() {
            return None;
        }
        let goal = Goal {
            id: generate_id(),
            title: title.to_string(),
            text: text.to_string(),
            created: now_millis(),
            plan: None,
        };
        self.goals.update(|store| store.upsert(goal.clone()));
        self.bus.send(AgentUpdatePayload { goal: goal.clone() });
        info!("Added goal {}", goal.id);
        Some(goal)
    }

    /// Remove a goal locally and tell peers to do the same.
    pub fn delete_goal(&self, id: &str) -> bool {
        let removed = self.goals.update_with(|store| {
            let removed = store.remove(id);
            (removed, removed)
        });
        self.bus.send(AgentDeletePayload { id: id.to_string() });
        removed
    }

    /// Generate a plan for a goal, attach it, and share the updated goal.
    pub async fn execute_plan(&self, assistant: &Assistant, id: &str) -> Result<Goal, AgentError> {
        let text = self
            .goals
            .read(|store| store.get(id).map(|g| g.text.clone()))
            .ok_or_else(|| AgentError::UnknownGoal(id.to_string()))?;

        let plan = assistant.run_agentic_plan(&text).await?;
        self.publish_plan(id, &plan)
    }

    /// Replace a goal's plan with edited text and share it.
    pub fn save_plan(&self, id: &str, plan: &str) -> Result<Goal, AgentError> {
        self.publish_plan(id, plan)
    }

    fn publish_plan(&self, id: &str, plan: &str) -> Result<Goal, AgentError> {
        let goal = self
            .goals
            .update_with(|store| {
                let goal = store.set_plan(id, plan);
                let changed = goal.is_some();
                (goal, changed)
            })
            .ok_or_else(|| AgentError::UnknownGoal(id.to_string()))?;
        self.bus.send(AgentUpdatePayload { goal: goal.clone() });
        Ok(goal)
    }

    pub fn save_template(&self, name: &str, title: &str, text: &str) -> Option<AgentTemplate> {
        self.templates.update_with(|store| {
            let template = store.add(name, title, text);
            let changed = template.is_some();
            (template, changed)
        })
    }

    pub fn update_template(&self, id: &str, title: &str, text: &str) -> bool {
        self.templates.update_with(|store| {
            let updated = store.update(id, title, text);
            (updated, updated)
        })
    }

    pub fn rename_template(&self, id: &str, name: &str) -> bool {
        self.templates.update_with(|store| {
            let renamed = store.rename(id, name);
            (renamed, renamed)
        })
    }

    pub fn delete_template(&self, id: &str) -> bool {
        self.templates.update_with(|store| {
            let removed = store.remove(id);
            (removed, removed)
        })
    }
}
