//! Tool registry: name to handler, in advertised order

use std::sync::Arc;

use indexmap::IndexMap;

use super::{SecretKeyTool, ToolDeclaration, ToolHandler};
use crate::config::Config;
use crate::integrations;
use crate::{Error, Result};

struct Entry {
    declaration: ToolDeclaration,
    handler: Arc<dyn ToolHandler>,
}

/// Registry of callable tools
///
/// Registration order is the order declarations are advertised to the model.
#[derive(Default)]
pub struct ToolRegistry {
    tools: IndexMap<String, Entry>,
    strict: bool,
}

impl ToolRegistry {
    /// Create an empty registry where re-registering a name replaces it
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty registry that rejects duplicate names
    #[must_use]
    pub fn strict() -> Self {
        Self {
            tools: IndexMap::new(),
            strict: true,
        }
    }

    /// Register a tool
    ///
    /// A name that is already registered is replaced in place, keeping its
    /// original position.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateTool` on a strict registry if the name exists
    pub fn register(
        &mut self,
        declaration: ToolDeclaration,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<()> {
        let name = declaration.name.clone();
        let entry = Entry {
            declaration,
            handler,
        };

        if let Some(existing) = self.tools.get_mut(&name) {
            if self.strict {
                return Err(Error::DuplicateTool(name));
            }
            tracing::warn!(tool = %name, "tool registered twice, replacing earlier handler");
            *existing = entry;
            return Ok(());
        }

        tracing::debug!(tool = %name, "registered tool");
        self.tools.insert(name, entry);
        Ok(())
    }

    /// Look up the handler for a tool
    ///
    /// # Errors
    ///
    /// Returns `ToolNotFound` if no tool has this name
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn ToolHandler>> {
        self.tools
            .get(name)
            .map(|entry| Arc::clone(&entry.handler))
            .ok_or_else(|| Error::ToolNotFound(name.to_string()))
    }

    /// All declarations in registration order
    #[must_use]
    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        self.tools
            .values()
            .map(|entry| entry.declaration.clone())
            .collect()
    }

    /// Remove the tool named `name`
    ///
    /// Returns whether it was registered. Remaining tools keep their order.
    pub fn unregister(&mut self, name: &str) -> bool {
        let removed = self.tools.shift_remove(name).is_some();
        if removed {
            tracing::info!(tool = %name, "unregistered tool");
        }
        removed
    }

    /// Tool names in registration order
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Build the registry of statically declared tools
///
/// Reminders and the secret-key diagnostic are always present; calendar,
/// Home Assistant and the post generator follow the integration toggles.
/// MCP tools are added later by the launcher.
///
/// # Errors
///
/// Returns error if an integration client cannot be constructed
pub fn build_registry(config: &Config) -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    let integrations_config = &config.integrations;

    let reminders = Arc::new(integrations::reminders::ReminderStore::new(
        integrations_config.reminders_path.clone(),
    ));
    integrations::reminders::register(&mut registry, &reminders)?;

    registry.register(
        SecretKeyTool::declaration(),
        Arc::new(SecretKeyTool::new(integrations_config.secret_key.clone())),
    )?;

    if let Some(calendar) = &integrations_config.calendar {
        let source = integrations::calendar::GoogleCalendar::new(
            calendar.token_path.clone(),
            calendar.calendar_id.clone(),
        )?;
        integrations::calendar::register(&mut registry, Arc::new(source))?;
    }

    if let Some(ha) = &integrations_config.home_assistant {
        let client = integrations::home_assistant::HomeAssistantClient::new(&ha.url, &ha.token)?;
        integrations::home_assistant::register(&mut registry, &Arc::new(client))?;
    }

    if let Some(post) = &integrations_config.post_generator {
        let generator = integrations::post_generator::PostGenerator::new(
            &post.api_key,
            &post.model,
            post.posts_dir.clone(),
        )?;
        integrations::post_generator::register(&mut registry, Arc::new(generator))?;
    }

    tracing::info!(tools = registry.len(), "built tool registry");
    Ok(registry)
}
