//! Reminders backed by a JSON file

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::Mutex;

use crate::tools::{
    ToolCallResult, ToolDeclaration, ToolHandler, ToolRegistry, optional_str, required_str,
};
use crate::{Error, Result};

/// A saved reminder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reminder {
    pub id: u64,
    pub text: String,

    /// Free-form time as spoken ("tomorrow at 3pm")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reminder_time: Option<String>,

    pub created_at: String,

    #[serde(default)]
    pub completed: bool,
}

/// JSON file store; every operation reads and rewrites the whole file
pub struct ReminderStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl ReminderStore {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<Vec<Reminder>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) if raw.trim().is_empty() => Ok(Vec::new()),
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, reminders: &[Reminder]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let raw = serde_json::to_string_pretty(reminders)?;
        tokio::fs::write(&self.path, raw).await?;
        Ok(())
    }

    /// All reminders in creation order
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub async fn list(&self) -> Result<Vec<Reminder>> {
        let _guard = self.lock.lock().await;
        self.load().await
    }

    /// Add a reminder and return it
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or written
    pub async fn add(&self, text: &str, reminder_time: Option<&str>) -> Result<Reminder> {
        let _guard = self.lock.lock().await;
        let mut reminders = self.load().await?;

        let reminder = Reminder {
            id: reminders.iter().map(|r| r.id).max().unwrap_or(0) + 1,
            text: text.to_string(),
            reminder_time: reminder_time.map(str::to_string),
            created_at: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            completed: false,
        };
        reminders.push(reminder.clone());
        self.save(&reminders).await?;

        tracing::info!(id = reminder.id, "saved reminder");
        Ok(reminder)
    }

    /// Apply `action` to the reminder with `id`
    ///
    /// Returns `None` if no reminder has that id.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or written
    pub async fn update(&self, id: u64, action: &ReminderAction) -> Result<Option<Reminder>> {
        let _guard = self.lock.lock().await;
        let mut reminders = self.load().await?;

        let Some(index) = reminders.iter().position(|r| r.id == id) else {
            return Ok(None);
        };

        let affected = match action {
            ReminderAction::Complete => {
                reminders[index].completed = true;
                reminders[index].clone()
            }
            ReminderAction::Delete => reminders.remove(index),
            ReminderAction::Edit {
                text,
                reminder_time,
            } => {
                let reminder = &mut reminders[index];
                if let Some(text) = text {
                    reminder.text.clone_from(text);
                }
                if let Some(time) = reminder_time {
                    reminder.reminder_time = Some(time.clone());
                }
                reminder.clone()
            }
        };

        self.save(&reminders).await?;
        Ok(Some(affected))
    }
}

/// Change requested through `manage_reminder`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReminderAction {
    Complete,
    Delete,
    Edit {
        text: Option<String>,
        reminder_time: Option<String>,
    },
}

impl ReminderAction {
    fn past_tense(&self) -> &'static str {
        match self {
            Self::Complete => "completed",
            Self::Delete => "deleted",
            Self::Edit { .. } => "updated",
        }
    }
}

/// Accept ids the model sends as numbers or numeric strings
fn reminder_id(args: &Value) -> Result<u64> {
    let id = match args.get("id") {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    };
    id.ok_or_else(|| Error::Tool("missing or invalid reminder id".to_string()))
}

/// `get_reminders`
pub struct GetRemindersTool {
    store: Arc<ReminderStore>,
}

#[async_trait]
impl ToolHandler for GetRemindersTool {
    async fn invoke(&self, _args: Value) -> Result<ToolCallResult> {
        let reminders = self.store.list().await?;
        let pending = reminders.iter().filter(|r| !r.completed).count();

        let message = if reminders.is_empty() {
            "You have no reminders.".to_string()
        } else {
            format!("You have {pending} pending of {} reminders.", reminders.len())
        };
        Ok(ToolCallResult::success(json!({ "reminders": reminders }), message))
    }
}

/// `set_reminder`
pub struct SetReminderTool {
    store: Arc<ReminderStore>,
}

#[async_trait]
impl ToolHandler for SetReminderTool {
    async fn invoke(&self, args: Value) -> Result<ToolCallResult> {
        let text = required_str(&args, "text")?;
        let reminder = self
            .store
            .add(text, optional_str(&args, "reminder_time"))
            .await?;

        let message = match &reminder.reminder_time {
            Some(time) => format!("Reminder saved: {} ({time})", reminder.text),
            None => format!("Reminder saved: {}", reminder.text),
        };
        Ok(ToolCallResult::success(json!({ "reminder": reminder }), message))
    }
}

/// `manage_reminder`
pub struct ManageReminderTool {
    store: Arc<ReminderStore>,
}

#[async_trait]
impl ToolHandler for ManageReminderTool {
    async fn invoke(&self, args: Value) -> Result<ToolCallResult> {
        let id = reminder_id(&args)?;
        let action = match required_str(&args, "action")? {
            "complete" => ReminderAction::Complete,
            "delete" => ReminderAction::Delete,
            "edit" => {
                let text = optional_str(&args, "text").map(str::to_string);
                let reminder_time = optional_str(&args, "reminder_time").map(str::to_string);
                if text.is_none() && reminder_time.is_none() {
                    return Ok(ToolCallResult::error(
                        "Provide new text or a new reminder_time to edit a reminder",
                    ));
                }
                ReminderAction::Edit {
                    text,
                    reminder_time,
                }
            }
            other => {
                return Ok(ToolCallResult::error(format!(
                    "Invalid action: {other}. Valid actions are: complete, delete, edit"
                )));
            }
        };

        Ok(match self.store.update(id, &action).await? {
            Some(reminder) => ToolCallResult::success(
                json!({ "reminder": reminder }),
                format!("Reminder {id} {}.", action.past_tense()),
            ),
            None => ToolCallResult::error(format!("No reminder with id {id}")),
        })
    }
}

/// Register the reminder tools
///
/// # Errors
///
/// Returns error if the registry rejects a name
pub fn register(registry: &mut ToolRegistry, store: &Arc<ReminderStore>) -> Result<()> {
    registry.register(
        ToolDeclaration::without_parameters(
            "get_reminders",
            "Gets the user's saved reminders",
        ),
        Arc::new(GetRemindersTool {
            store: Arc::clone(store),
        }),
    )?;

    registry.register(
        ToolDeclaration::new(
            "set_reminder",
            "Saves a new reminder with an optional reminder time (e.g., 'tomorrow at 3pm')",
            json!({
                "type": "object",
                "properties": {
                    "text": {
                        "type": "string",
                        "description": "What to be reminded about"
                    },
                    "reminder_time": {
                        "type": "string",
                        "description": "When to be reminded, as the user said it"
                    }
                },
                "required": ["text"]
            }),
        ),
        Arc::new(SetReminderTool {
            store: Arc::clone(store),
        }),
    )?;

    registry.register(
        ToolDeclaration::new(
            "manage_reminder",
            "Complete, delete or edit one of the user's reminders",
            json!({
                "type": "object",
                "properties": {
                    "action": {
                        "type": "string",
                        "enum": ["complete", "delete", "edit"],
                        "description": "What to do with the reminder"
                    },
                    "id": {
                        "type": "integer",
                        "description": "Reminder id as returned by get_reminders"
                    },
                    "text": {
                        "type": "string",
                        "description": "New text (edit only)"
                    },
                    "reminder_time": {
                        "type": "string",
                        "description": "New reminder time (edit only)"
                    }
                },
                "required": ["action", "id"]
            }),
        ),
        Arc::new(ManageReminderTool {
            store: Arc::clone(store),
        }),
    )
}
