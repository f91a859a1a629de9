//! Home Assistant integration
//!
//! REST client for a Home Assistant instance plus the four tools the model
//! uses to inspect and control entities.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use super::check_status;
use crate::tools::{
    ToolCallResult, ToolDeclaration, ToolHandler, ToolRegistry, optional_str, required_str,
};
use crate::{Error, Result};

/// Entity state as returned by `/api/states`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EntityState {
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    pub last_updated: Option<String>,
}

impl EntityState {
    /// Friendly name, falling back to the entity id
    #[must_use]
    pub fn friendly_name(&self) -> &str {
        self.attributes
            .get("friendly_name")
            .and_then(Value::as_str)
            .unwrap_or(&self.entity_id)
    }

    /// Domain prefix of the entity id (`light`, `switch`, ...)
    #[must_use]
    pub fn domain(&self) -> &str {
        domain_of(&self.entity_id)
    }

    /// Compact summary with the domain-specific attributes worth reading out
    #[must_use]
    pub fn info(&self) -> Value {
        let mut info = json!({
            "entity_id": self.entity_id,
            "state": self.state,
            "friendly_name": self.friendly_name(),
            "last_updated": self.last_updated,
            "domain": self.domain(),
        });

        let keys: &[&str] = match self.domain() {
            "light" => &["brightness", "rgb_color", "color_temp"],
            "climate" => &["temperature", "current_temperature", "hvac_mode", "hvac_action"],
            "sensor" => &["unit_of_measurement"],
            "switch" => &["current_power_w", "voltage"],
            _ => &[],
        };
        for key in keys {
            if let Some(value) = self.attributes.get(*key) {
                info[*key] = value.clone();
            }
        }

        if let Some(pct) = self.brightness_pct() {
            info["brightness_pct"] = json!(pct);
        }

        info
    }

    /// One-line spoken summary
    #[must_use]
    pub fn describe(&self) -> String {
        let mut line = format!("Status of {}: {}", self.friendly_name(), self.state);
        match self.domain() {
            "light" => {
                if let Some(pct) = self.brightness_pct() {
                    line.push_str(&format!(", brightness: {pct:.0}%"));
                }
            }
            "climate" => {
                if let Some(current) = self.attributes.get("current_temperature") {
                    line.push_str(&format!(", current temperature: {current}"));
                }
                if let Some(target) = self.attributes.get("temperature") {
                    line.push_str(&format!(", set to: {target}"));
                }
            }
            _ => {}
        }
        line
    }

    fn brightness_pct(&self) -> Option<f64> {
        self.attributes
            .get("brightness")
            .and_then(Value::as_f64)
            .map(|b| (b / 255.0 * 100.0).round())
    }

    fn brief(&self) -> Value {
        json!({
            "entity_id": self.entity_id,
            "friendly_name": self.friendly_name(),
            "state": self.state,
        })
    }
}

fn domain_of(entity_id: &str) -> &str {
    entity_id.split('.').next().unwrap_or(entity_id)
}

/// Whether an entity matches a name query
///
/// Matching is case-insensitive against the friendly name and the entity id.
/// Spaces in the query also match underscores in ids.
#[must_use]
pub fn matches_name(entity: &EntityState, query: &str, exact: bool) -> bool {
    let query = query.trim().to_lowercase();
    let id_query = query.replace(' ', "_");
    let friendly = entity.friendly_name().to_lowercase();
    let id = entity.entity_id.to_lowercase();

    if exact {
        friendly == query || id == query || id.split_once('.').is_some_and(|(_, obj)| obj == id_query)
    } else {
        friendly.contains(&query) || id.contains(&query) || id.contains(&id_query)
    }
}

/// Home Assistant REST client
#[derive(Debug, Clone)]
pub struct HomeAssistantClient {
    client: Client,
    base_url: String,
    token: String,
}

impl HomeAssistantClient {
    /// Create a client
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(base_url: &str, token: &str) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    /// All entity states
    ///
    /// # Errors
    ///
    /// Returns error if the request fails
    pub async fn states(&self) -> Result<Vec<EntityState>> {
        let url = format!("{}/api/states", self.base_url);
        let response = self.client.get(&url).bearer_auth(&self.token).send().await?;
        Ok(check_status("Home Assistant", response).await?.json().await?)
    }

    /// State of one entity
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the entity does not exist
    pub async fn state(&self, entity_id: &str) -> Result<EntityState> {
        let url = format!("{}/api/states/{entity_id}", self.base_url);
        let response = self.client.get(&url).bearer_auth(&self.token).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::Integration(format!("entity not found: {entity_id}")));
        }
        Ok(check_status("Home Assistant", response).await?.json().await?)
    }

    /// Call `domain.service` with `data`
    ///
    /// # Errors
    ///
    /// Returns error if the request fails
    pub async fn call_service(&self, domain: &str, service: &str, data: &Value) -> Result<()> {
        let url = format!("{}/api/services/{domain}/{service}", self.base_url);
        tracing::debug!(domain, service, "calling home assistant service");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(data)
            .send()
            .await?;
        check_status("Home Assistant", response).await?;
        Ok(())
    }
}

/// `control_home_entity`
pub struct ControlEntityTool {
    client: Arc<HomeAssistantClient>,
}

impl ControlEntityTool {
    #[must_use]
    pub fn declaration() -> ToolDeclaration {
        ToolDeclaration::new(
            "control_home_entity",
            "Control a Home Assistant entity (turn on/off, toggle, get status)",
            json!({
                "type": "object",
                "properties": {
                    "entity_id": {
                        "type": "string",
                        "description": "The entity ID to control (e.g., 'switch.speaker', 'light.office_light')"
                    },
                    "action": {
                        "type": "string",
                        "enum": ["on", "off", "toggle", "status"],
                        "description": "Action to perform on the entity"
                    }
                },
                "required": ["entity_id", "action"]
            }),
        )
    }
}

#[async_trait]
impl ToolHandler for ControlEntityTool {
    async fn invoke(&self, args: Value) -> Result<ToolCallResult> {
        let entity_id = required_str(&args, "entity_id")?;
        let action = required_str(&args, "action")?;

        let (service, verb) = match action {
            "status" => {
                let state = self.client.state(entity_id).await?;
                return Ok(ToolCallResult::success(
                    json!({ "details": state.info() }),
                    state.describe(),
                ));
            }
            "on" => ("turn_on", "Turned on"),
            "off" => ("turn_off", "Turned off"),
            "toggle" => ("toggle", "Toggled"),
            other => {
                return Ok(ToolCallResult::error(format!(
                    "Invalid action: {other}. Valid actions are: on, off, toggle, status"
                )));
            }
        };

        let before = self.client.state(entity_id).await?;
        self.client
            .call_service(before.domain(), service, &json!({ "entity_id": entity_id }))
            .await?;
        let after = self.client.state(entity_id).await?;

        Ok(ToolCallResult::success(
            json!({
                "entity_id": entity_id,
                "previous_state": before.state,
                "new_state": after.state,
            }),
            format!(
                "{verb} {} ({entity_id}). Previous state: {}, new state: {}",
                before.friendly_name(),
                before.state,
                after.state
            ),
        ))
    }
}

/// `control_home_climate`
pub struct ControlClimateTool {
    client: Arc<HomeAssistantClient>,
}

impl ControlClimateTool {
    #[must_use]
    pub fn declaration() -> ToolDeclaration {
        ToolDeclaration::new(
            "control_home_climate",
            "Control a Home Assistant climate entity (set temperature, HVAC mode)",
            json!({
                "type": "object",
                "properties": {
                    "entity_id": {
                        "type": "string",
                        "description": "The climate entity ID (e.g., 'climate.air_conditioner')"
                    },
                    "temperature": {
                        "type": "number",
                        "description": "Temperature to set (in degrees)"
                    },
                    "hvac_mode": {
                        "type": "string",
                        "enum": ["heat", "cool", "auto", "off", "fan_only", "dry"],
                        "description": "HVAC mode to set"
                    }
                },
                "required": ["entity_id"]
            }),
        )
    }
}

/// Service data for a climate change, or `None` when nothing was requested
fn climate_request(entity_id: &str, args: &Value) -> Option<Value> {
    let temperature = args.get("temperature").and_then(Value::as_f64);
    let hvac_mode = optional_str(args, "hvac_mode");
    if temperature.is_none() && hvac_mode.is_none() {
        return None;
    }

    let mut data = json!({ "entity_id": entity_id });
    if let Some(t) = temperature {
        data["temperature"] = json!(t);
    }
    if let Some(mode) = hvac_mode {
        data["hvac_mode"] = json!(mode);
    }
    Some(data)
}

#[async_trait]
impl ToolHandler for ControlClimateTool {
    async fn invoke(&self, args: Value) -> Result<ToolCallResult> {
        let entity_id = required_str(&args, "entity_id")?;
        if !entity_id.starts_with("climate.") {
            return Ok(ToolCallResult::error(format!(
                "Error: {entity_id} is not a climate entity"
            )));
        }

        let Some(data) = climate_request(entity_id, &args) else {
            return Ok(ToolCallResult::error(
                "Provide a temperature or an hvac_mode to change",
            ));
        };

        let before = self.client.state(entity_id).await?;
        self.client
            .call_service("climate", "set_temperature", &data)
            .await?;
        let after = self.client.state(entity_id).await?;

        let mut message = format!("Set {} ({entity_id}).", before.friendly_name());
        if let Some(t) = data.get("temperature") {
            message.push_str(&format!(" Temperature: {t}."));
        }
        if let Some(mode) = data.get("hvac_mode").and_then(Value::as_str) {
            message.push_str(&format!(" Mode: {mode}."));
        }
        message.push_str(&format!(
            " Previous state: {}, new state: {}",
            before.state, after.state
        ));

        Ok(ToolCallResult::success(
            json!({ "details": after.info() }),
            message,
        ))
    }
}

/// `get_home_entities_in_room`
pub struct EntitiesInRoomTool {
    client: Arc<HomeAssistantClient>,
}

impl EntitiesInRoomTool {
    #[must_use]
    pub fn declaration() -> ToolDeclaration {
        ToolDeclaration::new(
            "get_home_entities_in_room",
            "Find Home Assistant entities in a specific room",
            json!({
                "type": "object",
                "properties": {
                    "room": {
                        "type": "string",
                        "description": "Room name to search for (e.g., 'office', 'bedroom', 'study')"
                    }
                },
                "required": ["room"]
            }),
        )
    }
}

#[async_trait]
impl ToolHandler for EntitiesInRoomTool {
    async fn invoke(&self, args: Value) -> Result<ToolCallResult> {
        let room = required_str(&args, "room")?;
        let states = self.client.states().await?;
        let found: Vec<Value> = states
            .iter()
            .filter(|e| matches_name(e, room, false))
            .map(EntityState::brief)
            .collect();

        let message = if found.is_empty() {
            format!("No entities found in {room}")
        } else {
            format!("Found {} entities in {room}", found.len())
        };
        Ok(ToolCallResult::success(json!({ "entities": found }), message))
    }
}

/// `find_home_entities_by_name`
pub struct FindEntitiesTool {
    client: Arc<HomeAssistantClient>,
}

impl FindEntitiesTool {
    #[must_use]
    pub fn declaration() -> ToolDeclaration {
        ToolDeclaration::new(
            "find_home_entities_by_name",
            "Find Home Assistant entities by name",
            json!({
                "type": "object",
                "properties": {
                    "name": {
                        "type": "string",
                        "description": "Name to search for (e.g., 'speaker', 'office light', 'switch')"
                    },
                    "exact": {
                        "type": "boolean",
                        "description": "If true, require exact name match"
                    }
                },
                "required": ["name"]
            }),
        )
    }
}

#[async_trait]
impl ToolHandler for FindEntitiesTool {
    async fn invoke(&self, args: Value) -> Result<ToolCallResult> {
        let name = required_str(&args, "name")?;
        let exact = args.get("exact").and_then(Value::as_bool).unwrap_or(false);

        let states = self.client.states().await?;
        let found: Vec<Value> = states
            .iter()
            .filter(|e| matches_name(e, name, exact))
            .map(EntityState::brief)
            .collect();

        let message = if found.is_empty() {
            format!("No entities found matching '{name}'")
        } else {
            format!("Found {} entities matching '{name}'", found.len())
        };
        Ok(ToolCallResult::success(json!({ "entities": found }), message))
    }
}

/// Register the Home Assistant tools
///
/// # Errors
///
/// Returns error if the registry rejects a name
pub fn register(registry: &mut ToolRegistry, client: &Arc<HomeAssistantClient>) -> Result<()> {
    registry.register(
        ControlEntityTool::declaration(),
        Arc::new(ControlEntityTool {
            client: Arc::clone(client),
        }),
    )?;
    registry.register(
        ControlClimateTool::declaration(),
        Arc::new(ControlClimateTool {
            client: Arc::clone(client),
        }),
    )?;
    registry.register(
        EntitiesInRoomTool::declaration(),
        Arc::new(EntitiesInRoomTool {
            client: Arc::clone(client),
        }),
    )?;
    registry.register(
        FindEntitiesTool::declaration(),
        Arc::new(FindEntitiesTool {
            client: Arc::clone(client),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(id: &str, friendly: &str, state: &str) -> EntityState {
        serde_json::from_value(json!({
            "entity_id": id,
            "state": state,
            "attributes": { "friendly_name": friendly },
        }))
        .unwrap()
    }

    #[test]
    fn fuzzy_match_checks_name_and_id() {
        let lamp = entity("light.living_room_lamp", "Reading Lamp", "on");
        assert!(matches_name(&lamp, "living room", false));
        assert!(matches_name(&lamp, "reading", false));
        assert!(!matches_name(&lamp, "kitchen", false));
    }

    #[test]
    fn exact_match_requires_whole_name() {
        let lamp = entity("light.office", "Office Light", "off");
        assert!(matches_name(&lamp, "office light", true));
        assert!(matches_name(&lamp, "light.office", true));
        assert!(matches_name(&lamp, "office", true));
        assert!(!matches_name(&lamp, "offi", true));
    }

    #[test]
    fn light_info_includes_brightness_percent() {
        let mut lamp = entity("light.desk", "Desk", "on");
        lamp.attributes.insert("brightness".to_string(), json!(255));

        let info = lamp.info();
        assert_eq!(info["domain"], "light");
        assert_eq!(info["brightness_pct"], 100.0);
        assert_eq!(lamp.describe(), "Status of Desk: on, brightness: 100%");
    }

    #[test]
    fn climate_request_needs_a_change() {
        assert!(climate_request("climate.ac", &json!({})).is_none());

        let data = climate_request("climate.ac", &json!({ "temperature": 21, "hvac_mode": "cool" })).unwrap();
        assert_eq!(data["temperature"], 21.0);
        assert_eq!(data["hvac_mode"], "cool");
        assert_eq!(data["entity_id"], "climate.ac");
    }

    #[tokio::test]
    async fn climate_tool_rejects_other_domains() {
        let client = Arc::new(HomeAssistantClient::new("http://127.0.0.1:9", "token").unwrap());
        let tool = ControlClimateTool { client };

        let result = tool
            .invoke(json!({ "entity_id": "light.office", "temperature": 20 }))
            .await
            .unwrap();
        assert!(!result.is_success());
        assert_eq!(result.message, "Error: light.office is not a climate entity");
    }

    #[test]
    fn friendly_name_falls_back_to_id() {
        let bare: EntityState = serde_json::from_value(json!({
            "entity_id": "switch.fan",
            "state": "off",
        }))
        .unwrap();
        assert_eq!(bare.friendly_name(), "switch.fan");
    }
}
