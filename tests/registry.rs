//! Registry assembly from configuration

use std::collections::HashMap;
use std::time::Duration;

use serde_json::json;

use roomey::config::file::RoomeyConfigFile;
use roomey::tools::{ToolStatus, build_registry, dispatch};
use roomey::Config;

mod common;

use common::call;

fn config(dir: &tempfile::TempDir, vars: &[(&str, &str)]) -> Config {
    let mut map: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    map.insert(
        "ROOMEY_DATA_DIR".to_string(),
        dir.path().to_string_lossy().into_owned(),
    );
    Config::from_sources(RoomeyConfigFile::default(), move |key| map.get(key).cloned())
}

#[test]
fn test_default_registry_has_builtin_tools() {
    let dir = tempfile::tempdir().unwrap();
    let registry = build_registry(&config(&dir, &[])).unwrap();

    assert_eq!(
        registry.names(),
        vec!["get_reminders", "set_reminder", "manage_reminder", "get_secret_key"]
    );
}

#[test]
fn test_integrations_follow_toggles_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let token = dir.path().join("token.json");
    let config = config(
        &dir,
        &[
            ("GOOGLE_CALENDAR_INTEGRATION", "true"),
            ("GOOGLE_CALENDAR_TOKEN_PATH", token.to_str().unwrap()),
            ("HASS_INTEGRATION", "true"),
            ("HASS_URL", "http://homeassistant.local:8123"),
            ("HASS_TOKEN", "token"),
        ],
    );
    let registry = build_registry(&config).unwrap();

    assert_eq!(
        registry.names(),
        vec![
            "get_reminders",
            "set_reminder",
            "manage_reminder",
            "get_secret_key",
            "get_calendar_events",
            "control_home_entity",
            "control_home_climate",
            "get_home_entities_in_room",
            "find_home_entities_by_name",
        ]
    );
}

#[test]
fn test_home_assistant_without_token_is_not_registered() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(
        &dir,
        &[("HASS_INTEGRATION", "true"), ("HASS_URL", "http://ha:8123")],
    );
    let registry = build_registry(&config).unwrap();
    assert!(registry.resolve("control_home_entity").is_err());
}

#[tokio::test]
async fn test_secret_key_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let registry = build_registry(&config(&dir, &[("SECRET_KEY", "pineapple")])).unwrap();

    let result = dispatch(
        &registry,
        &call("1", "get_secret_key", json!({})),
        Duration::from_secs(5),
    )
    .await;
    assert_eq!(result.status, ToolStatus::Success);
    assert_eq!(result.payload["secret_key"], "pineapple");
}

#[tokio::test]
async fn test_reminders_persist_in_data_dir() {
    let dir = tempfile::tempdir().unwrap();
    let timeout = Duration::from_secs(5);
    let registry = build_registry(&config(&dir, &[])).unwrap();

    let saved = dispatch(
        &registry,
        &call(
            "1",
            "set_reminder",
            json!({ "text": "water the plants", "reminder_time": "tonight" }),
        ),
        timeout,
    )
    .await;
    assert_eq!(saved.message, "Reminder saved: water the plants (tonight)");
    assert!(dir.path().join("reminders.json").exists());

    // A fresh registry reads the same store
    let registry = build_registry(&config(&dir, &[])).unwrap();
    let listed = dispatch(&registry, &call("2", "get_reminders", json!(null)), timeout).await;
    assert_eq!(listed.status, ToolStatus::Success);
    assert_eq!(listed.payload["reminders"][0]["text"], "water the plants");
}
