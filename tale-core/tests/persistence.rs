//! Integration tests for saving, loading and restoring scenes.

use std::path::Path;
use std::sync::Arc;
use tale_core::error::PersistError;
use tale_core::history::ArchiveEntry;
use tale_core::message::MessageKind;
use tale_core::persist::{list_saves, SAVE_VERSION};
use tale_core::testing::{MockAgent, ScriptedInput};
use tale_core::{Actor, Character, HistoryStore, IsoDuration, Message, SaveMode, SavedScene, Scene, SceneError};
use tempfile::TempDir;

async fn tavern(dir: &Path) -> Scene {
    let mut backstory = HistoryStore::new();
    backstory
        .push_archive(ArchiveEntry::backstory("The tavern burned down once.", None))
        .expect("Failed to add backstory");

    let agent = Arc::new(MockAgent::new());
    let mut scene = Scene::new(agent.agents(), Arc::new(ScriptedInput::new()))
        .with_save_dir(dir)
        .with_name("Tavern")
        .with_history(backstory);
    scene
        .add_actor(Actor::player(Character::new("Kai")))
        .await
        .expect("Failed to add player");
    scene
        .add_actor(Actor::npc(Character::new("Bob")))
        .await
        .expect("Failed to add npc");
    scene
}

// =============================================================================
// Round trips
// =============================================================================

#[tokio::test]
async fn test_save_and_load_preserves_scene() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let mut scene = tavern(temp_dir.path()).await;
    scene
        .push_history([
            Message::player("Kai: Evening."),
            Message::time_passage(IsoDuration::days(2), "Two days pass."),
            Message::character("Bob: You're back."),
        ])
        .expect("Failed to push history");
    assert_eq!(scene.history().clock(), IsoDuration::days(2));

    scene
        .save(SaveMode::SaveAs("Tavern Night".into()))
        .await
        .expect("Failed to save");
    assert_eq!(scene.filename(), Some("tavern-night.json"));

    let agent = Arc::new(MockAgent::new());
    let mut loaded =
        Scene::new(agent.agents(), Arc::new(ScriptedInput::new())).with_save_dir(temp_dir.path());
    loaded
        .load("tavern-night.json")
        .await
        .expect("Failed to load");

    assert_eq!(loaded.history().messages(), scene.history().messages());
    assert_eq!(loaded.history().archived(), scene.history().archived());
    assert_eq!(loaded.history().clock(), IsoDuration::days(2));
    assert_eq!(
        loaded.player_character().map(|c| c.name.as_str()),
        Some("Kai")
    );
    assert_eq!(loaded.npc_names(), vec!["Bob"]);
    assert!(loaded.is_saved());

    // loading always moves to a fresh memory store
    assert_ne!(loaded.memory_id(), scene.memory_id());
}

#[tokio::test]
async fn test_list_saves_and_peek_metadata() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let mut scene = tavern(temp_dir.path()).await;
    scene
        .push_history([Message::player("Kai: One.")])
        .expect("Failed to push history");
    scene
        .save(SaveMode::SaveAs("first".into()))
        .await
        .expect("Failed to save first");

    scene
        .push_history([Message::time_passage(IsoDuration::hours(3), "Later.")])
        .expect("Failed to push history");
    scene
        .save(SaveMode::SaveAs("second".into()))
        .await
        .expect("Failed to save second");

    let saves = list_saves(temp_dir.path())
        .await
        .expect("Failed to list saves");
    assert_eq!(saves.len(), 2);
    assert!(saves.iter().all(|s| s.metadata.name == "Tavern"));

    let second = SavedScene::peek_metadata(temp_dir.path().join("second.json"))
        .await
        .expect("Failed to peek metadata");
    assert_eq!(second.message_count, 2);
    assert_eq!(second.scene_time, "3 hours");
    assert_eq!(second.player_character.as_deref(), Some("Kai"));
    assert_eq!(second.characters, vec!["Kai", "Bob"]);

    let first = SavedScene::peek_metadata(temp_dir.path().join("first.json"))
        .await
        .expect("Failed to peek metadata");
    assert_eq!(first.scene_time, "Start");
}

#[tokio::test]
async fn test_restore_into_new_save() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let mut scene = tavern(temp_dir.path()).await;
    scene
        .push_history([Message::player("Kai: Start here.")])
        .expect("Failed to push history");
    scene
        .save(SaveMode::SaveAs("start".into()))
        .await
        .expect("Failed to save");
    scene.set_restore_from("start.json");

    scene
        .push_history([Message::character("Bob: Things happened.")])
        .expect("Failed to push history");
    scene
        .restore(Some("branch"))
        .await
        .expect("Failed to restore");

    assert_eq!(scene.filename(), Some("branch.json"));
    assert_eq!(scene.history().len(), 1);
    // backstory survives the reset
    assert_eq!(scene.history().archived().len(), 1);

    let branch = SavedScene::load_json(temp_dir.path().join("branch.json"))
        .await
        .expect("Branch save should exist");
    assert_eq!(branch.history.len(), 1);
    assert_eq!(branch.restore_from.as_deref(), Some("start.json"));
}

// =============================================================================
// Save documents
// =============================================================================

const HANDWRITTEN: &str = r#"{
    "version": 1,
    "saved_at": "2024-05-01T12:00:00+00:00",
    "name": "Harbor",
    "intro": "Gulls circle over {{user}}.",
    "history": [
        {"id": 1, "message": "Kai: Any ships today?", "source": "player", "typ": "character"},
        {"id": 2, "message": "Two days later.", "source": "manual", "typ": "time", "ts": "P2D"},
        {"id": 3, "message": "Director instructs Bob: greet Kai", "source": "Bob", "typ": "director"},
        {"id": 4, "message": "Bob: Welcome back.", "source": "ai", "typ": "character"}
    ],
    "archived_history": [
        {"text": "Kai arrived by boat.", "ts": "PT6H", "start": 0, "end": 1}
    ],
    "characters": [
        {"name": "Kai", "is_player": true},
        {"name": "Bob"}
    ],
    "memory_id": "6f1c2b1e-8a4d-4c2a-9a57-3f8e2c1d0b9a",
    "memory_session_id": "0d3e6a52-1b7f-4e60-8c1d-2a9b4f7e5c31",
    "ts": "P2D",
    "metadata": {
        "name": "Harbor",
        "player_character": "Kai",
        "characters": ["Kai", "Bob"],
        "message_count": 4,
        "scene_time": "2 days"
    }
}"#;

#[tokio::test]
async fn test_handwritten_document_loads() {
    let saved = SavedScene::from_json(HANDWRITTEN).expect("Failed to parse save");
    assert_eq!(saved.version, SAVE_VERSION);
    assert_eq!(saved.count(MessageKind::TimePassage), 1);
    assert_eq!(saved.count(MessageKind::Director), 1);

    let director = &saved.history[2];
    assert_eq!(director.character_name().as_deref(), Some("Bob"));
    assert_eq!(
        director.as_story_progression().as_deref(),
        Some("Bob's next action: greet Kai")
    );

    let mut store = saved.history_store();
    assert_eq!(store.clock(), IsoDuration::days(2));
    // the summary ends at message 1, so only the later jump replays
    let synced = store.sync_time().expect("Failed to sync time");
    assert_eq!(synced, IsoDuration::parse("P2DT6H").expect("valid duration"));

    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    tokio::fs::write(temp_dir.path().join("harbor.json"), HANDWRITTEN)
        .await
        .expect("Failed to write save");

    let agent = Arc::new(MockAgent::new());
    let mut scene =
        Scene::new(agent.agents(), Arc::new(ScriptedInput::new())).with_save_dir(temp_dir.path());
    scene.load("harbor.json").await.expect("Failed to load");

    assert_eq!(scene.get_intro(None), "Gulls circle over Kai.");
    let ids = scene
        .push_history([Message::character("Bob: More tea?")])
        .expect("Failed to push history");
    assert!(ids[0].get() > 4);
}

#[tokio::test]
async fn test_unsupported_version_is_rejected() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let future = HANDWRITTEN.replacen("\"version\": 1", "\"version\": 7", 1);
    tokio::fs::write(temp_dir.path().join("future.json"), future)
        .await
        .expect("Failed to write save");

    let agent = Arc::new(MockAgent::new());
    let mut scene =
        Scene::new(agent.agents(), Arc::new(ScriptedInput::new())).with_save_dir(temp_dir.path());
    let result = scene.load("future.json").await;

    assert!(matches!(
        result,
        Err(SceneError::Persist(PersistError::VersionMismatch { found: 7, .. }))
    ));
    assert!(scene.history().is_empty());
    assert_eq!(scene.filename(), None);
}
