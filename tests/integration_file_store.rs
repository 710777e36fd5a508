//! File-backed store through the public service API

use pixsync::{Grid, ServerConfig, SlotStore, SyncRegistry, SyncStatus};

fn services(config: &ServerConfig) -> (SlotStore, SyncRegistry) {
    let store = pixsync::open_store(config).expect("open store");
    let registry = SyncRegistry::new(store.clone());
    (SlotStore::new(store, registry.clone()), registry)
}

#[test]
fn slots_and_versions_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = ServerConfig {
        data_path: Some(dir.path().join("pixsync.json")),
        ..Default::default()
    };

    let mut heart = Grid::empty();
    heart.set(1, 2, Some("#e0115f".into()));
    heart.set(1, 5, Some("#e0115f".into()));

    let before = {
        let (slots, registry) = services(&config);
        slots.list_slots().unwrap();
        slots
            .save_slot(Some(10), Some("Heart".into()), Some(heart.clone()))
            .unwrap();
        registry.set_device_version(1).unwrap();
        slots.list_slots().unwrap()
    };

    let (slots, registry) = services(&config);
    let after = slots.list_slots().unwrap();
    assert_eq!(before, after);
    assert_eq!(after[9].grid, heart);

    let state = registry.get_state().unwrap();
    assert_eq!((state.web_version, state.device_version), (1, 1));
    assert_eq!(state.status(), SyncStatus::Synced);
}

#[test]
fn memory_store_when_no_path() {
    let (slots, registry) = services(&ServerConfig::default());
    assert_eq!(slots.list_slots().unwrap().len(), 10);
    assert_eq!(registry.status().unwrap(), SyncStatus::Synced);
}
