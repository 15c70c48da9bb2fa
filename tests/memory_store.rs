//! Memory vault integration tests over real files.

use keepsake::config::MemoryConfig;
use keepsake::memory::{FsBlobStore, MemoryStore};

fn store_in(dir: &std::path::Path) -> (MemoryStore, MemoryConfig) {
    let config = MemoryConfig::default();
    let store = MemoryStore::new(Box::new(FsBlobStore::new(dir)), &config);
    (store, config)
}

#[test]
fn save_writes_both_files_identically() {
    let dir = tempfile::TempDir::new().expect("tempdir");
    let (store, config) = store_in(dir.path());

    store
        .save("🎣", "Lost dad's fishing pole", &["fish".into()])
        .expect("save");

    let primary = std::fs::read_to_string(dir.path().join(&config.primary_key)).expect("primary");
    let backup = std::fs::read_to_string(dir.path().join(&config.backup_key)).expect("backup");
    assert_eq!(primary, backup);
}

#[test]
fn deleted_primary_is_served_and_repaired_from_backup() {
    let dir = tempfile::TempDir::new().expect("tempdir");
    let (store, config) = store_in(dir.path());
    store.save("🐕", "Had a dog named Rex", &[]).expect("save");

    let primary_path = dir.path().join(&config.primary_key);
    std::fs::remove_file(&primary_path).expect("delete primary");

    let symbols = store.load();
    assert_eq!(symbols.len(), 1);
    assert_eq!(symbols[0].meaning, "Had a dog named Rex");
    // load() repaired the primary from the backup.
    assert!(primary_path.exists(), "primary should be repaired");
    assert_eq!(
        std::fs::read_to_string(&primary_path).expect("primary"),
        std::fs::read_to_string(dir.path().join(&config.backup_key)).expect("backup")
    );
}

#[test]
fn init_restores_primary_from_backup_after_wipe() {
    let dir = tempfile::TempDir::new().expect("tempdir");
    let (store, config) = store_in(dir.path());
    store.save("💊", "Takes medication at 9am", &[]).expect("save");

    std::fs::remove_file(dir.path().join(&config.primary_key)).expect("delete primary");

    // A fresh store over the same directory reconciles at startup.
    let (fresh, _) = store_in(dir.path());
    fresh.init().expect("init");
    assert!(dir.path().join(&config.primary_key).exists());
    assert_eq!(fresh.load().len(), 1);
}

#[test]
fn survives_process_restart() {
    let dir = tempfile::TempDir::new().expect("tempdir");
    {
        let (store, _) = store_in(dir.path());
        store
            .save("🎣", "Lost dad's fishing pole", &["fish".into(), "dad".into()])
            .expect("save");
    }

    let (reopened, _) = store_in(dir.path());
    reopened.init().expect("init");
    let symbols = reopened.load();
    assert_eq!(symbols.len(), 1);
    assert_eq!(symbols[0].triggers, vec!["fish", "dad"]);
}

#[test]
fn merge_across_restart_keeps_id_and_unions_triggers() {
    let dir = tempfile::TempDir::new().expect("tempdir");
    let first = {
        let (store, _) = store_in(dir.path());
        store
            .save("🎣", "Lost dad's fishing pole", &["fish".into()])
            .expect("save")
    };

    let (reopened, _) = store_in(dir.path());
    let merged = reopened
        .save("🎳", "Dad's fishing pole", &["pole".into()])
        .expect("save");

    assert_eq!(merged.id, first.id);
    assert_eq!(merged.symbol, "🎣");
    assert_eq!(merged.triggers, vec!["fish", "pole"]);
    assert_eq!(reopened.load().len(), 1);
}

#[test]
fn clear_removes_both_files() {
    let dir = tempfile::TempDir::new().expect("tempdir");
    let (store, config) = store_in(dir.path());
    store.save("🐕", "Had a dog named Rex", &[]).expect("save");
    store.clear().expect("clear");

    assert!(!dir.path().join(&config.primary_key).exists());
    assert!(!dir.path().join(&config.backup_key).exists());
    assert!(store.load().is_empty());
    assert!(store.context_string().starts_with("[MEMORY SYSTEM: EMPTY]"));
}

#[test]
fn context_reflects_latest_writes_without_caching() {
    let dir = tempfile::TempDir::new().expect("tempdir");
    let (store, _) = store_in(dir.path());

    assert!(store.context_string().starts_with("[MEMORY SYSTEM: EMPTY]"));
    store
        .save("💻", "Worked as a programmer for 30 years", &["computer".into()])
        .expect("save");
    let context = store.context_string();
    assert!(context.contains("Worked as a programmer for 30 years"));
    assert!(context.contains("TRIGGERS: computer"));
}
