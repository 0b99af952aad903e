use anyhow::Result;
use std::fs;
use tempfile::TempDir;

use lrm_sync::config::{ProjectConfig, ProjectPaths, PROJECT_CONFIG_FILE};
use lrm_sync::conflict::{ConflictKind, ResolutionStrategy};
use lrm_sync::handlers::{self, CommandStatus};
use lrm_sync::sync::{PullOptions, PushOptions};

fn init_project(root: &std::path::Path, remote: &std::path::Path) -> Result<()> {
    let url = format!("file:{}", remote.display());
    assert_eq!(
        handlers::handle_init(root, Some(url), None)?,
        CommandStatus::Success
    );
    fs::create_dir_all(root.join("locales"))?;
    Ok(())
}

#[test]
fn test_init_writes_default_config() -> Result<()> {
    let temp = TempDir::new()?;
    let remote = temp.path().join("server.json");
    init_project(temp.path(), &remote)?;

    let paths = ProjectPaths::new(temp.path());
    let config = ProjectConfig::load(&paths)?;
    assert_eq!(config.resources.dir, "locales");
    assert!(config.sync.remote_url.is_some_and(|url| url.starts_with("file:")));
    assert!(paths.state_dir().is_dir());

    // Running it again leaves the file alone
    fs::write(paths.config_file(), "[backup]\nretention = 3\n")?;
    init_project(temp.path(), &remote)?;
    assert_eq!(ProjectConfig::load(&paths)?.backup.retention, 3);
    Ok(())
}

#[test]
fn test_two_projects_sync_through_file_remote() -> Result<()> {
    let temp = TempDir::new()?;
    let remote = temp.path().join("server.json");
    let alice = temp.path().join("alice");
    let bob = temp.path().join("bob");
    fs::create_dir_all(&alice)?;
    fs::create_dir_all(&bob)?;
    init_project(&alice, &remote)?;
    init_project(&bob, &remote)?;

    fs::write(alice.join("locales/fr.json"), r#"{"Save": "Enregistrer"}"#)?;
    let client = handlers::open_client(handlers::open_context(&alice)?)?;
    assert_eq!(
        handlers::handle_push(&client, &PushOptions::default())?,
        CommandStatus::Success
    );
    assert!(remote.exists());

    let client = handlers::open_client(handlers::open_context(&bob)?)?;
    assert_eq!(
        handlers::handle_pull(&client, &PullOptions::default())?,
        CommandStatus::Success
    );
    let pulled = fs::read_to_string(bob.join("locales/fr.json"))?;
    assert!(pulled.contains("Enregistrer"));
    Ok(())
}

#[test]
fn test_first_pull_with_a_different_init_config() -> Result<()> {
    let temp = TempDir::new()?;
    let alice = temp.path().join("alice");
    let bob = temp.path().join("bob");
    fs::create_dir_all(&alice)?;
    fs::create_dir_all(&bob)?;
    init_project(&alice, &temp.path().join("server.json"))?;
    // Same remote, spelled relative to Bob's project
    handlers::handle_init(&bob, Some("file:../server.json".into()), None)?;
    fs::create_dir_all(bob.join("locales"))?;
    let bob_config = fs::read_to_string(bob.join(PROJECT_CONFIG_FILE))?;

    fs::write(alice.join("locales/fr.json"), r#"{"Save": "Enregistrer"}"#)?;
    handlers::handle_push(
        &handlers::open_client(handlers::open_context(&alice)?)?,
        &PushOptions::default(),
    )?;

    let client = handlers::open_client(handlers::open_context(&bob)?)?;
    let outcome = client.pull(&PullOptions::default(), None)?;
    assert_eq!(outcome.written, vec!["locales/fr.json".to_string()]);
    assert_eq!(outcome.conflicts.len(), 1);
    let conflict = &outcome.conflicts[0];
    assert_eq!(conflict.kind, ConflictKind::ConfigurationConflict);
    assert!(conflict.base_hash.is_none());
    assert!(conflict
        .config_changes
        .iter()
        .any(|change| change.path == "sync.remote_url"));
    assert_eq!(outcome.skipped, vec![PROJECT_CONFIG_FILE.to_string()]);
    assert_eq!(fs::read_to_string(bob.join(PROJECT_CONFIG_FILE))?, bob_config);

    let resources_only = PullOptions {
        resources_only: true,
        ..Default::default()
    };
    assert_eq!(
        handlers::handle_pull(&client, &resources_only)?,
        CommandStatus::Success
    );

    // Keeping the local copy settles it for later pulls
    let keep_local = PullOptions {
        strategy: Some(ResolutionStrategy::Local),
        ..Default::default()
    };
    assert_eq!(handlers::handle_pull(&client, &keep_local)?, CommandStatus::Success);
    assert_eq!(
        handlers::handle_pull(&client, &PullOptions::default())?,
        CommandStatus::Success
    );
    assert_eq!(fs::read_to_string(bob.join(PROJECT_CONFIG_FILE))?, bob_config);
    Ok(())
}

#[test]
fn test_commands_outside_a_project_fail() {
    let temp = TempDir::new().expect("tempdir");
    assert!(handlers::open_context(temp.path()).is_err());
}
