mod common;

use anyhow::Result;
use std::fs;
use std::sync::Arc;

use lrm_sync::backend::JsonBackend;
use lrm_sync::backup::{LocalVersionStore, MemoryStorage, PullBackupArchive};
use lrm_sync::config::{ProjectConfig, PROJECT_CONFIG_FILE};
use lrm_sync::conflict::{Conflict, ConflictChooser, ConflictKind, Resolution, ResolutionStrategy};
use lrm_sync::entries::{EntrySet, ResourceEntry};
use lrm_sync::error::{find_lrm_error, LrmError};
use lrm_sync::handlers::{self, CommandStatus};
use lrm_sync::remote::{FilePayload, PushRequest, RemoteService};
use lrm_sync::sync::{PullOptions, PushOptions, SyncClient, SyncPhase};

use common::{rel, shared_remote, Workspace};

/// Alice publishes `fr` and `de`; Bob pulls them. Both end at version 1.
fn synced_pair() -> Result<(Workspace, Workspace)> {
    let remote = shared_remote();
    let alice = Workspace::new("alice", &remote)?;
    let bob = Workspace::new("bob", &remote)?;

    alice.write("fr", &[("Save", "Enregistrer"), ("Cancel", "Annuler")])?;
    alice.write("de", &[("Save", "Speichern"), ("Cancel", "Abbrechen")])?;
    alice.push()?;
    bob.client()?.pull(&PullOptions::default(), None)?;
    Ok((alice, bob))
}

/// From a synced pair: Alice changes both files remotely, Bob changes `fr`
/// locally in a different way.
fn diverged_pair() -> Result<(Workspace, Workspace)> {
    let (alice, bob) = synced_pair()?;
    alice.write("fr", &[("Save", "Sauvegarder"), ("Cancel", "Annuler")])?;
    alice.write("de", &[("Save", "Sichern"), ("Cancel", "Abbrechen")])?;
    alice.push()?;
    bob.write("fr", &[("Save", "Sauver"), ("Cancel", "Annuler")])?;
    Ok((alice, bob))
}

fn pull_with(bob: &Workspace, strategy: ResolutionStrategy) -> Result<lrm_sync::sync::PullOutcome> {
    bob.client()?.pull(
        &PullOptions {
            strategy: Some(strategy),
            ..Default::default()
        },
        None,
    )
}

#[test]
fn test_push_then_pull_round_trip() -> Result<()> {
    let remote = shared_remote();
    let alice = Workspace::new("alice", &remote)?;
    let bob = Workspace::new("bob", &remote)?;
    alice.write("fr", &[("Save", "Enregistrer"), ("Cancel", "Annuler")])?;

    let pushed = alice.push()?;
    assert_eq!(pushed.uploaded, vec![rel("fr")]);
    assert!(pushed.config_pushed);
    assert_eq!(pushed.project_version, Some(1));
    assert!(pushed.history_id.is_some());
    assert_eq!(pushed.phases.last(), Some(&SyncPhase::Done));

    let pulled = bob.client()?.pull(&PullOptions::default(), None)?;
    assert_eq!(pulled.written, vec![rel("fr")]);
    assert!(pulled.conflicts.is_empty());
    assert_eq!(bob.value("fr", "Save")?.as_deref(), Some("Enregistrer"));

    let client = bob.client()?;
    assert!(client.status(&[])?.is_clean());
    assert_eq!(client.sync_state()?.remote_project_version, 1);
    Ok(())
}

#[test]
fn test_second_push_without_changes_is_a_no_op() -> Result<()> {
    let (alice, _bob) = synced_pair()?;

    let outcome = alice.push()?;
    assert!(outcome.no_changes());
    assert_eq!(alice.remote.project_version(), 1);
    Ok(())
}

#[test]
fn test_stale_base_with_overlapping_change_is_both_modified() -> Result<()> {
    let (alice, bob) = synced_pair()?;

    // Move the project to version 5 and bring Bob up to date
    for value in ["Sichern", "Speichern!", "Speichern?", "Speichern."] {
        alice.write("de", &[("Save", value), ("Cancel", "Abbrechen")])?;
        alice.push()?;
    }
    bob.client()?.pull(&PullOptions::default(), None)?;
    assert_eq!(bob.client()?.sync_state()?.remote_project_version, 5);

    // Alice reaches version 7, the second push touching fr
    alice.write("de", &[("Save", "Sichern"), ("Cancel", "Abbrechen")])?;
    alice.push()?;
    alice.write("fr", &[("Save", "Sauvegarder"), ("Cancel", "Annuler")])?;
    alice.push()?;
    assert_eq!(alice.remote.project_version(), 7);

    bob.write("fr", &[("Save", "Sauver"), ("Cancel", "Annuler")])?;
    let outcome = bob.push()?;

    assert!(outcome.is_blocked());
    assert!(outcome.uploaded.is_empty());
    assert_eq!(outcome.conflicts.len(), 1);
    let conflict = &outcome.conflicts[0];
    assert_eq!(conflict.path, rel("fr"));
    assert_eq!(conflict.kind, ConflictKind::BothModified);
    assert!(conflict.base_hash.is_some());
    assert_eq!(conflict.remote_author.as_deref(), Some("alice"));

    assert_eq!(alice.remote.project_version(), 7);
    assert_eq!(bob.client()?.sync_state()?.remote_project_version, 5);
    Ok(())
}

#[test]
fn test_concurrent_push_loses_the_race() -> Result<()> {
    let (alice, bob) = synced_pair()?;
    let alice_fr = EntrySet::from_entries(
        "fr",
        [
            ResourceEntry::new("Save", "Sauvegarder"),
            ResourceEntry::new("Cancel", "Annuler"),
        ],
    );
    alice.remote.interleave_before_next_push(PushRequest {
        base_version: 1,
        files: vec![FilePayload::new(rel("fr"), alice_fr.clone())],
        deleted: Vec::new(),
        config: None,
        message: None,
        actor: "alice".into(),
        force: false,
    });

    bob.write("fr", &[("Save", "Sauver"), ("Cancel", "Annuler")])?;
    let outcome = bob.push()?;

    assert_eq!(outcome.version_mismatch, Some((1, 2)));
    assert!(outcome.uploaded.is_empty());
    assert_eq!(outcome.conflicts.len(), 1);
    assert_eq!(outcome.conflicts[0].kind, ConflictKind::BothModified);
    assert_eq!(outcome.phases.last(), Some(&SyncPhase::Aborted));

    // Exactly one of the two writers got in
    assert_eq!(bob.remote.file(&rel("fr")), Some(alice_fr));
    assert_eq!(bob.client()?.sync_state()?.remote_project_version, 1);
    Ok(())
}

#[test]
fn test_lost_race_on_other_file_recovers_after_pull() -> Result<()> {
    let (alice, bob) = synced_pair()?;
    alice.remote.interleave_before_next_push(PushRequest {
        base_version: 1,
        files: vec![FilePayload::new(
            rel("de"),
            EntrySet::from_entries("de", [ResourceEntry::new("Save", "Sichern")]),
        )],
        deleted: Vec::new(),
        config: None,
        message: None,
        actor: "alice".into(),
        force: false,
    });

    bob.write("fr", &[("Save", "Sauver"), ("Cancel", "Annuler")])?;
    let outcome = bob.push()?;
    assert_eq!(outcome.version_mismatch, Some((1, 2)));
    assert!(outcome.conflicts.is_empty());

    let pulled = bob.client()?.pull(&PullOptions::default(), None)?;
    assert_eq!(pulled.written, vec![rel("de")]);
    assert_eq!(pulled.kept_local, vec![rel("fr")]);

    let retried = bob.push()?;
    assert_eq!(retried.uploaded, vec![rel("fr")]);
    assert_eq!(retried.project_version, Some(3));
    Ok(())
}

#[test]
fn test_abort_applies_clean_files_and_skips_conflicts() -> Result<()> {
    let (_alice, bob) = diverged_pair()?;

    let outcome = pull_with(&bob, ResolutionStrategy::Abort)?;

    assert_eq!(outcome.written, vec![rel("de")]);
    assert_eq!(outcome.skipped, vec![rel("fr")]);
    assert!(outcome.has_unresolved());
    assert_eq!(bob.value("fr", "Save")?.as_deref(), Some("Sauver"));
    assert_eq!(bob.value("de", "Save")?.as_deref(), Some("Sichern"));
    assert_eq!(bob.client()?.sync_state()?.remote_project_version, 2);

    // The skipped file still conflicts on the next push
    let pushed = bob.push()?;
    assert_eq!(pushed.conflicts.len(), 1);
    assert_eq!(pushed.conflicts[0].path, rel("fr"));
    Ok(())
}

#[test]
fn test_abort_exits_unresolved() -> Result<()> {
    let (_alice, bob) = diverged_pair()?;

    let status = handlers::handle_pull(
        &bob.client()?,
        &PullOptions {
            strategy: Some(ResolutionStrategy::Abort),
            ..Default::default()
        },
    )?;
    assert_eq!(status, CommandStatus::Unresolved);
    Ok(())
}

#[test]
fn test_local_strategy_keeps_file_for_next_push() -> Result<()> {
    let (alice, bob) = diverged_pair()?;

    let outcome = pull_with(&bob, ResolutionStrategy::Local)?;
    assert!(outcome.kept_local.contains(&rel("fr")));
    assert_eq!(outcome.written, vec![rel("de")]);
    assert_eq!(bob.value("fr", "Save")?.as_deref(), Some("Sauver"));

    let pushed = bob.push()?;
    assert!(pushed.conflicts.is_empty());
    assert_eq!(pushed.uploaded, vec![rel("fr")]);
    let remote_fr = alice.remote.file(&rel("fr")).expect("fr on remote");
    assert_eq!(remote_fr.get("Save").map(|e| e.value.as_str()), Some("Sauver"));
    Ok(())
}

#[test]
fn test_force_pull_backs_up_before_overwriting() -> Result<()> {
    let (_alice, bob) = diverged_pair()?;
    let client = bob.client()?;

    let outcome = client.pull(
        &PullOptions {
            force: true,
            ..Default::default()
        },
        None,
    )?;

    assert_eq!(bob.value("fr", "Save")?.as_deref(), Some("Sauvegarder"));
    assert_eq!(outcome.pre_pull_versions, 2);

    let versions = client.store().list_versions(&bob.file_path("fr"))?;
    let latest = versions.last().expect("pre-pull version");
    assert_eq!(latest.operation, "pre-pull");
    let info = client.store().info(&bob.file_path("fr"), latest.version)?;
    assert_eq!(info.entries.get("Save").map(|e| e.value.as_str()), Some("Sauver"));

    let archive_path = outcome.backup_path.expect("pull archive");
    let archive = PullBackupArchive::load(&archive_path)?;
    assert_eq!(archive.remote_version, 2);
    assert!(String::from_utf8_lossy(&archive.files[&rel("fr")]).contains("Sauver"));

    archive.restore(&bob.paths(), client.store(), "bob")?;
    assert_eq!(bob.value("fr", "Save")?.as_deref(), Some("Sauver"));
    Ok(())
}

#[test]
fn test_undo_pull_restores_overwritten_and_removes_created() -> Result<()> {
    let (alice, bob) = diverged_pair()?;
    alice.write("es", &[("Save", "Guardar")])?;
    alice.push()?;

    let client = bob.client()?;
    let outcome = client.pull(
        &PullOptions {
            force: true,
            ..Default::default()
        },
        None,
    )?;
    assert!(bob.exists("es"));

    let archive = PullBackupArchive::load(&outcome.backup_path.expect("pull archive"))?;
    assert_eq!(archive.created, vec![rel("es")]);

    let undo = archive.restore(&bob.paths(), client.store(), "bob")?;
    assert_eq!(undo.restored, vec![rel("de"), rel("fr")]);
    assert_eq!(undo.removed, vec![rel("es")]);
    assert_eq!(undo.pre_restore.len(), 3);
    assert_eq!(bob.value("fr", "Save")?.as_deref(), Some("Sauver"));
    assert_eq!(bob.value("de", "Save")?.as_deref(), Some("Speichern"));
    assert!(!bob.exists("es"));

    // What the undo replaced is still in the version store
    let versions = client.store().list_versions(&bob.file_path("fr"))?;
    let latest = versions.last().expect("pre-restore version");
    assert_eq!(latest.operation, "pre-restore");
    let info = client.store().info(&bob.file_path("fr"), latest.version)?;
    assert_eq!(info.entries.get("Save").map(|e| e.value.as_str()), Some("Sauvegarder"));
    let es_versions = client.store().list_versions(&bob.file_path("es"))?;
    assert_eq!(es_versions.len(), 1);
    Ok(())
}

#[test]
fn test_no_backup_skips_versions_and_archive() -> Result<()> {
    let (_alice, bob) = diverged_pair()?;

    let outcome = bob.client()?.pull(
        &PullOptions {
            force: true,
            no_backup: true,
            ..Default::default()
        },
        None,
    )?;

    assert!(outcome.backup_path.is_none());
    assert_eq!(outcome.pre_pull_versions, 0);
    assert!(!bob.paths().pull_backups_dir().exists());
    Ok(())
}

#[test]
fn test_prompt_without_chooser_fails_before_any_io() -> Result<()> {
    let (alice, bob) = diverged_pair()?;
    // Would surface first if the pull reached the network
    alice
        .remote
        .fail_next(LrmError::Transient("unreachable".into()));

    let err = pull_with(&bob, ResolutionStrategy::Prompt).unwrap_err();
    assert!(matches!(
        find_lrm_error(&err),
        Some(LrmError::PromptNotInteractive)
    ));
    Ok(())
}

struct Scripted {
    seen: Vec<String>,
    answer: Resolution,
}

impl ConflictChooser for Scripted {
    fn choose(&mut self, conflict: &Conflict) -> Result<Resolution> {
        self.seen.push(conflict.path.clone());
        Ok(self.answer)
    }
}

#[test]
fn test_prompt_uses_supplied_chooser() -> Result<()> {
    let (_alice, bob) = diverged_pair()?;
    let mut chooser = Scripted {
        seen: Vec::new(),
        answer: Resolution::KeepRemote,
    };

    let outcome = bob.client()?.pull(
        &PullOptions {
            strategy: Some(ResolutionStrategy::Prompt),
            ..Default::default()
        },
        Some(&mut chooser as &mut dyn ConflictChooser),
    )?;

    assert_eq!(chooser.seen, vec![rel("fr")]);
    assert!(!outcome.has_unresolved());
    let conflict = &outcome.conflicts[0];
    assert!(conflict.entry_diff.is_some());
    assert_eq!(bob.value("fr", "Save")?.as_deref(), Some("Sauvegarder"));
    Ok(())
}

#[test]
fn test_pull_dry_run_writes_nothing() -> Result<()> {
    let (_alice, bob) = diverged_pair()?;
    let options = PullOptions {
        dry_run: true,
        ..Default::default()
    };

    let outcome = bob.client()?.pull(&options, None)?;
    assert!(outcome.dry_run);
    assert_eq!(outcome.written, vec![rel("de")]);
    assert_eq!(outcome.conflicts.len(), 1);
    assert_eq!(bob.value("de", "Save")?.as_deref(), Some("Speichern"));
    assert_eq!(bob.client()?.sync_state()?.remote_project_version, 1);

    let status = handlers::handle_pull(&bob.client()?, &options)?;
    assert_eq!(status, CommandStatus::PreviewConflicts);
    Ok(())
}

#[test]
fn test_pull_dry_run_never_asks_the_chooser() -> Result<()> {
    let (_alice, bob) = diverged_pair()?;
    let mut chooser = Scripted {
        seen: Vec::new(),
        answer: Resolution::KeepRemote,
    };

    let outcome = bob.client()?.pull(
        &PullOptions {
            dry_run: true,
            strategy: Some(ResolutionStrategy::Prompt),
            ..Default::default()
        },
        Some(&mut chooser as &mut dyn ConflictChooser),
    )?;

    assert!(chooser.seen.is_empty());
    assert_eq!(outcome.conflicts.len(), 1);
    assert_eq!(outcome.conflicts[0].path, rel("fr"));
    assert_eq!(outcome.written, vec![rel("de")]);
    assert!(outcome.skipped.is_empty());
    assert_eq!(bob.value("fr", "Save")?.as_deref(), Some("Sauver"));
    Ok(())
}

#[test]
fn test_push_dry_run_uploads_nothing() -> Result<()> {
    let (alice, bob) = synced_pair()?;
    bob.write("fr", &[("Save", "Sauver"), ("Cancel", "Annuler")])?;

    let outcome = bob.client()?.push(&PushOptions {
        dry_run: true,
        ..Default::default()
    })?;
    assert_eq!(outcome.uploaded, vec![rel("fr")]);
    assert_eq!(alice.remote.project_version(), 1);

    let real = bob.push()?;
    assert_eq!(real.project_version, Some(2));
    Ok(())
}

#[test]
fn test_force_push_overrides_remote() -> Result<()> {
    let (alice, bob) = diverged_pair()?;

    let outcome = bob.client()?.push(&PushOptions {
        force: true,
        ..Default::default()
    })?;

    assert!(outcome.conflicts.is_empty());
    assert_eq!(outcome.uploaded, vec![rel("fr")]);
    let remote_fr = alice.remote.file(&rel("fr")).expect("fr on remote");
    assert_eq!(remote_fr.get("Save").map(|e| e.value.as_str()), Some("Sauver"));
    Ok(())
}

#[test]
fn test_cancelled_pull_writes_nothing() -> Result<()> {
    let (alice, bob) = synced_pair()?;
    alice.write("fr", &[("Save", "Sauvegarder"), ("Cancel", "Annuler")])?;
    alice.push()?;

    let client = bob.client()?;
    client.context().cancel.cancel();
    let err = client.pull(&PullOptions::default(), None).unwrap_err();

    match find_lrm_error(&err) {
        Some(LrmError::Cancelled { applied }) => assert!(applied.is_empty()),
        other => panic!("expected Cancelled, got {other:?}"),
    }
    assert_eq!(bob.value("fr", "Save")?.as_deref(), Some("Enregistrer"));
    assert_eq!(client.sync_state()?.remote_project_version, 1);
    Ok(())
}

#[test]
fn test_transient_failure_leaves_state_untouched() -> Result<()> {
    let (alice, bob) = synced_pair()?;
    bob.write("fr", &[("Save", "Sauver"), ("Cancel", "Annuler")])?;
    let state_file = bob.paths().sync_state_file();
    let before = fs::read(&state_file)?;

    alice
        .remote
        .fail_next(LrmError::Transient("connection reset".into()));
    let err = bob.push().unwrap_err();

    assert!(find_lrm_error(&err).is_some_and(LrmError::is_transient));
    assert_eq!(fs::read(&state_file)?, before);
    assert_eq!(alice.remote.project_version(), 1);
    Ok(())
}

#[test]
fn test_case_variant_keys_block_push() -> Result<()> {
    let remote = shared_remote();
    let alice = Workspace::new("alice", &remote)?;
    alice.write_raw("fr", r#"{"Save": "Enregistrer", "save": "Sauver"}"#)?;

    let err = alice.push().unwrap_err();
    assert!(matches!(
        find_lrm_error(&err),
        Some(LrmError::CaseVariantKeys { .. })
    ));
    assert_eq!(remote.project_version(), 0);
    Ok(())
}

#[test]
fn test_deletions_propagate() -> Result<()> {
    let (alice, bob) = synced_pair()?;
    fs::remove_file(alice.file_path("de"))?;

    let pushed = alice.push()?;
    assert_eq!(pushed.deleted, vec![rel("de")]);
    assert!(alice.remote.file(&rel("de")).is_none());

    let pulled = bob.client()?.pull(&PullOptions::default(), None)?;
    assert_eq!(pulled.deleted, vec![rel("de")]);
    assert!(!bob.exists("de"));
    assert!(bob.client()?.status(&[])?.is_clean());
    Ok(())
}

#[test]
fn test_configuration_conflict_has_structural_diff() -> Result<()> {
    let (alice, bob) = synced_pair()?;

    let mut config = ProjectConfig::default();
    config.backup.retention = 20;
    config.save(&alice.paths())?;
    let pushed = alice.push()?;
    assert!(pushed.config_pushed);

    config.backup.retention = 30;
    config.save(&bob.paths())?;
    let outcome = pull_with(&bob, ResolutionStrategy::Abort)?;

    let conflict = outcome
        .conflicts
        .iter()
        .find(|c| c.kind == ConflictKind::ConfigurationConflict)
        .expect("configuration conflict");
    assert_eq!(conflict.path, PROJECT_CONFIG_FILE);
    let change = conflict
        .config_changes
        .iter()
        .find(|c| c.path == "backup.retention")
        .expect("retention change");
    assert_eq!(change.local.as_deref(), Some("30"));
    assert_eq!(change.remote.as_deref(), Some("20"));
    assert!(outcome.skipped.contains(&PROJECT_CONFIG_FILE.to_string()));
    Ok(())
}

#[test]
fn test_status_reports_local_changes() -> Result<()> {
    let (_alice, bob) = synced_pair()?;
    bob.write("es", &[("Save", "Guardar")])?;
    bob.write("fr", &[("Save", "Sauver"), ("Cancel", "Annuler")])?;
    fs::remove_file(bob.file_path("de"))?;

    let status = bob.client()?.status(&[])?;
    assert_eq!(status.added, vec![rel("es")]);
    assert_eq!(status.modified, vec![rel("fr")]);
    assert_eq!(status.deleted, vec![rel("de")]);
    assert!(!status.config_changed);
    assert_eq!(status.remote_project_version, 1);
    Ok(())
}

#[test]
fn test_scoped_push_only_sends_named_files() -> Result<()> {
    let (alice, bob) = synced_pair()?;
    bob.write("fr", &[("Save", "Sauver"), ("Cancel", "Annuler")])?;
    bob.write("de", &[("Save", "Sichern"), ("Cancel", "Abbrechen")])?;

    let outcome = bob.client()?.push(&PushOptions {
        paths: vec![rel("fr")],
        ..Default::default()
    })?;
    assert_eq!(outcome.uploaded, vec![rel("fr")]);

    let remote_de = alice.remote.file(&rel("de")).expect("de on remote");
    assert_eq!(remote_de.get("Save").map(|e| e.value.as_str()), Some("Speichern"));
    assert_eq!(bob.client()?.status(&[])?.modified, vec![rel("de")]);
    Ok(())
}

#[test]
fn test_context_strategy_and_in_memory_store() -> Result<()> {
    let (_alice, bob) = diverged_pair()?;

    let ctx = bob.context()?.with_strategy(ResolutionStrategy::Remote);
    let store = LocalVersionStore::new(
        bob.paths(),
        Box::new(MemoryStorage::new()),
        Arc::new(JsonBackend),
        ctx.config.backup.retention,
    );
    let remote: Arc<dyn RemoteService> = bob.remote.clone();
    let client = SyncClient::new(ctx, remote, Arc::new(JsonBackend)).with_store(store);

    let outcome = client.pull(&PullOptions::default(), None)?;
    assert!(!outcome.has_unresolved());
    assert_eq!(bob.value("fr", "Save")?.as_deref(), Some("Sauvegarder"));

    let versions = client.store().list_versions(&bob.file_path("fr"))?;
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].operation, "pre-pull");
    assert!(!bob.paths().backups_dir().exists());
    Ok(())
}
