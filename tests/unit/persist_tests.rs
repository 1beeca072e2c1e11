//! Unit tests for the state mirror and supervisor teardown.

use std::fs;
use std::path::Path;

use server_warden::config::{Architecture, PersistConfig, ServerLayout};
use server_warden::orchestrator::Supervisor;
use server_warden::persistence::Persister;
use server_warden::WardenConfig;
use tokio_util::sync::CancellationToken;

fn seed(state: &Path) {
    fs::create_dir_all(state.join("db").join("nested")).unwrap();
    fs::write(state.join("state.db"), b"state").unwrap();
    fs::write(state.join("accounts.db"), b"accounts").unwrap();
    fs::write(state.join("db").join("LOG"), b"log").unwrap();
    fs::write(state.join("db").join("nested").join("000001.ldb"), b"table").unwrap();
}

fn snapshot(dir: &Path) -> Vec<(String, Vec<u8>)> {
    let mut entries: Vec<_> = walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| {
            let rel = entry.path().strip_prefix(dir).unwrap().display().to_string();
            (rel, fs::read(entry.path()).unwrap())
        })
        .collect();
    entries.sort();
    entries
}

#[test]
fn copies_files_and_directory_tree() {
    let root = tempfile::tempdir().unwrap();
    let state = root.path().join("state");
    let dest = root.path().join("shared");
    seed(&state);

    let persister = Persister::new(&state, &dest, &PersistConfig::default(), false);
    let report = persister.persist();

    assert_eq!(report.copied, 4);
    assert_eq!(report.failed, 0);
    assert_eq!(fs::read(dest.join("state.db")).unwrap(), b"state");
    assert_eq!(fs::read(dest.join("accounts.db")).unwrap(), b"accounts");
    assert_eq!(
        fs::read(dest.join("db").join("nested").join("000001.ldb")).unwrap(),
        b"table"
    );
}

#[test]
fn persisting_twice_is_idempotent() {
    let root = tempfile::tempdir().unwrap();
    let state = root.path().join("state");
    let dest = root.path().join("shared");
    seed(&state);

    let persister = Persister::new(&state, &dest, &PersistConfig::default(), false);
    let _ = persister.persist();
    let first = snapshot(&dest);
    let report = persister.persist();
    let second = snapshot(&dest);

    assert_eq!(report.failed, 0);
    assert_eq!(first, second);
}

#[test]
fn copies_overwrite_previous_contents() {
    let root = tempfile::tempdir().unwrap();
    let state = root.path().join("state");
    let dest = root.path().join("shared");
    seed(&state);
    fs::create_dir_all(&dest).unwrap();
    fs::write(dest.join("state.db"), b"stale").unwrap();

    let _ = Persister::new(&state, &dest, &PersistConfig::default(), true).persist();

    assert_eq!(fs::read(dest.join("state.db")).unwrap(), b"state");
}

#[test]
fn absent_sources_are_skipped_and_destination_created() {
    let root = tempfile::tempdir().unwrap();
    let dest = root.path().join("out").join("shared");

    let persister = Persister::new(
        root.path().join("missing"),
        &dest,
        &PersistConfig::default(),
        false,
    );
    let report = persister.persist();

    assert_eq!(report.copied, 0);
    assert_eq!(report.skipped, 3);
    assert_eq!(report.failed, 0);
    assert!(dest.is_dir());
    assert_eq!(fs::read_dir(&dest).unwrap().count(), 0);
}

#[test]
fn partial_sources_copy_what_exists() {
    let root = tempfile::tempdir().unwrap();
    let state = root.path().join("state");
    let dest = root.path().join("shared");
    fs::create_dir_all(&state).unwrap();
    fs::write(state.join("accounts.db"), b"accounts").unwrap();

    let report = Persister::new(&state, &dest, &PersistConfig::default(), false).persist();

    assert_eq!(report.copied, 1);
    assert_eq!(report.skipped, 2);
    assert!(!dest.join("state.db").exists());
}

#[test]
fn unusable_destination_is_not_fatal() {
    let root = tempfile::tempdir().unwrap();
    let state = root.path().join("state");
    seed(&state);
    let blocker = root.path().join("shared");
    fs::write(&blocker, b"a file where the directory should be").unwrap();

    let report = Persister::new(&state, &blocker, &PersistConfig::default(), false).persist();

    assert_eq!(report.copied, 0);
    assert_eq!(report.failed, 1);
}

#[test]
fn teardown_without_start_persists_once() {
    let root = tempfile::tempdir().unwrap();
    let config = WardenConfig {
        install_root: root.path().to_path_buf(),
        ..WardenConfig::default()
    };
    let layout = ServerLayout::resolve(&config, Architecture::X86_64);
    seed(&layout.state_dir);

    let mut supervisor = Supervisor::new(&config, layout.clone(), CancellationToken::new());
    let report = supervisor.teardown().expect("first teardown runs");
    assert_eq!(report.copied, 4);
    assert!(supervisor.teardown().is_none());
    drop(supervisor);

    assert_eq!(
        fs::read(layout.destination.join("db").join("LOG")).unwrap(),
        b"log"
    );
    assert!(!layout.channel_path.exists());
}
