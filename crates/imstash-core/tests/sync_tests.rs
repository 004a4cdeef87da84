//! End-to-end sync engine tests against an in-memory remote library

mod common;

use common::{attach, document, FakeLibrary};
use imstash_core::{
    SyncAction, SyncEngine, SyncOptions, SyncError, SyncReport, MANIFEST_FILE, SIDECAR_FILE,
};
use std::fs;
use std::path::Path;
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

async fn run(library: &FakeLibrary, options: SyncOptions) -> SyncReport {
    SyncEngine::new(options)
        .run(library, CancellationToken::new())
        .await
        .expect("sync run failed")
}

fn options(dir: &Path, pattern: &str) -> SyncOptions {
    SyncOptions::new(dir, pattern)
}

#[tokio::test]
async fn initial_sync_creates_tree_sidecars_and_manifest() {
    let library = FakeLibrary::new();
    let mut doc = document("doc-1", "Deep Learning", &["Smith", "Jones"], Some(2020), "r1");
    attach(&library, &mut doc, "f1", "paper.pdf", b"pdf bytes");
    attach(&library, &mut doc, "f2", "supplement.zip", b"zip bytes");
    library.put_document(doc);

    let out = tempdir().unwrap();
    let report = run(&library, options(out.path(), "%author - %title (%year)")).await;

    assert_eq!(report.added(), 1);
    let doc_dir = out.path().join("Smith & Jones - Deep Learning (2020)");
    assert_eq!(fs::read(doc_dir.join("paper.pdf")).unwrap(), b"pdf bytes");
    assert_eq!(fs::read(doc_dir.join("supplement.zip")).unwrap(), b"zip bytes");
    assert!(doc_dir.join(SIDECAR_FILE).exists());
    assert!(out.path().join(MANIFEST_FILE).exists());
    assert_eq!(library.download_count(), 2);
}

#[tokio::test]
async fn second_run_performs_zero_writes() {
    let library = FakeLibrary::new();
    let mut doc = document("doc-1", "A Paper", &["Smith"], Some(2021), "r1");
    attach(&library, &mut doc, "f1", "paper.pdf", b"content");
    library.put_document(doc);

    let out = tempdir().unwrap();
    run(&library, options(out.path(), "%title")).await;
    let manifest_before = fs::read_to_string(out.path().join(MANIFEST_FILE)).unwrap();
    let downloads_before = library.download_count();

    let report = run(&library, options(out.path(), "%title")).await;

    assert_eq!(report.unchanged(), 1);
    assert_eq!(library.download_count(), downloads_before);
    let manifest_after = fs::read_to_string(out.path().join(MANIFEST_FILE)).unwrap();
    assert_eq!(manifest_before, manifest_after);
}

#[tokio::test]
async fn metadata_only_change_updates_sidecar_without_downloads() {
    let library = FakeLibrary::new();
    let mut doc = document("doc-1", "A Paper", &["Smith"], None, "r1");
    attach(&library, &mut doc, "f1", "paper.pdf", b"content");
    library.put_document(doc);

    let out = tempdir().unwrap();
    run(&library, options(out.path(), "%title")).await;
    let downloads_before = library.download_count();

    // Keywords do not feed the naming pattern, so only the revision moves.
    let mut doc = library.document("doc-1");
    doc.meta.keywords.push("neural networks".to_string());
    doc.meta.last_modified = "r2".to_string();
    library.put_document(doc);

    let report = run(&library, options(out.path(), "%title")).await;

    assert_eq!(report.updated(), 1);
    assert_eq!(library.download_count(), downloads_before);
    let sidecar = fs::read_to_string(out.path().join("A Paper").join(SIDECAR_FILE)).unwrap();
    assert!(sidecar.contains("\"revision\": \"r2\""));
    assert!(sidecar.contains("neural networks"));
}

#[tokio::test]
async fn changed_file_is_redownloaded_unchanged_file_is_not() {
    let library = FakeLibrary::new();
    let mut doc = document("doc-1", "A Paper", &["Smith"], None, "r1");
    attach(&library, &mut doc, "f1", "paper.pdf", b"v1");
    attach(&library, &mut doc, "f2", "data.csv", b"numbers");
    library.put_document(doc);

    let out = tempdir().unwrap();
    run(&library, options(out.path(), "%title")).await;
    let downloads_before = library.download_count();

    let mut doc = library.document("doc-1");
    doc.meta.last_modified = "r2".to_string();
    doc.files.retain(|f| f.id != "f1");
    attach(&library, &mut doc, "f1", "paper.pdf", b"v2");
    library.put_document(doc);

    let report = run(&library, options(out.path(), "%title")).await;

    assert_eq!(report.updated(), 1);
    assert_eq!(library.download_count(), downloads_before + 1);
    let doc_dir = out.path().join("A Paper");
    assert_eq!(fs::read(doc_dir.join("paper.pdf")).unwrap(), b"v2");
    assert_eq!(fs::read(doc_dir.join("data.csv")).unwrap(), b"numbers");
}

#[tokio::test]
async fn detached_file_is_removed_locally() {
    let library = FakeLibrary::new();
    let mut doc = document("doc-1", "A Paper", &["Smith"], None, "r1");
    attach(&library, &mut doc, "f1", "paper.pdf", b"keep");
    attach(&library, &mut doc, "f2", "notes.txt", b"drop");
    library.put_document(doc);

    let out = tempdir().unwrap();
    run(&library, options(out.path(), "%title")).await;

    let mut doc = library.document("doc-1");
    doc.meta.last_modified = "r2".to_string();
    doc.files.retain(|f| f.id != "f2");
    library.put_document(doc);

    run(&library, options(out.path(), "%title")).await;

    let doc_dir = out.path().join("A Paper");
    assert!(doc_dir.join("paper.pdf").exists());
    assert!(!doc_dir.join("notes.txt").exists());
}

#[tokio::test]
async fn renamed_file_is_renamed_without_download() {
    let library = FakeLibrary::new();
    let mut doc = document("doc-1", "A Paper", &["Smith"], None, "r1");
    attach(&library, &mut doc, "f1", "draft.pdf", b"content");
    library.put_document(doc);

    let out = tempdir().unwrap();
    run(&library, options(out.path(), "%title")).await;
    let downloads_before = library.download_count();

    let mut doc = library.document("doc-1");
    doc.meta.last_modified = "r2".to_string();
    doc.files[0].file_name = "final.pdf".to_string();
    library.put_document(doc);

    run(&library, options(out.path(), "%title")).await;

    let doc_dir = out.path().join("A Paper");
    assert!(!doc_dir.join("draft.pdf").exists());
    assert_eq!(fs::read(doc_dir.join("final.pdf")).unwrap(), b"content");
    assert_eq!(library.download_count(), downloads_before);
}

#[tokio::test]
async fn title_change_moves_the_directory_instead_of_duplicating() {
    let library = FakeLibrary::new();
    let mut doc = document("doc-1", "Old Title", &["Smith"], None, "r1");
    attach(&library, &mut doc, "f1", "paper.pdf", b"content");
    library.put_document(doc);

    let out = tempdir().unwrap();
    run(&library, options(out.path(), "%title")).await;
    let downloads_before = library.download_count();

    let mut doc = library.document("doc-1");
    doc.meta.title = "New Title".to_string();
    doc.meta.last_modified = "r2".to_string();
    library.put_document(doc);

    let report = run(&library, options(out.path(), "%title")).await;

    assert_eq!(report.moved(), 1);
    assert!(matches!(
        report.action("doc-1"),
        Some(SyncAction::MovedAndUpdated { old_path, .. }) if old_path == "Old Title"
    ));
    assert!(!out.path().join("Old Title").exists());
    assert_eq!(
        fs::read(out.path().join("New Title/paper.pdf")).unwrap(),
        b"content"
    );
    assert_eq!(library.download_count(), downloads_before);
}

#[tokio::test]
async fn swapped_titles_settle_through_staging() {
    let library = FakeLibrary::new();
    let mut one = document("doc-a", "One", &[], None, "r1");
    attach(&library, &mut one, "fa", "a.txt", b"first");
    library.put_document(one);
    let mut two = document("doc-b", "Two", &[], None, "r1");
    attach(&library, &mut two, "fb", "b.txt", b"second");
    library.put_document(two);

    let out = tempdir().unwrap();
    run(&library, options(out.path(), "%title")).await;
    let downloads_before = library.download_count();

    let mut one = library.document("doc-a");
    one.meta.title = "Two".to_string();
    one.meta.last_modified = "r2".to_string();
    library.put_document(one);
    let mut two = library.document("doc-b");
    two.meta.title = "One".to_string();
    two.meta.last_modified = "r2".to_string();
    library.put_document(two);

    let report = run(&library, options(out.path(), "%title")).await;

    assert_eq!(report.moved(), 2);
    assert_eq!(fs::read(out.path().join("Two/a.txt")).unwrap(), b"first");
    assert_eq!(fs::read(out.path().join("One/b.txt")).unwrap(), b"second");
    assert_eq!(library.download_count(), downloads_before);
    assert!(!out.path().join(".stage").exists());
}

#[tokio::test]
async fn colliding_names_get_deterministic_suffixes() {
    let library = FakeLibrary::new();
    let mut first = document("doc-b", "Same Name", &[], None, "r1");
    attach(&library, &mut first, "f1", "one.pdf", b"one");
    library.put_document(first);
    let mut second = document("doc-a", "Same Name", &[], None, "r1");
    attach(&library, &mut second, "f2", "two.pdf", b"two");
    library.put_document(second);

    let out = tempdir().unwrap();
    let report = run(&library, options(out.path(), "%title")).await;

    assert_eq!(report.added(), 2);
    // Suffixes are assigned in document-id order.
    assert_eq!(
        fs::read(out.path().join("Same Name/two.pdf")).unwrap(),
        b"two"
    );
    assert_eq!(
        fs::read(out.path().join("Same Name (2)/one.pdf")).unwrap(),
        b"one"
    );

    // A repeat run keeps the assignment.
    let report = run(&library, options(out.path(), "%title")).await;
    assert_eq!(report.unchanged(), 2);
    assert_eq!(report.moved(), 0);
}

#[tokio::test]
async fn one_failing_document_does_not_affect_the_others() {
    let library = FakeLibrary::new();
    let mut good = document("doc-a", "Good", &[], None, "r1");
    attach(&library, &mut good, "fa", "good.pdf", b"fine");
    library.put_document(good);
    let mut bad = document("doc-b", "Bad", &[], None, "r1");
    attach(&library, &mut bad, "fb", "bad.pdf", b"never arrives");
    library.put_document(bad);
    library.fail_file("fb");

    let out = tempdir().unwrap();
    let report = run(&library, options(out.path(), "%title")).await;

    assert_eq!(report.added(), 1);
    assert_eq!(report.failed_ids(), vec!["doc-b"]);
    assert_eq!(fs::read(out.path().join("Good/good.pdf")).unwrap(), b"fine");
    assert!(!out.path().join("Bad").join(SIDECAR_FILE).exists());

    // Once the remote recovers, the failed document syncs cleanly.
    library.unfail_file("fb");
    let report = run(&library, options(out.path(), "%title")).await;
    assert_eq!(report.added(), 1);
    assert_eq!(
        fs::read(out.path().join("Bad/bad.pdf")).unwrap(),
        b"never arrives"
    );
}

#[tokio::test]
async fn failed_update_leaves_previous_state_untouched() {
    let library = FakeLibrary::new();
    let mut doc = document("doc-1", "A Paper", &["Smith"], None, "r1");
    attach(&library, &mut doc, "f1", "paper.pdf", b"v1");
    library.put_document(doc);

    let out = tempdir().unwrap();
    run(&library, options(out.path(), "%title")).await;

    let mut doc = library.document("doc-1");
    doc.meta.last_modified = "r2".to_string();
    doc.files.clear();
    attach(&library, &mut doc, "f1", "paper.pdf", b"v2");
    library.put_document(doc);
    library.fail_file("f1");

    let report = run(&library, options(out.path(), "%title")).await;

    assert_eq!(report.failed_ids(), vec!["doc-1"]);
    let doc_dir = out.path().join("A Paper");
    assert_eq!(fs::read(doc_dir.join("paper.pdf")).unwrap(), b"v1");
    let sidecar = fs::read_to_string(doc_dir.join(SIDECAR_FILE)).unwrap();
    assert!(sidecar.contains("\"revision\": \"r1\""));

    library.unfail_file("f1");
    let report = run(&library, options(out.path(), "%title")).await;
    assert_eq!(report.updated(), 1);
    assert_eq!(fs::read(doc_dir.join("paper.pdf")).unwrap(), b"v2");
}

#[tokio::test]
async fn departed_documents_are_retained_by_default() {
    let library = FakeLibrary::new();
    let mut doc = document("doc-1", "Ephemeral", &[], None, "r1");
    attach(&library, &mut doc, "f1", "paper.pdf", b"content");
    library.put_document(doc);

    let out = tempdir().unwrap();
    run(&library, options(out.path(), "%title")).await;

    library.remove_document("doc-1");
    let report = run(&library, options(out.path(), "%title")).await;

    assert_eq!(report.retained, 1);
    assert_eq!(report.removed(), 0);
    assert!(out.path().join("Ephemeral/paper.pdf").exists());
}

#[tokio::test]
async fn prune_removes_departed_documents() {
    let library = FakeLibrary::new();
    let mut doc = document("doc-1", "Ephemeral", &[], None, "r1");
    attach(&library, &mut doc, "f1", "paper.pdf", b"content");
    library.put_document(doc);

    let out = tempdir().unwrap();
    run(&library, options(out.path(), "%title")).await;

    library.remove_document("doc-1");
    let mut opts = options(out.path(), "%title");
    opts.prune = true;
    let report = run(&library, opts).await;

    assert_eq!(report.removed(), 1);
    assert!(matches!(
        report.action("doc-1"),
        Some(SyncAction::Removed { old_path }) if old_path == "Ephemeral"
    ));
    assert!(!out.path().join("Ephemeral").exists());
}

#[tokio::test]
async fn retained_paths_are_not_claimed_by_new_documents() {
    let library = FakeLibrary::new();
    let mut doc = document("doc-a", "Same Name", &[], None, "r1");
    attach(&library, &mut doc, "f1", "old.pdf", b"old");
    library.put_document(doc);

    let out = tempdir().unwrap();
    run(&library, options(out.path(), "%title")).await;

    library.remove_document("doc-a");
    let mut newcomer = document("doc-z", "Same Name", &[], None, "r1");
    attach(&library, &mut newcomer, "f2", "new.pdf", b"new");
    library.put_document(newcomer);

    let report = run(&library, options(out.path(), "%title")).await;

    assert_eq!(report.added(), 1);
    assert_eq!(report.retained, 1);
    assert_eq!(fs::read(out.path().join("Same Name/old.pdf")).unwrap(), b"old");
    assert_eq!(
        fs::read(out.path().join("Same Name (2)/new.pdf")).unwrap(),
        b"new"
    );
}

#[tokio::test]
async fn cancelled_run_downloads_nothing() {
    let library = FakeLibrary::new();
    let mut doc = document("doc-1", "A Paper", &[], None, "r1");
    attach(&library, &mut doc, "f1", "paper.pdf", b"content");
    library.put_document(doc);

    let out = tempdir().unwrap();
    let token = CancellationToken::new();
    token.cancel();
    let report = SyncEngine::new(options(out.path(), "%title"))
        .run(&library, token)
        .await
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(library.download_count(), 0);
    assert!(!out.path().join("A Paper").join(SIDECAR_FILE).exists());
}

#[tokio::test]
async fn listing_failure_is_fatal_and_modifies_nothing() {
    let library = FakeLibrary::new();
    library.fail_listing();

    let out = tempdir().unwrap();
    let backup = out.path().join("backup");
    let result = SyncEngine::new(options(&backup, "%title"))
        .run(&library, CancellationToken::new())
        .await;

    assert!(matches!(result, Err(SyncError::Listing(_))));
    assert!(!backup.exists());
}

#[tokio::test]
async fn invalid_pattern_aborts_before_any_io() {
    let library = FakeLibrary::new();
    library.put_document(document("doc-1", "A Paper", &[], None, "r1"));

    let out = tempdir().unwrap();
    let backup = out.path().join("backup");
    let result = SyncEngine::new(options(&backup, "%journal/%title"))
        .run(&library, CancellationToken::new())
        .await;

    assert!(matches!(result, Err(SyncError::Pattern(_))));
    assert!(!backup.exists());
}

#[tokio::test]
async fn recorded_pattern_wins_over_configured_pattern() {
    let library = FakeLibrary::new();
    let mut doc = document("doc-1", "A Paper", &["Smith"], Some(2020), "r1");
    attach(&library, &mut doc, "f1", "paper.pdf", b"content");
    library.put_document(doc);

    let out = tempdir().unwrap();
    run(&library, options(out.path(), "%title")).await;

    let report = run(&library, options(out.path(), "%author/%year")).await;

    assert_eq!(report.unchanged(), 1);
    assert!(out.path().join("A Paper").exists());
    assert!(!out.path().join("Smith").exists());
}

#[tokio::test]
async fn verify_mode_restores_tampered_files() {
    let library = FakeLibrary::new();
    let mut doc = document("doc-1", "A Paper", &[], None, "r1");
    attach(&library, &mut doc, "f1", "paper.pdf", b"pristine");
    library.put_document(doc);

    let out = tempdir().unwrap();
    run(&library, options(out.path(), "%title")).await;

    let local = out.path().join("A Paper/paper.pdf");
    fs::write(&local, b"tampered").unwrap();

    // Without verification the revision check skips the document entirely.
    let report = run(&library, options(out.path(), "%title")).await;
    assert_eq!(report.unchanged(), 1);
    assert_eq!(fs::read(&local).unwrap(), b"tampered");

    let mut opts = options(out.path(), "%title");
    opts.verify = true;
    let report = run(&library, opts).await;
    assert_eq!(report.updated(), 1);
    assert_eq!(fs::read(&local).unwrap(), b"pristine");
}
