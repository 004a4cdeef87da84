//! The sync engine: reconciles the remote library against the local tree
//!
//! A run has four phases. Plan: list the remote library, load the manifest
//! and compute the deterministic path assignment (fatal errors only happen
//! here, before anything is touched). Moves: documents whose resolved path
//! changed are renamed on disk, staging through `.stage/` so path swaps
//! settle cleanly; with pruning enabled, remotely-deleted documents are
//! removed. Reconcile: every remaining document is brought up to date, in
//! parallel up to the configured concurrency; a failure only marks that one
//! document as failed. Finish: the manifest is written atomically.

mod report;

pub use report::{SyncAction, SyncReport};

use crate::domain::{RemoteDocument, RemoteFile};
use crate::error::{DocumentError, Result, SyncError};
use crate::fsio;
use crate::manifest::{BackupManifest, MANIFEST_FILE};
use crate::naming::{self, Pattern};
use crate::session::RemoteLibrary;
use crate::sidecar::{DocumentSidecar, FileRecord, SIDECAR_FILE};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Staging directory for document moves; never a valid document path
const STAGE_DIR: &str = ".stage";

/// Prefix of in-document hold files used while file renames settle
const HOLD_PREFIX: &str = ".hold-";

/// Options for a sync run
#[derive(Clone, Debug)]
pub struct SyncOptions {
    /// Root of the local backup tree
    pub output_dir: PathBuf,
    /// Naming pattern for new backup trees; an existing tree's recorded
    /// pattern takes precedence
    pub pattern: String,
    /// Maximum number of documents reconciled concurrently
    pub concurrency: usize,
    /// Delete local copies of documents that disappeared remotely, and
    /// sweep files the manifest does not account for
    pub prune: bool,
    /// Re-hash local files instead of trusting the sidecar ledger
    pub verify: bool,
}

impl SyncOptions {
    pub fn new(output_dir: impl Into<PathBuf>, pattern: impl Into<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            pattern: pattern.into(),
            concurrency: 4,
            prune: false,
            verify: false,
        }
    }
}

/// One document's work item for the reconcile phase
struct Job {
    doc: RemoteDocument,
    target: PathBuf,
    had_entry: bool,
    moved_from: Option<String>,
}

enum OutcomeKind {
    Synced,
    Unchanged,
    Skipped,
    Failed(DocumentError),
}

struct Outcome {
    id: String,
    target: PathBuf,
    had_entry: bool,
    moved_from: Option<String>,
    kind: OutcomeKind,
}

enum StepError {
    Cancelled,
    Failed(DocumentError),
}

impl From<DocumentError> for StepError {
    fn from(err: DocumentError) -> Self {
        StepError::Failed(err)
    }
}

/// Drives a one-way sync of the remote library into the output directory
pub struct SyncEngine {
    options: SyncOptions,
}

impl SyncEngine {
    pub fn new(options: SyncOptions) -> Self {
        Self { options }
    }

    /// Run a full sync. Fatal errors abort before any modification; per-
    /// document errors are collected in the returned report.
    pub async fn run(
        &self,
        session: &dyn RemoteLibrary,
        cancel: CancellationToken,
    ) -> Result<SyncReport> {
        let root = self.options.output_dir.clone();

        // Plan: nothing on disk is touched until listing succeeds.
        let mut manifest = if root.join(MANIFEST_FILE).exists() {
            let manifest = BackupManifest::load(&root)?;
            if let Some(last_sync) = manifest.last_sync {
                info!(%last_sync, "resuming existing backup");
            }
            if manifest.pattern != self.options.pattern {
                warn!(
                    configured = %self.options.pattern,
                    active = %manifest.pattern,
                    "configured pattern ignored in favor of the pattern this backup was created with"
                );
            }
            manifest
        } else {
            BackupManifest::new(&self.options.pattern)
        };
        let pattern = Pattern::parse(&manifest.pattern)?;

        let documents = session
            .list_documents()
            .await
            .map_err(|err| SyncError::Listing(err.to_string()))?;
        info!(documents = documents.len(), "listed remote library");

        fs::create_dir_all(&root)?;
        let stage_root = root.join(STAGE_DIR);
        if stage_root.exists() {
            warn!("removing leftover staging directory from an interrupted run");
            let _ = fs::remove_dir_all(&stage_root);
        }

        let mut report = SyncReport::new();
        let remote_ids: BTreeSet<&str> = documents.iter().map(|doc| doc.id()).collect();
        let had_entry: BTreeSet<String> = manifest
            .document_ids()
            .map(str::to_string)
            .collect();
        let departed: Vec<String> = manifest
            .document_ids()
            .filter(|id| !remote_ids.contains(id))
            .map(str::to_string)
            .collect();

        // Departed documents: prune or retain.
        let mut reserved: BTreeSet<PathBuf> = BTreeSet::new();
        if self.options.prune {
            for id in &departed {
                if let Some(old_path) = manifest.remove(id) {
                    self.remove_document_dir(&root, Path::new(&old_path));
                    report.record(id, SyncAction::Removed { old_path });
                }
            }
            self.sweep_unaccounted(&manifest, &root);
        } else {
            for id in &departed {
                if let Some(path) = manifest.document_path(id) {
                    debug!(document = %id, path, "document gone from the library; local copy retained");
                    reserved.insert(PathBuf::from(path));
                }
            }
            report.retained = departed.len();
        }

        let assignments =
            naming::assign_paths(&pattern, documents.iter().map(|doc| &doc.meta), &reserved)?;

        // Moves: sequential so that path swaps cannot race.
        let mut move_failures: BTreeMap<String, DocumentError> = BTreeMap::new();
        let mut moved_from: BTreeMap<String, String> = BTreeMap::new();
        let mut staged: Vec<(String, PathBuf)> = Vec::new();
        let mut sorted: Vec<&RemoteDocument> = documents.iter().collect();
        sorted.sort_unstable_by(|a, b| a.id().cmp(b.id()));
        for doc in &sorted {
            let id = doc.id();
            let Some(target) = assignments.get(id) else {
                continue;
            };
            let Some(stored) = manifest.document_path(id).map(str::to_string) else {
                continue;
            };
            if Path::new(&stored) == target.as_path() {
                continue;
            }
            if !fsio::is_clean_relative(Path::new(&stored)) {
                warn!(document = %id, path = %stored, "recorded path is not a clean relative path; handling as new");
                manifest.set_path(id, target);
                continue;
            }
            let stored_full = root.join(&stored);
            if !stored_full.exists() {
                warn!(
                    document = %id,
                    old = %stored,
                    new = %target.display(),
                    "document directory no longer exists; handling as new"
                );
                manifest.set_path(id, target);
                continue;
            }
            if manifest.used_by_other(id, target) {
                let stage = stage_root.join(id);
                match fsio::move_dir(&stored_full, &stage) {
                    Ok(()) => {
                        manifest.remove(id);
                        moved_from.insert(id.to_string(), stored.clone());
                        staged.push((id.to_string(), target.clone()));
                    }
                    Err(err) => {
                        move_failures.insert(id.to_string(), DocumentError::local(stage, err));
                    }
                }
            } else {
                match fsio::move_dir(&stored_full, &root.join(target)) {
                    Ok(()) => {
                        if let Some(parent) = stored_full.parent() {
                            let _ = fsio::remove_empty_parents(parent, &root);
                        }
                        manifest.set_path(id, target);
                        moved_from.insert(id.to_string(), stored);
                    }
                    Err(err) => {
                        move_failures
                            .insert(id.to_string(), DocumentError::local(root.join(target), err));
                    }
                }
            }
        }
        for (id, target) in staged {
            let stage = stage_root.join(&id);
            if manifest.used_by_other(&id, &target) {
                warn!(
                    document = %id,
                    path = %target.display(),
                    "target path still occupied after staging; marking document as failed"
                );
                let err = io::Error::new(io::ErrorKind::AlreadyExists, "target path occupied");
                move_failures.insert(id.clone(), DocumentError::local(root.join(&target), err));
                continue;
            }
            match fsio::move_dir(&stage, &root.join(&target)) {
                Ok(()) => {
                    manifest.set_path(&id, &target);
                }
                Err(err) => {
                    move_failures.insert(id.clone(), DocumentError::local(root.join(&target), err));
                }
            }
        }
        let _ = fs::remove_dir_all(&stage_root);

        // Reconcile, bounded by the concurrency limit.
        let jobs: Vec<Job> = documents
            .into_iter()
            .filter(|doc| !move_failures.contains_key(doc.id()))
            .filter_map(|doc| {
                let target = assignments.get(doc.id())?.clone();
                Some(Job {
                    had_entry: had_entry.contains(doc.id()),
                    moved_from: moved_from.get(doc.id()).cloned(),
                    doc,
                    target,
                })
            })
            .collect();
        for (id, error) in move_failures {
            report.record(id, SyncAction::Failed { error });
        }

        let concurrency = self.options.concurrency.max(1);
        let options = &self.options;
        let root_dir: &Path = &root;
        let outcomes: Vec<Outcome> = stream::iter(jobs)
            .map(|job| {
                let cancel = cancel.clone();
                async move { process_document(session, options, root_dir, job, cancel).await }
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        // The manifest only learns about a document once its files and
        // sidecar are fully on disk.
        for outcome in outcomes {
            let path = outcome.target.to_string_lossy().into_owned();
            match outcome.kind {
                OutcomeKind::Synced => {
                    manifest.set_path(&outcome.id, &outcome.target);
                    let action = match (outcome.had_entry, outcome.moved_from) {
                        (false, _) => SyncAction::Added { path },
                        (true, Some(old_path)) => SyncAction::MovedAndUpdated { old_path, path },
                        (true, None) => SyncAction::Updated { path },
                    };
                    report.record(outcome.id, action);
                }
                OutcomeKind::Unchanged => {
                    report.record(outcome.id, SyncAction::Unchanged);
                }
                OutcomeKind::Skipped => {
                    report.cancelled = true;
                }
                OutcomeKind::Failed(error) => {
                    report.record(outcome.id, SyncAction::Failed { error });
                }
            }
        }

        // A run that changed nothing leaves the tree byte-identical.
        if manifest.is_dirty() {
            manifest.last_sync = Some(Utc::now());
            manifest.save(&root)?;
        }
        Ok(report)
    }

    fn remove_document_dir(&self, root: &Path, dir: &Path) {
        if !fsio::is_clean_relative(dir) {
            warn!(path = %dir.display(), "recorded path is not a clean relative path; skipping removal");
            return;
        }
        let full = root.join(dir);
        if !full.exists() {
            warn!(
                path = %dir.display(),
                "a removed document used to be here, but the directory no longer exists; skipping removal"
            );
            return;
        }
        if let Err(err) = fs::remove_dir_all(&full) {
            warn!(path = %full.display(), %err, "failed to remove document directory");
            return;
        }
        if let Some(parent) = full.parent() {
            let _ = fsio::remove_empty_parents(parent, root);
        }
    }

    /// Remove anything in the backup tree the manifest does not account
    /// for. Best effort: problems are logged, never fatal.
    fn sweep_unaccounted(&self, manifest: &BackupManifest, root: &Path) {
        self.sweep_dir(manifest, root, Path::new(""), true);
    }

    fn sweep_dir(&self, manifest: &BackupManifest, root: &Path, rel: &Path, is_root: bool) {
        let full = root.join(rel);
        let entries = match fs::read_dir(&full) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(path = %full.display(), %err, "failed to list directory during sweep");
                return;
            }
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy().into_owned();
            if is_root && (name == MANIFEST_FILE || name == STAGE_DIR) {
                continue;
            }
            let rel_child = rel.join(&name);
            let full_child = entry.path();
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if !is_dir {
                warn!(path = %rel_child.display(), "file is not in any document directory; removing");
                let _ = fs::remove_file(&full_child);
            } else if manifest.owner_of(&rel_child).is_some() {
                self.sweep_document_dir(&full_child);
            } else if manifest.contains_documents(&rel_child) {
                self.sweep_dir(manifest, root, &rel_child, false);
            } else {
                warn!(path = %rel_child.display(), "directory does not contain any known documents; removing");
                let _ = fs::remove_dir_all(&full_child);
            }
        }
    }

    fn sweep_document_dir(&self, dir: &Path) {
        let sidecar = match DocumentSidecar::load(dir) {
            Ok(Some(sidecar)) => sidecar,
            Ok(None) => {
                warn!(path = %dir.display(), "document directory has no sidecar; removing");
                let _ = fs::remove_dir_all(dir);
                return;
            }
            Err(err) => {
                warn!(path = %dir.display(), %err, "unreadable sidecar; leaving directory for the next reconcile");
                return;
            }
        };
        let known: BTreeSet<&str> = sidecar.known_names().collect();
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(path = %dir.display(), %err, "failed to list document directory during sweep");
                return;
            }
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy().into_owned();
            if name == SIDECAR_FILE || known.contains(name.as_str()) {
                continue;
            }
            warn!(path = %entry.path().display(), "file does not correspond to any remote file; removing");
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if is_dir {
                let _ = fs::remove_dir_all(entry.path());
            } else {
                let _ = fs::remove_file(entry.path());
            }
        }
    }
}

async fn process_document(
    session: &dyn RemoteLibrary,
    options: &SyncOptions,
    root: &Path,
    job: Job,
    cancel: CancellationToken,
) -> Outcome {
    let id = job.doc.id().to_string();
    let dir = root.join(&job.target);
    let mut outcome = Outcome {
        id: id.clone(),
        target: job.target.clone(),
        had_entry: job.had_entry,
        moved_from: job.moved_from.clone(),
        kind: OutcomeKind::Skipped,
    };
    if cancel.is_cancelled() {
        return outcome;
    }

    let sidecar = match DocumentSidecar::load(&dir) {
        Ok(sidecar) => sidecar,
        Err(err) => {
            warn!(document = %id, %err, "could not read sidecar; handling as new document");
            None
        }
    };

    if let Some(existing) = &sidecar {
        let revision_matches =
            !existing.revision.is_empty() && existing.revision == job.doc.revision();
        if job.had_entry && job.moved_from.is_none() && revision_matches && !options.verify {
            debug!(document = %id, "unchanged");
            outcome.kind = OutcomeKind::Unchanged;
            return outcome;
        }
    }

    let records = sidecar.map(|s| s.files).unwrap_or_default();
    match reconcile_files(session, options, &job.doc, &dir, records, &cancel).await {
        Ok(records) => {
            let mut sidecar = DocumentSidecar::new(job.doc.meta.clone(), &job.target);
            sidecar.files = records;
            match sidecar.save(&dir) {
                Ok(()) => {
                    info!(document = %id, path = %job.target.display(), "synced");
                    outcome.kind = OutcomeKind::Synced;
                }
                Err(err) => {
                    outcome.kind = OutcomeKind::Failed(DocumentError::Sidecar(err));
                }
            }
        }
        Err(StepError::Cancelled) => {
            outcome.kind = OutcomeKind::Skipped;
        }
        Err(StepError::Failed(error)) => {
            warn!(document = %id, %error, "document failed; previous state left untouched");
            outcome.kind = OutcomeKind::Failed(error);
        }
    }
    outcome
}

/// Bring one document directory in line with its remote file set.
///
/// The ledger in `records` is updated in place and returned for the new
/// sidecar. Any error aborts the document without writing the sidecar, so
/// the previously recorded state stays authoritative.
async fn reconcile_files(
    session: &dyn RemoteLibrary,
    options: &SyncOptions,
    doc: &RemoteDocument,
    dir: &Path,
    mut records: BTreeMap<String, FileRecord>,
    cancel: &CancellationToken,
) -> std::result::Result<BTreeMap<String, FileRecord>, StepError> {
    fs::create_dir_all(dir).map_err(|err| DocumentError::local(dir, err))?;
    if let Err(err) = clear_stale_temps(dir) {
        warn!(path = %dir.display(), %err, "failed to clear leftover temporary files");
    }

    let mut remote_ids: BTreeSet<String> = BTreeSet::new();
    let mut held: Vec<(String, String)> = Vec::new();
    for file in &doc.files {
        remote_ids.insert(file.id.clone());
        let name = target_file_name(file);
        let final_path = dir.join(&name);

        // A name currently claimed by a different file id is settled after
        // removals, via a hold file.
        let path = if DocumentSidecar::name_used_by_other(&records, &file.id, &name) {
            held.push((file.id.clone(), name.clone()));
            dir.join(format!("{}{}", HOLD_PREFIX, file.id))
        } else {
            final_path
        };

        match records.get(&file.id).cloned() {
            Some(prev) => {
                if prev.file_name != name {
                    let prev_path = dir.join(&prev.file_name);
                    if prev_path.exists() {
                        fs::rename(&prev_path, &path)
                            .map_err(|err| DocumentError::local(&path, err))?;
                        if needs_update(file, &prev, &path, options.verify)? {
                            download(session, doc.id(), file, &path, cancel).await?;
                        }
                    } else {
                        warn!(
                            document = %doc.id(),
                            file = %name,
                            old = %prev.file_name,
                            "file is gone from its recorded location; downloading again"
                        );
                        download(session, doc.id(), file, &path, cancel).await?;
                    }
                } else if path.exists() {
                    if needs_update(file, &prev, &path, options.verify)? {
                        download(session, doc.id(), file, &path, cancel).await?;
                    }
                } else {
                    warn!(
                        document = %doc.id(),
                        file = %name,
                        "file no longer exists locally; downloading again"
                    );
                    download(session, doc.id(), file, &path, cancel).await?;
                }
            }
            None => {
                download(session, doc.id(), file, &path, cancel).await?;
            }
        }
        records.insert(
            file.id.clone(),
            FileRecord {
                file_name: name,
                filehash: file.filehash.clone(),
            },
        );
    }

    // Files detached remotely are removed locally.
    let gone: Vec<String> = records
        .keys()
        .filter(|id| !remote_ids.contains(*id))
        .cloned()
        .collect();
    for id in gone {
        if let Some(record) = records.remove(&id) {
            let path = dir.join(&record.file_name);
            if path.exists() {
                fs::remove_file(&path).map_err(|err| DocumentError::local(&path, err))?;
            } else {
                warn!(
                    document = %doc.id(),
                    file = %record.file_name,
                    "file used to exist, but is already gone; skipping removal"
                );
            }
        }
    }

    // Settle held files now that removals freed their names.
    for (id, name) in held {
        let hold = dir.join(format!("{}{}", HOLD_PREFIX, id));
        if DocumentSidecar::name_used_by_other(&records, &id, &name) {
            warn!(
                document = %doc.id(),
                file = %name,
                "file name is still claimed by another attached file; does the document contain duplicates? skipping"
            );
            records.remove(&id);
            let _ = fs::remove_file(&hold);
            continue;
        }
        let path = dir.join(&name);
        fs::rename(&hold, &path).map_err(|err| DocumentError::local(&path, err))?;
    }

    Ok(records)
}

/// Remove write temps and hold files a previous interrupted run left behind
fn clear_stale_temps(dir: &Path) -> io::Result<()> {
    fsio::clear_partials(dir)?;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if name.to_string_lossy().starts_with(HOLD_PREFIX) {
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

/// Local file name for a remote file: sanitized, with the sidecar name
/// kept out of reach.
fn target_file_name(file: &RemoteFile) -> String {
    let name = naming::sanitize_file_name(&file.file_name);
    if name == SIDECAR_FILE {
        format!("{}-{}", file.id, name)
    } else {
        name
    }
}

fn needs_update(
    file: &RemoteFile,
    prev: &FileRecord,
    path: &Path,
    verify: bool,
) -> std::result::Result<bool, StepError> {
    if verify {
        if let Some(expected) = &file.filehash {
            let actual =
                fsio::sha1_file(path).map_err(|err| DocumentError::local(path, err))?;
            return Ok(actual != *expected);
        }
    }
    Ok(file.filehash != prev.filehash)
}

async fn download(
    session: &dyn RemoteLibrary,
    document_id: &str,
    file: &RemoteFile,
    path: &Path,
    cancel: &CancellationToken,
) -> std::result::Result<(), StepError> {
    if cancel.is_cancelled() {
        return Err(StepError::Cancelled);
    }
    let bytes = session
        .download_file(document_id, &file.id)
        .await
        .map_err(|err| {
            StepError::Failed(DocumentError::Download {
                file_id: file.id.clone(),
                message: err.to_string(),
            })
        })?;
    if let Some(expected) = &file.filehash {
        let actual = fsio::sha1_hex(&bytes);
        if actual != *expected {
            warn!(
                document = %document_id,
                file = %file.file_name,
                %expected,
                %actual,
                "downloaded content does not match the declared hash"
            );
        }
    }
    fsio::write_atomic(path, &bytes).map_err(|err| DocumentError::local(path, err))?;
    debug!(document = %document_id, file = %file.file_name, bytes = bytes.len(), "downloaded");
    Ok(())
}
