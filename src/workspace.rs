//! Per-user workspace store.
//!
//! Every user id maps to one directory under the configured workspace root.
//! Uploaded documents are staged there until a convert or merge command
//! consumes them, after which the whole directory is removed.
//!
//! ## Locking
//!
//! Operations for the same user must never interleave their filesystem
//! mutations, while different users must never wait on each other. The store
//! keeps one `tokio::sync::Mutex<()>` per user id and hands out its owned guard
//! inside [`Workspace`]: holding a `Workspace` *is* holding the user's lock.
//! Dropping the handle releases it, and the table entry is pruned once nobody
//! else is waiting.
//!
//! Several processes can share one workspace root (the CLI runs one process
//! per event), so the handle also holds an exclusive advisory lock on
//! `<root>/<user dir>.lock`. The lock file sits next to the workspace
//! directory and survives [`WorkspaceStore::clear`].

use crate::config::BotConfig;
use crate::error::BotError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use fs4::fs_std::FileExt;
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

// ── Identifiers ──────────────────────────────────────────────────────────

/// Opaque, stable identifier of a chat user, supplied by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(String);

static RE_SAFE_USER_DIR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").unwrap());

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Directory name for this user's workspace.
    ///
    /// Plain ids are used verbatim; anything else is hex-encoded behind a `~`
    /// so two distinct ids can never share a directory.
    pub fn dir_name(&self) -> String {
        if RE_SAFE_USER_DIR.is_match(&self.0) {
            self.0.clone()
        } else {
            let hex: String = self.0.bytes().map(|b| format!("{b:02x}")).collect();
            format!("~{hex}")
        }
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

// ── Documents ────────────────────────────────────────────────────────────

/// Kind of a staged document, decided by its filename extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentKind {
    Html,
    Pdf,
}

impl DocumentKind {
    /// Classify a filename; `None` for anything but `.html` / `.pdf`.
    pub fn from_filename(filename: &str) -> Option<Self> {
        let ext = Path::new(filename).extension()?.to_str()?;
        if ext.eq_ignore_ascii_case("html") {
            Some(DocumentKind::Html)
        } else if ext.eq_ignore_ascii_case("pdf") {
            Some(DocumentKind::Pdf)
        } else {
            None
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            DocumentKind::Html => "text/html",
            DocumentKind::Pdf => "application/pdf",
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentKind::Html => f.write_str("HTML"),
            DocumentKind::Pdf => f.write_str("PDF"),
        }
    }
}

/// One uploaded file living in a workspace.
#[derive(Debug, Clone, Serialize)]
pub struct StagedDocument {
    /// Sanitised filename, unique within the workspace.
    pub filename: String,
    pub path: PathBuf,
    pub kind: DocumentKind,
    pub size: u64,
    pub staged_at: SystemTime,
}

impl StagedDocument {
    /// Read the staged content.
    pub async fn read(&self) -> std::io::Result<Vec<u8>> {
        tokio::fs::read(&self.path).await
    }

    /// Filename without its extension.
    pub fn stem(&self) -> &str {
        Path::new(&self.filename)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.filename)
    }
}

static RE_UNSAFE_FILENAME_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[\\/:*?"<>|\x00-\x1f\x7f]"#).unwrap());

/// Reduce an uploaded filename to a safe base name.
///
/// Directory components are dropped, characters that are unsafe on common
/// filesystems become `_`, and a leading dot becomes `_` so staged files never
/// collide with in-flight temp files.
pub fn sanitize_filename(filename: &str) -> String {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename)
        .trim();
    let cleaned = RE_UNSAFE_FILENAME_CHARS.replace_all(base, "_");
    match cleaned.strip_prefix('.') {
        Some(rest) => format!("_{rest}"),
        None => cleaned.into_owned(),
    }
}

// ── Workspace handle ─────────────────────────────────────────────────────

type LockTable = Mutex<HashMap<UserId, Arc<tokio::sync::Mutex<()>>>>;

/// Exclusive handle to one user's workspace directory.
///
/// Obtained from [`WorkspaceStore::ensure_workspace`]. While it is alive no
/// other operation for the same user can proceed.
pub struct Workspace {
    user_id: UserId,
    dir: PathBuf,
    locks: Arc<LockTable>,
    _guard: OwnedMutexGuard<()>,
    // Closing the file releases the advisory lock.
    _file_lock: Option<File>,
}

impl Workspace {
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl fmt::Debug for Workspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workspace")
            .field("user_id", &self.user_id)
            .field("dir", &self.dir)
            .finish()
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        let mut table = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference in the table, one in our guard: nobody is waiting.
        if let Some(lock) = table.get(&self.user_id) {
            if Arc::strong_count(lock) <= 2 {
                table.remove(&self.user_id);
            }
        }
    }
}

// ── Store ────────────────────────────────────────────────────────────────

/// Maps user ids to isolated workspace directories.
pub struct WorkspaceStore {
    root: PathBuf,
    max_upload_bytes: usize,
    locks: Arc<LockTable>,
}

impl fmt::Debug for WorkspaceStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkspaceStore")
            .field("root", &self.root)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .finish()
    }
}

impl WorkspaceStore {
    pub fn new(root: impl Into<PathBuf>, max_upload_bytes: usize) -> Self {
        Self {
            root: root.into(),
            max_upload_bytes,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn from_config(config: &BotConfig) -> Self {
        Self::new(&config.workspace_root, config.max_upload_bytes)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory a user's workspace lives in, whether or not it exists yet.
    pub fn workspace_dir(&self, user_id: &UserId) -> PathBuf {
        self.root.join(user_id.dir_name())
    }

    /// Acquire the user's workspace, creating its directory if needed.
    ///
    /// Waits while another operation for the same user holds the workspace.
    pub async fn ensure_workspace(&self, user_id: &UserId) -> Result<Workspace, BotError> {
        let lock = {
            let mut table = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(table.entry(user_id.clone()).or_default())
        };
        let guard = lock.lock_owned().await;

        // From here on, dropping `workspace` on an error path prunes the table.
        let mut workspace = Workspace {
            user_id: user_id.clone(),
            dir: self.workspace_dir(user_id),
            locks: Arc::clone(&self.locks),
            _guard: guard,
            _file_lock: None,
        };
        workspace._file_lock = Some(self.lock_across_processes(user_id).await?);

        tokio::fs::create_dir_all(&workspace.dir)
            .await
            .map_err(|e| BotError::storage(&workspace.dir, e))?;
        debug!(
            "Workspace ready for user {}: {}",
            user_id,
            workspace.dir.display()
        );
        Ok(workspace)
    }

    /// Path of the advisory lock file guarding a user's workspace.
    pub fn lock_file_path(&self, user_id: &UserId) -> PathBuf {
        self.root.join(format!("{}.lock", user_id.dir_name()))
    }

    /// Take the exclusive file lock, waiting on a blocking thread.
    async fn lock_across_processes(&self, user_id: &UserId) -> Result<File, BotError> {
        let root = self.root.clone();
        let path = self.lock_file_path(user_id);
        tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&root).map_err(|e| BotError::storage(&root, e))?;
            let file = File::options()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&path)
                .map_err(|e| BotError::storage(&path, e))?;
            file.lock_exclusive()
                .map_err(|e| BotError::storage(&path, e))?;
            Ok(file)
        })
        .await
        .map_err(|e| BotError::Internal(format!("Lock task panicked: {e}")))?
    }

    /// Store an upload in the workspace.
    ///
    /// Rejected uploads leave the workspace untouched. A second upload with the
    /// same (sanitised) name replaces the first.
    pub async fn stage(
        &self,
        workspace: &Workspace,
        filename: &str,
        bytes: &[u8],
    ) -> Result<StagedDocument, BotError> {
        let name = sanitize_filename(filename);
        let kind = DocumentKind::from_filename(&name).ok_or_else(|| BotError::UnsupportedKind {
            filename: filename.to_string(),
        })?;
        if bytes.len() > self.max_upload_bytes {
            return Err(BotError::UploadTooLarge {
                filename: filename.to_string(),
                size: bytes.len(),
                limit: self.max_upload_bytes,
            });
        }

        let dir = workspace.dir.clone();
        let path = dir.join(&name);
        let content = bytes.to_vec();
        let target = path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&dir, &target, &content))
            .await
            .map_err(|e| BotError::Internal(format!("Stage task panicked: {e}")))??;

        info!(
            "Staged {} ({} bytes) for user {}",
            name,
            bytes.len(),
            workspace.user_id
        );
        Ok(StagedDocument {
            filename: name,
            path,
            kind,
            size: bytes.len() as u64,
            staged_at: SystemTime::now(),
        })
    }

    /// List staged documents of one kind, sorted by filename.
    pub async fn list(
        &self,
        workspace: &Workspace,
        kind: DocumentKind,
    ) -> Result<Vec<StagedDocument>, BotError> {
        let mut entries = match tokio::fs::read_dir(&workspace.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(BotError::storage(&workspace.dir, e)),
        };

        let mut docs = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| BotError::storage(&workspace.dir, e))?
        {
            let Ok(filename) = entry.file_name().into_string() else {
                warn!("Skipping non UTF-8 entry in {}", workspace.dir.display());
                continue;
            };
            if filename.starts_with('.') || DocumentKind::from_filename(&filename) != Some(kind) {
                continue;
            }
            let path = entry.path();
            let meta = entry
                .metadata()
                .await
                .map_err(|e| BotError::storage(&path, e))?;
            if !meta.is_file() {
                continue;
            }
            docs.push(StagedDocument {
                filename,
                path,
                kind,
                size: meta.len(),
                staged_at: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            });
        }

        docs.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(docs)
    }

    /// Remove the workspace directory and everything staged in it.
    ///
    /// Idempotent: clearing an absent workspace is a no-op.
    pub async fn clear(&self, workspace: &Workspace) -> Result<(), BotError> {
        match tokio::fs::remove_dir_all(&workspace.dir).await {
            Ok(()) => {
                info!("Cleared workspace for user {}", workspace.user_id);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BotError::storage(&workspace.dir, e)),
        }
    }

    /// Remove the workspace directory if nothing is staged in it.
    ///
    /// Used when a command finds no input, so looking does not leave an empty
    /// directory behind. A non-empty directory is left alone.
    pub async fn prune_if_empty(&self, workspace: &Workspace) {
        if tokio::fs::remove_dir(&workspace.dir).await.is_ok() {
            debug!("Removed empty workspace for user {}", workspace.user_id);
        }
    }
}

/// Write `content` to `target` through a temp file in the same directory.
///
/// The directory is recreated if a previous clear removed it while the handle
/// was still held.
fn write_atomic(dir: &Path, target: &Path, content: &[u8]) -> Result<(), BotError> {
    std::fs::create_dir_all(dir).map_err(|e| BotError::storage(dir, e))?;
    let mut tmp = tempfile::Builder::new()
        .prefix(".upload-")
        .tempfile_in(dir)
        .map_err(|e| BotError::storage(dir, e))?;
    tmp.write_all(content)
        .map_err(|e| BotError::storage(tmp.path(), e))?;
    tmp.persist(target)
        .map_err(|e| BotError::storage(target, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn store(root: &Path) -> WorkspaceStore {
        WorkspaceStore::new(root, 1024)
    }

    #[test]
    fn kind_from_filename() {
        assert_eq!(DocumentKind::from_filename("a.html"), Some(DocumentKind::Html));
        assert_eq!(DocumentKind::from_filename("A.HTML"), Some(DocumentKind::Html));
        assert_eq!(DocumentKind::from_filename("b.pdf"), Some(DocumentKind::Pdf));
        assert_eq!(DocumentKind::from_filename("report.txt"), None);
        assert_eq!(DocumentKind::from_filename("noext"), None);
        assert_eq!(DocumentKind::from_filename("page.htm"), None);
    }

    #[test]
    fn sanitize_strips_directories_and_unsafe_chars() {
        assert_eq!(sanitize_filename("../../etc/passwd.html"), "passwd.html");
        assert_eq!(sanitize_filename("C:\\docs\\a.pdf"), "a.pdf");
        assert_eq!(sanitize_filename("what?.html"), "what_.html");
        assert_eq!(sanitize_filename(".hidden.pdf"), "_hidden.pdf");
        assert_eq!(sanitize_filename("отчёт.html"), "отчёт.html");
    }

    #[test]
    fn user_dir_names_are_injective() {
        assert_eq!(UserId::from(42).dir_name(), "42");
        assert_eq!(UserId::new("a_b").dir_name(), "a_b");
        assert_eq!(UserId::new("a/b").dir_name(), "~612f62");
        assert_ne!(UserId::new("a/b").dir_name(), UserId::new("a_b").dir_name());
        assert_eq!(UserId::new("..").dir_name(), "~2e2e");
    }

    #[tokio::test]
    async fn stage_then_list() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        let ws = store.ensure_workspace(&UserId::from(1)).await.unwrap();

        store.stage(&ws, "b.html", b"<p>b</p>").await.unwrap();
        store.stage(&ws, "a.html", b"<p>a</p>").await.unwrap();
        store.stage(&ws, "x.pdf", b"%PDF-1.4").await.unwrap();

        let html = store.list(&ws, DocumentKind::Html).await.unwrap();
        let names: Vec<_> = html.iter().map(|d| d.filename.as_str()).collect();
        assert_eq!(names, ["a.html", "b.html"]);
        assert_eq!(html[0].read().await.unwrap(), b"<p>a</p>");

        let pdf = store.list(&ws, DocumentKind::Pdf).await.unwrap();
        assert_eq!(pdf.len(), 1);
        assert_eq!(pdf[0].size, 8);
    }

    #[tokio::test]
    async fn stage_same_name_last_write_wins() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        let ws = store.ensure_workspace(&UserId::from(1)).await.unwrap();

        store.stage(&ws, "a.html", b"first").await.unwrap();
        store.stage(&ws, "a.html", b"second").await.unwrap();

        let docs = store.list(&ws, DocumentKind::Html).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].read().await.unwrap(), b"second");
    }

    #[tokio::test]
    async fn unsupported_upload_is_rejected_without_mutation() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        let ws = store.ensure_workspace(&UserId::from(1)).await.unwrap();

        let err = store.stage(&ws, "report.txt", b"hi").await.unwrap_err();
        assert!(matches!(err, BotError::UnsupportedKind { .. }));
        assert_eq!(std::fs::read_dir(ws.dir()).unwrap().count(), 0);
        assert!(store.list(&ws, DocumentKind::Html).await.unwrap().is_empty());
        assert!(store.list(&ws, DocumentKind::Pdf).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let store = WorkspaceStore::new(tmp.path(), 4);
        let ws = store.ensure_workspace(&UserId::from(1)).await.unwrap();

        let err = store.stage(&ws, "big.pdf", b"%PDF-1.7").await.unwrap_err();
        assert!(matches!(err, BotError::UploadTooLarge { size: 8, limit: 4, .. }));
        assert!(store.list(&ws, DocumentKind::Pdf).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn clear_then_list_is_empty_and_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        let ws = store.ensure_workspace(&UserId::from(7)).await.unwrap();
        store.stage(&ws, "a.html", b"x").await.unwrap();
        store.stage(&ws, "a.pdf", b"y").await.unwrap();

        store.clear(&ws).await.unwrap();
        assert!(!ws.dir().exists());
        assert!(store.list(&ws, DocumentKind::Html).await.unwrap().is_empty());
        assert!(store.list(&ws, DocumentKind::Pdf).await.unwrap().is_empty());
        store.clear(&ws).await.unwrap();

        // Staging after a clear recreates the directory.
        store.stage(&ws, "c.html", b"z").await.unwrap();
        assert_eq!(store.list(&ws, DocumentKind::Html).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn same_user_waits_for_handle() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(store(tmp.path()));
        let user = UserId::from(3);

        let first = store.ensure_workspace(&user).await.unwrap();
        let waiter = {
            let store = Arc::clone(&store);
            let user = user.clone();
            tokio::spawn(async move { store.ensure_workspace(&user).await.map(|_| ()) })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished(), "second handle must wait");

        drop(first);
        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("waiter should finish once the handle is dropped")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn different_users_do_not_contend() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        let _a = store.ensure_workspace(&UserId::from(1)).await.unwrap();
        let b = tokio::time::timeout(
            Duration::from_secs(1),
            store.ensure_workspace(&UserId::from(2)),
        )
        .await
        .expect("other user's workspace must not block");
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn lock_entries_are_pruned() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        let ws = store.ensure_workspace(&UserId::from(9)).await.unwrap();
        assert_eq!(store.locks.lock().unwrap().len(), 1);
        drop(ws);
        assert!(store.locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_directory_creation_prunes_lock_entry() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        // A plain file where the workspace directory should go.
        std::fs::write(tmp.path().join("5"), b"in the way").unwrap();

        let err = store.ensure_workspace(&UserId::from(5)).await.unwrap_err();
        assert!(matches!(err, BotError::Storage { .. }), "got: {err}");
        assert!(store.locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn stores_sharing_a_root_exclude_each_other() {
        let tmp = tempfile::tempdir().unwrap();
        let first = store(tmp.path());
        let second = Arc::new(store(tmp.path()));
        let user = UserId::from(8);

        let held = first.ensure_workspace(&user).await.unwrap();
        assert!(first.lock_file_path(&user).exists());

        let late = {
            let second = Arc::clone(&second);
            let user = user.clone();
            tokio::spawn(async move {
                let ws = second.ensure_workspace(&user).await.unwrap();
                second.stage(&ws, "late.html", b"late").await.unwrap();
            })
        };
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!late.is_finished(), "second store must wait for the file lock");

        first.clear(&held).await.unwrap();
        drop(held);
        tokio::time::timeout(Duration::from_secs(5), late)
            .await
            .expect("second store should proceed once the handle is dropped")
            .unwrap();

        // The upload happened after the clear, so it survives.
        assert!(first.workspace_dir(&user).join("late.html").exists());
    }

    #[tokio::test]
    async fn prune_if_empty_only_removes_empty_workspaces() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());

        let empty = store.ensure_workspace(&UserId::from(1)).await.unwrap();
        store.prune_if_empty(&empty).await;
        assert!(!empty.dir().exists());

        let full = store.ensure_workspace(&UserId::from(2)).await.unwrap();
        store.stage(&full, "a.pdf", b"%PDF").await.unwrap();
        store.prune_if_empty(&full).await;
        assert!(full.dir().join("a.pdf").exists());
    }
}
