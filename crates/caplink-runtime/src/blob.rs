use std::path::{Path, PathBuf};
use std::sync::Arc;

use caplink_core::contract::{BLOB_ROOT, OP_DELETE, OP_READ, OP_WRITE};
use caplink_core::{BlobRequest, ContractError, Payload, ProviderKind, ResolvedTarget};
use sha2::{Digest, Sha256};

use crate::audit::{AuditEvent, AuditKind, AuditSink, TracingAuditSink};
use crate::containment;
use crate::error::BlobError;
use crate::mediator::{MediatedCall, Mediator, MediatorFuture, Reply};

/// Storage root the link grants.
pub const ROOT: &str = BLOB_ROOT;

/// Executes `read`, `write` and `delete` under a link's storage root.
///
/// Operations are not cancelled mid-flight and take no in-process locks; the
/// filesystem orders concurrent writes (last writer wins).
pub struct BlobMediator {
    audit: Arc<dyn AuditSink>,
}

impl Default for BlobMediator {
    fn default() -> Self {
        Self::new(Arc::new(TracingAuditSink))
    }
}

impl BlobMediator {
    pub fn new(audit: Arc<dyn AuditSink>) -> Self {
        Self { audit }
    }

    /// The directory a target's operations are confined to. A root that
    /// overlaps another component's becomes a per-component subdirectory of
    /// the shared root.
    pub fn storage_root(target: &ResolvedTarget) -> Result<PathBuf, BlobError> {
        let root = target.value(ROOT).ok_or(BlobError::MissingRoot)?;
        match &target.shared_root {
            None => Ok(PathBuf::from(root)),
            Some(shared) => Ok(Path::new(shared).join(namespace_for(&target.source_component_id))),
        }
    }

    pub async fn read(&self, target: &ResolvedTarget, path: &str) -> Result<Vec<u8>, BlobError> {
        let full = self.contain(target, path).await?;
        match tokio::fs::read(&full).await {
            Ok(bytes) => {
                tracing::debug!(component = %target.source_component_id, path, len = bytes.len(), "Blob read");
                Ok(bytes)
            }
            Err(e) => Err(io_failure(path, e)),
        }
    }

    pub async fn write(
        &self,
        target: &ResolvedTarget,
        path: &str,
        data: &[u8],
    ) -> Result<(), BlobError> {
        let full = self.contain(target, path).await?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_failure(path, e))?;
        }
        // Parents may have just been created; re-check before the write lands.
        self.contain(target, path).await?;

        let staging = staging_path(&full);
        if let Err(e) = tokio::fs::write(&staging, data).await {
            return Err(io_failure(path, e));
        }
        if let Err(e) = tokio::fs::rename(&staging, &full).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(io_failure(path, e));
        }

        tracing::debug!(component = %target.source_component_id, path, len = data.len(), "Blob written");
        Ok(())
    }

    pub async fn delete(&self, target: &ResolvedTarget, path: &str) -> Result<(), BlobError> {
        let full = self.contain(target, path).await?;
        let meta = tokio::fs::symlink_metadata(&full)
            .await
            .map_err(|e| io_failure(path, e))?;
        if meta.is_dir() {
            return Err(BlobError::IoFailure {
                path: path.to_string(),
                source: std::io::Error::other("is a directory"),
            });
        }
        tokio::fs::remove_file(&full)
            .await
            .map_err(|e| io_failure(path, e))?;

        tracing::debug!(component = %target.source_component_id, path, "Blob deleted");
        Ok(())
    }

    /// Resolve `path` under the target's root, auditing any escape attempt.
    async fn contain(&self, target: &ResolvedTarget, path: &str) -> Result<PathBuf, BlobError> {
        let root = Self::storage_root(target)?;
        let full = containment::resolve_lexical(&root, path).map_err(|reason| self.escape(target, path, reason))?;
        containment::check_symlinks(&root, &full)
            .await
            .map_err(|reason| self.escape(target, path, reason))?;
        Ok(full)
    }

    fn escape(&self, target: &ResolvedTarget, path: &str, reason: String) -> BlobError {
        self.audit.record(AuditEvent {
            kind: AuditKind::PathEscape,
            component_id: target.source_component_id.clone(),
            provider_id: target.provider_id.clone(),
            path: path.to_string(),
            detail: reason.clone(),
        });
        BlobError::PathEscape {
            path: path.to_string(),
            reason,
        }
    }
}

impl Mediator for BlobMediator {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Blob
    }

    fn name(&self) -> &str {
        "blobstore"
    }

    fn execute(&self, call: MediatedCall) -> MediatorFuture<'_> {
        Box::pin(async move {
            let Payload::Blob(BlobRequest { path, data }) = call.payload else {
                return Err(mismatch(&call.target, &call.operation, "expected a blob payload").into());
            };

            match (call.operation.as_str(), data) {
                (OP_READ, _) => Ok(Reply::Bytes(self.read(&call.target, &path).await?)),
                (OP_WRITE, Some(data)) => {
                    self.write(&call.target, &path, &data).await?;
                    Ok(Reply::Unit)
                }
                (OP_DELETE, _) => {
                    self.delete(&call.target, &path).await?;
                    Ok(Reply::Unit)
                }
                (OP_WRITE, None) => {
                    Err(mismatch(&call.target, &call.operation, "write requires data").into())
                }
                _ => Err(mismatch(&call.target, &call.operation, "not a blobstore operation").into()),
            }
        })
    }
}

fn mismatch(target: &ResolvedTarget, operation: &str, reason: &str) -> ContractError {
    ContractError::ContractMismatch {
        contract_id: target.contract_id.clone(),
        operation: operation.to_string(),
        reason: reason.to_string(),
    }
}

/// Per-component directory name under a shared root.
///
/// Ids that are already a safe single path segment are used as-is; anything
/// else is replaced by a stable digest.
pub fn namespace_for(component_id: &str) -> String {
    let safe = !component_id.is_empty()
        && component_id != "."
        && component_id != ".."
        && component_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if safe {
        return component_id.to_string();
    }
    let digest = Sha256::digest(component_id.as_bytes());
    format!("c-{}", &hex::encode(digest)[..16])
}

fn staging_path(full: &Path) -> PathBuf {
    let name = full
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    full.with_file_name(format!(".{name}.{}.tmp", uuid::Uuid::new_v4().simple()))
}

fn io_failure(path: &str, e: std::io::Error) -> BlobError {
    if e.kind() == std::io::ErrorKind::NotFound {
        BlobError::NotFound(path.to_string())
    } else {
        BlobError::IoFailure {
            path: path.to_string(),
            source: e,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::audit::MemoryAuditSink;

    fn target(root: &Path, component: &str, shared: bool) -> ResolvedTarget {
        ResolvedTarget {
            provider_kind: ProviderKind::Blob,
            provider_id: "blob-fs".into(),
            source_component_id: component.into(),
            contract_id: "blobstore".into(),
            config: BTreeMap::from([(ROOT.to_string(), root.display().to_string())]),
            generation: 1,
            shared_root: shared.then(|| root.display().to_string()),
        }
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let mediator = BlobMediator::default();
        let target = target(tmp.path(), "app", false);

        mediator.write(&target, "greeting.txt", b"hello").await.unwrap();
        assert_eq!(mediator.read(&target, "greeting.txt").await.unwrap(), b"hello");
        assert!(tmp.path().join("greeting.txt").is_file());
    }

    #[tokio::test]
    async fn write_creates_parent_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let mediator = BlobMediator::default();
        let target = target(tmp.path(), "app", false);

        mediator.write(&target, "a/b/c.bin", &[1, 2, 3]).await.unwrap();
        assert_eq!(std::fs::read(tmp.path().join("a/b/c.bin")).unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn shared_root_is_namespaced_per_component() {
        let tmp = tempfile::tempdir().unwrap();
        let mediator = BlobMediator::default();
        let first = target(tmp.path(), "alpha", true);
        let second = target(tmp.path(), "beta", true);

        mediator.write(&first, "same.txt", b"a").await.unwrap();
        mediator.write(&second, "same.txt", b"b").await.unwrap();

        assert_eq!(mediator.read(&first, "same.txt").await.unwrap(), b"a");
        assert_eq!(mediator.read(&second, "same.txt").await.unwrap(), b"b");
        assert!(tmp.path().join("alpha/same.txt").is_file());
    }

    #[tokio::test]
    async fn traversal_is_audited_and_touches_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("root");
        let audit = Arc::new(MemoryAuditSink::new());
        let mediator = BlobMediator::new(audit.clone());
        let target = target(&root, "app", false);

        let err = mediator.write(&target, "../escaped.txt", b"x").await.unwrap_err();
        assert!(matches!(err, BlobError::PathEscape { .. }));
        assert!(!root.exists(), "rejected write must not create the root");
        assert!(!tmp.path().join("escaped.txt").exists());

        let events = audit.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, AuditKind::PathEscape);
        assert_eq!(events[0].path, "../escaped.txt");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlink_escape_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("root");
        let outside = tmp.path().join("outside");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::create_dir_all(&outside).unwrap();
        std::fs::write(outside.join("secret"), b"s").unwrap();
        std::os::unix::fs::symlink(&outside, root.join("door")).unwrap();

        let audit = Arc::new(MemoryAuditSink::new());
        let mediator = BlobMediator::new(audit.clone());
        let err = mediator
            .read(&target(&root, "app", false), "door/secret")
            .await
            .unwrap_err();
        assert!(matches!(err, BlobError::PathEscape { .. }));
        assert_eq!(audit.events().len(), 1);
    }

    #[tokio::test]
    async fn missing_blob_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let mediator = BlobMediator::default();
        let target = target(tmp.path(), "app", false);

        assert!(matches!(
            mediator.read(&target, "nope").await,
            Err(BlobError::NotFound(_))
        ));
        assert!(matches!(
            mediator.delete(&target, "nope").await,
            Err(BlobError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_removes_file_but_not_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let mediator = BlobMediator::default();
        let target = target(tmp.path(), "app", false);

        mediator.write(&target, "dir/file", b"x").await.unwrap();
        assert!(matches!(
            mediator.delete(&target, "dir").await,
            Err(BlobError::IoFailure { .. })
        ));
        mediator.delete(&target, "dir/file").await.unwrap();
        assert!(!tmp.path().join("dir/file").exists());
    }

    #[tokio::test]
    async fn missing_root_value_is_reported() {
        let mediator = BlobMediator::default();
        let mut target = target(Path::new("/unused"), "app", false);
        target.config.clear();
        assert!(matches!(
            mediator.read(&target, "x").await,
            Err(BlobError::MissingRoot)
        ));
    }

    #[test]
    fn namespace_hashes_unsafe_ids() {
        assert_eq!(namespace_for("http-blobstore"), "http-blobstore");
        let hashed = namespace_for("team/app");
        assert!(hashed.starts_with("c-"));
        assert_eq!(hashed.len(), 18);
        assert_eq!(hashed, namespace_for("team/app"));
        assert!(namespace_for("..").starts_with("c-"));
    }
}
