//! src/services/object_service.rs
//!
//! ObjectService — the operations behind the HTTP API. Every call rescans the
//! datasites tree (no cache), applies the discovery gate for the requester,
//! and only then looks at permissions, resolves files or mutates manifests.
//! Manifest I/O is synchronous and runs on the blocking pool; file payloads
//! are streamed with `tokio::fs`.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt, pin_mut};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::{
    collections::BTreeMap,
    fs as std_fs,
    io::{self, ErrorKind, Read},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    models::{
        locator::SyftUrl,
        manifest::{ArtifactKind, ManifestError, ObjectManifest, ObjectType},
        permissions::{EffectiveAccess, Permissions, PermissionsUpdate},
    },
    services::{
        registry::{ObjectRegistry, ObjectSnapshot},
        resolver::Resolver,
    },
};

/// Characters of file content included in object details.
pub const PREVIEW_CHARS: usize = 2000;
/// Folder entries listed in a folder preview.
const PREVIEW_ENTRIES: usize = 50;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("object `{0}` not found")]
    ObjectNotFound(String),
    #[error("{side} file of object `{uid}` not found")]
    FileNotFound { uid: Uuid, side: &'static str },
    #[error("`{requester}` is not allowed to {action} object `{uid}`")]
    PermissionDenied {
        requester: String,
        action: &'static str,
        uid: Uuid,
    },
    #[error("invalid request: {0}")]
    Invalid(String),
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    CreatedAt,
    UpdatedAt,
    Name,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ListObjectsParams {
    pub search: Option<String>,
    pub email_filter: Option<String>,
    #[serde(default)]
    pub sort: SortKey,
    #[serde(default)]
    pub order: SortOrder,
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
pub struct FileExists {
    pub private: bool,
    pub mock: bool,
}

/// One row of the object table.
#[derive(Clone, Debug, Serialize)]
pub struct ObjectSummary {
    pub index: usize,
    pub uid: Uuid,
    pub name: String,
    pub description: String,
    pub object_type: ObjectType,
    #[serde(rename = "type")]
    pub file_type: String,
    pub email: String,
    pub private_url: SyftUrl,
    pub mock_url: SyftUrl,
    pub syftobject_url: SyftUrl,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub permissions: Permissions,
    pub metadata: BTreeMap<String, Value>,
    pub access: EffectiveAccess,
    pub file_exists: FileExists,
}

#[derive(Clone, Debug, Serialize)]
pub struct ListObjectsResult {
    pub objects: Vec<ObjectSummary>,
    pub total_count: usize,
    pub offset: usize,
    pub limit: Option<usize>,
    pub has_more: bool,
    pub search_info: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct ArtifactPaths {
    pub private: Option<PathBuf>,
    pub mock: Option<PathBuf>,
    pub syftobject: Option<PathBuf>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct FilePreviews {
    pub private: Option<String>,
    pub mock: Option<String>,
}

/// Full view of one object. Paths and previews are only filled for the
/// sides the requester may read.
#[derive(Clone, Debug, Serialize)]
pub struct ObjectDetail {
    #[serde(flatten)]
    pub summary: ObjectSummary,
    pub options: crate::models::options::ObjectOptions,
    pub file_paths: ArtifactPaths,
    pub file_previews: FilePreviews,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct DetailsUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub metadata: Option<BTreeMap<String, Value>>,
}

#[derive(Clone, Debug, Serialize)]
pub struct FileWriteResult {
    pub uid: Uuid,
    pub file_type: &'static str,
    pub file_path: PathBuf,
    pub content_length: u64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize)]
pub struct DeleteOutcome {
    pub uid: Uuid,
    pub deleted_files: Vec<&'static str>,
}

#[derive(Clone, Debug, Serialize)]
pub struct BulkFailure {
    pub uid: String,
    pub error: String,
}

/// Result of deleting several objects one by one.
#[derive(Clone, Debug, Serialize)]
pub struct BulkDeleteReport {
    pub succeeded: Vec<Uuid>,
    pub failed: Vec<BulkFailure>,
    pub message: String,
}

impl BulkDeleteReport {
    /// Every attempted unit failed.
    pub fn all_failed(&self) -> bool {
        self.succeeded.is_empty() && !self.failed.is_empty()
    }
}

/// An open artifact ready to be streamed out.
pub struct ArtifactReader {
    pub uid: Uuid,
    pub kind: ArtifactKind,
    pub path: PathBuf,
    pub len: u64,
    pub file: File,
}

/// ObjectService provides the object operations:
/// - list / get with the discovery gate applied first
/// - create from inline contents, files or folders (see `object_factory`)
/// - read and write private/mock content behind the read/write lists
/// - permission and detail updates, single and bulk delete (owner only)
#[derive(Clone)]
pub struct ObjectService {
    pub registry: ObjectRegistry,
    pub resolver: Resolver,
    /// Requester assumed when a request does not name one.
    pub user_email: Arc<str>,
}

impl ObjectService {
    pub fn new(datasites_root: impl Into<PathBuf>, user_email: impl Into<String>) -> Self {
        let root = datasites_root.into();
        let resolver = Resolver::new(&root);
        Self {
            registry: ObjectRegistry::new(resolver.datasites_root().to_path_buf()),
            resolver,
            user_email: Arc::from(user_email.into()),
        }
    }

    pub fn datasites_root(&self) -> &Path {
        self.resolver.datasites_root()
    }

    /// Run synchronous filesystem work on the blocking pool.
    pub(crate) async fn blocking<T, F>(&self, work: F) -> ServiceResult<T>
    where
        F: FnOnce(&ObjectService) -> ServiceResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let service = self.clone();
        tokio::task::spawn_blocking(move || work(&service)).await?
    }

    /// Fresh scan of every manifest under the datasites root.
    pub async fn snapshot(&self) -> ServiceResult<ObjectSnapshot> {
        self.blocking(|svc| Ok(svc.registry.refresh())).await
    }

    /// Number of objects `requester` can discover after a rescan.
    pub async fn refresh(&self, requester: &str) -> ServiceResult<usize> {
        let requester = requester.to_string();
        self.blocking(move |svc| Ok(svc.registry.refresh().visible_to(&requester).len()))
            .await
    }

    pub async fn list_objects(
        &self,
        requester: &str,
        params: ListObjectsParams,
    ) -> ServiceResult<ListObjectsResult> {
        let requester = requester.to_string();
        self.blocking(move |svc| svc.list_blocking(&requester, &params))
            .await
    }

    fn list_blocking(
        &self,
        requester: &str,
        params: &ListObjectsParams,
    ) -> ServiceResult<ListObjectsResult> {
        let mut collection = self.registry.refresh().visible_to(requester);
        if let Some(keyword) = params.search.as_deref().filter(|s| !s.trim().is_empty()) {
            collection = collection.search(keyword.trim());
        }
        if let Some(pattern) = params.email_filter.as_deref().filter(|s| !s.trim().is_empty()) {
            collection = collection.filter_by_email(pattern.trim());
        }

        let mut rows = collection.to_vec();
        sort_objects(&mut rows, params.sort, params.order);

        let total_count = rows.len();
        let start = params.offset.min(total_count);
        let end = params
            .limit
            .map(|limit| start.saturating_add(limit).min(total_count))
            .unwrap_or(total_count);

        let objects = rows[start..end]
            .iter()
            .enumerate()
            .map(|(i, manifest)| self.summarize(manifest, requester, start + i + 1))
            .collect();

        Ok(ListObjectsResult {
            objects,
            total_count,
            offset: params.offset,
            limit: params.limit,
            has_more: end < total_count,
            search_info: collection.search_info().map(str::to_string),
        })
    }

    pub async fn get_object(&self, requester: &str, uid: &str) -> ServiceResult<ObjectDetail> {
        let requester = requester.to_string();
        let uid = uid.to_string();
        self.blocking(move |svc| {
            let snapshot = svc.registry.refresh();
            let manifest = find_visible(&snapshot, &uid, &requester)?;
            Ok(svc.detail(manifest, &requester))
        })
        .await
    }

    pub async fn unique_emails(&self, requester: &str) -> ServiceResult<Vec<String>> {
        let requester = requester.to_string();
        self.blocking(move |svc| Ok(svc.registry.refresh().visible_to(&requester).unique_emails()))
            .await
    }

    pub async fn unique_names(&self, requester: &str) -> ServiceResult<Vec<String>> {
        let requester = requester.to_string();
        self.blocking(move |svc| Ok(svc.registry.refresh().visible_to(&requester).unique_names()))
            .await
    }

    /// Open the private or mock file named by `locator` for streaming.
    pub async fn open_artifact(
        &self,
        requester: &str,
        locator: &str,
    ) -> ServiceResult<ArtifactReader> {
        let url: SyftUrl = locator
            .parse()
            .map_err(|err: ManifestError| ServiceError::Invalid(err.to_string()))?;
        let requester = requester.to_string();

        let (uid, kind, path) = self
            .blocking(move |svc| {
                let snapshot = svc.registry.refresh();
                let manifest = snapshot
                    .find_by_locator(&url)
                    .filter(|m| m.is_discoverable_by(&requester))
                    .ok_or_else(|| ServiceError::ObjectNotFound(url.to_string()))?;
                let kind = if manifest.private_url == url {
                    ArtifactKind::Private
                } else {
                    ArtifactKind::Mock
                };
                if !manifest.permits(kind.read_access(), &requester) {
                    return Err(ServiceError::PermissionDenied {
                        requester,
                        action: "read",
                        uid: manifest.uid,
                    });
                }
                if manifest.is_folder() {
                    return Err(ServiceError::Invalid(
                        "folder objects cannot be fetched as a single file".into(),
                    ));
                }
                let path = svc
                    .resolver
                    .resolve(manifest, kind)
                    .ok_or(ServiceError::FileNotFound {
                        uid: manifest.uid,
                        side: kind.as_str(),
                    })?;
                Ok((manifest.uid, kind, path))
            })
            .await?;

        let file = File::open(&path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                ServiceError::FileNotFound {
                    uid,
                    side: kind.as_str(),
                }
            } else {
                ServiceError::Io(err)
            }
        })?;
        let len = file.metadata().await?.len();
        Ok(ArtifactReader {
            uid,
            kind,
            path,
            len,
            file,
        })
    }

    /// Replace the content of the private or mock file.
    ///
    /// - Requires the matching write permission.
    /// - Streams into a temp file beside the target, then renames over it.
    /// - Bumps `updated_at` and saves the manifest.
    pub async fn write_artifact_stream<S>(
        &self,
        requester: &str,
        uid: &str,
        side: &str,
        stream: S,
    ) -> ServiceResult<FileWriteResult>
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        let kind = ArtifactKind::from_side(side).ok_or_else(|| {
            ServiceError::Invalid(format!(
                "invalid file type `{side}`, must be `private` or `mock`"
            ))
        })?;
        let requester = requester.to_string();
        let uid = uid.to_string();

        let (manifest, target) = self
            .blocking(move |svc| {
                let snapshot = svc.registry.refresh();
                let manifest = find_visible(&snapshot, &uid, &requester)?.clone();
                if !manifest.permits(kind.write_access(), &requester) {
                    return Err(ServiceError::PermissionDenied {
                        requester,
                        action: "write",
                        uid: manifest.uid,
                    });
                }
                if manifest.is_folder() {
                    return Err(ServiceError::Invalid(
                        "folder objects have no single file to write".into(),
                    ));
                }
                let target = svc
                    .resolver
                    .resolve(&manifest, kind)
                    .unwrap_or_else(|| svc.resolver.conventional_path(&manifest, kind));
                Ok((manifest, target))
            })
            .await?;

        let content_length = write_stream_atomically(&target, stream).await?;

        let result_path = target.clone();
        let manifest = self
            .blocking(move |svc| {
                let mut manifest = manifest;
                manifest.touch();
                svc.persist(&mut manifest)?;
                Ok(manifest)
            })
            .await?;

        info!(
            uid = %manifest.uid,
            side = kind.as_str(),
            bytes = content_length,
            "updated object file"
        );
        Ok(FileWriteResult {
            uid: manifest.uid,
            file_type: kind.as_str(),
            file_path: result_path,
            content_length,
            updated_at: manifest.updated_at,
        })
    }

    /// Replace some of the access lists. Owner only.
    pub async fn update_permissions(
        &self,
        requester: &str,
        uid: &str,
        update: PermissionsUpdate,
    ) -> ServiceResult<(ObjectManifest, Vec<&'static str>)> {
        let requester = requester.to_string();
        let uid = uid.to_string();
        self.blocking(move |svc| {
            let snapshot = svc.registry.refresh();
            let mut manifest = find_owned(&snapshot, &uid, &requester, "change permissions of")?;
            let changed = manifest.permissions.apply(update);
            if changed.is_empty() {
                return Err(ServiceError::Invalid("no permission lists given".into()));
            }
            manifest.touch();
            svc.persist(&mut manifest)?;
            info!(uid = %manifest.uid, ?changed, "updated object permissions");
            Ok((manifest, changed))
        })
        .await
    }

    /// Rename, re-describe or replace user metadata. Owner only.
    pub async fn update_details(
        &self,
        requester: &str,
        uid: &str,
        update: DetailsUpdate,
    ) -> ServiceResult<ObjectDetail> {
        let requester = requester.to_string();
        let uid = uid.to_string();
        self.blocking(move |svc| {
            let snapshot = svc.registry.refresh();
            let mut manifest = find_owned(&snapshot, &uid, &requester, "edit")?;
            if let Some(name) = update.name {
                let name = name.trim();
                if name.is_empty() {
                    return Err(ServiceError::Invalid("name must not be empty".into()));
                }
                manifest.name = name.to_string();
            }
            if let Some(description) = update.description {
                manifest.description = Some(description);
            }
            if let Some(mut metadata) = update.metadata {
                manifest.options.lift_from_metadata(&mut metadata);
                manifest.metadata = metadata;
            }
            manifest.touch();
            svc.persist(&mut manifest)?;
            info!(uid = %manifest.uid, "updated object details");
            Ok(svc.detail(&manifest, &requester))
        })
        .await
    }

    pub async fn delete_object(&self, requester: &str, uid: &str) -> ServiceResult<DeleteOutcome> {
        let requester = requester.to_string();
        let uid = uid.to_string();
        self.blocking(move |svc| {
            let snapshot = svc.registry.refresh();
            svc.delete_blocking(&snapshot, &uid, &requester)
        })
        .await
    }

    /// Delete each object independently; failures are collected, not raised.
    pub async fn delete_objects(
        &self,
        requester: &str,
        uids: Vec<String>,
    ) -> ServiceResult<BulkDeleteReport> {
        let requester = requester.to_string();
        self.blocking(move |svc| {
            let snapshot = svc.registry.refresh();
            let mut succeeded = Vec::new();
            let mut failed = Vec::new();
            for uid in uids {
                match svc.delete_blocking(&snapshot, &uid, &requester) {
                    Ok(outcome) => succeeded.push(outcome.uid),
                    Err(err) => {
                        warn!(%uid, "bulk delete failed: {}", err);
                        failed.push(BulkFailure {
                            uid,
                            error: err.to_string(),
                        });
                    }
                }
            }
            let message = format!("{} succeeded, {} failed", succeeded.len(), failed.len());
            info!("bulk delete: {}", message);
            Ok(BulkDeleteReport {
                succeeded,
                failed,
                message,
            })
        })
        .await
    }

    /// Remove the manifest, then the data files that live inside the owner's
    /// datasite. Files referenced in place elsewhere are left alone.
    fn delete_blocking(
        &self,
        snapshot: &ObjectSnapshot,
        uid: &str,
        requester: &str,
    ) -> ServiceResult<DeleteOutcome> {
        let manifest = find_owned(snapshot, uid, requester, "delete")?;
        let owned_root = self.datasites_root().join(manifest.owner());
        let manifest_path = manifest
            .source_path()
            .map(Path::to_path_buf)
            .ok_or_else(|| ServiceError::ObjectNotFound(manifest.uid.to_string()))?;
        let mut deleted_files = Vec::new();

        // Data before the manifest; a failed removal keeps the object listed.
        for kind in [ArtifactKind::Private, ArtifactKind::Mock] {
            let Some(path) = self.resolver.resolve(&manifest, kind) else {
                continue;
            };
            if !path.starts_with(&owned_root) {
                debug!(
                    uid = %manifest.uid,
                    "keeping {} outside the owner's datasite",
                    path.display()
                );
                continue;
            }
            let removed = if path.is_dir() {
                std_fs::remove_dir_all(&path)
            } else {
                std_fs::remove_file(&path)
            };
            if let Err(err) = removed {
                warn!(
                    uid = %manifest.uid,
                    "failed to delete {} file {}: {}",
                    kind.as_str(),
                    path.display(),
                    err
                );
                return Err(err.into());
            }
            deleted_files.push(kind.as_str());
        }

        std_fs::remove_file(&manifest_path)?;
        deleted_files.push(ArtifactKind::Manifest.as_str());

        info!(uid = %manifest.uid, ?deleted_files, "deleted object");
        Ok(DeleteOutcome {
            uid: manifest.uid,
            deleted_files,
        })
    }

    /// Save a manifest back where it was loaded from.
    pub(crate) fn persist(&self, manifest: &mut ObjectManifest) -> ServiceResult<()> {
        let path = manifest
            .source_path()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.resolver.conventional_path(manifest, ArtifactKind::Manifest));
        let use_relative = manifest.options.use_relative_paths;
        self.resolver.save(manifest, path, use_relative)?;
        Ok(())
    }

    pub(crate) fn summarize(
        &self,
        manifest: &ObjectManifest,
        requester: &str,
        index: usize,
    ) -> ObjectSummary {
        ObjectSummary {
            index,
            uid: manifest.uid,
            name: if manifest.name.is_empty() {
                "Unnamed Object".to_string()
            } else {
                manifest.name.clone()
            },
            description: manifest.description.clone().unwrap_or_default(),
            object_type: manifest.object_type,
            file_type: manifest.file_type(),
            email: manifest.owner().to_string(),
            private_url: manifest.private_url.clone(),
            mock_url: manifest.mock_url.clone(),
            syftobject_url: manifest.syftobject_url.clone(),
            created_at: manifest.created_at,
            updated_at: manifest.updated_at,
            permissions: manifest.permissions.clone(),
            metadata: manifest.metadata.clone(),
            access: manifest.effective_access(requester),
            file_exists: FileExists {
                private: self.resolver.exists(manifest, ArtifactKind::Private),
                mock: self.resolver.exists(manifest, ArtifactKind::Mock),
            },
        }
    }

    pub(crate) fn detail(&self, manifest: &ObjectManifest, requester: &str) -> ObjectDetail {
        let summary = self.summarize(manifest, requester, 1);
        let resolved = self.resolver.resolve_all(manifest);

        let readable = |kind: ArtifactKind| match kind {
            ArtifactKind::Private => summary.access.private_read,
            ArtifactKind::Mock => summary.access.mock_read,
            ArtifactKind::Manifest => true,
        };
        let path_for = |kind: ArtifactKind| {
            readable(kind)
                .then(|| resolved.get(kind).map(Path::to_path_buf))
                .flatten()
        };
        let preview_for = |kind: ArtifactKind| {
            let path = path_for(kind)?;
            Some(preview(&path).unwrap_or_else(|err| {
                format!("Error reading {} file: {}", kind.as_str(), err)
            }))
        };

        ObjectDetail {
            file_paths: ArtifactPaths {
                private: path_for(ArtifactKind::Private),
                mock: path_for(ArtifactKind::Mock),
                syftobject: path_for(ArtifactKind::Manifest),
            },
            file_previews: FilePreviews {
                private: preview_for(ArtifactKind::Private),
                mock: preview_for(ArtifactKind::Mock),
            },
            options: manifest.options,
            summary,
        }
    }
}

/// Look up `uid` among objects `requester` may discover. Undiscoverable
/// objects are reported exactly like missing ones.
fn find_visible<'a>(
    snapshot: &'a ObjectSnapshot,
    uid: &str,
    requester: &str,
) -> ServiceResult<&'a ObjectManifest> {
    Uuid::parse_str(uid.trim())
        .ok()
        .and_then(|parsed| snapshot.find(&parsed))
        .filter(|manifest| manifest.is_discoverable_by(requester))
        .ok_or_else(|| ServiceError::ObjectNotFound(uid.to_string()))
}

/// Like `find_visible`, but the requester must also own the object.
fn find_owned(
    snapshot: &ObjectSnapshot,
    uid: &str,
    requester: &str,
    action: &'static str,
) -> ServiceResult<ObjectManifest> {
    let manifest = find_visible(snapshot, uid, requester)?;
    if manifest.owner() != requester {
        return Err(ServiceError::PermissionDenied {
            requester: requester.to_string(),
            action,
            uid: manifest.uid,
        });
    }
    Ok(manifest.clone())
}

fn sort_objects(rows: &mut [ObjectManifest], key: SortKey, order: SortOrder) {
    rows.sort_by(|a, b| {
        let ordering = match key {
            SortKey::CreatedAt => a.created_at.cmp(&b.created_at),
            SortKey::UpdatedAt => a.updated_at.cmp(&b.updated_at),
            SortKey::Name => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
        }
        .then_with(|| a.uid.cmp(&b.uid));
        match order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    });
}

/// First `PREVIEW_CHARS` characters of a file, or the first entries of a
/// folder.
fn preview(path: &Path) -> io::Result<String> {
    if path.is_dir() {
        let mut names: Vec<String> = std_fs::read_dir(path)?
            .filter_map(Result::ok)
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names.truncate(PREVIEW_ENTRIES);
        return Ok(names.join("\n"));
    }
    let mut buf = Vec::new();
    std_fs::File::open(path)?
        .take((PREVIEW_CHARS * 4) as u64)
        .read_to_end(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).chars().take(PREVIEW_CHARS).collect())
}

/// Stream bytes into a temp file next to `target`, fsync, then rename over
/// `target`. The temp file is removed on any error.
pub(crate) async fn write_stream_atomically<S>(target: &Path, stream: S) -> ServiceResult<u64>
where
    S: Stream<Item = io::Result<Bytes>> + Send + 'static,
{
    let parent = target.parent().map(Path::to_path_buf).ok_or_else(|| {
        ServiceError::Io(io::Error::other("target path missing parent directory"))
    })?;
    fs::create_dir_all(&parent).await?;
    let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
    let mut file = File::create(&tmp_path).await?;

    let mut written: u64 = 0;
    pin_mut!(stream);
    while let Some(chunk_res) = stream.next().await {
        let chunk = match chunk_res {
            Ok(chunk) => chunk,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(ServiceError::Io(err));
            }
        };
        written += chunk.len() as u64;
        if let Err(err) = file.write_all(&chunk).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(ServiceError::Io(err));
        }
    }
    if let Err(err) = file.flush().await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(ServiceError::Io(err));
    }
    if let Err(err) = file.sync_all().await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(ServiceError::Io(err));
    }
    drop(file);

    if let Err(err) = fs::rename(&tmp_path, target).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(ServiceError::Io(err));
    }
    debug!("wrote {} bytes to {}", written, target.display());
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{options::Placement, permissions::AccessList},
        services::object_factory::CreateObjectRequest,
    };
    use futures::stream;
    use tempfile::TempDir;

    const ALICE: &str = "alice@example.com";
    const BOB: &str = "bob@example.com";
    const CAROL: &str = "carol@example.com";

    fn service() -> (TempDir, ObjectService) {
        let dir = TempDir::new().unwrap();
        let service = ObjectService::new(dir.path().join("datasites"), ALICE);
        (dir, service)
    }

    fn inline(name: &str, private: &str, mock: &str) -> CreateObjectRequest {
        CreateObjectRequest {
            name: Some(name.to_string()),
            private_contents: Some(private.to_string()),
            mock_contents: Some(mock.to_string()),
            filename: Some(format!("{}.txt", name.to_lowercase())),
            ..Default::default()
        }
    }

    /// Makes a directory's entries impossible to remove for the test's duration.
    mod undeletable {
        use std::{fs, os::unix::fs::PermissionsExt, path::Path, process::Command};

        pub struct Lock<'a> {
            dir: &'a Path,
            immutable: bool,
        }

        impl Drop for Lock<'_> {
            fn drop(&mut self) {
                if self.immutable {
                    let _ = Command::new("chattr").arg("-i").arg(self.dir).status();
                }
                let _ = fs::set_permissions(self.dir, fs::Permissions::from_mode(0o755));
            }
        }

        fn holds(dir: &Path) -> bool {
            let check = dir.join(".write-check");
            match fs::write(&check, b"") {
                Ok(()) => {
                    let _ = fs::remove_file(&check);
                    false
                }
                Err(_) => true,
            }
        }

        /// Read-only mode is enough for normal users; root needs the
        /// immutable attribute. `None` when neither works.
        pub fn lock(dir: &Path) -> Option<Lock<'_>> {
            fs::set_permissions(dir, fs::Permissions::from_mode(0o555)).ok()?;
            let mut lock = Lock { dir, immutable: false };
            if holds(dir) {
                return Some(lock);
            }
            lock.immutable = Command::new("chattr")
                .arg("+i")
                .arg(dir)
                .status()
                .is_ok_and(|status| status.success());
            (lock.immutable && holds(dir)).then_some(lock)
        }
    }

    fn body(text: &str) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
        stream::iter(vec![Ok(Bytes::from(text.to_string()))])
    }

    #[tokio::test]
    async fn others_see_mock_but_not_private() {
        let (_dir, svc) = service();
        let created = svc
            .create_object(ALICE, inline("Salaries", "secret rows", "fake rows"))
            .await
            .unwrap();
        let uid = created.uid.to_string();

        let listing = svc.list_objects(BOB, ListObjectsParams::default()).await.unwrap();
        assert_eq!(listing.total_count, 1);
        let row = &listing.objects[0];
        assert_eq!(row.index, 1);
        assert!(row.access.mock_read);
        assert!(!row.access.private_read);
        assert!(row.file_exists.private && row.file_exists.mock);

        let detail = svc.get_object(BOB, &uid).await.unwrap();
        assert!(detail.file_paths.private.is_none());
        assert!(detail.file_previews.private.is_none());
        assert_eq!(detail.file_previews.mock.as_deref(), Some("fake rows"));

        let denied = svc
            .open_artifact(BOB, &created.private_url.to_string())
            .await;
        assert!(matches!(denied, Err(ServiceError::PermissionDenied { .. })));

        let mock = svc.open_artifact(BOB, &created.mock_url.to_string()).await.unwrap();
        assert_eq!(mock.kind, ArtifactKind::Mock);
        assert_eq!(mock.len, "fake rows".len() as u64);

        let own = svc.get_object(ALICE, &uid).await.unwrap();
        assert_eq!(own.file_previews.private.as_deref(), Some("secret rows"));
    }

    #[tokio::test]
    async fn hidden_objects_look_missing() {
        let (_dir, svc) = service();
        let mut request = inline("Hidden", "p", "m");
        request.permissions.discovery_read = Some(AccessList::only(ALICE));
        let created = svc.create_object(ALICE, request).await.unwrap();
        let uid = created.uid.to_string();

        let listing = svc.list_objects(BOB, ListObjectsParams::default()).await.unwrap();
        assert_eq!(listing.total_count, 0);
        assert!(matches!(
            svc.get_object(BOB, &uid).await,
            Err(ServiceError::ObjectNotFound(_))
        ));
        assert!(matches!(
            svc.delete_object(BOB, &uid).await,
            Err(ServiceError::ObjectNotFound(_))
        ));
        assert_eq!(svc.refresh(ALICE).await.unwrap(), 1);
        assert_eq!(svc.refresh(BOB).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn gates_are_checked_independently() {
        let (_dir, svc) = service();
        let mut request = inline("Shared", "private", "mock");
        request.permissions.mock_read = Some(AccessList::only(CAROL));
        request.permissions.mock_write = Some(AccessList::only(BOB));
        let created = svc.create_object(ALICE, request).await.unwrap();
        let uid = created.uid.to_string();

        let bob = svc.get_object(BOB, &uid).await.unwrap().summary.access;
        assert!(bob.mock_write);
        assert!(!bob.mock_read);
        let carol = svc.get_object(CAROL, &uid).await.unwrap().summary.access;
        assert!(carol.mock_read);
        assert!(!carol.mock_write);
        assert!(!carol.private_read);

        let written = svc
            .write_artifact_stream(BOB, &uid, "mock", body("rewritten"))
            .await
            .unwrap();
        assert_eq!(written.content_length, 9);
        assert!(written.updated_at > created.updated_at);
        assert_eq!(std_fs::read_to_string(&written.file_path).unwrap(), "rewritten");

        let denied = svc
            .write_artifact_stream(CAROL, &uid, "mock", body("nope"))
            .await;
        assert!(matches!(denied, Err(ServiceError::PermissionDenied { .. })));
        let bad_side = svc
            .write_artifact_stream(BOB, &uid, "syftobject", body("nope"))
            .await;
        assert!(matches!(bad_side, Err(ServiceError::Invalid(_))));
    }

    #[tokio::test]
    async fn discovery_does_not_grant_reads() {
        const DAVE: &str = "dave@example.com";
        let (_dir, svc) = service();
        let mut request = inline("Split", "real", "fake");
        request.permissions.discovery_read = Some(AccessList::from_strings(["public"]));
        request.permissions.mock_read = Some(AccessList::only(BOB));
        request.permissions.private_read = Some(AccessList::only(CAROL));
        let created = svc.create_object(ALICE, request).await.unwrap();
        let uid = created.uid.to_string();
        let private = created.private_url.to_string();
        let mock = created.mock_url.to_string();

        let bob = svc.get_object(BOB, &uid).await.unwrap();
        assert!(bob.summary.access.mock_read && !bob.summary.access.private_read);
        assert_eq!(bob.file_previews.mock.as_deref(), Some("fake"));
        assert!(bob.file_previews.private.is_none());
        assert!(svc.open_artifact(BOB, &mock).await.is_ok());
        assert!(matches!(
            svc.open_artifact(BOB, &private).await,
            Err(ServiceError::PermissionDenied { .. })
        ));

        let carol = svc.get_object(CAROL, &uid).await.unwrap();
        assert!(carol.summary.access.private_read && !carol.summary.access.mock_read);
        assert_eq!(carol.file_previews.private.as_deref(), Some("real"));
        assert!(carol.file_previews.mock.is_none());
        assert!(svc.open_artifact(CAROL, &private).await.is_ok());
        assert!(matches!(
            svc.open_artifact(CAROL, &mock).await,
            Err(ServiceError::PermissionDenied { .. })
        ));

        // Discoverable but unreadable: listed, with nothing to show.
        let listing = svc.list_objects(DAVE, ListObjectsParams::default()).await.unwrap();
        assert_eq!(listing.total_count, 1);
        let dave = svc.get_object(DAVE, &uid).await.unwrap();
        assert_eq!(dave.summary.access, EffectiveAccess::default());
        assert!(dave.file_paths.private.is_none() && dave.file_paths.mock.is_none());
        assert!(dave.file_previews.private.is_none() && dave.file_previews.mock.is_none());
        for url in [&private, &mock] {
            assert!(matches!(
                svc.open_artifact(DAVE, url).await,
                Err(ServiceError::PermissionDenied { .. })
            ));
        }

        let narrowed = PermissionsUpdate {
            discovery_read: Some(AccessList::from_strings([BOB, CAROL])),
            ..Default::default()
        };
        svc.update_permissions(ALICE, &uid, narrowed).await.unwrap();
        let listing = svc.list_objects(DAVE, ListObjectsParams::default()).await.unwrap();
        assert_eq!(listing.total_count, 0);
        assert!(matches!(
            svc.get_object(DAVE, &uid).await,
            Err(ServiceError::ObjectNotFound(_))
        ));
        assert!(matches!(
            svc.open_artifact(DAVE, &mock).await,
            Err(ServiceError::ObjectNotFound(_))
        ));
        assert!(svc.get_object(BOB, &uid).await.unwrap().summary.access.mock_read);
    }

    #[tokio::test]
    async fn only_the_owner_changes_permissions_and_details() {
        let (_dir, svc) = service();
        let created = svc.create_object(ALICE, inline("Report", "p", "m")).await.unwrap();
        let uid = created.uid.to_string();

        let update = PermissionsUpdate {
            private_read: Some(AccessList::from_strings([ALICE, BOB])),
            ..Default::default()
        };
        assert!(matches!(
            svc.update_permissions(BOB, &uid, update.clone()).await,
            Err(ServiceError::PermissionDenied { .. })
        ));

        let (updated, changed) = svc.update_permissions(ALICE, &uid, update).await.unwrap();
        assert_eq!(changed, vec!["private_read"]);
        assert!(updated.updated_at > created.updated_at);
        assert!(svc.get_object(BOB, &uid).await.unwrap().summary.access.private_read);

        assert!(matches!(
            svc.update_permissions(ALICE, &uid, PermissionsUpdate::default()).await,
            Err(ServiceError::Invalid(_))
        ));

        let details = DetailsUpdate {
            name: Some("Quarterly Report".into()),
            ..Default::default()
        };
        assert!(svc.update_details(BOB, &uid, details.clone()).await.is_err());
        let detail = svc.update_details(ALICE, &uid, details).await.unwrap();
        assert_eq!(detail.summary.name, "Quarterly Report");
    }

    #[tokio::test]
    async fn bulk_delete_reports_each_unit() {
        let (dir, svc) = service();
        let first = svc.create_object(ALICE, inline("One", "1", "1m")).await.unwrap();
        let source = dir.path().join("two");
        std_fs::create_dir_all(&source).unwrap();
        std_fs::write(source.join("rows.csv"), "a,b\n").unwrap();
        let second = svc
            .create_object(
                ALICE,
                CreateObjectRequest {
                    name: Some("Two".into()),
                    private_folder: Some(source),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let private_path = first.private_url.to_local_path(svc.datasites_root());
        let locked_path = second.private_url.to_local_path(svc.datasites_root());
        assert!(private_path.exists() && locked_path.is_dir());

        let Some(lock) = undeletable::lock(&locked_path) else {
            eprintln!("cannot make {} undeletable here, skipping", locked_path.display());
            return;
        };
        let report = svc
            .delete_objects(ALICE, vec![first.uid.to_string(), second.uid.to_string()])
            .await
            .unwrap();
        drop(lock);
        assert_eq!(report.succeeded.len(), 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].uid, second.uid.to_string());
        assert_eq!(report.message, "1 succeeded, 1 failed");
        assert!(!report.all_failed());
        assert!(!private_path.exists());

        // The failed object keeps its manifest and can be deleted once unlocked.
        let listing = svc.list_objects(ALICE, ListObjectsParams::default()).await.unwrap();
        assert_eq!(listing.total_count, 1);
        assert_eq!(listing.objects[0].uid, second.uid);
        svc.delete_object(ALICE, &second.uid.to_string()).await.unwrap();
        assert!(!locked_path.exists());
    }

    #[tokio::test]
    async fn delete_keeps_referenced_files() {
        let (dir, svc) = service();
        let outside = dir.path().join("outside.csv");
        std_fs::write(&outside, "a,b\n1,2\n").unwrap();

        let request = CreateObjectRequest {
            name: Some("Referenced".into()),
            private_file: Some(outside.clone()),
            options: crate::models::options::ObjectOptions {
                use_relative_paths: false,
                placement: Placement::Reference,
            },
            ..Default::default()
        };
        let created = svc.create_object(ALICE, request).await.unwrap();
        let detail = svc.get_object(ALICE, &created.uid.to_string()).await.unwrap();
        assert_eq!(detail.file_previews.private.as_deref(), Some("a,b\n1,2\n"));

        let outcome = svc.delete_object(ALICE, &created.uid.to_string()).await.unwrap();
        assert!(outcome.deleted_files.contains(&"syftobject"));
        assert!(!outcome.deleted_files.contains(&"private"));
        assert!(outside.exists());
    }

    #[tokio::test]
    async fn listing_sorts_searches_and_pages() {
        let (_dir, svc) = service();
        for name in ["Alpha", "Bravo", "Charlie"] {
            svc.create_object(ALICE, inline(name, "p", "m")).await.unwrap();
        }
        svc.create_object(BOB, inline("Delta", "p", "m")).await.unwrap();

        let newest_first = svc.list_objects(CAROL, ListObjectsParams::default()).await.unwrap();
        assert_eq!(newest_first.objects[0].name, "Delta");

        let page = svc
            .list_objects(
                CAROL,
                ListObjectsParams {
                    sort: SortKey::Name,
                    order: SortOrder::Asc,
                    limit: Some(2),
                    offset: 1,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let names: Vec<_> = page.objects.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["Bravo", "Charlie"]);
        assert_eq!(page.objects[0].index, 2);
        assert!(page.has_more);
        assert_eq!(page.total_count, 4);

        let filtered = svc
            .list_objects(
                CAROL,
                ListObjectsParams {
                    email_filter: Some("bob".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(filtered.total_count, 1);
        assert_eq!(filtered.search_info.as_deref(), Some("Filtered by email containing 'bob'"));

        assert_eq!(svc.unique_emails(CAROL).await.unwrap(), vec![ALICE, BOB]);
        assert_eq!(svc.unique_names(CAROL).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn folder_objects_cannot_be_streamed() {
        let (dir, svc) = service();
        let folder = dir.path().join("images");
        std_fs::create_dir_all(&folder).unwrap();
        std_fs::write(folder.join("a.png"), "png").unwrap();

        let created = svc
            .create_object(
                ALICE,
                CreateObjectRequest {
                    private_folder: Some(folder),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let result = svc.open_artifact(ALICE, &created.private_url.to_string()).await;
        assert!(matches!(result, Err(ServiceError::Invalid(_))));
        let detail = svc.get_object(ALICE, &created.uid.to_string()).await.unwrap();
        assert_eq!(detail.summary.file_type, "folder");
        assert_eq!(detail.file_previews.private.as_deref(), Some("a.png"));
    }
}
