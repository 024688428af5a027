//! Object creation.
//!
//! A create request names its content per side (inline text, an existing
//! file, or an existing folder). Content is placed in the owner's datasite
//! according to the requested `Placement`, the manifest gets locators and
//! fallbacks for every artifact, and is written under `public/objects`.

use serde::Deserialize;
use serde_yaml::Value;
use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
};
use tracing::{debug, info};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::{
    models::{
        locator::{SyftUrl, Visibility, is_path_segment},
        manifest::{
            ArtifactKind, ObjectManifest, ObjectType, manifest_file_name, slug, uid_prefix,
        },
        options::{ObjectOptions, Placement},
        permissions::{Permissions, PermissionsUpdate},
    },
    services::object_service::{ObjectService, ServiceError, ServiceResult},
};

/// Characters of private content echoed into a generated mock.
const MOCK_SAMPLE_CHARS: usize = 50;
/// Characters of content hashed into a generated name.
const NAME_SAMPLE_CHARS: usize = 20;

/// Body of a create request. Content fields are flat; `source()` validates
/// which combinations make sense.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct CreateObjectRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    /// Owner; defaults to the requester and must match it.
    pub email: Option<String>,
    #[serde(alias = "file_content")]
    pub private_contents: Option<String>,
    pub mock_contents: Option<String>,
    /// File name for inline private content.
    pub filename: Option<String>,
    pub private_file: Option<PathBuf>,
    pub mock_file: Option<PathBuf>,
    pub private_folder: Option<PathBuf>,
    pub mock_folder: Option<PathBuf>,
    #[serde(default)]
    pub permissions: PermissionsUpdate,
    #[serde(default)]
    pub options: ObjectOptions,
    pub base_path: Option<PathBuf>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

/// Where one side's content comes from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SideSource {
    Contents(String),
    File(PathBuf),
    Missing,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ObjectSource {
    Files {
        private: SideSource,
        mock: SideSource,
        filename: Option<String>,
    },
    Folders {
        private: PathBuf,
        mock: Option<PathBuf>,
    },
}

impl CreateObjectRequest {
    pub fn source(&self) -> ServiceResult<ObjectSource> {
        let has_files = self.private_contents.is_some()
            || self.mock_contents.is_some()
            || self.private_file.is_some()
            || self.mock_file.is_some();

        if self.private_folder.is_some() || self.mock_folder.is_some() {
            if has_files {
                return Err(ServiceError::Invalid(
                    "cannot mix folder and file parameters".into(),
                ));
            }
            let private = self.private_folder.clone().ok_or_else(|| {
                ServiceError::Invalid("mock_folder given without private_folder".into())
            })?;
            return Ok(ObjectSource::Folders {
                private,
                mock: self.mock_folder.clone(),
            });
        }

        let filename = self.filename.clone().filter(|f| !f.trim().is_empty());
        if let Some(name) = filename.as_deref() {
            if !is_path_segment(name) {
                return Err(ServiceError::Invalid(format!(
                    "filename `{name}` must be a plain file name"
                )));
            }
        }
        Ok(ObjectSource::Files {
            private: side(&self.private_contents, &self.private_file, "private")?,
            mock: side(&self.mock_contents, &self.mock_file, "mock")?,
            filename,
        })
    }
}

fn side(
    contents: &Option<String>,
    file: &Option<PathBuf>,
    which: &str,
) -> ServiceResult<SideSource> {
    match (contents, file) {
        (Some(_), Some(_)) => Err(ServiceError::Invalid(format!(
            "give either {which}_contents or {which}_file, not both"
        ))),
        (Some(text), None) => Ok(SideSource::Contents(text.clone())),
        (None, Some(path)) => Ok(SideSource::File(path.clone())),
        (None, None) => Ok(SideSource::Missing),
    }
}

/// Files written or moved so far; removed again if creation fails.
#[derive(Default)]
struct Placed {
    created: Vec<PathBuf>,
}

impl Placed {
    fn rollback(self) {
        for path in self.created.into_iter().rev() {
            let removed = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            if let Err(err) = removed {
                debug!("rollback could not remove {}: {}", path.display(), err);
            }
        }
    }
}

impl ObjectService {
    /// Create an object owned by `requester`.
    pub async fn create_object(
        &self,
        requester: &str,
        request: CreateObjectRequest,
    ) -> ServiceResult<ObjectManifest> {
        let requester = requester.to_string();
        self.blocking(move |svc| {
            let mut placed = Placed::default();
            match svc.create_blocking(&requester, request, &mut placed) {
                Ok(manifest) => Ok(manifest),
                Err(err) => {
                    placed.rollback();
                    Err(err)
                }
            }
        })
        .await
    }

    fn create_blocking(
        &self,
        requester: &str,
        request: CreateObjectRequest,
        placed: &mut Placed,
    ) -> ServiceResult<ObjectManifest> {
        let source = request.source()?;
        let owner = request
            .email
            .as_deref()
            .map(str::trim)
            .filter(|email| !email.is_empty())
            .unwrap_or(requester)
            .to_string();
        if !is_path_segment(&owner) {
            return Err(ServiceError::Invalid(format!(
                "`{owner}` cannot name a datasite"
            )));
        }
        let uid = Uuid::new_v4();
        if owner != requester {
            return Err(ServiceError::PermissionDenied {
                requester: requester.to_string(),
                action: "create",
                uid,
            });
        }

        let mut permissions = Permissions::owned_by(&owner);
        permissions.apply(request.permissions.clone());

        let mut options = request.options;
        let mut metadata = request.metadata.clone();
        options.lift_from_metadata(&mut metadata);

        let name = request
            .name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| generated_name(&source));

        let mut manifest = match &source {
            ObjectSource::Files {
                private,
                mock,
                filename,
            } => self.place_files(
                &owner,
                uid,
                &name,
                private,
                mock,
                filename.as_deref(),
                permissions,
                options,
                placed,
            )?,
            ObjectSource::Folders { private, mock } => self.place_folders(
                &owner,
                uid,
                &name,
                private,
                mock.as_deref(),
                permissions,
                options,
                placed,
            )?,
        };

        manifest.description = Some(
            request
                .description
                .clone()
                .filter(|d| !d.trim().is_empty())
                .unwrap_or_else(|| default_description(&name, &source)),
        );
        manifest.options = options;
        manifest.metadata = metadata;
        match request.base_path.clone() {
            Some(base) => manifest.set_base_path(Some(base)),
            None if options.use_relative_paths => {
                manifest.set_base_path(Some(self.datasites_root().join(&owner)))
            }
            None => {}
        }

        let manifest_name = manifest_file_name(&name, &uid);
        manifest.syftobject_url = SyftUrl::for_object(&owner, Visibility::Public, &manifest_name);
        let manifest_path = self
            .resolver
            .conventional_path(&manifest, ArtifactKind::Manifest);
        self.resolver
            .save(&mut manifest, &manifest_path, options.use_relative_paths)?;

        info!(
            uid = %uid,
            owner = %owner,
            name = %manifest.name,
            "created object at {}",
            manifest_path.display()
        );
        Ok(manifest)
    }

    #[allow(clippy::too_many_arguments)]
    fn place_files(
        &self,
        owner: &str,
        uid: Uuid,
        name: &str,
        private: &SideSource,
        mock: &SideSource,
        filename: Option<&str>,
        permissions: Permissions,
        options: ObjectOptions,
        placed: &mut Placed,
    ) -> ServiceResult<ObjectManifest> {
        let uid8 = uid_prefix(&uid);
        let (private, mock) = match (private, mock) {
            (SideSource::Missing, SideSource::Missing) => {
                let text = format!(
                    "Auto-generated content for {} (created at {})",
                    name,
                    chrono::Utc::now().to_rfc3339()
                );
                (
                    SideSource::Contents(text.clone()),
                    SideSource::Contents(mock_text(&text)),
                )
            }
            (private, SideSource::Missing) => {
                let mock = match private {
                    SideSource::Contents(text) => mock_text(text),
                    _ => format!("[MOCK DATA] Demo version of {name}"),
                };
                (private.clone(), SideSource::Contents(mock))
            }
            (SideSource::Missing, mock) => (
                SideSource::Contents(format!("Private content for {name}")),
                mock.clone(),
            ),
            (private, mock) => (private.clone(), mock.clone()),
        };

        let private_name = match (&private, filename) {
            (SideSource::File(path), _) => file_name_of(path)?,
            (_, Some(given)) => given.to_string(),
            _ => format!("{}_{}.txt", slug(name), uid8),
        };
        let mock_name = match &mock {
            SideSource::File(path) => file_name_of(path)?,
            _ => mock_file_name(&private_name),
        };

        let private_url = SyftUrl::for_object(owner, Visibility::Private, &private_name);
        let mut manifest = ObjectManifest::new(
            uid,
            name,
            ObjectType::File,
            private_url.clone(),
            private_url.clone(),
            private_url,
            permissions,
        );
        let mock_visibility = manifest.visibility_of_mock();
        let private_dir = self.objects_dir(owner, Visibility::Private);
        let mock_dir = self.objects_dir(owner, mock_visibility);

        let private_name = unique_name(&private_dir, &private_name, &uid8);
        let mut mock_name = unique_name(&mock_dir, &mock_name, &uid8);
        if mock_dir == private_dir && mock_name == private_name {
            mock_name = mock_file_name(&private_name);
        }
        manifest.private_url = SyftUrl::for_object(owner, Visibility::Private, &private_name);
        manifest.mock_url = SyftUrl::for_object(owner, mock_visibility, &mock_name);

        let private_path = place_side(&private, &private_dir.join(&private_name), options, placed)?;
        let mock_path = place_side(&mock, &mock_dir.join(&mock_name), options, placed)?;
        manifest.set_fallback(ArtifactKind::Private, Some(private_path));
        manifest.set_fallback(ArtifactKind::Mock, Some(mock_path));
        Ok(manifest)
    }

    #[allow(clippy::too_many_arguments)]
    fn place_folders(
        &self,
        owner: &str,
        uid: Uuid,
        name: &str,
        private: &Path,
        mock: Option<&Path>,
        permissions: Permissions,
        options: ObjectOptions,
        placed: &mut Placed,
    ) -> ServiceResult<ObjectManifest> {
        for folder in std::iter::once(private).chain(mock) {
            if !folder.is_dir() {
                return Err(ServiceError::Invalid(format!(
                    "folder `{}` does not exist",
                    folder.display()
                )));
            }
        }
        let uid8 = uid_prefix(&uid);
        let private_url = SyftUrl::for_object(owner, Visibility::Private, "pending");
        let mut manifest = ObjectManifest::new(
            uid,
            name,
            ObjectType::Folder,
            private_url.clone(),
            private_url.clone(),
            private_url,
            permissions,
        );
        let mock_visibility = manifest.visibility_of_mock();
        let private_dir = self.objects_dir(owner, Visibility::Private);
        let mock_dir = self.objects_dir(owner, mock_visibility);

        let private_name = unique_name(&private_dir, &file_name_of(private)?, &uid8);
        let mock_base = match mock {
            Some(folder) => file_name_of(folder)?,
            None => format!("{private_name}_mock"),
        };
        let mut mock_name = unique_name(&mock_dir, &mock_base, &uid8);
        if mock_dir == private_dir && mock_name == private_name {
            mock_name = format!("{private_name}_mock");
        }
        manifest.private_url =
            SyftUrl::for_object(owner, Visibility::Private, &private_name).as_dir();
        manifest.mock_url = SyftUrl::for_object(owner, mock_visibility, &mock_name).as_dir();

        let private_path =
            place_folder(private, &private_dir.join(&private_name), options, placed)?;
        let mock_target = mock_dir.join(&mock_name);
        let mock_path = match mock {
            Some(folder) => place_folder(folder, &mock_target, options, placed)?,
            None => {
                fs::create_dir_all(&mock_target)?;
                placed.created.push(mock_target.clone());
                mock_target
            }
        };
        manifest.set_fallback(ArtifactKind::Private, Some(private_path));
        manifest.set_fallback(ArtifactKind::Mock, Some(mock_path));
        Ok(manifest)
    }

    fn objects_dir(&self, owner: &str, visibility: Visibility) -> PathBuf {
        self.datasites_root()
            .join(owner)
            .join(visibility.as_str())
            .join("objects")
    }
}

/// Put one side's content at `target`, or leave a referenced file in place.
/// Returns the path the content now lives at.
fn place_side(
    source: &SideSource,
    target: &Path,
    options: ObjectOptions,
    placed: &mut Placed,
) -> ServiceResult<PathBuf> {
    match source {
        SideSource::Contents(text) => {
            ensure_parent(target)?;
            fs::write(target, text)?;
            placed.created.push(target.to_path_buf());
            Ok(target.to_path_buf())
        }
        SideSource::File(path) => {
            if !path.is_file() {
                return Err(ServiceError::Invalid(format!(
                    "file `{}` does not exist",
                    path.display()
                )));
            }
            match options.placement {
                Placement::Reference => Ok(std::path::absolute(path)?),
                Placement::Copy => {
                    ensure_parent(target)?;
                    fs::copy(path, target)?;
                    placed.created.push(target.to_path_buf());
                    Ok(target.to_path_buf())
                }
                Placement::Move => {
                    ensure_parent(target)?;
                    move_path(path, target)?;
                    Ok(target.to_path_buf())
                }
            }
        }
        SideSource::Missing => Err(ServiceError::Invalid("side has no content".into())),
    }
}

fn place_folder(
    source: &Path,
    target: &Path,
    options: ObjectOptions,
    placed: &mut Placed,
) -> ServiceResult<PathBuf> {
    match options.placement {
        Placement::Reference => Ok(std::path::absolute(source)?),
        Placement::Copy => {
            copy_tree(source, target)?;
            placed.created.push(target.to_path_buf());
            Ok(target.to_path_buf())
        }
        Placement::Move => {
            ensure_parent(target)?;
            move_path(source, target)?;
            Ok(target.to_path_buf())
        }
    }
}

fn ensure_parent(target: &Path) -> io::Result<()> {
    match target.parent() {
        Some(parent) => fs::create_dir_all(parent),
        None => Ok(()),
    }
}

/// Rename, falling back to copy + delete across filesystems.
fn move_path(source: &Path, target: &Path) -> io::Result<()> {
    if fs::rename(source, target).is_ok() {
        return Ok(());
    }
    if source.is_dir() {
        copy_tree(source, target)?;
        fs::remove_dir_all(source)
    } else {
        fs::copy(source, target)?;
        fs::remove_file(source)
    }
}

fn copy_tree(source: &Path, target: &Path) -> io::Result<()> {
    for entry in WalkDir::new(source).follow_links(false) {
        let entry = entry.map_err(io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(io::Error::other)?;
        let destination = target.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&destination)?;
        } else if entry.file_type().is_file() {
            ensure_parent(&destination)?;
            fs::copy(entry.path(), &destination)?;
        }
    }
    Ok(())
}

fn file_name_of(path: &Path) -> ServiceResult<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .filter(|name| is_path_segment(name))
        .map(str::to_string)
        .ok_or_else(|| ServiceError::Invalid(format!("`{}` has no file name", path.display())))
}

/// `<stem>_mock<ext>`
pub fn mock_file_name(private_name: &str) -> String {
    match private_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}_mock.{ext}"),
        _ => format!("{private_name}_mock"),
    }
}

/// Keep `name` unless something already sits at `dir/name`; then insert the
/// uid prefix before the extension.
fn unique_name(dir: &Path, name: &str, uid8: &str) -> String {
    if !dir.join(name).exists() {
        return name.to_string();
    }
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}_{uid8}.{ext}"),
        _ => format!("{name}_{uid8}"),
    }
}

/// `[MOCK DATA] ` followed by the first characters of the private content.
pub fn mock_text(private: &str) -> String {
    let sample: String = private.chars().take(MOCK_SAMPLE_CHARS).collect();
    format!("[MOCK DATA] {sample}...")
}

fn short_hash(input: &str) -> String {
    format!("{:x}", md5::compute(input.as_bytes()))[..8].to_string()
}

/// Name for a request that did not give one.
pub fn generated_name(source: &ObjectSource) -> String {
    match source {
        ObjectSource::Files {
            private: SideSource::Contents(text),
            ..
        }
        | ObjectSource::Files {
            private: SideSource::Missing,
            mock: SideSource::Contents(text),
            ..
        } => {
            let sample: String = text.chars().take(NAME_SAMPLE_CHARS).collect();
            format!("Content {}", short_hash(&sample))
        }
        ObjectSource::Files {
            private: SideSource::File(path),
            ..
        }
        | ObjectSource::Folders { private: path, .. } => path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .filter(|stem| !stem.is_empty())
            .map(|stem| stem.replace(['_', '-'], " "))
            .unwrap_or_else(auto_name),
        _ => auto_name(),
    }
}

fn auto_name() -> String {
    let seed = format!("{}{}", chrono::Utc::now().to_rfc3339(), Uuid::new_v4());
    format!("Auto Object {}", short_hash(&seed))
}

fn default_description(name: &str, source: &ObjectSource) -> String {
    match source {
        ObjectSource::Folders { .. } => format!("Folder object '{name}'"),
        ObjectSource::Files {
            private: SideSource::Missing,
            mock: SideSource::Missing,
            ..
        } => format!("Auto-generated object: {name}"),
        ObjectSource::Files {
            mock: SideSource::Missing,
            ..
        } => format!("Object '{name}' with auto-generated mock data"),
        _ => format!("Object '{name}' with explicit mock and private content"),
    }
}
