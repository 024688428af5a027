//! The object manifest: one `*.syftobject.yaml` document per object.
//!
//! A manifest names three artifacts (private data, mock data and the manifest
//! itself) by locator, and optionally by a path relative to `base_path` and a
//! last-known absolute path. Which of those currently points at a real file is
//! decided by the resolver, not here.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::{Mapping, Value};
use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use uuid::Uuid;

use super::{
    locator::{SyftUrl, Visibility},
    options::ObjectOptions,
    permissions::{Access, EffectiveAccess, Permissions},
};

pub const MANIFEST_SUFFIX: &str = ".syftobject.yaml";

/// Fields a document must carry to be a manifest at all.
const REQUIRED_FIELDS: [&str; 3] = ["uid", "private_url", "mock_url"];

/// Older documents used these keys; they are renamed before parsing.
const LEGACY_KEYS: [(&str, &str); 3] = [
    ("private", "private_url"),
    ("mock", "mock_url"),
    ("syftobject", "syftobject_url"),
];

/// Flat permission keys written by older manifests, mapped into `permissions`.
const LEGACY_PERMISSION_KEYS: [(&str, &str); 5] = [
    ("syftobject_permissions", "discovery_read"),
    ("mock_permissions", "mock_read"),
    ("mock_write_permissions", "mock_write"),
    ("private_permissions", "private_read"),
    ("private_write_permissions", "private_write"),
];

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("could not access manifest {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed manifest {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("manifest {path} is missing required field `{field}`")]
    MissingField { path: PathBuf, field: &'static str },
    #[error("manifest file name must end with .syftobject.yaml: {0}")]
    InvalidFileName(PathBuf),
    #[error("invalid locator `{locator}`: {reason}")]
    InvalidLocator { locator: String, reason: String },
    #[error("file object locator `{0}` must not end with `/`")]
    FileLocatorIsDirectory(String),
}

pub type ManifestResult<T> = Result<T, ManifestError>;

/// One of the three artifacts a manifest points at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Private,
    Mock,
    Manifest,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 3] =
        [ArtifactKind::Private, ArtifactKind::Mock, ArtifactKind::Manifest];

    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactKind::Private => "private",
            ArtifactKind::Mock => "mock",
            ArtifactKind::Manifest => "syftobject",
        }
    }

    /// Parse a data side (`private` / `mock`) as used in request paths.
    pub fn from_side(side: &str) -> Option<Self> {
        match side {
            "private" => Some(ArtifactKind::Private),
            "mock" => Some(ArtifactKind::Mock),
            _ => None,
        }
    }

    pub fn read_access(self) -> Access {
        match self {
            ArtifactKind::Private => Access::PrivateRead,
            ArtifactKind::Mock => Access::MockRead,
            ArtifactKind::Manifest => Access::Discover,
        }
    }

    pub fn write_access(self) -> Access {
        match self {
            ArtifactKind::Private => Access::PrivateWrite,
            ArtifactKind::Mock => Access::MockWrite,
            ArtifactKind::Manifest => Access::Discover,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectType {
    #[default]
    File,
    Folder,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ObjectManifest {
    pub uid: Uuid,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub object_type: ObjectType,
    #[serde(default = "Utc::now", deserialize_with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now", deserialize_with = "timestamp")]
    pub updated_at: DateTime<Utc>,

    pub private_url: SyftUrl,
    pub mock_url: SyftUrl,
    pub syftobject_url: SyftUrl,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_url_relative: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mock_url_relative: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub syftobject_relative: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_url_absolute_fallback: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mock_url_absolute_fallback: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub syftobject_absolute_fallback: Option<PathBuf>,

    pub permissions: Permissions,
    #[serde(default)]
    pub options: ObjectOptions,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,

    /// Where this manifest was loaded from or last saved to.
    #[serde(skip)]
    source_path: Option<PathBuf>,
    /// `base_path` was filled in from `source_path` rather than read from disk.
    #[serde(skip)]
    base_path_detected: bool,
}

impl ObjectManifest {
    pub fn new(
        uid: Uuid,
        name: impl Into<String>,
        object_type: ObjectType,
        private_url: SyftUrl,
        mock_url: SyftUrl,
        syftobject_url: SyftUrl,
        permissions: Permissions,
    ) -> Self {
        let now = Utc::now();
        let mut manifest = Self {
            uid,
            name: name.into(),
            description: None,
            object_type,
            created_at: now,
            updated_at: now,
            private_url,
            mock_url,
            syftobject_url,
            base_path: None,
            private_url_relative: None,
            mock_url_relative: None,
            syftobject_relative: None,
            private_url_absolute_fallback: None,
            mock_url_absolute_fallback: None,
            syftobject_absolute_fallback: None,
            permissions,
            options: ObjectOptions::default(),
            metadata: BTreeMap::new(),
            source_path: None,
            base_path_detected: false,
        };
        if object_type == ObjectType::Folder {
            manifest.private_url = manifest.private_url.as_dir();
            manifest.mock_url = manifest.mock_url.as_dir();
        }
        manifest
    }

    /// Parse the manifest at `path`.
    ///
    /// Fails on malformed YAML or a missing `uid` / `private_url` / `mock_url`.
    /// When the document has no `base_path`, the manifest's parent directory
    /// is used.
    pub fn load(path: impl AsRef<Path>) -> ManifestResult<Self> {
        let path = absolute(path.as_ref());
        if !is_manifest_file(&path) {
            return Err(ManifestError::InvalidFileName(path));
        }

        let raw = fs::read_to_string(&path).map_err(|source| ManifestError::Io {
            path: path.clone(),
            source,
        })?;
        let document: Value = serde_yaml::from_str(&raw).map_err(|source| ManifestError::Parse {
            path: path.clone(),
            source,
        })?;
        let document = normalize_document(document, &path)?;

        let mut manifest: ObjectManifest =
            serde_yaml::from_value(document).map_err(|source| ManifestError::Parse {
                path: path.clone(),
                source,
            })?;
        manifest.options.lift_from_metadata(&mut manifest.metadata);
        manifest.check_locators()?;

        if manifest.base_path.is_none() {
            manifest.base_path = path.parent().map(Path::to_path_buf);
            manifest.base_path_detected = true;
        }
        manifest.source_path = Some(path);
        Ok(manifest)
    }

    /// Serialize to YAML. An auto-detected `base_path` is left out so the
    /// document stays valid after its directory moves.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        if self.base_path_detected {
            let mut portable = self.clone();
            portable.base_path = None;
            serde_yaml::to_string(&portable)
        } else {
            serde_yaml::to_string(self)
        }
    }

    /// Write the YAML document to `path` (temp file + rename) and remember
    /// `path` as this manifest's location.
    pub fn write_yaml(&mut self, path: impl AsRef<Path>) -> ManifestResult<()> {
        let path = absolute(path.as_ref());
        if !is_manifest_file(&path) {
            return Err(ManifestError::InvalidFileName(path));
        }
        let io_err = |source| ManifestError::Io {
            path: path.clone(),
            source,
        };

        let yaml = self.to_yaml().map_err(|source| ManifestError::Parse {
            path: path.clone(),
            source,
        })?;
        let parent = path
            .parent()
            .ok_or_else(|| io_err(io::Error::other("manifest path has no parent")))?;
        fs::create_dir_all(parent).map_err(io_err)?;

        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        fs::write(&tmp_path, yaml).map_err(io_err)?;
        if let Err(err) = fs::rename(&tmp_path, &path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(io_err(err));
        }

        if self.base_path_detected && self.source_path.as_deref() != Some(path.as_path()) {
            self.base_path = path.parent().map(Path::to_path_buf);
        }
        self.source_path = Some(path);
        Ok(())
    }

    /// File objects must not carry directory locators; folder locators are
    /// normalised to end with `/`.
    fn check_locators(&mut self) -> ManifestResult<()> {
        match self.object_type {
            ObjectType::Folder => {
                self.private_url = self.private_url.as_dir();
                self.mock_url = self.mock_url.as_dir();
            }
            ObjectType::File => {
                for url in [&self.private_url, &self.mock_url] {
                    if url.is_dir() {
                        return Err(ManifestError::FileLocatorIsDirectory(url.to_string()));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }

    pub fn manifest_dir(&self) -> Option<&Path> {
        self.source_path.as_deref().and_then(Path::parent)
    }

    /// Directory that relative paths hang off. A relative `base_path` is
    /// taken relative to the manifest's own directory.
    pub fn effective_base(&self) -> Option<PathBuf> {
        let base = self.base_path.as_deref()?;
        if base.is_absolute() {
            return Some(base.to_path_buf());
        }
        match self.manifest_dir() {
            Some(dir) => Some(dir.join(base)),
            None => Some(absolute(base)),
        }
    }

    /// Override the anchor for relative paths explicitly.
    pub fn set_base_path(&mut self, base: Option<PathBuf>) {
        self.base_path = base;
        self.base_path_detected = false;
    }

    pub fn locator(&self, kind: ArtifactKind) -> &SyftUrl {
        match kind {
            ArtifactKind::Private => &self.private_url,
            ArtifactKind::Mock => &self.mock_url,
            ArtifactKind::Manifest => &self.syftobject_url,
        }
    }

    pub fn relative(&self, kind: ArtifactKind) -> Option<&str> {
        match kind {
            ArtifactKind::Private => self.private_url_relative.as_deref(),
            ArtifactKind::Mock => self.mock_url_relative.as_deref(),
            ArtifactKind::Manifest => self.syftobject_relative.as_deref(),
        }
    }

    pub fn set_relative(&mut self, kind: ArtifactKind, relative: Option<String>) {
        match kind {
            ArtifactKind::Private => self.private_url_relative = relative,
            ArtifactKind::Mock => self.mock_url_relative = relative,
            ArtifactKind::Manifest => self.syftobject_relative = relative,
        }
    }

    pub fn fallback(&self, kind: ArtifactKind) -> Option<&Path> {
        match kind {
            ArtifactKind::Private => self.private_url_absolute_fallback.as_deref(),
            ArtifactKind::Mock => self.mock_url_absolute_fallback.as_deref(),
            ArtifactKind::Manifest => self.syftobject_absolute_fallback.as_deref(),
        }
    }

    pub fn set_fallback(&mut self, kind: ArtifactKind, path: Option<PathBuf>) {
        match kind {
            ArtifactKind::Private => self.private_url_absolute_fallback = path,
            ArtifactKind::Mock => self.mock_url_absolute_fallback = path,
            ArtifactKind::Manifest => self.syftobject_absolute_fallback = path,
        }
    }

    /// Owner email, taken from the private locator.
    pub fn owner(&self) -> &str {
        self.private_url.owner()
    }

    pub fn is_folder(&self) -> bool {
        self.object_type == ObjectType::Folder
    }

    /// `folder`, or the private file's extension (empty when it has none).
    pub fn file_type(&self) -> String {
        if self.is_folder() {
            return "folder".to_string();
        }
        self.private_url
            .file_name()
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_string())
            .unwrap_or_default()
    }

    /// Bump `updated_at`; every mutation goes through here.
    pub fn touch(&mut self) {
        let now = Utc::now();
        self.updated_at = if now > self.updated_at {
            now
        } else {
            self.updated_at + chrono::Duration::microseconds(1)
        };
    }

    /// Permission check for one gate. The owner administers the object and
    /// passes every gate.
    pub fn permits(&self, access: Access, requester: &str) -> bool {
        requester == self.owner() || self.permissions.allows(access, requester)
    }

    pub fn is_discoverable_by(&self, requester: &str) -> bool {
        self.permits(Access::Discover, requester)
    }

    pub fn effective_access(&self, requester: &str) -> EffectiveAccess {
        EffectiveAccess {
            mock_read: self.permits(Access::MockRead, requester),
            mock_write: self.permits(Access::MockWrite, requester),
            private_read: self.permits(Access::PrivateRead, requester),
            private_write: self.permits(Access::PrivateWrite, requester),
        }
    }

    pub fn visibility_of_mock(&self) -> Visibility {
        if self.permissions.mock_read.includes_everyone() {
            Visibility::Public
        } else {
            Visibility::Private
        }
    }
}

pub fn is_manifest_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.ends_with(MANIFEST_SUFFIX) && name.len() > MANIFEST_SUFFIX.len())
}

/// Lower-case `name`, spaces and dashes to underscores.
pub fn slug(name: &str) -> String {
    let slug: String = name
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            ' ' | '-' => '_',
            '/' | '\\' => '_',
            other => other,
        })
        .collect();
    if slug.is_empty() { "object".to_string() } else { slug }
}

/// Short uid prefix used in generated file names.
pub fn uid_prefix(uid: &Uuid) -> String {
    uid.simple().to_string()[..8].to_string()
}

/// `<slug>_<uid-prefix>.syftobject.yaml`
pub fn manifest_file_name(name: &str, uid: &Uuid) -> String {
    format!("{}_{}{}", slug(name), uid_prefix(uid), MANIFEST_SUFFIX)
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Rename legacy keys, check required fields and derive `syftobject_url`
/// when the document does not carry one.
fn normalize_document(document: Value, path: &Path) -> ManifestResult<Value> {
    let missing = |field| ManifestError::MissingField {
        path: path.to_path_buf(),
        field,
    };
    let Value::Mapping(mut map) = document else {
        return Err(missing(REQUIRED_FIELDS[0]));
    };

    for (legacy, current) in LEGACY_KEYS {
        let legacy_key = Value::from(legacy);
        if !map.contains_key(current) && is_string(map.get(&legacy_key)) {
            if let Some(value) = map.remove(&legacy_key) {
                map.insert(Value::from(current), value);
            }
        }
    }

    let mut legacy_permissions = Mapping::new();
    for (legacy, current) in LEGACY_PERMISSION_KEYS {
        if let Some(value) = map.remove(legacy) {
            legacy_permissions.insert(Value::from(current), value);
        }
    }
    if !map.contains_key("permissions") {
        map.insert(Value::from("permissions"), Value::Mapping(legacy_permissions));
    }

    for field in REQUIRED_FIELDS {
        match map.get(field) {
            None | Some(Value::Null) => return Err(missing(field)),
            Some(_) => {}
        }
    }

    if matches!(map.get("syftobject_url"), None | Some(Value::Null)) {
        let derived = map
            .get("private_url")
            .and_then(Value::as_str)
            .and_then(|raw| raw.parse::<SyftUrl>().ok())
            .zip(path.file_name().and_then(|name| name.to_str()))
            .map(|(private, file_name)| {
                SyftUrl::for_object(private.owner(), Visibility::Public, file_name)
            });
        if let Some(url) = derived {
            map.insert(Value::from("syftobject_url"), Value::from(url.to_string()));
        }
    }

    Ok(Value::Mapping(map))
}

fn is_string(value: Option<&Value>) -> bool {
    matches!(value, Some(Value::String(_)))
}

/// Accept RFC 3339 as well as the offset-less timestamps older tools wrote;
/// the latter are taken as UTC.
fn timestamp<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(deserializer)?;
    if let Ok(parsed) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(&raw, format).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp `{raw}`")))
}
