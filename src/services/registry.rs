//! Discovery of every object manifest under a datasites root.
//!
//! Nothing is cached: `refresh` rescans the tree and hands back an immutable
//! snapshot that callers filter and page through.

use chrono::{DateTime, Utc};
use serde_yaml::Value;
use std::{
    collections::{BTreeSet, HashSet},
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::models::{
    locator::SyftUrl,
    manifest::{ObjectManifest, is_manifest_file},
};

/// Datasite subtrees that hold object manifests.
const OBJECT_DIRS: [&str; 2] = ["public/objects", "private/objects"];

/// Metadata keys that are bookkeeping rather than user content.
const SYSTEM_METADATA_KEYS: [&str; 1] = ["_file_operations"];

#[derive(Clone, Debug)]
pub struct ObjectRegistry {
    datasites_root: PathBuf,
}

impl ObjectRegistry {
    pub fn new(datasites_root: impl Into<PathBuf>) -> Self {
        Self {
            datasites_root: datasites_root.into(),
        }
    }

    pub fn datasites_root(&self) -> &Path {
        &self.datasites_root
    }

    /// Scan `<root>/<email>/{public,private}/objects/**` for manifests.
    ///
    /// Unreadable or malformed manifests are logged and skipped; a second
    /// manifest carrying an already-seen uid is ignored.
    pub fn refresh(&self) -> ObjectSnapshot {
        let mut objects = Vec::new();
        let mut seen = HashSet::new();

        for datasite in self.datasites() {
            let Some(site_owner) = datasite.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            for sub in OBJECT_DIRS {
                let dir = datasite.join(sub);
                if !dir.is_dir() {
                    continue;
                }
                for entry in WalkDir::new(&dir)
                    .follow_links(false)
                    .into_iter()
                    .filter_map(Result::ok)
                    .filter(|entry| entry.file_type().is_file() && is_manifest_file(entry.path()))
                {
                    match ObjectManifest::load(entry.path()) {
                        Ok(manifest) if !owned_by(&manifest, site_owner) => warn!(
                            uid = %manifest.uid,
                            "manifest at {} names files outside {}, ignoring",
                            entry.path().display(),
                            site_owner
                        ),
                        Ok(manifest) if seen.insert(manifest.uid) => objects.push(manifest),
                        Ok(manifest) => warn!(
                            uid = %manifest.uid,
                            "duplicate object uid at {}, ignoring",
                            entry.path().display()
                        ),
                        Err(err) => warn!("skipping manifest: {}", err),
                    }
                }
            }
        }

        debug!(
            "loaded {} objects from {}",
            objects.len(),
            self.datasites_root.display()
        );
        ObjectSnapshot::new(objects, None)
    }

    fn datasites(&self) -> Vec<PathBuf> {
        match std::fs::read_dir(&self.datasites_root) {
            Ok(entries) => entries
                .filter_map(Result::ok)
                .map(|entry| entry.path())
                .filter(|path| path.is_dir())
                .collect(),
            Err(err) => {
                warn!(
                    "cannot list datasites under {}: {}",
                    self.datasites_root.display(),
                    err
                );
                Vec::new()
            }
        }
    }
}

/// A datasite only vouches for objects whose artifacts live in it.
fn owned_by(manifest: &ObjectManifest, site_owner: &str) -> bool {
    manifest.private_url.owner() == site_owner && manifest.mock_url.owner() == site_owner
}

/// An immutable view over a set of manifests.
#[derive(Clone, Debug)]
pub struct ObjectSnapshot {
    objects: Arc<[ObjectManifest]>,
    search_info: Option<String>,
    loaded_at: DateTime<Utc>,
}

impl ObjectSnapshot {
    pub fn new(objects: Vec<ObjectManifest>, search_info: Option<String>) -> Self {
        Self {
            objects: objects.into(),
            search_info,
            loaded_at: Utc::now(),
        }
    }

    fn derive<F>(&self, info: String, keep: F) -> Self
    where
        F: Fn(&ObjectManifest) -> bool,
    {
        let search_info = match &self.search_info {
            Some(previous) => format!("{previous}; {info}"),
            None => info,
        };
        Self {
            objects: self.objects.iter().filter(|m| keep(m)).cloned().collect(),
            search_info: Some(search_info),
            loaded_at: self.loaded_at,
        }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ObjectManifest> {
        self.objects.iter()
    }

    pub fn to_vec(&self) -> Vec<ObjectManifest> {
        self.objects.to_vec()
    }

    pub fn search_info(&self) -> Option<&str> {
        self.search_info.as_deref()
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    pub fn find(&self, uid: &uuid::Uuid) -> Option<&ObjectManifest> {
        self.objects.iter().find(|m| &m.uid == uid)
    }

    /// Object whose private or mock locator equals `url`.
    pub fn find_by_locator(&self, url: &SyftUrl) -> Option<&ObjectManifest> {
        self.objects
            .iter()
            .find(|m| &m.private_url == url || &m.mock_url == url)
    }

    /// Objects `requester` may know about.
    pub fn visible_to(&self, requester: &str) -> Self {
        Self {
            objects: self
                .objects
                .iter()
                .filter(|m| m.is_discoverable_by(requester))
                .cloned()
                .collect(),
            search_info: self.search_info.clone(),
            loaded_at: self.loaded_at,
        }
    }

    /// Case-insensitive match on name, owner, description, timestamps
    /// (`YYYY-MM-DD HH:MM`) and user metadata values.
    pub fn search(&self, keyword: &str) -> Self {
        let needle = keyword.to_lowercase();
        self.derive(format!("Search results for '{keyword}'"), |m| {
            matches_keyword(m, &needle)
        })
    }

    pub fn filter_by_email(&self, pattern: &str) -> Self {
        let needle = pattern.to_lowercase();
        self.derive(format!("Filtered by email containing '{pattern}'"), |m| {
            m.owner().to_lowercase().contains(&needle)
        })
    }

    pub fn unique_emails(&self) -> Vec<String> {
        self.objects
            .iter()
            .map(|m| m.owner().to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn unique_names(&self) -> Vec<String> {
        self.objects
            .iter()
            .filter(|m| !m.name.is_empty())
            .map(|m| m.name.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

fn matches_keyword(manifest: &ObjectManifest, needle: &str) -> bool {
    let created = manifest.created_at.format("%Y-%m-%d %H:%M").to_string();
    let updated = manifest.updated_at.format("%Y-%m-%d %H:%M").to_string();
    let texts = [
        manifest.name.to_lowercase(),
        manifest.owner().to_lowercase(),
        manifest.description.as_deref().unwrap_or_default().to_lowercase(),
        created,
        updated,
    ];
    if texts.iter().any(|text| text.contains(needle)) {
        return true;
    }
    manifest
        .metadata
        .iter()
        .filter(|(key, _)| !SYSTEM_METADATA_KEYS.contains(&key.as_str()))
        .any(|(_, value)| value_text(value).to_lowercase().contains(needle))
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        locator::Visibility,
        manifest::{ObjectType, manifest_file_name},
        permissions::{AccessList, Permissions},
    };
    use std::fs;
    use tempfile::tempdir;
    use uuid::Uuid;

    fn put(root: &Path, owner: &str, name: &str, visibility: Visibility) -> ObjectManifest {
        let uid = Uuid::new_v4();
        let file = manifest_file_name(name, &uid);
        let mut manifest = ObjectManifest::new(
            uid,
            name,
            ObjectType::File,
            SyftUrl::for_object(owner, Visibility::Private, &format!("{name}.txt")),
            SyftUrl::for_object(owner, Visibility::Public, &format!("{name}_mock.txt")),
            SyftUrl::for_object(owner, visibility, &file),
            Permissions::owned_by(owner),
        );
        manifest
            .write_yaml(root.join(owner).join(visibility.as_str()).join("objects").join(file))
            .unwrap();
        manifest
    }

    #[test]
    fn refresh_scans_public_and_private_object_dirs() {
        let dir = tempdir().unwrap();
        put(dir.path(), "a@x.com", "alpha", Visibility::Public);
        put(dir.path(), "b@x.com", "beta", Visibility::Private);
        fs::create_dir_all(dir.path().join("c@x.com/public/objects")).unwrap();
        fs::write(
            dir.path().join("c@x.com/public/objects/broken.syftobject.yaml"),
            "uid: [",
        )
        .unwrap();
        fs::write(dir.path().join("c@x.com/public/objects/notes.txt"), "x").unwrap();

        let snapshot = ObjectRegistry::new(dir.path()).refresh();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.unique_emails(), vec!["a@x.com", "b@x.com"]);
        assert_eq!(snapshot.unique_names(), vec!["alpha", "beta"]);
    }

    #[test]
    fn manifests_naming_another_datasite_are_ignored() {
        let dir = tempdir().unwrap();
        let real = put(dir.path(), "a@x.com", "alpha", Visibility::Public);
        let mut forged = ObjectManifest::new(
            Uuid::new_v4(),
            "alpha copy",
            ObjectType::File,
            real.private_url.clone(),
            real.mock_url.clone(),
            SyftUrl::for_object("b@x.com", Visibility::Public, "forged.syftobject.yaml"),
            Permissions::owned_by("b@x.com"),
        );
        forged
            .write_yaml(dir.path().join("b@x.com/public/objects/forged.syftobject.yaml"))
            .unwrap();
        // Same uid as the real object, planted in another datasite.
        let mut shadow = real.clone();
        shadow
            .write_yaml(dir.path().join("b@x.com/private/objects/shadow.syftobject.yaml"))
            .unwrap();

        let snapshot = ObjectRegistry::new(dir.path()).refresh();
        assert_eq!(snapshot.len(), 1);
        let found = snapshot.find(&real.uid).unwrap();
        assert_eq!(found.source_path(), real.source_path());
        assert!(snapshot.find(&forged.uid).is_none());
    }

    #[test]
    fn refresh_sees_changes_without_restart() {
        let dir = tempdir().unwrap();
        let registry = ObjectRegistry::new(dir.path());
        assert!(registry.refresh().is_empty());

        let added = put(dir.path(), "a@x.com", "alpha", Visibility::Public);
        let snapshot = registry.refresh();
        assert!(snapshot.find(&added.uid).is_some());

        fs::remove_file(added.source_path().unwrap()).unwrap();
        assert!(registry.refresh().find(&added.uid).is_none());
        // Earlier snapshots are unaffected.
        assert!(snapshot.find(&added.uid).is_some());
    }

    #[test]
    fn missing_root_yields_empty_snapshot() {
        let dir = tempdir().unwrap();
        let snapshot = ObjectRegistry::new(dir.path().join("nope")).refresh();
        assert!(snapshot.is_empty());
    }

    #[test]
    fn search_covers_name_owner_description_and_metadata() {
        let dir = tempdir().unwrap();
        let mut alpha = put(dir.path(), "a@x.com", "alpha", Visibility::Public);
        alpha.description = Some("Hospital records".into());
        alpha
            .metadata
            .insert("project".into(), Value::String("Genome".into()));
        let path = alpha.source_path().unwrap().to_path_buf();
        alpha.write_yaml(&path).unwrap();
        put(dir.path(), "b@x.com", "beta", Visibility::Public);

        let snapshot = ObjectRegistry::new(dir.path()).refresh();
        assert_eq!(snapshot.search("ALPHA").len(), 1);
        assert_eq!(snapshot.search("hospital").len(), 1);
        assert_eq!(snapshot.search("genome").len(), 1);
        assert_eq!(snapshot.search("b@x").len(), 1);
        assert_eq!(snapshot.search("zzz").len(), 0);

        let filtered = snapshot.filter_by_email("A@X");
        assert_eq!(filtered.len(), 1);
        assert_eq!(
            filtered.search_info(),
            Some("Filtered by email containing 'A@X'")
        );
    }

    #[test]
    fn visible_to_applies_discovery_gate() {
        let dir = tempdir().unwrap();
        let mut hidden = put(dir.path(), "a@x.com", "hidden", Visibility::Public);
        hidden.permissions.discovery_read = AccessList::only("b@x.com");
        let path = hidden.source_path().unwrap().to_path_buf();
        hidden.write_yaml(&path).unwrap();
        put(dir.path(), "a@x.com", "open", Visibility::Public);

        let snapshot = ObjectRegistry::new(dir.path()).refresh();
        assert_eq!(snapshot.visible_to("b@x.com").len(), 2);
        assert_eq!(snapshot.visible_to("c@x.com").len(), 1);
        assert_eq!(snapshot.visible_to("a@x.com").len(), 2);
    }

    #[test]
    fn find_by_locator_matches_either_side() {
        let dir = tempdir().unwrap();
        let alpha = put(dir.path(), "a@x.com", "alpha", Visibility::Public);
        let snapshot = ObjectRegistry::new(dir.path()).refresh();

        assert_eq!(snapshot.find_by_locator(&alpha.mock_url).map(|m| m.uid), Some(alpha.uid));
        assert_eq!(snapshot.find_by_locator(&alpha.private_url).map(|m| m.uid), Some(alpha.uid));
        let other: SyftUrl = "syft://a@x.com/public/objects/other.txt".parse().unwrap();
        assert!(snapshot.find_by_locator(&other).is_none());
    }
}
