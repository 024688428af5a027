//! `syft://` locators — structured identifiers for files inside a datasite.
//!
//! A locator never implies that the file exists; it only names where the
//! file conventionally lives: `syft://<owner>/<public|private>/objects/<path>`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
};

use super::manifest::ManifestError;

pub const SCHEME: &str = "syft://";

/// Top-level subtree of a datasite.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Private,
}

impl Visibility {
    pub fn as_str(self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
        }
    }
}

/// A single file or directory name: non-empty, no separators, not `.` or `..`.
pub fn is_path_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && !segment.contains(['/', '\\', '\0'])
}

/// A parsed `syft://<owner>/<path>` locator.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SyftUrl {
    owner: String,
    path: String,
}

impl SyftUrl {
    /// Build the conventional locator for an object artifact:
    /// `syft://<owner>/<visibility>/objects/<name>`.
    pub fn for_object(owner: &str, visibility: Visibility, name: &str) -> Self {
        Self {
            owner: owner.to_string(),
            path: format!("{}/objects/{}", visibility.as_str(), name),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn visibility(&self) -> Option<Visibility> {
        match self.path.split('/').next() {
            Some("public") => Some(Visibility::Public),
            Some("private") => Some(Visibility::Private),
            _ => None,
        }
    }

    /// Last non-empty path segment (folder locators carry a trailing `/`).
    pub fn file_name(&self) -> &str {
        self.path
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
    }

    pub fn is_dir(&self) -> bool {
        self.path.ends_with('/')
    }

    /// Same locator with a trailing `/`, as folder objects require.
    pub fn as_dir(&self) -> Self {
        if self.is_dir() {
            return self.clone();
        }
        Self {
            owner: self.owner.clone(),
            path: format!("{}/", self.path),
        }
    }

    /// Map onto the conventional datasite layout: `<root>/<owner>/<path>`.
    pub fn to_local_path(&self, datasites_root: &Path) -> PathBuf {
        let mut local = datasites_root.join(&self.owner);
        for segment in self.path.split('/').filter(|s| !s.is_empty()) {
            local.push(segment);
        }
        local
    }
}

impl FromStr for SyftUrl {
    type Err = ManifestError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ManifestError::InvalidLocator {
            locator: raw.to_string(),
            reason: reason.to_string(),
        };

        let rest = raw
            .strip_prefix(SCHEME)
            .ok_or_else(|| invalid("missing syft:// scheme"))?;
        let (owner, path) = rest
            .split_once('/')
            .ok_or_else(|| invalid("missing path after owner"))?;
        if owner.is_empty() {
            return Err(invalid("empty owner"));
        }
        if !is_path_segment(owner) {
            return Err(invalid("owner must be a single path segment"));
        }
        if path.trim_matches('/').is_empty() {
            return Err(invalid("empty path"));
        }
        if path.split('/').any(|segment| segment == ".." || segment.contains('\\')) {
            return Err(invalid("path must not contain `..`"));
        }

        Ok(Self {
            owner: owner.to_string(),
            path: path.trim_start_matches('/').to_string(),
        })
    }
}

impl fmt::Display for SyftUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}/{}", SCHEME, self.owner, self.path)
    }
}

impl Serialize for SyftUrl {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SyftUrl {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_owner_and_path() {
        let url: SyftUrl = "syft://alice@x.com/private/objects/data.csv".parse().unwrap();
        assert_eq!(url.owner(), "alice@x.com");
        assert_eq!(url.path(), "private/objects/data.csv");
        assert_eq!(url.visibility(), Some(Visibility::Private));
        assert_eq!(url.file_name(), "data.csv");
        assert_eq!(url.to_string(), "syft://alice@x.com/private/objects/data.csv");
    }

    #[test]
    fn folder_locators_keep_trailing_slash() {
        let url: SyftUrl = "syft://a@x.com/public/objects/job_1234/".parse().unwrap();
        assert!(url.is_dir());
        assert_eq!(url.file_name(), "job_1234");
        assert_eq!(
            url.to_local_path(Path::new("/ds")),
            PathBuf::from("/ds/a@x.com/public/objects/job_1234")
        );
    }

    #[test]
    fn rejects_malformed_locators() {
        for raw in [
            "http://a@x.com/public/objects/f",
            "syft://a@x.com",
            "syft:///public/objects/f",
            "syft://a@x.com/",
            "syft://a@x.com/public/../../etc/passwd",
            "syft://../public/objects/f",
            "syft://a@x.com/public/objects/..\\..\\f",
        ] {
            assert!(raw.parse::<SyftUrl>().is_err(), "{raw} should be rejected");
        }
    }

    #[test]
    fn path_segments() {
        assert!(is_path_segment("data.csv"));
        assert!(is_path_segment("alice@example.com"));
        for bad in ["", ".", "..", "a/b", "..\\x", "../../escaped.txt"] {
            assert!(!is_path_segment(bad), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn builds_conventional_object_locator() {
        let url = SyftUrl::for_object("a@x.com", Visibility::Public, "notes_mock.txt");
        assert_eq!(url.to_string(), "syft://a@x.com/public/objects/notes_mock.txt");
        assert_eq!(url.as_dir().to_string(), "syft://a@x.com/public/objects/notes_mock.txt/");
    }
}
