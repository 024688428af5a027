//! Turns a manifest's stored locators into files that exist right now.
//!
//! Each artifact can be found four ways, tried in order until one names an
//! existing path:
//!
//! 1. `relative`  — `base_path` joined with the `*_relative` field
//! 2. `locator`   — the `syft://` locator mapped onto the datasites root
//! 3. `fallback`  — the stored `*_absolute_fallback`
//! 4. `heuristic` — the expected file name in conventional directories
//!    around the manifest
//!
//! A miss is not an error: callers get `None` and report "not found".

use std::{
    path::{Component, Path, PathBuf},
    sync::Arc,
};
use tracing::debug;

use crate::models::manifest::{ArtifactKind, ManifestResult, ObjectManifest};

/// Sub-directories searched by the heuristic strategy, relative to each anchor.
const HEURISTIC_DIRS: [&str; 4] = ["", "data", "public/objects", "private/objects"];

/// Inputs shared by every strategy for a single lookup.
pub struct ResolveContext<'a> {
    pub manifest: &'a ObjectManifest,
    pub kind: ArtifactKind,
    pub datasites_root: &'a Path,
}

/// A named lookup step returning an existing path, or `None`.
#[derive(Clone, Copy)]
pub struct Strategy {
    pub name: &'static str,
    pub locate: fn(&ResolveContext<'_>) -> Option<PathBuf>,
}

pub const DEFAULT_STRATEGIES: [Strategy; 4] = [
    Strategy {
        name: "relative",
        locate: relative_strategy,
    },
    Strategy {
        name: "locator",
        locate: locator_strategy,
    },
    Strategy {
        name: "fallback",
        locate: fallback_strategy,
    },
    Strategy {
        name: "heuristic",
        locate: heuristic_strategy,
    },
];

/// Resolved locations of all three artifacts.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResolvedPaths {
    pub private: Option<PathBuf>,
    pub mock: Option<PathBuf>,
    pub manifest: Option<PathBuf>,
}

impl ResolvedPaths {
    pub fn get(&self, kind: ArtifactKind) -> Option<&Path> {
        match kind {
            ArtifactKind::Private => self.private.as_deref(),
            ArtifactKind::Mock => self.mock.as_deref(),
            ArtifactKind::Manifest => self.manifest.as_deref(),
        }
    }
}

#[derive(Clone)]
pub struct Resolver {
    datasites_root: PathBuf,
    strategies: Arc<[Strategy]>,
}

impl Resolver {
    pub fn new(datasites_root: impl Into<PathBuf>) -> Self {
        Self::with_strategies(datasites_root, DEFAULT_STRATEGIES.to_vec())
    }

    pub fn with_strategies(datasites_root: impl Into<PathBuf>, strategies: Vec<Strategy>) -> Self {
        Self {
            datasites_root: normalize(&absolute(&datasites_root.into())),
            strategies: strategies.into(),
        }
    }

    pub fn datasites_root(&self) -> &Path {
        &self.datasites_root
    }

    /// First strategy that finds an existing path wins.
    pub fn resolve(&self, manifest: &ObjectManifest, kind: ArtifactKind) -> Option<PathBuf> {
        let ctx = ResolveContext {
            manifest,
            kind,
            datasites_root: &self.datasites_root,
        };
        let found = self.strategies.iter().find_map(|strategy| {
            let hit = (strategy.locate)(&ctx)?;
            if self.in_foreign_datasite(manifest.owner(), &hit) {
                debug!(
                    uid = %manifest.uid,
                    strategy = strategy.name,
                    "ignoring {} in another datasite",
                    hit.display()
                );
                return None;
            }
            debug!(
                uid = %manifest.uid,
                artifact = kind.as_str(),
                strategy = strategy.name,
                "resolved {}",
                hit.display()
            );
            Some(hit)
        });
        if found.is_none() {
            debug!(uid = %manifest.uid, artifact = kind.as_str(), "no strategy found the file");
        }
        found
    }

    /// Inside the datasites root but outside `<root>/<owner>`.
    fn in_foreign_datasite(&self, owner: &str, path: &Path) -> bool {
        let path = normalize(path);
        path.starts_with(&self.datasites_root) && !path.starts_with(self.datasites_root.join(owner))
    }

    pub fn resolve_all(&self, manifest: &ObjectManifest) -> ResolvedPaths {
        ResolvedPaths {
            private: self.resolve(manifest, ArtifactKind::Private),
            mock: self.resolve(manifest, ArtifactKind::Mock),
            manifest: self.resolve(manifest, ArtifactKind::Manifest),
        }
    }

    pub fn exists(&self, manifest: &ObjectManifest, kind: ArtifactKind) -> bool {
        self.resolve(manifest, kind).is_some()
    }

    /// Where the locator says the artifact lives, whether or not it exists.
    pub fn conventional_path(&self, manifest: &ObjectManifest, kind: ArtifactKind) -> PathBuf {
        manifest.locator(kind).to_local_path(&self.datasites_root)
    }

    /// Re-anchor every artifact that can currently be found: store its path
    /// relative to `base_path` and refresh its absolute fallback. Artifacts
    /// that cannot be found keep their stored values.
    pub fn update_relative_paths(&self, manifest: &mut ObjectManifest) {
        let base = manifest.effective_base().map(|base| normalize(&base));
        for kind in ArtifactKind::ALL {
            let Some(found) = self.resolve(manifest, kind) else {
                continue;
            };
            if let Some(relative) = base.as_deref().and_then(|base| relative_to(&found, base)) {
                manifest.set_relative(kind, Some(relative));
            }
            manifest.set_fallback(kind, Some(found));
        }
    }

    /// Write `manifest` to `path`. With `use_relative_paths` the relative
    /// fields are recomputed first; the manifest's own fallback always
    /// records `path`.
    pub fn save(
        &self,
        manifest: &mut ObjectManifest,
        path: impl AsRef<Path>,
        use_relative_paths: bool,
    ) -> ManifestResult<()> {
        let path = normalize(&absolute(path.as_ref()));
        if use_relative_paths {
            self.update_relative_paths(manifest);
            if let Some(relative) = manifest
                .effective_base()
                .and_then(|base| relative_to(&path, &normalize(&base)))
            {
                manifest.set_relative(ArtifactKind::Manifest, Some(relative));
            }
        }
        manifest.set_fallback(ArtifactKind::Manifest, Some(path.clone()));
        manifest.write_yaml(&path)?;
        debug!(uid = %manifest.uid, "saved manifest to {}", path.display());
        Ok(())
    }
}

pub fn relative_strategy(ctx: &ResolveContext<'_>) -> Option<PathBuf> {
    let base = ctx.manifest.effective_base()?;
    let relative = ctx.manifest.relative(ctx.kind)?;
    existing(normalize(&base.join(relative)))
}

pub fn locator_strategy(ctx: &ResolveContext<'_>) -> Option<PathBuf> {
    existing(normalize(
        &ctx.manifest.locator(ctx.kind).to_local_path(ctx.datasites_root),
    ))
}

pub fn fallback_strategy(ctx: &ResolveContext<'_>) -> Option<PathBuf> {
    existing(normalize(&absolute(ctx.manifest.fallback(ctx.kind)?)))
}

/// Look for the expected file name next to the manifest, one and two levels
/// up, each directly and under `data/`, `public/objects/`, `private/objects/`.
pub fn heuristic_strategy(ctx: &ResolveContext<'_>) -> Option<PathBuf> {
    let name = ctx.manifest.locator(ctx.kind).file_name();
    if name.is_empty() {
        return None;
    }
    let dir = ctx.manifest.manifest_dir()?;

    let mut anchors: Vec<&Path> = Vec::with_capacity(3);
    let mut current = Some(dir);
    while let Some(anchor) = current {
        if anchors.len() == 3 {
            break;
        }
        anchors.push(anchor);
        current = anchor.parent();
    }

    anchors
        .into_iter()
        .flat_map(|anchor| HEURISTIC_DIRS.iter().map(move |sub| anchor.join(sub).join(name)))
        .find_map(|candidate| existing(normalize(&candidate)))
}

fn existing(path: PathBuf) -> Option<PathBuf> {
    path.exists().then_some(path)
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Remove `.` and fold `..` without touching the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(out.components().next_back(), Some(Component::Normal(_))) {
                    out.pop();
                } else if !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// `path` expressed relative to `base`, `/`-separated. Both must be absolute
/// and normalised; `None` when they do not share a root.
pub fn relative_to(path: &Path, base: &Path) -> Option<String> {
    let path: Vec<Component> = path.components().collect();
    let base: Vec<Component> = base.components().collect();
    if path.first() != base.first() {
        return None;
    }

    let shared = path
        .iter()
        .zip(base.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let mut parts: Vec<String> =
        std::iter::repeat_n("..".to_string(), base.len() - shared).collect();
    parts.extend(
        path[shared..]
            .iter()
            .map(|component| component.as_os_str().to_string_lossy().into_owned()),
    );

    if parts.is_empty() {
        Some(".".to_string())
    } else {
        Some(parts.join("/"))
    }
}
