//! Typed per-object settings that used to ride along in free-form metadata.

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::BTreeMap;

/// How caller-supplied files end up in the datasite.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    /// Copy into the owner's datasite; the source stays untouched.
    #[default]
    Copy,
    /// Move into the owner's datasite.
    Move,
    /// Leave the files where they are and point the fallbacks at them.
    Reference,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectOptions {
    #[serde(default)]
    pub use_relative_paths: bool,
    #[serde(default)]
    pub placement: Placement,
}

impl ObjectOptions {
    pub const LEGACY_KEYS: [&'static str; 3] =
        ["use_relative_paths", "reference_only", "move_files_to_syftbox"];

    pub fn is_reference(&self) -> bool {
        self.placement == Placement::Reference
    }

    /// Pull legacy flags out of `metadata` and fold them into the typed options.
    ///
    /// `reference_only: true` wins over `move_files_to_syftbox`.
    pub fn lift_from_metadata(&mut self, metadata: &mut BTreeMap<String, Value>) {
        if let Some(flag) = take_flag(metadata, "use_relative_paths") {
            self.use_relative_paths = flag;
        }
        let reference_only = take_flag(metadata, "reference_only");
        let move_files = take_flag(metadata, "move_files_to_syftbox");
        match (reference_only, move_files) {
            (Some(true), _) | (_, Some(false)) => self.placement = Placement::Reference,
            (_, Some(true)) => self.placement = Placement::Move,
            _ => {}
        }
    }
}

fn take_flag(metadata: &mut BTreeMap<String, Value>, key: &str) -> Option<bool> {
    metadata.remove(key).and_then(|value| value.as_bool())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(pairs: &[(&str, bool)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::Bool(*v)))
            .collect()
    }

    #[test]
    fn lifts_legacy_flags_out_of_metadata() {
        let mut metadata = meta(&[("use_relative_paths", true), ("reference_only", true)]);
        metadata.insert("version".into(), Value::String("1.0".into()));

        let mut options = ObjectOptions::default();
        options.lift_from_metadata(&mut metadata);

        assert!(options.use_relative_paths);
        assert_eq!(options.placement, Placement::Reference);
        assert_eq!(metadata.len(), 1);
        assert!(metadata.contains_key("version"));
    }

    #[test]
    fn reference_only_overrides_move() {
        let mut metadata = meta(&[("reference_only", true), ("move_files_to_syftbox", true)]);
        let mut options = ObjectOptions::default();
        options.lift_from_metadata(&mut metadata);
        assert!(options.is_reference());
    }

    #[test]
    fn untouched_without_legacy_keys() {
        let mut metadata = BTreeMap::new();
        let mut options = ObjectOptions {
            use_relative_paths: true,
            placement: Placement::Move,
        };
        options.lift_from_metadata(&mut metadata);
        assert_eq!(options.placement, Placement::Move);
        assert!(options.use_relative_paths);
    }
}
