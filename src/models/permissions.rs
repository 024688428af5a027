//! Access lists attached to every object.
//!
//! Five lists are kept independently: discovery, mock read/write and private
//! read/write. None implies another; each gate must be checked on its own.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Sentinel written to manifests for "all users".
pub const EVERYONE: &str = "public";

/// One entry of an access list.
///
/// `public@example.com` parses as an email; only the bare `public` (or `*`)
/// means everyone.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Principal {
    Everyone,
    Email(String),
}

impl Principal {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            EVERYONE | "*" => Principal::Everyone,
            other => Principal::Email(other.to_string()),
        }
    }

    pub fn email(address: impl Into<String>) -> Self {
        Principal::Email(address.into())
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Principal::Everyone => f.write_str(EVERYONE),
            Principal::Email(address) => f.write_str(address),
        }
    }
}

impl Serialize for Principal {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Principal {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Principal::parse(&raw))
    }
}

/// A de-duplicated, order-preserving set of principals.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AccessList(Vec<Principal>);

impl AccessList {
    pub fn new<I>(principals: I) -> Self
    where
        I: IntoIterator<Item = Principal>,
    {
        let mut list = Self::default();
        for principal in principals {
            list.insert(principal);
        }
        list
    }

    pub fn everyone() -> Self {
        Self(vec![Principal::Everyone])
    }

    pub fn only(email: &str) -> Self {
        Self(vec![Principal::email(email)])
    }

    pub fn from_strings<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::new(
            entries
                .into_iter()
                .filter(|entry| !entry.as_ref().trim().is_empty())
                .map(|entry| Principal::parse(entry.as_ref())),
        )
    }

    pub fn insert(&mut self, principal: Principal) {
        if !self.0.contains(&principal) {
            self.0.push(principal);
        }
    }

    pub fn includes_everyone(&self) -> bool {
        self.0.contains(&Principal::Everyone)
    }

    /// True iff `requester` is listed or the list is open to everyone.
    pub fn allows(&self, requester: &str) -> bool {
        self.0.iter().any(|principal| match principal {
            Principal::Everyone => true,
            Principal::Email(address) => address == requester,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Principal> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_strings(&self) -> Vec<String> {
        self.0.iter().map(ToString::to_string).collect()
    }
}

impl Serialize for AccessList {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for AccessList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let entries = Vec::<Principal>::deserialize(deserializer)?;
        Ok(Self::new(entries))
    }
}

/// Which gate a request must pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    Discover,
    MockRead,
    MockWrite,
    PrivateRead,
    PrivateWrite,
}

/// The five access lists of an object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    #[serde(default = "AccessList::everyone", alias = "syftobject")]
    pub discovery_read: AccessList,
    #[serde(default = "AccessList::everyone")]
    pub mock_read: AccessList,
    #[serde(default)]
    pub mock_write: AccessList,
    #[serde(default)]
    pub private_read: AccessList,
    #[serde(default)]
    pub private_write: AccessList,
}

impl Permissions {
    /// Creation defaults: discoverable and mock-readable by everyone, mock
    /// writable by nobody, private side restricted to the owner.
    pub fn owned_by(owner: &str) -> Self {
        Self {
            discovery_read: AccessList::everyone(),
            mock_read: AccessList::everyone(),
            mock_write: AccessList::default(),
            private_read: AccessList::only(owner),
            private_write: AccessList::only(owner),
        }
    }

    pub fn list(&self, access: Access) -> &AccessList {
        match access {
            Access::Discover => &self.discovery_read,
            Access::MockRead => &self.mock_read,
            Access::MockWrite => &self.mock_write,
            Access::PrivateRead => &self.private_read,
            Access::PrivateWrite => &self.private_write,
        }
    }

    pub fn allows(&self, access: Access, requester: &str) -> bool {
        self.list(access).allows(requester)
    }

    /// Replace the lists present in `update`, keep the rest.
    pub fn apply(&mut self, update: PermissionsUpdate) -> Vec<&'static str> {
        let mut changed = Vec::new();
        if let Some(list) = update.discovery_read {
            self.discovery_read = list;
            changed.push("discovery_read");
        }
        if let Some(list) = update.mock_read {
            self.mock_read = list;
            changed.push("mock_read");
        }
        if let Some(list) = update.mock_write {
            self.mock_write = list;
            changed.push("mock_write");
        }
        if let Some(list) = update.private_read {
            self.private_read = list;
            changed.push("private_read");
        }
        if let Some(list) = update.private_write {
            self.private_write = list;
            changed.push("private_write");
        }
        changed
    }
}

/// Partial permission change; absent lists are left untouched.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct PermissionsUpdate {
    #[serde(default, alias = "syftobject")]
    pub discovery_read: Option<AccessList>,
    #[serde(default)]
    pub mock_read: Option<AccessList>,
    #[serde(default)]
    pub mock_write: Option<AccessList>,
    #[serde(default)]
    pub private_read: Option<AccessList>,
    #[serde(default)]
    pub private_write: Option<AccessList>,
}

/// Effective rights of one requester on one object.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct EffectiveAccess {
    pub mock_read: bool,
    pub mock_write: bool,
    pub private_read: bool,
    pub private_write: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_sentinel_is_distinct_from_public_address() {
        assert_eq!(Principal::parse("public"), Principal::Everyone);
        assert_eq!(Principal::parse("*"), Principal::Everyone);
        assert_eq!(
            Principal::parse("public@example.com"),
            Principal::Email("public@example.com".into())
        );

        let list = AccessList::from_strings(["public@example.com"]);
        assert!(!list.includes_everyone());
        assert!(!list.allows("someone@example.com"));
        assert!(list.allows("public@example.com"));
    }

    #[test]
    fn lists_are_independent() {
        let perms = Permissions {
            discovery_read: AccessList::everyone(),
            mock_read: AccessList::only("a@x.com"),
            mock_write: AccessList::default(),
            private_read: AccessList::default(),
            private_write: AccessList::only("a@x.com"),
        };
        assert!(perms.allows(Access::MockRead, "a@x.com"));
        assert!(!perms.allows(Access::MockWrite, "a@x.com"));
        assert!(perms.allows(Access::PrivateWrite, "a@x.com"));
        assert!(!perms.allows(Access::PrivateRead, "a@x.com"));
    }

    #[test]
    fn access_list_deduplicates_and_drops_blanks() {
        let list = AccessList::from_strings(["a@x.com", "", "a@x.com", "public", "*"]);
        assert_eq!(list.to_strings(), vec!["a@x.com", "public"]);
    }

    #[test]
    fn partial_update_touches_only_given_lists() {
        let mut perms = Permissions::owned_by("o@x.com");
        let changed = perms.apply(PermissionsUpdate {
            mock_read: Some(AccessList::only("b@x.com")),
            ..Default::default()
        });
        assert_eq!(changed, vec!["mock_read"]);
        assert!(perms.allows(Access::Discover, "anyone@x.com"));
        assert!(!perms.allows(Access::MockRead, "anyone@x.com"));
        assert!(perms.allows(Access::PrivateRead, "o@x.com"));
    }

    #[test]
    fn legacy_syftobject_key_maps_to_discovery() {
        let update: PermissionsUpdate =
            serde_json::from_str(r#"{"syftobject": ["c@x.com"]}"#).unwrap();
        assert_eq!(update.discovery_read, Some(AccessList::only("c@x.com")));
    }
}
