use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Stable identity of a user account (consumer or provider).
    UserId
);
string_id!(
    /// A tenant-scoped content pool.
    SwarmId
);
string_id!(
    /// Identity announced by a provider agent in its `id|` frame.
    PeerId
);
string_id!(
    /// Content identifier of a stored blob.
    Cid
);
string_id!(
    /// Identifier of a file metadata record.
    FileId
);

impl FileId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// Role of a user inside a swarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Consumer,
    Provider,
}

/// Membership of a user in one swarm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub swarm_id: SwarmId,
    pub role: Role,
    /// Storage the provider offers in this swarm. `None` means unlimited.
    #[serde(default)]
    pub quota_bytes: Option<u64>,
}

impl Membership {
    pub fn is_provider_in(&self, swarm_id: &SwarmId) -> bool {
        self.role == Role::Provider && &self.swarm_id == swarm_id
    }
}

/// File metadata owned by the external storage collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: FileId,
    pub cid: Cid,
    #[serde(default)]
    pub name: String,
    pub size: u64,
    pub swarm_id: SwarmId,
    pub owner_id: UserId,
    /// Providers currently holding the blob.
    #[serde(default)]
    pub stored_ids: BTreeSet<UserId>,
}

impl FileRecord {
    pub fn is_held_by(&self, user_id: &UserId) -> bool {
        self.stored_ids.contains(user_id)
    }
}

/// Space a provider can still accept in a swarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Capacity {
    Unlimited,
    Bytes(u64),
}

impl Capacity {
    /// Remaining capacity for a quota and the bytes already stored.
    pub fn remaining(quota_bytes: Option<u64>, used_bytes: u64) -> Self {
        match quota_bytes {
            None => Capacity::Unlimited,
            Some(quota) => Capacity::Bytes(quota.saturating_sub(used_bytes)),
        }
    }

    pub fn fits(&self, required_bytes: u64) -> bool {
        match self {
            Capacity::Unlimited => true,
            Capacity::Bytes(available) => *available >= required_bytes,
        }
    }
}

impl PartialOrd for Capacity {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Capacity {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use std::cmp::Ordering;
        match (self, other) {
            (Capacity::Unlimited, Capacity::Unlimited) => Ordering::Equal,
            (Capacity::Unlimited, Capacity::Bytes(_)) => Ordering::Greater,
            (Capacity::Bytes(_), Capacity::Unlimited) => Ordering::Less,
            (Capacity::Bytes(a), Capacity::Bytes(b)) => a.cmp(b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_remaining() {
        assert_eq!(Capacity::remaining(None, 500), Capacity::Unlimited);
        assert_eq!(Capacity::remaining(Some(1_000), 400), Capacity::Bytes(600));
        assert_eq!(Capacity::remaining(Some(1_000), 4_000), Capacity::Bytes(0));
    }

    #[test]
    fn test_capacity_ordering() {
        assert!(Capacity::Unlimited > Capacity::Bytes(u64::MAX));
        assert!(Capacity::Bytes(10) > Capacity::Bytes(9));
        assert!(Capacity::Bytes(0).fits(0));
        assert!(!Capacity::Bytes(9).fits(10));
    }

    #[test]
    fn test_membership_provider_check() {
        let m = Membership {
            swarm_id: SwarmId::new("s1"),
            role: Role::Provider,
            quota_bytes: None,
        };
        assert!(m.is_provider_in(&SwarmId::new("s1")));
        assert!(!m.is_provider_in(&SwarmId::new("s2")));

        let consumer = Membership { role: Role::Consumer, ..m };
        assert!(!consumer.is_provider_in(&SwarmId::new("s1")));
    }
}
