//! Typed identifiers for server-side objects.
//!
//! All ids are serde-transparent so they decode directly from the numeric
//! values used by the HTTP API.

use serde::{Deserialize, Serialize};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(v: u64) -> Self {
                Self(v)
            }
        }
    };
}

id_type!(ProjectId);
id_type!(StackId);
id_type!(SkeletonId);
id_type!(
    /// A persisted skeleton node (treenode).
    NodeId
);
id_type!(UserId);
id_type!(
    /// Index of a segment within a skeleton's review table.
    SegmentId
);

#[cfg(test)]
mod tests {
    use super::{NodeId, UserId};

    #[test]
    fn ids_decode_from_plain_numbers() {
        let id: NodeId = serde_json::from_str("42").unwrap();
        assert_eq!(id, NodeId(42));
        assert_eq!(serde_json::to_string(&UserId(7)).unwrap(), "7");
    }

    #[test]
    fn ids_display_as_numbers() {
        assert_eq!(NodeId(12).to_string(), "12");
    }
}
