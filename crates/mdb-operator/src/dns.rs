//! Member hostname derivation
//!
//! Pod names are a pure function of the resource name, the member cluster's
//! stable index, and the pod ordinal. Scale-down relies on this to name the
//! exact members being removed; the cluster index keeps names stable across
//! clusters joining and leaving (see the cluster mapping in
//! [`crate::state`]).

use std::ops::Range;

/// Pod name for one member.
///
/// Single-cluster resources keep the legacy flat naming (`name-ordinal`);
/// multi-cluster resources embed the cluster index (`name-index-ordinal`).
pub fn member_name(resource_name: &str, cluster_index: Option<i32>, ordinal: i32) -> String {
    match cluster_index {
        Some(index) => format!("{}-{}-{}", resource_name, index, ordinal),
        None => format!("{}-{}", resource_name, ordinal),
    }
}

/// Names of the members at the given ordinals
pub fn member_names(resource_name: &str, cluster_index: Option<i32>, ordinals: Range<i32>) -> Vec<String> {
    ordinals
        .map(|ordinal| member_name(resource_name, cluster_index, ordinal))
        .collect()
}
