//! Common types for the MongoDB deployment operator: CRDs, errors, and the
//! annotation codec used to persist reconciliation state.

#![deny(missing_docs)]

pub mod annotations;
pub mod crd;
pub mod error;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Implicit failure-domain name used for single-cluster deployments.
///
/// Deployments that do not declare a cluster spec list still need an entry in
/// the per-cluster member accounting; they get this reserved name, which can
/// never collide with a real member cluster (Kubernetes cluster names cannot
/// start with an underscore).
pub const LEGACY_CENTRAL_CLUSTER_NAME: &str = "__default";

/// Annotation holding the JSON-encoded desired spec as last successfully applied
pub const LAST_ACHIEVED_SPEC_ANNOTATION: &str = "mdb.io/v1.last-achieved-spec";

/// Annotation holding the JSON map of member cluster name to stable index
pub const CLUSTER_MAPPING_ANNOTATION: &str = "mdb.io/v1.cluster-mapping";

/// Annotation holding the JSON map of member cluster name to last applied member count
pub const LAST_APPLIED_MEMBER_SPEC_ANNOTATION: &str = "mdb.io/v1.last-applied-member-spec";

/// Annotation holding a redistributed cluster spec list written on cluster failover
pub const CLUSTER_SPEC_OVERRIDE_ANNOTATION: &str = "mdb.io/v1.cluster-spec-override";

/// Annotation recording member clusters that failed their health checks
pub const FAILED_CLUSTERS_ANNOTATION: &str = "mdb.io/v1.failed-clusters";

/// Annotation selecting the container image architecture ("static" pins the
/// mongod binary into the image instead of letting the agent download it)
pub const ARCHITECTURE_ANNOTATION: &str = "mdb.io/v1.architecture";

/// Value of [`ARCHITECTURE_ANNOTATION`] selecting the pinned-binary image
pub const STATIC_ARCHITECTURE: &str = "static";

/// Name of the database container inside the workload pods
pub const DATABASE_CONTAINER_NAME: &str = "mongod";

/// Name of the volume mounting the per-member TLS certificates
pub const MEMBER_CERT_VOLUME_NAME: &str = "member-certs";

/// Name of the volume mounting the custom CA bundle
pub const CA_CERT_VOLUME_NAME: &str = "ca-cert";

/// Name of the volume mounting the agent mutual-TLS credentials
pub const AGENT_CERT_VOLUME_NAME: &str = "agent-certs";

/// Agent authentication mode requiring client certificates
pub const X509_AUTH_MODE: &str = "X509";
