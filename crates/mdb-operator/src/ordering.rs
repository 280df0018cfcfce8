//! Change-ordering decision engine
//!
//! Two independently-updatable subsystems change during a pass: the workload
//! StatefulSets and the Automation Controller's deployment config. The
//! default order (workload first) is wrong whenever the live pods would lose
//! something the current config still requires — a certificate volume, a
//! voting member, a pinned binary version. This module decides, before
//! anything is mutated, whether the config must be published first.
//!
//! Pure over already-observed state: no I/O happens here.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Container;
use tracing::debug;

use mdb_common::crd::MongoDbDeploymentSpec;
use mdb_common::{
    AGENT_CERT_VOLUME_NAME, ARCHITECTURE_ANNOTATION, CA_CERT_VOLUME_NAME, DATABASE_CONTAINER_NAME,
    MEMBER_CERT_VOLUME_NAME, STATIC_ARCHITECTURE, X509_AUTH_MODE,
};

fn database_container(sts: &StatefulSet) -> Option<&Container> {
    sts.spec
        .as_ref()?
        .template
        .spec
        .as_ref()?
        .containers
        .iter()
        .find(|c| c.name == DATABASE_CONTAINER_NAME)
}

/// Whether the database container currently mounts a volume with this name
fn mounts_volume(sts: &StatefulSet, volume_name: &str) -> bool {
    database_container(sts)
        .and_then(|c| c.volume_mounts.as_ref())
        .map(|mounts| mounts.iter().any(|m| m.name == volume_name))
        .unwrap_or(false)
}

fn live_replicas(sts: &StatefulSet) -> i32 {
    sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0)
}

/// Decide whether the deployment config must be published before the
/// workload StatefulSet is mutated this pass.
///
/// `live` is the currently-deployed StatefulSet, if any, and
/// `desired_replicas` the member count planned for it this pass.
/// `current_agent_auth_mode` and `current_ca_config_ref` describe the
/// project as configured right now. All conditions are evaluated so each is
/// observable in the debug log, but any single match forces config-first.
pub fn should_publish_config_first(
    live: Option<&StatefulSet>,
    desired_replicas: i32,
    spec: &MongoDbDeploymentSpec,
    last_spec: Option<&MongoDbDeploymentSpec>,
    current_agent_auth_mode: Option<&str>,
    current_ca_config_ref: Option<&str>,
    resource_annotations: &BTreeMap<String, String>,
) -> bool {
    // a new StatefulSet has no running members to protect
    let sts = match live {
        Some(sts) => sts,
        None => return false,
    };

    let mut config_first = false;

    if desired_replicas < live_replicas(sts) {
        debug!("Scaling down; the deployment config needs to be published first");
        config_first = true;
    }

    if !spec.security.tls.enabled && mounts_volume(sts, MEMBER_CERT_VOLUME_NAME) {
        debug!("TLS is being disabled while member certificates are still mounted");
        config_first = true;
    }

    // spec-level and project-level CA removal are independent gaps: losing
    // either reference while the bundle is still mounted needs config-first
    if mounts_volume(sts, CA_CERT_VOLUME_NAME) {
        if spec.security.tls.ca.is_none() {
            debug!("Custom CA is removed from the spec while the CA bundle is still mounted");
            config_first = true;
        }
        if current_ca_config_ref.is_none() {
            debug!("Project no longer references a CA while the CA bundle is still mounted");
            config_first = true;
        }
    }

    let agent_mode = spec.security.effective_agent_auth_mode(current_agent_auth_mode);
    if agent_mode.as_deref() != Some(X509_AUTH_MODE) && mounts_volume(sts, AGENT_CERT_VOLUME_NAME) {
        debug!("Agent auth is leaving X509 while agent credentials are still mounted");
        config_first = true;
    }

    let static_architecture = resource_annotations
        .get(ARCHITECTURE_ANNOTATION)
        .map(|v| v == STATIC_ARCHITECTURE)
        .unwrap_or(false);
    if static_architecture && spec.is_changing_version(last_spec) {
        debug!("Version change on static architecture; config must acknowledge it first");
        config_first = true;
    }

    config_first
}
