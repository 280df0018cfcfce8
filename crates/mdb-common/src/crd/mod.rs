//! Custom Resource Definitions for the MongoDB deployment operator

mod mongodb;

pub use mongodb::{
    AgentAuthSpec, AuthenticationSpec, BackupMode, BackupSpec, ClusterSpecItem, DeploymentPhase,
    MongoDbDeployment, MongoDbDeploymentSpec, MongoDbDeploymentStatus, ResourceType, SecuritySpec,
    TlsSpec, Topology,
};
