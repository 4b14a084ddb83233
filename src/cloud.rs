//! The seam between `cloudNode` actions and a cloud provider's API.
//!
//! No provider ships with rampart. Library users plug one in with
//! [ClusterBuilder::cloud](crate::core::ClusterBuilder::cloud); without one, `cloudNode` actions
//! fail with a clear cause while everything else keeps working.

use std::fmt::Debug;

/// What to create.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstanceRequest {
    /// The node the instance is for, e.g. for tagging.
    pub node: String,
    pub image_id: String,
    pub instance_type: String,
    pub key_pair: String,
    pub security_group: String,
    pub region: String,
    pub zone: String,
}

/// Where a running instance can be reached.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Addresses {
    pub private_dns: String,
    pub public_dns: String,
}

pub trait Cloud: Debug + Send + Sync {
    /// Requests a new instance and returns its ID. Does not wait for it to boot.
    fn create_instance(&self, request: &InstanceRequest) -> anyhow::Result<String>;

    /// Returns the instance's addresses, or [None] while they are not assigned yet.
    fn describe_instance(&self, instance_id: &str) -> anyhow::Result<Option<Addresses>>;

    fn terminate_instance(&self, instance_id: &str) -> anyhow::Result<()>;
}
