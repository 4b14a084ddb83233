//! Provides the types that describe a cluster and the work to be done on it: roles, the actions
//! they create, the nodes they run on, and the identifiers that tie actions together.

pub mod action;
pub mod cluster;
pub mod id;
pub mod node;
pub mod operation;
pub mod role;
pub mod vars;
pub mod wait;

#[doc(inline)]
pub use action::Action;

#[doc(inline)]
pub use cluster::{Cancellation, Cluster, ClusterBuilder, Environment};

#[doc(inline)]
pub use id::{ActionId, TargetId};

#[doc(inline)]
pub use node::{Discovered, Inventory, Node};

#[doc(inline)]
pub use operation::{Operation, Selection};

#[doc(inline)]
pub use role::{Role, RoleKind};
