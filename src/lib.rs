//! Brings multi-node ZooKeeper, Kafka, and Trogdor clusters up and down.
//!
//! # Program flow
//!
//! 1. The operator writes a cluster file naming roles and the nodes that carry them. [config]
//!    parses it and assembles a [Cluster], giving every node a log file and an [Uplink].
//!
//! 2. Each role turns its node into [Action]s: provisioning, setup, daemon start, status, and
//!    stop, log collection, and teardown. Each action names the actions it must run after.
//!
//! 3. A [Selection] picks the actions one operation (`up`, `status`, `stop`, or `down`) needs.
//!    [run_plan] checks that they form an acyclic graph whose dependencies all resolve, then runs
//!    them on a pool of worker threads as their dependencies succeed. A failed action skips its
//!    dependents; unrelated actions continue.
//!
//! 4. The run ends with a summary of every action's outcome. What provisioning discovered is
//!    saved by [state] for the next run.
//!
//! [Action]: crate::core::Action
//! [Cluster]: crate::core::Cluster
//! [Selection]: crate::core::Selection
//! [Uplink]: crate::uplink::Uplink

pub mod cloud;
pub mod config;
pub mod core;
pub mod logger;
pub mod run_plan;
pub mod state;
pub mod uplink;

#[doc(inline)]
pub use run_plan::run_plan;
