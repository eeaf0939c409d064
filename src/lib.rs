//! # tiercomm
//!
//! **Topology-aware communication for distributed numeric arrays.**
//!
//! tiercomm lets a process send arrays (or tuples of arrays) to a peer without
//! agreeing on shapes up front, and organizes the process group into a two-level
//! hierarchy so collectives can use fast device links inside a machine and a
//! general transport across machines.
//!
//! ## Layers
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │   strategy (naive, flat, hierarchical, single_node)     │
//! └──────────────────────────┬──────────────────────────────┘
//! ┌──────────────────────────▼──────────────────────────────┐
//! │   Communicator: send/recv · topology · lazy scopes      │
//! └──────────────────────────┬──────────────────────────────┘
//! ┌──────────────────────────▼──────────────────────────────┐
//! │   ProcessGroup (+ DeviceCollectiveBackend)              │
//! │   (MPI-style transport, NCCL-style device collectives)  │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design
//!
//! - **Self-describing transfers**: a small JSON header declares arity and shapes,
//!   then each array moves as one raw `f32` bulk transfer
//! - **Deterministic topology**: every rank derives the same node partition from
//!   one host-name all-gather
//! - **Lazy scopes**: intra-node, inter-node and device scopes are built on the first
//!   collective, after the caller has picked its device
//! - **Strategies compose the facade**: model-wide collectives live in separate
//!   types implementing `CommunicationStrategy`

pub mod array;
pub mod communicator;
pub mod config;
pub mod dataset;
pub mod error;
pub mod group;
pub mod hierarchy;
pub mod message;
pub mod model;
pub mod strategy;
pub mod topology;
pub mod transfer;

pub use array::{HostArray, StageArray};
pub use communicator::{CommunicationStrategy, Communicator};
pub use config::CommunicatorConfig;
pub use dataset::{chunked_bcast, scatter_dataset};
pub use error::{Error, Result};
pub use group::{
    DeviceCollective, DeviceCollectiveBackend, LocalCluster, LocalClusterConfig,
    LocalDeviceBackend, LocalGroup, NoDeviceCollectives, ProcessGroup, ReduceOp,
};
#[cfg(feature = "numr")]
pub use array::numr_tensor::to_tensor;
#[cfg(feature = "numr")]
pub use group::NumrCollectives;
pub use hierarchy::{HierarchicalScopes, ScopeState};
pub use message::{MessageDescriptor, Payload, Value};
pub use model::{Model, Parameter, ParameterSet};
pub use strategy::{
    create_strategy, FlatStrategy, HierarchicalStrategy, NaiveStrategy, SingleNodeStrategy,
    StrategyKind,
};
pub use topology::{discover_topology, Topology};
