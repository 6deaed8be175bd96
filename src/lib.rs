//! Adaptive read-replica query router.
//!
//! Sends writes to the primary and spreads reads across replicas while
//! honouring each read's consistency requirement. Node health, replication
//! lag and load drive the choice.

pub mod client;
pub mod config;
pub mod consistency;
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod load_balancer;
pub mod observability;
pub mod registry;
pub mod resilience;
pub mod routing;

pub use client::{Executor, ProbeReport, Prober, Statement, TcpProber};
pub use config::RouterConfig;
pub use consistency::SessionId;
pub use error::{DispatchError, RegistryError, RouterError};
pub use lifecycle::Shutdown;
pub use registry::{NodeStatus, Registry, ReplicaNode, Role, RouterStatus};
pub use routing::{Consistency, QueryIntent, ReadOptions, Router, RoutingDecision, WriteOptions};
