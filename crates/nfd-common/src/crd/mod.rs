//! Custom Resource Definitions for the NFD operator

mod nfd;
mod types;

pub use nfd::{
    NodeFeatureDiscovery, NodeFeatureDiscoverySpec, NodeFeatureDiscoveryStatus, OperandSpec,
    WorkerConfigSpec,
};
pub use types::{Condition, ConditionStatus, ConditionType};
