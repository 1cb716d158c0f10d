//! Replication: policies, executions and the controller which runs them.

mod catalog;
mod controller;
mod model;
mod store;

pub use self::catalog::{ArtifactCatalog, MemoryCatalog};
pub use self::controller::{MAX_CONCURRENT_SUBMISSIONS, REPLICATION_JOB, ReplicationController};
pub use self::model::{
    Execution, ExecutionStatus, ExecutionTrigger, Filter, FilterKind, OnFailure,
    ReplicationPolicy, ReplicationSpec, Resource, ResourceType, Task, TaskStatus, glob_to_regex,
};
pub use self::store::{
    ExecutionQuery, ExecutionStore, MemoryExecutionStore, NewTask, StopClaim, TaskQuery,
};
