//! Plan execution: step resolution, dispatch policy, and the sequential
//! runner that ties them to the local backend and the tool bridge.

pub mod policy;
pub mod resolver;
pub mod runner;

pub use policy::{classify, Dispatcher, ToolClass};
pub use resolver::{resolve, Resolution, Resolved};
pub use runner::{NoopObserver, PlanExecutor, PlanObserver};
