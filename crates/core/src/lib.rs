pub mod capability;
pub mod config;
pub mod error;
pub mod paths;
pub mod plan;

pub use capability::ToolBridge;
pub use config::{BridgeConfig, BrowserConfig, Config};
pub use error::{Error, Result};
pub use paths::Paths;
pub use plan::{
    ActionKind, BridgeStatus, Plan, PlanStep, ProgressEvent, ProgressStatus, ResolvedCall,
    StepResult, TabInfo,
};
