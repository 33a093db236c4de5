//! 领域模型模块
//!
//! 纯数据结构，不依赖 tokio / reqwest

pub mod event;
pub mod findings;
pub mod package;
pub mod status;
pub mod variable;

// Re-exports for convenience
pub use event::{LogLine, StatusEvent};
pub use findings::{Findings, VersionTriple};
pub use package::{PackageHandle, PackageId};
pub use status::{EnvironmentStatus, ProcessStatus, RunMode};
pub use variable::{Namespace, ParameterSet, VarType, VariableRecord};
