//! XJP Fleet - 依赖有序的部署/销毁编排器
//!
//! 库入口：包状态检查、依赖图调度、参数收敛

pub mod config;
pub mod domain;
pub mod error;
pub mod infra;
pub mod services;
pub mod state;

pub use config::{EnvConfig, FleetManifest};
pub use error::{FleetError, FleetResult};
pub use services::fleet::{Fleet, PackageReport, RunOptions};
pub use services::scheduler::RunSummary;
