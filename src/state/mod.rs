//! 运行时状态模块
//!
//! 包注册表与状态/日志通道

pub mod registry;
pub mod status_hub;

pub use registry::PackageRegistry;
pub use status_hub::StatusHub;
