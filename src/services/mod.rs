//! 服务层模块
//!
//! 包含核心业务逻辑

pub mod convergence;
pub mod deploy;
pub mod fleet;
pub mod modules;
pub mod package;
pub mod scheduler;
