//! 配置模块
//!
//! 环境变量解析与舰队清单

pub mod env;
pub mod manifest;

pub use env::{EnvConfig, ProvisionerConfig, RemoteConfig};
pub use manifest::{FleetManifest, PackageDecl};
