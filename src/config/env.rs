//! 环境变量配置加载

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::FleetError;

/// 环境配置
#[derive(Clone, Debug)]
pub struct EnvConfig {
    /// 目标环境名称
    pub environment: String,
    /// 部署者身份
    pub identity: String,
    /// 舰队清单路径
    pub manifest_path: PathBuf,
    /// 构建/安装命令的工作目录
    pub work_dir: PathBuf,
    /// 同时处理的包数上限（None 表示不限）
    pub max_processing: Option<usize>,
    /// 远程协作方
    pub remote: RemoteConfig,
    /// 基础设施工具
    pub provisioner: ProvisionerConfig,
    /// 单个子进程超时（None 表示不限）
    pub command_timeout: Option<Duration>,
}

/// 远程协作方配置
#[derive(Clone, Debug, Default)]
pub struct RemoteConfig {
    pub param_store_url: Option<String>,
    pub kms_url: Option<String>,
    pub kms_key_id: Option<String>,
    pub registry_url: Option<String>,
    pub registry_token: Option<String>,
    /// 参数存储 / KMS 的访问令牌
    pub api_token: Option<String>,
}

/// 基础设施工具配置
#[derive(Clone, Debug)]
pub struct ProvisionerConfig {
    /// 可执行程序（如 cdk）
    pub tool: String,
    /// 附加在每个动词前的参数
    pub args: Vec<String>,
    /// 销毁失败时的补偿删除命令，`{stack}` 会被替换为堆栈名
    pub delete_command: Option<Vec<String>>,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            tool: constants::DEFAULT_STACK_TOOL.to_string(),
            args: Vec::new(),
            delete_command: None,
        }
    }
}

impl EnvConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Result<Self, FleetError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// 从任意键值来源加载配置
    pub fn from_lookup<F>(lookup: F) -> Result<Self, FleetError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        // 环境与身份是硬性前置条件
        let environment = get("FLEET_ENVIRONMENT")
            .ok_or_else(|| FleetError::Precondition("FLEET_ENVIRONMENT is not set".into()))?;
        let identity = get("FLEET_IDENTITY")
            .ok_or_else(|| FleetError::Precondition("FLEET_IDENTITY is not set".into()))?;

        let manifest_path = get("FLEET_MANIFEST")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(constants::DEFAULT_MANIFEST));
        let work_dir = get("FLEET_WORK_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        let max_processing = match get("FLEET_MAX_PROCESSING") {
            Some(raw) => parse_max_processing(&raw)?,
            None => None,
        };

        let command_timeout = match get("FLEET_COMMAND_TIMEOUT_SECS") {
            Some(raw) => Some(Duration::from_secs(raw.parse().map_err(|_| {
                FleetError::Config(format!("FLEET_COMMAND_TIMEOUT_SECS is not a number: {}", raw))
            })?)),
            None => None,
        };

        let remote = RemoteConfig {
            param_store_url: get("FLEET_PARAM_STORE_URL").map(trim_url),
            kms_url: get("FLEET_KMS_URL").map(trim_url),
            kms_key_id: get("FLEET_KMS_KEY_ID"),
            registry_url: get("FLEET_REGISTRY_URL").map(trim_url),
            registry_token: get("FLEET_REGISTRY_TOKEN"),
            api_token: get("FLEET_API_TOKEN"),
        };

        let provisioner = ProvisionerConfig {
            tool: get("FLEET_STACK_TOOL").unwrap_or_else(|| constants::DEFAULT_STACK_TOOL.to_string()),
            args: get("FLEET_STACK_TOOL_ARGS")
                .map(|v| split_words(&v))
                .unwrap_or_default(),
            delete_command: get("FLEET_STACK_DELETE_COMMAND").map(|v| split_words(&v)),
        };

        Ok(Self {
            environment,
            identity,
            manifest_path,
            work_dir,
            max_processing,
            remote,
            provisioner,
            command_timeout,
        })
    }
}

/// 0 与未设置等价，表示不限并发
fn parse_max_processing(raw: &str) -> Result<Option<usize>, FleetError> {
    let value: usize = raw.trim().parse().map_err(|_| {
        FleetError::Config(format!("FLEET_MAX_PROCESSING is not a number: {}", raw))
    })?;
    Ok((value > 0).then_some(value))
}

fn split_words(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(str::to_string).collect()
}

fn trim_url(url: String) -> String {
    url.trim_end_matches('/').to_string()
}

/// 常量
pub mod constants {
    /// 默认清单文件
    pub const DEFAULT_MANIFEST: &str = "fleet.json";

    /// 默认基础设施工具
    pub const DEFAULT_STACK_TOOL: &str = "cdk";

    /// 状态事件广播容量
    pub const STATUS_CHANNEL_CAPACITY: usize = 1024;

    /// 每个包日志通道容量
    pub const LOG_CHANNEL_CAPACITY: usize = 256;

    /// 远程调用超时（秒）
    pub const HTTP_TIMEOUT_SECS: u64 = 30;

    /// 运行中有包失败或被取消
    pub const EXIT_RUN_FAILED: i32 = 1;

    /// 缺少环境/身份等前置条件
    pub const EXIT_PRECONDITION_FAILED: i32 = 2;

    /// 配置或清单错误
    pub const EXIT_CONFIG_ERROR: i32 = 3;

    /// 版本号
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}
