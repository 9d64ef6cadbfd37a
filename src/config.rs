//! 后端凭证配置 加载 解析与不可变快照

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::LLMError;

/// 环境名变量
pub const ENV_NAME_VAR: &str = "LLM_ENV";
/// 配置根目录变量
pub const CONFIG_PATH_VAR: &str = "LLM_CONFIG_PATH";
/// 未设置环境名时的默认值
pub const DEFAULT_ENVIRONMENT: &str = "development";
/// 配置根目录下按后端划分的文件名 每个对应 `<name>.yaml`
pub const BACKEND_FILES: &[&str] = &["azure", "bedrock", "openai_compatible"];

/// 单个后端凭证 同一后端同一环境内按 name 唯一
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub name: String,
    #[serde(flatten)]
    pub secret: SecretMaterial,
    /// Azure 资源地址或兼容服务的 base URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub weight: u32,
    /// 仅作记录 不在本层限流
    #[serde(default)]
    pub qps_limit: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub models: Vec<String>,
    /// 请求超时 单位秒 0 表示使用默认值
    #[serde(default, rename = "timeout")]
    pub timeout_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
}

impl Credential {
    /// 有效的请求超时
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    /// 该凭证是否声明支持指定模型 未声明列表时视为全部支持
    pub fn supports_model(&self, model: &str) -> bool {
        self.models.is_empty() || self.models.iter().any(|m| m == model)
    }
}

/// 加密后的密钥材料 按后端不同为单个 API Key 或 AK/SK 对
#[derive(Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SecretMaterial {
    AccessKeyPair {
        access_key: String,
        secret_key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_token: Option<String>,
    },
    ApiKey {
        api_key: String,
    },
}

impl SecretMaterial {
    /// 对每个密钥字段应用 `f` 返回新的副本 原值不变
    pub fn try_map<F>(&self, mut f: F) -> Result<Self, LLMError>
    where
        F: FnMut(&str) -> Result<String, LLMError>,
    {
        Ok(match self {
            Self::AccessKeyPair {
                access_key,
                secret_key,
                session_token,
            } => Self::AccessKeyPair {
                access_key: f(access_key)?,
                secret_key: f(secret_key)?,
                session_token: session_token.as_deref().map(&mut f).transpose()?,
            },
            Self::ApiKey { api_key } => Self::ApiKey {
                api_key: f(api_key)?,
            },
        })
    }

    pub fn api_key(&self) -> Option<&str> {
        match self {
            Self::ApiKey { api_key } => Some(api_key),
            Self::AccessKeyPair { .. } => None,
        }
    }
}

impl fmt::Debug for SecretMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AccessKeyPair { session_token, .. } => f
                .debug_struct("AccessKeyPair")
                .field("access_key", &"<redacted>")
                .field("secret_key", &"<redacted>")
                .field("session_token", &session_token.as_ref().map(|_| "<redacted>"))
                .finish(),
            Self::ApiKey { .. } => f
                .debug_struct("ApiKey")
                .field("api_key", &"<redacted>")
                .finish(),
        }
    }
}

/// 单个后端配置文件 `environments -> credentials`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendConfigFile {
    #[serde(default)]
    pub environments: HashMap<String, EnvironmentSection>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvironmentSection {
    #[serde(default)]
    pub credentials: Vec<Credential>,
}

impl BackendConfigFile {
    pub fn from_yaml(source: &str) -> Result<Self, LLMError> {
        serde_yaml::from_str(source)
            .map_err(|err| LLMError::config(format!("invalid backend config: {err}")))
    }
}

/// 某一时刻完整配置的只读快照
#[derive(Debug, Clone, Default)]
pub struct ConfigSnapshot {
    backends: HashMap<String, BackendConfigFile>,
}

impl ConfigSnapshot {
    /// 从配置根目录读取所有已知后端文件 缺失的文件被跳过
    pub fn load_from_dir(root: &Path) -> Result<Self, LLMError> {
        if !root.is_dir() {
            return Err(LLMError::config(format!(
                "config root {} is not a directory",
                root.display()
            )));
        }

        let mut snapshot = Self::default();
        for backend in BACKEND_FILES {
            let path = root.join(format!("{backend}.yaml"));
            if !path.exists() {
                debug!(backend, path = %path.display(), "backend config file absent");
                continue;
            }
            let source = std::fs::read_to_string(&path).map_err(|err| {
                LLMError::config(format!("failed to read {}: {err}", path.display()))
            })?;
            let file = BackendConfigFile::from_yaml(&source).map_err(|err| {
                LLMError::config(format!("{}: {err}", path.display()))
            })?;
            snapshot.backends.insert((*backend).to_string(), file);
        }
        Ok(snapshot)
    }

    /// 追加或替换一个后端的配置
    pub fn with_backend(mut self, backend: impl Into<String>, file: BackendConfigFile) -> Self {
        self.backends.insert(backend.into(), file);
        self
    }

    /// 取出指定后端和环境下的凭证列表
    pub fn credentials(&self, backend: &str, environment: &str) -> Result<&[Credential], LLMError> {
        let file = self
            .backends
            .get(backend)
            .ok_or_else(|| LLMError::config(format!("no configuration for backend {backend}")))?;
        let section = file.environments.get(environment).ok_or_else(|| {
            LLMError::config(format!(
                "backend {backend} has no section for environment {environment}"
            ))
        })?;
        Ok(&section.credentials)
    }

    pub fn backends(&self) -> impl Iterator<Item = &str> {
        self.backends.keys().map(String::as_str)
    }
}

/// 可热更新的配置存储 读取无锁 重载时整体替换快照
pub struct ConfigStore {
    root: Option<PathBuf>,
    current: ArcSwap<ConfigSnapshot>,
}

impl ConfigStore {
    /// 使用固定快照构建 不支持从磁盘重载
    pub fn new(snapshot: ConfigSnapshot) -> Self {
        Self {
            root: None,
            current: ArcSwap::from_pointee(snapshot),
        }
    }

    /// 从配置根目录加载
    pub fn load(root: impl Into<PathBuf>) -> Result<Self, LLMError> {
        let root = root.into();
        let snapshot = ConfigSnapshot::load_from_dir(&root)?;
        info!(root = %root.display(), "loaded backend configuration");
        Ok(Self {
            root: Some(root),
            current: ArcSwap::from_pointee(snapshot),
        })
    }

    /// 当前快照
    pub fn snapshot(&self) -> Arc<ConfigSnapshot> {
        self.current.load_full()
    }

    /// 直接发布一个新快照
    pub fn publish(&self, snapshot: ConfigSnapshot) {
        self.current.store(Arc::new(snapshot));
    }

    /// 重新读取磁盘配置 失败时保留旧快照
    pub fn reload(&self) -> Result<Arc<ConfigSnapshot>, LLMError> {
        let root = self
            .root
            .as_deref()
            .ok_or_else(|| LLMError::config("config store was not loaded from a directory"))?;
        match ConfigSnapshot::load_from_dir(root) {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                self.current.store(snapshot.clone());
                info!(root = %root.display(), "reloaded backend configuration");
                Ok(snapshot)
            }
            Err(err) => {
                warn!(root = %root.display(), error = %err, "config reload failed, keeping previous snapshot");
                Err(err)
            }
        }
    }
}

impl fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigStore")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

/// 进程级路由设置
#[derive(Debug, Clone)]
pub struct RouterSettings {
    pub environment: String,
    pub config_root: PathBuf,
}

impl RouterSettings {
    /// 从进程环境变量读取
    pub fn from_env() -> Result<Self, LLMError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 通过自定义查找函数读取 便于测试
    pub fn from_lookup<F>(lookup: F) -> Result<Self, LLMError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = lookup(ENV_NAME_VAR)
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string());
        let config_root = lookup(CONFIG_PATH_VAR)
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
            .ok_or_else(|| LLMError::config(format!("{CONFIG_PATH_VAR} is not set")))?;
        Ok(Self {
            environment,
            config_root,
        })
    }
}
