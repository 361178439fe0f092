use anyhow::{anyhow, Context, Result};
use config::{Config, Environment, File, FileFormat};
use std::path::{Path, PathBuf};

use crate::AuditConfig;

/// 环境变量前缀，例如 `VIGIL__RUN__WORKER_POOL_SIZE=4`
const ENV_PREFIX: &str = "VIGIL";
const ENV_SEPARATOR: &str = "__";

/// 配置加载器
pub struct ConfigLoader {
    config_path: PathBuf,
    use_env: bool,
}

impl ConfigLoader {
    /// 创建配置加载器
    pub fn new<P: AsRef<Path>>(config_path: P) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            use_env: true,
        }
    }

    /// 不读取环境变量覆盖
    pub fn without_env(mut self) -> Self {
        self.use_env = false;
        self
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// 加载并校验配置
    ///
    /// 配置文件不存在时使用默认配置，环境变量覆盖仍然生效。
    pub fn load(&self) -> Result<AuditConfig> {
        let mut builder = Config::builder();

        if self.config_path.exists() {
            builder = builder.add_source(File::new(
                self.config_path
                    .to_str()
                    .ok_or_else(|| anyhow!("Invalid config path"))?,
                FileFormat::Toml,
            ));
        }

        if self.use_env {
            builder = builder.add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("run.regions"),
            );
        }

        let config: AuditConfig = builder
            .build()
            .and_then(|c| c.try_deserialize::<AuditConfig>())
            .with_context(|| format!("loading {}", self.config_path.display()))?;

        config.validate()?;
        Ok(config)
    }
}
