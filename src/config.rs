//! 索引配置
//!
//! `DimIndex` 构造时复制一份 `IndexConfig`，之后不可修改（没有 setter）。

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};

/// 每维默认位宽
pub const DEFAULT_PRECISION: u32 = 64;

/// 默认 fanout 阈值：粒度选择会不断放大格子，直到查询所需 range scan 数少于该值
pub const DEFAULT_FANOUT_THRESHOLD: u64 = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexConfig {
    /// key 前缀：主集合在 `<prefix>:idx`，reverse map 在 `<prefix>:map`
    pub prefix: String,

    /// 维数 D
    pub dims: usize,

    /// 每个坐标的位数，1..=64
    #[serde(default = "default_precision")]
    pub precision: u32,

    /// 维护 id -> 当前 key 的映射；`update` 与 `unindex_by_id` 依赖它
    #[serde(default)]
    pub reverse_map: bool,

    #[serde(default = "default_fanout_threshold")]
    pub fanout_threshold: u64,
}

/// `redim` 服务进程读取的配置
///
/// ```toml
/// [index]
/// prefix = "people-by-salary"
/// dims = 2
/// reverse_map = true
///
/// [server]
/// port = 6060
/// snapshot_interval_secs = 30
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub index: IndexConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    /// 快照文件；`None` 表示放在平台 data dir 下
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,

    #[serde(default = "default_snapshot_interval")]
    pub snapshot_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            snapshot_path: None,
            snapshot_interval_secs: default_snapshot_interval(),
        }
    }
}

impl ServiceConfig {
    pub fn from_toml_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let cfg: Self = toml::from_str(&text)?;
        cfg.index.validate()?;
        Ok(cfg)
    }

    /// 显式配置的快照路径，否则 `<data_dir>/redim/<prefix>.snap`
    pub fn snapshot_path(&self) -> PathBuf {
        match &self.server.snapshot_path {
            Some(path) => path.clone(),
            None => default_snapshot_path(
                &dirs::data_dir().unwrap_or_else(|| PathBuf::from(".")),
                &self.index.prefix,
            ),
        }
    }
}

/// `<base>/redim/<prefix>.snap`。prefix 里除 `[A-Za-z0-9_-]` 外的字符都替换成 `_`，
/// 保证文件落在 `<base>/redim` 目录内。
pub fn default_snapshot_path(base: &Path, prefix: &str) -> PathBuf {
    let file: String = prefix
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    base.join("redim").join(format!("{file}.snap"))
}

fn default_port() -> u16 {
    6060
}

fn default_snapshot_interval() -> u64 {
    60
}

fn default_precision() -> u32 {
    DEFAULT_PRECISION
}

fn default_fanout_threshold() -> u64 {
    DEFAULT_FANOUT_THRESHOLD
}

impl IndexConfig {
    /// 默认精度、无 reverse map、默认 fanout 阈值
    pub fn new(prefix: impl Into<String>, dims: usize) -> Self {
        Self {
            prefix: prefix.into(),
            dims,
            precision: DEFAULT_PRECISION,
            reverse_map: false,
            fanout_threshold: DEFAULT_FANOUT_THRESHOLD,
        }
    }

    pub fn with_precision(mut self, precision: u32) -> Self {
        self.precision = precision;
        self
    }

    pub fn with_reverse_map(mut self, enabled: bool) -> Self {
        self.reverse_map = enabled;
        self
    }

    pub fn with_fanout_threshold(mut self, threshold: u64) -> Self {
        self.fanout_threshold = threshold;
        self
    }

    pub fn index_namespace(&self) -> String {
        format!("{}:idx", self.prefix)
    }

    pub fn map_namespace(&self) -> Option<String> {
        self.reverse_map.then(|| format!("{}:map", self.prefix))
    }

    pub fn validate(&self) -> Result<()> {
        if self.prefix.is_empty() {
            return Err(IndexError::Configuration("key prefix must not be empty".into()));
        }
        if self.dims == 0 {
            return Err(IndexError::Configuration("index needs at least one dimension".into()));
        }
        if !(1..=64).contains(&self.precision) {
            return Err(IndexError::Configuration(format!(
                "precision must be within 1..=64 bits, got {}",
                self.precision
            )));
        }
        // 阈值为 1 时任何非空覆盖都无法满足
        if self.fanout_threshold < 2 {
            return Err(IndexError::Configuration(format!(
                "fanout threshold must be at least 2, got {}",
                self.fanout_threshold
            )));
        }
        Ok(())
    }
}
