//! 扫描选项与统计信息（模块）
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// 扫描模式
/// - Local：只跑本地启发式
/// - Backend：本地 + 同步后端扫描（一次请求）
/// - Deep：本地 + 深度扫描作业（提交后轮询）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    #[default]
    Local,
    Backend,
    Deep,
}

impl ScanMode {
    pub fn needs_remote(self) -> bool {
        !matches!(self, ScanMode::Local)
    }
}

impl std::str::FromStr for ScanMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(ScanMode::Local),
            "backend" => Ok(ScanMode::Backend),
            "deep" => Ok(ScanMode::Deep),
            _ => Err(format!("unknown scan mode: {s} (expected local, backend or deep)")),
        }
    }
}

/// 扫描选项
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanOptions {
    pub mode: ScanMode,
    /// 只输出分数不低于该值的结果
    pub min_score: u8,
    /// 最大文件大小（字节）；超过则跳过
    pub max_file_size: Option<u64>,
    /// 规则文件路径（TOML）；为空则使用内置规则
    pub rules_path: Option<PathBuf>,
    /// 本地模式线程数：None 表示自动（等于 CPU 核数）；Some(1) 走串行
    pub threads: Option<usize>,
    /// 远端模式下并发处理的目标数
    pub workers: usize,
    /// 远端分析服务地址
    pub backend_url: Option<String>,
    #[serde(with = "secs")]
    pub request_timeout: Duration,
    #[serde(with = "secs")]
    pub poll_interval: Duration,
    pub max_poll_attempts: u32,
    pub user_agent: Option<String>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            mode: ScanMode::Local,
            min_score: 0,
            max_file_size: None,
            rules_path: None,
            threads: None,
            workers: 4,
            backend_url: None,
            request_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(2),
            max_poll_attempts: 30,
            user_agent: Some(concat!("sentinel/", env!("CARGO_PKG_VERSION")).to_string()),
        }
    }
}

impl ScanOptions {
    /// 从 TOML 配置文件加载；缺省字段取默认值
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let txt = std::fs::read_to_string(path).with_context(|| format!("read config file {}", path.display()))?;
        Self::from_toml_str(&txt).with_context(|| format!("parse config file {}", path.display()))
    }

    pub fn from_toml_str(txt: &str) -> Result<Self> {
        Ok(toml::from_str(txt)?)
    }
}

// 配置文件中的时长以秒为单位（可带小数）
mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let v = f64::deserialize(d)?;
        if !v.is_finite() || v < 0.0 {
            return Err(serde::de::Error::custom(format!("invalid duration: {v}")));
        }
        Ok(Duration::from_secs_f64(v))
    }
}

/// 扫描统计信息（便于 CLI 打印）
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanStats {
    pub targets_scanned: usize,
    pub results_written: usize,
    /// 远端分析失败后降级为本地结果的次数
    pub fallbacks: usize,
    /// 因大小限制或无法读取而跳过的目标
    pub skipped: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let o = ScanOptions::default();
        assert_eq!(o.mode, ScanMode::Local);
        assert_eq!(o.poll_interval, Duration::from_secs(2));
        assert_eq!(o.max_poll_attempts, 30);
        assert_eq!(o.workers, 4);
    }

    #[test]
    fn partial_config_file_keeps_defaults() {
        let o = ScanOptions::from_toml_str(
            r#"
            mode = "deep"
            backend_url = "http://127.0.0.1:3000"
            poll_interval = 0.5
            "#,
        )
        .unwrap();
        assert_eq!(o.mode, ScanMode::Deep);
        assert_eq!(o.backend_url.as_deref(), Some("http://127.0.0.1:3000"));
        assert_eq!(o.poll_interval, Duration::from_millis(500));
        assert_eq!(o.max_poll_attempts, 30);
        assert_eq!(o.request_timeout, Duration::from_secs(10));
    }

    #[test]
    fn bad_config_values_are_rejected() {
        assert!(ScanOptions::from_toml_str("mode = \"turbo\"").is_err());
        assert!(ScanOptions::from_toml_str("poll_interval = -1.0").is_err());
    }

    #[test]
    fn scan_mode_parses() {
        assert_eq!("DEEP".parse::<ScanMode>().unwrap(), ScanMode::Deep);
        assert!("fast".parse::<ScanMode>().is_err());
        assert!(ScanMode::Backend.needs_remote());
        assert!(!ScanMode::Local.needs_remote());
    }
}
