//! 引擎错误类型
//!
//! 约定：`Network` / `Timeout` 只在编排器内部流转，最终都会被降级为本地分析结果；
//! `LocalAnalysis` 会被转换成一条低危 Finding。对外 API 只返回完整的 `ScanResult`。
use thiserror::Error;

use crate::job::JobStatus;

#[derive(Error, Debug)]
pub enum SentinelError {
    /// 提交/轮询的传输失败、非 2xx 响应或响应体格式不符
    #[error("network error: {0}")]
    Network(String),

    /// 轮询次数耗尽仍未得到终态
    #[error("deep scan timed out after {attempts} polls")]
    Timeout { attempts: u32 },

    /// 目标不可读、已损坏或 URL 无法解析
    #[error("local analysis failed for '{target}': {reason}")]
    LocalAnalysis { target: String, reason: String },

    #[error("invalid job transition: {from:?} -> {to:?}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("invalid pattern in rule '{id}': {source}")]
    InvalidPattern {
        id: String,
        #[source]
        source: regex::Error,
    },

    #[error("rule book error: {0}")]
    Rules(String),
}

impl SentinelError {
    pub(crate) fn local(target: impl Into<String>, reason: impl ToString) -> Self {
        SentinelError::LocalAnalysis { target: target.into(), reason: reason.to_string() }
    }
}

impl From<reqwest::Error> for SentinelError {
    fn from(e: reqwest::Error) -> Self {
        SentinelError::Network(e.to_string())
    }
}
