//! 命中项（Finding）与严重级别
use serde::{Deserialize, Serialize};

/// 严重级别（由低到高，可比较）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// 宽松解析远端返回的级别字符串；无法识别时返回 None
    pub(crate) fn parse_loose(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "info" | "informational" | "low" => Some(Severity::Low),
            "medium" | "moderate" | "warning" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            "critical" | "severe" => Some(Severity::Critical),
            _ => None,
        }
    }
}

/// 命中来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingSource {
    Local,
    Backend,
    Sandbox,
}

/// 单条检测结论（不可变值）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    #[serde(rename = "type")]
    pub kind: String,
    pub severity: Severity,
    pub description: String,
    pub source: FindingSource,
}

impl Finding {
    pub fn new(kind: impl Into<String>, severity: Severity, description: impl Into<String>, source: FindingSource) -> Self {
        Self { kind: kind.into(), severity, description: description.into(), source }
    }

    /// 本地采集器产生的命中
    pub fn local(kind: impl Into<String>, severity: Severity, description: impl Into<String>) -> Self {
        Self::new(kind, severity, description, FindingSource::Local)
    }
}

// 本地采集器使用的 Finding 类型名
pub const KIND_MALWARE_SIGNATURE: &str = "malware_signature";
pub const KIND_SUSPICIOUS_PATTERN: &str = "suspicious_pattern";
pub const KIND_EXTENSION_MISMATCH: &str = "extension_mismatch";
pub const KIND_RLO_SPOOFING: &str = "rlo_spoofing";
pub const KIND_KEYLOGGER: &str = "keylogger";
pub const KIND_DATA_EXFILTRATION: &str = "data_exfiltration";
pub const KIND_ANALYSIS_ERROR: &str = "analysis_error";
pub const KIND_DEEP_SCAN_FALLBACK: &str = "deep_scan_fallback";
pub const KIND_BACKEND_FALLBACK: &str = "backend_scan_fallback";
pub const KIND_BACKEND_INDICATOR: &str = "backend_indicator";
pub const KIND_URL_HEURISTIC: &str = "url_heuristic";
