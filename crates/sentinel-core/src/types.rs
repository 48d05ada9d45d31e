//! 公共类型（对外暴露）
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::SentinelError;
use crate::findings::{Finding, Severity, KIND_ANALYSIS_ERROR};
use crate::scoring::ThreatLevel;

/// 扫描目标类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    File,
    Url,
}

/// 数据外传的上下文（脚本权重高于网页标记）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExfiltrationContext {
    Script,
    Web,
}

/// 间谍软件行为画像
///
/// 只在单个目标的打分累积阶段被修改，生成 `ScanResult` 后即冻结。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpywareProfile {
    pub surveillance: bool,
    pub persistence: bool,
    pub stealth: bool,
    pub data_exfiltration: bool,
    pub credential_harvesting: bool,
    pub confidence_score: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exfiltration_context: Option<ExfiltrationContext>,
}

impl SpywareProfile {
    /// 为真的行为标志个数
    pub fn flag_count(&self) -> u32 {
        [self.surveillance, self.persistence, self.stealth, self.data_exfiltration, self.credential_harvesting]
            .iter()
            .filter(|&&b| b)
            .count() as u32
    }

    /// 按位或合并两个画像；置信度取较大者
    pub fn union(&self, other: &SpywareProfile) -> SpywareProfile {
        // 上下文优先取 script（权重更高）
        let exfiltration_context = match (self.exfiltration_context, other.exfiltration_context) {
            (Some(ExfiltrationContext::Script), _) | (_, Some(ExfiltrationContext::Script)) => Some(ExfiltrationContext::Script),
            (a, b) => a.or(b),
        };
        SpywareProfile {
            surveillance: self.surveillance || other.surveillance,
            persistence: self.persistence || other.persistence,
            stealth: self.stealth || other.stealth,
            data_exfiltration: self.data_exfiltration || other.data_exfiltration,
            credential_harvesting: self.credential_harvesting || other.credential_harvesting,
            confidence_score: self.confidence_score.max(other.confidence_score),
            exfiltration_context,
        }
    }
}

/// 同步后端扫描附带的详细信息
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendDetails {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub hashes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entropy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virus_total: Option<serde_json::Value>,
}

/// 单个目标的最终分析结果
///
/// `threat_score` 与 `threat_level` 只能一起设置（见 `set_score`），
/// 保证等级永远是分数的阶梯函数。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanResult {
    pub target: String,
    pub kind: TargetKind,
    pub size: u64,
    pub findings: Vec<Finding>,
    threat_score: u8,
    threat_level: ThreatLevel,
    pub spyware_profile: SpywareProfile,
    pub deep_scan_performed: bool,
    pub deep_scan_attempted: bool,
    pub backend_based: bool,
    pub malware_detected: bool,
    pub keylogger_detected: bool,
    pub extension_mismatch: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detected_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_header: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_details: Option<BackendDetails>,
}

impl ScanResult {
    /// 空白结果（safe / 0 分）
    pub fn empty(target: impl Into<String>, kind: TargetKind, size: u64) -> Self {
        Self {
            target: target.into(),
            kind,
            size,
            findings: Vec::new(),
            threat_score: 0,
            threat_level: ThreatLevel::Safe,
            spyware_profile: SpywareProfile::default(),
            deep_scan_performed: false,
            deep_scan_attempted: false,
            backend_based: false,
            malware_detected: false,
            keylogger_detected: false,
            extension_mismatch: false,
            detected_type: None,
            file_header: None,
            explanation: None,
            backend_details: None,
        }
    }

    /// 本地分析失败：仍然返回完整结果，失败原因作为一条低危 Finding
    pub fn from_local_error(target: impl Into<String>, kind: TargetKind, err: &SentinelError) -> Self {
        let mut result = Self::empty(target, kind, 0);
        result
            .findings
            .push(Finding::local(KIND_ANALYSIS_ERROR, Severity::Low, format!("Analysis error: {err}")));
        result
    }

    pub fn threat_score(&self) -> u8 {
        self.threat_score
    }

    pub fn threat_level(&self) -> ThreatLevel {
        self.threat_level
    }

    /// 设置分数（截断到 0..=100）并同步重算等级
    pub fn set_score(&mut self, score: u32) {
        let clamped = score.min(100) as u8;
        self.threat_score = clamped;
        self.threat_level = ThreatLevel::from_score(clamped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_count_counts_all_five_flags() {
        let p = SpywareProfile {
            surveillance: true,
            persistence: true,
            stealth: true,
            data_exfiltration: true,
            credential_harvesting: true,
            ..Default::default()
        };
        assert_eq!(p.flag_count(), 5);
        assert_eq!(SpywareProfile::default().flag_count(), 0);
    }

    #[test]
    fn union_ors_flags_and_prefers_script_context() {
        let a = SpywareProfile { stealth: true, confidence_score: 40, exfiltration_context: Some(ExfiltrationContext::Web), ..Default::default() };
        let b = SpywareProfile { surveillance: true, confidence_score: 70, exfiltration_context: Some(ExfiltrationContext::Script), ..Default::default() };
        let u = a.union(&b);
        assert!(u.stealth && u.surveillance);
        assert_eq!(u.confidence_score, 70);
        assert_eq!(u.exfiltration_context, Some(ExfiltrationContext::Script));
        assert_eq!(u, b.union(&a));
    }

    #[test]
    fn set_score_clamps_and_keeps_level_in_step() {
        let mut r = ScanResult::empty("a.bin", TargetKind::File, 1);
        r.set_score(250);
        assert_eq!(r.threat_score(), 100);
        assert_eq!(r.threat_level(), ThreatLevel::Critical);
        r.set_score(20);
        assert_eq!(r.threat_level(), ThreatLevel::Low);
    }

    #[test]
    fn serialized_level_always_matches_score() {
        let mut r = ScanResult::empty("a.bin", TargetKind::File, 1);
        for score in [0u32, 14, 15, 30, 59, 60, 80, 300] {
            r.set_score(score);
            let v = serde_json::to_value(&r).unwrap();
            let s = v["threat_score"].as_u64().unwrap() as u8;
            assert_eq!(v["threat_level"], ThreatLevel::from_score(s).as_str());
        }
    }

    #[test]
    fn local_error_becomes_single_low_finding() {
        let err = SentinelError::local("missing.exe", "No such file");
        let r = ScanResult::from_local_error("missing.exe", TargetKind::File, &err);
        assert_eq!(r.findings.len(), 1);
        assert_eq!(r.findings[0].severity, Severity::Low);
        assert_eq!(r.findings[0].kind, KIND_ANALYSIS_ERROR);
        assert_eq!(r.threat_level(), ThreatLevel::Safe);
    }
}
