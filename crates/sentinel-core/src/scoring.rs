//! 分类引擎：增量累积 → 有界分数 → 威胁等级
//!
//! 唯一的阈值表（降序）：critical ≥ 80，high ≥ 60，medium ≥ 30，low ≥ 15，否则 safe。
use serde::{Deserialize, Serialize};

use crate::findings::{Finding, Severity};
use crate::types::SpywareProfile;

pub const CRITICAL_THRESHOLD: u8 = 80;
pub const HIGH_THRESHOLD: u8 = 60;
pub const MEDIUM_THRESHOLD: u8 = 30;
pub const LOW_THRESHOLD: u8 = 15;

/// 每个为真的画像标志对置信度的加成
pub const FLAG_BONUS: u32 = 10;

/// 威胁等级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreatLevel {
    Safe,
    Low,
    Medium,
    High,
    Critical,
}

impl ThreatLevel {
    /// 分数 → 等级（单调阶梯函数）
    pub fn from_score(score: u8) -> Self {
        match score {
            s if s >= CRITICAL_THRESHOLD => ThreatLevel::Critical,
            s if s >= HIGH_THRESHOLD => ThreatLevel::High,
            s if s >= MEDIUM_THRESHOLD => ThreatLevel::Medium,
            s if s >= LOW_THRESHOLD => ThreatLevel::Low,
            _ => ThreatLevel::Safe,
        }
    }

    /// 该等级区间的下界分数
    pub fn floor_score(self) -> u8 {
        match self {
            ThreatLevel::Critical => CRITICAL_THRESHOLD,
            ThreatLevel::High => HIGH_THRESHOLD,
            ThreatLevel::Medium => MEDIUM_THRESHOLD,
            ThreatLevel::Low => LOW_THRESHOLD,
            ThreatLevel::Safe => 0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ThreatLevel::Safe => "safe",
            ThreatLevel::Low => "low",
            ThreatLevel::Medium => "medium",
            ThreatLevel::High => "high",
            ThreatLevel::Critical => "critical",
        }
    }
}

impl std::str::FromStr for ThreatLevel {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "safe" | "clean" => Ok(ThreatLevel::Safe),
            "low" => Ok(ThreatLevel::Low),
            "medium" => Ok(ThreatLevel::Medium),
            "high" => Ok(ThreatLevel::High),
            "critical" => Ok(ThreatLevel::Critical),
            _ => Err(format!("unknown threat level: {s}")),
        }
    }
}

impl std::fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 严重级别对应的固定增量
pub fn severity_increment(severity: Severity) -> u32 {
    match severity {
        Severity::Critical => 40,
        Severity::High => 25,
        Severity::Medium => 15,
        Severity::Low => 5,
    }
}

/// 一次分类的全部中间量
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub raw_score: u8,
    pub confidence_score: u8,
    pub final_score: u8,
    pub level: ThreatLevel,
}

/// 由原始分与画像计算分类
pub fn classify(raw_score: u8, profile: &SpywareProfile) -> Classification {
    let raw = raw_score.min(100);
    let confidence = (raw as u32 + FLAG_BONUS * profile.flag_count()).min(100) as u8;
    let final_score = raw.max(confidence);
    Classification { raw_score: raw, confidence_score: confidence, final_score, level: ThreatLevel::from_score(final_score) }
}

/// 单个目标的打分累积器
///
/// - `add`：记录 Finding 并累加给定增量
/// - `add_weighted`：按严重级别的固定增量累加
/// - `note`：只记录 Finding（诊断信息，不计分）
#[derive(Debug, Default)]
pub struct ScoreCard {
    total: u32,
    floor: u32,
    findings: Vec<Finding>,
    profile: SpywareProfile,
}

impl ScoreCard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, finding: Finding, increment: u32) {
        self.total = self.total.saturating_add(increment);
        self.findings.push(finding);
    }

    pub fn add_weighted(&mut self, finding: Finding) {
        let inc = severity_increment(finding.severity);
        self.add(finding, inc);
    }

    pub fn note(&mut self, finding: Finding) {
        self.findings.push(finding);
    }

    /// 原始分下限（例如短链接至少为 medium）
    pub fn raise_floor(&mut self, floor: u32) {
        self.floor = self.floor.max(floor);
    }

    pub fn profile_mut(&mut self) -> &mut SpywareProfile {
        &mut self.profile
    }

    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    pub fn raw_score(&self) -> u8 {
        self.total.max(self.floor).min(100) as u8
    }

    pub fn classify(&self) -> Classification {
        classify(self.raw_score(), &self.profile)
    }

    /// 结束累积：返回命中列表、冻结后的画像（含置信度）与分类
    pub fn finish(self) -> (Vec<Finding>, SpywareProfile, Classification) {
        let c = self.classify();
        let mut profile = self.profile;
        profile.confidence_score = c.confidence_score;
        (self.findings, profile, c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::findings::Finding;

    fn critical() -> Finding {
        Finding::local("test", Severity::Critical, "critical indicator")
    }

    #[test]
    fn thresholds_map_to_levels() {
        assert_eq!(ThreatLevel::from_score(0), ThreatLevel::Safe);
        assert_eq!(ThreatLevel::from_score(14), ThreatLevel::Safe);
        assert_eq!(ThreatLevel::from_score(15), ThreatLevel::Low);
        assert_eq!(ThreatLevel::from_score(29), ThreatLevel::Low);
        assert_eq!(ThreatLevel::from_score(30), ThreatLevel::Medium);
        assert_eq!(ThreatLevel::from_score(59), ThreatLevel::Medium);
        assert_eq!(ThreatLevel::from_score(60), ThreatLevel::High);
        assert_eq!(ThreatLevel::from_score(79), ThreatLevel::High);
        assert_eq!(ThreatLevel::from_score(80), ThreatLevel::Critical);
        assert_eq!(ThreatLevel::from_score(100), ThreatLevel::Critical);
    }

    #[test]
    fn level_is_monotonic_in_score() {
        let mut prev = ThreatLevel::Safe;
        for s in 0..=100u8 {
            let lvl = ThreatLevel::from_score(s);
            assert!(lvl >= prev, "level dropped at score {s}");
            prev = lvl;
        }
    }

    #[test]
    fn floor_score_round_trips_through_from_score() {
        for lvl in [ThreatLevel::Safe, ThreatLevel::Low, ThreatLevel::Medium, ThreatLevel::High, ThreatLevel::Critical] {
            assert_eq!(ThreatLevel::from_score(lvl.floor_score()), lvl);
        }
    }

    #[test]
    fn severity_increments() {
        assert_eq!(severity_increment(Severity::Critical), 40);
        assert_eq!(severity_increment(Severity::High), 25);
        assert_eq!(severity_increment(Severity::Medium), 15);
        assert_eq!(severity_increment(Severity::Low), 5);
    }

    #[test]
    fn raw_score_is_clamped() {
        let mut card = ScoreCard::new();
        for _ in 0..10 {
            card.add_weighted(critical());
        }
        assert_eq!(card.raw_score(), 100);
        let c = card.classify();
        assert!(c.final_score <= 100 && c.confidence_score <= 100);
    }

    #[test]
    fn adding_critical_strictly_increases_raw_until_saturated() {
        let mut card = ScoreCard::new();
        let mut prev = card.raw_score();
        for _ in 0..5 {
            card.add_weighted(critical());
            let now = card.raw_score();
            if prev < 100 {
                assert!(now > prev);
            } else {
                assert_eq!(now, 100);
            }
            prev = now;
        }
    }

    #[test]
    fn confidence_adds_ten_per_flag() {
        let profile = SpywareProfile { surveillance: true, credential_harvesting: true, ..Default::default() };
        let c = classify(40, &profile);
        assert_eq!(c.confidence_score, 60);
        assert_eq!(c.final_score, 60);
        assert_eq!(c.level, ThreatLevel::High);
    }

    #[test]
    fn notes_do_not_score() {
        let mut card = ScoreCard::new();
        card.note(Finding::local("analysis_error", Severity::Low, "unreadable"));
        assert_eq!(card.raw_score(), 0);
        assert_eq!(card.findings().len(), 1);
    }

    #[test]
    fn floor_lifts_raw_score() {
        let mut card = ScoreCard::new();
        card.add(Finding::local("x", Severity::Medium, "x"), 25);
        card.raise_floor(30);
        assert_eq!(card.raw_score(), 30);
    }

    #[test]
    fn finish_freezes_confidence_into_profile() {
        let mut card = ScoreCard::new();
        card.profile_mut().stealth = true;
        card.add(Finding::local("rlo_spoofing", Severity::Critical, "rlo"), 50);
        let (findings, profile, c) = card.finish();
        assert_eq!(findings.len(), 1);
        assert_eq!(profile.confidence_score, 60);
        assert_eq!(c.final_score, 60);
    }

    #[test]
    fn threat_level_parses_case_insensitively() {
        assert_eq!("CRITICAL".parse::<ThreatLevel>().unwrap(), ThreatLevel::Critical);
        assert!("unknown".parse::<ThreatLevel>().is_err());
    }
}
