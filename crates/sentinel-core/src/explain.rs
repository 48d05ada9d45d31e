//! 本地启发式说明文字
//!
//! 说明由规则书中的文本表拼出：每条命中一句解释，画像标志各一句，最后是按等级的风险结论。
use std::collections::HashMap;

use crate::findings::{KIND_ANALYSIS_ERROR, KIND_BACKEND_FALLBACK, KIND_DEEP_SCAN_FALLBACK};
use crate::rules::ExplanationSection;
use crate::scoring::ThreatLevel;
use crate::types::{ScanResult, TargetKind};

#[derive(Debug, Default)]
pub struct Explainer {
    indicators: HashMap<String, String>,
    url_fallback: Option<String>,
    profile: HashMap<String, String>,
    risk: HashMap<String, String>,
    clean: Option<String>,
    disclaimer: Option<String>,
}

impl Explainer {
    pub(crate) fn from_section(section: &ExplanationSection) -> Self {
        let lower = |m: &HashMap<String, String>| -> HashMap<String, String> {
            m.iter().map(|(k, v)| (k.to_ascii_lowercase(), v.clone())).collect()
        };
        Self {
            indicators: section.indicators.clone(),
            url_fallback: section.url_fallback.clone(),
            profile: lower(&section.profile),
            risk: lower(&section.risk),
            clean: section.clean.clone(),
            disclaimer: section.disclaimer.clone(),
        }
    }

    fn indicator_text(&self, kind: TargetKind, description: &str) -> Option<&str> {
        match self.indicators.get(description) {
            Some(t) => Some(t.as_str()),
            None if kind == TargetKind::Url => self.url_fallback.as_deref(),
            None => None,
        }
    }

    /// 由分析结果生成说明；诊断类 Finding 不参与
    pub fn explain(&self, result: &ScanResult) -> String {
        let indicators: Vec<_> = result
            .findings
            .iter()
            .filter(|f| !matches!(f.kind.as_str(), KIND_ANALYSIS_ERROR | KIND_DEEP_SCAN_FALLBACK | KIND_BACKEND_FALLBACK))
            .collect();

        let n = indicators.len();
        let mut text = format!(
            "Analyzed \"{}\" and identified {} indicator{}.",
            result.target,
            n,
            if n == 1 { "" } else { "s" }
        );
        for f in &indicators {
            match self.indicator_text(result.kind, &f.description) {
                Some(why) => text.push_str(&format!("\n- {}: {}", f.description, why)),
                None => text.push_str(&format!("\n- {}", f.description)),
            }
        }

        let p = &result.spyware_profile;
        let mut behaviour: Vec<&str> = Vec::new();
        let level = result.threat_level();
        if matches!(level, ThreatLevel::High | ThreatLevel::Critical) && result.kind == TargetKind::File {
            behaviour.extend(self.profile_text("coordinated"));
        }
        for (on, key) in [
            (p.surveillance, "surveillance"),
            (p.credential_harvesting, "credential_harvesting"),
            (p.persistence, "persistence"),
            (p.data_exfiltration, "data_exfiltration"),
            (p.stealth, "stealth"),
            (result.keylogger_detected, "keylogger"),
        ] {
            if on {
                behaviour.extend(self.profile_text(key));
            }
        }
        if behaviour.is_empty() && n == 0 {
            behaviour.extend(self.clean.as_deref());
        }
        if !behaviour.is_empty() {
            text.push_str("\n\n");
            text.push_str(&behaviour.join(" "));
        }

        if let Some(risk) = self.risk.get(level.as_str()) {
            text.push_str("\n\n");
            text.push_str(risk);
        }
        if let Some(d) = &self.disclaimer {
            text.push('\n');
            text.push_str(d);
        }
        text
    }

    fn profile_text(&self, key: &str) -> Option<&str> {
        self.profile.get(key).map(String::as_str)
    }
}
