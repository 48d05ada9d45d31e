//! 本地结果与远端结果的合并
use crate::types::ScanResult;

/// 合并本地与（可选的）远端结果
///
/// 分数取最大值并重算等级，画像按位或，命中列表本地在前。
/// 交换两侧参数时，分数与等级保持一致。
pub fn merge_results(local: ScanResult, remote: Option<ScanResult>) -> ScanResult {
    match remote {
        None => local,
        Some(remote) => {
            // 说明文字以远端为准
            let explanation = remote.explanation.clone();
            let mut merged = merge_pair(local, remote);
            if explanation.is_some() {
                merged.explanation = explanation;
            }
            merged
        }
    }
}

fn merge_pair(primary: ScanResult, secondary: ScanResult) -> ScanResult {
    let score = primary.threat_score().max(secondary.threat_score());
    let mut out = primary;

    out.findings.extend(secondary.findings);
    out.spyware_profile = out.spyware_profile.union(&secondary.spyware_profile);
    out.set_score(score as u32);

    out.deep_scan_performed |= secondary.deep_scan_performed;
    out.deep_scan_attempted |= secondary.deep_scan_attempted || out.deep_scan_performed;
    out.backend_based |= secondary.backend_based;
    out.malware_detected |= secondary.malware_detected;
    out.keylogger_detected |= secondary.keylogger_detected;
    out.extension_mismatch |= secondary.extension_mismatch;

    if out.size == 0 { out.size = secondary.size; }
    out.detected_type = out.detected_type.or(secondary.detected_type);
    out.file_header = out.file_header.or(secondary.file_header);
    out.explanation = out.explanation.or(secondary.explanation);
    out.backend_details = out.backend_details.or(secondary.backend_details);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::findings::{Finding, FindingSource, Severity};
    use crate::scoring::ThreatLevel;
    use crate::types::{SpywareProfile, TargetKind};

    fn local(score: u32) -> ScanResult {
        let mut r = ScanResult::empty("a.exe", TargetKind::File, 10);
        r.findings.push(Finding::local("rlo_spoofing", Severity::Critical, "rlo"));
        r.spyware_profile = SpywareProfile { stealth: true, confidence_score: 60, ..Default::default() };
        r.detected_type = Some("EXE".into());
        r.set_score(score);
        r
    }

    fn remote(score: u32) -> ScanResult {
        let mut r = ScanResult::empty("a.exe", TargetKind::File, 0);
        r.findings.push(Finding::new("yara", Severity::High, "YARA hit", FindingSource::Backend));
        r.findings.push(Finding::new("sandbox", Severity::Medium, "dropped file", FindingSource::Sandbox));
        r.spyware_profile = SpywareProfile { surveillance: true, confidence_score: 90, ..Default::default() };
        r.deep_scan_performed = true;
        r.explanation = Some("remote says bad".into());
        r.set_score(score);
        r
    }

    #[test]
    fn no_remote_returns_local_unchanged() {
        let l = local(60);
        assert_eq!(merge_results(l.clone(), None), l);
    }

    #[test]
    fn score_is_max_and_level_recomputed() {
        let m = merge_results(local(60), Some(remote(85)));
        assert_eq!(m.threat_score(), 85);
        assert_eq!(m.threat_level(), ThreatLevel::Critical);
        let m = merge_results(local(60), Some(remote(20)));
        assert_eq!(m.threat_score(), 60);
        assert_eq!(m.threat_level(), ThreatLevel::High);
    }

    #[test]
    fn findings_keep_order_and_source() {
        let m = merge_results(local(60), Some(remote(85)));
        let sources: Vec<_> = m.findings.iter().map(|f| f.source).collect();
        assert_eq!(sources, vec![FindingSource::Local, FindingSource::Backend, FindingSource::Sandbox]);
    }

    #[test]
    fn profiles_are_or_merged() {
        let m = merge_results(local(60), Some(remote(85)));
        assert!(m.spyware_profile.stealth && m.spyware_profile.surveillance);
        assert_eq!(m.spyware_profile.confidence_score, 90);
        assert!(m.deep_scan_performed && m.deep_scan_attempted);
        assert_eq!(m.detected_type.as_deref(), Some("EXE"));
        assert_eq!(m.explanation.as_deref(), Some("remote says bad"));
        assert_eq!(m.size, 10);
    }

    #[test]
    fn remote_explanation_replaces_local_one() {
        let mut l = local(60);
        l.explanation = Some("local heuristics".into());
        let m = merge_results(l.clone(), Some(remote(85)));
        assert_eq!(m.explanation.as_deref(), Some("remote says bad"));

        let mut quiet = remote(85);
        quiet.explanation = None;
        let m = merge_results(l, Some(quiet));
        assert_eq!(m.explanation.as_deref(), Some("local heuristics"));
    }

    #[test]
    fn merge_is_commutative_on_score_and_level() {
        for (a, b) in [(0, 0), (10, 95), (60, 59), (100, 30), (14, 15)] {
            let ab = merge_results(local(a), Some(remote(b)));
            let ba = merge_results(remote(b), Some(local(a)));
            assert_eq!(ab.threat_score(), ba.threat_score());
            assert_eq!(ab.threat_level(), ba.threat_level());
            assert_eq!(ab.spyware_profile, ba.spyware_profile);
        }
    }
}
