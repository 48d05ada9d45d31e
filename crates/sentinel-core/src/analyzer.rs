//! 本地分析：串联各信号采集器并分类
use tracing::debug;

use crate::behavior::{has_rtlo, KEYLOGGER_INCREMENT, RLO_INCREMENT};
use crate::filetype::MISMATCH_INCREMENT;
use crate::findings::{
    Finding, Severity, KIND_DATA_EXFILTRATION, KIND_EXTENSION_MISMATCH, KIND_KEYLOGGER, KIND_RLO_SPOOFING,
};
use crate::rules::{RuleBook, RuleTable};
use crate::scoring::ScoreCard;
use crate::target::ScanTarget;
use crate::types::{ExfiltrationContext, ScanResult, TargetKind};

/// 对单个目标执行全部本地采集器；从不失败
pub fn analyze_local(target: &ScanTarget, rules: &RuleBook) -> ScanResult {
    let mut result = match target.kind() {
        TargetKind::File => analyze_file(target, rules),
        TargetKind::Url => analyze_url(target, rules),
    };
    result.explanation = Some(rules.explanation.explain(&result));
    debug!(identity = target.identity(), score = result.threat_score(), level = %result.threat_level(), "local analysis done");
    result
}

fn analyze_file(target: &ScanTarget, rules: &RuleBook) -> ScanResult {
    let mut card = ScoreCard::new();
    let header_hex = target.header_hex();

    // 1) 魔数识别 + 扩展名不一致
    let detection = rules.filetypes.detect(&header_hex);
    let mismatch = rules.filetypes.check_mismatch(detection, target.extension());
    if let Some(m) = &mismatch {
        card.profile_mut().stealth = true;
        card.add(Finding::local(KIND_EXTENSION_MISMATCH, Severity::High, m.description()), MISMATCH_INCREMENT);
    }

    // 2) RTLO 伪装（与内容无关）
    if has_rtlo(target.name()) {
        card.profile_mut().stealth = true;
        card.add(
            Finding::local(KIND_RLO_SPOOFING, Severity::Critical, "Right-to-Left Override character detected, potential extension spoofing"),
            RLO_INCREMENT,
        );
    }

    // 3) 静态特征
    let hits = rules.signatures.scan(target.sample());
    let malware_detected = hits.iter().any(|h| h.table == RuleTable::Malware);
    if malware_detected {
        card.profile_mut().persistence = true;
    }
    for h in hits {
        card.add_weighted(h.finding);
    }

    // 4) 键盘记录
    let keylogger_detected = rules.behavior.detect_keylogger(target.sample(), target.name());
    if keylogger_detected {
        let p = card.profile_mut();
        p.surveillance = true;
        p.credential_harvesting = true;
        card.add(Finding::local(KIND_KEYLOGGER, Severity::Critical, "Keylogger behavior patterns detected"), KEYLOGGER_INCREMENT);
    }

    // 5) 数据外传：仅脚本/标记内容
    let claimed = target.extension().map(|e| rules.filetypes.normalize_extension(e));
    let mut candidates: Vec<&str> = Vec::with_capacity(2);
    if let Some(c) = claimed.as_deref() { candidates.push(c); }
    // 弱签名只是文本前缀，不足以认定为脚本
    if !detection.is_unknown() && !detection.weak { candidates.push(detection.label); }
    let context = rules.behavior.content_context(&candidates);
    if let Some((ctx, inc)) = rules.behavior.detect_exfiltration(target.sample(), context) {
        let p = card.profile_mut();
        p.data_exfiltration = true;
        p.exfiltration_context = Some(ctx);
        let (sev, desc) = match ctx {
            ExfiltrationContext::Script => (Severity::Medium, "Network activity in script content, possible data exfiltration"),
            ExfiltrationContext::Web => (Severity::Low, "Network activity in web markup"),
        };
        card.add(Finding::local(KIND_DATA_EXFILTRATION, sev, desc), inc);
    }

    let mut result = from_card(target, card);
    result.malware_detected = malware_detected;
    result.keylogger_detected = keylogger_detected;
    result.extension_mismatch = mismatch.is_some();
    result.detected_type = Some(detection.label.to_string());
    result.file_header = Some(header_hex);
    result
}

fn analyze_url(target: &ScanTarget, rules: &RuleBook) -> ScanResult {
    let mut card = ScoreCard::new();
    if let Some(parsed) = target.url() {
        rules.url.score(target.name(), &parsed, &mut card);
    }
    from_card(target, card)
}

fn from_card(target: &ScanTarget, card: ScoreCard) -> ScanResult {
    let (findings, profile, classification) = card.finish();
    let mut result = ScanResult::empty(target.identity(), target.kind(), target.size());
    result.findings = findings;
    result.spyware_profile = profile;
    result.set_score(classification.final_score as u32);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::findings::{KIND_MALWARE_SIGNATURE, KIND_URL_HEURISTIC};
    use crate::scoring::ThreatLevel;

    fn rules() -> RuleBook {
        RuleBook::builtin().unwrap()
    }

    fn count(r: &ScanResult, kind: &str) -> usize {
        r.findings.iter().filter(|f| f.kind == kind).count()
    }

    #[test]
    fn clean_pdf_is_safe() {
        let t = ScanTarget::from_bytes("invoice.pdf", b"%PDF-1.4\n1 0 obj << /Type /Catalog >> endobj");
        let r = analyze_local(&t, &rules());
        assert_eq!(count(&r, KIND_EXTENSION_MISMATCH), 0);
        assert!(r.findings.is_empty());
        assert_eq!(r.threat_score(), 0);
        assert_eq!(r.threat_level(), ThreatLevel::Safe);
        assert_eq!(r.detected_type.as_deref(), Some("PDF"));
        assert!(!r.extension_mismatch);
    }

    #[test]
    fn executable_named_pdf_gets_mismatch() {
        let t = ScanTarget::from_bytes("invoice.pdf", b"MZ\x90\x00\x03\x00\x00\x00");
        let r = analyze_local(&t, &rules());
        assert_eq!(count(&r, KIND_EXTENSION_MISMATCH), 1);
        let f = r.findings.iter().find(|f| f.kind == KIND_EXTENSION_MISMATCH).unwrap();
        assert_eq!(f.severity, Severity::High);
        assert!(r.extension_mismatch);
        assert!(r.spyware_profile.stealth);
        // raw 30 + stealth 10
        assert_eq!(r.threat_score(), 40);
        assert_eq!(r.spyware_profile.confidence_score, 40);
    }

    #[test]
    fn rtlo_name_is_critical_regardless_of_content() {
        for content in [&b""[..], b"%PDF-1.4", b"just text"] {
            let t = ScanTarget::from_bytes("report\u{202E}fdp.txt", content);
            let r = analyze_local(&t, &rules());
            assert_eq!(count(&r, KIND_RLO_SPOOFING), 1);
            let f = r.findings.iter().find(|f| f.kind == KIND_RLO_SPOOFING).unwrap();
            assert_eq!(f.severity, Severity::Critical);
            assert!(r.spyware_profile.stealth);
            assert!(r.threat_score() >= 50);
        }
    }

    #[test]
    fn rtlo_alone_scores_fifty_plus_stealth_bonus() {
        let t = ScanTarget::from_bytes("doc\u{202E}txt.exe", b"");
        let r = analyze_local(&t, &rules());
        assert_eq!(r.findings.len(), 1);
        assert_eq!(r.threat_score(), 60);
        assert_eq!(r.threat_level(), ThreatLevel::High);
    }

    #[test]
    fn keylogger_content_sets_profile_and_level() {
        let t = ScanTarget::from_bytes("helper.bin", b"while(1){ GetAsyncKeyState(i); }");
        let r = analyze_local(&t, &rules());
        assert!(r.keylogger_detected);
        assert!(r.spyware_profile.surveillance);
        assert!(r.spyware_profile.credential_harvesting);
        assert_eq!(count(&r, KIND_KEYLOGGER), 1);
        let f = r.findings.iter().find(|f| f.kind == KIND_KEYLOGGER).unwrap();
        assert_eq!(f.severity, Severity::Critical);
        assert!(r.threat_score() >= 60);
        assert!(matches!(r.threat_level(), ThreatLevel::High | ThreatLevel::Critical));
    }

    #[test]
    fn malware_signature_sets_persistence() {
        let t = ScanTarget::from_bytes("run.bin", b"start cmd.exe /c whoami");
        let r = analyze_local(&t, &rules());
        assert!(r.malware_detected);
        assert!(r.spyware_profile.persistence);
        assert_eq!(count(&r, KIND_MALWARE_SIGNATURE), 1);
        // high 25 + persistence 10
        assert_eq!(r.threat_score(), 35);
        assert_eq!(r.threat_level(), ThreatLevel::Medium);
    }

    #[test]
    fn exfiltration_weighted_by_context() {
        let script = ScanTarget::from_bytes("beacon.js", b"var s = new WebSocket(u);");
        let r = analyze_local(&script, &rules());
        assert_eq!(r.spyware_profile.exfiltration_context, Some(ExfiltrationContext::Script));
        assert_eq!(count(&r, KIND_DATA_EXFILTRATION), 1);

        let page = ScanTarget::from_bytes("page.html", b"<html><a href=\"https://example.com\">x</a></html>");
        let r = analyze_local(&page, &rules());
        assert_eq!(r.spyware_profile.exfiltration_context, Some(ExfiltrationContext::Web));
        // web 10 + exfil flag 10
        assert_eq!(r.threat_score(), 20);

        let binary = ScanTarget::from_bytes("image.png", b"\x89PNG\r\n\x1a\nhttp://example.com");
        let r = analyze_local(&binary, &rules());
        assert!(!r.spyware_profile.data_exfiltration);
    }

    #[test]
    fn comment_prefixed_text_is_not_treated_as_script() {
        let notes = ScanTarget::from_bytes("notes.txt", b"// todo: upload the report over http tomorrow");
        let r = analyze_local(&notes, &rules());
        assert_eq!(count(&r, KIND_DATA_EXFILTRATION), 0);
        assert!(!r.spyware_profile.data_exfiltration);
        assert_eq!(r.spyware_profile.exfiltration_context, None);

        // 声明的扩展名仍然决定上下文
        let script = ScanTarget::from_bytes("sync.js", b"// upload over http");
        let r = analyze_local(&script, &rules());
        assert_eq!(r.spyware_profile.exfiltration_context, Some(ExfiltrationContext::Script));
    }

    #[test]
    fn score_is_always_bounded() {
        let mut nasty = Vec::new();
        nasty.extend_from_slice(b"MZ keylogger trojan ransomware eval( exec( system( cmd.exe powershell.exe ");
        nasty.extend_from_slice(b"GetAsyncKeyState password steal encrypt file http post socket");
        let t = ScanTarget::from_bytes("kl\u{202E}gpj.js", &nasty);
        let r = analyze_local(&t, &rules());
        assert_eq!(r.threat_score(), 100);
        assert_eq!(r.threat_level(), ThreatLevel::Critical);
        assert!(r.spyware_profile.confidence_score <= 100);
    }

    #[test]
    fn url_target_uses_url_heuristics_only() {
        let t = ScanTarget::from_url("http://192.168.0.1/login").unwrap();
        let r = analyze_local(&t, &rules());
        assert_eq!(r.kind, TargetKind::Url);
        assert!(r.findings.iter().all(|f| f.kind == KIND_URL_HEURISTIC));
        // ip 30 + keyword 20 + http 15
        assert_eq!(r.threat_score(), 65);
        assert_eq!(r.threat_level(), ThreatLevel::High);
        assert!(r.detected_type.is_none());
    }
}
