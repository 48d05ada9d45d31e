//! URL 结构启发式
//!
//! 这些信号只是启发式，不构成恶意的证明。关键词表都是大小写不敏感的子串匹配，
//! 用 Aho-Corasick 一次扫描完成。
use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};

use crate::error::SentinelError;
use crate::findings::{Finding, Severity, KIND_URL_HEURISTIC};
use crate::rules::UrlSection;
use crate::scoring::{ScoreCard, MEDIUM_THRESHOLD};

pub const IP_HOST_INCREMENT: u32 = 30;
pub const PHISHING_KEYWORD_INCREMENT: u32 = 20;
pub const SHORTENER_INCREMENT: u32 = 25;
pub const NO_HTTPS_INCREMENT: u32 = 15;
pub const HIGH_RISK_TLD_INCREMENT: u32 = 25;
pub const BRAND_COMBO_INCREMENT: u32 = 15;
pub const DEEP_PATH_INCREMENT: u32 = 10;
pub const SENSITIVE_QUERY_INCREMENT: u32 = 20;
pub const BRAND_SUBDOMAIN_INCREMENT: u32 = 20;

/// 路径层级达到该值视为异常
pub const DEEP_PATH_SEGMENTS: usize = 5;

/// 编译后的 URL 关键词表
#[derive(Debug)]
pub struct UrlRules {
    phishing: Option<AhoCorasick>,
    brands: Option<AhoCorasick>,
    shorteners: Option<AhoCorasick>,
    sensitive_params: Option<AhoCorasick>,
    high_risk_tlds: Vec<String>,
}

fn build_matcher(id: &str, words: &[String]) -> Result<Option<AhoCorasick>, SentinelError> {
    if words.is_empty() { return Ok(None); }
    AhoCorasickBuilder::new()
        .ascii_case_insensitive(true)
        .match_kind(MatchKind::LeftmostLongest)
        .build(words)
        .map(Some)
        .map_err(|e| SentinelError::Rules(format!("url.{id}: {e}")))
}

fn matches(ac: &Option<AhoCorasick>, haystack: &str) -> bool {
    ac.as_ref().is_some_and(|ac| ac.is_match(haystack))
}

/// URL 启发式的中间结论（便于测试与日志）
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UrlSignals {
    pub ip_host: bool,
    pub phishing_keywords: bool,
    pub shortener: bool,
    pub insecure: bool,
    pub high_risk_tld: bool,
    pub brand_combo: bool,
    pub deep_path: bool,
    pub sensitive_query: bool,
    pub brand_in_subdomain: bool,
}

impl UrlRules {
    pub(crate) fn from_section(section: &UrlSection) -> Result<Self, SentinelError> {
        Ok(Self {
            phishing: build_matcher("phishing_keywords", &section.phishing_keywords)?,
            brands: build_matcher("brands", &section.brands)?,
            shorteners: build_matcher("shorteners", &section.shorteners)?,
            sensitive_params: build_matcher("sensitive_params", &section.sensitive_params)?,
            high_risk_tlds: section
                .high_risk_tlds
                .iter()
                .map(|t| t.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        })
    }

    /// 计算结构信号；`raw` 为用户输入原文
    pub fn signals(&self, raw: &str, parsed: &url::Url) -> UrlSignals {
        let host = parsed.host_str().unwrap_or_default().to_ascii_lowercase();
        let phishing_keywords = matches(&self.phishing, raw);
        let shortener = matches(&self.shorteners, raw);
        let high_risk_tld = self.high_risk_tlds.iter().any(|tld| host.ends_with(&format!(".{tld}")));
        let brand_combo = matches(&self.brands, raw) && (phishing_keywords || high_risk_tld || shortener);

        let depth = parsed.path_segments().map(|s| s.filter(|p| !p.is_empty()).count()).unwrap_or(0);
        let sensitive_query = parsed
            .query()
            .is_some_and(|q| !q.is_empty() && matches(&self.sensitive_params, q));

        let labels: Vec<&str> = host.split('.').collect();
        let brand_in_subdomain = labels.len() > 3 && matches(&self.brands, &labels[..labels.len() - 2].join("."));

        UrlSignals {
            ip_host: matches!(parsed.host(), Some(url::Host::Ipv4(_))),
            phishing_keywords,
            shortener,
            insecure: parsed.scheme() != "https",
            high_risk_tld,
            brand_combo,
            deep_path: depth >= DEEP_PATH_SEGMENTS,
            sensitive_query,
            brand_in_subdomain,
        }
    }

    /// 将信号写入打分卡；短链接把原始分下限抬到 medium
    pub fn score(&self, raw: &str, parsed: &url::Url, card: &mut ScoreCard) -> UrlSignals {
        let s = self.signals(raw, parsed);
        let mut hit = |on: bool, sev: Severity, desc: &str, inc: u32| {
            if on {
                card.add(Finding::local(KIND_URL_HEURISTIC, sev, desc), inc);
            }
        };
        hit(s.ip_host, Severity::High, "Uses raw IP address instead of domain", IP_HOST_INCREMENT);
        hit(s.phishing_keywords, Severity::Medium, "Contains phishing-related keywords", PHISHING_KEYWORD_INCREMENT);
        hit(s.shortener, Severity::Medium, "Uses URL shortener (destination obfuscated)", SHORTENER_INCREMENT);
        hit(s.insecure, Severity::Low, "Connection is not HTTPS", NO_HTTPS_INCREMENT);
        hit(s.high_risk_tld, Severity::Medium, "Uses high-risk TLD often associated with newly registered domains", HIGH_RISK_TLD_INCREMENT);
        hit(s.brand_combo, Severity::Medium, "Brand name used alongside phishing indicators, possible impersonation attempt", BRAND_COMBO_INCREMENT);
        hit(s.deep_path, Severity::Low, "Unusually deep URL path structure", DEEP_PATH_INCREMENT);
        hit(s.sensitive_query, Severity::Medium, "Contains sensitive query parameters commonly abused in phishing", SENSITIVE_QUERY_INCREMENT);
        hit(s.brand_in_subdomain, Severity::Medium, "Brand name appears in subdomain, a common phishing evasion technique", BRAND_SUBDOMAIN_INCREMENT);
        if s.shortener {
            card.raise_floor(MEDIUM_THRESHOLD as u32);
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RuleBook;
    use crate::scoring::ThreatLevel;
    use crate::target::parse_url_lenient;

    fn run(raw: &str) -> (UrlSignals, ScoreCard) {
        let rules = RuleBook::builtin().unwrap().url;
        let parsed = parse_url_lenient(raw).unwrap();
        let mut card = ScoreCard::new();
        let s = rules.score(raw, &parsed, &mut card);
        (s, card)
    }

    #[test]
    fn plain_https_site_is_clean() {
        let (s, card) = run("https://www.rust-lang.org/learn");
        assert_eq!(s, UrlSignals::default());
        assert_eq!(card.raw_score(), 0);
        assert_eq!(card.classify().level, ThreatLevel::Safe);
    }

    #[test]
    fn raw_ip_over_http() {
        let (s, card) = run("http://192.168.10.5/index.html");
        assert!(s.ip_host && s.insecure);
        assert_eq!(card.raw_score(), 45);
    }

    #[test]
    fn phishing_combo_scores_high() {
        let (s, card) = run("http://paypal-login.xyz/verify?token=abc");
        assert!(s.phishing_keywords && s.high_risk_tld && s.brand_combo && s.sensitive_query && s.insecure);
        // 20 + 15 + 25 + 15 + 20
        assert_eq!(card.raw_score(), 95);
        assert_eq!(card.classify().level, ThreatLevel::Critical);
    }

    #[test]
    fn shortener_is_at_least_medium() {
        let (s, card) = run("https://bit.ly/3xyz");
        assert!(s.shortener);
        assert_eq!(card.raw_score(), MEDIUM_THRESHOLD);
        assert_eq!(card.classify().level, ThreatLevel::Medium);
    }

    #[test]
    fn brand_buried_in_subdomain() {
        let (s, _) = run("https://apple.id.support-center.com/");
        assert!(s.brand_in_subdomain);
        let (s, _) = run("https://www.apple.com/");
        assert!(!s.brand_in_subdomain);
    }

    #[test]
    fn deep_paths_are_flagged() {
        let (s, _) = run("https://example.com/a/b/c/d/e");
        assert!(s.deep_path);
        let (s, _) = run("https://example.com/a/b/c/d/");
        assert!(!s.deep_path);
    }

    #[test]
    fn brand_alone_is_not_suspicious() {
        let (s, card) = run("https://www.netflix.com/browse");
        assert!(!s.brand_combo);
        assert_eq!(card.raw_score(), 0);
    }
}
