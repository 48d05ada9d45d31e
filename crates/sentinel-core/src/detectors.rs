//! 静态特征扫描（字节级正则）
//!
//! 内容样本不保证是合法 UTF-8，因此统一编译为 `regex::bytes::Regex`。
use crate::error::SentinelError;
use crate::findings::{Finding, Severity, KIND_MALWARE_SIGNATURE, KIND_SUSPICIOUS_PATTERN};
use crate::rules::{RuleSpec, RuleTable};

/// 编译后的单条特征
#[derive(Debug)]
struct Signature {
    id: String,
    table: RuleTable,
    severity: Severity,
    description: String,
    re: regex::bytes::Regex,
}

/// 特征集合（表内顺序即输出顺序）
#[derive(Debug)]
pub struct SignatureSet {
    patterns: Vec<Signature>,
}

/// 一次特征扫描的输出
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHit {
    pub rule_id: String,
    pub table: RuleTable,
    pub finding: Finding,
}

impl SignatureSet {
    /// 从规则条目构建特征集合；任一正则编译失败即报错
    pub(crate) fn from_specs(specs: &[RuleSpec]) -> Result<Self, SentinelError> {
        let mut patterns = Vec::with_capacity(specs.len());
        for r in specs {
            let re = regex::bytes::Regex::new(r.pattern())
                .map_err(|source| SentinelError::InvalidPattern { id: r.id.clone(), source })?;
            patterns.push(Signature {
                id: r.id.clone(),
                table: r.table,
                severity: r.severity,
                description: r.description.clone(),
                re,
            });
        }
        Ok(Self { patterns })
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// 按表顺序扫描样本，每条命中的规则产出一个 Finding（允许描述重复）
    pub fn scan(&self, sample: &[u8]) -> Vec<SignatureHit> {
        let mut hits = Vec::new();
        for sig in &self.patterns {
            if !sig.re.is_match(sample) { continue; }
            let kind = match sig.table {
                RuleTable::Malware => KIND_MALWARE_SIGNATURE,
                RuleTable::Suspicious => KIND_SUSPICIOUS_PATTERN,
            };
            hits.push(SignatureHit {
                rule_id: sig.id.clone(),
                table: sig.table,
                finding: Finding::local(kind, sig.severity, sig.description.clone()),
            });
        }
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RuleBook;

    fn set() -> SignatureSet {
        RuleBook::builtin().unwrap().signatures
    }

    #[test]
    fn clean_sample_has_no_hits() {
        assert!(set().scan(b"hello world, nothing to see here").is_empty());
    }

    #[test]
    fn hits_follow_table_order() {
        // suspicious 规则排在 malware 之后
        let hits = set().scan(b"x = base64_decode(y); eval(x); a = b.substring(1)");
        let ids: Vec<&str> = hits.iter().map(|h| h.rule_id.as_str()).collect();
        assert_eq!(ids, vec!["eval-call", "base64-decode", "substr", "substring"]);
        assert_eq!(hits[0].table, RuleTable::Malware);
        assert_eq!(hits[0].finding.kind, KIND_MALWARE_SIGNATURE);
        assert_eq!(hits[1].finding.kind, KIND_SUSPICIOUS_PATTERN);
    }

    #[test]
    fn duplicate_descriptions_are_kept() {
        let hits = set().scan(b"String.fromCharCode(65); chr(65)");
        let encoding = hits.iter().filter(|h| h.finding.description == "Character encoding").count();
        assert_eq!(encoding, 2);
    }

    #[test]
    fn case_sensitivity_follows_rule() {
        // eval\s*\( 区分大小写；trojan 不区分
        let s = set();
        assert!(s.scan(b"EVAL (x)").iter().all(|h| h.rule_id != "eval-call"));
        assert!(s.scan(b"TROJAN").iter().any(|h| h.rule_id == "trojan-word"));
    }

    #[test]
    fn scanning_is_idempotent() {
        let s = set();
        let sample = b"powershell.exe -enc ...; keylogger; GetAsyncKeyState; ransomware";
        let a = s.scan(sample);
        let b = s.scan(sample);
        assert_eq!(a, b);
        assert!(!a.is_empty());
    }

    #[test]
    fn non_utf8_samples_are_scanned() {
        let mut sample = vec![0xff, 0xfe, 0x00];
        sample.extend_from_slice(b"cmd.exe");
        sample.push(0x80);
        assert!(set().scan(&sample).iter().any(|h| h.rule_id == "cmd-exe"));
    }
}
