//! 规则文件加载（TOML）
//!
//! 规则书只在会话开始时加载一次，之后作为不可变配置在各采集器间共享。
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::behavior::BehaviorRules;
use crate::detectors::SignatureSet;
use crate::error::SentinelError;
use crate::explain::Explainer;
use crate::filetype::FileTypeTable;
use crate::findings::Severity;
use crate::url::UrlRules;

/// 内置默认规则
pub const DEFAULT_RULES: &str = include_str!("../rules/default.toml");

/// 单条特征规则（支持 pattern 或 regex 字段）
#[derive(Debug, Clone, Deserialize)]
struct SignatureEntry {
    pub id: String,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub regex: Option<String>,
    pub severity: Severity,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct KeyloggerSection {
    #[serde(default)]
    pub content: Vec<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ExfiltrationSection {
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub script_types: Vec<String>,
    #[serde(default)]
    pub markup_types: Vec<String>,
    #[serde(default = "default_script_weight")]
    pub script_weight: u32,
    #[serde(default = "default_web_weight")]
    pub web_weight: u32,
}

fn default_script_weight() -> u32 { 20 }
fn default_web_weight() -> u32 { 10 }

impl Default for ExfiltrationSection {
    fn default() -> Self {
        Self {
            pattern: None,
            script_types: Vec::new(),
            markup_types: Vec::new(),
            script_weight: default_script_weight(),
            web_weight: default_web_weight(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct MagicEntry {
    #[serde(rename = "type")]
    pub label: String,
    #[serde(default)]
    pub signatures: Vec<String>,
    #[serde(default)]
    pub weak: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ContainerEntry {
    pub family: String,
    #[serde(default)]
    pub extensions: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct FiletypeSection {
    #[serde(default)]
    pub plain_text_extensions: Vec<String>,
    #[serde(default)]
    pub aliases: HashMap<String, String>,
    #[serde(default)]
    pub magic: Vec<MagicEntry>,
    #[serde(default)]
    pub containers: Vec<ContainerEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct UrlSection {
    #[serde(default)]
    pub phishing_keywords: Vec<String>,
    #[serde(default)]
    pub brands: Vec<String>,
    #[serde(default)]
    pub shorteners: Vec<String>,
    #[serde(default)]
    pub high_risk_tlds: Vec<String>,
    #[serde(default)]
    pub sensitive_params: Vec<String>,
}

/// 说明文字表
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct ExplanationSection {
    /// 命中描述 → 解释
    #[serde(default)]
    pub indicators: HashMap<String, String>,
    /// URL 命中没有专门解释时使用
    #[serde(default)]
    pub url_fallback: Option<String>,
    /// 画像标志（以及 keylogger、coordinated）→ 句子
    #[serde(default)]
    pub profile: HashMap<String, String>,
    /// 等级 → 风险结论
    #[serde(default)]
    pub risk: HashMap<String, String>,
    #[serde(default)]
    pub clean: Option<String>,
    #[serde(default)]
    pub disclaimer: Option<String>,
}

/// 顶层规则文件结构
#[derive(Debug, Clone, Deserialize)]
struct RuleFile {
    #[serde(default)]
    pub malware: Vec<SignatureEntry>,
    #[serde(default)]
    pub suspicious: Vec<SignatureEntry>,
    #[serde(default)]
    pub keylogger: KeyloggerSection,
    #[serde(default)]
    pub exfiltration: ExfiltrationSection,
    #[serde(default)]
    pub filetype: FiletypeSection,
    #[serde(default)]
    pub url: UrlSection,
    #[serde(default)]
    pub explanation: ExplanationSection,
}

/// 特征规则所属的表
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleTable {
    Malware,
    Suspicious,
}

/// 归一化后的规则规格（内部使用）
#[derive(Debug, Clone)]
pub(crate) struct RuleSpec {
    pub id: String,
    pub table: RuleTable,
    pub pat: String,
    pub severity: Severity,
    pub description: String,
}

impl RuleSpec {
    pub(crate) fn pattern(&self) -> &str { &self.pat }
}

fn normalize_entries(entries: Vec<SignatureEntry>, table: RuleTable, out: &mut Vec<RuleSpec>) {
    for e in entries {
        // 兼容两种字段名：pattern 或 regex
        let pat = match (e.pattern, e.regex) {
            (Some(p), _) => p,
            (None, Some(r)) => r,
            _ => continue,
        };
        let description = e.description.unwrap_or_else(|| e.id.clone());
        out.push(RuleSpec { id: e.id, table, pat, severity: e.severity, description });
    }
}

/// 编译完成的规则书
#[derive(Debug)]
pub struct RuleBook {
    pub signatures: SignatureSet,
    pub behavior: BehaviorRules,
    pub filetypes: FileTypeTable,
    pub url: UrlRules,
    pub explanation: Explainer,
}

impl RuleBook {
    /// 使用内置默认规则
    pub fn builtin() -> Result<Self, SentinelError> {
        Self::from_toml_str(DEFAULT_RULES)
    }

    /// 从 TOML 文本解析并编译
    pub fn from_toml_str(txt: &str) -> Result<Self, SentinelError> {
        let parsed: RuleFile = toml::from_str(txt).map_err(|e| SentinelError::Rules(e.to_string()))?;

        // 特征表保持文件中的顺序：先 malware，后 suspicious
        let mut specs = Vec::with_capacity(parsed.malware.len() + parsed.suspicious.len());
        normalize_entries(parsed.malware, RuleTable::Malware, &mut specs);
        normalize_entries(parsed.suspicious, RuleTable::Suspicious, &mut specs);

        Ok(Self {
            signatures: SignatureSet::from_specs(&specs)?,
            behavior: BehaviorRules::from_sections(&parsed.keylogger, &parsed.exfiltration)?,
            filetypes: FileTypeTable::from_section(&parsed.filetype),
            url: UrlRules::from_section(&parsed.url)?,
            explanation: Explainer::from_section(&parsed.explanation),
        })
    }
}

/// 从 TOML 规则文件加载；未给出路径时使用内置规则
pub fn load_rule_book(path: Option<&Path>) -> Result<RuleBook> {
    match path {
        Some(p) => {
            let txt = std::fs::read_to_string(p).with_context(|| format!("read rule file {}", p.display()))?;
            RuleBook::from_toml_str(&txt).with_context(|| format!("compile rule file {}", p.display()))
        }
        None => RuleBook::builtin().context("compile built-in rules"),
    }
}
