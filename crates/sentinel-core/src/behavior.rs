//! 行为启发式：RTLO 伪装、键盘记录、数据外传
use std::collections::HashSet;

use crate::error::SentinelError;
use crate::rules::{ExfiltrationSection, KeyloggerSection};
use crate::types::ExfiltrationContext;

/// U+202E RIGHT-TO-LEFT OVERRIDE
pub const RLO: char = '\u{202E}';
/// 上传表单中常见的转义写法
const RLO_MARKER: &str = "[U+202E]";

pub const RLO_INCREMENT: u32 = 50;
pub const KEYLOGGER_INCREMENT: u32 = 60;

/// 文件名是否包含 RTLO 控制字符
pub fn has_rtlo(name: &str) -> bool {
    name.contains(RLO) || name.contains(RLO_MARKER)
}

/// 编译后的行为规则
#[derive(Debug)]
pub struct BehaviorRules {
    keylogger_content: Vec<regex::bytes::Regex>,
    keylogger_name: Option<regex::Regex>,
    exfiltration: Option<regex::bytes::Regex>,
    script_types: HashSet<String>,
    markup_types: HashSet<String>,
    script_weight: u32,
    web_weight: u32,
}

impl BehaviorRules {
    pub(crate) fn from_sections(keylogger: &KeyloggerSection, exfil: &ExfiltrationSection) -> Result<Self, SentinelError> {
        let mut keylogger_content = Vec::with_capacity(keylogger.content.len());
        for (i, pat) in keylogger.content.iter().enumerate() {
            let re = regex::bytes::Regex::new(pat)
                .map_err(|source| SentinelError::InvalidPattern { id: format!("keylogger.content[{i}]"), source })?;
            keylogger_content.push(re);
        }
        let keylogger_name = keylogger
            .name
            .as_deref()
            .map(regex::Regex::new)
            .transpose()
            .map_err(|source| SentinelError::InvalidPattern { id: "keylogger.name".into(), source })?;
        let exfiltration = exfil
            .pattern
            .as_deref()
            .map(regex::bytes::Regex::new)
            .transpose()
            .map_err(|source| SentinelError::InvalidPattern { id: "exfiltration.pattern".into(), source })?;

        Ok(Self {
            keylogger_content,
            keylogger_name,
            exfiltration,
            script_types: exfil.script_types.iter().map(|s| s.to_ascii_uppercase()).collect(),
            markup_types: exfil.markup_types.iter().map(|s| s.to_ascii_uppercase()).collect(),
            script_weight: exfil.script_weight,
            web_weight: exfil.web_weight,
        })
    }

    /// 内容样本或文件名命中任一键盘记录特征
    pub fn detect_keylogger(&self, sample: &[u8], name: &str) -> bool {
        self.keylogger_content.iter().any(|re| re.is_match(sample))
            || self.keylogger_name.as_ref().is_some_and(|re| re.is_match(name))
    }

    /// 由（归一化后的）扩展名或识别类型判断内容上下文；脚本优先
    pub fn content_context(&self, candidates: &[&str]) -> Option<ExfiltrationContext> {
        if candidates.iter().any(|c| self.script_types.contains(*c)) {
            return Some(ExfiltrationContext::Script);
        }
        if candidates.iter().any(|c| self.markup_types.contains(*c)) {
            return Some(ExfiltrationContext::Web);
        }
        None
    }

    /// 外传检测：只对脚本/标记内容生效，返回上下文与加权增量
    pub fn detect_exfiltration(&self, sample: &[u8], context: Option<ExfiltrationContext>) -> Option<(ExfiltrationContext, u32)> {
        let ctx = context?;
        let re = self.exfiltration.as_ref()?;
        if !re.is_match(sample) { return None; }
        Some((ctx, self.weight(ctx)))
    }

    pub fn weight(&self, ctx: ExfiltrationContext) -> u32 {
        match ctx {
            ExfiltrationContext::Script => self.script_weight,
            ExfiltrationContext::Web => self.web_weight,
        }
    }
}
