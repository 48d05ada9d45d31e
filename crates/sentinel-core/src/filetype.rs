//! 文件类型识别（魔数）与扩展名不一致检查
use std::collections::{HashMap, HashSet};

use crate::rules::FiletypeSection;

pub const UNKNOWN: &str = "UNKNOWN";

/// 扩展名不一致带来的固定增量
pub const MISMATCH_INCREMENT: u32 = 30;

#[derive(Debug)]
struct Magic {
    label: String,
    signatures: Vec<String>,
    weak: bool,
}

/// 魔数识别结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection<'a> {
    pub label: &'a str,
    /// 弱签名（如 `/*`、`--` 这类文本前缀）
    pub weak: bool,
}

impl Detection<'_> {
    pub fn is_unknown(&self) -> bool {
        self.label == UNKNOWN
    }
}

/// 扩展名不一致的描述
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    pub detected: String,
    pub claimed: String,
}

impl Mismatch {
    pub fn description(&self) -> String {
        format!("File appears to be {} but has .{} extension", self.detected, self.claimed)
    }
}

/// 魔数表 + 别名 + 容器族
#[derive(Debug, Default)]
pub struct FileTypeTable {
    magic: Vec<Magic>,
    aliases: HashMap<String, String>,
    containers: HashMap<String, HashSet<String>>,
    plain_text: HashSet<String>,
}

impl FileTypeTable {
    pub(crate) fn from_section(section: &FiletypeSection) -> Self {
        let magic = section
            .magic
            .iter()
            .map(|m| Magic {
                label: m.label.to_ascii_uppercase(),
                signatures: m.signatures.iter().map(|s| s.to_ascii_uppercase()).filter(|s| !s.is_empty()).collect(),
                weak: m.weak,
            })
            .collect();
        let aliases = section
            .aliases
            .iter()
            .map(|(k, v)| (k.to_ascii_uppercase(), v.to_ascii_uppercase()))
            .collect();
        let mut containers: HashMap<String, HashSet<String>> = HashMap::new();
        for c in &section.containers {
            containers
                .entry(c.family.to_ascii_uppercase())
                .or_default()
                .extend(c.extensions.iter().map(|e| e.to_ascii_uppercase()));
        }
        let plain_text = section.plain_text_extensions.iter().map(|e| e.to_ascii_uppercase()).collect();
        Self { magic, aliases, containers, plain_text }
    }

    pub fn magic_len(&self) -> usize {
        self.magic.len()
    }

    /// 头部十六进制 → 类型；按表顺序，首个前缀命中者胜出
    pub fn detect(&self, header_hex: &str) -> Detection<'_> {
        let header = header_hex.to_ascii_uppercase();
        for m in &self.magic {
            if m.signatures.iter().any(|sig| header.starts_with(sig.as_str())) {
                return Detection { label: &m.label, weak: m.weak };
            }
        }
        Detection { label: UNKNOWN, weak: false }
    }

    /// 扩展名归一化（大写 + 别名）
    pub fn normalize_extension(&self, ext: &str) -> String {
        let upper = ext.trim_start_matches('.').to_ascii_uppercase();
        self.aliases.get(&upper).cloned().unwrap_or(upper)
    }

    /// 检查声明的扩展名与识别类型是否一致；无副作用
    pub fn check_mismatch(&self, detection: Detection<'_>, claimed_ext: Option<&str>) -> Option<Mismatch> {
        if detection.is_unknown() { return None; }
        let claimed = match claimed_ext {
            Some(e) if !e.is_empty() => self.normalize_extension(e),
            _ => return None,
        };
        let detected = self.normalize_extension(detection.label);
        if detected == claimed { return None; }
        // 容器族：ZIP 承载 APK/DOCX、MZ 承载 DLL 等
        if self.containers.get(&detected).is_some_and(|exts| exts.contains(&claimed)) {
            return None;
        }
        // 弱签名不与纯文本扩展名冲突
        if detection.weak && self.plain_text.contains(&claimed) {
            return None;
        }
        Some(Mismatch { detected, claimed })
    }
}

/// 字节 → 大写十六进制
pub fn to_hex(bytes: &[u8]) -> String {
    hex::encode_upper(bytes)
}
