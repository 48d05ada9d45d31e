//! 扫描目标：文件（有界采样）或 URL
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::error::SentinelError;
use crate::filetype::to_hex;
use crate::types::TargetKind;

/// 头部字节数（魔数识别用）
pub const HEADER_LEN: usize = 32;
/// 采样块大小：头 / 中 / 尾各一块
pub const SAMPLE_CHUNK: usize = 8 * 1024;
/// 不超过该大小的文件整体作为样本
pub const WHOLE_SAMPLE_MAX: u64 = (SAMPLE_CHUNK * 3) as u64;
/// 分块之间插入的分隔字节，避免跨块拼接出伪匹配
const CHUNK_SEPARATOR: u8 = b'\n';

/// 不可变的扫描目标
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanTarget {
    name: String,
    identity: String,
    kind: TargetKind,
    size: u64,
    sample: Vec<u8>,
    header: Vec<u8>,
    extension: Option<String>,
    scheme: Option<String>,
    path: Option<PathBuf>,
}

impl ScanTarget {
    /// 从文件路径构建：只读取头/中/尾三个固定大小的块
    pub fn from_path(path: &Path) -> Result<Self, SentinelError> {
        let display = path.display().to_string();
        let name = path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .ok_or_else(|| SentinelError::local(&display, "path has no file name"))?;
        let file = File::open(path).map_err(|e| SentinelError::local(&display, e))?;
        let size = file.metadata().map_err(|e| SentinelError::local(&display, e))?.len();
        let mut reader = BufReader::new(file);
        let sample = read_sample(&mut reader, size).map_err(|e| SentinelError::local(&display, e))?;
        let header = sample[..sample.len().min(HEADER_LEN)].to_vec();

        Ok(Self {
            extension: extension_of(&name),
            name,
            identity: display,
            kind: TargetKind::File,
            size,
            sample,
            header,
            scheme: None,
            path: Some(path.to_path_buf()),
        })
    }

    /// 从内存字节构建（上传内容）；样本规则与文件一致
    pub fn from_bytes(name: impl Into<String>, bytes: &[u8]) -> Self {
        let name = name.into();
        let size = bytes.len() as u64;
        let sample = sample_slice(bytes);
        let header = bytes[..bytes.len().min(HEADER_LEN)].to_vec();
        Self {
            extension: extension_of(&name),
            identity: name.clone(),
            name,
            kind: TargetKind::File,
            size,
            sample,
            header,
            scheme: None,
            path: None,
        }
    }

    /// 从 URL 构建；缺少协议时补 `http://`
    pub fn from_url(input: &str) -> Result<Self, SentinelError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(SentinelError::local(input, "empty URL"));
        }
        let parsed = parse_url_lenient(trimmed).map_err(|e| SentinelError::local(trimmed, e))?;
        if parsed.host_str().is_none() {
            return Err(SentinelError::local(trimmed, "URL has no host"));
        }
        Ok(Self {
            name: trimmed.to_string(),
            identity: trimmed.to_string(),
            kind: TargetKind::Url,
            size: trimmed.len() as u64,
            sample: trimmed.as_bytes().to_vec(),
            header: Vec::new(),
            extension: None,
            scheme: Some(parsed.scheme().to_string()),
            path: None,
        })
    }

    pub fn name(&self) -> &str { &self.name }
    /// 结果存储的键：文件为完整路径（内存内容为名称），URL 为原文
    pub fn identity(&self) -> &str { &self.identity }
    pub fn kind(&self) -> TargetKind { self.kind }
    pub fn size(&self) -> u64 { self.size }
    pub fn sample(&self) -> &[u8] { &self.sample }
    pub fn header(&self) -> &[u8] { &self.header }
    pub fn header_hex(&self) -> String { to_hex(&self.header) }
    /// 声明的扩展名（大写，不含点）
    pub fn extension(&self) -> Option<&str> { self.extension.as_deref() }
    pub fn scheme(&self) -> Option<&str> { self.scheme.as_deref() }
    pub fn path(&self) -> Option<&Path> { self.path.as_deref() }

    /// URL 目标的解析结果
    pub fn url(&self) -> Option<url::Url> {
        match self.kind {
            TargetKind::Url => parse_url_lenient(&self.name).ok(),
            TargetKind::File => None,
        }
    }
}

/// 尚未加载的扫描输入（批处理用）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanInput {
    File(PathBuf),
    Url(String),
}

impl ScanInput {
    pub fn kind(&self) -> TargetKind {
        match self {
            ScanInput::File(_) => TargetKind::File,
            ScanInput::Url(_) => TargetKind::Url,
        }
    }

    /// 与 `ScanTarget::identity` 一致的标识
    pub fn identity(&self) -> String {
        match self {
            ScanInput::File(p) => p.display().to_string(),
            ScanInput::Url(u) => u.trim().to_string(),
        }
    }

    pub fn load(&self) -> Result<ScanTarget, SentinelError> {
        match self {
            ScanInput::File(p) => ScanTarget::from_path(p),
            ScanInput::Url(u) => ScanTarget::from_url(u),
        }
    }
}

pub(crate) fn parse_url_lenient(input: &str) -> Result<url::Url, url::ParseError> {
    let lower = input.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        url::Url::parse(input)
    } else {
        url::Url::parse(&format!("http://{input}"))
    }
}

fn extension_of(name: &str) -> Option<String> {
    let (_, ext) = name.rsplit_once('.')?;
    if ext.is_empty() { return None; }
    Some(ext.to_uppercase())
}

/// 内存内容的采样
fn sample_slice(bytes: &[u8]) -> Vec<u8> {
    if bytes.len() as u64 <= WHOLE_SAMPLE_MAX {
        return bytes.to_vec();
    }
    let len = bytes.len();
    let mid = len / 2 - SAMPLE_CHUNK / 2;
    let mut out = Vec::with_capacity(SAMPLE_CHUNK * 3 + 2);
    out.extend_from_slice(&bytes[..SAMPLE_CHUNK]);
    out.push(CHUNK_SEPARATOR);
    out.extend_from_slice(&bytes[mid..mid + SAMPLE_CHUNK]);
    out.push(CHUNK_SEPARATOR);
    out.extend_from_slice(&bytes[len - SAMPLE_CHUNK..]);
    out
}

/// 文件采样：小文件整读，大文件 seek 读取三块
fn read_sample<R: Read + Seek>(reader: &mut R, size: u64) -> std::io::Result<Vec<u8>> {
    if size <= WHOLE_SAMPLE_MAX {
        let mut buf = Vec::with_capacity(size as usize);
        reader.read_to_end(&mut buf)?;
        return Ok(buf);
    }
    let chunk = SAMPLE_CHUNK as u64;
    let offsets = [0, size / 2 - chunk / 2, size - chunk];
    let mut out = Vec::with_capacity(SAMPLE_CHUNK * 3 + 2);
    for (i, off) in offsets.iter().enumerate() {
        if i > 0 { out.push(CHUNK_SEPARATOR); }
        reader.seek(SeekFrom::Start(*off))?;
        let mut buf = vec![0u8; SAMPLE_CHUNK];
        let mut filled = 0;
        // 文件可能在读取期间被截断，读到多少用多少
        while filled < SAMPLE_CHUNK {
            match reader.read(&mut buf[filled..])? {
                0 => break,
                n => filled += n,
            }
        }
        out.extend_from_slice(&buf[..filled]);
    }
    Ok(out)
}
