//! 多来源威胁评分与扫描编排引擎
//!
//! 设计要点：
//! - 本地信号采集器（静态特征、文件类型、行为启发式、URL 启发式）都是样本上的纯函数，
//!   规则表来自 TOML 规则书，会话开始时加载一次。
//! - 分数只有一个来源：增量累积后截断到 0..=100，等级由分数按 80/60/30/15 阶梯推导。
//! - 远端分析（同步扫描或深度扫描作业）失败时降级为本地结果，调用方总能拿到完整结果。
//! - 批量输出为流式 JSON 数组，顺序与输入一致。

mod analyzer;
mod behavior;
mod detectors;
mod error;
mod explain;
mod filetype;
mod findings;
mod job;
mod merge;
mod options;
mod orchestrator;
mod remote;
mod rules;
mod scan;
mod scoring;
mod session;
mod store;
mod target;
mod types;
mod url;

pub use analyzer::analyze_local;
pub use error::SentinelError;
pub use explain::Explainer;
pub use findings::{Finding, FindingSource, Severity};
pub use job::{CancelToken, Clock, JobStatus, ScanJob, TokioClock};
pub use merge::merge_results;
pub use options::{ScanMode, ScanOptions, ScanStats};
pub use orchestrator::{is_fallback, Orchestrator};
pub use remote::{parse_poll, parse_scan, parse_submit, HttpRemoteClient, PollOutcome, RemoteReport, RemoteScanner};
pub use rules::{load_rule_book, RuleBook, DEFAULT_RULES};
pub use scan::{collect_files, scan_and_write, scan_and_write_remote, ResultWriter};
pub use scoring::{classify, Classification, ScoreCard, ThreatLevel};
pub use session::{OutputFormat, ScanSession};
pub use store::{IdentityPermit, ResultStore};
pub use target::{ScanInput, ScanTarget};
pub use types::{BackendDetails, ExfiltrationContext, ScanResult, SpywareProfile, TargetKind};
