//! 扫描会话：选项、规则书、输出格式与结果存储的显式载体
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::job::CancelToken;
use crate::options::ScanOptions;
use crate::orchestrator::Orchestrator;
use crate::remote::{HttpRemoteClient, RemoteScanner};
use crate::rules::{load_rule_book, RuleBook};
use crate::store::ResultStore;

/// 结果输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Json,
    JsonPretty,
}

#[derive(Debug)]
pub struct ScanSession {
    options: ScanOptions,
    rules: Arc<RuleBook>,
    store: Arc<ResultStore>,
    format: OutputFormat,
    cancel: CancelToken,
}

impl ScanSession {
    /// 打开会话：按选项加载规则书（未指定时使用内置规则）
    pub fn open(options: ScanOptions, format: OutputFormat) -> Result<Self> {
        let rules = load_rule_book(options.rules_path.as_deref())?;
        info!(signatures = rules.signatures.len(), mode = ?options.mode, "session opened");
        Ok(Self::with_rules(options, Arc::new(rules)).with_format(format))
    }

    pub fn with_rules(options: ScanOptions, rules: Arc<RuleBook>) -> Self {
        Self { options, rules, store: Arc::new(ResultStore::new()), format: OutputFormat::default(), cancel: CancelToken::new() }
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn options(&self) -> &ScanOptions { &self.options }
    pub fn rules(&self) -> Arc<RuleBook> { Arc::clone(&self.rules) }
    pub fn store(&self) -> Arc<ResultStore> { Arc::clone(&self.store) }
    pub fn format(&self) -> OutputFormat { self.format }
    pub fn cancel_token(&self) -> CancelToken { self.cancel.clone() }

    /// 按选项构建远端客户端；本地模式或未配置地址时为 None
    pub fn remote_client(&self) -> Result<Option<Arc<dyn RemoteScanner>>> {
        if !self.options.mode.needs_remote() {
            return Ok(None);
        }
        let Some(base) = self.options.backend_url.as_deref() else {
            warn!(mode = ?self.options.mode, "no backend url configured, remote analysis will fall back");
            return Ok(None);
        };
        let client = HttpRemoteClient::new(base, self.options.request_timeout, self.options.user_agent.as_deref())
            .context("build backend client")?;
        let client: Arc<dyn RemoteScanner> = Arc::new(client);
        Ok(Some(client))
    }

    pub fn orchestrator(&self) -> Result<Orchestrator> {
        Ok(Orchestrator::new(self, self.remote_client()?))
    }

    /// 结束会话：取消未完成的作业并清空结果存储
    pub fn end(self) {
        self.cancel.cancel();
        let n = self.store.len();
        self.store.clear();
        info!(results = n, "session ended");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::ScanMode;
    use crate::target::ScanTarget;

    #[tokio::test]
    async fn end_clears_the_store() {
        let session = ScanSession::open(ScanOptions::default(), OutputFormat::JsonPretty).unwrap();
        assert_eq!(session.format(), OutputFormat::JsonPretty);
        let o = session.orchestrator().unwrap();
        o.scan_target(&ScanTarget::from_bytes("a.txt", b"hi")).await;
        let store = session.store();
        assert_eq!(store.len(), 1);
        let cancel = session.cancel_token();
        session.end();
        assert!(store.is_empty());
        assert!(cancel.is_cancelled());
    }

    #[test]
    fn remote_client_only_for_remote_modes() {
        let local = ScanSession::open(ScanOptions::default(), OutputFormat::Json).unwrap();
        assert!(local.remote_client().unwrap().is_none());

        let opts = ScanOptions { mode: ScanMode::Deep, backend_url: Some("http://127.0.0.1:3000".into()), ..Default::default() };
        assert!(ScanSession::open(opts, OutputFormat::Json).unwrap().remote_client().unwrap().is_some());

        let opts = ScanOptions { mode: ScanMode::Backend, backend_url: Some("not a url".into()), ..Default::default() };
        assert!(ScanSession::open(opts, OutputFormat::Json).unwrap().remote_client().is_err());

        let opts = ScanOptions { mode: ScanMode::Deep, ..Default::default() };
        assert!(ScanSession::open(opts, OutputFormat::Json).unwrap().remote_client().unwrap().is_none());
    }

    #[test]
    fn missing_rule_file_fails_to_open() {
        let opts = ScanOptions { rules_path: Some("/nonexistent/rules.toml".into()), ..Default::default() };
        assert!(ScanSession::open(opts, OutputFormat::Json).is_err());
    }
}
