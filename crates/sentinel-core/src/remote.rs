//! 远端分析服务客户端
//!
//! 服务端的字段既有 camelCase 也有 snake_case（`threatLevel` / `threat_level`、
//! `jobId` / `job_id`、`sandboxData` / `sandbox_data` ...），在反序列化时统一，
//! 下游只看到 `RemoteReport` 一种形态。
use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::SentinelError;
use crate::findings::{Finding, FindingSource, Severity, KIND_BACKEND_INDICATOR};
use crate::scoring::ThreatLevel;
use crate::target::ScanTarget;
use crate::types::{BackendDetails, ScanResult, SpywareProfile, TargetKind};

/// 轮询一次的结论
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Pending,
    Completed(RemoteReport),
    Failed(String),
}

/// 远端分析结论（已归一化）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteReport {
    pub findings: Vec<Finding>,
    pub threat_score: Option<u8>,
    pub threat_level: Option<ThreatLevel>,
    pub explanation: Option<String>,
    pub spyware_profile: Option<SpywareProfile>,
    /// 来自深度扫描作业（而非同步扫描）
    pub deep_scan: bool,
    pub details: Option<BackendDetails>,
}

impl RemoteReport {
    /// 分数缺失而等级存在时，取该等级区间的下界
    pub fn effective_score(&self) -> u8 {
        self.threat_score
            .or_else(|| self.threat_level.map(ThreatLevel::floor_score))
            .unwrap_or(0)
    }

    pub fn into_scan_result(self, target: &ScanTarget) -> ScanResult {
        let mut result = ScanResult::empty(target.identity(), target.kind(), target.size());
        result.set_score(self.effective_score() as u32);
        result.findings = self.findings;
        result.spyware_profile = self.spyware_profile.unwrap_or_default();
        result.deep_scan_performed = self.deep_scan;
        result.deep_scan_attempted = self.deep_scan;
        result.backend_based = !self.deep_scan;
        result.explanation = self.explanation;
        result.backend_details = self.details;
        result
    }
}

/// 远端分析服务的抽象；编排器只依赖这个 trait
#[async_trait]
pub trait RemoteScanner: Send + Sync {
    /// 提交深度扫描，返回作业 id
    async fn submit(&self, target: &ScanTarget) -> Result<String, SentinelError>;
    /// 查询作业状态
    async fn poll_result(&self, job_id: &str) -> Result<PollOutcome, SentinelError>;
    /// 同步扫描
    async fn scan(&self, target: &ScanTarget) -> Result<RemoteReport, SentinelError>;
}

// ---------------------------------------------------------------------------
// 线上格式
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireFinding {
    Text(String),
    Detailed {
        #[serde(default, rename = "type", alias = "kind")]
        kind: Option<String>,
        #[serde(default)]
        severity: Option<String>,
        #[serde(default, alias = "message")]
        description: Option<String>,
    },
}

impl WireFinding {
    fn into_finding(self, source: FindingSource) -> Finding {
        match self {
            WireFinding::Text(text) => Finding::new(KIND_BACKEND_INDICATOR, Severity::Medium, text, source),
            WireFinding::Detailed { kind, severity, description } => {
                let kind = kind.unwrap_or_else(|| KIND_BACKEND_INDICATOR.to_string());
                let severity = severity.as_deref().and_then(Severity::parse_loose).unwrap_or(Severity::Medium);
                let description = description.unwrap_or_else(|| kind.clone());
                Finding::new(kind, severity, description, source)
            }
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSandbox {
    #[serde(default)]
    findings: Option<Vec<WireFinding>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireProfile {
    #[serde(default)]
    surveillance: bool,
    #[serde(default)]
    persistence: bool,
    #[serde(default)]
    stealth: bool,
    #[serde(default, alias = "data_exfiltration")]
    data_exfiltration: bool,
    #[serde(default, alias = "credential_harvesting")]
    credential_harvesting: bool,
    #[serde(default, alias = "confidence_score")]
    confidence_score: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEnvelope {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default, alias = "job_id")]
    job_id: Option<Value>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    findings: Option<Vec<WireFinding>>,
    #[serde(default, alias = "threat_score")]
    threat_score: Option<f64>,
    #[serde(default, alias = "threat_level")]
    threat_level: Option<String>,
    #[serde(default)]
    explanation: Option<String>,
    #[serde(default, alias = "sandbox_data")]
    sandbox_data: Option<WireSandbox>,
    #[serde(default, alias = "spyware_profile")]
    spyware_profile: Option<WireProfile>,
    #[serde(default)]
    hashes: Option<BTreeMap<String, Value>>,
    #[serde(default)]
    entropy: Option<f64>,
    #[serde(default, alias = "virus_total")]
    virus_total: Option<Value>,
}

impl WireEnvelope {
    fn decode(v: Value) -> Result<Self, SentinelError> {
        serde_json::from_value(v).map_err(|e| SentinelError::Network(format!("malformed response: {e}")))
    }

    fn from_value(v: Value) -> Result<Self, SentinelError> {
        Self::decode(v)?.ensure_success()
    }

    fn ensure_success(self) -> Result<Self, SentinelError> {
        if self.success == Some(false) {
            let reason = self.error.unwrap_or_else(|| "remote reported failure".to_string());
            return Err(SentinelError::Network(reason));
        }
        Ok(self)
    }

    fn into_report(self, deep_scan: bool) -> RemoteReport {
        let mut findings: Vec<Finding> = self
            .findings
            .unwrap_or_default()
            .into_iter()
            .map(|f| f.into_finding(FindingSource::Backend))
            .collect();
        if let Some(sandbox) = self.sandbox_data {
            findings.extend(sandbox.findings.unwrap_or_default().into_iter().map(|f| f.into_finding(FindingSource::Sandbox)));
        }

        let spyware_profile = self.spyware_profile.map(|p| SpywareProfile {
            surveillance: p.surveillance,
            persistence: p.persistence,
            stealth: p.stealth,
            data_exfiltration: p.data_exfiltration,
            credential_harvesting: p.credential_harvesting,
            confidence_score: p.confidence_score.map(clamp_score).unwrap_or(0),
            exfiltration_context: None,
        });

        let hashes: BTreeMap<String, String> = self
            .hashes
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| match v {
                Value::String(s) => (k, s),
                other => (k, other.to_string()),
            })
            .collect();
        let details = if hashes.is_empty() && self.entropy.is_none() && self.virus_total.is_none() {
            None
        } else {
            Some(BackendDetails { hashes, entropy: self.entropy, virus_total: self.virus_total })
        };

        RemoteReport {
            findings,
            threat_score: self.threat_score.map(clamp_score),
            threat_level: self.threat_level.as_deref().and_then(|s| s.parse().ok()),
            explanation: self.explanation,
            spyware_profile,
            deep_scan,
            details,
        }
    }
}

fn clamp_score(v: f64) -> u8 {
    if v.is_nan() { return 0; }
    v.round().clamp(0.0, 100.0) as u8
}

/// 解析提交响应 → 作业 id
pub fn parse_submit(v: Value) -> Result<String, SentinelError> {
    let env = WireEnvelope::from_value(v)?;
    match env.job_id {
        Some(Value::String(s)) if !s.is_empty() => Ok(s),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(SentinelError::Network("submission response has no job id".into())),
    }
}

/// 解析轮询响应
///
/// 带 status 的响应以 status 为准（失败的作业常以 `success:false` + `status:"failed"` 返回）；
/// 没有 status 时 `success:false` 才算传输层错误。
pub fn parse_poll(v: Value) -> Result<PollOutcome, SentinelError> {
    let env = WireEnvelope::decode(v)?;
    let Some(status) = env.status.as_deref().map(|s| s.trim().to_ascii_lowercase()) else {
        env.ensure_success()?;
        return Err(SentinelError::Network("poll response has no status".into()));
    };
    match status.as_str() {
        "completed" | "complete" | "done" => Ok(PollOutcome::Completed(env.into_report(true))),
        "failed" | "error" => Ok(PollOutcome::Failed(env.error.unwrap_or_else(|| "remote job failed".into()))),
        "pending" | "queued" | "running" | "processing" => Ok(PollOutcome::Pending),
        other => {
            debug!(status = other, "unrecognised job status, treating as pending");
            Ok(PollOutcome::Pending)
        }
    }
}

/// 解析同步扫描响应
pub fn parse_scan(v: Value) -> Result<RemoteReport, SentinelError> {
    Ok(WireEnvelope::from_value(v)?.into_report(false))
}

// ---------------------------------------------------------------------------
// HTTP 实现
// ---------------------------------------------------------------------------

/// 基于 reqwest 的远端客户端
#[derive(Debug, Clone)]
pub struct HttpRemoteClient {
    client: reqwest::Client,
    base: url::Url,
}

impl HttpRemoteClient {
    pub fn new(base_url: &str, timeout: Duration, user_agent: Option<&str>) -> Result<Self, SentinelError> {
        let base = url::Url::parse(base_url).map_err(|e| SentinelError::Network(format!("invalid backend url '{base_url}': {e}")))?;
        if base.cannot_be_a_base() {
            return Err(SentinelError::Network(format!("invalid backend url '{base_url}'")));
        }
        let mut builder = reqwest::Client::builder().timeout(timeout);
        if let Some(ua) = user_agent {
            builder = builder.user_agent(ua);
        }
        let client = builder.build()?;
        Ok(Self { client, base })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<url::Url, SentinelError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| SentinelError::Network("backend url cannot carry a path".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// 文件走 multipart，URL 走 JSON
    fn post_target(&self, url: url::Url, target: &ScanTarget) -> reqwest::RequestBuilder {
        let req = self.client.post(url);
        match target.kind() {
            TargetKind::File => {
                let part = Part::bytes(target.sample().to_vec()).file_name(target.name().to_string());
                let form = Form::new()
                    .part("file", part)
                    .text("name", target.name().to_string())
                    .text("size", target.size().to_string());
                req.multipart(form)
            }
            TargetKind::Url => req.json(&serde_json::json!({ "url": target.name() })),
        }
    }

    async fn read_json(resp: reqwest::Response) -> Result<Value, SentinelError> {
        let status = resp.status();
        if !status.is_success() {
            return Err(SentinelError::Network(format!("HTTP {status}")));
        }
        resp.json::<Value>()
            .await
            .map_err(|e| SentinelError::Network(format!("malformed response: {e}")))
    }
}

#[async_trait]
impl RemoteScanner for HttpRemoteClient {
    async fn submit(&self, target: &ScanTarget) -> Result<String, SentinelError> {
        let url = self.endpoint(&["api", "deep-scan"])?;
        debug!(identity = target.identity(), %url, "submitting deep scan");
        let resp = self.post_target(url, target).send().await?;
        parse_submit(Self::read_json(resp).await?)
    }

    async fn poll_result(&self, job_id: &str) -> Result<PollOutcome, SentinelError> {
        let url = self.endpoint(&["api", "deep-scan", job_id])?;
        let resp = self.client.get(url).send().await?;
        parse_poll(Self::read_json(resp).await?)
    }

    async fn scan(&self, target: &ScanTarget) -> Result<RemoteReport, SentinelError> {
        let url = self.endpoint(&["api", "scan"])?;
        debug!(identity = target.identity(), %url, "requesting backend scan");
        let resp = self.post_target(url, target).send().await?;
        parse_scan(Self::read_json(resp).await?)
    }
}
