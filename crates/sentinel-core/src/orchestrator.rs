//! 扫描编排：本地分析 → （可选）远端分析 → 合并 → 写入会话存储
//!
//! 深度扫描是一个显式状态机：
//!
//! ```text
//! Submitting ──ok──▶ Polling ──completed──▶ Completed ──▶ merge
//!     │                 │ failed / timed out / cancelled
//!     └──err────────────┴──────────────────▶ FallenBack ──▶ 本地结果 + 说明
//! ```
//!
//! 远端错误不会外泄：调用方永远拿到完整的 `ScanResult`。
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, Stream, StreamExt};
use tracing::{debug, info, warn};

use crate::analyzer::analyze_local;
use crate::error::SentinelError;
use crate::findings::{Finding, Severity, KIND_BACKEND_FALLBACK, KIND_DEEP_SCAN_FALLBACK};
use crate::job::{CancelToken, Clock, JobStatus, ScanJob, TokioClock};
use crate::merge::merge_results;
use crate::options::ScanMode;
use crate::remote::{PollOutcome, RemoteReport, RemoteScanner};
use crate::rules::RuleBook;
use crate::session::ScanSession;
use crate::store::ResultStore;
use crate::target::{ScanInput, ScanTarget};
use crate::types::ScanResult;

/// 深度扫描状态机的阶段
enum Phase {
    Submitting,
    Polling(ScanJob),
    Completed(RemoteReport),
    FallenBack { reason: String, attempted: bool },
}

/// 结果是否经过了降级
pub fn is_fallback(result: &ScanResult) -> bool {
    result
        .findings
        .iter()
        .any(|f| f.kind == KIND_DEEP_SCAN_FALLBACK || f.kind == KIND_BACKEND_FALLBACK)
}

pub struct Orchestrator {
    rules: Arc<RuleBook>,
    store: Arc<ResultStore>,
    remote: Option<Arc<dyn RemoteScanner>>,
    clock: Arc<dyn Clock>,
    cancel: CancelToken,
    mode: ScanMode,
    poll_interval: Duration,
    max_poll_attempts: u32,
    workers: usize,
}

impl Orchestrator {
    pub fn new(session: &ScanSession, remote: Option<Arc<dyn RemoteScanner>>) -> Self {
        let opts = session.options();
        Self {
            rules: session.rules(),
            store: session.store(),
            remote,
            clock: Arc::new(TokioClock),
            cancel: session.cancel_token(),
            mode: opts.mode,
            poll_interval: opts.poll_interval,
            max_poll_attempts: opts.max_poll_attempts,
            workers: opts.workers.max(1),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn mode(&self) -> ScanMode {
        self.mode
    }

    /// 扫描单个目标；同一标识的并发扫描被串行化，结果写入会话存储
    pub async fn scan_target(&self, target: &ScanTarget) -> ScanResult {
        let _permit = match self.store.acquire(target.identity()).await {
            Ok(p) => Some(p),
            Err(e) => {
                warn!(identity = target.identity(), error = %e, "could not serialise scan, continuing without permit");
                None
            }
        };

        let local = analyze_local(target, &self.rules);
        let result = match (self.mode, self.remote.as_deref()) {
            (ScanMode::Local, _) => local,
            (ScanMode::Backend, None) => fallback(local, KIND_BACKEND_FALLBACK, "no backend configured", false),
            (ScanMode::Deep, None) => fallback(local, KIND_DEEP_SCAN_FALLBACK, "no backend configured", false),
            (ScanMode::Backend, Some(remote)) => self.run_backend(remote, target, local).await,
            (ScanMode::Deep, Some(remote)) => self.run_deep(remote, target, local).await,
        };

        self.store.put(result.clone());
        result
    }

    /// 加载并扫描一个输入；无法加载时返回带 analysis_error 的安全结果
    pub async fn scan_input(&self, input: &ScanInput) -> ScanResult {
        match input.load() {
            Ok(target) => self.scan_target(&target).await,
            Err(e) => {
                warn!(identity = %input.identity(), error = %e, "local analysis failed");
                let result = ScanResult::from_local_error(input.identity(), input.kind(), &e);
                self.store.put(result.clone());
                result
            }
        }
    }

    /// 有界并发地扫描一批输入；产出顺序与输入顺序一致
    pub fn scan_stream<'a>(&'a self, inputs: &'a [ScanInput]) -> impl Stream<Item = ScanResult> + 'a {
        stream::iter(inputs.iter().map(move |input| self.scan_input(input))).buffered(self.workers)
    }

    pub async fn scan_batch(&self, inputs: &[ScanInput]) -> Vec<ScanResult> {
        self.scan_stream(inputs).collect().await
    }

    async fn run_backend(&self, remote: &dyn RemoteScanner, target: &ScanTarget, local: ScanResult) -> ScanResult {
        match remote.scan(target).await {
            Ok(report) => {
                debug!(identity = target.identity(), "backend scan completed");
                merge_results(local, Some(report.into_scan_result(target)))
            }
            Err(e) => {
                info!(identity = target.identity(), error = %e, "backend scan failed, using local analysis");
                fallback(local, KIND_BACKEND_FALLBACK, &e.to_string(), false)
            }
        }
    }

    async fn run_deep(&self, remote: &dyn RemoteScanner, target: &ScanTarget, local: ScanResult) -> ScanResult {
        let mut phase = Phase::Submitting;
        loop {
            phase = match phase {
                Phase::Completed(report) => {
                    return merge_results(local, Some(report.into_scan_result(target)));
                }
                Phase::FallenBack { reason, attempted } => {
                    info!(identity = target.identity(), %reason, "deep scan fell back to local analysis");
                    return fallback(local, KIND_DEEP_SCAN_FALLBACK, &reason, attempted);
                }
                other => match self.step(remote, target, other).await {
                    Ok(next) => next,
                    Err(e) => Phase::FallenBack { reason: e.to_string(), attempted: true },
                },
            };
        }
    }

    async fn step(&self, remote: &dyn RemoteScanner, target: &ScanTarget, phase: Phase) -> Result<Phase, SentinelError> {
        match phase {
            Phase::Submitting => {
                if self.cancel.is_cancelled() {
                    return Ok(Phase::FallenBack { reason: "cancelled before submission".into(), attempted: false });
                }
                match remote.submit(target).await {
                    Ok(id) => {
                        let mut job = ScanJob::new(id, target.identity(), self.clock.now());
                        job.transition(JobStatus::Polling)?;
                        debug!(identity = target.identity(), job_id = job.id(), "deep scan submitted");
                        Ok(Phase::Polling(job))
                    }
                    Err(e) => Ok(Phase::FallenBack { reason: format!("submission failed: {e}"), attempted: false }),
                }
            }
            Phase::Polling(mut job) => {
                // 取消优先于次数耗尽
                if self.cancel.is_cancelled() {
                    return cancelled(job);
                }
                if job.attempt_count() >= self.max_poll_attempts {
                    job.transition(JobStatus::TimedOut)?;
                    let elapsed = self.clock.now().saturating_duration_since(job.created_at());
                    warn!(identity = job.target(), job_id = job.id(), ?elapsed, "deep scan timed out");
                    let err = SentinelError::Timeout { attempts: job.attempt_count() };
                    return Ok(Phase::FallenBack { reason: err.to_string(), attempted: true });
                }
                self.clock.sleep(self.poll_interval).await;
                if self.cancel.is_cancelled() {
                    return cancelled(job);
                }
                let attempt = job.record_poll()?;
                match remote.poll_result(job.id()).await {
                    Ok(PollOutcome::Pending) => Ok(Phase::Polling(job)),
                    Ok(PollOutcome::Completed(report)) => {
                        job.transition(JobStatus::Completed)?;
                        debug!(job_id = job.id(), attempt, "deep scan completed");
                        Ok(Phase::Completed(report))
                    }
                    Ok(PollOutcome::Failed(reason)) => {
                        job.transition(JobStatus::Failed)?;
                        Ok(Phase::FallenBack { reason: format!("deep scan job failed: {reason}"), attempted: true })
                    }
                    Err(e) => {
                        // 单次轮询失败不终止作业，但计入次数
                        warn!(job_id = job.id(), attempt, error = %e, "poll failed");
                        Ok(Phase::Polling(job))
                    }
                }
            }
            done @ (Phase::Completed(_) | Phase::FallenBack { .. }) => Ok(done),
        }
    }
}

fn cancelled(mut job: ScanJob) -> Result<Phase, SentinelError> {
    job.transition(JobStatus::Cancelled)?;
    debug!(job_id = job.id(), attempts = job.attempt_count(), "deep scan cancelled");
    Ok(Phase::FallenBack { reason: "deep scan cancelled".into(), attempted: true })
}

/// 降级：保留本地结果，附加一条不计分的低危说明
fn fallback(mut local: ScanResult, kind: &str, reason: &str, attempted: bool) -> ScanResult {
    let what = if kind == KIND_BACKEND_FALLBACK { "Backend scan" } else { "Deep scan" };
    local.findings.push(Finding::local(
        kind,
        Severity::Low,
        format!("{what} unavailable, showing local analysis only: {reason}"),
    ));
    local.deep_scan_performed = false;
    local.deep_scan_attempted = attempted;
    local
}
