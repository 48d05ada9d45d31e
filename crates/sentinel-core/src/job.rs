//! 远端深度扫描作业：状态、时钟与取消令牌
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SentinelError;

/// 作业状态；只能单向推进，终态不可离开
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Submitted,
    Polling,
    Completed,
    Failed,
    TimedOut,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::TimedOut | JobStatus::Cancelled)
    }

    /// 允许的迁移
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Submitted, Polling | Failed | Cancelled) => true,
            (Polling, Completed | Failed | TimedOut | Cancelled) => true,
            _ => false,
        }
    }
}

/// 一次远端提交对应的作业
#[derive(Debug, Clone)]
pub struct ScanJob {
    id: String,
    target: String,
    status: JobStatus,
    attempt_count: u32,
    created_at: Instant,
}

impl ScanJob {
    pub fn new(id: impl Into<String>, target: impl Into<String>, created_at: Instant) -> Self {
        Self { id: id.into(), target: target.into(), status: JobStatus::Submitted, attempt_count: 0, created_at }
    }

    pub fn id(&self) -> &str { &self.id }
    pub fn target(&self) -> &str { &self.target }
    pub fn status(&self) -> JobStatus { self.status }
    pub fn attempt_count(&self) -> u32 { self.attempt_count }
    pub fn created_at(&self) -> Instant { self.created_at }

    pub fn transition(&mut self, next: JobStatus) -> Result<(), SentinelError> {
        if !self.status.can_transition_to(next) {
            return Err(SentinelError::InvalidTransition { from: self.status, to: next });
        }
        self.status = next;
        Ok(())
    }

    /// 记一次轮询；只在 Polling 状态下合法
    pub fn record_poll(&mut self) -> Result<u32, SentinelError> {
        if self.status != JobStatus::Polling {
            return Err(SentinelError::InvalidTransition { from: self.status, to: JobStatus::Polling });
        }
        self.attempt_count += 1;
        Ok(self.attempt_count)
    }
}

/// 可注入的时钟（测试中不真正等待）
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    async fn sleep(&self, dur: Duration);
}

/// 基于 tokio 的真实时钟
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, dur: Duration) {
        tokio::time::sleep(dur).await;
    }
}

/// 协作式取消令牌；克隆后共享同一个标志
#[derive(Debug, Default, Clone)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions() {
        let mut job = ScanJob::new("j1", "a.exe", Instant::now());
        assert_eq!(job.status(), JobStatus::Submitted);
        job.transition(JobStatus::Polling).unwrap();
        assert_eq!(job.record_poll().unwrap(), 1);
        assert_eq!(job.record_poll().unwrap(), 2);
        job.transition(JobStatus::Completed).unwrap();
        assert!(job.status().is_terminal());
        assert_eq!(job.attempt_count(), 2);
    }

    #[test]
    fn terminal_states_are_final() {
        for terminal in [JobStatus::Completed, JobStatus::Failed, JobStatus::TimedOut, JobStatus::Cancelled] {
            for next in [JobStatus::Submitted, JobStatus::Polling, JobStatus::Completed, JobStatus::TimedOut] {
                assert!(!terminal.can_transition_to(next), "{terminal:?} -> {next:?}");
            }
        }
    }

    #[test]
    fn no_going_back() {
        let mut job = ScanJob::new("j2", "b.exe", Instant::now());
        job.transition(JobStatus::Polling).unwrap();
        let err = job.transition(JobStatus::Submitted).unwrap_err();
        assert!(matches!(err, SentinelError::InvalidTransition { from: JobStatus::Polling, to: JobStatus::Submitted }));
    }

    #[test]
    fn polls_only_counted_while_polling() {
        let mut job = ScanJob::new("j3", "c.exe", Instant::now());
        assert!(job.record_poll().is_err());
        job.transition(JobStatus::Polling).unwrap();
        job.transition(JobStatus::TimedOut).unwrap();
        assert!(job.record_poll().is_err());
    }

    #[test]
    fn cancel_token_is_shared_between_clones() {
        let a = CancelToken::new();
        let b = a.clone();
        assert!(!b.is_cancelled());
        a.cancel();
        assert!(b.is_cancelled());
    }
}
