//! 会话级结果存储
//!
//! 目标标识 → 最新结果；同一标识的重复扫描通过按标识创建的单许可信号量串行化，
//! 最后写入者胜出。
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

use crate::types::ScanResult;

type PermitMap = HashMap<String, Arc<Semaphore>>;

// 持锁期间不会 panic，中毒时直接取回数据
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
pub struct ResultStore {
    results: Mutex<HashMap<String, ScanResult>>,
    permits: Arc<Mutex<PermitMap>>,
}

/// 某个目标标识的独占许可
///
/// 释放时若没有其他任务在等同一标识，顺带删掉对应的信号量。
#[derive(Debug)]
pub struct IdentityPermit {
    identity: String,
    permit: Option<OwnedSemaphorePermit>,
    permits: Arc<Mutex<PermitMap>>,
}

impl Drop for IdentityPermit {
    fn drop(&mut self) {
        drop(self.permit.take());
        let mut map = lock(&self.permits);
        // 只剩表里这一份引用：没人持有也没人在等
        if map.get(&self.identity).is_some_and(|sem| Arc::strong_count(sem) == 1) {
            map.remove(&self.identity);
        }
    }
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn results(&self) -> MutexGuard<'_, HashMap<String, ScanResult>> {
        lock(&self.results)
    }

    /// 获取某个目标标识的独占许可；释放（drop）后下一个同标识扫描才能继续
    pub async fn acquire(&self, identity: &str) -> Result<IdentityPermit, AcquireError> {
        let sem = lock(&self.permits)
            .entry(identity.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(1)))
            .clone();
        let permit = sem.acquire_owned().await?;
        Ok(IdentityPermit { identity: identity.to_string(), permit: Some(permit), permits: Arc::clone(&self.permits) })
    }

    pub fn put(&self, result: ScanResult) {
        self.results().insert(result.target.clone(), result);
    }

    pub fn get(&self, identity: &str) -> Option<ScanResult> {
        self.results().get(identity).cloned()
    }

    pub fn len(&self) -> usize {
        self.results().len()
    }

    pub fn is_empty(&self) -> bool {
        self.results().is_empty()
    }

    /// 会话结束时清空
    pub fn clear(&self) {
        self.results().clear();
        lock(&self.permits).clear();
    }
}
