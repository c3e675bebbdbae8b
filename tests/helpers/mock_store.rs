// ==========================================
// Mock 订单库实现 - 用于集成测试
// ==========================================
// 支持: 指定批次失败 / 调用延迟 / 第 N 批后触发取消 / 指纹查询失败或延迟
// ==========================================

use async_trait::async_trait;
use order_import::domain::{Fingerprint, InsertOutcome, OrderInsert};
use order_import::repository::{OrderStore, RepositoryError, RepositoryResult};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
pub struct MockOrderStore {
    /// 已写入的订单
    pub inserted: Mutex<Vec<OrderInsert>>,
    /// 订单库中已存在的指纹
    pub fingerprints: Mutex<HashSet<Fingerprint>>,
    /// insert_batch 调用次数
    pub calls: AtomicUsize,
    /// 整批失败的调用序号（1 起）
    fail_calls: HashSet<usize>,
    /// 每次写入的延迟
    delay: Option<Duration>,
    /// 第 N 次调用完成前触发取消
    cancel_after: Option<(usize, CancellationToken)>,
    /// 指纹查询是否失败
    lookup_fails: bool,
    /// 每次指纹查询的延迟
    lookup_delay: Option<Duration>,
}

impl MockOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_calls(mut self, calls: &[usize]) -> Self {
        self.fail_calls = calls.iter().copied().collect();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn cancel_after(mut self, calls: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((calls, token));
        self
    }

    pub fn failing_lookups(mut self) -> Self {
        self.lookup_fails = true;
        self
    }

    pub fn with_lookup_delay(mut self, delay: Duration) -> Self {
        self.lookup_delay = Some(delay);
        self
    }

    pub fn inserted_rows(&self) -> Vec<usize> {
        let mut rows: Vec<usize> = self
            .inserted
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.row_number)
            .collect();
        rows.sort_unstable();
        rows
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OrderStore for MockOrderStore {
    async fn insert_batch(&self, rows: Vec<OrderInsert>) -> RepositoryResult<Vec<InsertOutcome>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some((after, token)) = &self.cancel_after {
            if call == *after {
                token.cancel();
            }
        }
        if self.fail_calls.contains(&call) {
            return Err(RepositoryError::Unavailable(format!("batch call {} rejected", call)));
        }

        let outcomes = rows
            .iter()
            .map(|r| InsertOutcome::inserted(r.row_number, format!("order-{}", r.row_number)))
            .collect();

        let mut fingerprints = self.fingerprints.lock().unwrap();
        let mut inserted = self.inserted.lock().unwrap();
        for row in rows {
            fingerprints.insert(row.fingerprint.clone());
            inserted.push(row);
        }
        Ok(outcomes)
    }

    async fn exists_by_fingerprint(&self, fingerprint: &Fingerprint) -> RepositoryResult<bool> {
        if let Some(delay) = self.lookup_delay {
            tokio::time::sleep(delay).await;
        }
        if self.lookup_fails {
            return Err(RepositoryError::Unavailable("lookup rejected".to_string()));
        }
        Ok(self.fingerprints.lock().unwrap().contains(fingerprint))
    }
}
