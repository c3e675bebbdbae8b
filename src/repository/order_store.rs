// ==========================================
// 订单导入管道 - 订单库 Repository Trait
// ==========================================
// 职责: 定义导入管道所需的订单库访问接口（不包含实现）
// 红线: Repository 不含业务规则，只做数据写入/查询
// ==========================================

use crate::domain::{Fingerprint, InsertOutcome, OrderInsert};
use crate::repository::error::RepositoryResult;
use async_trait::async_trait;
use std::collections::HashSet;

// ==========================================
// OrderStore Trait
// ==========================================
// 用途: 导入管道唯一的持久化协作方
// 实现者: SqliteOrderStore（使用 rusqlite）
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// 批量写入订单
    ///
    /// # 参数
    /// - rows: 待写入订单（同一批次）
    ///
    /// # 返回
    /// - Ok(Vec<InsertOutcome>): 每行一个结果，行级失败在结果中体现
    /// - Err: 整批调用失败（如订单库不可用），调用方将整批记为失败
    async fn insert_batch(&self, rows: Vec<OrderInsert>) -> RepositoryResult<Vec<InsertOutcome>>;

    /// 指纹是否已存在于订单库
    async fn exists_by_fingerprint(&self, fingerprint: &Fingerprint) -> RepositoryResult<bool>;

    /// 批量查询已存在的指纹
    ///
    /// # 说明
    /// - 默认实现逐个调用 exists_by_fingerprint
    /// - 实现者可覆盖为单条 IN 查询
    async fn existing_fingerprints(
        &self,
        fingerprints: &[Fingerprint],
    ) -> RepositoryResult<HashSet<Fingerprint>> {
        let mut existing = HashSet::new();
        for fingerprint in fingerprints {
            if self.exists_by_fingerprint(fingerprint).await? {
                existing.insert(fingerprint.clone());
            }
        }
        Ok(existing)
    }
}
