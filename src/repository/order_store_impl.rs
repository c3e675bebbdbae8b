// ==========================================
// 订单导入管道 - 订单库 Repository 实现
// ==========================================
// 职责: 实现 OrderStore（使用 rusqlite）
// 红线: Repository 不含业务规则，只做数据写入/查询
// 策略: 每批一个事务，每行一个 SAVEPOINT，单行失败不影响同批其他行
// ==========================================

use crate::db::open_and_init;
use crate::domain::{Fingerprint, InsertOutcome, OrderInsert};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::order_store::OrderStore;
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, params_from_iter, Connection};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

/// 单条 IN 查询最多携带的指纹数（低于 SQLite 变量上限）
const FINGERPRINT_QUERY_CHUNK: usize = 500;

// ==========================================
// SqliteOrderStore
// ==========================================
pub struct SqliteOrderStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteOrderStore {
    /// 创建新的 Repository 实例（自动建表）
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_and_init(db_path)
            .map_err(|e| RepositoryError::DatabaseConnectionError(e.to_string()))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 订单总数
    pub fn count_orders(&self) -> RepositoryResult<usize> {
        let conn = self.conn.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM orders", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// 在 SAVEPOINT 内写入单个订单及其明细
    fn insert_one(conn: &Connection, insert: &OrderInsert) -> RepositoryResult<String> {
        let order_id = Uuid::new_v4().to_string();
        let order = &insert.order;

        conn.execute(
            r#"
            INSERT INTO orders (
                order_id, customer_name, phone_number, email, facebook_handle,
                order_date, currency, total_amount, payment_status, notes,
                import_fingerprint, import_run_id, source_row_number, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
            params![
                order_id,
                order.customer.name,
                order.customer.phone,
                order.customer.email,
                order.customer.facebook_handle,
                order.order_date.format("%Y-%m-%d").to_string(),
                order.currency,
                order.total_amount,
                order.status.as_db_str(),
                order.notes,
                insert.fingerprint.as_str(),
                insert.run_id,
                insert.row_number as i64,
                Utc::now().to_rfc3339(),
            ],
        )?;

        let mut stmt = conn.prepare_cached(
            r#"
            INSERT INTO order_line_items (order_id, item_name, quantity, unit_price)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )?;
        for item in &order.items {
            stmt.execute(params![order_id, item.name, item.quantity, item.unit_price])?;
        }

        Ok(order_id)
    }
}

#[async_trait]
impl OrderStore for SqliteOrderStore {
    /// 批量写入（事务化，行级 SAVEPOINT）
    ///
    /// # 说明
    /// - 同步执行，首次 poll 内完成：调用方的单次调用超时对本实现不生效，
    ///   也不会出现"已超时但实际已提交"的行
    async fn insert_batch(&self, rows: Vec<OrderInsert>) -> RepositoryResult<Vec<InsertOutcome>> {
        let mut conn = self.conn.lock()?;
        let mut tx = conn
            .transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        let mut outcomes = Vec::with_capacity(rows.len());
        for insert in &rows {
            let sp = tx
                .savepoint()
                .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

            match Self::insert_one(&sp, insert) {
                Ok(order_id) => {
                    sp.commit()
                        .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
                    outcomes.push(InsertOutcome::inserted(insert.row_number, order_id));
                }
                Err(e) => {
                    // sp 析构即回滚到保存点
                    warn!(row_number = insert.row_number, error = %e, "订单写入失败");
                    outcomes.push(InsertOutcome::failed(insert.row_number, e.to_string()));
                }
            }
        }

        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        debug!(rows = rows.len(), "批次事务提交完成");
        Ok(outcomes)
    }

    async fn exists_by_fingerprint(&self, fingerprint: &Fingerprint) -> RepositoryResult<bool> {
        let conn = self.conn.lock()?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM orders WHERE import_fingerprint = ?1)",
            params![fingerprint.as_str()],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// 批量查询（分块 IN 查询）
    async fn existing_fingerprints(
        &self,
        fingerprints: &[Fingerprint],
    ) -> RepositoryResult<HashSet<Fingerprint>> {
        let conn = self.conn.lock()?;
        let mut existing = HashSet::new();

        for chunk in fingerprints.chunks(FINGERPRINT_QUERY_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT DISTINCT import_fingerprint FROM orders WHERE import_fingerprint IN ({})",
                placeholders
            );
            let mut stmt = conn.prepare(&sql)?;
            let found = stmt.query_map(params_from_iter(chunk.iter().map(|f| f.as_str())), |row| {
                row.get::<_, String>(0)
            })?;
            for value in found {
                existing.insert(Fingerprint::from_hex(value?));
            }
        }

        Ok(existing)
    }
}
