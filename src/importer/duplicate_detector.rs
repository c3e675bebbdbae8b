// ==========================================
// 订单导入管道 - 重复检测器
// ==========================================
// 阶段 3: 为每个 Valid 行计算指纹，先查本次运行内，再批量查订单库
// 指纹: SHA-256(客户标识 | 订单日期 | 金额最小单位 [| 明细])
// 约束: 订单库查询失败对整次运行致命（继续写入会破坏幂等）
// ==========================================

use crate::domain::{DuplicateMatch, Fingerprint, FingerprintMode, ImportRow, RowOutcome};
use crate::importer::error::{ImportError, ImportResult};
use crate::repository::OrderStore;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, instrument};

/// 单次订单库指纹查询的最大数量
const LOOKUP_CHUNK_SIZE: usize = 500;

pub struct DuplicateDetector {
    mode: FingerprintMode,
    store_call_timeout: Duration,
    // 本次运行内已出现的指纹 → 首次出现的行号
    seen: Mutex<HashMap<Fingerprint, usize>>,
}

impl DuplicateDetector {
    pub fn new(mode: FingerprintMode, store_call_timeout: Duration) -> Self {
        Self {
            mode,
            store_call_timeout,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// 计算指纹（确定性）
    pub fn fingerprint(&self, row: &ImportRow) -> Fingerprint {
        let identity = match &row.customer.phone {
            Some(phone) => phone.chars().filter(|c| c.is_ascii_digit()).collect::<String>(),
            None => row
                .customer
                .name
                .as_deref()
                .unwrap_or("")
                .to_lowercase()
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" "),
        };

        let mut key = format!(
            "{}|{}|{}",
            identity,
            row.order_date.format("%Y-%m-%d"),
            row.amount_minor()
        );

        if self.mode == FingerprintMode::WithLineItems {
            let mut items: Vec<String> = row
                .items
                .iter()
                .map(|item| {
                    format!(
                        "{}*{}@{}",
                        item.name.to_lowercase(),
                        item.quantity,
                        item.unit_price
                            .map(|p| ((p * 100.0).round() as i64).to_string())
                            .unwrap_or_default()
                    )
                })
                .collect();
            items.sort();
            key.push('|');
            key.push_str(&items.join(";"));
        }

        Fingerprint::from_hex(hex::encode(Sha256::digest(key.as_bytes())))
    }

    /// 本次运行内原子检查并登记
    ///
    /// # 返回
    /// - Some(first_row): 已出现过
    /// - None: 首次出现（已登记）
    pub fn check_in_run(&self, fingerprint: &Fingerprint, row_number: usize) -> Option<usize> {
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        match seen.get(fingerprint) {
            Some(first_row) => Some(*first_row),
            None => {
                seen.insert(fingerprint.clone(), row_number);
                None
            }
        }
    }

    /// 标记重复行
    ///
    /// # 说明
    /// - 输出与输入一一对应、顺序不变
    /// - 只有 Valid 行会变为 Duplicate
    #[instrument(skip(self, outcomes, store), fields(rows = outcomes.len()))]
    pub async fn detect(
        &self,
        outcomes: Vec<RowOutcome>,
        store: &dyn OrderStore,
    ) -> ImportResult<Vec<RowOutcome>> {
        let mut outcomes = outcomes;

        // 1. 本次运行内
        let mut pending: Vec<(usize, Fingerprint)> = Vec::new();
        let mut in_run_hits = 0usize;
        for (idx, outcome) in outcomes.iter_mut().enumerate() {
            let RowOutcome::Valid(row) = outcome else {
                continue;
            };
            let fingerprint = self.fingerprint(row);
            match self.check_in_run(&fingerprint, row.row_number) {
                Some(first_row) => {
                    in_run_hits += 1;
                    *outcome = into_duplicate(
                        std::mem::replace(outcome, placeholder()),
                        fingerprint,
                        DuplicateMatch::InRun { first_row },
                    );
                }
                None => pending.push((idx, fingerprint)),
            }
        }

        // 2. 订单库（分块批量查询）
        let mut store_hits = 0usize;
        for chunk in pending.chunks(LOOKUP_CHUNK_SIZE) {
            let fingerprints: Vec<Fingerprint> = chunk.iter().map(|(_, fp)| fp.clone()).collect();
            let existing = tokio::time::timeout(
                self.store_call_timeout,
                store.existing_fingerprints(&fingerprints),
            )
            .await
            .map_err(|_| {
                ImportError::StoreError(format!(
                    "fingerprint lookup timed out after {} ms",
                    self.store_call_timeout.as_millis()
                ))
            })??;

            for (idx, fingerprint) in chunk {
                if existing.contains(fingerprint) {
                    store_hits += 1;
                    let outcome = std::mem::replace(&mut outcomes[*idx], placeholder());
                    outcomes[*idx] =
                        into_duplicate(outcome, fingerprint.clone(), DuplicateMatch::Store);
                }
            }
        }

        debug!(in_run_hits, store_hits, "重复检测完成");
        Ok(outcomes)
    }
}

fn placeholder() -> RowOutcome {
    RowOutcome::Invalid {
        row_number: 0,
        customer: None,
        reasons: Vec::new(),
        warnings: Vec::new(),
    }
}

fn into_duplicate(
    outcome: RowOutcome,
    fingerprint: Fingerprint,
    matched: DuplicateMatch,
) -> RowOutcome {
    match outcome {
        RowOutcome::Valid(row) => RowOutcome::Duplicate {
            row_number: row.row_number,
            fingerprint,
            matched,
            row: Box::new(row),
        },
        other => other,
    }
}
