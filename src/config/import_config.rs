// ==========================================
// 订单导入管道 - 导入配置
// ==========================================
// 职责: 导入管道全部可调参数及默认值
// 来源: ImportConfigReader（config_kv 表）或 ImportConfig::default()
// ==========================================

use crate::config::import_config_trait::ImportConfigReader;
use crate::domain::{CanonicalField, FingerprintMode};
use crate::importer::error::ImportResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// 批大小允许范围
pub const MIN_BATCH_SIZE: usize = 10;
pub const MAX_BATCH_SIZE: usize = 200;

// ==========================================
// 默认值
// ==========================================
pub const DEFAULT_BATCH_SIZE: usize = 50;
pub const DEFAULT_MAX_IN_FLIGHT: usize = 4;
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.80;
pub const DEFAULT_COUNTRY_CODE: &str = "60";
pub const DEFAULT_CURRENCY: &str = "MYR";
pub const DEFAULT_ERROR_DETAIL_LIMIT: usize = 100;
pub const DEFAULT_PREVIEW_ROW_LIMIT: usize = 10;
pub const DEFAULT_STORE_CALL_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_RUN_TIMEOUT_MS: u64 = 600_000;
pub const DEFAULT_DECODE_TIMEOUT_MS: u64 = 60_000;

// ==========================================
// ImportConfig
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportConfig {
    /// 每批写入行数（夹在 [10, 200]）
    pub batch_size: usize,
    /// 同时在途的批次数上限（>= 1）
    pub max_in_flight: usize,
    /// 模糊匹配阈值（0~1）
    pub similarity_threshold: f64,
    /// 电话号码缺省国家码（纯数字）
    pub default_country_code: String,
    /// 缺省币种（ISO 4217）
    pub default_currency: String,
    /// 报告中每类明细最多保留条数
    pub error_detail_limit: usize,
    /// 预览返回的订单行数
    pub preview_row_limit: usize,
    pub store_call_timeout: Duration,
    pub run_timeout: Duration,
    pub decode_timeout: Duration,
    pub fingerprint_mode: FingerprintMode,
    /// 追加同义词（在内置同义词表之后匹配）
    pub extra_synonyms: BTreeMap<CanonicalField, Vec<String>>,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            default_country_code: DEFAULT_COUNTRY_CODE.to_string(),
            default_currency: DEFAULT_CURRENCY.to_string(),
            error_detail_limit: DEFAULT_ERROR_DETAIL_LIMIT,
            preview_row_limit: DEFAULT_PREVIEW_ROW_LIMIT,
            store_call_timeout: Duration::from_millis(DEFAULT_STORE_CALL_TIMEOUT_MS),
            run_timeout: Duration::from_millis(DEFAULT_RUN_TIMEOUT_MS),
            decode_timeout: Duration::from_millis(DEFAULT_DECODE_TIMEOUT_MS),
            fingerprint_mode: FingerprintMode::Coarse,
            extra_synonyms: BTreeMap::new(),
        }
    }
}

impl ImportConfig {
    /// 从配置读取器加载（缺失项使用默认值）
    pub async fn load<R: ImportConfigReader + ?Sized>(reader: &R) -> ImportResult<Self> {
        let config = Self {
            batch_size: reader.get_batch_size().await?,
            max_in_flight: reader.get_max_in_flight().await?,
            similarity_threshold: reader.get_similarity_threshold().await?,
            default_country_code: reader.get_default_country_code().await?,
            default_currency: reader.get_default_currency().await?,
            error_detail_limit: reader.get_error_detail_limit().await?,
            preview_row_limit: reader.get_preview_row_limit().await?,
            store_call_timeout: reader.get_store_call_timeout().await?,
            run_timeout: reader.get_run_timeout().await?,
            decode_timeout: reader.get_decode_timeout().await?,
            fingerprint_mode: reader.get_fingerprint_mode().await?,
            extra_synonyms: reader.get_extra_synonyms().await?,
        };
        Ok(config.sanitized())
    }

    /// 夹紧到合法范围
    pub fn sanitized(mut self) -> Self {
        self.batch_size = clamp_batch_size(self.batch_size);
        self.max_in_flight = self.max_in_flight.max(1);
        self.similarity_threshold = self.similarity_threshold.clamp(0.0, 1.0);
        self.default_country_code = self
            .default_country_code
            .chars()
            .filter(|c| c.is_ascii_digit())
            .collect();
        if self.default_country_code.is_empty() {
            self.default_country_code = DEFAULT_COUNTRY_CODE.to_string();
        }
        self.default_currency = self.default_currency.trim().to_ascii_uppercase();
        if self.default_currency.is_empty() {
            self.default_currency = DEFAULT_CURRENCY.to_string();
        }
        self.preview_row_limit = self.preview_row_limit.max(1);
        self
    }

    /// 覆盖批大小（调用方参数），同样夹紧
    pub fn with_batch_size(mut self, batch_size: Option<usize>) -> Self {
        if let Some(size) = batch_size {
            self.batch_size = clamp_batch_size(size);
        }
        self
    }
}

pub fn clamp_batch_size(size: usize) -> usize {
    size.clamp(MIN_BATCH_SIZE, MAX_BATCH_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_batch_size_in_range() {
        let config = ImportConfig::default();
        assert!((MIN_BATCH_SIZE..=MAX_BATCH_SIZE).contains(&config.batch_size));
    }

    #[test]
    fn test_sanitized_clamps_values() {
        let config = ImportConfig {
            batch_size: 5000,
            max_in_flight: 0,
            similarity_threshold: 1.7,
            default_country_code: "+65".to_string(),
            default_currency: " sgd ".to_string(),
            ..ImportConfig::default()
        }
        .sanitized();

        assert_eq!(config.batch_size, MAX_BATCH_SIZE);
        assert_eq!(config.max_in_flight, 1);
        assert_eq!(config.similarity_threshold, 1.0);
        assert_eq!(config.default_country_code, "65");
        assert_eq!(config.default_currency, "SGD");
    }

    #[test]
    fn test_with_batch_size_override() {
        let config = ImportConfig::default().with_batch_size(Some(2));
        assert_eq!(config.batch_size, MIN_BATCH_SIZE);
        let config = ImportConfig::default().with_batch_size(None);
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
    }
}
