// ==========================================
// 订单导入管道 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、写入
// 存储: config_kv 表 (scope_id + key → value)
// ==========================================

use crate::config::import_config::{
    DEFAULT_BATCH_SIZE, DEFAULT_COUNTRY_CODE, DEFAULT_CURRENCY, DEFAULT_DECODE_TIMEOUT_MS,
    DEFAULT_ERROR_DETAIL_LIMIT, DEFAULT_MAX_IN_FLIGHT, DEFAULT_PREVIEW_ROW_LIMIT,
    DEFAULT_RUN_TIMEOUT_MS, DEFAULT_SIMILARITY_THRESHOLD, DEFAULT_STORE_CALL_TIMEOUT_MS,
};
use crate::config::import_config_trait::ImportConfigReader;
use crate::db::open_and_init;
use crate::domain::{CanonicalField, FingerprintMode};
use crate::importer::error::{ImportError, ImportResult};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例（自动建表）
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> ImportResult<Self> {
        let conn = open_and_init(db_path).map_err(|e| ImportError::ConfigError {
            key: "<connection>".to_string(),
            message: e.to_string(),
        })?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }


    /// 从 config_kv 表读取配置值（scope_id='global'）
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    fn get_config_value(&self, key: &str) -> ImportResult<Option<String>> {
        let conn = self.conn.lock().map_err(|e| lock_error(&e.to_string()))?;

        conn.query_row(
            "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .map_err(|e| ImportError::ConfigError {
            key: key.to_string(),
            message: e.to_string(),
        })
    }

    /// 读取 global scope 的配置值（公开方法，供其他模块复用）
    pub fn get_global_config_value(&self, key: &str) -> ImportResult<Option<String>> {
        self.get_config_value(key)
    }

    /// 写入 global scope 配置（UPSERT）
    pub fn set_config_value(&self, key: &str, value: &str) -> ImportResult<()> {
        let conn = self.conn.lock().map_err(|e| lock_error(&e.to_string()))?;

        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value) VALUES ('global', ?1, ?2)
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
            params![key, value],
        )
        .map_err(|e| ImportError::ConfigError {
            key: key.to_string(),
            message: e.to_string(),
        })?;

        tracing::info!(config_key = key, "配置已更新");
        Ok(())
    }

    /// 获取全部 global 配置（快照）
    pub fn get_config_snapshot(&self) -> ImportResult<HashMap<String, String>> {
        let conn = self.conn.lock().map_err(|e| lock_error(&e.to_string()))?;

        let mut stmt = conn
            .prepare("SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key")
            .map_err(|e| lock_error(&e.to_string()))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .map_err(|e| lock_error(&e.to_string()))?;

        let mut snapshot = HashMap::new();
        for row in rows {
            let (key, value) = row.map_err(|e| lock_error(&e.to_string()))?;
            snapshot.insert(key, value);
        }
        Ok(snapshot)
    }

    /// 读取并解析配置值，缺失时使用默认值
    ///
    /// # 说明
    /// - 值存在但无法解析 → ConfigError（不静默回退）
    fn get_parsed_or<T>(&self, key: &str, default: T) -> ImportResult<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get_config_value(key)? {
            None => Ok(default),
            Some(raw) => raw.trim().parse::<T>().map_err(|e| ImportError::ConfigError {
                key: key.to_string(),
                message: format!("cannot parse '{}': {}", raw, e),
            }),
        }
    }

    fn get_millis_or(&self, key: &str, default_ms: u64) -> ImportResult<Duration> {
        self.get_parsed_or::<u64>(key, default_ms)
            .map(Duration::from_millis)
    }
}

fn lock_error(message: &str) -> ImportError {
    ImportError::ConfigError {
        key: "<config_kv>".to_string(),
        message: message.to_string(),
    }
}

// ==========================================
// ImportConfigReader Trait 实现
// ==========================================
#[async_trait]
impl ImportConfigReader for ConfigManager {
    // ===== 写入节奏 =====

    async fn get_batch_size(&self) -> ImportResult<usize> {
        self.get_parsed_or(config_keys::BATCH_SIZE, DEFAULT_BATCH_SIZE)
    }

    async fn get_max_in_flight(&self) -> ImportResult<usize> {
        self.get_parsed_or(config_keys::MAX_IN_FLIGHT, DEFAULT_MAX_IN_FLIGHT)
    }

    // ===== 表头映射 =====

    async fn get_similarity_threshold(&self) -> ImportResult<f64> {
        self.get_parsed_or(config_keys::SIMILARITY_THRESHOLD, DEFAULT_SIMILARITY_THRESHOLD)
    }

    async fn get_extra_synonyms(&self) -> ImportResult<BTreeMap<CanonicalField, Vec<String>>> {
        let Some(raw) = self.get_config_value(config_keys::EXTRA_SYNONYMS)? else {
            return Ok(BTreeMap::new());
        };

        let parsed: BTreeMap<String, Vec<String>> =
            serde_json::from_str(&raw).map_err(|e| ImportError::ConfigError {
                key: config_keys::EXTRA_SYNONYMS.to_string(),
                message: e.to_string(),
            })?;

        let mut synonyms = BTreeMap::new();
        for (name, values) in parsed {
            match CanonicalField::parse(&name) {
                Some(field) => {
                    synonyms.insert(field, values);
                }
                None => {
                    tracing::warn!(
                        config_key = config_keys::EXTRA_SYNONYMS,
                        field = %name,
                        "同义词配置包含未知字段，已忽略"
                    );
                }
            }
        }
        Ok(synonyms)
    }

    // ===== 字段解析 =====

    async fn get_default_country_code(&self) -> ImportResult<String> {
        Ok(self
            .get_config_value(config_keys::DEFAULT_COUNTRY_CODE)?
            .unwrap_or_else(|| DEFAULT_COUNTRY_CODE.to_string()))
    }

    async fn get_default_currency(&self) -> ImportResult<String> {
        Ok(self
            .get_config_value(config_keys::DEFAULT_CURRENCY)?
            .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()))
    }

    // ===== 报告 =====

    async fn get_error_detail_limit(&self) -> ImportResult<usize> {
        self.get_parsed_or(config_keys::ERROR_DETAIL_LIMIT, DEFAULT_ERROR_DETAIL_LIMIT)
    }

    async fn get_preview_row_limit(&self) -> ImportResult<usize> {
        self.get_parsed_or(config_keys::PREVIEW_ROW_LIMIT, DEFAULT_PREVIEW_ROW_LIMIT)
    }

    // ===== 时限 =====

    async fn get_store_call_timeout(&self) -> ImportResult<Duration> {
        self.get_millis_or(config_keys::STORE_CALL_TIMEOUT_MS, DEFAULT_STORE_CALL_TIMEOUT_MS)
    }

    async fn get_run_timeout(&self) -> ImportResult<Duration> {
        self.get_millis_or(config_keys::RUN_TIMEOUT_MS, DEFAULT_RUN_TIMEOUT_MS)
    }

    async fn get_decode_timeout(&self) -> ImportResult<Duration> {
        self.get_millis_or(config_keys::DECODE_TIMEOUT_MS, DEFAULT_DECODE_TIMEOUT_MS)
    }

    // ===== 去重 =====

    async fn get_fingerprint_mode(&self) -> ImportResult<FingerprintMode> {
        match self.get_config_value(config_keys::FINGERPRINT_MODE)? {
            None => Ok(FingerprintMode::Coarse),
            Some(raw) => FingerprintMode::parse(&raw).ok_or_else(|| ImportError::ConfigError {
                key: config_keys::FINGERPRINT_MODE.to_string(),
                message: format!("expected COARSE or WITH_LINE_ITEMS, got '{}'", raw),
            }),
        }
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 写入节奏
    pub const BATCH_SIZE: &str = "import.batch_size";
    pub const MAX_IN_FLIGHT: &str = "import.max_in_flight";

    // 表头映射
    pub const SIMILARITY_THRESHOLD: &str = "import.similarity_threshold";
    pub const EXTRA_SYNONYMS: &str = "import.extra_synonyms"; // JSON

    // 字段解析
    pub const DEFAULT_COUNTRY_CODE: &str = "import.default_country_code";
    pub const DEFAULT_CURRENCY: &str = "import.default_currency";

    // 报告
    pub const ERROR_DETAIL_LIMIT: &str = "import.error_detail_limit";
    pub const PREVIEW_ROW_LIMIT: &str = "import.preview_row_limit";

    // 时限（毫秒）
    pub const STORE_CALL_TIMEOUT_MS: &str = "import.store_call_timeout_ms";
    pub const RUN_TIMEOUT_MS: &str = "import.run_timeout_ms";
    pub const DECODE_TIMEOUT_MS: &str = "import.decode_timeout_ms";

    // 去重
    pub const FINGERPRINT_MODE: &str = "import.fingerprint_mode";
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImportConfig;
    use tempfile::NamedTempFile;

    fn create_manager() -> (NamedTempFile, ConfigManager) {
        let temp = NamedTempFile::new().unwrap();
        let manager = ConfigManager::new(temp.path().to_str().unwrap()).unwrap();
        (temp, manager)
    }

    #[tokio::test]
    async fn test_defaults_when_table_empty() {
        let (_temp, manager) = create_manager();
        let config = ImportConfig::load(&manager).await.unwrap();
        assert_eq!(config, ImportConfig::default());
    }

    #[tokio::test]
    async fn test_overrides_are_read_and_clamped() {
        let (_temp, manager) = create_manager();
        manager.set_config_value(config_keys::BATCH_SIZE, "500").unwrap();
        manager.set_config_value(config_keys::DEFAULT_CURRENCY, "sgd").unwrap();
        manager
            .set_config_value(config_keys::FINGERPRINT_MODE, "with_line_items")
            .unwrap();
        manager
            .set_config_value(
                config_keys::EXTRA_SYNONYMS,
                r#"{"customer_name": ["pembeli"], "nonsense": ["x"]}"#,
            )
            .unwrap();

        let config = ImportConfig::load(&manager).await.unwrap();
        assert_eq!(config.batch_size, 200);
        assert_eq!(config.default_currency, "SGD");
        assert_eq!(config.fingerprint_mode, FingerprintMode::WithLineItems);
        assert_eq!(
            config.extra_synonyms.get(&CanonicalField::CustomerName),
            Some(&vec!["pembeli".to_string()])
        );
        assert_eq!(config.extra_synonyms.len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_value_is_config_error() {
        let (_temp, manager) = create_manager();
        manager.set_config_value(config_keys::MAX_IN_FLIGHT, "many").unwrap();

        let result = ImportConfig::load(&manager).await;
        assert!(matches!(result, Err(ImportError::ConfigError { .. })));
    }
}
