// ==========================================
// 订单导入管道 - 导入配置读取 Trait
// ==========================================
// 职责: 定义导入模块所需的配置读取接口（不包含实现）
// 红线: 不包含配置写入、不包含业务逻辑
// ==========================================

use crate::domain::{CanonicalField, FingerprintMode};
use crate::importer::error::ImportResult;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;

// ==========================================
// ImportConfigReader Trait
// ==========================================
// 用途: 导入模块所需的配置读取接口
// 实现者: ConfigManager（从 config_kv 表读取）
#[async_trait]
pub trait ImportConfigReader: Send + Sync {
    // ===== 写入节奏 =====

    /// 每批写入行数
    ///
    /// # 默认值
    /// - 50（读取后夹在 [10, 200]）
    async fn get_batch_size(&self) -> ImportResult<usize>;

    /// 同时在途批次数上限
    ///
    /// # 默认值
    /// - 4
    async fn get_max_in_flight(&self) -> ImportResult<usize>;

    // ===== 表头映射 =====

    /// 模糊匹配阈值
    ///
    /// # 默认值
    /// - 0.80
    async fn get_similarity_threshold(&self) -> ImportResult<f64>;

    /// 追加同义词表
    ///
    /// # 存储格式
    /// - JSON 对象: {"customer_name": ["buyer", "pembeli"], ...}
    async fn get_extra_synonyms(&self) -> ImportResult<BTreeMap<CanonicalField, Vec<String>>>;

    // ===== 字段解析 =====

    /// 缺省国家码
    ///
    /// # 默认值
    /// - "60"
    async fn get_default_country_code(&self) -> ImportResult<String>;

    /// 缺省币种
    ///
    /// # 默认值
    /// - "MYR"
    async fn get_default_currency(&self) -> ImportResult<String>;

    // ===== 报告 =====

    async fn get_error_detail_limit(&self) -> ImportResult<usize>;

    async fn get_preview_row_limit(&self) -> ImportResult<usize>;

    // ===== 时限 =====

    /// 单次订单库调用时限
    async fn get_store_call_timeout(&self) -> ImportResult<Duration>;

    /// 整体导入时限
    async fn get_run_timeout(&self) -> ImportResult<Duration>;

    /// 文件解析时限
    async fn get_decode_timeout(&self) -> ImportResult<Duration>;

    // ===== 去重 =====

    /// 指纹模式
    ///
    /// # 默认值
    /// - COARSE
    async fn get_fingerprint_mode(&self) -> ImportResult<FingerprintMode>;
}
