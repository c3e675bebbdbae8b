// ==========================================
// 订单导入管道 - 核心库
// ==========================================
// 职责: 把用户上传的订单表格（CSV / Excel）批量导入订单库
// 技术栈: Rust + tokio + SQLite
// 流程: 解析 → 表头映射 → 行转换 → 去重 → 分批落库 → 报告
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 值类型与枚举
pub mod domain;

// 数据仓储层 - 订单库
pub mod repository;

// 导入层 - 导入管道各阶段
pub mod importer;

// 配置层 - 导入参数
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// API 层 - 对外接口
pub mod api;

// 应用层 - 共享状态
pub mod app;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::{
    CanonicalField, FieldMapping, ImportReport, ImportRow, PaymentStatus, RowOutcome, Termination,
};

// 导入管道
pub use importer::{
    ExecuteOptions, FilePayload, ImportError, ImportResult, OrderImportPipeline, OrderImporter,
    RunContext,
};

// 配置
pub use config::{ConfigManager, ImportConfig};

// 订单库
pub use repository::{OrderStore, SqliteOrderStore};

// API
pub use api::{ApiError, ImportApi};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "order-import";
