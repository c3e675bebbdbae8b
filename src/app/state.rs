// ==========================================
// 订单导入管道 - 应用状态
// ==========================================
// 职责: 管理应用级别的共享资源和API实例
// ==========================================

use std::sync::Arc;

use crate::api::{ApiResult, ImportApi};
use crate::config::{ConfigManager, ImportConfig};
use crate::repository::SqliteOrderStore;

/// 应用状态
///
/// 包含API实例和共享资源，进程内只创建一次
pub struct AppState {
    /// 数据库路径
    pub db_path: String,

    /// 配置管理器（config_kv）
    pub config_manager: Arc<ConfigManager>,

    /// 订单库
    pub order_store: Arc<SqliteOrderStore>,

    /// 订单导入API
    pub import_api: Arc<ImportApi>,
}

impl AppState {
    /// 创建新的AppState实例
    ///
    /// # 说明
    /// 1. 打开数据库并建表
    /// 2. 从 config_kv 加载导入配置（缺失项取默认值）
    /// 3. 创建订单库与导入API
    pub async fn new(db_path: String) -> ApiResult<Self> {
        tracing::info!(db_path = %db_path, "初始化AppState");

        let config_manager = Arc::new(ConfigManager::new(&db_path)?);
        let config = ImportConfig::load(config_manager.as_ref()).await?;
        tracing::debug!(?config, "导入配置加载完成");

        let order_store = Arc::new(SqliteOrderStore::new(&db_path)?);
        let import_api = Arc::new(ImportApi::new(order_store.clone(), config));

        tracing::info!("AppState初始化完成");

        Ok(Self {
            db_path,
            config_manager,
            order_store,
            import_api,
        })
    }
}

/// 获取默认数据库路径
///
/// # 优先级
/// 1. 环境变量 ORDER_IMPORT_DB_PATH
/// 2. 用户数据目录下的 order-import/orders.db
/// 3. 当前目录 ./orders.db
pub fn get_default_db_path() -> String {
    use std::path::PathBuf;

    if let Ok(path) = std::env::var("ORDER_IMPORT_DB_PATH") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./orders.db");

    if let Some(data_dir) = dirs::data_dir() {
        let dir = data_dir.join("order-import");
        // 目录创建失败时回退到当前目录
        if std::fs::create_dir_all(&dir).is_ok() {
            path = dir.join("orders.db");
        }
    }

    path.to_string_lossy().to_string()
}
