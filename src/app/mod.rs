// ==========================================
// 订单导入管道 - 应用层
// ==========================================
// 职责: 组装共享状态，连接 CLI 与 API 层
// ==========================================

pub mod state;

// 重导出
pub use state::{get_default_db_path, AppState};
