// ==========================================
// 订单导入管道 - API层错误类型
// ==========================================
// 职责: 定义API层错误类型，把导入层/仓储层错误转换为调用方可读的消息
// ==========================================

use crate::importer::error::ImportError;
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// API层错误类型
/// 所有错误信息必须包含显式原因
#[derive(Error, Debug)]
pub enum ApiError {
    // ==========================================
    // 输入错误
    // ==========================================
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unsupported file: {0}")]
    UnsupportedFile(String),

    #[error("cannot read file: {0}")]
    FileFormatError(String),

    /// 必填列映射失败（附带缺失字段，供前端提示手工映射）
    #[error("column mapping failed: {message}")]
    MappingFailed {
        message: String,
        missing: Vec<String>,
    },

    // ==========================================
    // 运行控制
    // ==========================================
    #[error("import timed out: {0}")]
    Timeout(String),

    #[error("import cancelled: {0}")]
    Cancelled(String),

    // ==========================================
    // 数据访问错误
    // ==========================================
    #[error("order store error: {0}")]
    StoreError(String),

    #[error("database error: {0}")]
    DatabaseError(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    // ==========================================
    // 通用错误
    // ==========================================
    #[error("internal error: {0}")]
    InternalError(String),
}

// ==========================================
// 从 ImportError 转换
// ==========================================
impl From<ImportError> for ApiError {
    fn from(err: ImportError) -> Self {
        let message = err.to_string();
        match err {
            ImportError::UnsupportedFormat(msg) => ApiError::UnsupportedFile(msg),
            ImportError::FormatError(msg) => ApiError::FileFormatError(msg),
            ImportError::MissingHeader => ApiError::FileFormatError(message),
            ImportError::MappingError { missing, .. } => ApiError::MappingFailed {
                message,
                missing: missing.iter().map(|f| f.as_str().to_string()).collect(),
            },
            ImportError::UnknownOverrideHeader { .. } => ApiError::InvalidInput(message),
            ImportError::StoreError(msg) => ApiError::StoreError(msg),
            ImportError::Timeout { stage } => ApiError::Timeout(format!("stage {}", stage)),
            ImportError::Cancelled { stage } => ApiError::Cancelled(format!("before {}", stage)),
            ImportError::ConfigError { .. } => ApiError::ConfigError(message),
            ImportError::InternalError(msg) => ApiError::InternalError(msg),
        }
    }
}

// ==========================================
// 从 RepositoryError 转换
// ==========================================
impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Unavailable(_) | RepositoryError::Timeout(_) => {
                ApiError::StoreError(err.to_string())
            }
            RepositoryError::DatabaseConnectionError(msg)
            | RepositoryError::DatabaseTransactionError(msg)
            | RepositoryError::DatabaseQueryError(msg)
            | RepositoryError::LockError(msg) => ApiError::DatabaseError(msg),
            RepositoryError::UniqueConstraintViolation(_)
            | RepositoryError::ForeignKeyViolation(_)
            | RepositoryError::FieldValueError { .. } => ApiError::InvalidInput(err.to_string()),
            RepositoryError::InternalError(msg) => ApiError::InternalError(msg),
        }
    }
}

/// API层Result类型别名
pub type ApiResult<T> = Result<T, ApiError>;
