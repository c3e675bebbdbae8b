// ==========================================
// 订单导入管道 - 导入模块错误类型
// ==========================================
// 工具: thiserror 派生宏
// 约定: 只有致命错误走 Err；行级问题记录在 RowOutcome 中
// ==========================================

use crate::domain::{CanonicalField, FieldMapping};
use crate::repository::RepositoryError;
use thiserror::Error;

/// 导入模块错误类型
#[derive(Error, Debug)]
pub enum ImportError {
    // ===== 文件相关错误（致命）=====
    #[error("file format not supported: {0}")]
    UnsupportedFormat(String),

    #[error("cannot decode file: {0}")]
    FormatError(String),

    #[error("no header row found in file")]
    MissingHeader,

    // ===== 映射错误（致命）=====
    #[error("required columns could not be mapped: {}", join_fields(.missing))]
    MappingError {
        missing: Vec<CanonicalField>,
        detected_headers: Vec<String>,
        partial: Box<FieldMapping>,
    },

    #[error("manual mapping for {field} names header '{header}' which is not in the file")]
    UnknownOverrideHeader {
        field: CanonicalField,
        header: String,
    },

    // ===== 订单库错误 =====
    #[error("order store error: {0}")]
    StoreError(String),

    // ===== 运行控制 =====
    #[error("import timed out during {stage}")]
    Timeout { stage: &'static str },

    #[error("import cancelled before {stage}")]
    Cancelled { stage: &'static str },

    // ===== 配置错误 =====
    #[error("invalid import configuration (key: {key}): {message}")]
    ConfigError { key: String, message: String },

    // ===== 通用错误 =====
    #[error("internal error: {0}")]
    InternalError(String),
}

impl ImportError {
    /// 是否为映射类错误（对外接口按校验失败处理，而非异常）
    pub fn is_mapping_error(&self) -> bool {
        matches!(
            self,
            ImportError::MappingError { .. } | ImportError::UnknownOverrideHeader { .. }
        )
    }
}

fn join_fields(fields: &[CanonicalField]) -> String {
    fields
        .iter()
        .map(|f| f.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

// 实现 From<std::io::Error>
impl From<std::io::Error> for ImportError {
    fn from(err: std::io::Error) -> Self {
        ImportError::FormatError(err.to_string())
    }
}

// 实现 From<csv::Error>
impl From<csv::Error> for ImportError {
    fn from(err: csv::Error) -> Self {
        ImportError::FormatError(format!("CSV: {}", err))
    }
}

// 实现 From<calamine::Error>
impl From<calamine::Error> for ImportError {
    fn from(err: calamine::Error) -> Self {
        ImportError::FormatError(format!("spreadsheet: {}", err))
    }
}

// 实现 From<RepositoryError>
impl From<RepositoryError> for ImportError {
    fn from(err: RepositoryError) -> Self {
        ImportError::StoreError(err.to_string())
    }
}

/// Result 类型别名
pub type ImportResult<T> = Result<T, ImportError>;
