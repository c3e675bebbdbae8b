// ==========================================
// 订单导入管道 - 领域类型定义
// ==========================================
// 职责: 标准字段、付款状态、运行模式/状态等枚举
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 标准字段 (Canonical Field)
// ==========================================
// 所有导入文件最终都归一到这组字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalField {
    CustomerName,
    PhoneNumber,
    Email,
    FacebookHandle,
    OrderDate,
    TotalAmount,
    Currency,
    Status,
    Notes,
    Items,
}

impl CanonicalField {
    /// 全部标准字段（映射顺序即声明顺序）
    pub const ALL: [CanonicalField; 10] = [
        CanonicalField::CustomerName,
        CanonicalField::PhoneNumber,
        CanonicalField::Email,
        CanonicalField::FacebookHandle,
        CanonicalField::OrderDate,
        CanonicalField::TotalAmount,
        CanonicalField::Currency,
        CanonicalField::Status,
        CanonicalField::Notes,
        CanonicalField::Items,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CanonicalField::CustomerName => "customer_name",
            CanonicalField::PhoneNumber => "phone_number",
            CanonicalField::Email => "email",
            CanonicalField::FacebookHandle => "facebook_handle",
            CanonicalField::OrderDate => "order_date",
            CanonicalField::TotalAmount => "total_amount",
            CanonicalField::Currency => "currency",
            CanonicalField::Status => "status",
            CanonicalField::Notes => "notes",
            CanonicalField::Items => "items",
        }
    }

    /// 解析字段名（大小写/空白不敏感）
    pub fn parse(name: &str) -> Option<Self> {
        let key = name.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        CanonicalField::ALL.into_iter().find(|f| f.as_str() == key)
    }

    /// 模板中推荐使用的表头
    pub fn recommended_header(&self) -> &'static str {
        match self {
            CanonicalField::CustomerName => "Customer Name",
            CanonicalField::PhoneNumber => "Phone Number",
            CanonicalField::Email => "Email",
            CanonicalField::FacebookHandle => "Facebook",
            CanonicalField::OrderDate => "Order Date",
            CanonicalField::TotalAmount => "Total Amount",
            CanonicalField::Currency => "Currency",
            CanonicalField::Status => "Payment Status",
            CanonicalField::Notes => "Notes",
            CanonicalField::Items => "Items",
        }
    }

    /// 是否属于客户身份字段（姓名/电话至少映射其一）
    pub fn is_identity(&self) -> bool {
        matches!(self, CanonicalField::CustomerName | CanonicalField::PhoneNumber)
    }
}

impl fmt::Display for CanonicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ==========================================
// 付款状态 (Payment Status)
// ==========================================
// 序列化格式: SCREAMING_SNAKE_CASE (与数据库一致)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Paid,
    #[default]
    Unpaid,
    Partial,
    Refunded,
    Cancelled,
}

impl PaymentStatus {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            PaymentStatus::Paid => "PAID",
            PaymentStatus::Unpaid => "UNPAID",
            PaymentStatus::Partial => "PARTIAL",
            PaymentStatus::Refunded => "REFUNDED",
            PaymentStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db_str())
    }
}

// ==========================================
// 运行模式 (Run Mode)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportMode {
    DryRun,  // 预览: 只校验不写库
    Execute, // 执行: 分批写库
}

// ==========================================
// 运行状态机 (Run State)
// ==========================================
// Idle → Validating → (DryRun: Previewing → Done) | (Execute: Inserting → Done)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Idle,
    Validating,
    Previewing,
    Inserting,
    Done,
}

impl RunState {
    /// 状态转换是否合法
    pub fn can_transition_to(&self, next: RunState, mode: ImportMode) -> bool {
        matches!(
            (self, next, mode),
            (RunState::Idle, RunState::Validating, _)
                | (RunState::Validating, RunState::Previewing, ImportMode::DryRun)
                | (RunState::Validating, RunState::Inserting, ImportMode::Execute)
                | (RunState::Previewing, RunState::Done, ImportMode::DryRun)
                | (RunState::Inserting, RunState::Done, ImportMode::Execute)
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Idle => write!(f, "IDLE"),
            RunState::Validating => write!(f, "VALIDATING"),
            RunState::Previewing => write!(f, "PREVIEWING"),
            RunState::Inserting => write!(f, "INSERTING"),
            RunState::Done => write!(f, "DONE"),
        }
    }
}

// ==========================================
// 结束方式 (Termination)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Termination {
    #[default]
    Completed,
    Cancelled, // 调用方主动取消
    TimedOut,  // 超过整体时限
}

// ==========================================
// 指纹模式 (Fingerprint Mode)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FingerprintMode {
    /// 客户身份 + 日期 + 金额
    #[default]
    Coarse,
    /// 额外包含明细行内容
    WithLineItems,
}

impl FingerprintMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "COARSE" => Some(FingerprintMode::Coarse),
            "WITH_LINE_ITEMS" | "STRICT" => Some(FingerprintMode::WithLineItems),
            _ => None,
        }
    }
}

// ==========================================
// 表头匹配方式 (Match Method)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "method")]
pub enum MatchMethod {
    Manual,
    Exact,
    Synonym,
    Fuzzy { score: f64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_field_parse() {
        assert_eq!(CanonicalField::parse("order_date"), Some(CanonicalField::OrderDate));
        assert_eq!(CanonicalField::parse(" Phone Number "), Some(CanonicalField::PhoneNumber));
        assert_eq!(CanonicalField::parse("unknown"), None);
    }

    #[test]
    fn test_run_state_transitions() {
        assert!(RunState::Idle.can_transition_to(RunState::Validating, ImportMode::DryRun));
        assert!(RunState::Validating.can_transition_to(RunState::Previewing, ImportMode::DryRun));
        assert!(!RunState::Validating.can_transition_to(RunState::Inserting, ImportMode::DryRun));
        assert!(RunState::Inserting.can_transition_to(RunState::Done, ImportMode::Execute));
        assert!(!RunState::Previewing.can_transition_to(RunState::Inserting, ImportMode::Execute));
    }

    #[test]
    fn test_payment_status_serde() {
        let json = serde_json::to_string(&PaymentStatus::Paid).unwrap();
        assert_eq!(json, "\"PAID\"");
    }
}
