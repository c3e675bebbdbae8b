// ==========================================
// 订单导入管道 - 导入模板
// ==========================================
// 职责: 生成固定布局的 CSV 模板（推荐表头 + 两行示例）
// 约束: 模板本身可被管道完整导入（示例行均为 Valid）
// ==========================================

use crate::domain::CanonicalField;
use crate::importer::error::{ImportError, ImportResult};
use csv::WriterBuilder;

pub const TEMPLATE_FILE_NAME: &str = "order_import_template.csv";
pub const TEMPLATE_MIME_TYPE: &str = "text/csv";

/// 模板列顺序
pub const TEMPLATE_FIELDS: [CanonicalField; 10] = [
    CanonicalField::CustomerName,
    CanonicalField::PhoneNumber,
    CanonicalField::Email,
    CanonicalField::FacebookHandle,
    CanonicalField::OrderDate,
    CanonicalField::Currency,
    CanonicalField::TotalAmount,
    CanonicalField::Status,
    CanonicalField::Items,
    CanonicalField::Notes,
];

const EXAMPLE_ROWS: [[&str; 10]; 2] = [
    [
        "Jane Doe",
        "+60123456789",
        "jane@example.com",
        "jane.doe",
        "2024-03-01",
        "MYR",
        "150.00",
        "Paid",
        "Kek Lapis x2 @ 50.00; Brownies @ 50.00",
        "Deliver after 5pm",
    ],
    [
        "Ahmad Ali",
        "012-987 6543",
        "",
        "",
        "02/03/2024",
        "MYR",
        "45.50",
        "Unpaid",
        "Cookies x1 @ 45.50",
        "",
    ],
];

/// 模板表头
pub fn template_headers() -> Vec<&'static str> {
    TEMPLATE_FIELDS
        .iter()
        .map(|f| f.recommended_header())
        .collect()
}

/// 生成模板 CSV 字节
pub fn render_template() -> ImportResult<Vec<u8>> {
    let mut writer = WriterBuilder::new().from_writer(Vec::new());
    writer.write_record(template_headers())?;
    for row in EXAMPLE_ROWS {
        writer.write_record(row)?;
    }
    writer
        .into_inner()
        .map_err(|e| ImportError::InternalError(format!("cannot render template: {}", e)))
}
