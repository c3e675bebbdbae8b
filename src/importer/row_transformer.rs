// ==========================================
// 订单导入管道 - 行转换器实现
// ==========================================
// 阶段 2: RawRow + FieldMapping → RowOutcome（Valid / Invalid）
// 约定: 不抛错；同一行的全部问题一起收集
// ==========================================

use crate::config::ImportConfig;
use crate::domain::{
    CanonicalField, CustomerIdentity, FieldMapping, ImportRow, LineItem, RawRow, RowIssue,
    RowOutcome,
};
use crate::importer::data_cleaner::DataCleaner;
use crate::importer::order_importer_trait::RowTransform;

pub struct RowTransformer {
    cleaner: DataCleaner,
    default_currency: String,
}

impl RowTransformer {
    pub fn new(default_country_code: impl Into<String>, default_currency: impl Into<String>) -> Self {
        Self {
            cleaner: DataCleaner::new(default_country_code),
            default_currency: default_currency.into(),
        }
    }

    pub fn from_config(config: &ImportConfig) -> Self {
        Self::new(
            config.default_country_code.clone(),
            config.default_currency.clone(),
        )
    }

    /// 取映射列的单元格（去空白，空串视为缺失）
    fn cell<'a>(
        &self,
        row: &'a RawRow,
        mapping: &FieldMapping,
        field: CanonicalField,
    ) -> Option<&'a str> {
        mapping
            .header_for(field)
            .and_then(|header| row.get(header))
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    fn customer(
        &self,
        row: &RawRow,
        mapping: &FieldMapping,
        errors: &mut Vec<RowIssue>,
        warnings: &mut Vec<RowIssue>,
    ) -> CustomerIdentity {
        let name = self
            .cell(row, mapping, CanonicalField::CustomerName)
            .and_then(|v| self.cleaner.clean_name(v));

        let phone = match self.cell(row, mapping, CanonicalField::PhoneNumber) {
            None => None,
            Some(raw) => match self.cleaner.normalize_phone(raw) {
                Ok(phone) => Some(phone),
                Err(message) if name.is_some() => {
                    warnings.push(RowIssue::warning(
                        Some(CanonicalField::PhoneNumber),
                        format!("{}, phone dropped", message),
                    ));
                    None
                }
                Err(message) => {
                    errors.push(RowIssue::error(Some(CanonicalField::PhoneNumber), message));
                    None
                }
            },
        };

        if name.is_none() && phone.is_none() {
            errors.push(RowIssue::error(
                None,
                "customer name or a valid phone number is required",
            ));
        }

        let email = match self.cell(row, mapping, CanonicalField::Email) {
            None => None,
            Some(raw) => {
                let (email, warning) = self.cleaner.clean_email(raw);
                if let Some(message) = warning {
                    warnings.push(RowIssue::warning(Some(CanonicalField::Email), message));
                }
                email
            }
        };

        let facebook_handle = self
            .cell(row, mapping, CanonicalField::FacebookHandle)
            .and_then(|v| self.cleaner.clean_facebook_handle(v));

        CustomerIdentity {
            name,
            phone,
            email,
            facebook_handle,
        }
    }

    /// 金额 + 币种
    ///
    /// # 规则
    /// - 金额为空: 有带单价的明细时按明细求和，否则为 0；两种情况都带警告
    /// - 金额为负: 错误
    /// - 金额与明细合计相差超过 1 个最小单位: 警告
    fn amount_and_currency(
        &self,
        row: &RawRow,
        mapping: &FieldMapping,
        items: &[LineItem],
        errors: &mut Vec<RowIssue>,
        warnings: &mut Vec<RowIssue>,
    ) -> (f64, String) {
        let items_total: Option<f64> = {
            let priced: Vec<f64> = items.iter().filter_map(LineItem::subtotal).collect();
            if priced.is_empty() {
                None
            } else {
                Some(priced.iter().sum())
            }
        };

        let mut detected_currency = None;
        let amount = match self.cell(row, mapping, CanonicalField::TotalAmount) {
            Some(raw) => match self.cleaner.parse_amount(raw) {
                Ok(parsed) if parsed.value < 0.0 => {
                    errors.push(RowIssue::error(
                        Some(CanonicalField::TotalAmount),
                        "amount must be non-negative",
                    ));
                    0.0
                }
                Ok(parsed) => {
                    detected_currency = parsed.currency;
                    if let Some(total) = items_total {
                        let diff = ((parsed.value - total) * 100.0).round().abs();
                        if diff > 1.0 {
                            warnings.push(RowIssue::warning(
                                Some(CanonicalField::TotalAmount),
                                format!(
                                    "amount {:.2} differs from line item total {:.2}",
                                    parsed.value, total
                                ),
                            ));
                        }
                    }
                    parsed.value
                }
                Err(message) => {
                    errors.push(RowIssue::error(Some(CanonicalField::TotalAmount), message));
                    0.0
                }
            },
            None => match items_total {
                Some(total) => {
                    warnings.push(RowIssue::warning(
                        Some(CanonicalField::TotalAmount),
                        format!("amount is empty, derived {:.2} from line items", total),
                    ));
                    total
                }
                None => {
                    warnings.push(RowIssue::warning(
                        Some(CanonicalField::TotalAmount),
                        "amount is empty, defaulted to 0",
                    ));
                    0.0
                }
            },
        };

        let column_currency = match self.cell(row, mapping, CanonicalField::Currency) {
            None => None,
            Some(raw) => match self.cleaner.normalize_currency(raw) {
                Ok(code) => Some(code),
                Err(message) => {
                    warnings.push(RowIssue::warning(Some(CanonicalField::Currency), message));
                    None
                }
            },
        };

        let currency = match (column_currency, detected_currency) {
            (Some(column), Some(detected)) => {
                if column != detected {
                    warnings.push(RowIssue::warning(
                        Some(CanonicalField::Currency),
                        format!(
                            "currency column says {} but amount is written in {}",
                            column, detected
                        ),
                    ));
                }
                column
            }
            (Some(column), None) => column,
            (None, Some(detected)) => detected,
            (None, None) => self.default_currency.clone(),
        };

        (amount, currency)
    }
}

impl RowTransform for RowTransformer {
    fn transform(&self, row: &RawRow, mapping: &FieldMapping) -> RowOutcome {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        let customer = self.customer(row, mapping, &mut errors, &mut warnings);

        let order_date = match self.cell(row, mapping, CanonicalField::OrderDate) {
            None => {
                errors.push(RowIssue::error(
                    Some(CanonicalField::OrderDate),
                    "order date is empty",
                ));
                None
            }
            Some(raw) => match self.cleaner.parse_date(raw) {
                Ok(date) => Some(date),
                Err(message) => {
                    errors.push(RowIssue::error(Some(CanonicalField::OrderDate), message));
                    None
                }
            },
        };

        let items = match self.cell(row, mapping, CanonicalField::Items) {
            None => Vec::new(),
            Some(raw) => {
                let (items, item_warnings) = self.cleaner.parse_items(raw);
                warnings.extend(
                    item_warnings
                        .into_iter()
                        .map(|m| RowIssue::warning(Some(CanonicalField::Items), m)),
                );
                items
            }
        };

        let (total_amount, currency) =
            self.amount_and_currency(row, mapping, &items, &mut errors, &mut warnings);

        let status = match self.cell(row, mapping, CanonicalField::Status) {
            None => Default::default(),
            Some(raw) => {
                let (status, warning) = self.cleaner.parse_status(raw);
                if let Some(message) = warning {
                    warnings.push(RowIssue::warning(Some(CanonicalField::Status), message));
                }
                status
            }
        };

        let notes = self
            .cell(row, mapping, CanonicalField::Notes)
            .map(str::to_string);

        match order_date {
            Some(order_date) if errors.is_empty() => RowOutcome::Valid(ImportRow {
                row_number: row.row_number,
                customer,
                order_date,
                currency,
                total_amount,
                status,
                notes,
                items,
                warnings,
            }),
            _ => {
                let label = customer.label();
                RowOutcome::Invalid {
                    row_number: row.row_number,
                    customer: if label == "-" { None } else { Some(label) },
                    reasons: errors,
                    warnings,
                }
            }
        }
    }
}
