// ==========================================
// 订单导入管道 - 数据清洗器实现
// ==========================================
// 职责: 单元格级解析（日期 / 金额+币种 / 电话 / 邮箱 / FB 账号 / 付款状态 / 明细）
// 约定: 解析失败返回面向用户的英文消息，由行转换器决定是错误还是警告
// ==========================================

use crate::domain::{LineItem, PaymentStatus};
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime};

/// 字段解析结果（Err 为面向用户的消息）
pub type FieldResult<T> = Result<T, String>;

// 可接受的订单年份
const MIN_ORDER_YEAR: i32 = 1900;
const MAX_ORDER_YEAR: i32 = 2100;

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%Y.%m.%d",
    "%d/%m/%Y",
    "%d-%m-%Y",
    "%d.%m.%Y",
    "%m/%d/%Y", // 日在前不成立时的回退
    "%d %b %Y",
    "%d %B %Y",
    "%d-%b-%Y",
    "%b %d, %Y",
    "%B %d, %Y",
    "%b %d %Y",
    // 两位年份（00-68 → 20xx，69-99 → 19xx）
    "%d/%m/%y",
    "%d-%m-%y",
    "%d.%m.%y",
    "%m/%d/%y",
];

// (符号, ISO 币种)；长符号在前
const CURRENCY_SYMBOLS: &[(&str, &str)] = &[
    ("US$", "USD"),
    ("S$", "SGD"),
    ("RM", "MYR"),
    ("Rp", "IDR"),
    ("€", "EUR"),
    ("£", "GBP"),
    ("¥", "JPY"),
    ("₱", "PHP"),
    ("฿", "THB"),
    ("$", "USD"),
];

// 金额单元格中可识别的 ISO 币种代码
const ISO_CURRENCY_CODES: &[&str] = &[
    "MYR", "SGD", "USD", "EUR", "GBP", "JPY", "IDR", "PHP", "THB", "BND", "AUD", "NZD", "CAD",
    "CHF", "CNY", "HKD", "TWD", "KRW", "INR", "VND",
];

/// 解析后的金额
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedAmount {
    pub value: f64,
    pub currency: Option<String>,
}

// ==========================================
// DataCleaner
// ==========================================
pub struct DataCleaner {
    default_country_code: String,
}

impl DataCleaner {
    pub fn new(default_country_code: impl Into<String>) -> Self {
        Self {
            default_country_code: default_country_code.into(),
        }
    }

    /// 清洗客户姓名（合并连续空白）
    pub fn clean_name(&self, value: &str) -> Option<String> {
        let name = value.split_whitespace().collect::<Vec<_>>().join(" ");
        if name.is_empty() {
            None
        } else {
            Some(name)
        }
    }

    // ===== 日期 =====

    /// 解析订单日期
    ///
    /// # 支持
    /// - YYYY-MM-DD / YYYY/MM/DD / YYYYMMDD
    /// - DD/MM/YYYY / DD-MM-YYYY / DD.MM.YYYY（日在前优先）
    /// - MM/DD/YYYY（日在前不成立时）
    /// - D Mon YYYY / Mon D, YYYY
    /// - DD/MM/YY 等两位年份
    /// - 日期时间 / RFC 3339（只保留日期部分）
    ///
    /// # 说明
    /// - 年份须在 1900..=2100 内，不会把 "01/03/24" 读成 0001 年
    /// - 纯数字不按 Excel 序列值解释；工作表日期单元格在解码时已转为 ISO 文本
    pub fn parse_date(&self, value: &str) -> FieldResult<NaiveDate> {
        let value = value.trim();
        if value.is_empty() {
            return Err("order date is empty".to_string());
        }

        if let Some(date) = parse_date_only(value) {
            return Ok(date);
        }

        if let Some(date) = DateTime::parse_from_rfc3339(value)
            .ok()
            .map(|dt| dt.date_naive())
            .filter(is_plausible_order_date)
        {
            return Ok(date);
        }

        // 日期时间：取首段日期
        if let Some((head, _)) = value.split_once(|c: char| c == 'T' || c.is_whitespace()) {
            if let Some(date) = parse_date_only(head) {
                return Ok(date);
            }
        }

        Err(format!("cannot parse order date '{}'", value))
    }

    // ===== 金额 =====

    /// 解析金额（可带币种符号/代码、千分位、括号负数）
    ///
    /// # 说明
    /// - 返回值可能为负，非负校验由调用方负责
    pub fn parse_amount(&self, value: &str) -> FieldResult<ParsedAmount> {
        let original = value.trim();
        let mut s: String = original
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '\'' && *c != '\u{a0}')
            .collect();
        if s.is_empty() {
            return Err("amount is empty".to_string());
        }

        let mut negative = false;
        if s.starts_with('(') && s.ends_with(')') && s.len() >= 2 {
            negative = true;
            s = s[1..s.len() - 1].to_string();
        }
        if let Some(rest) = s.strip_prefix('-') {
            negative = !negative;
            s = rest.to_string();
        }

        let (rest, currency) = strip_currency(&s);
        s = rest;
        if let Some(rest) = s.strip_prefix('-') {
            negative = !negative;
            s = rest.to_string();
        }

        let number = normalize_number(&s)
            .ok_or_else(|| format!("cannot parse amount '{}'", original))?;
        let mut amount: f64 = number
            .parse()
            .map_err(|_| format!("cannot parse amount '{}'", original))?;
        if !amount.is_finite() {
            return Err(format!("cannot parse amount '{}'", original));
        }
        if negative {
            amount = -amount;
        }

        Ok(ParsedAmount {
            value: amount,
            currency,
        })
    }

    /// 标准化币种代码（3 位字母）
    pub fn normalize_currency(&self, value: &str) -> FieldResult<String> {
        let trimmed = value.trim();
        if let Some((_, code)) = CURRENCY_SYMBOLS
            .iter()
            .find(|(symbol, _)| symbol.eq_ignore_ascii_case(trimmed))
        {
            return Ok(code.to_string());
        }
        let code = trimmed.to_ascii_uppercase();
        if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) {
            Ok(code)
        } else {
            Err(format!("unknown currency '{}'", trimmed))
        }
    }

    // ===== 电话 =====

    /// 标准化电话号码为 +<国家码><号码>
    ///
    /// # 规则
    /// - 去掉非数字字符；00 前缀视为 +
    /// - 无国家码时去掉国内冠码 0，补缺省国家码
    /// - 号码部分至少 7 位，含国家码不超过 15 位
    pub fn normalize_phone(&self, value: &str) -> FieldResult<String> {
        let trimmed = value.trim();
        let mut international = trimmed.starts_with('+');
        let mut digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();

        if !international {
            if let Some(rest) = digits.strip_prefix("00") {
                digits = rest.to_string();
                international = true;
            }
        }

        let cc = &self.default_country_code;
        let (provided, full) = if international {
            (digits.len(), digits)
        } else if let Some(national) = digits.strip_prefix('0') {
            (national.len(), format!("{}{}", cc, national))
        } else if !cc.is_empty() && digits.starts_with(cc.as_str()) && digits.len() >= cc.len() + 8
        {
            // 已带国家码但缺 +
            (digits.len(), digits)
        } else {
            (digits.len(), format!("{}{}", cc, digits))
        };

        if provided < 7 || full.len() > 15 {
            return Err(format!("invalid phone number '{}'", trimmed));
        }
        Ok(format!("+{}", full))
    }

    // ===== 邮箱 / FB =====

    /// 邮箱小写化；形状可疑时返回警告
    pub fn clean_email(&self, value: &str) -> (Option<String>, Option<String>) {
        let email = value.trim().to_lowercase();
        if email.is_empty() {
            return (None, None);
        }
        let well_formed = match email.split_once('@') {
            Some((local, domain)) => {
                !local.is_empty()
                    && !domain.contains('@')
                    && domain.contains('.')
                    && !domain.starts_with('.')
                    && !domain.ends_with('.')
                    && !email.contains(char::is_whitespace)
            }
            None => false,
        };
        let warning = if well_formed {
            None
        } else {
            Some(format!("email '{}' looks invalid", email))
        };
        (Some(email), warning)
    }

    /// 清洗 FB 账号（去掉 URL 前缀与 @）
    pub fn clean_facebook_handle(&self, value: &str) -> Option<String> {
        let mut handle = value.trim();
        for prefix in ["https://", "http://"] {
            if let Some(rest) = strip_prefix_ignore_case(handle, prefix) {
                handle = rest;
            }
        }
        for prefix in ["www.", "m.", "web."] {
            if let Some(rest) = strip_prefix_ignore_case(handle, prefix) {
                handle = rest;
            }
        }
        for prefix in ["facebook.com/", "fb.com/", "fb.me/"] {
            if let Some(rest) = strip_prefix_ignore_case(handle, prefix) {
                handle = rest;
            }
        }
        let handle = handle.split(['?', '#']).next().unwrap_or("");
        let handle = handle.trim_start_matches('@').trim_end_matches('/').trim();
        if handle.is_empty() {
            None
        } else {
            Some(handle.to_string())
        }
    }

    // ===== 付款状态 =====

    /// 解析付款状态；空值为 UNPAID，未知值为 UNPAID 并返回警告
    pub fn parse_status(&self, value: &str) -> (PaymentStatus, Option<String>) {
        let key: String = value
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { ' ' })
            .collect::<String>()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");

        let status = match key.as_str() {
            "" => return (PaymentStatus::Unpaid, None),
            "paid" | "fully paid" | "done" | "complete" | "completed" | "settled" | "lunas"
            | "sudah bayar" | "yes" | "y" | "true" | "1" => PaymentStatus::Paid,
            "unpaid" | "not paid" | "pending" | "due" | "belum bayar" | "no" | "n" | "false"
            | "0" | "cod" => PaymentStatus::Unpaid,
            "partial" | "partially paid" | "part paid" | "deposit" | "dp" | "half paid" => {
                PaymentStatus::Partial
            }
            "refunded" | "refund" | "returned" => PaymentStatus::Refunded,
            "cancelled" | "canceled" | "cancel" | "void" | "batal" => PaymentStatus::Cancelled,
            _ => {
                return (
                    PaymentStatus::Unpaid,
                    Some(format!(
                        "unknown payment status '{}', defaulted to UNPAID",
                        value.trim()
                    )),
                )
            }
        };
        (status, None)
    }

    // ===== 明细 =====

    /// 解析明细单元格: `Name x2 @ 10.00; Other`
    ///
    /// # 返回
    /// - (明细列表, 警告列表)
    pub fn parse_items(&self, value: &str) -> (Vec<LineItem>, Vec<String>) {
        let mut items = Vec::new();
        let mut warnings = Vec::new();

        for part in value.split([';', '\n']).map(str::trim).filter(|p| !p.is_empty()) {
            let (name_part, price_part) = match part.rsplit_once('@') {
                Some((name, price)) => (name.trim(), Some(price.trim())),
                None => (part, None),
            };

            let unit_price = match price_part {
                Some(price) => match self.parse_amount(price) {
                    Ok(parsed) if parsed.value >= 0.0 => Some(parsed.value),
                    _ => {
                        warnings.push(format!("item '{}': cannot parse unit price", part));
                        None
                    }
                },
                None => None,
            };

            let (name, quantity) = split_quantity(name_part);
            if name.is_empty() {
                warnings.push(format!("item '{}': missing item name", part));
                continue;
            }
            if quantity == 0 {
                warnings.push(format!("item '{}': quantity must be at least 1", part));
                continue;
            }

            items.push(LineItem {
                name,
                quantity,
                unit_price,
            });
        }

        (items, warnings)
    }
}

/// Excel 序列值 → 日期时间（1900 日期系统，基准 1899-12-30）
pub fn excel_serial_to_datetime(serial: f64) -> Option<NaiveDateTime> {
    if !serial.is_finite() || serial < 0.0 {
        return None;
    }
    let days = serial.trunc() as i64;
    let seconds = ((serial - serial.trunc()) * 86_400.0).round() as i64;
    NaiveDate::from_ymd_opt(1899, 12, 30)?
        .and_hms_opt(0, 0, 0)?
        .checked_add_signed(Duration::days(days))?
        .checked_add_signed(Duration::seconds(seconds))
}

fn parse_date_only(value: &str) -> Option<NaiveDate> {
    if value.len() == 8 && value.chars().all(|c| c.is_ascii_digit()) {
        let year = value[0..4].parse().ok()?;
        let month = value[4..6].parse().ok()?;
        let day = value[6..8].parse().ok()?;
        return NaiveDate::from_ymd_opt(year, month, day).filter(is_plausible_order_date);
    }
    DATE_FORMATS.iter().find_map(|fmt| {
        NaiveDate::parse_from_str(value, fmt)
            .ok()
            .filter(is_plausible_order_date)
    })
}

fn is_plausible_order_date(date: &NaiveDate) -> bool {
    (MIN_ORDER_YEAR..=MAX_ORDER_YEAR).contains(&date.year())
}

/// 剥离币种符号/代码（前缀或后缀）
fn strip_currency(s: &str) -> (String, Option<String>) {
    for (symbol, code) in CURRENCY_SYMBOLS {
        if let Some(rest) = strip_prefix_ignore_case(s, symbol) {
            return (rest.to_string(), Some(code.to_string()));
        }
        if let Some(rest) = strip_suffix_ignore_case(s, symbol) {
            return (rest.to_string(), Some(code.to_string()));
        }
    }

    let leading: String = s.chars().take_while(|c| c.is_ascii_alphabetic()).collect();
    if is_known_iso_code(&leading) {
        return (s[3..].to_string(), Some(leading.to_ascii_uppercase()));
    }
    let trailing_len = s.chars().rev().take_while(|c| c.is_ascii_alphabetic()).count();
    if trailing_len == 3 && is_known_iso_code(&s[s.len() - 3..]) {
        let split = s.len() - 3;
        return (s[..split].to_string(), Some(s[split..].to_ascii_uppercase()));
    }
    (s.to_string(), None)
}

fn is_known_iso_code(code: &str) -> bool {
    code.len() == 3
        && ISO_CURRENCY_CODES
            .iter()
            .any(|known| known.eq_ignore_ascii_case(code))
}

/// 统一千分位/小数点写法为 Rust 可解析的数字
///
/// # 规则
/// - 同时含 , 和 . → 靠后的是小数点
/// - 只含一个 , 且其后不是 3 位 → 小数逗号
/// - 多个相同分隔符 → 千分位
fn normalize_number(s: &str) -> Option<String> {
    if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit() || c == ',' || c == '.') {
        return None;
    }
    let commas = s.matches(',').count();
    let dots = s.matches('.').count();

    let normalized = match (commas, dots) {
        (0, 0) | (0, 1) => s.to_string(),
        (0, _) => s.replace('.', ""),
        (1, 0) => {
            let decimals = s.len() - s.find(',')? - 1;
            if decimals == 3 {
                s.replace(',', "")
            } else {
                s.replace(',', ".")
            }
        }
        (_, 0) => s.replace(',', ""),
        _ => {
            let last_comma = s.rfind(',')?;
            let last_dot = s.rfind('.')?;
            if last_comma > last_dot {
                if commas > 1 {
                    return None;
                }
                s.replace('.', "").replace(',', ".")
            } else {
                if dots > 1 {
                    return None;
                }
                s.replace(',', "")
            }
        }
    };

    if normalized.is_empty() || normalized == "." {
        None
    } else {
        Some(normalized)
    }
}

/// 拆分数量写法: "Name x2" / "Name x 2" / "Name * 2" / "2x Name"
fn split_quantity(value: &str) -> (String, u32) {
    let tokens: Vec<&str> = value.split_whitespace().collect();
    let is_marker = |t: &str| matches!(t.to_lowercase().as_str(), "x" | "×" | "*");
    let strip_marker = |t: &str| -> Option<u32> {
        let lower = t.to_lowercase();
        let digits = lower
            .strip_prefix('x')
            .or_else(|| lower.strip_prefix('×'))
            .or_else(|| lower.strip_prefix('*'))
            .or_else(|| lower.strip_suffix('x'))?;
        digits.parse().ok()
    };

    match tokens.as_slice() {
        [name @ .., marker, qty] if is_marker(marker) && !name.is_empty() => {
            if let Ok(q) = qty.parse() {
                return (name.join(" "), q);
            }
        }
        [name @ .., last] if !name.is_empty() => {
            if let Some(q) = strip_marker(last) {
                return (name.join(" "), q);
            }
        }
        _ => {}
    }
    if let [first, rest @ ..] = tokens.as_slice() {
        if !rest.is_empty() {
            if let Some(q) = strip_marker(first) {
                return (rest.join(" "), q);
            }
        }
    }
    (tokens.join(" "), 1)
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() >= prefix.len()
        && s.is_char_boundary(prefix.len())
        && s[..prefix.len()].eq_ignore_ascii_case(prefix)
    {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}

fn strip_suffix_ignore_case<'a>(s: &'a str, suffix: &str) -> Option<&'a str> {
    if s.len() >= suffix.len() {
        let split = s.len() - suffix.len();
        if s.is_char_boundary(split) && s[split..].eq_ignore_ascii_case(suffix) {
            return Some(&s[..split]);
        }
    }
    None
}
