// ==========================================
// 订单导入管道 - 文件解析器实现
// ==========================================
// 阶段 0: 字节载荷 → 表头 + 原始行序列
// 支持: 分隔符文本 (.csv/.tsv/.txt) / 电子表格 (.xlsx/.xlsm/.xls/.ods)
// ==========================================

use crate::domain::RawRow;
use crate::importer::data_cleaner::excel_serial_to_datetime;
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::order_importer_trait::TabularDecoder;
use calamine::{open_workbook_auto_from_rs, Data, Reader};
use csv::ReaderBuilder;
use std::collections::HashSet;
use std::io::Cursor;
use std::sync::Arc;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
const ZIP_MAGIC: &[u8] = &[0x50, 0x4B, 0x03, 0x04];
const OLE2_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
const DELIMITER_CANDIDATES: [u8; 4] = [b',', b';', b'\t', b'|'];

// ==========================================
// FilePayload - 上传文件
// ==========================================
#[derive(Debug, Clone)]
pub struct FilePayload {
    pub file_name: String,
    pub bytes: Arc<[u8]>,
}

impl FilePayload {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes: Arc::from(bytes.into()),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn extension(&self) -> Option<String> {
        self.file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.trim().to_ascii_lowercase())
    }
}

/// 表格格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabularFormat {
    Delimited { delimiter: u8 },
    Spreadsheet,
}

/// 判定文件格式
///
/// # 规则
/// 1. 扩展名优先
/// 2. 内容魔数（ZIP → xlsx，OLE2 → xls）
/// 3. 其余按分隔符文本处理（统计首个非空行中候选分隔符出现次数）
pub fn sniff_format(payload: &FilePayload) -> ImportResult<TabularFormat> {
    if payload.is_empty() {
        return Err(ImportError::FormatError("file is empty".to_string()));
    }

    match payload.extension().as_deref() {
        Some("tsv") => return Ok(TabularFormat::Delimited { delimiter: b'\t' }),
        Some("csv") | Some("txt") => {
            return Ok(TabularFormat::Delimited {
                delimiter: sniff_delimiter(decode_text(&payload.bytes)?),
            })
        }
        Some("xlsx") | Some("xlsm") | Some("xlsb") | Some("xls") | Some("ods") => {
            return Ok(TabularFormat::Spreadsheet)
        }
        _ => {}
    }

    let bytes = &payload.bytes[..];
    if bytes.starts_with(ZIP_MAGIC) || bytes.starts_with(OLE2_MAGIC) {
        return Ok(TabularFormat::Spreadsheet);
    }

    // 既非表格魔数也非 UTF-8 文本: 视为不支持的二进制文件
    let text = decode_text(bytes)
        .map_err(|_| ImportError::UnsupportedFormat(payload.file_name.clone()))?;
    if text.contains('\0') {
        return Err(ImportError::UnsupportedFormat(payload.file_name.clone()));
    }
    Ok(TabularFormat::Delimited {
        delimiter: sniff_delimiter(text),
    })
}

/// 选择首个非空行中出现次数最多的候选分隔符（并列取靠前者，全无则逗号）
pub fn sniff_delimiter(text: &str) -> u8 {
    let Some(line) = text.lines().find(|l| !l.trim().is_empty()) else {
        return b',';
    };

    let mut best = (b',', 0usize);
    for candidate in DELIMITER_CANDIDATES {
        let count = line.bytes().filter(|b| *b == candidate).count();
        if count > best.1 {
            best = (candidate, count);
        }
    }
    best.0
}

/// 去 BOM 后按 UTF-8 解码
///
/// # 返回
/// - Err(FormatError): 含非法 UTF-8 字节（如 Windows-1252 导出），不做有损替换
fn decode_text(bytes: &[u8]) -> ImportResult<&str> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    std::str::from_utf8(bytes).map_err(|e| {
        let line = bytes[..e.valid_up_to()].iter().filter(|b| **b == b'\n').count() + 1;
        ImportError::FormatError(format!(
            "file is not valid UTF-8 text (line {}, byte offset {}); save it as \"CSV UTF-8\" and retry",
            line,
            e.valid_up_to()
        ))
    })
}

// ==========================================
// DecodedTable - 解析结果
// ==========================================
// rows() 每次调用都从头开始遍历
#[derive(Debug, Clone)]
pub struct DecodedTable {
    format: TabularFormat,
    headers: Vec<String>,
    // (源列下标, 表头)
    columns: Vec<(usize, String)>,
    source: TableSource,
}

#[derive(Debug, Clone)]
enum TableSource {
    Delimited {
        text: Arc<str>,
        delimiter: u8,
        header_line: usize,
    },
    Grid {
        rows: Arc<Vec<GridRow>>,
        header_row: usize,
    },
}

#[derive(Debug, Clone)]
struct GridRow {
    row_number: usize,
    cells: Vec<String>,
}

impl DecodedTable {
    pub fn format(&self) -> TabularFormat {
        self.format
    }

    /// 检测到的表头（去空、去重，保持列顺序）
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// 数据行序列（跳过整行空白）
    pub fn rows(&self) -> Box<dyn Iterator<Item = ImportResult<RawRow>> + Send + '_> {
        match &self.source {
            TableSource::Delimited {
                text,
                delimiter,
                header_line,
            } => {
                let header_line = *header_line;
                let reader = delimited_reader(text.as_bytes(), *delimiter);
                Box::new(reader.into_records().filter_map(move |record| {
                    let record = match record {
                        Ok(record) => record,
                        Err(e) => return Some(Err(ImportError::from(e))),
                    };
                    let line = record.position().map(|p| p.line() as usize).unwrap_or(0);
                    if line <= header_line {
                        return None;
                    }
                    self.build_row(line, |idx| record.get(idx))
                }))
            }
            TableSource::Grid { rows, header_row } => {
                let header_row = *header_row;
                Box::new(rows.iter().filter(move |r| r.row_number > header_row).filter_map(
                    move |row| {
                        self.build_row(row.row_number, |idx| row.cells.get(idx).map(String::as_str))
                    },
                ))
            }
        }
    }

    fn build_row<'a>(
        &self,
        row_number: usize,
        cell_at: impl Fn(usize) -> Option<&'a str>,
    ) -> Option<ImportResult<RawRow>> {
        let cells = self
            .columns
            .iter()
            .map(|(idx, header)| {
                let value = cell_at(*idx).unwrap_or("").trim().to_string();
                (header.clone(), value)
            })
            .collect();
        let row = RawRow::new(row_number, cells);
        if row.is_blank() {
            None
        } else {
            Some(Ok(row))
        }
    }

    fn from_header_cells(
        format: TabularFormat,
        header_cells: Vec<String>,
        source: TableSource,
    ) -> Self {
        let mut seen = HashSet::new();
        let mut columns = Vec::new();
        for (idx, cell) in header_cells.into_iter().enumerate() {
            let header = cell.trim().to_string();
            // 空表头忽略；重名保留首个
            if header.is_empty() || !seen.insert(header.clone()) {
                continue;
            }
            columns.push((idx, header));
        }
        let headers = columns.iter().map(|(_, h)| h.clone()).collect();

        Self {
            format,
            headers,
            columns,
            source,
        }
    }
}

fn delimited_reader(bytes: &[u8], delimiter: u8) -> csv::Reader<&[u8]> {
    ReaderBuilder::new()
        .has_headers(false)
        .flexible(true) // 允许行长度不一致
        .delimiter(delimiter)
        .from_reader(bytes)
}

// ==========================================
// CSV Decoder 实现
// ==========================================
pub struct CsvDecoder {
    delimiter: Option<u8>,
}

impl CsvDecoder {
    /// 自动识别分隔符
    pub fn new() -> Self {
        Self { delimiter: None }
    }

    pub fn with_delimiter(delimiter: u8) -> Self {
        Self {
            delimiter: Some(delimiter),
        }
    }
}

impl Default for CsvDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl TabularDecoder for CsvDecoder {
    fn decode(&self, payload: &FilePayload) -> ImportResult<DecodedTable> {
        let text = decode_text(&payload.bytes)?;
        let delimiter = self.delimiter.unwrap_or_else(|| sniff_delimiter(text));

        // 表头 = 首个非空行
        let mut reader = delimited_reader(text.as_bytes(), delimiter);
        let mut header = None;
        for record in reader.records() {
            let record = record?;
            if record.iter().any(|c| !c.trim().is_empty()) {
                let line = record.position().map(|p| p.line() as usize).unwrap_or(1);
                header = Some((line, record.iter().map(str::to_string).collect::<Vec<_>>()));
                break;
            }
        }
        let (header_line, header_cells) = header.ok_or(ImportError::MissingHeader)?;

        tracing::debug!(
            file = %payload.file_name,
            delimiter = %(delimiter as char).escape_default(),
            header_line,
            "分隔符文本表头已识别"
        );

        Ok(DecodedTable::from_header_cells(
            TabularFormat::Delimited { delimiter },
            header_cells,
            TableSource::Delimited {
                text: Arc::from(text),
                delimiter,
                header_line,
            },
        ))
    }
}

// ==========================================
// Spreadsheet Decoder 实现
// ==========================================
// 只读第一个工作表
pub struct SpreadsheetDecoder;

impl TabularDecoder for SpreadsheetDecoder {
    fn decode(&self, payload: &FilePayload) -> ImportResult<DecodedTable> {
        let cursor = Cursor::new(payload.bytes.to_vec());
        let mut workbook = open_workbook_auto_from_rs(cursor)?;

        let range = workbook
            .worksheet_range_at(0)
            .ok_or_else(|| ImportError::FormatError("workbook has no worksheets".to_string()))??;

        // Range 可能不从 A1 开始，行号按工作表物理行计算
        let first_row = range.start().map(|(r, _)| r as usize).unwrap_or(0);
        let grid: Vec<GridRow> = range
            .rows()
            .enumerate()
            .map(|(offset, cells)| GridRow {
                row_number: first_row + offset + 1,
                cells: cells.iter().map(cell_to_string).collect(),
            })
            .collect();

        let header = grid
            .iter()
            .find(|r| r.cells.iter().any(|c| !c.trim().is_empty()))
            .ok_or(ImportError::MissingHeader)?;
        let header_row = header.row_number;
        let header_cells = header.cells.clone();

        tracing::debug!(
            file = %payload.file_name,
            header_row,
            sheet_rows = grid.len(),
            "工作表表头已识别"
        );

        Ok(DecodedTable::from_header_cells(
            TabularFormat::Spreadsheet,
            header_cells,
            TableSource::Grid {
                rows: Arc::new(grid),
                header_row,
            },
        ))
    }
}

/// 单元格 → 文本（日期单元格输出 ISO 格式）
fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty | Data::Error(_) => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => {
            if f.fract() == 0.0 && f.abs() < 1e15 {
                format!("{}", *f as i64)
            } else {
                f.to_string()
            }
        }
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => match excel_serial_to_datetime(dt.as_f64()) {
            Some(value) if value.time() == chrono::NaiveTime::MIN => {
                value.date().format("%Y-%m-%d").to_string()
            }
            Some(value) => value.format("%Y-%m-%d %H:%M:%S").to_string(),
            None => dt.as_f64().to_string(),
        },
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
    }
}

// ==========================================
// 通用解码器（按格式判定结果分派）
// ==========================================
pub struct UniversalDecoder;

impl TabularDecoder for UniversalDecoder {
    fn decode(&self, payload: &FilePayload) -> ImportResult<DecodedTable> {
        match sniff_format(payload)? {
            TabularFormat::Delimited { delimiter } => {
                CsvDecoder::with_delimiter(delimiter).decode(payload)
            }
            TabularFormat::Spreadsheet => SpreadsheetDecoder.decode(payload),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn csv_payload(text: &str) -> FilePayload {
        FilePayload::new("orders.csv", text.as_bytes().to_vec())
    }

    fn collect_rows(table: &DecodedTable) -> Vec<RawRow> {
        table.rows().map(|r| r.unwrap()).collect()
    }

    #[test]
    fn test_csv_decoder_valid_file() {
        let payload = csv_payload("Name,Phone,Order Date\nJane,0123,2024-03-01\nJohn,0456,2024-03-02\n");
        let table = UniversalDecoder.decode(&payload).unwrap();

        assert_eq!(table.headers(), &["Name", "Phone", "Order Date"]);
        let rows = collect_rows(&table);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].row_number, 2);
        assert_eq!(rows[0].get("Name"), Some("Jane"));
        assert_eq!(rows[1].get("Order Date"), Some("2024-03-02"));
    }

    #[test]
    fn test_rows_are_restartable() {
        let payload = csv_payload("Name,Amount\nA,1\nB,2\n");
        let table = UniversalDecoder.decode(&payload).unwrap();
        assert_eq!(collect_rows(&table), collect_rows(&table));
    }

    #[test]
    fn test_blank_rows_skipped_but_row_numbers_physical() {
        let payload = csv_payload("Name,Amount\nA,1\n,\n , \nB,2\n");
        let table = UniversalDecoder.decode(&payload).unwrap();
        let rows = collect_rows(&table);

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].row_number, 2);
        assert_eq!(rows[1].row_number, 5);
    }

    #[test]
    fn test_bom_and_semicolon_sniffing() {
        let mut bytes = UTF8_BOM.to_vec();
        bytes.extend_from_slice("Name;Amount\nA;1,50\n".as_bytes());
        let payload = FilePayload::new("export", bytes);

        assert_eq!(
            sniff_format(&payload).unwrap(),
            TabularFormat::Delimited { delimiter: b';' }
        );
        let table = UniversalDecoder.decode(&payload).unwrap();
        assert_eq!(table.headers(), &["Name", "Amount"]);
        assert_eq!(collect_rows(&table)[0].get("Amount"), Some("1,50"));
    }

    #[test]
    fn test_empty_and_duplicate_headers() {
        let payload = csv_payload("Name,,Name,Phone\nA,x,B,123\n");
        let table = UniversalDecoder.decode(&payload).unwrap();

        assert_eq!(table.headers(), &["Name", "Phone"]);
        let rows = collect_rows(&table);
        assert_eq!(rows[0].get("Name"), Some("A"));
        assert_eq!(rows[0].get("Phone"), Some("123"));
    }

    #[test]
    fn test_ragged_rows_padded() {
        let payload = csv_payload("Name,Phone,Notes\nA\n");
        let table = UniversalDecoder.decode(&payload).unwrap();
        let rows = collect_rows(&table);
        assert_eq!(rows[0].get("Notes"), Some(""));
    }

    #[test]
    fn test_no_header_is_format_error() {
        let payload = csv_payload("\n , \n");
        assert!(matches!(
            UniversalDecoder.decode(&payload),
            Err(ImportError::MissingHeader)
        ));

        let empty = csv_payload("");
        assert!(matches!(
            UniversalDecoder.decode(&empty),
            Err(ImportError::FormatError(_))
        ));
    }

    #[test]
    fn test_magic_bytes_select_spreadsheet() {
        let mut bytes = ZIP_MAGIC.to_vec();
        bytes.extend_from_slice(b"not really a workbook");
        let payload = FilePayload::new("upload.bin", bytes);

        assert_eq!(sniff_format(&payload).unwrap(), TabularFormat::Spreadsheet);
        assert!(UniversalDecoder.decode(&payload).is_err());
    }

    #[test]
    fn test_invalid_utf8_is_format_error() {
        // Windows-1252 编码的 "José"
        let mut bytes = b"Name,Order Date,Amount\nJos".to_vec();
        bytes.push(0xE9);
        bytes.extend_from_slice(b",2024-03-01,10\n");
        let payload = FilePayload::new("orders.csv", bytes);

        match UniversalDecoder.decode(&payload) {
            Err(ImportError::FormatError(message)) => {
                assert!(message.contains("not valid UTF-8"));
                assert!(message.contains("line 2"));
            }
            other => panic!("expected format error, got {:?}", other.map(|t| t.headers().to_vec())),
        }
    }

    #[test]
    fn test_binary_without_extension_is_unsupported() {
        let payload = FilePayload::new("upload", vec![0xFF, 0xFE, 0x00, 0x41]);
        assert!(matches!(
            sniff_format(&payload),
            Err(ImportError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_tsv_extension() {
        let payload = FilePayload::new("orders.TSV", b"Name\tAmount\nA\t1\n".to_vec());
        assert_eq!(
            sniff_format(&payload).unwrap(),
            TabularFormat::Delimited { delimiter: b'\t' }
        );
    }
}
