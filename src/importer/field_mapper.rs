// ==========================================
// 订单导入管道 - 字段映射器实现
// ==========================================
// 阶段 1: 源表头 → 标准字段
// 匹配顺序: 手工指定 → 精确 → 同义词 → 模糊（子串 / Levenshtein）
// 约束: 每一轮对全部字段执行完才进入下一轮；已占用的表头不再分配
// ==========================================

use crate::config::ImportConfig;
use crate::domain::{CanonicalField, FieldMapping, MappedColumn, MatchMethod};
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::order_importer_trait::{HeaderMapper, ManualMapping};
use rapidfuzz::distance::levenshtein;
use std::collections::{BTreeMap, BTreeSet};

/// 子串命中时的相似度下限
const SUBSTRING_SCORE: f64 = 0.90;

/// 内置同义词表
pub fn default_synonyms(field: CanonicalField) -> &'static [&'static str] {
    match field {
        CanonicalField::CustomerName => &[
            "name",
            "customer",
            "client",
            "client name",
            "buyer",
            "buyer name",
            "full name",
            "contact name",
            "nama",
            "nama pelanggan",
        ],
        CanonicalField::PhoneNumber => &[
            "phone",
            "phone no",
            "mobile",
            "mobile no",
            "mobile number",
            "contact",
            "contact no",
            "contact number",
            "tel",
            "telephone",
            "hp",
            "no hp",
            "handphone",
            "whatsapp",
            "wa",
            "no telefon",
        ],
        CanonicalField::Email => &["email address", "e mail", "mail"],
        CanonicalField::FacebookHandle => &[
            "fb",
            "fb name",
            "fb handle",
            "facebook name",
            "facebook profile",
            "fb link",
        ],
        CanonicalField::OrderDate => &[
            "date",
            "purchase date",
            "transaction date",
            "date ordered",
            "order time",
            "created",
            "created at",
            "tarikh",
        ],
        CanonicalField::TotalAmount => &[
            "amount",
            "total",
            "price",
            "total price",
            "grand total",
            "order total",
            "order amount",
            "jumlah",
            "value",
            "sum",
        ],
        CanonicalField::Currency => &["curr", "currency code", "ccy", "mata wang"],
        CanonicalField::Status => &[
            "payment",
            "paid",
            "pay status",
            "order status",
            "status bayaran",
        ],
        CanonicalField::Notes => &[
            "note",
            "remark",
            "remarks",
            "comment",
            "comments",
            "memo",
            "catatan",
        ],
        CanonicalField::Items => &[
            "item",
            "products",
            "product",
            "order items",
            "line items",
            "description",
            "barang",
        ],
    }
}

/// 表头标准化: 小写、非字母数字视为空格、合并空白
pub fn normalize_header(value: &str) -> String {
    value
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

// ==========================================
// FieldMapper
// ==========================================
pub struct FieldMapper {
    synonyms: BTreeMap<CanonicalField, Vec<String>>, // 已标准化
    similarity_threshold: f64,
}

impl FieldMapper {
    pub fn new(
        similarity_threshold: f64,
        extra_synonyms: &BTreeMap<CanonicalField, Vec<String>>,
    ) -> Self {
        let mut synonyms = BTreeMap::new();
        for field in CanonicalField::ALL {
            let mut list: Vec<String> = default_synonyms(field)
                .iter()
                .map(|s| normalize_header(s))
                .collect();
            if let Some(extra) = extra_synonyms.get(&field) {
                list.extend(extra.iter().map(|s| normalize_header(s)));
            }
            list.retain(|s| !s.is_empty());
            list.dedup();
            synonyms.insert(field, list);
        }

        Self {
            synonyms,
            similarity_threshold: similarity_threshold.clamp(0.0, 1.0),
        }
    }

    pub fn from_config(config: &ImportConfig) -> Self {
        Self::new(config.similarity_threshold, &config.extra_synonyms)
    }

    /// 精确匹配用的名称（字段名 + 推荐表头）
    fn exact_names(field: CanonicalField) -> [String; 2] {
        [
            normalize_header(field.as_str()),
            normalize_header(field.recommended_header()),
        ]
    }

    fn synonyms_of(&self, field: CanonicalField) -> &[String] {
        self.synonyms.get(&field).map(Vec::as_slice).unwrap_or(&[])
    }

    /// 模糊相似度（0~1），取全部候选名中的最大值
    fn fuzzy_score(&self, field: CanonicalField, header: &str) -> f64 {
        if header.is_empty() {
            return 0.0;
        }
        let padded_header = format!(" {} ", header);

        Self::exact_names(field)
            .iter()
            .chain(self.synonyms_of(field).iter())
            .map(|candidate| {
                let lev = levenshtein::normalized_similarity(header.chars(), candidate.chars());
                // 只认"表头包含候选名"：单个泛词（如 "Order"）不能顶替 "order date"
                let substring =
                    candidate.len() >= 3 && padded_header.contains(&format!(" {} ", candidate));
                if substring {
                    lev.max(SUBSTRING_SCORE)
                } else {
                    lev
                }
            })
            .fold(0.0, f64::max)
    }

    /// 手工映射: 标准字段名 → 源表头（空字符串表示强制不映射）
    fn apply_manual(
        &self,
        headers: &[String],
        manual: &ManualMapping,
        columns: &mut BTreeMap<CanonicalField, MappedColumn>,
        claimed: &mut BTreeSet<usize>,
        suppressed: &mut BTreeSet<CanonicalField>,
    ) -> ImportResult<()> {
        for (field_name, header) in manual {
            let Some(field) = CanonicalField::parse(field_name) else {
                tracing::warn!(field = %field_name, "手工映射包含未知字段，已忽略");
                continue;
            };
            if header.trim().is_empty() {
                suppressed.insert(field);
                continue;
            }

            let wanted = normalize_header(header);
            let index = headers
                .iter()
                .position(|h| h == header)
                .or_else(|| headers.iter().position(|h| normalize_header(h) == wanted))
                .ok_or_else(|| ImportError::UnknownOverrideHeader {
                    field,
                    header: header.clone(),
                })?;

            claimed.insert(index);
            columns.insert(
                field,
                MappedColumn {
                    header: headers[index].clone(),
                    header_index: index,
                    method: MatchMethod::Manual,
                },
            );
        }
        Ok(())
    }
}

impl HeaderMapper for FieldMapper {
    fn map_headers(
        &self,
        headers: &[String],
        manual: Option<&ManualMapping>,
    ) -> ImportResult<FieldMapping> {
        let normalized: Vec<String> = headers.iter().map(|h| normalize_header(h)).collect();
        let mut columns: BTreeMap<CanonicalField, MappedColumn> = BTreeMap::new();
        let mut claimed: BTreeSet<usize> = BTreeSet::new();
        let mut suppressed: BTreeSet<CanonicalField> = BTreeSet::new();

        // 第 0 轮: 手工指定
        if let Some(manual) = manual {
            self.apply_manual(headers, manual, &mut columns, &mut claimed, &mut suppressed)?;
        }

        let pending = |columns: &BTreeMap<CanonicalField, MappedColumn>| -> Vec<CanonicalField> {
            CanonicalField::ALL
                .into_iter()
                .filter(|f| !columns.contains_key(f) && !suppressed.contains(f))
                .collect()
        };

        // 第 1 轮: 精确匹配；第 2 轮: 同义词
        for method in [MatchMethod::Exact, MatchMethod::Synonym] {
            for field in pending(&columns) {
                let names: Vec<String> = match method {
                    MatchMethod::Exact => Self::exact_names(field).to_vec(),
                    _ => self.synonyms_of(field).to_vec(),
                };
                let hit = normalized
                    .iter()
                    .enumerate()
                    .find(|(idx, h)| !claimed.contains(idx) && names.iter().any(|n| n == *h));
                if let Some((idx, _)) = hit {
                    claimed.insert(idx);
                    columns.insert(
                        field,
                        MappedColumn {
                            header: headers[idx].clone(),
                            header_index: idx,
                            method,
                        },
                    );
                }
            }
        }

        // 第 3 轮: 模糊匹配（按分数贪心分配，同分取靠左表头）
        let mut candidates: Vec<(f64, usize, CanonicalField)> = Vec::new();
        for field in pending(&columns) {
            for (idx, header) in normalized.iter().enumerate() {
                if claimed.contains(&idx) {
                    continue;
                }
                let score = self.fuzzy_score(field, header);
                if score >= self.similarity_threshold {
                    candidates.push((score, idx, field));
                }
            }
        }
        candidates.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.cmp(&b.1))
                .then(a.2.cmp(&b.2))
        });
        for (score, idx, field) in candidates {
            if claimed.contains(&idx) || columns.contains_key(&field) {
                continue;
            }
            claimed.insert(idx);
            columns.insert(
                field,
                MappedColumn {
                    header: headers[idx].clone(),
                    header_index: idx,
                    method: MatchMethod::Fuzzy { score },
                },
            );
        }

        let unmapped: BTreeSet<CanonicalField> = CanonicalField::ALL
            .into_iter()
            .filter(|f| !columns.contains_key(f))
            .collect();

        for (field, column) in &columns {
            tracing::debug!(field = %field, header = %column.header, method = ?column.method, "字段已映射");
        }

        let mapping = FieldMapping::new(columns, unmapped);
        let missing = mapping.missing_required();
        if !missing.is_empty() {
            return Err(ImportError::MappingError {
                missing,
                detected_headers: headers.to_vec(),
                partial: Box::new(mapping),
            });
        }

        Ok(mapping)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapper() -> FieldMapper {
        FieldMapper::new(0.80, &BTreeMap::new())
    }

    fn headers(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_maps_common_headers() {
        let mapping = mapper()
            .map_headers(&headers(&["Name", "Phone", "Order Date", "Amount"]), None)
            .unwrap();

        assert_eq!(mapping.header_for(CanonicalField::CustomerName), Some("Name"));
        assert_eq!(mapping.header_for(CanonicalField::PhoneNumber), Some("Phone"));
        assert_eq!(mapping.header_for(CanonicalField::OrderDate), Some("Order Date"));
        assert_eq!(mapping.header_for(CanonicalField::TotalAmount), Some("Amount"));
        assert_eq!(
            mapping.column(CanonicalField::OrderDate).unwrap().method,
            MatchMethod::Exact
        );
        assert_eq!(
            mapping.column(CanonicalField::CustomerName).unwrap().method,
            MatchMethod::Synonym
        );
        assert!(mapping.unmapped().contains(&CanonicalField::Email));
    }

    #[test]
    fn test_exact_beats_synonym_across_fields() {
        // "Date" 是 order_date 的同义词，"Order Date" 是精确匹配
        let mapping = mapper()
            .map_headers(&headers(&["Date", "Order Date", "Customer Name"]), None)
            .unwrap();
        assert_eq!(mapping.header_for(CanonicalField::OrderDate), Some("Order Date"));
    }

    #[test]
    fn test_leftmost_wins_tie() {
        let mapping = mapper()
            .map_headers(&headers(&["Phone", "Mobile", "Date", "Name"]), None)
            .unwrap();
        assert_eq!(mapping.header_for(CanonicalField::PhoneNumber), Some("Phone"));
    }

    #[test]
    fn test_fuzzy_substring_and_typo() {
        let mapping = mapper()
            .map_headers(
                &headers(&["Customer Full Name (as per IC)", "Ordr Date", "Total Amount (RM)"]),
                None,
            )
            .unwrap();

        assert_eq!(
            mapping.header_for(CanonicalField::CustomerName),
            Some("Customer Full Name (as per IC)")
        );
        assert_eq!(mapping.header_for(CanonicalField::OrderDate), Some("Ordr Date"));
        assert!(matches!(
            mapping.column(CanonicalField::OrderDate).unwrap().method,
            MatchMethod::Fuzzy { .. }
        ));
        assert_eq!(
            mapping.header_for(CanonicalField::TotalAmount),
            Some("Total Amount (RM)")
        );
    }

    #[test]
    fn test_missing_required_is_mapping_error() {
        let err = mapper()
            .map_headers(&headers(&["Name", "Amount"]), None)
            .unwrap_err();
        match err {
            ImportError::MappingError {
                missing,
                detected_headers,
                partial,
            } => {
                assert_eq!(missing, vec![CanonicalField::OrderDate]);
                assert_eq!(detected_headers, headers(&["Name", "Amount"]));
                assert!(partial.is_mapped(CanonicalField::CustomerName));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_generic_header_does_not_fill_required_field() {
        let err = mapper()
            .map_headers(&headers(&["Order", "Name", "Amount"]), None)
            .unwrap_err();
        match err {
            ImportError::MappingError { missing, partial, .. } => {
                assert_eq!(missing, vec![CanonicalField::OrderDate]);
                assert!(!partial
                    .columns()
                    .values()
                    .any(|column| column.header == "Order"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_header_inside_candidate_scores_below_threshold() {
        let mapper = mapper();
        assert!(mapper.fuzzy_score(CanonicalField::OrderDate, "order") < 0.80);
        assert!(mapper.fuzzy_score(CanonicalField::Notes, "order") < 0.80);
        assert!(mapper.fuzzy_score(CanonicalField::CustomerName, "customer full name") >= 0.90);
    }

    #[test]
    fn test_manual_override_takes_precedence() {
        let mut manual = ManualMapping::new();
        manual.insert("customer_name".to_string(), "Buyer Nick".to_string());
        manual.insert("order_date".to_string(), "Tarikh Beli".to_string());

        let mapping = mapper()
            .map_headers(&headers(&["Name", "Buyer Nick", "Tarikh Beli"]), Some(&manual))
            .unwrap();
        assert_eq!(mapping.header_for(CanonicalField::CustomerName), Some("Buyer Nick"));
        assert_eq!(
            mapping.column(CanonicalField::CustomerName).unwrap().method,
            MatchMethod::Manual
        );
        assert_eq!(mapping.header_for(CanonicalField::OrderDate), Some("Tarikh Beli"));
    }

    #[test]
    fn test_manual_override_unknown_header() {
        let mut manual = ManualMapping::new();
        manual.insert("order_date".to_string(), "Nope".to_string());

        let err = mapper()
            .map_headers(&headers(&["Name", "Date"]), Some(&manual))
            .unwrap_err();
        assert!(matches!(err, ImportError::UnknownOverrideHeader { .. }));
    }

    #[test]
    fn test_extra_synonyms() {
        let mut extra = BTreeMap::new();
        extra.insert(CanonicalField::CustomerName, vec!["Pembeli".to_string()]);
        let mapper = FieldMapper::new(0.80, &extra);

        let mapping = mapper
            .map_headers(&headers(&["Pembeli", "Tarikh"]), None)
            .unwrap();
        assert_eq!(mapping.header_for(CanonicalField::CustomerName), Some("Pembeli"));
        assert_eq!(mapping.header_for(CanonicalField::OrderDate), Some("Tarikh"));
    }
}
