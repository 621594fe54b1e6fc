use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Column added to every record naming the document it came from.
pub const PROVENANCE_COLUMN: &str = "source";

/// A single spreadsheet value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Number(f64),
    Text(String),
    Empty,
}

impl CellValue {
    /// Numericise a raw string the way sheet exports do: numbers become
    /// `Number`, blank strings become `Empty`, everything else stays text.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return CellValue::Empty;
        }
        match trimmed.parse::<f64>() {
            Ok(n) if n.is_finite() => CellValue::Number(n),
            _ => CellValue::Text(raw.to_string()),
        }
    }

    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => CellValue::Empty,
            serde_json::Value::Number(n) => n
                .as_f64()
                .map(CellValue::Number)
                .unwrap_or_else(|| CellValue::Text(n.to_string())),
            serde_json::Value::String(s) => CellValue::parse(s),
            serde_json::Value::Bool(b) => CellValue::Text(b.to_string().to_uppercase()),
            other => CellValue::Text(other.to_string()),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Empty)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Integral numbers print without a trailing ".0"
            CellValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => {
                write!(f, "{}", *n as i64)
            }
            CellValue::Number(n) => write!(f, "{}", n),
            CellValue::Text(s) => f.write_str(s),
            CellValue::Empty => Ok(()),
        }
    }
}

/// One row of a sheet, keyed by column name in header order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    fields: Vec<(String, CellValue)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, column: &str) -> Option<&CellValue> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    /// Set a column, replacing an existing value in place.
    pub fn insert(&mut self, column: impl Into<String>, value: CellValue) {
        let column = column.into();
        match self.fields.iter_mut().find(|(name, _)| *name == column) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((column, value)),
        }
    }

    pub fn with(mut self, column: impl Into<String>, value: CellValue) -> Self {
        self.insert(column, value);
        self
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CellValue)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Consolidated, immutable set of records.
///
/// Cloning is cheap: the records sit behind an `Arc`, so a reader holding a
/// `Dataset` keeps its snapshot alive even after the cache installs a newer one.
#[derive(Clone, Debug, Default)]
pub struct Dataset {
    records: Arc<Vec<Record>>,
}

impl Dataset {
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            records: Arc::new(records),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Record> {
        self.records.iter()
    }

    /// True when both handles share the same underlying records.
    pub fn same_snapshot(&self, other: &Dataset) -> bool {
        Arc::ptr_eq(&self.records, &other.records)
    }

    /// Union of all column names, in order of first appearance.
    pub fn columns(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for record in self.records.iter() {
            for column in record.columns() {
                if seen.insert(column) {
                    out.push(column.to_string());
                }
            }
        }
        out
    }

    /// First `n` records as a new dataset.
    pub fn head(&self, n: usize) -> Dataset {
        if n >= self.len() {
            return self.clone();
        }
        Dataset::new(self.records[..n].to_vec())
    }

    /// Per-column overview sent to the model alongside the sample rows.
    pub fn describe(&self) -> Vec<ColumnSummary> {
        self.columns()
            .into_iter()
            .map(|name| {
                let mut count = 0;
                let mut distinct = HashSet::new();
                let mut numbers = Vec::new();
                for value in self.records.iter().filter_map(|r| r.get(&name)) {
                    if value.is_empty() {
                        continue;
                    }
                    count += 1;
                    distinct.insert(value.to_string());
                    if let Some(n) = value.as_number() {
                        numbers.push(n);
                    }
                }
                let numeric = if !numbers.is_empty() && numbers.len() == count {
                    let min = numbers.iter().copied().fold(f64::INFINITY, f64::min);
                    let max = numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                    let mean = numbers.iter().sum::<f64>() / numbers.len() as f64;
                    Some(NumericSummary { min, max, mean })
                } else {
                    None
                };
                ColumnSummary {
                    name,
                    count,
                    distinct: distinct.len(),
                    numeric,
                }
            })
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ColumnSummary {
    pub name: String,
    /// Non-empty values.
    pub count: usize,
    pub distinct: usize,
    /// Present only when every non-empty value is numeric.
    pub numeric: Option<NumericSummary>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NumericSummary {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

/// Convert column number to letter (A=1, B=2, ..., Z=26, AA=27)
pub fn column_to_letter(col: usize) -> String {
    let mut name = String::new();
    let mut n = col;

    while n > 0 {
        n -= 1;
        name.insert(0, (b'A' + (n % 26) as u8) as char);
        n /= 26;
    }

    name
}

/// Turn a header row plus data rows into records.
///
/// Short rows are padded with empty values, rows with no values at all are
/// dropped and blank header names fall back to the column letter. A repeated
/// header name gets a `_2`, `_3`, ... suffix so no column is lost.
pub fn records_from_rows(header: &[String], rows: Vec<Vec<CellValue>>) -> Vec<Record> {
    let mut taken = HashSet::new();
    let names: Vec<String> = header
        .iter()
        .enumerate()
        .map(|(i, h)| {
            let h = h.trim();
            let base = if h.is_empty() {
                column_to_letter(i + 1)
            } else {
                h.to_string()
            };
            let mut name = base.clone();
            let mut n = 2;
            while !taken.insert(name.clone()) {
                name = format!("{}_{}", base, n);
                n += 1;
            }
            name
        })
        .collect();

    rows.into_iter()
        .filter(|row| row.iter().any(|v| !v.is_empty()))
        .map(|row| {
            let mut values = row.into_iter();
            let mut record = Record::new();
            for name in &names {
                record.insert(name.clone(), values.next().unwrap_or(CellValue::Empty));
            }
            record
        })
        .collect()
}

/// Tag every record with its provenance.
pub fn tag_provenance(records: &mut [Record], source_name: &str) {
    for record in records.iter_mut() {
        record.insert(PROVENANCE_COLUMN, CellValue::Text(source_name.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parse_numericises_like_a_sheet_export() {
        assert_eq!(CellValue::parse("42"), CellValue::Number(42.0));
        assert_eq!(CellValue::parse("-3.5"), CellValue::Number(-3.5));
        assert_eq!(CellValue::parse("  "), CellValue::Empty);
        assert_eq!(CellValue::parse("abc"), CellValue::Text("abc".into()));
        assert_eq!(CellValue::parse("NaN"), CellValue::Text("NaN".into()));
    }

    #[test]
    fn integral_numbers_display_without_fraction() {
        assert_eq!(CellValue::Number(10.0).to_string(), "10");
        assert_eq!(CellValue::Number(2.25).to_string(), "2.25");
        assert_eq!(CellValue::Empty.to_string(), "");
    }

    #[test]
    fn json_values_map_to_cells() {
        assert_eq!(
            CellValue::from_json(&serde_json::json!(7)),
            CellValue::Number(7.0)
        );
        assert_eq!(
            CellValue::from_json(&serde_json::json!("7")),
            CellValue::Number(7.0)
        );
        assert_eq!(CellValue::from_json(&serde_json::json!(null)), CellValue::Empty);
        assert_eq!(
            CellValue::from_json(&serde_json::json!(true)),
            CellValue::Text("TRUE".into())
        );
    }

    #[test]
    fn rows_are_padded_and_blank_rows_dropped() {
        let records = records_from_rows(
            &header(&["name", "", "total"]),
            vec![
                vec![CellValue::Text("a".into()), CellValue::Number(1.0)],
                vec![CellValue::Empty, CellValue::Empty],
                vec![],
                vec![
                    CellValue::Text("b".into()),
                    CellValue::Empty,
                    CellValue::Number(3.0),
                ],
            ],
        );
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].columns().collect::<Vec<_>>(), vec!["name", "B", "total"]);
        assert_eq!(records[0].get("total"), Some(&CellValue::Empty));
        assert_eq!(records[1].get("total"), Some(&CellValue::Number(3.0)));
    }

    #[test]
    fn repeated_headers_keep_every_column() {
        let records = records_from_rows(
            &header(&["name", "total", "name", "name_2", " total "]),
            vec![vec![
                CellValue::Text("a".into()),
                CellValue::Number(1.0),
                CellValue::Text("b".into()),
                CellValue::Text("c".into()),
                CellValue::Number(2.0),
            ]],
        );
        assert_eq!(records[0].len(), 5);
        assert_eq!(
            records[0].columns().collect::<Vec<_>>(),
            vec!["name", "total", "name_2", "name_2_2", "total_2"]
        );
        assert_eq!(records[0].get("name"), Some(&CellValue::Text("a".into())));
        assert_eq!(records[0].get("name_2"), Some(&CellValue::Text("b".into())));
        assert_eq!(records[0].get("name_2_2"), Some(&CellValue::Text("c".into())));
        assert_eq!(records[0].get("total_2"), Some(&CellValue::Number(2.0)));
    }

    #[test]
    fn provenance_overwrites_an_existing_column() {
        let mut records = vec![Record::new().with(PROVENANCE_COLUMN, CellValue::Text("x".into()))];
        tag_provenance(&mut records, "Sales 2024");
        assert_eq!(records[0].len(), 1);
        assert_eq!(
            records[0].get(PROVENANCE_COLUMN),
            Some(&CellValue::Text("Sales 2024".into()))
        );
    }

    #[test]
    fn columns_are_a_union_in_first_seen_order() {
        let ds = Dataset::new(vec![
            Record::new().with("a", CellValue::Empty).with("b", CellValue::Empty),
            Record::new().with("c", CellValue::Empty).with("a", CellValue::Empty),
        ]);
        assert_eq!(ds.columns(), vec!["a", "b", "c"]);
    }

    #[test]
    fn describe_reports_numeric_columns_only_when_fully_numeric() {
        let ds = Dataset::new(vec![
            Record::new()
                .with("price", CellValue::Number(2.0))
                .with("mixed", CellValue::Number(1.0)),
            Record::new()
                .with("price", CellValue::Number(4.0))
                .with("mixed", CellValue::Text("n/a".into())),
            Record::new()
                .with("price", CellValue::Empty)
                .with("mixed", CellValue::Number(1.0)),
        ]);
        let summary = ds.describe();
        assert_eq!(summary[0].name, "price");
        assert_eq!(summary[0].count, 2);
        assert_eq!(
            summary[0].numeric,
            Some(NumericSummary {
                min: 2.0,
                max: 4.0,
                mean: 3.0
            })
        );
        assert_eq!(summary[1].count, 3);
        assert_eq!(summary[1].distinct, 2);
        assert_eq!(summary[1].numeric, None);
    }

    #[test]
    fn head_shares_the_snapshot_when_not_truncating() {
        let ds = Dataset::new(vec![Record::new(), Record::new()]);
        assert!(ds.head(5).same_snapshot(&ds));
        assert_eq!(ds.head(1).len(), 1);
    }

    #[test]
    fn column_letters() {
        assert_eq!(column_to_letter(1), "A");
        assert_eq!(column_to_letter(26), "Z");
        assert_eq!(column_to_letter(27), "AA");
        assert_eq!(column_to_letter(52), "AZ");
    }
}
