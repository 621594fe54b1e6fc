use crate::dataset::{ColumnSummary, Dataset};

/// Convert a dataset to CSV format
///
/// This function exports a dataset to CSV (Comma-Separated Values) format.
/// It creates a string where:
/// - The header row is the union of all record columns, in first-seen order
/// - Values are comma-separated, missing columns are left blank
/// - Special characters (commas, quotes, newlines) are properly escaped
///
/// The same text is used for the on-disk cache file and for the sample rows
/// placed in the model prompt.
///
/// # Arguments
/// * `dataset` - Reference to the dataset to convert
///
/// # Returns
/// * `String` - CSV content
///
/// # Examples
/// ```
/// use sheetchat::dataset::{CellValue, Dataset, Record};
/// use sheetchat::downloader::to_csv;
///
/// let ds = Dataset::new(vec![Record::new().with("total", CellValue::Number(3.0))]);
/// assert_eq!(to_csv(&ds), "total\n3\n");
/// ```
pub fn to_csv(dataset: &Dataset) -> String {
    let columns = dataset.columns();
    let mut csv_content = String::new();

    push_row(&mut csv_content, columns.iter().map(String::as_str));

    for record in dataset.iter() {
        let values: Vec<String> = columns
            .iter()
            .map(|c| record.get(c).map(|v| v.to_string()).unwrap_or_default())
            .collect();
        push_row(&mut csv_content, values.iter().map(String::as_str));
    }

    csv_content
}

/// Render the per-column summary as a small CSV table
///
/// Columns: `column,count,distinct,min,max,mean`; the numeric fields are
/// blank for text columns.
pub fn summary_to_csv(summary: &[ColumnSummary]) -> String {
    let mut csv_content = String::new();
    push_row(
        &mut csv_content,
        ["column", "count", "distinct", "min", "max", "mean"].into_iter(),
    );

    for column in summary {
        let (min, max, mean) = match &column.numeric {
            Some(n) => (
                format_number(n.min),
                format_number(n.max),
                format_number(n.mean),
            ),
            None => (String::new(), String::new(), String::new()),
        };
        let count = column.count.to_string();
        let distinct = column.distinct.to_string();
        push_row(
            &mut csv_content,
            [
                column.name.as_str(),
                count.as_str(),
                distinct.as_str(),
                min.as_str(),
                max.as_str(),
                mean.as_str(),
            ]
            .into_iter(),
        );
    }

    csv_content
}

fn push_row<'a>(out: &mut String, fields: impl Iterator<Item = &'a str>) {
    for (i, field) in fields.enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&escape_field(field));
    }
    out.push('\n');
}

/// Quote a field if it contains a comma, quote or line break
fn escape_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') || value.contains('\r')
    {
        let escaped = value.replace('"', "\"\"");
        format!("\"{}\"", escaped)
    } else {
        value.to_string()
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 {
        format!("{}", n as i64)
    } else {
        format!("{:.2}", n)
    }
}
