//! Aligned plain-text tables

use crate::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static ANSI_ESCAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b\[[0-?]*[ -/]*[@-~]").expect("valid ANSI pattern"));

/// Tabular input accepted by [`format_table`]
#[derive(Debug, Clone)]
pub enum TableData {
    /// Lines of text, cells split by the delimiter
    Text(String),
    /// Ordered rows of cells
    Rows(Vec<Vec<String>>),
    /// A JSON array of arrays or objects, or a JSON object of objects or arrays
    Json(Value),
}

impl From<Vec<Vec<String>>> for TableData {
    fn from(rows: Vec<Vec<String>>) -> Self {
        TableData::Rows(rows)
    }
}

impl From<Value> for TableData {
    fn from(value: Value) -> Self {
        TableData::Json(value)
    }
}

impl From<&str> for TableData {
    fn from(text: &str) -> Self {
        TableData::Text(text.to_string())
    }
}

impl TableData {
    /// Parse JSON text, keeping the key order of every object
    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(TableData::Json(serde_json::from_str(text)?))
    }

    fn into_rows(self, delimiter: &str) -> Vec<Vec<String>> {
        match self {
            TableData::Text(text) => {
                let text = text.trim_matches('\n');
                if text.is_empty() {
                    return Vec::new();
                }
                text.split('\n')
                    .map(|line| line.split(delimiter).map(str::to_string).collect())
                    .collect()
            }
            TableData::Rows(rows) => rows,
            TableData::Json(value) => json_rows(value),
        }
    }
}

fn cell(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn json_rows(value: Value) -> Vec<Vec<String>> {
    match value {
        Value::Object(map) => {
            let mut rows = Vec::new();
            if let Some(Value::Object(first)) = map.values().next() {
                let mut header = vec!["key".to_string()];
                header.extend(first.keys().cloned());
                rows.push(header);
                for (key, inner) in &map {
                    let mut row = vec![key.clone()];
                    if let Value::Object(inner) = inner {
                        row.extend(inner.values().map(cell));
                    }
                    rows.push(row);
                }
            } else {
                for (key, inner) in &map {
                    let mut row = vec![key.clone()];
                    match inner {
                        Value::Array(items) => row.extend(items.iter().map(cell)),
                        other => row.push(cell(other)),
                    }
                    rows.push(row);
                }
            }
            rows
        }
        Value::Array(items) => {
            if let Some(Value::Object(first)) = items.first() {
                let mut rows = vec![first.keys().cloned().collect::<Vec<_>>()];
                for item in &items {
                    if let Value::Object(obj) = item {
                        rows.push(obj.values().map(cell).collect());
                    }
                }
                rows
            } else {
                items
                    .iter()
                    .map(|item| match item {
                        Value::Array(cells) => cells.iter().map(cell).collect(),
                        other => vec![cell(other)],
                    })
                    .collect()
            }
        }
        Value::Null => Vec::new(),
        other => vec![vec![cell(&other)]],
    }
}

fn visible_width(text: &str) -> usize {
    ANSI_ESCAPE.replace_all(text, "").chars().count()
}

fn pad(text: &str, width: usize) -> String {
    let fill = width.saturating_sub(visible_width(text));
    format!("{}{}", text, " ".repeat(fill))
}

/// Render `data` as an aligned table with a header row and a divider.
///
/// Without an explicit `header` the first row is used as the header. An
/// explicit header is padded or truncated to the column count. A row whose
/// cells are all empty renders as a divider line. ANSI escapes do not count
/// toward column widths.
pub fn format_table(
    data: impl Into<TableData>,
    delimiter: &str,
    header: Option<&[String]>,
) -> String {
    let rows = data.into().into_rows(delimiter);
    let Some(first) = rows.first() else {
        return String::new();
    };
    let num_cols = first.len();
    if num_cols == 0 {
        return String::new();
    }

    fn at(row: &[String], c: usize) -> String {
        row.get(c).cloned().unwrap_or_default()
    }

    let mut widths: Vec<usize> = (0..num_cols)
        .map(|c| rows.iter().map(|row| visible_width(&at(row, c))).max().unwrap_or(0))
        .collect();

    let (header_row, body): (Vec<String>, &[Vec<String>]) = match header {
        Some(header) => {
            let mut header: Vec<String> = header.iter().take(num_cols).cloned().collect();
            header.resize(num_cols, String::new());
            for (width, title) in widths.iter_mut().zip(&header) {
                *width = (*width).max(visible_width(title));
            }
            (header, &rows[..])
        }
        None => (first.clone(), &rows[1..]),
    };

    let format_row = |row: &[String]| {
        (0..num_cols)
            .map(|c| pad(&at(row, c), widths[c]))
            .collect::<Vec<_>>()
            .join(" | ")
    };
    let divider = widths
        .iter()
        .map(|w| "-".repeat(*w))
        .collect::<Vec<_>>()
        .join("-+-");

    let mut lines = vec![format_row(&header_row[..]), divider.clone()];
    for row in body {
        if row.iter().all(|c| c.is_empty()) {
            lines.push(divider.clone());
        } else {
            lines.push(format_row(&row[..]));
        }
    }
    lines.join("\n") + "\n"
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows(data: &[&[&str]]) -> Vec<Vec<String>> {
        data.iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect()
    }

    #[test]
    fn test_first_row_is_header() {
        let data = rows(&[&["name", "n"], &["alpha", "1"], &["b", "22"]]);
        let table = format_table(data, "\t", None);
        assert_eq!(table, "name  | n \n------+---\nalpha | 1 \nb     | 22\n");
    }

    #[test]
    fn test_empty_row_is_divider() {
        let table = format_table(rows(&[&["a", "b"], &["", ""], &["c", "d"]]), "\t", None);
        assert_eq!(table, "a | b\n--+--\n--+--\nc | d\n");
    }

    #[test]
    fn test_explicit_header_is_padded() {
        let header = vec!["only".to_string()];
        let table = format_table(rows(&[&["x", "y"]]), "\t", Some(header.as_slice()));
        assert_eq!(table, "only |  \n-----+--\nx    | y\n");
    }

    #[test]
    fn test_delimited_text() {
        let table = format_table("k,v\nlonger,1\n", ",", None);
        assert_eq!(table, "k      | v\n-------+--\nlonger | 1\n");
    }

    #[test]
    fn test_ansi_escapes_do_not_widen_columns() {
        let table = format_table(rows(&[&["h"], &["\x1b[92mok\x1b[0m"]]), "\t", None);
        let divider = table.lines().nth(1).unwrap();
        assert_eq!(divider, "--");
    }

    #[test]
    fn test_json_object_of_objects() {
        let data = json!({"web": {"cpu": 2, "mem": "1G"}, "db": {"cpu": 8, "mem": "32G"}});
        let table = format_table(data, "\t", None);
        let mut lines = table.lines();
        assert_eq!(lines.next().unwrap(), "key | cpu | mem");
        assert!(table.contains("db  | 8   | 32G"));
    }

    #[test]
    fn test_json_object_of_arrays_and_array_of_objects() {
        let table = format_table(json!({"a": [1, 2], "b": [3, 4]}), "\t", None);
        assert!(table.starts_with("a | 1 | 2\n"));

        let table = format_table(json!([{"x": 1}, {"x": 10}]), "\t", None);
        assert_eq!(table, "x \n--\n1 \n10\n");
    }

    #[test]
    fn test_json_keys_keep_document_order() {
        let data = TableData::from_json_str(
            r#"{"web": {"mem": "1G", "cpu": 2}, "db": {"mem": "32G", "cpu": 8}}"#,
        )
        .unwrap();
        let table = format_table(data, "\t", None);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[0], "key | mem | cpu");
        assert!(lines[2].starts_with("web"), "{}", table);
        assert!(lines[3].starts_with("db"), "{}", table);
    }

    #[test]
    fn test_invalid_json_is_a_serialization_error() {
        let result = TableData::from_json_str("{\"unterminated\": ");
        assert!(matches!(result, Err(crate::Error::Serialization(_))));
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(format_table(Vec::<Vec<String>>::new(), "\t", None), "");
        assert_eq!(format_table("", "\t", None), "");
    }
}
