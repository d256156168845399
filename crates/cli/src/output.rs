// Output formatting for CLI

use featurestore::frame::{Frame, Value};
use serde::Serialize;

#[derive(Clone, Copy)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Self {
        match s {
            "json" => OutputFormat::Json,
            _ => OutputFormat::Text,
        }
    }

    pub fn print_value<T: Serialize>(&self, value: &T) -> anyhow::Result<()> {
        match self {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(value)?);
            }
            OutputFormat::Text => {
                // Text format is handled by each command
            }
        }
        Ok(())
    }

    pub fn is_text(&self) -> bool {
        matches!(self, OutputFormat::Text)
    }
}

/// Print a simple key-value pair for text output
pub fn print_field(label: &str, value: &str) {
    println!("{:<14} {}", format!("{}:", label), value);
}

/// Print a table header
pub fn print_table_header(columns: &[(&str, usize)]) {
    let header: String = columns
        .iter()
        .map(|(name, width)| format!("{:<width$}", name, width = width))
        .collect::<Vec<_>>()
        .join("  ");
    println!("{}", header);
}

/// Print a table row
pub fn print_table_row(values: &[(&str, usize)]) {
    let row: String = values
        .iter()
        .map(|(val, width)| format!("{:<width$}", truncate(val, *width), width = width))
        .collect::<Vec<_>>()
        .join("  ");
    println!("{}", row);
}

fn truncate(val: &str, width: usize) -> String {
    if val.chars().count() > width && width > 3 {
        let kept: String = val.chars().take(width - 3).collect();
        format!("{kept}...")
    } else {
        val.to_string()
    }
}

/// Print up to `limit` rows of a frame as a table
pub fn print_frame(frame: &Frame, limit: usize) {
    let width = 16;
    let names: Vec<&str> = frame.schema().names().collect();
    print_table_header(&names.iter().map(|n| (*n, width)).collect::<Vec<_>>());
    for row in frame.rows().iter().take(limit) {
        let cells: Vec<String> = row.iter().map(Value::to_string).collect();
        print_table_row(&cells.iter().map(|c| (c.as_str(), width)).collect::<Vec<_>>());
    }
    if frame.len() > limit {
        println!("... {} more rows", frame.len() - limit);
    }
}

/// Rows of a frame as JSON objects keyed by column name
pub fn frame_to_json(frame: &Frame, limit: usize) -> serde_json::Value {
    let names: Vec<&str> = frame.schema().names().collect();
    let rows = frame
        .rows()
        .iter()
        .take(limit)
        .map(|row| {
            let object = names
                .iter()
                .zip(row)
                .map(|(name, value)| (name.to_string(), value_to_json(value)))
                .collect::<serde_json::Map<_, _>>();
            serde_json::Value::Object(object)
        })
        .collect();
    serde_json::Value::Array(rows)
}

fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Int64(v) => (*v).into(),
        Value::Float64(v) => serde_json::Number::from_f64(*v)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Utf8(v) => v.clone().into(),
        Value::Boolean(v) => (*v).into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use featurestore::frame::{Column, DataType, Schema};

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a-very-long-value", 8), "a-ver...");
    }

    #[test]
    fn test_frame_to_json() {
        let schema = Schema::new(vec![
            Column::new("id", DataType::Int64),
            Column::new("ratio", DataType::Float64),
        ])
        .unwrap();
        let frame = Frame::from_rows(
            schema,
            vec![
                vec![Value::Int64(1), Value::Float64(0.5)],
                vec![Value::Int64(2), Value::Null],
            ],
        )
        .unwrap();

        let json = frame_to_json(&frame, 10);
        assert_eq!(
            json,
            serde_json::json!([{"id": 1, "ratio": 0.5}, {"id": 2, "ratio": null}])
        );
        assert_eq!(frame_to_json(&frame, 1).as_array().unwrap().len(), 1);
    }
}
