//! Terminal rendering of query rows.

use crate::pipeline::Row;
use serde_json::Value;
use std::io::Write;

fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}

/// Plain aligned table, one header line and a separator. A result with
/// columns but no rows still prints its header.
pub fn render_table(columns: &[String], rows: &[Row]) -> String {
    if columns.is_empty() {
        return "(no rows)\n".to_string();
    }

    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|row| columns.iter().map(|c| cell(row.get(c))).collect())
        .collect();
    let widths: Vec<usize> = columns
        .iter()
        .enumerate()
        .map(|(i, name)| {
            cells
                .iter()
                .map(|line| line[i].chars().count())
                .chain(std::iter::once(name.chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let format_line = |values: &[String]| {
        values
            .iter()
            .zip(&widths)
            .map(|(value, width)| format!("{:<width$}", value, width = *width))
            .collect::<Vec<_>>()
            .join(" | ")
            .trim_end()
            .to_string()
    };

    let mut out = String::new();
    out.push_str(&format_line(columns));
    out.push('\n');
    out.push_str(
        &widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("-+-"),
    );
    out.push('\n');
    for line in &cells {
        out.push_str(&format_line(line));
        out.push('\n');
    }
    out
}

pub fn write_csv<W: Write>(columns: &[String], rows: &[Row], writer: W) -> Result<(), csv::Error> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record(columns)?;
    for row in rows {
        csv_writer.write_record(columns.iter().map(|c| cell(row.get(c))))?;
    }
    csv_writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn columns() -> Vec<String> {
        vec!["region".to_string(), "total".to_string()]
    }

    fn rows() -> Vec<Row> {
        let value = json!([
            {"region": "west", "total": 12.5},
            {"region": "east, north", "total": null}
        ]);
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn tables_align_columns() {
        let rendered = render_table(&columns(), &rows());
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "region      | total");
        assert_eq!(lines[1], "------------+------");
        assert_eq!(lines[2], "west        | 12.5");
        assert_eq!(lines[3], "east, north |");
        assert_eq!(render_table(&[], &[]), "(no rows)\n");
    }

    #[test]
    fn empty_results_keep_their_header() {
        assert_eq!(render_table(&columns(), &[]), "region | total\n-------+------\n");

        let mut buffer = Vec::new();
        write_csv(&columns(), &[], &mut buffer).unwrap();
        assert_eq!(String::from_utf8(buffer).unwrap(), "region,total\n");
    }

    #[test]
    fn csv_output_quotes_embedded_commas() {
        let mut buffer = Vec::new();
        write_csv(&columns(), &rows(), &mut buffer).unwrap();
        assert_eq!(
            String::from_utf8(buffer).unwrap(),
            "region,total\nwest,12.5\n\"east, north\",\n"
        );
    }
}
