use anyhow::Result;
use serde::Serialize;
use unicode_width::UnicodeWidthStr;

use crate::catalog::VariantOutput;
use crate::db::{CellValue, FlatRecord, QueryResult};
use crate::spec::{GroupedRecord, Page};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ExportFormat {
    #[default]
    Table,
    Csv,
    Tsv,
    Json,
}

/// Rows rendered to text, ready for any delimited or aligned output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl TextTable {
    pub fn from_result(result: &QueryResult) -> Self {
        Self {
            columns: result.columns.clone(),
            rows: result
                .rows
                .iter()
                .map(|row| row.iter().map(cell_to_text).collect())
                .collect(),
        }
    }

    pub fn from_records(records: &[FlatRecord]) -> Self {
        let columns = records
            .first()
            .map(|r| r.fields.iter().map(|(name, _)| name.clone()).collect())
            .unwrap_or_default();
        Self {
            columns,
            rows: records
                .iter()
                .map(|r| r.values().map(cell_to_text).collect())
                .collect(),
        }
    }

    /// Collections are joined into one cell per record.
    pub fn from_grouped(records: &[GroupedRecord]) -> Self {
        let columns = records
            .first()
            .map(|r| {
                r.fields
                    .iter()
                    .map(|(name, _)| name.clone())
                    .chain(r.collections.iter().map(|(name, _)| name.clone()))
                    .collect()
            })
            .unwrap_or_default();
        Self {
            columns,
            rows: records
                .iter()
                .map(|r| {
                    r.fields
                        .iter()
                        .map(|(_, value)| cell_to_text(value))
                        .chain(r.collections.iter().map(|(_, values)| {
                            values.iter().map(CellValue::display).collect::<Vec<_>>().join(", ")
                        }))
                        .collect()
                })
                .collect(),
        }
    }

    pub fn to_csv(&self) -> String {
        self.delimited(',', csv_escape)
    }

    pub fn to_tsv(&self) -> String {
        self.delimited('\t', |s| s.replace(['\t', '\n'], " "))
    }

    fn delimited(&self, sep: char, escape: impl Fn(&str) -> String) -> String {
        let mut output = String::new();
        let sep = sep.to_string();

        let headers: Vec<String> = self.columns.iter().map(|c| escape(c.as_str())).collect();
        output.push_str(&headers.join(&sep));
        output.push('\n');

        for row in &self.rows {
            let cells: Vec<String> = row.iter().map(|c| escape(c.as_str())).collect();
            output.push_str(&cells.join(&sep));
            output.push('\n');
        }
        output
    }

    /// Column-aligned text, padded by display width.
    pub fn to_aligned(&self) -> String {
        let mut widths: Vec<usize> = self.columns.iter().map(|c| c.width()).collect();
        for row in &self.rows {
            for (i, cell) in row.iter().enumerate() {
                if let Some(w) = widths.get_mut(i) {
                    *w = (*w).max(cell.width());
                }
            }
        }

        let mut output = String::new();
        output.push_str(&aligned_line(&self.columns, &widths));
        let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        output.push_str(&rule.join("-+-"));
        output.push('\n');
        for row in &self.rows {
            output.push_str(&aligned_line(row, &widths));
        }
        output.push_str(&format!(
            "({} row{})\n",
            self.rows.len(),
            if self.rows.len() == 1 { "" } else { "s" }
        ));
        output
    }

    pub fn render(&self, format: ExportFormat) -> String {
        match format {
            ExportFormat::Table => self.to_aligned(),
            ExportFormat::Csv => self.to_csv(),
            ExportFormat::Tsv => self.to_tsv(),
            ExportFormat::Json => {
                let value = serde_json::json!({ "columns": self.columns, "rows": self.rows });
                serde_json::to_string_pretty(&value).unwrap_or_else(|_| "{}".to_string())
            }
        }
    }
}

fn aligned_line(cells: &[String], widths: &[usize]) -> String {
    let padded: Vec<String> = cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| {
            let pad = width.saturating_sub(cell.width());
            format!("{}{}", cell, " ".repeat(pad))
        })
        .collect();
    format!("{}\n", padded.join(" | ").trim_end())
}

pub fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

fn page_footer<T>(page: &Page<T>) -> String {
    format!(
        "page {} of {} ({} total)\n",
        page.number + 1,
        page.total_pages.max(1),
        page.total_elements
    )
}

/// Render a variant's output in `format`.
pub fn render_output(output: &VariantOutput, format: ExportFormat) -> Result<String> {
    if format == ExportFormat::Json {
        return match output {
            VariantOutput::Rows(result) => to_json(&result.records()),
            VariantOutput::Page(page) => to_json(page),
            VariantOutput::Grouped(records) => to_json(records),
            VariantOutput::GroupedPage(page) => to_json(page),
        };
    }

    let text = match output {
        VariantOutput::Rows(result) => TextTable::from_result(result).render(format),
        VariantOutput::Page(page) => {
            let mut text = TextTable::from_records(&page.content).render(format);
            if format == ExportFormat::Table {
                text.push_str(&page_footer(page));
            }
            text
        }
        VariantOutput::Grouped(records) => TextTable::from_grouped(records).render(format),
        VariantOutput::GroupedPage(page) => {
            let mut text = TextTable::from_grouped(&page.content).render(format);
            if format == ExportFormat::Table {
                text.push_str(&page_footer(page));
            }
            text
        }
    };
    Ok(text)
}

fn cell_to_text(cell: &CellValue) -> String {
    match cell {
        CellValue::Null => String::new(),
        other => other.display(),
    }
}

fn csv_escape(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{Aggregator, GroupShape, PageDescriptor};
    use std::time::Duration;

    fn make_result() -> QueryResult {
        QueryResult::new(
            vec!["id".into(), "username".into(), "roles.name".into()],
            vec![
                vec![CellValue::Int64(1), CellValue::text("Alice"), CellValue::text("admin")],
                vec![CellValue::Int64(1), CellValue::text("Alice"), CellValue::text("ops, eu")],
                vec![CellValue::Int64(2), CellValue::text("Bob"), CellValue::Null],
            ],
            Duration::from_millis(10),
        )
    }

    #[test]
    fn test_csv_export() {
        let csv = TextTable::from_result(&make_result()).to_csv();
        assert!(csv.starts_with("id,username,roles.name\n"));
        assert!(csv.contains("1,Alice,admin\n"));
        assert!(csv.contains("1,Alice,\"ops, eu\"\n"));
        assert!(csv.contains("2,Bob,\n"));
    }

    #[test]
    fn test_csv_escaping() {
        assert_eq!(csv_escape("hello"), "hello");
        assert_eq!(csv_escape("hello,world"), "\"hello,world\"");
        assert_eq!(csv_escape("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_tsv_export() {
        let tsv = TextTable::from_result(&make_result()).to_tsv();
        assert!(tsv.starts_with("id\tusername\troles.name\n"));
        assert!(tsv.contains("2\tBob\t\n"));
    }

    #[test]
    fn test_aligned_uses_display_width() {
        let table = TextTable {
            columns: vec!["name".into(), "n".into()],
            rows: vec![vec!["日本".into(), "1".into()], vec!["a".into(), "22".into()]],
        };
        let text = table.to_aligned();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "name | n");
        assert_eq!(lines[1], "-----+---");
        assert_eq!(lines[2], "日本 | 1");
        assert_eq!(lines[3], "a    | 22");
        assert_eq!(lines[4], "(2 rows)");
    }

    #[test]
    fn test_json_of_rows() {
        let json = to_json(&make_result().records()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value[0]["username"], "Alice");
        assert_eq!(value[2]["roles.name"], serde_json::Value::Null);
    }

    #[test]
    fn test_grouped_output() {
        let grouped = Aggregator::new(GroupShape::new("id").set("roles.name", "roles"))
            .aggregate_result(&make_result())
            .unwrap();
        let table = TextTable::from_grouped(&grouped);
        assert_eq!(table.columns, vec!["id", "username", "roles"]);
        assert_eq!(table.rows[0][2], "admin, ops, eu");
        assert_eq!(table.rows[1][2], "");

        let page = Page::new(grouped, &PageDescriptor::new(0, 10), 2);
        let text = render_output(&VariantOutput::GroupedPage(page.clone()), ExportFormat::Table)
            .unwrap();
        assert!(text.ends_with("page 1 of 1 (2 total)\n"));

        let json = render_output(&VariantOutput::GroupedPage(page), ExportFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["content"][0]["roles"], serde_json::json!(["admin", "ops, eu"]));
        assert_eq!(value["totalElements"], 2);
    }
}
