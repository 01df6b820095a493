//! Tabular query results and their text rendering.
//!
//! Both stores produce a [`QueryOutcome`]. Rows keep the column order the
//! store reported so the Markdown rendering reads the way the query was
//! written.

use serde::Serialize;
use serde_json::Value;

/// Confirmation returned for statements that project no columns.
pub const EXECUTED_MESSAGE: &str = "Query executed successfully.";

/// Ordered rows with a shared column header.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl RowSet {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Append a row. Short rows are padded with nulls, long rows truncated.
    pub fn push_row(&mut self, mut row: Vec<Value>) {
        row.resize(self.columns.len(), Value::Null);
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }

    /// Drop columns by name. A column also matches when it is qualified
    /// with a table alias (`l.address_embedding` matches `address_embedding`).
    pub fn without_columns(mut self, names: &[&str]) -> Self {
        let keep: Vec<bool> = self
            .columns
            .iter()
            .map(|c| {
                let bare = c.rsplit('.').next().unwrap_or(c);
                !names.iter().any(|n| c == n || bare == *n)
            })
            .collect();

        self.columns = self
            .columns
            .into_iter()
            .zip(&keep)
            .filter_map(|(c, k)| k.then_some(c))
            .collect();
        for row in &mut self.rows {
            let cells = std::mem::take(row);
            *row = cells
                .into_iter()
                .zip(&keep)
                .filter_map(|(v, k)| k.then_some(v))
                .collect();
        }
        self
    }

    /// Render as a pipe table.
    pub fn to_markdown(&self) -> String {
        if self.columns.is_empty() {
            return "(no rows)".to_string();
        }

        let header: Vec<String> = self.columns.iter().map(|c| escape_cell(c)).collect();
        let body: Vec<Vec<String>> = self
            .rows
            .iter()
            .map(|r| r.iter().map(cell_text).collect())
            .collect();

        let widths: Vec<usize> = (0..header.len())
            .map(|i| {
                body.iter()
                    .map(|r| r[i].chars().count())
                    .chain(std::iter::once(header[i].chars().count()))
                    .max()
                    .unwrap_or(0)
                    .max(3)
            })
            .collect();

        let mut out = String::new();
        out.push_str(&format_line(&header, &widths));
        out.push('\n');
        let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        out.push_str(&format_line(&rule, &widths));
        for row in &body {
            out.push('\n');
            out.push_str(&format_line(row, &widths));
        }
        out
    }
}

fn format_line(cells: &[String], widths: &[usize]) -> String {
    let padded: Vec<String> = cells
        .iter()
        .zip(widths)
        .map(|(c, w)| format!("{:<width$}", c, width = *w))
        .collect();
    format!("| {} |", padded.join(" | "))
}

fn escape_cell(s: &str) -> String {
    s.replace('|', "\\|").replace(['\n', '\r'], " ")
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => escape_cell(s),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => escape_cell(&other.to_string()),
    }
}

/// What a single query execution produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QueryOutcome {
    /// The statement projected columns (possibly zero rows).
    Rows(RowSet),
    /// The statement ran but projected nothing (DDL or a write).
    Executed,
    /// The engine rejected the statement; carries the formatted error.
    Failed(String),
}

impl QueryOutcome {
    pub fn failed(err: impl std::fmt::Display) -> Self {
        QueryOutcome::Failed(format!("Error executing query: {}", err))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, QueryOutcome::Failed(_))
    }

    /// Text handed back into the conversation.
    pub fn to_text(&self) -> String {
        match self {
            QueryOutcome::Rows(rows) => rows.to_markdown(),
            QueryOutcome::Executed => EXECUTED_MESSAGE.to_string(),
            QueryOutcome::Failed(msg) => msg.clone(),
        }
    }
}
