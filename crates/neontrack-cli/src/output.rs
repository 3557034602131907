//! Output formatting for CLI

use console::style;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
    Table,
}

impl From<&str> for OutputFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            "table" => OutputFormat::Table,
            _ => OutputFormat::Text,
        }
    }
}

/// Pretty JSON, falling back to an empty object
pub fn to_json<T: Serialize>(data: &T) -> String {
    serde_json::to_string_pretty(data).unwrap_or_else(|_| "{}".to_string())
}

/// Render rows as a table
pub fn table<T: Tabled>(rows: impl IntoIterator<Item = T>) -> String {
    Table::new(rows).with(Style::rounded()).to_string()
}

/// Section header for text output
pub fn heading(title: &str) -> String {
    style(title).bold().cyan().to_string()
}

/// Dimmed placeholder for a missing value
pub fn none() -> String {
    style("-").dim().to_string()
}

pub fn ok(message: &str) -> String {
    style(message).green().to_string()
}

pub fn warn(message: &str) -> String {
    style(message).yellow().to_string()
}
