//! Result printing for `--output`.
//!
//! Commands hand a [`Printer`] either a list of rows or one record; the
//! printer picks tabled, JSON or one-key-per-line text and honours `--quiet`.

use std::io::{self, IsTerminal, Write};

use serde::Serialize;
use tabled::{Table, Tabled, settings::Style};

use crate::cli::{ColorMode, GlobalOpts, OutputFormat};

impl ColorMode {
    /// `auto` colors only an interactive stdout without `NO_COLOR`.
    pub fn enabled(&self) -> bool {
        match self {
            Self::Always => true,
            Self::Never => false,
            Self::Auto => io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none(),
        }
    }
}

pub struct Printer {
    format: OutputFormat,
    quiet: bool,
    color: bool,
}

impl Printer {
    pub fn new(global: &GlobalOpts) -> Self {
        Self {
            format: global.output.clone(),
            quiet: global.quiet,
            color: global.color.enabled(),
        }
    }

    pub fn color(&self) -> bool {
        self.color
    }

    /// Print a collection: a table of `row(item)`, JSON, or `key(item)` per line.
    pub fn list<T, R>(&self, items: &[T], row: impl Fn(&T) -> R, key: impl Fn(&T) -> String)
    where
        T: Serialize,
        R: Tabled,
    {
        self.emit(&format_list(&self.format, items, row, key));
    }

    /// Print one record: `detail(item)` as text, JSON, or just `key(item)`.
    pub fn record<T: Serialize>(
        &self,
        item: &T,
        detail: impl Fn(&T) -> String,
        key: impl Fn(&T) -> String,
    ) {
        self.emit(&format_record(&self.format, item, detail, key));
    }

    /// Stream a live message. Only `--output json` pretty-prints; everything
    /// else keeps one message per line.
    pub fn message(&self, message: &serde_json::Value) {
        let pretty = matches!(self.format, OutputFormat::Json);
        let mut stdout = io::stdout().lock();
        let _ = writeln!(stdout, "{}", to_json(message, pretty));
    }

    fn emit(&self, text: &str) {
        if self.quiet || text.is_empty() {
            return;
        }
        let mut stdout = io::stdout().lock();
        let _ = writeln!(stdout, "{text}");
    }
}

fn format_list<T, R>(
    format: &OutputFormat,
    items: &[T],
    row: impl Fn(&T) -> R,
    key: impl Fn(&T) -> String,
) -> String
where
    T: Serialize,
    R: Tabled,
{
    match format {
        OutputFormat::Table => {
            let mut table = Table::new(items.iter().map(row));
            table.with(Style::rounded());
            table.to_string()
        }
        OutputFormat::Json => to_json(items, true),
        OutputFormat::JsonCompact => to_json(items, false),
        OutputFormat::Plain => {
            let keys: Vec<String> = items.iter().map(key).collect();
            keys.join("\n")
        }
    }
}

fn format_record<T: Serialize>(
    format: &OutputFormat,
    item: &T,
    detail: impl Fn(&T) -> String,
    key: impl Fn(&T) -> String,
) -> String {
    match format {
        OutputFormat::Table => detail(item),
        OutputFormat::Json => to_json(item, true),
        OutputFormat::JsonCompact => to_json(item, false),
        OutputFormat::Plain => key(item),
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T, pretty: bool) -> String {
    let encoded = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    };
    encoded.unwrap_or_else(|e| serde_json::json!({ "error": e.to_string() }).to_string())
}
