//! Table rendering of guard values.
//!
//! [`TableObserver`] renders any set of [`Observable`] guards as an ASCII
//! table using the `tabled` crate, either as a `Name`/`Value` list or as a
//! compact grid of `name: value` cells.
//!
//! # Feature Flag
//!
//! This module requires the `table` feature:
//!
//! ```toml
//! [dependencies]
//! custodi = { version = "0.1", features = ["table"] }
//! ```
//!
//! # Examples
//!
//! ```rust
//! use custodi::guards::atomic::AtomicCounter;
//! use custodi::guards::rcu::VersionedSnapshot;
//! use custodi::guards::Observable;
//! use custodi::observers::table::{TableObserver, TableStyle};
//!
//! let atomic = AtomicCounter::new().with_name("demo_atomic");
//! atomic.write(42);
//! let rcu: VersionedSnapshot = VersionedSnapshot::new().with_name("demo_rcu");
//!
//! let guards: Vec<&dyn Observable> = vec![&atomic, &rcu];
//! let output = TableObserver::new()
//!     .with_style(TableStyle::Ascii)
//!     .render(guards.into_iter());
//!
//! assert!(output.contains("demo_atomic"));
//! assert!(output.contains("(unset)"));
//! ```

use crate::guards::Observable;
use tabled::{builder::Builder, settings::Style, Table, Tabled};

/// Available table styles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TableStyle {
    /// `+`, `-` and `|` borders
    Ascii,
    /// Box drawing with rounded corners (default)
    #[default]
    Rounded,
    /// Box drawing with sharp corners
    Sharp,
    /// Box drawing with row separators
    Modern,
    /// GitHub-flavored Markdown
    Markdown,
    /// No borders
    Blank,
}

impl TableStyle {
    fn apply(self, table: &mut Table) {
        match self {
            TableStyle::Ascii => table.with(Style::ascii()),
            TableStyle::Rounded => table.with(Style::rounded()),
            TableStyle::Sharp => table.with(Style::sharp()),
            TableStyle::Modern => table.with(Style::modern()),
            TableStyle::Markdown => table.with(Style::markdown()),
            TableStyle::Blank => table.with(Style::blank()),
        };
    }
}

/// Configuration for the table observer.
#[derive(Debug, Clone)]
pub struct TableConfig {
    /// Border style.
    pub style: TableStyle,
    /// Whether to show the `Name`/`Value` header (list mode only).
    pub show_header: bool,
    /// Line printed above the table.
    pub title: Option<String>,
    /// Render `name: value` cells in a grid instead of a list.
    pub compact: bool,
    /// Number of grid columns in compact mode.
    pub columns: usize,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            style: TableStyle::default(),
            show_header: true,
            title: None,
            compact: false,
            columns: 1,
        }
    }
}

#[derive(Tabled)]
struct GuardRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Value")]
    value: String,
}

fn display_name(guard: &dyn Observable) -> String {
    match guard.name() {
        "" => "(unnamed)".to_string(),
        name => name.to_string(),
    }
}

/// Renders guards as a formatted table.
#[derive(Debug, Clone, Default)]
pub struct TableObserver {
    config: TableConfig,
}

impl TableObserver {
    /// Creates an observer with rounded borders in list mode.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an observer from an explicit configuration.
    pub fn with_config(config: TableConfig) -> Self {
        Self { config }
    }

    /// Sets the border style.
    pub fn with_style(mut self, style: TableStyle) -> Self {
        self.config.style = style;
        self
    }

    /// Shows or hides the header row.
    pub fn with_header(mut self, show: bool) -> Self {
        self.config.show_header = show;
        self
    }

    /// Sets a title printed above the table.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.config.title = Some(title.into());
        self
    }

    /// Enables or disables compact grid mode.
    pub fn compact(mut self, enabled: bool) -> Self {
        self.config.compact = enabled;
        self
    }

    /// Sets the number of grid columns; values below 1 are treated as 1.
    pub fn columns(mut self, count: usize) -> Self {
        self.config.columns = count.max(1);
        self
    }

    /// Renders the current value of every guard.
    pub fn render<'a>(&self, guards: impl Iterator<Item = &'a dyn Observable>) -> String {
        let table = if self.config.compact {
            self.compact_table(guards)
        } else {
            Some(self.list_table(guards))
        };

        match (table, &self.config.title) {
            (None, _) => String::new(),
            (Some(table), Some(title)) => format!("{title}\n{table}"),
            (Some(table), None) => table.to_string(),
        }
    }

    fn list_table<'a>(&self, guards: impl Iterator<Item = &'a dyn Observable>) -> Table {
        let rows: Vec<GuardRow> = guards
            .map(|guard| GuardRow {
                name: display_name(guard),
                value: guard.value().to_string(),
            })
            .collect();

        let mut table = Table::new(&rows);
        self.config.style.apply(&mut table);
        if !self.config.show_header {
            table.with(tabled::settings::Remove::row(
                tabled::settings::object::Rows::first(),
            ));
        }
        table
    }

    fn compact_table<'a>(&self, guards: impl Iterator<Item = &'a dyn Observable>) -> Option<Table> {
        let cells: Vec<String> = guards
            .map(|guard| format!("{}: {}", display_name(guard), guard.value()))
            .collect();
        if cells.is_empty() {
            return None;
        }

        let columns = self.config.columns;
        let mut builder = Builder::default();
        for chunk in cells.chunks(columns) {
            let mut row = chunk.to_vec();
            row.resize(columns, String::new());
            builder.push_record(row);
        }

        let mut table = builder.build();
        self.config.style.apply(&mut table);
        Some(table)
    }
}
