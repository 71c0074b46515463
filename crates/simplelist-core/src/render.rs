use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::{DateTime, Local, Utc};
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::filter::FilterSet;
use crate::item::Item;
use crate::tag::{COMPLETED, CREATED, UPDATED};

const SHORT_ID_LEN: usize = 8;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };
        Ok(Self { color })
    }

    #[tracing::instrument(skip(self, items), fields(count = items.len()))]
    pub fn print_item_table(&mut self, items: &[&Item]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        if items.is_empty() {
            writeln!(out, "No items.")?;
            return Ok(());
        }
        let (headers, rows) = self.item_rows(items);
        write_table(&mut out, headers, rows)?;
        Ok(())
    }

    fn item_rows(&self, items: &[&Item]) -> (Vec<String>, Vec<Vec<String>>) {
        let headers = vec![
            "ID".to_string(),
            "Created".to_string(),
            "Summary".to_string(),
            "Tags".to_string(),
            "Fields".to_string(),
        ];

        let mut rows = Vec::with_capacity(items.len());
        for item in items {
            let done = item.is_completed();
            let id = self.paint(&short_id(&item.id), "33");
            let created = item.field(CREATED).map(format_millis).unwrap_or_default();
            let summary = if done {
                self.paint(&item.summary, "2")
            } else {
                item.summary.clone()
            };
            let tags = item
                .plain_tags()
                .filter(|tag| *tag != COMPLETED)
                .collect::<Vec<_>>()
                .join(" ");
            let fields = item
                .tags
                .iter()
                .filter(|tag| tag.is_field() && !tag.is_reserved())
                .filter_map(|tag| Some(format!("{}={}", tag.key()?, tag.value()?)))
                .collect::<Vec<_>>()
                .join(" ");
            rows.push(vec![id, created, summary, tags, fields]);
        }
        (headers, rows)
    }

    #[tracing::instrument(skip(self, item))]
    pub fn print_item_info(&mut self, item: &Item) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        writeln!(out, "id          {}", item.id)?;
        writeln!(out, "summary     {}", item.summary)?;
        if !item.description.is_empty() {
            writeln!(out, "description {}", item.description)?;
        }
        writeln!(out, "tags        {}", item.plain_tags().collect::<Vec<_>>().join(", "))?;
        for tag in item.tags.iter().filter(|tag| tag.is_field() && !tag.is_reserved()) {
            writeln!(
                out,
                "field       {}={}",
                tag.key().unwrap_or_default(),
                tag.value().unwrap_or_default()
            )?;
        }
        for key in [CREATED, UPDATED, COMPLETED] {
            if let Some(value) = item.field(key) {
                writeln!(out, "{:<11} {}", key.to_ascii_lowercase(), format_millis(value))?;
            }
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, set), fields(filters = set.len()))]
    pub fn print_filter_set(&mut self, set: &FilterSet) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        if set.is_empty() {
            writeln!(out, "No filters; every item is shown.")?;
            return Ok(());
        }
        let headers = vec![
            "ID".to_string(),
            "Field".to_string(),
            "Operator".to_string(),
            "Value".to_string(),
        ];
        let rows = set
            .values()
            .map(|filter| {
                vec![
                    self.paint(&short_id(&filter.id), "33"),
                    filter.field_to_filter.clone(),
                    filter.operator.clone(),
                    filter.expected_value.clone(),
                ]
            })
            .collect();
        write_table(&mut out, headers, rows)?;
        Ok(())
    }

    pub fn print_lines<I, S>(&mut self, lines: I) -> anyhow::Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out = io::stdout().lock();
        for line in lines {
            writeln!(out, "{}", line.as_ref())?;
        }
        Ok(())
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || !io::stdout().is_terminal() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

pub fn short_id(id: &str) -> String {
    id.chars().take(SHORT_ID_LEN).collect()
}

/// Local date and time for an epoch-millisecond stamp; other values are
/// shown as they are.
fn format_millis(raw: &str) -> String {
    raw.parse::<i64>()
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|at| at.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| raw.to_string())
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths: Vec<usize> = headers
        .iter()
        .map(|header| UnicodeWidthStr::width(header.as_str()))
        .collect();

    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    let line = |cells: Vec<String>| {
        cells
            .into_iter()
            .zip(&widths)
            .map(|(cell, width)| {
                let visible = UnicodeWidthStr::width(strip_ansi(&cell).as_str());
                format!("{cell}{}", " ".repeat(width.saturating_sub(visible)))
            })
            .collect::<Vec<_>>()
            .join(" ")
            .trim_end()
            .to_string()
    };

    writeln!(writer, "{}", line(headers))?;
    writeln!(
        writer,
        "{}",
        line(widths.iter().map(|w| "-".repeat(*w)).collect())
    )?;
    for mut row in rows {
        row.resize(column_count, String::new());
        writeln!(writer, "{}", line(row))?;
    }
    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;
    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }
        if ch == '\x1b' {
            escaped = true;
            continue;
        }
        out.push(ch);
    }
    out
}
