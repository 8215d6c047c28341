use crate::error::{ReportError, Result};
use polars::prelude::{AnyValue, DataFrame};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tabled::builder::Builder;
use tabled::settings::Style;

/// Address of a shape in the template: page index plus shape index,
/// written as `"{page} {shape}"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Slot {
    pub page: usize,
    pub shape: u32,
}

impl Slot {
    pub fn new(page: usize, shape: u32) -> Self {
        Slot { page, shape }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.page, self.shape)
    }
}

impl FromStr for Slot {
    type Err = ReportError;

    fn from_str(s: &str) -> Result<Self> {
        let bad = || ReportError::Slot(s.to_string());
        let mut parts = s.split_whitespace();
        let page = parts.next().and_then(|p| p.parse().ok()).ok_or_else(bad)?;
        let shape = parts.next().and_then(|p| p.parse().ok()).ok_or_else(bad)?;
        if parts.next().is_some() {
            return Err(bad());
        }
        Ok(Slot { page, shape })
    }
}

#[derive(Debug, Clone)]
pub enum SlotValue {
    Text(String),
    Table(DataFrame),
}

impl SlotValue {
    fn kind(&self) -> ShapeKind {
        match self {
            SlotValue::Text(_) => ShapeKind::Text,
            SlotValue::Table(_) => ShapeKind::Table,
        }
    }
}

impl From<String> for SlotValue {
    fn from(s: String) -> Self {
        SlotValue::Text(s)
    }
}

impl From<DataFrame> for SlotValue {
    fn from(t: DataFrame) -> Self {
        SlotValue::Table(t)
    }
}

/// A document with addressable slots that is filled piece by piece and
/// persisted once.
pub trait DocumentFiller {
    fn fill(&mut self, slot: Slot, value: SlotValue) -> Result<()>;
    fn save(&self, path: &Path) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeKind {
    Text,
    Table,
}

impl ShapeKind {
    fn as_str(self) -> &'static str {
        match self {
            ShapeKind::Text => "text",
            ShapeKind::Table => "table",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShapeSpec {
    pub index: u32,
    pub kind: ShapeKind,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PageSpec {
    #[serde(default)]
    pub title: String,
    pub shapes: Vec<ShapeSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Template {
    #[serde(default)]
    pub title: String,
    pub pages: Vec<PageSpec>,
}

/// Template-driven document rendered to Markdown on save.
pub struct TemplateDeck {
    template: Template,
    values: HashMap<Slot, SlotValue>,
}

impl TemplateDeck {
    pub fn new(template: Template) -> Self {
        TemplateDeck {
            template,
            values: HashMap::new(),
        }
    }

    pub fn open(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)?;
        let template: Template = serde_json::from_str(&s)?;
        Ok(TemplateDeck::new(template))
    }

    fn shape(&self, slot: Slot) -> Option<&ShapeSpec> {
        self.template
            .pages
            .get(slot.page)?
            .shapes
            .iter()
            .find(|s| s.index == slot.shape)
    }

    pub fn render(&self) -> Result<String> {
        let mut out = String::new();
        if !self.template.title.is_empty() {
            out.push_str(&format!("# {}\n\n", self.template.title));
        }
        for (page_idx, page) in self.template.pages.iter().enumerate() {
            out.push_str(&format!("## {}\n\n", page.title));
            for shape in &page.shapes {
                match self.values.get(&Slot::new(page_idx, shape.index)) {
                    Some(SlotValue::Text(text)) => out.push_str(text),
                    Some(SlotValue::Table(frame)) => {
                        let rendered = to_tabled(frame, usize::MAX)?
                            .with(Style::markdown())
                            .to_string();
                        out.push_str(&rendered);
                    }
                    None => out.push_str("_(empty)_"),
                }
                out.push_str("\n\n");
            }
        }
        Ok(out)
    }
}

impl DocumentFiller for TemplateDeck {
    fn fill(&mut self, slot: Slot, value: SlotValue) -> Result<()> {
        let shape = self
            .shape(slot)
            .ok_or_else(|| ReportError::UnknownSlot(slot.to_string()))?;
        if shape.kind != value.kind() {
            return Err(ReportError::SlotKind {
                slot: format!("{} ({})", slot, shape.name),
                expected: shape.kind.as_str(),
                found: value.kind().as_str(),
            });
        }
        self.values.insert(slot, value);
        Ok(())
    }

    fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, self.render()?)?;
        Ok(())
    }
}

fn cell_text(value: AnyValue) -> String {
    match value {
        AnyValue::Null => String::new(),
        AnyValue::String(s) => s.to_string(),
        AnyValue::StringOwned(s) => s.to_string(),
        AnyValue::Int64(v) => v.to_string(),
        AnyValue::Float64(v) => v.to_string(),
        other => other.to_string(),
    }
}

/// Header row plus the first `max_rows` rows of `frame`.
pub fn to_tabled(frame: &DataFrame, max_rows: usize) -> Result<tabled::Table> {
    let mut builder = Builder::default();
    builder.push_record(frame.get_column_names().into_iter().map(String::from));
    for idx in 0..frame.height().min(max_rows) {
        let mut record = Vec::with_capacity(frame.width());
        for series in frame.get_columns() {
            record.push(cell_text(series.get(idx)?));
        }
        builder.push_record(record);
    }
    Ok(builder.build())
}

/// Print the first `max_rows` rows of a table to the console.
pub fn preview_table_rows(frame: &DataFrame, max_rows: usize) -> Result<()> {
    if frame.height() == 0 {
        println!("(no rows)\n");
        return Ok(());
    }
    let table_str = to_tabled(frame, max_rows)?.with(Style::markdown()).to_string();
    println!("{}\n", table_str);
    Ok(())
}
