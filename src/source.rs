// Statistics data source.
//
// `StatsSource` is the query contract the formatters are written against.
// `CsvSource` answers it from a flat CSV of listing/transaction records,
// loaded once into a polars frame and queried lazily.
use crate::error::{ReportError, Result};
use crate::types::{Period, RankKind, RawRow, ReportWeek, Transaction, Usage};
use crate::util::{format_int, parse_date_safe, parse_f64_safe, parse_i64_safe, round_to};
use chrono::{Duration, NaiveDate};
use csv::ReaderBuilder;
use log::{debug, info};
use polars::df;
use polars::prelude::*;
use std::path::Path;

pub const LISTED_AREA: &str = "上市面积";
pub const SOLD_AREA: &str = "成交面积";
pub const SOLD_PRICE: &str = "成交均价";
/// Row label column of a trend frame.
pub const PERIOD: &str = "周期";

// Columns of the record frame.
const DATE: &str = "date";
const KIND: &str = "kind";
const USAGE: &str = "usage";
const AREA: &str = "area";
const UNITS: &str = "units";
const AMOUNT: &str = "amount";
const LISTED: &str = "listed";
const SOLD: &str = "sold";
const SOLD_AMOUNT: &str = "sold_amount";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    /// One row per period.
    Trend,
    /// One row per district.
    Plate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Week,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SupplySalesQuery {
    pub dimension: Dimension,
    pub granularity: Granularity,
    pub periods: usize,
    pub usage: Usage,
}

/// Supply/sales/price frame plus the narrative snippets derived from it.
///
/// The first column labels the rows (`周期` for a trend, `板块` for a
/// district breakdown); the three measure columns follow.
#[derive(Debug, Clone)]
pub struct SupplySales {
    pub frame: DataFrame,
    pub narratives: Vec<String>,
}

impl SupplySales {
    pub fn narrative(&self, idx: usize) -> Result<&str> {
        self.narratives
            .get(idx)
            .map(String::as_str)
            .ok_or(ReportError::MissingNarrative(idx))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum GroupKey {
    Plate,
    Project,
    Function,
}

impl GroupKey {
    pub fn column_name(self) -> &'static str {
        match self {
            GroupKey::Plate => "板块",
            GroupKey::Project => "popularizename",
            GroupKey::Function => "功能",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Measure {
    Area,
    Units,
    AvgPrice,
}

impl Measure {
    pub fn column_name(self) -> &'static str {
        match self {
            Measure::Area => "面积",
            Measure::Units => "件数",
            Measure::AvgPrice => "均价",
        }
    }
}

/// Ranking query. The result holds the `group_by` key columns followed by
/// the `outputs` measure columns, sorted by area descending.
#[derive(Debug, Clone, PartialEq)]
pub struct RankQuery {
    pub kind: RankKind,
    pub periods: usize,
    pub group_by: Vec<GroupKey>,
    pub outputs: Vec<Measure>,
    pub usage: Usage,
}

pub trait StatsSource {
    fn supply_sales(&self, query: &SupplySalesQuery) -> Result<SupplySales>;
    fn rank(&self, query: &RankQuery) -> Result<DataFrame>;
}

#[derive(Debug, Clone)]
pub struct LoadReport {
    pub total_rows: usize,
    pub parse_errors: usize,
}

/// CSV-backed source anchored to one report week.
pub struct CsvSource {
    frame: DataFrame,
    anchor: ReportWeek,
}

pub fn load_transactions(path: &Path) -> Result<(Vec<Transaction>, LoadReport)> {
    let mut rdr = ReaderBuilder::new().flexible(true).from_path(path)?;
    let mut total_rows = 0usize;
    let mut parse_errors = 0usize;
    let mut records = Vec::new();

    for result in rdr.deserialize::<RawRow>() {
        total_rows += 1;
        let row = match result {
            Ok(r) => r,
            Err(_) => {
                parse_errors += 1;
                continue;
            }
        };
        match clean_row(row) {
            Some(t) => records.push(t),
            None => parse_errors += 1,
        }
    }

    Ok((
        records,
        LoadReport {
            total_rows,
            parse_errors,
        },
    ))
}

fn clean_row(row: RawRow) -> Option<Transaction> {
    let date = parse_date_safe(row.date.as_deref())?;
    let kind = row.kind.as_deref()?.parse::<RankKind>().ok()?;
    let usage = row.usage.as_deref()?.parse::<Usage>().ok()?;
    let area = parse_f64_safe(row.area.as_deref())?;
    let units = parse_i64_safe(row.units.as_deref()).unwrap_or(0);
    // Listings carry no price.
    let amount = parse_f64_safe(row.amount.as_deref()).unwrap_or(0.0);

    Some(Transaction {
        date,
        kind,
        usage,
        plate: text_or(row.plate, "其他"),
        project: text_or(row.project, "未知项目"),
        function: text_or(row.function, usage.label()),
        area,
        units,
        amount,
    })
}

fn text_or(v: Option<String>, fallback: &str) -> String {
    match v.map(|s| s.trim().to_string()) {
        Some(s) if !s.is_empty() => s,
        _ => fallback.to_string(),
    }
}

fn day(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

/// One row per record. `listed`/`sold`/`sold_amount` split area and price
/// by record kind so period totals are plain sums.
fn record_frame(records: &[Transaction]) -> Result<DataFrame> {
    let base = df!(
        DATE => records.iter().map(|t| day(t.date)).collect::<Vec<_>>(),
        KIND => records.iter().map(|t| t.kind.as_str()).collect::<Vec<_>>(),
        USAGE => records.iter().map(|t| t.usage.label()).collect::<Vec<_>>(),
        GroupKey::Plate.column_name() => records.iter().map(|t| t.plate.as_str()).collect::<Vec<_>>(),
        GroupKey::Project.column_name() => records.iter().map(|t| t.project.as_str()).collect::<Vec<_>>(),
        GroupKey::Function.column_name() => records.iter().map(|t| t.function.as_str()).collect::<Vec<_>>(),
        AREA => records.iter().map(|t| t.area).collect::<Vec<_>>(),
        UNITS => records.iter().map(|t| t.units).collect::<Vec<_>>(),
        AMOUNT => records.iter().map(|t| t.amount).collect::<Vec<_>>(),
    )?;
    let is_sale = || col(KIND).eq(lit(RankKind::Sale.as_str()));
    let is_sold = || col(KIND).eq(lit(RankKind::Sold.as_str()));
    let frame = base
        .lazy()
        .with_columns([
            when(is_sale()).then(col(AREA)).otherwise(lit(0.0)).alias(LISTED),
            when(is_sold()).then(col(AREA)).otherwise(lit(0.0)).alias(SOLD),
            when(is_sold()).then(col(AMOUNT)).otherwise(lit(0.0)).alias(SOLD_AMOUNT),
        ])
        .collect()?;
    Ok(frame)
}

#[derive(Default, Clone, Copy)]
struct Acc {
    listed_area: f64,
    sold_area: f64,
    sold_amount: f64,
}

impl Acc {
    fn avg_price(&self) -> f64 {
        if self.sold_area > 0.0 {
            self.sold_amount / self.sold_area
        } else {
            0.0
        }
    }
}

fn sum_of(frame: &DataFrame, name: &str) -> Result<f64> {
    Ok(frame.column(name)?.f64()?.get(0).unwrap_or(0.0))
}

/// The three display measures, computed from `listed`/`sold`/`sold_amount` sums.
fn measure_exprs() -> [Expr; 3] {
    [
        (col(LISTED) / lit(10_000.0)).round(2).alias(LISTED_AREA),
        (col(SOLD) / lit(10_000.0)).round(2).alias(SOLD_AREA),
        when(col(SOLD).gt(lit(0.0)))
            .then(col(SOLD_AMOUNT) / col(SOLD))
            .otherwise(lit(0.0))
            .round(0)
            .alias(SOLD_PRICE),
    ]
}

impl CsvSource {
    pub fn open(path: &Path, anchor: ReportWeek) -> Result<Self> {
        let (records, load_report) = load_transactions(path)?;
        info!(
            "loaded {} of {} records from {} ({} skipped)",
            format_int(records.len()),
            format_int(load_report.total_rows),
            path.display(),
            format_int(load_report.parse_errors)
        );
        CsvSource::from_records(&records, anchor)
    }

    pub fn from_records(records: &[Transaction], anchor: ReportWeek) -> Result<Self> {
        Ok(CsvSource {
            frame: record_frame(records)?,
            anchor,
        })
    }

    /// The `n` periods ending with the anchor, oldest first.
    pub fn periods(&self, granularity: Granularity, n: usize) -> Vec<Period> {
        let mut out = Vec::with_capacity(n);
        let step = match granularity {
            Granularity::Week => Duration::days(7),
        };
        let mut current = self.anchor.period();
        for _ in 0..n {
            out.push(current);
            current = Period {
                start: current.start - step,
                end: current.end - step,
            };
        }
        out.reverse();
        out
    }

    /// Records of `usage` dated inside `periods`. An empty window matches nothing.
    fn window(&self, usage: Usage, periods: &[Period]) -> LazyFrame {
        let by_usage = col(USAGE).eq(lit(usage.label()));
        let cond = match span(periods) {
            Some(w) => by_usage
                .and(col(DATE).gt_eq(lit(day(w.start))))
                .and(col(DATE).lt_eq(lit(day(w.end)))),
            None => lit(false),
        };
        self.frame.clone().lazy().filter(cond)
    }

    fn totals(&self, usage: Usage, period: Period) -> Result<Acc> {
        let sums = self
            .window(usage, &[period])
            .select([col(LISTED).sum(), col(SOLD).sum(), col(SOLD_AMOUNT).sum()])
            .collect()?;
        Ok(Acc {
            listed_area: sum_of(&sums, LISTED)?,
            sold_area: sum_of(&sums, SOLD)?,
            sold_amount: sum_of(&sums, SOLD_AMOUNT)?,
        })
    }
}

fn span(periods: &[Period]) -> Option<Period> {
    Some(Period {
        start: periods.first()?.start,
        end: periods.last()?.end,
    })
}

fn change_phrase(current: f64, previous: f64) -> String {
    if previous <= 0.0 {
        return if current > 0.0 {
            "环比有所增加".to_string()
        } else {
            "环比持平".to_string()
        };
    }
    let pct = (current - previous) / previous * 100.0;
    if pct.abs() < 0.05 {
        "环比持平".to_string()
    } else if pct > 0.0 {
        format!("环比上涨{:.1}%", pct)
    } else {
        format!("环比下降{:.1}%", -pct)
    }
}

/// Week-over-week narrative: listed area, sold area, average price.
fn narrative(current: &Acc, previous: &Acc) -> String {
    format!(
        "上市面积{:.2}万㎡，{}。成交面积{:.2}万㎡，{}。成交均价{}元/㎡，{}。",
        current.listed_area / 10_000.0,
        change_phrase(current.listed_area, previous.listed_area),
        current.sold_area / 10_000.0,
        change_phrase(current.sold_area, previous.sold_area),
        current.avg_price().round(),
        change_phrase(current.avg_price(), previous.avg_price()),
    )
}

impl StatsSource for CsvSource {
    fn supply_sales(&self, query: &SupplySalesQuery) -> Result<SupplySales> {
        debug!("supply_sales {:?}", query);
        match query.dimension {
            Dimension::Trend => {
                // One extra period so the first narrative has a comparison.
                let periods = self.periods(query.granularity, query.periods + 1);
                let totals = periods
                    .iter()
                    .map(|p| self.totals(query.usage, *p))
                    .collect::<Result<Vec<Acc>>>()?;

                let mut labels = Vec::with_capacity(query.periods);
                let mut listed = Vec::with_capacity(query.periods);
                let mut sold = Vec::with_capacity(query.periods);
                let mut price = Vec::with_capacity(query.periods);
                for (p, acc) in periods.iter().zip(&totals).skip(1) {
                    labels.push(p.label());
                    listed.push(round_to(acc.listed_area / 10_000.0, 2));
                    sold.push(round_to(acc.sold_area / 10_000.0, 2));
                    price.push(acc.avg_price().round());
                }
                let frame = df!(
                    PERIOD => labels,
                    LISTED_AREA => listed,
                    SOLD_AREA => sold,
                    SOLD_PRICE => price,
                )?;

                let narratives = match totals.as_slice() {
                    [.., prev, last] => vec![narrative(last, prev)],
                    [last] => vec![narrative(last, &Acc::default())],
                    [] => Vec::new(),
                };
                Ok(SupplySales { frame, narratives })
            }
            Dimension::Plate => {
                let periods = self.periods(query.granularity, query.periods);
                let plate = GroupKey::Plate.column_name();
                let [listed, sold, price] = measure_exprs();
                let frame = self
                    .window(query.usage, &periods)
                    .group_by([col(plate)])
                    .agg([col(LISTED).sum(), col(SOLD).sum(), col(SOLD_AMOUNT).sum()])
                    .sort_by_exprs([col(plate)], SortMultipleOptions::default())
                    .select([col(plate), listed, sold, price])
                    .collect()?;
                Ok(SupplySales {
                    frame,
                    narratives: Vec::new(),
                })
            }
        }
    }

    fn rank(&self, query: &RankQuery) -> Result<DataFrame> {
        debug!("rank {:?}", query);
        let periods = self.periods(Granularity::Week, query.periods);
        let area = Measure::Area.column_name();

        let keys: Vec<Expr> = query.group_by.iter().map(|k| col(k.column_name())).collect();
        // Area descending, then each key ascending, so equal areas have a fixed order.
        let mut order = vec![col(area)];
        order.extend(keys.iter().cloned());
        let descending: Vec<bool> = order.iter().enumerate().map(|(i, _)| i == 0).collect();

        let mut selected = keys.clone();
        selected.extend(query.outputs.iter().map(|m| col(m.column_name())));

        let frame = self
            .window(query.usage, &periods)
            .filter(col(KIND).eq(lit(query.kind.as_str())))
            .group_by(keys)
            .agg([
                col(AREA).sum().alias(area),
                col(UNITS).sum().alias(Measure::Units.column_name()),
                col(AMOUNT).sum(),
            ])
            .with_column(
                when(col(area).gt(lit(0.0)))
                    .then(col(AMOUNT) / col(area))
                    .otherwise(lit(0.0))
                    .alias(Measure::AvgPrice.column_name()),
            )
            .sort_by_exprs(
                order,
                SortMultipleOptions::default().with_order_descendings(descending),
            )
            .select(selected)
            .collect()?;
        Ok(frame)
    }
}
