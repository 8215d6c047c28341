use crate::error::{ReportError, Result};
use crate::output::{preview_table_rows, DocumentFiller, Slot, SlotValue};
use crate::source::{
    Dimension, Granularity, GroupKey, Measure, RankQuery, StatsSource, SupplySalesQuery,
    LISTED_AREA, PERIOD, SOLD_AREA, SOLD_PRICE,
};
use crate::types::{RankKind, ReportWeek, Usage};
use crate::util::{merge_sentences, short_period_label};
use log::{debug, info};
use polars::prelude::{DataFrame, DataType, NamedFrom, Series};
use std::collections::HashMap;
use std::path::Path;

/// Display names for the listed area, sold area and average price measures.
pub const MEASURE_COLUMNS: [&str; 3] = ["上市(万㎡)", "成交(万㎡)", "均价(元/㎡)"];

pub const RANK_COL: &str = "排名";
pub const PLATE_COL: &str = "板块";
pub const PROJECT_COL: &str = "项目";
pub const AREA_COL: &str = "面积(㎡)";
pub const UNITS_COL: &str = "套数";
pub const PRICE_COL: &str = "均价(元/㎡)";
pub const TYPE_COL: &str = "类型";

const TREND_WINDOW: usize = 10;
const TOP_N: usize = 3;
const LEAD_IN: &str = "本周";

fn rename_all(frame: &mut DataFrame, pairs: &[(&str, &str)]) -> Result<()> {
    for (from, to) in pairs {
        frame.rename(from, to)?;
    }
    Ok(())
}

fn rename_measures(frame: &mut DataFrame) -> Result<()> {
    rename_all(
        frame,
        &[
            (LISTED_AREA, MEASURE_COLUMNS[0]),
            (SOLD_AREA, MEASURE_COLUMNS[1]),
            (SOLD_PRICE, MEASURE_COLUMNS[2]),
        ],
    )
}

/// Weekly trend for `usage`: the narrative paragraph and the last ten weeks
/// with short `MM.DD-MM.DD` row labels.
pub fn trend<S: StatsSource + ?Sized>(source: &S, usage: Usage) -> Result<(String, DataFrame)> {
    let result = source.supply_sales(&SupplySalesQuery {
        dimension: Dimension::Trend,
        granularity: Granularity::Week,
        periods: TREND_WINDOW,
        usage,
    })?;
    let text = merge_sentences(LEAD_IN, result.narrative(0)?);

    let mut frame = result.frame;
    let labels = frame
        .column(PERIOD)?
        .str()?
        .into_iter()
        .map(|label| label.map(short_period_label).transpose())
        .collect::<Result<Vec<Option<String>>>>()?;
    frame.with_column(Series::new(PERIOD, labels))?;
    rename_measures(&mut frame)?;
    Ok((text, frame))
}

/// This week's supply and sales per district.
pub fn plate<S: StatsSource + ?Sized>(source: &S, usage: Usage) -> Result<DataFrame> {
    let mut frame = source
        .supply_sales(&SupplySalesQuery {
            dimension: Dimension::Plate,
            granularity: Granularity::Week,
            periods: 1,
            usage,
        })?
        .frame;
    rename_measures(&mut frame)?;
    Ok(frame)
}

/// Replace a numeric column by its values rounded to whole numbers.
fn round_column(frame: &mut DataFrame, name: &str) -> Result<()> {
    let values = frame.column(name)?.cast(&DataType::Float64)?;
    let rounded: Vec<Option<i64>> = values
        .f64()?
        .into_iter()
        .map(|v| v.map(|x| x.round() as i64))
        .collect();
    frame.with_column(Series::new(name, rounded))?;
    Ok(())
}

/// Top three projects of the week by listed (`Sale`) or sold (`Sold`) area.
///
/// Non-residential tables get a `类型` column listing each project's
/// functional types.
pub fn rank<S: StatsSource + ?Sized>(
    source: &S,
    usage: Usage,
    kind: RankKind,
) -> Result<DataFrame> {
    debug!("{} rank for {}", kind.as_str(), usage);
    let mut outputs = vec![Measure::Area, Measure::Units];
    let mut renames = vec![
        (GroupKey::Project.column_name(), PROJECT_COL),
        (Measure::Area.column_name(), AREA_COL),
        (Measure::Units.column_name(), UNITS_COL),
    ];
    if kind == RankKind::Sold {
        outputs.push(Measure::AvgPrice);
        renames.push((Measure::AvgPrice.column_name(), PRICE_COL));
    }

    let mut frame = source
        .rank(&RankQuery {
            kind,
            periods: 1,
            group_by: vec![GroupKey::Plate, GroupKey::Project],
            outputs,
            usage,
        })?
        .head(Some(TOP_N));
    round_column(&mut frame, Measure::Area.column_name())?;
    if kind == RankKind::Sold {
        round_column(&mut frame, Measure::AvgPrice.column_name())?;
    }
    let positions: Vec<i64> = (1..=frame.height() as i64).collect();
    frame.insert_column(0, Series::new(RANK_COL, positions))?;
    rename_all(&mut frame, &renames)?;

    if usage != Usage::Residential {
        // Covers every district of the usage, not only the ranked rows.
        let types = source.rank(&RankQuery {
            kind,
            periods: 1,
            group_by: vec![GroupKey::Plate, GroupKey::Project, GroupKey::Function],
            outputs: vec![Measure::Area],
            usage,
        })?;
        let by_project = project_types(&types)?;
        debug!("{} projects with type records", by_project.len());

        let joined: Vec<String> = frame
            .column(PROJECT_COL)?
            .str()?
            .into_iter()
            .map(|name| {
                name.and_then(|n| by_project.get(n))
                    .map(|tags| join_types(tags))
                    .unwrap_or_default()
            })
            .collect();
        let at = frame
            .get_column_index(AREA_COL)
            .ok_or_else(|| ReportError::MissingColumn(AREA_COL.to_string()))?
            + 1;
        frame.insert_column(at, Series::new(TYPE_COL, joined))?;
    }

    Ok(frame)
}

/// Project name → its distinct functional types, in source order, across
/// all districts.
pub fn project_types(types: &DataFrame) -> Result<HashMap<String, Vec<String>>> {
    let projects = types.column(GroupKey::Project.column_name())?.str()?;
    let functions = types.column(GroupKey::Function.column_name())?.str()?;

    let mut map: HashMap<String, Vec<String>> = HashMap::new();
    for (name, tag) in projects.into_iter().zip(functions.into_iter()) {
        let (Some(name), Some(tag)) = (name, tag) else {
            continue;
        };
        let tags = map.entry(name.to_string()).or_default();
        if !tags.iter().any(|t| t == tag) {
            tags.push(tag.to_string());
        }
    }
    Ok(map)
}

/// Join type tags with `/`, fold `公寓办公` into `公寓` and drop `别墅`.
pub fn join_types(tags: &[String]) -> String {
    tags.join("/").replace("公寓办公", "公寓").replace("别墅", "")
}

/// Fills one template page per usage category and saves the document.
pub struct Report<S, D> {
    source: S,
    deck: D,
    week: ReportWeek,
    city: String,
}

impl<S: StatsSource, D: DocumentFiller> Report<S, D> {
    pub fn new(source: S, deck: D, week: ReportWeek, city: impl Into<String>) -> Self {
        Report {
            source,
            deck,
            week,
            city: city.into(),
        }
    }

    #[cfg(test)]
    pub fn deck(&self) -> &D {
        &self.deck
    }

    pub fn one_page(&mut self, page_idx: usize, usage: Usage) -> Result<()> {
        let label = usage.label();
        let (year, week) = (self.week.year, self.week.week);

        let (text, trend_table) = trend(&self.source, usage)?;
        let plate_table = plate(&self.source, usage)?;
        let rank_sale = rank(&self.source, usage, RankKind::Sale)?;
        let rank_sold = rank(&self.source, usage, RankKind::Sold)?;
        preview_table_rows(&rank_sold, TOP_N)?;

        let values: Vec<(u32, SlotValue)> = vec![
            // conclusion
            (2, text.into()),
            // trend chart
            (4, trend_table.into()),
            // per-district chart
            (
                5,
                format!("{}年第{}周{}{}市场分板块供销量价", year, week, self.city, label).into(),
            ),
            (6, plate_table.into()),
            // listed ranking
            (7, format!("{}年第{}周{}市场上市面积前三", year, week, label).into()),
            (8, rank_sale.into()),
            // sold ranking
            (9, format!("{}年第{}周{}市场成交面积前三", year, week, label).into()),
            (10, rank_sold.into()),
        ];
        for (shape, value) in values {
            self.deck.fill(Slot::new(page_idx, shape), value)?;
        }

        println!("[*] {}页面完成！", label);
        Ok(())
    }

    /// Fill every category page in order, then save once. Nothing is written
    /// if any page fails.
    pub fn run(&mut self, output: &Path) -> Result<()> {
        for (page_idx, usage) in Usage::ALL.into_iter().enumerate() {
            self.one_page(page_idx, usage)?;
        }
        self.deck.save(output)?;
        info!("report saved to {}", output.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{Template, TemplateDeck};
    use crate::source::{CsvSource, SupplySales};
    use polars::df;
    use std::cell::RefCell;
    use std::io::Write;
    use std::path::PathBuf;

    const NARRATIVE: &str =
        "上市面积3.20万㎡，环比上涨5.0%。成交面积2.10万㎡，环比下降3.0%。成交均价21000元/㎡，环比持平。";

    struct MockSource {
        /// (plate, project, area, units, avg price)
        candidates: Vec<(&'static str, &'static str, f64, i64, f64)>,
        /// (plate, project, function)
        types: Vec<(&'static str, &'static str, &'static str)>,
        /// Leave the price measure out of supply/sales frames.
        without_price: bool,
        rank_queries: RefCell<Vec<RankQuery>>,
    }

    impl MockSource {
        fn new() -> Self {
            MockSource {
                candidates: vec![
                    ("河西", "乙", 8_000.4, 40, 31_000.6),
                    ("江宁", "甲", 12_345.6, 80, 25_000.2),
                    ("仙林", "丙", 600.0, 3, 18_000.0),
                    ("江北", "丁", 3_200.5, 20, 15_500.5),
                    ("城南", "戊", 4_100.0, 25, 40_000.0),
                ],
                types: vec![
                    ("江宁", "甲", "商业"),
                    ("江宁", "甲", "公寓办公"),
                    ("江北", "甲", "商业"),
                    ("河西", "乙", "办公"),
                    ("河西", "乙", "别墅"),
                    ("城南", "戊", "商业"),
                ],
                without_price: false,
                rank_queries: RefCell::new(Vec::new()),
            }
        }
    }

    impl StatsSource for MockSource {
        fn supply_sales(&self, query: &SupplySalesQuery) -> Result<SupplySales> {
            let (label_col, labels): (&str, Vec<String>) = match query.dimension {
                Dimension::Trend => {
                    let first = chrono::NaiveDate::from_ymd_opt(2018, 7, 16).unwrap();
                    let labels = (0..query.periods as i64)
                        .map(|i| {
                            let start = first + chrono::Duration::days(7 * i);
                            let end = start + chrono::Duration::days(6);
                            format!("{}-{}", start.format("%Y%m%d"), end.format("%Y%m%d"))
                        })
                        .collect();
                    (PERIOD, labels)
                }
                Dimension::Plate => ("板块", vec!["江宁".to_string(), "河西".to_string()]),
            };
            let n = labels.len();
            let mut frame = df!(
                label_col => labels,
                LISTED_AREA => (0..n).map(|i| 3.2 + i as f64).collect::<Vec<_>>(),
                SOLD_AREA => vec![2.1; n],
                SOLD_PRICE => vec![21_000.0; n],
            )?;
            if self.without_price {
                frame = frame.drop(SOLD_PRICE)?;
            }
            let narratives = match query.dimension {
                Dimension::Trend => vec![NARRATIVE.to_string()],
                Dimension::Plate => Vec::new(),
            };
            Ok(SupplySales { frame, narratives })
        }

        fn rank(&self, query: &RankQuery) -> Result<DataFrame> {
            self.rank_queries.borrow_mut().push(query.clone());
            if query.group_by.contains(&GroupKey::Function) {
                let frame = df!(
                    "板块" => self.types.iter().map(|t| t.0).collect::<Vec<_>>(),
                    "popularizename" => self.types.iter().map(|t| t.1).collect::<Vec<_>>(),
                    "功能" => self.types.iter().map(|t| t.2).collect::<Vec<_>>(),
                    "面积" => vec![1.0; self.types.len()],
                )?;
                return Ok(frame);
            }

            let mut rows = self.candidates.clone();
            rows.sort_by(|a, b| b.2.total_cmp(&a.2));
            let mut columns = vec![
                Series::new("板块", rows.iter().map(|r| r.0).collect::<Vec<_>>()),
                Series::new("popularizename", rows.iter().map(|r| r.1).collect::<Vec<_>>()),
            ];
            for m in &query.outputs {
                let name = m.column_name();
                columns.push(match m {
                    Measure::Area => Series::new(name, rows.iter().map(|r| r.2).collect::<Vec<_>>()),
                    Measure::Units => Series::new(name, rows.iter().map(|r| r.3).collect::<Vec<_>>()),
                    Measure::AvgPrice => {
                        Series::new(name, rows.iter().map(|r| r.4).collect::<Vec<_>>())
                    }
                });
            }
            Ok(DataFrame::new(columns)?)
        }
    }

    #[derive(Default)]
    struct RecordingDeck {
        filled: Vec<(Slot, SlotValue)>,
        saved: RefCell<Vec<PathBuf>>,
        fail_on: Option<Slot>,
    }

    impl DocumentFiller for RecordingDeck {
        fn fill(&mut self, slot: Slot, value: SlotValue) -> Result<()> {
            if self.fail_on == Some(slot) {
                return Err(ReportError::UnknownSlot(slot.to_string()));
            }
            self.filled.push((slot, value));
            Ok(())
        }

        fn save(&self, path: &Path) -> Result<()> {
            self.saved.borrow_mut().push(path.to_path_buf());
            Ok(())
        }
    }

    fn week() -> ReportWeek {
        ReportWeek::new(2018, 38).unwrap()
    }

    fn texts(frame: &DataFrame, name: &str) -> Vec<String> {
        frame
            .column(name)
            .unwrap()
            .str()
            .unwrap()
            .into_no_null_iter()
            .map(String::from)
            .collect()
    }

    fn ints(frame: &DataFrame, name: &str) -> Vec<i64> {
        frame
            .column(name)
            .unwrap()
            .i64()
            .unwrap()
            .into_no_null_iter()
            .collect()
    }

    #[test]
    fn trend_relabels_rows_and_merges_narrative() {
        let (text, frame) = trend(&MockSource::new(), Usage::Residential).unwrap();

        assert_eq!(frame.height(), 10);
        assert_eq!(
            frame.get_column_names(),
            [PERIOD, MEASURE_COLUMNS[0], MEASURE_COLUMNS[1], MEASURE_COLUMNS[2]]
        );
        let labels = texts(&frame, PERIOD);
        assert_eq!(labels[0], "07.16-07.22");
        for label in &labels {
            assert_eq!(label.len(), "MM.DD-MM.DD".len());
        }

        assert!(text.starts_with("本周上市面积"));
        assert_eq!(text.matches('；').count(), 2);
        assert_eq!(text.matches('。').count(), NARRATIVE.matches('。').count() - 2);
    }

    #[test]
    fn trend_without_a_measure_column_fails() {
        let mut source = MockSource::new();
        source.without_price = true;
        assert!(matches!(
            trend(&source, Usage::Residential),
            Err(ReportError::Polars(_))
        ));
        assert!(matches!(
            plate(&source, Usage::Residential),
            Err(ReportError::Polars(_))
        ));
    }

    #[test]
    fn plate_renames_measures() {
        let frame = plate(&MockSource::new(), Usage::Office).unwrap();
        assert_eq!(
            frame.get_column_names(),
            ["板块", MEASURE_COLUMNS[0], MEASURE_COLUMNS[1], MEASURE_COLUMNS[2]]
        );
        assert_eq!(texts(&frame, "板块"), ["江宁", "河西"]);
    }

    #[test]
    fn sold_rank_is_top_three_with_whole_numbers() {
        let source = MockSource::new();
        let frame = rank(&source, Usage::Residential, RankKind::Sold).unwrap();

        assert_eq!(
            frame.get_column_names(),
            [RANK_COL, PLATE_COL, PROJECT_COL, AREA_COL, UNITS_COL, PRICE_COL]
        );
        assert_eq!(frame.height(), 3);
        assert_eq!(ints(&frame, RANK_COL), [1, 2, 3]);
        assert_eq!(texts(&frame, PLATE_COL), ["江宁", "河西", "城南"]);
        assert_eq!(texts(&frame, PROJECT_COL), ["甲", "乙", "戊"]);
        assert_eq!(ints(&frame, AREA_COL), [12_346, 8_000, 4_100]);
        assert_eq!(ints(&frame, UNITS_COL), [80, 40, 25]);
        assert_eq!(ints(&frame, PRICE_COL), [25_000, 31_001, 40_000]);
        // Residential needs no type lookup.
        assert_eq!(source.rank_queries.borrow().len(), 1);
    }

    #[test]
    fn sale_rank_has_no_price_column() {
        let frame = rank(&MockSource::new(), Usage::Residential, RankKind::Sale).unwrap();
        assert_eq!(
            frame.get_column_names(),
            [RANK_COL, PLATE_COL, PROJECT_COL, AREA_COL, UNITS_COL]
        );
    }

    #[test]
    fn non_residential_rank_carries_types() {
        let source = MockSource::new();
        let frame = rank(&source, Usage::Commercial, RankKind::Sold).unwrap();

        assert_eq!(frame.height(), 3);
        assert_eq!(
            frame.get_column_names(),
            [RANK_COL, PLATE_COL, PROJECT_COL, AREA_COL, TYPE_COL, UNITS_COL, PRICE_COL]
        );
        let types = texts(&frame, TYPE_COL);
        // 甲 spans two districts; 乙's villa tag is stripped.
        assert_eq!(types, ["商业/公寓", "办公/", "商业"]);

        let queries = source.rank_queries.borrow();
        assert_eq!(queries.len(), 2);
        assert_eq!(
            queries[1].group_by,
            [GroupKey::Plate, GroupKey::Project, GroupKey::Function]
        );
        assert_eq!(queries[1].outputs, [Measure::Area]);
        assert_eq!(queries[1].kind, RankKind::Sold);
    }

    #[test]
    fn short_rank_is_not_padded() {
        let mut source = MockSource::new();
        source.candidates = vec![
            ("江宁", "甲", 12_345.6, 80, 25_000.2),
            ("鼓楼", "己", 10.0, 1, 1.0),
        ];
        let frame = rank(&source, Usage::Villa, RankKind::Sale).unwrap();
        assert_eq!(frame.height(), 2);
        assert_eq!(texts(&frame, TYPE_COL), ["商业/公寓", ""]);
    }

    #[test]
    fn join_types_applies_substitutions() {
        let tags = vec!["公寓办公".to_string(), "商业".to_string()];
        assert_eq!(join_types(&tags), "公寓/商业");
        let tags = vec!["别墅".to_string()];
        assert_eq!(join_types(&tags), "");
    }

    #[test]
    fn project_types_deduplicates_across_districts() {
        let types = df!(
            "板块" => ["江宁", "江北", "江北"],
            "popularizename" => ["甲", "甲", "甲"],
            "功能" => ["商业", "商业", "办公"],
            "面积" => [1.0, 1.0, 1.0],
        )
        .unwrap();
        let map = project_types(&types).unwrap();
        assert_eq!(map["甲"], ["商业", "办公"]);
    }

    #[test]
    fn one_page_fills_slots_in_order() {
        let mut report = Report::new(MockSource::new(), RecordingDeck::default(), week(), "南京");
        report.one_page(1, Usage::Villa).unwrap();

        let filled = &report.deck().filled;
        let slots: Vec<String> = filled.iter().map(|(s, _)| s.to_string()).collect();
        assert_eq!(
            slots,
            ["1 2", "1 4", "1 5", "1 6", "1 7", "1 8", "1 9", "1 10"]
        );
        assert!(matches!(
            &filled[2].1,
            SlotValue::Text(t) if t == "2018年第38周南京别墅市场分板块供销量价"
        ));
        assert!(matches!(
            &filled[6].1,
            SlotValue::Text(t) if t == "2018年第38周别墅市场成交面积前三"
        ));
        assert!(matches!(&filled[7].1, SlotValue::Table(f) if f.height() == 3));
    }

    #[test]
    fn run_saves_once_after_all_pages() {
        let mut report = Report::new(MockSource::new(), RecordingDeck::default(), week(), "南京");
        report.run(Path::new("out.md")).unwrap();
        assert_eq!(report.deck().filled.len(), 32);
        assert_eq!(*report.deck().saved.borrow(), [PathBuf::from("out.md")]);
    }

    #[test]
    fn failure_aborts_without_saving() {
        let deck = RecordingDeck {
            fail_on: Some(Slot::new(2, 8)),
            ..RecordingDeck::default()
        };
        let mut report = Report::new(MockSource::new(), deck, week(), "南京");
        assert!(report.run(Path::new("out.md")).is_err());
        assert!(report.deck().saved.borrow().is_empty());
        assert_eq!(report.deck().filled.len(), 8 + 8 + 5);
    }

    #[test]
    fn bundled_template_accepts_every_slot() {
        let template: Template =
            serde_json::from_str(include_str!("../template.json")).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.md");

        let mut report = Report::new(MockSource::new(), TemplateDeck::new(template), week(), "南京");
        report.run(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(!content.contains("_(empty)_"));
        assert!(content.contains("2018年第38周办公市场上市面积前三"));
    }

    #[test]
    fn csv_and_template_files_produce_a_report() {
        let dir = tempfile::tempdir().unwrap();
        let data_path = dir.path().join("transactions.csv");
        let template_path = dir.path().join("template.json");
        let output = dir.path().join("out").join("2018年第38周周报.md");

        let mut data = std::fs::File::create(&data_path).unwrap();
        writeln!(data, "date,kind,usage,plate,project,function,area,units,amount").unwrap();
        writeln!(data, "2018-09-18,sale,住宅,江宁,九龙湖,住宅,12000,100,").unwrap();
        writeln!(data, "2018-09-19,sold,住宅,江宁,九龙湖,住宅,8000,70,200000000").unwrap();
        writeln!(data, "2018-09-12,sold,住宅,河西,鱼嘴,住宅,4000,30,140000000").unwrap();
        writeln!(data, "2018-09-20,sold,商业,河西,金鹰,公寓办公,900,12,27000000").unwrap();
        writeln!(data, "2018-09-20,sold,商业,河西,金鹰,商业,300,2,9000000").unwrap();
        writeln!(data, "not-a-date,sold,办公,河西,金鹰,办公,1,1,1").unwrap();
        std::fs::write(&template_path, include_str!("../template.json")).unwrap();

        let source = CsvSource::open(&data_path, week()).unwrap();
        let deck = TemplateDeck::open(&template_path).unwrap();
        Report::new(source, deck, week(), "南京")
            .run(&output)
            .unwrap();

        let content = std::fs::read_to_string(&output).unwrap();
        assert!(content.starts_with("# 南京房地产市场周报"));
        assert!(content.contains("2018年第38周南京住宅市场分板块供销量价"));
        assert!(content.contains("09.17-09.23"));
        assert!(content.contains("本周上市面积1.20万㎡"));
        assert!(content.contains("| 九龙湖"));
        // 金鹰 is sold as serviced apartments and shops.
        assert!(content.contains("公寓/商业"));
        assert!(!content.contains("_(empty)_"));
    }
}
