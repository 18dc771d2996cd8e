use crate::compare::{evaluate, Bound, CompareOp, Threshold};
use crate::config::{CalcMode, GroupedTrigger, Logic, RuleConfig, Schedule, TimeCondition, Trigger};
use crate::kpi::{combine_totals, resolve_kpi, KpiQuery};
use crate::legend::{build_breakdown, legend_active, parse_rows, GroupRow, LegendSelection};
use crate::query::{coerce_number, AggregateRequest, Aggregator, Filter, FilterValue, PivotRequest, QueryResult};
use crate::trigger::{time_condition_met, ThresholdOutcome, TriggerEvaluator};
use crate::xpick::{pretty_x_value, resolve_xpick, DateToken, SpecialPick, XPick, XPickInput};
use crate::QueryEngine;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

type AggFn = dyn Fn(&AggregateRequest) -> anyhow::Result<QueryResult> + Send + Sync;
type PivotFn = dyn Fn(&PivotRequest) -> anyhow::Result<QueryResult> + Send + Sync;

struct FakeEngine {
    aggregate: Box<AggFn>,
    pivot: Box<PivotFn>,
    calls: Mutex<Vec<String>>,
}

impl FakeEngine {
    fn new(
        aggregate: impl Fn(&AggregateRequest) -> anyhow::Result<QueryResult> + Send + Sync + 'static,
        pivot: impl Fn(&PivotRequest) -> anyhow::Result<QueryResult> + Send + Sync + 'static,
    ) -> Self {
        Self {
            aggregate: Box::new(aggregate),
            pivot: Box::new(pivot),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueryEngine for FakeEngine {
    async fn aggregate(&self, req: &AggregateRequest) -> anyhow::Result<QueryResult> {
        self.calls.lock().unwrap().push(format!("aggregate:{}", req.agg));
        (self.aggregate)(req)
    }

    async fn pivot(&self, req: &PivotRequest) -> anyhow::Result<QueryResult> {
        self.calls.lock().unwrap().push(format!("pivot:{}", req.rows.len()));
        (self.pivot)(req)
    }
}

fn scalar(v: Value) -> QueryResult {
    QueryResult {
        columns: vec!["value".into()],
        rows: vec![vec![v]],
    }
}

fn failing_pivot(_: &PivotRequest) -> anyhow::Result<QueryResult> {
    anyhow::bail!("pivot unavailable")
}

fn failing_aggregate(_: &AggregateRequest) -> anyhow::Result<QueryResult> {
    anyhow::bail!("aggregate unavailable")
}

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
    day(y, m, d).and_hms_opt(h, min, 0).unwrap()
}

fn sales_threshold(value: Value) -> serde_json::Value {
    json!({
        "source": "sales",
        "aggregator": "sum",
        "measure": "amount",
        "operator": ">=",
        "value": value
    })
}

// ---- compare ----

#[test]
fn compare_operators_follow_textbook_semantics() {
    let cases = [
        (CompareOp::LessThan, 5.0, 10.0, true),
        (CompareOp::LessThan, 10.0, 10.0, false),
        (CompareOp::LessEqual, 10.0, 10.0, true),
        (CompareOp::GreaterThan, 10.0, 10.0, false),
        (CompareOp::GreaterThan, 11.0, 10.0, true),
        (CompareOp::GreaterEqual, 10.0, 10.0, true),
        (CompareOp::Equal, 10.0, 10.0, true),
        (CompareOp::Equal, 10.5, 10.0, false),
    ];
    for (op, kpi, bound, expected) in cases {
        assert_eq!(evaluate(op, kpi, &json!(bound)), expected, "{kpi} {op} {bound}");
    }
}

#[test]
fn between_is_order_independent_and_inclusive() {
    for bound in [json!([1, 10]), json!([10, 1])] {
        assert!(evaluate(CompareOp::Between, 1.0, &bound));
        assert!(evaluate(CompareOp::Between, 10.0, &bound));
        assert!(evaluate(CompareOp::Between, 5.5, &bound));
        assert!(!evaluate(CompareOp::Between, 10.01, &bound));
    }
    assert_eq!(
        Bound::parse(CompareOp::Between, Some(&json!(["10", 1]))),
        Some(Bound::Between { low: 1.0, high: 10.0 })
    );
}

#[test]
fn missing_or_malformed_bound_never_matches() {
    assert!(!Threshold::new(CompareOp::GreaterThan, None).matches(1e9));
    assert!(!evaluate(CompareOp::GreaterThan, 5.0, &json!("lots")));
    assert!(!evaluate(CompareOp::Between, 5.0, &json!(3)));
    assert!(!evaluate(CompareOp::Between, 5.0, &json!([1, 2, 3])));
    assert!(!evaluate(CompareOp::LessThan, 5.0, &json!([1, 10])));
    assert!(!evaluate(CompareOp::LessThan, f64::NAN, &json!(10)));
}

#[test]
fn compare_op_parses_symbols_and_words() {
    assert_eq!("<=".parse::<CompareOp>().unwrap(), CompareOp::LessEqual);
    assert_eq!("GTE".parse::<CompareOp>().unwrap(), CompareOp::GreaterEqual);
    assert_eq!("==".parse::<CompareOp>().unwrap(), CompareOp::Equal);
    assert!("~".parse::<CompareOp>().is_err());
    let op: CompareOp = serde_json::from_value(json!("between")).unwrap();
    assert_eq!(op, CompareOp::Between);
    assert_eq!(serde_json::to_value(CompareOp::GreaterThan).unwrap(), json!(">"));
}

// ---- numeric coercion ----

#[test]
fn coercion_is_idempotent_on_numbers() {
    for n in [0.0, -3.5, 1234.0, 1e12] {
        assert_eq!(coerce_number(&json!(n)), n);
    }
    assert_eq!(coerce_number(&json!("1,234.5")), 1234.5);
    assert_eq!(coerce_number(&json!("1.5e3")), 1500.0);
    assert_eq!(coerce_number(&Value::Null), 0.0);
    assert_eq!(coerce_number(&json!("n/a")), 0.0);
    assert_eq!(coerce_number(&json!(true)), 0.0);
}

#[test]
fn scalar_value_prefers_value_column() {
    let result = QueryResult {
        columns: vec!["count".into(), "value".into()],
        rows: vec![vec![json!(3), json!("2,500")]],
    };
    assert_eq!(result.scalar_value(), 2500.0);

    let result = QueryResult {
        columns: vec!["label".into(), "total".into()],
        rows: vec![vec![json!("all"), json!(42)]],
    };
    assert_eq!(result.scalar_value(), 42.0);
    assert_eq!(QueryResult::default().scalar_value(), 0.0);
}

// ---- configuration ----

#[test]
fn rule_config_parses_grouped_trigger_and_actions() {
    let raw = json!({
        "datasourceId": "ds-1",
        "triggersGroup": {
            "time": { "enabled": false, "hour": 9, "minute": 30 },
            "threshold": sales_threshold(json!(1000)),
            "logic": "or"
        },
        "actions": [
            { "type": "email", "to": "a@example.com, b@example.com", "subject": "Sales" },
            { "type": "sms", "to": ["+15550001"], "message": "KPI {{kpi_fmt}}" }
        ],
        "render": { "mode": "table", "querySpec": { "source": "sales", "groupBy": "region" } }
    });
    let config: RuleConfig = serde_json::from_value(raw).unwrap();
    let group = config.triggers_group.as_ref().unwrap();
    assert_eq!(group.logic, Logic::Or);
    assert!(!group.time.as_ref().unwrap().enabled);
    assert_eq!(group.threshold.as_ref().unwrap().aggregator, Aggregator::Sum);
    match &config.actions[0] {
        crate::config::Action::Email { to, .. } => {
            assert_eq!(to, &vec!["a@example.com".to_string(), "b@example.com".to_string()])
        }
        other => panic!("unexpected action {other:?}"),
    }
    let spec = config.render.query_spec.as_ref().unwrap();
    assert_eq!(spec.group_by, vec!["region".to_string()]);
    assert!(config.is_schedulable());
}

#[test]
fn explicit_cron_prefers_grouped_trigger() {
    let config: RuleConfig = serde_json::from_value(json!({
        "triggers": [{ "type": "time", "hour": 8, "minute": 0, "cron": "0 0 8 * * *" }],
        "triggersGroup": { "threshold": {
            "source": "s", "operator": ">", "value": 1, "cron": "0 */5 * * * *"
        } }
    }))
    .unwrap();
    assert_eq!(config.explicit_cron(), Some("0 */5 * * * *"));
    assert_eq!(RuleConfig::default().explicit_cron(), None);
    assert!(!RuleConfig::default().is_schedulable());
}

// ---- x-pick ----

fn no_engine() -> FakeEngine {
    FakeEngine::new(failing_aggregate, failing_pivot)
}

#[tokio::test]
async fn xpick_today_has_no_lower_bound() {
    let engine = no_engine();
    let filter = Filter::new();
    let pick = XPick::Token {
        token: DateToken::Today,
    };
    for today in [day(2024, 3, 5), day(2024, 12, 31), day(2024, 2, 29)] {
        let res = resolve_xpick(
            &engine,
            XPickInput {
                source: "sales",
                filter: &filter,
                x_field: Some("order_date"),
                x_value: None,
                pick: &pick,
            },
            today,
        )
        .await;
        let Some(FilterValue::Range(bounds)) = res.filter.get("order_date") else {
            panic!("expected a range on order_date");
        };
        let tomorrow = today.succ_opt().unwrap().format("%Y-%m-%d").to_string();
        assert_eq!(bounds.gte, None);
        assert_eq!(bounds.gt, None);
        assert_eq!(bounds.lte, None);
        assert_eq!(bounds.lt, Some(json!(tomorrow)));
        assert_eq!(res.value.as_deref(), Some(today.format("%Y-%m-%d").to_string().as_str()));
    }
    assert!(engine.calls().is_empty());
}

fn date_input<'a>(filter: &'a Filter, pick: &'a XPick) -> XPickInput<'a> {
    XPickInput {
        source: "sales",
        filter,
        x_field: Some("d"),
        x_value: None,
        pick,
    }
}

#[tokio::test]
async fn xpick_yesterday_and_this_month_are_bounded() {
    let engine = no_engine();
    let filter = Filter::new();

    let yesterday = XPick::Token {
        token: DateToken::Yesterday,
    };
    let res = resolve_xpick(&engine, date_input(&filter, &yesterday), day(2024, 3, 1)).await;
    let Some(FilterValue::Range(b)) = res.filter.get("d") else {
        panic!("expected range");
    };
    assert_eq!(b.gte, Some(json!("2024-02-29")));
    assert_eq!(b.lt, Some(json!("2024-03-01")));

    let month = XPick::Token {
        token: DateToken::ThisMonth,
    };
    let res = resolve_xpick(&engine, date_input(&filter, &month), day(2024, 12, 17)).await;
    let Some(FilterValue::Range(b)) = res.filter.get("d") else {
        panic!("expected range");
    };
    assert_eq!(b.gte, Some(json!("2024-12-01")));
    assert_eq!(b.lt, Some(json!("2025-01-01")));
    assert_eq!(res.value.as_deref(), Some("2024-12"));
    assert_eq!(res.pretty.as_deref(), Some("December 2024"));
}

#[tokio::test]
async fn xpick_range_and_custom() {
    let engine = no_engine();
    let mut filter = Filter::new();
    filter.insert("region".into(), FilterValue::Scalar(json!("east")));

    let range = XPick::Range {
        from: Some(json!("2024-01-01")),
        to: Some(json!("2024-01-31")),
        inclusive_to: true,
    };
    let res = resolve_xpick(
        &engine,
        XPickInput {
            source: "sales",
            filter: &filter,
            x_field: Some("d"),
            x_value: None,
            pick: &range,
        },
        day(2024, 6, 1),
    )
    .await;
    let Some(FilterValue::Range(b)) = res.filter.get("d") else {
        panic!("expected range");
    };
    assert_eq!(b.gte, Some(json!("2024-01-01")));
    assert_eq!(b.lte, Some(json!("2024-01-31")));
    assert_eq!(b.lt, None);
    assert!(res.value.is_none());
    assert!(res.filter.contains_key("region"));

    let custom = XPick::Custom {
        value: json!("Q1 2024"),
    };
    let res = resolve_xpick(
        &engine,
        XPickInput {
            source: "sales",
            filter: &filter,
            x_field: Some("d"),
            x_value: None,
            pick: &custom,
        },
        day(2024, 6, 1),
    )
    .await;
    assert_eq!(res.filter, filter);
    assert_eq!(res.value.as_deref(), Some("Q1 2024"));
}

#[tokio::test]
async fn xpick_special_queries_min_for_first_and_pins_value() {
    let engine = FakeEngine::new(
        |req| {
            assert_eq!(req.measure.as_deref(), Some("order_date"));
            Ok(scalar(json!(match req.agg {
                Aggregator::Min => "2024-01-02",
                _ => "2024-06-30",
            })))
        },
        failing_pivot,
    );
    let filter = Filter::new();
    let first = XPick::Special {
        pick: SpecialPick::First,
    };
    let res = resolve_xpick(
        &engine,
        XPickInput {
            source: "sales",
            filter: &filter,
            x_field: Some("order_date"),
            x_value: None,
            pick: &first,
        },
        day(2024, 7, 1),
    )
    .await;
    assert_eq!(res.value.as_deref(), Some("2024-01-02"));
    assert_eq!(res.pretty.as_deref(), Some("Jan 2, 2024"));
    assert_eq!(
        res.filter.get("order_date"),
        Some(&FilterValue::Scalar(json!("2024-01-02")))
    );
    assert_eq!(engine.calls(), vec!["aggregate:min".to_string()]);
}

#[tokio::test]
async fn xpick_failure_degrades_to_unmodified_filter() {
    let engine = no_engine();
    let mut filter = Filter::new();
    filter.insert("region".into(), FilterValue::Scalar(json!("east")));
    let last = XPick::Special {
        pick: SpecialPick::Last,
    };
    let res = resolve_xpick(
        &engine,
        XPickInput {
            source: "sales",
            filter: &filter,
            x_field: Some("order_date"),
            x_value: None,
            pick: &last,
        },
        day(2024, 7, 1),
    )
    .await;
    assert_eq!(res.filter, filter);
    assert!(res.value.is_none());

    // token without an x field
    let token = XPick::Token {
        token: DateToken::Today,
    };
    let res = resolve_xpick(
        &engine,
        XPickInput {
            source: "sales",
            filter: &filter,
            x_field: None,
            x_value: None,
            pick: &token,
        },
        day(2024, 7, 1),
    )
    .await;
    assert_eq!(res.filter, filter);
}

#[test]
fn pretty_x_value_formats_known_shapes() {
    assert_eq!(pretty_x_value("2024-03-05"), "Mar 5, 2024");
    assert_eq!(pretty_x_value("2024-03"), "March 2024");
    assert_eq!(pretty_x_value("2024-03-05T14:30:00"), "Mar 5, 2024 14:30");
    assert_eq!(pretty_x_value("north"), "north");
}

// ---- kpi ----

fn kpi_query(mode: CalcMode, x_field: Option<&str>) -> KpiQuery {
    KpiQuery {
        source: "sales".into(),
        aggregator: Aggregator::Sum,
        measure: Some("amount".into()),
        filter: Filter::new(),
        x_field: x_field.map(str::to_string),
        mode,
    }
}

#[tokio::test]
async fn query_mode_falls_back_to_pivot() {
    let engine = FakeEngine::new(failing_aggregate, |req| {
        assert!(req.rows.is_empty());
        Ok(QueryResult {
            columns: vec!["total".into()],
            rows: vec![vec![json!("9,000")]],
        })
    });
    let kpi = resolve_kpi(&engine, &kpi_query(CalcMode::Query, None)).await;
    assert_eq!(kpi, 9000.0);
    assert_eq!(engine.calls(), vec!["aggregate:sum", "pivot:0"]);
}

#[tokio::test]
async fn pivot_mode_prefers_windowed_total() {
    let engine = FakeEngine::new(failing_aggregate, |req| {
        assert_eq!(req.rows, vec!["order_date".to_string()]);
        Ok(QueryResult {
            columns: vec!["order_date".into(), "amount".into()],
            rows: vec![
                vec![json!("2024-01-01"), json!(100)],
                vec![json!("2024-01-02"), json!("250.5")],
            ],
        })
    });
    let kpi = resolve_kpi(&engine, &kpi_query(CalcMode::Pivot, Some("order_date"))).await;
    assert_eq!(kpi, 350.5);
    assert_eq!(engine.calls(), vec!["pivot:1"]);
}

#[tokio::test]
async fn windowed_total_falls_back_to_plain_pivot() {
    let engine = FakeEngine::new(failing_aggregate, |req| {
        if req.rows.is_empty() {
            Ok(QueryResult {
                columns: vec!["avg".into()],
                rows: vec![vec![json!(12.5)]],
            })
        } else {
            Ok(QueryResult {
                columns: vec!["d".into(), "avg".into()],
                rows: vec![vec![json!("x"), json!(1)]],
            })
        }
    });
    let mut q = kpi_query(CalcMode::Pivot, Some("d"));
    q.aggregator = Aggregator::Avg;
    assert_eq!(resolve_kpi(&engine, &q).await, 12.5);
    assert_eq!(engine.calls(), vec!["pivot:1", "pivot:0"]);
}

#[tokio::test]
async fn kpi_is_zero_when_everything_fails() {
    let engine = no_engine();
    assert_eq!(resolve_kpi(&engine, &kpi_query(CalcMode::Pivot, None)).await, 0.0);
}

#[test]
fn combine_totals_rules() {
    assert_eq!(combine_totals(Aggregator::Count, &[1.0, 2.0]).unwrap(), 3.0);
    assert_eq!(combine_totals(Aggregator::Min, &[4.0, 2.0, 9.0]).unwrap(), 2.0);
    assert_eq!(combine_totals(Aggregator::Max, &[4.0, 2.0, 9.0]).unwrap(), 9.0);
    assert_eq!(combine_totals(Aggregator::Sum, &[]).unwrap(), 0.0);
    assert!(combine_totals(Aggregator::Distinct, &[1.0]).is_err());
}

// ---- legend ----

fn region_rows() -> QueryResult {
    QueryResult {
        columns: vec!["region".into(), "value".into()],
        rows: vec![
            vec![json!("west"), json!(800)],
            vec![json!("east"), json!(1200)],
        ],
    }
}

#[test]
fn legend_inactive_when_field_is_filtered() {
    let fields = vec!["region".to_string()];
    let mut filter = Filter::new();
    assert!(legend_active(&fields, &filter));
    filter.insert("region".into(), FilterValue::Scalar(json!("east")));
    assert!(!legend_active(&fields, &filter));
    assert!(!legend_active(&[], &Filter::new()));
}

#[test]
fn legend_selects_best_match_and_keeps_unmatched_cards() {
    let fields = vec!["region".to_string()];
    let rows = parse_rows(&region_rows(), &fields);
    let threshold = Threshold::new(CompareOp::GreaterEqual, Some(&json!(1000)));
    let breakdown = build_breakdown(&fields, &rows, &threshold).unwrap();

    assert!(breakdown.fired());
    assert_eq!(breakdown.best_category(), "east");
    assert_eq!(breakdown.kpi(), 1200.0);
    assert_eq!(breakdown.cards.len(), 2);
    assert_eq!(breakdown.cards[0].category, "east");
    assert!(breakdown.cards[0].matched);
    assert_eq!(breakdown.cards[1].category, "west");
    assert_eq!(breakdown.cards[1].value, 800.0);
    assert!(!breakdown.cards[1].matched);
}

#[test]
fn legend_kpi_sums_all_matches() {
    let fields = vec!["region".to_string()];
    let rows = parse_rows(&region_rows(), &fields);
    let threshold = Threshold::new(CompareOp::GreaterThan, Some(&json!(500)));
    let breakdown = build_breakdown(&fields, &rows, &threshold).unwrap();
    assert_eq!(
        breakdown.selection,
        LegendSelection::Matched {
            category: "east".into(),
            kpi: 2000.0
        }
    );
}

#[test]
fn legend_no_match_falls_back_to_top_category() {
    let fields = vec!["region".to_string()];
    let rows = parse_rows(&region_rows(), &fields);
    let threshold = Threshold::new(CompareOp::GreaterEqual, Some(&json!(5000)));
    let breakdown = build_breakdown(&fields, &rows, &threshold).unwrap();
    assert!(!breakdown.fired());
    assert_eq!(
        breakdown.selection,
        LegendSelection::NoMatchFallback {
            category: "east".into(),
            value: 1200.0
        }
    );
    assert!(build_breakdown(&fields, &[], &threshold).is_none());
}

#[test]
fn legend_nests_children_under_parent() {
    let fields = vec!["region".to_string(), "channel".to_string(), "tier".to_string()];
    let rows = vec![
        GroupRow {
            labels: vec!["east".into(), "web".into(), "gold".into()],
            value: 100.0,
        },
        GroupRow {
            labels: vec!["west".into(), "store".into(), "gold".into()],
            value: 50.0,
        },
        GroupRow {
            labels: vec!["east".into(), "store".into(), "silver".into()],
            value: 300.0,
        },
    ];
    let threshold = Threshold::new(CompareOp::GreaterThan, Some(&json!(0)));
    let breakdown = build_breakdown(&fields, &rows, &threshold).unwrap();
    let east = &breakdown.cards[0];
    assert_eq!(east.category, "east");
    assert_eq!(east.value, 400.0);
    assert_eq!(east.children.len(), 2);
    assert_eq!(east.children[0].label, "store / silver");
    assert_eq!(east.children[0].value, 300.0);
    assert_eq!(breakdown.cards[1].children[0].label, "store / gold");
}

#[test]
fn parse_rows_falls_back_to_position_and_blank_label() {
    let result = QueryResult {
        columns: vec!["k".into(), "sum".into()],
        rows: vec![vec![Value::Null, json!("1,000")]],
    };
    let rows = parse_rows(&result, &["region".to_string()]);
    assert_eq!(rows[0].labels, vec!["(blank)".to_string()]);
    assert_eq!(rows[0].value, 1000.0);
}

// ---- trigger evaluation ----

fn sum_engine(total: f64) -> Arc<FakeEngine> {
    Arc::new(FakeEngine::new(
        move |_| Ok(scalar(json!(total))),
        failing_pivot,
    ))
}

fn threshold_rule(value: Value) -> RuleConfig {
    serde_json::from_value(json!({
        "triggers": [threshold_trigger(value)]
    }))
    .unwrap()
}

fn threshold_trigger(value: Value) -> Value {
    let mut t = sales_threshold(value);
    t["type"] = json!("threshold");
    t
}

#[test]
fn time_condition_matches_schedule() {
    let mut cond = TimeCondition {
        enabled: true,
        hour: 9,
        minute: 30,
        schedule: Schedule::Daily,
        cron: None,
    };
    // 2024-03-04 is a Monday
    assert!(time_condition_met(&cond, at(2024, 3, 4, 9, 30), false));
    assert!(!time_condition_met(&cond, at(2024, 3, 4, 9, 31), false));
    assert!(time_condition_met(&cond, at(2024, 3, 4, 23, 0), true));

    cond.schedule = Schedule::Weekly { days: vec![0, 4] };
    assert!(time_condition_met(&cond, at(2024, 3, 4, 9, 30), false));
    assert!(!time_condition_met(&cond, at(2024, 3, 5, 9, 30), false));

    cond.schedule = Schedule::Monthly { days: vec![5] };
    assert!(time_condition_met(&cond, at(2024, 3, 5, 9, 30), false));
    assert!(!time_condition_met(&cond, at(2024, 3, 4, 9, 30), false));

    cond.enabled = false;
    assert!(time_condition_met(&cond, at(2024, 1, 1, 0, 0), false));
}

#[tokio::test]
async fn threshold_fires_on_sum_above_bound() {
    let evaluator = TriggerEvaluator::new(sum_engine(1500.0));
    let eval = evaluator
        .evaluate(&threshold_rule(json!(1000)), at(2024, 3, 4, 10, 0), false)
        .await;
    assert!(eval.fired);
    assert_eq!(eval.kpi, Some(1500.0));
    assert!(matches!(
        eval.threshold.unwrap().outcome,
        ThresholdOutcome::Fired { kpi } if kpi == 1500.0
    ));
}

#[tokio::test]
async fn threshold_below_bound_does_not_fire() {
    let evaluator = TriggerEvaluator::new(sum_engine(500.0));
    let eval = evaluator
        .evaluate(&threshold_rule(json!(1000)), at(2024, 3, 4, 10, 0), false)
        .await;
    assert!(!eval.fired);
    assert_eq!(eval.kpi, Some(500.0));
}

#[tokio::test]
async fn grouped_trigger_with_disabled_time_uses_threshold_only() {
    for logic in [Logic::And, Logic::Or] {
        let config = RuleConfig {
            triggers_group: Some(GroupedTrigger {
                time: Some(TimeCondition {
                    enabled: false,
                    hour: 3,
                    minute: 0,
                    schedule: Schedule::Daily,
                    cron: None,
                }),
                threshold: Some(serde_json::from_value(sales_threshold(json!(1000))).unwrap()),
                logic,
            }),
            ..Default::default()
        };
        let evaluator = TriggerEvaluator::new(sum_engine(1500.0));
        let eval = evaluator.evaluate(&config, at(2024, 3, 4, 10, 0), false).await;
        assert!(eval.fired, "{logic:?}");
        assert_eq!(eval.time_ok, Some(true));
        assert_eq!(eval.kpi, Some(1500.0));
    }
}

#[tokio::test]
async fn grouped_trigger_evaluates_both_sides() {
    let engine = sum_engine(1500.0);
    let config = RuleConfig {
        triggers_group: Some(GroupedTrigger {
            time: Some(TimeCondition {
                enabled: true,
                hour: 3,
                minute: 0,
                schedule: Schedule::Daily,
                cron: None,
            }),
            threshold: Some(serde_json::from_value(sales_threshold(json!(1000))).unwrap()),
            logic: Logic::And,
        }),
        ..Default::default()
    };
    let evaluator = TriggerEvaluator::new(engine.clone());
    let eval = evaluator.evaluate(&config, at(2024, 3, 4, 10, 0), false).await;
    assert!(!eval.fired);
    assert_eq!(eval.time_ok, Some(false));
    // threshold side still ran its query
    assert_eq!(engine.calls(), vec!["aggregate:sum"]);

    let mut or_config = config.clone();
    or_config.triggers_group.as_mut().unwrap().logic = Logic::Or;
    assert!(evaluator.evaluate(&or_config, at(2024, 3, 4, 10, 0), false).await.fired);
}

#[tokio::test]
async fn legacy_triggers_fire_on_first_true() {
    let engine = sum_engine(10.0);
    let config = RuleConfig {
        triggers: vec![
            serde_json::from_value(threshold_trigger(json!(1000))).unwrap(),
            Trigger::Time(TimeCondition {
                enabled: true,
                hour: 0,
                minute: 0,
                schedule: Schedule::Daily,
                cron: None,
            }),
            serde_json::from_value(threshold_trigger(json!(1))).unwrap(),
        ],
        ..Default::default()
    };
    let evaluator = TriggerEvaluator::new(engine.clone());
    let eval = evaluator.evaluate(&config, at(2024, 3, 4, 10, 0), false).await;
    assert!(eval.fired);
    assert_eq!(eval.kpi, None);
    // the third trigger is never evaluated
    assert_eq!(engine.calls().len(), 1);
}

#[tokio::test]
async fn disabled_legacy_time_trigger_still_fires() {
    let engine = sum_engine(10.0);
    let config: RuleConfig = serde_json::from_value(json!({
        "triggers": [{ "type": "time", "enabled": false, "hour": 9, "minute": 0 }]
    }))
    .unwrap();
    let evaluator = TriggerEvaluator::new(engine.clone());
    for force in [true, false] {
        let eval = evaluator.evaluate(&config, at(2024, 3, 4, 10, 0), force).await;
        assert!(eval.fired, "force = {force}");
        assert_eq!(eval.kpi, None);
    }
    assert!(engine.calls().is_empty());
}

#[tokio::test]
async fn legend_trigger_fans_out_per_region() {
    let engine = Arc::new(FakeEngine::new(
        |req| {
            assert_eq!(req.group_by, vec!["region".to_string()]);
            assert_eq!(req.legend.as_deref(), Some("region"));
            Ok(region_rows())
        },
        failing_pivot,
    ));
    let mut cond = sales_threshold(json!(1000));
    cond["legend"] = json!("region");
    let config: RuleConfig =
        serde_json::from_value(json!({ "triggersGroup": { "threshold": cond } })).unwrap();
    let evaluator = TriggerEvaluator::new(engine);
    let eval = evaluator.evaluate(&config, at(2024, 3, 4, 10, 0), false).await;
    assert!(eval.fired);
    assert_eq!(eval.kpi, Some(1200.0));
    let breakdown = eval.breakdown().unwrap();
    assert_eq!(breakdown.best_category(), "east");
    assert_eq!(breakdown.cards.len(), 2);
}

#[tokio::test]
async fn legend_failure_uses_single_kpi() {
    let engine = Arc::new(FakeEngine::new(
        |req| {
            if req.group_by.is_empty() {
                Ok(scalar(json!(2000)))
            } else {
                anyhow::bail!("group by not supported")
            }
        },
        failing_pivot,
    ));
    let mut cond = sales_threshold(json!(1000));
    cond["legend"] = json!(["region"]);
    let config: RuleConfig =
        serde_json::from_value(json!({ "triggersGroup": { "threshold": cond } })).unwrap();
    let eval = TriggerEvaluator::new(engine)
        .evaluate(&config, at(2024, 3, 4, 10, 0), false)
        .await;
    assert!(eval.fired);
    assert_eq!(eval.kpi, Some(2000.0));
    assert!(eval.breakdown().is_none());
}
