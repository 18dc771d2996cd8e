//! Builds the token map for a fired rule and renders the email and SMS
//! bodies from it.

use std::sync::Arc;
use vigil_alert::config::{QuerySpec, RenderMode, RuleConfig, ThresholdCondition};
use vigil_alert::legend::LegendCard;
use vigil_alert::query::{display_value, AggregateRequest, Filter, QueryResult};
use vigil_alert::trigger::Evaluation;
use vigil_alert::xpick::XPickResolution;
use vigil_alert::QueryEngine;
use vigil_notify::template::{
    compose_cards, compose_text_cards, escape_html, format_kpi, format_raw, render_or, Card,
    CardChild, TokenMap,
};
use vigil_notify::InlineImage;

use crate::render::{ShotOptions, WidgetRenderer};

pub const TABLE_MAX_ROWS: usize = 50;
pub const CHART_CONTENT_ID: &str = "chart";

const DEFAULT_SMS_TEMPLATE: &str = "{{source}}: {{kpi_fmt}} ({{operator}} {{threshold}})";
const IMAGE_TOKENS: [&str; 4] = ["KPI_IMG", "CHART_IMG", "TABLE_IMG", "TABLE_HTML"];

/// Email body used when the rule has no template of its own.
pub fn default_email_template(mode: RenderMode) -> &'static str {
    match mode {
        RenderMode::Kpi => "{{KPI_IMG}}",
        RenderMode::Table => "<p>{{source}}: {{kpi_fmt}}</p>\n{{TABLE_HTML}}",
        RenderMode::Chart => "<p>{{source}}: {{kpi_fmt}}</p>\n{{CHART_IMG}}",
    }
}

fn failed_placeholder(what: &str) -> String {
    format!("[{what} failed to render]")
}

/// Everything the dispatcher needs for one fired rule.
#[derive(Debug, Clone)]
pub struct ComposedMessage {
    /// Email body, before the branded wrap applied by the dispatcher.
    pub html: String,
    /// Tokens used for the email body.
    pub tokens: TokenMap,
    /// Same tokens with image tokens blanked, for SMS and subjects.
    pub text_tokens: TokenMap,
    pub cards: Vec<Card>,
    pub images: Vec<InlineImage>,
}

impl ComposedMessage {
    pub fn subject(&self, template: &str) -> String {
        render_or(template, &self.text_tokens, template)
    }

    pub fn sms(&self, template: &str) -> String {
        let template = if template.trim().is_empty() {
            DEFAULT_SMS_TEMPLATE
        } else {
            template
        };
        compose_text_cards(template, &self.text_tokens, &self.cards)
    }
}

pub fn legend_cards(cards: &[LegendCard]) -> Vec<Card> {
    cards
        .iter()
        .map(|c| Card {
            category: c.category.clone(),
            value: c.value,
            matched: c.matched,
            children: c
                .children
                .iter()
                .map(|ch| CardChild {
                    label: ch.label.clone(),
                    value: ch.value,
                })
                .collect(),
        })
        .collect()
}

fn describe_filters(filter: &Filter) -> String {
    filter
        .iter()
        .map(|(k, v)| format!("{k}: {}", v.display()))
        .collect::<Vec<_>>()
        .join("; ")
}

fn filters_html(filter: &Filter) -> String {
    if filter.is_empty() {
        return String::new();
    }
    let items: String = filter
        .iter()
        .map(|(k, v)| format!("<li>{}: {}</li>", escape_html(k), escape_html(&v.display())))
        .collect();
    format!("<ul>{items}</ul>")
}

/// Text tokens for a rule evaluation. Image tokens are filled separately
/// by [`Composer::compose`].
pub fn base_tokens(config: &RuleConfig, eval: &Evaluation) -> TokenMap {
    let mut tokens = TokenMap::new();
    tokens
        .set("kpi", eval.kpi.map(format_raw).unwrap_or_default())
        .set("kpi_fmt", eval.kpi.map(format_kpi).unwrap_or_default())
        .set(
            "datasourceId",
            config.datasource_id.clone().unwrap_or_default(),
        );

    let evaluated = eval.threshold.as_ref();
    let cond: Option<&ThresholdCondition> = evaluated
        .map(|t| &t.condition)
        .or_else(|| config.primary_threshold());
    let Some(cond) = cond else {
        for name in [
            "operator", "threshold", "threshold_low", "threshold_high", "agg", "measure",
            "xField", "xValue", "xPick", "legend", "xValueResolved", "xValuePretty", "filters",
            "filters_values", "filters_values_html", "source",
        ] {
            tokens.set(name, "");
        }
        tokens.set("filters_json", "{}");
        return tokens;
    };

    let threshold = cond.threshold();
    let (low, high) = threshold
        .low_high()
        .map(|(l, h)| (format_raw(l), format_raw(h)))
        .unwrap_or_default();
    let threshold_text = match (threshold.single(), threshold.low_high()) {
        (Some(v), _) => format_raw(v),
        (None, Some(_)) => format!("{low} - {high}"),
        (None, None) => cond.value.as_ref().map(display_value).unwrap_or_default(),
    };

    let unresolved = XPickResolution {
        filter: cond.filters.clone(),
        value: None,
        pretty: None,
    };
    let xpick = evaluated.map(|t| &t.xpick).unwrap_or(&unresolved);
    let legend = eval
        .breakdown()
        .map(|b| b.best_category().to_string())
        .unwrap_or_default();
    let filter = &xpick.filter;
    let filters_values = filter
        .values()
        .map(|v| v.display())
        .collect::<Vec<_>>()
        .join(", ");

    tokens
        .set("operator", cond.operator.to_string())
        .set("threshold", threshold_text)
        .set("threshold_low", low)
        .set("threshold_high", high)
        .set("agg", cond.aggregator.to_string())
        .set("measure", cond.measure.clone().unwrap_or_default())
        .set("xField", cond.x_field.clone().unwrap_or_default())
        .set(
            "xValue",
            cond.x_value.as_ref().map(display_value).unwrap_or_default(),
        )
        .set("xPick", cond.x_pick.mode_name())
        .set("legend", legend)
        .set("xValueResolved", xpick.value.clone().unwrap_or_default())
        .set("xValuePretty", xpick.pretty.clone().unwrap_or_default())
        .set("filters", describe_filters(filter))
        .set(
            "filters_json",
            serde_json::to_string(filter).unwrap_or_else(|_| "{}".to_string()),
        )
        .set("filters_values", filters_values)
        .set("filters_values_html", filters_html(filter))
        .set("source", cond.source.clone());
    tokens
}

pub fn kpi_card_html(label: &str, kpi_fmt: &str) -> String {
    format!(
        "<div class=\"vigil-kpi\"><div class=\"label\">{}</div><div class=\"value\">{}</div></div>",
        escape_html(label),
        escape_html(kpi_fmt)
    )
}

/// HTML table of at most [`TABLE_MAX_ROWS`] rows.
pub fn table_html(result: &QueryResult, limit: Option<usize>) -> String {
    let limit = limit.unwrap_or(TABLE_MAX_ROWS).min(TABLE_MAX_ROWS);
    let mut out = String::from("<table class=\"vigil-table\">\n<thead><tr>");
    for col in &result.columns {
        out.push_str(&format!("<th>{}</th>", escape_html(col)));
    }
    out.push_str("</tr></thead>\n<tbody>");
    for row in result.rows.iter().take(limit) {
        out.push_str("\n<tr>");
        for cell in row {
            out.push_str(&format!("<td>{}</td>", escape_html(&display_value(cell))));
        }
        out.push_str("</tr>");
    }
    out.push_str("\n</tbody>\n</table>");
    out
}

/// Renders rule messages: text tokens, the optional table/chart assets,
/// and the per-category card layout.
pub struct Composer {
    engine: Arc<dyn QueryEngine>,
    renderer: Option<Arc<dyn WidgetRenderer>>,
    shot: ShotOptions,
}

impl Composer {
    pub fn new(
        engine: Arc<dyn QueryEngine>,
        renderer: Option<Arc<dyn WidgetRenderer>>,
        shot: ShotOptions,
    ) -> Self {
        Self {
            engine,
            renderer,
            shot,
        }
    }

    async fn table(&self, spec: &QuerySpec) -> String {
        let req = AggregateRequest {
            measure: spec.measure.clone(),
            filter: spec.filters.clone(),
            group_by: spec.group_by.clone(),
            ..AggregateRequest::new(&spec.source, spec.aggregator)
        };
        match self.engine.aggregate(&req).await {
            Ok(result) => table_html(&result, spec.limit),
            Err(e) => {
                tracing::warn!(source = %spec.source, error = %e, "Table query failed");
                failed_placeholder("table")
            }
        }
    }

    async fn chart(&self, config: &RuleConfig) -> (String, Option<InlineImage>) {
        let Some(widget) = config.render.widget_ref.as_ref() else {
            return (String::new(), None);
        };
        let Some(renderer) = self.renderer.as_ref() else {
            tracing::warn!(widget_id = %widget.widget_id, "Chart requested but no renderer is configured");
            return (failed_placeholder("chart"), None);
        };
        match renderer.render_widget_png(widget, &self.shot).await {
            Ok(bytes) => (
                format!("<img src=\"cid:{CHART_CONTENT_ID}\" alt=\"chart\" style=\"max-width:100%\">"),
                Some(InlineImage {
                    content_id: CHART_CONTENT_ID.to_string(),
                    content_type: "image/png".to_string(),
                    bytes,
                }),
            ),
            Err(e) => {
                tracing::warn!(widget_id = %widget.widget_id, error = %e, "Widget screenshot failed");
                (failed_placeholder("chart"), None)
            }
        }
    }

    pub async fn compose(&self, config: &RuleConfig, eval: &Evaluation) -> ComposedMessage {
        let tokens = base_tokens(config, eval);
        let template = config
            .template
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| default_email_template(config.render.mode));
        let mut text_tokens = tokens.clone();
        for name in IMAGE_TOKENS {
            text_tokens.set(name, "");
        }

        let mut html_tokens = tokens;
        let mut images = Vec::new();
        let label = config
            .render
            .label
            .clone()
            .or_else(|| html_tokens.get("source").map(str::to_string))
            .unwrap_or_default();
        let kpi_fmt = html_tokens.get("kpi_fmt").unwrap_or_default().to_string();
        html_tokens.set("KPI_IMG", kpi_card_html(&label, &kpi_fmt));

        // only pay for the table query / screenshot when the template uses them
        let table = if template.contains("TABLE_") {
            match config.render.query_spec.as_ref() {
                Some(spec) => self.table(spec).await,
                None => String::new(),
            }
        } else {
            String::new()
        };
        html_tokens.set("TABLE_HTML", table.clone()).set("TABLE_IMG", table);

        let chart = if template.contains("CHART_IMG") {
            let (markup, image) = self.chart(config).await;
            images.extend(image);
            markup
        } else {
            String::new()
        };
        html_tokens.set("CHART_IMG", chart);

        let cards = eval
            .breakdown()
            .map(|b| legend_cards(&b.cards))
            .unwrap_or_default();
        let html = compose_cards(template, config.card_template.as_deref(), &html_tokens, &cards);

        ComposedMessage {
            html,
            tokens: html_tokens,
            text_tokens,
            cards,
            images,
        }
    }
}
