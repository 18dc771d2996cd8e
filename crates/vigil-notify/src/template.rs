//! `{{token}}` substitution, per-category cards and the branded email wrap.

use crate::error::{NotifyError, Result};
use num_format::{Locale, ToFormattedString};
use regex::{Captures, Regex};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::OnceLock;

const TOKEN_PATTERN: &str = r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}";
const BASE_EMAIL_TEMPLATE: &str = include_str!("templates/base_email.html");

pub const DEFAULT_CARD_TEMPLATE: &str = "<strong>{{legend}}</strong>: {{kpi_fmt}}";

static TOKEN_RE: OnceLock<Regex> = OnceLock::new();

fn token_regex() -> Result<&'static Regex> {
    if let Some(re) = TOKEN_RE.get() {
        return Ok(re);
    }
    let re = Regex::new(TOKEN_PATTERN).map_err(|e| NotifyError::TemplateError(e.to_string()))?;
    Ok(TOKEN_RE.get_or_init(|| re))
}

/// Token name -> substituted text.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TokenMap(BTreeMap<String, String>);

impl TokenMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        self.0.insert(name.to_string(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Copy with the KPI tokens (`kpi`, `kpi_fmt`, `legend`) overridden.
    pub fn for_category(&self, category: &str, value: f64) -> Self {
        let mut tokens = self.clone();
        tokens
            .set("legend", category)
            .set("kpi", format_raw(value))
            .set("kpi_fmt", format_kpi(value));
        tokens
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Replaces every known `{{name}}` (whitespace tolerant). Unknown tokens are
/// left in place as literal text.
pub fn render(template: &str, tokens: &TokenMap) -> Result<String> {
    let re = token_regex()?;
    Ok(re
        .replace_all(template, |caps: &Captures<'_>| match tokens.get(&caps[1]) {
            Some(v) => v.to_string(),
            None => caps[0].to_string(),
        })
        .into_owned())
}

/// Like [`render`] but degrades to `fallback` on failure.
pub fn render_or(template: &str, tokens: &TokenMap, fallback: &str) -> String {
    match render(template, tokens) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "Template rendering failed, using fallback");
            fallback.to_string()
        }
    }
}

/// Zero decimals with thousands separators: `1234.0` -> `"1,234"`.
///
/// # Examples
///
/// ```
/// use vigil_notify::template::format_kpi;
///
/// assert_eq!(format_kpi(1234.0), "1,234");
/// assert_eq!(format_kpi(-9876543.6), "-9,876,544");
/// assert_eq!(format_kpi(0.4), "0");
/// ```
pub fn format_kpi(value: f64) -> String {
    if !value.is_finite() {
        return "0".to_string();
    }
    // `as` saturates at the i64 bounds
    let rounded = value.round() as i64;
    if rounded == 0 {
        return "0".to_string();
    }
    rounded.to_formatted_string(&Locale::en)
}

/// Plain numeric form for the `kpi` token: integers without a fraction.
pub fn format_raw(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

/// Minimal HTML escaping for values interpolated into markup.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CardChild {
    pub label: String,
    pub value: f64,
}

/// One category to render as its own card.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Card {
    pub category: String,
    pub value: f64,
    pub matched: bool,
    pub children: Vec<CardChild>,
}

/// Base content followed by one card per category. The rendered base is
/// always the prefix of the output, even when a card fails to render.
pub fn compose_cards(
    base_template: &str,
    card_template: Option<&str>,
    tokens: &TokenMap,
    cards: &[Card],
) -> String {
    let card_template = card_template
        .filter(|t| !t.trim().is_empty())
        .unwrap_or(DEFAULT_CARD_TEMPLATE);
    let mut out = render_or(base_template, tokens, base_template);
    if cards.is_empty() {
        return out;
    }

    out.push_str("\n<div class=\"vigil-cards\">");
    for card in cards {
        let card_tokens = tokens.for_category(&card.category, card.value);
        let fallback = format!(
            "<strong>{}</strong>: {}",
            escape_html(&card.category),
            format_kpi(card.value)
        );
        let body = render_or(card_template, &card_tokens, &fallback);
        let class = if card.matched {
            "vigil-card vigil-card-matched"
        } else {
            "vigil-card"
        };
        out.push_str(&format!("\n  <div class=\"{class}\">{body}"));
        if !card.children.is_empty() {
            out.push_str("\n    <ol class=\"vigil-card-children\">");
            for child in &card.children {
                out.push_str(&format!(
                    "\n      <li>{}: {}</li>",
                    escape_html(&child.label),
                    format_kpi(child.value)
                ));
            }
            out.push_str("\n    </ol>");
        }
        out.push_str("\n  </div>");
    }
    out.push_str("\n</div>");
    out
}

/// SMS form of [`compose_cards`]: the base text plus one line per category.
pub fn compose_text_cards(base_template: &str, tokens: &TokenMap, cards: &[Card]) -> String {
    let mut out = render_or(base_template, tokens, base_template);
    for card in cards {
        out.push('\n');
        out.push_str(&format!("{}: {}", card.category, format_kpi(card.value)));
        for child in &card.children {
            out.push_str(&format!("\n  - {}: {}", child.label, format_kpi(child.value)));
        }
    }
    out
}

/// Branding applied by [`wrap_email`].
#[derive(Debug, Clone, Default)]
pub struct Branding {
    pub brand_name: String,
    /// `cid:` reference (or plain URL) of the header logo.
    pub logo_src: Option<String>,
    pub footer_text: Option<String>,
    /// Custom base template; must contain `{{content}}`.
    pub base_template: Option<String>,
}

/// Wraps composed content in the branded base template (header, footer,
/// dark-mode CSS). A custom template without `{{content}}` is ignored.
pub fn wrap_email(branding: &Branding, content: &str) -> String {
    let template = match branding.base_template.as_deref() {
        Some(t) if t.contains("{{content}}") || t.contains("{{ content }}") => t,
        Some(_) => {
            tracing::warn!("Custom email base template has no {{{{content}}}} slot, using default");
            BASE_EMAIL_TEMPLATE
        }
        None => BASE_EMAIL_TEMPLATE,
    };

    let brand = if branding.brand_name.trim().is_empty() {
        "Vigil".to_string()
    } else {
        escape_html(&branding.brand_name)
    };
    let logo = branding
        .logo_src
        .as_deref()
        .map(|src| {
            format!(
                "<img src=\"{}\" alt=\"{}\" class=\"brand-logo\" height=\"32\">",
                escape_html(src),
                brand
            )
        })
        .unwrap_or_default();
    let footer = branding
        .footer_text
        .as_deref()
        .map(escape_html)
        .unwrap_or_else(|| format!("Sent by {brand}"));

    let mut tokens = TokenMap::new();
    tokens
        .set("brand_name", brand)
        .set("logo", logo)
        .set("footer", footer)
        .set("year", chrono::Utc::now().format("%Y").to_string())
        .set("content", content);

    // the default wrap is always renderable: fall back to plain concatenation
    render(template, &tokens).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Email wrap failed, sending unwrapped content");
        content.to_string()
    })
}
