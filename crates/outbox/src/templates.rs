//! Email body rendering
//!
//! Templates are Handlebars files named `<name>.hbs` in a templates
//! directory. They are read on every render so edits take effect without a
//! restart.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use handlebars::{Handlebars, handlebars_helper};
use serde_json::Value;
use std::path::PathBuf;

/// Renders a named template with a JSON data mapping into HTML
pub trait TemplateRenderer: Send + Sync {
    fn render(&self, template_name: &str, data: &Value) -> Result<String>;
}

handlebars_helper!(format_date: |value: Json| format_date_value(value));
handlebars_helper!(format_currency: |value: Json| format_currency_value(value));

/// Handlebars renderer over a directory of `.hbs` files
pub struct HandlebarsRenderer {
    templates_dir: PathBuf,
    registry: Handlebars<'static>,
}

impl HandlebarsRenderer {
    pub fn new(templates_dir: impl Into<PathBuf>) -> Self {
        let mut registry = Handlebars::new();
        // eq, ne, and, or are built in
        registry.register_helper("formatDate", Box::new(format_date));
        registry.register_helper("formatCurrency", Box::new(format_currency));

        Self {
            templates_dir: templates_dir.into(),
            registry,
        }
    }

    fn template_path(&self, template_name: &str) -> PathBuf {
        if template_name.ends_with(".hbs") {
            self.templates_dir.join(template_name)
        } else {
            self.templates_dir.join(format!("{}.hbs", template_name))
        }
    }
}

impl TemplateRenderer for HandlebarsRenderer {
    fn render(&self, template_name: &str, data: &Value) -> Result<String> {
        let path = self.template_path(template_name);
        if !path.is_file() {
            anyhow::bail!("Template not found: {}", path.display());
        }

        let source = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read template {}", path.display()))?;

        self.registry
            .render_template(&source, data)
            .with_context(|| format!("Failed to render template {}", template_name))
    }
}

/// Long English date, e.g. "5 March 2025"; unparseable input is echoed
fn format_date_value(value: &Value) -> String {
    let date = match value {
        Value::String(s) => parse_date(s),
        Value::Number(n) => n
            .as_i64()
            .and_then(DateTime::from_timestamp_millis)
            .map(|dt| dt.date_naive()),
        _ => return String::new(),
    };

    match (date, value) {
        (Some(date), _) => date.format("%-d %B %Y").to_string(),
        (None, Value::String(s)) => s.clone(),
        (None, _) => String::new(),
    }
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.date_naive())
        .ok()
        .or_else(|| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
        .or_else(|| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|dt| dt.date())
        })
}

/// Rupee amount with Indian digit grouping, e.g. "₹12,34,567.50"
fn format_currency_value(value: &Value) -> String {
    let amount = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    let Some(amount) = amount else {
        return String::new();
    };

    let fixed = format!("{:.2}", amount.abs());
    let (whole, fraction) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));
    let sign = if amount < 0.0 { "-" } else { "" };

    format!("{}₹{}.{}", sign, group_indian(whole), fraction)
}

/// Group digits as 12,34,567: the last three, then pairs
fn group_indian(digits: &str) -> String {
    if digits.len() <= 3 {
        return digits.to_string();
    }

    let (head, tail) = digits.split_at(digits.len() - 3);
    let mut groups: Vec<&str> = Vec::new();
    let mut end = head.len();
    while end > 0 {
        let start = end.saturating_sub(2);
        groups.push(&head[start..end]);
        end = start;
    }
    groups.reverse();

    format!("{},{}", groups.join(","), tail)
}
