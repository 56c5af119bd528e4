//! Message template rendering

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::models::{Field, FieldValues, MetricSample, Severity};

static PLACEHOLDER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*\.?([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("placeholder pattern is valid")
});

/// Values a message template can refer to
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    pub target_name: String,
    pub instance_name: String,
    pub rule_name: String,
    pub severity: Severity,
    pub fields: FieldValues,
    pub heap_used: f64,
    pub heap_max: f64,
}

impl TemplateContext {
    /// Context for a rule firing on a sample
    pub fn for_sample(sample: &MetricSample, rule_name: &str, severity: Severity) -> Self {
        Self {
            target_name: sample.target_name.clone(),
            instance_name: sample.instance_name.clone(),
            rule_name: rule_name.to_string(),
            severity,
            fields: sample.fields(),
            heap_used: sample.heap_used as f64,
            heap_max: sample.heap_max as f64,
        }
    }

    fn lookup(&self, name: &str) -> Option<String> {
        if let Some(field) = Field::ALL.into_iter().find(|f| f.placeholder() == name) {
            return Some(format_number(self.fields.get(field)));
        }

        match name {
            "Target" | "TargetName" => Some(self.target_name.clone()),
            "Instance" | "InstanceName" => Some(self.instance_name.clone()),
            "Rule" | "RuleName" => Some(self.rule_name.clone()),
            "Severity" => Some(self.severity.to_string()),
            "HeapUsed" => Some(format_number(self.heap_used)),
            "HeapMax" => Some(format_number(self.heap_max)),
            _ => None,
        }
    }
}

/// Interpolate `{{Name}}` placeholders; unknown names render empty
pub fn render_message(template: &str, ctx: &TemplateContext) -> String {
    PLACEHOLDER_RE
        .replace_all(template, |caps: &Captures<'_>| {
            ctx.lookup(&caps[1]).unwrap_or_default()
        })
        .into_owned()
}

/// Render a number without trailing zeros, at most two decimals
pub fn format_number(value: f64) -> String {
    let fixed = format!("{value:.2}");
    let trimmed = fixed.trim_end_matches('0').trim_end_matches('.');
    if trimmed == "-0" {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ctx_with_usage(usage: f64) -> TemplateContext {
        let mut ctx = TemplateContext {
            target_name: "user-service".to_string(),
            instance_name: "default".to_string(),
            rule_name: "high_usage".to_string(),
            severity: Severity::Warning,
            ..Default::default()
        };
        ctx.fields.set(Field::Usage, usage);
        ctx
    }

    #[test]
    fn renders_usage_placeholder() {
        let rendered = render_message("Pool usage is high: {{Usage}}%", &ctx_with_usage(85.0));

        assert_eq!(rendered, "Pool usage is high: 85%");
    }

    #[test]
    fn unknown_placeholders_render_empty() {
        let rendered = render_message("[{{Nope}}] {{ .Usage }}% on {{Target}}", &ctx_with_usage(85.5));

        assert_eq!(rendered, "[] 85.5% on user-service");
    }

    #[test]
    fn text_without_placeholders_is_untouched() {
        let rendered = render_message("{ not a placeholder }}", &ctx_with_usage(1.0));

        assert_eq!(rendered, "{ not a placeholder }}");
    }

    #[test]
    fn renders_sample_context() {
        let mut sample = MetricSample::new("orders", "pod-2");
        sample.active = 9;
        sample.max = 10;
        sample.heap_used = 512;
        sample.heap_max = 1024;
        let ctx = TemplateContext::for_sample(&sample, "heap", Severity::Critical);

        let rendered = render_message(
            "{{Severity}} {{Rule}} {{Instance}}: {{Active}}/{{Max}} heap {{HeapUsage}}% ({{HeapUsed}}/{{HeapMax}})",
            &ctx,
        );

        assert_eq!(rendered, "critical heap pod-2: 9/10 heap 50% (512/1024)");
    }

    #[test]
    fn number_formatting() {
        assert_eq!(format_number(85.0), "85");
        assert_eq!(format_number(66.666), "66.67");
        assert_eq!(format_number(0.1), "0.1");
        assert_eq!(format_number(-0.001), "0");
        assert_eq!(format_number(0.0), "0");
    }
}
