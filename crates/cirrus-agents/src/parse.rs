//! Turning completion text into plan steps.

use cirrus_core::{PlanStep, StepKind};
use serde_json::{json, Map, Value};

/// Body of the first fenced code block in `text`, or `text` itself.
pub(crate) fn strip_fence(text: &str) -> &str {
    let Some(open) = text.find("```") else {
        return text.trim();
    };
    let after_open = &text[open + 3..];
    // Skip the info string (e.g. `json`) on the opening line.
    let body_start = after_open.find('\n').map_or(0, |i| i + 1);
    let body = &after_open[body_start..];
    match body.find("```") {
        Some(close) => body[..close].trim(),
        None => body.trim(),
    }
}

fn str_field<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str))
        .filter(|s| !s.trim().is_empty())
}

fn step_from_json(index: usize, obj: &Map<String, Value>) -> PlanStep {
    let kind = str_field(obj, &["kind", "type"])
        .and_then(StepKind::parse)
        .unwrap_or(StepKind::Message);
    let name = str_field(obj, &["name", "id"])
        .map(str::to_string)
        .unwrap_or_else(|| format!("step_{index}"));

    let mut step = PlanStep::new(kind, name);
    step.description = str_field(obj, &["description"]).map(str::to_string);
    step.args = obj.get("args").and_then(Value::as_object).cloned();
    step.dependencies = obj
        .get("dependencies")
        .and_then(Value::as_array)
        .map(|deps| deps.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default();
    if let Some(timeout) = obj.get("timeout_seconds").and_then(Value::as_f64) {
        step.timeout_seconds = timeout;
    }

    match kind {
        StepKind::Tool => {
            step.tool = Some(
                str_field(obj, &["tool", "tool_name"])
                    .unwrap_or(&step.name)
                    .to_string(),
            );
            if step.args.is_none() {
                step.args = Some(Map::new());
            }
        }
        StepKind::Message => {
            step.content = Some(
                str_field(obj, &["content", "message"])
                    .or(step.description.as_deref())
                    .unwrap_or(&step.name)
                    .to_string(),
            );
        }
        StepKind::Agent => {
            step.agent = str_field(obj, &["agent"]).map(str::to_string);
        }
        StepKind::Sequential | StepKind::Parallel => {}
    }
    step
}

/// Parse a JSON plan: either an array of steps or `{"steps": [...]}`,
/// optionally inside a fenced code block. Unknown step kinds become
/// MESSAGE steps. Returns `None` when the text is not such a plan.
pub fn parse_plan_json(text: &str) -> Option<Vec<PlanStep>> {
    let value: Value = serde_json::from_str(strip_fence(text)).ok()?;
    let items = match &value {
        Value::Array(items) => items,
        Value::Object(obj) => obj.get("steps")?.as_array()?,
        _ => return None,
    };
    let steps: Vec<PlanStep> = items
        .iter()
        .filter_map(Value::as_object)
        .enumerate()
        .map(|(i, obj)| step_from_json(i, obj))
        .collect();
    if steps.is_empty() {
        None
    } else {
        Some(steps)
    }
}

/// Read free-form strategy text line by line, tagging each line's step kind
/// from its leading keyword. At most `max_steps` steps are produced.
pub fn parse_strategy_lines(text: &str, goal: &str, max_steps: usize) -> Vec<PlanStep> {
    text.lines()
        .map(|line| {
            line.trim()
                .trim_start_matches(|c: char| c.is_ascii_digit() || matches!(c, '-' | '*' | '.' | ')'))
                .trim()
        })
        .filter(|line| !line.is_empty())
        .take(max_steps)
        .enumerate()
        .map(|(i, line)| {
            let name = format!("step_{i}");
            let (head, rest) = line
                .split_once(|c: char| c == ':' || c.is_whitespace())
                .map_or((line, ""), |(h, r)| (h, r.trim()));
            match StepKind::parse(head) {
                Some(StepKind::Tool) => {
                    let tool = rest
                        .split_whitespace()
                        .next()
                        .unwrap_or("noop")
                        .trim_matches(|c: char| !c.is_alphanumeric() && c != '_');
                    let mut args = Map::new();
                    args.insert("goal".into(), json!(goal));
                    PlanStep::tool(name, tool, args).with_description(rest.to_string())
                }
                Some(StepKind::Parallel) => PlanStep::parallel(name).with_description(rest.to_string()),
                Some(StepKind::Sequential) => {
                    PlanStep::sequential(name).with_description(rest.to_string())
                }
                Some(StepKind::Message) => PlanStep::message(name, rest),
                _ => PlanStep::message(name, line),
            }
        })
        .collect()
}
