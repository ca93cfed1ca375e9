//! Routing-rule evaluation: an AND/OR tree of predicates over the request,
//! contributing `priority / 1000` to the rule's route when it holds.

use regex::Regex;
use serde_json::Value;

use super::classifier::ServiceScores;
use crate::{
    config::routing::{
        Condition, ConditionLeaf, ConditionSubject, Operator, RoutingRule,
    },
    types::request::IntentRequest,
};

#[must_use]
pub fn evaluate(
    rules: &[RoutingRule],
    request: &IntentRequest,
) -> ServiceScores {
    let mut scores = ServiceScores::new();
    for rule in rules {
        if !holds(&rule.conditions, request) {
            continue;
        }
        #[allow(clippy::cast_precision_loss)]
        let score = (rule.actions.priority as f64 / 1000.0).clamp(0.0, 1.0);
        let entry = scores
            .entry(rule.actions.route.clone())
            .or_insert(0.0);
        *entry = entry.max(score);
    }
    scores
}

fn holds(condition: &Condition, request: &IntentRequest) -> bool {
    match condition {
        Condition::And { and } => {
            and.iter().all(|child| holds(child, request))
        }
        Condition::Or { or } => or.iter().any(|child| holds(child, request)),
        Condition::Leaf(leaf) => leaf_holds(leaf, request),
    }
}

fn leaf_holds(leaf: &ConditionLeaf, request: &IntentRequest) -> bool {
    let subject = subject_value(leaf, request);
    match leaf.operator {
        Operator::Exists => subject.is_some(),
        // Reserved until an evaluator lands.
        Operator::JsonPath => false,
        Operator::Equals => {
            match (subject, leaf.value.as_ref()) {
                (Some(subject), Some(expected)) => {
                    json_eq(&subject, expected)
                }
                _ => false,
            }
        }
        Operator::Matches => with_subject_str(subject.as_ref(), |text| {
            leaf.value
                .as_ref()
                .and_then(Value::as_str)
                .and_then(|pattern| Regex::new(pattern).ok())
                .is_some_and(|regex| regex.is_match(text))
        }),
        Operator::Contains => with_subject_str(subject.as_ref(), |text| {
            leaf.value
                .as_ref()
                .and_then(Value::as_str)
                .is_some_and(|needle| text.contains(needle))
        }),
        Operator::Starts => with_subject_str(subject.as_ref(), |text| {
            leaf.value
                .as_ref()
                .and_then(Value::as_str)
                .is_some_and(|prefix| text.starts_with(prefix))
        }),
        Operator::In => match (subject, leaf.value.as_ref()) {
            (Some(subject), Some(Value::Array(options))) => options
                .iter()
                .any(|option| json_eq(&subject, option)),
            _ => false,
        },
        Operator::Greater => {
            let subject = subject.as_ref().and_then(as_number);
            let threshold = leaf.value.as_ref().and_then(as_number);
            matches!((subject, threshold), (Some(s), Some(t)) if s > t)
        }
    }
}

fn subject_value(
    leaf: &ConditionLeaf,
    request: &IntentRequest,
) -> Option<Value> {
    match leaf.r#type {
        ConditionSubject::Text => {
            let text = request.text_trimmed();
            (!text.is_empty()).then(|| Value::String(text.to_string()))
        }
        ConditionSubject::Path => request
            .http_path
            .as_ref()
            .map(|path| Value::String(path.clone())),
        ConditionSubject::Method => request
            .http_method
            .as_ref()
            .map(|method| Value::String(method.to_ascii_uppercase())),
        ConditionSubject::Header => {
            let key = leaf.key.as_deref()?;
            request
                .header(key)
                .map(|value| Value::String(value.to_string()))
        }
        ConditionSubject::Context => {
            let context = request.context.as_ref()?;
            let key = leaf.key.as_deref()?;
            match key {
                "userId" => context
                    .user_id
                    .clone()
                    .map(Value::String),
                "sessionId" => context
                    .session_id
                    .clone()
                    .map(Value::String),
                "ip" => context.ip.clone().map(Value::String),
                "userAgent" => context
                    .user_agent
                    .clone()
                    .map(Value::String),
                other => {
                    let key =
                        other.strip_prefix("metadata.").unwrap_or(other);
                    context
                        .metadata
                        .as_ref()
                        .and_then(|metadata| metadata.get(key))
                        .cloned()
                }
            }
        }
    }
}

fn with_subject_str(
    subject: Option<&Value>,
    predicate: impl FnOnce(&str) -> bool,
) -> bool {
    subject.and_then(Value::as_str).is_some_and(predicate)
}

fn json_eq(subject: &Value, expected: &Value) -> bool {
    if subject == expected {
        return true;
    }
    // Numbers serialized as strings still compare.
    match (as_number(subject), as_number(expected)) {
        (Some(a), Some(b)) => (a - b).abs() < f64::EPSILON,
        _ => false,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.parse().ok(),
        _ => None,
    }
}
