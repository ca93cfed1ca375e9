//! Telemetry-driven manifest enrichment: scaling annotations, container
//! resources, and probe hardening, each recorded as a [`ManifestChange`].

use serde_json::{Value, json};

use super::{ChangeImpact, ManifestChange};
use crate::{
    config::manifest::RefreshProfile, telemetry::TelemetrySnapshot,
};

const MIN_SCALE: &str = "autoscaling.knative.dev/minScale";
const MAX_SCALE: &str = "autoscaling.knative.dev/maxScale";
const ANNOTATIONS_PATH: &str = "spec.template.metadata.annotations";
const CONTAINER_PATH: &str = "spec.template.spec.containers[0]";

const DEFAULT_MIN_SCALE: i64 = 1;
const DEFAULT_MAX_SCALE: i64 = 10;
const DEFAULT_CPU_LIMIT: f64 = 1.0;
const DEFAULT_CPU_REQUEST: f64 = 0.5;
const DEFAULT_MEMORY_LIMIT_MI: f64 = 512.0;
const DEFAULT_MEMORY_REQUEST_MI: f64 = 256.0;

#[derive(Debug, thiserror::Error)]
pub enum EnrichError {
    #[error("manifest is not a mapping")]
    NotAMapping,
    #[error("unparseable value at {path}: {value}")]
    Value { path: String, value: String },
}

#[derive(Debug)]
pub struct EnrichmentOutcome {
    pub manifest: Value,
    pub changes: Vec<ManifestChange>,
}

/// Run the pipeline over a deep copy of `manifest`.
pub fn enrich(
    manifest: &Value,
    telemetry: &TelemetrySnapshot,
    profile: RefreshProfile,
) -> Result<EnrichmentOutcome, EnrichError> {
    if !manifest.is_object() {
        return Err(EnrichError::NotAMapping);
    }
    let mut manifest = manifest.clone();
    let mut changes = Vec::new();

    apply_scaling(&mut manifest, telemetry, profile, &mut changes)?;
    apply_resources(&mut manifest, telemetry, profile, &mut changes)?;
    apply_probes(&mut manifest, telemetry, &mut changes);

    Ok(EnrichmentOutcome { manifest, changes })
}

fn apply_scaling(
    manifest: &mut Value,
    telemetry: &TelemetrySnapshot,
    profile: RefreshProfile,
    changes: &mut Vec<ManifestChange>,
) -> Result<(), EnrichError> {
    let old_min = read_scale(manifest, MIN_SCALE, DEFAULT_MIN_SCALE)?;
    let old_max = read_scale(manifest, MAX_SCALE, DEFAULT_MAX_SCALE)?;
    let mut new_min = old_min;

    if telemetry.cpu_utilization > 0.75
        || telemetry.p95_latency_millis > 600.0
    {
        #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
        let new_max = (old_max as f64 * 1.3).ceil() as i64;
        if new_max != old_max {
            write_scale(manifest, MAX_SCALE, new_max);
            changes.push(ManifestChange {
                path: format!("{ANNOTATIONS_PATH}.{MAX_SCALE}"),
                before: json!(old_max.to_string()),
                after: json!(new_max.to_string()),
                rationale: "headroom for sustained load".to_string(),
                impact: ChangeImpact::Increase,
            });
        }
    }

    if telemetry.cpu_utilization < 0.35
        && telemetry.requests_per_minute < 120.0
    {
        #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
        let candidate = ((old_min as f64 * 0.7).floor() as i64).max(1);
        if candidate != new_min {
            write_scale(manifest, MIN_SCALE, candidate);
            changes.push(ManifestChange {
                path: format!("{ANNOTATIONS_PATH}.{MIN_SCALE}"),
                before: json!(new_min.to_string()),
                after: json!(candidate.to_string()),
                rationale: "reclaim idle capacity".to_string(),
                impact: ChangeImpact::Decrease,
            });
            new_min = candidate;
        }
    }

    if profile == RefreshProfile::Performance {
        let candidate = new_min.max(old_min + 1);
        if candidate != new_min {
            write_scale(manifest, MIN_SCALE, candidate);
            changes.push(ManifestChange {
                path: format!("{ANNOTATIONS_PATH}.{MIN_SCALE}"),
                before: json!(new_min.to_string()),
                after: json!(candidate.to_string()),
                rationale: "performance profile keeps warm capacity"
                    .to_string(),
                impact: ChangeImpact::Increase,
            });
        }
    }

    Ok(())
}

#[allow(clippy::too_many_lines)]
fn apply_resources(
    manifest: &mut Value,
    telemetry: &TelemetrySnapshot,
    profile: RefreshProfile,
    changes: &mut Vec<ManifestChange>,
) -> Result<(), EnrichError> {
    let Some(container) = first_container(manifest) else {
        return Ok(());
    };

    let cpu_limit = read_cpu(
        &container["resources"]["limits"]["cpu"],
        DEFAULT_CPU_LIMIT,
        "resources.limits.cpu",
    )?;
    let cpu_request = read_cpu(
        &container["resources"]["requests"]["cpu"],
        DEFAULT_CPU_REQUEST,
        "resources.requests.cpu",
    )?;
    let memory_limit = read_memory(
        &container["resources"]["limits"]["memory"],
        DEFAULT_MEMORY_LIMIT_MI,
        "resources.limits.memory",
    )?;
    let memory_request = read_memory(
        &container["resources"]["requests"]["memory"],
        DEFAULT_MEMORY_REQUEST_MI,
        "resources.requests.memory",
    )?;

    if telemetry.cpu_utilization > 0.8 {
        let new_limit = round2(cpu_limit * 1.2);
        let new_request = round2((new_limit * 0.6).max(cpu_request));
        set_resource(container, "limits", "cpu", format_cpu(new_limit));
        set_resource(container, "requests", "cpu", format_cpu(new_request));
        changes.push(resource_change(
            "limits.cpu",
            format_cpu(cpu_limit),
            format_cpu(new_limit),
            "sustained cpu pressure",
            ChangeImpact::Increase,
        ));
        if (new_request - cpu_request).abs() > f64::EPSILON {
            changes.push(resource_change(
                "requests.cpu",
                format_cpu(cpu_request),
                format_cpu(new_request),
                "keep the request tracking the limit",
                ChangeImpact::Increase,
            ));
        }
    } else if profile == RefreshProfile::Cost
        && telemetry.cpu_utilization < 0.45
    {
        let new_limit = round2((cpu_limit * 0.8).max(0.5));
        if (new_limit - cpu_limit).abs() > f64::EPSILON {
            set_resource(container, "limits", "cpu", format_cpu(new_limit));
            changes.push(resource_change(
                "limits.cpu",
                format_cpu(cpu_limit),
                format_cpu(new_limit),
                "cost profile trims unused cpu",
                ChangeImpact::Decrease,
            ));
        }
    }

    if telemetry.memory_utilization > 0.75 {
        let new_limit = round_to(memory_limit * 1.25, 256.0);
        let new_request = round_to(memory_request * 1.15, 128.0);
        set_resource(
            container,
            "limits",
            "memory",
            format!("{new_limit}Mi"),
        );
        set_resource(
            container,
            "requests",
            "memory",
            format!("{new_request}Mi"),
        );
        changes.push(resource_change(
            "limits.memory",
            format!("{}Mi", memory_limit.round()),
            format!("{new_limit}Mi"),
            "memory pressure near the limit",
            ChangeImpact::Increase,
        ));
        changes.push(resource_change(
            "requests.memory",
            format!("{}Mi", memory_request.round()),
            format!("{new_request}Mi"),
            "memory pressure near the limit",
            ChangeImpact::Increase,
        ));
    }

    Ok(())
}

fn apply_probes(
    manifest: &mut Value,
    telemetry: &TelemetrySnapshot,
    changes: &mut Vec<ManifestChange>,
) {
    if telemetry.error_rate <= 0.04 {
        return;
    }
    let Some(container) = first_container(manifest) else {
        return;
    };
    if container.get("readinessProbe").is_none() {
        container["readinessProbe"] = json!({
            "httpGet": {"path": "/ready", "port": 8080},
            "initialDelaySeconds": 5,
            "periodSeconds": 5,
        });
        changes.push(ManifestChange {
            path: format!("{CONTAINER_PATH}.readinessProbe"),
            before: Value::Null,
            after: container["readinessProbe"].clone(),
            rationale: "elevated error rate without readiness gating"
                .to_string(),
            impact: ChangeImpact::Change,
        });
    }
    if container.get("livenessProbe").is_none() {
        container["livenessProbe"] = json!({
            "httpGet": {"path": "/health", "port": 8080},
            "initialDelaySeconds": 10,
            "periodSeconds": 10,
        });
        changes.push(ManifestChange {
            path: format!("{CONTAINER_PATH}.livenessProbe"),
            before: Value::Null,
            after: container["livenessProbe"].clone(),
            rationale: "elevated error rate without liveness checks"
                .to_string(),
            impact: ChangeImpact::Change,
        });
    }
}

fn annotations(manifest: &mut Value) -> &mut serde_json::Map<String, Value> {
    let metadata = manifest
        .pointer_mut("/spec/template")
        .map_or(Value::Null, std::mem::take);
    // Rebuild the path if any intermediate level is missing.
    let mut template = match metadata {
        Value::Object(map) => Value::Object(map),
        _ => json!({}),
    };
    if !template["metadata"].is_object() {
        template["metadata"] = json!({});
    }
    if !template["metadata"]["annotations"].is_object() {
        template["metadata"]["annotations"] = json!({});
    }
    if !manifest["spec"].is_object() {
        manifest["spec"] = json!({});
    }
    manifest["spec"]["template"] = template;
    manifest["spec"]["template"]["metadata"]["annotations"]
        .as_object_mut()
        .expect("annotations object just ensured")
}

fn read_scale(
    manifest: &Value,
    annotation: &str,
    default: i64,
) -> Result<i64, EnrichError> {
    let Some(value) = manifest
        .pointer("/spec/template/metadata/annotations")
        .and_then(|annotations| annotations.get(annotation))
    else {
        return Ok(default);
    };
    match value {
        Value::Number(number) => {
            number.as_i64().ok_or_else(|| EnrichError::Value {
                path: annotation.to_string(),
                value: number.to_string(),
            })
        }
        Value::String(text) => {
            text.trim().parse().map_err(|_| EnrichError::Value {
                path: annotation.to_string(),
                value: text.clone(),
            })
        }
        other => Err(EnrichError::Value {
            path: annotation.to_string(),
            value: other.to_string(),
        }),
    }
}

fn write_scale(manifest: &mut Value, annotation: &str, value: i64) {
    annotations(manifest)
        .insert(annotation.to_string(), json!(value.to_string()));
}

fn first_container(manifest: &mut Value) -> Option<&mut Value> {
    manifest
        .pointer_mut("/spec/template/spec/containers/0")
}

fn set_resource(
    container: &mut Value,
    section: &str,
    resource: &str,
    value: String,
) {
    if !container["resources"].is_object() {
        container["resources"] = json!({});
    }
    if !container["resources"][section].is_object() {
        container["resources"][section] = json!({});
    }
    container["resources"][section][resource] = json!(value);
}

fn resource_change(
    suffix: &str,
    before: String,
    after: String,
    rationale: &str,
    impact: ChangeImpact,
) -> ManifestChange {
    ManifestChange {
        path: format!("{CONTAINER_PATH}.resources.{suffix}"),
        before: json!(before),
        after: json!(after),
        rationale: rationale.to_string(),
        impact,
    }
}

/// `500m` style millicores or plain cores.
fn read_cpu(
    value: &Value,
    default: f64,
    path: &str,
) -> Result<f64, EnrichError> {
    match value {
        Value::Null => Ok(default),
        Value::Number(number) => {
            number.as_f64().ok_or_else(|| EnrichError::Value {
                path: path.to_string(),
                value: number.to_string(),
            })
        }
        Value::String(text) => {
            let text = text.trim();
            if let Some(millis) = text.strip_suffix('m') {
                millis
                    .parse::<f64>()
                    .map(|m| m / 1000.0)
                    .map_err(|_| EnrichError::Value {
                        path: path.to_string(),
                        value: text.to_string(),
                    })
            } else {
                text.parse().map_err(|_| EnrichError::Value {
                    path: path.to_string(),
                    value: text.to_string(),
                })
            }
        }
        other => Err(EnrichError::Value {
            path: path.to_string(),
            value: other.to_string(),
        }),
    }
}

/// `Gi` is 1024 Mi; bare numbers are taken as Mi.
fn read_memory(
    value: &Value,
    default: f64,
    path: &str,
) -> Result<f64, EnrichError> {
    match value {
        Value::Null => Ok(default),
        Value::Number(number) => {
            number.as_f64().ok_or_else(|| EnrichError::Value {
                path: path.to_string(),
                value: number.to_string(),
            })
        }
        Value::String(text) => {
            let text = text.trim();
            let (digits, multiplier) =
                if let Some(digits) = text.strip_suffix("Gi") {
                    (digits, 1024.0)
                } else if let Some(digits) = text.strip_suffix("Mi") {
                    (digits, 1.0)
                } else {
                    (text, 1.0)
                };
            digits
                .trim()
                .parse::<f64>()
                .map(|amount| amount * multiplier)
                .map_err(|_| EnrichError::Value {
                    path: path.to_string(),
                    value: text.to_string(),
                })
        }
        other => Err(EnrichError::Value {
            path: path.to_string(),
            value: other.to_string(),
        }),
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn round_to(value: f64, step: f64) -> u64 {
    (((value / step).round() * step).max(step)) as u64
}

fn format_cpu(value: f64) -> String {
    let rounded = round2(value);
    if (rounded - rounded.trunc()).abs() < f64::EPSILON {
        format!("{}", rounded.trunc())
    } else {
        format!("{rounded}")
    }
}
