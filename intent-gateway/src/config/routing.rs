//! The meta-routing bundle: intent categories, contextual factors, and
//! routing rules. Loaded from `<config-dir>/meta-routing.json` and
//! `routing-rules.json` when present, embedded defaults otherwise, and
//! replaceable at runtime through the admin reload endpoint.

use std::path::Path;

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::types::service::ServiceName;

pub const META_ROUTING_FILE: &str = "meta-routing.json";
pub const ROUTING_RULES_FILE: &str = "routing-rules.json";

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct RoutingConfig {
    pub meta_routing: MetaRoutingConfig,
    /// Category name to category definition. Insertion order is load-bearing:
    /// it breaks ties between equal fused scores.
    pub intent_categories: IndexMap<String, IntentCategory>,
    pub contextual_factors: IndexMap<String, ContextualFactorConfig>,
    pub routing_rules: Vec<RoutingRule>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            meta_routing: MetaRoutingConfig::default(),
            intent_categories: default_intent_categories(),
            contextual_factors: default_contextual_factors(),
            routing_rules: default_routing_rules(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct MetaRoutingConfig {
    pub algorithm: String,
    pub confidence_threshold: f64,
    pub fallback_strategy: String,
    pub cache_ttl_seconds: u64,
}

impl Default for MetaRoutingConfig {
    fn default() -> Self {
        Self {
            algorithm: "ml-enhanced".to_string(),
            confidence_threshold: 0.6,
            fallback_strategy: "api-gateway".to_string(),
            cache_ttl_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct IntentCategory {
    pub keywords: Vec<String>,
    /// Regex patterns matched against the request path.
    pub patterns: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ml_model_id: Option<String>,
    pub priority: i64,
    pub target_service: ServiceName,
}

impl Default for IntentCategory {
    fn default() -> Self {
        Self {
            keywords: Vec::new(),
            patterns: Vec::new(),
            ml_model_id: None,
            priority: 100,
            target_service: ServiceName::from("api-gateway-service"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContextualFactorConfig {
    pub weight: f64,
    pub factors: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoutingRule {
    pub id: String,
    pub name: String,
    pub conditions: Condition,
    pub actions: RuleActions,
}

/// AND/OR tree over leaf predicates.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(untagged)]
pub enum Condition {
    And { and: Vec<Condition> },
    Or { or: Vec<Condition> },
    Leaf(ConditionLeaf),
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConditionLeaf {
    pub r#type: ConditionSubject,
    pub operator: Operator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ConditionSubject {
    Text,
    Path,
    Method,
    Header,
    Context,
}

/// Closed operator set. `JsonPath` is reserved and evaluates to false.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Operator {
    Equals,
    Matches,
    Contains,
    Starts,
    In,
    Exists,
    Greater,
    JsonPath,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuleActions {
    pub route: ServiceName,
    pub priority: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_millis: Option<u64>,
    /// Unknown action keys are carried along rather than rejected, so rule
    /// files shared with other tooling keep loading.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Partial shape of `meta-routing.json`: present sections replace the
/// embedded defaults wholesale.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct MetaRoutingFile {
    meta_routing: Option<MetaRoutingConfig>,
    intent_categories: Option<IndexMap<String, IntentCategory>>,
    contextual_factors: Option<IndexMap<String, ContextualFactorConfig>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RulesFile {
    Wrapped { rules: Vec<RoutingRule> },
    Bare(Vec<RoutingRule>),
}

impl RoutingConfig {
    /// Read the bundle from `config_dir`, falling back to embedded defaults
    /// for any missing file or section.
    pub fn load(config_dir: Option<&Path>) -> Result<Self, super::Error> {
        let mut bundle = Self::default();
        if let Some(dir) = config_dir {
            let meta_path = dir.join(META_ROUTING_FILE);
            if meta_path.is_file() {
                let raw = std::fs::read_to_string(&meta_path)
                    .map_err(|e| super::Error::RoutingFile(meta_path.clone(), e.to_string()))?;
                let file: MetaRoutingFile = serde_json::from_str(&raw)
                    .map_err(|e| super::Error::RoutingFile(meta_path.clone(), e.to_string()))?;
                if let Some(meta) = file.meta_routing {
                    bundle.meta_routing = meta;
                }
                if let Some(categories) = file.intent_categories {
                    bundle.intent_categories = categories;
                }
                if let Some(factors) = file.contextual_factors {
                    bundle.contextual_factors = factors;
                }
            }
            let rules_path = dir.join(ROUTING_RULES_FILE);
            if rules_path.is_file() {
                let raw = std::fs::read_to_string(&rules_path)
                    .map_err(|e| super::Error::RoutingFile(rules_path.clone(), e.to_string()))?;
                let file: RulesFile = serde_json::from_str(&raw)
                    .map_err(|e| super::Error::RoutingFile(rules_path.clone(), e.to_string()))?;
                bundle.routing_rules = match file {
                    RulesFile::Wrapped { rules } | RulesFile::Bare(rules) => rules,
                };
            }
        }

        // Deployment knob, same mechanism as the other flat env aliases.
        if let Ok(threshold) = std::env::var("CONFIDENCE_THRESHOLD")
            && let Ok(parsed) = threshold.parse::<f64>()
        {
            bundle.meta_routing.confidence_threshold = parsed.clamp(0.0, 1.0);
        }

        bundle.validate()?;
        Ok(bundle)
    }

    pub fn validate(&self) -> Result<(), super::Error> {
        for (name, category) in &self.intent_categories {
            for pattern in &category.patterns {
                Regex::new(pattern).map_err(|e| {
                    super::Error::InvalidPattern(name.clone(), e.to_string())
                })?;
            }
        }
        let mut seen = std::collections::HashSet::new();
        for rule in &self.routing_rules {
            if !seen.insert(rule.id.as_str()) {
                return Err(super::Error::DuplicateRuleId(rule.id.clone()));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn category_for_service(
        &self,
        service: &ServiceName,
    ) -> Option<(&str, &IntentCategory)> {
        self.intent_categories
            .iter()
            .find(|(_, category)| &category.target_service == service)
            .map(|(name, category)| (name.as_str(), category))
    }
}

fn default_intent_categories() -> IndexMap<String, IntentCategory> {
    let mut categories = IndexMap::new();
    let mut insert = |name: &str,
                      keywords: &[&str],
                      patterns: &[&str],
                      priority: i64,
                      target: &str| {
        categories.insert(
            name.to_string(),
            IntentCategory {
                keywords: keywords.iter().map(ToString::to_string).collect(),
                patterns: patterns.iter().map(ToString::to_string).collect(),
                ml_model_id: None,
                priority,
                target_service: ServiceName::from(target),
            },
        );
    };
    insert(
        "authentication",
        &[
            "login", "password", "authenticate", "signin", "logout",
            "register", "credential", "token", "reset", "account",
        ],
        &["^/auth", "^/login", "^/api/auth"],
        150,
        "user-authentication-service",
    );
    insert(
        "payment",
        &[
            "payment", "charge", "billing", "invoice", "refund",
            "subscription", "checkout", "card", "transaction",
        ],
        &["^/pay", "^/api/payments?", "^/billing"],
        140,
        "payment-processing-service",
    );
    insert(
        "media",
        &[
            "image", "photo", "thumbnail", "resize", "crop", "picture",
            "upload", "video", "media",
        ],
        &["^/media", "^/images?", "^/upload"],
        120,
        "image-processing-service",
    );
    insert(
        "notification",
        &[
            "notify", "notification", "email", "sms", "push", "alert",
            "remind",
        ],
        &["^/notifications?"],
        110,
        "notification-service",
    );
    insert(
        "analytics",
        &[
            "analytics", "report", "metric", "dashboard", "statistic",
            "insight", "export",
        ],
        &["^/analytics", "^/reports?"],
        100,
        "analytics-service",
    );
    insert(
        "search",
        &["search", "find", "query", "lookup", "filter", "browse"],
        &["^/search"],
        100,
        "search-service",
    );
    insert(
        "storage",
        &[
            "database", "record", "store", "save", "fetch", "retrieve",
            "backup",
        ],
        &["^/data", "^/records?"],
        100,
        "data-storage-service",
    );
    insert(
        "general",
        &["help", "info", "status"],
        &["^/api"],
        50,
        "api-gateway-service",
    );
    categories
}

fn default_contextual_factors() -> IndexMap<String, ContextualFactorConfig> {
    let mut factors = IndexMap::new();
    let mut insert = |name: &str, weight: f64, parts: &[&str]| {
        factors.insert(
            name.to_string(),
            ContextualFactorConfig {
                weight,
                factors: parts.iter().map(ToString::to_string).collect(),
            },
        );
    };
    insert("userProfile", 1.0, &["history", "preferences"]);
    insert("requestMetadata", 1.0, &["headers", "origin"]);
    insert("systemState", 1.0, &["healthyServices", "load"]);
    insert("temporalContext", 1.0, &["businessHours"]);
    insert("businessLogic", 1.0, &["policies"]);
    factors
}

fn default_routing_rules() -> Vec<RoutingRule> {
    vec![
        RoutingRule {
            id: "auth-path".to_string(),
            name: "Authentication paths".to_string(),
            conditions: Condition::Or {
                or: vec![
                    path_starts("/auth"),
                    path_starts("/login"),
                    path_starts("/api/auth"),
                ],
            },
            actions: RuleActions {
                route: ServiceName::from("user-authentication-service"),
                priority: 900,
                timeout_millis: None,
                extra: serde_json::Map::new(),
            },
        },
        RoutingRule {
            id: "payment-path".to_string(),
            name: "Payment paths".to_string(),
            conditions: Condition::Or {
                or: vec![path_starts("/pay"), path_starts("/billing")],
            },
            actions: RuleActions {
                route: ServiceName::from("payment-processing-service"),
                priority: 900,
                timeout_millis: None,
                extra: serde_json::Map::new(),
            },
        },
        RoutingRule {
            id: "mutating-methods".to_string(),
            name: "Mutating methods stay on the gateway".to_string(),
            conditions: Condition::And {
                and: vec![Condition::Leaf(ConditionLeaf {
                    r#type: ConditionSubject::Method,
                    operator: Operator::In,
                    key: None,
                    value: Some(serde_json::json!(["PUT", "DELETE"])),
                })],
            },
            actions: RuleActions {
                route: ServiceName::from("api-gateway-service"),
                priority: 300,
                timeout_millis: None,
                extra: serde_json::Map::new(),
            },
        },
    ]
}

fn path_starts(prefix: &str) -> Condition {
    Condition::Leaf(ConditionLeaf {
        r#type: ConditionSubject::Path,
        operator: Operator::Starts,
        key: None,
        value: Some(serde_json::Value::String(prefix.to_string())),
    })
}
