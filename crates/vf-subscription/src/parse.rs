//! Subscription document parsing
//!
//! The document is walked as an untyped JSON value so one malformed app,
//! group or rule is skipped on its own instead of failing the whole
//! subscription.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};
use vf_selector::{Selector, SelectorGroups};

use crate::error::{SubscriptionError, SubscriptionResult};
use crate::rule::{ResetMatch, Rule};

/// Anything shorter is an empty or truncated download
const MIN_DOCUMENT_LEN: usize = 10;

const DEFAULT_APP_GROUP: &str = "Unnamed";
const DEFAULT_GLOBAL_GROUP: &str = "Global";
const DEFAULT_RULE_NAME: &str = "Unnamed rule";

/// Fields a rule inherits from its group when it leaves them out
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Inheritable {
    action_cd: Option<u64>,
    action_delay: Option<u64>,
    match_delay: Option<u64>,
    match_time: Option<u64>,
    action_maximum: Option<u32>,
    fast_query: Option<bool>,
    #[serde(default, deserialize_with = "one_or_many")]
    activity_ids: Option<Vec<String>>,
    #[serde(default, deserialize_with = "one_or_many")]
    exclude_activity_ids: Option<Vec<String>>,
    reset_match: Option<ResetMatch>,
    forced_time: Option<u64>,
}

impl Inheritable {
    fn or(self, group: &Inheritable) -> Inheritable {
        Inheritable {
            action_cd: self.action_cd.or(group.action_cd),
            action_delay: self.action_delay.or(group.action_delay),
            match_delay: self.match_delay.or(group.match_delay),
            match_time: self.match_time.or(group.match_time),
            action_maximum: self.action_maximum.or(group.action_maximum),
            fast_query: self.fast_query.or(group.fast_query),
            activity_ids: self.activity_ids.or_else(|| group.activity_ids.clone()),
            exclude_activity_ids: self
                .exclude_activity_ids
                .or_else(|| group.exclude_activity_ids.clone()),
            reset_match: self.reset_match.or(group.reset_match),
            forced_time: self.forced_time.or(group.forced_time),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RuleHeader {
    name: Option<String>,
    key: Option<i64>,
    #[serde(default, deserialize_with = "one_or_many")]
    pre_keys: Option<Vec<i64>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

fn one_or_many<'de, D, T>(deserializer: D) -> Result<Option<Vec<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(
        Option::<OneOrMany<T>>::deserialize(deserializer)?.map(|v| match v {
            OneOrMany::One(item) => vec![item],
            OneOrMany::Many(items) => items,
        }),
    )
}

/// Where in the document an item sits, for log messages
struct Scope<'a> {
    app_id: Option<&'a str>,
    group: &'a str,
}

impl std::fmt::Display for Scope<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.app_id {
            Some(app) => write!(f, "apps[{app}].{}", self.group),
            None => write!(f, "globalGroups.{}", self.group),
        }
    }
}

/// Parse a JSON5 subscription document into resolved rules
///
/// Only a document that is not JSON5 at all, or whose root is not an
/// object, is an error. Content shorter than ten characters is an empty
/// subscription.
pub fn parse_document(content: &str) -> SubscriptionResult<Vec<Rule>> {
    let content = content.trim();
    if content.len() < MIN_DOCUMENT_LEN {
        debug!(len = content.len(), "Subscription content too short, treating as empty");
        return Ok(Vec::new());
    }

    let root: Value =
        json5::from_str(content).map_err(|e| SubscriptionError::Parse(e.to_string()))?;
    let Value::Object(root) = root else {
        return Err(SubscriptionError::Parse("root is not an object".to_string()));
    };

    let mut rules = Vec::new();

    for (index, app) in array_field(&root, "apps").iter().enumerate() {
        let Some(app) = enabled_object(app) else {
            debug!(index, "Skipping disabled or malformed app");
            continue;
        };
        let Some(app_id) = app.get("id").and_then(Value::as_str) else {
            warn!(index, "App without id, skipping");
            continue;
        };
        for group in array_field(app, "groups") {
            parse_group(group, Some(app_id), &mut rules);
        }
    }

    for group in array_field(&root, "globalGroups") {
        parse_group(group, None, &mut rules);
    }

    debug!(rules = rules.len(), "Parsed subscription");
    Ok(rules)
}

fn parse_group(group: &Value, app_id: Option<&str>, out: &mut Vec<Rule>) {
    let Some(group) = enabled_object(group) else {
        return;
    };
    let name = group
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or(if app_id.is_some() {
            DEFAULT_APP_GROUP
        } else {
            DEFAULT_GLOBAL_GROUP
        });
    let scope = Scope {
        app_id,
        group: name,
    };

    let defaults: Inheritable = match from_object(group) {
        Ok(defaults) => defaults,
        Err(e) => {
            warn!(scope = %scope, error = %e, "Invalid group settings, skipping group");
            return;
        }
    };

    let rules = match group.get("rules") {
        Some(Value::Array(items)) => items.as_slice(),
        Some(single @ (Value::Object(_) | Value::String(_))) => std::slice::from_ref(single),
        _ => &[],
    };
    for (index, rule) in rules.iter().enumerate() {
        if let Some(rule) = parse_rule(rule, &scope, &defaults) {
            out.push(rule);
        } else {
            debug!(scope = %scope, index, "Rule skipped");
        }
    }
}

fn parse_rule(value: &Value, scope: &Scope<'_>, defaults: &Inheritable) -> Option<Rule> {
    // A bare string or list is shorthand for `matches`
    let shorthand;
    let object = match value {
        Value::Object(object) => object,
        Value::String(_) | Value::Array(_) => {
            let mut object = Map::new();
            object.insert("matches".to_string(), value.clone());
            shorthand = object;
            &shorthand
        }
        _ => return None,
    };
    if object.get("enable").and_then(Value::as_bool) == Some(false) {
        return None;
    }

    let header: RuleHeader = match from_object(object) {
        Ok(header) => header,
        Err(e) => {
            warn!(scope = %scope, error = %e, "Invalid rule header");
            return None;
        }
    };
    let settings = match from_object::<Inheritable>(object) {
        Ok(settings) => settings.or(defaults),
        Err(e) => {
            warn!(scope = %scope, error = %e, "Invalid rule settings");
            return None;
        }
    };

    let selectors = SelectorGroups {
        matches: selector_list(object.get("matches"), scope),
        any_matches: selector_list(object.get("anyMatches"), scope),
        exclude_matches: selector_list(object.get("excludeMatches"), scope),
        exclude_all_matches: selector_list(object.get("excludeAllMatches"), scope),
    };
    if !selectors.is_matchable() {
        return None;
    }

    Some(Rule {
        name: header
            .name
            .unwrap_or_else(|| DEFAULT_RULE_NAME.to_string()),
        group: scope.group.to_string(),
        key: header.key,
        pre_keys: header.pre_keys.unwrap_or_default(),
        app_id: scope.app_id.map(str::to_string),
        activity_ids: settings.activity_ids,
        exclude_activity_ids: settings.exclude_activity_ids.unwrap_or_default(),
        selectors,
        action_cd_ms: settings.action_cd,
        action_delay_ms: settings.action_delay.unwrap_or(0),
        match_delay_ms: settings.match_delay.unwrap_or(0),
        match_time_ms: settings.match_time,
        forced_time_ms: settings.forced_time.unwrap_or(0),
        action_maximum: settings.action_maximum,
        reset_match: settings.reset_match.unwrap_or_default(),
        fast_query: settings.fast_query.unwrap_or(false),
    })
}

/// Compile a string-or-array selector field, dropping sources that fail to parse
fn selector_list(value: Option<&Value>, scope: &Scope<'_>) -> Vec<Selector> {
    let sources: Vec<&str> = match value {
        Some(Value::String(s)) => vec![s.as_str()],
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
        _ => return Vec::new(),
    };
    sources
        .into_iter()
        .filter_map(|source| match Selector::parse(source) {
            Ok(selector) => Some(selector),
            Err(e) => {
                warn!(scope = %scope, selector = source, error = %e, "Skipping invalid selector");
                None
            }
        })
        .collect()
}

/// The object, unless it is not one or carries `enable: false`
fn enabled_object(value: &Value) -> Option<&Map<String, Value>> {
    let object = value.as_object()?;
    match object.get("enable").and_then(Value::as_bool) {
        Some(false) => None,
        _ => Some(object),
    }
}

fn array_field<'a>(object: &'a Map<String, Value>, key: &str) -> &'a [Value] {
    match object.get(key) {
        Some(Value::Array(items)) => items,
        _ => &[],
    }
}

fn from_object<T: DeserializeOwned>(object: &Map<String, Value>) -> Result<T, serde_json::Error> {
    serde_json::from_value(Value::Object(object.clone()))
}
