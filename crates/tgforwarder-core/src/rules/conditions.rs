use std::collections::HashMap;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

/// Deepest nesting accepted for a stored filter tree. The root is depth 1.
pub const MAX_FILTER_DEPTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupOperator {
    #[serde(rename = "AND", alias = "and")]
    And,
    #[serde(rename = "OR", alias = "or")]
    Or,
}

impl GroupOperator {
    fn parse(value: &str) -> Option<Self> {
        if value.eq_ignore_ascii_case("and") {
            Some(Self::And)
        } else if value.eq_ignore_ascii_case("or") {
            Some(Self::Or)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    Contains,
    NotContains,
    Equals,
    StartsWith,
    EndsWith,
    Regex,
}

impl Predicate {
    pub fn as_str(&self) -> &'static str {
        match self {
            Predicate::Contains => "contains",
            Predicate::NotContains => "not_contains",
            Predicate::Equals => "equals",
            Predicate::StartsWith => "starts_with",
            Predicate::EndsWith => "ends_with",
            Predicate::Regex => "regex",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "contains" => Some(Self::Contains),
            "not_contains" => Some(Self::NotContains),
            "equals" => Some(Self::Equals),
            "starts_with" => Some(Self::StartsWith),
            "ends_with" => Some(Self::EndsWith),
            "regex" => Some(Self::Regex),
            _ => None,
        }
    }
}

/// One node of a filter tree.
#[derive(Debug, Clone, PartialEq)]
pub enum LogicNode {
    Group {
        operator: GroupOperator,
        children: Vec<LogicNode>,
    },
    Condition {
        predicate: Predicate,
        value: String,
    },
    /// A condition naming a predicate this engine does not implement. Never matches.
    UnsupportedPredicate(String),
    /// A node missing the fields needed to interpret it. Always matches.
    Unrecognized,
}

impl LogicNode {
    pub fn and(children: Vec<LogicNode>) -> Self {
        Self::Group {
            operator: GroupOperator::And,
            children,
        }
    }

    pub fn or(children: Vec<LogicNode>) -> Self {
        Self::Group {
            operator: GroupOperator::Or,
            children,
        }
    }

    pub fn condition(predicate: Predicate, value: impl Into<String>) -> Self {
        Self::Condition {
            predicate,
            value: value.into(),
        }
    }

    /// Depth of the deepest path, counting this node as 1.
    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut stack = vec![(self, 1usize)];
        while let Some((node, depth)) = stack.pop() {
            deepest = deepest.max(depth);
            if let LogicNode::Group { children, .. } = node {
                stack.extend(children.iter().map(|child| (child, depth + 1)));
            }
        }
        deepest
    }
}

/// Pre-tree filter format: `{"keywords": [...], "blacklist": [...], "regex": "..."}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LegacyFilter {
    pub keywords: Vec<String>,
    pub blacklist: Vec<String>,
    pub regex: Option<String>,
}

const LEGACY_KEYS: [&str; 3] = ["keywords", "blacklist", "regex"];

impl LegacyFilter {
    fn from_object(object: &Map<String, Value>) -> Self {
        Self {
            keywords: string_list(object.get("keywords")),
            blacklist: string_list(object.get("blacklist")),
            regex: object
                .get("regex")
                .and_then(Value::as_str)
                .filter(|pattern| !pattern.is_empty())
                .map(str::to_string),
        }
    }
}

/// Accepts either a list of strings or a single bare string.
fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(single)) if !single.is_empty() => vec![single.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// A rule's filter, resolved once when the rule is loaded.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterSpec {
    /// No filter configured.
    MatchAll,
    Tree(LogicNode),
    Legacy(LegacyFilter),
    /// A document that is neither a tree nor a legacy filter. Always matches.
    Unrecognized,
    /// A tree nested past [`MAX_FILTER_DEPTH`]. Never matches.
    TooDeep,
}

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("filter tree exceeds maximum depth of {max}")]
    TooDeep { max: usize },
    #[error("invalid regex pattern '{pattern}': {source}")]
    InvalidRegex {
        pattern: String,
        source: regex::Error,
    },
}

#[derive(Debug)]
struct DepthExceeded;

impl FilterSpec {
    pub fn from_json(filters: Option<&Value>) -> Self {
        let object = match filters {
            None | Some(Value::Null) => return Self::MatchAll,
            Some(Value::Object(object)) => object,
            Some(other) => {
                debug!(kind = json_kind(other), "filter is not an object; ignoring");
                return Self::Unrecognized;
            }
        };

        if object.is_empty() {
            return Self::MatchAll;
        }

        if looks_like_tree_node(object) {
            return match parse_node(object, 1) {
                Ok(node) => Self::Tree(node),
                Err(DepthExceeded) => {
                    warn!(max = MAX_FILTER_DEPTH, "filter tree too deep; rule will not match");
                    Self::TooDeep
                }
            };
        }

        if LEGACY_KEYS.iter().any(|key| object.contains_key(*key)) {
            return Self::Legacy(LegacyFilter::from_object(object));
        }

        debug!("filter has no recognizable shape; matching everything");
        Self::Unrecognized
    }

    /// Stricter check used before a filter is stored. Evaluation itself never fails.
    pub fn validate(&self) -> Result<(), FilterError> {
        match self {
            FilterSpec::MatchAll | FilterSpec::Unrecognized => Ok(()),
            FilterSpec::TooDeep => Err(FilterError::TooDeep {
                max: MAX_FILTER_DEPTH,
            }),
            FilterSpec::Legacy(legacy) => match &legacy.regex {
                Some(pattern) => compile_pattern(pattern).map(|_| ()),
                None => Ok(()),
            },
            FilterSpec::Tree(node) => {
                if node.depth() > MAX_FILTER_DEPTH {
                    return Err(FilterError::TooDeep {
                        max: MAX_FILTER_DEPTH,
                    });
                }
                let mut stack = vec![node];
                while let Some(node) = stack.pop() {
                    match node {
                        LogicNode::Group { children, .. } => stack.extend(children.iter()),
                        LogicNode::Condition {
                            predicate: Predicate::Regex,
                            value,
                        } => {
                            compile_pattern(value)?;
                        }
                        _ => {}
                    }
                }
                Ok(())
            }
        }
    }

    pub fn matches(&self, text: &str) -> bool {
        self.matches_with(text, &mut EvaluationContext::new())
    }

    pub fn matches_with(&self, text: &str, ctx: &mut EvaluationContext) -> bool {
        let text = Text::new(text);
        match self {
            FilterSpec::MatchAll | FilterSpec::Unrecognized => true,
            FilterSpec::TooDeep => false,
            FilterSpec::Tree(node) => evaluate_at(node, &text, ctx, 1),
            FilterSpec::Legacy(legacy) => evaluate_legacy(legacy, &text, ctx),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn looks_like_tree_node(object: &Map<String, Value>) -> bool {
    ["type", "operator", "children", "condition"]
        .iter()
        .any(|key| object.contains_key(*key))
}

fn parse_node(object: &Map<String, Value>, depth: usize) -> Result<LogicNode, DepthExceeded> {
    if depth > MAX_FILTER_DEPTH {
        return Err(DepthExceeded);
    }

    let node_type = object.get("type").and_then(Value::as_str);
    let is_group = match node_type {
        Some("group") => true,
        Some("condition") => false,
        Some(_) => return Ok(LogicNode::Unrecognized),
        None if object.contains_key("children") => true,
        None if object.contains_key("condition") => false,
        None => return Ok(LogicNode::Unrecognized),
    };

    if is_group {
        let operator = object
            .get("operator")
            .and_then(Value::as_str)
            .and_then(GroupOperator::parse);
        let Some(operator) = operator else {
            return Ok(LogicNode::Unrecognized);
        };

        let children = match object.get("children") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => {
                let mut children = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::Object(child) => children.push(parse_node(child, depth + 1)?),
                        _ => children.push(LogicNode::Unrecognized),
                    }
                }
                children
            }
            Some(_) => return Ok(LogicNode::Unrecognized),
        };

        return Ok(LogicNode::Group { operator, children });
    }

    let (Some(condition), Some(value)) = (
        object.get("condition").and_then(Value::as_str),
        object.get("value").and_then(Value::as_str),
    ) else {
        return Ok(LogicNode::Unrecognized);
    };

    Ok(match Predicate::from_str(condition) {
        Some(predicate) => LogicNode::Condition {
            predicate,
            value: value.to_string(),
        },
        None => LogicNode::UnsupportedPredicate(condition.to_string()),
    })
}

fn compile_pattern(pattern: &str) -> Result<Regex, FilterError> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|source| FilterError::InvalidRegex {
            pattern: pattern.to_string(),
            source,
        })
}

/// Per-evaluation scratch space. Compiled patterns are cached, including failures,
/// so a bad pattern is compiled and reported once.
#[derive(Debug, Default)]
pub struct EvaluationContext {
    regex_cache: HashMap<String, Option<Regex>>,
}

impl EvaluationContext {
    pub fn new() -> Self {
        Self {
            regex_cache: HashMap::new(),
        }
    }

    fn regex(&mut self, pattern: &str) -> Option<&Regex> {
        if !self.regex_cache.contains_key(pattern) {
            let compiled = match compile_pattern(pattern) {
                Ok(regex) => Some(regex),
                Err(err) => {
                    warn!(error = %err, "invalid regex in filter; condition evaluates to false");
                    None
                }
            };
            self.regex_cache.insert(pattern.to_string(), compiled);
        }

        self.regex_cache.get(pattern).and_then(Option::as_ref)
    }
}

struct Text<'a> {
    raw: &'a str,
    folded: String,
}

impl<'a> Text<'a> {
    fn new(raw: &'a str) -> Self {
        Self {
            raw,
            folded: raw.to_lowercase(),
        }
    }
}

/// Evaluate an optional tree against `text`. An absent tree matches everything.
pub fn evaluate(node: Option<&LogicNode>, text: &str) -> bool {
    match node {
        None => true,
        Some(node) => evaluate_node(node, text, &mut EvaluationContext::new()),
    }
}

pub fn evaluate_node(node: &LogicNode, text: &str, ctx: &mut EvaluationContext) -> bool {
    evaluate_at(node, &Text::new(text), ctx, 1)
}

fn evaluate_at(node: &LogicNode, text: &Text<'_>, ctx: &mut EvaluationContext, depth: usize) -> bool {
    if depth > MAX_FILTER_DEPTH {
        warn!(max = MAX_FILTER_DEPTH, "filter tree too deep during evaluation");
        return false;
    }

    match node {
        LogicNode::Group { children, .. } if children.is_empty() => true,
        LogicNode::Group {
            operator: GroupOperator::And,
            children,
        } => children
            .iter()
            .all(|child| evaluate_at(child, text, ctx, depth + 1)),
        LogicNode::Group {
            operator: GroupOperator::Or,
            children,
        } => children
            .iter()
            .any(|child| evaluate_at(child, text, ctx, depth + 1)),
        LogicNode::Condition { predicate, value } => {
            evaluate_predicate(*predicate, value, text, ctx)
        }
        LogicNode::UnsupportedPredicate(name) => {
            debug!(predicate = %name, "unsupported predicate never matches");
            false
        }
        LogicNode::Unrecognized => true,
    }
}

/// Evaluate a single leaf condition. Comparisons ignore case.
pub fn evaluate_condition(
    predicate: Predicate,
    value: &str,
    text: &str,
    ctx: &mut EvaluationContext,
) -> bool {
    evaluate_predicate(predicate, value, &Text::new(text), ctx)
}

fn evaluate_predicate(
    predicate: Predicate,
    value: &str,
    text: &Text<'_>,
    ctx: &mut EvaluationContext,
) -> bool {
    if predicate == Predicate::Regex {
        return ctx
            .regex(value)
            .is_some_and(|regex| regex.is_match(text.raw));
    }

    let needle = value.to_lowercase();
    let haystack = text.folded.as_str();
    match predicate {
        Predicate::Contains => haystack.contains(&needle),
        Predicate::NotContains => !haystack.contains(&needle),
        Predicate::Equals => haystack == needle,
        Predicate::StartsWith => haystack.starts_with(&needle),
        Predicate::EndsWith => haystack.ends_with(&needle),
        Predicate::Regex => false,
    }
}

fn evaluate_legacy(filter: &LegacyFilter, text: &Text<'_>, ctx: &mut EvaluationContext) -> bool {
    let haystack = text.folded.as_str();

    if !filter.keywords.is_empty()
        && !filter
            .keywords
            .iter()
            .any(|keyword| haystack.contains(&keyword.to_lowercase()))
    {
        return false;
    }

    if filter
        .blacklist
        .iter()
        .filter(|term| !term.is_empty())
        .any(|term| haystack.contains(&term.to_lowercase()))
    {
        return false;
    }

    match &filter.regex {
        Some(pattern) => ctx
            .regex(pattern)
            .is_some_and(|regex| regex.is_match(text.raw)),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn contains(value: &str) -> LogicNode {
        LogicNode::condition(Predicate::Contains, value)
    }

    fn check(predicate: Predicate, value: &str, text: &str) -> bool {
        evaluate_condition(predicate, value, text, &mut EvaluationContext::new())
    }

    fn nested(depth: usize) -> Value {
        let mut node = json!({"type": "condition", "condition": "contains", "value": "x"});
        for _ in 1..depth {
            node = json!({"type": "group", "operator": "AND", "children": [node]});
        }
        node
    }

    #[test]
    fn absent_tree_matches_everything() {
        for text in ["", "anything", "UPPER case"] {
            assert!(evaluate(None, text));
            assert!(FilterSpec::from_json(None).matches(text));
            assert!(FilterSpec::from_json(Some(&Value::Null)).matches(text));
            assert!(FilterSpec::from_json(Some(&json!({}))).matches(text));
        }
    }

    #[test]
    fn empty_groups_match_for_both_operators() {
        for text in ["", "hello"] {
            assert!(evaluate(Some(&LogicNode::and(vec![])), text));
            assert!(evaluate(Some(&LogicNode::or(vec![])), text));
        }
    }

    #[test]
    fn contains_is_case_insensitive() {
        assert!(check(Predicate::Contains, "URGENT", "this is urgent"));
        assert!(check(Predicate::Contains, "urgent", "THIS IS URGENT"));
        assert!(!check(Predicate::Contains, "urgent", "this is calm"));
    }

    #[test]
    fn not_contains_inverts_substring_test() {
        assert!(check(Predicate::NotContains, "spam", "hello world"));
        assert!(!check(Predicate::NotContains, "SPAM", "buy spam now"));
    }

    #[test]
    fn equals_folds_case() {
        assert!(check(Predicate::Equals, "Hello", "hELLO"));
        assert!(!check(Predicate::Equals, "Hello", "Hello!"));
    }

    #[test]
    fn starts_and_ends_with_fold_case() {
        assert!(check(Predicate::StartsWith, "ALERT", "alert: disk full"));
        assert!(!check(Predicate::StartsWith, "disk", "alert: disk full"));
        assert!(check(Predicate::EndsWith, "FULL", "alert: disk full"));
        assert!(!check(Predicate::EndsWith, "alert", "alert: disk full"));
    }

    #[test]
    fn case_folding_handles_non_ascii() {
        assert!(check(Predicate::Contains, "ПРИВЕТ", "всем привет"));
        assert!(check(Predicate::Equals, "ÉTÉ", "été"));
    }

    #[test]
    fn regex_matches_anywhere_ignoring_case() {
        assert!(check(Predicate::Regex, r"order #\d+", "Your ORDER #1234 shipped"));
        assert!(!check(Predicate::Regex, r"^\d+$", "abc"));
    }

    #[test]
    fn invalid_regex_is_false_not_error() {
        assert!(!check(Predicate::Regex, "(unclosed", "(unclosed"));
    }

    #[test]
    fn invalid_regex_does_not_abort_siblings() {
        let tree = LogicNode::or(vec![
            LogicNode::condition(Predicate::Regex, "[bad"),
            contains("ok"),
        ]);
        assert!(evaluate(Some(&tree), "this is ok"));

        let mut ctx = EvaluationContext::new();
        assert!(!evaluate_node(&tree, "nothing", &mut ctx));
        assert_eq!(ctx.regex_cache.len(), 1, "failure is cached once");
    }

    #[test]
    fn empty_text_is_handled() {
        assert!(check(Predicate::Contains, "", ""));
        assert!(!check(Predicate::Contains, "a", ""));
        assert!(check(Predicate::NotContains, "a", ""));
        assert!(check(Predicate::Equals, "", ""));
    }

    #[test]
    fn secret_scenario() {
        let filter = json!({
            "type": "group",
            "operator": "AND",
            "children": [
                {"type": "condition", "condition": "contains", "value": "secret"}
            ]
        });
        let spec = FilterSpec::from_json(Some(&filter));
        assert!(spec.matches("This is a secret message"));
        assert!(!spec.matches("This is a public message"));
    }

    #[test]
    fn and_or_follow_boolean_logic_at_depth_three() {
        let leaves = [
            ("alpha", true),
            ("beta", false),
            ("gamma", true),
            ("delta", false),
        ];
        let text = "alpha gamma";
        let leaf = |i: usize| contains(leaves[i].0);
        let truth = |i: usize| leaves[i].1;

        for (outer, inner) in [
            (GroupOperator::And, GroupOperator::Or),
            (GroupOperator::Or, GroupOperator::And),
            (GroupOperator::And, GroupOperator::And),
            (GroupOperator::Or, GroupOperator::Or),
        ] {
            let combine = |op: GroupOperator, a: bool, b: bool| match op {
                GroupOperator::And => a && b,
                GroupOperator::Or => a || b,
            };
            let group = |op: GroupOperator, children: Vec<LogicNode>| LogicNode::Group {
                operator: op,
                children,
            };

            // outer(inner(inner(0, 1), 2), 3)
            let tree = group(
                outer,
                vec![
                    group(inner, vec![group(inner, vec![leaf(0), leaf(1)]), leaf(2)]),
                    leaf(3),
                ],
            );
            let expected = combine(
                outer,
                combine(inner, combine(inner, truth(0), truth(1)), truth(2)),
                truth(3),
            );
            assert_eq!(tree.depth(), 4);
            assert_eq!(
                evaluate(Some(&tree), text),
                expected,
                "outer {outer:?} inner {inner:?}"
            );
        }
    }

    #[test]
    fn evaluation_is_idempotent() {
        let tree = LogicNode::and(vec![
            LogicNode::condition(Predicate::Regex, r"\bsale\b"),
            LogicNode::or(vec![contains("today"), contains("now")]),
        ]);
        let mut ctx = EvaluationContext::new();
        let first = evaluate_node(&tree, "Big SALE today", &mut ctx);
        for _ in 0..10 {
            assert_eq!(evaluate_node(&tree, "Big SALE today", &mut ctx), first);
            assert_eq!(evaluate(Some(&tree), "Big SALE today"), first);
        }
        assert!(first);
    }

    #[test]
    fn parses_frontend_tree_format() {
        let filter = json!({
            "id": "root",
            "type": "group",
            "operator": "OR",
            "children": [
                {"id": "c1", "type": "condition", "field": "message_text", "condition": "starts_with", "value": "BUY"},
                {"id": "g1", "type": "group", "operator": "AND", "children": [
                    {"id": "c2", "type": "condition", "condition": "regex", "value": "btc|eth"},
                    {"id": "c3", "type": "condition", "condition": "not_contains", "value": "scam"}
                ]}
            ]
        });

        let spec = FilterSpec::from_json(Some(&filter));
        let expected = LogicNode::or(vec![
            LogicNode::condition(Predicate::StartsWith, "BUY"),
            LogicNode::and(vec![
                LogicNode::condition(Predicate::Regex, "btc|eth"),
                LogicNode::condition(Predicate::NotContains, "scam"),
            ]),
        ]);
        assert_eq!(spec, FilterSpec::Tree(expected));
        assert!(spec.matches("buy now"));
        assert!(spec.matches("ETH is up"));
        assert!(!spec.matches("ETH scam alert"));
    }

    #[test]
    fn lowercase_operator_is_accepted() {
        let filter = json!({"type": "group", "operator": "and", "children": [
            {"type": "condition", "condition": "contains", "value": "x"}
        ]});
        assert!(matches!(
            FilterSpec::from_json(Some(&filter)),
            FilterSpec::Tree(LogicNode::Group {
                operator: GroupOperator::And,
                ..
            })
        ));
    }

    #[test]
    fn nodes_missing_fields_fail_open() {
        let group_without_operator = json!({"type": "group", "children": [
            {"type": "condition", "condition": "contains", "value": "never"}
        ]});
        assert!(FilterSpec::from_json(Some(&group_without_operator)).matches("text"));

        let condition_without_value = json!({"type": "condition", "condition": "contains"});
        assert!(FilterSpec::from_json(Some(&condition_without_value)).matches("text"));

        let tree = json!({"type": "group", "operator": "AND", "children": [
            {"type": "condition"},
            "not even an object",
            {"type": "condition", "condition": "contains", "value": "keep"}
        ]});
        let spec = FilterSpec::from_json(Some(&tree));
        assert!(spec.matches("keep me"));
        assert!(!spec.matches("drop me"));
    }

    #[test]
    fn unsupported_predicate_never_matches() {
        let filter = json!({"type": "condition", "condition": "sounds_like", "value": "x"});
        let spec = FilterSpec::from_json(Some(&filter));
        assert_eq!(
            spec,
            FilterSpec::Tree(LogicNode::UnsupportedPredicate("sounds_like".into()))
        );
        assert!(!spec.matches("x"));
    }

    #[test]
    fn unknown_documents_fail_open() {
        assert_eq!(
            FilterSpec::from_json(Some(&json!({"colour": "blue"}))),
            FilterSpec::Unrecognized
        );
        assert!(FilterSpec::from_json(Some(&json!(["a", "b"]))).matches("z"));
        assert!(FilterSpec::from_json(Some(&json!("urgent"))).matches("z"));
    }

    #[test]
    fn legacy_keywords_match_any() {
        let spec = FilterSpec::from_json(Some(&json!({"keywords": ["urgent", "alert"]})));
        assert!(spec.matches("ALERT: disk full"));
        assert!(!spec.matches("all quiet"));
    }

    #[test]
    fn legacy_keywords_accept_single_string() {
        let spec = FilterSpec::from_json(Some(&json!({"keywords": "Urgent"})));
        assert_eq!(
            spec,
            FilterSpec::Legacy(LegacyFilter {
                keywords: vec!["Urgent".into()],
                blacklist: vec![],
                regex: None,
            })
        );
        assert!(spec.matches("this is urgent"));
    }

    #[test]
    fn legacy_blacklist_and_regex_combine() {
        let spec = FilterSpec::from_json(Some(&json!({
            "keywords": ["deal"],
            "blacklist": ["expired"],
            "regex": r"\d+%"
        })));
        assert!(spec.matches("Deal: 50% off"));
        assert!(!spec.matches("Deal: 50% off (EXPIRED)"));
        assert!(!spec.matches("Deal: half off"));
        assert!(!spec.matches("Sale: 50% off"));
    }

    #[test]
    fn legacy_empty_keywords_place_no_restriction() {
        let spec = FilterSpec::from_json(Some(&json!({"keywords": [], "blacklist": ["spam"]})));
        assert!(spec.matches("anything"));
        assert!(!spec.matches("SPAM inside"));
    }

    #[test]
    fn legacy_invalid_regex_never_matches() {
        let spec = FilterSpec::from_json(Some(&json!({"regex": "(oops"})));
        assert!(!spec.matches("(oops"));
        assert!(matches!(
            spec.validate(),
            Err(FilterError::InvalidRegex { .. })
        ));
    }

    #[test]
    fn depth_limit_is_enforced_at_parse_time() {
        let at_limit = FilterSpec::from_json(Some(&nested(MAX_FILTER_DEPTH)));
        assert!(matches!(at_limit, FilterSpec::Tree(_)));
        assert!(at_limit.matches("x"));
        assert!(at_limit.validate().is_ok());

        let too_deep = FilterSpec::from_json(Some(&nested(MAX_FILTER_DEPTH + 1)));
        assert_eq!(too_deep, FilterSpec::TooDeep);
        assert!(!too_deep.matches("x"));
        assert!(matches!(
            too_deep.validate(),
            Err(FilterError::TooDeep { max: MAX_FILTER_DEPTH })
        ));
    }

    #[test]
    fn depth_limit_is_enforced_for_hand_built_trees() {
        let mut node = contains("x");
        for _ in 0..MAX_FILTER_DEPTH {
            node = LogicNode::and(vec![node]);
        }
        assert_eq!(node.depth(), MAX_FILTER_DEPTH + 1);
        assert!(!evaluate(Some(&node), "x"));
        assert!(FilterSpec::Tree(node).validate().is_err());
    }

    #[test]
    fn validate_reports_nested_invalid_regex() {
        let spec = FilterSpec::Tree(LogicNode::and(vec![
            contains("a"),
            LogicNode::or(vec![LogicNode::condition(Predicate::Regex, "a{2,1}")]),
        ]));
        match spec.validate() {
            Err(FilterError::InvalidRegex { pattern, .. }) => assert_eq!(pattern, "a{2,1}"),
            other => panic!("unexpected validation result: {other:?}"),
        }
    }

    #[test]
    fn predicate_strings_round_trip() {
        for predicate in [
            Predicate::Contains,
            Predicate::NotContains,
            Predicate::Equals,
            Predicate::StartsWith,
            Predicate::EndsWith,
            Predicate::Regex,
        ] {
            assert_eq!(Predicate::from_str(predicate.as_str()), Some(predicate));
        }
    }
}
