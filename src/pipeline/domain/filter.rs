use crate::common::Event;
use indexmap::IndexMap;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};

/// How a rule names its camera. A trailing `*` turns the rule into a prefix
/// match (`voor*` covers `voordeur` and `voortuin`); anything else must match
/// the whole camera name. Both ignore case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraPattern {
    Exact(String),
    Prefix(String),
}

impl CameraPattern {
    pub fn parse(raw: &str) -> Self {
        let normalized = raw.trim().to_lowercase();
        match normalized.strip_suffix('*') {
            Some(prefix) => CameraPattern::Prefix(prefix.to_string()),
            None => CameraPattern::Exact(normalized),
        }
    }

    fn matches(&self, camera: &str) -> bool {
        match self {
            CameraPattern::Exact(name) => name == camera,
            CameraPattern::Prefix(prefix) => camera.starts_with(prefix.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterRule {
    camera: CameraPattern,
    labels: BTreeSet<String>,
}

impl FilterRule {
    pub fn camera(&self) -> &CameraPattern {
        &self.camera
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }

    fn allows(&self, camera: &str, label: &str) -> bool {
        self.camera.matches(camera) && self.labels.contains(label)
    }
}

/// Camera → allowed labels. An empty set admits nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "FilterSpec")]
pub struct RuleSet {
    rules: IndexMap<String, FilterRule>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds labels for a camera; repeated cameras accumulate labels.
    pub fn with_rule<I, S>(mut self, camera: &str, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.add_rule(camera, labels);
        self
    }

    pub fn add_rule<I, S>(&mut self, camera: &str, labels: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let key = camera.trim().to_lowercase();
        let rule = self.rules.entry(key).or_insert_with(|| FilterRule {
            camera: CameraPattern::parse(camera),
            labels: BTreeSet::new(),
        });
        rule.labels.extend(
            labels
                .into_iter()
                .map(|label| label.as_ref().trim().to_lowercase())
                .filter(|label| !label.is_empty()),
        );
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn rules(&self) -> impl Iterator<Item = &FilterRule> {
        self.rules.values()
    }

    pub fn allows(&self, camera: &str, label: &str) -> bool {
        let camera = camera.trim().to_lowercase();
        let label = label.trim().to_lowercase();
        self.rules.values().any(|rule| rule.allows(&camera, &label))
    }
}

/// True iff the event's camera has a rule listing the event's label.
pub fn should_process(event: &Event, rules: &RuleSet) -> bool {
    rules.allows(&event.camera, &event.label)
}

/// Accepted configuration shapes: a list of `{camera, label}` pairs or a
/// table of camera → labels.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FilterSpec {
    Pairs(Vec<FilterPair>),
    Map(BTreeMap<String, Vec<String>>),
}

#[derive(Debug, Clone, Deserialize)]
pub struct FilterPair {
    pub camera: String,
    pub label: String,
}

impl From<FilterSpec> for RuleSet {
    fn from(spec: FilterSpec) -> Self {
        let mut rules = RuleSet::new();
        match spec {
            FilterSpec::Pairs(pairs) => {
                for pair in pairs.iter().filter(|p| !p.camera.trim().is_empty()) {
                    rules.add_rule(&pair.camera, [pair.label.as_str()]);
                }
            }
            FilterSpec::Map(map) => {
                for (camera, labels) in map.iter().filter(|(c, _)| !c.trim().is_empty()) {
                    rules.add_rule(camera, labels);
                }
            }
        }
        rules
    }
}
