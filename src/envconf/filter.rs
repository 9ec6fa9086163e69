use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use regex::Regex;

use crate::error::{Error, Result};

/// A label multimap: each key maps to the set of values recorded for it.
///
/// Used both for the labels a feature carries and for the
/// `--labels` / `--skip-labels` filters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Labels(BTreeMap<String, BTreeSet<String>>);

impl Labels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one `key=value` pair. Repeated keys accumulate values.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.entry(key.into()).or_default().insert(value.into());
    }

    /// All values recorded under `key`.
    pub fn get(&self, key: &str) -> Option<&BTreeSet<String>> {
        self.0.get(key)
    }

    pub fn contains(&self, key: &str, value: &str) -> bool {
        self.0.get(key).is_some_and(|values| values.contains(value))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &BTreeSet<String>)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Whether any `(key, value)` pair of `self` is also present in `other`.
    pub fn intersects(&self, other: &Labels) -> bool {
        self.0.iter().any(|(key, values)| {
            other
                .get(key)
                .is_some_and(|theirs| !values.is_disjoint(theirs))
        })
    }

    /// Merge the pairs of `other` into `self`.
    pub fn extend(&mut self, other: Labels) {
        for (key, values) in other.0 {
            self.0.entry(key).or_default().extend(values);
        }
    }
}

impl FromStr for Labels {
    type Err = Error;

    /// Parse a comma-separated list of `key=value` pairs.
    ///
    /// - `"env=prod"` → `{env: [prod]}`
    /// - `"env=prod,env=dev,tier=db"` → `{env: [dev, prod], tier: [db]}`
    ///
    /// Whitespace around pairs is ignored; an empty string yields no labels.
    fn from_str(input: &str) -> Result<Self> {
        let mut labels = Labels::new();
        for pair in input.split(',') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| Error::InvalidLabel(pair.to_owned()))?;
            let (key, value) = (key.trim(), value.trim());
            if key.is_empty() || value.is_empty() {
                return Err(Error::InvalidLabel(pair.to_owned()));
            }
            labels.insert(key, value);
        }
        Ok(labels)
    }
}

impl fmt::Display for Labels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pairs: Vec<String> = self
            .0
            .iter()
            .flat_map(|(k, values)| values.iter().map(move |v| format!("{k}={v}")))
            .collect();
        write!(f, "{}", pairs.join(","))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Labels {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut labels = Labels::new();
        for (k, v) in iter {
            labels.insert(k, v);
        }
        labels
    }
}

/// Why a feature or assessment was filtered out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Name does not match `--feature` / `--assess`.
    NameNotIncluded(String),
    /// Name matches `--skip-features` / `--skip-assessment`.
    NameExcluded(String),
    /// No label matches `--labels`.
    LabelsNotIncluded,
    /// A label matches `--skip-labels`.
    LabelsExcluded,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NameNotIncluded(pattern) => write!(f, "name does not match \"{pattern}\""),
            Self::NameExcluded(pattern) => write!(f, "name matches skip pattern \"{pattern}\""),
            Self::LabelsNotIncluded => write!(f, "no label matches the label filter"),
            Self::LabelsExcluded => write!(f, "a label matches the skip-label filter"),
        }
    }
}

/// Compiled include/exclude filters consulted before running a feature or
/// an assessment.
///
/// Unset filters match everything. Exclusions always win over inclusions.
#[derive(Debug, Clone, Default)]
pub struct Filters {
    feature: Option<Regex>,
    skip_feature: Option<Regex>,
    assessment: Option<Regex>,
    skip_assessment: Option<Regex>,
    labels: Labels,
    skip_labels: Labels,
}

fn compile(flag: &'static str, pattern: &str) -> Result<Option<Regex>> {
    if pattern.is_empty() {
        return Ok(None);
    }
    Regex::new(pattern)
        .map(Some)
        .map_err(|source| Error::InvalidPattern { flag, source })
}

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only run features whose name matches `pattern`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPattern`] if the pattern does not compile.
    pub fn with_feature_regex(mut self, pattern: &str) -> Result<Self> {
        self.feature = compile("feature", pattern)?;
        Ok(self)
    }

    /// Skip features whose name matches `pattern`.
    pub fn with_skip_feature_regex(mut self, pattern: &str) -> Result<Self> {
        self.skip_feature = compile("skip-features", pattern)?;
        Ok(self)
    }

    /// Only run assessments whose name matches `pattern`.
    pub fn with_assessment_regex(mut self, pattern: &str) -> Result<Self> {
        self.assessment = compile("assess", pattern)?;
        Ok(self)
    }

    /// Skip assessments whose name matches `pattern`.
    pub fn with_skip_assessment_regex(mut self, pattern: &str) -> Result<Self> {
        self.skip_assessment = compile("skip-assessment", pattern)?;
        Ok(self)
    }

    pub fn with_labels(mut self, labels: Labels) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_skip_labels(mut self, labels: Labels) -> Self {
        self.skip_labels = labels;
        self
    }

    pub fn feature_regex(&self) -> Option<&Regex> {
        self.feature.as_ref()
    }

    pub fn assessment_regex(&self) -> Option<&Regex> {
        self.assessment.as_ref()
    }

    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    pub fn skip_labels(&self) -> &Labels {
        &self.skip_labels
    }

    /// Decide whether a feature runs. `None` means it runs.
    pub fn feature_skip_reason(&self, name: &str, labels: &Labels) -> Option<SkipReason> {
        if let Some(skip) = &self.skip_feature
            && skip.is_match(name)
        {
            return Some(SkipReason::NameExcluded(skip.as_str().to_owned()));
        }
        if !self.skip_labels.is_empty() && self.skip_labels.intersects(labels) {
            return Some(SkipReason::LabelsExcluded);
        }
        if let Some(include) = &self.feature
            && !include.is_match(name)
        {
            return Some(SkipReason::NameNotIncluded(include.as_str().to_owned()));
        }
        if !self.labels.is_empty() && !self.labels.intersects(labels) {
            return Some(SkipReason::LabelsNotIncluded);
        }
        None
    }

    pub fn should_run_feature(&self, name: &str, labels: &Labels) -> bool {
        self.feature_skip_reason(name, labels).is_none()
    }

    /// Decide whether an assessment runs. `None` means it runs.
    pub fn assessment_skip_reason(&self, name: &str) -> Option<SkipReason> {
        if let Some(skip) = &self.skip_assessment
            && skip.is_match(name)
        {
            return Some(SkipReason::NameExcluded(skip.as_str().to_owned()));
        }
        if let Some(include) = &self.assessment
            && !include.is_match(name)
        {
            return Some(SkipReason::NameNotIncluded(include.as_str().to_owned()));
        }
        None
    }

    pub fn should_run_assessment(&self, name: &str) -> bool {
        self.assessment_skip_reason(name).is_none()
    }
}
