//! Cache keys: a model family plus the parameters it was requested with

use crate::error::{ModelError, ModelResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Model families with a built-in loader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    /// fastText language identification
    Fasttext,
    /// SentencePiece tokenizer
    Sentencepiece,
    /// KenLM statistical language model
    Kenlm,
    /// NLTK punkt sentence splitter
    Nltk,
    /// Pretrained transformer plus its input processor
    Huggingface,
    /// spaCy pipeline package
    Spacy,
    /// Generative diffusion pipeline
    Diffusion,
}

impl ModelFamily {
    pub const ALL: [ModelFamily; 7] = [
        Self::Fasttext,
        Self::Sentencepiece,
        Self::Kenlm,
        Self::Nltk,
        Self::Huggingface,
        Self::Spacy,
        Self::Diffusion,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fasttext => "fasttext",
            Self::Sentencepiece => "sentencepiece",
            Self::Kenlm => "kenlm",
            Self::Nltk => "nltk",
            Self::Huggingface => "huggingface",
            Self::Spacy => "spacy",
            Self::Diffusion => "diffusion",
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelFamily {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|family| family.as_str() == s)
            .ok_or_else(|| {
                let known: Vec<_> = Self::ALL.iter().map(|f| f.as_str()).collect();
                ModelError::invalid(format!(
                    "model family must be one of {:?} (got '{}')",
                    known, s
                ))
            })
    }
}

/// A single construction parameter
///
/// Floats are deliberately absent so the key stays `Eq + Hash`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl ParamValue {
    /// Parse a CLI-style value: booleans and integers first, then plain text
    pub fn parse(raw: &str) -> Self {
        if let Ok(b) = raw.parse::<bool>() {
            Self::Bool(b)
        } else if let Ok(i) = raw.parse::<i64>() {
            Self::Int(i)
        } else {
            Self::Str(raw.to_string())
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Str(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

/// Named parameters, ordered by name so equal bindings compare equal
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Params(BTreeMap<String, ParamValue>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Reject any parameter name outside `allowed`
    pub fn expect_only(&self, family: ModelFamily, allowed: &[&str]) -> ModelResult<()> {
        match self.0.keys().find(|k| !allowed.contains(&k.as_str())) {
            Some(unknown) => Err(ModelError::invalid(format!(
                "{} does not accept parameter '{}' (accepted: {:?})",
                family, unknown, allowed
            ))),
            None => Ok(()),
        }
    }

    /// String parameter, falling back to `default` when absent
    pub fn str_or(&self, name: &str, default: &str) -> ModelResult<String> {
        match self.0.get(name) {
            None => Ok(default.to_string()),
            Some(ParamValue::Str(s)) => Ok(s.clone()),
            Some(other) => Err(ModelError::invalid(format!(
                "parameter '{}' must be a string (got {})",
                name, other
            ))),
        }
    }

    /// Required string parameter
    pub fn required_str(&self, name: &str) -> ModelResult<String> {
        match self.0.get(name) {
            Some(ParamValue::Str(s)) => Ok(s.clone()),
            Some(other) => Err(ModelError::invalid(format!(
                "parameter '{}' must be a string (got {})",
                name, other
            ))),
            None => Err(ModelError::invalid(format!(
                "missing required parameter '{}'",
                name
            ))),
        }
    }

    /// Boolean parameter, falling back to `default` when absent
    pub fn bool_or(&self, name: &str, default: bool) -> ModelResult<bool> {
        match self.0.get(name) {
            None => Ok(default),
            Some(ParamValue::Bool(b)) => Ok(*b),
            Some(other) => Err(ModelError::invalid(format!(
                "parameter '{}' must be a boolean (got {})",
                name, other
            ))),
        }
    }
}

impl<K: Into<String>, V: Into<ParamValue>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Identity of one logical model instance
///
/// Equality and hashing are structural over family and parameters, so the key
/// can be rebuilt anywhere (another worker, another cache) and still address
/// the same model.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BoundConfiguration {
    pub family: ModelFamily,
    pub params: Params,
}

impl BoundConfiguration {
    pub fn new(family: ModelFamily, params: Params) -> Self {
        Self { family, params }
    }
}

impl fmt::Display for BoundConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.family)?;
        for (i, (name, value)) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name}={value}")?;
        }
        f.write_str(")")
    }
}
