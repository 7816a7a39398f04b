//! Snapshot metadata parsing
//!
//! Reads the JSON descriptors that ship with hub snapshots: `config.json` for
//! single transformers and `model_index.json` for diffusion pipelines.

use crate::error::{ModelError, ModelResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Transformer metadata extracted from config.json
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct TransformerMetadata {
    /// Model class names; the first one is instantiated
    #[serde(default)]
    pub architectures: Vec<String>,

    /// Model architecture type (e.g., "bert", "clip", "whisper")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_type: Option<String>,

    /// Hidden size / embedding dimension
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hidden_size: Option<u32>,

    /// Vocabulary size
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vocab_size: Option<u32>,
}

impl TransformerMetadata {
    /// Class to instantiate
    pub fn architecture(&self) -> Option<&str> {
        self.architectures.first().map(String::as_str)
    }
}

/// Raw config.json structure (partial)
#[derive(Debug, Deserialize)]
struct RawConfig {
    architectures: Option<Vec<String>>,
    model_type: Option<String>,
    hidden_size: Option<u32>,
    vocab_size: Option<u32>,
    // Some models use different names
    d_model: Option<u32>,
}

/// Parse transformer metadata from a snapshot's config.json
pub fn parse_transformer_config(snapshot: &Path) -> ModelResult<TransformerMetadata> {
    let raw: RawConfig = read_json(&snapshot.join("config.json"))?;

    Ok(TransformerMetadata {
        architectures: raw.architectures.unwrap_or_default(),
        model_type: raw.model_type,
        hidden_size: raw.hidden_size.or(raw.d_model),
        vocab_size: raw.vocab_size,
    })
}

/// Pipeline metadata extracted from model_index.json
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PipelineMetadata {
    /// Pipeline class (e.g., "StableDiffusionPipeline")
    pub class_name: String,
    /// Component name to (library, class), e.g. unet -> (diffusers, UNet2DConditionModel)
    pub components: BTreeMap<String, (String, String)>,
}

/// Parse pipeline metadata from a snapshot's model_index.json
pub fn parse_pipeline_index(snapshot: &Path) -> ModelResult<PipelineMetadata> {
    let path = snapshot.join("model_index.json");
    let raw: serde_json::Map<String, serde_json::Value> = read_json(&path)?;

    let class_name = raw
        .get("_class_name")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ModelError::corrupt(&path, "missing _class_name"))?
        .to_string();

    // Entries like "unet": ["diffusers", "UNet2DConditionModel"]; null pairs mark
    // optional components that are absent
    let components = raw
        .iter()
        .filter(|(key, _)| !key.starts_with('_'))
        .filter_map(|(key, value)| {
            let pair = value.as_array()?;
            let library = pair.first()?.as_str()?;
            let class = pair.get(1)?.as_str()?;
            Some((key.clone(), (library.to_string(), class.to_string())))
        })
        .collect();

    Ok(PipelineMetadata {
        class_name,
        components,
    })
}

/// Input processor shipped alongside a transformer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessorKind {
    /// Multi-modal processor (processor_config.json)
    Processor,
    /// Image preprocessor (preprocessor_config.json)
    ImageProcessor,
    /// Text tokenizer (tokenizer.json / tokenizer_config.json / vocab.txt)
    Tokenizer,
}

/// Pick the processor kind from the files present in a snapshot
///
/// Checked in order: processor, image processor, tokenizer.
pub fn detect_processor(snapshot: &Path) -> Option<ProcessorKind> {
    if snapshot.join("processor_config.json").exists() {
        Some(ProcessorKind::Processor)
    } else if snapshot.join("preprocessor_config.json").exists() {
        Some(ProcessorKind::ImageProcessor)
    } else if ["tokenizer.json", "tokenizer_config.json", "vocab.txt"]
        .iter()
        .any(|f| snapshot.join(f).exists())
    {
        Some(ProcessorKind::Tokenizer)
    } else {
        None
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> ModelResult<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ModelError::corrupt(path, format!("cannot read: {}", e)))?;
    serde_json::from_str(&content).map_err(|e| ModelError::corrupt(path, e))
}
