//! Built-in loaders for the seven model families
//!
//! Mirror-hosted families (fasttext, sentencepiece, kenlm, nltk, spacy) resolve
//! their artifact through the [`ArtifactResolver`] and retry once against a
//! forced re-download when the file turns out to be unusable. Hub-hosted
//! families (huggingface, diffusion) fetch a snapshot through hf-hub unless
//! given an existing local directory.
//!
//! The loaders hand back handles describing the ready artifact; running the
//! model itself is up to the consumer.
//!
//! [`ArtifactResolver`]: crate::models::resolver::ArtifactResolver

use crate::error::{ModelError, ModelResult};
use crate::models::device::{Device, DevicePlaceable, DeviceSlot, LoadedModel, ModelComponent};
use crate::models::download::{SnapshotLayout, download_snapshot};
use crate::models::key::{ModelFamily, Params};
use crate::models::loader::{LoaderContext, ModelLoader};
use crate::models::metadata::{
    PipelineMetadata, ProcessorKind, TransformerMetadata, detect_processor, parse_pipeline_index,
    parse_transformer_config,
};
use crate::models::resolver::extract_archive;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// First four bytes of every fastText binary model (little-endian i32)
const FASTTEXT_MAGIC: i32 = 793_712_314;

// ============================================================================
// Mirror-hosted artifacts
// ============================================================================

/// A single-file or single-directory artifact ready for its runtime
#[derive(Debug, Clone)]
pub struct ArtifactModel {
    pub family: ModelFamily,
    pub model_name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
}

impl ModelComponent for ArtifactModel {
    fn kind(&self) -> &'static str {
        match self.family {
            ModelFamily::Fasttext => "language_identifier",
            ModelFamily::Sentencepiece => "tokenizer",
            ModelFamily::Kenlm => "language_model",
            ModelFamily::Nltk => "sentence_splitter",
            ModelFamily::Spacy => "nlp_pipeline",
            ModelFamily::Huggingface | ModelFamily::Diffusion => "artifact",
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Check that a downloaded file is readable and plausibly complete
async fn open_artifact(
    family: ModelFamily,
    model_name: &str,
    path: PathBuf,
) -> ModelResult<ArtifactModel> {
    let metadata = tokio::fs::metadata(&path)
        .await
        .map_err(|e| ModelError::corrupt(&path, format!("cannot stat: {}", e)))?;

    if !metadata.is_file() {
        return Err(ModelError::corrupt(&path, "not a regular file"));
    }
    if metadata.len() == 0 {
        return Err(ModelError::corrupt(&path, "file is empty"));
    }

    if family == ModelFamily::Fasttext {
        check_fasttext_header(&path).await?;
    }

    tracing::info!(
        family = %family,
        model_name = %model_name,
        path = ?path,
        size_bytes = metadata.len(),
        "Loaded model artifact"
    );

    Ok(ArtifactModel {
        family,
        model_name: model_name.to_string(),
        path,
        size_bytes: metadata.len(),
    })
}

async fn check_fasttext_header(path: &Path) -> ModelResult<()> {
    use tokio::io::AsyncReadExt;

    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| ModelError::corrupt(path, format!("cannot open: {}", e)))?;
    let mut header = [0u8; 4];
    file.read_exact(&mut header)
        .await
        .map_err(|_| ModelError::corrupt(path, "truncated fastText header"))?;

    if i32::from_le_bytes(header) != FASTTEXT_MAGIC {
        return Err(ModelError::corrupt(path, "not a fastText binary model"));
    }
    Ok(())
}

/// Substitute the first `{}` in a name pattern
fn render_name(pattern: &str, value: &str) -> String {
    pattern.replacen("{}", value, 1)
}

/// fastText language identification model
#[derive(Debug, Default)]
pub struct FastTextLoader;

#[async_trait]
impl ModelLoader for FastTextLoader {
    async fn load(&self, params: &Params, ctx: &LoaderContext) -> ModelResult<LoadedModel> {
        params.expect_only(ModelFamily::Fasttext, &["model_name"])?;
        let model_name = params.str_or("model_name", "lid.176.bin")?;

        tracing::info!(model_name = %model_name, "Loading fasttext language identification model");
        let model = ctx
            .resolver
            .load_with_forced_retry(&model_name, |path, _| {
                open_artifact(ModelFamily::Fasttext, &model_name, path)
            })
            .await?;
        Ok(LoadedModel::single(model))
    }
}

/// Per-language artifact named by a `{}` pattern (sentencepiece, kenlm)
#[derive(Debug)]
pub struct LanguageArtifactLoader {
    family: ModelFamily,
    default_pattern: &'static str,
}

impl LanguageArtifactLoader {
    pub fn sentencepiece() -> Self {
        Self {
            family: ModelFamily::Sentencepiece,
            default_pattern: "{}.sp.model",
        }
    }

    pub fn kenlm() -> Self {
        Self {
            family: ModelFamily::Kenlm,
            default_pattern: "{}.arpa.bin",
        }
    }
}

#[async_trait]
impl ModelLoader for LanguageArtifactLoader {
    async fn load(&self, params: &Params, ctx: &LoaderContext) -> ModelResult<LoadedModel> {
        params.expect_only(self.family, &["lang", "name_pattern"])?;
        let lang = params.required_str("lang")?;
        let pattern = params.str_or("name_pattern", self.default_pattern)?;
        let model_name = render_name(&pattern, &lang);

        tracing::info!(family = %self.family, model_name = %model_name, "Loading model");
        let model = ctx
            .resolver
            .load_with_forced_retry(&model_name, |path, _| {
                open_artifact(self.family, &model_name, path)
            })
            .await?;
        Ok(LoadedModel::single(model))
    }
}

/// NLTK punkt sentence splitter
#[derive(Debug, Default)]
pub struct NltkLoader;

impl NltkLoader {
    /// Punkt models are named by the full language name
    fn punkt_language(lang: &str) -> ModelResult<&'static str> {
        match lang {
            "en" => Ok("english"),
            "fr" => Ok("french"),
            "pt" => Ok("portuguese"),
            "es" => Ok("spanish"),
            other => Err(ModelError::invalid(format!(
                "nltk lang must be one of [\"en\", \"fr\", \"pt\", \"es\"] (got '{}')",
                other
            ))),
        }
    }
}

#[async_trait]
impl ModelLoader for NltkLoader {
    async fn load(&self, params: &Params, ctx: &LoaderContext) -> ModelResult<LoadedModel> {
        params.expect_only(ModelFamily::Nltk, &["lang", "name_pattern"])?;
        let lang = params.required_str("lang")?;
        let pattern = params.str_or("name_pattern", "punkt.{}.pickle")?;
        let model_name = render_name(&pattern, Self::punkt_language(&lang)?);

        tracing::info!(model_name = %model_name, "Loading nltk punkt split model");
        let model = ctx
            .resolver
            .load_with_forced_retry(&model_name, |path, _| {
                open_artifact(ModelFamily::Nltk, &model_name, path)
            })
            .await?;
        Ok(LoadedModel::single(model))
    }
}

/// spaCy pipeline package, distributed as a zip archive
#[derive(Debug, Default)]
pub struct SpacyLoader;

#[async_trait]
impl ModelLoader for SpacyLoader {
    async fn load(&self, params: &Params, ctx: &LoaderContext) -> ModelResult<LoadedModel> {
        params.expect_only(ModelFamily::Spacy, &["lang", "name_pattern"])?;
        let lang = params.required_str("lang")?;
        if lang != "zh" && lang != "en" {
            return Err(ModelError::invalid(format!(
                "spacy lang must be one of [\"zh\", \"en\"] (got '{}')",
                lang
            )));
        }
        let pattern = params.str_or("name_pattern", "{}_core_web_md-3.5.0")?;
        let model_name = render_name(&pattern, &lang);
        let archive_name = format!("{}.zip", model_name);

        tracing::info!(model_name = %model_name, "Loading spacy model");
        let model = ctx
            .resolver
            .load_with_forced_retry(&archive_name, |archive, forced| {
                let model_name = model_name.clone();
                async move {
                    let dir = extract_archive(&archive, forced).await?;
                    let size_bytes = crate::models::cache::dir_size(&dir);
                    if size_bytes == 0 {
                        return Err(ModelError::corrupt(&dir, "extracted package is empty"));
                    }
                    Ok(ArtifactModel {
                        family: ModelFamily::Spacy,
                        model_name,
                        path: dir,
                        size_bytes,
                    })
                }
            })
            .await?;
        Ok(LoadedModel::single(model))
    }
}

// ============================================================================
// Hub-hosted snapshots
// ============================================================================

/// Use an existing local directory, otherwise fetch the snapshot from the hub
async fn locate_snapshot(
    name_or_path: &str,
    revision: Option<&str>,
    layout: SnapshotLayout,
    ctx: &LoaderContext,
) -> ModelResult<PathBuf> {
    let local = Path::new(name_or_path);
    if local.is_dir() {
        return Ok(local.to_path_buf());
    }

    download_snapshot(name_or_path, revision, ctx.hf_cache_dir.clone(), layout)
        .await
        .map_err(|e| ModelError::Hub {
            model_id: name_or_path.to_string(),
            reason: format!("{:#}", e),
        })
}

/// Pretrained transformer weights
#[derive(Debug)]
pub struct TransformerModel {
    pub model_id: String,
    pub path: PathBuf,
    pub metadata: TransformerMetadata,
    pub trust_remote_code: bool,
    device: DeviceSlot,
}

impl DevicePlaceable for TransformerModel {
    fn device(&self) -> Device {
        self.device.get()
    }

    fn to_device(&self, device: Device) {
        self.device.set(device);
    }
}

impl ModelComponent for TransformerModel {
    fn kind(&self) -> &'static str {
        "transformer"
    }

    fn as_placeable(&self) -> Option<&dyn DevicePlaceable> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Input processor matching a transformer (host-side, never placed)
#[derive(Debug, Clone)]
pub struct Processor {
    pub kind: ProcessorKind,
    pub path: PathBuf,
    pub trust_remote_code: bool,
}

impl ModelComponent for Processor {
    fn kind(&self) -> &'static str {
        match self.kind {
            ProcessorKind::Processor => "processor",
            ProcessorKind::ImageProcessor => "image_processor",
            ProcessorKind::Tokenizer => "tokenizer",
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// General pretrained transformer with its processor
///
/// Yields `(model, processor)` when `return_model` is true (or just the model
/// if the snapshot ships no processor), and the processor alone otherwise. A
/// processor-only request against a snapshot without one yields no components.
#[derive(Debug, Default)]
pub struct HuggingFaceLoader;

#[async_trait]
impl ModelLoader for HuggingFaceLoader {
    async fn load(&self, params: &Params, ctx: &LoaderContext) -> ModelResult<LoadedModel> {
        params.expect_only(
            ModelFamily::Huggingface,
            &[
                "pretrained_model_name_or_path",
                "return_model",
                "trust_remote_code",
            ],
        )?;
        let model_id = params.required_str("pretrained_model_name_or_path")?;
        let return_model = params.bool_or("return_model", true)?;
        let trust_remote_code = params.bool_or("trust_remote_code", false)?;

        let path = locate_snapshot(&model_id, None, SnapshotLayout::Transformer, ctx).await?;
        let metadata = parse_transformer_config(&path)?;

        let processor = detect_processor(&path).map(|kind| Processor {
            kind,
            path: path.clone(),
            trust_remote_code,
        });

        tracing::info!(
            model_id = %model_id,
            architecture = ?metadata.architecture(),
            model_type = ?metadata.model_type,
            processor = ?processor.as_ref().map(|p| p.kind),
            "Loaded huggingface snapshot"
        );

        if !return_model {
            // No processor in the snapshot is an empty result, not an error
            return Ok(match processor {
                Some(processor) => LoadedModel::single(processor),
                None => LoadedModel::Tuple(Vec::new()),
            });
        }

        if metadata.architecture().is_none() {
            return Err(ModelError::invalid(format!(
                "config.json of {} declares no architectures",
                model_id
            )));
        }

        let model = TransformerModel {
            model_id,
            path,
            metadata,
            trust_remote_code,
            device: DeviceSlot::default(),
        };

        Ok(match processor {
            Some(processor) => LoadedModel::Tuple(vec![
                Box::new(model) as Box<dyn ModelComponent>,
                Box::new(processor),
            ]),
            None => LoadedModel::single(model),
        })
    }
}

/// Task a diffusion pipeline is built for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffusionType {
    Image2image,
    Text2image,
    Inpainting,
}

impl FromStr for DiffusionType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image2image" => Ok(Self::Image2image),
            "text2image" => Ok(Self::Text2image),
            "inpainting" => Ok(Self::Inpainting),
            other => Err(ModelError::invalid(format!(
                "Not support {} diffusion_type for diffusion model. Can only be one of [\"image2image\", \"text2image\", \"inpainting\"]",
                other
            ))),
        }
    }
}

/// Floating point precision of pipeline weights
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Precision {
    Fp32,
    Fp16,
}

impl Precision {
    /// Hub revision holding weights of this precision
    pub fn revision(&self) -> &'static str {
        match self {
            Self::Fp32 => "fp32",
            Self::Fp16 => "fp16",
        }
    }
}

impl FromStr for Precision {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fp32" => Ok(Self::Fp32),
            "fp16" => Ok(Self::Fp16),
            other => Err(ModelError::invalid(format!(
                "Not support {} floating_point for diffusion model. Can only be one of [\"fp32\", \"fp16\"]",
                other
            ))),
        }
    }
}

/// Generative diffusion pipeline
#[derive(Debug)]
pub struct DiffusionPipeline {
    pub model_id: String,
    pub diffusion_type: DiffusionType,
    pub precision: Precision,
    pub path: PathBuf,
    pub metadata: PipelineMetadata,
    device: DeviceSlot,
}

impl DevicePlaceable for DiffusionPipeline {
    fn device(&self) -> Device {
        self.device.get()
    }

    fn to_device(&self, device: Device) {
        self.device.set(device);
    }
}

impl ModelComponent for DiffusionPipeline {
    fn kind(&self) -> &'static str {
        "diffusion_pipeline"
    }

    fn as_placeable(&self) -> Option<&dyn DevicePlaceable> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Default)]
pub struct DiffusionLoader;

impl DiffusionLoader {
    /// Validate parameters before touching the network
    fn parse_params(params: &Params, accelerator: bool) -> ModelResult<(String, DiffusionType, Precision)> {
        params.expect_only(
            ModelFamily::Diffusion,
            &[
                "pretrained_model_name_or_path",
                "diffusion_type",
                "floating_point",
            ],
        )?;
        let model_id = params.required_str("pretrained_model_name_or_path")?;
        let diffusion_type: DiffusionType = params.required_str("diffusion_type")?.parse()?;
        let precision: Precision = params.str_or("floating_point", "fp32")?.parse()?;

        if !accelerator && precision == Precision::Fp16 {
            return Err(ModelError::invalid(
                "In cpu mode, only fp32 floating_point can be used for diffusion model",
            ));
        }

        Ok((model_id, diffusion_type, precision))
    }
}

#[async_trait]
impl ModelLoader for DiffusionLoader {
    async fn load(&self, params: &Params, ctx: &LoaderContext) -> ModelResult<LoadedModel> {
        let (model_id, diffusion_type, precision) = Self::parse_params(params, ctx.accelerator)?;

        let path = locate_snapshot(
            &model_id,
            Some(precision.revision()),
            SnapshotLayout::Pipeline,
            ctx,
        )
        .await?;
        let metadata = parse_pipeline_index(&path)?;

        tracing::info!(
            model_id = %model_id,
            diffusion_type = ?diffusion_type,
            precision = ?precision,
            pipeline = %metadata.class_name,
            "Loaded diffusion pipeline"
        );

        Ok(LoadedModel::single(DiffusionPipeline {
            model_id,
            diffusion_type,
            precision,
            path,
            metadata,
            device: DeviceSlot::default(),
        }))
    }
}
