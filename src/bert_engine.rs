use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use candle_core::utils::{cuda_is_available, metal_is_available};
use candle_core::{DType, Device, Tensor};
use candle_nn::ops::softmax;
use candle_nn::{Linear, Module, VarBuilder};
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use candle_transformers::models::debertav2::{
    Config as DebertaV2Config, DebertaV2SeqClassificationModel,
};
use hf_hub::{Repo, RepoType, api::tokio::Api};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokenizers::{Tokenizer, TruncationParams};

use crate::engine::{Classifier, ClassifierError};
use crate::types::{Label, ModelPrediction, Scores};

#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub model_id: Option<String>,
    pub model_path: Option<PathBuf>,
    pub revision: String,
    pub use_pth: bool,
    pub cpu: bool,
    pub max_sequence_length: usize,
    pub id2label: Option<HashMap<u32, String>>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_id: None,
            model_path: None,
            revision: "main".to_string(),
            use_pth: false,
            cpu: false,
            max_sequence_length: 512,
            id2label: None,
        }
    }
}

/// Fields of `config.json` read before picking an architecture.
#[derive(Debug, Default, Deserialize)]
struct ModelHeader {
    #[serde(default)]
    model_type: Option<String>,
    #[serde(default)]
    id2label: Option<HashMap<String, String>>,
}

enum Backbone {
    /// `BertForSequenceClassification` layout: encoder, tanh pooler, linear head.
    Bert {
        model: BertModel,
        pooler: Linear,
        classifier: Linear,
    },
    DebertaV2(DebertaV2SeqClassificationModel),
}

struct LoadedModel {
    backbone: Backbone,
    tokenizer: Tokenizer,
    device: Device,
    /// Output index -> label.
    labels: Vec<Label>,
}

/// Sequence classifier running a fine-tuned transformer on candle.
///
/// Forward passes run on the blocking pool. Bound them with
/// [`TimeoutClassifier`](crate::engine::TimeoutClassifier).
pub struct BertClassifier {
    inner: Arc<LoadedModel>,
}

impl BertClassifier {
    fn device(cpu: bool) -> Result<Device> {
        if cpu {
            Ok(Device::Cpu)
        } else if metal_is_available() {
            tracing::info!("Using metal acceleration");
            Ok(Device::new_metal(0)?)
        } else if cuda_is_available() {
            tracing::info!("Using CUDA GPU acceleration");
            Ok(Device::new_cuda(0)?)
        } else {
            tracing::info!(
                "CUDA not available, running on CPU. To run on GPU, build with `--features cuda`"
            );
            Ok(Device::Cpu)
        }
    }

    #[tracing::instrument(skip(config), fields(model_id = ?config.model_id, model_path = ?config.model_path, cpu = config.cpu))]
    pub async fn load(config: ModelConfig) -> Result<Self> {
        let device = Self::device(config.cpu)?;

        // Get files from either the HuggingFace API, or from a specified local directory
        let (config_filename, tokenizer_filename, weights_filename) = match &config.model_path {
            Some(base_path) => {
                if !base_path.is_dir() {
                    bail!("Model path {} is not a directory.", base_path.display());
                }

                let weights_file = if config.use_pth {
                    base_path.join("pytorch_model.bin")
                } else {
                    base_path.join("model.safetensors")
                };
                (
                    base_path.join("config.json"),
                    base_path.join("tokenizer.json"),
                    weights_file,
                )
            }
            None => {
                let Some(model_id) = config.model_id.clone() else {
                    bail!("Either --model-id or --model-path must be provided");
                };

                let repo = Repo::with_revision(model_id, RepoType::Model, config.revision.clone());
                let api = Api::new()?;
                let api = api.repo(repo);
                let config_file = api.get("config.json").await?;
                let tokenizer_file = api.get("tokenizer.json").await?;
                let weights_file = if config.use_pth {
                    api.get("pytorch_model.bin").await?
                } else {
                    api.get("model.safetensors").await?
                };
                (config_file, tokenizer_file, weights_file)
            }
        };

        let raw_config = std::fs::read_to_string(&config_filename)
            .with_context(|| format!("reading {}", config_filename.display()))?;
        let header: ModelHeader = serde_json::from_str(&raw_config)?;

        // Command-line id2label takes precedence, then the model config, then the
        // layout the classifier was trained with.
        let id2label = match (config.id2label, header.id2label) {
            (Some(id2label), _) => id2label,
            (None, Some(raw)) => raw
                .into_iter()
                .filter_map(|(id, label)| Some((id.parse().ok()?, label)))
                .collect(),
            (None, None) => default_id2label(),
        };
        let labels = resolve_labels(&id2label)?;

        let mut tokenizer = Tokenizer::from_file(&tokenizer_filename)
            .map_err(|e| anyhow::anyhow!("Tokenizer error: {e}"))?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: config.max_sequence_length,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("Tokenizer truncation error: {e}"))?;

        let model_type = header.model_type.unwrap_or_else(|| "bert".to_string());
        let backbone = match model_type.as_str() {
            "deberta-v2" => {
                let model_config: DebertaV2Config = serde_json::from_str(&raw_config)?;
                let vb = var_builder(
                    &weights_filename,
                    config.use_pth,
                    candle_transformers::models::debertav2::DTYPE,
                    &device,
                )?
                .set_prefix("deberta");
                Backbone::DebertaV2(DebertaV2SeqClassificationModel::load(
                    vb,
                    &model_config,
                    Some(id2label),
                )?)
            }
            "bert" => {
                let model_config: BertConfig = serde_json::from_str(&raw_config)?;
                let vb = var_builder(
                    &weights_filename,
                    config.use_pth,
                    candle_transformers::models::bert::DTYPE,
                    &device,
                )?;
                let hidden = model_config.hidden_size;
                let pooler = candle_nn::linear(hidden, hidden, vb.pp("bert.pooler.dense"))
                    .context("loading bert.pooler.dense")?;
                let classifier = candle_nn::linear(hidden, labels.len(), vb.pp("classifier"))
                    .context("loading classifier head")?;
                let model = BertModel::load(vb.pp("bert"), &model_config)
                    .context("loading BERT encoder")?;
                Backbone::Bert {
                    model,
                    pooler,
                    classifier,
                }
            }
            other => bail!("Unsupported model_type {other:?}; expected \"bert\" or \"deberta-v2\""),
        };

        tracing::info!(%model_type, labels = ?labels, "Classifier ready");

        Ok(Self {
            inner: Arc::new(LoadedModel {
                backbone,
                tokenizer,
                device,
                labels,
            }),
        })
    }
}

fn var_builder(
    weights: &Path,
    use_pth: bool,
    dtype: DType,
    device: &Device,
) -> Result<VarBuilder<'static>> {
    if use_pth {
        Ok(VarBuilder::from_pth(weights, dtype, device)?)
    } else {
        // SAFETY: the weights file is memory-mapped and must not change while loaded.
        Ok(unsafe { VarBuilder::from_mmaped_safetensors(&[weights], dtype, device)? })
    }
}

fn default_id2label() -> HashMap<u32, String> {
    HashMap::from([
        (0, Label::Improdutivo.to_string()),
        (1, Label::Produtivo.to_string()),
    ])
}

/// Orders the model outputs by index and checks both labels are present.
fn resolve_labels(id2label: &HashMap<u32, String>) -> Result<Vec<Label>> {
    if id2label.len() != 2 {
        bail!(
            "Expected exactly 2 labels in id2label, found {}",
            id2label.len()
        );
    }
    let mut labels = Vec::with_capacity(2);
    for index in 0..2u32 {
        let raw = id2label
            .get(&index)
            .with_context(|| format!("id2label has no entry for index {index}"))?;
        let label = Label::from_model_label(raw)
            .with_context(|| format!("Unrecognized label {raw:?} at index {index}"))?;
        labels.push(label);
    }
    if labels[0] == labels[1] {
        bail!("id2label maps both outputs to {}", labels[0]);
    }
    Ok(labels)
}

impl LoadedModel {
    fn predict(&self, text: &str) -> Result<Scores> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| anyhow::anyhow!("Tokenization error: {e}"))?;

        let input_ids = Tensor::new(encoding.get_ids(), &self.device)?.unsqueeze(0)?;
        let attention_mask = Tensor::new(encoding.get_attention_mask(), &self.device)?.unsqueeze(0)?;
        let token_type_ids = Tensor::new(encoding.get_type_ids(), &self.device)?.unsqueeze(0)?;

        let logits = match &self.backbone {
            Backbone::Bert {
                model,
                pooler,
                classifier,
            } => {
                let hidden = model.forward(&input_ids, &token_type_ids, Some(&attention_mask))?;
                let cls = hidden.narrow(1, 0, 1)?.squeeze(1)?;
                let pooled = pooler.forward(&cls)?.tanh()?;
                classifier.forward(&pooled)?
            }
            Backbone::DebertaV2(model) => {
                model.forward(&input_ids, Some(token_type_ids), Some(attention_mask))?
            }
        };

        let probs = softmax(&logits, 1)?.squeeze(0)?.to_vec1::<f32>()?;
        scores_from_probs(&self.labels, &probs)
    }
}

fn scores_from_probs(labels: &[Label], probs: &[f32]) -> Result<Scores> {
    if probs.len() != labels.len() {
        bail!(
            "Model returned {} classes, expected {}",
            probs.len(),
            labels.len()
        );
    }
    let mut produtivo = 0.0;
    let mut improdutivo = 0.0;
    for (label, &p) in labels.iter().zip(probs) {
        match label {
            Label::Produtivo => produtivo = p as f64,
            Label::Improdutivo => improdutivo = p as f64,
        }
    }
    Ok(Scores::normalized(produtivo, improdutivo))
}

#[async_trait]
impl Classifier for BertClassifier {
    #[tracing::instrument(skip(self, text), fields(chars = text.chars().count()))]
    async fn classify(&self, text: &str) -> Result<ModelPrediction, ClassifierError> {
        let inner = self.inner.clone();
        let text = text.to_string();
        let scores = tokio::task::spawn_blocking(move || inner.predict(&text))
            .await
            .map_err(|e| ClassifierError::Inference(e.to_string()))?
            .map_err(|e| ClassifierError::Inference(format!("{e:#}")))?;

        let prediction = ModelPrediction::from_scores(scores);
        tracing::debug!(
            label = %prediction.label,
            confidence = prediction.confidence,
            "Model prediction"
        );
        Ok(prediction)
    }
}
