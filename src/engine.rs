use async_trait::async_trait;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::OnceCell;

use crate::types::ModelPrediction;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ClassifierError {
    #[error("model unavailable: {0}")]
    Unavailable(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("inference timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelStatus {
    NotLoaded,
    Ready,
    Failed(String),
}

impl ModelStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, ModelStatus::Ready)
    }
}

impl fmt::Display for ModelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelStatus::NotLoaded => f.write_str("not_loaded"),
            ModelStatus::Ready => f.write_str("ready"),
            ModelStatus::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, text: &str) -> Result<ModelPrediction, ClassifierError>;

    fn status(&self) -> ModelStatus {
        ModelStatus::Ready
    }
}

pub type ClassifierLoader =
    Box<dyn Fn() -> BoxFuture<'static, anyhow::Result<Arc<dyn Classifier>>> + Send + Sync>;

/// Loads the wrapped classifier on first use and reuses it afterwards.
///
/// Concurrent first callers share a single load. A failed load is remembered
/// and reported on every later call; it is not retried.
pub struct LazyClassifier {
    loader: ClassifierLoader,
    cell: OnceCell<Result<Arc<dyn Classifier>, String>>,
}

impl LazyClassifier {
    pub fn new(loader: ClassifierLoader) -> Self {
        Self {
            loader,
            cell: OnceCell::new(),
        }
    }

    async fn get(&self) -> &Result<Arc<dyn Classifier>, String> {
        self.cell
            .get_or_init(|| async {
                tracing::info!("Loading classifier model...");
                match (self.loader)().await {
                    Ok(classifier) => {
                        tracing::info!("Model loaded successfully");
                        Ok(classifier)
                    }
                    Err(err) => {
                        tracing::error!(error = %format!("{err:#}"), "Model failed to load");
                        Err(format!("{err:#}"))
                    }
                }
            })
            .await
    }

    pub async fn preload(&self) -> ModelStatus {
        let _ = self.get().await;
        self.status()
    }
}

#[async_trait]
impl Classifier for LazyClassifier {
    async fn classify(&self, text: &str) -> Result<ModelPrediction, ClassifierError> {
        match self.get().await {
            Ok(classifier) => classifier.classify(text).await,
            Err(reason) => Err(ClassifierError::Unavailable(reason.clone())),
        }
    }

    fn status(&self) -> ModelStatus {
        match self.cell.get() {
            None => ModelStatus::NotLoaded,
            Some(Ok(_)) => ModelStatus::Ready,
            Some(Err(reason)) => ModelStatus::Failed(reason.clone()),
        }
    }
}

/// Bounds every call of the wrapped classifier.
pub struct TimeoutClassifier {
    inner: Arc<dyn Classifier>,
    timeout: Duration,
}

impl TimeoutClassifier {
    pub fn new(inner: Arc<dyn Classifier>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl Classifier for TimeoutClassifier {
    async fn classify(&self, text: &str) -> Result<ModelPrediction, ClassifierError> {
        match tokio::time::timeout(self.timeout, self.inner.classify(text)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(timeout = ?self.timeout, "Inference timed out");
                Err(ClassifierError::Timeout(self.timeout))
            }
        }
    }

    fn status(&self) -> ModelStatus {
        self.inner.status()
    }
}
