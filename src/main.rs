mod bert_engine;
mod config;
mod correction;
mod engine;
mod history;
mod language;
mod pipeline;
mod reply;
mod types;
mod upload;

use axum::{
    Router,
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use axum_prometheus::PrometheusMetricLayer;
use clap::Parser;
use futures::FutureExt;
use metrics::counter;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use bert_engine::{BertClassifier, ModelConfig};
use config::Config;
use correction::KeywordCorrector;
use engine::{Classifier, LazyClassifier, TimeoutClassifier};
use history::{HistoryEntry, HistoryLog};
use language::{
    DisabledTranslator, GoogleTranslator, LanguageNormalizer, NormalizerConfig, Translator,
    WhatlangDetector,
};
use pipeline::Pipeline;
use reply::ReplySelector;
use types::{
    BatchClassifyRequest, BatchClassifyResponse, ClassifyAndReplyResponse, ClassifyRequest,
    ErrorResponse, HealthResponse, Tone,
};
use upload::UploadError;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,email_triage=debug".into());
    if config.log_json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        host = %config.host,
        port = config.port,
        model_id = ?config.model_id,
        model_path = ?config.model_path,
        target_language = %config.target_language,
        translation = config.translate_api_key.is_some(),
        history = ?config.history_file,
        "Starting email triage server"
    );

    let model_config = ModelConfig::from(&config);
    let inference_timeout = config.inference_timeout();
    let classifier = Arc::new(LazyClassifier::new(Box::new(move || {
        let model_config = model_config.clone();
        async move {
            let classifier = BertClassifier::load(model_config).await?;
            Ok(Arc::new(TimeoutClassifier::new(Arc::new(classifier), inference_timeout))
                as Arc<dyn Classifier>)
        }
        .boxed()
    })));

    if config.preload_model {
        let status = classifier.preload().await;
        if !status.is_ready() {
            tracing::warn!(%status, "Model preload failed, requests will be answered with category Erro");
        }
    }

    let translator: Arc<dyn Translator> = match &config.translate_api_key {
        Some(key) => Arc::new(GoogleTranslator::new(
            config.translate_url.clone(),
            key.clone(),
            Duration::from_secs(config.translation_timeout_secs),
            config.translation_cache_size,
        )?),
        None => {
            tracing::warn!("No translation API key configured, non-Portuguese emails are classified as-is");
            Arc::new(DisabledTranslator)
        }
    };

    let normalizer = LanguageNormalizer::new(
        Arc::new(WhatlangDetector),
        translator,
        NormalizerConfig::from(&config),
    );
    let pipeline = Pipeline::new(
        normalizer,
        classifier,
        KeywordCorrector::default(),
        ReplySelector::new(config.reply_signature.clone()),
    )
    .with_back_translation(config.back_translate);

    let history = config.history_file.clone().map(HistoryLog::new).map(Arc::new);
    if let Some(history) = &history {
        tracing::info!(path = %history.path().display(), "Recording classification history");
    }
    let state = AppState::new(Arc::new(pipeline), history);

    let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();

    let app = app(state, config.max_upload_bytes)
        .route("/metrics", get(|| async move { metric_handle.render() }))
        .layer(prometheus_layer)
        .layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(&config.server_address()).await?;
    tracing::info!("Server running on http://{}", config.server_address());

    axum::serve(listener, app).await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    pipeline: Arc<Pipeline>,
    history: Option<Arc<HistoryLog>>,
    started: Instant,
}

impl AppState {
    fn new(pipeline: Arc<Pipeline>, history: Option<Arc<HistoryLog>>) -> Self {
        Self {
            pipeline,
            history,
            started: Instant::now(),
        }
    }
}

fn app(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/classify_and_reply", post(classify_and_reply_handler))
        .route("/classify_and_reply/batch", post(classify_batch_handler))
        .route("/classify_file", post(classify_file_handler))
        .route("/health", get(health_handler))
        .route("/history", get(history_handler))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}

enum AppError {
    Upload(UploadError),
    BadRequest(String),
    NotFound(String),
    Internal(anyhow::Error),
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        AppError::Upload(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Upload(err @ UploadError::UnsupportedFileType(_)) => {
                (StatusCode::UNSUPPORTED_MEDIA_TYPE, err.to_string())
            }
            AppError::Upload(err) => (StatusCode::UNPROCESSABLE_ENTITY, err.to_string()),
            AppError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            AppError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            AppError::Internal(err) => {
                tracing::error!(error = %format!("{err:#}"), "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

async fn triage(state: &AppState, text: &str, tone: Option<&str>) -> ClassifyAndReplyResponse {
    let tone = tone.map(Tone::parse).unwrap_or_default();
    let triage = state.pipeline.classify_and_reply(text, tone).await;

    if let Some(history) = state.history.clone() {
        let entry = HistoryEntry::new(text, &triage.result);
        let _ = tokio::task::spawn_blocking(move || history.record(&entry)).await;
    }

    ClassifyAndReplyResponse::new(triage.result, triage.reply, triage.subtype)
}

#[tracing::instrument(skip(state, request), fields(chars = request.text.chars().count()))]
async fn classify_and_reply_handler(
    State(state): State<AppState>,
    Json(request): Json<ClassifyRequest>,
) -> Json<ClassifyAndReplyResponse> {
    counter!("classification_requests_total").increment(1);
    Json(triage(&state, &request.text, request.tone.as_deref()).await)
}

#[tracing::instrument(skip(state, request), fields(emails = request.emails.len()))]
async fn classify_batch_handler(
    State(state): State<AppState>,
    Json(request): Json<BatchClassifyRequest>,
) -> Json<BatchClassifyResponse> {
    counter!("classification_requests_total").increment(1);

    let default_tone = request.tone.as_deref();
    let futures = request.emails.iter().map(|email| {
        let tone = email.tone.as_deref().or(default_tone);
        triage(&state, &email.text, tone)
    });
    let results = futures::future::join_all(futures).await;

    tracing::info!(total = results.len(), "Batch classification completed");
    Json(BatchClassifyResponse {
        total_processed: results.len(),
        results,
    })
}

#[tracing::instrument(skip(state, multipart))]
async fn classify_file_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ClassifyAndReplyResponse>, AppError> {
    counter!("classification_requests_total").increment(1);

    let mut file: Option<(String, Vec<u8>)> = None;
    let mut tone: Option<String> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("file") => {
                let name = field.file_name().unwrap_or_default().to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?;
                file = Some((name, bytes.to_vec()));
            }
            Some("tone") => {
                tone = Some(field.text().await.map_err(|e| AppError::BadRequest(e.to_string()))?);
            }
            _ => {}
        }
    }

    let Some((name, bytes)) = file else {
        return Err(AppError::BadRequest("missing multipart field 'file'".to_string()));
    };
    tracing::debug!(file_name = %name, bytes = bytes.len(), "Received upload");

    let text = tokio::task::spawn_blocking(move || upload::extract_text(&name, &bytes))
        .await
        .map_err(|e| AppError::Internal(e.into()))??;

    Ok(Json(triage(&state, &text, tone.as_deref()).await))
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let model_status = state.pipeline.model_status();
    Json(HealthResponse {
        status: "ok",
        model_loaded: model_status.is_ready(),
        model_status: model_status.to_string(),
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started.elapsed().as_secs_f64(),
    })
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

async fn history_handler(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<HistoryEntry>>, AppError> {
    let Some(history) = state.history.clone() else {
        return Err(AppError::NotFound("history is disabled".to_string()));
    };
    let limit = query.limit.unwrap_or(20);
    let entries = tokio::task::spawn_blocking(move || history.recent(limit))
        .await
        .map_err(|e| AppError::Internal(e.into()))?
        .map_err(AppError::Internal)?;
    Ok(Json(entries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, header};
    use engine::tests::{FixedClassifier, UnavailableClassifier};
    use http_body_util::BodyExt;
    use language::tests::FixedDetector;
    use serde_json::{Value, json};
    use tower::ServiceExt;
    use types::Label;

    fn state_with(classifier: Arc<dyn Classifier>, history: Option<Arc<HistoryLog>>) -> AppState {
        let normalizer = LanguageNormalizer::new(
            Arc::new(FixedDetector("pt")),
            Arc::new(DisabledTranslator),
            NormalizerConfig::default(),
        );
        let pipeline = Pipeline::new(
            normalizer,
            classifier,
            KeywordCorrector::default(),
            ReplySelector::default(),
        );
        AppState::new(Arc::new(pipeline), history)
    }

    fn router(classifier: Arc<dyn Classifier>) -> Router {
        app(state_with(classifier, None), 1024 * 1024)
    }

    async fn json_body(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn multipart(file_name: &str, content: &[u8], tone: Option<&str>) -> Request<Body> {
        let boundary = "triage-boundary";
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(content);
        body.extend_from_slice(b"\r\n");
        if let Some(tone) = tone {
            body.extend_from_slice(
                format!("--{boundary}\r\nContent-Disposition: form-data; name=\"tone\"\r\n\r\n{tone}\r\n")
                    .as_bytes(),
            );
        }
        body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());

        Request::post("/classify_file")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn classify_and_reply_returns_flat_response() {
        let response = router(Arc::new(FixedClassifier::new(Label::Produtivo, 0.9)))
            .oneshot(post_json(
                "/classify_and_reply",
                json!({ "text": "Feliz Natal e boas festas a todos!", "tone": "formal" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["category"], "Improdutivo");
        assert_eq!(body["model_category"], "Produtivo");
        assert_eq!(body["correction_applied"], true);
        assert_eq!(body["reply_confidence"], 0.95);
        assert!(body["reply"].as_str().unwrap().starts_with("Exmo(a)."));
        assert!(body["scores"]["Produtivo"].is_number());
        assert!(body["id"].as_str().unwrap().starts_with("classify-"));
    }

    #[tokio::test]
    async fn batch_triages_every_email_in_order() {
        let response = router(Arc::new(FixedClassifier::new(Label::Produtivo, 0.7)))
            .oneshot(post_json(
                "/classify_and_reply/batch",
                json!({
                    "tone": "formal",
                    "emails": [
                        { "text": "Há um erro crítico no sistema, preciso de suporte urgente." },
                        { "text": "   " },
                        { "content": "Feliz aniversário! Muitas felicidades!", "tone": "amigável" }
                    ]
                }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["total_processed"], 3);
        let results = body["results"].as_array().unwrap();
        assert_eq!(results.len(), 3);

        assert_eq!(results[0]["category"], "Produtivo");
        assert_eq!(results[0]["intent"], "urgent_problem");
        assert_eq!(results[0]["response_type"], "urgent_action");
        assert!(results[0]["reply"].as_str().unwrap().starts_with("Exmo(a)."));

        assert_eq!(results[1]["category"], "Improdutivo");
        assert_eq!(results[1]["confidence"], 0.0);
        assert_eq!(results[1]["reply"], "");
        assert!(results[1]["intent"].is_null());

        assert_eq!(results[2]["category"], "Improdutivo");
        assert_eq!(results[2]["intent"], "birthday");
        assert!(results[2]["reply"].as_str().unwrap().starts_with("Olá!"));
    }

    #[tokio::test]
    async fn content_is_accepted_as_text_alias() {
        let response = router(Arc::new(FixedClassifier::new(Label::Produtivo, 0.8)))
            .oneshot(post_json(
                "/classify_and_reply",
                json!({ "content": "Preciso do orçamento do projeto até sexta." }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["category"], "Produtivo");
        assert!(body["reply"].as_str().unwrap().starts_with("Prezado(a),"));
    }

    #[tokio::test]
    async fn model_failure_is_reported_in_body() {
        let response = router(Arc::new(UnavailableClassifier))
            .oneshot(post_json("/classify_and_reply", json!({ "text": "Preciso de suporte." })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["category"], "Erro");
        assert_eq!(body["confidence"], 0.0);
        assert_eq!(body["reply_confidence"], 0.0);
    }

    #[tokio::test]
    async fn text_upload_is_classified() {
        let response = router(Arc::new(FixedClassifier::new(Label::Improdutivo, 0.6)))
            .oneshot(multipart(
                "email.txt",
                "Há um erro crítico no sistema de pagamento.".as_bytes(),
                Some("amigável"),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["category"], "Produtivo");
        assert!(body["reply"].as_str().unwrap().starts_with("Olá!"));
    }

    #[tokio::test]
    async fn unsupported_upload_is_rejected() {
        let response = router(Arc::new(FixedClassifier::new(Label::Produtivo, 0.9)))
            .oneshot(multipart("planilha.xlsx", b"binary", None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        let body = json_body(response).await;
        assert!(body["error"].as_str().unwrap().contains("xlsx"));
    }

    #[tokio::test]
    async fn empty_upload_is_unprocessable() {
        let response = router(Arc::new(FixedClassifier::new(Label::Produtivo, 0.9)))
            .oneshot(multipart("vazio.txt", b"   ", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn health_reports_model_status() {
        let response = router(Arc::new(UnavailableClassifier))
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["model_loaded"], false);
        assert!(body["model_status"].as_str().unwrap().starts_with("failed"));
    }

    #[tokio::test]
    async fn history_records_classifications() {
        let dir = tempfile::tempdir().unwrap();
        let history = Arc::new(HistoryLog::new(dir.path().join("history.csv")));
        let router = app(
            state_with(Arc::new(FixedClassifier::new(Label::Produtivo, 0.9)), Some(history)),
            1024 * 1024,
        );

        let response = router
            .clone()
            .oneshot(post_json(
                "/classify_and_reply",
                json!({ "text": "Segue a fatura do mês.\nValor em anexo." }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .oneshot(Request::get("/history?limit=5").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        let entries = body.as_array().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["text_preview"], "Segue a fatura do mês.");
        assert_eq!(entries[0]["prediction"], "Produtivo");
    }

    #[tokio::test]
    async fn history_is_not_found_when_disabled() {
        let response = router(Arc::new(FixedClassifier::new(Label::Produtivo, 0.9)))
            .oneshot(Request::get("/history").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
