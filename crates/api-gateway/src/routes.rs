//! Router construction and handlers
//!
//! Model endpoints are bound statically at startup; each path maps to
//! exactly one lifecycle manager, while a manager may serve several paths.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::Request;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info_span};
use uuid::Uuid;

use model_manager::ModelLifecycleManager;

use crate::error::ApiError;
use crate::schema::{
    GenerateRequestBody, GenerateResponseBody, HealthResponse, ModelEntry, ModelsResponse,
};

/// Static mapping from endpoint paths to one lifecycle manager
pub struct ModelBinding {
    /// Short name listed by `/health`
    pub name: String,

    /// Name reported in responses and by `/models`
    pub display_name: String,

    /// Paths served by this binding
    pub endpoints: Vec<String>,

    /// Manager owning the model
    pub manager: Arc<ModelLifecycleManager>,
}

impl ModelBinding {
    /// Creates a binding
    pub fn new(
        name: impl Into<String>,
        display_name: impl Into<String>,
        endpoints: Vec<String>,
        manager: Arc<ModelLifecycleManager>,
    ) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            endpoints,
            manager,
        }
    }
}

#[derive(Clone)]
struct RouterState {
    bindings: Arc<Vec<Arc<ModelBinding>>>,
}

/// Builds the router for `bindings`
pub fn build_router(bindings: Vec<Arc<ModelBinding>>) -> Router {
    let mut router = Router::new()
        .route("/health", get(health))
        .route("/models", get(list_models));

    for binding in &bindings {
        for endpoint in &binding.endpoints {
            debug!("Routing POST {} to model {}", endpoint, binding.name);
            router = router.route(endpoint, post(generate).with_state(binding.clone()));
        }
    }

    router
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                info_span!(
                    "request",
                    request_id = %Uuid::new_v4(),
                    method = %request.method(),
                    path = %request.uri().path(),
                )
            }),
        )
        .layer(CorsLayer::permissive())
        .with_state(RouterState {
            bindings: Arc::new(bindings),
        })
}

async fn generate(
    State(binding): State<Arc<ModelBinding>>,
    payload: Result<Json<GenerateRequestBody>, JsonRejection>,
) -> Result<Json<GenerateResponseBody>, ApiError> {
    let Json(body) = payload?;
    let request = body.into_request()?;
    let result = binding.manager.generate(request).await?;

    Ok(Json(GenerateResponseBody::from_result(
        binding.display_name.as_str(),
        result,
    )))
}

async fn health(State(state): State<RouterState>) -> Json<HealthResponse> {
    let models = state
        .bindings
        .iter()
        .map(|binding| binding.name.as_str())
        .collect::<Vec<_>>()
        .join(",");

    Json(HealthResponse {
        status: "healthy".to_string(),
        models,
    })
}

async fn list_models(State(state): State<RouterState>) -> Json<ModelsResponse> {
    let available_models = state
        .bindings
        .iter()
        .flat_map(|binding| {
            binding.endpoints.iter().map(|endpoint| ModelEntry {
                name: binding.display_name.clone(),
                endpoint: endpoint.clone(),
            })
        })
        .collect();

    Json(ModelsResponse { available_models })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use common::{PowerState, SamplingConfig};
    use inference_engine::{
        EngineEvent, EngineJournal, InferenceEngine, SimulatedEngine, SimulatedEngineOptions,
    };
    use model_manager::ManagerOptions;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn binding(
        name: &str,
        model_id: &str,
        display_name: &str,
        endpoints: &[&str],
        engine_options: SimulatedEngineOptions,
    ) -> (Arc<ModelBinding>, EngineJournal) {
        let journal = EngineJournal::default();
        let engine_journal = journal.clone();
        let id = model_id.to_string();
        let manager = ModelLifecycleManager::initialize(
            ManagerOptions::new(name, model_id),
            async move {
                let engine =
                    SimulatedEngine::load_with_journal(&id, engine_options, engine_journal).await?;
                Ok(Box::new(engine) as Box<dyn InferenceEngine>)
            },
        )
        .await;

        let binding = ModelBinding::new(
            name,
            display_name,
            endpoints.iter().map(|e| e.to_string()).collect(),
            Arc::new(manager),
        );
        (Arc::new(binding), journal)
    }

    async fn two_models() -> (Router, EngineJournal, Arc<ModelBinding>) {
        let (qwen, qwen_journal) = binding(
            "qwen",
            "Qwen/Qwen2.5-7B-Instruct",
            "Qwen2.5-7B-Instruct",
            &["/qwen", "/chat"],
            SimulatedEngineOptions::default(),
        )
        .await;
        let (llama, _) = binding(
            "llama",
            "unsloth/Meta-Llama-3.1-8B-Instruct",
            "Llama-3.1-8B-Instruct",
            &["/llama"],
            SimulatedEngineOptions::default(),
        )
        .await;

        (build_router(vec![qwen.clone(), llama]), qwen_journal, qwen)
    }

    async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_and_models() {
        let (router, _, _) = two_models().await;

        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let (status, body) = send(router.clone(), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "healthy", "models": "qwen,llama"}));

        let request = Request::builder().uri("/models").body(Body::empty()).unwrap();
        let (status, body) = send(router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({"available_models": [
                {"name": "Qwen2.5-7B-Instruct", "endpoint": "/qwen"},
                {"name": "Qwen2.5-7B-Instruct", "endpoint": "/chat"},
                {"name": "Llama-3.1-8B-Instruct", "endpoint": "/llama"},
            ]})
        );
    }

    #[tokio::test]
    async fn test_generate_names_the_model() {
        let (router, _, qwen) = two_models().await;

        let (status, body) = send(
            router.clone(),
            post_json("/qwen", json!({"prompt": "Hi. Who are you"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["model"], "Qwen2.5-7B-Instruct");
        assert_eq!(body["text"], "Qwen2.5-7B-Instruct answers: Hi. Who are you");
        assert_eq!(body["tokens_generated"], 6);
        assert!(body["processing_time"].as_f64().unwrap() >= 0.0);
        assert_eq!(qwen.manager.power_state(), Some(PowerState::Asleep));

        let (status, body) = send(
            router,
            post_json("/llama", json!({"prompt": "Hi", "max_tokens": 2})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["model"], "Llama-3.1-8B-Instruct");
        assert_eq!(body["tokens_generated"], 2);
    }

    #[tokio::test]
    async fn test_partial_override_ignores_configured_default() {
        let journal = EngineJournal::default();
        let engine_journal = journal.clone();
        let mut options = ManagerOptions::new("qwen", "Qwen/Qwen2.5-7B-Instruct");
        options.default_sampling = SamplingConfig {
            temperature: 0.2,
            top_p: 0.5,
            max_tokens: 64,
        };
        let manager = ModelLifecycleManager::initialize(options, async move {
            let engine = SimulatedEngine::load_with_journal(
                "Qwen/Qwen2.5-7B-Instruct",
                SimulatedEngineOptions::default(),
                engine_journal,
            )
            .await?;
            Ok(Box::new(engine) as Box<dyn InferenceEngine>)
        })
        .await;
        let qwen = ModelBinding::new(
            "qwen",
            "Qwen2.5-7B-Instruct",
            vec!["/qwen".to_string()],
            Arc::new(manager),
        );
        let router = build_router(vec![Arc::new(qwen)]);

        let sampling_used = |journal: &EngineJournal| {
            journal
                .events()
                .into_iter()
                .find_map(|e| match e {
                    EngineEvent::Generate { sampling, .. } => Some(sampling),
                    _ => None,
                })
                .unwrap()
        };

        journal.clear();
        let (status, _) = send(router.clone(), post_json("/qwen", json!({"prompt": "Hi"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(sampling_used(&journal).max_tokens, 64);

        journal.clear();
        let (status, _) = send(
            router,
            post_json("/qwen", json!({"prompt": "Hi", "temperature": 0.7})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            sampling_used(&journal),
            SamplingConfig {
                temperature: 0.7,
                ..SamplingConfig::default()
            }
        );
    }

    #[tokio::test]
    async fn test_several_endpoints_share_one_manager() {
        let (router, journal, _) = two_models().await;
        journal.clear();

        let (status, _) = send(router, post_json("/chat", json!({"prompt": "Hi"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(journal.count(|e| *e == EngineEvent::WakeUp), 1);
    }

    #[tokio::test]
    async fn test_invalid_parameters_are_client_errors() {
        let (router, journal, qwen) = two_models().await;
        journal.clear();

        for body in [
            json!({"prompt": "Hi", "max_tokens": -1}),
            json!({"prompt": "Hi", "top_p": 1.5}),
            json!({"prompt": ""}),
        ] {
            let (status, body) = send(router.clone(), post_json("/qwen", body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["error"], "invalid_parameter");
        }

        assert!(journal.events().is_empty());
        assert_eq!(qwen.manager.power_state(), Some(PowerState::Asleep));
    }

    #[tokio::test]
    async fn test_malformed_bodies_are_rejected() {
        let (router, journal, _) = two_models().await;
        journal.clear();

        let request = Request::builder()
            .method("POST")
            .uri("/qwen")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, body) = send(router.clone(), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_request");

        let (status, _) = send(router.clone(), post_json("/qwen", json!({"prompt": 42}))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let request = Request::builder()
            .method("POST")
            .uri("/qwen")
            .body(Body::from(r#"{"prompt": "Hi"}"#))
            .unwrap();
        let (status, _) = send(router, request).await;
        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);

        assert!(journal.events().is_empty());
    }

    #[tokio::test]
    async fn test_generation_failure_is_server_error() {
        let (router, journal, qwen) = two_models().await;
        journal.set_fail_generate(true);

        let (status, body) = send(router, post_json("/qwen", json!({"prompt": "Hi"}))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "generation_error");
        assert_eq!(qwen.manager.power_state(), Some(PowerState::Asleep));
    }

    #[tokio::test]
    async fn test_failed_model_is_unavailable() {
        let (broken, _) = binding(
            "qwen",
            "Qwen/Qwen2.5-7B-Instruct",
            "Qwen2.5-7B-Instruct",
            &["/qwen"],
            SimulatedEngineOptions {
                fail_load: true,
                ..Default::default()
            },
        )
        .await;
        let router = build_router(vec![broken]);

        let (status, body) = send(router, post_json("/qwen", json!({"prompt": "Hi"}))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "initialization_error");
    }

    #[tokio::test]
    async fn test_unknown_path_is_not_found() {
        let (router, _, _) = two_models().await;
        let (status, _) = send(router, post_json("/mistral", json!({"prompt": "Hi"}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
