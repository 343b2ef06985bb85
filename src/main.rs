mod api;
mod audio_store;
mod config;
mod error;
mod greeting;
mod models;
mod outreach;
mod pipeline;
mod store;
mod twilio;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{middleware, Router};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use audio_store::AudioStore;
use config::Config;
use outreach::OutreachProcessor;
use pipeline::assistant::Assistant;
use pipeline::conversation::ConversationStore;
use pipeline::gemini::GeminiClient;
use pipeline::llm::OpenAiClient;
use pipeline::stt::SttClient;
use pipeline::tts::TtsClient;
use store::{Repository, SupabaseClient};
use twilio::outbound::TwilioClient;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Shared application state accessible from all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub stt: Arc<SttClient>,
    pub tts: Arc<TtsClient>,
    pub llm: Arc<OpenAiClient>,
    pub gemini: Arc<GeminiClient>,
    pub twilio: Arc<TwilioClient>,
    pub repo: Arc<Repository>,
    pub assistant: Arc<Assistant>,
    /// Live call sessions, keyed by call_sid.
    pub conversations: ConversationStore,
    /// Synthesized clips served to Twilio's `<Play>`.
    pub audio: AudioStore,
    pub outreach: Arc<OutreachProcessor>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let llm = Arc::new(OpenAiClient::new(&config.openai));
        let twilio = Arc::new(TwilioClient::new(&config.twilio));
        let repo = Arc::new(Repository::new(SupabaseClient::new(&config.supabase)));
        let conversations =
            ConversationStore::new(config.call.session_timeout_secs, config.call.max_history);
        let assistant = Arc::new(Assistant::new(
            llm.clone(),
            repo.clone(),
            conversations.clone(),
            config.assistant.name.clone(),
        ));
        let outreach = Arc::new(OutreachProcessor::new(
            repo.clone(),
            twilio.clone(),
            config.outreach.clone(),
            &config.server.external_url,
        ));

        Self {
            stt: Arc::new(SttClient::new(&config.openai)),
            tts: Arc::new(TtsClient::new(&config.elevenlabs)),
            gemini: Arc::new(GeminiClient::new(&config.gemini)),
            audio: AudioStore::new(config.call.audio_ttl_secs),
            llm,
            twilio,
            repo,
            assistant,
            conversations,
            outreach,
            config,
        }
    }
}

fn main() {
    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        Some("--process-outreach") => run(process_outreach()),
        Some("--version") => println!("clara-voice {VERSION}"),
        Some("--help") | Some("-h") => print_usage(),
        Some(other) => {
            eprintln!("Unknown option: {other}");
            print_usage();
            std::process::exit(1);
        }
        None => run(server()),
    }
}

fn run(fut: impl std::future::Future<Output = ()>) {
    match tokio::runtime::Runtime::new() {
        Ok(rt) => rt.block_on(fut),
        Err(e) => {
            eprintln!("Failed to create tokio runtime: {e}");
            std::process::exit(1);
        }
    }
}

fn print_usage() {
    println!("clara-voice {VERSION}");
    println!("AI voice receptionist: Twilio calls, bookings and outreach");
    println!();
    println!("Usage: clara-voice [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --process-outreach  Run one outreach batch, print the summary and exit");
    println!("  --version           Print version");
    println!("  --help, -h          Print this help message");
    println!();
    println!("Without options, starts the voice server.");
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "clara_voice=info,tower_http=info".into()),
        )
        .init();
}

fn load_config() -> Config {
    match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            std::process::exit(1);
        }
    }
}

async fn process_outreach() {
    init_tracing();
    let state = AppState::new(load_config());

    match state.outreach.run_once().await {
        Ok(summary) => match serde_json::to_string_pretty(&summary) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("Failed to encode summary: {e}");
                std::process::exit(1);
            }
        },
        Err(e) => {
            eprintln!("Outreach run failed: {e}");
            std::process::exit(1);
        }
    }
}

async fn server() {
    init_tracing();
    let config = load_config();

    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        external_url = %config.server.external_url,
        "Starting clara-voice"
    );

    let state = AppState::new(config.clone());
    let cancel = CancellationToken::new();

    let poller = if config.outreach.poll_interval_secs > 0 {
        Some(state.outreach.clone().spawn_poller(
            Duration::from_secs(config.outreach.poll_interval_secs),
            cancel.clone(),
        ))
    } else {
        tracing::info!("Outreach poller disabled, use /api/outreach/process or --process-outreach");
        None
    };

    let app = build_router(state);

    let addr: SocketAddr = match format!("{}:{}", config.server.host, config.server.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            eprintln!("Invalid server address: {e}");
            std::process::exit(1);
        }
    };

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("Failed to bind {addr}: {e}");
            std::process::exit(1);
        }
    };
    tracing::info!(%addr, "Listening");

    let shutdown = cancel.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {e}");
            }
            tracing::info!("Shutting down");
            shutdown.cancel();
        })
        .await;
    if let Err(e) = served {
        tracing::error!("Server error: {e}");
    }

    cancel.cancel();
    if let Some(handle) = poller {
        let _ = handle.await;
    }
}

pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/api/chat", post(api::chat::handle_chat))
        .route("/api/gemini", post(api::gemini::handle_gemini))
        .route("/api/tts", post(api::tts::handle_tts))
        .route("/api/realtime/session", post(api::realtime::handle_session))
        .route("/api/call", post(api::outbound::handle_call))
        .route("/api/outreach/process", post(api::outreach::handle_process))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            api::auth::require_token,
        ));

    let cors = cors_layer(&state.config.api.allowed_origins);

    Router::new()
        // Twilio webhooks
        .route("/twilio/voice", post(twilio::webhook::handle_voice))
        .route(
            "/twilio/voice/outreach",
            post(twilio::webhook::handle_voice_outreach),
        )
        .route("/twilio/recording", post(twilio::speech::handle_recording))
        .route("/twilio/status", post(twilio::webhook::handle_status))
        // TTS clips fetched by <Play>
        .route("/audio/{id}", get(serve_audio))
        .merge(api)
        .route("/health", get(health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if allowed_origins.is_empty() {
        return layer.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| match o.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

async fn serve_audio(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.audio.get(&id).await {
        Some(bytes) => ([(header::CONTENT_TYPE, "audio/mpeg")], bytes).into_response(),
        None => (StatusCode::NOT_FOUND, "clip not found or expired").into_response(),
    }
}

async fn health() -> &'static str {
    "ok"
}

#[cfg(test)]
pub(crate) mod test_support {
    use axum::body::Body;
    use axum::http::Request;
    use axum::response::Response;

    use crate::config::tests::test_config;
    use crate::AppState;

    /// State whose vendors and database all point at `base`.
    pub fn test_state(base: &str) -> AppState {
        AppState::new(test_config(base))
    }

    pub fn form_request(path: &str, body: &str) -> Request<Body> {
        Request::post(path)
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    /// JSON POST carrying the test bearer token.
    pub fn api_request(path: &str, body: serde_json::Value) -> Request<Body> {
        Request::post(path)
            .header("content-type", "application/json")
            .header("authorization", "Bearer dash-token")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    pub async fn body_string(resp: Response) -> String {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::test_state;
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_is_ok() {
        let resp = build_router(test_state("http://127.0.0.1:9"))
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn serves_stored_audio_and_404s_unknown_ids() {
        let state = test_state("http://127.0.0.1:9");
        let id = state.audio.put(b"ID3clip".to_vec()).await;
        let app = build_router(state);

        let resp = app
            .clone()
            .oneshot(Request::get(format!("/audio/{id}")).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["content-type"], "audio/mpeg");

        let resp = app
            .oneshot(Request::get("/audio/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn cors_echoes_allowed_origin() {
        let mut state = test_state("http://127.0.0.1:9");
        state.config.api.allowed_origins = vec![
            "https://app.clara.example".to_string(),
            "bad\norigin".to_string(),
        ];
        let resp = build_router(state)
            .oneshot(
                Request::get("/health")
                    .header("origin", "https://app.clara.example")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            resp.headers()["access-control-allow-origin"],
            "https://app.clara.example"
        );
    }
}
