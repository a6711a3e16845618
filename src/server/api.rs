use crate::cli::Args;
use crate::server::AppContext;
use std::error::Error;
use std::net::SocketAddr;
use axum::{ routing::get, Router, extract::State, response::IntoResponse, http::StatusCode };
use serde::Serialize;
use tower_http::cors::{ Any, CorsLayer };
use log::{ info, error };

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    model: String,
    version: &'static str,
}

#[derive(Serialize)]
struct ReloadResponse {
    success: bool,
    message: String,
    details: Option<Vec<String>>,
}

pub fn router(context: AppContext) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/reload-prompts", get(reload_prompts_handler))
        .layer(cors)
        .with_state(context)
}

pub async fn start_http_server(
    http_port: u16,
    context: AppContext,
    args: Args
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let addr = format!("0.0.0.0:{}", http_port).parse::<SocketAddr>()?;
    info!("Starting HTTP API server on: http://{}", addr);

    let app = router(context);

    let tls_paths = match (&args.tls_cert_path, &args.tls_key_path) {
        (Some(cert), Some(key)) if args.enable_tls => Some((cert.clone(), key.clone())),
        _ => None,
    };

    if let Some((cert_path, key_path)) = tls_paths {
        let tls_config = axum_server::tls_rustls::RustlsConfig::from_pem_file(
            cert_path,
            key_path
        ).await?;

        tokio::spawn(async move {
            let result = axum_server
                ::bind_rustls(addr, tls_config)
                .serve(app.into_make_service()).await;

            if let Err(e) = result {
                error!("HTTPS server error: {}", e);
            }
        });

        info!("HTTPS server started with TLS enabled");
    } else {
        tokio::spawn(async move {
            match tokio::net::TcpListener::bind(addr).await {
                Ok(listener) => {
                    if let Err(e) = axum::serve(listener, app.into_make_service()).await {
                        error!("HTTP server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Failed to bind HTTP server to {}: {}. Try a different port.", addr, e);
                }
            }
        });

        info!("HTTP server started");
    }

    Ok(())
}

async fn health_handler(State(context): State<AppContext>) -> impl IntoResponse {
    axum::Json(HealthResponse {
        status: "ok",
        model: context.client.get_model(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn reload_prompts_handler(State(context): State<AppContext>) -> impl IntoResponse {
    let (code, response) = match context.prompts.reload_if_changed().await {
        Ok(true) =>
            (
                StatusCode::OK,
                ReloadResponse {
                    success: true,
                    message: "Reload complete".into(),
                    details: Some(vec!["Prompts reloaded".into()]),
                },
            ),
        Ok(false) => {
            let detail = if context.prompts.path().is_some() {
                "Prompts unchanged"
            } else {
                "Using embedded prompts"
            };
            (
                StatusCode::OK,
                ReloadResponse {
                    success: true,
                    message: "Reload complete".into(),
                    details: Some(vec![detail.into()]),
                },
            )
        }
        Err(e) => {
            error!("Prompt reload failed: {}", e);
            (
                StatusCode::BAD_REQUEST,
                ReloadResponse {
                    success: false,
                    message: "Reload errors".into(),
                    details: Some(vec![format!("Prompts error: {}", e)]),
                },
            )
        }
    };

    (code, axum::Json(response)).into_response()
}
