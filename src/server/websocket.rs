use crate::cli::Args;
use crate::events::EventBus;
use crate::models::source::Source;
use crate::models::websocket::{ ClientMessage, ServerMessage };
use crate::server::AppContext;
use crate::workspace::Workspace;

use std::error::Error;
use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::io::{ AsyncRead, AsyncWrite };
use tokio::task::JoinSet;

use tokio_tungstenite::{ accept_hdr_async_with_config, WebSocketStream };
use tokio_tungstenite::tungstenite::handshake::server::{ Request, Response, ErrorResponse };
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::{ Message, WebSocketConfig };
use tokio_rustls::TlsAcceptor;

use rustls::ServerConfig;
use rustls::pki_types::{ CertificateDer, PrivateKeyDer };
use rustls_pemfile::{ certs, pkcs8_private_keys };

use lazy_static::lazy_static;
use governor::{ RateLimiter, Quota, state::{ InMemoryState, NotKeyed }, clock::DefaultClock };

use url::form_urlencoded;

use log::{ debug, info, warn, error };
use futures::{ SinkExt, StreamExt };
use uuid::Uuid;

pub const API_KEY_HEADER: &str = "x-api-key";
pub const API_KEY_PARAM: &str = "api_key";

lazy_static! {
    static ref CONNECTION_LIMITER: RateLimiter<NotKeyed, InMemoryState, DefaultClock> =
        RateLimiter::direct(Quota::per_second(NonZeroU32::MIN.saturating_add(9)));
}

fn load_tls_config(
    cert_path: &str,
    key_path: &str
) -> Result<Arc<ServerConfig>, Box<dyn Error + Send + Sync>> {
    let cert_file = File::open(cert_path).map_err(|e|
        format!("Failed to open TLS certificate file '{}': {}", cert_path, e)
    )?;
    let key_file = File::open(key_path).map_err(|e|
        format!("Failed to open TLS key file '{}': {}", key_path, e)
    )?;

    let mut cert_reader = BufReader::new(cert_file);
    let mut key_reader = BufReader::new(key_file);
    let cert_chain: Vec<CertificateDer<'static>> = certs(&mut cert_reader)
        .collect::<Result<_, _>>()
        .map_err(|e| format!("Failed to read certificate(s): {}", e))?;

    let key = match pkcs8_private_keys(&mut key_reader).next() {
        Some(Ok(k)) => PrivateKeyDer::Pkcs8(k),
        Some(Err(e)) => {
            return Err(format!("Error reading private key: {}", e).into());
        }
        None => {
            return Err("No PKCS8 private key found in key file".into());
        }
    };

    // Pin the ring provider; more than one provider may be compiled in.
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(cert_chain, key)?;
    Ok(Arc::new(config))
}

/// Checks a handshake's credentials against the configured key. A missing or
/// empty key disables the check.
pub fn is_authorized(required: Option<&str>, header: Option<&str>, query: Option<&str>) -> bool {
    let secret = match required {
        Some(k) if !k.is_empty() => k,
        _ => {
            return true;
        }
    };

    if header == Some(secret) {
        return true;
    }

    form_urlencoded
        ::parse(query.unwrap_or("").as_bytes())
        .any(|(name, value)| name == API_KEY_PARAM && value == secret)
}

fn unauthorized(reason: &str) -> ErrorResponse {
    let mut res = ErrorResponse::new(Some(reason.to_string()));
    *res.status_mut() = StatusCode::UNAUTHORIZED;
    res
}

pub async fn start_ws_server(
    addr: &str,
    context: AppContext,
    args: Args
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;

    let tls_acceptor = if args.enable_tls {
        match (&args.tls_cert_path, &args.tls_key_path) {
            (Some(cert_path), Some(key_path)) => {
                info!(
                    "TLS enabled. Loading certificate from '{}' and key from '{}'",
                    cert_path,
                    key_path
                );
                let config = load_tls_config(cert_path, key_path)?;
                Some(TlsAcceptor::from(config))
            }
            (Some(_), None) | (None, Some(_)) => {
                error!("Both --tls-cert-path and --tls-key-path must be provided to enable TLS.");
                return Err("Missing TLS certificate or key path".into());
            }
            (None, None) => {
                error!("--enable-tls was set but no certificate/key paths provided.");
                return Err("TLS enabled without cert/key".into());
            }
        }
    } else {
        info!("TLS not enabled. Running plain WebSocket (WS) server.");
        None
    };

    let protocol = if tls_acceptor.is_some() { "WSS" } else { "WS" };
    info!("{} server listening on: {}", protocol, addr);

    loop {
        let (stream, peer) = listener.accept().await?;

        if CONNECTION_LIMITER.check().is_err() {
            warn!("Global connection rate limit exceeded for {}. Dropping connection.", peer);
            continue;
        }

        info!("Incoming connection from: {}", peer);
        let context = context.clone();
        let required_api_key = args.server_api_key.clone();
        let max_message_size = args.max_message_size;
        let tls_acceptor = tls_acceptor.clone();

        tokio::spawn(async move {
            let process_result = if let Some(acceptor) = tls_acceptor {
                match acceptor.accept(stream).await {
                    Ok(tls_stream) => {
                        info!("TLS handshake successful for {}", peer);
                        process_connection(
                            peer,
                            tls_stream,
                            context,
                            required_api_key,
                            max_message_size
                        ).await
                    }
                    Err(e) => {
                        error!("TLS handshake error for {}: {}", peer, e);
                        Err(Box::new(e) as Box<dyn Error + Send + Sync>)
                    }
                }
            } else {
                process_connection(peer, stream, context, required_api_key, max_message_size).await
            };

            if let Err(e) = process_result {
                error!("Failed to process connection for {}: {}", peer, e);
            }
        });
    }
}

async fn process_connection<S>(
    peer: SocketAddr,
    stream: S,
    context: AppContext,
    required_api_key: Option<String>,
    max_message_size: usize
) -> Result<(), Box<dyn Error + Send + Sync>>
    where S: AsyncRead + AsyncWrite + Unpin + Send + 'static
{
    let auth_callback = |req: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let header = req
            .headers()
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok());
        if is_authorized(required_api_key.as_deref(), header, req.uri().query()) {
            Ok(response)
        } else {
            warn!("Rejected unauthenticated handshake from {}", peer);
            Err(unauthorized("missing or invalid api key"))
        }
    };

    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(max_message_size);
    config.max_frame_size = Some(max_message_size);

    match accept_hdr_async_with_config(stream, auth_callback, Some(config)).await {
        Ok(ws) => {
            handle_connection(peer, ws, context, max_message_size).await;
            Ok(())
        }
        Err(e) => {
            error!("Handshake failed for {}: {}", peer, e);
            Err(Box::new(e) as _)
        }
    }
}

pub async fn handle_connection<S>(
    peer: SocketAddr,
    websocket: WebSocketStream<S>,
    context: AppContext,
    max_message_size: usize
)
    where S: AsyncRead + AsyncWrite + Unpin + Send + 'static
{
    let session_id = Uuid::new_v4().to_string();
    info!("New WebSocket connection: {} (session {})", peer, session_id);

    let (mut tx, mut rx) = websocket.split();
    let (events, mut outbound) = EventBus::channel();
    let workspace = Arc::new(Workspace::new(Arc::clone(&context.client), events.clone()));

    let writer = tokio::spawn(async move {
        while let Some(event) = outbound.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to encode server event: {}", e);
                    continue;
                }
            };
            if let Err(e) = tx.send(Message::Text(json)).await {
                debug!("Writer for {} stopped: {}", peer, e);
                break;
            }
        }
    });

    // Long-running turns; aborted when the connection goes away.
    let mut tasks = JoinSet::new();

    while let Some(msg) = rx.next().await {
        while tasks.try_join_next().is_some() {}

        match msg {
            Ok(message) => {
                if message.len() > max_message_size {
                    warn!(
                        "Message from {} exceeds size limit ({} > {})",
                        peer,
                        message.len(),
                        max_message_size
                    );
                    events.publish(ServerMessage::Error {
                        message: "Message too large".to_string(),
                    });
                    break;
                }

                match message {
                    Message::Text(text) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(command) => {
                                dispatch(&workspace, &events, &mut tasks, command).await;
                            }
                            Err(e) => {
                                warn!("Invalid message from {}: {}", peer, e);
                                events.publish(ServerMessage::Error {
                                    message: format!("Invalid message format: {}", e),
                                });
                            }
                        }
                    }
                    Message::Binary(_) => {
                        warn!("Ignoring binary frame from {}", peer);
                    }
                    Message::Ping(_) | Message::Pong(_) => {}
                    Message::Close(_) => {
                        info!("Client {} closed the connection", peer);
                        break;
                    }
                    Message::Frame(_) => {}
                }
            }
            Err(e) => {
                match e {
                    | tokio_tungstenite::tungstenite::Error::ConnectionClosed
                    | tokio_tungstenite::tungstenite::Error::Protocol(_)
                    | tokio_tungstenite::tungstenite::Error::Utf8 => {
                        info!("WebSocket connection closed or protocol error for {}: {}", peer, e);
                    }
                    tokio_tungstenite::tungstenite::Error::Io(ref io_err) if
                        io_err.kind() == std::io::ErrorKind::ConnectionReset
                    => {
                        info!("WebSocket connection reset by peer {}", peer);
                    }
                    tokio_tungstenite::tungstenite::Error::Capacity(ref cap_err) => {
                        error!("WebSocket capacity error for {}: {}", peer, cap_err);
                        events.publish(ServerMessage::Error {
                            message: "Message too large".to_string(),
                        });
                    }
                    _ => {
                        error!("Error receiving message from {}: {}", peer, e);
                    }
                }
                break;
            }
        }
    }

    tasks.shutdown().await;
    drop(workspace);
    drop(events);
    if let Err(e) = writer.await {
        debug!("Writer task for {} ended abnormally: {}", peer, e);
    }
    info!("WebSocket connection closed for {} (session {})", peer, session_id);
}

/// Applies one client command. Generation work runs on `tasks` so the reader
/// keeps serving edits and source changes meanwhile.
pub async fn dispatch(
    workspace: &Arc<Workspace>,
    events: &EventBus,
    tasks: &mut JoinSet<()>,
    command: ClientMessage
) {
    match command {
        ClientMessage::SendMessage { content } => {
            let workspace = Arc::clone(workspace);
            let events = events.clone();
            tasks.spawn(async move {
                if let Err(e) = workspace.send_message(&content).await {
                    events.publish(ServerMessage::Error { message: e.to_string() });
                }
            });
        }
        ClientMessage::GenerateVisualization { document_id, content, tool } => {
            let workspace = Arc::clone(workspace);
            let events = events.clone();
            tasks.spawn(async move {
                if let Err(e) = workspace.generate_visualization(&document_id, &content, tool).await {
                    events.publish(ServerMessage::Error { message: e.to_string() });
                }
            });
        }
        ClientMessage::AddSource { name, mime_type, data } => {
            match Source::from_base64(name, mime_type, &data) {
                Ok(source) => workspace.add_source(source).await,
                Err(e) => {
                    events.publish(ServerMessage::Error {
                        message: format!("Invalid source data: {}", e),
                    });
                }
            }
        }
        ClientMessage::RemoveSource { index } => {
            workspace.remove_source(index).await;
        }
        ClientMessage::ClearChat => workspace.clear_chat().await,
        ClientMessage::NewChat => workspace.new_chat().await,
        ClientMessage::OpenDocument { document_id } => {
            if let Err(e) = workspace.open_document(&document_id).await {
                events.publish(ServerMessage::Error { message: e.to_string() });
            }
        }
        ClientMessage::NewCanvas => {
            workspace.new_canvas().await;
        }
        ClientMessage::EditContent { content } => {
            if let Err(e) = workspace.edit_content(&content).await {
                events.publish(ServerMessage::Error { message: e.to_string() });
            }
        }
    }
}
