use crate::AppState;
use crate::error::AppError;
use crate::registry::PlayerReport;
use crate::validation;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::TypedHeader;
use axum_macros::debug_handler;
use crosstab_core::{CoreError, DeliveryMode};
use headers::Authorization;
use headers::authorization::Bearer;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

type Auth = Option<TypedHeader<Authorization<Bearer>>>;

#[derive(Deserialize)]
pub(crate) struct RegisterRequest {
    name: String,
    address: String,
}

#[derive(Deserialize)]
pub(crate) struct PlayerPayload {
    id: Uuid,
    name: String,
    #[serde(default)]
    latency: i32,
    #[serde(default)]
    game_mode: i32,
}

impl PlayerPayload {
    fn validate(&self) -> Result<(), validation::ValidationError> {
        validation::validate_player(&self.name, self.latency, self.game_mode)
    }
}

impl From<PlayerPayload> for PlayerReport {
    fn from(p: PlayerPayload) -> Self {
        PlayerReport {
            id: p.id,
            name: p.name,
            latency: p.latency,
            game_mode: p.game_mode,
        }
    }
}

#[derive(Deserialize)]
pub(crate) struct JoinRequest {
    server: String,
    player: PlayerPayload,
}

#[derive(Deserialize)]
pub(crate) struct LeaveRequest {
    server: String,
    id: Uuid,
}

#[derive(Deserialize)]
pub(crate) struct SyncRequest {
    server: String,
    players: Vec<PlayerPayload>,
}

#[derive(Serialize)]
pub(crate) struct SyncResponse {
    accepted: usize,
}

#[derive(Deserialize, Default)]
pub(crate) struct ResyncRequest {
    viewer: Option<Uuid>,
}

#[derive(Serialize)]
pub(crate) struct ServerStatus {
    name: String,
    address: String,
    players: Vec<String>,
    player_count: usize,
    online: bool,
    last_refresh: i64,
}

#[derive(Serialize)]
pub(crate) struct StatusResponse {
    delivery: DeliveryMode,
    viewers: usize,
    total_players: usize,
    servers: Vec<ServerStatus>,
}

/// Check the bearer token against the configured key, if any.
fn authorize(state: &AppState, auth: &Auth) -> Result<(), AppError> {
    let Some(expected) = &state.api_key_hash else {
        return Ok(());
    };
    match auth {
        Some(TypedHeader(auth))
            if crate::helpers::hash_api_key(auth.token()) == *expected =>
        {
            Ok(())
        }
        _ => Err(AppError::Unauthorized),
    }
}

#[debug_handler]
pub(crate) async fn register_server(
    State(state): State<Arc<AppState>>,
    auth: Auth,
    Json(payload): Json<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    authorize(&state, &auth)?;
    validation::validate_server_name(&payload.name)?;
    validation::validate_address(&payload.address)?;

    let created = state
        .registry
        .register_server(&payload.name, &payload.address)
        .await;
    state.crosstab.refresh_one(&payload.name).await?;
    tracing::info!(
        server = %payload.name,
        address = %payload.address,
        created,
        "server registered"
    );

    Ok(if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    })
}

pub(crate) async fn unregister_server(
    State(state): State<Arc<AppState>>,
    auth: Auth,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    authorize(&state, &auth)?;
    if !state.registry.unregister_server(&name).await {
        return Err(CoreError::ServerNotFound(name).into());
    }
    state.crosstab.refresh_all().await?;
    tracing::info!(server = %name, "server unregistered");
    Ok(StatusCode::OK)
}

#[debug_handler]
pub(crate) async fn join(
    State(state): State<Arc<AppState>>,
    auth: Auth,
    Json(payload): Json<JoinRequest>,
) -> Result<impl IntoResponse, AppError> {
    authorize(&state, &auth)?;
    validation::validate_server_name(&payload.server)?;
    payload.player.validate()?;

    state
        .registry
        .player_join(&payload.server, payload.player.into())
        .await?;
    state.crosstab.request_refresh_one(&payload.server);

    Ok(StatusCode::OK)
}

pub(crate) async fn leave(
    State(state): State<Arc<AppState>>,
    auth: Auth,
    Json(payload): Json<LeaveRequest>,
) -> Result<impl IntoResponse, AppError> {
    authorize(&state, &auth)?;
    validation::validate_server_name(&payload.server)?;

    state
        .registry
        .player_leave(&payload.server, &payload.id)
        .await?;
    state.crosstab.request_refresh_one(&payload.server);

    Ok(StatusCode::OK)
}

pub(crate) async fn sync(
    State(state): State<Arc<AppState>>,
    auth: Auth,
    Json(payload): Json<SyncRequest>,
) -> Result<impl IntoResponse, AppError> {
    authorize(&state, &auth)?;
    validation::validate_server_name(&payload.server)?;
    validation::validate_player_count(payload.players.len())?;
    for player in &payload.players {
        player.validate()?;
    }

    let accepted = state
        .registry
        .sync_players(
            &payload.server,
            payload.players.into_iter().map(PlayerReport::from).collect(),
        )
        .await?;
    // A full report replaces the cached roster right away.
    state.crosstab.refresh_one(&payload.server).await?;

    Ok(Json(SyncResponse { accepted }))
}

pub(crate) async fn refresh_all(
    State(state): State<Arc<AppState>>,
    auth: Auth,
) -> Result<impl IntoResponse, AppError> {
    authorize(&state, &auth)?;
    state.crosstab.request_refresh_all();
    Ok(StatusCode::ACCEPTED)
}

pub(crate) async fn refresh_server(
    State(state): State<Arc<AppState>>,
    auth: Auth,
    Path(server): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    authorize(&state, &auth)?;
    validation::validate_server_name(&server)?;
    state.crosstab.refresh_one(&server).await?;
    Ok(StatusCode::OK)
}

pub(crate) async fn resync(
    State(state): State<Arc<AppState>>,
    auth: Auth,
    payload: Option<Json<ResyncRequest>>,
) -> Result<impl IntoResponse, AppError> {
    authorize(&state, &auth)?;
    let Json(payload) = payload.unwrap_or_default();

    if let Some(viewer) = payload.viewer
        && state.crosstab.tracked_entries(&viewer).is_none()
    {
        return Err(CoreError::ViewerNotTracked.into());
    }
    state.crosstab.request_full_resync(payload.viewer);
    Ok(StatusCode::ACCEPTED)
}

pub(crate) async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.crosstab.presence().snapshot();
    let servers = snapshot
        .servers
        .iter()
        .map(|roster| ServerStatus {
            name: roster.descriptor.name.clone(),
            address: roster.descriptor.address.clone(),
            players: roster.players.iter().map(|p| p.name.to_string()).collect(),
            player_count: roster.players.len(),
            online: roster.online,
            last_refresh: roster.descriptor.last_seen,
        })
        .collect();

    Json(StatusResponse {
        delivery: state.crosstab.delivery_mode(),
        viewers: state.crosstab.viewer_count(),
        total_players: snapshot.total_players(),
        servers,
    })
}
