//! HTTP route definitions

use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::{header, Method, StatusCode},
    middleware,
    response::{IntoResponse, Json},
    routing::{delete, get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::info;
use uuid::Uuid;

use crate::app::AppState;
use crate::arena::{ArenaError, ArenaSummary, SpawnSlot};
use crate::game::{Kit, MatchSummary, QueueClass};
use crate::http::middleware::require_admin;
use crate::matchmaking::{JoinOutcome, QueueEntry, QueueError};
use crate::util::time::uptime_secs;
use crate::world::{BlockPos, Location, PlayerHost};

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    // Comma-separated CLIENT_ORIGIN, any origin when unset
    let cors = match &state.config.client_origin {
        Some(origins) => {
            let allowed: Vec<header::HeaderValue> = origins
                .split(',')
                .filter_map(|s| s.trim().parse::<header::HeaderValue>().ok())
                .collect();
            cors.allow_origin(allowed)
        }
        None => cors.allow_origin(Any),
    };

    let public_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/arenas", get(list_arenas_handler))
        .route("/arenas/:name", get(get_arena_handler))
        .route("/kits", get(list_kits_handler))
        .route("/queue/join", post(queue_join_handler))
        .route("/queue/leave", post(queue_leave_handler))
        .route("/queue/size", get(queue_size_handler))
        .route("/queue/:player", get(queue_entry_handler))
        .route("/matches", get(list_matches_handler))
        .route("/matches/player/:player", get(player_match_handler))
        .route("/matches/forfeit", post(forfeit_handler))
        .route("/players/:player/connect", post(player_connect_handler))
        .route("/players/:player/disconnect", post(player_disconnect_handler));

    let admin_routes = Router::new()
        .route("/arenas", post(create_arena_handler))
        .route("/arenas/:name", delete(delete_arena_handler))
        .route("/arenas/:name/spawn", put(set_spawn_handler))
        .route("/arenas/:name/bounds", put(set_bounds_handler))
        .route("/arenas/:name/restriction", put(set_restriction_handler))
        .route("/arenas/:name/single-lease", put(set_single_lease_handler))
        .route("/kits/:name/enabled", put(set_kit_enabled_handler))
        .layer(middleware::from_fn_with_state(state.clone(), require_admin));

    Router::new()
        .merge(public_routes)
        .nest("/admin", admin_routes)
        .layer(TimeoutLayer::new(Duration::from_secs(10)))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    active_matches: usize,
    queued_players: usize,
    arenas: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        active_matches: state.matches.active_matches(),
        queued_players: state.queue.queued_count(),
        arenas: state.pool.len(),
    })
}

// ============================================================================
// Arena endpoints
// ============================================================================

async fn list_arenas_handler(State(state): State<AppState>) -> Json<Vec<ArenaSummary>> {
    Json(state.pool.summaries())
}

async fn get_arena_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ArenaSummary>, AppError> {
    state
        .pool
        .get_arena(&name)
        .map(|a| Json(a.summary()))
        .ok_or_else(|| AppError::NotFound(format!("Arena '{}' does not exist", name)))
}

#[derive(Deserialize)]
struct CreateArenaRequest {
    name: String,
    spawn1: Location,
    spawn2: Location,
}

async fn create_arena_handler(
    State(state): State<AppState>,
    Json(req): Json<CreateArenaRequest>,
) -> Result<(StatusCode, Json<ArenaSummary>), AppError> {
    let arena = state.pool.create(&req.name, req.spawn1, req.spawn2)?;
    Ok((StatusCode::CREATED, Json(arena.summary())))
}

#[derive(Deserialize)]
struct SetSpawnRequest {
    slot: SpawnSlot,
    location: Location,
}

async fn set_spawn_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<SetSpawnRequest>,
) -> Result<StatusCode, AppError> {
    state.pool.set_spawn(&name, req.slot, req.location)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct SetBoundsRequest {
    pos1: BlockPos,
    pos2: BlockPos,
}

#[derive(Serialize)]
struct SetBoundsResponse {
    protected_blocks: usize,
}

async fn set_bounds_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<SetBoundsRequest>,
) -> Result<Json<SetBoundsResponse>, AppError> {
    let protected_blocks = state.pool.set_bounds(&name, req.pos1, req.pos2)?;
    Ok(Json(SetBoundsResponse { protected_blocks }))
}

#[derive(Deserialize)]
struct SetRestrictionRequest {
    kit: Option<String>,
}

async fn set_restriction_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<SetRestrictionRequest>,
) -> Result<StatusCode, AppError> {
    let kit = match req.kit {
        Some(kit) => {
            let kit = state
                .kits
                .get(&kit)
                .ok_or_else(|| AppError::BadRequest(format!("Unknown kit '{}'", kit)))?;
            Some(kit.name.clone())
        }
        None => None,
    };
    state.pool.set_restriction(&name, kit)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct EnabledRequest {
    enabled: bool,
}

async fn set_single_lease_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<EnabledRequest>,
) -> Result<StatusCode, AppError> {
    state.pool.set_single_lease(&name, req.enabled)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_arena_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, AppError> {
    state.pool.delete(&name)?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Kit endpoints
// ============================================================================

async fn list_kits_handler(State(state): State<AppState>) -> Json<Vec<Kit>> {
    Json(state.kits.all().iter().map(|k| k.as_ref().clone()).collect())
}

async fn set_kit_enabled_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<EnabledRequest>,
) -> Result<StatusCode, AppError> {
    if !state.kits.set_enabled(&name, req.enabled) {
        return Err(AppError::NotFound(format!("Unknown kit '{}'", name)));
    }
    info!(kit = %name, enabled = req.enabled, "Kit toggled");
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Queue endpoints
// ============================================================================

#[derive(Deserialize)]
struct JoinQueueRequest {
    player: Uuid,
    kit: String,
    queue_class: QueueClass,
}

#[derive(Serialize)]
struct JoinQueueResponse {
    status: &'static str,
    #[serde(rename = "match", skip_serializing_if = "Option::is_none")]
    match_info: Option<MatchSummary>,
}

async fn queue_join_handler(
    State(state): State<AppState>,
    Json(req): Json<JoinQueueRequest>,
) -> Result<Json<JoinQueueResponse>, AppError> {
    if !state.join_limiter.check(req.player) {
        return Err(AppError::RateLimited);
    }
    if !state.players.is_online(req.player) {
        return Err(AppError::BadRequest("Player is offline".to_string()));
    }

    let response = match state.queue.join(req.player, &req.kit, req.queue_class)? {
        JoinOutcome::Queued => JoinQueueResponse {
            status: "queued",
            match_info: None,
        },
        JoinOutcome::Matched(m) => JoinQueueResponse {
            status: "matched",
            match_info: Some(m.summary()),
        },
        JoinOutcome::NoArena => JoinQueueResponse {
            status: "no_arena",
            match_info: None,
        },
        JoinOutcome::Aborted => JoinQueueResponse {
            status: "aborted",
            match_info: None,
        },
    };
    Ok(Json(response))
}

#[derive(Deserialize)]
struct PlayerRequest {
    player: Uuid,
}

#[derive(Serialize)]
struct LeaveQueueResponse {
    removed: bool,
}

async fn queue_leave_handler(
    State(state): State<AppState>,
    Json(req): Json<PlayerRequest>,
) -> Json<LeaveQueueResponse> {
    Json(LeaveQueueResponse {
        removed: state.queue.leave(req.player),
    })
}

#[derive(Serialize)]
struct QueueEntryResponse {
    #[serde(flatten)]
    entry: QueueEntry,
    wait_secs: i64,
}

async fn queue_entry_handler(
    State(state): State<AppState>,
    Path(player): Path<Uuid>,
) -> Result<Json<QueueEntryResponse>, AppError> {
    let entry = state
        .queue
        .get_entry(player)
        .ok_or_else(|| AppError::NotFound("Player is not queued".to_string()))?;
    Ok(Json(QueueEntryResponse {
        wait_secs: entry.wait_secs(),
        entry,
    }))
}

#[derive(Deserialize)]
struct QueueSizeQuery {
    class: QueueClass,
    kit: String,
}

#[derive(Serialize)]
struct QueueSizeResponse {
    size: usize,
}

async fn queue_size_handler(
    State(state): State<AppState>,
    Query(query): Query<QueueSizeQuery>,
) -> Json<QueueSizeResponse> {
    Json(QueueSizeResponse {
        size: state.queue.queue_size(query.class, &query.kit),
    })
}

// ============================================================================
// Match endpoints
// ============================================================================

async fn list_matches_handler(State(state): State<AppState>) -> Json<Vec<MatchSummary>> {
    let mut matches: Vec<MatchSummary> = state
        .matches
        .get_all_active_matches()
        .iter()
        .map(|m| m.summary())
        .collect();
    matches.sort_by_key(|m| m.created_at);
    Json(matches)
}

async fn player_match_handler(
    State(state): State<AppState>,
    Path(player): Path<Uuid>,
) -> Result<Json<MatchSummary>, AppError> {
    state
        .matches
        .get_match(player)
        .map(|m| Json(m.summary()))
        .ok_or_else(|| AppError::NotFound("Player is not in a match".to_string()))
}

#[derive(Serialize)]
struct MatchEndResponse {
    match_id: Option<Uuid>,
    winner: Option<Uuid>,
}

async fn forfeit_handler(
    State(state): State<AppState>,
    Json(req): Json<PlayerRequest>,
) -> Result<Json<MatchEndResponse>, AppError> {
    let report = state
        .matches
        .forfeit(req.player)
        .ok_or_else(|| AppError::NotFound("Player is not in a match".to_string()))?;
    Ok(Json(MatchEndResponse {
        match_id: report.result.as_ref().map(|r| r.match_id),
        winner: report.result.as_ref().map(|r| r.winner),
    }))
}

// ============================================================================
// Player presence endpoints
// ============================================================================

async fn player_connect_handler(
    State(state): State<AppState>,
    Path(player): Path<Uuid>,
) -> StatusCode {
    state.player_joined(player);
    StatusCode::NO_CONTENT
}

async fn player_disconnect_handler(
    State(state): State<AppState>,
    Path(player): Path<Uuid>,
) -> Json<MatchEndResponse> {
    let report = state.player_quit(player);
    let result = report.and_then(|r| r.result);
    Json(MatchEndResponse {
        match_id: result.as_ref().map(|r| r.match_id),
        winner: result.as_ref().map(|r| r.winner),
    })
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Too many requests")]
    RateLimited,
}

impl From<ArenaError> for AppError {
    fn from(e: ArenaError) -> Self {
        match e {
            ArenaError::NotFound(_) => AppError::NotFound(e.to_string()),
            ArenaError::AlreadyExists(_) | ArenaError::InUse(_) => AppError::Conflict(e.to_string()),
            ArenaError::InvalidName(_) => AppError::BadRequest(e.to_string()),
        }
    }
}

impl From<QueueError> for AppError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::AlreadyQueued | QueueError::InMatch => AppError::Conflict(e.to_string()),
            QueueError::UnknownKit(_) => AppError::NotFound(e.to_string()),
            QueueError::KitDisabled(_) | QueueError::RankedDisabled(_) => {
                AppError::BadRequest(e.to_string())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, self.to_string()),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::util::rate_limit::ADMIN_RATE_LIMIT;
    use crate::world::{MemoryPlayers, MemoryWorld};
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app(dir: &tempfile::TempDir) -> (Router, AppState) {
        let arena_file = dir.path().join("arenas.json").display().to_string();
        let config = Config::from_lookup(move |key| match key {
            "ARENA_FILE" => Some(arena_file.clone()),
            "ADMIN_TOKEN" => Some("letmein".into()),
            "RESTORE_BATCH_DELAY_MS" => Some("0".into()),
            _ => None,
        })
        .unwrap();
        let state = AppState::new(config, Arc::new(MemoryWorld::new()), Arc::new(MemoryPlayers::new()));
        (build_router(state.clone()), state)
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value, admin: bool) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if admin {
            builder = builder.header(header::AUTHORIZATION, "Bearer letmein");
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn setup_arena(router: &Router) {
        let create = json_request(
            "POST",
            "/admin/arenas",
            serde_json::json!({
                "name": "arena1",
                "spawn1": { "x": 0.5, "y": 65.0, "z": 0.5 },
                "spawn2": { "x": 10.5, "y": 65.0, "z": 0.5 }
            }),
            true,
        );
        let response = router.clone().oneshot(create).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let bounds = json_request(
            "PUT",
            "/admin/arenas/arena1/bounds",
            serde_json::json!({
                "pos1": { "x": 0, "y": 60, "z": -5 },
                "pos2": { "x": 10, "y": 70, "z": 5 }
            }),
            true,
        );
        let response = router.clone().oneshot(bounds).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn health_reports_counts() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _) = app(&dir);
        let response = router
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["active_matches"], 0);
    }

    #[tokio::test]
    async fn admin_routes_need_token() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _) = app(&dir);
        let request = json_request(
            "POST",
            "/admin/arenas",
            serde_json::json!({
                "name": "arena1",
                "spawn1": { "x": 0.0, "y": 65.0, "z": 0.0 },
                "spawn2": { "x": 1.0, "y": 65.0, "z": 0.0 }
            }),
            false,
        );
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn admin_routes_are_rate_limited() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _) = app(&dir);

        let mut statuses = Vec::new();
        for _ in 0..ADMIN_RATE_LIMIT * 2 {
            let request = json_request(
                "PUT",
                "/admin/kits/Sumo/enabled",
                serde_json::json!({ "enabled": true }),
                true,
            );
            statuses.push(router.clone().oneshot(request).await.unwrap().status());
        }
        assert!(statuses[..ADMIN_RATE_LIMIT as usize]
            .iter()
            .all(|s| s.is_success()));
        assert!(statuses.contains(&StatusCode::TOO_MANY_REQUESTS));
    }

    #[tokio::test]
    async fn arena_admin_and_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _) = app(&dir);
        setup_arena(&router).await;

        let response = router
            .clone()
            .oneshot(Request::builder().uri("/arenas/ARENA1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["name"], "arena1");
        assert_eq!(body["active_leases"], 0);

        let duplicate = json_request(
            "POST",
            "/admin/arenas",
            serde_json::json!({
                "name": "Arena1",
                "spawn1": { "x": 0.0, "y": 65.0, "z": 0.0 },
                "spawn2": { "x": 1.0, "y": 65.0, "z": 0.0 }
            }),
            true,
        );
        let response = router.clone().oneshot(duplicate).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let restriction = json_request(
            "PUT",
            "/admin/arenas/arena1/restriction",
            serde_json::json!({ "kit": "archer" }),
            true,
        );
        let response = router.clone().oneshot(restriction).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/arenas/missing")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn queue_pairs_over_http() {
        let dir = tempfile::tempdir().unwrap();
        let (router, state) = app(&dir);
        setup_arena(&router).await;

        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        for p in [a, b] {
            let request = Request::builder()
                .method("POST")
                .uri(format!("/players/{}/connect", p))
                .body(Body::empty())
                .unwrap();
            let response = router.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::NO_CONTENT);
        }

        let join = |p: Uuid| {
            json_request(
                "POST",
                "/queue/join",
                serde_json::json!({ "player": p, "kit": "NoDebuff", "queue_class": "unranked" }),
                false,
            )
        };
        let body = body_json(router.clone().oneshot(join(a)).await.unwrap()).await;
        assert_eq!(body["status"], "queued");

        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/queue/{}", a))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let entry = body_json(response).await;
        assert_eq!(entry["kit"], "NoDebuff");
        assert_eq!(entry["wait_secs"], 0);

        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/queue/size?class=unranked&kit=nodebuff")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(body_json(response).await["size"], 1);

        let body = body_json(router.clone().oneshot(join(b)).await.unwrap()).await;
        assert_eq!(body["status"], "matched");
        assert_eq!(body["match"]["arena"], "arena1");
        assert!(state.matches.is_in_match(a));

        let forfeit = json_request("POST", "/matches/forfeit", serde_json::json!({ "player": a }), false);
        let body = body_json(router.clone().oneshot(forfeit).await.unwrap()).await;
        assert_eq!(body["winner"], b.to_string());
        assert!(!state.matches.is_in_match(b));
    }

    #[tokio::test]
    async fn offline_and_unknown_kit_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (router, state) = app(&dir);
        let player = Uuid::new_v4();

        let join = json_request(
            "POST",
            "/queue/join",
            serde_json::json!({ "player": player, "kit": "NoDebuff", "queue_class": "ranked" }),
            false,
        );
        let response = router.clone().oneshot(join).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        state.player_joined(player);
        let join = json_request(
            "POST",
            "/queue/join",
            serde_json::json!({ "player": player, "kit": "archer", "queue_class": "ranked" }),
            false,
        );
        let response = router.oneshot(join).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
