//! REST + SSE surface over the engine.
//!
//! Handlers parse and validate the wire shape, call one engine operation and
//! translate the result. Every engine error goes through [`ApiError`].

use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{MatchedPath, Path, Query, Request, State};
use axum::http::header::HeaderName;
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_stream::wrappers::BroadcastStream;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, warn};
use ulid::Ulid;

use crate::config::{Config, POLL_INTERVAL_MS};
use crate::engine::{ConflictReason, Engine, EngineError, SeatSnapshot, SeatView};
use crate::layout::{LayoutError, ScreenConfig, SeatMap};
use crate::model::*;
use crate::observability;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub config: Arc<Config>,
}

pub type ApiResult<T> = Result<T, ApiError>;

// ── Errors ─────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    error: String,
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    unavailable_seats: Option<Vec<SeatId>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    messages: Option<Vec<String>>,
}

/// Error response with a stable machine-readable code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    unavailable_seats: Option<Vec<SeatId>>,
    messages: Option<Vec<String>>,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            unavailable_seats: None,
            messages: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn conflict(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, code, message)
    }

    pub const fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        let message = e.to_string();
        match e {
            EngineError::ShowtimeNotFound(_)
            | EngineError::ScreenNotFound(_)
            | EngineError::BookingNotFound(_) => ApiError::not_found(message),
            EngineError::Conflict(c) => {
                let code = match c.reason {
                    ConflictReason::Unavailable => "SEATS_UNAVAILABLE",
                    ConflictReason::HoldExpired => "HOLD_EXPIRED",
                };
                let mut err = ApiError::conflict(code, message);
                err.unavailable_seats = Some(c.seat_ids);
                err
            }
            EngineError::StaleVersion { .. } => ApiError::conflict("STALE_VERSION", message),
            EngineError::LayoutLocked(_) => ApiError::conflict("LAYOUT_LOCKED", message),
            EngineError::ScreenInUse(_) => ApiError::conflict("SCREEN_IN_USE", message),
            EngineError::BookingCancelled(_) => ApiError::conflict("BOOKING_CANCELLED", message),
            EngineError::AlreadyExists(_) => ApiError::conflict("ALREADY_EXISTS", message),
            EngineError::Layout(LayoutError::Invalid(messages)) => {
                let mut err = ApiError::new(
                    StatusCode::BAD_REQUEST,
                    "INVALID_LAYOUT",
                    "screen layout is invalid",
                );
                err.messages = Some(messages);
                err
            }
            EngineError::Layout(_) => {
                ApiError::new(StatusCode::BAD_REQUEST, "INVALID_LAYOUT", message)
            }
            EngineError::UnknownSeats(seats) => {
                let mut err = ApiError::new(StatusCode::BAD_REQUEST, "UNKNOWN_SEATS", message);
                err.unavailable_seats = Some(seats);
                err
            }
            EngineError::InvalidRequest(_) => ApiError::bad_request(message),
            EngineError::LimitExceeded(_) => {
                ApiError::new(StatusCode::BAD_REQUEST, "LIMIT_EXCEEDED", message)
            }
            EngineError::Integrity { .. } => ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTEGRITY",
                "Your seat selection is no longer valid. Please restart from seat selection.",
            ),
            EngineError::WalError(_) => ApiError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "UNAVAILABLE",
                "storage unavailable, retry shortly",
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = %self.status, code = self.code, "{}", self.message);
        }
        let body = ErrorBody {
            error: self.message,
            code: self.code,
            unavailable_seats: self.unavailable_seats,
            messages: self.messages,
        };
        (self.status, Json(body)).into_response()
    }
}

fn parse_seats(raw: &[String]) -> ApiResult<Vec<SeatId>> {
    let mut seats = Vec::with_capacity(raw.len());
    let mut invalid = Vec::new();
    for s in raw {
        match s.parse::<SeatId>() {
            Ok(id) => seats.push(id),
            Err(_) => invalid.push(s.as_str()),
        }
    }
    if !invalid.is_empty() {
        return Err(ApiError::bad_request(format!("invalid seat ids: {}", invalid.join(", "))));
    }
    Ok(seats)
}

fn parse_ulid(what: &str, raw: &str) -> ApiResult<Ulid> {
    raw.parse()
        .map_err(|_| ApiError::bad_request(format!("invalid {what}: {raw:?}")))
}

// ── Wire shapes ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewerQuery {
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatBody {
    pub id: SeatId,
    pub row: char,
    pub number: u8,
    pub status: SeatView,
    pub category_id: Option<String>,
    pub price: f64,
    pub is_booked: bool,
    pub is_held: bool,
}

impl From<SeatSnapshot> for SeatBody {
    fn from(s: SeatSnapshot) -> Self {
        Self {
            is_booked: s.view == SeatView::Booked,
            is_held: matches!(s.view, SeatView::HeldByMe | SeatView::HeldByOther),
            id: s.seat_id,
            row: s.row,
            number: s.number,
            status: s.view,
            category_id: s.category_id,
            price: s.price,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SeatDelta {
    seat_id: SeatId,
    status: SeatView,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldRequest {
    pub showtime_id: String,
    pub seat_ids: Vec<String>,
    pub session_id: String,
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseRequest {
    pub showtime_id: String,
    pub seat_ids: Vec<String>,
    pub session_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldBody {
    pub session_id: String,
    pub showtime_id: String,
    pub seat_ids: Vec<SeatId>,
    pub expires_at: Ms,
}

impl From<HoldSession> for HoldBody {
    fn from(s: HoldSession) -> Self {
        Self {
            session_id: s.holder_token,
            showtime_id: s.showtime_id,
            seat_ids: s.seat_ids,
            expires_at: s.expires_at,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRequest {
    pub showtime_id: String,
    pub seat_ids: Vec<String>,
    pub session_id: String,
    pub customer_name: String,
    pub customer_email: String,
    #[serde(default)]
    pub customer_phone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingBody {
    pub id: Ulid,
    pub showtime_id: String,
    pub seat_ids: Vec<SeatId>,
    pub holder_token: String,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: Option<String>,
    pub total_amount: f64,
    pub ticket_number: String,
    pub status: BookingStatus,
    pub created_at: Ms,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancellation_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refund_amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<Ms>,
}

impl From<Booking> for BookingBody {
    fn from(b: Booking) -> Self {
        Self {
            id: b.id,
            showtime_id: b.showtime_id,
            seat_ids: b.seat_ids,
            holder_token: b.holder_token,
            customer_name: b.customer.name,
            customer_email: b.customer.email,
            customer_phone: b.customer.phone,
            total_amount: b.total_amount,
            ticket_number: b.ticket_number,
            status: b.status,
            created_at: b.created_at,
            cancellation_reason: b.cancellation_reason,
            refund_amount: b.refund_amount,
            cancelled_at: b.cancelled_at,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRequest {
    pub showtime_id: String,
    pub screen_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShowtimeBody {
    pub showtime_id: String,
    pub screen_id: Ulid,
    pub initialized: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_seats: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenBody {
    pub id: Ulid,
    pub total_seats: usize,
    #[serde(flatten)]
    pub config: ScreenConfig,
}

impl From<&SeatMap> for ScreenBody {
    fn from(map: &SeatMap) -> Self {
        Self {
            id: map.screen_id,
            total_seats: map.total_seats(),
            config: map.to_config(),
        }
    }
}

// ── Seats ──────────────────────────────────────────────────────────

async fn seat_snapshot(
    State(state): State<AppState>,
    Path(showtime_id): Path<String>,
    Query(q): Query<ViewerQuery>,
) -> impl IntoResponse {
    let seats: Vec<SeatBody> = state
        .engine
        .snapshot(&showtime_id, q.session_id.as_deref())
        .await
        .into_iter()
        .map(SeatBody::from)
        .collect();
    (
        [(HeaderName::from_static("x-poll-interval-ms"), HeaderValue::from(POLL_INTERVAL_MS))],
        Json(seats),
    )
}

async fn initialize_showtime(
    State(state): State<AppState>,
    Path(showtime_id): Path<String>,
) -> ApiResult<Json<ShowtimeBody>> {
    let seats = state.engine.initialize_showtime(&showtime_id).await?;
    Ok(Json(ShowtimeBody {
        showtime_id,
        screen_id: seats.screen_id,
        initialized: true,
        total_seats: Some(seats.len()),
    }))
}

/// Caller-relative deltas for one showtime. A subscriber that falls behind
/// gets a `resync` event and should re-fetch the snapshot.
async fn seat_stream(
    State(state): State<AppState>,
    Path(showtime_id): Path<String>,
    Query(q): Query<ViewerQuery>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = state.engine.notify.subscribe(&showtime_id);
    let engine = state.engine.clone();
    let viewer = q.session_id;
    debug!(showtime_id, "seat stream opened");

    let stream = BroadcastStream::new(rx).filter_map(move |item| {
        let event = match item {
            Ok(change) => {
                let deltas: Vec<SeatDelta> = engine
                    .view_change(&change, viewer.as_deref())
                    .into_iter()
                    .map(|s| SeatDelta {
                        seat_id: s.seat_id,
                        status: s.view,
                    })
                    .collect();
                SseEvent::default().event("seats").json_data(&deltas).ok()
            }
            Err(lagged) => {
                warn!("seat stream subscriber lagged: {lagged}");
                Some(SseEvent::default().event("resync").data("lagged"))
            }
        };
        std::future::ready(event.map(Ok))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn hold_seats(
    State(state): State<AppState>,
    Json(req): Json<HoldRequest>,
) -> ApiResult<Json<HoldBody>> {
    let seats = parse_seats(&req.seat_ids)?;
    let ttl_ms = state.config.hold_ttl_ms(req.ttl_seconds);
    let session = state
        .engine
        .request_hold(&req.showtime_id, &seats, &req.session_id, ttl_ms)
        .await?;
    Ok(Json(session.into()))
}

async fn extend_hold(
    State(state): State<AppState>,
    Json(req): Json<HoldRequest>,
) -> ApiResult<Json<HoldBody>> {
    let seats = parse_seats(&req.seat_ids)?;
    let ttl_ms = state.config.hold_ttl_ms(req.ttl_seconds);
    let session = state
        .engine
        .extend_hold(&req.showtime_id, &req.session_id, &seats, ttl_ms)
        .await?;
    Ok(Json(session.into()))
}

async fn release_seats(
    State(state): State<AppState>,
    Json(req): Json<ReleaseRequest>,
) -> ApiResult<StatusCode> {
    let seats = parse_seats(&req.seat_ids)?;
    let released = state
        .engine
        .release_hold(&req.showtime_id, &req.session_id, &seats)
        .await?;
    debug!(showtime_id = req.showtime_id, released, "release handled");
    Ok(StatusCode::NO_CONTENT)
}

// ── Bookings ───────────────────────────────────────────────────────

async fn create_booking(
    State(state): State<AppState>,
    Json(req): Json<BookingRequest>,
) -> ApiResult<(StatusCode, Json<BookingBody>)> {
    let seats = parse_seats(&req.seat_ids)?;
    let customer = Customer {
        name: req.customer_name,
        email: req.customer_email,
        phone: req.customer_phone.filter(|p| !p.trim().is_empty()),
    };
    let booking = state
        .engine
        .confirm_booking(&req.showtime_id, &req.session_id, &seats, customer)
        .await?;
    Ok((StatusCode::CREATED, Json(booking.into())))
}

async fn get_booking(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<BookingBody>> {
    let id = parse_ulid("booking id", &id)?;
    let booking = state
        .engine
        .get_booking(&id)
        .ok_or(EngineError::BookingNotFound(id))?;
    Ok(Json(booking.into()))
}

async fn cancel_booking(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<BookingBody>> {
    let id = parse_ulid("booking id", &id)?;
    // The body is optional; an empty one means no reason.
    let reason = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        serde_json::from_slice::<CancelRequest>(&body)
            .map_err(|e| ApiError::bad_request(format!("invalid cancel request: {e}")))?
            .reason
    };
    let booking = state.engine.cancel_booking(id, reason).await?;
    Ok(Json(booking.into()))
}

// ── Admin ──────────────────────────────────────────────────────────

async fn schedule_showtime(
    State(state): State<AppState>,
    Json(req): Json<ScheduleRequest>,
) -> ApiResult<Json<ShowtimeBody>> {
    let screen_id = parse_ulid("screen id", &req.screen_id)?;
    state.engine.schedule_showtime(&req.showtime_id, screen_id).await?;
    Ok(Json(ShowtimeBody {
        initialized: state.engine.is_initialized(&req.showtime_id),
        showtime_id: req.showtime_id,
        screen_id,
        total_seats: None,
    }))
}

async fn list_screens(State(state): State<AppState>) -> Json<Vec<ScreenBody>> {
    Json(state.engine.list_screens().iter().map(ScreenBody::from).collect())
}

async fn get_screen(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ScreenBody>> {
    let id = parse_ulid("screen id", &id)?;
    let map = state.engine.get_screen(&id).ok_or(EngineError::ScreenNotFound(id))?;
    Ok(Json(ScreenBody::from(&map)))
}

async fn create_screen(
    State(state): State<AppState>,
    Json(cfg): Json<ScreenConfig>,
) -> ApiResult<(StatusCode, Json<ScreenBody>)> {
    let map = state.engine.create_screen(&cfg).await?;
    Ok((StatusCode::CREATED, Json(ScreenBody::from(&map))))
}

async fn update_screen(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(cfg): Json<ScreenConfig>,
) -> ApiResult<Json<ScreenBody>> {
    let id = parse_ulid("screen id", &id)?;
    let map = state.engine.update_screen(id, &cfg).await?;
    Ok(Json(ScreenBody::from(&map)))
}

async fn delete_screen(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = parse_ulid("screen id", &id)?;
    state.engine.delete_screen(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Router ─────────────────────────────────────────────────────────

async fn track_metrics(req: Request, next: Next) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".into());
    let start = Instant::now();
    let response = next.run(req).await;
    let status = response.status().as_u16().to_string();
    metrics::counter!(
        observability::HTTP_REQUESTS_TOTAL,
        "route" => route.clone(),
        "status" => status
    )
    .increment(1);
    metrics::histogram!(observability::HTTP_REQUEST_DURATION_SECONDS, "route" => route)
        .record(start.elapsed().as_secs_f64());
    response
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/seats/showtime/{id}", get(seat_snapshot))
        .route("/seats/showtime/{id}/initialize", post(initialize_showtime))
        .route("/seats/showtime/{id}/stream", get(seat_stream))
        .route("/seats/hold", post(hold_seats))
        .route("/seats/extend", post(extend_hold))
        .route("/seats/release", post(release_seats))
        .route("/bookings", post(create_booking))
        .route("/bookings/{id}", get(get_booking))
        .route("/bookings/{id}/cancel", post(cancel_booking))
        .route("/admin/showtimes", post(schedule_showtime))
        .route("/admin/screens", get(list_screens).post(create_screen))
        .route(
            "/admin/screens/{id}",
            get(get_screen).put(update_screen).delete(delete_screen),
        )
        .route_layer(middleware::from_fn(track_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `shutdown` resolves, then drain in-flight requests.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
