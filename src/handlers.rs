// HTTP request handlers for the market API.
//
// Trade endpoints are asynchronous: validation that needs no market-state
// read happens here, then the intent is queued and the client gets a 202 with
// a request id to poll. Everything that touches q_yes/q_no goes through the
// settlement worker.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use serde_json::{json, Value};
use std::str::FromStr;

use crate::app_state::SharedState;
use crate::errors::TradeError;
use crate::models::{
    CreateMarketRequest, CreditRequest, Market, PlaceBetRequest, ResolveMarketRequest,
    SellSharesRequest, Side, UndoBetRequest,
};

type ApiError = (StatusCode, Json<Value>);

fn error_response(err: TradeError) -> ApiError {
    let status = match err {
        TradeError::MarketNotFound(_) | TradeError::PositionNotFound(_) => StatusCode::NOT_FOUND,
        TradeError::MarketNotOpen(_) | TradeError::AlreadyResolved(_) => StatusCode::CONFLICT,
        TradeError::InsufficientBalance(_)
        | TradeError::InvalidAmount(_)
        | TradeError::InvalidTrade(_)
        | TradeError::InvalidOutcome(_) => StatusCode::BAD_REQUEST,
    };
    (status, Json(json!({ "success": false, "error": err.to_string() })))
}

fn bad_request(message: &str) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "success": false, "error": message })),
    )
}

/// Live LMSR prices while the market trades; terminal 1.0/0.0 once resolved.
fn market_prices(state: &SharedState, market: &Market) -> (f64, f64) {
    match market.resolution {
        Some(Side::Yes) => (1.0, 0.0),
        Some(Side::No) => (0.0, 1.0),
        None => state
            .states
            .prices(&market.id, &state.lmsr)
            .unwrap_or((0.5, 0.5)),
    }
}

fn market_json(state: &SharedState, market: &Market) -> Value {
    let (yes_price, no_price) = market_prices(state, market);
    let (yes_volume, no_volume, position_count) = market.volume_totals();
    json!({
        "id": market.id,
        "question": market.question,
        "description": market.description,
        "category": market.category,
        "status": market.status,
        "resolution": market.resolution,
        "created_at": market.created_at,
        "yes_price": yes_price,
        "no_price": no_price,
        "yes_volume": yes_volume,
        "no_volume": no_volume,
        "total_volume": yes_volume + no_volume,
        "position_count": position_count,
    })
}

// ===== HEALTH =====

pub async fn health_check(State(state): State<SharedState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "markets": state.book.list().len(),
        "queue_depth": state.pipeline.queue_depth(),
        "state_repairs": state.states.repair_count(),
    }))
}

// ===== MARKET ENDPOINTS =====

pub async fn get_markets(State(state): State<SharedState>) -> Json<Value> {
    let mut open = Vec::new();
    let mut resolved = Vec::new();
    for market in state.book.list() {
        let body = market_json(&state, &market);
        if market.status.is_open() {
            open.push(body);
        } else {
            resolved.push(body);
        }
    }
    Json(json!({ "markets": open, "resolved": resolved }))
}

pub async fn create_market(
    State(state): State<SharedState>,
    Json(request): Json<CreateMarketRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if request.question.trim().is_empty() {
        return Err(bad_request("question is required"));
    }
    let market = state.create_market(request.question, request.description, request.category);
    Ok((StatusCode::CREATED, Json(market_json(&state, &market))))
}

pub async fn get_market(
    State(state): State<SharedState>,
    Path(market_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let market = state
        .book
        .get(&market_id)
        .ok_or_else(|| error_response(TradeError::MarketNotFound(market_id.clone())))?;
    let mut body = market_json(&state, &market);
    body["positions"] = json!(market.positions);
    Ok(Json(body))
}

pub async fn get_market_price(
    State(state): State<SharedState>,
    Path(market_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let market = state
        .book
        .get(&market_id)
        .ok_or_else(|| error_response(TradeError::MarketNotFound(market_id.clone())))?;
    let (yes_price, no_price) = market_prices(&state, &market);
    Ok(Json(json!({
        "market_id": market_id,
        "status": market.status,
        "yes_price": yes_price,
        "no_price": no_price,
    })))
}

// ===== TRADE ENDPOINTS (ASYNC, 202 + POLL) =====

pub async fn place_bet(
    State(state): State<SharedState>,
    Path(market_id): Path<String>,
    Json(request): Json<PlaceBetRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if request.wallet.trim().is_empty() {
        return Err(bad_request("wallet is required"));
    }
    let side = Side::from_str(&request.side)
        .map_err(|_| error_response(TradeError::InvalidOutcome(request.side.clone())))?;
    if !request.amount.is_finite() || request.amount <= 0.0 {
        return Err(error_response(TradeError::InvalidAmount(format!(
            "amount must be positive, got {}",
            request.amount
        ))));
    }
    // Fail fast on closed/unknown markets; the worker re-checks under lock.
    state.book.ensure_open(&market_id).map_err(error_response)?;

    let (request_id, queue_position) =
        state
            .pipeline
            .submit_buy(&market_id, &request.wallet, side, request.amount);

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "success": true,
            "status": "queued",
            "request_id": request_id,
            "queue_position": queue_position,
        })),
    ))
}

pub async fn sell_shares(
    State(state): State<SharedState>,
    Path(market_id): Path<String>,
    Json(request): Json<SellSharesRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if request.wallet.trim().is_empty() {
        return Err(bad_request("wallet is required"));
    }
    if !request.shares.is_finite() || request.shares <= 0.0 {
        return Err(error_response(TradeError::InvalidAmount(
            "shares must be positive".to_string(),
        )));
    }
    state.book.ensure_open(&market_id).map_err(error_response)?;

    let (request_id, queue_position) = state.pipeline.submit_sell(
        &market_id,
        &request.wallet,
        &request.position_id,
        request.shares,
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "success": true,
            "status": "queued",
            "request_id": request_id,
            "queue_position": queue_position,
        })),
    ))
}

pub async fn undo_bet(
    State(state): State<SharedState>,
    Path(market_id): Path<String>,
    Json(request): Json<UndoBetRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if request.wallet.trim().is_empty() {
        return Err(bad_request("wallet is required"));
    }
    state.book.ensure_open(&market_id).map_err(error_response)?;

    let (request_id, queue_position) =
        state
            .pipeline
            .submit_undo(&market_id, &request.wallet, &request.position_id);

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "success": true,
            "status": "queued",
            "request_id": request_id,
            "queue_position": queue_position,
        })),
    ))
}

/// Poll a queued trade. 200 with the terminal result once settled, 202 while
/// still in the queue. Results are single-delivery: a second poll on the same
/// id comes back 202 again, so clients must keep the body they got.
pub async fn get_bet_status(
    State(state): State<SharedState>,
    Path(request_id): Path<String>,
) -> (StatusCode, Json<Value>) {
    match state.pipeline.poll(&request_id) {
        Some(result) => (StatusCode::OK, Json(json!(result))),
        None => (
            StatusCode::ACCEPTED,
            Json(json!({
                "status": "processing",
                "request_id": request_id,
                "queue_depth": state.pipeline.queue_depth(),
            })),
        ),
    }
}

// ===== RESOLUTION =====

pub async fn resolve_market(
    State(state): State<SharedState>,
    Path(market_id): Path<String>,
    Json(request): Json<ResolveMarketRequest>,
) -> Result<Json<Value>, ApiError> {
    let outcome = Side::from_str(&request.outcome)
        .map_err(|_| error_response(TradeError::InvalidOutcome(request.outcome.clone())))?;

    let summary = state
        .book
        .resolve_and_pay(
            &state.ledger,
            &market_id,
            outcome,
            state.config.profit_fee_rate,
        )
        .map_err(error_response)?;

    Ok(Json(json!({ "success": true, "resolution": summary })))
}

// ===== LEDGER ENDPOINTS =====

pub async fn get_balance(
    State(state): State<SharedState>,
    Path(wallet): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if wallet.trim().is_empty() {
        return Err(bad_request("wallet is required"));
    }
    let is_new_user = !state.ledger.exists(&wallet);
    let balance = state.ledger.balance(&wallet);
    Ok(Json(json!({
        "wallet": wallet.trim().to_lowercase(),
        "balance": balance,
        "is_new_user": is_new_user,
    })))
}

pub async fn credit_wallet(
    State(state): State<SharedState>,
    Path(wallet): Path<String>,
    Json(request): Json<CreditRequest>,
) -> Result<Json<Value>, ApiError> {
    if !request.amount.is_finite() || request.amount <= 0.0 {
        return Err(error_response(TradeError::InvalidAmount(
            "amount must be positive".to_string(),
        )));
    }
    let new_balance = state.ledger.credit(&wallet, request.amount);
    Ok(Json(json!({
        "success": true,
        "wallet": wallet.trim().to_lowercase(),
        "balance": new_balance,
    })))
}

/// Every position the wallet holds, across all markets, with its status and
/// current or final value.
pub async fn get_user_bets(
    State(state): State<SharedState>,
    Path(wallet): Path<String>,
) -> Json<Value> {
    let wallet = wallet.trim().to_lowercase();
    let mut bets = Vec::new();

    for market in state.book.list() {
        let positions = market.positions_for_wallet(&wallet);
        if positions.is_empty() {
            continue;
        }
        let (yes_price, no_price) = market_prices(&state, &market);

        for position in positions {
            let (status, current_value) = match (market.status.is_open(), market.resolution) {
                (true, _) => {
                    let price = match position.side {
                        Side::Yes => yes_price,
                        Side::No => no_price,
                    };
                    ("pending", position.shares * price)
                }
                (false, Some(outcome)) if outcome == position.side => {
                    ("won", position.shares * 1.0)
                }
                (false, _) => ("lost", 0.0),
            };

            bets.push(json!({
                "position_id": position.id,
                "market_id": market.id,
                "question": market.question,
                "side": position.side,
                "amount": position.amount,
                "shares": position.shares,
                "price_per_share": position.price_per_share,
                "status": status,
                "current_value": current_value,
                "unrealized_profit": current_value - position.amount,
                "created_at": position.created_at,
            }));
        }
    }

    Json(json!({ "wallet": wallet, "bets": bets }))
}
