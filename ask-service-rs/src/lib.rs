// ask-service-rs/src/lib.rs
// Election Analytics Query Assistant - HTTP surface
//
// Single-process REST service over the election store:
// - POST /ask runs the NL-to-SQL pipeline (generation, validation,
//   execution, one repair round, narration)
// - GET /overview/* and /constituency/* serve fixed analytics straight from
//   the store, with a TTL cache in front of the aggregate queries
// - GET /health and GET / for liveness and discovery

pub mod cache;
pub mod orchestrator;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};

use cache::OverviewCache;
use election_store::{ElectionStore, StoreError, ToSql};
use llm_client::TextGenerator;
use orchestrator::{AskError, AskOutcome, AskPipeline};

pub static START_TIME: Lazy<Instant> = Lazy::new(Instant::now);

const NAIL_BITER_DEFAULT_LIMIT: i64 = 10;
const NAIL_BITER_MAX_LIMIT: i64 = 100;

/// Shared application state
pub struct AppState {
    pipeline: AskPipeline,
    store: Arc<ElectionStore>,
    cache: OverviewCache,
    service_name: String,
}

impl AppState {
    pub fn new(generator: Arc<dyn TextGenerator>, store: Arc<ElectionStore>) -> Self {
        let schema_description = store.schema_description().to_string();
        let pipeline = AskPipeline::new(generator, store.clone(), schema_description);
        Self {
            pipeline,
            store,
            cache: OverviewCache::with_defaults(),
            service_name: config_rs::get_formatted_service_name("ASK"),
        }
    }

    async fn cached_rows(
        &self,
        key: &str,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Value, ApiError> {
        if let Some(hit) = self.cache.get(key).await {
            return Ok(hit);
        }
        let result = self.store.query(sql, params).await?;
        let value = Value::Array(result.rows.into_iter().map(Value::Object).collect());
        self.cache.put(key, value.clone()).await;
        Ok(value)
    }
}

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub question: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub service_name: String,
    pub uptime_seconds: i64,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Ask(#[from] AskError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{0}")]
    NotFound(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Ask(AskError::EmptyQuestion) => StatusCode::BAD_REQUEST,
            ApiError::Ask(AskError::ValidationRejected(_))
            | ApiError::Ask(AskError::StoreExecution(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Ask(AskError::Generation(_)) | ApiError::Ask(AskError::Narration(_)) => {
                StatusCode::BAD_GATEWAY
            }
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorResponse {
            error: self.to_string(),
            code: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

/// POST /ask - Natural-language question over the election dataset
async fn ask_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AskRequest>,
) -> Result<Json<AskOutcome>, ApiError> {
    let request_id = uuid::Uuid::new_v4();
    log::info!(
        "[{}] /ask received (question length: {})",
        request_id,
        request.question.len()
    );

    match state.pipeline.ask(&request.question).await {
        Ok(outcome) => {
            log::info!("[{}] /ask completed: {} rows", request_id, outcome.rows.len());
            Ok(Json(outcome))
        }
        Err(err) => {
            log::error!(
                "{}",
                serde_json::json!({
                    "event_type": "ASK_FAILURE",
                    "service": state.service_name,
                    "request_id": request_id.to_string(),
                    "stage": err.stage(),
                    "error": err.to_string(),
                })
            );
            Err(err.into())
        }
    }
}

/// GET /health - Health check endpoint
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        healthy: true,
        service_name: state.service_name.clone(),
        uptime_seconds: START_TIME.elapsed().as_secs() as i64,
        status: "SERVING".to_string(),
    })
}

/// GET / - Root endpoint
async fn root_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "service": "Election Analytics Query Assistant",
        "version": "1.0.0",
        "endpoints": [
            "GET /health",
            "POST /ask",
            "GET /overview/parties",
            "GET /overview/alliances",
            "GET /overview/party_performance?min_seats_won=0&min_vote_share=0",
            "GET /overview/nota",
            "GET /overview/nail_biters?limit=10",
            "GET /analytics/relevant-parties",
            "GET /analytics/opponents?party=BJP",
            "GET /analytics/head-to-head?party1=BJP&party2=RJD",
            "GET /party/analytics?party_short=BJP",
            "GET /constituency/search?q=name",
            "GET /constituency/detail?ac_no=1"
        ]
    }))
}

/// GET /overview/parties - Party-level results with alliances and shares
async fn overview_parties(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let rows = state
        .cached_rows(
            "overview:parties",
            "SELECT party_short, party_canonical, alliance, seats_won, total_votes, vote_share \
             FROM party_summary_enriched \
             ORDER BY seats_won DESC, total_votes DESC",
            &[],
        )
        .await?;
    Ok(Json(rows))
}

/// GET /overview/alliances - Alliance-level results
async fn overview_alliances(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let rows = state
        .cached_rows(
            "overview:alliances",
            "SELECT alliance, seats_won, total_votes, vote_share, seat_share, seat_vote_gap \
             FROM alliance_summary \
             ORDER BY seats_won DESC",
            &[],
        )
        .await?;
    Ok(Json(rows))
}

/// GET /overview/nota - NOTA rollup
async fn overview_nota(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let rows = state
        .cached_rows(
            "overview:nota",
            "SELECT total_nota_votes, total_votes, nota_vote_share, \
                    num_acs_over_2pct, num_acs_over_5pct \
             FROM nota_summary",
            &[],
        )
        .await?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
pub struct PartyPerformanceParams {
    #[serde(default)]
    min_seats_won: i64,
    #[serde(default)]
    min_vote_share: f64,
}

/// GET /overview/party_performance - Strike rate and efficiency metrics
async fn overview_party_performance(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PartyPerformanceParams>,
) -> Result<Json<Value>, ApiError> {
    let rows = state
        .cached_rows(
            &format!(
                "overview:party_performance:{}:{}",
                params.min_seats_won, params.min_vote_share
            ),
            "SELECT party_short, party_canonical, alliance, seats_contested, seats_won, \
                    strike_rate, avg_votes_per_seat, vote_pct_contested, state_vote_share, \
                    seat_share, seat_vote_gap \
             FROM party_performance \
             WHERE seats_won >= ?1 OR state_vote_share >= ?2 \
             ORDER BY state_vote_share DESC",
            &[&params.min_seats_won as &(dyn ToSql + Sync), &params.min_vote_share as &(dyn ToSql + Sync)],
        )
        .await?;
    Ok(Json(rows))
}

/// GET /analytics/relevant-parties - Parties that finished first or second
/// somewhere (independents excluded)
async fn analytics_relevant_parties(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, ApiError> {
    let rows = state
        .cached_rows(
            "analytics:relevant_parties",
            "SELECT ps.party_short \
             FROM party_summary_enriched ps \
             WHERE ps.party_short IN ( \
                 SELECT winner_party_short FROM constituency_margins \
                  WHERE winner_party_short IS NOT NULL \
                 UNION \
                 SELECT runner_party_short FROM constituency_margins \
                  WHERE runner_party_short IS NOT NULL \
             ) \
             AND ps.party_short <> 'IND' \
             ORDER BY ps.seats_won DESC, ps.total_votes DESC",
            &[],
        )
        .await?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
pub struct OpponentsParams {
    party: String,
}

/// GET /analytics/opponents - Relevant parties sharing constituencies with
/// the given party, by number of shared contests
async fn analytics_opponents(
    State(state): State<Arc<AppState>>,
    Query(params): Query<OpponentsParams>,
) -> Result<Json<Value>, ApiError> {
    let rows = state
        .cached_rows(
            &format!("analytics:opponents:{}", params.party),
            "WITH relevant_parties AS ( \
                 SELECT DISTINCT winner_party_short AS p FROM constituency_margins \
                  WHERE winner_party_short IS NOT NULL \
                 UNION \
                 SELECT DISTINCT runner_party_short AS p FROM constituency_margins \
                  WHERE runner_party_short IS NOT NULL \
             ) \
             SELECT t2.party_short, t2.alliance, COUNT(*) AS contests \
             FROM candidates_enriched t1 \
             JOIN candidates_enriched t2 ON t1.ac_no = t2.ac_no \
             WHERE t1.party_short = ?1 AND t2.party_short <> ?1 \
               AND t2.party_short IN (SELECT p FROM relevant_parties) \
               AND t2.party_short <> 'IND' \
             GROUP BY t2.party_short, t2.alliance \
             ORDER BY contests DESC",
            &[&params.party as &(dyn ToSql + Sync)],
        )
        .await?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
pub struct HeadToHeadParams {
    party1: String,
    party2: String,
}

/// GET /analytics/head-to-head - Constituency-level comparison of two
/// parties wherever both contested
async fn analytics_head_to_head(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HeadToHeadParams>,
) -> Result<Json<Value>, ApiError> {
    let rows = state
        .cached_rows(
            &format!("analytics:head_to_head:{}:{}", params.party1, params.party2),
            "WITH valid_contests AS ( \
                 SELECT DISTINCT t1.ac_no \
                 FROM candidates_enriched t1 \
                 JOIN candidates_enriched t2 ON t1.ac_no = t2.ac_no \
                 WHERE t1.party_short = ?1 AND t2.party_short = ?2 \
             ) \
             SELECT \
                 c.ac_no, c.ac_name, \
                 MAX(CASE WHEN c.party_short = ?1 THEN c.total_votes END) AS p1_votes, \
                 MAX(CASE WHEN c.party_short = ?1 THEN c.vote_percent END) AS p1_pct, \
                 MAX(CASE WHEN c.party_short = ?2 THEN c.total_votes END) AS p2_votes, \
                 MAX(CASE WHEN c.party_short = ?2 THEN c.vote_percent END) AS p2_pct, \
                 (SELECT party_short FROM candidates_enriched w \
                   WHERE w.ac_no = c.ac_no AND w.is_winner = 1) AS actual_winner \
             FROM candidates_enriched c \
             JOIN valid_contests vc ON c.ac_no = vc.ac_no \
             WHERE c.party_short IN (?1, ?2) \
             GROUP BY c.ac_no, c.ac_name \
             ORDER BY c.ac_no",
            &[&params.party1 as &(dyn ToSql + Sync), &params.party2 as &(dyn ToSql + Sync)],
        )
        .await?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
pub struct PartyAnalyticsParams {
    party_short: String,
}

/// GET /party/analytics - Finishing-position and vote-band histogram for
/// one party
async fn party_analytics(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PartyAnalyticsParams>,
) -> Result<Json<Value>, ApiError> {
    let rows = state
        .cached_rows(
            &format!("party:analytics:{}", params.party_short),
            "WITH ranked_candidates AS ( \
                 SELECT ac_no, party_short, vote_percent, \
                        ROW_NUMBER() OVER ( \
                            PARTITION BY ac_no ORDER BY total_votes DESC \
                        ) AS rnk \
                 FROM candidates_enriched \
             ) \
             SELECT \
                 SUM(CASE WHEN rnk = 1 THEN 1 ELSE 0 END) AS pos_1, \
                 SUM(CASE WHEN rnk = 2 THEN 1 ELSE 0 END) AS pos_2, \
                 SUM(CASE WHEN rnk = 3 THEN 1 ELSE 0 END) AS pos_3, \
                 SUM(CASE WHEN rnk = 4 THEN 1 ELSE 0 END) AS pos_4, \
                 SUM(CASE WHEN rnk >= 5 THEN 1 ELSE 0 END) AS pos_5_plus, \
                 SUM(CASE WHEN vote_percent >= 50 THEN 1 ELSE 0 END) AS vote_gt_50, \
                 SUM(CASE WHEN vote_percent >= 40 AND vote_percent < 50 THEN 1 ELSE 0 END) AS vote_40_50, \
                 SUM(CASE WHEN vote_percent >= 25 AND vote_percent < 40 THEN 1 ELSE 0 END) AS vote_25_40, \
                 SUM(CASE WHEN vote_percent >= 10 AND vote_percent < 25 THEN 1 ELSE 0 END) AS vote_10_25, \
                 SUM(CASE WHEN vote_percent < 10 THEN 1 ELSE 0 END) AS vote_lt_10, \
                 COUNT(*) AS total_seats_contested \
             FROM ranked_candidates \
             WHERE party_short = ?1",
            &[&params.party_short as &(dyn ToSql + Sync)],
        )
        .await?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
pub struct NailBiterParams {
    #[serde(default = "default_nail_biter_limit")]
    limit: i64,
}

fn default_nail_biter_limit() -> i64 {
    NAIL_BITER_DEFAULT_LIMIT
}

/// GET /overview/nail_biters - Contests decided by 2% of the vote or less
async fn overview_nail_biters(
    State(state): State<Arc<AppState>>,
    Query(params): Query<NailBiterParams>,
) -> Result<Json<Value>, ApiError> {
    let limit = params.limit.clamp(1, NAIL_BITER_MAX_LIMIT);
    let rows = state
        .cached_rows(
            &format!("overview:nail_biters:{}", limit),
            "SELECT ac_no, ac_name, winner_candidate, winner_party_short, winner_alliance, \
                    runner_candidate, runner_party_short, runner_alliance, \
                    winner_votes, runner_votes, margin_votes, margin_percent \
             FROM constituency_margins \
             WHERE margin_percent <= 2.0 \
             ORDER BY margin_percent ASC \
             LIMIT ?1",
            &[&limit as &(dyn ToSql + Sync)],
        )
        .await?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    q: String,
}

/// GET /constituency/search - Search by constituency name or number.
/// The needle is bound as a parameter and LIKE metacharacters are escaped,
/// so user input never reaches the SQL text.
async fn constituency_search(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Value>, ApiError> {
    let needle = params.q.trim();
    if needle.is_empty() {
        return Ok(Json(Value::Array(Vec::new())));
    }

    let pattern = format!("%{}%", escape_like(needle));
    let needle = needle.to_string();
    let result = state
        .store
        .query(
            "SELECT DISTINCT ac_no, ac_name FROM candidates \
             WHERE ac_name LIKE ?1 ESCAPE '\\' OR CAST(ac_no AS TEXT) = ?2 \
             ORDER BY ac_no \
             LIMIT 10",
            &[&pattern as &(dyn ToSql + Sync), &needle as &(dyn ToSql + Sync)],
        )
        .await?;
    Ok(Json(Value::Array(
        result.rows.into_iter().map(Value::Object).collect(),
    )))
}

#[derive(Debug, Deserialize)]
pub struct DetailParams {
    ac_no: i64,
}

/// GET /constituency/detail - Full candidate list for one constituency
async fn constituency_detail(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DetailParams>,
) -> Result<Json<Value>, ApiError> {
    let result = state
        .store
        .query(
            "SELECT ac_no, ac_name, candidate, party, party_short, party_canonical, alliance, \
                    evm_votes, postal_votes, total_votes, vote_percent, is_winner \
             FROM candidates_enriched \
             WHERE ac_no = ?1 \
             ORDER BY total_votes DESC",
            &[&params.ac_no as &(dyn ToSql + Sync)],
        )
        .await?;

    if result.rows.is_empty() {
        return Err(ApiError::NotFound(format!(
            "no constituency with ac_no {}",
            params.ac_no
        )));
    }
    Ok(Json(Value::Array(
        result.rows.into_iter().map(Value::Object).collect(),
    )))
}

fn escape_like(needle: &str) -> String {
    needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/ask", post(ask_handler))
        .route("/overview/parties", get(overview_parties))
        .route("/overview/alliances", get(overview_alliances))
        .route("/overview/party_performance", get(overview_party_performance))
        .route("/overview/nota", get(overview_nota))
        .route("/overview/nail_biters", get(overview_nail_biters))
        .route("/analytics/relevant-parties", get(analytics_relevant_parties))
        .route("/analytics/opponents", get(analytics_opponents))
        .route("/analytics/head-to-head", get(analytics_head_to_head))
        .route("/party/analytics", get(party_analytics))
        .route("/constituency/search", get(constituency_search))
        .route("/constituency/detail", get(constituency_detail))
        .layer(cors)
        .with_state(state)
}
