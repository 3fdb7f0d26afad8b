use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use whitelist_core::{IngestionWatermark, Stake};
use whitelist_engine::EligibilityPolicy;
use whitelist_indexer::config::Config;
use whitelist_indexer::query::{
    AddressCheck, CommitmentInfo, ProofAbsence, ProofLookup, ProofResponse, WhitelistListing,
};
use whitelist_indexer::storage::Storage;
use whitelist_indexer::{QueryError, QuerySurface};

#[derive(Clone)]
struct AppState {
    storage: Storage,
    queries: QuerySurface,
}

/// Runtime configuration for the whitelist API server.
#[derive(Debug, Clone)]
pub struct ApiRuntimeConfig {
    database_url: String,
    port: u16,
    policy: EligibilityPolicy,
}

impl ApiRuntimeConfig {
    /// Build runtime configuration from environment variables.
    ///
    /// - `WHITELIST_CONFIG`: indexer TOML file; its database URL and `[eligibility]`
    ///   minimum are used, so the API commits to the same root as `whitelist-indexer status`
    /// - `DATABASE_URL` (default: config file, then sqlite://whitelist.db)
    /// - `PORT` (default: 8080)
    /// - `WHITELIST_MIN_STAKE` in iDNA (default: 10000; not allowed together with `WHITELIST_CONFIG`)
    pub fn from_env() -> anyhow::Result<Self> {
        let indexer_config = match std::env::var("WHITELIST_CONFIG") {
            Ok(path) => Some(Config::from_file(&path).context("Failed to load WHITELIST_CONFIG")?),
            Err(_) => None,
        };
        let port: u16 = std::env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080);

        Self::resolve(
            indexer_config.as_ref(),
            std::env::var("DATABASE_URL").ok(),
            parse_env_stake("WHITELIST_MIN_STAKE")?,
            port,
        )
    }

    fn resolve(
        indexer_config: Option<&Config>,
        database_url: Option<String>,
        min_stake: Option<Stake>,
        port: u16,
    ) -> anyhow::Result<Self> {
        let policy = match (indexer_config, min_stake) {
            (Some(_), Some(_)) => anyhow::bail!(
                "WHITELIST_MIN_STAKE conflicts with WHITELIST_CONFIG; set [eligibility].min_stake in the config file instead"
            ),
            (Some(config), None) => config.eligibility_policy(),
            (None, Some(min_stake)) => EligibilityPolicy::new(min_stake),
            (None, None) => EligibilityPolicy::default(),
        };
        let database_url = database_url
            .or_else(|| indexer_config.map(|config| config.database.url.clone()))
            .unwrap_or_else(|| "sqlite://whitelist.db".to_string());

        Ok(Self {
            database_url,
            port,
            policy,
        })
    }

    /// Build deterministic test configuration with the default policy.
    pub fn for_test(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            port: 0,
            policy: EligibilityPolicy::default(),
        }
    }

    /// Replace the eligibility policy.
    pub fn with_policy(mut self, policy: EligibilityPolicy) -> Self {
        self.policy = policy;
        self
    }
}

fn parse_env_stake(name: &str) -> anyhow::Result<Option<Stake>> {
    let Ok(raw) = std::env::var(name) else {
        return Ok(None);
    };
    let raw = raw.trim();
    anyhow::ensure!(!raw.is_empty(), "{} is set but empty", name);
    let stake = Stake::from_decimal_str(raw)
        .with_context(|| format!("Invalid {} (expected decimal iDNA amount)", name))?;
    Ok(Some(stake))
}

async fn build_state(config: &ApiRuntimeConfig) -> anyhow::Result<AppState> {
    let storage = Storage::new(&config.database_url, None, None)
        .await
        .context("Failed to connect to database")?;

    // The schema is create-if-absent, so serving before the first ingestion is fine.
    storage
        .run_migrations()
        .await
        .context("Failed to run migrations")?;

    Ok(AppState {
        queries: QuerySurface::new(storage.clone(), config.policy),
        storage,
    })
}

async fn build_state_with_warmup(config: &ApiRuntimeConfig) -> anyhow::Result<AppState> {
    let state = build_state(config).await?;
    match state.queries.get_commitment().await {
        Ok(info) => info!(
            root = %info.merkle_root,
            addresses = info.addresses_count,
            "Commitment ready"
        ),
        Err(e) => warn!(error = %e, "Commitment warmup failed"),
    }
    Ok(state)
}

fn router_for_state(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/whitelist", get(get_whitelist))
        .route("/whitelist/check", get(check_address))
        .route("/merkle_root", get(get_merkle_root))
        .route("/merkle_proof", get(get_merkle_proof))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Build an in-process API router from explicit runtime config.
pub async fn build_app(config: &ApiRuntimeConfig) -> anyhow::Result<Router> {
    let state = build_state_with_warmup(config).await?;
    Ok(router_for_state(state))
}

/// Run the API server with explicit runtime configuration.
pub async fn run_with_config(config: ApiRuntimeConfig) -> anyhow::Result<()> {
    let state = build_state_with_warmup(&config).await?;
    let storage_for_shutdown = state.storage.clone();
    let app = router_for_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Whitelist API server listening on {}", addr);
    info!("  Minimum stake: {} iDNA", config.policy.min_stake);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    storage_for_shutdown.close().await;
    info!("Whitelist API server shutdown complete");
    Ok(())
}

/// Run the API server using environment-driven configuration.
pub async fn run_from_env() -> anyhow::Result<()> {
    run_with_config(ApiRuntimeConfig::from_env()?).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", err);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!("Failed to install SIGTERM handler: {}", err);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

const ERROR_CODE_INVALID_REQUEST: &str = "invalid_request";
const ERROR_CODE_STORE_UNAVAILABLE: &str = "store_unavailable";

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorInfo,
}

#[derive(Serialize)]
struct ErrorInfo {
    code: &'static str,
    message: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: ErrorInfo {
                code,
                message: message.into(),
            },
        }),
    )
}

fn bad_request(msg: impl Into<String>) -> ApiError {
    api_error(StatusCode::BAD_REQUEST, ERROR_CODE_INVALID_REQUEST, msg)
}

fn service_unavailable(msg: impl Into<String>) -> ApiError {
    api_error(
        StatusCode::SERVICE_UNAVAILABLE,
        ERROR_CODE_STORE_UNAVAILABLE,
        msg,
    )
}

fn query_error(err: QueryError) -> ApiError {
    match err {
        QueryError::InvalidInput(msg) => bad_request(msg),
        QueryError::StoreUnavailable(msg) => {
            warn!(error = %msg, "Store unavailable");
            service_unavailable(format!("Store unavailable: {}", msg))
        }
    }
}

#[derive(Debug, Deserialize)]
struct AddressQuery {
    address: Option<String>,
}

impl AddressQuery {
    fn required(&self) -> Result<&str, ApiError> {
        self.address
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .ok_or_else(|| bad_request("Missing query parameter: address"))
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    #[serde(flatten)]
    watermark: IngestionWatermark,
}

async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    let watermark = state.queries.health().await.map_err(query_error)?;
    Ok(Json(HealthResponse {
        status: "healthy",
        watermark,
    }))
}

async fn get_whitelist(State(state): State<AppState>) -> Result<Json<WhitelistListing>, ApiError> {
    state
        .queries
        .list_whitelist()
        .await
        .map(Json)
        .map_err(query_error)
}

async fn check_address(
    State(state): State<AppState>,
    Query(query): Query<AddressQuery>,
) -> Result<Json<AddressCheck>, ApiError> {
    let address = query.required()?;
    state
        .queries
        .check_address(address)
        .await
        .map(Json)
        .map_err(query_error)
}

async fn get_merkle_root(State(state): State<AppState>) -> Result<Json<CommitmentInfo>, ApiError> {
    state
        .queries
        .get_commitment()
        .await
        .map(Json)
        .map_err(query_error)
}

#[derive(Serialize)]
struct ProofFound {
    found: bool,
    #[serde(flatten)]
    response: ProofResponse,
}

#[derive(Serialize)]
struct ProofAbsent {
    found: bool,
    #[serde(flatten)]
    absence: ProofAbsence,
}

/// A missing proof is an answer: the address is simply not on the whitelist.
#[derive(Serialize)]
#[serde(untagged)]
enum ProofAnswer {
    Found(ProofFound),
    Absent(ProofAbsent),
}

async fn get_merkle_proof(
    State(state): State<AppState>,
    Query(query): Query<AddressQuery>,
) -> Result<Json<ProofAnswer>, ApiError> {
    let address = query.required()?;
    let answer = match state.queries.get_proof(address).await.map_err(query_error)? {
        ProofLookup::Found(response) => ProofAnswer::Found(ProofFound {
            found: true,
            response,
        }),
        ProofLookup::Absent(absence) => ProofAnswer::Absent(ProofAbsent {
            found: false,
            absence,
        }),
    };
    Ok(Json(answer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use chrono::Utc;
    use http_body_util::BodyExt;
    use tempfile::NamedTempFile;
    use tower::ServiceExt;
    use whitelist_core::{IdentityAddress, IdentityRecord, IdentityState, B256};
    use whitelist_indexer::storage::IngestionCommit;
    use whitelist_merkle::InclusionProof;

    const HUMAN: &str = "0x1234567890abcdef1234567890abcdef12345678";
    const VERIFIED: &str = "0xabcdef1234567890abcdef1234567890abcdef12";
    const NEWBIE_LOW: &str = "0x9876543210fedcba9876543210fedcba98765432";
    const CANDIDATE: &str = "0xfedcba0987654321fedcba0987654321fedcba09";
    const UNKNOWN: &str = "0x0000000000000000000000000000000000000001";

    async fn setup_state() -> (AppState, NamedTempFile) {
        let temp_db = NamedTempFile::new().unwrap();
        let config =
            ApiRuntimeConfig::for_test(format!("sqlite://{}", temp_db.path().display()));
        let state = build_state(&config).await.unwrap();

        let now = Utc::now();
        let records: Vec<IdentityRecord> = [
            (HUMAN, "Human", "15000"),
            (VERIFIED, "Verified", "25000"),
            (NEWBIE_LOW, "Newbie", "5000"),
            (CANDIDATE, "Candidate", "12000"),
        ]
        .into_iter()
        .map(|(address, state, stake)| IdentityRecord {
            address: IdentityAddress::parse(address).unwrap(),
            state: IdentityState::from_wire(state),
            stake: Stake::from_decimal_str(stake).unwrap(),
            last_seen_at: now,
        })
        .collect();

        let writer = state.storage.take_writer().unwrap();
        writer
            .commit_ingestion(
                &records,
                &IngestionCommit {
                    started_at: now,
                    failed_count: 0,
                    last_error: None,
                },
            )
            .await
            .unwrap();

        (state, temp_db)
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    const INDEXER_TOML: &str = r#"
[source]
rpc_url = "http://localhost:9009"

[database]
url = "sqlite://indexer.db"

[eligibility]
min_stake = "250"
"#;

    #[test]
    fn test_runtime_config_follows_indexer_config() {
        let indexer = Config::from_toml_str(INDEXER_TOML).unwrap();

        let config = ApiRuntimeConfig::resolve(Some(&indexer), None, None, 8080).unwrap();
        assert_eq!(config.policy, indexer.eligibility_policy());
        assert_eq!(config.policy.min_stake, Stake::from_idna(250));
        assert_eq!(config.database_url, "sqlite://indexer.db");

        let overridden =
            ApiRuntimeConfig::resolve(Some(&indexer), Some("sqlite://other.db".into()), None, 8080)
                .unwrap();
        assert_eq!(overridden.database_url, "sqlite://other.db");
        assert_eq!(overridden.policy, indexer.eligibility_policy());

        let err = ApiRuntimeConfig::resolve(Some(&indexer), None, Some(Stake::from_idna(1)), 8080)
            .unwrap_err();
        assert!(err.to_string().contains("conflicts with WHITELIST_CONFIG"));
    }

    #[test]
    fn test_runtime_config_without_indexer_config() {
        let config = ApiRuntimeConfig::resolve(None, None, None, 8080).unwrap();
        assert_eq!(config.policy, EligibilityPolicy::default());
        assert_eq!(config.database_url, "sqlite://whitelist.db");

        let lowered = ApiRuntimeConfig::resolve(None, None, Some(Stake::from_idna(100)), 8080).unwrap();
        assert_eq!(lowered.policy.min_stake, Stake::from_idna(100));
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (state, _temp_db) = setup_state().await;
        let (status, json) = get_json(router_for_state(state), "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["cycle"], 1);
        assert_eq!(json["failed_count"], 0);
        assert!(json["last_success_at"].is_string());
    }

    #[tokio::test]
    async fn test_health_reports_unavailable_store() {
        let (state, _temp_db) = setup_state().await;
        state.storage.close().await;

        let (status, json) = get_json(router_for_state(state), "/health").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json["error"]["code"], "store_unavailable");
    }

    #[tokio::test]
    async fn test_check_reasons_are_ok_responses() {
        let (state, _temp_db) = setup_state().await;
        let app = router_for_state(state);

        let cases = [
            (HUMAN, true, "Eligible"),
            (
                NEWBIE_LOW,
                false,
                "Insufficient stake: 5000.00 iDNA (minimum 10,000)",
            ),
            (CANDIDATE, false, "Ineligible state: Candidate"),
            (UNKNOWN, false, "Address not found in database"),
        ];

        for (address, eligible, reason) in cases {
            let uri = format!("/whitelist/check?address={}", address);
            let (status, json) = get_json(app.clone(), &uri).await;
            assert_eq!(status, StatusCode::OK, "{}", address);
            assert_eq!(json["address"], address);
            assert_eq!(json["eligible"], eligible);
            assert_eq!(json["reason"], reason);
        }
    }

    #[tokio::test]
    async fn test_check_rejects_malformed_address() {
        let (state, _temp_db) = setup_state().await;
        let app = router_for_state(state);

        let (status, json) = get_json(app.clone(), "/whitelist/check?address=0xinexistant").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["code"], "invalid_request");

        let (status, json) = get_json(app, "/whitelist/check").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["message"], "Missing query parameter: address");
    }

    #[tokio::test]
    async fn test_whitelist_and_root_agree() {
        let (state, _temp_db) = setup_state().await;
        let app = router_for_state(state);

        let (status, listing) = get_json(app.clone(), "/whitelist").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listing["count"], 2);
        assert_eq!(listing["addresses"], serde_json::json!([HUMAN, VERIFIED]));

        let (status, root) = get_json(app, "/merkle_root").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(root["addresses_count"], 2);
        assert_eq!(root["merkle_root"], listing["merkle_root"]);
        assert_eq!(root["as_of"], listing["as_of"]);
    }

    #[tokio::test]
    async fn test_merkle_proof_verifies_against_root() {
        let (state, _temp_db) = setup_state().await;
        let app = router_for_state(state);

        let (_, root_json) = get_json(app.clone(), "/merkle_root").await;
        let root: B256 = root_json["merkle_root"].as_str().unwrap().parse().unwrap();

        let uri = format!("/merkle_proof?address={}", VERIFIED.to_uppercase().replace("0X", "0x"));
        let (status, json) = get_json(app, &uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["found"], true);
        assert_eq!(json["merkle_root"], root_json["merkle_root"]);

        let proof: InclusionProof = serde_json::from_value(json["proof"].clone()).unwrap();
        assert_eq!(proof.address.as_str(), VERIFIED);
        assert!(proof.verify(root));
    }

    #[tokio::test]
    async fn test_merkle_proof_absent_for_ineligible() {
        let (state, _temp_db) = setup_state().await;
        let app = router_for_state(state);

        let (_, root_json) = get_json(app.clone(), "/merkle_root").await;

        for address in [NEWBIE_LOW, UNKNOWN] {
            let uri = format!("/merkle_proof?address={}", address);
            let (status, json) = get_json(app.clone(), &uri).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(json["found"], false);
            assert_eq!(json["address"], address);
            assert_eq!(json["merkle_root"], root_json["merkle_root"]);
            assert_eq!(json["as_of"], root_json["as_of"]);
            assert!(json["as_of"].is_string());
            assert!(json.get("proof").is_none());
        }
    }
}
