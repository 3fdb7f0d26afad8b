use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::Utc;
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt;
use whitelist_api::server::{build_app, ApiRuntimeConfig};
use whitelist_core::{hashing::empty_root, IdentityAddress, IdentityRecord, IdentityState, Stake, B256};
use whitelist_engine::EligibilityPolicy;
use whitelist_indexer::storage::{IngestionCommit, Storage};
use whitelist_merkle::InclusionProof;

fn database_url(tmp: &TempDir) -> String {
    format!("sqlite://{}", tmp.path().join("whitelist.db").display())
}

async fn seed(url: &str, records: &[(&str, &str, &str)]) {
    let storage = Storage::new(url, None, None).await.unwrap();
    storage.run_migrations().await.unwrap();

    let now = Utc::now();
    let records: Vec<IdentityRecord> = records
        .iter()
        .map(|(address, state, stake)| IdentityRecord {
            address: IdentityAddress::parse(address).unwrap(),
            state: IdentityState::from_wire(state),
            stake: Stake::from_decimal_str(stake).unwrap(),
            last_seen_at: now,
        })
        .collect();

    let writer = storage.take_writer().unwrap();
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
    drop(writer);
    storage.close().await;
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn fresh_database_serves_empty_commitment() {
    let tmp = TempDir::new().unwrap();
    let app = build_app(&ApiRuntimeConfig::for_test(database_url(&tmp)))
        .await
        .unwrap();

    let (status, health) = get_json(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["cycle"], 0);
    assert!(health["last_success_at"].is_null());

    let (status, root) = get_json(&app, "/merkle_root").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(root["addresses_count"], 0);
    assert_eq!(root["merkle_root"], format!("{}", empty_root()));
    assert!(root["as_of"].is_null());

    let (_, listing) = get_json(&app, "/whitelist").await;
    assert_eq!(listing["count"], 0);
    assert_eq!(listing["addresses"], serde_json::json!([]));
}

#[tokio::test]
async fn every_listed_address_has_a_valid_proof() {
    let tmp = TempDir::new().unwrap();
    let url = database_url(&tmp);
    seed(
        &url,
        &[
            ("0x1111111111111111111111111111111111111111", "Human", "10000"),
            ("0x2222222222222222222222222222222222222222", "Verified", "20000.5"),
            ("0x3333333333333333333333333333333333333333", "Newbie", "30000"),
            ("0x4444444444444444444444444444444444444444", "Zombie", "40000"),
            ("0x5555555555555555555555555555555555555555", "Human", "9999.999999999999999999"),
        ],
    )
    .await;

    let app = build_app(&ApiRuntimeConfig::for_test(url)).await.unwrap();

    let (_, root_json) = get_json(&app, "/merkle_root").await;
    assert_eq!(root_json["addresses_count"], 3);
    let root: B256 = root_json["merkle_root"].as_str().unwrap().parse().unwrap();

    let (_, listing) = get_json(&app, "/whitelist").await;
    let addresses: Vec<String> = serde_json::from_value(listing["addresses"].clone()).unwrap();
    assert_eq!(addresses.len(), 3);

    for address in &addresses {
        let (status, json) = get_json(&app, &format!("/merkle_proof?address={}", address)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["found"], true);

        let proof: InclusionProof = serde_json::from_value(json["proof"].clone()).unwrap();
        assert_eq!(proof.leaf_count, 3);
        assert!(proof.check(root).is_ok(), "proof for {} must verify", address);
    }

    let (_, below) = get_json(
        &app,
        "/whitelist/check?address=0x5555555555555555555555555555555555555555",
    )
    .await;
    assert_eq!(below["eligible"], false);
    assert_eq!(
        below["reason"],
        "Insufficient stake: 9999.99 iDNA (minimum 10,000)"
    );
}

#[tokio::test]
async fn custom_minimum_changes_the_commitment() {
    let tmp = TempDir::new().unwrap();
    let url = database_url(&tmp);
    seed(
        &url,
        &[
            ("0x1111111111111111111111111111111111111111", "Human", "150"),
            ("0x2222222222222222222222222222222222222222", "Newbie", "50"),
        ],
    )
    .await;

    let default_app = build_app(&ApiRuntimeConfig::for_test(url.clone()))
        .await
        .unwrap();
    let lowered_app = build_app(
        &ApiRuntimeConfig::for_test(url)
            .with_policy(EligibilityPolicy::new(Stake::from_idna(100))),
    )
    .await
    .unwrap();

    let (_, default_root) = get_json(&default_app, "/merkle_root").await;
    let (_, lowered_root) = get_json(&lowered_app, "/merkle_root").await;
    assert_eq!(default_root["addresses_count"], 0);
    assert_eq!(lowered_root["addresses_count"], 1);
    assert_ne!(default_root["merkle_root"], lowered_root["merkle_root"]);
}
