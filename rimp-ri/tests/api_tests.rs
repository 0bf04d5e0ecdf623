//! Integration tests for the rimp-ri HTTP surface
//!
//! Drive the axum router in-process with `tower::ServiceExt::oneshot`.
//! Connectors are scripted; deadline tests run on paused tokio time.

mod helpers;

use axum::http::StatusCode;
use helpers::{body_bytes, body_json, impute_request, service, ScriptedConnector};
use rimp_common::Source;
use rimp_ri::audit::AuditOutcome;
use rimp_ri::cache::CacheStatus;
use rimp_ri::error::ConnectorError;
use std::time::Duration;
use tokio::time::Instant;
use tower::util::ServiceExt;
use uuid::Uuid;

const BODY: &str = r#"{"rut": "12345678", "dv": "9"}"#;

#[tokio::test(start_paused = true)]
async fn test_single_source_answers_other_times_out() {
    // Given: LOCAL_DB answers in 200ms, SIGGES would take 10s
    let local = ScriptedConnector::answering(Source::LocalDb, "02201", Duration::from_millis(200));
    let sigges = ScriptedConnector::answering(Source::Sigges, "13101", Duration::from_secs(10));
    let svc = service().connector(local.clone()).connector(sigges.clone()).build();

    // When
    let started = Instant::now();
    let response = svc.app.clone().oneshot(impute_request(BODY, None, None)).await.unwrap();
    let elapsed = started.elapsed();

    // Then: answered at the request cutoff with the one source that made it
    assert_eq!(response.status(), StatusCode::OK);
    assert!(elapsed <= Duration::from_millis(1850), "took {:?}", elapsed);

    let json = body_json(response).await;
    assert_eq!(json["region"], "Antofagasta");
    assert_eq!(json["region_code"], "02");
    assert_eq!(json["comuna"], "Calama");
    assert_eq!(json["comuna_code"], "02201");
    assert_eq!(json["sources"], serde_json::json!(["LOCAL_DB"]));
    assert_eq!(json["confidence"], 0.784);
    assert!(json.get("address").is_none());
    let audit_id: Uuid = json["audit_id"].as_str().unwrap().parse().unwrap();
    assert_eq!(audit_id.get_version_num(), 4);

    assert_eq!(local.calls(), 1);
    assert_eq!(sigges.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_slow_connector_past_ceiling_does_not_hold_request() {
    // Given: generous request budget, 5s connector ceiling, one stubborn source
    let fast = ScriptedConnector::answering(Source::LocalDb, "02201", Duration::from_millis(300));
    let slow = ScriptedConnector::stubborn(Source::Sigges, "02201", Duration::from_secs(30));
    let svc = service()
        .connector(fast)
        .connector(slow)
        .budget(Duration::from_secs(60), Duration::from_secs(5))
        .build();

    let started = Instant::now();
    let response = svc.app.clone().oneshot(impute_request(BODY, None, None)).await.unwrap();
    let elapsed = started.elapsed();

    // Then: bounded by the slow connector's 5s deadline
    assert_eq!(response.status(), StatusCode::OK);
    assert!(elapsed >= Duration::from_secs(5));
    assert!(elapsed <= Duration::from_millis(5050), "took {:?}", elapsed);

    let event = &svc.audit.events()[0];
    let slow_trace = event
        .connectors
        .iter()
        .find(|t| t.source == Source::Sigges)
        .unwrap();
    assert_eq!(slow_trace.error, Some(rimp_common::ErrorKind::Timeout));
}

#[tokio::test]
async fn test_idempotent_replay_is_byte_identical() {
    // Given
    let local = ScriptedConnector::answering(Source::LocalDb, "02201", Duration::from_millis(5));
    let sigges = ScriptedConnector::answering(Source::Sigges, "02201", Duration::from_millis(5));
    let svc = service().connector(local.clone()).connector(sigges.clone()).build();

    // When: same key and body twice
    let first = svc
        .app
        .clone()
        .oneshot(impute_request(BODY, Some("req-1"), None))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    let first = body_bytes(first).await;

    let second = svc
        .app
        .clone()
        .oneshot(impute_request(BODY, Some("req-1"), None))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    let second = body_bytes(second).await;

    // Then
    assert_eq!(first, second);
    assert_eq!(local.calls(), 1);
    assert_eq!(sigges.calls(), 1);

    let events = svc.audit.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].cache, CacheStatus::Computed);
    assert_eq!(events[1].cache, CacheStatus::Hit);
    assert_eq!(events[0].audit_id, events[1].audit_id);
    assert_ne!(events[0].request_id, events[1].request_id);
    assert!(events[1].connectors.is_empty());
}

#[tokio::test]
async fn test_replay_with_reformatted_body_hits_cache() {
    let local = ScriptedConnector::answering(Source::LocalDb, "02201", Duration::from_millis(1));
    let svc = service().connector(local.clone()).build();

    let a = svc
        .app
        .clone()
        .oneshot(impute_request(r#"{"rut":"12345678","dv":"9"}"#, Some("k"), None))
        .await
        .unwrap();
    let b = svc
        .app
        .clone()
        .oneshot(impute_request("{\n \"dv\": \"9\",\n \"rut\": \"12345678\"\n}", Some("k"), None))
        .await
        .unwrap();

    assert_eq!(body_bytes(a).await, body_bytes(b).await);
    assert_eq!(local.calls(), 1);
}

#[tokio::test]
async fn test_same_key_different_body_recomputes() {
    let local = ScriptedConnector::answering(Source::LocalDb, "02201", Duration::from_millis(1));
    let svc = service().connector(local.clone()).build();

    let a = body_json(
        svc.app
            .clone()
            .oneshot(impute_request(BODY, Some("k"), None))
            .await
            .unwrap(),
    )
    .await;
    let b = body_json(
        svc.app
            .clone()
            .oneshot(impute_request(r#"{"rut":"7654321","dv":"K"}"#, Some("k"), None))
            .await
            .unwrap(),
    )
    .await;

    assert_ne!(a["audit_id"], b["audit_id"]);
    assert_eq!(local.calls(), 2);
}

#[tokio::test]
async fn test_without_key_every_request_aggregates() {
    let local = ScriptedConnector::answering(Source::LocalDb, "02201", Duration::from_millis(1));
    let svc = service().connector(local.clone()).build();

    for _ in 0..3 {
        let response = svc.app.clone().oneshot(impute_request(BODY, None, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    assert_eq!(local.calls(), 3);
    assert!(svc.audit.events().iter().all(|e| e.cache == CacheStatus::Bypass));
}

#[tokio::test]
async fn test_all_sources_failing_is_503() {
    let svc = service()
        .connector(ScriptedConnector::failing(
            Source::LocalDb,
            ConnectorError::NotFound,
            Duration::from_millis(1),
        ))
        .connector(ScriptedConnector::failing(
            Source::Sigges,
            ConnectorError::Unavailable("HTTP 502".to_string()),
            Duration::from_millis(1),
        ))
        .build();

    let response = svc.app.clone().oneshot(impute_request(BODY, Some("k"), None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let json = body_json(response).await;
    assert_eq!(json["error"], "UPSTREAM_UNAVAILABLE");
    assert!(json["audit_id"].as_str().unwrap().parse::<Uuid>().is_ok());
    assert!(!json["message"].as_str().unwrap().contains("502"));

    let events = svc.audit.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].outcome, AuditOutcome::UpstreamUnavailable);
    assert!(events[0].resolution.is_none());
    assert_eq!(events[0].connectors.len(), 2);
    // Failures are not cached
    assert!(svc.state.cache().is_empty());
}

#[tokio::test]
async fn test_no_connectors_is_503() {
    let svc = service().build();
    let response = svc.app.clone().oneshot(impute_request(BODY, None, None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_validation_errors_are_422() {
    let local = ScriptedConnector::answering(Source::LocalDb, "02201", Duration::from_millis(1));
    let svc = service().connector(local.clone()).build();

    for body in [
        "not json",
        r#"{"rut": "12345678"}"#,
        r#"{"rut": "", "dv": "9"}"#,
        r#"{"rut": "12.345.678", "dv": "9"}"#,
        r#"{"rut": "12345678", "dv": "X"}"#,
    ] {
        let response = svc.app.clone().oneshot(impute_request(body, None, None)).await.unwrap();
        assert_eq!(
            response.status(),
            StatusCode::UNPROCESSABLE_ENTITY,
            "body {:?}",
            body
        );
        let json = body_json(response).await;
        assert_eq!(json["error"], "VALIDATION_ERROR");
        assert!(json["audit_id"].is_string());
    }

    assert_eq!(local.calls(), 0);
    let events = svc.audit.events();
    assert_eq!(events.len(), 5);
    assert!(events
        .iter()
        .all(|e| e.outcome == AuditOutcome::ValidationError));
}

#[tokio::test]
async fn test_missing_or_wrong_token_is_401() {
    let local = ScriptedConnector::answering(Source::LocalDb, "02201", Duration::from_millis(1));
    let svc = service().connector(local.clone()).tokens(&["s3cret"]).build();

    let missing = svc.app.clone().oneshot(impute_request(BODY, None, None)).await.unwrap();
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
    let json = body_json(missing).await;
    assert_eq!(json["error"], "AUTH_ERROR");
    assert!(json["audit_id"].is_string());

    let wrong = svc
        .app
        .clone()
        .oneshot(impute_request(BODY, None, Some("guess")))
        .await
        .unwrap();
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

    let ok = svc
        .app
        .clone()
        .oneshot(impute_request(BODY, None, Some("s3cret")))
        .await
        .unwrap();
    assert_eq!(ok.status(), StatusCode::OK);

    assert_eq!(local.calls(), 1);
    let outcomes: Vec<_> = svc.audit.events().iter().map(|e| e.outcome).collect();
    assert_eq!(
        outcomes,
        vec![
            AuditOutcome::AuthError,
            AuditOutcome::AuthError,
            AuditOutcome::Success
        ]
    );
}

#[tokio::test]
async fn test_rate_limited_is_429() {
    let local = ScriptedConnector::answering(Source::LocalDb, "02201", Duration::from_millis(1));
    let svc = service().connector(local.clone()).rate_limit(1, 2).build();

    let mut statuses = Vec::new();
    for _ in 0..3 {
        let response = svc.app.clone().oneshot(impute_request(BODY, None, None)).await.unwrap();
        statuses.push(response.status());
        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            let json = body_json(response).await;
            assert_eq!(json["error"], "RATE_LIMITED");
            assert!(json["audit_id"].is_string());
        }
    }

    assert_eq!(
        statuses,
        vec![StatusCode::OK, StatusCode::OK, StatusCode::TOO_MANY_REQUESTS]
    );
    assert_eq!(local.calls(), 2);
    let last = svc.audit.events().pop().unwrap();
    assert_eq!(last.outcome, AuditOutcome::RateLimited);
    assert!(last.run_masked.is_none());
}

#[tokio::test]
async fn test_audit_event_masks_run() {
    let local = ScriptedConnector::answering(Source::LocalDb, "02201", Duration::from_millis(1));
    let svc = service().connector(local).build();

    let body = r#"{"rut": "12345678", "dv": "9", "name": "Ana", "last_name": "Rojas"}"#;
    let response = svc.app.clone().oneshot(impute_request(body, None, None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let event = svc.audit.events().pop().unwrap();
    assert_eq!(event.outcome, AuditOutcome::Success);
    assert_eq!(event.run_masked.as_deref(), Some("*****678-9"));
    assert!(event.name.is_none());
    let json = serde_json::to_string(&event).unwrap();
    assert!(!json.contains("12345678"));
    assert!(!json.contains("Rojas"));
    assert_eq!(event.resolution.unwrap().comuna_code, "02201");
}

#[tokio::test]
async fn test_health_endpoint() {
    let svc = service()
        .connector(ScriptedConnector::answering(Source::Sigges, "02201", Duration::ZERO))
        .connector(ScriptedConnector::answering(Source::LocalDb, "02201", Duration::ZERO))
        .tokens(&["s3cret"])
        .build();

    let request = axum::http::Request::builder()
        .uri("/health")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = svc.app.clone().oneshot(request).await.unwrap();

    // Never authenticated
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["module"], "rimp-ri");
    assert_eq!(json["connectors"], serde_json::json!(["SIGGES", "LOCAL_DB"]));
    assert_eq!(json["cache_entries"], 0);
    assert!(json["uptime_seconds"].is_u64());
}
