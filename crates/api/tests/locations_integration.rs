//! Integration tests for location ingestion, history and perimeter checks.

mod common;

use axum::http::{Method, StatusCode};
use common::{
    get_request_with_auth, json_request_with_auth, parse_response_body, token_for, TestApp,
    SITE_CENTER,
};
use domain::models::Role;
use serde_json::json;
use tower::ServiceExt;
use uuid::Uuid;

async fn submit(test: &TestApp, token: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
    let response = test
        .app
        .clone()
        .oneshot(json_request_with_auth(Method::POST, "/api/v1/locations", body, token))
        .await
        .unwrap();
    let status = response.status();
    (status, parse_response_body(response).await)
}

#[tokio::test]
async fn test_submit_location_inside_perimeter() {
    let test = TestApp::new();
    let agent = test.agent(None);
    let person = agent.tracked_person_id.unwrap();
    test.assign_site(person);

    let (status, body) = submit(
        &test,
        &token_for(&agent),
        json!({
            "latitude": SITE_CENTER.0,
            "longitude": SITE_CENTER.1,
            "accuracy": 8.5,
            "batteryLevel": 77
        }),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["location"]["trackedPersonId"], person.to_string());
    assert_eq!(body["location"]["batteryLevel"], 77);
    assert_eq!(body["violations"].as_array().unwrap().len(), 0);
    assert!(body.get("alertId").is_none());
    assert_eq!(test.store.locations().len(), 1);
}

#[tokio::test]
async fn test_far_outside_perimeter_raises_security_alert() {
    let test = TestApp::new();
    let agent = test.agent(None);
    let person = agent.tracked_person_id.unwrap();
    let perimeter = test.assign_site(person);

    // Roughly 550 m north of a 100 m perimeter
    let (status, body) = submit(
        &test,
        &token_for(&agent),
        json!({
            "latitude": SITE_CENTER.0 + 0.005,
            "longitude": SITE_CENTER.1,
            "accuracy": 5.0
        }),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    let violations = body["violations"].as_array().unwrap();
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0]["severity"], "HIGH");
    assert_eq!(violations[0]["perimeterId"], perimeter.id.to_string());
    assert_eq!(test.store.violations().len(), 1);

    let alert_id: Uuid = body["alertId"].as_str().unwrap().parse().unwrap();
    let alert = test.store.stored_alert(alert_id).expect("alert persisted");
    assert_eq!(alert.category.as_str(), "SECURITY");
    assert_eq!(alert.tracked_person_id, person);
}

#[tokio::test]
async fn test_slightly_outside_perimeter_records_violation_without_alert() {
    let test = TestApp::new();
    let agent = test.agent(None);
    test.assign_site(agent.tracked_person_id.unwrap());

    // Roughly 130 m from center: 30% over tolerance
    let (status, body) = submit(
        &test,
        &token_for(&agent),
        json!({
            "latitude": SITE_CENTER.0 + 0.00117,
            "longitude": SITE_CENTER.1,
            "accuracy": 5.0
        }),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["violations"][0]["severity"], "LOW");
    assert!(body.get("alertId").is_none());
    assert_eq!(test.store.alert_count(), 0);
}

#[tokio::test]
async fn test_invalid_latitude_rejected() {
    let test = TestApp::new();
    let agent = test.agent(None);

    let (status, body) = submit(
        &test,
        &token_for(&agent),
        json!({"latitude": 91.0, "longitude": 17.0, "accuracy": 5.0}),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
    assert!(test.store.locations().is_empty());
}

#[tokio::test]
async fn test_agent_cannot_submit_for_another_person() {
    let test = TestApp::new();
    let agent = test.agent(None);
    let other = test.agent(None);

    let (status, _) = submit(
        &test,
        &token_for(&agent),
        json!({
            "trackedPersonId": other.tracked_person_id,
            "latitude": SITE_CENTER.0,
            "longitude": SITE_CENTER.1,
            "accuracy": 5.0
        }),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_submit_for_unknown_tracked_person_is_not_found() {
    let test = TestApp::new();
    let supervisor = test.staff(Role::Supervisor, None);

    let (status, body) = submit(
        &test,
        &token_for(&supervisor),
        json!({
            "trackedPersonId": Uuid::new_v4(),
            "latitude": SITE_CENTER.0,
            "longitude": SITE_CENTER.1,
            "accuracy": 5.0
        }),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
    assert!(test.store.locations().is_empty());
}

#[tokio::test]
async fn test_history_pages_never_repeat_rows() {
    let test = TestApp::new();
    let agent = test.agent(None);
    let person = agent.tracked_person_id.unwrap();
    let token = token_for(&agent);

    for offset in [0.0001, 0.0002, 0.0003, 0.0004] {
        let (status, _) = submit(
            &test,
            &token,
            json!({
                "latitude": SITE_CENTER.0 + offset,
                "longitude": SITE_CENTER.1,
                "accuracy": 5.0
            }),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let mut ids = Vec::new();
    let mut uri = format!("/api/v1/tracked-persons/{}/locations?limit=1", person);
    loop {
        let response = test
            .app
            .clone()
            .oneshot(get_request_with_auth(&uri, &token))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let page = parse_response_body(response).await;
        for location in page["locations"].as_array().unwrap() {
            ids.push(location["id"].as_i64().unwrap());
        }
        assert!(ids.len() <= 4, "pages repeated rows: {ids:?}");
        match page.get("nextCursor").and_then(|c| c.as_str()) {
            Some(cursor) => {
                uri = format!(
                    "/api/v1/tracked-persons/{}/locations?limit=1&cursor={}",
                    person, cursor
                )
            }
            None => break,
        }
    }

    let mut distinct = ids.clone();
    distinct.dedup();
    assert_eq!(ids.len(), 4);
    assert_eq!(distinct, ids);
}

#[tokio::test]
async fn test_history_and_current_position() {
    let test = TestApp::new();
    let agent = test.agent(None);
    let person = agent.tracked_person_id.unwrap();
    let token = token_for(&agent);

    for offset in [0.0001, 0.0002, 0.0003] {
        let (status, _) = submit(
            &test,
            &token,
            json!({
                "latitude": SITE_CENTER.0 + offset,
                "longitude": SITE_CENTER.1,
                "accuracy": 5.0
            }),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let supervisor = test.staff(Role::Supervisor, None);
    let supervisor_token = token_for(&supervisor);

    let response = test
        .app
        .clone()
        .oneshot(get_request_with_auth(
            &format!("/api/v1/tracked-persons/{}/locations?limit=2", person),
            &supervisor_token,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let first_page = parse_response_body(response).await;
    assert_eq!(first_page["locations"].as_array().unwrap().len(), 2);
    let cursor = first_page["nextCursor"].as_str().expect("more pages").to_string();

    let response = test
        .app
        .clone()
        .oneshot(get_request_with_auth(
            &format!(
                "/api/v1/tracked-persons/{}/locations?limit=2&cursor={}",
                person, cursor
            ),
            &supervisor_token,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let second_page = parse_response_body(response).await;
    assert_eq!(second_page["locations"].as_array().unwrap().len(), 1);
    assert!(second_page.get("nextCursor").is_none());

    let response = test
        .app
        .clone()
        .oneshot(get_request_with_auth(
            &format!("/api/v1/tracked-persons/{}/position", person),
            &token,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let position = parse_response_body(response).await;
    let latitude = position["latitude"].as_f64().unwrap();
    assert!((latitude - (SITE_CENTER.0 + 0.0003)).abs() < 1e-9);
}

#[tokio::test]
async fn test_history_rejects_inverted_range() {
    let test = TestApp::new();
    let agent = test.agent(None);
    let person = agent.tracked_person_id.unwrap();

    let response = test
        .app
        .clone()
        .oneshot(get_request_with_auth(
            &format!(
                "/api/v1/tracked-persons/{}/locations?from=2026-01-02T00:00:00Z&to=2026-01-01T00:00:00Z",
                person
            ),
            &token_for(&agent),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_agent_cannot_read_other_history() {
    let test = TestApp::new();
    let agent = test.agent(None);
    let other = test.agent(None);

    let response = test
        .app
        .clone()
        .oneshot(get_request_with_auth(
            &format!(
                "/api/v1/tracked-persons/{}/locations",
                other.tracked_person_id.unwrap()
            ),
            &token_for(&agent),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_position_unknown_is_not_found() {
    let test = TestApp::new();
    let agent = test.agent(None);

    let response = test
        .app
        .clone()
        .oneshot(get_request_with_auth(
            &format!(
                "/api/v1/tracked-persons/{}/position",
                agent.tracked_person_id.unwrap()
            ),
            &token_for(&agent),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_perimeter_check() {
    let test = TestApp::new();
    let agent = test.agent(None);
    let perimeter = test.assign_site(agent.tracked_person_id.unwrap());
    let token = token_for(&agent);
    let uri = format!("/api/v1/perimeters/{}/check", perimeter.id);

    let response = test
        .app
        .clone()
        .oneshot(json_request_with_auth(
            Method::POST,
            &uri,
            json!({"latitude": SITE_CENTER.0, "longitude": SITE_CENTER.1}),
            &token,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = parse_response_body(response).await;
    assert_eq!(body["inside"], true);
    assert!(body.get("severity").map_or(true, |s| s.is_null()));

    let response = test
        .app
        .clone()
        .oneshot(json_request_with_auth(
            Method::POST,
            &uri,
            json!({"latitude": SITE_CENTER.0 + 0.005, "longitude": SITE_CENTER.1}),
            &token,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = parse_response_body(response).await;
    assert_eq!(body["inside"], false);
    assert_eq!(body["severity"], "HIGH");

    // Checks never record anything
    assert!(test.store.violations().is_empty());

    let response = test
        .app
        .clone()
        .oneshot(json_request_with_auth(
            Method::POST,
            &format!("/api/v1/perimeters/{}/check", Uuid::new_v4()),
            json!({"latitude": SITE_CENTER.0, "longitude": SITE_CENTER.1}),
            &token,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
