mod common;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use common::TestApp;
use serde_json::{Value, json};
use tower::ServiceExt;

async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_health_and_readiness() {
    let app = TestApp::new().await;

    let (status, body) = send(app.router(), get("/healthz")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = send(app.router(), get("/readyz")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["checks"]["sqlite"]["ok"], true);
    assert_eq!(body["checks"]["storage"]["ok"], true);
}

#[tokio::test]
async fn test_reference_lifecycle() {
    let app = TestApp::new().await;
    let new = json!({
        "referenceType": "order",
        "id": "A17",
        "ownerUserId": "client-1",
        "title": "Brochure print run"
    });

    let (status, body) = send(app.router(), post_json("/api/references", new.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["id"], "A17");
    assert_eq!(body["downloadLink"], Value::Null);

    let (status, body) = send(app.router(), post_json("/api/references", new)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["status"], 409);

    let (status, _) = send(app.router(), get("/api/references/order/missing")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(app.router(), get("/api/references/invoice/A17")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let request = Request::put("/api/references/order/A17/delivery-link")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({"url": "https://drive.example.com/x"}).to_string()))
        .unwrap();
    let (status, body) = send(app.router(), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deliveryLink"]["kind"], "externalLink");
    assert_eq!(body["deliveryLink"]["url"], "https://drive.example.com/x");

    let request = Request::put("/api/references/order/A17/delivery-link")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({"url": "ftp://nope"}).to_string()))
        .unwrap();
    let (status, _) = send(app.router(), request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_reference_ids_must_map_to_distinct_key_segments() {
    let app = TestApp::new().await;
    let create = |id: &str| {
        post_json(
            "/api/references",
            json!({"referenceType": "order", "id": id, "ownerUserId": "c", "title": "t"}),
        )
    };

    let (status, _) = send(app.router(), create("A_B")).await;
    assert_eq!(status, StatusCode::CREATED);

    let long = "x".repeat(129);
    for colliding in ["A/B", "A B", "a..b", "_A_B", long.as_str()] {
        let (status, body) = send(app.router(), create(colliding)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", colliding);
        assert_eq!(body["status"], 400);
    }

    let (status, body) = send(
        app.router(),
        post_json(
            "/api/uploads/initiate",
            json!({
                "referenceType": "order",
                "referenceId": "A_B",
                "role": "admin",
                "files": [{"filename": "final.pdf", "size": 10}]
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["basePrefix"], "uploads/order/A_B/admin/rev-1/");

    // Ids that were never created cannot reach the same prefix.
    let (status, _) = send(
        app.router(),
        post_json(
            "/api/uploads/initiate",
            json!({
                "referenceType": "order",
                "referenceId": "A/B",
                "role": "admin",
                "files": [{"filename": "final.pdf", "size": 10}]
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_malformed_external_links_are_rejected() {
    let app = TestApp::new().await;
    app.reference(client_portal::models::reference::ReferenceType::Order, "A20")
        .await;

    for url in ["https://%%", "http://[", "https://"] {
        let request = Request::put("/api/references/order/A20/delivery-link")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({ "url": url }).to_string()))
            .unwrap();
        let (status, _) = send(app.router(), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", url);
    }

    let reference = app
        .state
        .references
        .get(client_portal::models::reference::ReferenceType::Order, "A20")
        .await
        .unwrap();
    assert!(reference.delivery_link.is_none());
}

#[tokio::test]
async fn test_initiate_and_sign_part_over_http() {
    let app = TestApp::new().await;
    app.reference(client_portal::models::reference::ReferenceType::Quote, "Q1")
        .await;

    let (status, body) = send(
        app.router(),
        post_json(
            "/api/uploads/initiate",
            json!({
                "referenceType": "quote",
                "referenceId": "Q1",
                "role": "admin",
                "files": [{"filename": "proof.pdf", "contentType": "application/pdf", "size": 1024}]
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["revision"], 1);
    assert!(body.get("batchId").is_none());
    assert_eq!(body["basePrefix"], "uploads/quote/Q1/admin/rev-1/");
    let object = &body["objects"][0];
    assert_eq!(object["partCount"], 1);
    assert_eq!(object["parts"][0]["partNumber"], 1);

    let (status, body) = send(
        app.router(),
        post_json(
            "/api/uploads/sign-part",
            json!({
                "key": object["key"],
                "uploadId": object["uploadId"],
                "partNumber": 1
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["url"].as_str().unwrap().contains("partNumber=1"));

    let (status, _) = send(
        app.router(),
        post_json(
            "/api/uploads/sign-part",
            json!({"key": "elsewhere/x", "uploadId": "u", "partNumber": 1}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        app.router(),
        post_json(
            "/api/uploads/abort",
            json!({"objects": [{"key": object["key"], "uploadId": object["uploadId"]}]}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["aborted"], 1);
    assert_eq!(app.storage.open_uploads(), 0);
}

#[tokio::test]
async fn test_client_complete_without_batch_id_is_400() {
    let app = TestApp::new().await;
    app.reference(client_portal::models::reference::ReferenceType::Order, "A1")
        .await;

    let (status, body) = send(
        app.router(),
        post_json(
            "/api/uploads/complete",
            json!({
                "referenceType": "order",
                "referenceId": "A1",
                "role": "client",
                "objects": []
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("batchId"));
}

#[tokio::test]
async fn test_conversation_endpoints() {
    let app = TestApp::new().await;

    let (status, body) = send(
        app.router(),
        post_json(
            "/api/conversations",
            json!({
                "title": "Quote Q1",
                "participants": [
                    {"userId": "client-1", "role": "client"},
                    {"userId": "staff-1", "role": "admin"}
                ]
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = body["id"].as_str().unwrap().to_string();
    assert_eq!(body["participants"].as_array().unwrap().len(), 2);

    let (status, body) = send(
        app.router(),
        post_json(
            &format!("/api/conversations/{}/messages", id),
            json!({
                "sender": {"userId": "staff-1", "displayName": "Sam", "role": "admin"},
                "body": "Proof attached"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["sender"]["displayName"], "Sam");

    let (status, body) = send(app.router(), get("/api/conversations?userId=client-1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["unreadCount"], 1);
    assert_eq!(body[0]["lastMessage"]["preview"], "Proof attached");

    let (status, body) = send(
        app.router(),
        get(&format!("/api/conversations/{}/messages?limit=10", id)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    assert_eq!(body["nextCursor"], Value::Null);

    let (status, body) = send(
        app.router(),
        post_json(
            &format!("/api/conversations/{}/read", id),
            json!({"userId": "client-1"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["unreadCount"], 0);

    let (status, _) = send(
        app.router(),
        get("/api/conversations/00000000-0000-0000-0000-000000000000/events"),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let response = app
        .router()
        .oneshot(get(&format!("/api/conversations/{}/events", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/event-stream"
    );
}
