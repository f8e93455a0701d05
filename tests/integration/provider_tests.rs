//! Manifest provider HTTP surface on an ephemeral port.

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use sandbox_bootstrap::manifest::provider::{serve, MANIFEST_PATH};
use sandbox_bootstrap::manifest::sample::starter_project;
use sandbox_bootstrap::models::FileTree;

/// Start the provider with `tree`, returning its base URL.
async fn spawn_provider(tree: FileTree, ct: CancellationToken) -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        serve(listener, tree, ct).await.expect("provider serves");
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn project_files_returns_tree_with_isolation_headers() {
    let ct = CancellationToken::new();
    let base = spawn_provider(starter_project(), ct.clone()).await;

    let response = reqwest::get(format!("{base}{MANIFEST_PATH}"))
        .await
        .expect("request");

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let headers = response.headers();
    assert_eq!(
        headers
            .get("cross-origin-embedder-policy")
            .and_then(|v| v.to_str().ok()),
        Some("require-corp")
    );
    assert_eq!(
        headers
            .get("cross-origin-opener-policy")
            .and_then(|v| v.to_str().ok()),
        Some("same-origin")
    );

    let body: serde_json::Value = response.json().await.expect("json body");
    assert!(body["package.json"]["file"]["contents"].is_string());
    assert!(body["src"]["directory"]["App.jsx"]["file"].is_object());

    let tree: FileTree = serde_json::from_value(body).expect("file tree");
    assert_eq!(tree, starter_project());
    ct.cancel();
}

#[tokio::test]
async fn health_returns_ok_with_isolation_headers() {
    let ct = CancellationToken::new();
    let base = spawn_provider(FileTree::new(), ct.clone()).await;

    let response = reqwest::get(format!("{base}/health"))
        .await
        .expect("request");

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert!(response
        .headers()
        .contains_key("cross-origin-embedder-policy"));
    assert_eq!(response.text().await.expect("body"), "ok");
    ct.cancel();
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let ct = CancellationToken::new();
    let base = spawn_provider(FileTree::new(), ct.clone()).await;

    let response = reqwest::get(format!("{base}/api/other"))
        .await
        .expect("request");

    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    ct.cancel();
}

#[tokio::test]
async fn cors_preflight_is_permitted() {
    let ct = CancellationToken::new();
    let base = spawn_provider(FileTree::new(), ct.clone()).await;

    let response = reqwest::Client::new()
        .request(reqwest::Method::OPTIONS, format!("{base}{MANIFEST_PATH}"))
        .header("origin", "http://example.test")
        .header("access-control-request-method", "GET")
        .send()
        .await
        .expect("request");

    assert!(response.status().is_success());
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .and_then(|v| v.to_str().ok()),
        Some("*")
    );
    ct.cancel();
}
