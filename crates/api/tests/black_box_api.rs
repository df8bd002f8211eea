use std::collections::HashMap;
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde_json::{json, Value};

use docintel_infra::config::AppConfig;

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Same router as prod (in-memory stores, simulated analysis), on an ephemeral port.
    async fn spawn(overrides: &[(&str, &str)]) -> Self {
        let mut env: HashMap<String, String> = [
            ("POLL_INITIAL_BACKOFF_MS", "10"),
            ("POLL_MAX_BACKOFF_MS", "20"),
            ("QUOTA_WAIT_INTERVAL_MS", "10"),
            ("ANALYZER_SIMULATED_POLLS", "1"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        for (k, v) in overrides {
            env.insert(k.to_string(), v.to_string());
        }
        let config = AppConfig::from_lookup(move |key: &str| env.get(key).cloned())
            .expect("invalid test config");

        let (app, _services) = docintel_api::app::build_app(&config)
            .await
            .expect("failed to build app");
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, handle }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn as_tenant(req: reqwest::RequestBuilder, tenant: &str) -> reqwest::RequestBuilder {
    req.header("x-tenant-id", tenant).header("x-user-id", "user-1")
}

fn file_form(name: &str, content: &[u8]) -> Form {
    Form::new().part("file", Part::bytes(content.to_vec()).file_name(name.to_string()))
}

async fn upload(client: &reqwest::Client, srv: &TestServer, tenant: &str, name: &str, content: &[u8]) -> reqwest::Response {
    as_tenant(client.post(srv.url("/documents")), tenant)
        .multipart(file_form(name, content))
        .send()
        .await
        .unwrap()
}

/// Poll a document until its status is terminal.
async fn wait_terminal(client: &reqwest::Client, srv: &TestServer, tenant: &str, id: &str) -> Value {
    for _ in 0..200 {
        let res = as_tenant(client.get(srv.url(&format!("/documents/{id}"))), tenant)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body: Value = res.json().await.unwrap();
        if matches!(body["status"].as_str(), Some("succeeded" | "failed" | "timed_out")) {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("document {id} did not reach a terminal state");
}

#[tokio::test]
async fn health_reports_dependencies() {
    let srv = TestServer::spawn(&[]).await;
    let res = reqwest::get(srv.url("/health")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["dependencies"]["metadataStore"]["healthy"], true);
    assert_eq!(body["dependencies"]["objectStore"]["healthy"], true);
}

#[tokio::test]
async fn tenant_headers_are_required() {
    let srv = TestServer::spawn(&[]).await;
    let client = reqwest::Client::new();

    let res = client.get(srv.url("/documents")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "missing_header");

    let res = client
        .get(srv.url("/documents"))
        .header("x-tenant-id", "bad tenant!")
        .header("x-user-id", "u1")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn upload_runs_to_success() {
    let srv = TestServer::spawn(&[]).await;
    let client = reqwest::Client::new();

    let res = upload(&client, &srv, "acme", "receipt.pdf", b"%PDF-1.7 receipt").await;
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let created: Value = res.json().await.unwrap();
    assert_eq!(created["status"], "running");
    assert_eq!(created["deduplicated"], false);
    assert!(created["resultId"].is_string());
    let id = created["documentId"].as_str().unwrap().to_string();

    let doc = wait_terminal(&client, &srv, "acme", &id).await;
    assert_eq!(doc["status"], "succeeded");
    assert_eq!(doc["fileName"], "receipt.pdf");
    assert_eq!(doc["extractedFields"]["MerchantName"]["valueString"], "Contoso");
    assert_eq!(doc["progress"]["quotaHeld"], false);

    let res = as_tenant(client.get(srv.url("/quota")), "acme").send().await.unwrap();
    let quota: Value = res.json().await.unwrap();
    assert_eq!(quota["inflight"], 0);
    assert_eq!(quota["limit"], 10);
}

#[tokio::test]
async fn identical_uploads_are_deduplicated() {
    let srv = TestServer::spawn(&[]).await;
    let client = reqwest::Client::new();

    let mut ids = Vec::new();
    for i in 0..3 {
        let res = upload(&client, &srv, "acme", "same.pdf", b"identical bytes").await;
        assert_eq!(res.status(), StatusCode::ACCEPTED);
        let body: Value = res.json().await.unwrap();
        assert_eq!(body["deduplicated"], i > 0);
        ids.push(body["documentId"].as_str().unwrap().to_string());
    }
    assert!(ids.iter().all(|id| id == &ids[0]));

    let res = as_tenant(client.get(srv.url("/documents")), "acme").send().await.unwrap();
    let list: Value = res.json().await.unwrap();
    assert_eq!(list["total"], 1);
}

#[tokio::test]
async fn quota_exhaustion_returns_429() {
    let srv = TestServer::spawn(&[("ANALYZER_SIMULATED_POLLS", "100")]).await;
    let client = reqwest::Client::new();

    let res = as_tenant(client.put(srv.url("/quota")), "acme")
        .json(&json!({ "limit": 1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = upload(&client, &srv, "acme", "a.pdf", b"first").await;
    assert_eq!(res.status(), StatusCode::ACCEPTED);

    let res = upload(&client, &srv, "acme", "b.pdf", b"second").await;
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "quota_exceeded");

    // other tenants are unaffected
    let res = upload(&client, &srv, "globex", "b.pdf", b"second").await;
    assert_eq!(res.status(), StatusCode::ACCEPTED);

    let res = as_tenant(client.get(srv.url("/quota")), "acme").send().await.unwrap();
    let quota: Value = res.json().await.unwrap();
    assert_eq!(quota["inflight"], 1);
    assert_eq!(quota["available"], 0);
}

#[tokio::test]
async fn documents_are_tenant_scoped() {
    let srv = TestServer::spawn(&[]).await;
    let client = reqwest::Client::new();

    let res = upload(&client, &srv, "acme", "a.pdf", b"private").await;
    let body: Value = res.json().await.unwrap();
    let id = body["documentId"].as_str().unwrap();

    let res = as_tenant(client.get(srv.url(&format!("/documents/{id}"))), "globex")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = as_tenant(client.post(srv.url(&format!("/documents/{id}/cancel"))), "globex")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = as_tenant(client.get(srv.url("/documents/not-a-uuid")), "acme")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn batch_upload_completes_every_file() {
    let srv = TestServer::spawn(&[]).await;
    let client = reqwest::Client::new();

    let form = Form::new()
        .part("files", Part::bytes(b"one".to_vec()).file_name("one.pdf"))
        .part("files", Part::bytes(b"two".to_vec()).file_name("two.pdf"))
        .part("files", Part::bytes(b"three".to_vec()).file_name("three.pdf"));
    let res = as_tenant(client.post(srv.url("/documents/batch")), "acme")
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let accepted: Value = res.json().await.unwrap();
    assert_eq!(accepted["status"], "processing");
    assert_eq!(accepted["fileCount"], 3);
    let batch_id = accepted["batchId"].as_str().unwrap().to_string();

    let mut batch = Value::Null;
    for _ in 0..200 {
        let res = as_tenant(client.get(srv.url(&format!("/documents/batch/{batch_id}"))), "acme")
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        batch = res.json().await.unwrap();
        if batch["status"] == "completed" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(batch["status"], "completed");
    let outcomes = batch["outcomes"].as_array().unwrap();
    assert_eq!(outcomes.len(), 3);
    assert_eq!(outcomes[0]["fileName"], "one.pdf");
    assert_eq!(outcomes[2]["fileName"], "three.pdf");

    for outcome in outcomes {
        assert_eq!(outcome["status"], "submitted");
        let id = outcome["documentId"].as_str().unwrap();
        let doc = wait_terminal(&client, &srv, "acme", id).await;
        assert_eq!(doc["status"], "succeeded");
        assert_eq!(doc["batchId"], batch_id.as_str());
    }

    let res = as_tenant(client.get(srv.url("/documents?status=succeeded&pageSize=2")), "acme")
        .send()
        .await
        .unwrap();
    let page: Value = res.json().await.unwrap();
    assert_eq!(page["total"], 3);
    assert_eq!(page["pageSize"], 2);
    assert_eq!(page["totalPages"], 2);
    assert_eq!(page["documents"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn batch_validation_and_headroom() {
    let srv = TestServer::spawn(&[("QUOTA_DEFAULT_LIMIT", "2")]).await;
    let client = reqwest::Client::new();

    let res = as_tenant(client.post(srv.url("/documents/batch")), "acme")
        .multipart(Form::new().text("note", "no files here"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let form = (0u8..3).fold(Form::new(), |form, i| {
        form.part("files", Part::bytes(vec![i + 1]).file_name(format!("f{i}.pdf")))
    });
    let res = as_tenant(client.post(srv.url("/documents/batch")), "acme")
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);

    let res = as_tenant(client.get(srv.url(&format!("/documents/batch/{}", uuid::Uuid::now_v7()))), "acme")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cancel_fails_running_job_then_conflicts() {
    let srv = TestServer::spawn(&[("ANALYZER_SIMULATED_POLLS", "1000")]).await;
    let client = reqwest::Client::new();

    let res = upload(&client, &srv, "acme", "slow.pdf", b"slow").await;
    let body: Value = res.json().await.unwrap();
    let id = body["documentId"].as_str().unwrap().to_string();

    let res = as_tenant(client.post(srv.url(&format!("/documents/{id}/cancel"))), "acme")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let flagged: Value = res.json().await.unwrap();
    assert_eq!(flagged["cancelRequested"], true);

    let doc = wait_terminal(&client, &srv, "acme", &id).await;
    assert_eq!(doc["status"], "failed");
    assert_eq!(doc["error"], "cancelled");

    let res = as_tenant(client.post(srv.url(&format!("/documents/{id}/cancel"))), "acme")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);

    let res = as_tenant(client.get(srv.url("/quota")), "acme").send().await.unwrap();
    let quota: Value = res.json().await.unwrap();
    assert_eq!(quota["inflight"], 0);
}

#[tokio::test]
async fn url_intake_rejects_unsupported_sources() {
    let srv = TestServer::spawn(&[]).await;
    let client = reqwest::Client::new();

    let res = as_tenant(client.post(srv.url("/documents")), "acme")
        .json(&json!({ "fileUrl": "ftp://example.com/receipt.pdf" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = as_tenant(client.post(srv.url("/documents")), "acme")
        .body("raw bytes")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

    let res = as_tenant(client.get(srv.url("/documents?status=bogus")), "acme")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn download_and_delete_finished_document() {
    let srv = TestServer::spawn(&[("ANALYZER_SIMULATED_POLLS", "20")]).await;
    let client = reqwest::Client::new();

    let res = upload(&client, &srv, "acme", "scan.pdf", b"scanned page").await;
    let body: Value = res.json().await.unwrap();
    let id = body["documentId"].as_str().unwrap().to_string();

    let res = as_tenant(client.delete(srv.url(&format!("/documents/{id}"))), "acme")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "in_use");

    let doc = wait_terminal(&client, &srv, "acme", &id).await;
    assert_eq!(doc["status"], "succeeded");

    let res = as_tenant(client.get(srv.url(&format!("/documents/{id}/download"))), "acme")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let link: Value = res.json().await.unwrap();
    assert_eq!(link["documentId"], id.as_str());
    assert_eq!(link["fileName"], "scan.pdf");
    assert!(link["downloadUrl"]
        .as_str()
        .unwrap()
        .ends_with(doc["objectKey"].as_str().unwrap()));

    let res = as_tenant(client.get(srv.url(&format!("/documents/{id}/content"))), "acme")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.bytes().await.unwrap().as_ref(), b"scanned page");

    let res = as_tenant(client.get(srv.url(&format!("/documents/{id}/download"))), "globex")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    // the quota slot may still be releasing right after the terminal write
    let mut deleted = false;
    for _ in 0..100 {
        let res = as_tenant(client.delete(srv.url(&format!("/documents/{id}"))), "acme")
            .send()
            .await
            .unwrap();
        if res.status() == StatusCode::OK {
            let body: Value = res.json().await.unwrap();
            assert_eq!(body["deleted"], true);
            deleted = true;
            break;
        }
        assert_eq!(res.status(), StatusCode::CONFLICT);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(deleted);

    let res = as_tenant(client.get(srv.url(&format!("/documents/{id}"))), "acme")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let res = as_tenant(client.get(srv.url(&format!("/documents/{id}/content"))), "acme")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}
