//! Minimal HTTP client for the controller's REST API.

use anyhow::{Context, anyhow};
use http_body_util::BodyExt;
use serde::Deserialize;
use tracing::debug;

use fairq_engine::FactorsReport;

/// The controller's response envelope.
#[derive(Deserialize)]
struct ApiEnvelope<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

/// Fetch the priority factors report from the controller.
pub async fn fetch_factors(
    host: &str,
    jobs: Option<&str>,
    users: Option<&str>,
) -> anyhow::Result<FactorsReport> {
    let mut path = "/api/v1/priority/factors".to_string();
    let mut params = Vec::new();
    if let Some(jobs) = jobs {
        params.push(format!("jobs={jobs}"));
    }
    if let Some(users) = users {
        params.push(format!("users={users}"));
    }
    if !params.is_empty() {
        path = format!("{path}?{}", params.join("&"));
    }

    let body = get(host, &path).await?;
    let envelope: ApiEnvelope<FactorsReport> =
        serde_json::from_slice(&body).context("malformed controller response")?;

    if !envelope.success {
        return Err(anyhow!(
            "controller error: {}",
            envelope.error.unwrap_or_else(|| "unknown".to_string())
        ));
    }
    envelope
        .data
        .ok_or_else(|| anyhow!("controller returned an empty report"))
}

/// Issue a GET and return the response body.
async fn get(host: &str, path: &str) -> anyhow::Result<Vec<u8>> {
    let uri = format!("http://{host}{path}");
    debug!(%uri, "querying controller");

    let stream = tokio::net::TcpStream::connect(host)
        .await
        .with_context(|| format!("cannot reach controller at {host}"))?;

    let io = hyper_util::rt::TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .context("handshake failed")?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let req = http::Request::builder()
        .method("GET")
        .uri(&uri)
        .header("host", host)
        .header("user-agent", "fairq-cli/0.1")
        .body(http_body_util::Empty::<bytes::Bytes>::new())?;

    let resp = sender.send_request(req).await.context("request failed")?;
    let status = resp.status();
    let body = resp.into_body().collect().await?.to_bytes().to_vec();

    if !status.is_success() && !status.is_client_error() {
        return Err(anyhow!("controller returned {status}"));
    }
    Ok(body)
}
