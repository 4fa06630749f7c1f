use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use scrollback_core::ArchiveIndex;
use serde_json::{json, Value};
use tiny_http::{Header, Method, Response, Server};
use tracing::{debug, warn};

use crate::commands;
use crate::ui;

pub fn run(dir: Option<PathBuf>, port: u16) -> Result<()> {
    let settings = commands::load_settings()?;
    let dir = commands::archive_dir(&settings, dir);
    let index = ArchiveIndex::load_dir(&dir)
        .with_context(|| format!("Failed to read archives in {}", dir.display()))?;

    let server = Server::http(("127.0.0.1", port))
        .map_err(|e| anyhow!("Failed to start server on port {}: {}", port, e))?;

    ui::success(&format!(
        "Serving {} messages from {} archives on http://127.0.0.1:{}",
        index.len(),
        index.files().len(),
        port
    ));
    ui::info("Try /search?query=from:alice");

    let content_type = Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
        .map_err(|_| anyhow!("invalid header"))?;

    for request in server.incoming_requests() {
        let (status, body) = handle(&index, request.method(), request.url());
        debug!(url = request.url(), status, "request");
        let response = Response::from_string(body.to_string())
            .with_status_code(status)
            .with_header(content_type.clone());
        if let Err(e) = request.respond(response) {
            warn!(error = %e, "failed to send response");
        }
    }
    Ok(())
}

/// Route one request to a status code and JSON body.
fn handle(index: &ArchiveIndex, method: &Method, url: &str) -> (u16, Value) {
    if *method != Method::Get {
        return (405, json!({"error": "method not allowed"}));
    }

    let (path, query) = url.split_once('?').unwrap_or((url, ""));
    match path {
        "/" => (
            200,
            json!({
                "archives": index.files().len(),
                "records": index.len(),
            }),
        ),
        "/search" => {
            let query = url::form_urlencoded::parse(query.as_bytes())
                .find(|(k, _)| k == "query")
                .map(|(_, v)| v.into_owned())
                .unwrap_or_default();
            let results = index.search(&query);
            (200, json!(results))
        }
        _ => (404, json!({"error": "not found"})),
    }
}
