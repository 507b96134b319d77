//! Embedded web terminal client bundle.
//!
//! In development, falls back to serving from the filesystem.

use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use rust_embed::Embed;

#[derive(Embed)]
#[folder = "ui/dist"]
struct Assets;

/// Serve the terminal client page.
pub async fn serve_index() -> Response {
    match index_html() {
        Some(content) => Html(content).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Html("<h1>404 - web terminal UI not found</h1>".to_string()),
        )
            .into_response(),
    }
}

fn index_html() -> Option<String> {
    if let Some(content) = Assets::get("index.html") {
        return String::from_utf8(content.data.to_vec()).ok();
    }
    std::fs::read_to_string("ui/dist/index.html").ok()
}

/// Serve any other embedded asset by path.
pub async fn serve_asset(axum::extract::Path(path): axum::extract::Path<String>) -> Response {
    serve_asset_by_name(&path)
}

fn serve_asset_by_name(path: &str) -> Response {
    match Assets::get(path) {
        Some(content) => {
            let mime = mime_guess::from_path(path).first_or_octet_stream();
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, mime.as_ref())
                .body(axum::body::Body::from(content.data.to_vec()))
                .expect("static response")
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_is_embedded() {
        let html = index_html().expect("index.html embedded");
        assert!(html.contains("/ws"));
    }
}
