//! Reverse proxy to the preview server.
//!
//! The preview site's home page gets a "new post" entry appended to its
//! navigation menu, which is how the operator reaches the upload form.

use axum::extract::State;
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_ORIGIN, CACHE_CONTROL, CONTENT_TYPE, ETAG, LAST_MODIFIED, LOCATION,
};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use lol_html::html_content::ContentType;
use lol_html::{RewriteStrSettings, element, rewrite_str};

use super::{AppError, AppState};

/// The menu the new post link is appended to.
const NAV_MENU_ID: &str = "navMenu";

const NEW_POST_ITEM: &str = r#"<li class="theme-switch-item">
            <a href="/new/" title="New Post">
                <i class="fa fa-file fa-fw" aria-hidden="true"></i>
            </a>
        </li>"#;

/// Headers copied from the preview server's response.
const FORWARDED_HEADERS: [axum::http::HeaderName; 5] =
    [CONTENT_TYPE, CACHE_CONTROL, ETAG, LAST_MODIFIED, LOCATION];

pub async fn forward(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
) -> Result<Response, AppError> {
    if method != Method::GET && method != Method::HEAD {
        return Ok(StatusCode::METHOD_NOT_ALLOWED.into_response());
    }

    let path_and_query = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    let url = format!(
        "{}{}",
        state.preview_origin.trim_end_matches('/'),
        path_and_query
    );
    tracing::debug!(%url, "proxying to preview");

    let upstream = state.http.request(method, &url).send().await?;
    let status = upstream.status();

    let mut headers = HeaderMap::new();
    for name in FORWARDED_HEADERS {
        if let Some(value) = upstream.headers().get(&name) {
            headers.insert(name, value.clone());
        }
    }
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));

    let is_html = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("text/html"));
    let body = upstream.bytes().await?;

    let body = if status == StatusCode::OK && uri.path() == "/" && is_html {
        let html = String::from_utf8_lossy(&body);
        match inject_nav_item(&html) {
            Some(injected) => {
                tracing::debug!("injected new post link into home page");
                injected.into_bytes()
            }
            None => body.to_vec(),
        }
    } else {
        body.to_vec()
    };

    Ok((status, headers, body).into_response())
}

/// Append [`NEW_POST_ITEM`] as the last child of the element with id
/// [`NAV_MENU_ID`]. Returns `None` when there is no such element.
fn inject_nav_item(html: &str) -> Option<String> {
    let selector = format!("#{NAV_MENU_ID}");
    let mut found = false;
    let rewritten = rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![element!(selector, |el| {
                if !found {
                    el.append(NEW_POST_ITEM, ContentType::Html);
                    found = true;
                }
                Ok(())
            })],
            ..RewriteStrSettings::new()
        },
    );

    match rewritten {
        Ok(out) if found => Some(out),
        Ok(_) => None,
        Err(e) => {
            tracing::debug!(error = %e, "failed to rewrite preview page");
            None
        }
    }
}
