//! HTTP front end for the staging engine.
//!
//! Routes:
//! - `POST /upload` - convert an uploaded document into a new post and stage it
//! - `POST /update/{slug}` - replace an existing post, keeping its date
//! - `/publish` - commit and push the staged post
//! - `/abort` - discard the staged post
//! - `POST /push` - retry a failed push
//! - `GET /api/post/{slug}`, `GET /api/status` - read-only JSON
//! - `/new/` - the upload form
//! - everything else is proxied to the preview server

mod proxy;

use std::path::Path;
use std::sync::Arc;

use axum::Router;
use axum::extract::multipart::MultipartError;
use axum::extract::{DefaultBodyLimit, Multipart, Path as UrlPath, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Json, Response};
use axum::routing::{get, post};
use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use tera::{Context, Tera};
use tower_http::services::ServeDir;

use crate::engine::{Engine, EngineError, ErrorKind, OnDeck};
use crate::post::PostInput;
use crate::repo::RepoError;

const PUBLISH_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Publish?</title>
</head>
<body onload="window.open('/post/{{ name }}', '_blank');">
    <h1>Publish {{ name }}?</h1>
    <form action="/publish" method="post">
        <p><input type="submit" value="publish"/></p>
    </form>
    <form action="/abort" method="post">
        <p><input type="submit" value="abort"/></p>
    </form>
</body>
</html>
"#;

// =============================================================================
// Errors
// =============================================================================

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("invalid upload: {0}")]
    Multipart(#[from] MultipartError),

    #[error("{0}")]
    BadRequest(String),

    #[error("failed to render page: {0}")]
    Template(#[from] tera::Error),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("preview server request failed: {0}")]
    Proxy(#[from] reqwest::Error),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Engine(EngineError::NothingStaged) => StatusCode::CONFLICT,
            Self::Engine(EngineError::UnknownPost { .. }) => StatusCode::NOT_FOUND,
            Self::Engine(EngineError::Repository(RepoError::Read { source, .. }))
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                StatusCode::NOT_FOUND
            }
            Self::Engine(e) => match e.kind() {
                ErrorKind::State => StatusCode::BAD_REQUEST,
                ErrorKind::Conversion | ErrorKind::Serialization => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                ErrorKind::Repository => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Multipart(e) => e.status(),
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Template(_) | Self::Join(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Proxy(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::warn!(error = %self, "request rejected");
        }
        (status, format!("error: {self}")).into_response()
    }
}

// =============================================================================
// State
// =============================================================================

#[derive(Clone)]
pub struct AppState {
    engine: Arc<Engine>,
    /// Author put on every post
    author: String,
    templates: Arc<Tera>,
    http: reqwest::Client,
    /// Origin of the preview server, e.g. `http://127.0.0.1:1313`
    preview_origin: String,
    deploy_hook: Option<String>,
}

impl AppState {
    pub fn new(
        engine: Arc<Engine>,
        author: String,
        preview_origin: String,
        deploy_hook: Option<String>,
    ) -> Result<Self, tera::Error> {
        let mut templates = Tera::default();
        templates.add_raw_template("publish.html", PUBLISH_TEMPLATE)?;
        Ok(Self {
            engine,
            author,
            templates: Arc::new(templates),
            http: reqwest::Client::new(),
            preview_origin,
            deploy_hook,
        })
    }
}

/// Build the router.
pub fn router(state: AppState, static_dir: &Path, upload_limit: usize) -> Router {
    Router::new()
        .route("/upload", post(upload))
        .route("/update/{slug}", post(update))
        .route("/publish", get(publish).post(publish))
        .route("/abort", get(abort).post(abort))
        .route("/push", post(push))
        .route("/api/post/{slug}", get(get_post))
        .route("/api/status", get(status))
        .nest_service("/new", ServeDir::new(static_dir))
        .fallback(proxy::forward)
        .layer(DefaultBodyLimit::max(upload_limit))
        .with_state(state)
}

/// Run an engine call on the blocking pool.
///
/// The call runs to completion even if the request is dropped, so a
/// transition is never cut off halfway.
async fn run_engine<T, F>(state: &AppState, f: F) -> Result<T, AppError>
where
    T: Send + 'static,
    F: FnOnce(&Engine) -> Result<T, EngineError> + Send + 'static,
{
    let engine = Arc::clone(&state.engine);
    Ok(tokio::task::spawn_blocking(move || f(&engine)).await??)
}

// =============================================================================
// Upload form
// =============================================================================

/// Fields of the upload and update forms.
#[derive(Debug, Default)]
struct UploadForm {
    document: Option<Vec<u8>>,
    title: String,
    tags: String,
    summary: String,
}

impl UploadForm {
    async fn read(mut multipart: Multipart) -> Result<Self, AppError> {
        let mut form = Self::default();
        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "userfile" => form.document = Some(field.bytes().await?.to_vec()),
                "title" => form.title = field.text().await?,
                "tags" => form.tags = field.text().await?,
                "summary" => form.summary = field.text().await?,
                _ => {}
            }
        }
        Ok(form)
    }

    /// Split into the document and the post metadata, tidied the way the
    /// site expects (tags lower-cased).
    fn into_parts(self, author: &str) -> Result<(Vec<u8>, PostInput), AppError> {
        let document = self
            .document
            .ok_or_else(|| AppError::BadRequest("missing 'userfile' upload".to_string()))?;
        let input = PostInput {
            title: self.title.trim().to_string(),
            tags: self.tags.trim().to_lowercase(),
            summary: self.summary.trim().to_string(),
            author: author.to_string(),
        };
        Ok((document, input))
    }
}

// =============================================================================
// Handlers
// =============================================================================

async fn upload(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Html<String>, AppError> {
    let (document, input) = UploadForm::read(multipart).await?.into_parts(&state.author)?;
    let staged = run_engine(&state, move |engine| engine.new_post(&document, &input)).await?;
    tracing::info!(slug = %staged.name, "staged new post for publishing");
    publish_page(&state, &staged)
}

async fn update(
    State(state): State<AppState>,
    UrlPath(slug): UrlPath<String>,
    multipart: Multipart,
) -> Result<Html<String>, AppError> {
    let (document, input) = UploadForm::read(multipart).await?.into_parts(&state.author)?;
    let staged = run_engine(&state, move |engine| {
        engine.update_post(&slug, &document, &input)
    })
    .await?;
    tracing::info!(slug = %staged.name, "staged post update for publishing");
    publish_page(&state, &staged)
}

fn publish_page(state: &AppState, staged: &OnDeck) -> Result<Html<String>, AppError> {
    let mut context = Context::new();
    context.insert("name", &staged.name);
    Ok(Html(state.templates.render("publish.html", &context)?))
}

async fn publish(State(state): State<AppState>) -> Result<String, AppError> {
    let deployed = run_engine(&state, Engine::deploy).await?;

    let mut message = format!("successfully published {}", deployed.slug);
    if !deployed.pushed {
        message.push_str(" (test mode: committed, not pushed)");
    } else if let Some(hook) = &state.deploy_hook {
        match trigger_deploy_hook(&state.http, hook).await {
            Ok(()) => message.push_str("; deploy hook triggered"),
            Err(e) => {
                tracing::warn!(error = %e, "deploy hook failed");
                message.push_str(&format!("; deploy hook failed: {e}"));
            }
        }
    }
    Ok(message)
}

async fn trigger_deploy_hook(http: &reqwest::Client, url: &str) -> Result<(), reqwest::Error> {
    http.get(url).send().await?.error_for_status()?;
    Ok(())
}

async fn abort(State(state): State<AppState>) -> Result<String, AppError> {
    let discarded = run_engine(&state, Engine::abort).await?;
    Ok(match discarded {
        Some(on_deck) => format!("successfully aborted publishing {}", on_deck.name),
        None => "nothing was staged; repository cleaned".to_string(),
    })
}

async fn push(State(state): State<AppState>) -> Result<String, AppError> {
    run_engine(&state, Engine::push).await?;
    Ok("pushed".to_string())
}

/// A stored post as JSON, shaped like the upload form.
#[derive(Debug, Serialize)]
struct PostView {
    slug: String,
    title: String,
    author: Option<String>,
    date: DateTime<FixedOffset>,
    summary: Option<String>,
    /// Space-separated
    tags: String,
    img: Option<String>,
    content: String,
}

async fn get_post(
    State(state): State<AppState>,
    UrlPath(slug): UrlPath<String>,
) -> Result<Json<PostView>, AppError> {
    let lookup = slug.clone();
    let post = run_engine(&state, move |engine| engine.get_post(&lookup)).await?;
    let tags = post.tag_list();
    let fm = post.front_matter;
    Ok(Json(PostView {
        slug,
        title: fm.title,
        author: fm.author,
        date: fm.date,
        summary: fm.summary,
        tags,
        img: fm.img,
        content: String::from_utf8_lossy(&post.content).into_owned(),
    }))
}

async fn status(State(state): State<AppState>) -> Result<Json<Option<OnDeck>>, AppError> {
    // Waits for any running transition, so keep it off the async workers.
    let on_deck = run_engine(&state, |engine| Ok(engine.on_deck())).await?;
    Ok(Json(on_deck))
}
