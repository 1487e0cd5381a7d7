//! The browser front end: a search page, file downloads, and bundled assets.

use std::{io::SeekFrom, net::SocketAddr, sync::Arc, time::SystemTime};

use axum::{
    Router,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use chrono::{DateTime, Utc};
use minijinja::{Environment, context};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use rust_embed::RustEmbed;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

use crate::{
    error::{Error, Result},
    search::{QueryEngine, SearchResult},
    storage::{OpenedFile, StorageRoot},
};

#[derive(RustEmbed)]
#[folder = "www/"]
struct Assets;

const MAIN_TEMPLATE: &str = "main.html";
const HTTP_DATE: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Bytes escaped when a file name is placed in a link path.
const LINK_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

pub struct AppState {
    engine: QueryEngine,
    storage: StorageRoot,
    templates: Environment<'static>,
    /// Normalised site path: empty, or `/x/y` without a trailing slash.
    base: String,
    site_root: String,
}

impl AppState {
    pub fn new(
        engine: QueryEngine,
        storage: StorageRoot,
        site_path: &str,
        site_root: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            engine,
            storage,
            templates: load_templates()?,
            base: normalize_base_path(site_path),
            site_root: site_root.into(),
        })
    }

    pub fn base(&self) -> &str {
        &self.base
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("storage", &self.storage)
            .field("base", &self.base)
            .field("site_root", &self.site_root)
            .finish_non_exhaustive()
    }
}

/// `db`, `/db` and `/db/` all become `/db`; an empty path stays empty.
pub fn normalize_base_path(path: &str) -> String {
    let trimmed = path.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

/// Register every template bundled under `www/templates/`.
pub fn load_templates() -> Result<Environment<'static>> {
    let mut env = Environment::new();
    for path in Assets::iter() {
        let Some(name) = path.strip_prefix("templates/") else {
            continue;
        };
        let Some(file) = Assets::get(&path) else {
            continue;
        };
        let source = String::from_utf8(file.data.into_owned()).map_err(|_| {
            Error::Config(format!("template {name} is not valid UTF-8"))
        })?;
        env.add_template_owned(name.to_string(), source)?;
    }

    if env.get_template(MAIN_TEMPLATE).is_err() {
        return Err(Error::Config(format!(
            "bundled template {MAIN_TEMPLATE} is missing"
        )));
    }
    tracing::debug!(
        count = env.templates().count(),
        "registered templates"
    );
    Ok(env)
}

pub fn router(state: Arc<AppState>) -> Router {
    let base = state.base.clone();
    let mut router = Router::new()
        .route(&format!("{base}/"), get(search_page))
        .route(&format!("{base}/file/{{*name}}"), get(download))
        .route(&format!("{base}/static/{{*path}}"), get(static_asset));
    if !base.is_empty() {
        router = router.route(&base, get(search_page));
    }
    router.with_state(state)
}

/// Bind `0.0.0.0:port` and serve until the process exits.
pub async fn serve(state: Arc<AppState>, port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(
        %addr,
        base = %state.base,
        site_root = %state.site_root,
        "serving web frontend"
    );
    axum::serve(listener, router(state)).await?;
    Ok(())
}

// -- Search page --

#[derive(Debug, Deserialize)]
struct SearchParams {
    q: Option<String>,
}

#[derive(Debug, Serialize)]
struct ResultView {
    name: String,
    tags: Vec<TagLink>,
    score: f64,
    href: String,
}

/// A tag rendered as a link to its own search.
#[derive(Debug, Serialize)]
struct TagLink {
    label: String,
    href: String,
}

fn result_views(base: &str, mut results: Vec<SearchResult>) -> Vec<ResultView> {
    results.sort_by(|a, b| b.score.total_cmp(&a.score));
    results
        .into_iter()
        .map(|r| ResultView {
            href: format!(
                "{base}/file/{}",
                utf8_percent_encode(&r.file_name, LINK_SEGMENT)
            ),
            name: r.file_name,
            tags: r
                .file_tags
                .into_iter()
                .map(|tag| TagLink {
                    href: format!(
                        "{base}/?q={}",
                        utf8_percent_encode(&tag, NON_ALPHANUMERIC)
                    ),
                    label: tag,
                })
                .collect(),
            score: r.score,
        })
        .collect()
}

async fn search_page(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> Response {
    let query = params.q.unwrap_or_default();
    let results = if query.is_empty() {
        Vec::new()
    } else {
        match state.engine.search(&query).await {
            Ok(results) => results,
            Err(err) => {
                tracing::error!(query = %query, error = %err, "search failed");
                Vec::new()
            }
        }
    };
    let results = result_views(&state.base, results);

    let rendered = state.templates.get_template(MAIN_TEMPLATE).and_then(|t| {
        t.render(context! {
            root => &state.base,
            site_root => &state.site_root,
            query => &query,
            num_results => results.len(),
            results => &results,
        })
    });

    match rendered {
        Ok(html) => Html(html).into_response(),
        Err(err) => {
            tracing::error!(error = %err, "template render failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

// -- File download --

/// Outcome of reading a `Range` header against a file size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ByteRange {
    /// No usable range; send the whole file.
    Full,
    /// Inclusive byte bounds.
    Partial { start: u64, end: u64 },
    Unsatisfiable,
}

/// Only a single `bytes=` range is honoured; anything else is ignored and
/// the whole file is sent.
fn parse_range(header: &str, size: u64) -> ByteRange {
    let Some(ranges) = header.trim().strip_prefix("bytes=") else {
        return ByteRange::Full;
    };
    if ranges.contains(',') {
        return ByteRange::Full;
    }
    let Some((first, last)) = ranges.split_once('-') else {
        return ByteRange::Full;
    };
    let (first, last) = (first.trim(), last.trim());

    if first.is_empty() {
        let Ok(suffix) = last.parse::<u64>() else {
            return ByteRange::Full;
        };
        if suffix == 0 || size == 0 {
            return ByteRange::Unsatisfiable;
        }
        return ByteRange::Partial {
            start: size.saturating_sub(suffix),
            end: size - 1,
        };
    }

    let Ok(start) = first.parse::<u64>() else {
        return ByteRange::Full;
    };
    let end = if last.is_empty() {
        None
    } else {
        match last.parse::<u64>() {
            Ok(end) if end >= start => Some(end),
            _ => return ByteRange::Full,
        }
    };
    if start >= size {
        return ByteRange::Unsatisfiable;
    }
    ByteRange::Partial {
        start,
        end: end.map_or(size - 1, |e| e.min(size - 1)),
    }
}

fn http_date(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).format(HTTP_DATE).to_string()
}

fn not_modified_since(modified: SystemTime, headers: &HeaderMap) -> bool {
    let Some(since) = headers
        .get(header::IF_MODIFIED_SINCE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
    else {
        return false;
    };
    DateTime::<Utc>::from(modified).timestamp() <= since.timestamp()
}

async fn download(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    method: Method,
    headers: HeaderMap,
) -> Response {
    match state.storage.open_file(&name).await {
        Ok(opened) => serve_file(opened, &method, &headers).await,
        Err(Error::NotFound { .. }) => {
            tracing::debug!(name, "requested file not found");
            StatusCode::NOT_FOUND.into_response()
        }
        Err(err) => {
            tracing::error!(name, error = %err, "file access failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn serve_file(
    mut opened: OpenedFile,
    method: &Method,
    headers: &HeaderMap,
) -> Response {
    let size = opened.size;
    let mime = mime_guess::from_path(&opened.path).first_or_octet_stream();
    let last_modified = opened.modified.map(http_date);

    if let Some(modified) = opened.modified
        && not_modified_since(modified, headers)
    {
        let mut resp = StatusCode::NOT_MODIFIED.into_response();
        if let Some(lm) = last_modified.and_then(|v| HeaderValue::from_str(&v).ok())
        {
            resp.headers_mut().insert(header::LAST_MODIFIED, lm);
        }
        return resp;
    }

    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map_or(ByteRange::Full, |v| parse_range(v, size));

    let (status, start, len) = match range {
        ByteRange::Full => (StatusCode::OK, 0, size),
        ByteRange::Partial { start, end } => {
            (StatusCode::PARTIAL_CONTENT, start, end - start + 1)
        }
        ByteRange::Unsatisfiable => {
            return (
                StatusCode::RANGE_NOT_SATISFIABLE,
                [(header::CONTENT_RANGE, format!("bytes */{size}"))],
            )
                .into_response();
        }
    };

    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, mime.as_ref())
        .header(header::CONTENT_LENGTH, len)
        .header(header::ACCEPT_RANGES, "bytes");
    if let Some(lm) = &last_modified {
        builder = builder.header(header::LAST_MODIFIED, lm);
    }
    if status == StatusCode::PARTIAL_CONTENT {
        builder = builder.header(
            header::CONTENT_RANGE,
            format!("bytes {start}-{}/{size}", start + len - 1),
        );
    }

    let body = if method == Method::HEAD {
        Body::empty()
    } else {
        if start > 0
            && let Err(err) = opened.file.seek(SeekFrom::Start(start)).await
        {
            tracing::error!(path = %opened.path.display(), error = %err, "seek failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
        Body::from_stream(ReaderStream::new(opened.file.take(len)))
    };

    builder
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

// -- Static assets --

async fn static_asset(Path(path): Path<String>) -> Response {
    match Assets::get(&format!("static/{path}")) {
        Some(file) => {
            let mime = mime_guess::from_path(&path).first_or_octet_stream();
            (
                [(header::CONTENT_TYPE, mime.as_ref().to_string())],
                file.data,
            )
                .into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
