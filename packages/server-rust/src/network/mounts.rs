//! Static mount registry serving prebuilt frontend bundles.
//!
//! Each mount maps a URL prefix to a directory. Requests resolve against the
//! mount with the longest matching prefix; file bytes and content types come
//! from `tower_http::services::ServeDir`, while directory handling (trailing
//! slash redirects, index files, listings) happens here so that redirects keep
//! the mount prefix.

use std::path::{Path, PathBuf};

use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, HeaderValue, Method, StatusCode, Uri};
use axum::response::{Html, IntoResponse, Response};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use tower::ServiceExt;
use tower_http::services::ServeDir;
use tracing::{debug, warn};

use super::config::MountConfig;
use super::prefix::PathPrefix;
use crate::error::ConfigurationError;

const INDEX_FILE: &str = "index.html";

/// Characters left unescaped in listing links.
const LINK_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// A URL prefix served from a directory. Immutable once registered.
#[derive(Debug, Clone)]
pub struct Mount {
    prefix: PathPrefix,
    root: PathBuf,
    allow_directory_listing: bool,
    files: ServeDir,
}

impl Mount {
    #[must_use]
    pub fn path_prefix(&self) -> &str {
        self.prefix.as_str()
    }

    #[must_use]
    pub fn root_location(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn allow_directory_listing(&self) -> bool {
        self.allow_directory_listing
    }

    /// Serves `remainder` (the request path below the prefix) from this mount.
    async fn serve(&self, mut req: Request, remainder: &str) -> Response {
        if req.method() != Method::GET && req.method() != Method::HEAD {
            return (
                StatusCode::METHOD_NOT_ALLOWED,
                [(header::ALLOW, HeaderValue::from_static("GET, HEAD"))],
            )
                .into_response();
        }

        let Some(relative) = sanitize(remainder) else {
            debug!(path = %req.uri().path(), "rejected static path");
            return StatusCode::NOT_FOUND.into_response();
        };
        let target = self.root.join(&relative);

        let is_dir = tokio::fs::metadata(&target)
            .await
            .is_ok_and(|meta| meta.is_dir());

        if is_dir {
            let original = req.uri().path();
            if !original.ends_with('/') {
                return redirect_to_slash(req.uri());
            }
            let has_index = tokio::fs::metadata(target.join(INDEX_FILE))
                .await
                .is_ok_and(|meta| meta.is_file());
            if !has_index {
                if self.allow_directory_listing {
                    return render_listing(&target, original).await;
                }
                return StatusCode::NOT_FOUND.into_response();
            }
        }

        let path_and_query = match req.uri().query() {
            Some(query) => format!("{remainder}?{query}"),
            None => remainder.to_string(),
        };
        let Ok(uri) = Uri::builder().path_and_query(path_and_query).build() else {
            return StatusCode::BAD_REQUEST.into_response();
        };
        *req.uri_mut() = uri;

        match self.files.clone().oneshot(req).await {
            Ok(response) => response.map(Body::new),
            Err(never) => match never {},
        }
    }
}

/// Registry of static mounts, kept in longest-prefix-first order.
#[derive(Debug, Clone, Default)]
pub struct MountTable {
    mounts: Vec<Mount>,
}

impl MountTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a table from configuration, registering mounts in order.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigurationError`] raised by [`MountTable::register`].
    pub fn from_config(configs: &[MountConfig]) -> Result<Self, ConfigurationError> {
        let mut table = Self::new();
        for config in configs {
            table.register(&config.path_prefix, &config.root, config.allow_directory_listing)?;
        }
        Ok(table)
    }

    /// Registers a mount after checking that its root is an accessible directory.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] when the prefix is malformed or already
    /// mounted, or when the root is missing, unreadable, or not a directory.
    pub fn register(
        &mut self,
        path_prefix: &str,
        root_location: impl Into<PathBuf>,
        allow_directory_listing: bool,
    ) -> Result<&Mount, ConfigurationError> {
        let prefix = PathPrefix::parse(path_prefix)?;
        let root = root_location.into();

        if self.mounts.iter().any(|m| m.prefix == prefix) {
            return Err(ConfigurationError::DuplicateMountPrefix(prefix.to_string()));
        }

        let meta = std::fs::metadata(&root).map_err(|source| ConfigurationError::MissingMountRoot {
            prefix: prefix.to_string(),
            root: root.clone(),
            source,
        })?;
        if !meta.is_dir() {
            return Err(ConfigurationError::MountRootNotDirectory {
                prefix: prefix.to_string(),
                root,
            });
        }

        let mount = Mount {
            files: ServeDir::new(&root).append_index_html_on_directories(true),
            prefix,
            root,
            allow_directory_listing,
        };

        // Insert after every mount with an equal or longer prefix.
        let position = self
            .mounts
            .partition_point(|m| m.prefix.match_len() >= mount.prefix.match_len());
        self.mounts.insert(position, mount);
        Ok(&self.mounts[position])
    }

    /// Finds the mount with the longest prefix matching `path` and the remainder below it.
    #[must_use]
    pub fn resolve<'a>(&self, path: &'a str) -> Option<(&Mount, &'a str)> {
        self.mounts
            .iter()
            .find_map(|mount| mount.prefix.strip(path).map(|rest| (mount, rest)))
    }

    /// Serves a request from the matching mount, or 404 when no mount matches.
    pub async fn serve(&self, req: Request) -> Response {
        let path = req.uri().path().to_string();
        match self.resolve(&path) {
            Some((mount, remainder)) => mount.serve(req, remainder).await,
            None => StatusCode::NOT_FOUND.into_response(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.mounts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mounts.is_empty()
    }
}

/// Percent-decodes a request remainder into a relative filesystem path.
///
/// Returns `None` for parent-directory segments, backslashes, drive-like
/// segments, or invalid UTF-8.
fn sanitize(remainder: &str) -> Option<PathBuf> {
    let decoded = percent_decode_str(remainder).decode_utf8().ok()?;
    let mut relative = PathBuf::new();
    for segment in decoded.split('/') {
        match segment {
            "" | "." => {}
            ".." => return None,
            s if s.contains('\\') || s.contains('\0') || is_drive_like(s) => return None,
            s if cfg!(windows) && s.contains(':') => return None,
            s => relative.push(s),
        }
    }
    Some(relative)
}

/// `C:` and the like, which would re-root the path on Windows.
fn is_drive_like(segment: &str) -> bool {
    let bytes = segment.as_bytes();
    bytes.len() == 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

fn redirect_to_slash(uri: &Uri) -> Response {
    let location = match uri.query() {
        Some(query) => format!("{}/?{query}", uri.path()),
        None => format!("{}/", uri.path()),
    };
    match HeaderValue::from_str(&location) {
        Ok(value) => (StatusCode::PERMANENT_REDIRECT, [(header::LOCATION, value)]).into_response(),
        Err(_) => StatusCode::BAD_REQUEST.into_response(),
    }
}

async fn render_listing(dir: &Path, request_path: &str) -> Response {
    let mut reader = match tokio::fs::read_dir(dir).await {
        Ok(reader) => reader,
        Err(err) => {
            warn!(dir = %dir.display(), error = %err, "failed to list directory");
            return StatusCode::NOT_FOUND.into_response();
        }
    };

    let mut names = Vec::new();
    while let Ok(Some(entry)) = reader.next_entry().await {
        let name = entry.file_name().to_string_lossy().into_owned();
        let is_dir = entry.file_type().await.is_ok_and(|t| t.is_dir());
        names.push((name, is_dir));
    }
    names.sort();

    let title = escape_html(request_path);
    let mut body = format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>Directory: {title}</title></head>\n<body><h1>Directory: {title}</h1>\n<ul>\n"
    );
    if request_path != "/" {
        body.push_str("<li><a href=\"../\">../</a></li>\n");
    }
    for (name, is_dir) in names {
        let suffix = if is_dir { "/" } else { "" };
        let href = utf8_percent_encode(&name, LINK_SEGMENT);
        body.push_str(&format!(
            "<li><a href=\"{href}{suffix}\">{}{suffix}</a></li>\n",
            escape_html(&name)
        ));
    }
    body.push_str("</ul></body></html>\n");

    Html(body).into_response()
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}
