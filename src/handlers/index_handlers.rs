//! HTTP handlers for the simple package index.
//! Listings are rendered as PEP 503 HTML or, when the client asks for it,
//! PEP 691 JSON. Distribution bodies are streamed from disk.

use crate::{
    errors::AppError,
    models::{
        distribution::Distribution,
        package::{Package, is_valid_name, normalize_name},
    },
    services::storage_service::StorageService,
};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Redirect, Response},
};
use futures::TryStreamExt;
use serde::Serialize;
use tokio_util::io::ReaderStream;

pub const PYPI_JSON_V1: &str = "application/vnd.pypi.simple.v1+json";
const PYPI_JSON_LATEST: &str = "application/vnd.pypi.simple.latest+json";
const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";
const API_VERSION: &str = "1.0";

/// Representation picked from the request's `Accept` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexFormat {
    Html,
    Json,
}

impl IndexFormat {
    /// HTML unless the client explicitly accepts the PyPI JSON media type.
    pub fn negotiate(headers: &HeaderMap) -> Self {
        let accepts_json = headers
            .get_all(header::ACCEPT)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .map(|item| item.split(';').next().unwrap_or("").trim())
            .any(|media| media == PYPI_JSON_V1 || media == PYPI_JSON_LATEST);

        if accepts_json {
            IndexFormat::Json
        } else {
            IndexFormat::Html
        }
    }
}

#[derive(Serialize)]
struct Meta {
    #[serde(rename = "api-version")]
    api_version: &'static str,
}

#[derive(Serialize)]
struct ProjectEntry {
    name: String,
}

#[derive(Serialize)]
struct ProjectList {
    meta: Meta,
    projects: Vec<ProjectEntry>,
}

#[derive(Serialize)]
struct FileHashes {
    md5: String,
}

#[derive(Serialize)]
struct FileEntry {
    filename: String,
    url: String,
    hashes: FileHashes,
    size: u64,
}

#[derive(Serialize)]
struct ProjectDetail {
    meta: Meta,
    name: String,
    files: Vec<FileEntry>,
}

/// GET `/`: index of every package.
pub async fn list_packages(
    State(service): State<StorageService>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let mut packages: Vec<Package> = service.list_packages().try_collect().await?;
    packages.sort_by(|a, b| a.normalized.cmp(&b.normalized));
    packages.dedup_by(|a, b| a.normalized == b.normalized);

    let format = IndexFormat::negotiate(&headers);
    let body = match format {
        IndexFormat::Html => build_package_index_html(&packages),
        IndexFormat::Json => json_body(&ProjectList {
            meta: Meta {
                api_version: API_VERSION,
            },
            projects: packages
                .into_iter()
                .map(|pkg| ProjectEntry { name: pkg.name })
                .collect(),
        })?,
    };

    Ok(index_response(format, body))
}

/// GET `/{package}/`: index of one package's distribution files.
///
/// A name that is not in normalized form redirects to its normalized URL.
pub async fn list_distributions(
    State(service): State<StorageService>,
    Path(package): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let normalized = normalize_name(&package);
    if normalized != package && is_valid_name(&package) {
        return Ok(Redirect::permanent(&format!("../{}/", normalized)).into_response());
    }

    let mut dists: Vec<Distribution> = service
        .list_distributions(&package)
        .await?
        .try_collect()
        .await?;
    dists.sort_by(|a, b| a.filename.cmp(&b.filename));

    let files: Vec<FileEntry> = service
        .digest_distributions(&package, dists)
        .await?
        .into_iter()
        .map(|(dist, md5)| FileEntry {
            url: dist.filename.clone(),
            filename: dist.filename,
            hashes: FileHashes { md5 },
            size: dist.size_bytes,
        })
        .collect();

    let format = IndexFormat::negotiate(&headers);
    let body = match format {
        IndexFormat::Html => build_project_html(&normalized, &files),
        IndexFormat::Json => json_body(&ProjectDetail {
            meta: Meta {
                api_version: API_VERSION,
            },
            name: normalized,
            files,
        })?,
    };

    Ok(index_response(format, body))
}

/// GET `/{package}`: package pages live at the trailing-slash URL.
pub async fn redirect_to_slash(Path(package): Path<String>) -> Result<Response, AppError> {
    if !is_valid_name(&package) {
        return Err(AppError::not_found(format!("package `{}` not found", package)));
    }
    Ok(Redirect::permanent(&format!("{}/", package)).into_response())
}

/// GET `/{package}/{filename}`: stream the distribution bytes.
pub async fn get_distribution(
    State(service): State<StorageService>,
    Path((package, filename)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let (dist, file) = service.read_distribution(&package, &filename).await?;
    let stream = ReaderStream::new(file);
    let body = Body::from_stream(stream);

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    set_distribution_headers(response.headers_mut(), &dist);

    Ok(response)
}

/// HEAD `/{package}/{filename}`: same headers as GET but no body.
pub async fn head_distribution(
    State(service): State<StorageService>,
    Path((package, filename)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let dist = service.distribution_metadata(&package, &filename).await?;
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::OK;
    set_distribution_headers(response.headers_mut(), &dist);

    Ok(response)
}

fn set_distribution_headers(headers: &mut HeaderMap, dist: &Distribution) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(dist.content_type()),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(dist.size_bytes));

    let last_modified = dist
        .last_modified
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string();
    if let Ok(value) = HeaderValue::from_str(&last_modified) {
        headers.insert(header::LAST_MODIFIED, value);
    }
}

fn index_response(format: IndexFormat, body: String) -> Response {
    let content_type = match format {
        IndexFormat::Html => HTML_CONTENT_TYPE,
        IndexFormat::Json => PYPI_JSON_V1,
    };

    let mut response = Response::new(Body::from(body));
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(header::VARY, HeaderValue::from_static("Accept"));
    *response.status_mut() = StatusCode::OK;
    response
}

fn json_body<T: Serialize>(value: &T) -> Result<String, AppError> {
    serde_json::to_string(value)
        .map_err(|err| AppError::internal(format!("serializing index: {}", err)))
}

fn build_package_index_html(packages: &[Package]) -> String {
    let mut html = html_head("Simple index");
    for pkg in packages {
        html.push_str(&format!(
            "    <a href=\"{}/\">{}</a><br/>\n",
            html_escape(&pkg.normalized),
            html_escape(&pkg.name)
        ));
    }
    html.push_str(HTML_TAIL);
    html
}

fn build_project_html(package: &str, files: &[FileEntry]) -> String {
    let mut html = html_head(&format!("Links for {}", package));
    html.push_str(&format!("    <h1>Links for {}</h1>\n", html_escape(package)));
    for file in files {
        html.push_str(&format!(
            "    <a href=\"{}#md5={}\">{}</a><br/>\n",
            html_escape(&file.url),
            file.hashes.md5,
            html_escape(&file.filename)
        ));
    }
    html.push_str(HTML_TAIL);
    html
}

fn html_head(title: &str) -> String {
    format!(
        concat!(
            "<!DOCTYPE html>\n",
            "<html>\n",
            "  <head>\n",
            "    <meta name=\"pypi:repository-version\" content=\"{}\">\n",
            "    <title>{}</title>\n",
            "  </head>\n",
            "  <body>\n"
        ),
        API_VERSION,
        html_escape(title)
    )
}

const HTML_TAIL: &str = "  </body>\n</html>\n";

fn html_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accept(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn test_negotiate_defaults_to_html() {
        assert_eq!(IndexFormat::negotiate(&HeaderMap::new()), IndexFormat::Html);
        assert_eq!(IndexFormat::negotiate(&accept("text/html")), IndexFormat::Html);
        assert_eq!(IndexFormat::negotiate(&accept("*/*")), IndexFormat::Html);
    }

    #[test]
    fn test_negotiate_json() {
        assert_eq!(
            IndexFormat::negotiate(&accept(
                "application/vnd.pypi.simple.v1+json, text/html;q=0.01"
            )),
            IndexFormat::Json
        );
        assert_eq!(
            IndexFormat::negotiate(&accept("application/vnd.pypi.simple.latest+json;q=0.9")),
            IndexFormat::Json
        );
    }

    #[test]
    fn test_project_html_escapes_and_links_hashes() {
        let files = vec![FileEntry {
            filename: "foo-1.0.tar.gz".into(),
            url: "foo-1.0.tar.gz".into(),
            hashes: FileHashes { md5: "abc123".into() },
            size: 3,
        }];
        let html = build_project_html("foo", &files);
        assert!(html.contains("<a href=\"foo-1.0.tar.gz#md5=abc123\">foo-1.0.tar.gz</a>"));
        assert!(html.contains("pypi:repository-version"));

        let packages = vec![Package::new("a<b")];
        assert!(build_package_index_html(&packages).contains("a&lt;b"));
    }
}
