//! Azure Blob Storage backend speaking the Blob REST API directly over reqwest.
//!
//! Requests are authorized either with Shared Key (HMAC-SHA256 over a canonical string, see
//! <https://learn.microsoft.com/en-us/rest/api/storageservices/authorize-with-shared-key>) or by
//! appending a SAS token to the URL.

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64_STANDARD};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::percent_decode_str;
use reqwest::{Method, StatusCode, header};
use sha2::Sha256;
use tracing::{debug, instrument};
use url::Url;

use super::connection_string::{ConnectionString, Credential};
use super::{BlobStore, Result, StorageError};

type HmacSha256 = Hmac<Sha256>;

/// REST API version sent with every request
pub const API_VERSION: &str = "2023-11-03";

pub struct AzureBlobStore {
    client: reqwest::Client,
    connection: ConnectionString,
    container: String,
}

impl AzureBlobStore {
    pub fn from_connection_string(connection_string: &str, container: impl Into<String>) -> Result<Self> {
        let connection: ConnectionString = connection_string.parse()?;
        Self::new(connection, container)
    }

    pub fn new(connection: ConnectionString, container: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: super::http_client()?,
            connection,
            container: container.into(),
        })
    }

    fn container_url(&self) -> Result<Url> {
        let mut url = self.connection.blob_endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| StorageError::Config("blob endpoint cannot be a base URL".to_string()))?
            .pop_if_empty()
            .push(&self.container);
        Ok(url)
    }

    fn blob_url(&self, key: &str) -> Result<Url> {
        let mut url = self.container_url()?;
        url.path_segments_mut()
            .map_err(|_| StorageError::Config("blob endpoint cannot be a base URL".to_string()))?
            .extend(key.split('/'));
        Ok(url)
    }

    /// Stamp, authorize and send a request. Non-success statuses are returned to the caller.
    async fn send(
        &self,
        method: Method,
        mut url: Url,
        headers: Vec<(&'static str, String)>,
        body: Option<Bytes>,
    ) -> Result<reqwest::Response> {
        let date = rfc1123(Utc::now());
        let content_length = body.as_ref().map_or(0, Bytes::len);

        let mut ms_headers: Vec<(&'static str, String)> =
            vec![("x-ms-date", date), ("x-ms-version", API_VERSION.to_string())];
        let mut content_type = String::new();
        for (name, value) in &headers {
            if name.starts_with("x-ms-") {
                ms_headers.push((*name, value.clone()));
            } else if name.eq_ignore_ascii_case("content-type") {
                content_type = value.clone();
            }
        }

        let authorization = match &self.connection.credential {
            Credential::SharedKey { key } => {
                let account = self.connection.account_name.as_deref().unwrap_or_default();
                let to_sign = string_to_sign(&method, content_length, &content_type, &ms_headers, &url, account);
                Some(format!("SharedKey {account}:{}", sign(key, &to_sign)?))
            }
            Credential::Sas { token } => {
                append_sas(&mut url, token);
                None
            }
        };

        debug!(%method, path = url.path(), "Sending blob storage request");

        let mut request = self.client.request(method, url);
        for (name, value) in ms_headers.into_iter().chain(headers) {
            request = request.header(name, value);
        }
        if let Some(authorization) = authorization {
            request = request.header(header::AUTHORIZATION, authorization);
        }
        if let Some(body) = body {
            request = request.body(body);
        }

        Ok(request.send().await?)
    }
}

#[async_trait]
impl BlobStore for AzureBlobStore {
    #[instrument(skip(self, data), fields(container = %self.container, size = data.len()), err)]
    async fn put(&self, key: &str, content_type: &str, data: Bytes) -> Result<()> {
        let url = self.blob_url(key)?;
        let headers = vec![
            ("x-ms-blob-type", "BlockBlob".to_string()),
            ("content-type", content_type.to_string()),
        ];

        let response = self.send(Method::PUT, url, headers, Some(data)).await?;
        check("upload blob", response).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(container = %self.container), err)]
    async fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let mut url = self.container_url()?;
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("restype", "container").append_pair("comp", "list");
                if let Some(marker) = &marker {
                    query.append_pair("marker", marker);
                }
            }

            let response = self.send(Method::GET, url, Vec::new(), None).await?;
            let body = check("list blobs", response).await?.text().await?;
            let page = parse_list_blobs(&body);

            debug!(count = page.names.len(), more = page.next_marker.is_some(), "Listed blob page");
            names.extend(page.names);

            match page.next_marker {
                Some(next) => marker = Some(next),
                None => break,
            }
        }

        Ok(names)
    }

    #[instrument(skip(self), fields(container = %self.container), err)]
    async fn ensure_container(&self) -> Result<()> {
        let mut url = self.container_url()?;
        url.query_pairs_mut().append_pair("restype", "container");

        let response = self.send(Method::PUT, url, Vec::new(), None).await?;
        if response.status() == StatusCode::CONFLICT {
            debug!("Container already exists");
            return Ok(());
        }
        check("create container", response).await?;
        Ok(())
    }

    fn endpoint(&self) -> Option<String> {
        Some(self.connection.endpoint_base())
    }
}

/// Turn a non-success response into a [`StorageError::Service`] carrying Azure's `<Message>`.
async fn check(operation: &str, response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = extract_element(&body, "Message")
        .map(|(_, m)| unescape_xml(m.trim()))
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| {
            if body.trim().is_empty() {
                status.canonical_reason().unwrap_or("unknown error").to_string()
            } else {
                body.trim().to_string()
            }
        });

    Err(StorageError::Service {
        operation: operation.to_string(),
        status: status.as_u16(),
        message,
    })
}

fn rfc1123(now: DateTime<Utc>) -> String {
    now.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn append_sas(url: &mut Url, token: &str) {
    let query = match url.query() {
        Some(existing) if !existing.is_empty() => format!("{existing}&{token}"),
        _ => token.to_string(),
    };
    url.set_query(Some(&query));
}

/// Build the Shared Key string-to-sign for a request.
///
/// Only `Content-Length` and `Content-Type` are ever set among the standard headers, so the
/// remaining slots are empty. A zero content length is signed as the empty string.
fn string_to_sign(
    method: &Method,
    content_length: usize,
    content_type: &str,
    ms_headers: &[(&str, String)],
    url: &Url,
    account: &str,
) -> String {
    let content_length = if content_length == 0 {
        String::new()
    } else {
        content_length.to_string()
    };

    let mut headers: Vec<(String, &str)> = ms_headers
        .iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), value.trim()))
        .collect();
    headers.sort_by(|a, b| a.0.cmp(&b.0));
    let canonical_headers: String = headers.iter().map(|(name, value)| format!("{name}:{value}\n")).collect();

    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.to_ascii_lowercase(), v.into_owned()))
        .collect();
    params.sort();
    let mut canonical_resource = format!("/{account}{}", url.path());
    for (key, value) in params {
        canonical_resource.push_str(&format!("\n{key}:{value}"));
    }

    format!(
        "{method}\n\n\n{content_length}\n\n{content_type}\n\n\n\n\n\n\n{canonical_headers}{canonical_resource}"
    )
}

fn sign(key: &[u8], string_to_sign: &str) -> Result<String> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|e| StorageError::InvalidConnectionString(format!("account key: {e}")))?;
    mac.update(string_to_sign.as_bytes());
    Ok(BASE64_STANDARD.encode(mac.finalize().into_bytes()))
}

/// One page of a List Blobs response
#[derive(Debug, Default, PartialEq)]
pub struct ListPage {
    pub names: Vec<String>,
    pub next_marker: Option<String>,
}

/// Pull blob names and the continuation marker out of an `EnumerationResults` document.
///
/// Names Azure could not put in XML verbatim arrive as `<Name Encoded="true">` with a
/// percent-encoded body and are decoded here.
pub fn parse_list_blobs(body: &str) -> ListPage {
    let mut page = ListPage {
        next_marker: extract_element(body, "NextMarker")
            .map(|(_, marker)| unescape_xml(marker))
            .filter(|m| !m.is_empty()),
        ..Default::default()
    };

    let mut rest = body;
    while let Some(start) = rest.find("<Blob>") {
        let after = &rest[start + "<Blob>".len()..];
        let Some(end) = after.find("</Blob>") else {
            break;
        };
        if let Some((attrs, name)) = extract_element(&after[..end], "Name") {
            let name = unescape_xml(name);
            if attrs.contains(r#"Encoded="true""#) {
                page.names.push(percent_decode_str(&name).decode_utf8_lossy().into_owned());
            } else {
                page.names.push(name);
            }
        }
        rest = &after[end + "</Blob>".len()..];
    }

    page
}

/// First `<tag ...>body</tag>` in `body`, as (attribute text, element body).
/// A self-closing `<tag />` yields an empty body.
fn extract_element<'a>(body: &'a str, tag: &str) -> Option<(&'a str, &'a str)> {
    let open = format!("<{tag}");
    let close = format!("</{tag}>");
    let mut search = body;
    loop {
        let rest = &search[search.find(&open)? + open.len()..];
        // `<Name` must not match `<NameSpace>`
        if !rest.starts_with(['>', '/', ' ', '\t', '\r', '\n']) {
            search = rest;
            continue;
        }

        let tag_end = rest.find('>')?;
        let attrs = &rest[..tag_end];
        if let Some(attrs) = attrs.strip_suffix('/') {
            return Some((attrs.trim(), ""));
        }
        let inner = &rest[tag_end + 1..];
        let end = inner.find(&close)?;
        return Some((attrs.trim(), &inner[..end]));
    }
}

/// Resolve the predefined XML entities and numeric character references.
fn unescape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let resolved = tail.find(';').and_then(|semi| {
            let ch = match &tail[1..semi] {
                "lt" => '<',
                "gt" => '>',
                "quot" => '"',
                "apos" => '\'',
                "amp" => '&',
                entity => {
                    let number = entity.strip_prefix('#')?;
                    let code = match number.strip_prefix(['x', 'X']) {
                        Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                        None => number.parse().ok()?,
                    };
                    char::from_u32(code)?
                }
            };
            Some((ch, semi + 1))
        });
        match resolved {
            Some((ch, consumed)) => {
                out.push(ch);
                rest = &tail[consumed..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}
