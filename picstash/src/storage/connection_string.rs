//! Azure Storage connection string parsing.
//!
//! A connection string is a `;`-separated list of `key=value` pairs, e.g.
//!
//! ```text
//! DefaultEndpointsProtocol=https;AccountName=myaccount;AccountKey=<base64>;EndpointSuffix=core.windows.net
//! ```
//!
//! Only the keys that matter for blob access are interpreted; queue/table/file endpoints are
//! ignored. `UseDevelopmentStorage=true` expands to the well-known Azurite emulator account.

use std::str::FromStr;

use base64::{Engine, engine::general_purpose::STANDARD as BASE64_STANDARD};
use url::Url;

use super::StorageError;

const DEV_ACCOUNT_NAME: &str = "devstoreaccount1";
const DEV_ACCOUNT_KEY: &str = "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";
const DEV_BLOB_ENDPOINT: &str = "http://127.0.0.1:10000/devstoreaccount1";

/// How requests to the account are authorized.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Shared Key: every request is signed with the decoded account key
    SharedKey { key: Vec<u8> },
    /// Shared access signature appended to every request URL (without the leading `?`)
    Sas { token: String },
}

// Keys never end up in logs
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::SharedKey { .. } => f.write_str("SharedKey(..)"),
            Credential::Sas { .. } => f.write_str("Sas(..)"),
        }
    }
}

/// The parts of a connection string needed to reach blob storage.
#[derive(Debug, Clone)]
pub struct ConnectionString {
    pub account_name: Option<String>,
    pub credential: Credential,
    pub blob_endpoint: Url,
}

impl FromStr for ConnectionString {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut protocol = "https".to_string();
        let mut suffix = "core.windows.net".to_string();
        let mut account_name = None;
        let mut account_key = None;
        let mut blob_endpoint = None;
        let mut sas = None;
        let mut development = false;

        for part in s.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| invalid(format!("expected key=value, found '{part}'")))?;
            let value = value.trim().to_string();

            match key.trim().to_ascii_lowercase().as_str() {
                "defaultendpointsprotocol" => protocol = value,
                "endpointsuffix" => suffix = value,
                "accountname" => account_name = Some(value),
                "accountkey" => account_key = Some(value),
                "blobendpoint" => blob_endpoint = Some(value),
                "sharedaccesssignature" => sas = Some(value),
                "usedevelopmentstorage" => development = value.eq_ignore_ascii_case("true"),
                _ => {}
            }
        }

        if development {
            return Ok(Self {
                account_name: Some(DEV_ACCOUNT_NAME.to_string()),
                credential: Credential::SharedKey {
                    key: decode_key(DEV_ACCOUNT_KEY)?,
                },
                blob_endpoint: parse_endpoint(DEV_BLOB_ENDPOINT)?,
            });
        }

        let blob_endpoint = match (blob_endpoint, &account_name) {
            (Some(endpoint), _) => parse_endpoint(&endpoint)?,
            (None, Some(account)) => parse_endpoint(&format!("{protocol}://{account}.blob.{suffix}"))?,
            (None, None) => return Err(invalid("either AccountName or BlobEndpoint is required".to_string())),
        };

        let credential = match (account_key, sas) {
            (Some(key), _) => {
                if account_name.is_none() {
                    return Err(invalid("AccountKey requires AccountName".to_string()));
                }
                Credential::SharedKey { key: decode_key(&key)? }
            }
            (None, Some(token)) => Credential::Sas {
                token: token.trim_start_matches('?').to_string(),
            },
            (None, None) => return Err(invalid("either AccountKey or SharedAccessSignature is required".to_string())),
        };

        Ok(Self {
            account_name,
            credential,
            blob_endpoint,
        })
    }
}

impl ConnectionString {
    /// The blob endpoint without a trailing slash, suitable as a public URL base.
    pub fn endpoint_base(&self) -> String {
        self.blob_endpoint.as_str().trim_end_matches('/').to_string()
    }
}

fn decode_key(key: &str) -> Result<Vec<u8>, StorageError> {
    BASE64_STANDARD
        .decode(key)
        .map_err(|e| invalid(format!("AccountKey is not valid base64: {e}")))
}

fn parse_endpoint(endpoint: &str) -> Result<Url, StorageError> {
    Url::parse(endpoint).map_err(|e| invalid(format!("blob endpoint '{endpoint}' is not a valid URL: {e}")))
}

fn invalid(reason: String) -> StorageError {
    StorageError::InvalidConnectionString(reason)
}
