use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use reqwest::{Method, StatusCode};
use serde::Deserialize;
use skywire_common::constants::{WELL_KNOWN_ATPROTO_DID, WELL_KNOWN_DID_JSON, XRPC_PREFIX, nsid};
use skywire_common::{AtIdentifier, Did, Handle};
use url::Url;

use super::did_doc::DidDocument;
use crate::errors::{IdentityError, RequestError, Result};
use crate::util::check_http_status;
use crate::{HttpClient, ResultEnvelope, global::global_client};

/// A resolved actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Canonical identifier.
    pub did: Did,
    /// Handle, present only when the DID document claims it.
    pub handle: Option<Handle>,
    /// Personal data server hosting the actor's repository.
    pub service_endpoint: Url,
}

#[derive(Debug, Deserialize)]
struct ResolveHandleOutput {
    did: String,
}

/// Resolves handles to DIDs and DIDs to service endpoints.
///
/// Strategies, in order:
/// 1. DID-shaped input never goes through handle resolution; its document is
///    fetched from the directory (`did:plc`) or from the host (`did:web`).
/// 2. Handles are resolved by the configured service's `resolveHandle` endpoint.
/// 3. If that fails, `https://<handle>/.well-known/atproto-did` (when enabled).
/// 4. Otherwise `NotFound`.
///
/// Successful handle lookups are memoised for the resolver's lifetime; use
/// [`Self::re_resolve`] or [`Self::forget`] to change a mapping. Clones share the memo.
///
/// ```no_run
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// use skywire::IdentityResolver;
/// let resolver = IdentityResolver::new()?;
/// let did = resolver.resolve_handle("atproto.com").await;
/// if let Some(did) = did.result() {
///     println!("{did}");
/// }
/// # Ok(()) }
/// ```
#[derive(Debug, Clone)]
pub struct IdentityResolver {
    client: HttpClient,
    cache: Arc<RwLock<HashMap<Handle, Did>>>,
    /// Replaces `https://<host>` for well-known and `did:web` lookups.
    web_base: Option<Url>,
}

impl IdentityResolver {
    /// Resolver on the global client.
    pub fn new() -> Result<Self> {
        Ok(Self::with_client(global_client()?))
    }

    /// Resolver on an explicit client.
    pub fn with_client(client: HttpClient) -> Self {
        Self {
            client,
            cache: Arc::new(RwLock::new(HashMap::new())),
            web_base: None,
        }
    }

    /// Send HTTPS well-known and `did:web` lookups to `base` instead of the
    /// identifier's own host. Meant for local test servers and proxies.
    pub fn with_web_base(mut self, base: Url) -> Self {
        self.web_base = Some(base);
        self
    }

    /// Resolve a handle (or confirm a DID) to a DID.
    pub async fn resolve_handle(&self, input: &str) -> ResultEnvelope<Did> {
        let result: Result<Did> = async {
            let identifier = AtIdentifier::try_from(input).map_err(IdentityError::from)?;
            self.resolve_did(&identifier, true).await
        }
        .await;
        ResultEnvelope::from_result(Some(StatusCode::OK), result)
    }

    /// Resolve a handle again, ignoring and then replacing the memoised DID.
    pub async fn re_resolve(&self, handle: &str) -> ResultEnvelope<Did> {
        let result: Result<Did> = async {
            let identifier = AtIdentifier::try_from(handle).map_err(IdentityError::from)?;
            self.resolve_did(&identifier, false).await
        }
        .await;
        ResultEnvelope::from_result(Some(StatusCode::OK), result)
    }

    /// Resolve to a full [`Identity`]: DID, verified handle and PDS endpoint.
    ///
    /// For a handle input the handle is kept only if the DID document claims
    /// it back in `alsoKnownAs`. For a DID input the document's handle claim is
    /// returned as-is, without a forward lookup.
    pub async fn resolve_identity(&self, input: &str) -> ResultEnvelope<Identity> {
        let result: Result<Identity> = async {
            let identifier = AtIdentifier::try_from(input).map_err(IdentityError::from)?;
            let did = match &identifier {
                AtIdentifier::Did(did) => did.clone(),
                AtIdentifier::Handle(_) => self.resolve_did(&identifier, true).await?,
            };
            let document = self.fetch_did_document(&did).await?;
            let service_endpoint =
                document
                    .pds_endpoint()
                    .ok_or_else(|| IdentityError::DidDocument {
                        message: format!("{did} lists no personal data server"),
                    })?;

            let claimed = document.handle();
            let handle = match &identifier {
                AtIdentifier::Handle(handle) if claimed.as_ref() == Some(handle) => claimed,
                AtIdentifier::Handle(handle) => {
                    tracing::warn!(%handle, %did, "DID document does not claim the handle");
                    None
                }
                AtIdentifier::Did(_) => claimed,
            };

            Ok(Identity {
                did,
                handle,
                service_endpoint,
            })
        }
        .await;
        ResultEnvelope::from_result(Some(StatusCode::OK), result)
    }

    /// Fetch and check the DID document of `did`.
    pub async fn did_document(&self, did: &Did) -> ResultEnvelope<DidDocument> {
        ResultEnvelope::from_result(Some(StatusCode::OK), self.fetch_did_document(did).await)
    }

    /// The memoised DID for `handle`, if any.
    pub fn cached(&self, handle: &Handle) -> Option<Did> {
        self.read_cache().get(handle).cloned()
    }

    /// Drop the memoised DID for `handle`, returning it.
    pub fn forget(&self, handle: &Handle) -> Option<Did> {
        self.write_cache().remove(handle)
    }

    // === Strategies ===

    async fn resolve_did(&self, identifier: &AtIdentifier, use_cache: bool) -> Result<Did> {
        let handle = match identifier {
            AtIdentifier::Did(did) => {
                self.fetch_did_document(did).await?;
                return Ok(did.clone());
            }
            AtIdentifier::Handle(handle) => handle,
        };

        if use_cache {
            if let Some(did) = self.cached(handle) {
                return Ok(did);
            }
        }

        let did = match self.resolve_via_service(handle).await {
            Ok(did) => did,
            Err(error) if self.client.config.well_known_fallback => {
                tracing::debug!(%handle, %error, "service resolution failed, trying well-known");
                self.resolve_via_well_known(handle).await.map_err(|error| {
                    tracing::debug!(%handle, %error, "well-known resolution failed");
                    not_found(handle)
                })?
            }
            Err(error) => {
                tracing::debug!(%handle, %error, "service resolution failed");
                return Err(not_found(handle));
            }
        };

        tracing::debug!(%handle, %did, "handle resolved");
        self.write_cache().insert(handle.clone(), did.clone());
        Ok(did)
    }

    async fn resolve_via_service(&self, handle: &Handle) -> Result<Did> {
        let mut url = self
            .client
            .service()
            .join(&format!("{XRPC_PREFIX}{}", nsid::RESOLVE_HANDLE))?;
        url.query_pairs_mut().append_pair("handle", handle.as_str());

        let response = self
            .client
            .execute(self.client.request(Method::GET, url))
            .await?;
        let output: ResolveHandleOutput = check_http_status(response)?.json()?;
        Ok(Did::try_from(output.did).map_err(IdentityError::from)?)
    }

    async fn resolve_via_well_known(&self, handle: &Handle) -> Result<Did> {
        let url = self.web_url(handle.as_str(), WELL_KNOWN_ATPROTO_DID)?;
        let response = self
            .client
            .execute(self.client.request(Method::GET, url))
            .await?;
        let response = check_http_status(response)?;
        let body = String::from_utf8_lossy(&response.body);
        Ok(Did::try_from(body.trim()).map_err(IdentityError::from)?)
    }

    async fn fetch_did_document(&self, did: &Did) -> Result<DidDocument> {
        let url = self.did_document_url(did)?;
        let response = self
            .client
            .execute(self.client.request(Method::GET, url))
            .await?;
        if matches!(response.status.as_u16(), 404 | 410) {
            return Err(not_found(did));
        }
        let document: DidDocument = check_http_status(response)?.json()?;
        if &document.id != did {
            return Err(IdentityError::DidDocument {
                message: format!("document id {} does not match {did}", document.id),
            }
            .into());
        }
        Ok(document)
    }

    fn did_document_url(&self, did: &Did) -> Result<Url> {
        match did.method() {
            "plc" => {
                let mut url = self.client.config.plc_directory.clone();
                url.path_segments_mut()
                    .map_err(|_| RequestError::Validation {
                        message: "directory URL cannot be a base".into(),
                    })?
                    .pop_if_empty()
                    .push(did.as_str());
                Ok(url)
            }
            "web" => {
                let host = did.web_host().ok_or_else(|| RequestError::Validation {
                    message: format!("unsupported did:web form: {did}"),
                })?;
                self.web_url(&host, WELL_KNOWN_DID_JSON)
            }
            method => Err(RequestError::Validation {
                message: format!("unsupported DID method `{method}`"),
            }
            .into()),
        }
    }

    fn web_url(&self, host: &str, path: &str) -> Result<Url> {
        Ok(match &self.web_base {
            Some(base) => base.join(path)?,
            None => Url::parse(&format!("https://{host}{path}"))?,
        })
    }

    fn read_cache(&self) -> RwLockReadGuard<'_, HashMap<Handle, Did>> {
        self.cache.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_cache(&self) -> RwLockWriteGuard<'_, HashMap<Handle, Did>> {
        self.cache
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn not_found(identifier: impl std::fmt::Display) -> crate::Error {
    IdentityError::NotFound {
        identifier: identifier.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> IdentityResolver {
        IdentityResolver::with_client(HttpClient::new().unwrap())
    }

    #[test]
    fn plc_document_url_uses_directory() {
        let did = Did::try_from("did:plc:ewvi7nxzyoun6zhxrhs64oiz").unwrap();
        assert_eq!(
            resolver().did_document_url(&did).unwrap().as_str(),
            "https://plc.directory/did:plc:ewvi7nxzyoun6zhxrhs64oiz"
        );
    }

    #[test]
    fn web_document_url_uses_host() {
        let did = Did::try_from("did:web:example.com%3A8443").unwrap();
        assert_eq!(
            resolver().did_document_url(&did).unwrap().as_str(),
            "https://example.com:8443/.well-known/did.json"
        );
    }

    #[tokio::test]
    async fn invalid_input_is_rejected_before_any_request() {
        let envelope = resolver().resolve_handle("not a handle!").await;
        assert!(envelope.is_kind(crate::ErrorKind::InvalidRequest));
        let envelope = resolver().resolve_handle("did:").await;
        assert!(envelope.is_kind(crate::ErrorKind::InvalidRequest));
    }

    #[test]
    fn forget_drops_memo() {
        let resolver = resolver();
        let handle = Handle::try_from("alice.test").unwrap();
        let did = Did::try_from("did:plc:alice").unwrap();
        resolver.write_cache().insert(handle.clone(), did.clone());
        assert_eq!(resolver.cached(&handle), Some(did.clone()));
        assert_eq!(resolver.forget(&handle), Some(did));
        assert_eq!(resolver.cached(&handle), None);
    }
}
