use serde::{Deserialize, Serialize};
use skywire_common::constants::PDS_SERVICE_ID;
use skywire_common::{Did, Handle};
use url::Url;

/// The parts of a DID document this SDK reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DidDocument {
    /// The DID this document describes.
    pub id: Did,
    /// Alternative names; handles appear as `at://<handle>`.
    #[serde(default)]
    pub also_known_as: Vec<String>,
    /// Verification methods, kept opaque.
    #[serde(default)]
    pub verification_method: Vec<serde_json::Value>,
    /// Service entries.
    #[serde(default)]
    pub service: Vec<DidService>,
}

/// One `service` entry of a DID document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DidService {
    /// Service id, `#atproto_pds` or `<did>#atproto_pds`.
    pub id: String,
    /// Service type.
    #[serde(rename = "type")]
    pub kind: String,
    /// Usually a URL string; DID Core also allows maps and sets.
    pub service_endpoint: serde_json::Value,
}

impl DidDocument {
    /// The personal data server endpoint, if the document lists a usable one.
    pub fn pds_endpoint(&self) -> Option<Url> {
        self.service
            .iter()
            .find(|s| s.id == PDS_SERVICE_ID || s.id.ends_with(PDS_SERVICE_ID))
            .and_then(|s| s.service_endpoint.as_str())
            .and_then(|endpoint| Url::parse(endpoint).ok())
            .filter(|url| matches!(url.scheme(), "https" | "http"))
    }

    /// The first syntactically valid handle claimed in `alsoKnownAs`.
    pub fn handle(&self) -> Option<Handle> {
        self.also_known_as
            .iter()
            .filter_map(|aka| aka.strip_prefix("at://"))
            .find_map(|name| Handle::try_from(name).ok())
    }
}
