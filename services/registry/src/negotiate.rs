//! Manifest media type selection from `Accept` headers.

use crate::error::RegistryError;

/// OCI image manifest.
pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";

/// Docker distribution manifest, schema 2.
pub const DOCKER_MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";

/// Media types the registry serves manifests as, most preferred first.
pub const MANIFEST_MEDIA_TYPES: [&str; 2] = [OCI_MANIFEST, DOCKER_MANIFEST_V2];

/// No server-producible media type appears in the client's list.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("none of the acceptable media types can be produced: {accepted}")]
pub struct NegotiationFailure {
    /// The client's acceptable types, as received.
    pub accepted: String,
}

impl From<NegotiationFailure> for RegistryError {
    fn from(err: NegotiationFailure) -> Self {
        RegistryError::NotAcceptable(err.accepted)
    }
}

/// Pick the first of [`MANIFEST_MEDIA_TYPES`] present in `accept`.
///
/// Each item of `accept` may itself be a comma-separated list. Media type
/// parameters such as `;q=0.9` are ignored, and wildcards are not expanded.
pub fn negotiate<'a, I>(accept: I) -> Result<&'static str, NegotiationFailure>
where
    I: IntoIterator<Item = &'a str>,
{
    let accepted: Vec<&str> = accept
        .into_iter()
        .flat_map(|value| value.split(','))
        .map(|item| item.split(';').next().unwrap_or_default().trim())
        .filter(|item| !item.is_empty())
        .collect();

    MANIFEST_MEDIA_TYPES
        .iter()
        .find(|candidate| accepted.iter().any(|item| item == *candidate))
        .copied()
        .ok_or_else(|| {
            let accepted = accepted.join(", ");
            tracing::warn!(%accepted, "unable to find an acceptable manifest type");
            NegotiationFailure { accepted }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_oci() {
        assert_eq!(
            negotiate([format!("{DOCKER_MANIFEST_V2}, {OCI_MANIFEST}").as_str()]),
            Ok(OCI_MANIFEST)
        );
    }

    #[test]
    fn falls_back_to_docker() {
        assert_eq!(
            negotiate(["application/json", DOCKER_MANIFEST_V2]),
            Ok(DOCKER_MANIFEST_V2)
        );
    }

    #[test]
    fn ignores_parameters_and_whitespace() {
        assert_eq!(
            negotiate([" application/vnd.oci.image.manifest.v1+json ; q=0.5 "]),
            Ok(OCI_MANIFEST)
        );
    }

    #[test]
    fn no_match() {
        let err = negotiate(["*/*", "text/html"]).unwrap_err();
        assert_eq!(err.accepted, "*/*, text/html");
        assert!(negotiate(std::iter::empty()).is_err());
    }
}
