use plan_types::Fingerprint;
use serde_json::Value;

use crate::canonical::canonical_bytes;

/// Domain-separated BLAKE3 fingerprinter.
///
/// Each fingerprinter carries a domain tag that is prepended to every hash
/// computation, so a plan document and, say, a dead-letter payload with
/// identical bytes never share a digest.
pub struct Fingerprinter {
    domain: &'static str,
}

impl Fingerprinter {
    /// Fingerprinter for stored plan documents.
    pub const DOCUMENT: Self = Self {
        domain: "plan-doc-v1",
    };

    /// Create a fingerprinter with a custom domain tag.
    pub const fn new(domain: &'static str) -> Self {
        Self { domain }
    }

    /// Hash raw bytes with domain separation.
    pub fn hash(&self, data: &[u8]) -> Fingerprint {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(b":");
        hasher.update(data);
        Fingerprint::from_hash(*hasher.finalize().as_bytes())
    }

    /// Fingerprint a document over its canonical encoding.
    pub fn fingerprint(&self, document: &Value) -> Fingerprint {
        self.hash(&canonical_bytes(document))
    }

    /// Check that `document` produces the `expected` fingerprint.
    pub fn verify(&self, document: &Value, expected: &Fingerprint) -> bool {
        self.fingerprint(document) == *expected
    }

    /// The domain tag used by this fingerprinter.
    pub fn domain(&self) -> &str {
        self.domain
    }
}

/// Fingerprint a plan document with the [`Fingerprinter::DOCUMENT`] domain.
pub fn fingerprint(document: &Value) -> Fingerprint {
    Fingerprinter::DOCUMENT.fingerprint(document)
}
