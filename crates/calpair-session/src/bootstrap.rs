//! Identity bootstrap from the navigation context.
//!
//! After the federated login completes, the provider redirects back with
//! the session identity in a query parameter:
//!
//! ```text
//! https://app.example/?identity=u1&lang=pt  →  identity "u1"
//!                                           →  address becomes https://app.example/?lang=pt
//! ```
//!
//! The parameter is consumed exactly once. Stripping it from the visible
//! address is what makes [`capture_identity`] idempotent: a second call
//! finds nothing and returns `None`.

use calpair_protocol::Identity;
use url::Url;

use crate::SessionError;

/// Default name of the query parameter that carries the identity.
pub const DEFAULT_IDENTITY_PARAM: &str = "identity";

/// The current address of the client, plus a way to rewrite it in place.
///
/// `replace` is cosmetic: it must not navigate or reload, the same way a
/// browser history replace only swaps the visible URL.
pub trait NavigationContext: Send + 'static {
    /// Returns the current address.
    fn current(&self) -> Url;

    /// Rewrites the visible address without navigating.
    fn replace(&mut self, url: Url);
}

/// An in-process [`NavigationContext`] backed by a plain `Url`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryNavigation {
    url: Url,
    replacements: usize,
}

impl MemoryNavigation {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            replacements: 0,
        }
    }

    /// Parses `address` and wraps it.
    pub fn parse(address: &str) -> Result<Self, SessionError> {
        Ok(Self::new(Url::parse(address)?))
    }

    /// How many times the address has been rewritten.
    pub fn replacements(&self) -> usize {
        self.replacements
    }
}

impl NavigationContext for MemoryNavigation {
    fn current(&self) -> Url {
        self.url.clone()
    }

    fn replace(&mut self, url: Url) {
        tracing::trace!(%url, "navigation address replaced");
        self.url = url;
        self.replacements += 1;
    }
}

/// Extracts the identity carried by `param` and strips it from the address.
///
/// - Parameter present and non-empty: returns the identity; the address is
///   rewritten with every occurrence of `param` removed and the remaining
///   pairs kept in order.
/// - Parameter present but empty: still stripped, returns `None`.
/// - Parameter absent: address untouched, returns `None`.
///
/// When the parameter appears more than once, the first occurrence wins.
pub fn capture_identity<N: NavigationContext + ?Sized>(
    nav: &mut N,
    param: &str,
) -> Option<Identity> {
    let current = nav.current();

    let mut found: Option<String> = None;
    let mut kept: Vec<(String, String)> = Vec::new();
    for (key, value) in current.query_pairs() {
        if key == param {
            if found.is_none() {
                found = Some(value.into_owned());
            }
        } else {
            kept.push((key.into_owned(), value.into_owned()));
        }
    }

    let raw = found?;

    let mut stripped = current;
    if kept.is_empty() {
        stripped.set_query(None);
    } else {
        stripped.query_pairs_mut().clear().extend_pairs(kept);
    }
    nav.replace(stripped);

    match Identity::new(raw) {
        Ok(identity) => {
            tracing::debug!(param, "identity captured from navigation");
            Some(identity)
        }
        Err(e) => {
            tracing::debug!(param, error = %e, "ignoring empty identity parameter");
            None
        }
    }
}

/// The unauthenticated entry point for `url`: same origin, root path,
/// no query or fragment.
pub fn entry_point(url: &Url) -> Url {
    let mut entry = url.clone();
    entry.set_path("/");
    entry.set_query(None);
    entry.set_fragment(None);
    entry
}
