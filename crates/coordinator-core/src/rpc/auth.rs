//! Shared-secret token check. An empty configured token disables
//! authentication entirely; a non-empty one is compared in constant time
//! so response timing can't leak how many
//! leading bytes of a guess matched.

/// `None` means authentication is disabled (no token configured).
#[derive(Clone, Default)]
pub struct TokenAuthenticator {
    expected: Option<String>,
}

impl TokenAuthenticator {
    #[must_use]
    pub fn new(token: Option<String>) -> Self {
        Self {
            expected: token.filter(|t| !t.is_empty()),
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.expected.is_some()
    }

    /// Accepts `None` as a token iff authentication is disabled.
    #[must_use]
    pub fn authenticate(&self, presented: Option<&str>) -> bool {
        match &self.expected {
            None => true,
            Some(expected) => presented.is_some_and(|p| constant_time_eq(expected.as_bytes(), p.as_bytes())),
        }
    }
}

/// Length is not secret, so a length mismatch may short-circuit; every byte
/// of equal-length input is compared regardless of earlier mismatches.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
