//! Per-attempt secrets: the CSRF correlator and the PKCE pair.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore as _;
use sha2::{Digest, Sha256};

/// Number of random bytes in a correlator (256 bits).
pub const CORRELATOR_BYTES: usize = 32;

/// Number of random bytes in a PKCE verifier.
const VERIFIER_BYTES: usize = 32;

/// Unguessable value sent as the OAuth `state` parameter.
///
/// Generated from the thread-local CSPRNG and hex encoded. A fresh value is
/// created for every authorization attempt.
#[derive(Clone, PartialEq, Eq)]
pub struct Correlator(String);

impl Correlator {
    /// Generates a new random correlator.
    pub fn generate() -> Self {
        let mut bytes = [0u8; CORRELATOR_BYTES];
        rand::rng().fill_bytes(&mut bytes);
        Self(to_hex(&bytes))
    }

    /// The encoded value.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Compares against a received state without short-circuiting on content.
    pub fn matches(&self, received: &str) -> bool {
        let expected = self.0.as_bytes();
        let received = received.as_bytes();
        if expected.len() != received.len() {
            return false;
        }
        expected
            .iter()
            .zip(received)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

impl fmt::Debug for Correlator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Only a prefix, enough to correlate log lines.
        write!(f, "Correlator({}...)", &self.0[..8])
    }
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// PKCE (RFC 7636) verifier and its S256 challenge.
#[derive(Clone)]
pub struct PkcePair {
    verifier: String,
    challenge: String,
}

impl PkcePair {
    /// Generates a fresh verifier and derives its challenge.
    pub fn generate() -> Self {
        let mut bytes = [0u8; VERIFIER_BYTES];
        rand::rng().fill_bytes(&mut bytes);
        let verifier = URL_SAFE_NO_PAD.encode(bytes);
        let challenge = Self::challenge_for(&verifier);
        Self {
            verifier,
            challenge,
        }
    }

    /// The verifier, sent on the token exchange.
    pub fn verifier(&self) -> &str {
        &self.verifier
    }

    /// The challenge, sent on the authorization URL.
    pub fn challenge(&self) -> &str {
        &self.challenge
    }

    fn challenge_for(verifier: &str) -> String {
        URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
    }
}

impl fmt::Debug for PkcePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PkcePair")
            .field("challenge", &self.challenge)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn correlator_is_64_hex_chars() {
        let c = Correlator::generate();
        assert_eq!(c.as_str().len(), CORRELATOR_BYTES * 2);
        assert!(c.as_str().bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()));
    }

    #[test]
    fn correlators_are_pairwise_distinct() {
        let values: HashSet<String> = (0..10_000)
            .map(|_| Correlator::generate().as_str().to_string())
            .collect();
        assert_eq!(values.len(), 10_000);
    }

    #[test]
    fn correlator_bits_are_balanced() {
        // 2000 * 256 bits: a fair source lands within a fraction of a percent of 50%.
        let samples = 2_000;
        let mut ones = 0u64;
        let mut per_position = [0u32; CORRELATOR_BYTES * 8];

        for _ in 0..samples {
            let c = Correlator::generate();
            for (i, pair) in c.as_str().as_bytes().chunks(2).enumerate() {
                let byte = u8::from_str_radix(std::str::from_utf8(pair).unwrap(), 16).unwrap();
                ones += u64::from(byte.count_ones());
                for bit in 0..8 {
                    if byte & (1 << bit) != 0 {
                        per_position[i * 8 + bit] += 1;
                    }
                }
            }
        }

        let total = (samples * CORRELATOR_BYTES * 8) as f64;
        let ratio = ones as f64 / total;
        assert!((0.49..0.51).contains(&ratio), "bit ratio {ratio}");

        // No bit position is stuck: each should be set roughly half the time.
        for count in per_position {
            let p = f64::from(count) / samples as f64;
            assert!((0.40..0.60).contains(&p), "position ratio {p}");
        }
    }

    #[test]
    fn matches_only_exact_value() {
        let c = Correlator::generate();
        assert!(c.matches(c.as_str()));
        assert!(!c.matches(""));
        assert!(!c.matches(&c.as_str()[1..]));

        let mut tampered = c.as_str().to_string();
        let last = if tampered.ends_with('0') { "1" } else { "0" };
        tampered.replace_range(63.., last);
        assert!(!c.matches(&tampered));
    }

    #[test]
    fn debug_does_not_leak_full_value() {
        let c = Correlator::generate();
        let debug = format!("{:?}", c);
        assert!(!debug.contains(c.as_str()));
    }

    #[test]
    fn pkce_challenge_matches_rfc_example() {
        // RFC 7636 appendix B.
        let challenge = PkcePair::challenge_for("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk");
        assert_eq!(challenge, "E9Melhoa2OwvRFX6zqIIfRTYmrbJjXOeMp1wVW9gRwM");
    }

    #[test]
    fn pkce_pairs_are_fresh() {
        let a = PkcePair::generate();
        let b = PkcePair::generate();
        assert_eq!(a.verifier().len(), 43);
        assert_ne!(a.verifier(), b.verifier());
        assert_ne!(a.challenge(), b.challenge());
    }
}
