//! Shard-scoped, time-bounded access signatures for worker polling.

use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use url::Url;

use crate::core::QueueError;

type HmacSha256 = Hmac<Sha256>;

/// Signatures start this far in the past to absorb worker clock skew.
pub const SIGNATURE_START_SKEW: Duration = Duration::minutes(15);

/// Signatures expire this long after issue.
pub const SIGNATURE_VALIDITY: Duration = Duration::minutes(30);

/// Only permission ever granted: receive and delete.
pub const PROCESS_PERMISSION: &str = "p";

/// Signed grant carried in the query string of a worker URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SasToken {
    /// Start of validity, unix seconds.
    pub start: i64,
    /// End of validity, unix seconds.
    pub expiry: i64,
    /// Granted permission.
    pub permission: String,
    /// Hex HMAC-SHA256 over the grant.
    pub signature: String,
}

impl SasToken {
    /// Append `st`, `se`, `sp` and `sig` to the query of `url`.
    pub fn append_to(&self, url: &mut Url) {
        url.query_pairs_mut()
            .append_pair("st", &self.start.to_string())
            .append_pair("se", &self.expiry.to_string())
            .append_pair("sp", &self.permission)
            .append_pair("sig", &self.signature);
    }

    /// Read a token back from the decoded query of `url`.
    pub fn from_url(url: &Url) -> Option<Self> {
        let mut start = None;
        let mut expiry = None;
        let mut permission = None;
        let mut signature = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "st" => start = value.parse::<i64>().ok(),
                "se" => expiry = value.parse::<i64>().ok(),
                "sp" => permission = Some(value.into_owned()),
                "sig" => signature = Some(value.into_owned()),
                _ => {}
            }
        }
        Some(Self {
            start: start?,
            expiry: expiry?,
            permission: permission?,
            signature: signature?,
        })
    }
}

/// Signs and verifies per-queue access tokens with HMAC-SHA256.
#[derive(Clone)]
pub struct ShardSigner {
    account: String,
    mac: HmacSha256,
}

impl std::fmt::Debug for ShardSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardSigner")
            .field("account", &self.account)
            .finish_non_exhaustive()
    }
}

impl ShardSigner {
    /// Signer for `account` using `key`.
    pub fn new(account: impl Into<String>, key: impl AsRef<[u8]>) -> Result<Self, QueueError> {
        let mac = <HmacSha256 as Mac>::new_from_slice(key.as_ref())
            .map_err(|e| QueueError::Backend(format!("invalid signing key: {e}")))?;
        Ok(Self {
            account: account.into(),
            mac,
        })
    }

    fn mac_for(&self, queue: &str, start: i64, expiry: i64) -> HmacSha256 {
        let mut mac = self.mac.clone();
        mac.update(
            format!(
                "{PROCESS_PERMISSION}\n{start}\n{expiry}\n/queue/{}/{queue}",
                self.account
            )
            .as_bytes(),
        );
        mac
    }

    /// Token granting access to `queue` between `start` and `expiry`.
    pub fn sign(&self, queue: &str, start: DateTime<Utc>, expiry: DateTime<Utc>) -> SasToken {
        let (start, expiry) = (start.timestamp(), expiry.timestamp());
        let signature = hex::encode(self.mac_for(queue, start, expiry).finalize().into_bytes());
        SasToken {
            start,
            expiry,
            permission: PROCESS_PERMISSION.to_owned(),
            signature,
        }
    }

    /// Check that `token` was issued for `queue` and is valid at `now`.
    pub fn verify(&self, queue: &str, token: &SasToken, now: DateTime<Utc>) -> bool {
        if token.permission != PROCESS_PERMISSION {
            return false;
        }
        let now = now.timestamp();
        if now < token.start || now > token.expiry {
            return false;
        }
        let Ok(signature) = hex::decode(&token.signature) else {
            return false;
        };
        self.mac_for(queue, token.start, token.expiry)
            .verify_slice(&signature)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::clock::zero_time;

    fn url_with(token: &SasToken) -> Url {
        let mut url = Url::parse("https://acct.queue.core.windows.net/q1/messages").unwrap();
        token.append_to(&mut url);
        url
    }

    #[test]
    fn signature_is_bound_to_queue_and_window() {
        let signer = ShardSigner::new("acct", "secret").unwrap();
        let now = zero_time() + Duration::days(1000);
        let token = signer.sign("q1", now - SIGNATURE_START_SKEW, now + SIGNATURE_VALIDITY);
        assert!(signer.verify("q1", &token, now));
        assert!(!signer.verify("q2", &token, now));
        assert!(!signer.verify("q1", &token, now + Duration::minutes(31)));
        assert!(!ShardSigner::new("acct", "other").unwrap().verify("q1", &token, now));
    }

    #[test]
    fn token_survives_the_query_string() {
        let signer = ShardSigner::new("acct", "secret").unwrap();
        let now = zero_time() + Duration::days(1000);
        let token = signer.sign("q1", now, now + SIGNATURE_VALIDITY);
        let url = url_with(&token);
        assert_eq!(SasToken::from_url(&url), Some(token));
        assert_eq!(SasToken::from_url(&Url::parse("https://acct.example/q1?st=1").unwrap()), None);
    }

    #[test]
    fn percent_encoded_query_is_decoded() {
        let signer = ShardSigner::new("acct", "secret").unwrap();
        let now = zero_time() + Duration::days(1000);
        let token = signer.sign("q1", now, now + SIGNATURE_VALIDITY);
        let encoded = format!(
            "https://acct.queue.core.windows.net/q1/messages?st={}&se={}&s%70=%70&sig={}",
            token.start, token.expiry, token.signature
        );
        let parsed = SasToken::from_url(&Url::parse(&encoded).unwrap()).unwrap();
        assert!(signer.verify("q1", &parsed, now));
    }

    #[test]
    fn tampered_expiry_is_rejected() {
        let signer = ShardSigner::new("acct", "secret").unwrap();
        let now = zero_time() + Duration::days(1000);
        let mut token = signer.sign("q1", now, now + SIGNATURE_VALIDITY);
        token.expiry = (now + Duration::days(1)).timestamp();
        let parsed = SasToken::from_url(&url_with(&token)).unwrap();
        assert!(!signer.verify("q1", &parsed, now + Duration::hours(2)));
    }
}
