// Copyright (C) 2020-2025  The Blockhouse Technology Limited (TBTL).
//
// This program is free software: you can redistribute it and/or modify it
// under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or (at your
// option) any later version.
//
// This program is distributed in the hope that it will be useful, but
// WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY
// or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU Affero General Public
// License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Transaction codes kept out of credential offer QR codes.
//!
//! When an offer must not reveal its transaction code, the code is cached under the
//! pre-authorized code of the offer and stripped from the offer. The token exchange later
//! recovers it with [`TxCodeCache::tx_code_for`].

use std::sync::{Mutex, MutexGuard};

use bherror::{
    traits::{ErrorContext as _, ForeignError as _, PropagateError as _},
    Error,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

use crate::{InMemoryTtlCache, Result, TtlCache, WalletError};

/// Query parameter of an offer URL holding the credential offer JSON.
pub const CREDENTIAL_OFFER_PARAM: &str = "credential_offer";

/// An offer URL as produced by the credential issuer, with its transaction code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialOfferData {
    /// The offer URL.
    #[serde(rename = "urlData")]
    pub url_data: String,
    /// The transaction code the holder must present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_code: Option<u32>,
}

/// The credential offer object.
///
/// Members other than the ones named here are carried through unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialOffer {
    /// The issuer the wallet redeems the offer at.
    pub credential_issuer: String,
    /// The offered credential configurations.
    #[serde(default)]
    pub credential_configuration_ids: Value,
    /// The grants of the offer.
    #[serde(default)]
    pub grants: Grants,
    /// Other members.
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

/// The grants of a [`CredentialOffer`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Grants {
    /// The pre-authorized code grant.
    #[serde(
        rename = "urn:ietf:params:oauth:grant-type:pre-authorized_code",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub pre_authorized_code: Option<PreAuthorizedCodeGrant>,
    /// Other grants.
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

/// The pre-authorized code grant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreAuthorizedCodeGrant {
    /// The pre-authorized code.
    #[serde(rename = "pre-authorized_code")]
    pub pre_authorized_code: String,
    /// Description of the expected transaction code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_code: Option<Value>,
    /// Other members.
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

/// Cache of transaction codes keyed by pre-authorized code.
pub struct TxCodeCache<C = InMemoryTtlCache<u32>> {
    cache: C,
    ttl: u64,
    lock: Mutex<()>,
}

impl TxCodeCache {
    /// Creates a cache in process memory. Entries live for `ttl` seconds.
    pub fn new(ttl: u64) -> Self {
        Self::with_cache(InMemoryTtlCache::new(), ttl)
    }
}

impl<C: TtlCache<u32>> TxCodeCache<C> {
    /// Creates a cache backed by `cache`. Entries live for `ttl` seconds.
    pub fn with_cache(cache: C, ttl: u64) -> Self {
        Self {
            cache,
            ttl,
            lock: Mutex::new(()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>> {
        self.lock
            .lock()
            .map_err(|_| Error::root(WalletError::TxCodeStoreUnavailable))
    }

    /// Caches `tx_code` for `pre_authorized_code`.
    pub fn set(&self, pre_authorized_code: &str, tx_code: u32, now: u64) -> Result<()> {
        let _guard = self.lock()?;

        self.store(pre_authorized_code, tx_code, now)
    }

    fn store(&self, pre_authorized_code: &str, tx_code: u32, now: u64) -> Result<()> {
        self.cache
            .set(pre_authorized_code, tx_code, self.ttl, now)
            .with_err(|| WalletError::TxCodeStoreUnavailable)
    }

    /// Returns the transaction code cached for `pre_authorized_code`.
    ///
    /// A code is handed out once; the entry is removed when it is read.
    pub fn get(&self, pre_authorized_code: &str, now: u64) -> Result<u32> {
        let _guard = self.lock()?;

        self.cache
            .take(pre_authorized_code, now)
            .with_err(|| WalletError::TxCodeStoreUnavailable)?
            .ok_or_else(|| Error::root(WalletError::TxCodeNotFound))
    }

    /// The transaction code to present in the token exchange of `pre_authorized_code`.
    ///
    /// A code supplied by the holder takes precedence over the cached one.
    pub fn tx_code_for(
        &self,
        pre_authorized_code: &str,
        supplied: Option<&str>,
        now: u64,
    ) -> Result<String> {
        match supplied.filter(|code| !code.is_empty()) {
            Some(code) => Ok(code.to_owned()),
            None => Ok(self.get(pre_authorized_code, now)?.to_string()),
        }
    }

    /// Rewrites an issuer offer so that the wallet provider stands in as credential issuer.
    ///
    /// Unless `show_tx_code` is set, the transaction code is cached and removed from both the
    /// offer URL and the result.
    pub fn rewrite_offer(
        &self,
        offer: CredentialOfferData,
        show_tx_code: bool,
        wallet_public_url: &str,
        now: u64,
    ) -> Result<CredentialOfferData> {
        let _guard = self.lock()?;

        let mut url = Url::parse(&offer.url_data)
            .foreign_err(|| WalletError::CredentialOfferInvalid)
            .ctx(|| "malformed offer URL")?;
        let mut query: Vec<(String, String)> = url.query_pairs().into_owned().collect();

        let mut credential_offer: CredentialOffer = {
            let raw = query
                .iter()
                .find(|(name, _)| name == CREDENTIAL_OFFER_PARAM)
                .map(|(_, value)| value.as_str())
                .ok_or_else(|| Error::root(WalletError::CredentialOfferInvalid))
                .ctx(|| "missing credential_offer parameter")?;

            serde_json::from_str(raw).foreign_err(|| WalletError::CredentialOfferInvalid)?
        };

        let mut tx_code = offer.tx_code;
        if !show_tx_code {
            if let Some(code) = tx_code.take() {
                let grant = credential_offer
                    .grants
                    .pre_authorized_code
                    .as_mut()
                    .ok_or_else(|| Error::root(WalletError::CredentialOfferInvalid))
                    .ctx(|| "transaction code without pre-authorized code grant")?;

                self.store(&grant.pre_authorized_code, code, now)?;
                grant.tx_code = None;
            }
        }

        credential_offer.credential_issuer = wallet_public_url.to_owned();
        let encoded = serde_json::to_string(&credential_offer)
            .foreign_err(|| WalletError::CredentialOfferInvalid)?;

        for (name, value) in query.iter_mut() {
            if name == CREDENTIAL_OFFER_PARAM {
                *value = encoded.clone();
            }
        }
        url.query_pairs_mut().clear().extend_pairs(&query);

        Ok(CredentialOfferData {
            url_data: url.into(),
            tx_code,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: u64 = 1_700_000_000;
    const WALLET: &str = "https://wallet.example";
    const GRANT: &str = "urn:ietf:params:oauth:grant-type:pre-authorized_code";

    fn offer_url(base: &str, credential_offer: Value) -> String {
        let mut url = Url::parse(base).unwrap();
        url.query_pairs_mut()
            .append_pair(CREDENTIAL_OFFER_PARAM, &credential_offer.to_string());
        url.into()
    }

    fn issuer_offer() -> Value {
        serde_json::json!({
            "credential_issuer": "https://issuer.example",
            "credential_configuration_ids": ["eu.europa.ec.eudi.pid_mdoc"],
            "grants": {
                "urn:ietf:params:oauth:grant-type:pre-authorized_code": {
                    "pre-authorized_code": "pre-code",
                    "tx_code": { "length": 4, "input_mode": "numeric" },
                },
            },
        })
    }

    fn decoded_offer(url_data: &str) -> Value {
        let url = Url::parse(url_data).unwrap();
        let (_, raw) = url
            .query_pairs()
            .find(|(name, _)| name == CREDENTIAL_OFFER_PARAM)
            .unwrap();

        serde_json::from_str(&raw).unwrap()
    }

    #[test]
    fn hidden_tx_code_is_cached_and_stripped() {
        let cache = TxCodeCache::new(600);
        let offer = CredentialOfferData {
            url_data: offer_url("https://issuer.example/offer?lang=lv", issuer_offer()),
            tx_code: Some(1234),
        };

        let rewritten = cache.rewrite_offer(offer, false, WALLET, NOW).unwrap();

        assert_eq!(rewritten.tx_code, None);
        let credential_offer = decoded_offer(&rewritten.url_data);
        assert_eq!(credential_offer["credential_issuer"], WALLET);
        let grant = &credential_offer["grants"][GRANT];
        assert_eq!(grant["pre-authorized_code"], "pre-code");
        assert!(grant.get("tx_code").is_none());
        assert_eq!(
            credential_offer["credential_configuration_ids"],
            serde_json::json!(["eu.europa.ec.eudi.pid_mdoc"])
        );
        assert!(rewritten.url_data.contains("lang=lv"));

        assert_eq!(cache.get("pre-code", NOW + 1).unwrap(), 1234);
    }

    #[test]
    fn shown_tx_code_stays_in_offer() {
        let cache = TxCodeCache::new(600);
        let offer = CredentialOfferData {
            url_data: offer_url("openid-credential-offer://", issuer_offer()),
            tx_code: Some(1234),
        };

        let rewritten = cache.rewrite_offer(offer, true, WALLET, NOW).unwrap();

        assert_eq!(rewritten.tx_code, Some(1234));
        assert!(rewritten.url_data.starts_with("openid-credential-offer://"));
        let credential_offer = decoded_offer(&rewritten.url_data);
        assert_eq!(credential_offer["credential_issuer"], WALLET);
        assert_eq!(
            credential_offer["grants"][GRANT]["tx_code"]["length"],
            4
        );

        let err = cache.get("pre-code", NOW).unwrap_err();
        assert_eq!(err.error, WalletError::TxCodeNotFound);
    }

    #[test]
    fn tx_code_is_single_use_and_expires() {
        let cache = TxCodeCache::new(600);
        cache.set("pre-code", 42, NOW).unwrap();

        assert_eq!(cache.tx_code_for("pre-code", None, NOW).unwrap(), "42");
        let err = cache.tx_code_for("pre-code", None, NOW).unwrap_err();
        assert_eq!(err.error, WalletError::TxCodeNotFound);

        cache.set("pre-code", 42, NOW).unwrap();
        let err = cache.get("pre-code", NOW + 600).unwrap_err();
        assert_eq!(err.error, WalletError::TxCodeNotFound);
    }

    #[test]
    fn supplied_tx_code_takes_precedence() {
        let cache = TxCodeCache::new(600);
        cache.set("pre-code", 42, NOW).unwrap();

        assert_eq!(cache.tx_code_for("pre-code", Some("7"), NOW).unwrap(), "7");
        assert_eq!(cache.tx_code_for("pre-code", Some(""), NOW).unwrap(), "42");
    }

    #[test]
    fn malformed_offers_are_rejected() {
        let cache = TxCodeCache::new(600);
        let without_grant = serde_json::json!({ "credential_issuer": "https://issuer.example" });

        for (url_data, tx_code) in [
            ("not a url".to_owned(), None),
            ("https://issuer.example/offer".to_owned(), None),
            (
                "https://issuer.example/offer?credential_offer=%7Bnot-json".to_owned(),
                None,
            ),
            (
                offer_url("https://issuer.example/offer", without_grant.clone()),
                Some(1),
            ),
        ] {
            let offer = CredentialOfferData { url_data, tx_code };
            let err = cache.rewrite_offer(offer, false, WALLET, NOW).unwrap_err();
            assert_eq!(err.error, WalletError::CredentialOfferInvalid);
        }

        let offer = CredentialOfferData {
            url_data: offer_url("https://issuer.example/offer", without_grant),
            tx_code: None,
        };
        let rewritten = cache.rewrite_offer(offer, false, WALLET, NOW).unwrap();
        assert_eq!(decoded_offer(&rewritten.url_data)["credential_issuer"], WALLET);
    }

    #[test]
    fn offer_data_uses_issuer_member_names() {
        let data: CredentialOfferData =
            serde_json::from_value(serde_json::json!({ "urlData": "https://x", "tx_code": 5 }))
                .unwrap();

        assert_eq!(data.tx_code, Some(5));
        assert_eq!(
            serde_json::to_value(CredentialOfferData {
                url_data: "https://x".to_owned(),
                tx_code: None,
            })
            .unwrap(),
            serde_json::json!({ "urlData": "https://x" })
        );
    }
}
