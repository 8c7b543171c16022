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

use bh_jws_utils::base64_std_decode;
use bherror::{
    traits::{ErrorContext as _, ForeignError as _, PropagateError as _},
    Error,
};
use serde::Deserialize;
use url::Url;

use crate::{Result, WalletError, WalletSigningKey};

/// Default lifetime of an issued nonce, in seconds.
pub const DEFAULT_NONCE_TTL: u64 = 10 * 60;

/// Default lifetime of a cached transaction code, in seconds.
pub const DEFAULT_TX_CODE_TTL: u64 = 10 * 60;

/// Default validity of an issued wallet attestation, in seconds.
pub const DEFAULT_ATTESTATION_VALIDITY: u64 = 24 * 60 * 60;

const NONCE_KEY_LENGTH: usize = 32;

/// Wallet provider configuration.
///
/// Loading the values is left to the caller, any [`serde`] data format will do.
#[derive(Debug, Clone, Deserialize)]
pub struct Configuration {
    /// Public base URL of the wallet provider.
    pub public_base_url: String,
    /// Standard base64 encoding of the 32 byte nonce encryption key.
    pub nonce_shared_secret: String,
    /// Lifetime of an issued nonce, in seconds.
    #[serde(default = "default_nonce_ttl")]
    pub nonce_ttl_secs: u64,
    /// PEM holding the signing certificate and its private key.
    pub issuer_certificate: String,
    /// Passphrase of an encrypted private key in [`Self::issuer_certificate`].
    #[serde(default)]
    pub issuer_certificate_password: Option<String>,
    /// URL of the external credential issuer.
    #[serde(default)]
    pub issuer_url: Option<String>,
    /// Lifetime of a cached transaction code, in seconds.
    #[serde(default = "default_tx_code_ttl")]
    pub issuer_tx_cache_ttl_secs: u64,
    /// Validity of an issued wallet attestation, in seconds.
    #[serde(default = "default_attestation_validity")]
    pub attestation_validity_secs: u64,
}

fn default_nonce_ttl() -> u64 {
    DEFAULT_NONCE_TTL
}

fn default_tx_code_ttl() -> u64 {
    DEFAULT_TX_CODE_TTL
}

fn default_attestation_validity() -> u64 {
    DEFAULT_ATTESTATION_VALIDITY
}

impl Configuration {
    /// Checks every value, including loading the signing key.
    pub fn validate(&self) -> Result<()> {
        self.urls()?;
        self.nonce_key()?;
        self.signing_key()?;

        if let Some(issuer_url) = &self.issuer_url {
            parse_http_url(issuer_url).with_err(|| configuration_error("issuer_url"))?;
        }

        for (name, value) in [
            ("nonce_ttl_secs", self.nonce_ttl_secs),
            ("issuer_tx_cache_ttl_secs", self.issuer_tx_cache_ttl_secs),
            ("attestation_validity_secs", self.attestation_validity_secs),
        ] {
            if value == 0 {
                return Err(Error::root(configuration_error(name)));
            }
        }

        Ok(())
    }

    /// The URLs derived from [`Self::public_base_url`].
    pub fn urls(&self) -> Result<WalletUrls> {
        WalletUrls::new(&self.public_base_url)
    }

    /// The decoded nonce encryption key.
    pub fn nonce_key(&self) -> Result<[u8; NONCE_KEY_LENGTH]> {
        let secret = base64_std_decode(&self.nonce_shared_secret)
            .foreign_err(|| configuration_error("nonce_shared_secret"))?;

        <[u8; NONCE_KEY_LENGTH]>::try_from(secret.as_slice())
            .foreign_err(|| configuration_error("nonce_shared_secret"))
            .ctx(|| format!("expected {NONCE_KEY_LENGTH} bytes, got {}", secret.len()))
    }

    /// Loads the signing key from [`Self::issuer_certificate`].
    pub fn signing_key(&self) -> Result<WalletSigningKey> {
        WalletSigningKey::from_pem(
            self.issuer_certificate.as_bytes(),
            self.issuer_certificate_password.as_deref().map(str::as_bytes),
        )
    }
}

fn configuration_error(name: &str) -> WalletError {
    WalletError::Configuration(name.to_owned())
}

fn parse_http_url(value: &str) -> Result<Url> {
    let url = Url::parse(value).foreign_err(|| configuration_error("url"))?;

    if !matches!(url.scheme(), "http" | "https") || !url.has_host() {
        return Err(Error::root(configuration_error("url")));
    }

    Ok(url)
}

/// The URLs the wallet provider identifies itself and its instances with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletUrls {
    public: String,
    instance: String,
}

impl WalletUrls {
    /// Derives the URLs from the public base URL.
    ///
    /// Trailing slashes are trimmed. Instances live under `<base>/instance`.
    pub fn new(public_base_url: &str) -> Result<Self> {
        parse_http_url(public_base_url)
            .with_err(|| configuration_error("public_base_url"))
            .ctx(|| format!("not an http(s) URL: {public_base_url}"))?;

        let public = public_base_url.trim_end_matches('/').to_owned();
        let instance = format!("{public}/instance");

        Ok(Self { public, instance })
    }

    /// The `iss` and `sub` of every token issued by the wallet provider.
    pub fn public(&self) -> &str {
        &self.public
    }

    /// The prefix of every instance identifier.
    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// The identifier of the instance holding `hardware_key_tag`.
    pub fn instance_id(&self, hardware_key_tag: &str) -> String {
        format!("{}/{}", self.instance, hardware_key_tag)
    }

    /// Recovers the hardware key tag from an instance identifier.
    ///
    /// Returns [`None`] for identifiers of other wallet providers and for an empty tag.
    pub fn hardware_key_tag<'a>(&self, instance_id: &'a str) -> Option<&'a str> {
        let rest = instance_id.strip_prefix(self.instance.as_str())?;
        let tag = rest.strip_prefix('/').unwrap_or(rest);

        (!tag.is_empty()).then_some(tag)
    }

    /// The endpoint nonces are issued at.
    pub fn nonce_endpoint(&self) -> String {
        format!("{}/nonce", self.public)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use bh_jws_utils::base64_std_encode;

    use super::*;

    fn configuration(public_base_url: &str, secret: &str) -> Configuration {
        serde_json::from_value(serde_json::json!({
            "public_base_url": public_base_url,
            "nonce_shared_secret": secret,
            "issuer_certificate": "",
        }))
        .unwrap()
    }

    #[test]
    fn defaults_are_applied() {
        let config = configuration("https://wallet.example", "");

        assert_eq!(config.nonce_ttl_secs, DEFAULT_NONCE_TTL);
        assert_eq!(config.issuer_tx_cache_ttl_secs, DEFAULT_TX_CODE_TTL);
        assert_eq!(config.attestation_validity_secs, DEFAULT_ATTESTATION_VALIDITY);
        assert_eq!(config.issuer_certificate_password, None);
    }

    #[test]
    fn urls_trim_trailing_slash() {
        let urls = WalletUrls::new("https://wallet.example/api/").unwrap();

        assert_eq!(urls.public(), "https://wallet.example/api");
        assert_eq!(urls.instance(), "https://wallet.example/api/instance");
        assert_eq!(
            urls.instance_id("tag+/="),
            "https://wallet.example/api/instance/tag+/="
        );
        assert_eq!(urls.nonce_endpoint(), "https://wallet.example/api/nonce");
    }

    #[test]
    fn hardware_key_tag_is_recovered_from_instance_id() {
        let urls = WalletUrls::new("https://wallet.example").unwrap();

        assert_eq!(
            urls.hardware_key_tag("https://wallet.example/instance/abc/="),
            Some("abc/=")
        );
        assert_eq!(urls.hardware_key_tag("https://wallet.example/instance/"), None);
        assert_eq!(urls.hardware_key_tag("https://other.example/instance/abc"), None);
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        for url in ["", "wallet.example", "ftp://wallet.example"] {
            let err = WalletUrls::new(url).unwrap_err();
            assert_matches!(err.error, WalletError::Configuration(_));
        }
    }

    #[test]
    fn nonce_key_must_be_32_bytes() {
        let config = configuration("https://wallet.example", &base64_std_encode([0; 32]));
        assert_eq!(config.nonce_key().unwrap(), [0; 32]);

        let config = configuration("https://wallet.example", "AAAA");
        let err = config.nonce_key().unwrap_err();
        assert_eq!(
            err.error,
            WalletError::Configuration("nonce_shared_secret".to_owned())
        );

        let config = configuration("https://wallet.example", "not base64!");
        assert!(config.nonce_key().is_err());
    }

    #[test]
    fn missing_certificate_fails_validation() {
        let config = configuration("https://wallet.example", &base64_std_encode([7; 32]));

        let err = config.validate().unwrap_err();
        assert_eq!(
            err.error,
            WalletError::Configuration("issuer_certificate".to_owned())
        );
    }
}
