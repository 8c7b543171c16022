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

//! The wallet attestation, a JWT the wallet provider issues to a registered instance.

use bh_jws_utils::{Es256Verifier, JwtSigner as _, JwtVerifier as _, SigningAlgorithm};
use bherror::{
    traits::{ErrorContext as _, ForeignBoxed as _},
    Error,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Person, Result, TokenKind, WalletError, WalletSigningKey, WalletUrls};

/// The `typ` header of a wallet attestation.
pub const WALLET_ATTESTATION_TYP: &str = "oauth-client-attestation+jwt";

/// The `format` of a JWT wallet attestation in [`WalletAttestationResponse`].
pub const WALLET_ATTESTATION_FORMAT: &str = "jwt";

const INVALID: WalletError = WalletError::TokenInvalid(TokenKind::WalletAttestation);

/// Header of a wallet attestation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletAttestationHeader {
    /// Always `ES256`.
    pub alg: SigningAlgorithm,
    /// Always [`WALLET_ATTESTATION_TYP`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,
    /// Key id of the wallet provider signing key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
}

impl jwt::JoseHeader for WalletAttestationHeader {
    fn algorithm_type(&self) -> jwt::AlgorithmType {
        self.alg.into()
    }
}

/// Claims of a wallet attestation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletAttestationClaims {
    /// The wallet public URL.
    pub iss: String,
    /// The wallet public URL.
    pub sub: String,
    /// `<wallet URL>/instance/<hardware key tag>`.
    pub instance_id: String,
    /// The confirmation key of the instance, copied from its assertion.
    pub cnf: Value,
    /// Issuance time.
    pub iat: u64,
    /// Expiration time.
    pub exp: u64,
    /// Personal code of the person bound to the instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub personal_administrative_number: Option<String>,
    /// Given name of the person bound to the instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    /// Family name of the person bound to the instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
}

impl WalletAttestationClaims {
    pub(crate) fn new(
        urls: &WalletUrls,
        instance_id: String,
        cnf: Value,
        person: Option<&Person>,
        now: u64,
        validity: u64,
    ) -> Self {
        let person = person.filter(|person| !person.is_anonymous());

        Self {
            iss: urls.public().to_owned(),
            sub: urls.public().to_owned(),
            instance_id,
            cnf,
            iat: now,
            exp: now.saturating_add(validity),
            personal_administrative_number: person.map(|person| person.code.clone()),
            given_name: person.and_then(|person| person.given_name.clone()),
            family_name: person.and_then(|person| person.family_name.clone()),
        }
    }
}

/// A single attestation in [`WalletAttestationResponse`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletAttestationEntry {
    /// Always [`WALLET_ATTESTATION_FORMAT`].
    pub format: String,
    /// The attestation.
    pub wallet_attestation: String,
}

/// Body of the assertion endpoint response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletAttestationResponse {
    /// The issued attestations.
    pub wallet_attestations: Vec<WalletAttestationEntry>,
}

impl WalletAttestationResponse {
    pub(crate) fn jwt(wallet_attestation: String) -> Self {
        Self {
            wallet_attestations: vec![WalletAttestationEntry {
                format: WALLET_ATTESTATION_FORMAT.to_owned(),
                wallet_attestation,
            }],
        }
    }
}

type WalletAttestationToken<Status> =
    jwt::Token<WalletAttestationHeader, WalletAttestationClaims, Status>;

pub(crate) fn sign(claims: WalletAttestationClaims, key: &WalletSigningKey) -> Result<String> {
    let header = WalletAttestationHeader {
        alg: SigningAlgorithm::Es256,
        typ: Some(WALLET_ATTESTATION_TYP.to_owned()),
        kid: Some(key.kid().to_owned()),
    };

    let token: WalletAttestationToken<jwt::token::Signed> = key
        .signer()
        .sign_jwt(jwt::Token::new(header, claims))
        .foreign_boxed_err(|| WalletError::CryptoBackend)?;

    Ok(token.into())
}

/// Verifies a wallet attestation issued under `key` and returns its claims.
///
/// The `instance_id` is checked to name an instance of this wallet provider; resolving the
/// instance is left to the caller.
pub(crate) fn verify(
    token: &str,
    key: &WalletSigningKey,
    urls: &WalletUrls,
    now: u64,
) -> Result<WalletAttestationClaims> {
    let token: WalletAttestationToken<jwt::token::Verified> = Es256Verifier
        .verify_jwt_signature(token, key.public_jwk())
        .foreign_boxed_err(|| INVALID)
        .ctx(|| "invalid wallet attestation signature")?;

    let typ = token.header().typ.as_deref();
    if typ != Some(WALLET_ATTESTATION_TYP) {
        let typ = typ.map(str::to_owned);
        return Err(Error::root(INVALID)).ctx(|| format!("unexpected typ: {typ:?}"));
    }

    let claims = token.claims();
    if claims.iss != urls.public() || claims.sub != urls.public() {
        let (iss, sub) = (claims.iss.clone(), claims.sub.clone());
        return Err(Error::root(INVALID)).ctx(|| format!("unexpected iss {iss} or sub {sub}"));
    }
    if claims.exp <= now {
        return Err(Error::root(INVALID)).ctx(|| "wallet attestation expired");
    }
    if urls.hardware_key_tag(&claims.instance_id).is_none() {
        let instance_id = claims.instance_id.clone();
        return Err(Error::root(INVALID)).ctx(|| format!("foreign instance_id {instance_id}"));
    }

    Ok(claims.clone())
}

#[cfg(test)]
mod tests {
    use bh_jws_utils::JwkPublic;

    use super::*;
    use crate::test_utils::signing_key;

    const NOW: u64 = 1_700_000_000;
    const DAY: u64 = 24 * 60 * 60;

    fn urls() -> WalletUrls {
        WalletUrls::new("https://wallet.example/").unwrap()
    }

    fn claims(person: Option<&Person>) -> WalletAttestationClaims {
        let urls = urls();
        let cnf = serde_json::json!({ "jwk": { "kty": "EC", "crv": "P-256" } });

        WalletAttestationClaims::new(&urls, urls.instance_id("tag"), cnf, person, NOW, DAY)
    }

    fn sign_raw(key: &WalletSigningKey, typ: Option<&str>, claims: JwkPublic) -> String {
        let header = WalletAttestationHeader {
            alg: SigningAlgorithm::Es256,
            typ: typ.map(str::to_owned),
            kid: Some(key.kid().to_owned()),
        };
        let token: jwt::Token<WalletAttestationHeader, JwkPublic, jwt::token::Signed> =
            key.signer().sign_jwt(jwt::Token::new(header, claims)).unwrap();

        token.as_str().to_owned()
    }

    #[test]
    fn issued_attestation_verifies() {
        let key = signing_key();
        let token = sign(claims(None), &key).unwrap();

        let verified = verify(&token, &key, &urls(), NOW + DAY - 1).unwrap();
        assert_eq!(verified, claims(None));
        assert_eq!(verified.iss, "https://wallet.example");
        assert_eq!(verified.instance_id, "https://wallet.example/instance/tag");
        assert_eq!(verified.exp, NOW + DAY);

        let header: jwt::Token<WalletAttestationHeader, Value, jwt::Unverified> =
            jwt::Token::parse_unverified(&token).unwrap();
        assert_eq!(header.header().typ.as_deref(), Some(WALLET_ATTESTATION_TYP));
        assert_eq!(header.header().kid.as_deref(), Some(key.kid()));
    }

    #[test]
    fn person_claims_are_included_unless_anonymous() {
        let person = Person {
            code: "010101-12345".to_owned(),
            given_name: Some("Jane".to_owned()),
            family_name: Some("Doe".to_owned()),
            requester_code: None,
        };

        let claims_with_person = claims(Some(&person));
        assert_eq!(
            claims_with_person.personal_administrative_number.as_deref(),
            Some("010101-12345")
        );
        assert_eq!(claims_with_person.given_name.as_deref(), Some("Jane"));
        assert_eq!(claims_with_person.family_name.as_deref(), Some("Doe"));

        assert_eq!(claims(Some(&Person::anonymous())), claims(None));
        let serialized = serde_json::to_value(claims(None)).unwrap();
        assert!(serialized.get("given_name").is_none());
    }

    #[test]
    fn expired_attestation_is_rejected() {
        let key = signing_key();
        let token = sign(claims(None), &key).unwrap();

        let err = verify(&token, &key, &urls(), NOW + DAY).unwrap_err();
        assert_eq!(err.error, INVALID);
    }

    #[test]
    fn attestation_of_other_provider_is_rejected() {
        let key = signing_key();
        let token = sign(claims(None), &key).unwrap();

        let err = verify(&token, &signing_key(), &urls(), NOW).unwrap_err();
        assert_eq!(err.error, INVALID);

        let other_urls = WalletUrls::new("https://other.example").unwrap();
        let err = verify(&token, &key, &other_urls, NOW).unwrap_err();
        assert_eq!(err.error, INVALID);
    }

    #[test]
    fn header_and_claims_are_checked() {
        let key = signing_key();
        let valid_claims = serde_json::to_value(claims(None)).unwrap();
        let valid_claims = valid_claims.as_object().unwrap();
        let with = |name: &str, value: Value| {
            let mut claims = valid_claims.clone();
            claims.insert(name.to_owned(), value);
            claims
        };
        let typ = Some(WALLET_ATTESTATION_TYP);

        let cases = [
            sign_raw(&key, Some("jwt"), valid_claims.clone()),
            sign_raw(&key, None, valid_claims.clone()),
            sign_raw(&key, typ, with("iss", "x".into())),
            sign_raw(&key, typ, with("sub", "x".into())),
            sign_raw(
                &key,
                typ,
                with("instance_id", "https://wallet.example/instance/".into()),
            ),
            sign_raw(
                &key,
                typ,
                with("instance_id", "https://other.example/instance/tag".into()),
            ),
            sign_raw(&key, typ, {
                let mut claims = valid_claims.clone();
                claims.remove("exp");
                claims
            }),
        ];

        for token in cases {
            let err = verify(&token, &key, &urls(), NOW).unwrap_err();
            assert_eq!(err.error, INVALID);
        }

        let token = sign_raw(&key, typ, valid_claims.clone());
        verify(&token, &key, &urls(), NOW).unwrap();
    }
}
