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

//! The assertion a wallet instance presents to obtain a wallet attestation.

use bh_jws_utils::{
    base64_std_decode, jwk_key_tag, public_key_from_pem, public_key_to_jwk, Es256Verifier,
    FormatError, JwkPublic, JwtVerifier as _, SigningAlgorithm,
};
use bherror::{
    traits::{ErrorContext as _, ForeignBoxed as _, ForeignError as _, PropagateError as _},
    Error,
};
use openssl::memcmp;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Result, TokenKind, WalletError, WalletUrls};

/// The `typ` header of an assertion.
pub const ASSERTION_TYP: &str = "var+jwt";

/// The `type` claim of an assertion.
pub const ASSERTION_TYPE: &str = "WalletInstanceAttestationRequest";

const INVALID: WalletError = WalletError::TokenInvalid(TokenKind::Assertion);

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct AssertionHeader {
    pub(crate) alg: SigningAlgorithm,
    #[serde(default)]
    pub(crate) typ: Option<String>,
    #[serde(default)]
    pub(crate) kid: Option<String>,
}

impl jwt::JoseHeader for AssertionHeader {
    fn algorithm_type(&self) -> jwt::AlgorithmType {
        self.alg.into()
    }
}

/// Claims of an assertion.
///
/// Every claim is optional at the type level so that a missing claim is reported precisely.
#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct AssertionClaims {
    #[serde(default)]
    pub(crate) iss: Option<String>,
    #[serde(default)]
    pub(crate) sub: Option<String>,
    #[serde(default)]
    pub(crate) exp: Option<u64>,
    #[serde(default, rename = "type")]
    pub(crate) kind: Option<String>,
    #[serde(default)]
    pub(crate) cnf: Option<Value>,
    #[serde(default)]
    pub(crate) hardware_key_tag: Option<String>,
    #[serde(default)]
    pub(crate) nonce: Option<String>,
}

pub(crate) struct Assertion<Status>(jwt::Token<AssertionHeader, AssertionClaims, Status>);

impl<Status> Assertion<Status> {
    fn header(&self) -> &AssertionHeader {
        self.0.header()
    }

    fn claims(&self) -> &AssertionClaims {
        self.0.claims()
    }
}

impl<'a> Assertion<jwt::Unverified<'a>> {
    /// Parses the assertion without verifying it.
    pub(crate) fn parse(assertion: &'a str) -> Result<Self> {
        let token = jwt::Token::parse_unverified(assertion)
            .foreign_err(|| INVALID)
            .ctx(|| "malformed assertion")?;

        Ok(Self(token))
    }

    /// The hardware key tag of the instance claiming to have signed the assertion.
    ///
    /// Only used to look up the key the signature is then verified with.
    pub(crate) fn signer_key_tag(&self) -> Result<&str> {
        self.header()
            .kid
            .as_deref()
            .filter(|kid| !kid.is_empty())
            .ok_or_else(|| Error::root(INVALID))
            .ctx(|| "missing key ID")
    }

    /// Verifies the `ES256` signature under the registered instance key.
    pub(crate) fn verify(self, instance_key_pem: &str) -> Result<Assertion<jwt::token::Verified>> {
        if self.header().alg != SigningAlgorithm::Es256 {
            let alg = self.header().alg;
            return Err(Error::root(INVALID)).ctx(|| format!("unexpected algorithm {alg}"));
        }

        let public_key = public_key_from_pem(instance_key_pem).with_err(|| WalletError::Store)?;
        let public_jwk = public_key_to_jwk(&public_key, None).with_err(|| WalletError::Store)?;

        let token = Es256Verifier
            .verify_jwt_signature(self.0, &public_jwk)
            .foreign_boxed_err(|| INVALID)
            .ctx(|| "invalid assertion signature")?;

        Ok(Assertion(token))
    }
}

impl Assertion<jwt::token::Verified> {
    /// Validates the header and claims of a verified assertion of the instance `instance_id`.
    ///
    /// Returns the confirmation key (`cnf`) after checking that the hardware key tag claim
    /// identifies it.
    pub(crate) fn validate(
        &self,
        urls: &WalletUrls,
        instance_id: &str,
        now: u64,
    ) -> Result<&Value> {
        let claims = self.claims();

        match claims.exp {
            Some(exp) if exp > now => {}
            Some(_) => return Err(Error::root(INVALID)).ctx(|| "assertion expired"),
            None => return Err(Error::root(INVALID)).ctx(|| "missing exp"),
        }
        expect_claim("sub", claims.sub.as_deref(), urls.public())?;
        expect_claim("typ", self.header().typ.as_deref(), ASSERTION_TYP)?;
        expect_claim("type", claims.kind.as_deref(), ASSERTION_TYPE)?;
        expect_claim("iss", claims.iss.as_deref(), instance_id)?;

        let cnf = claims
            .cnf
            .as_ref()
            .filter(|cnf| cnf.is_object())
            .ok_or_else(|| Error::root(WalletError::ConfirmationKeyInvalid))
            .ctx(|| "missing cnf")?;
        let jwk: JwkPublic = cnf
            .get("jwk")
            .and_then(Value::as_object)
            .cloned()
            .ok_or_else(|| Error::root(WalletError::ConfirmationKeyInvalid))
            .ctx(|| "missing cnf.jwk")?;

        check_key_tag(&jwk, claims.hardware_key_tag.as_deref())?;

        Ok(cnf)
    }

    /// The optional nonce bound into the assertion.
    pub(crate) fn nonce(&self) -> Option<&str> {
        self.claims().nonce.as_deref()
    }
}

fn expect_claim(name: &'static str, value: Option<&str>, expected: &str) -> Result<()> {
    if value == Some(expected) {
        return Ok(());
    }

    let value = value.map(str::to_owned);
    Err(Error::root(INVALID)).ctx(|| format!("unexpected {name}: {value:?}"))
}

/// Checks that `hardware_key_tag` is the key tag of `jwk`.
fn check_key_tag(jwk: &JwkPublic, hardware_key_tag: Option<&str>) -> Result<()> {
    let computed = jwk_key_tag(jwk).match_err(|error| match error {
        FormatError::UnsupportedKeyType(_) => WalletError::UnsupportedKeyType,
        _ => WalletError::ConfirmationKeyInvalid,
    })?;

    let hardware_key_tag =
        hardware_key_tag.ok_or_else(|| Error::root(WalletError::HardwareKeyTagMissing))?;
    let claimed = base64_std_decode(hardware_key_tag).foreign_err(|| WalletError::KeyTagMismatch)?;

    if claimed.len() != computed.len() || !memcmp::eq(&claimed, &computed) {
        return Err(Error::root(WalletError::KeyTagMismatch));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use bh_jws_utils::{
        base64_std_encode, json_object, public_key_tag, Es256Signer, JwtSigner as _,
    };
    use openssl::{
        ec::{EcGroup, EcKey},
        nid::Nid,
        pkey::PKey,
        rsa::Rsa,
    };

    use super::*;

    const NOW: u64 = 1_700_000_000;

    struct Fixture {
        urls: WalletUrls,
        signer: Es256Signer,
        tag: String,
    }

    impl Fixture {
        fn new() -> Self {
            let private_key =
                EcKey::generate(&EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap())
                    .unwrap();
            let public_key = PKey::from_ec_key(
                EcKey::from_public_key(private_key.group(), private_key.public_key()).unwrap(),
            )
            .unwrap();
            let tag = base64_std_encode(public_key_tag(&public_key).unwrap());
            let signer = Es256Signer::from_private_key_pem(
                tag.clone(),
                &private_key.private_key_to_pem().unwrap(),
            )
            .unwrap();

            Self {
                urls: WalletUrls::new("https://wallet.example").unwrap(),
                signer,
                tag,
            }
        }

        fn instance_id(&self) -> String {
            self.urls.instance_id(&self.tag)
        }

        fn claims(&self) -> JwkPublic {
            json_object!({
                "iss": self.instance_id(),
                "sub": self.urls.public(),
                "exp": NOW + 60,
                "type": ASSERTION_TYPE,
                "cnf": { "jwk": self.signer.public_jwk().unwrap() },
                "hardware_key_tag": self.tag,
            })
        }

        fn claims_with(&self, name: &str, value: Value) -> JwkPublic {
            let mut claims = self.claims();
            claims.insert(name.to_owned(), value);
            claims
        }

        fn claims_without(&self, name: &str) -> JwkPublic {
            let mut claims = self.claims();
            claims.remove(name);
            claims
        }

        fn sign_as(&self, signer: &Es256Signer, typ: &str, claims: JwkPublic) -> String {
            let header = AssertionHeader {
                alg: SigningAlgorithm::Es256,
                typ: Some(typ.to_owned()),
                kid: Some(self.tag.clone()),
            };
            let token: jwt::Token<AssertionHeader, JwkPublic, jwt::token::Signed> =
                signer.sign_jwt(jwt::Token::new(header, claims)).unwrap();

            token.as_str().to_owned()
        }

        fn sign(&self, claims: JwkPublic) -> String {
            self.sign_as(&self.signer, ASSERTION_TYP, claims)
        }

        fn validate(&self, assertion: &str) -> Result<Value> {
            let parsed = Assertion::parse(assertion)?;
            assert_eq!(parsed.signer_key_tag()?, self.tag);

            let verified = parsed.verify(&self.signer.public_key_pem().unwrap())?;
            verified
                .validate(&self.urls, &self.instance_id(), NOW)
                .cloned()
        }
    }

    #[test]
    fn valid_assertion_yields_confirmation_key() {
        let fixture = Fixture::new();
        let assertion = fixture.sign(fixture.claims());

        let cnf = fixture.validate(&assertion).unwrap();
        assert_eq!(
            cnf["jwk"],
            Value::Object(fixture.signer.public_jwk().unwrap())
        );
    }

    #[test]
    fn nonce_claim_is_exposed() {
        let fixture = Fixture::new();
        let assertion = fixture.sign(fixture.claims_with("nonce", "n-1".into()));

        let verified = Assertion::parse(&assertion)
            .unwrap()
            .verify(&fixture.signer.public_key_pem().unwrap())
            .unwrap();
        assert_eq!(verified.nonce(), Some("n-1"));
    }

    #[test]
    fn invalid_tokens_are_rejected() {
        let fixture = Fixture::new();
        let other_instance = fixture.urls.instance_id("b3RoZXI=");
        let cases = [
            fixture.sign_as(&fixture.signer, "jwt", fixture.claims()),
            fixture.sign(fixture.claims_with("exp", NOW.into())),
            fixture.sign(fixture.claims_without("exp")),
            fixture.sign(fixture.claims_with("sub", "https://other.example".into())),
            fixture.sign(fixture.claims_with("type", "WalletInstanceAttestation".into())),
            fixture.sign(fixture.claims_with("iss", other_instance.into())),
            fixture.sign(fixture.claims_without("iss")),
            fixture.sign_as(
                &Es256Signer::generate("other".to_owned()).unwrap(),
                ASSERTION_TYP,
                fixture.claims(),
            ),
        ];

        for assertion in cases {
            let err = fixture.validate(&assertion).unwrap_err();
            assert_eq!(err.error, INVALID);
        }
    }

    #[test]
    fn malformed_assertion_is_rejected() {
        for assertion in ["", "a.b.c", "not a jwt"] {
            let Err(err) = Assertion::parse(assertion) else {
                panic!("{assertion:?} parsed")
            };
            assert_eq!(err.error, INVALID);
        }
    }

    #[test]
    fn missing_key_id_is_rejected() {
        let fixture = Fixture::new();
        let header = AssertionHeader {
            alg: SigningAlgorithm::Es256,
            typ: Some(ASSERTION_TYP.to_owned()),
            kid: None,
        };
        let token: jwt::Token<AssertionHeader, JwkPublic, jwt::token::Signed> = fixture
            .signer
            .sign_jwt(jwt::Token::new(header, fixture.claims()))
            .unwrap();

        let parsed = Assertion::parse(token.as_str()).unwrap();
        assert_eq!(parsed.signer_key_tag().unwrap_err().error, INVALID);
    }

    #[test]
    fn confirmation_key_must_carry_a_jwk() {
        let fixture = Fixture::new();

        for claims in [
            fixture.claims_without("cnf"),
            fixture.claims_with("cnf", "jwk".into()),
            fixture.claims_with("cnf", serde_json::json!({ "kid": "1" })),
            fixture.claims_with("cnf", serde_json::json!({ "jwk": { "kty": "EC" } })),
        ] {
            let err = fixture.validate(&fixture.sign(claims)).unwrap_err();
            assert_eq!(err.error, WalletError::ConfirmationKeyInvalid);
        }
    }

    #[test]
    fn unsupported_confirmation_key_type_is_rejected() {
        let fixture = Fixture::new();
        let cnf = serde_json::json!({ "jwk": { "kty": "OKP", "crv": "Ed25519", "x": "AAAA" } });

        let err = fixture
            .validate(&fixture.sign(fixture.claims_with("cnf", cnf)))
            .unwrap_err();
        assert_eq!(err.error, WalletError::UnsupportedKeyType);
    }

    #[test]
    fn rsa_confirmation_key_is_accepted() {
        let fixture = Fixture::new();
        let rsa = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();
        let rsa = PKey::public_key_from_pem(&rsa.public_key_to_pem().unwrap()).unwrap();
        let jwk = public_key_to_jwk(&rsa, None).unwrap();
        let tag = base64_std_encode(public_key_tag(&rsa).unwrap());

        let mut claims = fixture.claims_with("cnf", serde_json::json!({ "jwk": jwk }));
        claims.insert("hardware_key_tag".to_owned(), tag.into());

        fixture.validate(&fixture.sign(claims)).unwrap();
    }

    #[test]
    fn hardware_key_tag_must_identify_confirmation_key() {
        let fixture = Fixture::new();

        let err = fixture
            .validate(&fixture.sign(fixture.claims_without("hardware_key_tag")))
            .unwrap_err();
        assert_eq!(err.error, WalletError::HardwareKeyTagMissing);

        let other_tag = base64_std_encode([0u8; 32]);
        for tag in ["not base64!", "AAAA", other_tag.as_str()] {
            let claims = fixture.claims_with("hardware_key_tag", tag.into());
            let err = fixture.validate(&fixture.sign(claims)).unwrap_err();
            assert_matches!(err.error, WalletError::KeyTagMismatch);
        }
    }
}
