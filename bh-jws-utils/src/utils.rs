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

use std::cell::Cell;

use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine as _,
};

use crate::{JwkPublic, SignatureVerifier, Signer};

/// A boxed error of a signing or verification backend.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The JWS signing input, `<header>.<claims>`.
///
/// See [RFC7515 section 5.1](https://www.rfc-editor.org/rfc/rfc7515.html#section-5.1).
pub fn jws_signing_input(header: &str, claims: &str) -> String {
    format!("{header}.{claims}")
}

/// Base64url without padding, the encoding of JWS segments and nonces.
pub fn base64_url_encode<T: AsRef<[u8]>>(input: T) -> String {
    URL_SAFE_NO_PAD.encode(input)
}

/// Decodes base64url without padding.
pub fn base64_url_decode<T: AsRef<[u8]>>(payload: T) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(payload)
}

/// Standard padded base64, the encoding of hardware key tags and key ids.
pub fn base64_std_encode<T: AsRef<[u8]>>(input: T) -> String {
    STANDARD.encode(input)
}

/// Decodes standard padded base64.
pub fn base64_std_decode<T: AsRef<[u8]>>(payload: T) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(payload)
}

/// Holds the error of a backend while a [`jwt`] trait call unwinds.
///
/// The [`jwt`] traits can only fail with [`jwt::Error`], so the backend error is parked here
/// and [`jwt::Error::InvalidSignature`] is reported in its place.
#[derive(Default)]
struct ParkedError(Cell<Option<BoxError>>);

impl ParkedError {
    fn park(&self, error: BoxError) -> jwt::Error {
        let previous = self.0.replace(Some(error));
        debug_assert!(previous.is_none());

        jwt::Error::InvalidSignature
    }

    /// The parked backend error if there is one, the `jwt` error otherwise.
    fn resolve(self, jwt_error: jwt::Error) -> BoxError {
        match self.0.into_inner() {
            Some(backend_error) => backend_error,
            None => Box::new(jwt_error),
        }
    }
}

struct SigningBackend<'a, S: ?Sized> {
    signer: &'a S,
    parked: ParkedError,
}

impl<S: Signer + ?Sized> jwt::SigningAlgorithm for SigningBackend<'_, S> {
    fn algorithm_type(&self) -> jwt::AlgorithmType {
        self.signer.algorithm().into()
    }

    fn sign(&self, header: &str, claims: &str) -> Result<String, jwt::Error> {
        self.signer
            .sign(jws_signing_input(header, claims).as_bytes())
            .map(base64_url_encode)
            .map_err(|error| self.parked.park(error))
    }
}

pub(crate) fn sign_jwt<UnsignedJwt, SignedJwt, S>(
    unsigned_jwt: UnsignedJwt,
    signer: &S,
) -> Result<SignedJwt, BoxError>
where
    UnsignedJwt: jwt::SignWithKey<SignedJwt>,
    S: Signer + ?Sized,
{
    let backend = SigningBackend {
        signer,
        parked: ParkedError::default(),
    };

    unsigned_jwt
        .sign_with_key(&backend)
        .map_err(|error| backend.parked.resolve(error))
}

struct VerifyingBackend<'a, V: ?Sized> {
    verifier: &'a V,
    public_key: &'a JwkPublic,
    parked: ParkedError,
}

impl<V: SignatureVerifier + ?Sized> jwt::VerifyingAlgorithm for VerifyingBackend<'_, V> {
    fn algorithm_type(&self) -> jwt::AlgorithmType {
        self.verifier.algorithm().into()
    }

    fn verify_bytes(
        &self,
        header: &str,
        claims: &str,
        signature: &[u8],
    ) -> Result<bool, jwt::Error> {
        self.verifier
            .verify(
                jws_signing_input(header, claims).as_bytes(),
                signature,
                self.public_key,
            )
            .map_err(|error| self.parked.park(error))
    }
}

pub(crate) fn verify_jwt_signature<UnverifiedJwt, VerifiedJwt, V>(
    unverified_jwt: UnverifiedJwt,
    verifier: &V,
    public_key: &JwkPublic,
) -> Result<VerifiedJwt, BoxError>
where
    UnverifiedJwt: jwt::VerifyWithKey<VerifiedJwt>,
    V: SignatureVerifier + ?Sized,
{
    let backend = VerifyingBackend {
        verifier,
        public_key,
        parked: ParkedError::default(),
    };

    unverified_jwt
        .verify_with_key(&backend)
        .map_err(|error| backend.parked.resolve(error))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingSigner;

    impl Signer for FailingSigner {
        fn algorithm(&self) -> crate::SigningAlgorithm {
            crate::SigningAlgorithm::Es256
        }

        fn sign(&self, _message: &[u8]) -> Result<Vec<u8>, BoxError> {
            Err("hardware key unavailable".into())
        }

        fn public_jwk(&self) -> Result<JwkPublic, BoxError> {
            Ok(JwkPublic::new())
        }
    }

    #[test]
    fn base64_flavours_differ_in_alphabet_and_padding() {
        let bytes = [0xfb, 0xff];

        assert_eq!(base64_url_encode(bytes), "-_8");
        assert_eq!(base64_std_encode(bytes), "+/8=");
        assert_eq!(base64_std_decode("+/8=").unwrap(), bytes);
        assert_eq!(base64_url_decode("-_8").unwrap(), bytes);

        base64_url_decode("+/8=").unwrap_err();
        base64_std_decode("-_8").unwrap_err();
    }

    #[test]
    fn signing_input_joins_header_and_claims() {
        assert_eq!(jws_signing_input("aGVhZGVy", "Y2xhaW1z"), "aGVhZGVy.Y2xhaW1z");
    }

    #[test]
    fn backend_error_survives_jwt_signing() {
        let claims = crate::json_object!({ "sub": "instance" });

        let err = sign_jwt::<_, String, _>(claims, &FailingSigner).unwrap_err();

        assert_eq!(err.to_string(), "hardware key unavailable");
    }
}
