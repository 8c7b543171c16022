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

use std::str::FromStr;

use bherror::Error;
use serde::{Deserialize, Serialize};

use crate::{error::SignatureError, utils::BoxError, JwkPublic};

/// ECDSA algorithms of the JWS `alg` header.
///
/// Wallet instances and the wallet provider sign with [`SigningAlgorithm::Es256`]; the larger
/// curves are recognized so that a token using them is rejected by algorithm rather than by
/// parse failure.
///
/// See [RFC7518 section 3.4](https://datatracker.ietf.org/doc/html/rfc7518#section-3.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SigningAlgorithm {
    /// P-256 with SHA-256
    Es256,
    /// P-384 with SHA-384
    Es384,
    /// P-521 with SHA-512
    Es512,
}

impl SigningAlgorithm {
    /// The `alg` header value.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Es256 => "ES256",
            Self::Es384 => "ES384",
            Self::Es512 => "ES512",
        }
    }
}

impl FromStr for SigningAlgorithm {
    type Err = Error<SignatureError>;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        [Self::Es256, Self::Es384, Self::Es512]
            .into_iter()
            .find(|alg| alg.name() == value)
            .ok_or_else(|| Error::root(SignatureError::UnsupportedAlgorithm(value.to_owned())))
    }
}

impl std::fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl From<SigningAlgorithm> for jwt::AlgorithmType {
    fn from(value: SigningAlgorithm) -> Self {
        match value {
            SigningAlgorithm::Es256 => Self::Es256,
            SigningAlgorithm::Es384 => Self::Es384,
            SigningAlgorithm::Es512 => Self::Es512,
        }
    }
}

/// A key that produces JWS signatures.
///
/// The signature is returned raw, in the JWS encoding of the algorithm (`R || S` for ECDSA),
/// and is base64url encoded by the caller.
pub trait Signer {
    /// The algorithm of every signature. Never changes for a given signer.
    fn algorithm(&self) -> SigningAlgorithm;

    /// Signs a JWS signing input, `<header>.<claims>`.
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, BoxError>;

    /// The public key as a JWK.
    fn public_jwk(&self) -> Result<JwkPublic, BoxError>;
}

/// A [`Signer`] whose key is published under a `kid`.
pub trait HasJwkKid: Signer {
    /// The `kid` of the public JWK, also put in the header of signed tokens.
    fn jwk_kid(&self) -> &str;
}

/// Checks JWS signatures against a public JWK.
pub trait SignatureVerifier: Sync {
    /// The only algorithm accepted.
    fn algorithm(&self) -> SigningAlgorithm;

    /// `Ok(false)` for a wrong signature, `Err(_)` only when the key or the backend fails.
    fn verify(
        &self,
        message: &[u8],
        signature: &[u8],
        public_key: &JwkPublic,
    ) -> Result<bool, BoxError>;
}

/// Signs [`jwt`] tokens with a [`Signer`].
pub trait JwtSigner: Signer {
    /// Signs `unsigned_jwt`, surfacing the signer's own error when it fails.
    fn sign_jwt<UnsignedJwt, SignedJwt>(
        &self,
        unsigned_jwt: UnsignedJwt,
    ) -> Result<SignedJwt, BoxError>
    where
        UnsignedJwt: jwt::SignWithKey<SignedJwt>;
}

impl<S: Signer + ?Sized> JwtSigner for S {
    fn sign_jwt<UnsignedJwt, SignedJwt>(
        &self,
        unsigned_jwt: UnsignedJwt,
    ) -> Result<SignedJwt, BoxError>
    where
        UnsignedJwt: jwt::SignWithKey<SignedJwt>,
    {
        crate::utils::sign_jwt(unsigned_jwt, self)
    }
}

/// Verifies [`jwt`] tokens with a [`SignatureVerifier`].
///
/// The `alg` header of the token must equal [`SignatureVerifier::algorithm`].
pub trait JwtVerifier: SignatureVerifier {
    /// Verifies the signature of `unverified_jwt` under `public_key`.
    fn verify_jwt_signature<UnverifiedJwt, VerifiedJwt>(
        &self,
        unverified_jwt: UnverifiedJwt,
        public_key: &JwkPublic,
    ) -> Result<VerifiedJwt, BoxError>
    where
        UnverifiedJwt: jwt::VerifyWithKey<VerifiedJwt>;
}

impl<V: SignatureVerifier + ?Sized> JwtVerifier for V {
    fn verify_jwt_signature<UnverifiedJwt, VerifiedJwt>(
        &self,
        unverified_jwt: UnverifiedJwt,
        public_key: &JwkPublic,
    ) -> Result<VerifiedJwt, BoxError>
    where
        UnverifiedJwt: jwt::VerifyWithKey<VerifiedJwt>,
    {
        crate::utils::verify_jwt_signature(unverified_jwt, self, public_key)
    }
}
