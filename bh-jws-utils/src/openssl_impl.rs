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

use std::result::Result as StdResult;

use bherror::{
    traits::{ErrorContext, ForeignError, PropagateError as _},
    Error, Result,
};
use openssl::{
    bn::BigNum,
    ec::{EcGroup, EcKey},
    ecdsa::EcdsaSig,
    nid::Nid,
    pkey::{PKey, Private, Public},
    sha::sha256,
};
use serde_json::Value;

use super::{HasJwkKid, SignatureVerifier, Signer, SigningAlgorithm};
use crate::{
    error::{CryptoError, FormatError},
    public_key::{ec_public_key_to_jwk, jwk_str, public_key_from_jwk, KTY_EC},
    BoxError, JwkPublic,
};

type EcPrivate = EcKey<Private>;
type EcPublic = EcKey<Public>;

// prime256v1, also known as secp256r1 and NIST P-256.
pub(crate) const ELLIPTIC_CURVE_NID: Nid = Nid::X9_62_PRIME256V1;

const CRV: &str = "P-256";
const ALG: &str = "ES256";

/// An `ES256` [`Signer`] holding a P-256 private key.
///
/// Used for the wallet provider signing key and, in tests, for device hardware keys.
pub struct Es256Signer {
    private_key: EcPrivate,
    kid: String,
}

impl Es256Signer {
    /// Generates a fresh key published under `kid`.
    pub fn generate(kid: String) -> Result<Self, CryptoError> {
        let ec_group = EcGroup::from_curve_name(ELLIPTIC_CURVE_NID)
            .foreign_err(|| CryptoError::CryptoBackend)?;
        let private_key = EcKey::<Private>::generate(ec_group.as_ref())
            .foreign_err(|| CryptoError::KeyGenerationFailed)?;

        Ok(Self { private_key, kid })
    }

    /// Loads a P-256 private key from PEM.
    pub fn from_private_key_pem(kid: String, private_key_pem: &[u8]) -> Result<Self, CryptoError> {
        let private_key = EcPrivate::private_key_from_pem(private_key_pem)
            .foreign_err(|| CryptoError::CryptoBackend)?;

        Self::from_private_key(kid, private_key)
    }

    /// Loads a passphrase protected P-256 private key from PEM.
    pub fn from_private_key_pem_passphrase(
        kid: String,
        private_key_pem: &[u8],
        passphrase: &[u8],
    ) -> Result<Self, CryptoError> {
        let private_key = EcPrivate::private_key_from_pem_passphrase(private_key_pem, passphrase)
            .foreign_err(|| CryptoError::CryptoBackend)
            .ctx(|| "cannot decrypt private key")?;

        Self::from_private_key(kid, private_key)
    }

    fn from_private_key(kid: String, private_key: EcPrivate) -> Result<Self, CryptoError> {
        if private_key.group().curve_name() != Some(ELLIPTIC_CURVE_NID) {
            return Err(Error::root(CryptoError::Unsupported(
                "ES256 requires a P-256 key".to_owned(),
            )));
        }

        Ok(Self { private_key, kid })
    }

    /// The public key as a JWK with `alg`, `use` and `kid` members.
    pub fn public_jwk(&self) -> Result<JwkPublic, CryptoError> {
        let public_key = self.public_ec_key()?;
        let mut jwk = ec_public_key_to_jwk(&public_key)?;

        jwk.insert("alg".to_owned(), Value::String(ALG.to_owned()));
        jwk.insert("use".to_owned(), Value::String("sig".to_owned()));
        jwk.insert("kid".to_owned(), Value::String(self.kid.clone()));

        Ok(jwk)
    }

    /// The public counterpart of this key.
    pub fn public_key(&self) -> Result<PKey<Public>, CryptoError> {
        PKey::from_ec_key(self.public_ec_key()?).foreign_err(|| CryptoError::CryptoBackend)
    }

    /// The public counterpart of this key in PEM (SubjectPublicKeyInfo) format.
    pub fn public_key_pem(&self) -> Result<String, CryptoError> {
        crate::public_key_to_pem(&self.public_key()?)
    }

    fn public_ec_key(&self) -> Result<EcPublic, CryptoError> {
        EcPublic::from_public_key(self.private_key.group(), self.private_key.public_key())
            .foreign_err(|| CryptoError::CryptoBackend)
    }
}

impl Signer for Es256Signer {
    fn algorithm(&self) -> SigningAlgorithm {
        SigningAlgorithm::Es256
    }

    fn sign(&self, message: &[u8]) -> StdResult<Vec<u8>, BoxError> {
        let digest = sha256(message);
        let signature = EcdsaSig::sign(&digest, self.private_key.as_ref())?;

        let mut jws = signature.r().to_vec_padded(32)?;
        jws.extend(signature.s().to_vec_padded(32)?);
        Ok(jws)
    }

    fn public_jwk(&self) -> StdResult<JwkPublic, BoxError> {
        Ok(Es256Signer::public_jwk(self)?)
    }
}

impl HasJwkKid for Es256Signer {
    fn jwk_kid(&self) -> &str {
        &self.kid
    }
}

/// Verifies `ES256` signatures under a P-256 JWK.
#[derive(Default)]
pub struct Es256Verifier;

impl SignatureVerifier for Es256Verifier {
    fn algorithm(&self) -> SigningAlgorithm {
        SigningAlgorithm::Es256
    }

    fn verify(
        &self,
        message: &[u8],
        signature: &[u8],
        public_key: &JwkPublic,
    ) -> StdResult<bool, BoxError> {
        let public_key = public_key_from_jwk_es256(public_key)?;
        let jws_bytes = <&[u8; 64]>::try_from(signature)?;
        let (r, s) = jws_bytes.split_at(32);
        let r = BigNum::from_slice(r)?;
        let s = BigNum::from_slice(s)?;
        let ecdsa_sig = EcdsaSig::from_private_components(r, s)?;

        let digest = sha256(message);

        Ok(ecdsa_sig.verify(&digest, public_key.as_ref())?)
    }
}

pub(crate) fn public_key_from_jwk_es256(public_key: &JwkPublic) -> Result<EcPublic, FormatError> {
    check_jwk_field(public_key, "kty", KTY_EC)?;
    check_jwk_field(public_key, "crv", CRV)?;

    public_key_from_jwk(public_key)?
        .ec_key()
        .foreign_err(|| FormatError::JwkParsingFailed("not an EC key".to_owned()))
}

fn check_jwk_field(
    public_key: &JwkPublic,
    field: &str,
    expected_value: &str,
) -> Result<(), FormatError> {
    let value = jwk_str(public_key, field)?;

    if value == expected_value {
        return Ok(());
    }

    Err(Error::root(FormatError::JwkParsingFailed(format!(
        "incorrect value on \"{}\" field",
        field
    ))))
    .ctx(|| {
        format!(
            "value on field \"{}\" was {}, expected {}",
            field, value, expected_value
        )
    })
}

/// Checks that `signer` signs with the private counterpart of `public_key`.
pub fn signer_matches_public_key<S: Signer + ?Sized>(
    signer: &S,
    public_key: &PKey<Public>,
) -> Result<(), CryptoError> {
    let signer_jwk = signer
        .public_jwk()
        .map_err(|_| Error::root(CryptoError::CryptoBackend))?;
    let signer_public_key =
        public_key_from_jwk(&signer_jwk).with_err(|| CryptoError::InvalidPublicKey)?;

    if !signer_public_key.public_eq(public_key) {
        return Err(Error::root(CryptoError::PublicKeyMismatch));
    }

    Ok(())
}
