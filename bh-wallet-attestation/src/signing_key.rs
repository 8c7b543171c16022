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

use bh_jws_utils::{
    base64_std_encode, public_key_tag, Es256Signer, JwkPublic, JwkSet, SignerWithCertificate,
};
use bherror::{
    traits::{ErrorContext as _, ForeignError as _, PropagateError as _},
    Error,
};
use openssl::{
    pkey::{PKey, Public},
    x509::X509,
};

use crate::{Result, WalletError};

/// The key the wallet provider signs wallet attestations with.
///
/// Loaded once at startup and shared, e.g. behind an [`Arc`](std::sync::Arc), by every
/// component issuing or verifying wallet attestations.
pub struct WalletSigningKey {
    signer: SignerWithCertificate<Es256Signer>,
    public_key: PKey<Public>,
    public_jwk: JwkPublic,
    jwks: JwkSet,
}

impl WalletSigningKey {
    /// Loads the signing certificate and its P-256 private key from a single PEM document.
    ///
    /// The private key may be encrypted with `passphrase`. Fails if the certificate was not
    /// issued for the private key.
    pub fn from_pem(pem: &[u8], passphrase: Option<&[u8]>) -> Result<Self> {
        let certificate = X509::from_pem(pem)
            .foreign_err(invalid_certificate)
            .ctx(|| "no certificate in PEM")?;
        let kid = certificate_kid(&certificate)?;

        let signer = match passphrase {
            Some(passphrase) => Es256Signer::from_private_key_pem_passphrase(kid, pem, passphrase),
            None => Es256Signer::from_private_key_pem(kid, pem),
        }
        .with_err(invalid_certificate)
        .ctx(|| "no usable ES256 private key in PEM")?;

        Self::new(signer, certificate)
    }

    /// Pairs `signer` with its `certificate`.
    ///
    /// The `kid` of `signer` must be the standard base64 SHA-256 digest of the uncompressed
    /// public point, as computed by [`certificate_kid`].
    pub fn new(signer: Es256Signer, certificate: X509) -> Result<Self> {
        let signer = SignerWithCertificate::new(signer, certificate)
            .with_err(invalid_certificate)
            .ctx(|| "certificate does not match the private key")?;
        let public_key = signer
            .certificate()
            .public_key()
            .foreign_err(invalid_certificate)?;
        let public_jwk = signer
            .signer()
            .public_jwk()
            .with_err(|| WalletError::CryptoBackend)?;
        let jwks = JwkSet::new(vec![public_jwk.clone()])
            .map_err(|message| Error::root(WalletError::CryptoBackend).ctx(message))?;

        Ok(Self {
            signer,
            public_key,
            public_jwk,
            jwks,
        })
    }

    /// The key id, carried in the `kid` header of wallet attestations.
    pub fn kid(&self) -> &str {
        bh_jws_utils::HasJwkKid::jwk_kid(&self.signer)
    }

    /// The signing certificate.
    pub fn certificate(&self) -> &X509 {
        self.signer.certificate()
    }

    /// The public signing key.
    pub fn public_key(&self) -> &PKey<Public> {
        &self.public_key
    }

    /// The public signing key as a JWK, including `kid`, `alg` and `use`.
    pub fn public_jwk(&self) -> &JwkPublic {
        &self.public_jwk
    }

    /// The JWK Set published by the wallet provider.
    pub fn jwks(&self) -> &JwkSet {
        &self.jwks
    }

    pub(crate) fn signer(&self) -> &SignerWithCertificate<Es256Signer> {
        &self.signer
    }
}

/// Computes the key id of a signing certificate.
pub fn certificate_kid(certificate: &X509) -> Result<String> {
    let public_key = certificate
        .public_key()
        .foreign_err(invalid_certificate)?;
    let tag = public_key_tag(&public_key).with_err(invalid_certificate)?;

    Ok(base64_std_encode(tag))
}

fn invalid_certificate() -> WalletError {
    WalletError::Configuration("issuer_certificate".to_owned())
}

impl std::fmt::Debug for WalletSigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletSigningKey")
            .field("kid", &self.kid())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use bh_jws_utils::{
        public_key_from_jwk, Es256Verifier, JwtSigner as _, JwtVerifier as _, SignatureVerifier,
    };
    use bhx5chain::Builder;
    use openssl::{
        ec::{EcGroup, EcKey},
        nid::Nid,
        symm::Cipher,
    };

    use super::*;

    fn issued_certificate(private_key: &EcKey<openssl::pkey::Private>) -> X509 {
        let public_key = PKey::from_ec_key(
            EcKey::from_public_key(private_key.group(), private_key.public_key()).unwrap(),
        )
        .unwrap();

        Builder::self_signed_root("Test Wallet Provider CA")
            .unwrap()
            .issue_leaf(&public_key, &[("CN", "Wallet Provider")], &[])
            .unwrap()
    }

    fn p256_key() -> EcKey<openssl::pkey::Private> {
        EcKey::generate(&EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap()).unwrap()
    }

    #[test]
    fn loads_certificate_and_key_from_one_pem() {
        let private_key = p256_key();
        let certificate = issued_certificate(&private_key);
        let mut pem = certificate.to_pem().unwrap();
        pem.extend(private_key.private_key_to_pem().unwrap());

        let key = WalletSigningKey::from_pem(&pem, None).unwrap();

        assert_eq!(key.kid(), certificate_kid(&certificate).unwrap());
        assert_eq!(key.public_jwk()["kid"], key.kid());
        assert_eq!(key.public_jwk()["alg"], "ES256");
        assert!(key.public_key().public_eq(&certificate.public_key().unwrap()));
        assert_eq!(key.jwks().find(key.kid()), Some(key.public_jwk()));

        let message = b"header.claims";
        assert_eq!(key.jwks().keys(), [key.public_jwk().clone()]);

        let signature = bh_jws_utils::Signer::sign(key.signer(), message).unwrap();
        assert!(Es256Verifier
            .verify(message, &signature, key.public_jwk())
            .unwrap());
        assert!(public_key_from_jwk(key.public_jwk())
            .unwrap()
            .public_eq(key.public_key()));
    }

    #[test]
    fn loads_encrypted_private_key() {
        let private_key = p256_key();
        let mut pem = issued_certificate(&private_key).to_pem().unwrap();
        pem.extend(
            private_key
                .private_key_to_pem_passphrase(Cipher::aes_256_cbc(), b"secret")
                .unwrap(),
        );

        WalletSigningKey::from_pem(&pem, Some(b"secret")).unwrap();

        let err = WalletSigningKey::from_pem(&pem, Some(b"wrong")).unwrap_err();
        assert_eq!(err.error, invalid_certificate());
    }

    #[test]
    fn mismatched_certificate_is_rejected() {
        let mut pem = issued_certificate(&p256_key()).to_pem().unwrap();
        pem.extend(p256_key().private_key_to_pem().unwrap());

        let err = WalletSigningKey::from_pem(&pem, None).unwrap_err();
        assert_eq!(err.error, invalid_certificate());
    }

    #[test]
    fn pem_without_certificate_is_rejected() {
        let pem = p256_key().private_key_to_pem().unwrap();

        let err = WalletSigningKey::from_pem(&pem, None).unwrap_err();
        assert_eq!(err.error, invalid_certificate());
    }

    #[test]
    fn signs_jwts_verifiable_with_published_key() {
        let private_key = p256_key();
        let mut pem = issued_certificate(&private_key).to_pem().unwrap();
        pem.extend(private_key.private_key_to_pem().unwrap());
        let key = WalletSigningKey::from_pem(&pem, None).unwrap();

        let claims = bh_jws_utils::json_object!({ "iss": "https://wallet.example" });
        let signed: String = key.signer().sign_jwt(claims).unwrap();

        let jwks = key.jwks();
        let verified: JwkPublic = Es256Verifier
            .verify_jwt_signature(signed.as_str(), jwks.find(key.kid()).unwrap())
            .unwrap();
        assert_eq!(verified["iss"], "https://wallet.example");
    }
}
