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

use bherror::traits::ForeignError as _;
use openssl::x509::X509;

use crate::{
    signer_matches_public_key, BoxError, CryptoError, HasJwkKid, JwkPublic, Signer,
    SigningAlgorithm,
};

/// [`Signer`] decorator with the X.509 certificate issued for its key pair.
///
/// The pairing is checked at construction, so holders of this type can hand out the certificate
/// and the public JWK interchangeably.
pub struct SignerWithCertificate<S> {
    signer: S,
    certificate: X509,
}

impl<S: Signer> SignerWithCertificate<S> {
    /// Pair up a [`Signer`] with the certificate for its public key.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::PublicKeyMismatch`] if the public keys of the [`Signer`] and the
    /// certificate do not match.
    pub fn new(signer: S, certificate: X509) -> bherror::Result<Self, CryptoError> {
        let certificate_key = certificate
            .public_key()
            .foreign_err(|| CryptoError::InvalidCertificate)?;

        signer_matches_public_key(&signer, &certificate_key)?;

        Ok(Self {
            signer,
            certificate,
        })
    }

    /// Returns a reference to the contained certificate.
    pub fn certificate(&self) -> &X509 {
        &self.certificate
    }

    /// Returns a reference to the contained signer.
    pub fn signer(&self) -> &S {
        &self.signer
    }
}

impl<S: Signer> Signer for SignerWithCertificate<S> {
    fn algorithm(&self) -> SigningAlgorithm {
        self.signer.algorithm()
    }

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, BoxError> {
        self.signer.sign(message)
    }

    fn public_jwk(&self) -> Result<JwkPublic, BoxError> {
        self.signer.public_jwk()
    }
}

impl<S: HasJwkKid> HasJwkKid for SignerWithCertificate<S> {
    fn jwk_kid(&self) -> &str {
        self.signer.jwk_kid()
    }
}

#[cfg(test)]
mod tests {
    use openssl::{
        asn1::Asn1Time,
        ec::{EcGroup, EcKey},
        hash::MessageDigest,
        nid::Nid,
        pkey::{PKey, Private},
        x509::X509NameBuilder,
    };

    use super::*;
    use crate::Es256Signer;

    fn self_signed(private_key: &PKey<Private>) -> X509 {
        let mut name = X509NameBuilder::new().unwrap();
        name.append_entry_by_text("CN", "wallet").unwrap();
        let name = name.build();

        let mut builder = X509::builder().unwrap();
        builder.set_version(2).unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(private_key).unwrap();
        builder
            .set_not_before(&Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::days_from_now(1).unwrap())
            .unwrap();
        builder.sign(private_key, MessageDigest::sha256()).unwrap();
        builder.build()
    }

    fn key_pair() -> (Es256Signer, PKey<Private>) {
        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
        let private_key = PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap();
        let pem = private_key.private_key_to_pem_pkcs8().unwrap();
        let signer = Es256Signer::from_private_key_pem("kid".to_owned(), &pem).unwrap();
        (signer, private_key)
    }

    #[test]
    fn signer_with_certificate_construction() {
        let (signer, private_key) = key_pair();
        let certificate = self_signed(&private_key);

        let paired = SignerWithCertificate::new(signer, certificate.clone()).unwrap();
        assert_eq!(paired.certificate(), &certificate);
        assert_eq!(paired.jwk_kid(), "kid");

        // Generate a different key pair, not corresponding to the certificate
        let incorrect_key = Es256Signer::generate("incorrect".into()).unwrap();

        // `Es256Signer` does not impl Debug, so this is a workaround
        let Err(error) = SignerWithCertificate::new(incorrect_key, certificate) else {
            unreachable!()
        };
        assert_eq!(error.error, CryptoError::PublicKeyMismatch);
    }
}
