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

use bherror::traits::{ErrorContext as _, ForeignError as _};
use openssl::{
    pkey::{PKey, Public},
    x509::X509,
};

use crate::{Error, Result};

const PUBLIC_KEY_PEM_LABEL: &str = "-----BEGIN PUBLIC KEY-----";

/// A pinned root of trust for attestation certificate chains.
///
/// Vendors publish their attestation roots either as a full certificate (Apple) or as a bare
/// public key (Google). Both forms are accepted.
#[derive(Clone, Debug)]
pub enum TrustAnchor {
    /// A root certificate added directly to the verification store.
    Certificate(X509),
    /// A root public key. Self-signed certificates carried in the chain become trusted roots
    /// only when their key equals this one.
    PublicKey(PKey<Public>),
}

impl TrustAnchor {
    /// Parses an anchor from PEM.
    ///
    /// Input starting with `-----BEGIN PUBLIC KEY-----` is read as a SubjectPublicKeyInfo, anything
    /// else as an X.509 certificate.
    pub fn from_pem(pem: &str) -> Result<Self> {
        let pem = pem.trim_start();

        if pem.starts_with(PUBLIC_KEY_PEM_LABEL) {
            let key = PKey::public_key_from_pem(pem.as_bytes())
                .foreign_err(|| Error::TrustAnchor)
                .ctx(|| "invalid PEM public key")?;
            return Ok(Self::PublicKey(key));
        }

        let certificate = X509::from_pem(pem.as_bytes())
            .foreign_err(|| Error::TrustAnchor)
            .ctx(|| "invalid PEM certificate")?;
        Ok(Self::Certificate(certificate))
    }

    /// Returns the anchor certificate, if the anchor was pinned as one.
    pub fn certificate(&self) -> Option<&X509> {
        match self {
            Self::Certificate(certificate) => Some(certificate),
            Self::PublicKey(_) => None,
        }
    }

    /// Returns the public key of the anchor.
    pub fn public_key(&self) -> Result<PKey<Public>> {
        match self {
            Self::Certificate(certificate) => certificate
                .public_key()
                .foreign_err(|| Error::TrustAnchor)
                .ctx(|| "anchor certificate has no usable public key"),
            Self::PublicKey(key) => Ok(key.clone()),
        }
    }

    /// Checks whether `key` is the anchor's public key.
    pub fn is_anchor_key(&self, key: &PKey<Public>) -> Result<bool> {
        public_keys_equal(&self.public_key()?, key)
    }
}

/// Compares two public keys by their DER encoded SubjectPublicKeyInfo, in constant time.
pub fn public_keys_equal(a: &PKey<Public>, b: &PKey<Public>) -> Result<bool> {
    let a = a
        .public_key_to_der()
        .foreign_err(|| Error::CertificateInvalid)?;
    let b = b
        .public_key_to_der()
        .foreign_err(|| Error::CertificateInvalid)?;

    // `memcmp::eq` panics on inputs of different length.
    if a.len() != b.len() {
        return Ok(false);
    }

    Ok(openssl::memcmp::eq(&a, &b))
}
