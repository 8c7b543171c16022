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

use bh_jws_utils::{base64_std_decode, public_key_tag, public_key_to_pem};
use bherror::{
    traits::{ErrorContext as _, ForeignError as _, PropagateError as _},
    Error,
};
use bhx5chain::{TrustAnchor, X5Chain};
use openssl::{
    memcmp,
    pkey::{Id, PKey, Public},
    x509::X509,
};
use serde::Serialize;

use crate::{
    roots::{ANDROID_ATTESTATION_ROOT, APPLE_APP_ATTESTATION_ROOT},
    AndroidVerifier, AppleVerifier, AttestationError, AttestationFormat, AttestationStatement,
    Result,
};

/// Verification of a single vendor format.
pub trait PlatformVerifier {
    /// Verifies `statement` at `now` (seconds since the Unix epoch).
    ///
    /// `challenge` is the value the statement must be bound to, and `hardware_key_tag` the
    /// standard base64 SHA-256 digest of the raw EC point of the attested key.
    fn verify(
        &self,
        statement: &AttestationStatement,
        challenge: &[u8],
        hardware_key_tag: &str,
        now: u64,
    ) -> Result<VerifiedAttestation>;
}

/// The platform of an attested device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    /// Android key attestation.
    Android,
    /// Apple App Attest.
    Ios,
}

impl DeviceType {
    /// The wire name of the device type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Android => "android",
            Self::Ios => "ios",
        }
    }
}

/// The result of a successful attestation verification.
///
/// Only constructed once every check has passed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedAttestation {
    device_type: DeviceType,
    hardware_key_tag: String,
    public_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    certs_issued: Option<u32>,
}

impl VerifiedAttestation {
    pub(crate) fn new(
        device_type: DeviceType,
        hardware_key_tag: &str,
        public_key: &PKey<Public>,
        certs_issued: Option<u32>,
    ) -> Result<Self> {
        let public_key =
            public_key_to_pem(public_key).with_err(|| AttestationError::CryptoBackend)?;

        Ok(Self {
            device_type,
            hardware_key_tag: hardware_key_tag.to_owned(),
            public_key,
            certs_issued,
        })
    }

    /// The platform of the device.
    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    /// The verified hardware key tag.
    pub fn hardware_key_tag(&self) -> &str {
        &self.hardware_key_tag
    }

    /// The attested public key in PEM (SubjectPublicKeyInfo) format.
    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    /// The provisioning counter of Android devices.
    pub fn certs_issued(&self) -> Option<u32> {
        self.certs_issued
    }
}

/// Verifies attestation statements of any supported format.
///
/// The format is read from the statement itself and the matching [`PlatformVerifier`] is
/// selected.
#[derive(Debug, Clone)]
pub struct AttestationVerifier {
    android: AndroidVerifier,
    apple: AppleVerifier,
}

impl AttestationVerifier {
    /// Creates a verifier trusting the production Google and Apple attestation roots.
    pub fn with_pinned_roots() -> Result<Self> {
        let android_root = TrustAnchor::from_pem(ANDROID_ATTESTATION_ROOT)
            .with_err(|| AttestationError::CryptoBackend)
            .ctx(|| "pinned Android root")?;
        let apple_root = TrustAnchor::from_pem(APPLE_APP_ATTESTATION_ROOT)
            .with_err(|| AttestationError::CryptoBackend)
            .ctx(|| "pinned Apple root")?;

        Ok(Self::with_roots(android_root, apple_root))
    }

    /// Creates a verifier trusting the given roots.
    pub fn with_roots(android_root: TrustAnchor, apple_root: TrustAnchor) -> Self {
        Self {
            android: AndroidVerifier::new(android_root),
            apple: AppleVerifier::new(apple_root),
        }
    }

    /// Decodes a base64url encoded statement and verifies it.
    ///
    /// See [`PlatformVerifier::verify`] for the meaning of the arguments.
    pub fn verify(
        &self,
        statement: &str,
        challenge: &[u8],
        hardware_key_tag: &str,
        now: u64,
    ) -> Result<VerifiedAttestation> {
        let statement = AttestationStatement::from_base64url(statement)?;

        self.verify_statement(&statement, challenge, hardware_key_tag, now)
    }

    /// Verifies an already decoded statement.
    pub fn verify_statement(
        &self,
        statement: &AttestationStatement,
        challenge: &[u8],
        hardware_key_tag: &str,
        now: u64,
    ) -> Result<VerifiedAttestation> {
        let verifier: &dyn PlatformVerifier = match statement.format() {
            AttestationFormat::Android => &self.android,
            AttestationFormat::Apple => &self.apple,
        };

        let verified = verifier.verify(statement, challenge, hardware_key_tag, now)?;
        log::debug!(
            "Verified {} attestation of key {}",
            verified.device_type().as_str(),
            verified.hardware_key_tag()
        );

        Ok(verified)
    }
}

pub(crate) fn verify_chain(x5c: &[Vec<u8>], anchor: &TrustAnchor, now: u64) -> Result<X5Chain> {
    X5Chain::verify(x5c, anchor, now).with_err(|| AttestationError::CertificateInvalid)
}

/// Returns the raw value of the `oid` extension of `certificate`, if present.
pub(crate) fn find_extension(certificate: &X509, oid: &str) -> Result<Option<Vec<u8>>> {
    let der = certificate
        .to_der()
        .foreign_err(|| AttestationError::CertificateInvalid)?;
    let (_, parsed) = x509_parser::parse_x509_certificate(&der)
        .foreign_err(|| AttestationError::CertificateInvalid)?;

    Ok(parsed
        .extensions()
        .iter()
        .find(|extension| extension.oid.to_id_string() == oid)
        .map(|extension| extension.value.to_vec()))
}

/// Fails with [`AttestationError::KeyTagMismatch`] unless `hardware_key_tag` is the standard
/// base64 SHA-256 digest of the uncompressed EC point of `public_key`.
pub(crate) fn check_key_tag(public_key: &PKey<Public>, hardware_key_tag: &str) -> Result<()> {
    if public_key.id() != Id::EC {
        return Err(Error::root(AttestationError::UnsupportedKeyType));
    }

    let expected = public_key_tag(public_key).with_err(|| AttestationError::CryptoBackend)?;
    let claimed = base64_std_decode(hardware_key_tag)
        .foreign_err(|| AttestationError::KeyTagMismatch)
        .ctx(|| "hardware key tag is not base64")?;

    if claimed.len() != expected.len() || !memcmp::eq(&claimed, &expected) {
        return Err(Error::root(AttestationError::KeyTagMismatch));
    }

    Ok(())
}
