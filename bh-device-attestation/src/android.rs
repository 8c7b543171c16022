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

//! Android hardware-backed key attestation.
//!
//! See <https://developer.android.com/privacy-and-security/security-key-attestation>.

use bherror::{
    traits::{ErrorContext as _, ForeignError as _, PropagateError as _},
    Error,
};
use bhx5chain::{TrustAnchor, X5Chain};
use ciborium::Value;
use openssl::nid::Nid;
use x509_parser::der_parser::{error::BerError, parse_der};

use crate::{
    verifier::{check_key_tag, find_extension, verify_chain, PlatformVerifier},
    AttestationError, AttestationStatement, DeviceType, Result, VerifiedAttestation,
};

/// OID of the key description extension.
pub const KEY_DESCRIPTION_OID: &str = "1.3.6.1.4.1.11129.2.1.17";

/// OID of the provisioning information extension.
pub const PROVISIONING_INFO_OID: &str = "1.3.6.1.4.1.11129.2.1.30";

/// Subject attribute value marking a StrongBox attestation authority.
const STRONGBOX: &[u8] = b"StrongBox";

/// Subject attributes which may carry the [`STRONGBOX`] marker.
const STRONGBOX_ATTRIBUTES: [Nid; 3] = [
    Nid::ORGANIZATIONNAME,
    Nid::ORGANIZATIONALUNITNAME,
    Nid::TITLE,
];

/// Number of fields of the `KeyDescription` sequence.
const KEY_DESCRIPTION_FIELDS: usize = 8;

/// Key of the `certsIssued` entry of the provisioning information map.
const CERTS_ISSUED_KEY: i128 = 1;

/// Security level of the Keymaster or KeyMint implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityLevel {
    /// The key lives in the Android system.
    Software,
    /// The key lives in a Trusted Execution Environment.
    TrustedEnvironment,
    /// The key lives in a discrete secure element.
    StrongBox,
}

impl SecurityLevel {
    fn from_asn1(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Software),
            1 => Some(Self::TrustedEnvironment),
            2 => Some(Self::StrongBox),
            _ => None,
        }
    }
}

/// The decoded `KeyDescription` attestation extension.
///
/// Only the leading fields are decoded. The authorization lists must be present but are not
/// interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDescription {
    attestation_version: u32,
    attestation_security_level: SecurityLevel,
    keymaster_version: u32,
    keymaster_security_level: SecurityLevel,
    attestation_challenge: Vec<u8>,
    unique_id: Vec<u8>,
}

impl KeyDescription {
    /// Decodes the DER encoded extension value.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        parse_key_description(der)
            .foreign_err(|| AttestationError::ExtensionInvalid)
            .ctx(|| "malformed key description")
    }

    /// The attestation format version.
    pub fn attestation_version(&self) -> u32 {
        self.attestation_version
    }

    /// Where the attestation was produced.
    pub fn attestation_security_level(&self) -> SecurityLevel {
        self.attestation_security_level
    }

    /// The Keymaster or KeyMint version.
    pub fn keymaster_version(&self) -> u32 {
        self.keymaster_version
    }

    /// Where the attested key lives.
    pub fn keymaster_security_level(&self) -> SecurityLevel {
        self.keymaster_security_level
    }

    /// The challenge supplied when the key was generated.
    pub fn attestation_challenge(&self) -> &[u8] {
        &self.attestation_challenge
    }

    /// The privacy-sensitive device identifier, usually empty.
    pub fn unique_id(&self) -> &[u8] {
        &self.unique_id
    }
}

fn parse_key_description(der: &[u8]) -> std::result::Result<KeyDescription, BerError> {
    let (_, parsed) = parse_der(der)?;
    let fields = parsed.as_sequence()?;
    if fields.len() != KEY_DESCRIPTION_FIELDS {
        return Err(BerError::InvalidLength);
    }

    let field = |index: usize| fields.get(index).ok_or(BerError::InvalidLength);
    let security_level = |index: usize| {
        SecurityLevel::from_asn1(field(index)?.as_u32()?).ok_or(BerError::BerValueError)
    };

    // authorization lists
    field(6)?.as_sequence()?;
    field(7)?.as_sequence()?;

    Ok(KeyDescription {
        attestation_version: field(0)?.as_u32()?,
        attestation_security_level: security_level(1)?,
        keymaster_version: field(2)?.as_u32()?,
        keymaster_security_level: security_level(3)?,
        attestation_challenge: field(4)?.as_slice()?.to_vec(),
        unique_id: field(5)?.as_slice()?.to_vec(),
    })
}

/// Reads the `certsIssued` counter of the CBOR encoded provisioning information.
///
/// A map without the counter yields zero.
pub fn certs_issued(provisioning_info: &[u8]) -> Result<u32> {
    let value: Value = ciborium::from_reader(provisioning_info)
        .foreign_err(|| AttestationError::ExtensionInvalid)
        .ctx(|| "provisioning info is not CBOR")?;
    let entries = value.into_map().map_err(|_| {
        Error::root(AttestationError::ExtensionInvalid).ctx("provisioning info must be a map")
    })?;

    let counter = entries.into_iter().find_map(|(key, value)| {
        key.as_integer()
            .is_some_and(|key| i128::from(key) == CERTS_ISSUED_KEY)
            .then_some(value)
    });

    match counter {
        None => Ok(0),
        Some(Value::Integer(count)) => u32::try_from(count)
            .foreign_err(|| AttestationError::ExtensionInvalid)
            .ctx(|| "`certsIssued` is out of range"),
        Some(_) => Err(Error::root(AttestationError::ExtensionInvalid)
            .ctx("`certsIssued` must be an integer")),
    }
}

/// Fails with [`AttestationError::InsecureHardware`] unless an intermediate issuing the leaf
/// carries the StrongBox marker in its subject.
fn check_strongbox(chain: &X5Chain) -> Result<()> {
    let leaf_issuer = chain
        .leaf_certificate()
        .issuer_name()
        .to_der()
        .foreign_err(|| AttestationError::CryptoBackend)?;

    for intermediate in chain.intermediates() {
        let subject = intermediate.subject_name();
        if subject
            .to_der()
            .foreign_err(|| AttestationError::CryptoBackend)?
            != leaf_issuer
        {
            continue;
        }

        let marked = subject.entries().any(|entry| {
            STRONGBOX_ATTRIBUTES.contains(&entry.object().nid())
                && entry.data().as_slice() == STRONGBOX
        });
        if marked {
            return Ok(());
        }
    }

    Err(Error::root(AttestationError::InsecureHardware))
}

/// Verifies Android key attestation statements against a pinned root.
#[derive(Debug, Clone)]
pub struct AndroidVerifier {
    root: TrustAnchor,
}

impl AndroidVerifier {
    /// Creates a verifier trusting `root`.
    pub fn new(root: TrustAnchor) -> Self {
        Self { root }
    }
}

impl PlatformVerifier for AndroidVerifier {
    fn verify(
        &self,
        statement: &AttestationStatement,
        challenge: &[u8],
        hardware_key_tag: &str,
        now: u64,
    ) -> Result<VerifiedAttestation> {
        let chain = verify_chain(statement.x5c(), &self.root, now)?;

        check_strongbox(&chain)?;

        let leaf = chain.leaf_certificate();
        let key_description = find_extension(leaf, KEY_DESCRIPTION_OID)?
            .ok_or_else(|| Error::root(AttestationError::ExtensionMissing))
            .ctx(|| format!("leaf certificate lacks {KEY_DESCRIPTION_OID}"))?;
        let key_description = KeyDescription::from_der(&key_description)?;

        if key_description.attestation_challenge() != challenge {
            return Err(Error::root(AttestationError::ChallengeMismatch));
        }

        let public_key = chain
            .leaf_certificate_key()
            .with_err(|| AttestationError::CertificateInvalid)?;
        check_key_tag(&public_key, hardware_key_tag)?;

        let certs_issued = match find_extension(leaf, PROVISIONING_INFO_OID)? {
            Some(provisioning_info) => certs_issued(&provisioning_info)?,
            None => 0,
        };

        VerifiedAttestation::new(
            DeviceType::Android,
            hardware_key_tag,
            &public_key,
            Some(certs_issued),
        )
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::test_utils::{der, provisioning_info};

    #[test]
    fn key_description_is_decoded() {
        let extension = der::key_description(b"challenge", 2);

        let description = KeyDescription::from_der(&extension).unwrap();

        assert_eq!(description.attestation_version(), 4);
        assert_eq!(
            description.attestation_security_level(),
            SecurityLevel::StrongBox
        );
        assert_eq!(
            description.keymaster_security_level(),
            SecurityLevel::StrongBox
        );
        assert_eq!(description.keymaster_version(), 4);
        assert_eq!(description.attestation_challenge(), b"challenge");
        assert!(description.unique_id().is_empty());
    }

    #[test]
    fn key_description_with_long_challenge_is_decoded() {
        let challenge = vec![0xab; 300];
        let extension = der::key_description(&challenge, 1);

        let description = KeyDescription::from_der(&extension).unwrap();

        assert_eq!(description.attestation_challenge(), challenge.as_slice());
        assert_eq!(
            description.attestation_security_level(),
            SecurityLevel::TrustedEnvironment
        );
    }

    #[test]
    fn truncated_key_description_is_invalid() {
        let truncated = der::sequence(&[
            der::integer(4),
            der::enumerated(2),
            der::integer(4),
            der::enumerated(2),
            der::octet_string(b"challenge"),
        ]);

        let err = KeyDescription::from_der(&truncated).unwrap_err();

        assert_eq!(err.error, AttestationError::ExtensionInvalid);
    }

    #[test]
    fn unknown_security_level_is_invalid() {
        let err = KeyDescription::from_der(&der::key_description(b"challenge", 7)).unwrap_err();

        assert_eq!(err.error, AttestationError::ExtensionInvalid);
    }

    #[test]
    fn certs_issued_is_read_from_key_one() {
        assert_eq!(certs_issued(&provisioning_info(17)).unwrap(), 17);
    }

    #[test]
    fn provisioning_info_without_counter_counts_zero() {
        let mut bytes = Vec::new();
        ciborium::into_writer(
            &Value::Map(vec![(Value::Integer(2.into()), Value::Integer(5.into()))]),
            &mut bytes,
        )
        .unwrap();

        assert_eq!(certs_issued(&bytes).unwrap(), 0);
    }

    #[test]
    fn malformed_provisioning_info_is_invalid() {
        let mut not_a_map = Vec::new();
        ciborium::into_writer(&Value::Array(vec![]), &mut not_a_map).unwrap();
        let mut text_counter = Vec::new();
        ciborium::into_writer(
            &Value::Map(vec![(Value::Integer(1.into()), Value::Text("one".into()))]),
            &mut text_counter,
        )
        .unwrap();
        let mut negative_counter = Vec::new();
        ciborium::into_writer(
            &Value::Map(vec![(Value::Integer(1.into()), Value::Integer((-1).into()))]),
            &mut negative_counter,
        )
        .unwrap();

        for bytes in [not_a_map, text_counter, negative_counter, vec![0xff]] {
            assert_matches!(
                certs_issued(&bytes),
                Err(err) if err.error == AttestationError::ExtensionInvalid
            );
        }
    }
}
