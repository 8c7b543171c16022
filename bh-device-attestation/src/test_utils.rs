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

//! Fixtures producing attestation statements bound to freshly generated test roots.
//!
//! Do NOT use this module for production code, but only tests.

use bh_jws_utils::{base64_std_encode, public_key_tag, Es256Signer};
use bhx5chain::{Builder, CustomExtension, TrustAnchor};
use ciborium::Value;
use openssl::{
    ec::{EcGroup, EcKey},
    nid::Nid,
    pkey::{PKey, Public},
    x509::X509,
};

use crate::{
    android::{KEY_DESCRIPTION_OID, PROVISIONING_INFO_OID},
    apple::{expected_nonce, NONCE_OID},
    AttestationFormat, AttestationStatement, AttestationVerifier,
};

/// Minimal DER encoders for the attestation extensions.
pub mod der {
    /// Encodes a tag-length-value triple.
    pub fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
        let mut encoded = vec![tag];
        if content.len() < 0x80 {
            encoded.push(content.len() as u8);
        } else {
            let length = content.len().to_be_bytes();
            let start = length.iter().position(|byte| *byte != 0).unwrap();
            encoded.push(0x80 | (length.len() - start) as u8);
            encoded.extend_from_slice(&length[start..]);
        }
        encoded.extend_from_slice(content);
        encoded
    }

    /// `SEQUENCE` of already encoded elements.
    pub fn sequence(elements: &[Vec<u8>]) -> Vec<u8> {
        tlv(0x30, &elements.concat())
    }

    /// `OCTET STRING`.
    pub fn octet_string(bytes: &[u8]) -> Vec<u8> {
        tlv(0x04, bytes)
    }

    /// Small non-negative `INTEGER`.
    pub fn integer(value: u8) -> Vec<u8> {
        if value < 0x80 {
            tlv(0x02, &[value])
        } else {
            tlv(0x02, &[0, value])
        }
    }

    /// Small `ENUMERATED`.
    pub fn enumerated(value: u8) -> Vec<u8> {
        tlv(0x0a, &[value])
    }

    /// Context-specific explicitly tagged value, for tags below 31.
    pub fn explicit(tag: u8, content: &[u8]) -> Vec<u8> {
        tlv(0xa0 | tag, content)
    }

    /// Android `KeyDescription` with empty authorization lists.
    pub fn key_description(challenge: &[u8], security_level: u8) -> Vec<u8> {
        sequence(&[
            integer(4),
            enumerated(security_level),
            integer(4),
            enumerated(security_level),
            octet_string(challenge),
            octet_string(&[]),
            sequence(&[]),
            sequence(&[]),
        ])
    }

    /// Apple credential certificate nonce extension.
    pub fn apple_nonce(nonce: &[u8]) -> Vec<u8> {
        sequence(&[explicit(1, &octet_string(nonce))])
    }
}

/// CBOR encoded Android provisioning information with the given `certsIssued` counter.
pub fn provisioning_info(certs_issued: u32) -> Vec<u8> {
    let value = Value::Map(vec![(
        Value::Integer(1.into()),
        Value::Integer(certs_issued.into()),
    )]);
    let mut bytes = Vec::new();
    ciborium::into_writer(&value, &mut bytes).unwrap();
    bytes
}

/// A device holding a hardware key.
pub struct TestDevice {
    signer: Es256Signer,
    public_key: PKey<Public>,
    hardware_key_tag: String,
}

impl TestDevice {
    /// Generates a P-256 key. The JWK `kid` of the signer is the hardware key tag.
    pub fn generate() -> Self {
        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
        let private_key = EcKey::generate(&group).unwrap();
        let public_key = PKey::from_ec_key(
            EcKey::from_public_key(&group, private_key.public_key()).unwrap(),
        )
        .unwrap();
        let hardware_key_tag = base64_std_encode(public_key_tag(&public_key).unwrap());
        let signer = Es256Signer::from_private_key_pem(
            hardware_key_tag.clone(),
            &private_key.private_key_to_pem().unwrap(),
        )
        .unwrap();

        Self {
            signer,
            public_key,
            hardware_key_tag,
        }
    }

    /// The signer of the hardware key.
    pub fn signer(&self) -> &Es256Signer {
        &self.signer
    }

    /// The public hardware key.
    pub fn public_key(&self) -> &PKey<Public> {
        &self.public_key
    }

    /// Standard base64 of the SHA-256 digest of the uncompressed public point.
    pub fn hardware_key_tag(&self) -> &str {
        &self.hardware_key_tag
    }
}

/// Knobs of a generated Android statement.
#[derive(Debug, Clone)]
pub struct AndroidOptions {
    /// Challenge placed in the key description.
    pub challenge: Vec<u8>,
    /// Whether the issuing intermediate carries the StrongBox marker.
    pub strongbox: bool,
    /// Whether the leaf carries the key description extension.
    pub key_description: bool,
    /// Raw provisioning information extension value, if any.
    pub provisioning_info: Option<Vec<u8>>,
}

impl AndroidOptions {
    /// A StrongBox attestation of `challenge` without provisioning information.
    pub fn new(challenge: &[u8]) -> Self {
        Self {
            challenge: challenge.to_vec(),
            strongbox: true,
            key_description: true,
            provisioning_info: None,
        }
    }
}

/// Test stand-ins for the Google and Apple attestation authorities.
pub struct TestAuthorities {
    android_root: Builder,
    apple_root: Builder,
}

impl TestAuthorities {
    /// Generates both roots.
    pub fn generate() -> Self {
        Self {
            android_root: Builder::self_signed_root("Test Key Attestation Root").unwrap(),
            apple_root: Builder::self_signed_root("Test App Attestation Root CA").unwrap(),
        }
    }

    /// The Android root, pinned by public key like the production one.
    pub fn android_anchor(&self) -> TrustAnchor {
        TrustAnchor::from_pem(&self.android_root.public_key_pem().unwrap()).unwrap()
    }

    /// The Apple root, pinned by certificate like the production one.
    pub fn apple_anchor(&self) -> TrustAnchor {
        let pem = self.apple_root.certificate().to_pem().unwrap();
        TrustAnchor::from_pem(std::str::from_utf8(&pem).unwrap()).unwrap()
    }

    /// A verifier trusting these authorities.
    pub fn verifier(&self) -> AttestationVerifier {
        AttestationVerifier::with_roots(self.android_anchor(), self.apple_anchor())
    }

    /// Issues an Android certificate chain, leaf first.
    pub fn android_chain(&self, device: &TestDevice, options: &AndroidOptions) -> Vec<X509> {
        let marker = if options.strongbox { "StrongBox" } else { "TEE" };
        let intermediate = self
            .android_root
            .issue_intermediate(&[
                ("O", "Google LLC"),
                ("title", marker),
                ("CN", "Droid CA3"),
            ])
            .unwrap();

        let mut extensions = Vec::new();
        if options.key_description {
            let security_level = if options.strongbox { 2 } else { 1 };
            extensions.push(CustomExtension::new(
                KEY_DESCRIPTION_OID,
                der::key_description(&options.challenge, security_level),
            ));
        }
        if let Some(provisioning_info) = &options.provisioning_info {
            extensions.push(CustomExtension::new(
                PROVISIONING_INFO_OID,
                provisioning_info.clone(),
            ));
        }

        let leaf = intermediate
            .issue_leaf(
                device.public_key(),
                &[("CN", "Android Keystore Key")],
                &extensions,
            )
            .unwrap();

        vec![
            leaf,
            intermediate.certificate().clone(),
            self.android_root.certificate().clone(),
        ]
    }

    /// A base64url encoded Android statement.
    pub fn android_statement(&self, device: &TestDevice, options: &AndroidOptions) -> String {
        encode(AttestationStatement::new(
            AttestationFormat::Android,
            to_der(self.android_chain(device, options)),
        ))
    }

    /// A base64url encoded Apple statement whose nonce binds `auth_data` and `challenge`.
    pub fn apple_statement(
        &self,
        device: &TestDevice,
        auth_data: &[u8],
        challenge: &[u8],
    ) -> String {
        self.apple_statement_with_nonce(device, auth_data, &expected_nonce(auth_data, challenge))
    }

    /// A base64url encoded Apple statement carrying an arbitrary `nonce`.
    pub fn apple_statement_with_nonce(
        &self,
        device: &TestDevice,
        auth_data: &[u8],
        nonce: &[u8],
    ) -> String {
        let intermediate = self
            .apple_root
            .issue_intermediate(&[("CN", "Test App Attestation CA 1"), ("O", "Apple Inc.")])
            .unwrap();
        let leaf = intermediate
            .issue_leaf(
                device.public_key(),
                &[("CN", "credential"), ("OU", "AAA Certification")],
                &[CustomExtension::new(NONCE_OID, der::apple_nonce(nonce))],
            )
            .unwrap();

        encode(
            AttestationStatement::new(
                AttestationFormat::Apple,
                to_der(vec![leaf, intermediate.certificate().clone()]),
            )
            .with_receipt(b"receipt".to_vec())
            .with_auth_data(auth_data.to_vec()),
        )
    }
}

fn to_der(chain: Vec<X509>) -> Vec<Vec<u8>> {
    chain
        .into_iter()
        .map(|certificate| certificate.to_der().unwrap())
        .collect()
}

fn encode(statement: AttestationStatement) -> String {
    statement.to_base64url().unwrap()
}
