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

use std::time::{SystemTime, UNIX_EPOCH};

use bh_device_attestation::{
    test_utils::{provisioning_info, AndroidOptions, TestAuthorities, TestDevice},
    AttestationError, DeviceType, Rejection,
};
use bh_jws_utils::{base64_url_encode, public_key_from_pem};
use ciborium::Value;

const CHALLENGE: &[u8] = b"sha256 of the redeemed nonce....";
const AUTH_DATA: &[u8] = b"authenticator data of the app attest key";

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

#[test]
fn strongbox_android_attestation_is_verified() {
    let authorities = TestAuthorities::generate();
    let device = TestDevice::generate();
    let statement = authorities.android_statement(&device, &AndroidOptions::new(CHALLENGE));

    let verified = authorities
        .verifier()
        .verify(&statement, CHALLENGE, device.hardware_key_tag(), now())
        .unwrap();

    assert_eq!(verified.device_type(), DeviceType::Android);
    assert_eq!(verified.hardware_key_tag(), device.hardware_key_tag());
    assert_eq!(verified.certs_issued(), Some(0));
    let public_key = public_key_from_pem(verified.public_key()).unwrap();
    assert!(public_key.public_eq(device.public_key()));
}

#[test]
fn provisioning_counter_is_reported() {
    let authorities = TestAuthorities::generate();
    let device = TestDevice::generate();
    let options = AndroidOptions {
        provisioning_info: Some(provisioning_info(3)),
        ..AndroidOptions::new(CHALLENGE)
    };
    let statement = authorities.android_statement(&device, &options);

    let verified = authorities
        .verifier()
        .verify(&statement, CHALLENGE, device.hardware_key_tag(), now())
        .unwrap();

    assert_eq!(verified.certs_issued(), Some(3));
}

#[test]
fn android_failures_are_reported_per_check() {
    let authorities = TestAuthorities::generate();
    let device = TestDevice::generate();
    let other_device = TestDevice::generate();
    let verifier = authorities.verifier();

    let cases = [
        (
            AndroidOptions::new(b"another challenge"),
            device.hardware_key_tag(),
            AttestationError::ChallengeMismatch,
        ),
        (
            AndroidOptions {
                strongbox: false,
                ..AndroidOptions::new(CHALLENGE)
            },
            device.hardware_key_tag(),
            AttestationError::InsecureHardware,
        ),
        (
            AndroidOptions {
                key_description: false,
                ..AndroidOptions::new(CHALLENGE)
            },
            device.hardware_key_tag(),
            AttestationError::ExtensionMissing,
        ),
        (
            AndroidOptions {
                provisioning_info: Some(vec![0x81]),
                ..AndroidOptions::new(CHALLENGE)
            },
            device.hardware_key_tag(),
            AttestationError::ExtensionInvalid,
        ),
        (
            AndroidOptions::new(CHALLENGE),
            other_device.hardware_key_tag(),
            AttestationError::KeyTagMismatch,
        ),
    ];

    for (options, hardware_key_tag, expected) in cases {
        let statement = authorities.android_statement(&device, &options);

        let err = verifier
            .verify(&statement, CHALLENGE, hardware_key_tag, now())
            .unwrap_err();

        assert_eq!(err.error, expected);
    }
}

#[test]
fn insecure_hardware_is_rejected_even_with_matching_challenge_and_tag() {
    let authorities = TestAuthorities::generate();
    let device = TestDevice::generate();
    let options = AndroidOptions {
        strongbox: false,
        ..AndroidOptions::new(CHALLENGE)
    };
    let statement = authorities.android_statement(&device, &options);

    let err = authorities
        .verifier()
        .verify(&statement, CHALLENGE, device.hardware_key_tag(), now())
        .unwrap_err();

    assert_eq!(
        err.error.rejection(),
        Rejection {
            field: "certificate",
            reason: "insecure"
        }
    );
}

#[test]
fn statement_from_foreign_authority_is_rejected() {
    let authorities = TestAuthorities::generate();
    let foreign = TestAuthorities::generate();
    let device = TestDevice::generate();
    let options = AndroidOptions::new(CHALLENGE);

    let android = foreign.android_statement(&device, &options);
    let apple = foreign.apple_statement(&device, AUTH_DATA, CHALLENGE);

    for statement in [android, apple] {
        let err = authorities
            .verifier()
            .verify(&statement, CHALLENGE, device.hardware_key_tag(), now())
            .unwrap_err();

        assert_eq!(err.error, AttestationError::CertificateInvalid);
    }
}

#[test]
fn statement_is_rejected_after_the_chain_expires() {
    let authorities = TestAuthorities::generate();
    let device = TestDevice::generate();
    let statement = authorities.android_statement(&device, &AndroidOptions::new(CHALLENGE));
    let in_eleven_years = now() + 11 * 365 * 24 * 60 * 60;

    let err = authorities
        .verifier()
        .verify(&statement, CHALLENGE, device.hardware_key_tag(), in_eleven_years)
        .unwrap_err();

    assert_eq!(err.error, AttestationError::CertificateInvalid);
}

#[test]
fn apple_attestation_is_verified() {
    let authorities = TestAuthorities::generate();
    let device = TestDevice::generate();
    let statement = authorities.apple_statement(&device, AUTH_DATA, CHALLENGE);

    let verified = authorities
        .verifier()
        .verify(&statement, CHALLENGE, device.hardware_key_tag(), now())
        .unwrap();

    assert_eq!(verified.device_type(), DeviceType::Ios);
    assert_eq!(verified.certs_issued(), None);
    let public_key = public_key_from_pem(verified.public_key()).unwrap();
    assert!(public_key.public_eq(device.public_key()));
}

#[test]
fn apple_nonce_must_bind_the_challenge() {
    let authorities = TestAuthorities::generate();
    let device = TestDevice::generate();
    let verifier = authorities.verifier();

    let other_challenge = authorities.apple_statement(&device, AUTH_DATA, b"other challenge");
    let raw_challenge = authorities.apple_statement_with_nonce(&device, AUTH_DATA, CHALLENGE);

    for statement in [other_challenge, raw_challenge] {
        let err = verifier
            .verify(&statement, CHALLENGE, device.hardware_key_tag(), now())
            .unwrap_err();

        assert_eq!(err.error, AttestationError::ChallengeMismatch);
    }
}

#[test]
fn apple_key_tag_must_match() {
    let authorities = TestAuthorities::generate();
    let device = TestDevice::generate();
    let statement = authorities.apple_statement(&device, AUTH_DATA, CHALLENGE);

    let err = authorities
        .verifier()
        .verify(
            &statement,
            CHALLENGE,
            TestDevice::generate().hardware_key_tag(),
            now(),
        )
        .unwrap_err();

    assert_eq!(err.error, AttestationError::KeyTagMismatch);
}

#[test]
fn unknown_format_is_unsupported() {
    let authorities = TestAuthorities::generate();
    let object = Value::Map(vec![
        (Value::Text("fmt".into()), Value::Text("packed".into())),
        (Value::Text("attStmt".into()), Value::Map(vec![])),
    ]);
    let mut bytes = Vec::new();
    ciborium::into_writer(&object, &mut bytes).unwrap();

    let err = authorities
        .verifier()
        .verify(&base64_url_encode(bytes), CHALLENGE, "", now())
        .unwrap_err();

    assert_eq!(
        err.error,
        AttestationError::UnsupportedFormat("packed".to_owned())
    );
    assert_eq!(err.error.rejection().reason, "unsupported");
}

#[test]
fn garbage_statement_is_a_decoding_error() {
    let authorities = TestAuthorities::generate();

    let err = authorities
        .verifier()
        .verify("bm90IGNib3I", CHALLENGE, "", now())
        .unwrap_err();

    assert_eq!(
        err.error.rejection(),
        Rejection {
            field: "key_attestation",
            reason: "invalid"
        }
    );
}
