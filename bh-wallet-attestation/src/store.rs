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

//! Collaborators owning wallet instances and identity sessions.

use std::future::Future;

use bh_device_attestation::DeviceType;
use serde::{Deserialize, Serialize};

use crate::ANONYMOUS;

/// A natural person a wallet instance is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    /// Personal code.
    pub code: String,
    /// Given name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    /// Family name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
    /// Code of the person that requested the instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requester_code: Option<String>,
}

impl Person {
    /// The person bound to instances registered without an identity session.
    pub fn anonymous() -> Self {
        Self {
            code: ANONYMOUS.to_owned(),
            given_name: None,
            family_name: None,
            requester_code: Some(ANONYMOUS.to_owned()),
        }
    }

    /// Whether this is the [anonymous](Self::anonymous) person.
    pub fn is_anonymous(&self) -> bool {
        self.code == ANONYMOUS
    }
}

/// A wallet instance to be persisted after a successful device attestation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceRegistration {
    /// Standard base64 SHA-256 digest of the attested public point.
    pub hardware_key_tag: String,
    /// The attested public key in PEM format.
    pub public_key: String,
    /// Platform of the device.
    pub device_type: DeviceType,
    /// Android provisioning counter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certs_issued: Option<u32>,
    /// The person the instance is bound to.
    pub person: Person,
}

/// A registered wallet instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletInstance {
    /// Store identifier of the instance.
    pub id: String,
    /// Lifecycle status, owned by the store.
    pub status: String,
    /// The hardware key tag the instance is keyed by.
    pub hardware_key_tag: String,
    /// The person the instance is bound to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub person: Option<Person>,
}

/// The registered public key of a wallet instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceKey {
    /// The attested public key in PEM format.
    pub public_key: String,
    /// The person the instance is bound to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub person: Option<Person>,
}

/// Persistent storage of wallet instances, keyed by hardware key tag.
pub trait WalletStore: Send + Sync {
    /// The error type returned by the store.
    type Err: std::error::Error + Send + Sync + 'static;

    /// Persists a new wallet instance.
    fn create_instance(
        &self,
        registration: InstanceRegistration,
    ) -> impl Future<Output = Result<WalletInstance, Self::Err>> + Send;

    /// Looks up the public key registered for `hardware_key_tag`.
    fn instance_key(
        &self,
        hardware_key_tag: &str,
    ) -> impl Future<Output = Result<Option<InstanceKey>, Self::Err>> + Send;

    /// Looks up the instance registered for `hardware_key_tag`.
    fn instance_by_tag(
        &self,
        hardware_key_tag: &str,
    ) -> impl Future<Output = Result<Option<WalletInstance>, Self::Err>> + Send;
}

/// Resolves identity sessions to persons.
pub trait IdentityResolver: Send + Sync {
    /// The error type returned by the resolver.
    type Err: std::error::Error + Send + Sync + 'static;

    /// Returns the person authenticated by `bearer_token`.
    fn person(&self, bearer_token: &str) -> impl Future<Output = Result<Person, Self::Err>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_person_is_its_own_requester() {
        let person = Person::anonymous();

        assert!(person.is_anonymous());
        assert_eq!(
            serde_json::to_value(&person).unwrap(),
            serde_json::json!({ "code": "anonymous", "requesterCode": "anonymous" })
        );
    }

    #[test]
    fn registration_serializes_in_camel_case() {
        let registration = InstanceRegistration {
            hardware_key_tag: "tag".to_owned(),
            public_key: "pem".to_owned(),
            device_type: DeviceType::Android,
            certs_issued: Some(2),
            person: Person {
                code: "010101-12345".to_owned(),
                given_name: Some("Jane".to_owned()),
                family_name: None,
                requester_code: None,
            },
        };

        assert_eq!(
            serde_json::to_value(&registration).unwrap(),
            serde_json::json!({
                "hardwareKeyTag": "tag",
                "publicKey": "pem",
                "deviceType": "android",
                "certsIssued": 2,
                "person": { "code": "010101-12345", "givenName": "Jane" },
            })
        );
    }

    #[test]
    fn instance_deserializes_without_person() {
        let instance: WalletInstance = serde_json::from_value(serde_json::json!({
            "id": "1",
            "status": "active",
            "hardwareKeyTag": "tag",
        }))
        .unwrap();

        assert_eq!(instance.person, None);
    }
}
