// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_support::{bytes_b64, credential_value};
use serde_json::json;

#[test]
fn converts_camel_case_transport_shape() {
    let cred = Credential::from_value(&credential_value(true)).unwrap();
    assert!(cred.is_paired());
    assert!(cred.is_restorable());
    assert_eq!(cred.phone_identity(), Some("15550001111@s.whatsapp.net"));
    assert_eq!(cred.registration_id, 4242);
    assert_eq!(cred.extra.get("platform"), Some(&json!("smba")));
}

#[test]
fn unpaired_credential_is_not_restorable() {
    let cred = Credential::from_value(&credential_value(false)).unwrap();
    assert!(!cred.is_paired());
    assert!(!cred.is_restorable());
    assert!(cred.device_identity.is_none());
}

#[test]
fn accepts_buffer_and_array_byte_shapes() {
    let mut value = credential_value(false);
    value["advSecretKey"] = json!({ "type": "Buffer", "data": vec![7u8; KEY_LEN] });
    value["noiseKey"]["public"] = json!(vec![1u8; KEY_LEN]);
    let cred = Credential::from_value(&value).unwrap();
    assert_eq!(cred.adv_secret_key, vec![7u8; KEY_LEN]);
    assert_eq!(cred.noise_key.public, vec![1u8; KEY_LEN]);
}

#[test]
fn rejects_truncated_key_material() {
    let mut value = credential_value(true);
    value["signedIdentityKey"]["private"] = json!(bytes_b64(5, 16));
    let err = Credential::from_value(&value).unwrap_err();
    assert_eq!(
        err,
        CredentialDefect::BadLength { field: "signed_identity_key", expected: KEY_LEN, actual: 16 }
    );
}

#[test]
fn rejects_missing_required_field() {
    let mut value = credential_value(true);
    value.as_object_mut().unwrap().remove("noiseKey");
    assert_eq!(Credential::from_value(&value).unwrap_err(), CredentialDefect::Missing("noise_key"));
}

#[test]
fn rejects_partial_device_identity() {
    let mut value = credential_value(true);
    value["account"].as_object_mut().unwrap().remove("deviceSignature");
    assert_eq!(
        Credential::from_value(&value).unwrap_err(),
        CredentialDefect::Missing("device_identity.device_signature")
    );
}

#[test]
fn rejects_non_object_and_future_versions() {
    assert_eq!(Credential::from_value(&json!("creds")).unwrap_err(), CredentialDefect::NotAnObject);
    let mut value = credential_value(true);
    value["schemaVersion"] = json!(9);
    assert_eq!(
        Credential::from_value(&value).unwrap_err(),
        CredentialDefect::UnsupportedVersion(9)
    );
}

#[test]
fn canonical_value_converts_back_to_the_same_credential() {
    let cred = Credential::from_value(&credential_value(true)).unwrap();
    let again = Credential::from_value(&cred.to_value()).unwrap();
    assert_eq!(again, cred);
}

#[test]
fn debug_output_omits_key_material() {
    let cred = Credential::from_value(&credential_value(true)).unwrap();
    let debug = format!("{cred:?}");
    assert!(!debug.contains(&bytes_b64(2, KEY_LEN)));
    assert!(debug.contains("paired: true"));
}

#[test]
fn decode_bytes_rejects_out_of_range_numbers() {
    assert_eq!(decode_bytes(&json!([1, 2, 300])), None);
    assert_eq!(decode_bytes(&json!(42)), None);
}
