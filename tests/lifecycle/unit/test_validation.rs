use std::sync::Arc;

use std::path::Path;

use chrono::Duration;
use meshcert::monitoring::{severity_for, AlertSeverity, SeverityThresholds};
use meshcert::pki::ca::CA_KEY_FILE;
use meshcert::pki::{
    validate_at, CertificateAuthority, CertificateBundle, KeyGenerator, ManualClock, ServiceType,
    ValidationReason,
};
use meshcert::rotation::LifecycleState;
use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose,
};
use zeroize::Zeroizing;

use crate::lifecycle::support::{ca_for, config_for, CachedKeys};

fn severity(bundle: &CertificateBundle, reason: ValidationReason, now: chrono::DateTime<chrono::Utc>) -> Option<AlertSeverity> {
    severity_for(bundle.days_until_expiry(now), reason, &SeverityThresholds::default())
}

#[test]
fn test_expiry_boundaries() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::starting_now());
    let ca = ca_for(&config_for(dir.path()), clock.clone());
    let bundle = ca.issue_certificate("redis", ServiceType::InternalService, &[]).unwrap();
    let threshold = Duration::days(30);
    let not_after = bundle.not_after();

    // One second past expiry
    let now = not_after + Duration::seconds(1);
    let result = validate_at(&bundle, ca.public(), now).unwrap();
    assert_eq!(result.reason, ValidationReason::Expired);
    assert!(!result.valid);
    assert_eq!(LifecycleState::classify(&bundle, now, threshold), LifecycleState::Expired);
    assert_eq!(severity(&bundle, result.reason, now), Some(AlertSeverity::Critical));

    // 29 days left: valid, but due for rotation
    let now = not_after - Duration::days(29);
    let result = validate_at(&bundle, ca.public(), now).unwrap();
    assert!(result.valid);
    assert_eq!(LifecycleState::classify(&bundle, now, threshold), LifecycleState::Warning);
    assert_eq!(severity(&bundle, result.reason, now), Some(AlertSeverity::Warning));

    // 31 days left: nothing to do
    let now = not_after - Duration::days(31);
    let result = validate_at(&bundle, ca.public(), now).unwrap();
    assert!(result.valid);
    assert_eq!(LifecycleState::classify(&bundle, now, threshold), LifecycleState::Fresh);
    assert_eq!(severity(&bundle, result.reason, now), None);

    // Inside the error threshold
    let now = not_after - Duration::days(5);
    assert_eq!(severity(&bundle, ValidationReason::Ok, now), Some(AlertSeverity::Error));

    // Part-days count as the whole days reported for the bundle
    let now = not_after - Duration::days(7) - Duration::hours(12);
    assert_eq!(bundle.days_until_expiry(now), 7);
    assert_eq!(severity(&bundle, ValidationReason::Ok, now), Some(AlertSeverity::Error));

    let now = not_after - Duration::days(30) - Duration::hours(12);
    assert_eq!(bundle.days_until_expiry(now), 30);
    assert_eq!(severity(&bundle, ValidationReason::Ok, now), Some(AlertSeverity::Warning));
}

#[test]
fn test_not_yet_valid() {
    let dir = tempfile::tempdir().unwrap();
    let ca = ca_for(&config_for(dir.path()), Arc::new(ManualClock::starting_now()));
    let bundle = ca.issue_certificate("redis", ServiceType::InternalService, &[]).unwrap();

    let now = bundle.not_before() - Duration::seconds(1);
    let result = validate_at(&bundle, ca.public(), now).unwrap();
    assert_eq!(result.reason, ValidationReason::NotYetValid);
    assert_eq!(severity(&bundle, result.reason, now), Some(AlertSeverity::Error));
}

#[test]
fn test_foreign_root_is_chain_mismatch() {
    let ours = tempfile::tempdir().unwrap();
    let theirs = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::starting_now());

    let ca = ca_for(&config_for(ours.path()), clock.clone());
    let mut foreign_config = config_for(theirs.path());
    foreign_config.ca.key_bits = 2048;
    let foreign = ca_for(&foreign_config, clock.clone());

    let bundle = foreign.issue_certificate("redis", ServiceType::InternalService, &[]).unwrap();
    let result = validate_at(&bundle, ca.public(), bundle.not_before()).unwrap();
    assert_eq!(result.reason, ValidationReason::ChainMismatch);
    assert!(result.reason.is_trust_failure());
    assert_eq!(severity(&bundle, result.reason, bundle.not_before()), Some(AlertSeverity::Critical));
}

#[test]
fn test_bundle_claimed_for_other_service_is_identity_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let ca = ca_for(&config_for(dir.path()), Arc::new(ManualClock::starting_now()));
    let bundle = ca.issue_certificate("postgres", ServiceType::InternalService, &[]).unwrap();

    let claimed = CertificateBundle::from_pem(
        "redis",
        bundle.cert_pem().to_string(),
        Zeroizing::new(bundle.key_pem().to_string()),
        bundle.ca_pem().to_string(),
    )
    .unwrap();
    let result = validate_at(&claimed, ca.public(), bundle.not_before()).unwrap();
    assert_eq!(result.reason, ValidationReason::IdentityMismatch);
}

#[test]
fn test_malformed_pem_is_serialization_error() {
    let err = CertificateBundle::from_pem(
        "redis",
        "-----BEGIN CERTIFICATE-----\nnot base64\n-----END CERTIFICATE-----\n".to_string(),
        Zeroizing::new(String::new()),
        String::new(),
    )
    .unwrap_err();
    assert!(matches!(err, meshcert::MeshCertError::Serialization { .. }));
}

/// A "redis" leaf signed with the root key in `ca_dir`, carrying only the
/// given usages.
fn leaf_with_usages(
    ca_dir: &Path,
    ca: &CertificateAuthority,
    key_usages: Vec<KeyUsagePurpose>,
    extended_key_usages: Vec<ExtendedKeyUsagePurpose>,
) -> CertificateBundle {
    let root_key = KeyPair::from_pem(&std::fs::read_to_string(ca_dir.join(CA_KEY_FILE)).unwrap()).unwrap();
    let issuer = CertificateParams::from_ca_cert_pem(ca.public().cert_pem())
        .unwrap()
        .self_signed(&root_key)
        .unwrap();

    let leaf_key_pem = CachedKeys.generate_rsa(2048).unwrap();
    let leaf_key = KeyPair::from_pem(&leaf_key_pem).unwrap();
    let mut params = CertificateParams::new(vec!["redis".to_string()]).unwrap();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, "redis");
    params.distinguished_name = dn;
    params.is_ca = IsCa::ExplicitNoCa;
    params.key_usages = key_usages;
    params.extended_key_usages = extended_key_usages;
    let cert = params.signed_by(&leaf_key, &issuer, &root_key).unwrap();

    CertificateBundle::from_pem("redis", cert.pem(), leaf_key_pem, ca.public().cert_pem().to_string()).unwrap()
}

#[test]
fn test_leaf_without_client_auth_is_extension_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(dir.path());
    let ca = ca_for(&config, Arc::new(ManualClock::starting_now()));
    let now = chrono::Utc::now();

    let bundle = leaf_with_usages(
        &config.ca.dir,
        &ca,
        vec![KeyUsagePurpose::DigitalSignature, KeyUsagePurpose::KeyEncipherment],
        vec![ExtendedKeyUsagePurpose::ServerAuth],
    );
    let result = validate_at(&bundle, ca.public(), now).unwrap();
    assert!(!result.valid);
    assert_eq!(result.reason, ValidationReason::ExtensionMismatch);
    assert!(result.detail.unwrap().contains("clientAuth"));
    assert_eq!(severity(&bundle, result.reason, now), Some(AlertSeverity::Critical));
}

#[test]
fn test_leaf_without_key_encipherment_is_extension_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(dir.path());
    let ca = ca_for(&config, Arc::new(ManualClock::starting_now()));
    let now = chrono::Utc::now();

    let bundle = leaf_with_usages(
        &config.ca.dir,
        &ca,
        vec![KeyUsagePurpose::DigitalSignature],
        vec![ExtendedKeyUsagePurpose::ServerAuth, ExtendedKeyUsagePurpose::ClientAuth],
    );
    let result = validate_at(&bundle, ca.public(), now).unwrap();
    assert_eq!(result.reason, ValidationReason::ExtensionMismatch);
    assert!(result.detail.unwrap().contains("keyEncipherment"));
    assert_eq!(severity(&bundle, result.reason, now), Some(AlertSeverity::Critical));

    // The same leaf with the full usage set passes.
    let complete = leaf_with_usages(
        &config.ca.dir,
        &ca,
        vec![KeyUsagePurpose::DigitalSignature, KeyUsagePurpose::KeyEncipherment],
        vec![ExtendedKeyUsagePurpose::ServerAuth, ExtendedKeyUsagePurpose::ClientAuth],
    );
    assert!(validate_at(&complete, ca.public(), now).unwrap().valid);
}
