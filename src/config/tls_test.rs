use crate::Error;
use crate::TlsOptions;

#[test]
fn test_load_reports_the_unreadable_path() {
    let options = TlsOptions {
        ca_file: "/nonexistent/ca.pem".to_string(),
        cert_file: "/nonexistent/client.pem".to_string(),
        key_file: "/nonexistent/client.key".to_string(),
    };

    let err = options.load().err().expect("unreadable material must fail");
    match err {
        Error::CredentialLoad { path, .. } => assert_eq!(path, "/nonexistent/ca.pem"),
        other => panic!("expected credential load error, got {other}"),
    }
}

#[test]
fn test_load_accepts_readable_material() {
    let certified =
        rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).expect("self-signed");
    let dir = tempfile::tempdir().expect("tempdir");

    let ca_file = dir.path().join("ca.pem");
    let cert_file = dir.path().join("client.pem");
    let key_file = dir.path().join("client.key");
    std::fs::write(&ca_file, certified.cert.pem()).expect("write ca");
    std::fs::write(&cert_file, certified.cert.pem()).expect("write cert");
    std::fs::write(&key_file, certified.key_pair.serialize_pem()).expect("write key");

    let options = TlsOptions {
        ca_file: ca_file.to_string_lossy().into_owned(),
        cert_file: cert_file.to_string_lossy().into_owned(),
        key_file: key_file.to_string_lossy().into_owned(),
    };
    assert!(options.load().is_ok());
}
