use tnet_sentry::{Auth, Dsn, PROTOCOL_VERSION};

#[test]
fn auth_to_dsn() {
    let url = "https://username@domain:8888/23";
    let dsn = url.parse::<Dsn>().unwrap();
    let auth = dsn.to_auth(Some("tnet-sentry/1.0"));
    assert_eq!(auth.client_agent(), Some("tnet-sentry/1.0"));
    assert_eq!(auth.version(), PROTOCOL_VERSION);
    assert_eq!(auth.public_key(), "username");

    let reparsed: Auth = auth.to_string().parse().unwrap();
    assert_eq!(reparsed, auth);
}

#[test]
fn auth_without_agent() {
    let dsn: Dsn = "https://public@o1.ingest.sentry.io/42".parse().unwrap();
    assert_eq!(
        dsn.to_auth(None).to_string(),
        "Sentry sentry_key=public, sentry_version=7"
    );
}
