use composerd::auth_config::AuthConfig;
use composerd::error::ManifestError;
use composerd::projects_toml::ProjectsToml;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_read_manifest_from_disk() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("composer.toml");
    fs::write(
        &path,
        r#"
[projects.docs]
endpoint = "http://localhost:7860/api/v1/mcp/project/docs"

[projects.docs.auth]
auth_type = "oauth"
oauth_host = "localhost"
oauth_port = 9000
oauth_server_url = "http://localhost:9000"
oauth_auth_url = "https://idp.example.com/authorize"
oauth_token_url = "https://idp.example.com/token"
oauth_client_id = "client"
oauth_client_secret = "secret"

[projects.open]
endpoint = "http://localhost:7860/api/v1/mcp/project/open"
auth = { auth_type = "none", host = "127.0.0.1", port = "9100" }
"#,
    )
    .unwrap();

    let manifest = ProjectsToml::read(&path).unwrap();
    assert_eq!(manifest.path.as_deref(), Some(path.as_path()));
    assert_eq!(manifest.projects.len(), 2);

    let docs = manifest.projects["docs"].auth.as_ref().unwrap();
    assert!(docs.is_oauth());
    docs.validate().unwrap();
    assert_eq!(
        docs.bind_address().unwrap(),
        ("localhost".to_string(), 9000)
    );
    assert_eq!(docs.server_url(), Some("http://localhost:9000"));

    let open = manifest.projects["open"].auth.as_ref().unwrap();
    assert!(matches!(open, AuthConfig::None { .. }));
    assert_eq!(open.bind_address().unwrap().1, 9100);
    assert!(open.env_vars().is_empty());
}

#[test]
fn test_missing_manifest() {
    let dir = TempDir::new().unwrap();
    let err = ProjectsToml::read(&dir.path().join("composer.toml")).unwrap_err();
    assert!(matches!(err, ManifestError::ReadError { .. }), "{err:?}");
}

#[test]
fn test_invalid_toml() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("composer.toml");
    fs::write(&path, "[projects.docs\nendpoint = ").unwrap();
    let err = ProjectsToml::read(&path).unwrap_err();
    assert!(matches!(err, ManifestError::ParseError { .. }), "{err:?}");
}
