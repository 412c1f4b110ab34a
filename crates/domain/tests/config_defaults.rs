use pm_domain::config::{BackendChoice, Config, ConfigSeverity, ServerMode};

#[test]
fn default_host_is_localhost() {
    let config = Config::default();
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.server.port, 4747);
}

#[test]
fn full_document_parses() {
    let toml_str = r#"
[server]
host = "0.0.0.0"
port = 9000
mode = "multi_tenant"

[server.cors]
allowed_origins = ["https://app.example.com"]

[store]
backend = "sqlite"
path = "/var/lib/pinmark/store.db"
event_retention_days = 14

[stream]
keep_alive_secs = 10
replay_limit = 50
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.server.mode, ServerMode::MultiTenant);
    assert_eq!(config.server.cors.allowed_origins, vec!["https://app.example.com"]);
    assert_eq!(config.store.backend, BackendChoice::Sqlite);
    assert_eq!(config.store.event_retention_days, 14);
    assert_eq!(config.stream.keep_alive_secs, 10);
    assert_eq!(config.stream.replay_limit, 50);
    assert!(config.validate().is_empty());
}

#[test]
fn default_cors_admits_any_origin() {
    let config = Config::default();
    assert_eq!(config.server.cors.allowed_origins, vec!["*"]);
    assert!(config.validate().is_empty());
}

#[test]
fn wildcard_cors_warns_only_when_multi_tenant() {
    let mut config = Config::default();
    config.server.mode = ServerMode::MultiTenant;
    config.store.backend = BackendChoice::Sqlite;
    let issues = config.validate();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].field, "server.cors.allowed_origins");
    assert_eq!(issues[0].severity, ConfigSeverity::Warning);

    config.server.cors.allowed_origins = vec!["http://localhost:*".into()];
    assert!(config.validate().is_empty());
}

#[test]
fn unknown_backend_is_rejected() {
    let toml_str = r#"
[store]
backend = "postgres"
"#;
    assert!(toml::from_str::<Config>(toml_str).is_err());
}

#[test]
fn stream_defaults() {
    let config = Config::default();
    assert_eq!(config.stream.keep_alive_secs, 30);
    assert_eq!(config.stream.replay_limit, 1000);
    assert_eq!(config.stream.buffer, 256);
}

#[test]
fn zero_stream_buffer_is_an_error() {
    let mut config = Config::default();
    config.stream.buffer = 0;
    assert!(config
        .validate()
        .iter()
        .any(|e| e.field == "stream.buffer" && e.severity == ConfigSeverity::Error));
}
