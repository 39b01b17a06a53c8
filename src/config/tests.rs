use super::*;

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.server.public_port = Some(4000);
    raw.logging.level = Some("info".to_string());
    raw.cache.cache_expiration = Some(60);

    let overrides = ServeOverrides {
        public_port: Some(4321),
        log_level: Some("debug".to_string()),
        cache_expiration: Some(900),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.public_addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert_eq!(settings.cache.expiration_seconds, Some(900));
}

#[test]
fn defaults_are_a_working_deployment() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.server.public_addr.port(), DEFAULT_PUBLIC_PORT);
    assert_eq!(settings.server.admin_addr.port(), DEFAULT_ADMIN_PORT);
    assert_eq!(settings.upstream.origin.as_str(), "http://127.0.0.1:3000/");
    assert_eq!(settings.upstream.timeout, Duration::from_secs(30));
    assert!(settings.cache.enabled);
    assert_eq!(settings.cache.expiration_seconds, None);
    assert_eq!(settings.cache.default_scheme, "http");
    assert_eq!(settings.storage.backend, StorageBackend::Memory);
    assert_eq!(settings.storage.container, "pages");
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = ServeOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn not_found_duration_accepts_legacy_key() {
    let raw: RawSettings = Config::builder()
        .add_source(File::from_str(
            "[cache]\n404_duration = 45\ncache_exclusions = \"example.com/cart\"\n",
            config::FileFormat::Toml,
        ))
        .build()
        .expect("config")
        .try_deserialize()
        .expect("raw settings");

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.cache.not_found_expiration_seconds, Some(45));
    assert_eq!(settings.cache.exclusions, "example.com/cart");
}

fn raw_from_toml(source: &str) -> RawSettings {
    Config::builder()
        .add_source(File::from_str(source, config::FileFormat::Toml))
        .build()
        .expect("config")
        .try_deserialize()
        .expect("raw settings")
}

#[test]
fn documented_cache_keys_are_applied() {
    let raw = raw_from_toml(
        "[cache]\nenabled = true\ncache_expiration = 120\nnot_found_expiration = 30\n\
         cache_exclusions = \"example.com/cart, example.com/checkout\"\n",
    );

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.cache.expiration_seconds, Some(120));
    assert_eq!(settings.cache.not_found_expiration_seconds, Some(30));
    assert_eq!(
        settings.cache.exclusions,
        "example.com/cart, example.com/checkout"
    );
}

#[test]
fn shipped_default_file_loads() {
    let raw = raw_from_toml(include_str!("../../config/default.toml"));

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.cache.expiration_seconds, Some(300));
    assert_eq!(settings.cache.not_found_expiration_seconds, Some(300));
    assert_eq!(settings.cache.max_body_bytes, 8 * 1024 * 1024);
}

#[test]
fn upstream_scheme_flows_into_cache_config() {
    let mut raw = RawSettings::default();
    raw.upstream.default_scheme = Some("HTTPS".to_string());
    raw.upstream.trust_forwarded_proto = Some(true);

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.cache.default_scheme, "https");
    assert!(settings.cache.trust_forwarded_proto);
}

fn assert_invalid(expected_key: &str, mutate: impl FnOnce(&mut RawSettings)) {
    let mut raw = RawSettings::default();
    mutate(&mut raw);
    match Settings::from_raw(raw) {
        Err(LoadError::Invalid { key, .. }) => assert_eq!(key, expected_key),
        other => panic!("expected invalid `{expected_key}`, got {other:?}"),
    }
}

#[test]
fn rejects_invalid_values() {
    assert_invalid("server.public_port", |raw| raw.server.public_port = Some(0));
    assert_invalid("server.admin_port", |raw| {
        raw.server.admin_port = Some(DEFAULT_PUBLIC_PORT)
    });
    assert_invalid("logging.level", |raw| {
        raw.logging.level = Some("loud".to_string())
    });
    assert_invalid("upstream.origin", |raw| {
        raw.upstream.origin = Some("ftp://origin".to_string())
    });
    assert_invalid("upstream.default_scheme", |raw| {
        raw.upstream.default_scheme = Some("gopher".to_string())
    });
    assert_invalid("cache.store_timeout_ms", |raw| {
        raw.cache.store_timeout_ms = Some(0)
    });
    assert_invalid("cache.max_body_bytes", |raw| raw.cache.max_body_bytes = Some(0));
    assert_invalid("storage.backend", |raw| {
        raw.storage.backend = Some("s3".to_string())
    });
    assert_invalid("storage.container", |raw| {
        raw.storage.container = Some("../pages".to_string())
    });
}

#[test]
fn filesystem_backend_is_selectable() {
    let mut raw = RawSettings::default();
    let overrides = ServeOverrides {
        storage_backend: Some("filesystem".to_string()),
        storage_directory: Some(PathBuf::from("/var/lib/blobcache")),
        storage_account_name: Some("blog".to_string()),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.storage.backend, StorageBackend::Filesystem);
    assert_eq!(settings.storage.directory, PathBuf::from("/var/lib/blobcache"));
    assert_eq!(settings.storage.account_name, "blog");
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["blobcache"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn parse_serve_overrides() {
    let args = CliArgs::parse_from([
        "blobcache",
        "serve",
        "--server-host",
        "0.0.0.0",
        "--upstream-origin",
        "http://origin:9000",
        "--cache-enabled",
        "false",
    ]);

    match args.command.expect("serve command") {
        Command::Serve(serve) => {
            assert_eq!(serve.overrides.server_host.as_deref(), Some("0.0.0.0"));
            assert_eq!(
                serve.overrides.upstream_origin.as_deref(),
                Some("http://origin:9000")
            );
            assert_eq!(serve.overrides.cache_enabled, Some(false));
        }
    }
}
