use super::*;

fn minimal() -> RawSettings {
    let mut raw = RawSettings::default();
    raw.upstream.server = Some("https://git.example.org/".to_string());
    raw.pages.domain = Some("Pages.Example.org".to_string());
    raw
}

#[test]
fn defaults_apply_to_minimal_settings() {
    let settings = Settings::from_raw(minimal()).expect("valid settings");

    assert_eq!(settings.server.addr.port(), DEFAULT_PORT);
    assert_eq!(settings.upstream.server.as_str(), "https://git.example.org/");
    assert_eq!(settings.upstream.page_size.get(), DEFAULT_PAGE_SIZE);
    assert!(settings.upstream.timeout.is_none());
    assert_eq!(settings.pages.domain, ".pages.example.org");
    assert_eq!(settings.pages.branch, "gh-pages");
    assert!(settings.pages.root.is_empty());
    assert_eq!(settings.cache.refresh, Duration::from_secs(60));
    assert_eq!(settings.cache.timeout, Duration::from_secs(180));
    assert_eq!(settings.cache.max_file_size, 3 * 1024 * 1024);
    assert!(settings.redirect.is_none());
    assert!(settings.headers.is_empty());
}

#[test]
fn upstream_server_and_domain_are_required() {
    let mut raw = minimal();
    raw.upstream.server = None;
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "upstream.server",
            ..
        })
    ));

    let mut raw = minimal();
    raw.pages.domain = Some("  ".to_string());
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "pages.domain",
            ..
        })
    ));
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = minimal();
    raw.server.port = Some(4000);
    raw.logging.level = Some("info".to_string());

    let overrides = ServeOverrides {
        server_port: Some(4321),
        log_level: Some("debug".to_string()),
        pages_branch: Some("pages".to_string()),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert_eq!(settings.pages.branch, "pages");
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = minimal();
    let overrides = ServeOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn redirect_code_must_be_a_redirection() {
    let mut raw = minimal();
    raw.redirect.enabled = Some(true);
    let settings = Settings::from_raw(raw.clone()).expect("valid settings");
    let redirect = settings.redirect.expect("redirect enabled");
    assert_eq!(redirect.scheme, "https");
    assert_eq!(redirect.status, StatusCode::FOUND);

    raw.redirect.code = Some(200);
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "redirect.code",
            ..
        })
    ));
}

#[test]
fn refresh_must_not_outlive_timeout() {
    let mut raw = minimal();
    raw.cache.refresh_seconds = Some(600);
    raw.cache.timeout_seconds = Some(60);
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "cache.timeout_seconds",
            ..
        })
    ));
}

#[test]
fn custom_headers_are_validated() {
    let mut raw = minimal();
    raw.headers
        .insert("X-Frame-Options".to_string(), "DENY".to_string());
    let settings = Settings::from_raw(raw.clone()).expect("valid settings");
    assert_eq!(
        settings.headers.get("x-frame-options").map(|v| v.as_bytes()),
        Some(&b"DENY"[..])
    );

    raw.headers.insert("bad header".to_string(), "x".to_string());
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn error_page_keys_are_statuses_or_classes() {
    let mut raw = minimal();
    raw.errors.insert("404".to_string(), PathBuf::from("404.html"));
    raw.errors.insert("50X".to_string(), PathBuf::from("50x.html"));
    let settings = Settings::from_raw(raw.clone()).expect("valid settings");
    assert!(settings.errors.pages.contains_key("404"));
    assert!(settings.errors.pages.contains_key("50x"));

    raw.errors.insert("200".to_string(), PathBuf::from("ok.html"));
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn root_is_normalized_to_leading_slash() {
    let mut raw = minimal();
    raw.pages.root = Some("docs/site/".to_string());
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.pages.root, "/docs/site");
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["forge-pages"]);
    assert!(args.command.is_none());
}

#[test]
fn parse_serve_overrides() {
    let args = CliArgs::parse_from([
        "forge-pages",
        "serve",
        "--server-port",
        "9000",
        "--pages-domain",
        "pages.example.org",
        "--upstream-server",
        "https://git.example.org",
        "--log-json",
        "true",
    ]);

    match args.command.expect("serve command") {
        Command::Serve(serve) => {
            assert_eq!(serve.overrides.server_port, Some(9000));
            assert_eq!(
                serve.overrides.pages_domain.as_deref(),
                Some("pages.example.org")
            );
            assert_eq!(
                serve.overrides.upstream.upstream_server.as_deref(),
                Some("https://git.example.org")
            );
            assert_eq!(serve.overrides.log_json, Some(true));
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_check_arguments() {
    let args = CliArgs::parse_from([
        "forge-pages",
        "check",
        "--upstream-server",
        "https://git.example.org",
    ]);

    match args.command.expect("check command") {
        Command::Check(check) => assert_eq!(
            check.upstream.upstream_server.as_deref(),
            Some("https://git.example.org")
        ),
        _ => panic!("wrong command parsed"),
    }
}
