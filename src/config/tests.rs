use std::io::Write;

use super::*;

fn raw_with_site() -> RawSettings {
    let mut raw = RawSettings::default();
    raw.site.key = Some("superot".to_string());
    raw
}

#[test]
fn site_key_is_required() {
    let err = Settings::from_raw(RawSettings::default()).expect_err("missing site key");
    assert!(matches!(err, LoadError::Invalid { key: "site.key", .. }));
}

#[test]
fn defaults_match_documented_values() {
    let settings = Settings::from_raw(raw_with_site()).expect("valid settings");

    assert_eq!(settings.server.addr.port(), DEFAULT_PORT);
    assert_eq!(settings.logging.level, LevelFilter::INFO);
    assert!(!settings.varnish.enabled);
    assert!(!settings.varnish.debug);
    assert!(settings.varnish.targets.is_empty());
    assert_eq!(settings.varnish.timeout, Duration::from_millis(5_000));
    assert_eq!(settings.ttl.default_ttl(), 86_400);
    assert_eq!(settings.ttl.policy(), TtlPolicy::FirstMatch);
    assert_eq!(settings.ttl.lookup("weather"), Some(3_600));
    assert_eq!(settings.ttl.lookup("auto_focus_topics_random"), Some(1_800));
    assert_eq!(settings.session.cookie_name, None);
    assert_eq!(settings.session.logout_path, "/varnish-logout");
    assert_eq!(settings.invalidation.events.len(), 5);
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = raw_with_site();
    raw.server.port = Some(4000);
    raw.varnish.targets = Some(vec!["file:80".to_string()]);
    raw.logging.level = Some("info".to_string());

    let overrides = ServeOverrides {
        server_port: Some(4321),
        log_level: Some("debug".to_string()),
        varnish: VarnishOverrides {
            targets: vec!["cli-a:6081".to_string(), "cli-b:6081".to_string()],
            ..Default::default()
        },
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    let targets: Vec<&str> = settings.varnish.targets.iter().map(PurgeTarget::as_str).collect();
    assert_eq!(targets, ["cli-a:6081", "cli-b:6081"]);
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = raw_with_site();
    let overrides = ServeOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn protection_requires_cdn_endpoint() {
    let mut raw = raw_with_site();
    raw.varnish.protection = Some(true);
    let err = Settings::from_raw(raw.clone()).expect_err("missing endpoint");
    assert!(matches!(err, LoadError::Invalid { key: "varnish.cdn_endpoint", .. }));

    raw.varnish.cdn_endpoint = Some("cdn.example.net:80".to_string());
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert!(settings.varnish.protection);
}

#[test]
fn targets_with_scheme_are_rejected() {
    let mut raw = raw_with_site();
    raw.varnish.targets = Some(vec!["http://cache:80".to_string()]);
    let err = Settings::from_raw(raw).expect_err("invalid target");
    assert!(matches!(err, LoadError::Invalid { key: "varnish.targets", .. }));
}

#[test]
fn configured_layouts_extend_builtin_table() {
    let mut raw = raw_with_site();
    raw.ttl.default_seconds = Some(600);
    raw.ttl.layouts = Some(BTreeMap::from([
        ("weather".to_string(), 60),
        ("gallery".to_string(), 120),
    ]));
    raw.ttl.random_layouts = Some(vec!["gallery".to_string()]);
    raw.ttl.policy = Some("minimum".to_string());

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.ttl.default_ttl(), 600);
    assert_eq!(settings.ttl.lookup("weather"), Some(60));
    assert_eq!(settings.ttl.lookup("gallery"), Some(120));
    assert_eq!(settings.ttl.lookup("infolive"), Some(600));
    assert_eq!(settings.ttl.policy(), TtlPolicy::Minimum);
}

#[test]
fn unknown_event_names_are_rejected() {
    let mut raw = raw_with_site();
    raw.invalidation.events = Some(vec!["saved".to_string(), "archived".to_string()]);
    let err = Settings::from_raw(raw).expect_err("unknown event");
    assert!(matches!(err, LoadError::Invalid { key: "invalidation.events", .. }));
}

#[test]
fn file_configuration_is_loaded() {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("tmp file");
    write!(
        file,
        r#"
[site]
key = "superot"
home_url = "https://www.example.org/"

[varnish]
enabled = true
targets = ["10.0.0.1:6081", "10.0.0.2:6081"]

[ttl.layouts]
weather = 900

[session]
cookie_name = "vc_session"
"#
    )
    .expect("write config");

    let args = CliArgs::parse_from([
        "varnish-xkey",
        "--config-file",
        file.path().to_str().expect("utf-8 path"),
        "purge",
        "superot_1",
    ]);
    let settings = load(&args).expect("settings");

    assert!(settings.varnish.enabled);
    assert_eq!(settings.varnish.targets.len(), 2);
    assert_eq!(settings.ttl.lookup("weather"), Some(900));
    assert_eq!(settings.session.cookie_name.as_deref(), Some("vc_session"));
    assert_eq!(settings.session.home_url.as_str(), "https://www.example.org/");
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["varnish-xkey"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn parse_purge_arguments() {
    let args = CliArgs::parse_from([
        "varnish-xkey",
        "purge",
        "--varnish-target",
        "a:80,b:80",
        "--varnish-timeout-ms",
        "250",
        "superot_42",
    ]);

    match args.command.expect("purge command") {
        Command::Purge(purge) => {
            assert_eq!(purge.tag, "superot_42");
            assert_eq!(purge.varnish.targets, ["a:80", "b:80"]);
            assert_eq!(purge.varnish.timeout_ms, Some(250));
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_flush_arguments() {
    let args = CliArgs::parse_from(["varnish-xkey", "flush", "--site-key", "other"]);

    match args.command.expect("flush command") {
        Command::Flush(flush) => {
            assert_eq!(flush.content_id, None);
            assert_eq!(flush.varnish.site_key.as_deref(), Some("other"));
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_ttl_arguments() {
    let args = CliArgs::parse_from([
        "varnish-xkey",
        "ttl",
        "--ttl-policy",
        "minimum",
        "/tmp/item.json",
    ]);

    match args.command.expect("ttl command") {
        Command::Ttl(ttl) => {
            assert_eq!(ttl.policy.as_deref(), Some("minimum"));
            assert_eq!(ttl.file, std::path::Path::new("/tmp/item.json"));
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_serve_overrides() {
    let args = CliArgs::parse_from([
        "varnish-xkey",
        "serve",
        "--server-host",
        "0.0.0.0",
        "--varnish-enabled=true",
        "--site-key",
        "superot",
    ]);

    match args.command.expect("serve command") {
        Command::Serve(serve) => {
            assert_eq!(serve.overrides.server_host.as_deref(), Some("0.0.0.0"));
            assert_eq!(serve.overrides.varnish_enabled, Some(true));
            assert_eq!(serve.overrides.varnish.site_key.as_deref(), Some("superot"));
        }
        _ => panic!("wrong command parsed"),
    }
}
