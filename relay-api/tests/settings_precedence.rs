//! TOML file < `SPRINT_`-prefixed env < CLI flags, in that precedence order.

use std::io::Write;
use std::net::{IpAddr, Ipv4Addr};

use clap::Parser;
use relay_api::settings::{Options, Settings};

#[test]
fn defaults_apply_with_no_file_or_env() {
    let settings = Settings::load(None).expect("defaults alone must deserialize");
    assert_eq!(settings.api_port, 8080);
    assert_eq!(settings.ws_port, 8082);
    assert_eq!(settings.api_host, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
}

#[test]
fn file_sets_a_value_env_overrides_it_cli_overrides_both() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "api_port = 7000\nmetrics_port = 7001").unwrap();

    // File alone.
    let settings = Settings::load(Some(file.path())).unwrap();
    assert_eq!(settings.api_port, 7000);
    assert_eq!(settings.metrics_port, 7001);

    // Env beats the file for api_port, leaves metrics_port from the file.
    std::env::set_var("SPRINT_API_PORT", "7500");
    let settings = Settings::load(Some(file.path())).unwrap();
    std::env::remove_var("SPRINT_API_PORT");
    assert_eq!(settings.api_port, 7500);
    assert_eq!(settings.metrics_port, 7001);

    // CLI beats both the file and the env layer.
    let opts = Options::parse_from(["relay-server", "--api-port", "7999"]);
    let settings = opts.apply(settings);
    assert_eq!(settings.api_port, 7999);
    assert_eq!(settings.metrics_port, 7001, "cli flag left unset must not disturb other fields");
}
