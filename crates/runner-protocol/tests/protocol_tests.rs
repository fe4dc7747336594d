//! Protocol layer tests — configuration validation, error taxonomy, shutdown wire messages.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use runner_protocol::*;
    use serde_json::json;

    // ─────────────────────────────────────────────────────────────────────
    // ServerConfig
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn config_defaults() {
        let config = ServerConfig::new("http://localhost:8080/").unwrap();
        assert_eq!(config.base_uri().as_str(), "http://localhost:8080/");
        assert_eq!(config.grace_period, Duration::from_secs(30));
        assert!(!config.open_browser);
        assert!(config.handle_ctrl_c);
        assert_eq!(config.shutdown.port, Some(DEFAULT_SHUTDOWN_PORT));
        assert_eq!(config.shutdown.token(), DEFAULT_SHUTDOWN_TOKEN);
    }

    #[test]
    fn config_appends_trailing_slash_to_path() {
        let config = ServerConfig::new("http://localhost:9000/api").unwrap();
        assert_eq!(config.base_path(), "/api/");
        assert_eq!(config.base_uri().as_str(), "http://localhost:9000/api/");
    }

    #[test]
    fn config_uses_default_http_port() {
        let config = ServerConfig::new("http://example.com/").unwrap();
        assert_eq!(config.port(), 80);
        assert_eq!(config.bind_host(), "example.com");
    }

    #[test]
    fn config_keeps_port_zero() {
        let config = ServerConfig::new("http://127.0.0.1:0/").unwrap();
        assert_eq!(config.port(), 0);
    }

    #[test]
    fn config_strips_ipv6_brackets_for_binding() {
        let config = ServerConfig::new("http://[::1]:8080/").unwrap();
        assert_eq!(config.bind_host(), "::1");
    }

    #[test]
    fn config_from_parts() {
        let config = ServerConfig::from_parts("localhost", 8181, "/tioga/").unwrap();
        assert_eq!(config.base_uri().as_str(), "http://localhost:8181/tioga/");

        let root = ServerConfig::from_parts("localhost", 8181, "").unwrap();
        assert_eq!(root.base_uri().as_str(), "http://localhost:8181/");

        let v6 = ServerConfig::from_parts("::1", 8181, "api").unwrap();
        assert_eq!(v6.base_uri().as_str(), "http://[::1]:8181/api/");
    }

    #[test]
    fn config_rejects_empty_host() {
        let err = ServerConfig::from_parts("  ", 8080, "").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn config_rejects_malformed_uri() {
        let err = ServerConfig::new("not a uri").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("malformed base URI"));
    }

    #[test]
    fn config_rejects_non_http_scheme() {
        for uri in ["https://localhost/", "ftp://localhost/", "file:///tmp/"] {
            let err = ServerConfig::new(uri).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Configuration, "{uri}");
        }
    }

    #[test]
    fn config_rejects_query_fragment_and_credentials() {
        assert!(ServerConfig::new("http://localhost/?a=1").is_err());
        assert!(ServerConfig::new("http://localhost/#top").is_err());
        assert!(ServerConfig::new("http://user:pw@localhost/").is_err());
    }

    #[test]
    fn config_builders() {
        let config = ServerConfig::new("http://localhost:8080/")
            .unwrap()
            .with_open_browser(true)
            .with_grace_period(Duration::from_secs(5))
            .with_shutdown_port(None)
            .with_ctrl_c(false);

        assert!(config.open_browser);
        assert_eq!(config.grace_period, Duration::from_secs(5));
        assert!(!config.shutdown.is_enabled());
        assert!(!config.handle_ctrl_c);
    }

    #[test]
    fn description_uri_sits_under_base_path() {
        let config = ServerConfig::new("http://localhost:8080/api").unwrap();
        assert_eq!(config.description_uri(), "http://localhost:8080/api/application.wadl");
    }

    // ─────────────────────────────────────────────────────────────────────
    // ShutdownConfig
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn shutdown_address() {
        let config = ShutdownConfig::default().with_port(Some(9005));
        assert_eq!(config.address().as_deref(), Some("127.0.0.1:9005"));

        let v6 = ShutdownConfig::default().with_host("::1").with_port(Some(9005));
        assert_eq!(v6.address().as_deref(), Some("[::1]:9005"));

        assert_eq!(ShutdownConfig::disabled().address(), None);
    }

    #[test]
    fn default_stop_timeout_outlasts_default_grace_period() {
        let config = ServerConfig::default();
        assert!(config.shutdown.stop_timeout > config.grace_period);
        assert!(DEFAULT_STOP_TIMEOUT > DEFAULT_GRACE_PERIOD);
    }

    #[test]
    fn shutdown_token_check() {
        let config = ShutdownConfig::default().with_token("s3cret");
        assert!(config.accepts_token("s3cret"));
        assert!(!config.accepts_token("SHUTDOWN"));
        assert!(!config.accepts_token(""));
    }

    #[test]
    fn shutdown_token_is_redacted_in_debug() {
        let config = ShutdownConfig::default().with_token("s3cret");
        let debug = format!("{config:?}");
        assert!(!debug.contains("s3cret"), "token leaked: {debug}");
    }

    // ─────────────────────────────────────────────────────────────────────
    // Errors
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn error_kinds_and_fatality() {
        let io = std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use");
        let startup = RunnerError::startup("127.0.0.1:8080", io);
        assert_eq!(startup.kind(), ErrorKind::Startup);
        assert!(startup.is_fatal());
        assert!(startup.to_string().contains("127.0.0.1:8080"));
        assert!(std::error::Error::source(&startup).is_some());

        assert!(RunnerError::configuration("x").is_fatal());
        assert!(!RunnerError::shutdown_signal("x").is_fatal());
        assert!(!RunnerError::browser_launch("x").is_fatal());
        assert_eq!(RunnerError::browser_launch("x").kind().as_str(), "browser-launch");
    }

    #[test]
    fn run_outcome_accessors() {
        assert!(!RunOutcome::Stopped.is_failure());
        let failed = RunOutcome::Failed(RunnerError::configuration("bad"));
        assert!(failed.is_failure());
        assert_eq!(failed.error().map(|e| e.kind()), Some(ErrorKind::Configuration));
    }

    #[test]
    fn server_state_display() {
        assert_eq!(ServerState::Running.to_string(), "running");
        assert!(ServerState::Running.is_running());
        assert!(!ServerState::Starting.is_running());
    }

    // ─────────────────────────────────────────────────────────────────────
    // Shutdown wire messages
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn request_wire_shape() {
        let line = ShutdownRequest::new("tok").to_line().unwrap();
        assert!(line.ends_with('\n'));
        let value: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(value, json!({ "command": "shutdown", "token": "tok" }));
    }

    #[test]
    fn response_wire_shapes() {
        let accepted: serde_json::Value =
            serde_json::from_str(ShutdownResponse::accepted().to_line().unwrap().trim_end()).unwrap();
        assert_eq!(accepted, json!({ "status": "accepted" }));

        let stopped: serde_json::Value =
            serde_json::from_str(ShutdownResponse::stopped().to_line().unwrap().trim_end()).unwrap();
        assert_eq!(stopped, json!({ "status": "stopped" }));

        let rejected: serde_json::Value =
            serde_json::from_str(ShutdownResponse::rejected("nope").to_line().unwrap().trim_end()).unwrap();
        assert_eq!(rejected, json!({ "status": "rejected", "reason": "nope" }));
    }

    #[test]
    fn encoded_lines_are_single_json_objects() {
        let lines = [
            ShutdownRequest::new("tok\nwith newline").to_line().unwrap(),
            ShutdownResponse::rejected("bad\nreason").to_line().unwrap(),
        ];
        for line in lines {
            assert!(line.len() > 1, "empty message line");
            assert_eq!(line.matches('\n').count(), 1, "{line:?}");
            assert!(serde_json::from_str::<serde_json::Value>(line.trim_end()).is_ok());
        }
    }

    #[test]
    fn unknown_command_does_not_parse() {
        let parsed = serde_json::from_value::<ShutdownRequest>(json!({
            "command": "reboot",
            "token": "tok",
        }));
        assert!(parsed.is_err());
    }
}
