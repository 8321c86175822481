use agent_cache::config::Config;
use agent_cache::logging::{ensure_log_error, init_logging};
use agent_cache::metrics::init_metrics;

// Installing the global logger can only happen once per process, so this is the only test in
// this binary.
#[test]
fn test_init_from_config() {
    let yaml = r#"
        logging:
          level: debug
          format: json
          enable_backtraces: false
        metrics:
          prefix: agent.cache
    "#;
    let config = Config::from_reader(yaml.as_bytes()).unwrap();
    assert!(!tracing::dispatcher::has_been_set());

    // SAFETY: backtraces are disabled, so the environment is not modified.
    unsafe { init_logging(&config) }.unwrap();
    init_metrics(&config.metrics).unwrap();
    assert!(tracing::dispatcher::has_been_set());

    let err = unsafe { init_logging(&config) }.unwrap_err();
    insta::assert_snapshot!(err.to_string(), @"failed to install the logger");
    ensure_log_error(&err);
}
