//! Inference API key loading: keychain first, then `SWITCHBOARD_LLM_API_KEY`.
//!
//! The keychain service `agent-switchboard` is absent in test
//! environments, so these tests exercise the env-var fallback. They mutate
//! process-global env vars and run serially.

use agent_switchboard::config::GlobalConfig;

const ENV_KEY: &str = "SWITCHBOARD_LLM_API_KEY";

fn make_config() -> (tempfile::TempDir, GlobalConfig) {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path().to_str().expect("utf8 path").replace('\\', "/");
    let toml = format!(
        r#"
data_dir = '{root}/data'
inbox_dir = '{root}/inbox'
outbox_dirs = ['{root}/outbox']
processed_dir = '{root}/processed'
mailbox_root = '{root}/mailboxes'

[routing]
escalation_worker = "reasoner"

[[worker]]
name = "reasoner"
"#
    );
    let config = GlobalConfig::from_toml_str(&toml).expect("config parses");
    (temp, config)
}

#[tokio::test]
#[serial_test::serial]
async fn env_var_supplies_api_key() {
    let (_temp, mut config) = make_config();
    std::env::set_var(ENV_KEY, "sk-test-key");

    let result = config.load_credentials().await;
    std::env::remove_var(ENV_KEY);

    assert!(result.is_ok(), "load_credentials should fall back to env");
    assert_eq!(config.classifier.api_key, "sk-test-key");
}

#[tokio::test]
#[serial_test::serial]
async fn missing_key_names_both_sources() {
    let (_temp, mut config) = make_config();
    std::env::remove_var(ENV_KEY);

    let err = config
        .load_credentials()
        .await
        .expect_err("no credential source exists");
    let msg = err.to_string();
    assert!(msg.contains("llm_api_key"), "names the keychain entry: {msg}");
    assert!(msg.contains(ENV_KEY), "names the env var: {msg}");
    assert!(config.classifier.api_key.is_empty());
}

#[tokio::test]
#[serial_test::serial]
async fn blank_env_var_counts_as_missing() {
    let (_temp, mut config) = make_config();
    std::env::set_var(ENV_KEY, "   ");

    let result = config.load_credentials().await;
    std::env::remove_var(ENV_KEY);

    assert!(result.is_err());
}
