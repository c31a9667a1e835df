use epistle::config::{EpistleConfig, load};

#[test]
fn default_config_has_sensible_values() {
    let config = EpistleConfig::default();
    assert_eq!(config.mail.imap_port, 993);
    assert_eq!(config.mail.smtp_port, 465);
    assert_eq!(config.mail.mailbox, "INBOX");
    assert_eq!(config.mail.sent_mailbox, "Sent");
    assert_eq!(config.model.provider, "anthropic");
    assert_eq!(config.model.max_tokens, 4096);
    assert_eq!(config.model.timeout_secs, 300);
    assert!(config.model.api_key.is_none());
    assert_eq!(config.store.path, "epistle.db");
    assert_eq!(config.scheduler.poll_interval_secs, 60);
    assert_eq!(config.scheduler.summary_hour, 0);
    assert!(config.summarizer.daily);
    assert!(config.summarizer.weekly);
    assert!(!config.summarizer.monthly);
    assert!(!config.summarizer.quarterly);
    assert!(!config.summarizer.notify);
    assert_eq!(config.summarizer.relevant_topk, 3);
    assert!(config.mail.correspondents.is_empty());
}

#[test]
fn valid_toml_parses_successfully() {
    let toml_str = r#"
[mail]
imap_host = "imap.example.com"
smtp_host = "smtp.example.com"
address = "bot@example.com"
display_name = "Bot"

[[mail.correspondents]]
address = "alice@client.example"
name = "Alice"

[model]
provider = "openai"
chat_model = "gpt-4o"
embed_model = "text-embedding-3-large"
max_tokens = 2048
api_key = "sk-test"

[store]
path = "/var/lib/epistle/epistle.db"

[scheduler]
poll_interval_secs = 30
summary_hour = 5

[summarizer]
monthly = true
notify = true
"#;

    let config: EpistleConfig = toml::from_str(toml_str).unwrap();
    assert_eq!(config.mail.imap_host, "imap.example.com");
    assert_eq!(config.mail.address, "bot@example.com");
    assert_eq!(config.mail.correspondents.len(), 1);
    assert_eq!(config.mail.correspondents[0].name, "Alice");
    assert_eq!(config.model.provider, "openai");
    assert_eq!(config.model.chat_model, "gpt-4o");
    assert_eq!(config.model.max_tokens, 2048);
    assert_eq!(config.model.api_key.as_deref(), Some("sk-test"));
    assert_eq!(config.store.path, "/var/lib/epistle/epistle.db");
    assert_eq!(config.scheduler.poll_interval_secs, 30);
    assert_eq!(config.scheduler.summary_hour, 5);
    assert!(config.summarizer.monthly);
    assert!(config.summarizer.notify);
}

#[test]
fn partial_config_uses_defaults_for_missing_fields() {
    let toml_str = r#"
[mail]
imap_host = "imap.example.com"
smtp_host = "smtp.example.com"
address = "bot@example.com"
"#;

    let config: EpistleConfig = toml::from_str(toml_str).unwrap();
    assert_eq!(config.mail.imap_port, 993);
    assert_eq!(config.mail.display_name, "Assistant");
    assert_eq!(config.model.provider, "anthropic");
    assert!(config.summarizer.daily);
}

#[test]
fn empty_toml_uses_all_defaults() {
    let config: EpistleConfig = toml::from_str("").unwrap();
    assert_eq!(config.mail.imap_port, 993);
    assert_eq!(config.model.provider, "anthropic");
    assert!(config.mail.correspondents.is_empty());
}

#[test]
fn malformed_toml_returns_parse_error() {
    let result = toml::from_str::<EpistleConfig>("this is not valid toml {{{");
    assert!(result.is_err());
    let err = result.unwrap_err().to_string();
    assert!(
        err.contains("expected") || err.contains("invalid"),
        "error should be descriptive: {err}"
    );
}

// One test drives every EPISTLE_CONFIG scenario sequentially; parallel
// tests mutating the same env var would race.
#[test]
fn load_follows_the_env_var_search_order() {
    // Missing file falls back to defaults.
    // SAFETY: no other test touches this env var
    unsafe {
        std::env::set_var("EPISTLE_CONFIG", "/tmp/nonexistent-epistle-config.toml");
    }
    let config = load().unwrap();
    assert_eq!(config.model.provider, "anthropic");

    // A file behind the env var is loaded.
    let tmp_config = "/tmp/epistle-test-config.toml";
    std::fs::write(
        tmp_config,
        r#"
[mail]
imap_host = "imap.example.com"
smtp_host = "smtp.example.com"
address = "bot@example.com"

[scheduler]
poll_interval_secs = 5
"#,
    )
    .unwrap();
    // SAFETY: as above
    unsafe {
        std::env::set_var("EPISTLE_CONFIG", tmp_config);
    }
    let config = load().unwrap();
    assert_eq!(config.scheduler.poll_interval_secs, 5);
    std::fs::remove_file(tmp_config).ok();

    // Validation failures surface as clear errors.
    let bad_config = "/tmp/epistle-test-bad-provider.toml";
    std::fs::write(
        bad_config,
        r#"
[model]
provider = "deepmind"
"#,
    )
    .unwrap();
    // SAFETY: as above
    unsafe {
        std::env::set_var("EPISTLE_CONFIG", bad_config);
    }
    let err = load().expect_err("invalid provider must be rejected");
    assert!(err.to_string().contains("invalid provider"));
    std::fs::remove_file(bad_config).ok();

    // SAFETY: as above
    unsafe {
        std::env::remove_var("EPISTLE_CONFIG");
    }
}
