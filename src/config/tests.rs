use super::*;
use std::fs;
use tempfile::TempDir;

#[cfg(test)]
mod integration_tests {
    use super::*;

    #[test]
    fn config_file_persistence() {
        let temp_dir = TempDir::new().expect("should create TempDir successfully");
        let config_path = temp_dir.path().join("config.toml");

        let original_config = Config {
            ollama: OllamaConfig {
                protocol: "https".to_string(),
                host: "embeddings.internal".to_string(),
                port: 8443,
                model: "all-minilm".to_string(),
                batch_size: 32,
                embedding_dimension: 384,
            },
            llm: LlmConfig {
                temperature: 0.4,
                ..LlmConfig::default()
            },
            ..Config::default()
        };

        let toml_content = toml::to_string_pretty(&original_config)
            .expect("config should convert to toml string successfully");
        fs::write(&config_path, toml_content).expect("should write to config_path successfully");

        let content =
            fs::read_to_string(&config_path).expect("should read from config_path successfully");
        let loaded_config: Config = toml::from_str(&content).expect("should parse toml correctly");

        assert_eq!(original_config, loaded_config);
    }

    #[test]
    fn invalid_toml_handling() {
        let invalid_toml = r#"
            [ollama
            host = "localhost"
            port = "invalid_port"
        "#;

        let result: Result<Config, toml::de::Error> = toml::from_str(invalid_toml);
        assert!(result.is_err());
    }

    #[test]
    fn show_config_reads_directory() {
        let temp_dir = TempDir::new().expect("should create TempDir successfully");
        assert!(show_config(temp_dir.path()).is_ok());
    }
}

#[test]
fn secrets_are_masked() {
    let masked = mask_secret(Some("abcdefghijkl"));
    assert!(masked.contains("****"));
    assert!(masked.contains("ijkl"));
    assert!(!masked.contains("abcd"));

    let short = mask_secret(Some("abc"));
    assert!(!short.contains("abc"));

    assert!(mask_secret(None).contains("not set"));
}
