//! Configuration Loading Integration Tests
//!
//! YAML file loading, environment expansion, override merging and
//! validation together.

#[cfg(test)]
mod tests {
    use bundle_uploadr::config::{ConfigError, ConfigLoader, PluginOptions, Provider};
    use serial_test::serial;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::NamedTempFile;

    fn yaml_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    #[serial]
    fn test_load_and_validate_camel_case_file() {
        std::env::set_var("BUNDLE_TEST_SERVICE_KEY", r#"{"some":"key"}"#);
        let file = yaml_file(
            r#"
bucketName: my-bucket
directory: ./fixtures
serviceKeyJson: '${BUNDLE_TEST_SERVICE_KEY}'
concurrency: 2
skipIfExists: false
"#,
        );

        let config = ConfigLoader::load(file.path()).unwrap().validate().unwrap();
        std::env::remove_var("BUNDLE_TEST_SERVICE_KEY");

        assert_eq!(config.bucket_name, "my-bucket");
        assert_eq!(config.directory, PathBuf::from("./fixtures"));
        assert_eq!(config.credentials.get_str("some"), Some("key"));
        assert_eq!(config.concurrency, 2);
        assert!(!config.skip_if_exists);
        assert_eq!(config.provider, Provider::Gcs);
    }

    #[test]
    #[serial]
    fn test_env_default_used_when_unset() {
        std::env::remove_var("BUNDLE_TEST_BUCKET");
        let file = yaml_file(
            r#"
bucket_name: ${BUNDLE_TEST_BUCKET:-fallback-bucket}
credentials:
  access_key_id: AKIA
  secret_access_key: secret
provider: s3
region: eu-west-1
"#,
        );

        let config = ConfigLoader::load(file.path()).unwrap().validate().unwrap();

        assert_eq!(config.bucket_name, "fallback-bucket");
        assert_eq!(config.provider, Provider::S3);
        assert_eq!(config.region.as_deref(), Some("eu-west-1"));
        assert_eq!(config.credentials.get_str("access_key_id"), Some("AKIA"));
    }

    #[test]
    fn test_overrides_complete_a_partial_file() {
        let file = yaml_file("directory: build\nconcurrency: 8\n");
        let from_file = ConfigLoader::load(file.path()).unwrap();

        assert!(from_file.clone().validate().is_err());

        let config = from_file
            .merge(PluginOptions {
                bucket_name: Some("cli-bucket".into()),
                service_key_json: Some(serde_json::json!({"some": "key"})),
                concurrency: Some(3),
                ..Default::default()
            })
            .validate()
            .unwrap();

        assert_eq!(config.directory, PathBuf::from("build"));
        assert_eq!(config.bucket_name, "cli-bucket");
        assert_eq!(config.concurrency, 3);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = ConfigLoader::load("/nonexistent/bundle-uploadr.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::IoError(_)));
    }

    #[test]
    fn test_malformed_yaml_is_parse_error() {
        let file = yaml_file("bucketName: [unclosed\n");
        let err = ConfigLoader::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_wrong_type_is_parse_error() {
        let file = yaml_file("concurrency: lots\n");
        let err = ConfigLoader::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_validation_lists_every_problem() {
        let file = yaml_file(
            r#"
bucketName: ""
serviceKeyJson: "not json"
concurrency: 0
provider: azure
endpoint: localhost:4443
"#,
        );

        let err = ConfigLoader::load(file.path()).unwrap().validate().unwrap_err();
        let fields: Vec<_> = err.field_errors().iter().map(|e| e.field).collect();

        assert_eq!(
            fields,
            vec!["bucket_name", "service_key_json", "concurrency", "provider", "endpoint"]
        );
    }
}
