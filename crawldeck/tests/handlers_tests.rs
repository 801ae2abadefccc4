use crawldeck::commands::command_argument_builder;
use crawldeck::handlers::*;
use crawldeck_api::RecordId;
use crawldeck_core::{SortField, SortKey};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::NamedTempFile;

fn matches(args: &[&str]) -> clap::ArgMatches {
    let mut argv = vec!["crawldeck"];
    argv.extend_from_slice(args);
    command_argument_builder()
        .try_get_matches_from(argv)
        .unwrap()
}

#[test]
fn test_parse_url_line_with_scheme() {
    let result = parse_url_line("https://example.com");
    assert_eq!(result, Some("https://example.com".to_string()));
}

#[test]
fn test_parse_url_line_without_scheme() {
    let result = parse_url_line("example.com");
    assert_eq!(result, Some("http://example.com".to_string()));
}

#[test]
fn test_parse_url_line_invalid() {
    let result = parse_url_line("not a valid url!!!");
    assert_eq!(result, None);
}

#[test]
fn test_load_urls_from_file() -> Result<(), Box<dyn std::error::Error>> {
    let mut temp_file = NamedTempFile::new()?;
    writeln!(temp_file, "https://example.com")?;
    writeln!(temp_file, "golang.org")?;
    writeln!(temp_file)?; // Empty line
    writeln!(temp_file, "  https://news.ycombinator.com  ")?;

    let path = PathBuf::from(temp_file.path());
    let urls = load_urls_from_file(&path)?;

    assert_eq!(
        urls,
        vec![
            "https://example.com".to_string(),
            "http://golang.org".to_string(),
            "https://news.ycombinator.com".to_string(),
        ]
    );

    Ok(())
}

#[test]
fn test_load_urls_from_file_empty() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file).unwrap();
    writeln!(temp_file, "   ").unwrap();

    let path = PathBuf::from(temp_file.path());
    let result = load_urls_from_file(&path);

    assert!(result.unwrap_err().contains("No valid URLs"));
}

#[test]
fn test_load_urls_from_file_missing() {
    let path = PathBuf::from("/definitely/not/here/urls.txt");
    let result = load_urls_from_file(&path);

    assert!(result.unwrap_err().contains("Failed to read URL file"));
}

#[test]
fn test_load_urls_from_source_single_url() {
    let url = "example.com".to_string();
    let result = load_urls_from_source(Some(&url), None).unwrap();

    assert_eq!(result, vec!["http://example.com".to_string()]);
}

#[test]
fn test_load_urls_from_source_no_input() {
    let result = load_urls_from_source(None, None);
    assert_eq!(
        result.unwrap_err(),
        "Either a URL or --file must be provided"
    );
}

#[test]
fn test_submit_rejects_url_and_file_together() {
    let result = command_argument_builder().try_get_matches_from([
        "crawldeck",
        "submit",
        "https://example.com",
        "--file",
        "urls.txt",
    ]);
    assert!(result.is_err());
}

#[test]
fn test_descriptor_defaults() {
    let args = matches(&["list"]);
    let list = args.subcommand_matches("list").unwrap();
    let descriptor = descriptor_from_args(list).unwrap();

    assert_eq!(descriptor.limit(), 10);
    assert_eq!(descriptor.offset(), 0);
    assert_eq!(descriptor.sort_by(), SortKey::ascending(SortField::CreatedAt));
    assert_eq!(descriptor.filter_text(), "");
}

#[test]
fn test_descriptor_from_page_sort_and_filter() {
    let args = matches(&[
        "list", "--page", "3", "-l", "5", "-s", "url", "--desc", "--filter", " doc ",
    ]);
    let list = args.subcommand_matches("list").unwrap();
    let descriptor = descriptor_from_args(list).unwrap();

    assert_eq!(descriptor.limit(), 5);
    assert_eq!(descriptor.offset(), 10);
    assert_eq!(descriptor.page_index(), 2);
    assert_eq!(descriptor.sort_by(), SortKey::descending(SortField::Url));
    assert_eq!(descriptor.filter_text(), "doc");
}

#[test]
fn test_descriptor_from_raw_offset() {
    let args = matches(&["watch", "--offset", "7", "--limit", "3"]);
    let watch = args.subcommand_matches("watch").unwrap();
    let descriptor = descriptor_from_args(watch).unwrap();

    assert_eq!(descriptor.offset(), 7);
    assert_eq!(descriptor.limit(), 3);
}

#[test]
fn test_page_and_offset_conflict() {
    let result = command_argument_builder().try_get_matches_from([
        "crawldeck", "list", "--page", "2", "--offset", "10",
    ]);
    assert!(result.is_err());
}

#[test]
fn test_unknown_sort_column_rejected_by_parser() {
    let result =
        command_argument_builder().try_get_matches_from(["crawldeck", "list", "--sort", "id"]);
    assert!(result.is_err());
}

#[test]
fn test_zero_limit_rejected_by_parser() {
    let result =
        command_argument_builder().try_get_matches_from(["crawldeck", "list", "--limit", "0"]);
    assert!(result.is_err());
}

#[test]
fn test_parse_ids() {
    let ids = parse_ids(&[3, 1, 3]).unwrap();
    let expected: Vec<RecordId> = [3, 1, 3].into_iter().filter_map(RecordId::new).collect();
    assert_eq!(ids, expected);
}

#[test]
fn test_parse_ids_rejects_zero() {
    let result = parse_ids(&[4, 0]);
    assert_eq!(result.unwrap_err(), "Invalid record id: 0");
}

#[test]
fn test_delete_requires_ids() {
    let result = command_argument_builder().try_get_matches_from(["crawldeck", "delete"]);
    assert!(result.is_err());

    let args = matches(&["delete", "4", "5"]);
    let delete = args.subcommand_matches("delete").unwrap();
    let ids: Vec<u64> = delete.get_many::<u64>("ID").unwrap().copied().collect();
    assert_eq!(ids, vec![4, 5]);
}

#[test]
fn test_client_config_from_flags() {
    let args = matches(&[
        "list",
        "--base-url",
        "http://localhost:8080",
        "--api-key",
        "secret",
        "--timeout",
        "7",
    ]);
    let config = client_config_from_args(&args).unwrap();

    assert_eq!(config.base_url.as_str(), "http://localhost:8080/");
    assert_eq!(config.api_key, "secret");
    assert_eq!(config.timeout, Duration::from_secs(7));
}

#[test]
fn test_client_config_applies_user_agent() {
    let args = matches(&[
        "--base-url",
        "http://localhost:8080",
        "--api-key",
        "secret",
        "--user-agent",
        "crawldeck-ci/2.0",
        "list",
    ]);
    let config = client_config_from_args(&args).unwrap();

    assert_eq!(config.user_agent, "crawldeck-ci/2.0");
}

#[test]
fn test_zero_timeout_rejected_by_parser() {
    let result =
        command_argument_builder().try_get_matches_from(["crawldeck", "--timeout", "0", "list"]);
    assert!(result.is_err());

    let args = matches(&["--timeout", "1", "list"]);
    assert_eq!(args.get_one::<u64>("timeout"), Some(&1));
}

#[test]
fn test_client_config_rejects_blank_key() {
    let args = matches(&["--base-url", "http://localhost:8080", "--api-key", "  ", "list"]);
    assert!(client_config_from_args(&args).is_err());
}

#[test]
fn test_client_config_rejects_bad_base_url() {
    let args = matches(&["--base-url", "not a url", "--api-key", "secret", "list"]);
    assert!(client_config_from_args(&args).is_err());
}

mod against_mock_service {
    use super::matches;
    use crawldeck::handlers::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn args_for(server: &MockServer, args: &[&str]) -> clap::ArgMatches {
        let uri = server.uri();
        let mut argv = vec!["--quiet", "--base-url", uri.as_str(), "--api-key", "test-key"];
        argv.extend_from_slice(args);
        matches(&argv)
    }

    #[tokio::test]
    async fn test_list_fetches_one_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/urls"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{"id": 1, "url": "https://example.com", "status": "completed"}],
                "total": 1
            })))
            .expect(1)
            .mount(&server)
            .await;

        let args = args_for(&server, &["list", "--format", "json"]);
        let config = client_config_from_args(&args).unwrap();
        let list = args.subcommand_matches("list").unwrap();

        handle_list(config, list).await.unwrap();
    }

    #[tokio::test]
    async fn test_show_reports_service_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/urls/42"))
            .respond_with(
                ResponseTemplate::new(404).set_body_json(json!({"error": "URL not found"})),
            )
            .mount(&server)
            .await;

        let args = args_for(&server, &["show", "42"]);
        let config = client_config_from_args(&args).unwrap();
        let show = args.subcommand_matches("show").unwrap();

        let err = handle_show(config, show).await.unwrap_err();
        assert_eq!(err.to_string(), "URL not found");
    }

    #[tokio::test]
    async fn test_delete_sends_distinct_ids() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/urls"))
            .and(body_json(json!({"ids": [4, 5]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message": "deleted"})))
            .expect(1)
            .mount(&server)
            .await;

        let args = args_for(&server, &["delete", "5", "4", "5"]);
        let config = client_config_from_args(&args).unwrap();
        let delete = args.subcommand_matches("delete").unwrap();

        handle_delete(config, delete).await.unwrap();
    }

    #[tokio::test]
    async fn test_submit_file_posts_each_url() -> Result<(), Box<dyn std::error::Error>> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/urls"))
            .respond_with(
                ResponseTemplate::new(202).set_body_json(json!({"message": "queued", "id": 9})),
            )
            .expect(2)
            .mount(&server)
            .await;

        let mut urls = NamedTempFile::new()?;
        writeln!(urls, "https://example.com")?;
        writeln!(urls)?;
        writeln!(urls, "example.org")?;
        let file = urls.path().to_string_lossy().to_string();

        let args = args_for(&server, &["submit", "--file", file.as_str()]);
        let config = client_config_from_args(&args)?;
        let submit = args.subcommand_matches("submit").unwrap();

        handle_submit(config, submit).await?;
        Ok(())
    }
}
