//! Common test utilities and helpers for RepoVault tests
#![allow(dead_code)]

use chrono::NaiveDate;
use repovault::Config;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Command;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TOKEN: &str = "ghp_integration_test";

/// Fixed run date so workspace paths are predictable
pub fn run_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, 1).expect("valid date")
}

/// Configuration pointed at a mock API and a scratch output directory
pub fn test_config(api_url: &str, output: &Path) -> Config {
    let mut config = Config::default();
    config.output_directory = output.to_string_lossy().into_owned();
    config.github.token = Some(TOKEN.to_string());
    config.github.api_url = api_url.to_string();
    config.github.organizations = vec!["acme".to_string()];
    config.github.username = Some("alice".to_string());
    config.github.clone_personal = false;
    config.archive.enabled = false;
    config.clone.timeout = 60;
    config
}

/// One repository object as returned by the GitHub API
pub fn repo_json(name: &str, clone_url: &str, archived: bool) -> Value {
    json!({
        "name": name,
        "full_name": format!("acme/{}", name),
        "clone_url": clone_url,
        "ssh_url": format!("git@github.com:acme/{}.git", name),
        "archived": archived,
    })
}

/// `count` repositories with HTTPS clone URLs
pub fn repo_batch(prefix: &str, count: usize) -> Value {
    Value::Array(
        (0..count)
            .map(|i| {
                let name = format!("{}-{}", prefix, i);
                let url = format!("https://github.com/acme/{}.git", name);
                repo_json(&name, &url, false)
            })
            .collect(),
    )
}

/// Serve `body` for page `page` of `resource` (e.g. "/orgs/acme/repos")
pub async fn mount_page(server: &MockServer, resource: &str, page: u32, body: Value) {
    Mock::given(method("GET"))
        .and(path(resource))
        .and(query_param("page", page.to_string()))
        .and(header("authorization", format!("token {}", TOKEN).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .expect(1)
        .mount(server)
        .await;
}

/// Serve a GitHub error object for every request to `resource`
pub async fn mount_error(server: &MockServer, resource: &str, status: u16, message: &str) {
    let mut response = ResponseTemplate::new(status).set_body_json(json!({
        "message": message,
        "documentation_url": "https://docs.github.com/rest",
        "status": status.to_string(),
    }));
    if message.starts_with("API rate limit exceeded") {
        response = response.insert_header("x-ratelimit-remaining", "0");
    }

    Mock::given(method("GET"))
        .and(path(resource))
        .respond_with(response)
        .mount(server)
        .await;
}

/// Whether a usable git executable is on PATH
pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(["-c", "user.name=RepoVault Test", "-c", "user.email=test@example.com"])
        .args(args)
        .current_dir(dir)
        .output()
        .expect("Failed to run git");
    assert!(
        status.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&status.stderr)
    );
}

/// Create a local repository with one commit, usable as a clone source
pub fn create_source_repo(parent: &Path, name: &str) -> PathBuf {
    let dir = parent.join(name);
    std::fs::create_dir_all(&dir).expect("Failed to create source repo dir");
    git(&dir, &["init", "-q"]);
    std::fs::write(dir.join("README.md"), format!("# {}\n", name)).expect("Failed to write README");
    git(&dir, &["add", "README.md"]);
    git(&dir, &["commit", "-q", "-m", "initial commit"]);
    dir
}

/// Sorted names of the entries directly inside `dir`
pub fn entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .expect("Failed to read dir")
        .map(|e| e.expect("dir entry").file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
