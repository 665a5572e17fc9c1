use futures::stream::{self, Stream, TryStreamExt};
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::StatusCode;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{BackupError, Result};

/// Fixed page size for repository listings
pub const PER_PAGE: usize = 100;

/// Kind of GitHub account whose repositories are backed up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountKind {
    Organization,
    User,
}

/// An organization or personal user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub kind: AccountKind,
    pub name: String,
}

impl Account {
    pub fn organization(name: impl Into<String>) -> Self {
        Self {
            kind: AccountKind::Organization,
            name: name.into(),
        }
    }

    pub fn user(name: impl Into<String>) -> Self {
        Self {
            kind: AccountKind::User,
            name: name.into(),
        }
    }

    /// Path and query of the repository listing for `page` (1-based)
    pub fn repos_path(&self, page: u32) -> String {
        match self.kind {
            AccountKind::Organization => format!(
                "orgs/{}/repos?type=all&per_page={}&page={}",
                self.name, PER_PAGE, page
            ),
            AccountKind::User => format!(
                "users/{}/repos?type=owner&visibility=all&per_page={}&page={}",
                self.name, PER_PAGE, page
            ),
        }
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            AccountKind::Organization => write!(f, "organization {}", self.name),
            AccountKind::User => write!(f, "user {}", self.name),
        }
    }
}

/// The parts of a listed repository needed to clone it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryRecord {
    pub name: String,
    pub clone_url: String,
    pub archived: bool,
}

/// One page of a repository listing
#[derive(Debug, Clone)]
pub struct RepoPage {
    pub number: u32,
    pub records: Vec<RepositoryRecord>,
    pub is_last: bool,
}

/// A page shorter than [`PER_PAGE`] is the final one
pub fn is_last_page(len: usize) -> bool {
    len < PER_PAGE
}

#[derive(Debug, Deserialize)]
struct ApiRepository {
    name: String,
    clone_url: Option<String>,
    ssh_url: Option<String>,
    #[serde(default)]
    archived: bool,
}

impl ApiRepository {
    fn into_record(self) -> Option<RepositoryRecord> {
        let clone_url = self.clone_url.or(self.ssh_url)?;
        Some(RepositoryRecord {
            name: self.name,
            clone_url,
            archived: self.archived,
        })
    }
}

/// Error body returned by the GitHub REST API
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthenticatedUser {
    login: String,
}

/// Map a GitHub error response onto the error taxonomy
///
/// `rate_limit_remaining` is the `x-ratelimit-remaining` header value.
pub fn classify_error(status: u16, rate_limit_remaining: Option<&str>, message: &str) -> BackupError {
    let lowered = message.to_lowercase();
    let quota_exhausted = rate_limit_remaining.map(str::trim) == Some("0");

    if status == 401 || message == "Bad credentials" {
        return BackupError::Auth(message.to_string());
    }

    if ((status == 403 || status == 429) && quota_exhausted)
        || lowered.starts_with("api rate limit exceeded")
        || lowered.contains("secondary rate limit")
    {
        return BackupError::RateLimit(message.to_string());
    }

    if status == 403 || message.starts_with("Resource not accessible by") {
        return BackupError::Permission(message.to_string());
    }

    if status == 404 {
        return BackupError::NotFound(message.to_string());
    }

    BackupError::Api {
        status,
        message: message.to_string(),
    }
}

/// Inspect a response and return the error it represents, if any
///
/// Non-2xx responses are always errors. A 2xx response is only an error when
/// its body is a GitHub error object.
pub fn classify_response(
    status: StatusCode,
    rate_limit_remaining: Option<&str>,
    body: &str,
) -> Option<BackupError> {
    let parsed = serde_json::from_str::<ApiErrorBody>(body).ok();

    if status.is_success() {
        let error = parsed?;
        let effective = error
            .status
            .as_deref()
            .and_then(|s| s.parse::<u16>().ok())
            .unwrap_or(status.as_u16());
        return Some(classify_error(effective, None, &error.message));
    }

    let message = parsed.map(|e| e.message).unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("unexpected response")
            .to_string()
    });
    Some(classify_error(status.as_u16(), rate_limit_remaining, &message))
}

/// Authenticated GitHub REST client
#[derive(Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_url: String,
    exclude_patterns: Vec<Regex>,
}

impl GitHubClient {
    /// Create a client from validated configuration
    pub fn new(config: &Config) -> Result<Self> {
        let token = config.token()?;

        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("token {}", token))
            .map_err(|_| BackupError::Config("GitHub token contains invalid characters".into()))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("repovault/", env!("CARGO_PKG_VERSION"))),
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.github.request_timeout))
            .build()?;

        let exclude_patterns = config
            .github
            .exclude_patterns
            .iter()
            .filter_map(|pattern| compile_exclusion(pattern))
            .collect();

        Ok(Self {
            http,
            api_url: config.github.api_url.trim_end_matches('/').to_string(),
            exclude_patterns,
        })
    }

    /// GET a resource and return its body and status
    ///
    /// Fails with the classified error kind when GitHub reports one.
    pub async fn fetch_page(&self, resource_url: &str) -> Result<(String, StatusCode)> {
        debug!("GET {}", resource_url);

        let response = self.http.get(resource_url).send().await?;
        let status = response.status();
        let remaining = response
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await?;

        debug!(
            "{} -> HTTP {} ({} bytes, rate limit remaining: {})",
            resource_url,
            status.as_u16(),
            body.len(),
            remaining.as_deref().unwrap_or("?")
        );

        if let Some(error) = classify_response(status, remaining.as_deref(), &body) {
            return Err(error);
        }

        Ok((body, status))
    }

    /// Fetch and parse one page of an account's repositories
    pub async fn fetch_repository_page(&self, account: &Account, page: u32) -> Result<RepoPage> {
        let url = format!("{}/{}", self.api_url, account.repos_path(page));
        let (body, _) = match self.fetch_page(&url).await {
            Err(BackupError::NotFound(message)) => {
                return Err(BackupError::NotFound(format!("{} ({})", account, message)))
            }
            other => other?,
        };

        let items: Vec<ApiRepository> = serde_json::from_str(&body)?;
        let is_last = is_last_page(items.len());

        let mut records = Vec::with_capacity(items.len());
        for item in items {
            if self.is_excluded(&item.name) {
                debug!("Excluding repository due to pattern match: {}", item.name);
                continue;
            }
            let name = item.name.clone();
            match item.into_record() {
                Some(record) => records.push(record),
                None => warn!("Repository {} has no clone URL, skipping", name),
            }
        }

        debug!(
            "Page {} for {}: {} repositories{}",
            page,
            account,
            records.len(),
            if is_last { " (last page)" } else { "" }
        );

        Ok(RepoPage {
            number: page,
            records,
            is_last,
        })
    }

    /// Pages of an account's repositories, starting at 1 and stopping after a short page
    pub fn repository_pages<'a>(
        &'a self,
        account: &'a Account,
    ) -> impl Stream<Item = Result<RepoPage>> + 'a {
        stream::try_unfold(Some(1u32), move |next| async move {
            let Some(page) = next else {
                return Ok(None);
            };
            let repo_page = self.fetch_repository_page(account, page).await?;
            let next = (!repo_page.is_last).then_some(page + 1);
            Ok::<_, BackupError>(Some((repo_page, next)))
        })
    }

    /// List every repository of an account, following pages until a short one
    pub async fn list_repositories(&self, account: &Account) -> Result<Vec<RepositoryRecord>> {
        let mut repositories = Vec::new();

        let pages = self.repository_pages(account);
        futures::pin_mut!(pages);
        while let Some(page) = pages.try_next().await? {
            repositories.extend(page.records);
        }

        info!("Found {} repositories for {}", repositories.len(), account);
        Ok(repositories)
    }

    /// Check the token against `GET /user` and return the login it belongs to
    pub async fn verify_token(&self) -> Result<String> {
        let url = format!("{}/user", self.api_url);
        let (body, _) = self.fetch_page(&url).await?;
        let user: AuthenticatedUser = serde_json::from_str(&body)?;
        Ok(user.login)
    }

    fn is_excluded(&self, name: &str) -> bool {
        self.exclude_patterns.iter().any(|re| re.is_match(name))
    }
}

/// Compile a glob (`*`, `?`) or exact repository name into an anchored regex
fn compile_exclusion(pattern: &str) -> Option<Regex> {
    let mut body = String::with_capacity(pattern.len() + 8);
    for c in pattern.chars() {
        match c {
            '*' => body.push_str(".*"),
            '?' => body.push('.'),
            c => body.push_str(&regex::escape(c.encode_utf8(&mut [0u8; 4]))),
        }
    }

    match Regex::new(&format!("^{}$", body)) {
        Ok(re) => Some(re),
        Err(e) => {
            warn!("Ignoring invalid exclusion pattern {:?}: {}", pattern, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use quickcheck_macros::quickcheck;

    #[test]
    fn test_org_and_user_paths() {
        assert_eq!(
            Account::organization("acme").repos_path(3),
            "orgs/acme/repos?type=all&per_page=100&page=3"
        );
        assert_eq!(
            Account::user("alice").repos_path(1),
            "users/alice/repos?type=owner&visibility=all&per_page=100&page=1"
        );
    }

    #[test]
    fn test_bad_credentials_is_auth_error() {
        let body = r#"{"message":"Bad credentials","documentation_url":"https://docs.github.com/rest","status":"401"}"#;
        assert_matches!(
            classify_response(StatusCode::UNAUTHORIZED, None, body),
            Some(BackupError::Auth(_))
        );
    }

    #[test]
    fn test_rate_limit_message_is_rate_limit_error() {
        let body = r#"{"message":"API rate limit exceeded for user ID 1.","documentation_url":"https://docs.github.com"}"#;
        assert_matches!(
            classify_response(StatusCode::FORBIDDEN, Some("0"), body),
            Some(BackupError::RateLimit(_))
        );
        assert_matches!(
            classify_response(StatusCode::FORBIDDEN, None, body),
            Some(BackupError::RateLimit(_))
        );
    }

    #[test]
    fn test_exhausted_quota_header_is_rate_limit_error() {
        assert_matches!(
            classify_response(StatusCode::TOO_MANY_REQUESTS, Some("0"), "not json"),
            Some(BackupError::RateLimit(_))
        );
    }

    #[test]
    fn test_forbidden_is_permission_error() {
        let body = r#"{"message":"Resource not accessible by personal access token","status":"403"}"#;
        assert_matches!(
            classify_response(StatusCode::FORBIDDEN, Some("4999"), body),
            Some(BackupError::Permission(_))
        );
        assert_matches!(
            classify_response(StatusCode::FORBIDDEN, None, "{}"),
            Some(BackupError::Permission(_))
        );
    }

    #[test]
    fn test_not_found_is_recoverable() {
        let body = r#"{"message":"Not Found","status":"404"}"#;
        let err = classify_response(StatusCode::NOT_FOUND, None, body).unwrap();
        assert_matches!(err, BackupError::NotFound(_));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_server_error_keeps_status() {
        assert_matches!(
            classify_response(StatusCode::BAD_GATEWAY, None, ""),
            Some(BackupError::Api { status: 502, .. })
        );
    }

    #[test]
    fn test_success_array_is_not_an_error() {
        let body = r#"[{"name":"a","clone_url":"https://github.com/acme/a.git","archived":false}]"#;
        assert!(classify_response(StatusCode::OK, Some("0"), body).is_none());
        assert!(classify_response(StatusCode::OK, None, "[]").is_none());
    }

    #[test]
    fn test_error_object_with_success_status_is_classified() {
        let body = r#"{"message":"Bad credentials","status":"401"}"#;
        assert_matches!(
            classify_response(StatusCode::OK, None, body),
            Some(BackupError::Auth(_))
        );
    }

    #[test]
    fn test_record_prefers_clone_url_over_ssh() {
        let repo: ApiRepository = serde_json::from_str(
            r#"{"name":"a","clone_url":"https://github.com/acme/a.git","ssh_url":"git@github.com:acme/a.git","archived":true}"#,
        )
        .unwrap();
        let record = repo.into_record().unwrap();
        assert_eq!(record.clone_url, "https://github.com/acme/a.git");
        assert!(record.archived);

        let repo: ApiRepository =
            serde_json::from_str(r#"{"name":"b","clone_url":null,"ssh_url":"git@github.com:acme/b.git"}"#)
                .unwrap();
        let record = repo.into_record().unwrap();
        assert_eq!(record.clone_url, "git@github.com:acme/b.git");
        assert!(!record.archived);
    }

    #[test]
    fn test_exclusion_patterns() {
        let glob = compile_exclusion("*.github.io").unwrap();
        assert!(glob.is_match("acme.github.io"));
        assert!(!glob.is_match("acme-github-io"));

        let single = compile_exclusion("repo-?").unwrap();
        assert!(single.is_match("repo-1"));
        assert!(!single.is_match("repo-10"));
        assert!(!single.is_match("repo-"));

        let exact = compile_exclusion("scratch").unwrap();
        assert!(exact.is_match("scratch"));
        assert!(!exact.is_match("scratchpad"));
    }

    #[test]
    fn test_full_page_is_not_last() {
        assert!(!is_last_page(PER_PAGE));
        assert!(is_last_page(PER_PAGE - 1));
        assert!(is_last_page(0));
    }

    #[quickcheck]
    fn prop_requests_follow_page_fullness(total: u16) -> bool {
        let total = total as usize;
        let mut requests = 0;
        let mut seen = 0;
        loop {
            requests += 1;
            let len = (total - seen).min(PER_PAGE);
            seen += len;
            if is_last_page(len) {
                break;
            }
        }
        // An exactly full final page costs one extra, empty request
        seen == total && requests == total / PER_PAGE + 1
    }
}
