//! CSV import parsing for the two upload surfaces: scrape-job lists and
//! mutating-action batches.

use serde_json::{json, Value};
use uuid::Uuid;

use crate::models::{ApiMethod, JobType};

/// One row that failed to parse; the rest of the file still imports.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RowError {
    pub line: usize,
    pub message: String,
}

// ============================================================================
// Scrape-job CSV (POST /jobs/upload)
// ============================================================================

/// Parse a scrape-job CSV. The `Username` column header is required,
/// case-sensitive; each non-empty row becomes one job.
pub fn parse_usernames_csv(data: &[u8]) -> Result<Vec<String>, String> {
    let mut reader = csv::Reader::from_reader(data);
    let headers = reader
        .headers()
        .map_err(|e| format!("invalid CSV: {e}"))?
        .clone();

    let column = headers
        .iter()
        .position(|h| h == "Username")
        .ok_or_else(|| "missing required column: Username".to_string())?;

    let mut usernames = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| format!("invalid CSV: {e}"))?;
        if let Some(username) = record.get(column) {
            let username = username.trim();
            if !username.is_empty() {
                usernames.push(username.to_string());
            }
        }
    }

    Ok(usernames)
}

// ============================================================================
// Action CSV (POST /actions/upload)
// ============================================================================

/// Map a `task_type` cell to a job type. Accepts the short aliases the
/// import format uses plus the canonical names; `user_profile` and
/// `user_tweets` normalise onto the scrape types.
pub fn parse_task_type(value: &str) -> Option<JobType> {
    match value.trim().to_ascii_lowercase().as_str() {
        "like" | "like_tweet" => Some(JobType::Like),
        "rt" | "retweet" | "retweet_tweet" => Some(JobType::Retweet),
        "reply" | "reply_tweet" => Some(JobType::Reply),
        "quote" | "quote_tweet" => Some(JobType::Quote),
        "post" | "create_post" | "create_tweet" => Some(JobType::CreatePost),
        "follow" | "follow_user" => Some(JobType::Follow),
        "dm" | "send_dm" | "direct_message" => Some(JobType::DirectMessage),
        "update_profile" => Some(JobType::UpdateProfile),
        "scrape_profile" | "user_profile" => Some(JobType::ScrapeProfile),
        "scrape_posts" | "user_tweets" => Some(JobType::ScrapePosts),
        _ => None,
    }
}

/// The post id is the path segment after `/status/`, up to a query string
/// or further path.
pub fn tweet_id_from_url(url: &str) -> Option<String> {
    let after = url.split("/status/").nth(1)?;
    let id: String = after
        .chars()
        .take_while(|c| *c != '?' && *c != '/')
        .collect();
    if id.is_empty() {
        None
    } else {
        Some(id)
    }
}

/// One validated action-import row, still keyed by account number; the
/// route resolves the account before submission.
#[derive(Debug, Clone)]
pub struct ParsedAction {
    pub line: usize,
    pub account_no: String,
    pub job_type: JobType,
    pub tweet_id: Option<String>,
    pub user: Option<String>,
    pub text: Option<String>,
    pub media: Option<String>,
    pub api_method: Option<ApiMethod>,
    pub priority: i16,
}

impl ParsedAction {
    /// Build the job's input params once the account id is known.
    pub fn input_params(&self, account_id: Uuid) -> Value {
        let mut obj = serde_json::Map::new();
        obj.insert("account_id".into(), json!(account_id));

        match self.job_type {
            JobType::Like | JobType::Retweet => {
                obj.insert("target".into(), json!(self.tweet_id));
            }
            JobType::Reply | JobType::Quote => {
                obj.insert("target".into(), json!(self.tweet_id));
                obj.insert("text".into(), json!(self.text));
            }
            JobType::CreatePost => {
                obj.insert("text".into(), json!(self.text));
            }
            JobType::Follow => {
                obj.insert("user".into(), json!(self.user));
            }
            JobType::DirectMessage => {
                obj.insert("user".into(), json!(self.user));
                obj.insert("text".into(), json!(self.text));
            }
            _ => {}
        }

        if let Some(media) = &self.media {
            obj.insert("media".into(), json!(media));
        }
        if let Some(method) = self.api_method {
            obj.insert("api_method".into(), json!(method));
        }

        Value::Object(obj)
    }
}

/// Parse an action-import CSV into rows and per-row errors.
pub fn parse_actions_csv(data: &[u8]) -> Result<(Vec<ParsedAction>, Vec<RowError>), String> {
    let mut reader = csv::Reader::from_reader(data);
    let headers = reader
        .headers()
        .map_err(|e| format!("invalid CSV: {e}"))?
        .clone();

    let col = |name: &str| headers.iter().position(|h| h == name);
    let account_col = col("account_no").ok_or("missing required column: account_no")?;
    let type_col = col("task_type").ok_or("missing required column: task_type")?;
    let source_col = col("source_tweet");
    let text_col = col("text_content");
    let user_col = col("user");
    let media_col = col("media");
    let priority_col = col("priority");
    let method_col = col("api_method");

    let get = |record: &csv::StringRecord, col: Option<usize>| -> Option<String> {
        col.and_then(|i| record.get(i))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let mut rows = Vec::new();
    let mut errors = Vec::new();

    for (i, record) in reader.records().enumerate() {
        // Header is line 1.
        let line = i + 2;
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                errors.push(RowError {
                    line,
                    message: format!("invalid row: {e}"),
                });
                continue;
            }
        };

        match parse_row(line, account_col, type_col, |c| get(&record, c))
            .map(|mut row| {
                row.tweet_id = get(&record, source_col).and_then(|u| tweet_id_from_url(&u));
                row.user = get(&record, user_col);
                row.text = get(&record, text_col);
                row.media = get(&record, media_col);
                row.api_method = get(&record, method_col).and_then(|m| parse_api_method(&m));
                row.priority = get(&record, priority_col)
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(0);
                validate_row(row, get(&record, source_col).is_some())
            }) {
            Ok(Ok(row)) => rows.push(row),
            Ok(Err(message)) | Err(message) => errors.push(RowError { line, message }),
        }
    }

    Ok((rows, errors))
}

fn parse_api_method(value: &str) -> Option<ApiMethod> {
    match value.trim().to_ascii_lowercase().as_str() {
        "graphql" => Some(ApiMethod::Graphql),
        "rest" => Some(ApiMethod::Rest),
        _ => None,
    }
}

fn parse_row(
    line: usize,
    account_col: usize,
    type_col: usize,
    get: impl Fn(Option<usize>) -> Option<String>,
) -> Result<ParsedAction, String> {
    let account_no =
        get(Some(account_col)).ok_or_else(|| "missing account_no".to_string())?;
    let type_cell = get(Some(type_col)).ok_or_else(|| "missing task_type".to_string())?;
    let job_type =
        parse_task_type(&type_cell).ok_or_else(|| format!("unknown task_type: {type_cell}"))?;

    Ok(ParsedAction {
        line,
        account_no,
        job_type,
        tweet_id: None,
        user: None,
        text: None,
        media: None,
        api_method: None,
        priority: 0,
    })
}

/// Per-type requirements from the import format.
fn validate_row(mut row: ParsedAction, had_source: bool) -> Result<ParsedAction, String> {
    match row.job_type {
        JobType::Like | JobType::Retweet | JobType::Reply | JobType::Quote => {
            if row.tweet_id.is_none() {
                return Err("source_tweet with a /status/ id is required".to_string());
            }
        }
        JobType::Follow => {
            if row.user.is_none() {
                return Err("user is required for follow".to_string());
            }
            if had_source {
                return Err("source_tweet must be absent for follow".to_string());
            }
        }
        JobType::DirectMessage => {
            if row.user.is_none() || row.text.is_none() {
                return Err("user and text_content are required for dm".to_string());
            }
            row.api_method = Some(ApiMethod::Rest);
        }
        _ => {}
    }

    if matches!(
        row.job_type,
        JobType::Reply | JobType::Quote | JobType::CreatePost
    ) && row.text.is_none()
    {
        return Err("text_content is required".to_string());
    }

    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn username_csv_requires_exact_header() {
        let ok = b"Username\nalice\nbob\n";
        assert_eq!(parse_usernames_csv(ok).unwrap(), vec!["alice", "bob"]);

        let wrong_case = b"username\nalice\n";
        assert!(parse_usernames_csv(wrong_case).is_err());
    }

    #[test]
    fn username_csv_skips_blank_rows() {
        let data = b"Username,Notes\nalice,x\n,y\nbob,\n";
        assert_eq!(parse_usernames_csv(data).unwrap(), vec!["alice", "bob"]);
    }

    #[test]
    fn tweet_id_extraction() {
        assert_eq!(
            tweet_id_from_url("https://x.com/alice/status/12345?s=20"),
            Some("12345".to_string())
        );
        assert_eq!(
            tweet_id_from_url("https://x.com/alice/status/12345/photo/1"),
            Some("12345".to_string())
        );
        assert_eq!(tweet_id_from_url("https://x.com/alice"), None);
    }

    #[test]
    fn task_type_aliases() {
        assert_eq!(parse_task_type("rt"), Some(JobType::Retweet));
        assert_eq!(parse_task_type("post"), Some(JobType::CreatePost));
        assert_eq!(parse_task_type("dm"), Some(JobType::DirectMessage));
        assert_eq!(parse_task_type("user_profile"), Some(JobType::ScrapeProfile));
        assert_eq!(parse_task_type("user_tweets"), Some(JobType::ScrapePosts));
        assert_eq!(parse_task_type("poke"), None);
    }

    #[test]
    fn like_row_parses() {
        let data = b"account_no,task_type,source_tweet\nWRK-1,like,https://x.com/a/status/99?s=1\n";
        let (rows, errors) = parse_actions_csv(data).unwrap();
        assert!(errors.is_empty());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].job_type, JobType::Like);
        assert_eq!(rows[0].tweet_id.as_deref(), Some("99"));

        let params = rows[0].input_params(Uuid::nil());
        assert_eq!(params["target"], "99");
    }

    #[test]
    fn reply_requires_text() {
        let data = b"account_no,task_type,source_tweet,text_content\n\
            WRK-1,reply,https://x.com/a/status/99,\n\
            WRK-1,reply,https://x.com/a/status/99,hello\n";
        let (rows, errors) = parse_actions_csv(data).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].line, 2);
        assert!(errors[0].message.contains("text_content"));
    }

    #[test]
    fn follow_rejects_source_tweet() {
        let data = b"account_no,task_type,source_tweet,user\n\
            WRK-1,follow,https://x.com/a/status/99,bob\n\
            WRK-1,follow,,bob\n";
        let (rows, errors) = parse_actions_csv(data).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].user.as_deref(), Some("bob"));
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("source_tweet"));
    }

    #[test]
    fn dm_forces_rest() {
        let data = b"account_no,task_type,user,text_content,api_method\n\
            WRK-1,dm,bob,hi there,graphql\n";
        let (rows, errors) = parse_actions_csv(data).unwrap();
        assert!(errors.is_empty());
        assert_eq!(rows[0].api_method, Some(ApiMethod::Rest));

        let params = rows[0].input_params(Uuid::nil());
        assert_eq!(params["user"], "bob");
        assert_eq!(params["text"], "hi there");
    }

    #[test]
    fn unknown_task_type_is_a_row_error() {
        let data = b"account_no,task_type\nWRK-1,poke\n";
        let (rows, errors) = parse_actions_csv(data).unwrap();
        assert!(rows.is_empty());
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("unknown task_type"));
    }

    #[test]
    fn priority_and_media_are_optional() {
        let data = b"account_no,task_type,source_tweet,text_content,media,priority\n\
            WRK-1,quote,https://x.com/a/status/7,look,/tmp/pic.jpg,5\n";
        let (rows, _) = parse_actions_csv(data).unwrap();
        assert_eq!(rows[0].priority, 5);
        assert_eq!(rows[0].media.as_deref(), Some("/tmp/pic.jpg"));

        let params = rows[0].input_params(Uuid::nil());
        assert_eq!(params["media"], "/tmp/pic.jpg");
    }
}
