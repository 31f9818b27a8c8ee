//! Builders for domain values and webhook payloads.
//!
//! Every payload targets `acme/widgets`, installation 77, sent by `octocat`.

use serde_json::{json, Value};

use crate::github::{ChangeArtifact, Issue};

pub const REPO: &str = "acme/widgets";

/// An open issue with no labels.
#[must_use]
pub fn issue(number: u64, title: &str, body: &str) -> Issue {
    Issue {
        number,
        title: title.to_string(),
        body: body.to_string(),
        labels: Vec::new(),
        url: format!("https://github.com/{REPO}/issues/{number}"),
    }
}

/// A change artifact on an orchestrator branch.
#[must_use]
pub fn change(number: u64, body: &str) -> ChangeArtifact {
    ChangeArtifact {
        number,
        title: format!("feat: change {number}"),
        body: body.to_string(),
        head_branch: format!("patcher/issue-{number}"),
        base_branch: "main".to_string(),
        labels: vec!["ai-review".to_string(), "patcher".to_string()],
        url: format!("https://github.com/{REPO}/pull/{number}"),
    }
}

fn envelope(action: &str) -> Value {
    json!({
        "action": action,
        "repository": {"full_name": REPO},
        "installation": {"id": 77},
        "sender": {"login": "octocat"},
    })
}

fn with(mut base: Value, key: &str, value: Value) -> Value {
    if let Some(object) = base.as_object_mut() {
        object.insert(key.to_string(), value);
    }
    base
}

fn labels(names: &[&str]) -> Value {
    Value::Array(names.iter().map(|n| json!({"name": n})).collect())
}

/// `issues` payload.
#[must_use]
pub fn issue_event(action: &str, number: u64, label_names: &[&str]) -> Value {
    with(
        envelope(action),
        "issue",
        json!({
            "number": number,
            "title": format!("Issue {number}"),
            "body": "Please fix it",
            "labels": labels(label_names),
        }),
    )
}

/// `issue_comment` payload; `on_pull` marks the issue as a pull request.
#[must_use]
pub fn comment_event(
    action: &str,
    number: u64,
    on_pull: bool,
    label_names: &[&str],
    body: &str,
) -> Value {
    let mut issue = json!({
        "number": number,
        "title": format!("Change {number}"),
        "body": "",
        "labels": labels(label_names),
    });
    if on_pull {
        issue = with(
            issue,
            "pull_request",
            json!({"url": format!("https://api.github.com/repos/{REPO}/pulls/{number}")}),
        );
    }
    let payload = with(envelope(action), "issue", issue);
    with(payload, "comment", json!({"body": body}))
}

/// `pull_request_review` payload with action `submitted`.
#[must_use]
pub fn review_event(number: u64, head_ref: &str, state: &str, body: &str) -> Value {
    let payload = with(envelope("submitted"), "pull_request", pull(number, head_ref));
    with(payload, "review", json!({"state": state, "body": body}))
}

/// `pull_request` payload.
#[must_use]
pub fn pull_request_event(action: &str, number: u64, head_ref: &str) -> Value {
    with(envelope(action), "pull_request", pull(number, head_ref))
}

/// `pull_request` payload with action `closed` for a merged pull request.
#[must_use]
pub fn merged_pull_request_event(number: u64, head_ref: &str) -> Value {
    let mut merged = pull(number, head_ref);
    merged["merged"] = Value::Bool(true);
    with(envelope("closed"), "pull_request", merged)
}

fn pull(number: u64, head_ref: &str) -> Value {
    json!({
        "number": number,
        "head": {"ref": head_ref},
        "labels": labels(&["ai-review", "patcher"]),
        "merged": false,
    })
}

fn repositories(names: &[&str]) -> Value {
    Value::Array(names.iter().map(|n| json!({"full_name": n})).collect())
}

/// `installation` payload covering `names`. Installation events carry no
/// `repository` field.
#[must_use]
pub fn installation_event(action: &str, names: &[&str]) -> Value {
    json!({
        "action": action,
        "installation": {"id": 77},
        "sender": {"login": "octocat"},
        "repositories": repositories(names),
    })
}

/// `installation_repositories` payload with action `added`.
#[must_use]
pub fn repositories_added_event(names: &[&str]) -> Value {
    json!({
        "action": "added",
        "installation": {"id": 77},
        "sender": {"login": "octocat"},
        "repositories_added": repositories(names),
        "repositories_removed": [],
    })
}
