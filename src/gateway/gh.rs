//! `GhGateway`: the real `ForgeGateway` implementation, shelling to the
//! `gh` CLI. Grounded on the subprocess-invocation idiom used to shell to
//! `git`/`claude` elsewhere in this crate: build the command, pipe output,
//! inspect the combined stdout/stderr on non-zero exit.

use std::collections::BTreeMap;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::errors::{ErrorKind, ForgeError};

use super::classify::classify_error;
use super::{ForgeGateway, Issue, RateLimitBucket, RateLimitStatus, REQUIRED_LABELS};

pub struct GhGateway {
    pub gh_bin: String,
}

impl GhGateway {
    pub fn new(gh_bin: impl Into<String>) -> Self {
        Self { gh_bin: gh_bin.into() }
    }

    async fn run(&self, ctx: &CancellationToken, args: &[&str]) -> Result<String, ForgeError> {
        if ctx.is_cancelled() {
            return Err(ForgeError::cancelled());
        }

        let child = Command::new(&self.gh_bin)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ForgeError::new(ErrorKind::Unknown, format!("failed to spawn gh: {e}")))?;

        let output = tokio::select! {
            result = child.wait_with_output() => result.map_err(|e| {
                ForgeError::new(ErrorKind::Unknown, format!("gh invocation failed: {e}"))
            })?,
            _ = ctx.cancelled() => return Err(ForgeError::cancelled()),
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if output.status.success() {
            Ok(stdout)
        } else {
            let combined = format!("{stdout}\n{stderr}");
            Err(classify_error(&combined))
        }
    }

    async fn find_pr_via_cross_reference(
        &self,
        ctx: &CancellationToken,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<Option<u64>, ForgeError> {
        const QUERY: &str = r#"
query($owner: String!, $repo: String!, $number: Int!) {
  repository(owner: $owner, name: $repo) {
    issue(number: $number) {
      timelineItems(itemTypes: [CROSS_REFERENCED_EVENT], first: 50) {
        nodes {
          ... on CrossReferencedEvent {
            source {
              ... on PullRequest {
                number
                state
              }
            }
          }
        }
      }
    }
  }
}
"#;
        let query_arg = format!("query={QUERY}");
        let owner_arg = format!("owner={owner}");
        let repo_arg = format!("repo={repo}");
        let number_arg = format!("number={number}");
        let json = self
            .run(
                ctx,
                &[
                    "api", "graphql", "-f", &query_arg, "-f", &owner_arg, "-f", &repo_arg, "-F", &number_arg,
                ],
            )
            .await?;

        #[derive(Deserialize)]
        struct Response {
            data: Option<Data>,
        }
        #[derive(Deserialize)]
        struct Data {
            repository: Option<Repository>,
        }
        #[derive(Deserialize)]
        struct Repository {
            issue: Option<IssueNode>,
        }
        #[derive(Deserialize)]
        struct IssueNode {
            #[serde(rename = "timelineItems")]
            timeline_items: TimelineItems,
        }
        #[derive(Deserialize)]
        struct TimelineItems {
            nodes: Vec<TimelineNode>,
        }
        #[derive(Deserialize)]
        struct TimelineNode {
            source: Option<SourceRef>,
        }
        #[derive(Deserialize)]
        struct SourceRef {
            number: Option<u64>,
            state: Option<String>,
        }

        let parsed: Response = serde_json::from_str(&json)
            .map_err(|e| ForgeError::new(ErrorKind::Unknown, format!("failed to parse graphql response: {e}")))?;

        let matches: Vec<u64> = parsed
            .data
            .and_then(|d| d.repository)
            .and_then(|r| r.issue)
            .map(|i| i.timeline_items.nodes)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|node| node.source)
            .filter(|source| source.state.as_deref() == Some("OPEN"))
            .filter_map(|source| source.number)
            .collect();

        Ok(if matches.len() == 1 { Some(matches[0]) } else { None })
    }
}

#[derive(Debug, Deserialize)]
struct RawIssue {
    number: u64,
    title: String,
    #[serde(default)]
    labels: Vec<RawLabel>,
    #[serde(default)]
    state: String,
    #[serde(default)]
    body: String,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawLabel {
    name: String,
}

impl From<RawIssue> for Issue {
    fn from(raw: RawIssue) -> Self {
        Issue {
            number: raw.number,
            title: raw.title,
            labels: raw.labels.into_iter().map(|l| l.name).collect(),
            state: raw.state,
            body: raw.body,
            url: raw.url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawLabelsWrapper {
    labels: Vec<RawLabel>,
}

#[derive(Debug, Deserialize)]
struct RawRateLimitResources {
    core: RawRateLimitBucket,
    search: RawRateLimitBucket,
    graphql: RawRateLimitBucket,
}

#[derive(Debug, Deserialize)]
struct RawRateLimitBucket {
    limit: u64,
    remaining: u64,
    reset: u64,
}

#[derive(Debug, Deserialize)]
struct RawRateLimitResponse {
    resources: RawRateLimitResources,
}

fn parse_issues(json: &str) -> Result<Vec<Issue>, ForgeError> {
    let raw: Vec<RawIssue> = serde_json::from_str(json)
        .map_err(|e| ForgeError::new(ErrorKind::Unknown, format!("failed to parse issue list: {e}")))?;
    Ok(raw.into_iter().map(Issue::from).collect())
}

/// Coalesce duplicates across overlapping label filters and sort ascending
/// (P8 dedup).
fn dedup_sorted(issues: Vec<Issue>) -> Vec<Issue> {
    let mut by_number: BTreeMap<u64, Issue> = BTreeMap::new();
    for issue in issues {
        by_number.entry(issue.number).or_insert(issue);
    }
    by_number.into_values().collect()
}

#[async_trait]
impl ForgeGateway for GhGateway {
    async fn list_issues_by_labels(
        &self,
        ctx: &CancellationToken,
        owner: &str,
        repo: &str,
        labels: &[&str],
    ) -> Result<Vec<Issue>, ForgeError> {
        let repo_arg = format!("{owner}/{repo}");
        let mut all = Vec::new();
        for label in labels {
            let json = self
                .run(
                    ctx,
                    &[
                        "issue",
                        "list",
                        "--repo",
                        &repo_arg,
                        "--state",
                        "open",
                        "--label",
                        label,
                        "--json",
                        "number,title,labels,state,body,url",
                    ],
                )
                .await?;
            all.extend(parse_issues(&json)?);
        }
        Ok(dedup_sorted(all))
    }

    async fn list_all_open_issues(
        &self,
        ctx: &CancellationToken,
        owner: &str,
        repo: &str,
    ) -> Result<Vec<Issue>, ForgeError> {
        let repo_arg = format!("{owner}/{repo}");
        let json = self
            .run(
                ctx,
                &[
                    "issue",
                    "list",
                    "--repo",
                    &repo_arg,
                    "--state",
                    "open",
                    "--limit",
                    "100",
                    "--json",
                    "number,title,labels,state,body,url",
                ],
            )
            .await?;
        Ok(dedup_sorted(parse_issues(&json)?))
    }

    async fn get_issue_labels(
        &self,
        ctx: &CancellationToken,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<Vec<String>, ForgeError> {
        let repo_arg = format!("{owner}/{repo}");
        let number_str = number.to_string();
        let json = self
            .run(
                ctx,
                &[
                    "issue", "view", &number_str, "--repo", &repo_arg, "--json", "labels",
                ],
            )
            .await?;
        let wrapper: RawLabelsWrapper = serde_json::from_str(&json)
            .map_err(|e| ForgeError::new(ErrorKind::Unknown, format!("failed to parse labels: {e}")))?;
        Ok(wrapper.labels.into_iter().map(|l| l.name).collect())
    }

    async fn add_label(
        &self,
        ctx: &CancellationToken,
        owner: &str,
        repo: &str,
        number: u64,
        label: &str,
    ) -> Result<(), ForgeError> {
        let repo_arg = format!("{owner}/{repo}");
        let number_str = number.to_string();
        self.run(
            ctx,
            &[
                "issue", "edit", &number_str, "--repo", &repo_arg, "--add-label", label,
            ],
        )
        .await?;
        Ok(())
    }

    async fn remove_label(
        &self,
        ctx: &CancellationToken,
        owner: &str,
        repo: &str,
        number: u64,
        label: &str,
    ) -> Result<(), ForgeError> {
        let repo_arg = format!("{owner}/{repo}");
        let number_str = number.to_string();
        self.run(
            ctx,
            &[
                "issue", "edit", &number_str, "--repo", &repo_arg, "--remove-label", label,
            ],
        )
        .await?;
        Ok(())
    }

    async fn create_issue_comment(
        &self,
        ctx: &CancellationToken,
        owner: &str,
        repo: &str,
        number: u64,
        body: &str,
    ) -> Result<(), ForgeError> {
        if body.is_empty() {
            return Err(ForgeError::new(ErrorKind::Unknown, "comment body must be non-empty"));
        }
        let repo_arg = format!("{owner}/{repo}");
        let number_str = number.to_string();
        self.run(
            ctx,
            &["issue", "comment", &number_str, "--repo", &repo_arg, "--body", body],
        )
        .await?;
        Ok(())
    }

    async fn ensure_labels(
        &self,
        ctx: &CancellationToken,
        owner: &str,
        repo: &str,
    ) -> Result<(), ForgeError> {
        let repo_arg = format!("{owner}/{repo}");
        let json = self
            .run(
                ctx,
                &[
                    "label", "list", "--repo", &repo_arg, "--json", "name,color,description", "--limit", "100",
                ],
            )
            .await?;
        let existing: Vec<RawLabel> = serde_json::from_str(&json)
            .map_err(|e| ForgeError::new(ErrorKind::Unknown, format!("failed to parse labels: {e}")))?;
        let existing_names: std::collections::HashSet<String> =
            existing.into_iter().map(|l| l.name).collect();

        for spec in REQUIRED_LABELS {
            if existing_names.contains(spec.name) {
                continue;
            }
            self.run(
                ctx,
                &[
                    "label", "create", spec.name, "--repo", &repo_arg, "--color", spec.color,
                    "--description", spec.description,
                ],
            )
            .await?;
        }
        Ok(())
    }

    async fn get_rate_limit(&self, ctx: &CancellationToken) -> Result<RateLimitStatus, ForgeError> {
        let json = self.run(ctx, &["api", "rate_limit"]).await?;
        let raw: RawRateLimitResponse = serde_json::from_str(&json)
            .map_err(|e| ForgeError::new(ErrorKind::Unknown, format!("failed to parse rate limit: {e}")))?;
        let to_bucket = |b: RawRateLimitBucket| RateLimitBucket {
            limit: b.limit,
            remaining: b.remaining,
            reset_epoch_seconds: b.reset,
        };
        Ok(RateLimitStatus {
            core: to_bucket(raw.resources.core),
            search: to_bucket(raw.resources.search),
            graphql: to_bucket(raw.resources.graphql),
        })
    }

    async fn get_pull_request_for_issue(
        &self,
        ctx: &CancellationToken,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<Option<u64>, ForgeError> {
        let repo_arg = format!("{owner}/{repo}");

        // 1. graph-query for cross-reference events (the highest-confidence
        // method: GitHub's own "this issue was referenced by" linkage).
        if let Some(pr) = self.find_pr_via_cross_reference(ctx, owner, repo, number).await? {
            return Ok(Some(pr));
        }

        // 2. number search in PR bodies: "fixes #N", "closes #N", "#N"
        let search = format!("{number} in:body,title state:open");
        let json = self
            .run(
                ctx,
                &[
                    "pr", "list", "--repo", &repo_arg, "--search", &search, "--state", "open",
                    "--json", "number,body",
                ],
            )
            .await?;
        #[derive(Deserialize)]
        struct RawPr {
            number: u64,
            #[serde(default)]
            body: String,
        }
        if let Ok(prs) = serde_json::from_str::<Vec<RawPr>>(&json) {
            let needle_variants = [
                format!("#{number}"),
                format!("fixes #{number}"),
                format!("closes #{number}"),
                format!("resolves #{number}"),
            ];
            let matches: Vec<u64> = prs
                .iter()
                .filter(|pr| needle_variants.iter().any(|n| pr.body.to_lowercase().contains(&n.to_lowercase())))
                .map(|pr| pr.number)
                .collect();
            if matches.len() == 1 {
                return Ok(Some(matches[0]));
            }
        }

        // 3. branch-name pattern match
        let json = self
            .run(
                ctx,
                &["pr", "list", "--repo", &repo_arg, "--state", "open", "--json", "number,headRefName"],
            )
            .await?;
        #[derive(Deserialize)]
        struct RawPrBranch {
            number: u64,
            #[serde(rename = "headRefName")]
            head_ref_name: String,
        }
        if let Ok(prs) = serde_json::from_str::<Vec<RawPrBranch>>(&json) {
            let patterns = [
                format!("issue-{number}"),
                format!("fix/{number}"),
                format!("issue/{number}"),
            ];
            let matches: Vec<u64> = prs
                .iter()
                .filter(|pr| patterns.iter().any(|p| pr.head_ref_name.contains(p)))
                .map(|pr| pr.number)
                .collect();
            if matches.len() == 1 {
                return Ok(Some(matches[0]));
            }
        }

        Ok(None)
    }

    async fn preflight(&self, ctx: &CancellationToken) -> Result<(), ForgeError> {
        self.run(ctx, &["--version"]).await?;
        self.run(ctx, &["auth", "status"]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_issues_dedups_and_sorts() {
        let json = r#"[{"number":5,"title":"b","labels":[],"state":"OPEN","body":"","url":null},
                        {"number":2,"title":"a","labels":[],"state":"OPEN","body":"","url":null}]"#;
        let issues = dedup_sorted(parse_issues(json).unwrap());
        assert_eq!(issues.iter().map(|i| i.number).collect::<Vec<_>>(), vec![2, 5]);
    }

    #[test]
    fn dedup_sorted_coalesces_overlapping_numbers_p8() {
        let a = Issue { number: 7, title: "x".into(), labels: vec![], state: "OPEN".into(), body: String::new(), url: None };
        let b = Issue { number: 7, title: "x".into(), labels: vec![], state: "OPEN".into(), body: String::new(), url: None };
        let c = Issue { number: 3, title: "y".into(), labels: vec![], state: "OPEN".into(), body: String::new(), url: None };
        let result = dedup_sorted(vec![a, b, c]);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].number, 3);
        assert_eq!(result[1].number, 7);
    }
}
