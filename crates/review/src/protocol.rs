//! Request routes and response bodies of the review endpoints.
//!
//! Routes are relative to the server's base URL and carry no leading slash.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use foundation::ids::{NodeId, ProjectId, SkeletonId, UserId};
use serde::{Deserialize, Serialize};

/// Answer to a review mark. Both fields are absent when nothing was recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewedResponse {
    #[serde(default)]
    pub reviewer_id: Option<UserId>,
    #[serde(default)]
    pub review_time: Option<DateTime<Utc>>,
}

impl ReviewedResponse {
    pub fn review(&self) -> Option<(UserId, DateTime<Utc>)> {
        Some((self.reviewer_id?, self.review_time?))
    }
}

/// Form body of the segment table request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentsRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subarbor_node_id: Option<NodeId>,
}

/// `[[id, name], ...]` as returned by the user name listing.
pub fn decode_usernames(json: &str) -> Result<BTreeMap<UserId, String>, serde_json::Error> {
    let pairs: Vec<(UserId, String)> = serde_json::from_str(json)?;
    Ok(pairs.into_iter().collect())
}

pub fn node_reviewed(project: ProjectId, node: NodeId) -> String {
    format!("{project}/node/{node}/reviewed")
}

pub fn skeleton_review(project: ProjectId, skeleton: SkeletonId) -> String {
    format!("{project}/skeletons/{skeleton}/review")
}

pub fn all_usernames(project: ProjectId) -> String {
    format!("accounts/{project}/all-usernames")
}

pub fn reviewer_whitelist(project: ProjectId) -> String {
    format!("{project}/user/reviewer-whitelist")
}

pub fn reset_own_reviews(project: ProjectId, skeleton: SkeletonId) -> String {
    format!("{project}/skeleton/{skeleton}/review/reset-own")
}

#[cfg(test)]
mod tests {
    use foundation::ids::{NodeId, ProjectId, SkeletonId, UserId};
    use pretty_assertions::assert_eq;

    use super::{ReviewedResponse, SegmentsRequest, decode_usernames, node_reviewed};
    use crate::reviewers::{Whitelist, WhitelistEntry};

    #[test]
    fn reviewed_response_without_reviewer_records_nothing() {
        let r: ReviewedResponse =
            serde_json::from_str(r#"{"reviewer_id": 3, "review_time": "2016-03-01T10:00:00+00:00"}"#)
                .unwrap();
        assert_eq!(r.review().map(|(id, _)| id), Some(UserId(3)));

        let empty: ReviewedResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(empty.review(), None);
    }

    #[test]
    fn decodes_usernames_and_whitelist() {
        let users = decode_usernames(r#"[[1, "anna"], [2, "bob"]]"#).unwrap();
        assert_eq!(users.get(&UserId(2)).map(String::as_str), Some("bob"));

        let entries: Vec<WhitelistEntry> = serde_json::from_str(
            r#"[{"reviewer_id": 2, "accept_after": "2016-01-01T00:00:00Z"}]"#,
        )
        .unwrap();
        let whitelist = Whitelist::from_entries(entries);
        assert_eq!(whitelist.len(), 1);
        assert!(whitelist.accept_after(UserId(2)).is_some());
    }

    #[test]
    fn routes_and_request_bodies() {
        assert_eq!(node_reviewed(ProjectId(4), NodeId(77)), "4/node/77/reviewed");
        assert_eq!(
            super::skeleton_review(ProjectId(4), SkeletonId(9)),
            "4/skeletons/9/review"
        );
        let body = serde_json::to_value(SegmentsRequest {
            subarbor_node_id: None,
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({}));
    }
}
