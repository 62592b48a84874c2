//! HTTP access to the CATMAID endpoints the review session needs.

use std::collections::BTreeMap;

use foundation::ids::{NodeId, ProjectId, SkeletonId, StackId, UserId};
use review::protocol::{self, ReviewedResponse, SegmentsRequest};
use review::reviewers::{Whitelist, WhitelistEntry};
use review::segment::Segment;
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::Connection;
use crate::stack_info::StackInfo;

#[derive(Debug)]
pub enum ClientError {
    Http(reqwest::Error),
    Status { url: String, status: StatusCode },
    /// The server answered with an `{"error": ...}` body.
    Server(String),
    Decode(serde_json::Error),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Http(e) => write!(f, "request failed: {e}"),
            ClientError::Status { url, status } => write!(f, "{url} answered {status}"),
            ClientError::Server(msg) => write!(f, "server error: {msg}"),
            ClientError::Decode(e) => write!(f, "unexpected response: {e}"),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        ClientError::Http(e)
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::Decode(e)
    }
}

#[derive(Clone, Debug)]
pub struct CatmaidClient {
    http: reqwest::Client,
    base_url: String,
    project: ProjectId,
    token: Option<String>,
}

impl CatmaidClient {
    pub fn new(connection: &Connection) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: connection.base_url.clone(),
            project: connection.project,
            token: connection.token.clone(),
        }
    }

    pub fn project(&self) -> ProjectId {
        self.project
    }

    fn url(&self, route: &str) -> String {
        format!("{}{route}", self.base_url)
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => req.header("X-Authorization", format!("Token {token}")),
            None => req,
        }
    }

    async fn text(&self, req: RequestBuilder, url: &str) -> Result<String, ClientError> {
        debug!("request {url}");
        let resp = self.authorize(req).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if let Some(msg) = server_error(&body) {
            return Err(ClientError::Server(msg));
        }
        if !status.is_success() {
            return Err(ClientError::Status {
                url: url.to_string(),
                status,
            });
        }
        Ok(body)
    }

    async fn get_json<T: DeserializeOwned>(&self, route: &str) -> Result<T, ClientError> {
        let url = self.url(route);
        let body = self.text(self.http.get(&url), &url).await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn post_form<T: DeserializeOwned, F: serde::Serialize + ?Sized>(
        &self,
        route: &str,
        form: &F,
    ) -> Result<T, ClientError> {
        let url = self.url(route);
        let body = self.text(self.http.post(&url).form(form), &url).await?;
        Ok(serde_json::from_str(&body)?)
    }

    pub async fn stack_info(&self, stack: StackId) -> Result<StackInfo, ClientError> {
        self.get_json(&format!("{}/stack/{stack}/info", self.project))
            .await
    }

    pub async fn segments(
        &self,
        skeleton: SkeletonId,
        subarbor: Option<NodeId>,
    ) -> Result<Vec<Segment>, ClientError> {
        let form = SegmentsRequest {
            subarbor_node_id: subarbor,
        };
        self.post_form(&protocol::skeleton_review(self.project, skeleton), &form)
            .await
    }

    pub async fn usernames(&self) -> Result<BTreeMap<UserId, String>, ClientError> {
        let url = self.url(&protocol::all_usernames(self.project));
        let body = self.text(self.http.post(&url), &url).await?;
        Ok(protocol::decode_usernames(&body)?)
    }

    pub async fn whitelist(&self) -> Result<Whitelist, ClientError> {
        let entries: Vec<WhitelistEntry> = self
            .get_json(&protocol::reviewer_whitelist(self.project))
            .await?;
        Ok(Whitelist::from_entries(entries))
    }

    pub async fn store_whitelist(&self, whitelist: &Whitelist) -> Result<(), ClientError> {
        let _: serde_json::Value = self
            .post_form(
                &protocol::reviewer_whitelist(self.project),
                &whitelist.to_wire(),
            )
            .await?;
        Ok(())
    }

    pub async fn mark_reviewed(&self, node: NodeId) -> Result<ReviewedResponse, ClientError> {
        let form: [(&str, &str); 0] = [];
        self.post_form(&protocol::node_reviewed(self.project, node), &form)
            .await
    }

    pub async fn reset_own_reviews(&self, skeleton: SkeletonId) -> Result<(), ClientError> {
        let form: [(&str, &str); 0] = [];
        let _: serde_json::Value = self
            .post_form(&protocol::reset_own_reviews(self.project, skeleton), &form)
            .await?;
        Ok(())
    }

    /// Downloads a tile and returns its size in bytes.
    pub async fn fetch_tile(&self, url: &str) -> Result<usize, ClientError> {
        let resp = self.authorize(self.http.get(url)).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ClientError::Status {
                url: url.to_string(),
                status,
            });
        }
        Ok(resp.bytes().await?.len())
    }
}

fn server_error(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value.get("error")?.as_str().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::server_error;

    #[test]
    fn error_bodies_are_detected() {
        assert_eq!(
            server_error(r#"{"error": "No skeleton"}"#).as_deref(),
            Some("No skeleton")
        );
        assert_eq!(server_error(r#"[[1, "anna"]]"#), None);
        assert_eq!(server_error("<html>"), None);
    }
}
