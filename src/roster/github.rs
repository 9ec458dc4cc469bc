//! GitHub team roster over the GraphQL API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};

use crate::config::RosterConfig;
use crate::error::{constants, RelayError, Result};
use crate::roster::{RosterSource, TeamMember};

// Only the first 100 members and 100 keys per member are fetched.
const TEAM_KEYS_QUERY: &str = r#"
query($org: String!, $team: String!) {
  organization(login: $org) {
    login
    team(slug: $team) {
      name
      members(first: 100) {
        nodes {
          login
          publicKeys(first: 100) {
            nodes { key }
          }
        }
      }
    }
  }
}
"#;

#[derive(Debug, Deserialize)]
struct GraphqlResponse {
    data: Option<QueryData>,
    #[serde(default)]
    errors: Vec<GraphqlError>,
}

#[derive(Debug, Deserialize)]
struct GraphqlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    organization: Option<Organization>,
}

#[derive(Debug, Deserialize)]
struct Organization {
    team: Option<Team>,
}

#[derive(Debug, Deserialize)]
struct Team {
    members: Nodes<Member>,
}

#[derive(Debug, Deserialize)]
struct Nodes<T> {
    nodes: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Member {
    login: String,
    public_keys: Nodes<PublicKey>,
}

#[derive(Debug, Deserialize)]
struct PublicKey {
    key: String,
}

/// Team members and their public keys, fetched from GitHub.
///
/// The token is resolved on every query, so a rotated token file is honoured
/// without a restart.
#[derive(Debug, Clone)]
pub struct GithubRosterSource {
    http: reqwest::Client,
    config: RosterConfig,
}

impl GithubRosterSource {
    pub fn new(config: RosterConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("nix-daemon-relay/", env!("CARGO_PKG_VERSION"))),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.query_timeout + Duration::from_secs(1))
            .build()?;
        Ok(Self { http, config })
    }
}

#[async_trait]
impl RosterSource for GithubRosterSource {
    #[instrument(level = "debug", skip(self), fields(org = %self.config.organization, team = %self.config.team))]
    async fn fetch_members(&self) -> Result<Vec<TeamMember>> {
        let token = self.config.resolve_token()?;
        let bearer = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| RelayError::ConfigError(format!("invalid token: {e}")))?;

        let body = json!({
            "query": TEAM_KEYS_QUERY,
            "variables": {
                "org": self.config.organization,
                "team": self.config.team,
            },
        });

        let response = self
            .http
            .post(&self.config.endpoint)
            .header(AUTHORIZATION, bearer)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        let response: GraphqlResponse = response.json().await?;

        if !response.errors.is_empty() {
            let messages: Vec<String> = response.errors.into_iter().map(|e| e.message).collect();
            return Err(RelayError::RosterQuery(messages.join("; ")));
        }

        let team = response
            .data
            .and_then(|data| data.organization)
            .and_then(|org| org.team)
            .ok_or_else(|| RelayError::RosterQuery(constants::ERR_MISSING_TEAM.into()))?;

        let members: Vec<TeamMember> = team
            .members
            .nodes
            .into_iter()
            .map(|member| TeamMember {
                login: member.login,
                keys: member.public_keys.nodes.into_iter().map(|k| k.key).collect(),
            })
            .collect();
        debug!(members = members.len(), "fetched team");
        Ok(members)
    }
}
