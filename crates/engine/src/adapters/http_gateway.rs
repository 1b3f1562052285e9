//! Action Gateway over HTTP.
//!
//! Each action is a `POST {base_url}/entities/{entity_type}/{entity_id}/actions`
//! whose JSON body is the [`ResolvedAction`]. A 2xx response carries the
//! entity's state after the change.

use std::time::Duration;

use adpilot_core::action::ResolvedAction;
use adpilot_core::metrics::{EntityState, EntityStatus, EntityType};
use async_trait::async_trait;
use serde::Deserialize;

use crate::ports::{ActionGateway, GatewayError, GatewayErrorKind};

/// HTTP request timeout for a single gateway call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest error body kept in a [`GatewayError`].
const MAX_DETAIL_LEN: usize = 500;

#[derive(Debug, Deserialize)]
struct EntityStateResponse {
    status: String,
    current_budget: Option<f64>,
    #[serde(default)]
    label_ids: Vec<String>,
}

impl From<EntityStateResponse> for EntityState {
    fn from(r: EntityStateResponse) -> Self {
        Self {
            status: EntityStatus::parse_lenient(&r.status),
            current_budget: r.current_budget,
            label_ids: r.label_ids,
        }
    }
}

pub struct HttpActionGateway {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpActionGateway {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    fn action_url(&self, entity_type: EntityType, entity_id: &str) -> String {
        format!(
            "{}/entities/{}/{}/actions",
            self.base_url,
            entity_type.as_str(),
            entity_id
        )
    }
}

/// Map a non-success HTTP status to an error kind.
pub fn classify_status(status: u16) -> GatewayErrorKind {
    match status {
        429 => GatewayErrorKind::RateLimited,
        401 | 403 => GatewayErrorKind::Auth,
        404 => GatewayErrorKind::NotFound,
        400..=499 => GatewayErrorKind::Rejected,
        _ => GatewayErrorKind::Transport,
    }
}

fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn truncate(mut text: String) -> String {
    if text.len() > MAX_DETAIL_LEN {
        let mut cut = MAX_DETAIL_LEN;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
    }
    text
}

#[async_trait]
impl ActionGateway for HttpActionGateway {
    async fn apply_action(
        &self,
        entity_id: &str,
        entity_type: EntityType,
        action: &ResolvedAction,
    ) -> Result<EntityState, GatewayError> {
        let mut request = self
            .client
            .post(self.action_url(entity_type, entity_id))
            .json(action);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::new(GatewayErrorKind::Transport, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let hint = retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            let mut err = GatewayError::new(
                classify_status(status.as_u16()),
                truncate(format!("HTTP {}: {body}", status.as_u16())),
            );
            if let Some(hint) = hint {
                err = err.with_retry_after(hint);
            }
            return Err(err);
        }

        let state: EntityStateResponse = response.json().await.map_err(|e| {
            GatewayError::new(
                GatewayErrorKind::Transport,
                format!("unreadable gateway response: {e}"),
            )
        })?;
        Ok(state.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(classify_status(429), GatewayErrorKind::RateLimited);
        assert_eq!(classify_status(401), GatewayErrorKind::Auth);
        assert_eq!(classify_status(403), GatewayErrorKind::Auth);
        assert_eq!(classify_status(404), GatewayErrorKind::NotFound);
        assert_eq!(classify_status(422), GatewayErrorKind::Rejected);
        assert_eq!(classify_status(500), GatewayErrorKind::Transport);
        assert_eq!(classify_status(503), GatewayErrorKind::Transport);
    }

    #[test]
    fn url_has_no_double_slash() {
        let gateway = HttpActionGateway::new("http://gateway.local/", None).unwrap();
        assert_eq!(
            gateway.action_url(EntityType::Adset, "as_9"),
            "http://gateway.local/entities/adset/as_9/actions"
        );
    }

    #[test]
    fn response_maps_to_entity_state() {
        let body: EntityStateResponse = serde_json::from_value(serde_json::json!({
            "status": "PAUSED",
            "current_budget": 50000.0
        }))
        .unwrap();
        let state = EntityState::from(body);
        assert_eq!(state.status, EntityStatus::Paused);
        assert_eq!(state.current_budget, Some(50000.0));
        assert!(state.label_ids.is_empty());
    }

    #[test]
    fn long_details_are_truncated() {
        let text = "x".repeat(MAX_DETAIL_LEN * 2);
        assert_eq!(truncate(text).len(), MAX_DETAIL_LEN);
    }
}
