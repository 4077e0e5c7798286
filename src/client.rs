//! HTTP client for the Timesketch REST API.
//!
//! [`TimesketchClient`] logs in once with a username and password (form
//! login guarded by a CSRF token) and keeps the session cookie for every
//! later call. It implements [`TimesketchBackend`] against API v1:
//!
//! | Call | Endpoint |
//! |------|----------|
//! | sketch lookup | `GET /api/v1/sketches/{id}/` |
//! | aggregator run | `POST /api/v1/sketches/{id}/aggregation/explore/` |
//! | explore page | `POST /api/v1/sketches/{id}/explore/` |
//!
//! HTTP 404 maps to [`TimesketchError::NotFound`]; explore failures map to
//! [`TimesketchError::SearchFailed`]; network failures map to
//! [`TimesketchError::Connection`].

use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use scraper::{Html, Selector};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use timesketch_mcp_core::backend::TimesketchBackend;
use timesketch_mcp_core::models::{ExplorePage, ExploreRequest, Record, Sketch, IDENTIFIER};
use timesketch_mcp_core::TimesketchError;

use crate::config::TimesketchSettings;

type Result<T> = std::result::Result<T, TimesketchError>;

/// A logged-in session against one Timesketch instance.
pub struct TimesketchClient {
    http: reqwest::Client,
    host_uri: String,
    csrf_token: String,
}

fn connection_error(e: reqwest::Error) -> TimesketchError {
    TimesketchError::Connection(e.to_string())
}

/// Value of the `csrf_token` hidden input on the login page.
pub fn extract_csrf_token(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("#csrf_token").ok()?;
    document
        .select(&selector)
        .next()
        .and_then(|input| input.value().attr("value"))
        .map(|value| value.to_string())
}

impl TimesketchClient {
    /// Build the HTTP client and log in.
    pub async fn connect(settings: &TimesketchSettings, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(timeout)
            .build()
            .map_err(connection_error)?;

        let host_uri = settings.host_uri();
        let login_url = format!("{}login/", host_uri);

        let page = http
            .get(&login_url)
            .send()
            .await
            .map_err(connection_error)?
            .text()
            .await
            .map_err(connection_error)?;
        let csrf_token = extract_csrf_token(&page).ok_or_else(|| {
            TimesketchError::Connection(format!("no CSRF token on {}", login_url))
        })?;

        let resp = http
            .post(&login_url)
            .header("Referer", &login_url)
            .form(&[
                ("username", settings.username.as_str()),
                ("password", settings.password.as_str()),
                ("csrf_token", csrf_token.as_str()),
            ])
            .send()
            .await
            .map_err(connection_error)?;
        if !resp.status().is_success() {
            return Err(TimesketchError::Connection(format!(
                "login to {} failed with {}",
                host_uri,
                resp.status()
            )));
        }

        debug!(host = %host_uri, "logged in to Timesketch");
        Ok(Self {
            http,
            host_uri,
            csrf_token,
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}api/v1/{}", self.host_uri, path)
    }

    async fn get_json(&self, path: &str) -> Result<(StatusCode, Value)> {
        let resp = self
            .http
            .get(self.api_url(path))
            .header("X-CSRFToken", &self.csrf_token)
            .send()
            .await
            .map_err(connection_error)?;
        read_json(resp).await
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<(StatusCode, Value)> {
        let resp = self
            .http
            .post(self.api_url(path))
            .header("X-CSRFToken", &self.csrf_token)
            .header("Referer", &self.host_uri)
            .json(body)
            .send()
            .await
            .map_err(connection_error)?;
        read_json(resp).await
    }
}

async fn read_json(resp: Response) -> Result<(StatusCode, Value)> {
    let status = resp.status();
    let text = resp.text().await.map_err(connection_error)?;
    let body = if text.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&text).unwrap_or(Value::String(text))
    };
    Ok((status, body))
}

fn error_message(body: &Value) -> String {
    body.get("message")
        .and_then(Value::as_str)
        .map(|s| s.to_string())
        .unwrap_or_else(|| body.to_string())
}

/// Body of an explore request as the API expects it.
pub fn explore_body(request: &ExploreRequest) -> Value {
    let mut body = json!({
        "query": request.query,
        "filter": {
            "indices": "_all",
            "order": request.order.as_str(),
            "size": request.size,
            "terminate_after": request.size,
            "from": 0,
            "chips": request.chips,
        },
        "dsl": "",
        "fields": request.return_fields.to_param(),
        "enable_scroll": request.enable_scroll,
    });
    if let Some(scroll_id) = &request.scroll_id {
        body["scroll_id"] = Value::String(scroll_id.clone());
    }
    body
}

/// Flatten explore hits into records: `_source` plus `_id` as `identifier`.
pub fn parse_explore_page(body: &Value) -> Result<ExplorePage> {
    let objects = body
        .get("objects")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            TimesketchError::MalformedResponse("explore response has no objects".to_string())
        })?;

    let events = objects
        .iter()
        .map(|hit| {
            let mut record: Record = hit
                .get("_source")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            if let Some(id) = hit.get("_id") {
                record.insert(IDENTIFIER.to_string(), id.clone());
            }
            record
        })
        .collect();

    let meta = body.get("meta");
    Ok(ExplorePage {
        events,
        total: meta
            .and_then(|m| m.get("es_total_count"))
            .and_then(Value::as_u64),
        scroll_id: meta
            .and_then(|m| m.get("scroll_id"))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string()),
    })
}

#[async_trait]
impl TimesketchBackend for TimesketchClient {
    async fn get_sketch(&self, sketch_id: i64) -> Result<Option<Sketch>> {
        let (status, body) = self.get_json(&format!("sketches/{}/", sketch_id)).await?;

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(TimesketchError::Connection(format!(
                "sketch lookup returned {}: {}",
                status,
                error_message(&body)
            )));
        }

        let Some(obj) = body.get("objects").and_then(|o| o.get(0)) else {
            return Ok(None);
        };
        let sketch = serde_json::from_value(obj.clone())
            .map_err(|e| TimesketchError::MalformedResponse(format!("sketch: {}", e)))?;
        Ok(Some(sketch))
    }

    async fn run_aggregator(
        &self,
        sketch_id: i64,
        aggregator_name: &str,
        parameters: &Value,
    ) -> Result<Value> {
        let body = json!({
            "aggregator_name": aggregator_name,
            "aggregator_parameters": parameters,
        });
        let (status, body) = self
            .post_json(&format!("sketches/{}/aggregation/explore/", sketch_id), &body)
            .await?;

        match status {
            s if s.is_success() => Ok(body),
            StatusCode::NOT_FOUND => Err(TimesketchError::sketch_not_found(sketch_id)),
            s => Err(TimesketchError::SearchFailed(format!(
                "aggregation returned {}: {}",
                s,
                error_message(&body)
            ))),
        }
    }

    async fn explore(&self, sketch_id: i64, request: &ExploreRequest) -> Result<ExplorePage> {
        let (status, body) = self
            .post_json(
                &format!("sketches/{}/explore/", sketch_id),
                &explore_body(request),
            )
            .await?;

        match status {
            s if s.is_success() => parse_explore_page(&body),
            StatusCode::NOT_FOUND => Err(TimesketchError::sketch_not_found(sketch_id)),
            s => Err(TimesketchError::SearchFailed(format!(
                "explore returned {}: {}",
                s,
                error_message(&body)
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use timesketch_mcp_core::models::{Chip, ReturnFields, SortOrder};

    #[test]
    fn test_extract_csrf_token() {
        let html = r#"<form><input id="csrf_token" name="csrf_token" type="hidden" value="IjQ1Zj.abc"></form>"#;
        assert_eq!(extract_csrf_token(html).as_deref(), Some("IjQ1Zj.abc"));
        assert_eq!(extract_csrf_token("<html></html>"), None);
    }

    #[test]
    fn test_extract_csrf_token_attribute_order_and_quotes() {
        let reordered =
            r#"<form><input name="csrf_token" type="hidden" value="T2" id="csrf_token"></form>"#;
        assert_eq!(extract_csrf_token(reordered).as_deref(), Some("T2"));

        let single = "<form><input id='csrf_token' name='csrf_token' type='hidden' value='T3'></form>";
        assert_eq!(extract_csrf_token(single).as_deref(), Some("T3"));

        let no_value = r#"<input id="csrf_token" type="hidden">"#;
        assert_eq!(extract_csrf_token(no_value), None);
    }

    #[test]
    fn test_explore_body() {
        let mut req = ExploreRequest::new("*a*", ReturnFields::default_set());
        req.size = 50;
        req.order = SortOrder::Asc;
        req.chips.push(Chip::star());
        let body = explore_body(&req);
        assert_eq!(body["query"], "*a*");
        assert_eq!(body["filter"]["size"], 50);
        assert_eq!(body["filter"]["order"], "asc");
        assert_eq!(body["filter"]["chips"][0]["value"], "__ts_star");
        assert_eq!(
            body["fields"],
            "datetime, message, data_type, tag, yara_match, sha256_hash"
        );
        assert!(body.get("scroll_id").is_none());

        req.scroll_id = Some("abc".into());
        assert_eq!(explore_body(&req)["scroll_id"], "abc");
    }

    #[test]
    fn test_parse_explore_page() {
        let body = json!({
            "objects": [
                { "_id": "x1", "_index": "idx", "_source": { "message": "m", "datetime": "2024-01-01T00:00:00Z" } }
            ],
            "meta": { "es_total_count": 7, "scroll_id": "s-1" }
        });
        let page = parse_explore_page(&body).unwrap();
        assert_eq!(page.total, Some(7));
        assert_eq!(page.scroll_id.as_deref(), Some("s-1"));
        assert_eq!(page.events[0]["identifier"], "x1");
        assert_eq!(page.events[0]["message"], "m");
        assert!(page.events[0].get("_index").is_none());
    }

    #[test]
    fn test_parse_explore_page_without_objects() {
        let err = parse_explore_page(&json!({ "meta": {} })).unwrap_err();
        assert!(matches!(err, TimesketchError::MalformedResponse(_)));
    }
}
