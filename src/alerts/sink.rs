//! Sink configuration processing: templates in, a ready-to-send request out.
//!
//! Resolution substitutes secret values into the URL, query string, headers,
//! and body immediately before the outbound call. The persisted form of a
//! request always goes through [`redacted_request_summary`], which rewrites
//! values back to `__NAME__` tokens and truncates bodies.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::data::models::{HttpAlertSink, SinkMethod};
use crate::db::DbContext;
use crate::error::{Error, Result};
use crate::secrets::{Redactor, resolve_placeholders};

/// Reserved placeholder carrying the alert JSON into a body template.
pub const ALERT_BODY_TOKEN: &str = "__ALERT__";

/// Maximum bytes of request/response body kept in persisted summaries.
pub const BODY_PERSIST_LIMIT: usize = 4 * 1024;

/// A fully resolved outbound request.
#[derive(Debug, Clone)]
pub struct PreparedHttpRequest {
    pub method: SinkMethod,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
}

/// Redacted, bounded snapshot of a request for persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestSummary {
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
    pub body_truncated: bool,
}

/// Resolve a sink's templates into a sendable request.
///
/// Query parameters are appended with `?` or `&` depending on whether the
/// URI already carries a query. When the body template is absent, the alert
/// JSON itself becomes the body; when present, the `__ALERT__` token inside
/// it expands to the alert JSON.
pub async fn prepare_request(
    ctx: &DbContext,
    sink: &HttpAlertSink,
    alert_json: &Value,
) -> Result<PreparedHttpRequest> {
    let secret_names = ctx.sinks().secret_names(sink.id).await?;
    let secret_values = ctx.secrets().values_by_names(&secret_names).await?;

    let mut url = resolve_placeholders(&secret_names, &secret_values, &sink.uri)?;
    if let Some(query) = sink.query_params.as_deref().filter(|q| !q.is_empty()) {
        let query = resolve_placeholders(&secret_names, &secret_values, query)?;
        url = append_query(url, &query);
    }

    let mut headers = HashMap::new();
    if let Some(raw_headers) = &sink.headers {
        let map = raw_headers.as_object().ok_or_else(|| {
            Error::validation_field("headers", "sink headers must be a JSON object")
        })?;
        for (name, value) in map {
            let value = value.as_str().ok_or_else(|| {
                Error::validation_field("headers", format!("header '{name}' must be a string"))
            })?;
            headers.insert(
                name.clone(),
                resolve_placeholders(&secret_names, &secret_values, value)?,
            );
        }
    }

    let alert_text =
        serde_json::to_string(alert_json).map_err(|e| Error::Internal(e.into()))?;
    let body = match sink.body.as_deref() {
        Some(template) => {
            let resolved = resolve_placeholders(&secret_names, &secret_values, template)?;
            Some(resolved.replace(ALERT_BODY_TOKEN, &alert_text))
        }
        None => Some(alert_text),
    };

    Ok(PreparedHttpRequest {
        method: sink.method,
        url,
        headers,
        body,
    })
}

/// Build the redactor for a sink's secrets.
pub async fn sink_redactor(ctx: &DbContext, sink: &HttpAlertSink) -> Result<Redactor> {
    let secret_names = ctx.sinks().secret_names(sink.id).await?;
    let secret_values = ctx.secrets().values_by_names(&secret_names).await?;
    Ok(Redactor::new(&secret_values))
}

/// Snapshot a prepared request with secrets redacted and the body bounded.
pub fn redacted_request_summary(
    prepared: &PreparedHttpRequest,
    redactor: &Redactor,
) -> RequestSummary {
    let (body, body_truncated) = match &prepared.body {
        Some(body) => {
            let redacted = redactor.redact_str(body);
            let truncated = redacted.len() > BODY_PERSIST_LIMIT;
            let bounded = truncate_utf8(&redacted, BODY_PERSIST_LIMIT);
            (Some(bounded), truncated)
        }
        None => (None, false),
    };

    RequestSummary {
        method: format!("{:?}", prepared.method).to_uppercase(),
        url: redactor.redact_str(&prepared.url),
        headers: redactor.redact_headers(&prepared.headers),
        body,
        body_truncated,
    }
}

/// Append a query string with `?` or `&` depending on what the URL carries.
fn append_query(mut url: String, query: &str) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    url.push(separator);
    url.push_str(query.trim_start_matches(['?', '&']));
    url
}

/// Truncate at a char boundary at or below `limit` bytes.
pub fn truncate_utf8(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}
