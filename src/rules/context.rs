//! Per-event request context extraction and the rule work item.

use serde_json::Value;
use uuid::Uuid;

use crate::data::models::{AlertMode, Event};

/// Request-level metadata pulled out of one browser event.
#[derive(Debug, Clone, Default)]
pub struct EventContext {
    pub request_url: Option<String>,
    pub referer: Option<String>,
    pub attribution_url: Option<String>,
    pub user_agent: Option<String>,
}

impl EventContext {
    /// Extract request context from an event.
    ///
    /// The request URL is taken from `request.url`, then top-level `url`,
    /// then `response.url`. The referer comes from request headers,
    /// matched case-insensitively under either spelling. Attribution
    /// fields live in the event metadata's `attribution` object.
    pub fn from_event(event: &Event) -> Self {
        let data = &event.event_data;

        let request_url = string_at(data, &["request", "url"])
            .or_else(|| string_at(data, &["url"]))
            .or_else(|| string_at(data, &["response", "url"]));

        let referer = data
            .get("request")
            .and_then(|request| request.get("headers"))
            .and_then(Value::as_object)
            .and_then(|headers| {
                headers.iter().find_map(|(name, value)| {
                    let name = name.to_ascii_lowercase();
                    if name == "referer" || name == "referrer" {
                        value.as_str().map(str::to_owned)
                    } else {
                        None
                    }
                })
            });

        let attribution = event.metadata.get("attribution");
        let attribution_url = attribution
            .and_then(|a| a.get("url"))
            .and_then(Value::as_str)
            .map(str::to_owned);
        let user_agent = attribution
            .and_then(|a| a.get("userAgent"))
            .and_then(Value::as_str)
            .map(str::to_owned);

        EventContext {
            request_url,
            referer,
            attribution_url,
            user_agent,
        }
    }
}

fn string_at(value: &Value, path: &[&str]) -> Option<String> {
    let mut cursor = value;
    for segment in path {
        cursor = cursor.get(segment)?;
    }
    cursor.as_str().map(str::to_owned)
}

/// Everything a rule needs to evaluate one event.
#[derive(Debug, Clone)]
pub struct RuleWorkItem {
    pub event_id: Uuid,
    pub event_type: String,
    pub context: EventContext,
    /// Normalized domain extracted from the request context.
    pub domain: String,
    pub site_id: Uuid,
    pub scope: String,
    pub dry_run: bool,
    pub alert_mode: AlertMode,
    pub job_id: Uuid,
}

/// Pulls a normalized domain out of an event's request context.
///
/// Injected so tests and alternative deployments can swap normalization
/// strategies without touching the engine.
pub trait DomainExtractor: Send + Sync {
    fn extract(&self, context: &EventContext) -> Option<String>;
}

/// Default extractor: parse the request URL and lowercase its host.
pub struct UrlDomainExtractor;

impl DomainExtractor for UrlDomainExtractor {
    fn extract(&self, context: &EventContext) -> Option<String> {
        let raw = context.request_url.as_deref()?;
        let parsed = url::Url::parse(raw).ok()?;
        parsed.host_str().map(|host| host.to_ascii_lowercase())
    }
}

/// Domain of the referer header, for referer-pair allow-list checks.
pub fn referer_domain(context: &EventContext) -> Option<String> {
    let raw = context.referer.as_deref()?;
    let parsed = url::Url::parse(raw).ok()?;
    parsed.host_str().map(|host| host.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn make_event(event_data: Value, metadata: Value) -> Event {
        Event {
            id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            source_job_id: None,
            event_type: "Network.request".into(),
            event_data,
            metadata,
            priority: 50,
            should_process: true,
            processed: false,
            storage_key: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn request_url_prefers_request_then_top_level_then_response() {
        let event = make_event(
            json!({
                "request": {"url": "https://a.test/x"},
                "url": "https://b.test/y",
                "response": {"url": "https://c.test/z"},
            }),
            json!({}),
        );
        assert_eq!(
            EventContext::from_event(&event).request_url.as_deref(),
            Some("https://a.test/x")
        );

        let event = make_event(
            json!({"url": "https://b.test/y", "response": {"url": "https://c.test/z"}}),
            json!({}),
        );
        assert_eq!(
            EventContext::from_event(&event).request_url.as_deref(),
            Some("https://b.test/y")
        );

        let event = make_event(json!({"response": {"url": "https://c.test/z"}}), json!({}));
        assert_eq!(
            EventContext::from_event(&event).request_url.as_deref(),
            Some("https://c.test/z")
        );
    }

    #[test]
    fn referer_header_matches_case_insensitively_and_both_spellings() {
        let event = make_event(
            json!({"request": {"url": "https://a.test", "headers": {"ReFeRer": "https://origin.test/page"}}}),
            json!({}),
        );
        assert_eq!(
            EventContext::from_event(&event).referer.as_deref(),
            Some("https://origin.test/page")
        );

        let event = make_event(
            json!({"request": {"url": "https://a.test", "headers": {"Referrer": "https://other.test"}}}),
            json!({}),
        );
        assert_eq!(
            EventContext::from_event(&event).referer.as_deref(),
            Some("https://other.test")
        );
    }

    #[test]
    fn attribution_fields_come_from_metadata() {
        let event = make_event(
            json!({"url": "https://a.test"}),
            json!({"attribution": {"url": "https://site.test", "userAgent": "mmk-browser"}}),
        );
        let context = EventContext::from_event(&event);
        assert_eq!(context.attribution_url.as_deref(), Some("https://site.test"));
        assert_eq!(context.user_agent.as_deref(), Some("mmk-browser"));
    }

    #[test]
    fn url_extractor_lowercases_host() {
        let context = EventContext {
            request_url: Some("https://CDN.Example.TEST/asset.js".into()),
            ..Default::default()
        };
        assert_eq!(
            UrlDomainExtractor.extract(&context).as_deref(),
            Some("cdn.example.test")
        );
    }

    #[test]
    fn url_extractor_rejects_unparseable_urls() {
        let context = EventContext {
            request_url: Some("not a url".into()),
            ..Default::default()
        };
        assert_eq!(UrlDomainExtractor.extract(&context), None);
    }

    #[test]
    fn referer_domain_parses_host() {
        let context = EventContext {
            referer: Some("https://Origin.Test/page?x=1".into()),
            ..Default::default()
        };
        assert_eq!(referer_domain(&context).as_deref(), Some("origin.test"));
    }
}
