use chrono::{DateTime, Utc};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::lifecycle::PageListener;
use super::state::{ScenarioState, StepRecord};
use super::target::ScenarioBrowser;
use crate::driver::{BrowserContext, Page};

/// Scenario identity handed over by the BDD runner
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScenarioMeta {
    /// Scenario (pickle) name
    pub name: String,
    /// Name of the feature the scenario belongs to
    pub feature_name: String,
    /// Tags, with or without the leading `@`
    pub tags: Vec<String>,
}

impl ScenarioMeta {
    pub fn new(feature_name: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            feature_name: feature_name.to_string(),
            tags: Vec::new(),
        }
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        let tag = tag.trim_start_matches('@');
        self.tags.iter().any(|t| t.trim_start_matches('@') == tag)
    }

    /// `<feature> | <scenario>`, as shown in the report
    pub fn composite_name(&self) -> String {
        format!("{} | {}", self.feature_name, self.name)
    }
}

/// One piece of evidence attached to a scenario
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub media_type: String,
    pub body: String,
}

impl Attachment {
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            media_type: "text/plain".to_string(),
            body: body.into(),
        }
    }

    /// Base64 encoded PNG
    pub fn png(base64: impl Into<String>) -> Self {
        Self {
            media_type: "image/png".to_string(),
            body: base64.into(),
        }
    }
}

/// Attachments in insertion order, serialized as a `key -> body` object
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attachments {
    entries: Vec<(String, Attachment)>,
}

impl Attachments {
    pub fn insert(&mut self, key: impl Into<String>, attachment: Attachment) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = attachment,
            None => self.entries.push((key, attachment)),
        }
    }

    /// Next free `console-<n>` key
    pub fn next_console_key(&self) -> String {
        let count = self
            .entries
            .iter()
            .filter(|(k, _)| k.starts_with("console-"))
            .count();
        format!("console-{}", count + 1)
    }

    pub fn get(&self, key: &str) -> Option<&Attachment> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, a)| a)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Attachment)> {
        self.entries.iter().map(|(k, a)| (k.as_str(), a))
    }
}

impl Serialize for Attachments {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, attachment) in &self.entries {
            map.serialize_entry(key, &attachment.body)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Attachments {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct AttachmentsVisitor;

        impl<'de> Visitor<'de> for AttachmentsVisitor {
            type Value = Attachments;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of attachment bodies")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Attachments, A::Error> {
                let mut attachments = Attachments::default();
                while let Some((key, body)) = access.next_entry::<String, String>()? {
                    let attachment = if key == "screenshot" {
                        Attachment::png(body)
                    } else {
                        Attachment::text(body)
                    };
                    attachments.insert(key, attachment);
                }
                Ok(attachments)
            }
        }

        deserializer.deserialize_map(AttachmentsVisitor)
    }
}

/// The BDD runner's attachment channel
pub trait AttachmentSink: Send + Sync {
    fn attach(&self, scenario: &str, key: &str, attachment: &Attachment);
}

/// Sink that only logs what it receives
pub struct LogSink;

impl AttachmentSink for LogSink {
    fn attach(&self, scenario: &str, key: &str, attachment: &Attachment) {
        log::debug!(
            "[{}] attachment {} ({}, {} bytes)",
            scenario,
            key,
            attachment.media_type,
            attachment.body.len()
        );
    }
}

/// Attachments of one scenario, shared with its console listener
#[derive(Clone)]
pub struct AttachmentLog {
    scenario: String,
    entries: Arc<Mutex<Attachments>>,
    sink: Arc<dyn AttachmentSink>,
}

impl AttachmentLog {
    pub fn new(scenario: &str, sink: Arc<dyn AttachmentSink>) -> Self {
        Self {
            scenario: scenario.to_string(),
            entries: Arc::new(Mutex::new(Attachments::default())),
            sink,
        }
    }

    /// Store an attachment and forward it to the runner
    pub async fn attach(&self, key: impl Into<String>, attachment: Attachment) {
        let key = key.into();
        self.sink.attach(&self.scenario, &key, &attachment);
        self.entries.lock().await.insert(key, attachment);
    }

    pub async fn attach_console(&self, text: &str) {
        let mut entries = self.entries.lock().await;
        let key = entries.next_console_key();
        let attachment = Attachment::text(text);
        self.sink.attach(&self.scenario, &key, &attachment);
        entries.insert(key, attachment);
    }

    pub async fn snapshot(&self) -> Attachments {
        self.entries.lock().await.clone()
    }

    /// Take everything collected so far, leaving the log empty
    pub async fn drain(&self) -> Attachments {
        std::mem::take(&mut *self.entries.lock().await)
    }
}

/// Everything that belongs to one in-flight scenario
///
/// Created by the scenario-start hook and consumed by the scenario-end hook.
/// Each scenario gets its own instance, so scenarios running on different
/// workers never share accumulators.
pub struct ScenarioContext {
    pub meta: ScenarioMeta,
    pub slug: String,
    pub start_time: DateTime<Utc>,
    /// Set by the `@debug` tag
    pub debug: bool,
    /// Set by the `@ignore` tag; the runner must skip every step
    pub ignored: bool,
    /// Recording directory, when video capture is on
    pub video_dir: Option<PathBuf>,
    /// Grid-assigned build and test ids, remote runs only
    pub grid_build_id: Option<String>,
    pub grid_test_id: Option<String>,
    pub(crate) state: ScenarioState,
    pub(crate) steps: Vec<StepRecord>,
    pub(crate) attachments: AttachmentLog,
    pub(crate) browser: Option<ScenarioBrowser>,
    pub(crate) context: Option<Box<dyn BrowserContext>>,
    pub(crate) page: Option<Box<dyn Page>>,
    pub(crate) listener: Option<PageListener>,
}

impl ScenarioContext {
    pub fn phase(&self) -> super::state::ScenarioPhase {
        self.state.phase()
    }

    /// Steps recorded so far
    pub fn step_log(&self) -> &[StepRecord] {
        &self.steps
    }

    pub async fn attachments(&self) -> Attachments {
        self.attachments.snapshot().await
    }

    /// Attach free-form evidence from a step definition
    pub async fn attach(&self, key: impl Into<String>, attachment: Attachment) {
        self.attachments.attach(key, attachment).await;
    }

    pub fn page(&self) -> Option<&dyn Page> {
        self.page.as_deref()
    }

    /// Whether page, context and owned browser have all been released
    pub fn is_released(&self) -> bool {
        self.page.is_none() && self.context.is_none() && self.browser.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_with_or_without_at() {
        let meta = ScenarioMeta::new("Auth", "Login").with_tags(&["@debug", "smoke"]);
        assert!(meta.has_tag("debug"));
        assert!(meta.has_tag("@smoke"));
        assert!(!meta.has_tag("ignore"));
        assert_eq!(meta.composite_name(), "Auth | Login");
    }

    #[test]
    fn test_attachments_keep_order_and_serialize_as_map() {
        let mut attachments = Attachments::default();
        attachments.insert("status", Attachment::text("Status: passed. Duration:1s"));
        let key = attachments.next_console_key();
        attachments.insert(key, Attachment::text("hello"));
        let key = attachments.next_console_key();
        attachments.insert(key, Attachment::text("world"));

        assert_eq!(
            serde_json::to_string(&attachments).unwrap(),
            r#"{"status":"Status: passed. Duration:1s","console-1":"hello","console-2":"world"}"#
        );
    }

    #[tokio::test]
    async fn test_attachment_log_drain_resets() {
        let log = AttachmentLog::new("Login", Arc::new(LogSink));
        log.attach_console("one").await;
        log.attach("status", Attachment::text("ok")).await;

        let drained = log.drain().await;
        assert_eq!(drained.len(), 2);
        assert!(log.snapshot().await.is_empty());
    }
}
