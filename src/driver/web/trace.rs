//! Trace capture for Playwright contexts
//!
//! The bindings do not expose Playwright's tracing channel, so traces are
//! assembled here: a manifest of page events plus screenshots and DOM
//! snapshots, zipped into one archive.

use anyhow::Result;
use chrono::{DateTime, Utc};
use playwright::api as pw;
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use tokio::sync::Mutex;

use crate::driver::traits::{PageEvent, TraceOptions};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TraceEntry {
    at: DateTime<Utc>,
    kind: String,
    detail: String,
}

#[derive(Debug)]
struct TraceSession {
    options: TraceOptions,
    started_at: DateTime<Utc>,
    entries: Vec<TraceEntry>,
    /// (file name inside the archive, content)
    files: Vec<(String, Vec<u8>)>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TraceManifest<'a> {
    started_at: DateTime<Utc>,
    stopped_at: DateTime<Utc>,
    screenshots: bool,
    snapshots: bool,
    entries: &'a [TraceEntry],
    files: Vec<&'a str>,
}

/// Collects trace material for one browser context
#[derive(Debug, Default)]
pub struct TraceRecorder {
    session: Mutex<Option<TraceSession>>,
}

impl TraceRecorder {
    pub async fn start(&self, options: TraceOptions) {
        *self.session.lock().await = Some(TraceSession {
            options,
            started_at: Utc::now(),
            entries: Vec::new(),
            files: Vec::new(),
        });
    }

    pub async fn record_event(&self, event: &PageEvent) {
        let mut guard = self.session.lock().await;
        let Some(session) = guard.as_mut() else {
            return;
        };
        let (kind, detail) = match event {
            PageEvent::Console { kind, text } => (format!("console.{}", kind), text.clone()),
            PageEvent::Response { url, status } => ("response".to_string(), format!("{} {}", status, url)),
        };
        session.entries.push(TraceEntry {
            at: Utc::now(),
            kind,
            detail,
        });
    }

    /// Add a screenshot and/or DOM snapshot of `page`, as the options allow
    pub async fn capture(&self, page: &pw::Page) {
        let options = match self.session.lock().await.as_ref() {
            Some(session) => session.options,
            None => return,
        };

        let mut files = Vec::new();
        let index = Utc::now().timestamp_millis();
        if options.screenshots {
            match page
                .screenshot_builder()
                .r#type(pw::ScreenshotType::Png)
                .screenshot()
                .await
            {
                Ok(bytes) => files.push((format!("screenshots/{}.png", index), bytes)),
                Err(e) => log::debug!("Trace screenshot skipped: {}", e),
            }
        }
        if options.snapshots {
            match page
                .evaluate::<(), String>("() => document.documentElement.outerHTML", ())
                .await
            {
                Ok(html) => files.push((format!("snapshots/{}.html", index), html.into_bytes())),
                Err(e) => log::debug!("Trace snapshot skipped: {}", e),
            }
        }

        if let Some(session) = self.session.lock().await.as_mut() {
            session.files.extend(files);
        }
    }

    pub async fn discard(&self) {
        self.session.lock().await.take();
    }

    /// Stop the session and write it as a zip archive at `path`
    pub async fn write(&self, path: &Path) -> Result<()> {
        let Some(session) = self.session.lock().await.take() else {
            anyhow::bail!("tracing was not started");
        };
        write_archive(&session, Utc::now(), path)
    }
}

fn write_archive(session: &TraceSession, stopped_at: DateTime<Utc>, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let manifest = TraceManifest {
        started_at: session.started_at,
        stopped_at,
        screenshots: session.options.screenshots,
        snapshots: session.options.snapshots,
        entries: &session.entries,
        files: session.files.iter().map(|(name, _)| name.as_str()).collect(),
    };

    let file = std::fs::File::create(path)?;
    let mut zip = zip::ZipWriter::new(file);
    let options =
        zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    zip.start_file("trace.json", options)?;
    zip.write_all(&serde_json::to_vec_pretty(&manifest)?)?;
    for (name, bytes) in &session.files {
        zip.start_file(name.as_str(), options)?;
        zip.write_all(bytes)?;
    }
    zip.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_write_archive_contains_manifest_and_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("scenario-trace.zip");
        let session = TraceSession {
            options: TraceOptions {
                screenshots: true,
                snapshots: true,
            },
            started_at: Utc::now(),
            entries: vec![TraceEntry {
                at: Utc::now(),
                kind: "console.log".to_string(),
                detail: "ready".to_string(),
            }],
            files: vec![("snapshots/1.html".to_string(), b"<html></html>".to_vec())],
        };

        write_archive(&session, Utc::now(), &path).unwrap();

        let mut archive = zip::ZipArchive::new(std::fs::File::open(&path).unwrap()).unwrap();
        assert_eq!(archive.len(), 2);

        let mut manifest = String::new();
        archive
            .by_name("trace.json")
            .unwrap()
            .read_to_string(&mut manifest)
            .unwrap();
        let manifest: serde_json::Value = serde_json::from_str(&manifest).unwrap();
        assert_eq!(manifest["entries"][0]["detail"], "ready");
        assert_eq!(manifest["files"][0], "snapshots/1.html");
    }

    #[tokio::test]
    async fn test_events_ignored_until_started() {
        let recorder = TraceRecorder::default();
        recorder
            .record_event(&PageEvent::Console {
                kind: "log".to_string(),
                text: "early".to_string(),
            })
            .await;
        assert!(recorder.session.lock().await.is_none());

        recorder
            .start(TraceOptions {
                screenshots: true,
                snapshots: false,
            })
            .await;
        recorder
            .record_event(&PageEvent::Response {
                url: "https://example.com".to_string(),
                status: 200,
            })
            .await;
        let guard = recorder.session.lock().await;
        assert_eq!(guard.as_ref().unwrap().entries.len(), 1);
    }
}
