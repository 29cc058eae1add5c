pub mod memory;
pub mod traits;
pub mod web;

pub use traits::{
    Browser, BrowserContext, BrowserEngine, BrowserKind, ContextOptions, LaunchOptions, Page,
    PageEvent, TraceOptions, Viewport,
};

use anyhow::Result;
use std::sync::Arc;

/// Create the engine that drives real browsers
pub async fn default_engine() -> Result<Arc<dyn BrowserEngine>> {
    Ok(Arc::new(web::PlaywrightEngine::initialize().await?))
}
