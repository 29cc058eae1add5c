mod driver;
mod trace;

pub use driver::PlaywrightEngine;
