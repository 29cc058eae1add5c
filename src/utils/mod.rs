pub mod config;

pub use config::{Config, GridCredentials};

/// Turn a scenario name into a filesystem and URL safe slug.
///
/// Every character outside `[A-Za-z0-9_]` becomes one `-` per UTF-16 code
/// unit, so characters outside the BMP (emoji) become `--`.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            slug.push(c);
        } else {
            slug.extend(std::iter::repeat('-').take(c.len_utf16()));
        }
    }
    slug
}

/// ISO-8601 timestamp without fractional seconds and with `:` replaced by `_`
pub fn filesystem_timestamp(time: &chrono::DateTime<chrono::Utc>) -> String {
    time.format("%Y-%m-%dT%H_%M_%S").to_string()
}
