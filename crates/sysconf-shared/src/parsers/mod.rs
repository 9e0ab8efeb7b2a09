//! Parsers and renderers for the line-oriented system files the daemon edits.
//!
//! Each parser is lossless for the lines it does not own: rendering a parsed
//! file without changes reproduces the original content.

pub mod ntp_conf;
pub mod passwd;
pub mod shadow;

pub use ntp_conf::{parse_servers, render_ntp_conf};
pub use passwd::PasswdEntry;
pub use shadow::ShadowEntry;

/// Split a colon-separated database into its entries, skipping blank lines.
fn parse_db<T, E>(
    content: &str,
    parse: impl Fn(&str) -> Result<T, E>,
) -> Result<Vec<T>, E> {
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(parse)
        .collect()
}

fn render_db<T: std::fmt::Display>(entries: &[T]) -> String {
    let mut out = String::new();
    for entry in entries {
        out.push_str(&entry.to_string());
        out.push('\n');
    }
    out
}
