//! Stable artifact names.
//!
//! `<kind>/<YYYYMMDDTHHMMSSZ>_<product>[_<region>].<ext>`, with `notime` in
//! place of the timestamp when the file carries none.

use chrono::{DateTime, Utc};

use crate::types::CompletedFile;

const NO_TIME: &str = "notime";

/// Keep `[A-Za-z0-9._-]`, replace everything else with `_`.
pub fn sanitize(part: &str) -> String {
    let cleaned: String = part
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '_' })
        .collect();
    // no hidden files or parent references
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() { "_".to_string() } else { cleaned.to_string() }
}

pub fn timestamp_part(time: Option<DateTime<Utc>>) -> String {
    time.map(|t| t.format("%Y%m%dT%H%M%SZ").to_string()).unwrap_or_else(|| NO_TIME.to_string())
}

/// Product code used when a file carries no better identification.
pub fn fallback_product(file: &CompletedFile) -> String {
    format!("vc{}-apid{}-f{}", file.vcid, file.apid, file.file_counter)
}

pub fn artifact_name(
    kind: &str,
    time: Option<DateTime<Utc>>,
    product: &str,
    region: Option<&str>,
    extension: &str,
) -> String {
    let mut name = format!("{}/{}_{}", kind, timestamp_part(time), sanitize(product));
    if let Some(region) = region.filter(|r| !r.trim().is_empty()) {
        name.push('_');
        name.push_str(&sanitize(region));
    }
    name.push('.');
    name.push_str(&sanitize(extension));
    name
}

/// `image/x.jpg` with suffix 2 becomes `image/x-2.jpg`.
pub fn with_suffix(name: &str, suffix: u32) -> String {
    let file_start = name.rfind('/').map(|i| i + 1).unwrap_or(0);
    match name[file_start..].rfind('.') {
        Some(dot) if dot > 0 => {
            let dot = file_start + dot;
            format!("{}-{}{}", &name[..dot], suffix, &name[dot..])
        }
        _ => format!("{}-{}", name, suffix),
    }
}
