//! Common utility functions

use rand::Rng;

/// Generate a slug from a string, keeping only ASCII alphanumerics
pub fn generate_slug(input: &str) -> String {
    input
        .to_lowercase()
        .replace(|c: char| !c.is_ascii_alphanumeric() && c != '-', "-")
        .replace("--", "-")
        .trim_matches('-')
        .to_string()
}

/// Generate a short random lowercase alphanumeric identifier.
///
/// Used where a name must be unique per host but does not need to be
/// derivable, e.g. user-named shared networks.
pub fn random_identifier(len: usize) -> String {
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

/// Check that a name is usable as a docker object name and DNS label:
/// lowercase alphanumerics and '-', not starting or ending with '-',
/// at most 63 characters.
pub fn is_dns_safe_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 63
        && !name.starts_with('-')
        && !name.ends_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// Truncate engine error output so it can be surfaced to users without
/// leaking whole daemon responses.
pub fn summarize_error(message: &str, max_len: usize) -> String {
    let first_line = message.lines().next().unwrap_or("").trim();
    let cleaned = first_line
        .trim_start_matches("Error response from daemon:")
        .trim_start_matches("Error:")
        .trim();
    if cleaned.chars().count() <= max_len {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_len).collect();
        format!("{}…", truncated)
    }
}
