//! Resource name allocation for challenge instances
//!
//! Names are `{stem}-{token}` where the stem comes from the image's last path
//! segment and the token is 16 random hex characters. No backend state is
//! consulted: with 64 bits of randomness a collision among the instance
//! counts of a single contest is negligible, but it is not excluded.

use std::fmt::Write;

use uuid::Uuid;

/// Number of random hex characters appended to every name
pub const TOKEN_LEN: usize = 16;

/// Maximum length of a DNS-1123 label (Pod/Service names, label values)
pub const MAX_NAME_LEN: usize = 63;

const FALLBACK_STEM: &str = "chal";

/// Allocate a fresh resource name for an instance of `image`
pub fn allocate_name(image: &str) -> String {
    let token = Uuid::new_v4().simple().to_string();
    name_with_token(image, &token[..TOKEN_LEN])
}

/// Build a resource name from an image reference and a given token
pub fn name_with_token(image: &str, token: &str) -> String {
    let max_stem = MAX_NAME_LEN - token.len() - 1;
    let mut stem = sanitize(image_stem(image));
    stem.truncate(max_stem);
    let stem = stem.trim_end_matches('-');

    let stem = match stem.chars().next() {
        None => FALLBACK_STEM.to_string(),
        Some(c) if c.is_ascii_lowercase() => stem.to_string(),
        // Service names must start with a letter
        Some(_) => {
            let mut prefixed = format!("{}-{}", FALLBACK_STEM, stem);
            prefixed.truncate(max_stem);
            prefixed.trim_end_matches('-').to_string()
        }
    };

    format!("{}-{}", stem, token.to_ascii_lowercase())
}

/// Human-readable part of an image reference
///
/// `registry:5000/team/web_chal:v2` -> `web_chal`,
/// `repo/chal@sha256:...` -> `chal`.
pub fn image_stem(image: &str) -> &str {
    let last = image.rsplit('/').next().unwrap_or(image);
    let last = last.split('@').next().unwrap_or(last);
    last.split(':').next().unwrap_or(last)
}

/// Rewrite to lowercase alphanumerics and single hyphens
pub fn sanitize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            out.push(c);
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').to_string()
}

/// Whether `name` is a valid DNS-1035 label (the strictest of the names we create)
pub fn is_dns_label(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name.starts_with(|c: char| c.is_ascii_lowercase())
        && !name.ends_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// Compute a deterministic hash of the input string, returning a 16-char hex digest.
///
/// Truncated SHA-256, stable across toolchains, so it can be persisted in
/// resource names and label values.
pub fn deterministic_hash(input: &str) -> String {
    use aws_lc_rs::digest;
    let hash = digest::digest(&digest::SHA256, input.as_bytes());
    hash.as_ref()[..8]
        .iter()
        .fold(String::with_capacity(16), |mut s, b| {
            let _ = write!(s, "{:02x}", b);
            s
        })
}
