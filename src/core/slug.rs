use once_cell::sync::Lazy;
use regex::Regex;

static NON_SLUG_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\p{L}\p{N}]+").expect("static slug pattern"));

/// Normalize free text into a slug: lowercase, runs of anything that is not a letter or
/// digit collapse to a single `-`, no leading or trailing dashes.
pub fn slugify(input: &str) -> String {
    let lowered = input.trim().to_lowercase();
    NON_SLUG_CHARS
        .replace_all(&lowered, "-")
        .trim_matches('-')
        .to_string()
}

/// Candidate for the n-th collision of `base` (`n` starts at 2)
pub fn with_suffix(base: &str, n: u32) -> String {
    format!("{}-{}", base, n)
}
