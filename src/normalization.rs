use unicode_normalization::UnicodeNormalization;

/// Returns true for combining marks left behind by canonical decomposition.
fn is_combining_mark(ch: char) -> bool {
    matches!(ch as u32, 0x0300..=0x036F | 0x1AB0..=0x1AFF | 0x1DC0..=0x1DFF | 0x20D0..=0x20FF)
}

/// Canonical form used for every substring and alias comparison.
///
/// Accents are stripped, text is lowercased and each run of characters outside
/// `[a-z0-9]` collapses to a single space. The result is trimmed.
pub fn normalize(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut pending_space = false;

    for ch in text.nfd().filter(|c| !is_combining_mark(*c)) {
        for lower in ch.to_lowercase() {
            if lower.is_ascii_lowercase() || lower.is_ascii_digit() {
                if pending_space && !result.is_empty() {
                    result.push(' ');
                }
                pending_space = false;
                result.push(lower);
            } else {
                pending_space = true;
            }
        }
    }

    result
}

/// Normalizes every entry of a keyword list, dropping entries that fold to nothing.
pub fn normalize_all(tokens: &[String]) -> Vec<String> {
    tokens
        .iter()
        .map(|t| normalize(t))
        .filter(|t| !t.is_empty())
        .collect()
}

/// Collapses all whitespace runs (including newlines) to one space.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
