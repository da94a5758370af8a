//! Transcript hygiene applied by engines to their final text.

/// Collapse immediate word repetitions, case-insensitively: "foi foi foi bom"
/// becomes "foi bom". Recognition engines stutter on re-decoded phrase
/// boundaries; rendering keeps the first occurrence.
pub fn collapse_repeated_words(text: &str) -> String {
    let mut kept: Vec<&str> = Vec::new();
    for word in text.split_whitespace() {
        if let Some(prev) = kept.last() {
            if prev.to_lowercase() == word.to_lowercase() {
                continue;
            }
        }
        kept.push(word);
    }
    kept.join(" ")
}
