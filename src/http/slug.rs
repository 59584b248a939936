//! Title-to-URL slug normalization (spec §6): runs of punctuation/whitespace
//! become a single `-`, edges are trimmed, everything is case-folded.
//! Non-ASCII word characters pass through unchanged (case-folded), so this
//! is not an ASCII-only transliteration.

/// Normalize a project title into a URL/filename-safe slug.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut last_was_sep = true; // swallow leading separators
    for ch in title.chars() {
        if ch.is_alphanumeric() {
            for lower in ch.to_lowercase() {
                slug.push(lower);
            }
            last_was_sep = false;
        } else if !last_was_sep {
            slug.push('-');
            last_was_sep = true;
        }
    }
    if slug.ends_with('-') {
        slug.pop();
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_title_with_punctuation_and_digits() {
        assert_eq!(
            slugify("BBC 14/01/2015 EU lawyer approves ECB bond-buying programme"),
            "bbc-14-01-2015-eu-lawyer-approves-ecb-bond-buying-programme"
        );
    }

    #[test]
    fn unicode_words_pass_through_case_folded() {
        assert_eq!(slugify("български език"), "български-език");
    }

    #[test]
    fn repeated_separators_collapse() {
        assert_eq!(slugify("a   -- b"), "a-b");
    }

    #[test]
    fn leading_and_trailing_punctuation_trimmed() {
        assert_eq!(slugify("  !!Hello World??  "), "hello-world");
    }
}
