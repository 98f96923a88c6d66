//! Lookups over Nostr tag arrays.
//!
//! A tag is a small array where position 0 names the tag and the following
//! positions carry data, e.g. `["e", "<event id>", "<relay>", "reply"]`.
//! Keys are compared case-sensitively: `p` and `P` are different tags.

/// Value at position 1 of the first tag whose key is `key`.
///
/// Only the first matching tag is visible; use [`values_of`] when every
/// occurrence matters.
///
/// # Example
///
/// ```
/// use glean_nostr::value_of;
///
/// let tags = vec![
///     vec!["t".to_string(), "rust".to_string()],
///     vec!["t".to_string(), "nostr".to_string()],
/// ];
/// assert_eq!(value_of(&tags, "t"), Some("rust"));
/// assert_eq!(value_of(&tags, "T"), None);
/// ```
pub fn value_of<'a>(tags: &'a [Vec<String>], key: &str) -> Option<&'a str> {
    tags.iter()
        .find(|tag| tag.first().map(String::as_str) == Some(key))
        .and_then(|tag| tag.get(1))
        .map(String::as_str)
}

/// Position 1 of every tag whose key is `key`, in tag order.
pub fn values_of<'a>(tags: &'a [Vec<String>], key: &str) -> Vec<&'a str> {
    tags.iter()
        .filter(|tag| tag.first().map(String::as_str) == Some(key))
        .filter_map(|tag| tag.get(1))
        .map(String::as_str)
        .collect()
}

/// Value of the first `key` tag carrying `marker` at position 3.
///
/// NIP-10 marks `e` tags as `root`, `reply` or `mention` in that slot.
pub fn marked_value<'a>(tags: &'a [Vec<String>], key: &str, marker: &str) -> Option<&'a str> {
    tags.iter()
        .filter(|tag| tag.first().map(String::as_str) == Some(key))
        .find(|tag| tag.get(3).map(String::as_str) == Some(marker))
        .and_then(|tag| tag.get(1))
        .map(String::as_str)
}

/// Reply target under the older positional NIP-10 scheme: the last `e` tag.
///
/// Only applies when no `e` tag carries a marker; otherwise markers decide
/// and this returns `None`.
pub fn positional_reply(tags: &[Vec<String>]) -> Option<&str> {
    let e_tags: Vec<&Vec<String>> = tags
        .iter()
        .filter(|tag| tag.first().map(String::as_str) == Some("e"))
        .collect();
    if e_tags
        .iter()
        .any(|tag| tag.get(3).is_some_and(|marker| !marker.is_empty()))
    {
        return None;
    }
    e_tags.last().and_then(|tag| tag.get(1)).map(String::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(raw: &[&[&str]]) -> Vec<Vec<String>> {
        raw.iter()
            .map(|t| t.iter().map(|s| s.to_string()).collect())
            .collect()
    }

    #[test]
    fn test_value_of_first_match() {
        let t = tags(&[&["e", "first"], &["e", "second"]]);
        assert_eq!(value_of(&t, "e"), Some("first"));
    }

    #[test]
    fn test_value_of_absent() {
        let t = tags(&[&["e", "x"]]);
        assert_eq!(value_of(&t, "p"), None);
        assert_eq!(value_of(&[], "p"), None);
    }

    #[test]
    fn test_value_of_case_sensitive() {
        let t = tags(&[&["P", "payer"], &["p", "payee"]]);
        assert_eq!(value_of(&t, "p"), Some("payee"));
        assert_eq!(value_of(&t, "P"), Some("payer"));
    }

    #[test]
    fn test_value_of_key_only_tag() {
        // A key with no value does not match a later valued tag
        let t = tags(&[&["title"], &["title", "later"]]);
        assert_eq!(value_of(&t, "title"), None);
    }

    #[test]
    fn test_value_of_skips_empty_tag() {
        let t = tags(&[&[], &["d", "slug"]]);
        assert_eq!(value_of(&t, "d"), Some("slug"));
    }

    #[test]
    fn test_values_of() {
        let t = tags(&[&["t", "a"], &["p", "x"], &["t", "b"], &["t"]]);
        assert_eq!(values_of(&t, "t"), vec!["a", "b"]);
        assert!(values_of(&t, "q").is_empty());
    }

    #[test]
    fn test_marked_value() {
        let t = tags(&[
            &["e", "root-id", "", "root"],
            &["e", "reply-id", "wss://relay", "reply"],
            &["e", "mention-id"],
        ]);
        assert_eq!(marked_value(&t, "e", "reply"), Some("reply-id"));
        assert_eq!(marked_value(&t, "e", "root"), Some("root-id"));
        assert_eq!(marked_value(&t, "e", "mention"), None);
    }

    #[test]
    fn test_positional_reply_is_last_unmarked_e() {
        let t = tags(&[&["e", "root"], &["e", "mention"], &["e", "parent", "wss://r"]]);
        assert_eq!(positional_reply(&t), Some("parent"));
        assert_eq!(positional_reply(&tags(&[&["e", "only"]])), Some("only"));
        assert_eq!(positional_reply(&tags(&[&["p", "pk"]])), None);
    }

    #[test]
    fn test_positional_reply_defers_to_markers() {
        let t = tags(&[&["e", "root", "", "root"], &["e", "other"]]);
        assert_eq!(positional_reply(&t), None);
    }
}
