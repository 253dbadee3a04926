//! Syntactic checks for repository names, tags and digests.
//!
//! These are purely character-class checks. An empty string passes all three
//! predicates; callers that turn identifiers into storage keys additionally
//! require [`is_storage_key`].

/// A repository name consists only of ASCII letters.
pub fn is_valid_name(name: &str) -> bool {
    name.chars().all(|c| c.is_ascii_alphabetic())
}

/// A tag consists only of ASCII letters, digits and `.`.
pub fn is_valid_tag(tag: &str) -> bool {
    tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '.')
}

/// A digest consists only of ASCII letters, digits and `:`.
///
/// This does not enforce the `algorithm:hex` shape; a malformed digest simply
/// never equals a computed one.
pub fn is_valid_digest(digest: &str) -> bool {
    digest.chars().all(|c| c.is_ascii_alphanumeric() || c == ':')
}

/// Whether an identifier can name a single entry in a collection.
///
/// Rejects the empty string and dot-only names such as `.` and `..`, which
/// pass [`is_valid_tag`] but would address the collection itself or its parent.
pub fn is_storage_key(key: &str) -> bool {
    !key.is_empty() && key.chars().any(|c| c != '.')
}

/// A syntactically valid repository name that can be used as a storage prefix.
pub(crate) fn repository(name: &str) -> bool {
    is_valid_name(name) && is_storage_key(name)
}

/// A syntactically valid tag that can be used as a storage key.
pub(crate) fn tag(tag: &str) -> bool {
    is_valid_tag(tag) && is_storage_key(tag)
}

/// A syntactically valid digest that can be used as a storage key.
pub(crate) fn digest(digest: &str) -> bool {
    is_valid_digest(digest) && is_storage_key(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_letters_only() {
        for name in ["myapp", "MyApp", "a", "ABCxyz"] {
            assert!(is_valid_name(name), "{name} should be valid");
        }
        for name in ["my1app", "my:app", "my/app", "my app", "app\t", "my.app", "my-app"] {
            assert!(!is_valid_name(name), "{name} should be invalid");
        }
    }

    #[test]
    fn tags() {
        assert!(is_valid_tag("latest"));
        assert!(is_valid_tag("0.0.1"));
        assert!(is_valid_tag("v1.2.3RC1"));
        assert!(!is_valid_tag(":"));
        assert!(!is_valid_tag("/"));
        assert!(!is_valid_tag("v1-beta"));
    }

    #[test]
    fn digests() {
        assert!(is_valid_digest(
            "sha256:f91867a7769436d72e6f4bb68e4e3d240d93d5bc8cd59742298a2a2b3ccf11b7"
        ));
        assert!(!is_valid_digest("0.0.1"));
        assert!(!is_valid_digest("sha256/abc"));
        // Shape is not checked.
        assert!(is_valid_digest("abc"));
        assert!(is_valid_digest("a:b:c"));
    }

    #[test]
    fn empty_is_vacuously_valid_but_not_a_key() {
        assert!(is_valid_name(""));
        assert!(is_valid_tag(""));
        assert!(is_valid_digest(""));
        assert!(!repository(""));
        assert!(!tag(""));
        assert!(!digest(""));
    }

    #[test]
    fn dot_only_tags_are_not_keys() {
        assert!(is_valid_tag(".."));
        assert!(!tag("."));
        assert!(!tag(".."));
        assert!(tag("1.0"));
        assert!(tag(".hidden"));
    }
}
