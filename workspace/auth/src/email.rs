/// Lowercase the domain part of an email address.
///
/// The domain is everything after the last `@`. The local part is left
/// byte-for-byte intact, so quoted or escaped local parts such as
/// `Abc\@DEF@EXAMPLE.com` and addresses with whitespace before the `@`
/// survive. Surrounding whitespace is trimmed when an `@` is present; a
/// value without any `@` is returned unchanged.
pub fn normalize_email(email: &str) -> String {
    match email.trim().rsplit_once('@') {
        Some((local, domain)) => format!("{}@{}", local, domain.to_lowercase()),
        None => email.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::plain("normal@DOMAIN.COM", "normal@domain.com")]
    #[case::escaped_at(r"Abc\@DEF@EXAMPLE.com", r"Abc\@DEF@example.com")]
    #[case::whitespace_local(r"email\ with_whitespace@D.COM", r"email\ with_whitespace@d.com")]
    #[case::local_case_kept("John.Smith@Example.ORG", "John.Smith@example.org")]
    #[case::unicode_domain("jöhn@ÉXAMPLE.com", "jöhn@éxample.com")]
    #[case::surrounding_space("  user@HOST.io ", "user@host.io")]
    fn test_normalize_email(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalize_email(input), expected);
    }

    #[test]
    fn test_normalize_email_without_at_is_unchanged() {
        assert_eq!(normalize_email("not-an-address"), "not-an-address");
        assert_eq!(normalize_email(""), "");
    }
}
