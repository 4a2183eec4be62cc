//! `%s` placeholder substitution.
//!
//! The query is tokenized into literal runs and placeholder positions in a
//! single scan, then escaped literals are spliced in positionally. Spliced
//! text is never re-scanned, so a parameter whose escaped form contains
//! `%s` stays inert.
use crate::common::unit_error;

unit_error! {
    /// Placeholder count does not match the argument count.
    pub struct BindError("placeholder count does not match parameter count");
}

/// Splice escaped literals into the `%s` placeholders of `query`.
///
/// `%%` collapses to a literal `%`; a `%` not followed by `s` or `%` stays
/// as-is.
pub fn bind(query: &str, literals: &[String]) -> Result<String, BindError> {
    let mut out = String::with_capacity(query.len() + literals.iter().map(String::len).sum::<usize>());
    let mut args = literals.iter();
    let mut chars = query.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some('s') => {
                chars.next();
                out.push_str(args.next().ok_or(BindError)?);
            }
            Some('%') => {
                chars.next();
                out.push('%');
            }
            _ => out.push('%'),
        }
    }

    // every argument must be consumed
    if args.next().is_some() {
        return Err(BindError);
    }
    Ok(out)
}

#[cfg(test)]
mod test {
    use super::*;

    fn lits(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn splices_positionally() {
        let out = bind("INSERT INTO t VALUES (%s,%s)", &lits(&["'2'", "'test2'"])).unwrap();
        assert_eq!(out, "INSERT INTO t VALUES ('2','test2')");
    }

    #[test]
    fn no_placeholders() {
        assert_eq!(bind("SELECT 1", &[]).unwrap(), "SELECT 1");
    }

    #[test]
    fn doubled_percent_is_literal() {
        let out = bind("SELECT 'a' LIKE '%%a%%', %s", &lits(&["'x'"])).unwrap();
        assert_eq!(out, "SELECT 'a' LIKE '%a%', 'x'");
    }

    #[test]
    fn lone_percent_survives() {
        assert_eq!(bind("SELECT 10 % 3", &[]).unwrap(), "SELECT 10 % 3");
        assert_eq!(bind("SELECT '100%'", &[]).unwrap(), "SELECT '100%'");
    }

    #[test]
    fn spliced_literal_is_not_rescanned() {
        let out = bind("SELECT %s, %s", &lits(&["'%s'", "'50%%'"])).unwrap();
        assert_eq!(out, "SELECT '%s', '50%%'");
    }

    #[test]
    fn count_mismatch() {
        assert!(bind("SELECT %s", &[]).is_err());
        assert!(bind("SELECT %s", &lits(&["'a'", "'b'"])).is_err());
        assert!(bind("SELECT 1", &lits(&["'a'"])).is_err());
    }
}
