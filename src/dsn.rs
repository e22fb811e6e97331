use thiserror::Error;

#[derive(Error, Debug)]
pub enum DsnError {
    #[error("Malformed DSN parameter: {0}")]
    MalformedParam(String),
}

/// Parsed data source name of the form `file:<filename>[?<k>=<v>[&<k>=<v>...]]`.
///
/// Repeated parameter keys are retained in insertion order. The empty string
/// is a valid DSN denoting the default in-memory database.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dsn {
    filename: String,
    params: Vec<(String, String)>,
}

impl Dsn {
    /// Parse a DSN string
    pub fn parse(dsn: &str) -> Result<Self, DsnError> {
        let rest = dsn.strip_prefix("file:").unwrap_or(dsn);

        let (filename, query) = match rest.split_once('?') {
            Some((f, q)) => (f, Some(q)),
            None => (rest, None),
        };

        let mut params = Vec::new();
        if let Some(query) = query {
            for pair in query.split('&').filter(|p| !p.is_empty()) {
                let (key, value) = pair
                    .split_once('=')
                    .ok_or_else(|| DsnError::MalformedParam(pair.to_string()))?;
                params.push((key.to_string(), value.to_string()));
            }
        }

        Ok(Self {
            filename: filename.to_string(),
            params,
        })
    }

    /// The filename component (may be `:memory:` or empty)
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Replace the filename component
    pub fn set_filename(&mut self, filename: &str) {
        self.filename = filename.strip_prefix("file:").unwrap_or(filename).to_string();
    }

    /// Append a parameter, preserving duplicates
    pub fn add_param(&mut self, key: &str, value: &str) {
        self.params.push((key.to_string(), value.to_string()));
    }

    /// Look up a parameter; the last occurrence wins
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Format back to a DSN string, losslessly up to parameter key ordering
    pub fn format(&self) -> String {
        let mut out = format!("file:{}", self.filename);
        for (i, (key, value)) in self.params.iter().enumerate() {
            out.push(if i == 0 { '?' } else { '&' });
            out.push_str(key);
            out.push('=');
            out.push_str(value);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_format() {
        let cases = [
            "",
            "file:test.db",
            "file::memory:?cache=shared&mode=memory",
            "file:test.db?p1=v1&p2=v2&p1=v3",
        ];

        for case in cases {
            let dsn = Dsn::parse(case).unwrap();
            // Formatting then reparsing yields the same parse
            let reparsed = Dsn::parse(&dsn.format()).unwrap();
            assert_eq!(reparsed, dsn, "round trip failed for {:?}", case);
        }
    }

    #[test]
    fn test_empty_dsn() {
        let dsn = Dsn::parse("").unwrap();
        assert_eq!(dsn.filename(), "");
        assert_eq!(dsn.format(), "file:");
    }

    #[test]
    fn test_duplicate_params_preserved() {
        let dsn = Dsn::parse("file:test.db?p1=v1&p2=v2&p1=v3").unwrap();
        assert_eq!(dsn.format(), "file:test.db?p1=v1&p2=v2&p1=v3");
        // Last occurrence wins on lookup
        assert_eq!(dsn.param("p1"), Some("v3"));
        assert_eq!(dsn.param("p2"), Some("v2"));
        assert_eq!(dsn.param("p3"), None);
    }

    #[test]
    fn test_set_filename_and_add_param() {
        let mut dsn = Dsn::parse("file:test.db").unwrap();

        dsn.set_filename("file:/dev/null");
        assert_eq!(dsn.filename(), "/dev/null");

        dsn.add_param("key", "value");
        assert_eq!(dsn.format(), "file:/dev/null?key=value");

        dsn.add_param("key", "value2");
        assert_eq!(dsn.format(), "file:/dev/null?key=value&key=value2");
        assert_eq!(dsn.param("key"), Some("value2"));
    }

    #[test]
    fn test_memory_dsn() {
        let dsn = Dsn::parse("file::memory:?cache=shared&mode=memory").unwrap();
        assert_eq!(dsn.filename(), ":memory:");
        assert_eq!(dsn.param("cache"), Some("shared"));
        assert_eq!(dsn.param("mode"), Some("memory"));
    }

    #[test]
    fn test_malformed_param() {
        assert!(Dsn::parse("file:test.db?novalue").is_err());
    }
}
