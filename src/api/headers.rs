// Multi-valued request headers keyed by canonical header name.

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Headers {
    entries: Vec<(String, Vec<String>)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `value` under the canonical form of `key`; earlier values stay.
    pub fn add(&mut self, key: &str, value: impl Into<String>) -> &mut Self {
        let key = canonical_header_key(key);
        let value = value.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, values)) => values.push(value),
            None => self.entries.push((key, vec![value])),
        }
        self
    }

    /// Replaces every value under the canonical form of `key`.
    pub fn set(&mut self, key: &str, value: impl Into<String>) -> &mut Self {
        let key = canonical_header_key(key);
        let value = value.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, values)) => *values = vec![value],
            None => self.entries.push((key, vec![value])),
        }
        self
    }

    pub fn get_all(&self, key: &str) -> &[String] {
        let key = canonical_header_key(key);
        self.entries
            .iter()
            .find(|(existing, _)| *existing == key)
            .map(|(_, values)| values.as_slice())
            .unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(key, values)| (key.as_str(), values.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for Headers {
    fn from_iter<T: IntoIterator<Item = (&'a str, &'a str)>>(iter: T) -> Self {
        let mut headers = Headers::new();
        for (key, value) in iter {
            headers.add(key, value);
        }
        headers
    }
}

/// Canonical MIME header form: `content-type` becomes `Content-Type`.
///
/// Keys holding characters outside the HTTP token set are returned unchanged.
pub fn canonical_header_key(key: &str) -> String {
    if !key.bytes().all(is_token_byte) {
        return key.to_string();
    }
    let mut upper = true;
    key.chars()
        .map(|c| {
            let mapped = if upper {
                c.to_ascii_uppercase()
            } else {
                c.to_ascii_lowercase()
            };
            upper = c == '-';
            mapped
        })
        .collect()
}

fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

#[cfg(test)]
mod tests {
    use super::{Headers, canonical_header_key};

    #[test]
    fn canonicalizes_keys() {
        assert_eq!(canonical_header_key("content-type"), "Content-Type");
        assert_eq!(canonical_header_key("X-FORWARDED-for"), "X-Forwarded-For");
        assert_eq!(canonical_header_key("accept"), "Accept");
        assert_eq!(canonical_header_key("bad key"), "bad key");
    }

    #[test]
    fn add_keeps_every_value_under_one_key() {
        let mut headers = Headers::new();
        headers.add("accept", "text/html").add("ACCEPT", "application/json");
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get_all("Accept"), ["text/html", "application/json"]);
    }

    #[test]
    fn set_replaces_values() {
        let mut headers: Headers = [("content-type", "text/plain"), ("x-a", "1")]
            .into_iter()
            .collect();
        headers.set("Content-Type", "multipart/form-data; boundary=b");
        assert_eq!(
            headers.get_all("content-type"),
            ["multipart/form-data; boundary=b"]
        );
        assert_eq!(headers.iter().next().map(|(key, _)| key), Some("Content-Type"));
    }
}
