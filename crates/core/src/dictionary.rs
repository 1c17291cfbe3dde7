//! Ordered string-to-string mapping used to pass codec/container options.

/// An ordered multimap-free mapping from key to value. Insertion order is
/// preserved for serialization; lookups can optionally ignore case or match
/// by prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dictionary {
    entries: Vec<(String, String)>,
}

impl Dictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert; returns `self` so call sites can chain options.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        if let Some(existing) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            existing.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_ci(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Returns all entries whose key starts with `prefix`.
    pub fn get_prefixed(&self, prefix: &str) -> Vec<(&str, &str)> {
        self.entries
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect()
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Parses `key=value` pairs separated by `pair_sep`, with each pair
    /// internally split on the first occurrence of `kv_sep`.
    pub fn parse(input: &str, kv_sep: char, pair_sep: char) -> crate::error::Result<Self> {
        let mut dict = Dictionary::new();
        if input.is_empty() {
            return Ok(dict);
        }
        for pair in input.split(pair_sep) {
            let mut parts = pair.splitn(2, kv_sep);
            let key = parts.next().unwrap_or_default();
            let value = parts.next().ok_or_else(|| {
                crate::error::Error::invalid_argument(format!(
                    "malformed dictionary pair `{pair}`, expected `key{kv_sep}value`"
                ))
            })?;
            dict.set(key, value);
        }
        Ok(dict)
    }

    pub fn serialize(&self, kv_sep: char, pair_sep: char) -> String {
        self.entries
            .iter()
            .map(|(k, v)| format!("{k}{kv_sep}{v}"))
            .collect::<Vec<_>>()
            .join(&pair_sep.to_string())
    }
}

impl IntoIterator for Dictionary {
    type Item = (String, String);
    type IntoIter = std::vec::IntoIter<(String, String)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl FromIterator<(String, String)> for Dictionary {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        let mut dict = Dictionary::new();
        for (k, v) in iter {
            dict.set(k, v);
        }
        dict
    }
}

impl From<Dictionary> for ffmpeg_next::Dictionary<'_> {
    fn from(dict: Dictionary) -> Self {
        let mut out = ffmpeg_next::Dictionary::new();
        for (k, v) in dict.iter() {
            out.set(k, v);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_overwrites_existing_key() {
        let mut dict = Dictionary::new().with("bitrate", "500k");
        dict.set("bitrate", "1M");
        assert_eq!(dict.get("bitrate"), Some("1M"));
        assert_eq!(dict.len(), 1);
    }

    #[test]
    fn case_insensitive_lookup() {
        let dict = Dictionary::new().with("Preset", "fast");
        assert_eq!(dict.get_ci("preset"), Some("fast"));
        assert_eq!(dict.get("preset"), None);
    }

    #[test]
    fn prefix_lookup_returns_matches_in_order() {
        let dict = Dictionary::new().with("x264-preset", "fast").with("x264-crf", "23").with("aac-profile", "lc");
        let matches = dict.get_prefixed("x264-");
        assert_eq!(matches, vec![("x264-preset", "fast"), ("x264-crf", "23")]);
    }

    #[test]
    fn parse_and_serialize_round_trip() {
        let dict = Dictionary::parse("a=1:b=2:c=3", '=', ':').unwrap();
        assert_eq!(dict.get("b"), Some("2"));
        assert_eq!(dict.serialize('=', ':'), "a=1:b=2:c=3");
    }

    #[test]
    fn parse_rejects_missing_separator() {
        let err = Dictionary::parse("a=1:bad:c=3", '=', ':').unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::InvalidArgument);
    }

    #[test]
    fn empty_input_parses_to_empty_dictionary() {
        let dict = Dictionary::parse("", '=', ':').unwrap();
        assert!(dict.is_empty());
    }
}
