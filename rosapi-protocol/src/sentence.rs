//! Sentence data model.
//!
//! A sentence is a command (or reply) word followed by attribute words
//! (`=name=value`), API attribute words (`.name=value`) and query words
//! (`?...`). The `.tag` API attribute is kept apart since it correlates
//! replies with the command that produced them.

use serde::ser::{Serialize, SerializeMap, Serializer};
use std::fmt;

/// Name of the API attribute carrying the correlation tag.
pub const TAG_ATTRIBUTE: &str = "tag";

/// Kind of reply, derived from the first word of a router sentence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultType {
    /// `!done`
    Done,
    /// `!trap`
    Trap,
    /// `!fatal`
    Fatal,
    /// `!re`
    Reply,
    Unknown,
}

impl ResultType {
    pub fn from_reply_word(word: &str) -> Self {
        match word {
            "!done" => ResultType::Done,
            "!trap" => ResultType::Trap,
            "!fatal" => ResultType::Fatal,
            "!re" => ResultType::Reply,
            _ => ResultType::Unknown,
        }
    }
}

/// Insertion-ordered `name -> value` list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes(Vec<(String, String)>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `name` to `value`, replacing an earlier value in place.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|(n, _)| *n == name) {
            Some((_, v)) => *v = value,
            None => self.0.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Returns the value of `name`, or an empty string when absent.
    pub fn attribute(&self, name: &str) -> &str {
        self.get(name).unwrap_or("")
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn count(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Renders each pair as `<prefix><name>=<value>`.
    pub fn to_words(&self, prefix: char) -> Vec<String> {
        self.0
            .iter()
            .map(|(n, v)| format!("{prefix}{n}={v}"))
            .collect()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }
}

impl Serialize for Attributes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, value) in &self.0 {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// A protocol sentence.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct Sentence {
    command: String,
    attributes: Attributes,
    #[serde(skip_serializing_if = "Attributes::is_empty")]
    api_attributes: Attributes,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    queries: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    tag: String,
}

impl Sentence {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name, value);
        self
    }

    /// Adds an API attribute. A `tag` attribute sets the sentence tag.
    pub fn with_api_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        if name == TAG_ATTRIBUTE {
            self.tag = value.into();
        } else {
            self.api_attributes.insert(name, value);
        }
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.queries.push(query.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    /// Builds a sentence from received words.
    ///
    /// Each word byte is taken as one Latin-1 character.
    pub fn from_words<I, W>(words: I) -> Self
    where
        I: IntoIterator<Item = W>,
        W: AsRef<[u8]>,
    {
        Self::from_text_words(words.into_iter().map(|w| decode_word(w.as_ref())))
    }

    /// Parses a whitespace-separated line such as
    /// `/interface/print ?type=ether =.proplist=name`.
    pub fn parse_line(line: &str) -> Self {
        Self::from_text_words(line.split_whitespace())
    }

    /// Builds a sentence from already decoded words, classifying them the
    /// same way as received words.
    pub fn from_text_words<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut words = words.into_iter().map(Into::<String>::into);
        let mut sentence = Sentence::new(words.next().unwrap_or_default());

        for word in words {
            if let Some(rest) = word.strip_prefix('=') {
                let (name, value) = rest.split_once('=').unwrap_or((rest, ""));
                sentence.attributes.insert(name, value);
            } else if let Some(rest) = word.strip_prefix('.') {
                let (name, value) = rest.split_once('=').unwrap_or((rest, ""));
                sentence = sentence.with_api_attribute(name, value);
            } else {
                sentence.queries.push(word);
            }
        }

        sentence
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn api_attributes(&self) -> &Attributes {
        &self.api_attributes
    }

    pub fn queries(&self) -> &[String] {
        &self.queries
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn set_tag(&mut self, tag: impl Into<String>) {
        self.tag = tag.into();
    }

    pub fn result_type(&self) -> ResultType {
        ResultType::from_reply_word(&self.command)
    }

    /// Returns whether no word at all was received for this sentence.
    pub fn is_empty(&self) -> bool {
        self.command.is_empty()
            && self.attributes.is_empty()
            && self.api_attributes.is_empty()
            && self.queries.is_empty()
            && self.tag.is_empty()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Words to emit, in wire order, excluding the tag and the terminator.
    pub fn words(&self) -> Vec<String> {
        let mut words = Vec::with_capacity(
            1 + self.attributes.count() + self.api_attributes.count() + self.queries.len(),
        );
        words.push(self.command.clone());
        words.extend(self.attributes.to_words('='));
        words.extend(self.api_attributes.to_words('.'));
        words.extend(self.queries.iter().cloned());
        words
    }
}

impl fmt::Display for Sentence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.words().join(" "))?;
        if !self.tag.is_empty() {
            write!(f, " .{}={}", TAG_ATTRIBUTE, self.tag)?;
        }
        Ok(())
    }
}

/// Maps raw word bytes to text, one Latin-1 character per byte.
pub fn decode_word(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

/// Maps text to raw word bytes. Characters outside Latin-1 become `?`.
pub fn encode_word(word: &str) -> Vec<u8> {
    word.chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect()
}
