//! # Fluent Bit Configuration
//!
//! Section model and renderer for the classic fluent-bit configuration format.
//!
//! ```text
//! [SERVICE]
//!     flush 1
//!
//! [INPUT]
//!     name http
//!
//! [OUTPUT]
//!     match audit
//!     name stdout
//!
//! @INCLUDE *.backend.conf
//! ```
//!
//! `[SERVICE]` and `[INPUT]` options render in insertion order. `[OUTPUT]` options
//! render sorted by key, and a key holding several values renders one line per
//! value in the order they were added.

use std::collections::BTreeMap;

/// Indentation of option lines inside a section
const INDENT: &str = "    ";

/// Ordered `key value` options of a `[SERVICE]` or `[INPUT]` section
///
/// Keys keep the position of their first insertion. Setting an existing key
/// replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options(Vec<(String, String)>);

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key` to `value`, keeping the key's original position if present
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.0.push((key, value)),
        }
        self
    }

    /// Builder form of [`Options::set`]
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Options {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut options = Self::new();
        for (k, v) in iter {
            options.set(k, v);
        }
        options
    }
}

/// The `[SERVICE]` section
pub type Service = Options;

/// One `[INPUT]` section
pub type Input = Options;

/// One `[OUTPUT]` section; every key may carry several values
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Output(BTreeMap<String, Vec<String>>);

impl Output {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `values` to `key`, creating the key if absent
    pub fn add<I, S>(&mut self, key: impl Into<String>, values: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.0
            .entry(key.into())
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    /// Builder form of [`Output::add`] for a single value
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.add(key, [value]);
        self
    }

    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.0.get(key).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, Vec<String>)> for Output {
    fn from_iter<I: IntoIterator<Item = (K, Vec<String>)>>(iter: I) -> Self {
        let mut output = Self::new();
        for (k, values) in iter {
            output.add(k, values);
        }
        output
    }
}

/// A file glob pulled in with `@INCLUDE`
pub type Include = String;

/// Complete fluent-bit configuration file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub service: Service,
    pub input: Vec<Input>,
    pub output: Vec<Output>,
    pub includes: Vec<Include>,
}

impl Config {
    /// Render the configuration text
    ///
    /// Blocks are separated by one blank line, the `@INCLUDE` lines come last and
    /// the result carries no leading or trailing whitespace.
    pub fn generate(&self) -> String {
        let mut blocks: Vec<String> = Vec::new();

        if !self.service.is_empty() {
            blocks.push(render_section("SERVICE", self.service.iter()));
        }

        for input in &self.input {
            blocks.push(render_section("INPUT", input.iter()));
        }

        for output in &self.output {
            let lines = output
                .0
                .iter()
                .flat_map(|(key, values)| values.iter().map(move |v| (key.as_str(), v.as_str())));
            blocks.push(render_section("OUTPUT", lines));
        }

        if !self.includes.is_empty() {
            let includes: Vec<String> = self
                .includes
                .iter()
                .map(|glob| format!("@INCLUDE {}", glob.trim()))
                .collect();
            blocks.push(includes.join("\n"));
        }

        blocks.join("\n\n").trim().to_string()
    }
}

fn render_section<'a>(name: &str, options: impl Iterator<Item = (&'a str, &'a str)>) -> String {
    let mut block = format!("[{name}]");
    for (key, value) in options {
        block.push('\n');
        block.push_str(INDENT);
        block.push_str(key.trim());
        block.push(' ');
        block.push_str(value.trim());
    }
    block
}
