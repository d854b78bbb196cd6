//! Typed flag and argument lists rendered into escaped command lines.
//!
//! Rendering rules:
//! - a flag whose name is a single character renders as `-k`, otherwise `--key`
//!   (overridable per flag)
//! - values are joined with `=` unless the flag asks for a space separator
//! - every value and positional argument is single-quote escaped unless marked raw
//! - a flag with several values is repeated once per value
//!
//! # Example
//! ```
//! use cjr::shell::{Flag, Flags, ShellArg, command_string};
//! let flags = Flags::new()
//!     .switch("a")
//!     .value("label", "stack-path=/stacks/fedora");
//! let line = command_string("docker ps", &flags, &[ShellArg::from("it's")]);
//! assert_eq!(line, "docker ps -a --label='stack-path=/stacks/fedora' 'it'\\''s'");
//! ```

/// One command line flag with zero or more values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flag {
    name: String,
    values: Vec<String>,
    shorthand: bool,
    escape: bool,
    noequals: bool,
}

impl Flag {
    fn new(name: &str, values: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            shorthand: name.chars().count() == 1,
            values,
            escape: true,
            noequals: false,
        }
    }

    /// A flag without a value, e.g. `--rm`.
    pub fn switch(name: &str) -> Self {
        Self::new(name, Vec::new())
    }

    /// A flag with a single value.
    pub fn value(name: &str, value: impl Into<String>) -> Self {
        Self::new(name, vec![value.into()])
    }

    /// A flag repeated once for every value.
    pub fn values<I, S>(name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(name, values.into_iter().map(Into::into).collect())
    }

    /// Do not escape the values of this flag.
    pub fn raw(mut self) -> Self {
        self.escape = false;
        self
    }

    /// Separate the flag and its value with a space instead of `=`.
    pub fn spaced(mut self) -> Self {
        self.noequals = true;
        self
    }

    /// Force the single-dash form.
    pub fn short(mut self) -> Self {
        self.shorthand = true;
        self
    }

    /// Force the double-dash form.
    pub fn long(mut self) -> Self {
        self.shorthand = false;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn flag_values(&self) -> &[String] {
        &self.values
    }

    fn render_into(&self, out: &mut Vec<String>) {
        let dash = if self.shorthand { "-" } else { "--" };
        if self.values.is_empty() {
            out.push(format!("{}{}", dash, self.name));
            return;
        }
        let sep = if self.noequals { " " } else { "=" };
        for value in &self.values {
            let value = if self.escape {
                bash_escape(value)
            } else {
                value.clone()
            };
            out.push(format!("{}{}{}{}", dash, self.name, sep, value));
        }
    }
}

/// Ordered list of flags. Order is preserved when rendering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Flags {
    flags: Vec<Flag>,
}

impl Flags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, flag: Flag) -> &mut Self {
        self.flags.push(flag);
        self
    }

    pub fn with(mut self, flag: Flag) -> Self {
        self.flags.push(flag);
        self
    }

    pub fn switch(self, name: &str) -> Self {
        self.with(Flag::switch(name))
    }

    pub fn value(self, name: &str, value: impl Into<String>) -> Self {
        self.with(Flag::value(name, value))
    }

    /// Add a switch only when `enabled`.
    pub fn switch_if(self, name: &str, enabled: bool) -> Self {
        if enabled { self.switch(name) } else { self }
    }

    /// Add a valued flag only when a value is present.
    pub fn value_opt(self, name: &str, value: Option<impl Into<String>>) -> Self {
        match value {
            Some(v) => self.value(name, v),
            None => self,
        }
    }

    pub fn extend(&mut self, other: Flags) -> &mut Self {
        self.flags.extend(other.flags);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Flag> {
        self.flags.iter().find(|f| f.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Flag> {
        self.flags.iter()
    }
}

/// A positional argument, escaped unless created with [`ShellArg::raw`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellArg {
    value: String,
    escape: bool,
}

impl ShellArg {
    /// An argument passed through verbatim, e.g. a `$(...)` substitution.
    pub fn raw(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            escape: false,
        }
    }

    fn render(&self) -> String {
        if self.escape {
            bash_escape(&self.value)
        } else {
            self.value.clone()
        }
    }
}

impl From<&str> for ShellArg {
    fn from(value: &str) -> Self {
        Self {
            value: value.to_string(),
            escape: true,
        }
    }
}

impl From<String> for ShellArg {
    fn from(value: String) -> Self {
        Self {
            value,
            escape: true,
        }
    }
}

impl From<&String> for ShellArg {
    fn from(value: &String) -> Self {
        Self::from(value.as_str())
    }
}

/// Build an escaped argument list.
pub fn args<I, S>(values: I) -> Vec<ShellArg>
where
    I: IntoIterator<Item = S>,
    S: Into<ShellArg>,
{
    values.into_iter().map(Into::into).collect()
}

/// Render a full command line.
pub fn command_string(command: &str, flags: &Flags, args: &[ShellArg]) -> String {
    let mut parts = vec![command.to_string()];
    for flag in flags.iter() {
        flag.render_into(&mut parts);
    }
    parts.extend(args.iter().map(ShellArg::render));
    parts.join(" ")
}

/// Wrap a value in single quotes for bash.
///
/// Embedded quotes become `'\''`. Redundant empty quote pairs produced at the
/// start or around escaped quotes are removed, so `it's` renders as
/// `'it'\''s'` and `'a` as `\''a'`.
pub fn bash_escape(value: &str) -> String {
    if value.is_empty() {
        return "''".to_string();
    }
    let quoted = format!("'{}'", value.replace('\'', "'\\''"));
    let mut trimmed = quoted.as_str();
    while let Some(rest) = trimmed.strip_prefix("''") {
        trimmed = rest;
    }
    trimmed.replace("\\'''", "\\'")
}
