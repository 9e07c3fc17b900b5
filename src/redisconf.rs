//! Ordered key/value redis.conf documents

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

/// One `key value` directive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub key: String,
    pub value: String,
}

/// A redis.conf file as an ordered list of directives.
///
/// Comments and blank lines are dropped on load. Keys may repeat (`save`,
/// `rename-command`); `get` and `set` act on the first occurrence. Values are
/// kept as written, so multi-argument directives like `save 900 1` survive
/// untouched. `get_arg` and `set_arg` handle single-argument values that may
/// need quoting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedisConf(Vec<Param>);

impl RedisConf {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse config text
    pub fn parse(content: &str) -> Self {
        let params = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(|line| {
                let (key, value) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
                Param {
                    key: key.to_string(),
                    value: value.trim().to_string(),
                }
            })
            .collect();
        RedisConf(params)
    }

    /// Load a config file from disk
    pub fn load(path: &Path) -> io::Result<Self> {
        Ok(Self::parse(&fs::read_to_string(path)?))
    }

    /// Value of the first directive named `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.iter().find(|p| p.key == key).map(|p| p.value.as_str())
    }

    /// First directive named `key` read as one argument, with quotes removed
    pub fn get_arg(&self, key: &str) -> Option<String> {
        self.get(key).map(unquote)
    }

    /// Replace the first directive named `key`, or append one
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.0.iter_mut().find(|p| p.key == key) {
            Some(param) => param.value = value,
            None => self.0.push(Param {
                key: key.to_string(),
                value,
            }),
        }
    }

    /// Like `set`, quoting `value` so redis-server reads it back as one argument
    pub fn set_arg(&mut self, key: &str, value: &str) {
        self.set(key, quote(value));
    }

    pub fn params(&self) -> &[Param] {
        &self.0
    }

    /// Write the document to `path`, replacing any existing file
    pub fn save(&self, path: &Path) -> io::Result<()> {
        fs::write(path, self.to_string())
    }
}

impl fmt::Display for RedisConf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for param in &self.0 {
            if param.value.is_empty() {
                writeln!(f, "{}", param.key)?;
            } else {
                writeln!(f, "{} {}", param.key, param.value)?;
            }
        }
        Ok(())
    }
}

/// Render `value` as a single redis.conf argument.
///
/// Plain values are written as is. Anything empty or holding whitespace,
/// quotes, backslashes or control characters is double-quoted with the
/// escapes redis-server understands.
pub fn quote(value: &str) -> String {
    let plain = !value.is_empty()
        && !value
            .chars()
            .any(|c| c.is_whitespace() || c.is_ascii_control() || matches!(c, '"' | '\'' | '\\'));
    if plain {
        return value.to_string();
    }

    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_ascii_control() => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Read one argument written by redis.conf rules, removing quotes and escapes
pub fn unquote(raw: &str) -> String {
    let quoted_by = |q: char| raw.len() >= 2 && raw.starts_with(q) && raw.ends_with(q);
    if quoted_by('"') {
        unescape(&raw[1..raw.len() - 1])
    } else if quoted_by('\'') {
        raw[1..raw.len() - 1].replace("\\'", "'")
    } else {
        raw.to_string()
    }
}

fn unescape(inner: &str) -> String {
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('b') => out.push('\u{8}'),
            Some('a') => out.push('\u{7}'),
            Some('x') => {
                let hex: String = chars.clone().take(2).collect();
                match u8::from_str_radix(&hex, 16) {
                    Ok(byte) if hex.len() == 2 && hex.chars().all(|h| h.is_ascii_hexdigit()) => {
                        out.push(char::from(byte));
                        chars.nth(1);
                    }
                    _ => out.push('x'),
                }
            }
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Copy the template at `from` to `to`, overriding the per-instance settings.
///
/// `daemonize` is forced on so that launching the server returns once it has
/// forked into the background.
pub fn copy_with_instance_additions(
    from: &Path,
    to: &Path,
    instance_id: &str,
    port: u16,
    password: &str,
) -> io::Result<()> {
    let mut conf = RedisConf::load(from)?;
    conf.set_arg("syslog-ident", &format!("redis-server-{}", instance_id));
    conf.set_arg("daemonize", "yes");
    conf.set_arg("port", &port.to_string());
    conf.set_arg("requirepass", password);
    conf.save(to)
}
