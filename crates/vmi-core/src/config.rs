//! Configuration intake: a flat key/value map per image, and a pure-function
//! parser for the `libvmi.conf`-style text format described in §6.
//!
//! The original C implementation drove this parser off a process-wide
//! `FILE *` (flex/bison globals). Per the redesign note in §9, this is
//! reimplemented as a pure function of its input: `parse(text) -> map`,
//! with a tokenizer that owns the `&str` it's given and produces no global
//! state.

use std::collections::BTreeMap;

use crate::error::VmiError;

/// A single configuration value: either a quoted string or a hex/decimal
/// integer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigValue {
    /// A string value, e.g. `ostype = "Windows";`.
    Str(String),
    /// An integer value, e.g. `win_kdvb = 0x1C0F30;`.
    Int(u64),
}

impl ConfigValue {
    /// Returns the value as a string slice, if it is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            Self::Int(_) => None,
        }
    }

    /// Returns the value as an integer, if it is one.
    pub fn as_int(&self) -> Option<u64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::Str(_) => None,
        }
    }
}

/// A flat key/value map, either lifted from one `<image> { ... }` block of a
/// config file, or supplied directly by the caller (init mode `map`).
#[derive(Debug, Clone, Default)]
pub struct Config {
    entries: BTreeMap<String, ConfigValue>,
}

impl Config {
    /// Creates an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a configuration from an already-built key/value map.
    pub fn from_map(entries: BTreeMap<String, ConfigValue>) -> Self {
        Self { entries }
    }

    /// Inserts or overwrites a key.
    pub fn insert(&mut self, key: impl Into<String>, value: ConfigValue) {
        self.entries.insert(key.into(), value);
    }

    /// Looks up a string-valued key.
    pub fn str(&self, key: &str) -> Option<&str> {
        self.entries.get(key).and_then(ConfigValue::as_str)
    }

    /// Looks up an integer-valued key.
    pub fn int(&self, key: &str) -> Option<u64> {
        self.entries.get(key).and_then(ConfigValue::as_int)
    }

    /// Looks up a string-valued key, failing with [`VmiError::ConfigError`]
    /// if it is absent or of the wrong type.
    pub fn require_str(&self, key: &str) -> Result<&str, VmiError> {
        self.str(key)
            .ok_or_else(|| VmiError::ConfigError(format!("missing string key `{key}`")))
    }

    /// Looks up an integer-valued key, failing with
    /// [`VmiError::ConfigError`] if it is absent or of the wrong type.
    pub fn require_int(&self, key: &str) -> Result<u64, VmiError> {
        self.int(key)
            .ok_or_else(|| VmiError::ConfigError(format!("missing integer key `{key}`")))
    }

    /// Returns `true` if the key is present, regardless of type.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }
}

/// Parses a complete config-file source into its named per-image blocks.
///
/// Grammar (per §6):
///
/// ```text
/// file       := block*
/// block      := ident '{' assignment* '}'
/// assignment := ident '=' value ';'
/// value      := string | integer
/// string     := '"' ... '"'
/// integer    := '0x' hex+ | dec+
/// comment    := '#' ... '\n'
/// ```
pub fn parse(text: &str) -> Result<BTreeMap<String, Config>, VmiError> {
    let mut tokens = Tokenizer::new(text);
    let mut blocks = BTreeMap::new();

    while let Some(tok) = tokens.next_token()? {
        let Token::Ident(image_name) = tok else {
            return Err(VmiError::ConfigError(format!(
                "expected image name, found {tok:?}"
            )));
        };

        tokens.expect(Token::LBrace)?;

        let mut entries = BTreeMap::new();
        loop {
            match tokens.next_token()? {
                Some(Token::RBrace) | None => break,
                Some(Token::Ident(key)) => {
                    tokens.expect(Token::Eq)?;
                    let value = match tokens.next_token()? {
                        Some(Token::Str(s)) => ConfigValue::Str(s),
                        Some(Token::Int(n)) => ConfigValue::Int(n),
                        other => {
                            return Err(VmiError::ConfigError(format!(
                                "expected value for `{key}`, found {other:?}"
                            )));
                        }
                    };
                    tokens.expect(Token::Semi)?;
                    entries.insert(key, value);
                }
                Some(other) => {
                    return Err(VmiError::ConfigError(format!(
                        "expected key or `}}`, found {other:?}"
                    )));
                }
            }
        }

        blocks.insert(image_name, Config::from_map(entries));
    }

    Ok(blocks)
}

/// Parses a single `key = value;` sequence with no surrounding
/// `<image> { ... }` block, for the `map`/`string` init-config sources that
/// hand the engine a flat set of assignments directly.
pub fn parse_flat(text: &str) -> Result<Config, VmiError> {
    let mut tokens = Tokenizer::new(text);
    let mut entries = BTreeMap::new();

    loop {
        match tokens.next_token()? {
            None => break,
            Some(Token::Ident(key)) => {
                tokens.expect(Token::Eq)?;
                let value = match tokens.next_token()? {
                    Some(Token::Str(s)) => ConfigValue::Str(s),
                    Some(Token::Int(n)) => ConfigValue::Int(n),
                    other => {
                        return Err(VmiError::ConfigError(format!(
                            "expected value for `{key}`, found {other:?}"
                        )));
                    }
                };
                tokens.expect(Token::Semi)?;
                entries.insert(key, value);
            }
            Some(other) => {
                return Err(VmiError::ConfigError(format!(
                    "expected key, found {other:?}"
                )));
            }
        }
    }

    Ok(Config::from_map(entries))
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Str(String),
    Int(u64),
    LBrace,
    RBrace,
    Eq,
    Semi,
}

struct Tokenizer<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    source: &'a str,
}

impl<'a> Tokenizer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            chars: source.char_indices().peekable(),
            source,
        }
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.chars.peek() {
                Some((_, c)) if c.is_whitespace() => {
                    self.chars.next();
                }
                Some((_, '#')) => {
                    for (_, c) in self.chars.by_ref() {
                        if c == '\n' {
                            break;
                        }
                    }
                }
                _ => break,
            }
        }
    }

    fn expect(&mut self, expected: Token) -> Result<(), VmiError> {
        match self.next_token()? {
            Some(tok) if tok == expected => Ok(()),
            Some(tok) => Err(VmiError::ConfigError(format!(
                "expected {expected:?}, found {tok:?}"
            ))),
            None => Err(VmiError::ConfigError(format!(
                "expected {expected:?}, found end of input"
            ))),
        }
    }

    fn next_token(&mut self) -> Result<Option<Token>, VmiError> {
        self.skip_trivia();

        let (start, c) = match self.chars.next() {
            Some(pair) => pair,
            None => return Ok(None),
        };

        match c {
            '{' => Ok(Some(Token::LBrace)),
            '}' => Ok(Some(Token::RBrace)),
            '=' => Ok(Some(Token::Eq)),
            ';' => Ok(Some(Token::Semi)),
            '"' => {
                let mut s = String::new();
                for (_, c) in self.chars.by_ref() {
                    if c == '"' {
                        return Ok(Some(Token::Str(s)));
                    }
                    s.push(c);
                }
                Err(VmiError::ConfigError("unterminated string literal".into()))
            }
            c if c.is_ascii_digit() => {
                let mut end = start + c.len_utf8();
                while let Some((idx, c)) = self.chars.peek().copied() {
                    if c.is_ascii_hexdigit() || c == 'x' || c == 'X' {
                        end = idx + c.len_utf8();
                        self.chars.next();
                    } else {
                        break;
                    }
                }
                let text = &self.source[start..end];
                let value = if let Some(hex) = text.strip_prefix("0x").or(text.strip_prefix("0X"))
                {
                    u64::from_str_radix(hex, 16)
                } else {
                    text.parse::<u64>()
                }
                .map_err(|_| VmiError::ConfigError(format!("invalid integer literal `{text}`")))?;
                Ok(Some(Token::Int(value)))
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut end = start + c.len_utf8();
                while let Some((idx, c)) = self.chars.peek().copied() {
                    if c.is_alphanumeric() || c == '_' {
                        end = idx + c.len_utf8();
                        self.chars.next();
                    } else {
                        break;
                    }
                }
                Ok(Some(Token::Ident(self.source[start..end].to_owned())))
            }
            other => Err(VmiError::ConfigError(format!(
                "unexpected character `{other}`"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_single_image_block() {
        let text = r#"
            # a comment
            win7-x64 {
                ostype = "Windows";
                win_kdvb = 0x1C0F30;
                win_tasks = 0x2e8;
            }
        "#;

        let blocks = parse(text).unwrap();
        let cfg = blocks.get("win7-x64").unwrap();
        assert_eq!(cfg.str("ostype"), Some("Windows"));
        assert_eq!(cfg.int("win_kdvb"), Some(0x1C0F30));
        assert_eq!(cfg.int("win_tasks"), Some(0x2e8));
    }

    #[test]
    fn parses_multiple_blocks() {
        let text = r#"
            image-a { ostype = "Linux"; linux_tasks = 0x2e8; }
            image-b { ostype = "Windows"; win_kdvb = 100; }
        "#;

        let blocks = parse(text).unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks["image-a"].str("ostype"), Some("Linux"));
        assert_eq!(blocks["image-b"].int("win_kdvb"), Some(100));
    }

    #[test]
    fn rejects_missing_semicolon() {
        let text = "img { ostype = \"Linux\" }";
        assert!(parse(text).is_err());
    }

    #[test]
    fn flat_parse_has_no_block_wrapper() {
        let cfg = parse_flat("ostype = \"Windows\"; win_kdvb = 0x10;").unwrap();
        assert_eq!(cfg.str("ostype"), Some("Windows"));
        assert_eq!(cfg.int("win_kdvb"), Some(0x10));
    }
}
