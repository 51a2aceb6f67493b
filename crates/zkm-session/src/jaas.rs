//! Parser for JAAS login configuration files.
//!
//! ```text
//! Client {
//!   com.sun.security.auth.module.Krb5LoginModule required
//!   useKeyTab=true
//!   keyTab="/etc/security/keytabs/zk.keytab"
//!   principal="nifi@EXAMPLE.COM";
//! };
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{SessionError, SessionResult};

/// One login module line inside a section.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoginModuleEntry {
    pub class: String,
    /// `required`, `requisite`, `sufficient` or `optional`.
    pub flag: String,
    pub options: BTreeMap<String, String>,
}

/// A parsed JAAS file: section name to login modules.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct JaasConfig {
    pub sections: BTreeMap<String, Vec<LoginModuleEntry>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Token {
    Word(String),
    Quoted(String),
    Open,
    Close,
    Semi,
    Equals,
}

impl JaasConfig {
    pub fn load(path: &Path) -> SessionResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| SessionError::Jaas {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::parse(&text).map_err(|reason| SessionError::Jaas {
            path: path.display().to_string(),
            reason,
        })
    }

    pub fn parse(text: &str) -> Result<Self, String> {
        let tokens = tokenize(text)?;
        let mut iter = tokens.into_iter().peekable();
        let mut sections = BTreeMap::new();

        while let Some(token) = iter.next() {
            let name = match token {
                Token::Word(name) => name,
                other => return Err(format!("expected section name, found {other:?}")),
            };
            if iter.next() != Some(Token::Open) {
                return Err(format!("expected '{{' after section {name}"));
            }

            let mut modules = Vec::new();
            loop {
                match iter.next() {
                    Some(Token::Close) => break,
                    Some(Token::Word(class)) => {
                        let flag = match iter.next() {
                            Some(Token::Word(flag)) => flag,
                            other => return Err(format!("expected control flag for {class}, found {other:?}")),
                        };
                        let mut options = BTreeMap::new();
                        loop {
                            match iter.next() {
                                Some(Token::Semi) => break,
                                Some(Token::Word(key)) => {
                                    if iter.next() != Some(Token::Equals) {
                                        return Err(format!("expected '=' after option {key}"));
                                    }
                                    let value = match iter.next() {
                                        Some(Token::Word(v)) | Some(Token::Quoted(v)) => v,
                                        other => return Err(format!("expected value for {key}, found {other:?}")),
                                    };
                                    options.insert(key, value);
                                }
                                other => return Err(format!("unexpected {other:?} in module {class}")),
                            }
                        }
                        modules.push(LoginModuleEntry { class, flag, options });
                    }
                    other => return Err(format!("unexpected {other:?} in section {name}")),
                }
            }
            if iter.peek() == Some(&Token::Semi) {
                iter.next();
            }
            sections.insert(name, modules);
        }

        Ok(Self { sections })
    }

    pub fn section(&self, name: &str) -> Option<&[LoginModuleEntry]> {
        self.sections.get(name).map(Vec::as_slice)
    }
}

fn tokenize(text: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '/' => {
                chars.next();
                match chars.next() {
                    Some('/') => {
                        for c in chars.by_ref() {
                            if c == '\n' {
                                break;
                            }
                        }
                    }
                    Some('*') => {
                        let mut prev = ' ';
                        let mut closed = false;
                        for c in chars.by_ref() {
                            if prev == '*' && c == '/' {
                                closed = true;
                                break;
                            }
                            prev = c;
                        }
                        if !closed {
                            return Err("unterminated comment".into());
                        }
                    }
                    _ => return Err("stray '/'".into()),
                }
            }
            '{' => {
                chars.next();
                tokens.push(Token::Open);
            }
            '}' => {
                chars.next();
                tokens.push(Token::Close);
            }
            ';' => {
                chars.next();
                tokens.push(Token::Semi);
            }
            '=' => {
                chars.next();
                tokens.push(Token::Equals);
            }
            '"' => {
                chars.next();
                let mut value = String::new();
                let mut closed = false;
                while let Some(c) = chars.next() {
                    match c {
                        '"' => {
                            closed = true;
                            break;
                        }
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                value.push(escaped);
                            }
                        }
                        c => value.push(c),
                    }
                }
                if !closed {
                    return Err("unterminated string".into());
                }
                tokens.push(Token::Quoted(value));
            }
            _ => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || matches!(c, '{' | '}' | ';' | '=' | '"') {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }
                tokens.push(Token::Word(word));
            }
        }
    }
    Ok(tokens)
}
