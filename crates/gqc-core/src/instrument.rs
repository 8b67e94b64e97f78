//! Instrument metadata carried as a string dataset attribute.
//!
//! Deployment metadata stores each sensor's description as a flat
//! dictionary literal, either JSON or Python style:
//!
//! ```text
//! {'make_model': 'JFE Advantech AROD_FT', 'serial': 1234, 'calibration_date': '2021-11-03'}
//! ```
//!
//! Values are kept as text; nested structures are rejected.

use chrono::{DateTime, NaiveDate};
use gqc_common::{Error, Result};
use std::collections::BTreeMap;
use std::iter::Peekable;
use std::str::Chars;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstrumentMetadata(BTreeMap<String, String>);

impl InstrumentMetadata {
    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    /// Field value, or `MalformedMetadata` if it is absent.
    pub fn require(&self, field: &str) -> Result<&str> {
        self.get(field)
            .ok_or_else(|| Error::MalformedMetadata(format!("missing field '{field}'")))
    }

    /// ISO calibration date held in `field`. A full timestamp is accepted
    /// and truncated to its date.
    pub fn calibration_date(&self, field: &str) -> Result<NaiveDate> {
        let raw = self.require(field)?.trim();
        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .or_else(|_| DateTime::parse_from_rfc3339(raw).map(|t| t.date_naive()))
            .map_err(|_| Error::MalformedMetadata(format!("{field} '{raw}' is not an ISO date")))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Parse a flat dictionary literal in JSON or Python syntax.
pub fn parse_instrument_metadata(raw: &str) -> Result<InstrumentMetadata> {
    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(raw) {
        let mut fields = BTreeMap::new();
        for (key, value) in map {
            let text = match value {
                serde_json::Value::String(s) => s,
                serde_json::Value::Null => String::new(),
                serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
                    return Err(Error::MalformedMetadata(format!(
                        "field '{key}' is not a scalar"
                    )))
                }
                other => other.to_string(),
            };
            fields.insert(key, text);
        }
        return Ok(InstrumentMetadata(fields));
    }
    LiteralParser::new(raw).parse().map(InstrumentMetadata)
}

struct LiteralParser<'a> {
    chars: Peekable<Chars<'a>>,
}

impl<'a> LiteralParser<'a> {
    fn new(raw: &'a str) -> Self {
        Self {
            chars: raw.chars().peekable(),
        }
    }

    fn parse(mut self) -> Result<BTreeMap<String, String>> {
        let mut fields = BTreeMap::new();
        self.skip_ws();
        self.expect('{')?;
        loop {
            self.skip_ws();
            if self.chars.peek() == Some(&'}') {
                self.chars.next();
                break;
            }
            let key = match self.chars.peek() {
                Some('\'' | '"') => self.quoted()?,
                _ => return Err(malformed("expected quoted key")),
            };
            self.skip_ws();
            self.expect(':')?;
            self.skip_ws();
            let value = match self.chars.peek() {
                Some('\'' | '"') => self.quoted()?,
                Some('{' | '[' | '(') => {
                    return Err(malformed(&format!("field '{key}' is not a scalar")))
                }
                _ => self.bare()?,
            };
            fields.insert(key, value);
            self.skip_ws();
            match self.chars.next() {
                Some(',') => continue,
                Some('}') => break,
                _ => return Err(malformed("expected ',' or '}'")),
            }
        }
        self.skip_ws();
        if self.chars.next().is_some() {
            return Err(malformed("trailing characters after '}'"));
        }
        Ok(fields)
    }

    fn skip_ws(&mut self) {
        while self.chars.peek().is_some_and(|c| c.is_whitespace()) {
            self.chars.next();
        }
    }

    fn expect(&mut self, want: char) -> Result<()> {
        match self.chars.next() {
            Some(c) if c == want => Ok(()),
            _ => Err(malformed(&format!("expected '{want}'"))),
        }
    }

    fn quoted(&mut self) -> Result<String> {
        let quote = self.chars.next().ok_or_else(|| malformed("unexpected end"))?;
        let mut out = String::new();
        loop {
            match self.chars.next() {
                Some('\\') => match self.chars.next() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some(c) => out.push(c),
                    None => return Err(malformed("unterminated string")),
                },
                Some(c) if c == quote => return Ok(out),
                Some(c) => out.push(c),
                None => return Err(malformed("unterminated string")),
            }
        }
    }

    /// Numbers and the Python constants `True`, `False`, `None`.
    fn bare(&mut self) -> Result<String> {
        let mut token = String::new();
        while let Some(c) = self.chars.peek() {
            if *c == ',' || *c == '}' || c.is_whitespace() {
                break;
            }
            token.push(*c);
            self.chars.next();
        }
        match token.as_str() {
            "" => Err(malformed("empty value")),
            "True" => Ok("true".to_string()),
            "False" => Ok("false".to_string()),
            "None" => Ok(String::new()),
            t if t.parse::<f64>().is_ok() => Ok(token),
            t => Err(malformed(&format!("unrecognized value '{t}'"))),
        }
    }
}

fn malformed(msg: &str) -> Error {
    Error::MalformedMetadata(msg.to_string())
}
