//! Decoder for raw FETCH reply lines carrying Gmail's vendor attributes.
//!
//! A line looks like `12 (X-GM-THRID 1111 X-GM-MSGID 2222 X-GM-LABELS
//! (\Inbox "Work Stuff") UID 12)`. The grammar is a small recursive descent
//! over atoms, quoted strings and nested parenthesized lists; it is
//! independent of any connection so it can be exercised directly.

use thiserror::Error;

/// A value inside a FETCH attribute list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Atom(String),
    Quoted(String),
    List(Vec<Value>),
}

impl Value {
    /// Textual content of an atom or quoted string.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Atom(s) | Value::Quoted(s) => Some(s),
            Value::List(_) => None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unexpected end of line at byte {0}")]
    UnexpectedEnd(usize),
    #[error("unexpected character '{found}' at byte {at}, expected {expected}")]
    Unexpected {
        at: usize,
        found: char,
        expected: &'static str,
    },
    #[error("attribute {name} has no value")]
    MissingValue { name: String },
    #[error("attribute {name} has invalid value '{value}'")]
    InvalidValue { name: String, value: String },
}

/// A structurally decoded line: leading message number plus the
/// attribute name/value pairs in their original order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchLine {
    pub msg_number: u32,
    pub attributes: Vec<(String, Value)>,
}

impl FetchLine {
    /// Look up an attribute by name (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }
}

/// The vendor fields extracted from one reply line. Absent attributes are
/// `None` rather than errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GmailFields {
    pub msg_number: u32,
    pub uid: Option<u32>,
    pub stable_id: Option<u64>,
    pub thread_id: Option<u64>,
    pub labels: Option<Vec<String>>,
    pub flags: Option<Vec<String>>,
}

impl GmailFields {
    /// The per-mailbox sequence number: the UID when the server sent one,
    /// otherwise the leading message number.
    pub fn sequence_number(&self) -> u32 {
        self.uid.unwrap_or(self.msg_number)
    }
}

/// Characters allowed in an atom besides ASCII letters and digits.
const ATOM_PUNCTUATION: &str = "!#$%&*+,-./:;<=>?@[]^_`{|}~\\'";

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, wanted: char, expected: &'static str) -> Result<(), DecodeError> {
        match self.bump() {
            Some(c) if c == wanted => Ok(()),
            Some(found) => Err(DecodeError::Unexpected {
                at: self.pos - found.len_utf8(),
                found,
                expected,
            }),
            None => Err(DecodeError::UnexpectedEnd(self.pos)),
        }
    }

    fn msg_number(&mut self) -> Result<u32, DecodeError> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.pos += 1;
        }
        if start == self.pos {
            return match self.peek() {
                Some(found) => Err(DecodeError::Unexpected {
                    at: start,
                    found,
                    expected: "message number",
                }),
                None => Err(DecodeError::UnexpectedEnd(start)),
            };
        }
        let digits = &self.input[start..self.pos];
        digits.parse().map_err(|_| DecodeError::InvalidValue {
            name: "message number".to_string(),
            value: digits.to_string(),
        })
    }

    fn list(&mut self) -> Result<Vec<Value>, DecodeError> {
        self.expect('(', "'('")?;
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                Some(')') => {
                    self.pos += 1;
                    return Ok(items);
                }
                Some(_) => items.push(self.item()?),
                None => return Err(DecodeError::UnexpectedEnd(self.pos)),
            }
        }
    }

    fn item(&mut self) -> Result<Value, DecodeError> {
        match self.peek() {
            Some('(') => self.list().map(Value::List),
            Some('"') => self.quoted().map(Value::Quoted),
            Some(c) if is_atom_char(c) => Ok(Value::Atom(self.atom())),
            Some(found) => Err(DecodeError::Unexpected {
                at: self.pos,
                found,
                expected: "atom, quoted string or list",
            }),
            None => Err(DecodeError::UnexpectedEnd(self.pos)),
        }
    }

    fn atom(&mut self) -> String {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if is_atom_char(c)) {
            self.pos += 1;
        }
        self.input[start..self.pos].to_string()
    }

    fn quoted(&mut self) -> Result<String, DecodeError> {
        self.expect('"', "'\"'")?;
        let mut out = String::new();
        loop {
            match self.bump() {
                Some('"') => return Ok(out),
                Some('\\') => match self.bump() {
                    Some(c) => out.push(c),
                    None => return Err(DecodeError::UnexpectedEnd(self.pos)),
                },
                Some(c) => out.push(c),
                None => return Err(DecodeError::UnexpectedEnd(self.pos)),
            }
        }
    }
}

fn is_atom_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || ATOM_PUNCTUATION.contains(c)
}

/// Parse `<seq> (<NAME> <value> ...)` into its attribute pairs.
pub fn parse_line(line: &str) -> Result<FetchLine, DecodeError> {
    let mut parser = Parser::new(line.trim_end_matches(['\r', '\n']));
    parser.skip_ws();
    let msg_number = parser.msg_number()?;
    parser.skip_ws();
    let items = parser.list()?;
    parser.skip_ws();
    if let Some(found) = parser.peek() {
        return Err(DecodeError::Unexpected {
            at: parser.pos,
            found,
            expected: "end of line",
        });
    }

    let mut attributes = Vec::with_capacity(items.len() / 2);
    let mut iter = items.into_iter();
    while let Some(name) = iter.next() {
        let name = match name {
            Value::Atom(name) => name,
            other => {
                return Err(DecodeError::InvalidValue {
                    name: "attribute name".to_string(),
                    value: format!("{:?}", other),
                });
            }
        };
        let value = iter
            .next()
            .ok_or_else(|| DecodeError::MissingValue { name: name.clone() })?;
        attributes.push((name, value));
    }

    Ok(FetchLine {
        msg_number,
        attributes,
    })
}

/// Decode a reply line into the fields the synchronizer needs.
pub fn decode_gmail_fields(line: &str) -> Result<GmailFields, DecodeError> {
    let fetch = parse_line(line)?;

    Ok(GmailFields {
        msg_number: fetch.msg_number,
        uid: numeric(&fetch, "UID")?,
        stable_id: numeric(&fetch, "X-GM-MSGID")?,
        thread_id: numeric(&fetch, "X-GM-THRID")?,
        labels: text_list(&fetch, "X-GM-LABELS")?
            .map(|labels| labels.iter().map(|l| display_label(l).to_string()).collect()),
        flags: text_list(&fetch, "FLAGS")?,
    })
}

fn numeric<T: std::str::FromStr>(fetch: &FetchLine, name: &str) -> Result<Option<T>, DecodeError> {
    let Some(value) = fetch.get(name) else {
        return Ok(None);
    };
    let invalid = || DecodeError::InvalidValue {
        name: name.to_string(),
        value: format!("{:?}", value),
    };
    match value {
        Value::Atom(s) if s.eq_ignore_ascii_case("NIL") => Ok(None),
        Value::Atom(s) | Value::Quoted(s) => s.parse().map(Some).map_err(|_| invalid()),
        Value::List(_) => Err(invalid()),
    }
}

fn text_list(fetch: &FetchLine, name: &str) -> Result<Option<Vec<String>>, DecodeError> {
    match fetch.get(name) {
        None => Ok(None),
        Some(Value::Atom(s)) if s.eq_ignore_ascii_case("NIL") => Ok(None),
        Some(Value::List(items)) => items
            .iter()
            .map(|item| {
                item.as_text()
                    .map(str::to_string)
                    .ok_or_else(|| DecodeError::InvalidValue {
                        name: name.to_string(),
                        value: format!("{:?}", item),
                    })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some),
        Some(other) => Err(DecodeError::InvalidValue {
            name: name.to_string(),
            value: format!("{:?}", other),
        }),
    }
}

/// Strip the reserved-name marker from a system label (`\Inbox` -> `Inbox`).
pub fn display_label(label: &str) -> &str {
    label.strip_prefix('\\').unwrap_or(label)
}
