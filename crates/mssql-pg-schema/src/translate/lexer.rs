//! T-SQL tokenizer.
//!
//! Produces a flat token stream with comments removed. Each token remembers
//! whether whitespace preceded it so rewritten output keeps the source's
//! spacing where nothing changed.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Keyword or bare identifier (including `#temp` names).
    Word,
    /// `[name]` or `"name"`; text holds the unquoted name.
    QuotedIdent,
    /// `@name`
    Variable,
    /// `@@name`
    SystemVariable,
    /// `'text'`; text holds the content with quotes still doubled.
    String,
    /// `N'text'`
    NString,
    Number,
    /// Operator. Compound assignments (`+=`) are single tokens.
    Symbol,
    LParen,
    RParen,
    Comma,
    Semicolon,
    Dot,
    /// Already in target syntax; rendered verbatim.
    Raw,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub space_before: bool,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, space_before: bool) -> Self {
        Self {
            kind,
            text: text.into(),
            space_before,
        }
    }

    /// Target-syntax fragment.
    pub fn raw(text: impl Into<String>) -> Self {
        Self::new(TokenKind::Raw, text, true)
    }

    pub fn is_word(&self, word: &str) -> bool {
        self.kind == TokenKind::Word && self.text.eq_ignore_ascii_case(word)
    }

    pub fn is_any_word(&self, words: &[&str]) -> bool {
        self.kind == TokenKind::Word && words.iter().any(|w| self.text.eq_ignore_ascii_case(w))
    }

    pub fn is_symbol(&self, symbol: &str) -> bool {
        self.kind == TokenKind::Symbol && self.text == symbol
    }

    pub fn upper(&self) -> String {
        self.text.to_ascii_uppercase()
    }

    /// Copy with a different leading-space flag.
    pub fn spaced(mut self, space_before: bool) -> Self {
        self.space_before = space_before;
        self
    }
}

const COMPOUND_SYMBOLS: [&str; 11] = [
    "<=", ">=", "<>", "!=", "!<", "!>", "+=", "-=", "*=", "/=", "||",
];

pub fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    let mut space = false;

    while i < chars.len() {
        let c = chars[i];

        if c.is_whitespace() {
            space = true;
            i += 1;
            continue;
        }
        if c == '-' && chars.get(i + 1) == Some(&'-') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            space = true;
            continue;
        }
        if c == '/' && chars.get(i + 1) == Some(&'*') {
            // Block comments nest in T-SQL.
            let mut depth = 0;
            loop {
                if i >= chars.len() {
                    return Err("unterminated block comment".into());
                }
                if chars[i] == '/' && chars.get(i + 1) == Some(&'*') {
                    depth += 1;
                    i += 2;
                } else if chars[i] == '*' && chars.get(i + 1) == Some(&'/') {
                    depth -= 1;
                    i += 2;
                    if depth == 0 {
                        break;
                    }
                } else {
                    i += 1;
                }
            }
            space = true;
            continue;
        }

        let start = i;
        let (kind, text) = match c {
            '\'' => {
                let (content, end) = read_string(&chars, i + 1)?;
                i = end;
                (TokenKind::String, content)
            }
            'N' | 'n' if chars.get(i + 1) == Some(&'\'') => {
                let (content, end) = read_string(&chars, i + 2)?;
                i = end;
                (TokenKind::NString, content)
            }
            '[' => {
                let mut name = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err("unterminated bracketed identifier".into()),
                        Some(']') if chars.get(i + 1) == Some(&']') => {
                            name.push(']');
                            i += 2;
                        }
                        Some(']') => {
                            i += 1;
                            break;
                        }
                        Some(&ch) => {
                            name.push(ch);
                            i += 1;
                        }
                    }
                }
                (TokenKind::QuotedIdent, name)
            }
            '"' => {
                let mut name = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err("unterminated quoted identifier".into()),
                        Some('"') if chars.get(i + 1) == Some(&'"') => {
                            name.push('"');
                            i += 2;
                        }
                        Some('"') => {
                            i += 1;
                            break;
                        }
                        Some(&ch) => {
                            name.push(ch);
                            i += 1;
                        }
                    }
                }
                (TokenKind::QuotedIdent, name)
            }
            '@' => {
                let system = chars.get(i + 1) == Some(&'@');
                i += if system { 2 } else { 1 };
                while i < chars.len() && is_ident_char(chars[i]) {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                if system {
                    (TokenKind::SystemVariable, text)
                } else {
                    (TokenKind::Variable, text)
                }
            }
            '(' => {
                i += 1;
                (TokenKind::LParen, "(".to_string())
            }
            ')' => {
                i += 1;
                (TokenKind::RParen, ")".to_string())
            }
            ',' => {
                i += 1;
                (TokenKind::Comma, ",".to_string())
            }
            ';' => {
                i += 1;
                (TokenKind::Semicolon, ";".to_string())
            }
            '.' if !chars.get(i + 1).is_some_and(|d| d.is_ascii_digit()) => {
                i += 1;
                (TokenKind::Dot, ".".to_string())
            }
            c if c.is_ascii_digit() || c == '.' => {
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                if i < chars.len()
                    && (chars[i] == 'e' || chars[i] == 'E')
                    && chars
                        .get(i + 1)
                        .is_some_and(|d| d.is_ascii_digit() || *d == '-' || *d == '+')
                {
                    i += 2;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
                (TokenKind::Number, chars[start..i].iter().collect())
            }
            c if is_ident_start(c) => {
                i += 1;
                while i < chars.len() && is_ident_char(chars[i]) {
                    i += 1;
                }
                (TokenKind::Word, chars[start..i].iter().collect())
            }
            _ => {
                let pair: String = chars[i..(i + 2).min(chars.len())].iter().collect();
                if COMPOUND_SYMBOLS.contains(&pair.as_str()) {
                    i += 2;
                    (TokenKind::Symbol, pair)
                } else if "+-*/%=<>&|^~!".contains(c) {
                    i += 1;
                    (TokenKind::Symbol, c.to_string())
                } else {
                    return Err(format!("unexpected character '{}'", c));
                }
            }
        };

        tokens.push(Token::new(kind, text, space));
        space = false;
    }

    Ok(tokens)
}

/// Read a quoted string body starting after the opening quote. Returns the
/// content (quotes still doubled) and the index after the closing quote.
fn read_string(chars: &[char], mut i: usize) -> Result<(String, usize), String> {
    let mut content = String::new();
    loop {
        match chars.get(i) {
            None => return Err("unterminated string literal".into()),
            Some('\'') if chars.get(i + 1) == Some(&'\'') => {
                content.push_str("''");
                i += 2;
            }
            Some('\'') => return Ok((content, i + 1)),
            Some(&ch) => {
                content.push(ch);
                i += 1;
            }
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '#'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '#' || c == '$'
}

/// Render tokens in target syntax.
pub fn render(tokens: &[Token]) -> String {
    let mut out = String::new();
    for (i, token) in tokens.iter().enumerate() {
        if i > 0 && token.space_before {
            out.push(' ');
        }
        match token.kind {
            TokenKind::QuotedIdent => {
                out.push('"');
                out.push_str(&token.text.replace('"', "\"\""));
                out.push('"');
            }
            TokenKind::String | TokenKind::NString => {
                out.push('\'');
                out.push_str(&token.text);
                out.push('\'');
            }
            _ => out.push_str(&token.text),
        }
    }
    out
}
