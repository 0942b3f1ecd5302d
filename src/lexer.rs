/// Lexer — script text to tokens.
///
/// Line terminators are tracked per token (`newline_before`) because
/// automatic semicolon insertion and the restricted productions
/// (return/throw/break/continue, postfix ++/--) are line-sensitive.
/// A `/` is a regex literal opener or a division sign depending on the last
/// significant token.
use crate::errors::Span;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    Number(f64),
    Str(String),
    Regex { pattern: String, flags: String },
    Ident(String),

    // Keywords
    Break,
    Case,
    Catch,
    Continue,
    Debugger,
    Default,
    Delete,
    Do,
    Else,
    Finally,
    For,
    Function,
    If,
    In,
    InstanceOf,
    New,
    Return,
    Switch,
    This,
    Throw,
    Try,
    TypeOf,
    Var,
    Void,
    While,
    With,
    True,
    False,
    Null,

    // Punctuation
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Semicolon,
    Comma,
    Dot,
    Colon,
    Question,

    // Operators
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    PercentAssign,
    ShlAssign,
    ShrAssign,
    UshrAssign,
    AndAssign,
    XorAssign,
    OrAssign,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Shl,
    Shr,
    Ushr,
    PlusPlus,
    MinusMinus,
    Eq,
    Ne,
    StrictEq,
    StrictNe,
    Lt,
    Gt,
    Le,
    Ge,
    AndAnd,
    OrOr,
    Not,
    BitAnd,
    BitOr,
    BitXor,
    BitNot,

    Eof,
}

#[derive(Debug, Clone)]
pub struct TokenInfo {
    pub token: Token,
    pub span: Span,
    /// A line terminator appeared between the previous token and this one.
    pub newline_before: bool,
}

#[derive(Debug, Clone)]
pub struct LexError {
    pub message: String,
    pub span: Span,
}

impl LexError {
    fn at(message: impl Into<String>, start: usize, end: usize) -> Self {
        LexError {
            message: message.into(),
            span: Span::new(start, end),
        }
    }
}

pub struct Lexer {
    input: Vec<char>,
    pos: usize,
    /// Byte offset of `pos` (spans are byte-based for the line map).
    byte_pos: usize,
    newline_pending: bool,
    /// Last token that was not a comment; decides regex vs. division.
    last_significant: Option<Token>,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Lexer {
            input: input.chars().collect(),
            pos: 0,
            byte_pos: 0,
            newline_pending: false,
            last_significant: None,
        }
    }

    fn current(&self) -> Option<char> {
        self.input.get(self.pos).copied()
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.input.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.current()?;
        self.pos += 1;
        self.byte_pos += ch.len_utf8();
        Some(ch)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.current() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn is_line_terminator(ch: char) -> bool {
        matches!(ch, '\n' | '\r' | '\u{2028}' | '\u{2029}')
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<(), LexError> {
        loop {
            match self.current() {
                Some(ch) if Self::is_line_terminator(ch) => {
                    self.newline_pending = true;
                    self.advance();
                }
                Some(ch) if ch.is_whitespace() => {
                    self.advance();
                }
                Some('/') if self.peek(1) == Some('/') => {
                    while let Some(ch) = self.current() {
                        if Self::is_line_terminator(ch) {
                            break;
                        }
                        self.advance();
                    }
                }
                Some('/') if self.peek(1) == Some('*') => {
                    let start = self.byte_pos;
                    self.advance();
                    self.advance();
                    let mut closed = false;
                    while let Some(ch) = self.current() {
                        if ch == '*' && self.peek(1) == Some('/') {
                            self.advance();
                            self.advance();
                            closed = true;
                            break;
                        }
                        if Self::is_line_terminator(ch) {
                            self.newline_pending = true;
                        }
                        self.advance();
                    }
                    if !closed {
                        return Err(LexError::at("Unterminated comment", start, self.byte_pos));
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    /// Whether a `/` here opens a regex literal (operand position) rather
    /// than a division operator.
    fn regex_allowed(&self) -> bool {
        match &self.last_significant {
            None => true,
            Some(tok) => !matches!(
                tok,
                Token::Ident(_)
                    | Token::Number(_)
                    | Token::Str(_)
                    | Token::Regex { .. }
                    | Token::RParen
                    | Token::RBracket
                    | Token::RBrace
                    | Token::This
                    | Token::True
                    | Token::False
                    | Token::Null
                    | Token::PlusPlus
                    | Token::MinusMinus
            ),
        }
    }

    fn read_identifier(&mut self) -> String {
        let start = self.pos;
        while let Some(ch) = self.current() {
            if ch.is_alphanumeric() || ch == '_' || ch == '$' {
                self.advance();
            } else {
                break;
            }
        }
        self.input[start..self.pos].iter().collect()
    }

    fn read_number(&mut self) -> Result<f64, LexError> {
        let start_byte = self.byte_pos;
        let start = self.pos;

        // Hex.
        if self.current() == Some('0') && matches!(self.peek(1), Some('x') | Some('X')) {
            self.advance();
            self.advance();
            let digits_start = self.pos;
            while let Some(ch) = self.current() {
                if ch.is_ascii_hexdigit() {
                    self.advance();
                } else {
                    break;
                }
            }
            if self.pos == digits_start {
                return Err(LexError::at(
                    "Invalid hexadecimal literal",
                    start_byte,
                    self.byte_pos,
                ));
            }
            let text: String = self.input[digits_start..self.pos].iter().collect();
            return u64::from_str_radix(&text, 16)
                .map(|v| v as f64)
                .map_err(|_| LexError::at("Invalid hexadecimal literal", start_byte, self.byte_pos));
        }

        // Legacy octal: leading 0 followed only by octal digits.
        if self.current() == Some('0') && matches!(self.peek(1), Some('0'..='7')) {
            let mut lookahead = self.pos + 1;
            let mut octal = true;
            while let Some(ch) = self.input.get(lookahead) {
                match ch {
                    '0'..='7' => lookahead += 1,
                    '8' | '9' | '.' | 'e' | 'E' => {
                        octal = false;
                        break;
                    }
                    _ => break,
                }
            }
            if octal {
                self.advance(); // leading 0
                let digits_start = self.pos;
                while matches!(self.current(), Some('0'..='7')) {
                    self.advance();
                }
                let text: String = self.input[digits_start..self.pos].iter().collect();
                return u64::from_str_radix(&text, 8)
                    .map(|v| v as f64)
                    .map_err(|_| LexError::at("Invalid octal literal", start_byte, self.byte_pos));
            }
        }

        // Decimal with optional fraction and exponent.
        while matches!(self.current(), Some('0'..='9')) {
            self.advance();
        }
        if self.current() == Some('.') && matches!(self.peek(1), Some('0'..='9')) {
            self.advance();
            while matches!(self.current(), Some('0'..='9')) {
                self.advance();
            }
        }
        if matches!(self.current(), Some('e') | Some('E')) {
            let mut lookahead = self.pos + 1;
            if matches!(self.input.get(lookahead), Some('+') | Some('-')) {
                lookahead += 1;
            }
            if matches!(self.input.get(lookahead), Some('0'..='9')) {
                self.advance(); // e
                if matches!(self.current(), Some('+') | Some('-')) {
                    self.advance();
                }
                while matches!(self.current(), Some('0'..='9')) {
                    self.advance();
                }
            }
        }
        let text: String = self.input[start..self.pos].iter().collect();
        text.parse::<f64>()
            .map_err(|_| LexError::at(format!("Invalid number '{}'", text), start_byte, self.byte_pos))
    }

    fn read_string(&mut self, quote: char) -> Result<String, LexError> {
        let start_byte = self.byte_pos;
        self.advance(); // opening quote
        let mut out = String::new();
        loop {
            let ch = match self.current() {
                Some(c) => c,
                None => {
                    return Err(LexError::at(
                        "Unterminated string literal",
                        start_byte,
                        self.byte_pos,
                    ))
                }
            };
            if ch == quote {
                self.advance();
                return Ok(out);
            }
            if Self::is_line_terminator(ch) {
                return Err(LexError::at(
                    "Unterminated string literal",
                    start_byte,
                    self.byte_pos,
                ));
            }
            if ch == '\\' {
                self.advance();
                let esc = match self.current() {
                    Some(c) => c,
                    None => {
                        return Err(LexError::at(
                            "Unterminated string literal",
                            start_byte,
                            self.byte_pos,
                        ))
                    }
                };
                match esc {
                    'n' => {
                        out.push('\n');
                        self.advance();
                    }
                    't' => {
                        out.push('\t');
                        self.advance();
                    }
                    'r' => {
                        out.push('\r');
                        self.advance();
                    }
                    'b' => {
                        out.push('\u{8}');
                        self.advance();
                    }
                    'f' => {
                        out.push('\u{c}');
                        self.advance();
                    }
                    'v' => {
                        out.push('\u{b}');
                        self.advance();
                    }
                    '0' => {
                        out.push('\0');
                        self.advance();
                    }
                    'x' => {
                        self.advance();
                        let mut code = 0u32;
                        for _ in 0..2 {
                            match self.current().and_then(|c| c.to_digit(16)) {
                                Some(d) => {
                                    code = code * 16 + d;
                                    self.advance();
                                }
                                None => {
                                    return Err(LexError::at(
                                        "Invalid \\x escape",
                                        start_byte,
                                        self.byte_pos,
                                    ))
                                }
                            }
                        }
                        out.push(char::from_u32(code).unwrap_or('\u{fffd}'));
                    }
                    'u' => {
                        self.advance();
                        let mut code = 0u32;
                        for _ in 0..4 {
                            match self.current().and_then(|c| c.to_digit(16)) {
                                Some(d) => {
                                    code = code * 16 + d;
                                    self.advance();
                                }
                                None => {
                                    return Err(LexError::at(
                                        "Invalid \\u escape",
                                        start_byte,
                                        self.byte_pos,
                                    ))
                                }
                            }
                        }
                        out.push(char::from_u32(code).unwrap_or('\u{fffd}'));
                    }
                    c if Self::is_line_terminator(c) => {
                        // Line continuation contributes nothing.
                        self.advance();
                        if c == '\r' && self.current() == Some('\n') {
                            self.advance();
                        }
                    }
                    c => {
                        out.push(c);
                        self.advance();
                    }
                }
            } else {
                out.push(ch);
                self.advance();
            }
        }
    }

    fn read_regex(&mut self) -> Result<Token, LexError> {
        let start_byte = self.byte_pos;
        self.advance(); // opening /
        let mut pattern = String::new();
        let mut in_class = false;
        loop {
            let ch = match self.current() {
                Some(c) if !Self::is_line_terminator(c) => c,
                _ => {
                    return Err(LexError::at(
                        "Unterminated regular expression literal",
                        start_byte,
                        self.byte_pos,
                    ))
                }
            };
            match ch {
                '\\' => {
                    pattern.push(ch);
                    self.advance();
                    if let Some(next) = self.current() {
                        pattern.push(next);
                        self.advance();
                    }
                }
                '[' => {
                    in_class = true;
                    pattern.push(ch);
                    self.advance();
                }
                ']' => {
                    in_class = false;
                    pattern.push(ch);
                    self.advance();
                }
                '/' if !in_class => {
                    self.advance();
                    break;
                }
                _ => {
                    pattern.push(ch);
                    self.advance();
                }
            }
        }
        let mut flags = String::new();
        while let Some(ch) = self.current() {
            if ch.is_ascii_alphabetic() {
                flags.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        Ok(Token::Regex { pattern, flags })
    }

    fn keyword_or_ident(ident: String) -> Token {
        match ident.as_str() {
            "break" => Token::Break,
            "case" => Token::Case,
            "catch" => Token::Catch,
            "continue" => Token::Continue,
            "debugger" => Token::Debugger,
            "default" => Token::Default,
            "delete" => Token::Delete,
            "do" => Token::Do,
            "else" => Token::Else,
            "finally" => Token::Finally,
            "for" => Token::For,
            "function" => Token::Function,
            "if" => Token::If,
            "in" => Token::In,
            "instanceof" => Token::InstanceOf,
            "new" => Token::New,
            "return" => Token::Return,
            "switch" => Token::Switch,
            "this" => Token::This,
            "throw" => Token::Throw,
            "try" => Token::Try,
            "typeof" => Token::TypeOf,
            "var" => Token::Var,
            "void" => Token::Void,
            "while" => Token::While,
            "with" => Token::With,
            "true" => Token::True,
            "false" => Token::False,
            "null" => Token::Null,
            _ => Token::Ident(ident),
        }
    }

    pub fn next_token(&mut self) -> Result<TokenInfo, LexError> {
        self.skip_whitespace_and_comments()?;
        let newline_before = std::mem::take(&mut self.newline_pending);
        let start = self.byte_pos;

        let token = match self.current() {
            None => Token::Eof,
            Some(ch) if ch.is_ascii_digit() => Token::Number(self.read_number()?),
            Some('.') if matches!(self.peek(1), Some('0'..='9')) => {
                Token::Number(self.read_number_fraction_only()?)
            }
            Some('"') | Some('\'') => Token::Str(self.read_string(self.current().unwrap())?),
            Some(ch) if ch.is_alphabetic() || ch == '_' || ch == '$' => {
                Self::keyword_or_ident(self.read_identifier())
            }
            Some('/') if self.regex_allowed() => self.read_regex()?,
            Some(ch) => self.read_punctuation(ch, start)?,
        };

        self.last_significant = Some(token.clone());
        Ok(TokenInfo {
            token,
            span: Span::new(start, self.byte_pos),
            newline_before,
        })
    }

    fn read_number_fraction_only(&mut self) -> Result<f64, LexError> {
        let start = self.pos;
        let start_byte = self.byte_pos;
        self.advance(); // '.'
        while matches!(self.current(), Some('0'..='9')) {
            self.advance();
        }
        if matches!(self.current(), Some('e') | Some('E')) {
            self.advance();
            if matches!(self.current(), Some('+') | Some('-')) {
                self.advance();
            }
            while matches!(self.current(), Some('0'..='9')) {
                self.advance();
            }
        }
        let text: String = self.input[start..self.pos].iter().collect();
        format!("0{}", text)
            .parse::<f64>()
            .map_err(|_| LexError::at(format!("Invalid number '{}'", text), start_byte, self.byte_pos))
    }

    fn read_punctuation(&mut self, ch: char, start: usize) -> Result<Token, LexError> {
        self.advance();
        let token = match ch {
            '(' => Token::LParen,
            ')' => Token::RParen,
            '{' => Token::LBrace,
            '}' => Token::RBrace,
            '[' => Token::LBracket,
            ']' => Token::RBracket,
            ';' => Token::Semicolon,
            ',' => Token::Comma,
            '.' => Token::Dot,
            ':' => Token::Colon,
            '?' => Token::Question,
            '~' => Token::BitNot,
            '+' => {
                if self.eat('+') {
                    Token::PlusPlus
                } else if self.eat('=') {
                    Token::PlusAssign
                } else {
                    Token::Plus
                }
            }
            '-' => {
                if self.eat('-') {
                    Token::MinusMinus
                } else if self.eat('=') {
                    Token::MinusAssign
                } else {
                    Token::Minus
                }
            }
            '*' => {
                if self.eat('=') {
                    Token::StarAssign
                } else {
                    Token::Star
                }
            }
            '/' => {
                if self.eat('=') {
                    Token::SlashAssign
                } else {
                    Token::Slash
                }
            }
            '%' => {
                if self.eat('=') {
                    Token::PercentAssign
                } else {
                    Token::Percent
                }
            }
            '=' => {
                if self.eat('=') {
                    if self.eat('=') {
                        Token::StrictEq
                    } else {
                        Token::Eq
                    }
                } else {
                    Token::Assign
                }
            }
            '!' => {
                if self.eat('=') {
                    if self.eat('=') {
                        Token::StrictNe
                    } else {
                        Token::Ne
                    }
                } else {
                    Token::Not
                }
            }
            '<' => {
                if self.eat('<') {
                    if self.eat('=') {
                        Token::ShlAssign
                    } else {
                        Token::Shl
                    }
                } else if self.eat('=') {
                    Token::Le
                } else {
                    Token::Lt
                }
            }
            '>' => {
                if self.eat('>') {
                    if self.eat('>') {
                        if self.eat('=') {
                            Token::UshrAssign
                        } else {
                            Token::Ushr
                        }
                    } else if self.eat('=') {
                        Token::ShrAssign
                    } else {
                        Token::Shr
                    }
                } else if self.eat('=') {
                    Token::Ge
                } else {
                    Token::Gt
                }
            }
            '&' => {
                if self.eat('&') {
                    Token::AndAnd
                } else if self.eat('=') {
                    Token::AndAssign
                } else {
                    Token::BitAnd
                }
            }
            '|' => {
                if self.eat('|') {
                    Token::OrOr
                } else if self.eat('=') {
                    Token::OrAssign
                } else {
                    Token::BitOr
                }
            }
            '^' => {
                if self.eat('=') {
                    Token::XorAssign
                } else {
                    Token::BitXor
                }
            }
            other => {
                return Err(LexError::at(
                    format!("Unexpected character '{}'", other),
                    start,
                    self.byte_pos,
                ))
            }
        };
        Ok(token)
    }

    pub fn tokenize(mut self) -> Result<Vec<TokenInfo>, LexError> {
        let mut tokens = Vec::new();
        loop {
            let info = self.next_token()?;
            let done = info.token == Token::Eof;
            tokens.push(info);
            if done {
                return Ok(tokens);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(src: &str) -> Vec<Token> {
        Lexer::new(src)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.token)
            .collect()
    }

    #[test]
    fn numbers() {
        assert_eq!(tokens("42")[0], Token::Number(42.0));
        assert_eq!(tokens("3.25")[0], Token::Number(3.25));
        assert_eq!(tokens("0x10")[0], Token::Number(16.0));
        assert_eq!(tokens("0777")[0], Token::Number(511.0));
        assert_eq!(tokens("1e3")[0], Token::Number(1000.0));
        assert_eq!(tokens(".5")[0], Token::Number(0.5));
    }

    #[test]
    fn string_escapes() {
        assert_eq!(tokens(r#""a\nb""#)[0], Token::Str("a\nb".into()));
        assert_eq!(tokens(r#"'\x41'"#)[0], Token::Str("A".into()));
        assert_eq!(tokens(r#""A""#)[0], Token::Str("A".into()));
    }

    #[test]
    fn unterminated_string_is_an_error() {
        assert!(Lexer::new("\"abc").tokenize().is_err());
    }

    #[test]
    fn regex_vs_division() {
        // Operand position: regex.
        let ts = tokens("x = /ab+c/gi;");
        assert!(matches!(
            &ts[2],
            Token::Regex { pattern, flags } if pattern == "ab+c" && flags == "gi"
        ));
        // After an operand: division.
        let ts = tokens("a / b");
        assert_eq!(ts[1], Token::Slash);
        // Character class may contain a slash.
        let ts = tokens("= /[/]/");
        assert!(matches!(&ts[1], Token::Regex { pattern, .. } if pattern == "[/]"));
    }

    #[test]
    fn newline_flags() {
        let infos = Lexer::new("a\nb c").tokenize().unwrap();
        assert!(!infos[0].newline_before);
        assert!(infos[1].newline_before);
        assert!(!infos[2].newline_before);
    }

    #[test]
    fn multi_char_operators() {
        assert_eq!(
            tokens("a >>>= 1")[1],
            Token::UshrAssign
        );
        assert_eq!(tokens("a === b")[1], Token::StrictEq);
        assert_eq!(tokens("a !== b")[1], Token::StrictNe);
    }
}
