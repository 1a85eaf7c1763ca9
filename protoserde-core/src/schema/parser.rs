//! # `.proto` Parser
//!
//! A hand-written lexer and recursive-descent parser for Protocol Buffers IDL files.
//!
//! It only keeps what the codec needs: packages, imports, messages (with nested types,
//! `oneof`s and `map<K, V>` fields) and enums. Services, extensions and most options are
//! parsed for well-formedness and dropped.
use super::{
    EnumDef, EnumValueDef, FieldDef, Import, Label, MessageDef, ScalarType, SchemaFile, Syntax,
    TypeRef,
};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{file}:{line}:{column}: {message}")]
pub struct ParseError {
    pub file: String,
    pub line: usize,
    pub column: usize,
    pub message: String,
}

/// Parses the text of a single `.proto` file.
///
/// `name` is the logical path of the file, used both as the identity of the returned
/// [`SchemaFile`] and in error messages.
pub fn parse(name: &str, source: &str) -> Result<SchemaFile, ParseError> {
    let tokens = Lexer::new(name, source).tokenize()?;
    Parser::new(name, tokens).parse_file()
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Ident(String),
    Int(u64),
    Float(f64),
    Str(String),
    Symbol(char),
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    line: usize,
    column: usize,
}

struct Lexer<'a> {
    file: &'a str,
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    fn new(file: &'a str, source: &str) -> Self {
        Self {
            file,
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            file: self.file.to_string(),
            line: self.line,
            column: self.column,
            message: message.into(),
        }
    }

    fn tokenize(mut self) -> Result<Vec<Token>, ParseError> {
        let mut tokens = Vec::new();

        while let Some(c) = self.peek(0) {
            if c.is_whitespace() {
                self.bump();
                continue;
            }

            if c == '/' && self.peek(1) == Some('/') {
                while let Some(c) = self.bump() {
                    if c == '\n' {
                        break;
                    }
                }
                continue;
            }

            if c == '/' && self.peek(1) == Some('*') {
                self.skip_block_comment()?;
                continue;
            }

            let (line, column) = (self.line, self.column);

            let kind = if c.is_ascii_alphabetic() || c == '_' {
                self.ident()
            } else if c.is_ascii_digit()
                || (c == '.' && self.peek(1).is_some_and(|n| n.is_ascii_digit()))
            {
                self.number()?
            } else if c == '"' || c == '\'' {
                self.string()?
            } else if "{}[]()<>;,=.-+:".contains(c) {
                self.bump();
                TokenKind::Symbol(c)
            } else {
                return Err(self.error(format!("unexpected character '{c}'")));
            };

            tokens.push(Token { kind, line, column });
        }

        Ok(tokens)
    }

    fn skip_block_comment(&mut self) -> Result<(), ParseError> {
        self.bump();
        self.bump();
        loop {
            match self.bump() {
                Some('*') if self.peek(0) == Some('/') => {
                    self.bump();
                    return Ok(());
                }
                Some(_) => {}
                None => return Err(self.error("unterminated block comment")),
            }
        }
    }

    fn ident(&mut self) -> TokenKind {
        let mut ident = String::new();
        while let Some(c) = self.peek(0) {
            if c.is_ascii_alphanumeric() || c == '_' {
                ident.push(c);
                self.bump();
            } else {
                break;
            }
        }
        TokenKind::Ident(ident)
    }

    fn take_while(&mut self, accept: impl Fn(char) -> bool) -> String {
        let mut out = String::new();
        while let Some(c) = self.peek(0) {
            if !accept(c) {
                break;
            }
            out.push(c);
            self.bump();
        }
        out
    }

    fn number(&mut self) -> Result<TokenKind, ParseError> {
        if self.peek(0) == Some('0') && matches!(self.peek(1), Some('x' | 'X')) {
            self.bump();
            self.bump();
            let digits = self.take_while(|c| c.is_ascii_hexdigit());
            return u64::from_str_radix(&digits, 16)
                .map(TokenKind::Int)
                .map_err(|_| self.error(format!("invalid hex literal '0x{digits}'")));
        }

        let mut text = self.take_while(|c| c.is_ascii_digit());
        let mut is_float = false;

        if self.peek(0) == Some('.') {
            is_float = true;
            self.bump();
            text.push('.');
            text.push_str(&self.take_while(|c| c.is_ascii_digit()));
        }

        if matches!(self.peek(0), Some('e' | 'E')) {
            is_float = true;
            self.bump();
            text.push('e');
            if let Some(sign @ ('+' | '-')) = self.peek(0) {
                self.bump();
                text.push(sign);
            }
            text.push_str(&self.take_while(|c| c.is_ascii_digit()));
        }

        if is_float {
            return text
                .parse::<f64>()
                .map(TokenKind::Float)
                .map_err(|_| self.error(format!("invalid float literal '{text}'")));
        }

        let parsed = if text.len() > 1 && text.starts_with('0') {
            u64::from_str_radix(&text[1..], 8)
        } else {
            text.parse::<u64>()
        };

        parsed
            .map(TokenKind::Int)
            .map_err(|_| self.error(format!("invalid integer literal '{text}'")))
    }

    fn string(&mut self) -> Result<TokenKind, ParseError> {
        let quote = self.bump();
        let mut out = String::new();

        loop {
            let c = match self.bump() {
                Some('\n') | None => return Err(self.error("unterminated string literal")),
                Some(c) => c,
            };

            if Some(c) == quote {
                return Ok(TokenKind::Str(out));
            }

            if c != '\\' {
                out.push(c);
                continue;
            }

            let escaped = self
                .bump()
                .ok_or_else(|| self.error("unterminated string literal"))?;

            match escaped {
                'n' => out.push('\n'),
                'r' => out.push('\r'),
                't' => out.push('\t'),
                'a' => out.push('\x07'),
                'b' => out.push('\x08'),
                'f' => out.push('\x0c'),
                'v' => out.push('\x0b'),
                'x' | 'X' => {
                    let mut digits = String::new();
                    while digits.len() < 2 && self.peek(0).is_some_and(|c| c.is_ascii_hexdigit()) {
                        digits.extend(self.bump());
                    }
                    let byte = u8::from_str_radix(&digits, 16)
                        .map_err(|_| self.error("invalid hex escape"))?;
                    out.push(char::from(byte));
                }
                '0'..='7' => {
                    let mut digits = escaped.to_string();
                    while digits.len() < 3 && self.peek(0).is_some_and(|c| ('0'..='7').contains(&c))
                    {
                        digits.extend(self.bump());
                    }
                    let byte = u8::from_str_radix(&digits, 8)
                        .map_err(|_| self.error("invalid octal escape"))?;
                    out.push(char::from(byte));
                }
                other => out.push(other),
            }
        }
    }
}

/// A parsed option value. Only what field options need is kept.
#[derive(Debug, Clone, PartialEq)]
enum Constant {
    Ident(String),
    Str(String),
    Number,
    Aggregate,
}

struct Parser<'a> {
    file: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(file: &'a str, tokens: Vec<Token>) -> Self {
        Self {
            file,
            tokens,
            pos: 0,
        }
    }

    fn peek(&self) -> Option<&TokenKind> {
        self.tokens.get(self.pos).map(|t| &t.kind)
    }

    fn peek_at(&self, offset: usize) -> Option<&TokenKind> {
        self.tokens.get(self.pos + offset).map(|t| &t.kind)
    }

    fn next(&mut self) -> Option<TokenKind> {
        let token = self.tokens.get(self.pos)?.kind.clone();
        self.pos += 1;
        Some(token)
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        let (line, column) = self
            .tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| (t.line, t.column))
            .unwrap_or((1, 1));

        ParseError {
            file: self.file.to_string(),
            line,
            column,
            message: message.into(),
        }
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        match self.peek() {
            Some(found) => self.error(format!("expected {expected}, found {}", describe(found))),
            None => self.error(format!("expected {expected}, found end of file")),
        }
    }

    fn is_ident(&self, word: &str) -> bool {
        matches!(self.peek(), Some(TokenKind::Ident(ident)) if ident == word)
    }

    fn is_symbol(&self, symbol: char) -> bool {
        matches!(self.peek(), Some(TokenKind::Symbol(c)) if *c == symbol)
    }

    fn eat_symbol(&mut self, symbol: char) -> bool {
        if self.is_symbol(symbol) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_ident(&mut self, word: &str) -> bool {
        if self.is_ident(word) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_symbol(&mut self, symbol: char) -> Result<(), ParseError> {
        if self.eat_symbol(symbol) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{symbol}'")))
        }
    }

    fn expect_keyword(&mut self, word: &str) -> Result<(), ParseError> {
        if self.eat_ident(word) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{word}'")))
        }
    }

    fn ident(&mut self) -> Result<String, ParseError> {
        match self.peek() {
            Some(TokenKind::Ident(ident)) => {
                let ident = ident.clone();
                self.pos += 1;
                Ok(ident)
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    /// `ident { "." ident }`
    fn full_ident(&mut self) -> Result<String, ParseError> {
        let mut name = self.ident()?;
        while self.is_symbol('.') {
            self.pos += 1;
            name.push('.');
            name.push_str(&self.ident()?);
        }
        Ok(name)
    }

    /// `[ "." ] full_ident`
    fn type_name(&mut self) -> Result<String, ParseError> {
        if self.eat_symbol('.') {
            Ok(format!(".{}", self.full_ident()?))
        } else {
            self.full_ident()
        }
    }

    /// One or more adjacent string literals, concatenated.
    fn string(&mut self) -> Result<String, ParseError> {
        let mut out = match self.peek() {
            Some(TokenKind::Str(s)) => s.clone(),
            _ => return Err(self.unexpected("string literal")),
        };
        self.pos += 1;
        while let Some(TokenKind::Str(s)) = self.peek() {
            out.push_str(s);
            self.pos += 1;
        }
        Ok(out)
    }

    fn int(&mut self) -> Result<u64, ParseError> {
        match self.peek() {
            Some(TokenKind::Int(value)) => {
                let value = *value;
                self.pos += 1;
                Ok(value)
            }
            _ => Err(self.unexpected("integer literal")),
        }
    }

    fn field_number(&mut self) -> Result<u32, ParseError> {
        let number = self.int()?;
        match u32::try_from(number) {
            Ok(n) if (1..=MAX_FIELD_NUMBER).contains(&n) => Ok(n),
            _ => {
                self.pos -= 1;
                Err(self.error(format!("field number {number} is out of range")))
            }
        }
    }

    fn enum_number(&mut self) -> Result<i32, ParseError> {
        let negative = self.eat_symbol('-');
        let magnitude = self.int()? as i128;
        let value = if negative { -magnitude } else { magnitude };
        i32::try_from(value).map_err(|_| {
            self.pos -= 1;
            self.error(format!("enum value {value} is out of range"))
        })
    }

    fn constant(&mut self) -> Result<Constant, ParseError> {
        if self.is_symbol('{') {
            self.skip_block()?;
            return Ok(Constant::Aggregate);
        }
        if self.eat_symbol('-') || self.eat_symbol('+') {
            let numeric = match self.peek() {
                Some(TokenKind::Int(_) | TokenKind::Float(_)) => true,
                Some(TokenKind::Ident(ident)) => ident == "inf" || ident == "nan",
                _ => false,
            };
            if !numeric {
                return Err(self.unexpected("numeric literal"));
            }
            self.pos += 1;
            return Ok(Constant::Number);
        }
        match self.peek() {
            Some(TokenKind::Int(_) | TokenKind::Float(_)) => {
                self.pos += 1;
                Ok(Constant::Number)
            }
            Some(TokenKind::Str(_)) => Ok(Constant::Str(self.string()?)),
            Some(TokenKind::Ident(_)) => Ok(Constant::Ident(self.full_ident()?)),
            _ => Err(self.unexpected("constant")),
        }
    }

    /// `( "(" full_ident ")" | ident ) { "." ident }`
    fn option_name(&mut self) -> Result<String, ParseError> {
        let mut name = if self.eat_symbol('(') {
            let inner = self.type_name()?;
            self.expect_symbol(')')?;
            format!("({inner})")
        } else {
            self.ident()?
        };
        while self.eat_symbol('.') {
            name.push('.');
            if self.eat_symbol('(') {
                let inner = self.type_name()?;
                self.expect_symbol(')')?;
                name.push_str(&format!("({inner})"));
            } else {
                name.push_str(&self.ident()?);
            }
        }
        Ok(name)
    }

    fn skip_option_statement(&mut self) -> Result<(), ParseError> {
        self.expect_keyword("option")?;
        self.option_name()?;
        self.expect_symbol('=')?;
        self.constant()?;
        self.expect_symbol(';')
    }

    fn skip_statement(&mut self) -> Result<(), ParseError> {
        while let Some(token) = self.next() {
            if token == TokenKind::Symbol(';') {
                return Ok(());
            }
        }
        Err(self.unexpected("';'"))
    }

    /// Skips a `{ ... }` block, including nested blocks.
    fn skip_block(&mut self) -> Result<(), ParseError> {
        self.expect_symbol('{')?;
        let mut depth = 1;
        while depth > 0 {
            match self.next() {
                Some(TokenKind::Symbol('{')) => depth += 1,
                Some(TokenKind::Symbol('}')) => depth -= 1,
                Some(_) => {}
                None => return Err(self.unexpected("'}'")),
            }
        }
        Ok(())
    }

    fn parse_file(mut self) -> Result<SchemaFile, ParseError> {
        let mut file = SchemaFile::new(self.file);

        if self.is_ident("syntax") {
            self.pos += 1;
            self.expect_symbol('=')?;
            let syntax = self.string()?;
            file.syntax = match syntax.as_str() {
                "proto2" => Syntax::Proto2,
                "proto3" => Syntax::Proto3,
                other => return Err(self.error(format!("unsupported syntax '{other}'"))),
            };
            self.expect_symbol(';')?;
        } else if self.is_ident("edition") {
            return Err(self.error("protobuf editions are not supported"));
        }

        while let Some(token) = self.peek().cloned() {
            match token {
                TokenKind::Symbol(';') => self.pos += 1,
                TokenKind::Ident(word) => match word.as_str() {
                    "package" => {
                        self.pos += 1;
                        if file.package.is_some() {
                            return Err(self.error("multiple package definitions"));
                        }
                        file.package = Some(self.full_ident()?);
                        self.expect_symbol(';')?;
                    }
                    "import" => {
                        self.pos += 1;
                        let public = self.eat_ident("public");
                        if !public {
                            self.eat_ident("weak");
                        }
                        let path = self.string()?;
                        self.expect_symbol(';')?;
                        file.imports.push(Import { path, public });
                    }
                    "option" => self.skip_option_statement()?,
                    "message" => file.messages.push(self.parse_message()?),
                    "enum" => file.enums.push(self.parse_enum()?),
                    "service" | "extend" => {
                        self.pos += 1;
                        self.type_name()?;
                        self.skip_block()?;
                    }
                    "syntax" | "edition" => {
                        return Err(self.error(format!("'{word}' must be the first statement")));
                    }
                    _ => return Err(self.unexpected("top-level definition")),
                },
                _ => return Err(self.unexpected("top-level definition")),
            }
        }

        Ok(file)
    }

    fn parse_message(&mut self) -> Result<MessageDef, ParseError> {
        self.expect_keyword("message")?;
        let mut message = MessageDef {
            name: self.ident()?,
            ..Default::default()
        };
        self.expect_symbol('{')?;

        loop {
            match self.peek().cloned() {
                Some(TokenKind::Symbol('}')) => {
                    self.pos += 1;
                    break;
                }
                Some(TokenKind::Symbol(';')) => self.pos += 1,
                Some(TokenKind::Ident(word)) => match word.as_str() {
                    "message" => {
                        let nested = self.parse_message()?;
                        message.messages.push(nested);
                    }
                    "enum" => {
                        let nested = self.parse_enum()?;
                        message.enums.push(nested);
                    }
                    "option" => self.skip_option_statement()?,
                    "oneof" => self.parse_oneof(&mut message)?,
                    "reserved" | "extensions" => self.skip_statement()?,
                    "extend" => {
                        self.pos += 1;
                        self.type_name()?;
                        self.skip_block()?;
                    }
                    "map" if matches!(self.peek_at(1), Some(TokenKind::Symbol('<'))) => {
                        self.parse_map_field(&mut message)?;
                    }
                    _ => {
                        let field = self.parse_field(None)?;
                        message.fields.push(field);
                    }
                },
                _ => return Err(self.unexpected("message element or '}'")),
            }
        }

        Ok(message)
    }

    fn parse_field(&mut self, oneof: Option<usize>) -> Result<FieldDef, ParseError> {
        let label = if oneof.is_some() {
            Label::None
        } else if self.eat_ident("optional") {
            Label::Optional
        } else if self.eat_ident("required") {
            Label::Required
        } else if self.eat_ident("repeated") {
            Label::Repeated
        } else {
            Label::None
        };

        if self.is_ident("group") {
            return Err(self.error("group fields are not supported"));
        }

        let type_name = self.type_name()?;
        let type_ref = match ScalarType::from_keyword(&type_name) {
            Some(scalar) => TypeRef::Scalar(scalar),
            None => TypeRef::Named(type_name),
        };

        let name = self.ident()?;
        self.expect_symbol('=')?;
        let number = self.field_number()?;

        let mut field = FieldDef {
            name,
            number,
            label,
            type_ref,
            oneof,
            packed: None,
            json_name: None,
        };

        self.parse_field_options(&mut field)?;
        self.expect_symbol(';')?;

        Ok(field)
    }

    fn parse_field_options(&mut self, field: &mut FieldDef) -> Result<(), ParseError> {
        if !self.eat_symbol('[') {
            return Ok(());
        }

        loop {
            let name = self.option_name()?;
            self.expect_symbol('=')?;
            let value = self.constant()?;

            match (name.as_str(), value) {
                ("packed", Constant::Ident(v)) if v == "true" || v == "false" => {
                    field.packed = Some(v == "true");
                }
                ("packed", _) => return Err(self.error("'packed' expects a boolean")),
                ("json_name", Constant::Str(v)) => field.json_name = Some(v),
                ("json_name", _) => return Err(self.error("'json_name' expects a string")),
                _ => {}
            }

            if !self.eat_symbol(',') {
                break;
            }
        }

        self.expect_symbol(']')
    }

    fn parse_map_field(&mut self, message: &mut MessageDef) -> Result<(), ParseError> {
        self.expect_keyword("map")?;
        self.expect_symbol('<')?;

        let key_type = self.ident()?;
        let key = match ScalarType::from_keyword(&key_type) {
            Some(scalar) if scalar.is_valid_map_key() => scalar,
            _ => return Err(self.error(format!("invalid map key type '{key_type}'"))),
        };

        self.expect_symbol(',')?;
        let value_type = self.type_name()?;
        let value = match ScalarType::from_keyword(&value_type) {
            Some(scalar) => TypeRef::Scalar(scalar),
            None => TypeRef::Named(value_type),
        };
        self.expect_symbol('>')?;

        let name = self.ident()?;
        self.expect_symbol('=')?;
        let number = self.field_number()?;

        let entry_name = map_entry_name(&name);
        let mut field = FieldDef {
            name,
            number,
            label: Label::Repeated,
            type_ref: TypeRef::Named(entry_name.clone()),
            oneof: None,
            packed: None,
            json_name: None,
        };
        self.parse_field_options(&mut field)?;
        self.expect_symbol(';')?;

        let entry_field = |name: &str, number, type_ref| FieldDef {
            name: name.to_string(),
            number,
            label: Label::None,
            type_ref,
            oneof: None,
            packed: None,
            json_name: None,
        };

        message.messages.push(MessageDef {
            name: entry_name,
            fields: vec![
                entry_field("key", 1, TypeRef::Scalar(key)),
                entry_field("value", 2, value),
            ],
            map_entry: true,
            ..Default::default()
        });
        message.fields.push(field);

        Ok(())
    }

    fn parse_oneof(&mut self, message: &mut MessageDef) -> Result<(), ParseError> {
        self.expect_keyword("oneof")?;
        let index = message.oneofs.len();
        message.oneofs.push(self.ident()?);
        self.expect_symbol('{')?;

        loop {
            if self.eat_symbol('}') {
                return Ok(());
            }
            if self.eat_symbol(';') {
                continue;
            }
            if self.is_ident("option") {
                self.skip_option_statement()?;
                continue;
            }
            if self.peek().is_none() {
                return Err(self.unexpected("'}'"));
            }
            let field = self.parse_field(Some(index))?;
            message.fields.push(field);
        }
    }

    fn parse_enum(&mut self) -> Result<EnumDef, ParseError> {
        self.expect_keyword("enum")?;
        let mut def = EnumDef {
            name: self.ident()?,
            values: Vec::new(),
        };
        self.expect_symbol('{')?;

        loop {
            if self.eat_symbol('}') {
                break;
            }
            if self.eat_symbol(';') {
                continue;
            }
            if self.is_ident("option") {
                self.skip_option_statement()?;
                continue;
            }
            if self.is_ident("reserved") {
                self.skip_statement()?;
                continue;
            }

            let name = self.ident()?;
            self.expect_symbol('=')?;
            let number = self.enum_number()?;

            if self.eat_symbol('[') {
                loop {
                    self.option_name()?;
                    self.expect_symbol('=')?;
                    self.constant()?;
                    if !self.eat_symbol(',') {
                        break;
                    }
                }
                self.expect_symbol(']')?;
            }
            self.expect_symbol(';')?;

            def.values.push(EnumValueDef { name, number });
        }

        if def.values.is_empty() {
            return Err(self.error(format!("enum '{}' must define at least one value", def.name)));
        }

        Ok(def)
    }
}

const MAX_FIELD_NUMBER: u32 = (1 << 29) - 1;

/// Name of the synthetic message backing a map field, e.g. `string_attrs` -> `StringAttrsEntry`.
fn map_entry_name(field_name: &str) -> String {
    let mut out = String::with_capacity(field_name.len() + 5);
    let mut upper_next = true;
    for c in field_name.chars() {
        if c == '_' {
            upper_next = true;
        } else if upper_next {
            out.push(c.to_ascii_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    out.push_str("Entry");
    out
}

fn describe(token: &TokenKind) -> String {
    match token {
        TokenKind::Ident(ident) => format!("'{ident}'"),
        TokenKind::Int(value) => format!("integer {value}"),
        TokenKind::Float(value) => format!("float {value}"),
        TokenKind::Str(value) => format!("string \"{value}\""),
        TokenKind::Symbol(c) => format!("'{c}'"),
    }
}
