//! Recursive descent parser for macro templates

use serde_json::Value;

use super::ast::*;

/// Deepest nesting of expressions, and of statements, a template may use
const MAX_NESTING: usize = 32;

/// Parse error with position information
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub position: usize,
    pub context: String,
}

impl ParseError {
    fn new(message: impl Into<String>, position: usize, context: impl Into<String>) -> Self {
        ParseError {
            message: message.into(),
            position,
            context: context.into(),
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "at position {}: {}", self.position, self.message)
    }
}

impl std::error::Error for ParseError {}

// =============================================================================
// Template scanning
// =============================================================================

/// A delimited region of template text
#[derive(Debug, Clone, PartialEq)]
enum Piece {
    Text(String),
    /// Body of `${ ... }`
    Output { source: String, position: usize },
    /// Body of `{% ... %}` with whitespace markers removed
    Tag { source: String, position: usize },
}

#[derive(Clone, Copy)]
enum Delimiter {
    Output,
    Tag,
    Comment,
}

/// Split template text into literal text, expressions and statement tags
fn scan(input: &str) -> Result<Vec<Piece>, ParseError> {
    let bytes = input.as_bytes();
    let mut pieces = Vec::new();
    let mut literal_start = 0;
    let mut trim_next = false;
    let mut i = 0;

    while i + 1 < bytes.len() {
        let delimiter = match (bytes[i], bytes[i + 1]) {
            (b'$', b'{') => Delimiter::Output,
            (b'{', b'%') => Delimiter::Tag,
            (b'{', b'#') => Delimiter::Comment,
            _ => {
                i += 1;
                continue;
            }
        };

        let mut text = &input[literal_start..i];
        if trim_next {
            text = text.trim_start();
            trim_next = false;
        }
        let body_start = i + 2;

        match delimiter {
            Delimiter::Output => {
                let end = find_expression_end(input, body_start).ok_or_else(|| {
                    ParseError::new(
                        "unclosed expression, expected '}'",
                        i,
                        input[i..].chars().take(20).collect::<String>(),
                    )
                })?;
                push_text(&mut pieces, text);
                pieces.push(Piece::Output {
                    source: input[body_start..end].to_string(),
                    position: body_start,
                });
                i = end + 1;
            }
            Delimiter::Tag | Delimiter::Comment => {
                let (close, quoted, what) = match delimiter {
                    Delimiter::Tag => ("%}", true, "statement"),
                    _ => ("#}", false, "comment"),
                };
                let end = find_closing(input, body_start, close, quoted).ok_or_else(|| {
                    ParseError::new(
                        format!("unclosed {}, expected '{}'", what, close),
                        i,
                        input[i..].chars().take(20).collect::<String>(),
                    )
                })?;

                let mut inner = &input[body_start..end];
                let mut position = body_start;
                if let Some(stripped) = inner.strip_prefix('-') {
                    text = text.trim_end();
                    inner = stripped;
                    position += 1;
                }
                if let Some(stripped) = inner.strip_suffix('-') {
                    trim_next = true;
                    inner = stripped;
                }

                push_text(&mut pieces, text);
                if matches!(delimiter, Delimiter::Tag) {
                    pieces.push(Piece::Tag {
                        source: inner.to_string(),
                        position,
                    });
                }
                i = end + 2;
            }
        }

        literal_start = i;
    }

    let mut text = &input[literal_start.min(input.len())..];
    if trim_next {
        text = text.trim_start();
    }
    push_text(&mut pieces, text);

    Ok(pieces)
}

fn push_text(pieces: &mut Vec<Piece>, text: &str) {
    if !text.is_empty() {
        pieces.push(Piece::Text(text.to_string()));
    }
}

/// Find the `}` closing an expression that starts at `start`
///
/// Nested braces (map literals) and quoted strings are skipped.
fn find_expression_end(input: &str, start: usize) -> Option<usize> {
    let mut depth = 1;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (offset, c) in input[start..].char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}

/// Find a closing delimiter such as `%}`, optionally skipping quoted strings
fn find_closing(input: &str, start: usize, close: &str, quoted: bool) -> Option<usize> {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let rest = &input[start..];

    for (offset, c) in rest.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        if quoted && (c == '\'' || c == '"') {
            quote = Some(c);
        } else if rest[offset..].starts_with(close) {
            return Some(start + offset);
        }
    }
    None
}

// =============================================================================
// Statement tree
// =============================================================================

/// Parse a macro template string into a Template AST
pub fn parse_template(input: &str) -> Result<Template, ParseError> {
    let mut builder = TreeBuilder {
        pieces: scan(input)?.into_iter(),
        depth: 0,
    };
    let (nodes, _) = builder.parse_block(&[])?;
    Ok(Template::new(nodes, input.to_string()))
}

/// A tag that ended a block, e.g. `{% else %}`
struct EndTag {
    keyword: String,
    rest: String,
    position: usize,
}

impl EndTag {
    fn expect_bare(&self) -> Result<(), ParseError> {
        if self.rest.trim().is_empty() {
            Ok(())
        } else {
            Err(ParseError::new(
                format!("unexpected text after '{}'", self.keyword),
                self.position,
                self.rest.trim(),
            ))
        }
    }
}

struct TreeBuilder {
    pieces: std::vec::IntoIter<Piece>,
    depth: usize,
}

impl TreeBuilder {
    /// Parse nodes until one of `terminators` (or the end of input) is reached
    fn parse_block(&mut self, terminators: &[&str]) -> Result<(Vec<Node>, Option<EndTag>), ParseError> {
        let mut nodes = Vec::new();

        while let Some(piece) = self.pieces.next() {
            match piece {
                Piece::Text(text) => nodes.push(Node::Literal(text)),
                Piece::Output { source, position } => {
                    nodes.push(Node::Output(parse_expression_at(&source, position)?));
                }
                Piece::Tag { source, position } => {
                    let (keyword, rest, offset) = split_keyword(&source);
                    let rest_position = position + offset;

                    if terminators.contains(&keyword) {
                        return Ok((
                            nodes,
                            Some(EndTag {
                                keyword: keyword.to_string(),
                                rest: rest.to_string(),
                                position: rest_position,
                            }),
                        ));
                    }

                    match keyword {
                        "if" | "for" => {
                            if self.depth >= MAX_NESTING {
                                return Err(ParseError::new(
                                    format!("statements nested deeper than {} levels", MAX_NESTING),
                                    position,
                                    keyword,
                                ));
                            }
                            self.depth += 1;
                            let node = if keyword == "if" {
                                self.parse_if(rest, rest_position, position)
                            } else {
                                self.parse_for(rest, rest_position, position)
                            };
                            self.depth -= 1;
                            nodes.push(node?);
                        }
                        "" => return Err(ParseError::new("empty statement", position, "")),
                        other => {
                            return Err(ParseError::new(
                                format!("unexpected statement '{}'", other),
                                position,
                                source.trim(),
                            ));
                        }
                    }
                }
            }
        }

        Ok((nodes, None))
    }

    fn parse_if(&mut self, condition: &str, condition_pos: usize, tag_pos: usize) -> Result<Node, ParseError> {
        let mut branches = Vec::new();
        let mut condition = parse_expression_at(condition, condition_pos)?;

        loop {
            let (body, end) = self.parse_block(&["elif", "else", "endif"])?;
            let end = end.ok_or_else(|| unclosed_block("if", "endif", tag_pos))?;
            branches.push((condition, body));

            match end.keyword.as_str() {
                "elif" => condition = parse_expression_at(&end.rest, end.position)?,
                "else" => {
                    end.expect_bare()?;
                    let (otherwise, end) = self.parse_block(&["endif"])?;
                    end.ok_or_else(|| unclosed_block("if", "endif", tag_pos))?
                        .expect_bare()?;
                    return Ok(Node::If { branches, otherwise });
                }
                _ => {
                    end.expect_bare()?;
                    return Ok(Node::If {
                        branches,
                        otherwise: Vec::new(),
                    });
                }
            }
        }
    }

    fn parse_for(&mut self, header: &str, header_pos: usize, tag_pos: usize) -> Result<Node, ParseError> {
        let mut parser = Parser::new(header, header_pos)?;
        let (target, iterable) = parser.parse_for_header()?;

        let (body, end) = self.parse_block(&["else", "endfor"])?;
        let end = end.ok_or_else(|| unclosed_block("for", "endfor", tag_pos))?;
        end.expect_bare()?;

        let otherwise = if end.keyword == "else" {
            let (otherwise, end) = self.parse_block(&["endfor"])?;
            end.ok_or_else(|| unclosed_block("for", "endfor", tag_pos))?
                .expect_bare()?;
            otherwise
        } else {
            Vec::new()
        };

        Ok(Node::For {
            target,
            iterable,
            body,
            otherwise,
        })
    }
}

fn unclosed_block(block: &str, end: &str, position: usize) -> ParseError {
    ParseError::new(
        format!("unclosed '{}' block, expected '{{% {} %}}'", block, end),
        position,
        "",
    )
}

/// Split a tag body into its keyword, the remainder, and the remainder's offset
fn split_keyword(source: &str) -> (&str, &str, usize) {
    let trimmed = source.trim_start();
    let lead = source.len() - trimmed.len();
    let end = trimmed
        .find(|c: char| !(c.is_alphanumeric() || c == '_'))
        .unwrap_or(trimmed.len());
    (&trimmed[..end], &trimmed[end..], lead + end)
}

// =============================================================================
// Expression lexer
// =============================================================================

/// Token types for the expression lexer
#[derive(Debug, Clone, PartialEq)]
enum Token {
    // Literals
    Ident(String),
    Int(i64),
    /// 9223372036854775808, only valid right after a minus sign
    MinIntMagnitude,
    Float(f64),
    String(String),
    Bool(bool),
    Null,

    // Keywords
    And,
    Or,
    Not,
    In,
    Is,

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Tilde,
    Pipe,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Question,
    Colon,
    DoubleQuestion, // ??
    Dot,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,

    // End of input
    Eof,
}

/// Lexer for expression tokens
struct Lexer<'a> {
    input: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    base_pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str, base_pos: usize) -> Self {
        Self {
            input,
            chars: input.char_indices().peekable(),
            base_pos,
        }
    }

    fn current_pos(&mut self) -> usize {
        self.chars
            .peek()
            .map(|(i, _)| *i)
            .unwrap_or(self.input.len())
            + self.base_pos
    }

    fn skip_whitespace(&mut self) {
        while let Some(&(_, ch)) = self.chars.peek() {
            if ch.is_whitespace() {
                self.chars.next();
            } else {
                break;
            }
        }
    }

    fn error(&self, message: impl Into<String>, pos: usize, len: usize) -> ParseError {
        ParseError::new(
            message,
            pos + self.base_pos,
            self.input[pos..].chars().take(len).collect::<String>(),
        )
    }

    fn next_token(&mut self) -> Result<Token, ParseError> {
        self.skip_whitespace();

        let Some(&(pos, ch)) = self.chars.peek() else {
            return Ok(Token::Eof);
        };

        // Single-char tokens
        let single = match ch {
            '+' => Some(Token::Plus),
            '-' => Some(Token::Minus),
            '*' => Some(Token::Star),
            '/' => Some(Token::Slash),
            '%' => Some(Token::Percent),
            '~' => Some(Token::Tilde),
            '|' => Some(Token::Pipe),
            '.' => Some(Token::Dot),
            ',' => Some(Token::Comma),
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            '[' => Some(Token::LBracket),
            ']' => Some(Token::RBracket),
            '{' => Some(Token::LBrace),
            '}' => Some(Token::RBrace),
            ':' => Some(Token::Colon),
            _ => None,
        };
        if let Some(token) = single {
            self.chars.next();
            return Ok(token);
        }

        // Two-char tokens
        if ch == '?' {
            self.chars.next();
            if let Some(&(_, '?')) = self.chars.peek() {
                self.chars.next();
                return Ok(Token::DoubleQuestion);
            }
            return Ok(Token::Question);
        }

        if ch == '=' {
            self.chars.next();
            if let Some(&(_, '=')) = self.chars.peek() {
                self.chars.next();
                return Ok(Token::Eq);
            }
            return Err(self.error("expected '==' for equality comparison", pos, 10));
        }

        if ch == '!' {
            self.chars.next();
            if let Some(&(_, '=')) = self.chars.peek() {
                self.chars.next();
                return Ok(Token::Ne);
            }
            return Err(self.error("expected '!=' for not-equal comparison", pos, 10));
        }

        if ch == '<' {
            self.chars.next();
            if let Some(&(_, '=')) = self.chars.peek() {
                self.chars.next();
                return Ok(Token::Le);
            }
            return Ok(Token::Lt);
        }

        if ch == '>' {
            self.chars.next();
            if let Some(&(_, '=')) = self.chars.peek() {
                self.chars.next();
                return Ok(Token::Ge);
            }
            return Ok(Token::Gt);
        }

        // String literal
        if ch == '\'' || ch == '"' {
            self.chars.next(); // consume opening quote
            let mut s = String::new();
            loop {
                match self.chars.next() {
                    Some((_, c)) if c == ch => break,
                    Some((_, '\\')) => match self.chars.next() {
                        Some((_, 'n')) => s.push('\n'),
                        Some((_, 't')) => s.push('\t'),
                        Some((_, 'r')) => s.push('\r'),
                        Some((_, c)) => s.push(c),
                        None => return Err(self.error("unclosed string literal", pos, 20)),
                    },
                    Some((_, c)) => s.push(c),
                    None => return Err(self.error("unclosed string literal", pos, 20)),
                }
            }
            return Ok(Token::String(s));
        }

        // Number
        if ch.is_ascii_digit() {
            let start = pos;
            let mut has_dot = false;

            while let Some(&(i, c)) = self.chars.peek() {
                if c.is_ascii_digit() {
                    self.chars.next();
                } else if c == '.' && !has_dot {
                    // Look ahead to see if this is a decimal point or attribute access
                    let next_is_digit = self.input[i + 1..]
                        .chars()
                        .next()
                        .map(|c| c.is_ascii_digit())
                        .unwrap_or(false);
                    if next_is_digit {
                        has_dot = true;
                        self.chars.next();
                    } else {
                        break;
                    }
                } else {
                    break;
                }
            }

            let end = self.chars.peek().map(|(i, _)| *i).unwrap_or(self.input.len());
            let num_str = &self.input[start..end];

            if has_dot {
                let n: f64 = num_str.parse().map_err(|_| {
                    ParseError::new(format!("invalid float: {}", num_str), start + self.base_pos, num_str)
                })?;
                return Ok(Token::Float(n));
            } else {
                return match num_str.parse::<i64>() {
                    Ok(n) => Ok(Token::Int(n)),
                    Err(_) if num_str.parse::<u64>() == Ok(i64::MIN.unsigned_abs()) => {
                        Ok(Token::MinIntMagnitude)
                    }
                    Err(_) => Err(ParseError::new(
                        format!("invalid integer: {}", num_str),
                        start + self.base_pos,
                        num_str,
                    )),
                };
            }
        }

        // Identifier or keyword
        if ch.is_alphabetic() || ch == '_' {
            let start = pos;
            while let Some(&(_, c)) = self.chars.peek() {
                if c.is_alphanumeric() || c == '_' {
                    self.chars.next();
                } else {
                    break;
                }
            }
            let end = self.chars.peek().map(|(i, _)| *i).unwrap_or(self.input.len());
            let ident = &self.input[start..end];

            return Ok(match ident {
                "true" => Token::Bool(true),
                "false" => Token::Bool(false),
                "none" | "null" => Token::Null,
                "and" => Token::And,
                "or" => Token::Or,
                "not" => Token::Not,
                "in" => Token::In,
                "is" => Token::Is,
                _ => Token::Ident(ident.to_string()),
            });
        }

        Err(self.error(format!("unexpected character: '{}'", ch), pos, 10))
    }

    fn peek_token(&mut self) -> Result<Token, ParseError> {
        let saved_chars = self.chars.clone();
        let tok = self.next_token()?;
        self.chars = saved_chars;
        Ok(tok)
    }
}

// =============================================================================
// Expression parser
// =============================================================================

/// Expression parser
struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str, base_pos: usize) -> Result<Self, ParseError> {
        let mut lexer = Lexer::new(input, base_pos);
        let current = lexer.next_token()?;
        Ok(Self {
            lexer,
            current,
            depth: 0,
        })
    }

    fn advance(&mut self) -> Result<(), ParseError> {
        self.current = self.lexer.next_token()?;
        Ok(())
    }

    fn expect(&mut self, expected: Token) -> Result<(), ParseError> {
        if self.current == expected {
            self.advance()
        } else {
            Err(self.unexpected(&format!("expected {:?}", expected)))
        }
    }

    fn unexpected(&mut self, what: &str) -> ParseError {
        ParseError::new(
            format!("{}, found {:?}", what, self.current),
            self.lexer.current_pos(),
            "",
        )
    }

    /// Run a parse one nesting level deeper
    fn nested<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<T, ParseError>,
    ) -> Result<T, ParseError> {
        if self.depth >= MAX_NESTING {
            return Err(ParseError::new(
                format!("expression nested deeper than {} levels", MAX_NESTING),
                self.lexer.current_pos(),
                "",
            ));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn expect_ident(&mut self, what: &str) -> Result<String, ParseError> {
        match &self.current {
            Token::Ident(name) => {
                let name = name.clone();
                self.advance()?;
                Ok(name)
            }
            _ => Err(self.unexpected(&format!("expected {}", what))),
        }
    }

    fn expect_eof(&mut self) -> Result<(), ParseError> {
        if self.current != Token::Eof {
            return Err(self.unexpected("unexpected token after expression"));
        }
        Ok(())
    }

    /// Parse the full expression
    fn parse(&mut self) -> Result<Expr, ParseError> {
        let expr = self.parse_ternary()?;

        // Format specifier is only allowed at the top level (not inside ternary branches)
        let expr = if self.current == Token::Colon {
            self.advance()?;
            let spec = self.parse_format_spec()?;
            Expr::Formatted {
                expr: Box::new(expr),
                spec,
            }
        } else {
            expr
        };

        self.expect_eof()?;
        Ok(expr)
    }

    /// for_header = IDENT ("," IDENT)? "in" expression
    fn parse_for_header(&mut self) -> Result<(LoopTarget, Expr), ParseError> {
        let first = self.expect_ident("loop variable")?;
        let target = if self.current == Token::Comma {
            self.advance()?;
            LoopTarget::Pair(first, self.expect_ident("second loop variable")?)
        } else {
            LoopTarget::Single(first)
        };
        self.expect(Token::In)?;
        let iterable = self.parse_ternary()?;
        self.expect_eof()?;
        Ok((target, iterable))
    }

    /// ternary = or ("?" ternary ":" ternary)?
    fn parse_ternary(&mut self) -> Result<Expr, ParseError> {
        self.nested(Self::parse_conditional)
    }

    fn parse_conditional(&mut self) -> Result<Expr, ParseError> {
        let condition = self.parse_or()?;

        if self.current == Token::Question {
            self.advance()?;
            let then_expr = self.parse_ternary()?; // Right-associative
            self.expect(Token::Colon)?;
            let else_expr = self.parse_ternary()?;

            return Ok(Expr::Ternary {
                condition: Box::new(condition),
                then_expr: Box::new(then_expr),
                else_expr: Box::new(else_expr),
            });
        }

        Ok(condition)
    }

    /// or = and ("or" and)*
    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_and()?;
        while self.current == Token::Or {
            self.advance()?;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    /// and = not ("and" not)*
    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_not()?;
        while self.current == Token::And {
            self.advance()?;
            let right = self.parse_not()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    /// not = "not" not | coalesce
    fn parse_not(&mut self) -> Result<Expr, ParseError> {
        if self.current == Token::Not {
            self.advance()?;
            let inner = self.nested(Self::parse_not)?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_coalesce()
    }

    /// coalesce = comparison ("??" comparison)*
    fn parse_coalesce(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_comparison()?;

        if self.current == Token::DoubleQuestion {
            let mut exprs = vec![expr];
            while self.current == Token::DoubleQuestion {
                self.advance()?;
                exprs.push(self.parse_comparison()?);
            }
            expr = Expr::Coalesce { exprs };
        }

        Ok(expr)
    }

    /// comparison = concat ((cmp_op concat) | ("not"? "in" concat) | ("is" "not"? test))?
    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let left = self.parse_concat()?;

        let op = match &self.current {
            Token::Eq => Some(CompareOp::Eq),
            Token::Ne => Some(CompareOp::Ne),
            Token::Lt => Some(CompareOp::Lt),
            Token::Le => Some(CompareOp::Le),
            Token::Gt => Some(CompareOp::Gt),
            Token::Ge => Some(CompareOp::Ge),
            _ => None,
        };

        if let Some(op) = op {
            self.advance()?;
            let right = self.parse_concat()?;
            return Ok(Expr::Compare {
                left: Box::new(left),
                op,
                right: Box::new(right),
            });
        }

        let negated_in = self.current == Token::Not && self.lexer.peek_token()? == Token::In;
        if self.current == Token::In || negated_in {
            if negated_in {
                self.advance()?;
            }
            self.advance()?;
            let container = self.parse_concat()?;
            return Ok(Expr::Contains {
                item: Box::new(left),
                container: Box::new(container),
                negated: negated_in,
            });
        }

        if self.current == Token::Is {
            self.advance()?;
            let negated = self.current == Token::Not;
            if negated {
                self.advance()?;
            }
            let name = match &self.current {
                Token::Ident(name) => name.clone(),
                Token::Null => "none".to_string(),
                _ => return Err(self.unexpected("expected test name after 'is'")),
            };
            self.advance()?;
            let args = if self.current == Token::LParen {
                self.parse_args()?
            } else {
                Vec::new()
            };
            return Ok(Expr::Test {
                base: Box::new(left),
                name,
                args,
                negated,
            });
        }

        Ok(left)
    }

    /// concat = math ("~" math)*
    fn parse_concat(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_math()?;
        while self.current == Token::Tilde {
            self.advance()?;
            let right = self.parse_math()?;
            left = Expr::Concat {
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    /// math = term (("+"|"-") term)*
    fn parse_math(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_term()?;

        loop {
            let op = match &self.current {
                Token::Plus => MathOp::Add,
                Token::Minus => MathOp::Sub,
                _ => break,
            };
            self.advance()?;
            let right = self.parse_term()?;
            left = Expr::Math {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    /// term = unary (("*"|"/"|"%") unary)*
    fn parse_term(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary()?;

        loop {
            let op = match &self.current {
                Token::Star => MathOp::Mul,
                Token::Slash => MathOp::Div,
                Token::Percent => MathOp::Rem,
                _ => break,
            };
            self.advance()?;
            let right = self.parse_unary()?;
            left = Expr::Math {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    /// unary = "-" unary | postfix
    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        if self.current == Token::Minus {
            self.advance()?;
            if self.current == Token::MinIntMagnitude {
                self.advance()?;
                return self.parse_postfix_ops(Expr::Constant(Value::from(i64::MIN)));
            }
            let expr = self.nested(Self::parse_unary)?;
            return Ok(Expr::Negate(Box::new(expr)));
        }
        self.parse_postfix()
    }

    /// postfix = primary ("." IDENT | "[" expression "]" | "|" IDENT args?)*
    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let expr = self.parse_primary()?;
        self.parse_postfix_ops(expr)
    }

    fn parse_postfix_ops(&mut self, mut expr: Expr) -> Result<Expr, ParseError> {
        loop {
            match &self.current {
                Token::Dot => {
                    self.advance()?;
                    let name = match &self.current {
                        Token::Ident(name) => name.clone(),
                        Token::Int(n) => n.to_string(),
                        _ => return Err(self.unexpected("expected attribute name after '.'")),
                    };
                    self.advance()?;
                    expr = Expr::Attr {
                        base: Box::new(expr),
                        name,
                    };
                }
                Token::LBracket => {
                    self.advance()?;
                    let index = self.parse_ternary()?;
                    self.expect(Token::RBracket)?;
                    expr = Expr::Index {
                        base: Box::new(expr),
                        index: Box::new(index),
                    };
                }
                Token::Pipe => {
                    self.advance()?;
                    let name = self.expect_ident("filter name after '|'")?;
                    let args = if self.current == Token::LParen {
                        self.parse_args()?
                    } else {
                        Vec::new()
                    };
                    expr = Expr::Filter {
                        base: Box::new(expr),
                        name,
                        args,
                    };
                }
                _ => break,
            }
        }

        Ok(expr)
    }

    /// args = "(" (expression ("," expression)* ","?)? ")"
    fn parse_args(&mut self) -> Result<Vec<Expr>, ParseError> {
        self.expect(Token::LParen)?;
        let mut args = Vec::new();
        while self.current != Token::RParen {
            args.push(self.parse_ternary()?);
            if self.current == Token::Comma {
                self.advance()?;
            } else {
                break;
            }
        }
        self.expect(Token::RParen)?;
        Ok(args)
    }

    /// primary = "(" expression ")" | IDENT | number | string | boolean | none | list | map
    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let constant = match &self.current {
            Token::Int(n) => Some(Value::from(*n)),
            Token::Float(n) => Some(
                serde_json::Number::from_f64(*n)
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
            ),
            Token::String(s) => Some(Value::String(s.clone())),
            Token::Bool(b) => Some(Value::Bool(*b)),
            Token::Null => Some(Value::Null),
            _ => None,
        };
        if let Some(value) = constant {
            self.advance()?;
            return Ok(Expr::Constant(value));
        }

        match &self.current {
            Token::LParen => {
                self.advance()?;
                let expr = self.parse_ternary()?;
                self.expect(Token::RParen)?;
                Ok(expr)
            }
            Token::Ident(name) => {
                let name = name.clone();
                self.advance()?;
                Ok(Expr::Variable(name))
            }
            Token::LBracket => {
                self.advance()?;
                let mut items = Vec::new();
                while self.current != Token::RBracket {
                    items.push(self.parse_ternary()?);
                    if self.current == Token::Comma {
                        self.advance()?;
                    } else {
                        break;
                    }
                }
                self.expect(Token::RBracket)?;
                Ok(Expr::List(items))
            }
            Token::LBrace => {
                self.advance()?;
                let mut entries = Vec::new();
                while self.current != Token::RBrace {
                    let key = self.parse_ternary()?;
                    self.expect(Token::Colon)?;
                    let value = self.parse_ternary()?;
                    entries.push((key, value));
                    if self.current == Token::Comma {
                        self.advance()?;
                    } else {
                        break;
                    }
                }
                self.expect(Token::RBrace)?;
                Ok(Expr::Map(entries))
            }
            Token::MinIntMagnitude => Err(ParseError::new(
                "integer literal out of range",
                self.lexer.current_pos(),
                i64::MIN.unsigned_abs().to_string(),
            )),
            _ => Err(self.unexpected("unexpected token")),
        }
    }

    /// Parse format specifier: [","]? ["." digits]? [type]?
    fn parse_format_spec(&mut self) -> Result<FormatSpec, ParseError> {
        let mut spec = FormatSpec::default();

        // Check for thousands separator
        if self.current == Token::Comma {
            spec.thousands_sep = true;
            self.advance()?;
        }

        // Check for precision
        if self.current == Token::Dot {
            self.advance()?;
            if let Token::Int(n) = &self.current {
                spec.precision = Some((*n).clamp(0, u8::MAX as i64) as u8);
                self.advance()?;
            }
        }

        // Check for format type
        match &self.current {
            Token::Percent => {
                spec.format_type = FormatType::Percent;
                self.advance()?;
            }
            Token::Ident(s) => {
                spec.format_type = match s.as_str() {
                    "f" => FormatType::Float,
                    "d" => FormatType::Integer,
                    _ => {
                        return Err(ParseError::new(
                            format!("unknown format type: {}", s),
                            self.lexer.current_pos(),
                            "",
                        ));
                    }
                };
                self.advance()?;
            }
            _ => {}
        }

        Ok(spec)
    }
}

/// Parse a standalone expression
pub fn parse_expression(input: &str) -> Result<Expr, ParseError> {
    parse_expression_at(input, 0)
}

fn parse_expression_at(input: &str, base_pos: usize) -> Result<Expr, ParseError> {
    let mut parser = Parser::new(input, base_pos)?;
    parser.parse()
}

/// Parse a closure: `|a, b| body`
///
/// Source without a parameter list is a body whose single argument is
/// bound to `value`.
pub fn parse_lambda(input: &str) -> Result<Lambda, ParseError> {
    let trimmed = input.trim_start();
    let offset = input.len() - trimmed.len();

    let Some(after_open) = trimmed.strip_prefix('|') else {
        return Ok(Lambda {
            params: vec!["value".to_string()],
            body: parse_expression_at(input, 0)?,
        });
    };

    let close = after_open
        .find('|')
        .ok_or_else(|| ParseError::new("unclosed parameter list, expected '|'", offset, trimmed))?;

    let mut params = Vec::new();
    for param in after_open[..close].split(',').map(str::trim) {
        if param.is_empty() {
            continue;
        }
        let valid = param.chars().next().is_some_and(|c| c.is_alphabetic() || c == '_')
            && param.chars().all(|c| c.is_alphanumeric() || c == '_');
        if !valid {
            return Err(ParseError::new(
                format!("invalid parameter name: {}", param),
                offset + 1,
                param,
            ));
        }
        params.push(param.to_string());
    }

    let body_start = offset + 1 + close + 1;
    let body = parse_expression_at(&input[body_start..], body_start)?;
    Ok(Lambda { params, body })
}
