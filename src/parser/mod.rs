use crate::ast::*;
use crate::lexer::Token;

pub struct Parser {
    tokens: Vec<(Token, Span)>,
    pos: usize,
}

#[derive(Debug, thiserror::Error)]
#[error("Parse error at token {position}: {message}")]
pub struct ParseError {
    pub position: usize,
    pub span: Span,
    pub message: String,
}

type Result<T> = std::result::Result<T, ParseError>;

/// Binary operator precedence levels, loosest first.
const PRECEDENCE: &[&[Token]] = &[
    &[Token::Eq, Token::NotEq],
    &[Token::Less, Token::LessEq, Token::Greater, Token::GreaterEq],
    &[Token::Plus, Token::Minus],
    &[Token::Star, Token::Slash, Token::Percent],
];

impl Parser {
    pub fn new(tokens: Vec<(Token, Span)>) -> Self {
        Parser { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn peek_span(&self) -> Span {
        self.tokens
            .get(self.pos)
            .map(|(_, s)| *s)
            .or_else(|| self.tokens.last().map(|(_, s)| Span::new(s.end, s.end)))
            .unwrap_or(Span::UNKNOWN)
    }

    fn prev_span(&self) -> Span {
        self.pos
            .checked_sub(1)
            .and_then(|i| self.tokens.get(i))
            .map(|(_, s)| *s)
            .unwrap_or(Span::UNKNOWN)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token) -> Result<Span> {
        match self.peek() {
            Some(tok) if tok == expected => {
                let span = self.peek_span();
                self.pos += 1;
                Ok(span)
            }
            Some(tok) => Err(self.error(format!("expected {:?}, got {:?}", expected, tok))),
            None => Err(self.error(format!("expected {:?}, got EOF", expected))),
        }
    }

    fn expect_ident(&mut self) -> Result<String> {
        match self.peek().cloned() {
            Some(Token::Ident(name)) => {
                self.pos += 1;
                Ok(name)
            }
            Some(tok) => Err(self.error(format!("expected identifier, got {:?}", tok))),
            None => Err(self.error("expected identifier, got EOF".into())),
        }
    }

    fn error(&self, message: String) -> ParseError {
        ParseError {
            position: self.pos,
            span: self.peek_span(),
            message,
        }
    }

    fn spanned(&self, node: ExprKind, start: Span) -> Expr {
        Spanned::new(node, start.merge(self.prev_span()))
    }

    fn undefined_at(&self, span: Span) -> Expr {
        Spanned::new(ExprKind::Literal(Literal::Undefined), span)
    }

    // ---- Statements ----

    pub fn parse_script(&mut self) -> Result<Script> {
        let mut exprs = Vec::new();
        while self.peek().is_some() {
            exprs.push(self.parse_stmt()?);
        }
        Ok(Script { body: Block::new(exprs), source: None })
    }

    /// `{ stmt* }`
    fn parse_block(&mut self) -> Result<Block> {
        self.expect(&Token::LBrace)?;
        let mut exprs = Vec::new();
        while !matches!(self.peek(), None | Some(Token::RBrace)) {
            exprs.push(self.parse_stmt()?);
        }
        self.expect(&Token::RBrace)?;
        Ok(Block::new(exprs))
    }

    fn parse_stmt(&mut self) -> Result<Expr> {
        let stmt = match self.peek() {
            Some(Token::Var) => self.parse_var()?,
            Some(Token::Return) => self.parse_return()?,
            Some(Token::If) => self.parse_if()?,
            _ => self.parse_expr()?,
        };
        while self.eat(&Token::Semi) {}
        Ok(stmt)
    }

    /// `var name = expr` or `var name`
    fn parse_var(&mut self) -> Result<Expr> {
        let start = self.expect(&Token::Var)?;
        let name = self.expect_ident()?;
        let value = if self.eat(&Token::Assign) {
            self.parse_expr()?
        } else {
            self.undefined_at(self.prev_span())
        };
        Ok(self.spanned(
            ExprKind::Assign { name, value: Box::new(value), declare: true },
            start,
        ))
    }

    fn parse_return(&mut self) -> Result<Expr> {
        let start = self.expect(&Token::Return)?;
        let value = match self.peek() {
            None | Some(Token::Semi) | Some(Token::RBrace) => self.undefined_at(start),
            _ => self.parse_expr()?,
        };
        Ok(self.spanned(ExprKind::Return { value: Box::new(value) }, start))
    }

    /// `if (cond) { ... } else if (cond) { ... } else { ... }`
    fn parse_if(&mut self) -> Result<Expr> {
        let start = self.expect(&Token::If)?;
        self.expect(&Token::LParen)?;
        let condition = self.parse_expr()?;
        self.expect(&Token::RParen)?;
        let then_block = self.parse_block()?;
        let else_block = if self.eat(&Token::Else) {
            if self.peek() == Some(&Token::If) {
                Block::new(vec![self.parse_if()?])
            } else {
                self.parse_block()?
            }
        } else {
            Block::default()
        };
        Ok(self.spanned(
            ExprKind::If { condition: Box::new(condition), then_block, else_block },
            start,
        ))
    }

    // ---- Expressions ----

    pub fn parse_expr(&mut self) -> Result<Expr> {
        let target = self.parse_binary(0)?;
        if self.peek() != Some(&Token::Assign) {
            return Ok(target);
        }
        let assign_span = self.peek_span();
        self.pos += 1;
        let value = Box::new(self.parse_expr()?);
        let span = target.span.merge(self.prev_span());
        let node = match target.node {
            ExprKind::Var { name } if name != "this" => ExprKind::Assign { name, value, declare: false },
            ExprKind::Field { receiver, name } => ExprKind::SetField { receiver, name, value },
            _ => {
                return Err(ParseError {
                    position: self.pos,
                    span: assign_span,
                    message: "invalid assignment target".to_string(),
                });
            }
        };
        Ok(Spanned::new(node, span))
    }

    fn parse_binary(&mut self, level: usize) -> Result<Expr> {
        let Some(operators) = PRECEDENCE.get(level) else {
            return self.parse_unary();
        };
        let mut left = self.parse_binary(level + 1)?;
        while let Some(tok) = self.peek().filter(|t| operators.contains(*t)).cloned() {
            let op_span = self.peek_span();
            self.pos += 1;
            let right = self.parse_binary(level + 1)?;
            // operators tokens in PRECEDENCE always have a builtin name
            let op = tok.operator_name().unwrap_or_default();
            left = binary(op, left, right, op_span);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if self.peek() != Some(&Token::Minus) {
            return self.parse_postfix();
        }
        let start = self.peek_span();
        self.pos += 1;
        let operand = self.parse_unary()?;
        let span = start.merge(operand.span);
        if let ExprKind::Literal(Literal::Int(n)) = operand.node {
            return Ok(int(-n, span));
        }
        Ok(binary("-", int(0, start), operand, start))
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                Some(Token::LParen) => {
                    let args = self.parse_args()?;
                    let span = expr.span.merge(self.prev_span());
                    expr = call(expr, args, span);
                }
                Some(Token::Dot) => {
                    self.pos += 1;
                    let name = self.expect_ident()?;
                    let receiver_span = expr.span;
                    let receiver = Box::new(expr);
                    let node = if self.peek() == Some(&Token::LParen) {
                        let args = self.parse_args()?;
                        ExprKind::MethodCall { receiver, name, args }
                    } else {
                        ExprKind::Field { receiver, name }
                    };
                    expr = Spanned::new(node, receiver_span.merge(self.prev_span()));
                }
                _ => return Ok(expr),
            }
        }
    }

    /// `( expr, expr, ... )`
    fn parse_args(&mut self) -> Result<Vec<Expr>> {
        self.expect(&Token::LParen)?;
        let mut args = Vec::new();
        while self.peek() != Some(&Token::RParen) {
            args.push(self.parse_expr()?);
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RParen)?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let start = self.peek_span();
        let literal = |lit| Spanned::new(ExprKind::Literal(lit), start);
        match self.peek().cloned() {
            Some(Token::Int(n)) => {
                self.pos += 1;
                Ok(literal(Literal::Int(n)))
            }
            Some(Token::Str(s)) => {
                self.pos += 1;
                Ok(literal(Literal::Str(s)))
            }
            Some(Token::True) => {
                self.pos += 1;
                Ok(literal(Literal::Bool(true)))
            }
            Some(Token::False) => {
                self.pos += 1;
                Ok(literal(Literal::Bool(false)))
            }
            Some(Token::Undefined) => {
                self.pos += 1;
                Ok(literal(Literal::Undefined))
            }
            Some(Token::This) => {
                self.pos += 1;
                Ok(var("this", start))
            }
            Some(Token::Ident(name)) => {
                self.pos += 1;
                Ok(var(name, start))
            }
            Some(Token::LParen) => {
                self.pos += 1;
                let inner = self.parse_expr()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Function) => self.parse_function(),
            Some(Token::New) => {
                self.pos += 1;
                self.parse_object(start)
            }
            Some(Token::LBrace) => self.parse_object(start),
            Some(tok) => Err(self.error(format!("expected expression, got {:?}", tok))),
            None => Err(self.error("expected expression, got EOF".into())),
        }
    }

    /// `function name?(a, b) { body }`
    fn parse_function(&mut self) -> Result<Expr> {
        let start = self.expect(&Token::Function)?;
        let name = match self.peek() {
            Some(Token::Ident(_)) => Some(self.expect_ident()?),
            _ => None,
        };
        self.expect(&Token::LParen)?;
        let mut params: Vec<String> = Vec::new();
        while self.peek() != Some(&Token::RParen) {
            let param = self.expect_ident()?;
            if params.contains(&param) {
                return Err(ParseError {
                    position: self.pos - 1,
                    span: self.prev_span(),
                    message: format!("duplicate parameter '{}'", param),
                });
            }
            params.push(param);
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RParen)?;
        let body = self.parse_block()?;
        Ok(self.spanned(
            ExprKind::Function(Box::new(FunDef { name, params, body })),
            start,
        ))
    }

    /// `{ name: expr, "name": expr }`
    fn parse_object(&mut self, start: Span) -> Result<Expr> {
        self.expect(&Token::LBrace)?;
        let mut fields: Vec<(String, Expr)> = Vec::new();
        while self.peek() != Some(&Token::RBrace) {
            let name = match self.advance() {
                Some(Token::Ident(name)) | Some(Token::Str(name)) => name,
                Some(tok) => {
                    self.pos -= 1;
                    return Err(self.error(format!("expected field name, got {:?}", tok)));
                }
                None => return Err(self.error("expected field name, got EOF".into())),
            };
            if fields.iter().any(|(existing, _)| *existing == name) {
                self.pos -= 1;
                return Err(self.error(format!("duplicate field '{}'", name)));
            }
            self.expect(&Token::Colon)?;
            fields.push((name, self.parse_expr()?));
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RBrace)?;
        Ok(self.spanned(ExprKind::Object { fields }, start))
    }
}

pub fn parse(tokens: Vec<(Token, Span)>) -> Result<Script> {
    Parser::new(tokens).parse_script()
}

/// Lex and parse in one go, keeping the source on the script.
pub fn parse_source(source: &str) -> std::result::Result<Script, crate::Error> {
    let tokens = crate::lexer::lex(source)?
        .into_iter()
        .map(|(t, range)| (t, Span::from(range)))
        .collect();
    let mut script = parse(tokens)?;
    script.source = Some(source.to_string());
    Ok(script)
}
