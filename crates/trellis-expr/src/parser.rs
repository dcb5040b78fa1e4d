//! Tokenizer and recursive-descent parser for the bundled expression
//! language.
//!
//! The grammar is a pragmatic XPath subset: numbers, quoted literals, node
//! references (absolute, relative, with optional `[n]` predicates), the
//! arithmetic operators `+ - * div mod`, comparisons, `and`/`or`, and
//! function calls. Names may contain `-`, so subtraction needs surrounding
//! whitespace (`a - b`); `a-b` is a single reference, as in XPath.

use crate::types::{EvalError, Result};

/// Parsed expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Literal(String),
    /// A node reference, kept exactly as written.
    Ref(String),
    Neg(Box<Expr>),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

/// Parse an expression string into an [`Expr`] tree.
pub fn parse(expr: &str) -> Result<Expr> {
    let tokens = tokenize(expr)?;
    let mut parser = Parser {
        expr,
        tokens,
        pos: 0,
    };
    let ast = parser.parse_or()?;
    if parser.pos < parser.tokens.len() {
        return Err(EvalError::parse(expr, "unexpected trailing tokens"));
    }
    Ok(ast)
}

/// Collect every node reference the expression reads, in source order,
/// deduplicated. Literal arguments (choice list names, attribute names)
/// are not references.
pub fn collect_refs(expr: &Expr, out: &mut Vec<String>) {
    match expr {
        Expr::Ref(r) => {
            if !out.iter().any(|have| have == r) {
                out.push(r.clone());
            }
        }
        Expr::Neg(inner) => collect_refs(inner, out),
        Expr::Binary { lhs, rhs, .. } => {
            collect_refs(lhs, out);
            collect_refs(rhs, out);
        }
        Expr::Call { args, .. } => {
            for arg in args {
                collect_refs(arg, out);
            }
        }
        Expr::Number(_) | Expr::Literal(_) => {}
    }
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Literal(String),
    /// Reference, operator word (`and`, `or`, `div`, `mod`), or function name.
    Word(String),
    LParen,
    RParen,
    Comma,
    Plus,
    Minus,
    Star,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

fn is_word_start(c: char) -> bool {
    c.is_alphabetic() || matches!(c, '_' | '/' | '.')
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '/')
}

fn tokenize(expr: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = expr.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            _ if c.is_whitespace() => i += 1,
            '0'..='9' => {
                let start = i;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                if i < chars.len() && chars[i] == '.' {
                    i += 1;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let n = text
                    .parse()
                    .map_err(|_| EvalError::parse(expr, format!("bad number '{text}'")))?;
                tokens.push(Token::Number(n));
            }
            '\'' | '"' => {
                let quote = c;
                i += 1;
                let start = i;
                while i < chars.len() && chars[i] != quote {
                    i += 1;
                }
                if i == chars.len() {
                    return Err(EvalError::parse(expr, "unterminated string literal"));
                }
                tokens.push(Token::Literal(chars[start..i].iter().collect()));
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '=' => {
                tokens.push(Token::Eq);
                i += 1;
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ne);
                    i += 2;
                } else {
                    return Err(EvalError::parse(expr, "'!' without '='"));
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Le);
                    i += 2;
                } else {
                    tokens.push(Token::Lt);
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ge);
                    i += 2;
                } else {
                    tokens.push(Token::Gt);
                    i += 1;
                }
            }
            _ if is_word_start(c) => {
                // A leading '.' followed by a digit is a number like ".5".
                if c == '.' && chars.get(i + 1).is_some_and(char::is_ascii_digit) {
                    let start = i;
                    i += 1;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                    let text: String = chars[start..i].iter().collect();
                    let n = text
                        .parse()
                        .map_err(|_| EvalError::parse(expr, format!("bad number '{text}'")))?;
                    tokens.push(Token::Number(n));
                    continue;
                }
                let start = i;
                while i < chars.len() {
                    if is_word_char(chars[i]) {
                        i += 1;
                    } else if chars[i] == '[' {
                        // Predicate group belongs to the reference.
                        while i < chars.len() && chars[i] != ']' {
                            i += 1;
                        }
                        if i == chars.len() {
                            return Err(EvalError::parse(expr, "unterminated '['"));
                        }
                        i += 1;
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Word(chars[start..i].iter().collect()));
            }
            _ => {
                return Err(EvalError::parse(expr, format!("unexpected character '{c}'")));
            }
        }
    }
    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Parser (precedence climbing, XPath operator levels)
// ---------------------------------------------------------------------------

struct Parser<'a> {
    expr: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_word(&mut self, word: &str) -> bool {
        if matches!(self.peek(), Some(Token::Word(w)) if w == word) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_and()?;
        while self.eat_word("or") {
            let rhs = self.parse_and()?;
            lhs = binary(BinOp::Or, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_equality()?;
        while self.eat_word("and") {
            let rhs = self.parse_equality()?;
            lhs = binary(BinOp::And, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_relational()?;
        loop {
            let op = if self.eat(&Token::Eq) {
                BinOp::Eq
            } else if self.eat(&Token::Ne) {
                BinOp::Ne
            } else {
                return Ok(lhs);
            };
            let rhs = self.parse_relational()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn parse_relational(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = if self.eat(&Token::Le) {
                BinOp::Le
            } else if self.eat(&Token::Lt) {
                BinOp::Lt
            } else if self.eat(&Token::Ge) {
                BinOp::Ge
            } else if self.eat(&Token::Gt) {
                BinOp::Gt
            } else {
                return Ok(lhs);
            };
            let rhs = self.parse_additive()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = if self.eat(&Token::Plus) {
                BinOp::Add
            } else if self.eat(&Token::Minus) {
                BinOp::Sub
            } else {
                return Ok(lhs);
            };
            let rhs = self.parse_multiplicative()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = if self.eat(&Token::Star) {
                BinOp::Mul
            } else if self.eat_word("div") {
                BinOp::Div
            } else if self.eat_word("mod") {
                BinOp::Mod
            } else {
                return Ok(lhs);
            };
            let rhs = self.parse_unary()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if self.eat(&Token::Minus) {
            let operand = self.parse_unary()?;
            return Ok(Expr::Neg(Box::new(operand)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.advance() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Literal(s)) => Ok(Expr::Literal(s)),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                if !self.eat(&Token::RParen) {
                    return Err(EvalError::parse(self.expr, "expected ')'"));
                }
                Ok(inner)
            }
            Some(Token::Word(word)) => {
                if self.eat(&Token::LParen) {
                    self.parse_call(word)
                } else {
                    Ok(Expr::Ref(word))
                }
            }
            _ => Err(EvalError::parse(self.expr, "expected an operand")),
        }
    }

    fn parse_call(&mut self, name: String) -> Result<Expr> {
        let mut args = Vec::new();
        if !self.eat(&Token::RParen) {
            loop {
                args.push(self.parse_or()?);
                if self.eat(&Token::Comma) {
                    continue;
                }
                if self.eat(&Token::RParen) {
                    break;
                }
                return Err(EvalError::parse(self.expr, "expected ',' or ')' in call"));
            }
        }
        Ok(Expr::Call { name, args })
    }
}

fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn refs(expr: &str) -> Vec<String> {
        let ast = parse(expr).unwrap();
        let mut out = Vec::new();
        collect_refs(&ast, &mut out);
        out
    }

    // -- shapes ------------------------------------------------------------

    #[test]
    fn parses_literals_and_numbers() {
        assert_eq!(parse("12").unwrap(), Expr::Number(12.0));
        assert_eq!(parse(".5").unwrap(), Expr::Number(0.5));
        assert_eq!(parse("'ab'").unwrap(), Expr::Literal("ab".into()));
        assert_eq!(parse("\"c d\"").unwrap(), Expr::Literal("c d".into()));
    }

    #[test]
    fn parses_references() {
        assert_eq!(parse("../num1").unwrap(), Expr::Ref("../num1".into()));
        assert_eq!(parse("/d/rep[2]/x").unwrap(), Expr::Ref("/d/rep[2]/x".into()));
        assert_eq!(parse(".").unwrap(), Expr::Ref(".".into()));
        // Hyphenated names are one reference, not subtraction.
        assert_eq!(parse("a-b").unwrap(), Expr::Ref("a-b".into()));
    }

    #[test]
    fn precedence_and_grouping() {
        let ast = parse("1 + 2 * 3").unwrap();
        assert_eq!(
            ast,
            Expr::Binary {
                op: BinOp::Add,
                lhs: Box::new(Expr::Number(1.0)),
                rhs: Box::new(Expr::Binary {
                    op: BinOp::Mul,
                    lhs: Box::new(Expr::Number(2.0)),
                    rhs: Box::new(Expr::Number(3.0)),
                }),
            }
        );
        // Parentheses override.
        let grouped = parse("(1 + 2) * 3").unwrap();
        assert!(matches!(grouped, Expr::Binary { op: BinOp::Mul, .. }));
    }

    #[test]
    fn word_operators() {
        assert!(matches!(
            parse("10 div 2").unwrap(),
            Expr::Binary { op: BinOp::Div, .. }
        ));
        assert!(matches!(
            parse("7 mod 3").unwrap(),
            Expr::Binary { op: BinOp::Mod, .. }
        ));
        assert!(matches!(
            parse("a = 'x' or b = 'y' and c = 'z'").unwrap(),
            Expr::Binary { op: BinOp::Or, .. }
        ));
    }

    #[test]
    fn unary_minus_and_subtraction() {
        assert_eq!(
            parse("-5").unwrap(),
            Expr::Neg(Box::new(Expr::Number(5.0)))
        );
        assert!(matches!(
            parse("a - b").unwrap(),
            Expr::Binary { op: BinOp::Sub, .. }
        ));
    }

    #[test]
    fn function_calls() {
        let ast = parse("if(../age > 18, 'adult', 'minor')").unwrap();
        let Expr::Call { name, args } = ast else {
            panic!("expected call");
        };
        assert_eq!(name, "if");
        assert_eq!(args.len(), 3);

        assert_eq!(
            parse("true()").unwrap(),
            Expr::Call {
                name: "true".into(),
                args: vec![]
            }
        );
        assert!(matches!(
            parse("concat('a', string-length(b))").unwrap(),
            Expr::Call { .. }
        ));
    }

    // -- errors ------------------------------------------------------------

    #[test]
    fn parse_errors() {
        assert!(parse("").is_err());
        assert!(parse("'open").is_err());
        assert!(parse("1 +").is_err());
        assert!(parse("f(1, ").is_err());
        assert!(parse("1 2").is_err());
        assert!(parse("a ! b").is_err());
        assert!(parse("/d/rep[2").is_err());
    }

    // -- reference extraction ----------------------------------------------

    #[test]
    fn collects_refs_in_source_order() {
        assert_eq!(
            refs("../num1 * 20 + /d/out"),
            vec!["../num1".to_string(), "/d/out".to_string()]
        );
        assert_eq!(refs("count(/d/rep) + sum(/d/rep/n)"), vec!["/d/rep", "/d/rep/n"]);
        // Duplicates collapse, literals are not refs.
        assert_eq!(refs("a = 'a' or a = 'b'"), vec!["a".to_string()]);
        assert_eq!(refs("items('cities', 'country', ../country)"), vec!["../country"]);
        assert!(refs("1 + 2").is_empty());
    }
}
