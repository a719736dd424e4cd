use crate::analyzis::Analyzer;
use crate::error::Error;
use crate::error::Result;
use crate::search::BooleanQuery;
use crate::search::Query;
use crate::search::TermQuery;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Phrase(String),
    Field(String),
    LParen,
    RParen,
    Boost(f32),
    And,
    Or,
}

impl Token {
    fn starts_clause(&self) -> bool {
        match self {
            Token::Word(_) | Token::Phrase(_) | Token::Field(_) | Token::LParen => true,
            _ => false,
        }
    }
}

const RESERVED: &str = "()\":^";

fn lex(query: &str) -> Result<Vec<(Token, usize)>> {
    let mut tokens = Vec::new();
    let mut chars = query.char_indices().peekable();
    while let Some(&(pos, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        match c {
            '(' => {
                chars.next();
                tokens.push((Token::LParen, pos));
            }
            ')' => {
                chars.next();
                tokens.push((Token::RParen, pos));
            }
            ':' => return Err(Error::query_parse(pos, "missing field name before ':'")),
            '"' => {
                chars.next();
                let mut phrase = String::new();
                let mut closed = false;
                for (_, c) in chars.by_ref() {
                    if c == '"' {
                        closed = true;
                        break;
                    }
                    phrase.push(c);
                }
                if !closed {
                    return Err(Error::query_parse(pos, "unterminated quote"));
                }
                tokens.push((Token::Phrase(phrase), pos));
            }
            '^' => {
                chars.next();
                let mut raw = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_whitespace() || c == '(' || c == ')' {
                        break;
                    }
                    raw.push(c);
                    chars.next();
                }
                match raw.parse::<f32>() {
                    Ok(boost) if boost.is_finite() && boost >= 0.0 => {
                        tokens.push((Token::Boost(boost), pos))
                    }
                    _ => {
                        return Err(Error::query_parse(
                            pos,
                            format!("invalid boost '{}'", raw),
                        ))
                    }
                }
            }
            _ => {
                let mut word = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_whitespace() || RESERVED.contains(c) {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }
                if let Some(&(_, ':')) = chars.peek() {
                    chars.next();
                    tokens.push((Token::Field(word), pos));
                    continue;
                }
                let token = match word.as_str() {
                    "AND" | "&&" => Token::And,
                    "OR" | "||" => Token::Or,
                    _ => Token::Word(word),
                };
                tokens.push((token, pos));
            }
        }
    }
    Ok(tokens)
}

/// Parses query strings such as `category:memory AND (name:bytes^2 OR
/// "page faults")`. Terms without a field search every indexed field.
/// Terms next to each other are combined with the default operator.
#[derive(Debug, Clone)]
pub struct QueryParser {
    analyzer: Box<dyn Analyzer>,
    default_operator: Operator,
}

impl QueryParser {
    pub fn new(analyzer: Box<dyn Analyzer>) -> QueryParser {
        QueryParser {
            analyzer,
            default_operator: Operator::Or,
        }
    }

    pub fn with_default_operator(mut self, operator: Operator) -> QueryParser {
        self.default_operator = operator;
        self
    }

    pub fn parse(&self, query: &str) -> Result<Box<dyn Query>> {
        let tokens = lex(query)?;
        if tokens.is_empty() {
            return Err(Error::query_parse(0, "empty query"));
        }
        let mut parser = Parser {
            tokens,
            pos: 0,
            end: query.len(),
            analyzer: &*self.analyzer,
            default_operator: self.default_operator,
        };
        let parsed = parser.parse_or()?;
        match parser.tokens.get(parser.pos) {
            None => Ok(parsed),
            Some((Token::RParen, pos)) => Err(Error::query_parse(
                *pos,
                "unbalanced parenthesis, unexpected ')'",
            )),
            Some((_, pos)) => Err(Error::query_parse(*pos, "unexpected token")),
        }
    }
}

struct Parser<'p> {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    end: usize,
    analyzer: &'p dyn Analyzer,
    default_operator: Operator,
}

impl<'p> Parser<'p> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn next(&mut self) -> Option<(Token, usize)> {
        let next = self.tokens.get(self.pos).cloned();
        if next.is_some() {
            self.pos += 1;
        }
        next
    }

    fn implicit(&self, operator: Operator) -> bool {
        self.default_operator == operator && self.peek().map_or(false, Token::starts_clause)
    }

    fn parse_or(&mut self) -> Result<Box<dyn Query>> {
        let mut clauses = vec![self.parse_and()?];
        loop {
            if let Some(Token::Or) = self.peek() {
                self.next();
            } else if !self.implicit(Operator::Or) {
                break;
            }
            clauses.push(self.parse_and()?);
        }
        if clauses.len() == 1 {
            return Ok(clauses.remove(0));
        }
        Ok(Box::new(
            clauses
                .into_iter()
                .fold(BooleanQuery::new(), |q, clause| q.should(clause)),
        ))
    }

    fn parse_and(&mut self) -> Result<Box<dyn Query>> {
        let mut clauses = vec![self.parse_unary()?];
        loop {
            if let Some(Token::And) = self.peek() {
                self.next();
            } else if !self.implicit(Operator::And) {
                break;
            }
            clauses.push(self.parse_unary()?);
        }
        if clauses.len() == 1 {
            return Ok(clauses.remove(0));
        }
        Ok(Box::new(
            clauses
                .into_iter()
                .fold(BooleanQuery::new(), |q, clause| q.must(clause)),
        ))
    }

    fn parse_boost(&mut self) -> Option<f32> {
        if let Some(Token::Boost(boost)) = self.peek() {
            let boost = *boost;
            self.next();
            Some(boost)
        } else {
            None
        }
    }

    fn parse_unary(&mut self) -> Result<Box<dyn Query>> {
        match self.next() {
            Some((Token::LParen, pos)) => {
                if let Some(Token::RParen) = self.peek() {
                    return Err(Error::query_parse(pos, "empty group"));
                }
                let inner = self.parse_or()?;
                match self.next() {
                    Some((Token::RParen, _)) => (),
                    _ => {
                        return Err(Error::query_parse(
                            pos,
                            "unbalanced parenthesis, missing ')'",
                        ))
                    }
                }
                match self.parse_boost() {
                    Some(boost) => Ok(Box::new(BooleanQuery::new().must(inner).boost(boost))),
                    None => Ok(inner),
                }
            }
            Some((Token::Field(field), pos)) => match self.next() {
                Some((Token::Word(text), pos)) | Some((Token::Phrase(text), pos)) => {
                    self.term(Some(field), text, pos)
                }
                _ => Err(Error::query_parse(
                    pos,
                    format!("expected a term after '{}:'", field),
                )),
            },
            Some((Token::Word(text), pos)) | Some((Token::Phrase(text), pos)) => {
                self.term(None, text, pos)
            }
            Some((Token::RParen, pos)) => Err(Error::query_parse(
                pos,
                "unbalanced parenthesis, unexpected ')'",
            )),
            Some((Token::And, pos)) | Some((Token::Or, pos)) => {
                Err(Error::query_parse(pos, "operator without a left operand"))
            }
            Some((Token::Boost(_), pos)) => Err(Error::query_parse(pos, "boost without a term")),
            None => Err(Error::query_parse(self.end, "expected a term")),
        }
    }

    fn term(&mut self, field: Option<String>, text: String, pos: usize) -> Result<Box<dyn Query>> {
        if text.trim().is_empty() {
            return Err(Error::query_parse(pos, "empty term"));
        }
        let analyzer = self.analyzer.clone_box();
        let query = match field {
            Some(field) => TermQuery::new(field, text, analyzer),
            None => TermQuery::any_field(text, analyzer),
        };
        match self.parse_boost() {
            Some(boost) => Ok(Box::new(query.boost(boost))),
            None => Ok(Box::new(query)),
        }
    }
}
