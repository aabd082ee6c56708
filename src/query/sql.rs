use crate::core::error::{Error, ErrorKind, Result};
use crate::core::value::Value;
use crate::query::query::{AggType, CondType, OpType, Query, QueryEntry, SortEntry};

/// Parser for the SQL-flavored query surface:
///
/// ```sql
/// SELECT * FROM users WHERE name = 'Ada' AND age >= 20 ORDER BY age DESC LIMIT 10 OFFSET 5
/// SELECT COUNT(*) FROM users WHERE tags IS NOT NULL
/// SELECT max(age), facet(name) FROM users WHERE id IN (1, 2, 3)
/// ```
pub fn parse_sql(input: &str) -> Result<Query> {
    let tokens = tokenize(input)?;
    let mut p = Parser { tokens, pos: 0 };
    p.parse_select()
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(String),
    Str(String),
    Sym(String),
}

impl Token {
    fn text(&self) -> &str {
        match self {
            Token::Ident(s) | Token::Number(s) | Token::Str(s) | Token::Sym(s) => s,
        }
    }
}

fn err(context: impl Into<String>) -> Error {
    Error::new(ErrorKind::ParseSql, context)
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c == '\'' || c == '"' {
            let quote = c;
            let start = i + 1;
            let mut j = start;
            while j < chars.len() && chars[j] != quote {
                j += 1;
            }
            if j >= chars.len() {
                return Err(err("unterminated string literal"));
            }
            tokens.push(Token::Str(chars[start..j].iter().collect()));
            i = j + 1;
        } else if c.is_ascii_digit()
            || (c == '-' && chars.get(i + 1).map_or(false, |d| d.is_ascii_digit()))
        {
            let start = i;
            i += 1;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            tokens.push(Token::Number(chars[start..i].iter().collect()));
        } else if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
        } else if c == '<' || c == '>' || c == '!' || c == '=' {
            let mut sym = c.to_string();
            if let Some(&next) = chars.get(i + 1) {
                if next == '=' || (c == '<' && next == '>') {
                    sym.push(next);
                    i += 1;
                }
            }
            i += 1;
            tokens.push(Token::Sym(sym));
        } else if "(),*".contains(c) {
            tokens.push(Token::Sym(c.to_string()));
            i += 1;
        } else {
            return Err(err(format!("unexpected character '{}'", c)));
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Result<Token> {
        let t = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| err("unexpected end of query"))?;
        self.pos += 1;
        Ok(t)
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if let Some(Token::Ident(s)) = self.peek() {
            if s.eq_ignore_ascii_case(kw) {
                self.pos += 1;
                return true;
            }
        }
        false
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<()> {
        if self.eat_keyword(kw) {
            Ok(())
        } else {
            Err(err(format!("expected {}", kw.to_uppercase())))
        }
    }

    fn eat_sym(&mut self, sym: &str) -> bool {
        if let Some(Token::Sym(s)) = self.peek() {
            if s == sym {
                self.pos += 1;
                return true;
            }
        }
        false
    }

    fn expect_sym(&mut self, sym: &str) -> Result<()> {
        if self.eat_sym(sym) {
            Ok(())
        } else {
            Err(err(format!("expected '{}'", sym)))
        }
    }

    fn ident(&mut self) -> Result<String> {
        match self.next()? {
            Token::Ident(s) => Ok(s),
            other => Err(err(format!("expected identifier, got '{}'", other.text()))),
        }
    }

    fn parse_select(&mut self) -> Result<Query> {
        self.expect_keyword("select")?;

        let mut count_only = false;
        let mut aggregations = Vec::new();
        loop {
            if self.eat_sym("*") {
            } else if let Some(Token::Ident(name)) = self.peek().cloned() {
                if name.eq_ignore_ascii_case("count") {
                    self.pos += 1;
                    self.expect_sym("(")?;
                    self.expect_sym("*")?;
                    self.expect_sym(")")?;
                    count_only = true;
                } else if let Some(agg) = agg_type(&name) {
                    self.pos += 1;
                    self.expect_sym("(")?;
                    let field = self.ident()?;
                    self.expect_sym(")")?;
                    aggregations.push((agg, field));
                } else {
                    // Plain column selection; the result always carries
                    // whole items, so names are accepted and ignored.
                    self.pos += 1;
                }
            } else {
                return Err(err("expected select list"));
            }
            if !self.eat_sym(",") {
                break;
            }
        }

        self.expect_keyword("from")?;
        let namespace = self.ident()?;
        let mut query = Query::new(&namespace);
        for (agg, field) in aggregations {
            query = query.aggregate(agg, &field);
        }
        if count_only {
            query.with_total = true;
            query.limit = Some(0);
        }

        if self.eat_keyword("where") {
            self.parse_where(&mut query)?;
        }

        if self.eat_keyword("order") {
            self.expect_keyword("by")?;
            loop {
                let field = self.ident()?;
                let desc = if self.eat_keyword("desc") {
                    true
                } else {
                    self.eat_keyword("asc");
                    false
                };
                query.sort.push(SortEntry { field, desc });
                if !self.eat_sym(",") {
                    break;
                }
            }
        }

        if self.eat_keyword("limit") {
            query.limit = Some(self.number()? as usize);
        }
        if self.eat_keyword("offset") {
            query.offset = self.number()? as usize;
        }

        if let Some(t) = self.peek() {
            return Err(err(format!("unexpected trailing '{}'", t.text())));
        }
        Ok(query)
    }

    fn parse_where(&mut self, query: &mut Query) -> Result<()> {
        let mut op = OpType::And;
        loop {
            let negated = self.eat_keyword("not");
            let entry = self.parse_condition(if negated { OpType::Not } else { op })?;
            query.entries.push(entry);

            if self.eat_keyword("and") {
                op = OpType::And;
            } else if self.eat_keyword("or") {
                op = OpType::Or;
            } else {
                return Ok(());
            }
        }
    }

    fn parse_condition(&mut self, op: OpType) -> Result<QueryEntry> {
        let field = self.ident()?;

        if self.eat_keyword("in") {
            self.expect_sym("(")?;
            let mut values = Vec::new();
            if !self.eat_sym(")") {
                loop {
                    values.push(self.value()?);
                    if !self.eat_sym(",") {
                        break;
                    }
                }
                self.expect_sym(")")?;
            }
            return Ok(QueryEntry {
                op,
                field,
                cond: CondType::Set,
                values,
            });
        }

        if self.eat_keyword("range") {
            self.expect_sym("(")?;
            let lo = self.value()?;
            self.expect_sym(",")?;
            let hi = self.value()?;
            self.expect_sym(")")?;
            return Ok(QueryEntry {
                op,
                field,
                cond: CondType::Range,
                values: vec![lo, hi],
            });
        }

        if self.eat_keyword("match") {
            let v = self.value()?;
            return Ok(QueryEntry {
                op,
                field,
                cond: CondType::Match,
                values: vec![v],
            });
        }

        if self.eat_keyword("is") {
            // IS NULL -> empty array, IS NOT NULL -> any element
            let cond = if self.eat_keyword("not") {
                self.expect_keyword("null")?;
                CondType::Any
            } else {
                self.expect_keyword("null")?;
                CondType::Empty
            };
            return Ok(QueryEntry {
                op,
                field,
                cond,
                values: Vec::new(),
            });
        }

        let sym = match self.next()? {
            Token::Sym(s) => s,
            other => return Err(err(format!("expected operator, got '{}'", other.text()))),
        };
        let value = self.value()?;

        let (cond, op) = match sym.as_str() {
            "=" | "==" => (CondType::Eq, op),
            "<" => (CondType::Lt, op),
            "<=" => (CondType::Le, op),
            ">" => (CondType::Gt, op),
            ">=" => (CondType::Ge, op),
            // Inequality is a negated equality bracket
            "!=" | "<>" => (CondType::Eq, OpType::Not),
            other => return Err(err(format!("unknown operator '{}'", other))),
        };

        Ok(QueryEntry {
            op,
            field,
            cond,
            values: vec![value],
        })
    }

    fn value(&mut self) -> Result<Value> {
        match self.next()? {
            Token::Str(s) => Ok(Value::String(s)),
            Token::Number(n) => {
                if n.contains('.') {
                    n.parse::<f64>()
                        .map(Value::Double)
                        .map_err(|_| err(format!("bad number '{}'", n)))
                } else if let Ok(v) = n.parse::<i32>() {
                    Ok(Value::Int32(v))
                } else {
                    n.parse::<i64>()
                        .map(Value::Int64)
                        .map_err(|_| err(format!("bad number '{}'", n)))
                }
            }
            other => Err(err(format!("expected value, got '{}'", other.text()))),
        }
    }

    fn number(&mut self) -> Result<i64> {
        match self.next()? {
            Token::Number(n) => n
                .parse::<i64>()
                .map_err(|_| err(format!("bad number '{}'", n))),
            other => Err(err(format!("expected number, got '{}'", other.text()))),
        }
    }
}

fn agg_type(name: &str) -> Option<AggType> {
    match name.to_ascii_lowercase().as_str() {
        "min" => Some(AggType::Min),
        "max" => Some(AggType::Max),
        "sum" => Some(AggType::Sum),
        "avg" => Some(AggType::Avg),
        "facet" => Some(AggType::Facet),
        "distinct" => Some(AggType::Distinct),
        _ => None,
    }
}
