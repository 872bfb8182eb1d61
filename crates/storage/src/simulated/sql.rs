//! The SQL subset understood by the simulated library

use std::fmt;

/// A literal or placeholder in a VALUES list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Term {
    /// Integer literal
    Int(i64),
    /// Quoted text literal
    Text(String),
    /// `NULL`
    Null,
    /// `?` placeholder with its 1-based position in the statement
    Param(usize),
}

/// One parsed statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `CREATE TABLE name(col [type...], ...)`
    CreateTable {
        /// Table name
        name: String,
        /// Column names in declaration order
        columns: Vec<String>,
        /// Position of an `INTEGER PRIMARY KEY` column, if any
        rowid_alias: Option<usize>,
    },
    /// `CREATE INDEX name ON table(col, ...)`
    CreateIndex {
        /// Index name
        name: String,
        /// Indexed table
        table: String,
        /// Indexed columns
        columns: Vec<String>,
    },
    /// `INSERT INTO table(col, ...) VALUES (...), ...`
    Insert {
        /// Target table
        table: String,
        /// Listed columns
        columns: Vec<String>,
        /// One term list per row
        rows: Vec<Vec<Term>>,
    },
    /// `SELECT count(*) FROM table`
    Count {
        /// Counted table
        table: String,
    },
    /// `DROP INDEX name`
    DropIndex {
        /// Index name
        name: String,
    },
    /// `DROP TABLE name`
    DropTable {
        /// Table name
        name: String,
    },
    /// `VACUUM`
    Vacuum,
    /// `BEGIN [TRANSACTION]`
    Begin,
    /// `COMMIT` or `END [TRANSACTION]`
    Commit,
    /// `ROLLBACK [TRANSACTION]`
    Rollback,
}

impl Command {
    /// Number of `?` placeholders
    pub fn parameter_count(&self) -> usize {
        match self {
            Command::Insert { rows, .. } => rows
                .iter()
                .flatten()
                .filter(|t| matches!(t, Term::Param(_)))
                .count(),
            _ => 0,
        }
    }

    /// `true` for statements that modify the database
    pub fn is_write(&self) -> bool {
        !matches!(
            self,
            Command::Count { .. } | Command::Begin | Command::Commit | Command::Rollback
        )
    }
}

/// Why a statement was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError(String);

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "syntax error: {}", self.0)
    }
}

impl std::error::Error for SyntaxError {}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Int(i64),
    Text(String),
    Punct(char),
}

fn tokenize(sql: &str) -> Result<Vec<Token>, SyntaxError> {
    let mut tokens = Vec::new();
    let mut chars = sql.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c.is_ascii_alphabetic() || c == '_' {
            let mut word = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_ascii_alphanumeric() || c == '_' {
                    word.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token::Word(word));
        } else if c.is_ascii_digit() || c == '-' {
            let mut digits = String::new();
            digits.push(c);
            chars.next();
            while let Some(&c) = chars.peek() {
                if c.is_ascii_digit() {
                    digits.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            let value = digits
                .parse()
                .map_err(|_| SyntaxError(format!("bad integer {}", digits)))?;
            tokens.push(Token::Int(value));
        } else if c == '\'' {
            chars.next();
            let mut text = String::new();
            loop {
                match chars.next() {
                    Some('\'') if chars.peek() == Some(&'\'') => {
                        chars.next();
                        text.push('\'');
                    }
                    Some('\'') => break,
                    Some(c) => text.push(c),
                    None => return Err(SyntaxError("unterminated string".into())),
                }
            }
            tokens.push(Token::Text(text));
        } else if "(),;*?".contains(c) {
            tokens.push(Token::Punct(c));
            chars.next();
        } else {
            return Err(SyntaxError(format!("unexpected character {:?}", c)));
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    params: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Word(w)) if w.eq_ignore_ascii_case(keyword))
    }

    fn keyword(&mut self, keyword: &str) -> Result<(), SyntaxError> {
        if self.at_keyword(keyword) {
            self.pos += 1;
            Ok(())
        } else {
            Err(SyntaxError(format!("expected {}", keyword)))
        }
    }

    fn optional_keyword(&mut self, keyword: &str) {
        if self.at_keyword(keyword) {
            self.pos += 1;
        }
    }

    fn punct(&mut self, expected: char) -> Result<(), SyntaxError> {
        match self.next() {
            Some(Token::Punct(c)) if c == expected => Ok(()),
            other => Err(SyntaxError(format!("expected {:?}, got {:?}", expected, other))),
        }
    }

    fn at_punct(&self, expected: char) -> bool {
        matches!(self.peek(), Some(Token::Punct(c)) if *c == expected)
    }

    fn ident(&mut self) -> Result<String, SyntaxError> {
        match self.next() {
            Some(Token::Word(w)) => Ok(w),
            other => Err(SyntaxError(format!("expected identifier, got {:?}", other))),
        }
    }

    fn finish(&mut self) -> Result<(), SyntaxError> {
        if self.at_punct(';') {
            self.pos += 1;
        }
        match self.peek() {
            None => Ok(()),
            Some(token) => Err(SyntaxError(format!("trailing {:?}", token))),
        }
    }

    /// `(a, b, c)`
    fn column_list(&mut self) -> Result<Vec<String>, SyntaxError> {
        self.punct('(')?;
        let mut columns = vec![self.ident()?];
        while self.at_punct(',') {
            self.pos += 1;
            columns.push(self.ident()?);
        }
        self.punct(')')?;
        Ok(columns)
    }

    fn term(&mut self) -> Result<Term, SyntaxError> {
        match self.next() {
            Some(Token::Int(v)) => Ok(Term::Int(v)),
            Some(Token::Text(t)) => Ok(Term::Text(t)),
            Some(Token::Word(w)) if w.eq_ignore_ascii_case("null") => Ok(Term::Null),
            Some(Token::Punct('?')) => {
                self.params += 1;
                Ok(Term::Param(self.params))
            }
            other => Err(SyntaxError(format!("expected value, got {:?}", other))),
        }
    }

    fn statement(&mut self) -> Result<Command, SyntaxError> {
        let verb = self.ident()?.to_ascii_uppercase();
        match verb.as_str() {
            "CREATE" => {
                if self.at_keyword("table") {
                    self.pos += 1;
                    self.create_table()
                } else {
                    self.keyword("index")?;
                    let name = self.ident()?;
                    self.keyword("on")?;
                    let table = self.ident()?;
                    let columns = self.column_list()?;
                    Ok(Command::CreateIndex {
                        name,
                        table,
                        columns,
                    })
                }
            }
            "INSERT" => {
                self.keyword("into")?;
                let table = self.ident()?;
                let columns = self.column_list()?;
                self.keyword("values")?;
                let mut rows = Vec::new();
                loop {
                    self.punct('(')?;
                    let mut row = vec![self.term()?];
                    while self.at_punct(',') {
                        self.pos += 1;
                        row.push(self.term()?);
                    }
                    self.punct(')')?;
                    if row.len() != columns.len() {
                        return Err(SyntaxError(format!(
                            "{} values for {} columns",
                            row.len(),
                            columns.len()
                        )));
                    }
                    rows.push(row);
                    if !self.at_punct(',') {
                        break;
                    }
                    self.pos += 1;
                }
                Ok(Command::Insert {
                    table,
                    columns,
                    rows,
                })
            }
            "SELECT" => {
                self.keyword("count")?;
                self.punct('(')?;
                self.punct('*')?;
                self.punct(')')?;
                self.keyword("from")?;
                Ok(Command::Count {
                    table: self.ident()?,
                })
            }
            "DROP" => {
                if self.at_keyword("index") {
                    self.pos += 1;
                    Ok(Command::DropIndex { name: self.ident()? })
                } else {
                    self.keyword("table")?;
                    Ok(Command::DropTable { name: self.ident()? })
                }
            }
            "VACUUM" => Ok(Command::Vacuum),
            "BEGIN" => {
                self.optional_keyword("transaction");
                Ok(Command::Begin)
            }
            "COMMIT" | "END" => {
                self.optional_keyword("transaction");
                Ok(Command::Commit)
            }
            "ROLLBACK" => {
                self.optional_keyword("transaction");
                Ok(Command::Rollback)
            }
            other => Err(SyntaxError(format!("unsupported statement {}", other))),
        }
    }

    fn create_table(&mut self) -> Result<Command, SyntaxError> {
        let name = self.ident()?;
        self.punct('(')?;
        let mut columns = Vec::new();
        let mut rowid_alias = None;
        loop {
            columns.push(self.ident()?);
            // Type name and constraints up to the next separator
            let mut words = Vec::new();
            while let Some(Token::Word(w)) = self.peek() {
                words.push(w.to_ascii_uppercase());
                self.pos += 1;
            }
            if words.first().map(String::as_str) == Some("INTEGER")
                && words.windows(2).any(|w| w[0] == "PRIMARY" && w[1] == "KEY")
            {
                rowid_alias = Some(columns.len() - 1);
            }
            if self.at_punct(',') {
                self.pos += 1;
            } else {
                break;
            }
        }
        self.punct(')')?;
        Ok(Command::CreateTable {
            name,
            columns,
            rowid_alias,
        })
    }
}

/// Parse exactly one statement
pub fn parse(sql: &str) -> Result<Command, SyntaxError> {
    let mut parser = Parser {
        tokens: tokenize(sql)?,
        pos: 0,
        params: 0,
    };
    let command = parser.statement()?;
    parser.finish()?;
    Ok(command)
}
