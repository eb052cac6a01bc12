//! Parsing translated template text into an executable node tree

use crate::error::{ExprError, ViewError};
use crate::expr::{
    parse_arguments, parse_expression, parse_for, parse_foreach, parse_statements, Expr,
    ForHeader, ForeachHeader, Stmt,
};
use crate::scan::{self, MARKER_OPEN};

/// One node of a template program
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Text(String),
    Echo {
        expr: Expr,
        escape: bool,
    },
    Json(Expr),
    Dump(Expr),
    Dd(Expr),
    If {
        branches: Vec<(Expr, Vec<Node>)>,
        otherwise: Option<Vec<Node>>,
    },
    Foreach {
        header: ForeachHeader,
        body: Vec<Node>,
        /// `@forelse` fallback for an empty iterable
        empty: Option<Vec<Node>>,
    },
    For {
        header: ForHeader,
        body: Vec<Node>,
    },
    While {
        condition: Expr,
        body: Vec<Node>,
    },
    Break(usize),
    Continue(usize),
    Php(Vec<Stmt>),
    Push {
        stack: Expr,
        body: Vec<Node>,
        prepend: bool,
    },
    Section {
        name: Expr,
        body: Vec<Node>,
    },
    SectionValue {
        name: Expr,
        value: Expr,
    },
    Yield {
        name: Expr,
        default: Option<Expr>,
    },
    Extends(Expr),
    Stack(Expr),
    Fragment(usize),
}

/// A parsed template, ready for the interpreter
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub nodes: Vec<Node>,
}

/// Text or a marker, as split out of translated template text
#[derive(Debug, Clone, PartialEq)]
enum Piece<'a> {
    Text(&'a str),
    Marker { keyword: &'a str, args: &'a str },
    Php(&'a str),
}

/// Parse translated template text
pub fn parse_program(text: &str) -> Result<Program, ViewError> {
    let pieces = split(text)?;
    let mut parser = ProgramParser { pieces, pos: 0 };
    let (nodes, terminator) = parser.block(&[])?;
    match terminator {
        Some((keyword, _)) => Err(unexpected(keyword)),
        None => Ok(Program { nodes }),
    }
}

fn split(text: &str) -> Result<Vec<Piece<'_>>, ViewError> {
    let mut pieces = Vec::new();
    let mut pos = 0;
    let mut search = 0;

    while let Some(rel) = text[search..].find(MARKER_OPEN) {
        let at = search + rel;
        let Some(found) = scan::parse_marker(text, at) else {
            search = at + MARKER_OPEN.len();
            continue;
        };
        if at > pos {
            pieces.push(Piece::Text(&text[pos..at]));
        }

        match found.keyword {
            "php" | "verbatim" => {
                let (body_end, after) = scan::raw_block_end(text, found.end, found.keyword)
                    .ok_or_else(|| ViewError::evaluation(format!("unclosed @{} block", found.keyword)))?;
                let body = &text[found.end..body_end];
                pieces.push(if found.keyword == "php" {
                    Piece::Php(body)
                } else {
                    Piece::Text(body)
                });
                pos = after;
            }
            keyword => {
                pieces.push(Piece::Marker {
                    keyword,
                    args: found.args,
                });
                pos = found.end;
            }
        }
        search = pos;
    }

    if pos < text.len() {
        pieces.push(Piece::Text(&text[pos..]));
    }
    Ok(pieces)
}

fn unexpected(keyword: &str) -> ViewError {
    ViewError::evaluation(format!("unexpected @{}", keyword))
}

fn unclosed(keyword: &str) -> ViewError {
    ViewError::evaluation(format!("unclosed @{}", keyword))
}

/// Wrap an expression error with the directive it came from
fn in_directive(keyword: &str, args: &str) -> impl FnOnce(ExprError) -> ViewError {
    let context = format!("@{}({})", keyword, args);
    move |err| ViewError::evaluation(format!("in {}: {}", context, err))
}

fn count_arg(keyword: &str, args: &str) -> Result<usize, ViewError> {
    if args.is_empty() {
        return Ok(1);
    }
    match args.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ViewError::evaluation(format!(
            "@{} expects a positive loop count, got '{}'",
            keyword, args
        ))),
    }
}

struct ProgramParser<'a> {
    pieces: Vec<Piece<'a>>,
    pos: usize,
}

type Terminator<'a> = (&'a str, &'a str);

impl<'a> ProgramParser<'a> {
    /// Parse nodes until one of `terminators` (returned) or the end
    fn block(&mut self, terminators: &[&str]) -> Result<(Vec<Node>, Option<Terminator<'a>>), ViewError> {
        let mut nodes = Vec::new();

        while let Some(piece) = self.pieces.get(self.pos).cloned() {
            self.pos += 1;
            let (keyword, args) = match piece {
                Piece::Text(text) => {
                    push_text(&mut nodes, text);
                    continue;
                }
                Piece::Php(body) => {
                    let stmts = parse_statements(body).map_err(in_directive("php", body.trim()))?;
                    nodes.push(Node::Php(stmts));
                    continue;
                }
                Piece::Marker { keyword, args } => (keyword, args),
            };

            if terminators.contains(&keyword) {
                return Ok((nodes, Some((keyword, args))));
            }
            let node = self.node(keyword, args)?;
            match node {
                Some(Node::Text(text)) => push_text(&mut nodes, &text),
                Some(node) => nodes.push(node),
                None => {}
            }
        }

        Ok((nodes, None))
    }

    /// Parse a block that must end with `end`
    fn closed_block(&mut self, opener: &str, end: &str) -> Result<Vec<Node>, ViewError> {
        match self.block(&[end])? {
            (nodes, Some(_)) => Ok(nodes),
            (_, None) => Err(unclosed(opener)),
        }
    }

    fn expr(keyword: &str, args: &str) -> Result<Expr, ViewError> {
        if args.is_empty() {
            return Err(ViewError::evaluation(format!("@{} needs an argument", keyword)));
        }
        parse_expression(args).map_err(in_directive(keyword, args))
    }

    fn node(&mut self, keyword: &'a str, args: &'a str) -> Result<Option<Node>, ViewError> {
        let node = match keyword {
            "echo" => Node::Echo {
                expr: Self::expr(keyword, args)?,
                escape: true,
            },
            "raw" => Node::Echo {
                expr: Self::expr(keyword, args)?,
                escape: false,
            },
            "json" => {
                let mut values = parse_arguments(args).map_err(in_directive(keyword, args))?;
                if values.is_empty() {
                    return Err(ViewError::evaluation("@json needs an argument"));
                }
                Node::Json(values.swap_remove(0))
            }
            "dump" => Node::Dump(Self::expr(keyword, args)?),
            "dd" => Node::Dd(Self::expr(keyword, args)?),
            "if" => self.conditional(args)?,
            "foreach" | "forelse" => {
                let header = parse_foreach(args).map_err(in_directive(keyword, args))?;
                if keyword == "foreach" {
                    Node::Foreach {
                        header,
                        body: self.closed_block(keyword, "endforeach")?,
                        empty: None,
                    }
                } else {
                    match self.block(&["empty", "endforelse"])? {
                        (body, Some(("empty", _))) => Node::Foreach {
                            header,
                            body,
                            empty: Some(self.closed_block(keyword, "endforelse")?),
                        },
                        (body, Some(_)) => Node::Foreach {
                            header,
                            body,
                            empty: None,
                        },
                        (_, None) => return Err(unclosed(keyword)),
                    }
                }
            }
            "for" => Node::For {
                header: parse_for(args).map_err(in_directive(keyword, args))?,
                body: self.closed_block(keyword, "endfor")?,
            },
            "while" => Node::While {
                condition: Self::expr(keyword, args)?,
                body: self.closed_block(keyword, "endwhile")?,
            },
            "break" => Node::Break(count_arg(keyword, args)?),
            "continue" => Node::Continue(count_arg(keyword, args)?),
            "push" | "prepend" => Node::Push {
                stack: Self::expr(keyword, args)?,
                body: self.closed_block(keyword, &format!("end{}", keyword))?,
                prepend: keyword == "prepend",
            },
            "section" => {
                let mut values = parse_arguments(args).map_err(in_directive(keyword, args))?;
                match values.len() {
                    1 => Node::Section {
                        name: values.remove(0),
                        body: self.closed_block(keyword, "endsection")?,
                    },
                    2 => {
                        let value = values.remove(1);
                        Node::SectionValue {
                            name: values.remove(0),
                            value,
                        }
                    }
                    _ => return Err(ViewError::evaluation("@section takes a name and an optional value")),
                }
            }
            "yield" => {
                let mut values = parse_arguments(args).map_err(in_directive(keyword, args))?;
                match values.len() {
                    1 => Node::Yield {
                        name: values.remove(0),
                        default: None,
                    },
                    2 => {
                        let default = values.remove(1);
                        Node::Yield {
                            name: values.remove(0),
                            default: Some(default),
                        }
                    }
                    _ => return Err(ViewError::evaluation("@yield takes a name and an optional default")),
                }
            }
            "extends" => Node::Extends(Self::expr(keyword, args)?),
            "stack" => Node::Stack(Self::expr(keyword, args)?),
            "fragment" => Node::Fragment(
                args.parse::<usize>()
                    .map_err(|_| ViewError::evaluation(format!("bad fragment reference '{}'", args)))?,
            ),
            "at" => Node::Text("@".to_string()),
            other => return Err(unexpected(other)),
        };
        Ok(Some(node))
    }

    fn conditional(&mut self, args: &'a str) -> Result<Node, ViewError> {
        let mut branches = Vec::new();
        let mut condition = Self::expr("if", args)?;

        loop {
            let (body, terminator) = self.block(&["elseif", "else", "endif"])?;
            branches.push((condition, body));
            match terminator {
                Some(("elseif", next)) => condition = Self::expr("elseif", next)?,
                Some(("else", _)) => {
                    let otherwise = self.closed_block("else", "endif")?;
                    return Ok(Node::If {
                        branches,
                        otherwise: Some(otherwise),
                    });
                }
                Some(_) => {
                    return Ok(Node::If {
                        branches,
                        otherwise: None,
                    })
                }
                None => return Err(unclosed("if")),
            }
        }
    }
}

fn push_text(nodes: &mut Vec<Node>, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(Node::Text(prev)) = nodes.last_mut() {
        prev.push_str(text);
    } else {
        nodes.push(Node::Text(text.to_string()));
    }
}
