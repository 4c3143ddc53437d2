//! Parser combinators evaluated on an explicit work-list.
//!
//! Grammars are trees (or graphs, through [`ForwardRef`]) of nodes. Instead
//! of calling each other, nodes hand control back to a driver loop that keeps
//! continuation frames in a heap-allocated stack. Nesting depth of the input
//! therefore costs heap memory, never host call stack.
//!
//! # Examples
//! ```
//! use ahrules::parsing::{seq3, txt, union, ForwardRef};
//!
//! let expr = ForwardRef::<String>::new();
//! expr.set(&union([
//!     seq3(txt("("), expr.parser(), txt(")")).map(|(_, inner, _)| inner),
//!     txt("a"),
//! ]))
//! .unwrap();
//!
//! let parsed = expr.parser().parse("((a))").unwrap();
//! assert_eq!(parsed, Some(("a".to_string(), "")));
//! ```

use once_cell::sync::OnceCell;
use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::ParserError;

type Value = Box<dyn Any>;
type Outcome = Option<(Value, usize)>;
type ScanFn = dyn Fn(&str, usize) -> Outcome + Send + Sync;
type MapFn = dyn Fn(Value) -> Option<Value> + Send + Sync;
type CombineFn = dyn Fn(Value, Value) -> Value + Send + Sync;
type Tails = Arc<[(Arc<Node>, Arc<CombineFn>)]>;

enum Node {
    /// Leaf scanner working directly on the input
    Scan(Box<ScanFn>),
    Seq(Arc<[Arc<Node>]>),
    Union(Arc<[Arc<Node>]>),
    Transform(Arc<Node>, Arc<MapFn>),
    Forward(Arc<OnceCell<Arc<Node>>>),
    Step(Arc<Node>, Tails),
}

/// Continuation of a node waiting for the outcome of a child.
enum Frame {
    Seq {
        parts: Arc<[Arc<Node>]>,
        next: usize,
        results: Vec<Value>,
    },
    Union {
        alternatives: Arc<[Arc<Node>]>,
        next: usize,
        start: usize,
    },
    Transform(Arc<MapFn>),
    Forward,
    StepHead(Tails),
    StepTail {
        tails: Tails,
        index: usize,
        left: Value,
        pos: usize,
    },
}

enum Action {
    Call {
        child: Arc<Node>,
        pos: usize,
        frame: Frame,
    },
    Return(Outcome),
}

impl Node {
    fn start(&self, input: &str, pos: usize) -> Result<Action, ParserError> {
        let action = match self {
            Node::Scan(scan) => Action::Return(scan(input, pos)),
            Node::Seq(parts) => match parts.first() {
                Some(first) => Action::Call {
                    child: Arc::clone(first),
                    pos,
                    frame: Frame::Seq {
                        parts: Arc::clone(parts),
                        next: 1,
                        results: Vec::with_capacity(parts.len()),
                    },
                },
                None => Action::Return(Some((Box::new(Vec::<Value>::new()), pos))),
            },
            Node::Union(alternatives) => match alternatives.first() {
                Some(first) => Action::Call {
                    child: Arc::clone(first),
                    pos,
                    frame: Frame::Union {
                        alternatives: Arc::clone(alternatives),
                        next: 1,
                        start: pos,
                    },
                },
                None => Action::Return(None),
            },
            Node::Transform(inner, func) => Action::Call {
                child: Arc::clone(inner),
                pos,
                frame: Frame::Transform(Arc::clone(func)),
            },
            Node::Forward(cell) => Action::Call {
                child: Arc::clone(cell.get().ok_or(ParserError::Unset)?),
                pos,
                frame: Frame::Forward,
            },
            Node::Step(head, tails) => Action::Call {
                child: Arc::clone(head),
                pos,
                frame: Frame::StepHead(Arc::clone(tails)),
            },
        };
        Ok(action)
    }
}

impl Frame {
    fn resume(self, outcome: Outcome) -> Action {
        match self {
            Frame::Seq {
                parts,
                next,
                mut results,
            } => {
                let Some((value, pos)) = outcome else {
                    return Action::Return(None);
                };
                results.push(value);
                match parts.get(next) {
                    Some(part) => Action::Call {
                        child: Arc::clone(part),
                        pos,
                        frame: Frame::Seq {
                            parts: Arc::clone(&parts),
                            next: next + 1,
                            results,
                        },
                    },
                    None => Action::Return(Some((Box::new(results), pos))),
                }
            }
            Frame::Union {
                alternatives,
                next,
                start,
            } => {
                if outcome.is_some() {
                    return Action::Return(outcome);
                }
                match alternatives.get(next) {
                    Some(alternative) => Action::Call {
                        child: Arc::clone(alternative),
                        pos: start,
                        frame: Frame::Union {
                            alternatives: Arc::clone(&alternatives),
                            next: next + 1,
                            start,
                        },
                    },
                    None => Action::Return(None),
                }
            }
            Frame::Transform(func) => Action::Return(
                outcome.and_then(|(value, pos)| func(value).map(|value| (value, pos))),
            ),
            Frame::Forward => Action::Return(outcome),
            Frame::StepHead(tails) => {
                let Some((left, pos)) = outcome else {
                    return Action::Return(None);
                };
                Frame::try_tail(tails, 0, left, pos)
            }
            Frame::StepTail {
                tails,
                index,
                left,
                pos,
            } => match outcome {
                Some((right, end)) => {
                    let combine = &tails[index].1;
                    Action::Return(Some((combine(left, right), end)))
                }
                None => Frame::try_tail(tails, index + 1, left, pos),
            },
        }
    }

    fn try_tail(tails: Tails, index: usize, left: Value, pos: usize) -> Action {
        match tails.get(index) {
            Some((pattern, _)) => Action::Call {
                child: Arc::clone(pattern),
                pos,
                frame: Frame::StepTail {
                    tails: Arc::clone(&tails),
                    index,
                    left,
                    pos,
                },
            },
            None => Action::Return(None),
        }
    }
}

/// Drive a grammar over `input` until the root node returns.
fn run(root: &Node, input: &str) -> Result<Outcome, ParserError> {
    let mut stack: Vec<Frame> = Vec::new();
    let mut action = root.start(input, 0)?;

    loop {
        action = match action {
            Action::Call { child, pos, frame } => {
                stack.push(frame);
                child.start(input, pos)?
            }
            Action::Return(outcome) => match stack.pop() {
                Some(frame) => frame.resume(outcome),
                None => return Ok(outcome),
            },
        };
    }
}

fn downcast<T: 'static>(value: Value) -> T {
    match value.downcast::<T>() {
        Ok(value) => *value,
        Err(_) => unreachable!("parser node produced a value of an unexpected type"),
    }
}

/// A parser producing values of type `T`.
///
/// Parsers are cheap to clone and can be shared between threads; they are
/// usually built once and stored in a static.
pub struct Parser<T> {
    node: Arc<Node>,
    marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Parser<T> {
    fn clone(&self) -> Self {
        Self {
            node: Arc::clone(&self.node),
            marker: PhantomData,
        }
    }
}

impl<T: 'static> Parser<T> {
    fn from_node(node: Node) -> Self {
        Self {
            node: Arc::new(node),
            marker: PhantomData,
        }
    }

    /// Parse a prefix of `input`.
    ///
    /// Returns the parsed value and the unconsumed rest of the input, or
    /// `Ok(None)` if the grammar does not match. `Err` is reserved for
    /// grammar construction mistakes such as an unset [`ForwardRef`].
    pub fn parse<'a>(&self, input: &'a str) -> Result<Option<(T, &'a str)>, ParserError> {
        let outcome = run(&self.node, input)?;
        Ok(outcome.map(|(value, end)| (downcast::<T>(value), &input[end..])))
    }

    /// Post-process a successful result.
    pub fn map<U, F>(self, func: F) -> Parser<U>
    where
        U: 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        self.try_map(move |value| Some(func(value)))
    }

    /// Post-process a successful result, turning `None` into a parse failure.
    pub fn try_map<U, F>(self, func: F) -> Parser<U>
    where
        U: 'static,
        F: Fn(T) -> Option<U> + Send + Sync + 'static,
    {
        let func: Arc<MapFn> = Arc::new(move |value: Value| {
            func(downcast::<T>(value)).map(|mapped| Box::new(mapped) as Value)
        });
        Parser::from_node(Node::Transform(self.node, func))
    }

    /// Run `next` after this parser, keeping only the result of `next`.
    pub fn then<U: 'static>(self, next: Parser<U>) -> Parser<U> {
        seq2(self, next).map(|(_, right)| right)
    }

    /// Run `next` after this parser, keeping only the result of this parser.
    pub fn skip<U: 'static>(self, next: Parser<U>) -> Parser<T> {
        seq2(self, next).map(|(left, _)| left)
    }
}

/// Leaf parser from a scanning function.
///
/// The function receives the whole input and the current byte offset and
/// returns the value with the offset just past the consumed text.
pub fn scan<T, F>(func: F) -> Parser<T>
where
    T: 'static,
    F: Fn(&str, usize) -> Option<(T, usize)> + Send + Sync + 'static,
{
    Parser::from_node(Node::Scan(Box::new(move |input, pos| {
        func(input, pos).map(|(value, end)| (Box::new(value) as Value, end))
    })))
}

/// Consume the literal `text`.
pub fn txt(text: &str) -> Parser<String> {
    let text = text.to_string();
    scan(move |input, pos| {
        input[pos..]
            .starts_with(text.as_str())
            .then(|| (text.clone(), pos + text.len()))
    })
}

/// Consume `text` compared case-insensitively, yielding the text as written
/// in the input.
pub fn txt_ignore_case(text: &str) -> Parser<String> {
    let text = text.to_string();
    scan(move |input, pos| {
        let rest = &input[pos..];
        let mut chars = rest.char_indices();
        for expected in text.chars() {
            let (_, found) = chars.next()?;
            if !found.to_lowercase().eq(expected.to_lowercase()) {
                return None;
            }
        }
        let end = chars.next().map_or(rest.len(), |(offset, _)| offset);
        Some((rest[..end].to_string(), pos + end))
    })
}

/// Always succeed without consuming input.
pub fn epsilon<T>(value: T) -> Parser<T>
where
    T: Clone + Send + Sync + 'static,
{
    scan(move |_, pos| Some((value.clone(), pos)))
}

/// Run parsers in order, collecting all results.
pub fn seq<T: 'static>(parts: impl IntoIterator<Item = Parser<T>>) -> Parser<Vec<T>> {
    let parts: Vec<Arc<Node>> = parts.into_iter().map(|p| p.node).collect();
    Parser::<Vec<Value>>::from_node(Node::Seq(parts.into()))
        .map(|values| values.into_iter().map(downcast::<T>).collect())
}

/// Run two parsers in order.
pub fn seq2<A: 'static, B: 'static>(a: Parser<A>, b: Parser<B>) -> Parser<(A, B)> {
    Parser::<Vec<Value>>::from_node(Node::Seq(vec![a.node, b.node].into())).try_map(|values| {
        let mut values = values.into_iter();
        Some((downcast(values.next()?), downcast(values.next()?)))
    })
}

/// Run three parsers in order.
pub fn seq3<A: 'static, B: 'static, C: 'static>(
    a: Parser<A>,
    b: Parser<B>,
    c: Parser<C>,
) -> Parser<(A, B, C)> {
    Parser::<Vec<Value>>::from_node(Node::Seq(vec![a.node, b.node, c.node].into())).try_map(
        |values| {
            let mut values = values.into_iter();
            Some((
                downcast(values.next()?),
                downcast(values.next()?),
                downcast(values.next()?),
            ))
        },
    )
}

/// First alternative (in order) that succeeds wins.
pub fn union<T: 'static>(alternatives: impl IntoIterator<Item = Parser<T>>) -> Parser<T> {
    let alternatives: Vec<Arc<Node>> = alternatives.into_iter().map(|p| p.node).collect();
    Parser::from_node(Node::Union(alternatives.into()))
}

/// Optional match.
pub fn maybe<T: 'static>(parser: Parser<T>) -> Parser<Option<T>> {
    union([parser.map(Some), scan(|_, pos| Some((None, pos)))])
}

/// Placeholder for a parser defined later, for recursive grammars.
pub struct ForwardRef<T> {
    cell: Arc<OnceCell<Arc<Node>>>,
    marker: PhantomData<fn() -> T>,
}

impl<T: 'static> ForwardRef<T> {
    /// Create an unset reference.
    pub fn new() -> Self {
        Self {
            cell: Arc::new(OnceCell::new()),
            marker: PhantomData,
        }
    }

    /// Set the referenced parser. A reference can be set only once.
    pub fn set(&self, parser: &Parser<T>) -> Result<(), ParserError> {
        self.cell
            .set(Arc::clone(&parser.node))
            .map_err(|_| ParserError::AlreadySet)
    }

    /// Parser that delegates to the referenced parser.
    pub fn parser(&self) -> Parser<T> {
        Parser::from_node(Node::Forward(Arc::clone(&self.cell)))
    }
}

impl<T: 'static> Default for ForwardRef<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A continuation pattern of [`step`].
pub struct Tail<H, R> {
    pattern: Arc<Node>,
    combine: Arc<CombineFn>,
    marker: PhantomData<fn(H) -> R>,
}

/// Tail that applies `combine` to the head result and the pattern result.
pub fn tail<H, U, R, F>(pattern: Parser<U>, combine: F) -> Tail<H, R>
where
    H: 'static,
    U: 'static,
    R: 'static,
    F: Fn(H, U) -> R + Send + Sync + 'static,
{
    Tail {
        pattern: pattern.node,
        combine: Arc::new(move |left: Value, right: Value| {
            Box::new(combine(downcast::<H>(left), downcast::<U>(right))) as Value
        }),
        marker: PhantomData,
    }
}

/// Tail that always matches, converting the head result on its own.
pub fn step_default<H, R, F>(func: F) -> Tail<H, R>
where
    H: 'static,
    R: 'static,
    F: Fn(H) -> R + Send + Sync + 'static,
{
    tail(epsilon(()), move |left, ()| func(left))
}

/// Parse `head`, then try each tail in order against the rest of the input
/// and combine with the first one that matches.
///
/// Tails that recurse back into the enclosing grammar express binary
/// operators without left recursion.
pub fn step<H, R>(head: Parser<H>, tails: impl IntoIterator<Item = Tail<H, R>>) -> Parser<R>
where
    H: 'static,
    R: 'static,
{
    let tails: Vec<(Arc<Node>, Arc<CombineFn>)> = tails
        .into_iter()
        .map(|tail| (tail.pattern, tail.combine))
        .collect();
    Parser::from_node(Node::Step(head.node, tails.into()))
}
