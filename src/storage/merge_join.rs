//! Sort-merge inner join of two tuple streams on their leading term.

use std::error::Error;
use std::fmt;
use std::io::{self, Write};

use thiserror::Error;

use crate::core::{Term, Tuple};
use crate::parsing::TupleWriter;

pub type TransformError = Box<dyn Error + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Side::Left => "left",
            Side::Right => "right",
        })
    }
}

#[derive(Error, Debug)]
pub enum MergeError {
    #[error("reading {side} input: {source}")]
    Input {
        side: Side,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    #[error("{side} input is not sorted: key {key} follows {previous}")]
    Unsorted {
        side: Side,
        key: Term,
        previous: Term,
    },
    #[error("{side} input contains an empty row")]
    EmptyRow { side: Side },
    #[error("joining {left} with {right}: {source}")]
    Transform {
        left: Tuple,
        right: Tuple,
        #[source]
        source: TransformError,
    },
    #[error("writing joined rows: {0}")]
    Io(#[from] io::Error),
}

/// One input with a single row of lookahead and an order check.
struct KeyedInput<I> {
    rows: I,
    side: Side,
    peeked: Option<Tuple>,
    last_key: Option<Term>,
    exhausted: bool,
}

impl<I, E> KeyedInput<I>
where
    I: Iterator<Item = Result<Tuple, E>>,
    E: Into<Box<dyn Error + Send + Sync>>,
{
    fn new(rows: I, side: Side) -> Self {
        Self {
            rows,
            side,
            peeked: None,
            last_key: None,
            exhausted: false,
        }
    }

    /// Key of the next row without consuming it.
    fn peek_key(&mut self) -> Result<Option<Term>, MergeError> {
        if self.peeked.is_none() && !self.exhausted {
            match self.rows.next() {
                None => self.exhausted = true,
                Some(Err(source)) => {
                    return Err(MergeError::Input {
                        side: self.side,
                        source: source.into(),
                    })
                }
                Some(Ok(row)) => {
                    let key = row
                        .key()
                        .cloned()
                        .ok_or(MergeError::EmptyRow { side: self.side })?;
                    if let Some(previous) = self.last_key.take() {
                        if key < previous {
                            return Err(MergeError::Unsorted {
                                side: self.side,
                                key,
                                previous,
                            });
                        }
                    }
                    self.last_key = Some(key);
                    self.peeked = Some(row);
                }
            }
        }
        Ok(self.peeked.as_ref().and_then(Tuple::key).cloned())
    }

    fn take(&mut self) -> Option<Tuple> {
        self.peeked.take()
    }
}

/// Lazily joins `left` and `right`, both sorted ascending on their first term.
///
/// For every key present on both sides the full cross product of the two key
/// groups is passed through `transform`; the right group is buffered.
pub struct StreamMerger<L, R, F> {
    left: KeyedInput<L>,
    right: KeyedInput<R>,
    transform: F,
    group_key: Option<Term>,
    right_group: Vec<Tuple>,
    current_left: Option<Tuple>,
    right_index: usize,
    emitted: u64,
    done: bool,
}

impl<L, R, F, EL, ER> StreamMerger<L, R, F>
where
    L: Iterator<Item = Result<Tuple, EL>>,
    R: Iterator<Item = Result<Tuple, ER>>,
    EL: Into<Box<dyn Error + Send + Sync>>,
    ER: Into<Box<dyn Error + Send + Sync>>,
    F: FnMut(&Tuple, &Tuple) -> Result<Tuple, TransformError>,
{
    pub fn new(left: L, right: R, transform: F) -> Self {
        Self {
            left: KeyedInput::new(left, Side::Left),
            right: KeyedInput::new(right, Side::Right),
            transform,
            group_key: None,
            right_group: Vec::new(),
            current_left: None,
            right_index: 0,
            emitted: 0,
            done: false,
        }
    }

    /// Rows produced so far.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Drains the join into `writer`, returning the number of rows emitted.
    pub fn write_to<W: Write>(mut self, writer: &mut TupleWriter<W>) -> Result<u64, MergeError> {
        while let Some(row) = self.next() {
            writer.write_tuple(&row?)?;
        }
        Ok(self.emitted)
    }

    fn advance(&mut self) -> Result<Option<Tuple>, MergeError> {
        loop {
            if let Some(left_row) = &self.current_left {
                if let Some(right_row) = self.right_group.get(self.right_index) {
                    self.right_index += 1;
                    return match (self.transform)(left_row, right_row) {
                        Ok(joined) => {
                            self.emitted += 1;
                            Ok(Some(joined))
                        }
                        Err(source) => Err(MergeError::Transform {
                            left: left_row.clone(),
                            right: right_row.clone(),
                            source,
                        }),
                    };
                }

                self.current_left = None;
                if self.left.peek_key()? == self.group_key {
                    self.current_left = self.left.take();
                    self.right_index = 0;
                } else {
                    self.group_key = None;
                    self.right_group.clear();
                }
                continue;
            }

            let Some(left_key) = self.left.peek_key()? else {
                return Ok(None);
            };
            let Some(right_key) = self.right.peek_key()? else {
                return Ok(None);
            };

            match left_key.cmp(&right_key) {
                std::cmp::Ordering::Less => {
                    self.left.take();
                }
                std::cmp::Ordering::Greater => {
                    self.right.take();
                }
                std::cmp::Ordering::Equal => {
                    while self.right.peek_key()?.as_ref() == Some(&right_key) {
                        if let Some(row) = self.right.take() {
                            self.right_group.push(row);
                        }
                    }
                    self.group_key = Some(left_key);
                    self.current_left = self.left.take();
                    self.right_index = 0;
                }
            }
        }
    }
}

impl<L, R, F, EL, ER> Iterator for StreamMerger<L, R, F>
where
    L: Iterator<Item = Result<Tuple, EL>>,
    R: Iterator<Item = Result<Tuple, ER>>,
    EL: Into<Box<dyn Error + Send + Sync>>,
    ER: Into<Box<dyn Error + Send + Sync>>,
    F: FnMut(&Tuple, &Tuple) -> Result<Tuple, TransformError>,
{
    type Item = Result<Tuple, MergeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.advance() {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(error) => {
                self.done = true;
                Some(Err(error))
            }
        }
    }
}
