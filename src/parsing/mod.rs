//! Reading and writing the line-oriented tuple format used by every
//! intermediate file of a fusion run.

pub mod tuple_parser;
pub mod tuple_writer;

pub use tuple_parser::{parse_term, ParseError, ParseErrorKind, ParsePolicy, Severity, TupleReader};
pub use tuple_writer::TupleWriter;
