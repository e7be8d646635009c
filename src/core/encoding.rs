//! Text encoding of terms in N-Triples syntax, and conversion to the Oxigraph model.

use std::fmt::{self, Write};

use oxigraph::model as ox;

use crate::core::{vocab, Literal, Quad, Term};

/// Writes `term` in canonical N-Triples syntax.
pub fn write_term<W: Write + ?Sized>(out: &mut W, term: &Term) -> fmt::Result {
    match term {
        Term::Uri(iri) => {
            out.write_char('<')?;
            write_iri_body(out, iri)?;
            out.write_char('>')
        }
        Term::BlankNode(label) => {
            out.write_str("_:")?;
            out.write_str(label)
        }
        Term::Literal(literal) => write_literal(out, literal),
    }
}

fn write_literal<W: Write + ?Sized>(out: &mut W, literal: &Literal) -> fmt::Result {
    out.write_char('"')?;
    for c in literal.lexical.chars() {
        match c {
            '"' => out.write_str("\\\"")?,
            '\\' => out.write_str("\\\\")?,
            '\n' => out.write_str("\\n")?,
            '\r' => out.write_str("\\r")?,
            '\t' => out.write_str("\\t")?,
            '\u{8}' => out.write_str("\\b")?,
            '\u{c}' => out.write_str("\\f")?,
            c if c.is_control() => write!(out, "\\u{:04X}", c as u32)?,
            c => out.write_char(c)?,
        }
    }
    out.write_char('"')?;
    if let Some(language) = &literal.language {
        out.write_char('@')?;
        out.write_str(language)
    } else if let Some(datatype) = &literal.datatype {
        out.write_str("^^<")?;
        write_iri_body(out, datatype)?;
        out.write_char('>')
    } else {
        Ok(())
    }
}

/// Writes the inside of `<...>`, escaping what N-Triples forbids in IRIs.
pub fn write_iri_body<W: Write + ?Sized>(out: &mut W, iri: &str) -> fmt::Result {
    for c in iri.chars() {
        match c {
            '<' | '>' | '"' | '{' | '}' | '|' | '^' | '`' | '\\' => {
                write!(out, "\\u{:04X}", c as u32)?
            }
            c if c <= ' ' => write!(out, "\\u{:04X}", c as u32)?,
            c => out.write_char(c)?,
        }
    }
    Ok(())
}

/// Converts a term to its Oxigraph counterpart.
pub fn to_oxigraph_term(term: &Term) -> ox::Term {
    match term {
        Term::Uri(iri) => ox::NamedNode::new_unchecked(iri.as_str()).into(),
        Term::BlankNode(label) => ox::BlankNode::new_unchecked(label.as_str()).into(),
        Term::Literal(literal) => to_oxigraph_literal(literal).into(),
    }
}

fn to_oxigraph_literal(literal: &Literal) -> ox::Literal {
    match (&literal.language, &literal.datatype) {
        (Some(language), _) => ox::Literal::new_language_tagged_literal_unchecked(
            literal.lexical.as_str(),
            language.as_str(),
        ),
        (None, Some(datatype)) if datatype != vocab::XSD_STRING => ox::Literal::new_typed_literal(
            literal.lexical.as_str(),
            ox::NamedNode::new_unchecked(datatype.as_str()),
        ),
        _ => ox::Literal::new_simple_literal(literal.lexical.as_str()),
    }
}

/// Converts a quad to an Oxigraph quad, `None` graph becoming the default graph.
pub fn to_oxigraph_quad(quad: &Quad) -> ox::Quad {
    let predicate = ox::NamedNode::new_unchecked(quad.predicate());
    let object = to_oxigraph_term(quad.object());
    let graph = match quad.graph() {
        Some(graph) => ox::GraphName::NamedNode(ox::NamedNode::new_unchecked(graph)),
        None => ox::GraphName::DefaultGraph,
    };
    match quad.subject() {
        Term::BlankNode(label) => ox::Quad::new(
            ox::BlankNode::new_unchecked(label.as_str()),
            predicate,
            object,
            graph,
        ),
        other => ox::Quad::new(
            ox::NamedNode::new_unchecked(other.as_uri().unwrap_or_default()),
            predicate,
            object,
            graph,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_escapes() {
        let term = Term::literal("say \"hi\"\n\tback\\slash");
        assert_eq!(term.to_string(), r#""say \"hi\"\n\tback\\slash""#);
    }

    #[test]
    fn test_iri_escapes_forbidden_characters() {
        let term = Term::uri("http://ex.org/a b>");
        assert_eq!(term.to_string(), r"<http://ex.org/a\u0020b\u003E>");
    }

    #[test]
    fn test_typed_and_language_literals() {
        assert_eq!(
            Term::Literal(Literal::typed("5", "http://www.w3.org/2001/XMLSchema#int")).to_string(),
            r#""5"^^<http://www.w3.org/2001/XMLSchema#int>"#
        );
        assert_eq!(
            Term::Literal(Literal::lang("hallo", "de-AT")).to_string(),
            r#""hallo"@de-AT"#
        );
    }

    #[test]
    fn test_oxigraph_quad_conversion() {
        let quad = Quad::new(
            Term::blank("b0"),
            "http://ex.org/p",
            Term::Literal(Literal::typed("5", "http://www.w3.org/2001/XMLSchema#int")),
            None,
        )
        .unwrap();
        let converted = to_oxigraph_quad(&quad);
        assert!(converted.graph_name.is_default_graph());
        assert_eq!(converted.predicate.as_str(), "http://ex.org/p");
    }
}
