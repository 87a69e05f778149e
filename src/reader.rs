//! Reader: converts program text into the S-expression model.
//!
//! The grammar is deliberately tiny: an expression is either a parenthesized
//! list of expressions or an atom, a maximal run of letters, digits and
//! `+ - * / = > <`. There is no dotted-pair, quote-shorthand or string syntax.
//! Malformed input is rejected with a [`ParseError`] rather than repaired.

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::take_while1,
    character::complete::{char, multispace0},
    error::ErrorKind,
    multi::many0,
    sequence::{preceded, terminated},
};

use crate::ast::{Value, atom, is_atom_char};
use crate::{Error, MAX_PARSE_DEPTH, ParseError, ParseErrorKind};

/// Convert nom parsing errors to structured parse errors
fn parse_error_from_nom(input: &str, error: nom::Err<nom::error::Error<&str>>) -> ParseError {
    match error {
        nom::Err::Error(e) | nom::Err::Failure(e) => {
            let position = input.len().saturating_sub(e.input.len());
            if e.code == ErrorKind::TooLarge {
                ParseError::with_context(
                    ParseErrorKind::TooDeeplyNested,
                    format!("Expression too deeply nested (max depth: {MAX_PARSE_DEPTH})"),
                    input,
                    position,
                )
            } else if e.input.trim_start().is_empty() {
                ParseError::with_context(
                    ParseErrorKind::Incomplete,
                    "Unexpected end of input",
                    input,
                    position,
                )
            } else {
                ParseError::with_context(
                    ParseErrorKind::InvalidSyntax,
                    format!("Invalid syntax at position {position}"),
                    input,
                    position,
                )
            }
        }
        nom::Err::Incomplete(_) => {
            ParseError::new(ParseErrorKind::Incomplete, "Incomplete input", None, None)
        }
    }
}

/// Parse an atom: a maximal run of alphabet characters
fn parse_atom(input: &str) -> IResult<&str, Value> {
    let (remaining, name) = take_while1(is_atom_char).parse(input)?;
    Ok((remaining, atom(name)))
}

/// Parse a list body up to its matching `)`; `()` reads as nil
fn parse_list(input: &str, depth: usize) -> IResult<&str, Value> {
    let (input, _) = char('(').parse(input)?;
    let (input, elements) = many0(|input| parse_sexpr(input, depth + 1)).parse(input)?;
    let (input, _) = preceded(multispace0, char(')')).parse(input)?;

    Ok((input, Value::list(elements)))
}

/// Parse one S-expression, skipping leading whitespace
fn parse_sexpr(input: &str, depth: usize) -> IResult<&str, Value> {
    if depth >= MAX_PARSE_DEPTH {
        return Err(nom::Err::Failure(nom::error::Error::new(
            input,
            ErrorKind::TooLarge,
        )));
    }
    preceded(
        multispace0,
        alt((|input| parse_list(input, depth), parse_atom)),
    )
    .parse(input)
}

/// Parse a complete program: exactly one S-expression, optionally surrounded by whitespace.
pub fn parse_program(input: &str) -> Result<Value, Error> {
    match terminated(|input| parse_sexpr(input, 0), multispace0).parse(input) {
        Ok(("", value)) => Ok(value),
        Ok((remaining, _)) => Err(Error::ParseError(ParseError::with_context(
            ParseErrorKind::TrailingContent,
            "Unexpected input after the end of the expression",
            input,
            input.len() - remaining.len(),
        ))),
        Err(e) => Err(Error::ParseError(parse_error_from_nom(input, e))),
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ast::{nil, sym, val};

    /// Test result variants for comprehensive parsing tests
    #[derive(Debug)]
    enum ParseTestResult {
        Success(Value),                // Parsing should succeed with this value
        SpecificError(ParseErrorKind), // Parsing should fail with this kind
        AnyError,                      // Parsing should fail (any error)
    }
    use ParseTestResult::*;

    fn success<T: Into<Value>>(value: T) -> ParseTestResult {
        Success(value.into())
    }

    /// Run parse tests, checking that every successful parse survives print -> parse
    fn run_parse_tests(test_cases: Vec<(&str, ParseTestResult)>) {
        for (i, (input, expected)) in test_cases.iter().enumerate() {
            let test_id = format!("Parse test #{}", i + 1);
            let result = parse_program(input);

            match (result, expected) {
                (Ok(actual), Success(expected_val)) => {
                    assert_eq!(actual, *expected_val, "{test_id}: value mismatch");

                    let displayed = format!("{actual}");
                    let reparsed = parse_program(&displayed).unwrap_or_else(|e| {
                        panic!("{test_id}: round-trip parse failed for '{displayed}': {e:?}")
                    });
                    assert_eq!(
                        actual, reparsed,
                        "{test_id}: round-trip mismatch for '{input}'"
                    );
                }
                (Err(_), AnyError) => {}
                (Err(Error::ParseError(err)), SpecificError(kind)) => {
                    assert_eq!(err.kind, *kind, "{test_id}: wrong error kind ({err})");
                }
                (Err(err), SpecificError(kind)) => {
                    panic!("{test_id}: expected parse error {kind:?}, got {err:?}");
                }
                (Ok(actual), AnyError | SpecificError(_)) => {
                    panic!("{test_id}: expected error, got {actual:?}");
                }
                (Err(err), Success(_)) => {
                    panic!("{test_id}: expected success, got error {err:?}");
                }
            }
        }
    }

    #[test]
    fn test_parser_comprehensive() {
        use ParseErrorKind::*;

        let test_cases = vec![
            // ===== ATOMS =====
            ("42", success(42)),
            ("-5", success(-5)),
            ("foo", success(sym("foo"))),
            ("Foo42", success(sym("Foo42"))),
            ("==", success(sym("=="))),
            ("+", success(sym("+"))),
            ("<", success(sym("<"))),
            ("a+b*c/d=e>f<g", success(sym("a+b*c/d=e>f<g"))),
            ("nil", success(nil())),
            ("t", success(sym("t"))),
            // Atoms need not look like identifiers
            ("12abc", success(sym("12abc"))),
            // ===== LISTS =====
            ("()", success(nil())),
            ("(   )", success(nil())),
            ("(42)", success([42])),
            ("(1 2 3)", success([1, 2, 3])),
            ("(+ 1 2)", success(vec![sym("+"), val(1), val(2)])),
            ("((1 2) (3 4))", success([[1, 2], [3, 4]])),
            ("(a (b (c)))", success(vec![sym("a"), val(vec![sym("b"), val([sym("c")])])])),
            ("(quote ())", success(vec![sym("quote"), nil()])),
            // Adjacent lists need no separating whitespace
            ("((a)(b))", success([[sym("a")], [sym("b")]])),
            // ===== WHITESPACE =====
            ("  42  ", success(42)),
            ("\t(a\n b\r\n c)\n", success([sym("a"), sym("b"), sym("c")])),
            ("( 1   2\t\n3 )", success([1, 2, 3])),
            // ===== ERRORS =====
            ("", SpecificError(Incomplete)),
            ("   ", SpecificError(Incomplete)),
            ("(1 2 3", SpecificError(Incomplete)),
            ("((1 2)", SpecificError(Incomplete)),
            (")", SpecificError(InvalidSyntax)),
            ("(a #b)", SpecificError(InvalidSyntax)),
            ("'a", SpecificError(InvalidSyntax)),
            ("(a . b)", SpecificError(InvalidSyntax)),
            ("\"str\"", SpecificError(InvalidSyntax)),
            ("1 2", SpecificError(TrailingContent)),
            ("(1 2))", SpecificError(TrailingContent)),
            ("(+ 1 2) (+ 3 4)", SpecificError(TrailingContent)),
            ("a_b", AnyError),
        ];

        run_parse_tests(test_cases);
    }

    #[test]
    fn test_parser_depth_limits() {
        let under_limit = format!(
            "{}x{}",
            "(".repeat(MAX_PARSE_DEPTH - 1),
            ")".repeat(MAX_PARSE_DEPTH - 1)
        );
        let at_limit = format!(
            "{}x{}",
            "(".repeat(MAX_PARSE_DEPTH),
            ")".repeat(MAX_PARSE_DEPTH)
        );

        assert!(
            parse_program(&under_limit).is_ok(),
            "Parens just under depth limit should parse successfully"
        );
        run_parse_tests(vec![(
            at_limit.as_str(),
            SpecificError(ParseErrorKind::TooDeeplyNested),
        )]);
    }

    #[test]
    fn test_parse_error_context() {
        let err = parse_program("(foo bar @baz)").unwrap_err();
        let Error::ParseError(parse_err) = err else {
            panic!("expected ParseError");
        };
        assert_eq!(parse_err.found.as_deref(), Some("@"));
        assert!(parse_err.context.unwrap().contains("@baz"));

        let message = format!("{}", Error::ParseError(parse_program_err("(a")));
        assert!(message.starts_with("ParseError: Unexpected end of input"));
    }

    fn parse_program_err(input: &str) -> ParseError {
        match parse_program(input) {
            Err(Error::ParseError(err)) => err,
            other => panic!("expected parse error for '{input}', got {other:?}"),
        }
    }

    #[test]
    fn test_long_flat_list() {
        let source = format!("({})", "x ".repeat(100_000));
        let parsed = parse_program(&source).unwrap();
        assert_eq!(parsed.list_to_vec().unwrap().len(), 100_000);
    }
}
