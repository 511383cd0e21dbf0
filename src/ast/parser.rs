//! Tolerant JavaScript parsing with preprocessing and mode fallback.
//!
//! Parse attempts run `module` then `script` source types; oxc recovers from
//! most errors and still produces a program, so the final "loose" mode means
//! accepting a program that carries residual diagnostics. Only a panicked
//! parse in every mode counts as failure.

use oxc_allocator::Allocator;
use oxc_ast::ast::Program;
use oxc_parser::Parser;
use oxc_span::SourceType;
use regex::Regex;
use std::sync::LazyLock;
use tracing::trace;

/// Which parse attempt produced the program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    Module,
    Script,
    /// A program recovered despite residual parse errors.
    Loose,
}

/// Structured parse failure with a best-effort source location.
#[derive(Debug, Clone)]
pub struct ParseFailure {
    pub message: String,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

static ERROR_LOCATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\((\d+):(\d+)\)").unwrap());

impl ParseFailure {
    /// Build from an error message, pulling `(line:column)` out of the text
    /// when present.
    pub fn from_message(message: String) -> Self {
        let (line, column) = ERROR_LOCATION_RE
            .captures(&message)
            .map(|caps| {
                (
                    caps.get(1).and_then(|m| m.as_str().parse().ok()),
                    caps.get(2).and_then(|m| m.as_str().parse().ok()),
                )
            })
            .unwrap_or((None, None));

        Self {
            message,
            line,
            column,
        }
    }
}

/// Strip a UTF-8 BOM, normalize CRLF to LF, and drop zero-width characters.
///
/// JSX and TypeScript constructs need no elision here: the parser is run
/// with both syntaxes enabled.
pub fn preprocess(source: &str) -> String {
    let source = source.strip_prefix('\u{feff}').unwrap_or(source);

    source
        .replace("\r\n", "\n")
        .chars()
        .filter(|c| !matches!(c, '\u{200b}' | '\u{200c}' | '\u{200d}' | '\u{2060}'))
        .collect()
}

/// Parse preprocessed source, attempting `module` then `script`. Returns the
/// program, the mode that produced it, and any residual diagnostics.
pub fn parse_program<'a>(
    allocator: &'a Allocator,
    source: &'a str,
) -> Result<(Program<'a>, ParseMode, Vec<String>), ParseFailure> {
    let module_type = SourceType::default()
        .with_module(true)
        .with_jsx(true)
        .with_typescript(true);
    let script_type = SourceType::default()
        .with_module(false)
        .with_jsx(true)
        .with_typescript(true);

    // First pass: module semantics.
    let module_result = Parser::new(allocator, source, module_type).parse();
    if !module_result.panicked && module_result.errors.is_empty() {
        return Ok((module_result.program, ParseMode::Module, Vec::new()));
    }
    let module_errors: Vec<String> = module_result
        .errors
        .iter()
        .map(|e| e.to_string())
        .collect();
    let module_panicked = module_result.panicked;
    let module_program = module_result.program;

    // Second pass: script semantics.
    let script_result = Parser::new(allocator, source, script_type).parse();
    if !script_result.panicked && script_result.errors.is_empty() {
        return Ok((script_result.program, ParseMode::Script, Vec::new()));
    }
    let script_errors: Vec<String> = script_result
        .errors
        .iter()
        .map(|e| e.to_string())
        .collect();
    let script_panicked = script_result.panicked;
    let script_program = script_result.program;

    // Loose: accept whichever non-panicked program carries fewer errors.
    let pick_module = match (module_panicked, script_panicked) {
        (false, false) => module_errors.len() <= script_errors.len(),
        (false, true) => true,
        (true, false) => false,
        (true, true) => {
            let message = script_errors
                .first()
                .or(module_errors.first())
                .cloned()
                .unwrap_or_else(|| "parser panicked with no diagnostics".to_string());
            return Err(ParseFailure::from_message(message));
        }
    };

    let (program, errors) = if pick_module {
        (module_program, module_errors)
    } else {
        (script_program, script_errors)
    };

    trace!(
        "loose parse accepted with {} residual diagnostics",
        errors.len()
    );
    Ok((program, ParseMode::Loose, errors))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preprocess_strips_bom_and_zero_width() {
        let src = "\u{feff}const a\u{200b} = 1;\r\nconst b = 2;";
        let cleaned = preprocess(src);
        assert_eq!(cleaned, "const a = 1;\nconst b = 2;");
    }

    #[test]
    fn test_parse_clean_module() {
        let allocator = Allocator::default();
        let src = "import x from 'y'; export default x;";
        let (_, mode, errors) = parse_program(&allocator, src).unwrap();
        assert_eq!(mode, ParseMode::Module);
        assert!(errors.is_empty());
    }

    #[test]
    fn test_parse_script_fallback() {
        let allocator = Allocator::default();
        // `with` is forbidden in module (strict) code but legal in scripts.
        let src = "with (window) { console.log(location); }";
        let (_, mode, _) = parse_program(&allocator, src).unwrap();
        assert!(mode == ParseMode::Script || mode == ParseMode::Loose);
    }

    #[test]
    fn test_parse_failure_location_extraction() {
        let failure =
            ParseFailure::from_message("Unexpected token (12:34) while parsing".to_string());
        assert_eq!(failure.line, Some(12));
        assert_eq!(failure.column, Some(34));

        let bare = ParseFailure::from_message("boom".to_string());
        assert_eq!(bare.line, None);
    }

    #[test]
    fn test_broken_source_recovers_or_fails_cleanly() {
        let allocator = Allocator::default();
        let src = "function ( {{{";
        match parse_program(&allocator, src) {
            Ok((_, mode, errors)) => {
                assert_eq!(mode, ParseMode::Loose);
                assert!(!errors.is_empty());
            }
            Err(failure) => assert!(!failure.message.is_empty()),
        };
    }
}
