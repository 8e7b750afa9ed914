//! Rendering batches of diagnostics and looking up their codes.

use pretty_assertions::assert_eq;
use termcolor::Buffer;
use verso_diagnostics::render::{render_to_string, RenderConfig, SourceCache, TerminalRenderer};
use verso_diagnostics::span::SourceSpan;
use verso_diagnostics::suggestion::{Suggestion, SuggestionEdit};
use verso_diagnostics::{Diagnostic, DiagnosticError, ErrorCodeRegistry, Severity};

fn use_after_move() -> Diagnostic {
    let moved = SourceSpan::new("main.vs", 16, 17);
    Diagnostic::error("E2001", "use-after-move", "use of moved value `a`")
        .with_primary(SourceSpan::new("main.vs", 25, 26), "value used here after move")
        .with_secondary(moved.clone(), "value moved here")
        .with_explanation("`a` is consumed")
        .with_suggestion(
            Suggestion::maybe_incorrect("insert `borrow` at the move")
                .with_edit(SuggestionEdit::insert_before(&moved, "borrow ")),
        )
}

#[test]
fn test_render_shows_fixed_line_for_suggestion() {
    let mut cache = SourceCache::new();
    cache.add_source("main.vs", "let b = Wrapper(a)\nPrint(a)\n");

    let text = render_to_string(&[use_after_move()], &cache);
    let expected = "\
error[E2001]: use of moved value `a`
  --> main.vs:2:7
  |
2 | Print(a)
  |       ^ value used here after move
  |
1 | let b = Wrapper(a)
  |                 - value moved here
   = `a` is consumed
   = help: consider: insert `borrow` at the move
     | let b = Wrapper(borrow a)

error: ownership analysis failed with 1 error
";
    assert_eq!(text, expected);
}

#[test]
fn test_render_without_source_falls_back_to_offsets() {
    let diag = Diagnostic::warning("W2101", "unnecessary-move", "`move` is stronger than needed")
        .with_primary(SourceSpan::new("other.vs", 3, 9), "only read here")
        .with_explanation("the value is never consumed");

    let text = render_to_string(&[diag.clone()], &SourceCache::new());
    let expected = "\
warning[W2101]: `move` is stronger than needed
  --> other.vs:3..9
   | only read here (other.vs:3..9)
   = the value is never consumed

warning: 1 warning emitted
";
    assert_eq!(text, expected);

    // Quiet settings drop the trailer and the summary
    let config = RenderConfig {
        show_explanation: false,
        show_summary: false,
    };
    let mut renderer = TerminalRenderer::new(Buffer::no_color(), config);
    renderer.render_all(&[diag], &SourceCache::new()).unwrap();
    let quiet = String::from_utf8(renderer.into_inner().into_inner()).unwrap();
    assert!(!quiet.contains("never consumed"));
    assert!(!quiet.contains("emitted"));
}

#[test]
fn test_errors_outweigh_warnings_in_summary() {
    let warning = Diagnostic::warning("W2102", "empty-region", "region holds no allocations");
    let text = render_to_string(&[warning, use_after_move()], &SourceCache::new());
    assert!(text.ends_with("error: ownership analysis failed with 1 error\n"));
}

#[test]
fn test_registry_covers_every_reported_code() {
    let registry = ErrorCodeRegistry::with_ownership_codes();
    for code in ["E2001", "E2002", "E2003", "E2004", "E2005", "E9001"] {
        let info = registry.get(code).unwrap();
        assert_eq!(info.severity, Severity::Error);
    }
    for code in ["W2101", "W2102", "W2103"] {
        assert_eq!(registry.get(code).unwrap().severity, Severity::Warning);
    }

    let codes: Vec<&str> = registry.all_codes().map(|info| info.code.as_str()).collect();
    let mut sorted = codes.clone();
    sorted.sort();
    assert_eq!(codes, sorted);
}

#[test]
fn test_registry_rejects_malformed_codes() {
    let mut registry = ErrorCodeRegistry::new();
    for bad in ["2001", "X2001", "E201", "E20a1"] {
        assert!(matches!(
            registry.register(bad, "bad"),
            Err(DiagnosticError::InvalidErrorCode(code)) if code == bad
        ));
    }
    registry.register("W2999", "custom lint").unwrap();
    assert_eq!(registry.get("W2999").unwrap().description, "custom lint");
    assert_eq!(registry.all_codes().count(), 1);
}
