//! Diagnostic Reporter.
//!
//! A stateless translation from [`OwnershipError`] and [`OptimizationHint`]
//! values into structured [`Diagnostic`]s: code, category, primary and
//! secondary locations, an explanation, and suggested fix text. Fixes
//! only ever add override keywords or restructure code; none of them
//! relax a safety rule.

use std::path::Path;
use verso_diagnostics::span::SourceSpan;
use verso_diagnostics::suggestion::{Suggestion, SuggestionEdit};
use verso_diagnostics::Diagnostic;
use verso_ir::Span;

use crate::error::{EscapeRoute, EscapeSubject, OwnershipError};
use crate::hints::OptimizationHint;
use crate::mode::OwnershipMode;

/// Stable code for each error category.
pub fn error_code(error: &OwnershipError) -> &'static str {
    match error {
        OwnershipError::UseAfterMove { .. } => "E2001",
        OwnershipError::ConflictingBorrow { .. } => "E2002",
        OwnershipError::RegionEscape { .. } => "E2003",
        OwnershipError::UnresolvableRecursiveSignature { .. } => "E2004",
        OwnershipError::OverrideConflict { .. } => "E2005",
        OwnershipError::MalformedFunction { .. } => "E9001",
    }
}

fn at(file: &Path, span: Span) -> SourceSpan {
    SourceSpan::new(file, span.start, span.end)
}

fn keyword(mode: OwnershipMode) -> &'static str {
    mode.keyword().unwrap_or("borrow")
}

/// Translate one ownership error into a diagnostic against `file`.
pub fn to_diagnostic(error: &OwnershipError, file: &Path) -> Diagnostic {
    let base = Diagnostic::error(error_code(error), error.category(), error.to_string());

    match error {
        OwnershipError::UseAfterMove {
            binding,
            use_span,
            move_span,
            move_required,
            ..
        } => {
            let moved = at(file, *move_span);
            let diagnostic = base
                .with_primary(at(file, *use_span), "value used here after move")
                .with_secondary(moved.clone(), "value moved here")
                .with_explanation(format!(
                    "`{}` is consumed by the move, so no path that follows it may use `{}` again",
                    binding, binding
                ));
            // A borrow only fits where the operation itself never needed ownership
            if *move_required < OwnershipMode::Moved {
                diagnostic
                    .with_suggestion(
                        Suggestion::maybe_incorrect(
                            "insert `borrow` at the move so the value stays usable",
                        )
                        .with_edit(SuggestionEdit::insert_before(&moved, "borrow ")),
                    )
                    .with_suggestion(Suggestion::educational(format!(
                        "alternatively, re-initialize `{}` before this use",
                        binding
                    )))
            } else {
                diagnostic
                    .with_suggestion(Suggestion::educational(format!(
                        "re-initialize `{}` before this use",
                        binding
                    )))
                    .with_suggestion(Suggestion::educational(format!(
                        "or pass a copy of `{}` to the consuming operation",
                        binding
                    )))
            }
        }

        OwnershipError::ConflictingBorrow {
            binding,
            span,
            requested,
            existing_span,
            existing,
            ..
        } => {
            let fix = if *existing == OwnershipMode::Moved {
                Suggestion::maybe_incorrect("insert `borrow` before the consuming argument")
                    .with_edit(SuggestionEdit::insert_before(&at(file, *existing_span), "borrow "))
            } else {
                Suggestion::educational(format!(
                    "finish using the {} of `{}` before this use",
                    existing, binding
                ))
            };
            base.with_primary(at(file, *span), format!("{} occurs here", requested))
                .with_secondary(at(file, *existing_span), format!("{} is still active here", existing))
                .with_explanation(format!(
                    "an exclusive access to `{}` may not overlap with any other access to it",
                    binding
                ))
                .with_suggestion(fix)
        }

        OwnershipError::RegionEscape {
            subject,
            route,
            escape_span,
            origin_span,
        } => {
            let origin = match subject {
                EscapeSubject::Allocation(_) => "allocated here",
                EscapeSubject::Local(_) => "borrowed here",
            };
            let label = match route {
                EscapeRoute::Return => "reference returned here",
                EscapeRoute::Suspension => "reference crosses a suspension point here",
                EscapeRoute::CallerStore => "reference stored into caller data here",
            };
            base.with_primary(at(file, *escape_span), label)
                .with_secondary(at(file, *origin_span), origin)
                .with_explanation(
                    "the referenced value is freed when its scope ends, before the reference is used",
                )
                .with_suggestion(Suggestion::maybe_incorrect(
                    "transfer the value itself with `move` instead of a reference",
                ))
        }

        OwnershipError::UnresolvableRecursiveSignature {
            function,
            cycle,
            span,
            ..
        } => {
            let members: Vec<String> = cycle.iter().map(|f| format!("`{}`", f)).collect();
            base.with_primary(at(file, *span), "signature does not stabilize")
                .with_explanation(format!(
                    "parameter modes of the recursive cycle {} keep growing",
                    members.join(" -> ")
                ))
                .with_suggestion(Suggestion::educational(format!(
                    "add explicit `borrow` or `move` keywords to the parameters of `{}`",
                    function
                )))
        }

        OwnershipError::OverrideConflict {
            keyword: written,
            on_declaration,
            required,
            use_span,
            override_span,
            ..
        } => {
            let place = if *on_declaration { "the parameter" } else { "this use" };
            let written = written.keyword().unwrap_or("none");
            let mut diagnostic =
                base.with_primary(at(file, *use_span), format!("this use requires {}", required));
            if override_span != use_span {
                diagnostic = diagnostic
                    .with_secondary(at(file, *override_span), format!("`{}` written here", written));
            }
            diagnostic
                .with_explanation("explicit keywords are fixed points and are never upgraded implicitly")
                .with_suggestion(Suggestion::maybe_incorrect(format!(
                    "change `{}` to `{}` at {}",
                    written,
                    keyword(*required),
                    place
                )))
        }

        OwnershipError::MalformedFunction { span, .. } => base
            .with_primary(at(file, *span), "function skipped")
            .with_explanation("the lowered body failed structural validation"),
    }
}

/// Translate an optimization hint into a warning.
pub fn hint_to_diagnostic(hint: &OptimizationHint, file: &Path) -> Diagnostic {
    let base = Diagnostic::warning(hint.code(), hint.category(), hint.message());
    let span = at(file, hint.span());
    match hint {
        OptimizationHint::UnneededMoveOverride { needed, .. } => base
            .with_primary(span, "declared `move` here")
            .with_suggestion(Suggestion::maybe_incorrect(format!(
                "drop `move`; callers can keep their value because {} is enough",
                needed
            ))),
        OptimizationHint::EmptyRegion { kind, .. } => base
            .with_primary(span, format!("empty {}", kind.keyword()))
            .with_suggestion(Suggestion::educational("merge it into the enclosing scope")),
        OptimizationHint::RegionTooDeep { .. } => base
            .with_primary(span, "nested too deep")
            .with_suggestion(Suggestion::educational("flatten the innermost regions")),
    }
}
