//! Pretty printing for function bodies.
//!
//! Human-readable output used in debugging and in test failure messages.

use std::fmt::Write;

use crate::ir::*;

/// Pretty print a single function
pub fn pretty_print_function(func: &Function) -> String {
    let mut out = String::new();
    let mut printer = PrettyPrinter::new(&mut out, func);
    printer.print_function();
    out
}

/// Pretty print every function of a program in declaration order
pub fn pretty_print(program: &Program) -> String {
    let mut out = String::new();
    for func in program.functions.values() {
        out.push_str(&pretty_print_function(func));
        out.push('\n');
    }
    out
}

struct PrettyPrinter<'a> {
    out: &'a mut String,
    func: &'a Function,
    indent: usize,
}

impl<'a> PrettyPrinter<'a> {
    fn new(out: &'a mut String, func: &'a Function) -> Self {
        Self {
            out,
            func,
            indent: 0,
        }
    }

    fn writeln(&mut self, s: &str) {
        for _ in 0..self.indent {
            self.out.push(' ');
        }
        self.out.push_str(s);
        self.out.push('\n');
    }

    fn print_function(&mut self) {
        let func = self.func;
        let params: Vec<String> = func
            .params
            .iter()
            .map(|&p| {
                let decl = func.binding(p);
                match decl.override_mode.keyword() {
                    Some(kw) => format!("{} {}: {}", kw, decl.name, decl.ty),
                    None => format!("{}: {}", decl.name, decl.ty),
                }
            })
            .collect();
        let prefix = if func.is_async { "async fn" } else { "fn" };
        self.writeln(&format!("{} {}({}) {{", prefix, func.name, params.join(", ")));
        self.indent += 4;

        for (index, decl) in func.bindings.iter().enumerate() {
            let kind = match decl.kind {
                BindingKind::Param => "param",
                BindingKind::Let => "let",
                BindingKind::Var => "var",
            };
            self.writeln(&format!(
                "{} _{}: {} // {} in {}",
                kind, index, decl.ty, decl.name, decl.region
            ));
        }

        for region in &func.regions {
            let mut line = format!("{} {}", region.kind.keyword(), region.id);
            if let Some(parent) = region.parent {
                let _ = write!(line, " in {}", parent);
            }
            if let Some(exit) = region.exit {
                let _ = write!(line, " exits to {}", exit);
            }
            self.writeln(&line);
        }

        for block in &func.blocks {
            self.out.push('\n');
            self.writeln(&format!("{} ({}):", block.id, block.region));
            self.indent += 4;
            for stmt in &block.statements {
                let text = format_statement(&stmt.kind);
                self.writeln(&text);
            }
            match &block.terminator {
                Some(term) => {
                    let text = format_terminator(&term.kind);
                    self.writeln(&text);
                }
                None => self.writeln("<unterminated>"),
            }
            self.indent -= 4;
        }

        self.indent -= 4;
        self.writeln("}");
    }
}

pub(crate) fn format_binding_ref(r: &BindingRef) -> String {
    match r.explicit.keyword() {
        Some(kw) => format!("{} {}", kw, r.binding),
        None => format!("{}", r.binding),
    }
}

/// Render an operand as it appears in the IR dump.
pub fn format_operand(op: &Operand) -> String {
    match op {
        Operand::Binding(r) => format_binding_ref(r),
        Operand::Field(r, field) => format!("{}.{}", format_binding_ref(r), field),
        Operand::Constant(c) => c.to_string(),
    }
}

fn format_operands<'o>(ops: impl IntoIterator<Item = &'o Operand>) -> String {
    ops.into_iter()
        .map(format_operand)
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_callee(callee: &Callee) -> String {
    match callee {
        Callee::Function(id) => id.to_string(),
        Callee::Extern(name) => format!("extern {}", name),
        Callee::Constructor(name) => name.to_string(),
    }
}

pub fn format_rvalue(value: &Rvalue) -> String {
    match value {
        Rvalue::Use(op) => format_operand(op),
        Rvalue::Call { callee, args } => {
            format!("{}({})", format_callee(callee), format_operands(args))
        }
        Rvalue::MethodCall {
            callee,
            receiver,
            args,
        } => format!(
            "{}.{}({})",
            format_operand(receiver),
            format_callee(callee),
            format_operands(args)
        ),
        Rvalue::Alloc { alloc, args } => format!("{}({})", alloc, format_operands(args)),
        Rvalue::Ref { operand, mutable } => {
            if *mutable {
                format!("&mut {}", format_operand(operand))
            } else {
                format!("&{}", format_operand(operand))
            }
        }
        Rvalue::Closure { function, captures } => match function {
            Some(f) => format!("closure {}[{}]", f, format_operands(captures)),
            None => format!("closure [{}]", format_operands(captures)),
        },
        Rvalue::BinaryOp(op, lhs, rhs) => format!(
            "{} {} {}",
            format_operand(lhs),
            op.symbol(),
            format_operand(rhs)
        ),
    }
}

pub fn format_statement(kind: &StatementKind) -> String {
    match kind {
        StatementKind::Assign { dest, value } => format!("{} = {}", dest, format_rvalue(value)),
        StatementKind::FieldWrite {
            target,
            field,
            value,
        } => format!(
            "{}.{} = {}",
            format_binding_ref(target),
            field,
            format_rvalue(value)
        ),
        StatementKind::Eval(value) => format_rvalue(value),
        StatementKind::Suspend { kind, captures } => {
            let kw = match kind {
                SuspendKind::Await => "await",
                SuspendKind::Yield => "yield",
            };
            format!("{} [{}]", kw, format_operands(captures))
        }
        StatementKind::Send { channel, value } => {
            format!("send {} <- {}", format_operand(channel), format_operand(value))
        }
    }
}

pub fn format_terminator(kind: &TerminatorKind) -> String {
    match kind {
        TerminatorKind::Goto { target } => format!("goto {}", target),
        TerminatorKind::Branch {
            cond,
            then,
            otherwise,
        } => format!(
            "branch {} -> [{}, {}]",
            format_operand(cond),
            then,
            otherwise
        ),
        TerminatorKind::Return(Some(value)) => format!("return {}", format_operand(value)),
        TerminatorKind::Return(None) => "return".to_string(),
        TerminatorKind::Unreachable => "unreachable".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::FunctionBuilder;

    #[test]
    fn test_pretty_print_wrapper() {
        let mut b = FunctionBuilder::new(FunctionId(0), "h", Span::dummy());
        let x = b.param("x", Ty::named("Data"), Span::dummy());
        let w = b.let_binding("w", Ty::named("Wrapper"), Span::dummy());
        b.assign(
            w,
            Rvalue::Call {
                callee: Callee::Constructor("Wrapper".into()),
                args: vec![Operand::moved(x, Span::dummy())],
            },
            Span::dummy(),
        );
        b.ret(Some(Operand::binding(w, Span::dummy())), Span::dummy());
        let text = pretty_print_function(&b.finish());

        assert!(text.starts_with("fn h(x: Data) {"));
        assert!(text.contains("_1 = Wrapper(move _0)"));
        assert!(text.contains("return _1"));
        assert!(text.contains("function body r0"));
    }

    #[test]
    fn test_format_terminators() {
        assert_eq!(format_terminator(&TerminatorKind::Return(None)), "return");
        assert_eq!(
            format_terminator(&TerminatorKind::Goto { target: BlockId(3) }),
            "goto bb3"
        );
    }
}
