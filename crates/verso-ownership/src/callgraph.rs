//! Call graph and analysis scheduling.
//!
//! Functions are grouped into strongly connected components. Each
//! component is one analysis unit: a single function, or a recursive cycle
//! solved together by fixed-point iteration. Units are ordered so that
//! every callee's unit comes before its callers', and grouped into levels
//! whose members only depend on earlier levels and can run in parallel.

use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use verso_ir::{Callee, Function, FunctionId, Program, Rvalue, StatementKind};

/// A group of functions analyzed together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisUnit {
    /// Members in program order
    pub functions: Vec<FunctionId>,
    /// A cycle, or a function that calls itself
    pub recursive: bool,
    /// Longest chain of callee units below this one
    pub level: usize,
}

/// Direct call edges between defined functions.
#[derive(Debug, Clone, Default)]
pub struct CallGraph {
    edges: IndexMap<FunctionId, Vec<FunctionId>>,
}

impl CallGraph {
    pub fn build(program: &Program) -> Self {
        let mut edges = IndexMap::new();
        for (id, func) in &program.functions {
            let mut callees: Vec<FunctionId> = direct_callees(func)
                .into_iter()
                .filter(|c| program.functions.contains_key(c))
                .collect();
            callees.sort();
            callees.dedup();
            edges.insert(*id, callees);
        }
        Self { edges }
    }

    pub fn callees(&self, function: FunctionId) -> &[FunctionId] {
        self.edges.get(&function).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn calls_itself(&self, function: FunctionId) -> bool {
        self.callees(function).contains(&function)
    }

    /// Strongly connected components, callees before callers.
    pub fn units(&self) -> Vec<AnalysisUnit> {
        let components = Tarjan::new(self).run();
        let mut unit_of: FxHashMap<FunctionId, usize> = FxHashMap::default();
        for (index, members) in components.iter().enumerate() {
            for f in members {
                unit_of.insert(*f, index);
            }
        }

        let mut units: Vec<AnalysisUnit> = Vec::with_capacity(components.len());
        for (index, mut members) in components.into_iter().enumerate() {
            // Tarjan emits a component only after every component it reaches
            let level = members
                .iter()
                .flat_map(|f| self.callees(*f))
                .filter_map(|c| unit_of.get(c))
                .filter(|u| **u != index)
                .map(|u| units[*u].level + 1)
                .max()
                .unwrap_or(0);
            let recursive = members.len() > 1 || self.calls_itself(members[0]);
            members.sort_by_key(|f| self.edges.get_index_of(f));
            units.push(AnalysisUnit {
                functions: members,
                recursive,
                level,
            });
        }
        units
    }

    /// Units grouped by level; every unit depends only on earlier levels.
    pub fn levels(&self) -> Vec<Vec<AnalysisUnit>> {
        let units = self.units();
        let depth = units.iter().map(|u| u.level + 1).max().unwrap_or(0);
        let mut levels = vec![Vec::new(); depth];
        for unit in units {
            levels[unit.level].push(unit);
        }
        levels
    }
}

/// Local functions referenced by calls and closure creation in `func`.
pub fn direct_callees(func: &Function) -> Vec<FunctionId> {
    let mut callees = Vec::new();
    let mut visit = |value: &Rvalue| match value {
        Rvalue::Call {
            callee: Callee::Function(f),
            ..
        }
        | Rvalue::MethodCall {
            callee: Callee::Function(f),
            ..
        } => callees.push(*f),
        Rvalue::Closure {
            function: Some(f), ..
        } => callees.push(*f),
        _ => {}
    };
    for block in &func.blocks {
        for stmt in &block.statements {
            match &stmt.kind {
                StatementKind::Assign { value, .. }
                | StatementKind::FieldWrite { value, .. }
                | StatementKind::Eval(value) => visit(value),
                StatementKind::Suspend { .. } | StatementKind::Send { .. } => {}
            }
        }
    }
    callees
}

/// Tarjan's strongly connected components over the call graph.
struct Tarjan<'g> {
    graph: &'g CallGraph,
    index: FxHashMap<FunctionId, usize>,
    lowlink: FxHashMap<FunctionId, usize>,
    on_stack: FxHashMap<FunctionId, bool>,
    stack: Vec<FunctionId>,
    next: usize,
    components: Vec<Vec<FunctionId>>,
}

impl<'g> Tarjan<'g> {
    fn new(graph: &'g CallGraph) -> Self {
        Self {
            graph,
            index: FxHashMap::default(),
            lowlink: FxHashMap::default(),
            on_stack: FxHashMap::default(),
            stack: Vec::new(),
            next: 0,
            components: Vec::new(),
        }
    }

    fn run(mut self) -> Vec<Vec<FunctionId>> {
        let nodes: Vec<FunctionId> = self.graph.edges.keys().copied().collect();
        for node in nodes {
            if !self.index.contains_key(&node) {
                self.connect(node);
            }
        }
        self.components
    }

    fn connect(&mut self, node: FunctionId) {
        self.index.insert(node, self.next);
        self.lowlink.insert(node, self.next);
        self.next += 1;
        self.stack.push(node);
        self.on_stack.insert(node, true);

        for &callee in self.graph.callees(node) {
            if !self.index.contains_key(&callee) {
                self.connect(callee);
                let low = self.lowlink[&node].min(self.lowlink[&callee]);
                self.lowlink.insert(node, low);
            } else if self.on_stack.get(&callee).copied().unwrap_or(false) {
                let low = self.lowlink[&node].min(self.index[&callee]);
                self.lowlink.insert(node, low);
            }
        }

        if self.lowlink[&node] == self.index[&node] {
            let mut component = Vec::new();
            while let Some(member) = self.stack.pop() {
                self.on_stack.insert(member, false);
                component.push(member);
                if member == node {
                    break;
                }
            }
            self.components.push(component);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use verso_ir::{FunctionBuilder, Operand, Span};

    fn calling(program: &mut Program, id: FunctionId, name: &str, callees: &[FunctionId]) {
        let mut b = FunctionBuilder::new(id, name, Span::dummy());
        for callee in callees {
            b.eval(
                Rvalue::Call {
                    callee: Callee::Function(*callee),
                    args: vec![Operand::int(0)],
                },
                Span::dummy(),
            );
        }
        b.ret(None, Span::dummy());
        program.define(b.finish());
    }

    #[test]
    fn test_chain_levels() {
        let mut program = Program::new("test.vs");
        let main = program.declare_function("main");
        let helper = program.declare_function("helper");
        let leaf = program.declare_function("leaf");
        calling(&mut program, main, "main", &[helper]);
        calling(&mut program, helper, "helper", &[leaf]);
        calling(&mut program, leaf, "leaf", &[]);

        let graph = CallGraph::build(&program);
        let levels = graph.levels();
        assert_eq!(levels.len(), 3);
        assert_eq!(levels[0][0].functions, vec![leaf]);
        assert_eq!(levels[2][0].functions, vec![main]);
        assert!(levels.iter().flatten().all(|u| !u.recursive));
    }

    #[test]
    fn test_mutual_recursion_is_one_unit() {
        let mut program = Program::new("test.vs");
        let even = program.declare_function("even");
        let odd = program.declare_function("odd");
        let main = program.declare_function("main");
        calling(&mut program, even, "even", &[odd]);
        calling(&mut program, odd, "odd", &[even]);
        calling(&mut program, main, "main", &[even]);

        let units = CallGraph::build(&program).units();
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].functions, vec![even, odd]);
        assert!(units[0].recursive);
        assert_eq!(units[1].functions, vec![main]);
        assert_eq!(units[1].level, 1);
    }

    #[test]
    fn test_self_recursion_flagged() {
        let mut program = Program::new("test.vs");
        let fact = program.declare_function("fact");
        calling(&mut program, fact, "fact", &[fact]);
        let units = CallGraph::build(&program).units();
        assert!(units[0].recursive);
        assert_eq!(units[0].level, 0);
    }

    #[test]
    fn test_independent_functions_share_level() {
        let mut program = Program::new("test.vs");
        let a = program.declare_function("a");
        let b = program.declare_function("b");
        calling(&mut program, a, "a", &[]);
        calling(&mut program, b, "b", &[]);
        let levels = CallGraph::build(&program).levels();
        assert_eq!(levels.len(), 1);
        assert_eq!(levels[0].len(), 2);
    }
}
