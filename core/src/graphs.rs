//! Relationship graphs of one binary.
//!
//! Three directed graphs over interned class symbols: invocation (edges
//! annotated with caller/callee descriptor pairs and call counts),
//! interface implementation, and superclass inheritance. Edges whose
//! target is not defined in the binary go to a separate ghost multigraph,
//! so the matcher can recognize that an unmatched app neighbor corresponds
//! to a stripped library class.

use ahash::{AHashMap, AHashSet};
use petgraph::graphmap::DiGraphMap;

use libsift_matcher::MethodCall;
use libsift_profile::{ClassTables, SdkClasses};

use crate::interner::{Interner, Sym};

/// Which of the three relationship graphs an edge belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    Call,
    Interface,
    Superclass,
}

/// `(caller_descriptor, callee_descriptor, call_count)` per invocation
/// edge.
pub type CallMethods = Vec<(String, String, u32)>;

/// One ghost edge: the target class is not defined in this binary.
#[derive(Debug, Clone)]
pub struct GhostEdge {
    pub target: Sym,
    pub kind: RelationKind,

    /// Caller/callee descriptor pairs, call edges only.
    pub methods: Vec<(String, String)>,
}

/// Ghost multigraph keyed by source class.
#[derive(Debug, Default)]
pub struct GhostGraph {
    edges: AHashMap<Sym, Vec<GhostEdge>>,
}

impl GhostGraph {
    /// Records a ghost edge. Rediscovering a call edge merges its method
    /// pairs; rediscovering an interface or superclass edge is a no-op.
    fn add(&mut self, source: Sym, target: Sym, kind: RelationKind, methods: Vec<(String, String)>) {
        let edges = self.edges.entry(source).or_default();

        let mut methods = methods;
        if let Some(at) = edges
            .iter()
            .position(|edge| edge.target == target && edge.kind == kind)
        {
            if kind != RelationKind::Call {
                return;
            }
            let mut merged = edges.remove(at).methods;
            merged.append(&mut methods);
            methods = merged;
        }

        edges.push(GhostEdge {
            target,
            kind,
            methods,
        });
    }

    pub fn out_edges(&self, source: Sym) -> &[GhostEdge] {
        self.edges.get(&source).map_or(&[], Vec::as_slice)
    }

    pub fn contains(&self, source: Sym) -> bool {
        self.edges.contains_key(&source)
    }
}

/// The three graphs plus ghosts, self-contained with their interner.
#[derive(Debug)]
pub struct RelationGraphs {
    pub interner: Interner,
    pub call: DiGraphMap<Sym, CallMethods>,
    pub interface: DiGraphMap<Sym, ()>,
    pub superclass: DiGraphMap<Sym, ()>,
    pub ghost: GhostGraph,
}

impl RelationGraphs {
    /// Builds all graphs from a profile's tables.
    ///
    /// Ghost eligibility depends on the repackaging assumption: with
    /// repackaging, any undefined non-SDK target is a ghost; without it,
    /// the target's package must lie under some defined class's package.
    pub fn build(tables: &ClassTables, sdk: &SdkClasses, repackage: bool) -> Self {
        let defined: AHashSet<&str> = tables.class_names().collect();

        let mut graphs = Self {
            interner: Interner::new(),
            call: DiGraphMap::new(),
            interface: DiGraphMap::new(),
            superclass: DiGraphMap::new(),
            ghost: GhostGraph::default(),
        };

        for (class_name, xrefs) in &tables.classes_xref_tos {
            for (xref, &count) in xrefs {
                let mut parts = xref.splitn(3, "->");
                let (Some(caller_desc), Some(callee_class), Some(callee_desc)) =
                    (parts.next(), parts.next(), parts.next())
                else {
                    log::warn!("skipping malformed xref of {}: {}", class_name, xref);
                    continue;
                };

                // The parser occasionally reports array-typed callees.
                let callee_class = callee_class.strip_prefix('[').unwrap_or(callee_class);

                let source = graphs.interner.intern(class_name);
                let target = graphs.interner.intern(callee_class);

                if is_ghost(callee_class, &defined, sdk, repackage) {
                    graphs.ghost.add(
                        source,
                        target,
                        RelationKind::Call,
                        vec![(caller_desc.to_owned(), callee_desc.to_owned())],
                    );
                }

                if !graphs.call.contains_edge(source, target) {
                    graphs.call.add_edge(source, target, CallMethods::new());
                }
                graphs
                    .call
                    .edge_weight_mut(source, target)
                    .expect("edge just ensured")
                    .push((caller_desc.to_owned(), callee_desc.to_owned(), count));
            }
        }

        for (class_name, interfaces) in &tables.classes_interfaces {
            for interface in interfaces {
                let source = graphs.interner.intern(class_name);
                let target = graphs.interner.intern(interface);
                if is_ghost(interface, &defined, sdk, repackage) {
                    graphs
                        .ghost
                        .add(source, target, RelationKind::Interface, Vec::new());
                }
                graphs.interface.add_edge(source, target, ());
            }
        }

        for (class_name, superclass) in &tables.classes_superclass {
            let source = graphs.interner.intern(class_name);
            let target = graphs.interner.intern(superclass);
            if is_ghost(superclass, &defined, sdk, repackage) {
                graphs
                    .ghost
                    .add(source, target, RelationKind::Superclass, Vec::new());
            }
            graphs.superclass.add_edge(source, target, ());
        }

        graphs
    }

    fn graph_of(&self, kind: RelationKind) -> &DiGraphMap<Sym, ()> {
        match kind {
            RelationKind::Interface => &self.interface,
            RelationKind::Superclass => &self.superclass,
            RelationKind::Call => unreachable!("call graph carries weights"),
        }
    }

    /// Successors of a class in the given graph.
    pub fn neighbors(&self, kind: RelationKind, class_name: &str) -> Vec<&str> {
        let Some(sym) = self.interner.get(class_name) else {
            return Vec::new();
        };
        let successors: Vec<Sym> = match kind {
            RelationKind::Call => {
                if !self.call.contains_node(sym) {
                    return Vec::new();
                }
                self.call.neighbors(sym).collect()
            }
            kind => {
                let graph = self.graph_of(kind);
                if !graph.contains_node(sym) {
                    return Vec::new();
                }
                graph.neighbors(sym).collect()
            }
        };
        successors
            .into_iter()
            .map(|sym| self.interner.resolve(sym))
            .collect()
    }

    /// Out-degree in the interface graph.
    pub fn interface_count(&self, class_name: &str) -> usize {
        match self.interner.get(class_name) {
            Some(sym) if self.interface.contains_node(sym) => {
                self.interface.neighbors(sym).count()
            }
            _ => 0,
        }
    }

    /// Descriptor pairs of the invocation edge between two classes.
    pub fn call_methods(&self, source: &str, target: &str) -> Option<&CallMethods> {
        let source = self.interner.get(source)?;
        let target = self.interner.get(target)?;
        self.call.edge_weight(source, target)
    }

    /// Invocation edges induced on a class set, flattened to one
    /// [`MethodCall`] per descriptor pair, sorted.
    pub fn method_calls_between(&self, classes: &AHashSet<&str>) -> Vec<MethodCall> {
        let members = self.member_syms(classes);
        let mut calls = Vec::new();

        for (source, target, methods) in self.call.all_edges() {
            if !members.contains(&source) || !members.contains(&target) {
                continue;
            }
            for (caller_desc, callee_desc, count) in methods {
                calls.push(MethodCall {
                    caller_class: self.interner.resolve(source).to_owned(),
                    callee_class: self.interner.resolve(target).to_owned(),
                    caller_desc: caller_desc.clone(),
                    callee_desc: callee_desc.clone(),
                    count: *count,
                });
            }
        }

        calls.sort_unstable_by(|a, b| {
            (&a.caller_class, &a.callee_class, &a.caller_desc, &a.callee_desc)
                .cmp(&(&b.caller_class, &b.callee_class, &b.caller_desc, &b.callee_desc))
        });
        calls
    }

    /// Interface edges induced on a class set.
    pub fn interfaces_between(&self, classes: &AHashSet<&str>) -> AHashMap<String, Vec<String>> {
        let members = self.member_syms(classes);
        let mut result: AHashMap<String, Vec<String>> = AHashMap::new();

        for (source, target, _) in self.interface.all_edges() {
            if members.contains(&source) && members.contains(&target) {
                result
                    .entry(self.interner.resolve(source).to_owned())
                    .or_default()
                    .push(self.interner.resolve(target).to_owned());
            }
        }

        for interfaces in result.values_mut() {
            interfaces.sort_unstable();
        }
        result
    }

    /// Superclass edges induced on a class set.
    pub fn superclasses_between(&self, classes: &AHashSet<&str>) -> AHashMap<String, String> {
        let members = self.member_syms(classes);
        let mut result = AHashMap::new();

        for (source, target, _) in self.superclass.all_edges() {
            if members.contains(&source) && members.contains(&target) {
                result.insert(
                    self.interner.resolve(source).to_owned(),
                    self.interner.resolve(target).to_owned(),
                );
            }
        }
        result
    }

    fn member_syms(&self, classes: &AHashSet<&str>) -> AHashSet<Sym> {
        classes
            .iter()
            .filter_map(|name| self.interner.get(name))
            .collect()
    }
}

/// Package of a class name: the prefix before the last `/`.
pub fn package_of(class_name: &str) -> &str {
    match class_name.rfind('/') {
        Some(idx) => &class_name[..idx],
        None => "",
    }
}

fn is_ghost(target: &str, defined: &AHashSet<&str>, sdk: &SdkClasses, repackage: bool) -> bool {
    if defined.contains(target) {
        return false;
    }

    if repackage {
        !sdk.contains(target)
    } else {
        let target_pkg = format!("{}/", package_of(target));
        defined
            .iter()
            .any(|class| target_pkg.starts_with(&format!("{}/", package_of(class))))
    }
}
