//! Per-app detection pipeline.
//!
//! One [`Analyzer`] per app profile: query the index per class, group the
//! hits by library, pre-filter by signature coverage, solve the structural
//! match per surviving candidate, then threshold and bind accepted
//! libraries to their matched packages. All shared inputs arrive read-only
//! through the [`DetectContext`]; nothing survives the analyzer.

use std::collections::BTreeSet;

use ahash::{AHashMap, AHashSet};
use itertools::Itertools;
use petgraph::graphmap::UnGraphMap;
use rayon::prelude::*;

use libsift_lsh::{LshEnsemble, MinHasher};
use libsift_matcher::{MatchInputs, MethodCall, match_classes};
use libsift_profile::{AppProfile, SdkClasses};

use crate::config::{BUILTIN_LIB_PREFIXES, COMPONENT_MATCH_THRESHOLD, DetectOptions, Mode};
use crate::graphs::{RelationGraphs, RelationKind, package_of};
use crate::interner::Sym;
use crate::key::{LibKey, parse_hit};
use crate::models::LibraryMatch;

/// Read-only inputs shared by all app analyses of one run.
pub struct DetectContext<'a> {
    pub sdk: &'a SdkClasses,
    pub opts: &'a DetectOptions,
    pub minhasher: &'a MinHasher,
    pub lsh: &'a LshEnsemble,

    /// Library relationship graphs keyed by `"<name>_<version>"`;
    /// populated in accurate mode only.
    pub lib_graphs: &'a AHashMap<String, RelationGraphs>,
}

/// One library candidate: the app classes that retrieved it and the
/// retrieved class pairs.
struct Candidate {
    key: LibKey,
    app_classes: AHashSet<String>,
    pairs: AHashSet<(String, String)>,
}

pub struct Analyzer<'a> {
    ctx: &'a DetectContext<'a>,
    app: &'a AppProfile,

    /// Package name -> every class anywhere under it.
    package_classes: AHashMap<String, AHashSet<String>>,
    app_graphs: Option<RelationGraphs>,

    /// Accepted matches, keyed by `"<name>_<version>"`.
    libs_matches: AHashMap<String, f64>,
    lib_packages_matches: AHashMap<String, BTreeSet<String>>,
    package_libs_matches: AHashMap<String, Vec<String>>,

    /// `lib -> (declared root package, category)`.
    lib_info: AHashMap<String, (String, String)>,
    lib_shrink: AHashMap<String, f64>,
}

impl<'a> Analyzer<'a> {
    pub fn new(app: &'a AppProfile, ctx: &'a DetectContext<'a>) -> Self {
        Self {
            ctx,
            app,
            package_classes: AHashMap::new(),
            app_graphs: None,
            libs_matches: AHashMap::new(),
            lib_packages_matches: AHashMap::new(),
            package_libs_matches: AHashMap::new(),
            lib_info: AHashMap::new(),
            lib_shrink: AHashMap::new(),
        }
    }

    /// Runs the full pipeline and returns the accepted libraries.
    pub fn detect(mut self) -> Vec<LibraryMatch> {
        self.build_package_info();

        let class_hits = self.query_classes();

        if self.ctx.opts.mode == Mode::Accurate {
            self.app_graphs = Some(RelationGraphs::build(
                &self.app.tables,
                self.ctx.sdk,
                self.ctx.opts.repackage,
            ));
        }

        let candidates = self.group_candidates(class_hits);
        log::info!("{}: {} library candidates", self.app.filename, candidates.len());

        for (lib_id, candidate) in candidates {
            self.match_candidate(&lib_id, &candidate);
        }

        self.report()
    }

    /// Registers every class under each of its package ancestors.
    fn build_package_info(&mut self) {
        for class_name in self.app.tables.class_names() {
            self.package_classes
                .entry("/".to_owned())
                .or_default()
                .insert(class_name.to_owned());

            for (idx, byte) in class_name.bytes().enumerate() {
                if byte == b'/' {
                    self.package_classes
                        .entry(class_name[..idx].to_owned())
                        .or_default()
                        .insert(class_name.to_owned());
                }
            }
        }
    }

    fn package_has_subpackage(&self, package: &str) -> bool {
        if package.is_empty() {
            return false;
        }
        let depth = package.matches('/').count();
        self.package_classes
            .get(package)
            .is_some_and(|classes| {
                classes
                    .iter()
                    .any(|class| class.matches('/').count() - depth > 1)
            })
    }

    /// One index query per app class with signatures.
    fn query_classes(&self) -> Vec<(String, Vec<String>)> {
        let tables = &self.app.tables;
        let class_names: Vec<&String> = tables.classes_signatures.keys().collect();

        class_names
            .par_iter()
            .map(|class_name| {
                if self.ctx.opts.exclude_builtin
                    && BUILTIN_LIB_PREFIXES
                        .iter()
                        .any(|prefix| class_name.starts_with(prefix))
                {
                    return ((*class_name).clone(), Vec::new());
                }

                let signatures = &tables.classes_signatures[*class_name];
                if signatures.is_empty() {
                    return ((*class_name).clone(), Vec::new());
                }

                let sketch = self
                    .ctx
                    .minhasher
                    .sketch(signatures.iter().map(String::as_bytes));
                let hits = self.ctx.lsh.query(&sketch, signatures.len());
                ((*class_name).clone(), hits)
            })
            .collect()
    }

    /// Groups retrieval hits by library and applies the coverage
    /// pre-filter.
    fn group_candidates(
        &self,
        class_hits: Vec<(String, Vec<String>)>,
    ) -> Vec<(String, Candidate)> {
        let mut candidates: AHashMap<String, Candidate> = AHashMap::new();

        for (app_class, hits) in class_hits {
            for hit in hits {
                let Some((lib_id, lib_class)) = parse_hit(&hit) else {
                    log::warn!("unparsable index key: {}", hit);
                    continue;
                };
                let Some(key) = LibKey::parse_id(lib_id) else {
                    log::warn!("unparsable index key: {}", hit);
                    continue;
                };

                // An app class implementing more interfaces than the
                // library class cannot realize it.
                if self.ctx.opts.mode == Mode::Accurate
                    && self.app_interface_count(&app_class)
                        > self.lib_interface_count(&key.name_version, lib_class)
                {
                    continue;
                }

                let candidate = candidates.entry(lib_id.to_owned()).or_insert_with(|| {
                    Candidate {
                        key,
                        app_classes: AHashSet::new(),
                        pairs: AHashSet::new(),
                    }
                });
                candidate.app_classes.insert(app_class.clone());
                candidate
                    .pairs
                    .insert((lib_class.to_owned(), app_class.clone()));
            }
        }

        let shrink_threshold = self.ctx.opts.mode.shrink_threshold();
        candidates
            .into_iter()
            .filter(|(lib_id, candidate)| {
                let coverage = self
                    .shrink_percentage(candidate.app_classes.iter(), candidate.key.signature_count);
                log::debug!(
                    target: "match",
                    "shrink percentage (before matching): {}: {:.4}",
                    lib_id,
                    coverage
                );
                coverage >= shrink_threshold
            })
            .sorted_by(|(a, _), (b, _)| a.cmp(b))
            .collect()
    }

    fn app_interface_count(&self, class_name: &str) -> usize {
        self.app_graphs
            .as_ref()
            .map_or(0, |graphs| graphs.interface_count(class_name))
    }

    fn lib_interface_count(&self, lib_name: &str, class_name: &str) -> usize {
        self.ctx
            .lib_graphs
            .get(lib_name)
            .map_or(0, |graphs| graphs.interface_count(class_name))
    }

    /// Solves one candidate and, if accepted, binds it to its matched
    /// root package.
    fn match_candidate(&mut self, lib_id: &str, candidate: &Candidate) {
        let lib_name = candidate.key.name_version.clone();
        self.lib_info.insert(
            lib_name.clone(),
            (
                candidate.key.root_package.clone(),
                candidate.key.category.clone(),
            ),
        );

        let inputs = self.build_inputs(candidate);
        let solution = match match_classes(&inputs, &self.ctx.opts.match_config) {
            Ok(solution) => solution,
            Err(err) => {
                log::debug!(target: "match", "{} rejected: {}", lib_id, err);
                return;
            }
        };

        let matched_app: AHashSet<&String> =
            solution.matched_pairs.iter().map(|(_, app)| app).collect();
        let shrink =
            self.shrink_percentage(matched_app.iter().copied(), candidate.key.signature_count);

        log::debug!(
            target: "match",
            "{}: weight {:.4}, shrink {:.4}, {} pairs",
            lib_id,
            solution.objective,
            shrink,
            solution.matched_pairs.len()
        );

        if shrink >= self.ctx.opts.mode.shrink_threshold() {
            let matched_root = matched_root_package(matched_app.iter().map(|class| class.as_str()));
            self.check_package_lib_match(
                &lib_name,
                &matched_root,
                &solution.matched_pairs,
                candidate.key.class_count,
                candidate.key.signature_count,
            );
        }
    }

    fn build_inputs(&self, candidate: &Candidate) -> MatchInputs {
        let lib_classes: AHashSet<&str> =
            candidate.pairs.iter().map(|(lib, _)| lib.as_str()).collect();
        let app_classes: AHashSet<&str> =
            candidate.app_classes.iter().map(String::as_str).collect();

        let accurate = self.ctx.opts.mode == Mode::Accurate;
        let lib_graphs = self.ctx.lib_graphs.get(&candidate.key.name_version);

        let (lib_calls, lib_parents, lib_interfaces) = match (accurate, lib_graphs) {
            (true, Some(graphs)) => (
                graphs.method_calls_between(&lib_classes),
                Some(graphs.superclasses_between(&lib_classes)),
                Some(graphs.interfaces_between(&lib_classes)),
            ),
            _ => (Vec::new(), None, None),
        };

        let (app_calls, app_parents, app_interfaces): (
            Vec<MethodCall>,
            Option<AHashMap<String, String>>,
            Option<AHashMap<String, Vec<String>>>,
        ) = match (accurate, self.app_graphs.as_ref()) {
            (true, Some(graphs)) => (
                graphs.method_calls_between(&app_classes),
                Some(graphs.superclasses_between(&app_classes)),
                Some(graphs.interfaces_between(&app_classes)),
            ),
            _ => (Vec::new(), None, None),
        };

        let app_class_weights: AHashMap<String, f64> = candidate
            .app_classes
            .iter()
            .map(|class| {
                let signatures = self
                    .app
                    .tables
                    .classes_signatures
                    .get(class)
                    .map_or(0, BTreeSet::len);
                (
                    class.clone(),
                    1.0 / candidate.key.class_count as f64 + 0.0001 * signatures as f64,
                )
            })
            .collect();

        let flattened_pkgs_allowed = if self.ctx.opts.repackage {
            Some(
                candidate
                    .app_classes
                    .iter()
                    .map(|class| package_of(class))
                    .filter(|pkg| !self.package_has_subpackage(pkg))
                    .map(str::to_owned)
                    .sorted_unstable()
                    .dedup()
                    .collect(),
            )
        } else {
            None
        };

        MatchInputs {
            app_classes: candidate
                .app_classes
                .iter()
                .cloned()
                .sorted_unstable()
                .collect(),
            candidate_pairs: candidate.pairs.iter().cloned().sorted_unstable().collect(),
            lib_calls,
            app_calls,
            app_class_weights,
            lib_parents,
            app_parents,
            lib_interfaces,
            app_interfaces,
            use_pkg_hierarchy: !self.ctx.opts.repackage,
            assume_flattened_package: self.ctx.opts.repackage,
            flattened_pkgs_allowed,
            use_call_graph_constraints: true,
        }
    }

    /// Union signature coverage of a class set against a library's
    /// signature count.
    fn shrink_percentage<'b, I>(&self, classes: I, lib_signature_count: usize) -> f64
    where
        I: IntoIterator<Item = &'b String>,
    {
        if lib_signature_count == 0 {
            return 0.0;
        }

        let mut union: AHashSet<&str> = AHashSet::new();
        for class in classes {
            if let Some(signatures) = self.app.tables.classes_signatures.get(class) {
                union.extend(signatures.iter().map(String::as_str));
            }
        }

        (union.len() as f64 / lib_signature_count as f64).min(1.0)
    }

    /// Contracts ghost neighbors out of the graphs induced on the matched
    /// packages, then keeps only components holding a match. Returns the
    /// surviving matched app classes and the package classes that count
    /// against the probability denominator.
    fn package_classes_within_graphs(
        &self,
        matched_pairs: &[(String, String)],
        lib_name: &str,
    ) -> (AHashSet<String>, AHashSet<String>) {
        let mut matched_app: AHashSet<String> =
            matched_pairs.iter().map(|(_, app)| app.clone()).collect();

        let mut package_classes: AHashSet<String> = AHashSet::new();
        for class in &matched_app {
            let package = package_of(class);
            if package.is_empty() {
                package_classes.insert(class.clone());
            } else if let Some(members) = self.package_classes.get(package) {
                package_classes.extend(members.iter().cloned());
            }
        }

        if self.ctx.opts.mode == Mode::Scalable {
            return (matched_app, package_classes);
        }

        let app_graphs = self
            .app_graphs
            .as_ref()
            .expect("graphs are built in accurate mode");
        let members: AHashSet<&str> = package_classes.iter().map(String::as_str).collect();

        // Undirected union of the three graphs induced on the packages.
        let mut contracted: UnGraphMap<Sym, ()> = UnGraphMap::new();
        for name in &members {
            if let Some(sym) = app_graphs.interner.get(name) {
                if app_graphs.call.contains_node(sym)
                    || app_graphs.interface.contains_node(sym)
                    || app_graphs.superclass.contains_node(sym)
                {
                    contracted.add_node(sym);
                }
            }
        }
        for (source, target, _) in app_graphs.call.all_edges() {
            if contracted.contains_node(source) && contracted.contains_node(target) {
                contracted.add_edge(source, target, ());
            }
        }
        for (source, target, _) in app_graphs
            .interface
            .all_edges()
            .chain(app_graphs.superclass.all_edges())
        {
            if contracted.contains_node(source) && contracted.contains_node(target) {
                contracted.add_edge(source, target, ());
            }
        }

        log::debug!(target: "match", "before removing ghosts: {} nodes", contracted.node_count());

        if let Some(lib_graphs) = self.ctx.lib_graphs.get(lib_name) {
            for (lib_class, app_class) in matched_pairs {
                let Some(lib_sym) = lib_graphs.interner.get(lib_class) else {
                    continue;
                };

                for edge in lib_graphs.ghost.out_edges(lib_sym) {
                    let ghost_lib_class = lib_graphs.interner.resolve(edge.target);

                    let ghost_app_classes: Vec<&str> = app_graphs
                        .neighbors(edge.kind, app_class)
                        .into_iter()
                        .filter(|neighbor| members.contains(neighbor))
                        .filter(|neighbor| !matched_app.contains(*neighbor))
                        .filter(|neighbor| {
                            if self.ctx.opts.repackage {
                                return true;
                            }
                            // The stripped neighbor must sit at the same
                            // package depth offset as in the library.
                            depth(neighbor) - depth(app_class)
                                == depth(ghost_lib_class) - depth(lib_class)
                        })
                        .collect();

                    match edge.kind {
                        RelationKind::Call => {
                            let lib_descriptors: AHashSet<(&str, &str)> = edge
                                .methods
                                .iter()
                                .map(|(caller, callee)| (caller.as_str(), callee.as_str()))
                                .collect();

                            for ghost_app in ghost_app_classes {
                                let app_descriptors: AHashSet<(&str, &str)> = app_graphs
                                    .call_methods(app_class, ghost_app)
                                    .map(|methods| {
                                        methods
                                            .iter()
                                            .map(|(caller, callee, _)| {
                                                (caller.as_str(), callee.as_str())
                                            })
                                            .collect()
                                    })
                                    .unwrap_or_default();

                                let Some(sym) = app_graphs.interner.get(ghost_app) else {
                                    continue;
                                };
                                if contracted.contains_node(sym)
                                    && app_descriptors.is_subset(&lib_descriptors)
                                {
                                    log::debug!(
                                        target: "match",
                                        "ghost app class removed: {} ({} -> {})",
                                        ghost_app,
                                        lib_class,
                                        ghost_lib_class
                                    );
                                    contracted.remove_node(sym);
                                }
                            }
                        }
                        _ => {
                            for ghost_app in ghost_app_classes {
                                if let Some(sym) = app_graphs.interner.get(ghost_app) {
                                    contracted.remove_node(sym);
                                }
                            }
                        }
                    }
                }
            }
        }

        log::debug!(target: "match", "after removing ghosts: {} nodes", contracted.node_count());

        // Keep components that still hold a matched class; drop matches
        // stranded in fully unmatched components.
        let mut ingraph: AHashSet<String> = AHashSet::new();
        let mut visited: AHashSet<Sym> = AHashSet::new();
        let nodes: Vec<Sym> = contracted.nodes().collect();
        for start in nodes {
            if visited.contains(&start) {
                continue;
            }

            let mut component = Vec::new();
            let mut queue = vec![start];
            visited.insert(start);
            while let Some(node) = queue.pop() {
                component.push(node);
                for neighbor in contracted.neighbors(node) {
                    if visited.insert(neighbor) {
                        queue.push(neighbor);
                    }
                }
            }

            let names: Vec<&str> = component
                .iter()
                .map(|&sym| app_graphs.interner.resolve(sym))
                .collect();
            let matched_nodes: Vec<&str> = names
                .iter()
                .copied()
                .filter(|name| matched_app.contains(*name))
                .collect();

            if matched_nodes.len() as f64 > names.len() as f64 * COMPONENT_MATCH_THRESHOLD {
                ingraph.extend(names.iter().map(|name| (*name).to_owned()));
            } else {
                for name in matched_nodes {
                    matched_app.remove(name);
                }
            }
        }

        // Matched classes without graph presence still count.
        ingraph.extend(matched_app.iter().cloned());

        (matched_app, ingraph)
    }

    fn lib_match_probability(
        &mut self,
        matched_pairs: &[(String, String)],
        lib_name: &str,
        lib_class_count: usize,
        lib_signature_count: usize,
    ) -> f64 {
        let (matched_app, package_classes) =
            self.package_classes_within_graphs(matched_pairs, lib_name);

        let shrink = self.shrink_percentage(matched_app.iter(), lib_signature_count);
        log::debug!(target: "match", "shrink percentage (after): {:.4}", shrink);
        if shrink < self.ctx.opts.mode.shrink_threshold() {
            return 0.0;
        }

        let package_classes: Vec<&String> = package_classes
            .iter()
            .filter(|class| {
                self.app
                    .tables
                    .classes_signatures
                    .get(*class)
                    .is_some_and(|signatures| !signatures.is_empty())
            })
            .collect();

        let divisor = package_classes.len().min(lib_class_count);
        let probability = if divisor > 0 {
            matched_app.len() as f64 / divisor as f64
        } else {
            0.0
        };

        let package_shrink =
            self.shrink_percentage(package_classes.iter().copied(), lib_signature_count);
        self.lib_shrink.insert(lib_name.to_owned(), package_shrink);

        log::debug!(
            target: "match",
            "{} -> {}: {} matched, {} lib classes, {} package classes, {:.4}",
            self.app.filename,
            lib_name,
            matched_app.len(),
            lib_class_count,
            package_classes.len(),
            probability
        );

        probability
    }

    /// Accepts a candidate at its matched package, handling competing
    /// versions of the same library: equal probabilities (within 1e-4)
    /// coexist, a strictly better one evicts the rest.
    fn check_package_lib_match(
        &mut self,
        lib_name: &str,
        package: &str,
        matched_pairs: &[(String, String)],
        lib_class_count: usize,
        lib_signature_count: usize,
    ) -> bool {
        let probability = self.lib_match_probability(
            matched_pairs,
            lib_name,
            lib_class_count,
            lib_signature_count,
        );
        log::debug!(target: "match", "probability: {}: {:.4}", lib_name, probability);

        if probability <= self.ctx.opts.mode.probability_threshold() {
            return false;
        }

        let base = match lib_name.split_once('_') {
            Some((name, _)) => format!("{}_", name),
            None => format!("{}_", lib_name),
        };

        let existing: Vec<String> = self
            .package_libs_matches
            .get(package)
            .map(|libs| {
                libs.iter()
                    .filter(|lib| lib.starts_with(&base))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some(first) = existing.first() {
            let existing_probability = self.libs_matches[first];
            if (probability - existing_probability).abs() < 0.0001 {
                self.bind_lib_to_package(lib_name, probability, package);
            } else if probability > existing_probability {
                for lib in &existing {
                    self.libs_matches.remove(lib);
                    if let Some(packages) = self.lib_packages_matches.remove(lib) {
                        for pkg in packages {
                            if let Some(libs) = self.package_libs_matches.get_mut(&pkg) {
                                libs.retain(|candidate| candidate != lib);
                            }
                        }
                    }
                }
                self.bind_lib_to_package(lib_name, probability, package);
            }
        } else {
            self.bind_lib_to_package(lib_name, probability, package);
        }

        true
    }

    fn bind_lib_to_package(&mut self, lib_name: &str, probability: f64, package: &str) {
        self.libs_matches.insert(lib_name.to_owned(), probability);
        self.lib_packages_matches
            .entry(lib_name.to_owned())
            .or_default()
            .insert(package.to_owned());
        self.package_libs_matches
            .entry(package.to_owned())
            .or_default()
            .push(lib_name.to_owned());
    }

    /// Folds accepted matches into report entries, merging versions that
    /// landed on the same package.
    fn report(&self) -> Vec<LibraryMatch> {
        let mut details: Vec<LibraryMatch> = Vec::new();

        for (lib, &similarity) in self.libs_matches.iter().sorted_by_key(|(lib, _)| *lib) {
            let (name, version) = match lib.split_once('_') {
                Some((name, version)) => (name.to_owned(), version.to_owned()),
                None => (lib.clone(), String::new()),
            };

            let matched_root_package: Vec<String> = self
                .lib_packages_matches
                .get(lib)
                .map(|packages| packages.iter().cloned().collect())
                .unwrap_or_default();
            let (declared_root, category) = self
                .lib_info
                .get(lib)
                .cloned()
                .unwrap_or_default();
            let shrink_percentage = self.lib_shrink.get(lib).copied().unwrap_or(0.0);

            if let Some(existing) = details
                .iter_mut()
                .find(|entry| entry.name == name && entry.matched_root_package == matched_root_package)
            {
                existing.version.push(version);
                if shrink_percentage > existing.shrink_percentage {
                    existing.shrink_percentage = shrink_percentage;
                }
            } else {
                details.push(LibraryMatch {
                    name,
                    version: vec![version],
                    category,
                    root_package_exist: matched_root_package.contains(&declared_root),
                    similarity,
                    matched_root_package,
                    shrink_percentage,
                });
            }
        }

        details
    }
}

fn depth(class_name: &str) -> i64 {
    class_name.matches('/').count() as i64
}

/// Root package of matched classes: the component-wise common prefix of
/// their package paths.
fn matched_root_package<'a, I>(class_names: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut names = class_names.into_iter();
    let Some(first) = names.next() else {
        return String::new();
    };

    let mut prefix: Vec<&str> = match first.rfind('/') {
        Some(idx) => first[..idx].split('/').collect(),
        None => Vec::new(),
    };

    for name in names {
        let components: Vec<&str> = match name.rfind('/') {
            Some(idx) => name[..idx].split('/').collect(),
            None => Vec::new(),
        };
        let common = prefix
            .iter()
            .zip(&components)
            .take_while(|(a, b)| a == b)
            .count();
        prefix.truncate(common);
    }

    prefix.join("/")
}
