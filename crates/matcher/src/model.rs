//! The structural matching model.
//!
//! Given one candidate library and the app classes that retrieved it, find
//! the maximum-weight one-to-one mapping of library classes onto app
//! classes that stays consistent with the package hierarchy, the call
//! graph, the interface graph and the superclass graph. All of it is one
//! integer linear program over binary variables; the solver sits behind
//! this module's narrow interface and can be swapped.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use ahash::AHashMap;
use good_lp::{
    Constraint, Expression, ResolutionError, Solution, SolverModel, Variable, constraint, microlp,
    variable, variables,
};
use itertools::Itertools;

use crate::errors::MatcherError;

/// Artificial parent of the top-level packages.
pub const ROOT_PKG: &str = "<ROOT>";

/// Coefficient of the method-match and co-usage tie-breakers. Small enough
/// that they never dominate the per-class weights.
const TIE_BREAK: f64 = 0.0001;

/// One invocation edge, flattened to a single caller/callee method pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodCall {
    pub caller_class: String,
    pub callee_class: String,
    pub caller_desc: String,
    pub callee_desc: String,
    pub count: u32,
}

/// Inputs of one candidate solve.
///
/// Class and pair lists are expected sorted so that variable creation order
/// (and with it the solver's tie-breaking) is reproducible.
#[derive(Debug, Clone, Default)]
pub struct MatchInputs {
    /// Candidate app classes, sorted.
    pub app_classes: Vec<String>,

    /// Candidate `(library_class, app_class)` pairs, sorted, deduplicated.
    pub candidate_pairs: Vec<(String, String)>,

    pub lib_calls: Vec<MethodCall>,
    pub app_calls: Vec<MethodCall>,

    /// Per-app-class objective weight.
    pub app_class_weights: AHashMap<String, f64>,

    pub lib_parents: Option<AHashMap<String, String>>,
    pub app_parents: Option<AHashMap<String, String>>,
    pub lib_interfaces: Option<AHashMap<String, Vec<String>>>,
    pub app_interfaces: Option<AHashMap<String, Vec<String>>>,

    /// Hierarchical package mode: packages match one-to-one and only under
    /// matching parents.
    pub use_pkg_hierarchy: bool,

    /// Flattened package mode: every matched app class lives in one active
    /// package drawn from `flattened_pkgs_allowed`.
    pub assume_flattened_package: bool,
    pub flattened_pkgs_allowed: Option<Vec<String>>,

    pub use_call_graph_constraints: bool,
}

/// Solver configuration.
#[derive(Debug, Clone, Copy)]
pub struct MatchConfig {
    /// Wall-clock budget per candidate solve.
    pub time_budget: Duration,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            time_budget: Duration::from_secs(60),
        }
    }
}

/// The matched pairs and the objective they achieve.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchSolution {
    pub objective: f64,
    pub matched_pairs: Vec<(String, String)>,
}

/// Solves the structural match for one candidate library.
///
/// Timeout, infeasibility and an empty candidate set are all per-candidate
/// outcomes; the caller rejects the candidate and moves on.
pub fn match_classes(
    inputs: &MatchInputs,
    config: &MatchConfig,
) -> Result<MatchSolution, MatcherError> {
    if inputs.candidate_pairs.is_empty() {
        return Err(MatcherError::NoCandidates);
    }

    let mut vars = variables!();
    let mut constraints: Vec<Constraint> = Vec::new();

    // Class match variables with one-to-one counting on both sides.
    let mut class_match: AHashMap<(&str, &str), Variable> = AHashMap::new();
    let mut lib_count: AHashMap<&str, Expression> = AHashMap::new();
    let mut app_count: AHashMap<&str, Expression> = AHashMap::new();

    for (lib, app) in &inputs.candidate_pairs {
        let pair = (lib.as_str(), app.as_str());
        if class_match.contains_key(&pair) {
            continue;
        }
        let cm = vars.add(variable().binary());
        class_match.insert(pair, cm);
        *lib_count.entry(pair.0).or_default() += cm;
        *app_count.entry(pair.1).or_default() += cm;
    }

    for expr in lib_count.values() {
        constraints.push(constraint!(expr.clone() <= 1.0));
    }
    for expr in app_count.values() {
        constraints.push(constraint!(expr.clone() <= 1.0));
    }

    // "App class is used" indicators.
    let mut app_used: AHashMap<&str, Variable> = AHashMap::new();
    for app in &inputs.app_classes {
        let used = vars.add(variable().binary());
        app_used.insert(app.as_str(), used);
        match app_count.get(app.as_str()) {
            Some(expr) => constraints.push(constraint!(Expression::from(used) == expr.clone())),
            None => constraints.push(constraint!(Expression::from(used) == 0.0)),
        }
    }

    // Invocation consistency.
    let mut method_vars: Vec<Variable> = Vec::new();
    let mut methods_total = Expression::default();
    if inputs.use_call_graph_constraints {
        let mut lib_call_exprs: Vec<Expression> =
            (0..inputs.lib_calls.len()).map(|_| Expression::default()).collect();
        let mut app_call_exprs: Vec<Expression> =
            (0..inputs.app_calls.len()).map(|_| Expression::default()).collect();

        for (li, lib_call) in inputs.lib_calls.iter().enumerate() {
            for (ai, app_call) in inputs.app_calls.iter().enumerate() {
                // A library invocation covers an app invocation only with
                // matching descriptors at both ends and at least as many
                // call sites.
                if lib_call.caller_desc != app_call.caller_desc
                    || lib_call.callee_desc != app_call.callee_desc
                    || lib_call.count < app_call.count
                {
                    continue;
                }

                let caller_pair = (lib_call.caller_class.as_str(), app_call.caller_class.as_str());
                let callee_pair = (lib_call.callee_class.as_str(), app_call.callee_class.as_str());
                let (Some(&cm_caller), Some(&cm_callee)) =
                    (class_match.get(&caller_pair), class_match.get(&callee_pair))
                else {
                    continue;
                };

                let mm = vars.add(variable().binary());
                constraints.push(constraint!(mm <= cm_caller));
                constraints.push(constraint!(mm <= cm_callee));
                lib_call_exprs[li] += mm;
                app_call_exprs[ai] += mm;
                methods_total += mm;
                method_vars.push(mm);
            }
        }

        for expr in lib_call_exprs {
            constraints.push(constraint!(expr <= 1.0));
        }

        // An app invocation must be covered exactly when both endpoints
        // are used.
        for (ai, expr) in app_call_exprs.into_iter().enumerate() {
            let app_call = &inputs.app_calls[ai];
            let (Some(&caller_used), Some(&callee_used)) = (
                app_used.get(app_call.caller_class.as_str()),
                app_used.get(app_call.callee_class.as_str()),
            ) else {
                constraints.push(constraint!(expr == 0.0));
                continue;
            };

            let both = vars.add(variable().binary());
            constraints.push(constraint!(both <= caller_used));
            constraints.push(constraint!(both <= callee_used));
            constraints.push(constraint!(both >= caller_used + callee_used - 1.0));
            constraints.push(constraint!(expr == both));
        }
    }

    if inputs.use_pkg_hierarchy {
        let lib_classnames: Vec<&str> = inputs
            .candidate_pairs
            .iter()
            .map(|(lib, _)| lib.as_str())
            .sorted_unstable()
            .dedup()
            .collect();
        let (lib_pkg_parent, lib_class_pkg) = process_class_hierarchy(&lib_classnames);
        let app_classnames: Vec<&str> =
            inputs.app_classes.iter().map(String::as_str).collect();
        let (app_pkg_parent, app_class_pkg) = process_class_hierarchy(&app_classnames);

        let mut all_lib_pkgs: Vec<&str> =
            lib_pkg_parent.keys().map(String::as_str).collect();
        all_lib_pkgs.push(ROOT_PKG);
        all_lib_pkgs.sort_unstable();
        let mut all_app_pkgs: Vec<&str> =
            app_pkg_parent.keys().map(String::as_str).collect();
        all_app_pkgs.push(ROOT_PKG);
        all_app_pkgs.sort_unstable();

        let mut pkg_match: AHashMap<(&str, &str), Variable> = AHashMap::new();
        let mut lib_pkg_count: AHashMap<&str, Expression> = AHashMap::new();
        let mut app_pkg_count: AHashMap<&str, Expression> = AHashMap::new();

        for &lib_pkg in &all_lib_pkgs {
            for &app_pkg in &all_app_pkgs {
                let pm = vars.add(variable().binary());
                pkg_match.insert((lib_pkg, app_pkg), pm);
                *lib_pkg_count.entry(lib_pkg).or_default() += pm;
                *app_pkg_count.entry(app_pkg).or_default() += pm;
            }
        }

        // Every package matches at most one counterpart.
        for expr in lib_pkg_count.into_values() {
            constraints.push(constraint!(expr <= 1.0));
        }
        for expr in app_pkg_count.into_values() {
            constraints.push(constraint!(expr <= 1.0));
        }

        // Packages only match under matching parents.
        for &lib_pkg in &all_lib_pkgs {
            for &app_pkg in &all_app_pkgs {
                if lib_pkg == ROOT_PKG || app_pkg == ROOT_PKG {
                    continue;
                }
                let pm = pkg_match[&(lib_pkg, app_pkg)];
                let parents = (
                    lib_pkg_parent[lib_pkg].as_str(),
                    app_pkg_parent[app_pkg].as_str(),
                );
                match pkg_match.get(&parents) {
                    Some(&parent_pm) => constraints.push(constraint!(pm <= parent_pm)),
                    None => constraints.push(constraint!(Expression::from(pm) == 0.0)),
                }
            }
        }

        // Classes only match when their packages match.
        for (lib, app) in &inputs.candidate_pairs {
            let cm = class_match[&(lib.as_str(), app.as_str())];
            let pkgs = (
                lib_class_pkg[lib.as_str()].as_str(),
                app_class_pkg[app.as_str()].as_str(),
            );
            match pkg_match.get(&pkgs) {
                Some(&pm) => constraints.push(constraint!(cm <= pm)),
                None => constraints.push(constraint!(Expression::from(cm) == 0.0)),
            }
        }
    } else if inputs.assume_flattened_package {
        let app_classnames: Vec<&str> =
            inputs.app_classes.iter().map(String::as_str).collect();
        let (app_pkg_parent, app_class_pkg) = process_class_hierarchy(&app_classnames);

        let allowed: Vec<String> = match &inputs.flattened_pkgs_allowed {
            Some(pkgs) => pkgs.iter().sorted_unstable().map(|pkg| format!("/{}", pkg)).collect(),
            None => app_pkg_parent.keys().sorted_unstable().cloned().collect(),
        };

        let mut active: AHashMap<&str, Variable> = AHashMap::new();
        let mut active_total = Expression::default();
        for pkg in &allowed {
            let var = vars.add(variable().binary());
            active.insert(pkg.as_str(), var);
            active_total += var;
        }
        constraints.push(constraint!(active_total <= 1.0));

        for (lib, app) in &inputs.candidate_pairs {
            let cm = class_match[&(lib.as_str(), app.as_str())];
            match active.get(app_class_pkg[app.as_str()].as_str()) {
                Some(&var) => constraints.push(constraint!(cm <= var)),
                None => constraints.push(constraint!(Expression::from(cm) == 0.0)),
            }
        }
    }

    // Superclass and interface consistency, plus the co-usage bonus terms.
    let mut bonus_vars: Vec<Variable> = Vec::new();
    let mut bonus_total = Expression::default();
    let lib_parents = inputs.lib_parents.as_ref().filter(|m| !m.is_empty());
    if let Some(lib_parents) = lib_parents {
        let empty_ifaces = Vec::new();
        let lib_interfaces = inputs.lib_interfaces.as_ref().filter(|m| !m.is_empty());

        for (lib, app) in &inputs.candidate_pairs {
            let cm = class_match[&(lib.as_str(), app.as_str())];
            let parent_lib = lib_parents.get(lib.as_str());
            let parent_app = inputs
                .app_parents
                .as_ref()
                .and_then(|m| m.get(app.as_str()));

            match (parent_lib, parent_app) {
                (Some(parent_lib), Some(parent_app)) => {
                    match class_match.get(&(parent_lib.as_str(), parent_app.as_str())) {
                        Some(&parents_cm) => constraints.push(constraint!(cm <= parents_cm)),
                        None => constraints.push(constraint!(Expression::from(cm) == 0.0)),
                    }
                }
                (Some(_), None) => {
                    constraints.push(constraint!(Expression::from(cm) == 0.0));
                }
                (None, Some(parent_app)) => {
                    // Only allowed if the app-side parent stays unmatched.
                    let parent_matches =
                        app_count.get(parent_app.as_str()).cloned().unwrap_or_default();
                    constraints.push(constraint!(parent_matches + cm <= 1.0));
                }
                (None, None) => {}
            }

            // Interface sets match as pairs, never partially.
            if let Some(lib_interfaces) = lib_interfaces {
                let lib_ifaces = lib_interfaces.get(lib.as_str()).unwrap_or(&empty_ifaces);
                let app_ifaces = inputs
                    .app_interfaces
                    .as_ref()
                    .and_then(|m| m.get(app.as_str()))
                    .unwrap_or(&empty_ifaces);

                let mut matched_pairs = Expression::default();
                for lib_iface in lib_ifaces {
                    for app_iface in app_ifaces {
                        if let Some(&v) =
                            class_match.get(&(lib_iface.as_str(), app_iface.as_str()))
                        {
                            matched_pairs += v;
                        }
                    }
                }

                let mut lib_matched = Expression::default();
                for lib_iface in lib_ifaces {
                    if let Some(expr) = lib_count.get(lib_iface.as_str()) {
                        lib_matched += expr.clone();
                    }
                }
                let mut app_matched = Expression::default();
                for app_iface in app_ifaces {
                    if let Some(expr) = app_count.get(app_iface.as_str()) {
                        app_matched += expr.clone();
                    }
                }

                constraints
                    .push(constraint!(matched_pairs * 2.0 == lib_matched + app_matched));
            }
        }

        if let Some(app_parents) = &inputs.app_parents {
            for (app_class, parent) in app_parents.iter().sorted_unstable() {
                if let (Some(&used), Some(&parent_used)) = (
                    app_used.get(app_class.as_str()),
                    app_used.get(parent.as_str()),
                ) {
                    let together = vars.add(variable().binary());
                    constraints.push(constraint!(together <= used));
                    constraints.push(constraint!(together <= parent_used));
                    bonus_total += together;
                    bonus_vars.push(together);
                }
            }
        }

        if let Some(app_interfaces) = &inputs.app_interfaces {
            for (app_class, ifaces) in app_interfaces.iter().sorted_unstable() {
                for iface in ifaces {
                    if let (Some(&used), Some(&iface_used)) = (
                        app_used.get(app_class.as_str()),
                        app_used.get(iface.as_str()),
                    ) {
                        let together = vars.add(variable().binary());
                        constraints.push(constraint!(together <= used));
                        constraints.push(constraint!(together <= iface_used));
                        bonus_total += together;
                        bonus_vars.push(together);
                    }
                }
            }
        }
    }

    // Objective: evidence-weighted app classes, with method matches and
    // parent/interface grouping as tiny tie-breakers.
    let mut objective = Expression::default();
    if inputs.use_call_graph_constraints {
        objective += methods_total * TIE_BREAK;
        objective += bonus_total * TIE_BREAK;
    }
    for app in &inputs.app_classes {
        let weight = inputs.app_class_weights.get(app).copied().unwrap_or(0.0);
        objective += app_used[app.as_str()] * weight;
    }

    log::debug!(
        target: "match",
        "model: {} pairs, {} lib calls, {} app calls",
        class_match.len(),
        inputs.lib_calls.len(),
        inputs.app_calls.len()
    );

    let mut model = vars.maximise(objective).using(microlp);
    for c in constraints {
        model = model.with(c);
    }
    let solution = solve_with_budget(model, config.time_budget)?;

    let mut matched_pairs = Vec::new();
    for (lib, app) in &inputs.candidate_pairs {
        if solution.value(class_match[&(lib.as_str(), app.as_str())]) > 0.5 {
            matched_pairs.push((lib.clone(), app.clone()));
        }
    }

    let mut objective_value = 0.0;
    if inputs.use_call_graph_constraints {
        let set = |vs: &[Variable]| {
            vs.iter().filter(|&&v| solution.value(v) > 0.5).count() as f64
        };
        objective_value += TIE_BREAK * set(&method_vars);
        objective_value += TIE_BREAK * set(&bonus_vars);
    }
    for app in &inputs.app_classes {
        if solution.value(app_used[app.as_str()]) > 0.5 {
            objective_value += inputs.app_class_weights.get(app).copied().unwrap_or(0.0);
        }
    }

    log::debug!(
        target: "match",
        "solved: objective {:.4}, {} pairs matched",
        objective_value,
        matched_pairs.len()
    );

    Ok(MatchSolution {
        objective: objective_value,
        matched_pairs,
    })
}

/// Runs the solve on a worker thread so a runaway model cannot stall the
/// whole detection run. A timed-out solve is abandoned.
fn solve_with_budget<M>(model: M, budget: Duration) -> Result<M::Solution, MatcherError>
where
    M: SolverModel + Send + 'static,
    M::Solution: Send + 'static,
    M::Error: Into<SolveFailure> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(model.solve());
    });

    match rx.recv_timeout(budget) {
        Ok(Ok(solution)) => Ok(solution),
        Ok(Err(err)) => match err.into() {
            SolveFailure::Infeasible => Err(MatcherError::Infeasible),
            SolveFailure::Other(message) => Err(MatcherError::Solver(message)),
        },
        Err(_) => Err(MatcherError::Timeout),
    }
}

enum SolveFailure {
    Infeasible,
    Other(String),
}

impl From<ResolutionError> for SolveFailure {
    fn from(err: ResolutionError) -> Self {
        match err {
            ResolutionError::Infeasible => SolveFailure::Infeasible,
            other => SolveFailure::Other(other.to_string()),
        }
    }
}

/// Package hierarchy of a class name set: `pkg -> parent pkg` and
/// `class -> pkg`, with `/`-prefixed package names and [`ROOT_PKG`] at the
/// top.
fn process_class_hierarchy<'a>(
    classnames: &[&'a str],
) -> (AHashMap<String, String>, AHashMap<&'a str, String>) {
    let mut parent_pkg: AHashMap<String, String> = AHashMap::new();
    let mut class_pkg: AHashMap<&'a str, String> = AHashMap::new();

    for &classname in classnames {
        let mut current = String::new();
        for token in classname.trim_end().split('/') {
            if token.ends_with(';') {
                class_pkg.insert(
                    classname,
                    if current.is_empty() {
                        ROOT_PKG.to_owned()
                    } else {
                        current.clone()
                    },
                );
                break;
            }
            let child = format!("{}/{}", current, token);
            parent_pkg.insert(
                child.clone(),
                if current.is_empty() {
                    ROOT_PKG.to_owned()
                } else {
                    current.clone()
                },
            );
            current = child;
        }
    }

    (parent_pkg, class_pkg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weights(app_classes: &[&str]) -> AHashMap<String, f64> {
        app_classes.iter().map(|c| ((*c).to_owned(), 1.0)).collect()
    }

    fn pairs(list: &[(&str, &str)]) -> Vec<(String, String)> {
        list.iter()
            .map(|(l, a)| ((*l).to_owned(), (*a).to_owned()))
            .collect()
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_owned()).collect()
    }

    fn call(caller: &str, callee: &str, desc1: &str, desc2: &str, count: u32) -> MethodCall {
        MethodCall {
            caller_class: caller.to_owned(),
            callee_class: callee.to_owned(),
            caller_desc: desc1.to_owned(),
            callee_desc: desc2.to_owned(),
            count,
        }
    }

    #[test]
    fn empty_candidates_are_rejected() {
        let result = match_classes(&MatchInputs::default(), &MatchConfig::default());
        assert!(matches!(result, Err(MatcherError::NoCandidates)));
    }

    #[test]
    fn bipartite_matching_without_structure() {
        let inputs = MatchInputs {
            app_classes: names(&["La/A;", "La/B;"]),
            candidate_pairs: pairs(&[
                ("Ll/A;", "La/A;"),
                ("Ll/A;", "La/B;"),
                ("Ll/B;", "La/A;"),
                ("Ll/B;", "La/B;"),
            ]),
            app_class_weights: weights(&["La/A;", "La/B;"]),
            use_call_graph_constraints: true,
            ..MatchInputs::default()
        };

        let solution = match_classes(&inputs, &MatchConfig::default()).unwrap();
        assert_eq!(solution.matched_pairs.len(), 2);
        assert!((solution.objective - 2.0).abs() < 1e-6);

        let apps: Vec<&str> = solution.matched_pairs.iter().map(|(_, a)| a.as_str()).collect();
        assert!(apps.contains(&"La/A;") && apps.contains(&"La/B;"));
    }

    #[test]
    fn package_hierarchy_keeps_packages_one_to_one() {
        // Both library classes live in one package; the app spreads them
        // over two. Only one of the two matches can survive.
        let inputs = MatchInputs {
            app_classes: names(&["Lx/A;", "Ly/B;"]),
            candidate_pairs: pairs(&[("Ll/p/A;", "Lx/A;"), ("Ll/p/B;", "Ly/B;")]),
            app_class_weights: weights(&["Lx/A;", "Ly/B;"]),
            use_pkg_hierarchy: true,
            use_call_graph_constraints: true,
            ..MatchInputs::default()
        };

        let solution = match_classes(&inputs, &MatchConfig::default()).unwrap();
        assert_eq!(solution.matched_pairs.len(), 1);
    }

    #[test]
    fn package_hierarchy_allows_parallel_trees() {
        let inputs = MatchInputs {
            app_classes: names(&["Lapp/obf/A;", "Lapp/obf/B;"]),
            candidate_pairs: pairs(&[("Ll/p/A;", "Lapp/obf/A;"), ("Ll/p/B;", "Lapp/obf/B;")]),
            app_class_weights: weights(&["Lapp/obf/A;", "Lapp/obf/B;"]),
            use_pkg_hierarchy: true,
            use_call_graph_constraints: true,
            ..MatchInputs::default()
        };

        let solution = match_classes(&inputs, &MatchConfig::default()).unwrap();
        assert_eq!(solution.matched_pairs.len(), 2);
    }

    #[test]
    fn flattened_mode_restricts_to_one_active_package() {
        let inputs = MatchInputs {
            app_classes: names(&["Lobf/a/A;", "Lobf/b/B;"]),
            candidate_pairs: pairs(&[("Ll/p/A;", "Lobf/a/A;"), ("Ll/p/B;", "Lobf/b/B;")]),
            app_class_weights: weights(&["Lobf/a/A;", "Lobf/b/B;"]),
            assume_flattened_package: true,
            flattened_pkgs_allowed: Some(names(&["Lobf/a", "Lobf/b"])),
            use_call_graph_constraints: true,
            ..MatchInputs::default()
        };

        let solution = match_classes(&inputs, &MatchConfig::default()).unwrap();
        assert_eq!(solution.matched_pairs.len(), 1);
    }

    #[test]
    fn superclass_requires_matching_parents() {
        let base = MatchInputs {
            app_classes: names(&["La/A;", "La/P;"]),
            candidate_pairs: pairs(&[("Ll/A;", "La/A;")]),
            app_class_weights: weights(&["La/A;", "La/P;"]),
            lib_parents: Some(
                [("Ll/A;".to_owned(), "Ll/P;".to_owned())].into_iter().collect(),
            ),
            app_parents: Some(
                [("La/A;".to_owned(), "La/P;".to_owned())].into_iter().collect(),
            ),
            use_call_graph_constraints: true,
            ..MatchInputs::default()
        };

        // Parent pair is not a candidate: the child match is forbidden.
        let solution = match_classes(&base, &MatchConfig::default()).unwrap();
        assert!(solution.matched_pairs.is_empty());

        // With the parent pair available both match.
        let mut with_parent = base.clone();
        with_parent.candidate_pairs =
            pairs(&[("Ll/A;", "La/A;"), ("Ll/P;", "La/P;")]);
        let solution = match_classes(&with_parent, &MatchConfig::default()).unwrap();
        assert_eq!(solution.matched_pairs.len(), 2);
    }

    #[test]
    fn app_only_parent_must_stay_unmatched() {
        // The library class has no parent but the app class does; the match
        // is only allowed while the app parent is unused.
        let inputs = MatchInputs {
            app_classes: names(&["La/A;", "La/P;"]),
            candidate_pairs: pairs(&[("Ll/A;", "La/A;"), ("Ll/Q;", "La/P;")]),
            app_class_weights: [("La/A;".to_owned(), 1.0), ("La/P;".to_owned(), 10.0)]
                .into_iter()
                .collect(),
            lib_parents: Some(
                // Nonempty to enable the constraint family; Ll/A; itself
                // has no parent.
                [("Ll/Q;".to_owned(), "Ll/R;".to_owned())].into_iter().collect(),
            ),
            app_parents: Some(
                [("La/A;".to_owned(), "La/P;".to_owned())].into_iter().collect(),
            ),
            use_call_graph_constraints: true,
            ..MatchInputs::default()
        };

        let solution = match_classes(&inputs, &MatchConfig::default()).unwrap();
        // Ll/Q; -> La/P; is forbidden outright (lib parent unmatched), and
        // the heavy La/P; class cannot be claimed, so only La/A; matches.
        assert_eq!(
            solution.matched_pairs,
            vec![("Ll/A;".to_owned(), "La/A;".to_owned())]
        );
    }

    #[test]
    fn uncovered_app_invocation_blocks_joint_use() {
        // The app calls twice but the library only once, so the invocation
        // cannot be covered and both endpoints cannot be used together.
        let inputs = MatchInputs {
            app_classes: names(&["La/A;", "La/B;"]),
            candidate_pairs: pairs(&[("Ll/A;", "La/A;"), ("Ll/B;", "La/B;")]),
            lib_calls: vec![call("Ll/A;", "Ll/B;", "()V", "()V", 1)],
            app_calls: vec![call("La/A;", "La/B;", "()V", "()V", 2)],
            app_class_weights: weights(&["La/A;", "La/B;"]),
            use_call_graph_constraints: true,
            ..MatchInputs::default()
        };

        let solution = match_classes(&inputs, &MatchConfig::default()).unwrap();
        assert_eq!(solution.matched_pairs.len(), 1);
    }

    #[test]
    fn covered_app_invocation_earns_the_tie_breaker() {
        let inputs = MatchInputs {
            app_classes: names(&["La/A;", "La/B;"]),
            candidate_pairs: pairs(&[("Ll/A;", "La/A;"), ("Ll/B;", "La/B;")]),
            lib_calls: vec![call("Ll/A;", "Ll/B;", "()V", "()V", 3)],
            app_calls: vec![call("La/A;", "La/B;", "()V", "()V", 2)],
            app_class_weights: weights(&["La/A;", "La/B;"]),
            use_call_graph_constraints: true,
            ..MatchInputs::default()
        };

        let solution = match_classes(&inputs, &MatchConfig::default()).unwrap();
        assert_eq!(solution.matched_pairs.len(), 2);
        assert!((solution.objective - (2.0 + TIE_BREAK)).abs() < 1e-6);
    }

    #[test]
    fn partial_interface_matching_is_forbidden() {
        // Ll/I; could bind to the unrelated La/B;, but Ll/A;'s interface
        // set would then match only partially against La/A;'s empty one.
        let inputs = MatchInputs {
            app_classes: names(&["La/A;", "La/B;"]),
            candidate_pairs: pairs(&[("Ll/A;", "La/A;"), ("Ll/I;", "La/B;")]),
            app_class_weights: weights(&["La/A;", "La/B;"]),
            lib_parents: Some(
                [("Ll/A;".to_owned(), "Ll/S;".to_owned())].into_iter().collect(),
            ),
            app_parents: Some(AHashMap::new()),
            lib_interfaces: Some(
                [("Ll/A;".to_owned(), vec!["Ll/I;".to_owned()])].into_iter().collect(),
            ),
            app_interfaces: Some(AHashMap::new()),
            use_call_graph_constraints: true,
            ..MatchInputs::default()
        };

        let solution = match_classes(&inputs, &MatchConfig::default()).unwrap();
        assert!(
            !solution
                .matched_pairs
                .contains(&("Ll/I;".to_owned(), "La/B;".to_owned()))
        );
    }

    #[test]
    fn hierarchy_of_class_names_has_prefixed_packages() {
        let (parents, class_pkg) = process_class_hierarchy(&["Lcom/foo/bar/A;", "Lcom/foo/B;"]);
        assert_eq!(parents["/Lcom"], ROOT_PKG);
        assert_eq!(parents["/Lcom/foo"], "/Lcom");
        assert_eq!(parents["/Lcom/foo/bar"], "/Lcom/foo");
        assert_eq!(class_pkg["Lcom/foo/bar/A;"], "/Lcom/foo/bar");
        assert_eq!(class_pkg["Lcom/foo/B;"], "/Lcom/foo");
    }
}
