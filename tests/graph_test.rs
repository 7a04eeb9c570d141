use std::fs;
use std::path::Path;

use rsmake::error::MakeError;
use rsmake::graph::Plan;
use rsmake::{Config, Makefile};

#[cfg(test)]
mod tests {
    use super::*;

    fn makefile(dir: &Path, text: &str) -> Makefile {
        let mut mk = Makefile::new(&Config::new(dir), 0);
        mk.parse_text(text, "Makefile", 1).unwrap();
        mk.finish_parsing().unwrap();
        mk
    }

    fn plan(mk: &Makefile, goals: &[&str]) -> rsmake::Result<Plan> {
        let goals: Vec<String> = goals.iter().map(|g| g.to_string()).collect();
        mk.graph.resolve(&goals, mk.search(), mk.phony(), true)
    }

    fn prerequisites(plan: &Plan, target: &str) -> Vec<String> {
        let idx = plan.index_of(target).unwrap();
        plan.nodes[idx].rules[0]
            .prerequisites
            .iter()
            .map(|&p| plan.nodes[p].target.clone())
            .collect()
    }

    #[test]
    fn cycles_are_reported_with_their_path() {
        let dir = tempfile::tempdir().unwrap();
        let mk = makefile(dir.path(), "a: b\nb: c\nc: a\n");
        match plan(&mk, &["a"]) {
            Err(MakeError::CircularDependency { cycle }) => {
                assert_eq!(cycle, ["a", "b", "c", "a"]);
            }
            other => panic!("expected a cycle, got {other:?}"),
        }
    }

    #[test]
    fn diamond_is_not_a_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let mk = makefile(dir.path(), "top: left right\nleft: base\nright: base\nbase:\n");
        let plan = plan(&mk, &["top"]).unwrap();
        assert_eq!(plan.nodes.len(), 4);
        let base = plan.index_of("base").unwrap();
        assert_eq!(plan.nodes[base].dependents.len(), 2);
        assert!(plan.nodes[base].order < plan.nodes[plan.index_of("left").unwrap()].order);
    }

    #[test]
    fn missing_prerequisite_names_its_dependent() {
        let dir = tempfile::tempdir().unwrap();
        let mk = makefile(dir.path(), "all: nothere\n");
        match plan(&mk, &["all"]) {
            Err(MakeError::NoRule { target, needed_by }) => {
                assert_eq!(target, "nothere");
                assert_eq!(needed_by.as_deref(), Some("all"));
            }
            other => panic!("expected a missing rule, got {other:?}"),
        }
    }

    #[test]
    fn implicit_rules_chain_through_intermediates() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.a"), "source").unwrap();
        let mk = makefile(
            dir.path(),
            "%.b: %.a\n\tcp $< $@\n%.c: %.b\n\tcp $< $@\n",
        );
        let plan = plan(&mk, &["a.c"]).unwrap();
        assert_eq!(prerequisites(&plan, "a.c"), ["a.b"]);
        assert_eq!(prerequisites(&plan, "a.b"), ["a.a"]);
        let c = plan.index_of("a.c").unwrap();
        assert_eq!(plan.nodes[c].rules[0].stem, "a");
    }

    #[test]
    fn explicit_recipe_wins_over_implicit_rule() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("x.c"), "").unwrap();
        let mk = makefile(
            dir.path(),
            "%.o: %.c\n\tcc -c $<\nx.o: extra.h\n\techo explicit\nextra.h:\n",
        );
        let plan = plan(&mk, &["x.o"]).unwrap();
        assert_eq!(prerequisites(&plan, "x.o"), ["extra.h"]);
        assert_eq!(plan.nodes[plan.index_of("x.o").unwrap()].rules[0].commands.len(), 1);
    }

    #[test]
    fn prerequisites_without_a_recipe_join_the_implicit_rule() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("x.c"), "").unwrap();
        fs::write(dir.path().join("x.h"), "").unwrap();
        let mk = makefile(dir.path(), "%.o: %.c\n\tcc -c $<\nx.o: x.h\n");
        let plan = plan(&mk, &["x.o"]).unwrap();
        assert_eq!(prerequisites(&plan, "x.o"), ["x.c", "x.h"]);
    }

    #[test]
    fn static_patterns_bind_stems() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("one.c"), "").unwrap();
        fs::write(dir.path().join("two.c"), "").unwrap();
        let mk = makefile(dir.path(), "objs = one.o two.o\n$(objs): %.o: %.c\n\tcc -c $<\n");
        let plan = plan(&mk, &["one.o", "two.o"]).unwrap();
        assert_eq!(prerequisites(&plan, "two.o"), ["two.c"]);
        assert_eq!(plan.nodes[plan.index_of("one.o").unwrap()].rules[0].stem, "one");
        assert_eq!(plan.goals.len(), 2);
    }

    #[test]
    fn double_colon_rules_stay_separate() {
        let dir = tempfile::tempdir().unwrap();
        let mk = makefile(dir.path(), "all:: a\n\techo 1\nall:: b\n\techo 2\na:\nb:\n");
        let plan = plan(&mk, &["all"]).unwrap();
        let all = &plan.nodes[plan.index_of("all").unwrap()];
        assert!(all.double_colon);
        assert_eq!(all.rules.len(), 2);
    }

    #[test]
    fn vpath_locates_prerequisites() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/main.c"), "").unwrap();
        let mk = makefile(dir.path(), "VPATH = src\nmain.o: main.c\n\tcc -c $<\n");
        let plan = plan(&mk, &["main.o"]).unwrap();
        let source = &plan.nodes[plan.index_of("main.c").unwrap()];
        assert_eq!(source.path, "src/main.c");
        assert!(source.mtime.is_some());
    }

    #[test]
    fn phony_targets_skip_implicit_search() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("clean.c"), "").unwrap();
        let mk = makefile(dir.path(), ".PHONY: clean\n%: %.c\n\tcc $< -o $@\nclean:\n\trm -f x\n");
        let plan = plan(&mk, &["clean"]).unwrap();
        let clean = &plan.nodes[plan.index_of("clean").unwrap()];
        assert!(clean.phony);
        assert!(clean.dependencies.is_empty());
    }

    #[test]
    fn first_ordinary_target_is_the_default() {
        let dir = tempfile::tempdir().unwrap();
        let mut mk = makefile(dir.path(), ".PHONY: all\n%.o: %.c\nall: prog\nprog:\n");
        assert_eq!(mk.default_goal().unwrap().as_deref(), Some("all"));
        let mut mk = makefile(dir.path(), "first:\n.DEFAULT_GOAL := second\nsecond:\n");
        assert_eq!(mk.default_goal().unwrap().as_deref(), Some("second"));
    }
}
