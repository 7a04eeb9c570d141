use rsmake::error::{Location, MakeError};
use rsmake::expand::Expander;
use rsmake::variables::{Flavor, Origin};
use rsmake::{Config, Makefile};

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_with(config: &Config, text: &str) -> Makefile {
        let mut mk = Makefile::new(config, 0);
        mk.parse_text(text, "Makefile", 1).unwrap();
        mk
    }

    fn parse(text: &str) -> Makefile {
        parse_with(&Config::new("/tmp"), text)
    }

    fn var(mk: &mut Makefile, name: &str) -> String {
        let loc = Location::internal("test");
        Expander::new(mk, &loc).variable(name).unwrap()
    }

    #[test]
    fn text_functions() {
        let mut mk = parse(
            "STRIPPED := $(strip $(NULL)  test data  )\n\
             SECOND := $(word 2, hello )\n\
             COUNT := $(words )\n\
             FIRST := $(firstword )\n\
             DIRS := $(dir foo.c path/foo.o dir/dir2/)\n\
             FILES := $(notdir foo.c path/foo.o dir/dir2/)\n\
             SORTED := $(sort c b a b)\n\
             SUBST := $(subst ee,EE,feet on the street)\n\
             LIST := $(wordlist 2,3,a b c d)\n\
             OBJS := $(patsubst %.c,%.o,a.c b.c c.h)\n",
        );
        assert_eq!(var(&mut mk, "STRIPPED"), "test data");
        assert_eq!(var(&mut mk, "SECOND"), "");
        assert_eq!(var(&mut mk, "COUNT"), "0");
        assert_eq!(var(&mut mk, "FIRST"), "");
        assert_eq!(var(&mut mk, "DIRS"), "./ path/ dir/dir2/");
        assert_eq!(var(&mut mk, "FILES"), "foo.c foo.o ");
        assert_eq!(var(&mut mk, "SORTED"), "a b c");
        assert_eq!(var(&mut mk, "SUBST"), "fEEt on the strEEt");
        assert_eq!(var(&mut mk, "LIST"), "b c");
        assert_eq!(var(&mut mk, "OBJS"), "a.o b.o c.h");
    }

    #[test]
    fn substitution_references() {
        let mut mk = parse(
            "SIMPLEVAR := aabb.cc\n\
             SUFFIX := $(SIMPLEVAR:.cc=.dd)\n\
             NOEQ := $(SIMPLEVAR:.cc)\n\
             PAT := $(SIMPLEVAR:aa%.cc=ff%.f)\n\
             NAME := SIMPLEVAR:.cc=.ee\n\
             COMPUTED := $($(NAME))\n",
        );
        assert_eq!(var(&mut mk, "SUFFIX"), "aabb.dd");
        assert_eq!(var(&mut mk, "NOEQ"), "");
        assert_eq!(var(&mut mk, "PAT"), "ffbb.f");
        // The computed name is looked up as it is, not as a substitution.
        assert_eq!(var(&mut mk, "COMPUTED"), "");
    }

    #[test]
    fn dead_branches_are_never_expanded() {
        let mut mk = parse(
            "ifdef UNDEFINED\n\
             $(error first branch)\n\
             else ifdef ALSO_UNDEFINED\n\
             $(error second branch)\n\
             ifeq ($(error nested condition),x)\n\
             endif\n\
             else\n\
             RESULT = taken\n\
             ifndef UNDEFINED\n\
             NESTED = yes\n\
             else\n\
             $(error nested else)\n\
             endif\n\
             endif\n",
        );
        assert_eq!(var(&mut mk, "RESULT"), "taken");
        assert_eq!(var(&mut mk, "NESTED"), "yes");
    }

    #[test]
    fn ifeq_whitespace() {
        let mut mk = parse(
            "ifeq ( a,a)\nLEADING = equal\nendif\n\
             ifeq (a, a)\nAFTER_COMMA = equal\nendif\n\
             ifeq (a,a )\nTRAILING = equal\nendif\n\
             ifneq 'x' \"y\"\nQUOTED = different\nendif\n",
        );
        assert_eq!(var(&mut mk, "LEADING"), "");
        assert_eq!(var(&mut mk, "AFTER_COMMA"), "equal");
        assert_eq!(var(&mut mk, "TRAILING"), "");
        assert_eq!(var(&mut mk, "QUOTED"), "different");
    }

    #[test]
    fn comments_and_continuations() {
        let mut mk = parse(
            "VAR = val1 # comment\n\
             VAR2 = literal\\#hash\n\
             # a comment that continues \\\n\
             HIDDEN = oops\n\
             MULTI = one \\\n    two\n",
        );
        assert_eq!(var(&mut mk, "VAR"), "val1 ");
        assert_eq!(var(&mut mk, "VAR2"), "literal#hash");
        assert_eq!(var(&mut mk, "HIDDEN"), "");
        assert_eq!(var(&mut mk, "MULTI"), "one two");
    }

    #[test]
    fn flavors_and_operators() {
        let mut mk = parse(
            "R = a\n\
             R += $(LATER)\n\
             LATER = b\n\
             B2 := x\n\
             S := a\n\
             S += $(B2)\n\
             B2 := changed\n\
             Q ?= first\n\
             Q ?= second\n\
             SS ::= simple\n\
             SH != echo hi; echo there\n\
             VARNAME = DYNAMIC\n\
             $(VARNAME) = foovalue\n",
        );
        assert_eq!(var(&mut mk, "R"), "a b");
        assert_eq!(var(&mut mk, "S"), "a x");
        assert_eq!(var(&mut mk, "Q"), "first");
        assert_eq!(var(&mut mk, "SH"), "hi there");
        assert_eq!(var(&mut mk, "DYNAMIC"), "foovalue");
        assert_eq!(mk.variables.get("R").unwrap().flavor, Flavor::Recursive);
        assert_eq!(mk.variables.get("S").unwrap().flavor, Flavor::Simple);
        assert_eq!(mk.variables.get("SS").unwrap().flavor, Flavor::Simple);
    }

    #[test]
    fn self_reference_keeps_raw_text() {
        let mut mk = parse("TEST = $(TEST)\nRAW := $(value TEST)\n");
        assert_eq!(var(&mut mk, "RAW"), "$(TEST)");
        assert_eq!(var(&mut mk, "TEST"), "$(TEST)");
    }

    #[test]
    fn define_call_and_foreach() {
        let mut mk = parse(
            "define reverse\n\
             $(2) $(1)\n\
             endef\n\
             SWAPPED := $(call reverse,a,b)\n\
             LOOP := $(foreach v,a b c,<$(v)>)\n\
             define TWO_LINES :=\n\
             first\n\
             second\n\
             endef\n",
        );
        assert_eq!(var(&mut mk, "SWAPPED"), "b a");
        assert_eq!(var(&mut mk, "LOOP"), "<a> <b> <c>");
        assert_eq!(var(&mut mk, "TWO_LINES"), "first\nsecond");
    }

    #[test]
    fn origin_and_flavor() {
        let mut config = Config::new("/tmp");
        config.variables.push(("OBASIC".to_string(), "oval".to_string()));
        let mut mk = parse_with(
            &config,
            "OBASIC = file\n\
             OBASIC := file too\n\
             OBASIC += more\n\
             FILEVAR = x\n\
             ORIGINS := $(origin OBASIC) $(origin FILEVAR) $(origin NOPE)\n\
             FLAVORS := $(flavor FILEVAR) $(flavor ORIGINS) $(flavor NOPE)\n",
        );
        assert_eq!(var(&mut mk, "OBASIC"), "oval");
        assert_eq!(mk.variables.get("OBASIC").unwrap().origin, Origin::CommandLine);
        assert_eq!(var(&mut mk, "ORIGINS"), "command line file undefined");
        assert_eq!(var(&mut mk, "FLAVORS"), "recursive simple undefined");
    }

    #[test]
    fn override_beats_the_command_line() {
        let mut config = Config::new("/tmp");
        config.variables.push(("CFLAGS".to_string(), "-g".to_string()));
        let mut mk = parse_with(&config, "override CFLAGS += -Wall\n");
        assert_eq!(var(&mut mk, "CFLAGS"), "-g -Wall");
    }

    #[test]
    fn eval_defines_variables() {
        let mut mk = parse("$(eval EVALED = yes)\n");
        assert_eq!(var(&mut mk, "EVALED"), "yes");
    }

    #[test]
    fn errors() {
        let mut mk = Makefile::new(&Config::new("/tmp"), 0);
        let err = mk.parse_text("$(error boom)\n", "Makefile", 1).unwrap_err();
        assert!(matches!(err, MakeError::Eval { ref message, .. } if message == "boom"));

        let err = mk.parse_text("just words\n", "Makefile", 1).unwrap_err();
        assert!(matches!(err, MakeError::Syntax { ref message, .. } if message == "missing separator"));

        let err = mk.parse_text("ifdef X\n", "Makefile", 1).unwrap_err();
        assert!(matches!(err, MakeError::Syntax { ref message, .. } if message == "missing 'endif'"));

        let err = mk.parse_text("X := $(call nosuch,1)\n", "Makefile", 1).unwrap_err();
        assert!(matches!(err, MakeError::UndefinedFunction { ref name, .. } if name == "nosuch"));

        let err = mk.parse_text("endif\n", "Makefile", 3).unwrap_err();
        match err {
            MakeError::Syntax { loc, .. } => assert_eq!(loc, Location::new("Makefile", 3)),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn makefile_list_tracks_includes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("Makefile"),
            "include inc.mk\nLIST := $(MAKEFILE_LIST)\n-include missing.mk\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("inc.mk"), "INNER := $(lastword $(MAKEFILE_LIST))\n").unwrap();
        let mut mk = Makefile::new(&Config::new(dir.path()), 0);
        mk.read_makefile("Makefile").unwrap();
        assert_eq!(var(&mut mk, "INNER"), "inc.mk");
        assert_eq!(var(&mut mk, "LIST"), "Makefile inc.mk");
        assert!(mk.missing_include().is_none());
        assert_eq!(mk.makefile_goals(), ["Makefile", "inc.mk", "missing.mk"]);
    }

    #[test]
    fn wildcard_skips_dotfiles() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.c", "b.c", ".hidden.c", "c.h"] {
            std::fs::write(dir.path().join(name), "").unwrap();
        }
        let mut mk = parse_with(
            &Config::new(dir.path()),
            "SOURCES := $(sort $(wildcard *.c))\nDOT := $(wildcard .*.c)\n",
        );
        assert_eq!(var(&mut mk, "SOURCES"), "a.c b.c");
        assert_eq!(var(&mut mk, "DOT"), ".hidden.c");
    }
}
