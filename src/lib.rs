//! A GNU-compatible make: makefiles are read into variables and a rule
//! graph, makefiles that are out of date are remade (restarting the read),
//! and then the goals are built by a parallel scheduler.

pub mod config;
pub mod error;
pub mod expand;
pub mod graph;
pub mod makefile;
pub mod parser;
pub mod pattern;
pub mod scheduler;
pub mod variables;
pub mod vpath;

use std::fs;
use std::time::SystemTime;

pub use config::Config;
pub use error::{MakeError, Result};
pub use makefile::Makefile;

use config::DEFAULT_MAKEFILES;
use scheduler::Mode;

/// Name used to prefix messages.
pub const PROGRAM: &str = "rsmake";

/// Bound on re-reading the makefiles after remaking them.
const MAX_RESTARTS: usize = 10;

fn modified(makefile: &Makefile, name: &str) -> Option<SystemTime> {
    fs::metadata(makefile.path(name)).and_then(|m| m.modified()).ok()
}

/// Reads the makefiles named by `config`, or the first default name found.
pub fn load(config: &Config, restarts: usize) -> Result<Makefile> {
    let mut makefile = Makefile::new(config, restarts);
    let names: Vec<String> = if config.makefiles.is_empty() {
        DEFAULT_MAKEFILES
            .iter()
            .find(|name| makefile.path(name).is_file())
            .map(|name| vec![name.to_string()])
            .unwrap_or_default()
    } else {
        config
            .makefiles
            .iter()
            .map(|p| p.display().to_string())
            .collect()
    };
    if names.is_empty() && config.goals.is_empty() {
        return Err(MakeError::Usage(
            "No targets specified and no makefile found".to_string(),
        ));
    }
    for name in &names {
        if !makefile.path(name).is_file() {
            return Err(MakeError::MissingInclude {
                loc: None,
                path: name.into(),
            });
        }
        makefile.read_makefile(name)?;
    }
    makefile.finish_parsing()?;
    Ok(makefile)
}

/// Runs a whole invocation: read, remake makefiles, build the goals.
pub async fn run(config: &Config) -> Result<()> {
    let mut restarts = 0;
    loop {
        let mut makefile = load(config, restarts)?;

        let makefiles = makefile.makefile_goals();
        let before: Vec<Option<SystemTime>> = makefiles.iter().map(|m| modified(&makefile, m)).collect();
        let outcome = scheduler::build(&makefile, config, &makefiles, Mode::Makefiles).await?;
        if let Some(e) = makefile.missing_include() {
            return Err(e);
        }
        let changed = makefiles
            .iter()
            .zip(&before)
            .filter(|(m, _)| outcome.remade.contains(*m))
            .any(|(m, was)| match (modified(&makefile, m), was) {
                (Some(now), Some(was)) => now > *was,
                (Some(_), None) => true,
                (None, _) => false,
            });
        if changed {
            if restarts < MAX_RESTARTS {
                restarts += 1;
                tracing::info!("makefiles were remade, reading them again (restart {})", restarts);
                continue;
            }
            tracing::warn!("makefiles still changing after {} restarts", restarts);
        }

        let goals = if config.goals.is_empty() {
            match makefile.default_goal()? {
                Some(goal) => vec![goal],
                None => return Err(MakeError::Usage("No targets".to_string())),
            }
        } else {
            config.goals.clone()
        };
        scheduler::build(&makefile, config, &goals, Mode::Goals).await?;
        return Ok(());
    }
}
