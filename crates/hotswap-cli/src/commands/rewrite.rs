//! `hotswap rewrite`: dry-run a manipulation plan over class binaries.
//!
//! Runs the agent's dispatcher in the root scope with retrofitting off, so
//! every plan entry is visible and nothing outside the inputs is touched.

use super::read_class;
use crate::output::StyledOutput;
use anyhow::Context;
use hotswap_bytecode::{verify_class, ClassFile};
use hotswap_core::{AgentConfig, AgentState, ManipulationPlan, Transformer};
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Arguments for the rewrite command.
pub struct RewriteArgs {
    pub plan: PathBuf,
    pub out: PathBuf,
    pub config: Option<PathBuf>,
    pub files: Vec<PathBuf>,
}

/// What happened to one input
#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    Rewritten(PathBuf),
    Unchanged(PathBuf),
}

pub fn execute(args: RewriteArgs, color: &str) -> anyhow::Result<usize> {
    let plan = ManipulationPlan::from_file(&args.plan)?;
    let config = match &args.config {
        Some(path) => AgentConfig::from_file(path)?,
        None => AgentConfig::default(),
    };
    let transformer = dispatcher(&plan, config)?;

    std::fs::create_dir_all(&args.out)
        .with_context(|| format!("cannot create {}", args.out.display()))?;

    let mut out = StyledOutput::new(color);
    out.info(&format!(
        "Applying {} manipulation(s) from {}",
        plan.len(),
        args.plan.display()
    ));
    out.newline();

    let mut failed = 0;
    for file in &args.files {
        match rewrite_file(&transformer, file, &args.out) {
            Ok(Outcome::Rewritten(path)) => {
                out.ok_badge();
                out.plain(&format!(" {} -> {}", file.display(), path.display()));
                out.newline();
            }
            Ok(Outcome::Unchanged(path)) => {
                out.skip_badge();
                out.plain(&format!(" {} -> {}", file.display(), path.display()));
                out.dim(" (no manipulation applied)");
                out.newline();
            }
            Err(error) => {
                failed += 1;
                out.fail_badge();
                out.plain(&format!(" {}", file.display()));
                out.newline();
                out.stderr_error(&format!("  {:#}", error));
            }
        }
    }

    out.newline();
    if failed == 0 {
        out.success(&format!("{} file(s) processed", args.files.len()));
    } else {
        out.warning(&format!("{} of {} file(s) failed", failed, args.files.len()));
    }
    out.newline();
    Ok(failed)
}

/// Dispatcher with every plan entry installed for the root scope
fn dispatcher(plan: &ManipulationPlan, config: AgentConfig) -> anyhow::Result<Transformer> {
    let config = AgentConfig {
        retrofit_scopes: false,
        ..config.with_env_overrides()
    };
    config.validate()?;

    let state = Arc::new(AgentState::new(config));
    let mut installed = 0;
    for (type_name, manipulation) in plan.to_manipulations(None)? {
        if state.registry().add(&type_name, manipulation) {
            installed += 1;
        }
    }
    tracing::debug!(installed, "plan installed");
    Ok(Transformer::new(state, None))
}

fn rewrite_file(transformer: &Transformer, file: &Path, out_dir: &Path) -> anyhow::Result<Outcome> {
    let (bytes, class) = read_class(file)?;
    let file_name = file
        .file_name()
        .with_context(|| format!("{} has no file name", file.display()))?;
    let target = out_dir.join(file_name);

    let rewritten = transformer
        .transform_class(&class.name, None, &bytes)
        .with_context(|| format!("cannot rewrite {}", class.name))?;
    let changed = matches!(rewritten, Cow::Owned(_));
    if changed {
        let output = ClassFile::decode(&rewritten)?;
        verify_class(&output)
            .with_context(|| format!("rewritten {} failed verification", class.name))?;
    }

    std::fs::write(&target, &rewritten)
        .with_context(|| format!("cannot write {}", target.display()))?;
    tracing::debug!(type_name = %class.name, path = %target.display(), changed, "binary written");

    Ok(if changed {
        Outcome::Rewritten(target)
    } else {
        Outcome::Unchanged(target)
    })
}
