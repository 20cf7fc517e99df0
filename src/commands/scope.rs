use colored::Colorize;

use crate::engine::Engine;
use crate::errors::Result;

/// Show or change the logical scope of the current branch. Scopes group
/// branches for `merge --scope`; children inherit them.
pub fn run(set: Option<String>, clear: bool) -> Result<()> {
    let mut engine = Engine::open()?;
    let branch = engine.require_current_stack_branch()?;

    if clear {
        engine.begin("scope", &["--clear".to_string()])?;
        engine.graph.set_scope(&branch, None);
        engine.commit()?;
        println!("{} Cleared scope of {}", "✓".green().bold(), branch);
        return Ok(());
    }

    match set {
        Some(scope) => {
            engine.begin("scope", &[scope.clone()])?;
            engine.graph.set_scope(&branch, Some(scope.clone()));
            engine.commit()?;
            println!(
                "{} Scope of {} set to {}",
                "✓".green().bold(),
                branch.green(),
                scope
            );
        }
        None => match engine.graph.effective_scope(&branch)? {
            Some(scope) => {
                let own = engine
                    .graph
                    .metadata(&branch)
                    .and_then(|m| m.scope.as_deref())
                    .is_some();
                if own {
                    println!("{}", scope);
                } else {
                    println!("{} (inherited)", scope);
                }
            }
            None => println!("{} No scope set", "ℹ".blue()),
        },
    }
    Ok(())
}
