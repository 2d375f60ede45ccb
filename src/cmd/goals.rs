//! Goal listing and detection: `retrai goals`.

use std::path::Path;

use anyhow::Result;

use retrai::goals::{GoalRegistry, detect_goal};

pub fn cmd_goals(cwd: &Path, detect: bool) -> Result<()> {
    if detect {
        match detect_goal(cwd) {
            Some(goal) => println!("{}", goal),
            None => anyhow::bail!("No goal detected in {}", cwd.display()),
        }
        return Ok(());
    }

    let registry = GoalRegistry::with_defaults();
    let detected = detect_goal(cwd);
    println!("{}", console::style("Available goals").bold().cyan());
    for name in registry.names() {
        if Some(name.as_str()) == detected {
            println!("  {} {}", name, console::style("(detected)").green());
        } else {
            println!("  {}", name);
        }
    }
    Ok(())
}
