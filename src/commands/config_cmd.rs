use colored::Colorize;

use crate::config::Config;
use crate::errors::Result;
use crate::git_gateway::GitGateway;

/// `config get <key>`
pub fn get(key: &str) -> Result<()> {
    let gateway = GitGateway::discover()?;
    let config = Config::load(gateway.git_dir())?;
    println!("{}", config.get(key)?);
    Ok(())
}

/// `config set <key> <value>`
pub fn set(key: &str, value: &str) -> Result<()> {
    let gateway = GitGateway::discover()?;
    let mut config = Config::load(gateway.git_dir())?;
    config.set(key, value)?;
    config.save(gateway.git_dir())?;
    println!("{} {} = {}", "✓".green(), key, value);
    Ok(())
}

/// `config list`
pub fn list() -> Result<()> {
    let gateway = GitGateway::discover()?;
    let config = Config::load(gateway.git_dir())?;
    for (key, value) in config.list() {
        println!("{} = {}", key, value);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_context::{init_test_repo, TestRepoContext};
    use tempfile::tempdir;

    #[test]
    fn test_get_set_round_trip() {
        let dir = tempdir().unwrap();
        let _repo = init_test_repo(dir.path()).unwrap();
        let gateway = GitGateway::from_path(dir.path()).unwrap();
        Config::new("main".to_string())
            .save(gateway.git_dir())
            .unwrap();
        let _ctx = TestRepoContext::new(dir.path());

        set("undo_stack_depth", "7").unwrap();
        let config = Config::load(gateway.git_dir()).unwrap();
        assert_eq!(config.undo_stack_depth, 7);

        get("trunk").unwrap();
        list().unwrap();
    }

    #[test]
    fn test_unknown_key_is_user_error() {
        let dir = tempdir().unwrap();
        let _repo = init_test_repo(dir.path()).unwrap();
        let gateway = GitGateway::from_path(dir.path()).unwrap();
        Config::new("main".to_string())
            .save(gateway.git_dir())
            .unwrap();
        let _ctx = TestRepoContext::new(dir.path());

        let err = set("bogus", "1").unwrap_err();
        assert_eq!(err.exit_code(), 1);
    }
}
