use anyhow::{Context, Result};
use tracing::info;

/// Load a `.env` file from the current directory or any parent directory,
/// searching upward to the filesystem root and loading the first one found.
/// Mirrors the teacher's ancestor-search convention for picking up
/// `DATABASE_URL`-style secrets during local development.
pub fn load_dotenv_from_ancestors() {
    if let Err(e) = try_load_dotenv_from_ancestors() {
        info!("{e:#}");
    }
}

fn try_load_dotenv_from_ancestors() -> Result<()> {
    let cwd = std::env::current_dir().context("failed to get current directory")?;

    let mut current = cwd.as_path();
    loop {
        let env_path = current.join(".env");
        if env_path.exists() {
            dotenvy::from_path(&env_path)
                .with_context(|| format!("failed to load .env from {}", env_path.display()))?;
            info!(path = %env_path.display(), "loaded .env");
            return Ok(());
        }
        match current.parent() {
            Some(parent) => current = parent,
            None => break,
        }
    }
    anyhow::bail!("no .env file found between {} and filesystem root", cwd.display())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    #[test]
    #[serial]
    fn finds_env_in_current_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".env"), "CDC_ENV_TEST=hello").unwrap();

        let original = std::env::current_dir().unwrap();
        std::env::set_current_dir(dir.path()).unwrap();
        std::env::remove_var("CDC_ENV_TEST");

        let result = try_load_dotenv_from_ancestors();

        std::env::set_current_dir(original).unwrap();
        assert!(result.is_ok());
        assert_eq!(std::env::var("CDC_ENV_TEST").unwrap(), "hello");
        std::env::remove_var("CDC_ENV_TEST");
    }
}
