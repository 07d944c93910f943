//! Per-user base directories that geosweep keeps files under.

use std::ffi::OsString;
use std::path::PathBuf;

/// Application directory name under every base directory.
pub const APP_DIR: &str = "geosweep";

/// Which XDG base directory to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseDir {
    /// `$XDG_CONFIG_HOME`, else `~/.config`.
    Config,
    /// `$XDG_STATE_HOME`, else `%LOCALAPPDATA%` on Windows, else `~/.local/state`.
    State,
}

impl BaseDir {
    fn xdg_var(self) -> &'static str {
        match self {
            BaseDir::Config => "XDG_CONFIG_HOME",
            BaseDir::State => "XDG_STATE_HOME",
        }
    }

    fn platform_var(self) -> Option<&'static str> {
        match self {
            BaseDir::Config => None,
            BaseDir::State if cfg!(windows) => Some("LOCALAPPDATA"),
            BaseDir::State => None,
        }
    }

    fn home_suffix(self) -> &'static [&'static str] {
        match self {
            BaseDir::Config => &[".config"],
            BaseDir::State => &[".local", "state"],
        }
    }
}

/// `<base>/geosweep` for `kind`, read from the process environment.
pub fn app_dir(kind: BaseDir) -> anyhow::Result<PathBuf> {
    Ok(resolve(kind, |name| std::env::var_os(name))?.join(APP_DIR))
}

fn non_empty(name: &str, value: OsString) -> anyhow::Result<PathBuf> {
    if value.is_empty() {
        anyhow::bail!("{name} is set but empty");
    }
    Ok(PathBuf::from(value))
}

fn resolve<F>(kind: BaseDir, lookup: F) -> anyhow::Result<PathBuf>
where
    F: Fn(&str) -> Option<OsString>,
{
    let candidates = std::iter::once(kind.xdg_var()).chain(kind.platform_var());
    for name in candidates {
        if let Some(value) = lookup(name) {
            return non_empty(name, value);
        }
    }

    let home = lookup("HOME").ok_or_else(|| anyhow::anyhow!("HOME is not set"))?;
    let mut dir = non_empty("HOME", home)?;
    dir.extend(kind.home_suffix());
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<OsString> {
        let map: HashMap<String, OsString> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), OsString::from(v)))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn xdg_variable_wins_over_home() {
        let lookup = env(&[("XDG_STATE_HOME", "/var/state"), ("HOME", "/home/ana")]);
        assert_eq!(resolve(BaseDir::State, lookup).unwrap(), PathBuf::from("/var/state"));
    }

    #[test]
    fn home_fallback_per_kind() {
        let lookup = env(&[("HOME", "/home/ana")]);
        assert_eq!(
            resolve(BaseDir::Config, &lookup).unwrap(),
            PathBuf::from("/home/ana/.config")
        );
        if !cfg!(windows) {
            assert_eq!(
                resolve(BaseDir::State, &lookup).unwrap(),
                PathBuf::from("/home/ana/.local/state")
            );
        }
    }

    #[test]
    fn empty_values_are_errors() {
        let err = resolve(BaseDir::Config, env(&[("XDG_CONFIG_HOME", "")])).unwrap_err();
        assert!(err.to_string().contains("XDG_CONFIG_HOME"));
        let err = resolve(BaseDir::Config, env(&[("HOME", "")])).unwrap_err();
        assert!(err.to_string().contains("HOME"));
        assert!(resolve(BaseDir::State, env(&[])).is_err());
    }
}
