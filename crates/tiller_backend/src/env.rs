use anyhow::anyhow;
use std::path::PathBuf;

pub(crate) fn optional_trimmed_path_from_env(name: &str) -> anyhow::Result<Option<PathBuf>> {
    let Some(value) = std::env::var_os(name) else {
        return Ok(None);
    };
    let value = value.to_string_lossy();
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("{name} is set but empty"));
    }
    Ok(Some(PathBuf::from(trimmed)))
}

#[cfg(test)]
mod tests {
    use super::optional_trimmed_path_from_env;
    use std::path::PathBuf;
    use std::sync::{Mutex, MutexGuard, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn lock_env() -> MutexGuard<'static, ()> {
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().unwrap()
    }

    #[test]
    fn returns_none_when_unset() {
        let _guard = lock_env();
        unsafe {
            std::env::remove_var("TILLER_TEST_PATH_ENV");
        }
        let loaded =
            optional_trimmed_path_from_env("TILLER_TEST_PATH_ENV").expect("unset should not error");
        assert!(loaded.is_none());
    }

    #[test]
    fn errors_on_empty_and_trims_values() {
        let _guard = lock_env();
        unsafe {
            std::env::set_var("TILLER_TEST_PATH_ENV", "   ");
        }
        assert!(optional_trimmed_path_from_env("TILLER_TEST_PATH_ENV").is_err());

        unsafe {
            std::env::set_var("TILLER_TEST_PATH_ENV", " /opt/bin/codex ");
        }
        let loaded = optional_trimmed_path_from_env("TILLER_TEST_PATH_ENV").expect("should load");
        assert_eq!(loaded, Some(PathBuf::from("/opt/bin/codex")));
        unsafe {
            std::env::remove_var("TILLER_TEST_PATH_ENV");
        }
    }
}
