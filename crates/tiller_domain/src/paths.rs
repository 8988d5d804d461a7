use std::path::{Path, PathBuf};

pub const TILLER_ROOT_ENV: &str = "TILLER_ROOT";
pub const TILLER_CLAUDE_BIN_ENV: &str = "TILLER_CLAUDE_BIN";
pub const TILLER_CODEX_BIN_ENV: &str = "TILLER_CODEX_BIN";
pub const TILLER_OPENCODE_BIN_ENV: &str = "TILLER_OPENCODE_BIN";

pub fn sqlite_path(tiller_root: &Path) -> PathBuf {
    tiller_root.join("tiller.db")
}

pub fn blobs_root(tiller_root: &Path) -> PathBuf {
    tiller_root.join("blobs")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roots_join_to_expected_paths() {
        let base = PathBuf::from("tiller-root");
        assert_eq!(sqlite_path(&base), base.join("tiller.db"));
        assert_eq!(blobs_root(&base), base.join("blobs"));
        assert_eq!(TILLER_ROOT_ENV, "TILLER_ROOT");
        assert_eq!(TILLER_CLAUDE_BIN_ENV, "TILLER_CLAUDE_BIN");
        assert_eq!(TILLER_CODEX_BIN_ENV, "TILLER_CODEX_BIN");
        assert_eq!(TILLER_OPENCODE_BIN_ENV, "TILLER_OPENCODE_BIN");
    }
}
