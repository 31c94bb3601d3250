//! One-time move of pre-encryption session files into the config directory.

use std::fs;
use std::path::Path;

use super::set_private_file;

/// Move each of `files` from `legacy_dir` into `dir` when the destination is
/// still empty. The copy stays plaintext here; the first read re-encrypts it.
///
/// Failures are logged and skipped: the worst case is a fresh login.
pub fn migrate_legacy_files(legacy_dir: &Path, dir: &Path, files: &[&str]) -> usize {
    let mut migrated = 0;

    for name in files {
        let legacy = legacy_dir.join(name);
        let target = dir.join(name);

        if legacy == target || !legacy.is_file() || target.exists() {
            continue;
        }

        if let Err(e) = fs::copy(&legacy, &target) {
            tracing::warn!("Failed to migrate {}: {}", legacy.display(), e);
            continue;
        }
        if let Err(e) = set_private_file(&target) {
            tracing::warn!("Failed to restrict permissions on {}: {:#}", target.display(), e);
        }
        if let Err(e) = fs::remove_file(&legacy) {
            tracing::warn!("Migrated {} but could not remove it: {}", legacy.display(), e);
        }

        tracing::info!("Migrated {} to {}", name, dir.display());
        migrated += 1;
    }

    migrated
}
