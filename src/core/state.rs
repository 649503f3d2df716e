//! Hosts lock file: load, save (atomic), record and forget hosts.

use super::types::{HostRecord, HostsLock};
use std::path::{Path, PathBuf};

/// Lock file location inside the state directory.
pub fn lock_file_path(state_dir: &Path) -> PathBuf {
    state_dir.join("hosts.lock.yaml")
}

/// Create a new empty lock.
pub fn new_lock() -> HostsLock {
    HostsLock {
        schema: "1.0".to_string(),
        generator: format!("stretch {}", env!("CARGO_PKG_VERSION")),
        hosts: indexmap::IndexMap::new(),
    }
}

/// Load the lock. Returns None if the file doesn't exist.
pub fn load_lock(state_dir: &Path) -> Result<Option<HostsLock>, String> {
    let path = lock_file_path(state_dir);
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    let lock: HostsLock = serde_yaml_ng::from_str(&content)
        .map_err(|e| format!("invalid lock file {}: {}", path.display(), e))?;
    Ok(Some(lock))
}

/// Save the lock atomically (write to temp, then rename).
pub fn save_lock(state_dir: &Path, lock: &HostsLock) -> Result<(), String> {
    let path = lock_file_path(state_dir);
    std::fs::create_dir_all(state_dir)
        .map_err(|e| format!("cannot create dir {}: {}", state_dir.display(), e))?;

    let yaml = serde_yaml_ng::to_string(lock).map_err(|e| format!("serialize error: {}", e))?;

    let tmp_path = path.with_extension("yaml.tmp");
    std::fs::write(&tmp_path, &yaml)
        .map_err(|e| format!("cannot write {}: {}", tmp_path.display(), e))?;
    std::fs::rename(&tmp_path, &path).map_err(|e| {
        format!(
            "cannot rename {} to {}: {}",
            tmp_path.display(),
            path.display(),
            e
        )
    })?;

    Ok(())
}

/// Add or replace a host record.
pub fn record_host(state_dir: &Path, host: &HostRecord) -> Result<(), String> {
    let mut lock = load_lock(state_dir)?.unwrap_or_else(new_lock);
    lock.hosts.insert(host.name.clone(), host.clone());
    save_lock(state_dir, &lock)
}

/// Remove a host record, returning it if it existed.
pub fn forget_host(state_dir: &Path, name: &str) -> Result<Option<HostRecord>, String> {
    let Some(mut lock) = load_lock(state_dir)? else {
        return Ok(None);
    };
    let removed = lock.hosts.shift_remove(name);
    if removed.is_some() {
        save_lock(state_dir, &lock)?;
    }
    Ok(removed)
}

/// All recorded hosts in insertion order.
pub fn list_hosts(state_dir: &Path) -> Result<Vec<HostRecord>, String> {
    Ok(load_lock(state_dir)?
        .map(|lock| lock.hosts.into_values().collect())
        .unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_host(name: &str) -> HostRecord {
        HostRecord {
            name: name.to_string(),
            service: "web".to_string(),
            server_id: format!("srv-{}", name),
            address: "10.0.0.5".to_string(),
            image_id: "img-1".to_string(),
            flavor: "512MB Standard Instance".to_string(),
            key_fingerprint: Some("blake3:abc".to_string()),
            created_at: "2026-02-16T14:00:00Z".to_string(),
        }
    }

    #[test]
    fn test_lock_file_path() {
        let p = lock_file_path(Path::new("/state"));
        assert_eq!(p, PathBuf::from("/state/hosts.lock.yaml"));
    }

    #[test]
    fn test_load_nonexistent() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_lock(dir.path()).unwrap().is_none());
        assert!(list_hosts(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut lock = new_lock();
        lock.hosts.insert("web-1".to_string(), make_host("web-1"));
        save_lock(dir.path(), &lock).unwrap();

        let loaded = load_lock(dir.path()).unwrap().unwrap();
        assert_eq!(loaded.hosts.len(), 1);
        assert_eq!(loaded.hosts["web-1"], make_host("web-1"));
    }

    #[test]
    fn test_atomic_write_cleans_temp() {
        let dir = tempfile::tempdir().unwrap();
        save_lock(dir.path(), &new_lock()).unwrap();
        assert!(!dir.path().join("hosts.lock.yaml.tmp").exists());
        assert!(lock_file_path(dir.path()).exists());
    }

    #[test]
    fn test_record_and_forget() {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("state");
        record_host(&state, &make_host("web-b")).unwrap();
        record_host(&state, &make_host("web-a")).unwrap();

        let names: Vec<_> = list_hosts(&state)
            .unwrap()
            .into_iter()
            .map(|h| h.name)
            .collect();
        assert_eq!(names, vec!["web-b", "web-a"]);

        let removed = forget_host(&state, "web-b").unwrap();
        assert_eq!(removed.map(|h| h.name).as_deref(), Some("web-b"));
        assert!(forget_host(&state, "web-b").unwrap().is_none());
        assert_eq!(list_hosts(&state).unwrap().len(), 1);
    }

    #[test]
    fn test_forget_without_lock() {
        let dir = tempfile::tempdir().unwrap();
        assert!(forget_host(dir.path(), "ghost").unwrap().is_none());
        assert!(!lock_file_path(dir.path()).exists());
    }

    #[test]
    fn test_invalid_lock_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(lock_file_path(dir.path()), "hosts: [not, a, map]\n").unwrap();
        let err = load_lock(dir.path()).unwrap_err();
        assert!(err.contains("invalid lock file"));
    }
}
