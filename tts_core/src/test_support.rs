//! Fake engine scripts shared by the unit tests.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// Every script lives in one directory created before any test spawns a
// process, so no script is still open for writing when it is executed.
fn engines() -> &'static Path {
    static DIR: OnceLock<tempfile::TempDir> = OnceLock::new();
    DIR.get_or_init(|| {
        let dir = tempfile::tempdir().unwrap();
        let scripts = [
            ("echo", "echo \"$@\"\ncat\n"),
            ("large", "cat > /dev/null\nhead -c 10000 /dev/zero\n"),
            ("slow", "cat > /dev/null\necho $$\nexec sleep 30\n"),
            ("pcm", "cat > /dev/null\nprintf 'pcm'\n"),
        ];
        for (name, body) in scripts {
            let path = dir.path().join(name);
            std::fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        dir
    })
    .path()
}

pub fn engine_script(name: &str) -> PathBuf {
    engines().join(name)
}
