//! Shared fixture for integration tests: a throwaway working directory with
//! its own HOME (so `~/.netrc` and `~/.bashrc` never touch the real one) and
//! a helper that drives the compiled `sbas` binary inside it.
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

pub struct Sandbox {
    dir: TempDir,
}

impl Sandbox {
    pub fn new() -> Sandbox {
        let dir = TempDir::new().expect("create sandbox dir");
        // Step scripts `source ~/.bashrc` before doing anything else.
        fs::write(dir.path().join(".bashrc"), "").expect("write .bashrc");
        Sandbox { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Run `sbas` with the sandbox as both cwd and HOME, returning the raw
    /// output. Callers assert on status/stdout/stderr themselves.
    pub fn sbas(&self, args: &[&str]) -> Output {
        let bin = env!("CARGO_BIN_EXE_sbas");
        Command::new(bin)
            .args(args)
            .current_dir(self.path())
            .env("HOME", self.path())
            .output()
            .expect("spawn sbas")
    }

    #[allow(dead_code)]
    pub fn sbas_ok(&self, args: &[&str]) -> String {
        let out = self.sbas(args);
        assert!(
            out.status.success(),
            "sbas {args:?} failed:\nstdout: {}\nstderr: {}",
            String::from_utf8_lossy(&out.stdout),
            String::from_utf8_lossy(&out.stderr),
        );
        String::from_utf8_lossy(&out.stdout).into_owned()
    }

    /// Directory holding stub toolchain executables; pointed at by
    /// `environment.topsStack_dir` and `environment.scripts_dir` in tests.
    #[allow(dead_code)]
    pub fn tools_dir(&self) -> PathBuf {
        let dir = self.path().join("tools");
        fs::create_dir_all(&dir).expect("create tools dir");
        dir
    }

    /// Drop an executable stub into the tools dir. The body runs under
    /// `bash`; the `.py` names only matter to the invoking scripts.
    #[allow(dead_code)]
    pub fn write_tool(&self, name: &str, body: &str) {
        let path = self.tools_dir().join(name);
        fs::write(&path, format!("#!/bin/bash\n{body}\n")).expect("write tool stub");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod tool stub");
    }

    #[allow(dead_code)]
    pub fn read(&self, rel: &str) -> String {
        fs::read_to_string(self.path().join(rel))
            .unwrap_or_else(|err| panic!("read {rel}: {err}"))
    }

    #[allow(dead_code)]
    pub fn exists(&self, rel: &str) -> bool {
        self.path().join(rel).exists()
    }
}

impl Default for Sandbox {
    fn default() -> Self {
        Sandbox::new()
    }
}
