use std::fmt::Write;

/// Directory in the build context reserved for generated files
pub const RESERVED_PREFIX: &str = ".sandbox/";
/// Generated Dockerfile inside the build context
pub const DOCKERFILE_PATH: &str = ".sandbox/Dockerfile";
/// Generated entrypoint inside the build context
pub const ENTRYPOINT_PATH: &str = ".sandbox/entrypoint.sh";
/// Where the working directory is mounted
pub const SANDBOX_DATA_DIR: &str = "/data";
/// Where captured stdout files are written
pub const SANDBOX_TMP_DIR: &str = "/tmp";

/// Inputs to the generated Dockerfile and entrypoint
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SandboxSpec {
    /// Base image
    pub image: String,
    /// APT packages installed on top of the base image
    pub apt: Vec<String>,
    /// Shell commands, run in order
    pub run: Vec<String>,
}

/// Single-quote `text` for `/bin/sh`
#[must_use]
pub fn quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', r"'\''"))
}

/// Render the Dockerfile for `spec`
#[must_use]
pub fn render_dockerfile(spec: &SandboxSpec) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "FROM {}", spec.image);
    if !spec.apt.is_empty() {
        let _ = writeln!(out, "ENV DEBIAN_FRONTEND=noninteractive");
        let _ = writeln!(
            out,
            "RUN apt-get update && apt-get install -y {} && rm -rf /var/lib/apt/lists/*",
            spec.apt.join(" ")
        );
    }
    let _ = writeln!(out, "COPY . {SANDBOX_DATA_DIR}");
    let _ = writeln!(out, "COPY {ENTRYPOINT_PATH} /entrypoint.sh");
    let _ = writeln!(out, "WORKDIR {SANDBOX_DATA_DIR}");
    let _ = writeln!(out, r#"ENTRYPOINT ["/bin/sh", "/entrypoint.sh"]"#);
    out
}

/// Render the entrypoint for `spec`
///
/// Command `i` writes its stdout to `/tmp/stdout<i>.txt`. Every command runs
/// even when an earlier one fails; the script exits with the status of the
/// last failing command, or 0.
#[must_use]
pub fn render_entrypoint(spec: &SandboxSpec) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "#!/bin/sh");
    let _ = writeln!(out, "cd {SANDBOX_DATA_DIR}");
    let _ = writeln!(out, "status=0");
    for (i, command) in spec.run.iter().enumerate() {
        let quoted = quote(command);
        let _ = writeln!(out, "echo {} >&2", quote(&format!("$ {command}")));
        let _ = writeln!(
            out,
            "sh -c {quoted} > {SANDBOX_TMP_DIR}/stdout{i}.txt || status=$?"
        );
    }
    let _ = writeln!(out, "exit $status");
    out
}
