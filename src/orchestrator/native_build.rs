//! Native-build exposure of an installed package

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;
use walkdir::WalkDir;
use zip::ZipArchive;
use zip::result::ZipError;

use crate::config::{FILE_PROBE_TIMEOUT_SECS, MAX_ARCH_PROBE_FILES};
use crate::ecosystem::Ecosystem;
use crate::isolation::process::{CommandSpec, ProcessRunner};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeBuild {
    /// Native code was compiled or shipped and looks usable on ARM64
    Yes,
    No,
    /// Only x86-64 binaries were found
    NeedsVerification,
}

impl NativeBuild {
    pub fn as_str(&self) -> &'static str {
        match self {
            NativeBuild::Yes => "Yes",
            NativeBuild::No => "No",
            NativeBuild::NeedsVerification => "needs_verification",
        }
    }
}

impl std::fmt::Display for NativeBuild {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether installer output mentions a compiler or native build tool
pub fn output_indicates_native_build(ecosystem: Ecosystem, output: &str) -> bool {
    let lower = output.to_lowercase();
    ecosystem
        .native_build_indicators()
        .iter()
        .find(|indicator| lower.contains(*indicator))
        .inspect(|indicator| debug!("Native build indicator found: '{}'", indicator))
        .is_some()
}

/// Native binaries below `dir`, sorted by path
pub fn find_native_files(ecosystem: Ecosystem, dir: &Path) -> Vec<PathBuf> {
    let extensions = ecosystem.native_extensions();
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| extensions.contains(&ext.to_lowercase().as_str()))
        })
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    files
}

/// `file` output describing an x86-64 binary with no ARM64 slice
fn is_x86_only(description: &str) -> bool {
    let lower = description.to_lowercase();
    (lower.contains("x86_64") || lower.contains("x86-64"))
        && !(lower.contains("arm64") || lower.contains("aarch64"))
}

/// Inspects up to five native files with `file`. Files that cannot be
/// inspected are assumed to be fine.
pub async fn classify_native_files(runner: &dyn ProcessRunner, files: &[PathBuf]) -> NativeBuild {
    if files.is_empty() {
        return NativeBuild::No;
    }
    if runner.resolve("file").is_none() {
        debug!("`file` is not available, skipping architecture check");
        return NativeBuild::Yes;
    }

    for path in files.iter().take(MAX_ARCH_PROBE_FILES) {
        let spec = CommandSpec::new("file", Duration::from_secs(FILE_PROBE_TIMEOUT_SECS))
            .arg(path.to_string_lossy());
        match runner.run(&spec).await {
            Ok(output) if output.succeeded() && is_x86_only(&output.stdout) => {
                debug!("x86-only native file: {:?}", path);
                return NativeBuild::NeedsVerification;
            }
            Ok(_) => {}
            Err(e) => debug!("file probe failed for {:?}: {}", path, e),
        }
    }
    NativeBuild::Yes
}

const JAR_LIBRARY_EXTENSIONS: &[&str] = &[".so", ".dll", ".dylib", ".jnilib"];

const JAR_PLATFORM_DIRS: &[&str] = &[
    "linux-arm",
    "linux-aarch64",
    "linux-x86",
    "linux-amd64",
    "windows-arm",
    "windows-x86",
    "windows-amd64",
    "darwin-arm64",
    "darwin-x86_64",
    "darwin-amd64",
    "macos-arm64",
    "macos-x86_64",
    "lib/arm",
    "lib/aarch64",
    "lib/x86",
    "lib/amd64",
    "native/arm",
    "native/aarch64",
    "native/x86",
    "meta-inf/native",
    "natives-linux-arm",
];

const JAR_NATIVE_LOADERS: &[&str] = &["native-lib-loader", "nativelibraryloader", "jniloader"];

/// Native code bundled inside a JAR, judged from its entry names
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JarNativeCode {
    pub has_native_code: bool,
    pub arm_specific: bool,
    pub x86_specific: bool,
}

impl JarNativeCode {
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a str>) -> Self {
        let mut found = Self::default();
        for entry in entries {
            let lower = entry.to_lowercase();
            let is_library = JAR_LIBRARY_EXTENSIONS.iter().any(|ext| lower.ends_with(ext));
            let in_platform_dir = JAR_PLATFORM_DIRS.iter().any(|dir| lower.contains(dir));
            if is_library || in_platform_dir {
                found.has_native_code = true;
                found.arm_specific |= lower.contains("arm") || lower.contains("aarch");
                found.x86_specific |= ["x86", "amd64", "i386", "i686"]
                    .iter()
                    .any(|marker| lower.contains(marker));
            }
            if JAR_NATIVE_LOADERS.iter().any(|loader| lower.contains(loader)) {
                found.has_native_code = true;
            }
        }
        found
    }

    pub fn verdict(&self) -> NativeBuild {
        match (self.has_native_code, self.arm_specific, self.x86_specific) {
            (false, _, _) => NativeBuild::No,
            (true, false, true) => NativeBuild::NeedsVerification,
            _ => NativeBuild::Yes,
        }
    }
}

/// Reads the entry names of a JAR without extracting it
pub fn inspect_jar(path: &Path) -> Result<JarNativeCode, ZipError> {
    let archive = ZipArchive::new(std::fs::File::open(path)?)?;
    let found = JarNativeCode::from_entries(archive.file_names());
    debug!("JAR {:?}: {:?}", path, found);
    Ok(found)
}

/// Output indicators first, then the installed artifacts on disk
pub async fn detect_native_build(
    runner: &dyn ProcessRunner,
    ecosystem: Ecosystem,
    output: &str,
    artifact_dir: Option<&Path>,
) -> NativeBuild {
    if output_indicates_native_build(ecosystem, output) {
        return NativeBuild::Yes;
    }
    match artifact_dir {
        Some(dir) if dir.exists() => {
            let files = find_native_files(ecosystem, dir);
            debug!("Found {} native files in {:?}", files.len(), dir);
            classify_native_files(runner, &files).await
        }
        _ => NativeBuild::No,
    }
}

/// Writes a stored (uncompressed) JAR holding one byte per entry
#[cfg(test)]
pub(crate) fn write_test_jar(path: &Path, entries: &[&str]) {
    use std::io::Write;

    let mut writer = zip::ZipWriter::new(std::fs::File::create(path).unwrap());
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored);
    for entry in entries {
        writer.start_file(*entry, options).unwrap();
        writer.write_all(b"\0").unwrap();
    }
    writer.finish().unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isolation::process::{CommandOutput, MockProcessRunner};
    use rstest::rstest;
    use tempfile::TempDir;

    fn file_output(stdout: &str) -> CommandOutput {
        CommandOutput {
            exit_code: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
            duration: Duration::from_millis(1),
        }
    }

    #[rstest]
    #[case(Ecosystem::Python, "Building wheel for numpy (pyproject.toml)", true)]
    #[case(Ecosystem::NodeJs, "gyp info it worked if it ends with ok", true)]
    #[case(Ecosystem::Ruby, "Building native extensions. This could take a while...", true)]
    #[case(Ecosystem::Python, "Successfully installed six-1.16.0", false)]
    fn output_indicators_per_ecosystem(
        #[case] ecosystem: Ecosystem,
        #[case] output: &str,
        #[case] expected: bool,
    ) {
        assert_eq!(output_indicates_native_build(ecosystem, output), expected);
    }

    #[rstest]
    #[case("ELF 64-bit LSB shared object, x86-64, version 1 (SYSV)", true)]
    #[case("ELF 64-bit LSB shared object, ARM aarch64, version 1 (SYSV)", false)]
    #[case("Mach-O universal binary with 2 architectures: [x86_64] [arm64]", false)]
    fn x86_only_detection(#[case] description: &str, #[case] expected: bool) {
        assert_eq!(is_x86_only(description), expected);
    }

    #[test]
    fn find_native_files_filters_by_ecosystem_extension() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("core")).unwrap();
        std::fs::write(dir.path().join("core/_impl.so"), "").unwrap();
        std::fs::write(dir.path().join("addon.node"), "").unwrap();
        std::fs::write(dir.path().join("module.py"), "").unwrap();

        assert_eq!(
            find_native_files(Ecosystem::Python, dir.path()),
            vec![dir.path().join("core/_impl.so")]
        );
        assert_eq!(find_native_files(Ecosystem::NodeJs, dir.path()).len(), 2);
    }

    #[tokio::test]
    async fn classify_native_files_flags_x86_only_binaries() {
        let mut runner = MockProcessRunner::new();
        runner
            .expect_resolve()
            .returning(|_| Some(PathBuf::from("/usr/bin/file")));
        runner.expect_run().returning(|spec| {
            if spec.args[0].ends_with("b.so") {
                Ok(file_output("b.so: ELF 64-bit LSB shared object, x86-64"))
            } else {
                Ok(file_output("a.so: ELF 64-bit LSB shared object, ARM aarch64"))
            }
        });

        let files = vec![PathBuf::from("/x/a.so"), PathBuf::from("/x/b.so")];

        assert_eq!(
            classify_native_files(&runner, &files).await,
            NativeBuild::NeedsVerification
        );
    }

    #[tokio::test]
    async fn classify_native_files_only_probes_first_five() {
        let mut runner = MockProcessRunner::new();
        runner
            .expect_resolve()
            .returning(|_| Some(PathBuf::from("/usr/bin/file")));
        runner
            .expect_run()
            .times(MAX_ARCH_PROBE_FILES)
            .returning(|_| Ok(file_output("ELF 64-bit LSB shared object, ARM aarch64")));

        let files: Vec<PathBuf> = (0..8).map(|i| PathBuf::from(format!("/x/{i}.so"))).collect();

        assert_eq!(classify_native_files(&runner, &files).await, NativeBuild::Yes);
    }

    #[tokio::test]
    async fn classify_native_files_without_file_tool_assumes_yes() {
        let mut runner = MockProcessRunner::new();
        runner.expect_resolve().returning(|_| None);

        let files = vec![PathBuf::from("/x/a.so")];

        assert_eq!(classify_native_files(&runner, &files).await, NativeBuild::Yes);
        assert_eq!(classify_native_files(&runner, &[]).await, NativeBuild::No);
    }

    #[tokio::test]
    async fn detect_native_build_without_artifacts_is_no() {
        let runner = MockProcessRunner::new();

        assert_eq!(
            detect_native_build(&runner, Ecosystem::Python, "Successfully installed six", None)
                .await,
            NativeBuild::No
        );
    }

    #[rstest]
    #[case(&["org/example/Util.class", "META-INF/MANIFEST.MF"], NativeBuild::No)]
    #[case(&["native/linux-x86_64/libfoo.so"], NativeBuild::NeedsVerification)]
    #[case(&["win32-x86-64/foo.dll", "darwin-x86_64/libfoo.dylib"], NativeBuild::NeedsVerification)]
    #[case(&["org/sqlite/native/Linux/aarch64/libsqlitejdbc.so"], NativeBuild::Yes)]
    #[case(
        &["lib/x86_64/libzstd.so", "lib/aarch64/libzstd.so"],
        NativeBuild::Yes
    )]
    #[case(&["META-INF/native/libnetty_transport.so"], NativeBuild::Yes)]
    #[case(&["org/scijava/nativelib/NativeLibraryLoader.class"], NativeBuild::Yes)]
    fn jar_entries_decide_native_build(#[case] entries: &[&str], #[case] expected: NativeBuild) {
        assert_eq!(
            JarNativeCode::from_entries(entries.iter().copied()).verdict(),
            expected
        );
    }

    #[test]
    fn inspect_jar_reads_entry_names() {
        let dir = TempDir::new().unwrap();
        let jar = dir.path().join("rocksdbjni-8.10.0.jar");
        write_test_jar(&jar, &["org/rocksdb/RocksDB.class", "librocksdbjni-linux64.so"]);

        let found = inspect_jar(&jar).unwrap();

        assert!(found.has_native_code);
        assert!(!found.arm_specific);
        assert_eq!(found.verdict(), NativeBuild::Yes);
    }

    #[test]
    fn inspect_jar_rejects_non_archives() {
        let dir = TempDir::new().unwrap();
        let jar = dir.path().join("broken.jar");
        std::fs::write(&jar, "not a zip").unwrap();

        assert!(inspect_jar(&jar).is_err());
        assert!(inspect_jar(&dir.path().join("missing.jar")).is_err());
    }
}
