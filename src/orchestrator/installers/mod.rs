//! Package-manager adapters, one per ecosystem

pub mod gem;
pub mod maven;
pub mod npm;
pub mod nuget;
pub mod pip;

use std::path::Path;
use std::sync::Arc;

use crate::ecosystem::Ecosystem;
use crate::isolation::process::ProcessRunner;
use crate::orchestrator::installer::PackageInstaller;

/// Adapter for `ecosystem`. Scratch projects and `node_modules` are created
/// under `work_dir`.
pub fn installer_for(
    ecosystem: Ecosystem,
    runner: Arc<dyn ProcessRunner>,
    work_dir: &Path,
) -> Box<dyn PackageInstaller> {
    match ecosystem {
        Ecosystem::Python => Box::new(pip::PipInstaller::new(runner)),
        Ecosystem::NodeJs => Box::new(npm::NpmInstaller::new(runner, work_dir.join("npm"))),
        Ecosystem::Java => Box::new(maven::MavenInstaller::new(runner, work_dir)),
        Ecosystem::DotNet => Box::new(nuget::NugetInstaller::new(runner, work_dir)),
        Ecosystem::Ruby => Box::new(gem::GemInstaller::new(runner)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isolation::process::MockProcessRunner;

    #[test]
    fn installer_for_covers_every_ecosystem() {
        for ecosystem in Ecosystem::ALL {
            let mut runner = MockProcessRunner::new();
            runner.expect_resolve().returning(|_| None);
            let installer = installer_for(ecosystem, Arc::new(runner), Path::new("/tmp"));
            assert_eq!(installer.ecosystem(), ecosystem);
        }
    }
}
