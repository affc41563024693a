//! Package ecosystems supported by the probe

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Package ecosystem (runtime + package manager)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ecosystem {
    /// Python / pip
    Python,
    /// Node.js / npm
    NodeJs,
    /// Java / Maven
    Java,
    /// .NET / NuGet
    DotNet,
    /// Ruby / gem
    Ruby,
}

impl Ecosystem {
    pub const ALL: [Ecosystem; 5] = [
        Ecosystem::Python,
        Ecosystem::NodeJs,
        Ecosystem::Java,
        Ecosystem::DotNet,
        Ecosystem::Ruby,
    ];

    /// Returns the string representation of the ecosystem
    pub fn as_str(&self) -> &'static str {
        match self {
            Ecosystem::Python => "python",
            Ecosystem::NodeJs => "nodejs",
            Ecosystem::Java => "java",
            Ecosystem::DotNet => "dotnet",
            Ecosystem::Ruby => "ruby",
        }
    }

    /// Name of the public registry backing this ecosystem.
    /// Rate limits are configured per registry name.
    pub fn registry_name(&self) -> &'static str {
        match self {
            Ecosystem::Python => "pypi",
            Ecosystem::NodeJs => "npm",
            Ecosystem::Java => "maven",
            Ecosystem::DotNet => "nuget",
            Ecosystem::Ruby => "rubygems",
        }
    }

    /// Tools that must be present on the host for native analysis
    pub fn prerequisites(&self) -> &'static [&'static str] {
        match self {
            Ecosystem::Python => &["python3"],
            Ecosystem::NodeJs => &["node", "npm"],
            Ecosystem::Java => &["java", "mvn"],
            Ecosystem::DotNet => &["dotnet"],
            Ecosystem::Ruby => &["ruby", "gem", "bundle"],
        }
    }

    /// Packages that are never uninstalled after a test install
    pub fn critical_packages(&self) -> &'static [&'static str] {
        match self {
            Ecosystem::Python => &[
                "pip",
                "pip3",
                "setuptools",
                "wheel",
                "distutils",
                "requests",
                "urllib3",
                "certifi",
            ],
            Ecosystem::NodeJs => &["npm", "npx", "corepack", "node-gyp"],
            Ecosystem::Ruby => &["bundler", "rubygems-update", "rake"],
            Ecosystem::Java | Ecosystem::DotNet => &[],
        }
    }

    pub fn is_critical_package(&self, package_name: &str) -> bool {
        let name = package_name.to_lowercase();
        self.critical_packages().iter().any(|p| *p == name)
    }

    /// Upper bound for one isolated analysis run
    pub fn analysis_timeout(&self) -> Duration {
        match self {
            Ecosystem::DotNet => Duration::from_secs(120),
            _ => Duration::from_secs(300),
        }
    }

    /// Upper bound for a single package install attempt
    pub fn install_timeout(&self) -> Duration {
        match self {
            Ecosystem::Java => Duration::from_secs(60),
            _ => Duration::from_secs(120),
        }
    }

    /// Exit codes of the isolated run that count as a completed analysis.
    /// Java reports incompatible dependencies with exit code 2.
    pub fn success_codes(&self) -> &'static [i32] {
        match self {
            Ecosystem::Java => &[0, 2],
            _ => &[0],
        }
    }

    pub fn default_runtime_version(&self) -> &'static str {
        match self {
            Ecosystem::Python => "3.11",
            Ecosystem::NodeJs => "20",
            Ecosystem::Java => "17",
            Ecosystem::DotNet => "8.0",
            Ecosystem::Ruby => "3.2",
        }
    }

    /// Lowercase output tokens that indicate native compilation during install
    pub fn native_build_indicators(&self) -> &'static [&'static str] {
        match self {
            Ecosystem::Python => &[
                "building wheel",
                "running build_ext",
                "gcc",
                "g++",
                "clang",
                "compiling",
                "linking",
                "building extension",
                "cython",
            ],
            Ecosystem::NodeJs => &[
                "node-gyp",
                "binding.gyp",
                "gyp info",
                "node-pre-gyp",
                "prebuild-install",
                "make:",
                "gcc",
                "g++",
                "clang",
                "compiled successfully",
            ],
            Ecosystem::Ruby => &[
                "building native extensions",
                "compiling",
                "gcc",
                "g++",
                "clang",
                "make",
                "extconf.rb",
                "mkmf.rb",
            ],
            Ecosystem::Java => &["jni", "native-maven-plugin", "nar-maven-plugin"],
            Ecosystem::DotNet => &["runtimes/linux-x64/native", "runtimes/win-x64/native"],
        }
    }

    /// File extensions of native binaries shipped inside installed packages
    pub fn native_extensions(&self) -> &'static [&'static str] {
        match self {
            Ecosystem::Python => &["so", "dylib", "dll", "pyd"],
            Ecosystem::NodeJs => &["so", "dylib", "dll", "node"],
            Ecosystem::Ruby => &["so", "bundle", "dll"],
            Ecosystem::Java => &["so", "dylib", "dll", "jnilib"],
            Ecosystem::DotNet => &["so", "dylib", "dll"],
        }
    }
}

impl std::fmt::Display for Ecosystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Ecosystem {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "python" | "pypi" | "pip" => Ok(Ecosystem::Python),
            "nodejs" | "node" | "npm" => Ok(Ecosystem::NodeJs),
            "java" | "maven" => Ok(Ecosystem::Java),
            "dotnet" | "nuget" | ".net" => Ok(Ecosystem::DotNet),
            "ruby" | "rubygems" | "gem" => Ok(Ecosystem::Ruby),
            other => Err(format!("unknown ecosystem: {}", other)),
        }
    }
}
