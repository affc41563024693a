//! Dockerfile generation for containerized analysis
//!
//! Python and Java images are built on top of the configured OS; Node.js,
//! .NET and Ruby use the upstream runtime images.

use crate::ecosystem::Ecosystem;

/// Package manager family of a base OS
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsFamily {
    Rpm,
    Deb,
}

impl OsFamily {
    fn of(os_name: &str) -> Self {
        match os_name {
            "amazon-linux" | "amazon" | "centos" | "rhel" | "fedora" => OsFamily::Rpm,
            _ => OsFamily::Deb,
        }
    }

    /// (update, install) commands
    fn package_commands(&self) -> (&'static str, &'static str) {
        match self {
            OsFamily::Rpm => ("yum update -y", "yum install -y"),
            OsFamily::Deb => ("apt-get update", "apt-get install -y"),
        }
    }
}

/// Splits an OS spec into (name, version).
///
/// Accepts `name:version`, `amazon-linux-<version>`, `name-version` and a
/// bare name (version `latest`).
pub fn parse_os_version(os_version: &str) -> (String, String) {
    let (name, version) = if let Some((name, version)) = os_version.split_once(':') {
        (name, version)
    } else if let Some(version) = os_version.strip_prefix("amazon-linux-") {
        ("amazon-linux", version)
    } else if let Some((name, version)) = os_version.split_once('-') {
        (name, version)
    } else {
        (os_version, "latest")
    };
    (name.to_lowercase(), version.to_string())
}

pub fn base_image(os_name: &str, os_version: &str) -> String {
    match os_name {
        "amazon-linux" | "amazon" => format!("amazonlinux:{}", os_version),
        "ubuntu" => format!("ubuntu:{}", os_version),
        "debian" => format!("debian:{}", os_version),
        "rhel" | "centos" => format!("centos:{}", os_version),
        "fedora" => format!("fedora:{}", os_version),
        _ => "amazonlinux:2023".to_string(),
    }
}

/// Tag fragment derived from the OS spec (`ubuntu:22.04` -> `ubuntu-22-04`)
pub fn os_tag(os_version: &str) -> String {
    os_version.replace([':', '.'], "-")
}

pub fn image_name(ecosystem: Ecosystem, runtime_version: &str, os_version: &str) -> String {
    format!(
        "graviton-{}-analysis:{}-{}",
        ecosystem.as_str(),
        runtime_version,
        os_tag(os_version)
    )
}

fn runtime_or_default(ecosystem: Ecosystem, runtime_version: &str) -> String {
    if runtime_version.is_empty() || runtime_version == "latest" {
        ecosystem.default_runtime_version().to_string()
    } else {
        runtime_version.to_string()
    }
}

pub fn generate(ecosystem: Ecosystem, runtime_version: &str, os_version: &str) -> String {
    let (os_name, os_ver) = parse_os_version(os_version);
    let family = OsFamily::of(&os_name);
    let (update, install) = family.package_commands();
    let version = runtime_or_default(ecosystem, runtime_version);

    let mut lines = match ecosystem {
        Ecosystem::Python => {
            let packages = match family {
                OsFamily::Rpm => "bash file python3 python3-pip gcc gcc-c++ python3-devel make",
                OsFamily::Deb => "bash file python3 python3-pip gcc g++ python3-dev build-essential",
            };
            vec![
                format!("FROM {}", base_image(&os_name, &os_ver)),
                format!("RUN {}", update),
                format!("RUN {} {}", install, packages),
            ]
        }
        Ecosystem::NodeJs => vec![
            format!("FROM node:{}-alpine", version),
            "RUN apk update".to_string(),
            "RUN apk add --no-cache bash file gcc g++ make musl-dev python3 linux-headers libffi-dev openssl-dev".to_string(),
        ],
        Ecosystem::DotNet => vec![
            format!("FROM mcr.microsoft.com/dotnet/sdk:{}", version),
            "RUN apt-get update".to_string(),
            "RUN apt-get install -y bash file".to_string(),
            "ENV DOTNET_CLI_TELEMETRY_OPTOUT=1".to_string(),
            "ENV DOTNET_SKIP_FIRST_TIME_EXPERIENCE=1".to_string(),
        ],
        Ecosystem::Ruby => vec![
            format!("FROM ruby:{}-alpine", version),
            "RUN apk update".to_string(),
            "RUN apk add --no-cache bash file gcc g++ make musl-dev linux-headers libffi-dev openssl-dev".to_string(),
            "RUN gem install bundler".to_string(),
        ],
        Ecosystem::Java => {
            let packages = match family {
                OsFamily::Rpm => format!("bash file java-{}-amazon-corretto-devel maven", version),
                OsFamily::Deb => format!("bash file openjdk-{}-jdk maven", version),
            };
            vec![
                format!("FROM {}", base_image(&os_name, &os_ver)),
                format!("RUN {}", update),
                format!("RUN {} {}", install, packages),
            ]
        }
    };
    lines.push("WORKDIR /workspace".to_string());
    lines.join("\n")
}
