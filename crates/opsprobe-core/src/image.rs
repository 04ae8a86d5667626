//! Image specs and the guest platform they imply.
//!
//! An image spec is either `<project>:<family>` (latest image in a family)
//! or `<project>=<image>` (one specific image). The platform is derived from
//! the spec once, when a VM is built, and drives every OS-specific branch.

use std::fmt;
use std::str::FromStr;

use snafu::Snafu;

#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(display("invalid image spec {spec:?}: expected <project>:<family> or <project>=<image>"))]
pub struct InvalidImageSpec {
    pub spec: String,
}

/// How an image spec names its image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSelector {
    Family(String),
    Image(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSpec {
    raw: String,
    project: String,
    selector: ImageSelector,
}

impl FromStr for ImageSpec {
    type Err = InvalidImageSpec;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidImageSpec { spec: spec.to_string() };
        let (project, selector) = if let Some((project, family)) = spec.split_once(':') {
            (project, ImageSelector::Family(family.to_string()))
        } else if let Some((project, image)) = spec.split_once('=') {
            (project, ImageSelector::Image(image.to_string()))
        } else {
            return Err(invalid());
        };
        let name = match &selector {
            ImageSelector::Family(n) | ImageSelector::Image(n) => n,
        };
        if project.is_empty() || name.is_empty() {
            return Err(invalid());
        }
        Ok(Self {
            raw: spec.to_string(),
            project: project.to_string(),
            selector,
        })
    }
}

impl fmt::Display for ImageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl ImageSpec {
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn selector(&self) -> &ImageSelector {
        &self.selector
    }

    /// `gcloud` flags selecting this image.
    pub fn create_flags(&self) -> Vec<String> {
        let mut flags = vec![format!("--image-project={}", self.project)];
        match &self.selector {
            ImageSelector::Family(family) => flags.push(format!("--image-family={family}")),
            ImageSelector::Image(image) => flags.push(format!("--image={image}")),
        }
        flags
    }

    pub fn is_windows(&self) -> bool {
        self.raw.starts_with("windows-")
    }

    /// Windows Server Core images have no desktop and start slower.
    pub fn is_windows_core(&self) -> bool {
        self.is_windows() && self.raw.ends_with("-core")
    }

    pub fn is_windows_2016(&self) -> bool {
        self.is_windows() && self.raw.contains("2016")
    }

    pub fn is_windows_2019(&self) -> bool {
        self.is_windows() && self.raw.contains("2019")
    }

    pub fn is_arm(&self) -> bool {
        self.raw.contains("arm64")
    }

    pub fn is_debian_based(&self) -> bool {
        self.raw.contains("debian") || self.raw.contains("ubuntu")
    }

    pub fn is_suse(&self) -> bool {
        self.raw.starts_with("suse-") || self.raw.starts_with("opensuse-") || self.raw.contains("sles-")
    }

    pub fn is_centos(&self) -> bool {
        self.raw.contains("centos")
    }

    pub fn is_rhel(&self) -> bool {
        self.raw.contains("rhel")
    }

    /// RHEL 7 for SAP with HA; its RHUI repos are unreliable.
    pub fn is_rhel7_sap_ha(&self) -> bool {
        self.raw.starts_with("rhel-sap-cloud") && self.raw.contains("rhel-7")
    }

    /// Deep-learning VM images.
    pub fn is_dlvm(&self) -> bool {
        self.raw.starts_with("ml-images")
    }

    /// The one deep-learning image whose startup scripts clobber the test
    /// user's `authorized_keys`.
    pub fn needs_ssh_key_repair(&self) -> bool {
        self.raw.contains("common-gpu-debian-11-py310")
    }

    pub fn platform(&self) -> Platform {
        if self.is_windows() {
            return Platform::Windows {
                core: self.is_windows_core(),
            };
        }
        let family = if self.is_suse() {
            LinuxFamily::Suse
        } else if self.is_rhel7_sap_ha() {
            LinuxFamily::RhelSapHa7
        } else if self.is_debian_based() || self.is_dlvm() {
            LinuxFamily::Debian { dlvm: self.is_dlvm() }
        } else {
            LinuxFamily::Other
        };
        Platform::Linux(family)
    }
}

/// Guest platform, chosen once from the image spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows { core: bool },
    Linux(LinuxFamily),
}

/// Linux distributions that need their own handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinuxFamily {
    Debian { dlvm: bool },
    Suse,
    RhelSapHa7,
    Other,
}

impl Platform {
    pub fn is_windows(self) -> bool {
        matches!(self, Platform::Windows { .. })
    }

    pub fn is_linux(self) -> bool {
        !self.is_windows()
    }

    pub fn is_suse(self) -> bool {
        matches!(self, Platform::Linux(LinuxFamily::Suse))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(s: &str) -> ImageSpec {
        s.parse().unwrap()
    }

    #[test]
    fn test_family_flags() {
        assert_eq!(spec("debian-cloud:debian-12").create_flags(), [
            "--image-project=debian-cloud",
            "--image-family=debian-12"
        ]);
    }

    #[test]
    fn test_image_flags() {
        assert_eq!(spec("my-project=my-image-v1").create_flags(), [
            "--image-project=my-project",
            "--image=my-image-v1"
        ]);
    }

    #[test]
    fn test_invalid_specs() {
        assert!("debian-12".parse::<ImageSpec>().is_err());
        assert!(":debian-12".parse::<ImageSpec>().is_err());
        assert!("debian-cloud:".parse::<ImageSpec>().is_err());
        assert!("".parse::<ImageSpec>().is_err());
    }

    #[test]
    fn test_platforms() {
        assert_eq!(spec("windows-cloud:windows-2019-core").platform(), Platform::Windows { core: true });
        assert_eq!(spec("windows-cloud:windows-2022").platform(), Platform::Windows { core: false });
        assert_eq!(spec("suse-cloud:sles-15").platform(), Platform::Linux(LinuxFamily::Suse));
        assert_eq!(spec("opensuse-cloud:opensuse-leap").platform(), Platform::Linux(LinuxFamily::Suse));
        assert_eq!(
            spec("rhel-sap-cloud:rhel-7-9-sap-ha").platform(),
            Platform::Linux(LinuxFamily::RhelSapHa7)
        );
        assert_eq!(
            spec("ml-images:common-gpu-debian-11-py310").platform(),
            Platform::Linux(LinuxFamily::Debian { dlvm: true })
        );
        assert_eq!(spec("ubuntu-os-cloud:ubuntu-2204-lts").platform(), Platform::Linux(LinuxFamily::Debian {
            dlvm: false
        }));
        assert_eq!(spec("rocky-linux-cloud:rocky-linux-9").platform(), Platform::Linux(LinuxFamily::Other));
    }

    #[test]
    fn test_arm_detection() {
        assert!(spec("debian-cloud:debian-12-arm64").is_arm());
        assert!(!spec("debian-cloud:debian-12").is_arm());
    }
}
