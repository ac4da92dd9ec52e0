//! Project discovery.
//!
//! Pure function of the filesystem snapshot: locate the nearest manifest by
//! walking up at most five levels from the source root, then derive the
//! framework tag, router style, package manager and script names. No network.

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::fs;

use crate::policy::Policy;

const MAX_WALK_UP: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FrameworkTag {
    NextJs,
    Nuxt,
    React,
    Vue,
    SvelteKit,
    Angular,
    Static,
    Unknown,
}

impl FrameworkTag {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NextJs => "next-js",
            Self::Nuxt => "nuxt",
            Self::React => "react",
            Self::Vue => "vue",
            Self::SvelteKit => "svelte-kit",
            Self::Angular => "angular",
            Self::Static => "static",
            Self::Unknown => "unknown",
        }
    }

    /// Budget multiplier for the framework family; hydration-heavy stacks
    /// settle slower.
    #[must_use]
    pub const fn budget_multiplier(&self) -> f64 {
        match self {
            Self::NextJs | Self::Nuxt => 1.5,
            Self::Angular => 1.4,
            Self::React | Self::Vue | Self::SvelteKit => 1.2,
            Self::Static | Self::Unknown => 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RouterStyle {
    AppRouter,
    PagesRouter,
    ReactRouter,
    VueRouter,
    FileBased,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    Npm,
    Pnpm,
    Yarn,
    Bun,
    Unknown,
}

/// Dev/build/start script names from the manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectScripts {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dev: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
}

/// `project.json` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectProfile {
    pub schema_version: String,
    pub framework: FrameworkTag,
    pub router: RouterStyle,
    pub package_manager: PackageManager,
    pub scripts: ProjectScripts,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest_path: Option<String>,
    /// Set when the detected framework is denied by policy; finalization
    /// records `unsupported_framework`.
    pub unsupported_framework: bool,
}

impl ProjectProfile {
    pub const SCHEMA_VERSION: &'static str = "project.v1";

    /// Profile for a run without a detected source tree.
    #[must_use]
    pub fn undetected() -> Self {
        Self {
            schema_version: Self::SCHEMA_VERSION.to_string(),
            framework: FrameworkTag::Unknown,
            router: RouterStyle::None,
            package_manager: PackageManager::Unknown,
            scripts: ProjectScripts::default(),
            manifest_path: None,
            unsupported_framework: false,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct Manifest {
    #[serde(default)]
    dependencies: serde_json::Map<String, serde_json::Value>,
    #[serde(default, rename = "devDependencies")]
    dev_dependencies: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    scripts: serde_json::Map<String, serde_json::Value>,
}

impl Manifest {
    fn has_dep(&self, name: &str) -> bool {
        self.dependencies.contains_key(name) || self.dev_dependencies.contains_key(name)
    }

    fn script(&self, name: &str) -> Option<String> {
        self.scripts
            .get(name)
            .and_then(|v| v.as_str())
            .map(ToString::to_string)
    }
}

/// Discover the project profile for a source root.
#[must_use]
pub fn discover(src_root: &Utf8Path, policy: &Policy) -> ProjectProfile {
    let Some((manifest_dir, manifest)) = find_manifest(src_root) else {
        return ProjectProfile {
            framework: FrameworkTag::Static,
            router: RouterStyle::FileBased,
            ..ProjectProfile::undetected()
        };
    };

    let framework = detect_framework(&manifest);
    let router = detect_router(&manifest, &manifest_dir, framework);
    let package_manager = detect_package_manager(&manifest_dir);
    let scripts = ProjectScripts {
        dev: manifest.script("dev"),
        build: manifest.script("build"),
        start: manifest.script("start"),
    };

    let tag = framework.as_str().to_string();
    let allowed = policy.frameworks.allow.is_empty() || policy.frameworks.allow.contains(&tag);
    let denied = policy.frameworks.deny.contains(&tag);
    let unsupported_framework = denied || !allowed;

    ProjectProfile {
        schema_version: ProjectProfile::SCHEMA_VERSION.to_string(),
        framework,
        router,
        package_manager,
        scripts,
        manifest_path: Some(manifest_dir.join("package.json").to_string()),
        unsupported_framework,
    }
}

fn find_manifest(src_root: &Utf8Path) -> Option<(Utf8PathBuf, Manifest)> {
    let mut dir = src_root.to_owned();
    for _ in 0..=MAX_WALK_UP {
        let candidate = dir.join("package.json");
        if candidate.is_file() {
            let content = fs::read_to_string(candidate.as_std_path()).ok()?;
            let manifest = serde_json::from_str(&content).unwrap_or_default();
            return Some((dir, manifest));
        }
        dir = dir.parent()?.to_owned();
    }
    None
}

fn detect_framework(manifest: &Manifest) -> FrameworkTag {
    if manifest.has_dep("next") {
        FrameworkTag::NextJs
    } else if manifest.has_dep("nuxt") {
        FrameworkTag::Nuxt
    } else if manifest.has_dep("@sveltejs/kit") {
        FrameworkTag::SvelteKit
    } else if manifest.has_dep("@angular/core") {
        FrameworkTag::Angular
    } else if manifest.has_dep("react") {
        FrameworkTag::React
    } else if manifest.has_dep("vue") {
        FrameworkTag::Vue
    } else {
        FrameworkTag::Static
    }
}

fn detect_router(
    manifest: &Manifest,
    manifest_dir: &Utf8Path,
    framework: FrameworkTag,
) -> RouterStyle {
    match framework {
        FrameworkTag::NextJs => {
            if manifest_dir.join("app").is_dir() || manifest_dir.join("src/app").is_dir() {
                RouterStyle::AppRouter
            } else {
                RouterStyle::PagesRouter
            }
        }
        FrameworkTag::Nuxt | FrameworkTag::SvelteKit => RouterStyle::FileBased,
        FrameworkTag::React => {
            if manifest.has_dep("react-router-dom") || manifest.has_dep("react-router") {
                RouterStyle::ReactRouter
            } else {
                RouterStyle::None
            }
        }
        FrameworkTag::Vue => {
            if manifest.has_dep("vue-router") {
                RouterStyle::VueRouter
            } else {
                RouterStyle::None
            }
        }
        FrameworkTag::Angular | FrameworkTag::Static | FrameworkTag::Unknown => RouterStyle::None,
    }
}

fn detect_package_manager(manifest_dir: &Utf8Path) -> PackageManager {
    if manifest_dir.join("pnpm-lock.yaml").is_file() {
        PackageManager::Pnpm
    } else if manifest_dir.join("yarn.lock").is_file() {
        PackageManager::Yarn
    } else if manifest_dir.join("bun.lockb").is_file() || manifest_dir.join("bun.lock").is_file() {
        PackageManager::Bun
    } else if manifest_dir.join("package-lock.json").is_file() {
        PackageManager::Npm
    } else {
        PackageManager::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn utf8_dir(dir: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap()
    }

    fn write_manifest(dir: &Utf8Path, content: &str) {
        fs::write(dir.join("package.json").as_std_path(), content).unwrap();
    }

    #[test]
    fn detects_react_with_react_router() {
        let dir = TempDir::new().unwrap();
        let root = utf8_dir(&dir);
        write_manifest(
            &root,
            r#"{"dependencies": {"react": "^18", "react-router-dom": "^6"},
               "scripts": {"dev": "vite", "build": "vite build"}}"#,
        );

        let profile = discover(&root, &Policy::default());
        assert_eq!(profile.framework, FrameworkTag::React);
        assert_eq!(profile.router, RouterStyle::ReactRouter);
        assert_eq!(profile.scripts.dev.as_deref(), Some("vite"));
        assert!(!profile.unsupported_framework);
    }

    #[test]
    fn detects_next_app_router() {
        let dir = TempDir::new().unwrap();
        let root = utf8_dir(&dir);
        write_manifest(&root, r#"{"dependencies": {"next": "^14", "react": "^18"}}"#);
        fs::create_dir(root.join("app").as_std_path()).unwrap();

        let profile = discover(&root, &Policy::default());
        assert_eq!(profile.framework, FrameworkTag::NextJs);
        assert_eq!(profile.router, RouterStyle::AppRouter);
    }

    #[test]
    fn walks_up_to_find_manifest() {
        let dir = TempDir::new().unwrap();
        let root = utf8_dir(&dir);
        write_manifest(&root, r#"{"dependencies": {"vue": "^3", "vue-router": "^4"}}"#);
        let nested = root.join("packages/web/src");
        fs::create_dir_all(nested.as_std_path()).unwrap();

        let profile = discover(&nested, &Policy::default());
        assert_eq!(profile.framework, FrameworkTag::Vue);
        assert_eq!(profile.router, RouterStyle::VueRouter);
    }

    #[test]
    fn no_manifest_is_static() {
        let dir = TempDir::new().unwrap();
        let root = utf8_dir(&dir);
        let profile = discover(&root, &Policy::default());
        assert_eq!(profile.framework, FrameworkTag::Static);
        assert!(profile.manifest_path.is_none());
    }

    #[test]
    fn package_manager_from_lockfile() {
        let dir = TempDir::new().unwrap();
        let root = utf8_dir(&dir);
        write_manifest(&root, r#"{"dependencies": {"react": "^18"}}"#);
        fs::write(root.join("pnpm-lock.yaml").as_std_path(), "").unwrap();

        let profile = discover(&root, &Policy::default());
        assert_eq!(profile.package_manager, PackageManager::Pnpm);
    }

    #[test]
    fn denied_framework_is_marked_unsupported() {
        let dir = TempDir::new().unwrap();
        let root = utf8_dir(&dir);
        write_manifest(&root, r#"{"dependencies": {"react": "^18"}}"#);

        let mut policy = Policy::default();
        policy.frameworks.deny = vec!["react".to_string()];
        let profile = discover(&root, &policy);
        assert!(profile.unsupported_framework);
    }

    #[test]
    fn multiplier_family_ordering() {
        assert!(FrameworkTag::NextJs.budget_multiplier() > FrameworkTag::React.budget_multiplier());
        assert_eq!(FrameworkTag::Static.budget_multiplier(), 1.0);
    }
}
