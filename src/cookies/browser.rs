//! Default cookie store locations per browser and platform.
//!
//! Safari keeps a binarycookies file (sandboxed builds move it into the
//! Safari container). Chrome keeps a `Cookies` SQLite database inside its
//! profile directory. Firefox keeps `cookies.sqlite` in a randomly named
//! profile directory that is auto-detected.

use crate::cookies::config::StoreFormat;
use crate::cookies::cookie::Browser;
use std::path::{Path, PathBuf};

/// Finds the on-disk cookie store of a browser.
#[derive(Debug, Clone)]
pub struct StoreLocator {
    browser: Browser,
    profile: Option<String>,
}

impl StoreLocator {
    pub fn new(browser: Browser) -> Self {
        Self { browser, profile: None }
    }

    /// Use a specific profile (default: "Default" for Chrome, first `.default`
    /// profile for Firefox). Safari has no profiles.
    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    pub fn browser(&self) -> Browser {
        self.browser
    }

    pub fn format(&self) -> StoreFormat {
        StoreFormat::for_browser(self.browser)
    }

    /// The store path, if this platform has one for the browser. The file
    /// itself may not exist.
    pub fn store_path(&self) -> Option<PathBuf> {
        match self.browser {
            Browser::Safari => self.safari_cookie_path(),
            Browser::Chrome => self.chrome_cookie_path(),
            Browser::Firefox => self.firefox_cookie_path(),
        }
    }

    /// Like [`store_path`](Self::store_path) but only when the file exists.
    pub fn existing_store_path(&self) -> Option<PathBuf> {
        self.store_path().filter(|p| p.is_file())
    }

    fn safari_cookie_path(&self) -> Option<PathBuf> {
        if !cfg!(target_os = "macos") {
            return None;
        }
        let home = env_dir("HOME")?;
        let container = home.join("Library/Containers/com.apple.Safari/Data/Library/Cookies/Cookies.binarycookies");
        if container.is_file() {
            return Some(container);
        }
        Some(home.join("Library/Cookies/Cookies.binarycookies"))
    }

    fn chrome_cookie_path(&self) -> Option<PathBuf> {
        let profile = self.profile.as_deref().unwrap_or("Default");
        let user_data = if cfg!(target_os = "macos") {
            env_dir("HOME")?.join("Library/Application Support/Google/Chrome")
        } else if cfg!(target_os = "windows") {
            env_dir("LOCALAPPDATA")?.join("Google/Chrome/User Data")
        } else if cfg!(target_os = "linux") {
            env_dir("HOME")?.join(".config/google-chrome")
        } else {
            return None;
        };
        // Chrome 96+ on Windows moved the database under `Network/`.
        let relative = if cfg!(target_os = "windows") { "Network/Cookies" } else { "Cookies" };
        Some(user_data.join(profile).join(relative))
    }

    fn firefox_cookie_path(&self) -> Option<PathBuf> {
        let profiles = firefox_profiles_dir()?;
        match &self.profile {
            Some(profile) => Some(profiles.join(profile).join("cookies.sqlite")),
            None => find_default_profile(&profiles).map(|p| p.join("cookies.sqlite")),
        }
    }
}

fn env_dir(var: &str) -> Option<PathBuf> {
    std::env::var_os(var).filter(|v| !v.is_empty()).map(PathBuf::from)
}

fn firefox_profiles_dir() -> Option<PathBuf> {
    if cfg!(target_os = "macos") {
        Some(env_dir("HOME")?.join("Library/Application Support/Firefox/Profiles"))
    } else if cfg!(target_os = "windows") {
        Some(env_dir("APPDATA")?.join("Mozilla/Firefox/Profiles"))
    } else if cfg!(target_os = "linux") {
        Some(env_dir("HOME")?.join(".mozilla/firefox"))
    } else {
        None
    }
}

/// First `*.default-release` profile, else first `*.default`, by name.
pub(crate) fn find_default_profile(profiles: &Path) -> Option<PathBuf> {
    let mut candidates: Vec<(bool, PathBuf)> = std::fs::read_dir(profiles)
        .ok()?
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.ends_with(".default-release") {
                Some((false, entry.path()))
            } else if name.ends_with(".default") {
                Some((true, entry.path()))
            } else {
                None
            }
        })
        .collect();
    candidates.sort();
    candidates.into_iter().next().map(|(_, path)| path)
}
