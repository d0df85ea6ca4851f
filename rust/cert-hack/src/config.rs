//! Process configuration consumed by the forging paths.
//!
//! The host supplies [`ConfigSource`] and [`BootState`]. [`StaticConfig`] and
//! [`DeviceBootState`] are in-process implementations built from the module's
//! text files and device properties.

use std::collections::HashMap;
use std::time::SystemTime;

use hex_literal::hex;
use log::warn;

/// Patch level used when a configured value cannot be parsed.
pub const FALLBACK_PATCH_LEVEL: i32 = 202404;
pub const FALLBACK_PATCH_LEVEL_LONG: i64 = 20240401;

/// Verified boot key reported when the device does not expose one.
pub const DEFAULT_BOOT_KEY: [u8; 32] =
    hex!("c34b68e0571933605261e790156658696e4788a88cb5b71d6173cf214c7e87ca");
/// Verified boot hash reported when `ro.boot.vbmeta.digest` is unusable.
pub const DEFAULT_BOOT_HASH: [u8; 32] =
    hex!("d75926e016f5acee00523712b830379c53203ac08cb8a485583005f529ee7587");

/// Installed package metadata used to build the attestation application id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageInfo {
    pub version_code: i64,
    /// DER of each signing certificate.
    pub signing_certificates: Vec<Vec<u8>>,
}

pub trait ConfigSource: Send + Sync {
    /// OS patch level (`YYYYMM`) to report to `caller`.
    fn effective_patch_level(&self, caller: u32) -> i32;
    fn module_hash_override(&self) -> Option<Vec<u8>>;
    fn build_variable(&self, name: &str) -> Option<String>;
    fn packages_for_caller(&self, caller: u32) -> Vec<String>;
    fn package_info(&self, package: &str, caller: u32) -> Option<PackageInfo>;
}

pub trait BootState: Send + Sync {
    fn verified_boot_key(&self) -> [u8; 32];
    fn verified_boot_hash(&self) -> [u8; 32];
    fn os_version(&self) -> i32;
    fn keymint_version(&self) -> i32;
    /// Boot patch level (`YYYYMMDD`).
    fn boot_patch_level(&self) -> i64;
}

/// Module hash to embed: the override, else the `MODULE_HASH` build variable.
pub fn module_hash(config: &dyn ConfigSource) -> Option<Vec<u8>> {
    if let Some(hash) = config.module_hash_override() {
        return Some(hash);
    }
    parse_module_hash(&config.build_variable("MODULE_HASH")?)
}

/// Integer build variable, ignoring values that do not parse.
pub fn build_var_i32(config: &dyn ConfigSource, name: &str) -> Option<i32> {
    config.build_variable(name)?.trim().parse().ok()
}

fn split_patch_date(text: &str) -> Option<(i64, i64, i64)> {
    let mut parts = text.trim().split('-');
    let year = parts.next()?.parse().ok()?;
    let month = parts.next()?.parse().ok()?;
    // A missing day is tolerated for the short form.
    let day: Option<i64> = parts.next().map(str::parse).transpose().ok()?;
    if parts.next().is_some() || !(1..=12).contains(&month) {
        return None;
    }
    match day {
        Some(day) if !(1..=31).contains(&day) => None,
        day => Some((year, month, day.unwrap_or(-1))),
    }
}

/// `YYYY-MM-DD` (or `YYYY-MM`) to `YYYYMM`.
pub fn patch_level_short(text: &str) -> i32 {
    split_patch_date(text)
        .and_then(|(year, month, _)| i32::try_from(year * 100 + month).ok())
        .unwrap_or_else(|| {
            warn!("invalid patch level {text:?}");
            FALLBACK_PATCH_LEVEL
        })
}

/// `YYYY-MM-DD` to `YYYYMMDD`.
pub fn patch_level_long(text: &str) -> i64 {
    match split_patch_date(text) {
        Some((year, month, day)) if day >= 0 => year * 10000 + month * 100 + day,
        _ => {
            warn!("invalid patch level {text:?}");
            FALLBACK_PATCH_LEVEL_LONG
        }
    }
}

/// Expand `today` and the `YYYY`/`MM`/`DD` placeholders against `date`.
fn expand_patch_template(text: &str, (year, month, day): (u16, u8, u8)) -> String {
    if text.eq_ignore_ascii_case("today") {
        return format!("{year:04}-{month:02}-{day:02}");
    }
    text.replace("YYYY", &format!("{year:04}"))
        .replace("MM", &format!("{month:02}"))
        .replace("DD", &format!("{day:02}"))
}

fn today_utc() -> (u16, u8, u8) {
    match der::DateTime::from_system_time(SystemTime::now()) {
        Ok(now) => (now.year(), now.month(), now.day()),
        Err(_) => (1970, 1, 1),
    }
}

/// Parsed `security_patch.txt`.
///
/// `package=value` lines override one package; a bare value is the default;
/// `#` lines are comments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecurityPatchOverrides {
    per_package: HashMap<String, String>,
    default: Option<String>,
}

impl SecurityPatchOverrides {
    pub fn parse(text: &str) -> Self {
        let mut overrides = Self::default();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match line.split_once('=') {
                Some((package, value)) => {
                    overrides
                        .per_package
                        .insert(package.trim().to_owned(), value.trim().to_owned());
                }
                None => overrides.default = Some(line.to_owned()),
            }
        }
        overrides
    }

    /// Override for a caller owning `packages`; only the first package is
    /// consulted, as the platform reports it.
    pub fn resolve(&self, packages: &[String]) -> Option<&str> {
        packages
            .first()
            .and_then(|package| self.per_package.get(package))
            .or(self.default.as_ref())
            .map(String::as_str)
    }
}

/// `KEY=VALUE` lines; comments and blank lines skipped.
pub fn parse_build_vars(text: &str) -> HashMap<String, String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim().to_owned(), value.trim().to_owned()))
        .collect()
}

/// Contents of the module hash file. Invalid hex clears the override.
pub fn parse_module_hash(text: &str) -> Option<Vec<u8>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    hex::decode(text)
        .map_err(|e| warn!("failed to parse module hash: {e}"))
        .ok()
}

/// A fixed [`ConfigSource`].
#[derive(Debug, Clone, Default)]
pub struct StaticConfig {
    device_patch_level: i32,
    security_patch: SecurityPatchOverrides,
    module_hash: Option<Vec<u8>>,
    build_vars: HashMap<String, String>,
    packages: HashMap<u32, Vec<String>>,
    package_info: HashMap<String, PackageInfo>,
}

impl StaticConfig {
    /// `device_security_patch` is the device's own `YYYY-MM-DD` patch.
    pub fn new(device_security_patch: &str) -> Self {
        StaticConfig {
            device_patch_level: patch_level_short(device_security_patch),
            ..Default::default()
        }
    }

    pub fn with_security_patch_overrides(mut self, text: &str) -> Self {
        self.security_patch = SecurityPatchOverrides::parse(text);
        self
    }

    pub fn with_build_vars(mut self, text: &str) -> Self {
        self.build_vars = parse_build_vars(text);
        self
    }

    pub fn with_build_var(mut self, name: &str, value: &str) -> Self {
        self.build_vars.insert(name.to_owned(), value.to_owned());
        self
    }

    pub fn with_module_hash(mut self, hash: Option<Vec<u8>>) -> Self {
        self.module_hash = hash;
        self
    }

    pub fn with_package(mut self, caller: u32, name: &str, info: PackageInfo) -> Self {
        self.packages.entry(caller).or_default().push(name.to_owned());
        self.package_info.insert(name.to_owned(), info);
        self
    }

    fn patch_level_for(&self, caller: u32, today: (u16, u8, u8)) -> i32 {
        let packages = self.packages_for_caller(caller);
        match self.security_patch.resolve(&packages) {
            Some(value) => patch_level_short(&expand_patch_template(value, today)),
            None => self.device_patch_level,
        }
    }
}

impl ConfigSource for StaticConfig {
    fn effective_patch_level(&self, caller: u32) -> i32 {
        self.patch_level_for(caller, today_utc())
    }

    fn module_hash_override(&self) -> Option<Vec<u8>> {
        self.module_hash.clone()
    }

    fn build_variable(&self, name: &str) -> Option<String> {
        self.build_vars.get(name).cloned()
    }

    fn packages_for_caller(&self, caller: u32) -> Vec<String> {
        self.packages.get(&caller).cloned().unwrap_or_default()
    }

    fn package_info(&self, package: &str, _caller: u32) -> Option<PackageInfo> {
        self.package_info.get(package).cloned()
    }
}

/// [`BootState`] derived from device properties.
#[derive(Debug, Clone)]
pub struct DeviceBootState {
    sdk: u32,
    security_patch: String,
    vbmeta_digest: Option<String>,
}

impl DeviceBootState {
    pub fn new(sdk: u32, security_patch: &str) -> Self {
        DeviceBootState { sdk, security_patch: security_patch.to_owned(), vbmeta_digest: None }
    }

    /// Value of `ro.boot.vbmeta.digest`.
    pub fn with_vbmeta_digest(mut self, digest: &str) -> Self {
        self.vbmeta_digest = Some(digest.trim().to_owned());
        self
    }
}

impl BootState for DeviceBootState {
    fn verified_boot_key(&self) -> [u8; 32] {
        DEFAULT_BOOT_KEY
    }

    fn verified_boot_hash(&self) -> [u8; 32] {
        self.vbmeta_digest
            .as_deref()
            .filter(|digest| digest.len() == 64)
            .and_then(|digest| {
                let mut hash = [0u8; 32];
                hex::decode_to_slice(digest, &mut hash).ok().map(|_| hash)
            })
            .unwrap_or(DEFAULT_BOOT_HASH)
    }

    fn os_version(&self) -> i32 {
        match self.sdk {
            36 => 160000,
            35 => 150000,
            34 => 140000,
            33 => 130000,
            32 => 120100,
            31 => 120000,
            _ => 0,
        }
    }

    fn keymint_version(&self) -> i32 {
        match self.sdk {
            35 | 36 => 400,
            34 => 300,
            33 => 200,
            _ => 100,
        }
    }

    fn boot_patch_level(&self) -> i64 {
        patch_level_long(&self.security_patch)
    }
}
