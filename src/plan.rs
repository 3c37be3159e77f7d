//! Turns a pass request into the engines that carry it out.
//!
//! A configuration tree holds one directory per artifact type:
//!
//! | Directory | Handler |
//! |---|---|
//! | `db_kinds` (deprecated, boot only), `db/kinds` | db kinds, main database |
//! | `mediadb/kinds`, `tempdb/kinds` | db kinds, media / temp database |
//! | `db/permissions`, `mediadb/permissions`, `tempdb/permissions` | db permissions |
//! | `filecache_types` | file cache types |
//! | `activities` | activities |
//!
//! Boot passes scan the shared tree; package passes scan
//! `<install root>/usr/palm/{applications|services}/<id>/configuration/`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::artifact::{ConfigKind, RunMode};
use crate::bus::ServiceBus;
use crate::cache::StampCache;
use crate::config::LayoutConfig;
use crate::engine::{ConfigEngine, EngineOptions};
use crate::error::ConfigError;
use crate::handlers::{
    ActivityHandler, ConfigHandler, DbKindHandler, DbPermissionsHandler, DbService,
    FileCacheHandler,
};
use crate::runner::PassRunner;

pub const OLD_DB_KIND_DIR: &str = "db_kinds";
pub const DB_KIND_DIR: &str = "db/kinds";
pub const DB_PERMISSIONS_DIR: &str = "db/permissions";
pub const MEDIADB_KIND_DIR: &str = "mediadb/kinds";
pub const MEDIADB_PERMISSIONS_DIR: &str = "mediadb/permissions";
pub const TEMPDB_KIND_DIR: &str = "tempdb/kinds";
pub const TEMPDB_PERMISSIONS_DIR: &str = "tempdb/permissions";
pub const FILE_CACHE_CONFIG_DIR: &str = "filecache_types";
pub const ACTIVITY_CONFIG_DIR: &str = "activities";
pub const APPS_DIR: &str = "applications";
pub const SERVICES_DIR: &str = "services";
pub const CONF_SUBDIR: &str = "configuration";

/// One artifact type a pass may cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanType {
    DbKinds,
    DbPermissions,
    FileCache,
    Activities,
}

impl ScanType {
    const ALL: [ScanType; 4] = [
        ScanType::DbKinds,
        ScanType::DbPermissions,
        ScanType::FileCache,
        ScanType::Activities,
    ];

    fn bit(self) -> u8 {
        match self {
            ScanType::DbKinds => 1,
            ScanType::DbPermissions => 1 << 1,
            ScanType::FileCache => 1 << 2,
            ScanType::Activities => 1 << 3,
        }
    }
}

impl FromStr for ScanType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dbkinds" => Ok(ScanType::DbKinds),
            "dbpermissions" => Ok(ScanType::DbPermissions),
            "filecache" => Ok(ScanType::FileCache),
            "activities" => Ok(ScanType::Activities),
            other => Err(ConfigError::InvalidArgument(format!(
                "unrecognized type '{}'",
                other
            ))),
        }
    }
}

/// Set of artifact types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanTypes(u8);

impl ScanTypes {
    pub fn none() -> Self {
        Self(0)
    }

    pub fn all() -> Self {
        ScanType::ALL.into_iter().collect()
    }

    pub fn insert(&mut self, scan_type: ScanType) {
        self.0 |= scan_type.bit();
    }

    pub fn contains(self, scan_type: ScanType) -> bool {
        self.0 & scan_type.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Parse type names; an empty list selects every type.
    pub fn parse<S: AsRef<str>>(names: &[S]) -> Result<Self, ConfigError> {
        if names.is_empty() {
            return Ok(Self::all());
        }
        names.iter().map(|n| n.as_ref().parse::<ScanType>()).collect()
    }
}

impl FromIterator<ScanType> for ScanTypes {
    fn from_iter<I: IntoIterator<Item = ScanType>>(iter: I) -> Self {
        let mut types = Self::none();
        for scan_type in iter {
            types.insert(scan_type);
        }
        types
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageType {
    Application,
    Service,
}

impl PackageType {
    fn dir(self) -> &'static str {
        match self {
            PackageType::Application => APPS_DIR,
            PackageType::Service => SERVICES_DIR,
        }
    }

    fn config_kind(self) -> ConfigKind {
        match self {
            PackageType::Application => ConfigKind::Application,
            PackageType::Service => ConfigKind::Service,
        }
    }
}

impl FromStr for PackageType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "app" => Ok(PackageType::Application),
            "service" => Ok(PackageType::Service),
            other => Err(ConfigError::InvalidArgument(format!(
                "package type must be 'app' or 'service', got '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageLocation {
    System,
    ThirdParty,
}

impl FromStr for PackageLocation {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(PackageLocation::System),
            "third-party" | "third party" => Ok(PackageLocation::ThirdParty),
            other => Err(ConfigError::InvalidArgument(format!(
                "package location must be 'system' or 'third-party', got '{}'",
                other
            ))),
        }
    }
}

/// An installed application or service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRef {
    pub id: String,
    pub package_type: PackageType,
    pub location: PackageLocation,
}

impl fmt::Display for PackageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?}, {:?})", self.id, self.package_type, self.location)
    }
}

/// What a pass should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassRequest {
    /// Apply the shared configuration tree.
    Boot { types: ScanTypes },
    /// Apply a package's configuration; `force` ignores existing stamps.
    Scan { package: PackageRef, force: bool },
    /// Remove a package's configuration.
    Unconfigure { package: PackageRef, types: ScanTypes },
}

impl PassRequest {
    /// Parse command-line arguments (without the program name).
    ///
    /// ```text
    /// run [types...]
    /// scan|rescan <id> <app|service> <system|third-party>
    /// unconfigure <id> <app|service> <system|third-party> [types...]
    /// ```
    ///
    /// No arguments means a boot pass over every type.
    pub fn from_args<S: AsRef<str>>(args: &[S]) -> Result<Self, ConfigError> {
        let Some((command, rest)) = args.split_first() else {
            return Ok(PassRequest::Boot { types: ScanTypes::all() });
        };

        match command.as_ref() {
            "run" => Ok(PassRequest::Boot { types: ScanTypes::parse(rest)? }),
            "scan" | "rescan" => {
                let (package, extra) = parse_package(rest)?;
                if !extra.is_empty() {
                    return Err(ConfigError::InvalidArgument(
                        "scan takes no scan types".to_string(),
                    ));
                }
                Ok(PassRequest::Scan {
                    package,
                    force: command.as_ref() == "rescan",
                })
            }
            "unconfigure" => {
                let (package, types) = parse_package(rest)?;
                Ok(PassRequest::Unconfigure {
                    package,
                    types: ScanTypes::parse(types)?,
                })
            }
            other => Err(ConfigError::InvalidArgument(format!(
                "unknown command '{}'",
                other
            ))),
        }
    }
}

fn parse_package<S: AsRef<str>>(args: &[S]) -> Result<(PackageRef, &[S]), ConfigError> {
    let [id, package_type, location, rest @ ..] = args else {
        return Err(ConfigError::InvalidArgument(
            "expected <id> <app|service> <system|third-party>".to_string(),
        ));
    };
    let package = PackageRef {
        id: id.as_ref().to_string(),
        package_type: package_type.as_ref().parse()?,
        location: location.as_ref().parse()?,
    };
    Ok((package, rest))
}

/// Builds engines for pass requests.
pub struct PassPlanner {
    layout: LayoutConfig,
    cache: StampCache,
    bus: Arc<dyn ServiceBus>,
}

impl PassPlanner {
    pub fn new(layout: LayoutConfig, cache: StampCache, bus: Arc<dyn ServiceBus>) -> Self {
        Self { layout, cache, bus }
    }

    /// Configuration directory of a package, and whether the package itself
    /// is installed.
    pub fn package_dir(&self, package: &PackageRef) -> (PathBuf, bool) {
        let base = match package.location {
            PackageLocation::System => &self.layout.system_base,
            PackageLocation::ThirdParty => &self.layout.third_party_base,
        };
        let package_root = base
            .join(&self.layout.palm_offset)
            .join(package.package_type.dir())
            .join(&package.id);
        let installed = package_root.is_dir();
        (package_root.join(CONF_SUBDIR), installed)
    }

    /// Add the engines for `request` to `runner`.
    pub fn plan(&self, request: &PassRequest, runner: &mut PassRunner) {
        match request {
            PassRequest::Boot { types } => {
                let scan = Scan {
                    id: String::new(),
                    kind: ConfigKind::Unknown,
                    mode: RunMode::Apply,
                    base: &self.layout.root_base_dir,
                    deprecated_db_kinds: true,
                };
                self.scan_dir(&scan, *types, runner);
            }
            PassRequest::Scan { package, force } => {
                let mode = if *force { RunMode::Reapply } else { RunMode::Apply };
                self.scan_package(package, mode, ScanTypes::all(), runner);
            }
            PassRequest::Unconfigure { package, types } => {
                self.scan_package(package, RunMode::Remove, *types, runner);
            }
        }
    }

    fn scan_package(
        &self,
        package: &PackageRef,
        mode: RunMode,
        types: ScanTypes,
        runner: &mut PassRunner,
    ) {
        debug!(package = %package, mode = %mode, "Scanning package");
        let (conf_dir, installed) = self.package_dir(package);
        if !installed {
            warn!(package = %package, "Package is not installed");
            runner.set_wrong_application();
        }

        let scan = Scan {
            id: package.id.clone(),
            kind: package.package_type.config_kind(),
            mode,
            base: &conf_dir,
            deprecated_db_kinds: false,
        };
        self.scan_dir(&scan, types, runner);
    }

    fn scan_dir(&self, scan: &Scan<'_>, types: ScanTypes, runner: &mut PassRunner) {
        let mut dirs: Vec<(&str, Arc<dyn ConfigHandler>)> = Vec::new();

        if types.contains(ScanType::DbKinds) {
            if scan.deprecated_db_kinds {
                warn!(directory = %scan.base.display(), "Scanning deprecated db kind directory");
                dirs.push((OLD_DB_KIND_DIR, self.db_kinds(DbService::Main)));
            }
            dirs.push((DB_KIND_DIR, self.db_kinds(DbService::Main)));
            dirs.push((MEDIADB_KIND_DIR, self.db_kinds(DbService::Media)));
            dirs.push((TEMPDB_KIND_DIR, self.db_kinds(DbService::Temp)));
        }
        if types.contains(ScanType::DbPermissions) {
            dirs.push((DB_PERMISSIONS_DIR, self.db_permissions(DbService::Main)));
            dirs.push((MEDIADB_PERMISSIONS_DIR, self.db_permissions(DbService::Media)));
            dirs.push((TEMPDB_PERMISSIONS_DIR, self.db_permissions(DbService::Temp)));
        }
        if types.contains(ScanType::FileCache) {
            dirs.push((
                FILE_CACHE_CONFIG_DIR,
                Arc::new(FileCacheHandler::new(Arc::clone(&self.bus))),
            ));
        }
        if types.contains(ScanType::Activities) {
            let handler = ActivityHandler::new(
                Arc::clone(&self.bus),
                &self.layout.root_base_dir.join(ACTIVITY_CONFIG_DIR),
                &self.layout.first_use_flag,
            );
            dirs.push((ACTIVITY_CONFIG_DIR, Arc::new(handler)));
        }

        for (dir, handler) in dirs {
            let options = EngineOptions {
                id: scan.id.clone(),
                kind: scan.kind,
                mode: scan.mode,
                root: scan.base.join(dir),
            };
            let engine = ConfigEngine::new(options, handler, self.cache.clone(), runner.sink());
            runner.add_engine(engine);
        }
    }

    fn db_kinds(&self, service: DbService) -> Arc<dyn ConfigHandler> {
        Arc::new(DbKindHandler::new(Arc::clone(&self.bus), service))
    }

    fn db_permissions(&self, service: DbService) -> Arc<dyn ConfigHandler> {
        Arc::new(DbPermissionsHandler::new(Arc::clone(&self.bus), service))
    }
}

struct Scan<'a> {
    id: String,
    kind: ConfigKind,
    mode: RunMode,
    base: &'a Path,
    deprecated_db_kinds: bool,
}
