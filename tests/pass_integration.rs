//! End-to-end configuration passes over a temporary filesystem layout.

use std::fs::{self, FileTimes};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde_json::json;
use tempfile::TempDir;

use configurator::bus::{BusRequest, MockServiceBus};
use configurator::cache::StampCache;
use configurator::config::LayoutConfig;
use configurator::plan::{PackageLocation, PackageRef, PackageType, PassPlanner, PassRequest, ScanTypes};
use configurator::runner::{PassRunner, PassSummary};

struct Platform {
    temp: TempDir,
    bus: Arc<MockServiceBus>,
}

impl Platform {
    fn new() -> Self {
        Self {
            temp: TempDir::new().unwrap(),
            bus: Arc::new(MockServiceBus::new()),
        }
    }

    fn layout(&self) -> LayoutConfig {
        LayoutConfig {
            root_base_dir: self.path("etc/palm"),
            third_party_base: self.path("media/cryptofs/apps"),
            system_base: self.temp.path().to_path_buf(),
            palm_offset: PathBuf::from("usr/palm"),
            first_use_flag: self.path("var/luna/preferences/ran-firstuse"),
        }
    }

    fn cache(&self) -> StampCache {
        StampCache::new(self.path("var/cache/configurator"), self.path("var/cache/configurator/_stamps"))
    }

    fn path(&self, relative: &str) -> PathBuf {
        self.temp.path().join(relative)
    }

    fn write(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.path(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    async fn pass(&self, request: PassRequest) -> PassSummary {
        let planner = PassPlanner::new(self.layout(), self.cache(), self.bus.clone());
        let mut runner = PassRunner::new();
        planner.plan(&request, &mut runner);
        runner.run().await
    }

    async fn requests(&self) -> Vec<BusRequest> {
        let mut requests = self.bus.take_requests().await;
        requests.sort_by(|a, b| (&a.service, &a.method).cmp(&(&b.service, &b.method)));
        requests
    }
}

fn boot() -> PassRequest {
    PassRequest::Boot { types: ScanTypes::all() }
}

fn app(id: &str) -> PackageRef {
    PackageRef {
        id: id.to_string(),
        package_type: PackageType::Application,
        location: PackageLocation::System,
    }
}

fn set_mtime(path: &Path, mtime: SystemTime) {
    fs::File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_times(FileTimes::new().set_modified(mtime))
        .unwrap();
}

#[tokio::test]
async fn test_boot_pass_applies_every_artifact_type() {
    let platform = Platform::new();
    platform.write(
        "etc/palm/db/kinds/com.example.mail/account",
        r#"{"id": "com.example.mail.account:1"}"#,
    );
    platform.write(
        "etc/palm/db/permissions/com.example.mail/account",
        r#"[{"type": "db.kind", "object": "com.example.mail.account:1"}]"#,
    );
    platform.write("etc/palm/filecache_types/com.example.mail/attachments", r#"{"typeName": "attachments"}"#);
    platform.write(
        "etc/palm/activities/services/com.example.mail/sync",
        r#"{"activity": {"name": "sync"}, "firstUseSafe": true}"#,
    );

    let summary = platform.pass(boot()).await;

    assert!(summary.is_success());
    assert_eq!(summary.reply(), json!({"returnValue": true, "configured": 4}));

    let requests = platform.requests().await;
    let calls: Vec<(&str, &str)> = requests
        .iter()
        .map(|r| (r.service.as_str(), r.method.as_str()))
        .collect();
    assert_eq!(
        calls,
        vec![
            ("com.palm.activitymanager", "create"),
            ("com.palm.db", "putKind"),
            ("com.palm.db", "putPermissions"),
            ("com.palm.filecache", "DefineType"),
        ]
    );
    assert_eq!(requests[1].payload["owner"], "com.example.mail");
}

#[tokio::test]
async fn test_repeated_boot_pass_is_cached() {
    let platform = Platform::new();
    let kind = platform.write("etc/palm/db/kinds/com.example.mail/account", r#"{"id": "a:1"}"#);
    let other = platform.write("etc/palm/db/kinds/com.example.mail/folder", r#"{"id": "f:1"}"#);
    let base = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
    set_mtime(&kind, base);
    set_mtime(&other, base);

    let first = platform.pass(boot()).await;
    assert_eq!(first.outcome.applied().len(), 2);
    assert_eq!(platform.requests().await.len(), 2);

    let second = platform.pass(boot()).await;
    assert_eq!(second.reply()["configured"], 0);
    assert!(platform.requests().await.is_empty());

    set_mtime(&other, base + Duration::from_secs(120));
    let third = platform.pass(boot()).await;
    assert_eq!(third.outcome.applied(), &[other]);
    assert_eq!(platform.requests().await[0].payload["id"], "f:1");
}

#[tokio::test]
async fn test_partial_failure_reply() {
    let platform = Platform::new();
    platform.write("etc/palm/db/kinds/com.example.mail/account", r#"{"id": "a:1"}"#);
    platform.write("etc/palm/filecache_types/com.example.mail/broken", "{ nope");

    let summary = platform.pass(boot()).await;

    assert!(!summary.is_success());
    assert_eq!(
        summary.reply()["errorText"],
        "Partial configuration - 1 ok, 1 failed"
    );
}

#[tokio::test]
async fn test_rescan_then_unconfigure_package() {
    let platform = Platform::new();
    let conf = "usr/palm/applications/com.example.app/configuration";
    let kind = platform.write(&format!("{}/db/kinds/item", conf), r#"{"id": "com.example.app.item:1"}"#);
    let file_type = platform.write(&format!("{}/filecache_types/thumbs", conf), r#"{"typeName": "thumbs"}"#);
    let cache = platform.cache();

    let scan = platform
        .pass(PassRequest::Scan { package: app("com.example.app"), force: false })
        .await;
    assert!(scan.is_success());
    assert!(cache.is_fresh(&kind));
    assert!(cache.is_fresh(&file_type));
    let requests = platform.requests().await;
    assert_eq!(requests[0].sender.as_deref(), Some("com.example.app"));

    let rescan = platform
        .pass(PassRequest::Scan { package: app("com.example.app"), force: true })
        .await;
    assert_eq!(rescan.outcome.applied().len(), 2);
    assert_eq!(platform.requests().await.len(), 2);

    let removal = platform
        .pass(PassRequest::Unconfigure {
            package: app("com.example.app"),
            types: ScanTypes::all(),
        })
        .await;
    assert!(removal.is_success());
    assert!(!cache.is_fresh(&kind));
    assert!(!cache.is_fresh(&file_type));

    let requests = platform.requests().await;
    assert_eq!(requests[0].method, "delKind");
    assert_eq!(requests[0].payload, json!({"id": "com.example.app.item:1"}));
    assert_eq!(requests[1].method, "DeleteType");
}

#[tokio::test]
async fn test_unknown_package_is_reported() {
    let platform = Platform::new();

    let summary = platform
        .pass(PassRequest::Scan { package: app("com.example.missing"), force: false })
        .await;

    assert!(summary.wrong_application);
    assert_eq!(
        summary.reply(),
        json!({"returnValue": false, "errorText": "Application or service doesn't exist"})
    );
}

#[tokio::test]
async fn test_transport_failure_fails_artifacts() {
    let platform = Platform::new();
    platform.write("etc/palm/db/kinds/com.example.mail/account", r#"{"id": "a:1"}"#);
    platform.bus.set_fail_on_call(true).await;

    let summary = platform.pass(boot()).await;

    assert_eq!(summary.outcome.failed().len(), 1);
    assert!(summary.outcome.applied().is_empty());
}
