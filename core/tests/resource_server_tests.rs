use assert_fs::prelude::*;
use kiln_core::{
    ChangeKind, Config, DependencyMap, FileChange, NullRuntimeHooks, Origin, RequestHandle,
    ResourceId, ResourceServer, RuntimeHooks,
};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A spy compiler: records every invocation, then copies the source to the
/// output. The invocation log is what lets tests assert that cache hits
/// never spawn a process.
fn spy_compiler(dir: &Path) -> PathBuf {
    let log = dir.join("invocations.log");
    script(
        dir,
        &format!(
            r#"
if [ "$1" = "--version" ]; then echo 3; exit 0; fi
echo "$@" >> {log}
SRC=""; OUT=""
while [ $# -gt 0 ]; do
  case "$1" in
    --source) SRC="$2"; shift 2;;
    --output) OUT="$2"; shift 2;;
    *) shift;;
  esac
done
cp "$SRC" "$OUT"
echo "compiled $SRC"
"#,
            log = log.display()
        ),
    )
}

fn script(dir: &Path, body: &str) -> PathBuf {
    let bin = dir.join("kilnc");
    let mut f = std::fs::File::create(&bin).unwrap();
    writeln!(f, "#!/bin/sh").unwrap();
    writeln!(f, "{body}").unwrap();
    drop(f);
    let mut perms = std::fs::metadata(&bin).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&bin, perms).unwrap();
    bin
}

fn invocation_count(dir: &Path) -> usize {
    std::fs::read_to_string(dir.join("invocations.log"))
        .map(|log| log.lines().count())
        .unwrap_or(0)
}

fn config(source_root: &Path, compiler: PathBuf) -> Config {
    Config::builder()
        .source_root(source_root.to_path_buf())
        .compiler_bin(compiler)
        .compiler_version(3)
        .max_workers(2)
        .compile_timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

async fn server(config: Config, deps: Arc<DependencyMap>) -> ResourceServer {
    ResourceServer::new(config, deps, Arc::new(NullRuntimeHooks))
        .await
        .unwrap()
}

async fn drive(server: &ResourceServer, handle: &RequestHandle) {
    for _ in 0..1000 {
        server.tick().await;
        if handle.is_complete() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("request never completed; log so far: {}", handle.log());
}

#[tokio::test]
async fn compiles_a_stale_mesh_end_to_end() {
    let workspace = assert_fs::TempDir::new().unwrap();
    let bin = spy_compiler(workspace.path());
    workspace.child("meshes/hero.msh").write_str("vertices").unwrap();

    let config = config(workspace.path(), bin);
    let output_root = config.output_root().clone();
    let server = server(config, Arc::new(DependencyMap::new())).await;

    let handle = server.submit(ResourceId::new("meshes/hero.msh"), Origin::ManualCompile, 0);
    drive(&server, &handle).await;

    let request = handle.snapshot().unwrap();
    assert!(request.has_succeeded());
    assert!(!request.has_succeeded_with_warnings());
    assert!(request.compilation_elapsed() > Duration::ZERO);
    assert_eq!(request.compiler_version(), 3);
    assert!(request.log().contains("compiled"));

    let output = output_root.join("meshes/hero.msh");
    assert_eq!(std::fs::read_to_string(&output).unwrap(), "vertices");
    assert!(output
        .parent()
        .unwrap()
        .join("hero.msh.meta.json")
        .is_file());

    assert_eq!(invocation_count(workspace.path()), 1);
    let invocations = std::fs::read_to_string(workspace.path().join("invocations.log")).unwrap();
    assert!(invocations.contains("meshes/hero.msh"));
}

#[tokio::test]
async fn up_to_date_outputs_never_spawn_the_compiler() {
    let workspace = assert_fs::TempDir::new().unwrap();
    let bin = spy_compiler(workspace.path());
    workspace.child("meshes/hero.msh").write_str("vertices").unwrap();

    let server = server(
        config(workspace.path(), bin),
        Arc::new(DependencyMap::new()),
    )
    .await;

    let first = server.submit(ResourceId::new("meshes/hero.msh"), Origin::ManualCompile, 0);
    drive(&server, &first).await;
    assert_eq!(invocation_count(workspace.path()), 1);

    let second = server.submit(ResourceId::new("meshes/hero.msh"), Origin::ManualCompile, 0);
    drive(&server, &second).await;

    assert!(second.has_succeeded());
    assert!(second.log().contains("up to date"));
    assert_eq!(invocation_count(workspace.path()), 1);
}

#[tokio::test]
async fn concurrent_submits_for_one_resource_coalesce() {
    let workspace = assert_fs::TempDir::new().unwrap();
    let bin = spy_compiler(workspace.path());
    workspace.child("meshes/hero.msh").write_str("vertices").unwrap();

    let server = server(
        config(workspace.path(), bin),
        Arc::new(DependencyMap::new()),
    )
    .await;

    let first = server.submit(ResourceId::new("meshes/hero.msh"), Origin::External, 1);
    let second = server.submit(ResourceId::new("meshes/hero.msh"), Origin::External, 2);
    assert_eq!(first.id(), second.id());

    drive(&server, &first).await;
    assert!(second.has_succeeded());
    assert_eq!(invocation_count(workspace.path()), 1);
}

#[tokio::test]
async fn compiler_failures_carry_the_diagnostics_log() {
    let workspace = assert_fs::TempDir::new().unwrap();
    let bin = script(
        workspace.path(),
        r#"
if [ "$1" = "--version" ]; then echo 3; exit 0; fi
echo "error: bad vertex stream" >&2
exit 1
"#,
    );
    workspace.child("meshes/hero.msh").write_str("vertices").unwrap();

    let server = server(
        config(workspace.path(), bin),
        Arc::new(DependencyMap::new()),
    )
    .await;

    let handle = server.submit(ResourceId::new("meshes/hero.msh"), Origin::ManualCompile, 0);
    drive(&server, &handle).await;

    let request = handle.snapshot().unwrap();
    assert!(request.has_failed());
    assert!(request.log().contains("error: bad vertex stream"));
}

#[tokio::test]
async fn warnings_are_distinguished_from_clean_successes() {
    let workspace = assert_fs::TempDir::new().unwrap();
    let bin = script(
        workspace.path(),
        r#"
if [ "$1" = "--version" ]; then echo 3; exit 0; fi
echo "warning: degenerate triangles removed"
exit 0
"#,
    );
    workspace.child("meshes/hero.msh").write_str("vertices").unwrap();

    let server = server(
        config(workspace.path(), bin),
        Arc::new(DependencyMap::new()),
    )
    .await;

    let handle = server.submit(ResourceId::new("meshes/hero.msh"), Origin::ManualCompile, 0);
    drive(&server, &handle).await;

    let request = handle.snapshot().unwrap();
    assert!(request.has_succeeded());
    assert!(request.has_succeeded_with_warnings());
}

#[tokio::test]
async fn hung_compilers_time_out_and_free_the_worker() {
    let workspace = assert_fs::TempDir::new().unwrap();
    let bin = script(
        workspace.path(),
        r#"
if [ "$1" = "--version" ]; then echo 3; exit 0; fi
sleep 30
"#,
    );
    workspace.child("meshes/hero.msh").write_str("vertices").unwrap();

    let config = Config::builder()
        .source_root(workspace.path().to_path_buf())
        .compiler_bin(bin)
        .compiler_version(3)
        .max_workers(2)
        .compile_timeout(Duration::from_millis(200))
        .build()
        .unwrap();
    let server = server(config, Arc::new(DependencyMap::new())).await;

    let handle = server.submit(ResourceId::new("meshes/hero.msh"), Origin::ManualCompile, 0);
    drive(&server, &handle).await;

    let request = handle.snapshot().unwrap();
    assert!(request.has_failed());
    assert!(request.log().contains("timed out"));
    assert_eq!(server.workers_available(), server.worker_capacity());
}

#[tokio::test]
async fn crashed_compiles_get_one_bounded_retry() {
    let workspace = assert_fs::TempDir::new().unwrap();
    let bin = script(
        workspace.path(),
        &format!(
            r#"
if [ "$1" = "--version" ]; then echo 3; exit 0; fi
echo crash >> {log}
kill -9 $$
"#,
            log = workspace.path().join("invocations.log").display()
        ),
    );
    workspace.child("meshes/hero.msh").write_str("vertices").unwrap();

    let server = server(
        config(workspace.path(), bin),
        Arc::new(DependencyMap::new()),
    )
    .await;

    let handle = server.submit(ResourceId::new("meshes/hero.msh"), Origin::ManualCompile, 0);
    drive(&server, &handle).await;

    let request = handle.snapshot().unwrap();
    assert!(request.has_failed());
    assert!(request.log().contains("retrying after abnormal termination"));
    assert_eq!(invocation_count(workspace.path()), 2);
}

#[tokio::test]
async fn pending_requests_can_be_cancelled_before_any_compile() {
    let workspace = assert_fs::TempDir::new().unwrap();
    let bin = spy_compiler(workspace.path());
    workspace.child("meshes/hero.msh").write_str("vertices").unwrap();

    let server = server(
        config(workspace.path(), bin),
        Arc::new(DependencyMap::new()),
    )
    .await;

    let handle = server.submit(ResourceId::new("meshes/hero.msh"), Origin::External, 1);
    assert!(server.cancel(handle.id()));

    let request = handle.snapshot().unwrap();
    assert!(request.has_failed());
    assert!(request.log().contains("cancelled"));

    server.tick().await;
    assert_eq!(invocation_count(workspace.path()), 0);
}

#[tokio::test]
async fn file_changes_recompile_exactly_the_transitive_dependents() {
    let workspace = assert_fs::TempDir::new().unwrap();
    let bin = spy_compiler(workspace.path());
    workspace.child("meshes/hero.msh").write_str("vertices").unwrap();
    workspace.child("meshes/hero.skel").write_str("bones").unwrap();
    workspace.child("meshes/orc.msh").write_str("other").unwrap();

    let deps = Arc::new(DependencyMap::new());
    let hero = ResourceId::new("meshes/hero.msh");
    let orc = ResourceId::new("meshes/orc.msh");
    deps.set_source_dependencies(&hero, vec!["meshes/hero.skel".into()])
        .unwrap();

    let server = server(config(workspace.path(), bin), deps).await;

    let hero_handle = server.submit(hero.clone(), Origin::ManualCompile, 0);
    let orc_handle = server.submit(orc.clone(), Origin::ManualCompile, 0);
    drive(&server, &hero_handle).await;
    drive(&server, &orc_handle).await;
    assert_eq!(invocation_count(workspace.path()), 2);

    workspace.child("meshes/hero.skel").write_str("bones v2").unwrap();
    server.notify_file_changed(FileChange::new(
        workspace.path().join("meshes/hero.skel"),
        ChangeKind::Modified,
    ));

    // Exactly one new request: hero is invalidated, orc is untouched.
    let hero_requests: Vec<_> = server
        .requests()
        .into_iter()
        .filter(|r| r.resource_id() == &hero)
        .collect();
    assert_eq!(hero_requests.len(), 2);
    let orc_requests: Vec<_> = server
        .requests()
        .into_iter()
        .filter(|r| r.resource_id() == &orc)
        .collect();
    assert_eq!(orc_requests.len(), 1);

    let recompile = hero_requests
        .iter()
        .find(|r| !r.is_complete())
        .expect("a fresh watcher request for hero");
    assert_eq!(recompile.origin(), Origin::FileWatcher);

    for _ in 0..1000 {
        server.tick().await;
        if server.request(recompile.id()).map(|r| r.is_complete()).unwrap_or(false) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(invocation_count(workspace.path()), 3);
}

struct TrackingHooks {
    loaded: Mutex<Vec<ResourceId>>,
    output: PathBuf,
    calls: Mutex<Vec<String>>,
}

impl RuntimeHooks for TrackingHooks {
    fn is_loaded(&self, resource: &ResourceId) -> bool {
        self.loaded.lock().unwrap().contains(resource)
    }

    fn unload(&self, resource: &ResourceId) {
        self.loaded.lock().unwrap().retain(|r| r != resource);
        self.calls.lock().unwrap().push(format!("unload {resource}"));
    }

    fn load(&self, resource: &ResourceId) {
        // By the time the runtime is asked to reload, the new output and
        // its metadata must be fully on disk.
        let output = resource.output_path(&self.output);
        assert!(output.is_file(), "load called before output was written");
        assert!(
            PathBuf::from(format!("{}.meta.json", output.display())).is_file(),
            "load called before metadata was written"
        );
        self.loaded.lock().unwrap().push(resource.clone());
        self.calls.lock().unwrap().push(format!("load {resource}"));
    }
}

#[tokio::test]
async fn loaded_resources_unload_before_recompiling_and_reload_after() {
    let workspace = assert_fs::TempDir::new().unwrap();
    let bin = spy_compiler(workspace.path());
    workspace.child("meshes/hero.msh").write_str("vertices").unwrap();

    let config = config(workspace.path(), bin);
    let hero = ResourceId::new("meshes/hero.msh");
    let hooks = Arc::new(TrackingHooks {
        loaded: Mutex::new(vec![hero.clone()]),
        output: config.output_root().clone(),
        calls: Mutex::new(vec![]),
    });

    let deps = Arc::new(DependencyMap::new());
    deps.register(&hero);
    let server = ResourceServer::new(config, deps, hooks.clone())
        .await
        .unwrap();

    server.notify_file_changed(FileChange::modified(
        workspace.path().join("meshes/hero.msh"),
    ));

    // The unload happens synchronously, before any compile is scheduled.
    assert_eq!(*hooks.calls.lock().unwrap(), vec!["unload meshes/hero.msh"]);

    for _ in 0..1000 {
        server.tick().await;
        if hooks.is_loaded(&hero) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert_eq!(
        *hooks.calls.lock().unwrap(),
        vec!["unload meshes/hero.msh", "load meshes/hero.msh"]
    );
}

#[tokio::test]
async fn compile_all_walks_the_source_tree_and_skips_outputs() {
    let workspace = assert_fs::TempDir::new().unwrap();
    let bin = spy_compiler(workspace.path());
    workspace.child("meshes/hero.msh").write_str("vertices").unwrap();
    workspace.child("anims/idle.ag").write_str("clips").unwrap();

    let server = server(
        config(workspace.path(), bin),
        Arc::new(DependencyMap::new()),
    )
    .await;

    let handles = server.compile_all();
    let resources: Vec<String> = handles
        .iter()
        .filter_map(|h| h.resource_id())
        .map(|r| r.to_string())
        .collect();
    assert!(resources.contains(&"meshes/hero.msh".to_string()));
    assert!(resources.contains(&"anims/idle.ag".to_string()));
    // The compiler script itself lives in the workspace; it gets a request
    // too, which is fine for the walk. Outputs under .kiln must not.
    assert!(resources.iter().all(|r| !r.contains(".kiln")));

    for handle in &handles {
        drive(&server, handle).await;
    }
    for handle in &handles {
        assert!(handle.is_complete());
    }
}

#[tokio::test]
async fn missing_sources_fail_without_crashing_the_scheduler() {
    let workspace = assert_fs::TempDir::new().unwrap();
    let bin = spy_compiler(workspace.path());

    let server = server(
        config(workspace.path(), bin),
        Arc::new(DependencyMap::new()),
    )
    .await;

    let handle = server.submit(ResourceId::new("meshes/gone.msh"), Origin::ManualCompile, 0);
    drive(&server, &handle).await;

    let request = handle.snapshot().unwrap();
    assert!(request.has_failed());
    assert!(request.log().contains("source missing"));
    assert_eq!(invocation_count(workspace.path()), 0);

    // The scheduler keeps serving other requests afterwards.
    workspace.child("meshes/hero.msh").write_str("vertices").unwrap();
    let ok = server.submit(ResourceId::new("meshes/hero.msh"), Origin::ManualCompile, 0);
    drive(&server, &ok).await;
    assert!(ok.has_succeeded());
}
