//! Integration tests for pack

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use tempfile::TempDir;

    fn pack(config_dir: &TempDir) -> Command {
        let mut cmd = cargo_bin_cmd!("pack");
        cmd.env("PACK_CONFIG", config_dir.path().join("config.toml"));
        cmd
    }

    #[test]
    fn help_displays() {
        let dir = TempDir::new().unwrap();
        pack(&dir)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("Build container images"));
    }

    #[test]
    fn version_displays() {
        let dir = TempDir::new().unwrap();
        pack(&dir)
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("pack"));
    }

    #[test]
    fn config_path() {
        let dir = TempDir::new().unwrap();
        pack(&dir)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show_defaults() {
        let dir = TempDir::new().unwrap();
        pack(&dir)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[build]").and(predicate::str::contains("[runtime]")));
    }

    #[test]
    fn config_init_writes_file() {
        let dir = TempDir::new().unwrap();
        pack(&dir).args(["config", "init"]).assert().success();
        assert!(dir.path().join("config.toml").exists());
    }

    #[test]
    fn invalid_config_is_reported() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("config.toml"), "[runtime\n").unwrap();
        pack(&dir)
            .args(["config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"));
    }

    #[test]
    fn build_rejects_invalid_image() {
        let dir = TempDir::new().unwrap();
        pack(&dir)
            .args(["build", "Not A Valid Image"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid image reference"));
    }

    #[test]
    fn build_requires_image_argument() {
        let dir = TempDir::new().unwrap();
        pack(&dir).arg("build").assert().failure();
    }
}

mod lifecycle_tests {
    use async_trait::async_trait;
    use pack::builder::BuilderImage;
    use pack::config::schema::ProxyConfig;
    use pack::credentials::{Anonymous, Keychain};
    use pack::image::ImageRef;
    use pack::lifecycle::{Lifecycle, LifecycleOptions};
    use pack::orchestration::{ContainerConfig, ContainerRuntime, Ownership};
    use pack::{PackError, PackResult};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Create(String),
        Upload {
            phase: String,
            src: PathBuf,
            dest: String,
            owner: Option<Ownership>,
        },
        Start(String),
        Stop(String),
        Remove(String),
        VolumeRemove(String),
    }

    /// Runtime that records every call and runs nothing
    #[derive(Default)]
    struct RecordingRuntime {
        events: Mutex<Vec<Event>>,
        containers: Mutex<HashMap<String, ContainerConfig>>,
        exit_codes: HashMap<String, i32>,
        failing_volumes: Vec<String>,
        failing_container_removal: bool,
        hang_in: Option<(String, CancellationToken)>,
    }

    impl RecordingRuntime {
        fn events(&self) -> Vec<Event> {
            self.events.lock().unwrap().clone()
        }

        fn record(&self, event: Event) {
            self.events.lock().unwrap().push(event);
        }

        fn phase_of(&self, id: &str) -> String {
            id.split('-').next().unwrap_or_default().to_string()
        }

        /// Phases in the order they were created
        fn phases(&self) -> Vec<String> {
            self.events()
                .into_iter()
                .filter_map(|e| match e {
                    Event::Create(id) => Some(self.phase_of(&id)),
                    _ => None,
                })
                .collect()
        }

        fn config(&self, phase: &str) -> ContainerConfig {
            self.containers
                .lock()
                .unwrap()
                .iter()
                .find(|(id, _)| self.phase_of(id) == phase)
                .map(|(_, config)| config.clone())
                .unwrap_or_else(|| panic!("no {} container was created", phase))
        }

        fn args(&self, phase: &str) -> Vec<String> {
            self.config(phase).command[1..].to_vec()
        }

        fn removed_volumes(&self) -> Vec<String> {
            self.events()
                .into_iter()
                .filter_map(|e| match e {
                    Event::VolumeRemove(name) => Some(name),
                    _ => None,
                })
                .collect()
        }
    }

    #[async_trait]
    impl ContainerRuntime for RecordingRuntime {
        async fn ensure_ready(&self) -> PackResult<()> {
            Ok(())
        }

        async fn create(&self, config: &ContainerConfig) -> PackResult<String> {
            let phase = config.command[0].trim_start_matches("/lifecycle/");
            let id = format!("{}-container", phase);
            self.containers.lock().unwrap().insert(id.clone(), config.clone());
            self.record(Event::Create(id.clone()));
            Ok(id)
        }

        async fn copy_into(
            &self,
            container_id: &str,
            src: &Path,
            dest: &str,
            owner: Option<Ownership>,
        ) -> PackResult<()> {
            self.record(Event::Upload {
                phase: self.phase_of(container_id),
                src: src.to_path_buf(),
                dest: dest.to_string(),
                owner,
            });
            Ok(())
        }

        async fn start_attached(
            &self,
            container_id: &str,
            on_output: &(dyn Fn(String) + Send + Sync),
        ) -> PackResult<i32> {
            let phase = self.phase_of(container_id);
            self.record(Event::Start(phase.clone()));
            on_output(format!("running {}", phase));

            if let Some((hang_phase, cancel)) = &self.hang_in {
                if *hang_phase == phase {
                    cancel.cancel();
                    std::future::pending::<()>().await;
                }
            }
            Ok(self.exit_codes.get(&phase).copied().unwrap_or(0))
        }

        async fn stop(&self, container_id: &str, _grace: Duration) -> PackResult<()> {
            self.record(Event::Stop(self.phase_of(container_id)));
            Ok(())
        }

        async fn remove(&self, container_id: &str) -> PackResult<()> {
            self.record(Event::Remove(self.phase_of(container_id)));
            if self.failing_container_removal {
                return Err(PackError::CommandExecution {
                    command: format!("rm -f {}", container_id),
                    stderr: "device busy".to_string(),
                });
            }
            Ok(())
        }

        async fn volume_remove(&self, name: &str) -> PackResult<()> {
            self.record(Event::VolumeRemove(name.to_string()));
            if self.failing_volumes.iter().any(|prefix| name.starts_with(prefix.as_str())) {
                return Err(PackError::CommandExecution {
                    command: format!("volume rm -f {}", name),
                    stderr: "volume is in use".to_string(),
                });
            }
            Ok(())
        }

        async fn image_labels(&self, _image: &str) -> PackResult<HashMap<String, String>> {
            Ok(HashMap::new())
        }

        async fn image_env(&self, _image: &str) -> PackResult<HashMap<String, String>> {
            Ok(HashMap::new())
        }

        fn runtime_name(&self) -> &'static str {
            "Recording"
        }
    }

    struct StaticKeychain;

    impl Keychain for StaticKeychain {
        fn resolve(&self, registry: &str) -> PackResult<Option<String>> {
            Ok((registry == "ghcr.io").then(|| "Basic dXNlcjpwYXNz".to_string()))
        }
    }

    struct Fixture {
        app: TempDir,
        runtime: Arc<RecordingRuntime>,
    }

    impl Fixture {
        fn new(runtime: RecordingRuntime) -> Self {
            Self {
                app: TempDir::new().unwrap(),
                runtime: Arc::new(runtime),
            }
        }

        fn lifecycle(&self, verbose: bool) -> Lifecycle {
            Lifecycle::new(self.runtime.clone())
                .with_keychain(Arc::new(Anonymous))
                .with_rng(Box::new(StdRng::seed_from_u64(99)))
                .verbose(verbose)
        }

        fn options(&self, version: &str) -> LifecycleOptions {
            LifecycleOptions {
                app_path: self.app.path().to_path_buf(),
                image: ImageRef::parse("myorg/app").unwrap(),
                builder: Arc::new(
                    BuilderImage::new("cnbs/builder:bionic", version).with_ownership(1000, 1000),
                ),
                run_image: Some("cnbs/run:bionic".to_string()),
                clear_cache: false,
                publish: false,
                network: None,
                proxy: ProxyConfig::default(),
            }
        }
    }

    fn binds(config: &ContainerConfig, container_path: &str) -> bool {
        config.binds_path(container_path)
    }

    #[tokio::test]
    async fn full_pipeline_for_legacy_lifecycle() {
        let fx = Fixture::new(RecordingRuntime::default());

        fx.lifecycle(false)
            .execute(&CancellationToken::new(), fx.options("0.3.0"))
            .await
            .unwrap();

        assert_eq!(
            fx.runtime.phases(),
            ["detector", "restorer", "analyzer", "builder", "exporter", "cacher"]
        );
        assert_eq!(fx.runtime.args("restorer")[..2], ["-path", "/cache"]);
        assert_eq!(fx.runtime.args("cacher")[..2], ["-path", "/cache"]);

        let export = fx.runtime.config("exporter");
        assert!(binds(&export, "/cache"));
        assert!(binds(&export, "/launch-cache"));
        assert_eq!(export.command[1..3], ["-path", "/cache"]);
    }

    #[tokio::test]
    async fn scenario_clear_cache_with_legacy_lifecycle() {
        let fx = Fixture::new(RecordingRuntime::default());
        let mut opts = fx.options("0.3.0");
        opts.clear_cache = true;

        fx.lifecycle(false)
            .execute(&CancellationToken::new(), opts)
            .await
            .unwrap();

        assert_eq!(
            fx.runtime.phases(),
            ["detector", "analyzer", "builder", "exporter", "cacher"]
        );

        let analyze = fx.runtime.config("analyzer");
        assert_eq!(analyze.command[1..3], ["-daemon", "-skip-layers"]);
        assert_eq!(analyze.user.as_deref(), Some("root"));

        let export = fx.runtime.config("exporter");
        assert!(binds(&export, "/var/run/docker.sock"));
        assert!(binds(&export, "/launch-cache"));
        assert!(!binds(&export, "/cache"));

        let cache = fx.runtime.config("cacher");
        assert!(binds(&cache, "/var/run/docker.sock"));
        assert!(binds(&cache, "/cache"));

        // The build cache is cleared before anything runs
        let events = fx.runtime.events();
        assert!(matches!(&events[0], Event::VolumeRemove(name) if name.starts_with("pack-cache-") && name.ends_with(".build")));
    }

    #[tokio::test]
    async fn scenario_clear_cache_with_current_lifecycle() {
        let fx = Fixture::new(RecordingRuntime::default());
        let mut opts = fx.options("0.5.0");
        opts.clear_cache = true;

        fx.lifecycle(false)
            .execute(&CancellationToken::new(), opts)
            .await
            .unwrap();

        assert_eq!(fx.runtime.phases(), ["detector", "analyzer", "builder", "exporter"]);
    }

    #[tokio::test]
    async fn scenario_verbose_log_level() {
        let current = Fixture::new(RecordingRuntime::default());
        current
            .lifecycle(true)
            .execute(&CancellationToken::new(), current.options("0.5.0"))
            .await
            .unwrap();
        assert_eq!(current.runtime.args("detector")[..2], ["-log-level", "debug"]);
        assert_eq!(current.runtime.args("builder")[0], "-layers");

        let legacy = Fixture::new(RecordingRuntime::default());
        legacy
            .lifecycle(true)
            .execute(&CancellationToken::new(), legacy.options("0.3.0"))
            .await
            .unwrap();
        assert_eq!(legacy.runtime.args("detector")[0], "-app");
    }

    #[tokio::test]
    async fn publish_uses_registry_access() {
        let fx = Fixture::new(RecordingRuntime::default());
        let mut opts = fx.options("0.5.0");
        opts.publish = true;
        opts.image = ImageRef::parse("ghcr.io/org/app:v1").unwrap();

        fx.lifecycle(false)
            .with_keychain(Arc::new(StaticKeychain))
            .execute(&CancellationToken::new(), opts)
            .await
            .unwrap();

        for phase in ["analyzer", "exporter"] {
            let config = fx.runtime.config(phase);
            assert!(!binds(&config, "/var/run/docker.sock"), "{} has daemon access", phase);
            assert_eq!(config.user, None);
            assert_eq!(
                config.env.get("CNB_REGISTRY_AUTH").map(String::as_str),
                Some(r#"{"ghcr.io":"Basic dXNlcjpwYXNz"}"#)
            );
        }

        let analyze_args = fx.runtime.args("analyzer");
        assert!(!analyze_args.iter().any(|a| a == "-daemon"));
        assert_eq!(analyze_args.last().map(String::as_str), Some("ghcr.io/org/app:v1"));

        let export = fx.runtime.config("exporter");
        assert!(!binds(&export, "/cache"));
        assert!(!binds(&export, "/launch-cache"));
        assert!(!export.command.iter().any(|a| a == "-daemon" || a == "-launch-cache"));

        // Restore still talks to the daemon
        assert!(binds(&fx.runtime.config("restorer"), "/var/run/docker.sock"));
    }

    #[tokio::test]
    async fn session_volumes_are_bound_and_removed() {
        let fx = Fixture::new(RecordingRuntime::default());
        fx.lifecycle(false)
            .execute(&CancellationToken::new(), fx.options("0.5.0"))
            .await
            .unwrap();

        let detect = fx.runtime.config("detector");
        let layers = detect.binds.iter().find(|b| b.ends_with(":/layers")).unwrap();
        let app = detect.binds.iter().find(|b| b.ends_with(":/workspace")).unwrap();
        let layers = layers.trim_end_matches(":/layers").to_string();
        let app = app.trim_end_matches(":/workspace").to_string();

        assert!(layers.starts_with("pack-layers-") && layers.len() == "pack-layers-".len() + 10);
        assert!(app.starts_with("pack-app-") && app.len() == "pack-app-".len() + 10);
        assert_eq!(fx.runtime.removed_volumes(), [layers, app]);
    }

    #[tokio::test]
    async fn app_is_uploaded_exactly_once() {
        let fx = Fixture::new(RecordingRuntime::default());
        fx.lifecycle(false)
            .execute(&CancellationToken::new(), fx.options("0.5.0"))
            .await
            .unwrap();

        let uploads: Vec<_> = fx
            .runtime
            .events()
            .into_iter()
            .filter(|e| matches!(e, Event::Upload { .. }))
            .collect();

        assert_eq!(
            uploads,
            [Event::Upload {
                phase: "detector".to_string(),
                src: fx.app.path().to_path_buf(),
                dest: "/workspace".to_string(),
                owner: Some(Ownership { uid: 1000, gid: 1000 }),
            }]
        );

        // Uploaded between create and start of the detector
        let events = fx.runtime.events();
        let upload = events.iter().position(|e| matches!(e, Event::Upload { .. })).unwrap();
        assert_eq!(events[upload - 1], Event::Create("detector-container".to_string()));
        assert_eq!(events[upload + 1], Event::Start("detector".to_string()));
    }

    #[tokio::test]
    async fn phase_failure_stops_pipeline_and_cleans_up() {
        let mut runtime = RecordingRuntime::default();
        runtime.exit_codes.insert("analyzer".to_string(), 3);
        let fx = Fixture::new(runtime);

        let err = fx
            .lifecycle(false)
            .execute(&CancellationToken::new(), fx.options("0.5.0"))
            .await
            .unwrap_err();

        assert!(matches!(err, PackError::PhaseFailed { ref phase, code: 3 } if phase == "analyzer"));
        assert_eq!(fx.runtime.phases(), ["detector", "restorer", "analyzer"]);
        assert!(fx.runtime.events().contains(&Event::Remove("analyzer".to_string())));
        assert_eq!(fx.runtime.removed_volumes().len(), 2);
    }

    #[tokio::test]
    async fn container_removal_failure_does_not_mask_phase_result() {
        let runtime = RecordingRuntime {
            failing_container_removal: true,
            ..RecordingRuntime::default()
        };
        let fx = Fixture::new(runtime);

        fx.lifecycle(false)
            .execute(&CancellationToken::new(), fx.options("0.5.0"))
            .await
            .unwrap();
        assert_eq!(fx.runtime.phases().len(), 5);
    }

    #[tokio::test]
    async fn cleanup_attempts_both_volumes_and_reports_all_failures() {
        let runtime = RecordingRuntime {
            failing_volumes: vec!["pack-layers-".to_string(), "pack-app-".to_string()],
            ..RecordingRuntime::default()
        };
        let fx = Fixture::new(runtime);

        let err = fx
            .lifecycle(false)
            .execute(&CancellationToken::new(), fx.options("0.5.0"))
            .await
            .unwrap_err();

        let PackError::Cleanup { errors } = &err else {
            panic!("expected cleanup error, got {}", err);
        };
        assert_eq!(errors.len(), 2);
        let message = err.to_string();
        assert!(message.contains("failed to clean up layers volume pack-layers-"));
        assert!(message.contains("failed to clean up app volume pack-app-"));
    }

    #[tokio::test]
    async fn pipeline_error_wins_over_cleanup_error() {
        let mut runtime = RecordingRuntime {
            failing_volumes: vec!["pack-layers-".to_string()],
            ..RecordingRuntime::default()
        };
        runtime.exit_codes.insert("detector".to_string(), 1);
        let fx = Fixture::new(runtime);

        let err = fx
            .lifecycle(false)
            .execute(&CancellationToken::new(), fx.options("0.5.0"))
            .await
            .unwrap_err();

        assert!(matches!(err, PackError::PhaseFailed { .. }));
        assert_eq!(fx.runtime.removed_volumes().len(), 2);
    }

    #[tokio::test]
    async fn cache_clear_failure_is_wrapped() {
        let runtime = RecordingRuntime {
            failing_volumes: vec!["pack-cache-".to_string()],
            ..RecordingRuntime::default()
        };
        let fx = Fixture::new(runtime);
        let mut opts = fx.options("0.5.0");
        opts.clear_cache = true;

        let err = fx
            .lifecycle(false)
            .execute(&CancellationToken::new(), opts)
            .await
            .unwrap_err();

        assert!(matches!(err, PackError::CacheClear { .. }));
        assert!(err.to_string().starts_with("clearing build cache pack-cache-"));
        assert!(fx.runtime.phases().is_empty());
        assert_eq!(fx.runtime.removed_volumes().len(), 3);
    }

    #[tokio::test]
    async fn cancellation_stops_running_phase_and_cleans_up() {
        let cancel = CancellationToken::new();
        let runtime = RecordingRuntime {
            hang_in: Some(("builder".to_string(), cancel.clone())),
            ..RecordingRuntime::default()
        };
        let fx = Fixture::new(runtime);

        let err = fx
            .lifecycle(false)
            .execute(&cancel, fx.options("0.5.0"))
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(matches!(err, PackError::Cancelled { ref phase } if phase == "builder"));

        let events = fx.runtime.events();
        assert!(events.contains(&Event::Stop("builder".to_string())));
        assert!(events.contains(&Event::Remove("builder".to_string())));
        assert!(!fx.runtime.phases().contains(&"exporter".to_string()));
        assert_eq!(fx.runtime.removed_volumes().len(), 2);
    }

    #[tokio::test]
    async fn cancelled_before_start_runs_no_phase() {
        let fx = Fixture::new(RecordingRuntime::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = fx
            .lifecycle(false)
            .execute(&cancel, fx.options("0.5.0"))
            .await
            .unwrap_err();

        assert!(matches!(err, PackError::Cancelled { ref phase } if phase == "detector"));
        assert!(fx.runtime.phases().is_empty());
        assert_eq!(fx.runtime.removed_volumes().len(), 2);
    }

    #[tokio::test]
    async fn seeded_sessions_are_reproducible() {
        let first = Fixture::new(RecordingRuntime::default());
        first
            .lifecycle(false)
            .execute(&CancellationToken::new(), first.options("0.5.0"))
            .await
            .unwrap();

        let second = Fixture::new(RecordingRuntime::default());
        second
            .lifecycle(false)
            .execute(&CancellationToken::new(), second.options("0.5.0"))
            .await
            .unwrap();

        assert_eq!(first.runtime.removed_volumes(), second.runtime.removed_volumes());
    }

    #[tokio::test]
    async fn network_and_proxy_reach_phases() {
        let fx = Fixture::new(RecordingRuntime::default());
        let mut opts = fx.options("0.5.0");
        opts.network = Some("host".to_string());
        opts.proxy = ProxyConfig {
            http: None,
            https: Some("http://proxy:3128".to_string()),
            no_proxy: None,
        };

        fx.lifecycle(false)
            .execute(&CancellationToken::new(), opts)
            .await
            .unwrap();

        assert_eq!(fx.runtime.config("detector").network.as_deref(), Some("host"));
        assert_eq!(fx.runtime.config("builder").network.as_deref(), Some("host"));
        assert_eq!(fx.runtime.config("exporter").network, None);

        let env = fx.runtime.config("exporter").env;
        assert_eq!(env.get("HTTPS_PROXY").map(String::as_str), Some("http://proxy:3128"));
        assert_eq!(env.get("https_proxy").map(String::as_str), Some("http://proxy:3128"));
    }
}
