//! Kernel dispatch: one-shot or kept-alive execution of an artifact.

use std::path::Path;
use std::sync::Arc;

use crate::error::Result;
use crate::format::ExecuteSettings;
use crate::kernel::{KernelLauncher, KernelRequest};
use crate::platform::{DaemonPolicy, EnvironmentSignals, ExecutionMode, InteractivePosixPolicy};
use crate::session::{SessionKey, SessionRegistry};

/// Routes execution requests to a fresh kernel or a kept-alive session.
pub struct KernelDispatcher {
    launcher: Arc<dyn KernelLauncher>,
    sessions: Arc<SessionRegistry>,
    policy: Arc<dyn DaemonPolicy>,
    signals: EnvironmentSignals,
}

impl KernelDispatcher {
    /// Dispatcher with the default policy and the detected environment.
    pub fn new(launcher: Arc<dyn KernelLauncher>) -> Self {
        Self {
            launcher,
            sessions: Arc::new(SessionRegistry::new()),
            policy: Arc::new(InteractivePosixPolicy),
            signals: EnvironmentSignals::detect(),
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn DaemonPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_signals(mut self, signals: EnvironmentSignals) -> Self {
        self.signals = signals;
        self
    }

    /// Share an existing session registry.
    pub fn with_sessions(mut self, sessions: Arc<SessionRegistry>) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Resolve the execution mode for `settings`.
    pub fn mode(&self, settings: &ExecuteSettings) -> ExecutionMode {
        ExecutionMode::resolve(settings.daemon, self.policy.as_ref(), &self.signals)
    }

    /// Execute `input` in place.
    ///
    /// The artifact path is canonicalized first so that every request for the
    /// same file lands in the same session. `cwd` defaults to `settings.dir`,
    /// then to the artifact's directory.
    pub async fn execute(
        &self,
        input: &Path,
        settings: &ExecuteSettings,
        cwd: Option<&Path>,
    ) -> Result<ExecutionMode> {
        let key = SessionKey::canonical(input).await?;
        let cwd = settings
            .dir
            .clone()
            .or_else(|| cwd.map(Path::to_path_buf))
            .or_else(|| key.path().parent().map(Path::to_path_buf))
            .unwrap_or_default();

        let request = KernelRequest {
            input: key.path().to_path_buf(),
            cwd,
            allow_errors: settings.allow_errors(),
            debug: settings.debug(),
        };

        let mode = self.mode(settings);
        match mode {
            ExecutionMode::OneShot => {
                tracing::debug!("Executing {} in a one-shot kernel", input.display());
                self.execute_oneshot(&request).await?;
            }
            ExecutionMode::Daemon { keepalive } => {
                if settings.daemon_restart() {
                    self.sessions.invalidate(&key);
                }

                tracing::debug!("Executing {} in a kept-alive kernel", input.display());
                let session = self.sessions.session(&key, keepalive).await;
                // A failed execution discards its kernel inside the session's
                // queue. The queue stays registered so requests already behind
                // it, and any that arrive later, keep their order.
                session.execute(self.launcher.clone(), request).await?;
            }
        }

        Ok(mode)
    }

    async fn execute_oneshot(&self, request: &KernelRequest) -> Result<()> {
        let mut kernel = self.launcher.launch(request).await?;
        let result = kernel.execute(request).await;

        if let Err(e) = kernel.shutdown().await {
            tracing::warn!("Kernel shutdown failed: {}", e);
        }
        result
    }

    /// Shut down all kept-alive sessions.
    pub async fn shutdown(&self) {
        self.sessions.shutdown_all().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::DaemonSetting;
    use crate::kernel::Kernel;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Records launch/execute/shutdown events; artifacts named `fail*` error.
    #[derive(Default)]
    struct Journal {
        events: Mutex<Vec<String>>,
    }

    impl Journal {
        fn push(&self, event: String) {
            self.events.lock().unwrap().push(event);
        }

        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }

        fn count(&self, prefix: &str) -> usize {
            self.events().iter().filter(|e| e.starts_with(prefix)).count()
        }
    }

    struct FakeKernel {
        id: usize,
        journal: Arc<Journal>,
    }

    fn file_name(path: &Path) -> String {
        path.file_name().unwrap().to_string_lossy().into_owned()
    }

    #[async_trait]
    impl Kernel for FakeKernel {
        async fn execute(&mut self, request: &KernelRequest) -> Result<()> {
            let name = file_name(&request.input);
            self.journal.push(format!("start {} k{}", name, self.id));
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.journal.push(format!("end {}", name));
            if name.starts_with("fail") {
                return Err(crate::Error::Execution(format!("{} failed", name)));
            }
            Ok(())
        }

        async fn shutdown(self: Box<Self>) -> Result<()> {
            self.journal.push(format!("shutdown k{}", self.id));
            Ok(())
        }
    }

    struct FakeLauncher {
        journal: Arc<Journal>,
        next_id: Mutex<usize>,
    }

    #[async_trait]
    impl KernelLauncher for FakeLauncher {
        async fn launch(&self, _request: &KernelRequest) -> Result<Box<dyn Kernel>> {
            let id = {
                let mut next = self.next_id.lock().unwrap();
                *next += 1;
                *next
            };
            self.journal.push(format!("launch k{}", id));
            Ok(Box::new(FakeKernel {
                id,
                journal: self.journal.clone(),
            }))
        }
    }

    fn dispatcher() -> (KernelDispatcher, Arc<Journal>) {
        let journal = Arc::new(Journal::default());
        let launcher = Arc::new(FakeLauncher {
            journal: journal.clone(),
            next_id: Mutex::new(0),
        });
        let dispatcher = KernelDispatcher::new(launcher).with_signals(EnvironmentSignals {
            interactive: false,
            windows: false,
            ci: true,
        });
        (dispatcher, journal)
    }

    fn touch(dir: &TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, "{}").unwrap();
        path
    }

    fn daemon(secs: u64) -> ExecuteSettings {
        ExecuteSettings {
            daemon: Some(DaemonSetting::Seconds(secs)),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_oneshot_always_shuts_down() {
        let (dispatcher, journal) = dispatcher();
        let temp = TempDir::new().unwrap();
        let ok = touch(&temp, "ok.ipynb");
        let failing = touch(&temp, "fail.ipynb");

        let mode = dispatcher
            .execute(&ok, &ExecuteSettings::default(), None)
            .await
            .unwrap();
        assert_eq!(mode, ExecutionMode::OneShot);
        assert!(dispatcher
            .execute(&failing, &ExecuteSettings::default(), None)
            .await
            .is_err());

        assert_eq!(journal.count("launch"), 2);
        assert_eq!(journal.count("shutdown"), 2);
        assert!(dispatcher.sessions().is_empty());
    }

    #[tokio::test]
    async fn test_same_artifact_runs_in_submission_order() {
        let (dispatcher, journal) = dispatcher();
        let temp = TempDir::new().unwrap();
        let path = touch(&temp, "doc.ipynb");
        let settings = daemon(60);

        let runs = (0..4).map(|_| dispatcher.execute(&path, &settings, None));
        for result in futures::future::join_all(runs).await {
            result.unwrap();
        }

        let events = journal.events();
        assert_eq!(journal.count("launch"), 1);
        // Never two executions interleaved on one session.
        for pair in events.iter().filter(|e| !e.starts_with("launch")).collect::<Vec<_>>().chunks(2) {
            assert!(pair[0].starts_with("start"));
            assert!(pair[1].starts_with("end"));
        }
        assert_eq!(dispatcher.sessions().len(), 1);
    }

    #[tokio::test]
    async fn test_equivalent_paths_share_a_session() {
        let (dispatcher, journal) = dispatcher();
        let temp = TempDir::new().unwrap();
        let path = touch(&temp, "doc.ipynb");
        std::fs::create_dir(temp.path().join("sub")).unwrap();
        let detour = temp.path().join("sub").join("..").join("doc.ipynb");

        let settings = daemon(60);
        dispatcher.execute(&path, &settings, None).await.unwrap();
        dispatcher.execute(&detour, &settings, None).await.unwrap();

        assert_eq!(journal.count("launch"), 1);
        assert_eq!(dispatcher.sessions().len(), 1);
    }

    #[tokio::test]
    async fn test_different_artifacts_get_different_sessions() {
        let (dispatcher, journal) = dispatcher();
        let temp = TempDir::new().unwrap();
        let a = touch(&temp, "a.ipynb");
        let b = touch(&temp, "b.ipynb");
        let settings = daemon(60);

        let (ra, rb) = tokio::join!(
            dispatcher.execute(&a, &settings, None),
            dispatcher.execute(&b, &settings, None)
        );
        ra.unwrap();
        rb.unwrap();

        assert_eq!(journal.count("launch"), 2);
        assert_eq!(dispatcher.sessions().len(), 2);
    }

    #[tokio::test]
    async fn test_failure_discards_kernel() {
        let (dispatcher, journal) = dispatcher();
        let temp = TempDir::new().unwrap();
        let path = touch(&temp, "fail.ipynb");
        let settings = daemon(60);

        let err = dispatcher.execute(&path, &settings, None).await.unwrap_err();
        assert!(matches!(err, crate::Error::Execution(_)));
        assert_eq!(journal.count("shutdown"), 1);

        // The queue stays registered; only its kernel is gone.
        let key = SessionKey::canonical(&path).await.unwrap();
        let session = dispatcher.sessions().get(&key).unwrap();
        assert!(!session.has_kernel());

        // The next render starts over with a new kernel.
        let _ = dispatcher.execute(&path, &settings, None).await;
        assert_eq!(journal.count("launch"), 2);
    }

    /// Fails its first execution overall; tracks overlapping executions.
    struct SlowKernel {
        id: usize,
        shared: Arc<SlowShared>,
    }

    #[derive(Default)]
    struct SlowShared {
        launched: Mutex<usize>,
        executions: AtomicUsize,
        active: AtomicUsize,
        peak: AtomicUsize,
        events: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Kernel for SlowKernel {
        async fn execute(&mut self, _request: &KernelRequest) -> Result<()> {
            let shared = &self.shared;
            let n = shared.executions.fetch_add(1, Ordering::SeqCst);
            let active = shared.active.fetch_add(1, Ordering::SeqCst) + 1;
            shared.peak.fetch_max(active, Ordering::SeqCst);
            shared.events.lock().unwrap().push(format!("start#{} k{}", n, self.id));

            tokio::time::sleep(Duration::from_millis(40)).await;

            shared.events.lock().unwrap().push(format!("end#{} k{}", n, self.id));
            shared.active.fetch_sub(1, Ordering::SeqCst);
            if n == 0 {
                return Err(crate::Error::Execution("first run failed".to_string()));
            }
            Ok(())
        }

        async fn shutdown(self: Box<Self>) -> Result<()> {
            self.shared.events.lock().unwrap().push(format!("shutdown k{}", self.id));
            Ok(())
        }
    }

    struct SlowLauncher(Arc<SlowShared>);

    #[async_trait]
    impl KernelLauncher for SlowLauncher {
        async fn launch(&self, _request: &KernelRequest) -> Result<Box<dyn Kernel>> {
            let id = {
                let mut launched = self.0.launched.lock().unwrap();
                *launched += 1;
                *launched
            };
            Ok(Box::new(SlowKernel {
                id,
                shared: self.0.clone(),
            }))
        }
    }

    #[tokio::test]
    async fn test_failure_keeps_later_requests_ordered() {
        let shared = Arc::new(SlowShared::default());
        let dispatcher = KernelDispatcher::new(Arc::new(SlowLauncher(shared.clone())))
            .with_signals(EnvironmentSignals {
                interactive: false,
                windows: false,
                ci: true,
            });
        let temp = TempDir::new().unwrap();
        let path = touch(&temp, "doc.ipynb");
        let settings = daemon(60);

        let late = async {
            tokio::time::sleep(Duration::from_millis(55)).await;
            dispatcher.execute(&path, &settings, None).await
        };
        let (a, b, c) = tokio::join!(
            dispatcher.execute(&path, &settings, None),
            dispatcher.execute(&path, &settings, None),
            late
        );

        // Exactly one of the first two ran first and failed.
        assert_eq!([a.is_err(), b.is_err()].iter().filter(|e| **e).count(), 1);
        c.unwrap();

        let events = shared.events.lock().unwrap().clone();
        assert_eq!(shared.peak.load(Ordering::SeqCst), 1, "{:?}", events);
        // The failed kernel is replaced once; the replacement serves the rest.
        assert_eq!(*shared.launched.lock().unwrap(), 2, "{:?}", events);
        assert_eq!(
            events,
            vec![
                "start#0 k1",
                "end#0 k1",
                "shutdown k1",
                "start#1 k2",
                "end#1 k2",
                "start#2 k2",
                "end#2 k2",
            ]
        );
        assert_eq!(dispatcher.sessions().len(), 1);
    }

    #[tokio::test]
    async fn test_daemon_restart_replaces_kernel() {
        let (dispatcher, journal) = dispatcher();
        let temp = TempDir::new().unwrap();
        let path = touch(&temp, "doc.ipynb");

        dispatcher.execute(&path, &daemon(60), None).await.unwrap();
        let restart = ExecuteSettings {
            daemon_restart: Some(true),
            ..daemon(60)
        };
        dispatcher.execute(&path, &restart, None).await.unwrap();

        let events = journal.events();
        assert!(events.contains(&"shutdown k1".to_string()));
        assert!(events.contains(&"start doc.ipynb k2".to_string()));

        dispatcher.shutdown().await;
        assert_eq!(journal.count("shutdown"), 2);
    }

    #[tokio::test]
    async fn test_missing_artifact_is_io_error() {
        let (dispatcher, journal) = dispatcher();
        let temp = TempDir::new().unwrap();
        let err = dispatcher
            .execute(&temp.path().join("gone.ipynb"), &ExecuteSettings::default(), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Io);
        assert_eq!(journal.count("launch"), 0);
    }

    #[tokio::test]
    async fn test_request_uses_execute_dir() {
        struct CwdLauncher(Arc<Mutex<Vec<PathBuf>>>);

        struct CwdKernel;

        #[async_trait]
        impl Kernel for CwdKernel {
            async fn execute(&mut self, _request: &KernelRequest) -> Result<()> {
                Ok(())
            }
            async fn shutdown(self: Box<Self>) -> Result<()> {
                Ok(())
            }
        }

        #[async_trait]
        impl KernelLauncher for CwdLauncher {
            async fn launch(&self, request: &KernelRequest) -> Result<Box<dyn Kernel>> {
                self.0.lock().unwrap().push(request.cwd.clone());
                Ok(Box::new(CwdKernel))
            }
        }

        let seen = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = KernelDispatcher::new(Arc::new(CwdLauncher(seen.clone())));
        let temp = TempDir::new().unwrap();
        let path = touch(&temp, "doc.ipynb");

        let settings = ExecuteSettings {
            daemon: Some(DaemonSetting::Enabled(false)),
            dir: Some(PathBuf::from("/srv/data")),
            ..Default::default()
        };
        dispatcher.execute(&path, &settings, None).await.unwrap();

        let settings = ExecuteSettings {
            daemon: Some(DaemonSetting::Enabled(false)),
            ..Default::default()
        };
        dispatcher.execute(&path, &settings, None).await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], PathBuf::from("/srv/data"));
        assert_eq!(seen[1], std::fs::canonicalize(temp.path()).unwrap());
    }
}
