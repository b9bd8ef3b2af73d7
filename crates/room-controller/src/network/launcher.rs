//! Tunnel-server process launching.
//!
//! The [`ProcessLauncher`] seam keeps all subprocess work out of the network
//! manager so orchestration can be exercised against [`mock::FakeLauncher`].
//! [`OpenVpnLauncher`] is the production implementation.

use crate::errors::RcError;
use async_trait::async_trait;
use common::types::RoomId;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Lines of child output kept per process.
const OUTPUT_TAIL_LINES: usize = 64;

/// Starts tunnel servers and prepares their parameters.
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    /// Write Diffie-Hellman parameters of `bits` size to `output`.
    async fn generate_dh_params(&self, output: &Path, bits: u32) -> Result<(), RcError>;

    /// Launch a tunnel server for `room_id` with the given configuration file.
    async fn launch(
        &self,
        room_id: RoomId,
        config_path: &Path,
        workdir: &Path,
    ) -> Result<Box<dyn TunnelProcess>, RcError>;
}

/// A running tunnel-server child.
#[async_trait]
pub trait TunnelProcess: Send + Sync {
    /// OS process id, if the child has not been reaped.
    fn id(&self) -> Option<u32>;

    /// Non-blocking liveness poll.
    fn is_alive(&mut self) -> bool;

    /// Request graceful termination.
    fn request_stop(&mut self) -> Result<(), RcError>;

    /// Wait until the child has exited.
    async fn wait(&mut self) -> Result<(), RcError>;

    /// Kill the child and reap it.
    async fn force_kill(&mut self) -> Result<(), RcError>;

    /// Most recent captured output lines.
    fn output_tail(&self) -> String;
}

/// Bounded ring of captured output lines.
#[derive(Debug, Default)]
struct OutputTail {
    lines: VecDeque<String>,
}

impl OutputTail {
    fn push(&mut self, line: String) {
        if self.lines.len() == OUTPUT_TAIL_LINES {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    fn render(&self) -> String {
        self.lines.iter().cloned().collect::<Vec<_>>().join("\n")
    }
}

/// Launches `openvpn` servers and generates DH parameters with `openssl`.
#[derive(Debug, Clone)]
pub struct OpenVpnLauncher {
    openvpn_binary: PathBuf,
    openssl_binary: PathBuf,
}

impl OpenVpnLauncher {
    #[must_use]
    pub fn new(openvpn_binary: PathBuf, openssl_binary: PathBuf) -> Self {
        Self {
            openvpn_binary,
            openssl_binary,
        }
    }
}

#[async_trait]
impl ProcessLauncher for OpenVpnLauncher {
    async fn generate_dh_params(&self, output: &Path, bits: u32) -> Result<(), RcError> {
        let result = Command::new(&self.openssl_binary)
            .arg("dhparam")
            .arg("-out")
            .arg(output)
            .arg(bits.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| RcError::ProcessLaunch(format!("failed to run openssl dhparam: {e}")))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(RcError::ProcessLaunch(format!(
                "openssl dhparam exited with {}: {}",
                result.status,
                stderr.trim()
            )));
        }

        Ok(())
    }

    async fn launch(
        &self,
        room_id: RoomId,
        config_path: &Path,
        workdir: &Path,
    ) -> Result<Box<dyn TunnelProcess>, RcError> {
        let mut command = Command::new(&self.openvpn_binary);
        command
            .arg("--config")
            .arg(config_path)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group: terminal signals aimed at us never reach the child
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command
            .spawn()
            .map_err(|e| RcError::ProcessLaunch(format!("failed to spawn openvpn: {e}")))?;

        let output = Arc::new(Mutex::new(OutputTail::default()));
        let mut drains = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            drains.push(spawn_drain(room_id, stdout, Arc::clone(&output)));
        }
        if let Some(stderr) = child.stderr.take() {
            drains.push(spawn_drain(room_id, stderr, Arc::clone(&output)));
        }

        debug!(
            target: "rc.network",
            room_id = %room_id,
            pid = ?child.id(),
            "Spawned tunnel server"
        );

        Ok(Box::new(OpenVpnProcess {
            child,
            output,
            drains,
        }))
    }
}

fn spawn_drain<R>(room_id: RoomId, reader: R, output: Arc<Mutex<OutputTail>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(target: "rc.network.output", room_id = %room_id, "{line}");
            if let Ok(mut tail) = output.lock() {
                tail.push(line);
            }
        }
    })
}

/// A spawned `openvpn` child with captured output.
struct OpenVpnProcess {
    child: Child,
    output: Arc<Mutex<OutputTail>>,
    drains: Vec<JoinHandle<()>>,
}

#[async_trait]
impl TunnelProcess for OpenVpnProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    #[cfg(unix)]
    fn request_stop(&mut self) -> Result<(), RcError> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.child.id() else {
            // Already reaped
            return Ok(());
        };
        let pid = i32::try_from(pid)
            .map_err(|_| RcError::ProcessTermination(format!("pid {pid} out of range")))?;

        kill(Pid::from_raw(pid), Signal::SIGTERM)
            .map_err(|e| RcError::ProcessTermination(format!("SIGTERM failed: {e}")))
    }

    #[cfg(not(unix))]
    fn request_stop(&mut self) -> Result<(), RcError> {
        self.child
            .start_kill()
            .map_err(|e| RcError::ProcessTermination(format!("kill failed: {e}")))
    }

    async fn wait(&mut self) -> Result<(), RcError> {
        self.child
            .wait()
            .await
            .map(|_| ())
            .map_err(|e| RcError::ProcessTermination(format!("wait failed: {e}")))
    }

    async fn force_kill(&mut self) -> Result<(), RcError> {
        self.child
            .kill()
            .await
            .map_err(|e| RcError::ProcessTermination(format!("kill failed: {e}")))
    }

    fn output_tail(&self) -> String {
        self.output.lock().map(|tail| tail.render()).unwrap_or_default()
    }
}

impl Drop for OpenVpnProcess {
    fn drop(&mut self) {
        for drain in &self.drains {
            drain.abort();
        }
        if matches!(self.child.try_wait(), Ok(None)) {
            warn!(
                target: "rc.network",
                pid = ?self.child.id(),
                "Dropping running tunnel server, killing it"
            );
        }
    }
}

/// Fake launcher module for testing.
///
/// Processes are simulated in memory; their liveness is observable per room
/// after they leave the supervised table.
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
    use tokio::sync::watch;

    /// Observable state of a simulated tunnel server.
    #[derive(Debug)]
    pub struct FakeProcessState {
        alive: watch::Sender<bool>,
        ignore_sigterm: bool,
        stop_requested: AtomicBool,
        force_killed: AtomicBool,
    }

    impl FakeProcessState {
        fn new(alive: bool, ignore_sigterm: bool) -> Self {
            let (alive, _) = watch::channel(alive);
            Self {
                alive,
                ignore_sigterm,
                stop_requested: AtomicBool::new(false),
                force_killed: AtomicBool::new(false),
            }
        }

        pub fn is_alive(&self) -> bool {
            *self.alive.borrow()
        }

        pub fn stop_requested(&self) -> bool {
            self.stop_requested.load(Ordering::SeqCst)
        }

        pub fn force_killed(&self) -> bool {
            self.force_killed.load(Ordering::SeqCst)
        }

        /// Simulate the server crashing on its own.
        pub fn crash(&self) {
            self.alive.send_replace(false);
        }
    }

    /// In-memory stand-in for a tunnel-server child.
    pub struct FakeTunnelProcess {
        pid: u32,
        state: Arc<FakeProcessState>,
    }

    #[async_trait]
    impl TunnelProcess for FakeTunnelProcess {
        fn id(&self) -> Option<u32> {
            self.state.is_alive().then_some(self.pid)
        }

        fn is_alive(&mut self) -> bool {
            self.state.is_alive()
        }

        fn request_stop(&mut self) -> Result<(), RcError> {
            self.state.stop_requested.store(true, Ordering::SeqCst);
            if !self.state.ignore_sigterm {
                self.state.alive.send_replace(false);
            }
            Ok(())
        }

        async fn wait(&mut self) -> Result<(), RcError> {
            let mut rx = self.state.alive.subscribe();
            rx.wait_for(|alive| !*alive)
                .await
                .map(|_| ())
                .map_err(|e| RcError::ProcessTermination(format!("wait failed: {e}")))
        }

        async fn force_kill(&mut self) -> Result<(), RcError> {
            self.state.force_killed.store(true, Ordering::SeqCst);
            self.state.alive.send_replace(false);
            Ok(())
        }

        fn output_tail(&self) -> String {
            format!("fake tunnel server {}", self.pid)
        }
    }

    /// Fake launcher for unit and integration tests.
    pub struct FakeLauncher {
        fail_launch: AtomicBool,
        fail_dh: AtomicBool,
        exit_on_start: AtomicBool,
        ignore_sigterm: AtomicBool,
        launch_count: AtomicUsize,
        dh_count: AtomicUsize,
        next_pid: AtomicU32,
        processes: Mutex<HashMap<RoomId, Arc<FakeProcessState>>>,
    }

    impl Default for FakeLauncher {
        fn default() -> Self {
            Self {
                fail_launch: AtomicBool::new(false),
                fail_dh: AtomicBool::new(false),
                exit_on_start: AtomicBool::new(false),
                ignore_sigterm: AtomicBool::new(false),
                launch_count: AtomicUsize::new(0),
                dh_count: AtomicUsize::new(0),
                next_pid: AtomicU32::new(40_000),
                processes: Mutex::new(HashMap::new()),
            }
        }
    }

    impl FakeLauncher {
        /// Create a launcher whose processes start and stop cleanly.
        pub fn healthy() -> Self {
            Self::default()
        }

        /// Create a launcher whose spawn always fails.
        pub fn failing_launch() -> Self {
            let launcher = Self::default();
            launcher.set_fail_launch(true);
            launcher
        }

        /// Create a launcher whose DH generation always fails.
        pub fn failing_dh() -> Self {
            let launcher = Self::default();
            launcher.fail_dh.store(true, Ordering::SeqCst);
            launcher
        }

        /// Create a launcher whose processes die before the startup probe.
        pub fn exiting_on_start() -> Self {
            let launcher = Self::default();
            launcher.exit_on_start.store(true, Ordering::SeqCst);
            launcher
        }

        /// Create a launcher whose processes ignore graceful termination.
        pub fn ignoring_sigterm() -> Self {
            let launcher = Self::default();
            launcher.ignore_sigterm.store(true, Ordering::SeqCst);
            launcher
        }

        pub fn set_fail_launch(&self, fail: bool) {
            self.fail_launch.store(fail, Ordering::SeqCst);
        }

        /// Number of launch attempts.
        pub fn launch_count(&self) -> usize {
            self.launch_count.load(Ordering::SeqCst)
        }

        /// Number of DH generation attempts.
        pub fn dh_count(&self) -> usize {
            self.dh_count.load(Ordering::SeqCst)
        }

        /// State of the most recent process launched for `room_id`.
        pub fn process(&self, room_id: RoomId) -> Option<Arc<FakeProcessState>> {
            self.processes
                .lock()
                .ok()
                .and_then(|p| p.get(&room_id).cloned())
        }

        /// Number of simulated processes still running.
        pub fn alive_count(&self) -> usize {
            self.processes
                .lock()
                .map(|p| p.values().filter(|s| s.is_alive()).count())
                .unwrap_or(0)
        }
    }

    #[async_trait]
    impl ProcessLauncher for FakeLauncher {
        async fn generate_dh_params(&self, output: &Path, _bits: u32) -> Result<(), RcError> {
            self.dh_count.fetch_add(1, Ordering::SeqCst);
            if self.fail_dh.load(Ordering::SeqCst) {
                return Err(RcError::ProcessLaunch(
                    "simulated dhparam failure".to_string(),
                ));
            }
            tokio::fs::write(
                output,
                b"-----BEGIN DH PARAMETERS-----\nFAKE\n-----END DH PARAMETERS-----\n",
            )
            .await?;
            Ok(())
        }

        async fn launch(
            &self,
            room_id: RoomId,
            _config_path: &Path,
            _workdir: &Path,
        ) -> Result<Box<dyn TunnelProcess>, RcError> {
            self.launch_count.fetch_add(1, Ordering::SeqCst);
            if self.fail_launch.load(Ordering::SeqCst) {
                return Err(RcError::ProcessLaunch("simulated spawn failure".to_string()));
            }

            let state = Arc::new(FakeProcessState::new(
                !self.exit_on_start.load(Ordering::SeqCst),
                self.ignore_sigterm.load(Ordering::SeqCst),
            ));
            if let Ok(mut processes) = self.processes.lock() {
                processes.insert(room_id, Arc::clone(&state));
            }

            Ok(Box::new(FakeTunnelProcess {
                pid: self.next_pid.fetch_add(1, Ordering::SeqCst),
                state,
            }))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::mock::FakeLauncher;
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_output_tail_is_bounded() {
        let mut tail = OutputTail::default();
        for i in 0..(OUTPUT_TAIL_LINES + 10) {
            tail.push(format!("line {i}"));
        }
        assert_eq!(tail.lines.len(), OUTPUT_TAIL_LINES);
        assert!(tail.render().starts_with("line 10\n"));
        assert!(tail.render().ends_with(&format!("line {}", OUTPUT_TAIL_LINES + 9)));
    }

    #[tokio::test]
    async fn test_fake_process_graceful_stop() {
        let launcher = FakeLauncher::healthy();
        let room_id = RoomId::new();
        let mut process = launcher
            .launch(room_id, Path::new("server.conf"), Path::new("."))
            .await
            .unwrap();

        assert!(process.is_alive());
        assert!(process.id().is_some());

        process.request_stop().unwrap();
        tokio::time::timeout(Duration::from_secs(1), process.wait())
            .await
            .expect("process should exit after SIGTERM")
            .unwrap();

        let state = launcher.process(room_id).unwrap();
        assert!(!state.is_alive());
        assert!(state.stop_requested());
        assert!(!state.force_killed());
    }

    #[tokio::test]
    async fn test_fake_process_ignoring_sigterm_needs_kill() {
        let launcher = FakeLauncher::ignoring_sigterm();
        let room_id = RoomId::new();
        let mut process = launcher
            .launch(room_id, Path::new("server.conf"), Path::new("."))
            .await
            .unwrap();

        process.request_stop().unwrap();
        let waited = tokio::time::timeout(Duration::from_millis(50), process.wait()).await;
        assert!(waited.is_err(), "process should still be running");

        process.force_kill().await.unwrap();
        assert!(!process.is_alive());
        assert!(launcher.process(room_id).unwrap().force_killed());
    }

    #[tokio::test]
    async fn test_fake_launcher_failure() {
        let launcher = FakeLauncher::failing_launch();
        let result = launcher
            .launch(RoomId::new(), Path::new("server.conf"), Path::new("."))
            .await;
        assert!(matches!(result, Err(RcError::ProcessLaunch(_))));
        assert_eq!(launcher.launch_count(), 1);
        assert_eq!(launcher.alive_count(), 0);
    }

    #[tokio::test]
    async fn test_fake_dh_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dh.pem");

        FakeLauncher::healthy()
            .generate_dh_params(&path, 2048)
            .await
            .unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("DH PARAMETERS"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_openvpn_launcher_reports_missing_binary() {
        let launcher = OpenVpnLauncher::new(
            PathBuf::from("/nonexistent/openvpn"),
            PathBuf::from("/nonexistent/openssl"),
        );
        let dir = tempfile::tempdir().unwrap();

        let result = launcher
            .launch(RoomId::new(), &dir.path().join("server.conf"), dir.path())
            .await;
        assert!(matches!(result, Err(RcError::ProcessLaunch(_))));

        let result = launcher
            .generate_dh_params(&dir.path().join("dh.pem"), 512)
            .await;
        assert!(matches!(result, Err(RcError::ProcessLaunch(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_openvpn_process_lifecycle_with_sleep_binary() {
        // `sleep` stands in for a tunnel server that honours SIGTERM
        let mut command = Command::new("sleep");
        command
            .arg("30")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .process_group(0);
        let child = match command.spawn() {
            Ok(child) => child,
            // No coreutils in this environment
            Err(_) => return,
        };

        let mut process = OpenVpnProcess {
            child,
            output: Arc::new(Mutex::new(OutputTail::default())),
            drains: Vec::new(),
        };

        assert!(process.is_alive());
        process.request_stop().unwrap();
        tokio::time::timeout(Duration::from_secs(5), process.wait())
            .await
            .expect("sleep should exit on SIGTERM")
            .unwrap();
        assert!(!process.is_alive());
    }
}
