//! Shared harness for the server behaviour suites.

use std::ffi::OsString;
use std::net::{SocketAddr, TcpStream};
use std::sync::{Arc, Condvar, Mutex, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use kindling_config::Config;
use kindling_protocol::{Client, Request, Transcript};
use ortho_config::{OrthoConfig, OrthoError};

use crate::bootstrap::{BootstrapError, ConfigLoader};
use crate::entry::{EntryPoint, Registry, register_builtins, register_demos};
use crate::health::HealthReporter;
use crate::process::{Runtime, ShutdownError, ShutdownSignal};

pub(crate) const WAIT_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Polls `condition` until it holds or [`WAIT_TIMEOUT`] passes.
pub(crate) fn eventually(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + WAIT_TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(POLL_INTERVAL);
    }
    condition()
}

#[derive(Debug, Default)]
struct GateState {
    entered: Vec<u32>,
    permits: usize,
    running: usize,
    max_running: usize,
}

/// Holds work until the test hands out permits, recording entry order and
/// peak concurrency.
#[derive(Debug, Default)]
pub(crate) struct Gate {
    state: Mutex<GateState>,
    changed: Condvar,
}

impl Gate {
    /// Records `id` as entered and blocks until a permit is available.
    pub(crate) fn pass(&self, id: u32) {
        let mut state = self.state.lock().expect("gate mutex poisoned");
        state.entered.push(id);
        state.running += 1;
        state.max_running = state.max_running.max(state.running);
        self.changed.notify_all();
        while state.permits == 0 {
            state = self.changed.wait(state).expect("gate mutex poisoned");
        }
        state.permits -= 1;
        state.running -= 1;
    }

    /// Lets `count` blocked or future passes through.
    pub(crate) fn release(&self, count: usize) {
        self.state.lock().expect("gate mutex poisoned").permits += count;
        self.changed.notify_all();
    }

    pub(crate) fn entered(&self) -> Vec<u32> {
        self.state.lock().expect("gate mutex poisoned").entered.clone()
    }

    pub(crate) fn max_running(&self) -> usize {
        self.state.lock().expect("gate mutex poisoned").max_running
    }

    /// Waits until `count` passes have been entered.
    pub(crate) fn wait_for_entered(&self, count: usize) -> bool {
        eventually(|| self.entered().len() >= count)
    }
}

/// Configuration bound to an ephemeral loopback port.
pub(crate) fn test_config(pool_size: usize) -> Config {
    Config {
        listen_host: "127.0.0.1".to_owned(),
        listen_port: 0,
        pool_size,
        ..Config::default()
    }
}

/// Structured health events tracked during scenarios.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum HealthEvent {
    BootstrapStarting,
    BootstrapSucceeded,
    BootstrapFailed(String),
    ListenerReady(SocketAddr),
    ShutdownRequested(String),
    ShutdownCompleted,
}

/// Records health events for assertions.
#[derive(Debug, Default)]
pub(crate) struct RecordingHealthReporter {
    events: Mutex<Vec<HealthEvent>>,
    ready: Mutex<Option<mpsc::Sender<SocketAddr>>>,
}

impl RecordingHealthReporter {
    /// Reporter that also announces the bound address on `ready`.
    pub(crate) fn announcing(ready: mpsc::Sender<SocketAddr>) -> Self {
        Self {
            events: Mutex::default(),
            ready: Mutex::new(Some(ready)),
        }
    }

    pub(crate) fn events(&self) -> Vec<HealthEvent> {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .clone()
    }

    fn record(&self, event: HealthEvent) {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .push(event);
    }
}

impl HealthReporter for RecordingHealthReporter {
    fn bootstrap_starting(&self) {
        self.record(HealthEvent::BootstrapStarting);
    }

    fn bootstrap_succeeded(&self, _config: &Config) {
        self.record(HealthEvent::BootstrapSucceeded);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        self.record(HealthEvent::BootstrapFailed(error.to_string()));
    }

    fn listener_ready(&self, address: SocketAddr, _pool_size: usize) {
        self.record(HealthEvent::ListenerReady(address));
        if let Some(ready) = self.ready.lock().expect("ready mutex poisoned").take() {
            let _ = ready.send(address);
        }
    }

    fn shutdown_requested(&self, source: &str) {
        self.record(HealthEvent::ShutdownRequested(source.to_owned()));
    }

    fn shutdown_completed(&self) {
        self.record(HealthEvent::ShutdownCompleted);
    }
}

/// Loader that intentionally fails by passing invalid CLI arguments.
pub(crate) struct FailingConfigLoader;

impl ConfigLoader for FailingConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        let args = vec![
            OsString::from("kindlingd"),
            OsString::from("--listen-port"),
            OsString::from("not-a-port"),
        ];
        Config::load_from_iter(args)
    }
}

/// Shutdown signal released by the test through a channel.
pub(crate) struct ChannelShutdownSignal {
    receiver: Mutex<mpsc::Receiver<&'static str>>,
}

impl ChannelShutdownSignal {
    pub(crate) fn new() -> (mpsc::Sender<&'static str>, Self) {
        let (sender, receiver) = mpsc::channel();
        (
            sender,
            Self {
                receiver: Mutex::new(receiver),
            },
        )
    }
}

impl ShutdownSignal for ChannelShutdownSignal {
    fn wait(&self) -> Result<&'static str, ShutdownError> {
        let receiver = self.receiver.lock().expect("signal receiver mutex poisoned");
        Ok(receiver.recv().unwrap_or("test channel closed"))
    }
}

/// A running server on an ephemeral port.
pub(crate) struct TestServer {
    runtime: Option<Runtime>,
    address: SocketAddr,
}

impl TestServer {
    /// Starts a server with the builtins, the demos and `extra` entry points
    /// registered and aliased by their identity.
    pub(crate) fn start(config: Config, extra: Vec<Arc<dyn EntryPoint>>) -> Self {
        let mut registry = Registry::new(config.allow_direct_lookup());
        register_builtins(&mut registry).expect("builtins register");
        register_demos(&mut registry).expect("demos register");
        for entry in extra {
            registry.register(entry).expect("extra entry point registers");
        }
        if let Some(identity) = config.default_entry_point() {
            registry.set_default(identity).expect("default entry point");
        }
        let reporter: Arc<dyn HealthReporter> = Arc::new(RecordingHealthReporter::default());
        let runtime = Runtime::start(&config, registry, reporter).expect("server starts");
        let address = runtime.local_addr();
        Self {
            runtime: Some(runtime),
            address,
        }
    }

    pub(crate) fn runtime(&self) -> &Runtime {
        self.runtime.as_ref().expect("server running")
    }

    /// Opens a raw connection with generous timeouts.
    pub(crate) fn connect_raw(&self) -> TcpStream {
        let stream = TcpStream::connect(self.address).expect("connect");
        stream
            .set_read_timeout(Some(WAIT_TIMEOUT))
            .expect("read timeout");
        stream
    }

    /// Runs `request` to completion with `stdin` as input.
    pub(crate) fn run(&self, request: &Request, stdin: &[u8]) -> Transcript {
        let stream = self.connect_raw();
        Client::from_stream(stream)
            .collect(request, stdin.to_vec())
            .expect("session completes")
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            let _ = runtime.stop();
        }
    }
}
