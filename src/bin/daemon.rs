// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! gpufan-daemon: system service that owns the GPU fan, runs the control
//! loop, and accepts commands from clients over a Unix domain socket.

use clap::Parser;
use gpu_fan_utility::config::{self, Config};
use gpu_fan_utility::controller::clamp_target;
use gpu_fan_utility::curve::FanCurve;
use gpu_fan_utility::engine::{Engine, FanMode, FanSink};
use gpu_fan_utility::hwmon::{self, GpuDevice};
use gpu_fan_utility::protocol::{self, Request, Response, StatusReport};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::{Mutex, watch};
use tokio::time::{self, Duration};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "gpufan-daemon", about = "GPU fan control daemon")]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, default_value = config::DEFAULT_CONFIG_PATH)]
    config: String,

    /// Override the socket path.
    #[arg(short, long)]
    socket: Option<String>,

    /// Override the DRM card to control (e.g. card0).
    #[arg(long)]
    card: Option<String>,
}

// ---------------------------------------------------------------------------
// Shared daemon state
// ---------------------------------------------------------------------------

/// Everything the control loop and the client handlers share. The engine is
/// only ever touched with the lock held, so there is a single consumer of
/// the controller at any time.
struct DaemonState {
    config: Config,
    gpu: Option<GpuDevice>,
    engine: Engine,
    config_path: PathBuf,
    /// Set under the lock once the fan has been handed back for exit; the
    /// control loop must not write after that.
    shutting_down: bool,
}

type SharedState = Arc<Mutex<DaemonState>>;

impl DaemonState {
    /// Build and activate a new engine for `mode`, then record it in the
    /// config. On failure the current engine stays in place.
    fn switch_mode(&mut self, mode: FanMode) -> Result<String, String> {
        let Some(gpu) = &self.gpu else {
            return Err("No controllable GPU found".to_string());
        };

        let mut engine = Engine::new(mode.clone(), &self.config.curves, self.config.control.tuning)
            .map_err(|e| e.to_string())?;
        engine
            .activate(gpu)
            .map_err(|e| format!("Failed to apply {mode}: {e}"))?;

        log::info!("Fan mode set to {mode}");
        self.engine = engine;
        self.config.control.mode = mode.clone();
        Ok(format!("Fan mode set to {mode}"))
    }

    /// One control-loop step. Returns `false` once shutdown has begun.
    fn control_tick(&mut self) -> bool {
        if self.shutting_down {
            return false;
        }
        if let Some(gpu) = &self.gpu {
            self.engine.tick(gpu, gpu);
        }
        true
    }

    /// Stop all further fan writes, then optionally hand the fan back to
    /// the driver. Both happen under the same lock as the control loop.
    fn begin_shutdown(&mut self, restore: bool) {
        self.shutting_down = true;
        if !restore {
            return;
        }
        if let Some(gpu) = &self.gpu {
            match gpu.restore_automatic() {
                Ok(()) => log::info!("Restored {} to automatic fan control", gpu.card),
                Err(e) => log::warn!("Failed to restore automatic control for {}: {e}", gpu.card),
            }
        }
    }

    fn status(&self) -> StatusReport {
        StatusReport {
            gpu: self.gpu.as_ref().map(GpuDevice::read_status),
            mode: self.engine.mode().clone(),
            commanded_pct: self.engine.last_commanded(),
            controller: self.engine.controller_snapshot(),
            config_path: self.config_path.display().to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config_path = config::resolve_config_path(Some(&cli.config));
    let cfg = config::load_config(&config_path).unwrap_or_else(|e| {
        log::warn!("Could not load config: {e}, using defaults");
        Config::default()
    });

    if !nix::unistd::geteuid().is_root() {
        log::warn!("Not running as root; writes to the fan control files will likely fail");
    }

    let socket_path = cli
        .socket
        .clone()
        .unwrap_or_else(|| cfg.daemon.socket_path.clone());

    // Discover hardware
    let gpus = hwmon::discover_gpus().unwrap_or_else(|e| {
        log::error!("Failed to scan {}: {e}", hwmon::DRM_ROOT);
        Vec::new()
    });
    log::info!("Discovered {} GPU(s) with fan control", gpus.len());

    let card = cli.card.as_deref().or(cfg.daemon.card.as_deref());
    let gpu = hwmon::select_gpu(gpus, card);
    match &gpu {
        Some(g) => log::info!("Controlling {} ({}, vendor {:?})", g.card, g.name, g.vendor),
        None => log::error!("No controllable GPU found; running in monitor-only mode"),
    }

    // Apply initial mode
    let engine = start_engine(&cfg, gpu.as_ref());

    let restore_on_exit = cfg.daemon.restore_on_exit;
    let poll_interval = cfg.daemon.poll_interval_ms;
    let state: SharedState = Arc::new(Mutex::new(DaemonState {
        config: cfg,
        gpu,
        engine,
        config_path,
        shutting_down: false,
    }));

    // Clean up old socket file
    let _ = std::fs::remove_file(&socket_path);
    let listener = UnixListener::bind(&socket_path)?;

    // Make socket accessible to non-root users
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o666);
        std::fs::set_permissions(&socket_path, perms)?;
    }

    log::info!("Listening on {socket_path}");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Signal handler
    let mut sigterm = signal(SignalKind::terminate())?;
    let state_for_signal = state.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
        log::info!("Received shutdown signal");
        state_for_signal.lock().await.begin_shutdown(restore_on_exit);
        let _ = shutdown_tx.send(true);
    });

    // Control loop
    let state_for_loop = state.clone();
    let mut shutdown_for_loop = shutdown_rx.clone();
    tokio::spawn(async move {
        let mut interval = time::interval(Duration::from_millis(poll_interval.max(100)));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if !state_for_loop.lock().await.control_tick() {
                        break;
                    }
                }
                _ = shutdown_for_loop.changed() => {
                    break;
                }
            }
        }
    });

    // Accept client connections
    let mut shutdown = shutdown_rx;
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let state_clone = state.clone();
                        tokio::spawn(handle_client(stream, state_clone));
                    }
                    Err(e) => {
                        log::error!("Failed to accept connection: {e}");
                    }
                }
            }
            _ = shutdown.changed() => {
                log::info!("Daemon shutting down");
                break;
            }
        }
    }

    // Cleanup socket
    let _ = std::fs::remove_file(&socket_path);
    Ok(())
}

/// Build the engine for the configured mode, falling back to automatic
/// control if the mode can't be built or applied.
fn start_engine(cfg: &Config, gpu: Option<&GpuDevice>) -> Engine {
    let tuning = cfg.control.tuning;
    let mut engine = Engine::new(cfg.control.mode.clone(), &cfg.curves, tuning).unwrap_or_else(|e| {
        log::error!("Invalid control mode in config: {e}; using automatic control");
        Engine::automatic()
    });

    if let Some(gpu) = gpu {
        if let Err(e) = engine.activate(gpu) {
            log::error!("Failed to apply {}: {e}", engine.mode());
        } else {
            log::info!("Fan mode: {}", engine.mode());
        }
    }
    engine
}

// ---------------------------------------------------------------------------
// Client connection handler
// ---------------------------------------------------------------------------

async fn handle_client(stream: UnixStream, state: SharedState) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let response = match protocol::decode::<Request>(&line) {
            Ok(req) => process_request(req, &state).await,
            Err(e) => Response::Error {
                message: format!("Invalid request: {e}"),
            },
        };

        let encoded = match protocol::encode(&response) {
            Ok(s) => s,
            Err(e) => {
                log::error!("Failed to encode response: {e}");
                continue;
            }
        };

        if writer.write_all(encoded.as_bytes()).await.is_err() {
            break; // Client disconnected
        }
    }
}

fn reply(result: Result<String, String>) -> Response {
    match result {
        Ok(message) => Response::Ok { message },
        Err(message) => Response::Error { message },
    }
}

async fn process_request(req: Request, state: &SharedState) -> Response {
    let mut st = state.lock().await;
    if st.shutting_down {
        return Response::Error {
            message: "Daemon is shutting down".to_string(),
        };
    }

    match req {
        Request::GetStatus => Response::Status(st.status()),

        Request::SetFixed { speed_pct } => {
            if speed_pct > 100 {
                return Response::Error {
                    message: "Fan speed must be between 0 and 100".to_string(),
                };
            }
            reply(st.switch_mode(FanMode::Fixed { speed_pct }))
        }

        Request::SetAuto => reply(st.switch_mode(FanMode::Auto)),

        Request::UseCurve { curve_name } => reply(st.switch_mode(FanMode::Curve { curve_name })),

        Request::SetTarget {
            target_c,
            min_pct,
            max_pct,
        } => {
            if !target_c.is_finite() {
                return Response::Error {
                    message: format!("Invalid target temperature {target_c}"),
                };
            }
            reply(st.switch_mode(FanMode::Target {
                target_c: clamp_target(target_c),
                min_pct,
                max_pct,
            }))
        }

        Request::ListCurves => Response::Curves {
            curves: st.config.curves.clone(),
        },

        Request::UpsertCurve { name, points } => {
            let curve = match FanCurve::new(name.clone(), points) {
                Ok(c) => c,
                Err(e) => return Response::Error { message: e.to_string() },
            };
            if let Err(e) = curve.validate() {
                return Response::Error { message: e.to_string() };
            }
            let previous = st.config.curves.clone();
            st.config.upsert_curve(curve);

            // A running curve session holds its own copy; restart it.
            let active = st.engine.mode().clone();
            if matches!(&active, FanMode::Curve { curve_name } if *curve_name == name) {
                if let Err(message) = st.switch_mode(active) {
                    st.config.curves = previous;
                    return Response::Error { message };
                }
            }

            Response::Ok {
                message: format!("Curve '{name}' saved"),
            }
        }

        Request::DeleteCurve { name } => {
            if matches!(st.engine.mode(), FanMode::Curve { curve_name } if *curve_name == name) {
                return Response::Error {
                    message: format!("Curve '{name}' is in use"),
                };
            }
            let before = st.config.curves.len();
            st.config.curves.retain(|c| c.name() != name);
            if st.config.curves.len() < before {
                Response::Ok {
                    message: format!("Deleted curve '{name}'"),
                }
            } else {
                Response::Error {
                    message: format!("Curve '{name}' not found"),
                }
            }
        }

        Request::SaveConfig => match config::save_config(&st.config_path, &st.config) {
            Ok(()) => Response::Ok {
                message: format!("Config saved to {}", st.config_path.display()),
            },
            Err(e) => Response::Error {
                message: format!("Failed to save config: {e}"),
            },
        },

        Request::ReloadConfig => match config::load_config(&st.config_path) {
            Ok(cfg) => {
                let previous = std::mem::replace(&mut st.config, cfg);
                let mode = st.config.control.mode.clone();
                match st.switch_mode(mode) {
                    Ok(_) => Response::Ok {
                        message: "Config reloaded".to_string(),
                    },
                    Err(message) => {
                        st.config = previous;
                        Response::Error {
                            message: format!("Failed to apply reloaded config: {message}"),
                        }
                    }
                }
            }
            Err(e) => Response::Error {
                message: format!("Failed to reload config: {e}"),
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpu_fan_utility::controller::ControllerTuning;
    use gpu_fan_utility::curve::{ControlPoint, default_curve};
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn fake_gpu(dir: &Path, temp_millic: i64) -> GpuDevice {
        fs::write(dir.join("temp1_input"), format!("{temp_millic}\n")).unwrap();
        fs::write(dir.join("pwm1"), "0\n").unwrap();
        fs::write(dir.join("pwm1_enable"), "2\n").unwrap();
        GpuDevice {
            card: "card0".to_string(),
            name: "amdgpu".to_string(),
            vendor: Some(hwmon::AMD_VENDOR_ID.to_string()),
            temp_path: Some(dir.join("temp1_input")),
            pwm_path: dir.join("pwm1"),
            pwm_enable_path: dir.join("pwm1_enable"),
            rpm_path: None,
            pwm_max: 255,
        }
    }

    fn state(gpu: Option<GpuDevice>, mode: FanMode) -> DaemonState {
        let config = Config::default();
        let engine = Engine::new(mode, &config.curves, ControllerTuning::default()).unwrap();
        DaemonState {
            config,
            gpu,
            engine,
            config_path: PathBuf::from("/nonexistent/config.toml"),
            shutting_down: false,
        }
    }

    fn target_mode() -> FanMode {
        FanMode::Target {
            target_c: 70.0,
            min_pct: 30,
            max_pct: 100,
        }
    }

    fn curve_points() -> Vec<ControlPoint> {
        vec![ControlPoint::new(40.0, 20.0), ControlPoint::new(85.0, 100.0)]
    }

    #[test]
    fn test_control_tick_stops_after_shutdown() {
        let dir = TempDir::new().unwrap();
        let mut st = state(Some(fake_gpu(dir.path(), 80000)), target_mode());

        assert!(st.control_tick());
        assert_eq!(fs::read_to_string(dir.path().join("pwm1_enable")).unwrap(), "1");

        st.begin_shutdown(true);
        assert_eq!(fs::read_to_string(dir.path().join("pwm1_enable")).unwrap(), "2");

        // A tick queued behind the shutdown must not take the fan back.
        assert!(!st.control_tick());
        assert_eq!(fs::read_to_string(dir.path().join("pwm1_enable")).unwrap(), "2");
    }

    #[test]
    fn test_shutdown_without_restore_leaves_fan_alone() {
        let dir = TempDir::new().unwrap();
        let mut st = state(Some(fake_gpu(dir.path(), 80000)), target_mode());
        st.control_tick();

        st.begin_shutdown(false);
        assert!(!st.control_tick());
        assert_eq!(fs::read_to_string(dir.path().join("pwm1_enable")).unwrap(), "1");
    }

    #[tokio::test]
    async fn test_requests_rejected_during_shutdown() {
        let shared: SharedState = Arc::new(Mutex::new(state(None, FanMode::Auto)));
        shared.lock().await.begin_shutdown(false);

        let resp = process_request(Request::SetFixed { speed_pct: 50 }, &shared).await;
        assert!(matches!(resp, Response::Error { .. }));
    }

    #[tokio::test]
    async fn test_upsert_active_curve_rolls_back_on_failed_restart() {
        let mode = FanMode::Curve {
            curve_name: "Default".to_string(),
        };
        // Without a GPU the curve session cannot be restarted.
        let shared: SharedState = Arc::new(Mutex::new(state(None, mode)));

        let resp = process_request(
            Request::UpsertCurve {
                name: "Default".to_string(),
                points: curve_points(),
            },
            &shared,
        )
        .await;
        assert!(matches!(resp, Response::Error { .. }));

        let st = shared.lock().await;
        assert_eq!(st.config.find_curve("Default"), Some(&default_curve()));
    }

    #[tokio::test]
    async fn test_upsert_active_curve_restarts_session() {
        let dir = TempDir::new().unwrap();
        let mode = FanMode::Curve {
            curve_name: "Default".to_string(),
        };
        let shared: SharedState =
            Arc::new(Mutex::new(state(Some(fake_gpu(dir.path(), 60000)), mode)));

        let resp = process_request(
            Request::UpsertCurve {
                name: "Default".to_string(),
                points: curve_points(),
            },
            &shared,
        )
        .await;
        assert!(matches!(resp, Response::Ok { .. }));

        let mut st = shared.lock().await;
        assert_eq!(st.config.find_curve("Default").unwrap().points(), curve_points());
        // 60°C on the new curve: 20 + (20/45)*80 = 55.5 -> 55%.
        st.control_tick();
        assert_eq!(st.engine.last_commanded(), Some(55));
    }
}
