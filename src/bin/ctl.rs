// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! gpufanctl: one-shot command line client for the gpufan daemon.

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use gpu_fan_utility::client::Connection;
use gpu_fan_utility::config;
use gpu_fan_utility::controller::{DEFAULT_MAX_FAN_PCT, DEFAULT_MIN_FAN_PCT, DEFAULT_TARGET_C};
use gpu_fan_utility::protocol::{Request, Response, StatusReport};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "gpufanctl", about = "Control the GPU fan through gpufan-daemon")]
struct Cli {
    /// Path to the daemon socket.
    #[arg(short, long, default_value = config::DEFAULT_SOCKET_PATH)]
    socket: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show temperature, fan speed and control state.
    Status,

    /// Run the fan at a fixed speed (0-100%).
    Set {
        #[arg(value_parser = clap::value_parser!(u8).range(0..=100))]
        speed: u8,
    },

    /// Return the fan to automatic driver control.
    #[command(visible_aliases = ["disable", "default"])]
    Auto,

    /// Follow a configured fan curve.
    Curve {
        #[arg(default_value = "Default")]
        name: String,
    },

    /// Hold a target temperature (clamped to 40-90°C).
    #[command(visible_aliases = ["temp", "limit"])]
    Target {
        #[arg(default_value_t = DEFAULT_TARGET_C)]
        temp: f64,

        /// Lowest fan speed the controller may use.
        #[arg(long, default_value_t = DEFAULT_MIN_FAN_PCT)]
        min: u8,

        /// Highest fan speed the controller may use.
        #[arg(long, default_value_t = DEFAULT_MAX_FAN_PCT)]
        max: u8,
    },

    /// List configured curves.
    Curves,

    /// Add or replace a curve from a JSON curve file.
    Import {
        file: PathBuf,

        /// Switch to the curve after importing it.
        #[arg(long)]
        apply: bool,
    },

    /// Write a configured curve to a JSON curve file.
    Export { name: String, file: PathBuf },

    /// Save the daemon's configuration to disk.
    Save,

    /// Reload the daemon's configuration from disk.
    Reload,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let mut conn = Connection::connect(&cli.socket)
        .with_context(|| format!("Could not connect to daemon at {}", cli.socket))?;

    match cli.command {
        Command::Status => match conn.send_request(&Request::GetStatus)? {
            Response::Status(report) => print_status(&report),
            other => return unexpected(other),
        },
        Command::Set { speed } => run(&mut conn, Request::SetFixed { speed_pct: speed })?,
        Command::Auto => run(&mut conn, Request::SetAuto)?,
        Command::Curve { name } => run(&mut conn, Request::UseCurve { curve_name: name })?,
        Command::Target { temp, min, max } => run(
            &mut conn,
            Request::SetTarget {
                target_c: temp,
                min_pct: min,
                max_pct: max,
            },
        )?,
        Command::Curves => match conn.send_request(&Request::ListCurves)? {
            Response::Curves { curves } => {
                for curve in curves {
                    let points = curve
                        .points()
                        .iter()
                        .map(|p| format!("{:.0}°C→{:.0}%", p.temp_c, p.fan_pct))
                        .collect::<Vec<_>>()
                        .join(", ");
                    println!("{}: {points}", curve.name());
                }
            }
            other => return unexpected(other),
        },
        Command::Import { file, apply } => {
            let Some(curve) = config::load_curve(&file)? else {
                bail!("No curve file at {}", file.display());
            };
            let name = curve.name().to_string();
            run(
                &mut conn,
                Request::UpsertCurve {
                    name: name.clone(),
                    points: curve.points().to_vec(),
                },
            )?;
            if apply {
                run(&mut conn, Request::UseCurve { curve_name: name })?;
            }
        }
        Command::Export { name, file } => match conn.send_request(&Request::ListCurves)? {
            Response::Curves { curves } => {
                let Some(curve) = curves.iter().find(|c| c.name() == name) else {
                    bail!("Curve '{name}' not found");
                };
                config::save_curve(&file, curve)?;
                println!("Wrote curve '{name}' to {}", file.display());
            }
            other => return unexpected(other),
        },
        Command::Save => run(&mut conn, Request::SaveConfig)?,
        Command::Reload => run(&mut conn, Request::ReloadConfig)?,
    }

    Ok(())
}

/// Send a request that answers with ok/error and print the message.
fn run(conn: &mut Connection, req: Request) -> anyhow::Result<()> {
    match conn.send_request(&req)? {
        Response::Ok { message } => {
            println!("{message}");
            Ok(())
        }
        other => unexpected(other),
    }
}

fn unexpected(resp: Response) -> anyhow::Result<()> {
    match resp {
        Response::Error { message } => bail!("{message}"),
        other => bail!("Unexpected response from daemon: {other:?}"),
    }
}

fn print_status(report: &StatusReport) {
    match &report.gpu {
        Some(gpu) => {
            let temp = gpu
                .temp_c
                .map(|t| format!("{t:.1}°C"))
                .unwrap_or_else(|| "??°C".to_string());
            let fan = gpu
                .fan_pct
                .map(|p| format!("{p}%"))
                .unwrap_or_else(|| "??%".to_string());
            let rpm = gpu.rpm.map(|r| format!(" ({r} RPM)")).unwrap_or_default();
            println!("GPU:  {} ({})", gpu.card, gpu.name);
            println!("Temp: {temp} | Fan: {fan}{rpm}");
        }
        None => println!("GPU:  not found"),
    }

    println!("Mode: {}", report.mode);
    if let Some(pct) = report.commanded_pct {
        println!("Last command: {pct}%");
    }
    if let Some(c) = &report.controller {
        println!(
            "Controller: {:?}, {} stable sample(s), holding {}%",
            c.mode, c.stable_count, c.last_speed
        );
    }
    println!("Config: {}", report.config_path);
}
